//! Escrow trade lifecycle engine
//!
//! Mediates a two-party trade (seller, buyer) with a neutral arbiter,
//! holding funds in escrow until delivery is confirmed or a dispute is
//! resolved. The crate is organized around four pieces:
//! - [`store::TradeStore`] for the durable id-to-record mapping
//! - [`lifecycle::TradeLifecycle`] for the transition state machine
//! - [`settlement::SettlementExecutor`] for durable value movement
//! - [`gateway::TradeGateway`] as the normalization facade for the
//!   external request layer

pub mod error;
pub mod gateway;
pub mod lifecycle;
pub mod model;
pub mod settlement;
pub mod store;

use error::TradeError;

/// Result type alias for trade operations
pub type TradeResult<T> = Result<T, TradeError>;
