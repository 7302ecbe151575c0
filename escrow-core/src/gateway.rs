//! Trade gateway - normalization facade over the lifecycle
//!
//! Translates external identifiers and display-unit amount strings
//! into canonical form, fails fast on malformed input before any
//! lifecycle call, and renders lifecycle results back into
//! caller-facing views.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::lifecycle::{SettlementOutcome, TradeLifecycle};
use crate::model::{
    format_display_amount, parse_display_amount, Principal, Resolution, TradeId, TradeRecord,
};
use crate::TradeResult;

/// External-facing trade creation request
#[derive(Debug, Clone, Deserialize)]
pub struct CreateTradeRequest {
    pub trade_id: String,
    pub buyer: String,
    pub price: String,
    pub content_ref: Option<String>,
}

/// Caller-facing arbiter decision, pre-normalization.
///
/// `SellerFull` preserves the legacy wire behavior where any
/// resolution code other than a refund pays the seller the full
/// escrowed amount.
#[derive(Debug, Clone)]
pub enum ResolutionRequest {
    FullRefund,
    SellerFull,
    SplitTo { recipient: String, amount: String },
}

/// Result of a state-changing gateway operation
#[derive(Debug, Clone, Serialize)]
pub struct TransitionReceipt {
    pub trade_id: String,
    pub status: u8,
    pub status_name: String,
    pub tx_hash: String,
}

impl From<SettlementOutcome> for TransitionReceipt {
    fn from(outcome: SettlementOutcome) -> Self {
        Self {
            trade_id: outcome.trade.id.to_hex(),
            status: outcome.trade.status.ordinal(),
            status_name: outcome.trade.status.name().to_string(),
            tx_hash: outcome.receipt.tx_hash,
        }
    }
}

/// Read view of a trade with amounts in display units
#[derive(Debug, Clone, Serialize)]
pub struct TradeView {
    pub trade_id: String,
    pub seller: String,
    pub buyer: String,
    pub amount: String,
    pub content_ref: String,
    pub status: u8,
    pub status_name: String,
    pub created_at: DateTime<Utc>,
}

impl From<TradeRecord> for TradeView {
    fn from(record: TradeRecord) -> Self {
        Self {
            trade_id: record.id.to_hex(),
            seller: record.seller.to_string(),
            buyer: record.buyer.to_string(),
            amount: format_display_amount(record.amount),
            content_ref: record.content_ref,
            status: record.status.ordinal(),
            status_name: record.status.name().to_string(),
            created_at: record.created_at,
        }
    }
}

/// Orchestration facade consumed by the external request layer
pub struct TradeGateway {
    lifecycle: Arc<TradeLifecycle>,
}

impl TradeGateway {
    pub fn new(lifecycle: Arc<TradeLifecycle>) -> Self {
        Self { lifecycle }
    }

    pub async fn create_trade(
        &self,
        actor: &Principal,
        request: CreateTradeRequest,
    ) -> TradeResult<TransitionReceipt> {
        let id = TradeId::parse(&request.trade_id)?;
        let buyer = Principal::new(request.buyer)?;
        let amount = parse_display_amount(&request.price)?;
        let content_ref = request.content_ref.unwrap_or_default();

        let outcome = self
            .lifecycle
            .create_trade(actor, id, buyer, amount, content_ref)
            .await?;
        Ok(outcome.into())
    }

    pub async fn get_trade(&self, trade_id: &str) -> TradeResult<TradeView> {
        let id = TradeId::parse(trade_id)?;
        let record = self.lifecycle.get_trade(&id).await?;
        Ok(record.into())
    }

    pub async fn deposit(
        &self,
        actor: &Principal,
        trade_id: &str,
        price: &str,
    ) -> TradeResult<TransitionReceipt> {
        let id = TradeId::parse(trade_id)?;
        let value = parse_display_amount(price)?;
        let outcome = self.lifecycle.deposit(actor, &id, value).await?;
        Ok(outcome.into())
    }

    pub async fn mark_shipped(
        &self,
        actor: &Principal,
        trade_id: &str,
    ) -> TradeResult<TransitionReceipt> {
        let id = TradeId::parse(trade_id)?;
        let outcome = self.lifecycle.mark_shipped(actor, &id).await?;
        Ok(outcome.into())
    }

    pub async fn confirm_received(
        &self,
        actor: &Principal,
        trade_id: &str,
    ) -> TradeResult<TransitionReceipt> {
        let id = TradeId::parse(trade_id)?;
        let outcome = self.lifecycle.confirm_received(actor, &id).await?;
        Ok(outcome.into())
    }

    pub async fn raise_dispute(
        &self,
        actor: &Principal,
        trade_id: &str,
    ) -> TradeResult<TransitionReceipt> {
        let id = TradeId::parse(trade_id)?;
        let outcome = self.lifecycle.raise_dispute(actor, &id).await?;
        Ok(outcome.into())
    }

    pub async fn resolve_dispute(
        &self,
        actor: &Principal,
        trade_id: &str,
        request: ResolutionRequest,
    ) -> TradeResult<TransitionReceipt> {
        let id = TradeId::parse(trade_id)?;

        let resolution = match request {
            ResolutionRequest::FullRefund => Resolution::FullRefund,
            ResolutionRequest::SellerFull => {
                // The legacy path pays the seller whatever is escrowed;
                // a stale read here is benign because the terminal
                // status guard rejects a second settlement.
                let record = self.lifecycle.get_trade(&id).await?;
                Resolution::SplitTo {
                    recipient: record.seller,
                    amount: record.escrow_balance,
                }
            }
            ResolutionRequest::SplitTo { recipient, amount } => Resolution::SplitTo {
                recipient: Principal::new(recipient)?,
                amount: parse_display_amount(&amount)?,
            },
        };

        let outcome = self.lifecycle.resolve_dispute(actor, &id, resolution).await?;
        Ok(outcome.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TradeError;
    use crate::lifecycle::{Authority, LifecycleConfig};
    use crate::settlement::MemoryLedger;
    use crate::store::TradeStore;

    fn gateway() -> (TradeGateway, Principal, Principal, Principal) {
        let seller = Principal::new("0xseller").unwrap();
        let buyer = Principal::new("0xbuyer").unwrap();
        let arbiter = Principal::new("0xarbiter").unwrap();
        let lifecycle = Arc::new(TradeLifecycle::new(
            TradeStore::new(),
            Arc::new(MemoryLedger::new()),
            Authority::new(arbiter.clone()),
            LifecycleConfig::default(),
        ));
        (TradeGateway::new(lifecycle), seller, buyer, arbiter)
    }

    fn create_request(id: &str, buyer: &Principal) -> CreateTradeRequest {
        CreateTradeRequest {
            trade_id: id.to_string(),
            buyer: buyer.to_string(),
            price: "1.5".to_string(),
            content_ref: Some("Qmhash".to_string()),
        }
    }

    #[tokio::test]
    async fn create_and_view_round_trips_display_amount() {
        let (gateway, seller, buyer, _) = gateway();
        let receipt = gateway
            .create_trade(&seller, create_request("order-1", &buyer))
            .await
            .unwrap();
        assert_eq!(receipt.status, 0);
        assert!(receipt.tx_hash.starts_with("0x"));

        let view = gateway.get_trade("order-1").await.unwrap();
        assert_eq!(view.amount, "1.5");
        assert_eq!(view.seller, "0xseller");
        assert_eq!(view.buyer, "0xbuyer");
        assert_eq!(view.content_ref, "Qmhash");
        assert_eq!(view.status, 0);
        assert_eq!(view.status_name, "Created");

        // The canonical id resolves to the same trade
        let by_hex = gateway.get_trade(&view.trade_id).await.unwrap();
        assert_eq!(by_hex.trade_id, view.trade_id);
    }

    #[tokio::test]
    async fn malformed_amount_fails_before_the_lifecycle() {
        let (gateway, _, buyer, _) = gateway();
        // The trade does not exist either; validation must win
        let err = gateway
            .deposit(&buyer, "order-1", "not-a-number")
            .await
            .unwrap_err();
        assert!(matches!(err, TradeError::Validation(_)));
    }

    #[tokio::test]
    async fn missing_fields_are_rejected() {
        let (gateway, seller, _, _) = gateway();
        let err = gateway
            .create_trade(
                &seller,
                CreateTradeRequest {
                    trade_id: "order-1".to_string(),
                    buyer: "  ".to_string(),
                    price: "1".to_string(),
                    content_ref: None,
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, TradeError::Validation(_)));
    }

    #[tokio::test]
    async fn legacy_seller_resolution_pays_full_escrow() {
        let (gateway, seller, buyer, arbiter) = gateway();
        gateway
            .create_trade(&seller, create_request("order-1", &buyer))
            .await
            .unwrap();
        gateway.deposit(&buyer, "order-1", "1.5").await.unwrap();
        gateway.raise_dispute(&buyer, "order-1").await.unwrap();

        let receipt = gateway
            .resolve_dispute(&arbiter, "order-1", ResolutionRequest::SellerFull)
            .await
            .unwrap();
        assert_eq!(receipt.status_name, "Resolved");
    }
}
