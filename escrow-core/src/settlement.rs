//! Settlement executor - the durable value-movement primitive
//!
//! The lifecycle treats settlement as the authoritative side effect: a
//! transition is complete only once the executor has returned a
//! durable execution reference. Two implementations are provided: an
//! in-process ledger for tests and standalone runs, and an HTTP client
//! for a remote settlement backend.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::info;

use crate::error::TradeError;
use crate::model::{amount_string, Principal, TradeId, TradeRecord, TradeStatus};
use crate::TradeResult;

/// One leg of a release: pay `amount` base units to `recipient`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Payout {
    pub recipient: Principal,
    #[serde(with = "amount_string")]
    pub amount: u128,
}

/// Durable proof that a settlement operation executed
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SettlementReceipt {
    pub tx_hash: String,
}

/// Abstraction over the durable ledger that moves value.
///
/// Every state-changing transition yields a receipt, including
/// fund-neutral ones (`note`), because the backing ledger records each
/// transition as its own transaction. `release` takes the full payout
/// set so a split resolution is a single ledger transaction and cannot
/// half-apply.
#[async_trait]
pub trait SettlementExecutor: Send + Sync {
    /// Register a newly created trade with the ledger
    async fn open(&self, record: &TradeRecord) -> TradeResult<SettlementReceipt>;

    /// Escrow the buyer's deposit for a trade
    async fn hold(&self, id: &TradeId, amount: u128) -> TradeResult<SettlementReceipt>;

    /// Release held value to one or more recipients atomically
    async fn release(&self, id: &TradeId, payouts: &[Payout]) -> TradeResult<SettlementReceipt>;

    /// Record a fund-neutral status transition on the ledger
    async fn note(&self, id: &TradeId, status: TradeStatus) -> TradeResult<SettlementReceipt>;
}

/// In-process ledger tracking the held balance per trade.
///
/// Enforces conservation independently of the lifecycle: a trade can
/// be held exactly once and releases can never exceed the held
/// balance. Tx hashes are derived from the trade id, the operation
/// and a monotonic nonce.
#[derive(Default)]
pub struct MemoryLedger {
    held: Arc<RwLock<HashMap<TradeId, u128>>>,
    nonce: AtomicU64,
}

impl MemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Balance currently escrowed for a trade on the ledger side
    pub async fn held_balance(&self, id: &TradeId) -> Option<u128> {
        self.held.read().await.get(id).copied()
    }

    fn receipt(&self, id: &TradeId, op: &str) -> SettlementReceipt {
        let nonce = self.nonce.fetch_add(1, Ordering::Relaxed);
        let digest = sha256::digest(format!("{id}:{op}:{nonce}"));
        SettlementReceipt {
            tx_hash: format!("0x{digest}"),
        }
    }
}

#[async_trait]
impl SettlementExecutor for MemoryLedger {
    async fn open(&self, record: &TradeRecord) -> TradeResult<SettlementReceipt> {
        let mut held = self.held.write().await;
        if held.contains_key(&record.id) {
            return Err(TradeError::settlement(format!(
                "trade {} already opened on ledger",
                record.id
            )));
        }
        held.insert(record.id, 0);
        info!(trade = %record.id, amount = record.amount, "opened trade on ledger");
        Ok(self.receipt(&record.id, "open"))
    }

    async fn hold(&self, id: &TradeId, amount: u128) -> TradeResult<SettlementReceipt> {
        if amount == 0 {
            return Err(TradeError::settlement("cannot hold a zero amount"));
        }
        let mut held = self.held.write().await;
        let balance = held
            .get_mut(id)
            .ok_or_else(|| TradeError::settlement(format!("trade {id} not opened on ledger")))?;
        if *balance != 0 {
            return Err(TradeError::settlement(format!(
                "trade {id} already holds {balance} base units"
            )));
        }
        *balance = amount;
        info!(trade = %id, amount, "held deposit on ledger");
        Ok(self.receipt(id, "hold"))
    }

    async fn release(&self, id: &TradeId, payouts: &[Payout]) -> TradeResult<SettlementReceipt> {
        if payouts.is_empty() {
            return Err(TradeError::settlement("release requires at least one payout"));
        }
        let total: u128 = payouts.iter().try_fold(0u128, |acc, p| {
            acc.checked_add(p.amount)
                .ok_or_else(|| TradeError::settlement("payout total overflows"))
        })?;

        let mut held = self.held.write().await;
        let balance = held
            .get_mut(id)
            .ok_or_else(|| TradeError::settlement(format!("trade {id} not opened on ledger")))?;
        if total > *balance {
            return Err(TradeError::settlement(format!(
                "release of {total} exceeds held balance {balance} for trade {id}"
            )));
        }
        *balance -= total;
        for payout in payouts {
            info!(trade = %id, recipient = %payout.recipient, amount = payout.amount, "released escrow");
        }
        Ok(self.receipt(id, "release"))
    }

    async fn note(&self, id: &TradeId, status: TradeStatus) -> TradeResult<SettlementReceipt> {
        let held = self.held.read().await;
        if !held.contains_key(id) {
            return Err(TradeError::settlement(format!(
                "trade {id} not opened on ledger"
            )));
        }
        info!(trade = %id, status = %status, "noted status on ledger");
        Ok(self.receipt(id, &format!("note-{}", status.ordinal())))
    }
}

#[derive(Debug, Serialize)]
struct OpenRequest<'a> {
    #[serde(rename = "tradeId")]
    trade_id: String,
    seller: &'a str,
    buyer: &'a str,
    amount: String,
}

#[derive(Debug, Serialize)]
struct HoldRequest {
    #[serde(rename = "tradeId")]
    trade_id: String,
    amount: String,
}

#[derive(Debug, Serialize)]
struct ReleaseRequest<'a> {
    #[serde(rename = "tradeId")]
    trade_id: String,
    payouts: &'a [Payout],
}

#[derive(Debug, Serialize)]
struct NoteRequest {
    #[serde(rename = "tradeId")]
    trade_id: String,
    status: u8,
}

#[derive(Debug, Deserialize)]
struct LedgerResponse {
    #[serde(rename = "txHash")]
    tx_hash: String,
}

/// Client for a remote settlement backend reachable over HTTP.
///
/// Connection-level failures map to `BackendUnavailable`; a reachable
/// backend rejecting the operation maps to `SettlementFailure`.
///
/// A request that executes on the backend after the lifecycle's
/// bounded wait has elapsed is not reflected in the trade store;
/// reconciling such late executions against the ledger is an
/// operator-side task.
pub struct HttpLedger {
    base_url: String,
    client: reqwest::Client,
}

impl HttpLedger {
    pub fn new<S: Into<String>>(base_url: S) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client: reqwest::Client::new(),
        }
    }

    /// Liveness probe against the backend
    pub async fn ping(&self) -> TradeResult<()> {
        let url = format!("{}/health", self.base_url);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| TradeError::backend(format!("liveness probe failed: {e}")))?;
        if !response.status().is_success() {
            return Err(TradeError::backend(format!(
                "liveness probe returned {}",
                response.status()
            )));
        }
        Ok(())
    }

    async fn call<T: Serialize>(&self, endpoint: &str, body: &T) -> TradeResult<SettlementReceipt> {
        let url = format!("{}/{}", self.base_url, endpoint);
        let response = self
            .client
            .post(&url)
            .json(body)
            .send()
            .await
            .map_err(|e| TradeError::backend(format!("settlement backend unreachable: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(TradeError::settlement(format!(
                "backend rejected {endpoint}: {status} {detail}"
            )));
        }

        let parsed: LedgerResponse = response
            .json()
            .await
            .map_err(|e| TradeError::settlement(format!("malformed backend response: {e}")))?;
        Ok(SettlementReceipt {
            tx_hash: parsed.tx_hash,
        })
    }
}

#[async_trait]
impl SettlementExecutor for HttpLedger {
    async fn open(&self, record: &TradeRecord) -> TradeResult<SettlementReceipt> {
        self.call(
            "open",
            &OpenRequest {
                trade_id: record.id.to_hex(),
                seller: record.seller.as_str(),
                buyer: record.buyer.as_str(),
                amount: record.amount.to_string(),
            },
        )
        .await
    }

    async fn hold(&self, id: &TradeId, amount: u128) -> TradeResult<SettlementReceipt> {
        self.call(
            "hold",
            &HoldRequest {
                trade_id: id.to_hex(),
                amount: amount.to_string(),
            },
        )
        .await
    }

    async fn release(&self, id: &TradeId, payouts: &[Payout]) -> TradeResult<SettlementReceipt> {
        self.call(
            "release",
            &ReleaseRequest {
                trade_id: id.to_hex(),
                payouts,
            },
        )
        .await
    }

    async fn note(&self, id: &TradeId, status: TradeStatus) -> TradeResult<SettlementReceipt> {
        self.call(
            "note",
            &NoteRequest {
                trade_id: id.to_hex(),
                status: status.ordinal(),
            },
        )
        .await
    }
}
