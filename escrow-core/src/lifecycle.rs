//! Trade lifecycle - validates and applies state transitions
//!
//! Single authority over the state graph: every transition checks the
//! actor, then the status/balance guard, then awaits settlement, and
//! persists the new state only after settlement succeeded. Transitions
//! on the same trade are serialized through a per-id lock, so no
//! transition can observe a stale status and apply a second payout.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex as RegistryMutex};
use std::time::Duration;

use chrono::Utc;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{info, warn};

use crate::error::TradeError;
use crate::model::{Principal, Resolution, TradeId, TradeRecord, TradeStatus};
use crate::settlement::{Payout, SettlementExecutor, SettlementReceipt};
use crate::store::TradeStore;
use crate::TradeResult;

/// The arbiter capability, injected at construction rather than read
/// from ambient process state so tests can substitute their own.
#[derive(Debug, Clone)]
pub struct Authority {
    arbiter: Principal,
}

impl Authority {
    pub fn new(arbiter: Principal) -> Self {
        Self { arbiter }
    }

    pub fn arbiter(&self) -> &Principal {
        &self.arbiter
    }

    pub fn is_arbiter(&self, actor: &Principal) -> bool {
        &self.arbiter == actor
    }
}

/// Configuration for the trade lifecycle
#[derive(Debug, Clone)]
pub struct LifecycleConfig {
    /// Bounded wait for settlement execution before reporting pending
    pub settlement_timeout: Duration,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            settlement_timeout: Duration::from_secs(30),
        }
    }
}

/// Result of a state-changing transition: the persisted record plus
/// the durable execution reference from the settlement backend.
#[derive(Debug, Clone)]
pub struct SettlementOutcome {
    pub trade: TradeRecord,
    pub receipt: SettlementReceipt,
}

/// Check a (from, to) pair against the closed transition table.
///
/// This is the one place illegal transitions are rejected; the
/// per-transition methods only add actor and balance guards on top.
pub fn validate_transition(from: TradeStatus, to: TradeStatus) -> TradeResult<()> {
    use TradeStatus::*;

    let legal = matches!(
        (from, to),
        (Created, Funded)
            | (Funded, Shipped)
            | (Funded, Completed)
            | (Shipped, Completed)
            | (Funded, Disputed)
            | (Shipped, Disputed)
            | (Disputed, Resolved)
            | (Funded, Refunded)
            | (Shipped, Refunded)
            | (Disputed, Refunded)
    );

    if legal {
        Ok(())
    } else {
        let reason = if from.is_terminal() {
            "trade already settled"
        } else {
            "transition not in the state graph"
        };
        Err(TradeError::invalid_transition(from.name(), to.name(), reason))
    }
}

type LockRegistry = RegistryMutex<HashMap<TradeId, Arc<Mutex<()>>>>;

/// Holds one trade's transition lock; dropping it releases the lock
/// and removes the registry entry once no other task references it,
/// so invalid or settled ids do not accumulate in the registry.
struct IdLockGuard<'a> {
    id: TradeId,
    registry: &'a LockRegistry,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for IdLockGuard<'_> {
    fn drop(&mut self) {
        // Release the mutex (and its Arc clone) before counting
        self.guard.take();
        let mut locks = self.registry.lock().expect("lock registry poisoned");
        if let Some(entry) = locks.get(&self.id) {
            // Only the registry itself still references the lock
            if Arc::strong_count(entry) == 1 {
                locks.remove(&self.id);
            }
        }
    }
}

/// The escrow trade state machine
pub struct TradeLifecycle {
    store: TradeStore,
    executor: Arc<dyn SettlementExecutor>,
    authority: Authority,
    config: LifecycleConfig,
    /// Per-trade locks serializing concurrent transitions on one id
    locks: LockRegistry,
}

impl TradeLifecycle {
    pub fn new(
        store: TradeStore,
        executor: Arc<dyn SettlementExecutor>,
        authority: Authority,
        config: LifecycleConfig,
    ) -> Self {
        Self {
            store,
            executor,
            authority,
            config,
            locks: RegistryMutex::new(HashMap::new()),
        }
    }

    pub fn authority(&self) -> &Authority {
        &self.authority
    }

    async fn lock_trade(&self, id: &TradeId) -> IdLockGuard<'_> {
        let lock = self
            .locks
            .lock()
            .expect("lock registry poisoned")
            .entry(*id)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        let guard = lock.lock_owned().await;
        IdLockGuard {
            id: *id,
            registry: &self.locks,
            guard: Some(guard),
        }
    }

    /// Await a settlement call with the configured bounded wait.
    /// On timeout nothing is persisted and the trade keeps its prior
    /// status; the caller retries once the backend outcome is known.
    async fn settle<F>(&self, fut: F) -> TradeResult<SettlementReceipt>
    where
        F: Future<Output = TradeResult<SettlementReceipt>>,
    {
        match tokio::time::timeout(self.config.settlement_timeout, fut).await {
            Ok(result) => result,
            Err(_) => {
                warn!(
                    timeout_secs = self.config.settlement_timeout.as_secs(),
                    "settlement did not confirm within the bounded wait"
                );
                Err(TradeError::pending(format!(
                    "settlement not confirmed within {}s; retry once the backend outcome is known",
                    self.config.settlement_timeout.as_secs()
                )))
            }
        }
    }

    /// Create a new trade. The actor becomes the seller.
    pub async fn create_trade(
        &self,
        actor: &Principal,
        id: TradeId,
        buyer: Principal,
        amount: u128,
        content_ref: String,
    ) -> TradeResult<SettlementOutcome> {
        if amount == 0 {
            return Err(TradeError::validation("trade amount must be greater than 0"));
        }
        if actor == &buyer {
            return Err(TradeError::validation("buyer must differ from the seller"));
        }

        let _guard = self.lock_trade(&id).await;

        if self.store.get(&id).await.is_ok() {
            return Err(TradeError::conflict(id.to_hex()));
        }

        let record = TradeRecord::new(id, actor.clone(), buyer, amount, content_ref);
        let receipt = self.settle(self.executor.open(&record)).await?;
        self.store.create(record.clone()).await?;

        info!(trade = %id, seller = %record.seller, buyer = %record.buyer, amount, "created trade");
        Ok(SettlementOutcome {
            trade: record,
            receipt,
        })
    }

    /// Buyer deposits the exact trade amount into escrow
    pub async fn deposit(
        &self,
        actor: &Principal,
        id: &TradeId,
        value: u128,
    ) -> TradeResult<SettlementOutcome> {
        let _guard = self.lock_trade(id).await;

        let trade = self.store.get(id).await?;
        if actor != &trade.buyer {
            return Err(TradeError::unauthorized("only the buyer may deposit"));
        }
        validate_transition(trade.status, TradeStatus::Funded)?;
        if value != trade.amount {
            return Err(TradeError::invalid_transition(
                trade.status.name().to_string(),
                TradeStatus::Funded.name().to_string(),
                format!(
                    "deposit of {value} does not match trade amount {}; partial or over-payment is rejected",
                    trade.amount
                ),
            ));
        }

        let receipt = self.settle(self.executor.hold(id, value)).await?;
        let trade = self
            .store
            .update(id, |t| {
                t.escrow_balance += value;
                t.status = TradeStatus::Funded;
                t.updated_at = Utc::now();
                Ok(t.clone())
            })
            .await?;

        info!(trade = %id, value, "deposit held in escrow");
        Ok(SettlementOutcome { trade, receipt })
    }

    /// Seller marks the goods as shipped
    pub async fn mark_shipped(
        &self,
        actor: &Principal,
        id: &TradeId,
    ) -> TradeResult<SettlementOutcome> {
        let _guard = self.lock_trade(id).await;

        let trade = self.store.get(id).await?;
        if actor != &trade.seller {
            return Err(TradeError::unauthorized("only the seller may mark shipment"));
        }
        validate_transition(trade.status, TradeStatus::Shipped)?;

        let receipt = self
            .settle(self.executor.note(id, TradeStatus::Shipped))
            .await?;
        let trade = self
            .store
            .update(id, |t| {
                t.status = TradeStatus::Shipped;
                t.updated_at = Utc::now();
                Ok(t.clone())
            })
            .await?;

        info!(trade = %id, "marked shipped");
        Ok(SettlementOutcome { trade, receipt })
    }

    /// Buyer confirms receipt; the full escrow is released to the seller
    pub async fn confirm_received(
        &self,
        actor: &Principal,
        id: &TradeId,
    ) -> TradeResult<SettlementOutcome> {
        let _guard = self.lock_trade(id).await;

        let trade = self.store.get(id).await?;
        if actor != &trade.buyer {
            return Err(TradeError::unauthorized("only the buyer may confirm receipt"));
        }
        validate_transition(trade.status, TradeStatus::Completed)?;
        self.require_full_escrow(&trade, TradeStatus::Completed)?;

        let payouts = [Payout {
            recipient: trade.seller.clone(),
            amount: trade.escrow_balance,
        }];
        let receipt = self.settle(self.executor.release(id, &payouts)).await?;
        let trade = self
            .store
            .update(id, |t| {
                t.escrow_balance = 0;
                t.status = TradeStatus::Completed;
                t.updated_at = Utc::now();
                Ok(t.clone())
            })
            .await?;

        info!(trade = %id, amount = trade.amount, "released escrow to seller");
        Ok(SettlementOutcome { trade, receipt })
    }

    /// Either party freezes the trade pending the arbiter
    pub async fn raise_dispute(
        &self,
        actor: &Principal,
        id: &TradeId,
    ) -> TradeResult<SettlementOutcome> {
        let _guard = self.lock_trade(id).await;

        let trade = self.store.get(id).await?;
        if actor != &trade.buyer && actor != &trade.seller {
            return Err(TradeError::unauthorized(
                "only the buyer or the seller may raise a dispute",
            ));
        }
        validate_transition(trade.status, TradeStatus::Disputed)?;
        self.require_full_escrow(&trade, TradeStatus::Disputed)?;

        let receipt = self
            .settle(self.executor.note(id, TradeStatus::Disputed))
            .await?;
        let trade = self
            .store
            .update(id, |t| {
                t.status = TradeStatus::Disputed;
                t.updated_at = Utc::now();
                Ok(t.clone())
            })
            .await?;

        info!(trade = %id, actor = %actor, "dispute raised");
        Ok(SettlementOutcome { trade, receipt })
    }

    /// Arbiter settles a disputed trade.
    ///
    /// `FullRefund` returns the entire escrow to the buyer and ends in
    /// `Refunded`. `SplitTo` pays the chosen party up to the escrowed
    /// amount, the remainder goes to the seller, and the trade ends in
    /// `Resolved`. Both legs of a split go through one release call.
    pub async fn resolve_dispute(
        &self,
        actor: &Principal,
        id: &TradeId,
        resolution: Resolution,
    ) -> TradeResult<SettlementOutcome> {
        match resolution {
            Resolution::FullRefund => self.refund_all(actor, id).await,
            Resolution::SplitTo { recipient, amount } => {
                self.resolve_split(actor, id, recipient, amount).await
            }
        }
    }

    async fn resolve_split(
        &self,
        actor: &Principal,
        id: &TradeId,
        recipient: Principal,
        amount: u128,
    ) -> TradeResult<SettlementOutcome> {
        let _guard = self.lock_trade(id).await;

        let trade = self.store.get(id).await?;
        if !self.authority.is_arbiter(actor) {
            return Err(TradeError::unauthorized(
                "only the arbiter may resolve a dispute",
            ));
        }
        if recipient != trade.buyer && recipient != trade.seller {
            return Err(TradeError::validation(
                "resolution recipient must be the buyer or the seller",
            ));
        }
        validate_transition(trade.status, TradeStatus::Resolved)?;
        if amount > trade.escrow_balance {
            return Err(TradeError::invalid_transition(
                trade.status.name().to_string(),
                TradeStatus::Resolved.name().to_string(),
                format!(
                    "split of {amount} exceeds escrow balance {}",
                    trade.escrow_balance
                ),
            ));
        }

        let remainder = trade.escrow_balance - amount;
        let mut payouts = Vec::with_capacity(2);
        if recipient == trade.seller {
            // Split and remainder land on the same party
            payouts.push(Payout {
                recipient: trade.seller.clone(),
                amount: trade.escrow_balance,
            });
        } else {
            if amount > 0 {
                payouts.push(Payout {
                    recipient: recipient.clone(),
                    amount,
                });
            }
            if remainder > 0 {
                payouts.push(Payout {
                    recipient: trade.seller.clone(),
                    amount: remainder,
                });
            }
        }
        if payouts.is_empty() {
            return Err(TradeError::invalid_transition(
                trade.status.name().to_string(),
                TradeStatus::Resolved.name().to_string(),
                "no escrow balance to distribute".to_string(),
            ));
        }

        let receipt = self.settle(self.executor.release(id, &payouts)).await?;
        let trade = self
            .store
            .update(id, |t| {
                t.escrow_balance = 0;
                t.status = TradeStatus::Resolved;
                t.updated_at = Utc::now();
                Ok(t.clone())
            })
            .await?;

        info!(trade = %id, recipient = %recipient, amount, remainder, "dispute resolved by split");
        Ok(SettlementOutcome { trade, receipt })
    }

    /// Arbiter returns the full escrow to the buyer
    pub async fn refund_all(
        &self,
        actor: &Principal,
        id: &TradeId,
    ) -> TradeResult<SettlementOutcome> {
        let _guard = self.lock_trade(id).await;

        let trade = self.store.get(id).await?;
        if !self.authority.is_arbiter(actor) {
            return Err(TradeError::unauthorized("only the arbiter may refund"));
        }
        validate_transition(trade.status, TradeStatus::Refunded)?;
        if trade.escrow_balance == 0 {
            return Err(TradeError::invalid_transition(
                trade.status.name(),
                TradeStatus::Refunded.name(),
                "no escrow balance to refund",
            ));
        }

        let payouts = [Payout {
            recipient: trade.buyer.clone(),
            amount: trade.escrow_balance,
        }];
        let receipt = self.settle(self.executor.release(id, &payouts)).await?;
        let trade = self
            .store
            .update(id, |t| {
                t.escrow_balance = 0;
                t.status = TradeStatus::Refunded;
                t.updated_at = Utc::now();
                Ok(t.clone())
            })
            .await?;

        info!(trade = %id, amount = trade.amount, "escrow refunded to buyer");
        Ok(SettlementOutcome { trade, receipt })
    }

    /// Read-only lookup; unknown ids fail with `NotFound`
    pub async fn get_trade(&self, id: &TradeId) -> TradeResult<TradeRecord> {
        self.store.get(id).await
    }

    fn require_full_escrow(&self, trade: &TradeRecord, to: TradeStatus) -> TradeResult<()> {
        if trade.escrow_balance != trade.amount {
            return Err(TradeError::invalid_transition(
                trade.status.name().to_string(),
                to.name().to_string(),
                format!(
                    "escrow balance {} does not cover trade amount {}",
                    trade.escrow_balance, trade.amount
                ),
            ));
        }
        Ok(())
    }
}
