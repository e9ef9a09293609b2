//! Transaction-status reconciliation.
//!
//! A run reads a bounded batch of pending/processing transactions, polls the
//! provider for each one sequentially with a pacing delay, folds the
//! response into the internal status enum and pushes changed statuses into
//! the transaction store and the merchant order. Per-record failures are
//! counted and skipped; only a failed batch read aborts the run.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use thiserror::Error;
use tokio::sync::{watch, Mutex};
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

use crate::db::models::{RunSummary, Transaction};
use crate::orders::OrderSynchronizer;
use crate::provider::status::{extract_raw_status, map_status};
use crate::provider::{ProviderCredentials, ProviderGateway};
use crate::store::{RunStatsStore, StoreError, TransactionStore};

#[derive(Error, Debug)]
pub enum ReconcileError {
    #[error("failed to load pending batch: {0}")]
    Store(#[from] StoreError),
    #[error("a reconciliation run is already in progress")]
    AlreadyRunning,
}

#[derive(Debug, Clone)]
pub struct ReconcilerSettings {
    /// Maximum transactions polled per run.
    pub batch_size: i64,
    /// Delay between provider calls. Pacing, not backoff: the provider rate
    /// limits aggressive pollers.
    pub pacing: Duration,
}

impl Default for ReconcilerSettings {
    fn default() -> Self {
        Self {
            batch_size: 100,
            pacing: Duration::from_millis(500),
        }
    }
}

pub struct Reconciler {
    transactions: Arc<dyn TransactionStore>,
    orders: OrderSynchronizer,
    provider: Arc<dyn ProviderGateway>,
    stats: Arc<dyn RunStatsStore>,
    merchant_credentials: Option<ProviderCredentials>,
    settings: ReconcilerSettings,
    run_lock: Mutex<()>,
}

impl Reconciler {
    pub fn new(
        transactions: Arc<dyn TransactionStore>,
        orders: OrderSynchronizer,
        provider: Arc<dyn ProviderGateway>,
        stats: Arc<dyn RunStatsStore>,
        merchant_credentials: Option<ProviderCredentials>,
        settings: ReconcilerSettings,
    ) -> Self {
        Self {
            transactions,
            orders,
            provider,
            stats,
            merchant_credentials,
            settings,
            run_lock: Mutex::new(()),
        }
    }

    /// Executes one reconciliation pass. The scheduled timer and the manual
    /// trigger both land here; their semantics are identical.
    ///
    /// The run lock only prevents wasted duplicate provider calls. Record
    /// updates stay correct without it: the same-status check and the order
    /// transition guards make duplicate application a no-op.
    pub async fn run(&self) -> Result<RunSummary, ReconcileError> {
        let _guard = self
            .run_lock
            .try_lock()
            .map_err(|_| ReconcileError::AlreadyRunning)?;

        let batch = self.transactions.pending_batch(self.settings.batch_size).await?;

        let mut summary = RunSummary::empty(Utc::now());
        if batch.is_empty() {
            debug!("no pending transactions to reconcile");
            self.persist_summary(&summary).await;
            return Ok(summary);
        }

        info!(count = batch.len(), "reconciling pending ACH transactions");

        let total = batch.len();
        for (idx, tx) in batch.into_iter().enumerate() {
            summary.processed += 1;
            self.reconcile_one(&tx, &mut summary).await;

            if idx + 1 < total && !self.settings.pacing.is_zero() {
                sleep(self.settings.pacing).await;
            }
        }

        info!(
            processed = summary.processed,
            updated = summary.updated,
            errors = summary.errors,
            "reconciliation pass finished"
        );

        self.persist_summary(&summary).await;
        Ok(summary)
    }

    async fn reconcile_one(&self, tx: &Transaction, summary: &mut RunSummary) {
        // The batch query filters these out; a custom store that does not is
        // still handled as "never submitted, nothing to poll".
        let Some(provider_tx_id) = tx.provider_transaction_id.as_deref() else {
            debug!(transaction_id = %tx.id, "transaction has no provider id, skipping");
            return;
        };

        let credentials = match self.resolve_credentials(tx).await {
            Ok(Some(credentials)) => credentials,
            Ok(None) => {
                summary.errors += 1;
                warn!(
                    transaction_id = %tx.id,
                    organization_id = tx.organization_id.as_deref().unwrap_or("-"),
                    "no provider credentials available, skipping"
                );
                return;
            }
            Err(e) => {
                summary.errors += 1;
                error!(transaction_id = %tx.id, error = %e, "credential lookup failed");
                return;
            }
        };

        let body = match self
            .provider
            .fetch_transaction_status(provider_tx_id, &credentials)
            .await
        {
            Ok(body) => body,
            Err(e) => {
                summary.errors += 1;
                warn!(
                    transaction_id = %tx.id,
                    provider_transaction_id = provider_tx_id,
                    error = %e,
                    "provider status fetch failed"
                );
                return;
            }
        };

        let Some(raw_status) = extract_raw_status(&body) else {
            // Not an error: the response simply carries nothing actionable.
            debug!(
                transaction_id = %tx.id,
                provider_transaction_id = provider_tx_id,
                "provider response carries no recognizable status field"
            );
            return;
        };

        let mapped = map_status(&raw_status);
        if mapped == tx.status {
            debug!(
                transaction_id = %tx.id,
                status = %mapped,
                "status unchanged, nothing to do"
            );
            return;
        }

        if let Err(e) = self.transactions.apply_status(tx.id, mapped, &body).await {
            summary.errors += 1;
            error!(transaction_id = %tx.id, error = %e, "failed to persist status update");
            return;
        }
        summary.updated += 1;
        info!(
            transaction_id = %tx.id,
            from = %tx.status,
            to = %mapped,
            raw_status = %raw_status,
            "transaction status updated"
        );

        // The transaction write above stands even if the order sync fails;
        // the two stores are allowed to drift until the next status change.
        if let Err(e) = self
            .orders
            .apply_status(tx.order_reference, mapped, provider_tx_id, &raw_status)
            .await
        {
            summary.errors += 1;
            error!(
                transaction_id = %tx.id,
                order_reference = %tx.order_reference,
                error = %e,
                "order sync failed"
            );
        }
    }

    async fn resolve_credentials(
        &self,
        tx: &Transaction,
    ) -> Result<Option<ProviderCredentials>, StoreError> {
        if let Some(organization_id) = tx.organization_id.as_deref() {
            if let Some(credentials) = self
                .transactions
                .organization_credentials(organization_id)
                .await?
            {
                return Ok(Some(credentials));
            }
        }
        Ok(self.merchant_credentials.clone())
    }

    async fn persist_summary(&self, summary: &RunSummary) {
        if let Err(e) = self.stats.record(summary).await {
            error!(error = %e, "failed to persist run summary");
        }
    }
}

/// Background scheduler. Spawned once at startup, fires a run every
/// `interval` until the shutdown channel flips to true.
pub async fn run_scheduler(
    reconciler: Arc<Reconciler>,
    interval: Duration,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    info!(
        interval_secs = interval.as_secs(),
        "reconciliation scheduler started"
    );

    loop {
        tokio::select! {
            _ = shutdown_rx.changed() => {
                if *shutdown_rx.borrow() {
                    info!("reconciliation scheduler stopping");
                    break;
                }
            }
            _ = sleep(interval) => {
                match reconciler.run().await {
                    Ok(summary) => info!(
                        processed = summary.processed,
                        updated = summary.updated,
                        errors = summary.errors,
                        "scheduled reconciliation finished"
                    ),
                    Err(ReconcileError::AlreadyRunning) => {
                        debug!("previous reconciliation still running, skipping this tick");
                    }
                    Err(e) => error!(error = %e, "scheduled reconciliation failed"),
                }
            }
        }
    }
}
