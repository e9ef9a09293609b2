//! Persistence ports. Implementations live in `postgres`; the runner only
//! depends on the traits.

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;
use uuid::Uuid;

use crate::db::models::{PaymentStatus, RunSummary, Transaction};
use crate::provider::ProviderCredentials;

pub mod postgres;

pub use postgres::{PgRunStatsStore, PgTransactionStore};

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("corrupt record {id}: {reason}")]
    Decode { id: Uuid, reason: String },
}

/// Owner of transaction rows. Reconciliation reads a bounded pending batch
/// and writes back status changes one row at a time.
#[async_trait]
pub trait TransactionStore: Send + Sync {
    /// Up to `limit` rows in pending/processing, oldest first, that carry a
    /// provider transaction id. Terminal rows are never returned, which is
    /// what keeps terminal statuses final.
    async fn pending_batch(&self, limit: i64) -> Result<Vec<Transaction>, StoreError>;

    /// Writes the new status plus the raw provider payload and refreshes
    /// `updated_at`. Single-row scope; no batch transaction.
    async fn apply_status(
        &self,
        id: Uuid,
        status: PaymentStatus,
        raw_response: &Value,
    ) -> Result<(), StoreError>;

    /// The payer organization's own API credential pair, if one is on file.
    async fn organization_credentials(
        &self,
        organization_id: &str,
    ) -> Result<Option<ProviderCredentials>, StoreError>;
}

/// Durable record of the last reconciliation run.
#[async_trait]
pub trait RunStatsStore: Send + Sync {
    /// Overwrites the single last-run slot.
    async fn record(&self, summary: &RunSummary) -> Result<(), StoreError>;

    /// Last persisted summary, `None` before the first run.
    async fn last(&self) -> Result<Option<RunSummary>, StoreError>;
}
