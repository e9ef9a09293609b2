//! Postgres implementations of the persistence ports.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::PgPool;
use uuid::Uuid;

use crate::db::models::{PaymentStatus, RunSummary, Transaction};
use crate::provider::ProviderCredentials;

use super::{RunStatsStore, StoreError, TransactionStore};

/// Postgres-backed transaction store.
#[derive(Clone)]
pub struct PgTransactionStore {
    pool: PgPool,
}

impl PgTransactionStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl TransactionStore for PgTransactionStore {
    async fn pending_batch(&self, limit: i64) -> Result<Vec<Transaction>, StoreError> {
        let rows = sqlx::query_as::<_, TransactionRow>(
            r#"
            SELECT id, order_reference, provider_transaction_id, organization_id,
                   pay_token_id, amount, currency, status, raw_provider_response,
                   created_at, updated_at
            FROM transactions
            WHERE status IN ('pending', 'processing')
              AND provider_transaction_id IS NOT NULL
            ORDER BY created_at ASC
            LIMIT $1
            "#,
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(TransactionRow::into_domain).collect()
    }

    async fn apply_status(
        &self,
        id: Uuid,
        status: PaymentStatus,
        raw_response: &Value,
    ) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            UPDATE transactions
            SET status = $2, raw_provider_response = $3, updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(status.as_str())
        .bind(raw_response)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn organization_credentials(
        &self,
        organization_id: &str,
    ) -> Result<Option<ProviderCredentials>, StoreError> {
        let row: Option<(String, String)> = sqlx::query_as(
            "SELECT api_key, app_id FROM payer_credentials WHERE organization_id = $1",
        )
        .bind(organization_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|(api_key, app_id)| ProviderCredentials { api_key, app_id }))
    }
}

/// Internal row type for SQLx. Not exposed outside the adapter.
#[derive(Debug, sqlx::FromRow)]
struct TransactionRow {
    id: Uuid,
    order_reference: Uuid,
    provider_transaction_id: Option<String>,
    organization_id: Option<String>,
    pay_token_id: Option<String>,
    amount: bigdecimal::BigDecimal,
    currency: String,
    status: String,
    raw_provider_response: Option<Value>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TransactionRow {
    fn into_domain(self) -> Result<Transaction, StoreError> {
        let status = PaymentStatus::from_str(&self.status).ok_or(StoreError::Decode {
            id: self.id,
            reason: format!("unknown transaction status {:?}", self.status),
        })?;

        Ok(Transaction {
            id: self.id,
            order_reference: self.order_reference,
            provider_transaction_id: self.provider_transaction_id,
            organization_id: self.organization_id,
            pay_token_id: self.pay_token_id,
            amount: self.amount,
            currency: self.currency,
            status,
            raw_provider_response: self.raw_provider_response,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

const RUN_SUMMARY_SLOT: &str = "last";

/// Postgres-backed last-run recorder. One named slot, upserted.
#[derive(Clone)]
pub struct PgRunStatsStore {
    pool: PgPool,
}

impl PgRunStatsStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl RunStatsStore for PgRunStatsStore {
    async fn record(&self, summary: &RunSummary) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO reconciliation_runs (slot, ran_at, processed, updated, errors)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (slot) DO UPDATE
            SET ran_at = EXCLUDED.ran_at,
                processed = EXCLUDED.processed,
                updated = EXCLUDED.updated,
                errors = EXCLUDED.errors
            "#,
        )
        .bind(RUN_SUMMARY_SLOT)
        .bind(summary.ran_at)
        .bind(summary.processed)
        .bind(summary.updated)
        .bind(summary.errors)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn last(&self) -> Result<Option<RunSummary>, StoreError> {
        let row: Option<(DateTime<Utc>, i32, i32, i32)> = sqlx::query_as(
            "SELECT ran_at, processed, updated, errors FROM reconciliation_runs WHERE slot = $1",
        )
        .bind(RUN_SUMMARY_SLOT)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|(ran_at, processed, updated, errors)| RunSummary {
            ran_at,
            processed,
            updated,
            errors,
        }))
    }
}
