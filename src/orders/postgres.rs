//! Postgres implementation of the order-system port.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use crate::db::models::{Order, OrderStatus};
use crate::store::StoreError;

use super::OrderStore;

#[derive(Clone)]
pub struct PgOrderStore {
    pool: PgPool,
}

impl PgOrderStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl OrderStore for PgOrderStore {
    async fn find(&self, reference: Uuid) -> Result<Option<Order>, StoreError> {
        let row = sqlx::query_as::<_, OrderRow>(
            r#"
            SELECT id, status, total, currency, provider_transaction_id,
                   paid_at, created_at, updated_at
            FROM orders
            WHERE id = $1
            "#,
        )
        .bind(reference)
        .fetch_optional(&self.pool)
        .await?;

        row.map(OrderRow::into_domain).transpose()
    }

    async fn mark_paid(&self, id: Uuid, provider_transaction_id: &str) -> Result<(), StoreError> {
        // The status guard is repeated here so that two racing runs cannot
        // both record payment.
        sqlx::query(
            r#"
            UPDATE orders
            SET status = 'processing', provider_transaction_id = $2,
                paid_at = NOW(), updated_at = NOW()
            WHERE id = $1 AND status NOT IN ('processing', 'completed')
            "#,
        )
        .bind(id)
        .bind(provider_transaction_id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn mark_failed(&self, id: Uuid) -> Result<(), StoreError> {
        sqlx::query(
            "UPDATE orders SET status = 'failed', updated_at = NOW() \
             WHERE id = $1 AND status <> 'failed'",
        )
        .bind(id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn mark_refunded(&self, id: Uuid) -> Result<(), StoreError> {
        sqlx::query(
            "UPDATE orders SET status = 'refunded', updated_at = NOW() \
             WHERE id = $1 AND status <> 'refunded'",
        )
        .bind(id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn mark_cancelled(&self, id: Uuid) -> Result<(), StoreError> {
        sqlx::query(
            "UPDATE orders SET status = 'cancelled', updated_at = NOW() \
             WHERE id = $1 AND status <> 'cancelled'",
        )
        .bind(id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn append_note(&self, id: Uuid, note: &str) -> Result<(), StoreError> {
        sqlx::query("INSERT INTO order_notes (id, order_id, note) VALUES ($1, $2, $3)")
            .bind(Uuid::new_v4())
            .bind(id)
            .bind(note)
            .execute(&self.pool)
            .await?;

        Ok(())
    }
}

#[derive(Debug, sqlx::FromRow)]
struct OrderRow {
    id: Uuid,
    status: String,
    total: bigdecimal::BigDecimal,
    currency: String,
    provider_transaction_id: Option<String>,
    paid_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl OrderRow {
    fn into_domain(self) -> Result<Order, StoreError> {
        let status = OrderStatus::from_str(&self.status).ok_or(StoreError::Decode {
            id: self.id,
            reason: format!("unknown order status {:?}", self.status),
        })?;

        Ok(Order {
            id: self.id,
            status,
            total: self.total,
            currency: self.currency,
            provider_transaction_id: self.provider_transaction_id,
            paid_at: self.paid_at,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}
