use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Normalized transaction status. The provider reports a much wider
/// vocabulary; everything is folded into this closed set before it touches
/// the database (see `provider::status`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaymentStatus {
    Pending,
    Processing,
    Completed,
    Failed,
    Refunded,
    Voided,
}

impl PaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Pending => "pending",
            PaymentStatus::Processing => "processing",
            PaymentStatus::Completed => "completed",
            PaymentStatus::Failed => "failed",
            PaymentStatus::Refunded => "refunded",
            PaymentStatus::Voided => "voided",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(PaymentStatus::Pending),
            "processing" => Some(PaymentStatus::Processing),
            "completed" => Some(PaymentStatus::Completed),
            "failed" => Some(PaymentStatus::Failed),
            "refunded" => Some(PaymentStatus::Refunded),
            "voided" => Some(PaymentStatus::Voided),
            _ => None,
        }
    }

    /// Terminal statuses are never polled again; the pending-batch query
    /// only ever selects pending/processing rows.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            PaymentStatus::Completed
                | PaymentStatus::Failed
                | PaymentStatus::Refunded
                | PaymentStatus::Voided
        )
    }
}

impl std::fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One row per ACH sale submitted to the provider. Reconciliation owns
/// `status`, `raw_provider_response` and `updated_at`; everything else is
/// frozen at submission time.
#[derive(Debug, Clone)]
pub struct Transaction {
    pub id: Uuid,
    pub order_reference: Uuid,
    /// Assigned by the provider at submission; rows where this is NULL never
    /// made it to the provider and are excluded from reconciliation.
    pub provider_transaction_id: Option<String>,
    pub organization_id: Option<String>,
    pub pay_token_id: Option<String>,
    pub amount: BigDecimal,
    pub currency: String,
    pub status: PaymentStatus,
    pub raw_provider_response: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Transaction {
    pub fn new(
        order_reference: Uuid,
        amount: BigDecimal,
        currency: String,
        organization_id: Option<String>,
        pay_token_id: Option<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            order_reference,
            provider_transaction_id: None,
            organization_id,
            pay_token_id,
            amount,
            currency,
            status: PaymentStatus::Pending,
            raw_provider_response: None,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Merchant order status, distinct from the transaction status. Mirrors the
/// order system's own lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum OrderStatus {
    Pending,
    OnHold,
    Processing,
    Completed,
    Failed,
    Refunded,
    Cancelled,
}

impl OrderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Pending => "pending",
            OrderStatus::OnHold => "on-hold",
            OrderStatus::Processing => "processing",
            OrderStatus::Completed => "completed",
            OrderStatus::Failed => "failed",
            OrderStatus::Refunded => "refunded",
            OrderStatus::Cancelled => "cancelled",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(OrderStatus::Pending),
            "on-hold" => Some(OrderStatus::OnHold),
            "processing" => Some(OrderStatus::Processing),
            "completed" => Some(OrderStatus::Completed),
            "failed" => Some(OrderStatus::Failed),
            "refunded" => Some(OrderStatus::Refunded),
            "cancelled" => Some(OrderStatus::Cancelled),
            _ => None,
        }
    }

    /// Orders in these states have already collected payment; `mark_paid`
    /// must not fire again for them.
    pub fn is_paid(&self) -> bool {
        matches!(self, OrderStatus::Processing | OrderStatus::Completed)
    }
}

impl std::fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Merchant order record, as seen by the synchronizer.
#[derive(Debug, Clone)]
pub struct Order {
    pub id: Uuid,
    pub status: OrderStatus,
    pub total: BigDecimal,
    pub currency: String,
    pub provider_transaction_id: Option<String>,
    pub paid_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Last reconciliation run. Single slot, overwritten on every run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunSummary {
    pub ran_at: DateTime<Utc>,
    pub processed: i32,
    pub updated: i32,
    pub errors: i32,
}

impl RunSummary {
    pub fn empty(ran_at: DateTime<Utc>) -> Self {
        Self {
            ran_at,
            processed: 0,
            updated: 0,
            errors: 0,
        }
    }

    pub fn summary_line(&self) -> String {
        format!(
            "Processed {} transaction(s): {} updated, {} error(s)",
            self.processed, self.updated, self.errors
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_payment_status_round_trip() {
        for status in [
            PaymentStatus::Pending,
            PaymentStatus::Processing,
            PaymentStatus::Completed,
            PaymentStatus::Failed,
            PaymentStatus::Refunded,
            PaymentStatus::Voided,
        ] {
            assert_eq!(PaymentStatus::from_str(status.as_str()), Some(status));
        }
        assert_eq!(PaymentStatus::from_str("settled"), None);
    }

    #[test]
    fn test_terminal_statuses() {
        assert!(!PaymentStatus::Pending.is_terminal());
        assert!(!PaymentStatus::Processing.is_terminal());
        assert!(PaymentStatus::Completed.is_terminal());
        assert!(PaymentStatus::Failed.is_terminal());
        assert!(PaymentStatus::Refunded.is_terminal());
        assert!(PaymentStatus::Voided.is_terminal());
    }

    #[test]
    fn test_order_status_round_trip() {
        for status in [
            OrderStatus::Pending,
            OrderStatus::OnHold,
            OrderStatus::Processing,
            OrderStatus::Completed,
            OrderStatus::Failed,
            OrderStatus::Refunded,
            OrderStatus::Cancelled,
        ] {
            assert_eq!(OrderStatus::from_str(status.as_str()), Some(status));
        }
    }

    #[test]
    fn test_paid_orders() {
        assert!(OrderStatus::Processing.is_paid());
        assert!(OrderStatus::Completed.is_paid());
        assert!(!OrderStatus::Pending.is_paid());
        assert!(!OrderStatus::OnHold.is_paid());
    }

    #[test]
    fn test_new_transaction_defaults() {
        let tx = Transaction::new(
            Uuid::new_v4(),
            "100.50".parse().unwrap(),
            "USD".to_string(),
            Some("org-1".to_string()),
            Some("tok-1".to_string()),
        );
        assert_eq!(tx.status, PaymentStatus::Pending);
        assert!(tx.provider_transaction_id.is_none());
        assert!(tx.raw_provider_response.is_none());
    }

    #[test]
    fn test_summary_line() {
        let summary = RunSummary {
            ran_at: Utc::now(),
            processed: 5,
            updated: 3,
            errors: 1,
        };
        assert_eq!(
            summary.summary_line(),
            "Processed 5 transaction(s): 3 updated, 1 error(s)"
        );
    }
}
