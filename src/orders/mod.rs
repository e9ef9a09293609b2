//! Merchant order synchronization.
//!
//! Transaction status and order status are separate lifecycles: the
//! transaction row tracks what the provider says, the order tracks what the
//! merchant's fulfillment pipeline does with it. The synchronizer pushes a
//! freshly mapped transaction status into the order, guarded so that
//! repeated application is harmless.

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tracing::{debug, info};
use uuid::Uuid;

use crate::db::models::{Order, OrderStatus, PaymentStatus};
use crate::store::StoreError;

pub mod postgres;

pub use postgres::PgOrderStore;

#[derive(Error, Debug)]
pub enum SyncError {
    #[error("order {0} not found")]
    OrderNotFound(Uuid),
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Port onto the merchant's order system.
#[async_trait]
pub trait OrderStore: Send + Sync {
    async fn find(&self, reference: Uuid) -> Result<Option<Order>, StoreError>;

    /// Records payment: attaches the provider transaction id, stamps
    /// `paid_at` and moves the order into fulfillment.
    async fn mark_paid(&self, id: Uuid, provider_transaction_id: &str) -> Result<(), StoreError>;

    async fn mark_failed(&self, id: Uuid) -> Result<(), StoreError>;

    async fn mark_refunded(&self, id: Uuid) -> Result<(), StoreError>;

    async fn mark_cancelled(&self, id: Uuid) -> Result<(), StoreError>;

    async fn append_note(&self, id: Uuid, note: &str) -> Result<(), StoreError>;
}

/// Applies a mapped transaction status to the referenced order, enforcing
/// the transition guards.
pub struct OrderSynchronizer {
    store: Arc<dyn OrderStore>,
}

impl OrderSynchronizer {
    pub fn new(store: Arc<dyn OrderStore>) -> Self {
        Self { store }
    }

    pub async fn apply_status(
        &self,
        order_reference: Uuid,
        status: PaymentStatus,
        provider_transaction_id: &str,
        raw_status: &str,
    ) -> Result<(), SyncError> {
        let order = self
            .store
            .find(order_reference)
            .await?
            .ok_or(SyncError::OrderNotFound(order_reference))?;

        match status {
            PaymentStatus::Completed => {
                if order.status.is_paid() {
                    debug!(order_id = %order.id, status = %order.status,
                        "order already paid, leaving untouched");
                } else {
                    self.store.mark_paid(order.id, provider_transaction_id).await?;
                    self.store
                        .append_note(
                            order.id,
                            &format!(
                                "ACH payment settled. Provider transaction {} reported \"{}\".",
                                provider_transaction_id, raw_status
                            ),
                        )
                        .await?;
                    info!(order_id = %order.id, provider_transaction_id, "order marked paid");
                }
            }
            PaymentStatus::Failed => {
                if order.status == OrderStatus::Failed {
                    debug!(order_id = %order.id, "order already failed, leaving untouched");
                } else {
                    self.store.mark_failed(order.id).await?;
                    self.store
                        .append_note(
                            order.id,
                            &format!(
                                "ACH payment failed. Provider transaction {} reported \"{}\".",
                                provider_transaction_id, raw_status
                            ),
                        )
                        .await?;
                    info!(order_id = %order.id, provider_transaction_id, "order marked failed");
                }
            }
            PaymentStatus::Refunded => {
                if order.status == OrderStatus::Refunded {
                    debug!(order_id = %order.id, "order already refunded, leaving untouched");
                } else {
                    self.store.mark_refunded(order.id).await?;
                    self.store
                        .append_note(
                            order.id,
                            &format!(
                                "ACH payment refunded. Provider transaction {} reported \"{}\".",
                                provider_transaction_id, raw_status
                            ),
                        )
                        .await?;
                    info!(order_id = %order.id, provider_transaction_id, "order marked refunded");
                }
            }
            PaymentStatus::Voided => {
                if order.status == OrderStatus::Cancelled {
                    debug!(order_id = %order.id, "order already cancelled, leaving untouched");
                } else {
                    self.store.mark_cancelled(order.id).await?;
                    self.store
                        .append_note(
                            order.id,
                            &format!(
                                "ACH payment voided. Provider transaction {} reported \"{}\".",
                                provider_transaction_id, raw_status
                            ),
                        )
                        .await?;
                    info!(order_id = %order.id, provider_transaction_id, "order cancelled");
                }
            }
            PaymentStatus::Pending | PaymentStatus::Processing => {
                self.store
                    .append_note(
                        order.id,
                        &format!(
                            "ACH payment {} at the provider (transaction {}).",
                            status, provider_transaction_id
                        ),
                    )
                    .await?;
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::models::OrderStatus;
    use bigdecimal::BigDecimal;
    use chrono::Utc;
    use std::collections::HashMap;
    use std::sync::Mutex;

    #[derive(Default)]
    struct FakeOrderStore {
        orders: Mutex<HashMap<Uuid, Order>>,
        paid_calls: Mutex<Vec<(Uuid, String)>>,
        notes: Mutex<Vec<(Uuid, String)>>,
    }

    impl FakeOrderStore {
        fn with_order(status: OrderStatus) -> (Self, Uuid) {
            let store = Self::default();
            let id = Uuid::new_v4();
            let order = Order {
                id,
                status,
                total: BigDecimal::from(100),
                currency: "USD".to_string(),
                provider_transaction_id: None,
                paid_at: None,
                created_at: Utc::now(),
                updated_at: Utc::now(),
            };
            store.orders.lock().unwrap().insert(id, order);
            (store, id)
        }

        fn status_of(&self, id: Uuid) -> OrderStatus {
            self.orders.lock().unwrap()[&id].status
        }

        fn paid_count(&self) -> usize {
            self.paid_calls.lock().unwrap().len()
        }

        fn note_count(&self) -> usize {
            self.notes.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl OrderStore for FakeOrderStore {
        async fn find(&self, reference: Uuid) -> Result<Option<Order>, StoreError> {
            Ok(self.orders.lock().unwrap().get(&reference).cloned())
        }

        async fn mark_paid(
            &self,
            id: Uuid,
            provider_transaction_id: &str,
        ) -> Result<(), StoreError> {
            self.paid_calls
                .lock()
                .unwrap()
                .push((id, provider_transaction_id.to_string()));
            let mut orders = self.orders.lock().unwrap();
            let order = orders.get_mut(&id).unwrap();
            order.status = OrderStatus::Processing;
            order.provider_transaction_id = Some(provider_transaction_id.to_string());
            order.paid_at = Some(Utc::now());
            Ok(())
        }

        async fn mark_failed(&self, id: Uuid) -> Result<(), StoreError> {
            self.orders.lock().unwrap().get_mut(&id).unwrap().status = OrderStatus::Failed;
            Ok(())
        }

        async fn mark_refunded(&self, id: Uuid) -> Result<(), StoreError> {
            self.orders.lock().unwrap().get_mut(&id).unwrap().status = OrderStatus::Refunded;
            Ok(())
        }

        async fn mark_cancelled(&self, id: Uuid) -> Result<(), StoreError> {
            self.orders.lock().unwrap().get_mut(&id).unwrap().status = OrderStatus::Cancelled;
            Ok(())
        }

        async fn append_note(&self, id: Uuid, note: &str) -> Result<(), StoreError> {
            self.notes.lock().unwrap().push((id, note.to_string()));
            Ok(())
        }
    }

    fn synchronizer(store: FakeOrderStore) -> (OrderSynchronizer, Arc<FakeOrderStore>) {
        let store = Arc::new(store);
        (OrderSynchronizer::new(store.clone()), store)
    }

    #[tokio::test]
    async fn test_completed_marks_order_paid_once() {
        let (store, id) = FakeOrderStore::with_order(OrderStatus::OnHold);
        let (sync, store) = synchronizer(store);

        sync.apply_status(id, PaymentStatus::Completed, "tx-1", "settled")
            .await
            .unwrap();

        assert_eq!(store.status_of(id), OrderStatus::Processing);
        assert_eq!(store.paid_count(), 1);
        assert_eq!(store.note_count(), 1);

        // A duplicate application must not fire mark_paid again.
        sync.apply_status(id, PaymentStatus::Completed, "tx-1", "settled")
            .await
            .unwrap();
        assert_eq!(store.paid_count(), 1);
        assert_eq!(store.note_count(), 1);
    }

    #[tokio::test]
    async fn test_completed_skips_fulfilled_order() {
        let (store, id) = FakeOrderStore::with_order(OrderStatus::Completed);
        let (sync, store) = synchronizer(store);

        sync.apply_status(id, PaymentStatus::Completed, "tx-1", "approved")
            .await
            .unwrap();

        assert_eq!(store.status_of(id), OrderStatus::Completed);
        assert_eq!(store.paid_count(), 0);
    }

    #[tokio::test]
    async fn test_failed_is_idempotent() {
        let (store, id) = FakeOrderStore::with_order(OrderStatus::OnHold);
        let (sync, store) = synchronizer(store);

        sync.apply_status(id, PaymentStatus::Failed, "tx-1", "returned")
            .await
            .unwrap();
        assert_eq!(store.status_of(id), OrderStatus::Failed);
        assert_eq!(store.note_count(), 1);

        sync.apply_status(id, PaymentStatus::Failed, "tx-1", "returned")
            .await
            .unwrap();
        assert_eq!(store.note_count(), 1);
    }

    #[tokio::test]
    async fn test_refunded_and_voided_transitions() {
        let (store, id) = FakeOrderStore::with_order(OrderStatus::Processing);
        let (sync, store) = synchronizer(store);

        sync.apply_status(id, PaymentStatus::Refunded, "tx-1", "reversed")
            .await
            .unwrap();
        assert_eq!(store.status_of(id), OrderStatus::Refunded);

        let (store2, id2) = FakeOrderStore::with_order(OrderStatus::OnHold);
        let (sync2, store2) = synchronizer(store2);
        sync2
            .apply_status(id2, PaymentStatus::Voided, "tx-2", "cancelled")
            .await
            .unwrap();
        assert_eq!(store2.status_of(id2), OrderStatus::Cancelled);
    }

    #[tokio::test]
    async fn test_pending_appends_note_without_state_change() {
        let (store, id) = FakeOrderStore::with_order(OrderStatus::OnHold);
        let (sync, store) = synchronizer(store);

        sync.apply_status(id, PaymentStatus::Processing, "tx-1", "in_progress")
            .await
            .unwrap();

        assert_eq!(store.status_of(id), OrderStatus::OnHold);
        assert_eq!(store.paid_count(), 0);
        assert_eq!(store.note_count(), 1);
    }

    #[tokio::test]
    async fn test_missing_order_is_an_error() {
        let (store, _) = FakeOrderStore::with_order(OrderStatus::OnHold);
        let (sync, _) = synchronizer(store);

        let missing = Uuid::new_v4();
        let result = sync
            .apply_status(missing, PaymentStatus::Completed, "tx-1", "settled")
            .await;

        assert!(matches!(result, Err(SyncError::OrderNotFound(id)) if id == missing));
    }
}
