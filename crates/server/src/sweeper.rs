//! Times out orders that were never paid.

use std::{sync::Arc, time::Duration};

use chrono::{DateTime, Utc};
use common::ErrorKind;
use domain::OrderStatus;
use tokio::{sync::watch, task::JoinHandle};
use tracing::{debug, info, warn};

use crate::{OrderApi, error::ApiError};

/// Orders examined per sweep.
const SWEEP_BATCH: usize = 100;

/// Periodically cancels PENDING_PAYMENT orders older than the payment window.
pub struct PaymentTimeoutSweeper {
    orders: Arc<OrderApi>,
    timeout: Duration,
    interval: Duration,
}

impl PaymentTimeoutSweeper {
    pub fn new(orders: Arc<OrderApi>, timeout: Duration, interval: Duration) -> Self {
        Self {
            orders,
            timeout,
            interval,
        }
    }

    /// Runs one sweep. Returns how many orders were timed out.
    pub async fn run_once(&self) -> Result<usize, ApiError> {
        let timeout = chrono::Duration::from_std(self.timeout).unwrap_or(chrono::Duration::MAX);
        let cutoff = Utc::now()
            .checked_sub_signed(timeout)
            .unwrap_or(DateTime::<Utc>::MIN_UTC);
        let expired = self.orders.find_expired_unpaid(cutoff, SWEEP_BATCH).await?;

        let mut timed_out = 0;
        for order in expired {
            match self.orders.handle_payment_timeout(order.id).await {
                Ok(order) if order.status == OrderStatus::Cancelled => timed_out += 1,
                Ok(_) => {}
                Err(e) if e.kind() == ErrorKind::Conflict => {
                    debug!(order_id = %order.id, "order changed during sweep, skipping");
                }
                Err(e) => {
                    warn!(order_id = %order.id, error = %e, "payment timeout failed");
                }
            }
        }

        if timed_out > 0 {
            info!(timed_out, %cutoff, "timed out unpaid orders");
        }
        Ok(timed_out)
    }

    /// Spawns the sweep loop; it exits when `shutdown` fires.
    pub fn spawn(self, mut shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(self.interval);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        if let Err(e) = self.run_once().await {
                            warn!(error = %e, "payment timeout sweep failed");
                        }
                    }
                    _ = shutdown.changed() => break,
                }
                if *shutdown.borrow() {
                    break;
                }
            }
            debug!("payment timeout sweeper stopped");
        })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use common::UserId;
    use domain::{
        Address, AddressValidator, CreateOrder, InMemoryAddressValidator, InMemoryOrderStore,
        OrderService, OrderStore, Product,
    };
    use outbox::InMemoryOutboxStore;

    use super::*;

    async fn orders() -> (Arc<OrderApi>, CreateOrder) {
        let store = InMemoryOrderStore::new(InMemoryOutboxStore::new());
        let addresses = InMemoryAddressValidator::new();
        let product = Product::new("Spring water 18L", 1500, 10);
        store.upsert_product(product.clone()).await;
        let user_id = UserId::new();
        let address = Address::new(user_id, "Zhejiang", "Hangzhou", "Xihu", "8 Lake Rd");
        addresses.add_address(address.clone()).await;

        let store: Arc<dyn OrderStore> = Arc::new(store);
        let addresses: Arc<dyn AddressValidator> = Arc::new(addresses);
        (
            Arc::new(OrderService::new(store, addresses)),
            CreateOrder::new(user_id, product.id, address.id, 1),
        )
    }

    #[tokio::test]
    async fn zero_timeout_cancels_unpaid_orders() {
        let (orders, cmd) = orders().await;
        let unpaid = orders.create_order(cmd.clone()).await.unwrap();
        let paid = orders.create_order(cmd).await.unwrap();
        orders.handle_payment_success(paid.id, "txn-1").await.unwrap();

        let sweeper = PaymentTimeoutSweeper::new(orders.clone(), Duration::ZERO, Duration::from_secs(60));
        assert_eq!(sweeper.run_once().await.unwrap(), 1);

        assert_eq!(
            orders.get_order(unpaid.id).await.unwrap().status,
            OrderStatus::Cancelled
        );
        assert_eq!(
            orders.get_order(paid.id).await.unwrap().status,
            OrderStatus::PendingDelivery
        );
        assert_eq!(sweeper.run_once().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn recent_orders_are_left_alone() {
        let (orders, cmd) = orders().await;
        let order = orders.create_order(cmd).await.unwrap();

        let sweeper = PaymentTimeoutSweeper::new(
            orders.clone(),
            Duration::from_secs(1800),
            Duration::from_secs(60),
        );
        assert_eq!(sweeper.run_once().await.unwrap(), 0);
        assert_eq!(
            orders.get_order(order.id).await.unwrap().status,
            OrderStatus::PendingPayment
        );
    }

    #[tokio::test]
    async fn timeout_beyond_the_calendar_matches_nothing() {
        let (orders, cmd) = orders().await;
        orders.create_order(cmd).await.unwrap();

        let sweeper = PaymentTimeoutSweeper::new(orders, Duration::MAX, Duration::from_secs(60));
        assert_eq!(sweeper.run_once().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn spawned_sweeper_stops_on_shutdown() {
        let (orders, _) = orders().await;
        let (tx, rx) = watch::channel(false);
        let handle = PaymentTimeoutSweeper::new(orders, Duration::ZERO, Duration::from_millis(10))
            .spawn(rx);
        tx.send(true).unwrap();
        handle.await.unwrap();
    }
}
