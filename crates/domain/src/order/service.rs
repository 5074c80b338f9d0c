//! Order service implementing the order operations.

use chrono::{DateTime, Utc};
use common::OrderId;

use crate::{
    address::AddressValidator,
    error::DomainError,
    store::{OrderChange, OrderStore, OrderWrite, StockAdjustment},
};

use super::{
    CreateOrder, Order, OrderError, OrderEvent, OrderStatus, StartDelivery, generate_order_number,
};

type Result<T> = std::result::Result<T, DomainError>;

/// Service for managing orders.
///
/// Every mutating operation commits at most one stock adjustment, one
/// order write and exactly one outbox event as a single unit.
pub struct OrderService<S: OrderStore, A: AddressValidator> {
    store: S,
    addresses: A,
}

impl<S: OrderStore, A: AddressValidator> OrderService<S, A> {
    /// Creates a new order service.
    pub fn new(store: S, addresses: A) -> Self {
        Self { store, addresses }
    }

    /// Returns a reference to the underlying store.
    pub fn store(&self) -> &S {
        &self.store
    }

    /// Places an order, reserving stock.
    #[tracing::instrument(skip(self))]
    pub async fn create_order(&self, cmd: CreateOrder) -> Result<Order> {
        if cmd.quantity == 0 {
            return Err(OrderError::InvalidQuantity {
                quantity: cmd.quantity,
            }
            .into());
        }

        let product = self
            .store
            .get_product(cmd.product_id)
            .await?
            .ok_or(OrderError::ProductNotFound(cmd.product_id))?;

        if product.stock < cmd.quantity {
            return Err(OrderError::InsufficientStock {
                product_id: product.id,
                requested: cmd.quantity,
                available: product.stock,
            }
            .into());
        }

        let address = self
            .addresses
            .find_address(cmd.address_id)
            .await?
            .ok_or(OrderError::AddressNotFound(cmd.address_id))?;

        if address.user_id != cmd.user_id {
            return Err(OrderError::AddressNotOwned {
                address_id: address.id,
                user_id: cmd.user_id,
            }
            .into());
        }

        if !self.addresses.is_serviceable(&address).await? {
            return Err(OrderError::AddressNotServiceable(address.id).into());
        }

        let amount_cents = product.amount_for(cmd.quantity)?;
        let order = Order::place(
            generate_order_number(Utc::now()),
            cmd.user_id,
            product.id,
            address.id,
            cmd.quantity,
            amount_cents,
        );

        let event = OrderEvent::created(&order);
        let stock = StockAdjustment::Decrement {
            product_id: product.id,
            quantity: cmd.quantity,
        };
        let order = self
            .commit(Some(stock), OrderWrite::Insert(order), &event)
            .await?;

        metrics::counter!("orders_created_total").increment(1);
        tracing::info!(
            order_id = %order.id,
            order_number = %order.order_number,
            amount_cents = order.amount_cents,
            "order created"
        );
        Ok(order)
    }

    /// Cancels an order that has not started delivery, restoring its stock.
    #[tracing::instrument(skip(self))]
    pub async fn cancel_order(&self, order_id: OrderId) -> Result<Order> {
        let current = self.load(order_id).await?;
        let mut order = current.clone();
        let should_refund = order.cancel(Utc::now())?;

        let event = OrderEvent::cancelled(&order, should_refund);
        let order = self
            .commit(Some(restore(&order)), update(order, &current), &event)
            .await?;

        tracing::info!(%order_id, should_refund, "order cancelled");
        Ok(order)
    }

    /// Records a successful payment.
    #[tracing::instrument(skip(self))]
    pub async fn handle_payment_success(
        &self,
        order_id: OrderId,
        transaction_id: &str,
    ) -> Result<Order> {
        let current = self.load(order_id).await?;
        let mut order = current.clone();
        let paid_at = Utc::now();
        order.pay(transaction_id, paid_at)?;

        let event = OrderEvent::paid(&order, transaction_id, paid_at);
        let order = self.commit(None, update(order, &current), &event).await?;

        tracing::info!(%order_id, "payment recorded");
        Ok(order)
    }

    /// Cancels an unpaid order whose payment window elapsed.
    ///
    /// Does nothing and returns the order unchanged unless it is still
    /// PENDING_PAYMENT, so repeated timeouts are harmless.
    #[tracing::instrument(skip(self))]
    pub async fn handle_payment_timeout(&self, order_id: OrderId) -> Result<Order> {
        let current = self.load(order_id).await?;
        if current.status != OrderStatus::PendingPayment {
            tracing::debug!(%order_id, status = %current.status, "payment timeout ignored");
            return Ok(current);
        }

        let mut order = current.clone();
        order.cancel(Utc::now())?;

        let event = OrderEvent::payment_timed_out(&order);
        let order = self
            .commit(Some(restore(&order)), update(order, &current), &event)
            .await?;

        tracing::info!(%order_id, "order cancelled after payment timeout");
        Ok(order)
    }

    /// Hands a paid order to a courier.
    #[tracing::instrument(skip(self))]
    pub async fn start_delivery(&self, cmd: StartDelivery) -> Result<Order> {
        let current = self.load(cmd.order_id).await?;
        let mut order = current.clone();
        order.start_delivery(cmd.delivery_worker_id, Utc::now())?;

        let event = OrderEvent::assigned(&order, cmd.delivery_worker_id);
        self.commit(None, update(order, &current), &event).await
    }

    /// Marks an order delivered.
    #[tracing::instrument(skip(self))]
    pub async fn complete_delivery(&self, order_id: OrderId) -> Result<Order> {
        let current = self.load(order_id).await?;
        let mut order = current.clone();
        let completed_at = Utc::now();
        order.complete_delivery(completed_at)?;

        let event = OrderEvent::delivered(&order, completed_at);
        self.commit(None, update(order, &current), &event).await
    }

    /// Sets an order's status without checking the state machine.
    ///
    /// For administrative tooling only. Stock is left untouched.
    #[tracing::instrument(skip(self))]
    pub async fn update_order_status(&self, order_id: OrderId, status: OrderStatus) -> Result<Order> {
        let current = self.load(order_id).await?;
        let mut order = current.clone();
        let previous = order.override_status(status, Utc::now());

        if !previous.can_transition_to(status) {
            tracing::warn!(
                %order_id,
                from = %previous,
                to = %status,
                "order status overridden outside the state machine"
            );
        }

        let event = OrderEvent::status_overridden(&order, previous);
        self.commit(None, update(order, &current), &event).await
    }

    /// Loads an order by ID.
    pub async fn get_order(&self, order_id: OrderId) -> Result<Order> {
        self.load(order_id).await
    }

    /// Loads an order by its order number.
    pub async fn get_order_by_number(&self, order_number: &str) -> Result<Order> {
        self.store
            .get_order_by_number(order_number)
            .await?
            .ok_or_else(|| OrderError::NumberNotFound(order_number.to_string()).into())
    }

    /// Lists unpaid orders created before `older_than`.
    pub async fn find_expired_unpaid(
        &self,
        older_than: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<Order>> {
        Ok(self.store.find_expired_unpaid(older_than, limit).await?)
    }

    async fn load(&self, order_id: OrderId) -> Result<Order> {
        self.store
            .get_order(order_id)
            .await?
            .ok_or_else(|| OrderError::NotFound(order_id).into())
    }

    async fn commit(
        &self,
        stock: Option<StockAdjustment>,
        write: OrderWrite,
        event: &OrderEvent,
    ) -> Result<Order> {
        let change = OrderChange {
            stock,
            write,
            event: event.to_outbox()?,
        };
        Ok(self.store.commit(change).await?)
    }
}

fn update(order: Order, current: &Order) -> OrderWrite {
    OrderWrite::Update {
        order,
        expected_version: current.version,
    }
}

fn restore(order: &Order) -> StockAdjustment {
    StockAdjustment::Restore {
        product_id: order.product_id,
        quantity: order.quantity,
    }
}
