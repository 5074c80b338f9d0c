//! Turns order events into user notifications.

use std::{collections::BTreeMap, sync::Arc};

use async_trait::async_trait;
use dispatcher::{EventHandler, HandlerError};
use domain::OrderEvent;
use outbox::{EventType, OutboxEvent};
use tracing::{debug, warn};

use crate::{
    MessageType, NotificationError, NotificationService, RecipientDirectory, SendRequest,
};

/// Page opened when the user taps an order notification.
const ORDER_DETAIL_PAGE: &str = "pages/order/detail";

/// Dispatcher handler that notifies the ordering user.
///
/// Redelivery is harmless: a record keyed by `(event id, message type)` is
/// looked up first and its existence ends the attempt. Once that record is
/// persisted, delivery belongs to the retry scan, so provider failures do
/// not fail the dispatch.
pub struct OrderNotificationHandler {
    service: Arc<NotificationService>,
    directory: Arc<dyn RecipientDirectory>,
}

impl OrderNotificationHandler {
    /// Event types this handler is registered for.
    pub const EVENT_TYPES: [EventType; 6] = [
        EventType::OrderCreated,
        EventType::OrderPaid,
        EventType::OrderCancelled,
        EventType::PaymentTimeout,
        EventType::OrderAssigned,
        EventType::OrderDelivered,
    ];

    pub fn new(service: Arc<NotificationService>, directory: Arc<dyn RecipientDirectory>) -> Self {
        Self { service, directory }
    }
}

/// Message type and template fields for an order event.
fn render(event: &OrderEvent) -> Option<(MessageType, BTreeMap<String, String>)> {
    let mut fields = BTreeMap::new();
    fields.insert("order_number".to_string(), event.order_number().to_string());

    let message_type = match event {
        OrderEvent::Created(data) => {
            fields.insert("amount".into(), format_amount(data.amount_cents));
            fields.insert("quantity".into(), data.quantity.to_string());
            MessageType::OrderCreated
        }
        OrderEvent::Paid(data) => {
            fields.insert("amount".into(), format_amount(data.amount_cents));
            fields.insert("time".into(), data.paid_at.format("%Y-%m-%d %H:%M").to_string());
            MessageType::OrderPaid
        }
        OrderEvent::Cancelled(data) => {
            fields.insert("amount".into(), format_amount(data.amount_cents));
            let note = if data.should_refund {
                "Refund in progress"
            } else {
                "Order cancelled"
            };
            fields.insert("note".into(), note.into());
            MessageType::OrderCancelled
        }
        OrderEvent::PaymentTimedOut(data) => {
            fields.insert("amount".into(), format_amount(data.amount_cents));
            fields.insert("note".into(), "Payment window expired".into());
            MessageType::PaymentTimeout
        }
        OrderEvent::Assigned(_) => {
            fields.insert("note".into(), "Your order is on its way".into());
            MessageType::DeliveryAssigned
        }
        OrderEvent::Delivered(data) => {
            fields.insert(
                "time".into(),
                data.completed_at.format("%Y-%m-%d %H:%M").to_string(),
            );
            MessageType::OrderDelivered
        }
        OrderEvent::StatusOverridden(_) => return None,
    };
    Some((message_type, fields))
}

fn format_amount(cents: i64) -> String {
    let sign = if cents < 0 { "-" } else { "" };
    let cents = cents.unsigned_abs();
    format!("{sign}{}.{:02}", cents / 100, cents % 100)
}

fn to_handler_error(e: NotificationError) -> HandlerError {
    if e.kind().is_retryable() {
        HandlerError::transient(e)
    } else {
        HandlerError::permanent(e)
    }
}

#[async_trait]
impl EventHandler for OrderNotificationHandler {
    fn name(&self) -> &'static str {
        "order_notification"
    }

    async fn handle(&self, event: &OutboxEvent) -> Result<(), HandlerError> {
        let event_type = event.kind().map_err(HandlerError::permanent)?;
        let Some(order_event) = OrderEvent::decode(event_type, &event.payload)? else {
            return Ok(());
        };
        let Some((message_type, fields)) = render(&order_event) else {
            return Ok(());
        };

        let user_id = order_event.user_id();
        let Some(recipient) = self
            .directory
            .recipient(user_id, message_type)
            .await
            .map_err(to_handler_error)?
        else {
            debug!(%user_id, %message_type, "no recipient, skipping notification");
            return Ok(());
        };

        let source_event_id = event.id.as_uuid();
        let existing = self
            .service
            .store()
            .find_by_source(source_event_id, message_type)
            .await
            .map_err(to_handler_error)?;
        if existing.is_some() {
            debug!(event_id = %event.id, "notification already recorded");
            return Ok(());
        }

        let request = SendRequest::new(user_id, recipient, message_type, fields)
            .page(format!("{ORDER_DETAIL_PAGE}?id={}", order_event.order_id()))
            .source_event(source_event_id);

        match self.service.send_message(request).await {
            Ok(_) | Err(NotificationError::DuplicateMessage { .. }) => Ok(()),
            Err(NotificationError::TemplateNotConfigured(message_type)) => {
                warn!(%message_type, "no template configured, notification skipped");
                Ok(())
            }
            Err(e) => Err(to_handler_error(e)),
        }
    }
}
