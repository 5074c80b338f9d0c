use std::{collections::BTreeMap, fmt, str::FromStr};

use chrono::{DateTime, Utc};
use common::{MessageId, UserId};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::NotificationError;

/// Kind of push notification, mapped to a provider template by configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MessageType {
    OrderCreated,
    OrderPaid,
    OrderCancelled,
    PaymentTimeout,
    DeliveryAssigned,
    OrderDelivered,
    SystemNotice,
}

impl MessageType {
    pub const ALL: [MessageType; 7] = [
        MessageType::OrderCreated,
        MessageType::OrderPaid,
        MessageType::OrderCancelled,
        MessageType::PaymentTimeout,
        MessageType::DeliveryAssigned,
        MessageType::OrderDelivered,
        MessageType::SystemNotice,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            MessageType::OrderCreated => "ORDER_CREATED",
            MessageType::OrderPaid => "ORDER_PAID",
            MessageType::OrderCancelled => "ORDER_CANCELLED",
            MessageType::PaymentTimeout => "PAYMENT_TIMEOUT",
            MessageType::DeliveryAssigned => "DELIVERY_ASSIGNED",
            MessageType::OrderDelivered => "ORDER_DELIVERED",
            MessageType::SystemNotice => "SYSTEM_NOTICE",
        }
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MessageType {
    type Err = NotificationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let upper = s.trim().to_ascii_uppercase();
        MessageType::ALL
            .into_iter()
            .find(|t| t.as_str() == upper)
            .ok_or_else(|| NotificationError::InvalidData(format!("Unknown message type: {s}")))
    }
}

/// Delivery status of a [`MessageRecord`].
///
/// ```text
/// PENDING ──┬──► SENT
///           └──► FAILED ──► RETRYING ──┬──► SENT
///                   ▲                  │
///                   └──────────────────┘
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MessageStatus {
    #[default]
    Pending,
    Sent,
    Failed,
    Retrying,
}

impl MessageStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageStatus::Pending => "PENDING",
            MessageStatus::Sent => "SENT",
            MessageStatus::Failed => "FAILED",
            MessageStatus::Retrying => "RETRYING",
        }
    }
}

impl fmt::Display for MessageStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MessageStatus {
    type Err = NotificationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PENDING" => Ok(MessageStatus::Pending),
            "SENT" => Ok(MessageStatus::Sent),
            "FAILED" => Ok(MessageStatus::Failed),
            "RETRYING" => Ok(MessageStatus::Retrying),
            other => Err(NotificationError::InvalidData(format!(
                "Unknown message status: {other}"
            ))),
        }
    }
}

/// A single template field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TemplateValue {
    pub value: String,
}

/// The provider's template-push request body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TemplateMessage {
    /// Provider recipient id.
    pub touser: String,
    pub template_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page: Option<String>,
    pub data: BTreeMap<String, TemplateValue>,
}

impl TemplateMessage {
    pub fn new(
        recipient: impl Into<String>,
        template_id: impl Into<String>,
        fields: BTreeMap<String, String>,
        page: Option<String>,
    ) -> Self {
        Self {
            touser: recipient.into(),
            template_id: template_id.into(),
            page,
            data: fields
                .into_iter()
                .map(|(key, value)| (key, TemplateValue { value }))
                .collect(),
        }
    }
}

/// Durable ledger entry for one outbound notification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageRecord {
    pub id: MessageId,
    pub user_id: UserId,
    pub recipient: String,
    pub message_type: MessageType,
    pub template_id: String,

    /// The serialized [`TemplateMessage`], resent verbatim on retry.
    pub content: serde_json::Value,

    pub status: MessageStatus,
    pub provider_message_id: Option<String>,
    pub error_message: Option<String>,

    /// Failed resends. A resend is counted before it goes out and uncounted
    /// if it succeeds.
    pub retry_count: u32,

    /// Outbox event this notification was produced from, if any.
    pub source_event_id: Option<Uuid>,

    /// Optimistic concurrency version, starts at 1.
    pub version: i64,

    pub sent_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl MessageRecord {
    /// Creates a PENDING record for a message about to be sent.
    pub fn pending(
        user_id: UserId,
        message_type: MessageType,
        message: &TemplateMessage,
        source_event_id: Option<Uuid>,
    ) -> Result<Self, serde_json::Error> {
        let now = Utc::now();
        Ok(Self {
            id: MessageId::new(),
            user_id,
            recipient: message.touser.clone(),
            message_type,
            template_id: message.template_id.clone(),
            content: serde_json::to_value(message)?,
            status: MessageStatus::Pending,
            provider_message_id: None,
            error_message: None,
            retry_count: 0,
            source_event_id,
            version: 1,
            sent_at: None,
            created_at: now,
            updated_at: now,
        })
    }

    /// Decodes the stored template message.
    pub fn template_message(&self) -> Result<TemplateMessage, serde_json::Error> {
        serde_json::from_value(self.content.clone())
    }

    pub fn mark_sent(&mut self, provider_message_id: Option<String>, at: DateTime<Utc>) {
        self.status = MessageStatus::Sent;
        self.provider_message_id = provider_message_id;
        self.error_message = None;
        self.sent_at = Some(at);
        self.updated_at = at;
    }

    pub fn mark_failed(&mut self, error: impl Into<String>, at: DateTime<Utc>) {
        self.status = MessageStatus::Failed;
        self.error_message = Some(error.into());
        self.updated_at = at;
    }

    /// Claims the record for a resend.
    pub fn mark_retrying(&mut self, at: DateTime<Utc>) {
        self.status = MessageStatus::Retrying;
        self.updated_at = at;
    }
}
