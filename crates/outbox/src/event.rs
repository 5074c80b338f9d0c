use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use uuid::Uuid;

/// Unique identifier for an outbox event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EventId(Uuid);

impl EventId {
    /// Creates a new random event ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Creates an event ID from an existing UUID.
    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Returns the underlying UUID.
    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for EventId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for EventId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<Uuid> for EventId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

impl From<EventId> for Uuid {
    fn from(id: EventId) -> Self {
        id.0
    }
}

/// The kinds of events written to the outbox.
///
/// Stored as the upper-snake-case tag returned by [`EventType::as_str`].
/// Dispatch is keyed by this enum, never by the raw string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventType {
    OrderCreated,
    OrderPaid,
    OrderCancelled,
    PaymentTimeout,
    OrderAssigned,
    OrderDelivered,
    OrderStatusOverridden,
    UserAction,
}

impl EventType {
    /// Every known event type.
    pub const ALL: [EventType; 8] = [
        EventType::OrderCreated,
        EventType::OrderPaid,
        EventType::OrderCancelled,
        EventType::PaymentTimeout,
        EventType::OrderAssigned,
        EventType::OrderDelivered,
        EventType::OrderStatusOverridden,
        EventType::UserAction,
    ];

    /// Returns the stored tag.
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::OrderCreated => "ORDER_CREATED",
            EventType::OrderPaid => "ORDER_PAID",
            EventType::OrderCancelled => "ORDER_CANCELLED",
            EventType::PaymentTimeout => "PAYMENT_TIMEOUT",
            EventType::OrderAssigned => "ORDER_ASSIGNED",
            EventType::OrderDelivered => "ORDER_DELIVERED",
            EventType::OrderStatusOverridden => "ORDER_STATUS_OVERRIDDEN",
            EventType::UserAction => "USER_ACTION",
        }
    }
}

impl std::fmt::Display for EventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Returned when a stored tag is not a known [`EventType`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Unknown event type: {0}")]
pub struct UnknownEventType(pub String);

impl std::str::FromStr for EventType {
    type Err = UnknownEventType;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        EventType::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| UnknownEventType(s.to_string()))
    }
}

/// Processing status of an outbox event.
///
/// ```text
/// PENDING ──► PROCESSING ──┬──► COMPLETED
///    ▲                     ├──► DEAD_LETTER
///    └─────────────────────┘ (retry)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventStatus {
    /// Waiting to be claimed (possibly not before `next_run_at`).
    #[default]
    Pending,

    /// Claimed by a dispatcher worker holding a lease.
    Processing,

    /// Handled successfully (terminal).
    Completed,

    /// Reserved for rows marked failed by external tooling.
    Failed,

    /// Retries exhausted, needs manual intervention (terminal).
    DeadLetter,
}

impl EventStatus {
    /// Every status.
    pub const ALL: [EventStatus; 5] = [
        EventStatus::Pending,
        EventStatus::Processing,
        EventStatus::Completed,
        EventStatus::Failed,
        EventStatus::DeadLetter,
    ];

    /// Returns true if the row may never change again.
    pub fn is_terminal(&self) -> bool {
        matches!(self, EventStatus::Completed | EventStatus::DeadLetter)
    }

    /// Returns the stored status string.
    pub fn as_str(&self) -> &'static str {
        match self {
            EventStatus::Pending => "PENDING",
            EventStatus::Processing => "PROCESSING",
            EventStatus::Completed => "COMPLETED",
            EventStatus::Failed => "FAILED",
            EventStatus::DeadLetter => "DEAD_LETTER",
        }
    }
}

impl std::fmt::Display for EventStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for EventStatus {
    type Err = crate::OutboxError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        EventStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| crate::OutboxError::InvalidStatus(s.to_string()))
    }
}

/// A durable event row in the outbox.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutboxEvent {
    /// Unique identifier for this event.
    pub id: EventId,

    /// Stored event tag, see [`EventType`].
    pub event_type: String,

    /// The entity this event concerns (order id, user id).
    pub aggregate_id: String,

    /// The event payload as JSON.
    pub payload: serde_json::Value,

    /// Current processing status.
    pub status: EventStatus,

    /// Number of failed attempts so far. Never decreases.
    pub retry_count: u32,

    /// Earliest time the event may be claimed; `None` means immediately.
    pub next_run_at: Option<DateTime<Utc>>,

    /// Token of the lease held by the worker processing this event.
    pub lease_token: Option<Uuid>,

    /// When the current lease expires.
    pub locked_until: Option<DateTime<Utc>>,

    /// Last failure message.
    pub error_message: Option<String>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl OutboxEvent {
    /// Creates a new pending event with a serialized payload.
    pub fn new<T: Serialize>(
        event_type: EventType,
        aggregate_id: impl ToString,
        payload: &T,
    ) -> Result<Self, serde_json::Error> {
        Ok(Self::from_raw(
            event_type.as_str(),
            aggregate_id,
            serde_json::to_value(payload)?,
        ))
    }

    /// Creates a new pending event from a raw tag and JSON payload.
    pub fn from_raw(
        event_type: impl Into<String>,
        aggregate_id: impl ToString,
        payload: serde_json::Value,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: EventId::new(),
            event_type: event_type.into(),
            aggregate_id: aggregate_id.to_string(),
            payload,
            status: EventStatus::Pending,
            retry_count: 0,
            next_run_at: None,
            lease_token: None,
            locked_until: None,
            error_message: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Delays the first delivery attempt until `at`.
    pub fn not_before(mut self, at: DateTime<Utc>) -> Self {
        self.next_run_at = Some(at);
        self
    }

    /// Resolves the stored tag to an [`EventType`].
    pub fn kind(&self) -> Result<EventType, UnknownEventType> {
        self.event_type.parse()
    }

    /// Deserializes the payload into a typed structure.
    pub fn payload_as<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_value(self.payload.clone())
    }

    /// Returns true if the event can be claimed at `now`.
    pub fn is_eligible(&self, now: DateTime<Utc>) -> bool {
        self.status == EventStatus::Pending && self.next_run_at.is_none_or(|at| at <= now)
    }

    /// Returns true if the event is processing under a lease that expired before `now`.
    pub fn lease_expired(&self, now: DateTime<Utc>) -> bool {
        self.status == EventStatus::Processing && self.locked_until.is_some_and(|until| until < now)
    }
}
