use std::{collections::HashMap, sync::Arc};

use async_trait::async_trait;
use common::ErrorKind;
use outbox::{EventType, OutboxEvent};
use thiserror::Error;

/// Failure reported by an [`EventHandler`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HandlerError {
    /// Worth retrying later (downstream outage, timeout).
    #[error("{0}")]
    Transient(String),

    /// Will never succeed; the event is dead-lettered immediately.
    #[error("{0}")]
    Permanent(String),
}

impl HandlerError {
    /// Creates a transient error.
    pub fn transient(message: impl ToString) -> Self {
        HandlerError::Transient(message.to_string())
    }

    /// Creates a permanent error.
    pub fn permanent(message: impl ToString) -> Self {
        HandlerError::Permanent(message.to_string())
    }

    /// Returns true if retrying cannot help.
    pub fn is_permanent(&self) -> bool {
        matches!(self, HandlerError::Permanent(_))
    }

    /// Returns the error classification.
    pub fn kind(&self) -> ErrorKind {
        match self {
            HandlerError::Transient(_) => ErrorKind::TransientIo,
            HandlerError::Permanent(_) => ErrorKind::Permanent,
        }
    }
}

impl From<serde_json::Error> for HandlerError {
    fn from(e: serde_json::Error) -> Self {
        HandlerError::Permanent(format!("malformed payload: {e}"))
    }
}

/// Consumer of outbox events.
///
/// Delivery is at-least-once: a handler may see the same event again after
/// a timeout, a crash, or a lease that expired mid-call. Implementations
/// must be idempotent, typically by keying their side effects on
/// `event.id`.
#[async_trait]
pub trait EventHandler: Send + Sync {
    /// Name used in logs and metrics.
    fn name(&self) -> &'static str;

    /// Processes one event.
    async fn handle(&self, event: &OutboxEvent) -> Result<(), HandlerError>;
}

/// Handlers keyed by event type, built once at startup.
#[derive(Clone, Default)]
pub struct HandlerRegistry {
    handlers: HashMap<EventType, Arc<dyn EventHandler>>,
}

impl HandlerRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `handler` for one event type, replacing any previous one.
    pub fn register(&mut self, event_type: EventType, handler: Arc<dyn EventHandler>) {
        if let Some(previous) = self.handlers.insert(event_type, handler) {
            tracing::warn!(
                %event_type,
                replaced = previous.name(),
                "event handler replaced"
            );
        }
    }

    /// Registers `handler` for several event types.
    pub fn register_all(
        &mut self,
        event_types: impl IntoIterator<Item = EventType>,
        handler: Arc<dyn EventHandler>,
    ) {
        for event_type in event_types {
            self.register(event_type, handler.clone());
        }
    }

    /// Builder form of [`HandlerRegistry::register_all`].
    pub fn with(
        mut self,
        event_types: impl IntoIterator<Item = EventType>,
        handler: Arc<dyn EventHandler>,
    ) -> Self {
        self.register_all(event_types, handler);
        self
    }

    /// Returns the handler for an event type.
    pub fn get(&self, event_type: EventType) -> Option<&Arc<dyn EventHandler>> {
        self.handlers.get(&event_type)
    }

    /// Returns the number of registered event types.
    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    /// Returns true if nothing is registered.
    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Noop;

    #[async_trait]
    impl EventHandler for Noop {
        fn name(&self) -> &'static str {
            "noop"
        }

        async fn handle(&self, _event: &OutboxEvent) -> Result<(), HandlerError> {
            Ok(())
        }
    }

    #[test]
    fn registry_resolves_by_event_type() {
        let registry =
            HandlerRegistry::new().with([EventType::OrderCreated, EventType::OrderPaid], Arc::new(Noop));

        assert_eq!(registry.len(), 2);
        assert_eq!(registry.get(EventType::OrderPaid).unwrap().name(), "noop");
        assert!(registry.get(EventType::UserAction).is_none());
    }

    #[test]
    fn error_classification() {
        assert!(HandlerError::permanent("bad").is_permanent());
        assert!(!HandlerError::transient("down").is_permanent());
        assert_eq!(HandlerError::transient("down").kind(), ErrorKind::TransientIo);

        let err: HandlerError = serde_json::from_str::<u32>("x").unwrap_err().into();
        assert!(err.is_permanent());
    }
}
