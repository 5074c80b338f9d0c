//! Push notification pipeline.
//!
//! Every outbound notification is recorded as a [`MessageRecord`] before the
//! provider is called, so a crash or provider outage leaves a durable
//! PENDING or FAILED row for the retry scan to pick up.

pub mod config;
pub mod directory;
pub mod error;
pub mod handler;
pub mod memory;
pub mod message;
pub mod postgres;
pub mod provider;
pub mod queue;
pub mod service;
pub mod store;
pub mod token;

pub use config::{NotificationConfig, PushConfig, parse_templates};
pub use directory::{InMemoryRecipientDirectory, RecipientDirectory};
pub use error::{NotificationError, ProviderError, Result};
pub use handler::OrderNotificationHandler;
pub use memory::InMemoryMessageStore;
pub use message::{MessageRecord, MessageStatus, MessageType, TemplateMessage, TemplateValue};
pub use postgres::PostgresMessageStore;
pub use provider::{HttpPushProvider, PushProvider, SendReceipt};
pub use queue::{NotificationQueue, QueueConsumer, QueueItem, QueueStatus};
pub use service::{NotificationService, SendRequest};
pub use store::MessageStore;
pub use token::TokenCache;
