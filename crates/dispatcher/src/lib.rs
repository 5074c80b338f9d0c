//! Background delivery of outbox events.
//!
//! Workers claim one eligible event at a time under a lease, invoke the
//! handler registered for its [`EventType`](outbox::EventType), and record
//! the result. Failures are retried with capped exponential backoff until
//! the retry budget is spent, then dead-lettered. A reaper reclaims leases
//! abandoned by crashed workers and a janitor purges old completed events.

pub mod config;
pub mod dispatcher;
pub mod error;
pub mod handler;
pub mod janitor;
pub mod reaper;
pub mod retry;
pub mod shutdown;

pub use config::{DispatcherConfig, JanitorConfig};
pub use dispatcher::{DispatchOutcome, Dispatcher};
pub use error::{DispatchError, Result};
pub use handler::{EventHandler, HandlerError, HandlerRegistry};
pub use janitor::{Janitor, JanitorReport};
pub use reaper::LeaseReaper;
pub use retry::RetryPolicy;
pub use shutdown::sleep_or_shutdown;
