use std::{collections::HashMap, time::Duration};

use crate::{MessageType, NotificationError};

/// Push provider connection settings.
#[derive(Debug, Clone)]
pub struct PushConfig {
    /// Base URL of the provider API.
    pub api_url: String,

    pub app_id: String,
    pub app_secret: String,

    /// Request timeout for token and send calls.
    pub timeout: Duration,

    /// Upper bound on how long an access token is cached.
    pub token_max_ttl: Duration,
}

impl Default for PushConfig {
    fn default() -> Self {
        Self {
            api_url: "https://api.weixin.qq.com".to_string(),
            app_id: String::new(),
            app_secret: String::new(),
            timeout: Duration::from_secs(10),
            token_max_ttl: Duration::from_secs(7200),
        }
    }
}

/// Notification pipeline settings.
#[derive(Debug, Clone)]
pub struct NotificationConfig {
    /// Provider template id per message type.
    pub templates: HashMap<MessageType, String>,

    /// Capacity of the ingestion queue.
    pub queue_capacity: usize,

    /// Items processed per scheduled flush.
    pub batch_size: usize,

    pub flush_interval: Duration,

    /// How often the retry scan runs.
    pub retry_interval: Duration,

    /// Minimum age of the last attempt before a record is retried.
    pub retry_cooldown: Duration,

    pub max_retries: u32,

    /// Records examined per retry scan.
    pub retry_limit: u32,
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self {
            templates: HashMap::new(),
            queue_capacity: 10_000,
            batch_size: 100,
            flush_interval: Duration::from_secs(5),
            retry_interval: Duration::from_secs(60),
            retry_cooldown: Duration::from_secs(5 * 60),
            max_retries: 3,
            retry_limit: 100,
        }
    }
}

impl NotificationConfig {
    /// Resolves the provider template for a message type.
    pub fn template_id(&self, message_type: MessageType) -> Result<&str, NotificationError> {
        self.templates
            .get(&message_type)
            .map(String::as_str)
            .ok_or(NotificationError::TemplateNotConfigured(message_type))
    }

    pub fn with_template(mut self, message_type: MessageType, template_id: impl Into<String>) -> Self {
        self.templates.insert(message_type, template_id.into());
        self
    }
}

/// Parses a `type=template_id,type=template_id` mapping.
pub fn parse_templates(raw: &str) -> Result<HashMap<MessageType, String>, NotificationError> {
    raw.split(',')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(|entry| {
            let (key, value) = entry.split_once('=').ok_or_else(|| {
                NotificationError::InvalidData(format!("expected type=template_id, got '{entry}'"))
            })?;
            let value = value.trim();
            if value.is_empty() {
                return Err(NotificationError::InvalidData(format!(
                    "empty template id for '{key}'"
                )));
            }
            Ok((key.parse()?, value.to_string()))
        })
        .collect()
}
