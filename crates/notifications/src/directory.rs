use std::{
    collections::{HashMap, HashSet},
    sync::Arc,
};

use async_trait::async_trait;
use common::UserId;
use tokio::sync::RwLock;

use crate::{MessageType, Result};

/// Resolves where a user's notifications go.
#[async_trait]
pub trait RecipientDirectory: Send + Sync {
    /// Returns the provider recipient id for `user_id`, or `None` if the
    /// user has none or has opted out of `message_type`.
    async fn recipient(&self, user_id: UserId, message_type: MessageType)
    -> Result<Option<String>>;
}

#[async_trait]
impl<T: RecipientDirectory + ?Sized> RecipientDirectory for Arc<T> {
    async fn recipient(
        &self,
        user_id: UserId,
        message_type: MessageType,
    ) -> Result<Option<String>> {
        (**self).recipient(user_id, message_type).await
    }
}

#[derive(Debug, Clone, Default)]
struct Subscription {
    recipient: String,
    disabled: HashSet<MessageType>,
}

/// In-memory recipient directory.
#[derive(Clone, Default)]
pub struct InMemoryRecipientDirectory {
    users: Arc<RwLock<HashMap<UserId, Subscription>>>,
}

impl InMemoryRecipientDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn set_recipient(&self, user_id: UserId, recipient: impl Into<String>) {
        let mut users = self.users.write().await;
        users.entry(user_id).or_default().recipient = recipient.into();
    }

    /// Opts a user out of one message type.
    pub async fn disable(&self, user_id: UserId, message_type: MessageType) {
        let mut users = self.users.write().await;
        users.entry(user_id).or_default().disabled.insert(message_type);
    }
}

#[async_trait]
impl RecipientDirectory for InMemoryRecipientDirectory {
    async fn recipient(
        &self,
        user_id: UserId,
        message_type: MessageType,
    ) -> Result<Option<String>> {
        let users = self.users.read().await;
        Ok(users
            .get(&user_id)
            .filter(|s| !s.recipient.is_empty() && !s.disabled.contains(&message_type))
            .map(|s| s.recipient.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn opt_out_hides_the_recipient() {
        let directory = InMemoryRecipientDirectory::new();
        let user = UserId::new();
        assert!(
            directory
                .recipient(user, MessageType::OrderPaid)
                .await
                .unwrap()
                .is_none()
        );

        directory.set_recipient(user, "open-id").await;
        directory.disable(user, MessageType::OrderCreated).await;

        assert_eq!(
            directory
                .recipient(user, MessageType::OrderPaid)
                .await
                .unwrap()
                .as_deref(),
            Some("open-id")
        );
        assert!(
            directory
                .recipient(user, MessageType::OrderCreated)
                .await
                .unwrap()
                .is_none()
        );
    }
}
