use crate::error::{DevConnectError, Result};
use crate::session::SessionGate;
use crate::store::{MessageStore, NewMessage};
use crate::types::{ChannelId, Message, MessageType};

use super::DevConnect;

impl DevConnect {
    /// Fetches the most recent messages of a channel, oldest first.
    ///
    /// # Errors
    ///
    /// * [`DevConnectError::InvalidArgument`] if `limit` is zero.
    pub async fn fetch_messages(&self, channel_id: &ChannelId, limit: usize) -> Result<Vec<Message>> {
        if limit == 0 {
            return Err(DevConnectError::InvalidArgument(
                "limit must be greater than zero".to_string(),
            ));
        }

        Ok(self.store.fetch_history(channel_id, limit).await?)
    }

    /// Appends a message to a channel on behalf of the signed-in user.
    ///
    /// Content is trimmed before storage; whether the message is plain
    /// text or code is derived from its content. Delivery back to the UI
    /// happens through the channel's change feed, not from here, so the
    /// sender observes its own message the same way every other
    /// subscriber does.
    ///
    /// # Errors
    ///
    /// * [`DevConnectError::Unauthenticated`] if no user is signed in.
    /// * [`DevConnectError::EmptyContent`] if the trimmed content is
    ///   empty.
    pub async fn send_message(&self, channel_id: &ChannelId, content: &str) -> Result<Message> {
        let user = self
            .session
            .current_user()
            .ok_or(DevConnectError::Unauthenticated)?;

        let content = content.trim();
        if content.is_empty() {
            return Err(DevConnectError::EmptyContent);
        }

        let (kind, code_language) = MessageType::detect(content);
        let message = self
            .store
            .append(NewMessage {
                channel_id: channel_id.clone(),
                author_id: user.id,
                content: content.to_string(),
                kind,
                code_language,
            })
            .await?;

        tracing::debug!(
            target: "devconnect::messages::send_message",
            "Appended message {} to channel {}",
            message.id,
            channel_id
        );

        Ok(message)
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_utils::*;
    use super::*;

    #[tokio::test]
    async fn fetch_messages_rejects_zero_limit() {
        let test = create_test_broker().await;

        let result = test.broker.fetch_messages(&"general".into(), 0).await;
        assert!(matches!(
            result,
            Err(DevConnectError::InvalidArgument(_))
        ));
    }

    #[tokio::test]
    async fn send_message_requires_signed_in_user() {
        let test = create_test_broker().await;

        let result = test.broker.send_message(&"general".into(), "hello").await;
        assert!(matches!(result, Err(DevConnectError::Unauthenticated)));
    }

    #[tokio::test]
    async fn send_message_rejects_whitespace_only_content() {
        let test = create_signed_in_broker().await;

        let result = test.broker.send_message(&"general".into(), "   \n\t ").await;
        assert!(matches!(result, Err(DevConnectError::EmptyContent)));

        // Nothing was stored
        let messages = test.broker.fetch_messages(&"general".into(), 10).await.unwrap();
        assert!(messages.is_empty());
    }

    #[tokio::test]
    async fn send_message_trims_and_stores_content() {
        let test = create_signed_in_broker().await;

        let message = test
            .broker
            .send_message(&"general".into(), "  hello world  ")
            .await
            .unwrap();

        assert_eq!(message.content, "hello world");
        assert_eq!(message.author_id, "u1");
        assert_eq!(message.kind, MessageType::Text);
        assert!(message.code_language.is_none());
    }

    #[tokio::test]
    async fn send_message_detects_code_blocks() {
        let test = create_signed_in_broker().await;

        let message = test
            .broker
            .send_message(&"general".into(), "```rust\nfn main() {}\n```")
            .await
            .unwrap();

        assert_eq!(message.kind, MessageType::Code);
        assert_eq!(message.code_language.as_deref(), Some("rust"));
    }

    #[tokio::test]
    async fn fetch_messages_returns_only_the_newest_in_order() {
        let test = create_signed_in_broker().await;
        let channel: ChannelId = "general".into();

        for i in 0..5 {
            test.broker
                .send_message(&channel, &format!("m{}", i))
                .await
                .unwrap();
        }

        let messages = test.broker.fetch_messages(&channel, 3).await.unwrap();
        let contents: Vec<&str> = messages.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, vec!["m2", "m3", "m4"]);
    }
}
