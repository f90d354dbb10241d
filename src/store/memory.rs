//! In-memory message store.
//!
//! Keeps messages and channels in plain vectors and fans inserts out
//! through per-channel broadcast feeds with lazy creation and cleanup
//! once every receiver is gone. Insertion order doubles as the
//! chronological order, which is exactly the contract's tie-break rule.

use std::sync::Mutex;

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use tokio::sync::broadcast;
use uuid::Uuid;

use super::{MessageStore, NewMessage, Result};
use crate::types::{Channel, ChannelId, ChangeEvent, Message};

const FEED_BUFFER: usize = 100;

#[derive(Default)]
pub struct MemoryStore {
    messages: Mutex<Vec<Message>>,
    channels: Mutex<Vec<Channel>>,
    feeds: DashMap<ChannelId, broadcast::Sender<ChangeEvent>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn emit(&self, channel_id: &ChannelId, event: ChangeEvent) {
        if let Some(sender) = self.feeds.get(channel_id) {
            // Attempt to send; if all receivers dropped, clean up
            if sender.send(event).is_err() && sender.receiver_count() == 0 {
                drop(sender);
                self.feeds.remove(channel_id);
            }
        }
    }

    fn lock_messages(&self) -> std::sync::MutexGuard<'_, Vec<Message>> {
        self.messages.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn lock_channels(&self) -> std::sync::MutexGuard<'_, Vec<Channel>> {
        self.channels.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl MessageStore for MemoryStore {
    async fn fetch_history(&self, channel_id: &ChannelId, limit: usize) -> Result<Vec<Message>> {
        let messages = self.lock_messages();
        let mut recent: Vec<Message> = messages
            .iter()
            .rev()
            .filter(|m| &m.channel_id == channel_id)
            .take(limit)
            .cloned()
            .collect();
        recent.reverse();
        Ok(recent)
    }

    async fn append(&self, new: NewMessage) -> Result<Message> {
        let message = Message {
            id: Uuid::new_v4().to_string(),
            channel_id: new.channel_id,
            author_id: new.author_id,
            content: new.content,
            kind: new.kind,
            code_language: new.code_language,
            created_at: Utc::now(),
        };
        self.lock_messages().push(message.clone());
        self.emit(&message.channel_id, ChangeEvent::Insert(message.clone()));
        Ok(message)
    }

    async fn watch(&self, channel_id: &ChannelId) -> Result<broadcast::Receiver<ChangeEvent>> {
        Ok(self
            .feeds
            .entry(channel_id.clone())
            .or_insert_with(|| broadcast::channel(FEED_BUFFER).0)
            .subscribe())
    }

    async fn list_channels(&self) -> Result<Vec<Channel>> {
        let mut channels = self.lock_channels().clone();
        channels.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(channels)
    }

    async fn insert_channel(&self, channel: Channel) -> Result<Channel> {
        self.lock_channels().push(channel.clone());
        Ok(channel)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::MessageType;

    fn new_message(channel: &str, content: &str) -> NewMessage {
        NewMessage {
            channel_id: ChannelId::new(channel),
            author_id: "u1".to_string(),
            content: content.to_string(),
            kind: MessageType::Text,
            code_language: None,
        }
    }

    #[tokio::test]
    async fn history_is_ascending_and_truncated_to_most_recent() {
        let store = MemoryStore::new();
        for i in 0..5 {
            store
                .append(new_message("general", &format!("msg {}", i)))
                .await
                .unwrap();
        }

        let history = store
            .fetch_history(&ChannelId::new("general"), 3)
            .await
            .unwrap();

        let contents: Vec<&str> = history.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, vec!["msg 2", "msg 3", "msg 4"]);
        assert!(history.windows(2).all(|w| w[0].created_at <= w[1].created_at));
    }

    #[tokio::test]
    async fn history_is_scoped_to_the_channel() {
        let store = MemoryStore::new();
        store.append(new_message("general", "a")).await.unwrap();
        store.append(new_message("python", "b")).await.unwrap();

        let history = store
            .fetch_history(&ChannelId::new("python"), 50)
            .await
            .unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].content, "b");
    }

    #[tokio::test]
    async fn history_of_unknown_channel_is_empty() {
        let store = MemoryStore::new();
        let history = store
            .fetch_history(&ChannelId::new("nope"), 10)
            .await
            .unwrap();
        assert!(history.is_empty());
    }

    #[tokio::test]
    async fn append_delivers_to_watchers() {
        let store = MemoryStore::new();
        let channel = ChannelId::new("general");
        let mut rx = store.watch(&channel).await.unwrap();

        let stored = store.append(new_message("general", "hello")).await.unwrap();

        let ChangeEvent::Insert(received) = rx.try_recv().expect("should receive insert");
        assert_eq!(received.id, stored.id);
        assert_eq!(received.channel_id, channel);
    }

    #[tokio::test]
    async fn watchers_of_other_channels_see_nothing() {
        let store = MemoryStore::new();
        let mut general_rx = store.watch(&ChannelId::new("general")).await.unwrap();
        let mut python_rx = store.watch(&ChannelId::new("python")).await.unwrap();

        store.append(new_message("python", "snake")).await.unwrap();

        assert!(general_rx.try_recv().is_err());
        assert!(python_rx.try_recv().is_ok());
    }

    #[tokio::test]
    async fn multiple_watchers_share_one_feed() {
        let store = MemoryStore::new();
        let channel = ChannelId::new("general");
        let _rx1 = store.watch(&channel).await.unwrap();
        let _rx2 = store.watch(&channel).await.unwrap();

        assert_eq!(store.feeds.len(), 1);
        assert_eq!(store.feeds.get(&channel).unwrap().receiver_count(), 2);
    }

    #[tokio::test]
    async fn append_cleans_up_feed_when_all_receivers_dropped() {
        let store = MemoryStore::new();
        let channel = ChannelId::new("general");
        let rx = store.watch(&channel).await.unwrap();
        drop(rx);

        // Feed still exists; cleanup happens on the next append
        assert!(store.feeds.contains_key(&channel));
        store.append(new_message("general", "bye")).await.unwrap();
        assert!(!store.feeds.contains_key(&channel));
    }

    #[tokio::test]
    async fn channels_list_ascending_by_creation() {
        let store = MemoryStore::new();
        for channel in crate::types::Channel::defaults() {
            store.insert_channel(channel).await.unwrap();
        }

        let channels = store.list_channels().await.unwrap();
        assert_eq!(channels.len(), 6);
        assert!(channels
            .windows(2)
            .all(|w| w[0].created_at <= w[1].created_at));
    }
}
