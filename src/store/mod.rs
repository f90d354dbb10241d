//! Message Store Adapter: abstraction over the external persisted store.
//!
//! Any backend offering append, ordered range queries, and a change feed
//! filtered by an equality predicate on `channel_id` satisfies this
//! contract. Two implementations ship with the crate: [`SupabaseStore`]
//! talks to a real backend, [`MemoryStore`] backs tests and offline use.
//! The implementation is chosen at construction time.

use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;
use tokio::sync::broadcast;

use crate::types::{Channel, ChannelId, ChangeEvent, Message, MessageType};

pub mod memory;
pub mod supabase;

pub use memory::MemoryStore;
pub use supabase::{SupabaseConfig, SupabaseStore};

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Backend unavailable: {0}")]
    BackendUnavailable(String),

    #[error("Websocket error: {0}")]
    Websocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Unexpected backend response: {0}")]
    UnexpectedResponse(String),
}

impl From<reqwest::Error> for StoreError {
    fn from(err: reqwest::Error) -> Self {
        StoreError::BackendUnavailable(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, StoreError>;

/// Fields of a message before the store assigns an id and timestamp.
#[derive(Debug, Clone, Serialize)]
pub struct NewMessage {
    pub channel_id: ChannelId,
    pub author_id: String,
    pub content: String,
    #[serde(rename = "message_type")]
    pub kind: MessageType,
    pub code_language: Option<String>,
}

#[async_trait]
pub trait MessageStore: Send + Sync {
    /// Fetches the `limit` most recent messages of a channel, in ascending
    /// `created_at` order. Connectivity failures are reported to the
    /// caller, never silently retried.
    async fn fetch_history(&self, channel_id: &ChannelId, limit: usize) -> Result<Vec<Message>>;

    /// Appends a message. The store assigns `id` and `created_at` and
    /// schedules an insert notification for the channel's watchers;
    /// delivery completes asynchronously. Nothing is stored on failure.
    async fn append(&self, new: NewMessage) -> Result<Message>;

    /// Opens a live feed of insert events scoped to one channel. Dropping
    /// the receiver ends the caller's interest in the feed.
    async fn watch(&self, channel_id: &ChannelId) -> Result<broadcast::Receiver<ChangeEvent>>;

    /// All known channels, ascending by creation time.
    async fn list_channels(&self) -> Result<Vec<Channel>>;

    /// Persists a channel record.
    async fn insert_channel(&self, channel: Channel) -> Result<Channel>;
}
