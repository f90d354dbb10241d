//! The UI collaborator's view of the broker.
//!
//! The broker makes no assumptions about rendering; it only guarantees
//! the delivery content and ordering documented on each callback.

use crate::types::{Channel, ChannelId, Message};

pub type CallbackResult = std::result::Result<(), Box<dyn std::error::Error + Send + Sync>>;

pub trait UiSink: Send + Sync {
    /// A channel's history finished loading, ascending by creation time.
    fn on_history_loaded(&self, channel_id: &ChannelId, messages: &[Message]) -> CallbackResult;

    /// A newly inserted message arrived on a subscribed channel. Calls for
    /// one channel arrive in the store's insertion order.
    fn on_message_received(&self, channel_id: &ChannelId, message: &Message) -> CallbackResult;

    /// The channel list changed, ascending by creation time.
    fn on_channel_list_changed(&self, channels: &[Channel]) -> CallbackResult;
}

/// No-op sink for embedders that poll broker state themselves.
pub struct NullUiSink;

impl UiSink for NullUiSink {
    fn on_history_loaded(&self, _channel_id: &ChannelId, _messages: &[Message]) -> CallbackResult {
        Ok(())
    }

    fn on_message_received(&self, _channel_id: &ChannelId, _message: &Message) -> CallbackResult {
        Ok(())
    }

    fn on_channel_list_changed(&self, _channels: &[Channel]) -> CallbackResult {
        Ok(())
    }
}
