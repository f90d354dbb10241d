//! Subscription Registry: at most one live subscription per channel.
//!
//! The registry owns the delivery-loop tasks. Opening a subscription for
//! a channel that already has one closes the old one first, which makes
//! channel re-entry and duplicate subscribe calls safe.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use dashmap::DashMap;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use super::dispatcher;
use crate::types::{ChannelId, ChangeEvent};
use crate::ui::CallbackResult;

pub(crate) type EventCallback = Arc<dyn Fn(ChangeEvent) -> CallbackResult + Send + Sync>;

/// A live subscription to one channel's change feed.
struct SubscriptionHandle {
    channel_id: ChannelId,
    closed: Arc<AtomicBool>,
    task: JoinHandle<()>,
}

impl SubscriptionHandle {
    /// Stops delivery. Idempotent, and safe to call from inside an
    /// in-flight delivery callback: the closed flag is observed before
    /// every delivery and the loop task is cancelled at its next await
    /// point.
    fn close(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            self.task.abort();
            tracing::debug!(
                target: "devconnect::registry",
                "Closed subscription for channel {}",
                self.channel_id
            );
        }
    }
}

#[derive(Default)]
pub(crate) struct SubscriptionRegistry {
    entries: DashMap<ChannelId, SubscriptionHandle>,
}

impl SubscriptionRegistry {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Registers `on_event` as the sole subscriber for `channel_id`. Any
    /// previous subscription for the channel is closed before the new
    /// delivery loop starts.
    pub(crate) fn subscribe(
        &self,
        channel_id: ChannelId,
        receiver: broadcast::Receiver<ChangeEvent>,
        on_event: EventCallback,
    ) {
        if let Some((_, previous)) = self.entries.remove(&channel_id) {
            tracing::debug!(
                target: "devconnect::registry",
                "Replacing live subscription for channel {}",
                channel_id
            );
            previous.close();
        }

        let closed = Arc::new(AtomicBool::new(false));
        let task = dispatcher::spawn_delivery_loop(
            channel_id.clone(),
            receiver,
            on_event,
            Arc::clone(&closed),
        );
        self.entries.insert(
            channel_id.clone(),
            SubscriptionHandle {
                channel_id,
                closed,
                task,
            },
        );
    }

    /// Closes and removes the channel's subscription; no-op if absent.
    pub(crate) fn unsubscribe(&self, channel_id: &ChannelId) {
        if let Some((_, handle)) = self.entries.remove(channel_id) {
            handle.close();
        }
    }

    /// Closes every live subscription, leaving the registry empty. Used on
    /// sign-out; never fails.
    pub(crate) fn unsubscribe_all(&self) {
        let channels: Vec<ChannelId> = self.entries.iter().map(|e| e.key().clone()).collect();
        for channel_id in channels {
            tracing::debug!(
                target: "devconnect::registry",
                "Tearing down subscription for channel {}",
                channel_id
            );
            self.unsubscribe(&channel_id);
        }
    }

    pub(crate) fn active_count(&self) -> usize {
        self.entries.len()
    }

    pub(crate) fn is_subscribed(&self, channel_id: &ChannelId) -> bool {
        self.entries.contains_key(channel_id)
    }
}
