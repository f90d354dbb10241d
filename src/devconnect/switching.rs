use std::sync::Arc;

use crate::error::Result;
use crate::store::MessageStore;
use crate::types::{ChangeEvent, ChannelId, User};
use crate::ui::UiSink;

use super::DevConnect;
use super::registry::EventCallback;

impl DevConnect {
    /// The channel the client currently considers active, if any.
    pub fn current_channel(&self) -> Option<ChannelId> {
        self.read_current()
    }

    /// Makes `channel_id` the active channel: leaves the previous channel,
    /// loads recent history, hands it to the UI, and starts live delivery.
    ///
    /// If history cannot be loaded the switch stops there: the target
    /// stays selected so a retry targets the same channel, but no
    /// subscription is established and no partial history reaches the UI.
    /// Switching to the already-active channel reloads history and
    /// replaces the live subscription rather than stacking a second one.
    pub async fn switch_channel(&self, channel_id: &ChannelId) -> Result<()> {
        tracing::debug!(
            target: "devconnect::switching::switch_channel",
            "Switching to channel {}",
            channel_id
        );

        if let Some(previous) = self.read_current() {
            if &previous != channel_id {
                self.registry.unsubscribe(&previous);
            }
        }
        self.set_current(Some(channel_id.clone()));

        let history = self
            .store
            .fetch_history(channel_id, self.config.history_limit)
            .await?;
        if let Err(e) = self.ui.on_history_loaded(channel_id, &history) {
            tracing::warn!(
                target: "devconnect::switching::switch_channel",
                "History callback failed on channel {}: {}",
                channel_id,
                e
            );
        }

        let receiver = self.store.watch(channel_id).await?;
        self.registry
            .subscribe(channel_id.clone(), receiver, self.ui_callback());

        Ok(())
    }

    /// Forwards inserts from a channel's change feed to the UI sink.
    fn ui_callback(&self) -> EventCallback {
        let ui = Arc::clone(&self.ui);
        Arc::new(move |event: ChangeEvent| match event {
            ChangeEvent::Insert(message) => ui.on_message_received(&message.channel_id, &message),
        })
    }

    /// A fresh sign-in re-establishes the selected channel so the client
    /// resumes where it left off.
    pub(crate) async fn handle_signed_in(&self, user: &User) {
        tracing::debug!(
            target: "devconnect::switching::handle_signed_in",
            "User {} signed in",
            user.id
        );

        if let Some(channel_id) = self.read_current() {
            if let Err(e) = self.switch_channel(&channel_id).await {
                tracing::warn!(
                    target: "devconnect::switching::handle_signed_in",
                    "Failed to re-establish channel {}: {}",
                    channel_id,
                    e
                );
            }
        }
    }

    /// Sign-out drops the channel selection and every live subscription.
    pub(crate) fn handle_signed_out(&self) {
        tracing::debug!(
            target: "devconnect::switching::handle_signed_out",
            "User signed out, clearing subscriptions"
        );
        self.set_current(None);
        self.registry.unsubscribe_all();
    }
}
