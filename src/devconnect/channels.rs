use chrono::Utc;

use crate::error::{DevConnectError, Result};
use crate::session::SessionGate;
use crate::store::MessageStore;
use crate::types::Channel;
use crate::ui::UiSink;

use super::DevConnect;

pub(crate) type ChannelCreatedCallback = Box<dyn Fn(&Channel) + Send + Sync>;

/// Turns a display name into a channel identifier: lowercased, whitespace
/// and hyphen runs collapsed to a single `-`, every other character that
/// is not ASCII alphanumeric or `_` dropped.
fn slugify(name: &str) -> String {
    let mut slug = String::with_capacity(name.len());
    for c in name.trim().to_lowercase().chars() {
        if c.is_ascii_alphanumeric() || c == '_' {
            slug.push(c);
        } else if c.is_whitespace() || c == '-' {
            if !slug.ends_with('-') {
                slug.push('-');
            }
        }
    }
    slug.trim_matches('-').to_string()
}

impl DevConnect {
    /// Returns every channel known to the store, oldest first.
    pub async fn list_channels(&self) -> Result<Vec<Channel>> {
        Ok(self.store.list_channels().await?)
    }

    /// Creates a new channel from a display name.
    ///
    /// The identifier is derived from the name; creation requires a
    /// signed-in user, who is recorded as the channel's creator. The icon
    /// and color are opaque UI tokens and stored as given. On success
    /// every registered channel-created listener is invoked in
    /// registration order and the UI is told the channel list changed.
    ///
    /// # Errors
    ///
    /// * [`DevConnectError::Unauthenticated`] if no user is signed in.
    /// * [`DevConnectError::InvalidName`] if the name contains no usable
    ///   characters.
    /// * [`DevConnectError::DuplicateChannel`] if the derived identifier
    ///   already exists.
    pub async fn create_channel(
        &self,
        name: &str,
        description: &str,
        icon: &str,
        color: &str,
    ) -> Result<Channel> {
        let user = self
            .session
            .current_user()
            .ok_or(DevConnectError::Unauthenticated)?;

        let slug = slugify(name);
        if slug.is_empty() {
            return Err(DevConnectError::InvalidName(name.to_string()));
        }

        let existing = self.store.list_channels().await?;
        if existing.iter().any(|c| c.id.as_str() == slug) {
            return Err(DevConnectError::DuplicateChannel(slug));
        }

        let channel = Channel {
            id: slug.into(),
            name: name.trim().to_string(),
            description: description.trim().to_string(),
            icon: icon.to_string(),
            color: color.to_string(),
            created_by: user.id,
            created_at: Utc::now(),
        };

        let channel = self.store.insert_channel(channel).await?;
        tracing::debug!(
            target: "devconnect::channels::create_channel",
            "Created channel {}",
            channel.id
        );

        for listener in self.lock_channel_listeners().iter() {
            listener(&channel);
        }

        let channels = self.store.list_channels().await?;
        if let Err(e) = self.ui.on_channel_list_changed(&channels) {
            tracing::warn!(
                target: "devconnect::channels::create_channel",
                "Channel list callback failed: {}",
                e
            );
        }

        Ok(channel)
    }

    /// Registers a listener invoked whenever a channel is created through
    /// this broker instance. Listeners run in registration order.
    pub fn on_channel_created(&self, listener: impl Fn(&Channel) + Send + Sync + 'static) {
        self.lock_channel_listeners().push(Box::new(listener));
    }

    /// Inserts any default channel the store does not already hold.
    pub(crate) async fn seed_default_channels(&self) -> Result<()> {
        let existing = self.store.list_channels().await?;

        for channel in Channel::defaults() {
            if existing.iter().any(|c| c.id == channel.id) {
                continue;
            }
            let id = channel.id.clone();
            self.store.insert_channel(channel).await?;
            tracing::debug!(
                target: "devconnect::channels::seed_default_channels",
                "Seeded default channel {}",
                id
            );
        }

        Ok(())
    }
}
