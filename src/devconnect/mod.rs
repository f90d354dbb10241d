use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, RwLock};

use anyhow::Context;
use tokio::sync::broadcast;
use tokio::sync::mpsc::{self, Receiver, Sender};

mod channels;
mod dispatcher;
mod messages;
mod registry;
mod switching;

use crate::error::{DevConnectError, Result};
use crate::init_tracing;
use crate::session::SessionGate;
use crate::store::MessageStore;
use crate::types::{AuthEvent, ChannelId};
use crate::ui::UiSink;
use channels::ChannelCreatedCallback;
use registry::SubscriptionRegistry;

const DEFAULT_HISTORY_LIMIT: usize = 50;

#[derive(Clone, Debug)]
pub struct DevConnectConfig {
    /// Directory for application logs
    pub logs_dir: PathBuf,

    /// Number of messages loaded when entering a channel
    pub history_limit: usize,
}

impl DevConnectConfig {
    pub fn new(logs_dir: &Path) -> Self {
        let env_suffix = if cfg!(debug_assertions) {
            "dev"
        } else {
            "release"
        };

        Self {
            logs_dir: logs_dir.join(env_suffix),
            history_limit: DEFAULT_HISTORY_LIMIT,
        }
    }
}

/// The realtime broker: tracks which channel the client is listening to,
/// delivers newly created messages to the UI collaborator in creation
/// order, and keeps subscription state consistent across channel switches
/// and authentication transitions.
///
/// Constructed explicitly and shared via [`Arc`]; the store, session gate,
/// and UI sink are injected at construction time.
pub struct DevConnect {
    pub config: DevConnectConfig,
    pub(crate) store: Arc<dyn MessageStore>,
    pub(crate) session: Arc<dyn SessionGate>,
    pub(crate) ui: Arc<dyn UiSink>,
    pub(crate) registry: SubscriptionRegistry,
    current_channel: RwLock<Option<ChannelId>>,
    channel_listeners: Mutex<Vec<ChannelCreatedCallback>>,
    shutdown_sender: Sender<()>,
}

impl std::fmt::Debug for DevConnect {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DevConnect")
            .field("config", &self.config)
            .field("current_channel", &self.current_channel())
            .field("store", &"<REDACTED>")
            .field("session", &"<REDACTED>")
            .field("ui", &"<REDACTED>")
            .finish()
    }
}

impl DevConnect {
    /// Initializes the broker with the provided configuration and
    /// collaborators.
    ///
    /// This sets up the log directory and tracing, seeds the default
    /// channels if the backend is reachable, and starts the background
    /// loop that reacts to the Session Gate's sign-in/sign-out events.
    ///
    /// # Arguments
    ///
    /// * `config` - A [`DevConnectConfig`] specifying the logs directory
    ///   and history limit.
    /// * `store` - The persisted-store implementation, chosen at
    ///   construction time ([`crate::SupabaseStore`] or
    ///   [`crate::MemoryStore`]).
    /// * `session` - The external identity collaborator.
    /// * `ui` - The UI collaborator receiving history, message, and
    ///   channel-list callbacks.
    pub async fn initialize(
        config: DevConnectConfig,
        store: Arc<dyn MessageStore>,
        session: Arc<dyn SessionGate>,
        ui: Arc<dyn UiSink>,
    ) -> Result<Arc<Self>> {
        std::fs::create_dir_all(&config.logs_dir)
            .with_context(|| format!("Failed to create logs directory: {:?}", config.logs_dir))
            .map_err(DevConnectError::from)?;

        // Only initialize tracing once
        init_tracing(&config.logs_dir);

        tracing::debug!(
            target: "devconnect::initialize",
            "Logging initialized in directory: {:?}",
            config.logs_dir
        );

        let (shutdown_sender, shutdown_receiver) = mpsc::channel(1);
        let auth_receiver = session.subscribe();

        let broker = Arc::new(Self {
            config,
            store,
            session,
            ui,
            registry: SubscriptionRegistry::new(),
            current_channel: RwLock::new(None),
            channel_listeners: Mutex::new(Vec::new()),
            shutdown_sender,
        });

        // A missing backend means "no channels known yet", not a fatal
        // error; the UI shows a degraded state until channels appear.
        if let Err(e) = broker.seed_default_channels().await {
            tracing::warn!(
                target: "devconnect::initialize",
                "Skipping default channel seeding: {}",
                e
            );
        }

        Arc::clone(&broker).start_auth_loop(auth_receiver, shutdown_receiver);

        Ok(broker)
    }

    /// Background loop reacting to Session Gate transitions: `SignedIn`
    /// re-establishes the previously selected channel, `SignedOut` tears
    /// every subscription down.
    fn start_auth_loop(
        self: Arc<Self>,
        mut auth: broadcast::Receiver<AuthEvent>,
        mut shutdown: Receiver<()>,
    ) {
        tokio::spawn(async move {
            tracing::debug!(target: "devconnect::auth_loop", "Starting auth event loop");
            loop {
                tokio::select! {
                    event = auth.recv() => match event {
                        Ok(AuthEvent::SignedIn(user)) => self.handle_signed_in(&user).await,
                        Ok(AuthEvent::SignedOut) => self.handle_signed_out(),
                        Err(broadcast::error::RecvError::Lagged(skipped)) => {
                            tracing::warn!(
                                target: "devconnect::auth_loop",
                                "Auth event stream lagged, skipped {} events",
                                skipped
                            );
                        }
                        Err(broadcast::error::RecvError::Closed) => {
                            tracing::debug!(
                                target: "devconnect::auth_loop",
                                "Session gate dropped, exiting auth event loop"
                            );
                            break;
                        }
                    },
                    _ = shutdown.recv() => {
                        tracing::debug!(
                            target: "devconnect::auth_loop",
                            "Received shutdown signal, exiting auth event loop"
                        );
                        break;
                    }
                }
            }
        });
    }

    /// Tears down every subscription and stops the auth event loop.
    pub async fn shutdown(&self) -> Result<()> {
        self.registry.unsubscribe_all();
        match self.shutdown_sender.send(()).await {
            Ok(_) => Ok(()),
            Err(_) => Ok(()), // Expected if the loop already exited
        }
    }

    pub(crate) fn read_current(&self) -> Option<ChannelId> {
        self.current_channel
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub(crate) fn set_current(&self, value: Option<ChannelId>) {
        *self
            .current_channel
            .write()
            .unwrap_or_else(|e| e.into_inner()) = value;
    }

    pub(crate) fn lock_channel_listeners(
        &self,
    ) -> std::sync::MutexGuard<'_, Vec<ChannelCreatedCallback>> {
        self.channel_listeners
            .lock()
            .unwrap_or_else(|e| e.into_inner())
    }
}


#[cfg(test)]
mod tests {
    use super::test_utils::*;
    use super::*;

    #[test]
    fn config_appends_environment_suffix() {
        let logs_dir = std::path::Path::new("/test/logs");
        let config = DevConnectConfig::new(logs_dir);

        if cfg!(debug_assertions) {
            assert_eq!(config.logs_dir, logs_dir.join("dev"));
        } else {
            assert_eq!(config.logs_dir, logs_dir.join("release"));
        }
        assert_eq!(config.history_limit, DEFAULT_HISTORY_LIMIT);
    }

    #[tokio::test]
    async fn initialize_seeds_default_channels() {
        let test = create_test_broker().await;

        let channels = test.broker.list_channels().await.unwrap();
        assert_eq!(channels.len(), 6);
        assert!(channels.iter().any(|c| c.id.as_str() == "general"));
        assert!(test.broker.config.logs_dir.exists());
    }

    #[tokio::test]
    async fn initialize_is_idempotent_about_seeding() {
        let test = create_test_broker().await;

        // Re-running the seeding pass must not duplicate channels
        test.broker.seed_default_channels().await.unwrap();
        let channels = test.broker.list_channels().await.unwrap();
        assert_eq!(channels.len(), 6);
    }

    #[tokio::test]
    async fn debug_format_redacts_collaborators() {
        let test = create_test_broker().await;

        let debug_str = format!("{:?}", test.broker);
        assert!(debug_str.contains("DevConnect"));
        assert!(debug_str.contains("config"));
        assert!(debug_str.contains("<REDACTED>"));
    }

    #[tokio::test]
    async fn shutdown_is_safe_to_call_twice() {
        let test = create_test_broker().await;

        test.broker.shutdown().await.unwrap();
        test.broker.shutdown().await.unwrap();
        assert_eq!(test.broker.registry.active_count(), 0);
    }
}
