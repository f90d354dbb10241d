//! Supabase-backed message store.
//!
//! Reads and writes go through the PostgREST surface (`/rest/v1`); the
//! change feed is the realtime websocket, joined with a
//! `postgres_changes` topic scoped to one channel by an equality filter
//! on `channel_id`. One socket is opened per watched channel and shared
//! by every receiver of that channel's feed.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use futures::{SinkExt, StreamExt};
use reqwest::header::{HeaderMap, HeaderValue};
use serde::Deserialize;
use serde_json::json;
use tokio::net::TcpStream;
use tokio::sync::broadcast;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};

use super::{MessageStore, NewMessage, Result, StoreError};
use crate::error::DevConnectError;
use crate::types::{Channel, ChannelId, ChangeEvent, Message};

const FEED_BUFFER: usize = 100;
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type FeedMap = Arc<DashMap<ChannelId, broadcast::Sender<ChangeEvent>>>;

#[derive(Debug, Clone)]
pub struct SupabaseConfig {
    /// Project base url, e.g. `https://xyzcompany.supabase.co`.
    pub url: String,
    /// Anonymous API key, sent as the `apikey` header.
    pub anon_key: String,
}

impl SupabaseConfig {
    pub fn new(url: impl Into<String>, anon_key: impl Into<String>) -> Self {
        let url: String = url.into();
        Self {
            url: url.trim_end_matches('/').to_string(),
            anon_key: anon_key.into(),
        }
    }

    /// Reads `DEVCONNECT_SUPABASE_URL` and `DEVCONNECT_SUPABASE_ANON_KEY`,
    /// loading a `.env` file first when one is present.
    pub fn from_env() -> crate::error::Result<Self> {
        dotenvy::dotenv().ok();
        let url = std::env::var("DEVCONNECT_SUPABASE_URL")
            .map_err(|_| DevConnectError::Configuration("DEVCONNECT_SUPABASE_URL is not set".to_string()))?;
        let anon_key = std::env::var("DEVCONNECT_SUPABASE_ANON_KEY").map_err(|_| {
            DevConnectError::Configuration("DEVCONNECT_SUPABASE_ANON_KEY is not set".to_string())
        })?;
        Ok(Self::new(url, anon_key))
    }
}

pub struct SupabaseStore {
    config: SupabaseConfig,
    http: reqwest::Client,
    feeds: FeedMap,
}

impl SupabaseStore {
    pub fn new(config: SupabaseConfig) -> crate::error::Result<Self> {
        let mut headers = HeaderMap::new();
        let api_key = HeaderValue::from_str(&config.anon_key)
            .map_err(|e| DevConnectError::Configuration(format!("invalid anon key: {}", e)))?;
        let bearer = HeaderValue::from_str(&format!("Bearer {}", config.anon_key))
            .map_err(|e| DevConnectError::Configuration(format!("invalid anon key: {}", e)))?;
        headers.insert("apikey", api_key);
        headers.insert("authorization", bearer);

        let http = reqwest::Client::builder()
            .default_headers(headers)
            .build()
            .map_err(|e| DevConnectError::Configuration(e.to_string()))?;

        Ok(Self {
            config,
            http,
            feeds: Arc::new(DashMap::new()),
        })
    }

    fn rest_url(&self, table: &str) -> String {
        format!("{}/rest/v1/{}", self.config.url, table)
    }

    fn realtime_url(&self) -> String {
        let ws_base = if self.config.url.starts_with("https") {
            self.config.url.replacen("https", "wss", 1)
        } else {
            self.config.url.replacen("http", "ws", 1)
        };
        format!(
            "{}/realtime/v1/websocket?apikey={}&vsn=1.0.0",
            ws_base, self.config.anon_key
        )
    }
}

fn join_frame(channel_id: &ChannelId) -> serde_json::Value {
    json!({
        "topic": format!("realtime:messages:{}", channel_id),
        "event": "phx_join",
        "ref": "1",
        "payload": {
            "config": {
                "postgres_changes": [{
                    "event": "INSERT",
                    "schema": "public",
                    "table": "messages",
                    "filter": format!("channel_id=eq.{}", channel_id),
                }],
            },
        },
    })
}

#[derive(Debug, Deserialize)]
struct RealtimeFrame {
    event: String,
    #[serde(default)]
    payload: serde_json::Value,
}

/// Extracts the inserted message from a `postgres_changes` frame, if the
/// frame is one.
fn parse_insert(text: &str) -> Option<Message> {
    let frame: RealtimeFrame = serde_json::from_str(text).ok()?;
    if frame.event != "postgres_changes" {
        return None;
    }
    let data = frame.payload.get("data")?;
    if data.get("type")?.as_str()? != "INSERT" {
        return None;
    }
    serde_json::from_value(data.get("record")?.clone()).ok()
}

/// Reader loop for one channel's realtime socket. Forwards INSERT records
/// into the channel's broadcast feed, answers pings, and keeps the
/// phoenix heartbeat alive. Exits once the socket closes or every feed
/// receiver is gone, removing the feed entry on the way out.
async fn pump_feed(
    mut ws: WsStream,
    channel_id: ChannelId,
    sender: broadcast::Sender<ChangeEvent>,
    feeds: FeedMap,
) {
    let mut heartbeat = tokio::time::interval(HEARTBEAT_INTERVAL);
    // The first tick fires immediately, right after the join.
    let mut frame_ref: u64 = 2;

    loop {
        tokio::select! {
            _ = heartbeat.tick() => {
                let frame = json!({
                    "topic": "phoenix",
                    "event": "heartbeat",
                    "payload": {},
                    "ref": frame_ref.to_string(),
                });
                frame_ref += 1;
                if ws.send(WsMessage::Text(frame.to_string())).await.is_err() {
                    tracing::warn!(
                        target: "devconnect::store::supabase",
                        "Heartbeat failed on realtime feed for channel {}",
                        channel_id
                    );
                    break;
                }
            }
            frame = ws.next() => {
                match frame {
                    Some(Ok(WsMessage::Text(text))) => {
                        if let Some(message) = parse_insert(&text) {
                            if sender.send(ChangeEvent::Insert(message)).is_err()
                                && sender.receiver_count() == 0
                            {
                                tracing::debug!(
                                    target: "devconnect::store::supabase",
                                    "No receivers left on channel {}, closing realtime feed",
                                    channel_id
                                );
                                break;
                            }
                        }
                    }
                    Some(Ok(WsMessage::Ping(payload))) => {
                        let _ = ws.send(WsMessage::Pong(payload)).await;
                    }
                    Some(Ok(WsMessage::Close(_))) | None => {
                        tracing::debug!(
                            target: "devconnect::store::supabase",
                            "Realtime socket for channel {} closed",
                            channel_id
                        );
                        break;
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        tracing::warn!(
                            target: "devconnect::store::supabase",
                            "Realtime socket error on channel {}: {}",
                            channel_id,
                            e
                        );
                        break;
                    }
                }
            }
        }
    }

    feeds.remove(&channel_id);
    let _ = ws.close(None).await;
}

#[async_trait]
impl MessageStore for SupabaseStore {
    async fn fetch_history(&self, channel_id: &ChannelId, limit: usize) -> Result<Vec<Message>> {
        let mut rows: Vec<Message> = self
            .http
            .get(self.rest_url("messages"))
            .query(&[
                ("select", "*".to_string()),
                ("channel_id", format!("eq.{}", channel_id)),
                ("order", "created_at.desc".to_string()),
                ("limit", limit.to_string()),
            ])
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        // The query returns newest first; callers get ascending order.
        rows.reverse();
        Ok(rows)
    }

    async fn append(&self, new: NewMessage) -> Result<Message> {
        let rows: Vec<Message> = self
            .http
            .post(self.rest_url("messages"))
            .header("prefer", "return=representation")
            .json(&new)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        rows.into_iter()
            .next()
            .ok_or_else(|| StoreError::UnexpectedResponse("empty insert response".to_string()))
    }

    async fn watch(&self, channel_id: &ChannelId) -> Result<broadcast::Receiver<ChangeEvent>> {
        if let Some(sender) = self.feeds.get(channel_id) {
            return Ok(sender.subscribe());
        }

        // Handshake before registering the feed so connection failures
        // surface to the caller instead of a silent dead feed.
        let (mut ws, _response) = connect_async(self.realtime_url()).await?;
        ws.send(WsMessage::Text(join_frame(channel_id).to_string()))
            .await?;

        match self.feeds.entry(channel_id.clone()) {
            Entry::Occupied(existing) => {
                // Lost the race to a concurrent watch; its socket wins.
                let receiver = existing.get().subscribe();
                let _ = ws.close(None).await;
                Ok(receiver)
            }
            Entry::Vacant(slot) => {
                let (sender, receiver) = broadcast::channel(FEED_BUFFER);
                slot.insert(sender.clone());
                tracing::debug!(
                    target: "devconnect::store::supabase",
                    "Opened realtime feed for channel {}",
                    channel_id
                );
                tokio::spawn(pump_feed(
                    ws,
                    channel_id.clone(),
                    sender,
                    Arc::clone(&self.feeds),
                ));
                Ok(receiver)
            }
        }
    }

    async fn list_channels(&self) -> Result<Vec<Channel>> {
        let rows: Vec<Channel> = self
            .http
            .get(self.rest_url("channels"))
            .query(&[("select", "*"), ("order", "created_at.asc")])
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        Ok(rows)
    }

    async fn insert_channel(&self, channel: Channel) -> Result<Channel> {
        let rows: Vec<Channel> = self
            .http
            .post(self.rest_url("channels"))
            .header("prefer", "return=representation")
            .json(&channel)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        rows.into_iter()
            .next()
            .ok_or_else(|| StoreError::UnexpectedResponse("empty insert response".to_string()))
    }
}
