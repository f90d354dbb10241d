//! Fanout delivery loop: a direct conduit from a store change feed to one
//! subscriber callback.
//!
//! The loop performs no channel filtering of its own; `watch(channel)`
//! already scopes the feed. A failing callback is logged and never stops
//! delivery of subsequent events or affects the originating append.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use super::registry::EventCallback;
use crate::types::{ChannelId, ChangeEvent};

pub(crate) fn spawn_delivery_loop(
    channel_id: ChannelId,
    mut receiver: broadcast::Receiver<ChangeEvent>,
    on_event: EventCallback,
    closed: Arc<AtomicBool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            match receiver.recv().await {
                Ok(event) => {
                    // Checked per delivery so close() takes effect even
                    // mid-stream.
                    if closed.load(Ordering::SeqCst) {
                        break;
                    }
                    if let Err(e) = (on_event)(event) {
                        tracing::warn!(
                            target: "devconnect::dispatcher",
                            "Delivery callback failed on channel {}: {}",
                            channel_id,
                            e
                        );
                    }
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(
                        target: "devconnect::dispatcher",
                        "Subscriber on channel {} lagged, skipped {} events",
                        channel_id,
                        skipped
                    );
                }
                Err(broadcast::error::RecvError::Closed) => {
                    tracing::debug!(
                        target: "devconnect::dispatcher",
                        "Change feed for channel {} closed, ending delivery loop",
                        channel_id
                    );
                    break;
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;
    use std::time::Duration;

    use chrono::Utc;
    use tokio::time::sleep;

    use super::*;
    use crate::types::{Message, MessageType};

    fn make_message(id: &str) -> Message {
        Message {
            id: id.to_string(),
            channel_id: ChannelId::new("general"),
            author_id: "u1".to_string(),
            content: format!("content {}", id),
            kind: MessageType::Text,
            code_language: None,
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn events_are_delivered_in_order() {
        let (sender, receiver) = broadcast::channel(16);
        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen_by_callback = Arc::clone(&seen);

        let _task = spawn_delivery_loop(
            ChannelId::new("general"),
            receiver,
            Arc::new(move |event| {
                let ChangeEvent::Insert(message) = event;
                seen_by_callback.lock().unwrap().push(message.id);
                Ok(())
            }),
            Arc::new(AtomicBool::new(false)),
        );

        for id in ["m1", "m2", "m3"] {
            sender.send(ChangeEvent::Insert(make_message(id))).unwrap();
        }
        sleep(Duration::from_millis(50)).await;

        assert_eq!(*seen.lock().unwrap(), vec!["m1", "m2", "m3"]);
    }

    #[tokio::test]
    async fn failing_callback_does_not_stop_the_loop() {
        let (sender, receiver) = broadcast::channel(16);
        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen_by_callback = Arc::clone(&seen);

        let _task = spawn_delivery_loop(
            ChannelId::new("general"),
            receiver,
            Arc::new(move |event| {
                let ChangeEvent::Insert(message) = event;
                seen_by_callback.lock().unwrap().push(message.id.clone());
                if message.id == "m1" {
                    return Err("renderer exploded".into());
                }
                Ok(())
            }),
            Arc::new(AtomicBool::new(false)),
        );

        sender.send(ChangeEvent::Insert(make_message("m1"))).unwrap();
        sender.send(ChangeEvent::Insert(make_message("m2"))).unwrap();
        sleep(Duration::from_millis(50)).await;

        assert_eq!(*seen.lock().unwrap(), vec!["m1", "m2"]);
    }

    #[tokio::test]
    async fn closed_flag_stops_delivery() {
        let (sender, receiver) = broadcast::channel(16);
        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen_by_callback = Arc::clone(&seen);
        let closed = Arc::new(AtomicBool::new(false));

        let _task = spawn_delivery_loop(
            ChannelId::new("general"),
            receiver,
            Arc::new(move |event| {
                let ChangeEvent::Insert(message) = event;
                seen_by_callback.lock().unwrap().push(message.id);
                Ok(())
            }),
            Arc::clone(&closed),
        );

        closed.store(true, Ordering::SeqCst);
        sender.send(ChangeEvent::Insert(make_message("m1"))).unwrap();
        sleep(Duration::from_millis(50)).await;

        assert!(seen.lock().unwrap().is_empty());
    }
}
