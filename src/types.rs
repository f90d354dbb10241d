use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Identifier of a channel: a URL-safe slug derived from the channel name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChannelId(String);

impl ChannelId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ChannelId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ChannelId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for ChannelId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// A named, independently-addressable message stream.
///
/// Immutable after creation; never deleted in the current scope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Channel {
    pub id: ChannelId,
    pub name: String,
    pub description: String,
    /// UI icon token, e.g. `fa-hashtag`. The broker treats this as opaque.
    pub icon: String,
    /// UI color token. Opaque to the broker.
    pub color: String,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
}

impl Channel {
    /// The channels every fresh deployment starts with.
    pub fn defaults() -> Vec<Channel> {
        let seeded = [
            ("general", "General", "Community-wide discussion", "fa-hashtag", "gray"),
            ("javascript", "JavaScript", "Everything JS and the browser", "fa-js", "yellow"),
            ("python", "Python", "Python questions and snippets", "fa-python", "blue"),
            ("react", "React", "React and the frontend ecosystem", "fa-react", "cyan"),
            ("nodejs", "Node.js", "Server-side JavaScript", "fa-node-js", "green"),
            ("ai", "AI/ML", "Machine learning and AI tooling", "fa-robot", "purple"),
        ];
        seeded
            .into_iter()
            .map(|(id, name, description, icon, color)| Channel {
                id: ChannelId::new(id),
                name: name.to_string(),
                description: description.to_string(),
                icon: icon.to_string(),
                color: color.to_string(),
                created_by: "system".to_string(),
                created_at: Utc::now(),
            })
            .collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageType {
    Text,
    Code,
}

impl MessageType {
    /// Derives the message type and code language from the content.
    ///
    /// A fenced code block (```` ```lang ````) makes the message a `code`
    /// message; the token following the opening fence, if any, is the
    /// language.
    pub fn detect(content: &str) -> (Self, Option<String>) {
        match content.find("```") {
            Some(idx) => {
                let language: String = content[idx + 3..]
                    .chars()
                    .take_while(|c| c.is_alphanumeric())
                    .collect();
                let language = (!language.is_empty()).then_some(language);
                (MessageType::Code, language)
            }
            None => (MessageType::Text, None),
        }
    }
}

/// A message as stored by the backing store.
///
/// `id` and `created_at` are assigned by the store on append; the broker
/// never mutates a message afterwards. The ordering key is `created_at`,
/// with ties broken by insertion order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub channel_id: ChannelId,
    pub author_id: String,
    pub content: String,
    #[serde(rename = "message_type")]
    pub kind: MessageType,
    pub code_language: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// A change notification produced by a store's change feed.
///
/// Transient; produced once per insert and consumed once per subscriber.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ChangeEvent {
    /// A message was inserted into the watched channel.
    Insert(Message),
}

impl ChangeEvent {
    pub fn channel_id(&self) -> &ChannelId {
        match self {
            ChangeEvent::Insert(message) => &message.channel_id,
        }
    }
}

/// The identity the Session Gate reports for the current session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    pub email: String,
    pub name: String,
}

/// Authentication transitions emitted by the Session Gate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthEvent {
    SignedIn(User),
    SignedOut,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_channels_have_unique_ids() {
        let channels = Channel::defaults();
        assert!(!channels.is_empty());

        let mut ids: Vec<&str> = channels.iter().map(|c| c.id.as_str()).collect();
        ids.sort();
        ids.dedup();
        assert_eq!(ids.len(), channels.len());
        assert!(ids.contains(&"general"));
    }

    #[test]
    fn detect_plain_text() {
        let (kind, language) = MessageType::detect("hello world");
        assert_eq!(kind, MessageType::Text);
        assert!(language.is_none());
    }

    #[test]
    fn detect_code_with_language() {
        let (kind, language) = MessageType::detect("```rust\nfn main() {}\n```");
        assert_eq!(kind, MessageType::Code);
        assert_eq!(language.as_deref(), Some("rust"));
    }

    #[test]
    fn detect_code_without_language() {
        let (kind, language) = MessageType::detect("```\nplain block\n```");
        assert_eq!(kind, MessageType::Code);
        assert!(language.is_none());
    }

    #[test]
    fn message_type_serializes_lowercase() {
        assert_eq!(serde_json::to_string(&MessageType::Text).unwrap(), "\"text\"");
        assert_eq!(serde_json::to_string(&MessageType::Code).unwrap(), "\"code\"");
    }

    #[test]
    fn message_round_trips_with_wire_field_names() {
        let message = Message {
            id: "m1".to_string(),
            channel_id: ChannelId::new("general"),
            author_id: "u1".to_string(),
            content: "```python\nprint(1)\n```".to_string(),
            kind: MessageType::Code,
            code_language: Some("python".to_string()),
            created_at: Utc::now(),
        };

        let json = serde_json::to_value(&message).unwrap();
        assert_eq!(json["message_type"], "code");
        assert_eq!(json["channel_id"], "general");

        let back: Message = serde_json::from_value(json).unwrap();
        assert_eq!(back, message);
    }

    #[test]
    fn change_event_exposes_channel_id() {
        let message = Message {
            id: "m1".to_string(),
            channel_id: ChannelId::new("python"),
            author_id: "u1".to_string(),
            content: "hi".to_string(),
            kind: MessageType::Text,
            code_language: None,
            created_at: Utc::now(),
        };
        let event = ChangeEvent::Insert(message);
        assert_eq!(event.channel_id().as_str(), "python");
    }
}
