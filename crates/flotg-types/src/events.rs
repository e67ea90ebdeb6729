use serde::{Deserialize, Serialize};

/// Reference to the conversation a provider update belongs to, before the
/// peer has been resolved to its full entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum PeerRef {
    User(i64),
    Chat(i64),
    Channel(i64),
}

/// Inbound provider updates the pipeline knows about.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum ProviderEvent {
    /// A regular message with text, posted in a chat or channel
    Message(PlainMessage),

    /// A service/system message (joins, pins, title changes)
    Service(ServiceMessage),

    /// Any update shape the pipeline does not handle
    Unsupported { kind: String },
}

impl ProviderEvent {
    /// Short name used in correlation ids and log lines.
    pub fn kind(&self) -> &str {
        match self {
            Self::Message(_) => "message",
            Self::Service(_) => "service",
            Self::Unsupported { kind } => kind,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlainMessage {
    /// Raw provider message id, unique within its peer.
    pub id: i64,
    /// Provider-reported send time, unix seconds.
    pub date: i64,
    pub peer: PeerRef,
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub post: bool,
    #[serde(default)]
    pub post_author: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceMessage {
    pub id: i64,
    pub date: i64,
    pub peer: PeerRef,
    pub action: String,
}

/// A peer after lookup in the peer database. `Unknown` covers lookups that
/// returned an entity shape the converter cannot classify.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ResolvedPeer {
    Channel {
        id: i64,
        title: String,
        #[serde(default)]
        username: Option<String>,
    },
    User {
        id: i64,
        #[serde(default)]
        first_name: String,
        #[serde(default)]
        last_name: String,
        #[serde(default)]
        username: Option<String>,
    },
    Chat {
        id: i64,
        title: String,
    },
    Unknown,
}

impl ResolvedPeer {
    pub fn peer_ref(&self) -> Option<PeerRef> {
        match self {
            Self::Channel { id, .. } => Some(PeerRef::Channel(*id)),
            Self::User { id, .. } => Some(PeerRef::User(*id)),
            Self::Chat { id, .. } => Some(PeerRef::Chat(*id)),
            Self::Unknown => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provider_event_wire_shape() {
        let json = r#"{"type":"message","data":{"id":7,"date":1700000000,"peer":{"kind":"channel","id":42},"text":"hi"}}"#;
        let event: ProviderEvent = serde_json::from_str(json).unwrap();
        match &event {
            ProviderEvent::Message(m) => {
                assert_eq!(m.id, 7);
                assert_eq!(m.peer, PeerRef::Channel(42));
                assert_eq!(m.text, "hi");
                assert!(!m.post);
                assert_eq!(m.post_author, None);
            }
            other => panic!("unexpected event {other:?}"),
        }
        assert_eq!(event.kind(), "message");

        let unsupported: ProviderEvent =
            serde_json::from_str(r#"{"type":"unsupported","data":{"kind":"update_user_typing"}}"#)
                .unwrap();
        assert_eq!(unsupported.kind(), "update_user_typing");
    }

    #[test]
    fn resolved_peer_refs() {
        let user = ResolvedPeer::User {
            id: 5,
            first_name: "Ada".into(),
            last_name: String::new(),
            username: None,
        };
        assert_eq!(user.peer_ref(), Some(PeerRef::User(5)));
        assert_eq!(ResolvedPeer::Unknown.peer_ref(), None);
    }
}
