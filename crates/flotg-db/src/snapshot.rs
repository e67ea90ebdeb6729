//! Binary replay snapshots stored next to every structured record.
//!
//! Protobuf keeps the snapshot readable across schema changes: unknown tags
//! are skipped on decode and missing tags fall back to defaults.

use chrono::DateTime;
use prost::Message as _;

use flotg_types::{Message, Source, SourceFlags};

#[derive(Debug, thiserror::Error)]
pub enum SnapshotError {
    #[error("protobuf decode: {0}")]
    Decode(#[from] prost::DecodeError),
    #[error("snapshot carries no uid")]
    MissingUid,
    #[error("timestamp out of range: {0}ms")]
    Timestamp(i64),
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct SourceSnapshot {
    #[prost(uint32, tag = "1")]
    pub flags: u32,
    #[prost(string, tag = "2")]
    pub source_uid: String,
    #[prost(string, tag = "3")]
    pub title: String,
    #[prost(int64, tag = "4")]
    pub deep_id: i64,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct MessageSnapshot {
    #[prost(uint32, tag = "1")]
    pub flags: u32,
    #[prost(int64, tag = "2")]
    pub created_at_unix_ms: i64,
    #[prost(string, tag = "3")]
    pub source_uid: String,
    #[prost(string, tag = "4")]
    pub message_uid: String,
    #[prost(string, tag = "5")]
    pub text: String,
    #[prost(string, repeated, tag = "6")]
    pub links: Vec<String>,
}

pub fn encode_source(source: &Source) -> Vec<u8> {
    SourceSnapshot {
        flags: source.flags.bits(),
        source_uid: source.source_uid.clone(),
        title: source.title.clone(),
        deep_id: source.deep_id,
    }
    .encode_to_vec()
}

pub fn decode_source(bytes: &[u8]) -> Result<Source, SnapshotError> {
    let snap = SourceSnapshot::decode(bytes)?;
    if snap.source_uid.is_empty() {
        return Err(SnapshotError::MissingUid);
    }
    Ok(Source {
        flags: SourceFlags::from_bits(snap.flags),
        source_uid: snap.source_uid,
        title: snap.title,
        deep_id: snap.deep_id,
    })
}

pub fn encode_message(message: &Message) -> Vec<u8> {
    MessageSnapshot {
        flags: message.flags.bits(),
        created_at_unix_ms: message.created_at.timestamp_millis(),
        source_uid: message.source_uid.clone(),
        message_uid: message.message_uid.clone(),
        text: message.text.clone(),
        links: message.links.clone(),
    }
    .encode_to_vec()
}

pub fn decode_message(bytes: &[u8]) -> Result<Message, SnapshotError> {
    let snap = MessageSnapshot::decode(bytes)?;
    if snap.message_uid.is_empty() || snap.source_uid.is_empty() {
        return Err(SnapshotError::MissingUid);
    }
    let created_at = DateTime::from_timestamp_millis(snap.created_at_unix_ms)
        .ok_or(SnapshotError::Timestamp(snap.created_at_unix_ms))?;
    Ok(Message {
        flags: SourceFlags::from_bits(snap.flags),
        created_at,
        source_uid: snap.source_uid,
        message_uid: snap.message_uid,
        text: snap.text,
        links: snap.links,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use prost::Message as _;

    #[derive(Clone, PartialEq, prost::Message)]
    struct SourceSnapshotV2 {
        #[prost(uint32, tag = "1")]
        flags: u32,
        #[prost(string, tag = "2")]
        source_uid: String,
        #[prost(string, tag = "3")]
        title: String,
        #[prost(int64, tag = "4")]
        deep_id: i64,
        #[prost(string, tag = "5")]
        username: String,
    }

    #[test]
    fn newer_snapshots_still_decode() {
        let bytes = SourceSnapshotV2 {
            flags: 7,
            source_uid: "tg-fromid-42".into(),
            title: "News".into(),
            deep_id: 42,
            username: "news".into(),
        }
        .encode_to_vec();

        let source = decode_source(&bytes).unwrap();
        assert_eq!(source.source_uid, "tg-fromid-42");
        assert_eq!(source.title, "News");
        assert_eq!(source.deep_id, 42);
    }

    #[test]
    fn garbage_and_empty_snapshots_are_rejected() {
        assert!(matches!(decode_source(&[0xff, 0xff, 0xff]), Err(SnapshotError::Decode(_))));
        assert!(matches!(decode_source(&[]), Err(SnapshotError::MissingUid)));
        assert!(matches!(decode_message(&[]), Err(SnapshotError::MissingUid)));
    }

    #[test]
    fn message_timestamp_keeps_millisecond_precision() {
        let message = Message {
            flags: SourceFlags::V1,
            created_at: DateTime::from_timestamp_millis(1_700_000_000_123).unwrap(),
            source_uid: "tg-fromid-1".into(),
            message_uid: "tg-fromid-1-2".into(),
            text: "x".into(),
            links: vec!["a".into(), "b".into()],
        };
        assert_eq!(decode_message(&encode_message(&message)).unwrap(), message);
    }
}
