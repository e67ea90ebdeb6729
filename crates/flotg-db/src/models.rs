//! Persistence envelopes. The envelope id is the business uid, which is what
//! makes a repeated insert collide instead of duplicating.

use chrono::{DateTime, Utc};

use flotg_types::{Message, Source};

use crate::snapshot;

pub struct StoredSource {
    pub id: String,
    pub created_at: DateTime<Utc>,
    pub source: Source,
    pub snapshot: Vec<u8>,
}

impl StoredSource {
    pub fn new(source: &Source, created_at: DateTime<Utc>) -> Self {
        Self {
            id: source.source_uid.clone(),
            created_at,
            source: source.clone(),
            snapshot: snapshot::encode_source(source),
        }
    }
}

pub struct StoredMessage {
    pub id: String,
    pub created_at: DateTime<Utc>,
    pub message_created_at: DateTime<Utc>,
    pub message: Message,
    pub snapshot: Vec<u8>,
}

impl StoredMessage {
    pub fn new(message: &Message, created_at: DateTime<Utc>) -> Self {
        Self {
            id: message.message_uid.clone(),
            created_at,
            message_created_at: message.created_at,
            message: message.clone(),
            snapshot: snapshot::encode_message(message),
        }
    }
}
