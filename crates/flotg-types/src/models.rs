use std::fmt;
use std::ops::{BitOr, BitOrAssign};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Bitset carried by every Source and Message: schema version, provider and
/// endpoint kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SourceFlags(u32);

impl SourceFlags {
    pub const V1: Self = Self(1 << 0);
    pub const TG: Self = Self(1 << 1);
    pub const CHANNEL: Self = Self(1 << 2);
    pub const USER: Self = Self(1 << 3);
    pub const GROUP: Self = Self(1 << 4);
    pub const INVALID: Self = Self(1 << 15);

    pub const fn empty() -> Self {
        Self(0)
    }

    pub const fn from_bits(bits: u32) -> Self {
        Self(bits)
    }

    pub const fn bits(self) -> u32 {
        self.0
    }

    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn is_invalid(self) -> bool {
        self.contains(Self::INVALID)
    }

    /// Endpoint kind encoded in the flags. Anything without exactly one kind
    /// bit is treated as invalid.
    pub fn kind(self) -> SourceKind {
        if self.is_invalid() {
            return SourceKind::Invalid;
        }
        match (
            self.contains(Self::CHANNEL),
            self.contains(Self::USER),
            self.contains(Self::GROUP),
        ) {
            (true, false, false) => SourceKind::Channel,
            (false, true, false) => SourceKind::User,
            (false, false, true) => SourceKind::Group,
            _ => SourceKind::Invalid,
        }
    }
}

impl BitOr for SourceFlags {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl BitOrAssign for SourceFlags {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    Channel,
    User,
    Group,
    Invalid,
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Channel => "channel",
            Self::User => "user",
            Self::Group => "group",
            Self::Invalid => "invalid",
        };
        f.write_str(name)
    }
}

/// A conversation endpoint: channel, group or individual correspondent.
///
/// `source_uid` is the idempotency key and the name of the conversation's
/// message container. It is computed once from the raw provider id and never
/// recomputed, so later title changes keep the same key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Source {
    pub flags: SourceFlags,
    pub source_uid: String,
    pub title: String,
    pub deep_id: i64,
}

/// One ingested message. `message_uid` is `"<source_uid>-<raw message id>"`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub flags: SourceFlags,
    pub created_at: DateTime<Utc>,
    pub source_uid: String,
    pub message_uid: String,
    pub text: String,
    pub links: Vec<String>,
}

const FROM_ID_MARKER: &str = "-fromid-";

/// Recover the raw provider id from a `<prefix>-fromid-<id>` source uid.
pub fn parse_source_id(source_uid: &str) -> Option<i64> {
    let (prefix, rest) = source_uid.split_once(FROM_ID_MARKER)?;
    if prefix.is_empty() || rest.is_empty() || !rest.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    rest.parse().ok()
}

/// Recover the raw message id from a `<prefix>-fromid-<id>-<msgid>` message uid.
pub fn parse_message_id(message_uid: &str) -> Option<i64> {
    let (source_uid, raw) = message_uid.rsplit_once('-')?;
    parse_source_id(source_uid)?;
    if raw.is_empty() || !raw.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    raw.parse().ok()
}
