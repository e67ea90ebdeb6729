use chrono::{DateTime, Utc};

use flotg_types::events::{PlainMessage, ResolvedPeer};
use flotg_types::{Message, Source, SourceFlags};

/// Per-provider naming: the uid prefix, the deep-link base and the provider
/// flag stamped on every record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderProfile {
    pub uid_prefix: String,
    pub link_base: String,
    pub flag: SourceFlags,
}

impl ProviderProfile {
    pub fn telegram() -> Self {
        Self {
            uid_prefix: "tg".into(),
            link_base: "https://t.me".into(),
            flag: SourceFlags::TG,
        }
    }
}

impl Default for ProviderProfile {
    fn default() -> Self {
        Self::telegram()
    }
}

/// Pure event-to-record conversion. Never fails: input it cannot classify
/// yields a record carrying [`SourceFlags::INVALID`].
#[derive(Debug, Clone, Default)]
pub struct Converter {
    profile: ProviderProfile,
}

impl Converter {
    pub fn new(profile: ProviderProfile) -> Self {
        Self { profile }
    }

    pub fn profile(&self) -> &ProviderProfile {
        &self.profile
    }

    pub fn derive_source(&self, peer: &ResolvedPeer) -> Source {
        let (kind, id, title) = match peer {
            ResolvedPeer::Channel { id, title, .. } => (SourceFlags::CHANNEL, *id, title.clone()),
            ResolvedPeer::User {
                id,
                first_name,
                last_name,
                ..
            } => (
                SourceFlags::USER,
                *id,
                format!("{} {}", first_name, last_name).trim_matches(' ').to_string(),
            ),
            ResolvedPeer::Chat { id, title } => (SourceFlags::GROUP, *id, title.clone()),
            ResolvedPeer::Unknown => {
                return Source {
                    flags: SourceFlags::INVALID,
                    source_uid: String::new(),
                    title: String::new(),
                    deep_id: -1,
                };
            }
        };

        Source {
            flags: SourceFlags::V1 | self.profile.flag | kind,
            // Keyed on the raw id only; the endpoint kind lives in `flags`.
            source_uid: format!("{}-fromid-{}", self.profile.uid_prefix, id),
            title,
            deep_id: id,
        }
    }

    pub fn derive_message(&self, message: &PlainMessage, source: &Source) -> Message {
        let mut flags = source.flags;
        let created_at = match DateTime::<Utc>::from_timestamp(message.date, 0) {
            Some(at) => at,
            None => {
                flags |= SourceFlags::INVALID;
                DateTime::<Utc>::default()
            }
        };
        if source.source_uid.is_empty() {
            flags |= SourceFlags::INVALID;
        }

        Message {
            flags,
            created_at,
            source_uid: source.source_uid.clone(),
            message_uid: format!("{}-{}", source.source_uid, message.id),
            text: message.text.clone(),
            links: vec![format!(
                "{}/c/{}/{}",
                self.profile.link_base.trim_end_matches('/'),
                source.deep_id,
                message.id
            )],
        }
    }
}
