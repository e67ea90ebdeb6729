use chrono::Utc;
use rusqlite::params;

use flotg_types::{Level, Logger, Message, Source};

use crate::containers::{ContainerKind, SOURCES_CONTAINER, container_name_for, quoted};
use crate::models::{StoredMessage, StoredSource};
use crate::{Database, Result, StorageError};

const SAVE: &str = "storage_save";

impl Database {
    /// Store `source` in the shared sources container, keyed by its uid.
    /// Storing the same uid again is a no-op that returns the same id.
    pub fn write_source(&self, logger: &Logger, source: &Source) -> Result<String> {
        if source.flags.is_invalid() || source.source_uid.is_empty() {
            return Err(StorageError::InvalidRecord(source.source_uid.clone()));
        }

        self.ensure_container(logger, SOURCES_CONTAINER, ContainerKind::Sources, "created_at")?;

        let stored = StoredSource::new(source, Utc::now());
        let logger = logger.with_request_id(
            "save-source",
            vec![
                ("collection", SOURCES_CONTAINER.to_string()),
                ("source_uid", stored.id.clone()),
            ],
        );

        let inserted = self.with_conn(|conn| {
            conn.execute(
                &format!(
                    "INSERT INTO {} (id, created_at, flags, source_uid, title, deep_id, snapshot)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                    quoted(SOURCES_CONTAINER)
                ),
                params![
                    stored.id,
                    stored.created_at.timestamp_millis(),
                    stored.source.flags.bits(),
                    stored.source.source_uid,
                    stored.source.title,
                    stored.source.deep_id,
                    stored.snapshot,
                ],
            )?;
            Ok(())
        });

        settle(&logger, inserted, stored.id)
    }

    /// Store `message` in the container of its conversation, creating the
    /// container on first use.
    pub fn write_message(&self, logger: &Logger, source: &Source, message: &Message) -> Result<String> {
        if source.flags.is_invalid() || message.flags.is_invalid() || message.message_uid.is_empty() {
            return Err(StorageError::InvalidRecord(message.message_uid.clone()));
        }
        if message.source_uid != source.source_uid {
            return Err(StorageError::InvalidRecord(format!(
                "{} does not belong to {}",
                message.message_uid, source.source_uid
            )));
        }

        let container = container_name_for(&source.source_uid);
        self.ensure_container(logger, &container, ContainerKind::Messages, "message_created_at")?;

        let stored = StoredMessage::new(message, Utc::now());
        let links = serde_json::to_string(&stored.message.links)
            .map_err(|e| StorageError::InvalidRecord(format!("links of {}: {}", stored.id, e)))?;
        let logger = logger.with_request_id(
            "save-message",
            vec![
                ("collection", container.clone()),
                ("message_uid", stored.id.clone()),
            ],
        );

        let inserted = self.with_conn(|conn| {
            conn.execute(
                &format!(
                    "INSERT INTO {} (id, created_at, message_created_at, flags, source_uid,
                                     message_uid, text, links, snapshot)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                    quoted(&container)
                ),
                params![
                    stored.id,
                    stored.created_at.timestamp_millis(),
                    stored.message_created_at.timestamp_millis(),
                    stored.message.flags.bits(),
                    stored.message.source_uid,
                    stored.message.message_uid,
                    stored.message.text,
                    links,
                    stored.snapshot,
                ],
            )?;
            Ok(())
        });

        settle(&logger, inserted, stored.id)
    }
}

/// A key collision means the record is already stored, which counts as success.
fn settle(logger: &Logger, inserted: Result<()>, id: String) -> Result<String> {
    match inserted {
        Ok(()) => {
            logger.message(Level::Info, SAVE, "Record saved", vec![("id", id.clone())]);
            Ok(id)
        }
        Err(e) if e.is_duplicate_key() => {
            logger.message(Level::Debug, SAVE, "Duplicate key error is OK", vec![("id", id.clone())]);
            Ok(id)
        }
        Err(e) => {
            logger.message(
                Level::Alert,
                SAVE,
                "Failed to save record",
                vec![("id", id), ("err", e.to_string())],
            );
            Err(e)
        }
    }
}
