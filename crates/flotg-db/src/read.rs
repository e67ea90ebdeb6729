use rusqlite::Connection;
use rusqlite::types::ToSql;

use flotg_types::{Level, Logger, Message, Source};

use crate::containers::{SOURCES_CONTAINER, container_exists, container_name_for, quoted, validate_name};
use crate::snapshot::{self, SnapshotError};
use crate::{Database, Result};

const READ: &str = "storage_read";

impl Database {
    /// Every stored source when `uids` is empty, otherwise the exact matches,
    /// in ingestion order.
    pub fn read_sources(&self, logger: &Logger, uids: &[String]) -> Result<Vec<Source>> {
        let table = quoted(SOURCES_CONTAINER);
        let sql = if uids.is_empty() {
            format!("SELECT id, snapshot FROM {} ORDER BY created_at, rowid", table)
        } else {
            let placeholders: Vec<String> = (1..=uids.len()).map(|i| format!("?{}", i)).collect();
            format!(
                "SELECT id, snapshot FROM {} WHERE id IN ({}) ORDER BY created_at, rowid",
                table,
                placeholders.join(", ")
            )
        };
        let params: Vec<&dyn ToSql> = uids.iter().map(|uid| uid as &dyn ToSql).collect();

        let sources = self.with_conn(|conn| {
            if !container_exists(conn, SOURCES_CONTAINER)? {
                return Ok(Vec::new());
            }
            decode_rows(conn, logger, SOURCES_CONTAINER, &sql, &params, snapshot::decode_source)
        })?;

        logger.message(
            Level::Debug,
            READ,
            "Sources read",
            vec![("requested", uids.len().to_string()), ("found", sources.len().to_string())],
        );
        Ok(sources)
    }

    /// Every stored message of one conversation, oldest provider timestamp
    /// first.
    pub fn read_messages(&self, logger: &Logger, source_uid: &str) -> Result<Vec<Message>> {
        let container = container_name_for(source_uid);
        validate_name(&container)?;

        let sql = format!(
            "SELECT id, snapshot FROM {} ORDER BY message_created_at ASC, rowid",
            quoted(&container)
        );

        let messages = self.with_conn(|conn| {
            if !container_exists(conn, &container)? {
                return Ok(Vec::new());
            }
            decode_rows(conn, logger, &container, &sql, &[], snapshot::decode_message)
        })?;

        logger.message(
            Level::Debug,
            READ,
            "Messages read",
            vec![("collection", container), ("found", messages.len().to_string())],
        );
        Ok(messages)
    }
}

/// Run `sql` (selecting `id, snapshot`) and decode every row, skipping the
/// ones whose snapshot cannot be decoded.
fn decode_rows<T>(
    conn: &Connection,
    logger: &Logger,
    container: &str,
    sql: &str,
    params: &[&dyn ToSql],
    decode: fn(&[u8]) -> std::result::Result<T, SnapshotError>,
) -> Result<Vec<T>> {
    let mut stmt = conn.prepare(sql)?;
    let mut rows = stmt.query(params)?;
    let mut out = Vec::new();

    while let Some(row) = rows.next()? {
        let id: String = match row.get(0) {
            Ok(id) => id,
            Err(e) => {
                skip(logger, container, "<unreadable id>", &e.to_string());
                continue;
            }
        };
        let bytes: Vec<u8> = match row.get(1) {
            Ok(bytes) => bytes,
            Err(e) => {
                skip(logger, container, &id, &e.to_string());
                continue;
            }
        };
        match decode(&bytes) {
            Ok(record) => out.push(record),
            Err(e) => skip(logger, container, &id, &e.to_string()),
        }
    }

    Ok(out)
}

fn skip(logger: &Logger, container: &str, id: &str, err: &str) {
    logger.message(
        Level::Error,
        READ,
        "Failed to decode stored record, skipping",
        vec![
            ("collection", container.to_string()),
            ("id", id.to_string()),
            ("err", err.to_string()),
        ],
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::DateTime;
    use flotg_types::SourceFlags;

    fn source(id: i64, title: &str) -> Source {
        Source {
            flags: SourceFlags::V1 | SourceFlags::TG | SourceFlags::CHANNEL,
            source_uid: format!("tg-fromid-{}", id),
            title: title.into(),
            deep_id: id,
        }
    }

    fn message(source: &Source, raw_id: i64, unix: i64) -> Message {
        Message {
            flags: source.flags,
            created_at: DateTime::from_timestamp(unix, 0).unwrap(),
            source_uid: source.source_uid.clone(),
            message_uid: format!("{}-{}", source.source_uid, raw_id),
            text: format!("message {}", raw_id),
            links: vec![],
        }
    }

    #[test]
    fn empty_uid_list_reads_every_source_in_write_order() {
        let db = Database::open_in_memory().unwrap();
        let logger = Logger::null();
        let written: Vec<Source> = vec![source(3, "c"), source(1, "a"), source(2, "b")];
        for s in &written {
            db.write_source(&logger, s).unwrap();
        }

        assert_eq!(db.read_sources(&logger, &[]).unwrap(), written);

        let picked = db
            .read_sources(&logger, &["tg-fromid-2".to_string(), "tg-fromid-9".to_string()])
            .unwrap();
        assert_eq!(picked, vec![source(2, "b")]);
    }

    #[test]
    fn reads_before_any_write_are_empty() {
        let db = Database::open_in_memory().unwrap();
        let logger = Logger::null();
        assert!(db.read_sources(&logger, &[]).unwrap().is_empty());
        assert!(db.read_messages(&logger, "tg-fromid-42").unwrap().is_empty());
    }

    #[test]
    fn messages_read_back_in_send_time_order() {
        let db = Database::open_in_memory().unwrap();
        let logger = Logger::null();
        let src = source(42, "News");
        db.write_source(&logger, &src).unwrap();

        let late = message(&src, 9, 1_700_000_300);
        let early = message(&src, 8, 1_700_000_100);
        let middle = message(&src, 10, 1_700_000_200);
        for m in [&late, &early, &middle] {
            db.write_message(&logger, &src, m).unwrap();
        }

        let read = db.read_messages(&logger, "tg-fromid-42").unwrap();
        assert_eq!(read, vec![early, middle, late]);
    }

    #[test]
    fn undecodable_snapshots_are_skipped() {
        let db = Database::open_in_memory().unwrap();
        let logger = Logger::null();
        let src = source(42, "News");
        db.write_source(&logger, &src).unwrap();
        let good = message(&src, 1, 1_700_000_000);
        let bad = message(&src, 2, 1_700_000_001);
        db.write_message(&logger, &src, &good).unwrap();
        db.write_message(&logger, &src, &bad).unwrap();

        db.with_conn(|conn| {
            conn.execute(
                "UPDATE \"tg-fromid-42\" SET snapshot = x'ffffff' WHERE id = ?1",
                [&bad.message_uid],
            )?;
            Ok(())
        })
        .unwrap();

        assert_eq!(db.read_messages(&logger, "tg-fromid-42").unwrap(), vec![good]);
    }

    #[test]
    fn unsafe_source_uid_is_rejected() {
        let db = Database::open_in_memory().unwrap();
        let err = db.read_messages(&Logger::null(), "x\" OR 1=1").unwrap_err();
        assert!(matches!(err, crate::StorageError::InvalidContainerName(_)));
    }

    #[test]
    fn records_survive_reopening_the_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("flo_tg.db");
        let logger = Logger::null();
        let src = source(42, "News");
        let msg = message(&src, 7, 1_700_000_000);

        {
            let db = Database::open(&path).unwrap();
            db.write_source(&logger, &src).unwrap();
            db.write_message(&logger, &src, &msg).unwrap();
        }

        let db = Database::open(&path).unwrap();
        assert_eq!(db.write_message(&logger, &src, &msg).unwrap(), msg.message_uid);
        assert_eq!(db.read_sources(&logger, &[]).unwrap(), vec![src]);
        assert_eq!(db.read_messages(&logger, "tg-fromid-42").unwrap(), vec![msg]);
    }
}
