use rusqlite::{Connection, OptionalExtension};

use flotg_types::{Level, Logger};

use crate::{Database, Result, StorageError};

/// Shared container holding every Source envelope.
pub const SOURCES_CONTAINER: &str = "tgv1-sources";

/// Schema family of a container. Each kind has its own set of orderable
/// columns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContainerKind {
    Sources,
    Messages,
}

impl ContainerKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Sources => "sources",
            Self::Messages => "messages",
        }
    }

    fn columns(self) -> &'static str {
        match self {
            Self::Sources => {
                "id          TEXT PRIMARY KEY,
                created_at  INTEGER NOT NULL,
                flags       INTEGER NOT NULL,
                source_uid  TEXT NOT NULL,
                title       TEXT NOT NULL,
                deep_id     INTEGER NOT NULL,
                snapshot    BLOB NOT NULL"
            }
            Self::Messages => {
                "id                  TEXT PRIMARY KEY,
                created_at          INTEGER NOT NULL,
                message_created_at  INTEGER NOT NULL,
                flags               INTEGER NOT NULL,
                source_uid          TEXT NOT NULL,
                message_uid         TEXT NOT NULL,
                text                TEXT NOT NULL,
                links               TEXT NOT NULL,
                snapshot            BLOB NOT NULL"
            }
        }
    }

    fn orderable(self) -> &'static [&'static str] {
        match self {
            Self::Sources => &["created_at"],
            Self::Messages => &["created_at", "message_created_at"],
        }
    }
}

/// Container holding the messages of one conversation.
pub fn container_name_for(source_uid: &str) -> String {
    source_uid.trim_matches(|c: char| c == '-' || c == ' ').to_string()
}

pub(crate) fn validate_name(name: &str) -> Result<()> {
    let valid = !name.is_empty()
        && name.len() <= 128
        && name
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_');
    if valid {
        Ok(())
    } else {
        Err(StorageError::InvalidContainerName(name.to_string()))
    }
}

/// Quote a validated container name for use as an SQL identifier.
pub(crate) fn quoted(name: &str) -> String {
    format!("\"{}\"", name)
}

pub(crate) fn container_exists(conn: &Connection, name: &str) -> Result<bool> {
    let found = conn
        .query_row(
            "SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = ?1",
            [name],
            |row| row.get::<_, i64>(0),
        )
        .optional()?;
    Ok(found.is_some())
}

impl Database {
    /// Create the container `name` ordered by `ordering_field` unless it
    /// already exists. Returns whether this call created it.
    ///
    /// Another process may create the same container between the existence
    /// check and the create; that race is settled by checking again.
    pub fn ensure_container(
        &self,
        logger: &Logger,
        name: &str,
        kind: ContainerKind,
        ordering_field: &str,
    ) -> Result<bool> {
        validate_name(name)?;
        if !kind.orderable().contains(&ordering_field) {
            return Err(StorageError::UnknownOrderingField {
                kind: kind.as_str(),
                field: ordering_field.to_string(),
            });
        }

        let fields = || {
            vec![
                ("col_name", name.to_string()),
                ("col_time_field", ordering_field.to_string()),
            ]
        };

        self.with_conn(|conn| {
            if container_exists(conn, name)? {
                logger.message(Level::Debug, "storage_save", "Collection exists already", fields());
                return Ok(false);
            }

            let table = quoted(name);
            let create = format!("CREATE TABLE {} ({})", table, kind.columns());
            if let Err(e) = conn.execute(&create, []) {
                if container_exists(conn, name)? {
                    logger.message(
                        Level::Debug,
                        "storage_save",
                        "Collection created concurrently, continuing",
                        fields(),
                    );
                } else {
                    logger.message(
                        Level::Alert,
                        "storage_save",
                        "Failed to create collection",
                        [fields(), vec![("err", e.to_string())]].concat(),
                    );
                    return Err(e.into());
                }
            }

            conn.execute(
                &format!(
                    "CREATE INDEX IF NOT EXISTS {} ON {} ({})",
                    quoted(&format!("{}_by_{}", name, ordering_field)),
                    table,
                    ordering_field
                ),
                [],
            )?;

            logger.message(Level::Info, "storage_save", "Collection created as time-ordered", fields());
            Ok(true)
        })
    }

    /// Names of every container currently present.
    pub fn container_names(&self) -> Result<Vec<String>> {
        self.with_conn(|conn| {
            let mut stmt =
                conn.prepare("SELECT name FROM sqlite_master WHERE type = 'table' ORDER BY name")?;
            let names = stmt
                .query_map([], |row| row.get::<_, String>(0))?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(names)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn creates_once_then_reports_existing() {
        let db = Database::open_in_memory().unwrap();
        let logger = Logger::null();

        assert!(db.ensure_container(&logger, "tg-fromid-42", ContainerKind::Messages, "message_created_at").unwrap());
        assert!(!db.ensure_container(&logger, "tg-fromid-42", ContainerKind::Messages, "message_created_at").unwrap());
        assert_eq!(db.container_names().unwrap(), vec!["tg-fromid-42".to_string()]);
    }

    #[test]
    fn tolerates_container_created_behind_its_back() {
        let db = Database::open_in_memory().unwrap();
        db.with_conn(|conn| {
            conn.execute_batch(&format!(
                "CREATE TABLE {} ({})",
                quoted(SOURCES_CONTAINER),
                ContainerKind::Sources.columns()
            ))?;
            Ok(())
        })
        .unwrap();

        let created = db
            .ensure_container(&Logger::null(), SOURCES_CONTAINER, ContainerKind::Sources, "created_at")
            .unwrap();
        assert!(!created);
    }

    #[test]
    fn rejects_unsafe_names_and_fields() {
        let db = Database::open_in_memory().unwrap();
        let logger = Logger::null();

        let err = db
            .ensure_container(&logger, "x\"; DROP TABLE y; --", ContainerKind::Messages, "created_at")
            .unwrap_err();
        assert!(matches!(err, StorageError::InvalidContainerName(_)));

        let err = db
            .ensure_container(&logger, "tg-fromid-1", ContainerKind::Sources, "message_created_at")
            .unwrap_err();
        assert!(matches!(err, StorageError::UnknownOrderingField { .. }));
    }

    #[test]
    fn container_names_trim_separators() {
        assert_eq!(container_name_for("tg-fromid-42"), "tg-fromid-42");
        assert_eq!(container_name_for(" -tg-fromid-42- "), "tg-fromid-42");
    }
}
