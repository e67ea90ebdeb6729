//! JSONL event feed.
//!
//! Each line is either a peer to remember or a provider event to ingest:
//!
//! ```text
//! {"type":"peer","peer":{"kind":"channel","id":42,"title":"News"}}
//! {"type":"event","event":{"type":"message","data":{"id":7,"date":1700000000,"peer":{"kind":"channel","id":42},"text":"hi"}}}
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::fs::File;
use tokio::io::{AsyncBufReadExt, BufReader};

use flotg_queue::CancellationToken;
use flotg_types::events::{ProviderEvent, ResolvedPeer};
use flotg_types::{Level, Logger};

use crate::peers::PeerDirectory;
use crate::pipeline::{IngestError, Ingestor};

const KIND: &str = "feed";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FeedLine {
    Peer { peer: ResolvedPeer },
    Event { event: ProviderEvent },
}

#[derive(Debug, thiserror::Error)]
pub enum FeedError {
    #[error("failed to read feed {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

/// Counters reported when the feed ends.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct FeedStats {
    pub peers: u64,
    pub stored: u64,
    pub dropped: u64,
    pub malformed: u64,
}

pub struct EventFeed {
    path: PathBuf,
    directory: Arc<PeerDirectory>,
    ingestor: Ingestor,
    logger: Logger,
}

impl EventFeed {
    pub fn new(path: impl Into<PathBuf>, directory: Arc<PeerDirectory>, ingestor: Ingestor, logger: Logger) -> Self {
        Self {
            path: path.into(),
            directory,
            ingestor,
            logger,
        }
    }

    /// Read the feed to its end, or until `cancel` fires. Each event is
    /// stored before the next line is read.
    pub async fn run(self, cancel: CancellationToken) -> Result<FeedStats, FeedError> {
        let io_err = |source| FeedError::Io {
            path: self.path.display().to_string(),
            source,
        };
        let file = File::open(&self.path).await.map_err(io_err)?;
        let mut lines = BufReader::new(file).lines();
        let mut stats = FeedStats::default();
        let mut line_no: u64 = 0;

        self.logger.message(
            Level::Info,
            KIND,
            "Event feed started",
            vec![("path", self.path.display().to_string())],
        );

        loop {
            let line = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                line = lines.next_line() => line.map_err(io_err)?,
            };
            let Some(line) = line else { break };
            line_no += 1;
            if line.trim().is_empty() {
                continue;
            }

            match serde_json::from_str::<FeedLine>(&line) {
                Ok(FeedLine::Peer { peer }) => {
                    if self.directory.insert(peer).await.is_some() {
                        stats.peers += 1;
                    } else {
                        stats.malformed += 1;
                    }
                }
                Ok(FeedLine::Event { event }) => match self.ingestor.ingest_and_wait(event).await {
                    Ok(outcome) if outcome.is_stored() => stats.stored += 1,
                    Ok(_) => stats.dropped += 1,
                    Err(IngestError::Queue(e)) => {
                        self.logger.message(
                            Level::Warning,
                            KIND,
                            "Queue unavailable, feed stops",
                            vec![("line", line_no.to_string()), ("err", e.to_string())],
                        );
                        break;
                    }
                    Err(e) => {
                        stats.dropped += 1;
                        self.logger.message(
                            Level::Debug,
                            KIND,
                            "Event not stored",
                            vec![("line", line_no.to_string()), ("err", e.to_string())],
                        );
                    }
                },
                Err(e) => {
                    stats.malformed += 1;
                    self.logger.message(
                        Level::Warning,
                        KIND,
                        "Malformed feed line skipped",
                        vec![("line", line_no.to_string()), ("err", e.to_string())],
                    );
                }
            }
        }

        self.logger.message(
            Level::Info,
            KIND,
            "Event feed finished",
            vec![
                ("peers", stats.peers.to_string()),
                ("stored", stats.stored.to_string()),
                ("dropped", stats.dropped.to_string()),
                ("malformed", stats.malformed.to_string()),
            ],
        );
        Ok(stats)
    }
}
