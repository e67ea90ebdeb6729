use std::sync::Arc;

use tokio::sync::oneshot;

use flotg_db::{Database, StorageError};
use flotg_queue::{Fault, OpContext, Queue, QueueError, contain};
use flotg_types::events::ProviderEvent;
use flotg_types::{Level, Logger, Message, Source, correlation_id};

use crate::converter::Converter;
use crate::peers::{PeerResolver, ResolveError};

const KIND: &str = "ingest";

#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    #[error("unsupported event: {0}")]
    Unsupported(String),

    #[error("{0} events are not stored")]
    Ignored(String),

    #[error("peer resolution: {0}")]
    Resolve(#[from] ResolveError),

    #[error("invalid source for event {0}")]
    InvalidSource(String),

    #[error(transparent)]
    Queue(#[from] QueueError),

    #[error(transparent)]
    Fault(#[from] Fault),

    #[error("shutting down before the event was stored")]
    Cancelled,
}

/// What happened to one event's records. `message` is `None` when the source
/// write failed and the message write was never attempted.
#[derive(Debug)]
pub struct StoreOutcome {
    pub source: Result<String, StorageError>,
    pub message: Option<Result<String, StorageError>>,
}

impl StoreOutcome {
    pub fn is_stored(&self) -> bool {
        self.source.is_ok() && matches!(self.message, Some(Ok(_)))
    }
}

/// Bridges provider events into the queue. Peer resolution and conversion
/// happen on the caller; only the storage writes run inside the queue.
#[derive(Clone)]
pub struct Ingestor {
    queue: Queue,
    db: Arc<Database>,
    resolver: Arc<dyn PeerResolver>,
    converter: Converter,
    logger: Logger,
}

impl Ingestor {
    pub fn new(
        queue: Queue,
        db: Arc<Database>,
        resolver: Arc<dyn PeerResolver>,
        converter: Converter,
        logger: Logger,
    ) -> Self {
        Self {
            queue,
            db,
            resolver,
            converter,
            logger,
        }
    }

    /// Enqueue the writes for `event` and return once they are queued.
    pub async fn handle(&self, event: ProviderEvent) -> Result<(), IngestError> {
        let logger = self.event_logger(&event);
        let (source, message) = self.prepare(event, &logger).await?;

        let db = self.db.clone();
        self.queue
            .enqueue(move |ctx: &OpContext| {
                let _ = store_in_queue(&db, &logger, ctx, &source, &message);
            })
            .await?;
        Ok(())
    }

    /// Like [`Ingestor::handle`], but waits for the writes and returns their
    /// outcome.
    pub async fn ingest_and_wait(&self, event: ProviderEvent) -> Result<StoreOutcome, IngestError> {
        let logger = self.event_logger(&event);
        let (source, message) = self.prepare(event, &logger).await?;

        let db = self.db.clone();
        let (tx, rx) = oneshot::channel();
        self.queue
            .enqueue(move |ctx: &OpContext| {
                let _ = tx.send(store_in_queue(&db, &logger, ctx, &source, &message));
            })
            .await?;

        // A dropped sender means the queue discarded the operation.
        rx.await.map_err(|_| IngestError::Queue(QueueError::Stopped))?
    }

    fn event_logger(&self, event: &ProviderEvent) -> Logger {
        self.logger.with_request_id(
            &correlation_id(&format!("tg-{}", event.kind()), 5),
            vec![("event", event.kind().to_string())],
        )
    }

    async fn prepare(&self, event: ProviderEvent, logger: &Logger) -> Result<(Source, Message), IngestError> {
        let plain = match event {
            ProviderEvent::Message(plain) => plain,
            ProviderEvent::Service(service) => {
                logger.message(
                    Level::Debug,
                    KIND,
                    "Service message ignored",
                    vec![("action", service.action), ("message_id", service.id.to_string())],
                );
                return Err(IngestError::Ignored("service".into()));
            }
            ProviderEvent::Unsupported { kind } => {
                logger.message(Level::Warning, KIND, "Unsupported event dropped", vec![]);
                return Err(IngestError::Unsupported(kind));
            }
        };

        let fields = vec![
            ("peer_id", format!("{:?}", plain.peer)),
            ("message_id", plain.id.to_string()),
            ("is_post", plain.post.to_string()),
            ("post_author", plain.post_author.clone().unwrap_or_default()),
        ];
        logger.message(Level::Debug, KIND, "Message received", fields.clone());

        let peer = match self.resolver.resolve(plain.peer).await {
            Ok(peer) => peer,
            Err(e) => {
                logger.message(
                    Level::Critical,
                    KIND,
                    "Message lost! Peer not found in database",
                    [fields, vec![("err", e.to_string())]].concat(),
                );
                return Err(e.into());
            }
        };

        let source = self.converter.derive_source(&peer);
        if source.flags.is_invalid() {
            logger.message(Level::Error, KIND, "Message lost! Peer has no usable source", fields);
            return Err(IngestError::InvalidSource(format!("{:?}", plain.peer)));
        }
        let message = self.converter.derive_message(&plain, &source);

        logger.message(
            Level::Debug,
            KIND,
            "Records derived",
            vec![
                ("source_uid", source.source_uid.clone()),
                ("message_uid", message.message_uid.clone()),
            ],
        );
        Ok((source, message))
    }
}

/// Body of the queued operation: the writes, behind a fault boundary.
fn store_in_queue(
    db: &Database,
    logger: &Logger,
    ctx: &OpContext,
    source: &Source,
    message: &Message,
) -> Result<StoreOutcome, IngestError> {
    if ctx.is_cancelled() {
        logger.message(
            Level::Warning,
            KIND,
            "Shutting down, event not stored",
            vec![("message_uid", message.message_uid.clone())],
        );
        return Err(IngestError::Cancelled);
    }

    let outcome = contain(logger, "telegram_handler_wrapper", "store event", || {
        store(db, logger, source, message)
    })?;

    if !outcome.is_stored() {
        logger.message(Level::Error, KIND, "Handler returned with error", vec![]);
    }
    Ok(outcome)
}

fn store(db: &Database, logger: &Logger, source: &Source, message: &Message) -> StoreOutcome {
    let mut fields = vec![
        ("source_uid", source.source_uid.clone()),
        ("message_uid", message.message_uid.clone()),
    ];

    let source_id = db.write_source(logger, source);
    match &source_id {
        Ok(id) => {
            fields.push(("source_ref_id", id.clone()));
            logger.message(Level::Debug, KIND, "Source saved", fields.clone());
        }
        Err(e) => {
            logger.message(
                Level::Error,
                KIND,
                "Source storage failed",
                [fields, vec![("err", e.to_string())]].concat(),
            );
            return StoreOutcome {
                source: source_id,
                message: None,
            };
        }
    }

    let message_id = db.write_message(logger, source, message);
    match &message_id {
        Ok(id) => {
            fields.push(("message_ref_id", id.clone()));
            logger.message(Level::Debug, KIND, "Message saved", fields);
        }
        Err(e) => logger.message(
            Level::Error,
            KIND,
            "Message storage failed",
            [fields, vec![("err", e.to_string())]].concat(),
        ),
    }

    StoreOutcome {
        source: source_id,
        message: Some(message_id),
    }
}
