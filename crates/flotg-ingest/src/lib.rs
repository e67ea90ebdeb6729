//! Ingestion side of flotg: converts provider events into canonical records
//! and stores them through the operation queue.

pub mod converter;
pub mod feed;
pub mod peers;
pub mod pipeline;

pub use converter::{Converter, ProviderProfile};
pub use feed::{EventFeed, FeedError, FeedLine, FeedStats};
pub use peers::{PeerDirectory, PeerResolver, ResolveError};
pub use pipeline::{IngestError, Ingestor, StoreOutcome};
