pub mod api;
pub mod events;
pub mod models;
pub mod sink;

pub use models::{Message, Source, SourceFlags, SourceKind};
pub use sink::{Fields, Level, Logger, NullSink, Sink, TracingSink, correlation_id};
