//! Observability sink shared by every component.
//!
//! Components never reach for a global logger. They receive a [`Logger`] at
//! construction, which forwards structured records to a [`Sink`]: the
//! tracing-backed sink in the server, the null sink in tests.

use std::fmt;
use std::sync::Arc;

use rand::Rng;
use rand::distr::Alphanumeric;

/// Syslog-style severities, most verbose first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Level {
    Debug,
    Info,
    Notice,
    Warning,
    Error,
    Critical,
    Alert,
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Notice => "notice",
            Self::Warning => "warning",
            Self::Error => "error",
            Self::Critical => "critical",
            Self::Alert => "alert",
        };
        f.write_str(name)
    }
}

/// Extra key/value pairs attached to a record.
pub type Fields = Vec<(&'static str, String)>;

/// Destination for structured records.
pub trait Sink: Send + Sync {
    fn record(&self, level: Level, kind: &'static str, message: &str, fields: &[(&'static str, String)]);
}

/// Sink that forwards to the `tracing` crate.
pub struct TracingSink;

impl Sink for TracingSink {
    fn record(&self, level: Level, kind: &'static str, message: &str, fields: &[(&'static str, String)]) {
        let extras = render_fields(fields);
        match level {
            Level::Debug => tracing::debug!(kind, extras = %extras, "{}", message),
            Level::Info | Level::Notice => tracing::info!(kind, extras = %extras, "{}", message),
            Level::Warning => tracing::warn!(kind, extras = %extras, "{}", message),
            Level::Error | Level::Critical | Level::Alert => {
                tracing::error!(kind, severity = %level, extras = %extras, "{}", message)
            }
        }
    }
}

/// No-op sink that discards all records.
pub struct NullSink;

impl Sink for NullSink {
    fn record(&self, _level: Level, _kind: &'static str, _message: &str, _fields: &[(&'static str, String)]) {}
}

fn render_fields(fields: &[(&'static str, String)]) -> String {
    let mut out = String::new();
    for (i, (key, value)) in fields.iter().enumerate() {
        if i > 0 {
            out.push(' ');
        }
        out.push_str(key);
        out.push('=');
        out.push_str(value);
    }
    out
}

/// Cheap-to-clone handle over a sink, carrying a correlation id and sticky
/// fields that are attached to every record it emits.
#[derive(Clone)]
pub struct Logger {
    sink: Arc<dyn Sink>,
    request_uid: Option<Arc<str>>,
    fields: Arc<[(&'static str, String)]>,
}

impl Logger {
    pub fn new(sink: Arc<dyn Sink>) -> Self {
        Self {
            sink,
            request_uid: None,
            fields: Arc::from(Vec::new()),
        }
    }

    pub fn tracing() -> Self {
        Self::new(Arc::new(TracingSink))
    }

    pub fn null() -> Self {
        Self::new(Arc::new(NullSink))
    }

    /// Derive a child logger for one unit of work. Nested ids are joined with
    /// `/` so a record can be traced back through every enclosing request.
    pub fn with_request_id(&self, request_uid: &str, fields: Fields) -> Logger {
        let request_uid: Arc<str> = match &self.request_uid {
            Some(parent) => format!("{}/{}", parent, request_uid).into(),
            None => request_uid.into(),
        };

        let mut merged: Fields = self
            .fields
            .iter()
            .filter(|(key, _)| !fields.iter().any(|(k, _)| k == key))
            .cloned()
            .collect();
        merged.extend(fields);

        Logger {
            sink: self.sink.clone(),
            request_uid: Some(request_uid),
            fields: Arc::from(merged),
        }
    }

    pub fn request_uid(&self) -> Option<&str> {
        self.request_uid.as_deref()
    }

    /// Emit one record. `extra` overrides sticky fields with the same key.
    pub fn message(&self, level: Level, kind: &'static str, message: impl AsRef<str>, extra: Fields) {
        let mut all: Fields = Vec::with_capacity(self.fields.len() + extra.len() + 1);
        if let Some(uid) = &self.request_uid {
            all.push(("request_uid", uid.to_string()));
        }
        all.extend(
            self.fields
                .iter()
                .filter(|(key, _)| !extra.iter().any(|(k, _)| k == key))
                .cloned(),
        );
        all.extend(extra);

        self.sink.record(level, kind, message.as_ref(), &all);
    }
}

impl fmt::Debug for Logger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Logger")
            .field("request_uid", &self.request_uid)
            .field("fields", &self.fields)
            .finish_non_exhaustive()
    }
}

/// Random correlation id such as `rpc-Xy3kP0aQ`.
pub fn correlation_id(prefix: &str, len: usize) -> String {
    let suffix: String = rand::rng()
        .sample_iter(&Alphanumeric)
        .take(len)
        .map(char::from)
        .collect();
    format!("{}-{}", prefix, suffix)
}
