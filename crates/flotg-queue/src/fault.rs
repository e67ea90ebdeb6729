//! Fault boundaries.
//!
//! Every unit of work handed to the queue, and every RPC call, runs inside a
//! boundary that turns a panic into a typed [`Fault`] after logging it. Nothing
//! else relies on unwinding for control flow.

use std::any::Any;
use std::backtrace::Backtrace;
use std::panic::{self, AssertUnwindSafe};

use flotg_types::{Level, Logger};

/// A panic caught at a fault boundary. The panic payload is logged, never
/// returned to callers.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("panic (details hidden): {title}")]
pub struct Fault {
    pub title: String,
}

impl Fault {
    pub fn new(title: impl Into<String>) -> Self {
        Self { title: title.into() }
    }
}

/// Run `f`, converting a panic into `Err(Fault)`.
pub fn contain<T>(
    logger: &Logger,
    kind: &'static str,
    title: &str,
    f: impl FnOnce() -> T,
) -> Result<T, Fault> {
    panic::catch_unwind(AssertUnwindSafe(f)).map_err(|payload| report(logger, kind, title, &*payload))
}

/// Log a caught panic payload and build the matching [`Fault`].
pub fn report(logger: &Logger, kind: &'static str, title: &str, payload: &(dyn Any + Send)) -> Fault {
    logger.message(
        Level::Critical,
        kind,
        format!("panic (err, stacktrace): {}", title),
        vec![
            ("err", format!("recovered from panic: {}", panic_message(payload))),
            ("stacktrace", Backtrace::force_capture().to_string()),
        ],
    );
    Fault::new(title)
}

/// Best-effort text of a panic payload.
pub fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
