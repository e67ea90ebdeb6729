//! Flotg operation queue: one serialized execution lane for every storage
//! read and write, with panic containment at each operation boundary.

pub mod fault;
mod queue;

pub use fault::{Fault, contain};
pub use queue::{Op, OpContext, Queue, QueueError, QueueState, SubmitError};
pub use tokio_util::sync::CancellationToken;
