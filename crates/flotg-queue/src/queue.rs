use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use flotg_types::{Level, Logger};

use crate::fault::{Fault, panic_message};

/// A unit of work. Runs on the blocking pool, one at a time.
pub type Op = Box<dyn FnOnce(&OpContext) + Send + 'static>;

/// Execution context handed to every operation.
#[derive(Debug, Clone)]
pub struct OpContext {
    cancel: CancellationToken,
}

impl OpContext {
    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueState {
    Uninitialized,
    Ready,
    Stopped,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum QueueError {
    #[error("not ready: queue")]
    NotReady,
    #[error("queue is full")]
    Full,
    #[error("queue is stopped")]
    Stopped,
    #[error("queue worker is already running")]
    AlreadyRunning,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SubmitError {
    #[error("operation did not start within {0:?}")]
    TimedOut(Duration),
    #[error("caller went away before the operation started")]
    Cancelled,
    #[error(transparent)]
    Queue(#[from] QueueError),
    #[error(transparent)]
    Fault(#[from] Fault),
}

impl SubmitError {
    /// Whether the caller may simply try again later.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::TimedOut(_) | Self::Queue(QueueError::Full))
    }
}

// Claim states of a submitted operation, shared between caller and worker.
const PENDING: u8 = 0;
const RUNNING: u8 = 1;
const ABANDONED: u8 = 2;
const EXPIRED: u8 = 3;

/// Single-consumer FIFO of storage operations.
///
/// Every read and write goes through one lane, so no two operations ever
/// overlap and a read enqueued after a write observes it. Cloning the handle
/// shares the same lane.
#[derive(Clone)]
pub struct Queue {
    inner: Arc<QueueInner>,
}

struct QueueInner {
    backlog: usize,
    lane: Mutex<Lane>,
    logger: Logger,
}

struct Lane {
    state: QueueState,
    tx: Option<mpsc::Sender<Op>>,
    rx: Option<mpsc::Receiver<Op>>,
    cancel: Option<CancellationToken>,
}

impl Queue {
    /// Create a queue holding at most `backlog` waiting operations.
    /// Operations may be enqueued before [`Queue::run`] starts draining them.
    pub fn new(backlog: usize, logger: Logger) -> Self {
        let backlog = backlog.max(1);
        let (tx, rx) = mpsc::channel(backlog);
        Self {
            inner: Arc::new(QueueInner {
                backlog,
                lane: Mutex::new(Lane {
                    state: QueueState::Uninitialized,
                    tx: Some(tx),
                    rx: Some(rx),
                    cancel: None,
                }),
                logger,
            }),
        }
    }

    fn lane(&self) -> MutexGuard<'_, Lane> {
        // Lane updates never panic mid-way, so a poisoned lock still holds a consistent lane.
        self.inner.lane.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn backlog(&self) -> usize {
        self.inner.backlog
    }

    /// Bind the worker context to `parent`; cancelling the parent stops the lane.
    pub fn initialize(&self, parent: &CancellationToken) -> Result<(), QueueError> {
        let mut lane = self.lane();
        match lane.state {
            QueueState::Uninitialized => {
                lane.cancel = Some(parent.child_token());
                lane.state = QueueState::Ready;
                Ok(())
            }
            QueueState::Ready => Ok(()),
            QueueState::Stopped => Err(QueueError::Stopped),
        }
    }

    pub fn state(&self) -> QueueState {
        self.lane().state
    }

    /// True only while the worker context and the intake are both live.
    pub fn is_ready(&self) -> bool {
        let lane = self.lane();
        lane.state == QueueState::Ready
            && lane.cancel.as_ref().is_some_and(|c| !c.is_cancelled())
            && lane.tx.as_ref().is_some_and(|tx| !tx.is_closed())
    }

    fn sender(&self) -> Result<mpsc::Sender<Op>, QueueError> {
        let lane = self.lane();
        match lane.state {
            QueueState::Stopped => Err(QueueError::Stopped),
            _ => lane.tx.clone().ok_or(QueueError::Stopped),
        }
    }

    /// Append `op`, waiting for room if the FIFO is full.
    pub async fn enqueue<F>(&self, op: F) -> Result<(), QueueError>
    where
        F: FnOnce(&OpContext) + Send + 'static,
    {
        let tx = self.sender()?;
        tx.send(Box::new(op)).await.map_err(|_| QueueError::Stopped)
    }

    /// Append `op` without waiting; fails with [`QueueError::Full`] when the
    /// FIFO has no room.
    pub fn try_enqueue<F>(&self, op: F) -> Result<(), QueueError>
    where
        F: FnOnce(&OpContext) + Send + 'static,
    {
        let tx = self.sender()?;
        tx.try_send(Box::new(op)).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => QueueError::Full,
            mpsc::error::TrySendError::Closed(_) => QueueError::Stopped,
        })
    }

    /// Enqueue `op` and wait for its result.
    ///
    /// `timeout` is measured from the call, covering both the wait for FIFO
    /// room and the wait for the worker. If it elapses, or `cancel` fires,
    /// before the worker picks the operation up, `op` never runs. Once the
    /// worker has started it, the operation runs to completion and its result
    /// is returned regardless of the timeout. Dropping the returned future
    /// before pickup has the same effect as cancelling.
    pub async fn submit<T, F>(
        &self,
        cancel: &CancellationToken,
        timeout: Duration,
        op: F,
    ) -> Result<T, SubmitError>
    where
        T: Send + 'static,
        F: FnOnce(&OpContext) -> T + Send + 'static,
    {
        let deadline = Instant::now() + timeout;
        let claim = Arc::new(AtomicU8::new(PENDING));
        let _abandon = AbandonOnDrop(claim.clone());
        let (done_tx, mut done_rx) = oneshot::channel::<T>();

        let worker_claim = claim.clone();
        let job: Op = Box::new(move |ctx: &OpContext| {
            if Instant::now() >= deadline {
                let _ = worker_claim.compare_exchange(PENDING, EXPIRED, Ordering::AcqRel, Ordering::Acquire);
                return;
            }
            if worker_claim
                .compare_exchange(PENDING, RUNNING, Ordering::AcqRel, Ordering::Acquire)
                .is_err()
            {
                return;
            }
            let _ = done_tx.send(op(ctx));
        });

        let tx = self.sender()?;
        tokio::select! {
            sent = tx.send(job) => sent.map_err(|_| QueueError::Stopped)?,
            _ = tokio::time::sleep_until(deadline) => return Err(SubmitError::TimedOut(timeout)),
            _ = cancel.cancelled() => return Err(SubmitError::Cancelled),
        }

        tokio::select! {
            done = &mut done_rx => return resolve(done.ok(), &claim, timeout),
            _ = tokio::time::sleep_until(deadline) => {}
            _ = cancel.cancelled() => {}
        }

        match claim.compare_exchange(PENDING, ABANDONED, Ordering::AcqRel, Ordering::Acquire) {
            Ok(_) if cancel.is_cancelled() => Err(SubmitError::Cancelled),
            Ok(_) => Err(SubmitError::TimedOut(timeout)),
            // Already running (or already resolved): wait for the outcome.
            Err(_) => resolve(done_rx.await.ok(), &claim, timeout),
        }
    }

    /// The worker loop. Executes one operation at a time until the queue is
    /// stopped or its parent context is cancelled. A panicking operation is
    /// logged and the loop carries on with the next one.
    pub async fn run(&self) -> Result<(), QueueError> {
        let (mut rx, cancel) = {
            let mut lane = self.lane();
            match lane.state {
                QueueState::Uninitialized => return Err(QueueError::NotReady),
                QueueState::Stopped => return Err(QueueError::Stopped),
                QueueState::Ready => {}
            }
            let cancel = lane.cancel.clone().ok_or(QueueError::NotReady)?;
            let rx = lane.rx.take().ok_or(QueueError::AlreadyRunning)?;
            (rx, cancel)
        };

        let logger = &self.inner.logger;
        logger.message(
            Level::Info,
            "queue",
            "Queue worker started",
            vec![("backlog", self.inner.backlog.to_string())],
        );

        let mut executed: u64 = 0;
        loop {
            let op = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                op = rx.recv() => match op {
                    Some(op) => op,
                    None => break,
                },
            };

            let ctx = OpContext {
                cancel: cancel.child_token(),
            };
            executed += 1;

            match tokio::task::spawn_blocking(move || op(&ctx)).await {
                Ok(()) => {}
                Err(e) if e.is_panic() => {
                    let reason = panic_message(&*e.into_panic());
                    logger.message(
                        Level::Critical,
                        "queue",
                        "Operation panicked, worker continues",
                        vec![("err", reason), ("op_seq", executed.to_string())],
                    );
                }
                Err(e) => {
                    logger.message(
                        Level::Error,
                        "queue",
                        "Operation task failed, worker continues",
                        vec![("err", e.to_string()), ("op_seq", executed.to_string())],
                    );
                }
            }
        }

        rx.close();
        let discarded = rx.len();
        drop(rx);
        self.stop();

        logger.message(
            Level::Info,
            "queue",
            "Queue worker exited",
            vec![
                ("executed", executed.to_string()),
                ("discarded", discarded.to_string()),
            ],
        );
        Ok(())
    }

    /// Cancel the worker context and close intake. Queued operations that
    /// have not started are discarded. A stopped queue cannot be restarted.
    pub fn stop(&self) {
        let mut lane = self.lane();
        if lane.state == QueueState::Stopped {
            return;
        }
        lane.state = QueueState::Stopped;
        if let Some(cancel) = lane.cancel.take() {
            cancel.cancel();
        }
        lane.tx = None;
        lane.rx = None;
        drop(lane);

        self.inner
            .logger
            .message(Level::Info, "queue", "Queue stopped", vec![]);
    }
}

/// Marks a still-pending submission as abandoned when the waiting caller goes
/// away, so the worker skips it.
struct AbandonOnDrop(Arc<AtomicU8>);

impl Drop for AbandonOnDrop {
    fn drop(&mut self) {
        let _ = self
            .0
            .compare_exchange(PENDING, ABANDONED, Ordering::AcqRel, Ordering::Acquire);
    }
}

fn resolve<T>(done: Option<T>, claim: &AtomicU8, timeout: Duration) -> Result<T, SubmitError> {
    match done {
        Some(value) => Ok(value),
        None => match claim.load(Ordering::Acquire) {
            RUNNING => Err(Fault::new("submitted operation").into()),
            EXPIRED => Err(SubmitError::TimedOut(timeout)),
            _ => Err(QueueError::Stopped.into()),
        },
    }
}
