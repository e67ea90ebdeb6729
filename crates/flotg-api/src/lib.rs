pub mod call;
pub mod error;
pub mod query;

use std::sync::Arc;
use std::time::Duration;

use axum::{Router, middleware, routing::get};
use tower_http::trace::TraceLayer;

use flotg_db::Database;
use flotg_queue::{CancellationToken, Queue};
use flotg_types::Logger;

pub use error::ApiError;

pub type AppState = Arc<AppStateInner>;

pub struct AppStateInner {
    pub queue: Queue,
    pub db: Arc<Database>,
    pub logger: Logger,
    /// Longest a read waits in the queue before the caller is told to retry.
    pub submit_timeout: Duration,
    /// Upper bound on a whole read call, including the time the read itself
    /// takes once the worker has picked it up.
    pub rpc_wait: Duration,
    /// Process-wide shutdown; cancels reads still waiting in the queue.
    pub shutdown: CancellationToken,
}

/// The query service routes. Every route runs behind the call wrapper.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/ready", get(query::ready))
        .route("/sources", get(query::list_sources).post(query::get_sources))
        .route("/sources/{source_uid}/messages", get(query::get_messages))
        .layer(middleware::from_fn_with_state(state.clone(), call::track_call))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
