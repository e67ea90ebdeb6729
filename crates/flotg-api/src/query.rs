use axum::{
    Extension, Json,
    body::Body,
    extract::{Path, State, rejection::JsonRejection},
    http::header,
    response::{IntoResponse, Response},
};
use bytes::Bytes;
use serde::Serialize;

use flotg_db::StorageError;
use flotg_queue::contain;
use flotg_types::api::{GetSourcesRequest, NDJSON, ReadyResponse};
use flotg_types::{Level, Logger};

use crate::AppState;
use crate::call::CallContext;
use crate::error::ApiError;

const KIND: &str = "rpc_service";

/// GET /ready
pub async fn ready(State(state): State<AppState>) -> Result<Json<ReadyResponse>, ApiError> {
    if !state.queue.is_ready() {
        return Err(ApiError::NotReady);
    }
    Ok(Json(ReadyResponse { status: "ok".into() }))
}

/// GET /sources: every known source.
pub async fn list_sources(
    State(state): State<AppState>,
    Extension(call): Extension<CallContext>,
) -> Result<Response, ApiError> {
    read_sources(state, call, Vec::new()).await
}

/// POST /sources: the sources named in the body, or all of them for an
/// empty list.
pub async fn get_sources(
    State(state): State<AppState>,
    Extension(call): Extension<CallContext>,
    body: Result<Json<GetSourcesRequest>, JsonRejection>,
) -> Result<Response, ApiError> {
    let Json(req) = body.map_err(|e| ApiError::BadRequest(e.body_text()))?;
    read_sources(state, call, req.source_uids).await
}

/// GET /sources/{source_uid}/messages
pub async fn get_messages(
    State(state): State<AppState>,
    Extension(call): Extension<CallContext>,
    Path(source_uid): Path<String>,
) -> Result<Response, ApiError> {
    let db = state.db.clone();
    let logger = call.logger.with_request_id("read-messages", vec![("source_uid", source_uid.clone())]);

    let op_logger = logger.clone();
    let messages = submit_read(&state, &logger, "ReadMessages", move || {
        db.read_messages(&op_logger, &source_uid)
    })
    .await?;

    Ok(ndjson(messages, logger))
}

async fn read_sources(state: AppState, call: CallContext, uids: Vec<String>) -> Result<Response, ApiError> {
    let db = state.db.clone();
    let logger = call
        .logger
        .with_request_id("read-sources", vec![("requested", uids.len().to_string())]);

    let op_logger = logger.clone();
    let sources = submit_read(&state, &logger, "ReadSources", move || db.read_sources(&op_logger, &uids)).await?;

    Ok(ndjson(sources, logger))
}

/// Run a storage read through the queue behind a fault boundary. The call
/// gives up after `rpc_wait` even when the read has already started; the
/// read then finishes on the worker and its result is dropped.
async fn submit_read<T, F>(state: &AppState, logger: &Logger, title: &'static str, read: F) -> Result<T, ApiError>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T, StorageError> + Send + 'static,
{
    let op_logger = logger.clone();
    let submitted = state.queue.submit(&state.shutdown, state.submit_timeout, move |_ctx| {
        contain(&op_logger, KIND, title, read)
    });

    match tokio::time::timeout(state.rpc_wait, submitted).await {
        Ok(result) => Ok(result???),
        Err(_) => {
            logger.message(
                Level::Warning,
                KIND,
                "RPC wait elapsed, giving up on read",
                vec![("op", title.to_string()), ("rpc_wait", format!("{:?}", state.rpc_wait))],
            );
            Err(ApiError::Busy)
        }
    }
}

/// Stream `records` as newline-delimited JSON, in the order given.
fn ndjson<T>(records: Vec<T>, logger: Logger) -> Response
where
    T: Serialize + Send + 'static,
{
    let count = records.len();
    let stream = async_stream::stream! {
        for record in records {
            match serde_json::to_vec(&record) {
                Ok(mut line) => {
                    line.push(b'\n');
                    yield Ok::<_, std::io::Error>(Bytes::from(line));
                }
                Err(e) => logger.message(
                    Level::Error,
                    KIND,
                    "Failed to encode record, skipping",
                    vec![("err", e.to_string())],
                ),
            }
        }
        logger.message(Level::Debug, KIND, "Stream sent", vec![("records", count.to_string())]);
    };

    ([(header::CONTENT_TYPE, NDJSON)], Body::from_stream(stream)).into_response()
}
