//! Per-call wrapper: correlation id, peer logging and the panic boundary
//! around every query handler.

use std::net::SocketAddr;
use std::panic::AssertUnwindSafe;

use axum::{
    extract::{ConnectInfo, Request, State},
    http::HeaderValue,
    middleware::Next,
    response::{IntoResponse, Response},
};
use futures_util::FutureExt;

use flotg_queue::fault;
use flotg_types::api::REQUEST_ID_HEADER;
use flotg_types::{Level, Logger, correlation_id};

use crate::AppState;
use crate::error::ApiError;

const KIND: &str = "rpc_call";

/// Request-scoped context handed to handlers through request extensions.
#[derive(Clone, Debug)]
pub struct CallContext {
    pub request_uid: String,
    pub logger: Logger,
}

pub async fn track_call(State(state): State<AppState>, mut req: Request, next: Next) -> Response {
    let request_uid = correlation_id("rpc", 8);
    let peer = req
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.to_string())
        .unwrap_or_else(|| "unknown".into());
    let method = format!("{} {}", req.method(), req.uri().path());

    let logger = state.logger.with_request_id(
        &request_uid,
        vec![("peer", peer), ("method", method)],
    );
    logger.message(Level::Info, KIND, "RPC call", vec![]);

    req.extensions_mut().insert(CallContext {
        request_uid: request_uid.clone(),
        logger: logger.clone(),
    });

    let mut response = match AssertUnwindSafe(next.run(req)).catch_unwind().await {
        Ok(response) => response,
        Err(payload) => ApiError::Fault(fault::report(&logger, KIND, "rpc call", &*payload)).into_response(),
    };

    let status = response.status();
    let level = if status.is_server_error() {
        Level::Error
    } else if status.is_client_error() {
        Level::Warning
    } else {
        Level::Debug
    };
    logger.message(level, KIND, "RPC call finished", vec![("status", status.as_u16().to_string())]);

    if let Ok(value) = HeaderValue::from_str(&request_uid) {
        response.headers_mut().insert(REQUEST_ID_HEADER, value);
    }
    response
}
