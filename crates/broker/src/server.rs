//! HTTP session endpoint
//!
//! `POST /session/create` takes a [`SessionRequest`] and always answers with
//! a [`SessionResponse`] body; the status code carries the failure class.

use std::sync::Arc;

use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{json, Value};
use tracing::debug;
use tunnelpass_core::{unix_now, SessionRequest, SessionResponse};

use crate::node::NodeBroker;
use crate::BrokerError;

pub fn router(broker: Arc<NodeBroker>) -> Router {
    Router::new()
        .route("/session/create", post(create_session))
        .route("/health", get(health))
        .with_state(broker)
}

/// HTTP status for a rejected session request
pub fn status_for(err: &BrokerError) -> StatusCode {
    match err {
        BrokerError::MalformedInput(_) => StatusCode::BAD_REQUEST,
        BrokerError::Forbidden(_) | BrokerError::InvalidCredential(_) => StatusCode::FORBIDDEN,
        BrokerError::PoolExhausted => StatusCode::SERVICE_UNAVAILABLE,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

async fn create_session(
    State(broker): State<Arc<NodeBroker>>,
    payload: Result<Json<SessionRequest>, JsonRejection>,
) -> (StatusCode, Json<SessionResponse>) {
    let request = match payload {
        Ok(Json(request)) => request,
        Err(rejection) => {
            debug!("Undecodable session request: {}", rejection.body_text());
            return (
                StatusCode::BAD_REQUEST,
                Json(SessionResponse::error(format!(
                    "malformed request: {}",
                    rejection.body_text()
                ))),
            );
        }
    };

    match broker.handle(&request, unix_now()).await {
        Ok(response) => (StatusCode::OK, Json(response)),
        Err(err) => (status_for(&err), Json(SessionResponse::error(err.to_string()))),
    }
}

async fn health(State(broker): State<Arc<NodeBroker>>) -> Json<Value> {
    let pool = broker.pool();
    Json(json!({
        "status": "ok",
        "backends": broker.config().backend_names(),
        "allocated": pool.allocated().await,
        "capacity": pool.capacity(),
    }))
}
