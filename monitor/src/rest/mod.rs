mod alarms;
mod audit;
mod devices;
mod manufacturers;
mod readings;

use crate::engine::Engine;
use crate::errors::Error;
use crate::model::Actor;
use axum::{
    async_trait,
    extract::{
        rejection::{JsonRejection, QueryRejection},
        FromRequestParts,
    },
    http::{request::Parts, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, patch},
    Json, Router,
};
use serde_json::json;
use std::convert::Infallible;
use tower_http::trace::TraceLayer;
use tracing::error;

/// Request header naming the operator behind a mutating call.
pub const ACTOR_HEADER: &str = "x-actor";

#[derive(Clone)]
pub(crate) struct AppState {
    engine: Engine,
}

pub fn create_router(engine: Engine) -> Router {
    let state = AppState { engine };

    Router::new()
        .route("/health", get(health))
        .route(
            "/api/v1/devices",
            get(devices::list_devices).post(devices::create_device),
        )
        .route(
            "/api/v1/devices/:id",
            get(devices::get_device)
                .patch(devices::update_device)
                .delete(devices::delete_device),
        )
        .route("/api/v1/devices/:id/readings", get(devices::device_readings))
        .route("/api/v1/devices/:id/summary", get(devices::device_summary))
        .route(
            "/api/v1/readings",
            get(readings::list_readings).post(readings::ingest_reading),
        )
        .route("/api/v1/readings/:id", get(readings::get_reading))
        .route("/api/v1/summaries", get(devices::summaries))
        .route(
            "/api/v1/manufacturers",
            get(manufacturers::list_manufacturers).post(manufacturers::create_manufacturer),
        )
        .route(
            "/api/v1/manufacturers/:id",
            get(manufacturers::get_manufacturer)
                .patch(manufacturers::update_manufacturer)
                .put(manufacturers::update_manufacturer)
                .delete(manufacturers::delete_manufacturer),
        )
        .route("/api/v1/alarms", get(alarms::list_alarms))
        .route("/api/v1/alarms/:id", get(alarms::get_alarm))
        .route(
            "/api/v1/alarms/:id/acknowledge",
            patch(alarms::acknowledge_alarm),
        )
        .route("/api/v1/audit", get(audit::list_audit))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}

#[async_trait]
impl<S> FromRequestParts<S> for Actor
where
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let name = parts
            .headers
            .get(ACTOR_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(str::to_string);
        Ok(Actor(name))
    }
}

pub(crate) struct AppError(Error);

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code) = match &self.0 {
            Error::Validation(_) => (StatusCode::BAD_REQUEST, "VALIDATION_ERROR"),
            Error::NotFound { .. } => (StatusCode::NOT_FOUND, "NOT_FOUND"),
            Error::NoReadings(_) => (StatusCode::NOT_FOUND, "NO_READINGS"),
            Error::AlreadyAcknowledged(_) => (StatusCode::CONFLICT, "ALREADY_ACKNOWLEDGED"),
            Error::Conflict(_) => (StatusCode::CONFLICT, "CONFLICT"),
            e if e.is_transient() => (StatusCode::SERVICE_UNAVAILABLE, "UNAVAILABLE"),
            _ => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR"),
        };

        let message = if status.is_server_error() {
            error!("API error: {}", self.0);
            "An internal error occurred".to_string()
        } else {
            self.0.to_string()
        };

        (status, Json(json!({ "error": message, "code": code }))).into_response()
    }
}

impl From<Error> for AppError {
    fn from(err: Error) -> Self {
        Self(err)
    }
}

// Malformed bodies and query strings get the same error envelope as
// everything else.
impl From<JsonRejection> for AppError {
    fn from(rejection: JsonRejection) -> Self {
        Self(Error::Validation(rejection.body_text()))
    }
}

impl From<QueryRejection> for AppError {
    fn from(rejection: QueryRejection) -> Self {
        Self(Error::Validation(rejection.body_text()))
    }
}

pub(crate) type ApiResult<T> = Result<T, AppError>;
