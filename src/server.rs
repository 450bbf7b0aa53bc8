//! HTTP/JSON surface over the store.
//!
//! Routes:
//! - `GET /health`
//! - `GET /summary` and `GET /details`: relays matching the filters
//! - `GET /statuses`: status history of one relay, flat or `condensed=true`

use std::{collections::HashMap, net::SocketAddr, sync::Arc};

use axum::{
    Json,
    Router,
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
};
use parking_lot::Mutex;
use serde::Serialize;

use crate::{
    error::{Error, Result},
    materialize::{RelayDetail, RelaySummary, RelaysResponse, StatusesResponse},
    query::SearchFilters,
    service,
    store::Store,
};

/// Shared state handed to every handler.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<Mutex<Store>>,
    /// Hard cap on rows returned by one request.
    pub result_limit: u64,
}

impl AppState {
    pub fn new(store: Store, result_limit: u64) -> Self {
        Self {
            store: Arc::new(Mutex::new(store)),
            result_limit,
        }
    }
}

/// Library errors as HTTP responses.
#[derive(Debug)]
pub struct ApiError(Error);

impl From<Error> for ApiError {
    fn from(err: Error) -> Self {
        Self(err)
    }
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: &'static str,
    message: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error, message) = match &self.0 {
            Error::InvalidInput(msg) => {
                (StatusCode::BAD_REQUEST, "bad_request", msg.clone())
            }
            Error::NotFound { .. } => {
                (StatusCode::NOT_FOUND, "not_found", self.0.to_string())
            }
            err => {
                tracing::error!(error = %err, "request failed");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal_error",
                    "An internal error occurred".to_string(),
                )
            }
        };
        (status, Json(ErrorBody { error, message })).into_response()
    }
}

type ApiResult<T> = std::result::Result<Json<T>, ApiError>;

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/summary", get(summary))
        .route("/details", get(details))
        .route("/statuses", get(statuses))
        .with_state(state)
}

/// Bind `addr` and serve until Ctrl-C.
pub async fn serve(state: AppState, addr: SocketAddr) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(addr = %listener.local_addr()?, "listening");
    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    tracing::info!("server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %err, "failed to listen for shutdown signal");
    }
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

async fn summary(
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
) -> ApiResult<RelaysResponse<RelaySummary>> {
    let filters = SearchFilters::from_params(&params)?;
    let store = state.store.lock();
    Ok(Json(service::summary(store.conn(), &filters, state.result_limit)?))
}

async fn details(
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
) -> ApiResult<RelaysResponse<RelayDetail>> {
    let filters = SearchFilters::from_params(&params)?;
    let store = state.store.lock();
    Ok(Json(service::details(store.conn(), &filters, state.result_limit)?))
}

async fn statuses(
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
) -> ApiResult<StatusesResponse> {
    let filters = SearchFilters::from_params(&params)?;
    let condensed = params
        .get("condensed")
        .is_some_and(|v| matches!(v.trim(), "true" | "1"));
    let store = state.store.lock();
    Ok(Json(service::statuses(
        store.conn(),
        &filters,
        state.result_limit,
        condensed,
    )?))
}
