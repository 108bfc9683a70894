use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use butler_schemas::{ErrorKind, ToolError};
use serde::Serialize;
use serde_json::Value;

use crate::tool::ToolRegistry;

#[derive(Clone)]
pub struct RpcState {
    pub registry: Arc<ToolRegistry>,
}

#[derive(Serialize)]
struct HealthBody {
    ok: bool,
    tool_count: usize,
}

#[derive(Serialize)]
struct ErrorBody {
    error: ToolError,
}

/// Builds the tool-call router for one butler. `main.rs`-equivalent callers
/// attach tracing/CORS layers after this, the same way `mqk-daemon` does.
pub fn build_router(registry: Arc<ToolRegistry>) -> Router {
    Router::new()
        .route("/v1/health", get(health))
        .route("/v1/tools/:name", post(call_tool))
        .with_state(RpcState { registry })
}

async fn health(State(st): State<RpcState>) -> impl IntoResponse {
    (
        StatusCode::OK,
        Json(HealthBody {
            ok: true,
            tool_count: st.registry.names().count(),
        }),
    )
}

async fn call_tool(
    State(st): State<RpcState>,
    Path(name): Path<String>,
    body: Option<Json<Value>>,
) -> Response {
    let args = body.map(|Json(v)| v).unwrap_or(Value::Null);

    match st.registry.dispatch(&name, args).await {
        Ok(result) => (StatusCode::OK, Json(result)).into_response(),
        Err(err) => (status_for(&err), Json(ErrorBody { error: err })).into_response(),
    }
}

/// Maps a tool-boundary error class to a transport status code. The error
/// class itself, not the status code, is the source of truth for callers —
/// this mapping only exists for conventional HTTP tooling (curl, browsers).
fn status_for(err: &ToolError) -> StatusCode {
    if err.class == ErrorKind::NotFound.as_str() {
        StatusCode::NOT_FOUND
    } else if err.class == ErrorKind::ValidationError.as_str() {
        StatusCode::BAD_REQUEST
    } else if err.class == ErrorKind::Conflict.as_str()
        || err.class == ErrorKind::CasConflict.as_str()
        || err.class == ErrorKind::AlreadyDiscarded.as_str()
        || err.class == ErrorKind::AlreadyExecuted.as_str()
    {
        StatusCode::CONFLICT
    } else if err.class == ErrorKind::OverloadRejected.as_str() {
        StatusCode::TOO_MANY_REQUESTS
    } else if err.class == ErrorKind::TargetUnavailable.as_str()
        || err.class == ErrorKind::ButlerUnreachable.as_str()
    {
        StatusCode::SERVICE_UNAVAILABLE
    } else {
        StatusCode::INTERNAL_SERVER_ERROR
    }
}
