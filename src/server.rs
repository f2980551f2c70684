use std::collections::HashMap;
use std::sync::Arc;

use axum::extract::{Query, State};
use axum::http::{Method, StatusCode};
use axum::response::{IntoResponse, Json, Response};
use axum::routing::any;
use axum::Router;
use serde_json::json;

use crate::error::RunError;
use crate::pipeline::Pipeline;

/// HTTP façade over one pipeline. `GET /` reports the current plan without
/// executing it; `GET /?run` and `POST /` execute. Everything else is 404.
pub fn router(pipeline: Arc<Pipeline>) -> Router {
    Router::new()
        .route("/", any(handle_root))
        .fallback(not_found)
        .with_state(pipeline)
}

async fn handle_root(
    State(pipeline): State<Arc<Pipeline>>,
    method: Method,
    Query(query): Query<HashMap<String, String>>,
) -> Response {
    if method == Method::GET && !query.contains_key("run") {
        dry_run(&pipeline).await
    } else if method == Method::GET || method == Method::POST {
        execute(&pipeline).await
    } else {
        not_found().await
    }
}

async fn dry_run(pipeline: &Pipeline) -> Response {
    let plan = match pipeline.dry_run().await {
        Ok(plan) => plan,
        Err(e) => {
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "error": e.to_string() })),
            )
                .into_response();
        }
    };

    let schedule = match pipeline.schedule_error() {
        Some(error) => json!({ "error": error }),
        None => json!(pipeline.schedule()),
    };

    Json(json!({
        "schedule": schedule,
        "plan": {
            "planPeriod": plan.plan_period,
            "plan": plan.entries,
        },
        "history": plan.history,
    }))
    .into_response()
}

async fn execute(pipeline: &Pipeline) -> Response {
    match pipeline.run().await {
        Ok(results) => Json(json!(results)).into_response(),
        Err(e @ RunError::Schedule(_)) => (
            StatusCode::BAD_REQUEST,
            Json(json!({ "error": e.to_string() })),
        )
            .into_response(),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({ "error": e.to_string() })),
        )
            .into_response(),
    }
}

async fn not_found() -> Response {
    (StatusCode::NOT_FOUND, Json(json!({ "error": "Not found" }))).into_response()
}
