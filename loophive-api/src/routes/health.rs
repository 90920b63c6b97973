//! Liveness endpoint.

use axum::Json;
use serde_json::{json, Value as JsonValue};

pub async fn health() -> Json<JsonValue> {
    Json(json!({"status": "ok"}))
}
