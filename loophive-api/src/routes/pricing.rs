//! Admin endpoints for the global pricing table.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde_json::{json, Value as JsonValue};

use loophive_core::PricingEntry;

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;
use crate::types::PricingUpdateRequest;

pub async fn list_pricing(State(state): State<AppState>) -> ApiResult<Json<JsonValue>> {
    let entries = state.pricing.list_entries().await;
    Ok(Json(json!({"data": entries})))
}

pub async fn add_pricing(
    State(state): State<AppState>,
    Json(entry): Json<PricingEntry>,
) -> ApiResult<(StatusCode, Json<PricingEntry>)> {
    if entry.model_pattern.is_empty() {
        return Err(ApiError::validation("model_pattern is required"));
    }
    let created = state.pricing.add_entry(entry).await;
    Ok((StatusCode::CREATED, Json(created)))
}

pub async fn update_pricing(
    State(state): State<AppState>,
    Path(pattern): Path<String>,
    Json(updates): Json<PricingUpdateRequest>,
) -> ApiResult<Json<PricingEntry>> {
    state
        .pricing
        .update_entry(
            &pattern,
            updates.input_per_m,
            updates.output_per_m,
            updates.provider,
        )
        .await
        .map(Json)
        .ok_or_else(|| ApiError::not_found("Pricing entry"))
}

pub async fn delete_pricing(
    State(state): State<AppState>,
    Path(pattern): Path<String>,
) -> ApiResult<Json<JsonValue>> {
    if !state.pricing.delete_entry(&pattern).await {
        return Err(ApiError::not_found("Pricing entry"));
    }
    Ok(Json(json!({"status": "deleted"})))
}
