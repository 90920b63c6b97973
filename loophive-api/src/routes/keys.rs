//! API key management. The raw key material is returned exactly once at
//! creation; only the hash and display prefix persist.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Extension, Json,
};
use chrono::Utc;
use serde_json::{json, Value as JsonValue};
use uuid::Uuid;

use loophive_core::ApiKeyRecord;

use crate::auth::{generate_api_key, AuthContext};
use crate::error::{ApiError, ApiResult};
use crate::state::AppState;
use crate::types::{ApiKeyCreated, CreateApiKeyRequest};

pub async fn list_keys(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
) -> ApiResult<Json<JsonValue>> {
    let keys = state.storage.list_api_keys(&auth.tenant_id).await?;
    Ok(Json(json!({"data": keys})))
}

pub async fn create_key(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Json(body): Json<CreateApiKeyRequest>,
) -> ApiResult<(StatusCode, Json<ApiKeyCreated>)> {
    if body.label.is_empty() {
        return Err(ApiError::validation("label is required"));
    }
    let (raw_key, key_hash, key_prefix) = generate_api_key(body.key_type);
    let record = state
        .storage
        .create_api_key(ApiKeyRecord {
            key_id: Uuid::new_v4().to_string(),
            tenant_id: auth.tenant_id.clone(),
            key_hash,
            key_prefix,
            key_type: body.key_type,
            label: Some(body.label),
            created_at: Utc::now(),
            last_used_at: None,
            revoked_at: None,
            is_active: true,
        })
        .await?;
    Ok((
        StatusCode::CREATED,
        Json(ApiKeyCreated {
            api_key: raw_key,
            key: record,
        }),
    ))
}

pub async fn revoke_key(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Path(key_id): Path<String>,
) -> ApiResult<Json<JsonValue>> {
    let revoked = state.storage.revoke_api_key(&auth.tenant_id, &key_id).await?;
    if !revoked {
        return Err(ApiError::not_found("API key"));
    }
    Ok(Json(json!({"status": "revoked"})))
}
