//! Request and response DTOs specific to the API layer.

use serde::{Deserialize, Serialize};

use loophive_core::{ApiKeyRecord, KeyType};

// ============================================================================
// API KEYS
// ============================================================================

/// `POST /v1/api-keys` body.
#[derive(Debug, Clone, Deserialize)]
pub struct CreateApiKeyRequest {
    pub label: String,
    #[serde(default = "default_key_type")]
    pub key_type: KeyType,
}

fn default_key_type() -> KeyType {
    KeyType::Live
}

/// `POST /v1/api-keys` response. The raw key is shown exactly once.
#[derive(Debug, Clone, Serialize)]
pub struct ApiKeyCreated {
    pub api_key: String,
    pub key: ApiKeyRecord,
}

// ============================================================================
// PROJECTS
// ============================================================================

/// `POST /v1/projects/{id}/merge` body.
#[derive(Debug, Clone, Deserialize)]
pub struct ProjectMergeRequest {
    pub target_slug: String,
}

/// `POST /v1/projects/{id}/agents` body.
#[derive(Debug, Clone, Deserialize)]
pub struct AddProjectAgentRequest {
    pub agent_id: String,
}

// ============================================================================
// PRICING
// ============================================================================

/// `PUT /v1/admin/pricing/{pattern}` body.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct PricingUpdateRequest {
    pub input_per_m: Option<f64>,
    pub output_per_m: Option<f64>,
    pub provider: Option<String>,
}
