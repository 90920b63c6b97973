//! LLM pricing engine - server-side cost estimation.
//!
//! Maintains a canonical pricing table and estimates costs for `llm_call`
//! payloads that arrive without a cost. Model matching is case-insensitive
//! with exact-match priority and longest-prefix fallback.
//!
//! The table is global (not tenant-scoped), seeded from defaults when no
//! persisted file exists, and written back atomically under a mutex on
//! every admin mutation.

use std::path::PathBuf;

use tokio::sync::Mutex;

use loophive_core::{Payload, PayloadKind, PricingEntry};

fn default_pricing() -> Vec<PricingEntry> {
    fn entry(pattern: &str, provider: &str, input_per_m: f64, output_per_m: f64) -> PricingEntry {
        PricingEntry {
            model_pattern: pattern.to_string(),
            provider: provider.to_string(),
            input_per_m,
            output_per_m,
        }
    }
    vec![
        // Anthropic
        entry("claude-opus-4", "anthropic", 15.0, 75.0),
        entry("claude-sonnet-4", "anthropic", 3.0, 15.0),
        entry("claude-3-7-sonnet", "anthropic", 3.0, 15.0),
        entry("claude-3-5-sonnet", "anthropic", 3.0, 15.0),
        entry("claude-3-5-haiku", "anthropic", 0.80, 4.0),
        entry("claude-3-opus", "anthropic", 15.0, 75.0),
        entry("claude-3-haiku", "anthropic", 0.25, 1.25),
        entry("claude-sonnet-4-5", "anthropic", 3.0, 15.0),
        entry("claude-haiku-4-5", "anthropic", 0.80, 4.0),
        // OpenAI
        entry("gpt-4o", "openai", 2.50, 10.0),
        entry("gpt-4o-mini", "openai", 0.15, 0.60),
        entry("gpt-4-turbo", "openai", 10.0, 30.0),
        entry("gpt-4", "openai", 30.0, 60.0),
        entry("o1", "openai", 15.0, 60.0),
        entry("o3-mini", "openai", 1.10, 4.40),
        // Google
        entry("gemini-2.0-flash", "google", 0.10, 0.40),
        entry("gemini-1.5-pro", "google", 1.25, 5.0),
        entry("gemini-1.5-flash", "google", 0.075, 0.30),
        // Mistral
        entry("mistral-large", "mistral", 2.0, 6.0),
        entry("mistral-small", "mistral", 0.20, 0.60),
        entry("codestral", "mistral", 0.30, 0.90),
        // Meta (typical hosted pricing)
        entry("llama-3.1-405b", "meta", 3.0, 3.0),
        entry("llama-3.1-70b", "meta", 0.90, 0.90),
        entry("llama-3.1-8b", "meta", 0.10, 0.10),
    ]
}

/// In-memory pricing table with file persistence.
pub struct PricingEngine {
    pricing_file: PathBuf,
    entries: Mutex<Vec<PricingEntry>>,
}

impl PricingEngine {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            pricing_file: data_dir.into().join("llm_pricing.json"),
            entries: Mutex::new(Vec::new()),
        }
    }

    /// Load pricing from disk, or seed with defaults.
    pub async fn initialize(&self) {
        let mut entries = self.entries.lock().await;
        let loaded = std::fs::read_to_string(&self.pricing_file)
            .ok()
            .and_then(|raw| serde_json::from_str::<Vec<PricingEntry>>(&raw).ok());
        match loaded {
            Some(persisted) => *entries = persisted,
            None => {
                *entries = default_pricing();
                Self::persist(&self.pricing_file, &entries);
            }
        }
    }

    /// Atomic write-temp-rename, logging (not propagating) failures so a
    /// broken disk never blocks ingestion.
    fn persist(path: &PathBuf, entries: &[PricingEntry]) {
        let write = || -> std::io::Result<()> {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            let tmp = path.with_extension("json.tmp");
            let body = serde_json::to_vec_pretty(entries)
                .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
            std::fs::write(&tmp, body)?;
            std::fs::rename(&tmp, path)
        };
        if let Err(error) = write() {
            tracing::warn!(error = %error, "Failed to persist pricing table");
        }
    }

    // ========================================================================
    // MODEL MATCHING
    // ========================================================================

    /// Best pricing entry for a model string: exact match first, then the
    /// longest case-insensitive prefix.
    fn match_model(entries: &[PricingEntry], model: &str) -> Option<PricingEntry> {
        let lower = model.to_lowercase();
        if let Some(exact) = entries
            .iter()
            .find(|e| e.model_pattern.to_lowercase() == lower)
        {
            return Some(exact.clone());
        }
        entries
            .iter()
            .filter(|e| lower.starts_with(&e.model_pattern.to_lowercase()))
            .max_by_key(|e| e.model_pattern.len())
            .cloned()
    }

    /// Estimate cost for model + token counts, rounded to 6 decimals.
    /// Returns `(cost, matched_pattern)` or `None` for unknown models or
    /// missing tokens.
    pub async fn estimate_cost(
        &self,
        model: &str,
        tokens_in: Option<i64>,
        tokens_out: Option<i64>,
    ) -> Option<(f64, String)> {
        if model.is_empty() || (tokens_in.unwrap_or(0) == 0 && tokens_out.unwrap_or(0) == 0) {
            return None;
        }
        let entries = self.entries.lock().await;
        let entry = Self::match_model(&entries, model)?;
        let t_in = tokens_in.unwrap_or(0) as f64;
        let t_out = tokens_out.unwrap_or(0) as f64;
        let cost = (t_in * entry.input_per_m + t_out * entry.output_per_m) / 1_000_000.0;
        Some(((cost * 1e6).round() / 1e6, entry.model_pattern))
    }

    // ========================================================================
    // EVENT ENRICHMENT
    // ========================================================================

    /// Enrich an `llm_call` payload in place.
    ///
    /// 1. Developer-provided cost > 0 => `cost_source = "reported"`.
    /// 2. No cost but model + tokens => estimate, `cost_source =
    ///    "estimated"`, record the matched pattern.
    /// 3. Unknown model or no tokens => leave cost untouched.
    pub async fn enrich_llm_payload(&self, payload: &mut Payload) {
        if !payload.is_kind(PayloadKind::LlmCall) {
            return;
        }
        let Some(data) = payload.data.as_mut().and_then(|d| d.as_object_mut()) else {
            return;
        };

        let cost = data.get("cost").and_then(|c| c.as_f64());
        if let Some(cost) = cost {
            if cost > 0.0 {
                data.insert("cost_source".into(), "reported".into());
                return;
            }
        }

        let model = data
            .get("model")
            .and_then(|m| m.as_str())
            .unwrap_or_default()
            .to_string();
        if !model.is_empty() {
            let tokens_in = data.get("tokens_in").and_then(|t| t.as_i64());
            let tokens_out = data.get("tokens_out").and_then(|t| t.as_i64());
            if let Some((estimated, pattern)) =
                self.estimate_cost(&model, tokens_in, tokens_out).await
            {
                data.insert("cost".into(), estimated.into());
                data.insert("cost_source".into(), "estimated".into());
                data.insert("cost_model_matched".into(), pattern.into());
            }
        }
    }

    // ========================================================================
    // ADMIN CRUD
    // ========================================================================

    pub async fn list_entries(&self) -> Vec<PricingEntry> {
        self.entries.lock().await.clone()
    }

    pub async fn add_entry(&self, entry: PricingEntry) -> PricingEntry {
        let mut entries = self.entries.lock().await;
        entries.push(entry.clone());
        Self::persist(&self.pricing_file, &entries);
        entry
    }

    pub async fn update_entry(
        &self,
        pattern: &str,
        input_per_m: Option<f64>,
        output_per_m: Option<f64>,
        provider: Option<String>,
    ) -> Option<PricingEntry> {
        let mut entries = self.entries.lock().await;
        let entry = entries
            .iter_mut()
            .find(|e| e.model_pattern.eq_ignore_ascii_case(pattern))?;
        if let Some(input) = input_per_m {
            entry.input_per_m = input;
        }
        if let Some(output) = output_per_m {
            entry.output_per_m = output;
        }
        if let Some(provider) = provider {
            entry.provider = provider;
        }
        let updated = entry.clone();
        Self::persist(&self.pricing_file, &entries);
        Some(updated)
    }

    pub async fn delete_entry(&self, pattern: &str) -> bool {
        let mut entries = self.entries.lock().await;
        let before = entries.len();
        entries.retain(|e| !e.model_pattern.eq_ignore_ascii_case(pattern));
        let removed = entries.len() < before;
        if removed {
            Self::persist(&self.pricing_file, &entries);
        }
        removed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    async fn engine() -> (PricingEngine, TempDir) {
        let dir = TempDir::new().unwrap();
        let engine = PricingEngine::new(dir.path());
        engine.initialize().await;
        (engine, dir)
    }

    #[tokio::test]
    async fn test_exact_match_beats_prefix() {
        let (engine, _dir) = engine().await;
        // "gpt-4o-mini" is both an exact entry and has prefix "gpt-4o".
        let (_, pattern) = engine
            .estimate_cost("gpt-4o-mini", Some(1000), Some(0))
            .await
            .unwrap();
        assert_eq!(pattern, "gpt-4o-mini");
    }

    #[tokio::test]
    async fn test_longest_prefix_wins() {
        let (engine, _dir) = engine().await;
        // A dated model id only matches by prefix.
        let (_, pattern) = engine
            .estimate_cost("claude-sonnet-4-5-20260101", Some(1000), Some(0))
            .await
            .unwrap();
        assert_eq!(pattern, "claude-sonnet-4-5");
    }

    #[tokio::test]
    async fn test_match_is_case_insensitive() {
        let (engine, _dir) = engine().await;
        let (_, pattern) = engine
            .estimate_cost("GPT-4o", Some(100), None)
            .await
            .unwrap();
        assert_eq!(pattern, "gpt-4o");
    }

    #[tokio::test]
    async fn test_estimate_rounding() {
        let (engine, _dir) = engine().await;
        // claude-haiku-4-5: 0.80 in / 4.0 out per million.
        let (cost, _) = engine
            .estimate_cost("claude-haiku-4-5", Some(1000), Some(500))
            .await
            .unwrap();
        assert!((cost - 0.0028).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_unknown_model_or_no_tokens() {
        let (engine, _dir) = engine().await;
        assert!(engine
            .estimate_cost("totally-unknown", Some(100), Some(100))
            .await
            .is_none());
        assert!(engine.estimate_cost("gpt-4o", None, None).await.is_none());
        assert!(engine.estimate_cost("", Some(10), Some(10)).await.is_none());
    }

    #[tokio::test]
    async fn test_reported_cost_is_authoritative() {
        let (engine, _dir) = engine().await;
        let mut payload: Payload = serde_json::from_value(json!({
            "kind": "llm_call",
            "data": {"name": "x", "model": "gpt-4o", "tokens_in": 1000, "cost": 0.42}
        }))
        .unwrap();
        engine.enrich_llm_payload(&mut payload).await;
        assert_eq!(payload.data_f64("cost"), Some(0.42));
        assert_eq!(payload.data_str("cost_source"), Some("reported"));
        assert!(payload.data_str("cost_model_matched").is_none());
    }

    #[tokio::test]
    async fn test_estimation_fills_missing_cost() {
        let (engine, _dir) = engine().await;
        let mut payload: Payload = serde_json::from_value(json!({
            "kind": "llm_call",
            "data": {"name": "reason", "model": "claude-haiku-4-5",
                     "tokens_in": 1000, "tokens_out": 500}
        }))
        .unwrap();
        engine.enrich_llm_payload(&mut payload).await;
        assert!((payload.data_f64("cost").unwrap() - 0.0028).abs() < 1e-9);
        assert_eq!(payload.data_str("cost_source"), Some("estimated"));
        assert_eq!(payload.data_str("cost_model_matched"), Some("claude-haiku-4-5"));
    }

    #[tokio::test]
    async fn test_unknown_model_leaves_payload_untouched() {
        let (engine, _dir) = engine().await;
        let mut payload: Payload = serde_json::from_value(json!({
            "kind": "llm_call",
            "data": {"name": "x", "model": "mystery-model", "tokens_in": 10}
        }))
        .unwrap();
        engine.enrich_llm_payload(&mut payload).await;
        assert!(payload.data_f64("cost").is_none());
        assert!(payload.data_str("cost_source").is_none());
    }

    #[tokio::test]
    async fn test_admin_crud_persists() {
        let dir = TempDir::new().unwrap();
        {
            let engine = PricingEngine::new(dir.path());
            engine.initialize().await;
            engine
                .add_entry(PricingEntry {
                    model_pattern: "custom-model".into(),
                    provider: "custom".into(),
                    input_per_m: 1.0,
                    output_per_m: 2.0,
                })
                .await;
            assert!(engine
                .update_entry("CUSTOM-MODEL", Some(1.5), None, None)
                .await
                .is_some());
        }
        // A fresh engine reloads the persisted table.
        let engine = PricingEngine::new(dir.path());
        engine.initialize().await;
        let entries = engine.list_entries().await;
        let custom = entries
            .iter()
            .find(|e| e.model_pattern == "custom-model")
            .unwrap();
        assert_eq!(custom.input_per_m, 1.5);
        assert!(engine.delete_entry("custom-model").await);
        assert!(!engine.delete_entry("custom-model").await);
    }
}
