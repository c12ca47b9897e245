//! Core data types shared across the engine.

use std::collections::HashMap;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;

/// Whether a dimension runs once per section (fan-out) or once for the batch (fan-in).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Scope {
    Section,
    Global,
}

impl Scope {
    pub fn is_global(self) -> bool {
        matches!(self, Scope::Global)
    }
}

/// One input record: an opaque textual body plus a free-form metadata map.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Section {
    pub content: String,
    #[serde(default)]
    pub metadata: HashMap<String, Value>,
}

impl Section {
    pub fn new(content: impl Into<String>) -> Self {
        Section {
            content: content.into(),
            metadata: HashMap::new(),
        }
    }
}

/// Token accounting carried on a successful provider response.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default)]
pub struct TokenUsage {
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub total_tokens: u64,
}

/// Metadata attached to a `DimensionResult`, flattened onto the external shape.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ResultMetadata {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tokens: Option<TokenUsage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cached: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub skipped: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    /// Wall-clock duration of the unit, in milliseconds. Minimum reported value on
    /// error paths is 1ms to keep timing-sensitive tests stable.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
}

impl ResultMetadata {
    pub fn skip(reason: impl Into<String>) -> Self {
        ResultMetadata {
            skipped: Some(true),
            reason: Some(reason.into()),
            ..Default::default()
        }
    }
}

/// The Result union: `{Ok, Err, Skipped}` internally, flattened
/// to `{data?, error?, metadata?}` at the process boundary.
#[derive(Debug, Clone)]
pub enum DimensionResult {
    Ok {
        data: Value,
        metadata: ResultMetadata,
    },
    Err {
        error: String,
        metadata: ResultMetadata,
    },
    Skipped {
        reason: Option<String>,
        metadata: ResultMetadata,
    },
}

impl DimensionResult {
    pub fn ok(data: Value) -> Self {
        DimensionResult::Ok {
            data,
            metadata: ResultMetadata::default(),
        }
    }

    pub fn ok_with_metadata(data: Value, metadata: ResultMetadata) -> Self {
        DimensionResult::Ok { data, metadata }
    }

    pub fn err(error: impl Into<String>) -> Self {
        DimensionResult::Err {
            error: error.into(),
            metadata: ResultMetadata {
                duration_ms: Some(1),
                ..Default::default()
            },
        }
    }

    pub fn err_with_metadata(error: impl Into<String>, metadata: ResultMetadata) -> Self {
        DimensionResult::Err {
            error: error.into(),
            metadata,
        }
    }

    pub fn skip(reason: impl Into<String>) -> Self {
        let reason = reason.into();
        DimensionResult::Skipped {
            reason: Some(reason.clone()),
            metadata: ResultMetadata::skip(reason),
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self, DimensionResult::Err { .. })
    }

    pub fn is_skipped(&self) -> bool {
        matches!(self, DimensionResult::Skipped { .. })
    }

    pub fn data(&self) -> Option<&Value> {
        match self {
            DimensionResult::Ok { data, .. } => Some(data),
            _ => None,
        }
    }

    pub fn error_message(&self) -> Option<&str> {
        match self {
            DimensionResult::Err { error, .. } => Some(error.as_str()),
            _ => None,
        }
    }

    pub fn metadata(&self) -> &ResultMetadata {
        match self {
            DimensionResult::Ok { metadata, .. }
            | DimensionResult::Err { metadata, .. }
            | DimensionResult::Skipped { metadata, .. } => metadata,
        }
    }

    /// Aggregates several section-level results into the `{data:{sections:[...]}}` shape
    /// a global dimension sees when it depends on a section dimension.
    pub fn aggregate_sections(results: Vec<DimensionResult>) -> DimensionResult {
        let sections: Vec<Value> = results.iter().map(|r| r.to_external()).collect();
        DimensionResult::ok(serde_json::json!({ "sections": sections }))
    }

    /// Flattens the internal tagged variant to the external `{data?, error?, metadata?}`
    /// shape expected by hooks and the final `ProcessResult`.
    pub fn to_external(&self) -> Value {
        match self {
            DimensionResult::Ok { data, metadata } => {
                serde_json::json!({ "data": data, "metadata": metadata })
            }
            DimensionResult::Err { error, metadata } => {
                serde_json::json!({ "error": error, "metadata": metadata })
            }
            DimensionResult::Skipped { reason, metadata } => {
                serde_json::json!({
                    "data": { "skipped": true, "reason": reason },
                    "metadata": metadata,
                })
            }
        }
    }
}

impl Serialize for DimensionResult {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        self.to_external().serialize(serializer)
    }
}

/// Reverses `to_external`: lets a `finalizeResults`/`afterProcessComplete` hook
/// override round-trip back into the typed Result union.
impl<'de> Deserialize<'de> for DimensionResult {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let v = Value::deserialize(deserializer)?;
        let metadata: ResultMetadata = v
            .get("metadata")
            .and_then(|m| serde_json::from_value(m.clone()).ok())
            .unwrap_or_default();

        if let Some(error) = v.get("error").and_then(Value::as_str) {
            return Ok(DimensionResult::Err {
                error: error.to_string(),
                metadata,
            });
        }

        let data = v.get("data").cloned().unwrap_or(Value::Null);
        if metadata.skipped == Some(true) {
            let reason = data
                .get("reason")
                .and_then(Value::as_str)
                .map(|s| s.to_string());
            return Ok(DimensionResult::Skipped { reason, metadata });
        }

        Ok(DimensionResult::Ok { data, metadata })
    }
}

/// Request handed to a `Provider`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderRequest {
    pub input: ProviderInput,
    #[serde(default)]
    pub options: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dimension: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ProviderInput {
    Single(String),
    Many(Vec<String>),
}

/// Response returned by a `Provider`. Failure is expressed in-band via `error`,
/// never as a Rust-level `Err` — the engine's sole failure channel for dimension-level
/// outcomes is the Result union above.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ProviderResponse {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<ResultMetadata>,
}

impl ProviderResponse {
    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }
}

/// A provider selection returned from `Plugin::select_provider`.
#[derive(Debug, Clone)]
pub struct ProviderSelection {
    pub provider: String,
    pub options: Value,
    pub fallbacks: Vec<String>,
}

impl ProviderSelection {
    pub fn new(provider: impl Into<String>) -> Self {
        ProviderSelection {
            provider: provider.into(),
            options: Value::Null,
            fallbacks: Vec::new(),
        }
    }

    pub fn with_fallbacks(mut self, fallbacks: Vec<String>) -> Self {
        self.fallbacks = fallbacks;
        self
    }

    pub fn with_options(mut self, options: Value) -> Self {
        self.options = options;
        self
    }
}

/// The resolved prerequisites passed to a dimension.
pub type DependenciesView = HashMap<String, DimensionResult>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ok_result_flattens_to_data_and_metadata() {
        let r = DimensionResult::ok(serde_json::json!({"result": "ok-a"}));
        let ext = r.to_external();
        assert_eq!(ext["data"]["result"], "ok-a");
        assert!(ext.get("error").is_none());
    }

    #[test]
    fn err_result_has_minimum_one_ms_duration() {
        let r = DimensionResult::err("boom");
        assert_eq!(r.metadata().duration_ms, Some(1));
        assert_eq!(r.error_message(), Some("boom"));
    }

    #[test]
    fn skip_result_marks_metadata_skipped() {
        let r = DimensionResult::skip("policy disabled");
        assert!(r.is_skipped());
        assert_eq!(r.metadata().skipped, Some(true));
        let ext = r.to_external();
        assert_eq!(ext["data"]["skipped"], true);
    }

    #[test]
    fn aggregate_sections_wraps_each_result_under_sections_key() {
        let results = vec![
            DimensionResult::ok(serde_json::json!({"n": 1})),
            DimensionResult::err("nope"),
        ];
        let agg = DimensionResult::aggregate_sections(results);
        let sections = agg.data().unwrap()["sections"].as_array().unwrap();
        assert_eq!(sections.len(), 2);
        assert_eq!(sections[0]["data"]["n"], 1);
        assert_eq!(sections[1]["error"], "nope");
    }
}
