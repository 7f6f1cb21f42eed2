//! Shared data types for the metering pipeline.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

use crate::identity;

/// Provider tag reported for every record, regardless of SDK.
pub const PROVIDER_NAME: &str = "Google";
/// Model source reported for every record.
pub const MODEL_SOURCE: &str = "GOOGLE";

/// Which Google SDK a client belongs to.
///
/// Both report under the same provider tag; the variant decides which token fields are read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Provider {
    /// Google AI SDK (Gemini API)
    #[serde(rename = "google_ai_sdk")]
    GoogleAi,
    /// Vertex AI SDK, which also exposes cached and reasoning token counts
    #[serde(rename = "vertex_ai_sdk")]
    VertexAi,
}

impl Provider {
    pub fn as_str(&self) -> &'static str {
        match self {
            Provider::GoogleAi => "google_ai_sdk",
            Provider::VertexAi => "vertex_ai_sdk",
        }
    }

    /// Human readable SDK name used in log lines.
    pub fn display_name(&self) -> &'static str {
        match self {
            Provider::GoogleAi => "Google AI",
            Provider::VertexAi => "Vertex AI",
        }
    }

    /// Whether the SDK reports token usage on embedding responses.
    pub fn reports_embedding_usage(&self) -> bool {
        matches!(self, Provider::VertexAi)
    }

    pub fn metadata(&self) -> ProviderMetadata {
        ProviderMetadata {
            provider: PROVIDER_NAME.to_string(),
            model_source: MODEL_SOURCE.to_string(),
            sdk_type: *self,
        }
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Provider identification attached to a transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderMetadata {
    pub provider: String,
    pub model_source: String,
    pub sdk_type: Provider,
}

/// Kind of call being metered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OperationType {
    Chat,
    Embed,
}

impl fmt::Display for OperationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OperationType::Chat => f.write_str("CHAT"),
            OperationType::Embed => f.write_str("EMBED"),
        }
    }
}

/// Token usage read from a provider response.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenCounts {
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub total_tokens: u64,
    pub cached_tokens: Option<u64>,
    pub reasoning_tokens: Option<u64>,
}

impl TokenCounts {
    /// All-zero counts, used when the provider does not expose usage.
    pub fn zero() -> Self {
        Self::default()
    }
}

/// Caller supplied billing and attribution fields.
///
/// Passed through to the collector as-is. Fields the crate does not know about are kept in
/// `extra` and serialized back at the same level.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageMetadata {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trace_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub task_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subscriber_email: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subscriber_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subscriber_credential_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subscriber_credential: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub organization_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subscription_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub product_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub agent: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_quality_score: Option<f64>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Model identity for a metered call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelInfo {
    pub name: String,
    pub provider: String,
    pub model_source: String,
    pub sdk_type: Provider,
}

impl ModelInfo {
    pub fn new(name: impl Into<String>, sdk_type: Provider) -> Self {
        let metadata = sdk_type.metadata();
        Self {
            name: name.into(),
            provider: metadata.provider,
            model_source: metadata.model_source,
            sdk_type,
        }
    }
}

/// Identity and timing of one intercepted call.
#[derive(Debug, Clone)]
pub struct TransactionContext {
    pub transaction_id: String,
    pub start_time: DateTime<Utc>,
    pub model: ModelInfo,
    pub is_streaming: bool,
    pub usage_metadata: Option<UsageMetadata>,
}

impl TransactionContext {
    /// Open a transaction: fresh id, start time taken now.
    pub fn open(model: ModelInfo, is_streaming: bool, usage_metadata: Option<UsageMetadata>) -> Self {
        Self {
            transaction_id: identity::generate_transaction_id(),
            start_time: Utc::now(),
            model,
            is_streaming,
            usage_metadata,
        }
    }
}

/// State of one in-flight streaming call, owned by the [`crate::StreamRegistry`].
#[derive(Debug, Clone)]
pub struct StreamTracker {
    pub transaction_id: String,
    pub start_time: DateTime<Utc>,
    pub first_token_time: Option<DateTime<Utc>>,
    pub is_complete: bool,
    pub usage_metadata: Option<UsageMetadata>,
}

/// Payload posted to the metering API.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MeteringRequest {
    pub cache_creation_token_count: u64,
    pub cache_read_token_count: u64,
    pub input_token_cost: Option<f64>,
    pub output_token_cost: Option<f64>,
    pub total_cost: Option<f64>,
    pub input_token_count: u64,
    pub output_token_count: u64,
    pub total_token_count: u64,
    pub reasoning_token_count: u64,
    pub cost_type: String,
    pub model: String,
    pub provider: String,
    pub model_source: String,

    pub request_time: String,
    pub response_time: String,
    pub completion_start_time: String,
    pub request_duration: u64,

    pub stop_reason: String,
    pub transaction_id: String,
    pub operation_type: OperationType,
    pub is_streamed: bool,
    pub time_to_first_token: u64,

    // Subscriber fields, hoisted from the usage metadata
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trace_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub task_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subscriber_email: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subscriber_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subscriber_credential_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subscriber_credential: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub organization_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subscription_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub product_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub agent: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_quality_score: Option<f64>,

    pub middleware_source: String,

    /// Nested copy of the caller metadata, still read by older collector versions
    #[serde(skip_serializing_if = "Option::is_none")]
    pub usage_metadata: Option<UsageMetadata>,
}
