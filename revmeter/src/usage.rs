//! Usage extraction from provider responses and caller requests.
//!
//! Extraction never fails the metered call. When a response lacks the expected data the
//! extractors fall back to zero or literal defaults and say so through [`Extracted::complete`],
//! leaving it to the caller whether the gap is worth a log line.

use serde_json::Value;
use std::fmt;
use tracing::{debug, warn};

use crate::errors::{Error, Result};
use crate::extract;
use crate::types::{Provider, TokenCounts, UsageMetadata};

/// Stop reason reported when the response does not carry one.
pub const DEFAULT_STOP_REASON: &str = "STOP";
/// Model name reported when neither the response nor the caller names one.
pub const UNKNOWN_MODEL: &str = "unknown-model";

/// An extracted value and whether it was read in full from the payload.
#[derive(Debug, Clone, PartialEq)]
pub struct Extracted<T> {
    pub value: T,
    /// `false` when some or all of `value` is a fallback default
    pub complete: bool,
}

impl<T> Extracted<T> {
    fn complete(value: T) -> Self {
        Self { value, complete: true }
    }

    fn fallback(value: T) -> Self {
        Self { value, complete: false }
    }

    pub fn into_value(self) -> T {
        self.value
    }
}

impl<T: fmt::Display> Extracted<T> {
    /// The value, logged at debug level as `field` when it is a fallback.
    pub fn value_or_note(self, transaction_id: &str, field: &str) -> T {
        if !self.complete {
            debug!(transaction_id, field, value = %self.value, "Response lacks {field}, reporting the default");
        }
        self.value
    }
}

/// Read token counts from the `usageMetadata` section, failing if it is missing.
///
/// Vertex AI responses additionally carry `cachedTokenCount` and `reasoningTokenCount`;
/// for the Google AI SDK those are reported as zero.
pub fn try_token_counts(response: &Value, provider: Provider) -> Result<TokenCounts> {
    let Some(usage) = extract::get(response, "usageMetadata").filter(|u| u.is_object()) else {
        return Err(Error::TokenCounting {
            message: format!("{} response has no usageMetadata section", provider.display_name()),
        });
    };

    let (cached_tokens, reasoning_tokens) = match provider {
        Provider::GoogleAi => (0, 0),
        Provider::VertexAi => (
            extract::count(usage, "cachedTokenCount"),
            extract::count(usage, "reasoningTokenCount"),
        ),
    };

    Ok(TokenCounts {
        input_tokens: extract::count(usage, "promptTokenCount"),
        output_tokens: extract::count(usage, "candidatesTokenCount"),
        total_tokens: extract::count(usage, "totalTokenCount"),
        cached_tokens: Some(cached_tokens),
        reasoning_tokens: Some(reasoning_tokens),
    })
}

/// Token counts for a response, zeroed (with a warning) when the usage section is absent.
pub fn extract_token_counts(response: &Value, provider: Provider) -> Extracted<TokenCounts> {
    match try_token_counts(response, provider) {
        Ok(counts) => Extracted::complete(counts),
        Err(e) => {
            warn!(provider = %provider, error = %e, "Failed to extract token counts, reporting zero");
            Extracted::fallback(TokenCounts::zero())
        }
    }
}

/// First non-empty of `candidates.0.finishReason`, `finishReason`, `stopReason`, else `"STOP"`.
pub fn extract_stop_reason(response: &Value) -> Extracted<String> {
    ["candidates.0.finishReason", "finishReason", "stopReason"]
        .iter()
        .map(|path| extract::string(response, path))
        .find(|reason| !reason.is_empty())
        .map(Extracted::complete)
        .unwrap_or_else(|| Extracted::fallback(DEFAULT_STOP_REASON.to_string()))
}

/// Model name from the response (`model`, then `modelName`), then `fallback`, then
/// `"unknown-model"`. Only a name read from the response is complete.
pub fn extract_model_name(response: &Value, fallback: Option<&str>) -> Extracted<String> {
    if let Some(name) = ["model", "modelName"]
        .iter()
        .map(|path| extract::string(response, path))
        .find(|name| !name.is_empty())
    {
        return Extracted::complete(name);
    }

    match fallback.filter(|name| !name.is_empty()) {
        Some(name) => Extracted::fallback(name.to_string()),
        None => Extracted::fallback(UNKNOWN_MODEL.to_string()),
    }
}

/// Caller metadata from `request.usageMetadata`, else the metadata attached to the model
/// instance, else none.
///
/// A `usageMetadata` value that is not an object of the expected shape is ignored with a
/// warning rather than rejected.
pub fn extract_usage_metadata(request: &Value, instance: Option<&UsageMetadata>) -> Option<UsageMetadata> {
    if let Some(raw) = extract::get(request, "usageMetadata") {
        match serde_json::from_value::<UsageMetadata>(raw.clone()) {
            Ok(metadata) => return Some(metadata),
            Err(e) => warn!(error = %e, "Ignoring malformed usageMetadata on request"),
        }
    }

    instance.cloned()
}
