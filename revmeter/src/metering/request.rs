use bon::builder;

use crate::types::{MODEL_SOURCE, MeteringRequest, OperationType, PROVIDER_NAME, TokenCounts, UsageMetadata};

/// Source tag identifying this middleware to the collector.
pub const MIDDLEWARE_SOURCE: &str = "rust";

/// Assemble the payload for one metered call.
///
/// Pure data transformation. Costs are always left null so the collector prices the call from
/// its own model tables, and `completionStartTime` mirrors `responseTime`. The subscriber fields
/// of `usage_metadata` are hoisted to the top level; the metadata is also attached whole.
///
/// # Example
/// ```
/// use revmeter::metering::create_metering_request;
/// use revmeter::{OperationType, TokenCounts};
///
/// let request = create_metering_request()
///     .transaction_id("9f0c".to_string())
///     .model("gemini-2.0-flash".to_string())
///     .token_counts(TokenCounts::zero())
///     .stop_reason("STOP".to_string())
///     .request_time("2025-06-01T12:00:00.000Z".to_string())
///     .response_time("2025-06-01T12:00:01.500Z".to_string())
///     .request_duration(1500)
///     .operation_type(OperationType::Chat)
///     .call();
///
/// assert!(request.total_cost.is_none());
/// assert_eq!(request.completion_start_time, request.response_time);
/// ```
#[builder]
pub fn create_metering_request(
    transaction_id: String,
    model: String,
    token_counts: TokenCounts,
    stop_reason: String,
    request_time: String,
    response_time: String,
    request_duration: u64,
    operation_type: OperationType,
    #[builder(default)] is_streamed: bool,
    #[builder(default)] time_to_first_token: u64,
    usage_metadata: Option<UsageMetadata>,
) -> MeteringRequest {
    let subscriber = usage_metadata.clone().unwrap_or_default();

    MeteringRequest {
        cache_creation_token_count: token_counts.cached_tokens.unwrap_or(0),
        cache_read_token_count: 0,
        input_token_cost: None,
        output_token_cost: None,
        total_cost: None,
        input_token_count: token_counts.input_tokens,
        output_token_count: token_counts.output_tokens,
        total_token_count: token_counts.total_tokens,
        reasoning_token_count: token_counts.reasoning_tokens.unwrap_or(0),
        cost_type: "AI".to_string(),
        model,
        provider: PROVIDER_NAME.to_string(),
        model_source: MODEL_SOURCE.to_string(),
        completion_start_time: response_time.clone(),
        request_time,
        response_time,
        request_duration,
        stop_reason,
        transaction_id,
        operation_type,
        is_streamed,
        time_to_first_token,
        trace_id: subscriber.trace_id,
        task_type: subscriber.task_type,
        subscriber_email: subscriber.subscriber_email,
        subscriber_id: subscriber.subscriber_id,
        subscriber_credential_name: subscriber.subscriber_credential_name,
        subscriber_credential: subscriber.subscriber_credential,
        organization_id: subscriber.organization_id,
        subscription_id: subscriber.subscription_id,
        product_id: subscriber.product_id,
        agent: subscriber.agent,
        response_quality_score: subscriber.response_quality_score,
        middleware_source: MIDDLEWARE_SOURCE.to_string(),
        usage_metadata,
    }
}
