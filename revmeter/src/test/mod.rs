
use futures::StreamExt;
use serde_json::{Value, json};
use std::sync::Arc;
use std::time::Duration;
use utils::{FakeClient, RecordingReporter, VendorError, test_config};
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use crate::{
    Config, EmbeddingModel, Error, GenerativeClient, GenerativeModel, Metering, ModelParams, OperationType, Provider,
    ReportMode, UsageMetadata,
};

fn gemini_response() -> Value {
    json!({
        "candidates": [{"content": {"parts": [{"text": "Hello there"}]}, "finishReason": "STOP"}],
        "usageMetadata": {"promptTokenCount": 3, "candidatesTokenCount": 7, "totalTokenCount": 10},
        "model": "m1"
    })
}

fn recording(config: &Config) -> (Metering, Arc<RecordingReporter>) {
    let reporter = Arc::new(RecordingReporter::new());
    let metering = Metering::with_reporter(config, reporter.clone()).unwrap();
    (metering, reporter)
}

/// Full path: metered model -> HTTP reporter -> stub collector
#[test_log::test(tokio::test)]
async fn test_e2e_generate_content_reported_to_collector() {
    let mock_server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/meter/v2/ai/completions"))
        .and(header("authorization", "Bearer hak_e2e"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&mock_server)
        .await;

    let config = Config {
        metering_api_key: Some("hak_e2e".to_string()),
        metering_base_url: format!("{}/meter/v2", mock_server.uri()),
        ..Default::default()
    };
    let metering = Metering::new(&config).unwrap();
    let client = metering.instrument(FakeClient::new(Provider::GoogleAi).responding(gemini_response()));
    let model = client.get_generative_model(ModelParams::new("gemini-2.0-flash"));

    let request = json!({"contents": [{"role": "user", "parts": [{"text": "Hi"}]}]});
    let response = model.generate_content(request.clone()).await.unwrap();
    assert_eq!(response, gemini_response());
    assert_eq!(client.inner().calls(), vec![request]);

    let received = mock_server.received_requests().await.unwrap();
    assert_eq!(received.len(), 1);
    let body: Value = serde_json::from_slice(&received[0].body).unwrap();
    assert_eq!(body["inputTokenCount"], 3);
    assert_eq!(body["outputTokenCount"], 7);
    assert_eq!(body["totalTokenCount"], 10);
    assert_eq!(body["operationType"], "CHAT");
    assert_eq!(body["isStreamed"], false);
    assert_eq!(body["model"], "m1");
    assert_eq!(body["stopReason"], "STOP");
    assert_eq!(body["provider"], "Google");
    assert_eq!(body["totalCost"], Value::Null);
    assert_eq!(body["timeToFirstToken"], 0);
}

#[test_log::test(tokio::test)]
async fn test_collector_failure_does_not_fail_the_call() {
    let mock_server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(500).set_body_string("internal error"))
        .expect(1)
        .mount(&mock_server)
        .await;

    let config = Config {
        metering_api_key: Some("hak_e2e".to_string()),
        metering_base_url: mock_server.uri(),
        ..Default::default()
    };
    let metering = Metering::new(&config).unwrap();
    let model = metering
        .instrument(FakeClient::new(Provider::VertexAi).responding(gemini_response()))
        .get_generative_model(ModelParams::new("gemini-1.5-pro"));

    let response = model.generate_content(json!({"contents": []})).await.unwrap();
    assert_eq!(response, gemini_response());
}

#[test_log::test(tokio::test)]
async fn test_reporter_error_is_swallowed() {
    let reporter = Arc::new(RecordingReporter::failing(503));
    let metering = Metering::with_reporter(&test_config(), reporter.clone()).unwrap();
    let model = metering
        .instrument(FakeClient::new(Provider::GoogleAi).responding(gemini_response()))
        .get_generative_model(ModelParams::new("gemini-2.0-flash"));

    assert!(model.generate_content(json!({})).await.is_ok());
    assert_eq!(reporter.requests().len(), 1);
}

#[test_log::test(tokio::test)]
async fn test_vendor_error_propagates_without_report() {
    let (metering, reporter) = recording(&test_config());
    let model = metering
        .instrument(FakeClient::new(Provider::GoogleAi).failing("quota exceeded"))
        .get_generative_model(ModelParams::new("gemini-2.0-flash"));

    let err = model.generate_content(json!({"contents": []})).await.unwrap_err();
    assert_eq!(err, VendorError("quota exceeded".to_string()));
    assert!(reporter.requests().is_empty());

    let embedder = metering
        .instrument(FakeClient::new(Provider::VertexAi).failing("bad input"))
        .get_embedding_model(ModelParams::new("text-embedding-004"));
    let err = embedder.embed_content(json!({})).await.unwrap_err();
    assert_eq!(err, VendorError("bad input".to_string()));
    assert!(reporter.requests().is_empty());
}

#[test_log::test(tokio::test)]
async fn test_degraded_response_reports_defaults() {
    let (metering, reporter) = recording(&test_config());
    let model = metering
        .instrument(FakeClient::new(Provider::GoogleAi).responding(json!("plain text")))
        .get_generative_model(ModelParams::new("gemini-2.0-flash"));

    let response = model.generate_content(json!({})).await.unwrap();
    assert_eq!(response, json!("plain text"));

    let reports = reporter.requests();
    assert_eq!(reports.len(), 1);
    assert_eq!(reports[0].input_token_count, 0);
    assert_eq!(reports[0].output_token_count, 0);
    assert_eq!(reports[0].stop_reason, "STOP");
    // Falls back to the model the caller asked for
    assert_eq!(reports[0].model, "gemini-2.0-flash");
}

#[test_log::test(tokio::test)]
async fn test_streaming_time_to_first_token() {
    let (metering, reporter) = recording(&test_config());
    let client = metering.instrument(FakeClient::new(Provider::GoogleAi).streaming(vec![
        (Duration::from_millis(50), json!({"text": "Hel"})),
        (Duration::from_millis(300), json!({"text": "lo"})),
    ]));
    let model = client.get_generative_model(ModelParams::new("gemini-2.0-flash"));

    let result = model.generate_content_stream(json!({"contents": []})).await.unwrap();
    assert_eq!(metering.registry().len(), 1);

    let chunks: Vec<Value> = result.into_stream().map(|chunk| chunk.unwrap()).collect().await;
    assert_eq!(chunks, vec![json!({"text": "Hel"}), json!({"text": "lo"})]);
    assert!(metering.registry().is_empty());

    let reports = reporter.requests();
    assert_eq!(reports.len(), 1);
    let report = &reports[0];
    assert!(report.is_streamed);
    assert_eq!(report.operation_type, OperationType::Chat);
    assert_eq!(report.model, "gemini-2.0-flash");
    assert_eq!(report.input_token_count, 0);
    assert_eq!(report.output_token_count, 0);
    assert!(
        (50..300).contains(&report.time_to_first_token),
        "time to first token was {}ms",
        report.time_to_first_token
    );
    assert!(report.request_duration >= 350);
}

#[test_log::test(tokio::test)]
async fn test_stream_without_chunks_reports_zero_ttft() {
    let (metering, reporter) = recording(&test_config());
    let model = metering
        .instrument(FakeClient::new(Provider::VertexAi))
        .get_generative_model(ModelParams::new("gemini-1.5-pro"));

    let result = model.generate_content_stream(json!({})).await.unwrap();
    assert_eq!(result.into_stream().count().await, 0);

    let reports = reporter.requests();
    assert_eq!(reports.len(), 1);
    assert_eq!(reports[0].time_to_first_token, 0);
}

#[test_log::test(tokio::test)]
async fn test_abandoned_stream_is_finalized_once() {
    let (metering, reporter) = recording(&test_config());
    let model = metering
        .instrument(FakeClient::new(Provider::GoogleAi).streaming(vec![
            (Duration::ZERO, json!({"text": "first"})),
            (Duration::from_secs(10), json!({"text": "never read"})),
        ]))
        .get_generative_model(ModelParams::new("gemini-2.0-flash"));

    let mut stream = model.generate_content_stream(json!({})).await.unwrap().into_stream();
    assert_eq!(stream.next().await.unwrap().unwrap(), json!({"text": "first"}));
    drop(stream);

    assert!(metering.registry().is_empty());
    reporter.wait_for(1).await;
    tokio::time::sleep(Duration::from_millis(50)).await;
    let reports = reporter.requests();
    assert_eq!(reports.len(), 1);
    assert!(reports[0].is_streamed);
}

#[test_log::test(tokio::test)]
async fn test_stream_start_failure_cleans_up() {
    let (metering, reporter) = recording(&test_config());
    let model = metering
        .instrument(FakeClient::new(Provider::GoogleAi).failing_stream_start("stream refused"))
        .get_generative_model(ModelParams::new("gemini-2.0-flash"));

    let err = model.generate_content_stream(json!({})).await.unwrap_err();
    assert_eq!(err, VendorError("stream refused".to_string()));
    assert!(metering.registry().is_empty());
    assert!(reporter.requests().is_empty());
}

#[test_log::test(tokio::test)]
async fn test_cancelled_stream_start_cleans_up() {
    let (metering, reporter) = recording(&test_config());
    let model = metering
        .instrument(FakeClient::new(Provider::GoogleAi).delaying_stream_start(Duration::from_secs(10)))
        .get_generative_model(ModelParams::new("gemini-2.0-flash"));

    let outcome = tokio::time::timeout(Duration::from_millis(50), model.generate_content_stream(json!({}))).await;
    assert!(outcome.is_err());
    assert!(metering.registry().is_empty());
    assert!(reporter.requests().is_empty());
}

#[test_log::test(tokio::test)]
async fn test_overlapping_streams_are_tracked_separately() {
    let (metering, reporter) = recording(&test_config());
    let client = metering.instrument(FakeClient::new(Provider::GoogleAi).streaming(vec![
        (Duration::from_millis(10), json!({"text": "a"})),
        (Duration::from_millis(10), json!({"text": "b"})),
    ]));
    let model = client.get_generative_model(ModelParams::new("gemini-2.0-flash"));

    let first = model.generate_content_stream(json!({})).await.unwrap().into_stream();
    let second = model.generate_content_stream(json!({})).await.unwrap().into_stream();
    assert_eq!(metering.registry().len(), 2);

    let (a, b) = tokio::join!(first.collect::<Vec<_>>(), second.collect::<Vec<_>>());
    assert_eq!(a.len(), 2);
    assert_eq!(b.len(), 2);
    assert!(metering.registry().is_empty());

    let reports = reporter.requests();
    assert_eq!(reports.len(), 2);
    assert_ne!(reports[0].transaction_id, reports[1].transaction_id);
}

#[test_log::test(tokio::test)]
async fn test_google_ai_embeddings_report_zero_tokens() {
    let (metering, reporter) = recording(&test_config());
    let embedder = metering
        .instrument(FakeClient::new(Provider::GoogleAi).responding(json!({
            "embedding": {"values": [0.1, 0.2, 0.3]},
            "usageMetadata": {"promptTokenCount": 5, "totalTokenCount": 5}
        })))
        .get_embedding_model(ModelParams::new("text-embedding-004"));

    let response = embedder.embed_content(json!({"content": {"parts": [{"text": "hello"}]}})).await.unwrap();
    assert_eq!(response["embedding"]["values"], json!([0.1, 0.2, 0.3]));

    let reports = reporter.requests();
    assert_eq!(reports.len(), 1);
    assert_eq!(reports[0].operation_type, OperationType::Embed);
    assert_eq!(reports[0].input_token_count, 0);
    assert_eq!(reports[0].total_token_count, 0);
    assert_eq!(reports[0].stop_reason, "STOP");
    assert_eq!(reports[0].model, "text-embedding-004");
    assert!(!reports[0].is_streamed);
}

#[test_log::test(tokio::test)]
async fn test_vertex_ai_embeddings_read_token_counts() {
    let (metering, reporter) = recording(&test_config());
    let embedder = metering
        .instrument(FakeClient::new(Provider::VertexAi).responding(json!({
            "embeddings": [{"values": [0.5]}],
            "usageMetadata": {"promptTokenCount": 5, "totalTokenCount": 5}
        })))
        .get_embedding_model(ModelParams::new("text-embedding-005"));

    embedder.embed_content(json!({})).await.unwrap();

    let reports = reporter.requests();
    assert_eq!(reports.len(), 1);
    assert_eq!(reports[0].input_token_count, 5);
    assert_eq!(reports[0].total_token_count, 5);
    assert_eq!(reports[0].stop_reason, "STOP");
}

#[test_log::test(tokio::test)]
async fn test_disabled_metering_passes_through() {
    let config = Config {
        metering_api_key: None,
        ..test_config()
    };
    let (metering, reporter) = recording(&config);
    assert!(!metering.is_enabled());

    let client = metering.instrument(FakeClient::new(Provider::GoogleAi).responding(gemini_response()).streaming(vec![
        (Duration::ZERO, json!({"text": "a"})),
    ]));
    assert!(!client.is_metered());
    let model = client.get_generative_model(ModelParams::new("gemini-2.0-flash"));

    assert_eq!(model.generate_content(json!({})).await.unwrap(), gemini_response());

    let stream = model.generate_content_stream(json!({})).await.unwrap().into_stream();
    assert!(!stream.is_metered());
    assert_eq!(metering.registry().len(), 0);
    assert_eq!(stream.count().await, 1);

    assert!(reporter.requests().is_empty());
    assert!(metering.active_providers().is_empty());
}

#[test_log::test(tokio::test)]
async fn test_double_instrumentation_reports_once() {
    let (metering, reporter) = recording(&test_config());
    let once = metering.instrument(FakeClient::new(Provider::VertexAi).responding(gemini_response()));
    assert!(once.is_metered());
    let twice = metering.instrument(once);
    assert!(twice.is_metered());

    let model = twice.get_generative_model(ModelParams::new("gemini-1.5-pro"));
    model.generate_content(json!({})).await.unwrap();

    assert_eq!(reporter.requests().len(), 1);
    assert_eq!(metering.active_providers(), vec![Provider::VertexAi]);
}

#[test_log::test(tokio::test)]
async fn test_background_mode_does_not_wait_for_the_collector() {
    let config = Config {
        report_mode: ReportMode::Background,
        ..test_config()
    };
    let reporter = Arc::new(RecordingReporter::slow(Duration::from_millis(200)));
    let metering = Metering::with_reporter(&config, reporter.clone()).unwrap();
    let model = metering
        .instrument(FakeClient::new(Provider::GoogleAi).responding(gemini_response()))
        .get_generative_model(ModelParams::new("gemini-2.0-flash"));

    model.generate_content(json!({})).await.unwrap();
    assert!(reporter.requests().is_empty());

    reporter.wait_for(1).await;
    assert_eq!(reporter.requests()[0].input_token_count, 3);
}

#[test_log::test(tokio::test)]
async fn test_usage_metadata_is_passed_through() {
    let (metering, reporter) = recording(&test_config());
    let client = metering.instrument(FakeClient::new(Provider::GoogleAi).responding(gemini_response()));
    let model = client
        .get_generative_model(ModelParams::new("gemini-2.0-flash"))
        .with_usage_metadata(UsageMetadata {
            organization_id: Some("org-instance".to_string()),
            ..Default::default()
        });

    model
        .generate_content(json!({
            "contents": [],
            "usageMetadata": {"subscriberId": "sub-42", "traceId": "trace-1", "costCenter": "ml"}
        }))
        .await
        .unwrap();
    model.generate_content(json!({"contents": []})).await.unwrap();

    let reports = reporter.requests();
    assert_eq!(reports.len(), 2);
    assert_eq!(reports[0].subscriber_id.as_deref(), Some("sub-42"));
    assert_eq!(reports[0].trace_id.as_deref(), Some("trace-1"));
    assert_eq!(reports[0].organization_id, None);
    assert_eq!(
        reports[0].usage_metadata.as_ref().unwrap().extra.get("costCenter"),
        Some(&json!("ml"))
    );
    assert_eq!(reports[1].organization_id.as_deref(), Some("org-instance"));
}

#[test]
fn test_invalid_configuration_fails_activation() {
    let config = Config {
        metering_base_url: "ftp://collector".to_string(),
        ..test_config()
    };
    assert!(matches!(Metering::new(&config), Err(Error::Configuration { .. })));
    assert!(matches!(
        Metering::with_reporter(&config, Arc::new(RecordingReporter::new())),
        Err(Error::Configuration { .. })
    ));

    let zero_timeout = Config {
        timeout: Some(Duration::ZERO),
        ..test_config()
    };
    assert!(matches!(Metering::new(&zero_timeout), Err(Error::Configuration { .. })));
    assert!(Metering::new(&test_config()).is_ok());
}
