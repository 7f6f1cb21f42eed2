use anyhow::Context;
use chrono::Utc;
use clap::Parser;
use revmeter::identity::{format_timestamp, generate_transaction_id};
use revmeter::metering::{HttpReporter, Reporter, create_metering_request};
use revmeter::{Config, OperationType, TokenCounts, UsageMetadata, telemetry};

/// Send one zero-token CHAT record, to check that the key and collector URL work.
async fn send_test_record(config: &Config) -> anyhow::Result<()> {
    let api_key = config
        .metering_api_key
        .as_deref()
        .filter(|key| !key.trim().is_empty())
        .context("REVENIUM_METERING_API_KEY must be set to send a test record")?;

    let reporter = HttpReporter::from_config(config)?;
    let now = format_timestamp(Utc::now());
    let request = create_metering_request()
        .transaction_id(generate_transaction_id())
        .model("revmeter-connectivity-check".to_string())
        .token_counts(TokenCounts::zero())
        .stop_reason("STOP".to_string())
        .request_time(now.clone())
        .response_time(now)
        .request_duration(0)
        .operation_type(OperationType::Chat)
        .usage_metadata(UsageMetadata {
            task_type: Some("connectivity-check".to_string()),
            agent: Some("revmeter-cli".to_string()),
            ..Default::default()
        })
        .call();

    reporter
        .send(&request, api_key.trim(), &config.metering_base_url)
        .await
        .context("Test record was rejected")?;

    println!("Test record {} accepted by {}", request.transaction_id, config.metering_base_url);
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = revmeter::config::Args::parse();

    // Load configuration
    let config = Config::load(&args)?;

    // If --validate flag is set, exit successfully after config validation
    if args.validate {
        println!("Configuration is valid.");
        return Ok(());
    }

    telemetry::init_telemetry(&config)?;
    tracing::debug!("{:?}", args);

    if args.send_test {
        return send_test_record(&config).await;
    }

    tracing::info!(
        base_url = %config.metering_base_url,
        metering_enabled = config.metering_enabled(),
        report_mode = ?config.report_mode,
        "Revenium metering configuration loaded"
    );
    Ok(())
}
