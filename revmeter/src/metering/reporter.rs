//! Delivery of metering records to the collector.
//!
//! The [`Reporter`] trait abstracts the transport so the interception layer can be exercised
//! without a live collector. [`HttpReporter`] is the production implementation.

use async_trait::async_trait;
use std::time::Duration;
use tracing::{debug, instrument};

use crate::config::Config;
use crate::errors::{Error, Result};
use crate::types::MeteringRequest;

/// Path appended to the base URL when none is configured.
pub const DEFAULT_COMPLETIONS_PATH: &str = "/ai/completions";

/// Sends one metering record to the collector.
///
/// Implementations must not retry; a failed delivery is reported once and dropped by the caller.
#[async_trait]
pub trait Reporter: Send + Sync {
    /// Deliver `request`.
    ///
    /// # Arguments
    /// * `request` - The record to deliver
    /// * `api_key` - Collector API key, sent as a bearer token
    /// * `base_url` - Collector base URL, without the completions path
    ///
    /// # Errors
    /// [`Error::ApiResponse`] when the collector answers with a non-success status,
    /// [`Error::Metering`] when the request could not be sent at all.
    async fn send(&self, request: &MeteringRequest, api_key: &str, base_url: &str) -> Result<()>;
}

/// Production reporter using reqwest.
#[derive(Clone, Debug)]
pub struct HttpReporter {
    client: reqwest::Client,
    completions_path: String,
}

impl HttpReporter {
    /// Create a reporter posting to `{base_url}{completions_path}`.
    pub fn new(completions_path: impl Into<String>, timeout: Option<Duration>) -> Result<Self> {
        let mut builder = reqwest::Client::builder().user_agent(concat!("revmeter/", env!("CARGO_PKG_VERSION")));
        if let Some(timeout) = timeout {
            builder = builder.timeout(timeout);
        }
        let client = builder
            .build()
            .map_err(|e| Error::metering("Failed to create metering HTTP client", e))?;

        Ok(Self {
            client,
            completions_path: completions_path.into(),
        })
    }

    pub fn from_config(config: &Config) -> Result<Self> {
        Self::new(config.completions_path.clone(), config.timeout)
    }

    fn endpoint(&self, base_url: &str) -> String {
        format!("{}{}", base_url.trim_end_matches('/'), self.completions_path)
    }
}

#[async_trait]
impl Reporter for HttpReporter {
    #[instrument(skip_all, fields(transaction_id = %request.transaction_id, model = %request.model))]
    async fn send(&self, request: &MeteringRequest, api_key: &str, base_url: &str) -> Result<()> {
        let url = self.endpoint(base_url);

        let response = self
            .client
            .post(&url)
            .bearer_auth(api_key)
            .json(request)
            .send()
            .await
            .map_err(|e| Error::metering("Failed to send metering data to Revenium", e))?;

        let status = response.status();
        if !status.is_success() {
            // Body is diagnostic only; an unreadable one is reported as empty
            let body = response.text().await.unwrap_or_default();
            return Err(Error::ApiResponse {
                status: status.as_u16(),
                body,
            });
        }

        debug!(
            url = %url,
            status = status.as_u16(),
            input_tokens = request.input_token_count,
            output_tokens = request.output_token_count,
            "Metering data sent to Revenium"
        );
        Ok(())
    }
}
