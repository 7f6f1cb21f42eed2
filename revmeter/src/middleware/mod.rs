//! Metered adapters over the vendor traits.
//!
//! [`Metering`] is built once at startup and hands out [`MeteredClient`]s. Models obtained from a
//! metered client report every successful call to the collector, and otherwise behave exactly
//! like the vendor's own: same arguments, same responses, same errors.
//!
//! ```ignore
//! let metering = Metering::new(&Config::from_env()?)?;
//! let client = metering.instrument(GoogleAiClient::new(api_key));
//! let model = client.get_generative_model(ModelParams::new("gemini-2.0-flash"));
//! let response = model.generate_content(request).await?;
//! ```

mod stream;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashSet;
use futures::FutureExt;
use futures::future::BoxFuture;
use metrics::counter;
use scopeguard::ScopeGuard;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

pub use stream::MeteredStream;
use stream::Finalizer;

use crate::config::{Config, ReportMode};
use crate::errors::{Error, Result};
use crate::identity::{calculate_duration_ms, format_timestamp};
use crate::metering::{HttpReporter, Reporter, create_metering_request};
use crate::tracker::StreamRegistry;
use crate::types::{MeteringRequest, ModelInfo, OperationType, Provider, TokenCounts, TransactionContext, UsageMetadata};
use crate::usage::{self, DEFAULT_STOP_REASON};
use crate::vendor::{EmbeddingModel, GenerativeClient, GenerativeModel, ModelParams, Payload, StreamResult};

/// Factory for metered clients, holding the reporter and the stream registry they share.
///
/// Cheap to clone.
#[derive(Clone)]
pub struct Metering {
    shared: Arc<Shared>,
}

struct Shared {
    reporter: Arc<dyn Reporter>,
    api_key: Option<String>,
    base_url: String,
    mode: ReportMode,
    verbose: bool,
    registry: StreamRegistry,
    activated: DashSet<Provider>,
}

impl Metering {
    /// Build a factory reporting over HTTP.
    ///
    /// Fails with [`Error::Configuration`] if the configuration does not validate or the HTTP
    /// client cannot be built.
    pub fn new(config: &Config) -> Result<Self> {
        let reporter = HttpReporter::from_config(config)
            .map_err(|e| Error::configuration(format!("Unable to build metering reporter: {e}")))?;
        Self::with_reporter(config, Arc::new(reporter))
    }

    /// Build a factory delivering reports through `reporter`.
    pub fn with_reporter(config: &Config, reporter: Arc<dyn Reporter>) -> Result<Self> {
        config.validate()?;

        let api_key = config.api_key().map(str::to_string);
        if config.verbose_startup {
            debug!(
                base_url = %config.metering_base_url,
                report_mode = ?config.report_mode,
                metering_enabled = api_key.is_some(),
                "Initializing Revenium metering"
            );
        }

        Ok(Self {
            shared: Arc::new(Shared {
                reporter,
                api_key,
                base_url: config.metering_base_url.clone(),
                mode: config.report_mode,
                verbose: config.verbose_startup,
                registry: StreamRegistry::new(),
                activated: DashSet::new(),
            }),
        })
    }

    /// Wrap `client` so that the models it hands out are metered.
    ///
    /// Returns a pass-through wrapper when no API key is configured, or when `client` is
    /// already metered so that calls are reported once.
    pub fn instrument<C: GenerativeClient>(&self, client: C) -> MeteredClient<C> {
        let provider = client.provider();

        if !self.is_enabled() {
            warn!(provider = %provider, "REVENIUM_METERING_API_KEY not found - metering will be disabled");
            return MeteredClient::passthrough(client);
        }

        if client.is_metered() {
            debug!(provider = %provider, "Client is already metered, not wrapping again");
            return MeteredClient::passthrough(client);
        }

        if self.shared.activated.insert(provider) {
            info!(provider = %provider, "{} middleware activated", provider.display_name());
        }
        if self.shared.verbose {
            debug!(provider = %provider, "Instrumented generate_content, generate_content_stream and embed_content");
        }

        MeteredClient {
            inner: client,
            metering: Some(self.clone()),
        }
    }

    /// Whether reports are sent at all.
    pub fn is_enabled(&self) -> bool {
        self.shared.api_key.is_some()
    }

    /// Providers for which at least one client has been instrumented.
    pub fn active_providers(&self) -> Vec<Provider> {
        self.shared.activated.iter().map(|provider| *provider).collect()
    }

    /// Streams currently being tracked.
    pub fn registry(&self) -> &StreamRegistry {
        &self.shared.registry
    }

    pub fn report_mode(&self) -> ReportMode {
        self.shared.mode
    }

    /// Future delivering `request` once. Failures are logged and counted, never returned.
    pub(crate) fn dispatch(&self, request: MeteringRequest) -> BoxFuture<'static, ()> {
        let shared = self.shared.clone();
        async move {
            let Some(api_key) = shared.api_key.as_deref() else {
                return;
            };

            match shared.reporter.send(&request, api_key, &shared.base_url).await {
                Ok(()) => {
                    counter!("revmeter_reports_total", "outcome" => "success").increment(1);
                }
                Err(e) => {
                    counter!("revmeter_reports_total", "outcome" => "failure").increment(1);
                    error!(
                        transaction_id = %request.transaction_id,
                        status = ?e.status(),
                        error = %e,
                        "Failed to send metering data to Revenium"
                    );
                }
            }
        }
        .boxed()
    }

    /// Deliver `request` according to the configured [`ReportMode`].
    pub(crate) async fn report(&self, request: MeteringRequest) {
        match self.shared.mode {
            ReportMode::Await => self.dispatch(request).await,
            ReportMode::Background => spawn_report(self.dispatch(request)),
        }
    }
}

/// Run a report on the current tokio runtime, if there is one.
pub(crate) fn spawn_report(report: BoxFuture<'static, ()>) {
    match tokio::runtime::Handle::try_current() {
        Ok(handle) => {
            handle.spawn(report);
        }
        Err(_) => warn!("No tokio runtime available, dropping metering report"),
    }
}

/// Report for a completed non-streaming call.
fn completed_request(
    context: TransactionContext,
    end_time: DateTime<Utc>,
    model: String,
    token_counts: TokenCounts,
    stop_reason: String,
    operation_type: OperationType,
) -> MeteringRequest {
    create_metering_request()
        .transaction_id(context.transaction_id)
        .model(model)
        .token_counts(token_counts)
        .stop_reason(stop_reason)
        .request_time(format_timestamp(context.start_time))
        .response_time(format_timestamp(end_time))
        .request_duration(calculate_duration_ms(context.start_time, end_time))
        .operation_type(operation_type)
        .maybe_usage_metadata(context.usage_metadata)
        .call()
}

/// A vendor client whose models are metered.
pub struct MeteredClient<C> {
    inner: C,
    metering: Option<Metering>,
}

impl<C> MeteredClient<C> {
    fn passthrough(inner: C) -> Self {
        Self { inner, metering: None }
    }

    pub fn inner(&self) -> &C {
        &self.inner
    }

    pub fn into_inner(self) -> C {
        self.inner
    }
}

impl<C: GenerativeClient> GenerativeClient for MeteredClient<C> {
    type Model = MeteredModel<C::Model>;
    type EmbeddingModel = MeteredEmbeddingModel<C::EmbeddingModel>;

    fn provider(&self) -> Provider {
        self.inner.provider()
    }

    fn is_metered(&self) -> bool {
        self.metering.is_some() || self.inner.is_metered()
    }

    fn get_generative_model(&self, params: ModelParams) -> Self::Model {
        let model_name = params.model.clone();
        MeteredModel {
            inner: self.inner.get_generative_model(params),
            metering: self.metering.clone(),
            model_name,
            provider: self.inner.provider(),
            usage_metadata: None,
        }
    }

    fn get_embedding_model(&self, params: ModelParams) -> Self::EmbeddingModel {
        let model_name = params.model.clone();
        MeteredEmbeddingModel {
            inner: self.inner.get_embedding_model(params),
            metering: self.metering.clone(),
            model_name,
            provider: self.inner.provider(),
            usage_metadata: None,
        }
    }
}

/// A generative model whose calls are metered.
pub struct MeteredModel<M> {
    inner: M,
    metering: Option<Metering>,
    model_name: String,
    provider: Provider,
    usage_metadata: Option<UsageMetadata>,
}

impl<M> MeteredModel<M> {
    /// Attach metadata reported for every call that does not carry its own `usageMetadata`.
    pub fn with_usage_metadata(mut self, usage_metadata: UsageMetadata) -> Self {
        self.usage_metadata = Some(usage_metadata);
        self
    }

    pub fn inner(&self) -> &M {
        &self.inner
    }

    fn open_transaction(&self, request: &impl Payload, is_streaming: bool) -> TransactionContext {
        let usage_metadata = usage::extract_usage_metadata(&request.to_payload(), self.usage_metadata.as_ref());
        TransactionContext::open(
            ModelInfo::new(self.model_name.clone(), self.provider),
            is_streaming,
            usage_metadata,
        )
    }
}

#[async_trait]
impl<M: GenerativeModel> GenerativeModel for MeteredModel<M> {
    type Request = M::Request;
    type Response = M::Response;
    type Chunk = M::Chunk;
    type Stream = MeteredStream<M::Stream>;
    type StreamResponse = M::StreamResponse;
    type Error = M::Error;

    async fn generate_content(&self, request: Self::Request) -> std::result::Result<Self::Response, Self::Error> {
        let Some(metering) = &self.metering else {
            return self.inner.generate_content(request).await;
        };

        let context = self.open_transaction(&request, false);
        debug!(
            transaction_id = %context.transaction_id,
            model = %context.model.name,
            provider = %self.provider,
            "Intercepted generate_content"
        );

        let response = match self.inner.generate_content(request).await {
            Ok(response) => response,
            Err(e) => {
                error!(
                    transaction_id = %context.transaction_id,
                    model = %context.model.name,
                    error = %e,
                    "{} generate_content failed",
                    self.provider.display_name()
                );
                return Err(e);
            }
        };
        let end_time = Utc::now();

        let report = {
            let payload = response.to_payload();
            let token_counts = usage::extract_token_counts(&payload, self.provider).into_value();
            let stop_reason =
                usage::extract_stop_reason(&payload).value_or_note(&context.transaction_id, "stop reason");
            let model = usage::extract_model_name(&payload, Some(&context.model.name))
                .value_or_note(&context.transaction_id, "model name");
            completed_request(context, end_time, model, token_counts, stop_reason, OperationType::Chat)
        };

        metering.report(report).await;
        Ok(response)
    }

    async fn generate_content_stream(
        &self,
        request: Self::Request,
    ) -> std::result::Result<StreamResult<Self::Stream, Self::StreamResponse>, Self::Error> {
        let Some(metering) = &self.metering else {
            let result = self.inner.generate_content_stream(request).await?;
            return Ok(result.map_stream(MeteredStream::passthrough));
        };

        let context = self.open_transaction(&request, true);
        debug!(
            transaction_id = %context.transaction_id,
            model = %context.model.name,
            provider = %self.provider,
            "Intercepted generate_content_stream"
        );

        let registry = metering.registry().clone();
        registry.open(&context.transaction_id, context.start_time, context.usage_metadata);
        // Removes the tracker if the stream never starts, including when this future is dropped
        let guard = scopeguard::guard(context.transaction_id, move |transaction_id| {
            registry.finalize(&transaction_id);
        });

        let result = match self.inner.generate_content_stream(request).await {
            Ok(result) => result,
            Err(e) => {
                error!(
                    transaction_id = %*guard,
                    model = %context.model.name,
                    error = %e,
                    "{} generate_content_stream failed",
                    self.provider.display_name()
                );
                return Err(e);
            }
        };

        let transaction_id = ScopeGuard::into_inner(guard);
        let finalizer = Finalizer::new(metering.clone(), transaction_id, context.model.name);
        Ok(result.map_stream(|stream| MeteredStream::new(stream, finalizer)))
    }
}

/// An embedding model whose calls are metered.
pub struct MeteredEmbeddingModel<E> {
    inner: E,
    metering: Option<Metering>,
    model_name: String,
    provider: Provider,
    usage_metadata: Option<UsageMetadata>,
}

impl<E> MeteredEmbeddingModel<E> {
    /// Attach metadata reported for every call that does not carry its own `usageMetadata`.
    pub fn with_usage_metadata(mut self, usage_metadata: UsageMetadata) -> Self {
        self.usage_metadata = Some(usage_metadata);
        self
    }

    pub fn inner(&self) -> &E {
        &self.inner
    }
}

#[async_trait]
impl<E: EmbeddingModel> EmbeddingModel for MeteredEmbeddingModel<E> {
    type Request = E::Request;
    type Response = E::Response;
    type Error = E::Error;

    async fn embed_content(&self, request: Self::Request) -> std::result::Result<Self::Response, Self::Error> {
        let Some(metering) = &self.metering else {
            return self.inner.embed_content(request).await;
        };

        let usage_metadata = usage::extract_usage_metadata(&request.to_payload(), self.usage_metadata.as_ref());
        let context = TransactionContext::open(
            ModelInfo::new(self.model_name.clone(), self.provider),
            false,
            usage_metadata,
        );
        debug!(
            transaction_id = %context.transaction_id,
            model = %context.model.name,
            provider = %self.provider,
            "Intercepted embed_content"
        );

        let response = match self.inner.embed_content(request).await {
            Ok(response) => response,
            Err(e) => {
                error!(
                    transaction_id = %context.transaction_id,
                    model = %context.model.name,
                    error = %e,
                    "{} embed_content failed",
                    self.provider.display_name()
                );
                return Err(e);
            }
        };
        let end_time = Utc::now();

        let report = {
            let payload = response.to_payload();
            let token_counts = if self.provider.reports_embedding_usage() {
                usage::extract_token_counts(&payload, self.provider).into_value()
            } else {
                TokenCounts::zero()
            };
            let model = usage::extract_model_name(&payload, Some(&context.model.name))
                .value_or_note(&context.transaction_id, "model name");
            completed_request(
                context,
                end_time,
                model,
                token_counts,
                DEFAULT_STOP_REASON.to_string(),
                OperationType::Embed,
            )
        };

        metering.report(report).await;
        Ok(response)
    }
}
