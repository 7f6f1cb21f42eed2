//! # revmeter: usage metering for Google generative AI clients
//!
//! `revmeter` sits between an application and its Google AI (Gemini API) or Vertex AI client and
//! reports the usage of every call to the [Revenium](https://www.revenium.io) metering API:
//! token counts, timing, stop reason, model and any caller supplied attribution metadata.
//!
//! ## Overview
//!
//! Applications obtain clients through a [`Metering`] factory instead of using the vendor client
//! directly. The returned [`MeteredClient`] implements the same [`vendor`] traits as the client
//! it wraps, so `generate_content`, `generate_content_stream` and `embed_content` keep their
//! arguments, results and errors. After each successful call a [`MeteringRequest`] is built and
//! sent to the collector.
//!
//! Metering never changes the outcome of a call. A failed vendor call is returned unchanged and
//! is not reported; a failed report is logged and dropped. Costs are left null so that the
//! collector prices calls from its own model tables.
//!
//! ## Streaming
//!
//! Streaming calls are wrapped in a [`MeteredStream`] which records the time to the first chunk
//! and reports once the stream ends or is dropped. In-flight streams are tracked in a
//! [`StreamRegistry`] keyed by transaction id, so overlapping streams never share state.
//! The Google SDKs do not expose usage on streamed responses, so streamed calls report zero
//! tokens.
//!
//! ## Configuration
//!
//! See [`config`]. The only required setting is `REVENIUM_METERING_API_KEY`; without it every
//! client is passed through unmetered.
//!
//! ```ignore
//! use revmeter::{Config, Metering, ModelParams};
//!
//! let config = Config::from_env()?;
//! revmeter::telemetry::init_telemetry(&config)?;
//!
//! let metering = Metering::new(&config)?;
//! let client = metering.instrument(vertex_client);
//! let model = client.get_generative_model(ModelParams::new("gemini-1.5-pro"));
//! ```

pub mod config;
pub mod errors;
pub mod extract;
pub mod identity;
pub mod metering;
pub mod middleware;
pub mod telemetry;
pub mod tracker;
pub mod types;
pub mod usage;
pub mod vendor;

#[cfg(test)]
mod test;

pub use config::{Config, LogLevel, ReportMode};
pub use errors::{Error, Result};
pub use middleware::{MeteredClient, MeteredEmbeddingModel, MeteredModel, MeteredStream, Metering};
pub use tracker::StreamRegistry;
pub use types::{
    MeteringRequest, ModelInfo, OperationType, Provider, StreamTracker, TokenCounts, TransactionContext, UsageMetadata,
};
pub use vendor::{EmbeddingModel, GenerativeClient, GenerativeModel, ModelParams, Payload, StreamResult};
