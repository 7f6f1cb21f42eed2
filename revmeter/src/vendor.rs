//! The slice of a Google generative AI client that metering needs.
//!
//! SDK bindings implement these traits for their client and model types. The metered adapters
//! in [`crate::middleware`] implement the same traits on top of them, so application code is
//! written against the traits and does not change when metering is switched on.

use async_trait::async_trait;
use futures::Stream;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::borrow::Cow;

use crate::types::Provider;

/// JSON view of a vendor request or response.
///
/// Usage extraction only ever reads through this view, so a payload whose shape differs from
/// what is expected degrades to default values instead of failing.
pub trait Payload {
    fn to_payload(&self) -> Cow<'_, Value>;
}

impl Payload for Value {
    fn to_payload(&self) -> Cow<'_, Value> {
        Cow::Borrowed(self)
    }
}

/// Options passed when obtaining a model from a client.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ModelParams {
    /// Model name, e.g. `gemini-2.0-flash`. Used in reports when the response does not name one.
    pub model: String,
    /// Remaining vendor specific options, passed through untouched
    #[serde(flatten)]
    pub settings: Map<String, Value>,
}

impl ModelParams {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            settings: Map::new(),
        }
    }

    pub fn with_setting(mut self, key: impl Into<String>, value: Value) -> Self {
        self.settings.insert(key.into(), value);
        self
    }
}

/// Result of a streaming generation call: the chunk stream plus the vendor's aggregate handle.
///
/// The stream can only be taken out by value; there is no way to replace it in place.
#[derive(Debug)]
pub struct StreamResult<S, A> {
    stream: S,
    response: A,
}

impl<S, A> StreamResult<S, A> {
    pub fn new(stream: S, response: A) -> Self {
        Self { stream, response }
    }

    /// The aggregate response handle, e.g. a future resolving to the merged response.
    pub fn response(&self) -> &A {
        &self.response
    }

    pub fn into_stream(self) -> S {
        self.stream
    }

    pub fn into_response(self) -> A {
        self.response
    }

    pub fn into_parts(self) -> (S, A) {
        (self.stream, self.response)
    }

    pub(crate) fn map_stream<T>(self, f: impl FnOnce(S) -> T) -> StreamResult<T, A> {
        StreamResult {
            stream: f(self.stream),
            response: self.response,
        }
    }
}

/// A generative model handle (`generateContent`, `generateContentStream`).
#[async_trait]
pub trait GenerativeModel: Send + Sync {
    type Request: Payload + Send + Sync;
    type Response: Payload + Send;
    type Chunk: Send;
    type Stream: Stream<Item = Result<Self::Chunk, Self::Error>> + Send + 'static;
    type StreamResponse: Send;
    type Error: std::error::Error + Send + Sync + 'static;

    async fn generate_content(&self, request: Self::Request) -> Result<Self::Response, Self::Error>;

    async fn generate_content_stream(
        &self,
        request: Self::Request,
    ) -> Result<StreamResult<Self::Stream, Self::StreamResponse>, Self::Error>;
}

/// An embedding model handle (`embedContent`).
#[async_trait]
pub trait EmbeddingModel: Send + Sync {
    type Request: Payload + Send + Sync;
    type Response: Payload + Send;
    type Error: std::error::Error + Send + Sync + 'static;

    async fn embed_content(&self, request: Self::Request) -> Result<Self::Response, Self::Error>;
}

/// A vendor client from which models are obtained.
pub trait GenerativeClient: Send + Sync {
    type Model: GenerativeModel;
    type EmbeddingModel: EmbeddingModel;

    /// Which SDK this client belongs to.
    fn provider(&self) -> Provider;

    /// Whether calls through this client are already being metered.
    fn is_metered(&self) -> bool {
        false
    }

    fn get_generative_model(&self, params: ModelParams) -> Self::Model;

    fn get_embedding_model(&self, params: ModelParams) -> Self::EmbeddingModel;
}
