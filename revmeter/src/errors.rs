use thiserror::Error as ThisError;

/// Result type for metering operations.
pub type Result<T> = std::result::Result<T, Error>;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Errors raised by the metering layer.
///
/// None of these ever reach the caller of a wrapped vendor method: report failures are
/// logged and swallowed at the wrapper boundary. They surface from [`crate::Metering::new`],
/// [`crate::Config::validate`] and the lower-level building blocks.
#[derive(ThisError, Debug)]
pub enum Error {
    /// Failed to build or deliver a metering report
    #[error("{message}")]
    Metering {
        message: String,
        #[source]
        source: Option<BoxError>,
    },

    /// The metering API answered with a non-success status
    #[error("Metering API request failed with status {status}")]
    ApiResponse { status: u16, body: String },

    /// Invalid configuration, raised at activation time
    #[error("Configuration error: {message}")]
    Configuration { message: String },

    /// Token counts could not be read from a provider response
    #[error("Token counting error: {message}")]
    TokenCounting { message: String },

    /// A stream tracker was missing or in an unexpected state
    #[error("Stream tracking error: {message}")]
    StreamTracking { message: String },
}

impl Error {
    pub(crate) fn metering(message: impl Into<String>, source: impl Into<BoxError>) -> Self {
        Error::Metering {
            message: message.into(),
            source: Some(source.into()),
        }
    }

    pub(crate) fn configuration(message: impl Into<String>) -> Self {
        Error::Configuration { message: message.into() }
    }

    /// HTTP status of the collector response, when the error came from one.
    pub fn status(&self) -> Option<u16> {
        match self {
            Error::ApiResponse { status, .. } => Some(*status),
            _ => None,
        }
    }
}
