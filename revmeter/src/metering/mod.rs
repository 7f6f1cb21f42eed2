//! Building and delivering metering records.

pub mod reporter;
pub mod request;

pub use reporter::{DEFAULT_COMPLETIONS_PATH, HttpReporter, Reporter};
pub use request::{MIDDLEWARE_SOURCE, create_metering_request};
