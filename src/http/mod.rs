//! Outbound HTTP execution and the request logging pipeline

pub mod executor;
pub mod logging;

pub use executor::{AuthSpec, HttpExecutor, HttpMethod, RequestSpec, ResponseEnvelope};
pub use logging::LoggingPipeline;
