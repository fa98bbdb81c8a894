// Library root: exposes the bootstrapper for integration tests and for
// services that embed it in their own startup sequence.
// The binary entry point is src/main.rs.

pub mod bootstrap;
pub mod config;
pub mod error;
pub mod logger;

pub use bootstrap::MetadataBootstrapper;
pub use error::AppError;
