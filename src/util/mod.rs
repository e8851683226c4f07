//! Shared helpers

pub mod bounded;
pub mod logging;

pub use bounded::run_bounded;
pub use logging::{init_default, init_from_env, init_logging, LoggingConfig};
