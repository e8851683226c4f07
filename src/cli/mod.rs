pub mod commands;
pub mod handlers;

pub use commands::{CliArgs, Commands, RunArgs};
pub use handlers::{handle_run, handle_validate, EXIT_CONFIG_ERROR, EXIT_OK, EXIT_RUN_ERROR};
