//! Subcommand handlers. Each returns the process exit code.

use super::commands::RunArgs;
use crate::config::{ConfigError, Credentials, MirrorConfig};
use crate::error::MirrorError;
use crate::pipeline::{prepare_output, Orchestrator, RunOptions};
use crate::report;
use std::path::Path;
use tracing::{error, info, warn};

pub const EXIT_OK: i32 = 0;
pub const EXIT_RUN_ERROR: i32 = 1;
pub const EXIT_CONFIG_ERROR: i32 = 2;

fn exit_code(error: &MirrorError) -> i32 {
    if error.is_fatal() {
        EXIT_CONFIG_ERROR
    } else {
        EXIT_RUN_ERROR
    }
}

/// Loads and fully validates the configuration file.
pub fn load_config(path: &Path, credentials: &Credentials) -> Result<MirrorConfig, ConfigError> {
    let config = MirrorConfig::load(path)?;
    config.validate(credentials)?;
    config.check_fd_headroom()?;
    Ok(config)
}

pub async fn handle_run(config_path: &Path, args: &RunArgs) -> i32 {
    let credentials = Credentials::from_env();
    let config = match load_config(config_path, &credentials) {
        Ok(config) => config,
        Err(e) => {
            error!("{}", e);
            return EXIT_CONFIG_ERROR;
        }
    };

    let options = RunOptions {
        force: args.force,
        clear_cache: args.clear_cache,
    };
    if let Err(e) = prepare_output(&config, &options) {
        let code = exit_code(&e);
        error!("{:#}", anyhow::Error::from(e));
        return code;
    }

    let orchestrator = match Orchestrator::connect(config, &credentials).await {
        Ok(orchestrator) => orchestrator,
        Err(e) => {
            let code = exit_code(&e);
            error!("{:#}", anyhow::Error::from(e));
            return code;
        }
    };

    let summary = orchestrator.run().await;
    let snapshot = orchestrator.results().snapshot();
    if let Err(e) = report::write_reports(
        &orchestrator.config().output_dir,
        &args.report,
        &snapshot,
        &summary,
    ) {
        error!("{:#}", e);
        return EXIT_RUN_ERROR;
    }

    let failed = summary.failed();
    if !failed.is_empty() {
        warn!(services = ?failed, "Some services failed");
    }
    info!(
        processed = summary.processed().len(),
        skipped = summary.skipped().len(),
        failed = failed.len(),
        "Finished"
    );
    EXIT_OK
}

pub fn handle_validate(config_path: &Path) -> i32 {
    let credentials = Credentials::from_env();
    let config = match load_config(config_path, &credentials) {
        Ok(config) => config,
        Err(e) => {
            error!("{}", e);
            return EXIT_CONFIG_ERROR;
        }
    };

    match serde_json::to_string_pretty(&config) {
        Ok(rendered) => {
            println!("{}", rendered);
            info!(config = %config_path.display(), "Configuration is valid");
            EXIT_OK
        }
        Err(e) => {
            error!("Failed to render configuration: {}", e);
            EXIT_RUN_ERROR
        }
    }
}
