use fleetpack::cli::{handle_run, handle_validate, CliArgs, Commands};
use fleetpack::util::logging::{config_from_flags, init_logging};
use fleetpack::VERSION;

use clap::Parser;
use tracing::debug;

#[tokio::main]
async fn main() {
    let args = CliArgs::parse();
    init_logging(config_from_flags(
        args.log_level.as_deref(),
        args.verbose,
        args.quiet,
    ));

    debug!("fleetpack v{} starting", VERSION);
    debug!("Arguments: {:?}", args);

    let exit_code = match &args.command {
        Commands::Run(run_args) => handle_run(&args.config, run_args).await,
        Commands::Validate => handle_validate(&args.config),
    };

    std::process::exit(exit_code);
}
