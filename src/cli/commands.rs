use crate::report::DEFAULT_REPORT_NAME;
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

/// Mirrors, builds and packages a fleet of service repositories
#[derive(Parser, Debug)]
#[command(
    name = "fleetpack",
    about = "Mirrors, builds and packages a fleet of service repositories",
    version,
    author,
    long_about = "fleetpack fetches every listed service from the hosted repository, builds it \
                  inside a container, downloads the sources of each resolved dependency and \
                  packs everything into one archive per service. Archives can be published \
                  to an artifact repository; a report classifies every dependency."
)]
pub struct CliArgs {
    #[command(subcommand)]
    pub command: Commands,

    #[arg(long, global = true, value_name = "LEVEL", help = "Set logging level")]
    pub log_level: Option<String>,

    #[arg(short = 'v', long, global = true, help = "Enable debug output")]
    pub verbose: bool,

    #[arg(
        short = 'q',
        long,
        global = true,
        conflicts_with = "verbose",
        help = "Quiet mode - suppress non-error output"
    )]
    pub quiet: bool,

    #[arg(
        short = 'c',
        long,
        global = true,
        value_name = "FILE",
        default_value = "config.json",
        help = "Path to the JSON configuration file"
    )]
    pub config: PathBuf,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    #[command(
        about = "Process every listed service",
        long_about = "Fetches, builds and packages every service in service_list, then writes \
                      the text and JSON reports into the output directory.\n\n\
                      Examples:\n  \
                      fleetpack run\n  \
                      fleetpack --config prod.json run --force\n  \
                      fleetpack run --clear-cache --report nightly.txt"
    )]
    Run(RunArgs),

    #[command(
        about = "Validate configuration and credentials",
        long_about = "Loads the configuration file, checks it together with the credentials \
                      from the environment and prints the effective configuration.\n\n\
                      Examples:\n  \
                      fleetpack validate\n  \
                      fleetpack --config prod.json validate"
    )]
    Validate,
}

#[derive(Args, Debug, Clone)]
pub struct RunArgs {
    #[arg(long, help = "Remove the output directory before the run")]
    pub force: bool,

    #[arg(long, help = "Remove the dependency cache before the run")]
    pub clear_cache: bool,

    #[arg(
        long,
        value_name = "NAME",
        default_value = DEFAULT_REPORT_NAME,
        help = "File name of the text report inside the output directory"
    )]
    pub report: String,
}
