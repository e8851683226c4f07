//! fleetpack - mirrors, builds and packages a fleet of service repositories
//!
//! For every listed service the source snapshot is fetched from the hosted
//! repository and built inside a container. The dependency set the build
//! resolved is then downloaded from the internal namespaces, the external
//! artifact repository or the local content cache. Everything ends up in one
//! archive per service, optionally published to an artifact repository, and a
//! report classifies each dependency.
//!
//! # Core Concepts
//!
//! - **Coordinate**: `group:artifact:version` of one dependency
//! - **Classification tables**: per-service sets of known, unknown and
//!   source-less dependencies, shared by all concurrent tasks
//! - **Content cache**: `cacheRoot/group/artifact/version/` entries reused
//!   across runs
//!
//! # Example Usage
//!
//! ```no_run
//! use fleetpack::config::{Credentials, MirrorConfig};
//! use fleetpack::pipeline::Orchestrator;
//! use std::path::Path;
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let credentials = Credentials::from_env();
//! let config = MirrorConfig::load(Path::new("config.json"))?;
//! config.validate(&credentials)?;
//!
//! let orchestrator = Orchestrator::connect(config, &credentials).await?;
//! let summary = orchestrator.run().await;
//! println!("{} services processed", summary.processed().len());
//! # Ok(())
//! # }
//! ```
//!
//! # Project Structure
//!
//! - [`pipeline`]: run orchestration and the per-service state machine
//! - [`build`]: build descriptor parsing, mirror injection and container builds
//! - [`resolve`]: dependency harvesting and download
//! - [`cache`], [`archive`], [`checksum`]: on-disk artifacts
//! - [`hosted`], [`upload`]: remote collaborators

pub mod archive;
pub mod build;
pub mod cache;
pub mod checksum;
pub mod cli;
pub mod config;
pub mod coordinate;
pub mod error;
pub mod hosted;
pub mod pipeline;
pub mod progress;
pub mod report;
pub mod resolve;
pub mod results;
pub mod upload;
pub mod util;

pub use config::{ConfigError, Credentials, MirrorConfig};
pub use coordinate::Coordinate;
pub use error::{CoordinateError, MirrorError};
pub use pipeline::{Orchestrator, RunOptions, RunSummary};
pub use results::{Bucket, ResultSet, ResultSnapshot};
pub use util::{init_default, init_from_env, init_logging, LoggingConfig};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name
pub const NAME: &str = env!("CARGO_PKG_NAME");
