//! ---
//! pc_section: "05-networking-external-interfaces"
//! pc_subsection: "binary"
//! pc_type: "source"
//! pc_scope: "code"
//! pc_description: "Control CLI for building and driving a podcraft project."
//! pc_version: "v0.0.0-prealpha"
//! pc_owner: "tbd"
//! ---
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use podcraft_common::config::{DEFAULT_MANAGER_SOURCE, DEFAULT_SERVER_SOURCE};
use podcraft_common::{init_tracing, LogFormat, LoggingConfig, RuntimeSettings};
use podcraft_core::{BuildSources, Engine, Project};
use podcraft_runtime::PodmanClient;
use tracing::warn;

mod commands;

use commands::Commands;

#[derive(Debug, Parser)]
#[command(
    author,
    version,
    about = "Build and run a game server pod with its management sidecar",
    long_about = None
)]
struct Cli {
    /// Directory to start the search for podcraft.toml from.
    #[arg(long = "project-dir", value_name = "DIR", default_value = ".")]
    project_dir: PathBuf,

    /// Console log format: `pretty` or `structured-json`.
    #[arg(
        long = "log-format",
        value_name = "FORMAT",
        env = "PODCRAFT_LOG_FORMAT",
        default_value = "pretty"
    )]
    log_format: LogFormat,

    /// Also write a daily rolling JSON log into this directory.
    #[arg(long = "log-dir", value_name = "DIR", env = "PODCRAFT_LOG_DIR")]
    log_dir: Option<PathBuf>,

    #[arg(long, value_name = "PATH", env = "PODCRAFT_PODMAN", default_value = "podman")]
    podman: PathBuf,

    /// Talk to podman directly instead of through a scoped API service.
    #[arg(long = "no-bridge", env = "PODCRAFT_NO_BRIDGE")]
    no_bridge: bool,

    /// Seconds to wait for the API service socket.
    #[arg(long = "bridge-timeout", value_name = "SECS", default_value_t = 10)]
    bridge_timeout: u64,

    /// Tarball URL or local directory for the server image.
    #[arg(
        long = "server-source",
        value_name = "SRC",
        env = "PODCRAFT_SERVER_SOURCE",
        default_value = DEFAULT_SERVER_SOURCE
    )]
    server_source: String,

    /// Tarball URL or local directory for the management image.
    #[arg(
        long = "manager-source",
        value_name = "SRC",
        env = "PODCRAFT_MANAGER_SOURCE",
        default_value = DEFAULT_MANAGER_SOURCE
    )]
    manager_source: String,

    /// Show image build output.
    #[arg(long = "verbose-build")]
    verbose_build: bool,

    #[command(subcommand)]
    command: Commands,
}

impl Cli {
    fn logging(&self) -> LoggingConfig {
        LoggingConfig {
            format: self.log_format,
            directory: self.log_dir.clone(),
            file_prefix: Some("podcraftctl".to_owned()),
        }
    }

    fn runtime_settings(&self) -> RuntimeSettings {
        RuntimeSettings {
            podman: self.podman.clone(),
            use_bridge: !self.no_bridge,
            bridge_timeout: Duration::from_secs(self.bridge_timeout),
            server_source: self.server_source.clone(),
            manager_source: self.manager_source.clone(),
            verbose_build: self.verbose_build,
        }
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();
    init_tracing("podcraftctl", &cli.logging()).context("failed to initialise logging")?;

    let project = Project::discover(&cli.project_dir)?;
    let settings = cli.runtime_settings();
    let sources = BuildSources::from_settings(&settings)?;
    let mut engine = Engine::open(project, sources)?;
    let client = PodmanClient::connect(&settings)
        .await
        .context("failed to connect to podman")?;

    let outcome = commands::run(cli.command, &mut engine, &client).await;

    if let Err(err) = client.shutdown().await {
        warn!(error = %err, "failed to stop the podman API service");
    }
    engine.close().context("failed to write project state")?;
    outcome
}
