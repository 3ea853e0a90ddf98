//! ---
//! pc_section: "05-networking-external-interfaces"
//! pc_subsection: "binary"
//! pc_type: "source"
//! pc_scope: "code"
//! pc_description: "Subcommands of the podcraft control CLI."
//! pc_version: "v0.0.0-prealpha"
//! pc_owner: "tbd"
//! ---
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::Subcommand;
use podcraft_core::{CleanupOutcome, CleanupReport, Engine};
use podcraft_runtime::RuntimeClient;
use tracing::info;

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Remove everything previously built, then build images, pod and containers.
    Build,
    /// Remove everything previously built.
    Unbuild,
    /// Start the pod.
    Start,
    /// Stop the pod.
    Stop,
    /// Restart the pod.
    Restart,
    /// Freeze the pod.
    Pause,
    /// Thaw a paused pod.
    Unpause,
    /// Show build staleness; exits 0 when the pod is running.
    Status,
    /// Send a console command to the server.
    Rcon {
        #[arg(required = true, trailing_var_arg = true, allow_hyphen_values = true)]
        command: Vec<String>,
    },
    /// Ask the server for its status; exits with the probe's exit code.
    Ping,
}

pub async fn run(
    command: Commands,
    engine: &mut Engine,
    client: &dyn RuntimeClient,
) -> Result<ExitCode> {
    match command {
        Commands::Build => {
            let report = engine.cleanup(client).await?;
            print_cleanup(&report);
            engine
                .rebuild_everything(client)
                .await
                .context("rebuild failed")?;
            info!(project = %engine.project().root().display(), "build complete");
        }
        Commands::Unbuild => {
            let report = engine.cleanup(client).await?;
            print_cleanup(&report);
        }
        Commands::Start => engine.start(client).await?,
        Commands::Stop => engine.stop(client).await?,
        Commands::Restart => engine.restart(client).await?,
        Commands::Pause => engine.pause(client).await?,
        Commands::Unpause => engine.unpause(client).await?,
        Commands::Status => {
            for (service, staleness) in engine.staleness(client).await? {
                println!("{:<8} {}", service, staleness);
            }
            let running = engine.is_running(client).await?;
            println!("{:<8} {}", "pod", if running { "running" } else { "not running" });
            return Ok(if running {
                ExitCode::SUCCESS
            } else {
                ExitCode::FAILURE
            });
        }
        Commands::Rcon { command } => {
            let output = engine.rcon(&command, client).await?;
            print!("{}", output.output);
            return Ok(exit_code(output.exit_code));
        }
        Commands::Ping => {
            let (code, reply) = engine.probe_status(client).await?;
            println!("{}", reply);
            return Ok(exit_code(code));
        }
    }
    Ok(ExitCode::SUCCESS)
}

fn print_cleanup(report: &CleanupReport) {
    for entry in &report.entries {
        let outcome = match &entry.outcome {
            CleanupOutcome::Removed => "removed".to_owned(),
            CleanupOutcome::AlreadyAbsent => "already gone".to_owned(),
            CleanupOutcome::RemovalFailed(reason) => format!("kept: {}", reason),
        };
        println!("{} {} ({}): {}", entry.kind, entry.name, entry.id, outcome);
    }
}

fn exit_code(code: i32) -> ExitCode {
    ExitCode::from(exit_status(code))
}

/// Exit statuses outside a byte (signals, runtime errors) become a plain failure.
fn exit_status(code: i32) -> u8 {
    u8::try_from(code).unwrap_or(1)
}
