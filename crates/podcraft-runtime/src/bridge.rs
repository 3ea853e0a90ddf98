//! ---
//! pc_section: "02-runtime-adapters"
//! pc_subsection: "module"
//! pc_type: "source"
//! pc_scope: "code"
//! pc_description: "Scoped podman API service used as the runtime connection."
//! pc_version: "v0.0.0-prealpha"
//! pc_owner: "tbd"
//! ---
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::{Duration, Instant};

use tempfile::TempDir;
use tokio::process::{Child, Command};
use tokio::time::sleep;
use tracing::debug;

use crate::{Result, RuntimeError};

const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// A `podman system service` process listening on a private unix socket.
///
/// The process is killed when the value is dropped, and the socket directory
/// is removed with it, so no helper outlives the session that spawned it.
#[derive(Debug)]
pub struct BridgeService {
    child: Child,
    socket: PathBuf,
    _dir: TempDir,
}

impl BridgeService {
    /// Spawn the service and wait until its socket exists.
    pub async fn spawn(podman: &Path, timeout: Duration) -> Result<Self> {
        let dir = tempfile::Builder::new()
            .prefix("podcraft-bridge-")
            .tempdir()?;
        let socket = dir.path().join("podman.sock");
        let endpoint = format!("unix://{}", socket.display());

        let mut child = Command::new(podman)
            .args(["system", "service", "--time", "0", endpoint.as_str()])
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| RuntimeError::Spawn {
                program: podman.display().to_string(),
                source,
            })?;

        let deadline = Instant::now() + timeout;
        while !socket.exists() {
            if let Some(status) = child.try_wait()? {
                return Err(RuntimeError::CommandFailed {
                    command: format!("{} system service {}", podman.display(), endpoint),
                    status: status.code().unwrap_or(-1),
                    stderr: "bridge service exited before its socket appeared".to_owned(),
                });
            }
            if Instant::now() >= deadline {
                return Err(RuntimeError::BridgeTimeout(timeout));
            }
            sleep(POLL_INTERVAL).await;
        }

        debug!(socket = %socket.display(), pid = ?child.id(), "runtime bridge up");
        Ok(Self {
            child,
            socket,
            _dir: dir,
        })
    }

    /// Connection URL for `podman --url`.
    pub fn url(&self) -> String {
        format!("unix://{}", self.socket.display())
    }

    /// Stop the service and wait for it to exit.
    pub async fn terminate(mut self) -> Result<()> {
        if self.child.try_wait()?.is_none() {
            self.child.kill().await?;
        }
        debug!(socket = %self.socket.display(), "runtime bridge stopped");
        Ok(())
    }
}
