//! ---
//! pc_section: "02-runtime-adapters"
//! pc_subsection: "module"
//! pc_type: "source"
//! pc_scope: "code"
//! pc_description: "Container runtime boundary and its implementations."
//! pc_version: "v0.0.0-prealpha"
//! pc_owner: "tbd"
//! ---
#![warn(missing_docs)]
//! Container runtime access for podcraft.
//!
//! [`RuntimeClient`] is the only seam the reconciliation engine talks through.
//! [`PodmanClient`] drives the podman CLI, optionally through a scoped
//! [`BridgeService`]; [`MockRuntime`] keeps everything in memory for tests.

use std::time::Duration;

pub mod bridge;
pub mod client;
pub mod mock;
pub mod names;
pub mod podman;
pub mod source;

pub use bridge::BridgeService;
pub use client::{
    BindMount, BuildSource, ExecOutput, ObjectKind, PodAction, RuntimeClient, RuntimeObject,
    RUNNING_STATUS,
};
pub use mock::MockRuntime;
pub use podman::PodmanClient;

/// Result alias used throughout the runtime crate.
pub type Result<T> = std::result::Result<T, RuntimeError>;

/// Error type for runtime operations.
#[derive(Debug, thiserror::Error)]
pub enum RuntimeError {
    /// The runtime has no object with this id.
    #[error("no such {kind}: {id}")]
    NotFound {
        /// Kind of object that was looked up.
        kind: ObjectKind,
        /// Identifier that was looked up.
        id: String,
    },
    /// A runtime command exited unsuccessfully.
    #[error("`{command}` exited with status {status}: {stderr}")]
    CommandFailed {
        /// Command line that was executed.
        command: String,
        /// Exit status, `-1` when terminated by a signal.
        status: i32,
        /// Captured standard error.
        stderr: String,
    },
    /// The runtime binary could not be started.
    #[error("failed to spawn {program}: {source}")]
    Spawn {
        /// Program that failed to start.
        program: String,
        /// Underlying IO error.
        #[source]
        source: std::io::Error,
    },
    /// Wrapper for IO errors.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    /// Downloading a build source failed.
    #[error("failed to fetch build source: {0}")]
    Fetch(#[from] reqwest::Error),
    /// The runtime printed something that is not the expected JSON.
    #[error("unexpected runtime output: {0}")]
    Json(#[from] serde_json::Error),
    /// The bridge service socket did not appear in time.
    #[error("runtime bridge did not come up within {0:?}")]
    BridgeTimeout(Duration),
    /// A build source could not be used.
    #[error("invalid build source {location}: {reason}")]
    InvalidSource {
        /// Source as configured.
        location: String,
        /// Why it was rejected.
        reason: String,
    },
}

impl RuntimeError {
    /// True when the error means the object does not exist (any more).
    pub fn is_not_found(&self) -> bool {
        matches!(self, RuntimeError::NotFound { .. })
    }
}
