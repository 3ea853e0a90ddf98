//! ---
//! pc_section: "03-persistence-logging"
//! pc_subsection: "module"
//! pc_type: "source"
//! pc_scope: "code"
//! pc_description: "Project state cache and its error type."
//! pc_version: "v0.0.0-prealpha"
//! pc_owner: "tbd"
//! ---
#![warn(missing_docs)]
//! Local cache of the runtime objects a podcraft project owns.

use podcraft_runtime::{ObjectKind, RuntimeError};

/// Result alias used throughout the persistence crate.
pub type Result<T> = std::result::Result<T, StateError>;

/// Error type for the state cache.
#[derive(Debug, thiserror::Error)]
pub enum StateError {
    /// Nothing is recorded under this logical name.
    #[error("no {kind} recorded for {name}")]
    UnknownResource {
        /// Kind of reference that was looked up.
        kind: ObjectKind,
        /// Logical name that was looked up.
        name: String,
    },
    /// The runtime failed while resolving a cached reference.
    #[error(transparent)]
    Runtime(#[from] RuntimeError),
    /// Wrapper for IO errors encountered while reading/writing the state document.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    /// Wrapper for JSON serialization issues.
    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

impl StateError {
    /// True when a cached reference points at an object the runtime no longer has.
    pub fn is_not_found(&self) -> bool {
        matches!(self, StateError::Runtime(err) if err.is_not_found())
    }
}

pub mod state;

pub use state::{
    ReferenceOrigin, ResourceReference, StateDocument, StateStore, Staleness, POD_NAME,
};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_resource_display() {
        let err = StateError::UnknownResource {
            kind: ObjectKind::Image,
            name: "server".into(),
        };
        assert_eq!(format!("{err}"), "no image recorded for server");
        assert!(!err.is_not_found());
    }
}
