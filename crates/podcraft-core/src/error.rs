//! ---
//! pc_section: "01-core-functionality"
//! pc_subsection: "module"
//! pc_type: "source"
//! pc_scope: "code"
//! pc_description: "Error type for engine workflows."
//! pc_version: "v0.0.0-prealpha"
//! pc_owner: "tbd"
//! ---
use std::path::PathBuf;

use podcraft_common::ConfigError;
use podcraft_persistence::StateError;
use podcraft_runtime::RuntimeError;

pub type Result<T> = std::result::Result<T, EngineError>;

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("no podcraft.toml found in {start} or any parent directory")]
    NoProjectFound { start: PathBuf },
    /// A lifecycle verb was requested before anything was built.
    #[error("nothing has been built yet; run `podcraftctl build` first")]
    NothingBuilt,
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    State(#[from] StateError),
    #[error(transparent)]
    Runtime(#[from] RuntimeError),
    #[error("io error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl EngineError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        EngineError::Io {
            path: path.into(),
            source,
        }
    }

    /// True when a cached reference pointed at an object the runtime no longer has.
    pub fn is_not_found(&self) -> bool {
        match self {
            EngineError::Runtime(err) => err.is_not_found(),
            EngineError::State(err) => err.is_not_found(),
            _ => false,
        }
    }
}
