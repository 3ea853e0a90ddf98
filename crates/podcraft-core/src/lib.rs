//! ---
//! pc_section: "01-core-functionality"
//! pc_subsection: "module"
//! pc_type: "source"
//! pc_scope: "code"
//! pc_description: "Primary reconciliation and lifecycle management."
//! pc_version: "v0.0.0-prealpha"
//! pc_owner: "tbd"
//! ---
//! Project discovery, volume materialization and the reconciliation engine.

pub mod engine;
pub mod error;
pub mod project;
pub mod volumes;

pub use engine::{
    BuildSources, CleanupEntry, CleanupOutcome, CleanupReport, Engine, PlayerCount, ProbeReply,
    ServerStatus, RCON_COMMAND, STATUS_PROBE,
};
pub use error::{EngineError, Result};
pub use project::{find_project, Project};
pub use volumes::{materialize, Materialized};
