//! ---
//! pc_section: "01-core-functionality"
//! pc_subsection: "module"
//! pc_type: "source"
//! pc_scope: "code"
//! pc_description: "Shared primitives for the podcraft workspace."
//! pc_version: "v0.0.0-prealpha"
//! pc_owner: "tbd"
//! ---
//! Shared primitives for the podcraft workspace.
//! This crate exposes project configuration loading, the derived runtime
//! settings resolver, and logging bootstrap consumed across the workspace.

pub mod config;
pub mod logging;
pub mod resolver;
pub mod service;

pub use config::{
    ConfigError, ConfigValue, LoggingConfig, ManagementConfig, ProjectConfig, RuntimeSettings,
    PROJECT_FILE_NAME, STATE_FILE_NAME, WORK_DIR_NAME,
};
pub use logging::{init_tracing, LogFormat};
pub use resolver::{ConfigResolver, PortSpec, PortTarget, Protocol, VolumeSpec};
pub use service::Service;
