//! ---
//! pc_section: "01-core-functionality"
//! pc_subsection: "module"
//! pc_type: "source"
//! pc_scope: "code"
//! pc_description: "Logical service names shared across the workspace."
//! pc_version: "v0.0.0-prealpha"
//! pc_owner: "tbd"
//! ---
use std::fmt;

use serde::{Deserialize, Serialize};

/// One of the two core services of a project.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Service {
    Server,
    Manager,
}

impl Service {
    pub const ALL: [Service; 2] = [Service::Server, Service::Manager];

    /// Key used for this service's image and container in the state document.
    pub fn as_str(&self) -> &'static str {
        match self {
            Service::Server => "server",
            Service::Manager => "manager",
        }
    }
}

impl fmt::Display for Service {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
