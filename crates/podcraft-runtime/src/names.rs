//! ---
//! pc_section: "02-runtime-adapters"
//! pc_subsection: "module"
//! pc_type: "source"
//! pc_scope: "code"
//! pc_description: "Container runtime boundary and its implementations."
//! pc_version: "v0.0.0-prealpha"
//! pc_owner: "tbd"
//! ---
use uuid::Uuid;

/// Generate a runtime-unique name such as `podcraft-server-1a2b3c4d`.
pub fn generate_name(role: &str) -> String {
    let suffix = Uuid::new_v4().simple().to_string();
    format!("podcraft-{}-{}", role, &suffix[..8])
}
