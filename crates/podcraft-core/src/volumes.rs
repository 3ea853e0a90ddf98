//! ---
//! pc_section: "01-core-functionality"
//! pc_subsection: "module"
//! pc_type: "source"
//! pc_scope: "code"
//! pc_description: "Creating host paths before they are bind-mounted."
//! pc_version: "v0.0.0-prealpha"
//! pc_owner: "tbd"
//! ---
use std::fs;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::error::{EngineError, Result};

/// A host path created by [`materialize`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Materialized {
    Directory(PathBuf),
    File(PathBuf),
}

/// Create every missing path in `paths`.
///
/// A final segment containing `.` marks a file; anything else is a directory.
/// `.json` files start as an empty array. Existing paths are left alone.
pub fn materialize<I, P>(paths: I) -> Result<Vec<Materialized>>
where
    I: IntoIterator<Item = P>,
    P: AsRef<Path>,
{
    let mut created = Vec::new();
    for path in paths {
        let path = path.as_ref();
        if path.exists() {
            continue;
        }
        if names_a_file(path) {
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent).map_err(|source| EngineError::io(parent, source))?;
            }
            fs::write(path, initial_contents(path))
                .map_err(|source| EngineError::io(path, source))?;
            debug!(path = %path.display(), "created volume file");
            created.push(Materialized::File(path.to_path_buf()));
        } else {
            fs::create_dir_all(path).map_err(|source| EngineError::io(path, source))?;
            debug!(path = %path.display(), "created volume directory");
            created.push(Materialized::Directory(path.to_path_buf()));
        }
    }
    Ok(created)
}

fn names_a_file(path: &Path) -> bool {
    path.file_name()
        .and_then(|name| name.to_str())
        .map(|name| name.contains('.'))
        .unwrap_or(false)
}

fn initial_contents(path: &Path) -> &'static [u8] {
    match path.extension().and_then(|ext| ext.to_str()) {
        Some("json") => b"[]",
        _ => b"",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dotted_names_become_files() {
        assert!(names_a_file(Path::new("banned-ips.json")));
        assert!(names_a_file(Path::new(".tmp/server.properties")));
        assert!(!names_a_file(Path::new(".tmp/_mc_crash-reports")));
        assert!(!names_a_file(Path::new("logs")));
    }

    #[test]
    fn creates_missing_paths_and_preserves_existing_ones() {
        let dir = tempfile::tempdir().unwrap();
        let logs = dir.path().join("logs");
        let bans = dir.path().join("banned-ips.json");
        let props = dir.path().join(".tmp").join("server.properties");

        let created = materialize([&logs, &bans, &props]).unwrap();
        assert_eq!(
            created,
            vec![
                Materialized::Directory(logs.clone()),
                Materialized::File(bans.clone()),
                Materialized::File(props.clone()),
            ]
        );
        assert!(logs.is_dir());
        assert_eq!(fs::read_to_string(&bans).unwrap(), "[]");
        assert_eq!(fs::read_to_string(&props).unwrap(), "");

        fs::write(&bans, r#"[{"ip":"10.0.0.1"}]"#).unwrap();
        assert!(materialize([&logs, &bans]).unwrap().is_empty());
        assert_eq!(fs::read_to_string(&bans).unwrap(), r#"[{"ip":"10.0.0.1"}]"#);
    }
}
