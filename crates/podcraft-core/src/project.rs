//! ---
//! pc_section: "01-core-functionality"
//! pc_subsection: "module"
//! pc_type: "source"
//! pc_scope: "code"
//! pc_description: "Locating and loading a podcraft project on disk."
//! pc_version: "v0.0.0-prealpha"
//! pc_owner: "tbd"
//! ---
use std::path::{Path, PathBuf};

use podcraft_common::{ProjectConfig, PROJECT_FILE_NAME, STATE_FILE_NAME, WORK_DIR_NAME};
use tracing::debug;

use crate::error::{EngineError, Result};

/// Walk `start` and its ancestors; return the first directory holding `podcraft.toml`.
pub fn find_project(start: &Path) -> Result<PathBuf> {
    let absolute = start
        .canonicalize()
        .map_err(|source| EngineError::io(start, source))?;
    absolute
        .ancestors()
        .find(|dir| dir.join(PROJECT_FILE_NAME).is_file())
        .map(Path::to_path_buf)
        .ok_or_else(|| EngineError::NoProjectFound {
            start: start.to_path_buf(),
        })
}

/// A project root together with its parsed configuration.
#[derive(Debug, Clone)]
pub struct Project {
    root: PathBuf,
    config: ProjectConfig,
}

impl Project {
    /// Find the project enclosing `start` and load it.
    pub fn discover(start: &Path) -> Result<Self> {
        let root = find_project(start)?;
        Self::load(root)
    }

    /// Load the project rooted at `root`.
    pub fn load(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        let config = ProjectConfig::load(&root.join(PROJECT_FILE_NAME))?;
        debug!(root = %root.display(), volumes = config.volumes.len(), "project loaded");
        Ok(Self { root, config })
    }

    /// Project built from an already parsed configuration.
    pub fn from_parts(root: impl Into<PathBuf>, config: ProjectConfig) -> Self {
        Self {
            root: root.into(),
            config,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn config(&self) -> &ProjectConfig {
        &self.config
    }

    /// Scratch directory for generated files.
    pub fn work_dir(&self) -> PathBuf {
        self.root.join(WORK_DIR_NAME)
    }

    pub fn state_path(&self) -> PathBuf {
        self.root.join(STATE_FILE_NAME)
    }

    /// Resolve a project-relative host path.
    pub fn host_path(&self, relative: &Path) -> PathBuf {
        self.root.join(relative)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn finds_the_nearest_enclosing_project() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().canonicalize().unwrap();
        fs::write(root.join(PROJECT_FILE_NAME), "").unwrap();
        let nested = root.join("live").join("region");
        fs::create_dir_all(&nested).unwrap();

        assert_eq!(find_project(&nested).unwrap(), root);
        assert_eq!(find_project(&root).unwrap(), root);
    }

    #[test]
    fn reports_when_no_project_exists() {
        let dir = tempfile::tempdir().unwrap();
        match find_project(dir.path()) {
            Err(EngineError::NoProjectFound { start }) => assert_eq!(start, dir.path()),
            // A stray podcraft.toml above the temp dir would be found instead.
            Ok(found) => assert!(!found.starts_with(dir.path())),
            Err(other) => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn derived_paths_live_under_the_root() {
        let project = Project::from_parts("/srv/mc", ProjectConfig::default());
        assert_eq!(project.state_path(), PathBuf::from("/srv/mc/.tmp/state.json"));
        assert_eq!(
            project.host_path(Path::new("conf/server.properties")),
            PathBuf::from("/srv/mc/conf/server.properties")
        );
        assert_eq!(project.work_dir(), PathBuf::from("/srv/mc/.tmp"));
    }
}
