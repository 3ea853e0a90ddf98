//! ---
//! pc_section: "02-runtime-adapters"
//! pc_subsection: "module"
//! pc_type: "source"
//! pc_scope: "code"
//! pc_description: "Fetching and unpacking image build contexts."
//! pc_version: "v0.0.0-prealpha"
//! pc_owner: "tbd"
//! ---
use std::fs;
use std::path::{Path, PathBuf};

use flate2::read::GzDecoder;
use tempfile::TempDir;
use tracing::{debug, info};

use crate::client::BuildSource;
use crate::{Result, RuntimeError};

/// A build context on disk. Downloaded contexts are deleted on drop.
#[derive(Debug)]
pub struct PreparedSource {
    root: PathBuf,
    _scratch: Option<TempDir>,
}

impl PreparedSource {
    /// Directory to hand to the image builder.
    pub fn root(&self) -> &Path {
        &self.root
    }
}

/// Make `source` available as a local directory.
pub async fn prepare(source: &BuildSource) -> Result<PreparedSource> {
    match source {
        BuildSource::Directory(path) => {
            if !path.is_dir() {
                return Err(RuntimeError::InvalidSource {
                    location: path.display().to_string(),
                    reason: "not a directory".to_owned(),
                });
            }
            Ok(PreparedSource {
                root: path.clone(),
                _scratch: None,
            })
        }
        BuildSource::Url(url) => {
            info!(%url, "downloading build source");
            let response = reqwest::get(url.clone()).await?.error_for_status()?;
            let bytes = response.bytes().await?;
            debug!(%url, bytes = bytes.len(), "build source downloaded");

            let scratch = tempfile::Builder::new()
                .prefix("podcraft-src-")
                .tempdir()?;
            let root = unpack(&bytes, scratch.path())?;
            Ok(PreparedSource {
                root,
                _scratch: Some(scratch),
            })
        }
    }
}

/// Unpack a gzipped tarball into `dest` and return the context root.
///
/// Archives from source hosts wrap everything in one top-level directory;
/// when that is the case the directory is the root, otherwise `dest` is.
pub fn unpack(bytes: &[u8], dest: &Path) -> Result<PathBuf> {
    let mut archive = tar::Archive::new(GzDecoder::new(bytes));
    archive.unpack(dest)?;

    let entries: Vec<PathBuf> = fs::read_dir(dest)?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .collect();
    match entries.as_slice() {
        [single] if single.is_dir() => Ok(single.clone()),
        _ => Ok(dest.to_path_buf()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::write::GzEncoder;
    use flate2::Compression;

    fn tarball(files: &[(&str, &str)]) -> Vec<u8> {
        let encoder = GzEncoder::new(Vec::new(), Compression::default());
        let mut builder = tar::Builder::new(encoder);
        for (path, contents) in files {
            let mut header = tar::Header::new_gnu();
            header.set_size(contents.len() as u64);
            header.set_mode(0o644);
            header.set_cksum();
            builder
                .append_data(&mut header, path, contents.as_bytes())
                .unwrap();
        }
        builder.into_inner().unwrap().finish().unwrap()
    }

    #[test]
    fn unpack_strips_single_top_level_directory() {
        let bytes = tarball(&[
            ("docker-server-master/Dockerfile", "FROM scratch\n"),
            ("docker-server-master/entry.sh", "#!/bin/sh\n"),
        ]);
        let dir = tempfile::tempdir().unwrap();
        let root = unpack(&bytes, dir.path()).unwrap();
        assert_eq!(root, dir.path().join("docker-server-master"));
        assert!(root.join("Dockerfile").is_file());
    }

    #[test]
    fn unpack_keeps_flat_archives_in_place() {
        let bytes = tarball(&[("Dockerfile", "FROM scratch\n"), ("run.sh", "")]);
        let dir = tempfile::tempdir().unwrap();
        let root = unpack(&bytes, dir.path()).unwrap();
        assert_eq!(root, dir.path());
    }

    #[tokio::test]
    async fn directory_sources_must_exist() {
        let missing = BuildSource::Directory(PathBuf::from("/nonexistent/podcraft-src"));
        let err = prepare(&missing).await.unwrap_err();
        assert!(matches!(err, RuntimeError::InvalidSource { .. }));

        let dir = tempfile::tempdir().unwrap();
        let present = BuildSource::Directory(dir.path().to_path_buf());
        let prepared = prepare(&present).await.unwrap();
        assert_eq!(prepared.root(), dir.path());
    }
}
