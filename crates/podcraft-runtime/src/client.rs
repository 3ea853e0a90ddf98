//! ---
//! pc_section: "02-runtime-adapters"
//! pc_subsection: "module"
//! pc_type: "source"
//! pc_scope: "code"
//! pc_description: "Container runtime boundary and its implementations."
//! pc_version: "v0.0.0-prealpha"
//! pc_owner: "tbd"
//! ---
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use async_trait::async_trait;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use url::Url;

use crate::{Result, RuntimeError};

/// Pod status reported by the runtime while the pod is up.
pub const RUNNING_STATUS: &str = "Running";

/// Metadata key holding the image a container was created from.
pub const META_IMAGE_ID: &str = "image_id";
/// Metadata key holding a pod's status.
pub const META_STATUS: &str = "status";
/// Metadata key holding an image's declared volume mount points.
pub const META_VOLUMES: &str = "volumes";
/// Metadata key holding an object's name.
pub const META_NAME: &str = "name";
/// Metadata key holding image tags.
pub const META_TAGS: &str = "tags";
/// Metadata key holding a container's state.
pub const META_STATE: &str = "state";
/// Metadata key holding an image's declared exposed ports.
pub const META_EXPOSED_PORTS: &str = "exposed_ports";

/// Kind of runtime object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ObjectKind {
    /// Container image.
    Image,
    /// Container.
    Container,
    /// Pod.
    Pod,
}

impl fmt::Display for ObjectKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ObjectKind::Image => "image",
            ObjectKind::Container => "container",
            ObjectKind::Pod => "pod",
        })
    }
}

/// A live runtime object: id plus an inspect snapshot.
///
/// The snapshot is only valid for the operation that fetched it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuntimeObject {
    /// Object kind.
    pub kind: ObjectKind,
    /// Runtime identifier.
    pub id: String,
    /// Normalized inspect data.
    pub metadata: Map<String, Value>,
}

impl RuntimeObject {
    /// Build an object with empty metadata.
    pub fn new(kind: ObjectKind, id: impl Into<String>) -> Self {
        Self {
            kind,
            id: id.into(),
            metadata: Map::new(),
        }
    }

    /// Attach a metadata entry.
    pub fn with_meta(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.to_owned(), value.into());
        self
    }

    fn meta_str(&self, key: &str) -> Option<&str> {
        self.metadata.get(key).and_then(Value::as_str)
    }

    /// Image a container was created from.
    pub fn image_id(&self) -> Option<&str> {
        self.meta_str(META_IMAGE_ID)
    }

    /// Pod status string.
    pub fn status(&self) -> Option<&str> {
        self.meta_str(META_STATUS)
    }

    /// Object name, when the runtime reported one.
    pub fn name(&self) -> Option<&str> {
        self.meta_str(META_NAME)
    }

    /// Mount points an image declares as volumes.
    pub fn declared_volumes(&self) -> Vec<String> {
        self.metadata
            .get(META_VOLUMES)
            .and_then(Value::as_array)
            .map(|items| {
                items
                    .iter()
                    .filter_map(Value::as_str)
                    .map(str::to_owned)
                    .collect()
            })
            .unwrap_or_default()
    }
}

/// Where an image build context comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BuildSource {
    /// Gzipped tarball with a single top-level directory.
    Url(Url),
    /// Local directory used as the build context as-is.
    Directory(PathBuf),
}

impl fmt::Display for BuildSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BuildSource::Url(url) => write!(f, "{}", url),
            BuildSource::Directory(path) => write!(f, "{}", path.display()),
        }
    }
}

impl FromStr for BuildSource {
    type Err = RuntimeError;

    fn from_str(s: &str) -> Result<Self> {
        if s.starts_with("http://") || s.starts_with("https://") {
            let url = Url::parse(s).map_err(|err| RuntimeError::InvalidSource {
                location: s.to_owned(),
                reason: err.to_string(),
            })?;
            Ok(BuildSource::Url(url))
        } else if s.trim().is_empty() {
            Err(RuntimeError::InvalidSource {
                location: s.to_owned(),
                reason: "empty source".to_owned(),
            })
        } else {
            Ok(BuildSource::Directory(PathBuf::from(s)))
        }
    }
}

/// Host path bind-mounted into a container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BindMount {
    /// Absolute host path.
    pub source: PathBuf,
    /// Mount point inside the container.
    pub destination: String,
}

impl BindMount {
    /// Render as a `--mount` argument.
    pub fn to_mount_arg(&self) -> String {
        format!(
            "type=bind,source={},destination={}",
            self.source.display(),
            self.destination
        )
    }
}

/// Pod lifecycle verbs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PodAction {
    /// Start all containers.
    Start,
    /// Stop all containers.
    Stop,
    /// Restart all containers.
    Restart,
    /// Freeze all containers.
    Pause,
    /// Thaw all containers.
    Unpause,
}

impl PodAction {
    /// Runtime verb for this action.
    pub fn as_str(&self) -> &'static str {
        match self {
            PodAction::Start => "start",
            PodAction::Stop => "stop",
            PodAction::Restart => "restart",
            PodAction::Pause => "pause",
            PodAction::Unpause => "unpause",
        }
    }
}

impl fmt::Display for PodAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of running a command inside a container.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ExecOutput {
    /// Exit code, `-1` when the process was killed by a signal.
    pub exit_code: i32,
    /// Standard output followed by standard error.
    pub output: String,
}

impl ExecOutput {
    /// Successful output with the given text.
    pub fn ok(output: impl Into<String>) -> Self {
        Self {
            exit_code: 0,
            output: output.into(),
        }
    }
}

/// Operations the reconciliation engine needs from a container runtime.
///
/// Every lookup reports a missing object as [`RuntimeError::NotFound`].
#[async_trait]
pub trait RuntimeClient: Send + Sync {
    /// Build an image from `source` with the given build arguments.
    async fn build_image(
        &self,
        source: &BuildSource,
        build_args: &IndexMap<String, String>,
    ) -> Result<RuntimeObject>;

    /// Inspect an image.
    async fn image(&self, id: &str) -> Result<RuntimeObject>;

    /// Force-remove an image.
    async fn remove_image(&self, id: &str) -> Result<()>;

    /// Create an empty pod publishing `publish` (`external:internal/proto`).
    async fn create_pod(&self, publish: &[String]) -> Result<RuntimeObject>;

    /// Inspect a pod.
    async fn pod(&self, id: &str) -> Result<RuntimeObject>;

    /// Force-remove a pod and everything in it.
    async fn remove_pod(&self, id: &str) -> Result<()>;

    /// Apply a lifecycle verb to a pod.
    async fn pod_action(&self, id: &str, action: PodAction) -> Result<()>;

    /// Create a container from `image` inside `pod`.
    async fn create_container(
        &self,
        image: &RuntimeObject,
        pod: &RuntimeObject,
        mounts: &[BindMount],
    ) -> Result<RuntimeObject>;

    /// Inspect a container.
    async fn container(&self, id: &str) -> Result<RuntimeObject>;

    /// Force-remove a container.
    async fn remove_container(&self, id: &str) -> Result<()>;

    /// Run `argv` inside a container and capture its output.
    async fn exec(&self, container_id: &str, argv: &[String]) -> Result<ExecOutput>;
}
