//! ---
//! pc_section: "03-persistence-logging"
//! pc_subsection: "module"
//! pc_type: "source"
//! pc_scope: "code"
//! pc_description: "Persisted mapping from logical resource names to runtime objects."
//! pc_version: "v0.0.0-prealpha"
//! pc_owner: "tbd"
//! ---
use std::fmt;
use std::fs;
use std::io::{BufWriter, ErrorKind, Write};
use std::path::{Path, PathBuf};

use indexmap::IndexMap;
use podcraft_runtime::client::META_IMAGE_ID;
use podcraft_runtime::{ObjectKind, RuntimeClient, RuntimeObject};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::{Result, StateError};

/// Logical name used for the singleton pod in errors and logs.
pub const POD_NAME: &str = "pod";

/// Where a reference's metadata came from.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ReferenceOrigin {
    /// Loaded from disk; the object may no longer exist.
    #[default]
    CachedIdOnly,
    /// Refreshed from the runtime during this invocation.
    LiveHandle,
}

/// A persisted claim on a runtime object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceReference {
    /// Runtime identifier.
    pub id: String,
    /// Last known metadata snapshot.
    #[serde(flatten)]
    pub metadata: Map<String, Value>,
    /// Never persisted; everything read from disk is [`ReferenceOrigin::CachedIdOnly`].
    #[serde(skip)]
    pub origin: ReferenceOrigin,
}

impl ResourceReference {
    /// Reference carrying only an id.
    pub fn cached(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            metadata: Map::new(),
            origin: ReferenceOrigin::CachedIdOnly,
        }
    }

    /// Image id embedded in a container reference, if recorded.
    pub fn image_id(&self) -> Option<&str> {
        self.metadata.get(META_IMAGE_ID).and_then(Value::as_str)
    }

    /// True when the metadata was refreshed from the runtime.
    pub fn is_live(&self) -> bool {
        self.origin == ReferenceOrigin::LiveHandle
    }
}

impl From<&RuntimeObject> for ResourceReference {
    fn from(object: &RuntimeObject) -> Self {
        let mut metadata = object.metadata.clone();
        metadata.remove("id");
        Self {
            id: object.id.clone(),
            metadata,
            origin: ReferenceOrigin::LiveHandle,
        }
    }
}

/// On-disk shape of the cache.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StateDocument {
    /// Images by logical service name.
    #[serde(default)]
    pub images: IndexMap<String, ResourceReference>,
    /// Containers by logical service name.
    #[serde(default)]
    pub containers: IndexMap<String, ResourceReference>,
    /// The project's pod.
    #[serde(default)]
    pub pod: Option<ResourceReference>,
}

impl StateDocument {
    /// True when nothing is recorded.
    pub fn is_empty(&self) -> bool {
        self.images.is_empty() && self.containers.is_empty() && self.pod.is_none()
    }
}

/// Whether the cached image/container pairing for a service is current.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Staleness {
    /// No image recorded.
    Unknown,
    /// Image recorded, container missing.
    NeedsBuild,
    /// Container was created from the recorded image.
    UpToDate,
    /// Container was created from a different image.
    Stale,
    /// The cache cannot tell; a runtime lookup is required.
    NeedsRemoteCheck,
}

impl Staleness {
    /// True when the service has to be rebuilt before it can run.
    pub fn needs_rebuild(&self) -> bool {
        matches!(self, Staleness::Unknown | Staleness::NeedsBuild | Staleness::Stale)
    }
}

impl fmt::Display for Staleness {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Staleness::Unknown => "not built",
            Staleness::NeedsBuild => "image only",
            Staleness::UpToDate => "up to date",
            Staleness::Stale => "stale",
            Staleness::NeedsRemoteCheck => "unverified",
        })
    }
}

/// Owner of the state document for one invocation.
///
/// The document is written back on [`StateStore::close`], or on drop when
/// `close` was never reached.
#[derive(Debug)]
pub struct StateStore {
    path: PathBuf,
    document: StateDocument,
    closed: bool,
}

impl StateStore {
    /// Load the document at `path`. Missing, unreadable or corrupt documents
    /// start empty.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let document = match fs::read(&path) {
            Ok(bytes) => match serde_json::from_slice::<StateDocument>(&bytes) {
                Ok(document) => document,
                Err(err) => {
                    warn!(
                        path = %path.display(),
                        error = %err,
                        "discarding corrupt state document"
                    );
                    StateDocument::default()
                }
            },
            Err(err) if err.kind() == ErrorKind::NotFound => StateDocument::default(),
            Err(err) => {
                warn!(
                    path = %path.display(),
                    error = %err,
                    "state document unreadable; starting empty"
                );
                StateDocument::default()
            }
        };
        debug!(path = %path.display(), empty = document.is_empty(), "state opened");
        Ok(Self {
            path,
            document,
            closed: false,
        })
    }

    /// Location of the document on disk.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Current in-memory document.
    pub fn document(&self) -> &StateDocument {
        &self.document
    }

    /// True when nothing is recorded.
    pub fn is_empty(&self) -> bool {
        self.document.is_empty()
    }

    /// Write the document and consume the store.
    pub fn close(mut self) -> Result<()> {
        let outcome = self.flush();
        self.closed = true;
        outcome
    }

    /// Write the document to disk through a temporary file and rename.
    pub fn flush(&self) -> Result<()> {
        let parent = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        fs::create_dir_all(parent)?;
        let mut tmp = tempfile::NamedTempFile::new_in(parent)?;
        {
            let mut writer = BufWriter::new(tmp.as_file_mut());
            serde_json::to_writer_pretty(&mut writer, &self.document)?;
            writer.write_all(b"\n")?;
            writer.flush()?;
        }
        tmp.persist(&self.path).map_err(|err| err.error)?;
        debug!(path = %self.path.display(), "state written");
        Ok(())
    }

    /// Record or clear (`None`) the image for `name`.
    pub fn save_image(&mut self, name: &str, reference: Option<ResourceReference>) {
        save(&mut self.document.images, name, reference);
    }

    /// Record or clear (`None`) the container for `name`.
    pub fn save_container(&mut self, name: &str, reference: Option<ResourceReference>) {
        save(&mut self.document.containers, name, reference);
    }

    /// Record or clear (`None`) the pod.
    pub fn save_pod(&mut self, reference: Option<ResourceReference>) {
        self.document.pod = reference;
    }

    /// Cached image reference for `name`.
    pub fn image(&self, name: &str) -> Option<&ResourceReference> {
        self.document.images.get(name)
    }

    /// Cached container reference for `name`.
    pub fn container(&self, name: &str) -> Option<&ResourceReference> {
        self.document.containers.get(name)
    }

    /// Cached pod reference.
    pub fn pod(&self) -> Option<&ResourceReference> {
        self.document.pod.as_ref()
    }

    /// Cached image id for `name`.
    pub fn image_id(&self, name: &str) -> Result<&str> {
        self.image(name)
            .map(|reference| reference.id.as_str())
            .ok_or_else(|| unknown(ObjectKind::Image, name))
    }

    /// Cached container id for `name`.
    pub fn container_id(&self, name: &str) -> Result<&str> {
        self.container(name)
            .map(|reference| reference.id.as_str())
            .ok_or_else(|| unknown(ObjectKind::Container, name))
    }

    /// Cached pod id.
    pub fn pod_id(&self) -> Option<&str> {
        self.pod().map(|reference| reference.id.as_str())
    }

    /// Resolve the cached image for `name` and refresh its entry.
    pub async fn image_object(
        &mut self,
        name: &str,
        client: &dyn RuntimeClient,
    ) -> Result<RuntimeObject> {
        let id = self.image_id(name)?.to_owned();
        let live = client.image(&id).await?;
        self.save_image(name, Some(ResourceReference::from(&live)));
        Ok(live)
    }

    /// Resolve the cached container for `name` and refresh its entry.
    pub async fn container_object(
        &mut self,
        name: &str,
        client: &dyn RuntimeClient,
    ) -> Result<RuntimeObject> {
        let id = self.container_id(name)?.to_owned();
        let live = client.container(&id).await?;
        self.save_container(name, Some(ResourceReference::from(&live)));
        Ok(live)
    }

    /// Resolve the cached pod and refresh its entry.
    pub async fn pod_object(&mut self, client: &dyn RuntimeClient) -> Result<RuntimeObject> {
        let id = self
            .pod_id()
            .ok_or_else(|| unknown(ObjectKind::Pod, POD_NAME))?
            .to_owned();
        let live = client.pod(&id).await?;
        self.save_pod(Some(ResourceReference::from(&live)));
        Ok(live)
    }

    /// Decide whether the container for `name` must be rebuilt.
    ///
    /// The cached pairing is consulted first. Only when the container entry
    /// does not carry the image it was created from, and a client is given,
    /// are both objects fetched and compared. A live lookup that finds the
    /// object gone clears its entry.
    pub async fn should_rebuild_container(
        &mut self,
        name: &str,
        client: Option<&dyn RuntimeClient>,
    ) -> Result<Staleness> {
        let Some(image) = self.image(name) else {
            return Ok(Staleness::Unknown);
        };
        let image_id = image.id.clone();
        let Some(container) = self.container(name) else {
            return Ok(Staleness::NeedsBuild);
        };
        if let Some(embedded) = container.image_id() {
            return Ok(if embedded == image_id {
                Staleness::UpToDate
            } else {
                Staleness::Stale
            });
        }
        let Some(client) = client else {
            return Ok(Staleness::NeedsRemoteCheck);
        };

        let live_image = match self.image_object(name, client).await {
            Ok(live) => live,
            Err(err) if err.is_not_found() => {
                self.save_image(name, None);
                return Ok(Staleness::Unknown);
            }
            Err(err) => return Err(err),
        };
        let live_container = match self.container_object(name, client).await {
            Ok(live) => live,
            Err(err) if err.is_not_found() => {
                self.save_container(name, None);
                return Ok(Staleness::NeedsBuild);
            }
            Err(err) => return Err(err),
        };
        Ok(if live_container.image_id() == Some(live_image.id.as_str()) {
            Staleness::UpToDate
        } else {
            Staleness::Stale
        })
    }
}

impl Drop for StateStore {
    fn drop(&mut self) {
        if self.closed {
            return;
        }
        if let Err(err) = self.flush() {
            warn!(path = %self.path.display(), error = %err, "failed to write state on drop");
        }
    }
}

fn save(
    slot: &mut IndexMap<String, ResourceReference>,
    name: &str,
    reference: Option<ResourceReference>,
) {
    match reference {
        Some(reference) => {
            slot.insert(name.to_owned(), reference);
        }
        None => {
            slot.shift_remove(name);
        }
    }
}

fn unknown(kind: ObjectKind, name: &str) -> StateError {
    StateError::UnknownResource {
        kind,
        name: name.to_owned(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn references_round_trip_without_origin() {
        let object = RuntimeObject::new(ObjectKind::Container, "ctr-1")
            .with_meta(META_IMAGE_ID, "img-1")
            .with_meta("name", "podcraft-container-1");
        let live = ResourceReference::from(&object);
        assert!(live.is_live());

        let encoded = serde_json::to_value(&live).unwrap();
        assert_eq!(
            encoded,
            json!({"id": "ctr-1", "image_id": "img-1", "name": "podcraft-container-1"})
        );
        let decoded: ResourceReference = serde_json::from_value(encoded).unwrap();
        assert_eq!(decoded.origin, ReferenceOrigin::CachedIdOnly);
        assert_eq!(decoded.image_id(), Some("img-1"));
    }

    #[test]
    fn document_sections_default_to_empty() {
        let document: StateDocument = serde_json::from_str("{}").unwrap();
        assert!(document.is_empty());
    }

    #[test]
    fn clearing_a_missing_entry_is_a_no_op() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = StateStore::open(dir.path().join("state.json")).unwrap();
        store.save_image("server", None);
        store.save_pod(None);
        assert!(store.is_empty());
        store.close().unwrap();
    }

    #[test]
    fn lookups_report_unknown_resources() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = StateStore::open(dir.path().join("state.json")).unwrap();
        assert!(matches!(
            store.image_id("server"),
            Err(StateError::UnknownResource { kind: ObjectKind::Image, .. })
        ));
        assert!(store.pod_id().is_none());
        store.save_image("server", Some(ResourceReference::cached("img-1")));
        assert_eq!(store.image_id("server").unwrap(), "img-1");
        store.close().unwrap();
    }

    #[test]
    fn staleness_display_and_rebuild_need() {
        assert_eq!(Staleness::UpToDate.to_string(), "up to date");
        assert!(Staleness::Stale.needs_rebuild());
        assert!(!Staleness::NeedsRemoteCheck.needs_rebuild());
    }
}
