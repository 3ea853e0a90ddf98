//! ---
//! pc_section: "01-core-functionality"
//! pc_subsection: "module"
//! pc_type: "source"
//! pc_scope: "code"
//! pc_description: "Reconciliation of cached state against the container runtime."
//! pc_version: "v0.0.0-prealpha"
//! pc_owner: "tbd"
//! ---
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use indexmap::IndexMap;
use podcraft_common::resolver::{
    ephemeral_host_path, parse_properties, render_properties, KEY_RCON_PASSWORD,
    PROPERTIES_MOUNT,
};
use podcraft_common::{ConfigResolver, RuntimeSettings, Service};
use podcraft_persistence::{ResourceReference, StateStore, Staleness, POD_NAME};
use podcraft_runtime::{
    BindMount, BuildSource, ExecOutput, ObjectKind, PodAction, RuntimeClient, RuntimeObject,
    RUNNING_STATUS,
};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, info, warn};

use crate::error::{EngineError, Result};
use crate::project::Project;
use crate::volumes::materialize;

/// Program inside the server image that forwards a command over rcon.
pub const RCON_COMMAND: &str = "rcon-cli";

/// Fixed status probe run inside the server container.
pub const STATUS_PROBE: [&str; 3] = ["mcstatus", "localhost", "json"];

/// Image build contexts for both services.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildSources {
    pub server: BuildSource,
    pub manager: BuildSource,
}

impl BuildSources {
    pub fn from_settings(settings: &RuntimeSettings) -> Result<Self> {
        Ok(Self {
            server: settings.server_source.parse()?,
            manager: settings.manager_source.parse()?,
        })
    }

    fn for_service(&self, service: Service) -> &BuildSource {
        match service {
            Service::Server => &self.server,
            Service::Manager => &self.manager,
        }
    }
}

/// What happened to one cached reference during cleanup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CleanupOutcome {
    Removed,
    /// The runtime no longer had the object; the entry was dropped.
    AlreadyAbsent,
    /// Removal failed. Container and image entries are kept for the next attempt.
    RemovalFailed(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CleanupEntry {
    pub kind: ObjectKind,
    pub name: String,
    pub id: String,
    pub outcome: CleanupOutcome,
}

/// Per-resource result of [`Engine::cleanup`], in the order resources were visited.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CleanupReport {
    pub entries: Vec<CleanupEntry>,
}

impl CleanupReport {
    /// True when nothing was recorded, so nothing was attempted.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn removed(&self) -> usize {
        self.entries
            .iter()
            .filter(|entry| entry.outcome == CleanupOutcome::Removed)
            .count()
    }

    pub fn failures(&self) -> impl Iterator<Item = &CleanupEntry> {
        self.entries
            .iter()
            .filter(|entry| matches!(entry.outcome, CleanupOutcome::RemovalFailed(_)))
    }
}

/// Player counts reported by the status probe.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlayerCount {
    pub online: u32,
    pub max: u32,
}

/// Parsed output of the status probe.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerStatus {
    pub online: bool,
    #[serde(default)]
    pub kind: Option<String>,
    #[serde(default)]
    pub ping: Option<f64>,
    #[serde(default)]
    pub players: Option<PlayerCount>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Status probe output, parsed when it is the expected JSON.
#[derive(Debug, Clone, PartialEq)]
pub enum ProbeReply {
    Status(ServerStatus),
    Raw(String),
}

impl ProbeReply {
    pub fn parse(output: &str) -> Self {
        match serde_json::from_str::<ServerStatus>(output.trim()) {
            Ok(status) => ProbeReply::Status(status),
            Err(_) => ProbeReply::Raw(output.to_owned()),
        }
    }
}

impl fmt::Display for ProbeReply {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProbeReply::Status(status) => {
                write!(f, "online: {}", status.online)?;
                if let Some(players) = &status.players {
                    write!(f, ", players: {}/{}", players.online, players.max)?;
                }
                if let Some(ping) = status.ping {
                    write!(f, ", ping: {:.1}ms", ping)?;
                }
                Ok(())
            }
            ProbeReply::Raw(text) => f.write_str(text.trim_end()),
        }
    }
}

/// Drives build, cleanup and lifecycle workflows for one project.
///
/// The engine owns the project's [`StateStore`] for the whole invocation.
/// Call [`Engine::close`] to write it back; dropping the engine writes it too.
#[derive(Debug)]
pub struct Engine {
    project: Project,
    sources: BuildSources,
    store: StateStore,
}

impl Engine {
    /// Open the state store under the project's work directory.
    pub fn open(project: Project, sources: BuildSources) -> Result<Self> {
        let store = StateStore::open(project.state_path())?;
        Ok(Self {
            project,
            sources,
            store,
        })
    }

    pub fn project(&self) -> &Project {
        &self.project
    }

    pub fn store(&self) -> &StateStore {
        &self.store
    }

    /// Flush the state document.
    pub fn close(self) -> Result<()> {
        self.store.close()?;
        Ok(())
    }

    /// Remove every recorded container, image and the pod.
    ///
    /// Failures are logged and reported, never returned. Entries whose
    /// removal failed stay cached, except the pod, which is always cleared.
    pub async fn cleanup(&mut self, client: &dyn RuntimeClient) -> Result<CleanupReport> {
        let mut report = CleanupReport::default();
        for service in Service::ALL {
            for kind in [ObjectKind::Container, ObjectKind::Image] {
                if let Some(entry) = self.release(kind, service.as_str(), client).await {
                    report.entries.push(entry);
                }
            }
        }
        if let Some(entry) = self.release(ObjectKind::Pod, POD_NAME, client).await {
            report.entries.push(entry);
        }
        info!(
            visited = report.entries.len(),
            removed = report.removed(),
            failed = report.failures().count(),
            "cleanup finished"
        );
        Ok(report)
    }

    async fn release(
        &mut self,
        kind: ObjectKind,
        name: &str,
        client: &dyn RuntimeClient,
    ) -> Option<CleanupEntry> {
        let id = self.cached(kind, name)?.id.clone();
        let fetched = match kind {
            ObjectKind::Image => self.store.image_object(name, client).await,
            ObjectKind::Container => self.store.container_object(name, client).await,
            ObjectKind::Pod => self.store.pod_object(client).await,
        };
        let outcome = match fetched {
            Ok(live) => {
                let removed = match kind {
                    ObjectKind::Image => client.remove_image(&live.id).await,
                    ObjectKind::Container => client.remove_container(&live.id).await,
                    ObjectKind::Pod => client.remove_pod(&live.id).await,
                };
                match removed {
                    Ok(()) => CleanupOutcome::Removed,
                    Err(err) if err.is_not_found() => CleanupOutcome::AlreadyAbsent,
                    Err(err) => CleanupOutcome::RemovalFailed(err.to_string()),
                }
            }
            Err(err) if err.is_not_found() => CleanupOutcome::AlreadyAbsent,
            Err(err) => CleanupOutcome::RemovalFailed(err.to_string()),
        };

        match &outcome {
            CleanupOutcome::RemovalFailed(reason) => {
                warn!(%kind, %name, %id, %reason, "failed to remove");
                if kind == ObjectKind::Pod {
                    self.store.save_pod(None);
                }
            }
            CleanupOutcome::AlreadyAbsent => {
                debug!(%kind, %name, %id, "already gone");
                self.forget(kind, name);
            }
            CleanupOutcome::Removed => {
                info!(%kind, %name, %id, "removed");
                self.forget(kind, name);
            }
        }
        Some(CleanupEntry {
            kind,
            name: name.to_owned(),
            id,
            outcome,
        })
    }

    fn cached(&self, kind: ObjectKind, name: &str) -> Option<&ResourceReference> {
        match kind {
            ObjectKind::Image => self.store.image(name),
            ObjectKind::Container => self.store.container(name),
            ObjectKind::Pod => self.store.pod(),
        }
    }

    fn forget(&mut self, kind: ObjectKind, name: &str) {
        match kind {
            ObjectKind::Image => self.store.save_image(name, None),
            ObjectKind::Container => self.store.save_container(name, None),
            ObjectKind::Pod => self.store.save_pod(None),
        }
    }

    /// Build both images, the pod and both containers from scratch.
    ///
    /// Each image is recorded as soon as it is built, so a later failure
    /// leaves it reachable by [`Engine::cleanup`]. There is no rollback.
    pub async fn rebuild_everything(&mut self, client: &dyn RuntimeClient) -> Result<()> {
        let preserved = self.existing_password();
        let resolver =
            ConfigResolver::new(self.project.config()).with_preserved_password(preserved);

        let mut images: IndexMap<Service, RuntimeObject> = IndexMap::new();
        for service in Service::ALL {
            let args = match service {
                Service::Server => resolver.server_build_args(),
                Service::Manager => resolver.management_build_args(),
            };
            let source = self.sources.for_service(service);
            info!(%service, %source, "building image");
            let image = client.build_image(source, &args).await?;
            self.store
                .save_image(service.as_str(), Some(ResourceReference::from(&image)));
            images.insert(service, image);
        }

        let mut table: IndexMap<String, PathBuf> = resolver
            .volumes()
            .iter()
            .map(|volume| (volume.mount.clone(), volume.host_or_default()))
            .collect();
        for image in images.values() {
            for mount in image.declared_volumes() {
                if !table.contains_key(&mount) {
                    let host = ephemeral_host_path(&mount);
                    debug!(%mount, host = %host.display(), "image volume without a host path");
                    table.insert(mount, host);
                }
            }
        }
        let table: IndexMap<String, PathBuf> = table
            .into_iter()
            .map(|(mount, host)| {
                let absolute = self.project.host_path(&host);
                (mount, absolute)
            })
            .collect();

        let created = materialize(table.values())?;
        if !created.is_empty() {
            info!(count = created.len(), "created volume paths");
        }

        if let Some(path) = table.get(PROPERTIES_MOUNT) {
            write_file(path, render_properties(&resolver.server_properties()).as_bytes())?;
        }

        let publish: Vec<String> = resolver
            .exposed_ports()
            .iter()
            .map(|(spec, target)| {
                format!("{}:{}/{}", spec.port, target.internal, spec.protocol.as_str())
            })
            .collect();
        let pod = client.create_pod(&publish).await?;
        info!(pod = %pod.id, ports = ?publish, "pod created");
        self.store.save_pod(Some(ResourceReference::from(&pod)));

        for (service, image) in &images {
            let declared = image.declared_volumes();
            let mounts: Vec<BindMount> = table
                .iter()
                .filter(|(mount, _)| declared.contains(mount))
                .map(|(mount, host)| BindMount {
                    source: host.clone(),
                    destination: mount.clone(),
                })
                .collect();
            let container = client.create_container(image, &pod, &mounts).await?;
            info!(%service, container = %container.id, mounts = mounts.len(), "container created");
            self.store
                .save_container(service.as_str(), Some(ResourceReference::from(&container)));
        }
        Ok(())
    }

    /// Password in the properties file the previous build rendered, wherever
    /// the volume table puts it.
    fn existing_password(&self) -> Option<String> {
        let volume = ConfigResolver::new(self.project.config())
            .volumes()
            .into_iter()
            .find(|volume| volume.mount == PROPERTIES_MOUNT)?;
        let path = self.project.host_path(&volume.host_or_default());
        let text = fs::read_to_string(path).ok()?;
        parse_properties(&text).shift_remove(KEY_RCON_PASSWORD)
    }

    pub async fn start(&mut self, client: &dyn RuntimeClient) -> Result<()> {
        self.pod_verb(PodAction::Start, client).await
    }

    pub async fn stop(&mut self, client: &dyn RuntimeClient) -> Result<()> {
        self.pod_verb(PodAction::Stop, client).await
    }

    pub async fn restart(&mut self, client: &dyn RuntimeClient) -> Result<()> {
        self.pod_verb(PodAction::Restart, client).await
    }

    pub async fn pause(&mut self, client: &dyn RuntimeClient) -> Result<()> {
        self.pod_verb(PodAction::Pause, client).await
    }

    pub async fn unpause(&mut self, client: &dyn RuntimeClient) -> Result<()> {
        self.pod_verb(PodAction::Unpause, client).await
    }

    async fn pod_verb(&mut self, action: PodAction, client: &dyn RuntimeClient) -> Result<()> {
        let pod = self.live_pod(client).await?;
        client.pod_action(&pod.id, action).await?;
        info!(pod = %pod.id, %action, "pod action applied");
        Ok(())
    }

    async fn live_pod(&mut self, client: &dyn RuntimeClient) -> Result<RuntimeObject> {
        if self.store.pod_id().is_none() {
            return Err(EngineError::NothingBuilt);
        }
        match self.store.pod_object(client).await {
            Ok(pod) => Ok(pod),
            Err(err) if err.is_not_found() => {
                warn!("recorded pod no longer exists; forgetting it");
                self.store.save_pod(None);
                Err(EngineError::NothingBuilt)
            }
            Err(err) => Err(err.into()),
        }
    }

    /// True when the recorded pod is up.
    pub async fn is_running(&mut self, client: &dyn RuntimeClient) -> Result<bool> {
        match self.live_pod(client).await {
            Ok(pod) => Ok(pod.status() == Some(RUNNING_STATUS)),
            Err(EngineError::NothingBuilt) => Ok(false),
            Err(err) => Err(err),
        }
    }

    /// Run `argv` inside the container of `service`.
    pub async fn exec(
        &mut self,
        service: Service,
        argv: &[String],
        client: &dyn RuntimeClient,
    ) -> Result<ExecOutput> {
        let name = service.as_str();
        if self.store.container(name).is_none() {
            return Err(EngineError::NothingBuilt);
        }
        let container = match self.store.container_object(name, client).await {
            Ok(container) => container,
            Err(err) if err.is_not_found() => {
                warn!(%service, "recorded container no longer exists; forgetting it");
                self.store.save_container(name, None);
                return Err(EngineError::NothingBuilt);
            }
            Err(err) => return Err(err.into()),
        };
        debug!(%service, container = %container.id, ?argv, "exec");
        Ok(client.exec(&container.id, argv).await?)
    }

    /// Send a console command to the server over rcon.
    pub async fn rcon(
        &mut self,
        command: &[String],
        client: &dyn RuntimeClient,
    ) -> Result<ExecOutput> {
        let argv: Vec<String> = std::iter::once(RCON_COMMAND.to_owned())
            .chain(command.iter().cloned())
            .collect();
        self.exec(Service::Server, &argv, client).await
    }

    /// Run the status probe in the server container.
    pub async fn probe_status(&mut self, client: &dyn RuntimeClient) -> Result<(i32, ProbeReply)> {
        let argv: Vec<String> = STATUS_PROBE.iter().map(|arg| (*arg).to_owned()).collect();
        let output = self.exec(Service::Server, &argv, client).await?;
        Ok((output.exit_code, ProbeReply::parse(&output.output)))
    }

    /// Cache staleness of both services, checking the runtime where the cache cannot tell.
    pub async fn staleness(
        &mut self,
        client: &dyn RuntimeClient,
    ) -> Result<Vec<(Service, Staleness)>> {
        let mut report = Vec::with_capacity(Service::ALL.len());
        for service in Service::ALL {
            let staleness = self
                .store
                .should_rebuild_container(service.as_str(), Some(client))
                .await?;
            report.push((service, staleness));
        }
        Ok(report)
    }
}

fn write_file(path: &Path, contents: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|source| EngineError::io(parent, source))?;
    }
    fs::write(path, contents).map_err(|source| EngineError::io(path, source))
}
