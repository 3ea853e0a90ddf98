//! ---
//! pc_section: "02-runtime-adapters"
//! pc_subsection: "module"
//! pc_type: "source"
//! pc_scope: "code"
//! pc_description: "In-memory runtime used by tests and dry runs."
//! pc_version: "v0.0.0-prealpha"
//! pc_owner: "tbd"
//! ---
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use indexmap::IndexMap;
use parking_lot::Mutex;
use serde_json::Value;

use crate::client::{
    BindMount, BuildSource, ExecOutput, ObjectKind, PodAction, RuntimeClient, RuntimeObject,
    META_IMAGE_ID, META_NAME, META_STATUS, META_VOLUMES,
};
use crate::names::generate_name;
use crate::{Result, RuntimeError};

#[derive(Debug, Default)]
struct MockState {
    images: IndexMap<String, RuntimeObject>,
    containers: IndexMap<String, RuntimeObject>,
    pods: IndexMap<String, RuntimeObject>,
    /// Container id to owning pod id.
    membership: HashMap<String, String>,
    mounts: HashMap<String, Vec<BindMount>>,
    build_args: HashMap<String, IndexMap<String, String>>,
    image_volumes: HashMap<String, Vec<String>>,
    exec_responses: Vec<(Vec<String>, ExecOutput)>,
    failing_removals: HashSet<String>,
    fail_builds: bool,
    failing_sources: HashSet<String>,
    calls: Vec<String>,
}

/// Runtime that keeps images, pods and containers in memory.
///
/// Every trait call is appended to a call log so tests can assert on the
/// sequence of operations the engine issued.
#[derive(Debug, Default)]
pub struct MockRuntime {
    state: Mutex<MockState>,
    counter: AtomicU64,
}

impl MockRuntime {
    /// Empty runtime.
    pub fn new() -> Self {
        Self::default()
    }

    /// Images built from `source` declare `volumes`.
    pub fn with_image_volumes<I, S>(self, source: &str, volumes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.state.lock().image_volumes.insert(
            source.to_owned(),
            volumes.into_iter().map(Into::into).collect(),
        );
        self
    }

    /// Answer execs whose argv starts with `prefix` with `output`.
    pub fn with_exec_response(self, prefix: &[&str], output: ExecOutput) -> Self {
        self.state.lock().exec_responses.push((
            prefix.iter().map(|s| (*s).to_owned()).collect(),
            output,
        ));
        self
    }

    /// Make every later removal of `id` fail with a command error.
    pub fn fail_removal_of(&self, id: &str) {
        self.state.lock().failing_removals.insert(id.to_owned());
    }

    /// Make every later image build fail.
    pub fn fail_builds(&self) {
        self.state.lock().fail_builds = true;
    }

    /// Make later builds from `source` fail; other sources still build.
    pub fn fail_builds_from(&self, source: &str) {
        self.state.lock().failing_sources.insert(source.to_owned());
    }

    /// Operations issued so far, in order, e.g. `"remove_pod p-1"`.
    pub fn calls(&self) -> Vec<String> {
        self.state.lock().calls.clone()
    }

    /// Number of live images.
    pub fn image_count(&self) -> usize {
        self.state.lock().images.len()
    }

    /// Number of live containers.
    pub fn container_count(&self) -> usize {
        self.state.lock().containers.len()
    }

    /// Number of live pods.
    pub fn pod_count(&self) -> usize {
        self.state.lock().pods.len()
    }

    /// Ids of live containers that belong to `pod_id`.
    pub fn containers_in_pod(&self, pod_id: &str) -> Vec<String> {
        let state = self.state.lock();
        state
            .containers
            .keys()
            .filter(|id| state.membership.get(*id).map(String::as_str) == Some(pod_id))
            .cloned()
            .collect()
    }

    /// Mounts a container was created with.
    pub fn mounts_of(&self, container_id: &str) -> Vec<BindMount> {
        self.state
            .lock()
            .mounts
            .get(container_id)
            .cloned()
            .unwrap_or_default()
    }

    /// Build arguments an image was built with.
    pub fn build_args_of(&self, image_id: &str) -> IndexMap<String, String> {
        self.state
            .lock()
            .build_args
            .get(image_id)
            .cloned()
            .unwrap_or_default()
    }

    /// Delete an object without going through the trait, as an operator
    /// running `podman rm` by hand would.
    pub fn remove_out_of_band(&self, id: &str) -> bool {
        let mut state = self.state.lock();
        let removed = state.images.shift_remove(id).is_some()
            || state.containers.shift_remove(id).is_some()
            || state.pods.shift_remove(id).is_some();
        state.membership.remove(id);
        state.membership.retain(|_, pod| pod.as_str() != id);
        removed
    }

    fn next_id(&self, prefix: &str) -> String {
        let n = self.counter.fetch_add(1, Ordering::Relaxed) + 1;
        format!("{}-{}", prefix, n)
    }
}

fn not_found(kind: ObjectKind, id: &str) -> RuntimeError {
    RuntimeError::NotFound {
        kind,
        id: id.to_owned(),
    }
}

fn injected_failure(command: String) -> RuntimeError {
    RuntimeError::CommandFailed {
        command,
        status: 125,
        stderr: "injected failure".to_owned(),
    }
}

#[async_trait]
impl RuntimeClient for MockRuntime {
    async fn build_image(
        &self,
        source: &BuildSource,
        build_args: &IndexMap<String, String>,
    ) -> Result<RuntimeObject> {
        let id = self.next_id("img");
        let mut state = self.state.lock();
        state.calls.push(format!("build_image {}", source));
        if state.fail_builds || state.failing_sources.contains(&source.to_string()) {
            return Err(injected_failure(format!("build {}", source)));
        }
        let volumes = state
            .image_volumes
            .get(&source.to_string())
            .cloned()
            .unwrap_or_default();
        let image = RuntimeObject::new(ObjectKind::Image, id.clone())
            .with_meta(META_NAME, generate_name("image"))
            .with_meta(META_VOLUMES, volumes);
        state.build_args.insert(id.clone(), build_args.clone());
        state.images.insert(id, image.clone());
        Ok(image)
    }

    async fn image(&self, id: &str) -> Result<RuntimeObject> {
        let state = self.state.lock();
        state
            .images
            .get(id)
            .cloned()
            .ok_or_else(|| not_found(ObjectKind::Image, id))
    }

    async fn remove_image(&self, id: &str) -> Result<()> {
        let mut state = self.state.lock();
        state.calls.push(format!("remove_image {}", id));
        if state.failing_removals.contains(id) {
            return Err(injected_failure(format!("rmi {}", id)));
        }
        state
            .images
            .shift_remove(id)
            .map(drop)
            .ok_or_else(|| not_found(ObjectKind::Image, id))
    }

    async fn create_pod(&self, publish: &[String]) -> Result<RuntimeObject> {
        let id = self.next_id("pod");
        let mut state = self.state.lock();
        state
            .calls
            .push(format!("create_pod {}", publish.join(",")));
        let pod = RuntimeObject::new(ObjectKind::Pod, id.clone())
            .with_meta(META_NAME, generate_name("pod"))
            .with_meta(META_STATUS, "Created")
            .with_meta("publish", publish.to_vec());
        state.pods.insert(id, pod.clone());
        Ok(pod)
    }

    async fn pod(&self, id: &str) -> Result<RuntimeObject> {
        let state = self.state.lock();
        state
            .pods
            .get(id)
            .cloned()
            .ok_or_else(|| not_found(ObjectKind::Pod, id))
    }

    async fn remove_pod(&self, id: &str) -> Result<()> {
        let mut state = self.state.lock();
        state.calls.push(format!("remove_pod {}", id));
        if state.failing_removals.contains(id) {
            return Err(injected_failure(format!("pod rm {}", id)));
        }
        if state.pods.shift_remove(id).is_none() {
            return Err(not_found(ObjectKind::Pod, id));
        }
        let members: Vec<String> = state
            .membership
            .iter()
            .filter(|(_, pod)| pod.as_str() == id)
            .map(|(container, _)| container.clone())
            .collect();
        for container in members {
            state.containers.shift_remove(&container);
            state.membership.remove(&container);
        }
        Ok(())
    }

    async fn pod_action(&self, id: &str, action: PodAction) -> Result<()> {
        let mut state = self.state.lock();
        state.calls.push(format!("pod_action {} {}", action, id));
        let pod = state
            .pods
            .get_mut(id)
            .ok_or_else(|| not_found(ObjectKind::Pod, id))?;
        let status = match action {
            PodAction::Start | PodAction::Restart | PodAction::Unpause => crate::RUNNING_STATUS,
            PodAction::Stop => "Exited",
            PodAction::Pause => "Paused",
        };
        pod.metadata
            .insert(META_STATUS.to_owned(), Value::from(status));
        Ok(())
    }

    async fn create_container(
        &self,
        image: &RuntimeObject,
        pod: &RuntimeObject,
        mounts: &[BindMount],
    ) -> Result<RuntimeObject> {
        let id = self.next_id("ctr");
        let mut state = self.state.lock();
        state
            .calls
            .push(format!("create_container {} {}", image.id, pod.id));
        if !state.images.contains_key(&image.id) {
            return Err(not_found(ObjectKind::Image, &image.id));
        }
        if !state.pods.contains_key(&pod.id) {
            return Err(not_found(ObjectKind::Pod, &pod.id));
        }
        let container = RuntimeObject::new(ObjectKind::Container, id.clone())
            .with_meta(META_NAME, generate_name("container"))
            .with_meta(META_IMAGE_ID, image.id.clone());
        state.membership.insert(id.clone(), pod.id.clone());
        state.mounts.insert(id.clone(), mounts.to_vec());
        state.containers.insert(id, container.clone());
        Ok(container)
    }

    async fn container(&self, id: &str) -> Result<RuntimeObject> {
        let state = self.state.lock();
        state
            .containers
            .get(id)
            .cloned()
            .ok_or_else(|| not_found(ObjectKind::Container, id))
    }

    async fn remove_container(&self, id: &str) -> Result<()> {
        let mut state = self.state.lock();
        state.calls.push(format!("remove_container {}", id));
        if state.failing_removals.contains(id) {
            return Err(injected_failure(format!("rm {}", id)));
        }
        state.membership.remove(id);
        state.mounts.remove(id);
        state
            .containers
            .shift_remove(id)
            .map(drop)
            .ok_or_else(|| not_found(ObjectKind::Container, id))
    }

    async fn exec(&self, container_id: &str, argv: &[String]) -> Result<ExecOutput> {
        let mut state = self.state.lock();
        state
            .calls
            .push(format!("exec {} {}", container_id, argv.join(" ")));
        if !state.containers.contains_key(container_id) {
            return Err(not_found(ObjectKind::Container, container_id));
        }
        let reply = state
            .exec_responses
            .iter()
            .find(|(prefix, _)| argv.starts_with(prefix))
            .map(|(_, output)| output.clone())
            .unwrap_or_default();
        Ok(reply)
    }
}
