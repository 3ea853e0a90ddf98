//! ---
//! pc_section: "02-runtime-adapters"
//! pc_subsection: "module"
//! pc_type: "source"
//! pc_scope: "code"
//! pc_description: "RuntimeClient implementation driving the podman CLI."
//! pc_version: "v0.0.0-prealpha"
//! pc_owner: "tbd"
//! ---
use std::ffi::OsString;
use std::path::PathBuf;
use std::process::{Output, Stdio};

use async_trait::async_trait;
use indexmap::IndexMap;
use podcraft_common::RuntimeSettings;
use serde_json::{Map, Value};
use tokio::process::Command;
use tracing::{debug, info};

use crate::bridge::BridgeService;
use crate::client::{
    BindMount, BuildSource, ExecOutput, ObjectKind, PodAction, RuntimeClient, RuntimeObject,
    META_EXPOSED_PORTS, META_IMAGE_ID, META_NAME, META_STATE, META_STATUS, META_TAGS,
    META_VOLUMES,
};
use crate::names::generate_name;
use crate::source;
use crate::{Result, RuntimeError};

/// Runtime client backed by the `podman` binary.
///
/// When connected through a [`BridgeService`] every command runs in remote
/// mode against the bridge socket. Call [`PodmanClient::shutdown`] when the
/// batch of operations is done; dropping the client also kills the bridge.
#[derive(Debug)]
pub struct PodmanClient {
    binary: PathBuf,
    bridge: Option<BridgeService>,
    verbose_build: bool,
}

impl PodmanClient {
    /// Open a runtime session according to `settings`.
    pub async fn connect(settings: &RuntimeSettings) -> Result<Self> {
        let bridge = if settings.use_bridge {
            Some(BridgeService::spawn(&settings.podman, settings.bridge_timeout).await?)
        } else {
            None
        };
        Ok(Self {
            binary: settings.podman.clone(),
            bridge,
            verbose_build: settings.verbose_build,
        })
    }

    /// Client that talks to the local podman directly, without a bridge.
    pub fn local(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
            bridge: None,
            verbose_build: false,
        }
    }

    /// End the session, stopping the bridge service if one is running.
    pub async fn shutdown(self) -> Result<()> {
        if let Some(bridge) = self.bridge {
            bridge.terminate().await?;
        }
        Ok(())
    }

    fn command<I, S>(&self, args: I) -> (Command, String)
    where
        I: IntoIterator<Item = S>,
        S: Into<OsString>,
    {
        let mut cmd = Command::new(&self.binary);
        if let Some(bridge) = &self.bridge {
            cmd.arg("--remote").arg("--url").arg(bridge.url());
        }
        let args: Vec<OsString> = args.into_iter().map(Into::into).collect();
        let rendered = std::iter::once(self.binary.as_os_str().to_string_lossy().into_owned())
            .chain(args.iter().map(|a| a.to_string_lossy().into_owned()))
            .collect::<Vec<_>>()
            .join(" ");
        cmd.args(args).stdin(Stdio::null()).kill_on_drop(true);
        (cmd, rendered)
    }

    async fn output(&self, mut cmd: Command, rendered: &str) -> Result<Output> {
        debug!(command = %rendered, "running podman");
        cmd.output().await.map_err(|source| RuntimeError::Spawn {
            program: self.binary.display().to_string(),
            source,
        })
    }

    /// Run a command that addresses one object, mapping "no such" failures to NotFound.
    async fn run_on<I, S>(&self, kind: ObjectKind, id: &str, args: I) -> Result<String>
    where
        I: IntoIterator<Item = S>,
        S: Into<OsString>,
    {
        let (cmd, rendered) = self.command(args);
        let output = self.output(cmd, &rendered).await?;
        if output.status.success() {
            return Ok(String::from_utf8_lossy(&output.stdout).into_owned());
        }
        let stderr = String::from_utf8_lossy(&output.stderr).into_owned();
        if reports_missing(&stderr) {
            return Err(RuntimeError::NotFound {
                kind,
                id: id.to_owned(),
            });
        }
        Err(RuntimeError::CommandFailed {
            command: rendered,
            status: output.status.code().unwrap_or(-1),
            stderr: stderr.trim().to_owned(),
        })
    }

    async fn run<I, S>(&self, args: I) -> Result<String>
    where
        I: IntoIterator<Item = S>,
        S: Into<OsString>,
    {
        let (cmd, rendered) = self.command(args);
        let output = self.output(cmd, &rendered).await?;
        if !output.status.success() {
            return Err(RuntimeError::CommandFailed {
                command: rendered,
                status: output.status.code().unwrap_or(-1),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_owned(),
            });
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    async fn inspect(&self, kind: ObjectKind, id: &str) -> Result<Value> {
        let args: [&str; 3] = match kind {
            ObjectKind::Image => ["image", "inspect", id],
            ObjectKind::Container => ["container", "inspect", id],
            ObjectKind::Pod => ["pod", "inspect", id],
        };
        let stdout = self.run_on(kind, id, args).await?;
        let value: Value = serde_json::from_str(&stdout)?;
        first_object(value).ok_or_else(|| RuntimeError::NotFound {
            kind,
            id: id.to_owned(),
        })
    }
}

#[async_trait]
impl RuntimeClient for PodmanClient {
    async fn build_image(
        &self,
        source: &BuildSource,
        build_args: &IndexMap<String, String>,
    ) -> Result<RuntimeObject> {
        let context = source::prepare(source).await?;
        let iidfile = tempfile::NamedTempFile::new()?;
        let tag = generate_name("image");

        let mut args: Vec<OsString> = vec!["build".into()];
        for (key, value) in build_args {
            args.push("--build-arg".into());
            args.push(format!("{}={}", key, value).into());
        }
        args.push("--iidfile".into());
        args.push(iidfile.path().into());
        args.push("--tag".into());
        args.push(tag.clone().into());
        args.push(context.root().into());

        let (mut cmd, rendered) = self.command(args);
        if self.verbose_build {
            cmd.stdout(Stdio::inherit()).stderr(Stdio::inherit());
        } else {
            cmd.stdout(Stdio::null());
        }
        info!(%source, %tag, "building image");
        let output = self.output(cmd, &rendered).await?;
        if !output.status.success() {
            return Err(RuntimeError::CommandFailed {
                command: rendered,
                status: output.status.code().unwrap_or(-1),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_owned(),
            });
        }

        let image_id = tokio::fs::read_to_string(iidfile.path()).await?;
        self.image(image_id.trim()).await
    }

    async fn image(&self, id: &str) -> Result<RuntimeObject> {
        let inspect = self.inspect(ObjectKind::Image, id).await?;
        Ok(normalize_image(id, &inspect))
    }

    async fn remove_image(&self, id: &str) -> Result<()> {
        self.run_on(ObjectKind::Image, id, ["rmi", "--force", id])
            .await
            .map(drop)
    }

    async fn create_pod(&self, publish: &[String]) -> Result<RuntimeObject> {
        let mut args: Vec<String> = vec![
            "pod".into(),
            "create".into(),
            "--name".into(),
            generate_name("pod"),
        ];
        for port in publish {
            args.push("--publish".into());
            args.push(port.clone());
        }
        let id = self.run(args).await?;
        self.pod(id.trim()).await
    }

    async fn pod(&self, id: &str) -> Result<RuntimeObject> {
        let inspect = self.inspect(ObjectKind::Pod, id).await?;
        Ok(normalize_pod(id, &inspect))
    }

    async fn remove_pod(&self, id: &str) -> Result<()> {
        self.run_on(ObjectKind::Pod, id, ["pod", "rm", "--force", id])
            .await
            .map(drop)
    }

    async fn pod_action(&self, id: &str, action: PodAction) -> Result<()> {
        self.run_on(ObjectKind::Pod, id, ["pod", action.as_str(), id])
            .await
            .map(drop)
    }

    async fn create_container(
        &self,
        image: &RuntimeObject,
        pod: &RuntimeObject,
        mounts: &[BindMount],
    ) -> Result<RuntimeObject> {
        let mut args: Vec<String> = vec![
            "create".into(),
            "--pod".into(),
            pod.id.clone(),
            "--name".into(),
            generate_name("container"),
        ];
        for mount in mounts {
            args.push("--mount".into());
            args.push(mount.to_mount_arg());
        }
        args.push(image.id.clone());
        let id = self.run(args).await?;
        self.container(id.trim()).await
    }

    async fn container(&self, id: &str) -> Result<RuntimeObject> {
        let inspect = self.inspect(ObjectKind::Container, id).await?;
        Ok(normalize_container(id, &inspect))
    }

    async fn remove_container(&self, id: &str) -> Result<()> {
        self.run_on(ObjectKind::Container, id, ["rm", "--force", id])
            .await
            .map(drop)
    }

    async fn exec(&self, container_id: &str, argv: &[String]) -> Result<ExecOutput> {
        let mut args: Vec<String> = vec!["exec".into(), container_id.to_owned()];
        args.extend(argv.iter().cloned());
        let (cmd, rendered) = self.command(args);
        let output = self.output(cmd, &rendered).await?;
        let stderr = String::from_utf8_lossy(&output.stderr);
        if !output.status.success() && reports_missing(&stderr) {
            return Err(RuntimeError::NotFound {
                kind: ObjectKind::Container,
                id: container_id.to_owned(),
            });
        }
        let mut combined = String::from_utf8_lossy(&output.stdout).into_owned();
        combined.push_str(&stderr);
        Ok(ExecOutput {
            exit_code: output.status.code().unwrap_or(-1),
            output: combined,
        })
    }
}

fn reports_missing(stderr: &str) -> bool {
    let lowered = stderr.to_lowercase();
    lowered.contains("no such") || lowered.contains("not found")
}

/// `inspect` returns an array for most object kinds and a bare object for pods on older podman.
fn first_object(value: Value) -> Option<Value> {
    match value {
        Value::Array(items) => items.into_iter().next(),
        object @ Value::Object(_) => Some(object),
        _ => None,
    }
}

fn object_id(fallback: &str, inspect: &Value) -> String {
    inspect
        .get("Id")
        .and_then(Value::as_str)
        .unwrap_or(fallback)
        .to_owned()
}

fn sorted_keys(value: Option<&Value>) -> Vec<Value> {
    let mut keys: Vec<String> = value
        .and_then(Value::as_object)
        .map(|map| map.keys().cloned().collect())
        .unwrap_or_default();
    keys.sort();
    keys.into_iter().map(Value::String).collect()
}

fn normalize_image(id: &str, inspect: &Value) -> RuntimeObject {
    let config = inspect.get("Config");
    let mut metadata = Map::new();
    metadata.insert(
        META_TAGS.to_owned(),
        inspect.get("RepoTags").cloned().unwrap_or(Value::Null),
    );
    metadata.insert(
        META_VOLUMES.to_owned(),
        Value::Array(sorted_keys(config.and_then(|c| c.get("Volumes")))),
    );
    metadata.insert(
        META_EXPOSED_PORTS.to_owned(),
        Value::Array(sorted_keys(config.and_then(|c| c.get("ExposedPorts")))),
    );
    RuntimeObject {
        kind: ObjectKind::Image,
        id: object_id(id, inspect),
        metadata,
    }
}

fn normalize_container(id: &str, inspect: &Value) -> RuntimeObject {
    let mut metadata = Map::new();
    metadata.insert(
        META_NAME.to_owned(),
        inspect.get("Name").cloned().unwrap_or(Value::Null),
    );
    metadata.insert(
        META_IMAGE_ID.to_owned(),
        inspect.get("Image").cloned().unwrap_or(Value::Null),
    );
    metadata.insert(
        META_STATE.to_owned(),
        inspect
            .pointer("/State/Status")
            .cloned()
            .unwrap_or(Value::Null),
    );
    RuntimeObject {
        kind: ObjectKind::Container,
        id: object_id(id, inspect),
        metadata,
    }
}

fn normalize_pod(id: &str, inspect: &Value) -> RuntimeObject {
    let mut metadata = Map::new();
    metadata.insert(
        META_NAME.to_owned(),
        inspect.get("Name").cloned().unwrap_or(Value::Null),
    );
    metadata.insert(
        META_STATUS.to_owned(),
        inspect.get("State").cloned().unwrap_or(Value::Null),
    );
    RuntimeObject {
        kind: ObjectKind::Pod,
        id: object_id(id, inspect),
        metadata,
    }
}
