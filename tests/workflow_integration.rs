//! ---
//! pc_section: "15-testing-qa-runbook"
//! pc_subsection: "integration-tests"
//! pc_type: "source"
//! pc_scope: "code"
//! pc_description: "End-to-end project workflows across every workspace crate."
//! pc_version: "v0.0.0-prealpha"
//! pc_owner: "tbd"
//! ---
use std::fs;
use std::path::Path;

use podcraft_common::PROJECT_FILE_NAME;
use podcraft_core::{BuildSources, Engine, Project};
use podcraft_runtime::{MockRuntime, RuntimeClient};
use serde_json::Value;

const SERVER: &str = "/opt/podcraft/server";
const MANAGER: &str = "/opt/podcraft/manage";

fn write_project(root: &Path) {
    fs::write(
        root.join(PROJECT_FILE_NAME),
        r#"
[properties]
server-port = 1234
enable-rcon = false
enable-query = false

[management]
server-port = 8080

[volumes]
backups = "/mc/backups"
"#,
    )
    .unwrap();
}

fn sources() -> BuildSources {
    BuildSources {
        server: SERVER.parse().unwrap(),
        manager: MANAGER.parse().unwrap(),
    }
}

fn runtime() -> MockRuntime {
    MockRuntime::new()
        .with_image_volumes(SERVER, ["/mc/world", "/mc/server.properties", "/mc/backups"])
        .with_image_volumes(MANAGER, ["/run/podman"])
}

fn open(start: &Path) -> Engine {
    Engine::open(Project::discover(start).unwrap(), sources()).unwrap()
}

#[tokio::test]
async fn build_unbuild_build_across_invocations() {
    let dir = tempfile::tempdir().unwrap();
    write_project(dir.path());
    let nested = dir.path().join("live");
    fs::create_dir_all(&nested).unwrap();
    let runtime = runtime();

    let mut engine = open(&nested);
    engine.cleanup(&runtime).await.unwrap();
    engine.rebuild_everything(&runtime).await.unwrap();
    engine.close().unwrap();

    let mut engine = open(dir.path());
    let report = engine.cleanup(&runtime).await.unwrap();
    assert_eq!(report.removed(), 5);
    engine.rebuild_everything(&runtime).await.unwrap();
    engine.close().unwrap();

    assert_eq!(runtime.pod_count(), 1);
    assert_eq!(runtime.container_count(), 2);
    assert_eq!(runtime.image_count(), 2);

    let state: Value =
        serde_json::from_slice(&fs::read(dir.path().join(".tmp/state.json")).unwrap()).unwrap();
    let pod_id = state["pod"]["id"].as_str().unwrap();
    assert_eq!(runtime.containers_in_pod(pod_id).len(), 2);
    for service in ["server", "manager"] {
        let image = state["images"][service]["id"].as_str().unwrap();
        let container = &state["containers"][service];
        assert_eq!(container["image_id"].as_str(), Some(image));
        assert!(runtime.image(image).await.is_ok());
    }

    let publish = runtime
        .calls()
        .into_iter()
        .filter(|call| call.starts_with("create_pod"))
        .last()
        .unwrap();
    assert_eq!(publish, "create_pod 1234:25565/tcp,25575:25575/tcp,8080:80/tcp");
    assert!(dir.path().join("backups").is_dir());
}

#[tokio::test]
async fn corrupt_state_is_replaced_by_the_next_build() {
    let dir = tempfile::tempdir().unwrap();
    write_project(dir.path());
    fs::create_dir_all(dir.path().join(".tmp")).unwrap();
    fs::write(dir.path().join(".tmp/state.json"), b"\x00garbage").unwrap();
    let runtime = runtime();

    let mut engine = open(dir.path());
    assert!(engine.store().is_empty());
    let report = engine.cleanup(&runtime).await.unwrap();
    assert!(report.is_empty());
    engine.rebuild_everything(&runtime).await.unwrap();
    engine.close().unwrap();

    let reopened = open(dir.path());
    assert!(reopened.store().pod_id().is_some());
    reopened.close().unwrap();
}

#[tokio::test]
async fn unbuild_after_manual_removal_still_empties_the_cache() {
    let dir = tempfile::tempdir().unwrap();
    write_project(dir.path());
    let runtime = runtime();

    let mut engine = open(dir.path());
    engine.rebuild_everything(&runtime).await.unwrap();
    let pod = engine.store().pod_id().unwrap().to_owned();
    engine.close().unwrap();

    // Removing the pod by hand takes its containers with it.
    let containers = runtime.containers_in_pod(&pod);
    assert_eq!(containers.len(), 2);
    runtime.remove_out_of_band(&pod);
    for id in &containers {
        runtime.remove_out_of_band(id);
    }

    let mut engine = open(dir.path());
    engine.cleanup(&runtime).await.unwrap();
    assert!(engine.store().is_empty());
    assert_eq!(runtime.image_count(), 0);
    engine.close().unwrap();
}
