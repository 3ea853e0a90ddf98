//! ---
//! pc_section: "03-persistence-logging"
//! pc_subsection: "module"
//! pc_type: "source"
//! pc_scope: "code"
//! pc_description: "State cache behaviour against the in-memory runtime."
//! pc_version: "v0.0.0-prealpha"
//! pc_owner: "tbd"
//! ---
use indexmap::IndexMap;
use podcraft_persistence::{ResourceReference, StateDocument, StateStore, Staleness};
use podcraft_runtime::client::META_IMAGE_ID;
use podcraft_runtime::{BuildSource, MockRuntime, RuntimeClient};
use tempfile::tempdir;

fn source() -> BuildSource {
    "/srv/podcraft/server".parse().unwrap()
}

#[test]
fn close_writes_what_was_saved() -> anyhow::Result<()> {
    let dir = tempdir()?;
    let path = dir.path().join(".tmp").join("state.json");

    let mut store = StateStore::open(&path)?;
    store.save_image("server", Some(ResourceReference::cached("img-1")));
    store.save_pod(Some(ResourceReference::cached("pod-1")));
    store.close()?;

    let reopened = StateStore::open(&path)?;
    assert_eq!(reopened.image_id("server")?, "img-1");
    assert_eq!(reopened.pod_id(), Some("pod-1"));
    Ok(())
}

#[test]
fn corrupt_document_opens_empty_and_is_overwritten() -> anyhow::Result<()> {
    let dir = tempdir()?;
    let path = dir.path().join("state.json");
    std::fs::write(&path, "{ not json")?;

    let store = StateStore::open(&path)?;
    assert!(store.is_empty());
    store.close()?;

    let written: StateDocument = serde_json::from_slice(&std::fs::read(&path)?)?;
    assert!(written.is_empty());
    Ok(())
}

#[test]
fn unreadable_document_opens_empty() -> anyhow::Result<()> {
    let dir = tempdir()?;
    let path = dir.path().join("state.json");
    std::fs::create_dir(&path)?;

    let store = StateStore::open(&path)?;
    assert!(store.is_empty());
    assert!(store.close().is_err());
    assert!(path.is_dir());
    Ok(())
}

#[test]
fn dropping_an_unclosed_store_still_writes() -> anyhow::Result<()> {
    let dir = tempdir()?;
    let path = dir.path().join("state.json");
    {
        let mut store = StateStore::open(&path)?;
        store.save_container("manager", Some(ResourceReference::cached("ctr-9")));
    }
    let reopened = StateStore::open(&path)?;
    assert_eq!(reopened.container_id("manager")?, "ctr-9");
    Ok(())
}

#[tokio::test]
async fn staleness_follows_the_cached_pairing() -> anyhow::Result<()> {
    let dir = tempdir()?;
    let mut store = StateStore::open(dir.path().join("state.json"))?;

    assert_eq!(
        store.should_rebuild_container("server", None).await?,
        Staleness::Unknown
    );

    store.save_image("server", Some(ResourceReference::cached("img-1")));
    assert_eq!(
        store.should_rebuild_container("server", None).await?,
        Staleness::NeedsBuild
    );

    let mut container = ResourceReference::cached("ctr-1");
    container
        .metadata
        .insert(META_IMAGE_ID.to_owned(), "img-1".into());
    store.save_container("server", Some(container.clone()));
    assert_eq!(
        store.should_rebuild_container("server", None).await?,
        Staleness::UpToDate
    );

    container
        .metadata
        .insert(META_IMAGE_ID.to_owned(), "img-0".into());
    store.save_container("server", Some(container));
    assert_eq!(
        store.should_rebuild_container("server", None).await?,
        Staleness::Stale
    );

    store.save_container("server", Some(ResourceReference::cached("ctr-1")));
    assert_eq!(
        store.should_rebuild_container("server", None).await?,
        Staleness::NeedsRemoteCheck
    );
    store.close()?;
    Ok(())
}

#[tokio::test]
async fn remote_check_compares_live_identities() -> anyhow::Result<()> {
    let runtime = MockRuntime::new();
    let image = runtime.build_image(&source(), &IndexMap::new()).await?;
    let pod = runtime.create_pod(&[]).await?;
    let container = runtime.create_container(&image, &pod, &[]).await?;

    let dir = tempdir()?;
    let mut store = StateStore::open(dir.path().join("state.json"))?;
    store.save_image("server", Some(ResourceReference::cached(image.id.clone())));
    store.save_container("server", Some(ResourceReference::cached(container.id.clone())));

    let client: &dyn RuntimeClient = &runtime;
    assert_eq!(
        store.should_rebuild_container("server", Some(client)).await?,
        Staleness::UpToDate
    );
    let refreshed = store.container("server").expect("container entry");
    assert!(refreshed.is_live());
    assert_eq!(refreshed.image_id(), Some(image.id.as_str()));
    store.close()?;
    Ok(())
}

#[tokio::test]
async fn remote_check_clears_vanished_containers() -> anyhow::Result<()> {
    let runtime = MockRuntime::new();
    let image = runtime.build_image(&source(), &IndexMap::new()).await?;

    let dir = tempdir()?;
    let mut store = StateStore::open(dir.path().join("state.json"))?;
    store.save_image("server", Some(ResourceReference::cached(image.id.clone())));
    store.save_container("server", Some(ResourceReference::cached("ctr-gone")));

    let client: &dyn RuntimeClient = &runtime;
    assert_eq!(
        store.should_rebuild_container("server", Some(client)).await?,
        Staleness::NeedsBuild
    );
    assert!(store.container("server").is_none());
    store.close()?;
    Ok(())
}

#[tokio::test]
async fn remote_check_flags_containers_from_another_image() -> anyhow::Result<()> {
    let runtime = MockRuntime::new();
    let old_image = runtime.build_image(&source(), &IndexMap::new()).await?;
    let new_image = runtime.build_image(&source(), &IndexMap::new()).await?;
    let pod = runtime.create_pod(&[]).await?;
    let container = runtime.create_container(&old_image, &pod, &[]).await?;

    let dir = tempdir()?;
    let mut store = StateStore::open(dir.path().join("state.json"))?;
    store.save_image("server", Some(ResourceReference::cached(new_image.id.clone())));
    store.save_container("server", Some(ResourceReference::cached(container.id.clone())));

    let client: &dyn RuntimeClient = &runtime;
    assert_eq!(
        store.should_rebuild_container("server", Some(client)).await?,
        Staleness::Stale
    );
    let refreshed = store.container("server").expect("container entry");
    assert_eq!(refreshed.image_id(), Some(old_image.id.as_str()));
    assert_eq!(
        store.should_rebuild_container("server", None).await?,
        Staleness::Stale
    );
    store.close()?;
    Ok(())
}

#[tokio::test]
async fn remote_check_forgets_vanished_images() -> anyhow::Result<()> {
    let runtime = MockRuntime::new();
    let image = runtime.build_image(&source(), &IndexMap::new()).await?;
    let pod = runtime.create_pod(&[]).await?;
    let container = runtime.create_container(&image, &pod, &[]).await?;
    assert!(runtime.remove_out_of_band(&image.id));

    let dir = tempdir()?;
    let mut store = StateStore::open(dir.path().join("state.json"))?;
    store.save_image("server", Some(ResourceReference::cached(image.id.clone())));
    store.save_container("server", Some(ResourceReference::cached(container.id.clone())));

    let client: &dyn RuntimeClient = &runtime;
    assert_eq!(
        store.should_rebuild_container("server", Some(client)).await?,
        Staleness::Unknown
    );
    assert!(store.image("server").is_none());
    assert_eq!(store.container_id("server")?, container.id);
    store.close()?;
    Ok(())
}

#[tokio::test]
async fn live_lookups_propagate_not_found() -> anyhow::Result<()> {
    let runtime = MockRuntime::new();
    let dir = tempdir()?;
    let mut store = StateStore::open(dir.path().join("state.json"))?;
    store.save_pod(Some(ResourceReference::cached("pod-404")));

    let err = store.pod_object(&runtime).await.unwrap_err();
    assert!(err.is_not_found());
    assert_eq!(store.pod_id(), Some("pod-404"));
    store.close()?;
    Ok(())
}
