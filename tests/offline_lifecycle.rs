use crossbeam_channel::Receiver;
use maplet_bridge::constants::events;
use maplet_bridge::prelude::*;
use serde_json::json;
use std::time::Instant;

const TIMEOUT: Duration = Duration::from_secs(5);

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn offline_config() -> OfflineConfig {
    BridgeConfig::for_testing().offline
}

fn request(uuid: &str, name: &str) -> CreatePackRequest {
    CreatePackRequest {
        uuid: uuid.to_string(),
        name: name.to_string(),
        bounds: LatLngBounds::from_coords(40.0, -75.0, 41.0, -73.0),
        min_zoom: 0,
        max_zoom: 3,
        style_url: "mapbox://styles/mapbox/streets-v9".to_string(),
    }
}

fn manager_with(engine: &MemoryStorageEngine, config: OfflineConfig) -> (OfflineManager, Receiver<Notification>) {
    let (sink, rx) = ChannelSink::new();
    let manager = OfflineManager::new(Arc::new(engine.clone()), Arc::new(sink), config);
    (manager, rx)
}

/// Waits for the first notification named `name` that satisfies `accept`
async fn wait_for_matching(
    rx: &Receiver<Notification>,
    name: &str,
    accept: impl Fn(&Notification) -> bool,
) -> Notification {
    let deadline = Instant::now() + TIMEOUT;
    loop {
        match rx.try_recv() {
            Ok(notification) if notification.name == name && accept(&notification) => {
                return notification
            }
            Ok(_) => continue,
            Err(_) => {
                assert!(Instant::now() < deadline, "timed out waiting for {}", name);
                tokio::time::sleep(Duration::from_millis(2)).await;
            }
        }
    }
}

async fn wait_for(rx: &Receiver<Notification>, name: &str) -> Notification {
    wait_for_matching(rx, name, |_| true).await
}

async fn wait_until(mut condition: impl FnMut() -> bool) {
    let deadline = Instant::now() + TIMEOUT;
    while !condition() {
        assert!(Instant::now() < deadline, "condition not reached in time");
        tokio::time::sleep(Duration::from_millis(2)).await;
    }
}

fn drain(rx: &Receiver<Notification>) -> Vec<Notification> {
    rx.try_iter().collect()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_create_downloads_until_complete() {
    init_logging();
    let engine = MemoryStorageEngine::with_config(MemoryEngineConfig::for_testing());
    let (manager, rx) = manager_with(&engine, offline_config());

    let handle = manager.create_pack(request("pack-1", "Home")).await.unwrap();

    let created = wait_for(&rx, events::PACK_CREATED).await;
    assert_eq!(created.payload, json!({"uuid": "pack-1", "name": "Home"}));

    let complete = wait_for_matching(&rx, events::PACK_PROGRESS, |n| {
        n.payload["isComplete"] == json!(true)
    })
    .await;
    assert_eq!(complete.payload["progress"], json!(100.0));
    assert_eq!(complete.payload["determinate"], json!(true));
    assert_eq!(complete.payload["name"], json!("Home"));

    wait_until(|| manager.pack_state("pack-1") == Some(PackState::Complete)).await;
    assert_eq!(manager.registry().lookup("pack-1").unwrap(), handle);

    // No further progress once complete
    wait_until(|| !manager.is_observing("pack-1")).await;
    assert!(drain(&rx)
        .iter()
        .all(|n| n.name != events::PACK_PROGRESS));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_progress_reports_percentage() {
    init_logging();
    let engine = MemoryStorageEngine::new();
    let (manager, rx) = manager_with(&engine, offline_config());
    let handle = manager.create_pack(request("pack-1", "Home")).await.unwrap();
    assert_eq!(manager.pack_state("pack-1"), Some(PackState::Downloading));

    engine
        .push_status(
            handle,
            RegionStatus {
                download_state: DownloadState::Active,
                completed_resource_count: 50,
                completed_resource_size: 5_000,
                required_resource_count: 200,
                required_resource_count_is_precise: true,
            },
        )
        .unwrap();

    let progress = wait_for_matching(&rx, events::PACK_PROGRESS, |n| {
        n.payload["completedResourceCount"] == json!(50)
    })
    .await;
    assert_eq!(progress.payload["progress"], json!(25.0));
    assert_eq!(progress.payload["determinate"], json!(true));
    assert_eq!(progress.payload["isComplete"], json!(false));

    // An estimate is reported, but not as determinate
    engine
        .push_status(
            handle,
            RegionStatus {
                download_state: DownloadState::Active,
                completed_resource_count: 60,
                completed_resource_size: 6_000,
                required_resource_count: 240,
                required_resource_count_is_precise: false,
            },
        )
        .unwrap();
    let estimate = wait_for_matching(&rx, events::PACK_PROGRESS, |n| {
        n.payload["completedResourceCount"] == json!(60)
    })
    .await;
    assert_eq!(estimate.payload["progress"], json!(25.0));
    assert_eq!(estimate.payload["determinate"], json!(false));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_download_error_keeps_observing() {
    init_logging();
    let engine = MemoryStorageEngine::new();
    let (manager, rx) = manager_with(&engine, offline_config());
    let handle = manager.create_pack(request("pack-1", "Home")).await.unwrap();

    engine
        .push_error(
            handle,
            EngineError::new(EngineErrorReason::Connection, "network unreachable"),
        )
        .unwrap();
    let error = wait_for(&rx, events::PACK_ERROR).await;
    assert_eq!(
        error.payload,
        json!({"uuid": "pack-1", "reason": "connection", "message": "network unreachable"})
    );
    assert_eq!(manager.pack_state("pack-1"), Some(PackState::Downloading));
    assert!(manager.registry().contains("pack-1"));

    engine
        .push_status(
            handle,
            RegionStatus {
                download_state: DownloadState::Inactive,
                completed_resource_count: 10,
                completed_resource_size: 1_000,
                required_resource_count: 10,
                required_resource_count_is_precise: true,
            },
        )
        .unwrap();
    wait_until(|| manager.pack_state("pack-1") == Some(PackState::Complete)).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_tile_limit_fails_download_until_resumed() {
    init_logging();
    let engine = MemoryStorageEngine::new();
    let (manager, rx) = manager_with(&engine, offline_config());
    let handle = manager.create_pack(request("pack-1", "Home")).await.unwrap();

    engine.push_tile_limit(handle, 6000).unwrap();
    let limit = wait_for(&rx, events::TILE_LIMIT_EXCEEDED).await;
    assert_eq!(limit.payload, json!({"uuid": "pack-1", "limit": 6000}));
    wait_until(|| manager.pack_state("pack-1") == Some(PackState::Failed)).await;

    manager.resume_pack("pack-1").unwrap();
    assert_eq!(manager.pack_state("pack-1"), Some(PackState::Downloading));
    assert!(manager.is_observing("pack-1"));
    assert_eq!(engine.status(handle).unwrap().download_state, DownloadState::Active);
}

#[tokio::test]
async fn test_pause_and_resume() {
    init_logging();
    let engine = MemoryStorageEngine::new();
    let (manager, _rx) = manager_with(&engine, offline_config());
    let handle = manager.create_pack(request("pack-1", "Home")).await.unwrap();

    manager.pause_pack("pack-1").unwrap();
    assert_eq!(manager.pack_state("pack-1"), Some(PackState::Created));
    assert_eq!(engine.status(handle).unwrap().download_state, DownloadState::Inactive);

    manager
        .set_pack_download_state("pack-1", DownloadState::Active)
        .unwrap();
    assert_eq!(manager.pack_state("pack-1"), Some(PackState::Downloading));

    assert!(matches!(
        manager.pause_pack("unknown"),
        Err(BridgeError::NotFound(_))
    ));
}

#[tokio::test]
async fn test_create_without_activation() {
    init_logging();
    let engine = MemoryStorageEngine::new();
    let config = OfflineConfig {
        activate_on_create: false,
        ..offline_config()
    };
    let (manager, _rx) = manager_with(&engine, config);
    let handle = manager.create_pack(request("pack-1", "Home")).await.unwrap();

    assert_eq!(manager.pack_state("pack-1"), Some(PackState::Created));
    assert!(!manager.is_observing("pack-1"));
    assert_eq!(engine.status(handle).unwrap().download_state, DownloadState::Inactive);
}

#[tokio::test]
async fn test_duplicate_uuid_is_rejected() {
    init_logging();
    let engine = MemoryStorageEngine::new();
    let (manager, rx) = manager_with(&engine, offline_config());
    manager.create_pack(request("pack-1", "Home")).await.unwrap();

    let result = manager.create_pack(request("pack-1", "Other")).await;
    assert!(matches!(result, Err(BridgeError::DuplicateUuid(uuid)) if uuid == "pack-1"));
    assert_eq!(engine.calls().create, 1);
    assert_eq!(manager.registry().get("pack-1").unwrap().name, "Home");

    let failed = wait_for(&rx, events::PACK_CREATE_FAILED).await;
    assert_eq!(failed.payload["reason"], json!("duplicate"));
}

#[tokio::test]
async fn test_engine_create_failure() {
    init_logging();
    let engine = MemoryStorageEngine::new();
    let (manager, rx) = manager_with(&engine, offline_config());
    engine.fail_next_create(EngineError::new(
        EngineErrorReason::Server,
        "style not found",
    ));

    let result = manager.create_pack(request("pack-1", "Home")).await;
    match result {
        Err(BridgeError::Create { uuid, source }) => {
            assert_eq!(uuid, "pack-1");
            assert_eq!(source.reason, EngineErrorReason::Server);
        }
        other => panic!("expected a create error, got {:?}", other),
    }

    assert!(manager.registry().is_empty());
    assert_eq!(manager.pack_state("pack-1"), Some(PackState::Failed));
    let failed = wait_for(&rx, events::PACK_CREATE_FAILED).await;
    assert_eq!(
        failed.payload,
        json!({"uuid": "pack-1", "reason": "server", "message": "style not found"})
    );

    // The uuid is free again after a failed create
    manager.create_pack(request("pack-1", "Home")).await.unwrap();
    assert!(manager.registry().contains("pack-1"));
}

#[tokio::test]
async fn test_invalid_request_never_reaches_engine() {
    init_logging();
    let engine = MemoryStorageEngine::new();
    let (manager, rx) = manager_with(&engine, offline_config());

    let mut bad = request("pack-1", "Home");
    bad.min_zoom = 10;
    bad.max_zoom = 5;
    assert!(matches!(
        manager.create_pack(bad).await,
        Err(BridgeError::InvalidRequest(_))
    ));
    assert_eq!(engine.calls().total(), 0);
    assert_eq!(
        wait_for(&rx, events::PACK_CREATE_FAILED).await.payload["reason"],
        json!("invalid")
    );
}

#[tokio::test]
async fn test_unencodable_metadata_still_creates() {
    init_logging();
    let engine = MemoryStorageEngine::new();
    let (manager, _rx) = manager_with(&engine, offline_config());

    let handle = manager
        .create_pack(request("pack-1", "bad\0name"))
        .await
        .unwrap();
    assert!(engine.metadata(handle).unwrap().is_empty());
    assert_eq!(manager.registry().lookup("pack-1").unwrap(), handle);
}

#[tokio::test]
async fn test_delete_unknown_uuid_skips_engine() {
    init_logging();
    let engine = MemoryStorageEngine::new();
    let (manager, rx) = manager_with(&engine, offline_config());

    let before = engine.calls();
    let result = manager.delete_pack("missing").await;

    assert!(matches!(result, Err(BridgeError::NotFound(uuid)) if uuid == "missing"));
    assert_eq!(engine.calls(), before);
    let failed = wait_for(&rx, events::PACK_DELETE_FAILED).await;
    assert_eq!(failed.payload["reason"], json!("not_found"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_delete_removes_pack() {
    init_logging();
    let engine = MemoryStorageEngine::new();
    let (manager, rx) = manager_with(&engine, offline_config());
    let handle = manager.create_pack(request("pack-1", "Home")).await.unwrap();

    manager.delete_pack("pack-1").await.unwrap();

    assert!(!engine.contains(handle));
    assert!(!manager.registry().contains("pack-1"));
    assert_eq!(manager.pack_state("pack-1"), Some(PackState::Deleted));
    assert!(!manager.is_observing("pack-1"));
    assert_eq!(
        wait_for(&rx, events::PACK_DELETED).await.payload,
        json!({"uuid": "pack-1"})
    );
}

#[tokio::test]
async fn test_listing_forgets_deleted_packs() {
    init_logging();
    let engine = MemoryStorageEngine::new();
    let (manager, _rx) = manager_with(&engine, offline_config());
    for i in 0..3 {
        let uuid = format!("pack-{}", i);
        manager.create_pack(request(&uuid, "Temp")).await.unwrap();
        manager.delete_pack(&uuid).await.unwrap();
    }
    assert_eq!(manager.pack_state("pack-0"), Some(PackState::Deleted));

    manager.list_packs().await.unwrap();

    for i in 0..3 {
        assert_eq!(manager.pack_state(&format!("pack-{}", i)), None);
    }
}

#[tokio::test]
async fn test_failed_delete_keeps_pack_and_resyncs() {
    init_logging();
    let engine = MemoryStorageEngine::new();
    let (manager, rx) = manager_with(&engine, offline_config());
    let handle = manager.create_pack(request("pack-1", "Home")).await.unwrap();
    engine.fail_next_delete(EngineError::other("database is locked"));

    let lists_before = engine.calls().list;
    let result = manager.delete_pack("pack-1").await;

    assert!(matches!(result, Err(BridgeError::Delete { .. })));
    assert!(engine.contains(handle));
    assert_eq!(manager.registry().lookup("pack-1").unwrap(), handle);
    assert_eq!(engine.calls().list, lists_before + 1);

    let names: Vec<String> = drain(&rx).into_iter().map(|n| n.name).collect();
    let failed = names.iter().position(|n| n == events::PACK_DELETE_FAILED);
    let loaded = names.iter().position(|n| n == events::PACKS_LOADED);
    assert!(failed.is_some() && loaded.is_some());
    assert!(failed < loaded);
}

#[tokio::test]
async fn test_failed_delete_without_resync() {
    init_logging();
    let engine = MemoryStorageEngine::new();
    let config = OfflineConfig {
        resync_after_failed_delete: false,
        ..offline_config()
    };
    let (manager, _rx) = manager_with(&engine, config);
    manager.create_pack(request("pack-1", "Home")).await.unwrap();
    engine.fail_next_delete(EngineError::other("busy"));

    assert!(manager.delete_pack("pack-1").await.is_err());
    assert_eq!(engine.calls().list, 0);
    assert!(manager.registry().contains("pack-1"));
}

#[tokio::test]
async fn test_list_rediscovers_and_falls_back_on_corrupt_metadata() {
    init_logging();
    let engine = MemoryStorageEngine::new();
    let definition = RegionDefinition::new(
        LatLngBounds::from_coords(40.0, -75.0, 41.0, -73.0),
        0,
        2,
        "mapbox://styles/mapbox/streets-v9".into(),
    );
    let good = engine.insert_region(
        definition.clone(),
        MetadataCodec::default().encode("Home", "uuid-home").unwrap(),
    );
    let corrupt = engine.insert_region(definition, b"\xff\xfe not json".to_vec());

    let (manager, rx) = manager_with(&engine, offline_config());
    let packs = manager.list_packs().await.unwrap();

    assert_eq!(packs.len(), 2);
    assert_eq!(manager.registry().lookup("uuid-home").unwrap(), good);
    let fallback = manager
        .registry()
        .get(&corrupt.id().to_string())
        .unwrap();
    assert_eq!(fallback.name, format!("Region {}", corrupt.id()));
    assert_eq!(
        manager.pack_state("uuid-home"),
        Some(PackState::Created)
    );

    let loaded = wait_for(&rx, events::PACKS_LOADED).await;
    assert_eq!(loaded.payload["packs"].as_array().unwrap().len(), 2);
}

#[tokio::test]
async fn test_failed_listing_keeps_previous_packs() {
    init_logging();
    let engine = MemoryStorageEngine::new();
    let (manager, rx) = manager_with(&engine, offline_config());
    manager.create_pack(request("pack-1", "Home")).await.unwrap();

    engine.fail_next_list(EngineError::new(EngineErrorReason::Other, "io error"));
    let result = manager.list_packs().await;

    assert!(matches!(result, Err(BridgeError::List(_))));
    assert!(manager.registry().contains("pack-1"));
    let failed = wait_for(&rx, events::PACKS_LOAD_FAILED).await;
    assert_eq!(failed.payload, json!({"reason": "other", "message": "io error"}));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_start_lists_persisted_packs() {
    init_logging();
    let path = std::env::temp_dir().join(format!(
        "maplet-bridge-lifecycle-{}.bin",
        std::process::id()
    ));
    let _ = std::fs::remove_file(&path);

    {
        let engine = MemoryStorageEngine::open(&path, MemoryEngineConfig::manual()).unwrap();
        let (manager, _rx) = manager_with(&engine, offline_config());
        manager.create_pack(request("pack-1", "Home")).await.unwrap();
        manager.shutdown();
    }

    let engine = MemoryStorageEngine::open(&path, MemoryEngineConfig::manual()).unwrap();
    let (sink, rx) = ChannelSink::new();
    let manager = OfflineManager::start(
        Arc::new(engine),
        Arc::new(sink),
        OfflineConfig::default(),
    );

    let loaded = wait_for(&rx, events::PACKS_LOADED).await;
    assert_eq!(
        loaded.payload,
        json!({"packs": [{"uuid": "pack-1", "name": "Home"}]})
    );
    assert_eq!(manager.packs()[0].name, "Home");
    assert_eq!(manager.pack_state("pack-1"), Some(PackState::Created));

    let _ = std::fs::remove_file(&path);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_submitted_operations_notify() {
    init_logging();
    let engine = MemoryStorageEngine::new();
    let (manager, rx) = manager_with(&engine, offline_config());

    manager.submit_create_pack(request("pack-1", "Home"));
    wait_for(&rx, events::PACK_CREATED).await;

    manager.submit_list_packs();
    wait_for(&rx, events::PACKS_LOADED).await;

    manager.submit_delete_pack("pack-1");
    wait_for(&rx, events::PACK_DELETED).await;
    assert!(manager.packs().is_empty());
}
