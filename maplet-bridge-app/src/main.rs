use anyhow::Context;
use maplet_bridge::prelude::*;
use maplet_bridge::rendering::RecordingRenderer;
use serde_json::json;
use std::time::Instant;

/// Headless host: downloads one pack from a simulated engine, renders a
/// few annotations and logs every notification the bridge emits.
///
/// Usage: `maplet-bridge-app [STORE_PATH]`. With a store path, packs
/// persist between runs and are rediscovered on start.
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = BridgeConfig::default();
    config.validate().context("invalid bridge configuration")?;

    let engine = match std::env::args().nth(1) {
        Some(path) => MemoryStorageEngine::open(&path, MemoryEngineConfig::default())
            .with_context(|| format!("opening offline store {}", path))?,
        None => MemoryStorageEngine::with_config(MemoryEngineConfig::default()),
    };

    let mut settings = MapSettings::new();
    settings.set_property("centerCoordinate", json!({"latitude": 40.7128, "longitude": -74.0060}))?;
    settings.set_property("zoomLevel", json!(12))?;
    settings.set_property("styleURL", json!("mapbox://styles/mapbox/streets-v9"))?;
    log::info!("view settings: {:?}", settings.snapshot());

    let manager = OfflineManager::start(Arc::new(engine), Arc::new(LogSink), config.offline.clone());

    let request = CreatePackRequest {
        uuid: uuid::Uuid::new_v4().to_string(),
        name: "Lower Manhattan".to_string(),
        bounds: LatLngBounds::from_coords(40.70, -74.02, 40.75, -73.97),
        min_zoom: 10,
        max_zoom: 13,
        style_url: "mapbox://styles/mapbox/streets-v9".to_string(),
    };
    let uuid = request.uuid.clone();
    manager.submit_create_pack(request);

    let deadline = Instant::now() + Duration::from_secs(30);
    while manager.pack_state(&uuid) != Some(PackState::Complete) {
        if Instant::now() > deadline {
            anyhow::bail!("pack {} did not finish downloading", uuid);
        }
        if manager.pack_state(&uuid) == Some(PackState::Failed) {
            anyhow::bail!("pack {} failed", uuid);
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }

    for pack in manager.list_packs().await? {
        println!("pack {} '{}' {:?}", pack.uuid, pack.name, pack.state);
    }

    let layer = Arc::new(AnnotationLayer::with_icon_fetcher(config.annotations.clone(), None));
    let renderer = Arc::new(RecordingRenderer::new(true));
    let translation = layer.set_annotations(
        &[
            json!({"type": "point", "coordinates": [40.7128, -74.0060], "title": "City Hall"}),
            json!({
                "type": "polyline",
                "coordinates": [[40.70, -74.01], [40.72, -74.00], [40.74, -73.99]],
                "strokeColor": "#FF0000",
                "strokeWidth": 3,
                "alpha": 0.5
            }),
            json!({"type": "polygon", "coordinates": [[40.70, -74.02]]}),
        ],
        true,
    );
    if let Some(translation) = translation {
        for skipped in &translation.skipped {
            println!("skipped annotation #{}: {}", skipped.index, skipped.reason);
        }
    }
    layer.apply_pending(renderer.as_ref()).await;
    println!("renderer holds {} annotations", renderer.primitives().len());

    if std::env::args().nth(1).is_none() {
        manager.delete_pack(&uuid).await?;
    }
    manager.shutdown();
    Ok(())
}
