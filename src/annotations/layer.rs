//! Annotation layer: translates batches now, applies them once the
//! renderer is ready.

use crate::annotations::icon::{HttpIconFetcher, IconFetcher};
use crate::annotations::primitive::Primitive;
use crate::annotations::translator::{AnnotationTranslator, Translation};
use crate::core::config::AnnotationConfig;
use crate::rendering::RenderingEngine;
use crate::runtime::{self, AsyncHandle};
use serde_json::Value;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

#[derive(Debug, Clone)]
struct PendingBatch {
    primitives: Vec<Primitive>,
    clear_existing: bool,
}

pub struct AnnotationLayer {
    translator: AnnotationTranslator,
    icons: Option<Arc<dyn IconFetcher>>,
    /// Latest batch not yet handed to the renderer
    pending: Mutex<Option<PendingBatch>>,
    /// Held from taking a batch until it is on the renderer
    applying: tokio::sync::Mutex<()>,
}

impl AnnotationLayer {
    /// Layer fetching marker icons over HTTP
    pub fn new(config: AnnotationConfig) -> Self {
        let icons: Arc<dyn IconFetcher> = Arc::new(HttpIconFetcher::new(&config));
        Self::with_icon_fetcher(config, Some(icons))
    }

    /// Layer with a custom icon source; `None` renders every marker with the default icon
    pub fn with_icon_fetcher(config: AnnotationConfig, icons: Option<Arc<dyn IconFetcher>>) -> Self {
        Self {
            translator: AnnotationTranslator::new(config),
            icons,
            pending: Mutex::new(None),
            applying: tokio::sync::Mutex::new(()),
        }
    }

    pub fn translator(&self) -> &AnnotationTranslator {
        &self.translator
    }

    fn lock(&self) -> MutexGuard<'_, Option<PendingBatch>> {
        self.pending
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Translates `batch` and queues it for the renderer, replacing any
    /// batch still waiting. An empty batch is rejected and leaves the
    /// renderer untouched.
    pub fn set_annotations(&self, batch: &[Value], clear_existing: bool) -> Option<Translation> {
        if batch.is_empty() {
            log::error!("no annotations in batch, ignoring");
            return None;
        }

        let translation = self.translator.translate(batch);
        let replaced = self.lock().replace(PendingBatch {
            primitives: translation.primitives.clone(),
            clear_existing,
        });
        if replaced.is_some() {
            log::debug!("dropping annotation batch superseded before the renderer was ready");
        }
        Some(translation)
    }

    /// Same as [`set_annotations`](Self::set_annotations) for a raw property value
    pub fn set_annotations_value(&self, value: &Value, clear_existing: bool) -> Option<Translation> {
        match value {
            Value::Array(batch) => self.set_annotations(batch, clear_existing),
            Value::Null => self.set_annotations(&[], clear_existing),
            other => {
                log::error!("annotations must be a list, got {}", other);
                None
            }
        }
    }

    pub fn has_pending(&self) -> bool {
        self.lock().is_some()
    }

    /// Hands the queued batch to `renderer` if it is ready.
    ///
    /// Returns the number of primitives applied, or `None` when nothing was
    /// applied (no batch queued or renderer not ready). Applies never
    /// overlap, and a batch superseded while its icons load is dropped.
    pub async fn apply_pending(&self, renderer: &dyn RenderingEngine) -> Option<usize> {
        if !renderer.is_ready() {
            log::trace!("renderer not ready, keeping annotations queued");
            return None;
        }
        let _applying = self.applying.lock().await;

        let PendingBatch {
            primitives,
            clear_existing,
        } = loop {
            let mut batch = self.lock().take()?;
            self.resolve_icons(&mut batch.primitives).await;
            if self.has_pending() {
                log::debug!("annotation batch superseded while loading icons, skipping it");
                continue;
            }
            break batch;
        };

        if clear_existing {
            renderer.remove_all_annotations();
        }
        for primitive in &primitives {
            renderer.add_primitive(primitive);
        }
        log::debug!("applied {} annotations", primitives.len());
        Some(primitives.len())
    }

    /// Waits for `renderer` to become ready, then applies the latest batch
    pub async fn apply_when_ready(
        &self,
        renderer: &dyn RenderingEngine,
        poll_interval: Duration,
    ) -> Option<usize> {
        while !renderer.is_ready() {
            if !self.has_pending() {
                return None;
            }
            tokio::time::sleep(poll_interval).await;
        }
        self.apply_pending(renderer).await
    }

    /// Spawns [`apply_when_ready`](Self::apply_when_ready)
    pub fn submit_apply(
        self: &Arc<Self>,
        renderer: Arc<dyn RenderingEngine>,
        poll_interval: Duration,
    ) -> Box<dyn AsyncHandle> {
        let layer = Arc::clone(self);
        runtime::spawn(async move {
            layer.apply_when_ready(renderer.as_ref(), poll_interval).await;
        })
    }

    pub fn remove_all_annotations(&self, renderer: &dyn RenderingEngine) {
        renderer.remove_all_annotations();
    }

    async fn resolve_icons(&self, primitives: &mut [Primitive]) {
        let Some(icons) = &self.icons else {
            return;
        };

        for primitive in primitives.iter_mut() {
            let Primitive::Marker(marker) = primitive else {
                continue;
            };
            let Some(url) = marker.icon_url.clone() else {
                continue;
            };
            if marker.icon.is_some() {
                continue;
            }
            match icons.fetch(&url).await {
                Ok(icon) => marker.icon = Some(icon),
                Err(e) => log::warn!("using default icon, could not load {}: {}", url, e),
            }
        }
    }
}
