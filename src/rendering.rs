//! Rendering engine capability consumed by the annotation layer

use crate::annotations::primitive::{
    MarkerPrimitive, PolygonPrimitive, PolylinePrimitive, Primitive,
};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

/// Receiver of annotation primitives. The renderer owns what it is given.
pub trait RenderingEngine: Send + Sync {
    /// Whether annotations can be applied yet
    fn is_ready(&self) -> bool;

    fn add_marker(&self, marker: &MarkerPrimitive);

    fn add_polyline(&self, polyline: &PolylinePrimitive);

    fn add_polygon(&self, polygon: &PolygonPrimitive);

    fn remove_all_annotations(&self);

    fn add_primitive(&self, primitive: &Primitive) {
        match primitive {
            Primitive::Marker(marker) => self.add_marker(marker),
            Primitive::Polyline(polyline) => self.add_polyline(polyline),
            Primitive::Polygon(polygon) => self.add_polygon(polygon),
        }
    }
}

/// Renderer that keeps what it is given; useful for headless hosts and tests
#[derive(Debug, Default)]
pub struct RecordingRenderer {
    ready: AtomicBool,
    primitives: Mutex<Vec<Primitive>>,
    clears: AtomicUsize,
}

impl RecordingRenderer {
    pub fn new(ready: bool) -> Self {
        Self {
            ready: AtomicBool::new(ready),
            ..Self::default()
        }
    }

    pub fn set_ready(&self, ready: bool) {
        self.ready.store(ready, Ordering::SeqCst);
    }

    /// Primitives currently on the map, in the order they were added
    pub fn primitives(&self) -> Vec<Primitive> {
        self.lock().clone()
    }

    /// Times `remove_all_annotations` was called
    pub fn clear_count(&self) -> usize {
        self.clears.load(Ordering::SeqCst)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<Primitive>> {
        self.primitives
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl RenderingEngine for RecordingRenderer {
    fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }

    fn add_marker(&self, marker: &MarkerPrimitive) {
        log::trace!("marker at ({}, {})", marker.position.lat, marker.position.lng);
        self.lock().push(Primitive::Marker(marker.clone()));
    }

    fn add_polyline(&self, polyline: &PolylinePrimitive) {
        log::trace!("polyline with {} points", polyline.points.len());
        self.lock().push(Primitive::Polyline(polyline.clone()));
    }

    fn add_polygon(&self, polygon: &PolygonPrimitive) {
        log::trace!("polygon with {} points", polygon.points.len());
        self.lock().push(Primitive::Polygon(polygon.clone()));
    }

    fn remove_all_annotations(&self) {
        self.lock().clear();
        self.clears.fetch_add(1, Ordering::SeqCst);
    }
}
