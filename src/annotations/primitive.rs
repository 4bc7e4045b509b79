//! Renderer-ready annotation primitives

use crate::annotations::icon::Icon;
use crate::core::geo::LatLng;
use serde::{Deserialize, Serialize};

pub use crate::annotations::color::Color;

/// A point marker
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarkerPrimitive {
    pub id: Option<String>,
    pub position: LatLng,
    pub title: Option<String>,
    pub subtitle: Option<String>,
    /// Requested custom icon; fetched best-effort before rendering
    pub icon_url: Option<String>,
    /// Fetched icon, if any
    #[serde(skip)]
    pub icon: Option<Icon>,
}

impl MarkerPrimitive {
    pub fn new(position: LatLng) -> Self {
        Self {
            id: None,
            position,
            title: None,
            subtitle: None,
            icon_url: None,
            icon: None,
        }
    }
}

/// An open line through two or more points
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolylinePrimitive {
    pub id: Option<String>,
    pub points: Vec<LatLng>,
    pub stroke_color: Option<Color>,
    pub stroke_width: Option<f32>,
    /// Opacity in [0, 1]
    pub alpha: Option<f32>,
}

/// A closed ring of three or more points
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolygonPrimitive {
    pub id: Option<String>,
    pub points: Vec<LatLng>,
    pub fill_color: Option<Color>,
    pub stroke_color: Option<Color>,
    /// Fill opacity in [0, 1]
    pub alpha: Option<f32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Primitive {
    Marker(MarkerPrimitive),
    Polyline(PolylinePrimitive),
    Polygon(PolygonPrimitive),
}

impl Primitive {
    pub fn id(&self) -> Option<&str> {
        match self {
            Primitive::Marker(m) => m.id.as_deref(),
            Primitive::Polyline(l) => l.id.as_deref(),
            Primitive::Polygon(p) => p.id.as_deref(),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Primitive::Marker(_) => "point",
            Primitive::Polyline(_) => "polyline",
            Primitive::Polygon(_) => "polygon",
        }
    }
}
