//! Annotation batch translation
//!
//! Turns loosely-typed JSON descriptors into [`Primitive`]s. A malformed
//! item is skipped and recorded; it never aborts the rest of the batch.
//! Output order follows input order.

use crate::annotations::primitive::{
    Color, MarkerPrimitive, PolygonPrimitive, PolylinePrimitive, Primitive,
};
use crate::core::config::AnnotationConfig;
use crate::core::geo::LatLng;
use serde_json::{Map, Value};

/// Why a single descriptor was left out of a batch
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum TranslationSkip {
    #[error("descriptor is not an object")]
    NotAnObject,

    #[error("descriptor has no type")]
    MissingType,

    #[error("unknown annotation type '{0}'")]
    UnknownType(String),

    #[error("descriptor has no coordinates")]
    MissingCoordinate,

    #[error("invalid coordinate: {0}")]
    InvalidCoordinate(String),

    #[error("needs at least {required} coordinates, got {found}")]
    TooFewCoordinates { required: usize, found: usize },

    #[error("invalid color '{value}' for {field}")]
    InvalidColor { field: &'static str, value: String },

    #[error("invalid value for {field}")]
    InvalidField { field: &'static str },
}

#[derive(Debug, Clone, PartialEq)]
pub struct SkippedAnnotation {
    /// Position of the descriptor in the batch
    pub index: usize,
    pub reason: TranslationSkip,
}

/// Result of translating one batch
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Translation {
    pub primitives: Vec<Primitive>,
    pub skipped: Vec<SkippedAnnotation>,
}

impl Translation {
    pub fn is_empty(&self) -> bool {
        self.primitives.is_empty()
    }
}

pub type ItemResult<T> = std::result::Result<T, TranslationSkip>;

#[derive(Debug, Clone, Default)]
pub struct AnnotationTranslator {
    config: AnnotationConfig,
}

impl AnnotationTranslator {
    pub fn new(config: AnnotationConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &AnnotationConfig {
        &self.config
    }

    pub fn translate(&self, batch: &[Value]) -> Translation {
        let mut translation = Translation::default();

        for (index, descriptor) in batch.iter().enumerate() {
            match self.translate_item(descriptor) {
                Ok(primitive) => translation.primitives.push(primitive),
                Err(reason) => {
                    log::warn!("skipping annotation #{}: {}", index, reason);
                    translation.skipped.push(SkippedAnnotation { index, reason });
                }
            }
        }

        log::debug!(
            "translated {} annotations, skipped {}",
            translation.primitives.len(),
            translation.skipped.len()
        );
        translation
    }

    /// Translates a single descriptor
    pub fn translate_item(&self, descriptor: &Value) -> ItemResult<Primitive> {
        let item = descriptor.as_object().ok_or(TranslationSkip::NotAnObject)?;
        let kind = match item.get("type") {
            Some(Value::String(kind)) => kind.as_str(),
            _ => return Err(TranslationSkip::MissingType),
        };

        match kind {
            "point" => self.marker(item).map(Primitive::Marker),
            "polyline" => self.polyline(item).map(Primitive::Polyline),
            "polygon" => self.polygon(item).map(Primitive::Polygon),
            other => Err(TranslationSkip::UnknownType(other.to_string())),
        }
    }

    fn marker(&self, item: &Map<String, Value>) -> ItemResult<MarkerPrimitive> {
        let raw = present(item, "coordinates").ok_or(TranslationSkip::MissingCoordinate)?;
        let position = self.coordinate(raw)?;

        let mut marker = MarkerPrimitive::new(position);
        marker.id = id(item);
        marker.title = optional_string(item, "title")?;
        marker.subtitle = optional_string(item, "subtitle")?;
        marker.icon_url = icon_url(item);
        Ok(marker)
    }

    fn polyline(&self, item: &Map<String, Value>) -> ItemResult<PolylinePrimitive> {
        let points = self.coordinates(item, self.config.min_polyline_points)?;
        Ok(PolylinePrimitive {
            id: id(item),
            points,
            stroke_color: optional_color(item, "strokeColor")?,
            stroke_width: optional_width(item, "strokeWidth")?,
            alpha: self.optional_alpha(item)?,
        })
    }

    fn polygon(&self, item: &Map<String, Value>) -> ItemResult<PolygonPrimitive> {
        let points = self.coordinates(item, self.config.min_polygon_points)?;
        Ok(PolygonPrimitive {
            id: id(item),
            points,
            fill_color: optional_color(item, "fillColor")?,
            stroke_color: optional_color(item, "strokeColor")?,
            alpha: self.optional_alpha(item)?,
        })
    }

    fn coordinates(&self, item: &Map<String, Value>, required: usize) -> ItemResult<Vec<LatLng>> {
        let raw = present(item, "coordinates").ok_or(TranslationSkip::MissingCoordinate)?;
        let list = raw.as_array().ok_or_else(|| {
            TranslationSkip::InvalidCoordinate("expected a list of coordinates".into())
        })?;

        if list.len() < required {
            return Err(TranslationSkip::TooFewCoordinates {
                required,
                found: list.len(),
            });
        }
        list.iter().map(|value| self.coordinate(value)).collect()
    }

    /// Accepts `[lat, lng]` or `{"latitude": .., "longitude": ..}`
    fn coordinate(&self, value: &Value) -> ItemResult<LatLng> {
        let (lat, lng) = match value {
            Value::Array(pair) if pair.len() >= 2 => (pair[0].as_f64(), pair[1].as_f64()),
            Value::Object(map) => (
                map.get("latitude").and_then(Value::as_f64),
                map.get("longitude").and_then(Value::as_f64),
            ),
            other => {
                return Err(TranslationSkip::InvalidCoordinate(other.to_string()));
            }
        };

        let point = match (lat, lng) {
            (Some(lat), Some(lng)) => LatLng::new(lat, lng),
            _ => return Err(TranslationSkip::InvalidCoordinate(value.to_string())),
        };
        if self.config.validate_coordinates && !point.is_valid() {
            return Err(TranslationSkip::InvalidCoordinate(format!(
                "({}, {}) is out of range",
                point.lat, point.lng
            )));
        }
        Ok(point)
    }

    fn optional_alpha(&self, item: &Map<String, Value>) -> ItemResult<Option<f32>> {
        let Some(value) = present(item, "alpha") else {
            return Ok(None);
        };
        let alpha = value
            .as_f64()
            .ok_or(TranslationSkip::InvalidField { field: "alpha" })?;

        if (0.0..=1.0).contains(&alpha) {
            Ok(Some(alpha as f32))
        } else if self.config.clamp_alpha && alpha.is_finite() {
            Ok(Some(alpha.clamp(0.0, 1.0) as f32))
        } else {
            Err(TranslationSkip::InvalidField { field: "alpha" })
        }
    }
}

/// Value of `key` unless absent or `null`
fn present<'a>(item: &'a Map<String, Value>, key: &str) -> Option<&'a Value> {
    item.get(key).filter(|value| !value.is_null())
}

fn id(item: &Map<String, Value>) -> Option<String> {
    match present(item, "id")? {
        Value::String(id) => Some(id.clone()),
        Value::Number(id) => Some(id.to_string()),
        _ => None,
    }
}

fn optional_string(item: &Map<String, Value>, field: &'static str) -> ItemResult<Option<String>> {
    match present(item, field) {
        None => Ok(None),
        Some(Value::String(text)) => Ok(Some(text.clone())),
        Some(_) => Err(TranslationSkip::InvalidField { field }),
    }
}

fn optional_color(item: &Map<String, Value>, field: &'static str) -> ItemResult<Option<Color>> {
    match present(item, field) {
        None => Ok(None),
        Some(Value::String(text)) => {
            Color::parse(text)
                .map(Some)
                .ok_or_else(|| TranslationSkip::InvalidColor {
                    field,
                    value: text.clone(),
                })
        }
        Some(other) => Err(TranslationSkip::InvalidColor {
            field,
            value: other.to_string(),
        }),
    }
}

fn optional_width(item: &Map<String, Value>, field: &'static str) -> ItemResult<Option<f32>> {
    match present(item, field) {
        None => Ok(None),
        Some(value) => match value.as_f64() {
            Some(width) if width.is_finite() && width >= 0.0 => Ok(Some(width as f32)),
            _ => Err(TranslationSkip::InvalidField { field }),
        },
    }
}

/// `annotationImage.url`; a malformed image entry only loses the icon
fn icon_url(item: &Map<String, Value>) -> Option<String> {
    let image = present(item, "annotationImage")?;
    match image.get("url").and_then(Value::as_str) {
        Some(url) if !url.trim().is_empty() => Some(url.to_string()),
        _ => {
            log::warn!("ignoring annotationImage without a usable url: {}", image);
            None
        }
    }
}
