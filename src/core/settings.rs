//! Pass-through view properties
//!
//! Camera, gesture and style properties carry no invariants of their own.
//! The host records them here by name and the map engine reads a snapshot
//! when it becomes ready, instead of every setter poking a shared settings
//! object.

use crate::{core::geo::LatLng, BridgeError, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Snapshot of the view properties set by the host UI layer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MapSettings {
    pub access_token: Option<String>,
    pub center_coordinate: Option<LatLng>,
    pub zoom_level: f64,
    pub direction: f64,
    pub tilt: f64,
    #[serde(rename = "styleURL")]
    pub style_url: Option<String>,
    pub debug_active: bool,
    pub rotate_enabled: bool,
    pub scroll_enabled: bool,
    pub zoom_enabled: bool,
    pub shows_user_location: bool,
    pub user_tracking_mode: i64,
    pub compass_is_hidden: bool,
}

impl Default for MapSettings {
    fn default() -> Self {
        Self {
            access_token: None,
            center_coordinate: None,
            zoom_level: 0.0,
            direction: 0.0,
            tilt: 0.0,
            style_url: None,
            debug_active: false,
            rotate_enabled: true,
            scroll_enabled: true,
            zoom_enabled: true,
            shows_user_location: true,
            user_tracking_mode: 0,
            compass_is_hidden: false,
        }
    }
}

impl MapSettings {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a property by its host-side name.
    ///
    /// Values of the wrong JSON type are rejected and leave the previous
    /// value in place. Empty access tokens and style URLs are ignored.
    pub fn set_property(&mut self, name: &str, value: Value) -> Result<()> {
        match name {
            "accessToken" => match non_empty_string(name, &value)? {
                Some(token) => self.access_token = Some(token),
                None => log::error!("no access token provided"),
            },
            "styleURL" => match non_empty_string(name, &value)? {
                Some(url) => self.style_url = Some(url),
                None => log::warn!("no style URL provided"),
            },
            "centerCoordinate" => {
                if value.is_null() {
                    log::warn!("no center coordinate provided");
                } else {
                    let latitude = number_field(&value, "latitude")?;
                    let longitude = number_field(&value, "longitude")?;
                    self.center_coordinate = Some(LatLng::new(latitude, longitude));
                }
            }
            "zoomLevel" => self.zoom_level = number(name, &value)?,
            "direction" => self.direction = number(name, &value)?,
            "tilt" => self.tilt = number(name, &value)?,
            "userTrackingMode" => {
                self.user_tracking_mode = value
                    .as_i64()
                    .ok_or_else(|| wrong_type(name, "an integer"))?
            }
            "debugActive" => self.debug_active = boolean(name, &value)?,
            "rotateEnabled" => self.rotate_enabled = boolean(name, &value)?,
            "scrollEnabled" => self.scroll_enabled = boolean(name, &value)?,
            "zoomEnabled" => self.zoom_enabled = boolean(name, &value)?,
            "showsUserLocation" => self.shows_user_location = boolean(name, &value)?,
            "compassIsHidden" => self.compass_is_hidden = boolean(name, &value)?,
            other => {
                return Err(BridgeError::InvalidRequest(format!(
                    "unknown map property '{}'",
                    other
                )))
            }
        }
        Ok(())
    }

    /// Copy of the current property values
    pub fn snapshot(&self) -> MapSettings {
        self.clone()
    }
}

fn wrong_type(name: &str, expected: &str) -> BridgeError {
    BridgeError::InvalidRequest(format!("property '{}' must be {}", name, expected))
}

fn number(name: &str, value: &Value) -> Result<f64> {
    value.as_f64().ok_or_else(|| wrong_type(name, "a number"))
}

fn boolean(name: &str, value: &Value) -> Result<bool> {
    value.as_bool().ok_or_else(|| wrong_type(name, "a boolean"))
}

fn number_field(value: &Value, field: &str) -> Result<f64> {
    value
        .get(field)
        .and_then(Value::as_f64)
        .ok_or_else(|| wrong_type(field, "a number"))
}

fn non_empty_string(name: &str, value: &Value) -> Result<Option<String>> {
    match value {
        Value::Null => Ok(None),
        Value::String(s) if s.is_empty() => Ok(None),
        Value::String(s) => Ok(Some(s.clone())),
        _ => Err(wrong_type(name, "a string")),
    }
}
