use serde::{Deserialize, Serialize};
use std::f64::consts::PI;

/// Web Mercator latitude limit; tiles do not exist beyond it.
const MAX_LATITUDE: f64 = 85.0511287798;

/// Deepest zoom level the slippy tile scheme is evaluated at.
pub const MAX_TILE_ZOOM: u8 = 22;

/// Represents a geographical coordinate with latitude and longitude
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LatLng {
    pub lat: f64,
    pub lng: f64,
}

impl LatLng {
    /// Creates a new LatLng coordinate
    pub fn new(lat: f64, lng: f64) -> Self {
        Self { lat, lng }
    }

    /// Validates that the coordinates are within valid ranges
    pub fn is_valid(&self) -> bool {
        self.lat >= -90.0 && self.lat <= 90.0 && self.lng >= -180.0 && self.lng <= 180.0
    }

    /// Clamps latitude to the range covered by Web Mercator tiles
    pub fn clamp_lat(lat: f64) -> f64 {
        lat.clamp(-MAX_LATITUDE, MAX_LATITUDE)
    }
}

impl Default for LatLng {
    fn default() -> Self {
        Self::new(0.0, 0.0)
    }
}

/// Represents a bounding box of geographical coordinates
///
/// The north-east corner is not required to lie north of the south-west
/// corner; callers own that invariant.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LatLngBounds {
    pub south_west: LatLng,
    pub north_east: LatLng,
}

impl LatLngBounds {
    pub fn new(south_west: LatLng, north_east: LatLng) -> Self {
        Self {
            south_west,
            north_east,
        }
    }

    /// Creates bounds from individual coordinates
    pub fn from_coords(south: f64, west: f64, north: f64, east: f64) -> Self {
        Self::new(LatLng::new(south, west), LatLng::new(north, east))
    }

    /// Both corners lie inside the valid latitude/longitude ranges
    pub fn is_valid(&self) -> bool {
        self.south_west.is_valid() && self.north_east.is_valid()
    }

    /// Checks if the bounds contain a point
    pub fn contains(&self, point: &LatLng) -> bool {
        point.lat >= self.south_west.lat
            && point.lat <= self.north_east.lat
            && point.lng >= self.south_west.lng
            && point.lng <= self.north_east.lng
    }

    /// Gets the center point of the bounds
    pub fn center(&self) -> LatLng {
        LatLng::new(
            (self.south_west.lat + self.north_east.lat) / 2.0,
            (self.south_west.lng + self.north_east.lng) / 2.0,
        )
    }

    /// Number of slippy tiles covering these bounds at a single zoom level
    pub fn tile_count_at(&self, zoom: u8) -> u64 {
        let zoom = zoom.min(MAX_TILE_ZOOM);
        let north_west = LatLng::new(
            self.south_west.lat.max(self.north_east.lat),
            self.south_west.lng.min(self.north_east.lng),
        );
        let south_east = LatLng::new(
            self.south_west.lat.min(self.north_east.lat),
            self.south_west.lng.max(self.north_east.lng),
        );

        let top_left = TileCoord::from_lat_lng(&north_west, zoom);
        let bottom_right = TileCoord::from_lat_lng(&south_east, zoom);

        let columns = u64::from(bottom_right.x.saturating_sub(top_left.x)) + 1;
        let rows = u64::from(bottom_right.y.saturating_sub(top_left.y)) + 1;
        columns * rows
    }

    /// Number of slippy tiles covering these bounds over a zoom range (inclusive)
    pub fn tile_count(&self, min_zoom: u8, max_zoom: u8) -> u64 {
        (min_zoom..=max_zoom.min(MAX_TILE_ZOOM))
            .map(|zoom| self.tile_count_at(zoom))
            .fold(0u64, u64::saturating_add)
    }
}

/// Represents a tile coordinate in the slippy map tile system
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TileCoord {
    pub x: u32,
    pub y: u32,
    pub z: u8,
}

impl TileCoord {
    pub fn new(x: u32, y: u32, z: u8) -> Self {
        Self { x, y, z }
    }

    /// Creates a tile coordinate from a LatLng and zoom level
    ///
    /// Points on the antimeridian or the Mercator edge land on the last
    /// valid tile instead of one past it.
    pub fn from_lat_lng(lat_lng: &LatLng, zoom: u8) -> Self {
        let lat_rad = LatLng::clamp_lat(lat_lng.lat).to_radians();
        let n = 2_f64.powi(zoom as i32);
        let max_index = (n as u32).saturating_sub(1);

        let x = ((lat_lng.lng.clamp(-180.0, 180.0) + 180.0) / 360.0 * n).floor() as u32;
        let y = ((1.0 - lat_rad.tan().asinh() / PI) / 2.0 * n).floor() as u32;

        Self::new(x.min(max_index), y.min(max_index), zoom)
    }

    /// Converts tile coordinate to LatLng (northwest corner)
    pub fn to_lat_lng(&self) -> LatLng {
        let n = 2_f64.powi(self.z as i32);
        let lng = self.x as f64 / n * 360.0 - 180.0;
        let lat_rad = (PI * (1.0 - 2.0 * self.y as f64 / n)).sinh().atan();
        let lat = lat_rad.to_degrees();

        LatLng::new(lat, lng)
    }

    /// Checks if the tile is valid for the given zoom level
    pub fn is_valid(&self) -> bool {
        let max_coord = 2_u64.pow(self.z as u32);
        u64::from(self.x) < max_coord && u64::from(self.y) < max_coord
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lat_lng_creation() {
        let coord = LatLng::new(40.7128, -74.0060);
        assert_eq!(coord.lat, 40.7128);
        assert_eq!(coord.lng, -74.0060);
        assert!(coord.is_valid());
        assert!(!LatLng::new(91.0, 0.0).is_valid());
        assert!(!LatLng::new(0.0, -180.5).is_valid());
    }

    #[test]
    fn test_tile_coord_conversion() {
        let lat_lng = LatLng::new(40.7128, -74.0060);
        let tile = TileCoord::from_lat_lng(&lat_lng, 10);
        let back_to_lat_lng = tile.to_lat_lng();

        // Should be reasonably close (within tile boundaries)
        assert!((back_to_lat_lng.lat - lat_lng.lat).abs() < 1.0);
        assert!((back_to_lat_lng.lng - lat_lng.lng).abs() < 1.0);
        assert!(tile.is_valid());
    }

    #[test]
    fn test_tile_coord_edges_stay_in_range() {
        let corner = TileCoord::from_lat_lng(&LatLng::new(-90.0, 180.0), 3);
        assert_eq!(corner, TileCoord::new(7, 7, 3));
        assert!(corner.is_valid());
    }

    #[test]
    fn test_bounds_contains() {
        let bounds = LatLngBounds::from_coords(40.0, -75.0, 41.0, -73.0);
        let point_inside = LatLng::new(40.5, -74.0);
        let point_outside = LatLng::new(42.0, -74.0);

        assert!(bounds.contains(&point_inside));
        assert!(!bounds.contains(&point_outside));
    }

    #[test]
    fn test_tile_count() {
        let world = LatLngBounds::from_coords(-85.0, -180.0, 85.0, 180.0);
        assert_eq!(world.tile_count_at(0), 1);
        assert_eq!(world.tile_count_at(1), 4);
        assert_eq!(world.tile_count(0, 2), 1 + 4 + 16);

        // Swapped corners cover the same tiles
        let swapped = LatLngBounds::new(world.north_east, world.south_west);
        assert_eq!(swapped.tile_count(0, 2), 21);
    }
}
