//! # Route Overlay
//!
//! Route-map overlays for activity posts: decode an activity's polyline, find
//! where the athlete stopped, project everything onto a canvas and draw the
//! route with numbered markers and nearby place names.
//!
//! This library provides:
//! - Google polyline decoding/encoding
//! - Stop (dwell) detection from GPS + time streams
//! - Aspect-preserving projection of coordinates onto a pixel canvas
//! - Place-name querying, prioritization and collision-free label layout
//! - A renderer that composites all layers onto any [`Surface`]
//!
//! ## Features
//!
//! - **`http`** (default) - Strava activity/stream client and Nominatim place search
//! - **`cli`** - The `route-overlay` command line tool
//! - **`full`** - Enable all features
//!
//! ## Quick Start
//!
//! ```rust
//! use route_overlay::{decode_polyline, detect_stops, GpsStream, StopConfig};
//!
//! let route = decode_polyline("_p~iF~ps|U_ulLnnqC_mqNvxq`@").unwrap();
//! assert_eq!(route.len(), 3);
//!
//! let stream = GpsStream::new(route.clone(), vec![0.0, 60.0, 120.0], None, None).unwrap();
//! let stops = detect_stops(&stream, &StopConfig::default());
//! assert!(stops.is_empty());
//! ```

use serde::{Deserialize, Deserializer, Serialize};

// Unified error handling
pub mod error;
pub use error::{OptionExt, OverlayError, Result};

// Geographic utilities (distance, bounds, center calculations)
pub mod geo_utils;

// Google polyline codec
pub mod polyline;
pub use self::polyline::{decode_polyline, encode_polyline};

// Stop detection from GPS + time streams
pub mod stops;
pub use stops::{detect_stops, Stop, StopConfig};

// Bounding boxes and canvas projection
pub mod projection;
pub use projection::{CanvasPoint, Projection, ProjectionConfig};

// Place search, prioritization and label layout
pub mod places;
pub use places::{
    find_places, layout_labels, PlaceConfig, PlaceKind, PlaceLabel, PlaceSearch, PlacedLabel,
    RawPlace, TextBox,
};

// Drawing surfaces
pub mod surface;
pub use surface::{
    Color, DrawCommand, FontSpec, RecordingSurface, Shadow, Stroke, Surface, TextMeasure,
    TextMetrics, TextStyle,
};

pub mod raster;
pub use raster::RasterSurface;

// LRU + TTL cache used for GPS streams
pub mod lru_cache;

// Overlay configuration
pub mod config;
pub use config::{CacheConfig, OverlayConfig, OverlayStyle};

// The renderer
pub mod render;
pub use render::{
    compose_slot, CanvasSlot, LoadingCallback, RenderGate, RenderOutcome, RenderSummary,
    RouteOverlayRenderer, SkipReason, SlotPainter, StreamCache, StreamProvider,
};

// HTTP clients for Strava and Nominatim
#[cfg(feature = "http")]
pub mod http;

#[cfg(feature = "http")]
pub use http::{NominatimClient, StravaClient};

#[cfg(feature = "http")]
pub use config::ApiConfig;

// ============================================================================
// Core Types
// ============================================================================

/// A GPS coordinate with latitude and longitude.
///
/// # Example
/// ```
/// use route_overlay::GpsPoint;
/// let point = GpsPoint::new(51.5074, -0.1278); // London
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GpsPoint {
    pub latitude: f64,
    pub longitude: f64,
}

impl GpsPoint {
    /// Create a new GPS point.
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
        }
    }

    /// Check if the point has valid coordinates.
    pub fn is_valid(&self) -> bool {
        self.latitude.is_finite()
            && self.longitude.is_finite()
            && self.latitude >= -90.0
            && self.latitude <= 90.0
            && self.longitude >= -180.0
            && self.longitude <= 180.0
    }
}

/// Bounding box for a route.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Bounds {
    pub min_lat: f64,
    pub max_lat: f64,
    pub min_lng: f64,
    pub max_lng: f64,
}

impl Bounds {
    /// Create bounds from GPS points.
    pub fn from_points(points: &[GpsPoint]) -> Option<Self> {
        if points.is_empty() {
            return None;
        }
        let mut min_lat = f64::MAX;
        let mut max_lat = f64::MIN;
        let mut min_lng = f64::MAX;
        let mut max_lng = f64::MIN;

        for p in points {
            min_lat = min_lat.min(p.latitude);
            max_lat = max_lat.max(p.latitude);
            min_lng = min_lng.min(p.longitude);
            max_lng = max_lng.max(p.longitude);
        }

        Some(Self {
            min_lat,
            max_lat,
            min_lng,
            max_lng,
        })
    }

    /// Get the center point of the bounds.
    pub fn center(&self) -> GpsPoint {
        GpsPoint::new(
            (self.min_lat + self.max_lat) / 2.0,
            (self.min_lng + self.max_lng) / 2.0,
        )
    }

    pub fn lat_span(&self) -> f64 {
        self.max_lat - self.min_lat
    }

    pub fn lng_span(&self) -> f64 {
        self.max_lng - self.min_lng
    }

    /// Grow the box on every side by `fraction` of its larger span.
    ///
    /// Both pad levels of a render (wide for place queries, tight for drawing)
    /// are derived from the same base range, so the query box always contains
    /// the render box.
    pub fn padded(&self, fraction: f64) -> Self {
        let pad = self.lat_span().max(self.lng_span()) * fraction;
        Self {
            min_lat: self.min_lat - pad,
            max_lat: self.max_lat + pad,
            min_lng: self.min_lng - pad,
            max_lng: self.max_lng + pad,
        }
    }

    /// Widen any axis narrower than `min_span` symmetrically around the center.
    pub fn with_min_span(&self, min_span: f64) -> Self {
        let center = self.center();
        let half_lat = self.lat_span().max(min_span) / 2.0;
        let half_lng = self.lng_span().max(min_span) / 2.0;
        Self {
            min_lat: center.latitude - half_lat,
            max_lat: center.latitude + half_lat,
            min_lng: center.longitude - half_lng,
            max_lng: center.longitude + half_lng,
        }
    }

    /// Check if a point lies inside the box (edges included).
    pub fn contains(&self, point: &GpsPoint) -> bool {
        point.latitude >= self.min_lat
            && point.latitude <= self.max_lat
            && point.longitude >= self.min_lng
            && point.longitude <= self.max_lng
    }
}

// ============================================================================
// Activity Types
// ============================================================================

/// An activity record as returned by the Strava API.
///
/// Only the fields the overlay needs are kept; unknown fields are ignored.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Activity {
    #[serde(deserialize_with = "deserialize_id")]
    pub id: String,
    #[serde(default)]
    pub name: String,
    /// Sport type (e.g., "Ride", "Run")
    #[serde(default, alias = "type")]
    pub sport_type: String,
    /// Distance in meters
    #[serde(default)]
    pub distance: f64,
    /// Moving time in seconds
    #[serde(default)]
    pub moving_time: u32,
    /// Elapsed time in seconds
    #[serde(default)]
    pub elapsed_time: u32,
    /// Total elevation gain in meters
    #[serde(default)]
    pub total_elevation_gain: f64,
    #[serde(default)]
    pub map: Option<ActivityMap>,
}

/// Map block of an activity.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ActivityMap {
    #[serde(default)]
    pub summary_polyline: Option<String>,
    /// Full-resolution polyline, only present on detailed activity responses
    #[serde(default)]
    pub polyline: Option<String>,
}

impl Activity {
    /// Create an activity carrying only an id and a summary polyline.
    pub fn with_polyline(id: impl Into<String>, summary_polyline: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            map: Some(ActivityMap {
                summary_polyline: Some(summary_polyline.into()),
                polyline: None,
            }),
            ..Self::default()
        }
    }

    /// The encoded route to draw: the summary polyline, falling back to the
    /// detailed one. Empty strings count as absent.
    pub fn route_polyline(&self) -> Option<&str> {
        let map = self.map.as_ref()?;
        map.summary_polyline
            .as_deref()
            .filter(|s| !s.is_empty())
            .or_else(|| map.polyline.as_deref().filter(|s| !s.is_empty()))
    }
}

/// Strava ids are numbers; other providers use strings.
fn deserialize_id<'de, D>(deserializer: D) -> std::result::Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum IdRepr {
        Number(u64),
        Text(String),
    }

    Ok(match IdRepr::deserialize(deserializer)? {
        IdRepr::Number(n) => n.to_string(),
        IdRepr::Text(s) => s,
    })
}

// ============================================================================
// GPS Streams
// ============================================================================

/// Time-ordered GPS samples for one activity.
///
/// All present arrays have the same length and timestamps never decrease;
/// both are checked on construction so downstream code can index freely.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawStreams", into = "RawStreams")]
pub struct GpsStream {
    coordinates: Vec<GpsPoint>,
    timestamps: Vec<f64>,
    distances: Option<Vec<f64>>,
    altitudes: Option<Vec<f64>>,
}

/// Wire shape of a stream bundle: parallel arrays, coordinates as `[lat, lng]`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawStreams {
    pub coordinates: Vec<[f64; 2]>,
    pub timestamps: Vec<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub distances: Option<Vec<f64>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub altitudes: Option<Vec<f64>>,
}

impl GpsStream {
    /// Build a stream, validating array lengths and timestamp order.
    pub fn new(
        coordinates: Vec<GpsPoint>,
        timestamps: Vec<f64>,
        distances: Option<Vec<f64>>,
        altitudes: Option<Vec<f64>>,
    ) -> Result<Self> {
        let len = coordinates.len();
        check_len("timestamps", timestamps.len(), len)?;
        if let Some(d) = &distances {
            check_len("distances", d.len(), len)?;
        }
        if let Some(a) = &altitudes {
            check_len("altitudes", a.len(), len)?;
        }
        if let Some(i) = timestamps.windows(2).position(|w| !(w[1] >= w[0])) {
            return Err(OverlayError::InvalidStream {
                message: format!("timestamps decrease at index {}", i + 1),
            });
        }

        Ok(Self {
            coordinates,
            timestamps,
            distances,
            altitudes,
        })
    }

    /// Parse the processed stream bundle JSON.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let raw: RawStreams = serde_json::from_str(json)?;
        Self::try_from(raw)
    }

    pub fn len(&self) -> usize {
        self.coordinates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.coordinates.is_empty()
    }

    pub fn coordinates(&self) -> &[GpsPoint] {
        &self.coordinates
    }

    /// Seconds relative to the activity start.
    pub fn timestamps(&self) -> &[f64] {
        &self.timestamps
    }

    /// Cumulative distance in meters, if recorded.
    pub fn distances(&self) -> Option<&[f64]> {
        self.distances.as_deref()
    }

    /// Altitude in meters, if recorded.
    pub fn altitudes(&self) -> Option<&[f64]> {
        self.altitudes.as_deref()
    }

    /// Offset of the first sample (usually 0).
    pub fn start_offset(&self) -> Option<f64> {
        self.timestamps.first().copied()
    }
}

fn check_len(name: &str, actual: usize, expected: usize) -> Result<()> {
    if actual != expected {
        return Err(OverlayError::InvalidStream {
            message: format!("{} has {} entries, coordinates has {}", name, actual, expected),
        });
    }
    Ok(())
}

impl TryFrom<RawStreams> for GpsStream {
    type Error = OverlayError;

    fn try_from(raw: RawStreams) -> Result<Self> {
        let coordinates = raw
            .coordinates
            .into_iter()
            .map(|[lat, lng]| GpsPoint::new(lat, lng))
            .collect();
        Self::new(coordinates, raw.timestamps, raw.distances, raw.altitudes)
    }
}

impl From<GpsStream> for RawStreams {
    fn from(stream: GpsStream) -> Self {
        Self {
            coordinates: stream
                .coordinates
                .iter()
                .map(|p| [p.latitude, p.longitude])
                .collect(),
            timestamps: stream.timestamps,
            distances: stream.distances,
            altitudes: stream.altitudes,
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
