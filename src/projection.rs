//! Bounding boxes and the lat/lng → canvas projection.
//!
//! The projection is a uniform-scale equirectangular fit ("contain"): one
//! scale factor for both axes, the smaller of the two that fit, with the
//! projected extent centered on the canvas and latitude flipped so north is up.

use crate::{Bounds, GpsPoint, OverlayError, Result};
use serde::{Deserialize, Serialize};

/// Smallest span (degrees) a projected box may have; about 11 m.
///
/// Keeps the scale finite for routes whose points all coincide.
pub const MIN_SPAN_DEGREES: f64 = 0.0001;

/// Padding levels derived from the route's extent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProjectionConfig {
    /// Padding (fraction of the larger span) for the place-search box.
    /// Default: 0.3
    pub query_padding: f64,

    /// Padding (fraction of the larger span) for the drawn box.
    /// Default: 0.1
    pub render_padding: f64,
}

impl Default for ProjectionConfig {
    fn default() -> Self {
        Self {
            query_padding: 0.3,
            render_padding: 0.1,
        }
    }
}

impl ProjectionConfig {
    /// Box used to search for place names: wide, to catch nearby towns.
    pub fn query_bounds(&self, route_bounds: &Bounds) -> Bounds {
        route_bounds
            .with_min_span(MIN_SPAN_DEGREES)
            .padded(self.query_padding)
    }

    /// Box the canvas is fitted to: tight, so the route keeps off the edges.
    pub fn render_bounds(&self, route_bounds: &Bounds) -> Bounds {
        route_bounds
            .with_min_span(MIN_SPAN_DEGREES)
            .padded(self.render_padding)
    }
}

/// A position on the canvas in pixels, origin top-left.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct CanvasPoint {
    pub x: f64,
    pub y: f64,
}

impl CanvasPoint {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    pub fn distance_to(&self, other: &CanvasPoint) -> f64 {
        (self.x - other.x).hypot(self.y - other.y)
    }
}

/// Affine lat/lng → pixel map, valid only for the box it was fitted to.
#[derive(Debug, Clone, PartialEq)]
pub struct Projection {
    bounds: Bounds,
    width: f64,
    height: f64,
    /// Pixels per degree, both axes
    pub scale: f64,
    pub offset_x: f64,
    pub offset_y: f64,
}

impl Projection {
    /// Fit `bounds` into a `width` × `height` canvas.
    pub fn fit(bounds: &Bounds, width: u32, height: u32) -> Result<Self> {
        if width == 0 || height == 0 {
            return Err(OverlayError::InvalidCanvas { width, height });
        }

        let bounds = bounds.with_min_span(MIN_SPAN_DEGREES);
        let w = width as f64;
        let h = height as f64;
        let lng_span = bounds.lng_span();
        let lat_span = bounds.lat_span();

        let scale = (w / lng_span).min(h / lat_span);
        if !scale.is_finite() || scale <= 0.0 {
            return Err(OverlayError::InvalidCanvas { width, height });
        }

        Ok(Self {
            bounds,
            width: w,
            height: h,
            scale,
            offset_x: (w - lng_span * scale) / 2.0,
            offset_y: (h - lat_span * scale) / 2.0,
        })
    }

    /// Project a coordinate onto the canvas.
    pub fn project(&self, point: &GpsPoint) -> CanvasPoint {
        let x = self.offset_x + (point.longitude - self.bounds.min_lng) * self.scale;
        let y = self.height - (self.offset_y + (point.latitude - self.bounds.min_lat) * self.scale);
        CanvasPoint { x, y }
    }

    pub fn project_all(&self, points: &[GpsPoint]) -> Vec<CanvasPoint> {
        points.iter().map(|p| self.project(p)).collect()
    }

    pub fn bounds(&self) -> &Bounds {
        &self.bounds
    }

    pub fn canvas_width(&self) -> f64 {
        self.width
    }

    pub fn canvas_height(&self) -> f64 {
        self.height
    }
}
