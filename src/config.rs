//! Overlay and API configuration.
//!
//! Every tunable has a documented default; a JSON config file only needs the
//! values it changes.

use crate::places::PlaceConfig;
use crate::projection::ProjectionConfig;
use crate::stops::StopConfig;
use crate::surface::{Color, Shadow};
use crate::Result;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Everything that shapes an overlay render.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OverlayConfig {
    pub stops: StopConfig,
    pub projection: ProjectionConfig,
    pub places: PlaceConfig,
    pub style: OverlayStyle,
    pub cache: CacheConfig,
}

impl OverlayConfig {
    pub fn from_json_str(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json_str(&json)
    }
}

/// Colors and sizes of the overlay layers.
///
/// Sizes are in pixels for a canvas whose short side is `reference_size`;
/// other canvases scale them by `min(width, height) / reference_size`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OverlayStyle {
    /// Default: 1080.0
    pub reference_size: f64,

    /// Default: white
    pub route_color: Color,
    /// Default: 6.0
    pub route_width: f64,

    /// Translucent halo under the start point.
    /// Default: green (34, 197, 94) at alpha 90
    pub start_zone_color: Color,
    /// Default: red (239, 68, 68) at alpha 90
    pub end_zone_color: Color,
    /// Default: 40.0
    pub zone_radius: f64,

    /// The end zone is dropped when start and end are closer than this
    /// fraction of the zone diameter.
    /// Default: 0.8
    pub end_suppression_factor: f64,

    /// Default: pink (236, 72, 153)
    pub marker_color: Color,
    /// Default: 16.0
    pub marker_radius: f64,
    /// Default: white
    pub marker_text_color: Color,
    /// Default: 18.0 (bold)
    pub marker_font_size: f64,

    /// Default: white
    pub label_color: Color,
    /// Default: 0.6
    pub label_opacity: f64,
    /// Default: 28.0
    pub label_font_size: f64,
    /// Default: black at alpha 180, offset (2, 2), blur 6
    pub label_shadow: Option<Shadow>,
}

impl Default for OverlayStyle {
    fn default() -> Self {
        Self {
            reference_size: 1080.0,
            route_color: Color::WHITE,
            route_width: 6.0,
            start_zone_color: Color::rgba(34, 197, 94, 90),
            end_zone_color: Color::rgba(239, 68, 68, 90),
            zone_radius: 40.0,
            end_suppression_factor: 0.8,
            marker_color: Color::rgb(236, 72, 153),
            marker_radius: 16.0,
            marker_text_color: Color::WHITE,
            marker_font_size: 18.0,
            label_color: Color::WHITE,
            label_opacity: 0.6,
            label_font_size: 28.0,
            label_shadow: Some(Shadow {
                offset_x: 2.0,
                offset_y: 2.0,
                blur: 6.0,
                color: Color::rgba(0, 0, 0, 180),
            }),
        }
    }
}

impl OverlayStyle {
    /// Size multiplier for a `width` × `height` canvas.
    pub fn scale_for(&self, width: u32, height: u32) -> f64 {
        if self.reference_size <= 0.0 {
            return 1.0;
        }
        width.min(height) as f64 / self.reference_size
    }
}

/// GPS stream cache limits.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Default: 16 streams
    pub capacity: usize,

    /// Seconds a cached stream stays valid; 0 disables expiry.
    /// Default: 172800 (48 hours)
    pub ttl_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            capacity: 16,
            ttl_secs: 48 * 60 * 60,
        }
    }
}

impl CacheConfig {
    pub fn ttl(&self) -> Option<Duration> {
        (self.ttl_secs > 0).then(|| Duration::from_secs(self.ttl_secs))
    }
}

#[cfg(feature = "http")]
pub use api::ApiConfig;

#[cfg(feature = "http")]
mod api {
    use crate::{OverlayError, Result};
    use std::time::Duration;

    pub const DEFAULT_STRAVA_API_URL: &str = "https://www.strava.com/api/v3";
    pub const DEFAULT_NOMINATIM_URL: &str = "https://nominatim.openstreetmap.org";
    const DEFAULT_TIMEOUT_SECS: u64 = 30;

    /// Endpoints and credentials for the HTTP clients, read from the
    /// environment. Only the Strava client needs the access token.
    #[derive(Debug, Clone, PartialEq)]
    pub struct ApiConfig {
        pub strava_access_token: Option<String>,
        pub strava_api_url: String,
        pub nominatim_url: String,
        pub nominatim_user_agent: String,
        pub timeout: Duration,
    }

    impl ApiConfig {
        /// Read `STRAVA_ACCESS_TOKEN`, `STRAVA_API_URL`, `NOMINATIM_URL`,
        /// `NOMINATIM_USER_AGENT` and `HTTP_TIMEOUT_SECS`.
        pub fn from_env() -> Result<Self> {
            Self::from_lookup(|name| std::env::var(name).ok())
        }

        /// Same as [`ApiConfig::from_env`] with a custom variable source.
        pub fn from_lookup<F>(lookup: F) -> Result<Self>
        where
            F: Fn(&str) -> Option<String>,
        {
            let get = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

            let timeout_secs = match get("HTTP_TIMEOUT_SECS") {
                Some(v) => v.trim().parse::<u64>().map_err(|_| OverlayError::Config {
                    message: format!("HTTP_TIMEOUT_SECS is not a number: {}", v),
                })?,
                None => DEFAULT_TIMEOUT_SECS,
            };

            Ok(Self {
                strava_access_token: get("STRAVA_ACCESS_TOKEN"),
                strava_api_url: get("STRAVA_API_URL")
                    .unwrap_or_else(|| DEFAULT_STRAVA_API_URL.to_string()),
                nominatim_url: get("NOMINATIM_URL")
                    .unwrap_or_else(|| DEFAULT_NOMINATIM_URL.to_string()),
                nominatim_user_agent: get("NOMINATIM_USER_AGENT")
                    .unwrap_or_else(default_user_agent),
                timeout: Duration::from_secs(timeout_secs),
            })
        }

        /// The Strava token, or a `Config` error naming the missing variable.
        pub fn strava_token(&self) -> Result<&str> {
            self.strava_access_token
                .as_deref()
                .ok_or_else(|| OverlayError::Config {
                    message: "missing required environment variable STRAVA_ACCESS_TOKEN"
                        .to_string(),
                })
        }
    }

    pub fn default_user_agent() -> String {
        format!("route-overlay/{}", env!("CARGO_PKG_VERSION"))
    }
}
