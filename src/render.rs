//! # Route Overlay Renderer
//!
//! Composites one activity's route onto a [`Surface`], back to front:
//!
//! 1. place labels, translucent with a drop shadow
//! 2. start (green) and end (red) zone circles
//! 3. the route polyline
//! 4. numbered markers: start "1", stops from "2", end last
//!
//! The end zone and end marker are left out when the route finishes close to
//! where it started, so a loop shows one halo instead of two stacked ones.
//!
//! A render is guarded by [`RenderGate`]: a render requested while another is
//! in flight is skipped, not queued. Drawing is not rolled back when a later
//! step fails; whatever was drawn stays.

use crate::config::{CacheConfig, OverlayConfig, OverlayStyle};
use crate::geo_utils::compute_bounds;
use crate::lru_cache::LruCache;
use crate::places::{find_places, layout_labels, PlaceSearch, PlacedLabel};
use crate::projection::{CanvasPoint, Projection};
use crate::stops::{detect_stops, Stop};
use crate::surface::{Color, FontSpec, Shadow, Stroke, Surface, TextStyle};
use crate::{decode_polyline, Activity, GpsPoint, GpsStream, OptionExt, Result};
use futures::future::BoxFuture;
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

/// Called with `true` when a render starts and `false` when it ends.
pub type LoadingCallback = Arc<dyn Fn(bool) + Send + Sync>;

// ============================================================================
// Stream Provider & Cache
// ============================================================================

/// Source of an activity's GPS streams. `Ok(None)` means the activity has
/// none (manual entries, trainer rides).
pub trait StreamProvider: Send + Sync {
    fn fetch_streams<'a>(
        &'a self,
        activity_id: &'a str,
    ) -> BoxFuture<'a, Result<Option<GpsStream>>>;
}

/// Streams of recently rendered activities, keyed by activity id.
pub struct StreamCache {
    inner: Mutex<LruCache<String, Arc<GpsStream>>>,
}

impl StreamCache {
    pub fn new(config: &CacheConfig) -> Self {
        Self {
            inner: Mutex::new(LruCache::with_ttl(config.capacity, config.ttl())),
        }
    }

    fn lock(&self) -> MutexGuard<'_, LruCache<String, Arc<GpsStream>>> {
        // A panic mid-insert leaves a consistent map behind
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn get(&self, activity_id: &str) -> Option<Arc<GpsStream>> {
        self.lock().get_cloned(&activity_id.to_string())
    }

    pub fn insert(&self, activity_id: &str, stream: GpsStream) -> Arc<GpsStream> {
        let stream = Arc::new(stream);
        self.lock().insert(activity_id.to_string(), Arc::clone(&stream));
        stream
    }

    /// Switch to a new activity: streams cached for any other id are dropped.
    pub fn select_activity(&self, activity_id: &str) {
        let mut cache = self.lock();
        let before = cache.len();
        cache.retain(|id| id == activity_id);
        let dropped = before - cache.len();
        if dropped > 0 {
            debug!("[RouteOverlay] Dropped {} cached streams", dropped);
        }
    }

    pub fn invalidate(&self, activity_id: &str) {
        self.lock().invalidate(&activity_id.to_string());
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn clear(&self) {
        self.lock().clear();
    }
}

impl Default for StreamCache {
    fn default() -> Self {
        Self::new(&CacheConfig::default())
    }
}

// ============================================================================
// Render Gate
// ============================================================================

const IDLE: u8 = 0;
const RENDERING: u8 = 1;

/// Single-flight guard: at most one render at a time.
#[derive(Debug, Default)]
pub struct RenderGate {
    state: AtomicU8,
}

impl RenderGate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_busy(&self) -> bool {
        self.state.load(Ordering::Acquire) == RENDERING
    }

    /// Move Idle → Rendering. Returns `None` if a render is already running.
    ///
    /// The loading callback is told `true` now and `false` when the guard
    /// drops, whatever path the render leaves by.
    pub fn try_acquire(&self, on_loading: Option<LoadingCallback>) -> Option<RenderGuard<'_>> {
        self.state
            .compare_exchange(IDLE, RENDERING, Ordering::AcqRel, Ordering::Acquire)
            .ok()?;

        if let Some(cb) = &on_loading {
            cb(true);
        }
        Some(RenderGuard {
            gate: self,
            on_loading,
        })
    }
}

/// Releases the gate on drop.
pub struct RenderGuard<'a> {
    gate: &'a RenderGate,
    on_loading: Option<LoadingCallback>,
}

impl Drop for RenderGuard<'_> {
    fn drop(&mut self) {
        self.gate.state.store(IDLE, Ordering::Release);
        if let Some(cb) = &self.on_loading {
            cb(false);
        }
    }
}

// ============================================================================
// Outcomes
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SkipReason {
    /// Another render was in flight
    Busy,
    /// No polyline, an undecodable one, or fewer than two points
    NoRoute,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RenderSummary {
    pub route_points: usize,
    pub stops: usize,
    pub labels_placed: usize,
    pub end_marker_suppressed: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RenderOutcome {
    Drawn(RenderSummary),
    Skipped(SkipReason),
}

impl RenderOutcome {
    pub fn is_drawn(&self) -> bool {
        matches!(self, RenderOutcome::Drawn(_))
    }
}

// ============================================================================
// Renderer
// ============================================================================

const MIN_ROUTE_POINTS: usize = 2;

pub struct RouteOverlayRenderer {
    config: OverlayConfig,
    place_search: Option<Arc<dyn PlaceSearch>>,
    stream_provider: Option<Arc<dyn StreamProvider>>,
    cache: StreamCache,
    gate: RenderGate,
    on_loading: Option<LoadingCallback>,
}

impl RouteOverlayRenderer {
    /// Renderer without place labels or stream fetching; add them with the
    /// `with_*` builders.
    pub fn new(config: OverlayConfig) -> Self {
        let cache = StreamCache::new(&config.cache);
        Self {
            config,
            place_search: None,
            stream_provider: None,
            cache,
            gate: RenderGate::new(),
            on_loading: None,
        }
    }

    pub fn with_place_search(mut self, search: Arc<dyn PlaceSearch>) -> Self {
        self.place_search = Some(search);
        self
    }

    pub fn with_stream_provider(mut self, provider: Arc<dyn StreamProvider>) -> Self {
        self.stream_provider = Some(provider);
        self
    }

    pub fn with_loading_callback(mut self, callback: LoadingCallback) -> Self {
        self.on_loading = Some(callback);
        self
    }

    pub fn config(&self) -> &OverlayConfig {
        &self.config
    }

    pub fn cache(&self) -> &StreamCache {
        &self.cache
    }

    pub fn is_rendering(&self) -> bool {
        self.gate.is_busy()
    }

    /// The user switched to `activity_id`: cached streams of every other
    /// activity are discarded. Renders themselves never evict, so callers
    /// that flip between activities without selecting keep up to
    /// `CacheConfig::capacity` streams.
    pub fn select_activity(&self, activity_id: &str) {
        self.cache.select_activity(activity_id);
    }

    /// Draw the overlay for `activity` onto `surface`.
    ///
    /// `stream` overrides the cache and the stream provider. Without any
    /// stream the route is drawn with start and end markers only.
    pub async fn render<S: Surface + ?Sized>(
        &self,
        surface: &mut S,
        activity: &Activity,
        stream: Option<&GpsStream>,
    ) -> Result<RenderOutcome> {
        let Some(_guard) = self.gate.try_acquire(self.on_loading.clone()) else {
            info!(
                "[RouteOverlay] Render of {} skipped, another render is running",
                activity.id
            );
            return Ok(RenderOutcome::Skipped(SkipReason::Busy));
        };

        let Some(route) = decode_route(activity) else {
            return Ok(RenderOutcome::Skipped(SkipReason::NoRoute));
        };

        let stops = match stream {
            Some(stream) => detect_stops(stream, &self.config.stops),
            None => match self.resolve_stream(&activity.id).await {
                Some(stream) => detect_stops(&stream, &self.config.stops),
                None => Vec::new(),
            },
        };

        let route_bounds = compute_bounds(&route)
            .ok_or_insufficient_points(route.len(), MIN_ROUTE_POINTS)?;
        let projection = Projection::fit(
            &self.config.projection.render_bounds(&route_bounds),
            surface.width(),
            surface.height(),
        )?;

        let style = &self.config.style;
        let scale = style.scale_for(surface.width(), surface.height());

        let labels = match &self.place_search {
            Some(search) => {
                let query_bounds = self.config.projection.query_bounds(&route_bounds);
                let candidates =
                    find_places(search.as_ref(), &query_bounds, &self.config.places).await;
                layout_labels(
                    &candidates,
                    &projection,
                    &*surface,
                    &label_style(style, scale),
                    self.config.places.label_padding * scale,
                )
            }
            None => Vec::new(),
        };

        let summary = draw_layers(surface, style, scale, &projection, &route, &stops, &labels);
        info!(
            "[RouteOverlay] Drew {}: {} points, {} stops, {} labels{}",
            activity.id,
            summary.route_points,
            summary.stops,
            summary.labels_placed,
            if summary.end_marker_suppressed {
                ", end merged into start"
            } else {
                ""
            }
        );

        Ok(RenderOutcome::Drawn(summary))
    }

    /// Cached stream, else one from the provider (which is then cached).
    /// Provider failures only cost the stop markers.
    async fn resolve_stream(&self, activity_id: &str) -> Option<Arc<GpsStream>> {
        if let Some(stream) = self.cache.get(activity_id) {
            debug!("[RouteOverlay] Stream cache hit for {}", activity_id);
            return Some(stream);
        }

        let provider = self.stream_provider.as_ref()?;
        match provider.fetch_streams(activity_id).await {
            Ok(Some(stream)) => Some(self.cache.insert(activity_id, stream)),
            Ok(None) => {
                debug!("[RouteOverlay] Activity {} has no streams", activity_id);
                None
            }
            Err(e) => {
                warn!(
                    "[RouteOverlay] Stream fetch for {} failed, drawing without stops: {}",
                    activity_id, e
                );
                None
            }
        }
    }
}

/// Route points, or `None` when there is nothing drawable.
fn decode_route(activity: &Activity) -> Option<Vec<GpsPoint>> {
    let Some(encoded) = activity.route_polyline() else {
        debug!("[RouteOverlay] Activity {} has no polyline", activity.id);
        return None;
    };

    match decode_polyline(encoded) {
        Ok(points) if points.len() >= MIN_ROUTE_POINTS => Some(points),
        Ok(points) => {
            debug!(
                "[RouteOverlay] Activity {} route has {} points, skipping",
                activity.id,
                points.len()
            );
            None
        }
        Err(e) => {
            warn!("[RouteOverlay] Activity {}: {}", activity.id, e);
            None
        }
    }
}

fn label_style(style: &OverlayStyle, scale: f64) -> TextStyle {
    TextStyle {
        font: FontSpec::new(style.label_font_size * scale),
        color: style.label_color.with_opacity(style.label_opacity),
        shadow: style.label_shadow.map(|s| Shadow {
            offset_x: s.offset_x * scale,
            offset_y: s.offset_y * scale,
            blur: s.blur * scale,
            color: s.color,
        }),
    }
}

fn draw_layers<S: Surface + ?Sized>(
    surface: &mut S,
    style: &OverlayStyle,
    scale: f64,
    projection: &Projection,
    route: &[GpsPoint],
    stops: &[Stop],
    labels: &[PlacedLabel],
) -> RenderSummary {
    let label_text = label_style(style, scale);
    for placed in labels {
        surface.fill_text(&placed.text, placed.origin, &label_text);
    }

    let pixels = projection.project_all(route);
    let (start, end) = match (pixels.first(), pixels.last()) {
        (Some(&start), Some(&end)) => (start, end),
        _ => {
            return RenderSummary {
                route_points: 0,
                stops: 0,
                labels_placed: labels.len(),
                end_marker_suppressed: false,
            }
        }
    };

    let zone_radius = style.zone_radius * scale;
    let end_suppressed =
        start.distance_to(&end) < style.end_suppression_factor * 2.0 * zone_radius;
    surface.fill_circle(start, zone_radius, style.start_zone_color);
    if !end_suppressed {
        surface.fill_circle(end, zone_radius, style.end_zone_color);
    }

    surface.stroke_path(
        &pixels,
        &Stroke {
            width: style.route_width * scale,
            color: style.route_color,
        },
    );

    let marker = MarkerStyle::new(style, scale);
    marker.draw(surface, start, 1);
    for (i, stop) in stops.iter().enumerate() {
        marker.draw(surface, projection.project(&stop.point), i + 2);
    }
    if !end_suppressed {
        marker.draw(surface, end, stops.len() + 2);
    }

    RenderSummary {
        route_points: route.len(),
        stops: stops.len(),
        labels_placed: labels.len(),
        end_marker_suppressed: end_suppressed,
    }
}

struct MarkerStyle {
    radius: f64,
    fill: Color,
    text: TextStyle,
}

impl MarkerStyle {
    fn new(style: &OverlayStyle, scale: f64) -> Self {
        Self {
            radius: style.marker_radius * scale,
            fill: style.marker_color,
            text: TextStyle {
                font: FontSpec::bold(style.marker_font_size * scale),
                color: style.marker_text_color,
                shadow: None,
            },
        }
    }

    /// Disc with `number` centered on the measured glyph extent, so digits of
    /// different widths and heights sit in the middle.
    fn draw<S: Surface + ?Sized>(&self, surface: &mut S, center: CanvasPoint, number: usize) {
        surface.fill_circle(center, self.radius, self.fill);

        let text = number.to_string();
        let metrics = surface.measure_text(&text, &self.text.font);
        let origin = CanvasPoint::new(
            center.x - metrics.width / 2.0,
            center.y + (metrics.ascent - metrics.descent) / 2.0,
        );
        surface.fill_text(&text, origin, &self.text);
    }
}

// ============================================================================
// Canvas Slots
// ============================================================================

/// The canvases of a post, in display order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CanvasSlot {
    Title,
    RouteOverlay,
    Gallery,
}

impl CanvasSlot {
    pub const ALL: [CanvasSlot; 3] = [
        CanvasSlot::Title,
        CanvasSlot::RouteOverlay,
        CanvasSlot::Gallery,
    ];

    /// Slot shown at `index` in a post.
    pub fn from_index(index: usize) -> Option<Self> {
        Self::ALL.get(index).copied()
    }
}

/// Draws the slots that are not route overlays (title card, photo gallery).
pub trait SlotPainter {
    fn paint(&self, slot: CanvasSlot, surface: &mut dyn Surface, activity: &Activity)
        -> Result<()>;
}

/// Fill one canvas slot. Returns the render outcome for the route overlay
/// slot and `None` for painter-drawn slots.
pub async fn compose_slot(
    slot: CanvasSlot,
    surface: &mut dyn Surface,
    activity: &Activity,
    stream: Option<&GpsStream>,
    renderer: &RouteOverlayRenderer,
    painter: &dyn SlotPainter,
) -> Result<Option<RenderOutcome>> {
    match slot {
        CanvasSlot::RouteOverlay => renderer.render(surface, activity, stream).await.map(Some),
        CanvasSlot::Title | CanvasSlot::Gallery => {
            painter.paint(slot, surface, activity)?;
            Ok(None)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::surface::{DrawCommand, RecordingSurface};
    use crate::{encode_polyline, OverlayError};
    use std::sync::atomic::AtomicUsize;

    fn activity(points: &[GpsPoint]) -> Activity {
        Activity::with_polyline("42", encode_polyline(points))
    }

    fn line_route() -> Vec<GpsPoint> {
        (0..20)
            .map(|i| GpsPoint::new(45.0 + i as f64 * 0.001, 7.0 + i as f64 * 0.001))
            .collect()
    }

    fn circles(surface: &RecordingSurface) -> Vec<(CanvasPoint, Color)> {
        surface
            .commands()
            .iter()
            .filter_map(|c| match c {
                DrawCommand::Circle { center, color, .. } => Some((*center, *color)),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_gate_single_flight() {
        let gate = RenderGate::new();
        let guard = gate.try_acquire(None);
        assert!(guard.is_some());
        assert!(gate.is_busy());
        assert!(gate.try_acquire(None).is_none());

        drop(guard);
        assert!(!gate.is_busy());
        assert!(gate.try_acquire(None).is_some());
    }

    #[test]
    fn test_gate_reports_loading() {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&calls);
        let callback: LoadingCallback = Arc::new(move |on| sink.lock().unwrap().push(on));

        let gate = RenderGate::new();
        drop(gate.try_acquire(Some(callback)));
        assert_eq!(*calls.lock().unwrap(), vec![true, false]);
    }

    #[test]
    fn test_cache_select_activity_drops_others() {
        let cache = StreamCache::default();
        let stream = GpsStream::new(vec![GpsPoint::new(1.0, 1.0)], vec![0.0], None, None).unwrap();
        cache.insert("a", stream.clone());
        cache.insert("b", stream);

        cache.select_activity("b");
        assert!(cache.get("a").is_none());
        assert!(cache.get("b").is_some());
        assert_eq!(cache.len(), 1);
    }

    #[tokio::test]
    async fn test_no_polyline_skips_without_drawing() {
        let renderer = RouteOverlayRenderer::new(OverlayConfig::default());
        let mut surface = RecordingSurface::new(1080, 1080);

        let outcome = renderer
            .render(&mut surface, &Activity::default(), None)
            .await
            .unwrap();
        assert_eq!(outcome, RenderOutcome::Skipped(SkipReason::NoRoute));

        let single = activity(&[GpsPoint::new(45.0, 7.0)]);
        let outcome = renderer.render(&mut surface, &single, None).await.unwrap();
        assert_eq!(outcome, RenderOutcome::Skipped(SkipReason::NoRoute));

        let garbage = Activity::with_polyline("1", "_p~iF");
        let outcome = renderer.render(&mut surface, &garbage, None).await.unwrap();
        assert_eq!(outcome, RenderOutcome::Skipped(SkipReason::NoRoute));

        let off_globe = activity(&[GpsPoint::new(45.0, 7.0), GpsPoint::new(200.0, 7.0)]);
        let outcome = renderer.render(&mut surface, &off_globe, None).await.unwrap();
        assert_eq!(outcome, RenderOutcome::Skipped(SkipReason::NoRoute));

        assert!(surface.commands().is_empty());
        assert!(!renderer.is_rendering());
    }

    #[tokio::test]
    async fn test_layer_order() {
        let renderer = RouteOverlayRenderer::new(OverlayConfig::default());
        let mut surface = RecordingSurface::new(1080, 1080);
        renderer
            .render(&mut surface, &activity(&line_route()), None)
            .await
            .unwrap();

        let kinds: Vec<&str> = surface
            .commands()
            .iter()
            .map(|c| match c {
                DrawCommand::Circle { .. } => "circle",
                DrawCommand::Path { .. } => "path",
                DrawCommand::Text { .. } => "text",
            })
            .collect();
        // Zones, route, then start and end markers with their numerals
        assert_eq!(
            kinds,
            vec!["circle", "circle", "path", "circle", "text", "circle", "text"]
        );
        assert_eq!(surface.texts(), vec!["1", "2"]);
    }

    #[tokio::test]
    async fn test_loop_suppresses_end() {
        let mut route = line_route();
        route.extend(line_route().into_iter().rev());
        let renderer = RouteOverlayRenderer::new(OverlayConfig::default());
        let mut surface = RecordingSurface::new(1080, 1080);

        let outcome = renderer
            .render(&mut surface, &activity(&route), None)
            .await
            .unwrap();
        let RenderOutcome::Drawn(summary) = outcome else {
            panic!("expected a drawn overlay");
        };
        assert!(summary.end_marker_suppressed);

        let style = OverlayStyle::default();
        let colors: Vec<Color> = circles(&surface).into_iter().map(|(_, c)| c).collect();
        assert!(colors.contains(&style.start_zone_color));
        assert!(!colors.contains(&style.end_zone_color));
        assert_eq!(surface.texts(), vec!["1"]);
    }

    /// Square loop back to `end_offset` degrees east of the start. The box
    /// stays 0.01° wide whatever the offset, so the projection is fixed.
    fn open_loop(end_offset: f64) -> Vec<GpsPoint> {
        vec![
            GpsPoint::new(45.0, 7.0),
            GpsPoint::new(45.01, 7.0),
            GpsPoint::new(45.01, 7.01),
            GpsPoint::new(45.0, 7.01),
            GpsPoint::new(45.0, 7.0 + end_offset),
        ]
    }

    async fn end_gap_and_suppression(end_offset: f64) -> (f64, bool) {
        let config = OverlayConfig::default();
        let route = decode_polyline(&encode_polyline(&open_loop(end_offset))).unwrap();
        let bounds = compute_bounds(&route).unwrap();
        let projection =
            Projection::fit(&config.projection.render_bounds(&bounds), 1080, 1080).unwrap();
        let gap = projection
            .project(&route[0])
            .distance_to(&projection.project(&route[route.len() - 1]));

        let renderer = RouteOverlayRenderer::new(config);
        let mut surface = RecordingSurface::new(1080, 1080);
        let outcome = renderer
            .render(&mut surface, &activity(&route), None)
            .await
            .unwrap();
        let RenderOutcome::Drawn(summary) = outcome else {
            panic!("expected a drawn overlay");
        };
        (gap, summary.end_marker_suppressed)
    }

    #[tokio::test]
    async fn test_end_suppression_threshold() {
        let style = OverlayStyle::default();
        let threshold = style.end_suppression_factor * 2.0 * style.zone_radius;

        let (gap, suppressed) = end_gap_and_suppression(0.00067).await;
        assert!(gap < threshold && gap > threshold - 8.0, "gap {}", gap);
        assert!(suppressed);

        let (gap, suppressed) = end_gap_and_suppression(0.00076).await;
        assert!(gap > threshold && gap < threshold + 8.0, "gap {}", gap);
        assert!(!suppressed);
    }

    #[tokio::test]
    async fn test_cache_keeps_streams_until_selection() {
        let stream = GpsStream::new(
            line_route(),
            (0..20).map(|i| i as f64 * 10.0).collect(),
            None,
            None,
        )
        .unwrap();
        let provider = Arc::new(FixedProvider(stream));
        let renderer =
            RouteOverlayRenderer::new(OverlayConfig::default()).with_stream_provider(provider);

        for id in ["a", "b", "c"] {
            let mut ride = activity(&line_route());
            ride.id = id.to_string();
            let mut surface = RecordingSurface::new(400, 400);
            renderer.render(&mut surface, &ride, None).await.unwrap();
        }
        assert_eq!(renderer.cache().len(), 3);

        renderer.select_activity("b");
        assert_eq!(renderer.cache().len(), 1);
        assert!(renderer.cache().get("b").is_some());
    }

    struct FixedProvider(GpsStream);

    impl StreamProvider for FixedProvider {
        fn fetch_streams<'a>(
            &'a self,
            _activity_id: &'a str,
        ) -> BoxFuture<'a, Result<Option<GpsStream>>> {
            Box::pin(async move { Ok(Some(self.0.clone())) })
        }
    }

    #[tokio::test]
    async fn test_numeral_centered_on_marker() {
        let renderer = RouteOverlayRenderer::new(OverlayConfig::default());
        let mut surface = RecordingSurface::new(1080, 1080);
        renderer
            .render(&mut surface, &activity(&line_route()), None)
            .await
            .unwrap();

        let marker_center = circles(&surface)[2].0;
        let Some(DrawCommand::Text { text, origin, style }) = surface.commands().get(4) else {
            panic!("expected the start numeral");
        };
        assert_eq!(text, "1");
        let metrics = crate::TextMetrics::estimate(text, &style.font);
        assert!((origin.x + metrics.width / 2.0 - marker_center.x).abs() < 1e-9);
        let visual_middle = origin.y - (metrics.ascent - metrics.descent) / 2.0;
        assert!((visual_middle - marker_center.y).abs() < 1e-9);
    }

    struct FailingProvider {
        calls: AtomicUsize,
    }

    impl StreamProvider for FailingProvider {
        fn fetch_streams<'a>(
            &'a self,
            _activity_id: &'a str,
        ) -> BoxFuture<'a, Result<Option<GpsStream>>> {
            Box::pin(async move {
                self.calls.fetch_add(1, Ordering::SeqCst);
                Err(OverlayError::Request {
                    message: "connection reset".to_string(),
                })
            })
        }
    }

    #[tokio::test]
    async fn test_stream_failure_draws_without_stops() {
        let provider = Arc::new(FailingProvider {
            calls: AtomicUsize::new(0),
        });
        let renderer = RouteOverlayRenderer::new(OverlayConfig::default())
            .with_stream_provider(provider.clone());
        let mut surface = RecordingSurface::new(800, 600);

        let outcome = renderer
            .render(&mut surface, &activity(&line_route()), None)
            .await
            .unwrap();
        assert!(outcome.is_drawn());
        assert_eq!(provider.calls.load(Ordering::SeqCst), 1);
        assert!(renderer.cache().is_empty());
    }

    #[tokio::test]
    async fn test_error_releases_gate() {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&calls);
        let renderer = RouteOverlayRenderer::new(OverlayConfig::default())
            .with_loading_callback(Arc::new(move |on| sink.lock().unwrap().push(on)));

        // Zero-sized canvas cannot be projected onto
        let mut surface = RecordingSurface::new(0, 0);
        let result = renderer
            .render(&mut surface, &activity(&line_route()), None)
            .await;
        assert!(matches!(result, Err(OverlayError::InvalidCanvas { .. })));
        assert!(!renderer.is_rendering());
        assert_eq!(*calls.lock().unwrap(), vec![true, false]);
    }

    struct TitlePainter;

    impl SlotPainter for TitlePainter {
        fn paint(
            &self,
            _slot: CanvasSlot,
            surface: &mut dyn Surface,
            activity: &Activity,
        ) -> Result<()> {
            let style = TextStyle {
                font: FontSpec::bold(40.0),
                color: Color::WHITE,
                shadow: None,
            };
            surface.fill_text(&activity.name, CanvasPoint::new(20.0, 60.0), &style);
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_compose_slot_dispatch() {
        let renderer = RouteOverlayRenderer::new(OverlayConfig::default());
        let mut activity = activity(&line_route());
        activity.name = "Lunch Ride".to_string();

        let mut title = RecordingSurface::new(1080, 1080);
        let outcome = compose_slot(
            CanvasSlot::Title,
            &mut title,
            &activity,
            None,
            &renderer,
            &TitlePainter,
        )
        .await
        .unwrap();
        assert!(outcome.is_none());
        assert_eq!(title.texts(), vec!["Lunch Ride"]);

        let mut overlay = RecordingSurface::new(1080, 1080);
        let outcome = compose_slot(
            CanvasSlot::from_index(1).unwrap(),
            &mut overlay,
            &activity,
            None,
            &renderer,
            &TitlePainter,
        )
        .await
        .unwrap();
        assert!(outcome.is_some_and(|o| o.is_drawn()));
        assert_eq!(CanvasSlot::from_index(3), None);
    }
}
