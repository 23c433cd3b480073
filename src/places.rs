//! # Place Labels
//!
//! Nearby place names for the overlay background layer.
//!
//! Candidates come from a [`PlaceSearch`] service, one query per place
//! keyword, and are filtered, deduplicated by name and ordered by priority
//! (cities first, hamlets last). Layout is greedy: each label claims its text
//! box unless that box overlaps one already claimed, so more important places
//! win contested screen space.

use crate::projection::{CanvasPoint, Projection};
use crate::surface::{TextMeasure, TextStyle};
use crate::{Bounds, GpsPoint, Result};
use futures::future::BoxFuture;
use log::{debug, info, warn};
use rstar::{RTree, RTreeObject, AABB};
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::HashSet;
use std::time::Duration;

/// Result classes that describe a settlement or named area.
const ACCEPTED_CLASSES: &[&str] = &["place", "boundary", "landuse", "highway"];

// ============================================================================
// Configuration
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlaceConfig {
    /// One search is issued per keyword, in this order.
    /// Default: suburb, locality, neighbourhood, town, city, village
    pub keywords: Vec<String>,

    /// Pause between consecutive searches (Nominatim allows 1 req/s).
    /// Default: 1100 ms
    pub query_delay_ms: u64,

    /// Candidates kept after sorting by priority.
    /// Default: 15
    pub max_candidates: usize,

    /// Results requested per search.
    /// Default: 10
    pub results_per_query: usize,

    /// Margin around each label's text when testing for collisions.
    /// Default: 4.0 px
    pub label_padding: f64,
}

impl Default for PlaceConfig {
    fn default() -> Self {
        Self {
            keywords: ["suburb", "locality", "neighbourhood", "town", "city", "village"]
                .iter()
                .map(|k| k.to_string())
                .collect(),
            query_delay_ms: 1100,
            max_candidates: 15,
            results_per_query: 10,
            label_padding: 4.0,
        }
    }
}

// ============================================================================
// Place Types
// ============================================================================

/// Kind of named place. Declaration order is draw/collision priority.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlaceKind {
    City,
    Town,
    Suburb,
    Locality,
    Neighbourhood,
    Village,
    Hamlet,
    Other,
}

impl PlaceKind {
    /// Map a search result `type` to a kind; `None` for types that are not
    /// places at all (shops, roads, ...).
    pub fn from_type(place_type: &str) -> Option<Self> {
        match place_type {
            "city" => Some(Self::City),
            "town" => Some(Self::Town),
            "suburb" => Some(Self::Suburb),
            "locality" => Some(Self::Locality),
            "neighbourhood" => Some(Self::Neighbourhood),
            "village" => Some(Self::Village),
            "hamlet" => Some(Self::Hamlet),
            "quarter" | "borough" | "city_district" | "administrative" | "isolated_dwelling" => {
                Some(Self::Other)
            }
            _ => None,
        }
    }

    /// 1 (city) to 8 (other); lower wins.
    pub fn priority(self) -> u8 {
        match self {
            Self::City => 1,
            Self::Town => 2,
            Self::Suburb => 3,
            Self::Locality => 4,
            Self::Neighbourhood => 5,
            Self::Village => 6,
            Self::Hamlet => 7,
            Self::Other => 8,
        }
    }
}

/// Structured address parts of a search result.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Address {
    #[serde(default)]
    pub suburb: Option<String>,
    #[serde(default)]
    pub neighbourhood: Option<String>,
    #[serde(default)]
    pub town: Option<String>,
    #[serde(default)]
    pub city: Option<String>,
    #[serde(default)]
    pub village: Option<String>,
}

/// A search result as returned by the place-search service.
///
/// Nominatim sends coordinates as strings; numbers are accepted too. A value
/// that does not parse becomes `None` and the record is filtered out later,
/// rather than failing the whole response.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawPlace {
    #[serde(default)]
    pub name: String,
    #[serde(rename = "type", default)]
    pub place_type: String,
    /// `class` in Nominatim's `json` format, `category` in `jsonv2`
    #[serde(default, alias = "category")]
    pub class: String,
    #[serde(default, deserialize_with = "deserialize_coordinate")]
    pub lat: Option<f64>,
    #[serde(default, deserialize_with = "deserialize_coordinate")]
    pub lon: Option<f64>,
    #[serde(default)]
    pub address: Option<Address>,
    #[serde(default)]
    pub display_name: Option<String>,
}

fn deserialize_coordinate<'de, D>(deserializer: D) -> std::result::Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum CoordRepr {
        Number(f64),
        Text(String),
    }

    Ok(match Option::<CoordRepr>::deserialize(deserializer)? {
        Some(CoordRepr::Number(v)) => Some(v),
        Some(CoordRepr::Text(s)) => s.trim().parse().ok(),
        None => None,
    })
}

impl RawPlace {
    /// Validate a result and turn it into a label candidate.
    pub fn to_label(&self) -> Option<PlaceLabel> {
        if !ACCEPTED_CLASSES.contains(&self.class.as_str()) {
            return None;
        }
        let kind = PlaceKind::from_type(&self.place_type)?;
        let name = self.name.trim();
        if name.is_empty() {
            return None;
        }
        let point = GpsPoint::new(self.lat?, self.lon?);
        if !point.is_valid() {
            return None;
        }

        Some(PlaceLabel {
            name: name.to_string(),
            display_name: self.label_text(name),
            point,
            kind,
            priority: kind.priority(),
        })
    }

    /// Structured address parts read better than raw names ("Richmond"
    /// rather than "Richmond Park Ward").
    fn label_text(&self, fallback: &str) -> String {
        self.address
            .as_ref()
            .and_then(|a| {
                [&a.suburb, &a.neighbourhood, &a.town, &a.city, &a.village]
                    .into_iter()
                    .flatten()
                    .map(|s| s.trim())
                    .find(|s| !s.is_empty())
            })
            .unwrap_or(fallback)
            .to_string()
    }
}

/// A named place that may be drawn.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlaceLabel {
    /// Raw name from the search result, used for deduplication
    pub name: String,
    /// Text to draw
    pub display_name: String,
    pub point: GpsPoint,
    pub kind: PlaceKind,
    pub priority: u8,
}

// ============================================================================
// Search
// ============================================================================

/// A place-search service queried by keyword inside a bounding box.
pub trait PlaceSearch: Send + Sync {
    fn search<'a>(
        &'a self,
        query: &'a str,
        bounds: &'a Bounds,
    ) -> BoxFuture<'a, Result<Vec<RawPlace>>>;
}

/// Query every keyword in turn and return prioritized label candidates.
///
/// Searches run one at a time with `query_delay_ms` between them. A failed
/// search is logged and contributes nothing; if every search fails the result
/// is simply empty.
pub async fn find_places(
    search: &dyn PlaceSearch,
    query_bounds: &Bounds,
    config: &PlaceConfig,
) -> Vec<PlaceLabel> {
    let mut results = Vec::new();
    let mut failures = 0usize;

    for (i, keyword) in config.keywords.iter().enumerate() {
        if i > 0 && config.query_delay_ms > 0 {
            tokio::time::sleep(Duration::from_millis(config.query_delay_ms)).await;
        }

        match search.search(keyword, query_bounds).await {
            Ok(places) => {
                debug!("[PlaceLabeler] '{}' -> {} results", keyword, places.len());
                results.extend(places);
            }
            Err(e) => {
                failures += 1;
                warn!("[PlaceLabeler] Search for '{}' failed: {}", keyword, e);
            }
        }
    }

    let candidates = select_candidates(results, config.max_candidates);
    info!(
        "[PlaceLabeler] {} candidates from {} searches ({} failed)",
        candidates.len(),
        config.keywords.len(),
        failures
    );
    candidates
}

/// Filter, dedupe by name (first occurrence wins), stable-sort by priority
/// and keep the first `max_candidates`.
pub fn select_candidates(results: Vec<RawPlace>, max_candidates: usize) -> Vec<PlaceLabel> {
    let mut seen = HashSet::new();
    let mut labels: Vec<PlaceLabel> = results
        .iter()
        .filter_map(RawPlace::to_label)
        .filter(|label| seen.insert(label.name.clone()))
        .collect();

    labels.sort_by_key(|label| label.priority);
    labels.truncate(max_candidates);
    labels
}

// ============================================================================
// Layout
// ============================================================================

/// Axis-aligned rectangle in canvas pixels, origin top-left.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TextBox {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl TextBox {
    pub fn right(&self) -> f64 {
        self.x + self.width
    }

    pub fn bottom(&self) -> f64 {
        self.y + self.height
    }

    /// True when the boxes share a positive area. Touching edges do not count.
    pub fn overlaps(&self, other: &TextBox) -> bool {
        self.x < other.right()
            && other.x < self.right()
            && self.y < other.bottom()
            && other.y < self.bottom()
    }

    /// True when no part of the box is on a `width` × `height` canvas.
    pub fn is_off_canvas(&self, width: f64, height: f64) -> bool {
        self.right() <= 0.0 || self.bottom() <= 0.0 || self.x >= width || self.y >= height
    }
}

impl RTreeObject for TextBox {
    type Envelope = AABB<[f64; 2]>;

    fn envelope(&self) -> Self::Envelope {
        AABB::from_corners([self.x, self.y], [self.right(), self.bottom()])
    }
}

/// A label that won its spot.
#[derive(Debug, Clone, PartialEq)]
pub struct PlacedLabel {
    pub label: PlaceLabel,
    pub text: String,
    pub text_box: TextBox,
    /// Left end of the baseline, for `Surface::fill_text`
    pub origin: CanvasPoint,
}

/// Greedy collision-free placement in priority order.
///
/// Each label's text is centered on its projected point; the box used for
/// collisions adds `padding` on every side.
pub fn layout_labels<M: TextMeasure + ?Sized>(
    labels: &[PlaceLabel],
    projection: &Projection,
    measure: &M,
    style: &TextStyle,
    padding: f64,
) -> Vec<PlacedLabel> {
    let mut ordered: Vec<&PlaceLabel> = labels.iter().collect();
    ordered.sort_by_key(|label| label.priority);

    let mut accepted: RTree<TextBox> = RTree::new();
    let mut placed = Vec::new();

    for label in ordered {
        let text = label.display_name.as_str();
        let metrics = measure.measure_text(text, &style.font);
        let center = projection.project(&label.point);
        let left = center.x - metrics.width / 2.0;
        let top = center.y - metrics.height() / 2.0;

        let text_box = TextBox {
            x: left - padding,
            y: top - padding,
            width: metrics.width + 2.0 * padding,
            height: metrics.height() + 2.0 * padding,
        };

        if text_box.is_off_canvas(projection.canvas_width(), projection.canvas_height()) {
            debug!("[PlaceLabeler] '{}' is off canvas", text);
            continue;
        }

        let collides = accepted
            .locate_in_envelope_intersecting(&text_box.envelope())
            .any(|other| other.overlaps(&text_box));
        if collides {
            debug!("[PlaceLabeler] '{}' collides, skipped", text);
            continue;
        }

        accepted.insert(text_box);
        placed.push(PlacedLabel {
            label: label.clone(),
            text: text.to_string(),
            text_box,
            origin: CanvasPoint::new(left, top + metrics.ascent),
        });
    }

    placed
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::surface::{Color, FontSpec, RecordingSurface};
    use crate::OverlayError;
    use std::sync::Mutex;

    fn place(name: &str, place_type: &str, lat: f64, lon: f64) -> RawPlace {
        RawPlace {
            name: name.to_string(),
            place_type: place_type.to_string(),
            class: "place".to_string(),
            lat: Some(lat),
            lon: Some(lon),
            ..RawPlace::default()
        }
    }

    fn label(name: &str, kind: PlaceKind, lat: f64, lon: f64) -> PlaceLabel {
        PlaceLabel {
            name: name.to_string(),
            display_name: name.to_string(),
            point: GpsPoint::new(lat, lon),
            kind,
            priority: kind.priority(),
        }
    }

    fn style() -> TextStyle {
        TextStyle {
            font: FontSpec::new(20.0),
            color: Color::WHITE,
            shadow: None,
        }
    }

    fn projection() -> Projection {
        let bounds = Bounds {
            min_lat: 51.0,
            max_lat: 51.1,
            min_lng: -0.1,
            max_lng: 0.0,
        };
        Projection::fit(&bounds, 1000, 1000).unwrap()
    }

    #[test]
    fn test_priority_order() {
        let kinds = [
            PlaceKind::City,
            PlaceKind::Town,
            PlaceKind::Suburb,
            PlaceKind::Locality,
            PlaceKind::Neighbourhood,
            PlaceKind::Village,
            PlaceKind::Hamlet,
            PlaceKind::Other,
        ];
        for (i, kind) in kinds.iter().enumerate() {
            assert_eq!(kind.priority() as usize, i + 1);
        }
        assert_eq!(PlaceKind::from_type("administrative"), Some(PlaceKind::Other));
        assert_eq!(PlaceKind::from_type("cafe"), None);
    }

    #[test]
    fn test_parse_nominatim_jsonv2() {
        let json = r#"[{
            "place_id": 1,
            "lat": "51.4613",
            "lon": "-0.3037",
            "category": "place",
            "type": "suburb",
            "name": "Richmond",
            "display_name": "Richmond, London Borough of Richmond upon Thames, London",
            "address": {"suburb": "Richmond", "city": "London", "country": "United Kingdom"}
        }]"#;
        let places: Vec<RawPlace> = serde_json::from_str(json).unwrap();
        assert_eq!(places[0].class, "place");
        assert_eq!(places[0].lat, Some(51.4613));

        let label = places[0].to_label().unwrap();
        assert_eq!(label.kind, PlaceKind::Suburb);
        assert_eq!(label.display_name, "Richmond");
    }

    #[test]
    fn test_bad_coordinates_filtered_not_fatal() {
        let json = r#"[
            {"class": "place", "type": "town", "name": "A", "lat": "x", "lon": "1.0"},
            {"class": "place", "type": "town", "name": "B", "lat": 45.1, "lon": 7.2}
        ]"#;
        let places: Vec<RawPlace> = serde_json::from_str(json).unwrap();
        let labels = select_candidates(places, 15);
        assert_eq!(labels.len(), 1);
        assert_eq!(labels[0].name, "B");
    }

    #[test]
    fn test_filter_rejects_non_places() {
        let mut shop = place("Tesco", "supermarket", 45.0, 7.0);
        shop.class = "shop".to_string();
        let unnamed = place("  ", "town", 45.0, 7.0);
        let mut road = place("High Street", "village", 45.0, 7.0);
        road.class = "amenity".to_string();

        assert!(shop.to_label().is_none());
        assert!(unnamed.to_label().is_none());
        assert!(road.to_label().is_none());
        assert!(place("Turin", "city", 45.0, 7.0).to_label().is_some());
    }

    #[test]
    fn test_display_name_prefers_address() {
        let mut raw = place("Kew Ward", "suburb", 51.0, 0.0);
        raw.address = Some(Address {
            suburb: Some(String::new()),
            neighbourhood: Some("Kew".to_string()),
            city: Some("London".to_string()),
            ..Address::default()
        });
        assert_eq!(raw.to_label().unwrap().display_name, "Kew");

        raw.address = None;
        assert_eq!(raw.to_label().unwrap().display_name, "Kew Ward");
    }

    #[test]
    fn test_select_dedupes_sorts_and_truncates() {
        let mut results = vec![
            place("Hamlet A", "hamlet", 45.0, 7.0),
            place("Town A", "town", 45.0, 7.0),
            place("Town A", "city", 45.0, 7.0),
            place("City A", "city", 45.0, 7.0),
            place("Town B", "town", 45.0, 7.0),
        ];
        for i in 0..20 {
            results.push(place(&format!("Village {}", i), "village", 45.0, 7.0));
        }

        let labels = select_candidates(results, 15);
        assert_eq!(labels.len(), 15);
        assert_eq!(labels[0].name, "City A");
        // Duplicate "Town A" kept its first (town) classification
        assert_eq!(labels[1].name, "Town A");
        assert_eq!(labels[1].kind, PlaceKind::Town);
        assert_eq!(labels[2].name, "Town B");
        // Stable: villages keep their arrival order
        assert_eq!(labels[3].name, "Village 0");
        assert!(labels.iter().all(|l| l.kind != PlaceKind::Hamlet));
    }

    struct MockSearch {
        results: Vec<(&'static str, Vec<RawPlace>)>,
        failing: Vec<&'static str>,
        calls: Mutex<Vec<String>>,
    }

    impl PlaceSearch for MockSearch {
        fn search<'a>(
            &'a self,
            query: &'a str,
            _bounds: &'a Bounds,
        ) -> BoxFuture<'a, Result<Vec<RawPlace>>> {
            Box::pin(async move {
                self.calls.lock().unwrap().push(query.to_string());
                if self.failing.iter().any(|f| *f == query) {
                    return Err(OverlayError::Http {
                        status: 503,
                        message: "unavailable".to_string(),
                    });
                }
                Ok(self
                    .results
                    .iter()
                    .find(|(k, _)| *k == query)
                    .map(|(_, r)| r.clone())
                    .unwrap_or_default())
            })
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_find_places_queries_each_keyword_serially() {
        let search = MockSearch {
            results: vec![
                ("suburb", vec![place("Kew", "suburb", 51.05, -0.05)]),
                ("city", vec![place("London", "city", 51.06, -0.04)]),
            ],
            failing: vec!["town"],
            calls: Mutex::new(Vec::new()),
        };
        let bounds = projection().bounds().padded(0.3);
        let config = PlaceConfig::default();

        let started = tokio::time::Instant::now();
        let labels = find_places(&search, &bounds, &config).await;

        assert_eq!(*search.calls.lock().unwrap(), config.keywords);
        // Five pauses between six searches
        assert!(started.elapsed() >= Duration::from_millis(5 * config.query_delay_ms));
        // Failed town search contributed nothing, the rest survived
        let names: Vec<&str> = labels.iter().map(|l| l.name.as_str()).collect();
        assert_eq!(names, vec!["London", "Kew"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_find_places_all_failing_is_empty() {
        let search = MockSearch {
            results: Vec::new(),
            failing: vec!["suburb", "locality", "neighbourhood", "town", "city", "village"],
            calls: Mutex::new(Vec::new()),
        };
        let projection = projection();
        let labels = find_places(&search, projection.bounds(), &PlaceConfig::default()).await;
        assert!(labels.is_empty());
    }

    #[test]
    fn test_text_box_overlap_is_strict() {
        let a = TextBox { x: 0.0, y: 0.0, width: 10.0, height: 10.0 };
        let touching = TextBox { x: 10.0, y: 0.0, width: 10.0, height: 10.0 };
        let overlapping = TextBox { x: 9.5, y: 9.5, width: 10.0, height: 10.0 };
        assert!(!a.overlaps(&touching));
        assert!(a.overlaps(&overlapping));
        assert!(overlapping.overlaps(&a));
    }

    #[test]
    fn test_layout_higher_priority_wins_collision() {
        let measure = RecordingSurface::new(1000, 1000);
        // Village listed first, but the town outranks it
        let labels = vec![
            label("Ashby", PlaceKind::Village, 51.05, -0.05),
            label("Brampton", PlaceKind::Town, 51.0502, -0.0502),
        ];
        let placed = layout_labels(&labels, &projection(), &measure, &style(), 4.0);
        assert_eq!(placed.len(), 1);
        assert_eq!(placed[0].text, "Brampton");
    }

    #[test]
    fn test_layout_distant_labels_both_placed() {
        let measure = RecordingSurface::new(1000, 1000);
        let labels = vec![
            label("Ashby", PlaceKind::Village, 51.02, -0.08),
            label("Brampton", PlaceKind::Town, 51.08, -0.02),
        ];
        let placed = layout_labels(&labels, &projection(), &measure, &style(), 4.0);
        assert_eq!(placed.len(), 2);
        assert!(!placed[0].text_box.overlaps(&placed[1].text_box));
    }

    #[test]
    fn test_layout_centers_text_on_point() {
        let measure = RecordingSurface::new(1000, 1000);
        let labels = vec![label("Kew", PlaceKind::Suburb, 51.05, -0.05)];
        let placed = layout_labels(&labels, &projection(), &measure, &style(), 4.0);

        let metrics = measure.measure_text("Kew", &style().font);
        let b = placed[0].text_box;
        assert!(((b.x + b.right()) / 2.0 - 500.0).abs() < 1e-6);
        assert!(((b.y + b.bottom()) / 2.0 - 500.0).abs() < 1e-6);
        assert!((b.width - metrics.width - 8.0).abs() < 1e-9);
        assert!((placed[0].origin.x - (500.0 - metrics.width / 2.0)).abs() < 1e-6);
    }

    #[test]
    fn test_layout_skips_off_canvas() {
        let measure = RecordingSurface::new(1000, 1000);
        let labels = vec![label("Faraway", PlaceKind::City, 52.0, 1.0)];
        assert!(layout_labels(&labels, &projection(), &measure, &style(), 4.0).is_empty());
    }
}
