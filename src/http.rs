//! HTTP clients for the Strava API and Nominatim place search.
//!
//! Both clients share the same request loop:
//! - Sliding-window rate limiting (Strava: 100 req / 15 min, Nominatim: 1 req/s)
//! - Exponential backoff on 429 responses
//! - Retry with backoff on transport errors

use crate::config::ApiConfig;
use crate::places::{PlaceSearch, RawPlace};
use crate::render::StreamProvider;
use crate::{Activity, Bounds, GpsPoint, GpsStream, OverlayError, Result};
use futures::future::BoxFuture;
use log::{debug, info, warn};
use reqwest::header::AUTHORIZATION;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::Deserialize;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;

// Strava short-term read limit
const STRAVA_LIMIT: usize = 100;
const STRAVA_WINDOW: Duration = Duration::from_secs(15 * 60);

// Nominatim usage policy: at most one request per second
const NOMINATIM_LIMIT: usize = 1;
const NOMINATIM_WINDOW: Duration = Duration::from_secs(1);

const MAX_RETRIES: u32 = 3;
const MAX_ERROR_BODY: usize = 200;

/// Stream types requested from Strava.
const STREAM_KEYS: &str = "latlng,time,distance,altitude";

// ============================================================================
// Rate Limiting
// ============================================================================

/// Sliding-window rate limiter.
pub struct RateLimiter {
    max_requests: usize,
    window: Duration,
    request_times: Mutex<VecDeque<Instant>>,
    consecutive_429s: AtomicU32,
}

impl RateLimiter {
    pub fn new(max_requests: usize, window: Duration) -> Self {
        let max_requests = max_requests.max(1);
        Self {
            max_requests,
            window,
            request_times: Mutex::new(VecDeque::with_capacity(max_requests + 1)),
            consecutive_429s: AtomicU32::new(0),
        }
    }

    /// Sleep until another request fits in the window.
    pub async fn wait_if_needed(&self) {
        loop {
            let wait_time = {
                let mut times = self.request_times.lock().await;
                let now = Instant::now();

                while times
                    .front()
                    .is_some_and(|&t| now.duration_since(t) >= self.window)
                {
                    times.pop_front();
                }

                if times.len() >= self.max_requests {
                    times
                        .front()
                        .map(|&oldest| self.window.saturating_sub(now.duration_since(oldest)))
                        .filter(|d| !d.is_zero())
                } else {
                    None
                }
            };

            match wait_time {
                Some(duration) => {
                    debug!("Rate limit: waiting {:?}", duration);
                    tokio::time::sleep(duration).await;
                }
                None => break,
            }
        }
    }

    pub async fn record_request(&self) {
        let mut times = self.request_times.lock().await;
        times.push_back(Instant::now());
    }

    /// Reset the backoff after a non-429 response.
    pub fn record_success(&self) {
        self.consecutive_429s.store(0, Ordering::Relaxed);
    }

    /// Backoff for the next retry: 2s, 4s, 8s, 16s, then capped.
    pub fn record_429(&self) -> Duration {
        let count = self.consecutive_429s.fetch_add(1, Ordering::Relaxed) + 1;
        Duration::from_millis(1000 * (1 << count.min(4)))
    }
}

/// Send a request built by `build`, honoring the limiter and retrying on 429
/// and transport errors. Any other status is returned to the caller.
async fn send_with_retry<F>(
    component: &str,
    rate_limiter: &RateLimiter,
    build: F,
) -> Result<Response>
where
    F: Fn() -> RequestBuilder,
{
    let mut retries = 0;

    loop {
        rate_limiter.wait_if_needed().await;
        let response = build().send().await;
        rate_limiter.record_request().await;

        match response {
            Ok(resp) if resp.status() == StatusCode::TOO_MANY_REQUESTS => {
                retries += 1;
                if retries > MAX_RETRIES {
                    return Err(OverlayError::Http {
                        status: StatusCode::TOO_MANY_REQUESTS.as_u16(),
                        message: "rate limited, retries exhausted".to_string(),
                    });
                }
                let backoff = rate_limiter.record_429();
                warn!(
                    "[{}] 429 for {}, retry {} after {:?}",
                    component,
                    resp.url(),
                    retries,
                    backoff
                );
                tokio::time::sleep(backoff).await;
            }
            Ok(resp) => {
                rate_limiter.record_success();
                return Ok(resp);
            }
            Err(e) => {
                retries += 1;
                if retries > MAX_RETRIES {
                    return Err(e.into());
                }
                let backoff = Duration::from_millis(500 * (1 << retries));
                warn!(
                    "[{}] Request error: {}, retry {} after {:?}",
                    component, e, retries, backoff
                );
                tokio::time::sleep(backoff).await;
            }
        }
    }
}

/// Turn a non-success response into `OverlayError::Http`.
async fn error_for_status(resp: Response) -> Result<Response> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let body = resp.text().await.unwrap_or_default();
    let message: String = body.chars().take(MAX_ERROR_BODY).collect();
    Err(OverlayError::Http {
        status: status.as_u16(),
        message: if message.is_empty() {
            status.to_string()
        } else {
            message
        },
    })
}

// ============================================================================
// Strava
// ============================================================================

/// Strava API client for activities and their GPS streams.
pub struct StravaClient {
    client: Client,
    base_url: String,
    auth_header: String,
    rate_limiter: Arc<RateLimiter>,
}

impl StravaClient {
    pub fn new(access_token: &str, base_url: &str, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| OverlayError::Config {
                message: format!("Failed to create HTTP client: {}", e),
            })?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            auth_header: format!("Bearer {}", access_token),
            rate_limiter: Arc::new(RateLimiter::new(STRAVA_LIMIT, STRAVA_WINDOW)),
        })
    }

    pub fn from_config(config: &ApiConfig) -> Result<Self> {
        Self::new(
            config.strava_token()?,
            &config.strava_api_url,
            config.timeout,
        )
    }

    async fn get(&self, url: &str, query: &[(&str, &str)]) -> Result<Response> {
        send_with_retry("StravaClient", &self.rate_limiter, || {
            self.client
                .get(url)
                .header(AUTHORIZATION, &self.auth_header)
                .query(query)
        })
        .await
    }

    /// `GET /activities/{id}`.
    pub async fn fetch_activity(&self, activity_id: &str) -> Result<Activity> {
        let url = format!("{}/activities/{}", self.base_url, activity_id);
        let resp = error_for_status(self.get(&url, &[]).await?).await?;
        let activity: Activity = resp.json().await?;
        info!(
            "[StravaClient] Fetched activity {} ({})",
            activity.id, activity.name
        );
        Ok(activity)
    }

    /// `GET /activities/{id}/streams`. A 404 or a response without position
    /// and time streams yields `Ok(None)`.
    pub async fn fetch_streams(&self, activity_id: &str) -> Result<Option<GpsStream>> {
        let url = format!("{}/activities/{}/streams", self.base_url, activity_id);
        let resp = self
            .get(&url, &[("keys", STREAM_KEYS), ("key_by_type", "true")])
            .await?;

        if resp.status() == StatusCode::NOT_FOUND {
            debug!("[StravaClient] No streams for activity {}", activity_id);
            return Ok(None);
        }
        let body = error_for_status(resp).await?.text().await?;
        let stream = parse_stream_set(&body)?;
        if let Some(s) = &stream {
            info!(
                "[StravaClient] Fetched {} stream samples for {}",
                s.len(),
                activity_id
            );
        }
        Ok(stream)
    }
}

impl StreamProvider for StravaClient {
    fn fetch_streams<'a>(
        &'a self,
        activity_id: &'a str,
    ) -> BoxFuture<'a, Result<Option<GpsStream>>> {
        Box::pin(StravaClient::fetch_streams(self, activity_id))
    }
}

/// Strava stream set, `key_by_type=true` shape.
#[derive(Debug, Deserialize)]
struct StravaStreamSet {
    latlng: Option<StravaStream<[f64; 2]>>,
    time: Option<StravaStream<f64>>,
    distance: Option<StravaStream<f64>>,
    altitude: Option<StravaStream<f64>>,
}

#[derive(Debug, Deserialize)]
struct StravaStream<T> {
    data: Vec<T>,
}

/// Build a `GpsStream` from a Strava stream set.
///
/// Optional series whose length disagrees with the positions are dropped
/// rather than failing the stream.
pub fn parse_stream_set(json: &str) -> Result<Option<GpsStream>> {
    let set: StravaStreamSet = serde_json::from_str(json)?;

    let (Some(latlng), Some(time)) = (set.latlng, set.time) else {
        return Ok(None);
    };
    if latlng.data.is_empty() {
        return Ok(None);
    }

    let len = latlng.data.len();
    let matching = |series: Option<StravaStream<f64>>, name: &str| {
        series.map(|s| s.data).filter(|d| {
            let ok = d.len() == len;
            if !ok {
                debug!(
                    "[StravaClient] Dropping {} stream: {} samples vs {} positions",
                    name,
                    d.len(),
                    len
                );
            }
            ok
        })
    };
    let distances = matching(set.distance, "distance");
    let altitudes = matching(set.altitude, "altitude");

    let coordinates = latlng
        .data
        .into_iter()
        .map(|[lat, lng]| GpsPoint::new(lat, lng))
        .collect();
    GpsStream::new(coordinates, time.data, distances, altitudes).map(Some)
}

// ============================================================================
// Nominatim
// ============================================================================

/// Nominatim (OpenStreetMap) search client.
pub struct NominatimClient {
    client: Client,
    base_url: String,
    limit: usize,
    rate_limiter: Arc<RateLimiter>,
}

impl NominatimClient {
    /// Nominatim rejects requests without an identifying User-Agent.
    pub fn new(base_url: &str, user_agent: &str, timeout: Duration, limit: usize) -> Result<Self> {
        if user_agent.trim().is_empty() {
            return Err(OverlayError::Config {
                message: "Nominatim requires a User-Agent".to_string(),
            });
        }

        let client = Client::builder()
            .user_agent(user_agent)
            .timeout(timeout)
            .build()
            .map_err(|e| OverlayError::Config {
                message: format!("Failed to create HTTP client: {}", e),
            })?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            limit: limit.max(1),
            rate_limiter: Arc::new(RateLimiter::new(NOMINATIM_LIMIT, NOMINATIM_WINDOW)),
        })
    }

    pub fn from_config(config: &ApiConfig, limit: usize) -> Result<Self> {
        Self::new(
            &config.nominatim_url,
            &config.nominatim_user_agent,
            config.timeout,
            limit,
        )
    }

    /// Search `query` restricted to `bounds`.
    pub async fn search(&self, query: &str, bounds: &Bounds) -> Result<Vec<RawPlace>> {
        let url = format!("{}/search", self.base_url);
        let viewbox = viewbox(bounds);
        let limit = self.limit.to_string();
        let params = [
            ("q", query),
            ("format", "jsonv2"),
            ("viewbox", viewbox.as_str()),
            ("bounded", "1"),
            ("addressdetails", "1"),
            ("limit", limit.as_str()),
        ];

        let resp = send_with_retry("NominatimClient", &self.rate_limiter, || {
            self.client.get(&url).query(&params)
        })
        .await?;
        let places: Vec<RawPlace> = error_for_status(resp).await?.json().await?;
        debug!("[NominatimClient] '{}' -> {} places", query, places.len());
        Ok(places)
    }
}

impl PlaceSearch for NominatimClient {
    fn search<'a>(
        &'a self,
        query: &'a str,
        bounds: &'a Bounds,
    ) -> BoxFuture<'a, Result<Vec<RawPlace>>> {
        Box::pin(NominatimClient::search(self, query, bounds))
    }
}

/// Nominatim viewbox: `left,top,right,bottom` (min lng, max lat, max lng, min lat).
pub fn viewbox(bounds: &Bounds) -> String {
    format!(
        "{},{},{},{}",
        bounds.min_lng, bounds.max_lat, bounds.max_lng, bounds.min_lat
    )
}
