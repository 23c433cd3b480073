//! Google encoded polyline codec.
//!
//! Each coordinate is stored as a zig-zag encoded delta from the previous one,
//! split into 5-bit groups. Every group is offset by 63 to land in printable
//! ASCII and all but the last group of a value carry the 0x20 continuation bit.

use crate::{GpsPoint, OverlayError, Result};

/// Precision used by Strava and the Google Maps APIs (5 decimal digits).
pub const DEFAULT_PRECISION: u32 = 5;

const CHUNK_OFFSET: u8 = 63;
const CONTINUATION_BIT: u64 = 0x20;
const CHUNK_MASK: u64 = 0x1f;

/// Decode a precision-5 polyline.
///
/// # Example
/// ```
/// use route_overlay::decode_polyline;
///
/// let points = decode_polyline("_p~iF~ps|U_ulLnnqC_mqNvxq`@").unwrap();
/// assert_eq!(points[0].latitude, 38.5);
/// assert_eq!(points[2].longitude, -126.453);
/// ```
pub fn decode_polyline(encoded: &str) -> Result<Vec<GpsPoint>> {
    decode_with_precision(encoded, DEFAULT_PRECISION)
}

/// Decode a polyline encoded with `precision` decimal digits.
///
/// Deltas that overflow the accumulator or land outside the valid
/// latitude/longitude range are reported as `MalformedPolyline` at the
/// offset of the offending point.
pub fn decode_with_precision(encoded: &str, precision: u32) -> Result<Vec<GpsPoint>> {
    let factor = 10_f64.powi(precision as i32);
    let bytes = encoded.as_bytes();
    let mut points = Vec::with_capacity(bytes.len() / 4);

    let mut index = 0;
    let mut lat: i64 = 0;
    let mut lng: i64 = 0;

    while index < bytes.len() {
        let start = index;
        let (dlat, next) = decode_value(bytes, index)?;
        let (dlng, next) = decode_value(bytes, next)?;
        index = next;

        let malformed = || OverlayError::MalformedPolyline { position: start };
        lat = lat.checked_add(dlat).ok_or_else(malformed)?;
        lng = lng.checked_add(dlng).ok_or_else(malformed)?;

        let point = GpsPoint::new(lat as f64 / factor, lng as f64 / factor);
        if !point.is_valid() {
            return Err(malformed());
        }
        points.push(point);
    }

    Ok(points)
}

/// Read one signed value starting at `start`; returns it with the index after it.
fn decode_value(bytes: &[u8], start: usize) -> Result<(i64, usize)> {
    let mut result: u64 = 0;
    let mut shift = 0;
    let mut index = start;

    loop {
        let byte = *bytes
            .get(index)
            .ok_or(OverlayError::MalformedPolyline { position: index })?;
        if byte < CHUNK_OFFSET || shift > 60 {
            return Err(OverlayError::MalformedPolyline { position: index });
        }

        let chunk = (byte - CHUNK_OFFSET) as u64;
        result |= (chunk & CHUNK_MASK) << shift;
        shift += 5;
        index += 1;

        if chunk & CONTINUATION_BIT == 0 {
            break;
        }
    }

    // Undo zig-zag: low bit carries the sign
    let value = if result & 1 == 1 {
        !((result >> 1) as i64)
    } else {
        (result >> 1) as i64
    };
    Ok((value, index))
}

/// Encode points as a precision-5 polyline.
pub fn encode_polyline(points: &[GpsPoint]) -> String {
    encode_with_precision(points, DEFAULT_PRECISION)
}

/// Encode points with `precision` decimal digits. Coordinates are rounded,
/// so decoding returns the quantized values.
pub fn encode_with_precision(points: &[GpsPoint], precision: u32) -> String {
    let factor = 10_f64.powi(precision as i32);
    let mut out = String::with_capacity(points.len() * 8);
    let mut prev_lat: i64 = 0;
    let mut prev_lng: i64 = 0;

    for p in points {
        let lat = (p.latitude * factor).round() as i64;
        let lng = (p.longitude * factor).round() as i64;
        encode_value(lat - prev_lat, &mut out);
        encode_value(lng - prev_lng, &mut out);
        prev_lat = lat;
        prev_lng = lng;
    }

    out
}

fn encode_value(value: i64, out: &mut String) {
    let mut v = if value < 0 {
        !((value as u64) << 1)
    } else {
        (value as u64) << 1
    };

    while v >= CONTINUATION_BIT {
        out.push(((CONTINUATION_BIT | (v & CHUNK_MASK)) as u8 + CHUNK_OFFSET) as char);
        v >>= 5;
    }
    out.push((v as u8 + CHUNK_OFFSET) as char);
}
