//! Software raster surface backed by an `image::RgbaImage`.
//!
//! Shapes are rasterized into a coverage mask first and then composited once
//! with the Porter-Duff "over" operator, so translucent strokes do not darken
//! where segments meet. Text needs a TrueType/OpenType font; without one,
//! strings are still measured (with estimated metrics) but not drawn.

use crate::projection::CanvasPoint;
use crate::surface::{Color, FontSpec, Stroke, Surface, TextMeasure, TextMetrics, TextStyle};
use crate::{OverlayError, Result};
use image::{ImageBuffer, ImageFormat, Rgba, RgbaImage};
use log::debug;
use std::io::Cursor;
use std::path::Path;
use ttf_parser::{Face, OutlineBuilder};

/// Subsamples per pixel axis for glyph coverage.
const TEXT_SUPERSAMPLE: usize = 4;

/// Curve flattening steps.
const QUAD_STEPS: usize = 8;
const CUBIC_STEPS: usize = 12;

pub struct RasterSurface {
    image: RgbaImage,
    font: Option<Vec<u8>>,
}

impl RasterSurface {
    /// Fully transparent canvas.
    pub fn new(width: u32, height: u32) -> Self {
        Self::from_image(ImageBuffer::from_pixel(width, height, Rgba([0, 0, 0, 0])))
    }

    /// Draw on top of an existing image (e.g. the post's background photo).
    pub fn from_image(image: RgbaImage) -> Self {
        Self { image, font: None }
    }

    /// Use a TrueType/OpenType font for text.
    pub fn with_font(mut self, font_data: Vec<u8>) -> Result<Self> {
        Face::parse(&font_data, 0).map_err(|e| OverlayError::Font {
            message: e.to_string(),
        })?;
        self.font = Some(font_data);
        Ok(self)
    }

    pub fn has_font(&self) -> bool {
        self.font.is_some()
    }

    pub fn image(&self) -> &RgbaImage {
        &self.image
    }

    pub fn into_image(self) -> RgbaImage {
        self.image
    }

    /// Encode the canvas as PNG.
    pub fn encode_png(&self) -> Result<Vec<u8>> {
        let mut png_data = Vec::new();
        self.image
            .write_to(&mut Cursor::new(&mut png_data), ImageFormat::Png)?;
        Ok(png_data)
    }

    pub fn save_png(&self, path: &Path) -> Result<()> {
        self.image.save_with_format(path, ImageFormat::Png)?;
        Ok(())
    }

    /// Composite `color` at `coverage` (0..=1) onto one pixel, source over.
    fn blend(&mut self, x: i64, y: i64, color: Color, coverage: f32) {
        if x < 0 || y < 0 || x >= self.image.width() as i64 || y >= self.image.height() as i64 {
            return;
        }

        let src_a = color.a as f32 / 255.0 * coverage.clamp(0.0, 1.0);
        if src_a <= 0.0 {
            return;
        }

        let pixel = self.image.get_pixel_mut(x as u32, y as u32);
        let dst_a = pixel[3] as f32 / 255.0;
        let out_a = src_a + dst_a * (1.0 - src_a);

        if out_a > 0.0 {
            let src = [color.r, color.g, color.b];
            for i in 0..3 {
                let s = src[i] as f32;
                let d = pixel[i] as f32;
                pixel[i] = ((s * src_a + d * dst_a * (1.0 - src_a)) / out_a).round() as u8;
            }
            pixel[3] = (out_a * 255.0).round() as u8;
        }
    }

    fn blend_mask(&mut self, mask: &CoverageMask, dx: i64, dy: i64, color: Color) {
        for row in 0..mask.height {
            for col in 0..mask.width {
                let coverage = mask.values[row * mask.width + col];
                if coverage > 0.0 {
                    self.blend(
                        mask.x0 + col as i64 + dx,
                        mask.y0 + row as i64 + dy,
                        color,
                        coverage,
                    );
                }
            }
        }
    }

    /// Glyph outlines of `text` as line segments in canvas pixels.
    fn text_edges(&self, face: &Face, text: &str, origin: CanvasPoint, size: f64) -> Vec<Edge> {
        let scale = size / face.units_per_em() as f64;
        let mut builder = EdgeBuilder {
            edges: Vec::new(),
            scale,
            origin_x: origin.x,
            baseline: origin.y,
            start: (0.0, 0.0),
            current: (0.0, 0.0),
        };

        for c in text.chars() {
            let Some(glyph) = face.glyph_index(c) else {
                continue;
            };
            face.outline_glyph(glyph, &mut builder);
            builder.origin_x += face.glyph_hor_advance(glyph).unwrap_or(0) as f64 * scale;
        }

        builder.edges
    }
}

impl TextMeasure for RasterSurface {
    fn measure_text(&self, text: &str, font: &FontSpec) -> TextMetrics {
        let face = self
            .font
            .as_deref()
            .and_then(|data| Face::parse(data, 0).ok());
        let Some(face) = face else {
            return TextMetrics::estimate(text, font);
        };

        let scale = font.size / face.units_per_em() as f64;
        let mut width = 0.0;
        let mut y_max: i16 = 0;
        let mut y_min: i16 = 0;
        for c in text.chars() {
            let Some(glyph) = face.glyph_index(c) else {
                continue;
            };
            width += face.glyph_hor_advance(glyph).unwrap_or(0) as f64 * scale;
            if let Some(rect) = face.glyph_bounding_box(glyph) {
                y_max = y_max.max(rect.y_max);
                y_min = y_min.min(rect.y_min);
            }
        }

        TextMetrics {
            width,
            ascent: y_max as f64 * scale,
            descent: -(y_min as f64) * scale,
        }
    }
}

impl Surface for RasterSurface {
    fn width(&self) -> u32 {
        self.image.width()
    }

    fn height(&self) -> u32 {
        self.image.height()
    }

    fn fill_circle(&mut self, center: CanvasPoint, radius: f64, color: Color) {
        if radius <= 0.0 {
            return;
        }
        let x0 = (center.x - radius - 1.0).floor() as i64;
        let x1 = (center.x + radius + 1.0).ceil() as i64;
        let y0 = (center.y - radius - 1.0).floor() as i64;
        let y1 = (center.y + radius + 1.0).ceil() as i64;

        for y in y0..=y1 {
            for x in x0..=x1 {
                let d = (x as f64 + 0.5 - center.x).hypot(y as f64 + 0.5 - center.y);
                let coverage = (radius + 0.5 - d).clamp(0.0, 1.0) as f32;
                if coverage > 0.0 {
                    self.blend(x, y, color, coverage);
                }
            }
        }
    }

    fn stroke_path(&mut self, points: &[CanvasPoint], stroke: &Stroke) {
        if points.len() < 2 || stroke.width <= 0.0 {
            return;
        }
        let half = stroke.width / 2.0;
        let (min_x, min_y, max_x, max_y) = points.iter().fold(
            (f64::MAX, f64::MAX, f64::MIN, f64::MIN),
            |(a, b, c, d), p| (a.min(p.x), b.min(p.y), c.max(p.x), d.max(p.y)),
        );

        // Clip the mask to the canvas
        let x0 = ((min_x - half - 1.0).floor() as i64).max(0);
        let y0 = ((min_y - half - 1.0).floor() as i64).max(0);
        let x1 = ((max_x + half + 1.0).ceil() as i64).min(self.image.width() as i64);
        let y1 = ((max_y + half + 1.0).ceil() as i64).min(self.image.height() as i64);
        if x1 <= x0 || y1 <= y0 {
            return;
        }

        let mut mask = CoverageMask::new(x0, y0, (x1 - x0) as usize, (y1 - y0) as usize);
        for segment in points.windows(2) {
            let (a, b) = (segment[0], segment[1]);
            let sx0 = ((a.x.min(b.x) - half - 1.0).floor() as i64).max(x0);
            let sx1 = ((a.x.max(b.x) + half + 1.0).ceil() as i64).min(x1);
            let sy0 = ((a.y.min(b.y) - half - 1.0).floor() as i64).max(y0);
            let sy1 = ((a.y.max(b.y) + half + 1.0).ceil() as i64).min(y1);

            for y in sy0..sy1 {
                for x in sx0..sx1 {
                    let d = distance_to_segment(x as f64 + 0.5, y as f64 + 0.5, a, b);
                    let coverage = (half + 0.5 - d).clamp(0.0, 1.0) as f32;
                    mask.raise(x, y, coverage);
                }
            }
        }

        self.blend_mask(&mask, 0, 0, stroke.color);
    }

    fn fill_text(&mut self, text: &str, origin: CanvasPoint, style: &TextStyle) {
        let Some(data) = self.font.as_deref() else {
            debug!("[RasterSurface] No font loaded, skipping text '{}'", text);
            return;
        };
        let Ok(face) = Face::parse(data, 0) else {
            return;
        };

        let edges = self.text_edges(&face, text, origin, style.font.size);
        let Some(mut mask) = CoverageMask::from_edges(&edges) else {
            return;
        };
        if style.font.bold {
            mask = mask.embolden();
        }

        if let Some(shadow) = style.shadow {
            let blurred = mask.box_blur((shadow.blur / 2.0).round() as usize);
            self.blend_mask(
                &blurred,
                shadow.offset_x.round() as i64,
                shadow.offset_y.round() as i64,
                shadow.color,
            );
        }
        self.blend_mask(&mask, 0, 0, style.color);
    }
}

fn distance_to_segment(px: f64, py: f64, a: CanvasPoint, b: CanvasPoint) -> f64 {
    let (dx, dy) = (b.x - a.x, b.y - a.y);
    let len_sq = dx * dx + dy * dy;
    let t = if len_sq < 1e-12 {
        0.0
    } else {
        (((px - a.x) * dx + (py - a.y) * dy) / len_sq).clamp(0.0, 1.0)
    };
    (px - (a.x + t * dx)).hypot(py - (a.y + t * dy))
}

// ============================================================================
// Coverage Masks
// ============================================================================

/// Per-pixel coverage (0..=1) over a rectangle of the canvas.
struct CoverageMask {
    x0: i64,
    y0: i64,
    width: usize,
    height: usize,
    values: Vec<f32>,
}

impl CoverageMask {
    fn new(x0: i64, y0: i64, width: usize, height: usize) -> Self {
        Self {
            x0,
            y0,
            width,
            height,
            values: vec![0.0; width * height],
        }
    }

    fn raise(&mut self, x: i64, y: i64, coverage: f32) {
        let (col, row) = (x - self.x0, y - self.y0);
        if col < 0 || row < 0 || col as usize >= self.width || row as usize >= self.height {
            return;
        }
        let v = &mut self.values[row as usize * self.width + col as usize];
        *v = v.max(coverage);
    }

    /// Nonzero-winding fill of closed outlines, supersampled.
    fn from_edges(edges: &[Edge]) -> Option<Self> {
        if edges.is_empty() {
            return None;
        }
        let (min_x, min_y, max_x, max_y) = edges.iter().fold(
            (f64::MAX, f64::MAX, f64::MIN, f64::MIN),
            |(a, b, c, d), e| {
                (
                    a.min(e.x0.min(e.x1)),
                    b.min(e.y0.min(e.y1)),
                    c.max(e.x0.max(e.x1)),
                    d.max(e.y0.max(e.y1)),
                )
            },
        );
        let x0 = min_x.floor() as i64;
        let y0 = min_y.floor() as i64;
        let width = (max_x.ceil() as i64 - x0).max(1) as usize;
        let height = (max_y.ceil() as i64 - y0).max(1) as usize;
        let mut mask = Self::new(x0, y0, width, height);

        let ss = TEXT_SUPERSAMPLE;
        let sample_weight = 1.0 / (ss * ss) as f32;
        let mut crossings: Vec<(f64, i32)> = Vec::new();

        for sub_row in 0..height * ss {
            let sy = y0 as f64 + (sub_row as f64 + 0.5) / ss as f64;
            crossings.clear();
            for e in edges {
                let upward = e.y0 <= sy && sy < e.y1;
                let downward = e.y1 <= sy && sy < e.y0;
                if upward || downward {
                    let t = (sy - e.y0) / (e.y1 - e.y0);
                    crossings.push((e.x0 + t * (e.x1 - e.x0), if upward { 1 } else { -1 }));
                }
            }
            if crossings.is_empty() {
                continue;
            }
            crossings.sort_by(|a, b| a.0.total_cmp(&b.0));

            let row = sub_row / ss;
            let mut winding = 0;
            let mut next = 0;
            for sub_col in 0..width * ss {
                let sx = x0 as f64 + (sub_col as f64 + 0.5) / ss as f64;
                while next < crossings.len() && crossings[next].0 <= sx {
                    winding += crossings[next].1;
                    next += 1;
                }
                if winding != 0 {
                    mask.values[row * width + sub_col / ss] += sample_weight;
                }
            }
        }

        Some(mask)
    }

    /// Thicken horizontally by one pixel (synthetic bold).
    fn embolden(&self) -> Self {
        let mut out = Self::new(self.x0, self.y0, self.width + 1, self.height);
        for row in 0..self.height {
            for col in 0..self.width {
                let v = self.values[row * self.width + col];
                out.raise(self.x0 + col as i64, self.y0 + row as i64, v);
                out.raise(self.x0 + col as i64 + 1, self.y0 + row as i64, v);
            }
        }
        out
    }

    /// Separable box blur; grows the mask by `radius` on every side.
    fn box_blur(&self, radius: usize) -> Self {
        if radius == 0 {
            return Self {
                values: self.values.clone(),
                ..*self
            };
        }
        let r = radius as i64;
        let width = self.width + 2 * radius;
        let height = self.height + 2 * radius;
        let window = (2 * radius + 1) as f32;

        let get = |col: i64, row: i64| -> f32 {
            if col < 0 || row < 0 || col as usize >= self.width || row as usize >= self.height {
                0.0
            } else {
                self.values[row as usize * self.width + col as usize]
            }
        };

        let mut horizontal = vec![0.0f32; width * self.height];
        for row in 0..self.height {
            for col in 0..width {
                let center = col as i64 - r;
                let sum: f32 = (center - r..=center + r).map(|c| get(c, row as i64)).sum();
                horizontal[row * width + col] = sum / window;
            }
        }

        let mut out = Self::new(self.x0 - r, self.y0 - r, width, height);
        for row in 0..height {
            for col in 0..width {
                let center = row as i64 - r;
                let sum: f32 = (center - r..=center + r)
                    .filter(|&y| y >= 0 && (y as usize) < self.height)
                    .map(|y| horizontal[y as usize * width + col])
                    .sum();
                out.values[row * width + col] = sum / window;
            }
        }
        out
    }
}

// ============================================================================
// Glyph Outlines
// ============================================================================

#[derive(Debug, Clone, Copy)]
struct Edge {
    x0: f64,
    y0: f64,
    x1: f64,
    y1: f64,
}

/// Collects glyph outlines as flattened edges in canvas space (y down).
struct EdgeBuilder {
    edges: Vec<Edge>,
    scale: f64,
    origin_x: f64,
    baseline: f64,
    start: (f64, f64),
    current: (f64, f64),
}

impl EdgeBuilder {
    fn to_canvas(&self, x: f32, y: f32) -> (f64, f64) {
        (
            self.origin_x + x as f64 * self.scale,
            self.baseline - y as f64 * self.scale,
        )
    }

    fn push_line(&mut self, to: (f64, f64)) {
        let from = self.current;
        if from.1 != to.1 {
            self.edges.push(Edge {
                x0: from.0,
                y0: from.1,
                x1: to.0,
                y1: to.1,
            });
        }
        self.current = to;
    }
}

impl OutlineBuilder for EdgeBuilder {
    fn move_to(&mut self, x: f32, y: f32) {
        let p = self.to_canvas(x, y);
        self.start = p;
        self.current = p;
    }

    fn line_to(&mut self, x: f32, y: f32) {
        let p = self.to_canvas(x, y);
        self.push_line(p);
    }

    fn quad_to(&mut self, x1: f32, y1: f32, x: f32, y: f32) {
        let p0 = self.current;
        let c = self.to_canvas(x1, y1);
        let p1 = self.to_canvas(x, y);
        for step in 1..=QUAD_STEPS {
            let t = step as f64 / QUAD_STEPS as f64;
            let mt = 1.0 - t;
            let px = mt * mt * p0.0 + 2.0 * mt * t * c.0 + t * t * p1.0;
            let py = mt * mt * p0.1 + 2.0 * mt * t * c.1 + t * t * p1.1;
            self.push_line((px, py));
        }
    }

    fn curve_to(&mut self, x1: f32, y1: f32, x2: f32, y2: f32, x: f32, y: f32) {
        let p0 = self.current;
        let c1 = self.to_canvas(x1, y1);
        let c2 = self.to_canvas(x2, y2);
        let p1 = self.to_canvas(x, y);
        for step in 1..=CUBIC_STEPS {
            let t = step as f64 / CUBIC_STEPS as f64;
            let mt = 1.0 - t;
            let a = mt * mt * mt;
            let b = 3.0 * mt * mt * t;
            let c = 3.0 * mt * t * t;
            let d = t * t * t;
            let px = a * p0.0 + b * c1.0 + c * c2.0 + d * p1.0;
            let py = a * p0.1 + b * c1.1 + c * c2.1 + d * p1.1;
            self.push_line((px, py));
        }
    }

    fn close(&mut self) {
        let start = self.start;
        self.push_line(start);
    }
}
