//! Drawing surfaces.
//!
//! The renderer draws through [`Surface`], which needs only filled circles,
//! stroked paths, text measurement and text drawing with an optional shadow.
//! Colors carry their own alpha; compositing is "source over".
//!
//! [`RecordingSurface`] keeps a display list of everything drawn. It is what
//! tests assert against, and it exports to SVG.

use crate::projection::CanvasPoint;
use base64::Engine;
use serde::{Deserialize, Serialize};
use std::fmt::Write;

/// RGBA color, straight (non-premultiplied) alpha.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Color {
    pub r: u8,
    pub g: u8,
    pub b: u8,
    pub a: u8,
}

impl Color {
    pub const WHITE: Color = Color::rgb(255, 255, 255);
    pub const BLACK: Color = Color::rgb(0, 0, 0);

    pub const fn rgb(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b, a: 255 }
    }

    pub const fn rgba(r: u8, g: u8, b: u8, a: u8) -> Self {
        Self { r, g, b, a }
    }

    /// Same color with its alpha scaled by `opacity` (0..=1).
    pub fn with_opacity(self, opacity: f64) -> Self {
        let a = (self.a as f64 * opacity.clamp(0.0, 1.0)).round() as u8;
        Self { a, ..self }
    }

    pub fn to_array(self) -> [u8; 4] {
        [self.r, self.g, self.b, self.a]
    }

    /// `#rrggbb`, alpha is emitted separately as an opacity attribute.
    pub fn to_hex(self) -> String {
        format!("#{:02x}{:02x}{:02x}", self.r, self.g, self.b)
    }

    pub fn opacity(self) -> f64 {
        self.a as f64 / 255.0
    }
}

/// Path stroke parameters. Joins and caps are always round.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Stroke {
    pub width: f64,
    pub color: Color,
}

/// Font request: size in pixels and weight.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FontSpec {
    pub size: f64,
    pub bold: bool,
}

impl FontSpec {
    pub fn new(size: f64) -> Self {
        Self { size, bold: false }
    }

    pub fn bold(size: f64) -> Self {
        Self { size, bold: true }
    }
}

/// Drop shadow drawn beneath text.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Shadow {
    pub offset_x: f64,
    pub offset_y: f64,
    pub blur: f64,
    pub color: Color,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TextStyle {
    pub font: FontSpec,
    pub color: Color,
    pub shadow: Option<Shadow>,
}

/// Measured extent of a string.
///
/// `ascent`/`descent` are the ink extents above/below the baseline for this
/// particular string (both positive), not the font's nominal line metrics.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct TextMetrics {
    pub width: f64,
    pub ascent: f64,
    pub descent: f64,
}

impl TextMetrics {
    pub fn height(&self) -> f64 {
        self.ascent + self.descent
    }

    /// Approximate metrics for a sans-serif face when no font file is at hand.
    pub fn estimate(text: &str, font: &FontSpec) -> Self {
        let size = font.size;
        let weight = if font.bold { 1.06 } else { 1.0 };
        let width: f64 = text
            .chars()
            .map(|c| match c {
                ' ' => 0.28,
                'i' | 'j' | 'l' | '.' | ',' | '\'' | '|' | '!' => 0.26,
                'm' | 'w' | 'M' | 'W' => 0.84,
                '0'..='9' => 0.56,
                c if c.is_uppercase() => 0.67,
                _ => 0.53,
            })
            .sum::<f64>()
            * size
            * weight;

        let tall = text
            .chars()
            .any(|c| c.is_uppercase() || c.is_ascii_digit() || "bdfhklt".contains(c));
        let ascent = if tall { 0.72 } else { 0.52 } * size;
        let descent = if text.chars().any(|c| "gjpqy,".contains(c)) {
            0.21 * size
        } else {
            0.0
        };

        Self {
            width,
            ascent,
            descent,
        }
    }
}

/// Text measurement, separated so label layout can run without a canvas.
pub trait TextMeasure {
    fn measure_text(&self, text: &str, font: &FontSpec) -> TextMetrics;
}

/// Something the overlay can be drawn onto.
pub trait Surface: TextMeasure {
    fn width(&self) -> u32;
    fn height(&self) -> u32;

    fn fill_circle(&mut self, center: CanvasPoint, radius: f64, color: Color);

    /// Stroke an open path through `points`.
    fn stroke_path(&mut self, points: &[CanvasPoint], stroke: &Stroke);

    /// Draw `text` with its left end at `origin.x` and baseline at `origin.y`.
    fn fill_text(&mut self, text: &str, origin: CanvasPoint, style: &TextStyle);
}

/// One recorded drawing operation.
#[derive(Debug, Clone, PartialEq)]
pub enum DrawCommand {
    Circle {
        center: CanvasPoint,
        radius: f64,
        color: Color,
    },
    Path {
        points: Vec<CanvasPoint>,
        stroke: Stroke,
    },
    Text {
        text: String,
        origin: CanvasPoint,
        style: TextStyle,
    },
}

/// Surface that records a display list.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordingSurface {
    width: u32,
    height: u32,
    commands: Vec<DrawCommand>,
    /// `href` of an image drawn under every command in the SVG export
    background: Option<String>,
}

impl RecordingSurface {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            commands: Vec::new(),
            background: None,
        }
    }

    /// Embed a PNG as the SVG background, stretched to the canvas.
    pub fn with_background_png(mut self, png: &[u8]) -> Self {
        self.background = Some(format!(
            "data:image/png;base64,{}",
            base64::engine::general_purpose::STANDARD.encode(png)
        ));
        self
    }

    pub fn commands(&self) -> &[DrawCommand] {
        &self.commands
    }

    pub fn clear(&mut self) {
        self.commands.clear();
    }

    /// Texts drawn, in order (shadows are part of the style, not separate entries).
    pub fn texts(&self) -> Vec<&str> {
        self.commands
            .iter()
            .filter_map(|c| match c {
                DrawCommand::Text { text, .. } => Some(text.as_str()),
                _ => None,
            })
            .collect()
    }

    /// Replay the display list onto another surface.
    pub fn replay<S: Surface + ?Sized>(&self, target: &mut S) {
        for command in &self.commands {
            match command {
                DrawCommand::Circle {
                    center,
                    radius,
                    color,
                } => target.fill_circle(*center, *radius, *color),
                DrawCommand::Path { points, stroke } => target.stroke_path(points, stroke),
                DrawCommand::Text {
                    text,
                    origin,
                    style,
                } => target.fill_text(text, *origin, style),
            }
        }
    }

    /// Render the display list as a standalone SVG document.
    pub fn to_svg(&self) -> String {
        let mut svg = String::new();
        // Writing to a String cannot fail
        let _ = writeln!(
            svg,
            r#"<svg xmlns="http://www.w3.org/2000/svg" width="{w}" height="{h}" viewBox="0 0 {w} {h}">"#,
            w = self.width,
            h = self.height
        );

        let mut shadow_filters: Vec<Shadow> = Vec::new();
        let mut body = String::new();
        for command in &self.commands {
            match command {
                DrawCommand::Circle {
                    center,
                    radius,
                    color,
                } => {
                    let _ = writeln!(
                        body,
                        r#"  <circle cx="{:.2}" cy="{:.2}" r="{:.2}" fill="{}" fill-opacity="{:.3}"/>"#,
                        center.x,
                        center.y,
                        radius,
                        color.to_hex(),
                        color.opacity()
                    );
                }
                DrawCommand::Path { points, stroke } => {
                    let coords: Vec<String> = points
                        .iter()
                        .map(|p| format!("{:.2},{:.2}", p.x, p.y))
                        .collect();
                    let _ = writeln!(
                        body,
                        r#"  <polyline points="{}" fill="none" stroke="{}" stroke-opacity="{:.3}" stroke-width="{:.2}" stroke-linejoin="round" stroke-linecap="round"/>"#,
                        coords.join(" "),
                        stroke.color.to_hex(),
                        stroke.color.opacity(),
                        stroke.width
                    );
                }
                DrawCommand::Text {
                    text,
                    origin,
                    style,
                } => {
                    let filter = match style.shadow {
                        Some(shadow) => {
                            let index = match shadow_filters.iter().position(|s| *s == shadow) {
                                Some(i) => i,
                                None => {
                                    shadow_filters.push(shadow);
                                    shadow_filters.len() - 1
                                }
                            };
                            format!(r#" filter="url(#shadow{})""#, index)
                        }
                        None => String::new(),
                    };
                    let _ = writeln!(
                        body,
                        r#"  <text x="{:.2}" y="{:.2}" font-family="sans-serif" font-size="{:.1}" font-weight="{}" fill="{}" fill-opacity="{:.3}"{}>{}</text>"#,
                        origin.x,
                        origin.y,
                        style.font.size,
                        if style.font.bold { "bold" } else { "normal" },
                        style.color.to_hex(),
                        style.color.opacity(),
                        filter,
                        htmlescape::encode_minimal(text)
                    );
                }
            }
        }

        if !shadow_filters.is_empty() {
            svg.push_str("  <defs>\n");
            for (i, shadow) in shadow_filters.iter().enumerate() {
                let _ = writeln!(
                    svg,
                    r#"    <filter id="shadow{}"><feDropShadow dx="{:.1}" dy="{:.1}" stdDeviation="{:.1}" flood-color="{}" flood-opacity="{:.3}"/></filter>"#,
                    i,
                    shadow.offset_x,
                    shadow.offset_y,
                    shadow.blur / 2.0,
                    shadow.color.to_hex(),
                    shadow.color.opacity()
                );
            }
            svg.push_str("  </defs>\n");
        }

        if let Some(href) = &self.background {
            let _ = writeln!(
                svg,
                r#"  <image href="{}" x="0" y="0" width="{}" height="{}" preserveAspectRatio="none"/>"#,
                htmlescape::encode_minimal(href),
                self.width,
                self.height
            );
        }
        svg.push_str(&body);
        svg.push_str("</svg>\n");
        svg
    }
}

impl TextMeasure for RecordingSurface {
    fn measure_text(&self, text: &str, font: &FontSpec) -> TextMetrics {
        TextMetrics::estimate(text, font)
    }
}

impl Surface for RecordingSurface {
    fn width(&self) -> u32 {
        self.width
    }

    fn height(&self) -> u32 {
        self.height
    }

    fn fill_circle(&mut self, center: CanvasPoint, radius: f64, color: Color) {
        self.commands.push(DrawCommand::Circle {
            center,
            radius,
            color,
        });
    }

    fn stroke_path(&mut self, points: &[CanvasPoint], stroke: &Stroke) {
        if points.len() < 2 {
            return;
        }
        self.commands.push(DrawCommand::Path {
            points: points.to_vec(),
            stroke: *stroke,
        });
    }

    fn fill_text(&mut self, text: &str, origin: CanvasPoint, style: &TextStyle) {
        self.commands.push(DrawCommand::Text {
            text: text.to_string(),
            origin,
            style: *style,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_with_opacity() {
        let c = Color::rgb(10, 20, 30).with_opacity(0.6);
        assert_eq!(c.a, 153);
        assert_eq!(Color::WHITE.with_opacity(2.0).a, 255);
    }

    #[test]
    fn test_estimate_metrics() {
        let font = FontSpec::new(20.0);
        let digits = TextMetrics::estimate("12", &font);
        assert!((digits.width - 22.4).abs() < 1e-9);
        assert!((digits.ascent - 14.4).abs() < 1e-9);
        assert_eq!(digits.descent, 0.0);

        let wide = TextMetrics::estimate("Wimbledon", &font);
        let narrow = TextMetrics::estimate("Ilk", &font);
        assert!(wide.width > narrow.width);
        assert!(TextMetrics::estimate("Epping", &font).descent > 0.0);
    }

    #[test]
    fn test_recording_and_svg() {
        let mut surface = RecordingSurface::new(200, 100);
        surface.fill_circle(CanvasPoint::new(10.0, 10.0), 5.0, Color::rgba(34, 197, 94, 89));
        surface.stroke_path(
            &[CanvasPoint::new(0.0, 0.0), CanvasPoint::new(50.0, 50.0)],
            &Stroke {
                width: 4.0,
                color: Color::WHITE,
            },
        );
        surface.stroke_path(&[CanvasPoint::new(0.0, 0.0)], &Stroke {
            width: 4.0,
            color: Color::WHITE,
        });
        let style = TextStyle {
            font: FontSpec::new(12.0),
            color: Color::WHITE,
            shadow: Some(Shadow {
                offset_x: 1.0,
                offset_y: 1.0,
                blur: 4.0,
                color: Color::BLACK,
            }),
        };
        surface.fill_text("Fish & Chips <Town>", CanvasPoint::new(20.0, 40.0), &style);

        // Single-point path is not recorded
        assert_eq!(surface.commands().len(), 3);
        assert_eq!(surface.texts(), vec!["Fish & Chips <Town>"]);

        let svg = surface.to_svg();
        assert!(svg.starts_with("<svg"));
        assert!(svg.contains(r##"fill="#22c55e""##));
        assert!(svg.contains("Fish &amp; Chips &lt;Town&gt;"));
        assert!(svg.contains(r#"filter="url(#shadow0)""#));
        assert!(svg.contains("<feDropShadow"));
        assert!(svg.trim_end().ends_with("</svg>"));
    }

    #[test]
    fn test_svg_background_under_layers() {
        let mut surface =
            RecordingSurface::new(40, 30).with_background_png(&[0x89, b'P', b'N', b'G']);
        surface.fill_circle(CanvasPoint::new(5.0, 5.0), 2.0, Color::BLACK);

        let svg = surface.to_svg();
        let image = svg
            .find(r#"<image href="data:image/png;base64,iVBORw==""#)
            .expect("background image");
        let circle = svg.find("<circle").expect("circle");
        assert!(image < circle);
        assert!(svg.contains(r#"width="40" height="30" preserveAspectRatio="none""#));

        assert!(!RecordingSurface::new(40, 30).to_svg().contains("<image"));
    }

    #[test]
    fn test_replay_reproduces_commands() {
        let mut source = RecordingSurface::new(10, 10);
        source.fill_circle(CanvasPoint::new(1.0, 2.0), 3.0, Color::BLACK);
        let mut copy = RecordingSurface::new(10, 10);
        source.replay(&mut copy);
        assert_eq!(copy, source);
    }
}
