// src/visual/svg.rs
//! Built-in SVG renderers: single-point all-sky (Aitoff) map and the text card.

use std::f64::consts::{FRAC_PI_2, PI};
use std::fmt::Write as _;

use crate::alert::SkyPosition;

pub const SVG_MIME: &str = "image/svg+xml";

const MAP_W: f64 = 800.0;
const MAP_H: f64 = 460.0;
const MAP_MARGIN: f64 = 40.0;

const CARD_W: u32 = 1000;
const CARD_H: u32 = 600;
const CARD_MAX_LINES: usize = 5;

/// Aitoff projection of (longitude, latitude) in radians → plane coordinates,
/// x in [-π, π], y in [-π/2, π/2].
pub fn aitoff(lon: f64, lat: f64) -> (f64, f64) {
    let alpha = (lat.cos() * (lon / 2.0).cos()).acos();
    let sinc = if alpha.abs() < 1e-12 {
        1.0
    } else {
        alpha.sin() / alpha
    };
    (
        2.0 * lat.cos() * (lon / 2.0).sin() / sinc,
        lat.sin() / sinc,
    )
}

/// Sky longitude for plotting: RA grows to the left, RA=180° sits in the middle.
fn plot_longitude(ra_deg: f64) -> f64 {
    let lon = PI - ra_deg.to_radians();
    if lon > PI {
        lon - 2.0 * PI
    } else {
        lon
    }
}

struct Canvas {
    scale: f64,
    cx: f64,
    cy: f64,
}

impl Canvas {
    fn new() -> Self {
        let sx = (MAP_W - 2.0 * MAP_MARGIN) / (2.0 * PI);
        let sy = (MAP_H - 2.0 * MAP_MARGIN) / PI;
        Self {
            scale: sx.min(sy),
            cx: MAP_W / 2.0,
            cy: MAP_H / 2.0 + 10.0,
        }
    }

    fn point(&self, lon: f64, lat: f64) -> (f64, f64) {
        let (x, y) = aitoff(lon, lat);
        (self.cx + x * self.scale, self.cy - y * self.scale)
    }

    /// Polyline through `samples` as an SVG path `d` attribute.
    fn path(&self, samples: impl Iterator<Item = (f64, f64)>) -> String {
        let mut d = String::new();
        for (i, (lon, lat)) in samples.enumerate() {
            let (x, y) = self.point(lon, lat);
            let _ = write!(d, "{}{x:.1},{y:.1} ", if i == 0 { 'M' } else { 'L' });
        }
        d
    }
}

fn degrees(from: i32, to: i32, step: usize) -> impl Iterator<Item = f64> {
    (from..=to).step_by(step).map(|d| f64::from(d).to_radians())
}

/// All-sky map with a graticule and one marker at `pos`.
pub fn aitoff_point(pos: SkyPosition, title: &str) -> String {
    let c = Canvas::new();
    let mut svg = String::new();
    let _ = write!(
        svg,
        r#"<svg xmlns="http://www.w3.org/2000/svg" width="{MAP_W}" height="{MAP_H}" viewBox="0 0 {MAP_W} {MAP_H}">"#
    );
    svg.push_str(r#"<rect width="100%" height="100%" fill="white"/>"#);
    let _ = write!(
        svg,
        r#"<text x="{:.1}" y="24" font-family="sans-serif" font-size="18" text-anchor="middle">{}</text>"#,
        MAP_W / 2.0,
        html_escape::encode_text(title)
    );

    // Outline and graticule.
    for edge in [-PI, PI] {
        let d = c.path(degrees(-90, 90, 5).map(|lat| (edge, lat)));
        let _ = write!(
            svg,
            r##"<path d="{d}" fill="none" stroke="#444" stroke-width="1.5"/>"##
        );
    }
    for lon in degrees(-120, 120, 60) {
        let d = c.path(degrees(-90, 90, 5).map(|lat| (lon, lat)));
        let _ = write!(svg, r##"<path d="{d}" fill="none" stroke="#bbb"/>"##);
    }
    for lat in degrees(-60, 60, 30) {
        let d = c.path(degrees(-180, 180, 5).map(|lon| (lon, lat)));
        let _ = write!(svg, r##"<path d="{d}" fill="none" stroke="#bbb"/>"##);
    }

    let lat = pos.dec_deg.to_radians().clamp(-FRAC_PI_2, FRAC_PI_2);
    let (x, y) = c.point(plot_longitude(pos.ra_deg), lat);
    let _ = write!(
        svg,
        r##"<circle cx="{x:.1}" cy="{y:.1}" r="7" fill="#d62728" stroke="black"/>"##
    );
    let _ = write!(
        svg,
        r#"<text x="{:.1}" y="{:.1}" font-family="sans-serif" font-size="14" text-anchor="middle">RA {:.3}° Dec {:.3}°</text>"#,
        MAP_W / 2.0,
        MAP_H - 8.0,
        pos.ra_deg,
        pos.dec_deg
    );
    svg.push_str("</svg>");
    svg
}

/// Dark text card: first caption line as title, then the next few lines.
pub fn quick_card(caption: &str) -> String {
    let mut lines = caption.lines().map(str::trim).filter(|l| !l.is_empty());
    let title = lines.next().unwrap_or("GCN alert");

    let mut svg = String::new();
    let _ = write!(
        svg,
        r#"<svg xmlns="http://www.w3.org/2000/svg" width="{CARD_W}" height="{CARD_H}" viewBox="0 0 {CARD_W} {CARD_H}">"#
    );
    svg.push_str(r##"<rect width="100%" height="100%" fill="#121218"/>"##);
    let _ = write!(
        svg,
        r##"<rect x="20" y="20" width="{}" height="{}" rx="30" fill="none" stroke="#5a5a78" stroke-width="4"/>"##,
        CARD_W - 40,
        CARD_H - 40
    );
    let _ = write!(
        svg,
        r##"<text x="50" y="100" font-family="sans-serif" font-size="56" fill="#dcdcfa">{}</text>"##,
        html_escape::encode_text(title)
    );
    for (i, line) in lines.take(CARD_MAX_LINES).enumerate() {
        let _ = write!(
            svg,
            r##"<text x="50" y="{}" font-family="sans-serif" font-size="32" fill="#c8c8d2">{}</text>"##,
            180 + 48 * i,
            html_escape::encode_text(line)
        );
    }
    svg.push_str("</svg>");
    svg
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn aitoff_center_and_edges() {
        let (x, y) = aitoff(0.0, 0.0);
        assert!(x.abs() < 1e-12 && y.abs() < 1e-12);
        let (x, _) = aitoff(PI, 0.0);
        assert!((x - PI).abs() < 1e-9);
        let (_, y) = aitoff(0.0, FRAC_PI_2);
        assert!((y - FRAC_PI_2).abs() < 1e-9);
    }

    #[test]
    fn ra_180_plots_at_center() {
        assert!(plot_longitude(180.0).abs() < 1e-12);
        assert!(plot_longitude(0.0) > 0.0);
        assert!(plot_longitude(270.0) < 0.0);
    }

    #[test]
    fn card_escapes_and_limits_lines() {
        let caption = "GW <S1> & co\n1\n2\n3\n4\n5\n6\n7";
        let svg = quick_card(caption);
        assert!(svg.contains("GW &lt;S1&gt; &amp; co"));
        assert!(svg.contains(">5</text>"));
        assert!(!svg.contains(">6</text>"));
    }

    #[test]
    fn point_map_mentions_coordinates() {
        let svg = aitoff_point(SkyPosition::new(123.4, -45.6).unwrap(), "Localization");
        assert!(svg.starts_with("<svg"));
        assert!(svg.contains("RA 123.400° Dec -45.600°"));
        assert!(svg.contains("<circle"));
    }
}
