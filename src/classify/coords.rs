// src/classify/coords.rs
//! Textual coordinate extraction.
//!
//! Notices and circulars print positions in a handful of known layouts. Each layout
//! is one isolated extractor; callers walk an ordered list and the first hit wins.

use once_cell::sync::Lazy;
use regex::{Captures, Regex};

use crate::alert::SkyPosition;

/// A single "try to parse a position out of this text" strategy.
pub trait CoordinateExtractor: Send + Sync {
    fn name(&self) -> &'static str;
    fn extract(&self, text: &str) -> Option<SkyPosition>;
}

/// Decimal-degree RA/Dec pair captured by groups 1 and 2 of one regex.
pub struct DecimalPairExtractor {
    name: &'static str,
    re: Regex,
}

impl DecimalPairExtractor {
    fn new(name: &'static str, pattern: &str) -> Self {
        Self {
            name,
            re: Regex::new(pattern).expect("coordinate pattern"),
        }
    }
}

impl CoordinateExtractor for DecimalPairExtractor {
    fn name(&self) -> &'static str {
        self.name
    }

    fn extract(&self, text: &str) -> Option<SkyPosition> {
        // A match with out-of-range numbers is a miss; later layouts still get a chance.
        self.re.captures_iter(text).find_map(|caps| {
            let ra = caps.get(1)?.as_str().parse::<f64>().ok()?;
            let dec = caps.get(2)?.as_str().parse::<f64>().ok()?;
            SkyPosition::new(ra, dec)
        })
    }
}

const NUM: &str = r"([+\-]?\d+(?:\.\d+)?)";

static NOTICE_EXTRACTORS: Lazy<Vec<DecimalPairExtractor>> = Lazy::new(|| {
    vec![
        // RA=123.4 ... DEC=-45.6
        DecimalPairExtractor::new(
            "labelled_equals",
            &format!(r"(?is)RA\s*=\s*{NUM}\D+DEC\s*=\s*{NUM}"),
        ),
        // RA,DEC,ERR = 123.4, -45.6, 3
        DecimalPairExtractor::new(
            "comma_triplet",
            &format!(r"(?is)RA\s*,\s*DEC\s*,\s*ERR\s*=\s*{NUM}[,\s]+{NUM}[,\s]+\d"),
        ),
        // RA (J2000) 123.4 ... DEC (J2000) -45.6
        DecimalPairExtractor::new(
            "j2000_labelled",
            &format!(r"(?is)RA\s*\(J2000\)\s*{NUM}\D+DEC\s*\(J2000\)\s*{NUM}"),
        ),
        // RA: 123.4, DEC: -45.6
        DecimalPairExtractor::new(
            "colon_delimited",
            &format!(r"(?is)RA\s*:\s*{NUM}\s*[,;]\s*DEC\s*:\s*{NUM}"),
        ),
        // RA 123.4 deg, DEC -45.6 deg
        DecimalPairExtractor::new(
            "deg_suffixed",
            &format!(r"(?is)RA\s*{NUM}\s*deg\W+DEC[^\w+\-]*{NUM}\s*deg"),
        ),
        // Classic GCN notice fields: GRB_RA: 123.456d {...} / GRB_DEC: -45.678d {...}
        DecimalPairExtractor::new(
            "notice_fields",
            &format!(r"(?is)GRB_RA:\s*{NUM}d?.*?GRB_DEC:\s*{NUM}d?"),
        ),
    ]
});

/// The ordered extractor chain used for classic text notices.
pub fn notice_extractors() -> impl Iterator<Item = &'static dyn CoordinateExtractor> {
    NOTICE_EXTRACTORS
        .iter()
        .map(|e| e as &'static dyn CoordinateExtractor)
}

/// First extractor that yields a valid position, with its name for diagnostics.
pub fn extract_position(text: &str) -> Option<(SkyPosition, &'static str)> {
    notice_extractors().find_map(|e| e.extract(text).map(|p| (p, e.name())))
}

static LABEL_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        r"(?i)GRB\s+\d{6}[A-Z]?",
        r"(?i)TRIGGER[_\s]*ID[:=\s]+\S+",
        r"(?i)NOTICE_TYPE:[^\n]+",
    ]
    .iter()
    .map(|p| Regex::new(p).expect("label pattern"))
    .collect()
});

/// Event label: GRB designation, then trigger id, then notice type.
pub fn extract_event_label(text: &str) -> Option<String> {
    LABEL_PATTERNS
        .iter()
        .find_map(|re| re.find(text))
        .map(|m| m.as_str().trim().to_string())
        .filter(|s| !s.is_empty())
}

static IMAGE_LINK: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)(https?://\S+?\.(?:png|jpe?g))\b").expect("image link"));

/// First http(s) link to a png/jpg in free text.
pub fn find_image_link(text: &str) -> Option<String> {
    IMAGE_LINK
        .captures(text)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_string())
}

/// Position read from a circular, with the sexagesimal strings for display.
#[derive(Debug, Clone, PartialEq)]
pub struct SexagesimalFix {
    pub position: SkyPosition,
    pub ra_text: String,
    pub dec_text: String,
    pub uncertainty_arcsec: Option<f64>,
}

static SEX_RA: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r#"(?i)RA\s*\(J2000\)\s*[:=]?\s*([0-2]?\d)[h:\s]+([0-5]?\d)[m:\s]+([0-5]?\d(?:\.\d+)?)[s"]?"#,
    )
    .expect("sexagesimal ra")
});

static SEX_DEC: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r#"(?i)Dec\s*\(J2000\)\s*[:=]?\s*([+\-]?)(\d{1,3})[d°:\s]+([0-5]?\d)['m:\s]+([0-5]?\d(?:\.\d+)?)(?:["s])?"#,
    )
    .expect("sexagesimal dec")
});

static UNC_BEFORE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)(?:uncertainty|radius)\s+of\s+(\d+(?:\.\d+)?)\s*arcsec").expect("unc")
});

static UNC_AFTER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)(\d+(?:\.\d+)?)\s*arcsec\s*(?:uncertainty|radius)").expect("unc")
});

fn group<T: std::str::FromStr>(caps: &Captures<'_>, i: usize) -> Option<T> {
    caps.get(i)?.as_str().parse().ok()
}

/// RA h:m:s → degrees.
pub fn hms_to_deg(h: u32, m: u32, s: f64) -> f64 {
    (f64::from(h) + f64::from(m) / 60.0 + s / 3600.0) * 15.0
}

/// Dec ±d:m:s → degrees; the sign is passed separately so "-00" keeps it.
pub fn dms_to_deg(negative: bool, d: u32, m: u32, s: f64) -> f64 {
    let v = f64::from(d) + f64::from(m) / 60.0 + s / 3600.0;
    if negative {
        -v
    } else {
        v
    }
}

/// Uncertainty in arcsec, "uncertainty of N arcsec" or "N arcsec radius".
pub fn extract_uncertainty_arcsec(text: &str) -> Option<f64> {
    [&*UNC_BEFORE, &*UNC_AFTER]
        .into_iter()
        .find_map(|re| re.captures(text).and_then(|c| group::<f64>(&c, 1)))
}

/// "RA (J2000): 12h 34m 56.7s" / "Dec (J2000): -01d 02' 03.4\"" pairs.
pub fn extract_sexagesimal(text: &str) -> Option<SexagesimalFix> {
    let ra = SEX_RA.captures(text)?;
    let dec = SEX_DEC.captures(text)?;

    let (h, rm, rs) = (group::<u32>(&ra, 1)?, group::<u32>(&ra, 2)?, group::<f64>(&ra, 3)?);
    let negative = dec.get(1).is_some_and(|m| m.as_str() == "-");
    let (d, dm, ds) = (
        group::<u32>(&dec, 2)?,
        group::<u32>(&dec, 3)?,
        group::<f64>(&dec, 4)?,
    );

    let position = SkyPosition::new(hms_to_deg(h, rm, rs), dms_to_deg(negative, d, dm, ds))?;
    let sign = if negative { "-" } else { "" };

    Some(SexagesimalFix {
        position,
        ra_text: format!("{h}h {rm}m {rs:.2}s"),
        dec_text: format!("{sign}{d}d {dm}' {ds:.2}\""),
        uncertainty_arcsec: extract_uncertainty_arcsec(text),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pos(text: &str) -> Option<(f64, f64, &'static str)> {
        extract_position(text).map(|(p, n)| (p.ra_deg, p.dec_deg, n))
    }

    #[test]
    fn each_layout_is_recognized() {
        assert_eq!(
            pos("RA=123.4 DEC=-45.6"),
            Some((123.4, -45.6, "labelled_equals"))
        );
        assert_eq!(
            pos("RA,DEC,ERR = 10.5, 20.25, 3"),
            Some((10.5, 20.25, "comma_triplet"))
        );
        assert_eq!(
            pos("RA (J2000) 200.1 and DEC (J2000) +12.0"),
            Some((200.1, 12.0, "j2000_labelled"))
        );
        assert_eq!(
            pos("RA: 15.0, DEC: -3.5"),
            Some((15.0, -3.5, "colon_delimited"))
        );
        assert_eq!(
            pos("RA 250.0 deg, DEC -10.0 deg"),
            Some((250.0, -10.0, "deg_suffixed"))
        );
        assert_eq!(
            pos("GRB_RA:   123.456d {+08h 13m 49s} (J2000),\nGRB_DEC:  -45.678d {-45d 40' 40\"}"),
            Some((123.456, -45.678, "notice_fields"))
        );
    }

    #[test]
    fn first_matching_layout_wins() {
        let text = "RA=1.0 DEC=2.0\nRA: 3.0, DEC: 4.0";
        assert_eq!(pos(text), Some((1.0, 2.0, "labelled_equals")));
    }

    #[test]
    fn out_of_range_values_fall_through() {
        let text = "RA=400.0 DEC=2.0\nRA: 3.0, DEC: 4.0";
        assert_eq!(pos(text), Some((3.0, 4.0, "colon_delimited")));
        assert_eq!(pos("no coordinates here"), None);
    }

    #[test]
    fn labels_in_priority_order() {
        assert_eq!(
            extract_event_label("TRIGGER_ID: 12345 GRB 230512A"),
            Some("GRB 230512A".to_string())
        );
        assert_eq!(
            extract_event_label("TRIGGER_ID: 12345\nfoo"),
            Some("TRIGGER_ID: 12345".to_string())
        );
        assert_eq!(
            extract_event_label("NOTICE_TYPE: Fermi-GBM Flight Position\nX"),
            Some("NOTICE_TYPE: Fermi-GBM Flight Position".to_string())
        );
        assert_eq!(extract_event_label("nothing"), None);
    }

    #[test]
    fn image_link_found_in_text() {
        assert_eq!(
            find_image_link("see https://x.org/a/b.PNG for map"),
            Some("https://x.org/a/b.PNG".to_string())
        );
        assert_eq!(find_image_link("https://x.org/a.fits"), None);
    }

    #[test]
    fn sexagesimal_with_uncertainty() {
        let t = "RA (J2000): 12h 30m 00.0s Dec (J2000): +45d 30' 00.0\" with an uncertainty of 2.5 arcsec";
        let fix = extract_sexagesimal(t).expect("fix");
        assert!((fix.position.ra_deg - 187.5).abs() < 1e-9);
        assert!((fix.position.dec_deg - 45.5).abs() < 1e-9);
        assert_eq!(fix.uncertainty_arcsec, Some(2.5));
        assert_eq!(fix.ra_text, "12h 30m 0.00s");
    }

    #[test]
    fn negative_zero_degree_declination_keeps_sign() {
        let t = "RA (J2000) = 01:00:00.0 Dec (J2000) = -00:30:00.0, 1.2 arcsec radius";
        let fix = extract_sexagesimal(t).expect("fix");
        assert!((fix.position.dec_deg + 0.5).abs() < 1e-9);
        assert!(fix.dec_text.starts_with('-'));
        assert_eq!(fix.uncertainty_arcsec, Some(1.2));
    }
}
