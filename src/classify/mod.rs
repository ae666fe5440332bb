// src/classify/mod.rs
//! Notice classifier: `(source topic, raw payload)` → normalized [`Alert`] or nothing.
//!
//! The parser is picked by topic. Structured vs. text is decided by trying a JSON
//! decode first and falling back to text. Anything unrecognized is simply `None`.

pub mod coords;
mod gbm_text;
mod guano;
mod gw;

use serde_json::{Map, Value};

use crate::alert::Alert;

/// Which parser family a stream topic belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceKind {
    /// IGWN gravitational-wave alerts (JSON).
    GravitationalWave,
    /// Swift-BAT GUANO notices (JSON).
    GrbStructured,
    /// Fermi-GBM classic text notices.
    GrbText,
}

impl SourceKind {
    pub fn from_topic(topic: &str) -> Option<Self> {
        if topic.starts_with("igwn.gwalert") {
            Some(Self::GravitationalWave)
        } else if topic.starts_with("gcn.notices.swift.bat.guano") {
            Some(Self::GrbStructured)
        } else if topic.to_ascii_uppercase().contains("FERMI_GBM") {
            Some(Self::GrbText)
        } else {
            None
        }
    }
}

/// Classify one stream payload. Suppressed alerts are returned (flagged), so callers
/// can count them; only `is_deliverable()` alerts may be dispatched.
pub fn classify(topic: &str, payload: &[u8]) -> Option<Alert> {
    let kind = SourceKind::from_topic(topic)?;

    match serde_json::from_slice::<Value>(payload) {
        Ok(Value::Object(obj)) => match kind {
            SourceKind::GravitationalWave => Some(gw::parse(&obj)),
            SourceKind::GrbStructured => guano::parse(&obj),
            SourceKind::GrbText => None,
        },
        _ => match kind {
            SourceKind::GrbText => gbm_text::parse(&String::from_utf8_lossy(payload)),
            _ => None,
        },
    }
}

/// First present key among `keys`, as display text (strings verbatim, numbers formatted).
pub(crate) fn text_field(obj: &Map<String, Value>, keys: &[&str]) -> Option<String> {
    keys.iter().find_map(|k| match obj.get(*k)? {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    })
}

const IMAGE_EXTS: [&str; 3] = [".png", ".jpg", ".jpeg"];
const IMAGE_KEYS: [&str; 5] = ["image_url", "image", "preview", "thumbnail", "quicklook"];

fn is_image_link(s: &str) -> bool {
    let lower = s.to_ascii_lowercase();
    IMAGE_EXTS.iter().any(|ext| lower.ends_with(ext))
}

/// Pre-rendered image link: well-known keys first, then a depth-first scan in which
/// each container's own strings are checked before any nested container.
pub(crate) fn find_image_url(obj: &Map<String, Value>) -> Option<String> {
    for key in IMAGE_KEYS {
        if let Some(Value::String(s)) = obj.get(key) {
            if is_image_link(s) {
                return Some(s.clone());
            }
        }
    }

    let mut stack: Vec<Vec<&Value>> = vec![obj.values().collect()];
    while let Some(children) = stack.pop() {
        let mut nested: Vec<Vec<&Value>> = Vec::new();
        for v in children {
            match v {
                Value::String(s) if is_image_link(s) => return Some(s.clone()),
                Value::Object(m) => nested.push(m.values().collect()),
                Value::Array(a) => nested.push(a.iter().collect()),
                _ => {}
            }
        }
        stack.extend(nested);
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alert::Category;

    #[test]
    fn topics_map_to_parsers() {
        assert_eq!(
            SourceKind::from_topic("igwn.gwalert"),
            Some(SourceKind::GravitationalWave)
        );
        assert_eq!(
            SourceKind::from_topic("gcn.notices.swift.bat.guano"),
            Some(SourceKind::GrbStructured)
        );
        assert_eq!(
            SourceKind::from_topic("gcn.classic.text.FERMI_GBM_FLT_POS"),
            Some(SourceKind::GrbText)
        );
        assert_eq!(SourceKind::from_topic("gcn.classic.text.SWIFT_BAT"), None);
    }

    #[test]
    fn unknown_topic_or_garbage_is_none() {
        assert!(classify("some.other.topic", b"{\"a\":1}").is_none());
        assert!(classify("igwn.gwalert", b"not json at all").is_none());
        assert!(classify("gcn.classic.text.FERMI_GBM_ALERT", b"{\"GRB\":1}").is_none());
    }

    #[test]
    fn text_notice_is_classified_as_grb() {
        let a = classify(
            "gcn.classic.text.FERMI_GBM_FLT_POS",
            b"...GRB 230512A... RA=123.4 DEC=-45.6...",
        )
        .expect("alert");
        assert_eq!(a.category, Category::GammaRayBurst);
        assert_eq!(a.label.as_deref(), Some("GRB 230512A"));
    }

    #[test]
    fn image_url_prefers_known_keys_then_scans() {
        let v: Value = serde_json::json!({
            "image": "https://a/b.png",
            "nested": {"x": ["https://c/d.jpg"]}
        });
        assert_eq!(
            find_image_url(v.as_object().unwrap()),
            Some("https://a/b.png".into())
        );

        let v: Value = serde_json::json!({"nested": {"x": ["nope", "https://c/d.JPEG"]}});
        assert_eq!(
            find_image_url(v.as_object().unwrap()),
            Some("https://c/d.JPEG".into())
        );

        let v: Value = serde_json::json!({"skymap": "https://c/d.fits"});
        assert_eq!(find_image_url(v.as_object().unwrap()), None);
    }

    #[test]
    fn image_scan_checks_own_strings_before_nesting() {
        let v: Value = serde_json::json!({
            "a": "https://x/top.png",
            "b": {"c": "https://x/nested.png"}
        });
        assert_eq!(
            find_image_url(v.as_object().unwrap()),
            Some("https://x/top.png".into())
        );
    }
}
