// src/classify/gw.rs
//! IGWN gravitational-wave alerts (JSON).

use serde_json::{Map, Value};

use super::{find_image_url, text_field};
use crate::alert::{Alert, Category};

const CLASSES: [&str; 5] = ["BNS", "NSBH", "BBH", "MassGap", "Terrestrial"];

/// Always yields an alert; preliminary stages come back with `suppress = true`.
pub(super) fn parse(obj: &Map<String, Value>) -> Alert {
    let event_id = text_field(obj, &["superevent_id", "superevent"])
        .unwrap_or_else(|| "GW event".to_string());
    let stage = text_field(obj, &["alert_type", "alerttype"])
        .unwrap_or_else(|| "notice".to_string())
        .to_lowercase();

    let event = obj.get("event").and_then(Value::as_object);
    let gps_time = event
        .and_then(|e| text_field(e, &["time"]))
        .unwrap_or_else(|| "—".to_string());
    let far = event
        .and_then(|e| e.get("far"))
        .and_then(Value::as_f64)
        .map(|f| format!("{f:.3e}"))
        .unwrap_or_else(|| "—".to_string());
    let classes = event
        .and_then(|e| e.get("classification"))
        .and_then(Value::as_object)
        .map(classification_summary)
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| "—".to_string());

    let caption = format!(
        "GW {event_id} | {stage}\nGPS: {gps_time} | FAR: {far} Hz\nClassification: {classes}"
    );

    let mut alert = Alert::new(Category::GravitationalWave, caption);
    alert.label = Some(event_id);
    alert.skymap_url = skymap_url(obj);
    alert.image_url = find_image_url(obj);
    alert.suppress = stage.contains("prelim");
    alert
}

fn classification_summary(clas: &Map<String, Value>) -> String {
    CLASSES
        .iter()
        .filter_map(|k| {
            let p = clas.get(*k)?.as_f64()?;
            Some(format!("{k}:{}%", (100.0 * p).round() as i64))
        })
        .collect::<Vec<_>>()
        .join(" | ")
}

/// `skymap.url`, else `links.skymap`, else `links.event_page`.
fn skymap_url(obj: &Map<String, Value>) -> Option<String> {
    let direct = obj
        .get("skymap")
        .and_then(Value::as_object)
        .and_then(|s| text_field(s, &["url"]));
    direct.or_else(|| {
        obj.get("links")
            .and_then(Value::as_object)
            .and_then(|l| text_field(l, &["skymap", "event_page"]))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn obj(v: Value) -> Map<String, Value> {
        v.as_object().cloned().unwrap()
    }

    #[test]
    fn preliminary_is_suppressed() {
        let a = parse(&obj(serde_json::json!({
            "superevent_id": "S230518h",
            "alert_type": "PRELIMINARY",
        })));
        assert!(a.suppress);
        assert!(!a.is_deliverable());
    }

    #[test]
    fn initial_alert_extracts_fields() {
        let a = parse(&obj(serde_json::json!({
            "superevent_id": "S230518h",
            "alert_type": "INITIAL",
            "event": {
                "time": "2023-05-18T12:59:08.167Z",
                "far": 1.0e-10,
                "classification": {"BNS": 0.0, "NSBH": 0.86, "BBH": 0.0, "Terrestrial": 0.14}
            },
            "links": {"skymap": "https://gracedb/S230518h/bayestar.multiorder.fits"}
        })));
        assert!(!a.suppress);
        assert_eq!(a.category, Category::GravitationalWave);
        assert_eq!(a.label.as_deref(), Some("S230518h"));
        assert!(a.caption.starts_with("GW S230518h | initial"));
        assert!(a.caption.contains("NSBH:86%"));
        assert!(a.caption.contains("Terrestrial:14%"));
        assert!(a.caption.contains("FAR: 1.000e-10 Hz"));
        assert_eq!(
            a.skymap_url.as_deref(),
            Some("https://gracedb/S230518h/bayestar.multiorder.fits")
        );
    }

    #[test]
    fn dedicated_skymap_field_wins_over_links() {
        let a = parse(&obj(serde_json::json!({
            "superevent": "S1",
            "skymap": {"url": "https://a/skymap.fits.gz"},
            "links": {"skymap": "https://b/other.fits", "event_page": "https://b/page"}
        })));
        assert_eq!(a.skymap_url.as_deref(), Some("https://a/skymap.fits.gz"));
        assert!(a.caption.contains("| notice"));

        let a = parse(&obj(serde_json::json!({"links": {"event_page": "https://b/page"}})));
        assert_eq!(a.skymap_url.as_deref(), Some("https://b/page"));
        assert_eq!(a.label.as_deref(), Some("GW event"));
    }
}
