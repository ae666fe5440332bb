// src/classify/guano.rs
//! Swift-BAT GUANO notices (JSON). Only GRB traffic with something to show is kept.

use serde_json::{Map, Value};

use super::{find_image_url, text_field};
use crate::alert::{fmt_opt, Alert, Category, SkyPosition};

pub(super) fn parse(obj: &Map<String, Value>) -> Option<Alert> {
    let notice_type = text_field(obj, &["notice_type", "type"]).unwrap_or_default();
    let name = text_field(obj, &["event_name", "name"]).unwrap_or_default();
    let t0 = text_field(obj, &["event_time", "time"]);

    let is_grb = name.to_ascii_uppercase().contains("GRB")
        || notice_type.to_ascii_uppercase().contains("GRB");
    if !is_grb {
        return None;
    }

    let ra = obj.get("ra").and_then(Value::as_f64);
    let dec = obj.get("dec").and_then(Value::as_f64);
    // Out-of-range coordinates count as no position at all.
    let position = ra.zip(dec).and_then(|(r, d)| SkyPosition::new(r, d));
    let skymap = obj
        .get("skymap")
        .and_then(Value::as_object)
        .and_then(|s| text_field(s, &["url"]));

    if position.is_none() && skymap.is_none() {
        return None;
    }

    let caption = format!(
        "Swift-BAT GUANO\nEvent: {}   T0: {}\nRA: {}  Dec: {}",
        if name.is_empty() { "—" } else { name.as_str() },
        t0.as_deref().unwrap_or("—"),
        fmt_opt(position.map(|p| p.ra_deg), 3),
        fmt_opt(position.map(|p| p.dec_deg), 3),
    );

    let mut alert = Alert::new(Category::GammaRayBurst, caption);
    alert.label = (!name.is_empty()).then_some(name);
    alert.position = position;
    alert.skymap_url = skymap;
    alert.image_url = find_image_url(obj);
    Some(alert)
}
