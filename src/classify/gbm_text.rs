// src/classify/gbm_text.rs
//! Fermi-GBM classic text notices.

use super::coords::{extract_event_label, extract_position, find_image_link};
use crate::alert::{Alert, Category};

pub(super) fn parse(text: &str) -> Option<Alert> {
    if !text.to_ascii_uppercase().contains("GRB") {
        return None;
    }

    let label = extract_event_label(text);
    let image_url = find_image_link(text);

    let alert = match extract_position(text) {
        Some((pos, layout)) => {
            tracing::debug!(target: "classify", layout, "text notice position");
            let caption = format!(
                "Fermi-GBM alert\nEvent: {}\nRA: {:.3}  Dec: {:.3}",
                label.as_deref().unwrap_or("—"),
                pos.ra_deg,
                pos.dec_deg
            );
            let mut a = Alert::new(Category::GammaRayBurst, caption);
            a.position = Some(pos);
            a
        }
        // No position: still worth sending if the notice links a picture.
        None if image_url.is_some() => {
            let caption = format!(
                "Fermi-GBM alert\nEvent: {}\nRA/Dec not available in notice",
                label.as_deref().unwrap_or("GRB (details in notice)")
            );
            Alert::new(Category::GammaRayBurst, caption)
        }
        None => return None,
    };

    Some(Alert {
        label,
        image_url,
        ..alert
    })
}
