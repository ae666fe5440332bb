//! alert.rs — The normalized alert every source format is classified into.
//!
//! Alerts are ephemeral: produced per stream message or bulletin, handed to the
//! visual resolver and fan-out, then dropped (a bounded copy lives in `recent`).

use serde::{Deserialize, Serialize};
use std::fmt;

/// Alert category, doubling as the subscriber filter key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Category {
    GravitationalWave,
    GammaRayBurst,
    Bulletin,
}

impl Category {
    pub const ALL: [Category; 3] = [
        Category::GravitationalWave,
        Category::GammaRayBurst,
        Category::Bulletin,
    ];

    /// Key used in the persisted subscriber filters.
    pub fn filter_key(self) -> &'static str {
        match self {
            Category::GravitationalWave => "gw",
            Category::GammaRayBurst => "swiftfermi",
            Category::Bulletin => "circulars",
        }
    }

    pub fn from_filter_key(key: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|c| c.filter_key() == key)
    }

    /// Human label for menus and status text.
    pub fn label(self) -> &'static str {
        match self {
            Category::GravitationalWave => "GW LIGO/Virgo/KAGRA",
            Category::GammaRayBurst => "Swift/Fermi (GRB only)",
            Category::Bulletin => "GCN Circulars",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.filter_key())
    }
}

/// Equatorial J2000 position in degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SkyPosition {
    pub ra_deg: f64,
    pub dec_deg: f64,
}

impl SkyPosition {
    /// Accepts RA in [0,360) and Dec in [-90,90]; anything else (or NaN) is `None`.
    pub fn new(ra_deg: f64, dec_deg: f64) -> Option<Self> {
        let ra_ok = (0.0..360.0).contains(&ra_deg);
        let dec_ok = (-90.0..=90.0).contains(&dec_deg);
        (ra_ok && dec_ok).then_some(Self { ra_deg, dec_deg })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    pub category: Category,
    /// Short plain-text summary; first line is the headline.
    pub caption: String,
    /// Event label such as "GRB 230512A" or "S230518h", when one was found.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub position: Option<SkyPosition>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub position_uncertainty_arcsec: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub skymap_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
    /// Preliminary/incomplete alerts; never delivered.
    #[serde(default)]
    pub suppress: bool,
}

impl Alert {
    pub fn new(category: Category, caption: impl Into<String>) -> Self {
        Self {
            category,
            caption: caption.into(),
            label: None,
            position: None,
            position_uncertainty_arcsec: None,
            skymap_url: None,
            image_url: None,
            suppress: false,
        }
    }

    pub fn is_deliverable(&self) -> bool {
        !self.suppress
    }

    pub fn headline(&self) -> &str {
        self.caption.lines().next().unwrap_or_default()
    }
}

/// Fixed-precision float for captions; `—` when missing.
pub(crate) fn fmt_opt(x: Option<f64>, decimals: usize) -> String {
    match x {
        Some(v) if v.is_finite() => format!("{v:.decimals$}"),
        _ => "—".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn filter_keys_round_trip() {
        for c in Category::ALL {
            assert_eq!(Category::from_filter_key(c.filter_key()), Some(c));
        }
        assert_eq!(Category::from_filter_key("swift"), None);
    }

    #[test]
    fn sky_position_rejects_out_of_range() {
        assert!(SkyPosition::new(123.4, -45.6).is_some());
        assert!(SkyPosition::new(360.0, 0.0).is_none());
        assert!(SkyPosition::new(10.0, 91.0).is_none());
        assert!(SkyPosition::new(f64::NAN, 0.0).is_none());
    }

    #[test]
    fn fmt_opt_handles_missing() {
        assert_eq!(fmt_opt(Some(1.23456), 3), "1.235");
        assert_eq!(fmt_opt(None, 3), "—");
    }
}
