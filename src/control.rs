// src/control.rs
//! Subscriber control surface: commands and inline-button callbacks mapped onto
//! registry operations, each producing a reply text plus an optional keyboard.

use anyhow::Result;
use std::sync::Arc;

use crate::alert::Category;
use crate::bulletin::{compose_latest_text, BulletinIndex};
use crate::notify::{Button, Keyboard};
use crate::recent::RecentAlerts;
use crate::registry::{FilterSet, RegistryHandle, SubscriberId};

/// Command list published to the bot menu.
pub const COMMANDS: &[(&str, &str)] = &[
    ("start", "Register and show the menu"),
    ("menu", "Show the main menu"),
    ("settings", "Delivery status and filters"),
    ("on", "Resume alert delivery"),
    ("off", "Pause alert delivery"),
    ("filters", "Choose alert categories"),
    ("status", "Show delivery status"),
    ("latest", "Send the latest GCN Circular"),
    ("help", "List commands"),
];

const WELCOME: &str =
    "GCN alert relay\nGravitational waves, gamma-ray bursts and GCN Circulars.\nChoose an option:";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Start,
    Menu,
    Settings,
    Activate,
    Deactivate,
    Filters,
    Status,
    Help,
    LatestBulletin,
    Toggle(Category),
    Unknown,
}

impl Action {
    /// "/cmd", "/cmd@BotName" or "/cmd args". Anything else is `Unknown`.
    pub fn from_command(text: &str) -> Self {
        let Some(word) = text.split_whitespace().next() else {
            return Action::Unknown;
        };
        let Some(cmd) = word.strip_prefix('/') else {
            return Action::Unknown;
        };
        let cmd = cmd.split('@').next().unwrap_or(cmd).to_ascii_lowercase();
        match cmd.as_str() {
            "start" => Action::Start,
            "menu" => Action::Menu,
            "settings" | "impostazioni" => Action::Settings,
            "on" | "activate" | "attivaricezione" => Action::Activate,
            "off" | "deactivate" | "disattivaricezione" => Action::Deactivate,
            "filters" | "filtri" => Action::Filters,
            "status" => Action::Status,
            "help" => Action::Help,
            "latest" | "testriceviultimagcn" => Action::LatestBulletin,
            _ => Action::Unknown,
        }
    }

    /// Inline button payloads: `cmd:/<command>` or `toggle:<filter key>`.
    pub fn from_callback(data: &str) -> Option<Self> {
        if let Some(cmd) = data.strip_prefix("cmd:") {
            return match Action::from_command(cmd) {
                Action::Unknown => None,
                a => Some(a),
            };
        }
        data.strip_prefix("toggle:")
            .and_then(Category::from_filter_key)
            .map(Action::Toggle)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    pub text: String,
    pub keyboard: Option<Keyboard>,
}

impl Reply {
    fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            keyboard: None,
        }
    }

    fn with_keyboard(text: impl Into<String>, keyboard: Keyboard) -> Self {
        Self {
            text: text.into(),
            keyboard: Some(keyboard),
        }
    }
}

pub fn main_menu() -> Keyboard {
    Keyboard::default()
        .row(vec![
            Button::new("▶️ Resume", "cmd:/on"),
            Button::new("⏸ Pause", "cmd:/off"),
        ])
        .row(vec![
            Button::new("🎛 Filters", "cmd:/filters"),
            Button::new("📊 Status", "cmd:/status"),
        ])
        .row(vec![Button::new("📰 Latest circular", "cmd:/latest")])
}

pub fn filters_menu(filters: &FilterSet) -> Keyboard {
    let mut kb = Keyboard::default();
    for c in Category::ALL {
        let mark = if filters.contains(c) { "✅" } else { "❌" };
        kb = kb.row(vec![Button::new(
            format!("{mark} {}", c.label()),
            format!("toggle:{}", c.filter_key()),
        )]);
    }
    kb.row(vec![Button::new("⬅️ Menu", "cmd:/menu")])
}

fn on_off(b: bool) -> &'static str {
    if b {
        "ON"
    } else {
        "OFF"
    }
}

fn filters_text(filters: &FilterSet) -> String {
    Category::ALL
        .iter()
        .map(|c| format!("• {}: {}", c.label(), on_off(filters.contains(*c))))
        .collect::<Vec<_>>()
        .join("\n")
}

fn help_text() -> String {
    let mut s = String::from("Commands\n");
    for (cmd, desc) in COMMANDS {
        s.push_str(&format!("/{cmd} - {desc}\n"));
    }
    s.trim_end().to_string()
}

pub struct Controller {
    registry: RegistryHandle,
    bulletins: Arc<BulletinIndex>,
    recent: Arc<RecentAlerts>,
}

impl Controller {
    pub fn new(
        registry: RegistryHandle,
        bulletins: Arc<BulletinIndex>,
        recent: Arc<RecentAlerts>,
    ) -> Self {
        Self {
            registry,
            bulletins,
            recent,
        }
    }

    /// Applies `action` for `who` (registering them on first contact).
    pub async fn handle(&self, who: &SubscriberId, action: Action) -> Result<Reply> {
        let sub = self.registry.get_or_create(who).await?;

        let reply = match action {
            Action::Start if sub.muted => {
                self.registry.set_muted(who, false).await?;
                Reply::with_keyboard(WELCOME, main_menu())
            }
            Action::Start | Action::Menu => Reply::with_keyboard(
                WELCOME,
                main_menu(),
            ),
            Action::Settings | Action::Status => {
                let mut text = format!(
                    "Delivery: {}\n\nFilters\n{}",
                    if sub.muted { "paused" } else { "active" },
                    filters_text(&sub.filters)
                );
                if let Some(last) = self.recent.latest() {
                    text.push_str(&format!(
                        "\n\nLast alert: {} ({})",
                        last.alert.headline(),
                        last.received_at.format("%Y-%m-%d %H:%M UTC")
                    ));
                }
                Reply::with_keyboard(text, main_menu())
            }
            Action::Activate => {
                self.registry.set_muted(who, false).await?;
                Reply::with_keyboard("Delivery resumed.", main_menu())
            }
            Action::Deactivate => {
                self.registry.set_muted(who, true).await?;
                Reply::with_keyboard("Delivery paused.", main_menu())
            }
            Action::Filters => Reply::with_keyboard(
                format!("Choose categories\n{}", filters_text(&sub.filters)),
                filters_menu(&sub.filters),
            ),
            Action::Toggle(c) => {
                let filters = self.registry.toggle(who, c).await?;
                Reply::with_keyboard(
                    format!("Choose categories\n{}", filters_text(&filters)),
                    filters_menu(&filters),
                )
            }
            Action::LatestBulletin => match self.bulletins.latest().await {
                Ok(Some((entry, fix))) => Reply::text(compose_latest_text(&entry, fix.as_ref())),
                Ok(None) => Reply::text("No GCN Circulars found."),
                Err(e) => {
                    tracing::warn!(target: "control", error = ?e, "latest circular lookup failed");
                    Reply::text("Could not reach the GCN Circulars archive, try again later.")
                }
            },
            Action::Help => Reply::text(help_text()),
            Action::Unknown => Reply::text(format!("Unknown command.\n\n{}", help_text())),
        };
        Ok(reply)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn commands_parse_with_bot_suffix_and_args() {
        assert_eq!(Action::from_command("/start"), Action::Start);
        assert_eq!(Action::from_command("/off@gcn_bot"), Action::Deactivate);
        assert_eq!(Action::from_command("/latest now"), Action::LatestBulletin);
        assert_eq!(Action::from_command("/filtri"), Action::Filters);
        assert_eq!(Action::from_command("hello"), Action::Unknown);
        assert_eq!(Action::from_command(""), Action::Unknown);
    }

    #[test]
    fn callbacks_parse() {
        assert_eq!(Action::from_callback("cmd:/status"), Some(Action::Status));
        assert_eq!(
            Action::from_callback("toggle:gw"),
            Some(Action::Toggle(Category::GravitationalWave))
        );
        assert_eq!(Action::from_callback("toggle:nope"), None);
        assert_eq!(Action::from_callback("cmd:/bogus"), None);
    }

    #[test]
    fn filters_keyboard_marks_state() {
        let f: FilterSet = [Category::GammaRayBurst].into_iter().collect();
        let kb = filters_menu(&f);
        assert_eq!(kb.inline_keyboard.len(), Category::ALL.len() + 1);
        let labels: Vec<&str> = kb
            .inline_keyboard
            .iter()
            .map(|r| r[0].text.as_str())
            .collect();
        assert!(labels.iter().any(|l| l.starts_with("✅")));
        assert_eq!(labels.iter().filter(|l| l.starts_with("❌")).count(), 2);
    }
}
