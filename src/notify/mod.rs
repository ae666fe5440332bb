// src/notify/mod.rs
//! Outbound notification channel.

pub mod telegram;

use anyhow::Result;
use serde::Serialize;

use crate::registry::SubscriberId;
use crate::visual::Visual;

/// One inline button: label plus the callback payload it sends back.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Button {
    pub text: String,
    pub callback_data: String,
}

impl Button {
    pub fn new(text: impl Into<String>, callback_data: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            callback_data: callback_data.into(),
        }
    }
}

/// Rows of inline buttons attached to a text message.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Keyboard {
    pub inline_keyboard: Vec<Vec<Button>>,
}

impl Keyboard {
    pub fn row(mut self, buttons: Vec<Button>) -> Self {
        self.inline_keyboard.push(buttons);
        self
    }
}

/// Sends to a single recipient. Failures are returned, never retried here; callers
/// decide whether a failure matters (fan-out logs and moves on).
#[async_trait::async_trait]
pub trait Notifier: Send + Sync {
    async fn send_text(
        &self,
        to: &SubscriberId,
        text: &str,
        keyboard: Option<&Keyboard>,
    ) -> Result<()>;

    async fn send_image(&self, to: &SubscriberId, image: &Visual, caption: Option<&str>)
        -> Result<()>;
}

/// Cut `s` to at most `max` chars (Telegram limits are in characters).
pub(crate) fn truncate_chars(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truncation_respects_char_boundaries() {
        assert_eq!(truncate_chars("héllo", 2), "hé");
        assert_eq!(truncate_chars("abc", 10), "abc");
    }

    #[test]
    fn keyboard_serializes_like_bot_api() {
        let kb = Keyboard::default().row(vec![Button::new("Menu", "cmd:/menu")]);
        let v = serde_json::to_value(&kb).unwrap();
        assert_eq!(v["inline_keyboard"][0][0]["callback_data"], "cmd:/menu");
    }
}
