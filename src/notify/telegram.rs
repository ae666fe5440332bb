// src/notify/telegram.rs
//! Telegram Bot API client: the production [`Notifier`] plus the long-poll loop that
//! feeds subscriber commands to the [`Controller`].

use anyhow::{anyhow, Context, Result};
use reqwest::multipart::{Form, Part};
use reqwest::{Client, RequestBuilder};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;

use super::{truncate_chars, Keyboard, Notifier};
use crate::control::{Action, Controller, COMMANDS};
use crate::registry::SubscriberId;
use crate::visual::Visual;

pub const MAX_TEXT_CHARS: usize = 4000;
pub const MAX_CAPTION_CHARS: usize = 1024;
const LONG_POLL_SECS: u64 = 30;

#[derive(Deserialize)]
struct ApiResponse<T> {
    ok: bool,
    result: Option<T>,
    description: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Update {
    pub update_id: i64,
    #[serde(default)]
    pub message: Option<Message>,
    #[serde(default)]
    pub callback_query: Option<CallbackQuery>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Message {
    pub message_id: i64,
    pub chat: Chat,
    #[serde(default)]
    pub text: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Chat {
    pub id: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct User {
    pub id: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CallbackQuery {
    pub id: String,
    pub from: User,
    #[serde(default)]
    pub message: Option<Message>,
    #[serde(default)]
    pub data: Option<String>,
}

#[derive(Serialize)]
struct BotCommand<'a> {
    command: &'a str,
    description: &'a str,
}

/// Numeric chat ids go out as numbers, anything else (e.g. "@channel") as a string.
fn chat_id_value(id: &SubscriberId) -> Value {
    id.as_str()
        .parse::<i64>()
        .map(Value::from)
        .unwrap_or_else(|_| Value::from(id.as_str()))
}

#[derive(Clone)]
pub struct TelegramClient {
    base: String,
    client: Client,
    timeout: Duration,
    max_retries: u8,
}

impl TelegramClient {
    pub fn new(token: &str) -> Self {
        Self::with_base_url(format!("https://api.telegram.org/bot{token}"))
    }

    /// Points the client at another Bot API server (self-hosted or a test double).
    pub fn with_base_url(base: impl Into<String>) -> Self {
        Self {
            base: base.into().trim_end_matches('/').to_string(),
            client: Client::new(),
            timeout: Duration::from_secs(30),
            max_retries: 3,
        }
    }

    pub fn with_timeout(mut self, secs: u64) -> Self {
        self.timeout = Duration::from_secs(secs);
        self
    }

    pub fn with_retries(mut self, retries: u8) -> Self {
        self.max_retries = retries.max(1);
        self
    }

    fn url(&self, method: &str) -> String {
        format!("{}/{method}", self.base)
    }

    /// Sends the request built by `make`, retrying transport errors and 5xx with
    /// exponential backoff. Bot API errors (`ok: false`) are not retried.
    async fn call<T: DeserializeOwned>(
        &self,
        method: &str,
        make: impl Fn() -> Result<RequestBuilder>,
    ) -> Result<T> {
        let mut attempt: u8 = 0;
        loop {
            attempt += 1;
            let res = make()?.send().await;
            let retryable = match &res {
                Ok(rsp) => rsp.status().is_server_error(),
                Err(_) => true,
            };
            if retryable && attempt < self.max_retries {
                tokio::time::sleep(Duration::from_millis(500u64 << (attempt - 1))).await;
                continue;
            }

            let rsp = res.map_err(|e| anyhow!("Telegram {method} request failed: {e}"))?;
            let status = rsp.status();
            let body: ApiResponse<T> = rsp
                .json()
                .await
                .with_context(|| format!("Telegram {method}: unreadable response ({status})"))?;
            if !body.ok {
                return Err(anyhow!(
                    "Telegram {method} rejected ({status}): {}",
                    body.description.unwrap_or_default()
                ));
            }
            return body
                .result
                .ok_or_else(|| anyhow!("Telegram {method}: missing result"));
        }
    }

    async fn post_json<T: DeserializeOwned>(&self, method: &str, body: &Value) -> Result<T> {
        let url = self.url(method);
        self.call(method, || {
            Ok(self.client.post(&url).timeout(self.timeout).json(body))
        })
        .await
    }

    pub async fn send_message(
        &self,
        to: &SubscriberId,
        text: &str,
        keyboard: Option<&Keyboard>,
    ) -> Result<()> {
        let mut body = json!({
            "chat_id": chat_id_value(to),
            "text": truncate_chars(text, MAX_TEXT_CHARS),
            "disable_web_page_preview": true,
        });
        if let Some(kb) = keyboard {
            body["reply_markup"] = serde_json::to_value(kb)?;
        }
        self.post_json::<Value>("sendMessage", &body).await?;
        Ok(())
    }

    /// Raster images go through sendPhoto; SVG is not accepted there and is sent
    /// as a document.
    pub async fn send_visual(
        &self,
        to: &SubscriberId,
        image: &Visual,
        caption: Option<&str>,
    ) -> Result<()> {
        let (method, field) = if image.is_svg() {
            ("sendDocument", "document")
        } else {
            ("sendPhoto", "photo")
        };
        let url = self.url(method);
        let caption = caption.map(|c| truncate_chars(c, MAX_CAPTION_CHARS).to_string());
        let chat_id = to.to_string();

        self.call::<Value>(method, || {
            let part = Part::bytes(image.bytes.clone())
                .file_name(image.file_name())
                .mime_str(&image.mime)
                .with_context(|| format!("bad mime type {}", image.mime))?;
            let mut form = Form::new().text("chat_id", chat_id.clone()).part(field, part);
            if let Some(c) = &caption {
                form = form.text("caption", c.clone());
            }
            Ok(self.client.post(&url).timeout(self.timeout).multipart(form))
        })
        .await?;
        Ok(())
    }

    /// Long-polls for updates after `offset`.
    pub async fn get_updates(&self, offset: Option<i64>) -> Result<Vec<Update>> {
        let url = self.url("getUpdates");
        let mut body = json!({
            "timeout": LONG_POLL_SECS,
            "allowed_updates": ["message", "callback_query"],
        });
        if let Some(o) = offset {
            body["offset"] = json!(o);
        }
        let http_timeout = Duration::from_secs(LONG_POLL_SECS + 10);
        self.call("getUpdates", || {
            Ok(self.client.post(&url).timeout(http_timeout).json(&body))
        })
        .await
    }

    pub async fn answer_callback(&self, callback_id: &str, text: Option<&str>) -> Result<()> {
        let mut body = json!({ "callback_query_id": callback_id });
        if let Some(t) = text {
            body["text"] = json!(t);
        }
        self.post_json::<Value>("answerCallbackQuery", &body).await?;
        Ok(())
    }

    pub async fn edit_message_text(
        &self,
        chat_id: i64,
        message_id: i64,
        text: &str,
        keyboard: Option<&Keyboard>,
    ) -> Result<()> {
        let mut body = json!({
            "chat_id": chat_id,
            "message_id": message_id,
            "text": truncate_chars(text, MAX_TEXT_CHARS),
            "disable_web_page_preview": true,
        });
        if let Some(kb) = keyboard {
            body["reply_markup"] = serde_json::to_value(kb)?;
        }
        self.post_json::<Value>("editMessageText", &body).await?;
        Ok(())
    }

    pub async fn set_my_commands(&self, commands: &[(&str, &str)]) -> Result<()> {
        let list: Vec<BotCommand<'_>> = commands
            .iter()
            .map(|(command, description)| BotCommand {
                command,
                description,
            })
            .collect();
        self.post_json::<Value>("setMyCommands", &json!({ "commands": list }))
            .await?;
        Ok(())
    }

    pub async fn delete_webhook(&self) -> Result<()> {
        self.post_json::<Value>("deleteWebhook", &json!({ "drop_pending_updates": false }))
            .await?;
        Ok(())
    }
}

#[async_trait::async_trait]
impl Notifier for TelegramClient {
    async fn send_text(
        &self,
        to: &SubscriberId,
        text: &str,
        keyboard: Option<&Keyboard>,
    ) -> Result<()> {
        self.send_message(to, text, keyboard).await
    }

    async fn send_image(
        &self,
        to: &SubscriberId,
        image: &Visual,
        caption: Option<&str>,
    ) -> Result<()> {
        self.send_visual(to, image, caption).await
    }
}

async fn handle_update(client: &TelegramClient, controller: &Controller, update: Update) -> Result<()> {
    if let Some(cb) = update.callback_query {
        let who = SubscriberId::from(cb.from.id);
        let Some(action) = cb.data.as_deref().and_then(Action::from_callback) else {
            client.answer_callback(&cb.id, None).await?;
            return Ok(());
        };

        let ack = match action {
            Action::Toggle(_) => Some("Filters updated"),
            Action::LatestBulletin => Some("Fetching the latest circular..."),
            _ => None,
        };
        client.answer_callback(&cb.id, ack).await?;

        let reply = controller.handle(&who, action).await?;
        match (&cb.message, action) {
            // Circular text is a fresh message, not a menu edit.
            (Some(msg), a) if a != Action::LatestBulletin => {
                client
                    .edit_message_text(msg.chat.id, msg.message_id, &reply.text, reply.keyboard.as_ref())
                    .await?
            }
            (Some(msg), _) => {
                client
                    .send_message(&SubscriberId::from(msg.chat.id), &reply.text, reply.keyboard.as_ref())
                    .await?
            }
            (None, _) => client.send_message(&who, &reply.text, reply.keyboard.as_ref()).await?,
        }
        return Ok(());
    }

    if let Some(msg) = update.message {
        let Some(text) = msg.text.as_deref() else {
            return Ok(());
        };
        if !text.starts_with('/') {
            return Ok(());
        }
        let who = SubscriberId::from(msg.chat.id);
        let reply = controller.handle(&who, Action::from_command(text)).await?;
        client
            .send_message(&who, &reply.text, reply.keyboard.as_ref())
            .await?;
    }
    Ok(())
}

/// Receives commands and button presses forever. A failed poll backs off and retries;
/// a failed update is logged and skipped.
pub async fn run_command_loop(client: Arc<TelegramClient>, controller: Arc<Controller>) {
    if let Err(e) = client.delete_webhook().await {
        tracing::warn!(target: "telegram", error = ?e, "deleteWebhook failed");
    }
    if let Err(e) = client.set_my_commands(COMMANDS).await {
        tracing::warn!(target: "telegram", error = ?e, "setMyCommands failed");
    }

    let mut offset: Option<i64> = None;
    let mut backoff = Duration::from_secs(1);
    loop {
        let updates = match client.get_updates(offset).await {
            Ok(u) => {
                backoff = Duration::from_secs(1);
                u
            }
            Err(e) => {
                tracing::warn!(target: "telegram", error = ?e, "getUpdates failed");
                tokio::time::sleep(backoff).await;
                backoff = (backoff * 2).min(Duration::from_secs(60));
                continue;
            }
        };

        for update in updates {
            offset = Some(update.update_id + 1);
            let id = update.update_id;
            if let Err(e) = handle_update(&client, &controller, update).await {
                tracing::warn!(target: "telegram", update_id = id, error = ?e, "update handling failed");
            }
        }
    }
}
