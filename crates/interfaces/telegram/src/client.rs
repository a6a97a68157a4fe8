//! Thin Telegram Bot API client over reqwest (long polling).

use std::path::Path;
use std::time::Duration;

use anyhow::{Result, bail};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use vigil_store::OwnerId;
use vigil_watch::Notifier;

/// Telegram rejects messages over 4096 chars; stay comfortably below.
const MAX_MESSAGE_CHARS: usize = 3500;

#[derive(Clone)]
pub struct TelegramClient {
    client: Client,
    base_url: String,
}

impl TelegramClient {
    pub fn new(token: &str) -> Result<Self> {
        if token.trim().is_empty() {
            bail!("telegram bot token is empty");
        }
        let client = Client::builder()
            .timeout(Duration::from_secs(60))
            .build()?;
        Ok(Self {
            client,
            base_url: format!("https://api.telegram.org/bot{token}"),
        })
    }

    pub async fn fetch_updates(&self, offset: i64) -> Result<Vec<TelegramUpdate>> {
        let url = format!("{}/getUpdates", self.base_url);
        let response = self
            .client
            .get(url)
            .query(&[("timeout", "25"), ("offset", &offset.to_string())])
            .send()
            .await?
            .error_for_status()?;

        let payload: TelegramResponse<Vec<TelegramUpdate>> = response.json().await?;
        if !payload.ok {
            let description = payload
                .description
                .unwrap_or_else(|| "telegram getUpdates failed".to_string());
            bail!(description);
        }

        Ok(payload.result.unwrap_or_default())
    }

    pub async fn send_message(&self, chat_id: OwnerId, text: &str) -> Result<()> {
        for chunk in chunk_message(text, MAX_MESSAGE_CHARS) {
            let url = format!("{}/sendMessage", self.base_url);
            let body = SendMessageRequest {
                chat_id,
                text: &chunk,
                disable_web_page_preview: true,
            };

            let response = self
                .client
                .post(url)
                .json(&body)
                .send()
                .await?
                .error_for_status()?;

            let payload: TelegramResponse<serde_json::Value> = response.json().await?;
            if !payload.ok {
                let description = payload
                    .description
                    .unwrap_or_else(|| "telegram sendMessage failed".to_string());
                bail!(description);
            }
        }
        Ok(())
    }

    /// Upload a local image verbatim via `sendPhoto`.
    pub async fn send_photo(&self, chat_id: OwnerId, path: &Path) -> Result<()> {
        let bytes = tokio::fs::read(path).await?;
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "photo.jpg".to_string());
        let form = reqwest::multipart::Form::new()
            .text("chat_id", chat_id.to_string())
            .part(
                "photo",
                reqwest::multipart::Part::bytes(bytes).file_name(file_name),
            );

        let url = format!("{}/sendPhoto", self.base_url);
        let response = self
            .client
            .post(url)
            .multipart(form)
            .send()
            .await?
            .error_for_status()?;

        let payload: TelegramResponse<serde_json::Value> = response.json().await?;
        if !payload.ok {
            let description = payload
                .description
                .unwrap_or_else(|| "telegram sendPhoto failed".to_string());
            bail!(description);
        }
        Ok(())
    }
}

#[async_trait]
impl Notifier for TelegramClient {
    async fn send_text(&self, chat: OwnerId, text: &str) -> Result<()> {
        self.send_message(chat, text).await
    }
}

/// Split on line boundaries so no chunk exceeds `max_chars`.
pub fn chunk_message(text: &str, max_chars: usize) -> Vec<String> {
    if text.chars().count() <= max_chars {
        return vec![text.to_string()];
    }

    let mut chunks = Vec::new();
    let mut current = String::new();
    let mut current_len = 0;

    for line in text.lines() {
        let line_len = line.chars().count() + 1;
        if current_len > 0 && current_len + line_len > max_chars {
            chunks.push(current.trim_end().to_string());
            current.clear();
            current_len = 0;
        }
        current.push_str(line);
        current.push('\n');
        current_len += line_len;
    }

    if !current.trim().is_empty() {
        chunks.push(current.trim_end().to_string());
    }

    if chunks.is_empty() {
        chunks.push(text.to_string());
    }
    chunks
}

#[derive(Debug, Deserialize)]
pub struct TelegramResponse<T> {
    pub ok: bool,
    pub result: Option<T>,
    pub description: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct TelegramUpdate {
    pub update_id: i64,
    pub message: Option<TelegramMessage>,
}

#[derive(Debug, Deserialize)]
pub struct TelegramMessage {
    pub chat: TelegramChat,
    pub from: Option<TelegramUser>,
    pub text: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct TelegramChat {
    pub id: i64,
}

#[derive(Debug, Deserialize)]
pub struct TelegramUser {
    pub username: Option<String>,
    pub first_name: Option<String>,
}

#[derive(Debug, Serialize)]
struct SendMessageRequest<'a> {
    chat_id: i64,
    text: &'a str,
    disable_web_page_preview: bool,
}

#[cfg(test)]
mod tests {
    use super::chunk_message;

    #[test]
    fn short_messages_pass_through() {
        assert_eq!(chunk_message("hello", 3500), vec!["hello"]);
    }

    #[test]
    fn long_messages_split_on_line_boundaries() {
        let text = (0..100)
            .map(|i| format!("line number {i}"))
            .collect::<Vec<_>>()
            .join("\n");
        let chunks = chunk_message(&text, 200);
        assert!(chunks.len() > 1);
        for chunk in &chunks {
            assert!(chunk.chars().count() <= 200);
        }
        let rejoined = chunks.join("\n");
        assert!(rejoined.contains("line number 0"));
        assert!(rejoined.contains("line number 99"));
    }

    #[test]
    fn empty_token_is_rejected() {
        assert!(super::TelegramClient::new("  ").is_err());
    }
}
