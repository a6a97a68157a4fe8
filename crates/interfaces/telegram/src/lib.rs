//! Telegram transport: long-poll loop and command dispatch.

pub mod client;
pub mod commands;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tracing::{debug, warn};

pub use client::{TelegramClient, TelegramUpdate};
pub use commands::{respond, CommandContext, Reply, HELP_TEXT};

/// Everything the long-poll loop needs, built once at startup.
pub struct Bot {
    pub client: TelegramClient,
    pub commands: CommandContext,
    pub image_path: PathBuf,
}

/// Run the `getUpdates` long-poll loop until the task is dropped.
///
/// Each update is handled in its own spawned task, so a slow fetch inside one
/// user's /follow never delays other users' commands or the scheduler.
pub async fn run_bot(bot: Arc<Bot>) -> Result<()> {
    let mut offset: i64 = 0;

    debug!("telegram long-poll loop starting");
    loop {
        let updates = match bot.client.fetch_updates(offset).await {
            Ok(updates) => updates,
            Err(err) => {
                let err_str = err.to_string();
                if err_str.contains("409") {
                    // Another instance is polling; back off and let it win.
                    warn!("getUpdates 409 Conflict: another bot instance is running; waiting 15s");
                    tokio::time::sleep(Duration::from_secs(15)).await;
                } else {
                    warn!(%err, "getUpdates failed; retrying in 5s");
                    tokio::time::sleep(Duration::from_secs(5)).await;
                }
                continue;
            }
        };

        for update in updates {
            offset = update.update_id + 1;
            let bot = bot.clone();
            tokio::spawn(async move {
                handle_update(&bot, update).await;
            });
        }

        tokio::time::sleep(Duration::from_millis(300)).await;
    }
}

async fn handle_update(bot: &Bot, update: TelegramUpdate) {
    let Some(message) = update.message else {
        return;
    };
    let Some(text) = message.text else {
        return;
    };
    let chat_id = message.chat.id;
    let (handle, display_name) = match &message.from {
        Some(user) => (user.username.as_deref(), user.first_name.as_deref()),
        None => (None, None),
    };

    match respond(&bot.commands, chat_id, handle, display_name, &text).await {
        Reply::Text(reply) => {
            if let Err(err) = bot.client.send_message(chat_id, &reply).await {
                warn!(chat_id, %err, "sendMessage failed");
            }
        }
        Reply::Postcard => {
            if let Err(err) = bot.client.send_photo(chat_id, &bot.image_path).await {
                warn!(chat_id, path = %bot.image_path.display(), %err, "sendPhoto failed");
                let _ = bot
                    .client
                    .send_message(chat_id, "Could not send the image.")
                    .await;
            }
        }
        Reply::Silent => {}
    }
}
