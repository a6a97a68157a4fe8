//! Text-command dispatch: one chat message in, one reply out.

use std::sync::Arc;

use tracing::warn;

use vigil_store::{CommentEntry, OwnerId, WatchStore};
use vigil_watch::{
    broadcast, CommandError, CommentLedger, DeregisterOutcome, FollowOutcome, Notifier,
    RegisterOutcome, SubmitOutcome, UnfollowAllOutcome, UnfollowOutcome, WatchListManager,
};

pub const HELP_TEXT: &str = "Here's the list of my commands:\n\
/start - Make an entry for yourself in the database\n\
/follow <link(s)> - Url(s) that you'd like to keep track of\n\
/unfollow <link(s)> - Url(s) that you no longer want to keep track of\n\
/unfollow_all - Delete all your urls from database\n\
/list - Info on what you follow\n\
/comment <text> - Leave feedback for the operator\n\
/list_comments - Show the feedback you have left\n\
/help - Bot manual\n\
/end - Wipe all your data";

const NOT_REGISTERED: &str = "Please /start using the bot first.\n";
const NEEDS_ARGUMENT: &str = "That command requires at least 1 argument.";
const STORE_TROUBLE: &str = "Something went wrong on my side. Please try again in a moment.";

/// Everything a command handler may touch. Built once at startup and shared;
/// no ambient globals.
pub struct CommandContext {
    pub store: Arc<dyn WatchStore>,
    pub manager: WatchListManager,
    pub ledger: CommentLedger,
    pub notifier: Arc<dyn Notifier>,
    pub operator: OwnerId,
}

/// What the transport should do with the handler's result.
#[derive(Debug, PartialEq, Eq)]
pub enum Reply {
    Text(String),
    /// Send the configured static image.
    Postcard,
    /// Plain (non-command) chatter gets no reply.
    Silent,
}

/// Strip an `@botname` suffix from the command word and collapse whitespace,
/// the way Telegram clients send commands in group chats.
pub fn normalize_command(text: &str) -> String {
    let trimmed = text.trim();
    if !trimmed.starts_with('/') {
        return trimmed.to_string();
    }

    let mut parts = trimmed.splitn(2, char::is_whitespace);
    let command = parts.next().unwrap_or_default();
    let rest = parts.next().unwrap_or("").trim();

    let command = command
        .split_once('@')
        .map(|(base, _)| base)
        .unwrap_or(command);

    if rest.is_empty() {
        command.to_string()
    } else {
        format!("{command} {rest}")
    }
}

/// Dispatch one inbound message. Never panics and never lets a store error
/// escape: internal failures become a generic reply plus a server-side log
/// line carrying the detail.
pub async fn respond(
    ctx: &CommandContext,
    chat: OwnerId,
    handle: Option<&str>,
    display_name: Option<&str>,
    text: &str,
) -> Reply {
    let line = normalize_command(text);
    if !line.starts_with('/') {
        return Reply::Silent;
    }

    let mut parts = line.splitn(2, char::is_whitespace);
    let command = parts.next().unwrap_or_default();
    let rest = parts.next().unwrap_or("").trim();

    match command {
        "/start" => start_reply(ctx, chat),
        "/end" => end_reply(ctx, chat),
        "/help" => Reply::Text(HELP_TEXT.to_string()),
        "/follow" => follow_reply(ctx, chat, rest).await,
        "/unfollow" => unfollow_reply(ctx, chat, rest).await,
        "/unfollow_all" => unfollow_all_reply(ctx, chat),
        "/list" => list_reply(ctx, chat),
        "/comment" => comment_reply(ctx, chat, handle, display_name, rest).await,
        "/list_comments" => list_comments_reply(ctx, chat),
        "/send_a_message_to_users" => broadcast_reply(ctx, chat, rest).await,
        "/postcard" => Reply::Postcard,
        _ => Reply::Text("Unknown command!\n".to_string()),
    }
}

fn command_failure(chat: OwnerId, command: &str, err: CommandError) -> Reply {
    match err {
        CommandError::NotRegistered(_) => Reply::Text(NOT_REGISTERED.to_string()),
        CommandError::Store(err) => {
            warn!(chat, command, %err, "store failure while handling command");
            Reply::Text(STORE_TROUBLE.to_string())
        }
    }
}

fn start_reply(ctx: &CommandContext, chat: OwnerId) -> Reply {
    match ctx.manager.register(chat) {
        Ok(RegisterOutcome::Registered) => Reply::Text(format!(
            "Hello! I am a bot and I will notify you whenever a site changes.\nWelcome!\n\n{HELP_TEXT}"
        )),
        Ok(RegisterOutcome::AlreadyStarted) => {
            Reply::Text("You have already started the bot once. :)".to_string())
        }
        Err(err) => command_failure(chat, "/start", err.into()),
    }
}

fn end_reply(ctx: &CommandContext, chat: OwnerId) -> Reply {
    match ctx.manager.deregister(chat) {
        Ok(DeregisterOutcome::Deleted) => Reply::Text("I have wiped all your data.".to_string()),
        Ok(DeregisterOutcome::NothingToDelete) => {
            Reply::Text("You are not in the database... yet.".to_string())
        }
        Err(err) => command_failure(chat, "/end", err.into()),
    }
}

fn split_args(rest: &str) -> Vec<String> {
    rest.split_whitespace().map(str::to_string).collect()
}

async fn follow_reply(ctx: &CommandContext, chat: OwnerId, rest: &str) -> Reply {
    let urls = split_args(rest);
    if urls.is_empty() {
        return Reply::Text(NEEDS_ARGUMENT.to_string());
    }
    match ctx.manager.follow(chat, &urls).await {
        Ok(results) => {
            // Each line already ends in a newline.
            let lines: Vec<String> = results
                .into_iter()
                .map(|(url, outcome)| follow_line(chat, &url, outcome))
                .collect();
            Reply::Text(lines.concat())
        }
        Err(err) => command_failure(chat, "/follow", err),
    }
}

fn follow_line(chat: OwnerId, url: &str, outcome: FollowOutcome) -> String {
    match outcome {
        FollowOutcome::Followed => format!("Successfully followed:\n{url}\n"),
        FollowOutcome::AlreadyExists => format!("Entry already exists:\n{url}\n"),
        FollowOutcome::InvalidUrl => format!("Url not valid:\n{url}\n"),
        FollowOutcome::TooLong => format!("Url too long (1500 characters max):\n{url}\n"),
        FollowOutcome::Fetch(err) => format!("Could not fetch ({err}):\n{url}\n"),
        FollowOutcome::Store(err) => {
            warn!(chat, url, %err, "store failure while following");
            format!("{STORE_TROUBLE}\n{url}\n")
        }
    }
}

async fn unfollow_reply(ctx: &CommandContext, chat: OwnerId, rest: &str) -> Reply {
    let urls = split_args(rest);
    if urls.is_empty() {
        return Reply::Text(NEEDS_ARGUMENT.to_string());
    }
    match ctx.manager.unfollow(chat, &urls).await {
        Ok(results) => {
            let lines: Vec<String> = results
                .into_iter()
                .map(|(url, outcome)| match outcome {
                    UnfollowOutcome::Unfollowed => format!("Successfully unfollowed: {url}\n"),
                    UnfollowOutcome::NotFound => format!("Url not found: {url}\n"),
                    UnfollowOutcome::InvalidUrl => format!("Url not valid:\n{url}\n"),
                    UnfollowOutcome::TooLong => {
                        format!("Url too long (1500 characters max):\n{url}\n")
                    }
                    UnfollowOutcome::Store(err) => {
                        warn!(chat, url = %url, %err, "store failure while unfollowing");
                        format!("{STORE_TROUBLE}\n{url}\n")
                    }
                })
                .collect();
            Reply::Text(lines.concat())
        }
        Err(err) => command_failure(chat, "/unfollow", err),
    }
}

fn unfollow_all_reply(ctx: &CommandContext, chat: OwnerId) -> Reply {
    match ctx.manager.unfollow_all(chat) {
        Ok(UnfollowAllOutcome::Removed(urls)) => {
            let mut text = String::from("I have unfollowed all of your sites:\n");
            for url in urls {
                text.push_str("- ");
                text.push_str(&url);
                text.push('\n');
            }
            Reply::Text(text)
        }
        Ok(UnfollowAllOutcome::NothingToUnfollow) => Reply::Text(
            "No sites to unfollow. Maybe try adding some sites first?".to_string(),
        ),
        Err(err) => command_failure(chat, "/unfollow_all", err),
    }
}

fn list_reply(ctx: &CommandContext, chat: OwnerId) -> Reply {
    match ctx.manager.list(chat) {
        Ok(urls) if urls.is_empty() => {
            Reply::Text("Currently you do not follow anything.\n".to_string())
        }
        Ok(urls) => {
            let mut text = String::from("These are all of the sites you follow:\n");
            for url in urls {
                text.push_str("- ");
                text.push_str(&url);
                text.push('\n');
            }
            Reply::Text(text)
        }
        Err(err) => command_failure(chat, "/list", err),
    }
}

async fn comment_reply(
    ctx: &CommandContext,
    chat: OwnerId,
    handle: Option<&str>,
    display_name: Option<&str>,
    rest: &str,
) -> Reply {
    if rest.is_empty() {
        return Reply::Text(NEEDS_ARGUMENT.to_string());
    }
    match ctx.ledger.submit(chat, rest, handle, display_name).await {
        Ok(SubmitOutcome::Stored) => Reply::Text("Thanks for the feedback!".to_string()),
        Ok(SubmitOutcome::QuotaExceeded) => Reply::Text(
            "You have reached the limit of 30 stored comments. \
             Your message was still passed on to the operator."
                .to_string(),
        ),
        Err(err) => command_failure(chat, "/comment", err),
    }
}

fn list_comments_reply(ctx: &CommandContext, chat: OwnerId) -> Reply {
    match ctx.ledger.list(chat) {
        Ok(rows) if rows.is_empty() => {
            Reply::Text("You have not left any comments yet.".to_string())
        }
        Ok(rows) => Reply::Text(render_comments(&rows)),
        Err(err) => command_failure(chat, "/list_comments", err),
    }
}

fn render_comments(rows: &[CommentEntry]) -> String {
    let mut text = String::from("Your comments:\n");
    for row in rows {
        text.push_str(&format!("{}. {}\n", row.seq, row.text));
    }
    text
}

async fn broadcast_reply(ctx: &CommandContext, chat: OwnerId, rest: &str) -> Reply {
    if chat != ctx.operator {
        return Reply::Text("You are not authorized to do that.".to_string());
    }
    if rest.is_empty() {
        return Reply::Text(NEEDS_ARGUMENT.to_string());
    }
    match broadcast(ctx.store.as_ref(), ctx.notifier.as_ref(), rest).await {
        Ok(delivered) => Reply::Text(format!("Message delivered to {delivered} users.")),
        Err(err) => {
            warn!(%err, "broadcast failed");
            Reply::Text(STORE_TROUBLE.to_string())
        }
    }
}
