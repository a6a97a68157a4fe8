use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tokio::sync::{mpsc, watch};
use tracing::info;
use tracing_subscriber::EnvFilter;

use vigil_config::AppConfig;
use vigil_store::{RedbStore, WatchStore};
use vigil_telegram::{run_bot, Bot, CommandContext, TelegramClient};
use vigil_watch::{
    spawn_comment_purge, spawn_dispatcher, spawn_watch_cycles, CommentLedger, FetchFingerprint,
    HttpFetcher, Notifier, WatchListManager,
};

#[derive(Debug, Parser)]
#[command(
    name = "vigil",
    version,
    about = "Telegram bot that notifies you when a watched site changes"
)]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(long, default_value = "config/default.toml")]
    config: String,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Run the bot (default).
    Start,
    /// Print store and configuration diagnostics.
    Doctor,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    let cli = Cli::parse();
    let config = AppConfig::load_from(&cli.config)?;

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&config.telemetry.log_level)),
        )
        .init();

    match cli.command.unwrap_or(Commands::Start) {
        Commands::Start => run(config).await,
        Commands::Doctor => doctor(config),
    }
}

async fn run(config: AppConfig) -> Result<()> {
    let store: Arc<dyn WatchStore> = Arc::new(RedbStore::open(&config.store.path)?);
    let fetcher: Arc<dyn FetchFingerprint> = Arc::new(HttpFetcher::new(Duration::from_secs(
        config.watch.fetch_timeout_seconds,
    ))?);
    let client = TelegramClient::new(&config.bot.token)?;
    let notifier: Arc<dyn Notifier> = Arc::new(client.clone());
    let operator = config.bot.operator_chat;

    let (events_tx, events_rx) = mpsc::unbounded_channel();
    let (shutdown_tx, _) = watch::channel(false);

    let dispatcher = spawn_dispatcher(notifier.clone(), events_rx);
    let cycles = spawn_watch_cycles(
        store.clone(),
        fetcher.clone(),
        events_tx,
        Duration::from_secs(config.watch.cycle_seconds),
        &shutdown_tx,
    );
    let purge = spawn_comment_purge(
        store.clone(),
        notifier.clone(),
        operator,
        Duration::from_secs(config.watch.purge_days * 24 * 60 * 60),
        &shutdown_tx,
    );

    let bot = Arc::new(Bot {
        client,
        commands: CommandContext {
            store: store.clone(),
            manager: WatchListManager::new(store.clone(), fetcher),
            ledger: CommentLedger::new(store.clone(), notifier.clone(), operator),
            notifier,
            operator,
        },
        image_path: PathBuf::from(&config.bot.image_path),
    });

    info!(
        cycle_seconds = config.watch.cycle_seconds,
        purge_days = config.watch.purge_days,
        "vigil starting"
    );

    tokio::select! {
        result = run_bot(bot) => result?,
        _ = tokio::signal::ctrl_c() => {
            info!("shutdown requested");
        }
    }

    // Stop the periodic tasks; the dispatcher drains and exits once the
    // cycle task (the only event sender) is gone.
    let _ = shutdown_tx.send(true);
    cycles.await?;
    purge.await?;
    dispatcher.await?;
    Ok(())
}

fn doctor(config: AppConfig) -> Result<()> {
    let store = RedbStore::open(&config.store.path)?;
    let accounts = store.all_accounts()?;
    let watches = store.all_watches()?;
    let mut comments = 0usize;
    for owner in &accounts {
        comments += store.comments_for(*owner)?.len();
    }

    println!("vigil doctor");
    println!("- store path: {}", store.path().display());
    println!("- registered accounts: {}", accounts.len());
    println!("- watched urls: {}", watches.len());
    println!("- stored comments: {}", comments);
    println!("- cycle period: {}s", config.watch.cycle_seconds);
    println!("- purge period: {} days", config.watch.purge_days);
    println!(
        "- bot token: {}",
        if config.bot.token.is_empty() {
            "NOT SET"
        } else {
            "set"
        }
    );
    println!("- operator chat: {}", config.bot.operator_chat);
    Ok(())
}
