use std::env;
use std::fs;
use std::path::Path;

use anyhow::Result;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BotConfig {
    /// Telegram bot token. Usually left empty in the file and supplied via
    /// the `TELEGRAM_BOT_TOKEN` environment variable (env takes precedence).
    pub token: String,
    /// Chat id of the operator: receives forwarded comments and purge
    /// reports, and is the only identity allowed to broadcast.
    pub operator_chat: i64,
    /// Static image sent verbatim on the /postcard command. Not shipped with
    /// the repository; the deployment provides its own file here, and until
    /// it does /postcard replies with a fallback message.
    pub image_path: String,
}

impl Default for BotConfig {
    fn default() -> Self {
        Self {
            token: String::new(),
            operator_chat: 0,
            image_path: "resources/postcard.jpg".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub path: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: ".vigil/store.redb".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WatchConfig {
    /// Period of the change-detection cycle, in seconds.
    pub cycle_seconds: u64,
    /// Upper bound on a single fetch before it is abandoned as timed out.
    pub fetch_timeout_seconds: u64,
    /// Period of the comment-table purge, in days.
    pub purge_days: u64,
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            cycle_seconds: 30,
            fetch_timeout_seconds: 20,
            purge_days: 5,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TelemetryConfig {
    pub log_level: String,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub bot: BotConfig,
    pub store: StoreConfig,
    pub watch: WatchConfig,
    pub telemetry: TelemetryConfig,
}

impl AppConfig {
    /// Load from a TOML file, falling back to defaults when the file is
    /// missing, then apply environment overrides.
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self> {
        let mut config = Self::default();
        if let Ok(raw) = fs::read_to_string(path) {
            config = toml::from_str(&raw)?;
        }

        if let Ok(token) = env::var("TELEGRAM_BOT_TOKEN") {
            if !token.is_empty() {
                config.bot.token = token;
            }
        }
        if let Ok(chat) = env::var("VIGIL_OPERATOR_CHAT") {
            if let Ok(chat) = chat.parse() {
                config.bot.operator_chat = chat;
            }
        }
        if let Ok(path) = env::var("VIGIL_STORE_PATH") {
            if !path.is_empty() {
                config.store.path = path;
            }
        }

        Ok(config)
    }

    pub fn save_to(&self, path: impl AsRef<Path>) -> Result<()> {
        if let Some(parent) = path.as_ref().parent() {
            fs::create_dir_all(parent)?;
        }

        let rendered = toml::to_string_pretty(self)?;
        fs::write(path, rendered)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn defaults_match_reference_behaviour() {
        let cfg = AppConfig::default();
        assert_eq!(cfg.watch.cycle_seconds, 30);
        assert_eq!(cfg.watch.purge_days, 5);
        assert_eq!(cfg.watch.fetch_timeout_seconds, 20);
        assert_eq!(cfg.store.path, ".vigil/store.redb");
        assert_eq!(cfg.telemetry.log_level, "info");
        assert!(cfg.bot.token.is_empty());
    }

    #[test]
    fn load_from_missing_file_returns_defaults() {
        let dir = TempDir::new().unwrap();
        let cfg = AppConfig::load_from(dir.path().join("nonexistent.toml")).unwrap();
        assert_eq!(cfg.watch.cycle_seconds, 30);
    }

    #[test]
    fn load_from_partial_toml_fills_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("partial.toml");
        fs::write(
            &path,
            r#"
[watch]
cycle_seconds = 120
"#,
        )
        .unwrap();

        let cfg = AppConfig::load_from(&path).unwrap();
        assert_eq!(cfg.watch.cycle_seconds, 120);
        // Unspecified sections keep their defaults.
        assert_eq!(cfg.watch.purge_days, 5);
        assert_eq!(cfg.store.path, ".vigil/store.redb");
    }

    #[test]
    fn load_from_invalid_toml_returns_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("bad.toml");
        fs::write(&path, "this is not valid toml {{{{").unwrap();
        assert!(AppConfig::load_from(&path).is_err());
    }

    #[test]
    fn save_and_reload_roundtrip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("sub/config.toml");

        let mut cfg = AppConfig::default();
        cfg.bot.operator_chat = 12345;
        cfg.watch.cycle_seconds = 60;
        cfg.store.path = "/tmp/other.redb".to_string();

        cfg.save_to(&path).unwrap();
        assert!(path.exists());

        let loaded = AppConfig::load_from(&path).unwrap();
        assert_eq!(loaded.bot.operator_chat, 12345);
        assert_eq!(loaded.watch.cycle_seconds, 60);
        assert_eq!(loaded.store.path, "/tmp/other.redb");
    }

    #[test]
    fn env_token_overrides_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("env.toml");
        fs::write(
            &path,
            r#"
[bot]
token = "from-file"
"#,
        )
        .unwrap();

        // SAFETY: test is single-threaded for this env var.
        unsafe { env::set_var("TELEGRAM_BOT_TOKEN", "from-env") };
        let cfg = AppConfig::load_from(&path).unwrap();
        assert_eq!(cfg.bot.token, "from-env");
        unsafe { env::remove_var("TELEGRAM_BOT_TOKEN") };
    }
}
