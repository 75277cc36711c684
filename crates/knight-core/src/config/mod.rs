mod channels;
mod defaults;
mod providers;


pub use channels::*;
pub use providers::*;

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::KnightError;
use crate::message::{identity_user, same_identity};
use defaults::*;

/// Top-level Knight configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub knight: KnightConfig,
    #[serde(default)]
    pub anti_delete: AntiDeleteConfig,
    #[serde(default)]
    pub channel: ChannelConfig,
    #[serde(default)]
    pub provider: ProviderConfig,
    #[serde(default)]
    pub responder: ResponderConfig,
    #[serde(default)]
    pub security: SecurityConfig,
    #[serde(default)]
    pub commands: CommandsConfig,
}

/// General process settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KnightConfig {
    #[serde(default = "default_name")]
    pub name: String,
    #[serde(default = "default_data_dir")]
    pub data_dir: String,
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Default for KnightConfig {
    fn default() -> Self {
        Self {
            name: default_name(),
            data_dir: default_data_dir(),
            log_level: default_log_level(),
        }
    }
}

/// Anti-delete (shadow store + revocation reporter) settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AntiDeleteConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Owner/protected identity. Receives every report; its own deletions are exempt.
    #[serde(default)]
    pub owner: String,
    /// Report revocations performed by, or of messages authored by, the owner.
    #[serde(default)]
    pub report_owner_deletions: bool,
    /// Do not shadow messages the owner writes.
    #[serde(default = "default_true")]
    pub exempt_owner_messages: bool,
    /// Where downloaded media is kept. Empty = `{data_dir}/antidelete`.
    #[serde(default)]
    pub temp_dir: String,
    /// Entries older than this are evicted by the sweep.
    #[serde(default = "default_max_shadow_age_ms")]
    pub max_shadow_age_ms: u64,
    #[serde(default = "default_sweep_interval_ms")]
    pub sweep_interval_ms: u64,
    /// Capacity bound; the oldest entry is evicted when full.
    #[serde(default = "default_max_entries")]
    pub max_entries: usize,
    #[serde(default = "default_download_timeout_secs")]
    pub download_timeout_secs: u64,
    /// Applies to report delivery, media delivery and group-name lookups.
    #[serde(default = "default_send_timeout_secs")]
    pub send_timeout_secs: u64,
}

impl Default for AntiDeleteConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            owner: String::new(),
            report_owner_deletions: false,
            exempt_owner_messages: true,
            temp_dir: String::new(),
            max_shadow_age_ms: default_max_shadow_age_ms(),
            sweep_interval_ms: default_sweep_interval_ms(),
            max_entries: default_max_entries(),
            download_timeout_secs: default_download_timeout_secs(),
            send_timeout_secs: default_send_timeout_secs(),
        }
    }
}

impl AntiDeleteConfig {
    /// Resolve the media directory against the data dir.
    pub fn temp_dir_path(&self, data_dir: &str) -> PathBuf {
        if self.temp_dir.trim().is_empty() {
            PathBuf::from(shellexpand(data_dir)).join("antidelete")
        } else {
            PathBuf::from(shellexpand(&self.temp_dir))
        }
    }

    pub fn max_shadow_age(&self) -> Duration {
        Duration::from_millis(self.max_shadow_age_ms)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_millis(self.sweep_interval_ms)
    }

    pub fn download_timeout(&self) -> Duration {
        Duration::from_secs(self.download_timeout_secs)
    }

    pub fn send_timeout(&self) -> Duration {
        Duration::from_secs(self.send_timeout_secs)
    }

    /// Owner account number: `"+94741907061"` and
    /// `"94741907061:3@s.whatsapp.net"` both give `"94741907061"`.
    pub fn owner_user(&self) -> &str {
        identity_user(&self.owner)
    }

    /// Whether `identity` is the owner, whatever form either side is written in.
    pub fn is_owner(&self, identity: &str) -> bool {
        same_identity(identity, &self.owner)
    }

    /// Report destination as a full JID; bare phone numbers get the user server.
    pub fn owner_jid(&self) -> String {
        let owner = self.owner.trim().trim_start_matches('+');
        match owner.split_once('@') {
            Some((_, server)) => format!("{}@{server}", self.owner_user()),
            None => format!("{}@s.whatsapp.net", self.owner_user()),
        }
    }
}

/// AI responder settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponderConfig {
    #[serde(default)]
    pub enabled: bool,
    /// Empty = built-in prompt.
    #[serde(default)]
    pub system_prompt: String,
    /// Turns of history kept per user. 0 disables history.
    #[serde(default = "default_max_history")]
    pub max_history: usize,
    /// History is dropped after this much inactivity.
    #[serde(default = "default_session_timeout_mins")]
    pub session_timeout_mins: u64,
    #[serde(default)]
    pub reply_in_groups: bool,
}

impl Default for ResponderConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            system_prompt: String::new(),
            max_history: default_max_history(),
            session_timeout_mins: default_session_timeout_mins(),
            reply_in_groups: false,
        }
    }
}

/// Blocklist and spam guard in front of the responder.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecurityConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Messages per user per minute before replies stop.
    #[serde(default = "default_max_messages_per_minute")]
    pub max_messages_per_minute: u32,
    /// Spam warnings a user collects before being blocked.
    #[serde(default = "default_auto_block_threshold")]
    pub auto_block_threshold: u32,
    #[serde(default = "default_true")]
    pub auto_block: bool,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_messages_per_minute: default_max_messages_per_minute(),
            auto_block_threshold: default_auto_block_threshold(),
            auto_block: true,
        }
    }
}

/// `!`-prefixed commands the owner can send to the bot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandsConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
}

impl Default for CommandsConfig {
    fn default() -> Self {
        Self { enabled: true }
    }
}

impl Config {
    /// Reject settings the runtime cannot work with.
    pub fn validate(&self) -> Result<(), KnightError> {
        let ad = &self.anti_delete;
        if ad.enabled {
            if ad.owner_user().is_empty() {
                return Err(KnightError::Config(
                    "anti_delete is enabled but owner is empty".into(),
                ));
            }
            if ad.sweep_interval_ms == 0 {
                return Err(KnightError::Config(
                    "anti_delete.sweep_interval_ms must be greater than zero".into(),
                ));
            }
            if ad.max_entries == 0 {
                return Err(KnightError::Config(
                    "anti_delete.max_entries must be greater than zero".into(),
                ));
            }
        }
        let sec = &self.security;
        if sec.enabled && sec.max_messages_per_minute == 0 {
            return Err(KnightError::Config(
                "security.max_messages_per_minute must be greater than zero".into(),
            ));
        }
        Ok(())
    }
}

/// Expand `~` to home directory.
pub fn shellexpand(path: &str) -> String {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = std::env::var_os("HOME") {
            return format!("{}/{rest}", home.to_string_lossy());
        }
    }
    path.to_string()
}

/// Where a loaded configuration came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigSource {
    File,
    /// The file does not exist; every setting is a default.
    Defaults,
}

/// Load configuration from a TOML file.
///
/// Falls back to defaults if the file does not exist. Runs before logging is
/// set up, so the caller reports the source.
pub fn load(path: &str) -> Result<(Config, ConfigSource), KnightError> {
    let path = Path::new(path);
    if !path.exists() {
        return Ok((Config::default(), ConfigSource::Defaults));
    }

    let content = std::fs::read_to_string(path)
        .map_err(|e| KnightError::Config(format!("failed to read {}: {}", path.display(), e)))?;

    let config: Config = toml::from_str(&content)
        .map_err(|e| KnightError::Config(format!("failed to parse config: {}", e)))?;

    Ok((config, ConfigSource::File))
}
