use directories::UserDirs;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;

use crate::error::ConfigError;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Data directory (ledger, credential blob) - computed from home, not serialized
    #[serde(skip)]
    pub data_dir: PathBuf,
    /// Path to config.toml - computed from home, not serialized
    #[serde(skip)]
    pub config_path: PathBuf,

    #[serde(default)]
    pub gmail: GmailConfig,

    #[serde(default)]
    pub bear: BearConfig,

    #[serde(default)]
    pub network: NetworkConfig,

    #[serde(default)]
    pub reliability: ReliabilityConfig,

    #[serde(default)]
    pub notifications: NotificationConfig,
}

/// Mailbox polling settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GmailConfig {
    /// Sender addresses to watch. Empty means the service has nothing to do.
    #[serde(default)]
    pub senders: Vec<String>,

    /// Seconds between poll cycles.
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,

    /// Upper bound on message ids fetched per cycle.
    #[serde(default = "default_max_results")]
    pub max_results: u32,

    /// Remove handled messages from the inbox in addition to marking read.
    #[serde(default)]
    pub archive: bool,

    /// OAuth client id from the Google Cloud console.
    #[serde(default)]
    pub client_id: String,

    /// OAuth client secret from the Google Cloud console.
    #[serde(default)]
    pub client_secret: String,
}

fn default_poll_interval() -> u64 {
    300
}

fn default_max_results() -> u32 {
    10
}

impl Default for GmailConfig {
    fn default() -> Self {
        Self {
            senders: Vec::new(),
            poll_interval_secs: default_poll_interval(),
            max_results: default_max_results(),
            archive: false,
            client_id: String::new(),
            client_secret: String::new(),
        }
    }
}

/// Note formatting settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BearConfig {
    #[serde(default = "default_note_title")]
    pub note_title: String,

    #[serde(default = "default_note_body")]
    pub note_body: String,

    #[serde(default = "default_tags")]
    pub tags: Vec<String>,
}

fn default_note_title() -> String {
    "Email: {subject}".into()
}

fn default_note_body() -> String {
    "# {subject}\n\nFrom: {sender}\nDate: {date}\n\n{body}".into()
}

fn default_tags() -> Vec<String> {
    vec!["email".into(), "gmail".into()]
}

impl Default for BearConfig {
    fn default() -> Self {
        Self {
            note_title: default_note_title(),
            note_body: default_note_body(),
            tags: default_tags(),
        }
    }
}

/// Reachability monitor settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkConfig {
    /// Consecutive failed checks before the monitor reports offline.
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,

    /// Per-probe connect timeout.
    #[serde(default = "default_probe_timeout")]
    pub probe_timeout_secs: u64,

    /// Short retry interval used instead of the poll interval while offline.
    #[serde(default = "default_offline_retry")]
    pub offline_retry_secs: u64,
}

fn default_failure_threshold() -> u32 {
    2
}

fn default_probe_timeout() -> u64 {
    3
}

fn default_offline_retry() -> u64 {
    30
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            failure_threshold: default_failure_threshold(),
            probe_timeout_secs: default_probe_timeout(),
            offline_retry_secs: default_offline_retry(),
        }
    }
}

/// Retry and backoff settings shared by all remote calls.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReliabilityConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Base delay for Transient failures, in milliseconds.
    #[serde(default = "default_base_backoff_ms")]
    pub base_backoff_ms: u64,

    /// Base delay for RateLimit failures, in milliseconds.
    #[serde(default = "default_rate_limit_backoff_ms")]
    pub rate_limit_backoff_ms: u64,

    /// Ceiling on any computed delay, in milliseconds.
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,
}

fn default_max_attempts() -> u32 {
    4
}

fn default_base_backoff_ms() -> u64 {
    1_000
}

fn default_rate_limit_backoff_ms() -> u64 {
    15_000
}

fn default_max_backoff_ms() -> u64 {
    120_000
}

impl Default for ReliabilityConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_backoff_ms: default_base_backoff_ms(),
            rate_limit_backoff_ms: default_rate_limit_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
        }
    }
}

/// User-facing notification settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
}

fn default_true() -> bool {
    true
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self {
            enabled: default_true(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::new(),
            config_path: PathBuf::new(),
            gmail: GmailConfig::default(),
            bear: BearConfig::default(),
            network: NetworkConfig::default(),
            reliability: ReliabilityConfig::default(),
            notifications: NotificationConfig::default(),
        }
    }
}

impl Config {
    pub fn load_or_init() -> Result<Self, ConfigError> {
        let home = UserDirs::new()
            .map(|u| u.home_dir().to_path_buf())
            .ok_or_else(|| ConfigError::Load("could not find home directory".into()))?;
        let mailbear_dir = home.join(".mailbear");
        let config_path = mailbear_dir.join("config.toml");

        if !mailbear_dir.exists() {
            fs::create_dir_all(&mailbear_dir)?;
        }

        if config_path.exists() {
            Self::load_from(&config_path, &mailbear_dir)
        } else {
            let config = Self {
                config_path: config_path.clone(),
                data_dir: mailbear_dir,
                ..Self::default()
            };
            config.save()?;
            Ok(config)
        }
    }

    pub fn load_from(
        config_path: &std::path::Path,
        data_dir: &std::path::Path,
    ) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(config_path)?;
        let mut config: Config = toml::from_str(&contents)
            .map_err(|e| ConfigError::Load(format!("failed to parse config file: {e}")))?;
        config.config_path = config_path.to_path_buf();
        config.data_dir = data_dir.to_path_buf();
        config.validate()?;
        Ok(config)
    }

    pub fn save(&self) -> Result<(), ConfigError> {
        let toml_str = toml::to_string_pretty(self)
            .map_err(|e| ConfigError::Load(format!("failed to serialize config: {e}")))?;
        fs::write(&self.config_path, toml_str)?;
        Ok(())
    }

    /// Reject settings that would make the loop misbehave rather than limp along.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.gmail.poll_interval_secs == 0 {
            return Err(ConfigError::Validation(
                "gmail.poll_interval_secs must be at least 1".into(),
            ));
        }
        if self.network.failure_threshold == 0 {
            return Err(ConfigError::Validation(
                "network.failure_threshold must be at least 1".into(),
            ));
        }
        if self.reliability.max_attempts == 0 {
            return Err(ConfigError::Validation(
                "reliability.max_attempts must be at least 1".into(),
            ));
        }
        for sender in &self.gmail.senders {
            if !sender.contains('@') {
                return Err(ConfigError::Validation(format!(
                    "gmail.senders entry {sender:?} is not an email address"
                )));
            }
        }
        Ok(())
    }

    pub fn ledger_path(&self) -> PathBuf {
        self.data_dir.join("processed.jsonl")
    }

    pub fn credential_path(&self) -> PathBuf {
        self.data_dir.join("credentials.enc")
    }
}
