//! Client configuration parsing, validation, and credential loading.

use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use tracing::{debug, warn};

use crate::acp::handshake::FsCapabilities;
use crate::acp::spawner::{LaunchConfig, ACP_FLAG, DEFAULT_COMMAND};
use crate::{AppError, Result};

/// Keychain service holding the API key.
pub const KEYRING_SERVICE: &str = "gemini-acp";

/// Keychain entry name for the API key.
pub const KEYRING_API_KEY: &str = "api_key";

/// Environment variable consulted when the keychain has no API key.
pub const API_KEY_ENV: &str = "GEMINI_ACP_API_KEY";

/// Handshake and shutdown timeouts, in seconds.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct TimeoutConfig {
    /// Bounded wait for the `initialize` result.
    #[serde(default = "default_initialize_seconds")]
    pub initialize_seconds: u64,
    /// Bounded wait for the `session/new` result.
    #[serde(default = "default_session_seconds")]
    pub session_seconds: u64,
    /// Time the agent gets to exit after stdin closes before it is killed.
    #[serde(default = "default_shutdown_grace_seconds")]
    pub shutdown_grace_seconds: u64,
}

impl TimeoutConfig {
    /// `initialize_seconds` as a [`Duration`].
    #[must_use]
    pub fn initialize(&self) -> Duration {
        Duration::from_secs(self.initialize_seconds)
    }

    /// `session_seconds` as a [`Duration`].
    #[must_use]
    pub fn session(&self) -> Duration {
        Duration::from_secs(self.session_seconds)
    }

    /// `shutdown_grace_seconds` as a [`Duration`].
    #[must_use]
    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_seconds)
    }
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            initialize_seconds: default_initialize_seconds(),
            session_seconds: default_session_seconds(),
            shutdown_grace_seconds: default_shutdown_grace_seconds(),
        }
    }
}

fn default_initialize_seconds() -> u64 {
    30
}

fn default_session_seconds() -> u64 {
    10
}

fn default_shutdown_grace_seconds() -> u64 {
    5
}

/// Filesystem capabilities advertised in `initialize`.
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct FsConfig {
    /// Advertise `fs/read_text_file`.
    #[serde(default)]
    pub read_text_file: bool,
    /// Advertise `fs/write_text_file`.
    #[serde(default)]
    pub write_text_file: bool,
}

fn default_command() -> String {
    DEFAULT_COMMAND.into()
}

fn default_agent_args() -> Vec<String> {
    vec![ACP_FLAG.into()]
}

fn default_api_key_env() -> String {
    "GOOGLE_API_KEY".into()
}

fn default_log_level() -> String {
    "error".into()
}

/// Client configuration parsed from a TOML file. Every field is optional.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct ClientConfig {
    /// Agent executable.
    #[serde(default = "default_command")]
    pub gemini_command: String,
    /// Arguments passed to the agent.
    #[serde(default = "default_agent_args")]
    pub agent_args: Vec<String>,
    /// Fixed working directory for new sessions.
    #[serde(default)]
    pub working_directory: Option<PathBuf>,
    /// Environment variable the API key is injected into.
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
    /// API key (populated at runtime, never read from the file).
    #[serde(skip)]
    pub api_key: Option<String>,
    /// Default log filter when `RUST_LOG` is unset.
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Fail the session instead of continuing when either handshake step times
    /// out.
    #[serde(default)]
    pub strict_handshake: bool,
    /// Timeouts.
    #[serde(default)]
    pub timeouts: TimeoutConfig,
    /// Filesystem capabilities.
    #[serde(default)]
    pub fs: FsConfig,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            gemini_command: default_command(),
            agent_args: default_agent_args(),
            working_directory: None,
            api_key_env: default_api_key_env(),
            api_key: None,
            log_level: default_log_level(),
            strict_handshake: false,
            timeouts: TimeoutConfig::default(),
            fs: FsConfig::default(),
        }
    }
}

impl ClientConfig {
    /// Load and validate configuration from a TOML file path.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if the file cannot be read, contains
    /// invalid TOML, or fails validation.
    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .map_err(|err| AppError::Config(format!("failed to read config: {err}")))?;
        Self::from_toml_str(&raw)
    }

    /// Parse configuration from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if parsing or validation fails.
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let config: Self = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Load the API key from the OS keychain with env-var fallback.
    ///
    /// A key that is already set (e.g. from the command line) wins. A
    /// missing key is not an error: the agent may have credentials of its
    /// own.
    pub async fn load_credentials(&mut self) {
        if self.api_key.as_deref().is_some_and(|k| !k.is_empty()) {
            return;
        }
        self.api_key = load_credential(KEYRING_API_KEY, API_KEY_ENV).await;
    }

    /// Pick the session working directory.
    ///
    /// Order: the configured `working_directory`, the first of
    /// `project_folders` that is a directory, the user's home directory,
    /// and finally the current directory.
    #[must_use]
    pub fn resolve_working_directory(&self, project_folders: &[PathBuf]) -> PathBuf {
        if let Some(dir) = &self.working_directory {
            return dir.clone();
        }
        if let Some(dir) = project_folders.iter().find(|p| p.is_dir()) {
            return dir.clone();
        }
        home_dir().unwrap_or_else(|| PathBuf::from("."))
    }

    /// Build the launch description for an agent in `working_directory`.
    ///
    /// `command_override` replaces the configured executable. The API key,
    /// when present, is injected through `api_key_env`.
    #[must_use]
    pub fn launch_config(
        &self,
        working_directory: &Path,
        command_override: Option<&str>,
    ) -> LaunchConfig {
        let command = command_override
            .filter(|c| !c.trim().is_empty())
            .unwrap_or(&self.gemini_command);

        let mut launch = LaunchConfig::new(command, working_directory);
        launch.args.clone_from(&self.agent_args);

        if let Some(key) = self.api_key.as_deref().filter(|k| !k.is_empty()) {
            debug!(var = self.api_key_env.as_str(), "injecting API key into agent environment");
            launch = launch.with_env(&self.api_key_env, key);
        }
        launch
    }

    /// Filesystem capabilities for `initialize`.
    #[must_use]
    pub fn fs_capabilities(&self) -> FsCapabilities {
        FsCapabilities {
            read_text_file: self.fs.read_text_file,
            write_text_file: self.fs.write_text_file,
        }
    }

    fn validate(&self) -> Result<()> {
        if self.gemini_command.trim().is_empty() {
            return Err(AppError::Config("gemini_command must not be empty".into()));
        }

        if self.api_key_env.trim().is_empty() {
            return Err(AppError::Config("api_key_env must not be empty".into()));
        }

        if self.timeouts.shutdown_grace_seconds == 0 {
            return Err(AppError::Config(
                "shutdown_grace_seconds must be greater than zero".into(),
            ));
        }

        Ok(())
    }
}

/// Load a single credential from OS keychain with env-var fallback.
async fn load_credential(keyring_key: &str, env_key: &str) -> Option<String> {
    let key = keyring_key.to_owned();

    // keyring is synchronous I/O.
    let keychain_result = tokio::task::spawn_blocking(move || {
        keyring::Entry::new(KEYRING_SERVICE, &key).and_then(|entry| entry.get_password())
    })
    .await;

    match keychain_result {
        Ok(Ok(value)) if !value.is_empty() => return Some(value),
        Ok(Ok(_)) => {
            warn!(key = keyring_key, "keychain entry is empty, trying env var");
        }
        Ok(Err(err)) => {
            debug!(key = keyring_key, ?err, "keychain lookup failed, trying env var");
        }
        Err(err) => {
            warn!(key = keyring_key, %err, "keychain task failed, trying env var");
        }
    }

    env::var(env_key).ok().filter(|v| !v.is_empty())
}

fn home_dir() -> Option<PathBuf> {
    env::var_os("HOME")
        .or_else(|| env::var_os("USERPROFILE"))
        .filter(|h| !h.is_empty())
        .map(PathBuf::from)
}
