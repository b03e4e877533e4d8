//! Configuration types for the relay.
//!
//! This module provides CLI argument parsing via `arrrg`, an optional YAML
//! settings file, and the resolved [`RelayConfig`] the rest of the crate reads.
//! Values are layered: built-in defaults, then the settings file, then
//! command-line arguments.

use std::path::{Path, PathBuf};
use std::time::Duration;

use arrrg_derive::CommandLine;
use serde::Deserialize;
use url::Url;

use crate::chat::store::{DEFAULT_SESSION_TIMEOUT, DEFAULT_SWEEP_INTERVAL};
use crate::client::{DEFAULT_ENDPOINT, DEFAULT_TIMEOUT};
use crate::delivery::DEFAULT_MAX_ATTEMPTS;
use crate::error::{Error, Result};

/// Environment variable holding the API token.
pub const TOKEN_ENV_VAR: &str = "CHATRELAY_TOKEN";

/// Token file looked up in the working directory.
pub const DEFAULT_TOKEN_FILE: &str = "chatrelay_token.txt";

/// Token file location used by older deployments.
pub const LEGACY_TOKEN_FILE: &str = "binx-ai/binx_token.txt";

/// How long a reset confirmation stays visible.
pub const DEFAULT_RESET_LINGER: Duration = Duration::from_secs(3);

/// Command-line arguments for the chatrelay-chat tool.
#[derive(CommandLine, Debug, Default, PartialEq, Eq)]
pub struct RelayArgs {
    /// Chat API endpoint.
    #[arrrg(optional, "Chat API endpoint URL", "URL")]
    pub endpoint: Option<String>,

    /// File to read the API token from.
    #[arrrg(optional, "Read the API token from this file", "PATH")]
    pub token_file: Option<String>,

    /// YAML settings file.
    #[arrrg(optional, "YAML settings file", "PATH")]
    pub config: Option<String>,

    /// Request timeout in seconds.
    #[arrrg(optional, "Request timeout in seconds (default: 30)", "SECS")]
    pub timeout_secs: Option<u64>,

    /// Session inactivity timeout in minutes.
    #[arrrg(optional, "Session inactivity timeout in minutes (default: 20)", "MINS")]
    pub session_timeout_mins: Option<u64>,

    /// Interval of the expired-session sweep in seconds.
    #[arrrg(optional, "Expired session sweep interval in seconds (default: 60)", "SECS")]
    pub sweep_interval_secs: Option<u64>,

    /// Attempts per outbound message.
    #[arrrg(optional, "Attempts per outbound message (default: 3)", "N")]
    pub max_attempts: Option<u32>,

    /// Cap on turns replayed per request.
    #[arrrg(optional, "Replay at most this many turns per request", "N")]
    pub max_turns: Option<usize>,

    /// Log level or filter directive.
    #[arrrg(optional, "Log level (default: warn)", "LEVEL")]
    pub log_level: Option<String>,

    /// Log format.
    #[arrrg(optional, "Log format: pretty or json (default: pretty)", "FORMAT")]
    pub log_format: Option<String>,

    /// Disable ANSI colors and styles.
    #[arrrg(flag, "Disable ANSI colors/styles")]
    pub no_color: bool,
}

/// Settings read from a YAML file; every field is optional.
#[derive(Debug, Default, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
struct RelayConfigFile {
    endpoint: Option<String>,
    token_file: Option<PathBuf>,
    timeout_secs: Option<u64>,
    session_timeout_mins: Option<u64>,
    sweep_interval_secs: Option<u64>,
    max_attempts: Option<u32>,
    max_turns: Option<usize>,
    reset_linger_secs: Option<u64>,
    log_level: Option<String>,
    log_format: Option<String>,
    color: Option<bool>,
}

/// Resolved relay configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayConfig {
    /// The chat API endpoint.
    pub endpoint: String,

    /// Explicit token file, consulted before the default locations.
    pub token_file: Option<PathBuf>,

    /// Bound on connecting, on headers, and on each body read.
    pub request_timeout: Duration,

    /// Sessions idle longer than this are discarded.
    pub session_timeout: Duration,

    /// How often expired sessions are swept.
    pub sweep_interval: Duration,

    /// Attempts per outbound message, including the first.
    pub max_attempts: u32,

    /// Optional cap on turns replayed per request. `None` replays everything.
    pub max_turns: Option<usize>,

    /// How long a reset confirmation stays visible.
    pub reset_linger: Duration,

    /// Log level or `EnvFilter` directive.
    pub log_level: String,

    /// `pretty` or `json`.
    pub log_format: String,

    /// Whether to use ANSI colors and styles in output.
    pub use_color: bool,
}

impl RelayConfig {
    /// Creates a config with default values.
    pub fn new() -> Self {
        Self {
            endpoint: DEFAULT_ENDPOINT.to_string(),
            token_file: None,
            request_timeout: DEFAULT_TIMEOUT,
            session_timeout: DEFAULT_SESSION_TIMEOUT,
            sweep_interval: DEFAULT_SWEEP_INTERVAL,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            max_turns: None,
            reset_linger: DEFAULT_RESET_LINGER,
            log_level: "warn".to_string(),
            log_format: "pretty".to_string(),
            use_color: true,
        }
    }

    /// Builds the config from defaults, the settings file named by
    /// `args.config` (if any), and then the remaining arguments.
    ///
    /// # Errors
    ///
    /// [`Error::Io`] if the settings file cannot be read, and
    /// [`Error::Config`] if it does not parse or the result fails
    /// [`validate`](Self::validate).
    pub fn resolve(args: RelayArgs) -> Result<Self> {
        let mut config = Self::new();
        if let Some(path) = &args.config {
            config = config.with_file(Path::new(path))?;
        }
        let config = config.with_args(args)?;
        config.validate()?;
        Ok(config)
    }

    /// Overlays settings from a YAML file.
    pub fn with_file(self, path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            Error::io(format!("failed to read settings file {}", path.display()), e)
        })?;
        self.with_yaml(&text)
    }

    /// Overlays settings from YAML text.
    pub fn with_yaml(mut self, text: &str) -> Result<Self> {
        let file: RelayConfigFile = serde_yaml::from_str(text)
            .map_err(|e| Error::config(format!("invalid settings file: {e}"), None))?;
        if let Some(endpoint) = file.endpoint {
            self.endpoint = endpoint;
        }
        if file.token_file.is_some() {
            self.token_file = file.token_file;
        }
        if let Some(secs) = file.timeout_secs {
            self.request_timeout = Duration::from_secs(secs);
        }
        if let Some(mins) = file.session_timeout_mins {
            self.session_timeout = session_timeout_from_mins(mins)?;
        }
        if let Some(secs) = file.sweep_interval_secs {
            self.sweep_interval = Duration::from_secs(secs);
        }
        if let Some(n) = file.max_attempts {
            self.max_attempts = n;
        }
        if file.max_turns.is_some() {
            self.max_turns = file.max_turns;
        }
        if let Some(secs) = file.reset_linger_secs {
            self.reset_linger = Duration::from_secs(secs);
        }
        if let Some(level) = file.log_level {
            self.log_level = level;
        }
        if let Some(format) = file.log_format {
            self.log_format = format;
        }
        if let Some(color) = file.color {
            self.use_color = color;
        }
        Ok(self)
    }

    fn with_args(mut self, args: RelayArgs) -> Result<Self> {
        if let Some(endpoint) = args.endpoint {
            self.endpoint = endpoint;
        }
        if let Some(path) = args.token_file {
            self.token_file = Some(PathBuf::from(path));
        }
        if let Some(secs) = args.timeout_secs {
            self.request_timeout = Duration::from_secs(secs);
        }
        if let Some(mins) = args.session_timeout_mins {
            self.session_timeout = session_timeout_from_mins(mins)?;
        }
        if let Some(secs) = args.sweep_interval_secs {
            self.sweep_interval = Duration::from_secs(secs);
        }
        if let Some(n) = args.max_attempts {
            self.max_attempts = n;
        }
        if args.max_turns.is_some() {
            self.max_turns = args.max_turns;
        }
        if let Some(level) = args.log_level {
            self.log_level = level;
        }
        if let Some(format) = args.log_format {
            self.log_format = format;
        }
        if args.no_color {
            self.use_color = false;
        }
        Ok(self)
    }

    /// Checks that the settings are usable.
    pub fn validate(&self) -> Result<()> {
        match Url::parse(&self.endpoint) {
            Ok(url) if matches!(url.scheme(), "http" | "https") => {}
            Ok(url) => {
                return Err(Error::config(
                    format!("unsupported endpoint scheme: {}", url.scheme()),
                    Some("endpoint".to_string()),
                ));
            }
            Err(e) => {
                return Err(Error::config(
                    format!("invalid endpoint: {e}"),
                    Some("endpoint".to_string()),
                ));
            }
        }
        let positive = [
            ("timeout_secs", self.request_timeout),
            ("session_timeout_mins", self.session_timeout),
            ("sweep_interval_secs", self.sweep_interval),
        ];
        for (param, value) in positive {
            if value.is_zero() {
                return Err(Error::config(
                    "must be greater than zero",
                    Some(param.to_string()),
                ));
            }
        }
        if self.max_attempts == 0 {
            return Err(Error::config(
                "must be at least 1",
                Some("max_attempts".to_string()),
            ));
        }
        if self.max_turns == Some(0) {
            return Err(Error::config(
                "must be at least 1",
                Some("max_turns".to_string()),
            ));
        }
        if !matches!(self.log_format.as_str(), "pretty" | "json") {
            return Err(Error::config(
                format!("unknown log format: {}", self.log_format),
                Some("log_format".to_string()),
            ));
        }
        Ok(())
    }

    /// Sets the endpoint.
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    /// Sets the request timeout.
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Sets the session inactivity timeout.
    pub fn with_session_timeout(mut self, timeout: Duration) -> Self {
        self.session_timeout = timeout;
        self
    }

    /// Sets the sweep interval.
    pub fn with_sweep_interval(mut self, interval: Duration) -> Self {
        self.sweep_interval = interval;
        self
    }

    /// Sets the attempts per outbound message.
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    /// Sets the replay cap.
    pub fn with_max_turns(mut self, max_turns: Option<usize>) -> Self {
        self.max_turns = max_turns;
        self
    }

    /// Sets how long reset confirmations stay visible.
    pub fn with_reset_linger(mut self, linger: Duration) -> Self {
        self.reset_linger = linger;
        self
    }

    /// Sets the token file.
    pub fn with_token_file(mut self, path: Option<PathBuf>) -> Self {
        self.token_file = path;
        self
    }

    /// Disables ANSI color output.
    pub fn without_color(mut self) -> Self {
        self.use_color = false;
        self
    }
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl TryFrom<RelayArgs> for RelayConfig {
    type Error = Error;

    fn try_from(args: RelayArgs) -> Result<Self> {
        RelayConfig::new().with_args(args)
    }
}

fn session_timeout_from_mins(mins: u64) -> Result<Duration> {
    mins.checked_mul(60).map(Duration::from_secs).ok_or_else(|| {
        Error::config(
            format!("session timeout of {mins} minutes is too large"),
            Some("session_timeout_mins".to_string()),
        )
    })
}

/// Finds the API token.
///
/// The `CHATRELAY_TOKEN` environment variable wins. Otherwise the configured
/// token file is read, then `chatrelay_token.txt`, then the legacy
/// `binx-ai/binx_token.txt`. Values are trimmed and empty values are skipped.
///
/// # Errors
///
/// [`Error::Authentication`] if no token is found.
pub fn load_token(config: &RelayConfig) -> Result<String> {
    let mut candidates = Vec::new();
    if let Some(path) = &config.token_file {
        candidates.push(path.clone());
    }
    candidates.push(PathBuf::from(DEFAULT_TOKEN_FILE));
    candidates.push(PathBuf::from(LEGACY_TOKEN_FILE));
    load_token_from(std::env::var(TOKEN_ENV_VAR).ok(), &candidates)
}

fn load_token_from(env_value: Option<String>, candidates: &[PathBuf]) -> Result<String> {
    if let Some(token) = env_value.map(|t| t.trim().to_string()) {
        if !token.is_empty() {
            tracing::debug!(source = TOKEN_ENV_VAR, "loaded API token");
            return Ok(token);
        }
    }
    for path in candidates {
        let Ok(contents) = std::fs::read_to_string(path) else {
            continue;
        };
        let token = contents.trim();
        if !token.is_empty() {
            tracing::debug!(source = %path.display(), "loaded API token");
            return Ok(token.to_string());
        }
    }
    Err(Error::authentication(format!(
        "no API token: set {TOKEN_ENV_VAR} or create {DEFAULT_TOKEN_FILE}"
    )))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config() {
        let config = RelayConfig::new();
        assert_eq!(config.endpoint, "https://binx.cc/api/ai-chat");
        assert_eq!(config.request_timeout, Duration::from_secs(30));
        assert_eq!(config.session_timeout, Duration::from_secs(20 * 60));
        assert_eq!(config.sweep_interval, Duration::from_secs(60));
        assert_eq!(config.max_attempts, 3);
        assert_eq!(config.max_turns, None);
        assert_eq!(config.reset_linger, Duration::from_secs(3));
        assert!(config.use_color);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn config_from_args_defaults() {
        let config = RelayConfig::try_from(RelayArgs::default()).unwrap();
        assert_eq!(config, RelayConfig::new());
    }

    #[test]
    fn config_from_args_custom() {
        let args = RelayArgs {
            endpoint: Some("http://localhost:8080/chat".to_string()),
            timeout_secs: Some(5),
            session_timeout_mins: Some(1),
            max_attempts: Some(5),
            max_turns: Some(10),
            no_color: true,
            ..RelayArgs::default()
        };
        let config = RelayConfig::try_from(args).unwrap();
        assert_eq!(config.endpoint, "http://localhost:8080/chat");
        assert_eq!(config.request_timeout, Duration::from_secs(5));
        assert_eq!(config.session_timeout, Duration::from_secs(60));
        assert_eq!(config.max_attempts, 5);
        assert_eq!(config.max_turns, Some(10));
        assert!(!config.use_color);
    }

    #[test]
    fn yaml_overlay() {
        let config = RelayConfig::new()
            .with_yaml("session_timeout_mins: 5\nmax_turns: 8\nlog_format: json\ncolor: false\n")
            .unwrap();
        assert_eq!(config.session_timeout, Duration::from_secs(300));
        assert_eq!(config.max_turns, Some(8));
        assert_eq!(config.log_format, "json");
        assert!(!config.use_color);
        assert_eq!(config.endpoint, DEFAULT_ENDPOINT);
    }

    #[test]
    fn yaml_unknown_key_rejected() {
        let err = RelayConfig::new().with_yaml("modle: gpt\n").unwrap_err();
        assert!(err.is_config());
    }

    #[test]
    fn args_override_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("relay.yaml");
        std::fs::write(&path, "max_attempts: 7\nsweep_interval_secs: 10\n").unwrap();
        let args = RelayArgs {
            config: Some(path.to_string_lossy().into_owned()),
            max_attempts: Some(2),
            ..RelayArgs::default()
        };
        let config = RelayConfig::resolve(args).unwrap();
        assert_eq!(config.max_attempts, 2);
        assert_eq!(config.sweep_interval, Duration::from_secs(10));
    }

    #[test]
    fn huge_session_timeout_is_config_error() {
        let args = RelayArgs {
            session_timeout_mins: Some(u64::MAX),
            ..RelayArgs::default()
        };
        let err = RelayConfig::resolve(args).unwrap_err();
        assert!(err.is_config());

        let err = RelayConfig::new()
            .with_yaml("session_timeout_mins: 18446744073709551615\n")
            .unwrap_err();
        assert!(err.is_config());
    }

    #[test]
    fn missing_settings_file_is_io_error() {
        let args = RelayArgs {
            config: Some("/definitely/not/here.yaml".to_string()),
            ..RelayArgs::default()
        };
        let err = RelayConfig::resolve(args).unwrap_err();
        assert!(matches!(err, Error::Io { .. }));
    }

    #[test]
    fn validate_rejects_bad_values() {
        let err = RelayConfig::new()
            .with_endpoint("not a url")
            .validate()
            .unwrap_err();
        assert!(matches!(err, Error::Config { param: Some(ref p), .. } if p == "endpoint"));

        let err = RelayConfig::new()
            .with_endpoint("ftp://example.com/")
            .validate()
            .unwrap_err();
        assert!(err.is_config());

        let err = RelayConfig::new()
            .with_max_attempts(0)
            .validate()
            .unwrap_err();
        assert!(matches!(err, Error::Config { param: Some(ref p), .. } if p == "max_attempts"));

        let err = RelayConfig::new()
            .with_sweep_interval(Duration::ZERO)
            .validate()
            .unwrap_err();
        assert!(err.is_config());

        let err = RelayConfig::new()
            .with_max_turns(Some(0))
            .validate()
            .unwrap_err();
        assert!(err.is_config());
    }

    #[test]
    fn token_from_env_wins() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("token.txt");
        std::fs::write(&file, "from-file").unwrap();
        let token = load_token_from(Some("  from-env \n".to_string()), &[file]).unwrap();
        assert_eq!(token, "from-env");
    }

    #[test]
    fn token_falls_back_through_files() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("missing.txt");
        let empty = dir.path().join("empty.txt");
        let legacy = dir.path().join("legacy.txt");
        std::fs::write(&empty, "   \n").unwrap();
        std::fs::write(&legacy, "legacy-token\n").unwrap();

        let token = load_token_from(Some(String::new()), &[missing, empty, legacy]).unwrap();
        assert_eq!(token, "legacy-token");
    }

    #[test]
    fn no_token_is_authentication_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = load_token_from(None, &[dir.path().join("nope.txt")]).unwrap_err();
        assert!(err.is_authentication());
    }
}
