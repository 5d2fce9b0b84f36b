//! Configuration of the `caboot` command line client.
//!
//! The protocol core never reads this. The CLI resolves values from the
//! config file and its own arguments and passes them down explicitly.

use std::{
    fmt,
    fs::File,
    io::{self, Read},
    path::{Path, PathBuf},
    str::FromStr,
    time::Duration,
};

use log::LevelFilter;
use serde::{Deserialize, Deserializer, de};
use url::Url;

use crate::{
    commons::error::Error,
    constants::{DFLT_HTTP_TIMEOUT_SECS, DFLT_TOKEN_CLOCK_SKEW_SECS, DFLT_TOKEN_LIFETIME_SECS},
    token::TokenLifetime,
};

//------------ LogType -------------------------------------------------------

/// The target to log to.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum LogType {
    #[default]
    Stderr,
    File,
}

impl<'de> Deserialize<'de> for LogType {
    fn deserialize<D>(d: D) -> Result<LogType, D::Error>
    where
        D: Deserializer<'de>,
    {
        let string = String::deserialize(d)?;
        match string.as_str() {
            "stderr" => Ok(LogType::Stderr),
            "file" => Ok(LogType::File),
            _ => Err(de::Error::custom(format!(
                "expected \"stderr\" or \"file\", found : \"{}\"",
                string
            ))),
        }
    }
}

fn de_level_filter<'de, D>(d: D) -> Result<LevelFilter, D::Error>
where
    D: Deserializer<'de>,
{
    let string = String::deserialize(d)?;
    LevelFilter::from_str(&string).map_err(de::Error::custom)
}

//------------ Config --------------------------------------------------------

#[derive(Clone, Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    pub ca_url: Option<Url>,
    pub root: Option<PathBuf>,
    pub fingerprint: Option<String>,

    pub provisioner_kid: Option<String>,
    pub provisioner_issuer: Option<String>,
    pub provisioner_key: Option<PathBuf>,
    pub provisioner_secret_file: Option<PathBuf>,
    pub password_file: Option<PathBuf>,

    #[serde(default = "Config::dflt_http_timeout_seconds")]
    pub http_timeout_seconds: u64,

    #[serde(default = "Config::dflt_token_lifetime_seconds")]
    pub token_lifetime_seconds: i64,

    #[serde(default = "Config::dflt_token_clock_skew_seconds")]
    pub token_clock_skew_seconds: i64,

    #[serde(default = "Config::dflt_log_level", deserialize_with = "de_level_filter")]
    pub log_level: LevelFilter,

    #[serde(default)]
    pub log_type: LogType,

    pub log_file: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            ca_url: None,
            root: None,
            fingerprint: None,
            provisioner_kid: None,
            provisioner_issuer: None,
            provisioner_key: None,
            provisioner_secret_file: None,
            password_file: None,
            http_timeout_seconds: Self::dflt_http_timeout_seconds(),
            token_lifetime_seconds: Self::dflt_token_lifetime_seconds(),
            token_clock_skew_seconds: Self::dflt_token_clock_skew_seconds(),
            log_level: Self::dflt_log_level(),
            log_type: LogType::default(),
            log_file: None,
        }
    }
}

impl Config {
    fn dflt_http_timeout_seconds() -> u64 {
        DFLT_HTTP_TIMEOUT_SECS
    }

    fn dflt_token_lifetime_seconds() -> i64 {
        DFLT_TOKEN_LIFETIME_SECS
    }

    fn dflt_token_clock_skew_seconds() -> i64 {
        DFLT_TOKEN_CLOCK_SKEW_SECS
    }

    fn dflt_log_level() -> LevelFilter {
        LevelFilter::Info
    }

    pub fn parse(file_path: &Path) -> Result<Self, ConfigError> {
        let mut v = String::new();

        let mut file = File::open(file_path).map_err(|e| {
            ConfigError::other(format!("Could not read config file '{}': {}", file_path.display(), e))
        })?;

        file.read_to_string(&mut v).map_err(|e| {
            ConfigError::other(format!("Could not read config file '{}': {}", file_path.display(), e))
        })?;

        Self::parse_str(&v)
    }

    pub fn parse_str(s: &str) -> Result<Self, ConfigError> {
        let config: Config =
            toml::from_str(s).map_err(|err| ConfigError::other(format!("Error parsing config file: {err}")))?;
        config.verify()?;
        Ok(config)
    }

    fn verify(&self) -> Result<(), ConfigError> {
        if self.http_timeout_seconds == 0 {
            return Err(ConfigError::other("http_timeout_seconds must be greater than 0"));
        }
        if self.token_lifetime_seconds <= 0 {
            return Err(ConfigError::other("token_lifetime_seconds must be greater than 0"));
        }
        if self.token_clock_skew_seconds < 0 {
            return Err(ConfigError::other("token_clock_skew_seconds must not be negative"));
        }
        if self.log_type == LogType::File && self.log_file.is_none() {
            return Err(ConfigError::other("log_file not configured with log_type = \"file\""));
        }
        if self.provisioner_key.is_some() && self.provisioner_secret_file.is_some() {
            return Err(ConfigError::other(
                "provisioner_key and provisioner_secret_file are mutually exclusive",
            ));
        }
        Ok(())
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_seconds)
    }

    pub fn token_lifetime(&self) -> TokenLifetime {
        TokenLifetime {
            lifetime: chrono::Duration::seconds(self.token_lifetime_seconds),
            clock_skew: chrono::Duration::seconds(self.token_clock_skew_seconds),
        }
    }

    /// Sets up logging, once per process.
    pub fn init_logging(&self) -> Result<(), ConfigError> {
        match self.log_type {
            LogType::File => self.file_logger(),
            LogType::Stderr => self.stderr_logger(),
        }
    }

    fn file_logger(&self) -> Result<(), ConfigError> {
        let path = self
            .log_file
            .as_ref()
            .ok_or(ConfigError::other("log_file not configured with log_type = \"file\""))?;
        let log_file = fern::log_file(path)
            .map_err(|e| ConfigError::other(format!("Failed to open log file '{}': {}", path.display(), e)))?;

        self.fern_logger()
            .chain(log_file)
            .apply()
            .map_err(|e| ConfigError::other(format!("Failed to init file logging: {}", e)))
    }

    fn stderr_logger(&self) -> Result<(), ConfigError> {
        self.fern_logger()
            .chain(io::stderr())
            .apply()
            .map_err(|e| ConfigError::other(format!("Failed to init stderr logging: {}", e)))
    }

    /// Creates and returns a fern logger with log level tweaks
    fn fern_logger(&self) -> fern::Dispatch {
        // suppress overly noisy logging
        let framework_level = self.log_level.min(LevelFilter::Warn);

        let show_target = self.log_level == LevelFilter::Trace || self.log_level == LevelFilter::Debug;

        fern::Dispatch::new()
            .format(move |out, message, record| {
                if show_target {
                    out.finish(format_args!(
                        "{} [{}] [{}] {}",
                        chrono::Local::now().format("%Y-%m-%d %H:%M:%S"),
                        record.level(),
                        record.target(),
                        message
                    ))
                } else {
                    out.finish(format_args!(
                        "{} [{}] {}",
                        chrono::Local::now().format("%Y-%m-%d %H:%M:%S"),
                        record.level(),
                        message
                    ))
                }
            })
            .level(self.log_level)
            .level_for("rustls", framework_level)
            .level_for("hyper", framework_level)
            .level_for("hyper_util", framework_level)
            .level_for("mio", framework_level)
            .level_for("native_tls", framework_level)
            .level_for("reqwest", framework_level)
            .level_for("want", framework_level)
    }
}

//------------ ConfigError ---------------------------------------------------

#[derive(Clone, Debug)]
pub enum ConfigError {
    Other(String),
}

impl ConfigError {
    pub fn other(msg: impl fmt::Display) -> Self {
        Self::Other(msg.to_string())
    }
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ConfigError::Other(msg) => write!(f, "{msg}"),
        }
    }
}

impl std::error::Error for ConfigError {}

impl From<ConfigError> for Error {
    fn from(e: ConfigError) -> Self {
        Error::config(e)
    }
}

//------------ Tests ---------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_config_has_defaults() {
        let config = Config::parse_str("").unwrap();
        assert!(config.ca_url.is_none());
        assert_eq!(config.http_timeout(), Duration::from_secs(30));
        assert_eq!(config.token_lifetime().lifetime.num_seconds(), 300);
        assert_eq!(config.token_lifetime().clock_skew.num_seconds(), 60);
        assert_eq!(config.log_level, LevelFilter::Info);
        assert_eq!(config.log_type, LogType::Stderr);
    }

    #[test]
    fn parse_full_config() {
        let config = Config::parse_str(
            r#"
            ca_url = "https://ca.example.com:9000"
            root = "/etc/caboot/root_ca.crt"
            fingerprint = "0d7d3834cf187726cf331c40a31aa7ef6b29ba4df601416c9788f6ee01058cf3"
            provisioner_kid = "k1"
            provisioner_issuer = "admin@example.com"
            provisioner_key = "/etc/caboot/provisioner.key"
            password_file = "/etc/caboot/password"
            http_timeout_seconds = 5
            token_lifetime_seconds = 600
            log_level = "debug"
            log_type = "file"
            log_file = "/var/log/caboot.log"
            "#,
        )
        .unwrap();

        assert_eq!(config.ca_url.as_ref().unwrap().as_str(), "https://ca.example.com:9000/");
        assert_eq!(config.provisioner_kid.as_deref(), Some("k1"));
        assert_eq!(config.http_timeout_seconds, 5);
        assert_eq!(config.token_lifetime().lifetime.num_seconds(), 600);
        assert_eq!(config.log_level, LevelFilter::Debug);
        assert_eq!(config.log_type, LogType::File);
    }

    #[test]
    fn reject_bad_config() {
        for bad in [
            "log_type = \"syslog\"",
            "log_type = \"file\"",
            "log_level = \"loud\"",
            "http_timeout_seconds = 0",
            "token_lifetime_seconds = -5",
            "ca_url = \"not a url\"",
            "unknown_setting = 1",
            "provisioner_key = \"a\"\nprovisioner_secret_file = \"b\"",
        ] {
            assert!(Config::parse_str(bad).is_err(), "accepted: {}", bad);
        }
    }

    #[test]
    fn missing_config_file() {
        let dir = tempfile::tempdir().unwrap();
        assert!(Config::parse(&dir.path().join("caboot.conf")).is_err());
    }
}
