use crate::answer::{DEFAULT_FALLBACK_ANSWER, DEFAULT_PLACEHOLDER_ANSWER};
use crate::subjects::DEFAULT_SUBJECTS;
use clap::Parser;
use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::fmt;
use std::path::Path;
use std::time::Duration;

/// Prefix for environment overrides, e.g. `STUDYBRAIN_SERVER__PORT=8000`.
pub const ENV_PREFIX: &str = "STUDYBRAIN";

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Config file path
    #[arg(short, long, env = "CONFIG_FILE")]
    pub config: Option<String>,

    /// Address to bind
    #[arg(long, env = "HOST")]
    pub host: Option<String>,

    /// Port to listen on
    #[arg(long, env = "PORT")]
    pub port: Option<u16>,

    /// Session cookie signing secret (at least 64 bytes)
    #[arg(long, env = "SECRET_KEY", hide_env_values = true)]
    pub secret_key: Option<String>,

    /// Emit logs as JSON
    #[arg(long, env = "LOG_JSON")]
    pub log_json: Option<bool>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub session: SessionConfig,
    pub study: StudyConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub request_timeout_secs: u64,
}

#[derive(Deserialize, Clone)]
pub struct SessionConfig {
    pub cookie_name: String,
    #[serde(default)]
    pub secret_key: Option<String>,
    pub idle_timeout_secs: u64,
    pub cleanup_interval_secs: u64,
}

impl fmt::Debug for SessionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionConfig")
            .field("cookie_name", &self.cookie_name)
            .field("secret_key", &self.secret_key.as_ref().map(|_| "<redacted>"))
            .field("idle_timeout_secs", &self.idle_timeout_secs)
            .field("cleanup_interval_secs", &self.cleanup_interval_secs)
            .finish()
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct StudyConfig {
    #[serde(default = "default_subjects")]
    pub subjects: Vec<String>,
    pub placeholder_answer: String,
    pub fallback_answer: String,
    pub answer_timeout_secs: u64,
    pub redirect_target: String,
    pub redirect_delay_seconds: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct LoggingConfig {
    pub json: bool,
}

fn default_subjects() -> Vec<String> {
    DEFAULT_SUBJECTS.iter().map(ToString::to_string).collect()
}

impl ServerConfig {
    #[must_use]
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

impl SessionConfig {
    #[must_use]
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }

    #[must_use]
    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_secs(self.cleanup_interval_secs.max(1))
    }
}

impl StudyConfig {
    #[must_use]
    pub fn answer_timeout(&self) -> Duration {
        Duration::from_secs(self.answer_timeout_secs)
    }
}

impl AppConfig {
    /// Check that `0 < answer timeout < request timeout < idle timeout`.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let request = self.server.request_timeout_secs;
        let answer = self.study.answer_timeout_secs;
        let idle = self.session.idle_timeout_secs;

        if answer == 0 {
            return Err(ConfigError::Message(
                "study.answer_timeout_secs must be greater than 0".to_string(),
            ));
        }
        if request <= answer {
            return Err(ConfigError::Message(format!(
                "server.request_timeout_secs ({request}) must be greater than \
                 study.answer_timeout_secs ({answer})"
            )));
        }
        if idle <= request {
            return Err(ConfigError::Message(format!(
                "session.idle_timeout_secs ({idle}) must be greater than \
                 server.request_timeout_secs ({request})"
            )));
        }
        Ok(())
    }

    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from_args(std::env::args())
    }

    /// Layer defaults, the config file, `STUDYBRAIN_` environment variables
    /// and CLI flags, in increasing priority.
    pub fn load_from_args<I, T>(args: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = T>,
        T: Into<std::ffi::OsString> + Clone,
    {
        let cli = Cli::try_parse_from(args).map_err(|e| ConfigError::Message(e.to_string()))?;

        let mut builder = Config::builder()
            .set_default("server.host", "127.0.0.1")?
            .set_default("server.port", 5001)?
            .set_default("server.request_timeout_secs", 60)?
            .set_default("session.cookie_name", "studybrain_session")?
            .set_default("session.idle_timeout_secs", 30 * 60)?
            .set_default("session.cleanup_interval_secs", 60)?
            .set_default("study.placeholder_answer", DEFAULT_PLACEHOLDER_ANSWER)?
            .set_default("study.fallback_answer", DEFAULT_FALLBACK_ANSWER)?
            .set_default("study.answer_timeout_secs", 30)?
            .set_default("study.redirect_target", "/")?
            .set_default("study.redirect_delay_seconds", 3)?
            .set_default("logging.json", false)?;

        // An explicit file must exist; ./config.{yaml,toml,json} is optional.
        builder = match &cli.config {
            Some(path) => builder.add_source(File::from(Path::new(path)).required(true)),
            None => builder.add_source(File::with_name("config").required(false)),
        };

        builder = builder.add_source(
            Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("_")
                .separator("__")
                .list_separator(",")
                .with_list_parse_key("study.subjects")
                .try_parsing(true),
        );

        if let Some(host) = cli.host {
            builder = builder.set_override("server.host", host)?;
        }
        if let Some(port) = cli.port {
            builder = builder.set_override("server.port", i64::from(port))?;
        }
        if let Some(secret) = cli.secret_key {
            builder = builder.set_override("session.secret_key", secret)?;
        }
        if let Some(json) = cli.log_json {
            builder = builder.set_override("logging.json", json)?;
        }

        let cfg = builder.build()?;
        cfg.try_deserialize()
    }
}
