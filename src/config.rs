//! Environment-driven configuration
//!
//! Values are read once in `main` after `.env` has been loaded. A value that
//! is present but unparsable is a startup error rather than a silent default.

use crate::error::ConfigError;
use crate::types::{DuplicatePolicy, ScoringPolicy, SessionConfig};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::str::FromStr;

/// Sockets and files the process needs before it can serve
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: IpAddr,
    /// WebSocket + HTTP API
    pub http_port: u16,
    /// UDP race signals
    pub buzz_port: u16,
    pub questions_path: PathBuf,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            http_port: 7000,
            buzz_port: 7001,
            questions_path: PathBuf::from("questions.txt"),
        }
    }
}

impl ServerConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();
        Ok(Self {
            host: env_or("QUIZ_HOST", defaults.host)?,
            http_port: env_or("QUIZ_HTTP_PORT", defaults.http_port)?,
            buzz_port: env_or("QUIZ_BUZZ_PORT", defaults.buzz_port)?,
            questions_path: std::env::var("QUIZ_QUESTIONS")
                .ok()
                .filter(|s| !s.trim().is_empty())
                .map(PathBuf::from)
                .unwrap_or(defaults.questions_path),
        })
    }

    pub fn http_addr(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.http_port)
    }

    pub fn buzz_addr(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.buzz_port)
    }
}

impl SessionConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();
        let scoring = ScoringPolicy {
            correct: env_or("QUIZ_SCORE_CORRECT", defaults.scoring.correct)?,
            incorrect: env_or("QUIZ_SCORE_INCORRECT", defaults.scoring.incorrect)?,
            timeout_no_accept: env_or("QUIZ_SCORE_NO_ACCEPT", defaults.scoring.timeout_no_accept)?,
            timeout_after_accept: env_or(
                "QUIZ_SCORE_ANSWER_TIMEOUT",
                defaults.scoring.timeout_after_accept,
            )?,
        };

        let poll_seconds = env_or("QUIZ_POLL_SECONDS", defaults.poll_seconds)?;
        let answer_seconds = env_or("QUIZ_ANSWER_SECONDS", defaults.answer_seconds)?;
        if poll_seconds == 0 {
            return Err(ConfigError::InvalidVar {
                name: "QUIZ_POLL_SECONDS",
                value: "0".to_string(),
            });
        }
        if answer_seconds == 0 {
            return Err(ConfigError::InvalidVar {
                name: "QUIZ_ANSWER_SECONDS",
                value: "0".to_string(),
            });
        }

        Ok(Self {
            poll_seconds,
            answer_seconds,
            scoring,
            duplicate_policy: env_or("QUIZ_DUPLICATE_IDENTITY", defaults.duplicate_policy)?,
        })
    }
}

impl FromStr for DuplicatePolicy {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "reject" => Ok(DuplicatePolicy::Reject),
            "disambiguate" => Ok(DuplicatePolicy::Disambiguate),
            "replace" => Ok(DuplicatePolicy::Replace),
            _ => Err(()),
        }
    }
}

/// Read and parse an env var, falling back to `default` when unset or blank
fn env_or<T: FromStr>(name: &'static str, default: T) -> Result<T, ConfigError> {
    match std::env::var(name) {
        Ok(raw) if !raw.trim().is_empty() => {
            raw.trim()
                .parse()
                .map_err(|_| ConfigError::InvalidVar { name, value: raw })
        }
        _ => Ok(default),
    }
}
