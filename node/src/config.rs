//! Node configuration loaded from YAML.

use serde::{Deserialize, Serialize};
use sidetree_observer::{protocol::Versions, sink, Protocol};
use std::{path::Path, str::FromStr, time::Duration};
use thiserror::Error;
use tracing::Level;

/// Errors that can occur while loading configuration.
#[derive(Debug, Error)]
pub enum Error {
    #[error("failed to read config: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse config: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("invalid duration: {0}")]
    Duration(String),
    #[error("invalid log level: {0}")]
    LogLevel(String),
    #[error("invalid protocols: {0}")]
    Protocols(#[from] sidetree_observer::Error),
}

/// Parse a duration such as `250ms`, `2s`, `1m` or `1h`.
pub fn parse_duration(s: &str) -> Result<Duration, Error> {
    let s = s.trim();
    let split = s
        .find(|c: char| !c.is_ascii_digit())
        .ok_or_else(|| Error::Duration(format!("missing unit: {s}")))?;
    let (value, unit) = s.split_at(split);
    let value: u64 = value
        .parse()
        .map_err(|_| Error::Duration(format!("invalid value: {s}")))?;
    let overflow = || Error::Duration(format!("too large: {s}"));
    match unit {
        "ms" => Ok(Duration::from_millis(value)),
        "s" => Ok(Duration::from_secs(value)),
        "m" => Ok(Duration::from_secs(value.checked_mul(60).ok_or_else(overflow)?)),
        "h" => Ok(Duration::from_secs(value.checked_mul(60 * 60).ok_or_else(overflow)?)),
        _ => Err(Error::Duration(format!("unknown unit: {s}"))),
    }
}

/// Store failure handling.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "policy", rename_all = "lowercase")]
pub enum FailurePolicy {
    Skip,
    Retry { attempts: u32, backoff: String },
    Halt,
}

impl FailurePolicy {
    fn resolve(&self) -> Result<sink::FailurePolicy, Error> {
        Ok(match self {
            FailurePolicy::Skip => sink::FailurePolicy::Skip,
            FailurePolicy::Retry { attempts, backoff } => sink::FailurePolicy::Retry {
                attempts: *attempts,
                backoff: parse_duration(backoff)?,
            },
            FailurePolicy::Halt => sink::FailurePolicy::Halt,
        })
    }
}

/// Batches written to the in-memory ledger while the node runs.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Demo {
    /// Number of batches to anchor (0 disables the writer).
    pub batches: u64,
    /// Time between batches.
    pub interval: String,
    /// Every `malformed_every`-th batch is anchored with a corrupt core index file (0 never).
    pub malformed_every: u64,
}

impl Default for Demo {
    fn default() -> Self {
        Self {
            batches: 10,
            interval: "1s".into(),
            malformed_every: 0,
        }
    }
}

/// Configuration of a node.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub namespace: String,
    pub since: Option<u64>,
    pub poll_interval: String,
    pub max_batch_size: usize,
    pub mailbox_size: usize,
    pub enforce_operation_count: bool,
    pub failure_policy: FailurePolicy,
    pub log_level: String,
    pub json_logs: bool,
    /// Protocol versions (defaults to a single version starting at time 0).
    pub protocols: Vec<Protocol>,
    pub demo: Demo,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            namespace: "did:sidetree".into(),
            since: None,
            poll_interval: "500ms".into(),
            max_batch_size: 1_000,
            mailbox_size: 100,
            enforce_operation_count: true,
            failure_policy: FailurePolicy::Skip,
            log_level: "info".into(),
            json_logs: false,
            protocols: Vec::new(),
            demo: Demo::default(),
        }
    }
}

impl Config {
    /// Load configuration from a YAML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, Error> {
        let raw = std::fs::read_to_string(path)?;
        Self::parse(&raw)
    }

    /// Parse configuration from YAML.
    pub fn parse(raw: &str) -> Result<Self, Error> {
        Ok(serde_yaml::from_str(raw)?)
    }

    /// Observer configuration.
    pub fn observer(&self) -> Result<sidetree_observer::Config, Error> {
        let poll_interval = parse_duration(&self.poll_interval)?;
        if poll_interval.is_zero() {
            return Err(Error::Duration(format!(
                "poll interval must be positive: {}",
                self.poll_interval
            )));
        }
        Ok(sidetree_observer::Config {
            since: self.since,
            poll_interval,
            max_batch_size: self.max_batch_size,
            mailbox_size: self.mailbox_size,
            enforce_operation_count: self.enforce_operation_count,
            failure_policy: self.failure_policy.resolve()?,
            ..sidetree_observer::Config::new(self.namespace.clone())
        })
    }

    /// Protocol versions.
    pub fn versions(&self) -> Result<Versions, Error> {
        if self.protocols.is_empty() {
            return Ok(Versions::default());
        }
        Ok(Versions::new(self.protocols.clone())?)
    }

    /// Log level.
    pub fn level(&self) -> Result<Level, Error> {
        Level::from_str(&self.log_level).map_err(|_| Error::LogLevel(self.log_level.clone()))
    }
}
