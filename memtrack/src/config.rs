//! Tracker configuration.
//!
//! A [`Config`] can be built in code or parsed from a comma-separated option
//! string such as `level=detail,seed=42,nodes=4096`.

use std::fmt;
use std::str::FromStr;

use thiserror::Error;
use vma_tree::treap::DEFAULT_SEED;

/// How much the tracker records.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum TrackingLevel {
    /// Nothing is recorded; every tracker call returns immediately.
    Off,
    /// Per-tag totals and regions, without call stacks.
    #[default]
    Summary,
    /// Like `Summary`, and every region remembers the stack that created it.
    Detail,
}

impl TrackingLevel {
    pub fn name(self) -> &'static str {
        match self {
            TrackingLevel::Off => "off",
            TrackingLevel::Summary => "summary",
            TrackingLevel::Detail => "detail",
        }
    }
}

impl fmt::Display for TrackingLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for TrackingLevel {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        [
            TrackingLevel::Off,
            TrackingLevel::Summary,
            TrackingLevel::Detail,
        ]
        .into_iter()
        .find(|level| level.name().eq_ignore_ascii_case(s.trim()))
        .ok_or_else(|| ConfigError::UnknownLevel(s.to_owned()))
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("unknown tracking level: {0}")]
    UnknownLevel(String),
    #[error("unknown option: {0}")]
    UnknownOption(String),
    #[error("invalid value for {key}: {value}")]
    InvalidValue { key: String, value: String },
}

/// Configuration for a [`MemTracker`](crate::MemTracker).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Tracking level
    pub level: TrackingLevel,
    /// Seed for the treap priorities of every tree the tracker creates
    pub seed: u64,
    /// Upper bound on transition points per tree; `None` grows on demand
    pub node_capacity: Option<usize>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            level: TrackingLevel::default(),
            seed: DEFAULT_SEED,
            node_capacity: None,
        }
    }
}

impl Config {
    pub fn with_level(mut self, level: TrackingLevel) -> Self {
        self.level = level;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    pub fn with_node_capacity(mut self, capacity: usize) -> Self {
        self.node_capacity = Some(capacity);
        self
    }
}

impl FromStr for Config {
    type Err = ConfigError;

    /// Parses `key=value` pairs separated by commas. Keys are `level`, `seed`
    /// and `nodes`; a bare word is taken as the level.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut config = Config::default();
        for option in s.split(',').map(str::trim).filter(|o| !o.is_empty()) {
            let Some((key, value)) = option.split_once('=') else {
                config.level = option.parse()?;
                continue;
            };
            let (key, value) = (key.trim(), value.trim());
            let invalid = || ConfigError::InvalidValue {
                key: key.to_owned(),
                value: value.to_owned(),
            };
            match key {
                "level" => config.level = value.parse()?,
                "seed" => config.seed = value.parse().map_err(|_| invalid())?,
                "nodes" => {
                    let capacity: usize = value.parse().map_err(|_| invalid())?;
                    if capacity == 0 {
                        return Err(invalid());
                    }
                    config.node_capacity = Some(capacity);
                }
                _ => return Err(ConfigError::UnknownOption(key.to_owned())),
            }
        }
        Ok(config)
    }
}
