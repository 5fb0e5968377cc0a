//! Runtime configuration
//!
//! All fields have defaults, so an empty TOML document is a valid config.
//!
//! ```toml
//! [verify]
//! future_tolerance_secs = 3660
//! now = 1700000000
//!
//! [dump]
//! verbose = true
//! format = "json"
//! max_db_size = 33554432
//! ```

use crate::error::Result;
use crate::header::DEFAULT_MAX_DB_SIZE;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Default allowance for header timestamps ahead of the clock
///
/// One hour covers daylight saving changes; the extra minute covers
/// ordinary clock skew.
pub const DEFAULT_FUTURE_TOLERANCE_SECS: u64 = 60 * 60 + 60;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub verify: VerifyConfig,
    pub dump: DumpConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct VerifyConfig {
    /// How far the header timestamp may run ahead of `now`
    pub future_tolerance_secs: u64,

    /// Clock override in seconds since the epoch; the system clock when unset
    pub now: Option<u64>,
}

impl Default for VerifyConfig {
    fn default() -> Self {
        VerifyConfig {
            future_tolerance_secs: DEFAULT_FUTURE_TOLERANCE_SECS,
            now: None,
        }
    }
}

impl VerifyConfig {
    /// Current time as seen by the verifier
    pub fn now(&self) -> u64 {
        self.now
            .unwrap_or_else(|| chrono::Utc::now().timestamp().max(0) as u64)
    }

    /// Latest header timestamp accepted
    pub fn timestamp_limit(&self) -> u64 {
        self.now().saturating_add(self.future_tolerance_secs)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DumpConfig {
    /// Print sizes, service names and response sub-headers
    pub verbose: bool,

    pub format: OutputFormat,

    /// Refuse to map images larger than this
    pub max_db_size: u64,
}

impl Default for DumpConfig {
    fn default() -> Self {
        DumpConfig {
            verbose: false,
            format: OutputFormat::Text,
            max_db_size: DEFAULT_MAX_DB_SIZE,
        }
    }
}

impl Config {
    pub fn from_toml_str(s: &str) -> Result<Self> {
        Ok(toml::from_str(s)?)
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }
}
