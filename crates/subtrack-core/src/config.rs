//! Detection configuration
//!
//! Loaded from TOML with a two-layer lookup:
//! 1. An explicit path, or the user override at
//!    `~/.local/share/subtrack/config/detection.toml`
//! 2. The defaults in `config/detection.toml`, compiled into the binary
//!
//! Overrides are merged over the embedded defaults, so a partial file only
//! changes the keys it names.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use serde::Deserialize;
use tracing::{debug, error};

use crate::error::{Error, Result};
use crate::models::BillingCycle;

/// Embedded default configuration
const DEFAULT_CONFIG: &str = include_str!("../../../config/detection.toml");

/// Days past an expected charge before a subscription counts as stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LapseGrace {
    pub daily: i64,
    pub weekly: i64,
    pub monthly: i64,
    pub yearly: i64,
}

impl LapseGrace {
    /// Grace for a cycle; unknown cycles never lapse
    pub fn for_cycle(&self, cycle: BillingCycle) -> Option<i64> {
        match cycle {
            BillingCycle::Daily => Some(self.daily),
            BillingCycle::Weekly => Some(self.weekly),
            BillingCycle::Monthly => Some(self.monthly),
            BillingCycle::Yearly => Some(self.yearly),
            BillingCycle::Unknown => None,
        }
    }
}

/// Recurrence detection thresholds
#[derive(Debug, Clone, PartialEq)]
pub struct DetectionConfig {
    /// Minimum charges from one merchant before it is considered
    pub min_occurrences: usize,
    /// Smallest charge (absolute value) treated as a subscription
    pub min_amount: f64,
    /// Largest charge (absolute value) treated as a subscription
    pub max_amount: f64,
    /// Groups scoring below this are dropped
    pub min_confidence: f64,
    /// Case-insensitive merchant substrings that are never subscriptions
    pub blacklist: Vec<String>,
    pub lapse_grace: LapseGrace,
}

impl Default for DetectionConfig {
    /// The embedded `config/detection.toml`
    fn default() -> Self {
        static EMBEDDED: OnceLock<DetectionConfig> = OnceLock::new();
        EMBEDDED
            .get_or_init(|| {
                Self::minimal().merge_toml(DEFAULT_CONFIG).unwrap_or_else(|e| {
                    error!("Embedded detection config is invalid: {}", e);
                    Self::minimal()
                })
            })
            .clone()
    }
}

impl DetectionConfig {
    /// Base the embedded file is merged onto
    fn minimal() -> Self {
        Self {
            min_occurrences: 2,
            min_amount: 0.0,
            max_amount: f64::MAX,
            min_confidence: 0.0,
            blacklist: Vec::new(),
            lapse_grace: LapseGrace {
                daily: 0,
                weekly: 0,
                monthly: 0,
                yearly: 0,
            },
        }
    }

    /// Load configuration (explicit path, then user override, then embedded default)
    ///
    /// An explicit path must exist; the user override is optional.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let content = match path {
            Some(path) => read_config(path)?,
            None => match default_config_path() {
                Some(p) if p.exists() => read_config(&p)?,
                _ => return Ok(Self::default()),
            },
        };

        Self::from_toml_str(&content)
    }

    /// Parse configuration from TOML; missing keys keep their defaults
    pub fn from_toml_str(content: &str) -> Result<Self> {
        Self::default().merge_toml(content)
    }

    fn merge_toml(mut self, content: &str) -> Result<Self> {
        let raw: RawConfig = toml::from_str(content)
            .map_err(|e| Error::Config(format!("Invalid detection config TOML: {}", e)))?;

        if let Some(t) = raw.thresholds {
            if let Some(v) = t.min_occurrences {
                self.min_occurrences = v;
            }
            if let Some(v) = t.min_amount {
                self.min_amount = v;
            }
            if let Some(v) = t.max_amount {
                self.max_amount = v;
            }
            if let Some(v) = t.min_confidence {
                self.min_confidence = v;
            }
        }

        if let Some(l) = raw.lapse {
            let grace = &mut self.lapse_grace;
            for (value, field) in [
                (l.daily_grace_days, &mut grace.daily),
                (l.weekly_grace_days, &mut grace.weekly),
                (l.monthly_grace_days, &mut grace.monthly),
                (l.yearly_grace_days, &mut grace.yearly),
            ] {
                if let Some(v) = value {
                    *field = v;
                }
            }
        }

        if let Some(merchants) = raw.blacklist.and_then(|b| b.merchants) {
            self.blacklist = merchants;
        }

        self.validate()?;
        Ok(self)
    }

    fn validate(&self) -> Result<()> {
        if self.min_occurrences < 2 {
            return Err(Error::Config(
                "min_occurrences must be at least 2".to_string(),
            ));
        }
        if !(self.min_amount >= 0.0 && self.min_amount <= self.max_amount) {
            return Err(Error::Config(format!(
                "Invalid amount range [{}, {}]",
                self.min_amount, self.max_amount
            )));
        }
        if !(0.0..=1.0).contains(&self.min_confidence) {
            return Err(Error::Config(format!(
                "min_confidence must be between 0 and 1, got {}",
                self.min_confidence
            )));
        }
        let g = &self.lapse_grace;
        if [g.daily, g.weekly, g.monthly, g.yearly].iter().any(|d| *d < 0) {
            return Err(Error::Config(
                "Lapse grace days must not be negative".to_string(),
            ));
        }
        Ok(())
    }
}

/// Default config override path
pub fn default_config_path() -> Option<PathBuf> {
    dirs::data_local_dir().map(|d| d.join("subtrack").join("config").join("detection.toml"))
}

fn read_config(path: &Path) -> Result<String> {
    debug!("Loading detection config from {}", path.display());
    fs::read_to_string(path).map_err(|e| {
        Error::Config(format!(
            "Failed to read config {}: {}",
            path.display(),
            e
        ))
    })
}

/// Raw config structure for TOML parsing
#[derive(Debug, Deserialize)]
struct RawConfig {
    thresholds: Option<RawThresholds>,
    lapse: Option<RawLapse>,
    blacklist: Option<RawBlacklist>,
}

#[derive(Debug, Deserialize)]
struct RawThresholds {
    min_occurrences: Option<usize>,
    min_amount: Option<f64>,
    max_amount: Option<f64>,
    min_confidence: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct RawLapse {
    daily_grace_days: Option<i64>,
    weekly_grace_days: Option<i64>,
    monthly_grace_days: Option<i64>,
    yearly_grace_days: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct RawBlacklist {
    merchants: Option<Vec<String>>,
}
