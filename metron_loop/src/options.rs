//! Loop configuration: the precision setting and the TOML-loadable options
//! struct the façades can be built from.
//!
//! # TOML Example
//!
//! ```toml
//! interval_ms = 13.3333
//! precision = "maximum"
//! sample_threshold = 10
//! ```

use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use metron_common::extent::Extent;

/// Spin budget setting for the delay primitive.
///
/// The tight-loop factor scales the platform minimum period into the busy-wait
/// allowance at the tail of a delay. `Default` never spins and therefore has
/// observably greater jitter at negligible CPU cost.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[repr(u8)]
pub enum PrecisionOption {
    /// No spinning; pure interrupt-driven sleep.
    Default = 0,
    /// Spin for up to 2/3 of the minimum period.
    Medium = 1,
    /// Spin for up to 4/3 of the minimum period.
    High = 2,
    /// Spin for up to 2 minimum periods.
    Maximum = 3,
}

impl PrecisionOption {
    /// Convert from raw `u8`. Returns `None` for invalid values.
    #[inline]
    pub const fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::Default),
            1 => Some(Self::Medium),
            2 => Some(Self::High),
            3 => Some(Self::Maximum),
            _ => None,
        }
    }

    /// Spin budget as a multiple of the platform minimum period.
    #[inline]
    pub const fn tight_loop_factor(self) -> f64 {
        match self {
            Self::Default => 0.0,
            Self::Medium => 2.0 / 3.0,
            Self::High => 4.0 / 3.0,
            Self::Maximum => 2.0,
        }
    }
}

impl Default for PrecisionOption {
    fn default() -> Self {
        Self::Default
    }
}

/// Error type for options loading.
#[derive(Debug, Clone, Error)]
pub enum OptionsError {
    /// Options file not found at the specified path.
    #[error("options file not found")]
    FileNotFound,

    /// TOML parsing failed.
    #[error("failed to parse options: {0}")]
    ParseError(String),

    /// Semantic validation failed.
    #[error("options validation failed: {0}")]
    ValidationError(String),
}

/// Declarative loop configuration.
///
/// Every field has a default so a partial TOML file is enough.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LoopOptions {
    /// Target cycle interval [ms].
    #[serde(default = "default_interval_ms")]
    pub interval_ms: f64,

    /// Spin budget setting for the residual delay.
    #[serde(default)]
    pub precision: PrecisionOption,

    /// Minimum samples before average-drift correction engages.
    #[serde(default = "default_sample_threshold")]
    pub sample_threshold: u32,
}

fn default_interval_ms() -> f64 {
    1.0
}

fn default_sample_threshold() -> u32 {
    10
}

impl Default for LoopOptions {
    fn default() -> Self {
        Self {
            interval_ms: default_interval_ms(),
            precision: PrecisionOption::default(),
            sample_threshold: default_sample_threshold(),
        }
    }
}

impl LoopOptions {
    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns `OptionsError::ValidationError` if:
    /// - `interval_ms` is non-finite or not positive
    /// - `sample_threshold` is below 2
    pub fn validate(&self) -> Result<(), OptionsError> {
        if !self.interval_ms.is_finite() || self.interval_ms <= 0.0 {
            return Err(OptionsError::ValidationError(format!(
                "interval_ms must be finite and positive, got {}",
                self.interval_ms
            )));
        }
        if self.sample_threshold < 2 {
            return Err(OptionsError::ValidationError(format!(
                "sample_threshold must be at least 2, got {}",
                self.sample_threshold
            )));
        }
        Ok(())
    }

    /// The configured interval as an [`Extent`].
    pub fn interval(&self) -> Extent {
        Extent::from_millis_f64(self.interval_ms)
    }

    /// Parse and validate options from a TOML string.
    pub fn from_toml_str(raw: &str) -> Result<Self, OptionsError> {
        let options: Self =
            toml::from_str(raw).map_err(|e| OptionsError::ParseError(e.to_string()))?;
        options.validate()?;
        Ok(options)
    }

    /// Load and validate options from a TOML file.
    pub fn load(path: &Path) -> Result<Self, OptionsError> {
        if !path.exists() {
            return Err(OptionsError::FileNotFound);
        }
        let raw =
            std::fs::read_to_string(path).map_err(|e| OptionsError::ParseError(e.to_string()))?;
        Self::from_toml_str(&raw)
    }
}

// ─── Tests ──────────────────────────────────────────────────────────
