//! Injected configuration for the terminal core.
//!
//! The core performs no file I/O; hosts deserialize a `CoreConfig` (TOML or
//! any serde format) from wherever they keep settings and pass it in at
//! session construction.
//!
//! ```toml
//! scrollback_limit = 10000
//!
//! [resize]
//! primary_debounce_ms = 500
//! alternate_debounce_ms = 100
//!
//! [type_ahead]
//! enabled = true
//! latency_threshold_ms = 50
//! ```

use serde::{Deserialize, Serialize};

/// Top-level core configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CoreConfig {
    /// Maximum scroll-back lines kept for the primary screen
    pub scrollback_limit: usize,
    /// Resize debouncing toward the PTY
    pub resize: ResizeConfig,
    /// Type-ahead prediction tuning
    pub type_ahead: TypeAheadConfig,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            scrollback_limit: 10_000,
            resize: ResizeConfig::default(),
            type_ahead: TypeAheadConfig::default(),
        }
    }
}

/// Delays between a model resize and the PTY resize. The gap lets a process
/// that repaints on SIGWINCH (ConPTY in particular) settle against the final
/// dimensions instead of leaking lines into scroll-back.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ResizeConfig {
    /// Debounce while the primary screen is active
    pub primary_debounce_ms: u64,
    /// Debounce while the alternate screen is active
    pub alternate_debounce_ms: u64,
}

impl Default for ResizeConfig {
    fn default() -> Self {
        Self {
            primary_debounce_ms: 500,
            alternate_debounce_ms: 100,
        }
    }
}

/// Type-ahead prediction tuning
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TypeAheadConfig {
    pub enabled: bool,
    /// Predict only when the round-trip EWMA exceeds this
    pub latency_threshold_ms: u64,
    /// Drop predictions unconfirmed for this long
    pub prediction_timeout_ms: u64,
    /// How long predictions stay off after a mismatch
    pub penalty_ms: u64,
}

impl Default for TypeAheadConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            latency_threshold_ms: 50,
            prediction_timeout_ms: 3_000,
            penalty_ms: 3_000,
        }
    }
}

impl CoreConfig {
    /// Parse from TOML text
    pub fn from_toml(text: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(text)
    }

    /// Serialize to TOML text
    pub fn to_toml(&self) -> Result<String, toml::ser::Error> {
        toml::to_string_pretty(self)
    }
}
