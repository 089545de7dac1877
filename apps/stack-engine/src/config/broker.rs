//! Broker adapter configuration.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Broker settings. Only the paper broker ships with the engine.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BrokerConfig {
    /// Paper broker behaviour.
    #[serde(default)]
    pub paper: PaperBrokerConfig,
}

/// Paper broker behaviour.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaperBrokerConfig {
    /// Fill every accepted order in full on the next poll.
    #[serde(default = "default_auto_fill")]
    pub auto_fill: bool,
    /// Price reported for simulated fills.
    #[serde(default = "default_fill_price")]
    pub fill_price: Decimal,
}

impl Default for PaperBrokerConfig {
    fn default() -> Self {
        Self {
            auto_fill: default_auto_fill(),
            fill_price: default_fill_price(),
        }
    }
}

const fn default_auto_fill() -> bool {
    true
}

const fn default_fill_price() -> Decimal {
    Decimal::ONE_HUNDRED
}
