//! Static selection of the execution algorithm for broker orders.

use std::collections::HashMap;

use crate::config::ExecutionConfig;
use crate::domain::order_stack::ExecutionAlgo;
use crate::domain::shared::{InstrumentId, StrategyId};

/// Strategy override, then instrument override, then default.
#[derive(Debug, Clone, Default)]
pub struct ExecutionPolicy {
    default_algo: ExecutionAlgo,
    instruments: HashMap<InstrumentId, ExecutionAlgo>,
    strategies: HashMap<StrategyId, ExecutionAlgo>,
}

impl ExecutionPolicy {
    /// Build from configuration.
    #[must_use]
    pub fn from_config(config: &ExecutionConfig) -> Self {
        Self {
            default_algo: config.default_algo,
            instruments: config.instruments.clone(),
            strategies: config.strategies.clone(),
        }
    }

    /// Algorithm for an order of `strategy` in `instrument`.
    #[must_use]
    pub fn algo_for(&self, strategy: &StrategyId, instrument: &InstrumentId) -> ExecutionAlgo {
        self.strategies
            .get(strategy)
            .or_else(|| self.instruments.get(instrument))
            .copied()
            .unwrap_or(self.default_algo)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strategy_beats_instrument_beats_default() {
        let mut config = ExecutionConfig {
            default_algo: ExecutionAlgo::Market,
            ..Default::default()
        };
        config
            .instruments
            .insert(InstrumentId::new("SOFR"), ExecutionAlgo::Limit);
        config
            .strategies
            .insert(StrategyId::new("carry"), ExecutionAlgo::Adaptive);
        let policy = ExecutionPolicy::from_config(&config);

        let sofr = InstrumentId::new("SOFR");
        let bund = InstrumentId::new("BUND");
        assert_eq!(policy.algo_for(&StrategyId::new("carry"), &sofr), ExecutionAlgo::Adaptive);
        assert_eq!(policy.algo_for(&StrategyId::new("trend"), &sofr), ExecutionAlgo::Limit);
        assert_eq!(policy.algo_for(&StrategyId::new("trend"), &bund), ExecutionAlgo::Market);
    }
}
