//! Contract universe built from a fixed list, usually the config file.

use std::collections::{BTreeMap, HashMap};

use crate::domain::contracts::{ContractSpec, ContractUniverse};
use crate::domain::shared::{ContractId, InstrumentId};

/// Contracts known up front, indexed by id and by instrument.
#[derive(Debug, Clone, Default)]
pub struct StaticContractUniverse {
    by_id: HashMap<ContractId, ContractSpec>,
    by_instrument: BTreeMap<InstrumentId, Vec<ContractSpec>>,
    roll_window_days: i64,
}

impl StaticContractUniverse {
    /// Build the universe. Later duplicates of an id replace earlier ones.
    #[must_use]
    pub fn new(contracts: Vec<ContractSpec>, roll_window_days: i64) -> Self {
        let mut by_id = HashMap::new();
        for contract in contracts {
            by_id.insert(contract.id.clone(), contract);
        }
        let mut by_instrument: BTreeMap<InstrumentId, Vec<ContractSpec>> = BTreeMap::new();
        for contract in by_id.values() {
            by_instrument
                .entry(contract.instrument.clone())
                .or_default()
                .push(contract.clone());
        }
        for contracts in by_instrument.values_mut() {
            contracts.sort_by(|a, b| a.expiry.cmp(&b.expiry).then_with(|| a.id.cmp(&b.id)));
        }
        Self {
            by_id,
            by_instrument,
            roll_window_days,
        }
    }

    /// Number of contracts.
    #[must_use]
    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    /// Whether no contract is known.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }
}

impl ContractUniverse for StaticContractUniverse {
    fn contract(&self, id: &ContractId) -> Option<ContractSpec> {
        self.by_id.get(id).cloned()
    }

    fn contracts_for(&self, instrument: &InstrumentId) -> Vec<ContractSpec> {
        self.by_instrument.get(instrument).cloned().unwrap_or_default()
    }

    fn instruments(&self) -> Vec<InstrumentId> {
        self.by_instrument.keys().cloned().collect()
    }

    fn roll_window_days(&self) -> i64 {
        self.roll_window_days
    }
}
