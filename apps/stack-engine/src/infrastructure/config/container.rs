//! Dependency Injection Container
//!
//! Builds the stores, the ledger and the collaborators from configuration
//! and hands out handlers wired to them. Every handler built from one
//! container shares the same stacks, so several handlers in one process
//! coordinate through order locks exactly as separate processes sharing a
//! store would.

use std::path::Path;
use std::sync::Arc;

use tracing::info;

use crate::application::handler::{HandlerDeps, StackHandler};
use crate::application::ports::{AlertPort, BrokerPort};
use crate::application::services::BreakRegistry;
use crate::config::{Config, PersistenceBackend};
use crate::domain::contracts::ContractUniverse;
use crate::domain::order_stack::{
    BrokerStack, BrokerTier, ContractStack, ContractTier, InstrumentStack, InstrumentTier,
    OrderStacks, OrderStore, Tier,
};
use crate::domain::positions::{BreakStore, PositionLedger};
use crate::domain::shared::{HolderId, StoreError};
use crate::infrastructure::alerts::TracingAlertSink;
use crate::infrastructure::broker::PaperBroker;
use crate::infrastructure::contracts::StaticContractUniverse;
use crate::infrastructure::persistence::{
    InMemoryBreakStore, InMemoryOrderStore, InMemoryPositionLedger, JsonFileBreakStore,
    JsonFileOrderStore, JsonFilePositionLedger,
};

/// Dependency injection container.
///
/// Use [`Container::from_config`] to build the default wiring, then replace
/// collaborators with the `with_*` methods where needed.
#[derive(Clone)]
pub struct Container {
    config: Config,
    stacks: OrderStacks,
    ledger: Arc<dyn PositionLedger>,
    broker: Arc<dyn BrokerPort>,
    alerts: Arc<dyn AlertPort>,
    universe: Arc<dyn ContractUniverse>,
    breaks: BreakRegistry,
}

impl Container {
    /// Build stores and collaborators from `config`.
    ///
    /// # Errors
    ///
    /// The JSON backend's data directory or files cannot be opened.
    pub fn from_config(config: &Config) -> Result<Self, StoreError> {
        let (stacks, ledger, breaks) = match config.persistence.backend {
            PersistenceBackend::Memory => {
                let ledger: Arc<dyn PositionLedger> = Arc::new(InMemoryPositionLedger::new());
                let breaks: Arc<dyn BreakStore> = Arc::new(InMemoryBreakStore::new());
                (
                    OrderStacks {
                        instruments: InstrumentStack::new(in_memory::<InstrumentTier>()),
                        contracts: ContractStack::new(in_memory::<ContractTier>()),
                        brokers: BrokerStack::new(in_memory::<BrokerTier>()),
                    },
                    ledger,
                    breaks,
                )
            }
            PersistenceBackend::Json => {
                let dir = Path::new(&config.persistence.data_dir);
                let ledger: Arc<dyn PositionLedger> =
                    Arc::new(JsonFilePositionLedger::open_in(dir)?);
                let breaks: Arc<dyn BreakStore> = Arc::new(JsonFileBreakStore::open_in(dir)?);
                (
                    OrderStacks {
                        instruments: InstrumentStack::new(json_file::<InstrumentTier>(dir)?),
                        contracts: ContractStack::new(json_file::<ContractTier>(dir)?),
                        brokers: BrokerStack::new(json_file::<BrokerTier>(dir)?),
                    },
                    ledger,
                    breaks,
                )
            }
        };
        info!(
            backend = ?config.persistence.backend,
            contracts = config.contracts.len(),
            "Order stacks opened"
        );

        Ok(Self {
            config: config.clone(),
            stacks,
            ledger,
            broker: Arc::new(PaperBroker::new(&config.broker.paper)),
            alerts: Arc::new(TracingAlertSink::new()),
            universe: Arc::new(StaticContractUniverse::new(
                config.contracts.clone(),
                config.rolls.window_days,
            )),
            breaks: BreakRegistry::new(breaks),
        })
    }

    /// Replace the broker collaborator.
    #[must_use]
    pub fn with_broker(mut self, broker: Arc<dyn BrokerPort>) -> Self {
        self.broker = broker;
        self
    }

    /// Replace the alerting collaborator.
    #[must_use]
    pub fn with_alerts(mut self, alerts: Arc<dyn AlertPort>) -> Self {
        self.alerts = alerts;
        self
    }

    /// Replace the contract universe.
    #[must_use]
    pub fn with_universe(mut self, universe: Arc<dyn ContractUniverse>) -> Self {
        self.universe = universe;
        self
    }

    /// Configuration the container was built from.
    #[must_use]
    pub const fn config(&self) -> &Config {
        &self.config
    }

    /// The shared order stacks.
    #[must_use]
    pub const fn stacks(&self) -> &OrderStacks {
        &self.stacks
    }

    /// The shared position ledger.
    #[must_use]
    pub fn ledger(&self) -> Arc<dyn PositionLedger> {
        Arc::clone(&self.ledger)
    }

    /// The broker collaborator.
    #[must_use]
    pub fn broker(&self) -> Arc<dyn BrokerPort> {
        Arc::clone(&self.broker)
    }

    /// Open position breaks, backed by the configured persistence.
    #[must_use]
    pub fn breaks(&self) -> BreakRegistry {
        self.breaks.clone()
    }

    /// A handler locking orders as `holder`.
    #[must_use]
    pub fn handler(&self, holder: HolderId) -> StackHandler {
        StackHandler::new(
            HandlerDeps {
                stacks: self.stacks.clone(),
                ledger: Arc::clone(&self.ledger),
                broker: Arc::clone(&self.broker),
                alerts: Arc::clone(&self.alerts),
                universe: Arc::clone(&self.universe),
                breaks: self.breaks.clone(),
            },
            holder,
            &self.config,
        )
    }
}

impl std::fmt::Debug for Container {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Container")
            .field("backend", &self.config.persistence.backend)
            .field("stacks", &self.stacks)
            .finish_non_exhaustive()
    }
}

fn in_memory<T: Tier>() -> Arc<dyn OrderStore<T>> {
    Arc::new(InMemoryOrderStore::<T>::new())
}

fn json_file<T: Tier>(dir: &Path) -> Result<Arc<dyn OrderStore<T>>, StoreError> {
    Ok(Arc::new(JsonFileOrderStore::<T>::open_in(dir)?))
}
