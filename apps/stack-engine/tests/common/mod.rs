//! Shared fixtures for the handler integration tests.

#![allow(dead_code, clippy::expect_used, clippy::unwrap_used)]

use std::sync::Arc;

use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use stack_engine::application::handler::StackHandler;
use stack_engine::config::{Config, PersistenceBackend, StagesConfig};
use stack_engine::domain::contracts::ContractSpec;
use stack_engine::domain::order_stack::{
    BrokerOrder, ContractOrder, InstrumentDetail, InstrumentOrder, NewOrder, OrderFilter,
    OrderStacks,
};
use stack_engine::domain::positions::{Booking, PositionLedger};
use stack_engine::domain::shared::{
    ContractId, HolderId, InstrumentId, OrderId, StrategyId, TradeVector,
};
use stack_engine::infrastructure::{Container, InMemoryAlertSink, PaperBroker};

pub const SOFR_DEC: &str = "SOFR_20261216";
pub const SOFR_MAR: &str = "SOFR_20270317";
pub const SOFR_JUN: &str = "SOFR_20270616";
pub const BUND_DEC: &str = "BUND_20261208";
pub const BUND_MAR: &str = "BUND_20270308";

pub fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

/// A trading day well outside every roll window.
pub fn quiet_day() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 11, 2, 14, 0, 0).unwrap()
}

/// Two days before the December SOFR expiry, inside its roll window.
pub fn roll_day() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 12, 14, 14, 0, 0).unwrap()
}

pub fn sofr() -> InstrumentId {
    InstrumentId::new("SOFR")
}

pub fn bund() -> InstrumentId {
    InstrumentId::new("BUND")
}

pub fn contracts() -> Vec<ContractSpec> {
    vec![
        ContractSpec::new(ContractId::new(SOFR_DEC), sofr(), date(2026, 12, 16)),
        ContractSpec::new(ContractId::new(SOFR_MAR), sofr(), date(2027, 3, 17)),
        ContractSpec::new(ContractId::new(SOFR_JUN), sofr(), date(2027, 6, 16)),
        ContractSpec::new(ContractId::new(BUND_DEC), bund(), date(2026, 12, 8)),
        ContractSpec::new(ContractId::new(BUND_MAR), bund(), date(2027, 3, 8)),
    ]
}

/// Config with every stage due on every cycle and short timeouts.
pub fn config() -> Config {
    let mut config = Config::default();
    config.handler.stages = StagesConfig::every_cycle();
    config.locks.acquire_timeout_ms = 50;
    config.locks.poll_interval_ms = 5;
    config.submission.timeout_ms = 100;
    config.submission.reservation_timeout_secs = 60;
    config.submission.max_attempts = 3;
    config.submission.initial_backoff_ms = 1_000;
    config.submission.max_backoff_ms = 10_000;
    config.submission.jitter_factor = 0.0;
    config.contracts = contracts();
    config
}

/// [`config`] on the JSON backend in `dir`.
pub fn json_config(dir: &std::path::Path) -> Config {
    let mut config = config();
    config.persistence.backend = PersistenceBackend::Json;
    config.persistence.data_dir = dir.display().to_string();
    config
}

/// A worker process: a fresh container over the configured files, talking
/// to `broker`.
pub fn open_worker(config: &Config, broker: &Arc<PaperBroker>) -> Container {
    Container::from_config(config)
        .unwrap()
        .with_broker(broker.clone())
        .with_alerts(Arc::new(InMemoryAlertSink::new()))
}

/// A container wired to an inspectable paper broker and alert sink.
pub struct Harness {
    pub container: Container,
    pub broker: Arc<PaperBroker>,
    pub alerts: Arc<InMemoryAlertSink>,
    pub handler: StackHandler,
}

impl Harness {
    /// Paper broker that fills every order on acceptance.
    pub fn auto_fill() -> Self {
        Self::with(config(), PaperBroker::default())
    }

    /// Paper broker that only fills through `PaperBroker::execute`.
    pub fn manual() -> Self {
        Self::with(config(), PaperBroker::manual())
    }

    pub fn with(config: Config, broker: PaperBroker) -> Self {
        let broker = Arc::new(broker);
        let alerts = Arc::new(InMemoryAlertSink::new());
        let container = Container::from_config(&config)
            .unwrap()
            .with_broker(broker.clone())
            .with_alerts(alerts.clone());
        let handler = container.handler(HolderId::new("handler-a"));
        Self {
            container,
            broker,
            alerts,
            handler,
        }
    }

    /// A second handler over the same stacks and collaborators.
    pub fn second_handler(&self) -> StackHandler {
        self.container.handler(HolderId::new("handler-b"))
    }

    pub fn stacks(&self) -> &OrderStacks {
        self.container.stacks()
    }

    /// Place an instrument order the way a strategy would.
    pub fn place(&self, strategy: &str, instrument: InstrumentId, qty: i64) -> OrderId {
        self.stacks()
            .instruments
            .create(NewOrder::new(
                StrategyId::new(strategy),
                instrument,
                TradeVector::single(qty),
                InstrumentDetail::default(),
            ))
            .unwrap()
    }

    /// Record a position as if earlier orders had filled and been removed,
    /// and make the broker report the same.
    pub fn seed_position(&self, order: u64, instrument: InstrumentId, contract: &str, qty: i64) {
        self.container
            .ledger()
            .book(Booking {
                order_id: OrderId::new(order),
                instrument: instrument.clone(),
                legs: vec![(ContractId::new(contract), qty)],
                booked_at: Utc::now(),
            })
            .unwrap();
        let current = self
            .container
            .ledger()
            .contract_positions(&instrument)
            .unwrap()
            .values()
            .sum();
        self.broker.set_position(instrument, current).unwrap();
    }

    pub fn instrument(&self, id: OrderId) -> Option<InstrumentOrder> {
        self.stacks().instruments.find(id).unwrap()
    }

    pub fn contract_children(&self, id: OrderId) -> Vec<ContractOrder> {
        self.stacks().contracts.children_of(id).unwrap()
    }

    pub fn broker_children(&self, id: OrderId) -> Vec<BrokerOrder> {
        self.stacks().brokers.children_of(id).unwrap()
    }

    pub fn all_instruments(&self) -> Vec<InstrumentOrder> {
        self.stacks().instruments.scan(&OrderFilter::all()).unwrap()
    }

    pub fn all_brokers(&self) -> Vec<BrokerOrder> {
        self.stacks().brokers.scan(&OrderFilter::all()).unwrap()
    }

    pub fn is_empty(&self) -> bool {
        self.all_instruments().is_empty()
            && self.stacks().contracts.scan(&OrderFilter::all()).unwrap().is_empty()
            && self.all_brokers().is_empty()
    }

    /// Booked net position of an instrument.
    pub fn booked(&self, instrument: &InstrumentId) -> i64 {
        self.container
            .ledger()
            .contract_positions(instrument)
            .unwrap()
            .values()
            .sum()
    }

    pub fn booked_in(&self, instrument: &InstrumentId, contract: &str) -> i64 {
        self.container
            .ledger()
            .contract_positions(instrument)
            .unwrap()
            .get(&ContractId::new(contract))
            .copied()
            .unwrap_or(0)
    }
}
