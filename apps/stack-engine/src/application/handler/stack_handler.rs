//! The stack handler.
//!
//! One call to [`StackHandler::run_cycle`] runs the eight stages in order.
//! Every stage is idempotent: a crash between two stages, or between two
//! orders inside a stage, leaves stacks that the next cycle picks up from.
//! Any number of handlers may run cycles against the same stacks; order
//! locks keep them apart, and an order whose lock is taken is left for a
//! later cycle.

use std::collections::VecDeque;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use chrono::{DateTime, NaiveDate, TimeDelta, Utc};
use tracing::{debug, error, info, warn};

use super::fills::PendingReport;
use super::report::{CycleReport, StageOutcome, StageStats};
use super::stage::{SkipReason, Stage, StageTracker};
use crate::application::ports::{Alert, AlertKind, AlertPort, BrokerPort};
use crate::application::services::{
    BreakRegistry, ExecutionPolicy, FillProcessor, LockManager, PositionReconciler, PositionView,
    RollManager, SubmissionRetryPolicy, aggregate_broker_fills, aggregate_contract_fills,
};
use crate::config::Config;
use crate::domain::contracts::ContractUniverse;
use crate::domain::order_stack::{
    BrokerDetail, BrokerTier, ContractDetail, ContractOrder, ContractTier, InstrumentOrder,
    InstrumentTier, NewOrder, OrderDelta, OrderFilter, OrderStack, OrderStacks, OrderState,
    RollLeg, StackError, Tier,
};
use crate::domain::positions::{Booking, BreakStatus, PositionBreak, PositionLedger};
use crate::domain::shared::{ContractId, HolderId, InstrumentId, OrderId, StoreError, TradeVector};
use crate::error::{EngineError, EngineResult};
use crate::observability::{
    record_alert, record_cycle, record_orders_created, record_orders_removed, record_stage_run,
};

/// States an order passes through before it completes.
const UNCOMPLETED: [OrderState; 5] = [
    OrderState::Created,
    OrderState::Locked,
    OrderState::PartiallyFilled,
    OrderState::Filled,
    OrderState::Cancelled,
];

/// Collaborators a handler is built from.
pub struct HandlerDeps {
    /// The three order stacks.
    pub stacks: OrderStacks,
    /// Positions of orders already removed from the stacks.
    pub ledger: Arc<dyn PositionLedger>,
    /// Broker collaborator.
    pub broker: Arc<dyn BrokerPort>,
    /// Alerting collaborator.
    pub alerts: Arc<dyn AlertPort>,
    /// Tradable contracts.
    pub universe: Arc<dyn ContractUniverse>,
    /// Open position breaks, shared with other handlers in this process.
    pub breaks: BreakRegistry,
}

/// Result of cancelling an instrument order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CancelSummary {
    /// Cancelled instrument order.
    pub order_id: OrderId,
    /// Orders cancelled, the instrument order included.
    pub cancelled: usize,
    /// Broker orders whose cancel awaits broker acknowledgment.
    pub awaiting_broker: usize,
}

/// Runs handler cycles over the order stacks.
pub struct StackHandler {
    pub(super) stacks: OrderStacks,
    ledger: Arc<dyn PositionLedger>,
    pub(super) broker: Arc<dyn BrokerPort>,
    alerts: Arc<dyn AlertPort>,
    pub(super) universe: Arc<dyn ContractUniverse>,
    breaks: BreakRegistry,
    pub(super) locks: LockManager,
    pub(super) fills: FillProcessor,
    rolls: RollManager,
    reconciler: PositionReconciler,
    policy: ExecutionPolicy,
    pub(super) retry: SubmissionRetryPolicy,
    pub(super) broker_timeout: Duration,
    pub(super) reservation_timeout: TimeDelta,
    max_rejections: u32,
    rolls_enabled: bool,
    tracker: Mutex<StageTracker>,
    pub(super) pending_reports: Mutex<VecDeque<PendingReport>>,
}

impl StackHandler {
    /// Build a handler that locks orders as `holder`.
    #[must_use]
    pub fn new(deps: HandlerDeps, holder: HolderId, config: &Config) -> Self {
        let HandlerDeps {
            stacks,
            ledger,
            broker,
            alerts,
            universe,
            breaks,
        } = deps;
        let locks = LockManager::new(holder, &config.locks);
        let view = PositionView::new(stacks.brokers.clone(), Arc::clone(&ledger));
        let fills = FillProcessor::new(
            stacks.instruments.clone(),
            stacks.contracts.clone(),
            stacks.brokers.clone(),
            locks.clone(),
            Arc::clone(&alerts),
        );
        let rolls = RollManager::new(
            stacks.instruments.clone(),
            stacks.contracts.clone(),
            view.clone(),
            Arc::clone(&universe),
            config.rolls.window_days,
        );
        let reconciler = PositionReconciler::new(
            view,
            Arc::clone(&broker),
            config.reconciliation.position_tolerance,
        );
        let reservation_timeout = i64::try_from(config.submission.reservation_timeout_secs)
            .ok()
            .and_then(TimeDelta::try_seconds)
            .unwrap_or(TimeDelta::MAX);

        Self {
            stacks,
            ledger,
            broker,
            alerts,
            universe,
            breaks,
            locks,
            fills,
            rolls,
            reconciler,
            policy: ExecutionPolicy::from_config(&config.execution),
            retry: SubmissionRetryPolicy::from_config(&config.submission),
            broker_timeout: Duration::from_millis(config.submission.timeout_ms),
            reservation_timeout,
            max_rejections: config.submission.max_rejections,
            rolls_enabled: config.rolls.enabled,
            tracker: Mutex::new(StageTracker::new(config.handler.stages.clone())),
            pending_reports: Mutex::new(VecDeque::new()),
        }
    }

    /// The stacks this handler operates on.
    #[must_use]
    pub const fn stacks(&self) -> &OrderStacks {
        &self.stacks
    }

    /// Lock holder identity of this handler.
    #[must_use]
    pub const fn holder(&self) -> &HolderId {
        self.locks.holder()
    }

    /// Open position breaks.
    ///
    /// # Errors
    ///
    /// The break store cannot be read.
    pub fn open_breaks(&self) -> EngineResult<Vec<PositionBreak>> {
        Ok(self.breaks.open_breaks()?)
    }

    /// Clear a position break after external review, re-enabling order
    /// generation for the instrument.
    ///
    /// # Errors
    ///
    /// The break store cannot be read or written.
    pub fn acknowledge_break(&self, instrument: &InstrumentId) -> EngineResult<Option<PositionBreak>> {
        Ok(self.breaks.acknowledge(instrument)?)
    }

    // ========================================================================
    // Cycle
    // ========================================================================

    /// Run every due stage once, in order.
    ///
    /// A failing stage is logged and recorded in the report; later stages
    /// still run. Stage removal only runs if no earlier stage of this cycle
    /// reported a lock conflict or an error.
    ///
    /// # Errors
    ///
    /// A fatal error aborts the cycle and is returned after it is alerted.
    pub async fn run_cycle(&self, now: DateTime<Utc>) -> EngineResult<CycleReport> {
        let cycle_started = Instant::now();
        let mut report = CycleReport::new(now);

        for stage in Stage::ALL {
            let skip = self.tracker()?.check(stage, now);
            if let Some(reason) = skip {
                debug!(stage = stage.name(), reason = %reason, "Stage skipped");
                report.push(stage, StageOutcome::Skipped(reason));
                continue;
            }
            if stage == Stage::RemoveCompletedOrders && !report.is_clean() {
                info!(
                    lock_conflicts = report.lock_conflicts(),
                    errors = report.errors(),
                    "Stack removal gated this cycle"
                );
                report.push(stage, StageOutcome::Skipped(SkipReason::Gated));
                continue;
            }
            self.tracker()?.record_run(stage, now);

            let started = Instant::now();
            let result = self.run_stage(stage, now).await;
            let elapsed = started.elapsed().as_secs_f64();
            let outcome = match result {
                Ok(stats) => {
                    debug!(
                        stage = stage.name(),
                        processed = stats.processed,
                        deferred = stats.deferred,
                        lock_conflicts = stats.lock_conflicts,
                        errors = stats.errors,
                        "Stage ran"
                    );
                    StageOutcome::Ran(stats)
                }
                Err(e) if e.is_fatal() => {
                    error!(stage = stage.name(), error = %e, "Fatal error; cycle aborted");
                    record_stage_run(stage.name(), "failed", elapsed);
                    record_cycle(true, cycle_started.elapsed().as_secs_f64());
                    self.raise(Alert::new(
                        AlertKind::FatalConfiguration,
                        format!("cycle aborted in {stage}: {e}"),
                    ))
                    .await;
                    return Err(e);
                }
                Err(e) => {
                    warn!(
                        stage = stage.name(),
                        error = %e,
                        class = ?e.class(),
                        "Stage failed; continuing with next stage"
                    );
                    StageOutcome::Failed(e.to_string())
                }
            };
            record_stage_run(stage.name(), outcome.label(), elapsed);
            report.push(stage, outcome);
        }

        record_cycle(false, cycle_started.elapsed().as_secs_f64());
        info!(
            holder = %self.holder(),
            lock_conflicts = report.lock_conflicts(),
            errors = report.errors(),
            duration_ms = cycle_started.elapsed().as_millis(),
            "Cycle complete"
        );
        Ok(report)
    }

    async fn run_stage(&self, stage: Stage, now: DateTime<Utc>) -> EngineResult<StageStats> {
        match stage {
            Stage::CheckPositionBreaks => self.check_position_breaks().await,
            Stage::SpawnContractOrders => self.spawn_contract_orders(now.date_naive()).await,
            Stage::GenerateRollOrders => self.generate_roll_orders(now.date_naive()),
            Stage::CreateBrokerOrders => self.create_broker_orders().await,
            Stage::SubmitBrokerOrders => self.submit_broker_orders(now).await,
            Stage::ProcessFills => self.process_fills().await,
            Stage::HandleCompletedOrders => self.handle_completed_orders().await,
            Stage::RemoveCompletedOrders => self.remove_completed_orders().await,
        }
    }

    fn tracker(&self) -> EngineResult<MutexGuard<'_, StageTracker>> {
        self.tracker
            .lock()
            .map_err(|e| StoreError::Poisoned(e.to_string()).into())
    }

    /// Count a per-order failure against the stage. Fatal errors propagate.
    pub(super) fn tally(
        stage: Stage,
        stats: &mut StageStats,
        subject: &dyn fmt::Display,
        error: impl Into<EngineError>,
    ) -> EngineResult<()> {
        let error = error.into();
        if error.is_lock_conflict() {
            debug!(stage = stage.name(), order = %subject, "Order locked elsewhere; left for next cycle");
            stats.lock_conflicts += 1;
            return Ok(());
        }
        if error.is_fatal() {
            return Err(error);
        }
        warn!(
            stage = stage.name(),
            order = %subject,
            error = %error,
            class = ?error.class(),
            "Order skipped"
        );
        stats.errors += 1;
        Ok(())
    }

    pub(super) async fn raise(&self, alert: Alert) {
        record_alert(alert.kind.as_str());
        if let Err(e) = self.alerts.raise(alert).await {
            warn!(error = %e, "Failed to deliver alert");
        }
    }

    // ========================================================================
    // Stage 1: position breaks
    // ========================================================================

    async fn check_position_breaks(&self) -> EngineResult<StageStats> {
        let mut stats = StageStats::default();
        for (instrument, status) in self.reconciler.check_all().await? {
            stats.processed += 1;
            let BreakStatus::Broken(position_break) = status else {
                continue;
            };
            let message = format!(
                "{instrument}: internal position {}, broker reports {}",
                position_break.internal, position_break.broker
            );
            if self.breaks.record(position_break)? {
                self.raise(Alert::new(AlertKind::PositionBreak, message).with_instrument(instrument))
                    .await;
            }
        }
        Ok(stats)
    }

    // ========================================================================
    // Stage 2: contract orders
    // ========================================================================

    async fn spawn_contract_orders(&self, as_of: NaiveDate) -> EngineResult<StageStats> {
        let mut stats = StageStats::default();
        for id in self.stacks.instruments.list_unprocessed() {
            let id = id?;
            let Some(order) = self.stacks.instruments.find(id)? else {
                continue;
            };
            if order.state != OrderState::Created {
                continue;
            }
            if self.breaks.is_broken(&order.instrument_id)? {
                debug!(order_id = %id, instrument = %order.instrument_id, "Instrument gated by position break");
                stats.deferred += 1;
                continue;
            }
            let children = self.contract_orders_for(&order, as_of)?;
            match self.attach_contract_orders(id, children).await {
                Ok(0) => {}
                Ok(count) => {
                    stats.processed += 1;
                    record_orders_created(ContractTier::NAME, count);
                    info!(order_id = %id, instrument = %order.instrument_id, children = count, "Contract orders spawned");
                }
                Err(e) => Self::tally(Stage::SpawnContractOrders, &mut stats, &id, e)?,
            }
        }
        Ok(stats)
    }

    /// Contract orders an instrument order decomposes into.
    fn contract_orders_for(
        &self,
        order: &InstrumentOrder,
        as_of: NaiveDate,
    ) -> EngineResult<Vec<NewOrder<ContractTier>>> {
        let child = |trade: TradeVector, detail: ContractDetail| {
            NewOrder::new(
                order.strategy_id.clone(),
                order.instrument_id.clone(),
                trade,
                detail,
            )
            .with_parent(order.id)
        };

        let Some(roll) = &order.detail.roll else {
            let contract = self
                .universe
                .current_contract(&order.instrument_id, as_of)
                .ok_or_else(|| {
                    EngineError::FatalConfiguration(format!(
                        "no tradable contract for {} on {as_of}",
                        order.instrument_id
                    ))
                })?;
            return Ok(vec![child(
                order.trade.clone(),
                ContractDetail::single(contract.id),
            )]);
        };

        let &[close, open] = order.trade.legs() else {
            return Err(StackError::InvalidOrder(format!(
                "roll order {} has trade {}, expected two legs",
                order.id, order.trade
            ))
            .into());
        };
        self.ensure_tradable(&order.instrument_id, &roll.from, as_of)?;
        self.ensure_tradable(&order.instrument_id, &roll.to, as_of)?;
        Ok(vec![
            child(
                TradeVector::single(close),
                ContractDetail {
                    legs: vec![roll.from.clone()],
                    roll_leg: Some(RollLeg::Close),
                },
            ),
            child(
                TradeVector::single(open),
                ContractDetail {
                    legs: vec![roll.to.clone()],
                    roll_leg: Some(RollLeg::Open),
                },
            ),
        ])
    }

    fn ensure_tradable(
        &self,
        instrument: &InstrumentId,
        contract: &ContractId,
        as_of: NaiveDate,
    ) -> EngineResult<()> {
        let spec = self.universe.contract(contract).ok_or_else(|| {
            EngineError::FatalConfiguration(format!("contract {contract} is not configured"))
        })?;
        if spec.instrument != *instrument {
            return Err(EngineError::FatalConfiguration(format!(
                "contract {contract} belongs to {}, not {instrument}",
                spec.instrument
            )));
        }
        if spec.is_expired(as_of) {
            return Err(EngineError::FatalConfiguration(format!(
                "contract {contract} expired on {}",
                spec.expiry
            )));
        }
        Ok(())
    }

    /// Insert the children and attach them to the parent, under its lock.
    ///
    /// Children inserted by a run that crashed before attaching them are
    /// adopted instead of duplicated.
    async fn attach_contract_orders(
        &self,
        parent: OrderId,
        children: Vec<NewOrder<ContractTier>>,
    ) -> EngineResult<usize> {
        let instruments = &self.stacks.instruments;
        let contracts = &self.stacks.contracts;
        let attached = self
            .locks
            .with_lock(instruments, parent, |token| {
                if instruments.get(parent)?.state != OrderState::Created {
                    return Ok(0);
                }
                let orphans: Vec<OrderId> = contracts
                    .children_of(parent)?
                    .iter()
                    .map(|c| c.id)
                    .collect();
                let ids = if orphans.is_empty() {
                    contracts.create_group(children)?
                } else {
                    warn!(order_id = %parent, orphans = orphans.len(), "Adopting unattached contract orders");
                    orphans
                };
                let count = ids.len();
                instruments.modify(parent, token, &OrderDelta::AddChildren(ids))?;
                Ok(count)
            })
            .await?;
        Ok(attached)
    }

    // ========================================================================
    // Stage 3: rolls
    // ========================================================================

    fn generate_roll_orders(&self, as_of: NaiveDate) -> EngineResult<StageStats> {
        let mut stats = StageStats::default();
        if !self.rolls_enabled {
            return Ok(stats);
        }
        for order in self.rolls.orders_to_roll(as_of)? {
            let instrument = order.instrument_id.clone();
            if self.breaks.is_broken(&instrument)? {
                stats.deferred += 1;
                continue;
            }
            match self.stacks.instruments.create(order) {
                Ok(id) => {
                    stats.processed += 1;
                    record_orders_created(InstrumentTier::NAME, 1);
                    info!(order_id = %id, instrument = %instrument, "Roll order created");
                }
                Err(StackError::DuplicateOrder { existing, .. }) => {
                    debug!(instrument = %instrument, existing = %existing, "Roll already pending");
                    stats.deferred += 1;
                }
                Err(e) => Self::tally(Stage::GenerateRollOrders, &mut stats, &instrument, e)?,
            }
        }
        Ok(stats)
    }

    // ========================================================================
    // Stage 4: broker orders
    // ========================================================================

    async fn create_broker_orders(&self) -> EngineResult<StageStats> {
        let mut stats = StageStats::default();
        for id in self.stacks.contracts.list_unprocessed() {
            let id = id?;
            let Some(contract) = self.stacks.contracts.find(id)? else {
                continue;
            };
            if !contract.state.can_fill() {
                continue;
            }
            match self.spawn_broker_order(&contract).await {
                Ok(Some(broker_id)) => {
                    stats.processed += 1;
                    record_orders_created(BrokerTier::NAME, 1);
                    info!(order_id = %id, broker_order_id = %broker_id, "Broker order created");
                }
                Ok(None) => {}
                Err(e) => Self::tally(Stage::CreateBrokerOrders, &mut stats, &id, e)?,
            }
        }
        Ok(stats)
    }

    /// Create one broker order for the contract order's open remainder,
    /// unless a broker order is already working or rejections ran out.
    async fn spawn_broker_order(&self, contract: &ContractOrder) -> EngineResult<Option<OrderId>> {
        let contracts = &self.stacks.contracts;
        let brokers = &self.stacks.brokers;
        let contract_id = contract.id;
        if brokers
            .children_of(contract_id)?
            .iter()
            .any(|c| c.state.can_fill())
        {
            return Ok(None);
        }

        let algo = self
            .policy
            .algo_for(&contract.strategy_id, &contract.instrument_id);
        let max_rejections = self.max_rejections;
        let created = self
            .locks
            .with_lock(contracts, contract_id, |token| {
                let contract = contracts.get(contract_id)?;
                if !contract.state.can_fill() {
                    return Ok(None);
                }
                let children = brokers.children_of(contract_id)?;
                if children.iter().any(|c| c.state.can_fill()) {
                    return Ok(None);
                }
                let rejections = children
                    .iter()
                    .filter(|c| c.detail.submission.rejection.is_some())
                    .count();
                if rejections >= max_rejections as usize {
                    debug!(order_id = %contract_id, rejections, "Rejection limit reached; not re-decomposing");
                    return Ok(None);
                }
                let (filled, _) = aggregate_broker_fills(&contract, &children);
                let remaining = contract.trade.remaining(&filled);
                if remaining.is_zero() {
                    return Ok(None);
                }
                let id = brokers.create(
                    NewOrder::new(
                        contract.strategy_id.clone(),
                        contract.instrument_id.clone(),
                        remaining,
                        BrokerDetail::new(contract.detail.legs.clone(), algo),
                    )
                    .with_parent(contract_id),
                )?;
                contracts.modify(contract_id, token, &OrderDelta::AddChildren(vec![id]))?;
                Ok(Some(id))
            })
            .await?;
        Ok(created)
    }

    // ========================================================================
    // Stage 7: completion
    // ========================================================================

    async fn handle_completed_orders(&self) -> EngineResult<StageStats> {
        let stage = Stage::HandleCompletedOrders;
        let mut stats = StageStats::default();
        let instruments = &self.stacks.instruments;
        let contracts = &self.stacks.contracts;
        let brokers = &self.stacks.brokers;
        let uncompleted = OrderFilter::all().states(&UNCOMPLETED);

        // Catch up on propagation that lost a lock race during fills.
        for contract in contracts.scan(&uncompleted)? {
            let children = brokers.children_of(contract.id)?;
            if aggregate_broker_fills(&contract, &children).0 == contract.fill {
                continue;
            }
            if let Err(e) = self.fills.rederive_contract(contract.id).await {
                Self::tally(stage, &mut stats, &contract.id, e)?;
            }
        }
        for instrument in instruments.scan(&uncompleted)? {
            let children = contracts.children_of(instrument.id)?;
            if aggregate_contract_fills(&instrument, &children).0 == instrument.fill {
                continue;
            }
            if let Err(e) = self.fills.rederive_instrument(instrument.id).await {
                Self::tally(stage, &mut stats, &instrument.id, e)?;
            }
        }

        let resolved = OrderFilter::all().states(&[OrderState::Filled, OrderState::Cancelled]);
        for order in brokers.scan(&resolved)? {
            let result = self
                .locks
                .with_lock(brokers, order.id, |token| {
                    brokers.modify(order.id, token, &OrderDelta::Complete)
                })
                .await;
            match result {
                Ok(_) => stats.processed += 1,
                Err(e) => Self::tally(stage, &mut stats, &order.id, e)?,
            }
        }
        for order in contracts.scan(&resolved)? {
            match self.complete_contract(order.id).await {
                Ok(true) => stats.processed += 1,
                Ok(false) => stats.deferred += 1,
                Err(e) => Self::tally(stage, &mut stats, &order.id, e)?,
            }
        }
        for order in instruments.scan(&resolved)? {
            match self.complete_instrument(order.id).await {
                Ok(true) => {
                    stats.processed += 1;
                    info!(order_id = %order.id, instrument = %order.instrument_id, fill = %order.fill, "Instrument order completed");
                }
                Ok(false) => stats.deferred += 1,
                Err(e) => Self::tally(stage, &mut stats, &order.id, e)?,
            }
        }
        Ok(stats)
    }

    async fn complete_contract(&self, id: OrderId) -> Result<bool, StackError> {
        let contracts = &self.stacks.contracts;
        let brokers = &self.stacks.brokers;
        if brokers
            .children_of(id)?
            .iter()
            .any(|c| c.state != OrderState::Completed)
        {
            return Ok(false);
        }
        self.locks
            .with_lock(contracts, id, |token| {
                let contract = contracts.get(id)?;
                if !matches!(contract.state, OrderState::Filled | OrderState::Cancelled) {
                    return Ok(false);
                }
                let children = brokers.children_of(id)?;
                if children.iter().any(|c| c.state != OrderState::Completed) {
                    return Ok(false);
                }
                let (fill, avg_price) = aggregate_broker_fills(&contract, &children);
                if fill != contract.fill {
                    contracts.modify(id, token, &OrderDelta::SetFill { fill, avg_price })?;
                }
                contracts.modify(id, token, &OrderDelta::Complete)?;
                Ok(true)
            })
            .await
    }

    async fn complete_instrument(&self, id: OrderId) -> Result<bool, StackError> {
        let instruments = &self.stacks.instruments;
        let contracts = &self.stacks.contracts;
        if contracts
            .children_of(id)?
            .iter()
            .any(|c| c.state != OrderState::Completed)
        {
            return Ok(false);
        }
        self.locks
            .with_lock(instruments, id, |token| {
                let instrument = instruments.get(id)?;
                if !matches!(instrument.state, OrderState::Filled | OrderState::Cancelled) {
                    return Ok(false);
                }
                let children = contracts.children_of(id)?;
                if children.iter().any(|c| c.state != OrderState::Completed) {
                    return Ok(false);
                }
                let (fill, avg_price) = aggregate_contract_fills(&instrument, &children);
                if fill != instrument.fill {
                    instruments.modify(id, token, &OrderDelta::SetFill { fill, avg_price })?;
                }
                instruments.modify(id, token, &OrderDelta::Complete)?;
                Ok(true)
            })
            .await
    }

    // ========================================================================
    // Stage 8: removal
    // ========================================================================

    async fn remove_completed_orders(&self) -> EngineResult<StageStats> {
        let mut stats = StageStats::default();
        let completed = self
            .stacks
            .instruments
            .scan(&OrderFilter::all().states(&[OrderState::Completed]))?;
        for instrument in completed {
            match self.remove_family(&instrument).await {
                Ok(true) => stats.processed += 1,
                Ok(false) => stats.deferred += 1,
                Err(e) => Self::tally(Stage::RemoveCompletedOrders, &mut stats, &instrument.id, e)?,
            }
        }
        Ok(stats)
    }

    /// Book a completed instrument order's fills into the ledger, then
    /// delete it with all of its descendants, bottom-up.
    async fn remove_family(&self, instrument: &InstrumentOrder) -> EngineResult<bool> {
        let contracts = self.stacks.contracts.children_of(instrument.id)?;
        let mut brokers = Vec::new();
        for contract in &contracts {
            brokers.extend(self.stacks.brokers.children_of(contract.id)?);
        }
        let settled = !instrument.is_locked()
            && contracts
                .iter()
                .all(|c| c.state == OrderState::Completed && !c.is_locked())
            && brokers
                .iter()
                .all(|b| b.state == OrderState::Completed && !b.is_locked());
        if !settled {
            debug!(order_id = %instrument.id, "Family not settled; removal postponed");
            return Ok(false);
        }

        let now = Utc::now();
        for contract in &contracts {
            let filled = brokers
                .iter()
                .filter(|b| b.parent == Some(contract.id))
                .fold(TradeVector::zeros(contract.trade.len()), |acc, b| {
                    acc.add(&b.fill)
                });
            if filled.is_zero() {
                continue;
            }
            let booking = Booking {
                order_id: contract.id,
                instrument: contract.instrument_id.clone(),
                legs: contract
                    .detail
                    .legs
                    .iter()
                    .cloned()
                    .zip(filled.legs().iter().copied())
                    .collect(),
                booked_at: now,
            };
            if self.ledger.book(booking)? {
                info!(order_id = %contract.id, instrument = %contract.instrument_id, fill = %filled, "Fills booked");
            }
        }

        for broker in &brokers {
            self.remove_one(&self.stacks.brokers, broker.id).await?;
        }
        for contract in &contracts {
            self.remove_one(&self.stacks.contracts, contract.id).await?;
        }
        self.remove_one(&self.stacks.instruments, instrument.id)
            .await?;

        record_orders_removed(BrokerTier::NAME, brokers.len());
        record_orders_removed(ContractTier::NAME, contracts.len());
        record_orders_removed(InstrumentTier::NAME, 1);
        info!(
            order_id = %instrument.id,
            instrument = %instrument.instrument_id,
            contract_orders = contracts.len(),
            broker_orders = brokers.len(),
            "Order family removed"
        );
        Ok(true)
    }

    async fn remove_one<T: Tier>(&self, stack: &OrderStack<T>, id: OrderId) -> Result<(), StackError> {
        let token = self.locks.acquire(stack, id).await?;
        if let Err(e) = stack.remove(id, &token) {
            if let Err(release) = self.locks.release(stack, &token) {
                warn!(tier = T::NAME, order_id = %id, error = %release, "Failed to release lock");
            }
            return Err(e);
        }
        Ok(())
    }

    // ========================================================================
    // Cancellation
    // ========================================================================

    /// Cancel an instrument order and every descendant that can still be
    /// cancelled.
    ///
    /// Unsubmitted broker orders are cancelled locally. Submitted ones are
    /// cancelled at the broker and marked cancelled only on its
    /// acknowledgment; the rest are followed up by the submission stage.
    /// Fills already executed are kept.
    ///
    /// # Errors
    ///
    /// The instrument order is filled or locked, or a broker call failed.
    pub async fn cancel_instrument_order(&self, id: OrderId) -> EngineResult<CancelSummary> {
        let instruments = &self.stacks.instruments;
        let contracts = &self.stacks.contracts;
        self.locks
            .with_lock(instruments, id, |token| {
                instruments.modify(id, token, &OrderDelta::Cancel)
            })
            .await?;

        let mut summary = CancelSummary {
            order_id: id,
            cancelled: 1,
            awaiting_broker: 0,
        };
        for contract in contracts.children_of(id)? {
            // Cancel the contract order first so no new broker order is
            // spawned under it meanwhile.
            if contract.state.is_cancelable() {
                self.locks
                    .with_lock(contracts, contract.id, |token| {
                        contracts.modify(contract.id, token, &OrderDelta::Cancel)
                    })
                    .await?;
                summary.cancelled += 1;
            }
            for broker in self.stacks.brokers.children_of(contract.id)? {
                if !broker.state.can_fill() {
                    continue;
                }
                if self.cancel_broker_order(broker.id).await? {
                    summary.cancelled += 1;
                } else {
                    summary.awaiting_broker += 1;
                }
            }
        }
        info!(
            order_id = %id,
            cancelled = summary.cancelled,
            awaiting_broker = summary.awaiting_broker,
            "Instrument order cancelled"
        );
        Ok(summary)
    }
}

impl fmt::Debug for StackHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StackHandler")
            .field("holder", self.locks.holder())
            .field("rolls_enabled", &self.rolls_enabled)
            .finish_non_exhaustive()
    }
}
