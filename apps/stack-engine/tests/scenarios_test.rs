//! Handler Cycle Scenarios
//!
//! End-to-end runs of the handler cycle against in-memory stacks and the
//! paper broker:
//! - a single fill carried through all three tiers and removed
//! - partial fills that never exceed the requested quantity
//! - broker rejection and re-decomposition
//! - position breaks gating one instrument only
//! - forced rolls that are never duplicated

#![allow(clippy::expect_used, clippy::unwrap_used)]

mod common;

use chrono::Duration;
use common::{
    BUND_DEC, Harness, SOFR_DEC, SOFR_MAR, bund, quiet_day, roll_day, sofr,
};
use rust_decimal_macros::dec;
use stack_engine::application::handler::{SkipReason, Stage, StageOutcome};
use stack_engine::application::ports::AlertKind;
use stack_engine::config::StagesConfig;
use stack_engine::domain::order_stack::{
    InstrumentDetail, NewOrder, OrderFilter, OrderState, RollSpec, StackError,
};
use stack_engine::domain::shared::{ContractId, HolderId, InstrumentId, StrategyId, TradeVector};
use stack_engine::infrastructure::PaperBroker;

// ============================================
// Single fill
// ============================================

#[tokio::test]
async fn single_fill_completes_and_removes_in_one_cycle() {
    let h = Harness::auto_fill();
    let id = h.place("trend", sofr(), 10);

    let report = h.handler.run_cycle(quiet_day()).await.unwrap();

    assert!(report.is_clean());
    assert!(report.ran(Stage::RemoveCompletedOrders));
    assert!(h.instrument(id).is_none());
    assert!(h.is_empty());
    assert_eq!(h.booked_in(&sofr(), SOFR_DEC), 10);
    assert_eq!(h.broker.accepted().unwrap().len(), 1);
    assert!(h.alerts.alerts().is_empty());

    // Positions agree afterwards; nothing new happens.
    let report = h.handler.run_cycle(quiet_day()).await.unwrap();
    assert!(report.is_clean());
    assert!(h.handler.open_breaks().unwrap().is_empty());
    assert_eq!(h.broker.accepted().unwrap().len(), 1);
}

#[tokio::test]
async fn decomposition_uses_current_contract_and_policy() {
    let mut config = common::config();
    config
        .execution
        .instruments
        .insert(sofr(), stack_engine::domain::order_stack::ExecutionAlgo::Limit);
    let h = Harness::with(config, PaperBroker::manual());
    let id = h.place("trend", sofr(), -3);

    h.handler.run_cycle(quiet_day()).await.unwrap();

    let instrument = h.instrument(id).unwrap();
    assert_eq!(instrument.state, OrderState::Locked);
    let contracts = h.contract_children(id);
    assert_eq!(contracts.len(), 1);
    assert_eq!(contracts[0].detail.legs, vec![ContractId::new(SOFR_DEC)]);
    assert_eq!(contracts[0].trade, TradeVector::single(-3));

    let brokers = h.broker_children(contracts[0].id);
    assert_eq!(brokers.len(), 1);
    assert_eq!(brokers[0].state, OrderState::Locked);
    assert!(brokers[0].detail.broker_ref.is_some());
    let request = h
        .broker
        .request(brokers[0].detail.broker_ref.as_ref().unwrap())
        .unwrap()
        .unwrap();
    assert_eq!(request.algo, stack_engine::domain::order_stack::ExecutionAlgo::Limit);
    assert_eq!(request.legs, vec![(ContractId::new(SOFR_DEC), -3)]);
}

// ============================================
// Partial fills
// ============================================

#[tokio::test]
async fn partial_fills_accumulate_without_exceeding_trade() {
    let h = Harness::manual();
    let id = h.place("trend", sofr(), 10);

    h.handler.run_cycle(quiet_day()).await.unwrap();
    let contract = h.contract_children(id).remove(0);
    let broker_order = h.broker_children(contract.id).remove(0);
    let broker_ref = broker_order.detail.broker_ref.clone().unwrap();
    assert_eq!(broker_order.fill, TradeVector::single(0));

    h.broker
        .execute(&broker_ref, &TradeVector::single(6), dec!(96.10))
        .unwrap();
    h.handler.run_cycle(quiet_day()).await.unwrap();

    let broker_order = h.stacks().brokers.get(broker_order.id).unwrap();
    assert_eq!(broker_order.state, OrderState::PartiallyFilled);
    assert_eq!(broker_order.fill, TradeVector::single(6));
    assert_eq!(broker_order.avg_price, Some(dec!(96.10)));
    let contract = h.stacks().contracts.get(contract.id).unwrap();
    assert_eq!(contract.state, OrderState::PartiallyFilled);
    assert_eq!(contract.fill, TradeVector::single(6));
    let instrument = h.instrument(id).unwrap();
    assert_eq!(instrument.state, OrderState::PartiallyFilled);
    assert_eq!(instrument.fill, TradeVector::single(6));

    h.broker
        .execute(&broker_ref, &TradeVector::single(4), dec!(96.20))
        .unwrap();
    h.handler.run_cycle(quiet_day()).await.unwrap();

    assert!(h.is_empty());
    assert_eq!(h.booked(&sofr()), 10);
    assert_eq!(h.alerts.count(AlertKind::OverFill), 0);
}

// ============================================
// Rejection
// ============================================

#[tokio::test]
async fn rejection_cancels_broker_order_and_redecomposes_once() {
    let h = Harness::manual();
    h.broker.reject_next("insufficient margin").unwrap();
    let id = h.place("trend", sofr(), 5);

    h.handler.run_cycle(quiet_day()).await.unwrap();

    let contract = h.contract_children(id).remove(0);
    let rejected = h.broker_children(contract.id);
    assert_eq!(rejected.len(), 1);
    assert_eq!(rejected[0].state, OrderState::Completed);
    assert_eq!(
        rejected[0].detail.submission.rejection.as_deref(),
        Some("insufficient margin")
    );
    assert!(h.stacks().contracts.get(contract.id).unwrap().is_live());
    assert_eq!(h.alerts.count(AlertKind::OrderRejected), 1);
    assert!(h.broker.accepted().unwrap().is_empty());

    // Next cycle spawns a fresh broker order for the open contract order.
    h.handler.run_cycle(quiet_day()).await.unwrap();
    let children = h.broker_children(contract.id);
    assert_eq!(children.len(), 2);
    let retry = children.iter().find(|c| c.id != rejected[0].id).unwrap();
    assert_eq!(retry.state, OrderState::Locked);
    assert!(retry.detail.broker_ref.is_some());
    assert_eq!(h.broker.accepted().unwrap().len(), 1);
    assert_eq!(h.alerts.count(AlertKind::OrderRejected), 1);
}

#[tokio::test]
async fn rejection_limit_stops_redecomposition() {
    let h = Harness::manual();
    for _ in 0..3 {
        h.broker.reject_next("instrument halted").unwrap();
    }
    let id = h.place("trend", sofr(), 2);

    for _ in 0..5 {
        h.handler.run_cycle(quiet_day()).await.unwrap();
    }

    let contract = h.contract_children(id).remove(0);
    let children = h.broker_children(contract.id);
    assert_eq!(children.len(), 3);
    assert!(children.iter().all(|c| c.state == OrderState::Completed));
    assert!(h.broker.accepted().unwrap().is_empty());
    assert_eq!(h.alerts.count(AlertKind::OrderRejected), 3);

    // The order stays open until someone cancels it.
    assert!(h.instrument(id).unwrap().is_live());
    let summary = h.handler.cancel_instrument_order(id).await.unwrap();
    assert_eq!(summary.cancelled, 2);
    assert_eq!(summary.awaiting_broker, 0);

    h.handler.run_cycle(quiet_day()).await.unwrap();
    assert!(h.is_empty());
    assert_eq!(h.booked(&sofr()), 0);
}

// ============================================
// Position breaks
// ============================================

#[tokio::test]
async fn position_break_gates_only_the_broken_instrument() {
    let h = Harness::auto_fill();
    h.seed_position(1_000, sofr(), SOFR_MAR, 5);
    h.broker.set_position(sofr(), 3).unwrap();
    let sofr_order = h.place("trend", sofr(), 2);
    let bund_order = h.place("trend", bund(), 4);

    h.handler.run_cycle(quiet_day()).await.unwrap();

    let breaks = h.handler.open_breaks().unwrap();
    assert_eq!(breaks.len(), 1);
    assert_eq!(breaks[0].instrument, sofr());
    assert_eq!(breaks[0].internal, 5);
    assert_eq!(breaks[0].broker, 3);
    assert_eq!(h.alerts.count(AlertKind::PositionBreak), 1);

    let gated = h.instrument(sofr_order).unwrap();
    assert_eq!(gated.state, OrderState::Created);
    assert!(h.contract_children(sofr_order).is_empty());
    assert!(h.instrument(bund_order).is_none());
    assert_eq!(h.booked_in(&bund(), BUND_DEC), 4);

    // Still gated on later cycles, without repeating the alert.
    h.handler.run_cycle(quiet_day()).await.unwrap();
    assert_eq!(h.instrument(sofr_order).unwrap().state, OrderState::Created);
    assert_eq!(h.alerts.count(AlertKind::PositionBreak), 1);

    // Fixed externally and acknowledged: the order flows again.
    h.broker.set_position(sofr(), 5).unwrap();
    assert!(h.handler.acknowledge_break(&sofr()).unwrap().is_some());
    h.handler.run_cycle(quiet_day()).await.unwrap();

    assert!(h.instrument(sofr_order).is_none());
    assert_eq!(h.booked(&sofr()), 7);
    assert!(h.handler.open_breaks().unwrap().is_empty());
}

// ============================================
// Rolls
// ============================================

#[tokio::test]
async fn roll_is_not_duplicated_while_in_flight() {
    let h = Harness::manual();
    h.seed_position(1_000, sofr(), SOFR_DEC, 4);

    for _ in 0..3 {
        h.handler.run_cycle(roll_day()).await.unwrap();
    }

    let rolls = h
        .stacks()
        .instruments
        .scan(&OrderFilter::all().strategy(StrategyId::roll()))
        .unwrap();
    assert_eq!(rolls.len(), 1);
    let roll = &rolls[0];
    assert_eq!(roll.trade, TradeVector::new(vec![-4, 4]));
    let spec = roll.detail.roll.clone().unwrap();
    assert_eq!(spec.from, ContractId::new(SOFR_DEC));
    assert_eq!(spec.to, ContractId::new(SOFR_MAR));

    let legs = h.contract_children(roll.id);
    assert_eq!(legs.len(), 2);
    assert_eq!(h.broker.accepted().unwrap().len(), 2);

    // The key rule refuses a second live roll outright.
    let duplicate = h.stacks().instruments.create(NewOrder::new(
        StrategyId::roll(),
        sofr(),
        TradeVector::new(vec![-4, 4]),
        InstrumentDetail::roll(RollSpec {
            from: ContractId::new(SOFR_DEC),
            to: ContractId::new(SOFR_MAR),
        }),
    ));
    assert!(matches!(duplicate, Err(StackError::DuplicateOrder { .. })));
}

#[tokio::test]
async fn completed_roll_moves_position_to_next_contract() {
    let h = Harness::manual();
    h.seed_position(1_000, sofr(), SOFR_DEC, 4);

    h.handler.run_cycle(roll_day()).await.unwrap();
    h.handler.run_cycle(roll_day()).await.unwrap();

    for broker_ref in h.broker.accepted().unwrap() {
        let request = h.broker.request(&broker_ref).unwrap().unwrap();
        h.broker
            .execute(&broker_ref, &request.trade(), dec!(95.80))
            .unwrap();
    }
    h.handler.run_cycle(roll_day()).await.unwrap();

    assert!(h.is_empty());
    assert_eq!(h.booked_in(&sofr(), SOFR_DEC), 0);
    assert_eq!(h.booked_in(&sofr(), SOFR_MAR), 4);

    // Nothing left in the expiring contract, so no new roll.
    h.handler.run_cycle(roll_day()).await.unwrap();
    assert!(h.all_instruments().is_empty());
}

#[tokio::test]
async fn disabled_rolls_generate_nothing() {
    let mut config = common::config();
    config.rolls.enabled = false;
    let h = Harness::with(config, PaperBroker::manual());
    h.seed_position(1_000, sofr(), SOFR_DEC, 4);

    h.handler.run_cycle(roll_day()).await.unwrap();
    assert!(h.all_instruments().is_empty());
}

// ============================================
// Stage scheduling and gating
// ============================================

#[tokio::test]
async fn default_schedule_runs_rolls_once_a_day() {
    let mut config = common::config();
    config.handler.stages = StagesConfig::default();
    let h = Harness::with(config, PaperBroker::manual());

    let first = h.handler.run_cycle(quiet_day()).await.unwrap();
    assert!(first.ran(Stage::GenerateRollOrders));
    assert!(first.ran(Stage::CheckPositionBreaks));

    let second = h
        .handler
        .run_cycle(quiet_day() + Duration::seconds(10))
        .await
        .unwrap();
    assert!(matches!(
        second.outcome(Stage::GenerateRollOrders),
        Some(StageOutcome::Skipped(SkipReason::NotDue { .. }))
    ));
    assert!(matches!(
        second.outcome(Stage::CheckPositionBreaks),
        Some(StageOutcome::Skipped(SkipReason::NotDue { .. }))
    ));
    assert!(second.ran(Stage::SubmitBrokerOrders));

    let next_day = h
        .handler
        .run_cycle(quiet_day() + Duration::days(1))
        .await
        .unwrap();
    assert!(next_day.ran(Stage::GenerateRollOrders));
}

#[tokio::test]
async fn lock_conflict_gates_removal_for_the_cycle() {
    let h = Harness::auto_fill();
    let done = h.place("trend", sofr(), 1);
    h.handler.run_cycle(quiet_day()).await.unwrap();
    assert!(h.instrument(done).is_none());

    let blocked = h.place("carry", sofr(), 1);
    let token = h
        .stacks()
        .instruments
        .lock(blocked, &HolderId::new("operator"))
        .unwrap();

    let report = h.handler.run_cycle(quiet_day()).await.unwrap();
    assert_eq!(
        report.stats(Stage::SpawnContractOrders).unwrap().lock_conflicts,
        1
    );
    assert_eq!(
        report.outcome(Stage::RemoveCompletedOrders),
        Some(&StageOutcome::Skipped(SkipReason::Gated))
    );
    assert_eq!(h.instrument(blocked).unwrap().state, OrderState::Created);

    h.stacks().instruments.unlock(blocked, &token).unwrap();
    let report = h.handler.run_cycle(quiet_day()).await.unwrap();
    assert!(report.is_clean());
    assert!(h.instrument(blocked).is_none());
}

#[tokio::test]
async fn unknown_instrument_aborts_cycle_with_alert() {
    let h = Harness::auto_fill();
    h.place("trend", InstrumentId::new("ERIS"), 1);

    let result = h.handler.run_cycle(quiet_day()).await;

    let err = result.unwrap_err();
    assert!(err.is_fatal());
    assert_eq!(h.alerts.count(AlertKind::FatalConfiguration), 1);
    assert!(h.broker.accepted().unwrap().is_empty());
}
