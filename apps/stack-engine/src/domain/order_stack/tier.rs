//! Stack tiers and their tier-specific order detail.
//!
//! The same `Order<T>` shape is used by all three stacks. Each tier adds its
//! own detail: roll legs on instrument and contract orders, submission
//! bookkeeping on broker orders.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use super::delta::SubmissionDelta;
use super::errors::StackError;
use crate::domain::shared::{BrokerRef, ContractId, OrderId};

/// A tier of the order stack.
pub trait Tier:
    Clone + Copy + fmt::Debug + PartialEq + Eq + Default + Send + Sync + 'static
{
    /// Tier name used in logs, metrics and errors.
    const NAME: &'static str;

    /// Tier-specific order detail.
    type Detail: Clone
        + fmt::Debug
        + PartialEq
        + Serialize
        + DeserializeOwned
        + Send
        + Sync
        + 'static;

    /// Contracts traded by an order of this tier, one per leg.
    fn contracts(detail: &Self::Detail) -> &[ContractId];

    /// Apply a submission delta to the detail.
    ///
    /// Only broker orders are submitted; other tiers reject the delta.
    fn apply_submission(
        id: OrderId,
        _detail: &mut Self::Detail,
        delta: &SubmissionDelta,
        _now: DateTime<Utc>,
    ) -> Result<(), StackError> {
        Err(StackError::InvalidDelta {
            id,
            reason: format!("{} orders are not submitted ({delta:?})", Self::NAME),
        })
    }
}

/// Top tier: desired trades per strategy and instrument.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct InstrumentTier;

/// Middle tier: trades in specific contracts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ContractTier;

/// Bottom tier: units transmitted to the broker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BrokerTier;

/// A forced roll from an expiring contract into the next one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RollSpec {
    /// Contract being closed.
    pub from: ContractId,
    /// Contract being opened.
    pub to: ContractId,
}

/// Instrument order detail.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct InstrumentDetail {
    /// Set for forced roll orders. The trade vector is then `[close, open]`.
    pub roll: Option<RollSpec>,
}

impl InstrumentDetail {
    /// Detail for a roll order.
    #[must_use]
    pub const fn roll(spec: RollSpec) -> Self {
        Self { roll: Some(spec) }
    }
}

/// Which side of a roll a contract order carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RollLeg {
    /// Closes the position in the expiring contract.
    Close,
    /// Opens the equivalent position in the next contract.
    Open,
}

/// Contract order detail.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContractDetail {
    /// Contract per leg of the trade vector.
    pub legs: Vec<ContractId>,
    /// Set when the order is one half of a roll.
    pub roll_leg: Option<RollLeg>,
}

impl ContractDetail {
    /// Detail for a single-contract order.
    #[must_use]
    pub fn single(contract: ContractId) -> Self {
        Self {
            legs: vec![contract],
            roll_leg: None,
        }
    }
}

/// Execution algorithm applied to a broker order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionAlgo {
    /// Cross the spread immediately.
    #[default]
    Market,
    /// Rest at a limit price chosen by the broker collaborator.
    Limit,
    /// Start passive and become aggressive over time.
    Adaptive,
}

impl fmt::Display for ExecutionAlgo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Market => "market",
            Self::Limit => "limit",
            Self::Adaptive => "adaptive",
        };
        write!(f, "{s}")
    }
}

/// Submission bookkeeping for a broker order.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Submission {
    /// Submission attempts that timed out or failed transiently.
    pub attempts: u32,
    /// Earliest time the next attempt may run.
    pub next_attempt_at: Option<DateTime<Utc>>,
    /// Set while a process is talking to the broker about this order.
    pub reserved_at: Option<DateTime<Utc>>,
    /// When the broker acknowledged the order.
    pub submitted_at: Option<DateTime<Utc>>,
    /// Retries exhausted or reservation abandoned; needs manual intervention.
    pub stuck: bool,
    /// A cancel request has been sent and awaits acknowledgment.
    pub cancel_requested: bool,
    /// Broker's reason, if the order was rejected.
    #[serde(default)]
    pub rejection: Option<String>,
}

/// Broker order detail.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BrokerDetail {
    /// Contract per leg of the trade vector.
    pub legs: Vec<ContractId>,
    /// Execution algorithm.
    pub algo: ExecutionAlgo,
    /// Broker reference, once acknowledged.
    pub broker_ref: Option<BrokerRef>,
    /// Submission bookkeeping.
    pub submission: Submission,
}

impl BrokerDetail {
    /// Detail for a fresh, unsubmitted broker order.
    #[must_use]
    pub fn new(legs: Vec<ContractId>, algo: ExecutionAlgo) -> Self {
        Self {
            legs,
            algo,
            broker_ref: None,
            submission: Submission::default(),
        }
    }

    /// Whether the order has reached the broker or may have.
    #[must_use]
    pub const fn is_submitted_or_reserved(&self) -> bool {
        self.broker_ref.is_some() || self.submission.reserved_at.is_some()
    }
}

impl Tier for InstrumentTier {
    const NAME: &'static str = "instrument";
    type Detail = InstrumentDetail;

    fn contracts(_detail: &Self::Detail) -> &[ContractId] {
        &[]
    }
}

impl Tier for ContractTier {
    const NAME: &'static str = "contract";
    type Detail = ContractDetail;

    fn contracts(detail: &Self::Detail) -> &[ContractId] {
        &detail.legs
    }
}

impl Tier for BrokerTier {
    const NAME: &'static str = "broker";
    type Detail = BrokerDetail;

    fn contracts(detail: &Self::Detail) -> &[ContractId] {
        &detail.legs
    }

    fn apply_submission(
        id: OrderId,
        detail: &mut Self::Detail,
        delta: &SubmissionDelta,
        now: DateTime<Utc>,
    ) -> Result<(), StackError> {
        let sub = &mut detail.submission;
        match delta {
            SubmissionDelta::Reserve => {
                if sub.reserved_at.is_some() || detail.broker_ref.is_some() || sub.stuck {
                    return Err(StackError::InvalidDelta {
                        id,
                        reason: "order is already reserved, submitted or stuck".to_string(),
                    });
                }
                sub.reserved_at = Some(now);
            }
            SubmissionDelta::Submitted { broker_ref } => {
                detail.broker_ref = Some(broker_ref.clone());
                sub.reserved_at = None;
                sub.next_attempt_at = None;
                sub.submitted_at = Some(now);
            }
            SubmissionDelta::Failed { retry_at } => {
                sub.reserved_at = None;
                sub.attempts += 1;
                sub.next_attempt_at = Some(*retry_at);
            }
            SubmissionDelta::Rejected { reason } => {
                sub.reserved_at = None;
                sub.rejection = Some(reason.clone());
            }
            SubmissionDelta::MarkStuck => {
                sub.reserved_at = None;
                sub.stuck = true;
            }
            SubmissionDelta::RequestCancel => {
                sub.cancel_requested = true;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn broker_detail() -> BrokerDetail {
        BrokerDetail::new(vec![ContractId::new("SOFR_20261216")], ExecutionAlgo::Market)
    }

    #[test]
    fn instrument_tier_has_no_contracts() {
        assert!(InstrumentTier::contracts(&InstrumentDetail::default()).is_empty());
    }

    #[test]
    fn contract_tier_reports_legs() {
        let detail = ContractDetail::single(ContractId::new("SOFR_20261216"));
        assert_eq!(ContractTier::contracts(&detail).len(), 1);
    }

    #[test]
    fn reserve_then_submit() {
        let mut detail = broker_detail();
        let now = Utc::now();
        BrokerTier::apply_submission(OrderId::new(1), &mut detail, &SubmissionDelta::Reserve, now)
            .unwrap();
        assert!(detail.is_submitted_or_reserved());

        BrokerTier::apply_submission(
            OrderId::new(1),
            &mut detail,
            &SubmissionDelta::Submitted {
                broker_ref: BrokerRef::new("paper-1"),
            },
            now,
        )
        .unwrap();
        assert_eq!(detail.broker_ref, Some(BrokerRef::new("paper-1")));
        assert!(detail.submission.reserved_at.is_none());
        assert_eq!(detail.submission.submitted_at, Some(now));
    }

    #[test]
    fn double_reserve_is_rejected() {
        let mut detail = broker_detail();
        let now = Utc::now();
        BrokerTier::apply_submission(OrderId::new(1), &mut detail, &SubmissionDelta::Reserve, now)
            .unwrap();
        let again =
            BrokerTier::apply_submission(OrderId::new(1), &mut detail, &SubmissionDelta::Reserve, now);
        assert!(matches!(again, Err(StackError::InvalidDelta { .. })));
    }

    #[test]
    fn failed_attempt_schedules_retry() {
        let mut detail = broker_detail();
        let now = Utc::now();
        let retry_at = now + chrono::Duration::seconds(2);
        BrokerTier::apply_submission(OrderId::new(1), &mut detail, &SubmissionDelta::Reserve, now)
            .unwrap();
        BrokerTier::apply_submission(
            OrderId::new(1),
            &mut detail,
            &SubmissionDelta::Failed { retry_at },
            now,
        )
        .unwrap();
        assert_eq!(detail.submission.attempts, 1);
        assert_eq!(detail.submission.next_attempt_at, Some(retry_at));
        assert!(!detail.is_submitted_or_reserved());
    }

    #[test]
    fn contract_orders_reject_submission_deltas() {
        let mut detail = ContractDetail::single(ContractId::new("SOFR_20261216"));
        let result = ContractTier::apply_submission(
            OrderId::new(3),
            &mut detail,
            &SubmissionDelta::Reserve,
            Utc::now(),
        );
        assert!(matches!(result, Err(StackError::InvalidDelta { .. })));
    }

    #[test]
    fn algo_serializes_snake_case() {
        assert_eq!(
            serde_json::to_string(&ExecutionAlgo::Adaptive).unwrap(),
            "\"adaptive\""
        );
        assert_eq!(ExecutionAlgo::Limit.to_string(), "limit");
    }
}
