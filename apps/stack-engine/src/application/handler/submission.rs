//! Stage 5: transmitting broker orders, and following up on cancels.
//!
//! A submission reserves the order under its lock, calls the broker with
//! no lock held, and records the outcome under the lock again. The
//! reservation keeps a second handler from submitting the same order while
//! the broker call is in flight. A reservation that never got confirmed may
//! have reached the broker, so it is parked as stuck, never resubmitted.
//! An order whose contract expired while it waited is cancelled unsent.

use chrono::{DateTime, Utc};
use tracing::{error, info, warn};

use super::report::StageStats;
use super::stack_handler::StackHandler;
use super::stage::Stage;
use crate::application::ports::{Alert, AlertKind, BrokerError, BrokerOrderRequest, CancelAck};
use crate::domain::contracts::ContractSpec;
use crate::domain::order_stack::{
    BrokerOrder, OrderDelta, OrderFilter, OrderState, StackError, SubmissionDelta,
};
use crate::domain::shared::{BrokerRef, OrderId};
use crate::error::EngineResult;
use crate::observability::record_submission;

impl StackHandler {
    pub(super) async fn submit_broker_orders(&self, now: DateTime<Utc>) -> EngineResult<StageStats> {
        let mut stats = StageStats::default();
        let unsubmitted = self
            .stacks
            .brokers
            .scan(&OrderFilter::all().states(&[OrderState::Created]))?;
        for order in unsubmitted {
            if let Err(e) = self.submit_one(&order, now, &mut stats).await {
                Self::tally(Stage::SubmitBrokerOrders, &mut stats, &order.id, e)?;
            }
        }
        self.follow_up_cancels(&mut stats).await?;
        Ok(stats)
    }

    async fn submit_one(
        &self,
        order: &BrokerOrder,
        now: DateTime<Utc>,
        stats: &mut StageStats,
    ) -> EngineResult<()> {
        let submission = &order.detail.submission;
        if order.detail.broker_ref.is_some() || submission.stuck {
            return Ok(());
        }
        if let Some(reserved_at) = submission.reserved_at {
            if now - reserved_at > self.reservation_timeout {
                self.mark_stuck(
                    order.id,
                    "submission was never confirmed; the order may have reached the broker",
                )
                .await?;
                stats.processed += 1;
            } else {
                stats.deferred += 1;
            }
            return Ok(());
        }
        if submission.next_attempt_at.is_some_and(|at| at > now) {
            stats.deferred += 1;
            return Ok(());
        }
        let as_of = now.date_naive();
        if let Some(expired) = order.contracts().iter().find_map(|leg| {
            self.universe
                .contract(leg)
                .filter(|spec| spec.is_expired(as_of))
        }) {
            self.retire_expired(order, &expired).await?;
            stats.processed += 1;
            return Ok(());
        }

        let Some(order) = self.reserve(order.id).await? else {
            return Ok(());
        };
        let request = BrokerOrderRequest::for_order(&order);
        let algo = order.detail.algo.to_string();
        let started = std::time::Instant::now();
        let result = match tokio::time::timeout(self.broker_timeout, self.broker.submit(&request)).await
        {
            Ok(result) => result,
            Err(_) => Err(BrokerError::Timeout {
                millis: u64::try_from(self.broker_timeout.as_millis()).unwrap_or(u64::MAX),
            }),
        };
        let latency = started.elapsed().as_secs_f64();

        match result {
            Ok(broker_ref) => {
                record_submission("accepted", &algo, latency);
                self.confirm_submission(&order, broker_ref).await?;
            }
            Err(BrokerError::OrderRejected { reason }) => {
                record_submission("rejected", &algo, latency);
                self.reject(&order, reason).await?;
            }
            Err(e) if e.is_retryable() => {
                record_submission("failed", &algo, latency);
                self.retry_later(&order, &e, now).await?;
            }
            Err(e) => {
                record_submission("failed", &algo, latency);
                self.mark_stuck(order.id, &e.to_string()).await?;
            }
        }
        stats.processed += 1;
        Ok(())
    }

    async fn reserve(&self, id: OrderId) -> Result<Option<BrokerOrder>, StackError> {
        let brokers = &self.stacks.brokers;
        self.locks
            .with_lock(brokers, id, |token| {
                let current = brokers.get(id)?;
                if current.state != OrderState::Created
                    || current.detail.is_submitted_or_reserved()
                    || current.detail.submission.stuck
                {
                    return Ok(None);
                }
                brokers
                    .modify(id, token, &OrderDelta::Submission(SubmissionDelta::Reserve))
                    .map(Some)
            })
            .await
    }

    async fn confirm_submission(&self, order: &BrokerOrder, broker_ref: BrokerRef) -> EngineResult<()> {
        let brokers = &self.stacks.brokers;
        // Worth waiting for: losing the confirmation parks the order as stuck.
        let token = match self
            .locks
            .acquire_with_timeout(brokers, order.id, self.broker_timeout)
            .await
        {
            Ok(token) => token,
            Err(e) => {
                error!(
                    order_id = %order.id,
                    broker_ref = %broker_ref,
                    error = %e,
                    "Broker accepted order but confirmation could not be recorded"
                );
                return Err(e.into());
            }
        };
        let delta = OrderDelta::Submission(SubmissionDelta::Submitted {
            broker_ref: broker_ref.clone(),
        });
        let result = brokers.modify(order.id, &token, &delta);
        let released = self.locks.release(brokers, &token);
        result?;
        released?;
        info!(
            order_id = %order.id,
            broker_ref = %broker_ref,
            instrument = %order.instrument_id,
            trade = %order.trade,
            algo = %order.detail.algo,
            "Broker order submitted"
        );
        Ok(())
    }

    async fn reject(&self, order: &BrokerOrder, reason: String) -> EngineResult<()> {
        let brokers = &self.stacks.brokers;
        let delta = OrderDelta::Submission(SubmissionDelta::Rejected {
            reason: reason.clone(),
        });
        self.locks
            .with_lock(brokers, order.id, |token| brokers.modify(order.id, token, &delta))
            .await?;
        warn!(
            order_id = %order.id,
            instrument = %order.instrument_id,
            reason = %reason,
            "Broker rejected order; cancelled"
        );
        self.raise(
            Alert::new(
                AlertKind::OrderRejected,
                format!("broker order {} rejected: {reason}", order.id),
            )
            .with_instrument(order.instrument_id.clone())
            .with_order(order.id),
        )
        .await;
        Ok(())
    }

    async fn retry_later(
        &self,
        order: &BrokerOrder,
        error: &BrokerError,
        now: DateTime<Utc>,
    ) -> EngineResult<()> {
        let failed = order.detail.submission.attempts + 1;
        if self.retry.is_exhausted(failed) {
            return self
                .mark_stuck(
                    order.id,
                    &format!("{failed} submission attempts failed, last: {error}"),
                )
                .await;
        }
        let retry_at = self.retry.retry_at(now, failed);
        let brokers = &self.stacks.brokers;
        let delta = OrderDelta::Submission(SubmissionDelta::Failed { retry_at });
        self.locks
            .with_lock(brokers, order.id, |token| brokers.modify(order.id, token, &delta))
            .await?;
        warn!(
            order_id = %order.id,
            attempt = failed,
            retry_at = %retry_at,
            error = %error,
            "Submission failed; will retry"
        );
        Ok(())
    }

    /// Cancel the family of an unsent broker order whose contract has
    /// expired. The strategy re-places the order against a live contract.
    async fn retire_expired(&self, order: &BrokerOrder, expired: &ContractSpec) -> EngineResult<()> {
        warn!(
            order_id = %order.id,
            contract = %expired.id,
            expiry = %expired.expiry,
            "Contract expired before submission; cancelling order"
        );
        let instrument_order = match order.parent {
            Some(contract_order) => self
                .stacks
                .contracts
                .find(contract_order)?
                .and_then(|c| c.parent),
            None => None,
        };
        match instrument_order {
            Some(id) => {
                self.cancel_instrument_order(id).await?;
            }
            None => {
                self.cancel_broker_order(order.id).await?;
            }
        }
        self.raise(
            Alert::new(
                AlertKind::ContractExpired,
                format!(
                    "broker order {} not sent: contract {} expired on {}",
                    order.id, expired.id, expired.expiry
                ),
            )
            .with_instrument(order.instrument_id.clone())
            .with_order(order.id),
        )
        .await;
        Ok(())
    }

    async fn mark_stuck(&self, id: OrderId, reason: &str) -> EngineResult<()> {
        let brokers = &self.stacks.brokers;
        let order = self
            .locks
            .with_lock(brokers, id, |token| {
                brokers.modify(id, token, &OrderDelta::Submission(SubmissionDelta::MarkStuck))
            })
            .await?;
        error!(order_id = %id, reason, "Broker order stuck; manual intervention required");
        self.raise(
            Alert::new(AlertKind::StuckOrder, format!("broker order {id}: {reason}"))
                .with_instrument(order.instrument_id)
                .with_order(id),
        )
        .await;
        Ok(())
    }

    // ========================================================================
    // Cancels
    // ========================================================================

    /// Re-send cancels that the broker has not acknowledged yet, including
    /// cancels requested while the order's submission was in flight.
    async fn follow_up_cancels(&self, stats: &mut StageStats) -> EngineResult<()> {
        let open = self.stacks.brokers.scan(&OrderFilter::all().live())?;
        for order in open {
            if !order.detail.submission.cancel_requested || !order.state.can_fill() {
                continue;
            }
            let Some(broker_ref) = order.detail.broker_ref.clone() else {
                continue;
            };
            match self.cancel_at_broker(&order, &broker_ref).await {
                Ok(_) => stats.processed += 1,
                Err(e) => Self::tally(Stage::SubmitBrokerOrders, stats, &order.id, e)?,
            }
        }
        Ok(())
    }

    /// Cancel one broker order. Returns `true` once it is cancelled locally.
    pub(super) async fn cancel_broker_order(&self, id: OrderId) -> EngineResult<bool> {
        let brokers = &self.stacks.brokers;
        let order = self
            .locks
            .with_lock(brokers, id, |token| {
                let current = brokers.get(id)?;
                if !current.state.can_fill() {
                    return Ok(current);
                }
                let delta = if current.detail.is_submitted_or_reserved() {
                    OrderDelta::Submission(SubmissionDelta::RequestCancel)
                } else {
                    OrderDelta::Cancel
                };
                brokers.modify(id, token, &delta)
            })
            .await?;
        if !order.state.can_fill() {
            return Ok(true);
        }
        match &order.detail.broker_ref {
            Some(broker_ref) => {
                Ok(self.cancel_at_broker(&order, broker_ref).await? == CancelAck::Cancelled)
            }
            // Still being submitted; cancelled once the submission is confirmed.
            None => Ok(false),
        }
    }

    pub(super) async fn cancel_at_broker(
        &self,
        order: &BrokerOrder,
        broker_ref: &BrokerRef,
    ) -> EngineResult<CancelAck> {
        let ack = match tokio::time::timeout(self.broker_timeout, self.broker.cancel(broker_ref)).await
        {
            Ok(ack) => ack?,
            Err(_) => {
                return Err(BrokerError::Timeout {
                    millis: u64::try_from(self.broker_timeout.as_millis()).unwrap_or(u64::MAX),
                }
                .into());
            }
        };
        if ack == CancelAck::Cancelled {
            let brokers = &self.stacks.brokers;
            self.locks
                .with_lock(brokers, order.id, |token| {
                    // Fills may have completed it meanwhile.
                    if brokers.get(order.id)?.state.can_fill() {
                        brokers.modify(order.id, token, &OrderDelta::Cancel)?;
                    }
                    Ok(())
                })
                .await?;
        }
        info!(order_id = %order.id, broker_ref = %broker_ref, ack = ?ack, "Cancel acknowledged");
        Ok(ack)
    }
}
