//! Paper broker: an in-process broker for paper trading and tests.
//!
//! Accepted orders are filled immediately at a fixed price when auto-fill
//! is on; otherwise fills are driven explicitly with [`PaperBroker::execute`].
//! Failures can be scripted: rejections, connection errors, and calls that
//! never return.

use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::Utc;
use rust_decimal::Decimal;
use tracing::{debug, info};

use crate::application::ports::{
    BrokerError, BrokerOrderRequest, BrokerPort, CancelAck, ExecutionReport,
};
use crate::config::PaperBrokerConfig;
use crate::domain::shared::{BrokerRef, InstrumentId, TradeVector};

#[derive(Debug, Clone)]
struct PaperOrder {
    request: BrokerOrderRequest,
    filled: TradeVector,
    cancelled: bool,
}

impl PaperOrder {
    fn is_done(&self) -> bool {
        self.cancelled || self.request.trade().is_filled_by(&self.filled)
    }
}

#[derive(Debug, Default)]
struct PaperState {
    next_ref: u64,
    orders: HashMap<BrokerRef, PaperOrder>,
    accepted: Vec<BrokerRef>,
    reports: VecDeque<ExecutionReport>,
    positions: HashMap<InstrumentId, i64>,
    rejections: VecDeque<String>,
    connection_failures: u32,
    hangs: u32,
    defer_cancels: bool,
}

enum SubmitScript {
    Hang,
    Fail,
    Reject(String),
    Accept,
}

/// In-process broker.
#[derive(Debug)]
pub struct PaperBroker {
    auto_fill: bool,
    fill_price: Decimal,
    state: Mutex<PaperState>,
}

impl Default for PaperBroker {
    fn default() -> Self {
        Self::new(&PaperBrokerConfig::default())
    }
}

impl PaperBroker {
    /// Create a paper broker.
    #[must_use]
    pub fn new(config: &PaperBrokerConfig) -> Self {
        Self {
            auto_fill: config.auto_fill,
            fill_price: config.fill_price,
            state: Mutex::new(PaperState::default()),
        }
    }

    /// Paper broker that leaves every order working until [`Self::execute`].
    #[must_use]
    pub fn manual() -> Self {
        Self::new(&PaperBrokerConfig {
            auto_fill: false,
            ..PaperBrokerConfig::default()
        })
    }

    fn state(&self) -> Result<MutexGuard<'_, PaperState>, BrokerError> {
        self.state.lock().map_err(|e| BrokerError::ConnectionError {
            message: format!("paper broker state poisoned: {e}"),
        })
    }

    /// Reject the next submission with `reason`.
    ///
    /// # Errors
    ///
    /// The broker state is poisoned.
    pub fn reject_next(&self, reason: impl Into<String>) -> Result<(), BrokerError> {
        self.state()?.rejections.push_back(reason.into());
        Ok(())
    }

    /// Fail the next `count` submissions with a connection error.
    ///
    /// # Errors
    ///
    /// The broker state is poisoned.
    pub fn fail_next(&self, count: u32) -> Result<(), BrokerError> {
        self.state()?.connection_failures += count;
        Ok(())
    }

    /// Never answer the next `count` submissions.
    ///
    /// # Errors
    ///
    /// The broker state is poisoned.
    pub fn hang_next(&self, count: u32) -> Result<(), BrokerError> {
        self.state()?.hangs += count;
        Ok(())
    }

    /// Answer cancels with [`CancelAck::Pending`] instead of cancelling.
    ///
    /// # Errors
    ///
    /// The broker state is poisoned.
    pub fn defer_cancels(&self, defer: bool) -> Result<(), BrokerError> {
        self.state()?.defer_cancels = defer;
        Ok(())
    }

    /// Override the broker-side position of an instrument.
    ///
    /// # Errors
    ///
    /// The broker state is poisoned.
    pub fn set_position(&self, instrument: InstrumentId, quantity: i64) -> Result<(), BrokerError> {
        self.state()?.positions.insert(instrument, quantity);
        Ok(())
    }

    /// Broker references of accepted orders, in acceptance order.
    ///
    /// # Errors
    ///
    /// The broker state is poisoned.
    pub fn accepted(&self) -> Result<Vec<BrokerRef>, BrokerError> {
        Ok(self.state()?.accepted.clone())
    }

    /// Request an accepted order was submitted with.
    ///
    /// # Errors
    ///
    /// The broker state is poisoned.
    pub fn request(&self, broker_ref: &BrokerRef) -> Result<Option<BrokerOrderRequest>, BrokerError> {
        Ok(self
            .state()?
            .orders
            .get(broker_ref)
            .map(|o| o.request.clone()))
    }

    /// Execute `quantity` of a working order at `price`.
    ///
    /// Executions beyond the order's open quantity are refused, as a real
    /// broker would.
    ///
    /// # Errors
    ///
    /// Unknown reference, or an execution the order cannot take.
    pub fn execute(
        &self,
        broker_ref: &BrokerRef,
        quantity: &TradeVector,
        price: Decimal,
    ) -> Result<(), BrokerError> {
        let mut state = self.state()?;
        Self::execute_locked(&mut state, broker_ref, quantity, price)
    }

    fn execute_locked(
        state: &mut PaperState,
        broker_ref: &BrokerRef,
        quantity: &TradeVector,
        price: Decimal,
    ) -> Result<(), BrokerError> {
        let order = state
            .orders
            .get_mut(broker_ref)
            .ok_or_else(|| BrokerError::OrderNotFound {
                broker_ref: broker_ref.clone(),
            })?;
        if order.cancelled {
            return Err(BrokerError::OrderRejected {
                reason: format!("{broker_ref} is cancelled"),
            });
        }
        let total = order.filled.add(quantity);
        order
            .request
            .trade()
            .check_fill(&total)
            .map_err(|e| BrokerError::OrderRejected {
                reason: format!("execution does not fit {broker_ref}: {e}"),
            })?;
        order.filled = total;
        let instrument = order.request.instrument.clone();

        *state.positions.entry(instrument).or_default() += quantity.net();
        state.reports.push_back(ExecutionReport {
            broker_ref: broker_ref.clone(),
            filled: quantity.clone(),
            avg_price: Some(price),
            reported_at: Utc::now(),
        });
        debug!(broker_ref = %broker_ref, quantity = %quantity, price = %price, "Paper execution");
        Ok(())
    }

    /// Queue a report without touching orders or positions, for simulating
    /// a misbehaving broker feed.
    ///
    /// # Errors
    ///
    /// The broker state is poisoned.
    pub fn inject_report(&self, report: ExecutionReport) -> Result<(), BrokerError> {
        self.state()?.reports.push_back(report);
        Ok(())
    }

    fn script_next(&self) -> Result<SubmitScript, BrokerError> {
        let mut state = self.state()?;
        if state.hangs > 0 {
            state.hangs -= 1;
            return Ok(SubmitScript::Hang);
        }
        if state.connection_failures > 0 {
            state.connection_failures -= 1;
            return Ok(SubmitScript::Fail);
        }
        if let Some(reason) = state.rejections.pop_front() {
            return Ok(SubmitScript::Reject(reason));
        }
        Ok(SubmitScript::Accept)
    }
}

#[async_trait]
impl BrokerPort for PaperBroker {
    async fn submit(&self, request: &BrokerOrderRequest) -> Result<BrokerRef, BrokerError> {
        match self.script_next()? {
            SubmitScript::Hang => {
                debug!(client_order_id = %request.client_order_id, "Paper broker not answering");
                return std::future::pending().await;
            }
            SubmitScript::Fail => {
                return Err(BrokerError::ConnectionError {
                    message: "paper broker connection refused".to_string(),
                });
            }
            SubmitScript::Reject(reason) => return Err(BrokerError::OrderRejected { reason }),
            SubmitScript::Accept => {}
        }

        let mut state = self.state()?;
        state.next_ref += 1;
        let broker_ref = BrokerRef::new(format!("paper-{}", state.next_ref));
        let trade = request.trade();
        state.orders.insert(
            broker_ref.clone(),
            PaperOrder {
                request: request.clone(),
                filled: TradeVector::zeros(trade.len()),
                cancelled: false,
            },
        );
        state.accepted.push(broker_ref.clone());
        info!(
            broker_ref = %broker_ref,
            client_order_id = %request.client_order_id,
            instrument = %request.instrument,
            trade = %trade,
            algo = %request.algo,
            "Paper order accepted"
        );
        if self.auto_fill {
            Self::execute_locked(&mut state, &broker_ref, &trade, self.fill_price)?;
        }
        Ok(broker_ref)
    }

    async fn cancel(&self, broker_ref: &BrokerRef) -> Result<CancelAck, BrokerError> {
        let mut state = self.state()?;
        let defer = state.defer_cancels;
        let order = state
            .orders
            .get_mut(broker_ref)
            .ok_or_else(|| BrokerError::OrderNotFound {
                broker_ref: broker_ref.clone(),
            })?;
        if order.is_done() && !order.cancelled {
            return Ok(CancelAck::AlreadyFilled);
        }
        if defer {
            return Ok(CancelAck::Pending);
        }
        order.cancelled = true;
        Ok(CancelAck::Cancelled)
    }

    async fn poll_fills(&self) -> Result<Vec<ExecutionReport>, BrokerError> {
        Ok(self.state()?.reports.drain(..).collect())
    }

    async fn reported_positions(&self) -> Result<HashMap<InstrumentId, i64>, BrokerError> {
        Ok(self.state()?.positions.clone())
    }
}
