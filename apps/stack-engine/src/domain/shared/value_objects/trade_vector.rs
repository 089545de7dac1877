//! Signed per-leg quantities for requested trades and executed fills.
//!
//! A single-contract trade has one leg. Spread and roll trades have one leg
//! per contract. Fills are tracked with the same shape as the trade they
//! belong to.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::domain::shared::errors::FillBoundError;

/// Signed quantity per leg.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TradeVector(Vec<i64>);

impl TradeVector {
    /// Create a vector from leg quantities.
    #[must_use]
    pub const fn new(legs: Vec<i64>) -> Self {
        Self(legs)
    }

    /// A single-leg vector.
    #[must_use]
    pub fn single(qty: i64) -> Self {
        Self(vec![qty])
    }

    /// An all-zero vector with `legs` legs.
    #[must_use]
    pub fn zeros(legs: usize) -> Self {
        Self(vec![0; legs])
    }

    /// Leg quantities.
    #[must_use]
    pub fn legs(&self) -> &[i64] {
        &self.0
    }

    /// Number of legs.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether there are no legs.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Whether every leg is zero.
    #[must_use]
    pub fn is_zero(&self) -> bool {
        self.0.iter().all(|q| *q == 0)
    }

    /// Sum of absolute leg quantities.
    #[must_use]
    pub fn total_abs(&self) -> i64 {
        self.0.iter().map(|q| q.abs()).sum()
    }

    /// Net signed quantity across legs.
    #[must_use]
    pub fn net(&self) -> i64 {
        self.0.iter().sum()
    }

    /// Component-wise sum. Shorter vectors are treated as zero-padded.
    #[must_use]
    pub fn add(&self, other: &Self) -> Self {
        let len = self.len().max(other.len());
        Self(
            (0..len)
                .map(|i| self.0.get(i).copied().unwrap_or(0) + other.0.get(i).copied().unwrap_or(0))
                .collect(),
        )
    }

    /// Quantity still open against `fill`, per leg.
    #[must_use]
    pub fn remaining(&self, fill: &Self) -> Self {
        Self(
            self.0
                .iter()
                .enumerate()
                .map(|(i, q)| q - fill.0.get(i).copied().unwrap_or(0))
                .collect(),
        )
    }

    /// Whether `fill` covers the whole trade.
    #[must_use]
    pub fn is_filled_by(&self, fill: &Self) -> bool {
        self.len() == fill.len() && self.0.iter().zip(&fill.0).all(|(t, f)| t == f)
    }

    /// Check that `fill` respects this trade: same shape, same sign and no
    /// larger in magnitude on every leg.
    pub fn check_fill(&self, fill: &Self) -> Result<(), FillBoundError> {
        if fill.len() != self.len() {
            return Err(FillBoundError::ShapeMismatch {
                expected: self.len(),
                actual: fill.len(),
            });
        }
        for (leg, (trade, filled)) in self.0.iter().zip(&fill.0).enumerate() {
            if *filled == 0 {
                continue;
            }
            if trade.signum() != filled.signum() {
                return Err(FillBoundError::WrongSign {
                    leg,
                    trade: *trade,
                    fill: *filled,
                });
            }
            if filled.abs() > trade.abs() {
                return Err(FillBoundError::Exceeds {
                    leg,
                    trade: *trade,
                    fill: *filled,
                });
            }
        }
        Ok(())
    }

    /// Clamp `fill` into the bounds of this trade, leg by leg.
    ///
    /// Wrong-signed legs clamp to zero, oversized legs clamp to the trade.
    #[must_use]
    pub fn clamp_fill(&self, fill: &Self) -> Self {
        Self(
            self.0
                .iter()
                .enumerate()
                .map(|(i, trade)| {
                    let filled = fill.0.get(i).copied().unwrap_or(0);
                    if filled == 0 || trade.signum() != filled.signum() {
                        0
                    } else if filled.abs() > trade.abs() {
                        *trade
                    } else {
                        filled
                    }
                })
                .collect(),
        )
    }
}

impl From<Vec<i64>> for TradeVector {
    fn from(value: Vec<i64>) -> Self {
        Self(value)
    }
}

impl fmt::Display for TradeVector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[")?;
        for (i, q) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{q}")?;
        }
        write!(f, "]")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn remaining_after_partial_fill() {
        let trade = TradeVector::single(10);
        let fill = TradeVector::single(6);
        assert_eq!(trade.remaining(&fill), TradeVector::single(4));
        assert!(!trade.is_filled_by(&fill));
        assert!(trade.is_filled_by(&TradeVector::single(10)));
    }

    #[test]
    fn check_fill_rejects_overfill() {
        let trade = TradeVector::single(-5);
        assert!(trade.check_fill(&TradeVector::single(-5)).is_ok());
        assert!(matches!(
            trade.check_fill(&TradeVector::single(-6)),
            Err(FillBoundError::Exceeds { leg: 0, .. })
        ));
    }

    #[test]
    fn check_fill_rejects_wrong_sign_and_shape() {
        let trade = TradeVector::new(vec![-3, 3]);
        assert!(matches!(
            trade.check_fill(&TradeVector::new(vec![1, 0])),
            Err(FillBoundError::WrongSign { leg: 0, .. })
        ));
        assert!(matches!(
            trade.check_fill(&TradeVector::single(-3)),
            Err(FillBoundError::ShapeMismatch { expected: 2, actual: 1 })
        ));
    }

    #[test]
    fn clamp_fill_caps_each_leg() {
        let trade = TradeVector::new(vec![-3, 3]);
        let clamped = trade.clamp_fill(&TradeVector::new(vec![-7, -1]));
        assert_eq!(clamped, TradeVector::new(vec![-3, 0]));
    }

    #[test]
    fn net_and_total_for_roll_legs() {
        let roll = TradeVector::new(vec![-4, 4]);
        assert_eq!(roll.net(), 0);
        assert_eq!(roll.total_abs(), 8);
        assert!(!roll.is_zero());
        assert!(TradeVector::zeros(2).is_zero());
    }

    #[test]
    fn add_pads_shorter_vector() {
        let a = TradeVector::new(vec![1, 2]);
        let b = TradeVector::single(3);
        assert_eq!(a.add(&b), TradeVector::new(vec![4, 2]));
        assert_eq!(format!("{a}"), "[1, 2]");
    }
}
