//! Log-space semirings for scoring derivations.
//!
//! Every score in the parser is a natural-log probability. Semirings give the
//! algebra for combining them:
//! - Viterbi (max, +) picks the best derivation of an item
//! - LogInside (logsumexp, +) accumulates the inside mass of all derivations
//!
//! A probability of zero is `LOG_OF_ZERO` (negative infinity). Callers treat
//! it as "cannot transition", never as an error.

use ordered_float::OrderedFloat;
use std::fmt::Debug;
use std::ops::{Add, Mul};

/// Log of a zero probability.
pub const LOG_OF_ZERO: f64 = f64::NEG_INFINITY;

/// Log of probability one.
pub const LOG_OF_ONE: f64 = 0.0;

/// A semiring provides addition (aggregation) and multiplication (combination) operations.
pub trait Semiring: Clone + Debug + PartialEq + Add<Output = Self> + Mul<Output = Self> {
    /// The additive identity (zero element).
    fn zero() -> Self;

    /// The multiplicative identity (one element).
    fn one() -> Self;

    /// Lift a log probability into the semiring.
    fn from_log_prob(log_prob: f64) -> Self;

    /// The log probability carried by this value.
    fn log_prob(&self) -> f64;

    /// Check if this value is the zero element.
    fn is_zero(&self) -> bool {
        self.log_prob() == LOG_OF_ZERO
    }

    /// Check if two values are approximately equal.
    fn approx_eq(&self, other: &Self) -> bool {
        let (a, b) = (self.log_prob(), other.log_prob());
        a == b || (a - b).abs() < 1e-10
    }
}

/// Numerically stable `ln(exp(a) + exp(b))`.
///
/// `LOG_OF_ZERO` is the identity, so the result is never NaN for
/// log-probability inputs.
pub fn log_add(a: f64, b: f64) -> f64 {
    if a == LOG_OF_ZERO {
        return b;
    }
    if b == LOG_OF_ZERO {
        return a;
    }
    let (hi, lo) = if a >= b { (a, b) } else { (b, a) };
    hi + (lo - hi).exp().ln_1p()
}

/// Viterbi semiring over log probabilities: max and +.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Viterbi(pub OrderedFloat<f64>);

impl Viterbi {
    pub fn new(log_prob: f64) -> Self {
        Viterbi(OrderedFloat(log_prob))
    }

    pub fn value(&self) -> f64 {
        self.0.into_inner()
    }
}

impl Semiring for Viterbi {
    fn zero() -> Self {
        Viterbi::new(LOG_OF_ZERO)
    }

    fn one() -> Self {
        Viterbi::new(LOG_OF_ONE)
    }

    fn from_log_prob(log_prob: f64) -> Self {
        Viterbi::new(log_prob)
    }

    fn log_prob(&self) -> f64 {
        self.value()
    }
}

impl Add for Viterbi {
    type Output = Self;

    fn add(self, other: Self) -> Self {
        Viterbi(self.0.max(other.0))
    }
}

impl Mul for Viterbi {
    type Output = Self;

    fn mul(self, other: Self) -> Self {
        Viterbi::new(self.value() + other.value())
    }
}

/// Inside (sum-product) semiring over log probabilities: logsumexp and +.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct LogInside(pub f64);

impl LogInside {
    pub fn new(log_prob: f64) -> Self {
        LogInside(log_prob)
    }

    pub fn value(&self) -> f64 {
        self.0
    }
}

impl Semiring for LogInside {
    fn zero() -> Self {
        LogInside(LOG_OF_ZERO)
    }

    fn one() -> Self {
        LogInside(LOG_OF_ONE)
    }

    fn from_log_prob(log_prob: f64) -> Self {
        LogInside(log_prob)
    }

    fn log_prob(&self) -> f64 {
        self.0
    }
}

impl Add for LogInside {
    type Output = Self;

    fn add(self, other: Self) -> Self {
        LogInside(log_add(self.0, other.0))
    }
}

impl Mul for LogInside {
    type Output = Self;

    fn mul(self, other: Self) -> Self {
        LogInside(self.0 + other.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_viterbi_semiring() {
        let a = Viterbi::new(0.3f64.ln());
        let b = Viterbi::new(0.5f64.ln());

        // max(0.3, 0.5) = 0.5
        assert_eq!(a + b, b);
        // 0.3 * 0.5 = 0.15
        assert!(((a * b).value() - 0.15f64.ln()).abs() < 1e-10);

        // Identity elements
        assert_eq!(a + Viterbi::zero(), a);
        assert_eq!(a * Viterbi::one(), a);
        assert!(Viterbi::zero().is_zero());
    }

    #[test]
    fn test_log_inside_semiring() {
        let a = LogInside::new(0.25f64.ln());
        let b = LogInside::new(0.5f64.ln());

        assert!((a + b).approx_eq(&LogInside::new(0.75f64.ln())));
        assert!((a * b).approx_eq(&LogInside::new(0.125f64.ln())));
        assert!((a + LogInside::zero()).approx_eq(&a));
        assert!((a * LogInside::one()).approx_eq(&a));
    }

    #[test]
    fn test_log_add_zero_is_identity() {
        assert_eq!(log_add(LOG_OF_ZERO, -2.0), -2.0);
        assert_eq!(log_add(-2.0, LOG_OF_ZERO), -2.0);
        assert_eq!(log_add(LOG_OF_ZERO, LOG_OF_ZERO), LOG_OF_ZERO);
    }

    #[test]
    fn test_log_add_is_stable_for_tiny_values() {
        let x = log_add(-1000.0, -1000.0);
        assert!((x - (-1000.0 + 2f64.ln())).abs() < 1e-9);
        assert!(!x.is_nan());
    }
}
