//! Checked logarithm and exponential with a clamp policy for the weight update.
//!
//! Particle weights routinely leave the normal floating point range: a log-weight of −900 is
//! perfectly meaningful but `exp(−900)` is zero, and `ln(0)` is −∞ which then poisons every
//! following step. The functions here report such cases as [`Checked::Underflow`] or
//! [`Checked::Overflow`] instead of producing zeros, subnormals or infinities, and
//! [`update_weight`] substitutes the clamp values below. Every substitution is counted in a
//! [`StabilizationReport`] and logged at `debug` level; none of them are errors.
//!
//! | Event          | Substituted value                |
//! |----------------|----------------------------------|
//! | ln underflow   | `ln(f64::MIN_POSITIVE)` ≈ −708.4 |
//! | ln overflow    | `ln(f64::MAX)` ≈ 709.8           |
//! | exp underflow  | `f64::MIN_POSITIVE`              |
//! | exp overflow   | `f64::MAX`                       |

use log::debug;
use serde::{Deserialize, Serialize};

/// Natural log of the smallest positive normal `f64`.
pub const LN_MIN_POSITIVE: f64 = -708.396_418_532_264_1;
/// Natural log of the largest finite `f64`.
pub const LN_MAX: f64 = 709.782_712_893_384;

/// Outcome of a range-checked elementary function.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Checked {
    Value(f64),
    Underflow,
    Overflow,
}

impl Checked {
    /// Resolve to a number, substituting `underflow` or `overflow` for the out-of-range cases.
    pub fn or_clamp(self, underflow: f64, overflow: f64) -> f64 {
        match self {
            Checked::Value(v) => v,
            Checked::Underflow => underflow,
            Checked::Overflow => overflow,
        }
    }
}

/// Natural logarithm with range reporting.
///
/// Inputs below the smallest positive normal number (zero, subnormals, negatives) and NaN are an
/// underflow. `+∞` is an overflow.
pub fn checked_ln(x: f64) -> Checked {
    if x.is_nan() || x < f64::MIN_POSITIVE {
        Checked::Underflow
    } else if x.is_infinite() {
        Checked::Overflow
    } else {
        Checked::Value(x.ln())
    }
}

/// Exponential with range reporting.
///
/// Arguments that would produce a subnormal or zero result (and NaN) are an underflow; arguments
/// that would produce a non-finite result are an overflow.
pub fn checked_exp(x: f64) -> Checked {
    if x.is_nan() || x < LN_MIN_POSITIVE {
        return Checked::Underflow;
    }
    if x > LN_MAX {
        return Checked::Overflow;
    }
    let v = x.exp();
    if !v.is_finite() {
        Checked::Overflow
    } else if v < f64::MIN_POSITIVE {
        Checked::Underflow
    } else {
        Checked::Value(v)
    }
}

/// Counts of clamp substitutions made during a run.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StabilizationReport {
    pub log_underflows: usize,
    pub log_overflows: usize,
    pub exp_underflows: usize,
    pub exp_overflows: usize,
}

impl StabilizationReport {
    pub fn total(&self) -> usize {
        self.log_underflows + self.log_overflows + self.exp_underflows + self.exp_overflows
    }

    pub fn is_clean(&self) -> bool {
        self.total() == 0
    }

    pub fn merge(&mut self, other: &StabilizationReport) {
        self.log_underflows += other.log_underflows;
        self.log_overflows += other.log_overflows;
        self.exp_underflows += other.exp_underflows;
        self.exp_overflows += other.exp_overflows;
    }
}

/// Result of folding one particle's densities into its weight.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct WeightUpdate {
    /// Unnormalized weight, always finite and at least `f64::MIN_POSITIVE`
    pub weight: f64,
    /// Log-weight before exponentiation
    pub log_weight: f64,
    /// Substitutions made while computing this update
    pub report: StabilizationReport,
}

/// Fold one step of the importance weight recursion in the log domain.
///
/// `ln w = ln w_prev + ln p_meas + ln p_proc − ln p_imp`, then `w = exp(ln w)`, with the clamp
/// policy applied to both the logarithm of the previous weight and the final exponential.
pub fn update_weight(previous_weight: f64, log_meas: f64, log_proc: f64, log_imp: f64) -> WeightUpdate {
    let mut report = StabilizationReport::default();

    let ln_checked = checked_ln(previous_weight);
    match ln_checked {
        Checked::Value(_) => {}
        Checked::Underflow => {
            debug!("ln underflow on previous weight {previous_weight:e}, clamped to {LN_MIN_POSITIVE}");
            report.log_underflows += 1;
        }
        Checked::Overflow => {
            debug!("ln overflow on previous weight {previous_weight:e}, clamped to {LN_MAX}");
            report.log_overflows += 1;
        }
    }
    let ln_previous = ln_checked.or_clamp(LN_MIN_POSITIVE, LN_MAX);

    let log_weight = ln_previous + log_meas + log_proc - log_imp;

    let exp_checked = checked_exp(log_weight);
    match exp_checked {
        Checked::Value(_) => {}
        Checked::Underflow => {
            debug!("exp underflow on log-weight {log_weight}, clamped to f64::MIN_POSITIVE");
            report.exp_underflows += 1;
        }
        Checked::Overflow => {
            debug!("exp overflow on log-weight {log_weight}, clamped to f64::MAX");
            report.exp_overflows += 1;
        }
    }
    let weight = exp_checked.or_clamp(f64::MIN_POSITIVE, f64::MAX);

    WeightUpdate {
        weight,
        log_weight,
        report,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_approx_eq::assert_approx_eq;

    #[test]
    fn test_constants_match_float_limits() {
        assert_approx_eq!(LN_MIN_POSITIVE, f64::MIN_POSITIVE.ln(), 1e-12);
        assert_approx_eq!(LN_MAX, f64::MAX.ln(), 1e-12);
    }

    #[test]
    fn test_checked_ln() {
        assert_eq!(checked_ln(0.0), Checked::Underflow);
        assert_eq!(checked_ln(-1.0), Checked::Underflow);
        assert_eq!(checked_ln(f64::NAN), Checked::Underflow);
        assert_eq!(checked_ln(f64::MIN_POSITIVE / 4.0), Checked::Underflow);
        assert_eq!(checked_ln(f64::INFINITY), Checked::Overflow);
        assert_eq!(checked_ln(1.0), Checked::Value(0.0));
        assert!(matches!(checked_ln(f64::MIN_POSITIVE), Checked::Value(_)));
    }

    #[test]
    fn test_checked_exp() {
        assert_eq!(checked_exp(-800.0), Checked::Underflow);
        assert_eq!(checked_exp(f64::NAN), Checked::Underflow);
        assert_eq!(checked_exp(f64::NEG_INFINITY), Checked::Underflow);
        assert_eq!(checked_exp(800.0), Checked::Overflow);
        assert_eq!(checked_exp(f64::INFINITY), Checked::Overflow);
        assert_eq!(checked_exp(0.0), Checked::Value(1.0));
    }

    #[test]
    fn test_or_clamp() {
        assert_eq!(checked_exp(-800.0).or_clamp(f64::MIN_POSITIVE, f64::MAX), f64::MIN_POSITIVE);
        assert_eq!(checked_exp(800.0).or_clamp(f64::MIN_POSITIVE, f64::MAX), f64::MAX);
        assert_eq!(checked_ln(0.0).or_clamp(LN_MIN_POSITIVE, LN_MAX), LN_MIN_POSITIVE);
        assert_approx_eq!(checked_ln(std::f64::consts::E).or_clamp(LN_MIN_POSITIVE, LN_MAX), 1.0, 1e-15);
    }

    #[test]
    fn test_update_weight_ln_overflow() {
        let update = update_weight(f64::INFINITY, 0.0, 0.0, 0.0);
        assert_eq!(update.report.log_overflows, 1);
        assert_approx_eq!(update.log_weight, LN_MAX, 1e-12);
        // exp(LN_MAX) rounds to just under f64::MAX or overflows; either way the weight is finite
        assert!(update.weight.is_finite());
    }

    #[test]
    fn test_update_weight_in_range() {
        let update = update_weight(0.5, -1.0, -2.0, -3.5);
        assert_approx_eq!(update.log_weight, 0.5f64.ln() + 0.5, 1e-14);
        assert_approx_eq!(update.weight, 0.5 * 0.5f64.exp(), 1e-14);
        assert!(update.report.is_clean());
    }

    #[test]
    fn test_update_weight_exp_underflow() {
        let update = update_weight(0.5, -700.0, -20.0, 5.0);
        assert_eq!(update.weight, f64::MIN_POSITIVE);
        assert_eq!(update.report.exp_underflows, 1);
        assert_eq!(update.report.total(), 1);
    }

    #[test]
    fn test_update_weight_exp_overflow() {
        let update = update_weight(1.0, 500.0, 400.0, -10.0);
        assert_eq!(update.weight, f64::MAX);
        assert_eq!(update.report.exp_overflows, 1);
    }

    #[test]
    fn test_update_weight_zero_previous() {
        // ln(0) clamps to LN_MIN_POSITIVE, then the sum underflows again
        let update = update_weight(0.0, -1.0, 0.0, 0.0);
        assert_eq!(update.report.log_underflows, 1);
        assert_eq!(update.report.exp_underflows, 1);
        assert_eq!(update.weight, f64::MIN_POSITIVE);
        assert!(update.log_weight.is_finite());
    }

    #[test]
    fn test_update_weight_nan_density() {
        let update = update_weight(0.5, f64::NAN, 0.0, 0.0);
        assert_eq!(update.weight, f64::MIN_POSITIVE);
        assert_eq!(update.report.exp_underflows, 1);
    }

    #[test]
    fn test_report_merge() {
        let mut total = StabilizationReport::default();
        total.merge(&update_weight(0.0, 0.0, 0.0, 0.0).report);
        total.merge(&update_weight(1.0, 1000.0, 0.0, 0.0).report);
        assert_eq!(total.log_underflows, 1);
        assert_eq!(total.exp_overflows, 1);
        assert_eq!(total.total(), 2);
        assert!(!total.is_clean());
    }
}
