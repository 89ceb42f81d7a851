//! pfa-portfolio: constraints
//!
//! Post-optimisation verification of a weight vector:
//!   - every weight finite and within `[0, cap]`
//!   - weights sum to 1
//!
//! [`WeightVector::new`] runs these checks, so a constructed `WeightVector`
//! always satisfies them.

use std::collections::BTreeMap;

/// Tolerance on individual weight bounds.
pub const BOUND_TOLERANCE: f64 = 1e-9;

/// Tolerance on `|Σw - 1|`.
pub const SUM_TOLERANCE: f64 = 1e-6;

// ─── ConstraintViolation ──────────────────────────────────────────────────────

/// A single constraint breach detected during validation.
#[derive(Clone, Debug, PartialEq)]
pub enum ConstraintViolation {
    /// Weight is NaN or infinite.
    NonFiniteWeight { symbol: String },
    /// Weight exceeds the per-instrument cap.
    WeightTooLarge {
        symbol: String,
        weight: f64,
        limit: f64,
    },
    /// Weight is negative.
    NegativeWeight { symbol: String, weight: f64 },
    /// Weights do not sum to 1.
    SumNotOne { actual: f64 },
}

impl std::fmt::Display for ConstraintViolation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NonFiniteWeight { symbol } => {
                write!(f, "weight for '{symbol}' is NaN/inf")
            }
            Self::WeightTooLarge {
                symbol,
                weight,
                limit,
            } => {
                write!(
                    f,
                    "weight {weight:.6} for '{symbol}' exceeds cap {limit:.6}"
                )
            }
            Self::NegativeWeight { symbol, weight } => {
                write!(f, "weight {weight:.6} for '{symbol}' is negative")
            }
            Self::SumNotOne { actual } => write!(f, "weights sum to {actual:.9}, not 1"),
        }
    }
}

/// Check `weights` (paired with `symbols`) against `0 <= w <= cap`, Σw = 1.
///
/// Returns every violation found (empty ⇒ all constraints satisfied).
pub fn check_weight_bounds(symbols: &[String], weights: &[f64], cap: f64) -> Vec<ConstraintViolation> {
    let mut violations = Vec::new();

    for (sym, &w) in symbols.iter().zip(weights) {
        if !w.is_finite() {
            violations.push(ConstraintViolation::NonFiniteWeight {
                symbol: sym.clone(),
            });
            continue;
        }
        if w < -BOUND_TOLERANCE {
            violations.push(ConstraintViolation::NegativeWeight {
                symbol: sym.clone(),
                weight: w,
            });
        }
        if w > cap + BOUND_TOLERANCE {
            violations.push(ConstraintViolation::WeightTooLarge {
                symbol: sym.clone(),
                weight: w,
                limit: cap,
            });
        }
    }

    let sum: f64 = weights.iter().sum();
    if !((sum - 1.0).abs() < SUM_TOLERANCE) {
        violations.push(ConstraintViolation::SumNotOne { actual: sum });
    }

    violations
}

// ─── WeightVector ────────────────────────────────────────────────────────────

#[derive(Clone, Debug, PartialEq)]
pub enum WeightVectorError {
    /// No instruments.
    Empty,
    /// `symbols` and `weights` differ in length.
    LengthMismatch { symbols: usize, weights: usize },
    /// The same symbol appears twice.
    DuplicateSymbol { symbol: String },
    Violations(Vec<ConstraintViolation>),
}

impl std::fmt::Display for WeightVectorError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Empty => write!(f, "weight vector must not be empty"),
            Self::LengthMismatch { symbols, weights } => {
                write!(f, "{symbols} symbols but {weights} weights")
            }
            Self::DuplicateSymbol { symbol } => {
                write!(f, "duplicate symbol '{symbol}' in weight vector")
            }
            Self::Violations(v) => {
                let msgs: Vec<String> = v.iter().map(|x| x.to_string()).collect();
                write!(f, "weight vector invalid: {}", msgs.join("; "))
            }
        }
    }
}

impl std::error::Error for WeightVectorError {}

/// One weight per instrument with `0 <= wᵢ <= cap` and `Σwᵢ = 1`.
#[derive(Clone, Debug, PartialEq)]
pub struct WeightVector {
    symbols: Vec<String>,
    weights: Vec<f64>,
    cap: f64,
}

impl WeightVector {
    pub fn new(symbols: Vec<String>, weights: Vec<f64>, cap: f64) -> Result<Self, WeightVectorError> {
        if symbols.is_empty() {
            return Err(WeightVectorError::Empty);
        }
        if symbols.len() != weights.len() {
            return Err(WeightVectorError::LengthMismatch {
                symbols: symbols.len(),
                weights: weights.len(),
            });
        }
        let mut seen = std::collections::BTreeSet::new();
        for s in &symbols {
            if !seen.insert(s.as_str()) {
                return Err(WeightVectorError::DuplicateSymbol { symbol: s.clone() });
            }
        }
        let violations = check_weight_bounds(&symbols, &weights, cap);
        if !violations.is_empty() {
            return Err(WeightVectorError::Violations(violations));
        }
        Ok(Self {
            symbols,
            weights,
            cap,
        })
    }

    pub fn symbols(&self) -> &[String] {
        &self.symbols
    }

    pub fn weights(&self) -> &[f64] {
        &self.weights
    }

    pub fn cap(&self) -> f64 {
        self.cap
    }

    pub fn get(&self, symbol: &str) -> Option<f64> {
        self.symbols
            .iter()
            .position(|s| s == symbol)
            .map(|i| self.weights[i])
    }

    pub fn to_map(&self) -> BTreeMap<String, f64> {
        self.symbols
            .iter()
            .cloned()
            .zip(self.weights.iter().copied())
            .collect()
    }

    /// `wᵀμ`. `mu` is aligned with `symbols()`.
    pub fn expected_return(&self, mu: &[f64]) -> f64 {
        self.weights.iter().zip(mu).map(|(w, m)| w * m).sum()
    }
}

// ─── Tests ────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn syms(n: usize) -> Vec<String> {
        (0..n).map(|i| format!("S{i}")).collect()
    }

    #[test]
    fn valid_vector_accepted() {
        let w = WeightVector::new(syms(3), vec![0.4, 0.35, 0.25], 0.4).unwrap();
        assert_eq!(w.get("S1"), Some(0.35));
        assert_eq!(w.get("X"), None);
        assert!((w.expected_return(&[0.1, 0.2, 0.0]) - 0.11).abs() < 1e-12);
    }

    #[test]
    fn cap_breach_and_sum_reported_together() {
        let v = check_weight_bounds(&syms(2), &[0.7, 0.2], 0.6);
        assert_eq!(v.len(), 2);
        assert!(matches!(v[0], ConstraintViolation::WeightTooLarge { .. }));
        assert!(matches!(v[1], ConstraintViolation::SumNotOne { .. }));
    }

    #[test]
    fn negative_and_nan_rejected() {
        let err = WeightVector::new(syms(2), vec![-0.1, 1.1], 1.0).unwrap_err();
        assert!(matches!(err, WeightVectorError::Violations(_)));
        let v = check_weight_bounds(&syms(2), &[f64::NAN, 1.0], 1.0);
        assert!(v.iter().any(|x| matches!(x, ConstraintViolation::NonFiniteWeight { .. })));
        assert!(v.iter().any(|x| matches!(x, ConstraintViolation::SumNotOne { .. })));
    }

    #[test]
    fn tolerances_absorb_rounding() {
        assert!(WeightVector::new(syms(2), vec![0.5 + 1e-10, 0.5 - 1e-10], 0.5).is_ok());
        assert!(WeightVector::new(syms(2), vec![0.5, 0.5 + 2e-6], 1.0).is_err());
    }

    #[test]
    fn structural_errors() {
        assert_eq!(
            WeightVector::new(vec![], vec![], 1.0).unwrap_err(),
            WeightVectorError::Empty
        );
        assert!(matches!(
            WeightVector::new(syms(2), vec![1.0], 1.0).unwrap_err(),
            WeightVectorError::LengthMismatch { .. }
        ));
        assert!(matches!(
            WeightVector::new(vec!["A".into(), "A".into()], vec![0.5, 0.5], 1.0).unwrap_err(),
            WeightVectorError::DuplicateSymbol { .. }
        ));
    }
}
