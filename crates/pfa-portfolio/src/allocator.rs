//! pfa-portfolio: allocator
//!
//! Converts continuous target weights into whole-share positions.
//!
//! Responsibilities (pure, no IO, no clock):
//! - Exclude instruments in their post-sale cooling period.
//! - Floor allocation: `min(max_risk_shares, max_allocation_shares)` shares.
//! - Greedy refinement: spend leftover capital one share at a time on the
//!   instrument whose next share brings its position closest to target. A
//!   share is only bought if it moves the position nearer its target, and
//!   no position may exceed `position_cap × available_capital`.
//! - Delta against current holdings: BUY the difference or HOLD.
//!
//! The refinement is a bounded heuristic, not an optimal knapsack solution.
//! Its tie-breaks and round budget are part of the observable behaviour.

use std::collections::{BTreeMap, BTreeSet};

use chrono::NaiveDate;
use pfa_risk::{floor_shares, PositionLimit};
use pfa_schemas::{Action, SoldRecord};

/// Efficiency scores closer than this are a tie.
const EFFICIENCY_TIE: f64 = 1e-12;

// ─── Error ───────────────────────────────────────────────────────────────────

#[derive(Clone, Debug, PartialEq)]
pub enum AllocationError {
    /// Available capital is negative or non-finite.
    InvalidCapital(f64),
    EmptySymbol,
    DuplicateSymbol { symbol: String },
    /// Price is zero, negative or non-finite.
    InvalidPrice { symbol: String },
    /// Weight is negative or non-finite.
    InvalidWeight { symbol: String },
}

impl std::fmt::Display for AllocationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidCapital(c) => write!(f, "available capital must be finite and >= 0, got {c}"),
            Self::EmptySymbol => write!(f, "candidate symbol must not be empty"),
            Self::DuplicateSymbol { symbol } => write!(f, "duplicate candidate '{symbol}'"),
            Self::InvalidPrice { symbol } => write!(f, "invalid price for '{symbol}'"),
            Self::InvalidWeight { symbol } => write!(f, "invalid weight for '{symbol}'"),
        }
    }
}

impl std::error::Error for AllocationError {}

// ─── Cooling ─────────────────────────────────────────────────────────────────

/// Symbols whose latest sale is fewer than `cooling_period_days` days before
/// `as_of`. A sale dated after `as_of` also cools. A zero-day period
/// disables cooling.
pub fn cooling_symbols(
    sold: &[SoldRecord],
    as_of: NaiveDate,
    cooling_period_days: u32,
) -> BTreeSet<String> {
    if cooling_period_days == 0 {
        return BTreeSet::new();
    }
    let mut latest: BTreeMap<&str, NaiveDate> = BTreeMap::new();
    for r in sold {
        let e = latest.entry(r.symbol.as_str()).or_insert(r.sale_date);
        if r.sale_date > *e {
            *e = r.sale_date;
        }
    }
    latest
        .into_iter()
        .filter(|(_, d)| (as_of - *d).num_days() < i64::from(cooling_period_days))
        .map(|(s, _)| s.to_string())
        .collect()
}

// ─── Candidate ───────────────────────────────────────────────────────────────

/// One priced instrument offered to the allocator.
#[derive(Clone, Debug, PartialEq)]
pub struct AllocationCandidate {
    pub symbol: String,
    pub price: f64,
    pub weight: f64,
    pub limit: PositionLimit,
    pub current_shares: u64,
    pub cooling: bool,
}

// ─── Decision ────────────────────────────────────────────────────────────────

#[derive(Clone, Debug, PartialEq)]
pub struct AllocationLine {
    pub symbol: String,
    pub action: Action,
    pub current_shares: u64,
    /// Shares from the floor allocation.
    pub base_shares: u64,
    /// Shares added by greedy refinement.
    pub refined_shares: u64,
    /// Target total position. Equals `current_shares` when cooling.
    pub final_shares: u64,
    pub shares_delta: u64,
}

#[derive(Clone, Debug, PartialEq)]
pub struct AllocationDecision {
    /// Same order as the candidates.
    pub lines: Vec<AllocationLine>,
    /// `available_capital - Σ final_shares × price` over non-cooling lines.
    pub remaining_capital: f64,
    pub rounds_used: u32,
    /// No non-cooling instrument with positive weight costs <= available
    /// capital.
    pub capital_exhausted: bool,
}

impl AllocationDecision {
    pub fn line(&self, symbol: &str) -> Option<&AllocationLine> {
        self.lines.iter().find(|l| l.symbol == symbol)
    }
}

// ─── CapitalAllocator ────────────────────────────────────────────────────────

/// Floor-then-greedy share allocator.
#[derive(Clone, Debug, PartialEq)]
pub struct CapitalAllocator {
    max_rounds: u32,
    position_cap: f64,
}

impl CapitalAllocator {
    pub const DEFAULT_MAX_ROUNDS: u32 = 20;

    /// `max_rounds` bounds the greedy refinement (one share per round).
    /// No position cap beyond the whole of available capital.
    pub fn new(max_rounds: u32) -> Self {
        Self {
            max_rounds,
            position_cap: 1.0,
        }
    }

    /// Largest fraction of available capital one refined position may hold.
    /// Values outside `(0, 1]` fall back to 1.
    pub fn with_position_cap(mut self, cap: f64) -> Self {
        self.position_cap = if cap.is_finite() && cap > 0.0 && cap <= 1.0 {
            cap
        } else {
            1.0
        };
        self
    }

    pub fn max_rounds(&self) -> u32 {
        self.max_rounds
    }

    pub fn position_cap(&self) -> f64 {
        self.position_cap
    }

    pub fn allocate(
        &self,
        candidates: &[AllocationCandidate],
        available_capital: f64,
    ) -> Result<AllocationDecision, AllocationError> {
        // ── 0. Guard inputs ──────────────────────────────────────────────────
        if !available_capital.is_finite() || available_capital < 0.0 {
            return Err(AllocationError::InvalidCapital(available_capital));
        }
        let mut seen = BTreeSet::new();
        for c in candidates {
            if c.symbol.is_empty() {
                return Err(AllocationError::EmptySymbol);
            }
            if !seen.insert(c.symbol.as_str()) {
                return Err(AllocationError::DuplicateSymbol {
                    symbol: c.symbol.clone(),
                });
            }
            if !c.price.is_finite() || c.price <= 0.0 {
                return Err(AllocationError::InvalidPrice {
                    symbol: c.symbol.clone(),
                });
            }
            if !c.weight.is_finite() || c.weight < 0.0 {
                return Err(AllocationError::InvalidWeight {
                    symbol: c.symbol.clone(),
                });
            }
        }

        // ── 1. Floor allocation (cooling instruments excluded) ───────────────
        let mut shares: Vec<u64> = candidates
            .iter()
            .map(|c| if c.cooling { 0 } else { c.limit.ceiling() })
            .collect();
        let mut remaining = available_capital
            - candidates
                .iter()
                .zip(&shares)
                .map(|(c, &s)| s as f64 * c.price)
                .sum::<f64>();

        // The floor guard can round a share count up by a hair; give back
        // shares from the end until the floor fits the capital.
        let mut idx = shares.len();
        while remaining < 0.0 && idx > 0 {
            let i = idx - 1;
            if shares[i] == 0 {
                idx -= 1;
                continue;
            }
            shares[i] -= 1;
            remaining += candidates[i].price;
        }
        let base = shares.clone();

        // ── 2. Greedy refinement ─────────────────────────────────────────────
        let mut rounds_used = 0;
        while remaining > 0.0 && rounds_used < self.max_rounds {
            match self.best_increment(candidates, &shares, remaining, available_capital) {
                Some(i) => {
                    shares[i] += 1;
                    remaining -= candidates[i].price;
                    rounds_used += 1;
                }
                None => break,
            }
        }

        // ── 3. Deltas ────────────────────────────────────────────────────────
        let lines = candidates
            .iter()
            .enumerate()
            .map(|(i, c)| {
                if c.cooling {
                    return AllocationLine {
                        symbol: c.symbol.clone(),
                        action: Action::NoActionCooling,
                        current_shares: c.current_shares,
                        base_shares: 0,
                        refined_shares: 0,
                        final_shares: c.current_shares,
                        shares_delta: 0,
                    };
                }
                let final_shares = shares[i];
                let action = if final_shares <= c.current_shares {
                    Action::Hold
                } else {
                    Action::Buy
                };
                AllocationLine {
                    symbol: c.symbol.clone(),
                    action,
                    current_shares: c.current_shares,
                    base_shares: base[i],
                    refined_shares: final_shares - base[i],
                    final_shares,
                    shares_delta: final_shares.saturating_sub(c.current_shares),
                }
            })
            .collect();

        let eligible: Vec<&AllocationCandidate> = candidates
            .iter()
            .filter(|c| !c.cooling && c.weight > 0.0)
            .collect();
        let capital_exhausted =
            !eligible.is_empty() && eligible.iter().all(|c| c.price > available_capital);

        Ok(AllocationDecision {
            lines,
            remaining_capital: remaining,
            rounds_used,
            capital_exhausted,
        })
    }

    /// Index of the instrument whose next share scores best, if any is
    /// eligible.
    fn best_increment(
        &self,
        candidates: &[AllocationCandidate],
        shares: &[u64],
        remaining: f64,
        available_capital: f64,
    ) -> Option<usize> {
        let mut best: Option<(usize, f64, f64)> = None;

        for (i, c) in candidates.iter().enumerate() {
            if c.cooling || c.price > remaining {
                continue;
            }
            let ceiling = c
                .limit
                .max_risk_shares
                .min(floor_shares(available_capital * self.position_cap / c.price));
            if shares[i] + 1 > ceiling {
                continue;
            }
            let target = available_capital * c.weight;
            if target <= 0.0 {
                continue;
            }
            let investment = shares[i] as f64 * c.price;
            let new_investment = investment + c.price;
            let gap = (new_investment - target).abs();
            if gap >= (investment - target).abs() {
                continue;
            }
            let proximity = 1.0 - gap / target;
            let efficiency = c.weight * proximity;
            if !(efficiency > 0.0) {
                continue;
            }
            let remaining_weight = c.weight - shares[i] as f64 * c.price / available_capital;

            let better = match best {
                None => true,
                Some((_, best_eff, best_rw)) => {
                    if efficiency > best_eff + EFFICIENCY_TIE {
                        true
                    } else if efficiency >= best_eff - EFFICIENCY_TIE {
                        // Tie: larger remaining weight wins, then earlier index.
                        remaining_weight > best_rw
                    } else {
                        false
                    }
                }
            };
            if better {
                best = Some((i, efficiency, remaining_weight));
            }
        }

        best.map(|(i, _, _)| i)
    }
}

impl Default for CapitalAllocator {
    fn default() -> Self {
        Self::new(Self::DEFAULT_MAX_ROUNDS)
    }
}

// ─── Tests ────────────────────────────────────────────────────────────────────
