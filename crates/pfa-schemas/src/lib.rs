//! pfa-schemas
//!
//! Cross-crate data contracts for the allocation engine: market bars in,
//! recommendation records and a portfolio summary out. Plain structured
//! records; no behaviour beyond small accessors.

use chrono::NaiveDate;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// One normalised OHLCV bar. Prices are positive floats in the instrument's
/// quote currency; `end_ts` is the bar close as UTC epoch seconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OhlcBar {
    pub end_ts: i64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

impl OhlcBar {
    pub fn new(end_ts: i64, open: f64, high: f64, low: f64, close: f64, volume: f64) -> Self {
        Self {
            end_ts,
            open,
            high,
            low,
            close,
            volume,
        }
    }
}

/// Current position in one instrument, as read from the holdings ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Holding {
    pub symbol: String,
    pub shares: u64,
}

/// One entry of the sold-instrument ledger.
///
/// `sale_price` is the total proceeds of the sale (added to available
/// capital); `sale_date` starts the cooling period for `symbol`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SoldRecord {
    pub symbol: String,
    pub sale_price: f64,
    pub sale_date: NaiveDate,
}

/// Recommended action for one instrument in one cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Action {
    Buy,
    Hold,
    NoActionCooling,
}

impl Action {
    pub fn as_str(&self) -> &'static str {
        match self {
            Action::Buy => "BUY",
            Action::Hold => "HOLD",
            Action::NoActionCooling => "NO_ACTION_COOLING",
        }
    }
}

impl std::fmt::Display for Action {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why an instrument's estimates were replaced by documented defaults.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DegradedReason {
    /// Fewer than two daily returns: expected return 0, default volatility.
    InsufficientReturns { have: usize },
    /// Fewer bars than the ATR window: synthetic ATR = price * 0.02.
    InsufficientAtrWindow { have: usize, need: usize },
    /// ATR came out non-finite or non-positive: synthetic ATR used.
    InvalidAtr,
    /// A close price in the series was non-finite or non-positive.
    InvalidPriceSeries,
    /// Return statistics came out non-finite.
    NonFiniteStatistic,
    /// No usable current price: instrument excluded from allocation.
    MissingPrice,
}

impl std::fmt::Display for DegradedReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InsufficientReturns { have } => {
                write!(f, "insufficient returns (have {have}, need 2)")
            }
            Self::InsufficientAtrWindow { have, need } => {
                write!(f, "insufficient ATR window (have {have}, need {need})")
            }
            Self::InvalidAtr => write!(f, "ATR non-finite or non-positive"),
            Self::InvalidPriceSeries => write!(f, "price series contains invalid closes"),
            Self::NonFiniteStatistic => write!(f, "return statistics non-finite"),
            Self::MissingPrice => write!(f, "no usable current price"),
        }
    }
}

/// A derived number that may be unavailable (e.g. Sharpe with zero
/// volatility). Serialises as a JSON number or the string `"N/A"`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Metric {
    Value(f64),
    NotAvailable,
}

impl Metric {
    /// Wraps `v`, mapping non-finite values to `NotAvailable`.
    pub fn from_f64(v: f64) -> Self {
        if v.is_finite() {
            Metric::Value(v)
        } else {
            Metric::NotAvailable
        }
    }

    pub fn value(&self) -> Option<f64> {
        match self {
            Metric::Value(v) => Some(*v),
            Metric::NotAvailable => None,
        }
    }

    pub fn is_available(&self) -> bool {
        matches!(self, Metric::Value(_))
    }
}

impl std::fmt::Display for Metric {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Metric::Value(v) => write!(f, "{v:.4}"),
            Metric::NotAvailable => f.write_str("N/A"),
        }
    }
}

impl Serialize for Metric {
    fn serialize<S: Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
        match self {
            Metric::Value(v) => s.serialize_f64(*v),
            Metric::NotAvailable => s.serialize_str("N/A"),
        }
    }
}

impl<'de> Deserialize<'de> for Metric {
    fn deserialize<D: Deserializer<'de>>(d: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Num(f64),
            Text(String),
        }

        match Raw::deserialize(d)? {
            Raw::Num(v) => Ok(Metric::from_f64(v)),
            Raw::Text(t) if t == "N/A" => Ok(Metric::NotAvailable),
            Raw::Text(t) => Err(serde::de::Error::custom(format!(
                "expected number or \"N/A\", got \"{t}\""
            ))),
        }
    }
}

/// Final per-instrument output of one cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Recommendation {
    pub symbol: String,
    pub action: Action,
    /// Shares held before this cycle.
    pub current_shares: u64,
    /// Target total position after the recommended purchase.
    pub final_shares: u64,
    /// Shares to additionally buy (never negative).
    pub shares_delta: u64,
    pub price: f64,
    /// Accepted optimizer weight for this instrument.
    pub weight: f64,
    pub stop_loss_price: f64,
    pub max_risk_amount: f64,
    pub expected_annual_gain: f64,
    /// Stop price had to be clamped to the positive epsilon.
    pub high_risk: bool,
    /// Estimates for this instrument fell back to defaults.
    pub degraded: bool,
}

impl Recommendation {
    /// Cash committed by this recommendation.
    pub fn new_investment(&self) -> f64 {
        self.shares_delta as f64 * self.price
    }
}

/// Portfolio-level summary accompanying the recommendation list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PortfolioSummary {
    pub available_capital: f64,
    pub total_new_investment: f64,
    pub cash_after_investment: f64,
    pub total_risk: f64,
    pub portfolio_expected_return: Metric,
    pub portfolio_volatility: Metric,
    pub portfolio_sharpe_estimate: Metric,
    /// Fraction of available capital committed this cycle.
    pub capital_utilization: Metric,
}
