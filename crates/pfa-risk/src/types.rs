use pfa_schemas::DegradedReason;

/// Trading days per year used for annualisation.
pub const TRADING_DAYS: f64 = 252.0;

/// ATR averaging window (bars).
pub const ATR_WINDOW: usize = 14;

/// Synthetic ATR as a fraction of price when the window is short or invalid.
pub const SYNTHETIC_ATR_FRACTION: f64 = 0.02;

/// Floor for a stop-loss price that would otherwise be <= 0.
pub const STOP_EPSILON: f64 = 0.01;

/// Guard added before flooring share counts.
pub const SHARE_FLOOR_GUARD: f64 = 1e-9;

/// One daily simple return, keyed by the `end_ts` of the later bar.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct DatedReturn {
    pub end_ts: i64,
    pub value: f64,
}

/// Per-instrument output of the Risk Estimator.
#[derive(Clone, Debug, PartialEq)]
pub struct InstrumentEstimate {
    pub symbol: String,
    /// `None` when neither a spot price nor a valid last close exists.
    pub current_price: Option<f64>,
    /// Annualised mean simple return.
    pub expected_return: f64,
    /// Annualised sample standard deviation of returns.
    pub volatility: f64,
    /// Average true range in price units; 0 when there is no price.
    pub atr: f64,
    pub returns: Vec<DatedReturn>,
    pub degraded: Vec<DegradedReason>,
}

impl InstrumentEstimate {
    pub fn is_degraded(&self) -> bool {
        !self.degraded.is_empty()
    }

    /// Whether `expected_return` and `volatility` came from data rather
    /// than defaults. Only such instruments contribute covariances.
    pub fn has_return_statistics(&self) -> bool {
        !self.degraded.iter().any(|d| {
            matches!(
                d,
                DegradedReason::InsufficientReturns { .. }
                    | DegradedReason::InvalidPriceSeries
                    | DegradedReason::NonFiniteStatistic
            )
        })
    }
}

/// Square, symmetric, annualised covariance matrix indexed by instrument.
#[derive(Clone, Debug, PartialEq)]
pub struct CovarianceMatrix {
    symbols: Vec<String>,
    data: Vec<Vec<f64>>,
}

impl CovarianceMatrix {
    /// Diagonal matrix from per-instrument variances.
    pub fn diagonal(symbols: Vec<String>, variances: &[f64]) -> Self {
        let n = symbols.len();
        let mut data = vec![vec![0.0; n]; n];
        for (i, row) in data.iter_mut().enumerate() {
            row[i] = variances.get(i).copied().unwrap_or(0.0);
        }
        Self { symbols, data }
    }

    /// Returns `None` unless `data` is square, matches `symbols`, is finite
    /// and symmetric within 1e-12.
    pub fn from_rows(symbols: Vec<String>, data: Vec<Vec<f64>>) -> Option<Self> {
        let n = symbols.len();
        if data.len() != n || data.iter().any(|r| r.len() != n) {
            return None;
        }
        for i in 0..n {
            for j in 0..n {
                if !data[i][j].is_finite() || (data[i][j] - data[j][i]).abs() > 1e-12 {
                    return None;
                }
            }
        }
        Some(Self { symbols, data })
    }

    pub fn dim(&self) -> usize {
        self.symbols.len()
    }

    pub fn symbols(&self) -> &[String] {
        &self.symbols
    }

    pub fn get(&self, i: usize, j: usize) -> f64 {
        self.data[i][j]
    }

    pub fn rows(&self) -> &[Vec<f64>] {
        &self.data
    }

    /// Sub-matrix over the given indices, in that order.
    pub fn select(&self, idx: &[usize]) -> Self {
        let symbols = idx.iter().map(|&i| self.symbols[i].clone()).collect();
        let data = idx
            .iter()
            .map(|&i| idx.iter().map(|&j| self.data[i][j]).collect())
            .collect();
        Self { symbols, data }
    }

    /// wᵀΣw. `w` must have `dim()` entries.
    pub fn quadratic_form(&self, w: &[f64]) -> f64 {
        let mut acc = 0.0;
        for (i, row) in self.data.iter().enumerate() {
            for (j, c) in row.iter().enumerate() {
                acc += w[i] * c * w[j];
            }
        }
        acc
    }
}

/// Inputs to the Position Sizer that come from configuration.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SizingParams {
    pub atr_multiplier: f64,
    pub risk_per_trade: f64,
}

/// Share caps and stop for one instrument.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PositionLimit {
    pub stop_loss_price: f64,
    /// `price - stop_loss_price`; may be <= 0 for sub-epsilon prices.
    pub stop_distance: f64,
    pub max_risk_shares: u64,
    pub max_allocation_shares: u64,
    /// The stop price was clamped to [`STOP_EPSILON`].
    pub high_risk: bool,
}

impl PositionLimit {
    /// Per-instrument ceiling for the floor allocation.
    pub fn ceiling(&self) -> u64 {
        self.max_risk_shares.min(self.max_allocation_shares)
    }
}
