use std::collections::{BTreeMap, BTreeSet};

use pfa_schemas::{DegradedReason, OhlcBar};

use crate::types::{
    CovarianceMatrix, DatedReturn, InstrumentEstimate, ATR_WINDOW, SYNTHETIC_ATR_FRACTION,
    TRADING_DAYS,
};

fn positive_finite(v: f64) -> bool {
    v.is_finite() && v > 0.0
}

/// Prices positive and finite, `low <= high`, `end_ts` strictly increasing.
fn series_is_valid(bars: &[OhlcBar]) -> bool {
    let bars_ok = bars.iter().all(|b| {
        positive_finite(b.open)
            && positive_finite(b.high)
            && positive_finite(b.low)
            && positive_finite(b.close)
            && b.low <= b.high
    });
    bars_ok && bars.windows(2).all(|w| w[0].end_ts < w[1].end_ts)
}

/// Daily simple returns `close_t / close_{t-1} - 1`.
pub fn daily_returns(bars: &[OhlcBar]) -> Vec<DatedReturn> {
    bars.windows(2)
        .map(|w| DatedReturn {
            end_ts: w[1].end_ts,
            value: w[1].close / w[0].close - 1.0,
        })
        .collect()
}

/// True range per bar. The first bar has no previous close, so its true
/// range is `high - low`.
pub fn true_ranges(bars: &[OhlcBar]) -> Vec<f64> {
    let mut out = Vec::with_capacity(bars.len());
    let mut prev_close: Option<f64> = None;
    for b in bars {
        let hl = b.high - b.low;
        let tr = match prev_close {
            Some(pc) => hl.max((b.high - pc).abs()).max((b.low - pc).abs()),
            None => hl,
        };
        out.push(tr);
        prev_close = Some(b.close);
    }
    out
}

fn mean(xs: &[f64]) -> f64 {
    xs.iter().sum::<f64>() / xs.len() as f64
}

/// Sample standard deviation (n - 1). Caller guarantees `xs.len() >= 2`.
fn sample_std(xs: &[f64]) -> f64 {
    let m = mean(xs);
    let ss: f64 = xs.iter().map(|x| (x - m) * (x - m)).sum();
    (ss / (xs.len() as f64 - 1.0)).sqrt()
}

/// Estimate one instrument.
///
/// Never fails: every problem is recorded in `degraded` and replaced with a
/// documented default (expected return 0, `default_volatility`, ATR
/// `price * 0.02`). `spot_price`, when positive and finite, overrides the
/// last close as the current price.
pub fn estimate_instrument(
    symbol: &str,
    bars: &[OhlcBar],
    spot_price: Option<f64>,
    default_volatility: f64,
) -> InstrumentEstimate {
    let mut degraded = Vec::new();

    let valid = series_is_valid(bars);
    if !valid {
        degraded.push(DegradedReason::InvalidPriceSeries);
    }

    let last_close = if valid {
        bars.last().map(|b| b.close)
    } else {
        None
    };
    let current_price = spot_price.filter(|p| positive_finite(*p)).or(last_close);

    // ─── Return statistics ──────────────────────────────────────────────

    let returns = if valid { daily_returns(bars) } else { Vec::new() };
    let (mut expected_return, mut volatility) = (0.0, default_volatility);
    if valid {
        if returns.len() < 2 {
            degraded.push(DegradedReason::InsufficientReturns {
                have: returns.len(),
            });
        } else {
            let values: Vec<f64> = returns.iter().map(|r| r.value).collect();
            let er = mean(&values) * TRADING_DAYS;
            let vol = sample_std(&values) * TRADING_DAYS.sqrt();
            if er.is_finite() && vol.is_finite() {
                expected_return = er;
                volatility = vol;
            } else {
                degraded.push(DegradedReason::NonFiniteStatistic);
            }
        }
    }

    // ─── ATR ────────────────────────────────────────────────────────────

    let atr = match current_price {
        None => 0.0,
        Some(price) => {
            let synthetic = price * SYNTHETIC_ATR_FRACTION;
            if !valid {
                synthetic
            } else if bars.len() < ATR_WINDOW {
                degraded.push(DegradedReason::InsufficientAtrWindow {
                    have: bars.len(),
                    need: ATR_WINDOW,
                });
                synthetic
            } else {
                let trs = true_ranges(bars);
                let atr = mean(&trs[trs.len() - ATR_WINDOW..]);
                if positive_finite(atr) {
                    atr
                } else {
                    degraded.push(DegradedReason::InvalidAtr);
                    synthetic
                }
            }
        }
    };

    if current_price.is_none() {
        degraded.push(DegradedReason::MissingPrice);
    }

    InstrumentEstimate {
        symbol: symbol.to_string(),
        current_price,
        expected_return,
        volatility,
        atr,
        returns,
        degraded,
    }
}

/// Annualised sample covariance across `estimates`, in the given order.
///
/// Instruments with real return statistics share a covariance computed over
/// the `end_ts` values they all have in common. Instruments on defaults get
/// `default_volatility²` on the diagonal and zero covariances. With fewer than
/// two common dates the matrix falls back to each instrument's own variance.
pub fn build_covariance(estimates: &[InstrumentEstimate], default_volatility: f64) -> CovarianceMatrix {
    let symbols: Vec<String> = estimates.iter().map(|e| e.symbol.clone()).collect();
    let own_var: Vec<f64> = estimates
        .iter()
        .map(|e| {
            if e.has_return_statistics() {
                e.volatility * e.volatility
            } else {
                default_volatility * default_volatility
            }
        })
        .collect();

    let usable: Vec<usize> = (0..estimates.len())
        .filter(|&i| estimates[i].has_return_statistics())
        .collect();
    if usable.is_empty() {
        return CovarianceMatrix::diagonal(symbols, &own_var);
    }

    let mut common: Option<BTreeSet<i64>> = None;
    for &i in &usable {
        let dates: BTreeSet<i64> = estimates[i].returns.iter().map(|r| r.end_ts).collect();
        common = Some(match common {
            None => dates,
            Some(c) => c.intersection(&dates).copied().collect(),
        });
    }
    let common = common.unwrap_or_default();
    if common.len() < 2 {
        return CovarianceMatrix::diagonal(symbols, &own_var);
    }

    // Aligned, demeaned return columns for each usable instrument.
    let aligned: Vec<Vec<f64>> = usable
        .iter()
        .map(|&i| {
            let by_ts: BTreeMap<i64, f64> = estimates[i]
                .returns
                .iter()
                .map(|r| (r.end_ts, r.value))
                .collect();
            let col: Vec<f64> = common.iter().filter_map(|ts| by_ts.get(ts).copied()).collect();
            let m = mean(&col);
            col.into_iter().map(|v| v - m).collect()
        })
        .collect();

    let t = common.len() as f64;
    let n = estimates.len();
    let mut data = vec![vec![0.0; n]; n];
    for (i, row) in data.iter_mut().enumerate() {
        row[i] = own_var[i];
    }
    for (a, &i) in usable.iter().enumerate() {
        for (b, &j) in usable.iter().enumerate().skip(a) {
            let s: f64 = aligned[a]
                .iter()
                .zip(&aligned[b])
                .map(|(x, y)| x * y)
                .sum();
            let c = s / (t - 1.0) * TRADING_DAYS;
            data[i][j] = c;
            data[j][i] = c;
        }
    }

    CovarianceMatrix::from_rows(symbols.clone(), data)
        .unwrap_or_else(|| CovarianceMatrix::diagonal(symbols, &own_var))
}
