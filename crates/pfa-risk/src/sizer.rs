use crate::types::{PositionLimit, SizingParams, SHARE_FLOOR_GUARD, STOP_EPSILON};

/// `floor(x)` as a share count, with a small guard against representation
/// error (`599.9999999999` is 600 shares). Non-finite or non-positive input
/// yields 0.
pub fn floor_shares(x: f64) -> u64 {
    if x.is_finite() && x > 0.0 {
        // `as` saturates at u64::MAX.
        (x + SHARE_FLOOR_GUARD).floor() as u64
    } else {
        0
    }
}

/// Stop-loss price and the two independent share caps for one instrument.
///
/// `capital` is the capital the caps are measured against (the cycle's
/// available capital). The risk cap bounds the loss at the stop to
/// `capital * risk_per_trade`; the allocation cap bounds the position value
/// to `capital * weight`.
pub fn size_position(
    price: f64,
    atr: f64,
    weight: f64,
    capital: f64,
    params: SizingParams,
) -> PositionLimit {
    let raw_stop = price - params.atr_multiplier * atr;
    let (stop_loss_price, high_risk) = if raw_stop > 0.0 && raw_stop.is_finite() {
        (raw_stop, false)
    } else {
        (STOP_EPSILON, true)
    };
    let stop_distance = price - stop_loss_price;

    let max_risk_shares = if stop_distance > 0.0 {
        floor_shares(capital * params.risk_per_trade / stop_distance)
    } else {
        0
    };
    let max_allocation_shares = if price > 0.0 {
        floor_shares(capital * weight / price)
    } else {
        0
    };

    PositionLimit {
        stop_loss_price,
        stop_distance,
        max_risk_shares,
        max_allocation_shares,
        high_risk,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const P: SizingParams = SizingParams {
        atr_multiplier: 2.0,
        risk_per_trade: 0.02,
    };

    #[test]
    fn floor_guard_absorbs_representation_error() {
        assert_eq!(floor_shares(10_000.0 * 0.6 / 100.0), 60);
        assert_eq!(floor_shares(59.999_999_999_9), 60);
        assert_eq!(floor_shares(59.99), 59);
        assert_eq!(floor_shares(f64::NAN), 0);
        assert_eq!(floor_shares(-3.0), 0);
    }

    #[test]
    fn caps_follow_stop_distance_and_weight() {
        // stop = 100 - 2*2.5 = 95; risk budget 10_000 * 0.02 = 200; 200/5 = 40.
        let l = size_position(100.0, 2.5, 0.6, 10_000.0, P);
        assert_eq!(l.stop_loss_price, 95.0);
        assert_eq!(l.stop_distance, 5.0);
        assert_eq!(l.max_risk_shares, 40);
        assert_eq!(l.max_allocation_shares, 60);
        assert_eq!(l.ceiling(), 40);
        assert!(!l.high_risk);
    }

    #[test]
    fn negative_stop_clamps_and_flags_high_risk() {
        let l = size_position(10.0, 6.0, 0.5, 1_000.0, P);
        assert_eq!(l.stop_loss_price, STOP_EPSILON);
        assert!(l.high_risk);
        assert!((l.stop_distance - 9.99).abs() < 1e-12);
        assert_eq!(l.max_risk_shares, 2);
    }

    #[test]
    fn sub_epsilon_price_has_no_risk_capacity() {
        let l = size_position(0.005, 0.01, 1.0, 1_000.0, P);
        assert!(l.high_risk);
        assert!(l.stop_distance < 0.0);
        assert_eq!(l.max_risk_shares, 0);
        assert_eq!(l.ceiling(), 0);
    }

    #[test]
    fn tiny_risk_budget_zeroes_risk_cap_only() {
        let p = SizingParams {
            atr_multiplier: 2.0,
            risk_per_trade: 0.0001,
        };
        // risk budget 0.5 < stop distance 5 => 0 shares; allocation 50.
        let l = size_position(100.0, 2.5, 0.5, 10_000.0, p);
        assert_eq!(l.max_risk_shares, 0);
        assert_eq!(l.max_allocation_shares, 50);
        assert_eq!(l.ceiling(), 0);
    }
}
