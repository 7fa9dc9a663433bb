//! Technical indicators
//!
//! Window statistics used to build market snapshots. All functions are pure and
//! return non-finite values (or `None`) instead of panicking on degenerate input;
//! callers decide how to treat them.

use statrs::statistics::Statistics;

/// Arithmetic mean. NaN for an empty slice.
pub fn mean(values: &[f64]) -> f64 {
    values.iter().mean()
}

/// Log returns between consecutive values: `ln(v[i] / v[i-1])`
pub fn log_returns(values: &[f64]) -> Vec<f64> {
    values.windows(2).map(|w| (w[1] / w[0]).ln()).collect()
}

/// Sample standard deviation (n - 1 denominator).
///
/// A single observation has no dispersion and yields 0.0; an empty slice yields NaN.
pub fn sample_std_dev(values: &[f64]) -> f64 {
    match values.len() {
        0 => f64::NAN,
        1 => {
            if values[0].is_finite() {
                0.0
            } else {
                f64::NAN
            }
        }
        _ => values.iter().std_dev(),
    }
}

/// Realized volatility: sample std-dev of log returns over the given closes
pub fn realized_volatility(closes: &[f64]) -> f64 {
    sample_std_dev(&log_returns(closes))
}

/// Ordinary least squares slope of `values` against their index (0, 1, 2, ...)
pub fn ols_slope(values: &[f64]) -> Option<f64> {
    let n = values.len();
    if n < 2 {
        return None;
    }

    let x_mean = (n - 1) as f64 / 2.0;
    let y_mean = mean(values);

    let mut num = 0.0;
    let mut den = 0.0;
    for (i, &y) in values.iter().enumerate() {
        let dx = i as f64 - x_mean;
        num += dx * (y - y_mean);
        den += dx * dx;
    }

    if den == 0.0 {
        return None;
    }
    Some(num / den)
}

/// Highest value; a NaN anywhere propagates
pub fn highest(values: &[f64]) -> f64 {
    values.iter().copied().fold(f64::NEG_INFINITY, |acc, v| {
        if v.is_nan() || acc.is_nan() {
            f64::NAN
        } else {
            acc.max(v)
        }
    })
}

/// Lowest value; a NaN anywhere propagates
pub fn lowest(values: &[f64]) -> f64 {
    values.iter().copied().fold(f64::INFINITY, |acc, v| {
        if v.is_nan() || acc.is_nan() {
            f64::NAN
        } else {
            acc.min(v)
        }
    })
}
