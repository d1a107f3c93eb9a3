//! Small numeric helpers shared by the aggregation and scoring stages.
//! Undefined results are `None`, never NaN or a silent zero.

use serde::{Deserialize, Serialize};

/// Arithmetic mean. None for an empty slice.
pub fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    Some(values.iter().sum::<f64>() / values.len() as f64)
}

/// Population standard deviation (divide by n, not n-1). None for an empty
/// slice; a single value yields 0.0.
pub fn population_std_dev(values: &[f64]) -> Option<f64> {
    let m = mean(values)?;
    let variance = values.iter().map(|v| (v - m).powi(2)).sum::<f64>() / values.len() as f64;
    Some(variance.sqrt())
}

/// Continuous percentile with linear interpolation between order statistics
/// (NumPy-compatible). `sorted` must be ascending; `p` in [0, 100].
pub fn percentile_of_sorted(sorted: &[f64], p: f64) -> Option<f64> {
    let n = sorted.len();
    if n == 0 {
        return None;
    }
    if n == 1 {
        return Some(sorted[0]);
    }

    let rank = (p / 100.0).clamp(0.0, 1.0) * (n - 1) as f64;
    let lower = rank.floor() as usize;
    let upper = (rank.ceil() as usize).min(n - 1);
    let frac = rank - lower as f64;

    if lower == upper {
        Some(sorted[lower])
    } else {
        Some(sorted[lower] * (1.0 - frac) + sorted[upper] * frac)
    }
}

/// Convenience wrapper that sorts a copy first.
pub fn percentile(values: &[f64], p: f64) -> Option<f64> {
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    percentile_of_sorted(&sorted, p)
}

/// Continuous median (50th percentile).
pub fn median(values: &[f64]) -> Option<f64> {
    percentile(values, 50.0)
}

/// Standard logistic function; maps raw scores into (0, 1) with 0.5 at zero.
pub fn logistic(x: f64) -> f64 {
    1.0 / (1.0 + (-x).exp())
}

/// Ordinary least squares over (x, y) pairs plus Pearson correlation.
/// Slope/intercept/correlation are None below two points or when the
/// relevant variance is zero.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Regression {
    pub n: usize,
    pub correlation: Option<f64>,
    pub slope: Option<f64>,
    pub intercept: Option<f64>,
}

pub fn linear_regression(points: &[(f64, f64)]) -> Regression {
    let n = points.len();
    if n < 2 {
        return Regression {
            n,
            correlation: None,
            slope: None,
            intercept: None,
        };
    }

    let nf = n as f64;
    let mean_x = points.iter().map(|(x, _)| x).sum::<f64>() / nf;
    let mean_y = points.iter().map(|(_, y)| y).sum::<f64>() / nf;

    let mut cov = 0.0;
    let mut var_x = 0.0;
    let mut var_y = 0.0;
    for (x, y) in points {
        cov += (x - mean_x) * (y - mean_y);
        var_x += (x - mean_x).powi(2);
        var_y += (y - mean_y).powi(2);
    }

    let slope = if var_x > 0.0 { Some(cov / var_x) } else { None };
    let intercept = slope.map(|s| mean_y - s * mean_x);
    let correlation = if var_x > 0.0 && var_y > 0.0 {
        Some(cov / (var_x.sqrt() * var_y.sqrt()))
    } else {
        None
    };

    Regression {
        n,
        correlation,
        slope,
        intercept,
    }
}
