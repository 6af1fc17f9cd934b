use crate::error::{Result, TrajectoryError};
use serde::Serialize;

/// Derivative of `values` with respect to possibly irregular `times`.
///
/// Interior points use the second-order central difference for uneven spacing,
/// the two end points a one-sided first-order difference. Needs at least two samples.
pub fn gradient(values: &[f64], times: &[f64]) -> Result<Vec<f64>> {
    let n = values.len();
    if times.len() != n {
        return Err(TrajectoryError::precondition(format!(
            "gradient needs one time per value ({} values, {} times)",
            n,
            times.len()
        )));
    }
    if n < 2 {
        return Err(TrajectoryError::InsufficientFrames { required: 2, found: n });
    }

    let mut out = Vec::with_capacity(n);
    out.push((values[1] - values[0]) / (times[1] - times[0]));
    for i in 1..n - 1 {
        let hs = times[i] - times[i - 1];
        let hd = times[i + 1] - times[i];
        let num = hs * hs * values[i + 1] + (hd * hd - hs * hs) * values[i] - hd * hd * values[i - 1];
        out.push(num / (hs * hd * (hd + hs)));
    }
    out.push((values[n - 1] - values[n - 2]) / (times[n - 1] - times[n - 2]));
    Ok(out)
}

/// Least-squares line `y = slope * x + intercept`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct LinearFit {
    pub slope: f64,
    pub intercept: f64,
}

impl LinearFit {
    pub fn eval(&self, x: f64) -> f64 {
        self.slope * x + self.intercept
    }
}

pub fn linear_fit(x: &[f64], y: &[f64]) -> Result<LinearFit> {
    if x.len() != y.len() {
        return Err(TrajectoryError::Fit(format!(
            "x and y differ in length ({} vs {})",
            x.len(),
            y.len()
        )));
    }
    if x.len() < 2 {
        return Err(TrajectoryError::Fit(format!(
            "need at least 2 points, got {}",
            x.len()
        )));
    }
    if let Some(bad) = x.iter().chain(y).find(|v| !v.is_finite()) {
        return Err(TrajectoryError::Fit(format!("non-finite sample {}", bad)));
    }

    let n = x.len() as f64;
    let mean_x = x.iter().sum::<f64>() / n;
    let mean_y = y.iter().sum::<f64>() / n;
    let (sxx, sxy) = x.iter().zip(y).fold((0.0, 0.0), |(sxx, sxy), (&xi, &yi)| {
        let dx = xi - mean_x;
        (sxx + dx * dx, sxy + dx * (yi - mean_y))
    });
    if sxx == 0.0 {
        return Err(TrajectoryError::Fit("all x values are identical".into()));
    }
    let slope = sxy / sxx;
    Ok(LinearFit {
        slope,
        intercept: mean_y - slope * mean_x,
    })
}

/// Fits `ln|y| = m ln|x| + b`. Zero magnitudes have no logarithm and fail the fit.
pub fn log_log_fit(x: &[f64], y: &[f64]) -> Result<LinearFit> {
    let ln_abs = |values: &[f64], axis: &str| -> Result<Vec<f64>> {
        values
            .iter()
            .map(|v| {
                let a = v.abs();
                if a > 0.0 && a.is_finite() {
                    Ok(a.ln())
                } else {
                    Err(TrajectoryError::Fit(format!(
                        "{} value {} has no logarithm",
                        axis, v
                    )))
                }
            })
            .collect()
    };
    linear_fit(&ln_abs(x, "x")?, &ln_abs(y, "y")?)
}

/// Indices that sort `values` ascending. NaN sorts last.
pub fn argsort(values: &[f64]) -> Vec<usize> {
    let mut idx: Vec<usize> = (0..values.len()).collect();
    idx.sort_by(|&a, &b| values[a].total_cmp(&values[b]));
    idx
}

/// Number of distinct values, compared exactly.
pub fn distinct_count(values: &[f64]) -> usize {
    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);
    sorted.dedup();
    sorted.len()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gradient_of_line_is_exact_on_uneven_grid() {
        let t = [0.0, 0.1, 0.35, 0.4, 1.0];
        let y: Vec<f64> = t.iter().map(|t| 3.0 * t - 1.0).collect();
        for g in gradient(&y, &t).unwrap() {
            assert!((g - 3.0).abs() < 1e-12);
        }
    }

    #[test]
    fn gradient_interior_is_exact_for_quadratic() {
        let t = [0.0, 0.2, 0.5, 0.6, 1.0];
        let y: Vec<f64> = t.iter().map(|t| t * t).collect();
        let g = gradient(&y, &t).unwrap();
        for i in 1..t.len() - 1 {
            assert!((g[i] - 2.0 * t[i]).abs() < 1e-12, "i={} g={}", i, g[i]);
        }
    }

    #[test]
    fn gradient_tracks_sinusoid() {
        let t: Vec<f64> = (0..2000).map(|i| i as f64 * 1e-3).collect();
        let y: Vec<f64> = t.iter().map(|t| (2.0 * t).sin()).collect();
        let g = gradient(&y, &t).unwrap();
        for i in 1..t.len() - 1 {
            assert!((g[i] - 2.0 * (2.0 * t[i]).cos()).abs() < 1e-5);
        }
    }

    #[test]
    fn gradient_needs_two_samples() {
        let err = gradient(&[1.0], &[0.0]).unwrap_err();
        assert!(matches!(
            err,
            TrajectoryError::InsufficientFrames { required: 2, found: 1 }
        ));
        assert!(gradient(&[1.0, 2.0], &[0.0]).is_err());
    }

    #[test]
    fn log_log_fit_recovers_power_law() {
        let x = [1.0, 2.0, 4.0, 8.0];
        let y: Vec<f64> = x.iter().map(|x: &f64| -0.5 * x.powi(-3)).collect();
        let fit = log_log_fit(&x, &y).unwrap();
        assert!((fit.slope + 3.0).abs() < 1e-12);
        assert!((fit.intercept - 0.5_f64.ln()).abs() < 1e-12);
    }

    #[test]
    fn log_log_fit_rejects_degenerate_data() {
        assert!(log_log_fit(&[1.0, 2.0], &[0.0, 1.0]).is_err());
        assert!(log_log_fit(&[2.0, 2.0], &[1.0, 3.0]).is_err());
        assert!(log_log_fit(&[2.0], &[1.0]).is_err());
    }

    #[test]
    fn argsort_and_distinct() {
        let v = [3.0, -1.0, 2.0, -1.0];
        assert_eq!(argsort(&v), vec![1, 3, 2, 0]);
        assert_eq!(distinct_count(&v), 3);
    }
}
