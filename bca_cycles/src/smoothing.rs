use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::warn;

use super::BcaError;

/// Filter applied to a dQ/dU signal after differentiation.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
#[serde(tag = "method", rename_all = "snake_case")]
pub enum Smoothing {
    #[default]
    None,
    SavitzkyGolay { window: usize, polynomial_order: usize },
    MovingAverage { window: usize },
    Gaussian { sigma: f64 },
}

const GAUSSIAN_TRUNCATE: f64 = 4.0;

impl Smoothing {
    pub fn id(&self) -> &'static str {
        match self {
            Smoothing::None => "none",
            Smoothing::SavitzkyGolay { .. } => "savitzky_golay",
            Smoothing::MovingAverage { .. } => "moving_average",
            Smoothing::Gaussian { .. } => "gaussian",
        }
    }

    pub fn validate(&self, n_points: usize) -> Result<(), BcaError> {
        let check_window = |window: usize| {
            if window == 0 || window % 2 == 0 {
                Err(BcaError::Configuration(format!(
                    "{} window must be a positive odd number, got {window}",
                    self.id()
                )))
            } else if window >= n_points {
                Err(BcaError::Configuration(format!(
                    "{} window {window} must be smaller than the {n_points}-point grid",
                    self.id()
                )))
            } else {
                Ok(())
            }
        };
        match self {
            Smoothing::None => Ok(()),
            Smoothing::SavitzkyGolay {
                window,
                polynomial_order,
            } => {
                check_window(*window)?;
                if polynomial_order >= window {
                    return Err(BcaError::Configuration(format!(
                        "polynomial order {polynomial_order} must be below the window {window}"
                    )));
                }
                Ok(())
            }
            Smoothing::MovingAverage { window } => check_window(*window),
            Smoothing::Gaussian { sigma } => {
                if sigma.is_finite() && *sigma > 0.0 {
                    Ok(())
                } else {
                    Err(BcaError::Configuration(format!(
                        "gaussian sigma must be positive and finite, got {sigma}"
                    )))
                }
            }
        }
    }

    /// Smooth `data`, returning a signal of the same length.
    pub fn apply(&self, data: &[f64]) -> Result<Vec<f64>, BcaError> {
        if data.is_empty() {
            warn!("{} smoothing received an empty signal", self.id());
            return Ok(Vec::new());
        }
        self.validate(data.len().max(2))?;
        Ok(match self {
            Smoothing::None => data.to_vec(),
            Smoothing::SavitzkyGolay {
                window,
                polynomial_order,
            } => savitzky_golay(data, *window, *polynomial_order)?,
            Smoothing::MovingAverage { window } => moving_average(data, *window),
            Smoothing::Gaussian { sigma } => gaussian(data, *sigma),
        })
    }
}

impl fmt::Display for Smoothing {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Smoothing::None => f.write_str("none"),
            Smoothing::SavitzkyGolay {
                window,
                polynomial_order,
            } => write!(f, "savitzky_golay(window={window}, order={polynomial_order})"),
            Smoothing::MovingAverage { window } => write!(f, "moving_average(window={window})"),
            Smoothing::Gaussian { sigma } => write!(f, "gaussian(sigma={sigma})"),
        }
    }
}

/// Centered mean; samples beyond the ends repeat the edge value.
fn moving_average(data: &[f64], window: usize) -> Vec<f64> {
    let n = data.len() as isize;
    let half = (window / 2) as isize;
    (0..n)
        .map(|i| {
            let sum: f64 = (i - half..=i + half)
                .map(|j| data[j.clamp(0, n - 1) as usize])
                .sum();
            sum / window as f64
        })
        .collect()
}

/// Gaussian kernel truncated at four sigma, with mirror-reflected edges.
fn gaussian(data: &[f64], sigma: f64) -> Vec<f64> {
    let n = data.len() as isize;
    let radius = (GAUSSIAN_TRUNCATE * sigma + 0.5) as isize;
    let kernel: Vec<f64> = (-radius..=radius)
        .map(|k| (-0.5 * (k as f64 / sigma).powi(2)).exp())
        .collect();
    let norm: f64 = kernel.iter().sum();
    let reflect = |j: isize| {
        let m = j.rem_euclid(2 * n);
        if m >= n {
            (2 * n - 1 - m) as usize
        } else {
            m as usize
        }
    };
    (0..n)
        .map(|i| {
            kernel
                .iter()
                .zip(-radius..=radius)
                .map(|(w, k)| w * data[reflect(i + k)])
                .sum::<f64>()
                / norm
        })
        .collect()
}

/// Least-squares polynomial smoothing. Interior points use the centered window;
/// the first and last half-windows are evaluated on the polynomial fitted to the
/// edge window.
fn savitzky_golay(data: &[f64], window: usize, order: usize) -> Result<Vec<f64>, BcaError> {
    let n = data.len();
    if window == 1 {
        return Ok(data.to_vec());
    }
    let half = window / 2;
    let weights: Vec<Vec<f64>> = (0..window)
        .map(|t| savgol_weights(window, order, t))
        .collect::<Result<_, _>>()?;
    let dot = |w: &[f64], start: usize| -> f64 {
        w.iter()
            .zip(&data[start..start + window])
            .map(|(a, b)| a * b)
            .sum()
    };

    let mut out = vec![0.0; n];
    for (i, slot) in out.iter_mut().enumerate() {
        *slot = if i < half {
            dot(&weights[i], 0)
        } else if i + half >= n {
            dot(&weights[i + window - n], n - window)
        } else {
            dot(&weights[half], i - half)
        };
    }
    Ok(out)
}

/// Weights that evaluate the least-squares polynomial of `order` over a window at position `t`.
fn savgol_weights(window: usize, order: usize, t: usize) -> Result<Vec<f64>, BcaError> {
    let half = (window / 2) as f64;
    let scale = half.max(1.0);
    let x = |j: usize| (j as f64 - half) / scale;
    let basis = |v: f64| -> Vec<f64> { (0..=order).map(|k| v.powi(k as i32)).collect() };

    let p = order + 1;
    let mut gram = vec![vec![0.0; p]; p];
    for j in 0..window {
        let phi = basis(x(j));
        for r in 0..p {
            for c in 0..p {
                gram[r][c] += phi[r] * phi[c];
            }
        }
    }
    let z = solve_dense(gram, basis(x(t)))?;
    Ok((0..window)
        .map(|j| basis(x(j)).iter().zip(&z).map(|(a, b)| a * b).sum())
        .collect())
}

/// Gaussian elimination with partial pivoting.
fn solve_dense(mut a: Vec<Vec<f64>>, mut b: Vec<f64>) -> Result<Vec<f64>, BcaError> {
    let n = b.len();
    for col in 0..n {
        let pivot = (col..n)
            .max_by(|&i, &j| a[i][col].abs().total_cmp(&a[j][col].abs()))
            .unwrap_or(col);
        if a[pivot][col].abs() < 1e-14 {
            return Err(BcaError::Configuration(
                "singular Savitzky-Golay system".into(),
            ));
        }
        a.swap(col, pivot);
        b.swap(col, pivot);
        for row in col + 1..n {
            let factor = a[row][col] / a[col][col];
            for k in col..n {
                a[row][k] -= factor * a[col][k];
            }
            b[row] -= factor * b[col];
        }
    }
    let mut x = vec![0.0; n];
    for row in (0..n).rev() {
        let tail: f64 = (row + 1..n).map(|k| a[row][k] * x[k]).sum();
        x[row] = (b[row] - tail) / a[row][row];
    }
    Ok(x)
}
