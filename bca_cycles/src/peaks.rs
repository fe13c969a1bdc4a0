use serde::{Deserialize, Serialize};

use super::BcaError;

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PeakParams {
    /// Minimum prominence as a fraction of the signal maximum.
    pub prominence_fraction: f64,
    /// Minimum width in grid points, measured at `rel_height` of the prominence.
    pub min_width_points: f64,
    pub rel_height: f64,
}

impl Default for PeakParams {
    fn default() -> Self {
        Self {
            prominence_fraction: 0.1,
            min_width_points: 3.0,
            rel_height: 0.5,
        }
    }
}

impl PeakParams {
    pub fn validate(&self) -> Result<(), BcaError> {
        if !self.prominence_fraction.is_finite() || self.prominence_fraction < 0.0 {
            return Err(BcaError::Configuration(format!(
                "prominence fraction must be non-negative, got {}",
                self.prominence_fraction
            )));
        }
        if !self.min_width_points.is_finite() || self.min_width_points < 0.0 {
            return Err(BcaError::Configuration(format!(
                "minimum peak width must be non-negative, got {}",
                self.min_width_points
            )));
        }
        if !(self.rel_height > 0.0 && self.rel_height <= 1.0) {
            return Err(BcaError::Configuration(format!(
                "relative height must lie in (0, 1], got {}",
                self.rel_height
            )));
        }
        Ok(())
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Peak {
    /// Grid index of the peak.
    pub index: usize,
    pub voltage_v: f64,
    pub intensity: f64,
    pub prominence: f64,
    /// Width in grid points.
    pub width: f64,
    pub width_v: f64,
}

/// Local maxima of `signal` passing the prominence and width thresholds.
///
/// `voltages` is the grid `signal` is sampled on. The prominence threshold is
/// `prominence_fraction * max(signal)`; a signal whose maximum is not positive has no peaks.
pub fn find_peaks(signal: &[f64], voltages: &[f64], params: &PeakParams) -> Vec<Peak> {
    let n = signal.len().min(voltages.len());
    if n < 3 {
        return Vec::new();
    }
    let signal = &signal[..n];
    let max = signal.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    if !(max > 0.0) {
        return Vec::new();
    }
    let min_prominence = params.prominence_fraction * max;

    local_maxima(signal)
        .into_iter()
        .filter_map(|index| {
            let (prominence, left_base, right_base) = prominence(signal, index);
            if prominence < min_prominence {
                return None;
            }
            let (left_ip, right_ip) = interpolated_width(
                signal,
                index,
                prominence,
                left_base,
                right_base,
                params.rel_height,
            );
            let width = right_ip - left_ip;
            if width < params.min_width_points {
                return None;
            }
            Some(Peak {
                index,
                voltage_v: voltages[index],
                intensity: signal[index],
                prominence,
                width,
                width_v: (voltage_at(voltages, right_ip) - voltage_at(voltages, left_ip)).abs(),
            })
        })
        .collect()
}

/// Indices of strict local maxima; flat tops report their middle sample.
fn local_maxima(x: &[f64]) -> Vec<usize> {
    let n = x.len();
    let mut peaks = Vec::new();
    let mut i = 1;
    while i + 1 < n {
        if x[i - 1] < x[i] {
            let mut ahead = i + 1;
            while ahead + 1 < n && x[ahead] == x[i] {
                ahead += 1;
            }
            if x[ahead] < x[i] {
                peaks.push((i + ahead - 1) / 2);
                i = ahead;
            }
        }
        i += 1;
    }
    peaks
}

/// Prominence of the peak at `peak` and the indices of its left and right bases.
fn prominence(x: &[f64], peak: usize) -> (f64, usize, usize) {
    let height = x[peak];

    let mut left_min = height;
    let mut left_base = peak;
    let mut i = peak;
    loop {
        if x[i] > height {
            break;
        }
        if x[i] < left_min {
            left_min = x[i];
            left_base = i;
        }
        if i == 0 {
            break;
        }
        i -= 1;
    }

    let mut right_min = height;
    let mut right_base = peak;
    for (j, &v) in x.iter().enumerate().skip(peak) {
        if v > height {
            break;
        }
        if v < right_min {
            right_min = v;
            right_base = j;
        }
    }

    (height - left_min.max(right_min), left_base, right_base)
}

/// Fractional indices where the signal crosses `rel_height` of the prominence below the peak.
fn interpolated_width(
    x: &[f64],
    peak: usize,
    prominence: f64,
    left_base: usize,
    right_base: usize,
    rel_height: f64,
) -> (f64, f64) {
    let height = x[peak] - prominence * rel_height;

    let mut i = peak;
    while left_base < i && height < x[i] {
        i -= 1;
    }
    let mut left_ip = i as f64;
    if x[i] < height {
        left_ip += (height - x[i]) / (x[i + 1] - x[i]);
    }

    let mut i = peak;
    while i < right_base && height < x[i] {
        i += 1;
    }
    let mut right_ip = i as f64;
    if x[i] < height {
        right_ip -= (height - x[i]) / (x[i - 1] - x[i]);
    }

    (left_ip, right_ip)
}

fn voltage_at(voltages: &[f64], position: f64) -> f64 {
    let last = voltages.len() - 1;
    let lo = (position.floor().max(0.0) as usize).min(last);
    let hi = (lo + 1).min(last);
    let frac = position - lo as f64;
    voltages[lo] + (voltages[hi] - voltages[lo]) * frac
}

#[cfg(test)]
mod tests {
    use super::*;

    fn grid(n: usize) -> Vec<f64> {
        (0..n).map(|i| 3.0 + i as f64 * 0.01).collect()
    }

    fn bump(n: usize, center: f64, width: f64, height: f64) -> Vec<f64> {
        (0..n)
            .map(|i| height * (-0.5 * ((i as f64 - center) / width).powi(2)).exp())
            .collect()
    }

    #[test]
    fn test_two_gaussian_peaks() {
        let a = bump(200, 50.0, 5.0, 10.0);
        let b = bump(200, 140.0, 8.0, 4.0);
        let signal: Vec<f64> = a.iter().zip(&b).map(|(x, y)| x + y).collect();
        let peaks = find_peaks(&signal, &grid(200), &PeakParams::default());
        assert_eq!(peaks.len(), 2);
        assert_eq!(peaks[0].index, 50);
        assert_eq!(peaks[1].index, 140);
        assert!((peaks[0].voltage_v - 3.5).abs() < 1e-12);
        // FWHM of a gaussian is 2.3548 sigma.
        assert!((peaks[0].width - 2.3548 * 5.0).abs() < 0.2);
        assert!((peaks[0].width_v - peaks[0].width * 0.01).abs() < 1e-9);
    }

    #[test]
    fn test_small_and_narrow_peaks_filtered() {
        let mut signal = bump(100, 30.0, 6.0, 10.0);
        // Prominence below 10% of the maximum.
        for (i, v) in bump(100, 75.0, 4.0, 0.5).into_iter().enumerate() {
            signal[i] += v;
        }
        // Single-sample spike: tall but one point wide.
        signal[90] += 5.0;
        let peaks = find_peaks(&signal, &grid(100), &PeakParams::default());
        let indices: Vec<usize> = peaks.iter().map(|p| p.index).collect();
        assert_eq!(indices, vec![30]);
    }

    #[test]
    fn test_plateau_reports_midpoint() {
        assert_eq!(local_maxima(&[0.0, 1.0, 2.0, 2.0, 2.0, 1.0, 0.0]), vec![3]);
        assert_eq!(local_maxima(&[0.0, 1.0, 1.0]), Vec::<usize>::new());
    }

    #[test]
    fn test_non_positive_signal_has_no_peaks() {
        let signal: Vec<f64> = bump(50, 25.0, 4.0, 3.0).iter().map(|v| v - 10.0).collect();
        assert!(find_peaks(&signal, &grid(50), &PeakParams::default()).is_empty());
        assert!(find_peaks(&[], &[], &PeakParams::default()).is_empty());
    }

    #[test]
    fn test_params_validation() {
        let mut params = PeakParams::default();
        assert!(params.validate().is_ok());
        params.rel_height = 0.0;
        assert!(params.validate().is_err());
        params = PeakParams {
            prominence_fraction: -0.1,
            ..PeakParams::default()
        };
        assert!(params.validate().is_err());
    }
}
