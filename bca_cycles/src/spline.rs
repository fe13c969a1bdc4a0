use super::BcaError;

/// Natural cubic spline through strictly increasing knots.
#[derive(Clone, Debug)]
pub struct CubicSpline {
    x: Vec<f64>,
    y: Vec<f64>,
    /// Second derivatives at the knots; zero at both ends.
    m: Vec<f64>,
}

impl CubicSpline {
    pub fn natural(x: &[f64], y: &[f64]) -> Result<Self, BcaError> {
        let n = x.len();
        if n != y.len() {
            return Err(BcaError::Configuration(format!(
                "spline needs matching knot arrays, got {} x and {} y",
                n,
                y.len()
            )));
        }
        if n < 2 {
            return Err(BcaError::InsufficientData {
                found: n,
                required: 2,
            });
        }
        if let Some(i) = (1..n).find(|&i| !(x[i] > x[i - 1])) {
            return Err(BcaError::DataIntegrity {
                index: i,
                reason: format!("spline knots not strictly increasing ({} -> {})", x[i - 1], x[i]),
            });
        }

        let mut m = vec![0.0; n];
        if n > 2 {
            // Tridiagonal system for the interior second derivatives (Thomas algorithm).
            let inner = n - 2;
            let mut diag = vec![0.0; inner];
            let mut upper = vec![0.0; inner];
            let mut rhs = vec![0.0; inner];
            for k in 0..inner {
                let i = k + 1;
                let h0 = x[i] - x[i - 1];
                let h1 = x[i + 1] - x[i];
                diag[k] = 2.0 * (h0 + h1);
                upper[k] = h1;
                rhs[k] = 6.0 * ((y[i + 1] - y[i]) / h1 - (y[i] - y[i - 1]) / h0);
            }
            for k in 1..inner {
                let lower = x[k + 1] - x[k];
                let w = lower / diag[k - 1];
                diag[k] -= w * upper[k - 1];
                rhs[k] -= w * rhs[k - 1];
            }
            m[inner] = rhs[inner - 1] / diag[inner - 1];
            for k in (0..inner - 1).rev() {
                m[k + 1] = (rhs[k] - upper[k] * m[k + 2]) / diag[k];
            }
        }

        Ok(Self {
            x: x.to_vec(),
            y: y.to_vec(),
            m,
        })
    }

    pub fn domain(&self) -> (f64, f64) {
        (self.x[0], self.x[self.x.len() - 1])
    }

    /// Value at `xq`, or `None` outside the knot range.
    pub fn evaluate(&self, xq: f64) -> Option<f64> {
        let (lo, hi) = self.domain();
        if !(xq >= lo && xq <= hi) {
            return None;
        }
        let n = self.x.len();
        let i = self
            .x
            .partition_point(|&knot| knot <= xq)
            .saturating_sub(1)
            .min(n - 2);
        let h = self.x[i + 1] - self.x[i];
        let a = (self.x[i + 1] - xq) / h;
        let b = (xq - self.x[i]) / h;
        Some(
            a * self.y[i]
                + b * self.y[i + 1]
                + ((a * a * a - a) * self.m[i] + (b * b * b - b) * self.m[i + 1]) * h * h / 6.0,
        )
    }
}
