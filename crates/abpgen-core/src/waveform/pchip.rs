//! Piecewise Cubic Hermite Interpolating Polynomial (PCHIP)
//!
//! Fritsch-Carlson style monotone interpolation. Knot derivatives are chosen
//! so the interpolant never overshoots the data: on every sub-interval the
//! curve stays between the two knot values that bound it.
//!
//! Interior derivatives use the weighted harmonic mean of the neighbouring
//! secants (zero at local extrema); end derivatives use the one-sided
//! three-point formula, limited to keep the end intervals monotone.

/// Errors raised while building an interpolant
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum PchipError {
    #[error("at least one knot is required")]
    NoKnots,

    #[error("knots must be strictly increasing (x[{index}] = {value})")]
    NotIncreasing { index: usize, value: f64 },

    #[error("x and y must have the same length ({x} != {y})")]
    LengthMismatch { x: usize, y: usize },
}

/// Monotone cubic interpolant through `(x, y)` knots
#[derive(Debug, Clone)]
pub struct Pchip {
    x: Vec<f64>,
    y: Vec<f64>,
    d: Vec<f64>,
}

impl Pchip {
    /// Fit the interpolant
    ///
    /// # Arguments
    /// * `x` - strictly increasing knot positions
    /// * `y` - knot values
    ///
    /// # Example
    /// ```
    /// use abpgen_core::waveform::pchip::Pchip;
    ///
    /// let p = Pchip::new(&[0.0, 2.0, 9.0], &[80.0, 120.0, 80.0]).unwrap();
    /// assert_eq!(p.evaluate(2.0), 120.0);
    /// assert!(p.evaluate(5.0) <= 120.0);
    /// ```
    pub fn new(x: &[f64], y: &[f64]) -> Result<Self, PchipError> {
        if x.len() != y.len() {
            return Err(PchipError::LengthMismatch {
                x: x.len(),
                y: y.len(),
            });
        }
        if x.is_empty() {
            return Err(PchipError::NoKnots);
        }
        for i in 1..x.len() {
            if x[i] <= x[i - 1] || !x[i].is_finite() {
                return Err(PchipError::NotIncreasing {
                    index: i,
                    value: x[i],
                });
            }
        }

        let d = Self::derivatives(x, y);
        Ok(Self {
            x: x.to_vec(),
            y: y.to_vec(),
            d,
        })
    }

    fn derivatives(x: &[f64], y: &[f64]) -> Vec<f64> {
        let n = x.len();
        match n {
            1 => return vec![0.0],
            2 => {
                let slope = (y[1] - y[0]) / (x[1] - x[0]);
                return vec![slope, slope];
            }
            _ => {}
        }

        let h: Vec<f64> = x.windows(2).map(|w| w[1] - w[0]).collect();
        let m: Vec<f64> = y
            .windows(2)
            .zip(&h)
            .map(|(w, hk)| (w[1] - w[0]) / hk)
            .collect();

        let mut d = vec![0.0; n];
        for k in 1..n - 1 {
            let (m0, m1) = (m[k - 1], m[k]);
            if m0 == 0.0 || m1 == 0.0 || m0.signum() != m1.signum() {
                d[k] = 0.0;
            } else {
                let w1 = 2.0 * h[k] + h[k - 1];
                let w2 = h[k] + 2.0 * h[k - 1];
                d[k] = (w1 + w2) / (w1 / m0 + w2 / m1);
            }
        }

        d[0] = Self::edge_derivative(h[0], h[1], m[0], m[1]);
        d[n - 1] = Self::edge_derivative(h[n - 2], h[n - 3], m[n - 2], m[n - 3]);
        d
    }

    /// One-sided three-point end derivative, shape-limited
    fn edge_derivative(h0: f64, h1: f64, m0: f64, m1: f64) -> f64 {
        let d = ((2.0 * h0 + h1) * m0 - h0 * m1) / (h0 + h1);
        if d.signum() != m0.signum() || m0 == 0.0 {
            0.0
        } else if m0.signum() != m1.signum() && d.abs() > 3.0 * m0.abs() {
            3.0 * m0
        } else {
            d
        }
    }

    /// Knot positions
    pub fn knots(&self) -> &[f64] {
        &self.x
    }

    /// Evaluate at `t`; outside the knot span the end polynomial is extended
    pub fn evaluate(&self, t: f64) -> f64 {
        let n = self.x.len();
        if n == 1 {
            return self.y[0];
        }

        // Interval index k such that x[k] <= t < x[k+1], clamped to the end intervals
        let k = match self.x.partition_point(|&xk| xk <= t) {
            0 => 0,
            p => (p - 1).min(n - 2),
        };

        let h = self.x[k + 1] - self.x[k];
        let s = (t - self.x[k]) / h;
        let s2 = s * s;
        let s3 = s2 * s;

        let h00 = 2.0 * s3 - 3.0 * s2 + 1.0;
        let h10 = s3 - 2.0 * s2 + s;
        let h01 = -2.0 * s3 + 3.0 * s2;
        let h11 = s3 - s2;

        h00 * self.y[k] + h10 * h * self.d[k] + h01 * self.y[k + 1] + h11 * h * self.d[k + 1]
    }

    /// Evaluate at every point of `ts`
    pub fn evaluate_many(&self, ts: impl IntoIterator<Item = f64>) -> Vec<f64> {
        ts.into_iter().map(|t| self.evaluate(t)).collect()
    }
}
