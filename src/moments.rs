/// Closed-form initial guess from raster moments up to second order.
///
/// Moments are taken on the raw intensities, so any background pedestal
/// biases the centroid toward the window center and inflates the widths.

use ndarray::ArrayView2;

use crate::gaussian::{ModelParams, RHO_LIMIT};

/// Raw raster moments `m_pq = sum(x^p y^q I)` with x = column, y = row.
#[derive(Copy, Clone, Debug, Default, PartialEq)]
pub struct RasterMoments {
    pub m00: f64,
    pub m10: f64,
    pub m01: f64,
    pub m20: f64,
    pub m02: f64,
    pub m11: f64,
}

impl RasterMoments {
    pub fn compute(data: &ArrayView2<f64>) -> Self {
        let mut m = RasterMoments::default();
        for ((row, col), &v) in data.indexed_iter() {
            let x = col as f64;
            let y = row as f64;
            m.m00 += v;
            m.m10 += x * v;
            m.m01 += y * v;
            m.m20 += x * x * v;
            m.m02 += y * y * v;
            m.m11 += x * y * v;
        }
        m
    }

    /// Intensity-weighted centroid (x, y).
    pub fn centroid(&self) -> (f64, f64) {
        (self.m10 / self.m00, self.m01 / self.m00)
    }

    /// Central second moments (var_x, var_y, cov_xy), normalized by m00.
    pub fn central(&self) -> (f64, f64, f64) {
        let (xbar, ybar) = self.centroid();
        (
            self.m20 / self.m00 - xbar * xbar,
            self.m02 / self.m00 - ybar * ybar,
            self.m11 / self.m00 - xbar * ybar,
        )
    }
}

/// Full (7-parameter) guess for `data`: amplitude = max, offset = min,
/// center = centroid, widths = sqrt(|central second moment|),
/// rho = cov / sqrt(|var_x var_y|).
pub fn estimate_params(data: &ArrayView2<f64>) -> ModelParams {
    let (rows, cols) = data.dim();
    let max = data.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let min = data.iter().copied().fold(f64::INFINITY, f64::min);

    let m = RasterMoments::compute(data);
    if m.m00 == 0.0 || !m.m00.is_finite() {
        // No usable mass: fall back to the geometric center and a unit width.
        let (x, y) = ((cols as f64 - 1.0) * 0.5, (rows as f64 - 1.0) * 0.5);
        return ModelParams::full(max, x, y, 1.0, 1.0, 0.0, min);
    }

    let (xbar, ybar) = m.centroid();
    let (xvar, yvar, covar) = m.central();
    let denom = (xvar * yvar).abs().sqrt();
    let rho = if denom > 0.0 && denom.is_finite() {
        (covar / denom).clamp(-RHO_LIMIT, RHO_LIMIT)
    } else {
        0.0
    };

    ModelParams::full(max, xbar, ybar, xvar.abs().sqrt(), yvar.abs().sqrt(), rho, min)
}
