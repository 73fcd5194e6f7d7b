/// 2D Gaussian peak model (unnormalized bivariate normal).
///
/// g(x, y) = B + A * exp(-z / (2 (1 - rho^2)))
/// z = ((x-x0)/sx)^2 - 2 rho (x-x0)(y-y0)/(sx sy) + ((y-y0)/sy)^2
///
/// `x` is the column coordinate, `y` the row coordinate.

use ndarray::{Array, ArrayView, Dimension, Zip};

use crate::error::{Error, Result};
use crate::types::ModelKind;

/// Correlation is kept strictly inside (-1, 1).
pub(crate) const RHO_LIMIT: f64 = 0.999;

/// Parameters of one 2D Gaussian peak.
///
/// Fields the kind does not fit are pinned: `rho = 0` for `Symmetric` and
/// `AxisAligned`, `sigma_y = sigma_x` for `Symmetric`.
#[derive(Copy, Clone, PartialEq, Debug)]
pub struct ModelParams {
    pub kind: ModelKind,
    pub amplitude: f64,
    /// Center column.
    pub x0: f64,
    /// Center row.
    pub y0: f64,
    pub sigma_x: f64,
    pub sigma_y: f64,
    pub rho: f64,
    pub offset: f64,
}

impl ModelParams {
    pub fn symmetric(amplitude: f64, x0: f64, y0: f64, sigma: f64, offset: f64) -> Self {
        ModelParams {
            kind: ModelKind::Symmetric,
            amplitude,
            x0,
            y0,
            sigma_x: sigma,
            sigma_y: sigma,
            rho: 0.0,
            offset,
        }
    }

    pub fn axis_aligned(
        amplitude: f64,
        x0: f64,
        y0: f64,
        sigma_x: f64,
        sigma_y: f64,
        offset: f64,
    ) -> Self {
        ModelParams {
            kind: ModelKind::AxisAligned,
            amplitude,
            x0,
            y0,
            sigma_x,
            sigma_y,
            rho: 0.0,
            offset,
        }
    }

    pub fn full(
        amplitude: f64,
        x0: f64,
        y0: f64,
        sigma_x: f64,
        sigma_y: f64,
        rho: f64,
        offset: f64,
    ) -> Self {
        ModelParams {
            kind: ModelKind::Full,
            amplitude,
            x0,
            y0,
            sigma_x,
            sigma_y,
            rho,
            offset,
        }
    }

    /// All-zero sentinel reported by failed fits.
    pub fn zeroed(kind: ModelKind) -> Self {
        ModelParams {
            kind,
            amplitude: 0.0,
            x0: 0.0,
            y0: 0.0,
            sigma_x: 0.0,
            sigma_y: 0.0,
            rho: 0.0,
            offset: 0.0,
        }
    }

    /// Build from a flat vector; the kind follows from its length (5/6/7).
    pub fn from_slice(values: &[f64]) -> Result<Self> {
        let kind = ModelKind::from_param_count(values.len())?;
        Ok(Self::from_values(kind, values))
    }

    /// `values.len()` must equal `kind.param_count()`.
    pub(crate) fn from_values(kind: ModelKind, v: &[f64]) -> Self {
        match kind {
            ModelKind::Symmetric => Self::symmetric(v[0], v[1], v[2], v[3], v[4]),
            ModelKind::AxisAligned => Self::axis_aligned(v[0], v[1], v[2], v[3], v[4], v[5]),
            ModelKind::Full => Self::full(v[0], v[1], v[2], v[3], v[4], v[5], v[6]),
        }
    }

    /// Flat vector in solver order for this kind.
    pub fn to_vec(&self) -> Vec<f64> {
        match self.kind {
            ModelKind::Symmetric => {
                vec![self.amplitude, self.x0, self.y0, self.sigma_x, self.offset]
            }
            ModelKind::AxisAligned => vec![
                self.amplitude,
                self.x0,
                self.y0,
                self.sigma_x,
                self.sigma_y,
                self.offset,
            ],
            ModelKind::Full => vec![
                self.amplitude,
                self.x0,
                self.y0,
                self.sigma_x,
                self.sigma_y,
                self.rho,
                self.offset,
            ],
        }
    }

    /// Drop degrees of freedom down to `kind`. A symmetric width is the mean
    /// of the two axis widths.
    pub fn reduce_to(&self, kind: ModelKind) -> Self {
        match kind {
            ModelKind::Symmetric => Self::symmetric(
                self.amplitude,
                self.x0,
                self.y0,
                0.5 * (self.sigma_x + self.sigma_y),
                self.offset,
            ),
            ModelKind::AxisAligned => Self::axis_aligned(
                self.amplitude,
                self.x0,
                self.y0,
                self.sigma_x,
                self.sigma_y,
                self.offset,
            ),
            ModelKind::Full => ModelParams { kind, ..*self },
        }
    }

    /// Translate the center by (`dx` columns, `dy` rows).
    pub fn shifted(&self, dx: f64, dy: f64) -> Self {
        ModelParams {
            x0: self.x0 + dx,
            y0: self.y0 + dy,
            ..*self
        }
    }

    /// Same model with non-negative widths (the sign of a fitted sigma is arbitrary).
    pub fn with_abs_widths(&self) -> Self {
        ModelParams {
            sigma_x: self.sigma_x.abs(),
            sigma_y: self.sigma_y.abs(),
            ..*self
        }
    }

    pub fn is_finite(&self) -> bool {
        [
            self.amplitude,
            self.x0,
            self.y0,
            self.sigma_x,
            self.sigma_y,
            self.rho,
            self.offset,
        ]
        .iter()
        .all(|v| v.is_finite())
    }

    pub fn value_at(&self, x: f64, y: f64) -> f64 {
        let a = (x - self.x0) / self.sigma_x;
        let b = (y - self.y0) / self.sigma_y;
        let z = a * a - 2.0 * self.rho * a * b + b * b;
        self.offset + self.amplitude * (-z / (2.0 * (1.0 - self.rho * self.rho))).exp()
    }

    /// Model value at (x, y); `grad` receives d(model)/d(param) in solver order
    /// and must be `kind.param_count()` long.
    pub(crate) fn value_and_gradient(&self, x: f64, y: f64, grad: &mut [f64]) -> f64 {
        let (sx, sy, rho) = (self.sigma_x, self.sigma_y, self.rho);
        let k = 1.0 - rho * rho;
        let a = (x - self.x0) / sx;
        let b = (y - self.y0) / sy;
        let z = a * a - 2.0 * rho * a * b + b * b;
        let e = (-z / (2.0 * k)).exp();

        // chain rule through z
        let dg_dz = -self.amplitude * e / (2.0 * k);
        let d_x0 = dg_dz * (-2.0 * a + 2.0 * rho * b) / sx;
        let d_y0 = dg_dz * (-2.0 * b + 2.0 * rho * a) / sy;
        let d_sx = dg_dz * (-2.0 * a * a + 2.0 * rho * a * b) / sx;
        let d_sy = dg_dz * (-2.0 * b * b + 2.0 * rho * a * b) / sy;

        grad[0] = e;
        grad[1] = d_x0;
        grad[2] = d_y0;
        match self.kind {
            ModelKind::Symmetric => {
                grad[3] = d_sx + d_sy;
                grad[4] = 1.0;
            }
            ModelKind::AxisAligned => {
                grad[3] = d_sx;
                grad[4] = d_sy;
                grad[5] = 1.0;
            }
            ModelKind::Full => {
                grad[3] = d_sx;
                grad[4] = d_sy;
                grad[5] = -self.amplitude * e * (-a * b / k + z * rho / (k * k));
                grad[6] = 1.0;
            }
        }

        self.offset + self.amplitude * e
    }
}

/// Evaluate `params` on coordinate arrays of identical shape.
pub fn gauss2d<D: Dimension>(
    x0: &ArrayView<f64, D>,
    x1: &ArrayView<f64, D>,
    params: &ModelParams,
) -> Result<Array<f64, D>> {
    if x0.shape() != x1.shape() {
        return Err(Error::ShapeMismatch(x0.shape().to_vec(), x1.shape().to_vec()));
    }
    Ok(Zip::from(x0).and(x1).map_collect(|&x, &y| params.value_at(x, y)))
}

/// Evaluate a flat parameter vector, picking the model kind from its length:
/// 5 symmetric, 6 axis-aligned, 7 full.
pub fn model<D: Dimension>(
    x0: &ArrayView<f64, D>,
    x1: &ArrayView<f64, D>,
    params: &[f64],
) -> Result<Array<f64, D>> {
    let params = ModelParams::from_slice(params)?;
    gauss2d(x0, x1, &params)
}
