/// Noiseless synthetic data: single Gaussian windows and bead stacks.

use ndarray::{Array2, Array3};

use crate::gaussian::ModelParams;

/// Evaluate `params` on a `(rows, cols)` pixel grid (x = column, y = row).
pub fn gaussian_window(shape: (usize, usize), params: &ModelParams) -> Array2<f64> {
    Array2::from_shape_fn(shape, |(r, c)| params.value_at(c as f64, r as f64))
}

/// A point emitter imaged through a Gaussian PSF.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct Bead {
    /// Focal position along the depth axis (fractional slice).
    pub z: f64,
    /// Row at slice 0.
    pub row: f64,
    /// Column at slice 0.
    pub col: f64,
    /// Lateral (row, column) movement per slice.
    pub drift: (f64, f64),
    /// In-focus peak height above `floor`.
    pub amplitude: f64,
    /// Peak height far from focus.
    pub floor: f64,
    /// Lateral width at focus.
    pub sigma_xy: f64,
    /// Axial width of the peak-height profile.
    pub sigma_z: f64,
    /// Relative lateral broadening per slice of defocus, squared:
    /// sigma(s) = sigma_xy * sqrt(1 + defocus * (s - z)^2).
    pub defocus: f64,
}

impl Default for Bead {
    fn default() -> Self {
        Bead {
            z: 0.0,
            row: 0.0,
            col: 0.0,
            drift: (0.0, 0.0),
            amplitude: 100.0,
            floor: 0.0,
            sigma_xy: 1.5,
            sigma_z: 3.0,
            defocus: 0.0,
        }
    }
}

impl Bead {
    /// 2D model of this bead at `slice`, without background.
    pub fn at_slice(&self, slice: usize) -> ModelParams {
        let s = slice as f64;
        let dz = s - self.z;
        let height = self.floor + self.amplitude * (-dz * dz / (2.0 * self.sigma_z * self.sigma_z)).exp();
        let sigma = self.sigma_xy * (1.0 + self.defocus * dz * dz).sqrt();
        ModelParams::symmetric(
            height,
            self.col + self.drift.1 * s,
            self.row + self.drift.0 * s,
            sigma,
            0.0,
        )
    }
}

/// `(depth, rows, cols)` stack of `beads` on a constant `background`.
pub fn bead_stack(shape: (usize, usize, usize), beads: &[Bead], background: f64) -> Array3<f64> {
    let (depth, rows, cols) = shape;
    let mut stack = Array3::from_elem(shape, background);
    for bead in beads {
        for z in 0..depth {
            let model = bead.at_slice(z);
            for r in 0..rows {
                for c in 0..cols {
                    stack[[z, r, c]] += model.value_at(c as f64, r as f64);
                }
            }
        }
    }
    stack
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bead_profile() {
        let bead = Bead {
            z: 4.0,
            row: 10.0,
            col: 12.0,
            floor: 5.0,
            ..Bead::default()
        };
        let stack = bead_stack((9, 24, 24), &[bead], 2.0);
        assert!((stack[[4, 10, 12]] - 107.0).abs() < 1e-9);
        assert!(stack[[4, 10, 12]] > stack[[3, 10, 12]]);
        assert!((stack[[3, 10, 12]] - stack[[5, 10, 12]]).abs() < 1e-9);
        assert!((stack[[0, 0, 0]] - 2.0).abs() < 1e-6);
    }

    #[test]
    fn test_drift() {
        let bead = Bead {
            row: 5.0,
            col: 6.0,
            drift: (1.0, -0.5),
            sigma_z: f64::INFINITY,
            ..Bead::default()
        };
        let p = bead.at_slice(4);
        assert_eq!((p.y0, p.x0), (9.0, 4.0));
        assert!((p.amplitude - 100.0).abs() < 1e-12);
    }
}
