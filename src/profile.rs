/// 1D Gaussian fit of a peak's amplitude profile along the depth axis.
///
/// f(z) = B + A * exp(-(z - z0)^2 / (2 sigma^2))

use tracing::debug;

use crate::error::{Error, Result};
use crate::solver::{levenberg_marquardt, LeastSquares, SolverConfig};

/// Options for [`fit_gaussian_1d`].
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct ProfileFitOptions {
    /// Fit the additive offset. When false the pure Gaussian (no offset) is
    /// fitted to the raw values and the profile minimum is reported as the
    /// offset.
    pub with_offset: bool,
    /// Keep only samples with |z - z0| < trim * sigma of the initial guess.
    pub trim: Option<f64>,
    /// Initial center, overriding the intensity-weighted mean.
    pub guess_z: Option<f64>,
}

impl Default for ProfileFitOptions {
    fn default() -> Self {
        ProfileFitOptions {
            with_offset: true,
            trim: None,
            guess_z: None,
        }
    }
}

impl ProfileFitOptions {
    pub fn without_offset(mut self) -> Self {
        self.with_offset = false;
        self
    }

    pub fn with_trim(mut self, trim: f64) -> Self {
        self.trim = Some(trim);
        self
    }

    pub fn with_guess_z(mut self, z: f64) -> Self {
        self.guess_z = Some(z);
        self
    }
}

/// Fitted profile. All fields are NaN when the fit failed.
///
/// After a fit without offset, `offset` holds the profile minimum and is not
/// part of the fitted model.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct ProfileFit {
    pub amplitude: f64,
    pub center: f64,
    pub sigma: f64,
    pub offset: f64,
}

impl ProfileFit {
    pub fn nan() -> Self {
        ProfileFit {
            amplitude: f64::NAN,
            center: f64::NAN,
            sigma: f64::NAN,
            offset: f64::NAN,
        }
    }

    pub fn is_finite(&self) -> bool {
        self.amplitude.is_finite()
            && self.center.is_finite()
            && self.sigma.is_finite()
            && self.offset.is_finite()
    }

    pub fn value_at(&self, z: f64) -> f64 {
        let d = z - self.center;
        self.offset + self.amplitude * (-d * d / (2.0 * self.sigma * self.sigma)).exp()
    }
}

/// Fit `values` sampled at `z`.
///
/// The initial guess comes from the first and second moments of the
/// offset-subtracted profile. Solver failures give [`ProfileFit::nan`];
/// only mismatched input lengths are an error.
pub fn fit_gaussian_1d(
    z: &[f64],
    values: &[f64],
    options: &ProfileFitOptions,
    config: &SolverConfig,
) -> Result<ProfileFit> {
    if z.len() != values.len() {
        return Err(Error::ShapeMismatch(vec![z.len()], vec![values.len()]));
    }
    if z.is_empty() {
        return Ok(ProfileFit::nan());
    }

    let floor = values.iter().copied().fold(f64::INFINITY, f64::min);
    let corrected: Vec<f64> = values.iter().map(|v| v - floor).collect();
    let peak = corrected.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let center = options
        .guess_z
        .unwrap_or_else(|| nmoment(z, &corrected, 0.0, 1));
    let sigma = nmoment(z, &corrected, center, 2).sqrt();

    let (zs, ys): (Vec<f64>, Vec<f64>) = match options.trim {
        Some(trim) => z
            .iter()
            .zip(values)
            .filter(|(zi, _)| (*zi - center).abs() < trim * sigma)
            .map(|(&zi, &yi)| (zi, yi))
            .unzip(),
        None => (z.to_vec(), values.to_vec()),
    };

    let problem = ProfileProblem {
        z: &zs,
        values: &ys,
        with_offset: options.with_offset,
    };
    let mut params = vec![peak, center, sigma];
    if options.with_offset {
        params.push(floor);
    }

    match levenberg_marquardt(&problem, &mut params, config) {
        Ok(report) if params.iter().all(|p| p.is_finite()) => {
            debug!(
                iterations = report.iterations,
                cost = report.cost,
                samples = zs.len(),
                "profile fit converged"
            );
            Ok(ProfileFit {
                amplitude: params[0],
                center: params[1],
                sigma: params[2],
                offset: if options.with_offset { params[3] } else { floor },
            })
        }
        Ok(_) => {
            debug!("profile fit produced non-finite parameters");
            Ok(ProfileFit::nan())
        }
        Err(failure) => {
            debug!(%failure, samples = zs.len(), "profile fit failed");
            Ok(ProfileFit::nan())
        }
    }
}

/// Piecewise-linear interpolation of (`xp`, `fp`) at `x`.
///
/// `xp` must be increasing. Outside the sample range the end values are
/// returned. NaN `x` or empty samples give NaN.
pub fn interp(x: f64, xp: &[f64], fp: &[f64]) -> f64 {
    let n = xp.len().min(fp.len());
    if n == 0 || x.is_nan() {
        return f64::NAN;
    }
    if x <= xp[0] {
        return fp[0];
    }
    if x >= xp[n - 1] {
        return fp[n - 1];
    }
    // first index with xp[i] > x; 1 <= i <= n - 1 here
    let i = xp[..n].partition_point(|&v| v <= x);
    let (x_lo, x_hi) = (xp[i - 1], xp[i]);
    let t = (x - x_lo) / (x_hi - x_lo);
    fp[i - 1] + t * (fp[i] - fp[i - 1])
}

/// n-th moment of `weights` over `x` about `c`.
fn nmoment(x: &[f64], weights: &[f64], c: f64, n: i32) -> f64 {
    let total: f64 = weights.iter().sum();
    let acc: f64 = x
        .iter()
        .zip(weights)
        .map(|(xi, w)| (xi - c).powi(n) * w)
        .sum();
    acc / total
}

struct ProfileProblem<'a> {
    z: &'a [f64],
    values: &'a [f64],
    with_offset: bool,
}

impl LeastSquares for ProfileProblem<'_> {
    fn num_params(&self) -> usize {
        if self.with_offset {
            4
        } else {
            3
        }
    }

    fn num_samples(&self) -> usize {
        self.z.len()
    }

    fn evaluate(&self, params: &[f64], residuals: &mut [f64], mut jacobian: Option<&mut [f64]>) {
        let np = self.num_params();
        let (amp, z0, sigma) = (params[0], params[1], params[2]);
        let offset = if self.with_offset { params[3] } else { 0.0 };
        let s2 = sigma * sigma;

        for (i, (&z, &v)) in self.z.iter().zip(self.values).enumerate() {
            let d = z - z0;
            let e = (-d * d / (2.0 * s2)).exp();
            residuals[i] = v - (offset + amp * e);
            if let Some(j) = jacobian.as_deref_mut() {
                let row = &mut j[i * np..(i + 1) * np];
                row[0] = e;
                row[1] = amp * e * d / s2;
                row[2] = amp * e * d * d / (s2 * sigma);
                if np == 4 {
                    row[3] = 1.0;
                }
            }
        }
    }

    fn constrain(&self, trial: &mut [f64], current: &[f64]) {
        if trial[2] <= 0.0 {
            trial[2] = current[2] * 0.5;
        }
    }
}
