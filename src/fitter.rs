/// Fit one 2D window with a Gaussian peak and validate the result.

use ndarray::ArrayView2;

use crate::gaussian::{ModelParams, RHO_LIMIT};
use crate::moments::estimate_params;
use crate::solver::{levenberg_marquardt, LeastSquares, SolverConfig};
use crate::types::{FitFailure, FitResult, FitStatus, ModelKind};

/// Starting point for a window fit.
#[derive(Copy, Clone, Debug, PartialEq)]
pub enum FitSeed {
    /// Cold start: estimate from the window's moments, reduced to this kind.
    Moments(ModelKind),
    /// Warm start from a guess in window-local coordinates; the guess fixes the kind.
    Guess(ModelParams),
}

impl FitSeed {
    pub fn kind(&self) -> ModelKind {
        match self {
            FitSeed::Moments(kind) => *kind,
            FitSeed::Guess(p) => p.kind,
        }
    }
}

impl From<ModelKind> for FitSeed {
    fn from(kind: ModelKind) -> Self {
        FitSeed::Moments(kind)
    }
}

impl From<ModelParams> for FitSeed {
    fn from(guess: ModelParams) -> Self {
        FitSeed::Guess(guess)
    }
}

/// Fit `window` starting from `seed`.
///
/// Never fails with an error: solver breakdowns, a vanishing amplitude and
/// widths larger than `config.max_width_ratio` × the largest window dimension
/// come back as `FitStatus::Failed` with all-zero parameters of the seed's kind.
/// Coordinates of the result are window-local (x = column, y = row).
pub fn fit_peak(window: &ArrayView2<f64>, seed: FitSeed, config: &SolverConfig) -> FitResult {
    let kind = seed.kind();
    let (rows, cols) = window.dim();
    if rows * cols < kind.param_count() {
        return FitResult::failed(kind, FitFailure::Underdetermined);
    }

    let guess = match seed {
        FitSeed::Moments(kind) => estimate_params(window).reduce_to(kind),
        FitSeed::Guess(guess) => guess,
    };

    let problem = WindowProblem { window, kind };
    let mut values = guess.to_vec();
    let report = match levenberg_marquardt(&problem, &mut values, config) {
        Ok(report) => report,
        Err(failure) => return FitResult::failed(kind, failure),
    };

    let params = ModelParams::from_values(kind, &values);
    let scale = window.iter().fold(0.0_f64, |m, v| m.max(v.abs()));
    if let Err(failure) = validate(&params, rows, cols, scale, config) {
        return FitResult::failed(kind, failure);
    }

    FitResult {
        params,
        status: FitStatus::Converged {
            iterations: report.iterations,
        },
    }
}

/// Divergence heuristics applied to a nominally converged fit.
pub(crate) fn validate(
    params: &ModelParams,
    rows: usize,
    cols: usize,
    data_scale: f64,
    config: &SolverConfig,
) -> Result<(), FitFailure> {
    if !params.is_finite() {
        return Err(FitFailure::NonFinite);
    }
    if data_scale == 0.0 || params.amplitude.abs() <= config.min_amplitude_ratio * data_scale {
        return Err(FitFailure::IllConditioned);
    }
    let limit = config.max_width_ratio * rows.max(cols) as f64;
    if params.sigma_x.abs() > limit || params.sigma_y.abs() > limit {
        return Err(FitFailure::RunawayWidth);
    }
    Ok(())
}

struct WindowProblem<'a, 'b> {
    window: &'b ArrayView2<'a, f64>,
    kind: ModelKind,
}

impl LeastSquares for WindowProblem<'_, '_> {
    fn num_params(&self) -> usize {
        self.kind.param_count()
    }

    fn num_samples(&self) -> usize {
        self.window.len()
    }

    fn evaluate(&self, params: &[f64], residuals: &mut [f64], mut jacobian: Option<&mut [f64]>) {
        let model = ModelParams::from_values(self.kind, params);
        let np = self.kind.param_count();
        for (i, ((row, col), &v)) in self.window.indexed_iter().enumerate() {
            let (x, y) = (col as f64, row as f64);
            let g = match jacobian.as_deref_mut() {
                Some(j) => model.value_and_gradient(x, y, &mut j[i * np..(i + 1) * np]),
                None => model.value_at(x, y),
            };
            residuals[i] = v - g;
        }
    }

    fn constrain(&self, trial: &mut [f64], current: &[f64]) {
        // Keep sigmas positive
        let widths = match self.kind {
            ModelKind::Symmetric => 3..4,
            ModelKind::AxisAligned | ModelKind::Full => 3..5,
        };
        for i in widths {
            if trial[i] <= 0.0 {
                trial[i] = current[i] * 0.5;
            }
        }
        if self.kind == ModelKind::Full {
            trial[5] = trial[5].clamp(-RHO_LIMIT, RHO_LIMIT);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::synthetic::gaussian_window;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use rand_distr::{Distribution, Normal};

    fn rel(a: f64, b: f64) -> f64 {
        (a - b).abs() / b.abs()
    }

    #[test]
    fn test_round_trip_noiseless() {
        let truth = ModelParams::symmetric(100.0, 32.0, 32.0, 3.0, 0.0);
        let data = gaussian_window((64, 64), &truth);
        let config = SolverConfig::default();

        for kind in [ModelKind::Symmetric, ModelKind::AxisAligned, ModelKind::Full] {
            let fit = fit_peak(&data.view(), FitSeed::Moments(kind), &config);
            assert!(fit.succeeded(), "{:?}: {:?}", kind, fit.status);
            let p = fit.params;
            assert_eq!(p.kind, kind);
            assert!(rel(p.amplitude, 100.0) < 0.01, "amp: {}", p.amplitude);
            assert!(rel(p.x0, 32.0) < 0.01, "x0: {}", p.x0);
            assert!(rel(p.y0, 32.0) < 0.01, "y0: {}", p.y0);
            assert!(rel(p.sigma_x, 3.0) < 0.01, "sx: {}", p.sigma_x);
            assert!(rel(p.sigma_y, 3.0) < 0.01, "sy: {}", p.sigma_y);
            assert!(p.offset.abs() < 0.01, "offset: {}", p.offset);
            assert!(p.rho.abs() < 0.01, "rho: {}", p.rho);
        }
    }

    #[test]
    fn test_elliptical_correlated() {
        let truth = ModelParams::full(500.0, 12.3, 10.8, 2.0, 3.5, -0.4, 20.0);
        let data = gaussian_window((25, 25), &truth);
        let fit = fit_peak(&data.view(), ModelKind::Full.into(), &SolverConfig::default());
        assert!(fit.succeeded(), "{:?}", fit.status);
        let p = fit.params;
        assert!((p.x0 - 12.3).abs() < 1e-3);
        assert!((p.y0 - 10.8).abs() < 1e-3);
        assert!((p.sigma_x - 2.0).abs() < 1e-3);
        assert!((p.sigma_y - 3.5).abs() < 1e-3);
        assert!((p.rho + 0.4).abs() < 1e-3);
        assert!((p.offset - 20.0).abs() < 1e-3);
    }

    #[test]
    fn test_noisy_fit() {
        let truth = ModelParams::axis_aligned(200.0, 10.4, 9.7, 1.8, 2.2, 50.0);
        let mut data = gaussian_window((21, 21), &truth);
        let mut rng = StdRng::seed_from_u64(7);
        let noise = Normal::new(0.0, 2.0).unwrap();
        data.mapv_inplace(|v| v + noise.sample(&mut rng));

        let fit = fit_peak(&data.view(), ModelKind::AxisAligned.into(), &SolverConfig::default());
        assert!(fit.succeeded(), "{:?}", fit.status);
        let p = fit.params;
        assert!((p.x0 - 10.4).abs() < 0.1, "x0: {}", p.x0);
        assert!((p.y0 - 9.7).abs() < 0.1, "y0: {}", p.y0);
        assert!(rel(p.sigma_x, 1.8) < 0.05, "sx: {}", p.sigma_x);
        assert!(rel(p.sigma_y, 2.2) < 0.05, "sy: {}", p.sigma_y);
        assert!(rel(p.amplitude, 200.0) < 0.05, "amp: {}", p.amplitude);
    }

    #[test]
    fn test_warm_guess_keeps_kind() {
        let truth = ModelParams::symmetric(80.0, 7.0, 8.0, 1.5, 5.0);
        let data = gaussian_window((15, 15), &truth);
        let guess = ModelParams::symmetric(60.0, 6.0, 9.0, 2.5, 0.0);
        let fit = fit_peak(&data.view(), guess.into(), &SolverConfig::default());
        assert!(fit.succeeded());
        assert_eq!(fit.params.kind, ModelKind::Symmetric);
        assert!((fit.params.x0 - 7.0).abs() < 1e-4);
        assert!((fit.params.y0 - 8.0).abs() < 1e-4);
    }

    #[test]
    fn test_runaway_width_fails() {
        // A peak far broader than an 8x8 window.
        let truth = ModelParams::symmetric(100.0, 4.0, 4.0, 40.0, 0.0);
        let data = gaussian_window((8, 8), &truth);
        let fit = fit_peak(&data.view(), truth.into(), &SolverConfig::default());
        assert!(!fit.succeeded());
        assert_eq!(fit.params, ModelParams::zeroed(ModelKind::Symmetric));
        assert!(fit.params.to_vec().iter().all(|&v| v == 0.0));
    }

    #[test]
    fn test_width_guard() {
        let config = SolverConfig::default();
        let wide = ModelParams::axis_aligned(1.0, 5.0, 5.0, 2.0, 13.0, 0.0);
        assert_eq!(validate(&wide, 12, 10, 1.0, &config), Err(FitFailure::RunawayWidth));
        let ok = ModelParams::axis_aligned(1.0, 5.0, 5.0, 2.0, 11.5, 0.0);
        assert_eq!(validate(&ok, 12, 10, 1.0, &config), Ok(()));
        let loose = config.with_max_width_ratio(2.0);
        assert_eq!(validate(&wide, 12, 10, 1.0, &loose), Ok(()));
    }

    #[test]
    fn test_vanishing_amplitude_guard() {
        let config = SolverConfig::default();
        let faint = ModelParams::symmetric(1e-9, 5.0, 5.0, 2.0, 10.0);
        assert_eq!(validate(&faint, 11, 11, 10.0, &config), Err(FitFailure::IllConditioned));
        assert_eq!(validate(&faint, 11, 11, 0.0, &config), Err(FitFailure::IllConditioned));
        let real = ModelParams::symmetric(0.5, 5.0, 5.0, 2.0, 10.0);
        assert_eq!(validate(&real, 11, 11, 10.5, &config), Ok(()));
    }

    #[test]
    fn test_tiny_window_underdetermined() {
        let data = ndarray::Array2::<f64>::ones((2, 2));
        let fit = fit_peak(&data.view(), ModelKind::Symmetric.into(), &SolverConfig::default());
        assert_eq!(fit.status, FitStatus::Failed(FitFailure::Underdetermined));
        assert_eq!(fit.params, ModelParams::zeroed(ModelKind::Symmetric));
    }

    #[test]
    fn test_blank_window_fails() {
        let data = ndarray::Array2::<f64>::zeros((11, 11));
        let fit = fit_peak(&data.view(), ModelKind::Full.into(), &SolverConfig::default());
        assert!(!fit.succeeded());
        assert!(fit.params.to_vec().iter().all(|&v| v == 0.0));
    }

    #[test]
    fn test_flat_window_fails_from_warm_guess() {
        let data = ndarray::Array2::<f64>::from_elem((15, 15), 10.0);
        let guess = ModelParams::symmetric(100.0, 7.0, 7.0, 2.0, 0.0);
        let fit = fit_peak(&data.view(), guess.into(), &SolverConfig::default());
        assert!(!fit.succeeded(), "{:?}", fit);
    }

    #[test]
    fn test_source_untouched() {
        let truth = ModelParams::symmetric(30.0, 5.0, 5.0, 1.2, 1.0);
        let data = gaussian_window((11, 11), &truth);
        let before = data.clone();
        let _ = fit_peak(&data.view(), ModelKind::Full.into(), &SolverConfig::default());
        assert_eq!(data, before);
    }
}
