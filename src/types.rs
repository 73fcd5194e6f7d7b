use std::str::FromStr;

use crate::error::Error;
use crate::gaussian::ModelParams;

/// Which member of the 2D Gaussian family a fit uses.
///
/// The kind is chosen once (by the caller or by the seed fit of a track) and
/// travels with the parameters; it is never re-inferred mid-track.
#[derive(Copy, Clone, PartialEq, Eq, Debug, Default)]
pub enum ModelKind {
    /// One width shared by both axes, no correlation (5 parameters).
    Symmetric,
    /// Independent widths, no correlation (6 parameters).
    AxisAligned,
    /// Independent widths and a correlation term (7 parameters).
    #[default]
    Full,
}

impl ModelKind {
    /// Number of free parameters, in `[amp, x0, y0, sigma_x, (sigma_y), (rho), offset]` order.
    pub fn param_count(self) -> usize {
        match self {
            ModelKind::Symmetric => 5,
            ModelKind::AxisAligned => 6,
            ModelKind::Full => 7,
        }
    }

    pub fn from_param_count(n: usize) -> Result<Self, Error> {
        match n {
            5 => Ok(ModelKind::Symmetric),
            6 => Ok(ModelKind::AxisAligned),
            7 => Ok(ModelKind::Full),
            _ => Err(Error::ParameterCount(n)),
        }
    }
}

impl FromStr for ModelKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "sym" | "symmetric" => Ok(ModelKind::Symmetric),
            "norot" | "axis-aligned" | "axis_aligned" => Ok(ModelKind::AxisAligned),
            "full" | "rotated" => Ok(ModelKind::Full),
            _ => Err(Error::UnknownModelKind(s.to_string())),
        }
    }
}

/// Why a fit was rejected.
#[derive(Copy, Clone, PartialEq, Eq, Debug, thiserror::Error)]
pub enum FitFailure {
    /// Fewer samples than free parameters.
    #[error("fewer samples than parameters")]
    Underdetermined,
    /// NaN or infinity in the guess, residuals or normal equations.
    #[error("non-finite values during the fit")]
    NonFinite,
    /// Iteration cap reached before the step size settled.
    #[error("solver did not converge")]
    NonConvergence,
    /// Normal equations are (numerically) singular.
    #[error("normal equations are ill-conditioned")]
    IllConditioned,
    /// A fitted width exceeds the allowed fraction of the window extent.
    #[error("fitted width ran away beyond the window")]
    RunawayWidth,
}

/// Outcome of one solver call.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum FitStatus {
    Converged { iterations: usize },
    Failed(FitFailure),
}

impl FitStatus {
    pub fn succeeded(&self) -> bool {
        matches!(self, FitStatus::Converged { .. })
    }

    pub fn failure(&self) -> Option<FitFailure> {
        match self {
            FitStatus::Failed(f) => Some(*f),
            FitStatus::Converged { .. } => None,
        }
    }
}

/// Result of fitting one window.
///
/// On failure `params` is [`ModelParams::zeroed`] of the requested kind; only
/// `status` tells a failed fit apart from a legitimate all-zero one.
#[derive(Copy, Clone, PartialEq, Debug)]
pub struct FitResult {
    pub params: ModelParams,
    pub status: FitStatus,
}

impl FitResult {
    pub(crate) fn failed(kind: ModelKind, failure: FitFailure) -> Self {
        FitResult {
            params: ModelParams::zeroed(kind),
            status: FitStatus::Failed(failure),
        }
    }

    pub fn succeeded(&self) -> bool {
        self.status.succeeded()
    }
}

/// One row of a per-peak fit table, in stack-global coordinates.
#[derive(Copy, Clone, PartialEq, Debug)]
pub struct SliceFit {
    pub slice: usize,
    pub params: ModelParams,
    pub status: FitStatus,
    /// True when the warm-started fit failed and this result came from the
    /// cold (moment-estimated) retry.
    pub retried: bool,
}

impl SliceFit {
    pub fn succeeded(&self) -> bool {
        self.status.succeeded()
    }
}

/// Candidate peak from the upstream detector. Read-only input.
#[derive(Copy, Clone, PartialEq, Debug)]
pub struct Blob {
    pub row: f64,
    pub column: f64,
    pub window_width: f64,
    pub amplitude: f64,
}

/// All slice fits belonging to one physical peak, ordered by slice index.
#[derive(Clone, PartialEq, Debug)]
pub struct PeakTrack {
    pub blob: Blob,
    /// Slice chosen as best focus for the seed fit.
    pub seed_slice: usize,
    pub fits: Vec<SliceFit>,
}

impl PeakTrack {
    /// Successful, finite fits only.
    pub fn rows(&self) -> impl Iterator<Item = &SliceFit> {
        self.fits
            .iter()
            .filter(|f| f.succeeded() && f.params.is_finite())
    }

    pub fn failed_slices(&self) -> Vec<usize> {
        self.fits
            .iter()
            .filter(|f| !f.succeeded())
            .map(|f| f.slice)
            .collect()
    }
}

/// 3D PSF parameters for one peak. Every field is NaN when the z-profile
/// fit failed.
#[derive(Copy, Clone, PartialEq, Debug)]
pub struct PsfSummary {
    /// Best-focus slice position (fractional).
    pub z0: f64,
    /// Column of the peak at `z0`.
    pub x0: f64,
    /// Row of the peak at `z0`.
    pub y0: f64,
    pub sigma_z: f64,
    pub sigma_x: f64,
    pub sigma_y: f64,
    /// Fitted profile amplitude over fitted profile offset.
    pub snr: f64,
}

impl PsfSummary {
    pub fn nan() -> Self {
        PsfSummary {
            z0: f64::NAN,
            x0: f64::NAN,
            y0: f64::NAN,
            sigma_z: f64::NAN,
            sigma_x: f64::NAN,
            sigma_y: f64::NAN,
            snr: f64::NAN,
        }
    }

    pub fn is_finite(&self) -> bool {
        [
            self.z0,
            self.x0,
            self.y0,
            self.sigma_z,
            self.sigma_x,
            self.sigma_y,
            self.snr,
        ]
        .iter()
        .all(|v| v.is_finite())
    }
}

/// Everything a pipeline run produces.
#[derive(Clone, PartialEq, Debug, Default)]
pub struct PsfReport {
    pub tracks: Vec<PeakTrack>,
    /// Blobs whose seed fit failed; excluded from `tracks` and `summaries`.
    pub unfittable: Vec<Blob>,
    /// One entry per track, same order.
    pub summaries: Vec<PsfSummary>,
}
