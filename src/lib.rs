//! Gaussian PSF extraction from 3D image stacks.
//!
//! Candidate peaks from an external detector are fitted with a 2D Gaussian at
//! their brightest slice, tracked slice by slice through the stack in both
//! directions, and reduced to a 3D PSF summary by a 1D Gaussian fit of the
//! amplitude along z.
//!
//! Stacks are `(depth, row, column)` arrays. `x` is the column axis and `y`
//! the row axis throughout.

mod error;
mod fitter;
mod gaussian;
mod moments;
mod pipeline;
mod profile;
mod projection;
mod solver;
mod tracker;
mod types;
mod window;

pub mod synthetic;

pub use error::{Error, Result};
pub use fitter::{fit_peak, FitSeed};
pub use gaussian::{gauss2d, model, ModelParams};
pub use moments::{estimate_params, RasterMoments};
pub use pipeline::PsfPipeline;
pub use profile::{fit_gaussian_1d, interp, ProfileFit, ProfileFitOptions};
pub use projection::{max_projection, median_filter_3x3, BlobDetector};
pub use solver::SolverConfig;
pub use tracker::track;
pub use types::{
    Blob, FitFailure, FitResult, FitStatus, ModelKind, PeakTrack, PsfReport, PsfSummary, SliceFit,
};
pub use window::{round_half_away, Window};
