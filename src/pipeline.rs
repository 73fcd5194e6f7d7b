/// Per-blob PSF extraction: seed fit at best focus, bidirectional tracking,
/// z-profile aggregation.

use std::ops::RangeInclusive;

use ndarray::ArrayView3;
use num_traits::AsPrimitive;
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::fitter::{fit_peak, FitSeed};
use crate::profile::{fit_gaussian_1d, interp, ProfileFitOptions};
use crate::projection::{max_projection, median_filter_3x3, BlobDetector};
use crate::solver::SolverConfig;
use crate::tracker::track;
use crate::types::{Blob, ModelKind, PeakTrack, PsfReport, PsfSummary, SliceFit};
use crate::window::Window;

/// Pipeline settings (internal).
struct PipelineConfig {
    window_width: usize,
    model: ModelKind,
    solver: SolverConfig,
    profile: ProfileFitOptions,
    slice_range: Option<RangeInclusive<usize>>,
    projection_median: bool,
}

/// PSF pipeline with builder pattern.
pub struct PsfPipeline {
    config: PipelineConfig,
}

impl Default for PsfPipeline {
    fn default() -> Self {
        Self::new()
    }
}

impl PsfPipeline {
    pub fn new() -> Self {
        PsfPipeline {
            config: PipelineConfig {
                window_width: 15,
                model: ModelKind::Full,
                solver: SolverConfig::default(),
                profile: ProfileFitOptions::default(),
                slice_range: None,
                projection_median: true,
            },
        }
    }

    /// Side length of the fitting window in pixels. Zero is rejected when run.
    pub fn with_window_width(mut self, width: usize) -> Self {
        self.config.window_width = width;
        self
    }

    /// Model used for seed fits; tracks keep it throughout.
    pub fn with_model(mut self, kind: ModelKind) -> Self {
        self.config.model = kind;
        self
    }

    pub fn with_solver(mut self, solver: SolverConfig) -> Self {
        self.config.solver = solver;
        self
    }

    /// Options for the 1D fit along z.
    pub fn with_profile_fit(mut self, options: ProfileFitOptions) -> Self {
        self.config.profile = options;
        self
    }

    /// Only aggregate slices in this inclusive range. Tracking still spans the full depth.
    pub fn with_slice_range(mut self, range: RangeInclusive<usize>) -> Self {
        self.config.slice_range = Some(range);
        self
    }

    /// Median-filter the max projection before detection (default on).
    pub fn with_projection_median(mut self, enabled: bool) -> Self {
        self.config.projection_median = enabled;
        self
    }

    /// Project the stack, detect blobs on the projection and run on them.
    pub fn run_with_detector<T, D>(&self, stack: &ArrayView3<T>, detector: &D) -> Result<PsfReport>
    where
        T: AsPrimitive<f64> + Sync,
        D: BlobDetector + ?Sized,
    {
        let mut projection = max_projection(stack);
        if self.config.projection_median {
            projection = median_filter_3x3(&projection.view());
        }
        let blobs = detector.detect(projection.view());
        debug!(blobs = blobs.len(), "detector finished");
        self.run(stack, &blobs)
    }

    /// Track every blob and summarize each track.
    ///
    /// Per-peak problems never abort the run: unfittable blobs are listed in
    /// the report and failed z-profile fits give NaN summaries. Only invalid
    /// input is an error.
    pub fn run<T>(&self, stack: &ArrayView3<T>, blobs: &[Blob]) -> Result<PsfReport>
    where
        T: AsPrimitive<f64>,
    {
        let (tracks, unfittable) = self.fit_peaks(stack, blobs)?;
        let summaries = self.psf_params(&tracks)?;
        Ok(PsfReport {
            tracks,
            unfittable,
            summaries,
        })
    }

    /// Tracks for all fittable blobs, plus the blobs that could not be seeded.
    pub fn fit_peaks<T>(&self, stack: &ArrayView3<T>, blobs: &[Blob]) -> Result<(Vec<PeakTrack>, Vec<Blob>)>
    where
        T: AsPrimitive<f64>,
    {
        let mut tracks = Vec::with_capacity(blobs.len());
        let mut unfittable = Vec::new();
        for blob in blobs {
            match self.fit_blob(stack, blob)? {
                Some(t) => tracks.push(t),
                None => unfittable.push(*blob),
            }
        }
        Ok((tracks, unfittable))
    }

    /// Seed-fit `blob` at its brightest slice and track it through the stack.
    ///
    /// Returns `None` when the seed fit fails.
    pub fn fit_blob<T>(&self, stack: &ArrayView3<T>, blob: &Blob) -> Result<Option<PeakTrack>>
    where
        T: AsPrimitive<f64>,
    {
        let (depth, rows, cols) = stack.dim();
        if depth == 0 || rows == 0 || cols == 0 {
            return Err(Error::EmptyStack(vec![depth, rows, cols]));
        }
        let width = self.config.window_width;
        let window = Window::around(blob.column, blob.row, width, (rows, cols))?;
        let seed_slice = brightest_slice(&window.slice_sums(stack));

        let data = window.extract(stack, seed_slice);
        let seed = fit_peak(&data.view(), FitSeed::Moments(self.config.model), &self.config.solver);
        if !seed.succeeded() || !seed.params.is_finite() {
            warn!(
                row = blob.row,
                column = blob.column,
                slice = seed_slice,
                status = ?seed.status,
                "blob is unfittable"
            );
            return Ok(None);
        }

        let (ox, oy) = window.origin();
        let start = seed.params.shifted(ox, oy);
        let solver = &self.config.solver;

        let mut fits = Vec::with_capacity(depth);
        fits.push(SliceFit {
            slice: seed_slice,
            params: start,
            status: seed.status,
            retried: false,
        });
        fits.extend(track(stack, seed_slice + 1..depth, width, &start, solver)?);
        fits.extend(track(stack, (0..seed_slice).rev(), width, &start, solver)?);
        fits.sort_by_key(|f| f.slice);
        for f in fits.iter_mut() {
            f.params = f.params.with_abs_widths();
        }

        let failed = fits.iter().filter(|f| !f.succeeded()).count();
        debug!(
            row = blob.row,
            column = blob.column,
            seed_slice,
            failed,
            "blob tracked"
        );

        Ok(Some(PeakTrack {
            blob: *blob,
            seed_slice,
            fits,
        }))
    }

    /// One summary per track, same order.
    pub fn psf_params(&self, tracks: &[PeakTrack]) -> Result<Vec<PsfSummary>> {
        tracks.iter().map(|t| self.summarize(t)).collect()
    }

    /// Locate best focus from the amplitude profile and interpolate the
    /// lateral parameters there.
    ///
    /// Only successful, finite slice fits enter the z-profile: a failed
    /// slice's zeroed parameters are a sentinel, not a measurement, and never
    /// reach the 1D fit or the interpolation. Widths are taken as magnitudes.
    /// If the profile fit fails every field is NaN.
    pub fn summarize(&self, track: &PeakTrack) -> Result<PsfSummary> {
        let mut rows: Vec<&SliceFit> = track
            .rows()
            .filter(|f| match &self.config.slice_range {
                Some(range) => range.contains(&f.slice),
                None => true,
            })
            .collect();
        rows.sort_by_key(|f| f.slice);

        let z: Vec<f64> = rows.iter().map(|f| f.slice as f64).collect();
        let amp: Vec<f64> = rows.iter().map(|f| f.params.amplitude).collect();
        let x: Vec<f64> = rows.iter().map(|f| f.params.x0).collect();
        let y: Vec<f64> = rows.iter().map(|f| f.params.y0).collect();
        let sx: Vec<f64> = rows.iter().map(|f| f.params.sigma_x.abs()).collect();
        let sy: Vec<f64> = rows.iter().map(|f| f.params.sigma_y.abs()).collect();

        let profile = fit_gaussian_1d(&z, &amp, &self.config.profile, &self.config.solver)?;
        if !profile.is_finite() {
            debug!(
                row = track.blob.row,
                column = track.blob.column,
                samples = z.len(),
                "z-profile fit failed"
            );
            return Ok(PsfSummary::nan());
        }

        let z0 = profile.center;
        Ok(PsfSummary {
            z0,
            x0: interp(z0, &z, &x),
            y0: interp(z0, &z, &y),
            sigma_z: profile.sigma.abs(),
            sigma_x: interp(z0, &z, &sx),
            sigma_y: interp(z0, &z, &sy),
            snr: profile.amplitude / profile.offset,
        })
    }
}

/// Index of the first maximum. NaN sums never win.
fn brightest_slice(sums: &[f64]) -> usize {
    let mut best = 0;
    for (i, &s) in sums.iter().enumerate() {
        if s > sums[best] || (sums[best].is_nan() && !s.is_nan()) {
            best = i;
        }
    }
    best
}
