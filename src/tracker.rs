/// Slice-by-slice peak tracking through a stack.
///
/// Each slice is fitted in a window re-centered on the last good fit, warm
/// started from that fit. A failed warm fit is retried once from the window's
/// moments; if that fails too the slice is recorded as failed and the tracking
/// state stays where it was.

use ndarray::ArrayView3;
use num_traits::AsPrimitive;
use tracing::debug;

use crate::error::{Error, Result};
use crate::fitter::{fit_peak, FitSeed};
use crate::gaussian::ModelParams;
use crate::solver::SolverConfig;
use crate::types::SliceFit;
use crate::window::Window;

/// Track one peak over `slices` (any order, need not be contiguous).
///
/// `start` is in stack-global coordinates and fixes the model kind for the
/// whole track. Returned fits are in visiting order and stack-global
/// coordinates; failed slices carry zeroed parameters.
pub fn track<T, I>(
    stack: &ArrayView3<T>,
    slices: I,
    window_width: usize,
    start: &ModelParams,
    config: &SolverConfig,
) -> Result<Vec<SliceFit>>
where
    T: AsPrimitive<f64>,
    I: IntoIterator<Item = usize>,
{
    let (depth, rows, cols) = stack.dim();
    if depth == 0 || rows == 0 || cols == 0 {
        return Err(Error::EmptyStack(vec![depth, rows, cols]));
    }
    if window_width == 0 {
        return Err(Error::ZeroWindowWidth);
    }

    let kind = start.kind;
    let mut carried = *start;
    let mut fits = Vec::new();

    for slice in slices {
        if slice >= depth {
            return Err(Error::SliceOutOfRange { slice, depth });
        }

        let window = Window::around(carried.x0, carried.y0, window_width, (rows, cols))?;
        let (ox, oy) = window.origin();
        let data = window.extract(stack, slice);

        // move the guess into the window's frame
        let guess = carried.shifted(-ox, -oy);
        let mut fit = fit_peak(&data.view(), FitSeed::Guess(guess), config);
        let mut retried = false;

        if !fit.succeeded() {
            debug!(slice, status = ?fit.status, "warm fit failed, retrying from moments");
            fit = fit_peak(&data.view(), FitSeed::Moments(kind), config);
            retried = true;
        }

        if fit.succeeded() {
            let global = fit.params.shifted(ox, oy);
            carried = global;
            fits.push(SliceFit {
                slice,
                params: global,
                status: fit.status,
                retried,
            });
        } else {
            debug!(slice, status = ?fit.status, "slice fit failed, holding position");
            fits.push(SliceFit {
                slice,
                params: fit.params,
                status: fit.status,
                retried,
            });
        }
    }

    Ok(fits)
}
