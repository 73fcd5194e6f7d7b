/// Depth projections used as detector input, and the detector seam itself.

use ndarray::{Array2, ArrayView2, ArrayView3, Axis};
use num_traits::AsPrimitive;
use rayon::prelude::*;

use crate::types::Blob;

/// Source of candidate peaks for a projected image.
///
/// Detection is not part of this crate; anything that maps a 2D projection
/// to blobs can be plugged in, including plain closures.
pub trait BlobDetector {
    fn detect(&self, projection: ArrayView2<f64>) -> Vec<Blob>;
}

impl<F> BlobDetector for F
where
    F: Fn(ArrayView2<f64>) -> Vec<Blob>,
{
    fn detect(&self, projection: ArrayView2<f64>) -> Vec<Blob> {
        self(projection)
    }
}

/// Maximum over depth for every (row, column). Rows are processed in parallel.
/// A stack with no slices projects to -inf.
pub fn max_projection<T>(stack: &ArrayView3<T>) -> Array2<f64>
where
    T: AsPrimitive<f64> + Sync,
{
    let (_, rows, cols) = stack.dim();
    let mut out = Array2::from_elem((rows, cols), f64::NEG_INFINITY);
    out.axis_iter_mut(Axis(0))
        .into_par_iter()
        .enumerate()
        .for_each(|(r, mut row)| {
            for plane in stack.outer_iter() {
                for (o, &v) in row.iter_mut().zip(plane.row(r).iter()) {
                    let v: f64 = v.as_();
                    if v > *o {
                        *o = v;
                    }
                }
            }
        });
    out
}

/// 3×3 median filter. Edges are mirrored (the border pixel is repeated).
pub fn median_filter_3x3(image: &ArrayView2<f64>) -> Array2<f64> {
    let (rows, cols) = image.dim();
    let mut out = Array2::zeros((rows, cols));
    if rows == 0 || cols == 0 {
        return out;
    }

    out.axis_iter_mut(Axis(0))
        .into_par_iter()
        .enumerate()
        .for_each(|(r, mut row)| {
            let mut neighbourhood = [0.0_f64; 9];
            for c in 0..cols {
                let mut k = 0;
                for dr in [-1_i64, 0, 1] {
                    let rr = (r as i64 + dr).clamp(0, rows as i64 - 1) as usize;
                    for dc in [-1_i64, 0, 1] {
                        let cc = (c as i64 + dc).clamp(0, cols as i64 - 1) as usize;
                        neighbourhood[k] = image[[rr, cc]];
                        k += 1;
                    }
                }
                neighbourhood.sort_unstable_by(|a, b| a.total_cmp(b));
                row[c] = neighbourhood[4];
            }
        });
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{array, Array3};

    #[test]
    fn test_max_projection() {
        let mut stack = Array3::<u16>::zeros((4, 3, 5));
        stack[[2, 1, 3]] = 900;
        stack[[0, 1, 3]] = 40;
        stack[[3, 0, 0]] = 7;
        let proj = max_projection(&stack.view());
        assert_eq!(proj.dim(), (3, 5));
        assert_eq!(proj[[1, 3]], 900.0);
        assert_eq!(proj[[0, 0]], 7.0);
        assert_eq!(proj[[2, 4]], 0.0);
    }

    #[test]
    fn test_median_removes_hot_pixel() {
        let mut image = Array2::from_elem((6, 6), 10.0);
        image[[2, 3]] = 5000.0;
        let filtered = median_filter_3x3(&image.view());
        assert!(filtered.iter().all(|&v| v == 10.0));
    }

    #[test]
    fn test_median_edges() {
        let image = array![[1.0, 2.0, 3.0], [4.0, 5.0, 6.0], [7.0, 8.0, 9.0]];
        let filtered = median_filter_3x3(&image.view());
        // corner window with mirrored edges: 1 1 2 / 1 1 2 / 4 4 5
        assert_eq!(filtered[[0, 0]], 2.0);
        assert_eq!(filtered[[1, 1]], 5.0);
        assert_eq!(filtered[[2, 2]], 8.0);
    }

    fn single_blob(proj: ArrayView2<f64>) -> Vec<Blob> {
        vec![Blob {
            row: 1.0,
            column: 2.0,
            window_width: 5.0,
            amplitude: proj[[1, 2]],
        }]
    }

    #[test]
    fn test_fn_detector() {
        let image = Array2::from_elem((3, 3), 4.0);
        let blobs = single_blob.detect(image.view());
        assert_eq!(blobs.len(), 1);
        assert_eq!(blobs[0].amplitude, 4.0);
    }
}
