/// Rectangular fitting windows clipped to the stack bounds.

use std::ops::Range;

use ndarray::{s, Array2, ArrayView3};
use num_traits::AsPrimitive;

use crate::error::{Error, Result};

/// Half-open row/column ranges of one window.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Window {
    pub row_start: usize,
    pub row_end: usize,
    pub col_start: usize,
    pub col_end: usize,
}

impl Window {
    /// Window of `width` pixels around (`row`, `col`).
    ///
    /// The low side spans `width / 2` pixels and the high side the remainder;
    /// each bound is then clipped independently to `[0, dim - 1]`, so windows
    /// at the stack edge shrink asymmetrically and never include the last
    /// row or column.
    pub fn centered(row: i64, col: i64, width: usize, shape: (usize, usize)) -> Result<Self> {
        if width == 0 {
            return Err(Error::ZeroWindowWidth);
        }
        let (rows, cols) = shape;
        if rows == 0 || cols == 0 {
            return Err(Error::EmptyStack(vec![rows, cols]));
        }
        let (row_start, row_end) = clip_axis(row, width, rows);
        let (col_start, col_end) = clip_axis(col, width, cols);
        Ok(Window {
            row_start,
            row_end,
            col_start,
            col_end,
        })
    }

    /// Window around a fractional (column, row) position, rounding half away from zero.
    pub fn around(x: f64, y: f64, width: usize, shape: (usize, usize)) -> Result<Self> {
        Self::centered(round_half_away(y), round_half_away(x), width, shape)
    }

    pub fn rows(&self) -> Range<usize> {
        self.row_start..self.row_end
    }

    pub fn cols(&self) -> Range<usize> {
        self.col_start..self.col_end
    }

    pub fn height(&self) -> usize {
        self.row_end - self.row_start
    }

    pub fn width(&self) -> usize {
        self.col_end - self.col_start
    }

    pub fn is_empty(&self) -> bool {
        self.height() == 0 || self.width() == 0
    }

    /// Stack-global (x, y) of the window's local origin.
    pub fn origin(&self) -> (f64, f64) {
        (self.col_start as f64, self.row_start as f64)
    }

    /// Copy this window out of one slice as f64. The stack is only read.
    pub fn extract<T>(&self, stack: &ArrayView3<T>, slice: usize) -> Array2<f64>
    where
        T: AsPrimitive<f64>,
    {
        stack
            .slice(s![slice, self.rows(), self.cols()])
            .mapv(|v| v.as_())
    }

    /// Per-slice sum of the window across the whole stack depth.
    pub fn slice_sums<T>(&self, stack: &ArrayView3<T>) -> Vec<f64>
    where
        T: AsPrimitive<f64>,
    {
        stack
            .slice(s![.., self.rows(), self.cols()])
            .outer_iter()
            .map(|plane| plane.iter().map(|&v| v.as_()).sum::<f64>())
            .collect()
    }
}

/// `f64::round` semantics: halves go away from zero. Non-finite input maps to 0.
pub fn round_half_away(v: f64) -> i64 {
    if v.is_finite() {
        v.round() as i64
    } else {
        0
    }
}

fn clip_axis(center: i64, width: usize, dim: usize) -> (usize, usize) {
    let half_lo = (width / 2) as i64;
    // we need two halves for uneven widths
    let half_hi = width as i64 - half_lo;
    let last = dim as i64 - 1;
    let start = (center - half_lo).clamp(0, last);
    let end = (center + half_hi).clamp(0, last);
    (start as usize, end.max(start) as usize)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array3;

    #[test]
    fn test_interior_window() {
        let w = Window::centered(30, 20, 15, (64, 64)).unwrap();
        assert_eq!(w.rows(), 23..38);
        assert_eq!(w.cols(), 13..28);
        assert_eq!((w.height(), w.width()), (15, 15));

        let even = Window::centered(30, 20, 10, (64, 64)).unwrap();
        assert_eq!(even.rows(), 25..35);
    }

    #[test]
    fn test_edge_clipping() {
        let w = Window::centered(0, 2, 11, (40, 50)).unwrap();
        assert_eq!(w.row_start, 0);
        assert_eq!(w.row_end, 6);
        assert_eq!(w.col_start, 0);
        assert_eq!(w.col_end, 8);

        let far = Window::centered(39, 49, 11, (40, 50)).unwrap();
        assert_eq!(far.row_start, 34);
        assert_eq!(far.row_end, 39);
        assert_eq!(far.col_start, 44);
        assert_eq!(far.col_end, 49);
    }

    #[test]
    fn test_outside_is_empty_not_negative() {
        let w = Window::centered(-100, 500, 9, (32, 32)).unwrap();
        assert!(w.is_empty());
        assert!(w.row_end <= 31 && w.col_end <= 31);
        assert!(w.row_start <= w.row_end && w.col_start <= w.col_end);
    }

    #[test]
    fn test_invalid_inputs() {
        assert_eq!(
            Window::centered(5, 5, 0, (10, 10)),
            Err(Error::ZeroWindowWidth)
        );
        assert!(matches!(
            Window::centered(5, 5, 3, (0, 10)),
            Err(Error::EmptyStack(_))
        ));
    }

    #[test]
    fn test_rounding() {
        assert_eq!(round_half_away(2.5), 3);
        assert_eq!(round_half_away(-2.5), -3);
        assert_eq!(round_half_away(2.49), 2);
        assert_eq!(round_half_away(f64::NAN), 0);
        let w = Window::around(10.5, 3.4, 5, (20, 20)).unwrap();
        assert_eq!(w.rows(), 1..6);
        assert_eq!(w.cols(), 9..14);
    }

    #[test]
    fn test_extract_and_sums() {
        let stack = Array3::<u16>::from_shape_fn((3, 8, 8), |(z, r, c)| (z * 100 + r * 8 + c) as u16);
        let w = Window::centered(4, 4, 2, (8, 8)).unwrap();
        let plane = w.extract(&stack.view(), 2);
        assert_eq!(plane.dim(), (2, 2));
        assert_eq!(plane[[0, 0]], (200 + 3 * 8 + 3) as f64);
        let sums = w.slice_sums(&stack.view());
        assert_eq!(sums.len(), 3);
        assert!(sums[2] > sums[1] && sums[1] > sums[0]);
    }
}
