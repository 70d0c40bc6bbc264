use std::{f64::consts::PI, sync::Arc};

use ndarray::prelude::*;
use rustfft::{num_complex::Complex64, Fft, FftPlanner};

/// Planned 2-D transforms of one image shape, shareable across threads.
/// The inverse is normalized by `1 / (nrows * ncols)`.
pub struct Fft2 {
    dim: (usize, usize),
    row_forward: Arc<dyn Fft<f64>>,
    col_forward: Arc<dyn Fft<f64>>,
    row_inverse: Arc<dyn Fft<f64>>,
    col_inverse: Arc<dyn Fft<f64>>,
}

impl Fft2 {
    pub fn new((nrows, ncols): (usize, usize)) -> Fft2 {
        let mut planner = FftPlanner::new();
        Fft2 {
            dim: (nrows, ncols),
            row_forward: planner.plan_fft_forward(ncols),
            col_forward: planner.plan_fft_forward(nrows),
            row_inverse: planner.plan_fft_inverse(ncols),
            col_inverse: planner.plan_fft_inverse(nrows),
        }
    }

    pub fn dim(&self) -> (usize, usize) {
        self.dim
    }

    pub fn forward(&self, image: ArrayView2<f64>) -> Array2<Complex64> {
        let mut data = image.map(|&v| Complex64::new(v, 0.0));
        transform(&mut data, &*self.row_forward, &*self.col_forward);
        data
    }

    pub fn inverse(&self, mut data: Array2<Complex64>) -> Array2<Complex64> {
        transform(&mut data, &*self.row_inverse, &*self.col_inverse);
        let scale = 1.0 / (self.dim.0 * self.dim.1) as f64;
        data.mapv_inplace(|v| v * scale);
        data
    }
}

/// Rows first, then columns through a transposed copy so both passes run on
/// contiguous buffers.
fn transform(data: &mut Array2<Complex64>, row_fft: &dyn Fft<f64>, col_fft: &dyn Fft<f64>) {
    if !data.is_standard_layout() {
        *data = data.as_standard_layout().into_owned();
    }
    if let Some(buf) = data.as_slice_mut() {
        row_fft.process(buf);
    }
    let mut transposed = data.t().as_standard_layout().into_owned();
    if let Some(buf) = transposed.as_slice_mut() {
        col_fft.process(buf);
    }
    data.assign(&transposed.t());
}

/// Sample frequencies of an `n`-point transform with spacing `d`:
/// `[0, 1, ..., (n - 1) / 2, -(n / 2), ..., -1] / (d * n)`.
pub fn fftfreq(n: usize, d: f64) -> Array1<f64> {
    let scale = 1.0 / (d * n as f64);
    Array1::from_shape_fn(n, |k| {
        let k = if k <= (n - 1) / 2 {
            k as f64
        } else {
            k as f64 - n as f64
        };
        k * scale
    })
}

/// `exp(-2πi·x)`
#[inline]
pub fn phase(x: f64) -> Complex64 {
    Complex64::from_polar(1.0, -2.0 * PI * x)
}
