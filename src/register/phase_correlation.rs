use ndarray::prelude::*;
use rustfft::num_complex::Complex64;

use super::{
    fft::{fftfreq, phase, Fft2},
    Shift,
};
use crate::error::{Error, Result};

/// Rejects images that carry no registrable signal.
pub(super) fn check_image(image: ArrayView2<f64>) -> Result<()> {
    let (min, max) = image
        .iter()
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(min, max), &v| {
            (min.min(v), max.max(v))
        });
    if image.iter().any(|v| !v.is_finite()) {
        return Err(Error::NumericalDegeneracy("non-finite pixel".to_owned()));
    }
    if max <= min {
        return Err(Error::NumericalDegeneracy("constant image".to_owned()));
    }
    Ok(())
}

/// Phase correlation against one fixed reference, refined to `1 / upsample_factor`
/// pixel by an upsampled DFT around the integer peak.
pub struct ShiftEstimator<'a> {
    fft2: &'a Fft2,
    reference: Array2<Complex64>,
    upsample_factor: usize,
}

impl<'a> ShiftEstimator<'a> {
    pub fn new(
        fft2: &'a Fft2,
        reference: ArrayView2<f64>,
        upsample_factor: usize,
    ) -> Result<ShiftEstimator<'a>> {
        if reference.dim() != fft2.dim() {
            return Err(Error::shape_mismatch(
                "reference and transform",
                reference.shape(),
                &[fft2.dim().0, fft2.dim().1],
            ));
        }
        if upsample_factor == 0 {
            return Err(Error::configuration("upsample_factor can not be zero"));
        }
        check_image(reference)?;
        Ok(ShiftEstimator {
            fft2,
            reference: fft2.forward(reference),
            upsample_factor,
        })
    }

    /// Shift that registers `moving` onto the reference when applied to `moving`.
    pub fn estimate(&self, moving: ArrayView2<f64>) -> Result<Shift> {
        if moving.dim() != self.fft2.dim() {
            return Err(Error::shape_mismatch(
                "reference and moving image",
                self.reference.shape(),
                moving.shape(),
            ));
        }
        check_image(moving)?;

        let (nrows, ncols) = self.fft2.dim();
        let eps = 100.0 * f64::EPSILON;
        let mut product = self.fft2.forward(moving);
        azip!((p in &mut product, &r in &self.reference) {
            let v = r * p.conj();
            *p = v / v.norm().max(eps);
        });

        let correlation = self.fft2.inverse(product.clone());
        let (peak_row, peak_col) = argmax_norm(correlation.view());
        let mut row = wrap(peak_row, nrows);
        let mut col = wrap(peak_col, ncols);

        if self.upsample_factor > 1 {
            let u = self.upsample_factor as f64;
            let region = (1.5 * u).ceil() as usize;
            let center = (region / 2) as f64;
            product.mapv_inplace(|v| v.conj());
            let upsampled = upsampled_dft(
                product.view(),
                region,
                u,
                (center - row * u, center - col * u),
            );
            let (r, c) = argmax_norm(upsampled.view());
            row += (r as f64 - center) / u;
            col += (c as f64 - center) / u;
        }

        if nrows == 1 {
            row = 0.0;
        }
        if ncols == 1 {
            col = 0.0;
        }
        Ok(Shift { row, col })
    }
}

/// Peaks past the middle of an axis are negative shifts.
fn wrap(index: usize, n: usize) -> f64 {
    if index > n / 2 {
        index as f64 - n as f64
    } else {
        index as f64
    }
}

/// First position of the largest magnitude in row-major order.
fn argmax_norm(data: ArrayView2<Complex64>) -> (usize, usize) {
    let mut best = ((0, 0), f64::NEG_INFINITY);
    for (idx, v) in data.indexed_iter() {
        let norm = v.norm();
        if norm > best.1 {
            best = (idx, norm);
        }
    }
    best.0
}

/// Matrix-multiply DFT of `data` evaluated on a `region x region` grid with
/// `1 / upsample_factor` spacing, the grid origin placed at `offsets`.
fn upsampled_dft(
    data: ArrayView2<Complex64>,
    region: usize,
    upsample_factor: f64,
    offsets: (f64, f64),
) -> Array2<Complex64> {
    let kernel = |n: usize, offset: f64| {
        let freq = fftfreq(n, upsample_factor);
        Array2::from_shape_fn((region, n), |(i, k)| phase((i as f64 - offset) * freq[k]))
    };
    let row_kernel = kernel(data.nrows(), offsets.0);
    let col_kernel = kernel(data.ncols(), offsets.1);
    // The conjugated input yields the conjugated correlation, same magnitudes.
    row_kernel.dot(&data).dot(&col_kernel.t())
}

/// Shift that registers `moving` onto `reference`, to `1 / upsample_factor` pixel.
pub fn estimate_shift(
    reference: ArrayView2<f64>,
    moving: ArrayView2<f64>,
    upsample_factor: usize,
) -> Result<Shift> {
    if reference.dim() != moving.dim() {
        return Err(Error::shape_mismatch(
            "reference and moving image",
            reference.shape(),
            moving.shape(),
        ));
    }
    let fft2 = Fft2::new(reference.dim());
    ShiftEstimator::new(&fft2, reference, upsample_factor)?.estimate(moving)
}
