use ndarray::prelude::*;

use super::{
    fft::{fftfreq, phase, Fft2},
    Shift,
};

/// Translates `image` by `shift` (`out(x) = in(x - shift)`, periodic) with a
/// phase ramp in the frequency domain, keeping the real part.
pub fn apply_shift(image: ArrayView2<f64>, shift: Shift) -> Array2<f64> {
    shift_with(&Fft2::new(image.dim()), image, shift)
}

pub(super) fn shift_with(fft2: &Fft2, image: ArrayView2<f64>, shift: Shift) -> Array2<f64> {
    if shift.row == 0.0 && shift.col == 0.0 {
        return image.to_owned();
    }
    let (nrows, ncols) = fft2.dim();
    let row_freq = fftfreq(nrows, 1.0);
    let col_freq = fftfreq(ncols, 1.0);

    let mut freq = fft2.forward(image);
    for ((r, c), v) in freq.indexed_iter_mut() {
        *v *= phase(shift.row * row_freq[r] + shift.col * col_freq[c]);
    }
    fft2.inverse(freq).mapv(|v| v.re)
}
