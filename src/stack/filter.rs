use ndarray::{prelude::*, Zip};
use serde::{Deserialize, Serialize};
use tracing::instrument;

use super::ChannelStacks;
use crate::error::{Error, Result};

/// Gaussian kernels are cut off at this many standard deviations.
const TRUNCATE: f64 = 4.0;

#[derive(Debug, Default, Deserialize, Serialize, Clone, Copy, PartialEq)]
pub enum FilterMethod {
    #[default]
    No,
    /// Separable Gaussian over `(frame, row, col)` of every z-level.
    /// A zero sigma leaves that axis untouched.
    Gaussian { sigma: [f64; 3] },
}

impl FilterMethod {
    pub(crate) fn validate(&self) -> Result<()> {
        if let FilterMethod::Gaussian { sigma } = self {
            if sigma.iter().any(|s| !(s.is_finite() && *s >= 0.0)) {
                return Err(Error::configuration(format!("invalid gaussian sigma {sigma:?}")));
            }
        }
        Ok(())
    }
}

/// Normalized weights of `2 * radius + 1` taps, `radius = round(4 * sigma)`.
pub fn gaussian_kernel(sigma: f64) -> Vec<f64> {
    let radius = (TRUNCATE * sigma + 0.5) as isize;
    let weights: Vec<f64> = (-radius..=radius)
        .map(|x| (-0.5 * (x * x) as f64 / (sigma * sigma)).exp())
        .collect();
    let sum: f64 = weights.iter().sum();
    weights.into_iter().map(|w| w / sum).collect()
}

/// `d c b a | a b c d | d c b a`
#[inline]
fn reflect(i: isize, n: usize) -> usize {
    let n = n as isize;
    let m = i.rem_euclid(2 * n);
    (if m < n { m } else { 2 * n - 1 - m }) as usize
}

fn correlate_axis(input: ArrayView3<f64>, axis: Axis, kernel: &[f64]) -> Array3<f64> {
    let radius = (kernel.len() / 2) as isize;
    let mut output = Array3::zeros(input.raw_dim());
    Zip::from(input.lanes(axis))
        .and(output.lanes_mut(axis))
        .par_for_each(|src, mut dst| {
            let n = src.len();
            for (i, d) in dst.iter_mut().enumerate() {
                *d = kernel
                    .iter()
                    .enumerate()
                    .map(|(k, w)| w * src[reflect(i as isize + k as isize - radius, n)])
                    .sum();
            }
        });
    output
}

/// Filters one `[z, frame, row, col]` stack, z-levels independently.
#[instrument(level = "debug", skip(stack), fields(shape = ?stack.shape()))]
pub fn filter_stack(stack: ArrayView4<f64>, filter_method: FilterMethod) -> Array4<f64> {
    let sigma = match filter_method {
        FilterMethod::No => return stack.to_owned(),
        FilterMethod::Gaussian { sigma } => sigma,
    };

    let mut filtered = Array4::zeros(stack.raw_dim());
    for (depth, mut out) in stack.outer_iter().zip(filtered.outer_iter_mut()) {
        let mut volume = depth.to_owned();
        for (axis, &s) in sigma.iter().enumerate() {
            if s > 1e-15 {
                volume = correlate_axis(volume.view(), Axis(axis), &gaussian_kernel(s));
            }
        }
        out.assign(&volume);
    }
    filtered
}

#[instrument(skip(stacks), err)]
pub fn filter_stacks(stacks: &ChannelStacks, filter_method: FilterMethod) -> Result<ChannelStacks> {
    filter_method.validate()?;
    ChannelStacks::new(
        filter_stack(stacks.calcium.view(), filter_method),
        filter_stack(stacks.structural.view(), filter_method),
    )
}
