use ndarray::{par_azip, prelude::*};
use serde::{Deserialize, Serialize};
use tracing::{info, instrument};

use crate::{
    daq::PiezoOnset,
    error::{Error, Result},
    postproc::nan_mean,
    stack::ChannelStacks,
};

/// Minimal intensities for a pixel to enter the ratio, ΔF/F and ΔR/R maps.
/// Comparisons are inclusive.
#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq)]
pub struct Thresholds {
    pub calcium: f64,
    pub structural: f64,
    pub ratio: f64,
}

impl Thresholds {
    pub(crate) fn validate(&self) -> Result<()> {
        for (name, v) in [
            ("calcium", self.calcium),
            ("structural", self.structural),
            ("ratio", self.ratio),
        ] {
            if !(v.is_finite() && v >= 0.0) {
                return Err(Error::configuration(format!("invalid {name} threshold {v}")));
            }
        }
        Ok(())
    }
}

/// Frame counts averaged after (`response`) and before (`baseline`) each onset.
#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq)]
pub struct ResponseWindows {
    pub response: usize,
    pub baseline: usize,
}

impl ResponseWindows {
    pub(crate) fn validate(&self) -> Result<()> {
        if self.response == 0 || self.baseline == 0 {
            return Err(Error::configuration(format!(
                "response window {} and baseline window {} must be positive",
                self.response, self.baseline
            )));
        }
        Ok(())
    }
}

/// Per z-level maps, each `[z, row, col]`. Masked pixels are NAN.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseMaps {
    pub structural_response: Array3<f64>,
    pub calcium_response: Array3<f64>,
    pub structural_baseline: Array3<f64>,
    pub calcium_baseline: Array3<f64>,
    pub ratio_response: Array3<f64>,
    pub ratio_baseline: Array3<f64>,
    pub delta_f_over_f: Array3<f64>,
    pub delta_r_over_r: Array3<f64>,
}

/// Mean of frames `[start, end)` of every z-level, averaged over the onsets.
fn window_mean(
    stack: &Array4<f64>,
    onsets: [usize; 2],
    what: &'static str,
    window: impl Fn(usize) -> (isize, isize),
    offset: f64,
) -> Result<Array3<f64>> {
    let (depth_count, nframes, nrows, ncols) = stack.dim();
    let mut mean = Array3::zeros((depth_count, nrows, ncols));
    for onset in onsets {
        let (start, end) = window(onset);
        if start < 0 || end as usize > nframes {
            return Err(Error::WindowOutOfRange {
                what,
                start,
                end,
                nframes,
            });
        }
        let frames = stack.slice(s![.., start..end, .., ..]);
        let window_mean = frames
            .mean_axis(Axis(1))
            .ok_or(Error::WindowOutOfRange {
                what,
                start,
                end,
                nframes,
            })?;
        mean += &window_mean;
    }
    mean.mapv_inplace(|v| v / onsets.len() as f64 - offset);
    Ok(mean)
}

/// Smallest non-NAN value, zero for an all-NAN stack.
fn min_value(stack: &Array4<f64>) -> f64 {
    let min = stack.iter().fold(f64::INFINITY, |m, &v| m.min(v));
    if min.is_finite() {
        min
    } else {
        0.0
    }
}

/// Builds response, baseline, ratio, ΔF/F and ΔR/R maps around both onsets.
///
/// With `subtract_minimum` each channel is first offset by its global minimum,
/// the input stacks stay untouched.
#[instrument(skip(stacks), fields(dim = ?stacks.dim()), err)]
pub fn build_response_maps(
    stacks: &ChannelStacks,
    onset: &PiezoOnset,
    windows: ResponseWindows,
    thresholds: Thresholds,
    subtract_minimum: bool,
) -> Result<ResponseMaps> {
    windows.validate()?;
    thresholds.validate()?;
    if stacks.calcium.shape() != stacks.structural.shape() {
        return Err(Error::shape_mismatch(
            "calcium and structural stacks",
            stacks.calcium.shape(),
            stacks.structural.shape(),
        ));
    }

    let (calcium_offset, structural_offset) = if subtract_minimum {
        (min_value(&stacks.calcium), min_value(&stacks.structural))
    } else {
        (0.0, 0.0)
    };
    info!(calcium_offset, structural_offset);

    let onsets = onset.volumes();
    let response = |o: usize| (o as isize, (o + windows.response) as isize);
    let baseline = |o: usize| (o as isize - windows.baseline as isize, o as isize);

    let structural_response =
        window_mean(&stacks.structural, onsets, "response", response, structural_offset)?;
    let calcium_response =
        window_mean(&stacks.calcium, onsets, "response", response, calcium_offset)?;
    let structural_baseline =
        window_mean(&stacks.structural, onsets, "baseline", baseline, structural_offset)?;
    let calcium_baseline =
        window_mean(&stacks.calcium, onsets, "baseline", baseline, calcium_offset)?;

    let Thresholds {
        calcium: calcium_threshold,
        structural: structural_threshold,
        ratio: ratio_threshold,
    } = thresholds;

    let dim = calcium_baseline.raw_dim();
    let mut ratio_response = Array3::from_elem(dim, f64::NAN);
    let mut ratio_baseline = Array3::from_elem(dim, f64::NAN);
    par_azip!((
        rr in &mut ratio_response,
        rb in &mut ratio_baseline,
        &sr in &structural_response,
        &sb in &structural_baseline,
        &cr in &calcium_response,
        &cb in &calcium_baseline
    ) {
        if sr >= structural_threshold && sb >= structural_threshold {
            *rr = cr / sr;
            *rb = cb / sb;
        }
    });

    let mut delta_f_over_f = Array3::from_elem(dim, f64::NAN);
    par_azip!((d in &mut delta_f_over_f, &cr in &calcium_response, &cb in &calcium_baseline) {
        if cb >= calcium_threshold {
            *d = (cr - cb) / cb;
        }
    });

    let mut delta_r_over_r = Array3::from_elem(dim, f64::NAN);
    par_azip!((
        d in &mut delta_r_over_r,
        &rr in &ratio_response,
        &rb in &ratio_baseline,
        &cb in &calcium_baseline
    ) {
        if rb >= ratio_threshold && cb >= calcium_threshold {
            *d = (rr - rb) / rb;
        }
    });

    info!(
        delta_f_over_f_mean = nan_mean(delta_f_over_f.view()),
        delta_r_over_r_mean = nan_mean(delta_r_over_r.view()),
    );

    Ok(ResponseMaps {
        structural_response,
        calcium_response,
        structural_baseline,
        calcium_baseline,
        ratio_response,
        ratio_baseline,
        delta_f_over_f,
        delta_r_over_r,
    })
}
