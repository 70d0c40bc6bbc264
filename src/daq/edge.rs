use ndarray::{Array1, ArrayView1};
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use super::EventSeries;
use crate::error::{Error, Result};

/// Peak constraints, all in sample units. A peak must satisfy every one of them.
#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq)]
pub struct PeakParam {
    /// Minimal peak value.
    pub height: f64,
    /// Minimal width measured at half prominence.
    pub width: f64,
    /// Minimal distance between neighbouring peaks, the taller one survives.
    pub distance: usize,
}

impl PeakParam {
    pub(crate) fn validate(&self, name: &str) -> Result<()> {
        if !self.height.is_finite() {
            return Err(Error::configuration(format!(
                "{name}: invalid height {}",
                self.height
            )));
        }
        if !(self.width.is_finite() && self.width >= 0.0) {
            return Err(Error::configuration(format!(
                "{name}: invalid width {}",
                self.width
            )));
        }
        if self.distance == 0 {
            return Err(Error::configuration(format!(
                "{name}: distance can not be zero"
            )));
        }
        Ok(())
    }
}

/// Box average over `window_width` samples keeping only fully overlapped positions,
/// so the output has `len - window_width + 1` samples.
pub fn moving_average(signal: ArrayView1<f64>, window_width: usize) -> Array1<f64> {
    if window_width <= 1 {
        return signal.to_owned();
    }
    if signal.len() < window_width {
        return Array1::zeros(0);
    }
    let w = window_width as f64;
    signal
        .windows(window_width)
        .into_iter()
        .map(|window| window.sum() / w)
        .collect()
}

/// Smooth (when `window_width > 1`), differentiate, then pick peaks of the difference.
/// Returned indices point into the differenced signal.
#[instrument(level = "debug", skip(signal), fields(len = signal.len()))]
pub fn detect_edges(signal: ArrayView1<f64>, window_width: usize, param: PeakParam) -> EventSeries {
    let smoothed = moving_average(signal, window_width);
    let diff: Vec<f64> = smoothed
        .iter()
        .zip(smoothed.iter().skip(1))
        .map(|(a, b)| b - a)
        .collect();
    let peaks = find_peaks(&diff, param);
    debug!(npeaks = peaks.len());
    EventSeries(peaks)
}

/// Local maxima of `x` filtered by height, then distance, then width at half prominence.
pub fn find_peaks(x: &[f64], param: PeakParam) -> Vec<usize> {
    let peaks: Vec<usize> = local_maxima(x)
        .into_iter()
        .filter(|&p| x[p] >= param.height)
        .collect();
    let peaks = select_by_distance(x, peaks, param.distance);
    peaks
        .into_iter()
        .filter(|&p| {
            let (prominence, left_base, right_base) = prominence(x, p);
            peak_width(x, p, prominence, left_base, right_base) >= param.width
        })
        .collect()
}

/// Flat peaks resolve to their middle sample (rounded down).
fn local_maxima(x: &[f64]) -> Vec<usize> {
    let mut peaks = Vec::new();
    if x.len() < 3 {
        return peaks;
    }
    let i_max = x.len() - 1;
    let mut i = 1;
    while i < i_max {
        if x[i - 1] < x[i] {
            let mut i_ahead = i + 1;
            while i_ahead < i_max && x[i_ahead] == x[i] {
                i_ahead += 1;
            }
            if x[i_ahead] < x[i] {
                peaks.push((i + i_ahead - 1) / 2);
                i = i_ahead;
            }
        }
        i += 1;
    }
    peaks
}

/// Visit peaks from the tallest down (equal heights: later index first) and drop
/// every neighbour closer than `distance`.
fn select_by_distance(x: &[f64], peaks: Vec<usize>, distance: usize) -> Vec<usize> {
    if distance <= 1 || peaks.len() < 2 {
        return peaks;
    }
    let mut order: Vec<usize> = (0..peaks.len()).collect();
    order.sort_by(|&a, &b| x[peaks[a]].total_cmp(&x[peaks[b]]));

    let mut keep = vec![true; peaks.len()];
    for &j in order.iter().rev() {
        if !keep[j] {
            continue;
        }
        for k in (0..j).rev() {
            if peaks[j] - peaks[k] >= distance {
                break;
            }
            keep[k] = false;
        }
        for k in j + 1..peaks.len() {
            if peaks[k] - peaks[j] >= distance {
                break;
            }
            keep[k] = false;
        }
    }

    peaks
        .into_iter()
        .zip(keep)
        .filter_map(|(p, keep)| keep.then_some(p))
        .collect()
}

/// (prominence, left_base, right_base) searching the whole signal.
fn prominence(x: &[f64], peak: usize) -> (f64, usize, usize) {
    let top = x[peak];

    let mut left_base = peak;
    let mut left_min = top;
    for i in (0..=peak).rev() {
        if x[i] > top {
            break;
        }
        if x[i] < left_min {
            left_min = x[i];
            left_base = i;
        }
    }

    let mut right_base = peak;
    let mut right_min = top;
    for (i, &v) in x.iter().enumerate().skip(peak) {
        if v > top {
            break;
        }
        if v < right_min {
            right_min = v;
            right_base = i;
        }
    }

    (top - left_min.max(right_min), left_base, right_base)
}

/// Width at half prominence with linearly interpolated crossings.
fn peak_width(x: &[f64], peak: usize, prominence: f64, left_base: usize, right_base: usize) -> f64 {
    let height = x[peak] - prominence * 0.5;

    let mut i = peak;
    while left_base < i && height < x[i] {
        i -= 1;
    }
    let mut left_ip = i as f64;
    if x[i] < height {
        left_ip += (height - x[i]) / (x[i + 1] - x[i]);
    }

    let mut i = peak;
    while i < right_base && height < x[i] {
        i += 1;
    }
    let mut right_ip = i as f64;
    if x[i] < height {
        right_ip -= (height - x[i]) / (x[i - 1] - x[i]);
    }

    right_ip - left_ip
}
