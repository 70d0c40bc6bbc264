mod edge;
mod read;
mod sync;

use ndarray::Array1;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
pub use edge::{detect_edges, find_peaks, moving_average, PeakParam};
pub use read::read_analog;
pub use sync::{
    align_frames, detect_piezo_onset, find_piezo_samples, frame_to_volume, nearest_event,
    FrameAlignment, FrameMatch, PiezoOnset,
};

/// Interleaved samples of `nchannels` analog channels.
/// Channel k owns every `nchannels`-th sample starting at offset k.
#[derive(Debug, Clone, PartialEq)]
pub struct AnalogStream {
    samples: Vec<f64>,
    nchannels: usize,
}

impl AnalogStream {
    /// A trailing partial cycle is dropped.
    pub fn new(mut samples: Vec<f64>, nchannels: usize) -> Result<AnalogStream> {
        if nchannels == 0 {
            return Err(Error::configuration("number of channels can not be zero"));
        }
        let ncycles = samples.len() / nchannels;
        samples.truncate(ncycles * nchannels);
        Ok(AnalogStream { samples, nchannels })
    }

    pub fn nchannels(&self) -> usize {
        self.nchannels
    }

    /// Number of samples per channel.
    pub fn len(&self) -> usize {
        self.samples.len() / self.nchannels
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn samples(&self) -> &[f64] {
        &self.samples
    }

    pub fn channel(&self, channel: usize) -> Result<Array1<f64>> {
        demultiplex(&self.samples, self.nchannels, channel).map(Array1::from)
    }
}

/// Samples at `channel, channel + nchannels, ...` up to the stream length.
pub fn demultiplex(samples: &[f64], nchannels: usize, channel: usize) -> Result<Vec<f64>> {
    if channel >= nchannels {
        return Err(Error::configuration(format!(
            "channel({channel}) exceeds number of channels({nchannels})"
        )));
    }
    Ok(samples
        .iter()
        .skip(channel)
        .step_by(nchannels)
        .copied()
        .collect())
}

/// Ordered sample indices of detected rising transitions in one channel.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventSeries(Vec<usize>);

impl EventSeries {
    /// Indices must be strictly increasing.
    pub fn new(indexes: Vec<usize>) -> Result<EventSeries> {
        if indexes.windows(2).any(|w| w[0] >= w[1]) {
            return Err(Error::configuration("event indexes must be strictly increasing"));
        }
        Ok(EventSeries(indexes))
    }

    pub fn as_slice(&self) -> &[usize] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn into_inner(self) -> Vec<usize> {
        self.0
    }

    /// Distances between consecutive events.
    pub fn intervals(&self) -> Vec<usize> {
        self.0.windows(2).map(|w| w[1] - w[0]).collect()
    }

    /// (mean, min, max) of the intervals, `None` with fewer than two events.
    pub fn interval_summary(&self) -> Option<(f64, usize, usize)> {
        let intervals = self.intervals();
        let min = *intervals.iter().min()?;
        let max = *intervals.iter().max()?;
        let mean = intervals.iter().sum::<usize>() as f64 / intervals.len() as f64;
        Some((mean, min, max))
    }
}

impl std::ops::Deref for EventSeries {
    type Target = [usize];

    fn deref(&self) -> &[usize] {
        &self.0
    }
}
