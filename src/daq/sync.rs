use ndarray::ArrayView1;
use serde::{Deserialize, Serialize};
use tracing::{info, instrument};

use super::EventSeries;
use crate::error::{Error, Result};

/// Nearest camera event of one imaging frame event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrameMatch {
    /// Index into the camera event series.
    pub camera_index: usize,
    /// Camera event sample minus imaging event sample, positive when the camera
    /// frame starts after the imaging frame.
    pub camera_minus_imaging: i64,
}

/// One entry per imaging frame event, in order.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrameAlignment {
    pub matches: Vec<FrameMatch>,
}

impl FrameAlignment {
    pub fn len(&self) -> usize {
        self.matches.len()
    }

    pub fn is_empty(&self) -> bool {
        self.matches.is_empty()
    }
}

/// Imaging volumes nearest to the two piezo stimulus onsets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PiezoOnset {
    /// Volume index of the first stimulus.
    pub first: usize,
    /// Volume index of the second stimulus.
    pub second: usize,
    /// Sample indices of both onsets in the piezo channel.
    pub samples: (usize, usize),
}

impl PiezoOnset {
    pub fn volumes(&self) -> [usize; 2] {
        [self.first, self.second]
    }
}

/// Index of the event closest to `target`, equally close events resolve to the lower index.
/// `events` must be sorted ascending.
pub fn nearest_event(events: &[usize], target: usize) -> Option<usize> {
    if events.is_empty() {
        return None;
    }
    let p = events.partition_point(|&e| e < target);
    if p == 0 {
        return Some(0);
    }
    if p == events.len() {
        return Some(p - 1);
    }
    let before = target - events[p - 1];
    let after = events[p] - target;
    Some(if before <= after { p - 1 } else { p })
}

/// Matches every imaging frame event to its nearest camera event.
#[instrument(skip_all, fields(ncamera = camera.len(), nimaging = imaging.len()), err)]
pub fn align_frames(camera: &EventSeries, imaging: &EventSeries) -> Result<FrameAlignment> {
    if camera.is_empty() && !imaging.is_empty() {
        return Err(Error::NoEvents("camera"));
    }
    let matches: Vec<FrameMatch> = imaging
        .iter()
        .filter_map(|&i| {
            let camera_index = nearest_event(camera, i)?;
            Some(FrameMatch {
                camera_index,
                camera_minus_imaging: camera[camera_index] as i64 - i as i64,
            })
        })
        .collect();

    if let Some(max_offset) = matches.iter().map(|m| m.camera_minus_imaging.abs()).max() {
        info!(nmatches = matches.len(), max_offset);
    }
    Ok(FrameAlignment { matches })
}

/// First "on" sample at or after `from`, "on" meaning at least `threshold`.
fn first_on(piezo: ArrayView1<f64>, threshold: f64, from: usize) -> Option<usize> {
    piezo
        .iter()
        .enumerate()
        .skip(from)
        .find_map(|(i, &v)| (v >= threshold).then_some(i))
}

/// Sample indices of the two stimulus onsets. The piezo is "on" once it reaches
/// half of its full range. The second onset is searched from `first + skip_interval`.
pub fn find_piezo_samples(piezo: ArrayView1<f64>, skip_interval: usize) -> Result<(usize, usize)> {
    let (min, max) = piezo
        .iter()
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(min, max), &v| {
            (min.min(v), max.max(v))
        });
    if !(min.is_finite() && max.is_finite()) {
        return Err(Error::NoEvents("piezo"));
    }
    let threshold = (max + min) / 2.0;

    let first = first_on(piezo, threshold, 0).ok_or(Error::NoEvents("piezo"))?;
    let from = first.saturating_add(skip_interval);
    let second = first
        .checked_add(skip_interval)
        .and_then(|from| first_on(piezo, threshold, from))
        .ok_or(Error::OnsetNotFound(from))?;
    Ok((first, second))
}

/// The first complete volume starting at or after the frame.
pub fn frame_to_volume(frame_index: usize, depth_count: usize) -> usize {
    frame_index / depth_count + 1
}

#[instrument(skip(piezo, imaging), err)]
pub fn detect_piezo_onset(
    piezo: ArrayView1<f64>,
    imaging: &EventSeries,
    skip_interval: usize,
    depth_count: usize,
) -> Result<PiezoOnset> {
    if depth_count == 0 {
        return Err(Error::configuration("depth_count can not be zero"));
    }
    let (first_sample, second_sample) = find_piezo_samples(piezo, skip_interval)?;
    let to_volume = |sample| {
        nearest_event(imaging, sample)
            .map(|frame_index| frame_to_volume(frame_index, depth_count))
            .ok_or(Error::NoEvents("imaging"))
    };
    let onset = PiezoOnset {
        first: to_volume(first_sample)?,
        second: to_volume(second_sample)?,
        samples: (first_sample, second_sample),
    };
    info!(?onset);
    Ok(onset)
}
