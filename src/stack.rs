mod filter;
mod read;

use ndarray::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{info, instrument, warn};

use crate::error::{Error, Result};
pub use filter::{filter_stack, filter_stacks, gaussian_kernel, FilterMethod};
pub use read::read_image_volume;

/// Order of the two fluorescence channels inside one interleaved frame pair.
#[derive(Debug, Default, Deserialize, Serialize, Clone, Copy, PartialEq, Eq)]
pub enum ImageChannelOrder {
    #[default]
    CalciumFirst,
    StructuralFirst,
}

/// Calcium (GCaMP) and structural (tdTomato) stacks, both `[z, frame, row, col]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelStacks {
    pub calcium: Array4<f64>,
    pub structural: Array4<f64>,
}

impl ChannelStacks {
    pub fn new(calcium: Array4<f64>, structural: Array4<f64>) -> Result<ChannelStacks> {
        if calcium.shape() != structural.shape() {
            return Err(Error::shape_mismatch(
                "calcium and structural stacks",
                calcium.shape(),
                structural.shape(),
            ));
        }
        Ok(ChannelStacks {
            calcium,
            structural,
        })
    }

    /// (depth_count, nframes, nrows, ncols)
    pub fn dim(&self) -> (usize, usize, usize, usize) {
        self.calcium.dim()
    }

    pub fn depth_count(&self) -> usize {
        self.calcium.len_of(Axis(0))
    }

    pub fn nframes(&self) -> usize {
        self.calcium.len_of(Axis(1))
    }
}

/// Splits raw frames `[frame, row, col]` into two channels and `depth_count` z-levels.
///
/// Raw frame `2 * (v * depth_count + z) + c` holds channel `c` of z-level `z` in volume `v`.
/// A trailing frame without its partner and an incomplete trailing volume are dropped.
#[instrument(skip(frames), fields(shape = ?frames.shape()), err)]
pub fn split_channels_and_depths(
    frames: ArrayView3<f64>,
    order: ImageChannelOrder,
    depth_count: usize,
) -> Result<ChannelStacks> {
    if depth_count == 0 {
        return Err(Error::configuration("depth_count can not be zero"));
    }
    let (nraw, nrows, ncols) = frames.dim();
    let nvolumes = nraw / 2 / depth_count;
    if nvolumes == 0 {
        return Err(Error::configuration(format!(
            "{nraw} frames can not fill one volume of {depth_count} z-levels"
        )));
    }
    let used = nvolumes * depth_count * 2;
    if used != nraw {
        warn!(dropped = nraw - used, "incomplete trailing volume");
    }

    let (calcium_offset, structural_offset) = match order {
        ImageChannelOrder::CalciumFirst => (0, 1),
        ImageChannelOrder::StructuralFirst => (1, 0),
    };
    let gather = |offset: usize| {
        let mut stack = Array4::zeros((depth_count, nvolumes, nrows, ncols));
        for z in 0..depth_count {
            for v in 0..nvolumes {
                let raw = 2 * (v * depth_count + z) + offset;
                stack
                    .slice_mut(s![z, v, .., ..])
                    .assign(&frames.index_axis(Axis(0), raw));
            }
        }
        stack
    };

    info!(depth_count, nvolumes, nrows, ncols);
    ChannelStacks::new(gather(calcium_offset), gather(structural_offset))
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Every pixel of raw frame i holds i.
    fn numbered_frames(n: usize) -> Array3<f64> {
        Array3::from_shape_fn((n, 2, 3), |(i, _, _)| i as f64)
    }

    #[test]
    fn test_split_channels_and_depths() {
        let frames = numbered_frames(2 * 3 * 4);
        let stacks =
            split_channels_and_depths(frames.view(), ImageChannelOrder::CalciumFirst, 3).unwrap();
        assert_eq!(stacks.dim(), (3, 4, 2, 3));
        for z in 0..3 {
            for v in 0..4 {
                let raw = (2 * (v * 3 + z)) as f64;
                assert_eq!(stacks.calcium[[z, v, 1, 2]], raw);
                assert_eq!(stacks.structural[[z, v, 0, 0]], raw + 1.0);
            }
        }
    }

    #[test]
    fn test_split_structural_first() {
        let frames = numbered_frames(4);
        let stacks =
            split_channels_and_depths(frames.view(), ImageChannelOrder::StructuralFirst, 1)
                .unwrap();
        assert_eq!(stacks.calcium.iter().next(), Some(&1.0));
        assert_eq!(stacks.structural[[0, 1, 0, 0]], 2.0);
    }

    #[test]
    fn test_split_drops_incomplete_volume() {
        // Two full volumes of 2 z-levels, plus three stray frames.
        let frames = numbered_frames(2 * 2 * 2 + 3);
        let stacks =
            split_channels_and_depths(frames.view(), ImageChannelOrder::CalciumFirst, 2).unwrap();
        assert_eq!(stacks.nframes(), 2);
        assert_eq!(stacks.depth_count(), 2);
        assert_eq!(stacks.calcium[[1, 1, 0, 0]], 6.0);
    }

    #[test]
    fn test_split_too_few_frames() {
        let frames = numbered_frames(3);
        assert!(matches!(
            split_channels_and_depths(frames.view(), ImageChannelOrder::CalciumFirst, 2),
            Err(Error::Configuration(_))
        ));
    }

    #[test]
    fn test_channel_stacks_shape_mismatch() {
        let res = ChannelStacks::new(Array4::zeros((1, 2, 3, 4)), Array4::zeros((1, 2, 3, 5)));
        assert!(matches!(res, Err(Error::ShapeMismatch { .. })));
    }
}
