mod fft;
mod fourier_shift;
mod phase_correlation;

use ndarray::{parallel::prelude::*, prelude::*};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument};

use crate::{
    error::{Error, Result},
    stack::ChannelStacks,
};
pub use fft::Fft2;
pub use fourier_shift::apply_shift;
pub use phase_correlation::{estimate_shift, ShiftEstimator};

/// Fractional translation in pixels.
#[derive(Debug, Default, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Shift {
    pub row: f64,
    pub col: f64,
}

/// Channel whose temporal mean serves as the reference of each z-level.
#[derive(Debug, Default, Deserialize, Serialize, Clone, Copy, PartialEq, Eq)]
pub enum RegistrationChannel {
    Calcium,
    #[default]
    Structural,
}

/// Registered stacks plus the shift applied to every `(z, frame)`, stored
/// as `[z, frame, (row, col)]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Registration {
    pub stacks: ChannelStacks,
    pub shifts: Array3<f64>,
}

impl Registration {
    pub fn shift(&self, z: usize, frame: usize) -> Shift {
        Shift {
            row: self.shifts[[z, frame, 0]],
            col: self.shifts[[z, frame, 1]],
        }
    }
}

/// Registers every frame to the temporal mean of its z-level, estimating on
/// `channel` and moving both channels by the same shift.
///
/// Frames of one z-level are processed in parallel, z-levels one after another.
#[instrument(skip(stacks), fields(dim = ?stacks.dim()), err)]
pub fn register_stacks(
    stacks: &ChannelStacks,
    channel: RegistrationChannel,
    upsample_factor: usize,
) -> Result<Registration> {
    if stacks.calcium.shape() != stacks.structural.shape() {
        return Err(Error::shape_mismatch(
            "calcium and structural stacks",
            stacks.calcium.shape(),
            stacks.structural.shape(),
        ));
    }
    let (depth_count, nframes, nrows, ncols) = stacks.dim();
    let estimated_on = match channel {
        RegistrationChannel::Calcium => &stacks.calcium,
        RegistrationChannel::Structural => &stacks.structural,
    };

    let fft2 = Fft2::new((nrows, ncols));
    let mut calcium = Array4::zeros(stacks.calcium.raw_dim());
    let mut structural = Array4::zeros(stacks.structural.raw_dim());
    let mut shifts = Array3::zeros((depth_count, nframes, 2));

    for z in 0..depth_count {
        let frames = estimated_on.index_axis(Axis(0), z);
        let reference = frames
            .mean_axis(Axis(0))
            .ok_or_else(|| Error::NumericalDegeneracy(format!("z-level {z} has no frame")))?;
        let estimator = ShiftEstimator::new(&fft2, reference.view(), upsample_factor)
            .map_err(|e| at_depth(e, z, "reference"))?;

        let calcium_z = stacks.calcium.index_axis(Axis(0), z);
        let structural_z = stacks.structural.index_axis(Axis(0), z);
        let registered: Vec<(Shift, Array2<f64>, Array2<f64>)> = (0..nframes)
            .into_par_iter()
            .map(|f| {
                let shift = estimator
                    .estimate(frames.index_axis(Axis(0), f))
                    .map_err(|e| at_depth(e, z, &format!("frame {f}")))?;
                Ok((
                    shift,
                    fourier_shift::shift_with(&fft2, calcium_z.index_axis(Axis(0), f), shift),
                    fourier_shift::shift_with(&fft2, structural_z.index_axis(Axis(0), f), shift),
                ))
            })
            .collect::<Result<_>>()?;

        let mut max_shift = 0f64;
        for (f, (shift, calcium_frame, structural_frame)) in registered.into_iter().enumerate() {
            calcium.slice_mut(s![z, f, .., ..]).assign(&calcium_frame);
            structural.slice_mut(s![z, f, .., ..]).assign(&structural_frame);
            shifts[[z, f, 0]] = shift.row;
            shifts[[z, f, 1]] = shift.col;
            max_shift = max_shift.max(shift.row.abs()).max(shift.col.abs());
        }
        debug!(z, max_shift);
    }
    info!(depth_count, nframes);

    Ok(Registration {
        stacks: ChannelStacks::new(calcium, structural)?,
        shifts,
    })
}

fn at_depth(e: Error, z: usize, what: &str) -> Error {
    match e {
        Error::NumericalDegeneracy(msg) => {
            Error::NumericalDegeneracy(format!("z-level {z} {what}: {msg}"))
        }
        e => e,
    }
}
