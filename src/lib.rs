#![allow(clippy::too_many_arguments)]

pub mod artifact;
pub mod config;
pub mod daq;
pub mod error;
pub mod postproc;
pub mod register;
pub mod response;
pub mod stack;
mod state;
pub mod util;

pub use config::Config;
pub use daq::{AnalogStream, EventSeries, FrameAlignment, PeakParam, PiezoOnset};
pub use error::Error;
pub use postproc::{DisplayRange, MergedMaps};
pub use register::{Registration, RegistrationChannel, Shift};
pub use response::{ResponseMaps, ResponseWindows, Thresholds};
pub use stack::{ChannelStacks, FilterMethod, ImageChannelOrder};
pub use state::Pipeline;

pub fn init() {
    util::log::init();
}
