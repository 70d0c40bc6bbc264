use std::{fs::File, io::BufReader, path::Path};

use anyhow::Context;
use serde::{Deserialize, Serialize};
use tracing::instrument;

use crate::{
    daq::PeakParam,
    error::{Error, Result},
    postproc::DisplayRange,
    register::RegistrationChannel,
    response::{ResponseWindows, Thresholds},
    stack::{FilterMethod, ImageChannelOrder},
};

/// All recognized options of one recording session.
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct Config {
    /// Filter applied to each depth of both fluorescence stacks before registration.
    #[serde(default)]
    pub filter_method: FilterMethod,

    /// Which fluorescence channel comes first in the interleaved image volume.
    #[serde(default)]
    pub image_channel_order: ImageChannelOrder,

    /// Number of interleaved channels in the analog stream.
    pub number_of_channels: usize,
    /// Channel carrying the camera exposure signal.
    pub camera_channel: usize,
    /// Channel carrying the imaging frame (Y mirror) signal.
    pub imaging_channel: usize,
    /// Channel carrying the piezo stimulus signal.
    pub piezo_channel: usize,

    pub camera_peak: PeakParam,
    pub imaging_peak: PeakParam,

    /// Box-average width applied to the imaging frame signal.
    pub window_width: usize,

    /// Samples skipped after the first piezo onset before looking for the second.
    pub skip_interval: usize,

    /// Number of z-levels in one imaging volume.
    pub depth_count: usize,

    /// Analog sampling rate in Hz.
    pub sampling_rate: f64,

    /// Display clamp ranges, never used in computation.
    #[serde(default)]
    pub display: DisplayRange,

    pub thresholds: Thresholds,

    pub windows: ResponseWindows,

    /// Shifts are estimated to 1/upsample_factor pixel.
    pub upsample_factor: usize,

    pub registration_channel: RegistrationChannel,

    /// Offset each registered stack by its minimum before building response maps.
    #[serde(default = "default_subtract_minimum")]
    pub subtract_minimum: bool,
}

fn default_subtract_minimum() -> bool {
    true
}

impl Config {
    #[instrument(fields(config_path = ?config_path.as_ref()), err)]
    pub fn from_path<P: AsRef<Path>>(config_path: P) -> anyhow::Result<Config> {
        let config_path = config_path.as_ref();
        let file = File::open(config_path)
            .with_context(|| format!("failed to open config {config_path:?}"))?;
        let config: Config = serde_json::from_reader(BufReader::new(file))
            .with_context(|| format!("failed to parse config {config_path:?}"))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        let nchannels = self.number_of_channels;
        if nchannels == 0 {
            return Err(Error::configuration("number_of_channels can not be zero"));
        }
        for (name, channel) in [
            ("camera_channel", self.camera_channel),
            ("imaging_channel", self.imaging_channel),
            ("piezo_channel", self.piezo_channel),
        ] {
            if channel >= nchannels {
                return Err(Error::configuration(format!(
                    "{name}({channel}) exceeds number_of_channels({nchannels})"
                )));
            }
        }
        if self.camera_channel == self.imaging_channel
            || self.camera_channel == self.piezo_channel
            || self.imaging_channel == self.piezo_channel
        {
            return Err(Error::configuration(
                "camera, imaging and piezo channels must be distinct",
            ));
        }

        self.camera_peak.validate("camera_peak")?;
        self.imaging_peak.validate("imaging_peak")?;

        if self.window_width == 0 {
            return Err(Error::configuration("window_width can not be zero"));
        }
        if self.depth_count == 0 {
            return Err(Error::configuration("depth_count can not be zero"));
        }
        if !(self.sampling_rate.is_finite() && self.sampling_rate > 0.0) {
            return Err(Error::configuration(format!(
                "invalid sampling_rate: {}",
                self.sampling_rate
            )));
        }
        if self.upsample_factor == 0 {
            return Err(Error::configuration("upsample_factor can not be zero"));
        }

        self.filter_method.validate()?;
        self.thresholds.validate()?;
        self.windows.validate()?;
        self.display.validate()?;

        Ok(())
    }
}
