#[cfg(test)]
mod tests;

use std::path::{Path, PathBuf};

use anyhow::{anyhow, bail, Context, Result};
use ndarray::ArrayView3;
use serde::Serialize;
use tracing::{info, instrument, warn};

use crate::{
    artifact::{self, ArtifactKind},
    config::Config,
    daq::{
        align_frames, detect_edges, detect_piezo_onset, read_analog, AnalogStream, EventSeries,
        FrameAlignment, PiezoOnset,
    },
    postproc::{merge_depths, save_map_plots, save_merged_csv, save_summary, MergedMaps, RunSummary},
    register::{register_stacks, Registration},
    response::{build_response_maps, ResponseMaps},
    stack::{filter_stacks, read_image_volume, split_channels_and_depths, ChannelStacks},
};

/// Inputs and typed stage outputs of one recording session.
///
/// Every stage reads the outputs of earlier stages and fails with "xxx unset"
/// when they are missing. Setting an input drops the outputs depending on it.
/// With a save root dir each stage output is persisted as an artifact:
/// * {save_root_dir}/{name}_{artifact}.bin
/// * {save_root_dir}/{name}_{map}_z{z}.png, {name}_{map}_merged.png
/// * {save_root_dir}/{name}_{map}_merged.csv
/// * {save_root_dir}/{name}_summary.json
#[derive(Debug)]
pub struct Pipeline {
    /// User defined name of this recording, prefix of every saved file.
    pub name: String,
    config: Config,
    save_root_dir: Option<PathBuf>,
    image_path: Option<PathBuf>,
    analog_path: Option<PathBuf>,

    filtered_stacks: Option<ChannelStacks>,
    registration: Option<Registration>,
    imaging_events: Option<EventSeries>,
    frame_alignment: Option<FrameAlignment>,
    piezo_onset: Option<PiezoOnset>,
    response_maps: Option<ResponseMaps>,
    merged_maps: Option<MergedMaps>,
}

impl Pipeline {
    pub fn new<S: Into<String>>(name: S, config: Config) -> Result<Pipeline> {
        config.validate()?;
        Ok(Pipeline {
            name: name.into(),
            config,
            save_root_dir: None,
            image_path: None,
            analog_path: None,
            filtered_stacks: None,
            registration: None,
            imaging_events: None,
            frame_alignment: None,
            piezo_onset: None,
            response_maps: None,
            merged_maps: None,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn save_root_dir(&self) -> Result<&Path> {
        Ok(self
            .save_root_dir
            .as_ref()
            .ok_or_else(|| anyhow!("save root dir unset"))?)
    }

    #[instrument(level = "trace", skip(self), err)]
    pub fn set_save_root_dir(&mut self, save_root_dir: PathBuf) -> Result<()> {
        if !save_root_dir.exists() {
            bail!("{save_root_dir:?} not exists");
        }
        self.save_root_dir = Some(save_root_dir);
        Ok(())
    }

    pub fn image_path(&self) -> Result<&Path> {
        Ok(self
            .image_path
            .as_ref()
            .ok_or_else(|| anyhow!("image path unset"))?)
    }

    pub fn set_image_path(&mut self, image_path: PathBuf) -> Result<()> {
        if !image_path.exists() {
            bail!("{image_path:?} not exists");
        }
        self.filtered_stacks = None;
        self.registration = None;
        self.clear_maps();
        self.image_path = Some(image_path);
        Ok(())
    }

    pub fn analog_path(&self) -> Result<&Path> {
        Ok(self
            .analog_path
            .as_ref()
            .ok_or_else(|| anyhow!("analog path unset"))?)
    }

    pub fn set_analog_path(&mut self, analog_path: PathBuf) -> Result<()> {
        if !analog_path.exists() {
            bail!("{analog_path:?} not exists");
        }
        self.imaging_events = None;
        self.frame_alignment = None;
        self.piezo_onset = None;
        self.clear_maps();
        self.analog_path = Some(analog_path);
        Ok(())
    }

    fn clear_maps(&mut self) {
        self.response_maps = None;
        self.merged_maps = None;
    }

    pub fn filtered_stacks(&self) -> Result<&ChannelStacks> {
        self.filtered_stacks
            .as_ref()
            .ok_or_else(|| anyhow!("filtered stacks unset"))
    }

    pub fn registration(&self) -> Result<&Registration> {
        self.registration
            .as_ref()
            .ok_or_else(|| anyhow!("registration unset"))
    }

    pub fn imaging_events(&self) -> Result<&EventSeries> {
        self.imaging_events
            .as_ref()
            .ok_or_else(|| anyhow!("imaging events unset"))
    }

    pub fn frame_alignment(&self) -> Result<&FrameAlignment> {
        self.frame_alignment
            .as_ref()
            .ok_or_else(|| anyhow!("frame alignment unset"))
    }

    pub fn piezo_onset(&self) -> Result<PiezoOnset> {
        self.piezo_onset.ok_or_else(|| anyhow!("piezo onset unset"))
    }

    pub fn response_maps(&self) -> Result<&ResponseMaps> {
        self.response_maps
            .as_ref()
            .ok_or_else(|| anyhow!("response maps unset"))
    }

    pub fn merged_maps(&self) -> Result<&MergedMaps> {
        self.merged_maps
            .as_ref()
            .ok_or_else(|| anyhow!("merged maps unset"))
    }

    /// Imaging frames per second, from the mean interval between frame events.
    pub fn imaging_frame_rate(&self) -> Option<f64> {
        let (mean, ..) = self.imaging_events.as_ref()?.interval_summary()?;
        Some(self.config.sampling_rate / mean)
    }

    fn artifact_path(&self, kind: ArtifactKind) -> Result<PathBuf> {
        Ok(self.save_root_dir()?.join(kind.file_name(&self.name)))
    }

    /// Saves only when a save root dir is set.
    fn persist<T: Serialize>(&self, kind: ArtifactKind, value: &T) -> Result<()> {
        if self.save_root_dir.is_some() {
            artifact::save(kind, value, self.artifact_path(kind)?)?;
        }
        Ok(())
    }

    /// Removes a previously saved artifact that no longer matches the state.
    fn discard(&self, kind: ArtifactKind) -> Result<()> {
        if self.save_root_dir.is_some() {
            let path = self.artifact_path(kind)?;
            if path.exists() {
                std::fs::remove_file(&path)
                    .with_context(|| format!("failed to remove stale {path:?}"))?;
            }
        }
        Ok(())
    }

    /// Reads the image volume, then splits and filters it.
    #[instrument(level = "trace", skip(self), err)]
    pub fn load_stacks(&mut self) -> Result<()> {
        let frames = read_image_volume(self.image_path()?)?;
        self.preprocess_frames(frames.view())
    }

    /// Splits raw `[frame, row, col]` frames into channels and z-levels and filters them.
    #[instrument(level = "trace", skip_all, err)]
    pub fn preprocess_frames(&mut self, frames: ArrayView3<f64>) -> Result<()> {
        let stacks = split_channels_and_depths(
            frames,
            self.config.image_channel_order,
            self.config.depth_count,
        )?;
        let filtered = filter_stacks(&stacks, self.config.filter_method)?;
        self.persist(ArtifactKind::FilteredStacks, &filtered)?;
        self.filtered_stacks = Some(filtered);
        self.registration = None;
        self.clear_maps();
        Ok(())
    }

    #[instrument(level = "trace", skip(self), err)]
    pub fn synchronize(&mut self) -> Result<()> {
        let stream = read_analog(self.analog_path()?, self.config.number_of_channels)?;
        self.synchronize_stream(&stream)
    }

    /// Detects frame events, locates both piezo onsets and aligns camera to imaging
    /// frames. Piezo sessions may come without a camera signal, then the frame
    /// alignment stays unset.
    #[instrument(level = "trace", skip_all, fields(len = stream.len()), err)]
    pub fn synchronize_stream(&mut self, stream: &AnalogStream) -> Result<()> {
        let config = &self.config;
        if stream.nchannels() != config.number_of_channels {
            bail!(
                "analog stream has {} channels, expected {}",
                stream.nchannels(),
                config.number_of_channels
            );
        }

        let camera = detect_edges(
            stream.channel(config.camera_channel)?.view(),
            1,
            config.camera_peak,
        );
        let imaging = detect_edges(
            stream.channel(config.imaging_channel)?.view(),
            config.window_width,
            config.imaging_peak,
        );
        for (what, events) in [("camera", &camera), ("imaging", &imaging)] {
            match events.interval_summary() {
                Some((mean, min, max)) => info!(what, nevents = events.len(), mean, min, max),
                None => warn!(what, nevents = events.len(), "too few frame events"),
            }
        }

        let piezo_onset = detect_piezo_onset(
            stream.channel(config.piezo_channel)?.view(),
            &imaging,
            config.skip_interval,
            config.depth_count,
        )?;
        let frame_alignment = if camera.is_empty() {
            warn!("no camera events, frame alignment skipped");
            None
        } else {
            Some(align_frames(&camera, &imaging)?)
        };

        self.persist(ArtifactKind::ImagingEvents, &imaging)?;
        self.persist(ArtifactKind::PiezoOnset, &piezo_onset)?;
        match &frame_alignment {
            Some(frame_alignment) => self.persist(ArtifactKind::FrameAlignment, frame_alignment)?,
            None => self.discard(ArtifactKind::FrameAlignment)?,
        }
        self.imaging_events = Some(imaging);
        self.frame_alignment = frame_alignment;
        self.piezo_onset = Some(piezo_onset);
        self.clear_maps();
        if let Some(frame_rate) = self.imaging_frame_rate() {
            info!(frame_rate);
        }
        Ok(())
    }

    #[instrument(level = "trace", skip(self), err)]
    pub fn register(&mut self) -> Result<()> {
        let registration = register_stacks(
            self.filtered_stacks()?,
            self.config.registration_channel,
            self.config.upsample_factor,
        )?;
        self.persist(ArtifactKind::Registration, &registration)?;
        self.registration = Some(registration);
        self.clear_maps();
        Ok(())
    }

    #[instrument(level = "trace", skip(self), err)]
    pub fn build_maps(&mut self) -> Result<()> {
        let maps = build_response_maps(
            &self.registration()?.stacks,
            &self.piezo_onset()?,
            self.config.windows,
            self.config.thresholds,
            self.config.subtract_minimum,
        )?;
        self.persist(ArtifactKind::ResponseMaps, &maps)?;
        self.response_maps = Some(maps);
        self.merged_maps = None;
        Ok(())
    }

    #[instrument(level = "trace", skip(self), err)]
    pub fn merge(&mut self) -> Result<()> {
        let merged = merge_depths(self.response_maps()?);
        self.persist(ArtifactKind::MergedMaps, &merged)?;
        self.merged_maps = Some(merged);
        Ok(())
    }

    /// Plots, csv files and the run summary.
    #[instrument(level = "trace", skip(self), err)]
    pub fn save_outputs(&self) -> Result<()> {
        let name = &self.name;
        let save_root_dir = self.save_root_dir()?;
        let maps = self.response_maps()?;
        let merged = self.merged_maps()?;

        save_map_plots(maps, merged, &self.config.display, save_root_dir, name)?;
        save_merged_csv(merged, save_root_dir, name)?;

        let mut summary = RunSummary::new(
            name,
            &self.config,
            self.registration()?.stacks.dim(),
            self.piezo_onset()?,
            merged,
        );
        summary.image_path = self.image_path.as_deref();
        summary.analog_path = self.analog_path.as_deref();
        summary.imaging_frame_rate = self.imaging_frame_rate();
        save_summary(&summary, save_root_dir.join(format!("{name}_summary.json")))?;
        Ok(())
    }

    /// Runs every stage from the image and analog files, saving outputs when a
    /// save root dir is set.
    #[instrument(level = "trace", skip(self), err)]
    pub fn run(&mut self) -> Result<()> {
        self.load_stacks()?;
        self.synchronize()?;
        self.register()?;
        self.build_maps()?;
        self.merge()?;
        if self.save_root_dir.is_some() {
            self.save_outputs()?;
        }
        Ok(())
    }

    /// Loads every artifact previously saved under the save root dir. Missing
    /// files are skipped, corrupted ones are errors.
    #[instrument(level = "trace", skip(self), err)]
    pub fn resume(&mut self) -> Result<()> {
        fn load_if_exists<T: serde::de::DeserializeOwned>(
            pipeline: &Pipeline,
            kind: ArtifactKind,
        ) -> Result<Option<T>> {
            let path = pipeline.artifact_path(kind)?;
            if !path.exists() {
                return Ok(None);
            }
            artifact::load(kind, path).map(Some)
        }

        self.filtered_stacks = load_if_exists(self, ArtifactKind::FilteredStacks)?;
        self.registration = load_if_exists(self, ArtifactKind::Registration)?;
        self.imaging_events = load_if_exists(self, ArtifactKind::ImagingEvents)?;
        self.frame_alignment = load_if_exists(self, ArtifactKind::FrameAlignment)?;
        self.piezo_onset = load_if_exists(self, ArtifactKind::PiezoOnset)?;
        self.response_maps = load_if_exists(self, ArtifactKind::ResponseMaps)?;
        self.merged_maps = load_if_exists(self, ArtifactKind::MergedMaps)?;
        info!(
            filtered_stacks = self.filtered_stacks.is_some(),
            registration = self.registration.is_some(),
            imaging_events = self.imaging_events.is_some(),
            frame_alignment = self.frame_alignment.is_some(),
            piezo_onset = self.piezo_onset.is_some(),
            response_maps = self.response_maps.is_some(),
            merged_maps = self.merged_maps.is_some(),
        );
        Ok(())
    }
}
