use approx::assert_abs_diff_eq;
use ndarray::prelude::*;

use super::*;
use crate::{
    config::tests::config_sample,
    response::ResponseWindows,
    stack::FilterMethod,
    util,
};

const NCHANNELS: usize = 7;
const DEPTH_COUNT: usize = 2;
const NVOLUMES: usize = 20;
const SIZE: usize = 16;
/// Analog samples between imaging frame events.
const PERIOD: usize = 100;
/// Piezo onsets land on volumes 6 and 12.
const ONSETS: [usize; 2] = [6, 12];
const BUMP: f64 = 1.1;
const WINDOWS: ResponseWindows = ResponseWindows {
    response: 3,
    baseline: 3,
};

fn texture(seed: u64, offset: f64, scale: f64) -> Array2<f64> {
    let mut state = seed;
    Array2::from_shape_simple_fn((SIZE, SIZE), || {
        state ^= state << 13;
        state ^= state >> 7;
        state ^= state << 17;
        offset + scale * (state >> 11) as f64 / (1u64 << 53) as f64
    })
}

fn in_bump(row: usize, col: usize) -> bool {
    (4..8).contains(&row) && (4..8).contains(&col)
}

fn responding(v: usize) -> bool {
    ONSETS.iter().any(|&o| (o..o + WINDOWS.response).contains(&v))
}

/// Raw interleaved frames. Only z-level 0 responds, inside a 4x4 square.
fn raw_frames() -> Array3<f64> {
    let calcium = [texture(1, 100.0, 50.0), texture(2, 100.0, 50.0)];
    let structural = [texture(3, 200.0, 100.0), texture(4, 200.0, 100.0)];
    let mut frames = Array3::zeros((2 * DEPTH_COUNT * NVOLUMES, SIZE, SIZE));
    for v in 0..NVOLUMES {
        for z in 0..DEPTH_COUNT {
            let raw = 2 * (v * DEPTH_COUNT + z);
            let mut calcium_frame = calcium[z].clone();
            if z == 0 && responding(v) {
                for ((r, c), x) in calcium_frame.indexed_iter_mut() {
                    if in_bump(r, c) {
                        *x *= BUMP;
                    }
                }
            }
            frames.index_axis_mut(Axis(0), raw).assign(&calcium_frame);
            frames
                .index_axis_mut(Axis(0), raw + 1)
                .assign(&structural[z]);
        }
    }
    frames
}

/// Imaging frame events at `k * PERIOD + 49`, camera events 5 samples earlier.
fn analog_samples() -> Vec<f64> {
    let nevents = DEPTH_COUNT * NVOLUMES;
    let len = nevents * PERIOD + PERIOD;
    let mut samples = vec![0.0; len * NCHANNELS];
    for k in 0..nevents {
        for s in k * PERIOD + 45..k * PERIOD + 55 {
            samples[s * NCHANNELS + 1] = 1.0;
        }
        for s in k * PERIOD + 50..k * PERIOD + 70 {
            samples[s * NCHANNELS + 2] = 5.0;
        }
    }
    for volume in ONSETS {
        let event = 2 * (volume - 1) * PERIOD + 49;
        for s in event + 1..event + 201 {
            samples[s * NCHANNELS + 6] = 3.0;
        }
    }
    samples
}

fn analog_stream() -> AnalogStream {
    AnalogStream::new(analog_samples(), NCHANNELS).unwrap()
}

/// Same recording with a flat camera channel.
fn analog_stream_without_camera() -> AnalogStream {
    let mut samples = analog_samples();
    samples
        .iter_mut()
        .skip(1)
        .step_by(NCHANNELS)
        .for_each(|s| *s = 0.0);
    AnalogStream::new(samples, NCHANNELS).unwrap()
}

fn config() -> Config {
    let mut config = config_sample();
    config.filter_method = FilterMethod::No;
    config.depth_count = DEPTH_COUNT;
    config.skip_interval = 1000;
    config.windows = WINDOWS;
    config.subtract_minimum = false;
    config
}

fn run_in_memory(pipeline: &mut Pipeline) {
    pipeline.preprocess_frames(raw_frames().view()).unwrap();
    pipeline.synchronize_stream(&analog_stream()).unwrap();
    pipeline.register().unwrap();
    pipeline.build_maps().unwrap();
    pipeline.merge().unwrap();
}

#[test]
fn test_whole_process_step_by_step() {
    util::log::init();
    let mut pipeline = Pipeline::new("step_by_step", config()).unwrap();
    assert!(pipeline.register().is_err());
    assert!(pipeline.build_maps().is_err());

    pipeline.preprocess_frames(raw_frames().view()).unwrap();
    assert_eq!(
        pipeline.filtered_stacks().unwrap().dim(),
        (DEPTH_COUNT, NVOLUMES, SIZE, SIZE)
    );

    pipeline.synchronize_stream(&analog_stream()).unwrap();
    let onset = pipeline.piezo_onset().unwrap();
    assert_eq!(onset.volumes(), ONSETS);
    assert_eq!(pipeline.imaging_events().unwrap().len(), DEPTH_COUNT * NVOLUMES);
    let alignment = pipeline.frame_alignment().unwrap();
    assert_eq!(alignment.len(), DEPTH_COUNT * NVOLUMES);
    assert!(alignment
        .matches
        .iter()
        .enumerate()
        .all(|(i, m)| m.camera_index == i && m.camera_minus_imaging == -5));
    assert_abs_diff_eq!(pipeline.imaging_frame_rate().unwrap(), 200.0);

    pipeline.register().unwrap();
    let registration = pipeline.registration().unwrap();
    assert!(registration.shifts.iter().all(|&s| s == 0.0));

    pipeline.build_maps().unwrap();
    pipeline.merge().unwrap();

    let maps = pipeline.response_maps().unwrap();
    for ((z, r, c), &d) in maps.delta_f_over_f.indexed_iter() {
        let expected = if z == 0 && in_bump(r, c) { BUMP - 1.0 } else { 0.0 };
        assert_abs_diff_eq!(d, expected, epsilon = 1e-9);
        assert_abs_diff_eq!(maps.delta_r_over_r[[z, r, c]], expected, epsilon = 1e-9);
    }

    let merged = pipeline.merged_maps().unwrap();
    for ((r, c), &d) in merged.delta_f_over_f.indexed_iter() {
        let expected = if in_bump(r, c) { BUMP - 1.0 } else { 0.0 };
        assert_abs_diff_eq!(d, expected, epsilon = 1e-9);
    }
    assert!(merged.calcium_baseline.iter().all(|&v| v > 99.9));
}

#[test]
fn test_new_input_clears_outputs() {
    let mut pipeline = Pipeline::new("clears_outputs", config()).unwrap();
    run_in_memory(&mut pipeline);
    pipeline.merged_maps().unwrap();

    pipeline.preprocess_frames(raw_frames().view()).unwrap();
    assert!(pipeline.registration().is_err());
    assert!(pipeline.response_maps().is_err());
    assert!(pipeline.merged_maps().is_err());
    pipeline.piezo_onset().unwrap();
}

#[test]
fn test_invalid_config() {
    let mut config = config();
    config.depth_count = 0;
    assert!(Pipeline::new("invalid", config).is_err());
}

#[test]
fn test_save_and_resume() {
    util::log::init();
    let dir = std::env::temp_dir().join("piezomap_test_save_and_resume");
    std::fs::create_dir_all(&dir).unwrap();

    let mut pipeline = Pipeline::new("resume", config()).unwrap();
    assert!(pipeline.save_outputs().is_err());
    pipeline.set_save_root_dir(dir.clone()).unwrap();
    run_in_memory(&mut pipeline);
    pipeline.save_outputs().unwrap();

    for file_name in [
        "resume_delta_f_over_f_z1.png",
        "resume_delta_r_over_r_merged.png",
        "resume_calcium_baseline_merged.csv",
        "resume_summary.json",
        "resume_response_maps.bin",
    ] {
        assert!(dir.join(file_name).exists(), "{file_name}");
    }

    let mut resumed = Pipeline::new("resume", config()).unwrap();
    resumed.set_save_root_dir(dir).unwrap();
    resumed.resume().unwrap();
    assert_eq!(resumed.piezo_onset().unwrap(), pipeline.piezo_onset().unwrap());
    assert_eq!(
        resumed.imaging_events().unwrap(),
        pipeline.imaging_events().unwrap()
    );
    assert!(resumed.imaging_frame_rate().is_some());
    assert_eq!(resumed.imaging_frame_rate(), pipeline.imaging_frame_rate());
    assert_eq!(
        resumed.frame_alignment().unwrap(),
        pipeline.frame_alignment().unwrap()
    );
    assert_eq!(
        resumed.registration().unwrap(),
        pipeline.registration().unwrap()
    );
    assert_eq!(
        resumed.filtered_stacks().unwrap(),
        pipeline.filtered_stacks().unwrap()
    );
    // Masked pixels are NAN, compare bit patterns.
    let bits = |a: &Array3<f64>| a.iter().map(|v| v.to_bits()).collect::<Vec<_>>();
    assert_eq!(
        bits(&resumed.response_maps().unwrap().delta_r_over_r),
        bits(&pipeline.response_maps().unwrap().delta_r_over_r)
    );

    // Stages continue from the resumed state.
    resumed.merge().unwrap();
}

#[test]
fn test_synchronize_without_camera() {
    util::log::init();
    let mut pipeline = Pipeline::new("without_camera", config()).unwrap();
    pipeline.preprocess_frames(raw_frames().view()).unwrap();
    pipeline
        .synchronize_stream(&analog_stream_without_camera())
        .unwrap();

    assert_eq!(pipeline.piezo_onset().unwrap().volumes(), ONSETS);
    assert!(pipeline.frame_alignment().is_err());
    assert_abs_diff_eq!(pipeline.imaging_frame_rate().unwrap(), 200.0);

    pipeline.register().unwrap();
    pipeline.build_maps().unwrap();
    pipeline.merge().unwrap();
    let merged = pipeline.merged_maps().unwrap();
    for ((r, c), &d) in merged.delta_f_over_f.indexed_iter() {
        let expected = if in_bump(r, c) { BUMP - 1.0 } else { 0.0 };
        assert_abs_diff_eq!(d, expected, epsilon = 1e-9);
    }
}

#[test]
fn test_synchronize_without_camera_discards_saved_alignment() {
    let dir = std::env::temp_dir().join("piezomap_test_discard_alignment");
    std::fs::create_dir_all(&dir).unwrap();
    let alignment_path = dir.join(ArtifactKind::FrameAlignment.file_name("discard"));

    let mut pipeline = Pipeline::new("discard", config()).unwrap();
    pipeline.set_save_root_dir(dir.clone()).unwrap();
    pipeline.synchronize_stream(&analog_stream()).unwrap();
    assert!(alignment_path.exists());

    pipeline
        .synchronize_stream(&analog_stream_without_camera())
        .unwrap();
    assert!(!alignment_path.exists());

    let mut resumed = Pipeline::new("discard", config()).unwrap();
    resumed.set_save_root_dir(dir).unwrap();
    resumed.resume().unwrap();
    assert!(resumed.frame_alignment().is_err());
    assert_eq!(resumed.piezo_onset().unwrap().volumes(), ONSETS);
}

#[test]
fn test_set_missing_paths() {
    let mut pipeline = Pipeline::new("missing", config()).unwrap();
    assert!(pipeline
        .set_image_path(PathBuf::from("./no_such_volume.tif"))
        .is_err());
    assert!(pipeline
        .set_analog_path(PathBuf::from("./no_such_analog.bin"))
        .is_err());
    assert!(pipeline
        .set_save_root_dir(PathBuf::from("./no_such_dir"))
        .is_err());
    assert!(pipeline.run().is_err());
}
