use std::{
    io::Write,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result};
use ndarray::prelude::*;
use serde::Serialize;
use tracing::instrument;

use super::{nan_mean, MergedMaps};
use crate::{config::Config, daq::PiezoOnset};

/// Saved next to the results for later check.
#[derive(Debug, Serialize)]
pub struct RunSummary<'a> {
    /// User defined name of this recording, prefix of every saved file.
    pub name: &'a str,

    pub image_path: Option<&'a Path>,

    pub analog_path: Option<&'a Path>,

    pub config: &'a Config,

    /// (depth_count, nframes, nrows, ncols) of the registered stacks.
    pub dim: (usize, usize, usize, usize),

    pub onset: PiezoOnset,

    /// Imaging frames per second derived from the frame events, if there are enough of them.
    pub imaging_frame_rate: Option<f64>,

    pub delta_f_over_f_nan_mean: f64,

    pub delta_r_over_r_nan_mean: f64,

    #[serde(with = "time::serde::rfc3339")]
    pub saved_at: time::OffsetDateTime,
}

impl<'a> RunSummary<'a> {
    pub fn new(
        name: &'a str,
        config: &'a Config,
        dim: (usize, usize, usize, usize),
        onset: PiezoOnset,
        merged: &MergedMaps,
    ) -> RunSummary<'a> {
        RunSummary {
            name,
            image_path: None,
            analog_path: None,
            config,
            dim,
            onset,
            imaging_frame_rate: None,
            delta_f_over_f_nan_mean: nan_mean(merged.delta_f_over_f.view()),
            delta_r_over_r_nan_mean: nan_mean(merged.delta_r_over_r.view()),
            saved_at: time::OffsetDateTime::now_local()
                .unwrap_or_else(|_| time::OffsetDateTime::now_utc()),
        }
    }
}

#[instrument(
    skip(summary, summary_path),
    fields(name = summary.name, summary_path = ?summary_path.as_ref()),
    err
)]
pub fn save_summary<P: AsRef<Path>>(summary: &RunSummary, summary_path: P) -> Result<()> {
    let summary_path = summary_path.as_ref();
    let mut file = std::fs::OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .open(summary_path)
        .with_context(|| format!("failed to create summary {summary_path:?}"))?;
    let buf = serde_json::to_string_pretty(summary)?;
    file.write_all(buf.as_bytes())?;
    Ok(())
}

fn save_matrix(matrix: ArrayView2<f64>, path: &Path) -> Result<()> {
    let mut wtr = csv::WriterBuilder::new()
        .has_headers(false)
        .from_path(path)
        .with_context(|| format!("failed to create {path:?}"))?;
    for row in matrix.rows() {
        let v: Vec<_> = row.iter().map(|x| x.to_string()).collect();
        wtr.write_record(&csv::StringRecord::from(v))?;
    }
    wtr.flush()?;
    Ok(())
}

/// One headerless csv per merged map, `{name}_{map}_merged.csv`. NAN is written as `NaN`.
#[instrument(skip(merged), fields(save_dir = ?save_dir.as_ref()), err)]
pub fn save_merged_csv<P: AsRef<Path>>(
    merged: &MergedMaps,
    save_dir: P,
    name: &str,
) -> Result<Vec<PathBuf>> {
    let save_dir = save_dir.as_ref();
    let mut paths = Vec::new();
    for (map_name, map) in [
        ("calcium_baseline", &merged.calcium_baseline),
        ("delta_f_over_f", &merged.delta_f_over_f),
        ("delta_r_over_r", &merged.delta_r_over_r),
    ] {
        let path = save_dir.join(format!("{name}_{map_name}_merged.csv"));
        save_matrix(map.view(), &path)?;
        paths.push(path);
    }
    Ok(paths)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::tests::config_sample;

    fn merged() -> MergedMaps {
        MergedMaps {
            calcium_baseline: arr2(&[[20.0, 30.0], [40.0, 50.0]]),
            delta_f_over_f: arr2(&[[0.5, f64::NAN], [0.25, 0.0]]),
            delta_r_over_r: Array2::from_elem((2, 2), f64::NAN),
        }
    }

    fn temp_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(name);
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn test_save_merged_csv() {
        let dir = temp_dir("piezomap_test_save_merged_csv");
        let paths = save_merged_csv(&merged(), &dir, "run").unwrap();
        assert_eq!(paths.len(), 3);
        assert_eq!(
            std::fs::read_to_string(&paths[1]).unwrap(),
            "0.5,NaN\n0.25,0\n"
        );
    }

    #[test]
    fn test_save_summary() {
        let dir = temp_dir("piezomap_test_save_summary");
        let config = config_sample();
        let onset = PiezoOnset {
            first: 3,
            second: 30,
            samples: (100, 1000),
        };
        let mut summary = RunSummary::new("run", &config, (6, 40, 2, 2), onset, &merged());
        summary.imaging_frame_rate = Some(29.5);
        let path = dir.join("run_summary.json");
        save_summary(&summary, &path).unwrap();

        let value: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(value["onset"]["first"], 3);
        assert_eq!(value["config"]["depth_count"], 6);
        assert_eq!(value["delta_f_over_f_nan_mean"], 0.25);
        assert!(value["delta_r_over_r_nan_mean"].is_null());
        assert!(value["saved_at"].is_string());
    }
}
