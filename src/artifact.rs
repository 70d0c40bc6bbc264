//! Stage outputs persisted as a small header followed by the bincode encoded value.
//! Unlike json, bincode keeps NAN pixels of the maps.

use std::{
    fs::File,
    io::{BufReader, BufWriter, Write},
    path::Path,
};

use anyhow::{bail, Context, Result};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use tracing::instrument;

/// Bumped whenever a stored type changes its layout.
pub const FORMAT_VERSION: u32 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ArtifactKind {
    FilteredStacks,
    Registration,
    FrameAlignment,
    PiezoOnset,
    ResponseMaps,
    MergedMaps,
    ImagingEvents,
}

impl ArtifactKind {
    /// File name suffix, `{name}_{suffix}.bin`.
    pub fn suffix(&self) -> &'static str {
        match self {
            ArtifactKind::FilteredStacks => "filtered_stacks",
            ArtifactKind::Registration => "registration",
            ArtifactKind::FrameAlignment => "frame_alignment",
            ArtifactKind::PiezoOnset => "piezo_onset",
            ArtifactKind::ResponseMaps => "response_maps",
            ArtifactKind::MergedMaps => "merged_maps",
            ArtifactKind::ImagingEvents => "imaging_events",
        }
    }

    pub fn file_name(&self, name: &str) -> String {
        format!("{name}_{}.bin", self.suffix())
    }
}

#[derive(Debug, PartialEq, Serialize, Deserialize)]
struct Header {
    kind: ArtifactKind,
    version: u32,
}

#[instrument(skip(value), fields(path = ?path.as_ref()), err)]
pub fn save<T: Serialize, P: AsRef<Path>>(kind: ArtifactKind, value: &T, path: P) -> Result<()> {
    let path = path.as_ref();
    let file = File::create(path).with_context(|| format!("failed to create {path:?}"))?;
    let mut writer = BufWriter::new(file);
    let header = Header {
        kind,
        version: FORMAT_VERSION,
    };
    bincode::serialize_into(&mut writer, &header)?;
    bincode::serialize_into(&mut writer, value)
        .with_context(|| format!("failed to encode {kind:?} into {path:?}"))?;
    writer.flush()?;
    Ok(())
}

#[instrument(fields(path = ?path.as_ref()), err)]
pub fn load<T: DeserializeOwned, P: AsRef<Path>>(kind: ArtifactKind, path: P) -> Result<T> {
    let path = path.as_ref();
    let file = File::open(path).with_context(|| format!("failed to open {path:?}"))?;
    let mut reader = BufReader::new(file);
    let header: Header = bincode::deserialize_from(&mut reader)
        .with_context(|| format!("failed to read artifact header from {path:?}"))?;
    if header.kind != kind {
        bail!("{path:?} holds {:?}, expected {kind:?}", header.kind);
    }
    if header.version != FORMAT_VERSION {
        bail!(
            "{path:?} has format version {}, expected {FORMAT_VERSION}",
            header.version
        );
    }
    let value = bincode::deserialize_from(&mut reader)
        .with_context(|| format!("failed to decode {kind:?} from {path:?}"))?;
    Ok(value)
}

#[cfg(test)]
mod tests {
    use ndarray::prelude::*;

    use super::*;
    use crate::{daq::PiezoOnset, postproc::MergedMaps};

    fn temp_path(file_name: &str) -> std::path::PathBuf {
        let dir = std::env::temp_dir().join("piezomap_test_artifact");
        std::fs::create_dir_all(&dir).unwrap();
        dir.join(file_name)
    }

    #[test]
    fn test_round_trip_keeps_nan() {
        let merged = MergedMaps {
            calcium_baseline: arr2(&[[1.5, -0.0], [f64::NAN, 1e300]]),
            delta_f_over_f: Array2::from_elem((2, 2), f64::NAN),
            delta_r_over_r: arr2(&[[0.1, 0.2], [0.3, f64::INFINITY]]),
        };
        let path = temp_path(&ArtifactKind::MergedMaps.file_name("round_trip"));
        save(ArtifactKind::MergedMaps, &merged, &path).unwrap();
        let loaded: MergedMaps = load(ArtifactKind::MergedMaps, &path).unwrap();

        for (a, b) in [
            (&merged.calcium_baseline, &loaded.calcium_baseline),
            (&merged.delta_f_over_f, &loaded.delta_f_over_f),
            (&merged.delta_r_over_r, &loaded.delta_r_over_r),
        ] {
            assert_eq!(a.dim(), b.dim());
            assert!(a.iter().zip(b).all(|(x, y)| x.to_bits() == y.to_bits()));
        }
    }

    #[test]
    fn test_kind_mismatch() {
        let onset = PiezoOnset {
            first: 2,
            second: 9,
            samples: (40, 180),
        };
        let path = temp_path("kind_mismatch.bin");
        save(ArtifactKind::PiezoOnset, &onset, &path).unwrap();
        assert!(load::<PiezoOnset, _>(ArtifactKind::ResponseMaps, &path).is_err());
        assert_eq!(
            load::<PiezoOnset, _>(ArtifactKind::PiezoOnset, &path).unwrap(),
            onset
        );
    }

    #[test]
    fn test_load_not_exists() {
        assert!(load::<PiezoOnset, _>(ArtifactKind::PiezoOnset, "./no_such_artifact.bin").is_err());
    }
}
