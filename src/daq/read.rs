use std::{fs::File, io::Read, path::Path};

use anyhow::{anyhow, bail, Result};
use tracing::instrument;

use super::AnalogStream;

const SAMPLE_SIZE: usize = std::mem::size_of::<f64>();

/// Reads a flat file of machine-native `f64` samples interleaved over `nchannels`.
#[instrument(fields(analog_path = ?analog_path.as_ref()), err)]
pub fn read_analog<P: AsRef<Path>>(analog_path: P, nchannels: usize) -> Result<AnalogStream> {
    let analog_path = analog_path.as_ref();
    let mut buf = Vec::new();
    File::open(analog_path)
        .and_then(|mut file| file.read_to_end(&mut buf))
        .map_err(|e| anyhow!("failed to read analog data from {:?}: {}", analog_path, e))?;

    if buf.len() % SAMPLE_SIZE != 0 {
        bail!(
            "failed to read analog data from {:?}: {} bytes is not a whole number of samples",
            analog_path,
            buf.len()
        );
    }

    let samples: Vec<f64> = buf
        .chunks_exact(SAMPLE_SIZE)
        .map(|bytes| {
            let mut sample = [0; SAMPLE_SIZE];
            sample.copy_from_slice(bytes);
            f64::from_ne_bytes(sample)
        })
        .collect();

    Ok(AnalogStream::new(samples, nchannels)?)
}
