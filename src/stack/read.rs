use std::{fs::File, io::BufReader, path::Path};

use anyhow::{anyhow, bail, Result};
use ndarray::prelude::*;
use tiff::{
    decoder::{Decoder, DecodingResult},
    ColorType,
};
use tracing::{info, instrument};

/// Reads every page of a grayscale multi-page TIFF into `[frame, row, col]`.
/// All pages must share the first page's dimensions.
#[instrument(fields(image_path = ?image_path.as_ref()), err)]
pub fn read_image_volume<P: AsRef<Path>>(image_path: P) -> Result<Array3<f64>> {
    let image_path = image_path.as_ref();
    let file = File::open(image_path)
        .map_err(|e| anyhow!("failed to read image volume from {:?}: {}", image_path, e))?;
    let mut decoder = Decoder::new(BufReader::new(file))
        .map_err(|e| anyhow!("failed to decode image volume from {:?}: {}", image_path, e))?;

    let (width, height) = decoder.dimensions()?;
    let (nrows, ncols) = (height as usize, width as usize);
    let mut pixels = Vec::new();
    let mut nframes = 0;
    loop {
        match decoder.colortype()? {
            ColorType::Gray(_) => {}
            other => bail!("unsupported color type of page {}: {:?}", nframes, other),
        }
        if decoder.dimensions()? != (width, height) {
            bail!(
                "page {} is {:?}, expected {:?}",
                nframes,
                decoder.dimensions()?,
                (width, height)
            );
        }
        append_page(&mut pixels, decoder.read_image()?)?;
        nframes += 1;

        if !decoder.more_images() {
            break;
        }
        decoder.next_image()?;
    }
    info!(nframes, nrows, ncols);

    Ok(Array3::from_shape_vec((nframes, nrows, ncols), pixels)?)
}

fn append_page(pixels: &mut Vec<f64>, page: DecodingResult) -> Result<()> {
    match page {
        DecodingResult::U8(buf) => pixels.extend(buf.into_iter().map(f64::from)),
        DecodingResult::U16(buf) => pixels.extend(buf.into_iter().map(f64::from)),
        DecodingResult::U32(buf) => pixels.extend(buf.into_iter().map(f64::from)),
        DecodingResult::I8(buf) => pixels.extend(buf.into_iter().map(f64::from)),
        DecodingResult::I16(buf) => pixels.extend(buf.into_iter().map(f64::from)),
        DecodingResult::I32(buf) => pixels.extend(buf.into_iter().map(f64::from)),
        DecodingResult::F32(buf) => pixels.extend(buf.into_iter().map(f64::from)),
        DecodingResult::F64(buf) => pixels.extend(buf),
        _ => bail!("unsupported 64-bit integer samples"),
    }
    Ok(())
}
