use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use image::ColorType::Rgb8;
use ndarray::prelude::*;
use plotters::prelude::*;
use tracing::instrument;

use super::{DisplayRange, MergedMaps};
use crate::response::ResponseMaps;

/// Matlab style jet colormap, `x` in `[0, 1]`.
pub fn jet(x: f64) -> RGBColor {
    let channel = |center: f64| {
        let v = (1.5 - (4.0 * x - center).abs()).clamp(0.0, 1.0);
        (v * 255.0).round() as u8
    };
    RGBColor(channel(3.0), channel(2.0), channel(1.0))
}

/// Renders a map into an RGB buffer of the same size. Values are clamped to
/// `(min, max)`, NAN pixels are white.
#[instrument(skip(map), fields(dim = ?map.dim()), err)]
pub fn draw_map(map: ArrayView2<f64>, (min, max): (f64, f64)) -> Result<Vec<u8>> {
    if !(min < max) {
        bail!("invalid display range ({min}, {max})");
    }
    let (h, w) = map.dim();
    let mut buf = vec![0; h * w * 3];
    {
        let root = BitMapBackend::with_buffer(&mut buf, (w as u32, h as u32)).into_drawing_area();
        for ((y, x), &v) in map.indexed_iter() {
            let pixel = (x as i32, y as i32);
            if v.is_nan() {
                root.draw_pixel(pixel, &WHITE)?;
                continue;
            }
            let color = jet((v.clamp(min, max) - min) / (max - min));
            root.draw_pixel(pixel, &color)?;
        }
        root.present()?;
    }
    Ok(buf)
}

fn save_map(map: ArrayView2<f64>, range: (f64, f64), path: PathBuf) -> Result<PathBuf> {
    let buf = draw_map(map, range)?;
    let (h, w) = map.dim();
    image::save_buffer(&path, &buf, w as u32, h as u32, Rgb8)
        .with_context(|| format!("failed to save plot {path:?}"))?;
    Ok(path)
}

/// Writes per z-level and merged heatmaps as `{name}_{map}_z{z}.png` and
/// `{name}_{map}_merged.png`, returning the written paths.
#[instrument(skip(maps, merged, display), fields(save_dir = ?save_dir.as_ref()), err)]
pub fn save_map_plots<P: AsRef<Path>>(
    maps: &ResponseMaps,
    merged: &MergedMaps,
    display: &DisplayRange,
    save_dir: P,
    name: &str,
) -> Result<Vec<PathBuf>> {
    let save_dir = save_dir.as_ref();
    let per_depth = [
        ("structural_baseline", &maps.structural_baseline, display.structural),
        ("calcium_baseline", &maps.calcium_baseline, display.calcium),
        ("delta_f_over_f", &maps.delta_f_over_f, display.response),
        ("delta_r_over_r", &maps.delta_r_over_r, display.response),
    ];

    let mut paths = Vec::new();
    for (map_name, stack, range) in per_depth {
        for (z, map) in stack.outer_iter().enumerate() {
            let path = save_dir.join(format!("{name}_{map_name}_z{z}.png"));
            paths.push(save_map(map, range, path)?);
        }
    }

    let projections = [
        ("calcium_baseline", &merged.calcium_baseline, display.calcium),
        ("delta_f_over_f", &merged.delta_f_over_f, display.response),
        ("delta_r_over_r", &merged.delta_r_over_r, display.response),
    ];
    for (map_name, map, range) in projections {
        let path = save_dir.join(format!("{name}_{map_name}_merged.png"));
        paths.push(save_map(map.view(), range, path)?);
    }

    Ok(paths)
}
