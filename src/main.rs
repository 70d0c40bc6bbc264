use std::path::PathBuf;

use anyhow::{bail, Result};
use piezomap::{Config, Pipeline};
use tracing::info;

const USAGE: &str = "usage: piezomap <config.json> <image.tif> <analog.bin> <save_dir> [name]";

fn main() -> Result<()> {
    piezomap::init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let (config_path, image_path, analog_path, save_root_dir, name) = match args.as_slice() {
        [config, image, analog, save_dir] => (config, image, analog, save_dir, None),
        [config, image, analog, save_dir, name] => {
            (config, image, analog, save_dir, Some(name.clone()))
        }
        _ => bail!(USAGE),
    };

    let image_path = PathBuf::from(image_path);
    let name = match name {
        Some(name) => name,
        None => match image_path.file_stem() {
            Some(stem) => stem.to_string_lossy().into_owned(),
            None => bail!("can not derive a name from {image_path:?}"),
        },
    };

    let config = Config::from_path(config_path)?;
    let mut pipeline = Pipeline::new(name, config)?;
    pipeline.set_image_path(image_path)?;
    pipeline.set_analog_path(PathBuf::from(analog_path))?;
    std::fs::create_dir_all(save_root_dir)?;
    pipeline.set_save_root_dir(PathBuf::from(save_root_dir))?;
    pipeline.run()?;

    let onset = pipeline.piezo_onset()?;
    info!(name = %pipeline.name, volumes = ?onset.volumes(), "done");
    Ok(())
}
