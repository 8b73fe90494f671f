use crate::field::Grid;
use anyhow::{anyhow, Result};
use log::info;
use reaction_common::{GridConfig, Vec4};
use std::path::Path;

/// Builds the initial field: the configured image when one is set,
/// otherwise a `width` x `height` grid at the rest state.
pub fn initial_grid(config: &GridConfig) -> Result<Grid> {
    match &config.initial_image {
        Some(path) => grid_from_image(path),
        None => {
            info!(
                "Initial field: {}x{} at rest state {:?}",
                config.width, config.height, config.rest_state
            );
            Grid::filled(config.width, config.height, Vec4::from(config.rest_state))
        }
    }
}

/// Loads an image as a grid, one cell per pixel, RGBA channels scaled to [0, 1].
/// Image row 0 becomes grid row 0.
pub fn grid_from_image<P: AsRef<Path>>(path: P) -> Result<Grid> {
    let path = path.as_ref();
    let image = image::open(path)
        .map_err(|e| anyhow!("Failed to load initial image '{}': {}", path.display(), e))?
        .to_rgba8();
    let (width, height) = image.dimensions();
    let cells = image
        .pixels()
        .map(|p| {
            Vec4::new(
                p[0] as f32 / 255.0,
                p[1] as f32 / 255.0,
                p[2] as f32 / 255.0,
                p[3] as f32 / 255.0,
            )
        })
        .collect();
    info!("Initial field: {}x{} from {}", width, height, path.display());
    Grid::from_cells(width, height, cells)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgba, RgbaImage};
    use reaction_common::UVec2;

    #[test]
    fn rest_state_fills_configured_size() {
        let config = GridConfig { width: 5, height: 3, ..GridConfig::default() };
        let grid = initial_grid(&config).unwrap();
        assert_eq!((grid.width(), grid.height()), (5, 3));
        assert!(grid.cells().iter().all(|c| *c == Vec4::new(0.0, 0.0, 0.0, 1.0)));
    }

    #[test]
    fn image_dimensions_and_channels_are_used() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("seed.png");
        let mut image = RgbaImage::from_pixel(3, 2, Rgba([0, 0, 0, 255]));
        image.put_pixel(2, 1, Rgba([255, 0, 51, 255]));
        image.save(&path).unwrap();

        let config = GridConfig {
            width: 64,
            height: 64,
            initial_image: Some(path.to_string_lossy().into_owned()),
            ..GridConfig::default()
        };
        let grid = initial_grid(&config).unwrap();
        assert_eq!((grid.width(), grid.height()), (3, 2));
        let cell = grid.get(UVec2::new(2, 1)).unwrap();
        assert!(cell.approx_eq(Vec4::new(1.0, 0.0, 0.2, 1.0), 1e-6));
    }

    #[test]
    fn missing_image_is_an_error() {
        let config = GridConfig { initial_image: Some("does/not/exist.png".to_string()), ..GridConfig::default() };
        assert!(initial_grid(&config).is_err());
    }
}
