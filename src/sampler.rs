use crate::compute::{ComputeDevice, Fence};
use crate::field::FieldStore;
use anyhow::{anyhow, Result};
use reaction_common::{UVec2, Vec4};
use std::sync::mpsc;
use std::sync::Arc;

/// Blocking single-cell read-back of the current grid.
#[derive(Debug, Default)]
pub struct Sampler;

impl Sampler {
    pub fn new() -> Self {
        Self
    }

    /// Reads the cell at `position` once every pass up to `after` has
    /// completed. Blocks the caller until the value is available.
    pub fn sample(
        &self,
        device: &ComputeDevice,
        field: &Arc<FieldStore>,
        position: UVec2,
        after: &Fence,
    ) -> Result<Vec4> {
        let (tx, rx) = mpsc::sync_channel::<Vec4>(1);
        let field = Arc::clone(field);
        let fence = device.submit("sample", &[after], move |_| {
            let grid = field.current()?;
            let value = grid.get(position).ok_or_else(|| {
                anyhow!(
                    "sample position ({}, {}) outside {}x{} grid",
                    position.x,
                    position.y,
                    grid.width(),
                    grid.height()
                )
            })?;
            tx.send(value).map_err(|_| anyhow!("sample receiver went away"))?;
            Ok(())
        })?;
        fence.wait()?;
        rx.recv().map_err(|_| anyhow!("sample pass produced no value"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::field::Grid;
    use reaction_common::ComputeConfig;

    #[test]
    fn reads_back_current_cell() {
        let device = ComputeDevice::new(&ComputeConfig { threads: Some(1), queue_depth: 2 }).unwrap();
        let mut grid = Grid::filled(3, 3, Vec4::zero()).unwrap();
        grid.set(UVec2::new(2, 1), Vec4::new(0.7, 0.1, 0.0, 1.0)).unwrap();
        let field = Arc::new(FieldStore::new(grid));
        let value = Sampler::new()
            .sample(&device, &field, UVec2::new(2, 1), &Fence::signaled("idle"))
            .unwrap();
        assert_eq!(value, Vec4::new(0.7, 0.1, 0.0, 1.0));
    }

    #[test]
    fn out_of_range_position_is_an_error() {
        let device = ComputeDevice::new(&ComputeConfig { threads: Some(1), queue_depth: 2 }).unwrap();
        let field = Arc::new(FieldStore::new(Grid::filled(3, 3, Vec4::zero()).unwrap()));
        let result = Sampler::new().sample(&device, &field, UVec2::new(3, 0), &Fence::signaled("idle"));
        assert!(result.is_err());
    }
}
