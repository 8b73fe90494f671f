use crate::compute::{ComputeDevice, Fence};
use crate::field::{FieldStore, Grid};
use anyhow::{anyhow, Result};
use log::{debug, warn};
use rayon::prelude::*;
use reaction_common::{UVec2, Vec4};
use std::sync::{Arc, Mutex};

/// An externally requested disc overwrite.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct InjectionRequest {
    pub center: UVec2,
    pub radius: u32,
    pub color: Vec4,
}

impl InjectionRequest {
    pub fn new(center: UVec2, radius: u32, color: Vec4) -> Self {
        Self { center, radius, color }
    }
}

/// Single pending injection, last writer wins.
///
/// Mutex-guarded: `request` and `take` are each atomic with respect to one
/// another, but nothing orders two concurrent writers.
#[derive(Debug, Default)]
pub struct InjectionSlot {
    pending: Mutex<Option<InjectionRequest>>,
}

impl InjectionSlot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Overwrites the pending request. Callable from any thread.
    pub fn request(&self, request: InjectionRequest) -> Result<()> {
        let mut pending = self
            .pending
            .lock()
            .map_err(|_| anyhow!("injection slot lock poisoned"))?;
        if let Some(previous) = pending.replace(request) {
            debug!("Pending injection at {:?} overwritten before it was applied.", previous.center);
        }
        Ok(())
    }

    /// Removes and returns the pending request, leaving the slot disabled.
    pub fn take(&self) -> Result<Option<InjectionRequest>> {
        let mut pending = self
            .pending
            .lock()
            .map_err(|_| anyhow!("injection slot lock poisoned"))?;
        Ok(pending.take())
    }

    pub fn is_pending(&self) -> Result<bool> {
        let pending = self
            .pending
            .lock()
            .map_err(|_| anyhow!("injection slot lock poisoned"))?;
        Ok(pending.is_some())
    }
}

/// Draws pending discs into the destination grid after the step pass.
#[derive(Debug, Default)]
pub struct Injector;

impl Injector {
    pub fn new() -> Self {
        Self
    }

    /// Consumes the slot. With a pending request, submits the disc pass
    /// ordered after `after` and returns its fence; otherwise a no-op.
    pub fn apply(
        &self,
        device: &ComputeDevice,
        field: &Arc<FieldStore>,
        slot: &InjectionSlot,
        after: &Fence,
    ) -> Result<Option<Fence>> {
        let Some(request) = slot.take()? else {
            return Ok(None);
        };
        if !(request.center.x < field.width() && request.center.y < field.height()) {
            warn!(
                "Injection center {:?} lies outside the {}x{} field; only the overlapping part is drawn.",
                request.center,
                field.width(),
                field.height()
            );
        }
        let field = Arc::clone(field);
        let fence = device.submit("inject", &[after], move |pool| {
            let mut dst = field.destination()?;
            let dst_grid: &mut Grid = &mut dst;
            pool.install(move || fill_disc(dst_grid, &request));
            Ok(())
        })?;
        debug!(
            "Injection of radius {} at ({}, {}) submitted.",
            request.radius, request.center.x, request.center.y
        );
        Ok(Some(fence))
    }
}

/// Writes `request.color` into every cell with `dx² + dy² <= r²`, clipped to the grid.
pub fn fill_disc(grid: &mut Grid, request: &InjectionRequest) {
    let width = grid.width();
    let height = grid.height();
    let r = request.radius;
    let r_sq = r as u64 * r as u64;
    let cx = request.center.x;
    let y_min = request.center.y.saturating_sub(r);
    let y_max = request.center.y.saturating_add(r).min(height.saturating_sub(1));
    if y_min > y_max || cx.saturating_sub(r) >= width {
        return;
    }
    let x_min = cx.saturating_sub(r);
    let x_max = cx.saturating_add(r).min(width - 1);
    let color = request.color;
    let center = request.center;

    let rows = &mut grid.cells_mut()[y_min as usize * width as usize..(y_max as usize + 1) * width as usize];
    rows.par_chunks_mut(width as usize).enumerate().for_each(|(offset, row)| {
        let y = y_min + offset as u32;
        for x in x_min..=x_max {
            if UVec2::new(x, y).distance_squared(center) <= r_sq {
                row[x as usize] = color;
            }
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    const RED: Vec4 = Vec4::new(1.0, 0.0, 0.0, 1.0);
    const BLUE: Vec4 = Vec4::new(0.0, 0.0, 1.0, 1.0);

    #[test]
    fn second_request_replaces_first() {
        let slot = InjectionSlot::new();
        slot.request(InjectionRequest::new(UVec2::new(1, 1), 2, RED)).unwrap();
        slot.request(InjectionRequest::new(UVec2::new(5, 5), 3, BLUE)).unwrap();
        let taken = slot.take().unwrap().unwrap();
        assert_eq!(taken.center, UVec2::new(5, 5));
        assert_eq!(taken.color, BLUE);
        assert_eq!(slot.take().unwrap(), None);
        assert!(!slot.is_pending().unwrap());
    }

    #[test]
    fn disc_covers_exact_radius() {
        let mut grid = Grid::filled(11, 11, Vec4::zero()).unwrap();
        fill_disc(&mut grid, &InjectionRequest::new(UVec2::new(5, 5), 2, RED));
        let painted = grid.cells().iter().filter(|c| **c == RED).count();
        // Lattice points with dx² + dy² <= 4.
        assert_eq!(painted, 13);
        assert_eq!(grid.get(UVec2::new(7, 5)), Some(RED));
        assert_eq!(grid.get(UVec2::new(7, 6)), Some(Vec4::zero()));
    }

    #[test]
    fn disc_is_clipped_at_corner() {
        let mut grid = Grid::filled(4, 4, Vec4::zero()).unwrap();
        fill_disc(&mut grid, &InjectionRequest::new(UVec2::new(0, 0), 1, RED));
        assert_eq!(grid.get(UVec2::new(0, 0)), Some(RED));
        assert_eq!(grid.get(UVec2::new(1, 0)), Some(RED));
        assert_eq!(grid.get(UVec2::new(0, 1)), Some(RED));
        assert_eq!(grid.get(UVec2::new(1, 1)), Some(Vec4::zero()));
    }

    #[test]
    fn disc_outside_grid_draws_nothing() {
        let mut grid = Grid::filled(4, 4, Vec4::zero()).unwrap();
        fill_disc(&mut grid, &InjectionRequest::new(UVec2::new(40, 40), 3, RED));
        assert!(grid.cells().iter().all(|c| *c == Vec4::zero()));
    }

    #[test]
    fn zero_radius_paints_single_cell() {
        let mut grid = Grid::filled(3, 3, Vec4::zero()).unwrap();
        fill_disc(&mut grid, &InjectionRequest::new(UVec2::new(1, 2), 0, BLUE));
        assert_eq!(grid.cells().iter().filter(|c| **c == BLUE).count(), 1);
        assert_eq!(grid.get(UVec2::new(1, 2)), Some(BLUE));
    }
}
