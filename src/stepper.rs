use crate::compute::{ComputeDevice, Fence};
use crate::field::{FieldStore, Grid};
use crate::rule::{cell_noise, Neighbors, ReactionRule};
use anyhow::{bail, Result};
use log::trace;
use rayon::prelude::*;
use reaction_common::{clamp, BoundaryPolicy, StepParams, Vec4};
use std::sync::Arc;

/// Submits one full-grid application of the reaction rule per call.
pub struct Stepper {
    rule: Arc<dyn ReactionRule>,
    boundary: BoundaryPolicy,
}

impl Stepper {
    pub fn new(rule: Arc<dyn ReactionRule>, boundary: BoundaryPolicy) -> Self {
        Self { rule, boundary }
    }

    pub fn rule_name(&self) -> &'static str {
        self.rule.name()
    }

    pub fn boundary(&self) -> BoundaryPolicy {
        self.boundary
    }

    /// Enqueues a pass that rewrites the destination grid from the current one.
    pub fn submit(
        &self,
        device: &ComputeDevice,
        field: &Arc<FieldStore>,
        params: StepParams,
        waits: &[&Fence],
    ) -> Result<Fence> {
        let field = Arc::clone(field);
        let rule = Arc::clone(&self.rule);
        let boundary = self.boundary;
        device.submit("step", waits, move |pool| {
            let (src, mut dst) = field.step_buffers()?;
            let src_grid: &Grid = &src;
            let dst_grid: &mut Grid = &mut dst;
            let rule_ref = rule.as_ref();
            pool.install(move || step_grid(src_grid, dst_grid, rule_ref, boundary, &params))?;
            trace!("Step pass for tick {} written.", params.tick);
            Ok(())
        })
    }
}

/// Computes `dst` from `src`, one cell at a time, rows in parallel.
pub fn step_grid(
    src: &Grid,
    dst: &mut Grid,
    rule: &dyn ReactionRule,
    boundary: BoundaryPolicy,
    params: &StepParams,
) -> Result<()> {
    if src.width() != dst.width() || src.height() != dst.height() {
        bail!(
            "step source {}x{} and destination {}x{} differ",
            src.width(),
            src.height(),
            dst.width(),
            dst.height()
        );
    }
    let width = src.width();
    let (lo, hi) = rule.bounds();

    dst.cells_mut()
        .par_chunks_mut(width as usize)
        .enumerate()
        .for_each(|(row, out_row)| {
            let y = row as u32;
            for (col, out) in out_row.iter_mut().enumerate() {
                let x = col as u32;
                let mut next = update_cell(src, x, y, rule, boundary, params);
                next.x = clamp(next.x, lo, hi);
                *out = next;
            }
        });
    Ok(())
}

#[inline(always)]
fn update_cell(
    src: &Grid,
    x: u32,
    y: u32,
    rule: &dyn ReactionRule,
    boundary: BoundaryPolicy,
    params: &StepParams,
) -> Vec4 {
    let width = src.width();
    let height = src.height();
    let cells = src.cells();
    let center = cells[src.index(x, y)];

    let on_edge = x == 0 || y == 0 || x == width - 1 || y == height - 1;
    if on_edge && boundary == BoundaryPolicy::Exclude {
        return center;
    }

    // Clamp neighbour lookups at the boundary.
    let x_left = x.saturating_sub(1);
    let x_right = (x + 1).min(width - 1);
    let y_up = y.saturating_sub(1);
    let y_down = (y + 1).min(height - 1);
    let neighbors = Neighbors {
        left: cells[src.index(x_left, y)],
        right: cells[src.index(x_right, y)],
        up: cells[src.index(x, y_up)],
        down: cells[src.index(x, y_down)],
    };

    rule.react(center, &neighbors, params, cell_noise(params.seed, x, y))
}
