use anyhow::{anyhow, bail, Result};
use reaction_common::{FieldFrame, UVec2, Vec4};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

/// A row-major grid of 4-channel cells.
#[derive(Debug, Clone, PartialEq)]
pub struct Grid {
    width: u32,
    height: u32,
    cells: Vec<Vec4>,
}

impl Grid {
    /// Creates a grid with every cell set to `fill`.
    pub fn filled(width: u32, height: u32, fill: Vec4) -> Result<Self> {
        if width == 0 || height == 0 {
            bail!("grid dimensions must be non-zero, got {}x{}", width, height);
        }
        Ok(Self { width, height, cells: vec![fill; width as usize * height as usize] })
    }

    /// Wraps existing row-major cells.
    pub fn from_cells(width: u32, height: u32, cells: Vec<Vec4>) -> Result<Self> {
        if width == 0 || height == 0 {
            bail!("grid dimensions must be non-zero, got {}x{}", width, height);
        }
        if cells.len() != width as usize * height as usize {
            bail!(
                "cell count {} does not match {}x{} grid",
                cells.len(),
                width,
                height
            );
        }
        Ok(Self { width, height, cells })
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn cells(&self) -> &[Vec4] {
        &self.cells
    }

    pub(crate) fn cells_mut(&mut self) -> &mut [Vec4] {
        &mut self.cells
    }

    #[inline(always)]
    pub fn index(&self, x: u32, y: u32) -> usize {
        y as usize * self.width as usize + x as usize
    }

    pub fn contains(&self, pos: UVec2) -> bool {
        pos.x < self.width && pos.y < self.height
    }

    pub fn get(&self, pos: UVec2) -> Option<Vec4> {
        if self.contains(pos) {
            Some(self.cells[self.index(pos.x, pos.y)])
        } else {
            None
        }
    }

    pub fn set(&mut self, pos: UVec2, value: Vec4) -> Result<()> {
        if !self.contains(pos) {
            bail!("cell ({}, {}) outside {}x{} grid", pos.x, pos.y, self.width, self.height);
        }
        let idx = self.index(pos.x, pos.y);
        self.cells[idx] = value;
        Ok(())
    }

    fn same_shape(&self, other: &Grid) -> bool {
        self.width == other.width && self.height == other.height
    }
}

/// Identity of one of the two field buffers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferId {
    A,
    B,
}

impl BufferId {
    pub fn other(self) -> Self {
        match self {
            BufferId::A => BufferId::B,
            BufferId::B => BufferId::A,
        }
    }

    fn slot(self) -> usize {
        match self {
            BufferId::A => 0,
            BufferId::B => 1,
        }
    }

    /// `A` is current after an even number of swaps.
    fn for_generation(generation: u64) -> Self {
        if generation % 2 == 0 { BufferId::A } else { BufferId::B }
    }
}

/// Two same-shaped grids and the swap counter naming which one is current.
///
/// Writers hold a buffer's write lock for a whole pass, and a reader only
/// keeps a lock if the buffer was still current once the lock was taken, so
/// `current()` never hands out the destination between step and swap.
#[derive(Debug)]
pub struct FieldStore {
    buffers: [RwLock<Grid>; 2],
    generation: AtomicU64,
    width: u32,
    height: u32,
}

impl FieldStore {
    /// Both buffers start with the initial content; `A` is current.
    pub fn new(initial: Grid) -> Self {
        let width = initial.width();
        let height = initial.height();
        let second = initial.clone();
        Self {
            buffers: [RwLock::new(initial), RwLock::new(second)],
            generation: AtomicU64::new(0),
            width,
            height,
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn current_id(&self) -> BufferId {
        BufferId::for_generation(self.generation())
    }

    /// Number of swaps performed so far.
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    /// Read handle to the grid currently considered valid output.
    pub fn current(&self) -> Result<RwLockReadGuard<'_, Grid>> {
        self.current_at().map(|(grid, _)| grid)
    }

    /// Like `current()`, also returning the swap count the grid belongs to.
    fn current_at(&self) -> Result<(RwLockReadGuard<'_, Grid>, u64)> {
        loop {
            let generation = self.generation();
            let grid = self.read(BufferId::for_generation(generation))?;
            // A swap between the load and the lock leaves us holding the destination.
            if self.generation() == generation {
                return Ok((grid, generation));
            }
        }
    }

    /// Write handle to the grid that is not current.
    pub(crate) fn destination(&self) -> Result<RwLockWriteGuard<'_, Grid>> {
        let id = self.current_id().other();
        self.buffers[id.slot()]
            .write()
            .map_err(|_| anyhow!("field buffer {:?} lock poisoned", id))
    }

    /// Current (read) and destination (write) together, as the stepper needs them.
    pub(crate) fn step_buffers(&self) -> Result<(RwLockReadGuard<'_, Grid>, RwLockWriteGuard<'_, Grid>)> {
        let src = self.current()?;
        let dst = self.destination()?;
        if !src.same_shape(&dst) {
            bail!("field buffers changed shape");
        }
        Ok((src, dst))
    }

    /// Exchanges current and destination. Returns the new current id.
    pub(crate) fn swap(&self) -> BufferId {
        let previous = self.generation.fetch_add(1, Ordering::AcqRel);
        BufferId::for_generation(previous + 1)
    }

    /// Copies the current grid for a consumer that must not hold the lock.
    pub fn snapshot(&self) -> Result<FieldFrame> {
        let (grid, generation) = self.current_at()?;
        Ok(FieldFrame {
            tick: generation,
            width: grid.width(),
            height: grid.height(),
            cells: grid.cells().to_vec(),
        })
    }

    fn read(&self, id: BufferId) -> Result<RwLockReadGuard<'_, Grid>> {
        self.buffers[id.slot()]
            .read()
            .map_err(|_| anyhow!("field buffer {:?} lock poisoned", id))
    }
}
