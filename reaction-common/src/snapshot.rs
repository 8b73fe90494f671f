use crate::vecmath::{UVec2, Vec4};
use serde::{Deserialize, Serialize};

/// A read-only copy of the current field at a specific tick.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldFrame {
    /// Field generation (number of completed swaps) the copy was taken from.
    pub tick: u64,
    pub width: u32,
    pub height: u32,
    /// Row-major cells, `width * height` entries.
    pub cells: Vec<Vec4>,
}

impl FieldFrame {
    /// Returns the cell at `(x, y)` or `None` when out of bounds.
    pub fn get(&self, x: u32, y: u32) -> Option<Vec4> {
        if x >= self.width || y >= self.height {
            return None;
        }
        self.cells.get((y * self.width + x) as usize).copied()
    }
}

/// One completed harness run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Measurement {
    /// Position of the run in the whole sweep (0-based).
    pub run_index: u32,
    pub sweep_index: u32,
    pub repetition: u32,
    /// Control-parameter value the run was armed with.
    pub control_value: f32,
    /// Ticks from arming until arrival (or until timeout).
    pub ticks: u64,
    /// Wall-clock duration of the run in milliseconds.
    pub elapsed_ms: f64,
    /// False when the run hit `timeout_ticks` before the wave arrived.
    pub arrived: bool,
}

/// Everything the harness produced, in sweep order.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SweepReport {
    pub width: u32,
    pub height: u32,
    /// Start and end coordinates in grid space.
    pub start: UVec2,
    pub end: UVec2,
    pub measurements: Vec<Measurement>,
    /// Set once the last sweep point has been measured.
    pub completed: bool,
    /// Number of steps submitted when the report was taken.
    pub total_ticks: u64,
}
