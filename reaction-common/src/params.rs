use serde::{Deserialize, Serialize};

/// Scalar parameters consumed by one step. Taken as an immutable snapshot
/// of the shared reaction parameters right before the step is submitted.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StepParams {
    /// Amplitude of the per-cell stochastic perturbation.
    pub noise_scale: f32,
    /// Control parameter swept by the experiment harness.
    pub passive_threshold: f32,
    /// Two-word seed regenerated for every step, shared by all cells.
    pub seed: [u32; 2],
    /// Number of steps completed before this one.
    pub tick: u64,
}

impl StepParams {
    pub fn new(noise_scale: f32, passive_threshold: f32, seed: [u32; 2], tick: u64) -> Self {
        Self { noise_scale, passive_threshold, seed, tick }
    }
}
