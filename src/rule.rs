use reaction_common::{ReactionConfig, StepParams, Vec4};

/// The four stencil neighbours of a cell, already resolved for the boundary policy.
#[derive(Debug, Clone, Copy)]
pub struct Neighbors {
    pub left: Vec4,
    pub right: Vec4,
    pub up: Vec4,
    pub down: Vec4,
}

impl Neighbors {
    /// Mean of channel 0 over the four neighbours.
    #[inline(always)]
    pub fn mean_x(&self) -> f32 {
        0.25 * (self.left.x + self.right.x + self.up.x + self.down.x)
    }
}

/// A local update rule applied to every cell of the field once per step.
pub trait ReactionRule: Send + Sync {
    fn name(&self) -> &'static str;

    /// Computes the next value of a cell. `noise` is uniform in `[0, 1)`.
    fn react(&self, center: Vec4, neighbors: &Neighbors, params: &StepParams, noise: f32) -> Vec4;

    /// Inclusive bounds channel 0 is clamped into after `react`.
    fn bounds(&self) -> (f32, f32);
}

/// Threshold-relay excitable medium.
///
/// Channels: `x` excitation, `y` refractory level, `z` last stimulus, `w` alpha.
/// A resting cell (`y <= 0`) fires when the mean neighbour excitation plus
/// noise exceeds the passive threshold; otherwise excitation decays and the
/// refractory level recovers.
#[derive(Debug, Clone)]
pub struct ExcitableRelay {
    pub decay: f32,
    pub recovery: f32,
    pub fire_level: f32,
    pub channel0_min: f32,
    pub channel0_max: f32,
}

impl ExcitableRelay {
    pub fn from_config(config: &ReactionConfig) -> Self {
        Self {
            decay: config.decay,
            recovery: config.recovery,
            fire_level: config.fire_level,
            channel0_min: config.channel0_min,
            channel0_max: config.channel0_max,
        }
    }
}

impl ReactionRule for ExcitableRelay {
    fn name(&self) -> &'static str {
        "excitable-relay"
    }

    fn react(&self, center: Vec4, neighbors: &Neighbors, params: &StepParams, noise: f32) -> Vec4 {
        let stimulus = neighbors.mean_x() + params.noise_scale * (noise - 0.5);
        let resting = center.y <= 0.0;
        if resting && stimulus > params.passive_threshold {
            Vec4::new(self.fire_level, 1.0, stimulus, center.w)
        } else {
            Vec4::new(
                center.x * self.decay,
                (center.y - self.recovery).max(0.0),
                stimulus,
                center.w,
            )
        }
    }

    fn bounds(&self) -> (f32, f32) {
        (self.channel0_min, self.channel0_max)
    }
}

/// Uniform value in `[0, 1)` for cell `(x, y)` under the step's seed pair.
#[inline(always)]
pub fn cell_noise(seed: [u32; 2], x: u32, y: u32) -> f32 {
    let mut h = ((seed[0] as u64) << 32 | seed[1] as u64)
        ^ ((x as u64) << 32 | y as u64).wrapping_mul(0x9E37_79B9_7F4A_7C15);
    // splitmix64 finalizer
    h = (h ^ (h >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    h = (h ^ (h >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    h ^= h >> 31;
    (h >> 40) as f32 / (1u64 << 24) as f32
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rule() -> ExcitableRelay {
        ExcitableRelay::from_config(&ReactionConfig::default())
    }

    fn params(threshold: f32) -> StepParams {
        StepParams::new(0.0, threshold, [1, 2], 0)
    }

    fn neighbors_with(x: [f32; 4]) -> Neighbors {
        let cell = |v| Vec4::new(v, 0.0, 0.0, 1.0);
        Neighbors { left: cell(x[0]), right: cell(x[1]), up: cell(x[2]), down: cell(x[3]) }
    }

    #[test]
    fn resting_cell_fires_above_threshold() {
        let out = rule().react(Vec4::new(0.0, 0.0, 0.0, 1.0), &neighbors_with([1.0, 0.0, 0.0, 0.0]), &params(0.1), 0.5);
        assert_eq!(out.x, 1.0);
        assert_eq!(out.y, 1.0);
        assert_eq!(out.w, 1.0);
    }

    #[test]
    fn resting_cell_stays_below_threshold() {
        let out = rule().react(Vec4::new(0.0, 0.0, 0.0, 1.0), &neighbors_with([1.0, 0.0, 0.0, 0.0]), &params(0.3), 0.5);
        assert_eq!(out.x, 0.0);
        assert_eq!(out.y, 0.0);
    }

    #[test]
    fn refractory_cell_decays_and_recovers() {
        let out = rule().react(Vec4::new(1.0, 1.0, 0.0, 1.0), &neighbors_with([1.0; 4]), &params(0.1), 0.5);
        assert_eq!(out.x, 0.5);
        assert!((out.y - 0.95).abs() < 1e-6);
    }

    #[test]
    fn noise_is_deterministic_and_in_range() {
        for y in 0..16 {
            for x in 0..16 {
                let n = cell_noise([11, 22], x, y);
                assert!((0.0..1.0).contains(&n));
                assert_eq!(n, cell_noise([11, 22], x, y));
            }
        }
        assert_ne!(cell_noise([11, 22], 3, 4), cell_noise([11, 23], 3, 4));
    }
}
