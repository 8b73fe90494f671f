use serde::{Deserialize, Serialize};
use anyhow::Result;
use std::path::Path;

/// How the 4-neighbour stencil treats cells on the grid boundary.
#[derive(Deserialize, Serialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum BoundaryPolicy {
    /// Edge cells are updated; neighbour lookups are clamped into the grid.
    #[default]
    Clamp,
    /// Edge cells are not stencil-updated and are carried over unchanged.
    Exclude,
}

// Field dimensions and initial content
#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct GridConfig {
    #[serde(default = "default_grid_size")]
    pub width: u32,
    #[serde(default = "default_grid_size")]
    pub height: u32,
    #[serde(default)]
    pub boundary: BoundaryPolicy,
    /// Optional PNG/JPEG used as initial field; overrides width/height.
    #[serde(default)]
    pub initial_image: Option<String>,
    /// Cell value every cell starts with when no image is given.
    #[serde(default = "default_rest_state")]
    pub rest_state: [f32; 4],
}

// Parameters of the excitable relay rule
#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct ReactionConfig {
    #[serde(default = "default_noise_scale")]
    pub noise_scale: f32,
    /// Initial control-parameter value, also the sweep center.
    #[serde(default = "default_passive_threshold")]
    pub passive_threshold: f32,
    /// Per-step multiplicative decay of channel 0 outside of firing.
    #[serde(default = "default_decay")]
    pub decay: f32,
    /// Per-step decrease of the refractory level (channel 1).
    #[serde(default = "default_recovery")]
    pub recovery: f32,
    /// Channel-0 value written when a cell fires.
    #[serde(default = "default_fire_level")]
    pub fire_level: f32,
    #[serde(default)]
    pub channel0_min: f32,
    #[serde(default = "default_channel0_max")]
    pub channel0_max: f32,
}

// Interactive brush defaults used by the input layer
#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct BrushConfig {
    #[serde(default = "default_radius")]
    pub radius: u32,
    #[serde(default = "default_test_color")]
    pub color: [f32; 4],
}

// Settings of the automated latency sweep
#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct ExperimentConfig {
    #[serde(default)]
    pub enabled: bool,
    /// Logical start coordinate (display convention).
    #[serde(default = "default_start")]
    pub start: [u32; 2],
    /// Logical end coordinate (display convention).
    #[serde(default = "default_end")]
    pub end: [u32; 2],
    /// Invert the vertical axis when mapping logical to grid coordinates.
    #[serde(default = "default_true")]
    pub flip_y: bool,
    #[serde(default = "default_detection_threshold")]
    pub detection_threshold: f32,
    #[serde(default = "default_cooldown_ticks")]
    pub cooldown_ticks: u64,
    /// Give up on a run after this many ticks (None = wait forever).
    #[serde(default)]
    pub timeout_ticks: Option<u64>,
    #[serde(default = "default_one")]
    pub sweep_points: u32,
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval: f32,
    #[serde(default = "default_repetitions")]
    pub repetitions: u32,
    #[serde(default = "default_radius")]
    pub radius: u32,
    #[serde(default = "default_test_color")]
    pub test_color: [f32; 4],
    /// Stop the loop once the sweep reports completion.
    #[serde(default = "default_true")]
    pub stop_on_completion: bool,
}

// Compute substrate sizing
#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct ComputeConfig {
    /// Rayon worker threads (None = rayon default).
    #[serde(default)]
    pub threads: Option<usize>,
    /// Submissions allowed in flight before `submit` blocks.
    #[serde(default = "default_queue_depth")]
    pub queue_depth: usize,
}

// Configuration for output settings, loaded from config.toml
#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct OutputConfig {
    #[serde(default = "default_base_filename")]
    pub base_filename: String,
    /// Report format: "json", "bincode", "messagepack" or "csv".
    #[serde(default)]
    pub format: Option<String>,
    #[serde(default = "default_true")]
    pub save_report: bool,
    #[serde(default)]
    pub record_frames: bool,
    #[serde(default = "default_frame_interval_ms")]
    pub frame_interval_ms: u64,
    #[serde(default = "default_max_frames")]
    pub max_frames: usize,
}

// Main engine configuration structure, loaded from config.toml.
#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct EngineConfig {
    #[serde(default)]
    pub grid: GridConfig,
    #[serde(default)]
    pub reaction: ReactionConfig,
    #[serde(default)]
    pub brush: BrushConfig,
    #[serde(default)]
    pub experiment: ExperimentConfig,
    #[serde(default)]
    pub compute: ComputeConfig,
    #[serde(default)]
    pub output: OutputConfig,
    /// Seed of the generator producing the per-step seed pairs.
    #[serde(default = "default_seed")]
    pub seed: u64,
    /// Stop after this many ticks even if the sweep is not done.
    #[serde(default)]
    pub max_ticks: Option<u64>,
}

impl EngineConfig {
    /// Loads the engine configuration from a TOML file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path_ref = path.as_ref();

        let config_str = std::fs::read_to_string(path_ref)
            .map_err(|e| anyhow::anyhow!("Failed to read config file '{}': {}", path_ref.display(), e))?;
        let config = Self::from_toml_str(&config_str)
            .map_err(|e| anyhow::anyhow!("Invalid config '{}': {}", path_ref.display(), e))?;
        Ok(config)
    }

    /// Parses and validates a TOML document.
    pub fn from_toml_str(config_str: &str) -> Result<Self> {
        let config: EngineConfig = toml::from_str(config_str)
            .map_err(|e| anyhow::anyhow!("Failed to parse TOML: {}", e))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.grid.initial_image.is_none() && (self.grid.width == 0 || self.grid.height == 0) {
            anyhow::bail!("grid width and height must be greater than 0.");
        }
        let r = &self.reaction;
        if !(0.0..=1.0).contains(&r.decay) {
            anyhow::bail!("reaction.decay must be within [0, 1], got {}.", r.decay);
        }
        if r.recovery <= 0.0 {
            anyhow::bail!("reaction.recovery must be positive.");
        }
        if r.channel0_min > r.channel0_max {
            anyhow::bail!(
                "reaction.channel0_min ({}) exceeds channel0_max ({}).",
                r.channel0_min,
                r.channel0_max
            );
        }
        if !r.noise_scale.is_finite() || !r.passive_threshold.is_finite() {
            anyhow::bail!("reaction scalars must be finite.");
        }
        if self.compute.queue_depth == 0 {
            anyhow::bail!("compute.queue_depth must be at least 1.");
        }
        if self.compute.threads == Some(0) {
            anyhow::bail!("compute.threads must be at least 1 when set.");
        }
        let e = &self.experiment;
        if e.enabled {
            if e.sweep_points == 0 || e.repetitions == 0 {
                anyhow::bail!("experiment.sweep_points and experiment.repetitions must be at least 1.");
            }
            if !e.detection_threshold.is_finite() {
                anyhow::bail!("experiment.detection_threshold must be finite.");
            }
            if e.timeout_ticks == Some(0) {
                anyhow::bail!("experiment.timeout_ticks must be at least 1 when set.");
            }
        }
        Ok(())
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            grid: GridConfig::default(),
            reaction: ReactionConfig::default(),
            brush: BrushConfig::default(),
            experiment: ExperimentConfig::default(),
            compute: ComputeConfig::default(),
            output: OutputConfig::default(),
            seed: default_seed(),
            max_ticks: None,
        }
    }
}

impl Default for GridConfig {
    fn default() -> Self {
        GridConfig {
            width: default_grid_size(),
            height: default_grid_size(),
            boundary: BoundaryPolicy::Clamp,
            initial_image: None,
            rest_state: default_rest_state(),
        }
    }
}

impl Default for ReactionConfig {
    fn default() -> Self {
        ReactionConfig {
            noise_scale: default_noise_scale(),
            passive_threshold: default_passive_threshold(),
            decay: default_decay(),
            recovery: default_recovery(),
            fire_level: default_fire_level(),
            channel0_min: 0.0,
            channel0_max: default_channel0_max(),
        }
    }
}

impl Default for BrushConfig {
    fn default() -> Self {
        BrushConfig { radius: default_radius(), color: default_test_color() }
    }
}

impl Default for ExperimentConfig {
    fn default() -> Self {
        ExperimentConfig {
            enabled: false,
            start: default_start(),
            end: default_end(),
            flip_y: true,
            detection_threshold: default_detection_threshold(),
            cooldown_ticks: default_cooldown_ticks(),
            timeout_ticks: None,
            sweep_points: 1,
            sweep_interval: default_sweep_interval(),
            repetitions: default_repetitions(),
            radius: default_radius(),
            test_color: default_test_color(),
            stop_on_completion: true,
        }
    }
}

impl Default for ComputeConfig {
    fn default() -> Self {
        ComputeConfig { threads: None, queue_depth: default_queue_depth() }
    }
}

impl Default for OutputConfig {
    fn default() -> Self {
        OutputConfig {
            base_filename: default_base_filename(),
            format: None,
            save_report: true,
            record_frames: false,
            frame_interval_ms: default_frame_interval_ms(),
            max_frames: default_max_frames(),
        }
    }
}

fn default_grid_size() -> u32 {
    256
}

fn default_rest_state() -> [f32; 4] {
    [0.0, 0.0, 0.0, 1.0]
}

fn default_noise_scale() -> f32 {
    0.0
}

fn default_passive_threshold() -> f32 {
    0.106130
}

fn default_decay() -> f32 {
    0.5
}

fn default_recovery() -> f32 {
    0.05
}

fn default_fire_level() -> f32 {
    1.0
}

fn default_channel0_max() -> f32 {
    1.0
}

fn default_radius() -> u32 {
    5
}

fn default_test_color() -> [f32; 4] {
    [1.0, 0.0, 0.0, 1.0]
}

fn default_start() -> [u32; 2] {
    [210, 157]
}

fn default_end() -> [u32; 2] {
    [137, 157]
}

fn default_detection_threshold() -> f32 {
    0.2
}

fn default_cooldown_ticks() -> u64 {
    64
}

fn default_sweep_interval() -> f32 {
    0.01
}

fn default_repetitions() -> u32 {
    7
}

fn default_queue_depth() -> usize {
    4
}

fn default_base_filename() -> String {
    "reaction".to_string()
}

fn default_frame_interval_ms() -> u64 {
    100
}

fn default_max_frames() -> usize {
    600
}

fn default_seed() -> u64 {
    0x5EED_1234
}

fn default_one() -> u32 {
    1
}

fn default_true() -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_document_uses_defaults() {
        let config = EngineConfig::from_toml_str("").unwrap();
        assert_eq!(config.grid.width, 256);
        assert_eq!(config.grid.boundary, BoundaryPolicy::Clamp);
        assert_eq!(config.experiment.detection_threshold, 0.2);
        assert!(!config.experiment.enabled);
        assert_eq!(config.compute.queue_depth, 4);
    }

    #[test]
    fn sections_override_defaults() {
        let config = EngineConfig::from_toml_str(
            r#"
            seed = 7
            [grid]
            width = 64
            height = 32
            boundary = "exclude"
            [experiment]
            enabled = true
            sweep_points = 3
            repetitions = 2
            timeout_ticks = 500
            "#,
        )
        .unwrap();
        assert_eq!(config.seed, 7);
        assert_eq!((config.grid.width, config.grid.height), (64, 32));
        assert_eq!(config.grid.boundary, BoundaryPolicy::Exclude);
        assert_eq!(config.experiment.sweep_points, 3);
        assert_eq!(config.experiment.timeout_ticks, Some(500));
    }

    #[test]
    fn invalid_values_are_rejected() {
        assert!(EngineConfig::from_toml_str("[grid]\nwidth = 0").is_err());
        assert!(EngineConfig::from_toml_str("[reaction]\ndecay = 1.5").is_err());
        assert!(EngineConfig::from_toml_str("[compute]\nqueue_depth = 0").is_err());
        assert!(EngineConfig::from_toml_str("[experiment]\nenabled = true\nrepetitions = 0").is_err());
        assert!(EngineConfig::from_toml_str("[grid]\nboundary = \"wrap\"").is_err());
    }
}
