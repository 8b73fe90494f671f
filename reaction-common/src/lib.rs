pub mod config;
pub mod files;
pub mod params;
pub mod snapshot;
pub mod vecmath;

// Re-export key types for easier use by dependent crates
pub use config::{
    BoundaryPolicy, BrushConfig, ComputeConfig, EngineConfig, ExperimentConfig, GridConfig,
    OutputConfig, ReactionConfig,
};
pub use files::{load_report, read_frames};
pub use params::StepParams;
pub use snapshot::{FieldFrame, Measurement, SweepReport};
pub use vecmath::{clamp, UVec2, Vec4};
