//! Double-buffered reaction-diffusion engine on a CPU compute queue, with an
//! automated propagation-latency sweep.

pub mod compute;
pub mod engine;
pub mod experiment;
pub mod field;
pub mod injection;
pub mod output;
pub mod recorder;
pub mod rule;
pub mod sampler;
pub mod seed;
pub mod stepper;

pub use engine::{CycleReport, Engine, EngineContext, EngineHandle, ReactionParameters, RunToken};
pub use field::{BufferId, FieldStore, Grid};
pub use rule::{ExcitableRelay, Neighbors, ReactionRule};
