use anyhow::Result;
use clap::Parser;
use log::{debug, error, info, warn};
use std::time::Duration;

use reaction_common::EngineConfig;
use reaction_engine::recorder::FrameRecorder;
use reaction_engine::{output, seed, Engine, RunToken};

#[derive(Parser, Debug)]
#[command(author, version, about = "Double-buffered reaction-diffusion engine with a latency sweep harness")]
struct Args {
    /// Engine configuration file
    #[arg(short, long, default_value = "config.toml")]
    config: String,

    /// Stop after this many ticks (overrides the config)
    #[arg(long)]
    max_ticks: Option<u64>,

    /// Override the report format ("json", "bincode", "messagepack", "csv")
    #[arg(long)]
    format: Option<String>,
}

fn main() -> Result<()> {
    // Initialize the logger
    env_logger::init();
    let args = Args::parse();

    if let Err(e) = run(args) {
        error!("Reaction engine failed: {:#}", e);
        return Err(e);
    }
    Ok(())
}

fn run(args: Args) -> Result<()> {
    info!("Starting Reaction Engine...");

    // --- Load Configuration ---
    let config = EngineConfig::load(&args.config)?;
    debug!("Engine configuration: {:#?}", config);
    let max_ticks = args.max_ticks.or(config.max_ticks);
    if max_ticks.is_none() && !(config.experiment.enabled && config.experiment.stop_on_completion) {
        warn!("No tick limit and no completing sweep; the engine runs until interrupted.");
    }

    // --- Initialize Engine ---
    let initial = seed::initial_grid(&config.grid)?;
    let engine = Engine::from_config(&config, initial)?;
    let token = RunToken::new();

    // --- Display Consumer ---
    let recorder = if config.output.record_frames {
        let path = format!("{}_frames.bin", config.output.base_filename);
        Some(FrameRecorder::spawn(
            std::sync::Arc::clone(engine.field()),
            path,
            Duration::from_millis(config.output.frame_interval_ms),
            config.output.max_frames,
            token.clone(),
        )?)
    } else {
        None
    };

    // --- Engine Loop ---
    let handle = engine.spawn(token.clone(), max_ticks)?;
    let result = handle.join();
    token.cancel();

    if let Some(recorder) = recorder {
        let path = recorder.path().to_path_buf();
        let frames = recorder.finish()?;
        info!("{} frames saved to {}", frames, path.display());
    }
    let report = result?;

    // --- Save Recorded Data ---
    if config.output.save_report {
        let format = args
            .format
            .as_deref()
            .or(config.output.format.as_deref())
            .unwrap_or("json");
        output::save_report(&report, &config.output.base_filename, format)?;
    } else {
        info!("Skipping saving the report as per config (save_report is false).");
    }

    if config.experiment.enabled && !report.completed {
        warn!(
            "Sweep incomplete: {} of {} runs measured.",
            report.measurements.len(),
            config.experiment.sweep_points * config.experiment.repetitions
        );
    }
    info!("Engine stopped after {} ticks.", report.total_ticks);
    Ok(())
}
