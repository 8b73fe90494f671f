use crate::compute::{ComputeDevice, Fence};
use crate::experiment::{CoordinateSpace, Harness, HarnessEvent};
use crate::field::{FieldStore, Grid};
use crate::injection::{InjectionRequest, InjectionSlot, Injector};
use crate::rule::{ExcitableRelay, ReactionRule};
use crate::sampler::Sampler;
use crate::stepper::Stepper;
use anyhow::{anyhow, Result};
use log::{debug, info, trace};
use rand::prelude::*;
use reaction_common::{BrushConfig, EngineConfig, StepParams, SweepReport, UVec2, Vec4};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Instant;


/// Cooperative stop flag checked once per cycle.
#[derive(Debug, Clone)]
pub struct RunToken(Arc<AtomicBool>);

impl RunToken {
    pub fn new() -> Self {
        Self(Arc::new(AtomicBool::new(true)))
    }

    pub fn is_running(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }

    pub fn cancel(&self) {
        self.0.store(false, Ordering::Release);
    }
}

impl Default for RunToken {
    fn default() -> Self {
        Self::new()
    }
}

/// Scalars read by every step and written from outside the loop thread.
///
/// Each scalar is an independent lock-free `f32` stored as bits; a step sees
/// whatever value was stored last before its snapshot was taken.
#[derive(Debug)]
pub struct ReactionParameters {
    noise_scale: AtomicU32,
    passive_threshold: AtomicU32,
}

impl ReactionParameters {
    pub fn new(noise_scale: f32, passive_threshold: f32) -> Self {
        Self {
            noise_scale: AtomicU32::new(noise_scale.to_bits()),
            passive_threshold: AtomicU32::new(passive_threshold.to_bits()),
        }
    }

    pub fn noise_scale(&self) -> f32 {
        f32::from_bits(self.noise_scale.load(Ordering::Relaxed))
    }

    pub fn set_noise_scale(&self, value: f32) {
        self.noise_scale.store(value.to_bits(), Ordering::Relaxed);
    }

    pub fn passive_threshold(&self) -> f32 {
        f32::from_bits(self.passive_threshold.load(Ordering::Relaxed))
    }

    pub fn set_passive_threshold(&self, value: f32) {
        self.passive_threshold.store(value.to_bits(), Ordering::Relaxed);
    }

    /// Immutable parameters for one step.
    pub fn snapshot(&self, seed: [u32; 2], tick: u64) -> StepParams {
        StepParams::new(self.noise_scale(), self.passive_threshold(), seed, tick)
    }
}

/// State shared between the loop thread and its outside callers.
#[derive(Debug)]
pub struct EngineContext {
    params: ReactionParameters,
    injection: InjectionSlot,
    field: Arc<FieldStore>,
    brush: BrushConfig,
}

impl EngineContext {
    pub fn params(&self) -> &ReactionParameters {
        &self.params
    }

    /// Read-only view for display consumers.
    pub fn field(&self) -> &Arc<FieldStore> {
        &self.field
    }

    /// Replaces the pending injection. Grid coordinates.
    pub fn request_injection(&self, center: UVec2, radius: u32, color: Vec4) -> Result<()> {
        self.injection.request(InjectionRequest::new(center, radius, color))
    }

    /// Injection with the configured brush radius and color.
    pub fn brush_at(&self, center: UVec2) -> Result<()> {
        self.request_injection(center, self.brush.radius, Vec4::from(self.brush.color))
    }

    pub fn injection_pending(&self) -> Result<bool> {
        self.injection.is_pending()
    }
}

/// What one loop cycle did.
#[derive(Debug, Clone, Default)]
pub struct CycleReport {
    /// Steps submitted so far, this cycle's included; some may still be queued.
    pub tick: u64,
    pub armed: bool,
    pub injected: bool,
    pub events: Vec<HarnessEvent>,
}

impl CycleReport {
    pub fn completed(&self) -> bool {
        self.events.iter().any(|e| *e == HarnessEvent::Completed)
    }
}

/// Owns the field, the passes and the harness; driven by one loop thread.
pub struct Engine {
    device: ComputeDevice,
    field: Arc<FieldStore>,
    context: Arc<EngineContext>,
    stepper: Stepper,
    injector: Injector,
    sampler: Sampler,
    harness: Option<Harness>,
    rng: StdRng,
    tick: u64,
    in_flight: Fence,
    report: SweepReport,
    stop_on_completion: bool,
}

impl Engine {
    /// Builds an engine running the excitable relay rule from `config.reaction`.
    pub fn from_config(config: &EngineConfig, initial: Grid) -> Result<Self> {
        let rule = Arc::new(ExcitableRelay::from_config(&config.reaction));
        Self::new(config, rule, initial)
    }

    pub fn new(config: &EngineConfig, rule: Arc<dyn ReactionRule>, initial: Grid) -> Result<Self> {
        let device = ComputeDevice::new(&config.compute)?;
        let field = Arc::new(FieldStore::new(initial));

        let harness = if config.experiment.enabled {
            let space = CoordinateSpace {
                width: field.width(),
                height: field.height(),
                flip_y: config.experiment.flip_y,
            };
            Some(Harness::new(&config.experiment, config.reaction.passive_threshold, space)?)
        } else {
            None
        };

        let report = SweepReport {
            width: field.width(),
            height: field.height(),
            start: harness.as_ref().map(|h| h.state().start).unwrap_or_default(),
            end: harness.as_ref().map(|h| h.state().end).unwrap_or_default(),
            ..SweepReport::default()
        };

        let context = Arc::new(EngineContext {
            params: ReactionParameters::new(config.reaction.noise_scale, config.reaction.passive_threshold),
            injection: InjectionSlot::new(),
            field: Arc::clone(&field),
            brush: config.brush.clone(),
        });

        let stepper = Stepper::new(rule, config.grid.boundary);
        info!(
            "Engine ready: {}x{} field, rule '{}', boundary {:?}, {} compute threads.",
            field.width(),
            field.height(),
            stepper.rule_name(),
            stepper.boundary(),
            device.threads()
        );

        Ok(Self {
            device,
            field,
            context,
            stepper,
            injector: Injector::new(),
            sampler: Sampler::new(),
            harness,
            rng: StdRng::seed_from_u64(config.seed),
            tick: 0,
            in_flight: Fence::signaled("start"),
            report,
            stop_on_completion: config.experiment.stop_on_completion,
        })
    }

    pub fn context(&self) -> Arc<EngineContext> {
        Arc::clone(&self.context)
    }

    pub fn field(&self) -> &Arc<FieldStore> {
        &self.field
    }

    /// Steps submitted so far. `wait_idle` lets them all finish.
    pub fn tick(&self) -> u64 {
        self.tick
    }

    pub fn harness(&self) -> Option<&Harness> {
        self.harness.as_ref()
    }

    pub fn report(&self) -> SweepReport {
        SweepReport { total_ticks: self.tick, ..self.report.clone() }
    }

    /// Blocks until every submitted pass has completed.
    pub fn wait_idle(&self) -> Result<()> {
        self.in_flight.wait()
    }

    /// Arm, step, inject, swap, observe.
    pub fn run_cycle(&mut self) -> Result<CycleReport> {
        // Surface a failed pass from an earlier cycle before building on it.
        self.in_flight.poll()?;
        let mut cycle = CycleReport::default();

        if let Some(harness) = self.harness.as_mut() {
            if let Some(arming) = harness.poll_arm(self.tick)? {
                self.context.params.set_passive_threshold(arming.control_value);
                self.context.injection.request(arming.request)?;
                cycle.armed = true;
            }
        }

        let seed = [self.rng.next_u32(), self.rng.next_u32()];
        let params = self.context.params.snapshot(seed, self.tick);
        let step = self.stepper.submit(&self.device, &self.field, params, &[&self.in_flight])?;

        let inject = self
            .injector
            .apply(&self.device, &self.field, &self.context.injection, &step)?;
        cycle.injected = inject.is_some();

        let field = Arc::clone(&self.field);
        let last_writer = inject.as_ref().unwrap_or(&step);
        let swap = self.device.submit("swap", &[&step, last_writer], move |_| {
            let current = field.swap();
            trace!("Swapped, current buffer is now {:?}.", current);
            Ok(())
        })?;
        self.in_flight = swap;
        self.tick += 1;

        if let Some(harness) = self.harness.as_mut() {
            let (device, field, sampler, after) = (&self.device, &self.field, &self.sampler, &self.in_flight);
            cycle.events = harness.observe(self.tick, |pos| sampler.sample(device, field, pos, after))?;
        }
        for event in &cycle.events {
            match event {
                HarnessEvent::Measured(m) => self.report.measurements.push(m.clone()),
                HarnessEvent::Completed => self.report.completed = true,
            }
        }

        cycle.tick = self.tick;
        Ok(cycle)
    }

    /// Runs cycles until the token is cancelled, `max_ticks` is reached,
    /// or the sweep completes (when configured to stop on completion).
    pub fn run(&mut self, token: &RunToken, max_ticks: Option<u64>) -> Result<SweepReport> {
        info!("Starting engine loop at tick {}...", self.tick);
        let start_time = Instant::now();
        let mut previous_print_time = start_time;
        let start_tick = self.tick;
        let planned_runs = self.harness.as_ref().map_or(0, |h| h.plan().total_runs());

        while token.is_running() {
            if max_ticks.is_some_and(|limit| self.tick >= limit) {
                info!("Reached tick limit {}.", self.tick);
                break;
            }
            let cycle_start = Instant::now();
            let cycle = self.run_cycle()?;
            trace!(
                "Cycle {} completed in {:.3} ms",
                cycle.tick,
                cycle_start.elapsed().as_secs_f64() * 1000.0
            );

            // Print status periodically
            if previous_print_time.elapsed().as_secs_f64() >= 5.0 {
                let elapsed = start_time.elapsed().as_secs_f64();
                info!(
                    "Tick {} | {:.1} steps/s | Measurements: {}/{}",
                    self.tick,
                    (self.tick - start_tick) as f64 / elapsed.max(1e-9),
                    self.report.measurements.len(),
                    planned_runs
                );
                previous_print_time = Instant::now();
            }

            if cycle.completed() && self.stop_on_completion {
                debug!("Sweep completed, leaving loop.");
                break;
            }
        }

        self.wait_idle()?;
        info!(
            "Engine loop stopped at tick {} after {:.3} seconds.",
            self.tick,
            start_time.elapsed().as_secs_f64()
        );
        Ok(self.report())
    }

    /// Moves the engine onto its own loop thread.
    pub fn spawn(mut self, token: RunToken, max_ticks: Option<u64>) -> Result<EngineHandle> {
        let context = self.context();
        let loop_token = token.clone();
        let join = thread::Builder::new()
            .name("rd-loop".to_string())
            .spawn(move || self.run(&loop_token, max_ticks))
            .map_err(|e| anyhow!("Failed to start engine loop thread: {}", e))?;
        Ok(EngineHandle { context, token, join })
    }
}

/// Handle to an engine running on its loop thread.
pub struct EngineHandle {
    context: Arc<EngineContext>,
    token: RunToken,
    join: JoinHandle<Result<SweepReport>>,
}

impl EngineHandle {
    pub fn context(&self) -> &Arc<EngineContext> {
        &self.context
    }

    /// Asks the loop to stop and waits for it.
    pub fn stop(self) -> Result<SweepReport> {
        self.token.cancel();
        self.join()
    }

    /// Waits for the loop to end on its own.
    pub fn join(self) -> Result<SweepReport> {
        self.join
            .join()
            .map_err(|_| anyhow!("engine loop thread panicked"))?
    }
}
