//! Automated latency sweep.
//!
//! The harness arms a disc at the start coordinate, counts completed steps
//! until the end coordinate's channel 0 crosses the detection threshold,
//! cools down, and walks the control parameter through the sweep points.

use crate::injection::InjectionRequest;
use anyhow::{bail, Result};
use log::{debug, info, warn};
use reaction_common::{ExperimentConfig, Measurement, UVec2, Vec4};
use std::time::Instant;

/// Maps logical (display) coordinates into grid coordinates.
#[derive(Debug, Clone, Copy)]
pub struct CoordinateSpace {
    pub width: u32,
    pub height: u32,
    /// Logical y grows in the opposite direction of grid rows.
    pub flip_y: bool,
}

impl CoordinateSpace {
    pub fn to_grid(&self, logical: UVec2) -> Result<UVec2> {
        if logical.x >= self.width || logical.y >= self.height {
            bail!(
                "coordinate ({}, {}) outside {}x{} field",
                logical.x,
                logical.y,
                self.width,
                self.height
            );
        }
        let y = if self.flip_y { self.height - 1 - logical.y } else { logical.y };
        Ok(UVec2::new(logical.x, y))
    }
}

/// Control-parameter values under test, centered on the initial value.
#[derive(Debug, Clone, Copy)]
pub struct SweepPlan {
    pub center: f32,
    pub interval: f32,
    pub points: u32,
    pub repetitions: u32,
}

impl SweepPlan {
    /// `center + (index - points / 2) * interval`, with integer `points / 2`.
    pub fn value(&self, index: u32) -> f32 {
        let offset = index as i64 - (self.points / 2) as i64;
        self.center + offset as f32 * self.interval
    }

    pub fn total_runs(&self) -> u32 {
        self.points * self.repetitions
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    Cooldown,
    Running,
}

/// Harness state, advanced only by the loop thread.
#[derive(Debug, Clone)]
pub struct ExperimentState {
    pub phase: Phase,
    /// Start and end in grid space.
    pub start: UVec2,
    pub end: UVec2,
    pub sweep_index: u32,
    pub repetition: u32,
    /// Completed steps since the current run was armed.
    pub ticks: u64,
    /// Engine tick at which the cooldown ends.
    pub cooldown_deadline: u64,
    pub control_value: f32,
    pub enabled: bool,
    pub run_index: u32,
    armed_at: Option<Instant>,
}

/// Decision taken at the top of a cycle to start a run.
#[derive(Debug, Clone, Copy)]
pub struct Arming {
    pub request: InjectionRequest,
    pub control_value: f32,
}

#[derive(Debug, Clone, PartialEq)]
pub enum HarnessEvent {
    Measured(Measurement),
    /// The last sweep point was measured; the harness is disabled.
    Completed,
}

pub struct Harness {
    state: ExperimentState,
    plan: SweepPlan,
    detection_threshold: f32,
    cooldown_ticks: u64,
    timeout_ticks: Option<u64>,
    radius: u32,
    test_color: Vec4,
}

impl Harness {
    /// `center_value` is the initial control-parameter value the sweep is centered on.
    pub fn new(config: &ExperimentConfig, center_value: f32, space: CoordinateSpace) -> Result<Self> {
        if config.sweep_points == 0 || config.repetitions == 0 {
            bail!("experiment needs at least one sweep point and one repetition");
        }
        let start = space.to_grid(UVec2::from(config.start))?;
        let end = space.to_grid(UVec2::from(config.end))?;
        let plan = SweepPlan {
            center: center_value,
            interval: config.sweep_interval,
            points: config.sweep_points,
            repetitions: config.repetitions,
        };
        info!(
            "Experiment: start {:?} -> end {:?} (grid space), {} points x {} repetitions around {:.6}.",
            start, end, plan.points, plan.repetitions, center_value
        );
        Ok(Self {
            state: ExperimentState {
                phase: Phase::Idle,
                start,
                end,
                sweep_index: 0,
                repetition: 0,
                ticks: 0,
                cooldown_deadline: 0,
                control_value: plan.value(0),
                enabled: true,
                run_index: 0,
                armed_at: None,
            },
            plan,
            detection_threshold: config.detection_threshold,
            cooldown_ticks: config.cooldown_ticks,
            timeout_ticks: config.timeout_ticks,
            radius: config.radius,
            test_color: Vec4::from(config.test_color),
        })
    }

    pub fn state(&self) -> &ExperimentState {
        &self.state
    }

    pub fn plan(&self) -> &SweepPlan {
        &self.plan
    }

    pub fn is_enabled(&self) -> bool {
        self.state.enabled
    }

    /// Disables the harness; an active run is abandoned without a measurement.
    pub fn disable(&mut self) {
        if self.state.phase == Phase::Running {
            warn!("Harness disabled while run {} was active.", self.state.run_index);
        }
        self.state.enabled = false;
        self.state.phase = Phase::Idle;
    }

    /// A run can never be active while the harness is disabled.
    pub fn check_invariant(&self) -> Result<()> {
        if !self.state.enabled && self.state.phase == Phase::Running {
            bail!(
                "harness invariant violated: run {} active while harness is disabled",
                self.state.run_index
            );
        }
        Ok(())
    }

    /// Leaves an expired cooldown and arms a new run when possible.
    /// `tick` is the number of steps completed so far.
    pub fn poll_arm(&mut self, tick: u64) -> Result<Option<Arming>> {
        self.check_invariant()?;
        if !self.state.enabled {
            return Ok(None);
        }
        if self.state.phase == Phase::Cooldown && tick >= self.state.cooldown_deadline {
            debug!("Cooldown over at tick {}.", tick);
            self.state.phase = Phase::Idle;
        }
        if self.state.phase != Phase::Idle {
            return Ok(None);
        }

        let control_value = self.plan.value(self.state.sweep_index);
        self.state.phase = Phase::Running;
        self.state.ticks = 0;
        self.state.control_value = control_value;
        self.state.armed_at = Some(Instant::now());
        debug!(
            "Run {} armed at tick {} (point {}, repetition {}, value {:.6}).",
            self.state.run_index, tick, self.state.sweep_index, self.state.repetition, control_value
        );
        Ok(Some(Arming {
            request: InjectionRequest::new(self.state.start, self.radius, self.test_color),
            control_value,
        }))
    }

    /// Called after every completed step. While running, counts the tick and
    /// samples the end coordinate; Idle and Cooldown are no-ops.
    pub fn observe<F>(&mut self, tick: u64, sample: F) -> Result<Vec<HarnessEvent>>
    where
        F: FnOnce(UVec2) -> Result<Vec4>,
    {
        self.check_invariant()?;
        if self.state.phase != Phase::Running {
            return Ok(Vec::new());
        }
        self.state.ticks += 1;
        let color = sample(self.state.end)?;
        if color.x > self.detection_threshold {
            return Ok(self.finish_run(tick, true));
        }
        if let Some(limit) = self.timeout_ticks {
            if self.state.ticks >= limit {
                warn!(
                    "Run {} timed out after {} ticks at value {:.6}.",
                    self.state.run_index, self.state.ticks, self.state.control_value
                );
                return Ok(self.finish_run(tick, false));
            }
        }
        Ok(Vec::new())
    }

    fn finish_run(&mut self, tick: u64, arrived: bool) -> Vec<HarnessEvent> {
        let elapsed_ms = self
            .state
            .armed_at
            .take()
            .map(|t| t.elapsed().as_secs_f64() * 1000.0)
            .unwrap_or(0.0);
        let measurement = Measurement {
            run_index: self.state.run_index,
            sweep_index: self.state.sweep_index,
            repetition: self.state.repetition,
            control_value: self.state.control_value,
            ticks: self.state.ticks,
            elapsed_ms,
            arrived,
        };
        info!(
            "Run {}: value {:.6} -> {} ticks ({:.3} sec){}",
            measurement.run_index,
            measurement.control_value,
            measurement.ticks,
            elapsed_ms / 1000.0,
            if arrived { "" } else { " [timeout]" }
        );
        let mut events = vec![HarnessEvent::Measured(measurement)];

        self.state.run_index += 1;
        self.state.repetition += 1;
        if self.state.repetition >= self.plan.repetitions {
            self.state.sweep_index += 1;
            self.state.repetition = 0;
        }
        if self.state.sweep_index >= self.plan.points {
            info!("Sweep complete after {} runs.", self.state.run_index);
            self.state.enabled = false;
            self.state.phase = Phase::Idle;
            events.push(HarnessEvent::Completed);
        } else {
            self.state.phase = Phase::Cooldown;
            self.state.cooldown_deadline = tick + self.cooldown_ticks;
        }
        events
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SPACE: CoordinateSpace = CoordinateSpace { width: 64, height: 64, flip_y: false };
    const HOT: Vec4 = Vec4::new(1.0, 0.0, 0.0, 1.0);
    const COLD: Vec4 = Vec4::new(0.0, 0.0, 0.0, 1.0);

    fn config(points: u32, repetitions: u32, cooldown: u64) -> ExperimentConfig {
        ExperimentConfig {
            enabled: true,
            start: [10, 10],
            end: [20, 10],
            flip_y: false,
            sweep_points: points,
            repetitions,
            cooldown_ticks: cooldown,
            sweep_interval: 0.01,
            ..ExperimentConfig::default()
        }
    }

    /// Runs one armed run that arrives after `arrival` ticks.
    fn run_once(harness: &mut Harness, tick: &mut u64, arrival: u64) -> Vec<HarnessEvent> {
        assert!(harness.poll_arm(*tick).unwrap().is_some());
        loop {
            *tick += 1;
            let hot = harness.state().ticks + 1 >= arrival;
            let events = harness.observe(*tick, |_| Ok(if hot { HOT } else { COLD })).unwrap();
            if !events.is_empty() {
                return events;
            }
        }
    }

    #[test]
    fn flip_maps_rows_from_the_bottom() {
        let space = CoordinateSpace { width: 256, height: 256, flip_y: true };
        assert_eq!(space.to_grid(UVec2::new(210, 157)).unwrap(), UVec2::new(210, 98));
        assert_eq!(space.to_grid(UVec2::new(0, 0)).unwrap(), UVec2::new(0, 255));
        assert!(space.to_grid(UVec2::new(256, 0)).is_err());
    }

    #[test]
    fn sweep_values_are_centered() {
        let plan = SweepPlan { center: 0.1, interval: 0.01, points: 5, repetitions: 1 };
        let values: Vec<f32> = (0..5).map(|i| plan.value(i)).collect();
        let expected = [0.08, 0.09, 0.1, 0.11, 0.12];
        for (v, e) in values.iter().zip(expected) {
            assert!((v - e).abs() < 1e-6, "{} != {}", v, e);
        }
        let single = SweepPlan { center: 0.106130, interval: 0.01, points: 1, repetitions: 7 };
        assert_eq!(single.value(0), 0.106130);
    }

    #[test]
    fn arming_requests_disc_at_start() {
        let mut harness = Harness::new(&config(1, 1, 0), 0.1, SPACE).unwrap();
        let arming = harness.poll_arm(0).unwrap().unwrap();
        assert_eq!(arming.request.center, UVec2::new(10, 10));
        assert_eq!(arming.request.radius, 5);
        assert_eq!(arming.request.color, HOT);
        assert_eq!(harness.state().phase, Phase::Running);
        // Already running: no second arming.
        assert!(harness.poll_arm(1).unwrap().is_none());
    }

    #[test]
    fn measured_ticks_count_completed_steps() {
        let mut harness = Harness::new(&config(1, 1, 0), 0.1, SPACE).unwrap();
        let mut tick = 0;
        let events = run_once(&mut harness, &mut tick, 4);
        match &events[0] {
            HarnessEvent::Measured(m) => {
                assert_eq!(m.ticks, 4);
                assert!(m.arrived);
            }
            other => panic!("unexpected event {:?}", other),
        }
        assert_eq!(events[1], HarnessEvent::Completed);
    }

    #[test]
    fn immediate_arrival_measures_one_tick() {
        let mut harness = Harness::new(&config(1, 1, 0), 0.1, SPACE).unwrap();
        harness.poll_arm(0).unwrap();
        let events = harness.observe(1, |_| Ok(HOT)).unwrap();
        assert!(matches!(&events[0], HarnessEvent::Measured(m) if m.ticks == 1));
    }

    #[test]
    fn cooldown_blocks_new_runs() {
        let mut harness = Harness::new(&config(2, 1, 10), 0.1, SPACE).unwrap();
        let mut tick = 0;
        run_once(&mut harness, &mut tick, 3);
        let ended = tick;
        assert_eq!(harness.state().phase, Phase::Cooldown);
        for t in ended..ended + 10 {
            assert!(harness.poll_arm(t).unwrap().is_none(), "armed inside cooldown at {}", t);
            assert!(harness.observe(t + 1, |_| Ok(HOT)).unwrap().is_empty());
        }
        assert!(harness.poll_arm(ended + 10).unwrap().is_some());
    }

    #[test]
    fn sweep_produces_points_times_repetitions_in_order() {
        let mut harness = Harness::new(&config(3, 2, 0), 0.1, SPACE).unwrap();
        let mut tick = 0;
        let mut measurements = Vec::new();
        let mut completed = false;
        while harness.is_enabled() {
            for event in run_once(&mut harness, &mut tick, 2) {
                match event {
                    HarnessEvent::Measured(m) => measurements.push(m),
                    HarnessEvent::Completed => completed = true,
                }
            }
        }
        assert!(completed);
        assert_eq!(measurements.len(), 6);
        let values: Vec<f32> = measurements.iter().map(|m| m.control_value).collect();
        let expected = [0.09, 0.09, 0.1, 0.1, 0.11, 0.11];
        for (v, e) in values.iter().zip(expected) {
            assert!((v - e).abs() < 1e-6);
        }
        assert!(harness.poll_arm(tick).unwrap().is_none());
    }

    #[test]
    fn timeout_records_a_failed_run() {
        let mut cfg = config(1, 2, 0);
        cfg.timeout_ticks = Some(5);
        let mut harness = Harness::new(&cfg, 0.1, SPACE).unwrap();
        harness.poll_arm(0).unwrap();
        let mut events = Vec::new();
        for t in 1..=5 {
            events.extend(harness.observe(t, |_| Ok(COLD)).unwrap());
        }
        match &events[0] {
            HarnessEvent::Measured(m) => {
                assert!(!m.arrived);
                assert_eq!(m.ticks, 5);
            }
            other => panic!("unexpected event {:?}", other),
        }
        assert_eq!(harness.state().repetition, 1);
    }

    #[test]
    fn observe_is_a_noop_when_idle() {
        let mut harness = Harness::new(&config(1, 1, 0), 0.1, SPACE).unwrap();
        let events = harness
            .observe(1, |_| panic!("must not sample while idle"))
            .unwrap();
        assert!(events.is_empty());
    }

    #[test]
    fn running_while_disabled_is_fatal() {
        let mut harness = Harness::new(&config(1, 1, 0), 0.1, SPACE).unwrap();
        harness.poll_arm(0).unwrap();
        harness.state.enabled = false;
        assert!(harness.check_invariant().is_err());
        assert!(harness.poll_arm(1).is_err());
        assert!(harness.observe(1, |_| Ok(HOT)).is_err());
    }

    #[test]
    fn disable_abandons_active_run() {
        let mut harness = Harness::new(&config(1, 1, 0), 0.1, SPACE).unwrap();
        harness.poll_arm(0).unwrap();
        harness.disable();
        harness.check_invariant().unwrap();
        assert!(harness.poll_arm(1).unwrap().is_none());
    }
}
