//! CPU compute substrate standing in for an accelerator queue.
//!
//! Passes are submitted to a single queue thread over a bounded channel and
//! executed in order; each pass gets the rayon pool for its data-parallel
//! work. Every submission returns a [`Fence`] and may list fences it must
//! wait on, so ordering between passes is always an explicit handle.

use anyhow::{anyhow, Result};
use log::{debug, error, trace};
use rayon::{ThreadPool, ThreadPoolBuilder};
use reaction_common::ComputeConfig;
use std::sync::mpsc::{self, SyncSender};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, JoinHandle};

#[derive(Debug, Clone, PartialEq)]
enum FenceState {
    Pending,
    Signaled,
    Failed(String),
}

#[derive(Debug)]
struct FenceInner {
    label: &'static str,
    state: Mutex<FenceState>,
    ready: Condvar,
}

/// Completion handle of one submitted pass.
#[derive(Debug, Clone)]
pub struct Fence {
    inner: Arc<FenceInner>,
}

impl Fence {
    fn pending(label: &'static str) -> Self {
        Self {
            inner: Arc::new(FenceInner {
                label,
                state: Mutex::new(FenceState::Pending),
                ready: Condvar::new(),
            }),
        }
    }

    /// A fence that is already signaled, used as the "nothing in flight" dependency.
    pub fn signaled(label: &'static str) -> Self {
        let fence = Self::pending(label);
        fence.complete(FenceState::Signaled);
        fence
    }

    pub fn label(&self) -> &'static str {
        self.inner.label
    }

    /// Blocks until the pass has completed. Fails if the pass failed or was dropped.
    pub fn wait(&self) -> Result<()> {
        let mut state = self
            .inner
            .state
            .lock()
            .map_err(|_| anyhow!("fence '{}' lock poisoned", self.inner.label))?;
        while *state == FenceState::Pending {
            state = self
                .inner
                .ready
                .wait(state)
                .map_err(|_| anyhow!("fence '{}' lock poisoned", self.inner.label))?;
        }
        match &*state {
            FenceState::Failed(reason) => Err(anyhow!("pass '{}' failed: {}", self.inner.label, reason)),
            _ => Ok(()),
        }
    }

    /// Non-blocking check. `Ok(true)` once signaled, `Ok(false)` while pending.
    pub fn poll(&self) -> Result<bool> {
        let state = self
            .inner
            .state
            .lock()
            .map_err(|_| anyhow!("fence '{}' lock poisoned", self.inner.label))?;
        match &*state {
            FenceState::Pending => Ok(false),
            FenceState::Signaled => Ok(true),
            FenceState::Failed(reason) => Err(anyhow!("pass '{}' failed: {}", self.inner.label, reason)),
        }
    }

    fn complete(&self, outcome: FenceState) {
        // A poisoned fence mutex only happens if a waiter panicked; the state is still usable.
        let mut state = match self.inner.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if *state == FenceState::Pending {
            *state = outcome;
        }
        self.inner.ready.notify_all();
    }
}

/// Signals its fence exactly once. Dropping it unsignaled fails the fence,
/// so a submission lost on the way never leaves waiters hanging.
struct FenceSignal(Fence);

impl FenceSignal {
    fn signal(self, result: Result<()>) {
        match result {
            Ok(()) => self.0.complete(FenceState::Signaled),
            Err(e) => {
                error!("Pass '{}' failed: {:#}", self.0.label(), e);
                self.0.complete(FenceState::Failed(format!("{:#}", e)));
            }
        }
    }
}

impl Drop for FenceSignal {
    fn drop(&mut self) {
        self.0.complete(FenceState::Failed("submission dropped before execution".to_string()));
    }
}

type PassFn = Box<dyn FnOnce(&ThreadPool) -> Result<()> + Send + 'static>;

struct Submission {
    pass: PassFn,
    waits: Vec<Fence>,
    signal: FenceSignal,
}

/// Owns the worker pool and the queue thread.
pub struct ComputeDevice {
    sender: Option<SyncSender<Submission>>,
    worker: Option<JoinHandle<()>>,
    threads: usize,
}

impl ComputeDevice {
    /// Builds the rayon pool and starts the queue thread. Any failure here is fatal to the engine.
    pub fn new(config: &ComputeConfig) -> Result<Self> {
        let mut builder = ThreadPoolBuilder::new().thread_name(|i| format!("rd-compute-{}", i));
        if let Some(threads) = config.threads {
            builder = builder.num_threads(threads);
        }
        let pool = builder
            .build()
            .map_err(|e| anyhow!("Failed to build compute thread pool: {}", e))?;
        let threads = pool.current_num_threads();

        let (sender, receiver) = mpsc::sync_channel::<Submission>(config.queue_depth);
        let worker = thread::Builder::new()
            .name("rd-queue".to_string())
            .spawn(move || {
                while let Ok(submission) = receiver.recv() {
                    let Submission { pass, waits, signal } = submission;
                    let label = signal.0.label();
                    let dependencies: Result<()> = waits.iter().try_for_each(|fence| fence.wait());
                    let result = match dependencies {
                        Ok(()) => pass(&pool),
                        Err(e) => Err(e.context(format!("dependency of '{}' did not complete", label))),
                    };
                    trace!("Pass '{}' finished (ok: {}).", label, result.is_ok());
                    signal.signal(result);
                }
                debug!("Compute queue drained, worker exiting.");
            })
            .map_err(|e| anyhow!("Failed to start compute queue thread: {}", e))?;

        debug!(
            "Compute device ready: {} worker threads, queue depth {}.",
            threads, config.queue_depth
        );
        Ok(Self { sender: Some(sender), worker: Some(worker), threads })
    }

    pub fn threads(&self) -> usize {
        self.threads
    }

    /// Enqueues `pass` to run after every fence in `waits` has completed.
    /// Blocks while the queue is full.
    pub fn submit<F>(&self, label: &'static str, waits: &[&Fence], pass: F) -> Result<Fence>
    where
        F: FnOnce(&ThreadPool) -> Result<()> + Send + 'static,
    {
        let sender = self
            .sender
            .as_ref()
            .ok_or_else(|| anyhow!("compute device already shut down"))?;
        let fence = Fence::pending(label);
        let submission = Submission {
            pass: Box::new(pass),
            waits: waits.iter().map(|f| (*f).clone()).collect(),
            signal: FenceSignal(fence.clone()),
        };
        sender
            .send(submission)
            .map_err(|_| anyhow!("compute queue is gone, cannot submit '{}'", label))?;
        Ok(fence)
    }
}

impl Drop for ComputeDevice {
    fn drop(&mut self) {
        // Closing the channel lets the queue thread finish what is already queued.
        self.sender.take();
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                error!("Compute queue thread panicked during shutdown.");
            }
        }
    }
}
