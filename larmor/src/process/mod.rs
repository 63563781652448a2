// SPDX-License-Identifier: AGPL-3.0-only

//! Pipeline stages — the `Process` abstraction.
//!
//! A process consumes an app plus input/output collections and runs a
//! two-phase lifecycle:
//!
//! ```text
//! Constructed ──init()──▶ Initialized ──launch()──▶ Launched
//!                  ▲                                    │
//!                  └──────────── init() ────────────────┘
//! ```
//!
//! `Launched → Initialized` re-arms a stage with new parameters;
//! `Constructed → Launched` is forbidden (missing input/output is an
//! invalid-argument error). Stages are built through [`create`], never a
//! public constructor: the factory registers the stage's kernel sources
//! with the owning app before any `init()` can run, and the kernel cache
//! collapses repeated registrations to one.
//!
//! Profiling brackets a launch with host wall time and, when the device
//! supports timestamp queries, device time; samples land in an external
//! [`SampleLog`]. Off by default — reading timestamps synchronizes.

mod composite;
mod copy;
mod scale;

pub use composite::CompositeProcess;
pub use copy::CopyProcess;
pub use scale::ScaleProcess;

use std::cell::RefCell;
use std::sync::Arc;
use std::time::Instant;

use crate::app::{App, TimestampScope};
use crate::data::ArrayCollection;
use crate::error::{Error, Result};
use crate::profile::{KernelSample, SampleLog};

/// Collections shared between the caller and one or more stages.
/// Single-threaded interior mutability; see the crate concurrency notes.
pub type SharedCollection = Arc<RefCell<ArrayCollection>>;

/// Wrap a collection for sharing with stages.
#[must_use]
pub fn shared(collection: ArrayCollection) -> SharedCollection {
    Arc::new(RefCell::new(collection))
}

/// Lifecycle state of a stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessState {
    /// Built by the factory; input/output may still be missing.
    Constructed,
    /// `init` validated shapes and prepared launch resources.
    Initialized,
    /// At least one launch has been enqueued since the last `init`.
    Launched,
}

/// Profiling options for a stage.
#[derive(Default)]
pub struct ProfileParams {
    /// Bracket launches with host (and device, when supported) timing.
    pub enabled: bool,
    /// External sample collection profiled launches append to.
    pub log: Option<Arc<RefCell<SampleLog>>>,
}

impl ProfileParams {
    /// Profiling into the given log.
    #[must_use]
    pub fn into_log(log: &Arc<RefCell<SampleLog>>) -> Self {
        Self {
            enabled: true,
            log: Some(Arc::clone(log)),
        }
    }
}

/// State every stage shares: the owning app, the IO bindings, the
/// lifecycle state, and profiling options.
pub struct ProcessCommon {
    app: Arc<App>,
    input: Option<SharedCollection>,
    output: Option<SharedCollection>,
    state: ProcessState,
    profile: ProfileParams,
}

impl ProcessCommon {
    fn new(app: Arc<App>, profile: ProfileParams) -> Self {
        Self {
            app,
            input: None,
            output: None,
            state: ProcessState::Constructed,
            profile,
        }
    }

    /// The owning app.
    #[must_use]
    pub fn app(&self) -> &Arc<App> {
        &self.app
    }

    /// Current lifecycle state.
    #[must_use]
    pub const fn state(&self) -> ProcessState {
        self.state
    }

    /// Bound input collection, or `InvalidArgument` when missing.
    pub fn input(&self) -> Result<&SharedCollection> {
        self.input
            .as_ref()
            .ok_or_else(|| Error::InvalidArgument("process has no input collection".into()))
    }

    /// Bound output collection, or `InvalidArgument` when missing.
    pub fn output(&self) -> Result<&SharedCollection> {
        self.output
            .as_ref()
            .ok_or_else(|| Error::InvalidArgument("process has no output collection".into()))
    }

    /// Record a successful `init`; legal from every state (a launched
    /// stage may re-init with new parameters).
    pub fn mark_initialized(&mut self) {
        self.state = ProcessState::Initialized;
    }

    /// Gate a launch: forbidden before the first successful `init`.
    ///
    /// # Errors
    ///
    /// `InvalidArgument` when the stage was never initialized.
    pub fn begin_launch(&mut self) -> Result<()> {
        if self.state == ProcessState::Constructed {
            return Err(Error::InvalidArgument(
                "launch before init: stage is still Constructed".into(),
            ));
        }
        self.state = ProcessState::Launched;
        Ok(())
    }

    /// Start a profiling bracket: host clock plus a device timestamp
    /// scope when enabled and supported.
    #[must_use]
    pub fn begin_profile(&self) -> (Instant, Option<TimestampScope>) {
        let scope = if self.profile.enabled {
            self.app.create_timestamps()
        } else {
            None
        };
        (Instant::now(), scope)
    }

    /// Close a profiling bracket after the submit, appending the sample
    /// to the external log. Reading the device timestamps blocks until
    /// the queue drains — the cost that keeps profiling opt-in.
    ///
    /// # Errors
    ///
    /// [`Error::Launch`] when the timestamp readback fails.
    pub fn end_profile(
        &self,
        label: &str,
        started: Instant,
        scope: Option<&TimestampScope>,
    ) -> Result<()> {
        if !self.profile.enabled {
            return Ok(());
        }
        let host_ms = started.elapsed().as_secs_f64() * 1.0e3;
        let device_ms = match scope {
            Some(s) => Some(self.app.read_timestamps_ms(s)?),
            None => None,
        };
        if let Some(log) = &self.profile.log {
            log.borrow_mut().push(KernelSample {
                label: label.to_string(),
                host_ms,
                device_ms,
            });
        }
        Ok(())
    }
}

/// The contract every concrete processing stage implements.
pub trait Process {
    /// Shared stage state.
    fn common(&self) -> &ProcessCommon;
    /// Shared stage state, mutable.
    fn common_mut(&mut self) -> &mut ProcessCommon;

    /// Validate IO bindings and prepare launch resources.
    ///
    /// # Errors
    ///
    /// `InvalidArgument` on missing or mismatched input/output.
    fn init(&mut self) -> Result<()>;

    /// Enqueue the stage's kernels. Asynchronous: callers synchronize
    /// with `App::finish` / `App::device_to_host` before reading
    /// results.
    ///
    /// # Errors
    ///
    /// `InvalidArgument` before `init`; [`Error::Launch`] on enqueue
    /// failure (fatal to the pipeline run — no rollback).
    fn launch(&mut self) -> Result<()>;

    /// True when the stage writes its input in place and needs no output
    /// collection.
    fn is_in_place(&self) -> bool {
        false
    }

    /// Current lifecycle state.
    fn state(&self) -> ProcessState {
        self.common().state()
    }

    /// Bind the input collection.
    fn set_input(&mut self, input: SharedCollection) {
        self.common_mut().input = Some(input);
    }

    /// Bind the output collection.
    fn set_output(&mut self, output: SharedCollection) {
        self.common_mut().output = Some(output);
    }
}

/// A stage type constructible by the [`create`] factory.
pub trait ProcessBuild: Process + Sized {
    /// `(registration name, WGSL source)` pairs this stage needs.
    const KERNEL_SOURCES: &'static [(&'static str, &'static str)];

    /// Assemble the stage around its common state.
    fn build(common: ProcessCommon) -> Self;
}

/// Factory for concrete stages: registers the stage's kernel sources
/// with the owning app (idempotent across instances — the cache keys by
/// name), then builds the instance in `Constructed` state.
#[must_use]
pub fn create<P: ProcessBuild>(app: &Arc<App>, profile: ProfileParams) -> P {
    for (name, source) in P::KERNEL_SOURCES {
        app.add_kernel_source(name, source);
    }
    P::build(ProcessCommon::new(Arc::clone(app), profile))
}
