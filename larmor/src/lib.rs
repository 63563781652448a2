// SPDX-License-Identifier: AGPL-3.0-only

//! larmor — device-resident array runtime for MRI reconstruction
//! pipelines.
//!
//! Hosts N-dimensional array collections on a compute device behind
//! opaque handles, with explicit host↔device synchronization and a
//! kernel cache keyed by entry-point name. Reconstruction steps are
//! `Process` stages chained into composites.
//!
//! ## Modules
//!   - `error` — runtime error enum and `Result` alias
//!   - `array` — element types, host buffers, N-d arrays, strides
//!   - `data` — `ArrayCollection` and its dims/strides device blob
//!   - `app` — device context: adapter selection, kernel cache, handle
//!     registry, sync, dispatch, timestamp profiling
//!   - `process` — pipeline stages: copy, scale, composite chaining
//!   - `profile` — host/device timing samples and summaries
//!   - `shaders` — embedded WGSL kernel sources
//!
//! ## Concurrency
//!   The `App` is shared by `Arc` but holds interior `RefCell` state, so
//!   it is `Send`-only across a pipeline setup, not `Sync`: one thread
//!   drives registration, sync, and launches. Handle allocation alone is
//!   process-wide atomic, so handles stay unique across apps.
//!
//! ## Synchronization contract
//!   Nothing moves between host and device implicitly. `host_to_device`
//!   and `device_to_host` are the only transfer points; launches mark
//!   handles dirty and debug builds assert when a transfer would clobber
//!   unread device results.

pub mod app;
pub mod array;
pub mod data;
pub mod error;
pub mod process;
pub mod profile;
pub mod shaders;

pub use app::adapter::{DeviceKind, DeviceProfile, DeviceTraits, PlatformTraits};
pub use app::registry::ArrayHandle;
pub use app::{App, AppState};
pub use array::{ElemType, HostBuffer, NdArray};
pub use data::ArrayCollection;
pub use error::{Error, Result};
pub use process::{
    create, shared, CompositeProcess, CopyProcess, Process, ProcessBuild, ProcessCommon,
    ProcessState, ProfileParams, ScaleProcess, SharedCollection,
};
pub use profile::{KernelSample, SampleLog};
