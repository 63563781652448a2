// SPDX-License-Identifier: AGPL-3.0-only

//! The app — one wgpu compute context binding device selection, the
//! kernel cache, and the handle registry.
//!
//! ## Lifecycle
//!
//! ```text
//! App::create(platform, traits)   → Initialized (context + device bound)
//! app.load_kernels()              → KernelsLoaded
//! ```
//!
//! States are only reachable forward; the only reset is dropping the app.
//! The app is created through the factory (no public constructor) and
//! shared-owned (`Arc`) by every collection and pipeline stage that
//! references it. It exclusively owns the device, queue, kernel cache,
//! and per-handle device buffer state; collections own only host arrays
//! and a handle.
//!
//! ## Synchronization contract
//!
//! Nothing moves between host and device implicitly. Callers invoke
//! [`App::host_to_device`] before launching kernels that read a handle
//! and [`App::device_to_host`] before reading results. Kernel enqueues
//! are asynchronous; ordering on the single queue is FIFO, and
//! [`App::finish`] is the explicit blocking barrier.
//!
//! The app spawns no threads and its interior state is `RefCell`-guarded:
//! `Arc<App>` is `!Sync` by construction, which is the registry's
//! single-writer contract expressed in types.

pub mod adapter;
pub mod kernels;
pub mod registry;

use std::cell::{Cell, RefCell};
use std::path::Path;
use std::sync::Arc;

use crate::data::ArrayCollection;
use crate::error::{Error, Result};
use adapter::{DeviceProfile, DeviceTraits, PlatformTraits};
use kernels::KernelCache;
use registry::{ArrayHandle, DeviceBufferState, HandleRegistry};

/// Forward-only app state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppState {
    /// Context and device bound; kernels not yet compiled.
    Initialized,
    /// All registered kernel sources compiled at least once.
    KernelsLoaded,
}

/// Split a workgroup count into (x, y, 1) for 2D dispatch when x exceeds
/// the per-dimension limit. Shaders linearize via
/// `gid.x + gid.y * num_workgroups.x * WG_SIZE`.
#[must_use]
pub fn split_workgroups(total: u32) -> (u32, u32, u32) {
    if total <= 65535 {
        (total, 1, 1)
    } else {
        let y = total.div_ceil(65535);
        let x = total.div_ceil(y);
        (x, y, 1)
    }
}

/// Device timestamp bracketing for one profiled launch.
///
/// Holds a two-entry query set plus resolve/staging buffers; created only
/// when the device advertises `TIMESTAMP_QUERY`.
pub struct TimestampScope {
    query_set: wgpu::QuerySet,
    resolve: wgpu::Buffer,
    staging: wgpu::Buffer,
}

/// Process-wide compute context.
pub struct App {
    profile: DeviceProfile,
    device: wgpu::Device,
    queue: wgpu::Queue,
    state: Cell<AppState>,
    kernels: RefCell<KernelCache>,
    registry: RefCell<HandleRegistry>,
}

// ── Factory ──────────────────────────────────────────────────────────

impl App {
    /// Create the compute context for the best adapter matching the
    /// requested traits.
    ///
    /// # Errors
    ///
    /// [`Error::Configuration`] when no adapter matches the type/name/
    /// vendor/feature filters, or device creation fails.
    pub async fn create(platform: &PlatformTraits, traits: &DeviceTraits) -> Result<Arc<Self>> {
        let (selected, profile) = adapter::select_adapter(platform, traits)?;
        let adapter_features = selected.features();

        let mut required_features = wgpu::Features::empty();
        if adapter_features.contains(wgpu::Features::SHADER_F64) {
            required_features |= wgpu::Features::SHADER_F64;
        }
        if adapter_features.contains(wgpu::Features::TIMESTAMP_QUERY) {
            required_features |= wgpu::Features::TIMESTAMP_QUERY;
        }

        let required_limits = wgpu::Limits {
            max_storage_buffer_binding_size: 512 * 1024 * 1024,
            max_buffer_size: 1024 * 1024 * 1024,
            max_storage_buffers_per_shader_stage: 12,
            ..wgpu::Limits::default()
        };

        let (device, queue) = selected
            .request_device(
                &wgpu::DeviceDescriptor {
                    label: Some("larmor recon device"),
                    required_features,
                    required_limits,
                    memory_hints: wgpu::MemoryHints::default(),
                },
                None,
            )
            .await
            .map_err(|e| Error::Configuration(format!("device creation: {e}")))?;

        Ok(Arc::new(Self {
            profile,
            device,
            queue,
            state: Cell::new(AppState::Initialized),
            kernels: RefCell::new(KernelCache::default()),
            registry: RefCell::new(HandleRegistry::default()),
        }))
    }

    /// Blocking wrapper around [`App::create`] for synchronous callers.
    ///
    /// # Errors
    ///
    /// [`Error::Configuration`] as for `create`, or when no runtime can
    /// be built.
    pub fn create_blocking(platform: &PlatformTraits, traits: &DeviceTraits) -> Result<Arc<Self>> {
        let rt = tokio::runtime::Builder::new_current_thread()
            .build()
            .map_err(|e| Error::Configuration(format!("tokio runtime: {e}")))?;
        rt.block_on(Self::create(platform, traits))
    }
}

// ── Accessors ────────────────────────────────────────────────────────

impl App {
    /// The underlying wgpu device.
    #[must_use]
    pub const fn device(&self) -> &wgpu::Device {
        &self.device
    }

    /// The command queue (single queue; launches are FIFO on it).
    #[must_use]
    pub const fn queue(&self) -> &wgpu::Queue {
        &self.queue
    }

    /// Captured properties of the selected adapter.
    #[must_use]
    pub const fn profile(&self) -> &DeviceProfile {
        &self.profile
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> AppState {
        self.state.get()
    }

    /// Whether the device supports f64 shaders.
    #[must_use]
    pub const fn has_f64(&self) -> bool {
        self.profile.has_f64
    }

    /// Whether the device supports timestamp queries (device-time
    /// profiling).
    #[must_use]
    pub const fn has_timestamps(&self) -> bool {
        self.profile.has_timestamps
    }

    /// Print device capabilities (device-info dump surface).
    pub fn print_info(&self) {
        println!("  Device: {}", self.profile.name);
        println!("  Driver: {}", self.profile.driver);
        println!(
            "  SHADER_F64: {}",
            if self.profile.has_f64 { "YES" } else { "NO" }
        );
        println!(
            "  TIMESTAMP_QUERY: {}",
            if self.profile.has_timestamps { "YES" } else { "NO" }
        );
        let kernels = self.kernels.borrow();
        println!(
            "  Kernels: {} loaded ({} sources registered)",
            kernels.kernel_names().len(),
            kernels.source_count()
        );
        println!("  Collections: {}", self.registry.borrow().len());
    }
}

// ── Kernel management ────────────────────────────────────────────────

impl App {
    /// Register a WGSL kernel file; keyed by canonical path, re-adding
    /// the same file is a no-op (returns false).
    ///
    /// # Errors
    ///
    /// `InvalidArgument` when the path cannot be resolved.
    pub fn add_kernel_file(&self, path: &Path) -> Result<bool> {
        self.kernels.borrow_mut().add_file(path)
    }

    /// Register every `.wgsl` file in a directory. Returns new
    /// registrations.
    ///
    /// # Errors
    ///
    /// `InvalidArgument` when the directory cannot be read.
    pub fn add_kernel_dir(&self, dir: &Path) -> Result<usize> {
        self.kernels.borrow_mut().add_dir(dir)
    }

    /// Register an embedded kernel source under a unique name; re-adding
    /// the same name is a no-op (returns false).
    pub fn add_kernel_source(&self, name: &str, source: &str) -> bool {
        self.kernels.borrow_mut().add_source(name, source)
    }

    /// Compile every registered, not-yet-loaded kernel source exactly
    /// once and advance the state to `KernelsLoaded`. Calling again after
    /// success compiles nothing new.
    ///
    /// # Errors
    ///
    /// [`Error::Build`] with the compiler diagnostic attached.
    pub fn load_kernels(&self) -> Result<usize> {
        let compiled = self.kernels.borrow_mut().load(&self.device)?;
        self.state.set(AppState::KernelsLoaded);
        Ok(compiled)
    }

    /// Total shader compilations performed by this app.
    #[must_use]
    pub fn kernel_compile_count(&self) -> usize {
        self.kernels.borrow().compile_count()
    }

    /// Run `f` with the compiled kernel resolved by entry-point name.
    ///
    /// # Errors
    ///
    /// `InvalidArgument` for an unknown kernel name.
    pub fn with_kernel<R>(
        &self,
        name: &str,
        f: impl FnOnce(&kernels::CompiledKernel) -> R,
    ) -> Result<R> {
        let kernels = self.kernels.borrow();
        Ok(f(kernels.kernel(name)?))
    }
}

// ── Handle / device buffer lifecycle ─────────────────────────────────

impl App {
    /// Register a collection: allocate a handle, create its device-side
    /// mirror (one storage buffer per array plus the dims/strides blob),
    /// and optionally perform the initial host→device copy.
    ///
    /// # Errors
    ///
    /// `InvalidArgument` when the collection is already registered.
    pub fn add_data(&self, collection: &mut ArrayCollection, copy_host: bool) -> Result<ArrayHandle> {
        if collection.handle().is_valid() {
            return Err(Error::InvalidArgument(format!(
                "collection already registered as handle {}",
                collection.handle()
            )));
        }

        let mut buffers = Vec::with_capacity(collection.num_arrays());
        let mut sizes = Vec::with_capacity(collection.num_arrays());
        for (i, array) in collection.arrays().iter().enumerate() {
            let size = array.size_bytes() as u64;
            let buffer = self.device.create_buffer(&wgpu::BufferDescriptor {
                label: Some(&format!("larmor array {i} ({})", array.elem_type().label())),
                size,
                usage: wgpu::BufferUsages::STORAGE
                    | wgpu::BufferUsages::COPY_SRC
                    | wgpu::BufferUsages::COPY_DST,
                mapped_at_creation: false,
            });
            if copy_host {
                self.queue.write_buffer(&buffer, 0, array.buffer().as_bytes());
            }
            buffers.push(buffer);
            sizes.push(size);
        }

        let dims_blob = collection.dims_and_strides_blob();
        let dims_buffer = {
            use wgpu::util::DeviceExt;
            self.device
                .create_buffer_init(&wgpu::util::BufferInitDescriptor {
                    label: Some("larmor dims/strides"),
                    contents: bytemuck::cast_slice(&dims_blob),
                    usage: wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_DST,
                })
        };

        let state = DeviceBufferState {
            buffers,
            sizes,
            dims_blob,
            dims_buffer,
            device_writes_pending: Cell::new(false),
        };
        let handle = self.registry.borrow_mut().insert(state);
        collection.bind_handle(handle);
        Ok(handle)
    }

    /// Release a collection's handle and drop its device buffers. The
    /// collection's host storage survives; its handle resets to INVALID.
    ///
    /// # Errors
    ///
    /// `InvalidHandle` when the collection is not registered.
    pub fn del_data(&self, collection: &mut ArrayCollection) -> Result<()> {
        let handle = collection.handle();
        self.registry.borrow_mut().remove(handle)?;
        collection.bind_handle(ArrayHandle::INVALID);
        Ok(())
    }

    /// Number of live registrations.
    #[must_use]
    pub fn data_count(&self) -> usize {
        self.registry.borrow().len()
    }

    /// Run `f` with the device buffer state for a handle, validating the
    /// handle first.
    ///
    /// # Errors
    ///
    /// `InvalidHandle` for an unknown or released handle.
    pub fn with_buffer_state<R>(
        &self,
        handle: ArrayHandle,
        f: impl FnOnce(&DeviceBufferState) -> R,
    ) -> Result<R> {
        let registry = self.registry.borrow();
        Ok(f(registry.get(handle)?))
    }

    /// Copy of the cached dims/strides blob for a handle.
    ///
    /// # Errors
    ///
    /// `InvalidHandle` for an unknown handle.
    pub fn dims_blob(&self, handle: ArrayHandle) -> Result<Vec<u32>> {
        self.with_buffer_state(handle, |s| s.dims_blob().to_vec())
    }

    /// Number of device buffers behind a handle.
    ///
    /// # Errors
    ///
    /// `InvalidHandle` for an unknown handle.
    pub fn buffer_count(&self, handle: ArrayHandle) -> Result<usize> {
        self.with_buffer_state(handle, DeviceBufferState::buffer_count)
    }

    /// Mark a handle as written on the device (set by launches; cleared
    /// by [`App::device_to_host`]). Debug-mode staleness tracking only —
    /// nothing is ever synchronized automatically.
    ///
    /// # Errors
    ///
    /// `InvalidHandle` for an unknown handle.
    pub fn mark_device_written(&self, handle: ArrayHandle) -> Result<()> {
        self.with_buffer_state(handle, |s| s.device_writes_pending.set(true))
    }

    /// Whether a device write is pending readback for this handle.
    ///
    /// # Errors
    ///
    /// `InvalidHandle` for an unknown handle.
    pub fn device_writes_pending(&self, handle: ArrayHandle) -> Result<bool> {
        self.with_buffer_state(handle, |s| s.device_writes_pending.get())
    }
}

// ── Host ↔ device synchronization ────────────────────────────────────

impl App {
    /// Explicit host→device copy of every array in the collection.
    /// One-directional; nothing is triggered implicitly.
    ///
    /// # Errors
    ///
    /// `InvalidHandle` when the collection is not registered;
    /// `InvalidArgument` when host sizes no longer match the registered
    /// buffers.
    pub fn host_to_device(&self, collection: &ArrayCollection) -> Result<()> {
        let registry = self.registry.borrow();
        let state = registry.get(collection.handle())?;
        debug_assert!(
            !state.device_writes_pending.get(),
            "host_to_device would overwrite device results never read back (handle {})",
            collection.handle()
        );
        for (i, array) in collection.arrays().iter().enumerate() {
            let size = array.size_bytes() as u64;
            if state.sizes[i] != size {
                return Err(Error::InvalidArgument(format!(
                    "array {i} is {size} bytes but was registered as {}",
                    state.sizes[i]
                )));
            }
            self.queue
                .write_buffer(&state.buffers[i], 0, array.buffer().as_bytes());
        }
        Ok(())
    }

    /// Explicit device→host copy of every array in the collection,
    /// through a staging buffer. With `wait` the device is polled
    /// blocking; without it the map is driven by non-blocking polls until
    /// complete. Either way, host buffers hold the device contents when
    /// this returns — the difference is only how the poll loop yields.
    ///
    /// # Errors
    ///
    /// `InvalidHandle` when unregistered; [`Error::Launch`] when the map
    /// callback fails or the channel is dropped.
    pub fn device_to_host(&self, collection: &mut ArrayCollection, wait: bool) -> Result<()> {
        let handle = collection.handle();
        let staging: Vec<wgpu::Buffer> = {
            let registry = self.registry.borrow();
            let state = registry.get(handle)?;

            let mut encoder = self
                .device
                .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                    label: Some("larmor readback"),
                });
            let staging: Vec<wgpu::Buffer> = state
                .sizes
                .iter()
                .enumerate()
                .map(|(i, &size)| {
                    let buf = self.device.create_buffer(&wgpu::BufferDescriptor {
                        label: Some("larmor staging"),
                        size,
                        usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
                        mapped_at_creation: false,
                    });
                    encoder.copy_buffer_to_buffer(&state.buffers[i], 0, &buf, 0, size);
                    buf
                })
                .collect();
            self.queue.submit(std::iter::once(encoder.finish()));
            state.device_writes_pending.set(false);
            staging
        };

        for (i, buf) in staging.iter().enumerate() {
            let bytes = self.read_staging(buf, wait)?;
            let host = collection.arrays_mut()[i].buffer_mut().as_bytes_mut();
            if bytes.len() != host.len() {
                return Err(Error::Launch(format!(
                    "readback of array {i} returned {} bytes, expected {}",
                    bytes.len(),
                    host.len()
                )));
            }
            host.copy_from_slice(&bytes);
        }
        Ok(())
    }

    /// Map a staging buffer and return its bytes.
    fn read_staging(&self, staging: &wgpu::Buffer, wait: bool) -> Result<Vec<u8>> {
        let slice = staging.slice(..);
        let (sender, receiver) = std::sync::mpsc::channel();
        slice.map_async(wgpu::MapMode::Read, move |result| {
            let _ = sender.send(result);
        });

        let map_result = if wait {
            self.device.poll(wgpu::Maintain::Wait);
            receiver
                .recv()
                .map_err(|_| Error::Launch("map callback: channel recv failed".into()))?
        } else {
            loop {
                self.device.poll(wgpu::Maintain::Poll);
                match receiver.try_recv() {
                    Ok(result) => break result,
                    Err(std::sync::mpsc::TryRecvError::Empty) => std::thread::yield_now(),
                    Err(std::sync::mpsc::TryRecvError::Disconnected) => {
                        return Err(Error::Launch("map callback: channel dropped".into()))
                    }
                }
            }
        };
        map_result.map_err(|e| Error::Launch(format!("buffer mapping: {e}")))?;

        let data = slice.get_mapped_range();
        let bytes = data.to_vec();
        drop(data);
        staging.unmap();
        Ok(bytes)
    }

    /// Register a deep copy of a collection. Host storage is duplicated;
    /// when the source is registered, its device buffers are mirrored
    /// with device-to-device copies (no host round-trip).
    ///
    /// # Errors
    ///
    /// `InvalidHandle` when the source handle vanished mid-copy.
    pub fn clone_data(&self, collection: &ArrayCollection) -> Result<ArrayCollection> {
        let mut copy = collection.clone_deep();
        if !collection.handle().is_valid() {
            return Ok(copy);
        }
        self.add_data(&mut copy, false)?;
        let registry = self.registry.borrow();
        let src = registry.get(collection.handle())?;
        let dst = registry.get(copy.handle())?;
        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("larmor clone"),
            });
        for i in 0..src.buffers.len() {
            encoder.copy_buffer_to_buffer(&src.buffers[i], 0, &dst.buffers[i], 0, src.sizes[i]);
        }
        self.queue.submit(std::iter::once(encoder.finish()));
        Ok(copy)
    }
}

// ── Dispatch ─────────────────────────────────────────────────────────

impl App {
    /// Begin a command encoder for streaming multiple kernel encodes
    /// into one submission.
    #[must_use]
    pub fn begin_encoder(&self, label: &str) -> wgpu::CommandEncoder {
        self.device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor { label: Some(label) })
    }

    /// Submit a finished encoder (single asynchronous enqueue; FIFO with
    /// respect to earlier submissions on the queue).
    pub fn submit_encoder(&self, encoder: wgpu::CommandEncoder) {
        self.queue.submit(std::iter::once(encoder.finish()));
    }

    /// Encode one kernel launch: bind the ordered buffers at bindings
    /// 0..n, compute the workgroup count from the kernel's declared
    /// workgroup size, and dispatch over `elements` items.
    ///
    /// # Errors
    ///
    /// `InvalidArgument` for an unknown kernel name or zero workgroup
    /// size.
    pub fn encode_kernel(
        &self,
        encoder: &mut wgpu::CommandEncoder,
        name: &str,
        buffers: &[&wgpu::Buffer],
        elements: u64,
        timestamps: Option<&TimestampScope>,
    ) -> Result<()> {
        let kernels = self.kernels.borrow();
        let kernel = kernels.kernel(name)?;
        let wg_x = u64::from(kernel.workgroup_size[0].max(1));
        let total = elements.div_ceil(wg_x);
        let total = u32::try_from(total).map_err(|_| {
            Error::InvalidArgument(format!("dispatch of {elements} elements overflows u32"))
        })?;

        let layout = kernel.pipeline.get_bind_group_layout(0);
        let entries: Vec<wgpu::BindGroupEntry> = buffers
            .iter()
            .enumerate()
            .map(|(i, buf)| wgpu::BindGroupEntry {
                binding: i as u32,
                resource: buf.as_entire_binding(),
            })
            .collect();
        let bind_group = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some(name),
            layout: &layout,
            entries: &entries,
        });

        let timestamp_writes = timestamps.map(|t| wgpu::ComputePassTimestampWrites {
            query_set: &t.query_set,
            beginning_of_pass_write_index: Some(0),
            end_of_pass_write_index: Some(1),
        });
        let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
            label: Some(name),
            timestamp_writes,
        });
        pass.set_pipeline(&kernel.pipeline);
        pass.set_bind_group(0, &bind_group, &[]);
        let (wx, wy, wz) = split_workgroups(total);
        pass.dispatch_workgroups(wx, wy, wz);
        Ok(())
    }

    /// Blocking barrier: wait until every submitted command finished.
    pub fn finish(&self) {
        self.device.poll(wgpu::Maintain::Wait);
    }
}

// ── Device-time profiling ────────────────────────────────────────────

impl App {
    /// Allocate a start/stop timestamp bracket, or `None` when the device
    /// does not support timestamp queries.
    #[must_use]
    pub fn create_timestamps(&self) -> Option<TimestampScope> {
        if !self.profile.has_timestamps {
            return None;
        }
        let query_set = self.device.create_query_set(&wgpu::QuerySetDescriptor {
            label: Some("larmor timestamps"),
            ty: wgpu::QueryType::Timestamp,
            count: 2,
        });
        let resolve = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("larmor timestamp resolve"),
            size: 16,
            usage: wgpu::BufferUsages::QUERY_RESOLVE | wgpu::BufferUsages::COPY_SRC,
            mapped_at_creation: false,
        });
        let staging = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("larmor timestamp staging"),
            size: 16,
            usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        Some(TimestampScope {
            query_set,
            resolve,
            staging,
        })
    }

    /// Encode the resolve of a timestamp bracket; call after the profiled
    /// pass, before submitting the encoder.
    pub fn resolve_timestamps(&self, encoder: &mut wgpu::CommandEncoder, scope: &TimestampScope) {
        encoder.resolve_query_set(&scope.query_set, 0..2, &scope.resolve, 0);
        encoder.copy_buffer_to_buffer(&scope.resolve, 0, &scope.staging, 0, 16);
    }

    /// Read back a resolved bracket as milliseconds of device time.
    /// Forces a blocking readback — profiling is opt-in precisely
    /// because of this synchronization.
    ///
    /// # Errors
    ///
    /// [`Error::Launch`] when the staging map fails.
    pub fn read_timestamps_ms(&self, scope: &TimestampScope) -> Result<f64> {
        let bytes = self.read_staging(&scope.staging, true)?;
        let ticks: &[u64] = bytemuck::cast_slice(&bytes);
        if ticks.len() < 2 {
            return Err(Error::Launch("timestamp readback too short".into()));
        }
        let period_ns = f64::from(self.queue.get_timestamp_period());
        Ok(ticks[1].saturating_sub(ticks[0]) as f64 * period_ns / 1.0e6)
    }
}
