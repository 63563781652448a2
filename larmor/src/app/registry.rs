// SPDX-License-Identifier: AGPL-3.0-only

//! Handle allocation and per-handle device buffer state.
//!
//! A collection never owns device memory directly — it holds an
//! [`ArrayHandle`] into the app's registry, and the registry entry owns the
//! device-side mirror. Synchronization is always an explicit, caller-
//! initiated step; host/device agreement is not tracked automatically.
//!
//! The registry is **not** thread-safe. It lives behind a `RefCell` inside
//! the app and assumes single-writer access per app instance; concurrent
//! use from multiple threads requires external locking.

use std::cell::Cell;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::error::{Error, Result};

/// Opaque identifier naming a registered array collection.
///
/// Values are monotonically increasing and process-wide unique — one atomic
/// counter serves every app instance, so a handle can never be confused
/// across contexts. The sentinel [`ArrayHandle::INVALID`] is never
/// allocated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ArrayHandle(pub u64);

impl ArrayHandle {
    /// Reserved "no collection" sentinel.
    pub const INVALID: Self = Self(0);

    /// True for any allocated (non-sentinel) handle.
    #[must_use]
    pub const fn is_valid(&self) -> bool {
        self.0 != 0
    }
}

impl fmt::Display for ArrayHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

static NEXT_HANDLE: AtomicU64 = AtomicU64::new(1);

/// Allocate the next process-wide handle.
pub(crate) fn next_handle() -> ArrayHandle {
    ArrayHandle(NEXT_HANDLE.fetch_add(1, Ordering::Relaxed))
}

/// Device-side mirror of one registered collection.
///
/// Owns a storage buffer per host array plus the flattened dims/strides
/// blob kernels consume. Created on first registration, released on
/// `del_data` or app teardown.
#[derive(Debug)]
pub struct DeviceBufferState {
    /// One storage buffer per NdArray, same order as the collection.
    pub(crate) buffers: Vec<wgpu::Buffer>,
    /// Byte size of each storage buffer.
    pub(crate) sizes: Vec<u64>,
    /// Cached dims/strides blob as uploaded (u32 words).
    pub(crate) dims_blob: Vec<u32>,
    /// Device copy of `dims_blob`, bound read-only by kernels.
    pub(crate) dims_buffer: wgpu::Buffer,
    /// Debug-only staleness tracking: set when a launch declares this
    /// handle as written on the device, cleared by device→host sync.
    /// Never triggers an automatic sync.
    pub(crate) device_writes_pending: Cell<bool>,
}

impl DeviceBufferState {
    /// Device buffer for array `index`.
    ///
    /// # Errors
    ///
    /// `InvalidArgument` when `index` is out of range.
    pub fn buffer(&self, index: usize) -> Result<&wgpu::Buffer> {
        self.buffers.get(index).ok_or_else(|| {
            Error::InvalidArgument(format!(
                "array index {index} out of range ({} device buffers)",
                self.buffers.len()
            ))
        })
    }

    /// Device buffer holding the dims/strides blob.
    #[must_use]
    pub const fn dims_buffer(&self) -> &wgpu::Buffer {
        &self.dims_buffer
    }

    /// The uploaded dims/strides words.
    #[must_use]
    pub fn dims_blob(&self) -> &[u32] {
        &self.dims_blob
    }

    /// Number of device buffers (equals the collection's array count).
    #[must_use]
    pub fn buffer_count(&self) -> usize {
        self.buffers.len()
    }
}

/// Map from handle to device buffer state for one app instance.
#[derive(Default)]
pub struct HandleRegistry {
    entries: HashMap<ArrayHandle, DeviceBufferState>,
}

impl HandleRegistry {
    /// Allocate a fresh handle and store its buffer state.
    pub fn insert(&mut self, state: DeviceBufferState) -> ArrayHandle {
        let handle = next_handle();
        self.entries.insert(handle, state);
        handle
    }

    /// Release a handle, dropping its device buffers.
    ///
    /// # Errors
    ///
    /// `InvalidHandle` when the handle is unknown or already released.
    pub fn remove(&mut self, handle: ArrayHandle) -> Result<DeviceBufferState> {
        self.entries
            .remove(&handle)
            .ok_or(Error::InvalidHandle(handle))
    }

    /// Look up the buffer state for a handle, failing fast when unknown.
    pub fn get(&self, handle: ArrayHandle) -> Result<&DeviceBufferState> {
        self.entries.get(&handle).ok_or(Error::InvalidHandle(handle))
    }

    /// True when the handle is currently registered.
    #[must_use]
    pub fn contains(&self, handle: ArrayHandle) -> bool {
        self.entries.contains_key(&handle)
    }

    /// Number of live registrations.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True when no collection is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn handles_are_pairwise_distinct_and_never_sentinel() {
        let mut seen = HashSet::new();
        for _ in 0..1000 {
            let h = next_handle();
            assert!(h.is_valid(), "allocated handle equals the sentinel");
            assert!(seen.insert(h), "handle {h} issued twice");
        }
    }

    #[test]
    fn handles_are_monotonic() {
        let a = next_handle();
        let b = next_handle();
        assert!(b > a);
    }

    #[test]
    fn invalid_sentinel_is_zero() {
        assert_eq!(ArrayHandle::INVALID.0, 0);
        assert!(!ArrayHandle::INVALID.is_valid());
    }

    #[test]
    fn registry_lookup_fails_fast_on_unknown_handle() {
        let registry = HandleRegistry::default();
        let err = registry.get(ArrayHandle(999_999)).unwrap_err();
        assert!(matches!(err, Error::InvalidHandle(ArrayHandle(999_999))));
    }

    #[test]
    fn remove_unknown_handle_is_invalid_handle() {
        let mut registry = HandleRegistry::default();
        assert!(matches!(
            registry.remove(ArrayHandle(42)),
            Err(Error::InvalidHandle(ArrayHandle(42)))
        ));
    }
}
