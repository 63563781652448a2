// SPDX-License-Identifier: AGPL-3.0-only

//! Array collections — the unit of registration and synchronization.
//!
//! An [`ArrayCollection`] owns an ordered set of [`NdArray`]s sharing one
//! element type, together with the MRI-specific axis metadata: a coil
//! (acquisition channel) count and temporal dimension sizes. The layout
//! convention is `[spatial…]` then `[coil]` then `[temporal…]` — the
//! spatial dims live inside each array, while coil and temporal positions
//! select consecutive arrays of the collection.
//!
//! The collection never owns device memory. Registering it with an
//! [`crate::app::App`] allocates an [`ArrayHandle`] whose registry entry
//! owns the device-side mirror; host↔device synchronization is always an
//! explicit call on the app.
//!
//! ## Dims/strides blob
//!
//! Kernels receive one flattened `u32` table per collection:
//!
//! ```text
//! [0] n_arrays   [1] n_coils   [2] n_temporal   [3] uniform flag
//! [4..] temporal sizes (n_temporal words)
//! then per array:
//!   [rank] [spatial dims × rank] [spatial strides × rank]
//!   [coil stride] [temporal strides × n_temporal]
//! ```
//!
//! The coil stride is the array's spatial volume; temporal stride 0 is the
//! coil stride times `max(n_coils, 1)` and each further temporal stride
//! multiplies by the previous temporal size. Host and device index with
//! the same table.

use crate::app::registry::ArrayHandle;
use crate::array::{ElemType, NdArray};
use crate::error::{Error, Result};

/// Ordered set of same-typed arrays with coil/temporal metadata.
#[derive(Debug, Clone)]
pub struct ArrayCollection {
    arrays: Vec<NdArray>,
    elem: ElemType,
    coils: usize,
    temporal_dims: Vec<usize>,
    /// True when every array has identical dimensions. Operations that
    /// assume a single shared stride table require this.
    uniform: bool,
    handle: ArrayHandle,
}

impl ArrayCollection {
    /// Build a collection from existing arrays.
    ///
    /// The uniform-size flag is derived by comparing every dimension
    /// vector against the first array's.
    ///
    /// # Errors
    ///
    /// `InvalidArgument` when `arrays` is empty or any array's element
    /// type differs from `elem`.
    pub fn new(
        elem: ElemType,
        arrays: Vec<NdArray>,
        coils: usize,
        temporal_dims: Vec<usize>,
    ) -> Result<Self> {
        if arrays.is_empty() {
            return Err(Error::InvalidArgument(
                "a collection needs at least one array".into(),
            ));
        }
        for (i, a) in arrays.iter().enumerate() {
            if a.elem_type() != elem {
                return Err(Error::InvalidArgument(format!(
                    "array {i} is {} but the collection is {}",
                    a.elem_type().label(),
                    elem.label()
                )));
            }
        }
        let uniform = arrays.iter().all(|a| a.dims() == arrays[0].dims());
        Ok(Self {
            arrays,
            elem,
            coils,
            temporal_dims,
            uniform,
            handle: ArrayHandle::INVALID,
        })
    }

    /// Single-array collection with no coil or temporal axes.
    pub fn from_array(array: NdArray) -> Result<Self> {
        let elem = array.elem_type();
        Self::new(elem, vec![array], 0, Vec::new())
    }

    /// Zero-filled collection: `count` arrays of identical `dims`.
    pub fn zeroed(
        elem: ElemType,
        dims: &[usize],
        count: usize,
        coils: usize,
        temporal_dims: Vec<usize>,
    ) -> Result<Self> {
        if count == 0 {
            return Err(Error::InvalidArgument(
                "a collection needs at least one array".into(),
            ));
        }
        let arrays = (0..count)
            .map(|_| NdArray::zeroed(elem, dims.to_vec()))
            .collect::<Result<Vec<_>>>()?;
        Self::new(elem, arrays, coils, temporal_dims)
    }

    /// The arrays, in collection order.
    #[must_use]
    pub fn arrays(&self) -> &[NdArray] {
        &self.arrays
    }

    /// Mutable access for the file-IO collaborator and readback.
    pub fn arrays_mut(&mut self) -> &mut [NdArray] {
        &mut self.arrays
    }

    /// Shared element type of every array.
    #[must_use]
    pub const fn elem_type(&self) -> ElemType {
        self.elem
    }

    /// Acquisition-channel count (0 when the data has no coil axis).
    #[must_use]
    pub const fn coils(&self) -> usize {
        self.coils
    }

    /// Temporal dimension sizes, fastest-varying first.
    #[must_use]
    pub fn temporal_dims(&self) -> &[usize] {
        &self.temporal_dims
    }

    /// True when every array shares one dimension vector.
    #[must_use]
    pub const fn is_uniform(&self) -> bool {
        self.uniform
    }

    /// Handle assigned at registration; INVALID before `add_data` and
    /// after `del_data`.
    #[must_use]
    pub const fn handle(&self) -> ArrayHandle {
        self.handle
    }

    /// Number of arrays.
    #[must_use]
    pub fn num_arrays(&self) -> usize {
        self.arrays.len()
    }

    /// Total element count across all arrays.
    #[must_use]
    pub fn total_len(&self) -> usize {
        self.arrays.iter().map(NdArray::len).sum()
    }

    pub(crate) fn bind_handle(&mut self, handle: ArrayHandle) {
        self.handle = handle;
        for a in &mut self.arrays {
            a.set_owner(handle);
        }
    }

    /// Reject collections whose uniform-size flag is false.
    ///
    /// Gate for operations that assume a single shared stride table
    /// (elementwise scale, identity copy between collections).
    ///
    /// # Errors
    ///
    /// `InvalidArgument` when the arrays do not all share one shape.
    pub fn require_uniform(&self) -> Result<()> {
        if self.uniform {
            Ok(())
        } else {
            Err(Error::InvalidArgument(
                "operation requires a uniform-size collection".into(),
            ))
        }
    }

    /// Check another collection is launch-compatible: same array count,
    /// element type, and per-array shapes.
    ///
    /// # Errors
    ///
    /// `InvalidArgument` describing the first mismatch.
    pub fn require_same_shape(&self, other: &Self) -> Result<()> {
        if self.elem != other.elem {
            return Err(Error::InvalidArgument(format!(
                "element type mismatch: {} vs {}",
                self.elem.label(),
                other.elem.label()
            )));
        }
        if self.arrays.len() != other.arrays.len() {
            return Err(Error::InvalidArgument(format!(
                "array count mismatch: {} vs {}",
                self.arrays.len(),
                other.arrays.len()
            )));
        }
        for (i, (a, b)) in self.arrays.iter().zip(other.arrays.iter()).enumerate() {
            if a.dims() != b.dims() {
                return Err(Error::InvalidArgument(format!(
                    "array {i} shape mismatch: {:?} vs {:?}",
                    a.dims(),
                    b.dims()
                )));
            }
        }
        Ok(())
    }

    /// Flattened dims/strides table (see module docs for the layout).
    ///
    /// Pure function of the collection's shape metadata; the app caches
    /// the result per handle at registration.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn dims_and_strides_blob(&self) -> Vec<u32> {
        let mut blob = Vec::with_capacity(
            4 + self.temporal_dims.len()
                + self
                    .arrays
                    .iter()
                    .map(|a| 2 * a.dims().len() + 2 + self.temporal_dims.len())
                    .sum::<usize>(),
        );
        blob.push(self.arrays.len() as u32);
        blob.push(self.coils as u32);
        blob.push(self.temporal_dims.len() as u32);
        blob.push(u32::from(self.uniform));
        blob.extend(self.temporal_dims.iter().map(|&d| d as u32));

        for a in self.arrays.iter() {
            blob.push(a.dims().len() as u32);
            blob.extend(a.dims().iter().map(|&d| d as u32));
            blob.extend(a.strides().iter().map(|&s| s as u32));
            let coil_stride: usize = a.dims().iter().product();
            blob.push(coil_stride as u32);
            let mut t = coil_stride * self.coils.max(1);
            for &size in &self.temporal_dims {
                blob.push(t as u32);
                t *= size;
            }
        }
        blob
    }

    /// Deep host copy: duplicates every array's storage. The clone is
    /// unregistered (INVALID handle); use
    /// [`crate::app::App::clone_data`] to also duplicate device storage.
    #[must_use]
    pub fn clone_deep(&self) -> Self {
        let mut copy = self.clone();
        copy.handle = ArrayHandle::INVALID;
        for a in &mut copy.arrays {
            a.set_owner(ArrayHandle::INVALID);
        }
        copy
    }

    /// Shallow clone: same shapes and metadata, zero-filled storage.
    ///
    /// The mechanism by which a pipeline stage allocates a same-shaped
    /// output without manual bookkeeping.
    #[must_use]
    pub fn clone_shape(&self) -> Self {
        Self {
            arrays: self.arrays.iter().map(NdArray::clone_shape).collect(),
            elem: self.elem,
            coils: self.coils,
            temporal_dims: self.temporal_dims.clone(),
            uniform: self.uniform,
            handle: ArrayHandle::INVALID,
        }
    }

    /// Shape clone with a different element type (zero-filled).
    #[must_use]
    pub fn clone_with_elem_type(&self, elem: ElemType) -> Self {
        Self {
            arrays: self
                .arrays
                .iter()
                .map(|a| a.clone_with_elem_type(elem))
                .collect(),
            elem,
            coils: self.coils,
            temporal_dims: self.temporal_dims.clone(),
            uniform: self.uniform,
            handle: ArrayHandle::INVALID,
        }
    }
}
