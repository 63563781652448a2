// SPDX-License-Identifier: AGPL-3.0-only

//! Dense host-resident n-dimensional arrays.
//!
//! An [`NdArray`] is one typed, contiguous array with a dimension vector
//! and a non-owning back-reference to the handle of the collection that
//! owns it. Storage lives in a [`HostBuffer`], a tagged variant over the
//! closed set of element types the runtime supports — each variant clones
//! itself, so there is no virtual `clone()` chain and no downcasting.
//!
//! Strides follow the fastest-first convention: the stride of a dimension
//! is the product of the sizes of all faster-varying dimensions, measured
//! in elements.

use num_complex::Complex32;

use crate::app::registry::ArrayHandle;
use crate::error::{Error, Result};

/// Element type tag shared by every array in a collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ElemType {
    /// 32-bit real.
    F32,
    /// 64-bit real (requires `SHADER_F64` on device).
    F64,
    /// Complex with f32 components — the native MRI k-space sample type.
    C32,
}

impl ElemType {
    /// Element size in bytes, matching the WGSL-side layout.
    #[must_use]
    pub const fn size_bytes(&self) -> usize {
        match self {
            Self::F32 => 4,
            Self::F64 | Self::C32 => 8,
        }
    }

    /// Short label used in buffer labels and reports.
    #[must_use]
    pub const fn label(&self) -> &'static str {
        match self {
            Self::F32 => "f32",
            Self::F64 => "f64",
            Self::C32 => "c32",
        }
    }
}

/// Typed host storage for one array. Closed set — adding an element type
/// means adding a variant here and nowhere else.
#[derive(Debug, Clone, PartialEq)]
pub enum HostBuffer {
    F32(Vec<f32>),
    F64(Vec<f64>),
    C32(Vec<Complex32>),
}

impl HostBuffer {
    /// Zero-filled buffer of `len` elements of type `elem`.
    #[must_use]
    pub fn zeroed(elem: ElemType, len: usize) -> Self {
        match elem {
            ElemType::F32 => Self::F32(vec![0.0; len]),
            ElemType::F64 => Self::F64(vec![0.0; len]),
            ElemType::C32 => Self::C32(vec![Complex32::new(0.0, 0.0); len]),
        }
    }

    /// Element type tag of this buffer.
    #[must_use]
    pub const fn elem_type(&self) -> ElemType {
        match self {
            Self::F32(_) => ElemType::F32,
            Self::F64(_) => ElemType::F64,
            Self::C32(_) => ElemType::C32,
        }
    }

    /// Number of elements.
    #[must_use]
    pub fn len(&self) -> usize {
        match self {
            Self::F32(v) => v.len(),
            Self::F64(v) => v.len(),
            Self::C32(v) => v.len(),
        }
    }

    /// True when the buffer holds no elements.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Raw little-endian byte view, suitable for `Queue::write_buffer`.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        match self {
            Self::F32(v) => bytemuck::cast_slice(v),
            Self::F64(v) => bytemuck::cast_slice(v),
            Self::C32(v) => bytemuck::cast_slice(v),
        }
    }

    /// Mutable byte view for device→host readback.
    pub fn as_bytes_mut(&mut self) -> &mut [u8] {
        match self {
            Self::F32(v) => bytemuck::cast_slice_mut(v),
            Self::F64(v) => bytemuck::cast_slice_mut(v),
            Self::C32(v) => bytemuck::cast_slice_mut(v),
        }
    }

    /// Typed f32 view, or `InvalidArgument` when the tag differs.
    ///
    /// Narrow entry point for the file-IO collaborator ("load element from
    /// parsed record" lands here).
    pub fn as_f32(&self) -> Result<&[f32]> {
        match self {
            Self::F32(v) => Ok(v),
            other => Err(Error::InvalidArgument(format!(
                "expected f32 buffer, got {}",
                other.elem_type().label()
            ))),
        }
    }

    /// Mutable typed f32 view.
    pub fn as_f32_mut(&mut self) -> Result<&mut [f32]> {
        match self {
            Self::F32(v) => Ok(v),
            other => Err(Error::InvalidArgument(format!(
                "expected f32 buffer, got {}",
                other.elem_type().label()
            ))),
        }
    }

    /// Typed c32 view.
    pub fn as_c32(&self) -> Result<&[Complex32]> {
        match self {
            Self::C32(v) => Ok(v),
            other => Err(Error::InvalidArgument(format!(
                "expected c32 buffer, got {}",
                other.elem_type().label()
            ))),
        }
    }

    /// Mutable typed c32 view.
    pub fn as_c32_mut(&mut self) -> Result<&mut [Complex32]> {
        match self {
            Self::C32(v) => Ok(v),
            other => Err(Error::InvalidArgument(format!(
                "expected c32 buffer, got {}",
                other.elem_type().label()
            ))),
        }
    }

    /// Typed f64 view.
    pub fn as_f64(&self) -> Result<&[f64]> {
        match self {
            Self::F64(v) => Ok(v),
            other => Err(Error::InvalidArgument(format!(
                "expected f64 buffer, got {}",
                other.elem_type().label()
            ))),
        }
    }
}

/// Strides for a dimension vector, fastest-first: `stride[i]` is the
/// product of `dims[0..i]`, in elements.
///
/// Pure function — [`NdArray`] caches the result at construction.
#[must_use]
pub fn strides_for(dims: &[usize]) -> Vec<usize> {
    let mut strides = Vec::with_capacity(dims.len());
    let mut acc = 1usize;
    for &d in dims {
        strides.push(acc);
        acc *= d;
    }
    strides
}

/// One dense typed n-dimensional array owned by an [`crate::data::ArrayCollection`].
#[derive(Debug, Clone)]
pub struct NdArray {
    dims: Vec<usize>,
    strides: Vec<usize>,
    buffer: HostBuffer,
    /// Handle of the owning collection. INVALID until the collection is
    /// registered with an app; the array never owns device memory itself.
    owner: ArrayHandle,
}

impl NdArray {
    /// Zero-filled array with the given spatial dimension vector.
    ///
    /// # Errors
    ///
    /// `InvalidArgument` when `dims` is empty or contains a zero size.
    pub fn zeroed(elem: ElemType, dims: Vec<usize>) -> Result<Self> {
        if dims.is_empty() || dims.contains(&0) {
            return Err(Error::InvalidArgument(format!(
                "array dims must be non-empty and positive, got {dims:?}"
            )));
        }
        let len = dims.iter().product();
        let strides = strides_for(&dims);
        Ok(Self {
            dims,
            strides,
            buffer: HostBuffer::zeroed(elem, len),
            owner: ArrayHandle::INVALID,
        })
    }

    /// Array taking ownership of an existing host buffer.
    ///
    /// # Errors
    ///
    /// `InvalidArgument` when the buffer length does not match the product
    /// of `dims`.
    pub fn from_buffer(buffer: HostBuffer, dims: Vec<usize>) -> Result<Self> {
        let expect: usize = dims.iter().product();
        if dims.is_empty() || dims.contains(&0) || buffer.len() != expect {
            return Err(Error::InvalidArgument(format!(
                "buffer of {} elements does not match dims {dims:?}",
                buffer.len()
            )));
        }
        let strides = strides_for(&dims);
        Ok(Self {
            dims,
            strides,
            buffer,
            owner: ArrayHandle::INVALID,
        })
    }

    /// Dimension sizes, fastest-varying first.
    #[must_use]
    pub fn dims(&self) -> &[usize] {
        &self.dims
    }

    /// Cached element strides (see [`strides_for`]).
    #[must_use]
    pub fn strides(&self) -> &[usize] {
        &self.strides
    }

    /// Total element count.
    #[must_use]
    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    /// True when the array holds no elements (cannot happen for arrays
    /// built through the public constructors).
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// Size of the host storage in bytes.
    #[must_use]
    pub fn size_bytes(&self) -> usize {
        self.buffer.len() * self.buffer.elem_type().size_bytes()
    }

    /// Element type tag.
    #[must_use]
    pub const fn elem_type(&self) -> ElemType {
        self.buffer.elem_type()
    }

    /// Host storage.
    #[must_use]
    pub const fn buffer(&self) -> &HostBuffer {
        &self.buffer
    }

    /// Mutable host storage.
    pub fn buffer_mut(&mut self) -> &mut HostBuffer {
        &mut self.buffer
    }

    /// Handle of the owning collection (INVALID before registration).
    #[must_use]
    pub const fn owner(&self) -> ArrayHandle {
        self.owner
    }

    pub(crate) fn set_owner(&mut self, owner: ArrayHandle) {
        self.owner = owner;
    }

    /// Same shape and element type, zero-filled storage.
    #[must_use]
    pub fn clone_shape(&self) -> Self {
        Self {
            dims: self.dims.clone(),
            strides: self.strides.clone(),
            buffer: HostBuffer::zeroed(self.buffer.elem_type(), self.buffer.len()),
            owner: ArrayHandle::INVALID,
        }
    }

    /// Same shape, zero-filled storage of a different element type.
    #[must_use]
    pub fn clone_with_elem_type(&self, elem: ElemType) -> Self {
        Self {
            dims: self.dims.clone(),
            strides: self.strides.clone(),
            buffer: HostBuffer::zeroed(elem, self.buffer.len()),
            owner: ArrayHandle::INVALID,
        }
    }
}
