// SPDX-License-Identifier: AGPL-3.0-only
#![allow(clippy::unwrap_used)]

//! Integration tests: device-free public API surface.
//!
//! Exercises handle allocation, collection construction and metadata,
//! the dims/strides device blob, kernel source registration, WGSL
//! entry-point parsing, adapter scoring, and profiling summaries — all
//! without requiring a GPU.

use approx::assert_relative_eq;
use larmor::app::adapter::{score, DeviceProfile};
use larmor::app::kernels::{parse_entry_points, KernelCache};
use larmor::array::strides_for;
use larmor::shaders::{KERNEL_SCALE_F32, SHADER_COPY_U32, SHADER_SCALE_F32};
use larmor::{
    ArrayCollection, ArrayHandle, ElemType, Error, HostBuffer, KernelSample, NdArray, SampleLog,
};

// ── Handles ──────────────────────────────────────────────────────────

#[test]
fn invalid_handle_is_never_allocated() {
    assert!(!ArrayHandle::INVALID.is_valid());
    let c = ArrayCollection::zeroed(ElemType::F32, &[4], 1, 0, Vec::new()).unwrap();
    // Unregistered collections carry the sentinel.
    assert_eq!(c.handle(), ArrayHandle::INVALID);
}

// ── Arrays and strides ───────────────────────────────────────────────

#[test]
fn strides_follow_dimension_order() {
    assert_eq!(strides_for(&[4, 3]), vec![1, 4]);
    assert_eq!(strides_for(&[4, 3, 2]), vec![1, 4, 12]);
    assert_eq!(strides_for(&[7]), vec![1]);
}

#[test]
fn array_rejects_shape_data_mismatch() {
    let buf = HostBuffer::F32(vec![0.0; 5]);
    assert!(NdArray::from_buffer(buf, vec![2, 3]).is_err());
}

#[test]
fn array_rejects_zero_dimension() {
    assert!(NdArray::zeroed(ElemType::F32, vec![4, 0]).is_err());
    assert!(NdArray::zeroed(ElemType::F32, vec![]).is_err());
}

// ── Collections ──────────────────────────────────────────────────────

#[test]
fn collection_rejects_empty_and_mixed() {
    assert!(ArrayCollection::new(ElemType::F32, Vec::new(), 0, Vec::new()).is_err());

    let f = NdArray::zeroed(ElemType::F32, vec![4]).unwrap();
    let c = NdArray::zeroed(ElemType::C32, vec![4]).unwrap();
    let err = ArrayCollection::new(ElemType::F32, vec![f, c], 0, Vec::new());
    assert!(matches!(err, Err(Error::InvalidArgument(_))));
}

#[test]
fn collection_derives_uniformity() {
    let uniform = ArrayCollection::zeroed(ElemType::F32, &[4, 3], 2, 0, Vec::new()).unwrap();
    assert!(uniform.is_uniform());
    assert!(uniform.require_uniform().is_ok());

    let a = NdArray::zeroed(ElemType::F32, vec![4]).unwrap();
    let b = NdArray::zeroed(ElemType::F32, vec![5]).unwrap();
    let ragged = ArrayCollection::new(ElemType::F32, vec![a, b], 0, Vec::new()).unwrap();
    assert!(!ragged.is_uniform());
    assert!(ragged.require_uniform().is_err());
}

#[test]
fn same_shape_gate_reports_first_mismatch() {
    let a = ArrayCollection::zeroed(ElemType::F32, &[4, 3], 1, 0, Vec::new()).unwrap();
    let b = ArrayCollection::zeroed(ElemType::F32, &[4, 3], 1, 0, Vec::new()).unwrap();
    assert!(a.require_same_shape(&b).is_ok());

    let c = ArrayCollection::zeroed(ElemType::F32, &[3, 4], 1, 0, Vec::new()).unwrap();
    assert!(a.require_same_shape(&c).is_err());

    let z = ArrayCollection::zeroed(ElemType::C32, &[4, 3], 1, 0, Vec::new()).unwrap();
    assert!(a.require_same_shape(&z).is_err());
}

#[test]
fn dims_blob_header_and_record_layout() {
    let c = ArrayCollection::zeroed(ElemType::F32, &[4, 3], 2, 0, Vec::new()).unwrap();
    let blob = c.dims_and_strides_blob();
    // Header: n_arrays, n_coils, n_temporal, uniform flag.
    assert_eq!(&blob[..4], &[2, 2, 0, 1]);
    // First record: rank, dims, strides, coil stride (= spatial volume).
    assert_eq!(&blob[4..10], &[2, 4, 3, 1, 4, 12]);
}

#[test]
fn dims_blob_temporal_strides_stack_on_coils() {
    let c = ArrayCollection::zeroed(ElemType::F32, &[4, 3], 1, 2, vec![2, 5]).unwrap();
    let blob = c.dims_and_strides_blob();
    assert_eq!(&blob[..4], &[1, 2, 2, 1]);
    // Temporal sizes follow the header.
    assert_eq!(&blob[4..6], &[2, 5]);
    // Record: rank 2, dims 4 3, strides 1 4, coil stride 12, then
    // temporal strides 24 (= 12 * 2 coils) and 48 (= 24 * 2 frames).
    assert_eq!(&blob[6..], &[2, 4, 3, 1, 4, 12, 24, 48]);
}

// ── Clones ───────────────────────────────────────────────────────────

#[test]
fn deep_clone_copies_bytes_and_resets_handle() {
    let buf = HostBuffer::F32(vec![1.0, 2.0, 3.0, 4.0]);
    let array = NdArray::from_buffer(buf, vec![2, 2]).unwrap();
    let c = ArrayCollection::from_array(array).unwrap();
    let d = c.clone_deep();
    assert_eq!(d.handle(), ArrayHandle::INVALID);
    assert_eq!(
        d.arrays()[0].buffer().as_f32().unwrap(),
        &[1.0, 2.0, 3.0, 4.0]
    );
}

#[test]
fn shape_clone_is_zero_filled() {
    let buf = HostBuffer::F32(vec![1.0, 2.0, 3.0]);
    let array = NdArray::from_buffer(buf, vec![3]).unwrap();
    let c = ArrayCollection::from_array(array).unwrap();
    let s = c.clone_shape();
    assert_eq!(s.arrays()[0].dims(), &[3]);
    assert_eq!(s.arrays()[0].buffer().as_f32().unwrap(), &[0.0, 0.0, 0.0]);
}

#[test]
fn elem_type_clone_converts_shape_not_data() {
    let c = ArrayCollection::zeroed(ElemType::F32, &[4, 3], 1, 0, Vec::new()).unwrap();
    let z = c.clone_with_elem_type(ElemType::C32);
    assert_eq!(z.elem_type(), ElemType::C32);
    assert_eq!(z.arrays()[0].dims(), &[4, 3]);
    assert_eq!(z.arrays()[0].size_bytes(), 12 * 8);
}

// ── Kernel cache and WGSL parsing ────────────────────────────────────

#[test]
fn source_registration_is_idempotent() {
    let mut cache = KernelCache::default();
    assert!(cache.add_source("copy", SHADER_COPY_U32));
    assert!(!cache.add_source("copy", SHADER_COPY_U32));
    assert_eq!(cache.source_count(), 1);
    assert_eq!(cache.pending_count(), 1);
    assert_eq!(cache.compile_count(), 0);
}

#[test]
fn entry_points_carry_workgroup_size() {
    let eps = parse_entry_points("scale", SHADER_SCALE_F32).unwrap();
    assert_eq!(eps.len(), 1);
    assert_eq!(eps[0].name, KERNEL_SCALE_F32);
    assert_eq!(eps[0].workgroup_size, [256, 1, 1]);
}

#[test]
fn wgsl_errors_surface_as_build_diagnostics() {
    let err = parse_entry_points("bad", "fn broken( -> {").unwrap_err();
    match err {
        Error::Build { diagnostic, .. } => assert!(!diagnostic.is_empty()),
        other => panic!("expected Build error, got {other}"),
    }
}

// ── Adapter scoring ──────────────────────────────────────────────────

fn profile(device_type: wgpu::DeviceType, invocations: u32) -> DeviceProfile {
    DeviceProfile {
        index: 0,
        name: "test".into(),
        driver: "test".into(),
        vendor: 0,
        device_type,
        has_f64: false,
        has_timestamps: false,
        max_invocations: invocations,
        max_storage_bytes: 1 << 28,
        max_buffer_bytes: 1 << 30,
    }
}

#[test]
fn scoring_prefers_discrete_over_integrated() {
    let discrete = profile(wgpu::DeviceType::DiscreteGpu, 256);
    let integrated = profile(wgpu::DeviceType::IntegratedGpu, 1024);
    assert!(score(&discrete) > score(&integrated));
}

#[test]
fn scoring_is_deterministic() {
    let p = profile(wgpu::DeviceType::DiscreteGpu, 1024);
    assert_eq!(score(&p), score(&p.clone()));
}

// ── Profiling summaries ──────────────────────────────────────────────

#[test]
fn sample_log_aggregates_host_and_device_times() {
    let mut log = SampleLog::default();
    log.push(KernelSample {
        label: "copy".into(),
        host_ms: 2.0,
        device_ms: Some(1.0),
    });
    log.push(KernelSample {
        label: "scale".into(),
        host_ms: 4.0,
        device_ms: None,
    });
    let (mean, min, max) = log.host_stats_ms().unwrap();
    assert_relative_eq!(mean, 3.0);
    assert_relative_eq!(min, 2.0);
    assert_relative_eq!(max, 4.0);
    // Device stats skip samples without timestamps.
    let (dmean, _, _) = log.device_stats_ms().unwrap();
    assert_relative_eq!(dmean, 1.0);
}
