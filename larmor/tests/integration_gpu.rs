// SPDX-License-Identifier: AGPL-3.0-only
#![allow(clippy::unwrap_used)]

//! Integration tests: full device round trips.
//!
//! Every test here needs a working adapter, so they are opt-in:
//!
//! ```text
//! cargo test -p larmor -- --ignored
//! ```

use std::sync::Arc;

use num_complex::Complex32;

use larmor::{
    create, shared, App, ArrayCollection, CompositeProcess, CopyProcess, DeviceTraits, ElemType,
    HostBuffer, NdArray, PlatformTraits, Process, ProcessState, ProfileParams, SampleLog,
    ScaleProcess,
};

fn gpu_app() -> Arc<App> {
    App::create_blocking(&PlatformTraits::default(), &DeviceTraits::default()).unwrap()
}

fn f32_collection(data: Vec<f32>, dims: Vec<usize>) -> ArrayCollection {
    let array = NdArray::from_buffer(HostBuffer::F32(data), dims).unwrap();
    ArrayCollection::from_array(array).unwrap()
}

#[test]
#[ignore = "requires GPU"]
fn round_trip_is_bit_exact() {
    let app = gpu_app();
    let reference = vec![1.0_f32, -2.5, 3.25, 0.0, f32::MIN_POSITIVE, 1.0e30];
    let mut c = f32_collection(reference.clone(), vec![3, 2]);
    app.add_data(&mut c, true).unwrap();

    // Clobber the host copy, then read the device copy back.
    c.arrays_mut()[0]
        .buffer_mut()
        .as_f32_mut()
        .unwrap()
        .fill(f32::NAN);
    app.device_to_host(&mut c, true).unwrap();
    assert_eq!(c.arrays()[0].buffer().as_f32().unwrap(), &reference[..]);

    app.del_data(&mut c).unwrap();
}

#[test]
#[ignore = "requires GPU"]
fn copy_process_reproduces_input() {
    let app = gpu_app();
    let mut input = f32_collection(vec![1.0, 2.0, 3.0, 4.0], vec![2, 2]);
    let mut output = input.clone_shape();
    app.add_data(&mut input, true).unwrap();
    app.add_data(&mut output, false).unwrap();
    let input = shared(input);
    let output = shared(output);

    let mut copy: CopyProcess = create(&app, ProfileParams::default());
    assert_eq!(copy.state(), ProcessState::Constructed);
    copy.set_input(Arc::clone(&input));
    copy.set_output(Arc::clone(&output));
    app.load_kernels().unwrap();

    copy.init().unwrap();
    assert_eq!(copy.state(), ProcessState::Initialized);
    copy.launch().unwrap();
    assert_eq!(copy.state(), ProcessState::Launched);
    app.finish();

    app.device_to_host(&mut output.borrow_mut(), true).unwrap();
    assert_eq!(
        output.borrow().arrays()[0].buffer().as_f32().unwrap(),
        &[1.0, 2.0, 3.0, 4.0]
    );
}

#[test]
#[ignore = "requires GPU"]
fn launch_before_init_is_rejected() {
    let app = gpu_app();
    let mut copy: CopyProcess = create(&app, ProfileParams::default());
    assert!(copy.launch().is_err());
}

#[test]
#[ignore = "requires GPU"]
fn scale_f32_in_place() {
    let app = gpu_app();
    let mut c = f32_collection(vec![1.0, 2.0, 3.0, 4.0], vec![4]);
    app.add_data(&mut c, true).unwrap();
    let c = shared(c);

    let mut scale: ScaleProcess = create(&app, ProfileParams::default());
    scale.set_input(Arc::clone(&c));
    scale.set_factor(2.5);
    app.load_kernels().unwrap();

    scale.init().unwrap();
    scale.launch().unwrap();
    app.finish();

    app.device_to_host(&mut c.borrow_mut(), true).unwrap();
    assert_eq!(
        c.borrow().arrays()[0].buffer().as_f32().unwrap(),
        &[2.5, 5.0, 7.5, 10.0]
    );
}

#[test]
#[ignore = "requires GPU"]
fn scale_c32_rotates_by_i() {
    let app = gpu_app();
    let data = vec![Complex32::new(1.0, 2.0), Complex32::new(-3.0, 0.5)];
    let array = NdArray::from_buffer(HostBuffer::C32(data), vec![2]).unwrap();
    let mut c = ArrayCollection::from_array(array).unwrap();
    app.add_data(&mut c, true).unwrap();
    let c = shared(c);

    let mut scale: ScaleProcess = create(&app, ProfileParams::default());
    scale.set_input(Arc::clone(&c));
    scale.set_factor_complex(Complex32::new(0.0, 1.0));
    app.load_kernels().unwrap();

    scale.init().unwrap();
    scale.launch().unwrap();
    app.finish();

    app.device_to_host(&mut c.borrow_mut(), true).unwrap();
    let got = c.borrow().arrays()[0].buffer().as_c32().unwrap().to_vec();
    assert_eq!(got, vec![Complex32::new(-2.0, 1.0), Complex32::new(-0.5, -3.0)]);
}

#[test]
#[ignore = "requires GPU"]
fn composite_scale_then_copy() {
    let app = gpu_app();
    let mut input = f32_collection(vec![1.0, 2.0, 3.0], vec![3]);
    let mut output = input.clone_shape();
    app.add_data(&mut input, true).unwrap();
    app.add_data(&mut output, false).unwrap();
    let input = shared(input);
    let output = shared(output);

    let mut scale: ScaleProcess = create(&app, ProfileParams::default());
    scale.set_factor(10.0);
    let copy: CopyProcess = create(&app, ProfileParams::default());

    let mut pipeline = CompositeProcess::new(&app, ProfileParams::default());
    pipeline.push(Box::new(scale));
    pipeline.push(Box::new(copy));
    pipeline.set_input(Arc::clone(&input));
    pipeline.set_output(Arc::clone(&output));
    app.load_kernels().unwrap();

    pipeline.init().unwrap();
    pipeline.launch().unwrap();
    app.finish();

    app.device_to_host(&mut output.borrow_mut(), true).unwrap();
    assert_eq!(
        output.borrow().arrays()[0].buffer().as_f32().unwrap(),
        &[10.0, 20.0, 30.0]
    );
}

#[test]
#[ignore = "requires GPU"]
fn kernel_loading_compiles_each_source_once() {
    let app = gpu_app();
    let _copy: CopyProcess = create(&app, ProfileParams::default());
    let _scale: ScaleProcess = create(&app, ProfileParams::default());
    let compiled = app.load_kernels().unwrap();
    assert_eq!(compiled, 3);
    // A second load has nothing pending.
    assert_eq!(app.load_kernels().unwrap(), 0);
    assert_eq!(app.kernel_compile_count(), 3);
}

#[test]
#[ignore = "requires GPU"]
fn clone_data_duplicates_device_storage() {
    let app = gpu_app();
    let mut c = f32_collection(vec![5.0, 6.0, 7.0], vec![3]);
    app.add_data(&mut c, true).unwrap();
    assert_eq!(app.data_count(), 1);

    let mut twin = app.clone_data(&c).unwrap();
    assert_eq!(app.data_count(), 2);
    assert_ne!(twin.handle(), c.handle());

    // Wipe the twin's host copy; the device copy must restore it.
    twin.arrays_mut()[0]
        .buffer_mut()
        .as_f32_mut()
        .unwrap()
        .fill(0.0);
    app.device_to_host(&mut twin, true).unwrap();
    assert_eq!(
        twin.arrays()[0].buffer().as_f32().unwrap(),
        &[5.0, 6.0, 7.0]
    );
}

#[test]
#[ignore = "requires GPU"]
fn launches_mark_handles_until_readback() {
    let app = gpu_app();
    let mut c = f32_collection(vec![1.0, 2.0], vec![2]);
    app.add_data(&mut c, true).unwrap();
    let handle = c.handle();
    assert!(!app.device_writes_pending(handle).unwrap());

    let c = shared(c);
    let mut scale: ScaleProcess = create(&app, ProfileParams::default());
    scale.set_input(Arc::clone(&c));
    app.load_kernels().unwrap();
    scale.init().unwrap();
    scale.launch().unwrap();
    assert!(app.device_writes_pending(handle).unwrap());

    app.device_to_host(&mut c.borrow_mut(), true).unwrap();
    assert!(!app.device_writes_pending(handle).unwrap());
}

#[test]
#[ignore = "requires GPU"]
fn compiled_kernels_expose_workgroup_size() {
    let app = gpu_app();
    let _copy: CopyProcess = create(&app, ProfileParams::default());
    app.load_kernels().unwrap();
    let wg = app
        .with_kernel(larmor::shaders::KERNEL_COPY_U32, |k| k.workgroup_size)
        .unwrap();
    assert_eq!(wg, [256, 1, 1]);
}

#[test]
#[ignore = "requires GPU"]
fn released_handles_reject_further_use() {
    let app = gpu_app();
    let mut c = f32_collection(vec![0.0; 8], vec![8]);
    let handle = app.add_data(&mut c, true).unwrap();
    app.del_data(&mut c).unwrap();
    assert!(app.dims_blob(handle).is_err());
    assert!(app.host_to_device(&c).is_err());
}

#[test]
#[ignore = "requires GPU"]
fn profiled_launch_records_samples() {
    let app = gpu_app();
    let mut c = f32_collection(vec![1.0; 1024], vec![1024]);
    app.add_data(&mut c, true).unwrap();
    let c = shared(c);

    let log = Arc::new(std::cell::RefCell::new(SampleLog::default()));
    let mut scale: ScaleProcess = create(&app, ProfileParams::into_log(&log));
    scale.set_input(Arc::clone(&c));
    scale.set_factor(3.0);
    app.load_kernels().unwrap();

    scale.init().unwrap();
    scale.launch().unwrap();
    app.finish();

    let log = log.borrow();
    assert_eq!(log.len(), 1);
    assert!(log.samples()[0].host_ms >= 0.0);
    if app.has_timestamps() {
        assert!(log.samples()[0].device_ms.is_some());
    }
    log.print_summary("scale launch");
}
