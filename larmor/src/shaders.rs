// SPDX-License-Identifier: AGPL-3.0-only

//! Built-in WGSL kernel sources for the orchestration stages.
//!
//! Reconstruction kernels proper (FFT, gridding, registration) live in
//! external `.wgsl` files registered via `App::add_kernel_file` /
//! `add_kernel_dir` — the runtime treats them as opaque program text.
//! The sources here are the small kernels the built-in stages drive,
//! shipped with the crate so those stages work without any on-disk
//! kernel tree.

// ═══════════════════════════════════════════════════════════════════
// Identity Copy (u32 words)
// ═══════════════════════════════════════════════════════════════════
//
// Copies src to dst one 32-bit word at a time. Type-agnostic: f32, f64,
// and c32 elements are all whole numbers of words.

/// Registration name for the copy kernel source.
pub const COPY_SOURCE_NAME: &str = "larmor/copy_u32.wgsl";
/// Copy kernel entry point.
pub const KERNEL_COPY_U32: &str = "copy_u32";
pub const SHADER_COPY_U32: &str = include_str!("../shaders/copy_u32.wgsl");

// ═══════════════════════════════════════════════════════════════════
// Scalar Multiply (f32)
// ═══════════════════════════════════════════════════════════════════

/// Registration name for the f32 scale kernel source.
pub const SCALE_F32_SOURCE_NAME: &str = "larmor/scale_f32.wgsl";
/// f32 scale entry point.
pub const KERNEL_SCALE_F32: &str = "scale_f32";
pub const SHADER_SCALE_F32: &str = include_str!("../shaders/scale_f32.wgsl");

// ═══════════════════════════════════════════════════════════════════
// Scalar Multiply (c32) — complex factor on interleaved pairs
// ═══════════════════════════════════════════════════════════════════

/// Registration name for the c32 scale kernel source.
pub const SCALE_C32_SOURCE_NAME: &str = "larmor/scale_c32.wgsl";
/// c32 scale entry point.
pub const KERNEL_SCALE_C32: &str = "scale_c32";
pub const SHADER_SCALE_C32: &str = include_str!("../shaders/scale_c32.wgsl");
