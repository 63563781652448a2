// SPDX-License-Identifier: AGPL-3.0-only

//! Typed errors for the larmor device runtime.
//!
//! One crate-level enum so callers can pattern-match on failure modes
//! (no matching device, stale handle, shader compile failure) rather than
//! parsing opaque strings. Device and compile errors are never transient,
//! so nothing here is retried.

use std::fmt;

use crate::app::registry::ArrayHandle;

/// Errors arising from device selection, kernel compilation, handle
/// bookkeeping, or kernel launches.
#[derive(Debug)]
pub enum Error {
    /// No platform/device matched the requested traits at `App` creation,
    /// or device creation itself failed.
    Configuration(String),

    /// Operation on an unregistered or already-released handle.
    InvalidHandle(ArrayHandle),

    /// A kernel source failed to compile. Carries the compiler diagnostic
    /// verbatim so the shader author sees line/column context.
    Build {
        /// Source path or embedded-source name.
        source: String,
        /// Full naga diagnostic text.
        diagnostic: String,
    },

    /// An enqueue or readback failed. Wraps the underlying device error
    /// message. There is no rollback: prior enqueues on the queue are not
    /// undone and device state may be partially updated.
    Launch(String),

    /// Shape/dimension mismatch between input, output, and launch
    /// parameters, or a lifecycle violation (e.g. launching a stage that
    /// was never initialized).
    InvalidArgument(String),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Configuration(msg) => write!(f, "No device matches the request: {msg}"),
            Self::InvalidHandle(h) => write!(f, "Unknown or released array handle {h}"),
            Self::Build { source, diagnostic } => {
                write!(f, "Kernel source '{source}' failed to compile:\n{diagnostic}")
            }
            Self::Launch(msg) => write!(f, "Kernel launch failed: {msg}"),
            Self::InvalidArgument(msg) => write!(f, "Invalid argument: {msg}"),
        }
    }
}

impl std::error::Error for Error {}

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, Error>;
