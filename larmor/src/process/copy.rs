// SPDX-License-Identifier: AGPL-3.0-only

//! Identity copy between two device-resident collections.
//!
//! The simplest useful stage, and the conformance baseline: after
//! `host_to_device → launch → device_to_host` the output bytes must
//! equal the input bytes exactly. The kernel copies 32-bit words, so it
//! serves every element type whose size is a multiple of four bytes.

use std::sync::Arc;

use crate::error::Result;
use crate::shaders::{COPY_SOURCE_NAME, KERNEL_COPY_U32, SHADER_COPY_U32};

use super::{Process, ProcessBuild, ProcessCommon};

/// Device-to-device identity copy, array by array.
pub struct CopyProcess {
    common: ProcessCommon,
}

impl Process for CopyProcess {
    fn common(&self) -> &ProcessCommon {
        &self.common
    }

    fn common_mut(&mut self) -> &mut ProcessCommon {
        &mut self.common
    }

    fn init(&mut self) -> Result<()> {
        let app = Arc::clone(self.common.app());
        let input = Arc::clone(self.common.input()?);
        let output = Arc::clone(self.common.output()?);
        let input = input.borrow();
        let output = output.borrow();

        // Both collections must already be device-resident.
        app.buffer_count(input.handle())?;
        app.buffer_count(output.handle())?;
        input.require_same_shape(&output)?;

        self.common.mark_initialized();
        Ok(())
    }

    fn launch(&mut self) -> Result<()> {
        self.common.begin_launch()?;
        let app = Arc::clone(self.common.app());
        let input = Arc::clone(self.common.input()?);
        let output = Arc::clone(self.common.output()?);
        let input = input.borrow();
        let output = output.borrow();

        let (started, scope) = self.common.begin_profile();
        let mut encoder = app.begin_encoder("copy");
        // With several arrays the device interval covers the last pass
        // only; host time covers the whole launch.
        app.with_buffer_state(input.handle(), |src| -> Result<()> {
            app.with_buffer_state(output.handle(), |dst| -> Result<()> {
                for (i, array) in input.arrays().iter().enumerate() {
                    let words = (array.size_bytes() / 4) as u64;
                    app.encode_kernel(
                        &mut encoder,
                        KERNEL_COPY_U32,
                        &[src.buffer(i)?, dst.buffer(i)?],
                        words,
                        scope.as_ref(),
                    )?;
                }
                Ok(())
            })?
        })??;
        if let Some(scope) = &scope {
            app.resolve_timestamps(&mut encoder, scope);
        }
        app.submit_encoder(encoder);
        app.mark_device_written(output.handle())?;
        self.common.end_profile("copy", started, scope.as_ref())?;
        Ok(())
    }
}

impl ProcessBuild for CopyProcess {
    const KERNEL_SOURCES: &'static [(&'static str, &'static str)] =
        &[(COPY_SOURCE_NAME, SHADER_COPY_U32)];

    fn build(common: ProcessCommon) -> Self {
        Self { common }
    }
}
