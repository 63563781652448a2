// SPDX-License-Identifier: AGPL-3.0-only

//! In-place scalar multiply over a device-resident collection.
//!
//! Operates on its input only (`is_in_place`), so inside a composite it
//! passes its collection straight through to the next stage. The factor
//! is uploaded at every launch, which makes the re-init/re-launch loop
//! cheap: `set_factor` then `launch` again, no new pipeline work.

use std::sync::Arc;

use num_complex::Complex32;

use crate::array::ElemType;
use crate::error::{Error, Result};
use crate::shaders::{
    KERNEL_SCALE_C32, KERNEL_SCALE_F32, SCALE_C32_SOURCE_NAME, SCALE_F32_SOURCE_NAME,
    SHADER_SCALE_C32, SHADER_SCALE_F32,
};

use super::{Process, ProcessBuild, ProcessCommon};

/// Multiply every element of the input collection by a scalar factor.
pub struct ScaleProcess {
    common: ProcessCommon,
    factor: Complex32,
    params: Option<wgpu::Buffer>,
}

impl ScaleProcess {
    /// Factor applied at the next launch.
    #[must_use]
    pub const fn factor(&self) -> Complex32 {
        self.factor
    }

    /// Set a real factor (imaginary part zero).
    pub fn set_factor(&mut self, factor: f32) {
        self.factor = Complex32::new(factor, 0.0);
    }

    /// Set a complex factor; only meaningful for `C32` collections.
    pub fn set_factor_complex(&mut self, factor: Complex32) {
        self.factor = factor;
    }

    fn kernel_for(elem: ElemType) -> Result<&'static str> {
        match elem {
            ElemType::F32 => Ok(KERNEL_SCALE_F32),
            ElemType::C32 => Ok(KERNEL_SCALE_C32),
            ElemType::F64 => Err(Error::InvalidArgument(
                "scale has no f64 kernel variant".into(),
            )),
        }
    }
}

impl Process for ScaleProcess {
    fn common(&self) -> &ProcessCommon {
        &self.common
    }

    fn common_mut(&mut self) -> &mut ProcessCommon {
        &mut self.common
    }

    fn is_in_place(&self) -> bool {
        true
    }

    fn init(&mut self) -> Result<()> {
        let app = Arc::clone(self.common.app());
        let input = Arc::clone(self.common.input()?);
        let input = input.borrow();

        app.buffer_count(input.handle())?;
        input.require_uniform()?;
        Self::kernel_for(input.elem_type())?;

        if self.params.is_none() {
            self.params = Some(app.device().create_buffer(&wgpu::BufferDescriptor {
                label: Some("scale-params"),
                size: 8,
                usage: wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_DST,
                mapped_at_creation: false,
            }));
        }

        self.common.mark_initialized();
        Ok(())
    }

    fn launch(&mut self) -> Result<()> {
        self.common.begin_launch()?;
        let app = Arc::clone(self.common.app());
        let input = Arc::clone(self.common.input()?);
        let input = input.borrow();

        let kernel = Self::kernel_for(input.elem_type())?;
        let params = self
            .params
            .as_ref()
            .ok_or_else(|| Error::Launch("scale params buffer missing after init".into()))?;
        let factor = [self.factor.re, self.factor.im];
        app.queue().write_buffer(params, 0, bytemuck::cast_slice(&factor));

        let (started, scope) = self.common.begin_profile();
        let mut encoder = app.begin_encoder("scale");
        app.with_buffer_state(input.handle(), |state| -> Result<()> {
            for (i, array) in input.arrays().iter().enumerate() {
                app.encode_kernel(
                    &mut encoder,
                    kernel,
                    &[params, state.buffer(i)?],
                    array.len() as u64,
                    scope.as_ref(),
                )?;
            }
            Ok(())
        })??;
        if let Some(scope) = &scope {
            app.resolve_timestamps(&mut encoder, scope);
        }
        app.submit_encoder(encoder);
        app.mark_device_written(input.handle())?;
        self.common.end_profile("scale", started, scope.as_ref())?;
        Ok(())
    }
}

impl ProcessBuild for ScaleProcess {
    const KERNEL_SOURCES: &'static [(&'static str, &'static str)] = &[
        (SCALE_F32_SOURCE_NAME, SHADER_SCALE_F32),
        (SCALE_C32_SOURCE_NAME, SHADER_SCALE_C32),
    ];

    fn build(common: ProcessCommon) -> Self {
        Self {
            common,
            factor: Complex32::new(1.0, 0.0),
            params: None,
        }
    }
}
