// SPDX-License-Identifier: AGPL-3.0-only

//! Stage chaining with automatic collection wiring.
//!
//! A composite owns an ordered list of boxed stages and presents itself
//! as one `Process`. At `init` it threads collections through the chain:
//! the composite's input feeds the first stage, in-place stages pass
//! their collection straight through, and each out-of-place stage gets
//! either the composite's output (when it is the last such stage) or a
//! freshly registered intermediate cloned from the current shape.
//! Intermediates stay registered for the composite's lifetime so
//! re-launches reuse them.

use std::sync::Arc;

use crate::app::App;
use crate::error::{Error, Result};

use super::{shared, Process, ProcessCommon, ProfileParams, SharedCollection};

/// Run several stages as one, wiring intermediate collections.
pub struct CompositeProcess {
    common: ProcessCommon,
    stages: Vec<Box<dyn Process>>,
    intermediates: Vec<SharedCollection>,
}

impl CompositeProcess {
    /// An empty composite bound to an app. Composites carry no kernels
    /// of their own, so there is no factory registration step.
    #[must_use]
    pub fn new(app: &Arc<App>, profile: ProfileParams) -> Self {
        Self {
            common: ProcessCommon::new(Arc::clone(app), profile),
            stages: Vec::new(),
            intermediates: Vec::new(),
        }
    }

    /// Append a stage; order of addition is launch order.
    pub fn push(&mut self, stage: Box<dyn Process>) {
        self.stages.push(stage);
    }

    /// Number of chained stages.
    #[must_use]
    pub fn len(&self) -> usize {
        self.stages.len()
    }

    /// True when no stage was added yet.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    fn drop_intermediates(&mut self) -> Result<()> {
        let app = Arc::clone(self.common.app());
        for collection in self.intermediates.drain(..) {
            app.del_data(&mut collection.borrow_mut())?;
        }
        Ok(())
    }
}

impl Drop for CompositeProcess {
    fn drop(&mut self) {
        // Intermediates outlive init/launch cycles but not the composite.
        let _ = self.drop_intermediates();
    }
}

impl Process for CompositeProcess {
    fn common(&self) -> &ProcessCommon {
        &self.common
    }

    fn common_mut(&mut self) -> &mut ProcessCommon {
        &mut self.common
    }

    fn init(&mut self) -> Result<()> {
        if self.stages.is_empty() {
            return Err(Error::InvalidArgument("composite has no stages".into()));
        }
        // Re-init rebuilds the wiring from scratch.
        self.drop_intermediates()?;

        let app = Arc::clone(self.common.app());
        let output = self.common.output()?.clone();
        let last_writer = self
            .stages
            .iter()
            .rposition(|s| !s.is_in_place())
            .ok_or_else(|| {
                Error::InvalidArgument(
                    "composite of only in-place stages cannot fill its output".into(),
                )
            })?;

        let mut current = Arc::clone(self.common.input()?);
        for (i, stage) in self.stages.iter_mut().enumerate() {
            stage.set_input(Arc::clone(&current));
            // In-place stages pass their collection straight through.
            if !stage.is_in_place() {
                if i == last_writer {
                    stage.set_output(Arc::clone(&output));
                    current = Arc::clone(&output);
                } else {
                    let mut mid = current.borrow().clone_shape();
                    app.add_data(&mut mid, false)?;
                    let mid = shared(mid);
                    stage.set_output(Arc::clone(&mid));
                    self.intermediates.push(Arc::clone(&mid));
                    current = mid;
                }
            }
            stage.init()?;
        }
        self.common.mark_initialized();
        Ok(())
    }

    fn launch(&mut self) -> Result<()> {
        self.common.begin_launch()?;
        for stage in &mut self.stages {
            stage.launch()?;
        }
        Ok(())
    }
}
