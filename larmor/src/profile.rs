// SPDX-License-Identifier: AGPL-3.0-only

//! Profiling sample collection.
//!
//! Profiled launches append one [`KernelSample`] per kernel to an
//! externally owned [`SampleLog`] — the reporting collaborator decides
//! what to do with the statistics. Disabled by default because reading
//! device timestamps forces a synchronization on the hot path.

/// One profiled kernel launch.
#[derive(Debug, Clone)]
pub struct KernelSample {
    /// Stage or kernel label.
    pub label: String,
    /// Combined host + device wall time for the launch, milliseconds.
    pub host_ms: f64,
    /// Device execution time from timestamp queries, when the queue
    /// supports timing.
    pub device_ms: Option<f64>,
}

/// Append-only collection of profiling samples with summary statistics.
#[derive(Debug, Default)]
pub struct SampleLog {
    samples: Vec<KernelSample>,
}

impl SampleLog {
    /// Append one sample.
    pub fn push(&mut self, sample: KernelSample) {
        self.samples.push(sample);
    }

    /// All samples, in append order.
    #[must_use]
    pub fn samples(&self) -> &[KernelSample] {
        &self.samples
    }

    /// Number of samples.
    #[must_use]
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    /// True when nothing was recorded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// (mean, min, max) of host wall times in milliseconds, `None` when
    /// empty.
    #[must_use]
    pub fn host_stats_ms(&self) -> Option<(f64, f64, f64)> {
        stats(self.samples.iter().map(|s| s.host_ms))
    }

    /// (mean, min, max) of device times in milliseconds over the samples
    /// that have one.
    #[must_use]
    pub fn device_stats_ms(&self) -> Option<(f64, f64, f64)> {
        stats(self.samples.iter().filter_map(|s| s.device_ms))
    }

    /// Print a named-value summary to stdout.
    pub fn print_summary(&self, title: &str) {
        println!("  {} — {} samples", title, self.samples.len());
        if let Some((mean, min, max)) = self.host_stats_ms() {
            println!("    host ms: mean {mean:.3}, min {min:.3}, max {max:.3}");
        }
        if let Some((mean, min, max)) = self.device_stats_ms() {
            println!("    device ms: mean {mean:.3}, min {min:.3}, max {max:.3}");
        }
    }
}

fn stats(values: impl Iterator<Item = f64>) -> Option<(f64, f64, f64)> {
    let mut n = 0usize;
    let mut sum = 0.0_f64;
    let mut min = f64::INFINITY;
    let mut max = f64::NEG_INFINITY;
    for v in values {
        n += 1;
        sum += v;
        min = min.min(v);
        max = max.max(v);
    }
    if n == 0 {
        None
    } else {
        Some((sum / n as f64, min, max))
    }
}
