// SPDX-License-Identifier: AGPL-3.0-only

//! GPU adapter discovery, trait filtering, and deterministic scoring.
//!
//! Runtime capability probing — no hardcoded GPU assumptions. The config
//! collaborator fills [`PlatformTraits`]/[`DeviceTraits`] (serde-ready);
//! selection then goes: environment override (`LARMOR_GPU_ADAPTER` by
//! index or case-insensitive name substring), explicit name trait, or
//! highest [`score`] among the trait-matching candidates. Scoring is a
//! pure function of queried device properties, so identical hardware
//! enumeration always ranks identically.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Requested device category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceKind {
    /// Any adapter type is acceptable.
    #[default]
    Any,
    Discrete,
    Integrated,
    /// Software rasterizer / CPU adapter (llvmpipe etc.).
    Cpu,
}

impl DeviceKind {
    fn matches(self, ty: wgpu::DeviceType) -> bool {
        match self {
            Self::Any => true,
            Self::Discrete => ty == wgpu::DeviceType::DiscreteGpu,
            Self::Integrated => ty == wgpu::DeviceType::IntegratedGpu,
            Self::Cpu => ty == wgpu::DeviceType::Cpu,
        }
    }
}

/// Platform-level selection: which wgpu backend family to instantiate.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PlatformTraits {
    /// Backend name: `vulkan`, `metal`, `dx12`, or empty for all.
    /// The `LARMOR_WGPU_BACKEND` environment variable overrides this.
    #[serde(default)]
    pub backend: String,
}

/// Device-level selection filters.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DeviceTraits {
    /// Adapter category filter.
    #[serde(default)]
    pub kind: DeviceKind,
    /// Case-insensitive name substring; when non-empty, scoring is skipped
    /// and the first matching adapter wins.
    #[serde(default)]
    pub name: String,
    /// PCI vendor id filter (0 = any).
    #[serde(default)]
    pub vendor: u32,
    /// Require `SHADER_F64` support.
    #[serde(default)]
    pub require_f64: bool,
    /// Require `TIMESTAMP_QUERY` support (for device-time profiling).
    #[serde(default)]
    pub require_timestamps: bool,
}

/// Properties of one enumerated adapter, captured once so scoring and
/// reporting are pure functions of a value rather than of driver calls.
#[derive(Debug, Clone)]
pub struct DeviceProfile {
    /// Enumeration index (stable within a single run).
    pub index: usize,
    /// Adapter name as reported by the driver.
    pub name: String,
    /// Driver name/version string.
    pub driver: String,
    /// PCI vendor id.
    pub vendor: u32,
    /// Adapter device type.
    pub device_type: wgpu::DeviceType,
    /// `SHADER_F64` support.
    pub has_f64: bool,
    /// `TIMESTAMP_QUERY` support.
    pub has_timestamps: bool,
    /// Max compute invocations per workgroup.
    pub max_invocations: u32,
    /// Max storage buffer binding size in bytes.
    pub max_storage_bytes: u64,
    /// Max buffer size in bytes.
    pub max_buffer_bytes: u64,
}

impl std::fmt::Display for DeviceProfile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let kind = match self.device_type {
            wgpu::DeviceType::DiscreteGpu => "discrete",
            wgpu::DeviceType::IntegratedGpu => "integrated",
            wgpu::DeviceType::VirtualGpu => "virtual",
            wgpu::DeviceType::Cpu => "cpu",
            wgpu::DeviceType::Other => "other",
        };
        let f64_tag = if self.has_f64 { "f64" } else { "f32" };
        write!(
            f,
            "[{}] {} ({}, {}, {}, score {})",
            self.index,
            self.name,
            self.driver,
            kind,
            f64_tag,
            score(self)
        )
    }
}

impl DeviceProfile {
    fn from_adapter(index: usize, adapter: &wgpu::Adapter) -> Self {
        let info = adapter.get_info();
        let features = adapter.features();
        let limits = adapter.limits();
        Self {
            index,
            name: info.name,
            driver: info.driver,
            vendor: info.vendor,
            device_type: info.device_type,
            has_f64: features.contains(wgpu::Features::SHADER_F64),
            has_timestamps: features.contains(wgpu::Features::TIMESTAMP_QUERY),
            max_invocations: limits.max_compute_invocations_per_workgroup,
            max_storage_bytes: u64::from(limits.max_storage_buffer_binding_size),
            max_buffer_bytes: limits.max_buffer_size,
        }
    }

    fn matches(&self, traits: &DeviceTraits) -> bool {
        if !traits.kind.matches(self.device_type) {
            return false;
        }
        if traits.vendor != 0 && traits.vendor != self.vendor {
            return false;
        }
        if traits.require_f64 && !self.has_f64 {
            return false;
        }
        if traits.require_timestamps && !self.has_timestamps {
            return false;
        }
        if !traits.name.is_empty()
            && !self
                .name
                .to_ascii_lowercase()
                .contains(&traits.name.to_ascii_lowercase())
        {
            return false;
        }
        true
    }
}

/// Rank a device. Pure integer arithmetic over captured properties —
/// deterministic for identical hardware enumeration.
///
/// wgpu exposes no clock rate or compute-unit count, so workgroup and
/// memory limits stand in: parallelism term × memory term, weighted by
/// adapter type, with small bonuses for f64 and timestamp support.
#[must_use]
pub fn score(profile: &DeviceProfile) -> u64 {
    let type_weight: u64 = match profile.device_type {
        wgpu::DeviceType::DiscreteGpu => 1000,
        wgpu::DeviceType::IntegratedGpu => 100,
        wgpu::DeviceType::VirtualGpu | wgpu::DeviceType::Other => 10,
        wgpu::DeviceType::Cpu => 1,
    };
    // log2 of buffer capacity keeps memory influence bounded.
    let mem_term = u64::from(64 - profile.max_buffer_bytes.max(1).leading_zeros());
    let parallel_term = u64::from(profile.max_invocations.max(1));
    let feature_bonus = u64::from(profile.has_f64) * 4 + u64::from(profile.has_timestamps);
    type_weight * parallel_term * mem_term + feature_bonus
}

/// Create a wgpu instance honoring `LARMOR_WGPU_BACKEND` then the
/// platform traits.
#[must_use]
pub fn create_instance(platform: &PlatformTraits) -> wgpu::Instance {
    let requested = std::env::var("LARMOR_WGPU_BACKEND").unwrap_or_else(|_| platform.backend.clone());
    let backends = match requested.trim().to_lowercase().as_str() {
        "vulkan" => wgpu::Backends::VULKAN,
        "metal" => wgpu::Backends::METAL,
        "dx12" => wgpu::Backends::DX12,
        _ => wgpu::Backends::all(),
    };
    wgpu::Instance::new(wgpu::InstanceDescriptor {
        backends,
        ..Default::default()
    })
}

/// Enumerate every adapter visible for the given platform traits.
#[must_use]
pub fn enumerate_profiles(platform: &PlatformTraits) -> Vec<DeviceProfile> {
    let instance = create_instance(platform);
    instance
        .enumerate_adapters(wgpu::Backends::all())
        .iter()
        .enumerate()
        .map(|(i, a)| DeviceProfile::from_adapter(i, a))
        .collect()
}

/// Select the adapter matching the requested traits.
///
/// Order: `LARMOR_GPU_ADAPTER` env override (index, then name substring),
/// then trait filtering with highest [`score`] winning ties-free.
///
/// # Errors
///
/// `Configuration` when no adapter exists or none matches the filters.
pub fn select_adapter(
    platform: &PlatformTraits,
    traits: &DeviceTraits,
) -> Result<(wgpu::Adapter, DeviceProfile)> {
    let instance = create_instance(platform);
    let adapters = instance.enumerate_adapters(wgpu::Backends::all());
    if adapters.is_empty() {
        return Err(Error::Configuration("no GPU adapter found".into()));
    }
    let profiles: Vec<DeviceProfile> = adapters
        .iter()
        .enumerate()
        .map(|(i, a)| DeviceProfile::from_adapter(i, a))
        .collect();

    let selector = std::env::var("LARMOR_GPU_ADAPTER")
        .unwrap_or_default()
        .trim()
        .to_lowercase();
    if !selector.is_empty() && selector != "auto" {
        return select_by_env(adapters, profiles, &selector);
    }

    let best = profiles
        .iter()
        .filter(|p| p.matches(traits))
        .max_by_key(|p| (score(p), std::cmp::Reverse(p.index)))
        .ok_or_else(|| {
            Error::Configuration(format!(
                "no adapter matches traits {traits:?} among {} enumerated",
                profiles.len()
            ))
        })?;
    let index = best.index;
    let profile = best.clone();
    let adapter = adapters
        .into_iter()
        .nth(index)
        .ok_or_else(|| Error::Configuration("adapter enumeration changed mid-selection".into()))?;
    Ok((adapter, profile))
}

fn select_by_env(
    adapters: Vec<wgpu::Adapter>,
    profiles: Vec<DeviceProfile>,
    selector: &str,
) -> Result<(wgpu::Adapter, DeviceProfile)> {
    let index = if let Ok(idx) = selector.parse::<usize>() {
        if idx >= profiles.len() {
            return Err(Error::Configuration(format!(
                "LARMOR_GPU_ADAPTER index {idx} out of range ({} adapters)",
                profiles.len()
            )));
        }
        idx
    } else {
        profiles
            .iter()
            .position(|p| p.name.to_ascii_lowercase().contains(selector))
            .ok_or_else(|| {
                Error::Configuration(format!("no adapter matching '{selector}'"))
            })?
    };
    let profile = profiles[index].clone();
    let adapter = adapters
        .into_iter()
        .nth(index)
        .ok_or_else(|| Error::Configuration("adapter enumeration changed mid-selection".into()))?;
    Ok((adapter, profile))
}

/// Print all visible adapters to stdout (device-info dump surface).
pub fn print_available_adapters(platform: &PlatformTraits) {
    let profiles = enumerate_profiles(platform);
    println!("  Available GPU adapters:");
    for p in &profiles {
        let marker = if p.has_f64 { "✓" } else { "✗" };
        println!("    {marker} {p}");
    }
    if profiles.is_empty() {
        println!("    (none found)");
    }
}
