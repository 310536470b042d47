//! Resource planning: pick a device class and a capacity budget once per run.
//!
//! The plan is resolved with strict precedence (explicit caller override →
//! existing environment override → hardware probe → fallback) and then
//! **published** exactly once: environment variables already set externally
//! are never overwritten, and the first plan published in a process wins for
//! every later run. This replaces ambient mutable global configuration with
//! one immutable value threaded explicitly through the pipeline.
//!
//! Hardware probing is deliberately fallible-but-recoverable: a probe that
//! errors or reports nothing falls back to `cpu` with a capacity budget of 1
//! and a warning. A missing GPU must never fail a conversion run.

use std::env;
use std::fmt;
use std::path::Path;
use std::process::Command;
use std::str::FromStr;

use once_cell::sync::OnceCell;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::{ConversionConfig, ENV_CAPACITY_BUDGET, ENV_DEVICE_MODE};
use crate::error::DocmillError;

/// Fixed capacity budget when no accelerator capacity can be determined.
const DEFAULT_CAPACITY_UNITS: u32 = 1;

static PUBLISHED: OnceCell<ResourcePlan> = OnceCell::new();

// ── Device class ─────────────────────────────────────────────────────────

/// Compute-accelerator category selected once per run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceClass {
    Cpu,
    Cuda,
    Mps,
    Npu,
}

impl DeviceClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeviceClass::Cpu => "cpu",
            DeviceClass::Cuda => "cuda",
            DeviceClass::Mps => "mps",
            DeviceClass::Npu => "npu",
        }
    }

    /// Whether this class has hardware-reported capacity worth probing.
    /// `mps` shares host memory, so it uses the fixed default like `cpu`.
    fn has_probed_capacity(&self) -> bool {
        matches!(self, DeviceClass::Cuda | DeviceClass::Npu)
    }
}

impl fmt::Display for DeviceClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DeviceClass {
    type Err = DocmillError;

    /// Accepts an optional ordinal suffix (`cuda:0` → `Cuda`), matching the
    /// device strings accelerator runtimes hand out.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let base = s.split(':').next().unwrap_or(s);
        match base {
            "cpu" => Ok(DeviceClass::Cpu),
            "cuda" => Ok(DeviceClass::Cuda),
            "mps" => Ok(DeviceClass::Mps),
            "npu" => Ok(DeviceClass::Npu),
            other => Err(DocmillError::InvalidConfig(format!(
                "unknown device class '{other}' (expected cpu, cuda, mps, or npu)"
            ))),
        }
    }
}

// ── Probe seam ───────────────────────────────────────────────────────────

/// Hardware probe used when neither the caller nor the environment chose a
/// device. A trait so tests can inject fixed answers; every failure mode is
/// expressed as a fallback value, never an error.
pub trait DeviceProbe: Send + Sync {
    /// Detect the best available device class, in order: primary GPU class
    /// (`cuda`), alternate accelerators (`mps`, `npu`), else `cpu`.
    fn detect(&self) -> DeviceClass;

    /// Hardware-reported capacity in budget units for an accelerator, or
    /// `None` when it cannot be determined.
    fn capacity_units(&self, device: DeviceClass) -> Option<u32>;
}

/// Probe backed by device nodes and vendor tooling on the host.
#[derive(Debug, Default)]
pub struct SystemProbe;

impl DeviceProbe for SystemProbe {
    fn detect(&self) -> DeviceClass {
        if Path::new("/dev/nvidia0").exists() || nvidia_smi_total_mib().is_some() {
            return DeviceClass::Cuda;
        }
        if cfg!(target_os = "macos") {
            return DeviceClass::Mps;
        }
        if Path::new("/dev/davinci0").exists() {
            return DeviceClass::Npu;
        }
        DeviceClass::Cpu
    }

    fn capacity_units(&self, device: DeviceClass) -> Option<u32> {
        match device {
            DeviceClass::Cuda => {
                // One unit per GiB of device memory, floor 1.
                nvidia_smi_total_mib().map(|mib| ((mib as f64 / 1024.0).round() as u32).max(1))
            }
            _ => None,
        }
    }
}

/// Total device memory in MiB according to `nvidia-smi`, if present.
fn nvidia_smi_total_mib() -> Option<u64> {
    let output = Command::new("nvidia-smi")
        .args(["--query-gpu=memory.total", "--format=csv,noheader,nounits"])
        .output()
        .ok()?;
    if !output.status.success() {
        return None;
    }
    String::from_utf8_lossy(&output.stdout)
        .lines()
        .next()?
        .trim()
        .parse()
        .ok()
}

// ── Resource plan ────────────────────────────────────────────────────────

/// The resolved, immutable `{device_class, capacity_budget}` pair.
///
/// Created once per run via [`ResourcePlan::resolve`], then published with
/// [`ResourcePlan::publish`]. Consumed, never mutated, by the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourcePlan {
    pub device: DeviceClass,
    pub capacity_budget: u32,
}

impl ResourcePlan {
    /// Resolve a plan from config, environment, and hardware probe.
    pub fn resolve(config: &ConversionConfig, probe: &dyn DeviceProbe) -> Self {
        Self::resolve_from_parts(
            config.device_mode,
            env::var(ENV_DEVICE_MODE).ok().as_deref(),
            config.capacity_budget,
            env::var(ENV_CAPACITY_BUDGET).ok().as_deref(),
            probe,
        )
    }

    /// Pure resolution core, separated from environment access for tests.
    ///
    /// Device precedence: explicit override → env override → probe.
    /// Capacity precedence: explicit override → env override →
    /// hardware-reported (accelerators only) → fixed default of 1.
    fn resolve_from_parts(
        device_override: Option<DeviceClass>,
        env_device: Option<&str>,
        capacity_override: Option<u32>,
        env_capacity: Option<&str>,
        probe: &dyn DeviceProbe,
    ) -> Self {
        let device = device_override
            .or_else(|| {
                env_device.and_then(|raw| match raw.parse() {
                    Ok(d) => Some(d),
                    Err(e) => {
                        warn!("ignoring {ENV_DEVICE_MODE}={raw}: {e}");
                        None
                    }
                })
            })
            .unwrap_or_else(|| probe.detect());

        let capacity_budget = capacity_override
            .or_else(|| {
                env_capacity.and_then(|raw| match raw.parse::<u32>() {
                    Ok(n) if n >= 1 => Some(n),
                    _ => {
                        warn!("ignoring {ENV_CAPACITY_BUDGET}={raw}: not a positive integer");
                        None
                    }
                })
            })
            .unwrap_or_else(|| {
                if device.has_probed_capacity() {
                    probe.capacity_units(device).unwrap_or_else(|| {
                        warn!(
                            "capacity probe for {device} failed; \
                             falling back to {DEFAULT_CAPACITY_UNITS} unit"
                        );
                        DEFAULT_CAPACITY_UNITS
                    })
                } else {
                    DEFAULT_CAPACITY_UNITS
                }
            });

        debug!("resolved resource plan: device={device} capacity={capacity_budget}");
        Self {
            device,
            capacity_budget,
        }
    }

    /// Publish this plan for the process: set-if-absent.
    ///
    /// Environment variables already present externally are left untouched,
    /// and the first plan published wins for the lifetime of the process.
    /// Returns the plan actually in effect, which later runs must consume.
    pub fn publish(self) -> ResourcePlan {
        if env::var(ENV_DEVICE_MODE).is_err() {
            env::set_var(ENV_DEVICE_MODE, self.device.as_str());
        }
        if env::var(ENV_CAPACITY_BUDGET).is_err() {
            env::set_var(ENV_CAPACITY_BUDGET, self.capacity_budget.to_string());
        }

        let published = *PUBLISHED.get_or_init(|| self);
        if published != self {
            warn!(
                "resource plan already published as {published:?}; \
                 keeping it instead of {self:?}"
            );
        }
        published
    }
}
