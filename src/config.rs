//! TOML configuration for sumbench.
//!
//! Every section has compiled-in defaults, so an empty file (or no file at all)
//! is a valid configuration. Command-line flags are applied on top by `main`.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::accel::opencl::{KernelVariant, DEFAULT_WORK_GROUP_SIZES};
use crate::bench::{OpenClMatrix, TimingConfig};
use crate::dataset::{DEFAULT_ELEMENTS, DEFAULT_FILL};

/// Environment variable naming a config file.
pub const CONFIG_ENV: &str = "SUMBENCH_CONFIG";

/// Config file picked up from the working directory.
pub const LOCAL_CONFIG: &str = "sumbench.toml";

// ---------------------------------------------------------------------------
// Top-level config
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BenchConfig {
    #[serde(default)]
    pub workload: WorkloadConfig,
    #[serde(default)]
    pub timing: TimingSection,
    #[serde(default)]
    pub opencl: OpenClSection,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl BenchConfig {
    /// Load configuration from a TOML file at `path`.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file: {}", path.display()))?;
        let config: Self = toml::from_str(&content)
            .with_context(|| format!("failed to parse config file: {}", path.display()))?;
        config
            .validate()
            .with_context(|| format!("invalid config file: {}", path.display()))?;
        info!(path = %path.display(), "loaded sumbench configuration");
        Ok(config)
    }

    /// Resolve the configuration, in order:
    /// 1. `explicit` (from `--config`); failing to load it is an error.
    /// 2. The path in the `SUMBENCH_CONFIG` environment variable.
    /// 3. `./sumbench.toml`.
    /// 4. Compiled-in defaults.
    pub fn resolve(explicit: Option<&Path>) -> Result<Self> {
        if let Some(path) = explicit {
            return Self::load(path);
        }

        if let Ok(env_path) = std::env::var(CONFIG_ENV) {
            let path = PathBuf::from(env_path);
            match Self::load(&path) {
                Ok(cfg) => return Ok(cfg),
                Err(e) => {
                    warn!(
                        path = %path.display(),
                        error = %e,
                        "SUMBENCH_CONFIG set but file could not be loaded, trying fallback"
                    );
                }
            }
        }

        let local = Path::new(LOCAL_CONFIG);
        if local.exists() {
            return Self::load(local);
        }

        debug!("no config file found, using compiled-in defaults");
        Ok(Self::default())
    }

    pub fn validate(&self) -> Result<()> {
        if self.workload.elements == 0 {
            bail!("workload.elements must be at least 1");
        }
        if !self.workload.fill.is_finite() || self.workload.fill == 0.0 {
            bail!("workload.fill must be finite and non-zero");
        }
        if self.timing.repetitions == 0 {
            bail!("timing.repetitions must be at least 1");
        }
        if self.timing.threads == 0 {
            bail!("timing.threads must be at least 1");
        }
        if self.timing.max_iterations == 0 {
            bail!("timing.max_iterations must be at least 1");
        }
        if let Some(bad) = self.opencl.work_group_sizes.iter().find(|s| !s.is_power_of_two()) {
            bail!("opencl.work_group_sizes: {} is not a power of two", bad);
        }
        Ok(())
    }

    pub fn timing_config(&self) -> TimingConfig {
        TimingConfig {
            min_time: Duration::from_millis(self.timing.min_time_ms),
            repetitions: self.timing.repetitions,
            threads: self.timing.threads,
            max_iterations: self.timing.max_iterations,
        }
    }

    pub fn opencl_matrix(&self) -> OpenClMatrix {
        OpenClMatrix {
            kernels: self.opencl.kernels.clone(),
            work_group_sizes: self.opencl.work_group_sizes.clone(),
        }
    }
}

// ---------------------------------------------------------------------------
// Sections
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkloadConfig {
    /// Number of f32 values to sum.
    pub elements: usize,
    /// Value every element is set to.
    pub fill: f32,
}

impl Default for WorkloadConfig {
    fn default() -> Self {
        Self {
            elements: DEFAULT_ELEMENTS,
            fill: DEFAULT_FILL,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimingSection {
    pub min_time_ms: u64,
    pub repetitions: u32,
    pub threads: usize,
    pub max_iterations: u64,
}

impl Default for TimingSection {
    fn default() -> Self {
        let defaults = TimingConfig::default();
        Self {
            min_time_ms: defaults.min_time.as_millis() as u64,
            repetitions: defaults.repetitions,
            threads: defaults.threads,
            max_iterations: defaults.max_iterations,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OpenClSection {
    /// Kernels enumerated for every device, e.g. `["reduce_tree"]`.
    pub kernels: Vec<KernelVariant>,
    /// Work-group sizes enumerated for every device and kernel.
    pub work_group_sizes: Vec<usize>,
}

impl Default for OpenClSection {
    fn default() -> Self {
        Self {
            kernels: KernelVariant::ALL.to_vec(),
            work_group_sizes: DEFAULT_WORK_GROUP_SIZES.to_vec(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default filter directive when `RUST_LOG` is unset.
    pub level: String,
    /// Emit log lines as JSON.
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}
