//! Run configuration from `CGBENCH_*` environment variables and the first
//! positional argument.

use crate::error::{BenchError, Result};
use cgbench_core::{DeviceClass, KernelSource};
use cgbench_solver::{FixedPolicy, PolicyCache, PolicySource, ProblemClass, StaticRegionModel};
use std::path::{Path, PathBuf};

/// File whose presence in the working directory enables section timers.
pub const TIMER_FLAG_FILE: &str = "timer.flag";

/// Where the per-iteration reduction and normalization run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceChoice {
    Host,
    /// Offload to an adapter of the given class; `required` makes a missing
    /// adapter fatal instead of falling back to the host.
    Offload { class: DeviceClass, required: bool },
}

impl DeviceChoice {
    fn parse(value: &str) -> Result<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "host" => Ok(DeviceChoice::Host),
            "auto" | "" => Ok(DeviceChoice::Offload {
                class: DeviceClass::Any,
                required: false,
            }),
            other => {
                let class: DeviceClass = other
                    .parse()
                    .map_err(|_| BenchError::Config(format!("unknown device '{}'", value)))?;
                Ok(DeviceChoice::Offload {
                    class,
                    required: class != DeviceClass::Any,
                })
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct BenchConfig {
    pub class: ProblemClass,
    pub device: DeviceChoice,
    pub kernel_source: KernelSource,
    pub threads: Option<usize>,
    pub policy_model: Option<String>,
    pub strict_verify: bool,
    pub json_report: Option<PathBuf>,
    pub timers_enabled: bool,
}

impl BenchConfig {
    /// Reads the process environment and arguments.
    pub fn from_env() -> Result<Self> {
        let args: Vec<String> = std::env::args().skip(1).collect();
        let mut config = Self::from_lookup(&args, |key| std::env::var(key).ok())?;
        config.timers_enabled = Path::new(TIMER_FLAG_FILE).exists();
        Ok(config)
    }

    pub fn from_lookup<F>(args: &[String], lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let class = match args.first().cloned().or_else(|| lookup("CGBENCH_CLASS")) {
            Some(letter) => letter.parse::<ProblemClass>()?,
            None => ProblemClass::S,
        };
        let device = match lookup("CGBENCH_DEVICE") {
            Some(value) => DeviceChoice::parse(&value)?,
            None => DeviceChoice::parse("auto")?,
        };
        let kernel_source = lookup("CGBENCH_KERNEL_DIR")
            .filter(|dir| !dir.trim().is_empty())
            .map_or(KernelSource::Embedded, |dir| {
                KernelSource::Directory(PathBuf::from(dir))
            });
        let threads = match lookup("CGBENCH_THREADS") {
            Some(value) => {
                let n: usize = value.trim().parse().map_err(|_| {
                    BenchError::Config(format!("CGBENCH_THREADS '{}' is not a number", value))
                })?;
                (n > 0).then_some(n)
            }
            None => None,
        };
        let strict_verify = lookup("CGBENCH_STRICT_VERIFY")
            .is_some_and(|v| !matches!(v.trim(), "" | "0" | "false" | "off"));

        Ok(Self {
            class,
            device,
            kernel_source,
            threads,
            policy_model: lookup("CGBENCH_POLICY_MODEL").filter(|m| !m.trim().is_empty()),
            strict_verify,
            json_report: lookup("CGBENCH_JSON_REPORT").map(PathBuf::from),
            timers_enabled: false,
        })
    }

    /// Policy cache for the host parallel regions.
    pub fn policy_cache(&self) -> Result<PolicyCache> {
        let source: Box<dyn PolicySource> = match &self.policy_model {
            Some(model) => Box::new(StaticRegionModel::parse(model)?),
            None => Box::new(FixedPolicy::default()),
        };
        Ok(PolicyCache::new(source, self.threads))
    }
}
