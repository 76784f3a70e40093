use itertools::Itertools;
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Environment variable listing the logical CPUs the CPU device may use, e.g. `0,2-3`.
pub const ENV_CPU_LIST: &str = "WEFT_CPU_LIST";
/// Environment variable naming the default device.
pub const ENV_DEFAULT_DEVICE: &str = "WEFT_DEFAULT_DEVICE";

/// Process-wide runtime configuration, read once at initialization.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct RuntimeConfig {
    /// Logical CPUs available to the CPU device. `None` uses every online CPU.
    pub cpu_list: Option<Vec<usize>>,
    /// Device selected for graphs that do not name one.
    pub default_device: String,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            cpu_list: None,
            default_device: crate::device::cpu::CPU_DEVICE.to_owned(),
        }
    }
}

impl RuntimeConfig {
    /// Reads [`ENV_CPU_LIST`] and [`ENV_DEFAULT_DEVICE`] on top of the defaults.
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();
        if let Ok(list) = std::env::var(ENV_CPU_LIST) {
            log::info!("{ENV_CPU_LIST}: [{list}]");
            config.cpu_list = Some(parse_cpu_list(&list)?);
        }
        if let Ok(device) = std::env::var(ENV_DEFAULT_DEVICE) {
            config.default_device = device;
        }
        Ok(config)
    }

    /// Number of worker threads the CPU device should run.
    pub fn cpu_workers(&self) -> usize {
        match &self.cpu_list {
            Some(list) => list.len().max(1),
            None => std::thread::available_parallelism().map_or(1, usize::from),
        }
    }
}

/// Parses a comma separated list of CPU ids and inclusive ranges (`0,2-3`).
/// The result is sorted and free of duplicates.
pub fn parse_cpu_list(list: &str) -> Result<Vec<usize>> {
    let parse = |x: &str| {
        x.trim()
            .parse::<usize>()
            .map_err(|_| Error::Config(format!("bad cpu id {x:?} in {list:?}")))
    };
    let mut cpus = vec![];
    for item in list.split(',').map(str::trim).filter(|x| !x.is_empty()) {
        match item.split_once('-') {
            Some((start, end)) => {
                let (start, end) = (parse(start)?, parse(end)?);
                if start > end {
                    return Err(Error::Config(format!("bad cpu range {item:?}")));
                }
                cpus.extend(start..=end);
            }
            None => cpus.push(parse(item)?),
        }
    }
    if cpus.is_empty() {
        return Err(Error::Config(format!("empty cpu list {list:?}")));
    }
    Ok(cpus.into_iter().sorted().dedup().collect())
}
