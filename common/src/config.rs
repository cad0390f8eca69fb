use std::{collections::HashMap, path::PathBuf, time::Duration};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

/// Largest exponent count whose top magnitude, `10^(K-1)`, still fits in a `u64`.
pub const MAX_WORKLOAD_EXPONENTS: u32 = 20;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Program under test, launched once per rank
    pub program: String,
    /// Arguments placed before the positional `cluster_size rank workload` triple
    pub args: Vec<String>,
    pub env: HashMap<String, String>,
    pub min_cluster_size: u32,
    pub max_cluster_size: u32,
    /// Run the minimum cluster size once on its own before the main range
    pub baseline_repeat: bool,
    pub workload_exponents: u32,
    pub startup_delay_ms: u64,
    pub cooldown_ms: u64,
    pub termination_grace_ms: u64,
    pub leader_timeout_ms: Option<u64>,
    pub max_attempts: Option<usize>,
    pub results_file: PathBuf,
    pub info_file: PathBuf,
    pub plot_file: PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            program: "./target/release/eval".to_owned(),
            args: Vec::new(),
            env: HashMap::new(),
            min_cluster_size: 2,
            max_cluster_size: 8,
            baseline_repeat: true,
            workload_exponents: 7,
            startup_delay_ms: 500,
            cooldown_ms: 3000,
            termination_grace_ms: 1000,
            leader_timeout_ms: None,
            max_attempts: None,
            results_file: PathBuf::from("results.txt"),
            info_file: PathBuf::from("info.json"),
            plot_file: PathBuf::from("scaling.png"),
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("min_cluster_size must be at least 2, got {0}")]
    ClusterTooSmall(u32),
    #[error("max_cluster_size {max} is below min_cluster_size {min}")]
    EmptyClusterRange { min: u32, max: u32 },
    #[error("workload_exponents must be between 1 and {max}, got {0}", max = MAX_WORKLOAD_EXPONENTS)]
    WorkloadExponents(u32),
    #[error("max_attempts must be at least 1")]
    ZeroAttempts,
    #[error("program must not be empty")]
    MissingProgram,
}

impl Config {
    /// Parses a YAML document. An empty document yields the defaults.
    pub fn from_yaml(yaml: &str) -> eyre::Result<Self> {
        if yaml.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_yml::from_str(yaml)?)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.program.trim().is_empty() {
            return Err(ConfigError::MissingProgram);
        }
        if self.min_cluster_size < 2 {
            return Err(ConfigError::ClusterTooSmall(self.min_cluster_size));
        }
        if self.max_cluster_size < self.min_cluster_size {
            return Err(ConfigError::EmptyClusterRange {
                min: self.min_cluster_size,
                max: self.max_cluster_size,
            });
        }
        if self.workload_exponents == 0 || self.workload_exponents > MAX_WORKLOAD_EXPONENTS {
            return Err(ConfigError::WorkloadExponents(self.workload_exponents));
        }
        if self.max_attempts == Some(0) {
            return Err(ConfigError::ZeroAttempts);
        }
        if self.cooldown_ms < self.startup_delay_ms {
            warn!(
                "cooldown_ms={} is shorter than startup_delay_ms={}, lingering followers may collide with the next attempt",
                self.cooldown_ms,
                self.startup_delay_ms
            );
        }
        Ok(())
    }

    pub fn startup_delay(&self) -> Duration {
        Duration::from_millis(self.startup_delay_ms)
    }

    pub fn cooldown(&self) -> Duration {
        Duration::from_millis(self.cooldown_ms)
    }

    pub fn termination_grace(&self) -> Duration {
        Duration::from_millis(self.termination_grace_ms)
    }

    pub fn leader_timeout(&self) -> Option<Duration> {
        self.leader_timeout_ms.map(Duration::from_millis)
    }
}
