use std::{fmt, ops::Range};

use itertools::iproduct;
use serde::{Deserialize, Serialize};

use crate::config::Config;

/// One point of the sweep grid
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TrialParams {
    pub cluster_size: u32,
    pub workload_magnitude: u64,
}

impl TrialParams {
    pub fn new(cluster_size: u32, workload_magnitude: u64) -> Self {
        Self {
            cluster_size,
            workload_magnitude,
        }
    }

    pub fn follower_ranks(&self) -> Range<u32> {
        1..self.cluster_size
    }

    pub fn invocation(&self, role: Role) -> Invocation {
        Invocation { params: *self, role }
    }
}

impl fmt::Display for TrialParams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "cluster_size={} workload={}",
            self.cluster_size, self.workload_magnitude
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    Leader,
    Follower(u32),
}

impl Role {
    pub fn rank(&self) -> u32 {
        match *self {
            Role::Leader => 0,
            Role::Follower(rank) => rank,
        }
    }
}

/// A single process launch: which trial, which rank
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Invocation {
    pub params: TrialParams,
    pub role: Role,
}

impl Invocation {
    /// Positional arguments handed to the program under test
    pub fn args(&self) -> [String; 3] {
        [
            self.params.cluster_size.to_string(),
            self.role.rank().to_string(),
            self.params.workload_magnitude.to_string(),
        ]
    }
}

/// `10^0, 10^1, .., 10^(count-1)`
pub fn powers_of_ten(count: u32) -> impl Iterator<Item = u64> {
    (0..count).map(|exp| 10u64.pow(exp))
}

/// Which pass over the cluster sizes a grid point belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Pass {
    /// Standalone sanity run of the minimum cluster size
    Baseline,
    Main,
}

/// Cartesian sweep grid, cluster size major.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Grid {
    min_cluster_size: u32,
    max_cluster_size: u32,
    baseline_repeat: bool,
    workload_magnitudes: Vec<u64>,
}

impl Grid {
    pub fn new(
        min_cluster_size: u32,
        max_cluster_size: u32,
        baseline_repeat: bool,
        workload_exponents: u32,
    ) -> Self {
        Self {
            min_cluster_size,
            max_cluster_size,
            baseline_repeat,
            workload_magnitudes: powers_of_ten(workload_exponents).collect(),
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(
            config.min_cluster_size,
            config.max_cluster_size,
            config.baseline_repeat,
            config.workload_exponents,
        )
    }

    fn passes(&self) -> impl Iterator<Item = (Pass, u32)> + '_ {
        self.baseline_repeat
            .then_some(self.min_cluster_size)
            .into_iter()
            .map(|n| (Pass::Baseline, n))
            .chain((self.min_cluster_size..=self.max_cluster_size).map(|n| (Pass::Main, n)))
    }

    /// Cluster sizes in sweep order, the baseline included
    pub fn cluster_sizes(&self) -> Vec<u32> {
        self.passes().map(|(_, n)| n).collect()
    }

    pub fn workload_magnitudes(&self) -> &[u64] {
        &self.workload_magnitudes
    }

    pub fn len(&self) -> usize {
        self.passes().count() * self.workload_magnitudes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Lazily yields every grid point in sweep order, tagged with its pass
    pub fn iter_passes(&self) -> impl Iterator<Item = (Pass, TrialParams)> + '_ {
        iproduct!(self.passes(), self.workload_magnitudes.iter().copied()).map(
            |((pass, cluster_size), workload_magnitude)| {
                (pass, TrialParams::new(cluster_size, workload_magnitude))
            },
        )
    }

    pub fn iter(&self) -> impl Iterator<Item = TrialParams> + '_ {
        self.iter_passes().map(|(_, params)| params)
    }
}
