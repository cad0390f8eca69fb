use std::path::PathBuf;

use chrono::Local;
use common::{
    config::Config,
    grid::{Grid, Pass, TrialParams},
    launcher::ProcessLauncher,
    readiness::FixedDelay,
    record::{ResultRecord, append_record},
    sweep::{AttemptFailure, RetryPolicy, Sweep, SweepObserver},
};
use eyre::Result;
use indicatif::{ProgressBar, ProgressStyle};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

/// Bookkeeping written next to the results after every grid point
#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
pub struct SweepInfo {
    pub started: String,
    pub program: String,
    pub trials: Vec<TrialInfo>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrialInfo {
    pub cluster_size: u32,
    pub workload_magnitude: u64,
    /// Leader stdout as recorded
    pub elapsed: String,
    pub pass: Pass,
    pub attempts: usize,
    pub finished: String,
}

/// Prints each record, appends it to the results file and keeps `info.json` current.
/// Baseline records stay out of the results file so every plotted series has one
/// point per workload.
pub struct ResultWriter {
    results_file: PathBuf,
    info_file: PathBuf,
    info: SweepInfo,
    progress: ProgressBar,
}

impl ResultWriter {
    pub fn new(config: &Config, progress: ProgressBar) -> Self {
        Self {
            results_file: config.results_file.clone(),
            info_file: config.info_file.clone(),
            info: SweepInfo {
                started: Local::now().to_rfc3339(),
                program: config.program.clone(),
                trials: Vec::new(),
            },
            progress,
        }
    }

    pub fn info(&self) -> &SweepInfo {
        &self.info
    }
}

#[async_trait::async_trait]
impl SweepObserver for ResultWriter {
    fn trial_started(&mut self, params: &TrialParams) {
        self.progress.set_message(format!(
            "n={} tasks={}",
            params.cluster_size, params.workload_magnitude
        ));
    }

    fn attempt_failed(&mut self, params: &TrialParams, attempt: usize, failure: &AttemptFailure) {
        self.progress.set_message(format!(
            "n={} tasks={} retry {attempt}: {failure}",
            params.cluster_size, params.workload_magnitude
        ));
    }

    async fn record(&mut self, record: &ResultRecord, pass: Pass, attempts: usize) -> Result<()> {
        self.progress.suspend(|| println!("{record}"));
        match pass {
            Pass::Main => append_record(&self.results_file, record).await?,
            Pass::Baseline => debug!("Baseline {record} kept out of the results file"),
        }

        self.info.trials.push(TrialInfo {
            cluster_size: record.cluster_size,
            workload_magnitude: record.workload_magnitude,
            elapsed: record.elapsed.clone(),
            pass,
            attempts,
            finished: Local::now().to_rfc3339(),
        });
        tokio::fs::write(&self.info_file, serde_json::to_string_pretty(&self.info)?).await?;
        debug!("{record} after {attempts} attempt(s)");

        self.progress.inc(1);
        Ok(())
    }
}

fn progress_bar(len: usize, no_progress: bool) -> Result<ProgressBar> {
    if no_progress {
        return Ok(ProgressBar::hidden());
    }
    let bar = ProgressBar::new(len as u64);
    bar.set_style(
        ProgressStyle::default_bar()
            .template("[{elapsed_precise}] [{bar:30.cyan/blue}] {pos}/{len} {msg}")?
            .progress_chars("=>-"),
    );
    Ok(bar)
}

pub async fn run_sweep(config: &Config, no_progress: bool) -> Result<()> {
    let grid = Grid::from_config(config);
    info!(
        "Sweeping cluster sizes {:?} over workloads {:?}",
        grid.cluster_sizes(),
        grid.workload_magnitudes()
    );

    let sweep = Sweep::new(
        ProcessLauncher::from_config(config),
        FixedDelay(config.startup_delay()),
        RetryPolicy::from_config(config),
    );
    let progress = progress_bar(grid.len(), no_progress)?;
    let mut writer = ResultWriter::new(config, progress.clone());

    sweep.run(&grid, &mut writer).await?;
    progress.finish_with_message("Sweep complete");
    debug!("Exiting");
    Ok(())
}
