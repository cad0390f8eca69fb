use std::path::PathBuf;

use common::{
    config::Config,
    plot::{AggregatedSeries, x_axis},
};
use eyre::{Context, Result};
use scaling_plot::ScalingPlot;
use tokio::{fs::read_to_string, task::spawn_blocking};
use tracing::{debug, warn};

/// Reads the results file, prints the per-task times and renders the log-log chart.
pub async fn plot(config: &Config, input: Option<PathBuf>, output: Option<PathBuf>) -> Result<()> {
    let input = input.unwrap_or_else(|| config.results_file.clone());
    let output = output.unwrap_or_else(|| config.plot_file.clone());

    let data = read_to_string(&input)
        .await
        .with_context(|| format!("Reading {}", input.display()))?;
    let series = AggregatedSeries::parse(&data)?;
    let x = x_axis(config.workload_exponents);
    debug!(
        "Loaded {} cluster sizes from {}",
        series.cluster_sizes().count(),
        input.display()
    );

    let drift = series.warn_on_workload_drift(&x);
    if drift > 0 {
        warn!("{drift} points plotted at a workload other than the one recorded");
    }

    for (cluster_size, per_task) in series.per_task_times(&x)? {
        println!("{cluster_size} Nodes: {per_task:?}");
    }

    let path = output.clone();
    spawn_blocking(move || ScalingPlot::default().render(&series, &x, &path)).await??;
    println!("Plot written to {}", output.display());
    Ok(())
}
