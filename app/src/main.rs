use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};
use common::{
    config::Config,
    grid::{Grid, Role},
    launcher::ProcessLauncher,
};
use eyre::{Context, Result};
use tokio::fs::read_to_string;
use tracing::error;
use tracing_subscriber::{
    EnvFilter,
    fmt::{layer, time::ChronoLocal},
    layer::SubscriberExt,
    util::SubscriberInitExt,
};

mod plot;
mod sweep;

const MODULES: &[&str] = &["common", "scaling_plot"];

#[derive(Parser)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
    #[arg(long, default_value_t = false)]
    no_progress: bool,
    #[arg(short, long)]
    log: Vec<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Measure every grid point, retrying each until the leader succeeds
    Sweep {
        #[arg(short, long)]
        config_file: Option<PathBuf>,
    },
    /// Plot recorded results on log-log axes
    Plot {
        #[arg(short, long)]
        config_file: Option<PathBuf>,
        /// Results file, defaults to the configured one
        #[arg(short, long)]
        input: Option<PathBuf>,
        /// Image to write, defaults to the configured one
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Print the process invocations a sweep would perform
    Print {
        #[arg(short, long)]
        config_file: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let log_level = std::env::var("RUST_LOG").unwrap_or("warn".to_owned());
    let args = Cli::parse();
    let file_appender = tracing_appender::rolling::never(".", "log.log");
    let (non_blocking, _guard) = tracing_appender::non_blocking(file_appender);

    let mut env_filter = EnvFilter::new(format!("cluster_sweep={log_level}"));

    if !args.log.is_empty() {
        for log in &args.log {
            env_filter = env_filter.add_directive(log.parse()?);
        }
    }

    for module in MODULES {
        if !args.log.iter().any(|x| x.starts_with(module)) {
            env_filter = env_filter.add_directive(format!("{module}={log_level}").parse()?);
        }
    }

    tracing_subscriber::registry()
        .with(env_filter)
        .with(
            layer()
                .with_timer(ChronoLocal::new("%v %k:%M:%S %z".to_owned()))
                .with_writer(std::io::stderr)
                .compact(),
        )
        .with(layer().with_writer(non_blocking).with_ansi(false))
        .init();

    match args.command {
        Commands::Sweep { config_file } => {
            let config = load_config(config_file.as_deref()).await?;
            if let Err(err) = sweep::run_sweep(&config, args.no_progress).await {
                error!("{err:#?}");
                return Err(err);
            }
        }
        Commands::Plot {
            config_file,
            input,
            output,
        } => {
            let config = load_config(config_file.as_deref()).await?;
            if let Err(err) = plot::plot(&config, input, output).await {
                error!("{err:#?}");
                return Err(err);
            }
        }
        Commands::Print { config_file } => {
            let config = load_config(config_file.as_deref()).await?;
            print_commands(&config);
        }
    };

    Ok(())
}

/// Reads the YAML config, or the built-in defaults when none is given
async fn load_config(path: Option<&Path>) -> Result<Config> {
    let config = match path {
        Some(path) => Config::from_yaml(
            &read_to_string(path)
                .await
                .with_context(|| format!("Reading {}", path.display()))?,
        )
        .with_context(|| format!("Parsing {}", path.display()))?,
        None => Config::default(),
    };
    config.validate()?;
    Ok(config)
}

fn print_commands(config: &Config) {
    let launcher = ProcessLauncher::from_config(config);
    for params in Grid::from_config(config).iter() {
        println!("# {params}");
        for rank in params.follower_ranks() {
            let invocation = params.invocation(Role::Follower(rank));
            println!("{} &", launcher.command_line(&invocation));
        }
        let leader = params.invocation(Role::Leader);
        println!("{}", launcher.command_line(&leader));
    }
}
