use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

use scenario_shake::{ScenarioBuilder, ScenarioConfig};

#[derive(Parser)]
#[command(name = "scenario-shake")]
#[command(about = "Earthquake scenario ground motion, damage and loss", long_about = None)]
struct Cli {
    /// Job file (TOML or JSON)
    #[arg(short, long, global = true, env = "SCENARIO_JOB")]
    job: Option<PathBuf>,

    /// Inputs bundle (JSON)
    #[arg(short, long, global = true, env = "SCENARIO_INPUTS")]
    inputs: Option<PathBuf>,

    /// Directory receiving result documents
    #[arg(short, long, global = true, default_value = "out")]
    output_dir: PathBuf,

    /// Worker threads (defaults to the number of cores)
    #[arg(long, global = true, env = "SCENARIO_THREADS")]
    threads: Option<usize>,

    /// Print Prometheus metrics when done
    #[arg(long, global = true)]
    metrics: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the damage or risk calculation named in the job
    Run {
        /// Override the number of map-reduce blocks
        #[arg(long)]
        concurrent_tasks: Option<usize>,
    },
    /// Simulate and store ground-motion fields only
    Gmfs,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    let job = cli.job.context("--job is required")?;
    let inputs = cli.inputs.context("--inputs is required")?;

    let mut config = ScenarioConfig::load(&job).with_context(|| format!("reading {}", job.display()))?;
    if let Commands::Run {
        concurrent_tasks: Some(n),
    } = cli.command
    {
        config = config.concurrent_tasks(n);
    }

    let mut builder = ScenarioBuilder::new()
        .with_config(config)
        .with_files(&inputs, &cli.output_dir)?
        .with_metrics(cli.metrics);
    if let Some(n) = cli.threads {
        builder = builder.with_threads(n);
    }
    let runtime = builder.build()?;

    match cli.command {
        Commands::Run { .. } => {
            let report = runtime.run().await?;
            info!(calc_id = %report.calc_id, keys = report.outcome.len(), "Done");
            for record in report.outcome.to_records() {
                let kind = record.kind.map(|k| format!("{} ", k)).unwrap_or_default();
                println!("{}{} {:?}", kind, record.name, record.shape);
            }
            println!("results: {}", cli.output_dir.join(report.calc_id.to_string()).display());
        }
        Commands::Gmfs => {
            let report = runtime.run_gmfs().await?;
            info!(calc_id = %report.calc_id, records = report.records, "Done");
            println!(
                "{} records, {} source ruptures in range: {}",
                report.records,
                report.ruptures_in_range,
                cli.output_dir.join(report.calc_id.to_string()).display()
            );
        }
    }

    if let Some(metrics) = runtime.metrics() {
        print!("{}", metrics.export_text()?);
    }
    Ok(())
}
