use clap::{Parser, Subcommand};
use shortload_core::{LoadConfig, LoadModel, ReadTier, ReportFormat, ResultWriter, RunPlan};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing::error;
use tracing_subscriber::{fmt, EnvFilter};

/// Exit status when the run completed but thresholds were not met.
const EXIT_THRESHOLDS_FAILED: u8 = 99;

#[derive(Parser, Debug)]
#[command(name = "shortload")]
#[command(about = "Mixed read/write load generator for URL-shortener services", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run a load test and evaluate thresholds
    Run {
        /// Config file (overrides SHORTLOAD_CONFIG)
        #[arg(long)]
        config: Option<PathBuf>,

        /// Base URL of the service under test
        #[arg(long, env = "SHORTLOAD_BASE_URL")]
        base_url: Option<String>,

        /// Write a JSON report to this path
        #[arg(long)]
        json: Option<PathBuf>,

        /// Write a Markdown report to this path
        #[arg(long)]
        markdown: Option<PathBuf>,
    },

    /// Validate configuration and print the resolved plan
    Check {
        /// Config file (overrides SHORTLOAD_CONFIG)
        #[arg(long)]
        config: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    init_logging();

    let cli = Cli::parse();

    match execute(cli).await {
        Ok(code) => code,
        Err(err) => {
            error!("{}", err);
            println!("❌ {}", err);
            ExitCode::FAILURE
        }
    }
}

async fn execute(cli: Cli) -> Result<ExitCode, Box<dyn std::error::Error>> {
    match cli.command {
        Commands::Run {
            config,
            base_url,
            json,
            markdown,
        } => {
            let config = LoadConfig::load(config.as_deref(), base_url.as_deref())?;
            let plan = config.build_plan()?;

            println!(
                "🚀 Load testing {} ({})",
                config.target.base_url,
                plan.model.description()
            );

            let outcome = shortload_core::run(plan).await?;
            let run_name = format!("shortload {}", config.target.base_url);
            let writer = ResultWriter::new(run_name, &outcome.report, &outcome.verdict);

            println!("\n{}", writer.console_summary());

            if let Some(path) = json {
                write_report(&writer, &path, ReportFormat::Json)?;
            }
            if let Some(path) = markdown {
                write_report(&writer, &path, ReportFormat::Markdown)?;
            }

            if writer.passes() {
                println!("✅ All thresholds passed");
                Ok(ExitCode::SUCCESS)
            } else {
                println!("❌ Thresholds not met:");
                for line in writer.failure_summary().lines() {
                    println!("  - {}", line);
                }
                Ok(ExitCode::from(EXIT_THRESHOLDS_FAILED))
            }
        }

        Commands::Check { config } => {
            println!("🔍 Checking configuration...");

            let config = LoadConfig::load(config.as_deref(), None)?;
            let plan = config.build_plan()?;
            print_plan(&config, &plan);

            println!("\n✅ Configuration is valid!");
            Ok(ExitCode::SUCCESS)
        }
    }
}

fn write_report(
    writer: &ResultWriter<'_>,
    path: &Path,
    format: ReportFormat,
) -> Result<(), Box<dyn std::error::Error>> {
    writer.write_report(path, format)?;
    println!("📝 Wrote {:?} report to {}", format, path.display());
    Ok(())
}

fn print_plan(config: &LoadConfig, plan: &RunPlan) {
    let mixer = plan.workload.mixer();
    let pools = plan.workload.pools();

    println!("\nTarget:");
    println!("  Base URL: {}", plan.workload.target().base_url);
    println!("  Shorten: POST {}", config.target.shorten_path);
    println!("  Cache header: {}", plan.cache_header);
    println!("\nWorkload:");
    println!("  Read ratio: {:.2}", mixer.read_ratio());
    for (tier, weight) in tier_weights(plan) {
        println!("  {} weight: {:.2}", tier, weight);
    }
    println!(
        "  Keys: {} hot, {} warm, {} cold",
        pools.hot().len(),
        pools.warm().len(),
        pools.cold_keyspace_size()
    );
    println!(
        "  Think time: {:?}..={:?}",
        plan.settings.think_time.min, plan.settings.think_time.max
    );
    println!("\nLoad:");
    println!("  {}", plan.model.description());
    match &plan.model {
        LoadModel::RampingVus { .. } => {
            println!("  Duration: {:.1}s", plan.model.duration().as_secs_f64());
        }
        LoadModel::PerVuIterations { max_duration, .. } => {
            println!("  Max duration: {:.1}s", max_duration.as_secs_f64());
        }
    }
    println!("  Peak VUs: {}", plan.model.max_vus());
    println!("\nThresholds:");
    for rule in &plan.rules {
        println!("  {}", rule);
    }
}

/// Per-tier read weights; the mixer stores them as cumulative bounds.
fn tier_weights(plan: &RunPlan) -> Vec<(ReadTier, f64)> {
    let weights = plan.workload.mixer().weights();
    weights
        .entries()
        .iter()
        .map(|(tier, _)| (*tier, weights.weight_of(*tier)))
        .collect()
}

fn init_logging() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt().with_env_filter(env_filter).with_target(false).init();
}
