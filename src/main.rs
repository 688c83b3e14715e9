use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Result;
use clap::{Parser, Subcommand};

use cdrun::config::CdrunConfig;
use cdrun::jobfile;
use cdrun::storage::{RunStore, SqliteRunStore};

#[derive(Parser)]
#[command(
    name = "cdrun",
    about = "Minimal continuous-delivery job runner",
    version,
    long_about = None
)]
struct Cli {
    /// Configuration file (default: $CDRUN_CONFIG, then /etc/cdrun/cdrun.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the daemon (scheduler + configured jobs)
    Serve,

    /// Run job file(s) once
    Run {
        /// Job files
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },

    /// Show when job file(s) fire next
    Next {
        /// Job files
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },

    /// List recent job runs
    History {
        /// Only runs of this job
        #[arg(long)]
        job: Option<String>,

        /// Maximum number of runs
        #[arg(long, default_value = "20")]
        limit: usize,

        /// JSON output for machine parsing
        #[arg(long)]
        json: bool,
    },
}

fn init_tracing(config: &CdrunConfig) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.logging.level));

    if config.logging.json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    }
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    // Warnings raised while locating the config go to stderr before the
    // configured subscriber exists.
    let fallback = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::new("warn"))
        .with_writer(std::io::stderr)
        .finish();
    let config = tracing::subscriber::with_default(fallback, || {
        CdrunConfig::resolve(cli.config.as_deref())
    })?;
    init_tracing(&config);

    match cli.command {
        Commands::Serve => {
            tracing::info!("Starting cdrun daemon");
            cdrun::serve(&config).await?;
        }
        Commands::Run { files } => {
            let services = cdrun::services(&config)?;
            let mut all_ok = true;

            for path in files {
                let job = jobfile::load_job(&path, &config.jobs.workdir)?;
                let state = match job.run(&services).await {
                    Some(id) => services.store.job_run_report(id)?.job_run.state,
                    None => anyhow::bail!("job '{}' could not be recorded", job.name()),
                };
                println!("{:<30} {}", job.name(), state);
                all_ok &= state == cdrun::state::RunState::Success
                    || state == cdrun::state::RunState::NotStarted;
            }

            if !all_ok {
                return Ok(ExitCode::FAILURE);
            }
        }
        Commands::Next { files } => {
            for path in files {
                let job = jobfile::load_job(&path, &config.jobs.workdir)?;
                match job.next_run() {
                    Some(at) => println!("{:<30} {}", job.name(), at.to_rfc3339()),
                    None => println!("{:<30} never", job.name()),
                }
            }
        }
        Commands::History { job, limit, json } => {
            let store = SqliteRunStore::open(&config.storage.database.to_string_lossy())?;
            let runs = store.recent_job_runs(job.as_deref(), limit)?;

            if json {
                println!("{}", serde_json::to_string_pretty(&runs)?);
            } else if runs.is_empty() {
                println!("No job runs found.");
            } else {
                println!("{:<6} | {:<20} | {:<25} | {:<10} | State", "Id", "Job", "Started", "Duration");
                println!("{:-<6}-|-{:-<20}-|-{:-<25}-|-{:-<10}-|-{:-<11}", "", "", "", "", "");
                for run in runs {
                    let duration = run
                        .duration
                        .map(cdrun::notifications::report::format_duration)
                        .unwrap_or_else(|| "-".to_string());
                    println!(
                        "{:<6} | {:<20} | {:<25} | {:<10} | {}",
                        run.id.0,
                        run.name,
                        run.started_on.format("%Y-%m-%d %H:%M:%S").to_string(),
                        duration,
                        run.state
                    );
                }
            }
        }
    }

    Ok(ExitCode::SUCCESS)
}
