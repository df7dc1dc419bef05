use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Result;
use chrono::{DateTime, Utc};
use clap::Parser;
use serde::Serialize;
use timeline_engine::{Analyser, AnalyserConfig, ModuleSource, Report, StaticModules};
use timeline_events::Event;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use timeline_replay::{analysers, load_config, load_events, ReplayConfig};

#[derive(Parser)]
#[command(name = "replay", about = "Replay a combat log through the timeline analysis modules")]
struct Cli {
    /// Event log to replay (JSON array, sorted by timestamp)
    #[arg(long)]
    events: PathBuf,

    /// Path to config TOML file
    #[arg(long)]
    config: Option<PathBuf>,

    /// Emit logs as JSON
    #[arg(long)]
    json_logs: bool,

    /// Report code, overrides the config file
    #[arg(long)]
    report: Option<String>,

    /// Pull within the report, overrides the config file
    #[arg(long)]
    pull: Option<u32>,

    /// Actor to focus on, overrides the config file
    #[arg(long)]
    actor: Option<i64>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct Output {
    generated_at: DateTime<Utc>,
    report: Report,
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => load_config(path)?,
        None => ReplayConfig::default(),
    };
    apply_overrides(&mut config, &cli);

    init_tracing(cli.json_logs || config.logging.json)?;
    info!(events = %cli.events.display(), "Starting replay");

    let events = load_events(&cli.events)?;
    let sources: Vec<Box<dyn ModuleSource<Event>>> = vec![Box::new(StaticModules(
        analysers::select(&config.modules.enabled)?,
    ))];

    let analyser = Analyser::new(AnalyserConfig::from_env(), config.run_context());
    let run_id = analyser.run_id();

    match analyser.run(&sources, &events).await {
        Ok(report) => {
            info!(
                run_id = %run_id,
                results = report.results.len(),
                errors = report.errors.len(),
                "Replay finished"
            );
            let output = Output {
                generated_at: Utc::now(),
                report,
            };
            println!("{}", serde_json::to_string_pretty(&output)?);
            Ok(ExitCode::SUCCESS)
        }
        Err(e) => {
            error!(run_id = %run_id, error = %e, "Replay failed");
            Ok(ExitCode::from(1))
        }
    }
}

fn apply_overrides(config: &mut ReplayConfig, cli: &Cli) {
    if let Some(report) = &cli.report {
        config.run.report = report.clone();
    }
    if let Some(pull) = cli.pull {
        config.run.pull = pull;
    }
    if cli.actor.is_some() {
        config.run.actor = cli.actor;
    }
}

fn init_tracing(json: bool) -> Result<()> {
    let filter = EnvFilter::from_default_env().add_directive("timeline=info".parse()?);
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
    Ok(())
}
