use std::process::ExitCode;

use anyhow::Result;
use clap::Parser;
use console::Style;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use dailysign::cli::{Cli, Command};
use dailysign::config::SignConfig;
use dailysign::detect::{ConfiguredDetector, Detector};
use dailysign::storage::LevelLog;
use dailysign::ui::{self, DetectProgress};

#[tokio::main(flavor = "multi_thread")]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    init_logging(cli.verbose);

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("  {} {e:#}", Style::new().red().bold().apply_to("✗"));
            ExitCode::FAILURE
        }
    }
}

fn init_logging(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("dailysign=debug")
    } else {
        EnvFilter::new("dailysign=info")
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(false))
        .with(filter)
        .init();
}

async fn run(cli: Cli) -> Result<()> {
    let config = SignConfig::load(&cli.config)?;

    match cli.command {
        Command::Check => {
            let method = config.unlock.method()?;
            ConfiguredDetector::from_config(&config.detector)?;
            ui::print_check(&config, &method);
        }
        Command::Detect { image } => {
            let detector = ConfiguredDetector::from_config(&config.detector)?;
            let progress = DetectProgress::start(&image);
            match detector.detect(&image).await {
                Ok(targets) => progress.finish(&targets),
                Err(e) => {
                    progress.fail(&e.to_string());
                    return Err(e.into());
                }
            }
        }
        Command::History { limit } => {
            let records = LevelLog::new(&config.record_path).load().await?;
            let skip = limit.map_or(0, |n| records.len().saturating_sub(n));
            ui::print_history(&records[skip..]);
        }
    }
    Ok(())
}
