use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use tripline_core::alert::AlertRouter;
use tripline_core::engine::{Engine, RunMode, RunOutcome};
use tripline_core::settings::Settings;
use tripline_core::state::StateStore;
use tripline_probes::orchestrator::{current_program, Orchestrator, REPORTED_FAILURE};
use tripline_probes::ProbeKind;

#[derive(Parser, Debug)]
#[command(author, version, about = "Tripline host intrusion detection probes", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// List the available probes
    List,
    /// Run a single probe in this process
    Probe {
        #[arg(value_enum)]
        name: ProbeKind,
        /// Establish the baseline without reporting findings
        #[arg(long)]
        init: bool,
        #[arg(long)]
        config: Option<PathBuf>,
    },
    /// Run every probe in its own process under the configured timeout
    RunAll {
        #[arg(long)]
        init: bool,
        #[arg(long)]
        config: Option<PathBuf>,
    },
    /// Send a test alert through every configured channel
    TestAlert {
        #[arg(long)]
        config: Option<PathBuf>,
    },
}

fn main() -> ExitCode {
    // stdout belongs to the print alert channel.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match dispatch(cli.command) {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::from(REPORTED_FAILURE as u8),
        Err(e) => {
            error!("{e:#}");
            ExitCode::from(REPORTED_FAILURE as u8 + 1)
        }
    }
}

/// Returns whether every probe completed without an operational error.
fn dispatch(command: Commands) -> Result<bool> {
    match command {
        Commands::List => {
            for kind in ProbeKind::ALL {
                println!("{}", kind.name());
            }
            Ok(true)
        }
        Commands::Probe { name, init, config } => {
            let settings = Settings::load(config.as_deref())?;
            let router = AlertRouter::from_settings(&settings.alerts);
            let engine = Engine::new(StateStore::new(settings.state_dir()?), router);
            match name.run(&settings, &engine, RunMode::from_init_flag(init)) {
                Ok(Some(RunOutcome::Deactivated)) => {
                    info!("{} is deactivated", name.name());
                    Ok(true)
                }
                Ok(_) => Ok(true),
                // Already delivered through the router.
                Err(_) => Ok(false),
            }
        }
        Commands::RunAll { init, config } => {
            let settings = Settings::load(config.as_deref())?;
            let router = AlertRouter::from_settings(&settings.alerts);
            let orchestrator = Orchestrator::new(
                current_program()?,
                config,
                Duration::from_secs(settings.probe_timeout_secs),
                settings.alerts.print_only(),
            );
            let failed = orchestrator.run_all(RunMode::from_init_flag(init), &router);
            if failed > 0 {
                info!("{failed} probe(s) failed");
            }
            Ok(failed == 0)
        }
        Commands::TestAlert { config } => {
            let settings = Settings::load(config.as_deref())?;
            let delivered = AlertRouter::from_settings(&settings.alerts).test_alert();
            info!("test alert accepted by {delivered} channel(s)");
            Ok(delivered > 0)
        }
    }
}
