//! `rpr` binary entrypoint kept minimal. The engine lives in the library.

use std::sync::Arc;

use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use repeater::cli::{Cli, Invocation};
use repeater::events::EventHandler;
use repeater::health::{self, AppState};
use repeater::metrics::Metrics;
use repeater::runner::Runner;
use repeater::scheduler::StopSignal;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    let invocation = match cli.into_invocation() {
        Ok(invocation) => invocation,
        Err(e) => {
            eprintln!("rpr: {e}");
            std::process::exit(2);
        }
    };
    init_tracing(&invocation);
    std::process::exit(run(invocation).await);
}

fn init_tracing(invocation: &Invocation) {
    let default = match (invocation.quiet, invocation.verbose) {
        (true, _) => "repeater=warn",
        (false, 0) => "repeater=info",
        (false, 1) => "repeater=debug",
        (false, _) => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

async fn run(invocation: Invocation) -> i32 {
    let metrics = Arc::new(Metrics::new());
    let events: Arc<dyn EventHandler> = metrics.clone();
    let runner = match Runner::new(invocation.runner, Some(events)) {
        Ok(runner) => runner,
        Err(e) => {
            eprintln!("rpr: {e}");
            return 2;
        }
    };

    let cancel = StopSignal::new();
    tokio::spawn({
        let cancel = cancel.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("interrupt received, stopping");
                cancel.stop();
            }
        }
    });

    let mut ports: Vec<u16> = [invocation.health_port, invocation.metrics_port]
        .into_iter()
        .flatten()
        .collect();
    ports.dedup();
    for port in ports {
        let state = AppState::new(metrics.clone(), runner.subscribe_stats());
        tokio::spawn(health::serve(state, port, cancel.clone()));
    }

    let outcome = runner.run(cancel.clone()).await;
    cancel.stop();

    if !invocation.quiet {
        eprintln!(
            "{} attempts, {} succeeded, {} failed in {:.1}s ({})",
            outcome.stats.total(),
            outcome.stats.successful(),
            outcome.stats.failed(),
            outcome.stats.elapsed().as_secs_f64(),
            outcome.termination,
        );
    }
    outcome.exit_code
}
