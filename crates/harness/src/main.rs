use std::time::Duration;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use guru_harness::scenarios::bursty::{self, BurstyParams};
use guru_harness::scenarios::connectivity::{self, ConnectivityParams};
use guru_harness::scenarios::latency::{self, LatencyParams};
use guru_harness::{HarnessClient, ScenarioReport};

#[derive(Parser)]
#[command(name = "guru-harness", about = "Edge-case harness for the Gurukul orchestration core")]
struct Cli {
    /// Base URL of the gateway under test.
    #[arg(long, default_value = "http://127.0.0.1:8080")]
    base_url: String,

    /// API bearer token, if the gateway enforces one.
    #[arg(long)]
    token: Option<String>,

    #[command(subcommand)]
    scenario: Scenario,
}

#[derive(Subcommand)]
enum Scenario {
    /// N concurrent clients submit within a small window.
    Bursty {
        #[arg(long, default_value_t = 10)]
        clients: usize,
        #[arg(long, default_value_t = 100)]
        window_ms: u64,
        #[arg(long, default_value_t = 60)]
        completion_deadline_secs: u64,
    },
    /// Long-running job: progress liveness and cancel latency.
    HighLatency {
        #[arg(long, default_value_t = 60)]
        observe_secs: u64,
        #[arg(long, default_value_t = 30)]
        stall_threshold_secs: u64,
        #[arg(long, default_value_t = 300)]
        job_duration_secs: u64,
    },
    /// Upstream outage: breaker opens, clients fail fast.
    Connectivity {
        #[arg(long, default_value_t = 5)]
        failure_threshold: u32,
        #[arg(long, default_value_t = 30)]
        open_duration_secs: u64,
        #[arg(long)]
        expect_recovery: bool,
    },
    /// Run every scenario in sequence.
    All,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .init();

    let cli = Cli::parse();
    let client = HarnessClient::new(&cli.base_url, cli.token.clone())?;

    let reports: Vec<ScenarioReport> = match cli.scenario {
        Scenario::Bursty {
            clients,
            window_ms,
            completion_deadline_secs,
        } => {
            vec![
                bursty::run(
                    &client,
                    &BurstyParams {
                        clients,
                        window: Duration::from_millis(window_ms),
                        completion_deadline: Duration::from_secs(completion_deadline_secs),
                    },
                )
                .await?,
            ]
        }
        Scenario::HighLatency {
            observe_secs,
            stall_threshold_secs,
            job_duration_secs,
        } => {
            vec![
                latency::run(
                    &client,
                    &LatencyParams {
                        observe: Duration::from_secs(observe_secs),
                        stall_threshold: Duration::from_secs(stall_threshold_secs),
                        job_duration: Duration::from_secs(job_duration_secs),
                    },
                )
                .await?,
            ]
        }
        Scenario::Connectivity {
            failure_threshold,
            open_duration_secs,
            expect_recovery,
        } => {
            vec![
                connectivity::run(
                    &client,
                    &ConnectivityParams {
                        failure_threshold,
                        open_duration: Duration::from_secs(open_duration_secs),
                        expect_recovery,
                    },
                )
                .await?,
            ]
        }
        Scenario::All => {
            vec![
                bursty::run(&client, &BurstyParams::default()).await?,
                latency::run(&client, &LatencyParams::default()).await?,
                connectivity::run(&client, &ConnectivityParams::default()).await?,
            ]
        }
    };

    let mut all_passed = true;
    for report in &reports {
        print!("{}", report.render());
        all_passed &= report.passed();
    }

    if !all_passed {
        std::process::exit(1);
    }
    Ok(())
}
