use std::{process::ExitCode, time::Duration};

use anyhow::{Context, Result};
use clap::Parser;
use knotter_load::{
    Executor, JsonReporter, PacedExecutor, Reporter, Scenario, Session, SessionAggregate,
    SessionKind, SessionReport, TableReporter, UserExecutor,
};
use tracing_subscriber::EnvFilter;

mod cli;

use cli::{Cli, Format, Mode};

#[tokio::main]
async fn main() -> Result<ExitCode> {
    // Parse command line arguments
    let cli = Cli::parse();
    init_tracing(cli.verbose)?;

    let kind = SessionKind::from(cli.session);
    let session = Session::new(kind, &cli.host)?;
    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(cli.timeout))
        .build()
        .context("failed to build HTTP client")?;

    tracing::info!("knotter load test starting...");
    tracing::info!("Host: {}", cli.host);
    tracing::info!("Session: {kind} ({} requests)", session.len());
    tracing::info!("Request timeout: {}s", cli.timeout);

    let scenario = Scenario::<SessionAggregate, _, _>::builder()
        .name(format!("{kind} session"))
        .action(session.action(client))
        .build();

    let results: SessionAggregate = match cli.mode {
        Mode::Users(args) => {
            tracing::info!("Running virtual users");
            tracing::info!("  Users: {}", args.users);
            tracing::info!("  Spawn Rate: {}/sec", args.spawn_rate);
            if let Some(run_time) = args.run_time {
                tracing::info!("  Run Time: {run_time}s");
            }
            if let Some(iterations) = args.iterations {
                tracing::info!("  Iterations per user: {iterations}");
            }

            let mut executor = UserExecutor::builder()
                .users(args.users)
                .spawn_rate(args.spawn_rate)
                .build();
            executor.run_time = args.run_time.map(Duration::from_secs);
            executor.iterations = args.iterations;
            executor.exec(&scenario).await?
        }
        Mode::Paced(args) => {
            let mut executor = PacedExecutor::builder()
                .stages(args.stages)
                .tick(Duration::from_millis(args.tick_ms))
                .build();
            if let Some(workers) = args.workers {
                executor.workers = workers;
            }
            if let Some(bucket) = args.bucket {
                executor.bucket_capacity = bucket;
            }

            tracing::info!("Running paced sessions");
            tracing::info!("  Stages: {}", executor.stages.len());
            tracing::info!("  Total Duration: {:?}", executor.total_duration());
            tracing::info!("  Workers: {}", executor.workers);
            executor.exec(&scenario).await?
        }
    };

    let report = SessionReport::from(results);
    match cli.format {
        Format::Table => TableReporter.report(&report).await?,
        Format::Json => {
            Reporter::<SessionAggregate, _>::report(&JsonReporter { pretty: false }, &report)
                .await?
        }
        Format::JsonPretty => {
            Reporter::<SessionAggregate, _>::report(&JsonReporter { pretty: true }, &report)
                .await?
        }
    }

    tracing::info!("Load test complete");
    if report.total_failures > 0 {
        tracing::warn!(
            "{} of {} requests failed",
            report.total_failures,
            report.total_requests
        );
    }
    Ok(exit_code(&report))
}

/// Any failed request fails the run.
fn exit_code(report: &SessionReport) -> ExitCode {
    if report.total_failures > 0 {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    }
}

/// Logs go to stderr so JSON reports on stdout stay machine readable.
fn init_tracing(verbose: bool) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(if verbose { "debug" } else { "info" }));
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use knotter_load::{Aggregate, RequestMetric, SessionMetric};

    fn report_with(statuses: &[Option<u16>]) -> SessionReport {
        let mut agg = SessionAggregate::new();
        agg.consume(&SessionMetric {
            requests: statuses
                .iter()
                .map(|&status| RequestMetric {
                    method: "GET".into(),
                    name: "/health".into(),
                    latency: Duration::from_millis(5),
                    status,
                    success: matches!(status, Some(s) if s < 400),
                    bytes: 2,
                })
                .collect(),
            latency: Duration::from_millis(5),
        });
        SessionReport::from(agg)
    }

    fn same(a: ExitCode, b: ExitCode) -> bool {
        format!("{a:?}") == format!("{b:?}")
    }

    #[test]
    fn succeeds_when_every_request_passed() {
        let report = report_with(&[Some(200), Some(204)]);
        assert!(same(exit_code(&report), ExitCode::SUCCESS));
        assert!(same(exit_code(&SessionReport::from(SessionAggregate::new())), ExitCode::SUCCESS));
    }

    #[test]
    fn fails_when_any_request_failed() {
        assert!(same(exit_code(&report_with(&[Some(200), Some(500)])), ExitCode::FAILURE));
        assert!(same(exit_code(&report_with(&[None])), ExitCode::FAILURE));
    }
}
