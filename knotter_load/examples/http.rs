use std::time::Duration;

use knotter_load::{
    Executor, PacedExecutor, Reporter, Scenario, Session, SessionAggregate, SessionKind,
    SessionReport, Stage, TableReporter,
};
use reqwest::Client;

#[tokio::main]
async fn main() -> knotter_load::Result<()> {
    tracing_subscriber::fmt().init();

    // NEVER build the client inside the action, every session would open
    // fresh connections
    let client = Client::new();
    let session = Session::new(SessionKind::Full, "http://localhost:8080")?;

    let results: SessionAggregate = PacedExecutor::builder()
        // ramp to 10 sessions/s, spike to 100/s, then settle back
        .stages(vec![
            Stage::new(Duration::from_secs(5), 10.0),
            Stage::new(Duration::from_secs(5), 100.0),
            Stage::new(Duration::from_secs(5), 10.0),
        ])
        .workers(200)
        .build()
        .exec(
            &Scenario::builder()
                .name("Paced full session")
                .action(session.action(client))
                .build(),
        )
        .await?;

    TableReporter.report(&SessionReport::from(results)).await
}
