//! knotter_load: scripted HTTP sessions replayed by virtual users against the
//! knotter API.
//!
//! A [`Session`] is a fixed, ordered list of GET requests (`/health`,
//! `/gvtest123/{id}`, `/hjerte/{id}`). An [`Executor`] replays it from many
//! concurrent workers, every worker folds its [`SessionMetric`]s into a
//! [`SessionAggregate`], and the merged aggregate becomes a [`SessionReport`].
//!
//! # Architecture
//!
//! - [`Scenario`]: a named action, here the session bound to an HTTP client.
//! - [`Executor`]: decides how often and how concurrently the action runs.
//!   [`UserExecutor`] models virtual users spawned at a fixed rate;
//!   [`PacedExecutor`] drives a stage-based token bucket.
//! - [`Metric`]: what one call of the action produced.
//! - [`Aggregate`]: mergeable counters built from metrics.
//! - [`Report`]: final statistics derived from an aggregate.
//! - [`Reporter`]: writes a report somewhere (stdout table, JSON).
//!
//! # Example
//!
//! ```rust,no_run
//! use std::time::Duration;
//!
//! use knotter_load::{
//!     Executor, Reporter, Scenario, Session, SessionAggregate, SessionKind, SessionReport,
//!     TableReporter, UserExecutor,
//! };
//!
//! #[tokio::main]
//! async fn main() -> knotter_load::Result<()> {
//!     // build the client once; the action clones it per session
//!     let client = reqwest::Client::builder()
//!         .timeout(Duration::from_secs(10))
//!         .build()?;
//!     let session = Session::new(SessionKind::Full, "http://localhost:8080")?;
//!
//!     let results: SessionAggregate = UserExecutor::builder()
//!         .users(10)
//!         .spawn_rate(2.0)
//!         .run_time(Duration::from_secs(30))
//!         .build()
//!         .exec(
//!             &Scenario::builder()
//!                 .name("full session")
//!                 .action(session.action(client))
//!                 .build(),
//!         )
//!         .await?;
//!
//!     TableReporter.report(&SessionReport::from(results)).await
//! }
//! ```
//!
//! # Feature flags
//! - `internals`: exposes the executor building blocks (governor, worker
//!   spawners). Unstable.

// lets the attribute macros name `::knotter_load::Metric` from inside this crate
extern crate self as knotter_load;

/// Metric aggregators
pub mod aggregate;
pub mod error;
/// Orchestrators that define how things will actually run
pub mod executor;
/// Single metrics
pub mod metric;
/// Reports and Reporters
pub mod report;
pub mod scenario;
/// The scripted request sequences
pub mod session;

pub use aggregate::{Aggregate, EndpointStats, SessionAggregate};
pub use error::{LoadError, Result};
pub use executor::{Executor, PacedExecutor, Stage, UserExecutor};
pub use metric::{Metric, RequestMetric, SessionMetric};
pub use report::{JsonReporter, Report, Reporter, SessionReport, TableReporter};
pub use scenario::Scenario;
pub use session::{FULL_SESSION, HttpMethod, RequestSpec, SMOKE_SESSION, Session, SessionKind};

/// Attribute macros to reduce boilerplate
pub mod macros {
    pub use knotter_load_macros::*;
}
