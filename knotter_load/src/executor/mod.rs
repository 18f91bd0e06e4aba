//! Executors run a [`Scenario`] and return the merged aggregate.
//!
//! Two strategies are provided:
//!
//! - [`UserExecutor`]: a pool of virtual users, spawned at a fixed rate, each
//!   replaying the action back to back until the run time elapses, its
//!   iterations are used up, or the process is interrupted.
//! - [`PacedExecutor`]: a token-bucket governor driven by [`Stage`]s. Each
//!   token allows one action, so the stages set the action rate directly.
//!
//! Both keep one aggregate per worker and merge them once the workers stop.
//! An action cancelled by shutdown is never recorded.
pub mod paced;
pub mod users;

pub use paced::{PacedExecutor, Stage};
pub use users::UserExecutor;

use std::future::Future;

use tokio::task::JoinHandle;

use crate::{aggregate::Aggregate, scenario::Scenario};

/// The runtime hook that executes a `Scenario`.
pub trait Executor<A, F, Fut>
where
    Self: Send + Sync + Sized,
    A: Aggregate,
    F: Fn() -> Fut + Send + Sync + Clone + 'static,
    Fut: Future<Output = A::Metric> + Send,
{
    type Error;

    /// Execute the scenario and return the final aggregate.
    fn exec(
        &self,
        scenario: &Scenario<A, F, Fut>,
    ) -> impl Future<Output = Result<A, Self::Error>> + Send;
}

/// Resolves on Ctrl+C. Never resolves if the signal handler cannot be
/// installed, so a run is not cut short by that.
pub(crate) async fn interrupted() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => tracing::info!("Interrupted, stopping run..."),
        Err(e) => {
            tracing::warn!("Unable to listen for Ctrl+C: {e}");
            std::future::pending::<()>().await
        }
    }
}

/// Merges the aggregates returned by worker tasks.
///
/// A panicked worker contributes an empty aggregate, so one bad worker does
/// not throw away everyone else's data.
pub(crate) fn merge_workers<A: Aggregate>(
    results: Vec<Result<A, tokio::task::JoinError>>,
) -> A {
    let mut final_agg = A::new();
    for res in results {
        match res {
            Ok(agg) => final_agg.merge(agg),
            Err(e) => tracing::error!("Worker panicked with error: {e}"),
        }
    }
    final_agg
}

/// Join handles of spawned workers, each yielding its local aggregate.
pub type WorkerHandles<A> = Vec<JoinHandle<A>>;
