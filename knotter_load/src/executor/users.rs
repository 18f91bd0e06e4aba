//! Virtual-user execution: a pool of independent workers, each replaying the
//! scenario action back to back.
//!
//! # High-level flow
//! 1. A spawner task starts one user immediately and one more every
//!    `1 / spawn_rate` seconds until `users` are running.
//! 2. Each user loops `action()` and consumes every metric into its own
//!    aggregate, stopping after `iterations` if set.
//! 3. The run stops when `run_time` elapses, on Ctrl+C, or once every user has
//!    used up its iterations. Shutdown is broadcast on a `watch` channel;
//!    actions in flight at that point are dropped, not recorded.
//! 4. User aggregates are merged into the result.
use std::{future::Future, time::Duration};

use futures::future::join_all;
use tokio::{
    sync::watch::{self, Receiver},
    task::JoinHandle,
};
use typed_builder::TypedBuilder;

use super::{Executor, WorkerHandles, interrupted, merge_workers};
use crate::{
    aggregate::Aggregate,
    error::{LoadError, Result},
    scenario::Scenario,
};

/// Executor modelled on virtual users: concurrency is the number of users,
/// and throughput is whatever they achieve.
///
/// Without `run_time` and `iterations` the run lasts until Ctrl+C.
#[derive(Debug, Clone, TypedBuilder)]
pub struct UserExecutor {
    /// Number of concurrent virtual users.
    pub users: usize,
    /// Users started per second. `f64::INFINITY` starts them all at once.
    #[builder(default = 1.0)]
    pub spawn_rate: f64,
    /// Stop the run after this long.
    #[builder(default, setter(strip_option))]
    pub run_time: Option<Duration>,
    /// Sessions each user runs before stopping.
    #[builder(default, setter(strip_option))]
    pub iterations: Option<u64>,
}

impl UserExecutor {
    pub fn validate(&self) -> Result<()> {
        if self.users == 0 {
            return Err(LoadError::InvalidConfig(
                "at least one user is required".into(),
            ));
        }
        if self.spawn_rate.is_nan() || self.spawn_rate <= 0.0 {
            return Err(LoadError::InvalidConfig(format!(
                "spawn rate must be greater than zero, got {}",
                self.spawn_rate
            )));
        }
        if self.iterations == Some(0) {
            return Err(LoadError::InvalidConfig(
                "iterations must be at least 1".into(),
            ));
        }
        Ok(())
    }

    /// Delay between two user spawns.
    pub fn spawn_interval(&self) -> Duration {
        Duration::try_from_secs_f64(1.0 / self.spawn_rate).unwrap_or(Duration::MAX)
    }
}

impl<A, F, Fut> Executor<A, F, Fut> for UserExecutor
where
    Self: Send + Sync + Sized,
    A: Aggregate + 'static,
    F: Fn() -> Fut + Send + Sync + Clone + 'static,
    Fut: Future<Output = A::Metric> + Send + 'static,
{
    type Error = LoadError;

    async fn exec(&self, scenario: &Scenario<A, F, Fut>) -> Result<A> {
        self.validate()?;
        let (shutdown_tx, shutdown) = watch::channel(false);

        tracing::info!(
            "Spawning {} users at {}/s for scenario: {}",
            self.users,
            self.spawn_rate,
            scenario.name
        );
        let spawner = tokio::spawn(spawn_users::<A, F, Fut>(
            shutdown.clone(),
            self.users,
            self.spawn_interval(),
            self.iterations,
            scenario.action.clone(),
        ));

        let run = async move {
            let handles = spawner.await?;
            Ok::<_, LoadError>(join_all(handles).await)
        };
        tokio::pin!(run);

        let results = tokio::select! {
            results = &mut run => {
                tracing::info!("All users completed their iterations.");
                results?
            }
            _ = stop_after(self.run_time) => {
                tracing::info!("Signaling shutdown to users...");
                shutdown_tx.send_replace(true);
                run.await?
            }
        };

        tracing::info!("Processing results from {} users...", results.len());
        let final_agg = merge_workers(results);

        tracing::info!("Done running scenario: {}!", scenario.name);
        Ok(final_agg)
    }
}

async fn stop_after(run_time: Option<Duration>) {
    match run_time {
        Some(run_time) => {
            tokio::select! {
                _ = tokio::time::sleep(run_time) => {
                    tracing::info!("Run time of {run_time:?} elapsed.");
                }
                _ = interrupted() => {}
            }
        }
        None => interrupted().await,
    }
}

#[cfg(feature = "internals")]
pub use internals::*;
use internals::*;

mod internals {
    use super::*;

    /// Spawns `users` user tasks, `interval` apart, stopping early on shutdown.
    pub async fn spawn_users<A, F, Fut>(
        mut shutdown: Receiver<bool>,
        users: usize,
        interval: Duration,
        iterations: Option<u64>,
        action: F,
    ) -> WorkerHandles<A>
    where
        A: Aggregate + 'static,
        F: Fn() -> Fut + Send + Sync + Clone + 'static,
        Fut: Future<Output = A::Metric> + Send + 'static,
    {
        let mut handles = Vec::with_capacity(users);
        for i in 0..users {
            if *shutdown.borrow() {
                break;
            }
            handles.push(spawn_user(shutdown.clone(), i, iterations, action.clone()));

            if i + 1 < users && !interval.is_zero() {
                tokio::select! {
                    _ = tokio::time::sleep(interval) => {}
                    _ = shutdown.wait_for(|stop| *stop) => break,
                }
            }
        }
        tracing::debug!("Spawned {} of {users} users.", handles.len());
        handles
    }

    /// Spawns a single user that loops `action` until shutdown or until it
    /// has run `iterations` times.
    pub fn spawn_user<A, F, Fut>(
        mut shutdown: Receiver<bool>,
        id: usize,
        iterations: Option<u64>,
        action: F,
    ) -> JoinHandle<A>
    where
        A: Aggregate + 'static,
        F: Fn() -> Fut + Send + Sync + Clone + 'static,
        Fut: Future<Output = A::Metric> + Send + 'static,
    {
        tokio::spawn(async move {
            let mut agg = A::new();
            let mut completed = 0u64;
            tracing::debug!("User {id} started.");

            let main_task = async {
                while iterations.is_none_or(|n| completed < n) {
                    let metric = action().await;
                    agg.consume(&metric);
                    completed += 1;
                    // actions that never suspend must not starve the shutdown branch
                    tokio::task::yield_now().await;
                }
            };

            tokio::select! {
                _ = main_task => {
                    tracing::debug!("User {id} finished its iterations.");
                }
                _ = shutdown.wait_for(|stop| *stop) => {}
            };

            tracing::debug!("User {id} shutting down after {completed} iterations.");
            agg
        })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    };

    use super::*;
    use crate::macros::{aggregate, metric};

    #[metric]
    struct Tick;

    #[aggregate]
    #[derive(Default)]
    struct Ticks {
        count: u64,
    }

    impl Aggregate for Ticks {
        type Metric = Tick;

        fn new() -> Self {
            Self::default()
        }

        fn consume(&mut self, _: &Self::Metric) {
            self.count += 1;
        }

        fn merge(&mut self, other: Self) {
            self.count += other.count;
        }
    }

    fn scenario<F, Fut>(action: F) -> Scenario<Ticks, F, Fut>
    where
        F: Fn() -> Fut + Send + Sync + Clone + 'static,
        Fut: Future<Output = Tick> + Send,
    {
        Scenario::builder().name("test").action(action).build()
    }

    #[tokio::test]
    async fn runs_users_times_iterations() {
        let result = UserExecutor::builder()
            .users(3)
            .spawn_rate(f64::INFINITY)
            .iterations(4)
            .build()
            .exec(&scenario(|| async { Tick }))
            .await
            .unwrap();

        assert_eq!(result.count, 12);
    }

    #[tokio::test(start_paused = true)]
    async fn spawn_rate_limits_started_users() {
        let started = Arc::new(AtomicUsize::new(0));
        let counter = started.clone();
        let action = move || {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_secs(60)).await;
                Tick
            }
        };

        let result = UserExecutor::builder()
            .users(5)
            .spawn_rate(10.0)
            .run_time(Duration::from_millis(150))
            .build()
            .exec(&scenario(action))
            .await
            .unwrap();

        // users spawn at 0ms and 100ms; the run stops at 150ms
        assert_eq!(started.load(Ordering::SeqCst), 2);
        // both actions were still sleeping, so nothing is recorded
        assert_eq!(result.count, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn run_time_stops_endless_users() {
        let action = || async {
            tokio::time::sleep(Duration::from_millis(10)).await;
            Tick
        };

        let result = UserExecutor::builder()
            .users(2)
            .spawn_rate(f64::INFINITY)
            .run_time(Duration::from_millis(105))
            .build()
            .exec(&scenario(action))
            .await
            .unwrap();

        assert_eq!(result.count, 20);
    }

    #[tokio::test]
    async fn spawn_expected_number_of_users() {
        let (_tx, rx) = watch::channel(false);
        let handles: WorkerHandles<Ticks> =
            spawn_users(rx, 10, Duration::ZERO, Some(1), || async { Tick }).await;
        assert_eq!(handles.len(), 10);
        let total = merge_workers(join_all(handles).await);
        assert_eq!(total.count, 10);
    }

    #[test]
    fn rejects_invalid_configuration() {
        let invalid = [
            UserExecutor::builder().users(0).build(),
            UserExecutor::builder().users(1).spawn_rate(0.0).build(),
            UserExecutor::builder().users(1).spawn_rate(f64::NAN).build(),
            UserExecutor::builder().users(1).iterations(0).build(),
        ];
        for executor in invalid {
            assert!(matches!(
                executor.validate(),
                Err(LoadError::InvalidConfig(_))
            ));
        }
    }

    #[test]
    fn spawn_interval_follows_rate() {
        let executor = UserExecutor::builder().users(1).spawn_rate(4.0).build();
        assert_eq!(executor.spawn_interval(), Duration::from_millis(250));
        let executor = UserExecutor::builder()
            .users(1)
            .spawn_rate(f64::INFINITY)
            .build();
        assert_eq!(executor.spawn_interval(), Duration::ZERO);
    }
}
