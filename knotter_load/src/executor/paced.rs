//! Rate-controlled execution: a token-bucket governor driven by [`Stage`]s.
//!
//! One token allows one call of the scenario action, so with the session
//! action the stages are expressed in sessions per second.
//!
//! # High-level flow
//! 1. A semaphore with zero permits is the token bucket.
//! 2. The governor task adds permits every `tick`, following the stages.
//! 3. `workers` tasks each acquire a permit, forget it, run the action and
//!    consume the metric into a worker-local aggregate. Workers need no start
//!    signal: until the governor adds tokens they simply wait on the bucket.
//! 4. When the governor has gone through every stage (or on Ctrl+C) shutdown
//!    is broadcast and the worker aggregates are merged.
//!
//! # Governor maths
//! For a stage ramping from `start_rate` to `end_rate` over `duration`, the
//! instantaneous rate at `elapsed` is
//!
//! ```text
//! t = min(elapsed / duration, 1)
//! r(t) = start_rate + (end_rate - start_rate) * t
//! ```
//!
//! and each tick adds `floor(r(t) * tick + fractional)` tokens, carrying the
//! remainder into `fractional` so the long-run average is preserved.
use std::{future::Future, sync::Arc, time::Duration};

use futures::future::join_all;
use tokio::{
    sync::{
        Semaphore,
        watch::{self, Receiver},
    },
    task::JoinHandle,
    time::Instant,
};
use typed_builder::TypedBuilder;

use super::{Executor, WorkerHandles, interrupted, merge_workers};
use crate::{
    aggregate::Aggregate,
    error::{LoadError, Result},
    scenario::Scenario,
};

/// A ramp segment: reach `target` actions per second over `duration`.
///
/// A zero `duration` jumps the rate to `target` without adding tokens itself;
/// follow it with a non-zero stage to hold that rate.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Stage {
    pub duration: Duration,
    /// Actions per second
    pub target: f64,
}

impl Stage {
    pub fn new(duration: Duration, target: f64) -> Self {
        Self { duration, target }
    }
}

/// The semaphore reserves 3 bits of `usize` for flags; more permits than this
/// panics, so token counts are capped here.
pub const MAX_TOKENS: usize = usize::MAX >> 3;

/// Executor that paces actions with a stage-driven token bucket.
#[derive(Debug, Clone, TypedBuilder)]
pub struct PacedExecutor {
    pub stages: Vec<Stage>,
    /// How often the governor refills the bucket.
    #[builder(default = Duration::from_millis(100))]
    pub tick: Duration,
    /// Maximum number of unused tokens kept for bursts.
    #[builder(default = MAX_TOKENS)]
    pub bucket_capacity: usize,
    /// Number of concurrent worker tasks.
    // 120 workers per cpu suits IO-bound sessions
    #[builder(default = num_cpus::get() * 120)]
    pub workers: usize,
}

impl PacedExecutor {
    pub fn validate(&self) -> Result<()> {
        if self.stages.is_empty() {
            return Err(LoadError::InvalidConfig("at least one stage is required".into()));
        }
        if let Some(stage) = self
            .stages
            .iter()
            .find(|s| !s.target.is_finite() || s.target < 0.0)
        {
            return Err(LoadError::InvalidConfig(format!(
                "stage target must be a non-negative rate, got {}",
                stage.target
            )));
        }
        if self.tick.is_zero() {
            return Err(LoadError::InvalidConfig("tick must be greater than zero".into()));
        }
        if self.workers == 0 {
            return Err(LoadError::InvalidConfig("at least one worker is required".into()));
        }
        Ok(())
    }

    /// Sum of all stage durations.
    pub fn total_duration(&self) -> Duration {
        self.stages.iter().map(|s| s.duration).sum()
    }
}

impl<A, F, Fut> Executor<A, F, Fut> for PacedExecutor
where
    Self: Send + Sync + Sized,
    A: Aggregate + 'static,
    F: Fn() -> Fut + Send + Sync + Clone + 'static,
    Fut: Future<Output = A::Metric> + Send + 'static,
{
    type Error = LoadError;

    async fn exec(&self, scenario: &Scenario<A, F, Fut>) -> Result<A> {
        self.validate()?;
        let (ctx, shutdown_tx) = ExecutionContext::new();

        tracing::info!("Spawning token governor task...");
        let governor = tokio::spawn(token_governor_task(
            ctx.clone(),
            self.stages.clone(),
            self.tick,
            self.bucket_capacity.min(MAX_TOKENS),
        ));

        tracing::info!("Spawning {} workers...", self.workers);
        let handles = spawn_workers(ctx.clone(), self.workers, scenario.action.clone());

        tracing::info!(
            "Running scenario: {} for {:?}",
            scenario.name,
            self.total_duration()
        );
        tokio::select! {
            res = governor => {
                res?;
                tracing::info!("Governor finished, signaling shutdown...");
            }
            _ = interrupted() => {}
        }
        shutdown_tx.send_replace(true);
        ctx.tokens.close();

        tracing::info!("Retrieving data from workers...");
        let final_agg = merge_workers(join_all(handles).await);

        tracing::info!("Done running scenario: {}!", scenario.name);
        Ok(final_agg)
    }
}

#[cfg(feature = "internals")]
pub use internals::*;
use internals::*;

mod internals {
    use super::*;

    /// State shared by the governor and every worker.
    #[derive(Clone)]
    pub struct ExecutionContext {
        pub shutdown: Receiver<bool>,
        /// The token bucket. Workers acquire and forget permits; only the
        /// governor adds them.
        pub tokens: Arc<Semaphore>,
    }

    impl ExecutionContext {
        pub fn new() -> (Self, watch::Sender<bool>) {
            let (tx, rx) = watch::channel(false);
            (
                Self {
                    shutdown: rx,
                    tokens: Arc::new(Semaphore::new(0)),
                },
                tx,
            )
        }
    }

    /// Adds tokens to the bucket according to `stages`, returning once the
    /// last stage has elapsed or shutdown is signalled.
    pub async fn token_governor_task(
        ctx: ExecutionContext,
        stages: Vec<Stage>,
        tick: Duration,
        bucket_capacity: usize,
    ) {
        let ExecutionContext {
            tokens,
            mut shutdown,
        } = ctx;

        let main_task = async {
            let mut rate = 0.0;
            let mut fractional = 0.0;
            let n = stages.len();

            for (i, stage) in stages.into_iter().enumerate() {
                if stage.duration.is_zero() {
                    tracing::info!("Stage {}/{n}: jumping to {}/s", i + 1, stage.target);
                    rate = stage.target;
                    continue;
                }
                tracing::info!(
                    "Stage {}/{n}: {}/s -> {}/s over {:?}",
                    i + 1,
                    rate,
                    stage.target,
                    stage.duration
                );

                let stage_start = Instant::now();
                let mut next_tick = stage_start;
                let start_rate = rate;

                loop {
                    let elapsed = Instant::now().duration_since(stage_start);
                    if elapsed >= stage.duration {
                        break;
                    }
                    next_tick += tick;

                    let (add_total, f) = calc_token_limit(
                        elapsed,
                        stage.duration,
                        start_rate,
                        stage.target,
                        fractional,
                        tick,
                    );
                    fractional = f;

                    let avail = tokens.available_permits();
                    let add = add_total.min(bucket_capacity.saturating_sub(avail));
                    if add > 0 {
                        tokens.add_permits(add);
                    }
                    tokio::time::sleep_until(next_tick).await;
                }
                // next stage ramps from this stage's exact target
                rate = stage.target;
            }
        };

        tokio::select! {
            _ = main_task => {
                tracing::debug!("Governor finished all stages.");
            }
            _ = shutdown.wait_for(|stop| *stop) => {
                tracing::debug!("Governor received shutdown signal.");
            }
        };
    }

    /// Tokens to add this tick and the fractional remainder to carry.
    ///
    /// The result is clamped to `0..=MAX_TOKENS`.
    pub fn calc_token_limit(
        elapsed: Duration,
        stage_duration: Duration,
        start_rate: f64,
        end_rate: f64,
        fractional: f64,
        tick: Duration,
    ) -> (usize, f64) {
        let t = (elapsed.as_secs_f64() / stage_duration.as_secs_f64()).min(1.0);
        let tick_rate = start_rate + (end_rate - start_rate) * t;
        let add_f = tick_rate * tick.as_secs_f64() + fractional;

        let whole = add_f.floor();
        let fractional = add_f - whole;

        let add_total = if whole >= MAX_TOKENS as f64 {
            MAX_TOKENS
        } else if whole < 0.0 {
            0
        } else {
            whole as usize
        };

        (add_total, fractional)
    }

    /// Spawns `workers` tasks that each run the action once per token.
    pub fn spawn_workers<A, F, Fut>(
        ctx: ExecutionContext,
        workers: usize,
        action: F,
    ) -> WorkerHandles<A>
    where
        A: Aggregate + 'static,
        F: Fn() -> Fut + Send + Sync + Clone + 'static,
        Fut: Future<Output = A::Metric> + Send + 'static,
    {
        (0..workers)
            .map(|i| spawn_worker(ctx.clone(), i, action.clone()))
            .collect()
    }

    fn spawn_worker<A, F, Fut>(ctx: ExecutionContext, id: usize, action: F) -> JoinHandle<A>
    where
        A: Aggregate + 'static,
        F: Fn() -> Fut + Send + Sync + Clone + 'static,
        Fut: Future<Output = A::Metric> + Send + 'static,
    {
        let ExecutionContext {
            tokens,
            mut shutdown,
        } = ctx;

        tokio::spawn(async move {
            let mut agg = A::new();
            tracing::debug!("Worker {id} spawned.");

            let main_task = async {
                // acquire fails once the bucket is closed
                while let Ok(permit) = tokens.acquire().await {
                    permit.forget();
                    let metric = action().await;
                    agg.consume(&metric);
                }
            };

            tokio::select! {
                _ = main_task => {}
                _ = shutdown.wait_for(|stop| *stop) => {}
            };

            tracing::debug!("Worker {id} shutting down.");
            agg
        })
    }
}
