use std::{future::Future, marker::PhantomData};

use typed_builder::TypedBuilder;

use crate::aggregate::Aggregate;

/// A named action to be driven by an [`crate::Executor`].
///
/// The action is called once per iteration and must be cheap to clone: every
/// worker gets its own copy.
///
/// ```rust,no_run
/// use knotter_load::{Scenario, SessionAggregate, Session, SessionKind};
///
/// # fn build() -> knotter_load::Result<()> {
/// let session = Session::new(SessionKind::Smoke, "http://localhost:8080")?;
/// let scenario = Scenario::<SessionAggregate, _, _>::builder()
///     .name("smoke")
///     .action(session.action(reqwest::Client::new()))
///     .build();
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone, TypedBuilder)]
pub struct Scenario<A, F, Fut>
where
    A: Aggregate,
    F: Fn() -> Fut + Send + Sync + Clone + 'static,
    Fut: Future<Output = A::Metric> + Send,
{
    #[builder(setter(into))]
    pub name: String,
    pub action: F,
    #[builder(default, setter(skip))]
    aggregator: PhantomData<A>,
}
