use std::future::Future;

use crate::context::IterationContext;

/// User-supplied workload: one call to [`Scenario::run`] is one iteration.
///
/// `setup` runs once before any virtual user starts and `teardown` once after every
/// virtual user has stopped.
pub trait Scenario: Send + Sync + 'static {
    fn run(&self, ctx: IterationContext) -> impl Future<Output = anyhow::Result<()>> + Send;

    fn setup(&self) -> impl Future<Output = anyhow::Result<()>> + Send {
        async { Ok(()) }
    }

    fn teardown(&self) -> impl Future<Output = anyhow::Result<()>> + Send {
        async { Ok(()) }
    }
}

/// Adapts an async closure into a [`Scenario`] without setup or teardown.
#[derive(Debug, Clone)]
pub struct ScenarioFn<F>(F);

pub fn scenario_fn<F, Fut>(f: F) -> ScenarioFn<F>
where
    F: Fn(IterationContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send,
{
    ScenarioFn(f)
}

impl<F, Fut> Scenario for ScenarioFn<F>
where
    F: Fn(IterationContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send,
{
    fn run(&self, ctx: IterationContext) -> impl Future<Output = anyhow::Result<()>> + Send {
        (self.0)(ctx)
    }
}
