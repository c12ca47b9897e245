//! Scheduler: iterates parallel groups, splits each into
//! global and section halves, and enforces the single global concurrency budget via a
//! shared `tokio::sync::Semaphore` across every group and scope in one `process` call.
//! Each group is fanned out with `tokio::spawn` and joined before moving to the next,
//! with a semaphore permit acquired per unit rather than a flat per-level spawn.

use std::collections::HashSet;
use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use crate::catalog::Catalog;
use crate::executor::{self, ExecutionContext};
use crate::hooks::HookDispatcher;
use crate::transform;

pub struct Scheduler {
    semaphore: Arc<Semaphore>,
}

impl Scheduler {
    pub fn new(concurrency: usize) -> Self {
        Scheduler {
            semaphore: Arc::new(Semaphore::new(concurrency)),
        }
    }

    /// Runs every parallel group in order, stopping early (per `continue_on_error`) is
    /// the driver's call, not the scheduler's — this just runs groups and reports
    /// whether any unit in the group failed, leaving the abort decision to the caller.
    pub async fn run(&self, ctx: Arc<ExecutionContext>, groups: &[Vec<String>]) -> bool {
        let mut any_error = false;
        for group in groups {
            if self.run_group(&ctx, group).await {
                any_error = true;
            }
        }
        any_error
    }

    /// Runs one parallel group: all global-scope members concurrently, their
    /// section-rewrite transforms (if any) sequentially in declaration order, then
    /// every section-scope member against every current section as independent units
    /// submitted to the shared bounded pool. Returns whether any unit in this
    /// group recorded an `error` result.
    pub async fn run_group(&self, ctx: &Arc<ExecutionContext>, group: &[String]) -> bool {
        let globals: Vec<String> = group
            .iter()
            .filter(|d| ctx.catalog.is_global(d).unwrap_or(false))
            .cloned()
            .collect();
        let sections: Vec<String> = group
            .iter()
            .filter(|d| !ctx.catalog.is_global(d).unwrap_or(false))
            .cloned()
            .collect();

        let globals_had_error = self.run_globals(ctx, &globals).await;
        let sections_had_error = self.run_sections(ctx, &sections).await;
        globals_had_error || sections_had_error
    }

    async fn run_globals(&self, ctx: &Arc<ExecutionContext>, globals: &[String]) -> bool {
        if globals.is_empty() {
            return false;
        }
        let mut join_set = JoinSet::new();
        for dimension in globals {
            let ctx = ctx.clone();
            let dimension = dimension.clone();
            let semaphore = self.semaphore.clone();
            join_set.spawn(async move {
                let _permit = semaphore.acquire_owned().await.expect("semaphore not closed");
                let result = executor::execute_global(&ctx, &dimension).await;
                (dimension, result)
            });
        }
        let mut results = Vec::with_capacity(globals.len());
        while let Some(joined) = join_set.join_next().await {
            if let Ok(pair) = joined {
                results.push(pair);
            }
        }
        // Declaration order, not completion order, for transform sequencing.
        results.sort_by_key(|(dimension, _)| globals.iter().position(|g| g == dimension));

        let had_error = results.iter().any(|(_, result)| result.is_error());
        apply_transforms(&ctx.catalog, &ctx.dispatcher, &ctx.state, &results).await;
        had_error
    }

    async fn run_sections(&self, ctx: &Arc<ExecutionContext>, dims: &[String]) -> bool {
        if dims.is_empty() {
            return false;
        }
        let total_sections = ctx.state.section_count();
        let section_indices: Vec<usize> = (0..total_sections).collect();

        for &i in &section_indices {
            ctx.dispatcher.on_section_start(i);
        }

        let touched: HashSet<usize> = section_indices.iter().copied().collect();
        let mut join_set = JoinSet::new();
        for dimension in dims {
            for &i in &section_indices {
                let ctx = ctx.clone();
                let dimension = dimension.clone();
                let semaphore = self.semaphore.clone();
                join_set.spawn(async move {
                    let _permit = semaphore.acquire_owned().await.expect("semaphore not closed");
                    executor::execute_section(&ctx, &dimension, i).await
                });
            }
        }
        let mut had_error = false;
        while let Some(joined) = join_set.join_next().await {
            if let Ok(result) = joined {
                had_error = had_error || result.is_error();
            }
        }

        for i in touched {
            ctx.dispatcher.on_section_complete(i, total_sections);
        }
        had_error
    }
}

async fn apply_transforms(
    catalog: &Catalog,
    dispatcher: &HookDispatcher,
    state: &crate::state::ProcessState,
    results: &[(String, crate::model::DimensionResult)],
) {
    for (dimension, result) in results {
        transform::apply(catalog, dispatcher, state, dimension, result).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{Catalog, Dimension};
    use crate::error::Result;
    use crate::executor::TimeoutPolicy;
    use crate::model::{ProviderRequest, ProviderResponse, ProviderSelection, Section};
    use crate::plugin::{DefaultHooks, Plugin, PluginIdentity, ProcessCallbacks, PromptContext};
    use crate::provider::{Provider, ProviderRegistry};
    use crate::state::ProcessState;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    struct StubPlugin;

    #[async_trait]
    impl Plugin for StubPlugin {
        fn identity(&self) -> PluginIdentity {
            PluginIdentity {
                id: "s".into(),
                name: "s".into(),
                description: "".into(),
            }
        }
        async fn create_prompt(&self, ctx: PromptContext<'_>) -> Result<String> {
            Ok(ctx.dimension.to_string())
        }
        async fn select_provider(
            &self,
            _dimension: &str,
            _section_index: Option<usize>,
        ) -> Result<ProviderSelection> {
            Ok(ProviderSelection::new("counting"))
        }
        fn hooks(&self) -> &dyn crate::plugin::HookSet {
            static HOOKS: DefaultHooks = DefaultHooks;
            &HOOKS
        }
    }

    /// Tracks the high-water mark of concurrently in-flight calls, to assert the
    /// configured concurrency bound is never exceeded.
    struct CountingProvider {
        in_flight: Arc<AtomicUsize>,
        peak: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl Provider for CountingProvider {
        fn name(&self) -> &str {
            "counting"
        }
        async fn execute(&self, _request: ProviderRequest) -> ProviderResponse {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(20)).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            ProviderResponse {
                data: Some(serde_json::json!({"ok": true})),
                ..Default::default()
            }
        }
    }

    #[tokio::test]
    async fn concurrency_bound_is_never_exceeded_across_a_group() {
        let peak = Arc::new(AtomicUsize::new(0));
        let in_flight = Arc::new(AtomicUsize::new(0));
        let mut registry = ProviderRegistry::new();
        registry.register(Arc::new(CountingProvider {
            in_flight: in_flight.clone(),
            peak: peak.clone(),
        }));

        let dims: Vec<Dimension> = (0..6).map(|i| Dimension::global(format!("g{i}"))).collect();
        let names: Vec<String> = dims.iter().map(|d| d.name.clone()).collect();
        let catalog = Catalog::new(dims).unwrap();

        let plugin: Arc<dyn Plugin> = Arc::new(StubPlugin);
        let dispatcher = Arc::new(HookDispatcher::new(plugin.clone(), ProcessCallbacks::default()));
        let state = Arc::new(ProcessState::new(vec![Section::new("x")], serde_json::Value::Null));
        let ctx = Arc::new(ExecutionContext {
            catalog,
            deps: std::collections::HashMap::new(),
            plugin,
            dispatcher,
            registry: Arc::new(registry),
            state,
            max_retries: 0,
            retry_delay: Duration::from_millis(1),
            timeouts: TimeoutPolicy {
                default_timeout: Duration::from_secs(5),
                overrides: std::collections::HashMap::new(),
            },
        });

        let scheduler = Scheduler::new(2);
        let had_error = scheduler.run_group(&ctx, &names).await;

        assert!(!had_error);
        assert!(peak.load(Ordering::SeqCst) <= 2, "peak concurrency exceeded the configured bound");
        for name in &names {
            assert!(ctx.state.global_result(name).is_some());
        }
    }

    struct FailingProvider;

    #[async_trait]
    impl Provider for FailingProvider {
        fn name(&self) -> &str {
            "counting"
        }
        async fn execute(&self, _request: ProviderRequest) -> ProviderResponse {
            ProviderResponse {
                error: Some("boom".into()),
                ..Default::default()
            }
        }
    }

    #[tokio::test]
    async fn run_group_reports_an_error_when_any_unit_fails() {
        let mut registry = ProviderRegistry::new();
        registry.register(Arc::new(FailingProvider));

        let catalog = Catalog::new(vec![Dimension::global("g")]).unwrap();
        let plugin: Arc<dyn Plugin> = Arc::new(StubPlugin);
        let dispatcher = Arc::new(HookDispatcher::new(plugin.clone(), ProcessCallbacks::default()));
        let state = Arc::new(ProcessState::new(vec![Section::new("x")], serde_json::Value::Null));
        let ctx = Arc::new(ExecutionContext {
            catalog,
            deps: std::collections::HashMap::new(),
            plugin,
            dispatcher,
            registry: Arc::new(registry),
            state,
            max_retries: 0,
            retry_delay: Duration::from_millis(1),
            timeouts: TimeoutPolicy {
                default_timeout: Duration::from_secs(5),
                overrides: std::collections::HashMap::new(),
            },
        });

        let scheduler = Scheduler::new(2);
        let had_error = scheduler.run_group(&ctx, &["g".to_string()]).await;
        assert!(had_error);
    }
}
