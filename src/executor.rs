//! Dimension Executor: end-to-end execution of one
//! (dimension, scope, maybe section) unit — build the dependencies view, build the
//! prompt, invoke the Backend Caller, record the result.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::backend::BackendCaller;
use crate::catalog::Catalog;
use crate::hooks::HookDispatcher;
use crate::model::{DependenciesView, DimensionResult, ProviderInput, ProviderRequest};
use crate::plugin::{DimensionExecuteContext, Plugin, PromptContext};
use crate::provider::ProviderRegistry;
use crate::skip;
use crate::state::ProcessState;

/// Per-dimension timeout resolution: `dimensionTimeouts[dim] ?? timeout`.
pub struct TimeoutPolicy {
    pub default_timeout: Duration,
    pub overrides: HashMap<String, Duration>,
}

impl TimeoutPolicy {
    pub fn for_dimension(&self, dimension: &str) -> Duration {
        self.overrides.get(dimension).copied().unwrap_or(self.default_timeout)
    }
}

/// Immutable bundle of everything a unit execution needs, shared across all concurrent
/// tasks in one `process` call.
pub struct ExecutionContext {
    pub catalog: Catalog,
    pub deps: HashMap<String, Vec<String>>,
    pub plugin: Arc<dyn Plugin>,
    pub dispatcher: Arc<HookDispatcher>,
    pub registry: Arc<ProviderRegistry>,
    pub state: Arc<ProcessState>,
    pub max_retries: u32,
    pub retry_delay: Duration,
    pub timeouts: TimeoutPolicy,
}

/// Resolves the prerequisites for `dimension` into a `DependenciesView`.
///
/// - section prerequisite of a section dimension -> that section's own result;
/// - global prerequisite -> the single global result, regardless of consumer scope;
/// - section prerequisite of a global dimension -> aggregated `{sections:[...]}`.
fn build_dependencies_view(
    catalog: &Catalog,
    deps: &HashMap<String, Vec<String>>,
    state: &ProcessState,
    dimension: &str,
    section_index: Option<usize>,
) -> DependenciesView {
    let mut view = HashMap::new();
    let Some(prereqs) = deps.get(dimension) else {
        return view;
    };
    for prereq in prereqs {
        let prereq_is_global = catalog.is_global(prereq).unwrap_or(false);
        let result = if prereq_is_global {
            state.global_result(prereq)
        } else {
            match section_index {
                Some(i) => state.section_result(i, prereq),
                None => Some(DimensionResult::aggregate_sections(
                    state.all_section_results(prereq),
                )),
            }
        };
        if let Some(r) = result {
            view.insert(prereq.clone(), r);
        }
    }
    view
}

pub async fn execute_section(
    ctx: &ExecutionContext,
    dimension: &str,
    section_index: usize,
) -> DimensionResult {
    let start = Instant::now();
    ctx.dispatcher.on_dimension_start(dimension);

    let section = ctx
        .state
        .sections_snapshot()
        .get(section_index)
        .cloned()
        .unwrap_or_default();

    let raw_view =
        build_dependencies_view(&ctx.catalog, &ctx.deps, &ctx.state, dimension, Some(section_index));
    let view = ctx.dispatcher.transform_dependencies(raw_view).await;

    let global_results = ctx.state.global_results_snapshot();
    if let Some(skip_result) = skip::evaluate_section(
        &ctx.dispatcher,
        dimension,
        section_index,
        &section,
        &view,
        &global_results,
    )
    .await
    {
        ctx.state.write_section_result(section_index, dimension, skip_result.clone());
        ctx.dispatcher.on_dimension_complete(dimension, &skip_result);
        return skip_result;
    }

    let before_ctx = DimensionExecuteContext {
        dimension,
        is_global: false,
        section_index: Some(section_index),
        duration_ms: None,
        provider: None,
    };
    ctx.dispatcher.before_dimension_execute(&before_ctx).await;

    let result = run_unit(
        ctx,
        dimension,
        PromptContext {
            dimension,
            is_global: false,
            section: Some(&section),
            section_index: Some(section_index),
            sections: None,
            dependencies: &view,
            process_id: &ctx.state.process_id,
        },
        Some(section_index),
        start,
    )
    .await;

    ctx.state.write_section_result(section_index, dimension, result.clone());

    let after_ctx = DimensionExecuteContext {
        dimension,
        is_global: false,
        section_index: Some(section_index),
        duration_ms: result.metadata().duration_ms,
        provider: result.metadata().provider.as_deref(),
    };
    ctx.dispatcher.after_dimension_execute(&after_ctx).await;
    ctx.dispatcher.on_dimension_complete(dimension, &result);
    result
}

pub async fn execute_global(ctx: &ExecutionContext, dimension: &str) -> DimensionResult {
    let start = Instant::now();
    ctx.dispatcher.on_dimension_start(dimension);

    let sections = ctx.state.sections_snapshot();

    let raw_view = build_dependencies_view(&ctx.catalog, &ctx.deps, &ctx.state, dimension, None);
    let view = ctx.dispatcher.transform_dependencies(raw_view).await;

    let global_results = ctx.state.global_results_snapshot();
    if let Some(skip_result) =
        skip::evaluate_global(&ctx.dispatcher, dimension, &sections, &view, &global_results).await
    {
        ctx.state.write_global_result(dimension, skip_result.clone());
        ctx.dispatcher.on_dimension_complete(dimension, &skip_result);
        return skip_result;
    }

    let before_ctx = DimensionExecuteContext {
        dimension,
        is_global: true,
        section_index: None,
        duration_ms: None,
        provider: None,
    };
    ctx.dispatcher.before_dimension_execute(&before_ctx).await;

    let result = run_unit(
        ctx,
        dimension,
        PromptContext {
            dimension,
            is_global: true,
            section: None,
            section_index: None,
            sections: Some(&sections),
            dependencies: &view,
            process_id: &ctx.state.process_id,
        },
        None,
        start,
    )
    .await;

    ctx.state.write_global_result(dimension, result.clone());

    let after_ctx = DimensionExecuteContext {
        dimension,
        is_global: true,
        section_index: None,
        duration_ms: result.metadata().duration_ms,
        provider: result.metadata().provider.as_deref(),
    };
    ctx.dispatcher.after_dimension_execute(&after_ctx).await;
    ctx.dispatcher.on_dimension_complete(dimension, &result);
    result
}

/// Shared tail of both execution paths: prompt -> provider selection -> Backend Caller.
async fn run_unit(
    ctx: &ExecutionContext,
    dimension: &str,
    prompt_ctx: PromptContext<'_>,
    section_index: Option<usize>,
    start: Instant,
) -> DimensionResult {
    let prompt = match ctx.plugin.create_prompt(prompt_ctx).await {
        Ok(p) => p,
        Err(e) => {
            let result = DimensionResult::err(e.to_string());
            ctx.dispatcher.handle_dimension_failure(dimension, &e.to_string()).await;
            return result;
        }
    };

    let selection = match ctx.plugin.select_provider(dimension, section_index).await {
        Ok(s) => s,
        Err(e) => {
            ctx.dispatcher.handle_dimension_failure(dimension, &e.to_string()).await;
            return DimensionResult::err(e.to_string());
        }
    };

    let request = ProviderRequest {
        input: ProviderInput::Single(prompt),
        options: selection.options.clone(),
        metadata: None,
        dimension: Some(dimension.to_string()),
    };

    let timeout = ctx.timeouts.for_dimension(dimension);
    let caller = BackendCaller::new(&ctx.registry, &ctx.dispatcher, ctx.max_retries, ctx.retry_delay);
    let mut result = caller.call_with_timeout(dimension, request, &selection, timeout).await;

    if result.is_error() {
        ctx.dispatcher
            .handle_dimension_failure(dimension, result.error_message().unwrap_or_default())
            .await;
    }

    // Wall-clock floor from prompt/selection overhead folds into the reported duration.
    if let DimensionResult::Ok { metadata, .. } | DimensionResult::Err { metadata, .. } = &mut result {
        metadata.duration_ms = Some(start.elapsed().as_millis().max(1) as u64);
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::Dimension;
    use crate::error::Result;
    use crate::model::{ProviderSelection, Section};
    use crate::plugin::{DefaultHooks, ProcessCallbacks};
    use crate::provider::Provider;
    use async_trait::async_trait;

    struct StubPlugin;

    #[async_trait]
    impl Plugin for StubPlugin {
        fn identity(&self) -> crate::plugin::PluginIdentity {
            crate::plugin::PluginIdentity {
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
            Ok(ProviderSelection::new("echo"))
        }
        fn hooks(&self) -> &dyn crate::plugin::HookSet {
            static HOOKS: DefaultHooks = DefaultHooks;
            &HOOKS
        }
    }

    struct EchoProvider;

    #[async_trait]
    impl Provider for EchoProvider {
        fn name(&self) -> &str {
            "echo"
        }
        async fn execute(&self, request: ProviderRequest) -> crate::model::ProviderResponse {
            let dim = request.dimension.unwrap_or_default();
            crate::model::ProviderResponse {
                data: Some(serde_json::json!({ "dim": dim })),
                ..Default::default()
            }
        }
    }

    fn test_context(catalog: Catalog, deps: HashMap<String, Vec<String>>, sections: Vec<Section>) -> ExecutionContext {
        let mut registry = ProviderRegistry::new();
        registry.register(Arc::new(EchoProvider));
        let plugin: Arc<dyn Plugin> = Arc::new(StubPlugin);
        let dispatcher = Arc::new(HookDispatcher::new(plugin.clone(), ProcessCallbacks::default()));
        ExecutionContext {
            catalog,
            deps,
            plugin,
            dispatcher,
            registry: Arc::new(registry),
            state: Arc::new(ProcessState::new(sections, serde_json::Value::Null)),
            max_retries: 0,
            retry_delay: Duration::from_millis(1),
            timeouts: TimeoutPolicy {
                default_timeout: Duration::from_secs(5),
                overrides: HashMap::new(),
            },
        }
    }

    #[test]
    fn dependencies_view_carries_this_sections_own_result_for_a_section_prereq() {
        let catalog = Catalog::new(vec![Dimension::section("a"), Dimension::section("b")]).unwrap();
        let state = ProcessState::new(vec![Section::new("x"), Section::new("y")], serde_json::Value::Null);
        state.write_section_result(0, "a", DimensionResult::ok(serde_json::json!({"n": 0})));
        state.write_section_result(1, "a", DimensionResult::ok(serde_json::json!({"n": 1})));

        let mut deps = HashMap::new();
        deps.insert("b".to_string(), vec!["a".to_string()]);

        let view = build_dependencies_view(&catalog, &deps, &state, "b", Some(1));
        assert_eq!(view["a"].data().unwrap()["n"], 1);
    }

    #[test]
    fn dependencies_view_aggregates_sections_for_a_global_consumer() {
        let catalog = Catalog::new(vec![Dimension::section("a"), Dimension::global("g")]).unwrap();
        let state = ProcessState::new(vec![Section::new("x"), Section::new("y")], serde_json::Value::Null);
        state.write_section_result(0, "a", DimensionResult::ok(serde_json::json!({"n": 0})));
        state.write_section_result(1, "a", DimensionResult::ok(serde_json::json!({"n": 1})));

        let mut deps = HashMap::new();
        deps.insert("g".to_string(), vec!["a".to_string()]);

        let view = build_dependencies_view(&catalog, &deps, &state, "g", None);
        let sections = view["a"].data().unwrap()["sections"].as_array().unwrap();
        assert_eq!(sections.len(), 2);
        assert_eq!(sections[0]["data"]["n"], 0);
        assert_eq!(sections[1]["data"]["n"], 1);
    }

    #[tokio::test]
    async fn execute_section_writes_its_own_result_slot() {
        let catalog = Catalog::new(vec![Dimension::section("a")]).unwrap();
        let ctx = test_context(catalog, HashMap::new(), vec![Section::new("x")]);
        let result = execute_section(&ctx, "a", 0).await;
        assert_eq!(result.data().unwrap()["dim"], "a");
        assert_eq!(
            ctx.state.section_result(0, "a").unwrap().data().unwrap()["dim"],
            "a"
        );
    }

    #[tokio::test]
    async fn execute_global_writes_the_global_result_slot() {
        let catalog = Catalog::new(vec![Dimension::global("g")]).unwrap();
        let ctx = test_context(catalog, HashMap::new(), vec![Section::new("x")]);
        let result = execute_global(&ctx, "g").await;
        assert_eq!(result.data().unwrap()["dim"], "g");
        assert_eq!(ctx.state.global_result("g").unwrap().data().unwrap()["dim"], "g");
    }
}
