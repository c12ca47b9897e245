//! Process driver: `Engine` holds the validated configuration and dimension catalog;
//! `process()` runs one end-to-end batch: state init -> pre hook -> plan -> execute ->
//! finalize -> post hook, with a failure path on abort. Configuration validation happens
//! once, at construction, via a `*Config::builder()` idiom, not on every call.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::catalog::{Catalog, Dimension};
use crate::cost::{self, Costs, PricingTable};
use crate::error::{Error, Result};
use crate::executor::{ExecutionContext, TimeoutPolicy};
use crate::graph::{self, Analytics, JsonGraph, Plan};
use crate::hooks::HookDispatcher;
use crate::model::{DimensionResult, Scope, Section};
use crate::plugin::{Plugin, ProcessCallbacks};
use crate::provider::ProviderRegistry;
use crate::scheduler::Scheduler;
use crate::state::ProcessState;

/// Validated engine configuration.
pub struct EngineConfig {
    pub plugin: Arc<dyn Plugin>,
    pub registry: Arc<ProviderRegistry>,
    pub catalog: Catalog,
    pub concurrency: usize,
    pub max_retries: u32,
    pub retry_delay: Duration,
    pub continue_on_error: bool,
    pub timeout: Duration,
    pub dimension_timeouts: HashMap<String, Duration>,
    pub pricing: Option<PricingTable>,
}

/// Builder for `EngineConfig`.
pub struct EngineConfigBuilder {
    plugin: Arc<dyn Plugin>,
    registry: ProviderRegistry,
    dimensions: Vec<Dimension>,
    concurrency: usize,
    max_retries: u32,
    retry_delay: Duration,
    continue_on_error: bool,
    timeout: Duration,
    dimension_timeouts: HashMap<String, Duration>,
    pricing: Option<PricingTable>,
}

impl EngineConfigBuilder {
    pub fn new(plugin: Arc<dyn Plugin>) -> Self {
        EngineConfigBuilder {
            plugin,
            registry: ProviderRegistry::new(),
            dimensions: Vec::new(),
            concurrency: 5,
            max_retries: 3,
            retry_delay: Duration::from_millis(1_000),
            continue_on_error: true,
            timeout: Duration::from_millis(60_000),
            dimension_timeouts: HashMap::new(),
            pricing: None,
        }
    }

    pub fn dimensions(mut self, dimensions: Vec<Dimension>) -> Self {
        self.dimensions = dimensions;
        self
    }

    pub fn registry(mut self, registry: ProviderRegistry) -> Self {
        self.registry = registry;
        self
    }

    pub fn concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency;
        self
    }

    pub fn max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn retry_delay(mut self, retry_delay: Duration) -> Self {
        self.retry_delay = retry_delay;
        self
    }

    pub fn continue_on_error(mut self, continue_on_error: bool) -> Self {
        self.continue_on_error = continue_on_error;
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn dimension_timeout(mut self, dimension: impl Into<String>, timeout: Duration) -> Self {
        self.dimension_timeouts.insert(dimension.into(), timeout);
        self
    }

    pub fn pricing(mut self, pricing: PricingTable) -> Self {
        self.pricing = Some(pricing);
        self
    }

    /// Validates the assembled configuration:
    /// an empty provider registry or a non-positive concurrency are rejected here, at
    /// construction, rather than surfacing on the first `process()` call.
    pub fn build(self) -> Result<EngineConfig> {
        if self.registry.is_empty() {
            return Err(Error::configuration("no providers registered"));
        }
        if self.concurrency == 0 {
            return Err(Error::configuration("concurrency must be >= 1"));
        }
        if self.timeout.is_zero() {
            return Err(Error::configuration("timeout must be > 0"));
        }
        let catalog = Catalog::new(self.dimensions)?;
        Ok(EngineConfig {
            plugin: self.plugin,
            registry: Arc::new(self.registry),
            catalog,
            concurrency: self.concurrency,
            max_retries: self.max_retries,
            retry_delay: self.retry_delay,
            continue_on_error: self.continue_on_error,
            timeout: self.timeout,
            dimension_timeouts: self.dimension_timeouts,
            pricing: self.pricing,
        })
    }
}

/// One section's outcome in the final `ProcessResult`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SectionOutcome {
    pub section: Section,
    pub results: HashMap<String, DimensionResult>,
}

/// `{ sections, globalResults, transformedSections, costs? }`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessResult {
    pub sections: Vec<SectionOutcome>,
    pub global_results: HashMap<String, DimensionResult>,
    pub transformed_sections: Vec<Section>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub costs: Option<Costs>,
}

pub struct Engine {
    config: EngineConfig,
    /// Cached dependency graph for analytics; overwritten per `process` call, not
    /// retained as durable state.
    cached_deps: Mutex<Option<HashMap<String, Vec<String>>>>,
}

impl Engine {
    pub fn new(config: EngineConfig) -> Self {
        Engine {
            config,
            cached_deps: Mutex::new(None),
        }
    }

    pub fn catalog(&self) -> &Catalog {
        &self.config.catalog
    }

    /// Runs one end-to-end batch.
    #[tracing::instrument(skip_all, fields(sections = sections.len()))]
    pub async fn process(
        &self,
        sections: Vec<Section>,
        callbacks: ProcessCallbacks,
    ) -> Result<ProcessResult> {
        if sections.is_empty() {
            return Err(Error::EmptySections);
        }

        let dispatcher = Arc::new(HookDispatcher::new(self.config.plugin.clone(), callbacks));
        let state = Arc::new(ProcessState::new(sections, Value::Null));

        if let Some((new_sections, new_metadata)) = dispatcher
            .before_process_start(&state.sections_snapshot(), &state.metadata.read().clone())
            .await?
        {
            if !new_sections.is_empty() {
                state.replace_sections(new_sections);
            }
            *state.metadata.write() = new_metadata;
        }

        let deps = dispatcher.define_dependencies().await?;
        *self.cached_deps.lock() = Some(deps.clone());

        let plan = graph::plan(self.config.catalog.names(), &deps)?;

        let timeouts = TimeoutPolicy {
            default_timeout: self.config.timeout,
            overrides: self.config.dimension_timeouts.clone(),
        };

        let ctx = Arc::new(ExecutionContext {
            catalog: self.config.catalog.clone(),
            deps,
            plugin: self.config.plugin.clone(),
            dispatcher: dispatcher.clone(),
            registry: self.config.registry.clone(),
            state: state.clone(),
            max_retries: self.config.max_retries,
            retry_delay: self.config.retry_delay,
            timeouts,
        });

        let scheduler = Scheduler::new(self.config.concurrency);

        let mut aborted = false;
        for group in &plan.groups {
            let has_error = scheduler.run_group(&ctx, group).await;
            if has_error && !self.config.continue_on_error {
                aborted = true;
                break;
            }
        }

        if aborted {
            return self.handle_failure(&dispatcher, &state).await;
        }

        self.finalize(&dispatcher, &state).await
    }

    async fn handle_failure(&self, dispatcher: &HookDispatcher, state: &ProcessState) -> Result<ProcessResult> {
        let partial = build_process_result(state, None);
        let partial_value = serde_json::to_value(&partial).unwrap_or(Value::Null);
        let message = "process aborted: a dimension failed with continueOnError disabled";
        if let Some(replacement) = dispatcher.handle_process_failure(message, &partial_value).await {
            if let Ok(result) = serde_json::from_value::<ProcessResult>(replacement) {
                return Ok(result);
            }
        }
        Err(Error::configuration(message))
    }

    async fn finalize(
        &self,
        dispatcher: &HookDispatcher,
        state: &ProcessState,
    ) -> Result<ProcessResult> {
        let raw = build_process_result(state, None);
        let raw_value = serde_json::to_value(&raw).unwrap_or(Value::Null);

        if let Some(overrides) = dispatcher.finalize_results(&raw_value).await {
            merge_finalized(state, overrides);
        }

        let costs = self.config.pricing.as_ref().map(|pricing| {
            let sections = state.sections_snapshot();
            let mut pairs: Vec<(String, DimensionResult)> = state
                .global_results_snapshot()
                .into_iter()
                .collect();
            for (i, _) in sections.iter().enumerate() {
                for dim in self.config.catalog.names() {
                    if let Some(r) = state.section_result(i, dim) {
                        pairs.push((dim.clone(), r));
                    }
                }
            }
            cost::compute(pricing, pairs.iter().map(|(d, r)| (d.as_str(), r)))
        });

        let mut result = build_process_result(state, costs);

        let result_value = serde_json::to_value(&result).unwrap_or(Value::Null);
        let after_value = dispatcher.after_process_complete(result_value).await;
        if let Ok(replacement) = serde_json::from_value::<ProcessResult>(after_value) {
            result = replacement;
        }

        Ok(result)
    }

    /// Analytics over the most recently cached dependency graph: overwritten per
    /// `process` call, not retained beyond it.
    pub fn analytics(&self) -> Option<Analytics> {
        let deps = self.cached_deps.lock().clone()?;
        graph::analytics(self.config.catalog.names(), &deps).ok()
    }

    pub fn export_dot(&self) -> Option<String> {
        let deps = self.cached_deps.lock().clone()?;
        Some(graph::export_dot(
            self.config.catalog.names(),
            &deps,
            &self.scope_map(),
        ))
    }

    pub fn export_json(&self) -> Option<JsonGraph> {
        let deps = self.cached_deps.lock().clone()?;
        Some(graph::export_json(
            self.config.catalog.names(),
            &deps,
            &self.scope_map(),
        ))
    }

    fn scope_map(&self) -> HashMap<String, Scope> {
        self.config
            .catalog
            .names()
            .iter()
            .filter_map(|n| {
                self.config
                    .catalog
                    .config(n)
                    .ok()
                    .map(|c| (n.clone(), c.scope))
            })
            .collect()
    }

    pub fn plan(&self) -> Result<Plan> {
        let deps = self.cached_deps.lock().clone().unwrap_or_default();
        graph::plan(self.config.catalog.names(), &deps)
    }
}

fn build_process_result(state: &ProcessState, costs: Option<Costs>) -> ProcessResult {
    let sections = state.sections_snapshot();
    let outcomes = sections
        .iter()
        .enumerate()
        .map(|(i, section)| SectionOutcome {
            section: section.clone(),
            results: state
                .section_results
                .get(&i)
                .map(|slots| {
                    slots
                        .iter()
                        .map(|entry| (entry.key().clone(), entry.value().clone()))
                        .collect()
                })
                .unwrap_or_default(),
        })
        .collect();

    ProcessResult {
        sections: outcomes,
        global_results: state.global_results_snapshot(),
        transformed_sections: sections,
        costs,
    }
}

/// Merges `finalizeResults` overrides back into process state: keys of
/// the form `"<dim>_section_<i>"` route to section slots, bare `"<dim>"` to globals.
fn merge_finalized(state: &ProcessState, overrides: HashMap<String, DimensionResult>) {
    for (key, result) in overrides {
        if let Some(pos) = key.rfind("_section_") {
            let dim = key[..pos].to_string();
            let idx_str = &key[pos + "_section_".len()..];
            if let Ok(idx) = idx_str.parse::<usize>() {
                state.write_section_result(idx, &dim, result);
                continue;
            }
        }
        state.write_global_result(&key, result);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cost::ModelPricing;
    use crate::model::{ProviderRequest, ResultMetadata, TokenUsage};
    use crate::plugin::{DefaultHooks, HookSet, PluginIdentity};
    use crate::provider::Provider;
    use async_trait::async_trait;

    struct StubPlugin {
        hooks: DefaultHooks,
    }

    #[async_trait]
    impl Plugin for StubPlugin {
        fn identity(&self) -> PluginIdentity {
            PluginIdentity {
                id: "s".into(),
                name: "s".into(),
                description: "".into(),
            }
        }
        async fn create_prompt(&self, ctx: crate::plugin::PromptContext<'_>) -> Result<String> {
            Ok(ctx.dimension.to_string())
        }
        async fn select_provider(
            &self,
            _dimension: &str,
            _section_index: Option<usize>,
        ) -> Result<crate::model::ProviderSelection> {
            Ok(crate::model::ProviderSelection::new("priced"))
        }
        fn hooks(&self) -> &dyn HookSet {
            &self.hooks
        }
    }

    struct PricedProvider;

    #[async_trait]
    impl Provider for PricedProvider {
        fn name(&self) -> &str {
            "priced"
        }
        async fn execute(&self, _request: ProviderRequest) -> crate::model::ProviderResponse {
            crate::model::ProviderResponse {
                data: Some(serde_json::json!({"ok": true})),
                metadata: Some(ResultMetadata {
                    model: Some("gpt-test".to_string()),
                    tokens: Some(TokenUsage {
                        input_tokens: 10,
                        output_tokens: 10,
                        total_tokens: 20,
                    }),
                    ..Default::default()
                }),
                ..Default::default()
            }
        }
    }

    fn priced_registry() -> ProviderRegistry {
        let mut registry = ProviderRegistry::new();
        registry.register(std::sync::Arc::new(PricedProvider));
        registry
    }

    #[test]
    fn builder_rejects_empty_provider_registry() {
        let plugin: Arc<dyn Plugin> = Arc::new(StubPlugin { hooks: DefaultHooks });
        let err = EngineConfigBuilder::new(plugin).build().unwrap_err();
        assert!(matches!(err, Error::Configuration(_)));
    }

    #[test]
    fn builder_rejects_zero_concurrency() {
        let plugin: Arc<dyn Plugin> = Arc::new(StubPlugin { hooks: DefaultHooks });
        let err = EngineConfigBuilder::new(plugin)
            .registry(priced_registry())
            .concurrency(0)
            .build()
            .unwrap_err();
        assert!(matches!(err, Error::Configuration(_)));
    }

    #[tokio::test]
    async fn process_rejects_empty_sections() {
        let plugin: Arc<dyn Plugin> = Arc::new(StubPlugin { hooks: DefaultHooks });
        let config = EngineConfigBuilder::new(plugin)
            .registry(priced_registry())
            .dimensions(vec![Dimension::global("g")])
            .build()
            .unwrap();
        let engine = Engine::new(config);
        let err = engine.process(vec![], ProcessCallbacks::default()).await.unwrap_err();
        assert!(matches!(err, Error::EmptySections));
    }

    #[tokio::test]
    async fn costs_are_computed_when_pricing_is_configured() {
        let plugin: Arc<dyn Plugin> = Arc::new(StubPlugin { hooks: DefaultHooks });
        let mut models = HashMap::new();
        models.insert(
            "gpt-test".to_string(),
            ModelPricing {
                input_per_million: 1_000_000.0,
                output_per_million: 1_000_000.0,
            },
        );
        let config = EngineConfigBuilder::new(plugin)
            .registry(priced_registry())
            .dimensions(vec![Dimension::global("g")])
            .pricing(PricingTable {
                models,
                last_updated: None,
            })
            .build()
            .unwrap();
        let engine = Engine::new(config);
        let result = engine
            .process(vec![Section::new("x")], ProcessCallbacks::default())
            .await
            .unwrap();

        let costs = result.costs.expect("pricing was configured");
        assert_eq!(costs.total_tokens, 20);
        assert!((costs.total_cost - 20.0).abs() < 1e-9);
        assert_eq!(costs.by_dimension["g"].tokens, 20);
    }
}
