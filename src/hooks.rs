//! Hook Dispatcher: single funnel for all ~15 plugin lifecycle
//! callbacks. Classifies each hook as fatal or recoverable, normalizes missing
//! implementations to their documented default, and reports recoverable failures via
//! `onError` instead of aborting the run.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;

use crate::error::{Error, Result};
use crate::model::{DependenciesView, DimensionResult, Section};
use crate::plugin::{
    DimensionExecuteContext, HookSet, Plugin, ProcessCallbacks, SkipGlobalContext,
    SkipSectionContext,
};

/// Wraps a plugin's hook set and the caller-supplied observer callbacks, applying the
/// fatal/recoverable hook classification uniformly.
pub struct HookDispatcher {
    plugin: Arc<dyn Plugin>,
    callbacks: ProcessCallbacks,
}

impl HookDispatcher {
    pub fn new(plugin: Arc<dyn Plugin>, callbacks: ProcessCallbacks) -> Self {
        HookDispatcher { plugin, callbacks }
    }

    fn hooks(&self) -> &dyn HookSet {
        self.plugin.hooks()
    }

    fn report(&self, context_tag: &str, err: &Error) {
        tracing::warn!(hook = context_tag, error = %err, "recoverable hook failure");
        if let Some(on_error) = &self.callbacks.on_error {
            on_error(context_tag, &err.to_string());
        }
    }

    pub fn on_error(&self, context_tag: &str, message: &str) {
        tracing::warn!(context = context_tag, message, "reported error");
        if let Some(on_error) = &self.callbacks.on_error {
            on_error(context_tag, message);
        }
    }

    // ---- fatal hooks ---------------------------------------------------

    pub async fn before_process_start(
        &self,
        sections: &[Section],
        metadata: &Value,
    ) -> Result<Option<(Vec<Section>, Value)>> {
        self.hooks()
            .before_process_start(sections, metadata)
            .await
            .map_err(|e| Error::hook("beforeProcessStart", e))
    }

    /// Canonical `defineDependencies`, falling back to the legacy `getDependencies`
    /// alias when the canonical hook yields nothing.
    pub async fn define_dependencies(&self) -> Result<HashMap<String, Vec<String>>> {
        let primary = self
            .hooks()
            .define_dependencies()
            .await
            .map_err(|e| Error::hook("defineDependencies", e))?;
        if !primary.is_empty() {
            return Ok(primary);
        }
        match self.hooks().get_dependencies().await {
            Ok(Some(legacy)) => Ok(legacy),
            Ok(None) => Ok(primary),
            Err(e) => {
                self.report("getDependencies", &e);
                Ok(primary)
            }
        }
    }

    // ---- recoverable hooks ----------------------------------------------

    pub async fn after_process_complete(&self, result: Value) -> Value {
        match self.hooks().after_process_complete(result.clone()).await {
            Ok(v) => v,
            Err(e) => {
                self.report("afterProcessComplete", &e);
                result
            }
        }
    }

    pub async fn handle_process_failure(&self, error: &str, partial: &Value) -> Option<Value> {
        match self.hooks().handle_process_failure(error, partial).await {
            Ok(v) => v,
            Err(e) => {
                self.report("handleProcessFailure", &e);
                None
            }
        }
    }

    pub async fn transform_dependencies(&self, view: DependenciesView) -> DependenciesView {
        let fallback = view.clone();
        match self.hooks().transform_dependencies(view).await {
            Ok(v) => v,
            Err(e) => {
                self.report("transformDependencies", &e);
                fallback
            }
        }
    }

    pub async fn should_skip_section_dimension(&self, ctx: SkipSectionContext<'_>) -> bool {
        let tag = format!("shouldSkipSectionDimension:{}", ctx.dimension);
        match self.hooks().should_skip_section_dimension(ctx).await {
            Ok(v) => v,
            Err(e) => {
                self.report(&tag, &e);
                false
            }
        }
    }

    pub async fn should_skip_global_dimension(&self, ctx: SkipGlobalContext<'_>) -> bool {
        let tag = format!("shouldSkipGlobalDimension:{}", ctx.dimension);
        match self.hooks().should_skip_global_dimension(ctx).await {
            Ok(v) => v,
            Err(e) => {
                self.report(&tag, &e);
                false
            }
        }
    }

    pub async fn before_dimension_execute(&self, ctx: &DimensionExecuteContext<'_>) {
        if let Err(e) = self.hooks().before_dimension_execute(ctx).await {
            self.report("beforeDimensionExecute", &e);
        }
    }

    pub async fn after_dimension_execute(&self, ctx: &DimensionExecuteContext<'_>) {
        if let Err(e) = self.hooks().after_dimension_execute(ctx).await {
            self.report("afterDimensionExecute", &e);
        }
    }

    pub async fn before_provider_execute(&self, request: Value) -> Value {
        let fallback = request.clone();
        match self.hooks().before_provider_execute(request).await {
            Ok(v) => v,
            Err(e) => {
                self.report("beforeProviderExecute", &e);
                fallback
            }
        }
    }

    pub async fn after_provider_execute(&self, response: Value) -> Value {
        let fallback = response.clone();
        match self.hooks().after_provider_execute(response).await {
            Ok(v) => v,
            Err(e) => {
                self.report("afterProviderExecute", &e);
                fallback
            }
        }
    }

    pub async fn handle_retry(&self, attempt: u32, error: &str) -> HashMap<String, Value> {
        match self.hooks().handle_retry(attempt, error).await {
            Ok(v) => v,
            Err(e) => {
                self.report("handleRetry", &e);
                HashMap::new()
            }
        }
    }

    pub async fn handle_provider_fallback(&self, from: &str, to: &str) -> HashMap<String, Value> {
        match self.hooks().handle_provider_fallback(from, to).await {
            Ok(v) => v,
            Err(e) => {
                self.report("handleProviderFallback", &e);
                HashMap::new()
            }
        }
    }

    pub async fn handle_dimension_failure(&self, dimension: &str, error: &str) {
        if let Err(e) = self.hooks().handle_dimension_failure(dimension, error).await {
            self.report("handleDimensionFailure", &e);
        }
    }

    pub async fn transform_sections(&self, sections: &[Section]) -> Option<Vec<Section>> {
        match self.hooks().transform_sections(sections).await {
            Ok(v) => v,
            Err(e) => {
                self.report("transformSections", &e);
                None
            }
        }
    }

    pub async fn finalize_results(
        &self,
        result: &Value,
    ) -> Option<HashMap<String, DimensionResult>> {
        match self.hooks().finalize_results(result).await {
            Ok(v) => v,
            Err(e) => {
                self.report("finalizeResults", &e);
                None
            }
        }
    }

    // ---- user-supplied process callbacks (not plugin hooks) -------------

    pub fn on_dimension_start(&self, dimension: &str) {
        if let Some(cb) = &self.callbacks.on_dimension_start {
            cb(dimension);
        }
    }

    pub fn on_dimension_complete(&self, dimension: &str, result: &DimensionResult) {
        if let Some(cb) = &self.callbacks.on_dimension_complete {
            cb(dimension, result);
        }
    }

    pub fn on_section_start(&self, index: usize) {
        if let Some(cb) = &self.callbacks.on_section_start {
            cb(index);
        }
    }

    pub fn on_section_complete(&self, index: usize, total: usize) {
        if let Some(cb) = &self.callbacks.on_section_complete {
            cb(index, total);
        }
    }
}
