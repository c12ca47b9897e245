//! The plugin contract: mandatory callbacks plus an explicit,
//! optional hook capability set. A mandatory async contract is kept separate from
//! pluggable policy, generalized here to ~15 lifecycle hooks. Every hook returns
//! `Result<T>` so the dispatcher in `hooks.rs` can apply one uniform fatal/recoverable
//! classification instead of special-casing infallible vs fallible hooks.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::error::Result;
use crate::model::{DependenciesView, DimensionResult, ProviderSelection, Section};

/// Context handed to `Plugin::create_prompt`.
pub struct PromptContext<'a> {
    pub dimension: &'a str,
    pub is_global: bool,
    /// Populated for a section dimension.
    pub section: Option<&'a Section>,
    pub section_index: Option<usize>,
    /// Populated for a global dimension.
    pub sections: Option<&'a [Section]>,
    pub dependencies: &'a DependenciesView,
    pub process_id: &'a str,
}

/// An optional section-rewriting transform attached to a global dimension.
#[async_trait]
pub trait SectionTransform: Send + Sync {
    /// Returns `Some(new_sections)` to replace the run's section vector, or `None` to
    /// leave it unchanged.
    async fn transform(
        &self,
        result: &DimensionResult,
        current_sections: &[Section],
    ) -> Result<Option<Vec<Section>>>;
}

/// Context passed to the skip-evaluation hooks.
pub struct SkipSectionContext<'a> {
    pub dimension: &'a str,
    pub section_index: usize,
    pub section: &'a Section,
    pub dependencies: &'a DependenciesView,
    pub global_results: &'a HashMap<String, DimensionResult>,
}

pub struct SkipGlobalContext<'a> {
    pub dimension: &'a str,
    pub sections: &'a [Section],
    pub dependencies: &'a DependenciesView,
    pub global_results: &'a HashMap<String, DimensionResult>,
}

/// Context passed to `before_dimension_execute` / `after_dimension_execute`.
pub struct DimensionExecuteContext<'a> {
    pub dimension: &'a str,
    pub is_global: bool,
    pub section_index: Option<usize>,
    pub duration_ms: Option<u64>,
    pub provider: Option<&'a str>,
}

/// The `~15`-hook lifecycle surface. Every hook has a documented default
/// (below) and a fatality classification applied by `hooks::HookDispatcher`, not by
/// this trait itself — `beforeProcessStart` and `defineDependencies` are fatal, the
/// rest recoverable.
#[async_trait]
pub trait HookSet: Send + Sync {
    /// Default: `undefined` (no override).
    async fn before_process_start(
        &self,
        _sections: &[Section],
        _metadata: &Value,
    ) -> Result<Option<(Vec<Section>, Value)>> {
        Ok(None)
    }

    /// Default: unchanged result.
    async fn after_process_complete(&self, result: Value) -> Result<Value> {
        Ok(result)
    }

    /// Default: `undefined` (propagate the original failure). `partial` is whatever
    /// the process driver had assembled into `ProcessResult` from state at the point
    /// of abort — results for units that had already completed before the failing one.
    async fn handle_process_failure(&self, _error: &str, _partial: &Value) -> Result<Option<Value>> {
        Ok(None)
    }

    /// Canonical dependency declaration. Default `{}` (no dependencies).
    async fn define_dependencies(&self) -> Result<HashMap<String, Vec<String>>> {
        Ok(HashMap::new())
    }

    /// Legacy alias, kept for plugins written against the older hook name. Only
    /// consulted when `define_dependencies` returns an empty map.
    async fn get_dependencies(&self) -> Result<Option<HashMap<String, Vec<String>>>> {
        Ok(None)
    }

    /// Default: incoming view, unchanged.
    async fn transform_dependencies(&self, view: DependenciesView) -> Result<DependenciesView> {
        Ok(view)
    }

    /// Default: `false`.
    async fn should_skip_section_dimension(&self, _ctx: SkipSectionContext<'_>) -> Result<bool> {
        Ok(false)
    }

    /// Default: `false`.
    async fn should_skip_global_dimension(&self, _ctx: SkipGlobalContext<'_>) -> Result<bool> {
        Ok(false)
    }

    async fn before_dimension_execute(&self, _ctx: &DimensionExecuteContext<'_>) -> Result<()> {
        Ok(())
    }

    async fn after_dimension_execute(&self, _ctx: &DimensionExecuteContext<'_>) -> Result<()> {
        Ok(())
    }

    /// Default: incoming request, unchanged.
    async fn before_provider_execute(&self, request: Value) -> Result<Value> {
        Ok(request)
    }

    /// Default: incoming response, unchanged.
    async fn after_provider_execute(&self, response: Value) -> Result<Value> {
        Ok(response)
    }

    /// Default: `{}` (no override of delay or request).
    async fn handle_retry(&self, _attempt: u32, _error: &str) -> Result<HashMap<String, Value>> {
        Ok(HashMap::new())
    }

    /// Default: `{}` (no override of the fallback request).
    async fn handle_provider_fallback(
        &self,
        _from: &str,
        _to: &str,
    ) -> Result<HashMap<String, Value>> {
        Ok(HashMap::new())
    }

    /// Default: `undefined`.
    async fn handle_dimension_failure(&self, _dimension: &str, _error: &str) -> Result<()> {
        Ok(())
    }

    /// Default: `undefined` (no rewrite).
    async fn transform_sections(&self, _sections: &[Section]) -> Result<Option<Vec<Section>>> {
        Ok(None)
    }

    /// Default: `undefined` (no merge-back).
    async fn finalize_results(
        &self,
        _result: &Value,
    ) -> Result<Option<HashMap<String, DimensionResult>>> {
        Ok(None)
    }
}

/// Callbacks recognized in `ProcessOptions`, distinct from plugin hooks: these are
/// caller-supplied observers, not plugin-authored behavior.
#[derive(Default, Clone)]
pub struct ProcessCallbacks {
    pub on_dimension_start: Option<Arc<dyn Fn(&str) + Send + Sync>>,
    pub on_dimension_complete: Option<Arc<dyn Fn(&str, &DimensionResult) + Send + Sync>>,
    pub on_section_start: Option<Arc<dyn Fn(usize) + Send + Sync>>,
    pub on_section_complete: Option<Arc<dyn Fn(usize, usize) + Send + Sync>>,
    pub on_error: Option<Arc<dyn Fn(&str, &str) + Send + Sync>>,
}

/// Plugin identity.
#[derive(Debug, Clone)]
pub struct PluginIdentity {
    pub id: String,
    pub name: String,
    pub description: String,
}

/// The plugin contract: identity, an ordered dimension catalog (supplied
/// separately via `Catalog`), mandatory prompt/provider-selection callbacks, and an
/// optional hook set.
#[async_trait]
pub trait Plugin: Send + Sync {
    fn identity(&self) -> PluginIdentity;

    async fn create_prompt(&self, ctx: PromptContext<'_>) -> Result<String>;

    async fn select_provider(
        &self,
        dimension: &str,
        section_index: Option<usize>,
    ) -> Result<ProviderSelection>;

    /// The optional hook capability set. Plugins that implement no hooks may return
    /// a `DefaultHooks` instance.
    fn hooks(&self) -> &dyn HookSet;
}

/// The documented-default hook set: every hook resolves to its standard no-op default.
#[derive(Default)]
pub struct DefaultHooks;

impl HookSet for DefaultHooks {}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn default_hooks_define_no_dependencies() {
        let hooks = DefaultHooks;
        let deps = hooks.define_dependencies().await.unwrap();
        assert!(deps.is_empty());
    }

    #[tokio::test]
    async fn default_hooks_never_skip() {
        let hooks = DefaultHooks;
        let sections = vec![Section::new("x")];
        let deps = DependenciesView::new();
        let globals = HashMap::new();
        let skip = hooks
            .should_skip_section_dimension(SkipSectionContext {
                dimension: "d",
                section_index: 0,
                section: &sections[0],
                dependencies: &deps,
                global_results: &globals,
            })
            .await
            .unwrap();
        assert!(!skip);
    }

    #[tokio::test]
    async fn default_hooks_pass_through_provider_request_and_response() {
        let hooks = DefaultHooks;
        let req = serde_json::json!({"input": "hi"});
        let passed = hooks.before_provider_execute(req.clone()).await.unwrap();
        assert_eq!(passed, req);
    }
}
