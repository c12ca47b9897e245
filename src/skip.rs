//! Skip Evaluator: consults the plugin's skip hooks and, when
//! asked to skip, produces a skip-marker `DimensionResult`.

use std::collections::HashMap;

use crate::hooks::HookDispatcher;
use crate::model::{DependenciesView, DimensionResult, Section};
use crate::plugin::{SkipGlobalContext, SkipSectionContext};

/// Returns `Some(skip_marker)` if the section dimension should be skipped, else `None`.
pub async fn evaluate_section(
    dispatcher: &HookDispatcher,
    dimension: &str,
    section_index: usize,
    section: &Section,
    dependencies: &DependenciesView,
    global_results: &HashMap<String, DimensionResult>,
) -> Option<DimensionResult> {
    let ctx = SkipSectionContext {
        dimension,
        section_index,
        section,
        dependencies,
        global_results,
    };
    if dispatcher.should_skip_section_dimension(ctx).await {
        Some(DimensionResult::skip("shouldSkipSectionDimension returned true"))
    } else {
        None
    }
}

/// Returns `Some(skip_marker)` if the global dimension should be skipped, else `None`.
pub async fn evaluate_global(
    dispatcher: &HookDispatcher,
    dimension: &str,
    sections: &[Section],
    dependencies: &DependenciesView,
    global_results: &HashMap<String, DimensionResult>,
) -> Option<DimensionResult> {
    let ctx = SkipGlobalContext {
        dimension,
        sections,
        dependencies,
        global_results,
    };
    if dispatcher.should_skip_global_dimension(ctx).await {
        Some(DimensionResult::skip("shouldSkipGlobalDimension returned true"))
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plugin::{DefaultHooks, Plugin, PluginIdentity, ProcessCallbacks, PromptContext};
    use crate::model::ProviderSelection;
    use crate::error::Result;
    use async_trait::async_trait;
    use std::sync::Arc;

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

        async fn create_prompt(&self, _ctx: PromptContext<'_>) -> Result<String> {
            Ok(String::new())
        }

        async fn select_provider(
            &self,
            _dimension: &str,
            _section_index: Option<usize>,
        ) -> Result<ProviderSelection> {
            Ok(ProviderSelection::new("noop"))
        }

        fn hooks(&self) -> &dyn crate::plugin::HookSet {
            static HOOKS: DefaultHooks = DefaultHooks;
            &HOOKS
        }
    }

    #[tokio::test]
    async fn default_hooks_never_skip_sections() {
        let dispatcher = HookDispatcher::new(Arc::new(StubPlugin), ProcessCallbacks::default());
        let section = Section::new("x");
        let deps = DependenciesView::new();
        let globals = HashMap::new();
        let result = evaluate_section(&dispatcher, "d", 0, &section, &deps, &globals).await;
        assert!(result.is_none());
    }
}
