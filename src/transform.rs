//! Transform Manager: applies the optional section-rewriting
//! transform attached to a global dimension (or the `transformSections` hook) and
//! resets per-section result storage when sections change.

use crate::catalog::Catalog;
use crate::hooks::HookDispatcher;
use crate::model::DimensionResult;
use crate::state::ProcessState;

/// Runs the transform (if any) for a completed global dimension. Global transforms
/// within one parallel group run sequentially in declaration order; the
/// caller is responsible for that ordering, this function handles one dimension.
pub async fn apply(
    catalog: &Catalog,
    dispatcher: &HookDispatcher,
    state: &ProcessState,
    dimension: &str,
    result: &DimensionResult,
) {
    let current = state.sections_snapshot();

    let outcome = if let Some(transform) = catalog.transform(dimension) {
        match transform.transform(result, &current).await {
            Ok(new_sections) => new_sections,
            Err(e) => {
                dispatcher.on_error(&format!("transform:{dimension}"), &e.to_string());
                None
            }
        }
    } else {
        dispatcher.transform_sections(&current).await
    };

    if let Some(new_sections) = outcome {
        if !new_sections.is_empty() {
            state.replace_sections(new_sections);
        }
    }
}
