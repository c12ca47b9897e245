//! `ProcessState`: lifetime of one `process` call. Conceptually
//! single-owner (the driver), with narrow delegations to executors for their own result
//! slots. Guarded with `parking_lot`/`dashmap`, favoring concurrency-safe containers
//! over manual `std::sync::Mutex` plumbing, since slot writes are rare (O(units))
//! rather than hot.

use dashmap::DashMap;
use parking_lot::RwLock;
use serde_json::Value;
use uuid::Uuid;

use crate::model::{DimensionResult, Section};

/// Per-section result storage: section index → dimension name → result.
pub type SectionResults = DashMap<usize, DashMap<String, DimensionResult>>;

pub struct ProcessState {
    pub process_id: String,
    pub started_at: chrono::DateTime<chrono::Utc>,
    pub metadata: RwLock<Value>,
    /// Current section vector; may be replaced wholesale by a global transform.
    pub sections: RwLock<Vec<Section>>,
    /// Immutable snapshot captured at process start.
    pub original_sections: Vec<Section>,
    pub global_results: DashMap<String, DimensionResult>,
    pub section_results: SectionResults,
}

impl ProcessState {
    pub fn new(sections: Vec<Section>, metadata: Value) -> Self {
        let original_sections = sections.clone();
        let section_results = DashMap::new();
        for i in 0..sections.len() {
            section_results.insert(i, DashMap::new());
        }
        ProcessState {
            process_id: Uuid::new_v4().to_string(),
            started_at: chrono::Utc::now(),
            metadata: RwLock::new(metadata),
            sections: RwLock::new(sections),
            original_sections,
            global_results: DashMap::new(),
            section_results,
        }
    }

    pub fn section_count(&self) -> usize {
        self.sections.read().len()
    }

    pub fn sections_snapshot(&self) -> Vec<Section> {
        self.sections.read().clone()
    }

    /// Replaces the section vector and reallocates empty result storage for the new
    /// indices, when a transform rewrites the sections mid-run. The original sections
    /// remain reachable via `original_sections` for the rest of the run.
    pub fn replace_sections(&self, new_sections: Vec<Section>) {
        self.section_results.clear();
        for i in 0..new_sections.len() {
            self.section_results.insert(i, DashMap::new());
        }
        *self.sections.write() = new_sections;
    }

    pub fn write_global_result(&self, dimension: &str, result: DimensionResult) {
        self.global_results.insert(dimension.to_string(), result);
    }

    pub fn write_section_result(&self, section_index: usize, dimension: &str, result: DimensionResult) {
        self.section_results
            .entry(section_index)
            .or_insert_with(DashMap::new)
            .insert(dimension.to_string(), result);
    }

    pub fn global_result(&self, dimension: &str) -> Option<DimensionResult> {
        self.global_results.get(dimension).map(|r| r.clone())
    }

    pub fn section_result(&self, section_index: usize, dimension: &str) -> Option<DimensionResult> {
        self.section_results
            .get(&section_index)
            .and_then(|slots| slots.get(dimension).map(|r| r.clone()))
    }

    /// All per-section results for `dimension` across the current section vector, in
    /// section-index order — used to build the aggregated `{sections:[...]}` view a
    /// global dimension sees when depending on a section dimension.
    pub fn all_section_results(&self, dimension: &str) -> Vec<DimensionResult> {
        let count = self.section_count();
        (0..count)
            .map(|i| {
                self.section_result(i, dimension)
                    .unwrap_or_else(|| DimensionResult::err(format!(
                        "no result recorded for dimension \"{dimension}\" on section {i}"
                    )))
            })
            .collect()
    }

    pub fn global_results_snapshot(&self) -> std::collections::HashMap<String, DimensionResult> {
        self.global_results
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_state_preallocates_empty_slots_per_section() {
        let state = ProcessState::new(vec![Section::new("a"), Section::new("b")], Value::Null);
        assert_eq!(state.section_count(), 2);
        assert!(state.section_result(0, "dim").is_none());
        assert!(state.section_result(1, "dim").is_none());
    }

    #[test]
    fn replace_sections_clears_and_reallocates_slots() {
        let state = ProcessState::new(vec![Section::new("a")], Value::Null);
        state.write_section_result(0, "dim", DimensionResult::ok(serde_json::json!(1)));
        state.replace_sections(vec![Section::new("x"), Section::new("y"), Section::new("z")]);
        assert_eq!(state.section_count(), 3);
        assert!(state.section_result(0, "dim").is_none());
        assert_eq!(state.original_sections.len(), 1);
    }

    #[test]
    fn global_result_round_trips() {
        let state = ProcessState::new(vec![Section::new("a")], Value::Null);
        state.write_global_result("g", DimensionResult::ok(serde_json::json!({"x": 1})));
        let got = state.global_result("g").unwrap();
        assert_eq!(got.data().unwrap()["x"], 1);
    }
}
