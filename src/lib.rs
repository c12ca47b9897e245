//! `dimflow`: a DAG execution engine that orchestrates calls to external
//! text-completion services across a batch of sections.
//!
//! A plugin declares a catalog of named *dimensions* (units of work), a dependency
//! graph between them, and per-dimension prompt/provider-selection callbacks. The
//! engine compiles the graph into parallel execution groups, runs section-scoped and
//! global-scoped dimensions under a bounded concurrency budget, retries and falls back
//! on transient backend failures, and returns a result keyed by dimension and section.

pub mod backend;
pub mod catalog;
pub mod cost;
pub mod engine;
pub mod error;
pub mod executor;
pub mod graph;
pub mod hooks;
pub mod model;
pub mod plugin;
pub mod provider;
pub mod scheduler;
pub mod skip;
pub mod state;
pub mod transform;

pub use catalog::{Catalog, Dimension, DimensionConfig};
pub use cost::{Costs, ModelPricing, PricingTable};
pub use engine::{Engine, EngineConfig, EngineConfigBuilder, ProcessResult, SectionOutcome};
pub use error::{Error, Result};
pub use graph::{Analytics, JsonGraph, Plan};
pub use model::{
    DependenciesView, DimensionResult, ProviderInput, ProviderRequest, ProviderResponse,
    ProviderSelection, ResultMetadata, Scope, Section, TokenUsage,
};
pub use plugin::{
    DefaultHooks, DimensionExecuteContext, HookSet, Plugin, PluginIdentity, ProcessCallbacks,
    PromptContext, SectionTransform, SkipGlobalContext, SkipSectionContext,
};
pub use provider::{Provider, ProviderRegistry};
