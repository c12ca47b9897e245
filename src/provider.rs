//! External backend provider contract: a provider never returns a
//! Rust `Result` — failure is expressed in-band via `ProviderResponse.error`, so the
//! Result union in `model.rs` stays the engine's sole failure channel for dimension
//! outcomes. Follows the same `async_trait` tool-call trait shape used across this crate.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

use crate::error::{Error, Result};
use crate::model::{ProviderRequest, ProviderResponse};

/// A named backend. Concrete HTTP adapters are external collaborators implemented
/// against this trait, not part of this crate.
#[async_trait]
pub trait Provider: Send + Sync {
    fn name(&self) -> &str;

    async fn execute(&self, request: ProviderRequest) -> ProviderResponse;
}

/// Lookup table of providers by name, consulted by the Backend Caller (C5) to resolve
/// both the primary provider and any declared fallbacks.
#[derive(Clone, Default)]
pub struct ProviderRegistry {
    providers: HashMap<String, Arc<dyn Provider>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        ProviderRegistry {
            providers: HashMap::new(),
        }
    }

    pub fn register(&mut self, provider: Arc<dyn Provider>) -> &mut Self {
        self.providers.insert(provider.name().to_string(), provider);
        self
    }

    pub fn with(mut self, provider: Arc<dyn Provider>) -> Self {
        self.register(provider);
        self
    }

    pub fn get(&self, name: &str) -> Result<Arc<dyn Provider>> {
        self.providers
            .get(name)
            .cloned()
            .ok_or_else(|| Error::configuration(format!("unknown provider: {name}")))
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }

    pub fn len(&self) -> usize {
        self.providers.len()
    }
}
