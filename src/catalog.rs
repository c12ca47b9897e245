//! Dimension Catalog: holds dimension definitions and lookup
//! helpers. A name appearing in `names()` is the only legal identity used elsewhere.

use std::collections::HashMap;
use std::sync::Arc;

use crate::error::{Error, Result};
use crate::model::Scope;
use crate::plugin::SectionTransform;

/// A declared dimension: name, scope, and (for globals only) an optional
/// section-rewrite transform.
#[derive(Clone)]
pub struct Dimension {
    pub name: String,
    pub scope: Scope,
    pub transform: Option<Arc<dyn SectionTransform>>,
}

impl Dimension {
    pub fn section(name: impl Into<String>) -> Self {
        Dimension {
            name: name.into(),
            scope: Scope::Section,
            transform: None,
        }
    }

    pub fn global(name: impl Into<String>) -> Self {
        Dimension {
            name: name.into(),
            scope: Scope::Global,
            transform: None,
        }
    }

    pub fn with_transform(mut self, transform: Arc<dyn SectionTransform>) -> Self {
        self.transform = transform.into();
        self
    }
}

/// Scope and transform-presence for one dimension, as returned by `Catalog::config`.
#[derive(Clone, Copy)]
pub struct DimensionConfig {
    pub scope: Scope,
    pub has_transform: bool,
}

/// Ordered collection of declared dimensions, indexed for O(1) lookup by name.
#[derive(Clone)]
pub struct Catalog {
    order: Vec<String>,
    by_name: HashMap<String, Dimension>,
}

impl Catalog {
    pub fn new(dimensions: Vec<Dimension>) -> Result<Self> {
        let mut order = Vec::with_capacity(dimensions.len());
        let mut by_name = HashMap::with_capacity(dimensions.len());
        for dim in dimensions {
            if dim.name.is_empty() {
                return Err(Error::configuration("dimension name must not be empty"));
            }
            if by_name.contains_key(&dim.name) {
                return Err(Error::configuration(format!(
                    "duplicate dimension name: {}",
                    dim.name
                )));
            }
            order.push(dim.name.clone());
            by_name.insert(dim.name.clone(), dim);
        }
        Ok(Catalog { order, by_name })
    }

    /// Declared names in declaration order — the only legal identity used elsewhere.
    pub fn names(&self) -> &[String] {
        &self.order
    }

    pub fn get(&self, name: &str) -> Result<&Dimension> {
        self.by_name
            .get(name)
            .ok_or_else(|| Error::UnknownDimension(name.to_string()))
    }

    pub fn is_global(&self, name: &str) -> Result<bool> {
        Ok(self.get(name)?.scope.is_global())
    }

    pub fn config(&self, name: &str) -> Result<DimensionConfig> {
        let dim = self.get(name)?;
        Ok(DimensionConfig {
            scope: dim.scope,
            has_transform: dim.transform.is_some(),
        })
    }

    pub fn contains(&self, name: &str) -> bool {
        self.by_name.contains_key(name)
    }

    pub fn transform(&self, name: &str) -> Option<Arc<dyn SectionTransform>> {
        self.by_name.get(name).and_then(|d| d.transform.clone())
    }
}
