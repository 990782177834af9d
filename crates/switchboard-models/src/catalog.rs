//! Static model catalog.
//!
//! One `ModelDescriptor` exists per known worker or validator model. The
//! catalog is built once at startup and never shrinks; the tier manager owns
//! the mutable placement fields of its own copy.

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::time::Duration;
use thiserror::Error;

use crate::tiers::Tier;

/// What a model is used for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelRole {
    /// Generative worker; competes for the single generative hot slot.
    Worker,
    /// Validator; pinned in the always-resident validator slot.
    Validator,
}

/// Descriptor of one known model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelDescriptor {
    /// Unique model name (e.g. `qwen_coder_32b`).
    pub name: String,
    /// Resident size in bytes.
    pub size_bytes: u64,
    /// Worker or validator.
    pub role: ModelRole,
    /// Current tier. Mutated only by the tier manager.
    pub tier: Tier,
    /// Logical access tick of the last placement touching this model.
    pub last_access_time: u64,
    /// Estimated cold-to-hot load time.
    pub load_cost_estimate: Duration,
    /// Next-smaller variant to try when loading this model fails.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fallback_variant: Option<String>,
}

impl ModelDescriptor {
    /// Creates a cold descriptor with no access history.
    #[must_use]
    pub fn new(name: impl Into<String>, size_bytes: u64, role: ModelRole) -> Self {
        Self {
            name: name.into(),
            size_bytes,
            role,
            tier: Tier::Cold,
            last_access_time: 0,
            load_cost_estimate: Duration::ZERO,
            fallback_variant: None,
        }
    }

    /// Shorthand for a worker descriptor.
    #[must_use]
    pub fn worker(name: impl Into<String>, size_bytes: u64) -> Self {
        Self::new(name, size_bytes, ModelRole::Worker)
    }

    /// Shorthand for a validator descriptor.
    #[must_use]
    pub fn validator(name: impl Into<String>, size_bytes: u64) -> Self {
        Self::new(name, size_bytes, ModelRole::Validator)
    }

    /// Sets the fallback variant.
    #[must_use]
    pub fn with_fallback_variant(mut self, variant: impl Into<String>) -> Self {
        self.fallback_variant = Some(variant.into());
        self
    }

    /// Sets the load cost estimate.
    #[must_use]
    pub fn with_load_cost(mut self, estimate: Duration) -> Self {
        self.load_cost_estimate = estimate;
        self
    }

    /// Returns `true` for generative workers.
    #[must_use]
    pub fn is_worker(&self) -> bool {
        self.role == ModelRole::Worker
    }
}

/// Errors raised while building a catalog.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CatalogError {
    /// The catalog has no entries.
    #[error("Model catalog is empty")]
    Empty,

    /// Two entries share a name.
    #[error("Duplicate model in catalog: {0}")]
    Duplicate(String),

    /// A model has zero size.
    #[error("Model '{0}' has zero size")]
    ZeroSize(String),

    /// A fallback variant points at an unknown model or at a validator.
    #[error("Model '{model}' names unknown fallback variant '{variant}'")]
    UnknownVariant {
        /// Model declaring the variant.
        model: String,
        /// The missing variant.
        variant: String,
    },

    /// Following fallback variants loops back to an earlier model.
    #[error("Fallback variants of '{0}' form a cycle")]
    VariantCycle(String),
}

/// Immutable catalog of known models, in registration order.
#[derive(Debug, Clone, Default)]
pub struct ModelCatalog {
    entries: Vec<ModelDescriptor>,
    index: HashMap<String, usize>,
}

impl ModelCatalog {
    /// Builds a catalog, checking names, sizes and variant references.
    ///
    /// # Errors
    /// Returns `CatalogError` if the catalog is empty or inconsistent.
    pub fn new(entries: Vec<ModelDescriptor>) -> Result<Self, CatalogError> {
        if entries.is_empty() {
            return Err(CatalogError::Empty);
        }

        let mut index = HashMap::with_capacity(entries.len());
        for (position, entry) in entries.iter().enumerate() {
            if entry.size_bytes == 0 {
                return Err(CatalogError::ZeroSize(entry.name.clone()));
            }
            if index.insert(entry.name.clone(), position).is_some() {
                return Err(CatalogError::Duplicate(entry.name.clone()));
            }
        }

        let catalog = Self { entries, index };
        for entry in &catalog.entries {
            if let Some(variant) = &entry.fallback_variant {
                match catalog.get(variant) {
                    Some(target) if target.is_worker() => {}
                    _ => {
                        return Err(CatalogError::UnknownVariant {
                            model: entry.name.clone(),
                            variant: variant.clone(),
                        });
                    }
                }
            }
            catalog.check_variant_cycle(&entry.name)?;
        }

        Ok(catalog)
    }

    fn check_variant_cycle(&self, name: &str) -> Result<(), CatalogError> {
        let mut seen = HashSet::from([name]);
        let mut current = self.get(name).and_then(|d| d.fallback_variant.as_deref());
        while let Some(next) = current {
            if !seen.insert(next) {
                return Err(CatalogError::VariantCycle(name.to_string()));
            }
            current = self.get(next).and_then(|d| d.fallback_variant.as_deref());
        }
        Ok(())
    }

    /// Looks up a descriptor by name.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&ModelDescriptor> {
        self.index.get(name).map(|&i| &self.entries[i])
    }

    /// Returns `true` if the model is known.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    /// All descriptors in registration order.
    pub fn iter(&self) -> impl Iterator<Item = &ModelDescriptor> {
        self.entries.iter()
    }

    /// Number of models in the catalog.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` if the catalog is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Fallback variants of `name`, nearest first, excluding `name` itself.
    ///
    /// Chains are acyclic once the catalog is built.
    #[must_use]
    pub fn variant_chain(&self, name: &str) -> Vec<String> {
        let mut chain: Vec<String> = Vec::new();
        let mut current = self.get(name).and_then(|d| d.fallback_variant.clone());
        while let Some(next) = current {
            if next == name || chain.contains(&next) {
                break;
            }
            current = self.get(&next).and_then(|d| d.fallback_variant.clone());
            chain.push(next);
        }
        chain
    }

    pub(crate) fn entries_mut(&mut self) -> impl Iterator<Item = &mut ModelDescriptor> {
        self.entries.iter_mut()
    }
}
