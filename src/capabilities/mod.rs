//! Which optional request fields a model accepts.
//!
//! Capabilities come from a static prefix table; the live catalog in
//! [`catalog`] only decides whether a model id exists at all. Drift between
//! the table and the provider is repaired by adaptive retry in `upstream`.

pub mod catalog;

pub use catalog::{ModelCatalog, DEFAULT_CATALOG_TTL};

use serde::Serialize;

/// Request dialect a model family speaks.
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ApiFlavor {
    /// Sampling models that take `temperature`.
    Standard,
    /// Reasoning models that reject sampling parameters.
    Reasoning,
}

/// Optional fields a model accepts.
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
pub struct ModelCapabilities {
    pub api_flavor: ApiFlavor,
    pub supports_temperature: bool,
    pub supports_web_search: bool,
}

impl ModelCapabilities {
    /// Capability set for ids the table does not know.
    pub const MINIMAL: Self = Self {
        api_flavor: ApiFlavor::Standard,
        supports_temperature: false,
        supports_web_search: false,
    };

    const fn standard(supports_web_search: bool) -> Self {
        Self {
            api_flavor: ApiFlavor::Standard,
            supports_temperature: true,
            supports_web_search,
        }
    }

    const fn reasoning(supports_web_search: bool) -> Self {
        Self {
            api_flavor: ApiFlavor::Reasoning,
            supports_temperature: false,
            supports_web_search,
        }
    }
}

/// Lowercase prefixes. Order does not matter; the longest match wins.
static CAPABILITY_TABLE: &[(&str, ModelCapabilities)] = &[
    ("gpt-3.5", ModelCapabilities::standard(false)),
    ("gpt-4", ModelCapabilities::standard(false)),
    ("gpt-4-turbo", ModelCapabilities::standard(false)),
    ("gpt-4o", ModelCapabilities::standard(true)),
    ("gpt-4o-mini", ModelCapabilities::standard(true)),
    ("gpt-4.1", ModelCapabilities::standard(true)),
    ("gpt-4.1-mini", ModelCapabilities::standard(true)),
    ("gpt-4.1-nano", ModelCapabilities::standard(false)),
    ("gpt-5", ModelCapabilities::reasoning(true)),
    ("gpt-5-mini", ModelCapabilities::reasoning(true)),
    ("gpt-5-nano", ModelCapabilities::reasoning(false)),
    ("gpt-5-chat", ModelCapabilities::standard(false)),
    ("o1", ModelCapabilities::reasoning(false)),
    ("o3", ModelCapabilities::reasoning(true)),
    ("o3-mini", ModelCapabilities::reasoning(false)),
    ("o4-mini", ModelCapabilities::reasoning(true)),
];

/// Resolve a model id to its capabilities.
///
/// Matching is case-insensitive on the longest table prefix, so
/// `gpt-4.1-nano-2025-04-14` picks up the `gpt-4.1-nano` row rather than
/// `gpt-4.1`. Unknown ids get [`ModelCapabilities::MINIMAL`].
pub fn resolve(model: &str) -> ModelCapabilities {
    let model = model.trim().to_ascii_lowercase();

    CAPABILITY_TABLE
        .iter()
        .filter(|(prefix, _)| model.starts_with(prefix))
        .max_by_key(|(prefix, _)| prefix.len())
        .map(|(_, caps)| *caps)
        .unwrap_or(ModelCapabilities::MINIMAL)
}
