//! Types for the routing rule engine.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Coarse task category assigned to one request.
///
/// Variant order is the classification priority order: when a request
/// matches several domains, the earlier (more architecturally consequential)
/// one wins.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Domain {
    /// System design, refactoring across components.
    CodingArchitecture,
    /// Writing or fixing concrete code.
    CodingImplementation,
    /// Logic, math and analysis.
    Reasoning,
    /// Fiction, poetry and other creative writing.
    Creative,
    /// Docs, guides and summaries.
    Documentation,
    /// Reserved fallback when no domain reaches the match threshold.
    Unknown,
}

impl Domain {
    /// Classifiable domains in priority order. `Unknown` is never a candidate.
    pub const PRIORITY: [Domain; 5] = [
        Domain::CodingArchitecture,
        Domain::CodingImplementation,
        Domain::Reasoning,
        Domain::Creative,
        Domain::Documentation,
    ];

    /// Snake-case name used in configuration and logs.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Domain::CodingArchitecture => "coding_architecture",
            Domain::CodingImplementation => "coding_implementation",
            Domain::Reasoning => "reasoning",
            Domain::Creative => "creative",
            Domain::Documentation => "documentation",
            Domain::Unknown => "unknown",
        }
    }

    /// Architecture-class domains are always high stakes.
    #[must_use]
    pub const fn is_architecture_class(self) -> bool {
        matches!(self, Domain::CodingArchitecture)
    }
}

impl fmt::Display for Domain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Domain {
    type Err = RoutingError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "coding_architecture" => Ok(Domain::CodingArchitecture),
            "coding_implementation" => Ok(Domain::CodingImplementation),
            "reasoning" => Ok(Domain::Reasoning),
            "creative" => Ok(Domain::Creative),
            "documentation" => Ok(Domain::Documentation),
            "unknown" => Ok(Domain::Unknown),
            other => Err(RoutingError::Configuration(format!("Unknown domain: {other}"))),
        }
    }
}

/// Risk tier controlling how strictly output is validated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stakes {
    /// No validation.
    Low,
    /// Validate once at the end.
    Medium,
    /// Validate every block.
    High,
}

impl fmt::Display for Stakes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Stakes::Low => write!(f, "low"),
            Stakes::Medium => write!(f, "medium"),
            Stakes::High => write!(f, "high"),
        }
    }
}

/// How generated output is validated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValidationPolicy {
    /// One unvalidated block.
    None,
    /// One block, validated once.
    EndStage,
    /// Each logical unit validated before it is appended.
    BlockByBlock,
}

impl ValidationPolicy {
    /// Whether this policy needs a validator service.
    #[must_use]
    pub const fn requires_validator(self) -> bool {
        !matches!(self, ValidationPolicy::None)
    }
}

impl fmt::Display for ValidationPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValidationPolicy::None => write!(f, "none"),
            ValidationPolicy::EndStage => write!(f, "end_stage"),
            ValidationPolicy::BlockByBlock => write!(f, "block_by_block"),
        }
    }
}

/// Multimodal enrichment tool a request needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolTag {
    /// Optical character recognition.
    Ocr,
    /// Image captioning.
    Vision,
    /// Similarity search.
    Embeddings,
}

impl ToolTag {
    /// Name matching `EnrichmentProvider::tool`.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            ToolTag::Ocr => "ocr",
            ToolTag::Vision => "vision",
            ToolTag::Embeddings => "embeddings",
        }
    }
}

impl fmt::Display for ToolTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ToolTag {
    type Err = RoutingError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "ocr" => Ok(ToolTag::Ocr),
            "vision" => Ok(ToolTag::Vision),
            "embeddings" => Ok(ToolTag::Embeddings),
            other => Err(RoutingError::Configuration(format!("Unknown tool tag: {other}"))),
        }
    }
}

/// Ordered, normalised word tokens of one request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TokenSet(Vec<String>);

impl TokenSet {
    /// Tokens in input order, repeats kept.
    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }

    /// Number of tokens.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns `true` if there are no tokens.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<S: Into<String>> FromIterator<S> for TokenSet {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        Self(iter.into_iter().map(Into::into).collect())
    }
}

/// The routing outcome for one request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoutingDecision {
    /// Classified domain.
    pub domain: Domain,
    /// Risk tier.
    pub stakes: Stakes,
    /// Worker chosen for the domain.
    pub assigned_worker: String,
    /// Validation policy derived from the stakes.
    pub validation_policy: ValidationPolicy,
    /// Enrichment tools triggered by the request.
    pub required_tools: BTreeSet<ToolTag>,
    /// Sum of complexity and risk weights.
    pub stakes_score: u32,
}

/// Routing errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RoutingError {
    /// The rule tables are empty, so no domain can ever match.
    #[error("No domain match: routing tables are empty")]
    NoDomainMatch,

    /// The rule tables are malformed.
    #[error("Routing configuration error: {0}")]
    Configuration(String),
}

/// Result type for routing operations.
pub type Result<T> = std::result::Result<T, RoutingError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_domain_priority_matches_ord() {
        let mut sorted = Domain::PRIORITY;
        sorted.sort();
        assert_eq!(sorted, Domain::PRIORITY);
        assert!(Domain::Documentation < Domain::Unknown);
    }

    #[test]
    fn test_domain_round_trips_through_str() {
        for domain in Domain::PRIORITY {
            assert_eq!(domain.as_str().parse::<Domain>().unwrap(), domain);
        }
        assert!("cooking".parse::<Domain>().is_err());
    }

    #[test]
    fn test_policy_requires_validator() {
        assert!(!ValidationPolicy::None.requires_validator());
        assert!(ValidationPolicy::EndStage.requires_validator());
        assert!(ValidationPolicy::BlockByBlock.requires_validator());
    }

    #[test]
    fn test_decision_serializes_fixed_shape() {
        let decision = RoutingDecision {
            domain: Domain::Creative,
            stakes: Stakes::Low,
            assigned_worker: "mythomax_13b".to_string(),
            validation_policy: ValidationPolicy::None,
            required_tools: BTreeSet::from([ToolTag::Vision]),
            stakes_score: 0,
        };
        let json = serde_json::to_value(&decision).unwrap();
        assert_eq!(json["domain"], "creative");
        assert_eq!(json["validation_policy"], "none");
        assert_eq!(json["required_tools"], serde_json::json!(["vision"]));
    }
}
