//! Deterministic rule engine turning tokens into a routing decision.

use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::tables::RuleTables;
use super::types::{
    Domain, Result, RoutingDecision, RoutingError, Stakes, TokenSet, ToolTag, ValidationPolicy,
};

/// Keyword matches a domain needs before it can be selected.
pub const DOMAIN_MATCH_THRESHOLD: usize = 2;

/// Stakes score at or above which a request is high stakes.
pub const HIGH_STAKES_SCORE: u32 = 5;

/// Stakes score at or above which a request is medium stakes.
pub const MEDIUM_STAKES_SCORE: u32 = 2;

/// Routing rule engine over immutable, shared tables.
///
/// Cloning is cheap and every operation is a pure function of the tokens and
/// the tables, so the engine is safe to share across concurrent requests
/// without locking.
#[derive(Debug, Clone)]
pub struct RuleEngine {
    tables: Arc<RuleTables>,
}

impl RuleEngine {
    /// Creates an engine over the given tables.
    #[must_use]
    pub fn new(tables: RuleTables) -> Self {
        Self { tables: Arc::new(tables) }
    }

    /// The tables this engine routes with.
    #[must_use]
    pub fn tables(&self) -> &RuleTables {
        &self.tables
    }

    /// First domain, in priority order, with at least two keyword matches.
    ///
    /// Every token occurrence counts, so a repeated keyword matches twice.
    #[must_use]
    pub fn classify_domain(&self, tokens: &TokenSet) -> Domain {
        for domain in Domain::PRIORITY {
            let Some(keywords) = self.tables.domain_keywords.get(&domain) else {
                continue;
            };
            let matches = tokens.iter().filter(|token| keywords.contains(*token)).count();
            if matches >= DOMAIN_MATCH_THRESHOLD {
                return domain;
            }
        }
        Domain::Unknown
    }

    /// Sum of complexity and risk weights over all tokens.
    ///
    /// A word present in both tables contributes both weights.
    #[must_use]
    pub fn calculate_stakes_score(&self, tokens: &TokenSet) -> u32 {
        tokens
            .iter()
            .map(|token| {
                self.tables.complexity_indicators.get(token).copied().unwrap_or(0)
                    + self.tables.risk_indicators.get(token).copied().unwrap_or(0)
            })
            .sum()
    }

    /// Stakes for a domain and score. Architecture-class domains are always high.
    #[must_use]
    pub const fn determine_stakes(domain: Domain, score: u32) -> Stakes {
        if domain.is_architecture_class() || score >= HIGH_STAKES_SCORE {
            Stakes::High
        } else if score >= MEDIUM_STAKES_SCORE {
            Stakes::Medium
        } else {
            Stakes::Low
        }
    }

    /// Worker with the strictly highest proficiency on `domain`.
    ///
    /// Ties go to the first-registered entry. Domains with no entries route to
    /// the fallback worker.
    #[must_use]
    pub fn select_best_model(&self, domain: Domain) -> &str {
        let mut best: Option<(&str, f64)> = None;
        for entry in self.tables.proficiency.iter().filter(|p| p.domain == domain) {
            if best.is_none_or(|(_, score)| entry.score > score) {
                best = Some((entry.worker.as_str(), entry.score));
            }
        }
        best.map_or(self.tables.fallback_worker.as_str(), |(worker, _)| worker)
    }

    /// Validation policy for a stakes tier.
    #[must_use]
    pub const fn determine_validation(stakes: Stakes) -> ValidationPolicy {
        match stakes {
            Stakes::High => ValidationPolicy::BlockByBlock,
            Stakes::Medium => ValidationPolicy::EndStage,
            Stakes::Low => ValidationPolicy::None,
        }
    }

    /// Union of tools whose trigger words appear in the tokens.
    #[must_use]
    pub fn detect_tools(&self, tokens: &TokenSet) -> BTreeSet<ToolTag> {
        tokens.iter().filter_map(|token| self.tables.tool_rules.get(token).copied()).collect()
    }

    /// Routes a request.
    ///
    /// # Errors
    /// Returns `NoDomainMatch` only when the keyword tables are empty; ordinary
    /// input that matches nothing routes to the `unknown` domain.
    pub fn route(&self, tokens: &TokenSet) -> Result<RoutingDecision> {
        if self.tables.domain_keywords.values().all(std::collections::HashSet::is_empty) {
            return Err(RoutingError::NoDomainMatch);
        }

        let domain = self.classify_domain(tokens);
        let stakes_score = self.calculate_stakes_score(tokens);
        let stakes = Self::determine_stakes(domain, stakes_score);
        let assigned_worker = self.select_best_model(domain).to_string();
        let validation_policy = Self::determine_validation(stakes);
        let required_tools = self.detect_tools(tokens);

        debug!(tokens = tokens.len(), domain = %domain, stakes_score, "Classified request");
        info!(
            domain = %domain,
            stakes = %stakes,
            worker = %assigned_worker,
            policy = %validation_policy,
            tools = ?required_tools,
            "Routing decision"
        );

        Ok(RoutingDecision {
            domain,
            stakes,
            assigned_worker,
            validation_policy,
            required_tools,
            stakes_score,
        })
    }

    /// Routes a request, degrading to a conservative decision on failure.
    ///
    /// The degraded decision sends the request to the fallback worker with
    /// end-stage validation and similarity search context.
    #[must_use]
    pub fn route_or_fallback(&self, tokens: &TokenSet) -> RoutingDecision {
        self.route(tokens).unwrap_or_else(|error| {
            warn!(
                error = %error,
                worker = %self.tables.fallback_worker,
                "Routing degraded to fallback"
            );
            self.fallback_decision()
        })
    }

    /// The degraded decision used when routing fails.
    #[must_use]
    pub fn fallback_decision(&self) -> RoutingDecision {
        RoutingDecision {
            domain: Domain::Unknown,
            stakes: Stakes::Medium,
            assigned_worker: self.tables.fallback_worker.clone(),
            validation_policy: ValidationPolicy::EndStage,
            required_tools: BTreeSet::from([ToolTag::Embeddings]),
            stakes_score: 0,
        }
    }
}

impl Default for RuleEngine {
    fn default() -> Self {
        Self::new(RuleTables::reference())
    }
}
