//! Static rule tables for the routing engine.

use std::collections::{BTreeMap, HashMap, HashSet};

use super::types::{Domain, Result, RoutingError, ToolTag};

/// Indicator weights must fall in this range.
pub const WEIGHT_RANGE: std::ops::RangeInclusive<u32> = 1..=3;

/// Default fallback worker.
pub const DEFAULT_FALLBACK_WORKER: &str = "gpt_oss_20b";

/// Proficiency of one worker on one domain.
#[derive(Debug, Clone, PartialEq)]
pub struct Proficiency {
    /// Worker name.
    pub worker: String,
    /// Domain.
    pub domain: Domain,
    /// Score in `[0.0, 1.0]`.
    pub score: f64,
}

/// Immutable rule tables injected into the routing engine.
#[derive(Debug, Clone, PartialEq)]
pub struct RuleTables {
    /// Trigger words per domain.
    pub domain_keywords: BTreeMap<Domain, HashSet<String>>,
    /// Word weights contributing to the stakes score.
    pub complexity_indicators: HashMap<String, u32>,
    /// Word weights contributing to the stakes score.
    pub risk_indicators: HashMap<String, u32>,
    /// Proficiency entries in registration order.
    pub proficiency: Vec<Proficiency>,
    /// Trigger word to tool tag.
    pub tool_rules: HashMap<String, ToolTag>,
    /// Worker used when no proficiency entry covers a domain.
    pub fallback_worker: String,
}

fn words(list: &[&str]) -> HashSet<String> {
    list.iter().map(|w| (*w).to_string()).collect()
}

fn weights(list: &[(&str, u32)]) -> HashMap<String, u32> {
    list.iter().map(|(w, n)| ((*w).to_string(), *n)).collect()
}

impl RuleTables {
    /// Tables with nothing registered except the fallback worker.
    #[must_use]
    pub fn empty(fallback_worker: impl Into<String>) -> Self {
        Self {
            domain_keywords: BTreeMap::new(),
            complexity_indicators: HashMap::new(),
            risk_indicators: HashMap::new(),
            proficiency: Vec::new(),
            tool_rules: HashMap::new(),
            fallback_worker: fallback_worker.into(),
        }
    }

    /// The built-in reference rule base.
    #[must_use]
    pub fn reference() -> Self {
        let domain_keywords = BTreeMap::from([
            (
                Domain::CodingArchitecture,
                words(&[
                    "architecture",
                    "refactor",
                    "system",
                    "design",
                    "microservices",
                    "dependency",
                    "injection",
                    "pattern",
                    "patterns",
                    "scalability",
                    "modular",
                    "interface",
                    "component",
                    "components",
                    "decouple",
                ]),
            ),
            (
                Domain::CodingImplementation,
                words(&[
                    "python",
                    "rust",
                    "javascript",
                    "function",
                    "loop",
                    "code",
                    "implement",
                    "bug",
                    "fix",
                    "debug",
                    "class",
                    "method",
                    "script",
                    "compile",
                    "test",
                ]),
            ),
            (
                Domain::Reasoning,
                words(&[
                    "prove",
                    "proof",
                    "logic",
                    "math",
                    "reason",
                    "calculate",
                    "solve",
                    "deduce",
                    "theorem",
                    "puzzle",
                    "analyze",
                    "probability",
                    "why",
                ]),
            ),
            (
                Domain::Creative,
                words(&[
                    "creative",
                    "poem",
                    "story",
                    "fiction",
                    "novel",
                    "character",
                    "lyrics",
                    "narrative",
                    "imagine",
                    "fantasy",
                    "haiku",
                    "robot",
                ]),
            ),
            (
                Domain::Documentation,
                words(&[
                    "document",
                    "documentation",
                    "docs",
                    "readme",
                    "summarize",
                    "summary",
                    "guide",
                    "tutorial",
                    "explain",
                    "docstring",
                    "changelog",
                    "comments",
                ]),
            ),
        ]);

        let complexity_indicators = weights(&[
            ("optimize", 2),
            ("complex", 2),
            ("algorithm", 2),
            ("concurrent", 3),
            ("distributed", 3),
            ("scalable", 2),
            ("parallel", 2),
            ("microservices", 2),
            ("multithreaded", 3),
        ]);

        let risk_indicators = weights(&[
            ("production", 3),
            ("security", 3),
            ("payment", 3),
            ("critical", 3),
            ("migration", 2),
            ("database", 2),
            ("delete", 2),
            ("authentication", 2),
            ("encryption", 2),
        ]);

        let proficiency = [
            ("qwen_coder_32b", Domain::CodingArchitecture, 0.95),
            ("nemotron_30b", Domain::CodingArchitecture, 0.85),
            ("nemotron_30b", Domain::CodingImplementation, 0.93),
            ("qwen_coder_32b", Domain::CodingImplementation, 0.90),
            ("deepseek_r1_14b", Domain::CodingImplementation, 0.75),
            ("deepseek_r1_14b", Domain::Reasoning, 0.92),
            ("nemotron_30b", Domain::Reasoning, 0.80),
            ("gpt_oss_20b", Domain::Reasoning, 0.80),
            ("mythomax_13b", Domain::Creative, 0.94),
            ("gpt_oss_20b", Domain::Creative, 0.70),
            ("gpt_oss_20b", Domain::Documentation, 0.88),
            ("mythomax_13b", Domain::Documentation, 0.70),
        ]
        .into_iter()
        .map(|(worker, domain, score)| Proficiency { worker: worker.to_string(), domain, score })
        .collect();

        let tool_rules = [
            ("scan", ToolTag::Ocr),
            ("pdf", ToolTag::Ocr),
            ("ocr", ToolTag::Ocr),
            ("receipt", ToolTag::Ocr),
            ("image", ToolTag::Vision),
            ("photo", ToolTag::Vision),
            ("picture", ToolTag::Vision),
            ("screenshot", ToolTag::Vision),
            ("diagram", ToolTag::Vision),
            ("find", ToolTag::Embeddings),
            ("similar", ToolTag::Embeddings),
            ("search", ToolTag::Embeddings),
            ("related", ToolTag::Embeddings),
        ]
        .into_iter()
        .map(|(w, t)| (w.to_string(), t))
        .collect();

        Self {
            domain_keywords,
            complexity_indicators,
            risk_indicators,
            proficiency,
            tool_rules,
            fallback_worker: DEFAULT_FALLBACK_WORKER.to_string(),
        }
    }

    /// Registers a proficiency entry after all existing ones.
    #[must_use]
    pub fn with_proficiency(
        mut self,
        worker: impl Into<String>,
        domain: Domain,
        score: f64,
    ) -> Self {
        self.proficiency.push(Proficiency { worker: worker.into(), domain, score });
        self
    }

    /// Every worker the tables can route to, fallback last, without repeats.
    #[must_use]
    pub fn routable_workers(&self) -> Vec<&str> {
        let mut seen = Vec::new();
        for name in self
            .proficiency
            .iter()
            .map(|p| p.worker.as_str())
            .chain(std::iter::once(self.fallback_worker.as_str()))
        {
            if !seen.contains(&name) {
                seen.push(name);
            }
        }
        seen
    }

    /// Checks keywords, weights, scores and names.
    ///
    /// # Errors
    /// Returns `RoutingError::Configuration` for malformed tables.
    pub fn validate(&self) -> Result<()> {
        if self.fallback_worker.trim().is_empty() {
            return Err(RoutingError::Configuration(
                "fallback_worker must not be empty".to_string(),
            ));
        }

        if self.domain_keywords.values().all(HashSet::is_empty) {
            return Err(RoutingError::Configuration("domain_keywords is empty".to_string()));
        }

        if self.domain_keywords.contains_key(&Domain::Unknown) {
            return Err(RoutingError::Configuration(
                "the unknown domain cannot have keywords".to_string(),
            ));
        }

        for (table, entries) in [
            ("complexity_indicators", &self.complexity_indicators),
            ("risk_indicators", &self.risk_indicators),
        ] {
            if let Some((word, weight)) = entries.iter().find(|(_, w)| !WEIGHT_RANGE.contains(w)) {
                return Err(RoutingError::Configuration(format!(
                    "{table}: weight {weight} for '{word}' must be between 1 and 3"
                )));
            }
        }

        for entry in &self.proficiency {
            if !(0.0..=1.0).contains(&entry.score) {
                return Err(RoutingError::Configuration(format!(
                    "proficiency of '{}' on {} is {}; must be between 0.0 and 1.0",
                    entry.worker, entry.domain, entry.score
                )));
            }
            if entry.domain == Domain::Unknown {
                return Err(RoutingError::Configuration(format!(
                    "proficiency of '{}' registered for the unknown domain",
                    entry.worker
                )));
            }
        }

        Ok(())
    }
}

impl Default for RuleTables {
    fn default() -> Self {
        Self::reference()
    }
}
