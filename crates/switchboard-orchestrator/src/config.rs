//! TOML configuration for the whole system.
//!
//! Every section has built-in defaults reproducing the reference rule base, so
//! an absent file or a partial one is valid. Configuration is validated once
//! at startup; a malformed table is fatal then and never at request time.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::Path;
use std::time::Duration;
use switchboard_models::{ModelCatalog, ModelDescriptor, ModelRole, TierConfig};
use thiserror::Error;

use crate::generation::GenerationConfig;
use crate::routing::{Domain, PredictionTables, Proficiency, RuleTables, ToolTag};

const GIB: u64 = 1024 * 1024 * 1024;

/// Workspace-relative location of the configuration file.
pub const CONFIG_FILE: &str = ".switchboard/config.toml";

/// Errors that can occur during configuration loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// I/O error reading the file.
    #[error("Failed to read configuration file: {0}")]
    Io(#[from] std::io::Error),

    /// TOML parsing error.
    #[error("Failed to parse TOML configuration: {0}")]
    Toml(#[from] toml::de::Error),

    /// Configuration validation error.
    #[error("Invalid configuration: {0}")]
    Validation(String),
}

/// Result type for configuration operations.
pub type Result<T> = std::result::Result<T, ConfigError>;

/// One `[[models]]` entry of the static catalog.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelEntry {
    /// Unique model name.
    pub name: String,
    /// Resident size in bytes.
    pub size_bytes: u64,
    /// `worker` or `validator`.
    #[serde(default = "default_role")]
    pub role: ModelRole,
    /// Next-smaller variant tried when loading this model fails.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fallback_variant: Option<String>,
}

fn default_role() -> ModelRole {
    ModelRole::Worker
}

/// One `[[routing.proficiency]]` entry. File order is registration order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProficiencyEntry {
    /// Worker name.
    pub worker: String,
    /// Domain name.
    pub domain: String,
    /// Score in `[0.0, 1.0]`.
    pub score: f64,
}

/// `[routing]` section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RoutingSection {
    /// Worker for domains without proficiency entries.
    pub fallback_worker: String,
    /// Domain name to trigger words.
    pub domain_keywords: BTreeMap<String, Vec<String>>,
    /// Word to weight (1-3).
    pub complexity_indicators: BTreeMap<String, u32>,
    /// Word to weight (1-3).
    pub risk_indicators: BTreeMap<String, u32>,
    /// Proficiency entries in registration order.
    pub proficiency: Vec<ProficiencyEntry>,
    /// Trigger word to tool tag.
    pub tool_rules: BTreeMap<String, String>,
}

impl Default for RoutingSection {
    fn default() -> Self {
        Self::from(&RuleTables::reference())
    }
}

impl From<&RuleTables> for RoutingSection {
    fn from(tables: &RuleTables) -> Self {
        let sorted = |words: &HashSet<String>| {
            let mut list: Vec<String> = words.iter().cloned().collect();
            list.sort();
            list
        };
        let weights = |table: &HashMap<String, u32>| {
            table.iter().map(|(w, n)| (w.clone(), *n)).collect::<BTreeMap<_, _>>()
        };

        Self {
            fallback_worker: tables.fallback_worker.clone(),
            domain_keywords: tables
                .domain_keywords
                .iter()
                .map(|(domain, words)| (domain.as_str().to_string(), sorted(words)))
                .collect(),
            complexity_indicators: weights(&tables.complexity_indicators),
            risk_indicators: weights(&tables.risk_indicators),
            proficiency: tables
                .proficiency
                .iter()
                .map(|p| ProficiencyEntry {
                    worker: p.worker.clone(),
                    domain: p.domain.as_str().to_string(),
                    score: p.score,
                })
                .collect(),
            tool_rules: tables
                .tool_rules
                .iter()
                .map(|(word, tool)| (word.clone(), tool.as_str().to_string()))
                .collect(),
        }
    }
}

/// One `[[prediction.patterns]]` entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PatternEntry {
    /// Three domains, oldest first.
    pub history: Vec<String>,
    /// Domain predicted to follow.
    pub next: String,
}

/// `[prediction]` section.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PredictionSection {
    /// Domain to successor domain.
    pub successors: BTreeMap<String, String>,
    /// Look-back patterns.
    pub patterns: Vec<PatternEntry>,
    /// Preloads of models cheaper than this to load cold are skipped.
    pub min_load_cost_ms: u64,
    /// Recent domains remembered for prediction.
    pub history_len: usize,
    /// Whether predictive preloading runs at all.
    pub enabled: bool,
}

impl Default for PredictionSection {
    fn default() -> Self {
        let reference = PredictionTables::reference();
        let mut patterns: Vec<PatternEntry> = reference
            .patterns
            .iter()
            .map(|(history, next)| PatternEntry {
                history: history.iter().map(|d| d.as_str().to_string()).collect(),
                next: next.as_str().to_string(),
            })
            .collect();
        patterns.sort_by(|a, b| a.history.cmp(&b.history));

        Self {
            successors: reference
                .successors
                .iter()
                .map(|(from, to)| (from.as_str().to_string(), to.as_str().to_string()))
                .collect(),
            patterns,
            min_load_cost_ms: 500,
            history_len: 16,
            enabled: true,
        }
    }
}

impl PredictionSection {
    /// Minimum load cost worth preloading.
    #[must_use]
    pub const fn min_load_cost(&self) -> Duration {
        Duration::from_millis(self.min_load_cost_ms)
    }
}

fn default_models() -> Vec<ModelEntry> {
    let entry = |name: &str, gib: u64, role: ModelRole, variant: Option<&str>| ModelEntry {
        name: name.to_string(),
        size_bytes: gib * GIB,
        role,
        fallback_variant: variant.map(str::to_string),
    };
    vec![
        entry("qwen_coder_32b", 19, ModelRole::Worker, Some("qwen_coder_14b")),
        entry("qwen_coder_14b", 9, ModelRole::Worker, None),
        entry("nemotron_30b", 18, ModelRole::Worker, None),
        entry("deepseek_r1_14b", 9, ModelRole::Worker, None),
        entry("mythomax_13b", 8, ModelRole::Worker, None),
        entry("gpt_oss_20b", 13, ModelRole::Worker, None),
        entry("phi4_validator", 9, ModelRole::Validator, None),
    ]
}

/// Top-level configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SwitchboardConfig {
    /// Loop limits.
    pub generation: GenerationConfig,
    /// Tier capacities and bandwidths.
    pub tiers: TierConfig,
    /// Static model catalog.
    pub models: Vec<ModelEntry>,
    /// Routing rule tables.
    pub routing: RoutingSection,
    /// Prefetch prediction tables.
    pub prediction: PredictionSection,
}

impl Default for SwitchboardConfig {
    fn default() -> Self {
        Self {
            generation: GenerationConfig::default(),
            tiers: TierConfig::default(),
            models: default_models(),
            routing: RoutingSection::default(),
            prediction: PredictionSection::default(),
        }
    }
}

impl SwitchboardConfig {
    /// Loads and validates configuration from a TOML file.
    ///
    /// # Errors
    /// Returns error if file cannot be read, parsed or validated.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    /// Loads `<root>/.switchboard/config.toml`, or defaults if it does not exist.
    ///
    /// # Errors
    /// Returns error if the file exists but cannot be read, parsed or validated.
    pub fn load_from_workspace(root: &Path) -> Result<Self> {
        let path = root.join(CONFIG_FILE);
        if path.exists() { Self::load(&path) } else { Ok(Self::default()) }
    }

    /// Parses and validates configuration from TOML text.
    ///
    /// # Errors
    /// Returns error if the text cannot be parsed or validated.
    pub fn from_toml(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Validates every section and the references between them.
    ///
    /// # Errors
    /// Returns `ConfigError::Validation` describing the first problem found.
    pub fn validate(&self) -> Result<()> {
        self.generation.validate().map_err(ConfigError::Validation)?;
        self.tiers.validate().map_err(|e| ConfigError::Validation(e.to_string()))?;

        let catalog = self.catalog()?;
        let tables = self.rule_tables()?;
        self.prediction_tables()?;

        for worker in tables.routable_workers() {
            match catalog.get(worker) {
                Some(descriptor) if descriptor.is_worker() => {}
                Some(_) => {
                    return Err(ConfigError::Validation(format!(
                        "routing names '{worker}', which is a validator"
                    )));
                }
                None => {
                    return Err(ConfigError::Validation(format!(
                        "routing names '{worker}', which is not in [[models]]"
                    )));
                }
            }
        }

        if self.prediction.history_len < crate::routing::PATTERN_LEN {
            return Err(ConfigError::Validation(format!(
                "prediction.history_len must be at least {}",
                crate::routing::PATTERN_LEN
            )));
        }

        Ok(())
    }

    /// Builds the static model catalog.
    ///
    /// # Errors
    /// Returns `ConfigError::Validation` if the catalog is inconsistent.
    pub fn catalog(&self) -> Result<ModelCatalog> {
        let descriptors = self
            .models
            .iter()
            .map(|entry| {
                let descriptor = ModelDescriptor::new(&entry.name, entry.size_bytes, entry.role)
                    .with_load_cost(self.tiers.load_cost(entry.size_bytes));
                match &entry.fallback_variant {
                    Some(variant) => descriptor.with_fallback_variant(variant),
                    None => descriptor,
                }
            })
            .collect();
        ModelCatalog::new(descriptors).map_err(|e| ConfigError::Validation(e.to_string()))
    }

    /// Builds the routing rule tables.
    ///
    /// # Errors
    /// Returns `ConfigError::Validation` for unknown domains, tools or bad weights.
    pub fn rule_tables(&self) -> Result<RuleTables> {
        let section = &self.routing;
        let mut tables = RuleTables::empty(section.fallback_worker.clone());

        for (domain, words) in &section.domain_keywords {
            let domain = parse_domain(domain)?;
            tables.domain_keywords.insert(domain, words.iter().map(|w| w.to_lowercase()).collect());
        }
        tables.complexity_indicators = lowercase_keys(&section.complexity_indicators);
        tables.risk_indicators = lowercase_keys(&section.risk_indicators);
        for entry in &section.proficiency {
            tables.proficiency.push(Proficiency {
                worker: entry.worker.clone(),
                domain: parse_domain(&entry.domain)?,
                score: entry.score,
            });
        }
        for (word, tool) in &section.tool_rules {
            let tool: ToolTag = tool.parse().map_err(|e: crate::routing::RoutingError| {
                ConfigError::Validation(e.to_string())
            })?;
            tables.tool_rules.insert(word.to_lowercase(), tool);
        }

        tables.validate().map_err(|e| ConfigError::Validation(e.to_string()))?;
        Ok(tables)
    }

    /// Builds the prediction tables.
    ///
    /// # Errors
    /// Returns `ConfigError::Validation` for unknown domains or malformed patterns.
    pub fn prediction_tables(&self) -> Result<PredictionTables> {
        let mut tables = PredictionTables::default();
        for (from, to) in &self.prediction.successors {
            tables = tables.with_successor(parse_domain(from)?, parse_domain(to)?);
        }
        for pattern in &self.prediction.patterns {
            let history = pattern
                .history
                .iter()
                .map(|d| parse_domain(d))
                .collect::<Result<Vec<Domain>>>()?;
            let history: [Domain; crate::routing::PATTERN_LEN] =
                history.try_into().map_err(|history: Vec<Domain>| {
                    ConfigError::Validation(format!(
                        "prediction pattern must name {} domains, got {}",
                        crate::routing::PATTERN_LEN,
                        history.len()
                    ))
                })?;
            tables = tables.with_pattern(history, parse_domain(&pattern.next)?);
        }
        Ok(tables)
    }
}

fn parse_domain(name: &str) -> Result<Domain> {
    name.parse().map_err(|e: crate::routing::RoutingError| ConfigError::Validation(e.to_string()))
}

fn lowercase_keys(table: &BTreeMap<String, u32>) -> HashMap<String, u32> {
    table.iter().map(|(w, n)| (w.to_lowercase(), *n)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config_is_valid() {
        let config = SwitchboardConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.generation.max_retries, 3);
        assert_eq!(config.rule_tables().unwrap(), RuleTables::reference());
        assert_eq!(config.prediction_tables().unwrap(), PredictionTables::reference());
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let config = SwitchboardConfig::from_toml(
            r#"
            [generation]
            max_retries = 5

            [tiers]
            warm_capacity_bytes = 1073741824
            "#,
        )
        .unwrap();
        assert_eq!(config.generation.max_retries, 5);
        assert_eq!(config.generation.max_blocks, 64);
        assert_eq!(config.tiers.warm_capacity_bytes, GIB);
        assert_eq!(config.models.len(), 7);
        assert_eq!(config.routing.fallback_worker, "gpt_oss_20b");
    }

    #[test]
    fn test_custom_routing_tables() {
        let config = SwitchboardConfig::from_toml(
            r#"
            [[models]]
            name = "tiny"
            size_bytes = 1024

            [[models]]
            name = "judge"
            size_bytes = 512
            role = "validator"

            [routing]
            fallback_worker = "tiny"
            domain_keywords = { creative = ["Poem", "story"] }
            complexity_indicators = {}
            risk_indicators = { production = 3 }
            tool_rules = { photo = "vision" }

            [[routing.proficiency]]
            worker = "tiny"
            domain = "creative"
            score = 0.5

            [prediction]
            successors = { creative = "documentation" }
            patterns = []
            "#,
        )
        .unwrap();

        let tables = config.rule_tables().unwrap();
        assert!(tables.domain_keywords[&Domain::Creative].contains("poem"));
        assert_eq!(tables.tool_rules["photo"], ToolTag::Vision);
        assert_eq!(tables.proficiency.len(), 1);
    }

    #[test]
    fn test_unknown_routing_worker_rejected() {
        let err = SwitchboardConfig::from_toml(
            r#"
            [routing]
            fallback_worker = "ghost"
            "#,
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::Validation(msg) if msg.contains("ghost")));
    }

    #[test]
    fn test_validator_as_worker_rejected() {
        let err = SwitchboardConfig::from_toml(
            r#"
            [routing]
            fallback_worker = "phi4_validator"
            "#,
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::Validation(msg) if msg.contains("validator")));
    }

    #[test]
    fn test_bad_domain_and_pattern_rejected() {
        let unknown_domain = "[routing.domain_keywords]\ncooking = [\"pan\"]";
        assert!(SwitchboardConfig::from_toml(unknown_domain).is_err());
        assert!(
            SwitchboardConfig::from_toml(
                "[[prediction.patterns]]\nhistory = [\"creative\"]\nnext = \"creative\""
            )
            .is_err()
        );
    }

    #[test]
    fn test_malformed_toml() {
        assert!(matches!(
            SwitchboardConfig::from_toml("[generation\nmax_retries = 3"),
            Err(ConfigError::Toml(_))
        ));
    }

    #[test]
    fn test_load_from_workspace() {
        let dir = tempfile::tempdir().unwrap();
        let defaults = SwitchboardConfig::load_from_workspace(dir.path()).unwrap();
        assert_eq!(defaults, SwitchboardConfig::default());

        let config_dir = dir.path().join(".switchboard");
        std::fs::create_dir_all(&config_dir).unwrap();
        let mut file = std::fs::File::create(config_dir.join("config.toml")).unwrap();
        writeln!(file, "[generation]\ntimeout_secs = 30").unwrap();

        let loaded = SwitchboardConfig::load_from_workspace(dir.path()).unwrap();
        assert_eq!(loaded.generation.timeout_secs, 30);
    }

    #[test]
    fn test_missing_file_is_io_error() {
        let err = SwitchboardConfig::load(Path::new("/nonexistent/switchboard.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::Io(_)));
    }
}
