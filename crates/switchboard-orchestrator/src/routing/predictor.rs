//! Advisory prediction of the next worker to stage in the warm tier.
//!
//! Predictions only decide what to preload; a wrong guess costs a wasted
//! transfer, never a wrong answer.

use std::collections::HashMap;
use std::sync::Arc;

use super::engine::RuleEngine;
use super::types::Domain;

/// Number of trailing history entries a look-back pattern matches.
pub const PATTERN_LEN: usize = 3;

/// Successor and look-back tables.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PredictionTables {
    /// Domain most likely to follow each domain.
    pub successors: HashMap<Domain, Domain>,
    /// Registered look-back patterns over the last three domains.
    pub patterns: HashMap<[Domain; PATTERN_LEN], Domain>,
}

impl PredictionTables {
    /// Built-in reference tables.
    #[must_use]
    pub fn reference() -> Self {
        Self::default()
            .with_successor(Domain::CodingArchitecture, Domain::CodingImplementation)
            .with_successor(Domain::CodingImplementation, Domain::Documentation)
            .with_successor(Domain::Reasoning, Domain::CodingImplementation)
            .with_successor(Domain::Creative, Domain::Creative)
            .with_successor(Domain::Documentation, Domain::CodingImplementation)
            .with_pattern(
                [
                    Domain::CodingArchitecture,
                    Domain::CodingImplementation,
                    Domain::CodingImplementation,
                ],
                Domain::CodingArchitecture,
            )
            .with_pattern(
                [Domain::Creative, Domain::Creative, Domain::Documentation],
                Domain::Creative,
            )
    }

    /// Adds or replaces a successor entry.
    #[must_use]
    pub fn with_successor(mut self, from: Domain, to: Domain) -> Self {
        self.successors.insert(from, to);
        self
    }

    /// Adds or replaces a look-back pattern.
    #[must_use]
    pub fn with_pattern(mut self, history: [Domain; PATTERN_LEN], next: Domain) -> Self {
        self.patterns.insert(history, next);
        self
    }
}

/// Predicts the worker a future request is likely to need.
#[derive(Debug, Clone)]
pub struct NextWorkerPredictor {
    engine: RuleEngine,
    tables: Arc<PredictionTables>,
}

impl NextWorkerPredictor {
    /// Creates a predictor resolving domains to workers through `engine`.
    #[must_use]
    pub fn new(engine: RuleEngine, tables: PredictionTables) -> Self {
        Self { engine, tables: Arc::new(tables) }
    }

    /// Predicts the next worker after a request in `domain`.
    ///
    /// `history` holds recent domains, oldest first, including the current
    /// request. A registered pattern over its last three entries wins;
    /// otherwise the successor of `domain` is used; otherwise the worker most
    /// often selected over the history (ties to the most recent).
    #[must_use]
    pub fn predict_next(&self, domain: Domain, history: &[Domain]) -> Option<String> {
        let pattern_hit = history
            .len()
            .checked_sub(PATTERN_LEN)
            .and_then(|start| <[Domain; PATTERN_LEN]>::try_from(&history[start..]).ok())
            .and_then(|window| self.tables.patterns.get(&window).copied());

        if let Some(next) = pattern_hit.or_else(|| self.tables.successors.get(&domain).copied()) {
            return Some(self.engine.select_best_model(next).to_string());
        }

        self.most_frequent_worker(history)
    }

    fn most_frequent_worker(&self, history: &[Domain]) -> Option<String> {
        let mut counts: HashMap<&str, (usize, usize)> = HashMap::new();
        for (position, domain) in history.iter().enumerate() {
            let worker = self.engine.select_best_model(*domain);
            let entry = counts.entry(worker).or_insert((0, position));
            entry.0 += 1;
            entry.1 = position;
        }
        counts
            .into_iter()
            .max_by_key(|(_, (count, last_seen))| (*count, *last_seen))
            .map(|(worker, _)| worker.to_string())
    }
}
