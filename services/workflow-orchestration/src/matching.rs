//! Match Engine
//!
//! Resolves one BOM line item to ranked supplier-catalog candidates. Tiers
//! run in priority order and the first tier that produces candidates wins:
//!
//! 1. exact: normalized part number equality, confidence 1.0
//! 2. fuzzy: normalized part number containment either way, confidence 0.85
//! 3. semantic: description similarity at or above the configured floor
//!
//! Search failures never escape. A failing tier counts as empty and the next
//! tier is tried; total failure is the ordinary "no match" result.

use std::sync::Arc;
use thiserror::Error;
use tracing::warn;

use procura_database::{CatalogSearch, EmbeddingSearch};
use procura_models::{normalize_part_number, LineItem, MatchCandidate, MatchMethod, MatchResult};
use procura_utils::{MatchingConfig, ProcuraError};

pub const EXACT_CONFIDENCE: f64 = 1.0;
pub const FUZZY_CONFIDENCE: f64 = 0.85;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MatchError {
    #[error("Catalog search unavailable: {0}")]
    SearchUnavailable(String),

    #[error("Embedding search unavailable: {0}")]
    EmbeddingUnavailable(String),
}

impl MatchError {
    fn search(error: ProcuraError) -> Self {
        Self::SearchUnavailable(error.to_string())
    }

    fn embedding(error: ProcuraError) -> Self {
        Self::EmbeddingUnavailable(error.to_string())
    }
}

/// Turns a failed tier into an empty one.
pub trait DegradeToEmpty<T> {
    fn or_empty(self, tier: MatchMethod, line_number: u32) -> Vec<T>;
}

impl<T> DegradeToEmpty<T> for Result<Vec<T>, MatchError> {
    fn or_empty(self, tier: MatchMethod, line_number: u32) -> Vec<T> {
        self.unwrap_or_else(|error| {
            warn!(%tier, line_number, error = %error, "Match tier degraded to no candidates");
            Vec::new()
        })
    }
}

#[derive(Debug, Clone)]
pub struct MatchSettings {
    pub semantic_min_similarity: f64,
    pub semantic_top_k: usize,
    pub max_alternatives: usize,
}

impl From<&MatchingConfig> for MatchSettings {
    fn from(config: &MatchingConfig) -> Self {
        Self {
            semantic_min_similarity: config.semantic_min_similarity,
            semantic_top_k: config.semantic_top_k,
            max_alternatives: config.max_alternatives,
        }
    }
}

impl Default for MatchSettings {
    fn default() -> Self {
        Self::from(&MatchingConfig::default())
    }
}

pub struct MatchEngine {
    catalog: Arc<dyn CatalogSearch>,
    embeddings: Arc<dyn EmbeddingSearch>,
    settings: MatchSettings,
}

impl MatchEngine {
    pub fn new(catalog: Arc<dyn CatalogSearch>, embeddings: Arc<dyn EmbeddingSearch>, settings: MatchSettings) -> Self {
        Self {
            catalog,
            embeddings,
            settings,
        }
    }

    /// Ranks the winning tier's candidates into a `MatchResult`.
    #[tracing::instrument(skip(self, item), fields(line_number = item.line_number))]
    pub async fn match_item(&self, item: &LineItem) -> MatchResult {
        let line_number = item.line_number;
        let normalized = item
            .part_number_raw
            .as_deref()
            .map(normalize_part_number)
            .unwrap_or_default();

        if !normalized.is_empty() {
            let exact = self.exact(&normalized).await.or_empty(MatchMethod::Exact, line_number);
            if !exact.is_empty() {
                return self.rank(exact);
            }

            let fuzzy = self.fuzzy(&normalized).await.or_empty(MatchMethod::Fuzzy, line_number);
            if !fuzzy.is_empty() {
                return self.rank(fuzzy);
            }
        }

        let description = item.description_raw.as_deref().map(str::trim).unwrap_or_default();
        if description.is_empty() {
            return MatchResult::none();
        }

        let semantic = self
            .semantic(description)
            .await
            .or_empty(MatchMethod::Semantic, line_number);
        self.rank(semantic)
    }

    async fn exact(&self, normalized: &str) -> Result<Vec<MatchCandidate>, MatchError> {
        let offers = self
            .catalog
            .by_part_number(normalized)
            .await
            .map_err(MatchError::search)?;

        Ok(offers
            .iter()
            .filter(|offer| offer.normalized_numbers().iter().any(|n| n == normalized))
            .map(|offer| offer.to_candidate(EXACT_CONFIDENCE, MatchMethod::Exact))
            .collect())
    }

    async fn fuzzy(&self, normalized: &str) -> Result<Vec<MatchCandidate>, MatchError> {
        let offers = self
            .catalog
            .by_part_number_fragment(normalized)
            .await
            .map_err(MatchError::search)?;

        Ok(offers
            .iter()
            .map(|offer| offer.to_candidate(FUZZY_CONFIDENCE, MatchMethod::Fuzzy))
            .collect())
    }

    async fn semantic(&self, description: &str) -> Result<Vec<MatchCandidate>, MatchError> {
        let scored = self
            .embeddings
            .by_similarity(description, self.settings.semantic_top_k)
            .await
            .map_err(MatchError::embedding)?;

        Ok(scored
            .into_iter()
            .filter(|(_, similarity)| *similarity >= self.settings.semantic_min_similarity)
            .map(|(offer, similarity)| offer.to_candidate(similarity, MatchMethod::Semantic))
            .collect())
    }

    fn rank(&self, candidates: Vec<MatchCandidate>) -> MatchResult {
        MatchResult::from_ranked(candidates, self.settings.max_alternatives)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_degrade_to_empty() {
        let failed: Result<Vec<u32>, MatchError> = Err(MatchError::SearchUnavailable("down".to_string()));
        assert!(failed.or_empty(MatchMethod::Exact, 1).is_empty());

        let ok: Result<Vec<u32>, MatchError> = Ok(vec![7]);
        assert_eq!(ok.or_empty(MatchMethod::Fuzzy, 1), vec![7]);
    }

    #[test]
    fn test_settings_from_config() {
        let settings = MatchSettings::default();
        assert_eq!(settings.semantic_min_similarity, 0.5);
        assert_eq!(settings.semantic_top_k, 5);
        assert_eq!(settings.max_alternatives, 4);
    }
}
