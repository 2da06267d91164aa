use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::entities::article::Source;
use crate::error::MedlitError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Complexity {
    Simple,
    Moderate,
    Complex,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Intent {
    Lookup,
    Topic,
    Comparison,
    Mechanism,
    Clinical,
    Exploration,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RankingProfile {
    #[default]
    Balanced,
    Impact,
    Recency,
    Quality,
    Clinical,
    Comparison,
}

impl RankingProfile {
    pub fn from_flag(value: &str) -> Result<Self, MedlitError> {
        match value.trim().to_ascii_lowercase().as_str() {
            "balanced" => Ok(Self::Balanced),
            "impact" => Ok(Self::Impact),
            "recency" => Ok(Self::Recency),
            "quality" => Ok(Self::Quality),
            "clinical" => Ok(Self::Clinical),
            "comparison" => Ok(Self::Comparison),
            _ => Err(MedlitError::InvalidArgument(
                "Invalid ranking profile. Expected one of: balanced, impact, recency, quality, clinical, comparison".into(),
            )),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Balanced => "balanced",
            Self::Impact => "impact",
            Self::Recency => "recency",
            Self::Quality => "quality",
            Self::Clinical => "clinical",
            Self::Comparison => "comparison",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityType {
    Gene,
    Disease,
    Chemical,
    Species,
    Variant,
}

impl EntityType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Gene => "gene",
            Self::Disease => "disease",
            Self::Chemical => "chemical",
            Self::Species => "species",
            Self::Variant => "variant",
        }
    }
}

/// A free-text span resolved to a canonical biomedical entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolvedEntity {
    /// Span of the original query this entity was resolved from.
    pub text: String,
    /// Canonical name in the controlled vocabulary.
    pub name: String,
    pub entity_type: EntityType,
    /// External identifier, e.g. a MeSH or NCBI gene ID.
    pub entity_id: String,
    /// Resolver confidence in [0, 1].
    pub score: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalyzedQuery {
    pub original: String,
    pub normalized: String,
    #[serde(default)]
    pub entities: Vec<ResolvedEntity>,
    pub complexity: Complexity,
    pub intent: Intent,
    pub sources: Vec<Source>,
    pub ranking: RankingProfile,
    #[serde(default)]
    pub image_search_recommended: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExpansionKind {
    Synonym,
    MeshId,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Expansion {
    /// Canonical entity the expansion belongs to.
    pub entity: String,
    pub term: String,
    pub kind: ExpansionKind,
    /// confidence × entity weight; expansions are ranked by this.
    pub weight: f64,
}

/// Best-effort semantic expansion of an analyzed query. An empty expansion
/// list is a valid outcome.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnhancedQuery {
    pub analysis: AnalyzedQuery,
    #[serde(default)]
    pub expansions: Vec<Expansion>,
    /// Derived provider-specific query strings.
    #[serde(default)]
    pub source_queries: BTreeMap<Source, String>,
}

/// Declarative search filters shared by the search tools and the pipeline
/// `filter` action.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SearchFilters {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min_year: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_year: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub age_group: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sex: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub species: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub clinical_query: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub article_types: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min_citations: Option<u64>,
}

impl SearchFilters {
    pub fn validate(&self) -> Result<(), MedlitError> {
        if let (Some(min), Some(max)) = (self.min_year, self.max_year)
            && min > max
        {
            return Err(MedlitError::InvalidArgument(format!(
                "Impossible year range {min}-{max}. Example: year:2020-2025"
            )));
        }
        Ok(())
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

/// Per-request behavior toggles. Field defaults match the unified search
/// contract: deep search with OA links, analysis, scores, and relaxation
/// all on; preprints off.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchOptions {
    pub include_preprints: bool,
    pub deep_search: bool,
    pub peer_reviewed_only: bool,
    pub include_oa_links: bool,
    pub show_analysis: bool,
    pub include_similarity_scores: bool,
    pub auto_relax: bool,
}

impl Default for SearchOptions {
    fn default() -> Self {
        Self {
            include_preprints: false,
            deep_search: true,
            peer_reviewed_only: true,
            include_oa_links: true,
            show_analysis: true,
            include_similarity_scores: true,
            auto_relax: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ranking_profile_parses_supported_values() {
        assert_eq!(
            RankingProfile::from_flag("impact").expect("impact should parse"),
            RankingProfile::Impact
        );
        assert_eq!(
            RankingProfile::from_flag(" Clinical ").expect("clinical should parse"),
            RankingProfile::Clinical
        );
        assert!(RankingProfile::from_flag("best").is_err());
    }

    #[test]
    fn filters_reject_impossible_year_range() {
        let filters = SearchFilters {
            min_year: Some(2025),
            max_year: Some(2020),
            ..Default::default()
        };
        assert!(filters.validate().is_err());
    }

    #[test]
    fn default_options_enable_relaxation_and_oa() {
        let options = SearchOptions::default();
        assert!(options.auto_relax);
        assert!(options.include_oa_links);
        assert!(!options.include_preprints);
    }
}
