//! The uniform contract every provider adapter implements, plus optional
//! capability interfaces. The dispatcher checks capabilities at runtime
//! before calling; adapters know nothing of each other.

use std::collections::HashMap;

use async_trait::async_trait;

use crate::entities::SearchHits;
use crate::entities::article::{CitationMetrics, Source, UnifiedArticle};
use crate::entities::query::SearchFilters;
use crate::error::MedlitError;

/// A bibliographic search provider emitting normalized records with
/// `source` set to its own key. Not-found is an empty result, never an
/// error; transient upstream failures surface as retryable errors.
#[async_trait]
pub trait SourceAdapter: Send + Sync {
    fn source(&self) -> Source;

    async fn search(
        &self,
        query: &str,
        limit: usize,
        filters: &SearchFilters,
    ) -> Result<SearchHits, MedlitError>;

    /// Single-record lookup by any ID this provider understands.
    async fn fetch(&self, _id: &str) -> Result<Option<UnifiedArticle>, MedlitError> {
        Ok(None)
    }

    fn related(&self) -> Option<&dyn RelatedCapability> {
        None
    }

    fn citing(&self) -> Option<&dyn CitingCapability> {
        None
    }

    fn references(&self) -> Option<&dyn ReferencesCapability> {
        None
    }

    fn metrics(&self) -> Option<&dyn MetricsCapability> {
        None
    }
}

#[async_trait]
pub trait RelatedCapability: Send + Sync {
    async fn related(&self, id: &str, limit: usize) -> Result<Vec<UnifiedArticle>, MedlitError>;
}

#[async_trait]
pub trait CitingCapability: Send + Sync {
    async fn citing(&self, id: &str, limit: usize) -> Result<Vec<UnifiedArticle>, MedlitError>;
}

#[async_trait]
pub trait ReferencesCapability: Send + Sync {
    async fn references(&self, id: &str, limit: usize)
    -> Result<Vec<UnifiedArticle>, MedlitError>;
}

#[async_trait]
pub trait MetricsCapability: Send + Sync {
    async fn metrics(
        &self,
        ids: &[String],
    ) -> Result<HashMap<String, CitationMetrics>, MedlitError>;
}
