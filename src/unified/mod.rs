//! The unified search pipeline: analyze, dispatch, aggregate, relax,
//! enrich. Partial success is always preferred over total failure; the
//! response carries per-provider outcomes so callers can detect degraded
//! results.

pub mod aggregator;
pub mod analyzer;
pub mod cache;
pub mod dispatcher;
pub mod enhancer;
pub mod enricher;
pub mod relaxer;
pub mod resolver;

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::entities::article::{Source, UnifiedArticle};
use crate::entities::query::{
    AnalyzedQuery, EnhancedQuery, Intent, SearchFilters, SearchOptions,
};
use crate::error::MedlitError;
use self::aggregator::{AggregationConfig, AggregationStats};
use self::dispatcher::{DispatchResult, Dispatcher, SourceOutcome};
use self::enricher::Enricher;
use self::relaxer::RelaxationStep;
use self::resolver::EntityResolver;

pub const MAX_SEARCH_LIMIT: usize = 100;
pub const DEFAULT_SEARCH_LIMIT: usize = 20;
const RELAX_MIN_RESULTS: usize = 1;

#[derive(Debug, Clone)]
pub struct UnifiedSearchRequest {
    pub query: String,
    pub limit: usize,
    pub filters: SearchFilters,
    pub options: SearchOptions,
    /// Overrides the analyzer's recommended provider subset when set.
    pub sources: Option<Vec<Source>>,
}

impl UnifiedSearchRequest {
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            limit: DEFAULT_SEARCH_LIMIT,
            filters: SearchFilters::default(),
            options: SearchOptions::default(),
            sources: None,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct UnifiedSearchResponse {
    pub articles: Vec<UnifiedArticle>,
    pub analysis: AnalyzedQuery,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub enhanced: Option<EnhancedQuery>,
    pub stats: AggregationStats,
    pub outcomes: Vec<SourceOutcome>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub relaxation: Vec<RelaxationStep>,
    pub relaxed: bool,
    pub degraded: bool,
}

pub struct UnifiedSearcher {
    resolver: Arc<EntityResolver>,
    dispatcher: Dispatcher,
    enricher: Enricher,
}

impl UnifiedSearcher {
    pub fn new(resolver: Arc<EntityResolver>, dispatcher: Dispatcher, enricher: Enricher) -> Self {
        Self {
            resolver,
            dispatcher,
            enricher,
        }
    }

    pub fn resolver(&self) -> &Arc<EntityResolver> {
        &self.resolver
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    pub fn enricher(&self) -> &Enricher {
        &self.enricher
    }

    /// Direct ID lookup: normalize the ID, route to the adapter that owns
    /// that ID space, return at most one record.
    async fn lookup(
        &self,
        analysis: &AnalyzedQuery,
        request: &UnifiedSearchRequest,
    ) -> Result<UnifiedSearchResponse, MedlitError> {
        let id = analysis
            .normalized
            .trim()
            .trim_start_matches("PMID:")
            .trim_start_matches("pmid:")
            .trim()
            .to_string();
        let source = analysis.sources.first().copied().unwrap_or(Source::Pubmed);
        let adapter = self.dispatcher.adapter(source).ok_or_else(|| {
            MedlitError::Config(format!("no adapter registered for {source}"))
        })?;
        let fetched = adapter.fetch(&id).await?;

        let mut stats = AggregationStats {
            total_input: usize::from(fetched.is_some()),
            unique_articles: usize::from(fetched.is_some()),
            ..Default::default()
        };
        let mut articles = Vec::new();
        if let Some(mut article) = fetched {
            stats.per_source.insert(source, 1);
            if request.options.include_oa_links || request.options.deep_search {
                let mut batch = vec![article];
                self.enricher.enrich(&mut batch, &request.options).await;
                article = batch.remove(0);
            }
            articles.push(article);
        }
        let outcome = SourceOutcome {
            source,
            returned: articles.len(),
            total: Some(articles.len() as u64),
            error: None,
            elapsed_ms: 0,
        };
        Ok(UnifiedSearchResponse {
            articles,
            analysis: analysis.clone(),
            enhanced: None,
            stats,
            outcomes: vec![outcome],
            relaxation: Vec::new(),
            relaxed: false,
            degraded: false,
        })
    }

    async fn dispatch_and_aggregate(
        &self,
        query: &str,
        sources: &[Source],
        request: &UnifiedSearchRequest,
        analysis: &AnalyzedQuery,
        source_queries: &BTreeMap<Source, String>,
        cancel: &CancellationToken,
    ) -> Result<(DispatchResult, aggregator::AggregationResult), MedlitError> {
        let dispatched = self
            .dispatcher
            .dispatch(
                query,
                sources,
                request.limit.max(DEFAULT_SEARCH_LIMIT),
                &request.filters,
                source_queries,
                cancel,
            )
            .await?;
        let config = AggregationConfig {
            profile: analysis.ranking,
            limit: request.limit,
            query: analysis.normalized.clone(),
            entities: analysis.entities.clone(),
            ..Default::default()
        };
        let aggregated = aggregator::aggregate(&dispatched.batches, &config);
        Ok((dispatched, aggregated))
    }

    pub async fn search(
        &self,
        request: &UnifiedSearchRequest,
        cancel: &CancellationToken,
    ) -> Result<UnifiedSearchResponse, MedlitError> {
        let query = request.query.trim();
        if query.is_empty() {
            return Err(MedlitError::InvalidArgument(
                "Query is required. Example: medlit search \"remimazolam sedation\"".into(),
            ));
        }
        if request.limit == 0 || request.limit > MAX_SEARCH_LIMIT {
            return Err(MedlitError::InvalidArgument(format!(
                "limit must be between 1 and {MAX_SEARCH_LIMIT}"
            )));
        }
        request.filters.validate()?;

        // Entity resolution is skipped in shallow mode to save upstream
        // calls; the analyzer then works from surface features alone.
        let entities = if request.options.deep_search {
            let candidates = analyzer::entity_candidates(query);
            self.resolver.resolve_all(&candidates).await
        } else {
            Vec::new()
        };
        let analysis = analyzer::analyze(query, &entities);
        debug!(
            complexity = ?analysis.complexity,
            intent = ?analysis.intent,
            sources = analysis.sources.len(),
            "query analyzed"
        );

        if analysis.intent == Intent::Lookup {
            return self.lookup(&analysis, request).await;
        }

        let mut sources = request
            .sources
            .clone()
            .filter(|forced| !forced.is_empty())
            .unwrap_or_else(|| analysis.sources.clone());
        if request.options.include_preprints && !sources.contains(&Source::Biorxiv) {
            sources.push(Source::Biorxiv);
        }

        let enhanced = if request.options.deep_search && !analysis.entities.is_empty() {
            Some(enhancer::enhance(&analysis))
        } else {
            None
        };
        let source_queries = enhanced
            .as_ref()
            .map(|e| e.source_queries.clone())
            .unwrap_or_default();

        let (dispatched, mut aggregated) = self
            .dispatch_and_aggregate(
                &analysis.normalized,
                &sources,
                request,
                &analysis,
                &source_queries,
                cancel,
            )
            .await?;
        let mut outcomes = dispatched.outcomes;
        let mut degraded = outcomes.iter().any(|o| o.error.is_some());

        if !request.options.include_preprints {
            aggregated.articles.retain(|a| !a.is_preprint);
        }
        apply_post_filters(&mut aggregated.articles, &request.filters, &request.options);

        // Progressive relaxation on empty results.
        let mut relaxation: Vec<RelaxationStep> = Vec::new();
        let mut relaxed = false;
        if aggregated.articles.len() < RELAX_MIN_RESULTS && request.options.auto_relax {
            let sequence =
                relaxer::relaxation_sequence(&analysis.normalized, &request.filters, &entities);
            for candidate in sequence {
                if cancel.is_cancelled() {
                    return Err(MedlitError::Cancelled);
                }
                info!(step = candidate.label, query = %candidate.query, "relaxing query");
                let relaxed_request = UnifiedSearchRequest {
                    query: candidate.query.clone(),
                    limit: request.limit,
                    filters: candidate.filters.clone(),
                    options: request.options.clone(),
                    sources: request.sources.clone(),
                };
                let (relaxed_dispatch, mut relaxed_aggregate) = self
                    .dispatch_and_aggregate(
                        &candidate.query,
                        &sources,
                        &relaxed_request,
                        &analysis,
                        &BTreeMap::new(),
                        cancel,
                    )
                    .await?;
                if !request.options.include_preprints {
                    relaxed_aggregate.articles.retain(|a| !a.is_preprint);
                }
                let count = relaxed_aggregate.articles.len();
                relaxation.push(RelaxationStep {
                    label: candidate.label.to_string(),
                    query: candidate.query.clone(),
                    result_count: count,
                });
                if count >= RELAX_MIN_RESULTS {
                    aggregated = relaxed_aggregate;
                    outcomes = relaxed_dispatch.outcomes;
                    degraded |= outcomes.iter().any(|o| o.error.is_some());
                    relaxed = true;
                    break;
                }
            }
        }

        if request.options.deep_search {
            self.enricher
                .enrich(&mut aggregated.articles, &request.options)
                .await;
        }

        Ok(UnifiedSearchResponse {
            articles: aggregated.articles,
            analysis,
            enhanced,
            stats: aggregated.stats,
            outcomes,
            relaxation,
            relaxed,
            degraded,
        })
    }
}

/// Declarative filters applied after aggregation, for dimensions the
/// providers cannot filter server-side.
pub fn apply_post_filters(
    articles: &mut Vec<UnifiedArticle>,
    filters: &SearchFilters,
    options: &SearchOptions,
) {
    articles.retain(|article| {
        if let Some(min) = filters.min_year
            && article.year.is_some_and(|y| y < min)
        {
            return false;
        }
        if let Some(max) = filters.max_year
            && article.year.is_some_and(|y| y > max)
        {
            return false;
        }
        if let Some(language) = filters.language.as_deref()
            && let Some(article_language) = article.language.as_deref()
            && !article_language.eq_ignore_ascii_case(language)
        {
            return false;
        }
        if let Some(min_citations) = filters.min_citations
            && article.citation_count().unwrap_or(0) < min_citations
        {
            return false;
        }
        if !filters.article_types.is_empty() {
            let wanted = filters
                .article_types
                .iter()
                .any(|t| article.article_types.iter().any(|have| have.contains(&t.to_lowercase())));
            if !wanted {
                return false;
            }
        }
        if options.peer_reviewed_only && article.is_preprint && !options.include_preprints {
            return false;
        }
        true
    });
}

#[cfg(test)]
mod searcher_tests {
    use super::*;
    use crate::entities::SearchHits;
    use crate::sources::adapter::SourceAdapter;
    use crate::sources::icite::ICiteClient;
    use crate::sources::pubtator::PubTatorClient;
    use crate::sources::unpaywall::UnpaywallClient;
    use crate::tools::render;
    use async_trait::async_trait;

    struct FakeIndex {
        source: Source,
        articles: Vec<UnifiedArticle>,
        total: Option<u64>,
        /// Queries containing any of these markers return empty.
        dead_markers: Vec<String>,
    }

    #[async_trait]
    impl SourceAdapter for FakeIndex {
        fn source(&self) -> Source {
            self.source
        }

        async fn search(
            &self,
            query: &str,
            _limit: usize,
            _filters: &SearchFilters,
        ) -> Result<SearchHits, crate::error::MedlitError> {
            if self.dead_markers.iter().any(|m| query.contains(m)) {
                return Ok(SearchHits::empty());
            }
            Ok(SearchHits::new(self.articles.clone(), self.total))
        }

        async fn fetch(
            &self,
            id: &str,
        ) -> Result<Option<UnifiedArticle>, crate::error::MedlitError> {
            Ok(self.articles.iter().find(|a| a.id == id).cloned())
        }
    }

    fn shallow_options() -> SearchOptions {
        SearchOptions {
            deep_search: false,
            include_oa_links: false,
            include_similarity_scores: false,
            ..Default::default()
        }
    }

    fn searcher(adapters: Vec<FakeIndex>) -> UnifiedSearcher {
        let dispatcher = Dispatcher::new(
            adapters
                .into_iter()
                .map(|a| Arc::new(a) as Arc<dyn SourceAdapter>)
                .collect(),
        );
        let resolver = Arc::new(resolver::EntityResolver::new(
            PubTatorClient::new_for_test("http://unused.invalid".into()).unwrap(),
        ));
        let enricher = enricher::Enricher::new(
            ICiteClient::new_for_test("http://unused.invalid".into()).unwrap(),
            UnpaywallClient::new_for_test("http://unused.invalid".into()).unwrap(),
        );
        UnifiedSearcher::new(resolver, dispatcher, enricher)
    }

    fn pubmed_article(id: &str, title: &str) -> UnifiedArticle {
        let mut a = UnifiedArticle::new(id, title, Source::Pubmed);
        a.pmid = Some(id.to_string());
        a.year = Some(2023);
        a
    }

    #[tokio::test]
    async fn pmid_lookup_returns_single_record_with_exact_sources_line() {
        let s = searcher(vec![FakeIndex {
            source: Source::Pubmed,
            articles: vec![pubmed_article("37654670", "Remimazolam pharmacology")],
            total: Some(1),
            dead_markers: Vec::new(),
        }]);
        let request = UnifiedSearchRequest {
            query: "PMID:37654670".into(),
            options: shallow_options(),
            ..UnifiedSearchRequest::new("")
        };
        let response = s.search(&request, &CancellationToken::new()).await.unwrap();

        assert_eq!(response.analysis.intent, Intent::Lookup);
        assert_eq!(response.articles.len(), 1);
        assert_eq!(response.articles[0].source, Source::Pubmed);
        assert_eq!(
            render::sources_line(&response.outcomes),
            "**Sources**: pubmed (1/1)"
        );
    }

    #[tokio::test]
    async fn comparison_query_contacts_multiple_providers_and_merges_provenance() {
        let shared_title = "Remimazolam versus propofol for sedation";
        let mut epmc_copy = UnifiedArticle::new("37654670", shared_title, Source::EuropePmc);
        epmc_copy.pmid = Some("37654670".into());
        epmc_copy.doi = Some("10.1/demo".into());
        epmc_copy.year = Some(2023);

        let s = searcher(vec![
            FakeIndex {
                source: Source::Pubmed,
                articles: vec![
                    pubmed_article("37654670", shared_title),
                    pubmed_article("11111111", "Unrelated sedation outcomes"),
                ],
                total: Some(2),
                dead_markers: Vec::new(),
            },
            FakeIndex {
                source: Source::EuropePmc,
                articles: vec![epmc_copy],
                total: Some(1),
                dead_markers: Vec::new(),
            },
            FakeIndex {
                source: Source::SemanticScholar,
                articles: Vec::new(),
                total: Some(0),
                dead_markers: Vec::new(),
            },
            FakeIndex {
                source: Source::OpenAlex,
                articles: Vec::new(),
                total: Some(0),
                dead_markers: Vec::new(),
            },
            FakeIndex {
                source: Source::Crossref,
                articles: Vec::new(),
                total: Some(0),
                dead_markers: Vec::new(),
            },
        ]);

        let request = UnifiedSearchRequest {
            query: "remimazolam vs propofol for ICU sedation".into(),
            limit: 10,
            options: shallow_options(),
            ..UnifiedSearchRequest::new("")
        };
        let response = s.search(&request, &CancellationToken::new()).await.unwrap();

        assert_eq!(response.analysis.intent, Intent::Comparison);
        assert_eq!(
            response.analysis.ranking,
            crate::entities::query::RankingProfile::Impact
        );
        assert!(response.outcomes.len() >= 2);
        assert!(response.articles.len() <= 10);
        let merged = response
            .articles
            .iter()
            .find(|a| a.id == "37654670")
            .expect("shared record is present");
        assert!(merged.provenance.len() >= 2);
        assert_eq!(response.stats.duplicates_removed, 1);
    }

    #[tokio::test]
    async fn empty_results_trigger_recorded_relaxation_trail() {
        // The provider returns nothing for the strict AND query and one
        // record once relaxation rewrites it as an OR of clauses.
        let s = searcher(vec![FakeIndex {
            source: Source::Pubmed,
            articles: vec![pubmed_article("222", "Broadened match")],
            total: Some(1),
            dead_markers: vec!["AND".into()],
        }]);

        let request = UnifiedSearchRequest {
            query: "broadened-nonexistent AND pediatric".into(),
            filters: SearchFilters {
                min_year: Some(2024),
                max_year: Some(2024),
                age_group: Some("child".into()),
                ..Default::default()
            },
            options: shallow_options(),
            ..UnifiedSearchRequest::new("")
        };
        let response = s.search(&request, &CancellationToken::new()).await.unwrap();

        assert!(response.relaxed);
        assert!(!response.relaxation.is_empty());
        assert!(response.relaxation.len() <= 5);
        let succeeded = response.relaxation.last().unwrap();
        assert!(succeeded.result_count >= 1);
        assert_eq!(response.articles.len(), 1);
        // Every attempted step is in the trail, labeled.
        for step in &response.relaxation {
            assert!(!step.label.is_empty());
            assert!(!step.query.is_empty());
        }
    }

    #[tokio::test]
    async fn no_relax_option_skips_relaxation() {
        let s = searcher(vec![FakeIndex {
            source: Source::Pubmed,
            articles: Vec::new(),
            total: Some(0),
            dead_markers: Vec::new(),
        }]);
        let request = UnifiedSearchRequest {
            query: "anything at all".into(),
            options: SearchOptions {
                auto_relax: false,
                ..shallow_options()
            },
            ..UnifiedSearchRequest::new("")
        };
        let response = s.search(&request, &CancellationToken::new()).await.unwrap();
        assert!(response.relaxation.is_empty());
        assert!(!response.relaxed);
        assert!(response.articles.is_empty());
    }

    #[tokio::test]
    async fn empty_query_is_invalid_argument() {
        let s = searcher(Vec::new());
        let request = UnifiedSearchRequest::new("   ");
        let err = s
            .search(&request, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, MedlitError::InvalidArgument(_)));
        assert!(!err.retryable());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::article::Source;

    fn article(id: &str, year: i32) -> UnifiedArticle {
        let mut a = UnifiedArticle::new(id, format!("Title {id}"), Source::Pubmed);
        a.year = Some(year);
        a
    }

    #[test]
    fn post_filters_enforce_year_range() {
        let mut articles = vec![article("1", 2018), article("2", 2022), article("3", 2025)];
        let filters = SearchFilters {
            min_year: Some(2020),
            max_year: Some(2024),
            ..Default::default()
        };
        apply_post_filters(&mut articles, &filters, &SearchOptions::default());
        assert_eq!(articles.len(), 1);
        assert_eq!(articles[0].id, "2");
    }

    #[test]
    fn post_filters_keep_records_with_unknown_year() {
        let mut unknown = UnifiedArticle::new("x", "No year", Source::Pubmed);
        unknown.year = None;
        let mut articles = vec![unknown];
        let filters = SearchFilters {
            min_year: Some(2020),
            ..Default::default()
        };
        apply_post_filters(&mut articles, &filters, &SearchOptions::default());
        assert_eq!(articles.len(), 1);
    }

    #[test]
    fn post_filters_drop_preprints_unless_requested() {
        let mut preprint = article("p", 2024);
        preprint.is_preprint = true;
        let mut articles = vec![preprint.clone(), article("r", 2024)];
        apply_post_filters(
            &mut articles,
            &SearchFilters::default(),
            &SearchOptions::default(),
        );
        assert_eq!(articles.len(), 1);

        let mut articles = vec![preprint, article("r", 2024)];
        let options = SearchOptions {
            include_preprints: true,
            ..Default::default()
        };
        apply_post_filters(&mut articles, &SearchFilters::default(), &options);
        assert_eq!(articles.len(), 2);
    }

    #[test]
    fn post_filters_enforce_min_citations() {
        let mut cited = article("c", 2020);
        cited.citation_metrics = Some(crate::entities::article::CitationMetrics {
            citation_count: 50,
            ..Default::default()
        });
        let mut articles = vec![cited, article("u", 2020)];
        let filters = SearchFilters {
            min_citations: Some(10),
            ..Default::default()
        };
        apply_post_filters(&mut articles, &filters, &SearchOptions::default());
        assert_eq!(articles.len(), 1);
        assert_eq!(articles[0].id, "c");
    }
}
