//! Pipeline execution. Steps run in topological order; each step's
//! articles flow to its dependents. `skip` steps pass an empty result
//! downstream on failure, `abort` terminates with a partial report.

use std::collections::BTreeMap;
use std::time::Instant;

use futures::future::join_all;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::entities::article::{Source, UnifiedArticle};
use crate::entities::pipeline::{
    OnError, PipelineConfig, PipelineRun, StepAction, StepResult, StepTiming,
};
use crate::entities::query::{SearchFilters, SearchOptions};
use crate::error::MedlitError;
use crate::unified::aggregator::{self, AggregationConfig, DedupStrategy};
use crate::unified::{UnifiedSearchRequest, UnifiedSearcher, analyzer, enhancer};

pub struct ExecutionReport {
    pub run: PipelineRun,
    pub step_results: Vec<StepResult>,
    pub articles: Vec<UnifiedArticle>,
}

pub struct PipelineExecutor<'a> {
    searcher: &'a UnifiedSearcher,
}

/// Options for pipeline-internal searches: no enrichment, no relaxation;
/// the pipeline composes those concerns through explicit steps.
fn step_search_options() -> SearchOptions {
    SearchOptions {
        include_preprints: true,
        deep_search: false,
        peer_reviewed_only: false,
        include_oa_links: false,
        show_analysis: false,
        include_similarity_scores: false,
        auto_relax: false,
    }
}

fn param_usize(step: &crate::entities::pipeline::PipelineStep, key: &str, default: usize) -> usize {
    step.params
        .get(key)
        .and_then(|v| v.as_u64())
        .map(|v| v as usize)
        .or_else(|| {
            step.param_str(key)
                .and_then(|v| v.trim().parse::<usize>().ok())
        })
        .unwrap_or(default)
}

fn param_i32(step: &crate::entities::pipeline::PipelineStep, key: &str) -> Option<i32> {
    step.params
        .get(key)
        .and_then(|v| v.as_i64())
        .map(|v| v as i32)
        .or_else(|| step.param_str(key).and_then(|v| v.trim().parse::<i32>().ok()))
}

fn step_filters(step: &crate::entities::pipeline::PipelineStep) -> SearchFilters {
    SearchFilters {
        min_year: param_i32(step, "year_min").or_else(|| param_i32(step, "min_year")),
        max_year: param_i32(step, "year_max").or_else(|| param_i32(step, "max_year")),
        language: step.param_str("language").map(str::to_string),
        min_citations: step
            .params
            .get("min_citations")
            .and_then(|v| v.as_u64())
            .or_else(|| {
                step.param_str("min_citations")
                    .and_then(|v| v.trim().parse::<u64>().ok())
            }),
        article_types: step
            .param_str("article_types")
            .map(|v| {
                v.split(',')
                    .map(str::trim)
                    .filter(|t| !t.is_empty())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default(),
        ..Default::default()
    }
}

fn input_articles(step_inputs: &[String], results: &[StepResult]) -> Vec<UnifiedArticle> {
    let mut articles = Vec::new();
    for input in step_inputs {
        if let Some(result) = results.iter().find(|r| r.step_id == *input) {
            articles.extend(result.articles.iter().cloned());
        }
    }
    articles
}

impl<'a> PipelineExecutor<'a> {
    pub fn new(searcher: &'a UnifiedSearcher) -> Self {
        Self { searcher }
    }

    async fn run_search(
        &self,
        query: &str,
        limit: usize,
        filters: SearchFilters,
        sources: Option<Vec<Source>>,
        cancel: &CancellationToken,
    ) -> Result<Vec<UnifiedArticle>, MedlitError> {
        let request = UnifiedSearchRequest {
            query: query.to_string(),
            limit: limit.clamp(1, crate::unified::MAX_SEARCH_LIMIT),
            filters,
            options: step_search_options(),
            sources,
        };
        let response = self.searcher.search(&request, cancel).await?;
        Ok(response.articles)
    }

    async fn action_search(
        &self,
        step: &crate::entities::pipeline::PipelineStep,
        cancel: &CancellationToken,
    ) -> Result<StepResult, MedlitError> {
        let query = step
            .param_str("query")
            .ok_or_else(|| MedlitError::InvalidArgument("search step requires query".into()))?;
        let limit = param_usize(step, "limit", 20);
        let sources = step.param_str("sources").map(|raw| {
            raw.split(',')
                .filter_map(Source::from_key)
                .collect::<Vec<_>>()
        });
        let articles = self
            .run_search(query, limit, step_filters(step), sources, cancel)
            .await?;
        Ok(self.result(step, articles, BTreeMap::new()))
    }

    async fn action_pico(
        &self,
        step: &crate::entities::pipeline::PipelineStep,
        cancel: &CancellationToken,
    ) -> Result<StepResult, MedlitError> {
        let limit = param_usize(step, "limit", 25);
        let fragments: Vec<(&str, String)> = ["population", "intervention", "comparison", "outcome"]
            .iter()
            .filter_map(|key| {
                step.param_str(key)
                    .map(str::trim)
                    .filter(|v| !v.is_empty())
                    .map(|v| (*key, v.to_string()))
            })
            .collect();
        if fragments.is_empty() {
            return Err(MedlitError::InvalidArgument(
                "pico step requires at least one element param".into(),
            ));
        }

        let searches = fragments.iter().map(|(_, fragment)| {
            self.run_search(fragment, limit, SearchFilters::default(), None, cancel)
        });
        let outcomes = join_all(searches).await;
        let mut rank_lists: Vec<Vec<UnifiedArticle>> = Vec::new();
        let mut metadata = BTreeMap::new();
        for ((element, fragment), outcome) in fragments.iter().zip(outcomes) {
            match outcome {
                Ok(list) => {
                    metadata.insert(
                        format!("{element}_count"),
                        serde_json::json!({"query": fragment, "count": list.len()}),
                    );
                    rank_lists.push(list);
                }
                Err(err) => {
                    warn!(?err, element, "pico sub-search failed");
                    metadata.insert(
                        format!("{element}_count"),
                        serde_json::json!({"query": fragment, "error": err.to_string()}),
                    );
                }
            }
        }
        let fused = aggregator::rrf_fuse(&rank_lists, limit * 2);
        Ok(self.result(step, fused, metadata))
    }

    async fn action_expand(
        &self,
        step: &crate::entities::pipeline::PipelineStep,
        results: &[StepResult],
    ) -> Result<StepResult, MedlitError> {
        let query = match step.param_str("query") {
            Some(q) if !q.trim().is_empty() => q.trim().to_string(),
            _ => input_articles(&step.inputs, results)
                .first()
                .map(|a| a.title.clone())
                .ok_or_else(|| {
                    MedlitError::InvalidArgument("expand step has no query to expand".into())
                })?,
        };
        let candidates = analyzer::entity_candidates(&query);
        let entities = self.searcher.resolver().resolve_all(&candidates).await;
        let analysis = analyzer::analyze(&query, &entities);
        let enhanced = enhancer::enhance(&analysis);
        let mut metadata = BTreeMap::new();
        metadata.insert(
            "expansions".to_string(),
            serde_json::to_value(&enhanced.expansions).unwrap_or_default(),
        );
        metadata.insert(
            "source_queries".to_string(),
            serde_json::to_value(&enhanced.source_queries).unwrap_or_default(),
        );
        Ok(self.result(step, Vec::new(), metadata))
    }

    async fn action_details(
        &self,
        step: &crate::entities::pipeline::PipelineStep,
        results: &[StepResult],
    ) -> Result<StepResult, MedlitError> {
        let mut ids: Vec<String> = step
            .param_str("ids")
            .map(|v| {
                v.split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();
        ids.extend(
            input_articles(&step.inputs, results)
                .into_iter()
                .map(|a| a.id),
        );
        ids.dedup();
        const MAX_BATCH: usize = 10;
        ids.truncate(MAX_BATCH);

        let mut articles = Vec::new();
        for id in &ids {
            if let Some(article) = self.fetch_one(id).await? {
                articles.push(article);
            }
        }
        Ok(self.result(step, articles, BTreeMap::new()))
    }

    async fn fetch_one(&self, id: &str) -> Result<Option<UnifiedArticle>, MedlitError> {
        let dispatcher = self.searcher.dispatcher();
        let source = if id.chars().all(|c| c.is_ascii_digit()) {
            Source::Pubmed
        } else if id.len() >= 3 && id[..3].eq_ignore_ascii_case("nct") {
            Source::ClinicalTrials
        } else {
            Source::EuropePmc
        };
        match dispatcher.adapter(source) {
            Some(adapter) => adapter.fetch(id).await,
            None => Ok(None),
        }
    }

    async fn action_link(
        &self,
        step: &crate::entities::pipeline::PipelineStep,
        results: &[StepResult],
        action: StepAction,
    ) -> Result<StepResult, MedlitError> {
        let limit = param_usize(step, "limit", 10);
        let inputs = input_articles(&step.inputs, results);
        let dispatcher = self.searcher.dispatcher();
        let mut articles = Vec::new();
        let mut metadata = BTreeMap::new();

        for article in inputs.iter().take(10) {
            let id = article.pmid.as_deref().unwrap_or(article.id.as_str());
            let mut found: Option<Vec<UnifiedArticle>> = None;
            for source in dispatcher.sources() {
                let Some(adapter) = dispatcher.adapter(source) else {
                    continue;
                };
                let outcome = match action {
                    StepAction::Related => match adapter.related() {
                        Some(capability) => Some(capability.related(id, limit).await),
                        None => None,
                    },
                    StepAction::Citing => match adapter.citing() {
                        Some(capability) => Some(capability.citing(id, limit).await),
                        None => None,
                    },
                    StepAction::References => match adapter.references() {
                        Some(capability) => Some(capability.references(id, limit).await),
                        None => None,
                    },
                    _ => None,
                };
                match outcome {
                    Some(Ok(list)) if !list.is_empty() => {
                        found = Some(list);
                        break;
                    }
                    Some(Ok(_)) => continue,
                    Some(Err(err)) => {
                        warn!(?err, id, source = %source, "link lookup failed, trying next capability");
                        continue;
                    }
                    None => continue,
                }
            }
            if let Some(list) = found {
                metadata.insert(id.to_string(), serde_json::json!(list.len()));
                articles.extend(list);
            }
        }
        Ok(self.result(step, articles, metadata))
    }

    async fn action_metrics(
        &self,
        step: &crate::entities::pipeline::PipelineStep,
        results: &[StepResult],
    ) -> Result<StepResult, MedlitError> {
        let mut articles = input_articles(&step.inputs, results);
        self.searcher
            .enricher()
            .add_citation_metrics(&mut articles)
            .await?;
        Ok(self.result(step, articles, BTreeMap::new()))
    }

    fn action_merge(
        &self,
        step: &crate::entities::pipeline::PipelineStep,
        results: &[StepResult],
        output_ranking: crate::entities::query::RankingProfile,
    ) -> StepResult {
        let limit = param_usize(step, "limit", 100);
        let fusion = step.param_str("fusion").unwrap_or("rank");
        if fusion.eq_ignore_ascii_case("rrf") {
            let lists: Vec<Vec<UnifiedArticle>> = step
                .inputs
                .iter()
                .filter_map(|input| {
                    results
                        .iter()
                        .find(|r| r.step_id == *input)
                        .map(|r| r.articles.clone())
                })
                .collect();
            let fused = aggregator::rrf_fuse(&lists, limit);
            return self.result(step, fused, BTreeMap::new());
        }

        let strategy = match step.param_str("strategy").map(str::to_ascii_lowercase).as_deref() {
            Some("strict") => DedupStrategy::Strict,
            Some("aggressive") => DedupStrategy::Aggressive,
            _ => DedupStrategy::Moderate,
        };
        let batches: Vec<(Source, Vec<UnifiedArticle>)> = input_articles(&step.inputs, results)
            .into_iter()
            .map(|a| (a.source, vec![a]))
            .collect();
        let config = AggregationConfig {
            strategy,
            profile: output_ranking,
            limit,
            mmr_lambda: None,
            query: step.param_str("query").unwrap_or("").to_string(),
            entities: Vec::new(),
        };
        let aggregated = aggregator::aggregate(&batches, &config);
        let mut metadata = BTreeMap::new();
        metadata.insert(
            "duplicates_removed".to_string(),
            serde_json::json!(aggregated.stats.duplicates_removed),
        );
        self.result(step, aggregated.articles, metadata)
    }

    fn action_filter(
        &self,
        step: &crate::entities::pipeline::PipelineStep,
        results: &[StepResult],
    ) -> StepResult {
        let mut articles = input_articles(&step.inputs, results);
        let before = articles.len();
        let filters = step_filters(step);
        crate::unified::apply_post_filters(&mut articles, &filters, &step_search_options());
        let mut metadata = BTreeMap::new();
        metadata.insert("filtered_out".to_string(), serde_json::json!(before - articles.len()));
        self.result(step, articles, metadata)
    }

    fn result(
        &self,
        step: &crate::entities::pipeline::PipelineStep,
        articles: Vec<UnifiedArticle>,
        metadata: BTreeMap<String, serde_json::Value>,
    ) -> StepResult {
        let ids = articles.iter().map(|a| a.id.clone()).collect();
        StepResult {
            step_id: step.id.clone(),
            action: step.action.clone(),
            articles,
            ids,
            metadata,
            error: None,
        }
    }

    async fn run_step(
        &self,
        step: &crate::entities::pipeline::PipelineStep,
        results: &[StepResult],
        config: &PipelineConfig,
        cancel: &CancellationToken,
    ) -> Result<StepResult, MedlitError> {
        let action = StepAction::parse(&step.action).ok_or_else(|| {
            MedlitError::InvalidArgument(format!("unknown action \"{}\"", step.action))
        })?;
        match action {
            StepAction::Search => self.action_search(step, cancel).await,
            StepAction::Pico => self.action_pico(step, cancel).await,
            StepAction::Expand => self.action_expand(step, results).await,
            StepAction::Details => self.action_details(step, results).await,
            StepAction::Related | StepAction::Citing | StepAction::References => {
                self.action_link(step, results, action).await
            }
            StepAction::Metrics => self.action_metrics(step, results).await,
            StepAction::Merge => Ok(self.action_merge(step, results, config.output.ranking)),
            StepAction::Filter => Ok(self.action_filter(step, results)),
        }
    }

    /// Execute a validated config. The final output is the last step's
    /// article list, reranked per the output config and truncated to the
    /// output limit.
    pub async fn execute(
        &self,
        config: &PipelineConfig,
        config_hash: &str,
        cancel: &CancellationToken,
    ) -> Result<ExecutionReport, MedlitError> {
        let started_at = OffsetDateTime::now_utc()
            .format(&Rfc3339)
            .unwrap_or_default();
        let mut step_results: Vec<StepResult> = Vec::new();
        let mut timings: Vec<StepTiming> = Vec::new();
        let mut aborted = false;

        for step in &config.steps {
            if cancel.is_cancelled() {
                return Err(MedlitError::Cancelled);
            }
            let started = Instant::now();
            let input_count = input_articles(&step.inputs, &step_results).len();
            let outcome = self.run_step(step, &step_results, config, cancel).await;
            let elapsed_ms = started.elapsed().as_millis();

            let result = match outcome {
                Ok(result) => result,
                Err(MedlitError::Cancelled) => return Err(MedlitError::Cancelled),
                Err(err) => {
                    warn!(step = %step.id, ?err, "pipeline step failed");
                    let failed = StepResult {
                        step_id: step.id.clone(),
                        action: step.action.clone(),
                        articles: Vec::new(),
                        ids: Vec::new(),
                        metadata: BTreeMap::new(),
                        error: Some(err.to_string()),
                    };
                    if step.on_error == OnError::Abort {
                        timings.push(StepTiming {
                            step_id: step.id.clone(),
                            action: step.action.clone(),
                            elapsed_ms,
                            input_count,
                            output_count: 0,
                            error: failed.error.clone(),
                        });
                        step_results.push(failed);
                        aborted = true;
                        break;
                    }
                    failed
                }
            };

            info!(
                step = %step.id,
                action = %step.action,
                output = result.articles.len(),
                "pipeline step complete"
            );
            timings.push(StepTiming {
                step_id: step.id.clone(),
                action: step.action.clone(),
                elapsed_ms,
                input_count,
                output_count: result.articles.len(),
                error: result.error.clone(),
            });
            step_results.push(result);
        }

        let mut articles = if aborted {
            Vec::new()
        } else {
            step_results
                .last()
                .map(|r| r.articles.clone())
                .unwrap_or_default()
        };
        if articles.len() > config.output.limit {
            let batches: Vec<(Source, Vec<UnifiedArticle>)> =
                articles.into_iter().map(|a| (a.source, vec![a])).collect();
            let rerank = AggregationConfig {
                strategy: DedupStrategy::Strict,
                profile: config.output.ranking,
                limit: config.output.limit,
                mmr_lambda: None,
                query: String::new(),
                entities: Vec::new(),
            };
            articles = aggregator::aggregate(&batches, &rerank).articles;
        }

        let run = PipelineRun {
            name: config.name.clone(),
            config_hash: config_hash.to_string(),
            started_at,
            steps: timings,
            aborted,
            output_count: articles.len(),
        };
        Ok(ExecutionReport {
            run,
            step_results,
            articles,
        })
    }
}
