//! Concurrent fan-out over the recommended provider subset. Partial
//! success is the normal case: a provider that errors or times out is
//! demoted to an empty contribution and recorded in the per-provider
//! outcomes, never failing the request.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use futures::stream::FuturesUnordered;
use serde::Serialize;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::entities::article::{Source, UnifiedArticle};
use crate::entities::query::SearchFilters;
use crate::error::MedlitError;
use crate::sources::adapter::SourceAdapter;

pub const DEFAULT_PER_SOURCE_TIMEOUT: Duration = Duration::from_secs(10);
pub const DEFAULT_GLOBAL_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Serialize)]
pub struct SourceOutcome {
    pub source: Source,
    pub returned: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub elapsed_ms: u128,
}

#[derive(Debug, Default)]
pub struct DispatchResult {
    pub batches: Vec<(Source, Vec<UnifiedArticle>)>,
    pub outcomes: Vec<SourceOutcome>,
}

impl DispatchResult {
    pub fn degraded(&self) -> bool {
        self.outcomes.iter().any(|o| o.error.is_some())
    }

    pub fn all_articles(&self) -> Vec<UnifiedArticle> {
        self.batches
            .iter()
            .flat_map(|(_, articles)| articles.iter().cloned())
            .collect()
    }
}

pub struct Dispatcher {
    adapters: HashMap<Source, Arc<dyn SourceAdapter>>,
    per_source_timeout: Duration,
    global_timeout: Duration,
}

impl Dispatcher {
    pub fn new(adapters: Vec<Arc<dyn SourceAdapter>>) -> Self {
        Self {
            adapters: adapters.into_iter().map(|a| (a.source(), a)).collect(),
            per_source_timeout: DEFAULT_PER_SOURCE_TIMEOUT,
            global_timeout: DEFAULT_GLOBAL_TIMEOUT,
        }
    }

    pub fn with_timeouts(mut self, per_source: Duration, global: Duration) -> Self {
        self.per_source_timeout = per_source;
        self.global_timeout = global;
        self
    }

    pub fn adapter(&self, source: Source) -> Option<&Arc<dyn SourceAdapter>> {
        self.adapters.get(&source)
    }

    pub fn sources(&self) -> Vec<Source> {
        let mut sources: Vec<Source> = self.adapters.keys().copied().collect();
        sources.sort();
        sources
    }

    /// Fan a query out to every requested provider concurrently. Returns
    /// whatever completed before the global deadline; ordering across
    /// providers is not guaranteed, so outcomes are sorted by key.
    pub async fn dispatch(
        &self,
        query: &str,
        sources: &[Source],
        limit: usize,
        filters: &SearchFilters,
        source_queries: &BTreeMap<Source, String>,
        cancel: &CancellationToken,
    ) -> Result<DispatchResult, MedlitError> {
        let mut tasks = FuturesUnordered::new();
        for source in sources {
            let Some(adapter) = self.adapters.get(source) else {
                warn!(source = %source, "no adapter registered, skipping");
                continue;
            };
            let adapter = adapter.clone();
            let source = *source;
            let provider_query = source_queries
                .get(&source)
                .cloned()
                .unwrap_or_else(|| query.to_string());
            let filters = filters.clone();
            let per_source_timeout = self.per_source_timeout;
            tasks.push(async move {
                let started = Instant::now();
                let outcome =
                    tokio::time::timeout(per_source_timeout, adapter.search(&provider_query, limit, &filters))
                        .await;
                let elapsed_ms = started.elapsed().as_millis();
                match outcome {
                    Ok(Ok(hits)) => (source, Some(hits), None, elapsed_ms),
                    Ok(Err(err)) => (source, None, Some(err.to_string()), elapsed_ms),
                    Err(_) => (
                        source,
                        None,
                        Some(format!("timed out after {per_source_timeout:?}")),
                        elapsed_ms,
                    ),
                }
            });
        }

        let mut result = DispatchResult::default();
        let deadline = tokio::time::sleep(self.global_timeout);
        tokio::pin!(deadline);

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    // Partial results are discarded on explicit cancel.
                    return Err(MedlitError::Cancelled);
                }
                _ = &mut deadline => {
                    warn!(timeout = ?self.global_timeout, "global dispatch deadline reached");
                    for pending in pending_sources(sources, &result) {
                        result.outcomes.push(SourceOutcome {
                            source: pending,
                            returned: 0,
                            total: None,
                            error: Some("global deadline exceeded".to_string()),
                            elapsed_ms: self.global_timeout.as_millis(),
                        });
                    }
                    break;
                }
                next = tasks.next() => {
                    let Some((source, hits, error, elapsed_ms)) = next else {
                        break;
                    };
                    match hits {
                        Some(hits) => {
                            debug!(source = %source, returned = hits.articles.len(), "provider completed");
                            result.outcomes.push(SourceOutcome {
                                source,
                                returned: hits.articles.len(),
                                total: hits.total,
                                error: None,
                                elapsed_ms,
                            });
                            result.batches.push((source, hits.articles));
                        }
                        None => {
                            warn!(source = %source, ?error, "provider demoted to empty");
                            result.outcomes.push(SourceOutcome {
                                source,
                                returned: 0,
                                total: None,
                                error,
                                elapsed_ms,
                            });
                        }
                    }
                }
            }
        }

        result.outcomes.sort_by_key(|o| o.source);
        result.batches.sort_by_key(|(source, _)| *source);
        Ok(result)
    }
}

fn pending_sources(requested: &[Source], result: &DispatchResult) -> Vec<Source> {
    requested
        .iter()
        .copied()
        .filter(|s| !result.outcomes.iter().any(|o| o.source == *s))
        .collect()
}
