//! Entity resolver: free text in, canonical biomedical entity out. Wraps
//! the annotation provider behind the TTL+LRU cache; concurrent misses for
//! the same key are coalesced behind a per-key lock so exactly one
//! upstream call fires.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::entities::query::ResolvedEntity;
use crate::error::MedlitError;
use crate::sources::pubtator::{BiocDocument, PubTatorClient, RelationEntry};
use crate::unified::cache::TtlCache;

pub struct EntityResolver {
    client: PubTatorClient,
    cache: TtlCache<Option<ResolvedEntity>>,
    inflight: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl EntityResolver {
    pub fn new(client: PubTatorClient) -> Self {
        Self {
            client,
            cache: TtlCache::with_defaults(),
            inflight: Mutex::new(HashMap::new()),
        }
    }

    #[cfg(test)]
    pub fn with_cache(client: PubTatorClient, cache: TtlCache<Option<ResolvedEntity>>) -> Self {
        Self {
            client,
            cache,
            inflight: Mutex::new(HashMap::new()),
        }
    }

    /// Resolve a free-text span to its best canonical entity. Best-effort:
    /// upstream failures resolve to `None` rather than failing the caller.
    pub async fn resolve(&self, text: &str) -> Option<ResolvedEntity> {
        let key = TtlCache::<Option<ResolvedEntity>>::normalize_key(text);
        if key.is_empty() {
            return None;
        }
        if let Some(cached) = self.cache.get(&key) {
            return cached;
        }

        let key_lock = {
            let mut inflight = self.inflight.lock().await;
            inflight
                .entry(key.clone())
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .clone()
        };
        let _guard = key_lock.lock().await;

        // A coalesced waiter may find the value freshly cached.
        if let Some(cached) = self.cache.get(&key) {
            return cached;
        }

        let resolved = match self.client.autocomplete(&key, 5).await {
            Ok(entities) => entities.into_iter().max_by(|a, b| {
                a.score
                    .partial_cmp(&b.score)
                    .unwrap_or(std::cmp::Ordering::Equal)
            }),
            Err(err) => {
                warn!(?err, text = %key, "entity resolution failed");
                // Not cached: the next caller should retry upstream.
                self.remove_inflight(&key).await;
                return None;
            }
        };
        debug!(text = %key, resolved = resolved.is_some(), "entity resolved");
        self.cache.put(&key, resolved.clone());
        self.remove_inflight(&key).await;
        resolved
    }

    async fn remove_inflight(&self, key: &str) {
        let mut inflight = self.inflight.lock().await;
        inflight.remove(key);
    }

    /// Resolve several candidate spans, keeping confident hits only.
    pub async fn resolve_all(&self, candidates: &[String]) -> Vec<ResolvedEntity> {
        let mut out: Vec<ResolvedEntity> = Vec::new();
        for candidate in candidates {
            if let Some(entity) = self.resolve(candidate).await
                && entity.score >= 0.5
                && !out.iter().any(|e| e.entity_id == entity.entity_id)
            {
                out.push(entity);
            }
        }
        out
    }

    pub async fn relations(
        &self,
        entity_id: &str,
        relation_type: Option<&str>,
    ) -> Result<Vec<RelationEntry>, MedlitError> {
        self.client.relations(entity_id, relation_type).await
    }

    pub async fn annotations(&self, pmids: &[String]) -> Result<Vec<BiocDocument>, MedlitError> {
        self.client.annotations(pmids).await
    }

    pub fn cache_stats(&self) -> (u64, u64) {
        (self.cache.stats().hits(), self.cache.stats().misses())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn autocomplete_body() -> serde_json::Value {
        serde_json::json!([
            {"_id": "@CHEMICAL_remimazolam", "biotype": "chemical", "name": "remimazolam"}
        ])
    }

    #[tokio::test]
    async fn cached_key_does_not_refetch() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/entity/autocomplete/"))
            .respond_with(ResponseTemplate::new(200).set_body_json(autocomplete_body()))
            .expect(1)
            .mount(&server)
            .await;

        let resolver = EntityResolver::new(PubTatorClient::new_for_test(server.uri()).unwrap());
        let first = resolver.resolve("Remimazolam").await;
        let second = resolver.resolve("  remimazolam ").await;
        assert_eq!(
            first.as_ref().map(|e| e.entity_id.as_str()),
            Some("@CHEMICAL_remimazolam")
        );
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn concurrent_misses_coalesce_to_one_upstream_call() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/entity/autocomplete/"))
            .and(query_param("query", "propofol"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!([
                        {"_id": "@CHEMICAL_propofol", "biotype": "chemical", "name": "propofol"}
                    ]))
                    .set_delay(std::time::Duration::from_millis(50)),
            )
            .expect(1)
            .mount(&server)
            .await;

        let resolver = Arc::new(EntityResolver::new(
            PubTatorClient::new_for_test(server.uri()).unwrap(),
        ));
        let mut handles = Vec::new();
        for _ in 0..8 {
            let resolver = resolver.clone();
            handles.push(tokio::spawn(
                async move { resolver.resolve("propofol").await },
            ));
        }
        for handle in handles {
            let resolved = handle.await.unwrap();
            assert_eq!(
                resolved.map(|e| e.entity_id),
                Some("@CHEMICAL_propofol".to_string())
            );
        }
        // The mock's expect(1) verifies exactly one upstream fetch fired.
    }

    #[tokio::test]
    async fn upstream_failure_resolves_none_and_is_not_cached() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/entity/autocomplete/"))
            .respond_with(ResponseTemplate::new(400))
            .mount(&server)
            .await;

        let resolver = EntityResolver::new(PubTatorClient::new_for_test(server.uri()).unwrap());
        assert!(resolver.resolve("badterm").await.is_none());
        let (hits, _) = resolver.cache_stats();
        assert_eq!(hits, 0);
    }
}
