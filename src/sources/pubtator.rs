//! PubTator3: entity annotation provider. Autocomplete backs the entity
//! resolver; biocjson export backs per-document annotations.

use std::borrow::Cow;

use serde::Deserialize;

use crate::entities::article::Source;
use crate::entities::query::{EntityType, ResolvedEntity};
use crate::error::MedlitError;

const PUBTATOR_BASE: &str = "https://www.ncbi.nlm.nih.gov/research/pubtator3-api";
const PUBTATOR_API: &str = "pubtator";
const PUBTATOR_BASE_ENV: &str = "MEDLIT_PUBTATOR_BASE";

#[derive(Clone)]
pub struct PubTatorClient {
    client: reqwest_middleware::ClientWithMiddleware,
    base: Cow<'static, str>,
}

#[derive(Debug, Default, Deserialize)]
pub struct AutocompleteEntry {
    #[serde(rename = "_id", default)]
    pub id: String,
    pub biotype: Option<String>,
    pub name: Option<String>,
    #[serde(rename = "match")]
    pub match_kind: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct RelationEntry {
    pub source: Option<String>,
    pub target: Option<String>,
    #[serde(rename = "type")]
    pub relation_type: Option<String>,
    #[serde(default)]
    pub publications: u64,
}

#[derive(Debug, Default, Deserialize)]
pub struct BiocDocument {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub passages: Vec<BiocPassage>,
}

#[derive(Debug, Default, Deserialize)]
pub struct BiocPassage {
    #[serde(default)]
    pub annotations: Vec<BiocAnnotation>,
}

#[derive(Debug, Default, Deserialize)]
pub struct BiocAnnotation {
    pub text: Option<String>,
    pub infons: Option<BiocInfons>,
}

#[derive(Debug, Default, Deserialize)]
pub struct BiocInfons {
    #[serde(rename = "type")]
    pub entity_type: Option<String>,
    pub identifier: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ExportResponse {
    #[serde(rename = "PubTator3", default)]
    documents: Vec<BiocDocument>,
}

impl PubTatorClient {
    pub fn new() -> Result<Self, MedlitError> {
        Ok(Self {
            client: crate::sources::shared_client()?,
            base: crate::sources::env_base(PUBTATOR_BASE, PUBTATOR_BASE_ENV),
        })
    }

    #[cfg(test)]
    pub fn new_for_test(base: String) -> Result<Self, MedlitError> {
        Ok(Self {
            client: crate::sources::shared_client()?,
            base: Cow::Owned(base),
        })
    }

    pub fn source(&self) -> Source {
        Source::Pubtator
    }

    fn endpoint(&self, path: &str) -> String {
        format!(
            "{}/{}",
            self.base.as_ref().trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    }

    /// Best canonical-entity matches for a free-text span.
    pub async fn autocomplete(
        &self,
        query: &str,
        limit: usize,
    ) -> Result<Vec<ResolvedEntity>, MedlitError> {
        let query = query.trim();
        if query.is_empty() {
            return Ok(Vec::new());
        }
        let url = self.endpoint("entity/autocomplete/");
        let limit_str = limit.clamp(1, 25).to_string();
        let entries: Vec<AutocompleteEntry> = crate::sources::get_json(PUBTATOR_API, || {
            self.client
                .get(&url)
                .query(&[("query", query), ("limit", limit_str.as_str())])
        })
        .await?;
        let total = entries.len();
        Ok(entries
            .iter()
            .enumerate()
            .filter_map(|(rank, entry)| to_resolved(query, entry, rank, total))
            .collect())
    }

    /// Entity-to-entity relations (e.g. chemical treats disease).
    pub async fn relations(
        &self,
        entity_id: &str,
        relation_type: Option<&str>,
    ) -> Result<Vec<RelationEntry>, MedlitError> {
        let url = self.endpoint("relations");
        crate::sources::get_json(PUBTATOR_API, || {
            let mut req = self.client.get(&url).query(&[("e1", entity_id)]);
            if let Some(t) = relation_type {
                req = req.query(&[("type", t)]);
            }
            req
        })
        .await
    }

    /// Entity annotations for a set of PMIDs.
    pub async fn annotations(&self, pmids: &[String]) -> Result<Vec<BiocDocument>, MedlitError> {
        if pmids.is_empty() {
            return Ok(Vec::new());
        }
        let url = self.endpoint("publications/export/biocjson");
        let joined = pmids.join(",");
        let resp: ExportResponse = crate::sources::get_json(PUBTATOR_API, || {
            self.client.get(&url).query(&[("pmids", joined.as_str())])
        })
        .await?;
        Ok(resp.documents)
    }
}

fn parse_entity_type(biotype: &str) -> Option<EntityType> {
    match biotype.to_ascii_lowercase().as_str() {
        "gene" => Some(EntityType::Gene),
        "disease" => Some(EntityType::Disease),
        "chemical" | "drug" => Some(EntityType::Chemical),
        "species" => Some(EntityType::Species),
        "variant" | "mutation" => Some(EntityType::Variant),
        _ => None,
    }
}

/// Rank-decayed confidence: the first suggestion of a full match scores
/// highest, later suggestions decay linearly.
fn to_resolved(
    query: &str,
    entry: &AutocompleteEntry,
    rank: usize,
    total: usize,
) -> Option<ResolvedEntity> {
    let entity_type = entry.biotype.as_deref().and_then(parse_entity_type)?;
    let name = entry.name.as_deref()?.trim().to_string();
    if name.is_empty() || entry.id.is_empty() {
        return None;
    }
    let exact = name.eq_ignore_ascii_case(query.trim());
    let base = if exact { 1.0 } else { 0.85 };
    let decay = if total > 1 {
        rank as f64 / (2 * total) as f64
    } else {
        0.0
    };
    Some(ResolvedEntity {
        text: query.trim().to_string(),
        name,
        entity_type,
        entity_id: entry.id.clone(),
        score: (base - decay).max(0.1),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn exact_match_scores_above_prefix_match() {
        let exact = AutocompleteEntry {
            id: "@CHEMICAL_remimazolam".into(),
            biotype: Some("chemical".into()),
            name: Some("remimazolam".into()),
            match_kind: None,
        };
        let fuzzy = AutocompleteEntry {
            id: "@CHEMICAL_remifentanil".into(),
            biotype: Some("chemical".into()),
            name: Some("remifentanil".into()),
            match_kind: None,
        };
        let a = to_resolved("remimazolam", &exact, 0, 2).unwrap();
        let b = to_resolved("remimazolam", &fuzzy, 1, 2).unwrap();
        assert!(a.score > b.score);
        assert_eq!(a.entity_type, EntityType::Chemical);
    }

    #[test]
    fn unknown_biotype_is_dropped() {
        let entry = AutocompleteEntry {
            id: "@CELLLINE_hela".into(),
            biotype: Some("cellline".into()),
            name: Some("HeLa".into()),
            match_kind: None,
        };
        assert!(to_resolved("hela", &entry, 0, 1).is_none());
    }

    #[tokio::test]
    async fn autocomplete_maps_entries() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/entity/autocomplete/"))
            .and(query_param("query", "propofol"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([
                {"_id": "@CHEMICAL_propofol", "biotype": "chemical", "name": "propofol"}
            ])))
            .mount(&server)
            .await;

        let client = PubTatorClient::new_for_test(server.uri()).unwrap();
        let entities = client.autocomplete("propofol", 5).await.unwrap();
        assert_eq!(entities.len(), 1);
        assert_eq!(entities[0].entity_id, "@CHEMICAL_propofol");
        assert!(entities[0].score > 0.9);
    }

    #[tokio::test]
    async fn annotations_parse_biocjson_documents() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/publications/export/biocjson"))
            .and(query_param("pmids", "12345"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "PubTator3": [{
                    "id": "12345",
                    "passages": [{"annotations": [
                        {"text": "remimazolam", "infons": {"type": "Chemical", "identifier": "MESH:C000599"}}
                    ]}]
                }]
            })))
            .mount(&server)
            .await;

        let client = PubTatorClient::new_for_test(server.uri()).unwrap();
        let docs = client.annotations(&["12345".to_string()]).await.unwrap();
        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0].passages[0].annotations[0].text.as_deref(), Some("remimazolam"));
    }
}
