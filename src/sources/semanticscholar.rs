//! Semantic Scholar graph API: secondary index plus the recommendation
//! endpoint backing the `related` capability for non-PubMed IDs.

use std::borrow::Cow;

use serde::Deserialize;

use crate::entities::SearchHits;
use crate::entities::article::{Author, Source, UnifiedArticle, clamp_year};
use crate::entities::query::SearchFilters;
use crate::error::MedlitError;
use crate::sources::adapter::{RelatedCapability, SourceAdapter};
use async_trait::async_trait;

const S2_BASE: &str = "https://api.semanticscholar.org";
const S2_API: &str = "semanticscholar";
const S2_BASE_ENV: &str = "MEDLIT_SEMANTICSCHOLAR_BASE";

const S2_FIELDS: &str =
    "title,abstract,year,venue,authors,externalIds,citationCount,publicationTypes";

#[derive(Clone)]
pub struct SemanticScholarClient {
    client: reqwest_middleware::ClientWithMiddleware,
    base: Cow<'static, str>,
}

#[derive(Debug, Deserialize)]
struct PaperSearchResponse {
    total: Option<u64>,
    #[serde(default)]
    data: Vec<Paper>,
}

#[derive(Debug, Deserialize)]
struct RecommendationsResponse {
    #[serde(rename = "recommendedPapers", default)]
    recommended_papers: Vec<Paper>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Paper {
    #[serde(default)]
    pub paper_id: String,
    pub title: Option<String>,
    pub r#abstract: Option<String>,
    pub year: Option<i32>,
    pub venue: Option<String>,
    #[serde(default)]
    pub authors: Vec<PaperAuthor>,
    pub external_ids: Option<PaperExternalIds>,
    pub citation_count: Option<u64>,
    #[serde(default)]
    pub publication_types: Option<Vec<String>>,
}

#[derive(Debug, Default, Deserialize)]
pub struct PaperAuthor {
    pub name: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct PaperExternalIds {
    #[serde(rename = "DOI")]
    pub doi: Option<String>,
    #[serde(rename = "PubMed")]
    pub pubmed: Option<String>,
    #[serde(rename = "PubMedCentral")]
    pub pubmed_central: Option<String>,
}

impl SemanticScholarClient {
    pub fn new() -> Result<Self, MedlitError> {
        Ok(Self {
            client: crate::sources::shared_client()?,
            base: crate::sources::env_base(S2_BASE, S2_BASE_ENV),
        })
    }

    #[cfg(test)]
    pub fn new_for_test(base: String) -> Result<Self, MedlitError> {
        Ok(Self {
            client: crate::sources::shared_client()?,
            base: Cow::Owned(base),
        })
    }

    fn endpoint(&self, path: &str) -> String {
        format!(
            "{}/{}",
            self.base.as_ref().trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    }
}

/// IDs are passed to Semantic Scholar in its prefixed forms.
fn s2_paper_id(id: &str) -> String {
    let id = id.trim();
    if id.chars().all(|c| c.is_ascii_digit()) {
        format!("PMID:{id}")
    } else if id.starts_with("10.") && id.contains('/') {
        format!("DOI:{id}")
    } else {
        id.to_string()
    }
}

pub fn from_paper(paper: &Paper) -> Option<UnifiedArticle> {
    let title = paper
        .title
        .as_deref()
        .map(|t| t.trim().trim_end_matches('.').to_string())
        .filter(|t| !t.is_empty())?;
    let ids = paper.external_ids.as_ref();
    let pmid = ids.and_then(|v| v.pubmed.clone()).filter(|v| !v.is_empty());
    let doi = ids
        .and_then(|v| v.doi.as_deref())
        .map(str::to_ascii_lowercase)
        .filter(|v| !v.is_empty());
    let id = pmid
        .clone()
        .or_else(|| doi.clone())
        .unwrap_or_else(|| paper.paper_id.clone());
    if id.is_empty() {
        return None;
    }

    let mut article = UnifiedArticle::new(id, title, Source::SemanticScholar);
    article.pmid = pmid;
    article.doi = doi;
    article.pmcid = ids
        .and_then(|v| v.pubmed_central.as_deref())
        .map(|v| {
            if v.starts_with("PMC") {
                v.to_string()
            } else {
                format!("PMC{v}")
            }
        })
        .filter(|v| v.len() > 3);
    if !paper.paper_id.is_empty() {
        article
            .alternate_ids
            .insert(Source::SemanticScholar, paper.paper_id.clone());
    }
    article.year = paper.year.and_then(|y| clamp_year(y, crate::current_year()));
    article.journal = paper.venue.clone().filter(|v| !v.is_empty());
    article.abstract_text = paper
        .r#abstract
        .as_deref()
        .map(str::trim)
        .map(str::to_string)
        .filter(|v| !v.is_empty());
    for (i, author) in paper.authors.iter().enumerate() {
        if let Some(name) = author.name.as_deref() {
            article.authors.push(Author::new(i as u32 + 1, name));
        }
    }
    for publication_type in paper.publication_types.iter().flatten() {
        article
            .article_types
            .insert(publication_type.to_ascii_lowercase());
    }
    if let Some(count) = paper.citation_count {
        article.citation_metrics = Some(crate::entities::article::CitationMetrics {
            citation_count: count,
            ..Default::default()
        });
    }
    Some(article)
}

#[async_trait]
impl SourceAdapter for SemanticScholarClient {
    fn source(&self) -> Source {
        Source::SemanticScholar
    }

    async fn search(
        &self,
        query: &str,
        limit: usize,
        filters: &SearchFilters,
    ) -> Result<SearchHits, MedlitError> {
        let url = self.endpoint("graph/v1/paper/search");
        let limit_str = limit.clamp(1, 100).to_string();
        let year_filter = match (filters.min_year, filters.max_year) {
            (Some(min), Some(max)) => Some(format!("{min}-{max}")),
            (Some(min), None) => Some(format!("{min}-")),
            (None, Some(max)) => Some(format!("-{max}")),
            (None, None) => None,
        };

        let resp: PaperSearchResponse = crate::sources::get_json(S2_API, || {
            let mut req = self.client.get(&url).query(&[
                ("query", query),
                ("limit", limit_str.as_str()),
                ("fields", S2_FIELDS),
            ]);
            if let Some(year) = year_filter.as_deref() {
                req = req.query(&[("year", year)]);
            }
            req
        })
        .await?;

        let total = resp.total;
        let articles = resp
            .data
            .iter()
            .filter_map(from_paper)
            .take(limit)
            .collect();
        Ok(SearchHits::new(articles, total))
    }

    async fn fetch(&self, id: &str) -> Result<Option<UnifiedArticle>, MedlitError> {
        let paper_id = s2_paper_id(id);
        let url = self.endpoint(&format!("graph/v1/paper/{paper_id}"));
        let resp = crate::sources::guarded_send(S2_API, || {
            self.client.get(&url).query(&[("fields", S2_FIELDS)])
        })
        .await?;
        if resp.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let status = resp.status();
        let bytes = crate::sources::read_limited_body(resp, S2_API).await?;
        if !status.is_success() {
            return Err(MedlitError::Api {
                api: S2_API.to_string(),
                message: format!("HTTP {status}: {}", crate::sources::body_excerpt(&bytes)),
            });
        }
        let paper: Paper = serde_json::from_slice(&bytes).map_err(|source| MedlitError::ApiJson {
            api: S2_API.to_string(),
            source,
        })?;
        Ok(from_paper(&paper))
    }

    fn related(&self) -> Option<&dyn RelatedCapability> {
        Some(self)
    }
}

#[async_trait]
impl RelatedCapability for SemanticScholarClient {
    async fn related(&self, id: &str, limit: usize) -> Result<Vec<UnifiedArticle>, MedlitError> {
        let paper_id = s2_paper_id(id);
        let url = self.endpoint(&format!("recommendations/v1/papers/forpaper/{paper_id}"));
        let limit_str = limit.clamp(1, 100).to_string();
        let resp: RecommendationsResponse = crate::sources::get_json(S2_API, || {
            self.client
                .get(&url)
                .query(&[("limit", limit_str.as_str()), ("fields", S2_FIELDS)])
        })
        .await?;
        Ok(resp
            .recommended_papers
            .iter()
            .filter_map(from_paper)
            .take(limit)
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn paper_id_prefixing() {
        assert_eq!(s2_paper_id("12345"), "PMID:12345");
        assert_eq!(s2_paper_id("10.1/abc"), "DOI:10.1/abc");
        assert_eq!(s2_paper_id("649def34f8be52c8b66281af98ae884c09aef38b"), "649def34f8be52c8b66281af98ae884c09aef38b");
    }

    #[test]
    fn paper_transform_normalizes_pmcid() {
        let paper = Paper {
            paper_id: "abc123".into(),
            title: Some("Remimazolam paper".into()),
            year: Some(2021),
            external_ids: Some(PaperExternalIds {
                doi: Some("10.1/ABC".into()),
                pubmed: Some("33000000".into()),
                pubmed_central: Some("8000000".into()),
            }),
            ..Default::default()
        };
        let article = from_paper(&paper).expect("paper should map");
        assert_eq!(article.id, "33000000");
        assert_eq!(article.doi.as_deref(), Some("10.1/abc"));
        assert_eq!(article.pmcid.as_deref(), Some("PMC8000000"));
    }

    #[tokio::test]
    async fn related_uses_recommendations_endpoint() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/recommendations/v1/papers/forpaper/PMID:12345"))
            .and(query_param("limit", "3"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "recommendedPapers": [
                    {"paperId": "p1", "title": "Related one", "year": 2020},
                    {"paperId": "p2", "title": "Related two", "year": 2021}
                ]
            })))
            .mount(&server)
            .await;

        let client = SemanticScholarClient::new_for_test(server.uri()).unwrap();
        let related = RelatedCapability::related(&client, "12345", 3).await.unwrap();
        assert_eq!(related.len(), 2);
        assert_eq!(related[0].title, "Related one");
    }
}
