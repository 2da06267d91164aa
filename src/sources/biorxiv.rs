//! Preprint index adapter (bioRxiv/medRxiv). The bioRxiv API has no
//! keyword search, so search goes through the Europe PMC preprint corpus
//! (SRC:PPR) while per-DOI details come from api.biorxiv.org.

use std::borrow::Cow;

use serde::Deserialize;

use crate::entities::SearchHits;
use crate::entities::article::{Author, Source, UnifiedArticle, clamp_year};
use crate::entities::query::SearchFilters;
use crate::error::MedlitError;
use crate::sources::adapter::SourceAdapter;
use async_trait::async_trait;

const BIORXIV_BASE: &str = "https://api.biorxiv.org";
const PREPRINT_SEARCH_BASE: &str = "https://www.ebi.ac.uk/europepmc/webservices/rest";
const BIORXIV_API: &str = "biorxiv";
const BIORXIV_BASE_ENV: &str = "MEDLIT_BIORXIV_BASE";
const PREPRINT_SEARCH_BASE_ENV: &str = "MEDLIT_BIORXIV_SEARCH_BASE";

#[derive(Clone)]
pub struct BiorxivClient {
    client: reqwest_middleware::ClientWithMiddleware,
    base: Cow<'static, str>,
    search_base: Cow<'static, str>,
}

#[derive(Debug, Deserialize)]
struct DetailsResponse {
    #[serde(default)]
    collection: Vec<DetailsRecord>,
}

#[derive(Debug, Default, Deserialize)]
pub struct DetailsRecord {
    pub doi: Option<String>,
    pub title: Option<String>,
    pub authors: Option<String>,
    pub date: Option<String>,
    pub category: Option<String>,
    pub server: Option<String>,
    #[serde(rename = "abstract")]
    pub abstract_text: Option<String>,
    pub version: Option<String>,
    pub published: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PreprintSearchResponse {
    hit_count: Option<u64>,
    result_list: Option<PreprintResultList>,
}

#[derive(Debug, Deserialize)]
struct PreprintResultList {
    #[serde(default)]
    result: Vec<PreprintResult>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PreprintResult {
    #[serde(default)]
    id: String,
    doi: Option<String>,
    title: Option<String>,
    author_string: Option<String>,
    journal_title: Option<String>,
    pub_year: Option<String>,
    abstract_text: Option<String>,
}

impl BiorxivClient {
    pub fn new() -> Result<Self, MedlitError> {
        Ok(Self {
            client: crate::sources::shared_client()?,
            base: crate::sources::env_base(BIORXIV_BASE, BIORXIV_BASE_ENV),
            search_base: crate::sources::env_base(
                PREPRINT_SEARCH_BASE,
                PREPRINT_SEARCH_BASE_ENV,
            ),
        })
    }

    #[cfg(test)]
    pub fn new_for_test(base: String, search_base: String) -> Result<Self, MedlitError> {
        Ok(Self {
            client: crate::sources::shared_client()?,
            base: Cow::Owned(base),
            search_base: Cow::Owned(search_base),
        })
    }

    /// Version history and publication status for a bioRxiv/medRxiv DOI.
    pub async fn details(&self, doi: &str) -> Result<Option<DetailsRecord>, MedlitError> {
        let doi = doi.trim();
        if !doi.starts_with("10.1101/") {
            return Ok(None);
        }
        for server in ["biorxiv", "medrxiv"] {
            let url = format!(
                "{}/details/{server}/{doi}",
                self.base.as_ref().trim_end_matches('/')
            );
            let resp: DetailsResponse =
                crate::sources::get_json(BIORXIV_API, || self.client.get(&url)).await?;
            // Latest version is the last collection entry.
            if let Some(record) = resp.collection.into_iter().next_back() {
                return Ok(Some(record));
            }
        }
        Ok(None)
    }
}

pub fn from_details(record: &DetailsRecord) -> Option<UnifiedArticle> {
    let title = record
        .title
        .as_deref()
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty())?;
    let doi = record
        .doi
        .as_deref()
        .map(str::to_ascii_lowercase)
        .filter(|v| !v.is_empty())?;

    let mut article = UnifiedArticle::new(doi.clone(), title, Source::Biorxiv);
    article.doi = Some(doi);
    article.is_preprint = true;
    article.journal = record.server.as_deref().map(|s| match s {
        "biorxiv" => "bioRxiv".to_string(),
        "medrxiv" => "medRxiv".to_string(),
        other => other.to_string(),
    });
    article.year = record
        .date
        .as_deref()
        .and_then(|d| d.split('-').next())
        .and_then(|y| y.parse::<i32>().ok())
        .and_then(|y| clamp_year(y, crate::current_year()));
    article.abstract_text = record
        .abstract_text
        .as_deref()
        .map(str::trim)
        .map(str::to_string)
        .filter(|v| !v.is_empty());
    if let Some(authors) = record.authors.as_deref() {
        for (i, name) in authors.split(';').map(str::trim).filter(|v| !v.is_empty()).enumerate() {
            article.authors.push(Author::new(i as u32 + 1, name));
        }
    }
    if let Some(category) = record.category.as_deref() {
        article.keywords.insert(category.to_ascii_lowercase());
    }
    article.article_types.insert("preprint".to_string());
    Some(article)
}

#[async_trait]
impl SourceAdapter for BiorxivClient {
    fn source(&self) -> Source {
        Source::Biorxiv
    }

    async fn search(
        &self,
        query: &str,
        limit: usize,
        filters: &SearchFilters,
    ) -> Result<SearchHits, MedlitError> {
        let mut q = format!("({}) AND SRC:PPR", query.trim());
        if let (Some(min), Some(max)) = (filters.min_year, filters.max_year) {
            q.push_str(&format!(" AND PUB_YEAR:[{min} TO {max}]"));
        }
        let url = format!(
            "{}/search",
            self.search_base.as_ref().trim_end_matches('/')
        );
        let page_size = limit.clamp(1, 100).to_string();
        let resp: PreprintSearchResponse = crate::sources::get_json(BIORXIV_API, || {
            self.client.get(&url).query(&[
                ("query", q.as_str()),
                ("format", "json"),
                ("resultType", "core"),
                ("pageSize", page_size.as_str()),
            ])
        })
        .await?;

        let total = resp.hit_count;
        let mut articles = Vec::new();
        for hit in resp.result_list.map(|l| l.result).unwrap_or_default() {
            let Some(title) = hit
                .title
                .as_deref()
                .map(|t| t.trim().trim_end_matches('.').to_string())
                .filter(|t| !t.is_empty())
            else {
                continue;
            };
            let id = hit
                .doi
                .clone()
                .map(|d| d.to_ascii_lowercase())
                .unwrap_or_else(|| format!("PPR:{}", hit.id));
            let mut article = UnifiedArticle::new(id, title, Source::Biorxiv);
            article.doi = hit.doi.as_deref().map(str::to_ascii_lowercase);
            article.is_preprint = true;
            article.journal = hit.journal_title.clone();
            article.year = hit
                .pub_year
                .as_deref()
                .and_then(|v| v.parse::<i32>().ok())
                .and_then(|y| clamp_year(y, crate::current_year()));
            article.abstract_text = hit.abstract_text.clone();
            if let Some(authors) = hit.author_string.as_deref() {
                for (i, name) in authors
                    .trim_end_matches('.')
                    .split(", ")
                    .filter(|v| !v.is_empty())
                    .enumerate()
                {
                    article.authors.push(Author::new(i as u32 + 1, name));
                }
            }
            article.article_types.insert("preprint".to_string());
            articles.push(article);
            if articles.len() >= limit {
                break;
            }
        }
        Ok(SearchHits::new(articles, total))
    }

    async fn fetch(&self, id: &str) -> Result<Option<UnifiedArticle>, MedlitError> {
        Ok(self.details(id).await?.as_ref().and_then(from_details))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn details_transform_marks_preprint() {
        let record = DetailsRecord {
            doi: Some("10.1101/2024.01.15.575612".into()),
            title: Some("A new sedative".into()),
            authors: Some("Smith, J.; Doe, A.".into()),
            date: Some("2024-01-15".into()),
            server: Some("biorxiv".into()),
            ..Default::default()
        };
        let article = from_details(&record).expect("record should map");
        assert!(article.is_preprint);
        assert_eq!(article.year, Some(2024));
        assert_eq!(article.journal.as_deref(), Some("bioRxiv"));
        assert_eq!(article.authors.len(), 2);
    }

    #[tokio::test]
    async fn search_restricts_to_preprint_corpus() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/search"))
            .and(query_param("query", "(sedation) AND SRC:PPR"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "hitCount": 1,
                "resultList": {"result": [{
                    "id": "PPR111",
                    "doi": "10.1101/2024.02.01.123456",
                    "title": "Preprint hit",
                    "pubYear": "2024"
                }]}
            })))
            .mount(&server)
            .await;

        let client =
            BiorxivClient::new_for_test("http://unused.invalid".into(), server.uri()).unwrap();
        let hits = client
            .search("sedation", 5, &SearchFilters::default())
            .await
            .unwrap();
        assert_eq!(hits.articles.len(), 1);
        assert!(hits.articles[0].is_preprint);
        assert_eq!(hits.articles[0].id, "10.1101/2024.02.01.123456");
    }
}
