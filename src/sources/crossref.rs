//! Crossref works API: DOI-centric secondary index.

use std::borrow::Cow;

use regex::Regex;
use serde::Deserialize;

use crate::entities::SearchHits;
use crate::entities::article::{Author, Source, UnifiedArticle, clamp_year};
use crate::entities::query::SearchFilters;
use crate::error::MedlitError;
use crate::sources::adapter::SourceAdapter;
use async_trait::async_trait;

const CROSSREF_BASE: &str = "https://api.crossref.org";
const CROSSREF_API: &str = "crossref";
const CROSSREF_BASE_ENV: &str = "MEDLIT_CROSSREF_BASE";

#[derive(Clone)]
pub struct CrossrefClient {
    client: reqwest_middleware::ClientWithMiddleware,
    base: Cow<'static, str>,
    mailto: String,
}

#[derive(Debug, Deserialize)]
struct WorksResponse {
    message: WorksMessage,
}

#[derive(Debug, Deserialize)]
struct WorksMessage {
    #[serde(rename = "total-results")]
    total_results: Option<u64>,
    #[serde(default)]
    items: Vec<Work>,
}

#[derive(Debug, Default, Deserialize)]
pub struct Work {
    #[serde(rename = "DOI", default)]
    pub doi: String,
    #[serde(default)]
    pub title: Vec<String>,
    #[serde(default)]
    pub author: Vec<WorkAuthor>,
    #[serde(rename = "container-title", default)]
    pub container_title: Vec<String>,
    pub issued: Option<DateParts>,
    pub r#abstract: Option<String>,
    #[serde(rename = "type")]
    pub work_type: Option<String>,
    pub language: Option<String>,
    #[serde(rename = "is-referenced-by-count")]
    pub is_referenced_by_count: Option<u64>,
    #[serde(default)]
    pub subject: Vec<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct WorkAuthor {
    pub given: Option<String>,
    pub family: Option<String>,
    #[serde(rename = "ORCID")]
    pub orcid: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct DateParts {
    #[serde(rename = "date-parts", default)]
    pub date_parts: Vec<Vec<i64>>,
}

impl CrossrefClient {
    pub fn new() -> Result<Self, MedlitError> {
        Ok(Self {
            client: crate::sources::shared_client()?,
            base: crate::sources::env_base(CROSSREF_BASE, CROSSREF_BASE_ENV),
            mailto: crate::config::contact_email(),
        })
    }

    #[cfg(test)]
    pub fn new_for_test(base: String) -> Result<Self, MedlitError> {
        Ok(Self {
            client: crate::sources::shared_client()?,
            base: Cow::Owned(base),
            mailto: "test@example.com".into(),
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

fn strip_jats(text: &str) -> String {
    let tag_re = Regex::new(r"</?jats:[^>]+>|</?[a-zA-Z][^>]*>").expect("static regex");
    tag_re.replace_all(text, " ").split_whitespace().collect::<Vec<_>>().join(" ")
}

pub fn from_work(work: &Work) -> Option<UnifiedArticle> {
    let title = work
        .title
        .first()
        .map(|t| t.trim().trim_end_matches('.').to_string())
        .filter(|t| !t.is_empty())?;
    let doi = work.doi.trim().to_ascii_lowercase();
    if doi.is_empty() {
        return None;
    }

    let mut article = UnifiedArticle::new(doi.clone(), title, Source::Crossref);
    article.doi = Some(doi);
    article.journal = work.container_title.first().cloned().filter(|v| !v.is_empty());
    article.year = work
        .issued
        .as_ref()
        .and_then(|d| d.date_parts.first())
        .and_then(|parts| parts.first())
        .and_then(|y| i32::try_from(*y).ok())
        .and_then(|y| clamp_year(y, crate::current_year()));
    for (i, author) in work.author.iter().enumerate() {
        let name = match (author.given.as_deref(), author.family.as_deref()) {
            (Some(given), Some(family)) => format!("{family} {given}"),
            (None, Some(family)) => family.to_string(),
            (Some(given), None) => given.to_string(),
            (None, None) => continue,
        };
        let mut entry = Author::new(i as u32 + 1, name);
        entry.orcid = author.orcid.clone();
        article.authors.push(entry);
    }
    article.abstract_text = work
        .r#abstract
        .as_deref()
        .map(strip_jats)
        .filter(|v| !v.is_empty());
    if let Some(work_type) = work.work_type.as_deref() {
        article
            .article_types
            .insert(work_type.replace('-', " ").to_ascii_lowercase());
        if work_type == "posted-content" {
            article.is_preprint = true;
        }
    }
    article.language = work.language.as_deref().map(|code| match code {
        "en" => "english".to_string(),
        other => other.to_string(),
    });
    for subject in &work.subject {
        article.keywords.insert(subject.to_ascii_lowercase());
    }
    if let Some(count) = work.is_referenced_by_count {
        article.citation_metrics = Some(crate::entities::article::CitationMetrics {
            citation_count: count,
            ..Default::default()
        });
    }
    Some(article)
}

#[async_trait]
impl SourceAdapter for CrossrefClient {
    fn source(&self) -> Source {
        Source::Crossref
    }

    async fn search(
        &self,
        query: &str,
        limit: usize,
        filters: &SearchFilters,
    ) -> Result<SearchHits, MedlitError> {
        let url = self.endpoint("works");
        let rows = limit.clamp(1, 100).to_string();
        let mut filter_parts: Vec<String> = Vec::new();
        if let Some(min) = filters.min_year {
            filter_parts.push(format!("from-pub-date:{min}-01-01"));
        }
        if let Some(max) = filters.max_year {
            filter_parts.push(format!("until-pub-date:{max}-12-31"));
        }
        let filter = filter_parts.join(",");

        let resp: WorksResponse = crate::sources::get_json(CROSSREF_API, || {
            let mut req = self.client.get(&url).query(&[
                ("query.bibliographic", query),
                ("rows", rows.as_str()),
                ("mailto", self.mailto.as_str()),
            ]);
            if !filter.is_empty() {
                req = req.query(&[("filter", filter.as_str())]);
            }
            req
        })
        .await?;

        let total = resp.message.total_results;
        let articles = resp
            .message
            .items
            .iter()
            .filter_map(from_work)
            .take(limit)
            .collect();
        Ok(SearchHits::new(articles, total))
    }

    async fn fetch(&self, id: &str) -> Result<Option<UnifiedArticle>, MedlitError> {
        let doi = id.trim();
        if !doi.starts_with("10.") || !doi.contains('/') {
            return Ok(None);
        }
        let url = self.endpoint(&format!("works/{doi}"));
        let resp = crate::sources::guarded_send(CROSSREF_API, || {
            self.client.get(&url).query(&[("mailto", self.mailto.as_str())])
        })
        .await?;
        if resp.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let status = resp.status();
        let bytes = crate::sources::read_limited_body(resp, CROSSREF_API).await?;
        if !status.is_success() {
            return Err(MedlitError::Api {
                api: CROSSREF_API.to_string(),
                message: format!("HTTP {status}: {}", crate::sources::body_excerpt(&bytes)),
            });
        }
        #[derive(Deserialize)]
        struct WorkResponse {
            message: Work,
        }
        let parsed: WorkResponse =
            serde_json::from_slice(&bytes).map_err(|source| MedlitError::ApiJson {
                api: CROSSREF_API.to_string(),
                source,
            })?;
        Ok(from_work(&parsed.message))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn work_transform_builds_doi_keyed_record() {
        let work = Work {
            doi: "10.1186/S13054-023".into(),
            title: vec!["Remimazolam trial.".into()],
            author: vec![WorkAuthor {
                given: Some("Jane".into()),
                family: Some("Smith".into()),
                orcid: None,
            }],
            container_title: vec!["Critical Care".into()],
            issued: Some(DateParts {
                date_parts: vec![vec![2023, 5]],
            }),
            r#abstract: Some("<jats:p>Background text.</jats:p>".into()),
            work_type: Some("journal-article".into()),
            language: Some("en".into()),
            is_referenced_by_count: Some(7),
            subject: vec![],
        };
        let article = from_work(&work).expect("work should map");
        assert_eq!(article.id, "10.1186/s13054-023");
        assert_eq!(article.doi.as_deref(), Some("10.1186/s13054-023"));
        assert_eq!(article.year, Some(2023));
        assert_eq!(article.authors[0].name, "Smith Jane");
        assert_eq!(article.abstract_text.as_deref(), Some("Background text."));
        assert_eq!(article.language.as_deref(), Some("english"));
        assert_eq!(article.citation_count(), Some(7));
    }

    #[test]
    fn posted_content_is_flagged_preprint() {
        let work = Work {
            doi: "10.1101/2024.01.01".into(),
            title: vec!["A preprint".into()],
            work_type: Some("posted-content".into()),
            ..Default::default()
        };
        let article = from_work(&work).expect("work should map");
        assert!(article.is_preprint);
    }

    #[tokio::test]
    async fn search_sends_bibliographic_query_and_mailto() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/works"))
            .and(query_param("query.bibliographic", "sedation"))
            .and(query_param("mailto", "test@example.com"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "message": {"total-results": 3, "items": [{
                    "DOI": "10.1/abc",
                    "title": ["Hit"],
                    "issued": {"date-parts": [[2021]]}
                }]}
            })))
            .mount(&server)
            .await;

        let client = CrossrefClient::new_for_test(server.uri()).unwrap();
        let hits = client
            .search("sedation", 5, &SearchFilters::default())
            .await
            .unwrap();
        assert_eq!(hits.total, Some(3));
        assert_eq!(hits.articles[0].id, "10.1/abc");
    }
}
