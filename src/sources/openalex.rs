//! OpenAlex works API. Abstracts arrive as an inverted index and are
//! reassembled locally.

use std::borrow::Cow;
use std::collections::HashMap;

use serde::Deserialize;

use crate::entities::SearchHits;
use crate::entities::article::{Author, Source, UnifiedArticle, clamp_year};
use crate::entities::query::SearchFilters;
use crate::error::MedlitError;
use crate::sources::adapter::SourceAdapter;
use async_trait::async_trait;

const OPENALEX_BASE: &str = "https://api.openalex.org";
const OPENALEX_API: &str = "openalex";
const OPENALEX_BASE_ENV: &str = "MEDLIT_OPENALEX_BASE";

#[derive(Clone)]
pub struct OpenAlexClient {
    client: reqwest_middleware::ClientWithMiddleware,
    base: Cow<'static, str>,
    mailto: String,
}

#[derive(Debug, Deserialize)]
struct WorksResponse {
    meta: Option<Meta>,
    #[serde(default)]
    results: Vec<OaWork>,
}

#[derive(Debug, Deserialize)]
struct Meta {
    count: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
pub struct OaWork {
    #[serde(default)]
    pub id: String,
    pub doi: Option<String>,
    pub display_name: Option<String>,
    pub publication_year: Option<i32>,
    #[serde(default)]
    pub authorships: Vec<OaAuthorship>,
    pub primary_location: Option<OaLocation>,
    pub cited_by_count: Option<u64>,
    #[serde(rename = "type")]
    pub work_type: Option<String>,
    pub language: Option<String>,
    pub ids: Option<OaIds>,
    pub abstract_inverted_index: Option<HashMap<String, Vec<u32>>>,
    pub is_retracted: Option<bool>,
    #[serde(default)]
    pub keywords: Vec<OaKeyword>,
}

#[derive(Debug, Default, Deserialize)]
pub struct OaKeyword {
    pub display_name: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct OaAuthorship {
    pub author: Option<OaAuthor>,
}

#[derive(Debug, Default, Deserialize)]
pub struct OaAuthor {
    pub display_name: Option<String>,
    pub orcid: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct OaLocation {
    pub source: Option<OaLocationSource>,
}

#[derive(Debug, Default, Deserialize)]
pub struct OaLocationSource {
    pub display_name: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct OaIds {
    pub pmid: Option<String>,
    pub pmcid: Option<String>,
}

impl OpenAlexClient {
    pub fn new() -> Result<Self, MedlitError> {
        Ok(Self {
            client: crate::sources::shared_client()?,
            base: crate::sources::env_base(OPENALEX_BASE, OPENALEX_BASE_ENV),
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

/// Rebuild an abstract from OpenAlex's inverted index representation.
pub fn invert_abstract(index: &HashMap<String, Vec<u32>>) -> Option<String> {
    if index.is_empty() {
        return None;
    }
    let mut positions: Vec<(u32, &str)> = Vec::new();
    for (word, offsets) in index {
        for offset in offsets {
            positions.push((*offset, word.as_str()));
        }
    }
    positions.sort_unstable();
    let text = positions
        .iter()
        .map(|(_, word)| *word)
        .collect::<Vec<_>>()
        .join(" ");
    (!text.is_empty()).then_some(text)
}

fn trailing_id(url_or_id: &str) -> String {
    url_or_id
        .rsplit('/')
        .next()
        .unwrap_or(url_or_id)
        .to_string()
}

pub fn from_work(work: &OaWork) -> Option<UnifiedArticle> {
    let title = work
        .display_name
        .as_deref()
        .map(|t| t.trim().trim_end_matches('.').to_string())
        .filter(|t| !t.is_empty())?;

    let pmid = work
        .ids
        .as_ref()
        .and_then(|ids| ids.pmid.as_deref())
        .map(trailing_id)
        .filter(|v| !v.is_empty());
    let doi = work
        .doi
        .as_deref()
        .map(|d| d.trim_start_matches("https://doi.org/").to_ascii_lowercase())
        .filter(|v| !v.is_empty());
    let openalex_id = trailing_id(&work.id);
    let id = pmid
        .clone()
        .or_else(|| doi.clone())
        .unwrap_or_else(|| openalex_id.clone());
    if id.is_empty() {
        return None;
    }

    let mut article = UnifiedArticle::new(id, title, Source::OpenAlex);
    article.pmid = pmid;
    article.doi = doi;
    article.pmcid = work
        .ids
        .as_ref()
        .and_then(|ids| ids.pmcid.as_deref())
        .map(trailing_id)
        .filter(|v| !v.is_empty());
    if !openalex_id.is_empty() {
        article.alternate_ids.insert(Source::OpenAlex, openalex_id);
    }
    article.year = work
        .publication_year
        .and_then(|y| clamp_year(y, crate::current_year()));
    article.journal = work
        .primary_location
        .as_ref()
        .and_then(|l| l.source.as_ref())
        .and_then(|s| s.display_name.clone());
    for (i, authorship) in work.authorships.iter().enumerate() {
        let Some(author) = authorship.author.as_ref() else {
            continue;
        };
        let Some(name) = author.display_name.as_deref() else {
            continue;
        };
        let mut entry = Author::new(i as u32 + 1, name);
        entry.orcid = author.orcid.clone();
        article.authors.push(entry);
    }
    article.abstract_text = work
        .abstract_inverted_index
        .as_ref()
        .and_then(invert_abstract);
    if let Some(work_type) = work.work_type.as_deref() {
        article.article_types.insert(work_type.to_ascii_lowercase());
        if work_type == "preprint" {
            article.is_preprint = true;
        }
    }
    article.language = work.language.as_deref().map(|code| match code {
        "en" => "english".to_string(),
        other => other.to_string(),
    });
    for keyword in &work.keywords {
        if let Some(name) = keyword.display_name.as_deref() {
            article.keywords.insert(name.to_ascii_lowercase());
        }
    }
    article.is_retracted = work.is_retracted.unwrap_or(false);
    if let Some(count) = work.cited_by_count {
        article.citation_metrics = Some(crate::entities::article::CitationMetrics {
            citation_count: count,
            ..Default::default()
        });
    }
    Some(article)
}

#[async_trait]
impl SourceAdapter for OpenAlexClient {
    fn source(&self) -> Source {
        Source::OpenAlex
    }

    async fn search(
        &self,
        query: &str,
        limit: usize,
        filters: &SearchFilters,
    ) -> Result<SearchHits, MedlitError> {
        let url = self.endpoint("works");
        let per_page = limit.clamp(1, 100).to_string();
        let mut filter_parts: Vec<String> = Vec::new();
        match (filters.min_year, filters.max_year) {
            (Some(min), Some(max)) => {
                filter_parts.push(format!("publication_year:{min}-{max}"));
            }
            (Some(min), None) => filter_parts.push(format!("from_publication_date:{min}-01-01")),
            (None, Some(max)) => filter_parts.push(format!("to_publication_date:{max}-12-31")),
            (None, None) => {}
        }
        let filter = filter_parts.join(",");

        let resp: WorksResponse = crate::sources::get_json(OPENALEX_API, || {
            let mut req = self.client.get(&url).query(&[
                ("search", query),
                ("per-page", per_page.as_str()),
                ("mailto", self.mailto.as_str()),
            ]);
            if !filter.is_empty() {
                req = req.query(&[("filter", filter.as_str())]);
            }
            req
        })
        .await?;

        let total = resp.meta.and_then(|m| m.count);
        let articles = resp
            .results
            .iter()
            .filter_map(from_work)
            .take(limit)
            .collect();
        Ok(SearchHits::new(articles, total))
    }
}
