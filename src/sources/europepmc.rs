//! Europe PMC: the main secondary index. Also serves the citation edges
//! for the citation-tree builder and fulltext XML for the retrieval chain.

use std::borrow::Cow;

use serde::Deserialize;

use crate::entities::SearchHits;
use crate::entities::article::{Author, Source, UnifiedArticle, clamp_year};
use crate::entities::query::SearchFilters;
use crate::error::MedlitError;
use crate::sources::adapter::{CitingCapability, ReferencesCapability, SourceAdapter};
use async_trait::async_trait;

const EUROPEPMC_BASE: &str = "https://www.ebi.ac.uk/europepmc/webservices/rest";
const EUROPEPMC_API: &str = "europepmc";
const EUROPEPMC_BASE_ENV: &str = "MEDLIT_EUROPEPMC_BASE";

#[derive(Clone)]
pub struct EuropePmcClient {
    client: reqwest_middleware::ClientWithMiddleware,
    base: Cow<'static, str>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EpmcSearchResponse {
    pub hit_count: Option<u64>,
    pub result_list: Option<EpmcResultList>,
}

#[derive(Debug, Deserialize)]
pub struct EpmcResultList {
    #[serde(default)]
    pub result: Vec<EpmcResult>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EpmcResult {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub source: String,
    pub pmid: Option<String>,
    pub pmcid: Option<String>,
    pub doi: Option<String>,
    pub title: Option<String>,
    pub author_string: Option<String>,
    pub journal_title: Option<String>,
    pub pub_year: Option<String>,
    pub abstract_text: Option<String>,
    pub pub_type: Option<String>,
    pub is_open_access: Option<String>,
    pub cited_by_count: Option<u64>,
    pub language: Option<String>,
    pub mesh_heading_list: Option<EpmcMeshHeadingList>,
    pub keyword_list: Option<EpmcKeywordList>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EpmcMeshHeadingList {
    #[serde(default)]
    pub mesh_heading: Vec<EpmcMeshHeading>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EpmcMeshHeading {
    pub descriptor_name: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EpmcKeywordList {
    #[serde(default)]
    pub keyword: Vec<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct EpmcCitationsResponse {
    citation_list: Option<EpmcCitationList>,
}

#[derive(Debug, Deserialize)]
struct EpmcCitationList {
    #[serde(default)]
    citation: Vec<EpmcResult>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct EpmcReferencesResponse {
    reference_list: Option<EpmcReferenceList>,
}

#[derive(Debug, Deserialize)]
struct EpmcReferenceList {
    #[serde(default)]
    reference: Vec<EpmcResult>,
}

impl EuropePmcClient {
    pub fn new() -> Result<Self, MedlitError> {
        Ok(Self {
            client: crate::sources::shared_client()?,
            base: crate::sources::env_base(EUROPEPMC_BASE, EUROPEPMC_BASE_ENV),
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

    /// Translate declarative filters into Europe PMC query syntax.
    pub fn build_query(query: &str, filters: &SearchFilters, include_preprints: bool) -> String {
        let mut q = query.trim().to_string();
        if let (Some(min), Some(max)) = (filters.min_year, filters.max_year) {
            q.push_str(&format!(" AND PUB_YEAR:[{min} TO {max}]"));
        } else if let Some(min) = filters.min_year {
            q.push_str(&format!(" AND PUB_YEAR:[{min} TO *]"));
        } else if let Some(max) = filters.max_year {
            q.push_str(&format!(" AND PUB_YEAR:[* TO {max}]"));
        }
        if let Some(lang) = filters.language.as_deref() {
            q.push_str(&format!(" AND LANG:\"{}\"", lang_code(lang)));
        }
        for article_type in &filters.article_types {
            q.push_str(&format!(" AND PUB_TYPE:\"{}\"", article_type.to_ascii_lowercase()));
        }
        if !include_preprints {
            q.push_str(" AND NOT SRC:PPR");
        }
        q
    }

    pub async fn search_raw(
        &self,
        query: &str,
        limit: usize,
    ) -> Result<EpmcSearchResponse, MedlitError> {
        let url = self.endpoint("search");
        let page_size = limit.clamp(1, 100).to_string();
        crate::sources::get_json(EUROPEPMC_API, || {
            self.client.get(&url).query(&[
                ("query", query),
                ("format", "json"),
                ("resultType", "core"),
                ("pageSize", page_size.as_str()),
            ])
        })
        .await
    }

    pub async fn full_text_xml(
        &self,
        source: &str,
        id: &str,
    ) -> Result<Option<String>, MedlitError> {
        let url = self.endpoint(&format!("{source}/{id}/fullTextXML"));
        let resp = crate::sources::guarded_send(EUROPEPMC_API, || self.client.get(&url)).await?;
        if resp.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let status = resp.status();
        let bytes = crate::sources::read_limited_body(resp, EUROPEPMC_API).await?;
        if !status.is_success() {
            return Err(MedlitError::Api {
                api: EUROPEPMC_API.to_string(),
                message: format!("HTTP {status}: {}", crate::sources::body_excerpt(&bytes)),
            });
        }
        let text = String::from_utf8_lossy(&bytes).into_owned();
        Ok((!text.trim().is_empty()).then_some(text))
    }
}

/// Preprint servers as they appear in journal titles.
pub fn is_preprint_journal(journal: &str) -> bool {
    let j = journal.to_ascii_lowercase();
    j.contains("biorxiv")
        || j.contains("medrxiv")
        || j.contains("arxiv")
        || j.contains("research square")
        || j.contains("ssrn")
}

fn lang_code(language: &str) -> &'static str {
    match language.to_ascii_lowercase().as_str() {
        "english" => "eng",
        "french" => "fre",
        "german" => "ger",
        "spanish" => "spa",
        "chinese" => "chi",
        "japanese" => "jpn",
        _ => "eng",
    }
}

pub fn from_epmc_result(hit: &EpmcResult) -> Option<UnifiedArticle> {
    let title = hit
        .title
        .as_deref()
        .map(|t| t.trim().trim_end_matches('.').to_string())
        .filter(|t| !t.is_empty())?;
    let id = hit
        .pmid
        .clone()
        .or_else(|| hit.doi.clone())
        .unwrap_or_else(|| format!("{}:{}", hit.source, hit.id))
        .trim()
        .to_string();
    if id.is_empty() {
        return None;
    }

    let mut article = UnifiedArticle::new(id, title, Source::EuropePmc);
    article.pmid = hit.pmid.clone();
    article.pmcid = hit.pmcid.clone();
    article.doi = hit.doi.clone();
    if !hit.id.is_empty() {
        article
            .alternate_ids
            .insert(Source::EuropePmc, format!("{}:{}", hit.source, hit.id));
    }
    article.journal = hit.journal_title.clone();
    article.year = hit
        .pub_year
        .as_deref()
        .and_then(|v| v.parse::<i32>().ok())
        .and_then(|y| clamp_year(y, crate::current_year()));
    article.abstract_text = hit
        .abstract_text
        .as_deref()
        .map(str::trim)
        .map(str::to_string)
        .filter(|v| !v.is_empty());
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
    if let Some(types) = hit.pub_type.as_deref() {
        for t in types.split(';').map(str::trim).filter(|v| !v.is_empty()) {
            let lowered = t.to_ascii_lowercase();
            if lowered == "retraction of publication" || lowered == "retracted publication" {
                article.is_retracted = true;
            }
            article.article_types.insert(lowered);
        }
    }
    if let Some(mesh) = hit.mesh_heading_list.as_ref() {
        for heading in &mesh.mesh_heading {
            if let Some(name) = heading.descriptor_name.as_deref() {
                article.mesh_terms.insert(name.to_string());
            }
        }
    }
    if let Some(keywords) = hit.keyword_list.as_ref() {
        for keyword in &keywords.keyword {
            article.keywords.insert(keyword.to_ascii_lowercase());
        }
    }
    article.language = hit.language.clone();
    if hit.source.eq_ignore_ascii_case("PPR")
        || article
            .journal
            .as_deref()
            .is_some_and(is_preprint_journal)
    {
        article.is_preprint = true;
    }
    if let Some(count) = hit.cited_by_count {
        article.citation_metrics = Some(crate::entities::article::CitationMetrics {
            citation_count: count,
            ..Default::default()
        });
    }
    Some(article)
}

#[async_trait]
impl SourceAdapter for EuropePmcClient {
    fn source(&self) -> Source {
        Source::EuropePmc
    }

    async fn search(
        &self,
        query: &str,
        limit: usize,
        filters: &SearchFilters,
    ) -> Result<SearchHits, MedlitError> {
        let q = Self::build_query(query, filters, true);
        let resp = self.search_raw(&q, limit).await?;
        let total = resp.hit_count;
        let articles = resp
            .result_list
            .map(|l| l.result)
            .unwrap_or_default()
            .iter()
            .filter_map(from_epmc_result)
            .take(limit)
            .collect();
        Ok(SearchHits::new(articles, total))
    }

    async fn fetch(&self, id: &str) -> Result<Option<UnifiedArticle>, MedlitError> {
        let id = id.trim();
        if id.is_empty() {
            return Ok(None);
        }
        let query = if id.starts_with("10.") && id.contains('/') {
            format!("DOI:\"{id}\"")
        } else if id.len() > 3 && id[..3].eq_ignore_ascii_case("PMC") {
            format!("PMCID:{id}")
        } else {
            format!("EXT_ID:{id} AND SRC:MED")
        };
        let resp = self.search_raw(&query, 1).await?;
        Ok(resp
            .result_list
            .map(|l| l.result)
            .unwrap_or_default()
            .first()
            .and_then(from_epmc_result))
    }

    fn citing(&self) -> Option<&dyn CitingCapability> {
        Some(self)
    }

    fn references(&self) -> Option<&dyn ReferencesCapability> {
        Some(self)
    }
}

#[async_trait]
impl CitingCapability for EuropePmcClient {
    async fn citing(&self, id: &str, limit: usize) -> Result<Vec<UnifiedArticle>, MedlitError> {
        let url = self.endpoint(&format!("MED/{id}/citations"));
        let page_size = limit.clamp(1, 100).to_string();
        let resp: EpmcCitationsResponse = crate::sources::get_json(EUROPEPMC_API, || {
            self.client
                .get(&url)
                .query(&[("format", "json"), ("pageSize", page_size.as_str())])
        })
        .await?;
        Ok(resp
            .citation_list
            .map(|l| l.citation)
            .unwrap_or_default()
            .iter()
            .filter_map(from_epmc_result)
            .take(limit)
            .collect())
    }
}

#[async_trait]
impl ReferencesCapability for EuropePmcClient {
    async fn references(
        &self,
        id: &str,
        limit: usize,
    ) -> Result<Vec<UnifiedArticle>, MedlitError> {
        let url = self.endpoint(&format!("MED/{id}/references"));
        let page_size = limit.clamp(1, 100).to_string();
        let resp: EpmcReferencesResponse = crate::sources::get_json(EUROPEPMC_API, || {
            self.client
                .get(&url)
                .query(&[("format", "json"), ("pageSize", page_size.as_str())])
        })
        .await?;
        Ok(resp
            .reference_list
            .map(|l| l.reference)
            .unwrap_or_default()
            .iter()
            .filter_map(from_epmc_result)
            .take(limit)
            .collect())
    }
}
