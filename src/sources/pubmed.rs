//! Primary bibliographic index: NCBI E-utilities (esearch, esummary,
//! efetch, elink). Everything else in the system is secondary to this
//! provider.

use std::borrow::Cow;
use std::collections::HashMap;

use regex::Regex;
use serde::Deserialize;

use crate::entities::SearchHits;
use crate::entities::article::{Author, Source, UnifiedArticle, clamp_year};
use crate::entities::query::SearchFilters;
use crate::error::MedlitError;
use crate::sources::adapter::{
    CitingCapability, ReferencesCapability, RelatedCapability, SourceAdapter,
};
use async_trait::async_trait;

const EUTILS_BASE: &str = "https://eutils.ncbi.nlm.nih.gov/entrez/eutils";
const PUBMED_API: &str = "pubmed";
const EUTILS_BASE_ENV: &str = "MEDLIT_PUBMED_BASE";

#[derive(Clone)]
pub struct PubmedClient {
    client: reqwest_middleware::ClientWithMiddleware,
    base: Cow<'static, str>,
    api_key: Option<String>,
}

#[derive(Debug, Deserialize)]
struct EsearchResponse {
    esearchresult: EsearchResult,
}

#[derive(Debug, Default, Deserialize)]
struct EsearchResult {
    #[serde(default)]
    count: Option<String>,
    #[serde(default)]
    idlist: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct ElinkResponse {
    #[serde(default)]
    linksets: Vec<Linkset>,
}

#[derive(Debug, Deserialize)]
struct Linkset {
    #[serde(default)]
    linksetdbs: Vec<LinksetDb>,
}

#[derive(Debug, Deserialize)]
struct LinksetDb {
    #[serde(default)]
    linkname: String,
    #[serde(default)]
    links: Vec<serde_json::Value>,
}

impl PubmedClient {
    pub fn new() -> Result<Self, MedlitError> {
        Ok(Self {
            client: crate::sources::shared_client()?,
            base: crate::sources::env_base(EUTILS_BASE, EUTILS_BASE_ENV),
            api_key: crate::config::ncbi_api_key(),
        })
    }

    #[cfg(test)]
    pub fn new_for_test(base: String) -> Result<Self, MedlitError> {
        Ok(Self {
            client: crate::sources::shared_client()?,
            base: Cow::Owned(base),
            api_key: None,
        })
    }

    fn endpoint(&self, path: &str) -> String {
        format!(
            "{}/{}",
            self.base.as_ref().trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    }

    fn with_key(&self, req: reqwest_middleware::RequestBuilder) -> reqwest_middleware::RequestBuilder {
        match self.api_key.as_deref() {
            Some(key) => req.query(&[("api_key", key)]),
            None => req,
        }
    }

    /// Translate declarative filters into PubMed term syntax appended to
    /// the user query.
    pub fn build_term(query: &str, filters: &SearchFilters) -> String {
        let mut term = query.trim().to_string();
        if let (Some(min), Some(max)) = (filters.min_year, filters.max_year) {
            term.push_str(&format!(" AND (\"{min}\"[dp] : \"{max}\"[dp])"));
        } else if let Some(min) = filters.min_year {
            term.push_str(&format!(" AND (\"{min}\"[dp] : \"3000\"[dp])"));
        } else if let Some(max) = filters.max_year {
            term.push_str(&format!(" AND (\"1800\"[dp] : \"{max}\"[dp])"));
        }
        if let Some(age) = filters.age_group.as_deref() {
            if let Some(mesh) = age_group_mesh(age) {
                term.push_str(&format!(" AND \"{mesh}\"[mh]"));
            }
        }
        if let Some(sex) = filters.sex.as_deref() {
            let normalized = match sex.to_ascii_lowercase().as_str() {
                "f" | "female" => Some("female"),
                "m" | "male" => Some("male"),
                _ => None,
            };
            if let Some(v) = normalized {
                term.push_str(&format!(" AND {v}[mh]"));
            }
        }
        if let Some(species) = filters.species.as_deref() {
            term.push_str(&format!(" AND {}[mh]", species.to_ascii_lowercase()));
        }
        if let Some(lang) = filters.language.as_deref() {
            term.push_str(&format!(" AND {}[la]", lang.to_ascii_lowercase()));
        }
        if let Some(clinical) = filters.clinical_query.as_deref() {
            if let Some(filter) = clinical_query_filter(clinical) {
                term.push_str(&format!(" AND {filter}"));
            }
        }
        for article_type in &filters.article_types {
            term.push_str(&format!(" AND \"{}\"[pt]", article_type.to_ascii_lowercase()));
        }
        term
    }

    async fn esearch(&self, term: &str, limit: usize) -> Result<(Vec<String>, Option<u64>), MedlitError> {
        let url = self.endpoint("esearch.fcgi");
        let retmax = limit.clamp(1, 200).to_string();
        let resp: EsearchResponse = crate::sources::get_json(PUBMED_API, || {
            self.with_key(self.client.get(&url).query(&[
                ("db", "pubmed"),
                ("term", term),
                ("retmode", "json"),
                ("retmax", retmax.as_str()),
                ("sort", "relevance"),
            ]))
        })
        .await?;
        let total = resp
            .esearchresult
            .count
            .as_deref()
            .and_then(|v| v.parse::<u64>().ok());
        Ok((resp.esearchresult.idlist, total))
    }

    /// esummary for a batch of PMIDs, preserving input order.
    pub async fn summaries(&self, pmids: &[String]) -> Result<Vec<UnifiedArticle>, MedlitError> {
        if pmids.is_empty() {
            return Ok(Vec::new());
        }
        let url = self.endpoint("esummary.fcgi");
        let ids = pmids.join(",");
        let value: serde_json::Value = crate::sources::get_json(PUBMED_API, || {
            self.with_key(self.client.get(&url).query(&[
                ("db", "pubmed"),
                ("id", ids.as_str()),
                ("retmode", "json"),
            ]))
        })
        .await?;

        let result = value.get("result").cloned().unwrap_or_default();
        let mut out = Vec::with_capacity(pmids.len());
        for pmid in pmids {
            if let Some(docsum) = result.get(pmid.as_str())
                && let Some(article) = from_docsum(pmid, docsum)
            {
                out.push(article);
            }
        }
        Ok(out)
    }

    /// efetch abstracts and MeSH headings for a batch, merged into the
    /// given records in place.
    pub async fn enrich_details(&self, articles: &mut [UnifiedArticle]) -> Result<(), MedlitError> {
        let pmids: Vec<&str> = articles
            .iter()
            .filter_map(|a| a.pmid.as_deref())
            .collect();
        if pmids.is_empty() {
            return Ok(());
        }
        let url = self.endpoint("efetch.fcgi");
        let ids = pmids.join(",");
        let resp = crate::sources::guarded_send(PUBMED_API, || {
            self.with_key(self.client.get(&url).query(&[
                ("db", "pubmed"),
                ("id", ids.as_str()),
                ("retmode", "xml"),
            ]))
        })
        .await?;
        let status = resp.status();
        let bytes = crate::sources::read_limited_body(resp, PUBMED_API).await?;
        if !status.is_success() {
            return Err(MedlitError::Api {
                api: PUBMED_API.to_string(),
                message: format!("HTTP {status}: {}", crate::sources::body_excerpt(&bytes)),
            });
        }
        let xml = String::from_utf8_lossy(&bytes);
        let details = parse_efetch_xml(&xml);
        for article in articles.iter_mut() {
            if let Some(pmid) = article.pmid.as_deref()
                && let Some(detail) = details.get(pmid)
            {
                if article.abstract_text.is_none() && !detail.abstract_text.is_empty() {
                    article.abstract_text = Some(detail.abstract_text.clone());
                }
                article
                    .mesh_terms
                    .extend(detail.mesh_terms.iter().cloned());
            }
        }
        Ok(())
    }

    async fn elink(&self, pmid: &str, linkname: &str, limit: usize) -> Result<Vec<UnifiedArticle>, MedlitError> {
        let url = self.endpoint("elink.fcgi");
        let resp: ElinkResponse = crate::sources::get_json(PUBMED_API, || {
            self.with_key(self.client.get(&url).query(&[
                ("dbfrom", "pubmed"),
                ("db", "pubmed"),
                ("id", pmid),
                ("linkname", linkname),
                ("retmode", "json"),
            ]))
        })
        .await?;
        let mut linked: Vec<String> = Vec::new();
        for set in resp.linksets {
            for db in set.linksetdbs {
                if db.linkname == linkname {
                    for link in db.links {
                        let id = match link {
                            serde_json::Value::String(s) => s,
                            serde_json::Value::Number(n) => n.to_string(),
                            _ => continue,
                        };
                        linked.push(id);
                        if linked.len() >= limit {
                            break;
                        }
                    }
                }
            }
        }
        self.summaries(&linked).await
    }
}

fn age_group_mesh(age: &str) -> Option<&'static str> {
    match age.trim().to_ascii_lowercase().as_str() {
        "infant" | "newborn" => Some("Infant"),
        "child" => Some("Child"),
        "adolescent" | "teen" => Some("Adolescent"),
        "adult" => Some("Adult"),
        "middle_aged" | "middle-aged" => Some("Middle Aged"),
        "aged" | "elderly" => Some("Aged"),
        _ => None,
    }
}

fn clinical_query_filter(clinical: &str) -> Option<&'static str> {
    match clinical.trim().to_ascii_lowercase().as_str() {
        "therapy" => Some("Therapy/Broad[filter]"),
        "therapy_narrow" => Some("Therapy/Narrow[filter]"),
        "diagnosis" => Some("Diagnosis/Broad[filter]"),
        "diagnosis_narrow" => Some("Diagnosis/Narrow[filter]"),
        "etiology" => Some("Etiology/Broad[filter]"),
        "prognosis" => Some("Prognosis/Broad[filter]"),
        "prediction" => Some("Prediction/Broad[filter]"),
        _ => None,
    }
}

fn docsum_year(docsum: &serde_json::Value) -> Option<i32> {
    let pubdate = docsum.get("pubdate").and_then(|v| v.as_str())?;
    let year: i32 = pubdate.split_whitespace().next()?.parse().ok()?;
    clamp_year(year, crate::current_year())
}

fn from_docsum(pmid: &str, docsum: &serde_json::Value) -> Option<UnifiedArticle> {
    let title = docsum
        .get("title")
        .and_then(|v| v.as_str())
        .map(|t| t.trim_end_matches('.').to_string())
        .filter(|t| !t.is_empty())?;

    let mut article = UnifiedArticle::new(pmid, title, Source::Pubmed);
    article.pmid = Some(pmid.to_string());
    article.year = docsum_year(docsum);
    article.journal = docsum
        .get("fulljournalname")
        .or_else(|| docsum.get("source"))
        .and_then(|v| v.as_str())
        .map(str::to_string)
        .filter(|v| !v.is_empty());

    if let Some(authors) = docsum.get("authors").and_then(|v| v.as_array()) {
        for (i, author) in authors.iter().enumerate() {
            if let Some(name) = author.get("name").and_then(|v| v.as_str()) {
                article.authors.push(Author::new(i as u32 + 1, name));
            }
        }
    }
    if let Some(ids) = docsum.get("articleids").and_then(|v| v.as_array()) {
        for entry in ids {
            let idtype = entry.get("idtype").and_then(|v| v.as_str()).unwrap_or("");
            let value = entry.get("value").and_then(|v| v.as_str()).unwrap_or("");
            if value.is_empty() {
                continue;
            }
            match idtype {
                "doi" => article.doi = Some(value.to_string()),
                "pmc" | "pmcid" => article.pmcid = Some(value.to_string()),
                _ => {}
            }
        }
    }
    if let Some(types) = docsum.get("pubtype").and_then(|v| v.as_array()) {
        for t in types {
            if let Some(t) = t.as_str() {
                article.article_types.insert(t.to_ascii_lowercase());
                if t.eq_ignore_ascii_case("retracted publication") {
                    article.is_retracted = true;
                }
            }
        }
    }
    if let Some(langs) = docsum.get("lang").and_then(|v| v.as_array())
        && let Some(lang) = langs.first().and_then(|v| v.as_str())
    {
        article.language = Some(language_name(lang));
    }
    Some(article)
}

fn language_name(code: &str) -> String {
    match code.to_ascii_lowercase().as_str() {
        "eng" => "english".to_string(),
        "fre" => "french".to_string(),
        "ger" => "german".to_string(),
        "spa" => "spanish".to_string(),
        "chi" => "chinese".to_string(),
        "jpn" => "japanese".to_string(),
        other => other.to_string(),
    }
}

#[derive(Debug, Default)]
struct EfetchDetail {
    abstract_text: String,
    mesh_terms: Vec<String>,
}

/// Minimal extraction from efetch XML: abstract paragraphs and MeSH
/// descriptor names per article. Deliberately tag-level, not a full parse.
fn parse_efetch_xml(xml: &str) -> HashMap<String, EfetchDetail> {
    let article_re = Regex::new(r"(?s)<PubmedArticle>.*?</PubmedArticle>").expect("static regex");
    let pmid_re = Regex::new(r"<PMID[^>]*>(\d+)</PMID>").expect("static regex");
    let abstract_re =
        Regex::new(r"(?s)<AbstractText[^>]*>(.*?)</AbstractText>").expect("static regex");
    let mesh_re =
        Regex::new(r"<DescriptorName[^>]*>([^<]+)</DescriptorName>").expect("static regex");
    let tag_re = Regex::new(r"<[^>]+>").expect("static regex");

    let mut out = HashMap::new();
    for block in article_re.find_iter(xml) {
        let block = block.as_str();
        let Some(pmid) = pmid_re
            .captures(block)
            .and_then(|c| c.get(1))
            .map(|m| m.as_str().to_string())
        else {
            continue;
        };
        let mut detail = EfetchDetail::default();
        let mut paragraphs = Vec::new();
        for cap in abstract_re.captures_iter(block) {
            let text = tag_re.replace_all(&cap[1], " ");
            let text = unescape_xml(text.trim());
            if !text.is_empty() {
                paragraphs.push(text);
            }
        }
        detail.abstract_text = paragraphs.join(" ");
        for cap in mesh_re.captures_iter(block) {
            detail.mesh_terms.push(unescape_xml(cap[1].trim()));
        }
        out.insert(pmid, detail);
    }
    out
}

fn unescape_xml(text: &str) -> String {
    text.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&apos;", "'")
        .replace("&amp;", "&")
}

#[async_trait]
impl SourceAdapter for PubmedClient {
    fn source(&self) -> Source {
        Source::Pubmed
    }

    async fn search(
        &self,
        query: &str,
        limit: usize,
        filters: &SearchFilters,
    ) -> Result<SearchHits, MedlitError> {
        let term = Self::build_term(query, filters);
        let (pmids, total) = self.esearch(&term, limit).await?;
        let articles = self.summaries(&pmids).await?;
        Ok(SearchHits::new(articles, total))
    }

    async fn fetch(&self, id: &str) -> Result<Option<UnifiedArticle>, MedlitError> {
        let pmid = id.trim();
        if pmid.is_empty() || !pmid.chars().all(|c| c.is_ascii_digit()) {
            return Ok(None);
        }
        let mut articles = self.summaries(&[pmid.to_string()]).await?;
        if articles.is_empty() {
            return Ok(None);
        }
        self.enrich_details(&mut articles).await?;
        Ok(articles.into_iter().next())
    }

    fn related(&self) -> Option<&dyn RelatedCapability> {
        Some(self)
    }

    fn citing(&self) -> Option<&dyn CitingCapability> {
        Some(self)
    }

    fn references(&self) -> Option<&dyn ReferencesCapability> {
        Some(self)
    }
}

#[async_trait]
impl RelatedCapability for PubmedClient {
    async fn related(&self, id: &str, limit: usize) -> Result<Vec<UnifiedArticle>, MedlitError> {
        self.elink(id, "pubmed_pubmed", limit).await
    }
}

#[async_trait]
impl CitingCapability for PubmedClient {
    async fn citing(&self, id: &str, limit: usize) -> Result<Vec<UnifiedArticle>, MedlitError> {
        self.elink(id, "pubmed_pubmed_citedin", limit).await
    }
}

#[async_trait]
impl ReferencesCapability for PubmedClient {
    async fn references(
        &self,
        id: &str,
        limit: usize,
    ) -> Result<Vec<UnifiedArticle>, MedlitError> {
        self.elink(id, "pubmed_pubmed_refs", limit).await
    }
}
