//! Fulltext retrieval chain: Unpaywall best PDF, then Europe PMC fulltext
//! XML (PMC first, then MED). Extracted text is written atomically under
//! the data directory; every attempted rung is reported back.

use std::path::PathBuf;

use regex::Regex;
use serde::Serialize;
use tracing::debug;

use crate::entities::article::UnifiedArticle;
use crate::error::MedlitError;
use crate::sources::europepmc::EuropePmcClient;
use crate::sources::unpaywall::UnpaywallClient;

#[derive(Debug, Clone, Serialize)]
pub struct FulltextAttempt {
    pub step: String,
    pub outcome: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct FulltextResult {
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pdf_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub landing_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text_path: Option<PathBuf>,
    /// Every rung of the chain that was tried, in order.
    pub chain: Vec<FulltextAttempt>,
}

pub struct FulltextFetcher {
    unpaywall: UnpaywallClient,
    europepmc: EuropePmcClient,
}

impl FulltextFetcher {
    pub fn new() -> Result<Self, MedlitError> {
        Ok(Self {
            unpaywall: UnpaywallClient::new()?,
            europepmc: EuropePmcClient::new()?,
        })
    }

    #[cfg(test)]
    pub fn new_for_test(unpaywall: UnpaywallClient, europepmc: EuropePmcClient) -> Self {
        Self {
            unpaywall,
            europepmc,
        }
    }

    /// Walk the chain for an already-resolved article record.
    pub async fn fetch(&self, article: &UnifiedArticle) -> Result<FulltextResult, MedlitError> {
        let mut result = FulltextResult {
            id: article.id.clone(),
            pdf_url: None,
            landing_url: None,
            text_path: None,
            chain: Vec::new(),
        };

        if let Some(doi) = article.doi.as_deref() {
            match self.unpaywall.oa_status(doi).await {
                Ok(Some(summary)) => {
                    let best = summary.links.iter().find(|l| l.is_best);
                    match best {
                        Some(link) if link.is_pdf => {
                            result.pdf_url = Some(link.url.clone());
                            result.chain.push(attempt("unpaywall", "pdf link found"));
                        }
                        Some(link) => {
                            result.landing_url = Some(link.url.clone());
                            result.chain.push(attempt("unpaywall", "landing page only"));
                        }
                        None => result.chain.push(attempt("unpaywall", "closed access")),
                    }
                }
                Ok(None) => result.chain.push(attempt("unpaywall", "doi not indexed")),
                Err(err) => {
                    debug!(?err, doi, "unpaywall lookup failed");
                    result.chain.push(attempt("unpaywall", "error"));
                }
            }
        } else {
            result.chain.push(attempt("unpaywall", "skipped, no doi"));
        }

        let mut xml: Option<String> = None;
        if let Some(pmcid) = article.pmcid.as_deref() {
            match self.europepmc.full_text_xml("PMC", pmcid).await {
                Ok(Some(body)) => {
                    xml = Some(body);
                    result.chain.push(attempt("europepmc_pmc", "fulltext xml"));
                }
                Ok(None) => result.chain.push(attempt("europepmc_pmc", "not available")),
                Err(err) => {
                    debug!(?err, pmcid, "europepmc pmc fulltext failed");
                    result.chain.push(attempt("europepmc_pmc", "error"));
                }
            }
        }
        if xml.is_none()
            && let Some(pmid) = article.pmid.as_deref()
        {
            match self.europepmc.full_text_xml("MED", pmid).await {
                Ok(Some(body)) => {
                    xml = Some(body);
                    result.chain.push(attempt("europepmc_med", "fulltext xml"));
                }
                Ok(None) => result.chain.push(attempt("europepmc_med", "not available")),
                Err(err) => {
                    debug!(?err, pmid, "europepmc med fulltext failed");
                    result.chain.push(attempt("europepmc_med", "error"));
                }
            }
        }

        if let Some(xml) = xml {
            let text = extract_text_from_xml(&xml);
            if !text.is_empty() {
                let path = save_atomic(&article.id, &text).await?;
                result.text_path = Some(path);
            }
        }
        Ok(result)
    }
}

fn attempt(step: &str, outcome: &str) -> FulltextAttempt {
    FulltextAttempt {
        step: step.to_string(),
        outcome: outcome.to_string(),
    }
}

/// Readable text from JATS fulltext XML: drop front-matter metadata tags,
/// strip markup, collapse whitespace.
pub fn extract_text_from_xml(xml: &str) -> String {
    let drop_re = Regex::new(
        r"(?s)<(ref-list|table-wrap|fig|journal-meta|xref|object-id)[^>]*>.*?</(ref-list|table-wrap|fig|journal-meta|xref|object-id)>",
    )
    .expect("static regex");
    let tag_re = Regex::new(r"<[^>]+>").expect("static regex");
    let cleaned = drop_re.replace_all(xml, " ");
    let text = tag_re.replace_all(&cleaned, " ");
    let text = text
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&apos;", "'")
        .replace("&amp;", "&");
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Write extracted text under the data dir, named by a digest of the ID so
/// repeated fetches overwrite the same file. Write-then-rename keeps
/// readers from observing partial content.
pub async fn save_atomic(key: &str, text: &str) -> Result<PathBuf, MedlitError> {
    let dir = crate::config::data_dir()?.join("fulltext");
    tokio::fs::create_dir_all(&dir).await?;
    let digest = md5::compute(key.trim().to_ascii_lowercase().as_bytes());
    let path = dir.join(format!("{digest:x}.txt"));
    let tmp = dir.join(format!("{digest:x}.txt.tmp"));
    tokio::fs::write(&tmp, text).await?;
    tokio::fs::rename(&tmp, &path).await?;
    Ok(path)
}
