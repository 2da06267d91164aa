//! Unpaywall: open-access locator. DOI in, OA status and link list out.

use std::borrow::Cow;

use serde::Deserialize;

use crate::entities::article::{OaHostType, OaStatus, OaVersion, OpenAccessLink, Source};
use crate::error::MedlitError;

const UNPAYWALL_BASE: &str = "https://api.unpaywall.org/v2";
const UNPAYWALL_API: &str = "unpaywall";
const UNPAYWALL_BASE_ENV: &str = "MEDLIT_UNPAYWALL_BASE";

#[derive(Clone)]
pub struct UnpaywallClient {
    client: reqwest_middleware::ClientWithMiddleware,
    base: Cow<'static, str>,
    email: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct OaRecord {
    pub is_oa: Option<bool>,
    pub oa_status: Option<String>,
    pub best_oa_location: Option<OaLocation>,
    #[serde(default)]
    pub oa_locations: Vec<OaLocation>,
}

#[derive(Debug, Default, Deserialize)]
pub struct OaLocation {
    pub url: Option<String>,
    pub url_for_pdf: Option<String>,
    pub host_type: Option<String>,
    pub version: Option<String>,
    pub license: Option<String>,
}

#[derive(Debug, Clone)]
pub struct OaSummary {
    pub status: OaStatus,
    pub links: Vec<OpenAccessLink>,
}

impl UnpaywallClient {
    pub fn new() -> Result<Self, MedlitError> {
        Ok(Self {
            client: crate::sources::shared_client()?,
            base: crate::sources::env_base(UNPAYWALL_BASE, UNPAYWALL_BASE_ENV),
            email: crate::config::contact_email(),
        })
    }

    #[cfg(test)]
    pub fn new_for_test(base: String) -> Result<Self, MedlitError> {
        Ok(Self {
            client: crate::sources::shared_client()?,
            base: Cow::Owned(base),
            email: "test@example.com".into(),
        })
    }

    pub fn source(&self) -> Source {
        Source::Unpaywall
    }

    /// OA status and links for a DOI. Unknown DOIs are `None`, not errors.
    pub async fn oa_status(&self, doi: &str) -> Result<Option<OaSummary>, MedlitError> {
        let doi = doi.trim().trim_start_matches("https://doi.org/");
        if doi.is_empty() {
            return Ok(None);
        }
        let url = format!("{}/{doi}", self.base.as_ref().trim_end_matches('/'));
        let resp = crate::sources::guarded_send(UNPAYWALL_API, || {
            self.client.get(&url).query(&[("email", self.email.as_str())])
        })
        .await?;
        if matches!(
            resp.status(),
            reqwest::StatusCode::NOT_FOUND | reqwest::StatusCode::UNPROCESSABLE_ENTITY
        ) {
            return Ok(None);
        }
        let status = resp.status();
        let bytes = crate::sources::read_limited_body(resp, UNPAYWALL_API).await?;
        if !status.is_success() {
            return Err(MedlitError::Api {
                api: UNPAYWALL_API.to_string(),
                message: format!("HTTP {status}: {}", crate::sources::body_excerpt(&bytes)),
            });
        }
        let record: OaRecord =
            serde_json::from_slice(&bytes).map_err(|source| MedlitError::ApiJson {
                api: UNPAYWALL_API.to_string(),
                source,
            })?;
        Ok(Some(summarize(&record)))
    }
}

fn parse_status(status: Option<&str>, is_oa: bool) -> OaStatus {
    match status.map(str::to_ascii_lowercase).as_deref() {
        Some("gold") => OaStatus::Gold,
        Some("green") => OaStatus::Green,
        Some("hybrid") => OaStatus::Hybrid,
        Some("bronze") => OaStatus::Bronze,
        Some("closed") => OaStatus::Closed,
        _ if is_oa => OaStatus::Bronze,
        _ => OaStatus::Closed,
    }
}

fn parse_host_type(host: Option<&str>) -> OaHostType {
    match host.map(str::to_ascii_lowercase).as_deref() {
        Some("repository") => OaHostType::Repository,
        Some("publisher") => OaHostType::Publisher,
        Some("preprint") => OaHostType::Preprint,
        _ => OaHostType::Aggregator,
    }
}

fn parse_version(version: Option<&str>) -> OaVersion {
    match version.map(str::to_ascii_lowercase).as_deref() {
        Some("submittedversion") => OaVersion::Submitted,
        Some("acceptedversion") => OaVersion::Accepted,
        Some("publishedversion") => OaVersion::Published,
        _ => OaVersion::Unknown,
    }
}

fn to_link(location: &OaLocation, is_best: bool) -> Option<OpenAccessLink> {
    let (url, is_pdf) = match (location.url_for_pdf.as_deref(), location.url.as_deref()) {
        (Some(pdf), _) if !pdf.is_empty() => (pdf.to_string(), true),
        (_, Some(landing)) if !landing.is_empty() => (landing.to_string(), false),
        _ => return None,
    };
    Some(OpenAccessLink {
        url,
        host_type: parse_host_type(location.host_type.as_deref()),
        version: parse_version(location.version.as_deref()),
        license: location.license.clone(),
        is_pdf,
        is_best,
    })
}

pub fn summarize(record: &OaRecord) -> OaSummary {
    let is_oa = record.is_oa.unwrap_or(false);
    let status = parse_status(record.oa_status.as_deref(), is_oa);
    let best_url = record
        .best_oa_location
        .as_ref()
        .and_then(|l| l.url_for_pdf.as_deref().or(l.url.as_deref()))
        .map(str::to_string);
    let mut links: Vec<OpenAccessLink> = Vec::new();
    if let Some(best) = record.best_oa_location.as_ref()
        && let Some(link) = to_link(best, true)
    {
        links.push(link);
    }
    for location in &record.oa_locations {
        if let Some(link) = to_link(location, false) {
            let duplicate_of_best =
                best_url.as_deref() == Some(link.url.as_str()) && !links.is_empty();
            if !duplicate_of_best {
                links.push(link);
            }
        }
    }
    OaSummary { status, links }
}
