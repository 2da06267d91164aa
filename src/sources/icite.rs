//! NIH iCite: field-normalized citation metrics, batched at the API's
//! 200-PMID limit.

use std::borrow::Cow;
use std::collections::HashMap;

use serde::Deserialize;

use crate::entities::article::{CitationMetrics, Source};
use crate::error::MedlitError;
use crate::sources::adapter::MetricsCapability;
use async_trait::async_trait;

const ICITE_BASE: &str = "https://icite.od.nih.gov/api";
const ICITE_API: &str = "icite";
const ICITE_BASE_ENV: &str = "MEDLIT_ICITE_BASE";

pub const MAX_PMIDS_PER_REQUEST: usize = 200;

#[derive(Clone)]
pub struct ICiteClient {
    client: reqwest_middleware::ClientWithMiddleware,
    base: Cow<'static, str>,
}

#[derive(Debug, Deserialize)]
struct PubsResponse {
    #[serde(default)]
    data: Vec<ICitePub>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ICitePub {
    pub pmid: Option<serde_json::Value>,
    pub citation_count: Option<u64>,
    pub relative_citation_ratio: Option<f64>,
    pub nih_percentile: Option<f64>,
    pub citations_per_year: Option<f64>,
    pub apt: Option<f64>,
    pub is_clinical: Option<serde_json::Value>,
}

impl ICiteClient {
    pub fn new() -> Result<Self, MedlitError> {
        Ok(Self {
            client: crate::sources::shared_client()?,
            base: crate::sources::env_base(ICITE_BASE, ICITE_BASE_ENV),
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
        Source::Icite
    }
}

fn pmid_string(value: &serde_json::Value) -> Option<String> {
    match value {
        serde_json::Value::String(s) if !s.is_empty() => Some(s.clone()),
        serde_json::Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn bool_flag(value: &serde_json::Value) -> Option<bool> {
    match value {
        serde_json::Value::Bool(b) => Some(*b),
        serde_json::Value::String(s) => match s.to_ascii_lowercase().as_str() {
            "yes" | "true" | "1" => Some(true),
            "no" | "false" | "0" => Some(false),
            _ => None,
        },
        _ => None,
    }
}

pub fn from_pub(entry: &ICitePub) -> Option<(String, CitationMetrics)> {
    let pmid = entry.pmid.as_ref().and_then(pmid_string)?;
    let metrics = CitationMetrics {
        citation_count: entry.citation_count.unwrap_or(0),
        relative_citation_ratio: entry.relative_citation_ratio,
        percentile: entry.nih_percentile,
        citations_per_year: entry.citations_per_year,
        translation_potential: entry.apt,
        is_clinical: entry.is_clinical.as_ref().and_then(bool_flag),
    };
    Some((pmid, metrics))
}

#[async_trait]
impl MetricsCapability for ICiteClient {
    async fn metrics(
        &self,
        ids: &[String],
    ) -> Result<HashMap<String, CitationMetrics>, MedlitError> {
        let pmids: Vec<&str> = ids
            .iter()
            .map(String::as_str)
            .filter(|id| !id.is_empty() && id.chars().all(|c| c.is_ascii_digit()))
            .collect();
        if pmids.is_empty() {
            return Ok(HashMap::new());
        }

        let url = format!("{}/pubs", self.base.as_ref().trim_end_matches('/'));
        let mut out = HashMap::with_capacity(pmids.len());
        for chunk in pmids.chunks(MAX_PMIDS_PER_REQUEST) {
            let joined = chunk.join(",");
            let resp: PubsResponse = crate::sources::get_json(ICITE_API, || {
                self.client.get(&url).query(&[("pmids", joined.as_str())])
            })
            .await?;
            for entry in &resp.data {
                if let Some((pmid, metrics)) = from_pub(entry) {
                    out.insert(pmid, metrics);
                }
            }
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn pub_transform_handles_numeric_pmid_and_string_flags() {
        let entry = ICitePub {
            pmid: Some(serde_json::json!(22663011)),
            citation_count: Some(150),
            relative_citation_ratio: Some(4.2),
            nih_percentile: Some(95.0),
            citations_per_year: Some(12.5),
            apt: Some(0.75),
            is_clinical: Some(serde_json::json!("Yes")),
        };
        let (pmid, metrics) = from_pub(&entry).expect("pub should map");
        assert_eq!(pmid, "22663011");
        assert_eq!(metrics.citation_count, 150);
        assert_eq!(metrics.relative_citation_ratio, Some(4.2));
        assert_eq!(metrics.is_clinical, Some(true));
    }

    #[tokio::test]
    async fn metrics_skips_non_numeric_ids_and_batches() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/pubs"))
            .and(query_param("pmids", "111,222"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "data": [
                    {"pmid": 111, "citation_count": 5},
                    {"pmid": 222, "citation_count": 9, "relative_citation_ratio": 1.1}
                ]
            })))
            .mount(&server)
            .await;

        let client = ICiteClient::new_for_test(server.uri()).unwrap();
        let ids = vec![
            "111".to_string(),
            "10.1/doi-not-pmid".to_string(),
            "222".to_string(),
        ];
        let metrics = client.metrics(&ids).await.unwrap();
        assert_eq!(metrics.len(), 2);
        assert_eq!(metrics["222"].citation_count, 9);
    }

    #[tokio::test]
    async fn metrics_with_no_numeric_ids_makes_no_request() {
        let client = ICiteClient::new_for_test("http://unused.invalid".into()).unwrap();
        let metrics = client.metrics(&["10.1/abc".to_string()]).await.unwrap();
        assert!(metrics.is_empty());
    }
}
