//! ClinicalTrials.gov v2: trials registry provider. Trials surface as
//! records keyed by NCT ID; trial reference lists surface as PMID records
//! through the references capability.

use std::borrow::Cow;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::entities::SearchHits;
use crate::entities::article::{Source, UnifiedArticle, clamp_year};
use crate::entities::query::SearchFilters;
use crate::error::MedlitError;
use crate::sources::adapter::{ReferencesCapability, SourceAdapter};
use async_trait::async_trait;

const CTGOV_BASE: &str = "https://clinicaltrials.gov/api/v2";
const CTGOV_API: &str = "clinicaltrials";
const CTGOV_BASE_ENV: &str = "MEDLIT_CTGOV_BASE";

const CTGOV_SEARCH_FIELDS: &str = "NCTId,BriefTitle,OverallStatus,Phase,StudyType,Condition,InterventionName,BriefSummary,StartDate,CompletionDate";

const CTGOV_GET_FIELDS: &str = "NCTId,BriefTitle,OverallStatus,Phase,StudyType,Condition,InterventionName,BriefSummary,StartDate,CompletionDate,ReferencePMID,ReferenceType,ReferenceCitation";

#[derive(Clone)]
pub struct ClinicalTrialsClient {
    client: reqwest_middleware::ClientWithMiddleware,
    base: Cow<'static, str>,
}

impl ClinicalTrialsClient {
    pub fn new() -> Result<Self, MedlitError> {
        Ok(Self {
            client: crate::sources::shared_client()?,
            base: crate::sources::env_base(CTGOV_BASE, CTGOV_BASE_ENV),
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

    async fn get_json<T: DeserializeOwned, F>(&self, build: F) -> Result<T, MedlitError>
    where
        F: Fn() -> reqwest_middleware::RequestBuilder,
    {
        crate::sources::get_json(CTGOV_API, build).await
    }

    async fn search_studies(
        &self,
        query: &str,
        filters: &SearchFilters,
        limit: usize,
    ) -> Result<CtGovSearchResponse, MedlitError> {
        let url = self.endpoint("studies");
        let page_size = limit.clamp(1, 100).to_string();
        let advanced = build_advanced_filter(filters);

        self.get_json(|| {
            let mut req = self.client.get(&url).query(&[
                ("query.term", query),
                ("countTotal", "true"),
                ("pageSize", page_size.as_str()),
                ("fields", CTGOV_SEARCH_FIELDS),
            ]);
            if let Some(v) = advanced.as_deref() {
                req = req.query(&[("filter.advanced", v)]);
            }
            req
        })
        .await
    }

    async fn get_study(&self, nct_id: &str) -> Result<Option<CtGovStudy>, MedlitError> {
        let url = self.endpoint(&format!("studies/{nct_id}"));
        let resp = crate::sources::guarded_send(CTGOV_API, || {
            self.client.get(&url).query(&[("fields", CTGOV_GET_FIELDS)])
        })
        .await?;
        if resp.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let status = resp.status();
        let bytes = crate::sources::read_limited_body(resp, CTGOV_API).await?;
        if !status.is_success() {
            let excerpt = crate::sources::body_excerpt(&bytes);
            return Err(MedlitError::Api {
                api: CTGOV_API.to_string(),
                message: format!("HTTP {status}: {excerpt}"),
            });
        }
        serde_json::from_slice(&bytes)
            .map(Some)
            .map_err(|source| MedlitError::ApiJson {
                api: CTGOV_API.to_string(),
                source,
            })
    }
}

fn build_advanced_filter(filters: &SearchFilters) -> Option<String> {
    let mut parts: Vec<String> = Vec::new();
    if let (Some(min), Some(max)) = (filters.min_year, filters.max_year) {
        parts.push(format!(
            "AREA[StartDate]RANGE[{min}-01-01,{max}-12-31]"
        ));
    }
    if let Some(sex) = filters.sex.as_deref() {
        let value = match sex.to_ascii_lowercase().as_str() {
            "f" | "female" => Some("FEMALE"),
            "m" | "male" => Some("MALE"),
            _ => None,
        };
        if let Some(v) = value {
            parts.push(format!("AREA[Sex]{v}"));
        }
    }
    (!parts.is_empty()).then(|| parts.join(" AND "))
}

fn is_nct_id(id: &str) -> bool {
    let id = id.trim();
    id.len() == 11
        && id[..3].eq_ignore_ascii_case("NCT")
        && id[3..].chars().all(|c| c.is_ascii_digit())
}

pub fn from_study(study: &CtGovStudy) -> Option<UnifiedArticle> {
    let protocol = study.protocol_section.as_ref()?;
    let identification = protocol.identification_module.as_ref()?;
    let nct_id = identification.nct_id.as_deref()?.trim().to_string();
    let title = identification
        .brief_title
        .as_deref()
        .map(str::trim)
        .filter(|v| !v.is_empty())?;

    let mut article = UnifiedArticle::new(nct_id.clone(), title, Source::ClinicalTrials);
    article.alternate_ids.insert(Source::ClinicalTrials, nct_id);
    article.abstract_text = protocol
        .description_module
        .as_ref()
        .and_then(|m| m.brief_summary.clone());
    article.year = protocol
        .status_module
        .as_ref()
        .and_then(|m| m.start_date_struct.as_ref())
        .and_then(|d| d.date.as_deref())
        .and_then(|d| d.split('-').next())
        .and_then(|y| y.parse::<i32>().ok())
        .and_then(|y| clamp_year(y, crate::current_year()));
    article.article_types.insert("clinical trial".to_string());
    if let Some(design) = protocol.design_module.as_ref() {
        if let Some(study_type) = design.study_type.as_deref() {
            article
                .article_types
                .insert(study_type.to_ascii_lowercase());
        }
        for phase in design.phases.iter().flatten() {
            article
                .keywords
                .insert(phase.replace('_', " ").to_ascii_lowercase());
        }
    }
    if let Some(conditions) = protocol.conditions_module.as_ref() {
        for condition in &conditions.conditions {
            article.keywords.insert(condition.to_ascii_lowercase());
        }
    }
    if let Some(status) = protocol
        .status_module
        .as_ref()
        .and_then(|m| m.overall_status.as_deref())
    {
        article
            .keywords
            .insert(status.replace('_', " ").to_ascii_lowercase());
    }
    Some(article)
}

#[async_trait]
impl SourceAdapter for ClinicalTrialsClient {
    fn source(&self) -> Source {
        Source::ClinicalTrials
    }

    async fn search(
        &self,
        query: &str,
        limit: usize,
        filters: &SearchFilters,
    ) -> Result<SearchHits, MedlitError> {
        let resp = self.search_studies(query, filters, limit).await?;
        let total = resp.total_count.map(u64::from);
        let articles = resp
            .studies
            .iter()
            .filter_map(from_study)
            .take(limit)
            .collect();
        Ok(SearchHits::new(articles, total))
    }

    async fn fetch(&self, id: &str) -> Result<Option<UnifiedArticle>, MedlitError> {
        if !is_nct_id(id) {
            return Ok(None);
        }
        Ok(self
            .get_study(id.trim())
            .await?
            .as_ref()
            .and_then(from_study))
    }

    fn references(&self) -> Option<&dyn ReferencesCapability> {
        Some(self)
    }
}

#[async_trait]
impl ReferencesCapability for ClinicalTrialsClient {
    /// The publications a trial record cites, as PMID stubs the details
    /// action can hydrate.
    async fn references(
        &self,
        id: &str,
        limit: usize,
    ) -> Result<Vec<UnifiedArticle>, MedlitError> {
        if !is_nct_id(id) {
            return Ok(Vec::new());
        }
        let Some(study) = self.get_study(id.trim()).await? else {
            return Ok(Vec::new());
        };
        let references = study
            .protocol_section
            .as_ref()
            .and_then(|p| p.references_module.as_ref())
            .map(|m| m.references.as_slice())
            .unwrap_or_default();
        let mut out = Vec::new();
        for reference in references {
            let Some(pmid) = reference
                .pmid
                .as_deref()
                .map(str::trim)
                .filter(|v| !v.is_empty())
            else {
                continue;
            };
            let title = reference
                .citation
                .as_deref()
                .map(str::trim)
                .filter(|v| !v.is_empty())
                .unwrap_or(pmid);
            let mut article = UnifiedArticle::new(pmid, title, Source::ClinicalTrials);
            article.pmid = Some(pmid.to_string());
            out.push(article);
            if out.len() >= limit {
                break;
            }
        }
        Ok(out)
    }
}

#[derive(Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CtGovSearchResponse {
    #[serde(default)]
    pub studies: Vec<CtGovStudy>,
    pub next_page_token: Option<String>,
    pub total_count: Option<u32>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CtGovStudy {
    pub protocol_section: Option<CtGovProtocolSection>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CtGovProtocolSection {
    pub identification_module: Option<CtGovIdentificationModule>,
    pub status_module: Option<CtGovStatusModule>,
    pub description_module: Option<CtGovDescriptionModule>,
    pub conditions_module: Option<CtGovConditionsModule>,
    pub design_module: Option<CtGovDesignModule>,
    pub references_module: Option<CtGovReferencesModule>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CtGovIdentificationModule {
    pub nct_id: Option<String>,
    pub brief_title: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CtGovStatusModule {
    pub overall_status: Option<String>,
    pub start_date_struct: Option<CtGovDateStruct>,
    pub completion_date_struct: Option<CtGovDateStruct>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CtGovDateStruct {
    pub date: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CtGovDescriptionModule {
    pub brief_summary: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CtGovConditionsModule {
    #[serde(default)]
    pub conditions: Vec<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CtGovDesignModule {
    pub phases: Option<Vec<String>>,
    pub study_type: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CtGovReference {
    pub pmid: Option<String>,
    pub reference_type: Option<String>,
    pub citation: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CtGovReferencesModule {
    #[serde(default)]
    pub references: Vec<CtGovReference>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn nct_id_detection() {
        assert!(is_nct_id("NCT04234568"));
        assert!(is_nct_id("nct04234568"));
        assert!(!is_nct_id("NCT123"));
        assert!(!is_nct_id("12345678"));
    }

    #[test]
    fn study_transform_keys_by_nct_id() {
        let study = CtGovStudy {
            protocol_section: Some(CtGovProtocolSection {
                identification_module: Some(CtGovIdentificationModule {
                    nct_id: Some("NCT04234568".into()),
                    brief_title: Some("Remimazolam vs propofol sedation".into()),
                }),
                status_module: Some(CtGovStatusModule {
                    overall_status: Some("COMPLETED".into()),
                    start_date_struct: Some(CtGovDateStruct {
                        date: Some("2021-03-01".into()),
                    }),
                    completion_date_struct: None,
                }),
                description_module: Some(CtGovDescriptionModule {
                    brief_summary: Some("A randomized trial.".into()),
                }),
                conditions_module: Some(CtGovConditionsModule {
                    conditions: vec!["Sepsis".into()],
                }),
                design_module: Some(CtGovDesignModule {
                    phases: Some(vec!["PHASE3".into()]),
                    study_type: Some("INTERVENTIONAL".into()),
                }),
                references_module: None,
            }),
        };
        let article = from_study(&study).expect("study should map");
        assert_eq!(article.id, "NCT04234568");
        assert_eq!(article.year, Some(2021));
        assert_eq!(article.source, Source::ClinicalTrials);
        assert!(article.article_types.contains("clinical trial"));
        assert!(article.keywords.contains("phase3"));
        assert!(article.keywords.contains("sepsis"));
    }

    #[tokio::test]
    async fn search_builds_expected_params() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/studies"))
            .and(query_param("query.term", "remimazolam sedation"))
            .and(query_param("countTotal", "true"))
            .and(query_param("pageSize", "3"))
            .and(query_param("fields", CTGOV_SEARCH_FIELDS))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "studies": [],
                "nextPageToken": null,
                "totalCount": 0
            })))
            .mount(&server)
            .await;

        let client = ClinicalTrialsClient::new_for_test(server.uri()).unwrap();
        let hits = client
            .search("remimazolam sedation", 3, &SearchFilters::default())
            .await
            .unwrap();
        assert_eq!(hits.total, Some(0));
    }

    #[tokio::test]
    async fn references_extract_pmids_from_study() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/studies/NCT04234568"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "protocolSection": {
                    "identificationModule": {"nctId": "NCT04234568", "briefTitle": "T"},
                    "referencesModule": {"references": [
                        {"pmid": "33000001", "referenceType": "BACKGROUND", "citation": "Smith J et al."},
                        {"pmid": null, "citation": "No pmid"},
                        {"pmid": "33000002", "citation": "Doe A et al."}
                    ]}
                }
            })))
            .mount(&server)
            .await;

        let client = ClinicalTrialsClient::new_for_test(server.uri()).unwrap();
        let refs = ReferencesCapability::references(&client, "NCT04234568", 10)
            .await
            .unwrap();
        assert_eq!(refs.len(), 2);
        assert_eq!(refs[0].pmid.as_deref(), Some("33000001"));
    }

    #[tokio::test]
    async fn missing_study_is_none() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/studies/NCT00000000"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let client = ClinicalTrialsClient::new_for_test(server.uri()).unwrap();
        let study = client.fetch("NCT00000000").await.unwrap();
        assert!(study.is_none());
    }
}
