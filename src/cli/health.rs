use std::time::{Duration, Instant};

use futures::future::join_all;

use crate::error::MedlitError;

#[derive(Debug, Clone, serde::Serialize)]
pub struct HealthRow {
    pub api: String,
    pub status: String,
    pub latency: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub affects: Option<String>,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct HealthReport {
    pub healthy: usize,
    pub total: usize,
    pub rows: Vec<HealthRow>,
}

impl HealthReport {
    pub fn all_healthy(&self) -> bool {
        self.healthy == self.total
    }

    pub fn to_markdown(&self) -> String {
        let mut out = String::new();
        out.push_str("# Provider Health Check\n\n");
        out.push_str("| API | Status | Latency | Affects |\n");
        out.push_str("|-----|--------|---------|---------|\n");
        for row in &self.rows {
            let affects = row.affects.as_deref().unwrap_or("-");
            out.push_str(&format!(
                "| {} | {} | {} | {} |\n",
                row.api, row.status, row.latency, affects
            ));
        }
        out.push_str(&format!(
            "\nStatus: {}/{} providers healthy\n",
            self.healthy, self.total
        ));
        out
    }
}

fn affects_for_api(api: &str) -> Option<&'static str> {
    match api {
        "PubMed" => Some("primary search, details, citing/references"),
        "Europe PMC" => Some("secondary search coverage and fulltext"),
        "Crossref" => Some("DOI-based coverage for comparison queries"),
        "OpenAlex" => Some("secondary coverage on complex queries"),
        "Semantic Scholar" => Some("related-article recommendations"),
        "iCite" => Some("citation metrics and landmark scoring"),
        "Unpaywall" => Some("open-access links"),
        "PubTator3" => Some("entity resolution and query expansion"),
        "ClinicalTrials" => Some("trial registry coverage"),
        "bioRxiv" => Some("preprint coverage"),
        _ => None,
    }
}

async fn check_one(client: reqwest::Client, api: &'static str, url: String) -> HealthRow {
    let start = Instant::now();
    let resp = client
        .get(&url)
        .header(reqwest::header::ACCEPT, "application/json")
        .send()
        .await;

    match resp {
        Ok(resp) => {
            let status = resp.status();
            let elapsed = start.elapsed().as_millis();
            let label = if status.is_success() {
                "ok".to_string()
            } else {
                format!("HTTP {status}")
            };
            HealthRow {
                api: api.to_string(),
                status: label,
                latency: format!("{elapsed}ms"),
                affects: if status.is_success() {
                    None
                } else {
                    affects_for_api(api).map(str::to_string)
                },
            }
        }
        Err(err) => HealthRow {
            api: api.to_string(),
            status: if err.is_timeout() {
                "timeout".to_string()
            } else {
                "unreachable".to_string()
            },
            latency: format!("{}ms", start.elapsed().as_millis()),
            affects: affects_for_api(api).map(str::to_string),
        },
    }
}

pub async fn run() -> Result<HealthReport, MedlitError> {
    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(8))
        .user_agent(concat!("medlit/", env!("CARGO_PKG_VERSION")))
        .build()?;

    let checks: Vec<(&'static str, String)> = vec![
        (
            "PubMed",
            "https://eutils.ncbi.nlm.nih.gov/entrez/eutils/einfo.fcgi?retmode=json".into(),
        ),
        (
            "Europe PMC",
            "https://www.ebi.ac.uk/europepmc/webservices/rest/search?query=test&format=json&pageSize=1"
                .into(),
        ),
        ("Crossref", "https://api.crossref.org/works?rows=1".into()),
        ("OpenAlex", "https://api.openalex.org/works?per-page=1".into()),
        (
            "Semantic Scholar",
            "https://api.semanticscholar.org/graph/v1/paper/search?query=test&limit=1".into(),
        ),
        ("iCite", "https://icite.od.nih.gov/api/pubs?pmids=23456789".into()),
        (
            "Unpaywall",
            format!(
                "https://api.unpaywall.org/v2/10.1038/nature12373?email={}",
                crate::config::contact_email()
            ),
        ),
        (
            "PubTator3",
            "https://www.ncbi.nlm.nih.gov/research/pubtator3-api/entity/autocomplete/?query=braf&limit=1"
                .into(),
        ),
        (
            "ClinicalTrials",
            "https://clinicaltrials.gov/api/v2/studies?pageSize=1".into(),
        ),
        (
            "bioRxiv",
            "https://api.biorxiv.org/details/biorxiv/10.1101/2020.03.24.004655".into(),
        ),
    ];

    let rows = join_all(
        checks
            .into_iter()
            .map(|(api, url)| check_one(client.clone(), api, url)),
    )
    .await;
    let healthy = rows.iter().filter(|row| row.status == "ok").count();
    Ok(HealthReport {
        healthy,
        total: rows.len(),
        rows,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn markdown_report_lists_every_row() {
        let report = HealthReport {
            healthy: 1,
            total: 2,
            rows: vec![
                HealthRow {
                    api: "PubMed".into(),
                    status: "ok".into(),
                    latency: "120ms".into(),
                    affects: None,
                },
                HealthRow {
                    api: "iCite".into(),
                    status: "timeout".into(),
                    latency: "8000ms".into(),
                    affects: Some("citation metrics".into()),
                },
            ],
        };
        let markdown = report.to_markdown();
        assert!(markdown.contains("| PubMed | ok | 120ms | - |"));
        assert!(markdown.contains("| iCite | timeout | 8000ms | citation metrics |"));
        assert!(markdown.contains("1/2 providers healthy"));
        assert!(!report.all_healthy());
    }
}
