//! Built-in pipeline templates. A template expands minimal parameters into
//! a full step list so agents do not hand-write multi-step JSON.

use std::collections::BTreeMap;

use serde::Serialize;

use crate::entities::pipeline::{PipelineConfig, PipelineStep, StepAction};
use crate::error::MedlitError;

pub const TEMPLATE_NAMES: &[&str] = &["pico", "comprehensive", "exploration", "gene_drug"];

#[derive(Debug, Clone, Serialize)]
pub struct TemplateParam {
    pub name: &'static str,
    pub required: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default: Option<&'static str>,
}

#[derive(Debug, Clone, Serialize)]
pub struct TemplateDescription {
    pub name: &'static str,
    pub description: &'static str,
    pub params: Vec<TemplateParam>,
}

/// Canonical defaults are surfaced here rather than hard-coded at call
/// sites; defaults differ by template.
pub fn describe(name: &str) -> Result<TemplateDescription, MedlitError> {
    match name.trim().to_ascii_lowercase().as_str() {
        "pico" => Ok(TemplateDescription {
            name: "pico",
            description: "PICO clinical question: parallel element searches fused with RRF",
            params: vec![
                TemplateParam { name: "population", required: true, default: None },
                TemplateParam { name: "intervention", required: true, default: None },
                TemplateParam { name: "comparison", required: false, default: None },
                TemplateParam { name: "outcome", required: false, default: None },
                TemplateParam { name: "limit", required: false, default: Some("25") },
            ],
        }),
        "comprehensive" => Ok(TemplateDescription {
            name: "comprehensive",
            description: "Multi-source search with semantic expansion, merge, and metrics",
            params: vec![
                TemplateParam { name: "query", required: true, default: None },
                TemplateParam { name: "limit", required: false, default: Some("50") },
            ],
        }),
        "exploration" => Ok(TemplateDescription {
            name: "exploration",
            description: "Seed article neighborhood: related, citing, and referenced articles",
            params: vec![
                TemplateParam { name: "seed", required: true, default: None },
                TemplateParam { name: "limit", required: false, default: Some("15") },
            ],
        }),
        "gene_drug" => Ok(TemplateDescription {
            name: "gene_drug",
            description: "Gene/drug topic search with expansion and citation metrics",
            params: vec![
                TemplateParam { name: "gene", required: true, default: None },
                TemplateParam { name: "drug", required: true, default: None },
                TemplateParam { name: "limit", required: false, default: Some("30") },
            ],
        }),
        other => Err(MedlitError::InvalidArgument(format!(
            "Unknown template \"{other}\". Available: {}",
            TEMPLATE_NAMES.join(", ")
        ))),
    }
}

fn require<'a>(
    params: &'a BTreeMap<String, String>,
    template: &str,
    key: &str,
) -> Result<&'a str, MedlitError> {
    params
        .get(key)
        .map(String::as_str)
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .ok_or_else(|| {
            MedlitError::InvalidArgument(format!(
                "Template \"{template}\" requires param \"{key}\""
            ))
        })
}

fn limit_param(params: &BTreeMap<String, String>, default: u64) -> u64 {
    params
        .get("limit")
        .and_then(|v| v.trim().parse::<u64>().ok())
        .unwrap_or(default)
}

/// Expand a template reference into concrete steps. The caller's `output`
/// block is preserved.
pub fn instantiate(
    name: &str,
    params: &BTreeMap<String, String>,
) -> Result<Vec<PipelineStep>, MedlitError> {
    match name.trim().to_ascii_lowercase().as_str() {
        "pico" => {
            let limit = limit_param(params, 25);
            let mut steps: Vec<PipelineStep> = Vec::new();
            let mut search_ids: Vec<String> = Vec::new();
            let elements = [
                ("population", require(params, "pico", "population")?),
                ("intervention", require(params, "pico", "intervention")?),
                (
                    "comparison",
                    params.get("comparison").map(String::as_str).unwrap_or(""),
                ),
                (
                    "outcome",
                    params.get("outcome").map(String::as_str).unwrap_or(""),
                ),
            ];
            for (element, value) in elements {
                let value = value.trim();
                if value.is_empty() {
                    continue;
                }
                let id = format!("search_{element}");
                steps.push(
                    PipelineStep::new(&id, StepAction::Search)
                        .with_param("query", value)
                        .with_param("limit", limit),
                );
                search_ids.push(id);
            }
            let inputs: Vec<&str> = search_ids.iter().map(String::as_str).collect();
            steps.push(
                PipelineStep::new("merge_pico", StepAction::Merge)
                    .with_param("fusion", "rrf")
                    .with_inputs(&inputs),
            );
            Ok(steps)
        }
        "comprehensive" => {
            let query = require(params, "comprehensive", "query")?;
            let limit = limit_param(params, 50);
            Ok(vec![
                PipelineStep::new("search_all", StepAction::Search)
                    .with_param("query", query)
                    .with_param("limit", limit)
                    .with_param("sources", "pubmed,europepmc,semanticscholar,openalex"),
                PipelineStep::new("expand_query", StepAction::Expand)
                    .with_param("query", query),
                PipelineStep::new("merge_all", StepAction::Merge).with_inputs(&["search_all"]),
                PipelineStep::new("add_metrics", StepAction::Metrics).with_inputs(&["merge_all"]),
            ])
        }
        "exploration" => {
            let seed = require(params, "exploration", "seed")?;
            let limit = limit_param(params, 15);
            Ok(vec![
                PipelineStep::new("seed_details", StepAction::Details).with_param("ids", seed),
                PipelineStep::new("find_related", StepAction::Related)
                    .with_param("limit", limit)
                    .with_inputs(&["seed_details"]),
                PipelineStep::new("find_citing", StepAction::Citing)
                    .with_param("limit", limit)
                    .with_inputs(&["seed_details"]),
                PipelineStep::new("find_references", StepAction::References)
                    .with_param("limit", limit)
                    .with_inputs(&["seed_details"]),
                PipelineStep::new("merge_neighborhood", StepAction::Merge)
                    .with_param("fusion", "rrf")
                    .with_inputs(&["find_related", "find_citing", "find_references"]),
            ])
        }
        "gene_drug" => {
            let gene = require(params, "gene_drug", "gene")?;
            let drug = require(params, "gene_drug", "drug")?;
            let limit = limit_param(params, 30);
            let query = format!("{gene} {drug}");
            Ok(vec![
                PipelineStep::new("search_topic", StepAction::Search)
                    .with_param("query", query.as_str())
                    .with_param("limit", limit)
                    .with_param("sources", "pubmed,europepmc"),
                PipelineStep::new("expand_topic", StepAction::Expand)
                    .with_param("query", query.as_str()),
                PipelineStep::new("merge_results", StepAction::Merge)
                    .with_inputs(&["search_topic"]),
                PipelineStep::new("add_metrics", StepAction::Metrics)
                    .with_inputs(&["merge_results"]),
            ])
        }
        other => Err(MedlitError::InvalidArgument(format!(
            "Unknown template \"{other}\". Available: {}",
            TEMPLATE_NAMES.join(", ")
        ))),
    }
}

/// Resolve a config that references a template into plain steps.
pub fn expand_config(config: &PipelineConfig) -> Result<PipelineConfig, MedlitError> {
    let Some(template) = config.template.as_deref() else {
        return Ok(config.clone());
    };
    let steps = instantiate(template, &config.template_params)?;
    let mut expanded = config.clone();
    expanded.steps = steps;
    expanded.template = Some(template.trim().to_ascii_lowercase());
    Ok(expanded)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn pico_generates_parallel_searches_and_rrf_merge() {
        let steps = instantiate(
            "pico",
            &params(&[
                ("population", "adults with sepsis"),
                ("intervention", "early antibiotics"),
                ("comparison", "delayed antibiotics"),
                ("outcome", "30-day mortality"),
            ]),
        )
        .unwrap();
        assert_eq!(steps.len(), 5);
        let merge = steps.last().unwrap();
        assert_eq!(merge.action, "merge");
        assert_eq!(merge.param_str("fusion"), Some("rrf"));
        assert_eq!(merge.inputs.len(), 4);
    }

    #[test]
    fn pico_skips_empty_optional_elements() {
        let steps = instantiate(
            "pico",
            &params(&[("population", "adults"), ("intervention", "drug x")]),
        )
        .unwrap();
        // Two searches plus the merge.
        assert_eq!(steps.len(), 3);
    }

    #[test]
    fn pico_requires_population_and_intervention() {
        let err = instantiate("pico", &params(&[("population", "adults")])).unwrap_err();
        assert!(err.to_string().contains("intervention"));
    }

    #[test]
    fn exploration_fans_out_from_seed() {
        let steps = instantiate("exploration", &params(&[("seed", "37654670")])).unwrap();
        assert_eq!(steps[0].action, "details");
        let merge = steps.last().unwrap();
        assert_eq!(merge.inputs.len(), 3);
    }

    #[test]
    fn describe_surfaces_per_template_defaults() {
        let pico = describe("pico").unwrap();
        let comprehensive = describe("comprehensive").unwrap();
        let pico_limit = pico.params.iter().find(|p| p.name == "limit").unwrap();
        let comp_limit = comprehensive
            .params
            .iter()
            .find(|p| p.name == "limit")
            .unwrap();
        assert_ne!(pico_limit.default, comp_limit.default);
    }

    #[test]
    fn unknown_template_is_invalid_argument() {
        assert!(describe("nope").is_err());
        assert!(instantiate("nope", &BTreeMap::new()).is_err());
    }
}
