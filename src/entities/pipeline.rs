//! Pipeline domain entities. A pipeline is a DAG of steps; each step
//! performs one action and passes its articles downstream.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::entities::article::UnifiedArticle;
use crate::entities::query::RankingProfile;
use crate::error::MedlitError;

pub const MAX_PIPELINE_STEPS: usize = 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepAction {
    Search,
    Pico,
    Expand,
    Details,
    Related,
    Citing,
    References,
    Metrics,
    Merge,
    Filter,
}

impl StepAction {
    pub const ALL: [StepAction; 10] = [
        Self::Search,
        Self::Pico,
        Self::Expand,
        Self::Details,
        Self::Related,
        Self::Citing,
        Self::References,
        Self::Metrics,
        Self::Merge,
        Self::Filter,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Search => "search",
            Self::Pico => "pico",
            Self::Expand => "expand",
            Self::Details => "details",
            Self::Related => "related",
            Self::Citing => "citing",
            Self::References => "references",
            Self::Metrics => "metrics",
            Self::Merge => "merge",
            Self::Filter => "filter",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|a| a.as_str() == value.trim().to_ascii_lowercase())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OnError {
    #[default]
    Skip,
    Abort,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineStep {
    #[serde(default)]
    pub id: String,
    pub action: String,
    #[serde(default)]
    pub params: BTreeMap<String, serde_json::Value>,
    #[serde(default)]
    pub inputs: Vec<String>,
    #[serde(default)]
    pub on_error: OnError,
}

impl PipelineStep {
    pub fn new(id: impl Into<String>, action: StepAction) -> Self {
        Self {
            id: id.into(),
            action: action.as_str().to_string(),
            params: BTreeMap::new(),
            inputs: Vec::new(),
            on_error: OnError::Skip,
        }
    }

    pub fn with_param(mut self, key: &str, value: impl Into<serde_json::Value>) -> Self {
        self.params.insert(key.to_string(), value.into());
        self
    }

    pub fn with_inputs(mut self, inputs: &[&str]) -> Self {
        self.inputs = inputs.iter().map(|s| s.to_string()).collect();
        self
    }

    pub fn param_str(&self, key: &str) -> Option<&str> {
        self.params.get(key).and_then(|v| v.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    Markdown,
    Json,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineOutput {
    pub format: OutputFormat,
    pub limit: usize,
    pub ranking: RankingProfile,
}

impl Default for PipelineOutput {
    fn default() -> Self {
        Self {
            format: OutputFormat::Markdown,
            limit: 20,
            ranking: RankingProfile::Balanced,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PipelineScope {
    #[default]
    Workspace,
    Global,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PipelineConfig {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub steps: Vec<PipelineStep>,
    #[serde(default)]
    pub output: PipelineOutput,
    #[serde(default)]
    pub scope: PipelineScope,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub template: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub template_params: BTreeMap<String, String>,
}

/// Result produced by a single executed step.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepResult {
    pub step_id: String,
    pub action: String,
    #[serde(default)]
    pub articles: Vec<UnifiedArticle>,
    #[serde(default)]
    pub ids: Vec<String>,
    #[serde(default)]
    pub metadata: BTreeMap<String, serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl StepResult {
    pub fn ok(&self) -> bool {
        self.error.is_none()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FixSeverity {
    Info,
    Warning,
}

/// A repair the validator applied automatically.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationFix {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub step_id: Option<String>,
    pub severity: FixSeverity,
    pub message: String,
    pub before: String,
    pub after: String,
}

/// An error the validator could not repair. Aborts validation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationError {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub step_id: Option<String>,
    pub message: String,
}

impl ValidationError {
    pub fn into_error(self) -> MedlitError {
        MedlitError::InvalidArgument(match self.step_id {
            Some(id) => format!("Pipeline step \"{id}\": {}", self.message),
            None => format!("Pipeline: {}", self.message),
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepTiming {
    pub step_id: String,
    pub action: String,
    pub elapsed_ms: u128,
    pub input_count: usize,
    pub output_count: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// One execution of a validated pipeline, suitable for run-history
/// persistence under the config content hash.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineRun {
    pub name: String,
    pub config_hash: String,
    pub started_at: String,
    pub steps: Vec<StepTiming>,
    pub aborted: bool,
    pub output_count: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn action_parse_round_trips() {
        for action in StepAction::ALL {
            assert_eq!(StepAction::parse(action.as_str()), Some(action));
        }
        assert_eq!(StepAction::parse("SEARCH"), Some(StepAction::Search));
        assert_eq!(StepAction::parse("unknown"), None);
    }

    #[test]
    fn step_builder_sets_params_and_inputs() {
        let step = PipelineStep::new("s1", StepAction::Search)
            .with_param("query", "sepsis")
            .with_inputs(&[]);
        assert_eq!(step.param_str("query"), Some("sepsis"));
        assert_eq!(step.on_error, OnError::Skip);
    }

    #[test]
    fn config_yaml_round_trip() {
        let config = PipelineConfig {
            name: "demo".into(),
            steps: vec![
                PipelineStep::new("s1", StepAction::Search).with_param("query", "sepsis"),
                PipelineStep::new("m1", StepAction::Merge).with_inputs(&["s1"]),
            ],
            ..Default::default()
        };
        let yaml = serde_yaml::to_string(&config).expect("config should serialize");
        let parsed: PipelineConfig = serde_yaml::from_str(&yaml).expect("config should parse");
        assert_eq!(parsed.name, "demo");
        assert_eq!(parsed.steps.len(), 2);
        assert_eq!(parsed.steps[1].inputs, vec!["s1".to_string()]);
        assert_eq!(parsed.output.limit, 20);
    }
}
