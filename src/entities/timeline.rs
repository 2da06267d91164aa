use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Research milestones recognized by the timeline subsystem, grouped into
/// eight branch categories by the branch detector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MilestoneType {
    FirstReport,
    MechanismDiscovery,
    Preclinical,
    Phase1,
    Phase2,
    Phase3,
    Phase4,
    FdaApproval,
    EmaApproval,
    RegulatoryApproval,
    MetaAnalysis,
    SystematicReview,
    Guideline,
    Consensus,
    SafetyAlert,
    LabelUpdate,
    Withdrawal,
    LandmarkStudy,
    LandmarkRct,
    Breakthrough,
    Controversy,
    Other,
}

impl MilestoneType {
    pub fn label(self) -> &'static str {
        match self {
            Self::FirstReport => "First report",
            Self::MechanismDiscovery => "Mechanism discovery",
            Self::Preclinical => "Preclinical study",
            Self::Phase1 => "Phase I trial",
            Self::Phase2 => "Phase II trial",
            Self::Phase3 => "Phase III trial",
            Self::Phase4 => "Phase IV trial",
            Self::FdaApproval => "FDA approval",
            Self::EmaApproval => "EMA approval",
            Self::RegulatoryApproval => "Regulatory approval",
            Self::MetaAnalysis => "Meta-analysis",
            Self::SystematicReview => "Systematic review",
            Self::Guideline => "Practice guideline",
            Self::Consensus => "Consensus statement",
            Self::SafetyAlert => "Safety alert",
            Self::LabelUpdate => "Label update",
            Self::Withdrawal => "Market withdrawal",
            Self::LandmarkStudy => "Landmark study",
            Self::LandmarkRct => "Landmark RCT",
            Self::Breakthrough => "Breakthrough",
            Self::Controversy => "Controversy",
            Self::Other => "Other",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimelineEvent {
    pub id: String,
    pub year: i32,
    pub title: String,
    pub milestone_type: MilestoneType,
    pub milestone_label: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub citation_count: Option<u64>,
    /// Evidence level derived from article types, in [0, 1].
    pub evidence_level: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimelinePeriod {
    pub label: String,
    pub start: i32,
    pub end: i32,
    pub count: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResearchTimeline {
    pub topic: String,
    /// Chronologically ordered.
    pub events: Vec<TimelineEvent>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub year_range: Option<(i32, i32)>,
    pub periods: Vec<TimelinePeriod>,
    pub milestone_histogram: BTreeMap<MilestoneType, usize>,
    /// Articles examined before milestone filtering.
    pub total_searched: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResearchBranch {
    pub id: String,
    pub label: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub icon: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub events: Vec<TimelineEvent>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub sub_branches: Vec<ResearchBranch>,
    pub order: u32,
}

impl ResearchBranch {
    pub fn is_empty(&self) -> bool {
        self.events.is_empty() && self.sub_branches.iter().all(|b| b.is_empty())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResearchTree {
    pub topic: String,
    pub branches: Vec<ResearchBranch>,
    pub total_articles: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LandmarkTier {
    Landmark,
    Notable,
    Moderate,
    Standard,
}

impl LandmarkTier {
    pub fn from_overall(overall: f64) -> Self {
        if overall >= 0.80 {
            Self::Landmark
        } else if overall >= 0.60 {
            Self::Notable
        } else if overall >= 0.40 {
            Self::Moderate
        } else {
            Self::Standard
        }
    }
}

/// Composite importance score: weighted combination of five normalized
/// components, each in [0, 1].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LandmarkScore {
    pub citation_impact: f64,
    pub source_agreement: f64,
    pub milestone_confidence: f64,
    pub evidence_quality: f64,
    pub citation_velocity: f64,
    pub overall: f64,
    pub tier: LandmarkTier,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tier_thresholds() {
        assert_eq!(LandmarkTier::from_overall(0.80), LandmarkTier::Landmark);
        assert_eq!(LandmarkTier::from_overall(0.79), LandmarkTier::Notable);
        assert_eq!(LandmarkTier::from_overall(0.60), LandmarkTier::Notable);
        assert_eq!(LandmarkTier::from_overall(0.40), LandmarkTier::Moderate);
        assert_eq!(LandmarkTier::from_overall(0.10), LandmarkTier::Standard);
    }

    #[test]
    fn branch_emptiness_recurses_into_sub_branches() {
        let empty = ResearchBranch {
            id: "clinical".into(),
            label: "Clinical Development".into(),
            icon: None,
            events: Vec::new(),
            sub_branches: vec![ResearchBranch {
                id: "clinical_early".into(),
                label: "Phase I/II".into(),
                icon: None,
                events: Vec::new(),
                sub_branches: Vec::new(),
                order: 1,
            }],
            order: 2,
        };
        assert!(empty.is_empty());
    }
}
