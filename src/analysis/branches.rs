//! Branch detection: bucket timeline events by milestone type into the
//! eight research-branch categories. Clinical Development splits into
//! Phase I/II and Phase III/IV sub-branches only when both sub-populations
//! are non-empty; empty branches are omitted.

use std::collections::BTreeMap;

use crate::entities::timeline::{
    MilestoneType, ResearchBranch, ResearchTimeline, ResearchTree, TimelineEvent,
};

fn branch_id(milestone_type: MilestoneType) -> &'static str {
    use MilestoneType::*;
    match milestone_type {
        FirstReport | MechanismDiscovery | Preclinical => "discovery",
        Phase1 | Phase2 | Phase3 | Phase4 => "clinical",
        FdaApproval | EmaApproval | RegulatoryApproval => "regulatory",
        MetaAnalysis | SystematicReview => "evidence",
        Guideline | Consensus => "practice",
        SafetyAlert | LabelUpdate | Withdrawal => "safety",
        LandmarkStudy | LandmarkRct | Breakthrough | Controversy => "landmark",
        Other => "general",
    }
}

/// Branch metadata: label, icon, display order.
fn branch_meta(id: &str) -> (&'static str, &'static str, u32) {
    match id {
        "discovery" => ("Discovery & Mechanism", "\u{1f52c}", 1),
        "clinical" => ("Clinical Development", "\u{1f3e5}", 2),
        "regulatory" => ("Regulatory Milestones", "\u{1f4cb}", 3),
        "evidence" => ("Evidence Synthesis", "\u{1f4ca}", 4),
        "practice" => ("Guidelines & Practice", "\u{1f4d6}", 5),
        "safety" => ("Safety & Pharmacovigilance", "\u{26a0}\u{fe0f}", 6),
        "landmark" => ("Landmark Studies", "\u{1f3c6}", 7),
        _ => ("Other Studies", "\u{1f4c4}", 8),
    }
}

const BRANCH_ORDER: &[&str] = &[
    "discovery",
    "clinical",
    "regulatory",
    "evidence",
    "practice",
    "safety",
    "landmark",
    "general",
];

fn is_early_phase(milestone_type: MilestoneType) -> bool {
    matches!(milestone_type, MilestoneType::Phase1 | MilestoneType::Phase2)
}

fn is_late_phase(milestone_type: MilestoneType) -> bool {
    matches!(milestone_type, MilestoneType::Phase3 | MilestoneType::Phase4)
}

fn build_clinical_branch(events: Vec<TimelineEvent>) -> ResearchBranch {
    let (label, icon, order) = branch_meta("clinical");
    let early: Vec<TimelineEvent> = events
        .iter()
        .filter(|e| is_early_phase(e.milestone_type))
        .cloned()
        .collect();
    let late: Vec<TimelineEvent> = events
        .iter()
        .filter(|e| is_late_phase(e.milestone_type))
        .cloned()
        .collect();

    // Sub-branches only when both phases have events; otherwise flat.
    if !early.is_empty() && !late.is_empty() {
        ResearchBranch {
            id: "clinical".into(),
            label: label.into(),
            icon: Some(icon.into()),
            events: Vec::new(),
            sub_branches: vec![
                ResearchBranch {
                    id: "clinical_early".into(),
                    label: "Phase I/II".into(),
                    icon: None,
                    events: early,
                    sub_branches: Vec::new(),
                    order: 1,
                },
                ResearchBranch {
                    id: "clinical_late".into(),
                    label: "Phase III/IV".into(),
                    icon: None,
                    events: late,
                    sub_branches: Vec::new(),
                    order: 2,
                },
            ],
            order,
        }
    } else {
        ResearchBranch {
            id: "clinical".into(),
            label: label.into(),
            icon: Some(icon.into()),
            events,
            sub_branches: Vec::new(),
            order,
        }
    }
}

pub fn build_research_tree(timeline: &ResearchTimeline) -> ResearchTree {
    let mut buckets: BTreeMap<&'static str, Vec<TimelineEvent>> = BTreeMap::new();
    for event in &timeline.events {
        buckets
            .entry(branch_id(event.milestone_type))
            .or_default()
            .push(event.clone());
    }

    let mut branches: Vec<ResearchBranch> = Vec::new();
    for id in BRANCH_ORDER {
        let Some(events) = buckets.remove(id) else {
            continue;
        };
        if events.is_empty() {
            continue;
        }
        let branch = if *id == "clinical" {
            build_clinical_branch(events)
        } else {
            let (label, icon, order) = branch_meta(id);
            ResearchBranch {
                id: (*id).to_string(),
                label: label.into(),
                icon: Some(icon.into()),
                events,
                sub_branches: Vec::new(),
                order,
            }
        };
        branches.push(branch);
    }

    ResearchTree {
        topic: timeline.topic.clone(),
        branches,
        total_articles: timeline.total_searched,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(id: &str, year: i32, milestone_type: MilestoneType) -> TimelineEvent {
        TimelineEvent {
            id: id.into(),
            year,
            title: format!("Event {id}"),
            milestone_type,
            milestone_label: milestone_type.label().into(),
            citation_count: None,
            evidence_level: 0.5,
        }
    }

    fn timeline(events: Vec<TimelineEvent>) -> ResearchTimeline {
        ResearchTimeline {
            topic: "topic".into(),
            total_searched: events.len(),
            events,
            year_range: None,
            periods: Vec::new(),
            milestone_histogram: BTreeMap::new(),
        }
    }

    #[test]
    fn events_bucket_into_branch_categories() {
        let tree = build_research_tree(&timeline(vec![
            event("1", 1998, MilestoneType::FirstReport),
            event("2", 2005, MilestoneType::MechanismDiscovery),
            event("3", 2018, MilestoneType::FdaApproval),
            event("4", 2020, MilestoneType::MetaAnalysis),
        ]));
        let ids: Vec<&str> = tree.branches.iter().map(|b| b.id.as_str()).collect();
        assert_eq!(ids, vec!["discovery", "regulatory", "evidence"]);
        assert_eq!(tree.branches[0].events.len(), 2);
    }

    #[test]
    fn empty_branches_are_omitted() {
        let tree = build_research_tree(&timeline(vec![event(
            "1",
            2020,
            MilestoneType::Guideline,
        )]));
        assert_eq!(tree.branches.len(), 1);
        assert_eq!(tree.branches[0].id, "practice");
    }

    #[test]
    fn clinical_splits_only_with_both_phases() {
        let tree = build_research_tree(&timeline(vec![
            event("1", 2010, MilestoneType::Phase1),
            event("2", 2012, MilestoneType::Phase2),
            event("3", 2015, MilestoneType::Phase3),
        ]));
        let clinical = &tree.branches[0];
        assert_eq!(clinical.id, "clinical");
        assert!(clinical.events.is_empty());
        assert_eq!(clinical.sub_branches.len(), 2);
        assert_eq!(clinical.sub_branches[0].label, "Phase I/II");
        assert_eq!(clinical.sub_branches[0].events.len(), 2);
        assert_eq!(clinical.sub_branches[1].events.len(), 1);
    }

    #[test]
    fn single_phase_population_stays_flat() {
        let tree = build_research_tree(&timeline(vec![
            event("1", 2010, MilestoneType::Phase1),
            event("2", 2012, MilestoneType::Phase2),
        ]));
        let clinical = &tree.branches[0];
        assert!(clinical.sub_branches.is_empty());
        assert_eq!(clinical.events.len(), 2);
    }

    #[test]
    fn branches_keep_display_order() {
        let tree = build_research_tree(&timeline(vec![
            event("1", 2020, MilestoneType::Breakthrough),
            event("2", 1998, MilestoneType::FirstReport),
            event("3", 2015, MilestoneType::SafetyAlert),
        ]));
        let orders: Vec<u32> = tree.branches.iter().map(|b| b.order).collect();
        assert!(orders.windows(2).all(|w| w[0] < w[1]));
    }
}
