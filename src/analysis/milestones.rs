//! Regex-based milestone detection over titles and abstracts. Each
//! pattern carries a confidence; the best match wins. Article types give a
//! stronger signal than text patterns where both apply.

use std::sync::OnceLock;

use regex::Regex;

use crate::entities::article::UnifiedArticle;
use crate::entities::timeline::MilestoneType;

pub struct MilestoneMatch {
    pub milestone_type: MilestoneType,
    pub confidence: f64,
}

struct Pattern {
    milestone_type: MilestoneType,
    regex: Regex,
    confidence: f64,
}

fn patterns() -> &'static Vec<Pattern> {
    static PATTERNS: OnceLock<Vec<Pattern>> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        let table: &[(MilestoneType, &str, f64)] = &[
            (
                MilestoneType::FirstReport,
                r"(?i)\bfirst (report|case|description|demonstration|evidence|use) of\b",
                0.9,
            ),
            (
                MilestoneType::FirstReport,
                r"(?i)\bnovel (therapy|treatment|agent|compound)\b",
                0.6,
            ),
            (
                MilestoneType::MechanismDiscovery,
                r"(?i)\b(mechanism of action|molecular mechanism|signal(l)?ing pathway|mode of action)\b",
                0.8,
            ),
            (
                MilestoneType::Preclinical,
                r"(?i)\b(preclinical|in vitro|mouse model|murine model|animal model|xenograft)\b",
                0.7,
            ),
            (MilestoneType::Phase1, r"(?i)\bphase (i|1)\b", 0.85),
            (MilestoneType::Phase2, r"(?i)\bphase (ii|2)\b", 0.85),
            (MilestoneType::Phase3, r"(?i)\bphase (iii|3)\b", 0.9),
            (MilestoneType::Phase4, r"(?i)\bphase (iv|4)\b", 0.85),
            (
                MilestoneType::FdaApproval,
                r"(?i)\bfda[- ]approv(al|ed|es)\b",
                0.95,
            ),
            (
                MilestoneType::EmaApproval,
                r"(?i)\bema[- ]approv(al|ed|es)\b",
                0.95,
            ),
            (
                MilestoneType::RegulatoryApproval,
                r"(?i)\b(regulatory approval|marketing authori[sz]ation|approved for (clinical )?use)\b",
                0.85,
            ),
            (
                MilestoneType::MetaAnalysis,
                r"(?i)\bmeta-?analysis\b",
                0.9,
            ),
            (
                MilestoneType::SystematicReview,
                r"(?i)\bsystematic review\b",
                0.9,
            ),
            (
                MilestoneType::Guideline,
                r"(?i)\b(practice guideline|clinical guideline|guidelines? (for|on)|recommendations (for|on))\b",
                0.85,
            ),
            (
                MilestoneType::Consensus,
                r"(?i)\bconsensus (statement|conference|panel|definition)\b",
                0.85,
            ),
            (
                MilestoneType::SafetyAlert,
                r"(?i)\b(safety (alert|signal|concern)|serious adverse event|black box warning)\b",
                0.75,
            ),
            (
                MilestoneType::LabelUpdate,
                r"(?i)\b(label (update|change)|boxed warning added)\b",
                0.7,
            ),
            (
                MilestoneType::Withdrawal,
                r"(?i)\b(withdrawn from (the )?market|market withdrawal|recall(ed)? from market)\b",
                0.85,
            ),
            (
                MilestoneType::LandmarkRct,
                r"(?i)\b(landmark (randomized|randomised) (controlled )?trial|pivotal trial)\b",
                0.9,
            ),
            (
                MilestoneType::LandmarkStudy,
                r"(?i)\blandmark (study|paper|analysis)\b",
                0.8,
            ),
            (
                MilestoneType::Breakthrough,
                r"(?i)\b(breakthrough|paradigm shift|game.chang)\w*\b",
                0.7,
            ),
            (
                MilestoneType::Controversy,
                r"(?i)\b(controvers|conflicting (results|evidence)|debate over)\w*\b",
                0.6,
            ),
        ];
        table
            .iter()
            .map(|(milestone_type, pattern, confidence)| Pattern {
                milestone_type: *milestone_type,
                regex: Regex::new(pattern).expect("static regex"),
                confidence: *confidence,
            })
            .collect()
    })
}

/// Milestones derivable from the article-type set alone.
fn from_article_types(article: &UnifiedArticle) -> Option<MilestoneMatch> {
    let has = |fragment: &str| article.article_types.iter().any(|t| t.contains(fragment));
    if has("meta-analysis") || has("meta analysis") {
        return Some(MilestoneMatch {
            milestone_type: MilestoneType::MetaAnalysis,
            confidence: 0.95,
        });
    }
    if has("systematic review") {
        return Some(MilestoneMatch {
            milestone_type: MilestoneType::SystematicReview,
            confidence: 0.95,
        });
    }
    if has("practice guideline") || has("guideline") {
        return Some(MilestoneMatch {
            milestone_type: MilestoneType::Guideline,
            confidence: 0.95,
        });
    }
    if has("clinical trial, phase i") {
        return Some(MilestoneMatch {
            milestone_type: MilestoneType::Phase1,
            confidence: 0.9,
        });
    }
    if has("clinical trial, phase ii") {
        return Some(MilestoneMatch {
            milestone_type: MilestoneType::Phase2,
            confidence: 0.9,
        });
    }
    if has("clinical trial, phase iii") {
        return Some(MilestoneMatch {
            milestone_type: MilestoneType::Phase3,
            confidence: 0.9,
        });
    }
    if has("clinical trial, phase iv") {
        return Some(MilestoneMatch {
            milestone_type: MilestoneType::Phase4,
            confidence: 0.9,
        });
    }
    None
}

/// Best milestone for an article, or `None` when nothing matches.
pub fn detect(article: &UnifiedArticle) -> Option<MilestoneMatch> {
    let mut best = from_article_types(article);

    let mut text = article.title.clone();
    if let Some(abstract_text) = article.abstract_text.as_deref() {
        text.push(' ');
        // The opening of the abstract carries the framing statements.
        text.push_str(&abstract_text.chars().take(600).collect::<String>());
    }

    for pattern in patterns() {
        if pattern.regex.is_match(&text) {
            let better = best
                .as_ref()
                .is_none_or(|b| pattern.confidence > b.confidence);
            if better {
                best = Some(MilestoneMatch {
                    milestone_type: pattern.milestone_type,
                    confidence: pattern.confidence,
                });
            }
        }
    }
    best
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::article::Source;

    fn article(title: &str) -> UnifiedArticle {
        UnifiedArticle::new("1", title, Source::Pubmed)
    }

    #[test]
    fn first_report_pattern() {
        let m = detect(&article("First report of remimazolam use in septic shock")).unwrap();
        assert_eq!(m.milestone_type, MilestoneType::FirstReport);
        assert!(m.confidence >= 0.9);
    }

    #[test]
    fn phase_patterns_do_not_cross_match() {
        let m = detect(&article("A phase III randomized trial of drug X")).unwrap();
        assert_eq!(m.milestone_type, MilestoneType::Phase3);
        let m = detect(&article("Phase II dose-finding study")).unwrap();
        assert_eq!(m.milestone_type, MilestoneType::Phase2);
    }

    #[test]
    fn fda_approval_beats_weaker_patterns() {
        let m = detect(&article(
            "FDA approval of a novel treatment after breakthrough designation",
        ))
        .unwrap();
        assert_eq!(m.milestone_type, MilestoneType::FdaApproval);
    }

    #[test]
    fn article_type_signal_outranks_text() {
        let mut a = article("An umbrella overview");
        a.article_types.insert("meta-analysis".into());
        let m = detect(&a).unwrap();
        assert_eq!(m.milestone_type, MilestoneType::MetaAnalysis);
        assert!(m.confidence >= 0.95);
    }

    #[test]
    fn abstract_text_is_scanned() {
        let mut a = article("Drug X outcomes");
        a.abstract_text =
            Some("This consensus statement from the task force defines sepsis.".into());
        let m = detect(&a).unwrap();
        assert_eq!(m.milestone_type, MilestoneType::Consensus);
    }

    #[test]
    fn unremarkable_article_has_no_milestone() {
        assert!(detect(&article("Observational cohort of sedation practice")).is_none());
    }
}
