//! Landmark scoring: a weighted combination of five normalized signals.
//! Field-normalized citation impact carries the most weight; a paper with
//! moderate raw citations but a top-percentile RCR found in three
//! databases outranks a single-source paper with many raw citations.

use crate::entities::article::UnifiedArticle;
use crate::entities::timeline::{LandmarkScore, LandmarkTier};
use crate::unified::aggregator::{MAX_RCR, article_type_weight};

use super::milestones;

const WEIGHT_CITATION_IMPACT: f64 = 0.35;
const WEIGHT_SOURCE_AGREEMENT: f64 = 0.15;
const WEIGHT_MILESTONE_CONFIDENCE: f64 = 0.20;
const WEIGHT_EVIDENCE_QUALITY: f64 = 0.15;
const WEIGHT_CITATION_VELOCITY: f64 = 0.15;

/// Citations-per-year cap. Exposed as configuration because the right cap
/// depends on the field; the default divides by 20 and clamps.
pub const DEFAULT_VELOCITY_CAP: f64 = 20.0;

#[derive(Debug, Clone, Copy)]
pub struct LandmarkConfig {
    pub velocity_cap: f64,
}

impl Default for LandmarkConfig {
    fn default() -> Self {
        Self {
            velocity_cap: DEFAULT_VELOCITY_CAP,
        }
    }
}

fn citation_impact(article: &UnifiedArticle) -> f64 {
    let Some(metrics) = article.citation_metrics.as_ref() else {
        return 0.0;
    };
    let rcr_component = metrics
        .relative_citation_ratio
        .map(|rcr| rcr.clamp(0.0, MAX_RCR) / MAX_RCR)
        .unwrap_or(0.0);
    let percentile_component = metrics
        .percentile
        .map(|p| (p / 100.0).clamp(0.0, 1.0))
        .unwrap_or(0.0);
    match (
        metrics.relative_citation_ratio.is_some(),
        metrics.percentile.is_some(),
    ) {
        (true, true) => 0.6 * rcr_component + 0.4 * percentile_component,
        (true, false) => rcr_component,
        (false, true) => percentile_component,
        // Raw counts only: a weak fallback capped well below the top.
        (false, false) => ((metrics.citation_count as f64) / 1000.0).min(0.5),
    }
}

/// 0 for a single-source record, stepping up per additional provider and
/// saturating at 1.
fn source_agreement(article: &UnifiedArticle) -> f64 {
    let extra = article.provenance.len().saturating_sub(1);
    (extra as f64 * 0.33).min(1.0)
}

fn citation_velocity(article: &UnifiedArticle, cap: f64) -> f64 {
    article
        .citation_metrics
        .as_ref()
        .and_then(|m| m.citations_per_year)
        .map(|cpy| (cpy / cap).clamp(0.0, 1.0))
        .unwrap_or(0.0)
}

pub fn score_with_config(article: &UnifiedArticle, config: &LandmarkConfig) -> LandmarkScore {
    let citation_impact = citation_impact(article);
    let source_agreement = source_agreement(article);
    let milestone_confidence = milestones::detect(article)
        .map(|m| m.confidence)
        .unwrap_or(0.0);
    let evidence_quality = article_type_weight(article);
    let citation_velocity = citation_velocity(article, config.velocity_cap);

    let overall = WEIGHT_CITATION_IMPACT * citation_impact
        + WEIGHT_SOURCE_AGREEMENT * source_agreement
        + WEIGHT_MILESTONE_CONFIDENCE * milestone_confidence
        + WEIGHT_EVIDENCE_QUALITY * evidence_quality
        + WEIGHT_CITATION_VELOCITY * citation_velocity;

    LandmarkScore {
        citation_impact,
        source_agreement,
        milestone_confidence,
        evidence_quality,
        citation_velocity,
        overall,
        tier: LandmarkTier::from_overall(overall),
    }
}

pub fn score(article: &UnifiedArticle) -> LandmarkScore {
    score_with_config(article, &LandmarkConfig::default())
}
