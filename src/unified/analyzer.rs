//! Rule-based query analysis: classify (complexity, intent), recommend a
//! provider subset and ranking profile. Deterministic given the query and
//! its resolved entities.

use std::sync::OnceLock;

use regex::Regex;

use crate::entities::article::Source;
use crate::entities::query::{
    AnalyzedQuery, Complexity, Intent, RankingProfile, ResolvedEntity,
};

const STOPWORDS: &[&str] = &[
    "a", "an", "and", "are", "as", "at", "be", "by", "for", "from", "in", "is", "it", "of", "on",
    "or", "that", "the", "to", "with",
];

fn id_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)^(pmid:\s*\d{1,8}|\d{1,8}|pmc\d+|nct\d{8}|10\.\d{4,9}/\S+)$")
            .expect("static regex")
    })
}

fn comparison_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)\b(vs\.?|versus|compared (?:to|with)|comparison of)\b")
            .expect("static regex")
    })
}

fn field_tag_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\[[a-zA-Z ]{2,20}\]").expect("static regex"))
}

fn image_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)\b(figure|image|imaging|histolog|microscop|radiograph|x-ray|mri|ct scan|ultrasound|photo)\w*\b")
            .expect("static regex")
    })
}

pub fn normalize(query: &str) -> String {
    query.split_whitespace().collect::<Vec<_>>().join(" ")
}

pub fn is_stopword(token: &str) -> bool {
    STOPWORDS.contains(&token.to_ascii_lowercase().as_str())
}

/// Candidate spans worth sending to the entity resolver: content tokens
/// and adjacent bigrams, longest first, capped to keep the resolver cheap.
pub fn entity_candidates(query: &str) -> Vec<String> {
    if id_pattern().is_match(query.trim()) {
        return Vec::new();
    }
    let cleaned = field_tag_pattern().replace_all(query, " ");
    let tokens: Vec<String> = cleaned
        .split(|c: char| !c.is_alphanumeric() && c != '-')
        .map(str::trim)
        .filter(|t| t.len() > 2 && !is_stopword(t))
        .filter(|t| !matches!(t.to_ascii_uppercase().as_str(), "AND" | "OR" | "NOT"))
        .map(str::to_lowercase)
        .collect();

    let mut candidates: Vec<String> = Vec::new();
    for pair in tokens.windows(2) {
        candidates.push(format!("{} {}", pair[0], pair[1]));
    }
    candidates.extend(tokens);
    candidates.dedup();
    candidates.truncate(8);
    candidates
}

fn detect_complexity(query: &str, entity_count: usize) -> Complexity {
    let token_count = query.split_whitespace().count();
    let boolean_ops = query
        .split_whitespace()
        .filter(|t| matches!(*t, "AND" | "OR" | "NOT"))
        .count();
    let field_tags = field_tag_pattern().find_iter(query).count();

    if comparison_pattern().is_match(query)
        || boolean_ops >= 2
        || field_tags >= 2
        || token_count > 12
    {
        Complexity::Complex
    } else if boolean_ops == 1 || field_tags == 1 || token_count > 5 || entity_count >= 2 {
        Complexity::Moderate
    } else {
        Complexity::Simple
    }
}

fn detect_intent(query: &str) -> Intent {
    let lowered = query.to_lowercase();
    if id_pattern().is_match(query.trim()) {
        return Intent::Lookup;
    }
    if comparison_pattern().is_match(query) {
        return Intent::Comparison;
    }
    if lowered.contains("mechanism")
        || lowered.contains("pathway")
        || lowered.contains("how does")
        || lowered.contains("mode of action")
    {
        return Intent::Mechanism;
    }
    let clinical_cues = [
        "treatment",
        "therapy",
        "randomized",
        "clinical trial",
        "diagnosis",
        "prognosis",
        "guideline",
        "dose",
        "dosing",
        "efficacy",
        "safety",
    ];
    if clinical_cues.iter().any(|cue| lowered.contains(cue)) {
        return Intent::Clinical;
    }
    let exploration_cues = [
        "overview",
        "review of",
        "state of the art",
        "landscape",
        "what is known",
        "current evidence",
    ];
    if exploration_cues.iter().any(|cue| lowered.contains(cue)) || lowered.ends_with('?') {
        return Intent::Exploration;
    }
    Intent::Topic
}

fn recommend_sources(complexity: Complexity, intent: Intent, query: &str) -> Vec<Source> {
    if intent == Intent::Lookup {
        let trimmed = query.trim();
        if trimmed.len() >= 3 && trimmed[..3].eq_ignore_ascii_case("nct") {
            return vec![Source::ClinicalTrials];
        }
        return vec![Source::Pubmed];
    }
    let mut sources = vec![Source::Pubmed];
    match complexity {
        Complexity::Simple => {}
        Complexity::Moderate => sources.push(Source::EuropePmc),
        Complexity::Complex => {
            sources.push(Source::EuropePmc);
            sources.push(Source::SemanticScholar);
            sources.push(Source::OpenAlex);
            if intent == Intent::Comparison {
                sources.push(Source::Crossref);
            }
        }
    }
    if intent == Intent::Clinical && !sources.contains(&Source::ClinicalTrials) {
        sources.push(Source::ClinicalTrials);
    }
    sources
}

fn recommend_ranking(intent: Intent) -> RankingProfile {
    match intent {
        Intent::Comparison => RankingProfile::Impact,
        Intent::Clinical => RankingProfile::Clinical,
        Intent::Mechanism => RankingProfile::Quality,
        Intent::Exploration => RankingProfile::Balanced,
        Intent::Topic | Intent::Lookup => RankingProfile::Balanced,
    }
}

pub fn analyze(query: &str, entities: &[ResolvedEntity]) -> AnalyzedQuery {
    let normalized = normalize(query);
    let intent = detect_intent(&normalized);
    let complexity = if intent == Intent::Lookup {
        Complexity::Simple
    } else {
        detect_complexity(&normalized, entities.len())
    };
    AnalyzedQuery {
        original: query.to_string(),
        normalized: normalized.clone(),
        entities: entities.to_vec(),
        complexity,
        intent,
        sources: recommend_sources(complexity, intent, &normalized),
        ranking: recommend_ranking(intent),
        image_search_recommended: image_pattern().is_match(&normalized),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pmid_lookup_is_simple_and_pubmed_only() {
        let analysis = analyze("PMID:37654670", &[]);
        assert_eq!(analysis.complexity, Complexity::Simple);
        assert_eq!(analysis.intent, Intent::Lookup);
        assert_eq!(analysis.sources, vec![Source::Pubmed]);
    }

    #[test]
    fn bare_pmid_and_doi_are_lookups() {
        assert_eq!(analyze("37654670", &[]).intent, Intent::Lookup);
        assert_eq!(
            analyze("10.1056/NEJMoa1203421", &[]).intent,
            Intent::Lookup
        );
    }

    #[test]
    fn nct_lookup_routes_to_trials_registry() {
        let analysis = analyze("NCT04234568", &[]);
        assert_eq!(analysis.intent, Intent::Lookup);
        assert_eq!(analysis.sources, vec![Source::ClinicalTrials]);
    }

    #[test]
    fn comparison_is_complex_multi_source_impact_ranked() {
        let analysis = analyze("remimazolam vs propofol for ICU sedation", &[]);
        assert_eq!(analysis.complexity, Complexity::Complex);
        assert_eq!(analysis.intent, Intent::Comparison);
        assert!(analysis.sources.len() >= 2);
        assert!(analysis.sources.contains(&Source::Pubmed));
        assert_eq!(analysis.ranking, RankingProfile::Impact);
    }

    #[test]
    fn bare_keyword_phrase_is_simple_topic_primary_only() {
        let analysis = analyze("diabetes remission", &[]);
        assert_eq!(analysis.complexity, Complexity::Simple);
        assert_eq!(analysis.intent, Intent::Topic);
        assert_eq!(analysis.sources, vec![Source::Pubmed]);
    }

    #[test]
    fn field_tags_make_query_moderate_with_one_secondary() {
        let analysis = analyze("sepsis[mesh] antibiotics early goal", &[]);
        assert_eq!(analysis.complexity, Complexity::Moderate);
        assert_eq!(analysis.sources, vec![Source::Pubmed, Source::EuropePmc]);
    }

    #[test]
    fn clinical_intent_adds_trials_registry() {
        let analysis = analyze("early antibiotics sepsis treatment outcomes", &[]);
        assert_eq!(analysis.intent, Intent::Clinical);
        assert!(analysis.sources.contains(&Source::ClinicalTrials));
        assert_eq!(analysis.ranking, RankingProfile::Clinical);
    }

    #[test]
    fn visual_artifact_queries_recommend_image_search() {
        let analysis = analyze("histology images of glioblastoma", &[]);
        assert!(analysis.image_search_recommended);
        let analysis = analyze("glioblastoma treatment", &[]);
        assert!(!analysis.image_search_recommended);
    }

    #[test]
    fn candidates_include_bigrams_and_skip_operators() {
        let candidates = entity_candidates("remimazolam AND propofol sedation");
        assert!(candidates.contains(&"remimazolam".to_string()));
        assert!(candidates.contains(&"propofol sedation".to_string()));
        assert!(!candidates.iter().any(|c| c.contains("and")));
    }

    #[test]
    fn id_queries_have_no_entity_candidates() {
        assert!(entity_candidates("PMID:12345").is_empty());
    }

    #[test]
    fn analysis_is_deterministic() {
        let a = analyze("remimazolam vs propofol for ICU sedation", &[]);
        let b = analyze("remimazolam vs propofol for ICU sedation", &[]);
        assert_eq!(a.sources, b.sources);
        assert_eq!(a.complexity, b.complexity);
        assert_eq!(a.intent, b.intent);
    }
}
