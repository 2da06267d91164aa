//! Progressive query relaxation. When a search comes back empty the
//! orchestrator replays dispatch with each transformation in turn,
//! stopping at the first that clears the minimum. Each step is
//! structurally simpler than the previous; the chain is bounded at five.

use serde::Serialize;

use crate::entities::query::{ResolvedEntity, SearchFilters};
use crate::unified::analyzer;

#[derive(Debug, Clone, Serialize)]
pub struct RelaxationStep {
    pub label: String,
    pub query: String,
    pub result_count: usize,
}

#[derive(Debug, Clone)]
pub struct RelaxationCandidate {
    pub label: &'static str,
    pub query: String,
    pub filters: SearchFilters,
}

/// The ordered relaxation chain for a query. Steps that would not change
/// anything (e.g. dropping a filter that is not set) are omitted, so the
/// returned sequence has at most five entries.
pub fn relaxation_sequence(
    query: &str,
    filters: &SearchFilters,
    entities: &[ResolvedEntity],
) -> Vec<RelaxationCandidate> {
    let mut sequence: Vec<RelaxationCandidate> = Vec::new();
    let mut current = filters.clone();

    if current.min_year.is_some() || current.max_year.is_some() {
        current.min_year = None;
        current.max_year = None;
        sequence.push(RelaxationCandidate {
            label: "drop_date_filter",
            query: query.to_string(),
            filters: current.clone(),
        });
    }

    if !current.article_types.is_empty() {
        current.article_types.clear();
        sequence.push(RelaxationCandidate {
            label: "drop_article_type_filter",
            query: query.to_string(),
            filters: current.clone(),
        });
    }

    if current.age_group.is_some() || current.sex.is_some() || current.species.is_some() {
        current.age_group = None;
        current.sex = None;
        current.species = None;
        sequence.push(RelaxationCandidate {
            label: "broaden_population_filters",
            query: query.to_string(),
            filters: current.clone(),
        });
    }

    if let Some(or_query) = and_chain_to_or(query, entities) {
        sequence.push(RelaxationCandidate {
            label: "convert_and_to_or",
            query: or_query,
            filters: current.clone(),
        });
    }

    if let Some(keyword) = salient_keyword(query, entities) {
        if !keyword.eq_ignore_ascii_case(query.trim()) {
            sequence.push(RelaxationCandidate {
                label: "fallback_single_keyword",
                query: keyword,
                filters: current,
            });
        }
    }

    sequence.truncate(5);
    sequence
}

/// Strict boolean AND chains become an OR of the top two entities (or the
/// first two AND clauses when no entities resolved).
fn and_chain_to_or(query: &str, entities: &[ResolvedEntity]) -> Option<String> {
    if !query.contains(" AND ") {
        return None;
    }
    let mut ranked: Vec<&ResolvedEntity> = entities.iter().collect();
    ranked.sort_by(|a, b| b.score.total_cmp(&a.score));
    if ranked.len() >= 2 {
        return Some(format!("{} OR {}", ranked[0].name, ranked[1].name));
    }
    let clauses: Vec<&str> = query
        .split(" AND ")
        .map(str::trim)
        .filter(|c| !c.is_empty())
        .collect();
    if clauses.len() >= 2 {
        Some(format!("{} OR {}", clauses[0], clauses[1]))
    } else {
        None
    }
}

/// The single most salient keyword: the best-scoring resolved entity, or
/// the longest content token of the query.
fn salient_keyword(query: &str, entities: &[ResolvedEntity]) -> Option<String> {
    if let Some(best) = entities.iter().max_by(|a, b| a.score.total_cmp(&b.score)) {
        return Some(best.name.clone());
    }
    query
        .split(|c: char| !c.is_alphanumeric() && c != '-')
        .filter(|t| t.len() > 2 && !analyzer::is_stopword(t))
        .filter(|t| !matches!(t.to_ascii_uppercase().as_str(), "AND" | "OR" | "NOT"))
        .max_by_key(|t| t.len())
        .map(str::to_lowercase)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::query::EntityType;

    fn entity(name: &str, score: f64) -> ResolvedEntity {
        ResolvedEntity {
            text: name.to_string(),
            name: name.to_string(),
            entity_type: EntityType::Chemical,
            entity_id: format!("@CHEMICAL_{name}"),
            score,
        }
    }

    #[test]
    fn full_chain_has_at_most_five_steps() {
        let filters = SearchFilters {
            min_year: Some(2024),
            max_year: Some(2024),
            age_group: Some("child".into()),
            sex: Some("female".into()),
            article_types: vec!["review".into()],
            ..Default::default()
        };
        let entities = vec![entity("remimazolam", 0.9), entity("propofol", 0.8)];
        let sequence =
            relaxation_sequence("remimazolam AND propofol AND outcomes", &filters, &entities);
        assert!(sequence.len() <= 5);
        assert_eq!(sequence[0].label, "drop_date_filter");
        assert_eq!(sequence[1].label, "drop_article_type_filter");
        assert_eq!(sequence[2].label, "broaden_population_filters");
        assert_eq!(sequence[3].label, "convert_and_to_or");
        assert_eq!(sequence[3].query, "remimazolam OR propofol");
        assert_eq!(sequence[4].label, "fallback_single_keyword");
        assert_eq!(sequence[4].query, "remimazolam");
    }

    #[test]
    fn steps_get_structurally_simpler() {
        let filters = SearchFilters {
            min_year: Some(2020),
            age_group: Some("aged".into()),
            ..Default::default()
        };
        let sequence = relaxation_sequence("alpha AND beta AND gamma", &filters, &[]);
        // Filters only ever lose constraints along the chain.
        for pair in sequence.windows(2) {
            let earlier = &pair[0].filters;
            let later = &pair[1].filters;
            assert!(
                later.min_year.is_none() || earlier.min_year.is_some(),
                "a later step must not reintroduce a filter"
            );
        }
        let last = sequence.last().unwrap();
        assert!(!last.query.contains(" AND "));
    }

    #[test]
    fn unset_filters_are_skipped() {
        let sequence = relaxation_sequence("plain keyword", &SearchFilters::default(), &[]);
        assert!(sequence.iter().all(|s| s.label != "drop_date_filter"));
    }

    #[test]
    fn and_chain_without_entities_uses_clauses() {
        let sequence = relaxation_sequence(
            "nonexistent-term AND year-limited AND pediatric",
            &SearchFilters::default(),
            &[],
        );
        let or_step = sequence
            .iter()
            .find(|s| s.label == "convert_and_to_or")
            .unwrap();
        assert_eq!(or_step.query, "nonexistent-term OR year-limited");
    }

    #[test]
    fn single_word_query_yields_no_fallback_step() {
        let sequence = relaxation_sequence("remimazolam", &SearchFilters::default(), &[]);
        assert!(sequence.is_empty());
    }
}
