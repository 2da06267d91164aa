//! Semantic query enhancer. Opt-in and best-effort: expands resolved
//! entities into synonym and controlled-vocabulary variants and derives
//! provider-specific query strings. An empty expansion list is valid.

use std::collections::BTreeMap;

use crate::entities::article::Source;
use crate::entities::query::{
    AnalyzedQuery, EnhancedQuery, EntityType, Expansion, ExpansionKind,
};

fn entity_weight(entity_type: EntityType) -> f64 {
    match entity_type {
        EntityType::Chemical => 1.0,
        EntityType::Disease | EntityType::Gene => 0.9,
        EntityType::Variant => 0.8,
        EntityType::Species => 0.5,
    }
}

/// Controlled-vocabulary ID carried in a PubTator entity ID, when present
/// (e.g. `@DISEASE_MESH_D003920` carries `D003920`).
fn vocabulary_id(entity_id: &str) -> Option<String> {
    let (_, tail) = entity_id.rsplit_once("MESH_")?;
    (!tail.is_empty()).then(|| tail.to_string())
}

pub fn enhance(analysis: &AnalyzedQuery) -> EnhancedQuery {
    let mut expansions: Vec<Expansion> = Vec::new();
    for entity in &analysis.entities {
        let weight = entity.score * entity_weight(entity.entity_type);
        if !entity.name.eq_ignore_ascii_case(&entity.text) {
            expansions.push(Expansion {
                entity: entity.name.clone(),
                term: entity.name.clone(),
                kind: ExpansionKind::Synonym,
                weight,
            });
        }
        if let Some(mesh_id) = vocabulary_id(&entity.entity_id) {
            expansions.push(Expansion {
                entity: entity.name.clone(),
                term: mesh_id,
                kind: ExpansionKind::MeshId,
                // Controlled-vocabulary hits are precise but narrower.
                weight: weight * 0.9,
            });
        }
    }
    expansions.sort_by(|a, b| {
        b.weight
            .partial_cmp(&a.weight)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.term.cmp(&b.term))
    });

    let mut source_queries: BTreeMap<Source, String> = BTreeMap::new();
    if !expansions.is_empty() {
        source_queries.insert(Source::Pubmed, pubmed_query(analysis, &expansions));
        source_queries.insert(Source::EuropePmc, europepmc_query(analysis, &expansions));
    }

    EnhancedQuery {
        analysis: analysis.clone(),
        expansions,
        source_queries,
    }
}

fn pubmed_query(analysis: &AnalyzedQuery, expansions: &[Expansion]) -> String {
    let mut clauses: Vec<String> = vec![format!("({})", analysis.normalized)];
    for expansion in expansions.iter().take(4) {
        match expansion.kind {
            ExpansionKind::Synonym => clauses.push(format!("\"{}\"[tiab]", expansion.term)),
            ExpansionKind::MeshId => clauses.push(format!("\"{}\"[mesh]", expansion.entity)),
        }
    }
    clauses.join(" OR ")
}

fn europepmc_query(analysis: &AnalyzedQuery, expansions: &[Expansion]) -> String {
    let mut clauses: Vec<String> = vec![format!("({})", analysis.normalized)];
    for expansion in expansions.iter().take(4) {
        match expansion.kind {
            ExpansionKind::Synonym => clauses.push(format!("\"{}\"", expansion.term)),
            ExpansionKind::MeshId => clauses.push(format!("MESH:\"{}\"", expansion.entity)),
        }
    }
    clauses.join(" OR ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::query::ResolvedEntity;
    use crate::unified::analyzer;

    fn entity(text: &str, name: &str, id: &str, entity_type: EntityType) -> ResolvedEntity {
        ResolvedEntity {
            text: text.into(),
            name: name.into(),
            entity_type,
            entity_id: id.into(),
            score: 0.9,
        }
    }

    #[test]
    fn no_entities_yields_empty_but_valid_enhancement() {
        let analysis = analyzer::analyze("some rare query", &[]);
        let enhanced = enhance(&analysis);
        assert!(enhanced.expansions.is_empty());
        assert!(enhanced.source_queries.is_empty());
    }

    #[test]
    fn synonym_and_mesh_expansions_are_ranked_by_weight() {
        let entities = vec![
            entity("sugar disease", "Diabetes Mellitus", "@DISEASE_MESH_D003920", EntityType::Disease),
            entity("mouse", "Mus musculus", "@SPECIES_10090", EntityType::Species),
        ];
        let analysis = analyzer::analyze("sugar disease in mouse models", &entities);
        let enhanced = enhance(&analysis);

        assert!(!enhanced.expansions.is_empty());
        // Disease synonym outweighs species synonym.
        assert_eq!(enhanced.expansions[0].entity, "Diabetes Mellitus");
        let weights: Vec<f64> = enhanced.expansions.iter().map(|e| e.weight).collect();
        assert!(weights.windows(2).all(|w| w[0] >= w[1]));
        assert!(
            enhanced
                .expansions
                .iter()
                .any(|e| e.kind == ExpansionKind::MeshId && e.term == "D003920")
        );
    }

    #[test]
    fn derived_queries_cover_primary_and_secondary_index() {
        let entities = vec![entity(
            "sugar disease",
            "Diabetes Mellitus",
            "@DISEASE_MESH_D003920",
            EntityType::Disease,
        )];
        let analysis = analyzer::analyze("sugar disease treatment", &entities);
        let enhanced = enhance(&analysis);
        let pubmed = enhanced.source_queries.get(&Source::Pubmed).unwrap();
        assert!(pubmed.contains("(sugar disease treatment)"));
        assert!(pubmed.contains("\"Diabetes Mellitus\"[mesh]"));
        let epmc = enhanced.source_queries.get(&Source::EuropePmc).unwrap();
        assert!(epmc.contains("MESH:\"Diabetes Mellitus\""));
    }
}
