//! Citation tree construction and graph-format converters. The tree is a
//! BFS from a seed record following citing and/or reference edges through
//! whichever adapters expose those capabilities.

use std::collections::HashSet;

use serde::Serialize;
use serde_json::json;

use crate::entities::article::{Source, UnifiedArticle};
use crate::error::MedlitError;
use crate::unified::dispatcher::Dispatcher;

pub const MAX_DEPTH: usize = 3;
pub const DEFAULT_BRANCH_LIMIT: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TreeDirection {
    Citing,
    References,
    Both,
}

impl TreeDirection {
    pub fn from_flag(value: &str) -> Result<Self, MedlitError> {
        match value.trim().to_ascii_lowercase().as_str() {
            "citing" | "forward" => Ok(Self::Citing),
            "references" | "backward" => Ok(Self::References),
            "both" => Ok(Self::Both),
            _ => Err(MedlitError::InvalidArgument(
                "direction must be one of: citing, references, both".into(),
            )),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum GraphFormat {
    Cytoscape,
    G6,
    D3,
    Vis,
    Graphml,
    Mermaid,
}

impl GraphFormat {
    pub fn from_flag(value: &str) -> Result<Self, MedlitError> {
        match value.trim().to_ascii_lowercase().as_str() {
            "cytoscape" => Ok(Self::Cytoscape),
            "g6" => Ok(Self::G6),
            "d3" => Ok(Self::D3),
            "vis" => Ok(Self::Vis),
            "graphml" => Ok(Self::Graphml),
            "mermaid" => Ok(Self::Mermaid),
            _ => Err(MedlitError::InvalidArgument(
                "format must be one of: cytoscape, g6, d3, vis, graphml, mermaid".into(),
            )),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct TreeNode {
    pub id: String,
    pub title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub year: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub journal: Option<String>,
    pub level: usize,
    /// root | citing | reference
    pub role: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct TreeEdge {
    pub from: String,
    pub to: String,
    /// cites | cited_by
    pub kind: String,
}

#[derive(Debug, Serialize)]
pub struct CitationTree {
    pub seed: String,
    pub direction: TreeDirection,
    pub depth: usize,
    pub nodes: Vec<TreeNode>,
    pub edges: Vec<TreeEdge>,
}

fn make_node(article: &UnifiedArticle, level: usize, role: &str) -> TreeNode {
    TreeNode {
        id: article.id.clone(),
        title: article.title.clone(),
        year: article.year,
        journal: article.journal.clone(),
        level,
        role: role.to_string(),
    }
}

async fn citing_of(
    dispatcher: &Dispatcher,
    id: &str,
    limit: usize,
) -> Vec<UnifiedArticle> {
    for source in [Source::Pubmed, Source::EuropePmc] {
        if let Some(adapter) = dispatcher.adapter(source)
            && let Some(capability) = adapter.citing()
        {
            match capability.citing(id, limit).await {
                Ok(list) if !list.is_empty() => return list,
                _ => continue,
            }
        }
    }
    Vec::new()
}

async fn references_of(
    dispatcher: &Dispatcher,
    id: &str,
    limit: usize,
) -> Vec<UnifiedArticle> {
    for source in [Source::Pubmed, Source::EuropePmc] {
        if let Some(adapter) = dispatcher.adapter(source)
            && let Some(capability) = adapter.references()
        {
            match capability.references(id, limit).await {
                Ok(list) if !list.is_empty() => return list,
                _ => continue,
            }
        }
    }
    Vec::new()
}

/// BFS outward from the seed, one frontier per depth level. Already-seen
/// records contribute edges but are not re-expanded.
pub async fn build(
    dispatcher: &Dispatcher,
    seed_id: &str,
    depth: usize,
    direction: TreeDirection,
    branch_limit: usize,
) -> Result<CitationTree, MedlitError> {
    let depth = depth.clamp(1, MAX_DEPTH);
    let branch_limit = branch_limit.clamp(1, 25);

    let mut seed: Option<UnifiedArticle> = None;
    for source in [Source::Pubmed, Source::EuropePmc] {
        if let Some(adapter) = dispatcher.adapter(source)
            && let Some(article) = adapter.fetch(seed_id).await?
        {
            seed = Some(article);
            break;
        }
    }
    let seed = seed.ok_or_else(|| MedlitError::NotFound {
        entity: "article".into(),
        id: seed_id.to_string(),
        suggestion: format!("Try searching: medlit search \"{seed_id}\""),
    })?;

    let mut nodes = vec![make_node(&seed, 0, "root")];
    let mut edges: Vec<TreeEdge> = Vec::new();
    let mut seen: HashSet<String> = HashSet::new();
    seen.insert(seed.id.clone());

    let mut frontier: Vec<String> = vec![seed.id.clone()];
    for level in 1..=depth {
        let mut next_frontier: Vec<String> = Vec::new();
        for node_id in &frontier {
            if matches!(direction, TreeDirection::Citing | TreeDirection::Both) {
                for article in citing_of(dispatcher, node_id, branch_limit).await {
                    edges.push(TreeEdge {
                        from: article.id.clone(),
                        to: node_id.clone(),
                        kind: "cites".into(),
                    });
                    if seen.insert(article.id.clone()) {
                        next_frontier.push(article.id.clone());
                        nodes.push(make_node(&article, level, "citing"));
                    }
                }
            }
            if matches!(direction, TreeDirection::References | TreeDirection::Both) {
                for article in references_of(dispatcher, node_id, branch_limit).await {
                    edges.push(TreeEdge {
                        from: node_id.clone(),
                        to: article.id.clone(),
                        kind: "cited_by".into(),
                    });
                    if seen.insert(article.id.clone()) {
                        next_frontier.push(article.id.clone());
                        nodes.push(make_node(&article, level, "reference"));
                    }
                }
            }
        }
        frontier = next_frontier;
        if frontier.is_empty() {
            break;
        }
    }

    Ok(CitationTree {
        seed: seed.id,
        direction,
        depth,
        nodes,
        edges,
    })
}

pub fn render(tree: &CitationTree, format: GraphFormat) -> serde_json::Value {
    match format {
        GraphFormat::Cytoscape => to_cytoscape(tree),
        GraphFormat::G6 => to_g6(tree),
        GraphFormat::D3 => to_d3(tree),
        GraphFormat::Vis => to_vis(tree),
        GraphFormat::Graphml => json!({ "graphml": to_graphml(tree) }),
        GraphFormat::Mermaid => json!({ "mermaid": to_mermaid(tree) }),
    }
}

fn node_label(node: &TreeNode) -> String {
    let title: String = node.title.chars().take(50).collect();
    match node.year {
        Some(year) => format!("{title} ({year})"),
        None => title,
    }
}

fn to_cytoscape(tree: &CitationTree) -> serde_json::Value {
    json!({
        "nodes": tree.nodes.iter().map(|n| json!({
            "data": {
                "id": n.id,
                "label": node_label(n),
                "level": n.level,
                "role": n.role,
                "journal": n.journal,
            }
        })).collect::<Vec<_>>(),
        "edges": tree.edges.iter().map(|e| json!({
            "data": { "source": e.from, "target": e.to, "kind": e.kind }
        })).collect::<Vec<_>>(),
    })
}

fn to_g6(tree: &CitationTree) -> serde_json::Value {
    json!({
        "nodes": tree.nodes.iter().map(|n| json!({
            "id": n.id,
            "label": node_label(n),
            "level": n.level,
            "role": n.role,
        })).collect::<Vec<_>>(),
        "edges": tree.edges.iter().map(|e| json!({
            "source": e.from, "target": e.to, "label": e.kind
        })).collect::<Vec<_>>(),
    })
}

fn to_d3(tree: &CitationTree) -> serde_json::Value {
    json!({
        "nodes": tree.nodes.iter().map(|n| json!({
            "id": n.id,
            "title": n.title,
            "year": n.year,
            "group": n.level,
            "role": n.role,
        })).collect::<Vec<_>>(),
        "links": tree.edges.iter().map(|e| json!({
            "source": e.from, "target": e.to, "kind": e.kind
        })).collect::<Vec<_>>(),
    })
}

fn to_vis(tree: &CitationTree) -> serde_json::Value {
    json!({
        "nodes": tree.nodes.iter().map(|n| json!({
            "id": n.id,
            "label": node_label(n),
            "title": n.title,
            "group": n.role,
        })).collect::<Vec<_>>(),
        "edges": tree.edges.iter().map(|e| json!({
            "from": e.from, "to": e.to, "arrows": "to"
        })).collect::<Vec<_>>(),
    })
}

fn xml_escape(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

fn to_graphml(tree: &CitationTree) -> String {
    let mut out = String::from(
        "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n\
         <graphml xmlns=\"http://graphml.graphdrawing.org/xmlns\">\n\
         <key id=\"title\" for=\"node\" attr.name=\"title\" attr.type=\"string\"/>\n\
         <key id=\"year\" for=\"node\" attr.name=\"year\" attr.type=\"int\"/>\n\
         <graph edgedefault=\"directed\">\n",
    );
    for node in &tree.nodes {
        out.push_str(&format!(
            "  <node id=\"{}\"><data key=\"title\">{}</data>",
            xml_escape(&node.id),
            xml_escape(&node.title)
        ));
        if let Some(year) = node.year {
            out.push_str(&format!("<data key=\"year\">{year}</data>"));
        }
        out.push_str("</node>\n");
    }
    for edge in &tree.edges {
        out.push_str(&format!(
            "  <edge source=\"{}\" target=\"{}\"/>\n",
            xml_escape(&edge.from),
            xml_escape(&edge.to)
        ));
    }
    out.push_str("</graph>\n</graphml>\n");
    out
}

fn mermaid_id(id: &str) -> String {
    id.chars()
        .map(|c| if c.is_alphanumeric() { c } else { '_' })
        .collect()
}

fn to_mermaid(tree: &CitationTree) -> String {
    let mut out = String::from("graph TD\n");
    for node in &tree.nodes {
        let label = node_label(node).replace('"', "'");
        out.push_str(&format!("  {}[\"{}\"]\n", mermaid_id(&node.id), label));
    }
    for edge in &tree.edges {
        out.push_str(&format!(
            "  {} -->|{}| {}\n",
            mermaid_id(&edge.from),
            edge.kind,
            mermaid_id(&edge.to)
        ));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_tree() -> CitationTree {
        let mut root = UnifiedArticle::new("12345678", "Root article", Source::Pubmed);
        root.year = Some(2020);
        let mut citing = UnifiedArticle::new("87654321", "Citing paper", Source::Pubmed);
        citing.year = Some(2022);
        let reference = UnifiedArticle::new("10.1/ref", "Reference paper", Source::EuropePmc);
        citing.journal = Some("Critical Care".into());

        CitationTree {
            seed: "12345678".into(),
            direction: TreeDirection::Both,
            depth: 1,
            nodes: vec![
                make_node(&root, 0, "root"),
                make_node(&citing, 1, "citing"),
                make_node(&reference, 1, "reference"),
            ],
            edges: vec![
                TreeEdge {
                    from: "87654321".into(),
                    to: "12345678".into(),
                    kind: "cites".into(),
                },
                TreeEdge {
                    from: "12345678".into(),
                    to: "10.1/ref".into(),
                    kind: "cited_by".into(),
                },
            ],
        }
    }

    #[test]
    fn format_flags_parse() {
        assert_eq!(GraphFormat::from_flag("cytoscape").unwrap(), GraphFormat::Cytoscape);
        assert_eq!(GraphFormat::from_flag("MERMAID").unwrap(), GraphFormat::Mermaid);
        assert!(GraphFormat::from_flag("dot").is_err());
        assert_eq!(TreeDirection::from_flag("forward").unwrap(), TreeDirection::Citing);
        assert!(TreeDirection::from_flag("sideways").is_err());
    }

    #[test]
    fn cytoscape_wraps_nodes_in_data_envelopes() {
        let graph = to_cytoscape(&sample_tree());
        assert_eq!(graph["nodes"].as_array().unwrap().len(), 3);
        assert_eq!(graph["nodes"][0]["data"]["id"], "12345678");
        assert_eq!(graph["edges"][0]["data"]["source"], "87654321");
    }

    #[test]
    fn d3_uses_links_and_vis_uses_from_to() {
        let tree = sample_tree();
        let d3 = to_d3(&tree);
        assert!(d3.get("links").is_some());
        let vis = to_vis(&tree);
        assert_eq!(vis["edges"][0]["from"], "87654321");
        assert_eq!(vis["edges"][0]["arrows"], "to");
    }

    #[test]
    fn graphml_is_well_formed_enough() {
        let xml = to_graphml(&sample_tree());
        assert!(xml.starts_with("<?xml"));
        assert_eq!(xml.matches("<node ").count(), 3);
        assert_eq!(xml.matches("<edge ").count(), 2);
        assert!(xml.contains("</graphml>"));
    }

    #[test]
    fn mermaid_sanitizes_non_alphanumeric_ids() {
        let text = to_mermaid(&sample_tree());
        assert!(text.starts_with("graph TD"));
        assert!(text.contains("10_1_ref"));
        assert!(text.contains("-->|cites|"));
    }

    #[test]
    fn labels_truncate_long_titles_and_append_year() {
        let mut article = UnifiedArticle::new("1", "T".repeat(120), Source::Pubmed);
        article.year = Some(2021);
        let node = make_node(&article, 0, "root");
        let label = node_label(&node);
        assert!(label.len() < 70);
        assert!(label.ends_with("(2021)"));
    }
}
