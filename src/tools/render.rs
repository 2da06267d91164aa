//! Markdown rendering for tool responses. The `**Sources**` line format,
//! `provider (N_returned/N_total)` with the total omitted when unknown, is
//! a hard contract relied on by downstream consumers.

use crate::entities::article::{OaStatus, UnifiedArticle};
use crate::entities::timeline::{ResearchBranch, ResearchTimeline, ResearchTree};
use crate::unified::UnifiedSearchResponse;
use crate::unified::dispatcher::SourceOutcome;

const ABSTRACT_EXCERPT_CHARS: usize = 300;
const AUTHORS_SHOWN: usize = 3;

fn excerpt(text: &str, max_chars: usize) -> String {
    let trimmed = text.trim();
    if trimmed.chars().count() <= max_chars {
        return trimmed.to_string();
    }
    let mut cut: String = trimmed.chars().take(max_chars).collect();
    if let Some(last_space) = cut.rfind(' ') {
        cut.truncate(last_space);
    }
    cut.push('…');
    cut
}

fn author_line(article: &UnifiedArticle) -> Option<String> {
    if article.authors.is_empty() {
        return None;
    }
    let names: Vec<&str> = article
        .authors
        .iter()
        .take(AUTHORS_SHOWN)
        .map(|a| a.name.as_str())
        .collect();
    let mut line = names.join(", ");
    if article.authors.len() > AUTHORS_SHOWN {
        line.push_str(" et al.");
    }
    Some(line)
}

fn badges(article: &UnifiedArticle) -> String {
    let mut out = String::new();
    if let Some(status) = article.oa_status {
        let label = match status {
            OaStatus::Gold => "OA: gold",
            OaStatus::Green => "OA: green",
            OaStatus::Hybrid => "OA: hybrid",
            OaStatus::Bronze => "OA: bronze",
            OaStatus::Closed => "closed access",
        };
        out.push_str(&format!(" `[{label}]`"));
    }
    if article.is_preprint {
        out.push_str(" `[preprint]`");
    }
    if article.is_retracted {
        out.push_str(" `[RETRACTED]`");
    }
    out
}

/// One numbered article block.
pub fn article_block(index: usize, article: &UnifiedArticle, show_scores: bool) -> String {
    let mut out = format!("{index}. **{}**{}\n", article.title, badges(article));
    if let Some(authors) = author_line(article) {
        out.push_str(&format!("   {authors}\n"));
    }
    let mut meta_line = String::new();
    if let Some(journal) = article.journal.as_deref() {
        meta_line.push_str(journal);
    }
    if let Some(year) = article.year {
        if !meta_line.is_empty() {
            meta_line.push(' ');
        }
        meta_line.push_str(&year.to_string());
    }
    if let Some(count) = article.citation_count() {
        meta_line.push_str(&format!(" ({count} citations)"));
    }
    if !meta_line.is_empty() {
        out.push_str(&format!("   {meta_line}\n"));
    }
    match article.deep_link() {
        Some(link) => out.push_str(&format!("   [{}]({link})\n", article.id)),
        None => out.push_str(&format!("   {}\n", article.id)),
    }
    if let Some(abstract_text) = article.abstract_text.as_deref() {
        out.push_str(&format!(
            "   {}\n",
            excerpt(abstract_text, ABSTRACT_EXCERPT_CHARS)
        ));
    }
    if show_scores && let Some(similarity) = article.similarity {
        out.push_str(&format!("   score: {similarity:.3}\n"));
    }
    out
}

/// The `**Sources**` line: `provider (returned/total)` when the upstream
/// total is known, `provider (returned)` otherwise.
pub fn sources_line(outcomes: &[SourceOutcome]) -> String {
    let parts: Vec<String> = outcomes
        .iter()
        .filter(|o| o.error.is_none())
        .map(|o| match o.total {
            Some(total) => format!("{} ({}/{})", o.source, o.returned, total),
            None => format!("{} ({})", o.source, o.returned),
        })
        .collect();
    format!("**Sources**: {}", parts.join(", "))
}

fn degraded_section(response: &UnifiedSearchResponse) -> String {
    let mut out = String::from("\n## Degraded results\n\n");
    for outcome in response.outcomes.iter().filter(|o| o.error.is_some()) {
        out.push_str(&format!(
            "- {} failed after {}ms: {}\n",
            outcome.source,
            outcome.elapsed_ms,
            outcome.error.as_deref().unwrap_or("unknown error")
        ));
    }
    if !response.relaxation.is_empty() {
        out.push_str("\nRelaxation attempts:\n");
        for step in &response.relaxation {
            out.push_str(&format!(
                "- {}: `{}` -> {} results\n",
                step.label, step.query, step.result_count
            ));
        }
    }
    out
}

pub fn search_response(response: &UnifiedSearchResponse, show_scores: bool) -> String {
    let mut out = String::new();
    out.push_str(&format!(
        "# Search results for \"{}\"\n\n",
        response.analysis.original
    ));

    if response.articles.is_empty() {
        out.push_str("No results found.\n");
    }
    for (i, article) in response.articles.iter().enumerate() {
        out.push_str(&article_block(i + 1, article, show_scores));
        out.push('\n');
    }

    out.push_str(&sources_line(&response.outcomes));
    out.push('\n');
    out.push_str(&format!(
        "\n{} unique articles from {} raw results ({} duplicates merged)\n",
        response.stats.unique_articles,
        response.stats.total_input,
        response.stats.duplicates_removed
    ));

    if response.relaxed {
        out.push_str("\nNote: results come from a relaxed version of the query.\n");
    }
    if response.degraded || !response.relaxation.is_empty() {
        out.push_str(&degraded_section(response));
    }
    out
}

pub fn analysis_section(response: &UnifiedSearchResponse) -> String {
    let analysis = &response.analysis;
    let mut out = String::from("## Query analysis\n\n");
    out.push_str(&format!(
        "- complexity: {:?}\n- intent: {:?}\n- ranking profile: {}\n- providers: {}\n",
        analysis.complexity,
        analysis.intent,
        analysis.ranking.as_str(),
        analysis
            .sources
            .iter()
            .map(|s| s.as_str())
            .collect::<Vec<_>>()
            .join(", ")
    ));
    if !analysis.entities.is_empty() {
        out.push_str("- entities: ");
        let entities: Vec<String> = analysis
            .entities
            .iter()
            .map(|e| format!("{} ({})", e.name, e.entity_type.as_str()))
            .collect();
        out.push_str(&entities.join(", "));
        out.push('\n');
    }
    if analysis.image_search_recommended {
        out.push_str("- an image-oriented search tool may serve this query better\n");
    }
    out
}

fn branch_lines(branch: &ResearchBranch, indent: usize, out: &mut String) {
    let pad = "  ".repeat(indent);
    let icon = branch.icon.as_deref().unwrap_or("");
    out.push_str(&format!(
        "{pad}- {icon} **{}** ({} events)\n",
        branch.label,
        branch.events.len()
    ));
    for event in &branch.events {
        out.push_str(&format!(
            "{pad}  - {}: {} ({})\n",
            event.year, event.title, event.milestone_label
        ));
    }
    for sub in &branch.sub_branches {
        branch_lines(sub, indent + 1, out);
    }
}

pub fn timeline_markdown(timeline: &ResearchTimeline, tree: Option<&ResearchTree>) -> String {
    let mut out = format!("# Research timeline: {}\n\n", timeline.topic);
    match timeline.year_range {
        Some((first, last)) => out.push_str(&format!(
            "{} milestone events from {first} to {last} (from {} articles)\n\n",
            timeline.events.len(),
            timeline.total_searched
        )),
        None => out.push_str("No milestone events detected.\n"),
    }
    for period in &timeline.periods {
        out.push_str(&format!("## {} ({} events)\n\n", period.label, period.count));
        for event in timeline
            .events
            .iter()
            .filter(|e| e.year >= period.start && e.year <= period.end)
        {
            out.push_str(&format!(
                "- **{}** {}: {}\n",
                event.year, event.milestone_label, event.title
            ));
        }
        out.push('\n');
    }
    if let Some(tree) = tree {
        out.push_str("## Research branches\n\n");
        for branch in &tree.branches {
            branch_lines(branch, 0, &mut out);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::article::Source;

    fn outcome(source: Source, returned: usize, total: Option<u64>) -> SourceOutcome {
        SourceOutcome {
            source,
            returned,
            total,
            error: None,
            elapsed_ms: 5,
        }
    }

    #[test]
    fn sources_line_formats_with_and_without_totals() {
        let line = sources_line(&[
            outcome(Source::Pubmed, 1, Some(1)),
            outcome(Source::EuropePmc, 5, None),
        ]);
        assert_eq!(line, "**Sources**: pubmed (1/1), europepmc (5)");
    }

    #[test]
    fn sources_line_skips_failed_providers() {
        let mut failed = outcome(Source::Crossref, 0, None);
        failed.error = Some("timeout".into());
        let line = sources_line(&[outcome(Source::Pubmed, 3, Some(40)), failed]);
        assert_eq!(line, "**Sources**: pubmed (3/40)");
    }

    #[test]
    fn article_block_shows_authors_et_al_and_badges() {
        let mut article = UnifiedArticle::new("12345", "Sedation outcomes", Source::Pubmed);
        article.pmid = Some("12345".into());
        article.journal = Some("Critical Care".into());
        article.year = Some(2023);
        for (i, name) in ["Smith J", "Doe A", "Brown K", "Fourth D"].iter().enumerate() {
            article
                .authors
                .push(crate::entities::article::Author::new(i as u32 + 1, *name));
        }
        article.oa_status = Some(OaStatus::Gold);
        article.is_preprint = true;
        article.similarity = Some(0.912);

        let block = article_block(1, &article, true);
        assert!(block.starts_with("1. **Sedation outcomes**"));
        assert!(block.contains("Smith J, Doe A, Brown K et al."));
        assert!(!block.contains("Fourth D"));
        assert!(block.contains("`[OA: gold]`"));
        assert!(block.contains("`[preprint]`"));
        assert!(block.contains("https://pubmed.ncbi.nlm.nih.gov/12345/"));
        assert!(block.contains("score: 0.912"));
    }

    #[test]
    fn abstract_excerpt_cuts_at_word_boundary() {
        let text = "word ".repeat(200);
        let cut = excerpt(&text, 50);
        assert!(cut.chars().count() <= 51);
        assert!(cut.ends_with('…'));
        assert!(!cut.contains("word wor…"));
    }

    #[test]
    fn scores_hidden_when_disabled() {
        let mut article = UnifiedArticle::new("1", "Title", Source::Pubmed);
        article.similarity = Some(0.5);
        let block = article_block(1, &article, false);
        assert!(!block.contains("score:"));
    }
}
