//! Research timeline construction: filter aggregated articles to those
//! with a detected milestone, order chronologically, and segment into
//! periods.

use std::collections::BTreeMap;

use crate::entities::article::UnifiedArticle;
use crate::entities::timeline::{
    MilestoneType, ResearchTimeline, TimelineEvent, TimelinePeriod,
};
use crate::unified::aggregator::article_type_weight;

use super::milestones;

/// Spans longer than this use widening (logarithmic) early bins instead
/// of uniform decades.
const DECADE_SPAN_LIMIT: i32 = 60;

pub fn build(topic: &str, articles: &[UnifiedArticle]) -> ResearchTimeline {
    let mut events: Vec<TimelineEvent> = articles
        .iter()
        .filter_map(|article| {
            let year = article.year?;
            let milestone = milestones::detect(article)?;
            Some(TimelineEvent {
                id: article.id.clone(),
                year,
                title: article.title.clone(),
                milestone_type: milestone.milestone_type,
                milestone_label: milestone.milestone_type.label().to_string(),
                citation_count: article.citation_count(),
                evidence_level: article_type_weight(article),
            })
        })
        .collect();
    events.sort_by(|a, b| a.year.cmp(&b.year).then_with(|| a.id.cmp(&b.id)));

    let year_range = match (events.first(), events.last()) {
        (Some(first), Some(last)) => Some((first.year, last.year)),
        _ => None,
    };

    let mut milestone_histogram: BTreeMap<MilestoneType, usize> = BTreeMap::new();
    for event in &events {
        *milestone_histogram.entry(event.milestone_type).or_insert(0) += 1;
    }

    ResearchTimeline {
        topic: topic.to_string(),
        periods: build_periods(&events, year_range),
        events,
        year_range,
        milestone_histogram,
        total_searched: articles.len(),
    }
}

fn period(label: String, start: i32, end: i32, events: &[TimelineEvent]) -> TimelinePeriod {
    TimelinePeriod {
        label,
        start,
        end,
        count: events
            .iter()
            .filter(|e| e.year >= start && e.year <= end)
            .count(),
    }
}

fn build_periods(events: &[TimelineEvent], year_range: Option<(i32, i32)>) -> Vec<TimelinePeriod> {
    let Some((first, last)) = year_range else {
        return Vec::new();
    };
    let mut periods = Vec::new();
    if last - first <= DECADE_SPAN_LIMIT {
        let mut start = (first / 10) * 10;
        while start <= last {
            let end = start + 9;
            let p = period(format!("{start}s"), start, end, events);
            if p.count > 0 {
                periods.push(p);
            }
            start += 10;
        }
    } else {
        // Early history in widening bins, the recent past by decade.
        let recent_cutoff = ((last - 20) / 10) * 10;
        let mut bounds = vec![first];
        let mut width = ((recent_cutoff - first) / 4).max(10);
        let mut cursor = first;
        while cursor + width < recent_cutoff {
            cursor += width;
            bounds.push(cursor);
            width = (width * 2).min(recent_cutoff - cursor);
            if width == 0 {
                break;
            }
        }
        bounds.push(recent_cutoff);
        for pair in bounds.windows(2) {
            let p = period(format!("{}-{}", pair[0], pair[1] - 1), pair[0], pair[1] - 1, events);
            if p.count > 0 {
                periods.push(p);
            }
        }
        let mut start = recent_cutoff;
        while start <= last {
            let p = period(format!("{start}s"), start, start + 9, events);
            if p.count > 0 {
                periods.push(p);
            }
            start += 10;
        }
    }
    periods
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::article::Source;

    fn milestone_article(id: &str, year: i32, title: &str) -> UnifiedArticle {
        let mut a = UnifiedArticle::new(id, title, Source::Pubmed);
        a.year = Some(year);
        a
    }

    fn sample() -> Vec<UnifiedArticle> {
        vec![
            milestone_article("3", 2015, "A phase III trial of drug X"),
            milestone_article("1", 1998, "First report of drug X in humans"),
            milestone_article("2", 2005, "Mechanism of action of drug X"),
            milestone_article("4", 2020, "Meta-analysis of drug X trials"),
            milestone_article("5", 2021, "Unremarkable observational note"),
        ]
    }

    #[test]
    fn events_are_chronological_and_filtered_to_milestones() {
        let timeline = build("drug x", &sample());
        assert_eq!(timeline.events.len(), 4);
        let years: Vec<i32> = timeline.events.iter().map(|e| e.year).collect();
        assert_eq!(years, vec![1998, 2005, 2015, 2020]);
        assert_eq!(timeline.year_range, Some((1998, 2020)));
        assert_eq!(timeline.total_searched, 5);
    }

    #[test]
    fn histogram_counts_milestone_types() {
        let timeline = build("drug x", &sample());
        assert_eq!(timeline.milestone_histogram[&MilestoneType::FirstReport], 1);
        assert_eq!(timeline.milestone_histogram[&MilestoneType::Phase3], 1);
    }

    #[test]
    fn decade_periods_cover_the_span() {
        let timeline = build("drug x", &sample());
        assert!(!timeline.periods.is_empty());
        let total: usize = timeline.periods.iter().map(|p| p.count).sum();
        assert_eq!(total, timeline.events.len());
        assert_eq!(timeline.periods[0].label, "1990s");
    }

    #[test]
    fn long_spans_use_widening_early_bins() {
        let mut articles = vec![
            milestone_article("a", 1900, "First report of compound Y"),
            milestone_article("b", 1950, "Mechanism of action of compound Y"),
        ];
        for (i, year) in (2015..2024).enumerate() {
            articles.push(milestone_article(
                &format!("r{i}"),
                year,
                "Systematic review of compound Y",
            ));
        }
        let timeline = build("compound y", &articles);
        let early = &timeline.periods[0];
        let late = timeline.periods.last().unwrap();
        assert!(early.end - early.start >= 9);
        assert!(late.end - late.start == 9);
    }

    #[test]
    fn empty_input_is_an_empty_timeline() {
        let timeline = build("nothing", &[]);
        assert!(timeline.events.is_empty());
        assert!(timeline.year_range.is_none());
        assert!(timeline.periods.is_empty());
    }

    #[test]
    fn same_year_events_tie_break_on_id() {
        let articles = vec![
            milestone_article("b", 2020, "Meta-analysis of sedation"),
            milestone_article("a", 2020, "Systematic review of sedation"),
        ];
        let timeline = build("sedation", &articles);
        assert_eq!(timeline.events[0].id, "a");
    }
}
