//! medlit: a biomedical literature search aggregator. A unified search
//! fans out to PubMed, Europe PMC, Crossref, OpenAlex, Semantic Scholar,
//! preprint servers, and ClinicalTrials.gov, then deduplicates, ranks, and
//! enriches the fused result set. Higher layers add citation trees,
//! research timelines, landmark scoring, and declarative search pipelines.

pub mod analysis;
pub mod cli;
pub mod config;
pub mod entities;
pub mod error;
pub mod pipeline;
pub mod sources;
pub mod tools;
pub mod unified;

/// Current UTC year, used for recency scoring and year sanity bounds.
pub fn current_year() -> i32 {
    time::OffsetDateTime::now_utc().year()
}
