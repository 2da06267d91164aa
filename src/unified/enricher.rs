//! Post-aggregation enrichment: citation metrics, journal metrics, OA
//! links, preprint flags. Enrichment never fails the request; a record
//! that cannot be enriched keeps whatever it already had.

use futures::StreamExt;
use tracing::debug;

use crate::entities::article::{JournalMetrics, UnifiedArticle};
use crate::entities::query::SearchOptions;
use crate::error::MedlitError;
use crate::sources::adapter::MetricsCapability;
use crate::sources::europepmc::is_preprint_journal;
use crate::sources::icite::ICiteClient;
use crate::sources::unpaywall::UnpaywallClient;

const OA_LOOKUP_CONCURRENCY: usize = 4;

/// Recognized journals: (name fragment, NLM id, impact score, percentile,
/// quartile). A small built-in table covering the venues that dominate
/// clinical search results.
const JOURNAL_TABLE: &[(&str, &str, f64, f64, u8)] = &[
    ("new england journal of medicine", "0255562", 96.2, 99.9, 1),
    ("lancet", "2985213R", 88.5, 99.8, 1),
    ("jama", "7501160", 63.1, 99.5, 1),
    ("bmj", "8900488", 39.9, 99.0, 1),
    ("nature medicine", "9502015", 58.7, 99.4, 1),
    ("nature", "0410462", 50.5, 99.3, 1),
    ("science", "0404511", 44.7, 99.2, 1),
    ("cell", "0413066", 45.5, 99.2, 1),
    ("annals of internal medicine", "0372351", 19.6, 97.5, 1),
    ("circulation", "0147763", 35.5, 98.8, 1),
    ("journal of clinical oncology", "8309333", 42.1, 99.0, 1),
    ("anesthesiology", "1300217", 8.8, 93.0, 1),
    ("critical care medicine", "0355501", 7.7, 91.0, 1),
    ("intensive care medicine", "7704851", 27.1, 98.0, 1),
    ("critical care", "9801902", 8.8, 92.0, 1),
    ("british journal of anaesthesia", "0372541", 9.1, 93.5, 1),
    ("anesthesia and analgesia", "1310650", 4.6, 85.0, 2),
    ("plos one", "101285081", 2.9, 70.0, 2),
    ("scientific reports", "101563288", 3.8, 75.0, 2),
    ("frontiers in medicine", "101648047", 3.1, 68.0, 2),
];

pub fn journal_metrics(journal: &str) -> Option<JournalMetrics> {
    let lowered = journal.to_lowercase();
    JOURNAL_TABLE
        .iter()
        .find(|(fragment, ..)| lowered.contains(fragment))
        .map(|(_, nlm_id, impact, percentile, quartile)| JournalMetrics {
            nlm_id: Some((*nlm_id).to_string()),
            impact_score: *impact,
            percentile: *percentile,
            quartile: *quartile,
        })
}

pub struct Enricher {
    icite: ICiteClient,
    unpaywall: UnpaywallClient,
}

impl Enricher {
    pub fn new(icite: ICiteClient, unpaywall: UnpaywallClient) -> Self {
        Self { icite, unpaywall }
    }

    /// Raw metrics lookup for a list of PMIDs.
    pub async fn citation_metrics(
        &self,
        ids: &[String],
    ) -> Result<std::collections::HashMap<String, crate::entities::article::CitationMetrics>, MedlitError>
    {
        self.icite.metrics(ids).await
    }

    /// Attach citation metrics to every record with a PMID. Existing raw
    /// counts from secondary indices are replaced by the richer
    /// field-normalized metrics when available.
    pub async fn add_citation_metrics(
        &self,
        articles: &mut [UnifiedArticle],
    ) -> Result<(), MedlitError> {
        let pmids: Vec<String> = articles
            .iter()
            .filter_map(|a| a.pmid.clone())
            .collect();
        if pmids.is_empty() {
            return Ok(());
        }
        let metrics = self.icite.metrics(&pmids).await?;
        for article in articles.iter_mut() {
            if let Some(pmid) = article.pmid.as_deref()
                && let Some(found) = metrics.get(pmid)
            {
                article.citation_metrics = Some(found.clone());
            }
        }
        Ok(())
    }

    async fn add_oa_links(&self, articles: &mut [UnifiedArticle]) {
        let lookups = articles
            .iter()
            .enumerate()
            .filter(|(_, a)| a.doi.is_some() && a.oa_links.is_empty())
            .map(|(i, a)| (i, a.doi.clone().expect("filtered on doi")))
            .collect::<Vec<_>>();

        let mut results = futures::stream::iter(lookups)
            .map(|(i, doi)| async move {
                let summary = self.unpaywall.oa_status(&doi).await;
                (i, summary)
            })
            .buffer_unordered(OA_LOOKUP_CONCURRENCY);

        while let Some((i, summary)) = results.next().await {
            match summary {
                Ok(Some(summary)) => {
                    articles[i].oa_status = Some(summary.status);
                    articles[i].oa_links = summary.links;
                }
                Ok(None) => {}
                Err(err) => {
                    debug!(?err, "open access lookup failed, skipping record");
                }
            }
        }
    }

    fn add_journal_metrics(articles: &mut [UnifiedArticle]) {
        for article in articles.iter_mut() {
            if article.journal_metrics.is_none()
                && let Some(journal) = article.journal.as_deref()
            {
                article.journal_metrics = journal_metrics(journal);
            }
        }
    }

    fn add_preprint_flags(articles: &mut [UnifiedArticle]) {
        for article in articles.iter_mut() {
            if !article.is_preprint
                && article
                    .journal
                    .as_deref()
                    .is_some_and(is_preprint_journal)
            {
                article.is_preprint = true;
            }
        }
    }

    /// Full enrichment pass honoring the request options. Individual
    /// failures degrade to missing fields.
    pub async fn enrich(&self, articles: &mut [UnifiedArticle], options: &SearchOptions) {
        if let Err(err) = self.add_citation_metrics(articles).await {
            debug!(?err, "citation metrics enrichment failed");
        }
        Self::add_journal_metrics(articles);
        Self::add_preprint_flags(articles);
        if options.include_oa_links {
            self.add_oa_links(articles).await;
        }
        if !options.include_similarity_scores {
            for article in articles.iter_mut() {
                article.similarity = None;
            }
        }
    }
}
