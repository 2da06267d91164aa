use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

/// External providers that can contribute records. One key per upstream
/// service; rate limiters and circuit breakers are scoped by this key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Source {
    Pubmed,
    EuropePmc,
    Crossref,
    OpenAlex,
    SemanticScholar,
    Biorxiv,
    ClinicalTrials,
    Icite,
    Unpaywall,
    Pubtator,
}

impl Source {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pubmed => "pubmed",
            Self::EuropePmc => "europepmc",
            Self::Crossref => "crossref",
            Self::OpenAlex => "openalex",
            Self::SemanticScholar => "semanticscholar",
            Self::Biorxiv => "biorxiv",
            Self::ClinicalTrials => "clinicaltrials",
            Self::Icite => "icite",
            Self::Unpaywall => "unpaywall",
            Self::Pubtator => "pubtator",
        }
    }

    pub fn from_key(key: &str) -> Option<Self> {
        match key.trim().to_ascii_lowercase().as_str() {
            "pubmed" => Some(Self::Pubmed),
            "europepmc" => Some(Self::EuropePmc),
            "crossref" => Some(Self::Crossref),
            "openalex" => Some(Self::OpenAlex),
            "semanticscholar" => Some(Self::SemanticScholar),
            "biorxiv" => Some(Self::Biorxiv),
            "clinicaltrials" => Some(Self::ClinicalTrials),
            "icite" => Some(Self::Icite),
            "unpaywall" => Some(Self::Unpaywall),
            "pubtator" => Some(Self::Pubtator),
            _ => None,
        }
    }

    /// Per-provider trust constant used as a ranking dimension and as the
    /// dedup representative tie-break. The primary index ranks highest.
    pub fn trust(self) -> f64 {
        match self {
            Self::Pubmed => 1.0,
            Self::EuropePmc => 0.9,
            Self::ClinicalTrials => 0.85,
            Self::SemanticScholar | Self::OpenAlex => 0.8,
            Self::Crossref => 0.75,
            Self::Biorxiv => 0.6,
            Self::Icite | Self::Unpaywall | Self::Pubtator => 0.5,
        }
    }
}

impl std::fmt::Display for Source {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Author {
    pub position: u32,
    pub name: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub affiliations: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub orcid: Option<String>,
}

impl Author {
    pub fn new(position: u32, name: impl Into<String>) -> Self {
        Self {
            position,
            name: name.into(),
            affiliations: Vec::new(),
            orcid: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OaHostType {
    Repository,
    Publisher,
    Preprint,
    Aggregator,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OaVersion {
    Submitted,
    Accepted,
    Published,
    #[default]
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OpenAccessLink {
    pub url: String,
    pub host_type: OaHostType,
    #[serde(default)]
    pub version: OaVersion,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub license: Option<String>,
    #[serde(default)]
    pub is_pdf: bool,
    #[serde(default)]
    pub is_best: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OaStatus {
    Gold,
    Green,
    Hybrid,
    Bronze,
    Closed,
}

/// NIH iCite style citation metrics. `relative_citation_ratio` is
/// field-normalized: 1.0 is the field median.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CitationMetrics {
    pub citation_count: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub relative_citation_ratio: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub percentile: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub citations_per_year: Option<f64>,
    /// Approximate Potential to Translate: likelihood of clinical uptake.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub translation_potential: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_clinical: Option<bool>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JournalMetrics {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub nlm_id: Option<String>,
    pub impact_score: f64,
    pub percentile: f64,
    /// 1 (top) through 4, H-index-like quartile.
    pub quartile: u8,
}

/// The canonical merged record the aggregator emits. Instances live only
/// within a single request; they are never persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnifiedArticle {
    /// Stable primary external ID (PMID when known, else DOI, else a
    /// provider-specific ID). Never empty.
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pmid: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub doi: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pmcid: Option<String>,
    /// Provider-specific IDs that did not fit the fields above.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub alternate_ids: BTreeMap<Source, String>,
    pub title: String,
    #[serde(default)]
    pub authors: Vec<Author>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub journal: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub year: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub abstract_text: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub mesh_terms: BTreeSet<String>,
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub keywords: BTreeSet<String>,
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub article_types: BTreeSet<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
    pub source: Source,
    /// Providers that contributed to this record after deduplication.
    /// Always contains `source`.
    pub provenance: BTreeSet<Source>,
    /// Raw-minus-normalized payload per contributing provider.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub source_metadata: BTreeMap<Source, serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub citation_metrics: Option<CitationMetrics>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub journal_metrics: Option<JournalMetrics>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub oa_status: Option<OaStatus>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub oa_links: Vec<OpenAccessLink>,
    #[serde(default)]
    pub is_preprint: bool,
    #[serde(default)]
    pub is_retracted: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub similarity: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub landmark: Option<crate::entities::timeline::LandmarkScore>,
}

impl UnifiedArticle {
    pub fn new(id: impl Into<String>, title: impl Into<String>, source: Source) -> Self {
        let mut provenance = BTreeSet::new();
        provenance.insert(source);
        Self {
            id: id.into(),
            pmid: None,
            doi: None,
            pmcid: None,
            alternate_ids: BTreeMap::new(),
            title: title.into(),
            authors: Vec::new(),
            journal: None,
            year: None,
            abstract_text: None,
            mesh_terms: BTreeSet::new(),
            keywords: BTreeSet::new(),
            article_types: BTreeSet::new(),
            language: None,
            source,
            provenance,
            source_metadata: BTreeMap::new(),
            citation_metrics: None,
            journal_metrics: None,
            oa_status: None,
            oa_links: Vec::new(),
            is_preprint: false,
            is_retracted: false,
            similarity: None,
            landmark: None,
        }
    }

    /// All external IDs this record is known by, for STRICT deduplication.
    pub fn external_ids(&self) -> Vec<String> {
        let mut ids = vec![self.id.clone()];
        for value in [&self.pmid, &self.doi, &self.pmcid] {
            if let Some(v) = value
                && !v.is_empty()
            {
                ids.push(v.clone());
            }
        }
        for v in self.alternate_ids.values() {
            if !v.is_empty() {
                ids.push(v.clone());
            }
        }
        ids.sort();
        ids.dedup();
        ids
    }

    /// Count of populated metadata fields. The dedup representative within
    /// an equivalence class is the most complete record.
    pub fn completeness(&self) -> usize {
        let mut n = 0;
        n += usize::from(self.pmid.is_some());
        n += usize::from(self.doi.is_some());
        n += usize::from(self.pmcid.is_some());
        n += usize::from(!self.title.is_empty());
        n += usize::from(!self.authors.is_empty());
        n += usize::from(self.journal.is_some());
        n += usize::from(self.year.is_some());
        n += usize::from(self.abstract_text.is_some());
        n += usize::from(!self.mesh_terms.is_empty());
        n += usize::from(!self.keywords.is_empty());
        n += usize::from(!self.article_types.is_empty());
        n += usize::from(self.language.is_some());
        n += usize::from(self.citation_metrics.is_some());
        n
    }

    /// Fill missing fields from another member of the same dedup class and
    /// take the union of provenance. Never overwrites populated fields.
    pub fn merge_from(&mut self, other: &UnifiedArticle) {
        if self.pmid.is_none() {
            self.pmid = other.pmid.clone();
        }
        if self.doi.is_none() {
            self.doi = other.doi.clone();
        }
        if self.pmcid.is_none() {
            self.pmcid = other.pmcid.clone();
        }
        for (source, id) in &other.alternate_ids {
            self.alternate_ids
                .entry(*source)
                .or_insert_with(|| id.clone());
        }
        if self.authors.is_empty() {
            self.authors = other.authors.clone();
        }
        if self.journal.is_none() {
            self.journal = other.journal.clone();
        }
        if self.year.is_none() {
            self.year = other.year;
        }
        if self.abstract_text.is_none() {
            self.abstract_text = other.abstract_text.clone();
        }
        self.mesh_terms.extend(other.mesh_terms.iter().cloned());
        self.keywords.extend(other.keywords.iter().cloned());
        self.article_types
            .extend(other.article_types.iter().cloned());
        if self.language.is_none() {
            self.language = other.language.clone();
        }
        if self.citation_metrics.is_none() {
            self.citation_metrics = other.citation_metrics.clone();
        }
        if self.oa_status.is_none() {
            self.oa_status = other.oa_status;
        }
        if self.oa_links.is_empty() {
            self.oa_links = other.oa_links.clone();
        }
        self.is_preprint |= other.is_preprint;
        self.is_retracted |= other.is_retracted;
        self.provenance.extend(other.provenance.iter().copied());
        for (source, payload) in &other.source_metadata {
            self.source_metadata
                .entry(*source)
                .or_insert_with(|| payload.clone());
        }
    }

    pub fn citation_count(&self) -> Option<u64> {
        self.citation_metrics.as_ref().map(|m| m.citation_count)
    }

    /// Deep link to the canonical landing page for this record.
    pub fn deep_link(&self) -> Option<String> {
        if let Some(pmid) = self.pmid.as_deref() {
            return Some(format!("https://pubmed.ncbi.nlm.nih.gov/{pmid}/"));
        }
        if let Some(doi) = self.doi.as_deref() {
            return Some(format!("https://doi.org/{doi}"));
        }
        None
    }
}

/// Plausible publication year window. Records outside it get `year = None`.
pub fn clamp_year(year: i32, current_year: i32) -> Option<i32> {
    (1800..=current_year + 2).contains(&year).then_some(year)
}
