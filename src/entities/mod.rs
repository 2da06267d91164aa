pub mod article;
pub mod pipeline;
pub mod query;
pub mod timeline;

use serde::{Deserialize, Serialize};

/// One page of search hits from a provider, with the upstream total when
/// the provider reports one.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchHits {
    pub articles: Vec<article::UnifiedArticle>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total: Option<u64>,
}

impl SearchHits {
    pub fn empty() -> Self {
        Self {
            articles: Vec::new(),
            total: None,
        }
    }

    pub fn new(articles: Vec<article::UnifiedArticle>, total: Option<u64>) -> Self {
        Self { articles, total }
    }
}
