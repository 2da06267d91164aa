//! Top-level CLI parsing and command execution.

use std::sync::Arc;

use clap::{Parser, Subcommand};
use serde_json::json;
use tokio_util::sync::CancellationToken;

use crate::error::MedlitError;
use crate::pipeline::PipelineStore;
use crate::sources::adapter::SourceAdapter;
use crate::sources::fulltext::FulltextFetcher;
use crate::tools::{self, ToolContext};
use crate::unified::dispatcher::Dispatcher;
use crate::unified::enricher::Enricher;
use crate::unified::resolver::EntityResolver;
use crate::unified::UnifiedSearcher;

pub mod health;

#[derive(Parser, Debug)]
#[command(
    name = "medlit",
    about = "Unified biomedical literature search across PubMed, Europe PMC, Crossref, OpenAlex, Semantic Scholar, preprints, and trial registries",
    version
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Output as JSON instead of Markdown
    #[arg(short, long, global = true)]
    pub json: bool,

    /// Disable HTTP caching (always fetch fresh data)
    #[arg(long, global = true)]
    pub no_cache: bool,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Unified multi-source search
    #[command(after_help = "\
EXAMPLES:
  medlit search \"remimazolam vs propofol for ICU sedation\"
  medlit search \"sepsis antibiotics\" --filters \"year:2020-2025, age:aged\" --options \"preprints,no_oa\"")]
    Search {
        /// Query text (free text, PMID, DOI, or NCT ID)
        query: String,
        /// Maximum results (default: 20)
        #[arg(short, long, default_value = "20")]
        limit: usize,
        /// Comma-separated filters (year:Y-Y, age:<group>, sex:<f/m>, species:<..>, lang:<..>, clinical:<..>)
        #[arg(short, long)]
        filters: Option<String>,
        /// Comma-separated option flags (preprints, shallow, all_types, no_oa, no_analysis, no_scores, no_relax)
        #[arg(short, long)]
        options: Option<String>,
    },
    /// Analyze a query without searching
    Analyze {
        query: String,
    },
    /// Articles related to an article ID
    Related {
        id: String,
        #[arg(short, long, default_value = "10")]
        limit: usize,
    },
    /// Articles citing an article ID
    Citing {
        id: String,
        #[arg(short, long, default_value = "10")]
        limit: usize,
    },
    /// Reference list of an article ID
    References {
        id: String,
        #[arg(short, long, default_value = "10")]
        limit: usize,
    },
    /// Citation metrics for comma-separated PMIDs
    Metrics {
        ids: String,
        /// Keep only articles with at least this field-normalized ratio
        #[arg(long)]
        min_rcr: Option<f64>,
        /// Keep only articles with at least this many citations
        #[arg(long)]
        min_citations: Option<u64>,
    },
    /// Citation tree around a seed article
    Tree {
        id: String,
        #[arg(short, long, default_value = "1")]
        depth: usize,
        /// citing, references, or both
        #[arg(long, default_value = "both")]
        direction: String,
        /// cytoscape, g6, d3, vis, graphml, or mermaid
        #[arg(long, default_value = "cytoscape")]
        format: String,
    },
    /// Research timeline and branch tree for a topic
    Timeline {
        topic: String,
        #[arg(short, long)]
        filters: Option<String>,
        #[arg(short, long, default_value = "50")]
        limit: usize,
        /// Skip the branch tree
        #[arg(long)]
        no_tree: bool,
    },
    /// Fulltext/PDF retrieval chain for an article ID
    Fulltext {
        id: String,
    },
    /// Saved pipeline management and execution
    Pipeline {
        #[command(subcommand)]
        cmd: PipelineCommand,
    },
    /// Invoke a registered tool directly with JSON arguments
    Tool {
        #[command(subcommand)]
        cmd: ToolCommand,
    },
    /// Check external provider connectivity
    Health,
    /// Show version
    Version,
}

#[derive(Subcommand, Debug)]
pub enum PipelineCommand {
    /// Run an inline config file or a saved pipeline
    Run {
        /// Saved pipeline name, or a YAML/JSON config path with --file
        name: Option<String>,
        /// Path to a config file to run inline
        #[arg(long)]
        file: Option<String>,
    },
    /// Save a config file under a name
    Save {
        name: String,
        /// Path to a YAML/JSON config file
        file: String,
        /// Save to the global scope instead of the workspace
        #[arg(long)]
        global: bool,
    },
    /// List saved pipelines
    List,
    /// Print a saved pipeline config
    Load {
        name: String,
    },
    /// Delete a saved pipeline
    Delete {
        name: String,
    },
    /// Run history for a saved pipeline
    History {
        name: String,
    },
    /// Describe a built-in template
    Describe {
        name: String,
    },
}

#[derive(Subcommand, Debug)]
pub enum ToolCommand {
    /// List registered tools and their schemas
    List,
    /// Call a tool: medlit tool call unified_search '{"query": "..."}'
    Call {
        name: String,
        /// JSON arguments (default: {})
        args: Option<String>,
    },
}

/// Wire the full adapter set into a tool context. Tests construct their
/// own contexts with fakes instead.
pub fn build_context() -> Result<ToolContext, MedlitError> {
    let adapters: Vec<Arc<dyn SourceAdapter>> = vec![
        Arc::new(crate::sources::pubmed::PubmedClient::new()?),
        Arc::new(crate::sources::europepmc::EuropePmcClient::new()?),
        Arc::new(crate::sources::crossref::CrossrefClient::new()?),
        Arc::new(crate::sources::openalex::OpenAlexClient::new()?),
        Arc::new(crate::sources::semanticscholar::SemanticScholarClient::new()?),
        Arc::new(crate::sources::biorxiv::BiorxivClient::new()?),
        Arc::new(crate::sources::clinicaltrials::ClinicalTrialsClient::new()?),
    ];
    let dispatcher = Dispatcher::new(adapters);
    let resolver = Arc::new(EntityResolver::new(
        crate::sources::pubtator::PubTatorClient::new()?,
    ));
    let enricher = Enricher::new(
        crate::sources::icite::ICiteClient::new()?,
        crate::sources::unpaywall::UnpaywallClient::new()?,
    );
    Ok(ToolContext {
        searcher: Arc::new(UnifiedSearcher::new(resolver, dispatcher, enricher)),
        store: Arc::new(PipelineStore::new()?),
        fulltext: Arc::new(FulltextFetcher::new()?),
    })
}

fn print_payload(payload: &serde_json::Value, as_json: bool) {
    if as_json {
        println!(
            "{}",
            serde_json::to_string_pretty(payload).unwrap_or_else(|_| payload.to_string())
        );
        return;
    }
    match payload.get("markdown").and_then(serde_json::Value::as_str) {
        Some(markdown) => println!("{markdown}"),
        None => println!(
            "{}",
            serde_json::to_string_pretty(payload).unwrap_or_else(|_| payload.to_string())
        ),
    }
}

fn read_config_file(path: &str) -> Result<serde_json::Value, MedlitError> {
    let body = std::fs::read_to_string(path)?;
    if path.ends_with(".json") {
        serde_json::from_str(&body).map_err(|err| {
            MedlitError::InvalidArgument(format!("\"{path}\" is not valid JSON: {err}"))
        })
    } else {
        let config: crate::entities::pipeline::PipelineConfig = serde_yaml::from_str(&body)
            .map_err(|err| {
                MedlitError::InvalidArgument(format!("\"{path}\" is not valid YAML: {err}"))
            })?;
        serde_json::to_value(config).map_err(|source| MedlitError::ApiJson {
            api: "pipeline-config".to_string(),
            source,
        })
    }
}

pub async fn run(cli: Cli, cancel: CancellationToken) -> Result<i32, MedlitError> {
    if cli.no_cache {
        crate::sources::disable_http_cache();
    }
    let as_json = cli.json;

    // Health and version do not need the full context.
    match &cli.command {
        Commands::Health => {
            let report = health::run().await?;
            if as_json {
                println!("{}", serde_json::to_string_pretty(&report).unwrap_or_default());
            } else {
                println!("{}", report.to_markdown());
            }
            return Ok(if report.all_healthy() { 0 } else { 1 });
        }
        Commands::Version => {
            println!("medlit {}", env!("CARGO_PKG_VERSION"));
            return Ok(0);
        }
        _ => {}
    }

    let ctx = build_context()?;
    let (tool, args) = match cli.command {
        Commands::Search {
            query,
            limit,
            filters,
            options,
        } => (
            "unified_search",
            json!({
                "query": query,
                "limit": limit,
                "filters": filters,
                "options": options,
            }),
        ),
        Commands::Analyze { query } => ("analyze_search_query", json!({ "query": query })),
        Commands::Related { id, limit } => {
            ("find_related_articles", json!({ "id": id, "limit": limit }))
        }
        Commands::Citing { id, limit } => {
            ("find_citing_articles", json!({ "id": id, "limit": limit }))
        }
        Commands::References { id, limit } => {
            ("get_article_references", json!({ "id": id, "limit": limit }))
        }
        Commands::Metrics {
            ids,
            min_rcr,
            min_citations,
        } => (
            "get_citation_metrics",
            json!({ "ids": ids, "min_rcr": min_rcr, "min_citations": min_citations }),
        ),
        Commands::Tree {
            id,
            depth,
            direction,
            format,
        } => (
            "build_citation_tree",
            json!({ "id": id, "depth": depth, "direction": direction, "format": format }),
        ),
        Commands::Timeline {
            topic,
            filters,
            limit,
            no_tree,
        } => (
            "build_research_timeline",
            json!({ "topic": topic, "filters": filters, "limit": limit, "tree": !no_tree }),
        ),
        Commands::Fulltext { id } => ("get_fulltext", json!({ "id": id })),
        Commands::Pipeline { cmd } => match cmd {
            PipelineCommand::Run { name, file } => match (name, file) {
                (_, Some(path)) => ("run_pipeline", json!({ "config": read_config_file(&path)? })),
                (Some(name), None) => ("run_pipeline", json!({ "name": name })),
                (None, None) => {
                    return Err(MedlitError::InvalidArgument(
                        "pipeline run needs a saved name or --file. Example: medlit pipeline run my-search"
                            .into(),
                    ));
                }
            },
            PipelineCommand::Save { name, file, global } => {
                let mut config = read_config_file(&file)?;
                if let Some(map) = config.as_object_mut() {
                    map.insert("name".into(), json!(name));
                    map.insert(
                        "scope".into(),
                        json!(if global { "global" } else { "workspace" }),
                    );
                }
                ("save_pipeline", json!({ "config": config }))
            }
            PipelineCommand::List => ("list_pipelines", json!({})),
            PipelineCommand::Load { name } => ("load_pipeline", json!({ "name": name })),
            PipelineCommand::Delete { name } => ("delete_pipeline", json!({ "name": name })),
            PipelineCommand::History { name } => ("get_pipeline_history", json!({ "name": name })),
            PipelineCommand::Describe { name } => ("describe_template", json!({ "name": name })),
        },
        Commands::Tool { cmd } => match cmd {
            ToolCommand::List => {
                let listing: Vec<_> = tools::registry()
                    .into_iter()
                    .map(|t| {
                        json!({
                            "name": t.name,
                            "description": t.description,
                            "input_schema": t.input_schema,
                        })
                    })
                    .collect();
                println!(
                    "{}",
                    serde_json::to_string_pretty(&json!({ "tools": listing })).unwrap_or_default()
                );
                return Ok(0);
            }
            ToolCommand::Call { name, args } => {
                let parsed: serde_json::Value = match args {
                    Some(raw) => serde_json::from_str(&raw).map_err(|err| {
                        MedlitError::InvalidArgument(format!("arguments are not valid JSON: {err}"))
                    })?,
                    None => json!({}),
                };
                let payload = tools::dispatch(&ctx, &name, &parsed, &cancel).await;
                let failed = payload.get("error").is_some();
                print_payload(&payload, true);
                return Ok(if failed { 1 } else { 0 });
            }
        },
        Commands::Health | Commands::Version => unreachable!("handled above"),
    };

    let payload = tools::dispatch(&ctx, tool, &args, &cancel).await;
    let failed = payload.get("error").is_some();
    print_payload(&payload, as_json || failed);
    Ok(if failed { 1 } else { 0 })
}
