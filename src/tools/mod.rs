//! The agent-facing tool surface: a registry table mapping tool name to
//! handler and schemas. Transport is someone else's problem; anything that
//! can deliver a tool name plus JSON arguments can drive this registry.

pub mod params;
pub mod render;

use std::sync::Arc;

use serde_json::{Value, json};
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::analysis::{branches, citation_tree, landmark, timeline};
use crate::entities::article::{Source, UnifiedArticle};
use crate::entities::pipeline::PipelineConfig;
use crate::entities::query::{SearchFilters, SearchOptions};
use crate::error::MedlitError;
use crate::pipeline::{self, PipelineExecutor, PipelineStore};
use crate::sources::fulltext::FulltextFetcher;
use crate::unified::{UnifiedSearchRequest, UnifiedSearcher};

pub struct ToolContext {
    pub searcher: Arc<UnifiedSearcher>,
    pub store: Arc<PipelineStore>,
    pub fulltext: Arc<FulltextFetcher>,
}

#[derive(Debug, Clone)]
pub struct ToolDef {
    pub name: &'static str,
    pub description: &'static str,
    pub input_schema: Value,
    pub output_schema: Value,
}

fn schema(properties: Value, required: &[&str]) -> Value {
    json!({
        "type": "object",
        "properties": properties,
        "required": required,
    })
}

fn article_list_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "articles": {"type": "array", "items": {"type": "object"}},
            "markdown": {"type": "string"}
        }
    })
}

/// The introspectable tool inventory.
pub fn registry() -> Vec<ToolDef> {
    vec![
        ToolDef {
            name: "unified_search",
            description: "Search all configured literature providers, deduplicate, rank, and enrich",
            input_schema: schema(
                json!({
                    "query": {"type": "string"},
                    "limit": {"type": "integer", "default": 20},
                    "filters": {"type": ["string", "object"]},
                    "options": {"type": ["string", "object"]},
                    "format": {"type": "string", "enum": ["markdown", "json"]}
                }),
                &["query"],
            ),
            output_schema: article_list_schema(),
        },
        ToolDef {
            name: "analyze_search_query",
            description: "Classify a query and recommend providers and a ranking profile",
            input_schema: schema(json!({"query": {"type": "string"}}), &["query"]),
            output_schema: json!({"type": "object"}),
        },
        ToolDef {
            name: "find_related_articles",
            description: "Articles related to a given article ID",
            input_schema: schema(
                json!({"id": {"type": "string"}, "limit": {"type": "integer", "default": 10}}),
                &["id"],
            ),
            output_schema: article_list_schema(),
        },
        ToolDef {
            name: "find_citing_articles",
            description: "Articles citing a given article ID",
            input_schema: schema(
                json!({"id": {"type": "string"}, "limit": {"type": "integer", "default": 10}}),
                &["id"],
            ),
            output_schema: article_list_schema(),
        },
        ToolDef {
            name: "get_article_references",
            description: "Reference list of a given article ID",
            input_schema: schema(
                json!({"id": {"type": "string"}, "limit": {"type": "integer", "default": 10}}),
                &["id"],
            ),
            output_schema: article_list_schema(),
        },
        ToolDef {
            name: "get_citation_metrics",
            description: "Field-normalized citation metrics for a list of PMIDs",
            input_schema: schema(
                json!({
                    "ids": {"type": ["string", "array"]},
                    "min_rcr": {"type": "number"},
                    "min_citations": {"type": "integer"}
                }),
                &["ids"],
            ),
            output_schema: json!({"type": "object"}),
        },
        ToolDef {
            name: "build_citation_tree",
            description: "Citation graph around a seed article in a renderable graph format",
            input_schema: schema(
                json!({
                    "id": {"type": "string"},
                    "depth": {"type": "integer", "default": 1},
                    "direction": {"type": "string", "enum": ["citing", "references", "both"], "default": "both"},
                    "format": {"type": "string", "enum": ["cytoscape", "g6", "d3", "vis", "graphml", "mermaid"], "default": "cytoscape"}
                }),
                &["id"],
            ),
            output_schema: json!({"type": "object"}),
        },
        ToolDef {
            name: "build_research_timeline",
            description: "Milestone timeline and research tree for a topic",
            input_schema: schema(
                json!({
                    "topic": {"type": "string"},
                    "filters": {"type": ["string", "object"]},
                    "limit": {"type": "integer", "default": 50},
                    "tree": {"type": "boolean", "default": true}
                }),
                &["topic"],
            ),
            output_schema: json!({"type": "object"}),
        },
        ToolDef {
            name: "run_pipeline",
            description: "Validate and execute a pipeline config, inline or by saved name",
            input_schema: schema(
                json!({
                    "config": {"type": "object"},
                    "name": {"type": "string"}
                }),
                &[],
            ),
            output_schema: json!({"type": "object"}),
        },
        ToolDef {
            name: "save_pipeline",
            description: "Persist a pipeline config to the workspace or global scope",
            input_schema: schema(json!({"config": {"type": "object"}}), &["config"]),
            output_schema: json!({"type": "object"}),
        },
        ToolDef {
            name: "list_pipelines",
            description: "List saved pipelines across scopes",
            input_schema: schema(json!({}), &[]),
            output_schema: json!({"type": "object"}),
        },
        ToolDef {
            name: "load_pipeline",
            description: "Load a saved pipeline config (workspace first, then global)",
            input_schema: schema(json!({"name": {"type": "string"}}), &["name"]),
            output_schema: json!({"type": "object"}),
        },
        ToolDef {
            name: "delete_pipeline",
            description: "Delete a saved pipeline",
            input_schema: schema(json!({"name": {"type": "string"}}), &["name"]),
            output_schema: json!({"type": "object"}),
        },
        ToolDef {
            name: "get_pipeline_history",
            description: "Run history for a saved pipeline, linked by config hash",
            input_schema: schema(json!({"name": {"type": "string"}}), &["name"]),
            output_schema: json!({"type": "object"}),
        },
        ToolDef {
            name: "describe_template",
            description: "Describe a built-in pipeline template and its parameters",
            input_schema: schema(json!({"name": {"type": "string"}}), &["name"]),
            output_schema: json!({"type": "object"}),
        },
        ToolDef {
            name: "get_fulltext",
            description: "Resolve the fulltext/PDF chain for any article ID",
            input_schema: schema(json!({"id": {"type": "string"}}), &["id"]),
            output_schema: json!({"type": "object"}),
        },
    ]
}

fn arg_str<'a>(args: &'a Value, key: &str) -> Option<&'a str> {
    args.get(key).and_then(Value::as_str).map(str::trim).filter(|v| !v.is_empty())
}

fn required_str<'a>(args: &'a Value, key: &str, example: &str) -> Result<&'a str, MedlitError> {
    arg_str(args, key).ok_or_else(|| {
        MedlitError::InvalidArgument(format!("\"{key}\" is required. Example: {example}"))
    })
}

fn arg_usize(args: &Value, key: &str, default: usize) -> usize {
    args.get(key)
        .and_then(Value::as_u64)
        .map(|v| v as usize)
        .unwrap_or(default)
}

fn parse_filters_arg(args: &Value) -> Result<(SearchFilters, Vec<String>), MedlitError> {
    match args.get("filters") {
        None | Some(Value::Null) => Ok((SearchFilters::default(), Vec::new())),
        Some(Value::String(raw)) => Ok(params::parse_filters(Some(raw))),
        Some(object @ Value::Object(_)) => {
            let filters: SearchFilters =
                serde_json::from_value(object.clone()).map_err(|err| {
                    MedlitError::InvalidArgument(format!("invalid filters object: {err}"))
                })?;
            Ok((filters, Vec::new()))
        }
        Some(other) => Err(MedlitError::InvalidArgument(format!(
            "filters must be a string or object, got {other}"
        ))),
    }
}

fn parse_options_arg(args: &Value) -> Result<(SearchOptions, Vec<String>), MedlitError> {
    match args.get("options") {
        None | Some(Value::Null) => Ok((SearchOptions::default(), Vec::new())),
        Some(Value::String(raw)) => Ok(params::parse_options(Some(raw))),
        Some(object @ Value::Object(_)) => {
            let options: SearchOptions =
                serde_json::from_value(object.clone()).map_err(|err| {
                    MedlitError::InvalidArgument(format!("invalid options object: {err}"))
                })?;
            Ok((options, Vec::new()))
        }
        Some(other) => Err(MedlitError::InvalidArgument(format!(
            "options must be a string or object, got {other}"
        ))),
    }
}

fn articles_payload(articles: &[UnifiedArticle], markdown: String) -> Value {
    json!({
        "articles": articles,
        "count": articles.len(),
        "markdown": markdown,
    })
}

fn simple_article_markdown(title: &str, articles: &[UnifiedArticle]) -> String {
    let mut out = format!("# {title}\n\n");
    if articles.is_empty() {
        out.push_str("No articles found.\n");
    }
    for (i, article) in articles.iter().enumerate() {
        out.push_str(&render::article_block(i + 1, article, false));
        out.push('\n');
    }
    out
}

async fn tool_unified_search(
    ctx: &ToolContext,
    args: &Value,
    cancel: &CancellationToken,
) -> Result<Value, MedlitError> {
    let query = required_str(args, "query", "unified_search {\"query\": \"remimazolam\"}")?;
    let (filters, mut warnings) = parse_filters_arg(args)?;
    let (options, option_warnings) = parse_options_arg(args)?;
    warnings.extend(option_warnings);

    let request = UnifiedSearchRequest {
        query: query.to_string(),
        limit: arg_usize(args, "limit", crate::unified::DEFAULT_SEARCH_LIMIT),
        filters,
        options: options.clone(),
        sources: None,
    };
    let response = ctx.searcher.search(&request, cancel).await?;

    let mut markdown = render::search_response(&response, options.include_similarity_scores);
    if options.show_analysis {
        markdown.push('\n');
        markdown.push_str(&render::analysis_section(&response));
    }
    Ok(json!({
        "articles": response.articles,
        "analysis": response.analysis,
        "statistics": response.stats,
        "sources": response.outcomes,
        "relaxation": response.relaxation,
        "degraded": response.degraded,
        "warnings": warnings,
        "markdown": markdown,
    }))
}

async fn tool_analyze_query(ctx: &ToolContext, args: &Value) -> Result<Value, MedlitError> {
    let query = required_str(args, "query", "analyze_search_query {\"query\": \"a vs b\"}")?;
    let candidates = crate::unified::analyzer::entity_candidates(query);
    let entities = ctx.searcher.resolver().resolve_all(&candidates).await;
    let analysis = crate::unified::analyzer::analyze(query, &entities);
    serde_json::to_value(&analysis).map_err(|source| MedlitError::ApiJson {
        api: "analyze_search_query".to_string(),
        source,
    })
}

enum LinkKind {
    Related,
    Citing,
    References,
}

async fn tool_linked_articles(
    ctx: &ToolContext,
    args: &Value,
    kind: LinkKind,
) -> Result<Value, MedlitError> {
    let id = required_str(args, "id", "find_citing_articles {\"id\": \"37654670\"}")?;
    let limit = arg_usize(args, "limit", 10).clamp(1, 100);
    let dispatcher = ctx.searcher.dispatcher();

    let mut articles: Vec<UnifiedArticle> = Vec::new();
    for source in [
        Source::Pubmed,
        Source::EuropePmc,
        Source::SemanticScholar,
        Source::ClinicalTrials,
    ] {
        let Some(adapter) = dispatcher.adapter(source) else {
            continue;
        };
        let outcome = match kind {
            LinkKind::Related => match adapter.related() {
                Some(capability) => capability.related(id, limit).await,
                None => continue,
            },
            LinkKind::Citing => match adapter.citing() {
                Some(capability) => capability.citing(id, limit).await,
                None => continue,
            },
            LinkKind::References => match adapter.references() {
                Some(capability) => capability.references(id, limit).await,
                None => continue,
            },
        };
        match outcome {
            Ok(found) if !found.is_empty() => {
                articles = found;
                break;
            }
            Ok(_) => continue,
            Err(err) if err.retryable() => return Err(err),
            Err(_) => continue,
        }
    }
    let title = match kind {
        LinkKind::Related => format!("Articles related to {id}"),
        LinkKind::Citing => format!("Articles citing {id}"),
        LinkKind::References => format!("References of {id}"),
    };
    let markdown = simple_article_markdown(&title, &articles);
    Ok(articles_payload(&articles, markdown))
}

async fn tool_citation_metrics(ctx: &ToolContext, args: &Value) -> Result<Value, MedlitError> {
    let ids: Vec<String> = match args.get("ids") {
        Some(Value::String(raw)) => raw
            .split(',')
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(str::to_string)
            .collect(),
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(Value::as_str)
            .map(str::to_string)
            .collect(),
        _ => {
            return Err(MedlitError::InvalidArgument(
                "\"ids\" is required. Example: get_citation_metrics {\"ids\": \"37654670,22663011\"}"
                    .into(),
            ));
        }
    };
    for id in &ids {
        if !id.chars().all(|c| c.is_ascii_digit()) {
            return Err(MedlitError::InvalidArgument(format!(
                "\"{id}\" is not a PMID (digits only)"
            )));
        }
    }

    let metrics = ctx.searcher.enricher().citation_metrics(&ids).await?;
    let min_rcr = args.get("min_rcr").and_then(Value::as_f64);
    let min_citations = args.get("min_citations").and_then(Value::as_u64);
    let filtered: Vec<&String> = ids
        .iter()
        .filter(|id| {
            metrics.get(id.as_str()).is_some_and(|m| {
                min_rcr.is_none_or(|min| m.relative_citation_ratio.unwrap_or(0.0) >= min)
                    && min_citations.is_none_or(|min| m.citation_count >= min)
            })
        })
        .collect();
    Ok(json!({
        "metrics": metrics,
        "filtered_ids": filtered,
    }))
}

async fn tool_citation_tree(ctx: &ToolContext, args: &Value) -> Result<Value, MedlitError> {
    let id = required_str(args, "id", "build_citation_tree {\"id\": \"37654670\"}")?;
    let depth = arg_usize(args, "depth", 1);
    let direction =
        citation_tree::TreeDirection::from_flag(arg_str(args, "direction").unwrap_or("both"))?;
    let format = citation_tree::GraphFormat::from_flag(arg_str(args, "format").unwrap_or("cytoscape"))?;
    let limit = arg_usize(args, "limit", citation_tree::DEFAULT_BRANCH_LIMIT);

    let tree =
        citation_tree::build(ctx.searcher.dispatcher(), id, depth, direction, limit).await?;
    let graph = citation_tree::render(&tree, format);
    Ok(json!({
        "seed": tree.seed,
        "direction": tree.direction,
        "depth": tree.depth,
        "node_count": tree.nodes.len(),
        "edge_count": tree.edges.len(),
        "graph": graph,
    }))
}

async fn tool_research_timeline(
    ctx: &ToolContext,
    args: &Value,
    cancel: &CancellationToken,
) -> Result<Value, MedlitError> {
    let topic = required_str(
        args,
        "topic",
        "build_research_timeline {\"topic\": \"remimazolam\"}",
    )?;
    let (filters, _) = parse_filters_arg(args)?;
    let limit = arg_usize(args, "limit", 50).clamp(10, 100);

    let request = UnifiedSearchRequest {
        query: topic.to_string(),
        limit,
        filters,
        options: SearchOptions {
            include_preprints: false,
            include_oa_links: false,
            include_similarity_scores: false,
            ..Default::default()
        },
        sources: None,
    };
    let response = ctx.searcher.search(&request, cancel).await?;
    let mut articles = response.articles;
    // Landmark components need the citation metrics attached.
    ctx.searcher
        .enricher()
        .add_citation_metrics(&mut articles)
        .await
        .ok();
    for article in &mut articles {
        article.landmark = Some(landmark::score(article));
    }

    let built = timeline::build(topic, &articles);
    let tree = args
        .get("tree")
        .and_then(Value::as_bool)
        .unwrap_or(true)
        .then(|| branches::build_research_tree(&built));
    let markdown = render::timeline_markdown(&built, tree.as_ref());
    Ok(json!({
        "timeline": built,
        "tree": tree,
        "landmarks": articles
            .iter()
            .filter(|a| a.landmark.as_ref().is_some_and(|l| matches!(
                l.tier,
                crate::entities::timeline::LandmarkTier::Landmark
                    | crate::entities::timeline::LandmarkTier::Notable
            )))
            .collect::<Vec<_>>(),
        "markdown": markdown,
    }))
}

fn config_from_args(ctx: &ToolContext, args: &Value) -> Result<PipelineConfig, MedlitError> {
    if let Some(config_value) = args.get("config") {
        return serde_json::from_value(config_value.clone()).map_err(|err| {
            MedlitError::InvalidArgument(format!("invalid pipeline config: {err}"))
        });
    }
    if let Some(name) = arg_str(args, "name") {
        return ctx.store.load(name);
    }
    Err(MedlitError::InvalidArgument(
        "run_pipeline requires \"config\" or \"name\". Example: run_pipeline {\"name\": \"my-search\"}"
            .into(),
    ))
}

async fn tool_run_pipeline(
    ctx: &ToolContext,
    args: &Value,
    cancel: &CancellationToken,
) -> Result<Value, MedlitError> {
    let config = config_from_args(ctx, args)?;
    let validated = pipeline::validate(&config).map_err(|err| err.into_error())?;
    let hash = pipeline::config_hash(&validated.config);

    let executor = PipelineExecutor::new(&ctx.searcher);
    let report = executor.execute(&validated.config, &hash, cancel).await?;
    if let Err(err) = ctx.store.record_run(validated.config.scope, &report.run) {
        info!(?err, "run history not persisted");
    }

    let markdown = simple_article_markdown(
        &format!("Pipeline output ({} steps)", report.run.steps.len()),
        &report.articles,
    );
    Ok(json!({
        "run": report.run,
        "fixes": validated.fixes,
        "steps": report.step_results.iter().map(|r| json!({
            "step_id": r.step_id,
            "action": r.action,
            "count": r.articles.len(),
            "error": r.error,
            "metadata": r.metadata,
        })).collect::<Vec<_>>(),
        "articles": report.articles,
        "markdown": markdown,
    }))
}

fn tool_save_pipeline(ctx: &ToolContext, args: &Value) -> Result<Value, MedlitError> {
    let config_value = args.get("config").ok_or_else(|| {
        MedlitError::InvalidArgument("save_pipeline requires \"config\"".into())
    })?;
    let config: PipelineConfig = serde_json::from_value(config_value.clone())
        .map_err(|err| MedlitError::InvalidArgument(format!("invalid pipeline config: {err}")))?;
    let validated = pipeline::validate(&config).map_err(|err| err.into_error())?;
    let mut stored = validated.config;
    stored.name = config.name;
    let entry = ctx.store.save(&stored)?;
    Ok(json!({"saved": entry, "fixes": validated.fixes}))
}

async fn tool_fulltext(ctx: &ToolContext, args: &Value) -> Result<Value, MedlitError> {
    let id = required_str(args, "id", "get_fulltext {\"id\": \"PMC9984800\"}")?;
    let dispatcher = ctx.searcher.dispatcher();
    let source = if id.chars().all(|c| c.is_ascii_digit()) {
        Source::Pubmed
    } else {
        Source::EuropePmc
    };
    let article = match dispatcher.adapter(source) {
        Some(adapter) => adapter.fetch(id).await?,
        None => None,
    };
    let article = article.ok_or_else(|| MedlitError::NotFound {
        entity: "article".into(),
        id: id.to_string(),
        suggestion: format!("Try searching: medlit search \"{id}\""),
    })?;
    let result = ctx.fulltext.fetch(&article).await?;
    serde_json::to_value(&result).map_err(|source| MedlitError::ApiJson {
        api: "get_fulltext".to_string(),
        source,
    })
}

/// Invoke a tool by name. The returned value is either the tool's success
/// payload or the structured error envelope.
pub async fn dispatch(
    ctx: &ToolContext,
    name: &str,
    args: &Value,
    cancel: &CancellationToken,
) -> Value {
    let result = dispatch_inner(ctx, name, args, cancel).await;
    match result {
        Ok(payload) => payload,
        Err(err) => err.to_envelope(),
    }
}

async fn dispatch_inner(
    ctx: &ToolContext,
    name: &str,
    args: &Value,
    cancel: &CancellationToken,
) -> Result<Value, MedlitError> {
    match name {
        "unified_search" => tool_unified_search(ctx, args, cancel).await,
        "analyze_search_query" => tool_analyze_query(ctx, args).await,
        "find_related_articles" => tool_linked_articles(ctx, args, LinkKind::Related).await,
        "find_citing_articles" => tool_linked_articles(ctx, args, LinkKind::Citing).await,
        "get_article_references" => tool_linked_articles(ctx, args, LinkKind::References).await,
        "get_citation_metrics" => tool_citation_metrics(ctx, args).await,
        "build_citation_tree" => tool_citation_tree(ctx, args).await,
        "build_research_timeline" => tool_research_timeline(ctx, args, cancel).await,
        "run_pipeline" => tool_run_pipeline(ctx, args, cancel).await,
        "save_pipeline" => tool_save_pipeline(ctx, args),
        "list_pipelines" => Ok(json!({"pipelines": ctx.store.list()})),
        "load_pipeline" => {
            let name = required_str(args, "name", "load_pipeline {\"name\": \"my-search\"}")?;
            let config = ctx.store.load(name)?;
            serde_json::to_value(&config).map_err(|source| MedlitError::ApiJson {
                api: "load_pipeline".to_string(),
                source,
            })
        }
        "delete_pipeline" => {
            let name = required_str(args, "name", "delete_pipeline {\"name\": \"my-search\"}")?;
            let scope = ctx.store.delete(name)?;
            Ok(json!({"deleted": name, "scope": scope}))
        }
        "get_pipeline_history" => {
            let name = required_str(args, "name", "get_pipeline_history {\"name\": \"my-search\"}")?;
            Ok(json!({"runs": ctx.store.run_history(name)?}))
        }
        "describe_template" => {
            let name = required_str(args, "name", "describe_template {\"name\": \"pico\"}")?;
            let description = crate::pipeline::templates::describe(name)?;
            serde_json::to_value(&description).map_err(|source| MedlitError::ApiJson {
                api: "describe_template".to_string(),
                source,
            })
        }
        "get_fulltext" => tool_fulltext(ctx, args).await,
        other => Err(MedlitError::InvalidArgument(format!(
            "Unknown tool \"{other}\". Available: {}",
            registry()
                .iter()
                .map(|t| t.name)
                .collect::<Vec<_>>()
                .join(", ")
        ))),
    }
}
