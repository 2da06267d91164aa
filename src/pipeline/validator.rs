//! Pipeline validation with aggressive auto-fixing. Alias and fuzzy
//! matching repair action and template names, missing or duplicate step
//! IDs are regenerated, broken dependency references are re-pointed, and
//! cycles are broken by dropping back-edges. Anything unfixable aborts
//! validation with an error.

use std::collections::{HashMap, HashSet};

use strsim::levenshtein;

use crate::entities::pipeline::{
    FixSeverity, MAX_PIPELINE_STEPS, PipelineConfig, StepAction, ValidationError, ValidationFix,
};
use crate::pipeline::templates;

const FUZZY_DISTANCE: usize = 2;

const ACTION_ALIASES: &[(&str, &str)] = &[
    ("find", "search"),
    ("query", "search"),
    ("lookup", "details"),
    ("detail", "details"),
    ("fetch", "details"),
    ("get", "details"),
    ("similar", "related"),
    ("recommend", "related"),
    ("cited_by", "citing"),
    ("citations", "citing"),
    ("refs", "references"),
    ("reference", "references"),
    ("bibliography", "references"),
    ("enrich", "metrics"),
    ("combine", "merge"),
    ("union", "merge"),
    ("fuse", "merge"),
    ("dedupe", "merge"),
    ("where", "filter"),
    ("expansion", "expand"),
];

#[derive(Debug)]
pub struct Validated {
    pub config: PipelineConfig,
    pub fixes: Vec<ValidationFix>,
}

fn fix(
    step_id: Option<&str>,
    severity: FixSeverity,
    message: impl Into<String>,
    before: impl Into<String>,
    after: impl Into<String>,
) -> ValidationFix {
    ValidationFix {
        step_id: step_id.map(str::to_string),
        severity,
        message: message.into(),
        before: before.into(),
        after: after.into(),
    }
}

fn fuzzy_best<'a>(input: &str, candidates: impl Iterator<Item = &'a str>) -> Option<&'a str> {
    candidates
        .map(|c| (levenshtein(input, c), c))
        .filter(|(d, _)| *d <= FUZZY_DISTANCE)
        .min_by_key(|(d, c)| (*d, c.to_string()))
        .map(|(_, c)| c)
}

fn resolve_action(raw: &str) -> Option<(StepAction, bool)> {
    let lowered = raw.trim().to_ascii_lowercase();
    if let Some(action) = StepAction::parse(&lowered) {
        return Some((action, false));
    }
    if let Some((_, canonical)) = ACTION_ALIASES.iter().find(|(alias, _)| *alias == lowered) {
        return StepAction::parse(canonical).map(|a| (a, true));
    }
    fuzzy_best(&lowered, StepAction::ALL.iter().map(|a| a.as_str()))
        .and_then(StepAction::parse)
        .map(|a| (a, true))
}

fn resolve_template(raw: &str, fixes: &mut Vec<ValidationFix>) -> Result<String, ValidationError> {
    let lowered = raw.trim().to_ascii_lowercase();
    if templates::TEMPLATE_NAMES.contains(&lowered.as_str()) {
        return Ok(lowered);
    }
    if let Some(matched) = fuzzy_best(&lowered, templates::TEMPLATE_NAMES.iter().copied()) {
        fixes.push(fix(
            None,
            FixSeverity::Warning,
            "template name fuzzy-matched",
            raw,
            matched,
        ));
        return Ok(matched.to_string());
    }
    Err(ValidationError {
        step_id: None,
        message: format!(
            "Unknown template \"{raw}\". Available: {}",
            templates::TEMPLATE_NAMES.join(", ")
        ),
    })
}

/// Break cycles by dropping, per cycle, the back-edge whose source step has
/// the highest lexicographic id. Returns the dropped edges.
fn break_cycles(
    ids: &[String],
    edges: &mut Vec<(usize, usize)>,
) -> Result<Vec<(String, String)>, ValidationError> {
    let mut dropped: Vec<(String, String)> = Vec::new();
    loop {
        let n = ids.len();
        let mut adjacency: Vec<Vec<usize>> = vec![Vec::new(); n];
        for (from, to) in edges.iter() {
            adjacency[*from].push(*to);
        }

        // Iterative DFS cycle detection recording one back-edge per cycle.
        let mut color = vec![0u8; n];
        let mut back_edges: Vec<(usize, usize)> = Vec::new();
        for start in 0..n {
            if color[start] != 0 {
                continue;
            }
            let mut stack: Vec<(usize, usize)> = vec![(start, 0)];
            color[start] = 1;
            while let Some(&mut (node, ref mut edge_idx)) = stack.last_mut() {
                if *edge_idx < adjacency[node].len() {
                    let next = adjacency[node][*edge_idx];
                    *edge_idx += 1;
                    match color[next] {
                        0 => {
                            color[next] = 1;
                            stack.push((next, 0));
                        }
                        1 => back_edges.push((node, next)),
                        _ => {}
                    }
                } else {
                    color[node] = 2;
                    stack.pop();
                }
            }
        }

        if back_edges.is_empty() {
            return Ok(dropped);
        }
        let (from, to) = back_edges
            .into_iter()
            .max_by(|a, b| ids[a.0].cmp(&ids[b.0]))
            .expect("non-empty back edge list");
        edges.retain(|e| *e != (from, to));
        dropped.push((ids[from].clone(), ids[to].clone()));
        if dropped.len() > ids.len() * ids.len() {
            return Err(ValidationError {
                step_id: None,
                message: "Cycle in step graph could not be broken".into(),
            });
        }
    }
}

/// Kahn's algorithm preferring original step order, so already-ordered
/// configs come back unchanged.
fn topo_order(n: usize, edges: &[(usize, usize)]) -> Result<Vec<usize>, ValidationError> {
    let mut indegree = vec![0usize; n];
    let mut adjacency: Vec<Vec<usize>> = vec![Vec::new(); n];
    for (from, to) in edges {
        adjacency[*from].push(*to);
        indegree[*to] += 1;
    }
    let mut order: Vec<usize> = Vec::with_capacity(n);
    let mut ready: Vec<usize> = (0..n).filter(|i| indegree[*i] == 0).collect();
    while let Some(&next) = ready.iter().min() {
        ready.retain(|i| *i != next);
        order.push(next);
        for &to in &adjacency[next] {
            indegree[to] -= 1;
            if indegree[to] == 0 {
                ready.push(to);
            }
        }
    }
    if order.len() != n {
        return Err(ValidationError {
            step_id: None,
            message: "Step graph is not a DAG after cycle breaking".into(),
        });
    }
    Ok(order)
}

fn check_required_params(
    action: StepAction,
    step: &crate::entities::pipeline::PipelineStep,
) -> Result<(), ValidationError> {
    let missing = |what: &str| ValidationError {
        step_id: Some(step.id.clone()),
        message: format!("action \"{}\" requires {what}", action.as_str()),
    };
    match action {
        StepAction::Search => {
            if step.param_str("query").map(str::trim).unwrap_or("").is_empty() {
                return Err(missing("a \"query\" param"));
            }
        }
        StepAction::Pico => {
            let has_element = ["population", "intervention", "comparison", "outcome"]
                .iter()
                .any(|k| !step.param_str(k).map(str::trim).unwrap_or("").is_empty());
            if !has_element {
                return Err(missing("at least one PICO element param"));
            }
        }
        StepAction::Expand => {
            if step.param_str("query").map(str::trim).unwrap_or("").is_empty()
                && step.inputs.is_empty()
            {
                return Err(missing("a \"query\" param or an input step"));
            }
        }
        StepAction::Details => {
            if step.inputs.is_empty()
                && step.param_str("ids").map(str::trim).unwrap_or("").is_empty()
            {
                return Err(missing("an \"ids\" param or an input step"));
            }
        }
        StepAction::Related
        | StepAction::Citing
        | StepAction::References
        | StepAction::Metrics
        | StepAction::Merge
        | StepAction::Filter => {
            if step.inputs.is_empty() {
                return Err(missing("at least one input step"));
            }
        }
    }
    Ok(())
}

pub fn validate(config: &PipelineConfig) -> Result<Validated, ValidationError> {
    let mut fixes: Vec<ValidationFix> = Vec::new();

    // Template reference expansion happens before structural checks.
    let mut config = if let Some(template) = config.template.as_deref() {
        let resolved = resolve_template(template, &mut fixes)?;
        let mut with_template = config.clone();
        with_template.template = Some(resolved);
        templates::expand_config(&with_template).map_err(|err| ValidationError {
            step_id: None,
            message: err.to_string(),
        })?
    } else {
        config.clone()
    };

    if config.steps.is_empty() {
        return Err(ValidationError {
            step_id: None,
            message: "Pipeline has no steps".into(),
        });
    }
    if config.steps.len() > MAX_PIPELINE_STEPS {
        return Err(ValidationError {
            step_id: None,
            message: format!(
                "Pipeline has {} steps; the limit is {MAX_PIPELINE_STEPS}",
                config.steps.len()
            ),
        });
    }

    // Action normalization: exact, alias, then fuzzy.
    for step in &mut config.steps {
        let raw = step.action.clone();
        match resolve_action(&raw) {
            Some((action, changed)) => {
                if changed {
                    fixes.push(fix(
                        Some(&step.id),
                        FixSeverity::Info,
                        "action name normalized",
                        &raw,
                        action.as_str(),
                    ));
                }
                step.action = action.as_str().to_string();
            }
            None => {
                return Err(ValidationError {
                    step_id: Some(step.id.clone()),
                    message: format!(
                        "Unknown action \"{raw}\". Valid actions: {}",
                        StepAction::ALL
                            .iter()
                            .map(|a| a.as_str())
                            .collect::<Vec<_>>()
                            .join(", ")
                    ),
                });
            }
        }
    }

    // Missing and duplicate IDs.
    let mut seen_ids: HashSet<String> = HashSet::new();
    for (index, step) in config.steps.iter_mut().enumerate() {
        if step.id.trim().is_empty() {
            let generated = format!("step_{}", index + 1);
            fixes.push(fix(
                Some(&generated),
                FixSeverity::Info,
                "missing step id generated",
                "",
                &generated,
            ));
            step.id = generated;
        }
        let mut candidate = step.id.trim().to_string();
        let mut suffix = 2usize;
        while !seen_ids.insert(candidate.clone()) {
            let renamed = format!("{}_{suffix}", step.id.trim());
            fixes.push(fix(
                Some(&renamed),
                FixSeverity::Warning,
                "duplicate step id renamed",
                step.id.trim(),
                &renamed,
            ));
            candidate = renamed;
            suffix += 1;
        }
        step.id = candidate;
    }

    // Dependency repair: fuzzy-match broken refs, drop what cannot match.
    let known: Vec<String> = config.steps.iter().map(|s| s.id.clone()).collect();
    for step in &mut config.steps {
        let own_id = step.id.clone();
        let mut repaired: Vec<String> = Vec::new();
        for input in &step.inputs {
            if known.contains(input) && *input != own_id {
                repaired.push(input.clone());
                continue;
            }
            let candidates = known.iter().map(String::as_str).filter(|c| **c != own_id);
            match fuzzy_best(input, candidates) {
                Some(matched) => {
                    fixes.push(fix(
                        Some(&own_id),
                        FixSeverity::Warning,
                        "dependency reference repaired",
                        input,
                        matched,
                    ));
                    repaired.push(matched.to_string());
                }
                None => {
                    fixes.push(fix(
                        Some(&own_id),
                        FixSeverity::Warning,
                        "unresolvable dependency reference dropped",
                        input,
                        "",
                    ));
                }
            }
        }
        repaired.dedup();
        step.inputs = repaired;
    }

    // Cycle breaking, then topological reorder.
    let index_of: HashMap<String, usize> = known
        .iter()
        .enumerate()
        .map(|(i, id)| (id.clone(), i))
        .collect();
    let mut edges: Vec<(usize, usize)> = Vec::new();
    for (to, step) in config.steps.iter().enumerate() {
        for input in &step.inputs {
            edges.push((index_of[input], to));
        }
    }
    for (from, to) in break_cycles(&known, &mut edges)? {
        fixes.push(fix(
            Some(&to),
            FixSeverity::Warning,
            "cycle broken by dropping back-edge",
            format!("{from} -> {to}"),
            "",
        ));
        if let Some(step) = config.steps.iter_mut().find(|s| s.id == to) {
            step.inputs.retain(|i| *i != from);
        }
    }
    let order = topo_order(known.len(), &edges)?;
    let reordered: Vec<_> = order.iter().map(|&i| config.steps[i].clone()).collect();
    if order.iter().enumerate().any(|(pos, &i)| pos != i) {
        fixes.push(fix(
            None,
            FixSeverity::Info,
            "steps reordered topologically",
            known.join(","),
            reordered
                .iter()
                .map(|s| s.id.as_str())
                .collect::<Vec<_>>()
                .join(","),
        ));
    }
    config.steps = reordered;

    // Required params are checked last, on the repaired graph.
    for step in &config.steps {
        let action = StepAction::parse(&step.action).expect("normalized above");
        check_required_params(action, step)?;
    }

    Ok(Validated { config, fixes })
}

/// Validation reaches a fixed point: validating an already-validated
/// config must produce no further fixes.
pub fn is_fixed_point(config: &PipelineConfig) -> bool {
    match validate(config) {
        Ok(validated) => validated.fixes.is_empty(),
        Err(_) => false,
    }
}
