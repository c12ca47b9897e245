//! Dependency graph: validates references, detects cycles,
//! topologically sorts, produces parallel execution groups, emits analytics and DOT/JSON
//! export. Built on `petgraph` (`DiGraph`, `toposort`, level-by-level Kahn layering),
//! generalized to this engine's global/section dimension tagging and analytics surface.

use std::collections::{HashMap, HashSet, VecDeque};

use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::EdgeRef;
use serde::Serialize;

use crate::error::{Error, Result};
use crate::model::Scope;

/// A topologically sorted plan partitioned into parallel execution groups.
#[derive(Debug, Clone)]
pub struct Plan {
    pub sorted: Vec<String>,
    pub groups: Vec<Vec<String>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Analytics {
    pub total_dimensions: usize,
    pub total_dependencies: usize,
    pub max_depth: usize,
    pub critical_path: Vec<String>,
    pub parallel_groups: usize,
    pub independent_dimensions: Vec<String>,
    pub bottlenecks: Vec<Bottleneck>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Bottleneck {
    pub dimension: String,
    pub dependent_count: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct JsonNode {
    pub id: String,
    pub label: String,
    #[serde(rename = "type")]
    pub kind: &'static str,
}

#[derive(Debug, Clone, Serialize)]
pub struct JsonLink {
    pub source: String,
    pub target: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct JsonGraph {
    pub nodes: Vec<JsonNode>,
    pub links: Vec<JsonLink>,
}

/// Builds the `petgraph::DiGraph` (edges point prerequisite → dependent, matching
/// declaration order for deterministic tie-breaking) plus a name→index lookup.
fn build_graph(
    names: &[String],
    deps: &HashMap<String, Vec<String>>,
) -> Result<(DiGraph<String, ()>, HashMap<String, NodeIndex>)> {
    let mut graph = DiGraph::new();
    let mut index = HashMap::with_capacity(names.len());
    for name in names {
        index.insert(name.clone(), graph.add_node(name.clone()));
    }
    for name in names {
        if let Some(prereqs) = deps.get(name) {
            for prereq in prereqs {
                let Some(&prereq_idx) = index.get(prereq) else {
                    return Err(Error::MissingDependency {
                        name: prereq.clone(),
                        referenced_by: name.clone(),
                    });
                };
                let dependent_idx = index[name];
                graph.add_edge(prereq_idx, dependent_idx, ());
            }
        }
    }
    Ok((graph, index))
}

/// Finds the shortest cycle containing `start` via BFS back-edge reconstruction, so
/// error messages name a minimal, readable cycle path.
fn shortest_cycle_through(
    graph: &DiGraph<String, ()>,
    start: NodeIndex,
) -> Vec<String> {
    let mut best: Option<Vec<NodeIndex>> = None;
    for edge in graph.edges(start) {
        let neighbor = edge.target();
        // BFS from neighbor back to start; if found, start -> neighbor -> ... -> start
        // is a cycle through the back edge we're inspecting.
        let mut queue = VecDeque::new();
        let mut prev: HashMap<NodeIndex, NodeIndex> = HashMap::new();
        queue.push_back(neighbor);
        prev.insert(neighbor, start);
        let mut found = neighbor == start;
        while let Some(node) = queue.pop_front() {
            if node == start {
                found = true;
                break;
            }
            for e in graph.edges(node) {
                let next = e.target();
                if !prev.contains_key(&next) {
                    prev.insert(next, node);
                    queue.push_back(next);
                }
            }
        }
        if found {
            let mut path = vec![start];
            let mut cur = neighbor;
            while cur != start {
                path.push(cur);
                cur = prev[&cur];
            }
            path.push(start);
            if best.as_ref().map_or(true, |b| path.len() < b.len()) {
                best = Some(path);
            }
        }
    }
    best.unwrap_or_else(|| vec![start])
        .into_iter()
        .map(|idx| graph[idx].clone())
        .collect()
}

/// Compiles the dependency plan: topological sort plus parallel-group partition.
pub fn plan(names: &[String], deps: &HashMap<String, Vec<String>>) -> Result<Plan> {
    let (graph, index) = build_graph(names, deps)?;

    if petgraph::algo::toposort(&graph, None).is_err() {
        for name in names {
            let idx = index[name];
            // A node participates in a cycle iff it can reach itself.
            let mut queue = VecDeque::new();
            let mut seen = HashSet::new();
            queue.push_back(idx);
            seen.insert(idx);
            let mut reaches_self = false;
            while let Some(node) = queue.pop_front() {
                for e in graph.edges(node) {
                    let next = e.target();
                    if next == idx {
                        reaches_self = true;
                        break;
                    }
                    if seen.insert(next) {
                        queue.push_back(next);
                    }
                }
                if reaches_self {
                    break;
                }
            }
            if reaches_self {
                return Err(Error::CircularDependency {
                    cycle: shortest_cycle_through(&graph, idx),
                });
            }
        }
        // Unreachable in practice: toposort failed but no node detectably cycles.
        return Err(Error::CircularDependency {
            cycle: names.to_vec(),
        });
    }

    let groups = parallel_groups(names, deps)?;
    let sorted = groups.iter().flatten().cloned().collect();
    Ok(Plan { sorted, groups })
}

/// Kahn-style layering: repeatedly peel nodes whose prerequisites are all already
/// emitted. Each peel is one parallel group, preserving declaration order within it.
fn parallel_groups(
    names: &[String],
    deps: &HashMap<String, Vec<String>>,
) -> Result<Vec<Vec<String>>> {
    let mut remaining: Vec<&String> = names.iter().collect();
    let mut placed: HashSet<&str> = HashSet::new();
    let mut groups = Vec::new();

    while !remaining.is_empty() {
        let mut frontier = Vec::new();
        let mut still_remaining = Vec::new();
        for name in &remaining {
            let prereqs = deps.get(*name).map(|v| v.as_slice()).unwrap_or(&[]);
            if prereqs.iter().all(|p| placed.contains(p.as_str())) {
                frontier.push((*name).clone());
            } else {
                still_remaining.push(*name);
            }
        }
        if frontier.is_empty() {
            return Err(Error::ExecutionGrouping {
                remaining: still_remaining.into_iter().cloned().collect(),
            });
        }
        for name in &frontier {
            placed.insert(name.as_str());
        }
        groups.push(frontier);
        remaining = still_remaining;
    }
    Ok(groups)
}

/// `{ totalDimensions, totalDependencies, maxDepth, criticalPath, parallelGroups,
/// independentDimensions, bottlenecks }`.
pub fn analytics(names: &[String], deps: &HashMap<String, Vec<String>>) -> Result<Analytics> {
    let groups = parallel_groups(names, deps)?;
    let total_dependencies: usize = deps.values().map(|v| v.len()).sum();

    let mut dependent_count: HashMap<&str, usize> = HashMap::new();
    for prereqs in deps.values() {
        for p in prereqs {
            *dependent_count.entry(p.as_str()).or_insert(0) += 1;
        }
    }
    let mut bottlenecks: Vec<Bottleneck> = dependent_count
        .iter()
        .filter(|(_, &count)| count >= 3)
        .map(|(name, &count)| Bottleneck {
            dimension: name.to_string(),
            dependent_count: count,
        })
        .collect();
    bottlenecks.sort_by(|a, b| b.dependent_count.cmp(&a.dependent_count));

    let independent_dimensions: Vec<String> = names
        .iter()
        .filter(|n| deps.get(*n).map(|v| v.is_empty()).unwrap_or(true))
        .cloned()
        .collect();

    let critical_path = critical_path(names, deps);

    Ok(Analytics {
        total_dimensions: names.len(),
        total_dependencies,
        max_depth: groups.len(),
        critical_path,
        parallel_groups: groups.len(),
        independent_dimensions,
        bottlenecks,
    })
}

/// Longest path in the DAG by hop count; ties broken by first name in declaration
/// order.
fn critical_path(names: &[String], deps: &HashMap<String, Vec<String>>) -> Vec<String> {
    let mut longest_ending_at: HashMap<&str, Vec<String>> = HashMap::new();

    // names is already declaration order and, by construction elsewhere, a node's
    // prerequisites always precede it once acyclic — but analytics() may be called
    // standalone, so recompute via repeated relaxation bounded by names.len() passes.
    for _ in 0..names.len() {
        for name in names {
            let prereqs = deps.get(name).map(|v| v.as_slice()).unwrap_or(&[]);
            let best_prereq_path = prereqs
                .iter()
                .filter_map(|p| longest_ending_at.get(p.as_str()))
                .max_by_key(|path| path.len())
                .cloned();
            let candidate = match best_prereq_path {
                Some(mut path) => {
                    path.push(name.clone());
                    path
                }
                None => vec![name.clone()],
            };
            let improve = longest_ending_at
                .get(name.as_str())
                .map(|existing| candidate.len() > existing.len())
                .unwrap_or(true);
            if improve {
                longest_ending_at.insert(name.as_str(), candidate);
            }
        }
    }

    names
        .iter()
        .filter_map(|n| longest_ending_at.get(n.as_str()))
        .max_by_key(|path| path.len())
        .cloned()
        .unwrap_or_default()
}

/// `digraph DagWorkflow { rankdir=LR; ... }` with globals/sections styled differently
///.
pub fn export_dot(
    names: &[String],
    deps: &HashMap<String, Vec<String>>,
    scopes: &HashMap<String, Scope>,
) -> String {
    let mut out = String::from("digraph DagWorkflow {\n  rankdir=LR;\n");
    for name in names {
        let is_global = scopes.get(name).copied().unwrap_or(Scope::Section).is_global();
        let fill = if is_global { "lightblue" } else { "lightgreen" };
        out.push_str(&format!(
            "  \"{name}\" [style=filled, fillcolor={fill}];\n"
        ));
    }
    for name in names {
        if let Some(prereqs) = deps.get(name) {
            for prereq in prereqs {
                out.push_str(&format!("  \"{prereq}\" -> \"{name}\";\n"));
            }
        }
    }
    out.push_str("}\n");
    out
}

/// `{ nodes: [{id, label, type}], links: [{source, target}] }`.
pub fn export_json(
    names: &[String],
    deps: &HashMap<String, Vec<String>>,
    scopes: &HashMap<String, Scope>,
) -> JsonGraph {
    let nodes = names
        .iter()
        .map(|name| {
            let is_global = scopes.get(name).copied().unwrap_or(Scope::Section).is_global();
            JsonNode {
                id: name.clone(),
                label: name.clone(),
                kind: if is_global { "global" } else { "section" },
            }
        })
        .collect();
    let mut links = Vec::new();
    for name in names {
        if let Some(prereqs) = deps.get(name) {
            for prereq in prereqs {
                links.push(JsonLink {
                    source: prereq.clone(),
                    target: name.clone(),
                });
            }
        }
    }
    JsonGraph { nodes, links }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn deps_map(pairs: &[(&str, &[&str])]) -> HashMap<String, Vec<String>> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.iter().map(|s| s.to_string()).collect()))
            .collect()
    }

    #[test]
    fn linear_chain_sorts_a_b_c() {
        let names = vec!["a".to_string(), "b".to_string(), "c".to_string()];
        let deps = deps_map(&[("b", &["a"]), ("c", &["b"])]);
        let plan = plan(&names, &deps).unwrap();
        assert_eq!(plan.sorted, vec!["a", "b", "c"]);
        assert_eq!(plan.groups, vec![vec!["a"], vec!["b"], vec!["c"]]);
    }

    #[test]
    fn diamond_groups_a_then_bc_then_d() {
        let names = vec!["A".to_string(), "B".to_string(), "C".to_string(), "D".to_string()];
        let deps = deps_map(&[("B", &["A"]), ("C", &["A"]), ("D", &["B", "C"])]);
        let plan = plan(&names, &deps).unwrap();
        assert_eq!(
            plan.groups,
            vec![vec!["A"], vec!["B", "C"], vec!["D"]]
        );
    }

    #[test]
    fn cycle_is_reported_with_path_containing_all_members() {
        let names = vec!["a".to_string(), "b".to_string(), "c".to_string()];
        let deps = deps_map(&[("a", &["b"]), ("b", &["c"]), ("c", &["a"])]);
        let err = plan(&names, &deps).unwrap_err();
        match err {
            Error::CircularDependency { cycle } => {
                for member in ["a", "b", "c"] {
                    assert!(cycle.iter().any(|n| n == member), "cycle missing {member}");
                }
            }
            other => panic!("expected CircularDependency, got {other:?}"),
        }
    }

    #[test]
    fn missing_dependency_is_rejected() {
        let names = vec!["a".to_string()];
        let deps = deps_map(&[("a", &["ghost"])]);
        let err = plan(&names, &deps).unwrap_err();
        assert!(matches!(err, Error::MissingDependency { .. }));
    }

    #[test]
    fn bottleneck_requires_at_least_three_dependents() {
        let names: Vec<String> = ["root", "d1", "d2", "d3"].iter().map(|s| s.to_string()).collect();
        let deps = deps_map(&[("d1", &["root"]), ("d2", &["root"]), ("d3", &["root"])]);
        let analytics = analytics(&names, &deps).unwrap();
        assert_eq!(analytics.bottlenecks.len(), 1);
        assert_eq!(analytics.bottlenecks[0].dimension, "root");
        assert_eq!(analytics.bottlenecks[0].dependent_count, 3);
    }

    #[test]
    fn export_json_and_dot_agree_on_node_and_link_sets() {
        let names = vec!["a".to_string(), "b".to_string()];
        let deps = deps_map(&[("b", &["a"])]);
        let mut scopes = HashMap::new();
        scopes.insert("a".to_string(), Scope::Global);
        scopes.insert("b".to_string(), Scope::Section);

        let dot = export_dot(&names, &deps, &scopes);
        let json = export_json(&names, &deps, &scopes);

        assert!(dot.contains("lightblue"));
        assert!(dot.contains("\"a\" -> \"b\""));
        assert_eq!(json.nodes.len(), 2);
        assert_eq!(json.links.len(), 1);
        assert_eq!(json.links[0].source, "a");
        assert_eq!(json.links[0].target, "b");
    }
}
