//! DAG validation: run this before persisting or executing a graph.
//!
//! Checks run in a fixed order and stop at the first violation:
//! 1. Nodes: non-empty set, non-empty unique ids and labels, well-formed
//!    payloads on task nodes only, exactly one `start` and one `end`.
//! 2. Edges: non-empty unique ids, existing endpoints, no self-loops, nothing
//!    leaves `end`, nothing enters `start`.
//! 3. Cycles: three-colour DFS; the reported path closes on itself.
//! 4. Reachability: every node is reachable from `start` and reaches `end`.
//!
//! [`topological_sort`] orders nodes with Kahn's algorithm, taking the
//! lexicographically smallest ready id first so the order is reproducible.

use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};

use crate::error::ValidationError;
use crate::models::{Graph, NodeKind};

type Adjacency<'a> = HashMap<&'a str, Vec<&'a str>>;

/// Validate the graph's structure.
///
/// # Errors
/// The first [`ValidationError`] encountered, in the order listed in the
/// module docs.
pub fn validate_graph(graph: &Graph) -> Result<(), ValidationError> {
    check_nodes(graph)?;
    check_edges(graph)?;
    detect_cycles(graph)?;
    check_reachability(graph)?;
    Ok(())
}

/// Validate the graph and return its node ids in execution order.
pub fn validate_and_sort(graph: &Graph) -> Result<Vec<String>, ValidationError> {
    validate_graph(graph)?;
    topological_sort(graph)
}

/// Kahn's algorithm with a lexicographic tie-break.
///
/// Edges pointing at unknown nodes are ignored here; [`validate_graph`]
/// rejects them.
///
/// # Errors
/// [`ValidationError::CycleDetected`] listing the nodes that could not be
/// placed when the graph is not acyclic.
pub fn topological_sort(graph: &Graph) -> Result<Vec<String>, ValidationError> {
    let adjacency = forward_adjacency(graph);

    let mut in_degree: HashMap<&str, usize> =
        graph.nodes.iter().map(|n| (n.id.as_str(), 0)).collect();
    for edge in &graph.edges {
        if let Some(degree) = in_degree.get_mut(edge.target.as_str()) {
            *degree += 1;
        }
    }

    let mut ready: BTreeSet<&str> = in_degree
        .iter()
        .filter(|(_, &d)| d == 0)
        .map(|(&id, _)| id)
        .collect();

    let mut sorted: Vec<String> = Vec::with_capacity(graph.nodes.len());

    while let Some(node_id) = ready.pop_first() {
        sorted.push(node_id.to_owned());

        for &next in adjacency.get(node_id).into_iter().flatten() {
            if let Some(degree) = in_degree.get_mut(next) {
                *degree -= 1;
                if *degree == 0 {
                    ready.insert(next);
                }
            }
        }
    }

    if sorted.len() != graph.nodes.len() {
        let placed: HashSet<&str> = sorted.iter().map(String::as_str).collect();
        let remaining: BTreeSet<String> = graph
            .nodes
            .iter()
            .filter(|n| !placed.contains(n.id.as_str()))
            .map(|n| n.id.clone())
            .collect();
        return Err(ValidationError::CycleDetected {
            path: remaining.into_iter().collect(),
        });
    }

    Ok(sorted)
}

/// `dependencies[node] = [sources of every edge into node]`, in edge order.
pub fn dependency_map(graph: &Graph) -> HashMap<String, Vec<String>> {
    let mut dependencies: HashMap<String, Vec<String>> = HashMap::new();
    for edge in &graph.edges {
        dependencies
            .entry(edge.target.clone())
            .or_default()
            .push(edge.source.clone());
    }
    dependencies
}

// ---------------------------------------------------------------------------
// 1. Nodes
// ---------------------------------------------------------------------------

fn check_nodes(graph: &Graph) -> Result<(), ValidationError> {
    if graph.nodes.is_empty() {
        return Err(ValidationError::EmptyGraph);
    }

    let mut seen_ids: HashSet<&str> = HashSet::new();
    let mut starts = 0;
    let mut ends = 0;

    for (index, node) in graph.nodes.iter().enumerate() {
        if node.id.is_empty() {
            return Err(ValidationError::EmptyNodeId { index });
        }
        if !seen_ids.insert(node.id.as_str()) {
            return Err(ValidationError::DuplicateNodeId(node.id.clone()));
        }
        if node.label.trim().is_empty() {
            return Err(ValidationError::EmptyLabel(node.id.clone()));
        }

        match node.kind {
            NodeKind::Start => starts += 1,
            NodeKind::End => ends += 1,
            NodeKind::Task => {}
        }

        match (node.kind, &node.work) {
            (NodeKind::Task, None) => {
                return Err(ValidationError::MissingPayload {
                    node_id: node.id.clone(),
                });
            }
            (NodeKind::Task, Some(work)) => {
                work.validate()
                    .map_err(|source| ValidationError::InvalidPayload {
                        node_id: node.id.clone(),
                        source,
                    })?;
            }
            (kind, Some(_)) => {
                return Err(ValidationError::UnexpectedPayload {
                    node_id: node.id.clone(),
                    kind,
                });
            }
            (_, None) => {}
        }
    }

    if starts != 1 {
        return Err(ValidationError::Cardinality {
            kind: NodeKind::Start,
            count: starts,
        });
    }
    if ends != 1 {
        return Err(ValidationError::Cardinality {
            kind: NodeKind::End,
            count: ends,
        });
    }

    Ok(())
}

// ---------------------------------------------------------------------------
// 2. Edges
// ---------------------------------------------------------------------------

fn check_edges(graph: &Graph) -> Result<(), ValidationError> {
    let kinds: HashMap<&str, NodeKind> = graph
        .nodes
        .iter()
        .map(|n| (n.id.as_str(), n.kind))
        .collect();

    let mut seen_ids: HashSet<&str> = HashSet::new();

    for (index, edge) in graph.edges.iter().enumerate() {
        if edge.id.is_empty() {
            return Err(ValidationError::EmptyEdgeId { index });
        }
        if !seen_ids.insert(edge.id.as_str()) {
            return Err(ValidationError::DuplicateEdgeId(edge.id.clone()));
        }

        let Some(&source_kind) = kinds.get(edge.source.as_str()) else {
            return Err(ValidationError::UnknownNodeReference {
                edge_id: edge.id.clone(),
                node_id: edge.source.clone(),
                side: "source",
            });
        };
        let Some(&target_kind) = kinds.get(edge.target.as_str()) else {
            return Err(ValidationError::UnknownNodeReference {
                edge_id: edge.id.clone(),
                node_id: edge.target.clone(),
                side: "target",
            });
        };

        if edge.source == edge.target {
            return Err(ValidationError::SelfLoop {
                edge_id: edge.id.clone(),
                node_id: edge.source.clone(),
            });
        }
        if source_kind == NodeKind::End {
            return Err(ValidationError::EdgeFromEnd {
                edge_id: edge.id.clone(),
                node_id: edge.source.clone(),
            });
        }
        if target_kind == NodeKind::Start {
            return Err(ValidationError::EdgeIntoStart {
                edge_id: edge.id.clone(),
                node_id: edge.target.clone(),
            });
        }
    }

    Ok(())
}

// ---------------------------------------------------------------------------
// 3. Cycles
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mark {
    InProgress,
    Done,
}

fn detect_cycles(graph: &Graph) -> Result<(), ValidationError> {
    let adjacency = forward_adjacency(graph);
    let mut marks: HashMap<&str, Mark> = HashMap::new();
    let mut path: Vec<&str> = Vec::new();

    for node in &graph.nodes {
        if !marks.contains_key(node.id.as_str()) {
            visit(node.id.as_str(), &adjacency, &mut marks, &mut path)?;
        }
    }
    Ok(())
}

fn visit<'a>(
    node: &'a str,
    adjacency: &Adjacency<'a>,
    marks: &mut HashMap<&'a str, Mark>,
    path: &mut Vec<&'a str>,
) -> Result<(), ValidationError> {
    marks.insert(node, Mark::InProgress);
    path.push(node);

    for &next in adjacency.get(node).into_iter().flatten() {
        match marks.get(next) {
            Some(Mark::InProgress) => {
                let from = path.iter().position(|&n| n == next).unwrap_or(0);
                let mut cycle: Vec<String> =
                    path[from..].iter().map(|n| n.to_string()).collect();
                cycle.push(next.to_string());
                return Err(ValidationError::CycleDetected { path: cycle });
            }
            Some(Mark::Done) => {}
            None => visit(next, adjacency, marks, path)?,
        }
    }

    path.pop();
    marks.insert(node, Mark::Done);
    Ok(())
}

// ---------------------------------------------------------------------------
// 4. Reachability
// ---------------------------------------------------------------------------

fn check_reachability(graph: &Graph) -> Result<(), ValidationError> {
    let find = |kind: NodeKind| {
        graph
            .nodes
            .iter()
            .find(|n| n.kind == kind)
            .map(|n| n.id.as_str())
            .ok_or(ValidationError::Cardinality { kind, count: 0 })
    };
    let start = find(NodeKind::Start)?;
    let end = find(NodeKind::End)?;

    let from_start = bfs(start, &forward_adjacency(graph));
    let to_end = bfs(end, &reverse_adjacency(graph));

    for node in &graph.nodes {
        if !from_start.contains(node.id.as_str()) {
            return Err(ValidationError::UnreachableFromStart(node.id.clone()));
        }
        if !to_end.contains(node.id.as_str()) {
            return Err(ValidationError::CannotReachEnd(node.id.clone()));
        }
    }
    Ok(())
}

fn bfs<'a>(origin: &'a str, adjacency: &Adjacency<'a>) -> HashSet<&'a str> {
    let mut visited: HashSet<&str> = HashSet::from([origin]);
    let mut queue: VecDeque<&str> = VecDeque::from([origin]);

    while let Some(current) = queue.pop_front() {
        for &next in adjacency.get(current).into_iter().flatten() {
            if visited.insert(next) {
                queue.push_back(next);
            }
        }
    }
    visited
}

fn forward_adjacency(graph: &Graph) -> Adjacency<'_> {
    let mut adjacency: Adjacency<'_> = HashMap::new();
    for edge in &graph.edges {
        adjacency
            .entry(edge.source.as_str())
            .or_default()
            .push(edge.target.as_str());
    }
    adjacency
}

fn reverse_adjacency(graph: &Graph) -> Adjacency<'_> {
    let mut adjacency: Adjacency<'_> = HashMap::new();
    for edge in &graph.edges {
        adjacency
            .entry(edge.target.as_str())
            .or_default()
            .push(edge.source.as_str());
    }
    adjacency
}
