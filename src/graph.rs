//! Cross-chunk dependency graph for a snapshot.
//!
//! A flat node store keyed by chunk id plus adjacency arrays; edges are
//! tagged `calls`, `imports`, or `uses`, weighted by call count. Built
//! post-hoc from persisted chunk metadata, the graph backs search-time
//! ranking: dependency navigation, reference counts, cycle detection,
//! topological ordering, strongly connected components, and a
//! degree-based centrality score.
//!
//! Chunk edges can be cyclic (mutually recursive functions), so every
//! traversal is a depth-first search carrying an explicit recursion-stack
//! set: a back edge is detected the moment it appears, topological
//! ordering fails explicitly on it, and nothing loops.

use std::collections::HashMap;

use anyhow::{bail, Result};
use uuid::Uuid;

use crate::models::{chunk_level, Chunk};

/// Relationship an edge encodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EdgeKind {
    Calls,
    Imports,
    Uses,
}

/// One directed edge between two node slots.
#[derive(Debug, Clone)]
pub struct Edge {
    pub from: usize,
    pub to: usize,
    pub kind: EdgeKind,
    /// Call count for `calls` edges, 1.0 otherwise.
    pub weight: f64,
}

#[derive(Debug, Default)]
pub struct ChunkGraph {
    /// Chunk ids in insertion order; the slot index is the node handle.
    nodes: Vec<Uuid>,
    index: HashMap<Uuid, usize>,
    edges: Vec<Edge>,
    /// Per node, indices into `edges` leaving it.
    outgoing: Vec<Vec<usize>>,
    /// Per node, indices into `edges` arriving at it.
    incoming: Vec<Vec<usize>>,
}

/// Bookkeeping for Tarjan's strongly-connected-components search.
struct TarjanState {
    index: Vec<usize>,
    lowlink: Vec<usize>,
    on_stack: Vec<bool>,
    stack: Vec<usize>,
    next_index: usize,
    components: Vec<Vec<usize>>,
}

const UNVISITED: usize = usize::MAX;

impl ChunkGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Assemble the graph from the chunks of one snapshot.
    ///
    /// Name resolution is syntactic: a `calls` edge is added when a chunk's
    /// called symbol matches another declaration chunk's name, a `uses`
    /// edge when a type dependency matches, and an `imports` edge from a
    /// declaration to the package-doc chunk of an internally imported
    /// directory.
    pub fn build(chunks: &[Chunk]) -> Self {
        let mut graph = Self::new();
        for chunk in chunks {
            graph.add_node(chunk.id);
        }

        // Declaration name -> chunk ids (names can repeat across files).
        let mut by_name: HashMap<&str, Vec<Uuid>> = HashMap::new();
        for chunk in chunks {
            if chunk.metadata.level == chunk_level::DECLARATION {
                if let Some(name) = chunk.metadata.name.as_deref() {
                    by_name.entry(name).or_default().push(chunk.id);
                }
            }
        }
        // Import path -> package-doc chunk (path matched by trailing dir).
        let package_docs: Vec<&Chunk> = chunks
            .iter()
            .filter(|c| c.metadata.level == chunk_level::FILE && c.metadata.kind == "package")
            .collect();

        for chunk in chunks {
            let deps = &chunk.metadata.dependencies;

            let mut call_counts: HashMap<&str, usize> = HashMap::new();
            for call in &deps.internal_calls {
                let base = call.rsplit('.').next().unwrap_or(call);
                *call_counts.entry(base).or_default() += 1;
            }
            for (name, count) in call_counts {
                if let Some(targets) = by_name.get(name) {
                    for target in targets {
                        if *target != chunk.id {
                            graph.add_edge(chunk.id, *target, EdgeKind::Calls, count as f64);
                        }
                    }
                }
            }

            for ty in &deps.type_dependencies {
                let base = ty.rsplit('.').next().unwrap_or(ty);
                if let Some(targets) = by_name.get(base) {
                    for target in targets {
                        if *target != chunk.id {
                            graph.add_edge(chunk.id, *target, EdgeKind::Uses, 1.0);
                        }
                    }
                }
            }

            for import in &deps.imports {
                let pkg = import.rsplit('/').next().unwrap_or(import);
                for doc in &package_docs {
                    if doc.metadata.name.as_deref() == Some(pkg) && doc.id != chunk.id {
                        graph.add_edge(chunk.id, doc.id, EdgeKind::Imports, 1.0);
                    }
                }
            }
        }
        graph
    }

    /// Register a chunk, returning its node slot. Idempotent per id.
    pub fn add_node(&mut self, id: Uuid) -> usize {
        match self.index.get(&id) {
            Some(&slot) => slot,
            None => {
                let slot = self.nodes.len();
                self.nodes.push(id);
                self.index.insert(id, slot);
                self.outgoing.push(Vec::new());
                self.incoming.push(Vec::new());
                slot
            }
        }
    }

    pub fn add_edge(&mut self, from: Uuid, to: Uuid, kind: EdgeKind, weight: f64) {
        let from = self.add_node(from);
        let to = self.add_node(to);
        let edge = self.edges.len();
        self.edges.push(Edge {
            from,
            to,
            kind,
            weight,
        });
        self.outgoing[from].push(edge);
        self.incoming[to].push(edge);
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn edge_count(&self) -> usize {
        self.edges.len()
    }

    pub fn contains(&self, id: Uuid) -> bool {
        self.index.contains_key(&id)
    }

    /// Chunks this chunk depends on (outgoing edges).
    pub fn dependencies_of(&self, id: Uuid) -> Vec<Uuid> {
        let Some(&slot) = self.index.get(&id) else {
            return Vec::new();
        };
        let mut out: Vec<Uuid> = self.outgoing[slot]
            .iter()
            .map(|&edge| self.nodes[self.edges[edge].to])
            .collect();
        out.sort();
        out.dedup();
        out
    }

    /// Chunks depending on this chunk (incoming edges).
    pub fn dependents_of(&self, id: Uuid) -> Vec<Uuid> {
        let Some(&slot) = self.index.get(&id) else {
            return Vec::new();
        };
        let mut out: Vec<Uuid> = self.incoming[slot]
            .iter()
            .map(|&edge| self.nodes[self.edges[edge].from])
            .collect();
        out.sort();
        out.dedup();
        out
    }

    /// Number of incoming references.
    pub fn reference_count(&self, id: Uuid) -> usize {
        self.index
            .get(&id)
            .map(|&slot| self.incoming[slot].len())
            .unwrap_or(0)
    }

    pub fn has_cycle(&self) -> bool {
        self.topological_order().is_err()
    }

    /// Topological order of all chunks. Fails explicitly when the graph is
    /// cyclic instead of producing a partial or looping traversal.
    pub fn topological_order(&self) -> Result<Vec<Uuid>> {
        let mut visited = vec![false; self.nodes.len()];
        let mut on_stack = vec![false; self.nodes.len()];
        let mut finished = Vec::with_capacity(self.nodes.len());
        for start in 0..self.nodes.len() {
            if !visited[start] {
                self.visit(start, &mut visited, &mut on_stack, &mut finished)?;
            }
        }
        finished.reverse();
        Ok(finished.into_iter().map(|slot| self.nodes[slot]).collect())
    }

    /// Depth-first visit in post-order. `on_stack` is the recursion-stack
    /// set; an edge into it is a back edge, i.e. a cycle.
    fn visit(
        &self,
        node: usize,
        visited: &mut [bool],
        on_stack: &mut [bool],
        finished: &mut Vec<usize>,
    ) -> Result<()> {
        visited[node] = true;
        on_stack[node] = true;
        for &edge in &self.outgoing[node] {
            let next = self.edges[edge].to;
            if on_stack[next] {
                bail!("dependency graph is cyclic at chunk {}", self.nodes[next]);
            }
            if !visited[next] {
                self.visit(next, visited, on_stack, finished)?;
            }
        }
        on_stack[node] = false;
        finished.push(node);
        Ok(())
    }

    /// Strongly connected components (Tarjan); components of size > 1 are
    /// cycles.
    pub fn strongly_connected_components(&self) -> Vec<Vec<Uuid>> {
        let n = self.nodes.len();
        let mut state = TarjanState {
            index: vec![UNVISITED; n],
            lowlink: vec![0; n],
            on_stack: vec![false; n],
            stack: Vec::new(),
            next_index: 0,
            components: Vec::new(),
        };
        for node in 0..n {
            if state.index[node] == UNVISITED {
                self.strongconnect(node, &mut state);
            }
        }
        state
            .components
            .into_iter()
            .map(|component| component.into_iter().map(|slot| self.nodes[slot]).collect())
            .collect()
    }

    fn strongconnect(&self, node: usize, state: &mut TarjanState) {
        state.index[node] = state.next_index;
        state.lowlink[node] = state.next_index;
        state.next_index += 1;
        state.stack.push(node);
        state.on_stack[node] = true;

        for &edge in &self.outgoing[node] {
            let next = self.edges[edge].to;
            if state.index[next] == UNVISITED {
                self.strongconnect(next, state);
                state.lowlink[node] = state.lowlink[node].min(state.lowlink[next]);
            } else if state.on_stack[next] {
                state.lowlink[node] = state.lowlink[node].min(state.index[next]);
            }
        }

        // Root of a component: pop the stack down to this node.
        if state.lowlink[node] == state.index[node] {
            let mut component = Vec::new();
            while let Some(top) = state.stack.pop() {
                state.on_stack[top] = false;
                component.push(top);
                if top == node {
                    break;
                }
            }
            state.components.push(component);
        }
    }

    /// Degree centrality per chunk, min-max normalized to [0, 1]:
    /// `in + out + in·out·0.1` before normalization.
    pub fn centrality_scores(&self) -> HashMap<Uuid, f64> {
        let mut raw: HashMap<Uuid, f64> = HashMap::new();
        for (slot, &id) in self.nodes.iter().enumerate() {
            let indeg = self.incoming[slot].len() as f64;
            let outdeg = self.outgoing[slot].len() as f64;
            raw.insert(id, indeg + outdeg + indeg * outdeg * 0.1);
        }
        let min = raw.values().cloned().fold(f64::INFINITY, f64::min);
        let max = raw.values().cloned().fold(f64::NEG_INFINITY, f64::max);
        if !min.is_finite() || (max - min).abs() < f64::EPSILON {
            return raw.into_keys().map(|id| (id, 0.0)).collect();
        }
        raw.into_iter()
            .map(|(id, score)| (id, (score - min) / (max - min)))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ChunkMetadata, DependencyInfo};

    fn decl_chunk(name: &str, calls: &[&str]) -> Chunk {
        Chunk {
            id: Uuid::new_v4(),
            file_id: Uuid::new_v4(),
            ordinal: 0,
            start_line: 1,
            end_line: 5,
            content: format!("func {name}() {{}}"),
            content_hash: crate::models::content_hash(name.as_bytes()),
            token_count: 12,
            metadata: ChunkMetadata {
                level: chunk_level::DECLARATION,
                kind: "function".to_string(),
                name: Some(name.to_string()),
                dependencies: DependencyInfo {
                    internal_calls: calls.iter().map(|c| c.to_string()).collect(),
                    ..DependencyInfo::default()
                },
                ..ChunkMetadata::default()
            },
            snapshot_id: Uuid::nil(),
            commit_hash: None,
            author: None,
            updated_at: None,
            is_latest: true,
            chunk_key: "p/s/f.go#L1-L5:0@v".to_string(),
        }
    }

    #[test]
    fn test_calls_edges_resolve_by_name() {
        let a = decl_chunk("Alpha", &["Beta"]);
        let b = decl_chunk("Beta", &[]);
        let graph = ChunkGraph::build(&[a.clone(), b.clone()]);
        assert_eq!(graph.dependencies_of(a.id), vec![b.id]);
        assert_eq!(graph.dependents_of(b.id), vec![a.id]);
        assert_eq!(graph.reference_count(b.id), 1);
    }

    #[test]
    fn test_acyclic_topological_order() {
        let a = decl_chunk("Alpha", &["Beta"]);
        let b = decl_chunk("Beta", &["Gamma"]);
        let c = decl_chunk("Gamma", &[]);
        let graph = ChunkGraph::build(&[a.clone(), b.clone(), c.clone()]);
        assert!(!graph.has_cycle());
        let order = graph.topological_order().unwrap();
        let pos = |id| order.iter().position(|&x| x == id).unwrap();
        assert!(pos(a.id) < pos(b.id));
        assert!(pos(b.id) < pos(c.id));
    }

    #[test]
    fn test_mutual_recursion_detected_and_topo_fails() {
        let a = decl_chunk("Ping", &["Pong"]);
        let b = decl_chunk("Pong", &["Ping"]);
        let graph = ChunkGraph::build(&[a.clone(), b.clone()]);
        assert!(graph.has_cycle());
        assert!(graph.topological_order().is_err());

        let sccs = graph.strongly_connected_components();
        let cycle = sccs.iter().find(|c| c.len() > 1).expect("cycle component");
        assert!(cycle.contains(&a.id) && cycle.contains(&b.id));
    }

    #[test]
    fn test_centrality_normalized() {
        let hub = decl_chunk("Hub", &["A", "B", "C"]);
        let a = decl_chunk("A", &["Hub"]);
        let b = decl_chunk("B", &[]);
        let c = decl_chunk("C", &[]);
        let graph = ChunkGraph::build(&[hub.clone(), a.clone(), b.clone(), c.clone()]);
        let scores = graph.centrality_scores();
        assert!((scores[&hub.id] - 1.0).abs() < 1e-9, "hub has max score");
        for score in scores.values() {
            assert!((0.0..=1.0).contains(score));
        }
    }

    #[test]
    fn test_missing_node_queries_are_empty() {
        let graph = ChunkGraph::new();
        let ghost = Uuid::new_v4();
        assert!(graph.dependencies_of(ghost).is_empty());
        assert_eq!(graph.reference_count(ghost), 0);
    }

    #[test]
    fn test_self_reference_not_added() {
        let a = decl_chunk("Recurse", &["Recurse"]);
        let graph = ChunkGraph::build(&[a.clone()]);
        assert_eq!(graph.edge_count(), 0);
        assert!(!graph.has_cycle());
    }

    #[test]
    fn test_back_edge_found_mid_traversal() {
        // a → b → c → b: the cycle sits below the DFS root.
        let a = decl_chunk("Outer", &["Middle"]);
        let b = decl_chunk("Middle", &["Inner"]);
        let c = decl_chunk("Inner", &["Middle"]);
        let graph = ChunkGraph::build(&[a.clone(), b.clone(), c.clone()]);
        assert!(graph.has_cycle());
        let err = graph.topological_order().unwrap_err().to_string();
        assert!(err.contains("cyclic"));

        let sccs = graph.strongly_connected_components();
        let cycle = sccs.iter().find(|s| s.len() > 1).expect("cycle component");
        assert!(cycle.contains(&b.id) && cycle.contains(&c.id));
        assert!(!cycle.contains(&a.id));
    }
}
