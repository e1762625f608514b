//! Sentence graph: the directed acyclic graph of every training phrasing.
//!
//! A single start node fans out to one root per intent (edge labelled with the
//! intent marker). Every path from an intent root to the single end node is
//! one utterance. Edges carry an optional input token (a literal word) and an
//! optional output label marking intents and slot boundaries.

use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};
use std::fmt;

use crate::error::{NluError, NluResult};

mod grammar;

pub use grammar::{GraphBuilder, TemplateGrammar};

/// Opaque node identifier.
pub type NodeId = usize;

const INTENT_PREFIX: &str = "__label__";
const BEGIN_PREFIX: &str = "__begin__";
const END_PREFIX: &str = "__end__";
const SOURCE_PREFIX: &str = "__source__";

/// Structural label carried on an edge.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum OutputLabel {
    /// Edge from the start node into an intent's subgraph.
    IntentRoot(String),
    SlotBegin(String),
    SlotEnd(String),
    /// The enclosing slot takes its entity from a named source (list or built-in).
    EntitySource(String),
    /// Any label outside the structural vocabulary; ignored by the compiler.
    Other(String),
}

impl OutputLabel {
    /// Decode the string form (`__label__SetLight`, `__begin__name`, ...).
    pub fn parse(label: &str) -> Self {
        if let Some(name) = label.strip_prefix(INTENT_PREFIX) {
            OutputLabel::IntentRoot(name.to_string())
        } else if let Some(name) = label.strip_prefix(BEGIN_PREFIX) {
            OutputLabel::SlotBegin(name.to_string())
        } else if let Some(name) = label.strip_prefix(END_PREFIX) {
            OutputLabel::SlotEnd(name.to_string())
        } else if let Some(name) = label.strip_prefix(SOURCE_PREFIX) {
            OutputLabel::EntitySource(name.to_string())
        } else {
            OutputLabel::Other(label.to_string())
        }
    }
}

impl fmt::Display for OutputLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OutputLabel::IntentRoot(name) => write!(f, "{INTENT_PREFIX}{name}"),
            OutputLabel::SlotBegin(name) => write!(f, "{BEGIN_PREFIX}{name}"),
            OutputLabel::SlotEnd(name) => write!(f, "{END_PREFIX}{name}"),
            OutputLabel::EntitySource(name) => write!(f, "{SOURCE_PREFIX}{name}"),
            OutputLabel::Other(label) => write!(f, "{label}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct GraphEdge {
    pub from: NodeId,
    pub to: NodeId,
    pub input: Option<String>,
    pub output: Option<OutputLabel>,
}

/// Directed graph with adjacency indices keyed by node id.
#[derive(Debug, Clone, Default)]
pub struct SentenceGraph {
    nodes: BTreeSet<NodeId>,
    edges: Vec<GraphEdge>,
    /// Index: node → outgoing edge indices (insertion order)
    outgoing: HashMap<NodeId, Vec<usize>>,
    /// Index: node → incoming edge indices
    incoming: HashMap<NodeId, Vec<usize>>,
    start: Option<NodeId>,
    end: Option<NodeId>,
}

impl SentenceGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate a fresh node.
    pub fn add_node(&mut self) -> NodeId {
        let id = self.nodes.last().map(|n| n + 1).unwrap_or(0);
        self.nodes.insert(id);
        id
    }

    /// Add an edge; unknown node ids are registered on the fly.
    pub fn add_edge(
        &mut self,
        from: NodeId,
        to: NodeId,
        input: Option<&str>,
        output: Option<OutputLabel>,
    ) -> usize {
        self.nodes.insert(from);
        self.nodes.insert(to);

        let edge_idx = self.edges.len();
        self.edges.push(GraphEdge {
            from,
            to,
            input: input.map(str::to_string),
            output,
        });
        self.outgoing.entry(from).or_default().push(edge_idx);
        self.incoming.entry(to).or_default().push(edge_idx);
        edge_idx
    }

    pub fn set_start(&mut self, node: NodeId) {
        self.nodes.insert(node);
        self.start = Some(node);
    }

    pub fn set_end(&mut self, node: NodeId) {
        self.nodes.insert(node);
        self.end = Some(node);
    }

    /// Explicit start node, else the unique node without incoming edges.
    pub fn start_node(&self) -> Option<NodeId> {
        self.start.or_else(|| {
            self.unique_node(|n| self.incoming.get(&n).map_or(true, Vec::is_empty))
        })
    }

    /// Explicit end node, else the unique node without outgoing edges.
    pub fn end_node(&self) -> Option<NodeId> {
        self.end.or_else(|| {
            self.unique_node(|n| self.outgoing.get(&n).map_or(true, Vec::is_empty))
        })
    }

    fn unique_node(&self, pred: impl Fn(NodeId) -> bool) -> Option<NodeId> {
        let mut matching = self.nodes.iter().copied().filter(|&n| pred(n));
        let first = matching.next()?;
        match matching.next() {
            Some(_) => None,
            None => Some(first),
        }
    }

    pub fn edge(&self, idx: usize) -> &GraphEdge {
        &self.edges[idx]
    }

    /// Outgoing edge indices of `node`, in insertion order.
    pub fn outgoing(&self, node: NodeId) -> &[usize] {
        self.outgoing.get(&node).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn outgoing_edges(&self, node: NodeId) -> impl Iterator<Item = &GraphEdge> + '_ {
        self.outgoing(node).iter().map(move |&i| &self.edges[i])
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn edge_count(&self) -> usize {
        self.edges.len()
    }

    /// Reject cycles (Kahn's algorithm).
    pub fn check_acyclic(&self) -> NluResult<()> {
        let mut in_degree: HashMap<NodeId, usize> = self
            .nodes
            .iter()
            .map(|&n| (n, self.incoming.get(&n).map_or(0, Vec::len)))
            .collect();

        let mut ready: VecDeque<NodeId> = in_degree
            .iter()
            .filter(|(_, &d)| d == 0)
            .map(|(&n, _)| n)
            .collect();

        let mut visited = 0;
        while let Some(node) = ready.pop_front() {
            visited += 1;
            for &edge_idx in self.outgoing(node) {
                let to = self.edges[edge_idx].to;
                if let Some(d) = in_degree.get_mut(&to) {
                    *d -= 1;
                    if *d == 0 {
                        ready.push_back(to);
                    }
                }
            }
        }

        if visited == self.nodes.len() {
            Ok(())
        } else {
            Err(NluError::Configuration(
                "Sentence graph contains a cycle".into(),
            ))
        }
    }

    /// Every simple path from `source` to `target`, as edge-index sequences.
    ///
    /// Depth-first with an explicit stack of `(node, next outgoing cursor)`
    /// frames; a node is never revisited within one path. Parallel edges give
    /// distinct paths.
    pub fn simple_paths(&self, source: NodeId, target: NodeId) -> Vec<Vec<usize>> {
        let mut paths = Vec::new();
        if source == target {
            return paths;
        }

        let mut on_path: HashSet<NodeId> = HashSet::from([source]);
        let mut path: Vec<usize> = Vec::new();
        let mut stack: Vec<(NodeId, usize)> = vec![(source, 0)];

        while let Some(frame) = stack.last_mut() {
            let node = frame.0;
            let out = self.outgoing(node);
            if frame.1 >= out.len() {
                stack.pop();
                on_path.remove(&node);
                path.pop();
                continue;
            }

            let edge_idx = out[frame.1];
            frame.1 += 1;

            let next = self.edges[edge_idx].to;
            if next == target {
                let mut found = path.clone();
                found.push(edge_idx);
                paths.push(found);
            } else if on_path.insert(next) {
                path.push(edge_idx);
                stack.push((next, 0));
            }
        }

        paths
    }
}
