//! Selection graphs
//!
//! A negation-free predicate is flattened into source vertices (its leaves)
//! and logic vertices (its AND/OR nodes), each pointing at its parent. The
//! root has no parent. Matching walks upward from the sources that fired.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use trellis_core::{Leaf, Predicate, Result, TrellisError};

/// Vertex id; the root is always 0.
pub type VertexId = u32;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogicKind {
    And,
    Or,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceNode {
    pub leaf: Leaf,
    pub parent: Option<VertexId>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogicNode {
    pub kind: LogicKind,
    pub parent: Option<VertexId>,
}

/// Compiled, incrementally matchable form of a selection
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SelectionGraph {
    pub sources: BTreeMap<VertexId, SourceNode>,
    pub logic: BTreeMap<VertexId, LogicNode>,
}

impl SelectionGraph {
    /// Compile a predicate. Fails with `UnsupportedPredicate` on negation.
    pub fn compile(predicate: &Predicate) -> Result<Self> {
        // Pass 1: breadth-first vertex numbering into an arena.
        let mut arena: Vec<(&Predicate, Option<VertexId>)> = vec![(predicate, None)];
        let mut queue = VecDeque::from([0usize]);
        while let Some(index) = queue.pop_front() {
            let node = arena[index].0;
            for child in node.children() {
                arena.push((child, Some(index as VertexId)));
                queue.push_back(arena.len() - 1);
            }
        }

        // Pass 2: classify each vertex.
        let mut graph = SelectionGraph {
            sources: BTreeMap::new(),
            logic: BTreeMap::new(),
        };
        for (index, (node, parent)) in arena.into_iter().enumerate() {
            let id = index as VertexId;
            match node {
                Predicate::And(..) => {
                    graph.logic.insert(
                        id,
                        LogicNode {
                            kind: LogicKind::And,
                            parent,
                        },
                    );
                }
                Predicate::Or(..) => {
                    graph.logic.insert(
                        id,
                        LogicNode {
                            kind: LogicKind::Or,
                            parent,
                        },
                    );
                }
                Predicate::Not(_) => {
                    return Err(TrellisError::UnsupportedPredicate(format!(
                        "negation cannot be matched incrementally: {}",
                        node
                    )))
                }
                Predicate::Exact { .. } | Predicate::Any { .. } => {
                    if let Some(leaf) = node.as_leaf() {
                        graph.sources.insert(id, SourceNode { leaf, parent });
                    }
                }
            }
        }
        Ok(graph)
    }

    /// `(input key, parent vertex)` for every source, in vertex order.
    pub fn input_edges(&self) -> impl Iterator<Item = (String, Option<VertexId>)> + '_ {
        self.sources
            .values()
            .map(|source| (source.leaf.input_key(), source.parent))
    }

    /// Distinct input keys this graph listens on.
    pub fn input_keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.input_edges().map(|(key, _)| key).collect();
        keys.sort();
        keys.dedup();
        keys
    }

    /// Whether the root is reached from the given parent vertices, one entry
    /// per source that fired.
    ///
    /// Each logic vertex propagates at most once. An AND propagates on the
    /// second arrival, an OR on the first.
    pub fn fires<I>(&self, fired_parents: I) -> bool
    where
        I: IntoIterator<Item = Option<VertexId>>,
    {
        let mut queue: VecDeque<Option<VertexId>> = fired_parents.into_iter().collect();
        let mut and_arrivals: HashMap<VertexId, u8> = HashMap::new();
        let mut propagated: HashSet<VertexId> = HashSet::new();

        while let Some(next) = queue.pop_front() {
            let Some(vertex) = next else {
                return true;
            };
            if propagated.contains(&vertex) {
                continue;
            }
            let Some(node) = self.logic.get(&vertex) else {
                tracing::trace!(vertex, "Input points at a vertex that is not a logic node");
                continue;
            };

            let ready = match node.kind {
                LogicKind::Or => true,
                LogicKind::And => {
                    let arrivals = and_arrivals.entry(vertex).or_insert(0);
                    *arrivals += 1;
                    *arrivals >= 2
                }
            };
            if ready {
                propagated.insert(vertex);
                queue.push_back(node.parent);
            }
        }
        false
    }
}
