//! Graph construction from session dependency declarations.
//!
//! The builder checks the structural things that make a graph unusable
//! (duplicate ids, dependencies on ids nobody declared). Cycles are a
//! property of a well-formed graph and are found by the analysis pass.

use crate::errors::GraphError;
use crate::state::{Phase, Session, SessionId};
use std::collections::{BTreeSet, HashMap, HashSet};

/// Index into the node list.
pub type NodeIndex = usize;

/// What the graph needs to know about one session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GraphNode {
    pub id: SessionId,
    pub depends_on: BTreeSet<SessionId>,
    pub estimated_minutes: u32,
}

impl GraphNode {
    pub fn new(id: SessionId, depends_on: impl IntoIterator<Item = SessionId>, estimated_minutes: u32) -> Self {
        Self {
            id,
            depends_on: depends_on.into_iter().collect(),
            estimated_minutes,
        }
    }
}

impl From<&Session> for GraphNode {
    fn from(session: &Session) -> Self {
        Self {
            id: session.id,
            depends_on: session.depends_on.clone(),
            estimated_minutes: session.estimated_minutes,
        }
    }
}

/// A directed graph of sessions. Edges run from a dependency to its dependent.
#[derive(Debug)]
pub struct DependencyGraph {
    nodes: Vec<GraphNode>,
    /// Map from session id to index
    index_map: HashMap<SessionId, NodeIndex>,
    /// index -> nodes that depend on it
    forward_edges: Vec<Vec<NodeIndex>>,
    /// index -> nodes it depends on (within the graph)
    reverse_edges: Vec<Vec<NodeIndex>>,
    /// Dependencies on sessions outside the graph (earlier phases)
    external: BTreeSet<SessionId>,
}

impl DependencyGraph {
    /// Build from a slice of sessions, rejecting any dependency outside it.
    pub fn from_sessions(sessions: &[Session]) -> Result<Self, GraphError> {
        GraphBuilder::new(sessions.iter().map(GraphNode::from).collect()).build()
    }

    /// Build the graph for one phase. Dependencies on any id in `known`
    /// (sessions of other phases) are accepted as external.
    pub fn for_phase(
        phase: &Phase,
        known: impl IntoIterator<Item = SessionId>,
    ) -> Result<Self, GraphError> {
        GraphBuilder::new(phase.sessions.iter().map(GraphNode::from).collect())
            .with_external(known)
            .build()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn node(&self, index: NodeIndex) -> Option<&GraphNode> {
        self.nodes.get(index)
    }

    pub fn node_by_id(&self, id: SessionId) -> Option<&GraphNode> {
        self.index_map.get(&id).and_then(|&i| self.nodes.get(i))
    }

    pub fn index_of(&self, id: SessionId) -> Option<NodeIndex> {
        self.index_map.get(&id).copied()
    }

    pub fn nodes(&self) -> &[GraphNode] {
        &self.nodes
    }

    pub fn ids(&self) -> Vec<SessionId> {
        self.nodes.iter().map(|n| n.id).collect()
    }

    /// Nodes that depend on the given node.
    pub fn dependents(&self, index: NodeIndex) -> &[NodeIndex] {
        self.forward_edges.get(index).map_or(&[], |v| v.as_slice())
    }

    /// In-graph nodes the given node depends on.
    pub fn dependencies(&self, index: NodeIndex) -> &[NodeIndex] {
        self.reverse_edges.get(index).map_or(&[], |v| v.as_slice())
    }

    /// Dependencies that live outside this graph.
    pub fn external_dependencies(&self, index: NodeIndex) -> Vec<SessionId> {
        self.node(index)
            .map(|n| {
                n.depends_on
                    .iter()
                    .copied()
                    .filter(|id| !self.index_map.contains_key(id))
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn external_ids(&self) -> &BTreeSet<SessionId> {
        &self.external
    }

    /// Nodes with no in-graph dependencies (entry points).
    pub fn root_nodes(&self) -> Vec<NodeIndex> {
        self.reverse_edges
            .iter()
            .enumerate()
            .filter(|(_, deps)| deps.is_empty())
            .map(|(i, _)| i)
            .collect()
    }

    /// Nodes nothing depends on (exit points).
    pub fn leaf_nodes(&self) -> Vec<NodeIndex> {
        self.forward_edges
            .iter()
            .enumerate()
            .filter(|(_, deps)| deps.is_empty())
            .map(|(i, _)| i)
            .collect()
    }

    /// True when every declared dependency, internal or external, is in `completed`.
    pub fn dependencies_satisfied(&self, id: SessionId, completed: &HashSet<SessionId>) -> bool {
        self.node_by_id(id)
            .is_some_and(|n| n.depends_on.iter().all(|dep| completed.contains(dep)))
    }
}

/// Builder for [`DependencyGraph`].
pub struct GraphBuilder {
    nodes: Vec<GraphNode>,
    external: HashSet<SessionId>,
}

impl GraphBuilder {
    pub fn new(nodes: Vec<GraphNode>) -> Self {
        Self {
            nodes,
            external: HashSet::new(),
        }
    }

    /// Ids that may be depended on without being part of the graph.
    pub fn with_external(mut self, ids: impl IntoIterator<Item = SessionId>) -> Self {
        self.external.extend(ids);
        self
    }

    /// Build the graph.
    ///
    /// Fails on duplicate ids and on dependencies that are neither in the
    /// graph nor declared external. Cycles are not checked here; see
    /// [`DependencyGraph::validate`].
    pub fn build(self) -> Result<DependencyGraph, GraphError> {
        let mut index_map = HashMap::new();
        for (i, node) in self.nodes.iter().enumerate() {
            if index_map.insert(node.id, i).is_some() {
                return Err(GraphError::DuplicateSession(node.id));
            }
        }

        let mut forward_edges: Vec<Vec<NodeIndex>> = vec![Vec::new(); self.nodes.len()];
        let mut reverse_edges: Vec<Vec<NodeIndex>> = vec![Vec::new(); self.nodes.len()];
        let mut external = BTreeSet::new();

        for (to_idx, node) in self.nodes.iter().enumerate() {
            for dep in &node.depends_on {
                match index_map.get(dep) {
                    Some(&from_idx) => {
                        forward_edges[from_idx].push(to_idx);
                        reverse_edges[to_idx].push(from_idx);
                    }
                    None if self.external.contains(dep) => {
                        external.insert(*dep);
                    }
                    None => {
                        return Err(GraphError::MissingDependency {
                            session: node.id,
                            dependency: *dep,
                        });
                    }
                }
            }
        }

        Ok(DependencyGraph {
            nodes: self.nodes,
            index_map,
            forward_edges,
            reverse_edges,
            external,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(id: SessionId, deps: &[SessionId]) -> GraphNode {
        GraphNode::new(id, deps.iter().copied(), 10)
    }

    #[test]
    fn test_build_simple_graph() {
        let graph = GraphBuilder::new(vec![
            node(1, &[]),
            node(2, &[1]),
            node(3, &[1]),
            node(4, &[2, 3]),
        ])
        .build()
        .unwrap();

        assert_eq!(graph.len(), 4);
        assert_eq!(graph.root_nodes(), vec![0]);
        assert_eq!(graph.leaf_nodes(), vec![3]);
        assert_eq!(graph.dependencies(3), &[1, 2]);
        assert_eq!(graph.dependents(0), &[1, 2]);
    }

    #[test]
    fn test_missing_dependency_is_not_a_cycle() {
        let err = GraphBuilder::new(vec![node(1, &[99])]).build().unwrap_err();
        assert_eq!(
            err,
            GraphError::MissingDependency {
                session: 1,
                dependency: 99
            }
        );
    }

    #[test]
    fn test_duplicate_session_id() {
        let err = GraphBuilder::new(vec![node(1, &[]), node(1, &[])])
            .build()
            .unwrap_err();
        assert_eq!(err, GraphError::DuplicateSession(1));
    }

    #[test]
    fn test_external_dependencies_are_accepted() {
        let graph = GraphBuilder::new(vec![node(5, &[1]), node(6, &[5])])
            .with_external([1, 2])
            .build()
            .unwrap();

        assert_eq!(graph.root_nodes(), vec![0]);
        assert_eq!(graph.external_dependencies(0), vec![1]);
        assert_eq!(graph.external_ids(), &BTreeSet::from([1]));
    }

    #[test]
    fn test_dependencies_satisfied_includes_external() {
        let graph = GraphBuilder::new(vec![node(5, &[1]), node(6, &[5])])
            .with_external([1])
            .build()
            .unwrap();
        let mut completed = HashSet::new();

        assert!(!graph.dependencies_satisfied(5, &completed));
        completed.insert(1);
        assert!(graph.dependencies_satisfied(5, &completed));
        assert!(!graph.dependencies_satisfied(6, &completed));
        completed.insert(5);
        assert!(graph.dependencies_satisfied(6, &completed));
        assert!(!graph.dependencies_satisfied(42, &completed));
    }

    #[test]
    fn test_empty_graph() {
        let graph = GraphBuilder::new(vec![]).build().unwrap();
        assert!(graph.is_empty());
        assert!(graph.root_nodes().is_empty());
    }
}
