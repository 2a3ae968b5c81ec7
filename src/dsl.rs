//! DSL module: builder API for topologies.

use crate::graph::{Edge, NodeId, PortId, Topology, TopologyError};
use std::collections::HashMap;

/// Handle to a vertex in the builder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NodeHandle(pub NodeId);

/// The topology builder.
#[derive(Debug, Default)]
pub struct TopologyBuilder {
    topology: Topology,
    node_names: HashMap<String, NodeId>,
}

impl TopologyBuilder {
    /// Create a new builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an anonymous vertex; its name is its index.
    pub fn node(&mut self, kind: &str) -> NodeHandle {
        let name = self.topology.len().to_string();
        NodeHandle(self.topology.add_vertex(kind, name))
    }

    /// Add a named vertex.
    pub fn node_named(&mut self, name: &str, kind: &str) -> Result<NodeHandle, DslError> {
        if self.node_names.contains_key(name) {
            return Err(DslError::DuplicateNode(name.to_string()));
        }
        let id = self.topology.add_vertex(kind, name);
        self.node_names.insert(name.to_string(), id);
        Ok(NodeHandle(id))
    }

    /// Look a named vertex up.
    pub fn lookup(&self, name: &str) -> Result<NodeHandle, DslError> {
        self.node_names
            .get(name)
            .copied()
            .map(NodeHandle)
            .ok_or_else(|| DslError::MissingNode(name.to_string()))
    }

    /// Connect two ports.
    pub fn connect(
        &mut self,
        from: NodeHandle,
        from_port: PortId,
        to: NodeHandle,
        to_port: PortId,
    ) -> Result<(), DslError> {
        self.topology.add_edge(Edge {
            from_node: from.0,
            from_port,
            to_node: to.0,
            to_port,
        })?;
        Ok(())
    }

    /// Connect port 0 of `from` to port 0 of `to`.
    pub fn link(&mut self, from: NodeHandle, to: NodeHandle) -> Result<(), DslError> {
        self.connect(from, PortId(0), to, PortId(0))
    }

    /// Build the topology.
    pub fn build(self) -> Topology {
        self.topology
    }
}

/// DSL-specific errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DslError {
    #[error(transparent)]
    Topology(#[from] TopologyError),
    #[error("unknown vertex `{0}`")]
    MissingNode(String),
    #[error("vertex `{0}` declared twice")]
    DuplicateNode(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dsl_equivalence() {
        let mut builder = TopologyBuilder::new();
        let top = builder.node_named("t", "top").unwrap();
        let pixel = builder.node_named("p", "normal").unwrap();
        builder.link(top, pixel).unwrap();
        let dsl_topology = builder.build();

        let mut manual = Topology::new();
        let t = manual.add_vertex("top", "t");
        let p = manual.add_vertex("normal", "p");
        manual.add_edge(Edge::simple(t, p)).unwrap();

        assert_eq!(dsl_topology, manual);
    }

    #[test]
    fn duplicate_and_missing_names() {
        let mut builder = TopologyBuilder::new();
        builder.node_named("a", "top").unwrap();
        assert_eq!(
            builder.node_named("a", "normal"),
            Err(DslError::DuplicateNode("a".into()))
        );
        assert_eq!(builder.lookup("b"), Err(DslError::MissingNode("b".into())));
    }

    #[test]
    fn anonymous_nodes_are_named_by_index() {
        let mut builder = TopologyBuilder::new();
        builder.node("top");
        let second = builder.node("normal");
        let topology = builder.build();
        assert_eq!(topology.vertex(second.0).unwrap().name, "1");
    }
}
