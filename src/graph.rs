//! Graph module: the topology a coupled model composes its children from.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

/// Unique identifier for a vertex; equal to the child index in its parent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub usize);

/// Unique identifier for a port.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PortId(pub usize);

/// An edge connecting an output port to an input port.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Edge {
    /// The source vertex.
    pub from_node: NodeId,
    /// The source output port.
    pub from_port: PortId,
    /// The destination vertex.
    pub to_node: NodeId,
    /// The destination input port.
    pub to_port: PortId,
}

impl Edge {
    /// Edge between port 0 of both endpoints.
    pub fn simple(from_node: NodeId, to_node: NodeId) -> Self {
        Self {
            from_node,
            from_port: PortId(0),
            to_node,
            to_port: PortId(0),
        }
    }
}

/// A child slot in the topology.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Vertex {
    /// The vertex identifier.
    pub id: NodeId,
    /// Factory key of the model instantiated for this vertex.
    pub kind: String,
    /// Name the vertex was declared with.
    pub name: String,
}

/// Vertices and edges of one coupled model.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Topology {
    /// All vertices, indexed by [`NodeId`].
    pub vertices: Vec<Vertex>,
    /// All edges between vertices.
    pub edges: Vec<Edge>,
}

/// Errors that can occur when building a topology.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TopologyError {
    /// Vertex does not exist.
    #[error("vertex {0:?} does not exist")]
    InvalidNode(NodeId),
}

impl Topology {
    /// Create a new empty topology.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a vertex of the given factory kind.
    pub fn add_vertex(&mut self, kind: impl Into<String>, name: impl Into<String>) -> NodeId {
        let id = NodeId(self.vertices.len());
        self.vertices.push(Vertex {
            id,
            kind: kind.into(),
            name: name.into(),
        });
        id
    }

    /// Add an edge after checking both endpoints exist.
    ///
    /// Parallel edges are kept: each one delivers its own message.
    pub fn add_edge(&mut self, edge: Edge) -> Result<(), TopologyError> {
        for node in [edge.from_node, edge.to_node] {
            if node.0 >= self.vertices.len() {
                return Err(TopologyError::InvalidNode(node));
            }
        }
        self.edges.push(edge);
        Ok(())
    }

    /// Vertex at `id`, if any.
    pub fn vertex(&self, id: NodeId) -> Option<&Vertex> {
        self.vertices.get(id.0)
    }

    /// Number of vertices.
    pub fn len(&self) -> usize {
        self.vertices.len()
    }

    /// Whether the topology has no vertex.
    pub fn is_empty(&self) -> bool {
        self.vertices.is_empty()
    }

    /// Number of edges whose destination is `node`.
    pub fn in_degree(&self, node: NodeId) -> usize {
        self.edges.iter().filter(|e| e.to_node == node).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_unknown_endpoint() {
        let mut topology = Topology::new();
        let a = topology.add_vertex("top", "a");
        assert_eq!(
            topology.add_edge(Edge::simple(a, NodeId(3))),
            Err(TopologyError::InvalidNode(NodeId(3)))
        );
        assert!(topology.edges.is_empty());
    }

    #[test]
    fn in_degree_counts_destinations_only() {
        let mut topology = Topology::new();
        let a = topology.add_vertex("top", "a");
        let b = topology.add_vertex("normal", "b");
        let c = topology.add_vertex("normal", "c");
        topology.add_edge(Edge::simple(a, b)).unwrap();
        topology.add_edge(Edge::simple(a, c)).unwrap();
        topology.add_edge(Edge::simple(b, c)).unwrap();
        assert_eq!(topology.in_degree(a), 0);
        assert_eq!(topology.in_degree(b), 1);
        assert_eq!(topology.in_degree(c), 2);
    }

    #[test]
    fn ids_follow_insertion_order() {
        let mut topology = Topology::new();
        let a = topology.add_vertex("top", "a");
        let b = topology.add_vertex("normal", "b");
        assert!(a < b);
        assert_eq!(topology.vertex(b).map(|v| v.name.as_str()), Some("b"));
    }
}
