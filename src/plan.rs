//! Plan module: compile a topology into a per-vertex route table.

use crate::graph::{NodeId, PortId, Topology};
use crate::invariant_ppt::{assert_invariant, ROUTES_RESOLVED};

/// One delivery target of an output port.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Route {
    pub from_port: PortId,
    pub to_node: NodeId,
    pub to_port: PortId,
}

/// The compiled routing of a topology: outgoing routes per vertex.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Routing {
    pub outgoing: Vec<Vec<Route>>,
}

impl Routing {
    /// Compile the route table of `topology`.
    pub fn compile(topology: &Topology) -> Self {
        let mut outgoing = vec![Vec::new(); topology.len()];
        for edge in &topology.edges {
            outgoing[edge.from_node.0].push(Route {
                from_port: edge.from_port,
                to_node: edge.to_node,
                to_port: edge.to_port,
            });
        }

        let total: usize = outgoing.iter().map(Vec::len).sum();
        assert_invariant(
            ROUTES_RESOLVED,
            total == topology.edges.len(),
            "every edge yields exactly one route",
            Some("compile"),
        );
        Self { outgoing }
    }

    /// Routes leaving `node`.
    pub fn routes_from(&self, node: NodeId) -> &[Route] {
        self.outgoing.get(node.0).map(Vec::as_slice).unwrap_or(&[])
    }
}
