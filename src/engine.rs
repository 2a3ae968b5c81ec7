//! Engine module: coupled nodes and the simulation loop.
//!
//! A [`CoupledNode`] owns its children, routes their outputs along the
//! compiled topology and hands every step's transitions to an
//! [`ExecutionStrategy`]. [`Simulation::run`] drives a root model over a
//! time window.

use crate::compose::CoupledModel;
use crate::config::{self, CommonConfig};
use crate::factory::Factory;
use crate::graph::{NodeId, Topology};
use crate::invariant_ppt::{assert_invariant, CHILDREN_COMPOSED};
use crate::model::{Bag, ChildModel, Model, ModelError, Time, INFINITY};
use crate::plan::Routing;
use crate::strategy::{ExecutionStrategy, Transition};
use crate::tgf::{self, FORMAT_TGF};
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;

/// Errors raised by [`Simulation::run`].
#[derive(Debug, Error)]
pub enum SimulationError {
    #[error(transparent)]
    Model(#[from] ModelError),
    #[error("simulation window [{begin}, {end}) is empty or not finite")]
    InvalidWindow { begin: Time, end: Time },
}

// Child deadlines are absolute times computed as `now + ta`, while the parent
// advances by relative steps. Snap to the deadline when rounding is all that
// separates them.
fn snap(target: Time, deadline: Time) -> Time {
    if deadline.is_finite() && (target - deadline).abs() <= 4.0 * f64::EPSILON * target.abs().max(1.0)
    {
        deadline
    } else {
        target
    }
}

// Every edge must leave an output port of its source and reach an input port
// of its destination. Proxies are checked by the process hosting them.
fn check_ports(topology: &Topology, children: &[ChildModel]) -> Result<(), ModelError> {
    let ports = |node: NodeId| match children.get(node.0) {
        Some(ChildModel::Local(model)) => Some((model.input_ports(), model.output_ports())),
        _ => None,
    };
    let name = |node: NodeId| {
        topology
            .vertex(node)
            .map(|vertex| vertex.name.clone())
            .unwrap_or_default()
    };
    for edge in &topology.edges {
        let leaves = ports(edge.from_node).map_or(true, |(_, outputs)| edge.from_port.0 < outputs);
        let reaches = ports(edge.to_node).map_or(true, |(inputs, _)| edge.to_port.0 < inputs);
        if !(leaves && reaches) {
            return Err(ModelError::InvalidPort {
                from: name(edge.from_node),
                from_port: edge.from_port.0,
                to: name(edge.to_node),
                to_port: edge.to_port.0,
            });
        }
    }
    Ok(())
}

/// A coupled model: children, their topology and a scheduling strategy.
pub struct CoupledNode {
    composer: Box<dyn CoupledModel>,
    strategy: Arc<dyn ExecutionStrategy>,
    factory: Factory,
    inline: Option<Topology>,
    topology: Topology,
    routing: Routing,
    children: Vec<ChildModel>,
    last: Vec<Time>,
    next: Vec<Time>,
    now: Time,
}

impl std::fmt::Debug for CoupledNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CoupledNode")
            .field("strategy", &self.strategy.name())
            .field("children", &self.children)
            .field("now", &self.now)
            .finish()
    }
}

impl CoupledNode {
    /// A coupled node that reads its topology from the `tgf-filesource` key
    /// at init.
    pub fn new(
        composer: impl CoupledModel + 'static,
        strategy: Arc<dyn ExecutionStrategy>,
        factory: Factory,
    ) -> Self {
        Self {
            composer: Box::new(composer),
            strategy,
            factory,
            inline: None,
            topology: Topology::new(),
            routing: Routing::compile(&Topology::new()),
            children: Vec::new(),
            last: Vec::new(),
            next: Vec::new(),
            now: 0.0,
        }
    }

    /// Use `topology` instead of reading a file.
    pub fn with_topology(mut self, topology: Topology) -> Self {
        self.inline = Some(topology);
        self
    }

    pub fn children(&self) -> &[ChildModel] {
        &self.children
    }

    /// Topology of the last init.
    pub fn topology(&self) -> &Topology {
        &self.topology
    }

    pub fn strategy(&self) -> &dyn ExecutionStrategy {
        self.strategy.as_ref()
    }

    /// Current simulation time.
    pub fn now(&self) -> Time {
        self.now
    }

    fn next_event(&self) -> Time {
        self.next.iter().copied().fold(INFINITY, f64::min)
    }

    fn time_advance(&self) -> Time {
        self.next_event() - self.now
    }

    fn load(&self, common: &CommonConfig) -> Result<(Topology, Option<String>), ModelError> {
        if let Some(topology) = &self.inline {
            return Ok((topology.clone(), None));
        }
        let format = common.get_opt::<i64>(config::TGF_FORMAT)?.unwrap_or(FORMAT_TGF);
        if format != FORMAT_TGF {
            return Err(ModelError::UnsupportedFormat(format));
        }
        let source: String = common.get(config::TGF_FILESOURCE)?;
        if common.get_opt::<String>(config::TGF_PARENT)?.as_deref() == Some(source.as_str()) {
            return Err(ModelError::RecursiveSource(source));
        }
        let topology = tgf::load(Path::new(&source))?;
        Ok((topology, Some(source)))
    }
}

impl Model for CoupledNode {
    fn init(&mut self, common: &CommonConfig, time: Time) -> Result<Time, ModelError> {
        self.composer.apply_common(common)?;
        let (topology, source) = self.load(common)?;

        let mut children = topology
            .vertices
            .iter()
            .map(|vertex| self.factory.create(&vertex.kind))
            .collect::<Result<Vec<_>, _>>()?;
        check_ports(&topology, &children)?;

        let mut configs = Vec::with_capacity(children.len());
        for child in 0..children.len() {
            let mut derived = self
                .composer
                .update_common(common, &topology, child, &mut children)?;
            if let Some(source) = &source {
                derived.set(config::TGF_PARENT, source.as_str());
            }
            configs.push(derived);
        }
        assert_invariant(
            CHILDREN_COMPOSED,
            configs.len() == children.len() && children.len() == topology.len(),
            "one configuration per vertex",
            Some("CoupledNode::init"),
        );

        self.now = time;
        self.last = vec![time; children.len()];
        self.next = vec![INFINITY; children.len()];
        for (index, (child, derived)) in children.iter_mut().zip(&configs).enumerate() {
            if let ChildModel::Local(model) = child {
                self.next[index] = time + model.init(derived, time)?;
            }
        }

        log::debug!(
            "coupled node composed {} children with {} edges",
            children.len(),
            topology.edges.len()
        );
        self.routing = Routing::compile(&topology);
        self.topology = topology;
        self.children = children;
        Ok(self.time_advance())
    }

    fn delta(&mut self, elapsed: Time, inputs: &Bag) -> Result<Time, ModelError> {
        if !inputs.is_empty() {
            return Err(ModelError::UnexpectedInput {
                count: inputs.len(),
            });
        }
        self.now = snap(self.now + elapsed, self.next_event());
        let now = self.now;

        let imminent: Vec<bool> = self.next.iter().map(|&deadline| deadline <= now).collect();
        let mut bags = vec![Bag::new(); self.children.len()];
        for (index, child) in self.children.iter().enumerate() {
            let ChildModel::Local(model) = child else {
                continue;
            };
            if !imminent[index] {
                continue;
            }
            let emitted = model.output();
            if emitted.is_empty() {
                continue;
            }
            for route in self.routing.routes_from(NodeId(index)) {
                let values = emitted.port(route.from_port);
                if values.is_empty() {
                    continue;
                }
                if let ChildModel::Remote(proxy) = &self.children[route.to_node.0] {
                    return Err(ModelError::RemoteUnreachable {
                        child: route.to_node.0,
                        rank: proxy.rank,
                    });
                }
                bags[route.to_node.0].extend(route.to_port, values);
            }
        }

        let last = &self.last;
        let batch: Vec<Transition<'_>> = self
            .children
            .iter_mut()
            .zip(bags)
            .enumerate()
            .filter_map(|(index, (child, inputs))| match child {
                ChildModel::Local(model) if imminent[index] || !inputs.is_empty() => {
                    Some(Transition {
                        child: index,
                        model: model.as_mut(),
                        elapsed: now - last[index],
                        inputs,
                    })
                }
                _ => None,
            })
            .collect();

        for (index, result) in self.strategy.execute(batch) {
            let ta = result?;
            self.last[index] = now;
            self.next[index] = now + ta;
        }
        Ok(self.time_advance())
    }

    /// Coupled nodes expose no ports.
    fn output(&self) -> Bag {
        Bag::new()
    }

    fn input_ports(&self) -> usize {
        0
    }

    fn output_ports(&self) -> usize {
        0
    }
}

/// Steps and final time of a completed run.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RunStats {
    pub steps: u64,
    pub last_time: Time,
}

/// Drives a root model through a time window.
pub struct Simulation;

impl Simulation {
    /// Initialise `root` at `begin` and apply its transitions while the next
    /// one falls strictly before `end`.
    ///
    /// # Errors
    ///
    /// * If the window is not finite or `end < begin`
    /// * If a model fails to initialise or transition
    pub fn run(
        root: &mut dyn Model,
        common: &CommonConfig,
        begin: Time,
        end: Time,
    ) -> Result<RunStats, SimulationError> {
        if !begin.is_finite() || !end.is_finite() || end < begin {
            return Err(SimulationError::InvalidWindow { begin, end });
        }

        let mut time = begin;
        let mut ta = root.init(common, begin)?;
        let mut steps = 0;
        while time + ta < end {
            time += ta;
            ta = root.delta(ta, &Bag::new())?;
            steps += 1;
        }
        log::debug!("simulation stopped at {time} after {steps} steps");
        Ok(RunStats {
            steps,
            last_time: time,
        })
    }
}
