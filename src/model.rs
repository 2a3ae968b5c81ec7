//! Model capability shared by atomic pixels and coupled nodes.

#![forbid(unsafe_code)]

use crate::compose::ComposeError;
use crate::config::{CommonConfig, ConfigError};
use crate::graph::PortId;
use crate::tgf::TgfError;
use crate::workload::WorkloadError;
use std::fmt;
use thiserror::Error;

/// Simulation time.
pub type Time = f64;

/// Time advance of a model with nothing scheduled.
pub const INFINITY: Time = f64::INFINITY;

/// Errors raised while initialising or transitioning a model.
#[derive(Debug, Error)]
pub enum ModelError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Workload(#[from] WorkloadError),
    #[error(transparent)]
    Compose(#[from] ComposeError),
    #[error(transparent)]
    Tgf(#[from] TgfError),
    #[error("no model registered under `{0}`")]
    UnknownKind(String),
    #[error("child {child} runs on rank {rank}; no transport is attached to deliver to it")]
    RemoteUnreachable { child: usize, rank: usize },
    #[error("topology format {0} is not supported")]
    UnsupportedFormat(i64),
    #[error("`{0}` describes a coupled model nested inside itself")]
    RecursiveSource(String),
    #[error("model has no input ports; {count} values dropped")]
    UnexpectedInput { count: usize },
    #[error("edge {from}:{from_port} -> {to}:{to_port} uses a port the model does not have")]
    InvalidPort {
        from: String,
        from_port: usize,
        to: String,
        to_port: usize,
    },
}

/// Values per port, delivered to or emitted by a model in one step.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Bag {
    ports: Vec<Vec<f64>>,
}

impl Bag {
    pub fn new() -> Self {
        Self::default()
    }

    /// A bag holding `values` on `port`.
    pub fn on(port: PortId, values: &[f64]) -> Self {
        let mut bag = Self::new();
        bag.extend(port, values);
        bag
    }

    /// Whether no port carries any value.
    pub fn is_empty(&self) -> bool {
        self.ports.iter().all(Vec::is_empty)
    }

    /// Total number of values over all ports.
    pub fn len(&self) -> usize {
        self.ports.iter().map(Vec::len).sum()
    }

    /// Values on `port`.
    pub fn port(&self, port: PortId) -> &[f64] {
        self.ports.get(port.0).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn push(&mut self, port: PortId, value: f64) {
        self.slot(port).push(value);
    }

    pub fn extend(&mut self, port: PortId, values: &[f64]) {
        self.slot(port).extend_from_slice(values);
    }

    fn slot(&mut self, port: PortId) -> &mut Vec<f64> {
        if self.ports.len() <= port.0 {
            self.ports.resize_with(port.0 + 1, Vec::new);
        }
        &mut self.ports[port.0]
    }
}

/// Anything a coupled node can schedule: the common shape of atomic and
/// coupled models.
pub trait Model: Send {
    /// Initialise from `common` at `time`; returns the time advance.
    fn init(&mut self, common: &CommonConfig, time: Time) -> Result<Time, ModelError>;

    /// Run one transition `elapsed` after the previous one; returns the time
    /// advance.
    fn delta(&mut self, elapsed: Time, inputs: &Bag) -> Result<Time, ModelError>;

    /// Values emitted just before the next internal transition.
    fn output(&self) -> Bag;

    fn input_ports(&self) -> usize;

    fn output_ports(&self) -> usize;
}

/// Atomic model definition; implement this for your models.
pub trait AtomicModel: Send + 'static {
    fn init(&mut self, common: &CommonConfig, time: Time) -> Result<Time, ModelError>;

    fn internal_transition(&mut self, elapsed: Time) -> Result<Time, ModelError>;

    /// Only reached when [`input_ports`](Self::input_ports) is overridden.
    fn external_transition(&mut self, elapsed: Time, inputs: &Bag) -> Result<Time, ModelError> {
        let _ = elapsed;
        Err(ModelError::UnexpectedInput {
            count: inputs.len(),
        })
    }

    fn output(&self) -> Bag;

    /// Number of input ports; none by default.
    fn input_ports(&self) -> usize {
        0
    }

    /// Number of output ports.
    fn output_ports(&self) -> usize {
        1
    }
}

impl<T: AtomicModel> Model for T {
    fn init(&mut self, common: &CommonConfig, time: Time) -> Result<Time, ModelError> {
        <T as AtomicModel>::init(self, common, time)
    }

    // Exactly one transition per step: an empty bag means the model's own
    // deadline fired.
    fn delta(&mut self, elapsed: Time, inputs: &Bag) -> Result<Time, ModelError> {
        if inputs.is_empty() {
            self.internal_transition(elapsed)
        } else {
            self.external_transition(elapsed, inputs)
        }
    }

    fn output(&self) -> Bag {
        <T as AtomicModel>::output(self)
    }

    fn input_ports(&self) -> usize {
        <T as AtomicModel>::input_ports(self)
    }

    fn output_ports(&self) -> usize {
        <T as AtomicModel>::output_ports(self)
    }
}

/// Local stand-in for a child running on another process.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProxyHandle {
    /// Process rank; 0 until the root coordinator assigns one.
    pub rank: usize,
}

/// A child of a coupled node.
pub enum ChildModel {
    /// Executes in this process.
    Local(Box<dyn Model>),
    /// Executes on the process holding `rank`.
    Remote(ProxyHandle),
}

impl ChildModel {
    pub fn local(model: impl Model + 'static) -> Self {
        ChildModel::Local(Box::new(model))
    }

    pub fn proxy(&self) -> Option<&ProxyHandle> {
        match self {
            ChildModel::Remote(proxy) => Some(proxy),
            ChildModel::Local(_) => None,
        }
    }
}

impl fmt::Debug for ChildModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChildModel::Local(_) => write!(f, "Local"),
            ChildModel::Remote(proxy) => write!(f, "Remote(rank {})", proxy.rank),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Echo {
        internal: usize,
        external: usize,
    }

    impl AtomicModel for Echo {
        fn init(&mut self, _: &CommonConfig, _: Time) -> Result<Time, ModelError> {
            Ok(0.0)
        }

        fn internal_transition(&mut self, _: Time) -> Result<Time, ModelError> {
            self.internal += 1;
            Ok(1.0)
        }

        fn external_transition(&mut self, _: Time, _: &Bag) -> Result<Time, ModelError> {
            self.external += 1;
            Ok(2.0)
        }

        fn output(&self) -> Bag {
            Bag::new()
        }

        fn input_ports(&self) -> usize {
            1
        }
    }

    struct Source;

    impl AtomicModel for Source {
        fn init(&mut self, _: &CommonConfig, _: Time) -> Result<Time, ModelError> {
            Ok(0.0)
        }

        fn internal_transition(&mut self, _: Time) -> Result<Time, ModelError> {
            Ok(1.0)
        }

        fn output(&self) -> Bag {
            Bag::on(PortId(0), &[0.0])
        }
    }

    #[test]
    fn source_refuses_inputs() {
        let mut source = Source;
        assert_eq!((Model::input_ports(&source), Model::output_ports(&source)), (0, 1));
        let err = Model::delta(&mut source, 0.0, &Bag::on(PortId(0), &[1.0, 2.0])).unwrap_err();
        assert!(matches!(err, ModelError::UnexpectedInput { count: 2 }));
        assert_eq!(Model::delta(&mut source, 0.0, &Bag::new()).ok(), Some(1.0));
    }

    #[test]
    fn delta_dispatches_on_inputs() {
        let mut echo = Echo {
            internal: 0,
            external: 0,
        };
        assert_eq!(Model::delta(&mut echo, 0.0, &Bag::new()).ok(), Some(1.0));
        assert_eq!(Model::delta(&mut echo, 0.0, &Bag::on(PortId(0), &[1.0])).ok(), Some(2.0));
        assert_eq!((echo.internal, echo.external), (1, 1));
    }

    #[test]
    fn bag_with_empty_ports_is_empty() {
        let mut bag = Bag::new();
        bag.extend(PortId(2), &[]);
        assert!(bag.is_empty());
        bag.push(PortId(1), 4.0);
        assert!(!bag.is_empty());
        assert_eq!(bag.len(), 1);
        assert_eq!(bag.port(PortId(1)), &[4.0]);
        assert!(bag.port(PortId(0)).is_empty());
        assert!(bag.port(PortId(7)).is_empty());
    }

    #[test]
    fn proxy_detection() {
        let remote = ChildModel::Remote(ProxyHandle { rank: 2 });
        assert_eq!(remote.proxy().map(|p| p.rank), Some(2));
        let local = ChildModel::local(Echo {
            internal: 0,
            external: 0,
        });
        assert!(local.proxy().is_none());
    }
}
