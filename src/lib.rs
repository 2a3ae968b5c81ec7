//! Workload-injecting benchmark for discrete-event simulation topologies.
//!
//! Topologies of pixel models are read from TGF files and composed into
//! coupled nodes; every transition burns a fixed amount of CPU time so the
//! cost of the scheduling strategy can be measured.

pub mod compose;
pub mod config;
pub mod dsl;
pub mod engine;
pub mod factory;
pub mod graph;
pub mod harness;
#[doc(hidden)]
pub mod invariant_ppt;
pub mod logger;
pub mod model;
pub mod pixel;
pub mod plan;
pub mod strategy;
pub mod tgf;
pub mod workload;

pub use config::CommonConfig;
pub use engine::{CoupledNode, Simulation};
pub use model::{AtomicModel, Bag, ChildModel, Model, ModelError, Time};
