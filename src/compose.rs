//! Composition hooks: how a coupled model derives each child's configuration.
//!
//! [`Composer`] is used by every inner coupled model, [`Root`] by the root of
//! a single-process run and [`RootCoordinator`] by the root of a distributed
//! run, where every child is a proxy for another process.

use crate::config::{self, CommonConfig, ConfigError};
use crate::graph::{NodeId, Topology};
use crate::invariant_ppt::{assert_invariant, CONFIG_ISOLATED, RANK_ASSIGNED};
use crate::model::ChildModel;
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;

/// Errors raised while composing children.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ComposeError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    /// The topology needs more processes than the group holds.
    #[error("process group of size {size} cannot host child {child}: {required} processes required")]
    InsufficientProcesses {
        size: usize,
        child: usize,
        required: usize,
    },
    /// A distributed root found a local model where a proxy was expected.
    #[error("child {child} of a distributed root is not a proxy model")]
    NotAProxy { child: usize },
    /// The child index is outside the topology.
    #[error("child {child} is outside a topology of {len} vertices")]
    NoSuchChild { child: usize, len: usize },
}

/// Process rank and group size.
pub trait Communicator: Send + Sync {
    fn rank(&self) -> usize;
    fn size(&self) -> usize;
}

/// Communicator of a process group described by its launcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LocalCommunicator {
    rank: usize,
    size: usize,
}

const RANK_VARS: [&str; 3] = ["OMPI_COMM_WORLD_RANK", "PMI_RANK", "PMIX_RANK"];
const SIZE_VARS: [&str; 3] = ["OMPI_COMM_WORLD_SIZE", "PMI_SIZE", "PMIX_SIZE"];

fn first_env(vars: &[&str]) -> Option<usize> {
    vars.iter()
        .find_map(|var| std::env::var(var).ok())
        .and_then(|value| value.trim().parse().ok())
}

impl LocalCommunicator {
    /// A group of `size` processes seen from `rank`. The size is at least 1
    /// and the rank is clamped into the group.
    pub fn new(rank: usize, size: usize) -> Self {
        let size = size.max(1);
        Self {
            rank: rank.min(size - 1),
            size,
        }
    }

    /// A group of one.
    pub fn single() -> Self {
        Self::new(0, 1)
    }

    /// Read rank and size from the launcher environment; a group of one when
    /// nothing is set.
    pub fn from_env() -> Self {
        match (first_env(&RANK_VARS), first_env(&SIZE_VARS)) {
            (Some(rank), Some(size)) => Self::new(rank, size),
            _ => Self::single(),
        }
    }
}

impl Communicator for LocalCommunicator {
    fn rank(&self) -> usize {
        self.rank
    }

    fn size(&self) -> usize {
        self.size
    }
}

/// Hooks a coupled model runs while composing its children.
pub trait CoupledModel: Send {
    /// Receive the coupled model's own configuration, before children exist.
    fn apply_common(&mut self, common: &CommonConfig) -> Result<(), ConfigError> {
        let _ = common;
        Ok(())
    }

    /// Derive the configuration of `child` from the parent's `common`.
    fn update_common(
        &self,
        common: &CommonConfig,
        topology: &Topology,
        child: usize,
        children: &mut [ChildModel],
    ) -> Result<CommonConfig, ComposeError>;
}

/// Composer of inner coupled models: names children after the parent and
/// counts their incoming edges.
#[derive(Debug, Default, Clone)]
pub struct Composer {
    name: String,
}

impl Composer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl CoupledModel for Composer {
    fn apply_common(&mut self, common: &CommonConfig) -> Result<(), ConfigError> {
        self.name = common.get(config::NAME)?;
        Ok(())
    }

    fn update_common(
        &self,
        common: &CommonConfig,
        topology: &Topology,
        child: usize,
        _children: &mut [ChildModel],
    ) -> Result<CommonConfig, ComposeError> {
        if child >= topology.len() {
            return Err(ComposeError::NoSuchChild {
                child,
                len: topology.len(),
            });
        }
        let neighbours = topology.in_degree(NodeId(child)) as u64;

        let mut derived = common.clone();
        derived.set(config::NAME, format!("{}-{}", self.name, child));
        derived.set(config::NEIGHBOUR_NUMBER, neighbours);

        let inherited = common.iter().all(|(key, value)| {
            key == config::NAME || key == config::NEIGHBOUR_NUMBER || derived.raw(key) == Some(value)
        });
        assert_invariant(
            CONFIG_ISOLATED,
            inherited
                && derived.get::<u64>(config::NEIGHBOUR_NUMBER) == Ok(neighbours)
                && derived.raw(config::NAME) != common.raw(config::NAME),
            "child configuration is a copy of the parent's with its own name and neighbours",
            Some("update_common"),
        );
        Ok(derived)
    }
}

/// Composer of the root of a single-process run: child `i` is the coupled
/// model `s<i>` described by `s<i>.tgf`.
#[derive(Debug, Default, Clone)]
pub struct Root {
    base_dir: PathBuf,
}

impl Root {
    /// Child topology files are looked up in `base_dir`.
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }

    pub fn child_name(child: usize) -> String {
        format!("s{child}")
    }

    pub fn child_source(&self, child: usize) -> PathBuf {
        self.base_dir.join(format!("{}.tgf", Self::child_name(child)))
    }
}

impl CoupledModel for Root {
    fn update_common(
        &self,
        common: &CommonConfig,
        _topology: &Topology,
        child: usize,
        _children: &mut [ChildModel],
    ) -> Result<CommonConfig, ComposeError> {
        let mut derived = common.clone();
        derived.set(config::NAME, Self::child_name(child));
        derived.set(
            config::TGF_FILESOURCE,
            self.child_source(child).to_string_lossy().into_owned(),
        );
        Ok(derived)
    }
}

/// Composer of the root of a distributed run: binds every proxy child to the
/// process that executes it. Rank 0 is the coordinator itself.
#[derive(Clone)]
pub struct RootCoordinator {
    comm: Arc<dyn Communicator>,
}

impl std::fmt::Debug for RootCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RootCoordinator")
            .field("rank", &self.comm.rank())
            .field("size", &self.comm.size())
            .finish()
    }
}

impl RootCoordinator {
    pub fn new(comm: Arc<dyn Communicator>) -> Self {
        Self { comm }
    }
}

impl CoupledModel for RootCoordinator {
    fn update_common(
        &self,
        common: &CommonConfig,
        _topology: &Topology,
        child: usize,
        children: &mut [ChildModel],
    ) -> Result<CommonConfig, ComposeError> {
        let size = self.comm.size();
        if size <= child + 1 {
            return Err(ComposeError::InsufficientProcesses {
                size,
                child,
                required: child + 2,
            });
        }

        let proxy = match children.get_mut(child) {
            Some(ChildModel::Remote(proxy)) => proxy,
            _ => return Err(ComposeError::NotAProxy { child }),
        };
        proxy.rank = child + 1;
        assert_invariant(
            RANK_ASSIGNED,
            proxy.rank >= 1 && proxy.rank < size,
            "proxy rank inside the process group",
            Some("update_common"),
        );
        log::debug!("RootCoordinator assign {} to child {}", proxy.rank, child);

        Ok(common.clone())
    }
}
