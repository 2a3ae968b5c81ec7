//! Model factory: maps the kind named by a topology vertex to a child model.

use crate::compose::Composer;
use crate::engine::CoupledNode;
use crate::model::{ChildModel, ModelError, ProxyHandle};
use crate::pixel::{NormalPixel, TopPixel};
use crate::strategy::{ExecutionStrategy, Mono};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Kind of the source pixel.
pub const TOP: &str = "top";
/// Kind of the rendezvous pixel.
pub const NORMAL: &str = "normal";
/// Kind of a nested coupled model.
pub const COUPLED: &str = "coupled";

type Constructor = Arc<dyn Fn(&Factory) -> ChildModel + Send + Sync>;

/// How the `coupled` kind is instantiated.
#[derive(Debug, Clone)]
pub enum CoupledKind {
    /// Coupled node running its children with the given strategy. Every node
    /// built by the factory shares it.
    Local(Arc<dyn ExecutionStrategy>),
    /// Proxy for a coupled model hosted by another process.
    Proxy,
}

impl CoupledKind {
    /// Coupled nodes running their children on the calling thread.
    pub fn mono() -> Self {
        CoupledKind::Local(Arc::new(Mono))
    }
}

/// Registry of model constructors, keyed by kind.
#[derive(Clone, Default)]
pub struct Factory {
    constructors: HashMap<String, Constructor>,
}

impl fmt::Debug for Factory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Factory").field("kinds", &self.kinds()).finish()
    }
}

impl Factory {
    /// An empty factory.
    pub fn new() -> Self {
        Self::default()
    }

    /// Pixels plus `coupled` built according to `coupled`.
    pub fn standard(coupled: CoupledKind) -> Self {
        let mut factory = Self::new();
        factory.register(TOP, |_| ChildModel::local(TopPixel::new()));
        factory.register(NORMAL, |_| ChildModel::local(NormalPixel::new()));
        factory.register(COUPLED, move |factory| {
            let strategy = match &coupled {
                CoupledKind::Local(strategy) => Arc::clone(strategy),
                CoupledKind::Proxy => return ChildModel::Remote(ProxyHandle::default()),
            };
            ChildModel::local(CoupledNode::new(Composer::new(), strategy, factory.clone()))
        });
        factory
    }

    /// [`standard`](Self::standard) with single-threaded coupled models.
    pub fn standard_mono() -> Self {
        Self::standard(CoupledKind::mono())
    }

    /// Register `constructor` under `kind`, replacing any previous one.
    pub fn register(
        &mut self,
        kind: impl Into<String>,
        constructor: impl Fn(&Factory) -> ChildModel + Send + Sync + 'static,
    ) {
        self.constructors.insert(kind.into(), Arc::new(constructor));
    }

    /// Instantiate a model of `kind`.
    ///
    /// # Errors
    ///
    /// * If nothing is registered under `kind`
    pub fn create(&self, kind: &str) -> Result<ChildModel, ModelError> {
        let constructor = self
            .constructors
            .get(kind)
            .ok_or_else(|| ModelError::UnknownKind(kind.to_string()))?;
        Ok(constructor(self))
    }

    /// Registered kinds, sorted.
    pub fn kinds(&self) -> Vec<&str> {
        let mut kinds: Vec<&str> = self.constructors.keys().map(String::as_str).collect();
        kinds.sort_unstable();
        kinds
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::strategy::Threaded;

    #[test]
    fn standard_kinds() {
        assert_eq!(Factory::standard_mono().kinds(), vec![COUPLED, NORMAL, TOP]);
    }

    #[test]
    fn unknown_kind() {
        let err = Factory::new().create("pixel").unwrap_err();
        assert!(matches!(err, ModelError::UnknownKind(kind) if kind == "pixel"));
    }

    #[test]
    fn coupled_kind_selects_proxy_or_local() {
        let proxy = Factory::standard(CoupledKind::Proxy).create(COUPLED).unwrap();
        assert_eq!(proxy.proxy(), Some(&ProxyHandle { rank: 0 }));

        let local = Factory::standard_mono().create(COUPLED).unwrap();
        assert!(local.proxy().is_none());
        assert!(Factory::standard_mono().create(TOP).unwrap().proxy().is_none());
    }

    #[test]
    fn coupled_nodes_share_one_pool() {
        let shared: Arc<dyn ExecutionStrategy> = Arc::new(Threaded::new(2).unwrap());
        let factory = Factory::standard(CoupledKind::Local(Arc::clone(&shared)));
        assert_eq!(Arc::strong_count(&shared), 2);
        let first = factory.create(COUPLED).unwrap();
        let second = factory.clone().create(COUPLED).unwrap();
        assert!(first.proxy().is_none() && second.proxy().is_none());
        assert_eq!(Arc::strong_count(&shared), 4);
        drop((first, second));
        assert_eq!(Arc::strong_count(&shared), 2);
    }

    #[test]
    fn register_replaces() {
        let mut factory = Factory::standard_mono();
        factory.register(TOP, |_| ChildModel::Remote(ProxyHandle { rank: 5 }));
        let child = factory.create(TOP).unwrap();
        assert_eq!(child.proxy().map(|p| p.rank), Some(5));
    }
}
