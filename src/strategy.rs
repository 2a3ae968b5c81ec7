//! Execution strategies: how a coupled node runs the transitions of one step.

use crate::model::{Bag, Model, ModelError, Time};
use rayon::prelude::*;
use rayon::{ThreadPool, ThreadPoolBuildError, ThreadPoolBuilder};
use std::fmt;
use std::thread;
use thiserror::Error;

/// One pending child transition.
pub struct Transition<'a> {
    /// Index of the child in its parent.
    pub child: usize,
    pub model: &'a mut dyn Model,
    pub elapsed: Time,
    pub inputs: Bag,
}

impl Transition<'_> {
    fn run(self) -> Outcome {
        (self.child, self.model.delta(self.elapsed, &self.inputs))
    }
}

/// Child index with the time advance its transition returned.
pub type Outcome = (usize, Result<Time, ModelError>);

/// Runs a batch of independent child transitions.
///
/// Transitions in one batch belong to distinct children, so they may run in
/// any order or concurrently. Outcomes are returned in batch order.
pub trait ExecutionStrategy: Send + Sync + fmt::Debug {
    fn name(&self) -> &'static str;

    fn execute(&self, batch: Vec<Transition<'_>>) -> Vec<Outcome>;
}

/// Every transition on the calling thread.
#[derive(Debug, Default, Clone, Copy)]
pub struct Mono;

impl ExecutionStrategy for Mono {
    fn name(&self) -> &'static str {
        "mono"
    }

    fn execute(&self, batch: Vec<Transition<'_>>) -> Vec<Outcome> {
        batch.into_iter().map(Transition::run).collect()
    }
}

/// Errors raised while setting up a strategy.
#[derive(Debug, Error)]
pub enum StrategyError {
    #[error("cannot start the worker pool: {0}")]
    Pool(#[from] ThreadPoolBuildError),
}

/// One worker per available core.
pub fn default_workers() -> usize {
    thread::available_parallelism().map_or(1, |n| n.get())
}

/// Transitions spread over a persistent pool of worker threads.
///
/// The pool is started once and reused by every step of every node that
/// shares this strategy.
#[derive(Debug)]
pub struct Threaded {
    pool: ThreadPool,
}

impl Threaded {
    /// # Errors
    ///
    /// * If the operating system refuses to start the worker threads
    pub fn new(workers: usize) -> Result<Self, StrategyError> {
        let pool = ThreadPoolBuilder::new()
            .num_threads(workers.max(1))
            .thread_name(|i| format!("pixelbench-worker-{i}"))
            .build()?;
        log::debug!("worker pool started with {} threads", pool.current_num_threads());
        Ok(Self { pool })
    }

    /// # Errors
    ///
    /// * If the operating system refuses to start the worker threads
    pub fn per_core() -> Result<Self, StrategyError> {
        Self::new(default_workers())
    }

    pub fn workers(&self) -> usize {
        self.pool.current_num_threads()
    }
}

impl ExecutionStrategy for Threaded {
    fn name(&self) -> &'static str {
        "threaded"
    }

    fn execute(&self, batch: Vec<Transition<'_>>) -> Vec<Outcome> {
        if batch.len() <= 1 {
            return Mono.execute(batch);
        }
        self.pool
            .install(|| batch.into_par_iter().map(Transition::run).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CommonConfig;
    use crate::model::{AtomicModel, INFINITY};
    use std::collections::HashSet;
    use std::thread::ThreadId;

    #[derive(Default)]
    struct Tracer {
        seen: Option<ThreadId>,
        thread_name: Option<String>,
        elapsed: Time,
    }

    impl AtomicModel for Tracer {
        fn init(&mut self, _: &CommonConfig, _: Time) -> Result<Time, ModelError> {
            Ok(INFINITY)
        }

        fn internal_transition(&mut self, elapsed: Time) -> Result<Time, ModelError> {
            let current = thread::current();
            self.seen = Some(current.id());
            self.thread_name = current.name().map(str::to_owned);
            self.elapsed = elapsed;
            Ok(elapsed + 1.0)
        }

        fn output(&self) -> Bag {
            Bag::new()
        }
    }

    fn tracers(n: usize) -> Vec<Tracer> {
        (0..n).map(|_| Tracer::default()).collect()
    }

    fn batch(tracers: &mut [Tracer]) -> Vec<Transition<'_>> {
        tracers
            .iter_mut()
            .enumerate()
            .map(|(child, tracer)| Transition {
                child,
                model: tracer,
                elapsed: child as Time,
                inputs: Bag::new(),
            })
            .collect()
    }

    #[test]
    fn mono_runs_in_order_on_caller() {
        let mut tracers = tracers(4);
        let outcomes = Mono.execute(batch(&mut tracers));
        let indices: Vec<usize> = outcomes.iter().map(|(i, _)| *i).collect();
        assert_eq!(indices, vec![0, 1, 2, 3]);
        let me = thread::current().id();
        assert!(tracers.iter().all(|t| t.seen == Some(me)));
    }

    #[test]
    fn threaded_keeps_batch_order() {
        let mut tracers = tracers(7);
        let outcomes = Threaded::new(3).unwrap().execute(batch(&mut tracers));
        for (expected, (child, result)) in outcomes.into_iter().enumerate() {
            assert_eq!(child, expected);
            assert_eq!(result.ok(), Some(expected as Time + 1.0));
        }
        let me = thread::current().id();
        assert!(tracers.iter().all(|t| t.seen.is_some() && t.seen != Some(me)));
        assert_eq!(tracers[6].elapsed, 6.0);
    }

    #[test]
    fn threaded_reuses_its_workers_across_steps() {
        let threaded = Threaded::new(2).unwrap();
        let mut threads = HashSet::new();
        for _ in 0..20 {
            let mut tracers = tracers(8);
            threaded.execute(batch(&mut tracers));
            for tracer in &tracers {
                let name = tracer.thread_name.as_deref().unwrap_or_default();
                assert!(name.starts_with("pixelbench-worker-"), "ran on `{name}`");
                threads.extend(tracer.seen);
            }
        }
        assert!(threads.len() <= 2, "{} distinct threads", threads.len());
    }

    #[test]
    fn threaded_never_has_zero_workers() {
        assert_eq!(Threaded::new(0).unwrap().workers(), 1);
        assert!(default_workers() >= 1);
        assert_eq!(Threaded::per_core().unwrap().workers(), default_workers());
    }
}
