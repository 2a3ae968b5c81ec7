//! Benchmark harness: times repeated runs of a topology and summarises them.

use crate::compose::{Communicator, Composer, Root, RootCoordinator};
use crate::config::{self, CommonConfig};
use crate::engine::{CoupledNode, RunStats, Simulation, SimulationError};
use crate::factory::{CoupledKind, Factory};
use crate::strategy::{self, ExecutionStrategy, Mono, StrategyError, Threaded};
use crate::tgf::FORMAT_TGF;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;

/// Errors raised by the harness.
#[derive(Debug, Error)]
pub enum HarnessError {
    #[error("{path}: {source}")]
    Run {
        path: PathBuf,
        #[source]
        source: SimulationError,
    },
    #[error("invalid benchmark configuration: {0}")]
    InvalidConfig(String),
    #[error(transparent)]
    Strategy(#[from] StrategyError),
}

/// Wall-clock stopwatch.
#[derive(Debug, Clone, Copy)]
pub struct Timer {
    start: Instant,
}

impl Timer {
    pub fn start() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    /// Seconds since [`start`](Self::start).
    pub fn elapsed_secs(&self) -> f64 {
        self.start.elapsed().as_secs_f64()
    }
}

/// Statistics of a [`Sample`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SampleResult {
    pub mean: f64,
    /// Population variance.
    pub variance: f64,
    pub standard_deviation: f64,
}

/// Durations of repeated runs, in seconds.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Sample {
    values: Vec<f64>,
}

impl Sample {
    pub fn with_capacity(runs: usize) -> Self {
        Self {
            values: Vec::with_capacity(runs),
        }
    }

    pub fn push(&mut self, value: f64) {
        self.values.push(value);
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn total(&self) -> f64 {
        self.values.iter().sum()
    }

    /// Mean and population variance; `None` for an empty sample.
    pub fn compute(&self) -> Option<SampleResult> {
        if self.values.is_empty() {
            return None;
        }
        let n = self.values.len() as f64;
        let mean = self.total() / n;
        let variance = self.values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
        Some(SampleResult {
            mean,
            variance,
            standard_deviation: variance.sqrt(),
        })
    }
}

/// Which coupled models run their children on worker threads.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ThreadMode {
    #[default]
    None,
    Root,
    Sub,
    All,
}

impl ThreadMode {
    pub fn root_threaded(self) -> bool {
        matches!(self, ThreadMode::Root | ThreadMode::All)
    }

    pub fn sub_threaded(self) -> bool {
        matches!(self, ThreadMode::Sub | ThreadMode::All)
    }
}

impl TryFrom<u8> for ThreadMode {
    type Error = HarnessError;

    fn try_from(mode: u8) -> Result<Self, Self::Error> {
        match mode {
            0 => Ok(ThreadMode::None),
            1 => Ok(ThreadMode::Root),
            2 => Ok(ThreadMode::Sub),
            3 => Ok(ThreadMode::All),
            other => Err(HarnessError::InvalidConfig(format!(
                "thread mode {other} is outside [0..3]"
            ))),
        }
    }
}

/// Simulated window given as `begin,duration`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Window {
    pub begin: f64,
    pub duration: f64,
}

impl Window {
    pub fn end(&self) -> f64 {
        self.begin + self.duration
    }
}

impl Default for Window {
    fn default() -> Self {
        Self {
            begin: 0.0,
            duration: 10.0,
        }
    }
}

impl FromStr for Window {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (begin, duration) = s
            .split_once(',')
            .ok_or_else(|| format!("expected `begin,duration`, got `{s}`"))?;
        let real = |token: &str| {
            token
                .trim()
                .parse::<f64>()
                .ok()
                .filter(|v| v.is_finite())
                .ok_or_else(|| format!("`{token}` is not a real"))
        };
        let window = Self {
            begin: real(begin)?,
            duration: real(duration)?,
        };
        if window.duration <= 0.0 {
            return Err("simulation duration must be a positive real".to_string());
        }
        Ok(window)
    }
}

/// Benchmark parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct BenchConfig {
    pub window: Window,
    /// Workload per transition, in milliseconds.
    pub duration_ms: i64,
    /// Runs per topology file.
    pub counter: u64,
    pub thread_mode: ThreadMode,
    /// Worker threads of threaded coupled models.
    pub workers: usize,
}

impl Default for BenchConfig {
    fn default() -> Self {
        Self {
            window: Window::default(),
            duration_ms: 100,
            counter: 1,
            thread_mode: ThreadMode::None,
            workers: strategy::default_workers(),
        }
    }
}

impl fmt::Display for BenchConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Benchmark:")?;
        writeln!(f, "- simulation begin at: {:.6}", self.window.begin)?;
        writeln!(f, "- simulation duration: {:.6}", self.window.duration)?;
        writeln!(f, "- duration: {} ms", self.duration_ms)?;
        writeln!(f, "- counter: {} runs", self.counter)?;
        writeln!(f, "- use threaded root: {}", self.thread_mode.root_threaded())?;
        write!(f, "- use threaded coupled: {}", self.thread_mode.sub_threaded())
    }
}

/// Total and statistics of the runs of one topology file.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RunSummary {
    pub total: f64,
    pub result: SampleResult,
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:.6};{:.6};{:.6};{:.6}",
            self.total, self.result.mean, self.result.variance, self.result.standard_deviation
        )
    }
}

/// Runs topology files under a [`BenchConfig`].
pub struct Benchmark {
    config: BenchConfig,
    comm: Arc<dyn Communicator>,
    // shared by every threaded node of every run
    pool: Option<Arc<dyn ExecutionStrategy>>,
}

impl fmt::Debug for Benchmark {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Benchmark")
            .field("config", &self.config)
            .field("rank", &self.comm.rank())
            .field("size", &self.comm.size())
            .field("pool", &self.pool.as_ref().map(|_| self.config.workers))
            .finish()
    }
}

impl Benchmark {
    /// # Errors
    ///
    /// * If the counter is zero or the workload duration negative
    /// * If a threaded mode is selected and the worker pool cannot start
    pub fn new(config: BenchConfig, comm: Arc<dyn Communicator>) -> Result<Self, HarnessError> {
        if config.counter == 0 || usize::try_from(config.counter).is_err() {
            return Err(HarnessError::InvalidConfig(
                format!("counter must be between 1 and {}", usize::MAX),
            ));
        }
        if config.duration_ms < 0 {
            return Err(HarnessError::InvalidConfig(
                "duration cannot be negative".to_string(),
            ));
        }
        let threaded = config.thread_mode.root_threaded() || config.thread_mode.sub_threaded();
        let pool = if threaded {
            let pool: Arc<dyn ExecutionStrategy> = Arc::new(Threaded::new(config.workers)?);
            Some(pool)
        } else {
            None
        };
        Ok(Self { config, comm, pool })
    }

    pub fn config(&self) -> &BenchConfig {
        &self.config
    }

    /// Whether the process group holds more than one process.
    pub fn is_distributed(&self) -> bool {
        self.comm.size() > 1
    }

    /// Configuration handed to the root.
    pub fn common(&self, source: &Path) -> CommonConfig {
        CommonConfig::new()
            .with(config::DURATION, self.config.duration_ms)
            .with(config::NAME, "name")
            .with(config::TGF_FORMAT, FORMAT_TGF)
            .with(config::TGF_FILESOURCE, source.to_string_lossy().into_owned())
            .with(config::SIMULATION_DURATION, self.config.window.duration)
    }

    fn strategy(&self, threaded: bool) -> Arc<dyn ExecutionStrategy> {
        match &self.pool {
            Some(pool) if threaded => Arc::clone(pool),
            _ => Arc::new(Mono),
        }
    }

    fn sub_kind(&self) -> CoupledKind {
        CoupledKind::Local(self.strategy(self.config.thread_mode.sub_threaded()))
    }

    fn simulate(&self, root: &mut CoupledNode, common: &CommonConfig, path: &Path) -> Result<RunStats, HarnessError> {
        let window = self.config.window;
        Simulation::run(root, common, window.begin, window.end()).map_err(|source| {
            HarnessError::Run {
                path: path.to_path_buf(),
                source,
            }
        })
    }

    /// Run the root topology at `path` `counter` times, each in a fresh root.
    /// Children `s<i>` are read from `s<i>.tgf` next to it.
    ///
    /// # Errors
    ///
    /// * If a run fails to load, compose or simulate
    pub fn run_file(&self, path: &Path) -> Result<RunSummary, HarnessError> {
        let base_dir = path.parent().map(Path::to_path_buf).unwrap_or_default();
        let common = self.common(path);
        let mut sample = Sample::with_capacity(usize::try_from(self.config.counter).unwrap_or(0));

        for run in 0..self.config.counter {
            let timer = Timer::start();
            let mut root = CoupledNode::new(
                Root::new(base_dir.clone()),
                self.strategy(self.config.thread_mode.root_threaded()),
                Factory::standard(self.sub_kind()),
            );
            let stats = self.simulate(&mut root, &common, path)?;
            drop(root);
            let elapsed = timer.elapsed_secs();
            log::debug!("run {run}: {} steps in {elapsed:.6}s", stats.steps);
            sample.push(elapsed);
        }

        summarise(&sample)
    }

    /// Run this process's share of a distributed benchmark once.
    ///
    /// Rank 0 composes the root of `path` with one proxy per child. Rank
    /// `r > 0` runs the coupled model `s<r-1>` from `s<r-1>.tgf`.
    ///
    /// # Errors
    ///
    /// * If the group is too small for the root topology
    /// * If the rank's coupled model fails to load, compose or simulate
    pub fn run_distributed(&self, path: &Path) -> Result<RunSummary, HarnessError> {
        let rank = self.comm.rank();
        let timer = Timer::start();

        if rank == 0 {
            let mut root = CoupledNode::new(
                RootCoordinator::new(Arc::clone(&self.comm)),
                self.strategy(self.config.thread_mode.root_threaded()),
                Factory::standard(CoupledKind::Proxy),
            );
            self.simulate(&mut root, &self.common(path), path)?;
        } else {
            let base_dir = path.parent().map(Path::to_path_buf).unwrap_or_default();
            let layout = Root::new(base_dir);
            let source = layout.child_source(rank - 1);
            let common = self
                .common(&source)
                .with(config::NAME, Root::child_name(rank - 1));
            let mut node = CoupledNode::new(
                Composer::new(),
                self.strategy(self.config.thread_mode.sub_threaded()),
                Factory::standard(self.sub_kind()),
            );
            self.simulate(&mut node, &common, &source)?;
        }

        let mut sample = Sample::with_capacity(1);
        sample.push(timer.elapsed_secs());
        summarise(&sample)
    }
}

fn summarise(sample: &Sample) -> Result<RunSummary, HarnessError> {
    let result = sample
        .compute()
        .ok_or_else(|| HarnessError::InvalidConfig("no run was recorded".to_string()))?;
    Ok(RunSummary {
        total: sample.total(),
        result,
    })
}
