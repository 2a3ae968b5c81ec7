//! Workload generator: bounded, cancellable CPU-saturating work.
//!
//! [`run_for`] blocks the caller for the requested duration while one
//! background thread keeps running dense LU factorisation passes over a fixed
//! 200x200 working set. The thread is always joined and the scratch region
//! always released before the call returns.

use crate::invariant_ppt::{assert_invariant, SCRATCH_RELEASED, WORKER_JOINED};
use std::collections::TryReserveError;
use std::hint::black_box;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use thiserror::Error;

/// Order of the square matrix factorised by each pass.
pub const ARRAY_SIZE: usize = 200;

/// Errors raised by the workload generator.
#[derive(Debug, Error)]
pub enum WorkloadError {
    /// The scratch region could not be reserved.
    #[error("cannot allocate {bytes} bytes of workload scratch")]
    Allocation {
        bytes: usize,
        #[source]
        source: TryReserveError,
    },
    /// The background thread panicked during a compute pass.
    #[error("workload worker panicked")]
    WorkerPanicked,
}

/// What a finished work unit did.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct WorkStats {
    /// Completed compute passes.
    pub passes: u64,
    /// Wall-clock time the caller was blocked.
    pub elapsed: Duration,
}

static WORKERS_ALIVE: AtomicUsize = AtomicUsize::new(0);
static SCRATCH_HELD: AtomicUsize = AtomicUsize::new(0);

/// Workload threads currently running in this process.
pub fn workers_alive() -> usize {
    WORKERS_ALIVE.load(Ordering::SeqCst)
}

/// Scratch regions currently allocated in this process.
pub fn scratch_held() -> usize {
    SCRATCH_HELD.load(Ordering::SeqCst)
}

/// Live resources of one work unit.
#[derive(Debug, Default)]
struct Census {
    workers: AtomicUsize,
    scratch: AtomicUsize,
}

#[derive(Debug, Clone, Copy)]
enum Resource {
    Worker,
    Scratch,
}

/// Counts one live resource in its unit's census and in the process total
/// until dropped.
#[derive(Debug)]
struct Tally {
    census: Arc<Census>,
    resource: Resource,
}

impl Tally {
    fn new(census: Arc<Census>, resource: Resource) -> Self {
        for counter in Self::counters(&census, resource) {
            counter.fetch_add(1, Ordering::SeqCst);
        }
        Self { census, resource }
    }

    fn counters(census: &Census, resource: Resource) -> [&AtomicUsize; 2] {
        match resource {
            Resource::Worker => [&census.workers, &WORKERS_ALIVE],
            Resource::Scratch => [&census.scratch, &SCRATCH_HELD],
        }
    }
}

impl Drop for Tally {
    fn drop(&mut self) {
        for counter in Self::counters(&self.census, self.resource) {
            counter.fetch_sub(1, Ordering::SeqCst);
        }
    }
}

/// Convert a configured millisecond count into a duration; non-positive
/// values disable the workload.
pub fn millis(ms: i64) -> Duration {
    u64::try_from(ms).map(Duration::from_millis).unwrap_or(Duration::ZERO)
}

/// Block for `duration` while a background thread burns CPU.
///
/// A zero duration returns immediately without starting any thread.
///
/// # Errors
///
/// * If the scratch region cannot be allocated
/// * If the background thread panicked
pub fn run_for(duration: Duration) -> Result<WorkStats, WorkloadError> {
    if duration.is_zero() {
        return Ok(WorkStats::default());
    }
    WorkUnit::new(duration)?.run()
}

/// One invocation of bounded synthetic computation.
#[derive(Debug)]
pub struct WorkUnit {
    duration: Duration,
    census: Arc<Census>,
    scratch: Scratch,
    stop: AtomicBool,
}

impl WorkUnit {
    /// Reserve the scratch region for a unit of `duration`.
    ///
    /// # Errors
    ///
    /// * If the scratch region cannot be allocated
    pub fn new(duration: Duration) -> Result<Self, WorkloadError> {
        let census = Arc::new(Census::default());
        Ok(Self {
            duration,
            scratch: Scratch::allocate(ARRAY_SIZE, Arc::clone(&census))?,
            census,
            stop: AtomicBool::new(false),
        })
    }

    pub fn duration(&self) -> Duration {
        self.duration
    }

    /// Run the unit to completion, consuming it.
    ///
    /// # Errors
    ///
    /// * If the background thread panicked
    pub fn run(self) -> Result<WorkStats, WorkloadError> {
        self.run_with(Scratch::pass)
    }

    fn run_with<F>(self, mut pass: F) -> Result<WorkStats, WorkloadError>
    where
        F: FnMut(&mut Scratch) -> f64 + Send,
    {
        let WorkUnit {
            duration,
            census,
            mut scratch,
            stop,
        } = self;
        let started = Instant::now();
        log::trace!("workload start: {:?}", duration);

        let joined = thread::scope(|s| {
            let stop = &stop;
            let scratch = &mut scratch;
            let tally = Tally::new(Arc::clone(&census), Resource::Worker);
            let worker = s.spawn(move || {
                let _tally = tally;
                let mut passes = 0u64;
                while !stop.load(Ordering::Acquire) {
                    black_box(pass(scratch));
                    passes += 1;
                }
                passes
            });

            thread::sleep(duration);
            stop.store(true, Ordering::Release);
            worker.join()
        });
        assert_invariant(
            WORKER_JOINED,
            census.workers.load(Ordering::SeqCst) == 0,
            "worker joined before return",
            Some("run"),
        );

        drop(scratch);
        assert_invariant(
            SCRATCH_RELEASED,
            census.scratch.load(Ordering::SeqCst) == 0,
            "scratch released",
            Some("run"),
        );

        let passes = joined.map_err(|_| WorkloadError::WorkerPanicked)?;
        let elapsed = started.elapsed();
        log::trace!("workload stop: {passes} passes in {:?}", elapsed);
        Ok(WorkStats { passes, elapsed })
    }
}

fn try_filled<T: Clone>(len: usize, value: T) -> Result<Vec<T>, WorkloadError> {
    let mut buffer = Vec::new();
    buffer
        .try_reserve_exact(len)
        .map_err(|source| WorkloadError::Allocation {
            bytes: len.saturating_mul(std::mem::size_of::<T>()),
            source,
        })?;
    buffer.resize(len, value);
    Ok(buffer)
}

/// Working set of one compute pass: a column-major matrix, its right-hand
/// side and the pivot vector.
#[derive(Debug)]
struct Scratch {
    n: usize,
    a: Vec<f64>,
    b: Vec<f64>,
    ipvt: Vec<usize>,
    _tally: Tally,
}

impl Scratch {
    fn allocate(n: usize, census: Arc<Census>) -> Result<Self, WorkloadError> {
        Ok(Self {
            n,
            a: try_filled(n.checked_mul(n).unwrap_or(usize::MAX), 0.0)?,
            b: try_filled(n, 0.0)?,
            ipvt: try_filled(n, 0)?,
            _tally: Tally::new(census, Resource::Scratch),
        })
    }

    /// Generate, factorise and solve once. Returns a checksum of the
    /// solution so the pass cannot be optimised away.
    fn pass(&mut self) -> f64 {
        self.generate();
        self.factor();
        self.solve();
        self.b.iter().sum()
    }

    fn generate(&mut self) {
        let n = self.n;
        let mut seed: i64 = 1325;
        for j in 0..n {
            for i in 0..n {
                seed = 3125 * seed % 65536;
                self.a[j * n + i] = (seed as f64 - 32768.0) / 16384.0;
            }
        }
        self.b.fill(0.0);
        for j in 0..n {
            for i in 0..n {
                self.b[i] += self.a[j * n + i];
            }
        }
    }

    /// LU factorisation with partial pivoting.
    fn factor(&mut self) {
        let n = self.n;
        for k in 0..n.saturating_sub(1) {
            let col_k = k * n;
            let mut pivot = k;
            let mut max = self.a[col_k + k].abs();
            for i in k + 1..n {
                let v = self.a[col_k + i].abs();
                if v > max {
                    max = v;
                    pivot = i;
                }
            }
            self.ipvt[k] = pivot;
            if self.a[col_k + pivot] == 0.0 {
                continue;
            }
            if pivot != k {
                self.a.swap(col_k + pivot, col_k + k);
            }
            let scale = -1.0 / self.a[col_k + k];
            for v in &mut self.a[col_k + k + 1..col_k + n] {
                *v *= scale;
            }

            for j in k + 1..n {
                let col_j = j * n;
                let (left, right) = self.a.split_at_mut(col_j);
                let multipliers = &left[col_k..col_k + n];
                let column = &mut right[..n];
                let t = column[pivot];
                if pivot != k {
                    column[pivot] = column[k];
                    column[k] = t;
                }
                for i in k + 1..n {
                    column[i] += t * multipliers[i];
                }
            }
        }
        if n > 0 {
            self.ipvt[n - 1] = n - 1;
        }
    }

    fn solve(&mut self) {
        let n = self.n;
        let Scratch { a, b, ipvt, .. } = self;
        for k in 0..n.saturating_sub(1) {
            let pivot = ipvt[k];
            let t = b[pivot];
            if pivot != k {
                b[pivot] = b[k];
                b[k] = t;
            }
            for i in k + 1..n {
                b[i] += t * a[k * n + i];
            }
        }
        for k in (0..n).rev() {
            let diagonal = a[k * n + k];
            if diagonal != 0.0 {
                b[k] /= diagonal;
            }
            let t = -b[k];
            for i in 0..k {
                b[i] += t * a[k * n + i];
            }
        }
    }
}
