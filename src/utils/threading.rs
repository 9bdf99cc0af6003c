//! # Worker Pool
//!
//! Per-group evaluation within an iteration is embarrassingly parallel;
//! iterations themselves are sequential. [`WorkerPool`] owns a rayon pool
//! that is reused for `max_age` iterations and then rebuilt, and is torn
//! down when the loop releases it (or on drop).
//!
//! [`Executor`] is the task-distribution seam: `Sequential` runs tasks in
//! order on the calling thread, `Pool` maps them across workers. Both
//! preserve input order, so results are identical either way.

use rayon::prelude::*;

use crate::error::{PhyloFactorError, Result};

/// Pool size and reuse budget.
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize)]
pub struct PoolConfig {
    pub n_threads: usize,
    /// Iterations served before the pool is rebuilt
    pub max_age: usize,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            n_threads: std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1),
            max_age: usize::MAX,
        }
    }
}

/// Build a configured rayon thread pool.
pub fn build_thread_pool(n_threads: usize) -> Result<rayon::ThreadPool> {
    rayon::ThreadPoolBuilder::new()
        .num_threads(n_threads)
        .thread_name(|i| format!("phylofactor-worker-{}", i))
        .build()
        .map_err(|e| PhyloFactorError::worker_pool(format!("failed to create thread pool: {}", e)))
}

/// Owned, lazily built worker pool with an age budget.
#[derive(Debug)]
pub struct WorkerPool {
    config: PoolConfig,
    pool: Option<rayon::ThreadPool>,
    age: usize,
    generation: usize,
}

impl WorkerPool {
    pub fn new(config: PoolConfig) -> Result<Self> {
        if config.n_threads == 0 {
            return Err(PhyloFactorError::config("worker pool needs at least one thread"));
        }
        if config.max_age == 0 {
            return Err(PhyloFactorError::config("worker pool age budget must be positive"));
        }
        Ok(Self {
            config,
            pool: None,
            age: 0,
            generation: 0,
        })
    }

    pub fn config(&self) -> PoolConfig {
        self.config
    }

    pub fn is_active(&self) -> bool {
        self.pool.is_some()
    }

    /// Number of pools built so far.
    pub fn generation(&self) -> usize {
        self.generation
    }

    /// Executor for one iteration, rebuilding the pool when its age budget is spent.
    pub fn executor(&mut self) -> Result<Executor<'_>> {
        if self.pool.is_some() && self.age >= self.config.max_age {
            tracing::debug!(generation = self.generation, "worker pool age budget spent, rebuilding");
            self.release();
        }
        if self.pool.is_none() {
            self.pool = Some(build_thread_pool(self.config.n_threads)?);
            self.generation += 1;
            self.age = 0;
        }
        self.age += 1;
        match &self.pool {
            Some(pool) => Ok(Executor::Pool(pool)),
            None => Err(PhyloFactorError::worker_pool("worker pool unavailable")),
        }
    }

    /// Tear down all worker threads. The next `executor` call rebuilds.
    pub fn release(&mut self) {
        if self.pool.take().is_some() {
            tracing::debug!(generation = self.generation, "worker pool released");
        }
        self.age = 0;
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.release();
    }
}

/// Releases the borrowed pool when dropped, on every exit path.
pub struct PoolLease<'a> {
    pool: Option<&'a mut WorkerPool>,
}

impl<'a> PoolLease<'a> {
    pub fn new(pool: Option<&'a mut WorkerPool>) -> Self {
        Self { pool }
    }

    pub fn executor(&mut self) -> Result<Executor<'_>> {
        match self.pool.as_deref_mut() {
            Some(pool) => pool.executor(),
            None => Ok(Executor::Sequential),
        }
    }
}

impl Drop for PoolLease<'_> {
    fn drop(&mut self) {
        if let Some(pool) = self.pool.as_deref_mut() {
            pool.release();
        }
    }
}

/// Task distribution for one iteration.
#[derive(Clone, Copy, Debug)]
pub enum Executor<'a> {
    Sequential,
    Pool(&'a rayon::ThreadPool),
}

impl Executor<'_> {
    /// Apply `f` to every task, preserving order.
    pub fn map<T, R, F>(&self, tasks: &[T], f: F) -> Vec<R>
    where
        T: Sync,
        R: Send,
        F: Fn(&T) -> R + Sync + Send,
    {
        match self {
            Self::Sequential => tasks.iter().map(f).collect(),
            Self::Pool(pool) => pool.install(|| tasks.par_iter().map(f).collect()),
        }
    }

    pub fn is_parallel(&self) -> bool {
        matches!(self, Self::Pool(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sequential_and_pool_agree() {
        let tasks: Vec<u64> = (0..100).collect();
        let sequential = Executor::Sequential.map(&tasks, |x| x * x);

        let mut pool = WorkerPool::new(PoolConfig { n_threads: 3, max_age: 10 }).unwrap();
        let parallel = pool.executor().unwrap().map(&tasks, |x| x * x);
        assert_eq!(sequential, parallel);
    }

    #[test]
    fn test_pool_rebuilt_after_age_budget() {
        let mut pool = WorkerPool::new(PoolConfig { n_threads: 2, max_age: 2 }).unwrap();
        for _ in 0..5 {
            pool.executor().unwrap();
        }
        // Ages 1,2 | 1,2 | 1
        assert_eq!(pool.generation(), 3);
        assert!(pool.is_active());
    }

    #[test]
    fn test_lease_releases_on_drop() {
        let mut pool = WorkerPool::new(PoolConfig { n_threads: 2, max_age: 100 }).unwrap();
        {
            let mut lease = PoolLease::new(Some(&mut pool));
            assert!(lease.executor().unwrap().is_parallel());
        }
        assert!(!pool.is_active());
    }

    #[test]
    fn test_invalid_config() {
        assert!(WorkerPool::new(PoolConfig { n_threads: 0, max_age: 1 }).is_err());
        assert!(WorkerPool::new(PoolConfig { n_threads: 1, max_age: 0 }).is_err());
    }

    #[test]
    fn test_worker_threads_are_named() {
        let mut pool = WorkerPool::new(PoolConfig { n_threads: 2, max_age: 1 }).unwrap();
        let names = pool.executor().unwrap().map(&[0u8; 4], |_| {
            std::thread::current().name().unwrap_or_default().to_string()
        });
        assert!(names.iter().all(|n| n.starts_with("phylofactor-worker-")));
    }
}
