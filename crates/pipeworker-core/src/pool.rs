//! Fixed-size pool of workers sharing one task queue.
//!
//! Every worker gets its own dispatcher thread that drains the queue until it
//! receives its sentinel. Results are written back by task index, so the
//! output order always matches the input order.

use std::sync::{Arc, Mutex, PoisonError};
use std::thread;

use crossbeam_channel::{Receiver, unbounded};
use rayon::prelude::*;
use tracing::{debug, info};

use crate::config::PoolConfig;
use crate::error::{CapturedOutput, Error, Result};
use crate::geometry::Geometry;
use crate::worker::{EngineLauncher, EvaluateOptions, ResultRecord, Worker};

/// One named evaluation submitted to a pool.
#[derive(Debug, Clone)]
pub struct PoolTask {
    pub name: String,
    pub geometry: Geometry,
    pub options: EvaluateOptions,
}

impl PoolTask {
    pub fn new(name: impl Into<String>, geometry: Geometry, options: EvaluateOptions) -> Self {
        Self {
            name: name.into(),
            geometry,
            options,
        }
    }
}

type Queue = Receiver<Option<(usize, PoolTask)>>;

/// A set of independent workers evaluating batches in parallel.
///
/// Pool workers never keep results for warm starts: a follow-up task is not
/// guaranteed to land on the worker that holds them.
pub struct WorkerPool {
    workers: Vec<Worker>,
}

impl WorkerPool {
    /// Start `config.num_workers` workers in parallel.
    ///
    /// If any of them fails to start, the ones that did are stopped again and
    /// the first failure is reported.
    pub fn new(launcher: Arc<dyn EngineLauncher>, config: PoolConfig) -> Result<Self> {
        let total = config.num_workers;
        if total == 0 {
            return Err(Error::Config("a pool needs at least one worker".to_string()));
        }

        // One thread per worker: all engines start concurrently.
        let started: Vec<Result<Worker>> = thread::scope(|scope| {
            let handles: Vec<_> = (0..total)
                .map(|index| {
                    let launcher = Arc::clone(&launcher);
                    let config = config.member(index);
                    scope.spawn(move || Worker::new(launcher, config))
                })
                .collect();
            handles
                .into_iter()
                .map(|handle| {
                    handle.join().unwrap_or_else(|_| {
                        Err(Error::Ipc("worker startup thread panicked".to_string()))
                    })
                })
                .collect()
        });

        let mut workers = Vec::with_capacity(total);
        let mut errors = Vec::new();
        for result in started {
            match result {
                Ok(worker) => workers.push(worker),
                Err(e) => errors.push(e),
            }
        }

        if let Some(first) = errors.into_iter().next() {
            let failed = total - workers.len();
            for worker in &mut workers {
                worker.stop();
            }
            return Err(Error::PoolStartup {
                failed,
                total,
                first: Box::new(first),
            });
        }

        info!(workers = total, "Worker pool started");
        Ok(Self { workers })
    }

    pub fn len(&self) -> usize {
        self.workers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.workers.is_empty()
    }

    /// Evaluate a batch, returning one record per task in input order.
    ///
    /// Failures of single tasks become failed records; they never abort the
    /// batch. The whole batch is validated before anything is queued.
    pub fn submit(&mut self, tasks: Vec<PoolTask>) -> Result<Vec<ResultRecord>> {
        if self.workers.is_empty() {
            return Err(Error::InvalidOperation("worker pool has been stopped".to_string()));
        }
        for task in &tasks {
            task.options.validate()?;
        }

        let count = tasks.len();
        let (sender, queue) = unbounded();
        for task in tasks.into_iter().enumerate() {
            sender
                .send(Some(task))
                .map_err(|_| Error::Ipc("Task queue closed".to_string()))?;
        }
        for _ in 0..self.workers.len() {
            sender
                .send(None)
                .map_err(|_| Error::Ipc("Task queue closed".to_string()))?;
        }
        debug!(tasks = count, workers = self.workers.len(), "Dispatching batch");

        let slots: Mutex<Vec<Option<ResultRecord>>> = Mutex::new((0..count).map(|_| None).collect());
        thread::scope(|scope| {
            for worker in &mut self.workers {
                let queue = queue.clone();
                let slots = &slots;
                scope.spawn(move || dispatch(worker, queue, slots));
            }
        });

        slots
            .into_inner()
            .unwrap_or_else(PoisonError::into_inner)
            .into_iter()
            .enumerate()
            .map(|(index, slot)| {
                slot.ok_or_else(|| Error::Ipc(format!("No result was produced for task {}", index)))
            })
            .collect()
    }

    /// Single point calculations with shared options.
    pub fn single_points(
        &mut self,
        items: Vec<(String, Geometry)>,
        options: &EvaluateOptions,
    ) -> Result<Vec<ResultRecord>> {
        let tasks = items
            .into_iter()
            .map(|(name, geometry)| PoolTask::new(name, geometry, options.clone()))
            .collect();
        self.submit(tasks)
    }

    /// Stop every worker and return what each of them printed.
    pub fn stop(&mut self) -> Vec<CapturedOutput> {
        let outputs = self.workers.par_iter_mut().map(Worker::stop).collect();
        self.workers.clear();
        info!("Worker pool stopped");
        outputs
    }
}

/// Drain the queue on one worker until its sentinel arrives.
fn dispatch(worker: &mut Worker, queue: Queue, slots: &Mutex<Vec<Option<ResultRecord>>>) {
    while let Ok(Some((index, task))) = queue.recv() {
        let record = match worker.evaluate(&task.name, &task.geometry, &task.options) {
            Ok(record) => record,
            Err(e) => ResultRecord::failure(task.name, task.geometry, e),
        };
        let mut slots = slots.lock().unwrap_or_else(PoisonError::into_inner);
        slots[index] = Some(record);
    }
}
