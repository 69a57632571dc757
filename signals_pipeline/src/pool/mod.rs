//! Bounded-concurrency fan-out over independent tasks.
//!
//! A [`TaskPool`] runs one task function over a batch of task identifiers and
//! gathers every outcome, failures included, into a [`ResultSet`]. Each task is
//! spawned on the runtime, so a panic in one task is recorded as
//! [`TaskError::Panicked`] instead of tearing down the batch.

pub mod reducers;

use std::any::Any;
use std::fmt::Display;
use std::future::Future;
use std::sync::Arc;

use futures::StreamExt;
use futures::stream;
use tokio::task::JoinError;
use tracing::{debug, warn};

use crate::errors::TaskError;

pub const DEFAULT_MAX_CONCURRENCY: usize = 64;

pub type TaskResult<T> = Result<T, TaskError>;

/// A task identifier paired with what its task function returned.
#[derive(Debug)]
pub struct TaskOutcome<I, T> {
    pub task: I,
    pub result: TaskResult<T>,
}

/// Outcomes of one pool batch, in completion order.
#[derive(Debug)]
pub struct ResultSet<I, T> {
    outcomes: Vec<TaskOutcome<I, T>>,
}

impl<I, T> ResultSet<I, T> {
    pub fn len(&self) -> usize {
        self.outcomes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.outcomes.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &TaskOutcome<I, T>> {
        self.outcomes.iter()
    }

    pub fn successes(&self) -> impl Iterator<Item = (&I, &T)> {
        self.outcomes
            .iter()
            .filter_map(|o| o.result.as_ref().ok().map(|value| (&o.task, value)))
    }

    pub fn failures(&self) -> impl Iterator<Item = (&I, &TaskError)> {
        self.outcomes
            .iter()
            .filter_map(|o| o.result.as_ref().err().map(|err| (&o.task, err)))
    }

    pub fn failed_tasks(&self) -> Vec<&I> {
        self.failures().map(|(task, _)| task).collect()
    }

    pub fn failure_count(&self) -> usize {
        self.failures().count()
    }

    pub fn into_results(self) -> Vec<TaskOutcome<I, T>> {
        self.outcomes
    }

    /// Splits the set into successful payloads and failures, keeping task ids.
    pub fn partition(self) -> (Vec<(I, T)>, Vec<(I, TaskError)>) {
        let mut ok = Vec::new();
        let mut failed = Vec::new();
        for TaskOutcome { task, result } in self.outcomes {
            match result {
                Ok(value) => ok.push((task, value)),
                Err(err) => failed.push((task, err)),
            }
        }
        (ok, failed)
    }
}

impl<I: Display, T> ResultSet<I, T> {
    /// Emits one `warn!` per failed task.
    pub fn log_failures(&self, phase: &str) {
        for (task, err) in self.failures() {
            warn!(phase, task = %task, error = %err, "Task failed");
        }
    }

    /// All payloads, or the first failure when any task failed. Every failure
    /// is logged first.
    pub fn into_all_ok(self, phase: &str) -> TaskResult<Vec<(I, T)>> {
        self.log_failures(phase);
        let (ok, failed) = self.partition();
        match failed.into_iter().next() {
            Some((_, err)) => Err(err),
            None => Ok(ok),
        }
    }
}

/// Executes one batch of tasks with at most `max_concurrency` in flight.
#[derive(Debug, Clone, Copy)]
pub struct TaskPool {
    max_concurrency: usize,
}

impl Default for TaskPool {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_CONCURRENCY)
    }
}

impl TaskPool {
    /// `max_concurrency` is clamped to at least one.
    pub fn new(max_concurrency: usize) -> Self {
        Self {
            max_concurrency: max_concurrency.max(1),
        }
    }

    pub fn max_concurrency(&self) -> usize {
        self.max_concurrency
    }

    /// Runs `task_fn(task, shared)` for every task and waits for all of them.
    ///
    /// The returned set always holds exactly one outcome per submitted task.
    pub async fn execute<I, P, T, F, Fut>(
        self,
        tasks: impl IntoIterator<Item = I>,
        task_fn: F,
        shared: Arc<P>,
    ) -> ResultSet<I, T>
    where
        I: Clone + Display + Send + 'static,
        P: ?Sized + Send + Sync + 'static,
        T: Send + 'static,
        F: Fn(I, Arc<P>) -> Fut,
        Fut: Future<Output = TaskResult<T>> + Send + 'static,
    {
        let task_fn = &task_fn;
        let outcomes: Vec<TaskOutcome<I, T>> = stream::iter(tasks)
            .map(|task| {
                let handle = tokio::spawn(task_fn(task.clone(), Arc::clone(&shared)));
                async move {
                    let result = match handle.await {
                        Ok(result) => result,
                        Err(join_err) => Err(TaskError::Panicked {
                            task: task.to_string(),
                            message: panic_message(join_err),
                        }),
                    };
                    TaskOutcome { task, result }
                }
            })
            .buffer_unordered(self.max_concurrency)
            .collect()
            .await;

        debug!(
            tasks = outcomes.len(),
            failed = outcomes.iter().filter(|o| o.result.is_err()).count(),
            "Pool drained"
        );
        ResultSet { outcomes }
    }
}

fn panic_message(err: JoinError) -> String {
    if err.is_cancelled() {
        return "task was cancelled".to_string();
    }
    let payload: Box<dyn Any + Send> = err.into_panic();
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
