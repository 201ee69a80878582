//! Dependency-ordered task execution.
//!
//! A [`TaskGraph`] holds named tasks with explicit dependencies. Running the
//! graph spawns every task whose dependencies all succeeded into a `JoinSet`,
//! bounded by a semaphore; task bodies run on the blocking pool. A task that
//! fails only takes its transitive dependents down with it: they are marked
//! skipped while independent branches keep running.

use super::progress::{ProgressReporter, ProgressUpdate, TaskStage};
use crate::config::RetryPolicy;
use crate::error::{PipelineError, Result};
use serde::Serialize;
use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Instant;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

type TaskBody<C> = Arc<dyn Fn(&C) -> Result<()> + Send + Sync>;

/// A named unit of work over a shared context `C`.
pub struct Task<C> {
    name: String,
    deps: Vec<String>,
    retry: RetryPolicy,
    critical: bool,
    body: TaskBody<C>,
}

impl<C> Task<C> {
    pub fn new<F>(name: impl Into<String>, body: F) -> Self
    where
        F: Fn(&C) -> Result<()> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            deps: Vec::new(),
            retry: RetryPolicy::NONE,
            critical: true,
            body: Arc::new(body),
        }
    }

    /// Run only after every task in `deps` succeeded.
    pub fn after<I, S>(mut self, deps: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        for dep in deps {
            let dep = dep.into();
            if !self.deps.contains(&dep) {
                self.deps.push(dep);
            }
        }
        self
    }

    /// Retry retryable failures under `policy`.
    pub fn retry(mut self, policy: RetryPolicy) -> Self {
        self.retry = policy;
        self
    }

    /// A failure of this task downgrades the run to partial success instead
    /// of failing it.
    pub fn non_critical(mut self) -> Self {
        self.critical = false;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn dependencies(&self) -> &[String] {
        &self.deps
    }

    pub fn is_critical(&self) -> bool {
        self.critical
    }
}

impl<C> fmt::Debug for Task<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task")
            .field("name", &self.name)
            .field("deps", &self.deps)
            .field("retry", &self.retry)
            .field("critical", &self.critical)
            .finish_non_exhaustive()
    }
}

/// Final state of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Success,
    Failed,
    Skipped,
}

/// What happened to one task during a run.
#[derive(Debug, Serialize)]
pub struct TaskOutcome {
    pub name: String,
    pub status: TaskStatus,
    pub critical: bool,
    pub attempts: u32,
    pub duration_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<PipelineError>,
}

impl TaskOutcome {
    pub fn is_success(&self) -> bool {
        self.status == TaskStatus::Success
    }
}

/// Overall state of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    /// Every task succeeded
    Success,
    /// Every critical task succeeded; some non-critical task did not
    PartialSuccess,
    /// A critical task failed or was skipped
    Failed,
}

/// Outcomes of every task, in the order the tasks were added.
#[derive(Debug, Serialize)]
pub struct GraphRun {
    pub status: RunStatus,
    pub tasks: Vec<TaskOutcome>,
    pub duration_ms: u64,
}

impl GraphRun {
    pub fn outcome(&self, name: &str) -> Option<&TaskOutcome> {
        self.tasks.iter().find(|t| t.name == name)
    }

    pub fn status_of(&self, name: &str) -> Option<TaskStatus> {
        self.outcome(name).map(|t| t.status)
    }

    /// Tasks that failed or were skipped.
    pub fn unsuccessful(&self) -> impl Iterator<Item = &TaskOutcome> {
        self.tasks.iter().filter(|t| !t.is_success())
    }

    fn status_from(tasks: &[TaskOutcome]) -> RunStatus {
        if tasks.iter().any(|t| t.critical && !t.is_success()) {
            RunStatus::Failed
        } else if tasks.iter().any(|t| !t.is_success()) {
            RunStatus::PartialSuccess
        } else {
            RunStatus::Success
        }
    }
}

/// Result of a task's attempts, sent back from its worker.
struct Attempted {
    index: usize,
    attempts: u32,
    duration_ms: u64,
    result: Result<()>,
}

/// Shared pieces every worker needs.
struct Runner<C> {
    ctx: Arc<C>,
    semaphore: Arc<Semaphore>,
    reporter: Option<Arc<dyn ProgressReporter>>,
    completed: Arc<AtomicUsize>,
    total: usize,
}

/// A DAG of tasks over a shared context.
pub struct TaskGraph<C> {
    tasks: Vec<Task<C>>,
}

impl<C> Default for TaskGraph<C> {
    fn default() -> Self {
        Self { tasks: Vec::new() }
    }
}

impl<C> fmt::Debug for TaskGraph<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskGraph").field("tasks", &self.tasks).finish()
    }
}

impl<C: Send + Sync + 'static> TaskGraph<C> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a task. Names must be unique.
    pub fn add(&mut self, task: Task<C>) -> Result<()> {
        if self.tasks.iter().any(|t| t.name == task.name) {
            return Err(PipelineError::InvalidGraph(format!(
                "duplicate task '{}'",
                task.name
            )));
        }
        self.tasks.push(task);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    pub fn tasks(&self) -> &[Task<C>] {
        &self.tasks
    }

    /// Topological waves: every task in a wave depends only on tasks in
    /// earlier waves. Within a wave, tasks keep insertion order.
    ///
    /// Fails on unknown dependencies and cycles.
    pub fn execution_order(&self) -> Result<Vec<Vec<String>>> {
        let dependents = self.dependents()?;
        let mut pending: Vec<usize> = self.tasks.iter().map(|t| t.deps.len()).collect();

        let mut wave: Vec<usize> = (0..self.tasks.len()).filter(|&i| pending[i] == 0).collect();
        let mut waves = Vec::new();
        let mut ordered = 0;

        while !wave.is_empty() {
            ordered += wave.len();
            let mut next = Vec::new();
            for &i in &wave {
                for &d in &dependents[i] {
                    pending[d] -= 1;
                    if pending[d] == 0 {
                        next.push(d);
                    }
                }
            }
            waves.push(wave.iter().map(|&i| self.tasks[i].name.clone()).collect());
            next.sort_unstable();
            wave = next;
        }

        if ordered < self.tasks.len() {
            let stuck: Vec<&str> = self
                .tasks
                .iter()
                .zip(&pending)
                .filter(|(_, p)| **p > 0)
                .map(|(t, _)| t.name.as_str())
                .collect();
            return Err(PipelineError::InvalidGraph(format!(
                "cycle detected among: {}",
                stuck.join(", ")
            )));
        }

        Ok(waves)
    }

    /// Run every task at most once, at most `concurrency` at a time.
    ///
    /// Returns an error only for a malformed graph or a worker that could
    /// not be joined; task failures are reported in the [`GraphRun`].
    pub async fn run(
        &self,
        ctx: Arc<C>,
        concurrency: usize,
        reporter: Option<Arc<dyn ProgressReporter>>,
    ) -> Result<GraphRun> {
        let waves = self.execution_order()?;
        let dependents = self.dependents()?;
        let started = Instant::now();

        info!(
            tasks = self.tasks.len(),
            waves = waves.len(),
            concurrency, "Starting task graph"
        );

        let runner = Runner {
            ctx,
            semaphore: Arc::new(Semaphore::new(concurrency.max(1))),
            reporter,
            completed: Arc::new(AtomicUsize::new(0)),
            total: self.tasks.len(),
        };

        let mut pending: Vec<usize> = self.tasks.iter().map(|t| t.deps.len()).collect();
        let mut outcomes: Vec<Option<TaskOutcome>> = self.tasks.iter().map(|_| None).collect();
        let mut join_set: JoinSet<Attempted> = JoinSet::new();

        for (index, _) in pending.iter().enumerate().filter(|(_, p)| **p == 0) {
            self.spawn(index, &runner, &mut join_set);
        }

        while let Some(joined) = join_set.join_next().await {
            let attempted = joined
                .map_err(|e| PipelineError::Internal(format!("task worker failed: {}", e)))?;
            let index = attempted.index;
            let outcome = self.finish(attempted, &runner);
            outcomes[index] = Some(outcome);

            // Release dependents; skip those with an unsuccessful dependency.
            let mut resolved = VecDeque::from([index]);
            while let Some(done) = resolved.pop_front() {
                for &d in &dependents[done] {
                    pending[d] -= 1;
                    if pending[d] > 0 {
                        continue;
                    }
                    match self.unsuccessful_dependency(d, &outcomes) {
                        None => self.spawn(d, &runner, &mut join_set),
                        Some(upstream) => {
                            outcomes[d] = Some(self.skip(d, upstream, &runner));
                            resolved.push_back(d);
                        }
                    }
                }
            }
        }

        let tasks: Vec<TaskOutcome> = outcomes.into_iter().flatten().collect();
        let status = GraphRun::status_from(&tasks);
        let duration_ms = started.elapsed().as_millis() as u64;

        info!(?status, duration_ms, "Task graph finished");
        Ok(GraphRun {
            status,
            tasks,
            duration_ms,
        })
    }

    /// For each task, the indices of the tasks that depend on it.
    fn dependents(&self) -> Result<Vec<Vec<usize>>> {
        let index: HashMap<&str, usize> = self
            .tasks
            .iter()
            .enumerate()
            .map(|(i, t)| (t.name.as_str(), i))
            .collect();

        let mut dependents = vec![Vec::new(); self.tasks.len()];
        for (i, task) in self.tasks.iter().enumerate() {
            for dep in &task.deps {
                let &d = index.get(dep.as_str()).ok_or_else(|| {
                    PipelineError::InvalidGraph(format!(
                        "task '{}' depends on unknown task '{}'",
                        task.name, dep
                    ))
                })?;
                dependents[d].push(i);
            }
        }
        Ok(dependents)
    }

    fn unsuccessful_dependency(&self, index: usize, outcomes: &[Option<TaskOutcome>]) -> Option<String> {
        self.tasks[index]
            .deps
            .iter()
            .find(|dep| {
                !outcomes
                    .iter()
                    .flatten()
                    .any(|o| &o.name == *dep && o.is_success())
            })
            .cloned()
    }

    fn spawn(&self, index: usize, runner: &Runner<C>, join_set: &mut JoinSet<Attempted>) {
        let task = &self.tasks[index];
        let name = task.name.clone();
        let body = Arc::clone(&task.body);
        let retry = task.retry;
        let ctx = Arc::clone(&runner.ctx);
        let semaphore = Arc::clone(&runner.semaphore);
        let reporter = runner.reporter.clone();
        let completed = Arc::clone(&runner.completed);
        let total = runner.total;

        debug!(task = %name, "Task ready");
        join_set.spawn(async move {
            let _permit = match semaphore.acquire_owned().await {
                Ok(permit) => permit,
                Err(e) => {
                    return Attempted {
                        index,
                        attempts: 0,
                        duration_ms: 0,
                        result: Err(PipelineError::Internal(format!("semaphore closed: {}", e))),
                    };
                }
            };

            let started = Instant::now();
            let mut attempt = 0;
            let result = loop {
                attempt += 1;
                if let Some(reporter) = &reporter {
                    reporter.report(
                        ProgressUpdate::new(
                            &name,
                            TaskStage::Started,
                            completed.load(Ordering::SeqCst),
                            total,
                            format!("Running {}", name),
                        )
                        .with_attempt(attempt),
                    );
                }

                let body = Arc::clone(&body);
                let ctx = Arc::clone(&ctx);
                let result = tokio::task::spawn_blocking(move || body(ctx.as_ref()))
                    .await
                    .unwrap_or_else(|e| {
                        Err(PipelineError::Internal(format!("task panicked: {}", e)))
                    });

                match result {
                    Err(err) if err.is_retryable() && attempt < retry.max_attempts() => {
                        warn!(
                            task = %name,
                            attempt,
                            max_attempts = retry.max_attempts(),
                            delay_ms = retry.delay_ms,
                            error = %err,
                            "Retryable task error, will retry"
                        );
                        if let Some(reporter) = &reporter {
                            reporter.report(
                                ProgressUpdate::new(
                                    &name,
                                    TaskStage::Retrying,
                                    completed.load(Ordering::SeqCst),
                                    total,
                                    err.to_string(),
                                )
                                .with_attempt(attempt),
                            );
                        }
                        tokio::time::sleep(retry.delay()).await;
                    }
                    other => break other,
                }
            };

            Attempted {
                index,
                attempts: attempt,
                duration_ms: started.elapsed().as_millis() as u64,
                result,
            }
        });
    }

    fn finish(&self, attempted: Attempted, runner: &Runner<C>) -> TaskOutcome {
        let task = &self.tasks[attempted.index];
        let completed = runner.completed.fetch_add(1, Ordering::SeqCst) + 1;

        let (status, error, message) = match attempted.result {
            Ok(()) => {
                info!(
                    task = %task.name,
                    attempts = attempted.attempts,
                    duration_ms = attempted.duration_ms,
                    "Task succeeded"
                );
                (TaskStatus::Success, None, format!("{} succeeded", task.name))
            }
            Err(err) => {
                let err = PipelineError::TaskFailed {
                    task: task.name.clone(),
                    attempts: attempted.attempts,
                    source: Box::new(err),
                };
                if task.critical {
                    error!(task = %task.name, error = %err, "Task failed");
                } else {
                    warn!(task = %task.name, error = %err, "Non-critical task failed");
                }
                let message = err.to_string();
                (TaskStatus::Failed, Some(err), message)
            }
        };

        let stage = if status == TaskStatus::Success {
            TaskStage::Succeeded
        } else {
            TaskStage::Failed
        };
        if let Some(reporter) = &runner.reporter {
            reporter.report(
                ProgressUpdate::new(&task.name, stage, completed, runner.total, message)
                    .with_attempt(attempted.attempts),
            );
        }

        TaskOutcome {
            name: task.name.clone(),
            status,
            critical: task.critical,
            attempts: attempted.attempts,
            duration_ms: attempted.duration_ms,
            error,
        }
    }

    fn skip(&self, index: usize, upstream: String, runner: &Runner<C>) -> TaskOutcome {
        let task = &self.tasks[index];
        let completed = runner.completed.fetch_add(1, Ordering::SeqCst) + 1;
        let err = PipelineError::UpstreamFailed {
            task: task.name.clone(),
            upstream,
        };
        warn!(task = %task.name, reason = %err, "Task skipped");

        if let Some(reporter) = &runner.reporter {
            reporter.report(ProgressUpdate::new(
                &task.name,
                TaskStage::Skipped,
                completed,
                runner.total,
                err.to_string(),
            ));
        }

        TaskOutcome {
            name: task.name.clone(),
            status: TaskStatus::Skipped,
            critical: task.critical,
            attempts: 0,
            duration_ms: 0,
            error: Some(err),
        }
    }
}
