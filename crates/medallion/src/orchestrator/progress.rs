//! Progress reporting for task graph runs.
//!
//! The executor emits one [`ProgressUpdate`] whenever a task starts, is
//! retried, finishes or is skipped. Reporters are called from the executor's
//! worker tasks, so they must be `Send + Sync` and should not block.
//!
//! # Example
//!
//! ```rust,ignore
//! use medallion::Pipeline;
//!
//! let pipeline = Pipeline::builder()
//!     .config(config)
//!     .on_progress(|update| {
//!         println!("[{:.0}%] {} {}", update.progress * 100.0, update.task, update.message);
//!     })
//!     .build();
//! ```

use serde::{Deserialize, Serialize};

/// Lifecycle events of a single task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStage {
    /// The task acquired a worker slot and is running
    Started,
    /// An attempt failed with a retryable error; another attempt follows
    Retrying,
    /// The task completed successfully
    Succeeded,
    /// The task failed after its last attempt
    Failed,
    /// The task never ran because an upstream task did not succeed
    Skipped,
}

impl TaskStage {
    /// Returns a human-readable name for the stage.
    pub fn display_name(&self) -> &'static str {
        match self {
            Self::Started => "Started",
            Self::Retrying => "Retrying",
            Self::Succeeded => "Succeeded",
            Self::Failed => "Failed",
            Self::Skipped => "Skipped",
        }
    }

    /// Whether the task is finished once this stage is reported.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed | Self::Skipped)
    }
}

/// A progress event of a graph run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgressUpdate {
    /// Task the event is about
    pub task: String,

    pub stage: TaskStage,

    /// Attempt number (1-based); 0 for skipped tasks
    pub attempt: u32,

    /// Tasks finished so far, including this one if it just finished
    pub completed: usize,

    /// Tasks in the graph
    pub total: usize,

    /// Overall progress (0.0 - 1.0)
    pub progress: f32,

    /// Human-readable message describing the event
    pub message: String,
}

impl ProgressUpdate {
    pub fn new(
        task: impl Into<String>,
        stage: TaskStage,
        completed: usize,
        total: usize,
        message: impl Into<String>,
    ) -> Self {
        let progress = if total > 0 {
            completed as f32 / total as f32
        } else {
            1.0
        };
        Self {
            task: task.into(),
            stage,
            attempt: 0,
            completed,
            total,
            progress: progress.clamp(0.0, 1.0),
            message: message.into(),
        }
    }

    pub fn with_attempt(mut self, attempt: u32) -> Self {
        self.attempt = attempt;
        self
    }
}

/// Trait for receiving progress updates during a run.
///
/// # Example
///
/// ```rust,ignore
/// use medallion::{ProgressReporter, ProgressUpdate};
///
/// struct StderrReporter;
///
/// impl ProgressReporter for StderrReporter {
///     fn report(&self, update: ProgressUpdate) {
///         eprintln!("{}: {}", update.stage.display_name(), update.task);
///     }
/// }
/// ```
pub trait ProgressReporter: Send + Sync {
    /// Called for every task event. Must be cheap and non-blocking.
    fn report(&self, update: ProgressUpdate);
}

/// Wrapper that implements [`ProgressReporter`] using a closure.
pub struct ClosureProgressReporter<F>
where
    F: Fn(ProgressUpdate) + Send + Sync,
{
    callback: F,
}

impl<F> ClosureProgressReporter<F>
where
    F: Fn(ProgressUpdate) + Send + Sync,
{
    /// Creates a new closure-based progress reporter.
    pub fn new(callback: F) -> Self {
        Self { callback }
    }
}

impl<F> ProgressReporter for ClosureProgressReporter<F>
where
    F: Fn(ProgressUpdate) + Send + Sync,
{
    fn report(&self, update: ProgressUpdate) {
        (self.callback)(update);
    }
}

static_assertions::assert_impl_all!(ProgressUpdate: Send, Sync);
