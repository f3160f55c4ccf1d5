//! Leaf tasks and the references that name them.
//!
//! A leaf task may finish synchronously, hand back a future, or hand back a
//! stream. [`TaskOutput`] captures all three shapes so the executor can settle
//! them into one awaited outcome.

use std::borrow::Cow;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

use futures::future::BoxFuture;
use futures::stream::{BoxStream, Stream, StreamExt};

use crate::combinator::Combinator;
use crate::error::StartupResult;
use crate::splash::SplashScreen;

/// Name of a resolvable leaf task.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskId(Cow<'static, str>);

impl TaskId {
    /// Create an id from a static name, usable in `const` items.
    #[must_use]
    pub const fn new(name: &'static str) -> Self {
        Self(Cow::Borrowed(name))
    }

    /// The task name.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for TaskId {
    fn from(name: String) -> Self {
        Self(Cow::Owned(name))
    }
}

impl From<&'static str> for TaskId {
    fn from(name: &'static str) -> Self {
        Self::new(name)
    }
}

/// A node in a startup tree: either a leaf resolved at run time or a combinator.
#[derive(Debug, Clone)]
pub enum TaskRef {
    /// A task resolved through the executor's [`Resolver`](crate::Resolver).
    Leaf(TaskId),
    /// A combinator evaluated structurally by the executor.
    Combinator(Arc<Combinator>),
}

impl TaskRef {
    /// Reference a leaf task by id.
    #[must_use]
    pub fn leaf(id: impl Into<TaskId>) -> Self {
        Self::Leaf(id.into())
    }

    /// Short label used in logs.
    #[must_use]
    pub fn label(&self) -> String {
        match self {
            Self::Leaf(id) => id.to_string(),
            Self::Combinator(node) => node.kind().to_string(),
        }
    }
}

impl From<TaskId> for TaskRef {
    fn from(id: TaskId) -> Self {
        Self::Leaf(id)
    }
}

impl From<Combinator> for TaskRef {
    fn from(node: Combinator) -> Self {
        Self::Combinator(Arc::new(node))
    }
}

/// What a leaf task hands back when executed.
pub enum TaskOutput<'a> {
    /// The task already finished.
    Ready(StartupResult<()>),
    /// The task finishes when the future resolves.
    Deferred(BoxFuture<'a, StartupResult<()>>),
    /// The task finishes when the stream ends; an `Err` item fails it.
    ///
    /// `Ok` items are progress notifications and are otherwise ignored.
    Stream(BoxStream<'a, StartupResult<()>>),
}

impl<'a> TaskOutput<'a> {
    /// A task that succeeded synchronously.
    #[must_use]
    pub fn ok() -> Self {
        Self::Ready(Ok(()))
    }

    /// Wrap a future.
    pub fn deferred<F>(future: F) -> Self
    where
        F: Future<Output = StartupResult<()>> + Send + 'a,
    {
        Self::Deferred(Box::pin(future))
    }

    /// Wrap a stream.
    pub fn stream<S>(stream: S) -> Self
    where
        S: Stream<Item = StartupResult<()>> + Send + 'a,
    {
        Self::Stream(Box::pin(stream))
    }

    /// Wait for the task to reach its terminal outcome.
    ///
    /// A stream is drained until it ends or yields its first error; on error
    /// the stream is dropped, which unsubscribes from it.
    ///
    /// # Errors
    ///
    /// Returns the error the task reported.
    pub async fn settle(self) -> StartupResult<()> {
        match self {
            Self::Ready(result) => result,
            Self::Deferred(future) => future.await,
            Self::Stream(mut stream) => {
                while let Some(item) = stream.next().await {
                    item?;
                }
                Ok(())
            }
        }
    }
}

impl From<StartupResult<()>> for TaskOutput<'_> {
    fn from(result: StartupResult<()>) -> Self {
        Self::Ready(result)
    }
}

/// A unit of startup work.
pub trait Task: Send + Sync {
    /// Run the task. Success is the absence of an error.
    fn execute<'a>(&'a self, ctx: &'a TaskContext) -> TaskOutput<'a>;
}

/// Execution context threaded through every task run.
///
/// Carries the splash message stack and the path of task names leading to the
/// current task, which the executor records on its tracing spans.
#[derive(Debug, Clone)]
pub struct TaskContext {
    splash: SplashScreen,
    scope: Vec<TaskId>,
}

impl TaskContext {
    /// Context for the root of a startup tree.
    #[must_use]
    pub fn new(splash: SplashScreen) -> Self {
        Self {
            splash,
            scope: Vec::new(),
        }
    }

    /// Context for a task nested under this one.
    #[must_use]
    pub fn child(&self, id: &TaskId) -> Self {
        let mut scope = self.scope.clone();
        scope.push(id.clone());
        Self {
            splash: self.splash.clone(),
            scope,
        }
    }

    /// The splash message stack.
    #[must_use]
    pub fn splash(&self) -> &SplashScreen {
        &self.splash
    }

    /// The innermost task, if any.
    #[must_use]
    pub fn current(&self) -> Option<&TaskId> {
        self.scope.last()
    }

    /// Number of enclosing leaf tasks.
    #[must_use]
    pub fn depth(&self) -> usize {
        self.scope.len()
    }

    /// Scope path such as `Personalization/SavedSession`.
    #[must_use]
    pub fn scope(&self) -> String {
        self.scope
            .iter()
            .map(TaskId::as_str)
            .collect::<Vec<_>>()
            .join("/")
    }
}

/// Adapter turning a synchronous closure into a [`Task`].
pub struct FnTask<F> {
    f: F,
}

impl<F> FnTask<F>
where
    F: Fn(&TaskContext) -> StartupResult<()> + Send + Sync,
{
    /// Wrap `f`.
    pub fn new(f: F) -> Self {
        Self { f }
    }
}

impl<F> Task for FnTask<F>
where
    F: Fn(&TaskContext) -> StartupResult<()> + Send + Sync,
{
    fn execute<'a>(&'a self, ctx: &'a TaskContext) -> TaskOutput<'a> {
        TaskOutput::Ready((self.f)(ctx))
    }
}
