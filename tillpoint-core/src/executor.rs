//! Task resolution and execution.
//!
//! [`TaskExecutor`] walks a startup tree. Combinators are evaluated
//! structurally; leaves are resolved through a [`Resolver`], run inside a
//! tracing span carrying the task name and scope, and their [`TaskOutput`]
//! is settled into a single outcome.
//!
//! [`TaskOutput`]: crate::TaskOutput

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use futures::future::{BoxFuture, FutureExt};
use tracing::{debug_span, info, info_span, warn, Instrument};

use crate::combinator::Combinator;
use crate::error::{StartupError, StartupResult};
use crate::task::{Task, TaskContext, TaskId, TaskRef};

/// Turns task ids into task instances.
pub trait Resolver: Send + Sync {
    /// Resolve `id`, or `None` if nothing is registered under it.
    fn resolve(&self, id: &TaskId) -> Option<Arc<dyn Task>>;
}

type TaskFactory = Arc<dyn Fn() -> Arc<dyn Task> + Send + Sync>;

/// Explicit map from task ids to factories.
#[derive(Clone, Default)]
pub struct TaskRegistry {
    factories: HashMap<TaskId, TaskFactory>,
}

impl TaskRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a factory building a fresh task on every resolution.
    pub fn register<F>(&mut self, id: TaskId, factory: F) -> &mut Self
    where
        F: Fn() -> Arc<dyn Task> + Send + Sync + 'static,
    {
        if self.factories.insert(id.clone(), Arc::new(factory)).is_some() {
            tracing::warn!(task = %id, "Task registration replaced");
        }
        self
    }

    /// Register a shared instance returned on every resolution.
    pub fn register_instance(&mut self, id: TaskId, task: Arc<dyn Task>) -> &mut Self {
        self.register(id, move || Arc::clone(&task))
    }

    /// Check if `id` is registered.
    #[must_use]
    pub fn contains(&self, id: &TaskId) -> bool {
        self.factories.contains_key(id)
    }

    /// Number of registered tasks.
    #[must_use]
    pub fn len(&self) -> usize {
        self.factories.len()
    }

    /// Check if the registry is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.factories.is_empty()
    }
}

impl Resolver for TaskRegistry {
    fn resolve(&self, id: &TaskId) -> Option<Arc<dyn Task>> {
        self.factories.get(id).map(|factory| factory())
    }
}

impl fmt::Debug for TaskRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut ids: Vec<&TaskId> = self.factories.keys().collect();
        ids.sort();
        f.debug_struct("TaskRegistry").field("tasks", &ids).finish()
    }
}

/// Executes startup trees.
#[derive(Clone)]
pub struct TaskExecutor {
    resolver: Arc<dyn Resolver>,
}

impl TaskExecutor {
    /// Create an executor resolving leaves through `resolver`.
    pub fn new(resolver: Arc<dyn Resolver>) -> Self {
        Self { resolver }
    }

    /// Run `task` and everything beneath it.
    ///
    /// # Errors
    ///
    /// Returns the failure that propagated to this node, according to the
    /// semantics of the enclosing combinators.
    pub fn run<'a>(
        &'a self,
        task: &'a TaskRef,
        ctx: &'a TaskContext,
    ) -> BoxFuture<'a, StartupResult<()>> {
        match task {
            TaskRef::Leaf(id) => self.run_leaf(id, ctx).boxed(),
            TaskRef::Combinator(node) => {
                let span = debug_span!("combinator", kind = %node.kind(), scope = %ctx.scope());
                self.run_combinator(node, ctx).instrument(span).boxed()
            }
        }
    }

    async fn run_combinator(&self, node: &Combinator, ctx: &TaskContext) -> StartupResult<()> {
        match node {
            Combinator::All(tasks) => {
                for task in tasks {
                    self.run(task, ctx).await?;
                }
                Ok(())
            }
            Combinator::OneOf(tasks) => {
                for (index, task) in tasks.iter().enumerate() {
                    match self.run(task, ctx).await {
                        Ok(()) => return Ok(()),
                        Err(e) => {
                            warn!(
                                alternative = index + 1,
                                of = tasks.len(),
                                task = %task.label(),
                                error = %e,
                                "Alternative failed, trying next"
                            );
                        }
                    }
                }
                if tasks.is_empty() {
                    Ok(())
                } else {
                    Err(StartupError::AllTasksFailed {
                        attempted: tasks.len(),
                    })
                }
            }
            Combinator::Optional(task) => {
                if let Err(e) = self.run(task, ctx).await {
                    info!(task = %task.label(), error = %e, "Optional task failed, continuing");
                }
                Ok(())
            }
            Combinator::WithSplashMessage { message, task } => {
                // The handle pops on drop, so the message also goes away if
                // this future is dropped mid-flight.
                let handle = ctx.splash().push_message(message.clone());
                let result = self.run(task, ctx).await;
                handle.pop();
                result
            }
        }
    }

    async fn run_leaf(&self, id: &TaskId, parent: &TaskContext) -> StartupResult<()> {
        let Some(task) = self.resolver.resolve(id) else {
            warn!(task = %id, "Task could not be resolved");
            return Err(StartupError::Unresolved(id.clone()));
        };

        let ctx = parent.child(id);
        let span = info_span!("task", task = %id, scope = %ctx.scope());

        async {
            info!("Task started");
            let started = Instant::now();
            let result = task.execute(&ctx).settle().await;
            let elapsed = started.elapsed();
            let elapsed_ms = u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX);

            match &result {
                Ok(()) => info!(elapsed_ms, "Task completed"),
                Err(e) if e.is_timeout() => warn!(elapsed_ms, error = %e, "Task timed out"),
                Err(e) => warn!(elapsed_ms, error = %e, "Task failed"),
            }
            crate::metrics::record_task(id.as_str(), result.is_ok(), elapsed.as_secs_f64());
            result
        }
        .instrument(span)
        .await
    }
}

impl fmt::Debug for TaskExecutor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskExecutor").finish_non_exhaustive()
    }
}
