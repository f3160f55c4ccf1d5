//! Startup state management.

use std::fmt;
use std::sync::Arc;

use tokio::sync::watch;

use crate::error::StartupError;
use crate::executor::TaskExecutor;
use crate::splash::SplashScreen;
use crate::task::{TaskContext, TaskRef};

/// Progress of the startup sequence.
#[derive(Debug, Clone, Default)]
pub enum StartupStatus {
    /// `begin_startup_sequence` has not been called yet.
    #[default]
    NotStarted,
    /// The root tree is running.
    InProgress,
    /// The root tree succeeded.
    Succeeded,
    /// The root tree failed; the shell should offer manual recovery.
    Failed(Arc<StartupError>),
}

impl StartupStatus {
    /// Check if the sequence has finished, successfully or not.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed(_))
    }

    /// The failure, if the sequence failed.
    #[must_use]
    pub fn error(&self) -> Option<&Arc<StartupError>> {
        match self {
            Self::Failed(e) => Some(e),
            _ => None,
        }
    }

    /// Stable snake-case label.
    #[must_use]
    pub const fn label(&self) -> &'static str {
        match self {
            Self::NotStarted => "not_started",
            Self::InProgress => "in_progress",
            Self::Succeeded => "succeeded",
            Self::Failed(_) => "failed",
        }
    }
}

impl fmt::Display for StartupStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Failed(e) => write!(f, "failed: {e}"),
            other => f.write_str(other.label()),
        }
    }
}

/// Runs the root startup tree exactly once and publishes its status.
pub struct StartupController {
    executor: TaskExecutor,
    root: TaskRef,
    splash: SplashScreen,
    status: watch::Sender<StartupStatus>,
}

impl StartupController {
    /// Create a controller for `root`.
    #[must_use]
    pub fn new(executor: TaskExecutor, root: TaskRef, splash: SplashScreen) -> Self {
        let (status, _) = watch::channel(StartupStatus::NotStarted);
        Self {
            executor,
            root,
            splash,
            status,
        }
    }

    /// Run the startup sequence.
    ///
    /// # Errors
    ///
    /// Returns [`StartupError::AlreadyStarted`] if the sequence was started
    /// before; nothing runs in that case. Otherwise returns the failure of the
    /// root tree, which is also published as [`StartupStatus::Failed`].
    ///
    /// Dropping the returned future before it completes publishes
    /// [`StartupStatus::Failed`] with [`StartupError::Cancelled`].
    pub async fn begin_startup_sequence(&self) -> Result<(), Arc<StartupError>> {
        let claimed = self.status.send_if_modified(|status| {
            if matches!(status, StartupStatus::NotStarted) {
                *status = StartupStatus::InProgress;
                true
            } else {
                false
            }
        });
        if !claimed {
            tracing::warn!(status = %self.status(), "Startup sequence requested twice");
            return Err(Arc::new(StartupError::AlreadyStarted));
        }
        crate::metrics::set_startup_status(&StartupStatus::InProgress);
        tracing::info!("Startup sequence started");

        let mut running = InProgressGuard {
            status: &self.status,
            armed: true,
        };
        let ctx = TaskContext::new(self.splash.clone());
        let outcome = self.executor.run(&self.root, &ctx).await;
        running.armed = false;

        let (status, result) = match outcome {
            Ok(()) => {
                tracing::info!("Startup sequence succeeded");
                (StartupStatus::Succeeded, Ok(()))
            }
            Err(e) => {
                tracing::error!(error = %e, "Startup sequence failed");
                let e = Arc::new(e);
                (StartupStatus::Failed(Arc::clone(&e)), Err(e))
            }
        };
        crate::metrics::set_startup_status(&status);
        self.status.send_replace(status);
        result
    }

    /// Current status.
    #[must_use]
    pub fn status(&self) -> StartupStatus {
        self.status.borrow().clone()
    }

    /// Subscribe to status changes.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<StartupStatus> {
        self.status.subscribe()
    }

    /// The splash stack the sequence reports progress on.
    #[must_use]
    pub fn splash(&self) -> &SplashScreen {
        &self.splash
    }

    /// Wait until the sequence has finished and return its final status.
    pub async fn wait_for_completion(&self) -> StartupStatus {
        let mut rx = self.subscribe();
        let finished = rx
            .wait_for(StartupStatus::is_finished)
            .await
            .map(|status| status.clone());
        // The sender lives in `self`, so it cannot be gone while we borrow it.
        finished.unwrap_or_else(|_| self.status())
    }
}

/// Publishes a cancellation if a started run is abandoned.
struct InProgressGuard<'a> {
    status: &'a watch::Sender<StartupStatus>,
    armed: bool,
}

impl Drop for InProgressGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            tracing::warn!("Startup sequence abandoned before completion");
            let status = StartupStatus::Failed(Arc::new(StartupError::Cancelled(
                "startup sequence abandoned".to_string(),
            )));
            crate::metrics::set_startup_status(&status);
            self.status.send_replace(status);
        }
    }
}

impl fmt::Debug for StartupController {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StartupController")
            .field("root", &self.root.label())
            .field("status", &self.status())
            .finish_non_exhaustive()
    }
}
