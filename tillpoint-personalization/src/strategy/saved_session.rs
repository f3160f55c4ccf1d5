//! Personalization from a saved session.

use std::time::Duration;

use tillpoint_core::metrics::{record_personalization_attempt, record_retry};
use tillpoint_core::{StartupError, StartupResult, Task, TaskContext, TaskOutput};
use tracing::{info, warn};

use crate::error::PersonalizationError;
use crate::service::PersonalizationService;

/// Re-authenticates with the persisted token and server address.
///
/// Fails immediately when storage holds no complete session. Transport and
/// server failures are retried with a countdown on the splash screen between
/// attempts, until the server accepts the session or rejects the token, or
/// the configured attempt ceiling is reached. Any other failure ends the task.
#[derive(Debug, Clone)]
pub struct SavedSessionPersonalizationTask {
    service: PersonalizationService,
}

impl SavedSessionPersonalizationTask {
    /// Create the task.
    pub fn new(service: PersonalizationService) -> Self {
        Self { service }
    }

    async fn run(&self, ctx: &TaskContext) -> StartupResult<()> {
        if !self.service.has_saved_session() {
            return Err(PersonalizationError::NoSavedSession.into());
        }

        let config = &self.service.config().saved_session;
        let mut attempt: u32 = 0;
        loop {
            attempt = attempt.saturating_add(1);
            let result = self.service.personalize_from_saved_session().await;
            record_personalization_attempt("saved_session", result.is_ok());

            let error = match result {
                Ok(()) => {
                    info!(attempt, "Personalized from saved session");
                    return Ok(());
                }
                Err(PersonalizationError::TokenMismatch) => {
                    warn!("Saved token rejected, giving up on saved session");
                    return Err(PersonalizationError::TokenMismatch.into());
                }
                Err(e) if !e.is_retryable() => {
                    warn!(attempt, error = %e, "Saved session cannot be retried");
                    return Err(StartupError::from(e));
                }
                Err(e) => e,
            };

            if config.max_attempts.is_some_and(|max| attempt >= max) {
                warn!(attempt, error = %error, "Saved session attempts exhausted");
                return Err(StartupError::from(error));
            }

            warn!(attempt, error = %error, "Saved session personalization failed, retrying");
            record_retry("saved_session");
            self.countdown(ctx, &error).await;
        }
    }

    async fn countdown(&self, ctx: &TaskContext, error: &PersonalizationError) {
        let config = &self.service.config().saved_session;
        let step = Duration::from_millis(config.countdown_step_ms);
        for remaining in (1..=config.countdown_steps).rev() {
            let message = ctx
                .splash()
                .push_message(format!("{error}. Retrying in {remaining}..."));
            tokio::time::sleep(step).await;
            message.pop();
        }
    }
}

impl Task for SavedSessionPersonalizationTask {
    fn execute<'a>(&'a self, ctx: &'a TaskContext) -> TaskOutput<'a> {
        TaskOutput::deferred(self.run(ctx))
    }
}
