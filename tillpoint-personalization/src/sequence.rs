//! The personalization step of the startup sequence.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use tillpoint_core::{one_of, with_splash_message, Task, TaskId, TaskRef, TaskRegistry};
use tokio_util::sync::CancellationToken;

use crate::service::PersonalizationService;
use crate::strategy::{
    ManualEntryPersonalizationTask, ManualEntryPrompt, QueryParamsPersonalizationTask,
    SavedSessionPersonalizationTask, ServiceBrowser, ZeroConfPersonalizationTask,
};

/// Task id of [`QueryParamsPersonalizationTask`].
pub const QUERY_PARAMS: TaskId = TaskId::new("QueryParamsPersonalization");
/// Task id of [`ZeroConfPersonalizationTask`].
pub const ZERO_CONF: TaskId = TaskId::new("ZeroConfPersonalization");
/// Task id of [`SavedSessionPersonalizationTask`].
pub const SAVED_SESSION: TaskId = TaskId::new("SavedSessionPersonalization");
/// Task id of [`ManualEntryPersonalizationTask`].
pub const MANUAL_ENTRY: TaskId = TaskId::new("ManualEntryPersonalization");

/// Splash text shown while personalizing.
pub const PERSONALIZING_MESSAGE: &str = "Personalizing device...";

/// Try every strategy in priority order until one establishes an identity.
#[must_use]
pub fn personalization_sequence() -> TaskRef {
    with_splash_message(
        PERSONALIZING_MESSAGE,
        one_of(vec![
            QUERY_PARAMS.into(),
            ZERO_CONF.into(),
            SAVED_SESSION.into(),
            MANUAL_ENTRY.into(),
        ]),
    )
}

/// Collaborators the strategies need.
#[derive(Clone)]
pub struct PersonalizationTasks {
    /// Personalization client.
    pub service: PersonalizationService,
    /// Service discovery source.
    pub browser: Arc<dyn ServiceBrowser>,
    /// Manual entry dialogs.
    pub prompt: Arc<dyn ManualEntryPrompt>,
    /// Key-value pairs the shell was launched with.
    pub launch_params: BTreeMap<String, String>,
    /// Cancelled by the shell when the discovery modal closes.
    pub discovery_modal: CancellationToken,
}

impl PersonalizationTasks {
    /// Bundle the collaborators, with no launch parameters.
    pub fn new(
        service: PersonalizationService,
        browser: Arc<dyn ServiceBrowser>,
        prompt: Arc<dyn ManualEntryPrompt>,
    ) -> Self {
        Self {
            service,
            browser,
            prompt,
            launch_params: BTreeMap::new(),
            discovery_modal: CancellationToken::new(),
        }
    }

    /// Use `params` as the launch parameters.
    #[must_use]
    pub fn with_launch_params(mut self, params: BTreeMap<String, String>) -> Self {
        self.launch_params = params;
        self
    }

    /// Use `token` to learn when the discovery modal closes.
    #[must_use]
    pub fn with_discovery_modal(mut self, token: CancellationToken) -> Self {
        self.discovery_modal = token;
        self
    }

    fn zero_conf(&self) -> ZeroConfPersonalizationTask {
        let task =
            ZeroConfPersonalizationTask::new(self.service.clone(), Arc::clone(&self.browser));
        if self.service.config().zero_conf.retry {
            task.with_retry(self.discovery_modal.clone())
        } else {
            task
        }
    }
}

impl fmt::Debug for PersonalizationTasks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PersonalizationTasks")
            .field("service", &self.service)
            .field("launch_params", &self.launch_params)
            .finish_non_exhaustive()
    }
}

/// Register the four strategies under their task ids.
pub fn register_personalization_tasks(
    registry: &mut TaskRegistry,
    deps: PersonalizationTasks,
) -> &mut TaskRegistry {
    let d = deps.clone();
    registry.register(QUERY_PARAMS, move || {
        Arc::new(QueryParamsPersonalizationTask::new(
            d.service.clone(),
            d.launch_params.clone(),
        )) as Arc<dyn Task>
    });
    let d = deps.clone();
    registry.register(ZERO_CONF, move || Arc::new(d.zero_conf()) as Arc<dyn Task>);
    let d = deps.clone();
    registry.register(SAVED_SESSION, move || {
        Arc::new(SavedSessionPersonalizationTask::new(d.service.clone())) as Arc<dyn Task>
    });
    registry.register(MANUAL_ENTRY, move || {
        Arc::new(ManualEntryPersonalizationTask::new(
            deps.service.clone(),
            Arc::clone(&deps.prompt),
        )) as Arc<dyn Task>
    })
}
