//! Interactive personalization.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use tillpoint_core::metrics::record_personalization_attempt;
use tillpoint_core::{StartupError, StartupResult, Task, TaskContext, TaskOutput};
use tracing::{info, warn};

use crate::service::{PersonalizationService, PersonalizeParams};
use crate::types::PersonalizationConfigResponse;

/// Server address entered by the user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerAddress {
    /// Server host name.
    pub server_name: String,
    /// Server port.
    pub server_port: u16,
    /// Whether to connect over TLS.
    pub ssl_enabled: bool,
}

/// Device chosen by the user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceSelection {
    /// Selected device id.
    pub device_id: String,
    /// App id of the selected device.
    pub app_id: String,
    /// Parameter values entered for the device.
    pub properties: BTreeMap<String, String>,
}

/// The dialogs of the manual personalization flow.
///
/// Returning `None` means the user dismissed the dialog.
#[async_trait]
pub trait ManualEntryPrompt: Send + Sync {
    /// Ask for the server address, pre-filled with `current`.
    ///
    /// `error` describes why the previous attempt failed, if one did.
    async fn server_address(
        &self,
        current: &ServerAddress,
        error: Option<&str>,
    ) -> Option<ServerAddress>;

    /// Ask which of the server's devices this terminal should become.
    async fn select_device(&self, config: &PersonalizationConfigResponse)
        -> Option<DeviceSelection>;
}

/// Walks the user through server entry, connecting and device selection.
///
/// Only finishes once personalization succeeds. A dismissed dialog fails the
/// task when `canCancel` is configured and reopens the flow otherwise.
#[derive(Clone)]
pub struct ManualEntryPersonalizationTask {
    service: PersonalizationService,
    prompt: Arc<dyn ManualEntryPrompt>,
}

impl ManualEntryPersonalizationTask {
    /// Create the task.
    pub fn new(service: PersonalizationService, prompt: Arc<dyn ManualEntryPrompt>) -> Self {
        Self { service, prompt }
    }

    fn initial_address(&self) -> ServerAddress {
        let state = self.service.state();
        ServerAddress {
            server_name: state.server_name.unwrap_or_default(),
            server_port: state
                .server_port
                .unwrap_or(self.service.config().default_server_port),
            ssl_enabled: state.ssl_enabled,
        }
    }

    fn dismissed(&self) -> StartupResult<()> {
        if self.service.config().manual_entry.can_cancel {
            info!("Manual personalization cancelled");
            Err(StartupError::Cancelled(
                "manual personalization cancelled".to_string(),
            ))
        } else {
            info!("Manual personalization cannot be cancelled, prompting again");
            Ok(())
        }
    }

    async fn run(&self, ctx: &TaskContext) -> StartupResult<()> {
        let mut address = self.initial_address();
        let mut last_error: Option<String> = None;

        loop {
            let Some(entered) = self
                .prompt
                .server_address(&address, last_error.as_deref())
                .await
            else {
                self.dismissed()?;
                tokio::task::yield_now().await;
                continue;
            };
            address = entered;

            let connecting = ctx.splash().push_message(format!(
                "Connecting to {}:{}...",
                address.server_name, address.server_port
            ));
            let config = self
                .service
                .get_personalization_config(
                    &address.server_name,
                    address.server_port,
                    address.ssl_enabled,
                )
                .await;
            connecting.pop();

            let config = match config {
                Ok(config) => config,
                Err(e) => {
                    warn!(error = %e, "Could not load personalization config");
                    last_error = Some(e.to_string());
                    continue;
                }
            };

            let Some(selection) = self.prompt.select_device(&config).await else {
                self.dismissed()?;
                continue;
            };

            let params = PersonalizeParams {
                properties: selection.properties,
                ssl_enabled: Some(address.ssl_enabled),
                ..PersonalizeParams::new(address.server_name.clone(), address.server_port)
                    .with_device(selection.device_id, selection.app_id)
            };
            let result = self.service.personalize(params).await;
            record_personalization_attempt("manual", result.is_ok());
            match result {
                Ok(()) => return Ok(()),
                Err(e) => {
                    warn!(error = %e, "Manual personalization failed");
                    last_error = Some(e.to_string());
                }
            }
        }
    }
}

impl Task for ManualEntryPersonalizationTask {
    fn execute<'a>(&'a self, ctx: &'a TaskContext) -> TaskOutput<'a> {
        TaskOutput::deferred(self.run(ctx))
    }
}
