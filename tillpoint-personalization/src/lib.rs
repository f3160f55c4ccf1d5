//! # Tillpoint Personalization
//!
//! Binds a terminal to a server-side device identity.
//!
//! ## Architecture
//!
//! - [`PersonalizationService`] - HTTP client for `/rest/devices`, owner of the
//!   observable [`SessionState`] and its persisted mirror
//! - [`strategy`] - startup tasks trying one source of identity each: launch
//!   parameters, zero-conf discovery, the saved session, manual entry
//! - [`personalization_sequence`] - the strategies composed with `one_of`
//!   under a splash message, and [`register_personalization_tasks`] to make
//!   them resolvable
//!
//! ## Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use tillpoint_core::{
//!     MemoryStorage, SplashScreen, StartupController, TaskExecutor, TaskRegistry,
//! };
//! use tillpoint_personalization::{
//!     personalization_sequence, register_personalization_tasks, ManualEntryPrompt,
//!     PersonalizationConfig, PersonalizationService, PersonalizationTasks, StaticServiceBrowser,
//! };
//!
//! # async fn run(prompt: Arc<dyn ManualEntryPrompt>) -> anyhow::Result<()> {
//! let service = PersonalizationService::new(
//!     PersonalizationConfig::default(),
//!     Arc::new(MemoryStorage::new()),
//! )?;
//! let mut registry = TaskRegistry::new();
//! register_personalization_tasks(
//!     &mut registry,
//!     PersonalizationTasks::new(service, Arc::new(StaticServiceBrowser::default()), prompt),
//! );
//! let controller = StartupController::new(
//!     TaskExecutor::new(Arc::new(registry)),
//!     personalization_sequence(),
//!     SplashScreen::new(),
//! );
//! controller.begin_startup_sequence().await?;
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::all)]
#![deny(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod config;
pub mod error;
pub mod sequence;
pub mod service;
pub mod session;
pub mod strategy;
pub mod types;

pub use config::{
    BackoffConfig, ManualEntryConfig, PersonalizationConfig, SavedSessionConfig, ZeroConfConfig,
};
pub use error::{PersonalizationError, PersonalizationResult};
pub use sequence::{personalization_sequence, register_personalization_tasks, PersonalizationTasks};
pub use service::{PersonalizationService, PersonalizeParams};
pub use session::SessionState;
pub use strategy::{
    DeviceSelection, DiscoveredService, ManualEntryPersonalizationTask, ManualEntryPrompt,
    QueryParamsPersonalizationTask, SavedSessionPersonalizationTask, ServerAddress,
    ServiceBrowser, StaticServiceBrowser, ZeroConfPersonalizationTask,
};
pub use types::{
    AutoPersonalizationParameters, PersonalizationConfigResponse, PersonalizeRequest,
    PersonalizeResponse,
};
