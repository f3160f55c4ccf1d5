//! Personalization strategies.
//!
//! Each strategy is a startup task that succeeds once the device has an
//! identity. Failing lets the enclosing `one_of` move on to the next one.

mod manual;
mod query_params;
mod saved_session;
mod zeroconf;

pub use manual::{DeviceSelection, ManualEntryPersonalizationTask, ManualEntryPrompt, ServerAddress};
pub use query_params::QueryParamsPersonalizationTask;
pub use saved_session::SavedSessionPersonalizationTask;
pub use zeroconf::{
    DiscoveredService, ServiceBrowser, StaticServiceBrowser, ZeroConfPersonalizationTask,
    DEFAULT_DEVICE_NAME, DEFAULT_PARAMETERS_PATH, SEARCHING_MESSAGE,
};
