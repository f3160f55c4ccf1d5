//! Client for the personalization server.
//!
//! [`PersonalizationService`] speaks the `/rest/devices` HTTP contract and owns
//! the device's session state. The state lives in a watch channel so the shell
//! can observe identity changes, and it is mirrored to a [`KeyValueStorage`]
//! on every mutation.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use reqwest::{Client, Response, StatusCode};
use serde::de::DeserializeOwned;
use tillpoint_core::KeyValueStorage;
use tokio::sync::watch;
use tracing::{debug, info, warn};
use url::Url;

use crate::config::PersonalizationConfig;
use crate::error::{PersonalizationError, PersonalizationResult};
use crate::session::{self, keys, SessionState};
use crate::types::{
    AutoPersonalizationParameters, PersonalizationConfigResponse, PersonalizeRequest,
    PersonalizeResponse,
};

/// Path of the personalize endpoint.
pub const PERSONALIZE_PATH: &str = "/rest/devices/personalize";

/// Path of the endpoint listing selectable devices.
pub const PERSONALIZATION_CONFIG_PATH: &str = "/rest/devices/personalizationConfig";

/// Arguments of a personalize call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PersonalizeParams {
    /// Server to personalize against.
    pub server_name: String,
    /// Port of that server.
    pub server_port: u16,
    /// Requested device id.
    pub device_id: Option<String>,
    /// Requested app id.
    pub app_id: Option<String>,
    /// Token to present instead of the stored one.
    pub device_token: Option<String>,
    /// Companion device this one is paired with.
    pub paired_device_id: Option<String>,
    /// Extra parameters forwarded to the server.
    pub properties: BTreeMap<String, String>,
    /// TLS preference; `None` keeps the current session's preference.
    pub ssl_enabled: Option<bool>,
}

impl PersonalizeParams {
    /// Personalize against `server_name:server_port`.
    pub fn new(server_name: impl Into<String>, server_port: u16) -> Self {
        Self {
            server_name: server_name.into(),
            server_port,
            ..Self::default()
        }
    }

    /// Request a specific device and app id.
    #[must_use]
    pub fn with_device(mut self, device_id: impl Into<String>, app_id: impl Into<String>) -> Self {
        self.device_id = Some(device_id.into());
        self.app_id = Some(app_id.into());
        self
    }

    /// Present `token` instead of the stored token.
    #[must_use]
    pub fn with_device_token(mut self, token: impl Into<String>) -> Self {
        self.device_token = Some(token.into());
        self
    }

    /// Forward extra parameters.
    #[must_use]
    pub fn with_properties(mut self, properties: BTreeMap<String, String>) -> Self {
        self.properties = properties;
        self
    }

    /// Set the TLS preference explicitly.
    #[must_use]
    pub fn with_ssl(mut self, enabled: bool) -> Self {
        self.ssl_enabled = Some(enabled);
        self
    }

    /// Pair with a companion device.
    #[must_use]
    pub fn with_paired_device(mut self, device_id: impl Into<String>) -> Self {
        self.paired_device_id = Some(device_id.into());
        self
    }

    /// Personalize with parameters fetched from an auto-personalization
    /// endpoint, using `default_port` when they name no port.
    #[must_use]
    pub fn from_auto(params: AutoPersonalizationParameters, default_port: u16) -> Self {
        Self {
            server_name: params.server_name,
            server_port: params.server_port.unwrap_or(default_port),
            device_id: params.device_id,
            app_id: params.app_id,
            device_token: None,
            paired_device_id: None,
            properties: params.personalization_parameters,
            ssl_enabled: params.ssl_enabled,
        }
    }
}

/// Personalization client and session owner.
#[derive(Clone)]
pub struct PersonalizationService {
    inner: Arc<Inner>,
}

struct Inner {
    http: Client,
    storage: Arc<dyn KeyValueStorage>,
    config: PersonalizationConfig,
    state: watch::Sender<SessionState>,
}

impl PersonalizationService {
    /// Create a service, loading the session from `storage`.
    ///
    /// # Errors
    ///
    /// Returns [`PersonalizationError::Http`] if the HTTP client fails to build.
    pub fn new(
        config: PersonalizationConfig,
        storage: Arc<dyn KeyValueStorage>,
    ) -> PersonalizationResult<Self> {
        let http = Client::builder()
            .user_agent(format!("tillpoint/{}", env!("CARGO_PKG_VERSION")))
            .timeout(config.request_timeout())
            .no_proxy()
            .build()?;

        let initial = SessionState::load(storage.as_ref());
        debug!(
            server = ?initial.server_address(),
            has_token = initial.device_token.is_some(),
            "Loaded personalization session"
        );
        let (state, _) = watch::channel(initial);

        Ok(Self {
            inner: Arc::new(Inner {
                http,
                storage,
                config,
                state,
            }),
        })
    }

    /// Register the device with a personalization server.
    ///
    /// On success the server's identity, token and parameters replace the
    /// session state, and the server address and token are persisted. The TLS
    /// flag is persisted only when `params.ssl_enabled` is `Some(true)`.
    ///
    /// # Errors
    ///
    /// - [`PersonalizationError::TokenMismatch`] on HTTP 401
    /// - [`PersonalizationError::Unreachable`] if the server cannot be reached
    /// - [`PersonalizationError::Status`] with the status text on other failures
    /// - [`PersonalizationError::Storage`] if the session cannot be persisted
    pub async fn personalize(&self, params: PersonalizeParams) -> PersonalizationResult<()> {
        let ssl = params.ssl_enabled.unwrap_or_else(|| self.is_ssl_enabled());
        let url = endpoint(&params.server_name, params.server_port, ssl, PERSONALIZE_PATH)?;
        let target = format!("{}:{}", params.server_name, params.server_port);

        let request = PersonalizeRequest {
            device_token: params.device_token.clone().or_else(|| self.device_token()),
            device_id: params.device_id.clone(),
            app_id: params.app_id.clone(),
            device_type: self.inner.config.device_type.clone(),
            paired_device_id: params.paired_device_id.clone(),
            personalization_parameters: params.properties.clone(),
        };

        info!(server = %target, ssl, device_id = ?request.device_id, "Personalizing device");
        let timeout = self.inner.config.request_timeout();
        let response = self
            .inner
            .http
            .post(url)
            .json(&request)
            .send()
            .await
            .map_err(|e| transport_error(e, &target, "personalize", timeout))?;

        if response.status() == StatusCode::UNAUTHORIZED {
            warn!(server = %target, "Server rejected the saved device token");
            return Err(PersonalizationError::TokenMismatch);
        }
        let response: PersonalizeResponse =
            read_json(response, &target, "personalize", timeout).await?;

        self.adopt(&params, ssl, response)
    }

    /// Re-authenticate with the persisted token and server address.
    ///
    /// # Errors
    ///
    /// Returns [`PersonalizationError::NoSavedSession`] if no complete session
    /// is stored, otherwise the errors of [`personalize`](Self::personalize).
    pub async fn personalize_from_saved_session(&self) -> PersonalizationResult<()> {
        let storage = self.inner.storage.as_ref();
        let token = session::read(storage, keys::DEVICE_TOKEN);
        let server_name = session::read(storage, keys::SERVER_NAME);
        let server_port = session::read_port(storage);

        let (Some(token), Some(server_name), Some(server_port)) =
            (token, server_name, server_port)
        else {
            return Err(PersonalizationError::NoSavedSession);
        };

        let params = PersonalizeParams::new(server_name, server_port).with_device_token(token);
        self.personalize(params).await
    }

    /// Check if storage holds a token, server name and a valid server port.
    ///
    /// Values stored as the literal `"null"` count as missing.
    #[must_use]
    pub fn has_saved_session(&self) -> bool {
        let storage = self.inner.storage.as_ref();
        session::read(storage, keys::DEVICE_TOKEN).is_some()
            && session::read(storage, keys::SERVER_NAME).is_some()
            && session::read_port(storage).is_some()
    }

    /// Forget the device's identity.
    ///
    /// The in-memory session is reset. Server address, token, TLS and
    /// managed-server flags are also removed from storage; the stored device
    /// and app ids are kept.
    ///
    /// # Errors
    ///
    /// Returns [`PersonalizationError::Storage`] if storage cannot be updated.
    pub fn de_personalize(&self) -> PersonalizationResult<()> {
        self.inner.state.send_replace(SessionState::default());
        for key in [
            keys::SERVER_NAME,
            keys::SERVER_PORT,
            keys::DEVICE_TOKEN,
            keys::SSL_ENABLED,
            keys::MANAGED_SERVER,
        ] {
            self.inner.storage.remove(key)?;
        }
        info!("Device de-personalized");
        Ok(())
    }

    /// Fetch auto-personalization parameters for `device_name` from `url`.
    ///
    /// A response without `sslEnabled` is annotated with the current TLS
    /// preference.
    ///
    /// # Errors
    ///
    /// Returns [`PersonalizationError::Timeout`] if the endpoint does not answer
    /// within the configured bound, [`PersonalizationError::InvalidUrl`] for a
    /// malformed `url`, and the usual transport and status errors otherwise.
    pub async fn get_auto_personalization_parameters(
        &self,
        device_name: &str,
        url: &str,
    ) -> PersonalizationResult<AutoPersonalizationParameters> {
        let mut url = Url::parse(url).map_err(|e| PersonalizationError::InvalidUrl(e.to_string()))?;
        url.query_pairs_mut().append_pair("deviceName", device_name);
        let target = url_target(&url);
        let timeout = self.inner.config.auto_personalization_timeout();

        debug!(url = %url, "Fetching auto-personalization parameters");
        let response = self
            .inner
            .http
            .get(url)
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| transport_error(e, &target, "auto-personalization parameters", timeout))?;

        let mut params: AutoPersonalizationParameters =
            read_json(response, &target, "auto-personalization parameters", timeout).await?;
        if params.ssl_enabled.is_none() {
            params.ssl_enabled = Some(self.is_ssl_enabled());
        }
        Ok(params)
    }

    /// List the business units and devices a server offers.
    ///
    /// # Errors
    ///
    /// Returns the usual transport, status and parse errors.
    pub async fn get_personalization_config(
        &self,
        server_name: &str,
        server_port: u16,
        ssl: bool,
    ) -> PersonalizationResult<PersonalizationConfigResponse> {
        let url = endpoint(server_name, server_port, ssl, PERSONALIZATION_CONFIG_PATH)?;
        let target = format!("{server_name}:{server_port}");
        let timeout = self.inner.config.request_timeout();

        let response = self
            .inner
            .http
            .get(url)
            .send()
            .await
            .map_err(|e| transport_error(e, &target, "personalization config", timeout))?;
        read_json(response, &target, "personalization config", timeout).await
    }

    /// Store the TLS preference.
    ///
    /// # Errors
    ///
    /// Returns [`PersonalizationError::Storage`] if it cannot be persisted.
    pub fn set_ssl_enabled(&self, enabled: bool) -> PersonalizationResult<()> {
        self.inner
            .storage
            .set_value(keys::SSL_ENABLED, bool_str(enabled))?;
        self.inner.state.send_if_modified(|state| {
            let changed = state.ssl_enabled != enabled;
            state.ssl_enabled = enabled;
            changed
        });
        Ok(())
    }

    /// Store whether the server is centrally managed.
    ///
    /// # Errors
    ///
    /// Returns [`PersonalizationError::Storage`] if it cannot be persisted.
    pub fn set_managed_server(&self, managed: bool) -> PersonalizationResult<()> {
        self.inner
            .storage
            .set_value(keys::MANAGED_SERVER, bool_str(managed))?;
        self.inner.state.send_if_modified(|state| {
            let changed = state.managed_server != managed;
            state.managed_server = managed;
            changed
        });
        Ok(())
    }

    /// Current session snapshot.
    #[must_use]
    pub fn state(&self) -> SessionState {
        self.inner.state.borrow().clone()
    }

    /// Subscribe to session changes.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.inner.state.subscribe()
    }

    /// The configuration the service was built with.
    #[must_use]
    pub fn config(&self) -> &PersonalizationConfig {
        &self.inner.config
    }

    /// Assigned device id.
    #[must_use]
    pub fn device_id(&self) -> Option<String> {
        self.inner.state.borrow().device_id.clone()
    }

    /// Assigned app id.
    #[must_use]
    pub fn app_id(&self) -> Option<String> {
        self.inner.state.borrow().app_id.clone()
    }

    /// Current session token.
    #[must_use]
    pub fn device_token(&self) -> Option<String> {
        self.inner.state.borrow().device_token.clone()
    }

    /// Server the device is personalized against.
    #[must_use]
    pub fn server_name(&self) -> Option<String> {
        self.inner.state.borrow().server_name.clone()
    }

    /// Port of that server.
    #[must_use]
    pub fn server_port(&self) -> Option<u16> {
        self.inner.state.borrow().server_port
    }

    /// Whether the server is reached over TLS.
    #[must_use]
    pub fn is_ssl_enabled(&self) -> bool {
        self.inner.state.borrow().ssl_enabled
    }

    /// Whether the server is centrally managed.
    #[must_use]
    pub fn is_managed_server(&self) -> bool {
        self.inner.state.borrow().managed_server
    }

    /// Whether personalization succeeded in this process.
    #[must_use]
    pub fn is_personalized(&self) -> bool {
        self.inner.state.borrow().personalized
    }

    /// Merged personalization properties.
    #[must_use]
    pub fn properties(&self) -> BTreeMap<String, String> {
        self.inner.state.borrow().properties.clone()
    }

    fn adopt(
        &self,
        params: &PersonalizeParams,
        ssl: bool,
        response: PersonalizeResponse,
    ) -> PersonalizationResult<()> {
        let PersonalizeResponse {
            auth_token,
            device_model,
        } = response;

        let mut properties = params.properties.clone();
        for model in device_model.device_param_models.unwrap_or_default() {
            properties.insert(model.param_name, model.param_value.unwrap_or_default());
        }

        let port = params.server_port.to_string();
        let mut entries = vec![
            (keys::SERVER_NAME, params.server_name.as_str()),
            (keys::SERVER_PORT, port.as_str()),
            (keys::DEVICE_TOKEN, auth_token.as_str()),
            (keys::DEVICE_ID, device_model.device_id.as_str()),
            (keys::APP_ID, device_model.app_id.as_str()),
        ];
        if params.ssl_enabled == Some(true) {
            entries.push((keys::SSL_ENABLED, bool_str(true)));
        }
        self.inner.storage.set_values(&entries)?;

        info!(
            device_id = %device_model.device_id,
            app_id = %device_model.app_id,
            properties = properties.len(),
            "Device personalized"
        );

        self.inner.state.send_modify(|state| {
            state.device_id = Some(device_model.device_id);
            state.app_id = Some(device_model.app_id);
            state.device_token = Some(auth_token);
            state.server_name = Some(params.server_name.clone());
            state.server_port = Some(params.server_port);
            state.ssl_enabled = ssl;
            state.personalized = true;
            state.properties = properties;
        });
        Ok(())
    }
}

impl fmt::Debug for PersonalizationService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PersonalizationService")
            .field("server", &self.inner.state.borrow().server_address())
            .field("personalized", &self.is_personalized())
            .finish_non_exhaustive()
    }
}

fn endpoint(server_name: &str, port: u16, ssl: bool, path: &str) -> PersonalizationResult<Url> {
    let scheme = if ssl { "https" } else { "http" };
    let mut url = Url::parse(&format!("{scheme}://{server_name}:{port}"))
        .map_err(|e| PersonalizationError::InvalidUrl(format!("{server_name}:{port}: {e}")))?;
    url.set_path(path);
    Ok(url)
}

fn url_target(url: &Url) -> String {
    let host = url.host_str().unwrap_or_default();
    match url.port_or_known_default() {
        Some(port) => format!("{host}:{port}"),
        None => host.to_string(),
    }
}

const fn bool_str(value: bool) -> &'static str {
    if value {
        "true"
    } else {
        "false"
    }
}

/// Classify a transport failure.
fn transport_error(
    error: reqwest::Error,
    target: &str,
    operation: &str,
    timeout: Duration,
) -> PersonalizationError {
    if error.is_timeout() {
        PersonalizationError::Timeout {
            operation: operation.to_string(),
            after: timeout,
        }
    } else if error.is_connect() {
        PersonalizationError::Unreachable {
            target: target.to_string(),
        }
    } else {
        PersonalizationError::Http(error)
    }
}

/// Check the status and parse the body of a response.
async fn read_json<T: DeserializeOwned>(
    response: Response,
    target: &str,
    operation: &str,
    timeout: Duration,
) -> PersonalizationResult<T> {
    let status = response.status();
    if !status.is_success() {
        let text = status
            .canonical_reason()
            .map_or_else(|| status.as_str().to_string(), str::to_string);
        warn!(server = %target, status = status.as_u16(), "{operation} request rejected");
        return Err(PersonalizationError::Status(text));
    }
    let body = response
        .bytes()
        .await
        .map_err(|e| transport_error(e, target, operation, timeout))?;
    Ok(serde_json::from_slice(&body)?)
}
