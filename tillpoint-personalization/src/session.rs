//! Observable personalization session state and its storage keys.

use std::collections::BTreeMap;

use tillpoint_core::KeyValueStorage;

/// Storage keys of persisted session credentials.
pub mod keys {
    /// Token issued by the last successful personalization.
    pub const DEVICE_TOKEN: &str = "deviceToken";
    /// Server the device was personalized against.
    pub const SERVER_NAME: &str = "serverName";
    /// Port of that server.
    pub const SERVER_PORT: &str = "serverPort";
    /// Whether the server is reached over TLS.
    pub const SSL_ENABLED: &str = "sslEnabled";
    /// Whether the server is centrally managed.
    pub const MANAGED_SERVER: &str = "managedServer";
    /// Last assigned device id.
    pub const DEVICE_ID: &str = "deviceId";
    /// Last assigned app id.
    pub const APP_ID: &str = "appId";
}

/// Value older builds wrote when clearing a key.
const LEGACY_NULL: &str = "null";

/// Read `key`, treating empty values and the legacy `"null"` literal as unset.
pub(crate) fn read(storage: &dyn KeyValueStorage, key: &str) -> Option<String> {
    storage
        .get_value(key)
        .filter(|value| !value.is_empty() && value != LEGACY_NULL)
}

/// Stored server port; unparsable values count as missing.
pub(crate) fn read_port(storage: &dyn KeyValueStorage) -> Option<u16> {
    read(storage, keys::SERVER_PORT).and_then(|port| {
        port.parse()
            .map_err(|_| tracing::warn!(port = %port, "Ignoring invalid stored server port"))
            .ok()
    })
}

fn read_flag(storage: &dyn KeyValueStorage, key: &str) -> bool {
    read(storage, key).is_some_and(|value| value == "true")
}

/// Snapshot of the device's personalization identity.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionState {
    /// Assigned device id.
    pub device_id: Option<String>,
    /// Assigned app id.
    pub app_id: Option<String>,
    /// Current session token.
    pub device_token: Option<String>,
    /// Server the device is personalized against.
    pub server_name: Option<String>,
    /// Port of that server.
    pub server_port: Option<u16>,
    /// Whether the server is reached over TLS.
    pub ssl_enabled: bool,
    /// Whether the server is centrally managed.
    pub managed_server: bool,
    /// Whether personalization succeeded in this process.
    pub personalized: bool,
    /// Merged personalization properties.
    pub properties: BTreeMap<String, String>,
}

impl SessionState {
    /// Build the initial state from persisted values.
    ///
    /// `personalized` always starts out false; a saved session still has to
    /// be confirmed with the server.
    #[must_use]
    pub fn load(storage: &dyn KeyValueStorage) -> Self {
        let server_port = read_port(storage);
        Self {
            device_id: read(storage, keys::DEVICE_ID),
            app_id: read(storage, keys::APP_ID),
            device_token: read(storage, keys::DEVICE_TOKEN),
            server_name: read(storage, keys::SERVER_NAME),
            server_port,
            ssl_enabled: read_flag(storage, keys::SSL_ENABLED),
            managed_server: read_flag(storage, keys::MANAGED_SERVER),
            personalized: false,
            properties: BTreeMap::new(),
        }
    }

    /// `host:port` of the personalization server, if known.
    #[must_use]
    pub fn server_address(&self) -> Option<String> {
        match (&self.server_name, self.server_port) {
            (Some(name), Some(port)) => Some(format!("{name}:{port}")),
            _ => None,
        }
    }
}
