//! Wire types of the personalization HTTP contract.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Body of `POST /rest/devices/personalize`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersonalizeRequest {
    /// Previously issued token, if the device has one.
    pub device_token: Option<String>,
    /// Requested device id.
    pub device_id: Option<String>,
    /// Requested app id.
    pub app_id: Option<String>,
    /// Kind of device being personalized.
    pub device_type: String,
    /// Companion device this one is paired with.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub paired_device_id: Option<String>,
    /// Extra parameters forwarded to the server.
    #[serde(default)]
    pub personalization_parameters: BTreeMap<String, String>,
}

/// Successful response of `POST /rest/devices/personalize`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersonalizeResponse {
    /// Fresh session token.
    pub auth_token: String,
    /// Identity the server assigned.
    pub device_model: DeviceModel,
}

/// Server-authoritative device identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceModel {
    /// Assigned device id.
    pub device_id: String,
    /// Assigned app id.
    pub app_id: String,
    /// Parameter values configured for the device on the server.
    #[serde(default)]
    pub device_param_models: Option<Vec<DeviceParamModel>>,
}

/// A single configured device parameter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceParamModel {
    /// Parameter name.
    pub param_name: String,
    /// Parameter value; absent values are stored as empty strings.
    #[serde(default)]
    pub param_value: Option<String>,
}

/// Response of `GET /rest/devices/personalizationConfig`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersonalizationConfigResponse {
    /// Business units the server offers devices for.
    #[serde(default)]
    pub business_units: Vec<BusinessUnit>,
}

impl PersonalizationConfigResponse {
    /// Every selectable device across all business units.
    pub fn devices(&self) -> impl Iterator<Item = &DeviceDefinition> {
        self.business_units.iter().flat_map(|unit| unit.devices.iter())
    }
}

/// A business unit and its devices.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BusinessUnit {
    /// Business unit id.
    pub id: String,
    /// Display name.
    #[serde(default)]
    pub name: String,
    /// Devices that may be selected in this unit.
    #[serde(default)]
    pub devices: Vec<DeviceDefinition>,
}

/// A device the terminal can be personalized as.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceDefinition {
    /// Device id.
    pub device_id: String,
    /// App id the device runs.
    pub app_id: String,
    /// Human readable description.
    #[serde(default)]
    pub description: Option<String>,
    /// Parameters the user may fill in when selecting this device.
    #[serde(default)]
    pub parameters: Vec<ParameterDefinition>,
}

/// A parameter offered during device selection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParameterDefinition {
    /// Parameter name sent back in `personalizationParameters`.
    pub param_name: String,
    /// Label shown to the user.
    #[serde(default)]
    pub display_name: Option<String>,
    /// Value pre-filled in the dialog.
    #[serde(default)]
    pub default_value: Option<String>,
    /// Whether selection requires a value.
    #[serde(default)]
    pub required: bool,
}

/// Parameters returned by an auto-personalization endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AutoPersonalizationParameters {
    /// Server to personalize against.
    pub server_name: String,
    /// Server port, if the endpoint names one.
    #[serde(default)]
    pub server_port: Option<u16>,
    /// Device id to request.
    #[serde(default)]
    pub device_id: Option<String>,
    /// App id to request.
    #[serde(default)]
    pub app_id: Option<String>,
    /// TLS preference; filled from the current session when absent.
    #[serde(default)]
    pub ssl_enabled: Option<bool>,
    /// Extra parameters forwarded to the server.
    #[serde(default)]
    pub personalization_parameters: BTreeMap<String, String>,
}
