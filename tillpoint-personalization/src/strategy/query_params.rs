//! Personalization from launch parameters.

use std::collections::BTreeMap;

use tillpoint_core::metrics::record_personalization_attempt;
use tillpoint_core::{StartupError, StartupResult, Task, TaskContext, TaskOutput};
use tracing::debug;
use url::Url;

use crate::service::{PersonalizationService, PersonalizeParams};

const SERVER_NAME: &str = "serverName";
const SERVER_PORT: &str = "serverPort";
const DEVICE_ID: &str = "deviceId";
const APP_ID: &str = "appId";
const DEVICE_TOKEN: &str = "deviceToken";
const SSL_ENABLED: &str = "sslEnabled";

/// Personalizes from key-value pairs the shell was launched with.
///
/// Recognized keys are `serverName`, `serverPort`, `deviceId`, `appId`,
/// `deviceToken` and `sslEnabled`; every other pair is forwarded as a
/// personalization property. Fails without contacting the server unless a
/// server name and either a device id or a device token are present.
#[derive(Debug, Clone)]
pub struct QueryParamsPersonalizationTask {
    service: PersonalizationService,
    launch_params: BTreeMap<String, String>,
}

impl QueryParamsPersonalizationTask {
    /// Create the task from launch parameters.
    pub fn new(service: PersonalizationService, launch_params: BTreeMap<String, String>) -> Self {
        Self {
            service,
            launch_params,
        }
    }

    /// Create the task from the query string of a launch URL.
    pub fn from_url(service: PersonalizationService, url: &Url) -> Self {
        Self::new(service, url.query_pairs().into_owned().collect())
    }

    fn params(&self) -> StartupResult<PersonalizeParams> {
        let mut pairs = self.launch_params.clone();
        let non_empty = |value: Option<String>| value.filter(|v| !v.is_empty());

        let server_name = non_empty(pairs.remove(SERVER_NAME));
        let server_port = non_empty(pairs.remove(SERVER_PORT));
        let device_id = non_empty(pairs.remove(DEVICE_ID));
        let app_id = non_empty(pairs.remove(APP_ID));
        let device_token = non_empty(pairs.remove(DEVICE_TOKEN));
        let ssl_enabled = non_empty(pairs.remove(SSL_ENABLED)).map(|v| v == "true");

        let Some(server_name) = server_name else {
            return Err(StartupError::Precondition(
                "launch parameters name no server".to_string(),
            ));
        };
        if device_id.is_none() && device_token.is_none() {
            return Err(StartupError::Precondition(
                "launch parameters name neither a device id nor a device token".to_string(),
            ));
        }
        let server_port = match server_port {
            Some(port) => port.parse().map_err(|_| {
                StartupError::Precondition(format!("invalid server port `{port}`"))
            })?,
            None => self.service.config().default_server_port,
        };

        Ok(PersonalizeParams {
            server_name,
            server_port,
            device_id,
            app_id,
            device_token,
            paired_device_id: None,
            properties: pairs,
            ssl_enabled,
        })
    }

    async fn run(&self) -> StartupResult<()> {
        let params = self.params()?;
        debug!(server = %params.server_name, "Personalizing from launch parameters");
        let result = self.service.personalize(params).await;
        record_personalization_attempt("query_params", result.is_ok());
        result.map_err(StartupError::from)
    }
}

impl Task for QueryParamsPersonalizationTask {
    fn execute<'a>(&'a self, _ctx: &'a TaskContext) -> TaskOutput<'a> {
        TaskOutput::deferred(self.run())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PersonalizationConfig;
    use std::sync::Arc;
    use tillpoint_core::MemoryStorage;

    fn task(pairs: &[(&str, &str)]) -> QueryParamsPersonalizationTask {
        let service = PersonalizationService::new(
            PersonalizationConfig::default(),
            Arc::new(MemoryStorage::new()),
        )
        .expect("service");
        QueryParamsPersonalizationTask::new(
            service,
            pairs
                .iter()
                .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
                .collect(),
        )
    }

    #[test]
    fn test_params_split_known_keys_from_properties() {
        let params = task(&[
            ("serverName", "pos-server"),
            ("deviceId", "POS-1"),
            ("appId", "pos"),
            ("sslEnabled", "true"),
            ("lane", "4"),
        ])
        .params()
        .expect("params");
        assert_eq!(params.server_name, "pos-server");
        assert_eq!(params.server_port, 6140);
        assert_eq!(params.device_id.as_deref(), Some("POS-1"));
        assert_eq!(params.ssl_enabled, Some(true));
        assert_eq!(params.properties.len(), 1);
        assert_eq!(params.properties.get("lane").map(String::as_str), Some("4"));
    }

    #[test]
    fn test_token_is_enough_without_device_id() {
        let params = task(&[
            ("serverName", "pos-server"),
            ("deviceToken", "t"),
            ("serverPort", "7000"),
        ])
        .params()
        .expect("params");
        assert_eq!(params.server_port, 7000);
        assert_eq!(params.device_token.as_deref(), Some("t"));
    }

    #[test]
    fn test_missing_inputs_fail_precondition() {
        for pairs in [
            &[("deviceId", "POS-1")][..],
            &[("serverName", "pos-server")][..],
            &[("serverName", ""), ("deviceId", "POS-1")][..],
            &[("serverName", "pos-server"), ("deviceId", "POS-1"), ("serverPort", "x")][..],
        ] {
            let err = task(pairs).params().unwrap_err();
            assert!(matches!(err, StartupError::Precondition(_)), "{pairs:?}: {err}");
        }
    }

    #[test]
    fn test_from_url_reads_query() {
        let url = Url::parse("https://shell.local/?serverName=pos-server&deviceId=POS-1&lane=4")
            .expect("url");
        let service = PersonalizationService::new(
            PersonalizationConfig::default(),
            Arc::new(MemoryStorage::new()),
        )
        .expect("service");
        let params = QueryParamsPersonalizationTask::from_url(service, &url)
            .params()
            .expect("params");
        assert_eq!(params.server_name, "pos-server");
        assert!(params.properties.contains_key("lane"));
    }
}
