//! Personalization through zero-conf service discovery.
//!
//! A [`ServiceBrowser`] reports resolved instances of the personalization
//! service. The first one names an auto-personalization endpoint in its TXT
//! record; the parameters fetched from there are used to personalize.
//!
//! In retry mode every phase (discovery, parameter fetch, personalize) is
//! retried with its own exponential backoff until it succeeds or the
//! discovery modal is closed, which the shell signals by cancelling a
//! [`CancellationToken`].

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;

use futures::stream::{self, BoxStream, StreamExt};
use tillpoint_core::metrics::{record_personalization_attempt, record_retry};
use tillpoint_core::{StartupError, StartupResult, Task, TaskContext, TaskOutput};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use url::Url;

use crate::config::BackoffConfig;
use crate::error::{PersonalizationError, PersonalizationResult};
use crate::service::{PersonalizationService, PersonalizeParams};

/// Endpoint path used when a TXT record has no `path` entry.
pub const DEFAULT_PARAMETERS_PATH: &str = "/rest/devices/autoPersonalizationParameters";

/// Device name announced when none is configured.
pub const DEFAULT_DEVICE_NAME: &str = "tillpoint";

/// Splash text shown while the discovery modal is open.
pub const SEARCHING_MESSAGE: &str = "Searching for personalization server...";

/// A resolved service instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveredService {
    /// Instance name.
    pub name: String,
    /// Host the instance resolved to.
    pub host: String,
    /// Port the instance listens on.
    pub port: u16,
    /// TXT record entries.
    pub txt: BTreeMap<String, String>,
}

impl DiscoveredService {
    /// URL of the auto-personalization endpoint this instance advertises.
    ///
    /// The TXT entry `path` names the endpoint and `ssl=true` selects HTTPS.
    ///
    /// # Errors
    ///
    /// Returns [`PersonalizationError::InvalidUrl`] if the host and path do
    /// not form a URL.
    pub fn parameters_url(&self) -> PersonalizationResult<Url> {
        let ssl = self.txt.get("ssl").is_some_and(|v| v == "true");
        let scheme = if ssl { "https" } else { "http" };
        let path = self
            .txt
            .get("path")
            .map_or(DEFAULT_PARAMETERS_PATH, String::as_str);
        let path = path.strip_prefix('/').unwrap_or(path);
        Url::parse(&format!("{scheme}://{}:{}/{path}", self.host, self.port))
            .map_err(|e| PersonalizationError::InvalidUrl(format!("{}: {e}", self.name)))
    }
}

/// Source of resolved service instances.
pub trait ServiceBrowser: Send + Sync {
    /// Browse for instances of `service_type`.
    ///
    /// The stream yields instances as they resolve and may never end.
    fn browse(
        &self,
        service_type: &str,
    ) -> BoxStream<'static, PersonalizationResult<DiscoveredService>>;
}

/// Browser reporting a fixed set of instances.
///
/// An empty browser never reports anything, like a network without servers.
#[derive(Debug, Clone, Default)]
pub struct StaticServiceBrowser {
    services: Vec<DiscoveredService>,
}

impl StaticServiceBrowser {
    /// Report `services` for every browse.
    #[must_use]
    pub fn new(services: Vec<DiscoveredService>) -> Self {
        Self { services }
    }

    /// Report the endpoint named by a full parameters URL.
    ///
    /// # Errors
    ///
    /// Returns [`PersonalizationError::InvalidUrl`] if `url` has no host.
    pub fn from_url(url: &Url) -> PersonalizationResult<Self> {
        let host = url
            .host_str()
            .ok_or_else(|| PersonalizationError::InvalidUrl(format!("{url}: no host")))?;
        let port = url
            .port_or_known_default()
            .ok_or_else(|| PersonalizationError::InvalidUrl(format!("{url}: no port")))?;
        let txt = BTreeMap::from([
            ("path".to_string(), url.path().to_string()),
            ("ssl".to_string(), (url.scheme() == "https").to_string()),
        ]);
        Ok(Self::new(vec![DiscoveredService {
            name: host.to_string(),
            host: host.to_string(),
            port,
            txt,
        }]))
    }
}

impl ServiceBrowser for StaticServiceBrowser {
    fn browse(
        &self,
        _service_type: &str,
    ) -> BoxStream<'static, PersonalizationResult<DiscoveredService>> {
        let found = stream::iter(self.services.clone().into_iter().map(Ok));
        found.chain(stream::pending()).boxed()
    }
}

/// Personalizes against a server found through service discovery.
#[derive(Clone)]
pub struct ZeroConfPersonalizationTask {
    service: PersonalizationService,
    browser: Arc<dyn ServiceBrowser>,
    modal: Option<CancellationToken>,
}

impl ZeroConfPersonalizationTask {
    /// Create a task that fails on the first error.
    pub fn new(service: PersonalizationService, browser: Arc<dyn ServiceBrowser>) -> Self {
        Self {
            service,
            browser,
            modal: None,
        }
    }

    /// Retry every phase until success or until `modal` is cancelled.
    #[must_use]
    pub fn with_retry(mut self, modal: CancellationToken) -> Self {
        self.modal = Some(modal);
        self
    }

    fn device_name(&self) -> &str {
        self.service
            .config()
            .device_name
            .as_deref()
            .unwrap_or(DEFAULT_DEVICE_NAME)
    }

    async fn discover(&self) -> PersonalizationResult<DiscoveredService> {
        let config = &self.service.config().zero_conf;
        let timeout = config.discovery_timeout();
        let mut services = self.browser.browse(&config.service_type);

        match tokio::time::timeout(timeout, services.next()).await {
            Err(_) => Err(PersonalizationError::Timeout {
                operation: "service discovery".to_string(),
                after: timeout,
            }),
            Ok(None) => Err(PersonalizationError::Discovery(format!(
                "no {} instance found",
                config.service_type
            ))),
            Ok(Some(found)) => {
                let found = found?;
                info!(
                    instance = %found.name,
                    host = %found.host,
                    port = found.port,
                    "Discovered personalization service"
                );
                Ok(found)
            }
        }
    }

    async fn fetch(&self, url: &Url) -> PersonalizationResult<PersonalizeParams> {
        let params = self
            .service
            .get_auto_personalization_parameters(self.device_name(), url.as_str())
            .await?;
        Ok(PersonalizeParams::from_auto(
            params,
            self.service.config().default_server_port,
        ))
    }

    async fn attempt_once(&self) -> PersonalizationResult<()> {
        let found = self.discover().await?;
        let url = found.parameters_url()?;
        let params = self.fetch(&url).await?;
        self.service.personalize(params).await
    }

    async fn attempt_with_retry(
        &self,
        ctx: &TaskContext,
        modal: &CancellationToken,
    ) -> PersonalizationResult<()> {
        let config = &self.service.config().zero_conf;
        let _searching = ctx.splash().push_message(SEARCHING_MESSAGE);

        let found = retry_phase(modal, "discovery", &config.discovery_backoff, || {
            self.discover()
        })
        .await?;
        let url = found.parameters_url()?;
        let params = retry_phase(modal, "fetch", &config.fetch_backoff, || self.fetch(&url)).await?;
        retry_phase(modal, "personalize", &config.personalize_backoff, || {
            self.service.personalize(params.clone())
        })
        .await
    }

    async fn run(&self, ctx: &TaskContext) -> StartupResult<()> {
        let result = match &self.modal {
            Some(modal) => self.attempt_with_retry(ctx, modal).await,
            None => self.attempt_once().await,
        };
        record_personalization_attempt("zero_conf", result.is_ok());
        result.map_err(StartupError::from)
    }
}

impl Task for ZeroConfPersonalizationTask {
    fn execute<'a>(&'a self, ctx: &'a TaskContext) -> TaskOutput<'a> {
        TaskOutput::deferred(self.run(ctx))
    }
}

/// Run `op` until it succeeds, fails permanently or `modal` is cancelled.
async fn retry_phase<T, F, Fut>(
    modal: &CancellationToken,
    phase: &'static str,
    backoff: &BackoffConfig,
    mut op: F,
) -> PersonalizationResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = PersonalizationResult<T>>,
{
    let closed = || PersonalizationError::Cancelled("discovery dialog closed".to_string());
    let mut attempt: u32 = 0;
    loop {
        let result = tokio::select! {
            biased;
            () = modal.cancelled() => return Err(closed()),
            result = op() => result,
        };
        match result {
            Ok(value) => return Ok(value),
            Err(e) if !e.is_retryable() => return Err(e),
            Err(e) => {
                let delay = backoff.delay_for_attempt(attempt);
                warn!(
                    phase,
                    attempt = attempt + 1,
                    delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                    error = %e,
                    "Zero-conf phase failed, retrying"
                );
                record_retry(phase);
                tokio::select! {
                    biased;
                    () = modal.cancelled() => return Err(closed()),
                    () = tokio::time::sleep(delay) => {}
                }
                attempt = attempt.saturating_add(1);
                debug!(phase, attempt = attempt + 1, "Retrying zero-conf phase");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn service(host: &str, port: u16, txt: &[(&str, &str)]) -> DiscoveredService {
        DiscoveredService {
            name: "pos".into(),
            host: host.into(),
            port,
            txt: txt
                .iter()
                .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
                .collect(),
        }
    }

    #[test]
    fn test_parameters_url_from_txt() {
        let found = service("pos-server", 6140, &[("path", "/auto"), ("ssl", "true")]);
        assert_eq!(
            found.parameters_url().expect("url").as_str(),
            "https://pos-server:6140/auto"
        );

        let found = service("10.0.0.5", 8080, &[]);
        assert_eq!(
            found.parameters_url().expect("url").as_str(),
            "http://10.0.0.5:8080/rest/devices/autoPersonalizationParameters"
        );
    }

    #[test]
    fn test_static_browser_from_url() {
        let url = Url::parse("https://pos-server/auto/params").expect("url");
        let browser = StaticServiceBrowser::from_url(&url).expect("browser");
        let found = &browser.services[0];
        assert_eq!(found.port, 443);
        assert_eq!(
            found.parameters_url().expect("url").as_str(),
            "https://pos-server/auto/params"
        );
    }

    #[tokio::test]
    async fn test_static_browser_reports_then_idles() {
        let browser = StaticServiceBrowser::new(vec![service("a", 1, &[])]);
        let mut found = browser.browse("_x._tcp.");
        assert_eq!(found.next().await.expect("item").expect("ok").host, "a");
        let idle = tokio::time::timeout(Duration::from_millis(20), found.next()).await;
        assert!(idle.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_phase_backs_off_until_success() {
        let calls = AtomicUsize::new(0);
        let modal = CancellationToken::new();
        let backoff = BackoffConfig::new(1_000, 10_000, 2.0);
        let started = tokio::time::Instant::now();

        let value = retry_phase(&modal, "discovery", &backoff, || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 3 {
                    Err(PersonalizationError::Discovery("nothing yet".into()))
                } else {
                    Ok(n)
                }
            }
        })
        .await
        .expect("eventually succeeds");

        assert_eq!(value, 3);
        // 1s + 2s + 4s of backoff.
        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_secs(7), "{elapsed:?}");
        assert!(elapsed < Duration::from_secs(8), "{elapsed:?}");
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_phase_stops_when_modal_closes() {
        let modal = CancellationToken::new();
        let closer = modal.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(5)).await;
            closer.cancel();
        });
        let backoff = BackoffConfig::new(1_000, 10_000, 2.0);
        let err = retry_phase(&modal, "fetch", &backoff, || async {
            Err::<(), _>(PersonalizationError::Status("Service Unavailable".into()))
        })
        .await
        .unwrap_err();
        assert!(matches!(err, PersonalizationError::Cancelled(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_phase_gives_up_on_permanent_error() {
        let modal = CancellationToken::new();
        let backoff = BackoffConfig::default();
        let err = retry_phase(&modal, "personalize", &backoff, || async {
            Err::<(), _>(PersonalizationError::TokenMismatch)
        })
        .await
        .unwrap_err();
        assert!(matches!(err, PersonalizationError::TokenMismatch));
    }
}
