//! Startup Sequence Integration Tests
//!
//! Drives the full personalization sequence through the startup controller
//! against a wiremock server, checking which strategy wins and what the
//! shell observes.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;
use tillpoint_core::{
    all, FileStorage, KeyValueStorage, MemoryStorage, SplashScreen, StartupController, StartupError,
    StartupStatus, TaskExecutor, TaskRegistry,
};
use tillpoint_personalization::session::keys;
use tillpoint_personalization::{
    personalization_sequence, register_personalization_tasks, DeviceSelection,
    ManualEntryPrompt, PersonalizationConfig, PersonalizationConfigResponse,
    PersonalizationService, PersonalizationTasks, PersonalizeParams, ServerAddress,
    StaticServiceBrowser,
};
use wiremock::matchers::{body_partial_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// A user who closes every dialog.
struct DismissingPrompt;

#[async_trait]
impl ManualEntryPrompt for DismissingPrompt {
    async fn server_address(
        &self,
        _current: &ServerAddress,
        _error: Option<&str>,
    ) -> Option<ServerAddress> {
        None
    }

    async fn select_device(
        &self,
        _config: &PersonalizationConfigResponse,
    ) -> Option<DeviceSelection> {
        None
    }
}

fn config() -> PersonalizationConfig {
    let mut config = PersonalizationConfig::default();
    config.zero_conf.discovery_timeout_ms = 50;
    config.saved_session.countdown_steps = 1;
    config.saved_session.countdown_step_ms = 10;
    config.saved_session.max_attempts = Some(1);
    config.manual_entry.can_cancel = true;
    config
}

fn controller(service: &PersonalizationService) -> StartupController {
    let mut registry = TaskRegistry::new();
    register_personalization_tasks(
        &mut registry,
        PersonalizationTasks::new(
            service.clone(),
            Arc::new(StaticServiceBrowser::default()),
            Arc::new(DismissingPrompt),
        ),
    );
    StartupController::new(
        TaskExecutor::new(Arc::new(registry)),
        all(vec![personalization_sequence()]),
        SplashScreen::new(),
    )
}

#[tokio::test]
#[cfg_attr(
    target_os = "macos",
    ignore = "wiremock/reqwest system-configuration issue on macOS"
)]
async fn saved_session_wins_after_earlier_strategies_fail() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/rest/devices/personalize"))
        .and(body_partial_json(json!({ "deviceToken": "saved" })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "authToken": "renewed",
            "deviceModel": { "deviceId": "POS-1", "appId": "pos" }
        })))
        .expect(1)
        .mount(&server)
        .await;

    let addr = server.address();
    let storage: Arc<dyn KeyValueStorage> = Arc::new(MemoryStorage::with_values([
        (keys::DEVICE_TOKEN, "saved".to_string()),
        (keys::SERVER_NAME, addr.ip().to_string()),
        (keys::SERVER_PORT, addr.port().to_string()),
    ]));
    let service = PersonalizationService::new(config(), Arc::clone(&storage)).expect("service");
    let controller = controller(&service);

    let mut splash = controller.splash().subscribe();
    let watcher = tokio::spawn(async move {
        let mut first = None;
        while splash.changed().await.is_ok() {
            if first.is_none() {
                first = splash.borrow_and_update().clone();
            }
        }
        first
    });

    controller.begin_startup_sequence().await.expect("startup");
    assert!(matches!(controller.status(), StartupStatus::Succeeded));
    assert!(controller.splash().is_empty());
    assert!(service.is_personalized());
    assert_eq!(storage.get_value(keys::DEVICE_TOKEN).as_deref(), Some("renewed"));

    drop(controller);
    let first = watcher.await.expect("watcher");
    assert_eq!(first.as_deref(), Some("Personalizing device..."));
}

#[tokio::test]
async fn every_strategy_failing_fails_startup() {
    let storage: Arc<dyn KeyValueStorage> = Arc::new(MemoryStorage::new());
    let service = PersonalizationService::new(config(), storage).expect("service");
    let controller = controller(&service);

    let err = controller.begin_startup_sequence().await.unwrap_err();
    assert!(matches!(*err, StartupError::AllTasksFailed { attempted: 4 }));
    assert_eq!(err.to_string(), "all tasks failed");

    let status = controller.wait_for_completion().await;
    assert_eq!(status.label(), "failed");
    assert!(controller.splash().is_empty());
    assert!(!service.is_personalized());
}

#[tokio::test]
#[cfg_attr(
    target_os = "macos",
    ignore = "wiremock/reqwest system-configuration issue on macOS"
)]
async fn session_persisted_to_file_survives_restart() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/rest/devices/personalize"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "authToken": "issued",
            "deviceModel": { "deviceId": "POS-7", "appId": "pos" }
        })))
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().expect("tempdir");
    let file = dir.path().join("session.json");
    let addr = server.address();

    {
        let storage: Arc<dyn KeyValueStorage> =
            Arc::new(FileStorage::open(&file).expect("open storage"));
        let service = PersonalizationService::new(config(), storage).expect("service");
        service
            .personalize(
                PersonalizeParams::new(addr.ip().to_string(), addr.port())
                    .with_device("POS-7", "pos"),
            )
            .await
            .expect("personalize");
    }

    let storage: Arc<dyn KeyValueStorage> =
        Arc::new(FileStorage::open(&file).expect("reopen storage"));
    let service = PersonalizationService::new(config(), storage).expect("service");
    assert!(service.has_saved_session());
    assert_eq!(service.device_token().as_deref(), Some("issued"));
    assert_eq!(service.device_id().as_deref(), Some("POS-7"));
    assert_eq!(service.server_port(), Some(addr.port()));
    assert!(!service.is_personalized());

    let controller = controller(&service);
    controller.begin_startup_sequence().await.expect("startup");
    assert!(service.is_personalized());
}
