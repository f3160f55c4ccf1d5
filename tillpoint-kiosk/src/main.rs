//! Tillpoint Kiosk binary entry point.

use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tillpoint_core::{
    FileStorage, KeyValueStorage, SplashScreen, StartupController, TaskExecutor, TaskRegistry,
};
use tillpoint_kiosk::{CliArgs, ConsolePrompt, KioskConfig};
use tillpoint_personalization::{
    personalization_sequence, register_personalization_tasks, PersonalizationService,
    PersonalizationTasks, ServiceBrowser, StaticServiceBrowser,
};
use tokio_stream::wrappers::WatchStream;
use tokio_stream::StreamExt;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};
use url::Url;

/// Initialize structured tracing with optional JSON format.
///
/// Set `RUST_LOG` to control log levels
/// (default: info,tillpoint_core=debug,tillpoint_personalization=debug).
/// Set `RUST_LOG_FORMAT=json` for JSON output.
fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new("info,tillpoint_core=debug,tillpoint_personalization=debug")
    });

    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_target(true)
        .with_thread_ids(false)
        .with_file(true)
        .with_line_number(true);

    if std::env::var("RUST_LOG_FORMAT").as_deref() == Ok("json") {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt_layer.json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt_layer)
            .init();
    }
}

fn service_browser(config: &KioskConfig) -> anyhow::Result<Arc<dyn ServiceBrowser>> {
    let Some(discovery_url) = &config.discovery_url else {
        return Ok(Arc::new(StaticServiceBrowser::default()));
    };
    let url = Url::parse(discovery_url)
        .with_context(|| format!("invalid discovery URL `{discovery_url}`"))?;
    Ok(Arc::new(StaticServiceBrowser::from_url(&url)?))
}

/// Resolves after the second interrupt. The first one closes the discovery
/// modal so zero-conf gives up and the next strategy runs.
async fn interrupted(modal: CancellationToken) {
    for _ in 0..2 {
        if tokio::signal::ctrl_c().await.is_err() {
            tracing::warn!("Interrupt handler unavailable");
            std::future::pending::<()>().await;
        }
        if modal.is_cancelled() {
            tracing::warn!("Second interrupt, abandoning startup");
            return;
        }
        tracing::info!("Interrupt received, closing discovery");
        modal.cancel();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let config = KioskConfig::from(CliArgs::parse());
    let personalization = config.personalization_config()?;
    let launch_params = config.launch_params()?;

    std::fs::create_dir_all(&config.data_dir)
        .with_context(|| format!("failed to create {}", config.data_dir.display()))?;
    let storage: Arc<dyn KeyValueStorage> = Arc::new(FileStorage::open(config.storage_path())?);
    tracing::info!(path = %config.storage_path().display(), "Session storage opened");

    let service = PersonalizationService::new(personalization, storage)?;
    let modal = CancellationToken::new();

    let mut registry = TaskRegistry::new();
    register_personalization_tasks(
        &mut registry,
        PersonalizationTasks::new(
            service.clone(),
            service_browser(&config)?,
            Arc::new(ConsolePrompt::stdio()),
        )
        .with_launch_params(launch_params)
        .with_discovery_modal(modal.clone()),
    );

    let controller = StartupController::new(
        TaskExecutor::new(Arc::new(registry)),
        personalization_sequence(),
        SplashScreen::new(),
    );

    let mut splash = WatchStream::from_changes(controller.splash().subscribe());
    tokio::spawn(async move {
        while let Some(message) = splash.next().await {
            if let Some(message) = message {
                tracing::info!(splash = %message, "Splash");
            }
        }
    });

    tokio::select! {
        result = controller.begin_startup_sequence() => {
            if let Err(e) = result {
                tracing::error!(error = %e, "Startup failed");
                return Err(anyhow::anyhow!("startup failed: {e}"));
            }
        }
        () = interrupted(modal) => return Ok(()),
    }

    let state = service.state();
    tracing::info!(
        device_id = state.device_id.as_deref().unwrap_or_default(),
        app_id = state.app_id.as_deref().unwrap_or_default(),
        server = %state.server_address().unwrap_or_default(),
        "Terminal personalized"
    );
    Ok(())
}
