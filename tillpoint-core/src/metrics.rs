//! Startup metrics.
//!
//! Recorded through the `metrics` facade; they are no-ops until the host
//! installs a recorder.

use metrics::{counter, gauge, histogram};

use crate::controller::StartupStatus;

// Metric names as constants for consistency
const STARTUP_TASKS_TOTAL: &str = "tillpoint_startup_tasks_total";
const STARTUP_TASK_DURATION: &str = "tillpoint_startup_task_duration_seconds";
const STARTUP_STATUS: &str = "tillpoint_startup_status";
const PERSONALIZATION_ATTEMPTS_TOTAL: &str = "tillpoint_personalization_attempts_total";
const RETRY_ATTEMPTS_TOTAL: &str = "tillpoint_retry_attempts_total";

/// Record a finished leaf task.
///
/// # Arguments
///
/// * `task` - Task name
/// * `success` - Whether the task succeeded
/// * `duration_secs` - Wall-clock duration in seconds
pub fn record_task(task: &str, success: bool, duration_secs: f64) {
    counter!(
        STARTUP_TASKS_TOTAL,
        "task" => task.to_string(),
        "outcome" => outcome(success)
    )
    .increment(1);
    histogram!(STARTUP_TASK_DURATION, "task" => task.to_string()).record(duration_secs);
}

/// Update the startup status gauge.
///
/// The gauge labelled with the current status is set to 1, all others to 0.
pub fn set_startup_status(status: &StartupStatus) {
    for label in ["not_started", "in_progress", "succeeded", "failed"] {
        gauge!(STARTUP_STATUS, "status" => label).set(0.0);
    }
    gauge!(STARTUP_STATUS, "status" => status.label()).set(1.0);
}

/// Record a personalization attempt.
///
/// # Arguments
///
/// * `strategy` - Strategy name (query_params, zero_conf, saved_session, manual)
/// * `success` - Whether the device was personalized
pub fn record_personalization_attempt(strategy: &str, success: bool) {
    counter!(
        PERSONALIZATION_ATTEMPTS_TOTAL,
        "strategy" => strategy.to_string(),
        "outcome" => outcome(success)
    )
    .increment(1);
}

/// Record a retry inside a task.
///
/// # Arguments
///
/// * `phase` - Retry phase (discovery, fetch, personalize, saved_session)
pub fn record_retry(phase: &str) {
    counter!(RETRY_ATTEMPTS_TOTAL, "phase" => phase.to_string()).increment(1);
}

const fn outcome(success: bool) -> &'static str {
    if success {
        "success"
    } else {
        "failure"
    }
}
