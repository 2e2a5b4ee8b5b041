#![allow(missing_docs)]
#![allow(clippy::expect_used)]
#![allow(clippy::panic)]
#![allow(clippy::unwrap_used)]
#![allow(clippy::indexing_slicing)]

use claims::{assert_gt, assert_lt, assert_none, assert_some};
use queuectl::executor::{self, TIMEOUT_ERROR, TIMEOUT_EXIT_CODE};
use std::time::{Duration, Instant};

#[tokio::test]
async fn captures_stdout_of_successful_command() {
    let result = executor::execute("echo hello", Duration::from_secs(5)).await;

    assert!(result.success());
    assert_eq!(result.exit_code, 0);
    assert_eq!(result.stdout, "hello\n");
    assert_eq!(result.stderr, "");
    assert_none!(result.err);
    assert_gt!(result.duration, 0.0);
}

#[tokio::test]
async fn succeeds_with_empty_output() {
    let result = executor::execute("true", Duration::from_secs(5)).await;

    assert!(result.success());
    assert_eq!(result.stdout, "");
    assert_eq!(result.stderr, "");
}

#[tokio::test]
async fn runs_pipelines() {
    let result = executor::execute("echo hello world | wc -w", Duration::from_secs(5)).await;

    assert!(result.success());
    assert_eq!(result.stdout.trim(), "2");
}

#[tokio::test]
async fn reports_nonzero_exit() {
    let result = executor::execute("exit 2", Duration::from_secs(5)).await;

    assert!(!result.success());
    assert_eq!(result.exit_code, 2);
    assert_eq!(result.err.as_deref(), Some("exit status 2"));
    // No stderr, so the settle message falls back to the exit error.
    assert_eq!(result.error_message(), "exit status 2");
}

#[tokio::test]
async fn captures_stderr_for_the_settle_message() {
    let result = executor::execute("echo oops >&2; exit 1", Duration::from_secs(5)).await;

    assert!(!result.success());
    assert_eq!(result.exit_code, 1);
    assert_eq!(result.stderr, "oops\n");
    assert_eq!(result.error_message(), "oops\n");
}

#[tokio::test]
async fn missing_command_reports_error() {
    let result =
        executor::execute("definitely_not_a_real_command_404", Duration::from_secs(5)).await;

    assert!(!result.success());
    assert_eq!(result.exit_code, 127);
    assert_some!(result.err);
    assert!(!result.stderr.is_empty());
}

#[tokio::test]
async fn kills_job_at_the_deadline() {
    let started = Instant::now();
    let result = executor::execute("sleep 30", Duration::from_millis(200)).await;

    assert_lt!(started.elapsed(), Duration::from_secs(5));
    assert!(!result.success());
    assert_eq!(result.exit_code, TIMEOUT_EXIT_CODE);
    assert_eq!(result.err.as_deref(), Some(TIMEOUT_ERROR));
    assert_eq!(result.error_message(), TIMEOUT_ERROR);
    assert_gt!(result.duration, 0.1);
    assert_lt!(result.duration, 5.0);
}
