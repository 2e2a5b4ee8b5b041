//! Bounded subprocess execution for shell-command jobs.

use std::process::Stdio;
use std::time::{Duration, Instant};
use tokio::process::Command;

/// Exit code reported when the subprocess was killed at the deadline rather
/// than exiting on its own.
pub const TIMEOUT_EXIT_CODE: i64 = -1;

/// Exit code reported when the shell could not be spawned at all.
pub const SPAWN_FAILURE_EXIT_CODE: i64 = 1;

/// Error message recorded when a job exceeds its execution deadline.
pub const TIMEOUT_ERROR: &str = "job timeout exceeded";

/// Outcome of one subprocess execution.
///
/// Failures are carried in the result, never raised: `err` distinguishes
/// "could not run or was killed" from a plain non-zero exit.
#[derive(Debug)]
pub struct ExecResult {
    /// Exit code of the subprocess; [`TIMEOUT_EXIT_CODE`] when it was killed.
    pub exit_code: i64,
    /// Full captured stdout.
    pub stdout: String,
    /// Full captured stderr.
    pub stderr: String,
    /// Present when the command exited non-zero, could not run, or was killed.
    pub err: Option<String>,
    /// Wall-clock time from spawn to completion or termination, in seconds.
    pub duration: f64,
}

impl ExecResult {
    /// Whether the attempt counts as a success for the job lifecycle.
    pub fn success(&self) -> bool {
        self.exit_code == 0 && self.err.is_none()
    }

    /// The message recorded on the job row for a failed attempt: stderr when
    /// the command produced any, the execution error otherwise.
    pub fn error_message(&self) -> String {
        if self.stderr.is_empty() {
            self.err
                .clone()
                .unwrap_or_else(|| format!("exit status {}", self.exit_code))
        } else {
            self.stderr.clone()
        }
    }
}

/// Run `command` under `sh -c` with a deadline.
///
/// The deadline is the only thing that interrupts the subprocess: an attempt
/// that has started always runs to completion or to `timeout`, at which point
/// the child is killed and a timeout-equivalent failure is returned. Stdout
/// and stderr are buffered in memory in full.
pub async fn execute(command: &str, timeout: Duration) -> ExecResult {
    let started = Instant::now();

    let child = Command::new("sh")
        .arg("-c")
        .arg(command)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn();

    let child = match child {
        Ok(child) => child,
        Err(error) => {
            return ExecResult {
                exit_code: SPAWN_FAILURE_EXIT_CODE,
                stdout: String::new(),
                stderr: String::new(),
                err: Some(format!("failed to spawn shell: {error}")),
                duration: started.elapsed().as_secs_f64(),
            };
        }
    };

    // On the deadline path the elapsed timeout drops the output future, which
    // kills the child via kill_on_drop; the runtime reaps it in the background.
    match tokio::time::timeout(timeout, child.wait_with_output()).await {
        Ok(result) => finish(result, started),
        Err(_) => timed_out(started),
    }
}

fn finish(result: std::io::Result<std::process::Output>, started: Instant) -> ExecResult {
    let duration = started.elapsed().as_secs_f64();

    match result {
        Ok(output) => {
            let err = if output.status.success() {
                None
            } else {
                Some(match output.status.code() {
                    Some(code) => format!("exit status {code}"),
                    None => "terminated by signal".to_string(),
                })
            };

            ExecResult {
                exit_code: output.status.code().map_or(TIMEOUT_EXIT_CODE, i64::from),
                stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
                stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
                err,
                duration,
            }
        }
        Err(error) => ExecResult {
            exit_code: SPAWN_FAILURE_EXIT_CODE,
            stdout: String::new(),
            stderr: String::new(),
            err: Some(error.to_string()),
            duration,
        },
    }
}

fn timed_out(started: Instant) -> ExecResult {
    ExecResult {
        exit_code: TIMEOUT_EXIT_CODE,
        stdout: String::new(),
        stderr: String::new(),
        err: Some(TIMEOUT_ERROR.to_string()),
        duration: started.elapsed().as_secs_f64(),
    }
}
