//! Process-table inspection for the replication agent.
//!
//! The default inspector shells out to `ps -C <name> --no-headers -o pid`:
//! exit 0 lists the matches one per line, exit 1 means nothing matched, and
//! any other status means the inspection itself failed.

use std::future::Future;
use std::pin::Pin;
use std::process::Stdio;
use std::time::Duration;

use tracing::debug;

use crate::config::Settings;
use crate::error::ProcessError;

/// Boxed future returned by [`ProcessInspector`].
pub type ProcessFuture<'a> = Pin<Box<dyn Future<Output = Result<bool, ProcessError>> + Send + 'a>>;

/// Answers whether a named process is running, injected into the check for testability.
pub trait ProcessInspector: Send + Sync {
    /// `Ok(true)` for exactly one match, `Ok(false)` for none. Anything else is an error.
    fn is_running_exactly_once<'a>(&'a self, process_name: &'a str) -> ProcessFuture<'a>;
}

/// [`ProcessInspector`] backed by the `ps` binary.
#[derive(Debug, Clone)]
pub struct PsInspector {
    program: String,
    timeout: Duration,
}

impl PsInspector {
    pub fn new(program: impl Into<String>, timeout: Duration) -> Self {
        Self {
            program: program.into(),
            timeout,
        }
    }

    pub fn from_settings(settings: &Settings) -> Self {
        Self::new(settings.ps_path.clone(), settings.timeout)
    }

    async fn inspect(&self, process_name: &str) -> Result<bool, ProcessError> {
        let mut cmd = tokio::process::Command::new(&self.program);
        cmd.args(["-C", process_name, "--no-headers", "-o", "pid"])
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true);

        let output = match tokio::time::timeout(self.timeout, cmd.output()).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => {
                return Err(ProcessError::Spawn {
                    program: self.program.clone(),
                    reason: e.to_string(),
                });
            }
            Err(_) => return Err(ProcessError::Timeout(self.timeout)),
        };

        let stdout = String::from_utf8_lossy(&output.stdout);
        debug!(
            program = %self.program,
            %process_name,
            code = ?output.status.code(),
            "process inspection finished"
        );
        interpret_ps(output.status.code(), &stdout, process_name)
    }
}

impl ProcessInspector for PsInspector {
    fn is_running_exactly_once<'a>(&'a self, process_name: &'a str) -> ProcessFuture<'a> {
        Box::pin(self.inspect(process_name))
    }
}

/// Map a `ps` exit code and its pid listing onto the inspector contract.
pub fn interpret_ps(
    code: Option<i32>,
    stdout: &str,
    process_name: &str,
) -> Result<bool, ProcessError> {
    match code {
        Some(1) => Ok(false),
        Some(0) => {
            let count = stdout.lines().filter(|l| !l.trim().is_empty()).count();
            match count {
                0 => Ok(false),
                1 => Ok(true),
                count => Err(ProcessError::MultipleInstances {
                    name: process_name.to_string(),
                    count,
                }),
            }
        }
        code => Err(ProcessError::UnexpectedExit { code }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exit_one_is_not_running() {
        assert!(!interpret_ps(Some(1), "", "consul-replicate").unwrap());
    }

    #[test]
    fn single_pid_is_running() {
        assert!(interpret_ps(Some(0), "  4242\n", "consul-replicate").unwrap());
    }

    #[test]
    fn several_pids_are_ambiguous() {
        let err = interpret_ps(Some(0), " 10\n 11\n", "consul-replicate").unwrap_err();
        assert!(matches!(err, ProcessError::MultipleInstances { count: 2, .. }));
    }

    #[test]
    fn other_exit_codes_are_errors() {
        assert!(matches!(
            interpret_ps(Some(2), "", "x"),
            Err(ProcessError::UnexpectedExit { code: Some(2) })
        ));
        // Killed by a signal.
        assert!(matches!(
            interpret_ps(None, "", "x"),
            Err(ProcessError::UnexpectedExit { code: None })
        ));
    }

    #[test]
    fn success_with_empty_listing_is_not_running() {
        assert!(!interpret_ps(Some(0), "\n", "x").unwrap());
    }

    #[tokio::test]
    async fn missing_ps_binary_is_spawn_error() {
        let inspector = PsInspector::new("/nonexistent/bin/ps", Duration::from_secs(1));
        let err = inspector
            .is_running_exactly_once("consul-replicate")
            .await
            .unwrap_err();
        assert!(matches!(err, ProcessError::Spawn { .. }));
    }
}
