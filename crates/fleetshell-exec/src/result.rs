//! Result types for command execution

use std::time::Duration;

use crate::error::ExecError;

/// Status reported when no remote exit code is available
pub const STATUS_UNAVAILABLE: i32 = -1;

/// Result of a command execution
#[derive(Debug, Clone)]
pub struct CommandResult {
    /// stdout, followed by a newline and stderr when stderr is non-empty
    pub output: String,
    /// Exit status code (0 for success, -1 when no remote status exists)
    pub status: i32,
    /// Why the command did not succeed
    pub error: Option<ExecError>,
    /// Time taken to execute
    pub duration: Duration,
}

impl CommandResult {
    pub(crate) fn success(output: String, duration: Duration) -> Self {
        Self {
            output,
            status: 0,
            error: None,
            duration,
        }
    }

    pub(crate) fn exited(output: String, status: i32, error: ExecError, duration: Duration) -> Self {
        Self {
            output,
            status,
            error: Some(error),
            duration,
        }
    }

    /// Failure with no remote exit code and no output
    pub(crate) fn unavailable(error: ExecError, duration: Duration) -> Self {
        Self::exited(String::new(), STATUS_UNAVAILABLE, error, duration)
    }

    /// Check if command succeeded (exit code 0, no error)
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.status == 0 && self.error.is_none()
    }

    /// Whether the status came from the remote process
    #[must_use]
    pub fn has_remote_status(&self) -> bool {
        self.status != STATUS_UNAVAILABLE
    }

    /// Convert into the output, or the error if the command failed
    ///
    /// # Errors
    /// Returns the execution error when one was recorded
    pub fn into_result(self) -> Result<String, ExecError> {
        match self.error {
            Some(err) => Err(err),
            None => Ok(self.output),
        }
    }
}

/// Combine stdout and stderr
#[must_use]
pub fn combine_output(stdout: &[u8], stderr: &[u8]) -> String {
    let mut output = String::from_utf8_lossy(stdout).into_owned();
    if !stderr.is_empty() {
        output.push('\n');
        output.push_str(&String::from_utf8_lossy(stderr));
    }
    output
}
