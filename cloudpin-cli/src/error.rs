//! Error utilities: map a failed `run()` to a process exit code.

use rama_error::BoxError;

/// An error carrying the exit code the process should terminate with.
#[derive(Debug)]
pub struct ErrorWithExitCode {
    code: i32,
    error: BoxError,
}

impl ErrorWithExitCode {
    pub fn new(code: i32, error: impl Into<BoxError>) -> Self {
        Self {
            code,
            error: error.into(),
        }
    }

    pub fn exit_code(&self) -> i32 {
        self.code
    }
}

impl From<BoxError> for ErrorWithExitCode {
    fn from(error: BoxError) -> Self {
        Self { code: 1, error }
    }
}

impl From<cloudpin_core::CloudPinError> for ErrorWithExitCode {
    fn from(error: cloudpin_core::CloudPinError) -> Self {
        let code = match &error {
            cloudpin_core::CloudPinError::Config(_) => 64,
            cloudpin_core::CloudPinError::Auth(_) => 77,
            _ => 1,
        };
        Self::new(code, Box::new(error))
    }
}

impl std::fmt::Display for ErrorWithExitCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}] {}", self.code, self.error)
    }
}

impl std::error::Error for ErrorWithExitCode {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.error.source()
    }
}
