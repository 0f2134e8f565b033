use thiserror::Error;

/// A check failed and the commit attempt must be aborted.
#[derive(Debug, Clone, Error)]
#[error("{step} check failed: {message}")]
pub struct GateFailure {
    pub step: String,
    pub message: String,
    pub remedy: Option<String>,
    pub output: String,
    pub exit_code: Option<i32>,
}

impl GateFailure {
    pub fn new(step: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            step: step.into(),
            message: message.into(),
            remedy: None,
            output: String::new(),
            exit_code: None,
        }
    }

    pub fn with_remedy(mut self, remedy: Option<String>) -> Self {
        self.remedy = remedy;
        self
    }

    pub fn with_output(mut self, output: impl Into<String>) -> Self {
        self.output = output.into();
        self
    }

    pub fn with_exit_code(mut self, exit_code: Option<i32>) -> Self {
        self.exit_code = exit_code;
        self
    }

    /// Exit code the hook process should terminate with. Always non-zero.
    pub fn process_exit_code(&self) -> i32 {
        match self.exit_code {
            Some(code) if code != 0 => code,
            _ => 1,
        }
    }
}
