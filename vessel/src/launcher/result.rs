use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::LaunchError;

/// Diagnostic description of a work unit failure.
///
/// Crosses the process boundary inside the result record, so it only holds
/// rendered text: a short kind, the message and the rendered cause chain.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct FailureCause {
    pub kind: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub causes: Vec<String>,
}

impl FailureCause {
    pub fn new(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            message: message.into(),
            causes: Vec::new(),
        }
    }

    /// Append one underlying cause to the chain.
    pub fn caused_by(mut self, cause: impl Into<String>) -> Self {
        self.causes.push(cause.into());
        self
    }

    /// Capture an error and its whole `source()` chain.
    pub fn from_error(kind: impl Into<String>, error: &anyhow::Error) -> Self {
        Self {
            kind: kind.into(),
            message: error.to_string(),
            causes: error.chain().skip(1).map(ToString::to_string).collect(),
        }
    }
}

impl fmt::Display for FailureCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)?;
        for cause in &self.causes {
            write!(f, "; caused by: {cause}")?;
        }
        Ok(())
    }
}

impl From<anyhow::Error> for FailureCause {
    fn from(error: anyhow::Error) -> Self {
        Self::from_error("Error", &error)
    }
}

#[derive(Clone, Debug)]
enum Outcome<T> {
    Value(T),
    Failure(FailureCause),
}

/// Terminal outcome of one launch: a value or a failure, plus the console
/// transcript the worker produced.
#[derive(Clone, Debug)]
pub struct ExecutionResult<T> {
    outcome: Outcome<T>,
    transcript: Vec<String>,
}

impl<T> ExecutionResult<T> {
    pub fn success(value: T, transcript: Vec<String>) -> Self {
        Self {
            outcome: Outcome::Value(value),
            transcript,
        }
    }

    pub fn failure(cause: FailureCause, transcript: Vec<String>) -> Self {
        Self {
            outcome: Outcome::Failure(cause),
            transcript,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self.outcome, Outcome::Value(_))
    }

    pub fn value(&self) -> Option<&T> {
        match &self.outcome {
            Outcome::Value(value) => Some(value),
            Outcome::Failure(_) => None,
        }
    }

    pub fn failure_cause(&self) -> Option<&FailureCause> {
        match &self.outcome {
            Outcome::Value(_) => None,
            Outcome::Failure(cause) => Some(cause),
        }
    }

    pub fn transcript(&self) -> &[String] {
        &self.transcript
    }

    /// Take the value, turning a unit failure into [`LaunchError::WorkUnit`].
    pub fn into_value(self) -> Result<T, LaunchError> {
        match self.outcome {
            Outcome::Value(value) => Ok(value),
            Outcome::Failure(cause) => Err(LaunchError::WorkUnit {
                cause,
                transcript: self.transcript,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_success_has_value_and_no_failure() {
        let result = ExecutionResult::success(42, vec!["started".into()]);
        assert!(result.is_success());
        assert_eq!(result.value(), Some(&42));
        assert!(result.failure_cause().is_none());
        assert_eq!(result.transcript(), ["started".to_string()]);
    }

    #[test]
    fn test_failure_converts_into_work_unit_error() {
        let cause = FailureCause::new("ArithmeticError", "division by zero");
        let result = ExecutionResult::<i64>::failure(cause.clone(), vec!["dividing".into()]);
        assert!(result.value().is_none());
        assert_eq!(result.failure_cause(), Some(&cause));

        match result.into_value() {
            Err(LaunchError::WorkUnit { cause: got, transcript }) => {
                assert_eq!(got, cause);
                assert_eq!(transcript, vec!["dividing".to_string()]);
            }
            other => panic!("expected work unit error, got {other:?}"),
        }
    }

    #[test]
    fn test_failure_cause_renders_chain() {
        let error = anyhow::anyhow!("disk full").context("writing plan");
        let cause = FailureCause::from_error("IoError", &error);
        assert_eq!(cause.message, "writing plan");
        assert_eq!(cause.causes, vec!["disk full".to_string()]);
        assert_eq!(cause.to_string(), "IoError: writing plan; caused by: disk full");
    }
}
