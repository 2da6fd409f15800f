use std::fmt;

/// One reason an input was rejected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Issue {
    pub message: String,
}

impl Issue {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl fmt::Display for Issue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

/// Outcome of validating one raw input.
#[derive(Debug, Clone, PartialEq)]
pub enum Validation<T> {
    Success(T),
    Failure(Vec<Issue>),
}

impl<T> Validation<T> {
    /// Failure with a single issue.
    pub fn fail(message: impl Into<String>) -> Self {
        Self::Failure(vec![Issue::new(message)])
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success(_))
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Validation<U> {
        match self {
            Self::Success(value) => Validation::Success(f(value)),
            Self::Failure(issues) => Validation::Failure(issues),
        }
    }

    pub fn into_result(self) -> Result<T, Vec<Issue>> {
        match self {
            Self::Success(value) => Ok(value),
            Self::Failure(issues) => Err(issues),
        }
    }

    /// All issue messages joined into one line, for failures.
    pub fn message(&self) -> Option<String> {
        match self {
            Self::Success(_) => None,
            Self::Failure(issues) => Some(join_messages(issues)),
        }
    }
}

/// Join issue messages with `"; "`.
pub fn join_messages(issues: &[Issue]) -> String {
    issues
        .iter()
        .map(|issue| issue.message.as_str())
        .collect::<Vec<_>>()
        .join("; ")
}
