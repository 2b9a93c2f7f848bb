//! Error type for override parsing.

/// A malformed override assignment.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid override '{input}': {reason}")]
pub struct OverrideSyntaxError {
    /// The override text as given on the command line.
    pub input: String,
    /// Why it was rejected.
    pub reason: String,
}

impl OverrideSyntaxError {
    pub fn new(input: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            input: input.into(),
            reason: reason.into(),
        }
    }
}
