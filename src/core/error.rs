use thiserror::Error;

/// Failures surfaced by the comparison engine.
///
/// Nothing in the core retries or degrades: any of these aborts the evaluation
/// and is handed to the caller as-is.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum EngineError {
    /// An input violated its documented range and no computation was attempted.
    #[error("invalid parameter `{name}`: {reason}")]
    InvalidParameter { name: &'static str, reason: String },
    /// A growth factor would require a fractional power of a non-positive base.
    #[error("arithmetic domain error: {0}")]
    ArithmeticDomain(String),
}

impl EngineError {
    pub(crate) fn invalid(name: &'static str, reason: impl Into<String>) -> Self {
        Self::InvalidParameter {
            name,
            reason: reason.into(),
        }
    }
}
