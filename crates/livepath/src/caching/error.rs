use thiserror::Error;

/// Failure to materialize or patch an external reference.
///
/// A reference whose synchronization fails stays dirty, so the next access
/// retries.
#[derive(Debug, Clone, Error)]
pub enum CachingError {
    #[error("fetching content for {reference} failed: {message}")]
    Fetch { reference: String, message: String },
    #[error("content for {reference} cannot be applied: {message}")]
    InvalidContent { reference: String, message: String },
    #[error("next-stage selector '{select}' failed: {message}")]
    Selector { select: String, message: String },
    #[error("operation not supported: {0}")]
    Unsupported(&'static str),
    #[error("invalid caching configuration: {0}")]
    Configuration(String),
}

impl CachingError {
    pub fn fetch(reference: &crate::model::Node, message: impl Into<String>) -> Self {
        CachingError::Fetch { reference: format!("{reference:?}"), message: message.into() }
    }

    pub(crate) fn invalid_content(reference: &crate::model::Node, message: impl Into<String>) -> Self {
        CachingError::InvalidContent { reference: format!("{reference:?}"), message: message.into() }
    }
}
