/// Convenience result type used across blendbench.
pub type BlendResult<T> = Result<T, BlendError>;

/// Top-level error taxonomy.
///
/// `Init` failures are fatal by contract: there is no fallback renderer, so callers are expected
/// to abort startup. A missing target surface is not an error at all (see
/// [`crate::DrawOutcome::Skipped`]).
#[derive(thiserror::Error, Debug)]
pub enum BlendError {
    /// Device, pipeline or synchronization primitive creation failed.
    #[error("initialization error: {0}")]
    Init(String),

    /// A pass or scope was encoded in a way the command model rejects.
    #[error("encoding error: {0}")]
    Encoding(String),

    /// A submitted command buffer failed while executing on the device.
    #[error("execution error: {0}")]
    Execution(String),

    /// Invalid configuration values.
    #[error("config error: {0}")]
    Config(String),

    /// Errors when serializing or deserializing configuration.
    #[error("serialization error: {0}")]
    Serde(String),

    /// Wrapped lower-level error from dependencies or IO.
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl BlendError {
    /// Build a [`BlendError::Init`] value.
    pub fn init(msg: impl Into<String>) -> Self {
        Self::Init(msg.into())
    }

    /// Build a [`BlendError::Encoding`] value.
    pub fn encoding(msg: impl Into<String>) -> Self {
        Self::Encoding(msg.into())
    }

    /// Build a [`BlendError::Execution`] value.
    pub fn execution(msg: impl Into<String>) -> Self {
        Self::Execution(msg.into())
    }

    /// Build a [`BlendError::Config`] value.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Build a [`BlendError::Serde`] value.
    pub fn serde(msg: impl Into<String>) -> Self {
        Self::Serde(msg.into())
    }
}

#[cfg(test)]
#[path = "../../tests/unit/foundation/error.rs"]
mod tests;
