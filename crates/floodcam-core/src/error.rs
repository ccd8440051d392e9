use thiserror::Error;

/// Shared lightweight error type for core primitive operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FloodcamError {
    /// Invalid caller input or malformed primitive value.
    #[error("invalid input: {0}")]
    InvalidInput(&'static str),
    /// Variant tag outside the accepted alphabet or length.
    #[error("invalid variant tag: {0:?}")]
    InvalidVariant(String),
}
