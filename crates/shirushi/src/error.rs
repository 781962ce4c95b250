use thiserror::Error;

/// Errors that can occur while building or running the labeler.
#[derive(Debug, Error)]
pub enum ShirushiError {
    /// The recurrent cell variant string is not one of RNN / LSTM / GRU.
    #[error("unknown recurrent cell type: {0:?}")]
    UnknownCellType(String),

    /// A model hyperparameter violates a configuration invariant.
    #[error("invalid model configuration: {0}")]
    InvalidConfig(String),

    /// Two tensors that must agree on shape do not.
    #[error("shape mismatch for {what}: expected {expected}, got {actual}")]
    ShapeMismatch {
        /// Which tensor disagreed.
        what: &'static str,
        /// The shape the operation requires.
        expected: String,
        /// The shape that was provided.
        actual: String,
    },

    /// An id tensor carries a floating-point dtype.
    #[error("expected integer ids for {what}, got {dtype:?}")]
    InvalidDType {
        /// Which tensor carried the wrong dtype.
        what: &'static str,
        /// The dtype that was provided.
        dtype: candle_core::DType,
    },

    /// The loss was requested on a batch built without target labels.
    #[error("batch has no target labels, loss is undefined")]
    MissingTarget,

    /// Every position in the batch is masked out, so the mean loss has a
    /// zero denominator.
    #[error("batch mask is entirely zero, loss is undefined")]
    DegenerateBatch,

    /// Candle ML framework error.
    #[error("tensor operation failed: {0}")]
    CandleError(#[from] candle_core::Error),
}

/// Result type alias for shirushi operations.
pub type Result<T> = std::result::Result<T, ShirushiError>;
