use thiserror::Error;

use crate::value::BlockId;

#[derive(Debug, Error)]
pub enum IrError {
    #[error("{line}:{column}: {message}")]
    Parse {
        line: usize,
        column: usize,
        message: String,
    },

    #[error("invalid IR in `{function}`: {message}")]
    Verify { function: String, message: String },

    #[error("block {block} of `{function}` has no terminator")]
    Unterminated { function: String, block: BlockId },

    #[error("symbol `{0}` is already defined")]
    DuplicateSymbol(String),

    #[error("cannot encode module: {0}")]
    Encode(String),

    #[error("malformed module encoding: {0}")]
    Decode(String),

    #[error("unsupported module encoding version {0}")]
    UnsupportedVersion(u8),
}

impl IrError {
    pub(crate) fn verify(function: &str, message: impl Into<String>) -> Self {
        IrError::Verify {
            function: function.to_owned(),
            message: message.into(),
        }
    }
}
