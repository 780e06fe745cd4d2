use rejit_ir::{IrError, Signature, Type};
use rejit_opt::OptError;
use thiserror::Error;

use crate::registry::{FunctionId, RegistryError};

#[derive(Debug, Error)]
pub enum Error {
    #[error("function {id} has no registered representation")]
    UnregisteredFunction { id: FunctionId },

    #[error("function takes {expected} arguments, {found} were bound")]
    ArityMismatch { expected: usize, found: usize },

    #[error("argument {index}: cannot bind a {found} value to a {expected} parameter")]
    TypeBinding {
        index: usize,
        expected: Type,
        found: Type,
    },

    #[error("optimization failed in pass `{pass}`: {message}")]
    Optimization { pass: String, message: String },

    #[error("code generation failed: {0}")]
    Codegen(String),

    #[error("callable type {found} does not match the compiled signature {expected}")]
    SignatureMismatch {
        expected: Signature,
        found: Signature,
    },

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error(transparent)]
    Ir(#[from] IrError),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl From<OptError> for Error {
    fn from(err: OptError) -> Self {
        let pass = err.pass_name().to_owned();
        let message = match err {
            OptError::Pass { message, .. } => message,
            OptError::Verify { source, .. } => source.to_string(),
        };
        Error::Optimization { pass, message }
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
