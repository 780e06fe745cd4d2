//! Intermediate representation for runtime-specializable functions.
//!
//! A [`Module`] holds functions in block-parameter SSA form together with the
//! host symbols they call. Modules are built with [`FunctionBuilder`], read
//! and written in a line-oriented text form ([`parse_module`] and `Display`),
//! or stored in a compact binary encoding ([`to_bytes`] / [`from_bytes`]).

mod builder;
mod error;
mod function;
mod instr;
mod module;
mod parser;
mod printer;
mod serial;
mod types;
mod value;
pub mod verify;

pub use builder::FunctionBuilder;
pub use error::IrError;
pub use function::{Block, BlockParam, FnAttrs, Function, Linkage};
pub use instr::{BinOp, CastOp, CmpOp, Constant, Instr, Terminator, UnOp};
pub use module::{ExternFunction, Module};
pub use parser::parse_module;
pub use serial::{FORMAT_VERSION, from_bytes, is_encoded, to_bytes};
pub use types::{Signature, Type};
pub use value::{BlockId, ValueId};
pub use verify::{verify_function, verify_module};
