//! Runtime specialization of registered functions.
//!
//! A function's IR is captured ahead of time and registered under the address
//! of its native counterpart. At runtime some of its arguments are fixed to
//! concrete values; the IR is cloned, the fixed parameters become constants,
//! the clone is optimized and compiled, and a callable taking only the
//! remaining parameters comes back.

mod api;
mod codegen;
mod compiled;
mod context;
mod error;
mod options;
mod registry;
mod rewrite;
pub mod signature;
mod specializer;
mod wrapper;

pub use api::{extract_optimized_module, get_module, specialize, specialize_with};
pub use compiled::CompiledFunction;
pub use context::{ArgValue, Context, ContextBuilder, FixedArg, ParamDescriptor};
pub use error::{Error, Result};
pub use options::{Options, Target};
pub use registry::{FunctionId, RegisteredFunction, Registry, RegistryError};
pub use rejit_opt::OptLevel;
pub use signature::{Aligned, Bindings, Free, JitArg, JitFn, JitRet, JitType, Reduced};
pub use specializer::{OptimizedModule, Specializer};
pub use wrapper::Specialized;
