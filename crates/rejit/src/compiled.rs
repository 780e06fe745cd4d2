use cranelift_jit::JITModule;
use rejit_ir::{Module, Signature};

use crate::codegen::NativeCode;
use crate::specializer::OptimizedModule;

/// Native code for one specialization, together with the module it was
/// generated from. Dropping it releases the code.
pub struct CompiledFunction {
    jit: Option<JITModule>,
    code: *const u8,
    optimized: OptimizedModule,
}

// SAFETY: the JIT memory is written once during finalization and only read
// (executed) afterwards; the module is never touched again except by `Drop`,
// which has exclusive access.
unsafe impl Send for CompiledFunction {}
unsafe impl Sync for CompiledFunction {}

impl CompiledFunction {
    pub(crate) fn new(native: NativeCode, optimized: OptimizedModule) -> Self {
        Self {
            jit: Some(native.jit),
            code: native.entry,
            optimized,
        }
    }

    /// Address of the entry function. Valid until `self` is dropped.
    pub fn code_ptr(&self) -> *const u8 {
        self.code
    }

    /// Signature of the entry function: the original one minus every fixed
    /// parameter.
    pub fn signature(&self) -> &Signature {
        &self.optimized.signature
    }

    pub fn entry_name(&self) -> &str {
        &self.optimized.entry
    }

    /// The optimized module the code was generated from.
    pub fn module(&self) -> &Module {
        &self.optimized.module
    }
}

impl std::fmt::Debug for CompiledFunction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompiledFunction")
            .field("entry", &self.optimized.entry)
            .field("signature", &self.optimized.signature)
            .field("code", &self.code)
            .finish()
    }
}

impl Drop for CompiledFunction {
    fn drop(&mut self) {
        if let Some(jit) = self.jit.take() {
            // SAFETY: the only pointer into this module's code is `self.code`,
            // and every callable derived from it borrows or owns `self`.
            unsafe { jit.free_memory() };
        }
    }
}
