use rejit_ir::Module;

use crate::compiled::CompiledFunction;
use crate::error::{Error, Result};
use crate::signature::{JitArg, JitFn, JitRet};

/// A callable specialization of type `F`.
///
/// Owns its native code: the code is released when the wrapper is dropped,
/// and moving the wrapper moves that ownership. Calls are safe; the function
/// type was checked against the compiled signature on construction.
pub struct Specialized<F: JitFn> {
    func: F,
    compiled: CompiledFunction,
}

impl<F: JitFn> Specialized<F> {
    pub fn new(compiled: CompiledFunction) -> Result<Self> {
        let found = F::signature();
        if &found != compiled.signature() {
            return Err(Error::SignatureMismatch {
                expected: compiled.signature().clone(),
                found,
            });
        }
        // SAFETY: the code was generated for exactly this signature with the
        // host's C calling convention, and `compiled` keeps it alive.
        let func = unsafe { F::from_code(compiled.code_ptr()) };
        Ok(Self { func, compiled })
    }

    /// The raw function pointer.
    ///
    /// # Safety
    ///
    /// The pointer dangles once `self` is dropped; the caller must not call
    /// it after that.
    pub unsafe fn as_fn(&self) -> F {
        self.func
    }

    pub fn compiled(&self) -> &CompiledFunction {
        &self.compiled
    }

    pub fn module(&self) -> &Module {
        self.compiled.module()
    }
}

impl<F: JitFn> std::fmt::Debug for Specialized<F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("Specialized").field(&self.compiled).finish()
    }
}

macro_rules! call_impl {
    ($($arg:ident : $ty:ident),*) => {
        impl<R: JitRet, $($ty: JitArg),*> Specialized<extern "C" fn($($ty),*) -> R> {
            pub fn call(&self, $($arg: $ty),*) -> R {
                (self.func)($($arg),*)
            }
        }
    };
}

call_impl!();
call_impl!(a: A);
call_impl!(a: A, b: B);
call_impl!(a: A, b: B, c: C);
call_impl!(a: A, b: B, c: C, d: D);
call_impl!(a: A, b: B, c: C, d: D, e: E);
call_impl!(a: A, b: B, c: C, d: D, e: E, f: G);
