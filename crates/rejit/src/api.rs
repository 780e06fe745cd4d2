//! Entry points keyed by native function pointers.

use rejit_ir::{FnAttrs, Module};

use crate::context::Context;
use crate::error::Result;
use crate::options::Options;
use crate::registry::{FunctionId, Registry};
use crate::signature::{Bindings, JitFn, Reduced};
use crate::specializer::Specializer;
use crate::wrapper::Specialized;

/// Specializes `f` for `args` with the specializer's options.
///
/// ```ignore
/// let add10 = specialize(&spec, add3 as extern "C" fn(i64, i64, i64) -> i64, (10_i64, Free, Free))?;
/// assert_eq!(add10.call(1, 2), 13);
/// ```
pub fn specialize<F, Args>(
    specializer: &Specializer,
    f: F,
    args: Args,
) -> Result<Specialized<Reduced<F, Args>>>
where
    F: JitFn,
    Args: Bindings<F>,
{
    specialize_with(specializer, f, args, specializer.options().clone())
}

pub fn specialize_with<F, Args>(
    specializer: &Specializer,
    f: F,
    args: Args,
    options: Options,
) -> Result<Specialized<Reduced<F, Args>>>
where
    F: JitFn,
    Args: Bindings<F>,
{
    let ctx = Context::new(args.descriptors(), options);
    let compiled = specializer.compile(FunctionId::of(f), &ctx)?;
    Specialized::new(compiled)
}

/// The module `specialize` would compile, with every function marked
/// always-inline so it can be embedded into other code.
pub fn extract_optimized_module<F, Args>(specializer: &Specializer, f: F, args: Args) -> Result<Module>
where
    F: JitFn,
    Args: Bindings<F>,
{
    let ctx = Context::new(args.descriptors(), specializer.options().clone());
    let mut module = specializer.optimize(FunctionId::of(f), &ctx)?.module;
    for func in module.functions.values_mut() {
        func.attrs = FnAttrs {
            always_inline: true,
            no_inline: false,
            opt_none: false,
        };
    }
    Ok(module)
}

/// A copy of the module registered for `f`.
pub fn get_module<F: JitFn>(registry: &Registry, f: F) -> Result<Module> {
    Ok((*registry.lookup(FunctionId::of(f))?.module).clone())
}
