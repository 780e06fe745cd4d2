//! Native code generation for optimized modules through Cranelift.

mod jit_module;
mod lower;

use cranelift_codegen::ir::{Function as ClifFunction, UserFuncName};
use cranelift_frontend::{FunctionBuilder, FunctionBuilderContext};
use cranelift_jit::JITModule;
use cranelift_module::{FuncId, Linkage as ClifLinkage, Module as _};
use rejit_ir::{Linkage, Module};
use rustc_hash::FxHashMap;

use crate::error::{Error, Result};
use crate::options::Options;

use self::jit_module::{create_jit_module, target_isa};
use self::lower::{FunctionLowering, clif_signature};

/// A finalized JIT module and the address of its entry function.
pub(crate) struct NativeCode {
    pub(crate) jit: JITModule,
    pub(crate) entry: *const u8,
}

/// Compiles every function of `module` and returns the entry's code.
///
/// `symbols` must resolve every extern the module declares.
pub(crate) fn compile_module(
    module: &Module,
    entry: &str,
    options: &Options,
    symbols: &[(String, usize)],
) -> Result<NativeCode> {
    let isa = target_isa(&options.target, options.opt_level, options.verify).map_err(Error::Codegen)?;
    let mut jit = create_jit_module(isa, symbols);

    let mut func_ids: FxHashMap<String, FuncId> = FxHashMap::default();
    for ext in &module.externs {
        let sig = clif_signature(&jit, &ext.signature);
        let id = jit
            .declare_function(&ext.name, ClifLinkage::Import, &sig)
            .map_err(|e| Error::Codegen(format!("declare extern {}: {e}", ext.name)))?;
        func_ids.insert(ext.name.clone(), id);
    }
    for func in module.functions.values() {
        let sig = clif_signature(&jit, &func.signature);
        let linkage = match func.linkage {
            Linkage::Export => ClifLinkage::Export,
            Linkage::Internal => ClifLinkage::Local,
        };
        let id = jit
            .declare_function(&func.name, linkage, &sig)
            .map_err(|e| Error::Codegen(format!("declare {}: {e}", func.name)))?;
        func_ids.insert(func.name.clone(), id);
    }

    let mut fb_ctx = FunctionBuilderContext::new();
    for func in module.functions.values() {
        let func_id = func_ids[&func.name];
        let sig = clif_signature(&jit, &func.signature);
        let mut function =
            ClifFunction::with_name_signature(UserFuncName::user(0, func_id.as_u32()), sig);
        {
            let mut builder = FunctionBuilder::new(&mut function, &mut fb_ctx);
            FunctionLowering::new(&mut jit, &func_ids)
                .lower(func, &mut builder)
                .map_err(|e| Error::Codegen(format!("lower {}: {e}", func.name)))?;
            builder.finalize();
        }

        let mut ctx = jit.make_context();
        ctx.func = function;
        jit.define_function(func_id, &mut ctx)
            .map_err(|e| Error::Codegen(format!("define {}: {e:?}", func.name)))?;
        jit.clear_context(&mut ctx);
    }

    jit.finalize_definitions()
        .map_err(|e| Error::Codegen(format!("finalize: {e}")))?;
    let entry_id = *func_ids
        .get(entry)
        .ok_or_else(|| Error::Codegen(format!("entry `{entry}` was not compiled")))?;
    let code = jit.get_finalized_function(entry_id);
    tracing::debug!(
        functions = module.functions.len(),
        externs = module.externs.len(),
        entry,
        "native code ready"
    );
    Ok(NativeCode { jit, entry: code })
}
