use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use rejit_ir::{Module, Signature, verify_module};

use crate::codegen;
use crate::compiled::CompiledFunction;
use crate::context::Context;
use crate::error::{Error, Result};
use crate::options::Options;
use crate::registry::{FunctionId, Registry};
use crate::rewrite;

/// The module produced for one specialization, before code generation.
#[derive(Debug, Clone, PartialEq)]
pub struct OptimizedModule {
    pub module: Module,
    /// Name of the exported entry function.
    pub entry: String,
    /// Signature of the entry: the original minus every fixed parameter.
    pub signature: Signature,
}

/// Produces specializations of registered functions.
///
/// Shares the registry read-only, so one specializer (or several) can be used
/// from many threads at once. Every request works on its own clone of the
/// captured module.
pub struct Specializer {
    registry: Arc<Registry>,
    options: Options,
    dumps: AtomicUsize,
}

impl Specializer {
    pub fn new(registry: Arc<Registry>) -> Self {
        Self::with_options(registry, Options::default())
    }

    pub fn with_options(registry: Arc<Registry>, options: Options) -> Self {
        Self {
            registry,
            options,
            dumps: AtomicUsize::new(0),
        }
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    /// Options used by requests that do not bring their own.
    pub fn options(&self) -> &Options {
        &self.options
    }

    /// Rewrites and optimizes the module of `id` for `ctx` without
    /// generating code.
    pub fn optimize(&self, id: FunctionId, ctx: &Context) -> Result<OptimizedModule> {
        let options = ctx.options();
        let registered = self.registry.lookup(id)?;
        let mut module = (*registered.module).clone();
        let entry = rewrite::specialize_entry(&mut module, &self.registry, &registered, ctx)?;
        if options.verify {
            verify_module(&module)?;
        }

        rejit_opt::optimize(&mut module, &options.pipeline())?;
        if options.verify {
            verify_module(&module)?;
        }

        let signature = module
            .function(&entry)
            .map(|f| f.signature.clone())
            .ok_or_else(|| Error::Optimization {
                pass: "global-dce".to_owned(),
                message: format!("entry `{entry}` was removed"),
            })?;
        if let Some(dir) = &options.dump_dir {
            self.dump(dir, &entry, &module);
        }
        Ok(OptimizedModule {
            module,
            entry,
            signature,
        })
    }

    /// Specializes `id` for `ctx` and generates native code for it.
    pub fn compile(&self, id: FunctionId, ctx: &Context) -> Result<CompiledFunction> {
        let options = ctx.options();
        let _span = tracing::debug_span!(
            "specialize",
            function = %id,
            fixed = ctx.fixed_count(),
            free = ctx.free_count(),
            opt_level = %options.opt_level,
        )
        .entered();

        let optimized = self.optimize(id, ctx)?;
        if !options.target.is_executable() {
            return Err(Error::Codegen(format!(
                "code for target `{}` cannot run in this process",
                options.target
            )));
        }

        let symbols = self.resolve_externs(&optimized.module)?;
        let native = codegen::compile_module(&optimized.module, &optimized.entry, options, &symbols)?;
        tracing::info!(
            entry = %optimized.entry,
            signature = %optimized.signature,
            instrs = optimized.module.instr_count(),
            "specialized"
        );
        Ok(CompiledFunction::new(native, optimized))
    }

    fn resolve_externs(&self, module: &Module) -> Result<Vec<(String, usize)>> {
        module
            .externs
            .iter()
            .map(|ext| {
                self.registry
                    .resolve_symbol(&ext.name, &ext.signature)
                    .map(|addr| (ext.name.clone(), addr))
            })
            .collect()
    }

    /// A failed dump is logged and otherwise ignored.
    fn dump(&self, dir: &Path, entry: &str, module: &Module) {
        let n = self.dumps.fetch_add(1, Ordering::Relaxed);
        let path = dir.join(format!("{entry}.{n}.rjir"));
        let result = std::fs::create_dir_all(dir).and_then(|()| std::fs::write(&path, module.to_string()));
        match result {
            Ok(()) => tracing::debug!(path = %path.display(), "dumped optimized module"),
            Err(err) => tracing::warn!(path = %path.display(), %err, "failed to dump optimized module"),
        }
    }
}
