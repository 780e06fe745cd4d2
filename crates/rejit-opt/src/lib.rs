//! Optimization passes over [`rejit_ir::Module`].
//!
//! Passes report whether they changed the module so that the
//! [`PassManager`] can iterate a group of them to a fixpoint. Functions
//! carrying `optnone` are never touched.

mod const_fold;
mod dce;
mod global_dce;
mod inline;
mod pipeline;
mod simplify_cfg;

pub use const_fold::{ConstFold, fold_binary, fold_cast, fold_cmp, fold_unary};
pub use dce::DeadCode;
pub use global_dce::GlobalDeadCode;
pub use inline::{Inline, InlinePolicy};
pub use pipeline::{OptLevel, ParseOptLevelError, PipelineConfig, PipelineStats, optimize};
pub use simplify_cfg::SimplifyCfg;

use rejit_ir::{IrError, Module, verify_module};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum OptError {
    #[error("pass `{pass}` failed: {message}")]
    Pass { pass: &'static str, message: String },

    #[error("invalid IR after pass `{pass}`: {source}")]
    Verify {
        pass: &'static str,
        #[source]
        source: IrError,
    },
}

impl OptError {
    pub fn pass_name(&self) -> &'static str {
        match self {
            OptError::Pass { pass, .. } | OptError::Verify { pass, .. } => pass,
        }
    }
}

/// A transformation over a whole module.
///
/// Passes must be deterministic: the same input module always produces the
/// same output module.
pub trait Pass: Send {
    fn name(&self) -> &'static str;

    /// Runs the pass in place and returns whether anything changed.
    fn run(&mut self, module: &mut Module) -> Result<bool, OptError>;
}

/// An ordered list of passes, run once or repeatedly until nothing changes.
pub struct PassManager {
    passes: Vec<Box<dyn Pass>>,
    verify: bool,
}

impl PassManager {
    pub fn new() -> Self {
        Self {
            passes: Vec::new(),
            verify: false,
        }
    }

    pub fn add_pass(&mut self, pass: impl Pass + 'static) -> &mut Self {
        self.passes.push(Box::new(pass));
        self
    }

    /// Run the verifier after every pass.
    pub fn set_verify(&mut self, verify: bool) -> &mut Self {
        self.verify = verify;
        self
    }

    pub fn pass_names(&self) -> Vec<&'static str> {
        self.passes.iter().map(|p| p.name()).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.passes.is_empty()
    }

    /// Runs every pass once, in order. Returns whether any pass changed the
    /// module.
    pub fn run(&mut self, module: &mut Module) -> Result<bool, OptError> {
        let mut changed = false;
        for pass in &mut self.passes {
            let name = pass.name();
            let pass_changed = pass.run(module)?;
            tracing::debug!(
                pass = name,
                changed = pass_changed,
                instrs = module.instr_count(),
                "pass finished"
            );
            if self.verify {
                verify_module(module).map_err(|source| OptError::Verify { pass: name, source })?;
            }
            if pass_changed && tracing::enabled!(tracing::Level::TRACE) {
                tracing::trace!(pass = name, "IR after pass:\n{module}");
            }
            changed |= pass_changed;
        }
        Ok(changed)
    }

    /// Repeats [`PassManager::run`] until a round changes nothing or
    /// `max_rounds` rounds have run. Returns the number of rounds.
    pub fn run_to_fixpoint(
        &mut self,
        module: &mut Module,
        max_rounds: usize,
    ) -> Result<usize, OptError> {
        for round in 1..=max_rounds {
            if !self.run(module)? {
                return Ok(round);
            }
        }
        tracing::debug!(max_rounds, "pass group stopped before reaching a fixpoint");
        Ok(max_rounds)
    }
}

impl Default for PassManager {
    fn default() -> Self {
        Self::new()
    }
}

/// Applies `f` to every function that optimization may modify.
pub(crate) fn for_each_optimizable(
    module: &mut Module,
    mut f: impl FnMut(&mut rejit_ir::Function) -> bool,
) -> bool {
    let mut changed = false;
    for func in module.functions.values_mut() {
        if func.attrs.opt_none {
            continue;
        }
        changed |= f(func);
    }
    changed
}
