//! JIT module construction with host symbols pre-registered.

use std::str::FromStr;

use cranelift_codegen::isa::{self, OwnedTargetIsa};
use cranelift_codegen::settings::{self, Configurable};
use cranelift_jit::{JITBuilder, JITModule};
use cranelift_module::default_libcall_names;
use rejit_opt::OptLevel;
use target_lexicon::Triple;

use crate::options::Target;

fn cranelift_opt_level(level: OptLevel) -> &'static str {
    match level {
        OptLevel::None | OptLevel::Less => "none",
        OptLevel::Default => "speed",
        OptLevel::Aggressive => "speed_and_size",
    }
}

/// Builds the instruction set description for `target`.
pub(crate) fn target_isa(
    target: &Target,
    level: OptLevel,
    verify: bool,
) -> Result<OwnedTargetIsa, String> {
    let mut flag_builder = settings::builder();
    flag_builder
        .set("opt_level", cranelift_opt_level(level))
        .map_err(|e| format!("failed to set opt_level: {e}"))?;
    flag_builder
        .set("enable_verifier", if verify { "true" } else { "false" })
        .map_err(|e| format!("failed to set enable_verifier: {e}"))?;
    flag_builder
        .set("use_colocated_libcalls", "false")
        .map_err(|e| format!("failed to set use_colocated_libcalls: {e}"))?;
    flag_builder
        .set("is_pic", "false")
        .map_err(|e| format!("failed to set is_pic: {e}"))?;

    let isa_builder = match target {
        Target::Native => cranelift_native::builder()
            .map_err(|e| format!("host machine is not supported: {e}"))?,
        Target::Host => isa::lookup(Triple::host())
            .map_err(|e| format!("host triple is not supported: {e}"))?,
        Target::Triple(triple) => {
            let triple = Triple::from_str(triple)
                .map_err(|e| format!("invalid target `{triple}`: {e}"))?;
            isa::lookup(triple).map_err(|e| format!("target is not supported: {e}"))?
        }
    };
    isa_builder
        .finish(settings::Flags::new(flag_builder))
        .map_err(|e| format!("failed to create ISA: {e}"))
}

/// Creates a `JITBuilder` with every resolved host symbol registered, so that
/// compiled functions can call them.
pub(crate) fn create_jit_builder(isa: OwnedTargetIsa, symbols: &[(String, usize)]) -> JITBuilder {
    let mut builder = JITBuilder::with_isa(isa, default_libcall_names());
    for (name, addr) in symbols {
        builder.symbol(name.as_str(), *addr as *const u8);
    }
    builder
}

pub(crate) fn create_jit_module(isa: OwnedTargetIsa, symbols: &[(String, usize)]) -> JITModule {
    JITModule::new(create_jit_builder(isa, symbols))
}
