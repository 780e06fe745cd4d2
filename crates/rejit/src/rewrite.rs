//! Turns a clone of a registered module into one whose exported entry takes
//! only the free parameters.

use std::sync::Arc;

use rejit_ir::{Constant, FnAttrs, Function, Instr, Linkage, Module, Type, ValueId};
use rustc_hash::FxHashMap;

use crate::context::{ArgValue, Context, ParamDescriptor};
use crate::error::Result;
use crate::registry::{FunctionId, RegisteredFunction, Registry};

/// Rewrites `module` (a clone of `target.module`) for `ctx` and returns the
/// name of the new exported entry.
///
/// The entry is copied under a fresh name with every fixed parameter turned
/// into a constant at the top of its entry block. The copy is exported and
/// marked always-inline; every other function becomes internal, and
/// `optnone` is cleared everywhere.
pub(crate) fn specialize_entry(
    module: &mut Module,
    registry: &Registry,
    target: &RegisteredFunction,
    ctx: &Context,
) -> Result<String> {
    let original = module
        .function(&target.entry)
        .ok_or(crate::Error::UnregisteredFunction { id: target.id })?
        .clone();
    ctx.check(&original.signature)?;

    let mut linked: FxHashMap<usize, String> = FxHashMap::default();
    let mut bindings: Vec<(usize, Instr)> = Vec::new();
    let mut alignments: Vec<(usize, u32)> = Vec::new();

    for (index, desc) in ctx.params().iter().enumerate() {
        let ParamDescriptor::Fixed(arg) = desc else {
            continue;
        };
        let result = ValueId(0);
        let instr = match arg.value {
            ArgValue::FnPtr(addr) => match callee_symbol(module, registry, target, addr, &mut linked)? {
                Some(name) => Instr::FuncAddr { result, name },
                None => const_instr(result, arg.value.to_constant(Type::Ptr)),
            },
            ArgValue::Ptr { align, .. } => {
                if align > 1 {
                    alignments.push((index, align));
                }
                const_instr(result, arg.value.to_constant(Type::Ptr))
            }
            value => const_instr(result, value.to_constant(arg.source)),
        };
        bindings.push((index, instr));
    }

    let mut func = original;
    let params = func.params();
    let mut prologue = Vec::with_capacity(bindings.len());
    for (index, mut instr) in bindings {
        instr.set_result(params[index]);
        prologue.push(instr);
    }
    for (index, align) in alignments {
        propagate_alignment(&mut func, params[index], align);
    }

    let fixed: Vec<bool> = ctx.params().iter().map(|d| !d.is_free()).collect();
    let entry_block = &mut func.blocks[0];
    let mut position = 0;
    entry_block.params.retain(|_| {
        let keep = !fixed[position];
        position += 1;
        keep
    });
    entry_block.instrs.splice(0..0, prologue);

    func.signature = ctx.reduced_signature(&func.signature);
    func.name = fresh_name(&format!("{}.specialized", target.entry), |name| {
        module.contains_symbol(name)
    });
    func.linkage = Linkage::Export;
    func.attrs = FnAttrs {
        always_inline: true,
        no_inline: false,
        opt_none: false,
    };
    let name = func.name.clone();

    for other in module.functions.values_mut() {
        other.linkage = Linkage::Internal;
        other.attrs.opt_none = false;
    }
    module.add_function(func)?;
    Ok(name)
}

fn const_instr(result: ValueId, value: Constant) -> Instr {
    Instr::Const { result, value }
}

/// `base`, or `base.N` for the smallest `N` that is not taken.
fn fresh_name(base: &str, taken: impl Fn(&str) -> bool) -> String {
    if !taken(base) {
        return base.to_owned();
    }
    (1..)
        .map(|n| format!("{base}.{n}"))
        .find(|name| !taken(name))
        .unwrap_or_else(|| base.to_owned())
}

/// The symbol a fixed function pointer refers to once its module is linked
/// in, or `None` if the pointer does not name a registered function.
fn callee_symbol(
    module: &mut Module,
    registry: &Registry,
    target: &RegisteredFunction,
    addr: usize,
    linked: &mut FxHashMap<usize, String>,
) -> Result<Option<String>> {
    if let Some(name) = linked.get(&addr) {
        return Ok(Some(name.clone()));
    }
    let Ok(callee) = registry.lookup(FunctionId::from_addr(addr)) else {
        tracing::debug!(addr = format_args!("{addr:#x}"), "function pointer is not registered");
        return Ok(None);
    };
    let name = if Arc::ptr_eq(&callee.module, &target.module) {
        callee.entry.clone()
    } else {
        link_module(module, &callee)?
    };
    tracing::debug!(callee = %callee.id, symbol = %name, "linked function pointer argument");
    linked.insert(addr, name.clone());
    Ok(Some(name))
}

/// Copies every function and extern of `callee.module` into `module`,
/// renaming functions whose names are taken. Returns the linked name of the
/// callee's entry.
fn link_module(module: &mut Module, callee: &RegisteredFunction) -> Result<String> {
    for ext in &callee.module.externs {
        let declared = module
            .extern_fn(&ext.name)
            .is_some_and(|existing| existing.signature == ext.signature);
        if !declared {
            module.declare_extern(ext.name.clone(), ext.signature.clone())?;
        }
    }

    let mut renames: FxHashMap<String, String> = FxHashMap::default();
    for name in callee.module.functions.keys() {
        let linked = fresh_name(name, |candidate| {
            module.contains_symbol(candidate) || renames.values().any(|taken| taken == candidate)
        });
        renames.insert(name.clone(), linked);
    }

    for func in callee.module.functions.values() {
        let mut copy: Function = func.clone();
        copy.name = renames[&func.name].clone();
        copy.linkage = Linkage::Internal;
        for block in &mut copy.blocks {
            for instr in &mut block.instrs {
                match instr {
                    Instr::Call { callee, .. } => {
                        if let Some(linked) = renames.get(callee.as_str()) {
                            *callee = linked.clone();
                        }
                    }
                    Instr::FuncAddr { name, .. } => {
                        if let Some(linked) = renames.get(name.as_str()) {
                            *name = linked.clone();
                        }
                    }
                    _ => {}
                }
            }
        }
        module.add_function(copy)?;
    }
    renames
        .get(&callee.entry)
        .cloned()
        .ok_or_else(|| crate::Error::UnregisteredFunction { id: callee.id })
}

/// Raises the recorded alignment of every access made directly through
/// `ptr`, a parameter known to be `align`-aligned.
fn propagate_alignment(func: &mut Function, ptr: ValueId, align: u32) {
    let effective = |offset: i32| -> u32 {
        if offset == 0 {
            align
        } else {
            align.min(1 << offset.unsigned_abs().trailing_zeros().min(31))
        }
    };
    for block in &mut func.blocks {
        for instr in &mut block.instrs {
            match instr {
                Instr::Load {
                    addr,
                    offset,
                    align: current,
                    ..
                }
                | Instr::Store {
                    addr,
                    offset,
                    align: current,
                    ..
                } if *addr == ptr => {
                    *current = (*current).max(effective(*offset));
                }
                _ => {}
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::FixedArg;
    use crate::options::Options;
    use rejit_ir::parse_module;

    const SUM: &str = r#"module "sum"

fn @sum(ptr, i64) -> i64 export optnone {
bb0(%0: ptr, %1: i64):
  %2 = load i64 %0, offset 8, align 1
  %3 = add i64 %2, %1
  return %3
}
"#;

    fn fixed(value: ArgValue, source: Type) -> ParamDescriptor {
        ParamDescriptor::Fixed(FixedArg { value, source })
    }

    #[test]
    fn fixed_parameters_become_constants() {
        let registry = Registry::new();
        let id = FunctionId::from_addr(0x10);
        unsafe { registry.register(id, "sum", parse_module(SUM).expect("parse")) }
            .expect("register");
        let target = registry.lookup(id).expect("lookup");
        let mut module = (*target.module).clone();
        let ctx = Context::new(
            vec![fixed(ArgValue::Ptr { addr: 0x1000, align: 16 }, Type::Ptr), ParamDescriptor::Free],
            Options::default(),
        );
        let entry = specialize_entry(&mut module, &registry, &target, &ctx).expect("rewrite");
        assert_eq!(entry, "sum.specialized");
        rejit_ir::verify_module(&module).expect("valid");

        let func = module.function(&entry).expect("entry");
        assert_eq!(func.signature.params, vec![Type::I64]);
        assert_eq!(func.linkage, Linkage::Export);
        assert!(func.attrs.always_inline);
        assert!(matches!(
            func.blocks[0].instrs[0],
            Instr::Const { value: Constant::Int { ty: Type::Ptr, value: 0x1000 }, .. }
        ));
        assert!(matches!(func.blocks[0].instrs[1], Instr::Load { align: 8, .. }));

        let original = module.function("sum").expect("original");
        assert_eq!(original.linkage, Linkage::Internal);
        assert!(!original.attrs.opt_none);
    }

    #[test]
    fn effective_alignment_respects_offsets() {
        let mut func = parse_module(SUM).expect("parse").functions["sum"].clone();
        let ptr = func.params()[0];
        propagate_alignment(&mut func, ptr, 4);
        assert!(matches!(func.blocks[0].instrs[0], Instr::Load { align: 4, .. }));
    }
}
