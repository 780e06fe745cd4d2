//! Function inlining.
//!
//! A call is replaced by a copy of the callee's blocks: the calling block is
//! split at the call, the callee's entry parameters are bound to the call
//! arguments, and every `return` becomes a jump to the continuation block,
//! whose single parameter takes over the call's result value.
//!
//! Callees marked `alwaysinline` are always inlined; others only when their
//! instruction count is at most the policy threshold. Self-recursive callees,
//! `noinline` callees and callers marked `optnone` are skipped.

use rejit_ir::{BlockId, BlockParam, Function, Instr, Module, Terminator, ValueId};
use rustc_hash::FxHashMap;

use crate::{OptError, Pass};

/// Upper bound on call sites inlined into one function per run, so that
/// mutually recursive `alwaysinline` functions cannot grow without limit.
const MAX_INLINES_PER_FUNCTION: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InlinePolicy {
    /// Largest callee (in instructions, terminators included) inlined
    /// without `alwaysinline`. `0` inlines only mandatory callees.
    pub threshold: usize,
}

impl InlinePolicy {
    pub fn mandatory_only() -> Self {
        Self { threshold: 0 }
    }
}

impl Default for InlinePolicy {
    fn default() -> Self {
        Self { threshold: 25 }
    }
}

#[derive(Debug, Default)]
pub struct Inline {
    pub policy: InlinePolicy,
}

impl Inline {
    pub fn new(policy: InlinePolicy) -> Self {
        Self { policy }
    }
}

impl Pass for Inline {
    fn name(&self) -> &'static str {
        if self.policy.threshold == 0 {
            "always-inline"
        } else {
            "inline"
        }
    }

    fn run(&mut self, module: &mut Module) -> Result<bool, OptError> {
        let names: Vec<String> = module.functions.keys().cloned().collect();
        let mut changed = false;
        for name in names {
            let mut inlined = 0;
            while inlined < MAX_INLINES_PER_FUNCTION {
                let Some(site) = next_site(module, &name, self.policy) else {
                    break;
                };
                let Some(callee) = module.function(&site.callee).cloned() else {
                    break;
                };
                let Some(caller) = module.function_mut(&name) else {
                    break;
                };
                inline_call(caller, &callee, site.block, site.index).map_err(|message| {
                    OptError::Pass {
                        pass: "inline",
                        message,
                    }
                })?;
                tracing::trace!(caller = %name, callee = %site.callee, "inlined call");
                inlined += 1;
                changed = true;
            }
            if inlined == MAX_INLINES_PER_FUNCTION {
                tracing::debug!(function = %name, "inline budget exhausted");
            }
        }
        Ok(changed)
    }
}

struct CallSite {
    block: BlockId,
    index: usize,
    callee: String,
}

fn calls_itself(func: &Function) -> bool {
    func.referenced_symbols().contains(func.name.as_str())
}

fn should_inline(caller: &Function, callee: &Function, policy: InlinePolicy) -> bool {
    if callee.name == caller.name || callee.attrs.no_inline || calls_itself(callee) {
        return false;
    }
    callee.attrs.always_inline
        || (policy.threshold > 0 && callee.instr_count() <= policy.threshold)
}

fn next_site(module: &Module, caller: &str, policy: InlinePolicy) -> Option<CallSite> {
    let func = module.function(caller)?;
    if func.attrs.opt_none {
        return None;
    }
    for block in &func.blocks {
        for (index, instr) in block.instrs.iter().enumerate() {
            let Instr::Call { callee, .. } = instr else {
                continue;
            };
            let Some(target) = module.function(callee) else {
                continue;
            };
            if should_inline(func, target, policy) {
                return Some(CallSite {
                    block: block.id,
                    index,
                    callee: callee.clone(),
                });
            }
        }
    }
    None
}

/// Inlines the call at `caller.blocks[block].instrs[index]`.
pub(crate) fn inline_call(
    caller: &mut Function,
    callee: &Function,
    block: BlockId,
    index: usize,
) -> Result<(), String> {
    let caller_name = caller.name.clone();
    let site = caller
        .block_mut(block)
        .ok_or_else(|| format!("no block {block} in @{}", caller_name))?;
    let Some(Instr::Call { result, args, .. }) = site.instrs.get(index).cloned() else {
        return Err(format!("{block} has no call at position {index}"));
    };
    if args.len() != callee.signature.arity() {
        return Err(format!(
            "call passes {} arguments to @{} which takes {}",
            args.len(),
            callee.name,
            callee.signature.arity()
        ));
    }

    let tail = site.instrs.split_off(index + 1);
    site.instrs.pop();
    let tail_terminator = std::mem::replace(&mut site.terminator, Terminator::Unreachable);

    // Continuation block: receives the return value as the call's result.
    let cont = caller.push_block();
    {
        let cont_block = &mut caller.blocks[cont.index()];
        if let (Some(result), Some(ty)) = (result, callee.signature.ret) {
            cont_block.params.push(BlockParam { value: result, ty });
        }
        cont_block.instrs = tail;
        cont_block.terminator = tail_terminator;
    }

    // Callee values get fresh numbers; entry parameters map to the arguments.
    let mut values: FxHashMap<ValueId, ValueId> = FxHashMap::default();
    for (param, arg) in callee.params().into_iter().zip(&args) {
        values.insert(param, *arg);
    }
    let base = caller.blocks.len() as u32;
    let blocks: FxHashMap<BlockId, BlockId> = callee
        .blocks
        .iter()
        .map(|b| (b.id, BlockId(base + b.id.0)))
        .collect();
    for b in &callee.blocks {
        for v in b.defs() {
            if !values.contains_key(&v) || b.id != BlockId(0) {
                let fresh = caller.fresh_value();
                values.insert(v, fresh);
            }
        }
    }
    let map_value = |v: &mut ValueId| {
        if let Some(&mapped) = values.get(v) {
            *v = mapped;
        }
    };

    for b in &callee.blocks {
        let id = caller.push_block();
        debug_assert_eq!(Some(&id), blocks.get(&b.id));
        let mut copy = b.clone();
        copy.id = id;
        if b.id == BlockId(0) {
            copy.params.clear();
        }
        for param in &mut copy.params {
            map_value(&mut param.value);
        }
        for instr in &mut copy.instrs {
            if let Some(result) = instr.result() {
                if let Some(&mapped) = values.get(&result) {
                    instr.set_result(mapped);
                }
            }
            instr.visit_operands_mut(map_value);
        }
        copy.terminator.visit_operands_mut(map_value);
        copy.terminator.visit_targets_mut(|t| {
            if let Some(&mapped) = blocks.get(t) {
                *t = mapped;
            }
        });
        if let Terminator::Return { value } = &copy.terminator {
            let args = match (value, result) {
                (Some(v), Some(_)) => vec![*v],
                _ => Vec::new(),
            };
            copy.terminator = Terminator::Jump { dest: cont, args };
        }
        caller.blocks[id.index()] = copy;
    }

    let entry_copy = blocks[&BlockId(0)];
    caller.blocks[block.index()].terminator = Terminator::Jump {
        dest: entry_copy,
        args: Vec::new(),
    };
    Ok(())
}
