//! Control-flow cleanup: constant branches become jumps, unreachable blocks
//! are dropped, straight-line chains are merged and block parameters that
//! always receive the same value are replaced by that value.

use rejit_ir::{BlockId, Constant, Function, Instr, Module, Terminator, ValueId};
use rustc_hash::FxHashMap;

use crate::{OptError, Pass, for_each_optimizable};

#[derive(Debug, Default)]
pub struct SimplifyCfg;

impl Pass for SimplifyCfg {
    fn name(&self) -> &'static str {
        "simplify-cfg"
    }

    fn run(&mut self, module: &mut Module) -> Result<bool, OptError> {
        Ok(for_each_optimizable(module, simplify))
    }
}

fn simplify(func: &mut Function) -> bool {
    let mut changed = false;
    loop {
        let round = fold_branches(func)
            | forward_trivial_params(func)
            | merge_chains(func)
            | remove_unreachable(func);
        if !round {
            return changed;
        }
        changed = true;
    }
}

fn fold_branches(func: &mut Function) -> bool {
    let bools: FxHashMap<ValueId, bool> = func
        .blocks
        .iter()
        .flat_map(|b| &b.instrs)
        .filter_map(|i| match i {
            Instr::Const {
                result,
                value: Constant::Bool(b),
            } => Some((*result, *b)),
            _ => None,
        })
        .collect();
    let mut changed = false;
    for block in &mut func.blocks {
        let Terminator::Branch {
            cond,
            then_dest,
            then_args,
            else_dest,
            else_args,
        } = &block.terminator
        else {
            continue;
        };
        let taken = match bools.get(cond) {
            Some(true) => Some((*then_dest, then_args.clone())),
            Some(false) => Some((*else_dest, else_args.clone())),
            None if then_dest == else_dest && then_args == else_args => {
                Some((*then_dest, then_args.clone()))
            }
            None => None,
        };
        if let Some((dest, args)) = taken {
            block.terminator = Terminator::Jump { dest, args };
            changed = true;
        }
    }
    changed
}

/// Incoming argument lists of every edge into `target`.
fn incoming(func: &Function, target: BlockId) -> Vec<Vec<ValueId>> {
    func.blocks
        .iter()
        .flat_map(|b| b.terminator.edges())
        .filter(|(dest, _)| *dest == target)
        .map(|(_, args)| args.to_vec())
        .collect()
}

fn forward_trivial_params(func: &mut Function) -> bool {
    let mut changed = false;
    for index in 1..func.blocks.len() {
        let target = BlockId(index as u32);
        let edges = incoming(func, target);
        if edges.is_empty() {
            continue;
        }
        let mut replace = FxHashMap::default();
        let mut remove = vec![false; func.blocks[index].params.len()];
        for (i, param) in func.blocks[index].params.iter().enumerate() {
            let mut unique = None;
            let mut trivial = true;
            for args in &edges {
                let Some(&arg) = args.get(i) else {
                    trivial = false;
                    break;
                };
                if arg == param.value {
                    continue;
                }
                match unique {
                    None => unique = Some(arg),
                    Some(v) if v == arg => {}
                    Some(_) => {
                        trivial = false;
                        break;
                    }
                }
            }
            if let (true, Some(v)) = (trivial, unique) {
                replace.insert(param.value, v);
                remove[i] = true;
            }
        }
        if replace.is_empty() {
            continue;
        }
        let mut keep = remove.iter().map(|r| !r);
        func.blocks[index]
            .params
            .retain(|_| keep.next().unwrap_or(true));
        for block in &mut func.blocks {
            for (dest, args) in block.terminator.edges_mut() {
                if dest == target {
                    let mut keep = remove.iter().map(|r| !r);
                    args.retain(|_| keep.next().unwrap_or(true));
                }
            }
        }
        func.replace_uses(&replace);
        changed = true;
    }
    changed
}

fn merge_chains(func: &mut Function) -> bool {
    let mut changed = false;
    let mut index = 0;
    while index < func.blocks.len() {
        let Terminator::Jump { dest, args } = &func.blocks[index].terminator else {
            index += 1;
            continue;
        };
        let (dest, args) = (*dest, args.clone());
        let preds = func.predecessors();
        let mergeable = dest.index() != index
            && dest != BlockId(0)
            && preds[dest.index()].len() == 1;
        if !mergeable {
            index += 1;
            continue;
        }
        let succ = &mut func.blocks[dest.index()];
        let params = std::mem::take(&mut succ.params);
        let instrs = std::mem::take(&mut succ.instrs);
        let terminator = std::mem::replace(&mut succ.terminator, Terminator::Unreachable);
        let replace: FxHashMap<ValueId, ValueId> = params
            .iter()
            .map(|p| p.value)
            .zip(args)
            .collect();
        let block = &mut func.blocks[index];
        block.instrs.extend(instrs);
        block.terminator = terminator;
        func.replace_uses(&replace);
        changed = true;
        // Re-examine the same block: it may now jump into another chain.
    }
    changed
}

fn remove_unreachable(func: &mut Function) -> bool {
    let mut keep = vec![false; func.blocks.len()];
    for id in func.reverse_post_order() {
        keep[id.index()] = true;
    }
    if keep.iter().all(|k| *k) {
        return false;
    }
    func.retain_blocks(&keep);
    true
}
