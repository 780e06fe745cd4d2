use rustc_hash::{FxHashMap, FxHashSet};
use serde::{Deserialize, Serialize};

use crate::instr::{Instr, Terminator};
use crate::types::{Signature, Type};
use crate::value::{BlockId, ValueId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Linkage {
    /// Visible to code generation as an entry point; never removed.
    Export,
    /// Only reachable through calls from inside the module.
    Internal,
}

impl Linkage {
    pub fn keyword(self) -> &'static str {
        match self {
            Linkage::Export => "export",
            Linkage::Internal => "internal",
        }
    }
}

/// Optimization hints attached to a function.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct FnAttrs {
    /// Every direct call to this function must be inlined.
    pub always_inline: bool,
    pub no_inline: bool,
    /// Optimization passes leave the body untouched. Captured modules usually
    /// carry this so the body stays in its transformable form.
    pub opt_none: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockParam {
    pub value: ValueId,
    pub ty: Type,
}

/// A basic block: parameters (phi values), straight-line instructions and
/// exactly one terminator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Block {
    pub id: BlockId,
    pub params: Vec<BlockParam>,
    pub instrs: Vec<Instr>,
    pub terminator: Terminator,
}

impl Block {
    pub fn new(id: BlockId) -> Self {
        Self {
            id,
            params: Vec::new(),
            instrs: Vec::new(),
            terminator: Terminator::Unreachable,
        }
    }

    /// Values defined here: parameters first, then instruction results.
    pub fn defs(&self) -> impl Iterator<Item = ValueId> + '_ {
        self.params
            .iter()
            .map(|p| p.value)
            .chain(self.instrs.iter().filter_map(Instr::result))
    }
}

/// A function in block-parameter SSA form.
///
/// `blocks[0]` is the entry block and its parameters are the function
/// parameters. `blocks[n].id == BlockId(n)` holds at all times; passes that
/// drop blocks go through [`Function::retain_blocks`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Function {
    pub name: String,
    pub signature: Signature,
    pub linkage: Linkage,
    pub attrs: FnAttrs,
    pub blocks: Vec<Block>,
    /// Next unused `ValueId` number.
    pub next_value: u32,
}

impl Function {
    pub fn entry(&self) -> &Block {
        &self.blocks[0]
    }

    pub fn block(&self, id: BlockId) -> Option<&Block> {
        self.blocks.get(id.index())
    }

    pub fn block_mut(&mut self, id: BlockId) -> Option<&mut Block> {
        self.blocks.get_mut(id.index())
    }

    /// Function parameters in declaration order.
    pub fn params(&self) -> Vec<ValueId> {
        self.blocks
            .first()
            .map(|entry| entry.params.iter().map(|p| p.value).collect())
            .unwrap_or_default()
    }

    pub fn fresh_value(&mut self) -> ValueId {
        let id = ValueId(self.next_value);
        self.next_value += 1;
        id
    }

    /// Appends an empty block (terminated by `unreachable`) and returns its id.
    pub fn push_block(&mut self) -> BlockId {
        let id = BlockId(self.blocks.len() as u32);
        self.blocks.push(Block::new(id));
        id
    }

    pub fn instr_count(&self) -> usize {
        self.blocks.iter().map(|b| b.instrs.len() + 1).sum()
    }

    /// Type of every value defined in the function.
    pub fn value_types(&self) -> FxHashMap<ValueId, Type> {
        let mut types = FxHashMap::default();
        for block in &self.blocks {
            for param in &block.params {
                types.insert(param.value, param.ty);
            }
            for instr in &block.instrs {
                if let (Some(result), Some(ty)) = (instr.result(), instr.result_type()) {
                    types.insert(result, ty);
                }
            }
        }
        types
    }

    /// Number of uses of each value across instructions and terminators.
    pub fn use_counts(&self) -> FxHashMap<ValueId, usize> {
        let mut counts = FxHashMap::default();
        for block in &self.blocks {
            for instr in &block.instrs {
                instr.visit_operands(|v| *counts.entry(v).or_insert(0) += 1);
            }
            block
                .terminator
                .visit_operands(|v| *counts.entry(v).or_insert(0) += 1);
        }
        counts
    }

    /// Names referenced by direct calls and `funcaddr`.
    pub fn referenced_symbols(&self) -> FxHashSet<&str> {
        let mut out = FxHashSet::default();
        for block in &self.blocks {
            for instr in &block.instrs {
                match instr {
                    Instr::Call { callee, .. } => {
                        out.insert(callee.as_str());
                    }
                    Instr::FuncAddr { name, .. } => {
                        out.insert(name.as_str());
                    }
                    _ => {}
                }
            }
        }
        out
    }

    /// Rewrites every use of a key in `map` to its value, following chains
    /// (`a -> b`, `b -> c` rewrites `a` to `c`).
    pub fn replace_uses(&mut self, map: &FxHashMap<ValueId, ValueId>) {
        if map.is_empty() {
            return;
        }
        let resolve = |mut v: ValueId| {
            let mut hops = 0;
            while let Some(&next) = map.get(&v) {
                if next == v || hops > map.len() {
                    break;
                }
                v = next;
                hops += 1;
            }
            v
        };
        for block in &mut self.blocks {
            for instr in &mut block.instrs {
                instr.visit_operands_mut(|v| *v = resolve(*v));
            }
            block.terminator.visit_operands_mut(|v| *v = resolve(*v));
        }
    }

    /// Predecessor lists, one entry per incoming edge (a block branching to
    /// the same target twice appears twice).
    pub fn predecessors(&self) -> Vec<Vec<BlockId>> {
        let mut preds = vec![Vec::new(); self.blocks.len()];
        for block in &self.blocks {
            for succ in block.terminator.successors() {
                if let Some(list) = preds.get_mut(succ.index()) {
                    list.push(block.id);
                }
            }
        }
        preds
    }

    /// Blocks reachable from the entry in reverse post-order.
    pub fn reverse_post_order(&self) -> Vec<BlockId> {
        let mut visited = vec![false; self.blocks.len()];
        let mut post = Vec::with_capacity(self.blocks.len());
        if self.blocks.is_empty() {
            return post;
        }
        let mut stack: Vec<(BlockId, usize)> = vec![(BlockId(0), 0)];
        visited[0] = true;
        while let Some((block, next)) = stack.last_mut() {
            let succs = self.blocks[block.index()].terminator.successors();
            if let Some(&succ) = succs.get(*next) {
                *next += 1;
                if !visited[succ.index()] {
                    visited[succ.index()] = true;
                    stack.push((succ, 0));
                }
            } else {
                post.push(*block);
                stack.pop();
            }
        }
        post.reverse();
        post
    }

    /// Keeps the blocks for which `keep` is true and renumbers the survivors
    /// densely. The entry block must be kept; terminators pointing at dropped
    /// blocks must already be gone.
    pub fn retain_blocks(&mut self, keep: &[bool]) {
        let mut remap: FxHashMap<BlockId, BlockId> = FxHashMap::default();
        let mut next = 0u32;
        for (index, &kept) in keep.iter().enumerate() {
            if kept {
                remap.insert(BlockId(index as u32), BlockId(next));
                next += 1;
            }
        }
        let old = std::mem::take(&mut self.blocks);
        for (index, mut block) in old.into_iter().enumerate() {
            if !keep.get(index).copied().unwrap_or(false) {
                continue;
            }
            block.id = remap[&block.id];
            block.terminator.visit_targets_mut(|target| {
                if let Some(&mapped) = remap.get(target) {
                    *target = mapped;
                }
            });
            self.blocks.push(block);
        }
    }
}
