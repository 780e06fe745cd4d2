//! Structural and type checks over a [`Module`].
//!
//! Checks that every used value is defined exactly once and that its
//! definition dominates the use, that operand types agree with instruction
//! types, and that edges and calls agree with the signatures they target.
//! Uses inside blocks unreachable from the entry are not checked for
//! dominance; code generation never sees those blocks.

use rustc_hash::FxHashMap;

use crate::error::IrError;
use crate::function::Function;
use crate::instr::{Constant, Instr, Terminator, UnOp};
use crate::module::Module;
use crate::types::Type;
use crate::value::{BlockId, ValueId};

pub fn verify_module(module: &Module) -> Result<(), IrError> {
    for func in module.functions.values() {
        verify_function(module, func)?;
    }
    Ok(())
}

pub fn verify_function(module: &Module, func: &Function) -> Result<(), IrError> {
    Verifier::new(module, func)?.run()
}

struct Verifier<'a> {
    module: &'a Module,
    func: &'a Function,
    types: FxHashMap<ValueId, Type>,
}

impl<'a> Verifier<'a> {
    fn new(module: &'a Module, func: &'a Function) -> Result<Self, IrError> {
        let name = func.name.as_str();
        if func.blocks.is_empty() {
            return Err(IrError::verify(name, "function has no blocks"));
        }
        let mut types = FxHashMap::default();
        for (index, block) in func.blocks.iter().enumerate() {
            if block.id != BlockId(index as u32) {
                return Err(IrError::verify(
                    name,
                    format!("block at position {index} is numbered {}", block.id),
                ));
            }
            for param in &block.params {
                if types.insert(param.value, param.ty).is_some() {
                    return Err(IrError::verify(
                        name,
                        format!("{} is defined more than once", param.value),
                    ));
                }
            }
            for instr in &block.instrs {
                if let Some(result) = instr.result() {
                    let Some(ty) = instr.result_type() else {
                        return Err(IrError::verify(
                            name,
                            format!("call defining {result} returns nothing"),
                        ));
                    };
                    if types.insert(result, ty).is_some() {
                        return Err(IrError::verify(
                            name,
                            format!("{result} is defined more than once"),
                        ));
                    }
                }
            }
        }
        if let Some(max) = types.keys().map(|v| v.0).max() {
            if max >= func.next_value {
                return Err(IrError::verify(
                    name,
                    format!("%{max} is not below the value counter {}", func.next_value),
                ));
            }
        }
        let entry_types: Vec<Type> = func.entry().params.iter().map(|p| p.ty).collect();
        if entry_types != func.signature.params {
            return Err(IrError::verify(
                name,
                format!(
                    "entry block parameters do not match signature {}",
                    func.signature
                ),
            ));
        }
        Ok(Self {
            module,
            func,
            types,
        })
    }

    fn fail(&self, block: BlockId, message: impl std::fmt::Display) -> IrError {
        IrError::verify(&self.func.name, format!("{block}: {message}"))
    }

    fn type_of(&self, block: BlockId, value: ValueId) -> Result<Type, IrError> {
        self.types
            .get(&value)
            .copied()
            .ok_or_else(|| self.fail(block, format!("use of undefined value {value}")))
    }

    fn expect(&self, block: BlockId, value: ValueId, ty: Type) -> Result<(), IrError> {
        let found = self.type_of(block, value)?;
        if found != ty {
            return Err(self.fail(block, format!("{value} has type {found}, expected {ty}")));
        }
        Ok(())
    }

    fn run(&self) -> Result<(), IrError> {
        for block in &self.func.blocks {
            for instr in &block.instrs {
                self.check_instr(block.id, instr)?;
            }
            self.check_terminator(block.id, &block.terminator)?;
        }
        self.check_dominance()
    }

    /// Immediate dominators over reverse post-order positions, computed with
    /// the Cooper-Harvey-Kennedy iteration. `None` marks blocks the entry
    /// cannot reach.
    fn dominators(&self, rpo: &[BlockId], position: &[Option<usize>]) -> Vec<Option<usize>> {
        let preds = self.func.predecessors();
        let mut idom: Vec<Option<usize>> = vec![None; rpo.len()];
        if rpo.is_empty() {
            return idom;
        }
        idom[0] = Some(0);
        let intersect = |idom: &[Option<usize>], mut a: usize, mut b: usize| {
            while a != b {
                while a > b {
                    a = idom[a].unwrap_or(0);
                }
                while b > a {
                    b = idom[b].unwrap_or(0);
                }
            }
            a
        };
        let mut changed = true;
        while changed {
            changed = false;
            for (index, block) in rpo.iter().enumerate().skip(1) {
                let mut new_idom = None;
                for pred in &preds[block.index()] {
                    let Some(p) = position[pred.index()] else {
                        continue;
                    };
                    if idom[p].is_none() {
                        continue;
                    }
                    new_idom = Some(match new_idom {
                        None => p,
                        Some(current) => intersect(&idom, current, p),
                    });
                }
                if idom[index] != new_idom {
                    idom[index] = new_idom;
                    changed = true;
                }
            }
        }
        idom
    }

    fn check_dominance(&self) -> Result<(), IrError> {
        let rpo = self.func.reverse_post_order();
        let mut position = vec![None; self.func.blocks.len()];
        for (index, block) in rpo.iter().enumerate() {
            position[block.index()] = Some(index);
        }
        let idom = self.dominators(&rpo, &position);
        let dominates = |def: usize, mut block: usize| -> bool {
            loop {
                if block == def {
                    return true;
                }
                if block == 0 {
                    return false;
                }
                block = idom[block].unwrap_or(0);
            }
        };

        // Definition site of every value: block and slot, where slot 0 holds
        // the block parameters and slot `i + 1` the `i`th instruction.
        let mut defs: FxHashMap<ValueId, (BlockId, usize)> = FxHashMap::default();
        for block in &self.func.blocks {
            for param in &block.params {
                defs.insert(param.value, (block.id, 0));
            }
            for (index, instr) in block.instrs.iter().enumerate() {
                if let Some(result) = instr.result() {
                    defs.insert(result, (block.id, index + 1));
                }
            }
        }

        for &block_id in &rpo {
            let Some(block) = self.func.block(block_id) else {
                continue;
            };
            let use_pos = position[block_id.index()].unwrap_or(0);
            let mut failure = None;
            let mut check = |value: ValueId, slot: usize| {
                if failure.is_some() {
                    return;
                }
                let Some(&(def_block, def_slot)) = defs.get(&value) else {
                    return;
                };
                let ok = if def_block == block_id {
                    def_slot < slot
                } else {
                    position[def_block.index()].is_some_and(|def_pos| dominates(def_pos, use_pos))
                };
                if !ok {
                    failure = Some(value);
                }
            };
            for (index, instr) in block.instrs.iter().enumerate() {
                instr.visit_operands(|v| check(v, index + 1));
            }
            block
                .terminator
                .visit_operands(|v| check(v, block.instrs.len() + 1));
            if let Some(value) = failure {
                return Err(self.fail(
                    block_id,
                    format!("use of {value} is not dominated by its definition"),
                ));
            }
        }
        Ok(())
    }

    fn check_args(
        &self,
        block: BlockId,
        what: &str,
        args: &[ValueId],
        params: &[Type],
    ) -> Result<(), IrError> {
        if args.len() != params.len() {
            return Err(self.fail(
                block,
                format!("{what} takes {} arguments, got {}", params.len(), args.len()),
            ));
        }
        for (arg, ty) in args.iter().zip(params) {
            self.expect(block, *arg, *ty)?;
        }
        Ok(())
    }

    fn check_instr(&self, block: BlockId, instr: &Instr) -> Result<(), IrError> {
        match instr {
            Instr::Const { value, .. } => match value {
                Constant::Int { ty, .. } if !(ty.is_int() || *ty == Type::Ptr) => {
                    Err(self.fail(block, format!("integer constant of type {ty}")))
                }
                Constant::Float { ty, .. } if !ty.is_float() => {
                    Err(self.fail(block, format!("float constant of type {ty}")))
                }
                _ => Ok(()),
            },
            Instr::Binary {
                op, ty, lhs, rhs, ..
            } => {
                let allowed = ty.is_int()
                    || (ty.is_float() && op.accepts_float())
                    || (*ty == Type::Bool && op.accepts_bool());
                if !allowed {
                    return Err(self.fail(block, format!("`{}` is not defined on {ty}", op.mnemonic())));
                }
                self.expect(block, *lhs, *ty)?;
                self.expect(block, *rhs, *ty)
            }
            Instr::Unary {
                op, ty, operand, ..
            } => {
                let allowed = match op {
                    UnOp::Neg => ty.is_int() || ty.is_float(),
                    UnOp::Not => ty.is_int() || *ty == Type::Bool,
                };
                if !allowed {
                    return Err(self.fail(block, format!("`{}` is not defined on {ty}", op.mnemonic())));
                }
                self.expect(block, *operand, *ty)
            }
            Instr::Cmp {
                op, ty, lhs, rhs, ..
            } => {
                let allowed = if op.is_unsigned() {
                    ty.is_int() || *ty == Type::Ptr
                } else if op.is_equality() {
                    true
                } else {
                    *ty != Type::Bool
                };
                if !allowed {
                    return Err(self.fail(block, format!("`cmp {}` is not defined on {ty}", op.mnemonic())));
                }
                self.expect(block, *lhs, *ty)?;
                self.expect(block, *rhs, *ty)
            }
            Instr::Cast {
                op,
                from,
                to,
                operand,
                ..
            } => {
                if !op.is_valid(*from, *to) {
                    return Err(self.fail(
                        block,
                        format!("invalid cast `{}` from {from} to {to}", op.mnemonic()),
                    ));
                }
                self.expect(block, *operand, *from)
            }
            Instr::Select {
                ty,
                cond,
                then_value,
                else_value,
                ..
            } => {
                self.expect(block, *cond, Type::Bool)?;
                self.expect(block, *then_value, *ty)?;
                self.expect(block, *else_value, *ty)
            }
            Instr::Load { addr, align, .. } => {
                self.check_align(block, *align)?;
                self.expect(block, *addr, Type::Ptr)
            }
            Instr::Store {
                ty,
                value,
                addr,
                align,
                ..
            } => {
                self.check_align(block, *align)?;
                self.expect(block, *value, *ty)?;
                self.expect(block, *addr, Type::Ptr)
            }
            Instr::PtrAdd { base, offset, .. } => {
                self.expect(block, *base, Type::Ptr)?;
                self.expect(block, *offset, Type::I64)
            }
            Instr::FuncAddr { name, .. } => {
                if !self.module.contains_symbol(name) {
                    return Err(self.fail(block, format!("`funcaddr` of unknown symbol @{name}")));
                }
                Ok(())
            }
            Instr::Call {
                ret, callee, args, ..
            } => {
                let Some(signature) = self.module.signature_of(callee) else {
                    return Err(self.fail(block, format!("call to unknown symbol @{callee}")));
                };
                if signature.ret != *ret {
                    return Err(self.fail(
                        block,
                        format!("call to @{callee} expects {signature}"),
                    ));
                }
                self.check_args(block, &format!("@{callee}"), args, &signature.params)
            }
            Instr::CallIndirect {
                signature,
                callee,
                args,
                ..
            } => {
                self.expect(block, *callee, Type::Ptr)?;
                self.check_args(block, "indirect call", args, &signature.params)
            }
        }
    }

    fn check_align(&self, block: BlockId, align: u32) -> Result<(), IrError> {
        if align == 0 || !align.is_power_of_two() {
            return Err(self.fail(block, format!("alignment {align} is not a power of two")));
        }
        Ok(())
    }

    fn check_edge(&self, block: BlockId, dest: BlockId, args: &[ValueId]) -> Result<(), IrError> {
        let Some(target) = self.func.block(dest) else {
            return Err(self.fail(block, format!("branch to missing block {dest}")));
        };
        if dest == BlockId(0) {
            return Err(self.fail(block, "branch to the entry block"));
        }
        let params: Vec<Type> = target.params.iter().map(|p| p.ty).collect();
        self.check_args(block, &dest.to_string(), args, &params)
    }

    fn check_terminator(&self, block: BlockId, terminator: &Terminator) -> Result<(), IrError> {
        match terminator {
            Terminator::Jump { dest, args } => self.check_edge(block, *dest, args),
            Terminator::Branch {
                cond,
                then_dest,
                then_args,
                else_dest,
                else_args,
            } => {
                self.expect(block, *cond, Type::Bool)?;
                self.check_edge(block, *then_dest, then_args)?;
                self.check_edge(block, *else_dest, else_args)
            }
            Terminator::Return { value } => match (value, self.func.signature.ret) {
                (None, None) => Ok(()),
                (Some(value), Some(ty)) => self.expect(block, *value, ty),
                _ => Err(self.fail(
                    block,
                    format!("return does not match signature {}", self.func.signature),
                )),
            },
            Terminator::Unreachable => Ok(()),
        }
    }
}
