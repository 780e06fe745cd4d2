//! Lowering of one IR function into Cranelift IR.
//!
//! IR blocks map one-to-one onto Cranelift blocks and IR block parameters onto
//! Cranelift block parameters, so no variable tracking is needed. Blocks are
//! visited in reverse post-order, which puts every definition before its uses.

use cranelift_codegen::ir::condcodes::{FloatCC, IntCC};
use cranelift_codegen::ir::{self, AbiParam, BlockArg, InstBuilder, MemFlags, TrapCode, Value, types};
use cranelift_frontend::FunctionBuilder;
use cranelift_jit::JITModule;
use cranelift_module::{FuncId, Module as _};
use rejit_ir::{
    BinOp, BlockId, CastOp, CmpOp, Constant, Function, Instr, Signature, Terminator, Type, UnOp,
    ValueId,
};
use rustc_hash::FxHashMap;

pub(crate) fn clif_type(ty: Type) -> types::Type {
    match ty {
        Type::I8 | Type::Bool => types::I8,
        Type::I16 => types::I16,
        Type::I32 => types::I32,
        Type::I64 | Type::Ptr => types::I64,
        Type::F32 => types::F32,
        Type::F64 => types::F64,
    }
}

/// Narrow integers follow the C convention of being extended by the caller.
fn abi_param(ty: Type) -> AbiParam {
    let param = AbiParam::new(clif_type(ty));
    match ty {
        Type::I8 | Type::I16 => param.sext(),
        Type::Bool => param.uext(),
        _ => param,
    }
}

pub(crate) fn clif_signature(module: &JITModule, sig: &Signature) -> ir::Signature {
    let mut clif = module.make_signature();
    clif.params.extend(sig.params.iter().map(|&ty| abi_param(ty)));
    clif.returns.extend(sig.ret.map(abi_param));
    clif
}

/// Accesses through a pointer of known alignment are marked aligned, which
/// lets the backend pick the plain load and store forms.
fn mem_flags(ty: Type, align: u32) -> MemFlags {
    let mut flags = MemFlags::new();
    if align >= ty.bytes() {
        flags.set_aligned();
    }
    flags
}

fn int_cc(op: CmpOp) -> IntCC {
    match op {
        CmpOp::Eq => IntCC::Equal,
        CmpOp::Ne => IntCC::NotEqual,
        CmpOp::Lt => IntCC::SignedLessThan,
        CmpOp::Le => IntCC::SignedLessThanOrEqual,
        CmpOp::Gt => IntCC::SignedGreaterThan,
        CmpOp::Ge => IntCC::SignedGreaterThanOrEqual,
        CmpOp::ULt => IntCC::UnsignedLessThan,
        CmpOp::ULe => IntCC::UnsignedLessThanOrEqual,
        CmpOp::UGt => IntCC::UnsignedGreaterThan,
        CmpOp::UGe => IntCC::UnsignedGreaterThanOrEqual,
    }
}

fn float_cc(op: CmpOp) -> Option<FloatCC> {
    Some(match op {
        CmpOp::Eq => FloatCC::Equal,
        CmpOp::Ne => FloatCC::NotEqual,
        CmpOp::Lt => FloatCC::LessThan,
        CmpOp::Le => FloatCC::LessThanOrEqual,
        CmpOp::Gt => FloatCC::GreaterThan,
        CmpOp::Ge => FloatCC::GreaterThanOrEqual,
        CmpOp::ULt | CmpOp::ULe | CmpOp::UGt | CmpOp::UGe => return None,
    })
}

pub(crate) struct FunctionLowering<'m> {
    module: &'m mut JITModule,
    func_ids: &'m FxHashMap<String, FuncId>,
    func_refs: FxHashMap<String, ir::FuncRef>,
    values: FxHashMap<ValueId, Value>,
    blocks: FxHashMap<BlockId, ir::Block>,
}

impl<'m> FunctionLowering<'m> {
    pub(crate) fn new(module: &'m mut JITModule, func_ids: &'m FxHashMap<String, FuncId>) -> Self {
        Self {
            module,
            func_ids,
            func_refs: FxHashMap::default(),
            values: FxHashMap::default(),
            blocks: FxHashMap::default(),
        }
    }

    /// Emits the body of `func` into `builder`. The caller finalizes.
    pub(crate) fn lower(
        mut self,
        func: &Function,
        builder: &mut FunctionBuilder<'_>,
    ) -> Result<(), String> {
        let order = func.reverse_post_order();
        for &id in &order {
            let block = builder.create_block();
            self.blocks.insert(id, block);
        }

        for &id in &order {
            let ir_block = &func.blocks[id.index()];
            let block = self.block(id)?;
            if id == BlockId(0) {
                builder.append_block_params_for_function_params(block);
            } else {
                for param in &ir_block.params {
                    builder.append_block_param(block, clif_type(param.ty));
                }
            }
            let params = builder.block_params(block).to_vec();
            if params.len() != ir_block.params.len() {
                return Err(format!(
                    "{id} of `{}` has {} parameters, its signature has {}",
                    func.name,
                    ir_block.params.len(),
                    params.len()
                ));
            }
            for (param, value) in ir_block.params.iter().zip(params) {
                self.values.insert(param.value, value);
            }
        }

        for &id in &order {
            let ir_block = &func.blocks[id.index()];
            builder.switch_to_block(self.block(id)?);
            for instr in &ir_block.instrs {
                self.lower_instr(builder, instr)?;
            }
            self.lower_terminator(builder, &ir_block.terminator)?;
        }
        builder.seal_all_blocks();
        Ok(())
    }

    fn block(&self, id: BlockId) -> Result<ir::Block, String> {
        self.blocks
            .get(&id)
            .copied()
            .ok_or_else(|| format!("branch to unreachable block {id}"))
    }

    fn value(&self, id: ValueId) -> Result<Value, String> {
        self.values
            .get(&id)
            .copied()
            .ok_or_else(|| format!("{id} is used before it is defined"))
    }

    fn values_of(&self, ids: &[ValueId]) -> Result<Vec<Value>, String> {
        ids.iter().map(|&id| self.value(id)).collect()
    }

    fn block_args(&self, ids: &[ValueId]) -> Result<Vec<BlockArg>, String> {
        ids.iter()
            .map(|&id| self.value(id).map(BlockArg::Value))
            .collect()
    }

    fn define(&mut self, id: ValueId, value: Value) {
        self.values.insert(id, value);
    }

    fn func_ref(&mut self, builder: &mut FunctionBuilder<'_>, name: &str) -> Result<ir::FuncRef, String> {
        if let Some(&func_ref) = self.func_refs.get(name) {
            return Ok(func_ref);
        }
        let id = *self
            .func_ids
            .get(name)
            .ok_or_else(|| format!("call to undeclared symbol `{name}`"))?;
        let func_ref = self.module.declare_func_in_func(id, builder.func);
        self.func_refs.insert(name.to_owned(), func_ref);
        Ok(func_ref)
    }

    fn lower_instr(&mut self, builder: &mut FunctionBuilder<'_>, instr: &Instr) -> Result<(), String> {
        match instr {
            Instr::Const { result, value } => {
                let v = constant(builder, value);
                self.define(*result, v);
            }
            Instr::Binary {
                result,
                op,
                ty,
                lhs,
                rhs,
            } => {
                let (a, b) = (self.value(*lhs)?, self.value(*rhs)?);
                let v = binary(builder, *op, *ty, a, b)?;
                self.define(*result, v);
            }
            Instr::Unary {
                result,
                op,
                ty,
                operand,
            } => {
                let a = self.value(*operand)?;
                let v = match (op, ty.is_float()) {
                    (UnOp::Neg, true) => builder.ins().fneg(a),
                    (UnOp::Neg, false) => builder.ins().ineg(a),
                    (UnOp::Not, _) if *ty == Type::Bool => builder.ins().bxor_imm(a, 1),
                    (UnOp::Not, false) => builder.ins().bnot(a),
                    (UnOp::Not, true) => return Err(format!("`not` is not defined on {ty}")),
                };
                self.define(*result, v);
            }
            Instr::Cmp {
                result,
                op,
                ty,
                lhs,
                rhs,
            } => {
                let (a, b) = (self.value(*lhs)?, self.value(*rhs)?);
                let v = if ty.is_float() {
                    let cc = float_cc(*op)
                        .ok_or_else(|| format!("`{}` is not defined on {ty}", op.mnemonic()))?;
                    builder.ins().fcmp(cc, a, b)
                } else {
                    builder.ins().icmp(int_cc(*op), a, b)
                };
                self.define(*result, v);
            }
            Instr::Cast {
                result,
                op,
                from,
                to,
                operand,
            } => {
                let a = self.value(*operand)?;
                let v = cast(builder, *op, *from, *to, a);
                self.define(*result, v);
            }
            Instr::Select {
                result,
                cond,
                then_value,
                else_value,
                ..
            } => {
                let c = self.value(*cond)?;
                let (a, b) = (self.value(*then_value)?, self.value(*else_value)?);
                let v = builder.ins().select(c, a, b);
                self.define(*result, v);
            }
            Instr::Load {
                result,
                ty,
                addr,
                offset,
                align,
            } => {
                let p = self.value(*addr)?;
                let v = builder
                    .ins()
                    .load(clif_type(*ty), mem_flags(*ty, *align), p, *offset);
                self.define(*result, v);
            }
            Instr::Store {
                ty,
                value,
                addr,
                offset,
                align,
            } => {
                let (v, p) = (self.value(*value)?, self.value(*addr)?);
                builder.ins().store(mem_flags(*ty, *align), v, p, *offset);
            }
            Instr::PtrAdd {
                result,
                base,
                offset,
            } => {
                let (p, o) = (self.value(*base)?, self.value(*offset)?);
                let v = builder.ins().iadd(p, o);
                self.define(*result, v);
            }
            Instr::FuncAddr { result, name } => {
                let func_ref = self.func_ref(builder, name)?;
                let v = builder.ins().func_addr(types::I64, func_ref);
                self.define(*result, v);
            }
            Instr::Call {
                result,
                callee,
                args,
                ..
            } => {
                let func_ref = self.func_ref(builder, callee)?;
                let args = self.values_of(args)?;
                let call = builder.ins().call(func_ref, &args);
                if let Some(result) = result {
                    let v = single_result(builder, call, callee)?;
                    self.define(*result, v);
                }
            }
            Instr::CallIndirect {
                result,
                signature,
                callee,
                args,
            } => {
                let target = self.value(*callee)?;
                let args = self.values_of(args)?;
                let sig = builder.import_signature(clif_signature(self.module, signature));
                let call = builder.ins().call_indirect(sig, target, &args);
                if let Some(result) = result {
                    let v = single_result(builder, call, "indirect call")?;
                    self.define(*result, v);
                }
            }
        }
        Ok(())
    }

    fn lower_terminator(
        &mut self,
        builder: &mut FunctionBuilder<'_>,
        terminator: &Terminator,
    ) -> Result<(), String> {
        match terminator {
            Terminator::Jump { dest, args } => {
                let block = self.block(*dest)?;
                let args = self.block_args(args)?;
                builder.ins().jump(block, &args);
            }
            Terminator::Branch {
                cond,
                then_dest,
                then_args,
                else_dest,
                else_args,
            } => {
                let c = self.value(*cond)?;
                let (then_block, else_block) = (self.block(*then_dest)?, self.block(*else_dest)?);
                let then_args = self.block_args(then_args)?;
                let else_args = self.block_args(else_args)?;
                builder
                    .ins()
                    .brif(c, then_block, &then_args, else_block, &else_args);
            }
            Terminator::Return { value: Some(value) } => {
                let v = self.value(*value)?;
                builder.ins().return_(&[v]);
            }
            Terminator::Return { value: None } => {
                builder.ins().return_(&[]);
            }
            Terminator::Unreachable => {
                builder.ins().trap(TrapCode::unwrap_user(1));
            }
        }
        Ok(())
    }
}

fn single_result(builder: &FunctionBuilder<'_>, call: ir::Inst, what: &str) -> Result<Value, String> {
    builder
        .inst_results(call)
        .first()
        .copied()
        .ok_or_else(|| format!("{what} returns no value"))
}

fn constant(builder: &mut FunctionBuilder<'_>, value: &Constant) -> Value {
    match *value {
        Constant::Int { ty, value } => {
            // Narrow immediates must be zero-extended.
            builder.ins().iconst(clif_type(ty), ty.unsigned(value) as i64)
        }
        Constant::Float { ty: Type::F32, value } => builder.ins().f32const(value as f32),
        Constant::Float { value, .. } => builder.ins().f64const(value),
        Constant::Bool(b) => builder.ins().iconst(types::I8, i64::from(b)),
    }
}

fn binary(
    builder: &mut FunctionBuilder<'_>,
    op: BinOp,
    ty: Type,
    a: Value,
    b: Value,
) -> Result<Value, String> {
    let ins = builder.ins();
    Ok(if ty.is_float() {
        match op {
            BinOp::Add => ins.fadd(a, b),
            BinOp::Sub => ins.fsub(a, b),
            BinOp::Mul => ins.fmul(a, b),
            BinOp::Div => ins.fdiv(a, b),
            _ => return Err(format!("`{}` is not defined on {ty}", op.mnemonic())),
        }
    } else {
        match op {
            BinOp::Add => ins.iadd(a, b),
            BinOp::Sub => ins.isub(a, b),
            BinOp::Mul => ins.imul(a, b),
            BinOp::Div => ins.sdiv(a, b),
            BinOp::UDiv => ins.udiv(a, b),
            BinOp::Rem => ins.srem(a, b),
            BinOp::URem => ins.urem(a, b),
            BinOp::And => ins.band(a, b),
            BinOp::Or => ins.bor(a, b),
            BinOp::Xor => ins.bxor(a, b),
            BinOp::Shl => ins.ishl(a, b),
            BinOp::Shr => ins.sshr(a, b),
            BinOp::UShr => ins.ushr(a, b),
        }
    })
}

fn cast(builder: &mut FunctionBuilder<'_>, op: CastOp, from: Type, to: Type, v: Value) -> Value {
    let to_ty = clif_type(to);
    match op {
        // Booleans are 0 or 1, so sign extension yields 0 or -1.
        CastOp::SExt if from == Type::Bool => {
            let wide = builder.ins().uextend(to_ty, v);
            builder.ins().ineg(wide)
        }
        CastOp::SExt => builder.ins().sextend(to_ty, v),
        CastOp::ZExt => builder.ins().uextend(to_ty, v),
        CastOp::Trunc => builder.ins().ireduce(to_ty, v),
        CastOp::SIToFP => {
            let v = if from.bits() < 32 {
                builder.ins().sextend(types::I32, v)
            } else {
                v
            };
            builder.ins().fcvt_from_sint(to_ty, v)
        }
        CastOp::UIToFP => {
            let v = if from.bits() < 32 {
                builder.ins().uextend(types::I32, v)
            } else {
                v
            };
            builder.ins().fcvt_from_uint(to_ty, v)
        }
        CastOp::FPToSI if to.bits() >= 32 => builder.ins().fcvt_to_sint_sat(to_ty, v),
        CastOp::FPToSI => {
            // Saturate to the narrow range first; NaN survives the clamp and
            // converts to zero.
            let max = ((1i64 << (to.bits() - 1)) - 1) as f64;
            let min = -(1i64 << (to.bits() - 1)) as f64;
            let (lo, hi) = if from == Type::F32 {
                (
                    builder.ins().f32const(min as f32),
                    builder.ins().f32const(max as f32),
                )
            } else {
                (builder.ins().f64const(min), builder.ins().f64const(max))
            };
            let clamped = builder.ins().fmax(v, lo);
            let clamped = builder.ins().fmin(clamped, hi);
            let wide = builder.ins().fcvt_to_sint_sat(types::I32, clamped);
            builder.ins().ireduce(to_ty, wide)
        }
        CastOp::FPExt => builder.ins().fpromote(types::F64, v),
        CastOp::FPTrunc => builder.ins().fdemote(types::F32, v),
        CastOp::Bitcast if clif_type(from) == to_ty => v,
        CastOp::Bitcast => builder.ins().bitcast(to_ty, MemFlags::new(), v),
    }
}
