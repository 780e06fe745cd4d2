//! Constant folding, algebraic simplification and devirtualization.
//!
//! Operations that would trap at run time (division by zero, signed
//! `MIN / -1`) are left in place so the trap still happens.

use rejit_ir::{
    BinOp, CastOp, CmpOp, Constant, Function, Instr, Module, Signature, Type, UnOp, ValueId,
};
use rustc_hash::FxHashMap;

use crate::{OptError, Pass, for_each_optimizable};

#[derive(Debug, Default)]
pub struct ConstFold;

impl Pass for ConstFold {
    fn name(&self) -> &'static str {
        "const-fold"
    }

    fn run(&mut self, module: &mut Module) -> Result<bool, OptError> {
        let signatures: FxHashMap<String, Signature> = module
            .functions
            .values()
            .map(|f| (f.name.clone(), f.signature.clone()))
            .chain(module.externs.iter().map(|e| (e.name.clone(), e.signature.clone())))
            .collect();
        Ok(for_each_optimizable(module, |func| {
            fold_function(func, &signatures)
        }))
    }
}

enum Rewrite {
    Keep,
    Const(Constant),
    Alias(ValueId),
    Instr(Instr),
}

fn fold_function(func: &mut Function, signatures: &FxHashMap<String, Signature>) -> bool {
    let mut consts: FxHashMap<ValueId, Constant> = FxHashMap::default();
    let mut addrs: FxHashMap<ValueId, String> = FxHashMap::default();
    let mut aliases: FxHashMap<ValueId, ValueId> = FxHashMap::default();
    let mut changed = false;

    // Reverse post-order visits definitions before uses outside of loops.
    for block_id in func.reverse_post_order() {
        let block = &mut func.blocks[block_id.index()];
        let mut kept = Vec::with_capacity(block.instrs.len());
        for mut instr in std::mem::take(&mut block.instrs) {
            instr.visit_operands_mut(|v| *v = resolve(&aliases, *v));
            match &instr {
                Instr::Const { result, value } => {
                    consts.insert(*result, *value);
                }
                Instr::FuncAddr { result, name } => {
                    addrs.insert(*result, name.clone());
                }
                _ => {}
            }
            match rewrite(&instr, &consts, &addrs, signatures) {
                Rewrite::Keep => kept.push(instr),
                Rewrite::Const(value) => {
                    let Some(result) = instr.result() else {
                        kept.push(instr);
                        continue;
                    };
                    consts.insert(result, value);
                    kept.push(Instr::Const { result, value });
                    changed = true;
                }
                Rewrite::Alias(to) => {
                    if let Some(result) = instr.result() {
                        aliases.insert(result, to);
                        if let Some(c) = consts.get(&to).copied() {
                            consts.insert(result, c);
                        }
                        changed = true;
                    } else {
                        kept.push(instr);
                    }
                }
                Rewrite::Instr(new) => {
                    kept.push(new);
                    changed = true;
                }
            }
        }
        block.instrs = kept;
        block
            .terminator
            .visit_operands_mut(|v| *v = resolve(&aliases, *v));
    }
    // Loops can carry uses ahead of the alias definition.
    func.replace_uses(&aliases);
    changed
}

fn resolve(aliases: &FxHashMap<ValueId, ValueId>, mut v: ValueId) -> ValueId {
    while let Some(&next) = aliases.get(&v) {
        if next == v {
            break;
        }
        v = next;
    }
    v
}

fn rewrite(
    instr: &Instr,
    consts: &FxHashMap<ValueId, Constant>,
    addrs: &FxHashMap<ValueId, String>,
    signatures: &FxHashMap<String, Signature>,
) -> Rewrite {
    let c = |v: &ValueId| consts.get(v).copied();
    match instr {
        Instr::Binary {
            op, ty, lhs, rhs, ..
        } => {
            if let (Some(a), Some(b)) = (c(lhs), c(rhs)) {
                return fold_binary(*op, *ty, a, b).map_or(Rewrite::Keep, Rewrite::Const);
            }
            simplify_binary(*op, *ty, *lhs, *rhs, c(lhs), c(rhs))
        }
        Instr::Unary {
            op, ty, operand, ..
        } => c(operand)
            .and_then(|a| fold_unary(*op, *ty, a))
            .map_or(Rewrite::Keep, Rewrite::Const),
        Instr::Cmp {
            op, ty, lhs, rhs, ..
        } => {
            if let (Some(a), Some(b)) = (c(lhs), c(rhs)) {
                return fold_cmp(*op, *ty, a, b).map_or(Rewrite::Keep, Rewrite::Const);
            }
            // Integer comparison of a value with itself.
            if lhs == rhs && !ty.is_float() {
                let same = matches!(
                    op,
                    CmpOp::Eq | CmpOp::Le | CmpOp::Ge | CmpOp::ULe | CmpOp::UGe
                );
                return Rewrite::Const(Constant::Bool(same));
            }
            Rewrite::Keep
        }
        Instr::Cast {
            op,
            from,
            to,
            operand,
            ..
        } => c(operand)
            .and_then(|a| fold_cast(*op, *from, *to, a))
            .map_or(Rewrite::Keep, Rewrite::Const),
        Instr::Select {
            cond,
            then_value,
            else_value,
            ..
        } => {
            if then_value == else_value {
                return Rewrite::Alias(*then_value);
            }
            match c(cond).and_then(|k| k.as_bool()) {
                Some(true) => Rewrite::Alias(*then_value),
                Some(false) => Rewrite::Alias(*else_value),
                None => Rewrite::Keep,
            }
        }
        Instr::PtrAdd { base, offset, .. } => match (c(base), c(offset)) {
            (_, Some(Constant::Int { value: 0, .. })) => Rewrite::Alias(*base),
            (Some(Constant::Int { value: b, .. }), Some(Constant::Int { value: o, .. })) => {
                Rewrite::Const(Constant::int(Type::Ptr, b.wrapping_add(o)))
            }
            _ => Rewrite::Keep,
        },
        Instr::CallIndirect {
            result,
            signature,
            callee,
            args,
        } => match addrs.get(callee) {
            // The target must agree with the call's signature.
            Some(name) if signatures.get(name) == Some(signature) => Rewrite::Instr(Instr::Call {
                result: *result,
                ret: signature.ret,
                callee: name.clone(),
                args: args.clone(),
            }),
            _ => Rewrite::Keep,
        },
        _ => Rewrite::Keep,
    }
}

fn is_int_const(c: Option<Constant>, want: i64) -> bool {
    matches!(c, Some(Constant::Int { value, .. }) if value == want)
}

fn simplify_binary(
    op: BinOp,
    ty: Type,
    lhs: ValueId,
    rhs: ValueId,
    a: Option<Constant>,
    b: Option<Constant>,
) -> Rewrite {
    if !ty.is_int() {
        if ty == Type::Bool && lhs == rhs && matches!(op, BinOp::And | BinOp::Or) {
            return Rewrite::Alias(lhs);
        }
        return Rewrite::Keep;
    }
    match op {
        BinOp::Add | BinOp::Or | BinOp::Xor if is_int_const(b, 0) => Rewrite::Alias(lhs),
        BinOp::Add | BinOp::Or | BinOp::Xor if is_int_const(a, 0) => Rewrite::Alias(rhs),
        BinOp::Sub | BinOp::Shl | BinOp::Shr | BinOp::UShr if is_int_const(b, 0) => {
            Rewrite::Alias(lhs)
        }
        BinOp::Mul | BinOp::Div | BinOp::UDiv if is_int_const(b, 1) => Rewrite::Alias(lhs),
        BinOp::Mul if is_int_const(a, 1) => Rewrite::Alias(rhs),
        BinOp::Mul | BinOp::And if is_int_const(a, 0) || is_int_const(b, 0) => {
            Rewrite::Const(Constant::int(ty, 0))
        }
        BinOp::And if is_int_const(b, -1) => Rewrite::Alias(lhs),
        BinOp::And if is_int_const(a, -1) => Rewrite::Alias(rhs),
        BinOp::And | BinOp::Or if lhs == rhs => Rewrite::Alias(lhs),
        BinOp::Sub | BinOp::Xor if lhs == rhs => Rewrite::Const(Constant::int(ty, 0)),
        _ => Rewrite::Keep,
    }
}

fn signed_min(ty: Type) -> i64 {
    match ty.bits() {
        64 => i64::MIN,
        bits => -(1i64 << (bits - 1)),
    }
}

/// Evaluates a binary operation on constants. `None` when the operation
/// would trap or the operands do not match `ty`.
pub fn fold_binary(op: BinOp, ty: Type, a: Constant, b: Constant) -> Option<Constant> {
    if ty.is_float() {
        let (x, y) = (a.as_float()?, b.as_float()?);
        let value = if ty == Type::F32 {
            let (x, y) = (x as f32, y as f32);
            f64::from(match op {
                BinOp::Add => x + y,
                BinOp::Sub => x - y,
                BinOp::Mul => x * y,
                BinOp::Div => x / y,
                _ => return None,
            })
        } else {
            match op {
                BinOp::Add => x + y,
                BinOp::Sub => x - y,
                BinOp::Mul => x * y,
                BinOp::Div => x / y,
                _ => return None,
            }
        };
        return Some(Constant::float(ty, value));
    }
    if ty == Type::Bool {
        let (x, y) = (a.as_bool()?, b.as_bool()?);
        return Some(Constant::Bool(match op {
            BinOp::And => x && y,
            BinOp::Or => x || y,
            BinOp::Xor => x ^ y,
            _ => return None,
        }));
    }
    let (x, y) = (a.as_int()?, b.as_int()?);
    let (ux, uy) = (ty.unsigned(x), ty.unsigned(y));
    let shift = (uy & u64::from(ty.bits() - 1)) as u32;
    let value = match op {
        BinOp::Add => x.wrapping_add(y),
        BinOp::Sub => x.wrapping_sub(y),
        BinOp::Mul => x.wrapping_mul(y),
        BinOp::Div | BinOp::Rem => {
            if y == 0 || (x == signed_min(ty) && y == -1) {
                return None;
            }
            if op == BinOp::Div { x / y } else { x % y }
        }
        BinOp::UDiv | BinOp::URem => {
            if uy == 0 {
                return None;
            }
            (if op == BinOp::UDiv { ux / uy } else { ux % uy }) as i64
        }
        BinOp::And => x & y,
        BinOp::Or => x | y,
        BinOp::Xor => x ^ y,
        BinOp::Shl => x.wrapping_shl(shift),
        BinOp::Shr => x >> shift,
        BinOp::UShr => (ux >> shift) as i64,
    };
    Some(Constant::int(ty, value))
}

pub fn fold_unary(op: UnOp, ty: Type, a: Constant) -> Option<Constant> {
    match (op, a) {
        (UnOp::Neg, Constant::Int { value, .. }) => Some(Constant::int(ty, value.wrapping_neg())),
        (UnOp::Neg, Constant::Float { value, .. }) => Some(Constant::float(ty, -value)),
        (UnOp::Not, Constant::Int { value, .. }) => Some(Constant::int(ty, !value)),
        (UnOp::Not, Constant::Bool(b)) => Some(Constant::Bool(!b)),
        _ => None,
    }
}

pub fn fold_cmp(op: CmpOp, ty: Type, a: Constant, b: Constant) -> Option<Constant> {
    let result = if ty.is_float() {
        let (x, y) = (a.as_float()?, b.as_float()?);
        match op {
            CmpOp::Eq => x == y,
            CmpOp::Ne => x != y,
            CmpOp::Lt => x < y,
            CmpOp::Le => x <= y,
            CmpOp::Gt => x > y,
            CmpOp::Ge => x >= y,
            _ => return None,
        }
    } else if op.is_unsigned() {
        let (x, y) = (ty.unsigned(a.as_int()?), ty.unsigned(b.as_int()?));
        match op {
            CmpOp::ULt => x < y,
            CmpOp::ULe => x <= y,
            CmpOp::UGt => x > y,
            _ => x >= y,
        }
    } else {
        let (x, y) = (a.as_int()?, b.as_int()?);
        match op {
            CmpOp::Eq => x == y,
            CmpOp::Ne => x != y,
            CmpOp::Lt => x < y,
            CmpOp::Le => x <= y,
            CmpOp::Gt => x > y,
            CmpOp::Ge => x >= y,
            _ => return None,
        }
    };
    Some(Constant::Bool(result))
}

/// Evaluates a cast. Booleans sign-extend to `0` / `-1`; float to integer
/// conversion saturates and maps NaN to zero.
pub fn fold_cast(op: CastOp, from: Type, to: Type, a: Constant) -> Option<Constant> {
    if !op.is_valid(from, to) {
        return None;
    }
    Some(match op {
        CastOp::SExt => {
            let v = a.as_int()?;
            Constant::int(to, if from == Type::Bool { -v } else { v })
        }
        CastOp::ZExt => Constant::int(to, from.unsigned(a.as_int()?) as i64),
        CastOp::Trunc => Constant::int(to, a.as_int()?),
        CastOp::SIToFP => {
            let v = a.as_int()?;
            if to == Type::F32 {
                Constant::float(to, f64::from(v as f32))
            } else {
                Constant::float(to, v as f64)
            }
        }
        CastOp::UIToFP => {
            let v = from.unsigned(a.as_int()?);
            if to == Type::F32 {
                Constant::float(to, f64::from(v as f32))
            } else {
                Constant::float(to, v as f64)
            }
        }
        CastOp::FPToSI => {
            let v = a.as_float()?;
            let value = match to {
                Type::I8 => i64::from(v as i8),
                Type::I16 => i64::from(v as i16),
                Type::I32 => i64::from(v as i32),
                _ => v as i64,
            };
            Constant::int(to, value)
        }
        CastOp::FPExt | CastOp::FPTrunc => Constant::float(to, a.as_float()?),
        CastOp::Bitcast => Constant::from_bits(to, a.to_bits()),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use rejit_ir::FunctionBuilder;

    fn i(ty: Type, v: i64) -> Constant {
        Constant::int(ty, v)
    }

    #[test]
    fn wraps_to_type_width() {
        assert_eq!(
            fold_binary(BinOp::Add, Type::I8, i(Type::I8, 127), i(Type::I8, 1)),
            Some(i(Type::I8, -128))
        );
        assert_eq!(
            fold_binary(BinOp::UShr, Type::I32, i(Type::I32, -1), i(Type::I32, 28)),
            Some(i(Type::I32, 15))
        );
    }

    #[test]
    fn leaves_trapping_division_alone() {
        assert_eq!(fold_binary(BinOp::Div, Type::I64, i(Type::I64, 1), i(Type::I64, 0)), None);
        assert_eq!(
            fold_binary(BinOp::Div, Type::I32, i(Type::I32, i64::from(i32::MIN)), i(Type::I32, -1)),
            None
        );
        assert_eq!(fold_binary(BinOp::URem, Type::I8, i(Type::I8, 5), i(Type::I8, 0)), None);
    }

    #[test]
    fn shift_amount_is_masked() {
        assert_eq!(
            fold_binary(BinOp::Shl, Type::I32, i(Type::I32, 1), i(Type::I32, 33)),
            Some(i(Type::I32, 2))
        );
    }

    #[test]
    fn unsigned_compare_uses_width() {
        assert_eq!(
            fold_cmp(CmpOp::UGt, Type::I8, i(Type::I8, -1), i(Type::I8, 1)),
            Some(Constant::Bool(true))
        );
        assert_eq!(
            fold_cmp(CmpOp::Gt, Type::I8, i(Type::I8, -1), i(Type::I8, 1)),
            Some(Constant::Bool(false))
        );
    }

    #[test]
    fn casts_follow_machine_semantics() {
        assert_eq!(
            fold_cast(CastOp::FPToSI, Type::F64, Type::I32, Constant::float(Type::F64, 1e20)),
            Some(i(Type::I32, i64::from(i32::MAX)))
        );
        assert_eq!(
            fold_cast(CastOp::FPToSI, Type::F64, Type::I64, Constant::float(Type::F64, f64::NAN)),
            Some(i(Type::I64, 0))
        );
        assert_eq!(
            fold_cast(CastOp::ZExt, Type::I8, Type::I32, i(Type::I8, -1)),
            Some(i(Type::I32, 255))
        );
        assert_eq!(
            fold_cast(CastOp::SExt, Type::Bool, Type::I32, Constant::Bool(true)),
            Some(i(Type::I32, -1))
        );
    }

    #[test]
    fn folds_chain_and_devirtualizes() {
        let mut m = Module::new("m");
        let mut g = FunctionBuilder::new("g", Signature::new(vec![Type::I64], Some(Type::I64)));
        let p = g.param(0);
        g.ret(Some(p));
        m.add_function(g.finish().expect("g")).expect("add g");

        let sig = Signature::new(vec![Type::I64], Some(Type::I64));
        let mut b = FunctionBuilder::new("f", Signature::new(vec![], Some(Type::I64)));
        let two = b.iconst(Type::I64, 2);
        let three = b.iconst(Type::I64, 3);
        let six = b.binary(BinOp::Mul, Type::I64, two, three);
        let target = b.func_addr("g");
        let r = b.call_indirect(sig, target, &[six]).expect("result");
        b.ret(Some(r));
        m.add_function(b.finish().expect("f")).expect("add f");

        assert!(ConstFold.run(&mut m).expect("run"));
        let f = m.function("f").expect("f");
        assert!(f.blocks[0].instrs.iter().any(|i| matches!(
            i,
            Instr::Call { callee, .. } if callee == "g"
        )));
        assert!(f.blocks[0].instrs.iter().any(|i| matches!(
            i,
            Instr::Const { value: Constant::Int { value: 6, .. }, .. }
        )));
    }

    #[test]
    fn identities_become_aliases() {
        let mut m = Module::new("m");
        let mut b = FunctionBuilder::new("f", Signature::new(vec![Type::I64], Some(Type::I64)));
        let x = b.param(0);
        let zero = b.iconst(Type::I64, 0);
        let y = b.binary(BinOp::Add, Type::I64, x, zero);
        b.ret(Some(y));
        m.add_function(b.finish().expect("f")).expect("add");
        ConstFold.run(&mut m).expect("run");
        let f = m.function("f").expect("f");
        assert_eq!(
            f.blocks[0].terminator,
            rejit_ir::Terminator::Return { value: Some(x) }
        );
    }
}
