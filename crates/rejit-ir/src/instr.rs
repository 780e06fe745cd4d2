use serde::{Deserialize, Serialize};

use crate::types::{Signature, Type};
use crate::value::{BlockId, ValueId};

/// A compile-time constant.
///
/// Integer payloads are kept normalized (see [`Type::normalize`]); pointer
/// constants are `Int` values of type `ptr`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum Constant {
    Int { ty: Type, value: i64 },
    Float { ty: Type, value: f64 },
    Bool(bool),
}

impl Constant {
    pub fn int(ty: Type, value: i64) -> Self {
        Constant::Int {
            ty,
            value: ty.normalize(value),
        }
    }

    pub fn float(ty: Type, value: f64) -> Self {
        let value = if ty == Type::F32 {
            f64::from(value as f32)
        } else {
            value
        };
        Constant::Float { ty, value }
    }

    pub fn ty(&self) -> Type {
        match self {
            Constant::Int { ty, .. } | Constant::Float { ty, .. } => *ty,
            Constant::Bool(_) => Type::Bool,
        }
    }

    /// The integer payload; booleans read as `0`/`1`.
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Constant::Int { value, .. } => Some(*value),
            Constant::Bool(b) => Some(i64::from(*b)),
            Constant::Float { .. } => None,
        }
    }

    pub fn as_float(&self) -> Option<f64> {
        match self {
            Constant::Float { value, .. } => Some(*value),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Constant::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Raw bit pattern, zero-extended from the type's width.
    pub fn to_bits(&self) -> u64 {
        match self {
            Constant::Int { ty, value } => ty.unsigned(*value),
            Constant::Float { ty: Type::F32, value } => u64::from((*value as f32).to_bits()),
            Constant::Float { value, .. } => value.to_bits(),
            Constant::Bool(b) => u64::from(*b),
        }
    }

    /// Reinterprets `bits` (zero-extended) as a constant of type `ty`.
    pub fn from_bits(ty: Type, bits: u64) -> Self {
        match ty {
            Type::F32 => Constant::Float {
                ty,
                value: f64::from(f32::from_bits(bits as u32)),
            },
            Type::F64 => Constant::Float {
                ty,
                value: f64::from_bits(bits),
            },
            Type::Bool => Constant::Bool(bits & 1 != 0),
            _ => Constant::int(ty, bits as i64),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    /// Signed integer or floating-point division.
    Div,
    UDiv,
    /// Signed integer remainder.
    Rem,
    URem,
    And,
    Or,
    Xor,
    Shl,
    /// Arithmetic shift right.
    Shr,
    /// Logical shift right.
    UShr,
}

impl BinOp {
    pub const ALL: [BinOp; 13] = [
        BinOp::Add,
        BinOp::Sub,
        BinOp::Mul,
        BinOp::Div,
        BinOp::UDiv,
        BinOp::Rem,
        BinOp::URem,
        BinOp::And,
        BinOp::Or,
        BinOp::Xor,
        BinOp::Shl,
        BinOp::Shr,
        BinOp::UShr,
    ];

    pub fn mnemonic(self) -> &'static str {
        match self {
            BinOp::Add => "add",
            BinOp::Sub => "sub",
            BinOp::Mul => "mul",
            BinOp::Div => "div",
            BinOp::UDiv => "udiv",
            BinOp::Rem => "rem",
            BinOp::URem => "urem",
            BinOp::And => "and",
            BinOp::Or => "or",
            BinOp::Xor => "xor",
            BinOp::Shl => "shl",
            BinOp::Shr => "shr",
            BinOp::UShr => "ushr",
        }
    }

    pub fn from_mnemonic(s: &str) -> Option<BinOp> {
        BinOp::ALL.into_iter().find(|op| op.mnemonic() == s)
    }

    /// Operations that are defined on floating-point operands.
    pub fn accepts_float(self) -> bool {
        matches!(self, BinOp::Add | BinOp::Sub | BinOp::Mul | BinOp::Div)
    }

    /// Bitwise operations that are also defined on `bool`.
    pub fn accepts_bool(self) -> bool {
        matches!(self, BinOp::And | BinOp::Or | BinOp::Xor)
    }

    pub fn is_commutative(self) -> bool {
        matches!(
            self,
            BinOp::Add | BinOp::Mul | BinOp::And | BinOp::Or | BinOp::Xor
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum UnOp {
    Neg,
    /// Bitwise not; logical not on `bool`.
    Not,
}

impl UnOp {
    pub fn mnemonic(self) -> &'static str {
        match self {
            UnOp::Neg => "neg",
            UnOp::Not => "not",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CmpOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    ULt,
    ULe,
    UGt,
    UGe,
}

impl CmpOp {
    pub const ALL: [CmpOp; 10] = [
        CmpOp::Eq,
        CmpOp::Ne,
        CmpOp::Lt,
        CmpOp::Le,
        CmpOp::Gt,
        CmpOp::Ge,
        CmpOp::ULt,
        CmpOp::ULe,
        CmpOp::UGt,
        CmpOp::UGe,
    ];

    pub fn mnemonic(self) -> &'static str {
        match self {
            CmpOp::Eq => "eq",
            CmpOp::Ne => "ne",
            CmpOp::Lt => "lt",
            CmpOp::Le => "le",
            CmpOp::Gt => "gt",
            CmpOp::Ge => "ge",
            CmpOp::ULt => "ult",
            CmpOp::ULe => "ule",
            CmpOp::UGt => "ugt",
            CmpOp::UGe => "uge",
        }
    }

    pub fn from_mnemonic(s: &str) -> Option<CmpOp> {
        CmpOp::ALL.into_iter().find(|op| op.mnemonic() == s)
    }

    pub fn is_unsigned(self) -> bool {
        matches!(self, CmpOp::ULt | CmpOp::ULe | CmpOp::UGt | CmpOp::UGe)
    }

    pub fn is_equality(self) -> bool {
        matches!(self, CmpOp::Eq | CmpOp::Ne)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CastOp {
    SExt,
    ZExt,
    Trunc,
    SIToFP,
    UIToFP,
    /// Saturating float-to-signed conversion (NaN becomes zero).
    FPToSI,
    FPExt,
    FPTrunc,
    /// Same-width reinterpretation.
    Bitcast,
}

impl CastOp {
    pub const ALL: [CastOp; 9] = [
        CastOp::SExt,
        CastOp::ZExt,
        CastOp::Trunc,
        CastOp::SIToFP,
        CastOp::UIToFP,
        CastOp::FPToSI,
        CastOp::FPExt,
        CastOp::FPTrunc,
        CastOp::Bitcast,
    ];

    pub fn mnemonic(self) -> &'static str {
        match self {
            CastOp::SExt => "sext",
            CastOp::ZExt => "zext",
            CastOp::Trunc => "trunc",
            CastOp::SIToFP => "sitofp",
            CastOp::UIToFP => "uitofp",
            CastOp::FPToSI => "fptosi",
            CastOp::FPExt => "fpext",
            CastOp::FPTrunc => "fptrunc",
            CastOp::Bitcast => "bitcast",
        }
    }

    pub fn from_mnemonic(s: &str) -> Option<CastOp> {
        CastOp::ALL.into_iter().find(|op| op.mnemonic() == s)
    }

    /// Whether a cast from `from` to `to` is well formed.
    pub fn is_valid(self, from: Type, to: Type) -> bool {
        let int_like = |t: Type| t.is_int() || t == Type::Bool;
        match self {
            CastOp::SExt | CastOp::ZExt => int_like(from) && to.is_int() && to.bits() > from.bits(),
            CastOp::Trunc => from.is_int() && to.is_int() && to.bits() < from.bits(),
            CastOp::SIToFP | CastOp::UIToFP => from.is_int() && to.is_float(),
            CastOp::FPToSI => from.is_float() && to.is_int(),
            CastOp::FPExt => from == Type::F32 && to == Type::F64,
            CastOp::FPTrunc => from == Type::F64 && to == Type::F32,
            CastOp::Bitcast => {
                from != to
                    && from != Type::Bool
                    && to != Type::Bool
                    && from.bits() == to.bits()
            }
        }
    }
}

/// A non-terminator instruction.
///
/// Every variant that produces a value names its `result`; result types are
/// recoverable from the instruction alone (see [`Instr::result_type`]).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Instr {
    Const {
        result: ValueId,
        value: Constant,
    },
    Binary {
        result: ValueId,
        op: BinOp,
        ty: Type,
        lhs: ValueId,
        rhs: ValueId,
    },
    Unary {
        result: ValueId,
        op: UnOp,
        ty: Type,
        operand: ValueId,
    },
    Cmp {
        result: ValueId,
        op: CmpOp,
        ty: Type,
        lhs: ValueId,
        rhs: ValueId,
    },
    Cast {
        result: ValueId,
        op: CastOp,
        from: Type,
        to: Type,
        operand: ValueId,
    },
    Select {
        result: ValueId,
        ty: Type,
        cond: ValueId,
        then_value: ValueId,
        else_value: ValueId,
    },
    Load {
        result: ValueId,
        ty: Type,
        addr: ValueId,
        offset: i32,
        align: u32,
    },
    Store {
        ty: Type,
        value: ValueId,
        addr: ValueId,
        offset: i32,
        align: u32,
    },
    /// `base + offset` where `offset` is an `i64` byte count.
    PtrAdd {
        result: ValueId,
        base: ValueId,
        offset: ValueId,
    },
    FuncAddr {
        result: ValueId,
        name: String,
    },
    Call {
        result: Option<ValueId>,
        ret: Option<Type>,
        callee: String,
        args: Vec<ValueId>,
    },
    CallIndirect {
        result: Option<ValueId>,
        signature: Signature,
        callee: ValueId,
        args: Vec<ValueId>,
    },
}

impl Instr {
    pub fn result(&self) -> Option<ValueId> {
        match self {
            Instr::Const { result, .. }
            | Instr::Binary { result, .. }
            | Instr::Unary { result, .. }
            | Instr::Cmp { result, .. }
            | Instr::Cast { result, .. }
            | Instr::Select { result, .. }
            | Instr::Load { result, .. }
            | Instr::PtrAdd { result, .. }
            | Instr::FuncAddr { result, .. } => Some(*result),
            Instr::Call { result, .. } | Instr::CallIndirect { result, .. } => *result,
            Instr::Store { .. } => None,
        }
    }

    pub fn result_type(&self) -> Option<Type> {
        match self {
            Instr::Const { value, .. } => Some(value.ty()),
            Instr::Binary { ty, .. }
            | Instr::Unary { ty, .. }
            | Instr::Select { ty, .. }
            | Instr::Load { ty, .. } => Some(*ty),
            Instr::Cmp { .. } => Some(Type::Bool),
            Instr::Cast { to, .. } => Some(*to),
            Instr::PtrAdd { .. } | Instr::FuncAddr { .. } => Some(Type::Ptr),
            Instr::Call { result, ret, .. } => result.and(*ret),
            Instr::CallIndirect {
                result, signature, ..
            } => result.and(signature.ret),
            Instr::Store { .. } => None,
        }
    }

    /// Rebinds the defined value. No-op for instructions without a result.
    pub fn set_result(&mut self, value: ValueId) {
        match self {
            Instr::Const { result, .. }
            | Instr::Binary { result, .. }
            | Instr::Unary { result, .. }
            | Instr::Cmp { result, .. }
            | Instr::Cast { result, .. }
            | Instr::Select { result, .. }
            | Instr::Load { result, .. }
            | Instr::PtrAdd { result, .. }
            | Instr::FuncAddr { result, .. } => *result = value,
            Instr::Call { result, .. } | Instr::CallIndirect { result, .. } => {
                if result.is_some() {
                    *result = Some(value);
                }
            }
            Instr::Store { .. } => {}
        }
    }

    pub fn operands(&self) -> Vec<ValueId> {
        let mut out = Vec::new();
        self.visit_operands(|v| out.push(v));
        out
    }

    pub fn visit_operands(&self, mut f: impl FnMut(ValueId)) {
        match self {
            Instr::Const { .. } | Instr::FuncAddr { .. } => {}
            Instr::Binary { lhs, rhs, .. } | Instr::Cmp { lhs, rhs, .. } => {
                f(*lhs);
                f(*rhs);
            }
            Instr::Unary { operand, .. } | Instr::Cast { operand, .. } => f(*operand),
            Instr::Select {
                cond,
                then_value,
                else_value,
                ..
            } => {
                f(*cond);
                f(*then_value);
                f(*else_value);
            }
            Instr::Load { addr, .. } => f(*addr),
            Instr::Store { value, addr, .. } => {
                f(*value);
                f(*addr);
            }
            Instr::PtrAdd { base, offset, .. } => {
                f(*base);
                f(*offset);
            }
            Instr::Call { args, .. } => args.iter().copied().for_each(f),
            Instr::CallIndirect { callee, args, .. } => {
                f(*callee);
                args.iter().copied().for_each(f);
            }
        }
    }

    pub fn visit_operands_mut(&mut self, mut f: impl FnMut(&mut ValueId)) {
        match self {
            Instr::Const { .. } | Instr::FuncAddr { .. } => {}
            Instr::Binary { lhs, rhs, .. } | Instr::Cmp { lhs, rhs, .. } => {
                f(lhs);
                f(rhs);
            }
            Instr::Unary { operand, .. } | Instr::Cast { operand, .. } => f(operand),
            Instr::Select {
                cond,
                then_value,
                else_value,
                ..
            } => {
                f(cond);
                f(then_value);
                f(else_value);
            }
            Instr::Load { addr, .. } => f(addr),
            Instr::Store { value, addr, .. } => {
                f(value);
                f(addr);
            }
            Instr::PtrAdd { base, offset, .. } => {
                f(base);
                f(offset);
            }
            Instr::Call { args, .. } => args.iter_mut().for_each(f),
            Instr::CallIndirect { callee, args, .. } => {
                f(callee);
                args.iter_mut().for_each(f);
            }
        }
    }

    /// Instructions that must be kept even when their result is unused.
    pub fn has_side_effects(&self) -> bool {
        matches!(
            self,
            Instr::Store { .. } | Instr::Call { .. } | Instr::CallIndirect { .. }
        )
    }
}

/// The instruction that ends a block.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Terminator {
    Jump {
        dest: BlockId,
        args: Vec<ValueId>,
    },
    Branch {
        cond: ValueId,
        then_dest: BlockId,
        then_args: Vec<ValueId>,
        else_dest: BlockId,
        else_args: Vec<ValueId>,
    },
    Return {
        value: Option<ValueId>,
    },
    Unreachable,
}

impl Terminator {
    /// Outgoing edges with the arguments passed along each one.
    pub fn edges(&self) -> Vec<(BlockId, &[ValueId])> {
        match self {
            Terminator::Jump { dest, args } => vec![(*dest, args.as_slice())],
            Terminator::Branch {
                then_dest,
                then_args,
                else_dest,
                else_args,
                ..
            } => vec![
                (*then_dest, then_args.as_slice()),
                (*else_dest, else_args.as_slice()),
            ],
            Terminator::Return { .. } | Terminator::Unreachable => Vec::new(),
        }
    }

    /// Mutable access to the argument list of every outgoing edge.
    pub fn edges_mut(&mut self) -> Vec<(BlockId, &mut Vec<ValueId>)> {
        match self {
            Terminator::Jump { dest, args } => vec![(*dest, args)],
            Terminator::Branch {
                then_dest,
                then_args,
                else_dest,
                else_args,
                ..
            } => vec![(*then_dest, then_args), (*else_dest, else_args)],
            Terminator::Return { .. } | Terminator::Unreachable => Vec::new(),
        }
    }

    pub fn successors(&self) -> Vec<BlockId> {
        self.edges().into_iter().map(|(dest, _)| dest).collect()
    }

    pub fn visit_operands(&self, mut f: impl FnMut(ValueId)) {
        match self {
            Terminator::Jump { args, .. } => args.iter().copied().for_each(f),
            Terminator::Branch {
                cond,
                then_args,
                else_args,
                ..
            } => {
                f(*cond);
                then_args.iter().copied().for_each(&mut f);
                else_args.iter().copied().for_each(f);
            }
            Terminator::Return { value } => {
                if let Some(value) = value {
                    f(*value);
                }
            }
            Terminator::Unreachable => {}
        }
    }

    pub fn visit_operands_mut(&mut self, mut f: impl FnMut(&mut ValueId)) {
        match self {
            Terminator::Jump { args, .. } => args.iter_mut().for_each(f),
            Terminator::Branch {
                cond,
                then_args,
                else_args,
                ..
            } => {
                f(cond);
                then_args.iter_mut().for_each(&mut f);
                else_args.iter_mut().for_each(f);
            }
            Terminator::Return { value } => {
                if let Some(value) = value {
                    f(value);
                }
            }
            Terminator::Unreachable => {}
        }
    }

    pub fn visit_targets_mut(&mut self, mut f: impl FnMut(&mut BlockId)) {
        match self {
            Terminator::Jump { dest, .. } => f(dest),
            Terminator::Branch {
                then_dest,
                else_dest,
                ..
            } => {
                f(then_dest);
                f(else_dest);
            }
            Terminator::Return { .. } | Terminator::Unreachable => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn constants_are_normalized() {
        assert_eq!(Constant::int(Type::I8, 200).as_int(), Some(-56));
        assert_eq!(Constant::float(Type::F32, 0.1).as_float(), Some(f64::from(0.1f32)));
    }

    #[test]
    fn bits_round_trip() {
        let c = Constant::int(Type::I16, -2);
        assert_eq!(c.to_bits(), 0xfffe);
        assert_eq!(Constant::from_bits(Type::I16, 0xfffe), c);
        let f = Constant::float(Type::F64, -1.25);
        assert_eq!(Constant::from_bits(Type::F64, f.to_bits()), f);
    }

    #[test]
    fn cast_validity() {
        assert!(CastOp::SExt.is_valid(Type::I32, Type::I64));
        assert!(!CastOp::SExt.is_valid(Type::I64, Type::I32));
        assert!(CastOp::ZExt.is_valid(Type::Bool, Type::I32));
        assert!(CastOp::Bitcast.is_valid(Type::I64, Type::F64));
        assert!(CastOp::Bitcast.is_valid(Type::Ptr, Type::I64));
        assert!(!CastOp::Bitcast.is_valid(Type::I32, Type::F64));
    }

    #[test]
    fn call_without_result_has_no_type() {
        let call = Instr::Call {
            result: None,
            ret: Some(Type::I64),
            callee: "g".into(),
            args: vec![],
        };
        assert_eq!(call.result_type(), None);
        assert!(call.has_side_effects());
    }
}
