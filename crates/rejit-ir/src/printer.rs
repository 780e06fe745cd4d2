//! Textual form of the IR.
//!
//! ```text
//! module "demo"
//!
//! extern @sqrt(f64) -> f64
//!
//! fn @scale(i64, i64) -> i64 export alwaysinline {
//! bb0(%0: i64, %1: i64):
//!   %2 = mul i64 %0, %1
//!   return %2
//! }
//! ```
//!
//! Floats print with Rust's shortest round-trip formatting so that
//! `parse_module(&module.to_string())` reproduces the module exactly.

use std::fmt::{self, Write};

use crate::function::{Block, Function};
use crate::instr::{Constant, Instr, Terminator};
use crate::module::Module;
use crate::value::{BlockId, ValueId};

impl fmt::Display for Constant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Constant::Int { ty, value } => write!(f, "{ty} {value}"),
            Constant::Float { ty, value } => write!(f, "{ty} {value:?}"),
            Constant::Bool(b) => write!(f, "bool {b}"),
        }
    }
}

fn write_values(f: &mut impl Write, values: &[ValueId]) -> fmt::Result {
    for (i, v) in values.iter().enumerate() {
        if i > 0 {
            f.write_str(", ")?;
        }
        write!(f, "{v}")?;
    }
    Ok(())
}

fn write_target(f: &mut impl Write, dest: BlockId, args: &[ValueId]) -> fmt::Result {
    write!(f, "{dest}")?;
    if !args.is_empty() {
        f.write_str("(")?;
        write_values(f, args)?;
        f.write_str(")")?;
    }
    Ok(())
}

impl fmt::Display for Instr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(result) = self.result() {
            write!(f, "{result} = ")?;
        }
        match self {
            Instr::Const { value, .. } => write!(f, "const {value}"),
            Instr::Binary {
                op, ty, lhs, rhs, ..
            } => write!(f, "{} {ty} {lhs}, {rhs}", op.mnemonic()),
            Instr::Unary {
                op, ty, operand, ..
            } => write!(f, "{} {ty} {operand}", op.mnemonic()),
            Instr::Cmp {
                op, ty, lhs, rhs, ..
            } => write!(f, "cmp {} {ty} {lhs}, {rhs}", op.mnemonic()),
            Instr::Cast {
                op,
                from,
                to,
                operand,
                ..
            } => write!(f, "{} {from} {operand} to {to}", op.mnemonic()),
            Instr::Select {
                ty,
                cond,
                then_value,
                else_value,
                ..
            } => write!(f, "select {ty} {cond}, {then_value}, {else_value}"),
            Instr::Load {
                ty,
                addr,
                offset,
                align,
                ..
            } => write!(f, "load {ty} {addr}, offset {offset}, align {align}"),
            Instr::Store {
                ty,
                value,
                addr,
                offset,
                align,
            } => write!(f, "store {ty} {value}, {addr}, offset {offset}, align {align}"),
            Instr::PtrAdd { base, offset, .. } => write!(f, "ptradd {base}, {offset}"),
            Instr::FuncAddr { name, .. } => write!(f, "funcaddr @{name}"),
            Instr::Call {
                ret, callee, args, ..
            } => {
                write!(f, "call @{callee}(")?;
                write_values(f, args)?;
                f.write_str(")")?;
                if let Some(ret) = ret {
                    write!(f, " -> {ret}")?;
                }
                Ok(())
            }
            Instr::CallIndirect {
                signature,
                callee,
                args,
                ..
            } => {
                write!(f, "call_indirect {callee}(")?;
                write_values(f, args)?;
                write!(f, ") : {signature}")
            }
        }
    }
}

impl fmt::Display for Terminator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Terminator::Jump { dest, args } => {
                f.write_str("jump ")?;
                write_target(f, *dest, args)
            }
            Terminator::Branch {
                cond,
                then_dest,
                then_args,
                else_dest,
                else_args,
            } => {
                write!(f, "br {cond}, ")?;
                write_target(f, *then_dest, then_args)?;
                f.write_str(", ")?;
                write_target(f, *else_dest, else_args)
            }
            Terminator::Return { value: Some(v) } => write!(f, "return {v}"),
            Terminator::Return { value: None } => f.write_str("return"),
            Terminator::Unreachable => f.write_str("unreachable"),
        }
    }
}

impl fmt::Display for Block {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.id)?;
        if !self.params.is_empty() {
            f.write_str("(")?;
            for (i, p) in self.params.iter().enumerate() {
                if i > 0 {
                    f.write_str(", ")?;
                }
                write!(f, "{}: {}", p.value, p.ty)?;
            }
            f.write_str(")")?;
        }
        f.write_str(":\n")?;
        for instr in &self.instrs {
            writeln!(f, "  {instr}")?;
        }
        writeln!(f, "  {}", self.terminator)
    }
}

impl fmt::Display for Function {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "fn @{}{} {}", self.name, self.signature, self.linkage.keyword())?;
        if self.attrs.always_inline {
            f.write_str(" alwaysinline")?;
        }
        if self.attrs.no_inline {
            f.write_str(" noinline")?;
        }
        if self.attrs.opt_none {
            f.write_str(" optnone")?;
        }
        f.write_str(" {\n")?;
        for block in &self.blocks {
            write!(f, "{block}")?;
        }
        f.write_str("}\n")
    }
}

impl fmt::Display for Module {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "module {:?}", self.name)?;
        for ext in &self.externs {
            write!(f, "\nextern @{}{}\n", ext.name, ext.signature)?;
        }
        for func in self.functions.values() {
            write!(f, "\n{func}")?;
        }
        Ok(())
    }
}
