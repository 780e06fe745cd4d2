use std::fmt;

use serde::{Deserialize, Serialize};

/// Scalar types understood by the IR.
///
/// `Bool` is stored as one byte holding `0` or `1`. `Ptr` is a host pointer;
/// every supported host is 64-bit, so it shares the bit width of `I64`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Type {
    I8,
    I16,
    I32,
    I64,
    F32,
    F64,
    Bool,
    Ptr,
}

impl Type {
    pub fn is_int(self) -> bool {
        matches!(self, Type::I8 | Type::I16 | Type::I32 | Type::I64)
    }

    pub fn is_float(self) -> bool {
        matches!(self, Type::F32 | Type::F64)
    }

    /// Integers, pointers and booleans: everything held in a general register.
    pub fn is_integral(self) -> bool {
        self.is_int() || matches!(self, Type::Ptr | Type::Bool)
    }

    pub fn bits(self) -> u32 {
        match self {
            Type::I8 | Type::Bool => 8,
            Type::I16 => 16,
            Type::I32 | Type::F32 => 32,
            Type::I64 | Type::F64 | Type::Ptr => 64,
        }
    }

    pub fn bytes(self) -> u32 {
        self.bits() / 8
    }

    pub fn name(self) -> &'static str {
        match self {
            Type::I8 => "i8",
            Type::I16 => "i16",
            Type::I32 => "i32",
            Type::I64 => "i64",
            Type::F32 => "f32",
            Type::F64 => "f64",
            Type::Bool => "bool",
            Type::Ptr => "ptr",
        }
    }

    pub fn from_name(name: &str) -> Option<Type> {
        Some(match name {
            "i8" => Type::I8,
            "i16" => Type::I16,
            "i32" => Type::I32,
            "i64" => Type::I64,
            "f32" => Type::F32,
            "f64" => Type::F64,
            "bool" => Type::Bool,
            "ptr" => Type::Ptr,
            _ => return None,
        })
    }

    /// Sign-extends the low `bits()` of `value` so that every integer
    /// constant has exactly one `i64` encoding.
    pub fn normalize(self, value: i64) -> i64 {
        match self {
            Type::I8 => value as i8 as i64,
            Type::I16 => value as i16 as i64,
            Type::I32 => value as i32 as i64,
            Type::Bool => i64::from(value & 1 != 0),
            _ => value,
        }
    }

    /// The zero-extended view of an already normalized integer.
    pub fn unsigned(self, value: i64) -> u64 {
        match self.bits() {
            64 => value as u64,
            bits => (value as u64) & ((1u64 << bits) - 1),
        }
    }
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Parameter and return types of a function.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Signature {
    pub params: Vec<Type>,
    pub ret: Option<Type>,
}

impl Signature {
    pub fn new(params: Vec<Type>, ret: Option<Type>) -> Self {
        Self { params, ret }
    }

    pub fn arity(&self) -> usize {
        self.params.len()
    }
}

impl fmt::Display for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("(")?;
        for (i, ty) in self.params.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{ty}")?;
        }
        f.write_str(")")?;
        if let Some(ret) = self.ret {
            write!(f, " -> {ret}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_wraps_to_width() {
        assert_eq!(Type::I8.normalize(255), -1);
        assert_eq!(Type::I16.normalize(0x1_8000), -32768);
        assert_eq!(Type::I32.normalize(i64::from(u32::MAX)), -1);
        assert_eq!(Type::I64.normalize(-7), -7);
        assert_eq!(Type::Bool.normalize(2), 0);
        assert_eq!(Type::Bool.normalize(3), 1);
    }

    #[test]
    fn unsigned_view_masks_high_bits() {
        assert_eq!(Type::I8.unsigned(-1), 0xff);
        assert_eq!(Type::I32.unsigned(-1), 0xffff_ffff);
        assert_eq!(Type::I64.unsigned(-1), u64::MAX);
    }

    #[test]
    fn signature_display() {
        let sig = Signature::new(vec![Type::I64, Type::Ptr], Some(Type::F64));
        assert_eq!(sig.to_string(), "(i64, ptr) -> f64");
        assert_eq!(Signature::default().to_string(), "()");
    }
}
