//! Describes which parameters of a function are fixed and to what.

use rejit_ir::{Constant, Signature, Type};

use crate::error::{Error, Result};
use crate::options::Options;

/// A runtime value bound to a parameter.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ArgValue {
    /// Integer bits; narrower parameters use the low bits.
    Int(i64),
    Float(f64),
    Bool(bool),
    /// A data pointer whose address is known to be a multiple of `align`.
    Ptr { addr: usize, align: u32 },
    /// A pointer to a native function. If that function is registered its
    /// body can be inlined into the specialization.
    FnPtr(usize),
}

impl ArgValue {
    /// The IR type a value of this kind carries when nothing narrower is
    /// known.
    pub fn natural_type(&self) -> Type {
        match self {
            ArgValue::Int(_) => Type::I64,
            ArgValue::Float(_) => Type::F64,
            ArgValue::Bool(_) => Type::Bool,
            ArgValue::Ptr { .. } | ArgValue::FnPtr(_) => Type::Ptr,
        }
    }

    pub fn fits(&self, ty: Type) -> bool {
        match self {
            ArgValue::Int(_) => ty.is_int(),
            ArgValue::Float(_) => ty.is_float(),
            ArgValue::Bool(_) => ty == Type::Bool,
            ArgValue::Ptr { .. } | ArgValue::FnPtr(_) => ty == Type::Ptr,
        }
    }

    /// The constant this value becomes in a parameter of type `ty`.
    /// Function pointers become plain addresses here; the specializer turns
    /// registered ones into symbol references instead.
    pub(crate) fn to_constant(self, ty: Type) -> Constant {
        match self {
            ArgValue::Int(v) => Constant::int(ty, v),
            ArgValue::Float(v) => Constant::float(ty, v),
            ArgValue::Bool(b) => Constant::Bool(b),
            ArgValue::Ptr { addr, .. } | ArgValue::FnPtr(addr) => {
                Constant::int(Type::Ptr, addr as i64)
            }
        }
    }
}

/// A bound argument and the parameter type it was bound as.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FixedArg {
    pub value: ArgValue,
    pub source: Type,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ParamDescriptor {
    Fixed(FixedArg),
    Free,
}

impl ParamDescriptor {
    pub fn is_free(&self) -> bool {
        matches!(self, ParamDescriptor::Free)
    }

    pub fn fixed(&self) -> Option<&FixedArg> {
        match self {
            ParamDescriptor::Fixed(arg) => Some(arg),
            ParamDescriptor::Free => None,
        }
    }
}

/// One descriptor per parameter of the target function, plus the options the
/// specialization runs with.
#[derive(Debug, Clone, PartialEq)]
pub struct Context {
    params: Vec<ParamDescriptor>,
    options: Options,
}

impl Context {
    pub fn new(params: Vec<ParamDescriptor>, options: Options) -> Self {
        Self { params, options }
    }

    /// Starts a context for a function with the given parameter types. Every
    /// parameter is free until fixed.
    pub fn builder(params: &[Type]) -> ContextBuilder {
        ContextBuilder {
            types: params.to_vec(),
            slots: vec![ParamDescriptor::Free; params.len()],
            options: Options::default(),
            error: None,
        }
    }

    pub fn params(&self) -> &[ParamDescriptor] {
        &self.params
    }

    pub fn options(&self) -> &Options {
        &self.options
    }

    pub fn with_options(mut self, options: Options) -> Self {
        self.options = options;
        self
    }

    pub fn free_count(&self) -> usize {
        self.params.iter().filter(|p| p.is_free()).count()
    }

    pub fn fixed_count(&self) -> usize {
        self.params.len() - self.free_count()
    }

    /// The signature of `original` with every fixed parameter removed.
    pub fn reduced_signature(&self, original: &Signature) -> Signature {
        let params = original
            .params
            .iter()
            .zip(&self.params)
            .filter(|(_, d)| d.is_free())
            .map(|(ty, _)| *ty)
            .collect();
        Signature::new(params, original.ret)
    }

    /// Checks that this context can describe a call to `signature`.
    pub fn check(&self, signature: &Signature) -> Result<()> {
        if self.params.len() != signature.arity() {
            return Err(Error::ArityMismatch {
                expected: signature.arity(),
                found: self.params.len(),
            });
        }
        for (index, (desc, &expected)) in self.params.iter().zip(&signature.params).enumerate() {
            let Some(arg) = desc.fixed() else {
                continue;
            };
            if arg.source != expected || !arg.value.fits(expected) {
                return Err(Error::TypeBinding {
                    index,
                    expected,
                    found: arg.source,
                });
            }
        }
        Ok(())
    }
}

/// Builds a [`Context`] when parameter types are only known at runtime.
///
/// The first binding error is kept and reported by [`ContextBuilder::build`].
#[derive(Debug)]
pub struct ContextBuilder {
    types: Vec<Type>,
    slots: Vec<ParamDescriptor>,
    options: Options,
    error: Option<Error>,
}

impl ContextBuilder {
    pub fn fix(mut self, index: usize, value: ArgValue) -> Self {
        if self.error.is_some() {
            return self;
        }
        let Some(&ty) = self.types.get(index) else {
            self.error = Some(Error::ArityMismatch {
                expected: self.types.len(),
                found: index + 1,
            });
            return self;
        };
        if !value.fits(ty) {
            self.error = Some(Error::TypeBinding {
                index,
                expected: ty,
                found: value.natural_type(),
            });
            return self;
        }
        self.slots[index] = ParamDescriptor::Fixed(FixedArg { value, source: ty });
        self
    }

    pub fn free(mut self, index: usize) -> Self {
        if let Some(slot) = self.slots.get_mut(index) {
            *slot = ParamDescriptor::Free;
        }
        self
    }

    pub fn options(mut self, options: Options) -> Self {
        self.options = options;
        self
    }

    pub fn build(self) -> Result<Context> {
        match self.error {
            Some(err) => Err(err),
            None => Ok(Context::new(self.slots, self.options)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_fixes_and_reduces() {
        let types = [Type::I64, Type::I32, Type::F64];
        let ctx = Context::builder(&types)
            .fix(0, ArgValue::Int(10))
            .fix(2, ArgValue::Float(0.5))
            .build()
            .expect("build");
        assert_eq!(ctx.fixed_count(), 2);
        assert_eq!(ctx.free_count(), 1);
        let sig = Signature::new(types.to_vec(), Some(Type::I64));
        assert_eq!(
            ctx.reduced_signature(&sig),
            Signature::new(vec![Type::I32], Some(Type::I64))
        );
        ctx.check(&sig).expect("check");
    }

    #[test]
    fn incompatible_value_is_a_binding_error() {
        let err = Context::builder(&[Type::I64, Type::Ptr])
            .fix(1, ArgValue::Float(1.0))
            .build()
            .unwrap_err();
        assert!(matches!(
            err,
            Error::TypeBinding {
                index: 1,
                expected: Type::Ptr,
                found: Type::F64
            }
        ));
    }

    #[test]
    fn out_of_range_index_is_an_arity_error() {
        let err = Context::builder(&[Type::I64])
            .fix(3, ArgValue::Int(1))
            .build()
            .unwrap_err();
        assert!(matches!(err, Error::ArityMismatch { expected: 1, found: 4 }));
    }

    #[test]
    fn check_rejects_wrong_arity_and_source_types() {
        let ctx = Context::new(
            vec![ParamDescriptor::Fixed(FixedArg {
                value: ArgValue::Int(1),
                source: Type::I32,
            })],
            Options::default(),
        );
        let two = Signature::new(vec![Type::I32, Type::I32], None);
        assert!(matches!(ctx.check(&two), Err(Error::ArityMismatch { .. })));
        let wide = Signature::new(vec![Type::I64], None);
        assert!(matches!(ctx.check(&wide), Err(Error::TypeBinding { index: 0, .. })));
    }
}
