//! Static description of native function types and of what binding a tuple
//! of arguments to one leaves behind.
//!
//! `(10_i64, Free, Free)` bound to `extern "C" fn(i64, i64, i64) -> i64`
//! reduces to `extern "C" fn(i64, i64) -> i64`. The reduction is computed by
//! the type checker, so a wrong arity or a mistyped fixed value does not
//! compile.

use std::marker::PhantomData;

use rejit_ir::{Signature, Type};

use crate::context::{ArgValue, FixedArg, ParamDescriptor};

/// Rust types with a direct IR counterpart.
pub trait JitType: Copy + 'static {
    const TYPE: Type;
}

/// Types that can be passed to and bound as a parameter.
pub trait JitArg: JitType {
    fn to_arg(self) -> ArgValue;
}

/// Return types: anything [`JitType`], or `()` for none.
pub trait JitRet: Copy + 'static {
    const TYPE: Option<Type>;
}

impl JitRet for () {
    const TYPE: Option<Type> = None;
}

macro_rules! int_types {
    ($($t:ty => $ir:ident),* $(,)?) => {$(
        impl JitType for $t {
            const TYPE: Type = Type::$ir;
        }
        impl JitArg for $t {
            fn to_arg(self) -> ArgValue {
                ArgValue::Int(self as i64)
            }
        }
        impl JitRet for $t {
            const TYPE: Option<Type> = Some(Type::$ir);
        }
    )*};
}

int_types! {
    i8 => I8, u8 => I8,
    i16 => I16, u16 => I16,
    i32 => I32, u32 => I32,
    i64 => I64, u64 => I64,
    isize => I64, usize => I64,
}

macro_rules! scalar_types {
    ($($t:ty => $ir:ident, |$v:ident| $arg:expr;)*) => {$(
        impl JitType for $t {
            const TYPE: Type = Type::$ir;
        }
        impl JitArg for $t {
            fn to_arg(self) -> ArgValue {
                let $v = self;
                $arg
            }
        }
        impl JitRet for $t {
            const TYPE: Option<Type> = Some(Type::$ir);
        }
    )*};
}

scalar_types! {
    f32 => F32, |v| ArgValue::Float(f64::from(v));
    f64 => F64, |v| ArgValue::Float(v);
    bool => Bool, |v| ArgValue::Bool(v);
}

impl<T: 'static> JitType for *const T {
    const TYPE: Type = Type::Ptr;
}

impl<T: 'static> JitArg for *const T {
    fn to_arg(self) -> ArgValue {
        ArgValue::Ptr {
            addr: self as usize,
            align: 1,
        }
    }
}

impl<T: 'static> JitRet for *const T {
    const TYPE: Option<Type> = Some(Type::Ptr);
}

impl<T: 'static> JitType for *mut T {
    const TYPE: Type = Type::Ptr;
}

impl<T: 'static> JitArg for *mut T {
    fn to_arg(self) -> ArgValue {
        ArgValue::Ptr {
            addr: self as usize,
            align: 1,
        }
    }
}

impl<T: 'static> JitRet for *mut T {
    const TYPE: Option<Type> = Some(Type::Ptr);
}

/// Native function pointer types the specializer can key on and hand back.
pub trait JitFn: Copy + 'static {
    type Ret: JitRet;
    const ARITY: usize;

    fn param_types() -> Vec<Type>;

    fn signature() -> Signature {
        Signature::new(Self::param_types(), <Self::Ret as JitRet>::TYPE)
    }

    fn addr(self) -> usize;

    /// # Safety
    ///
    /// `code` must point to executable code that follows the C calling
    /// convention for this function type, and must stay valid for as long as
    /// the returned value is called.
    unsafe fn from_code(code: *const u8) -> Self;
}

/// Marks a parameter as left free.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Free;

/// A pointer bound together with an alignment guarantee, which the optimizer
/// may assume for every access through it.
#[derive(Debug)]
pub struct Aligned<T> {
    addr: usize,
    align: u32,
    _pointee: PhantomData<*const T>,
}

impl<T> Clone for Aligned<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for Aligned<T> {}

impl<T> Aligned<T> {
    /// `None` unless `align` is a power of two that divides the address.
    pub fn new(ptr: *const T, align: u32) -> Option<Self> {
        let addr = ptr as usize;
        (align.is_power_of_two() && addr % align as usize == 0).then_some(Self {
            addr,
            align,
            _pointee: PhantomData,
        })
    }

    /// Uses the natural alignment of `T`.
    pub fn natural(ptr: *const T) -> Option<Self> {
        Self::new(ptr, std::mem::align_of::<T>() as u32)
    }

    pub fn align(&self) -> u32 {
        self.align
    }

    fn arg(self) -> ParamDescriptor {
        ParamDescriptor::Fixed(FixedArg {
            value: ArgValue::Ptr {
                addr: self.addr,
                align: self.align,
            },
            source: Type::Ptr,
        })
    }
}

/// Type-level list of the parameters that stay free.
pub trait TypeList {}

pub struct Nil;

pub struct Cons<H, T>(PhantomData<(H, T)>);

impl TypeList for Nil {}

impl<H, T: TypeList> TypeList for Cons<H, T> {}

/// How a binding fills the parameter slot of type `P`.
pub trait Slot<P: JitArg> {
    /// `Rest` with `P` prepended if the slot stays free.
    type Keep<Rest: TypeList>: TypeList;

    fn describe(self) -> ParamDescriptor;
}

impl<P: JitArg> Slot<P> for Free {
    type Keep<Rest: TypeList> = Cons<P, Rest>;

    fn describe(self) -> ParamDescriptor {
        ParamDescriptor::Free
    }
}

impl<P: JitArg> Slot<P> for P {
    type Keep<Rest: TypeList> = Rest;

    fn describe(self) -> ParamDescriptor {
        ParamDescriptor::Fixed(FixedArg {
            value: self.to_arg(),
            source: P::TYPE,
        })
    }
}

impl<T: 'static> Slot<*const T> for Aligned<T> {
    type Keep<Rest: TypeList> = Rest;

    fn describe(self) -> ParamDescriptor {
        self.arg()
    }
}

impl<T: 'static> Slot<*mut T> for Aligned<T> {
    type Keep<Rest: TypeList> = Rest;

    fn describe(self) -> ParamDescriptor {
        self.arg()
    }
}

/// Rebuilds a function pointer type from a list of parameters.
pub trait FnFromList<R: JitRet>: TypeList {
    type Fn: JitFn;
}

/// A tuple of bindings, one per parameter of `F`.
pub trait Bindings<F: JitFn> {
    /// `F` with every fixed parameter removed.
    type Reduced: JitFn;

    fn descriptors(self) -> Vec<ParamDescriptor>;
}

/// The callable type left after binding `Args` to `F`.
pub type Reduced<F, Args> = <Args as Bindings<F>>::Reduced;

macro_rules! list {
    () => { Nil };
    ($head:ident $(, $rest:ident)*) => { Cons<$head, list!($($rest),*)> };
}

macro_rules! kept {
    () => { Nil };
    ($s:ident : $p:ident $(, $rs:ident : $rp:ident)*) => {
        <$s as Slot<$p>>::Keep<kept!($($rs : $rp),*)>
    };
}

macro_rules! arity {
    ($n:expr; $($p:ident $s:ident $idx:tt),*) => {
        impl<R: JitRet, $($p: JitArg),*> JitFn for extern "C" fn($($p),*) -> R {
            type Ret = R;
            const ARITY: usize = $n;

            fn param_types() -> Vec<Type> {
                vec![$(<$p as JitType>::TYPE),*]
            }

            fn addr(self) -> usize {
                self as usize
            }

            unsafe fn from_code(code: *const u8) -> Self {
                // SAFETY: function pointers and data pointers share a
                // representation on every supported host; the caller
                // guarantees the ABI.
                unsafe { std::mem::transmute_copy::<*const u8, Self>(&code) }
            }
        }

        impl<R: JitRet, $($p: JitArg),*> JitType for extern "C" fn($($p),*) -> R {
            const TYPE: Type = Type::Ptr;
        }

        impl<R: JitRet, $($p: JitArg),*> JitArg for extern "C" fn($($p),*) -> R {
            fn to_arg(self) -> ArgValue {
                ArgValue::FnPtr(self as usize)
            }
        }

        impl<R: JitRet, $($p: JitArg),*> FnFromList<R> for list!($($p),*) {
            type Fn = extern "C" fn($($p),*) -> R;
        }

        impl<R: JitRet, $($p: JitArg,)* $($s: Slot<$p>,)*> Bindings<extern "C" fn($($p),*) -> R>
            for ($($s,)*)
        where
            kept!($($s : $p),*): FnFromList<R>,
        {
            type Reduced = <kept!($($s : $p),*) as FnFromList<R>>::Fn;

            fn descriptors(self) -> Vec<ParamDescriptor> {
                vec![$(self.$idx.describe()),*]
            }
        }
    };
}

arity!(0;);
arity!(1; A1 S1 0);
arity!(2; A1 S1 0, A2 S2 1);
arity!(3; A1 S1 0, A2 S2 1, A3 S3 2);
arity!(4; A1 S1 0, A2 S2 1, A3 S3 2, A4 S4 3);
arity!(5; A1 S1 0, A2 S2 1, A3 S3 2, A4 S4 3, A5 S5 4);
arity!(6; A1 S1 0, A2 S2 1, A3 S3 2, A4 S4 3, A5 S5 4, A6 S6 5);

#[cfg(test)]
mod tests {
    use super::*;

    type Add3 = extern "C" fn(i64, i64, i64) -> i64;

    fn reduced_signature<F: JitFn, Args: Bindings<F>>(_: F, _: Args) -> Signature {
        <Reduced<F, Args> as JitFn>::signature()
    }

    extern "C" fn add3(a: i64, b: i64, c: i64) -> i64 {
        a + b + c
    }

    #[test]
    fn fixing_drops_parameters() {
        let f = add3 as Add3;
        assert_eq!(
            reduced_signature(f, (10_i64, Free, Free)),
            Signature::new(vec![Type::I64, Type::I64], Some(Type::I64))
        );
        assert_eq!(
            reduced_signature(f, (1_i64, 2_i64, 3_i64)),
            Signature::new(vec![], Some(Type::I64))
        );
        assert_eq!(reduced_signature(f, (Free, Free, Free)), Add3::signature());
    }

    #[test]
    fn descriptors_follow_argument_order() {
        let d = <(Free, i32, Free) as Bindings<extern "C" fn(f64, i32, bool)>>::descriptors((
            Free, -4_i32, Free,
        ));
        assert!(d[0].is_free());
        assert_eq!(
            d[1].fixed().map(|a| (a.value, a.source)),
            Some((ArgValue::Int(-4), Type::I32))
        );
        assert!(d[2].is_free());
    }

    #[test]
    fn function_pointers_are_pointer_arguments() {
        let f = add3 as Add3;
        assert_eq!(<Add3 as JitType>::TYPE, Type::Ptr);
        assert_eq!(f.to_arg(), ArgValue::FnPtr(f.addr()));
    }

    #[test]
    fn aligned_rejects_misaligned_addresses() {
        let data = [0u64; 2];
        let base = data.as_ptr();
        assert!(Aligned::natural(base).is_some());
        let odd = (base as usize + 1) as *const u64;
        assert!(Aligned::new(odd, 8).is_none());
        assert!(Aligned::new(base, 3).is_none());
    }
}
