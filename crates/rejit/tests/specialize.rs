use std::sync::Arc;

use proptest::prelude::*;
use rejit::{
    Aligned, ArgValue, Context, Error, Free, FunctionId, OptLevel, Options, Registry, Specialized,
    Specializer, Target, extract_optimized_module, get_module, specialize, specialize_with,
};
use rejit_ir::{Instr, Module, Type, parse_module};

type Add3 = extern "C" fn(i64, i64, i64) -> i64;
type Mix = extern "C" fn(i64, i64, i64) -> i64;
type Apply = extern "C" fn(extern "C" fn(i64) -> i64, i64) -> i64;
type Sum = extern "C" fn(*const i64, i64) -> i64;
type ToI8 = extern "C" fn(f64, f64) -> i8;
type Mixed = extern "C" fn(i8, u16, bool, f32) -> i64;

extern "C" fn add3(a: i64, b: i64, c: i64) -> i64 {
    a.wrapping_add(b).wrapping_add(c)
}

const ADD3: &str = r#"module "add3"

fn @add3(i64, i64, i64) -> i64 export optnone {
bb0(%0: i64, %1: i64, %2: i64):
  %3 = add i64 %0, %1
  %4 = add i64 %3, %2
  return %4
}
"#;

extern "C" fn mix(op: i64, a: i64, b: i64) -> i64 {
    match op {
        0 => a.wrapping_add(b),
        1 => a.wrapping_mul(b),
        _ => a ^ b,
    }
}

const MIX: &str = r#"module "mix"

fn @mix(i64, i64, i64) -> i64 export optnone {
bb0(%0: i64, %1: i64, %2: i64):
  %3 = const i64 0
  %4 = cmp eq i64 %0, %3
  br %4, bb1, bb2
bb1:
  %5 = add i64 %1, %2
  jump bb4(%5)
bb2:
  %6 = const i64 1
  %7 = cmp eq i64 %0, %6
  br %7, bb3, bb5
bb3:
  %8 = mul i64 %1, %2
  jump bb4(%8)
bb4(%9: i64):
  return %9
bb5:
  %10 = xor i64 %1, %2
  jump bb4(%10)
}
"#;

extern "C" fn double(x: i64) -> i64 {
    x.wrapping_mul(2)
}

const DOUBLE: &str = r#"module "double"

fn @double(i64) -> i64 export optnone {
bb0(%0: i64):
  %1 = const i64 2
  %2 = mul i64 %0, %1
  return %2
}
"#;

extern "C" fn apply(f: extern "C" fn(i64) -> i64, x: i64) -> i64 {
    f(x)
}

const APPLY: &str = r#"module "apply"

fn @apply(ptr, i64) -> i64 export optnone {
bb0(%0: ptr, %1: i64):
  %2 = call_indirect %0(%1) : (i64) -> i64
  return %2
}
"#;

extern "C" fn second_plus(p: *const i64, x: i64) -> i64 {
    // SAFETY: callers pass a pointer to at least two readable i64s.
    unsafe { *p.add(1) }.wrapping_add(x)
}

const SECOND_PLUS: &str = r#"module "second_plus"

fn @second_plus(ptr, i64) -> i64 export optnone {
bb0(%0: ptr, %1: i64):
  %2 = load i64 %0, offset 8, align 1
  %3 = add i64 %2, %1
  return %3
}
"#;

extern "C" fn to_i8(x: f64, bias: f64) -> i8 {
    (x + bias) as i8
}

const TO_I8: &str = r#"module "to_i8"

fn @to_i8(f64, f64) -> i8 export optnone {
bb0(%0: f64, %1: f64):
  %2 = add f64 %0, %1
  %3 = fptosi f64 %2 to i8
  return %3
}
"#;

extern "C" fn mixed(a: i8, b: u16, up: bool, scale: f32) -> i64 {
    let base = i64::from(a) * 1000 + i64::from(b);
    let step = (scale * 4.0) as i64;
    if up { base + step } else { base - step }
}

const MIXED: &str = r#"module "mixed"

fn @mixed(i8, i16, bool, f32) -> i64 export optnone {
bb0(%0: i8, %1: i16, %2: bool, %3: f32):
  %4 = sext i8 %0 to i64
  %5 = const i64 1000
  %6 = mul i64 %4, %5
  %7 = zext i16 %1 to i64
  %8 = add i64 %6, %7
  %9 = const f32 4.0
  %10 = mul f32 %3, %9
  %11 = fptosi f32 %10 to i64
  %12 = add i64 %8, %11
  %13 = sub i64 %8, %11
  %14 = select i64 %2, %12, %13
  return %14
}
"#;

/// Specializes `mixed` with the positions set in `mask` fixed and calls the
/// result with the remaining arguments.
fn call_mixed_partition(spec: &Specializer, mask: u8, a: i8, b: u16, up: bool, scale: f32) -> i64 {
    let f: Mixed = mixed;
    macro_rules! run {
        ($args:expr, |$g:ident| $call:expr) => {{
            let $g = specialize(spec, f, $args).expect("specialize");
            $call
        }};
    }
    match mask & 0b1111 {
        0b0000 => run!((Free, Free, Free, Free), |g| g.call(a, b, up, scale)),
        0b0001 => run!((a, Free, Free, Free), |g| g.call(b, up, scale)),
        0b0010 => run!((Free, b, Free, Free), |g| g.call(a, up, scale)),
        0b0011 => run!((a, b, Free, Free), |g| g.call(up, scale)),
        0b0100 => run!((Free, Free, up, Free), |g| g.call(a, b, scale)),
        0b0101 => run!((a, Free, up, Free), |g| g.call(b, scale)),
        0b0110 => run!((Free, b, up, Free), |g| g.call(a, scale)),
        0b0111 => run!((a, b, up, Free), |g| g.call(scale)),
        0b1000 => run!((Free, Free, Free, scale), |g| g.call(a, b, up)),
        0b1001 => run!((a, Free, Free, scale), |g| g.call(b, up)),
        0b1010 => run!((Free, b, Free, scale), |g| g.call(a, up)),
        0b1011 => run!((a, b, Free, scale), |g| g.call(up)),
        0b1100 => run!((Free, Free, up, scale), |g| g.call(a, b)),
        0b1101 => run!((a, Free, up, scale), |g| g.call(b)),
        0b1110 => run!((Free, b, up, scale), |g| g.call(a)),
        _ => run!((a, b, up, scale), |g| g.call()),
    }
}

fn options() -> Options {
    Options::default().with_verify(true)
}

fn specializer_with(entries: &[(usize, &str, &str)]) -> Specializer {
    let registry = Registry::new();
    for &(addr, entry, source) in entries {
        // SAFETY: every module here mirrors the native function at `addr`.
        unsafe {
            registry.register(
                FunctionId::from_addr(addr),
                entry,
                parse_module(source).expect("parse"),
            )
        }
        .expect("register");
    }
    Specializer::with_options(Arc::new(registry), options())
}

fn calls_in(module: &Module) -> usize {
    module
        .functions
        .values()
        .flat_map(|f| f.blocks.iter())
        .flat_map(|b| b.instrs.iter())
        .filter(|i| matches!(i, Instr::Call { .. } | Instr::CallIndirect { .. }))
        .count()
}

#[test]
fn fixing_the_first_argument() {
    let f: Add3 = add3;
    let spec = specializer_with(&[(f as usize, "add3", ADD3)]);
    let add10 = specialize(&spec, f, (10_i64, Free, Free)).expect("specialize");
    assert_eq!(add10.call(1, 2), 13);
    assert_eq!(add10.call(-10, 0), 0);
    // SAFETY: `add10` outlives every call through `raw`.
    let raw: extern "C" fn(i64, i64) -> i64 = unsafe { add10.as_fn() };
    assert_eq!(raw(5, 5), 20);

    let module = add10.module();
    assert_eq!(module.functions.len(), 1, "{module}");
    assert_eq!(add10.compiled().entry_name(), "add3.specialized");
    assert_eq!(add10.compiled().signature().params, vec![Type::I64, Type::I64]);
}

#[test]
fn no_fixed_arguments_keeps_the_signature() {
    let f: Add3 = add3;
    let spec = specializer_with(&[(f as usize, "add3", ADD3)]);
    let same = specialize(&spec, f, (Free, Free, Free)).expect("specialize");
    assert_eq!(same.call(1, 2, 3), 6);
    assert_eq!(same.compiled().signature().arity(), 3);
}

#[test]
fn all_arguments_fixed_folds_to_a_constant() {
    let f: Add3 = add3;
    let spec = specializer_with(&[(f as usize, "add3", ADD3)]);
    let six = specialize(&spec, f, (1_i64, 2_i64, 3_i64)).expect("specialize");
    assert_eq!(six.call(), 6);

    let entry = six.module().function("add3.specialized").expect("entry");
    assert_eq!(entry.blocks.len(), 1);
    assert_eq!(entry.blocks[0].instrs.len(), 1, "{}", six.module());
    assert!(matches!(entry.blocks[0].instrs[0], Instr::Const { .. }));
}

#[test]
fn fixing_a_selector_removes_the_branches() {
    let f: Mix = mix;
    let spec = specializer_with(&[(f as usize, "mix", MIX)]);
    let mul = specialize(&spec, f, (1_i64, Free, Free)).expect("specialize");
    assert_eq!(mul.call(6, 7), 42);
    let entry = mul.module().function("mix.specialized").expect("entry");
    assert_eq!(entry.blocks.len(), 1, "{}", mul.module());
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn specialized_mix_agrees_with_native(op in 0_i64..4, a in any::<i64>(), b in any::<i64>()) {
        let f: Mix = mix;
        let spec = specializer_with(&[(f as usize, "mix", MIX)]);
        let fixed = specialize(&spec, f, (op, Free, Free)).expect("specialize");
        prop_assert_eq!(fixed.call(a, b), mix(op, a, b));

        let fixed_b = specialize(&spec, f, (Free, Free, b)).expect("specialize");
        prop_assert_eq!(fixed_b.call(op, a), mix(op, a, b));
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(48))]

    #[test]
    fn any_partition_of_mixed_parameters_agrees_with_native(
        mask in 0_u8..16,
        a in any::<i8>(),
        b in any::<u16>(),
        up in any::<bool>(),
        scale in -1.0e6_f32..1.0e6,
    ) {
        let f: Mixed = mixed;
        let spec = specializer_with(&[(f as usize, "mixed", MIXED)]);
        prop_assert_eq!(call_mixed_partition(&spec, mask, a, b, up, scale), mixed(a, b, up, scale));
    }
}

#[test]
fn unsigned_and_narrow_fixed_values_keep_their_bits() {
    let f: Mixed = mixed;
    let spec = specializer_with(&[(f as usize, "mixed", MIXED)]);
    for (a, b) in [(i8::MIN, u16::MAX), (-1, 0x8000), (i8::MAX, 1)] {
        assert_eq!(
            call_mixed_partition(&spec, 0b0011, a, b, true, 0.5),
            mixed(a, b, true, 0.5)
        );
        assert_eq!(
            call_mixed_partition(&spec, 0b1111, a, b, false, -2.25),
            mixed(a, b, false, -2.25)
        );
    }
}

#[test]
fn narrow_float_conversion_saturates_like_rust() {
    let f: ToI8 = to_i8;
    let spec = specializer_with(&[(f as usize, "to_i8", TO_I8)]);
    let round = specialize(&spec, f, (Free, 0.5_f64)).expect("specialize");
    for x in [0.0, 3.7, -3.7, 126.7, 127.6, -128.9, 1e10, -1e10, f64::NAN, f64::INFINITY] {
        assert_eq!(round.call(x), to_i8(x, 0.5), "x = {x}");
    }
}

#[test]
fn registered_function_pointer_is_inlined() {
    let ap: Apply = apply;
    let dbl: extern "C" fn(i64) -> i64 = double;
    let spec = specializer_with(&[(ap as usize, "apply", APPLY), (dbl as usize, "double", DOUBLE)]);
    let doubled = specialize(&spec, ap, (dbl, Free)).expect("specialize");
    assert_eq!(doubled.call(21), 42);
    assert_eq!(calls_in(doubled.module()), 0, "{}", doubled.module());
    assert_eq!(doubled.module().functions.len(), 1);
}

#[test]
fn unregistered_function_pointer_stays_an_indirect_call() {
    let ap: Apply = apply;
    let dbl: extern "C" fn(i64) -> i64 = double;
    let spec = specializer_with(&[(ap as usize, "apply", APPLY)]);
    let doubled = specialize(&spec, ap, (dbl, Free)).expect("specialize");
    assert_eq!(doubled.call(5), 10);
    assert_eq!(calls_in(doubled.module()), 1);
}

#[test]
fn aligned_pointer_marks_accesses_aligned() {
    let data: Box<[i64; 2]> = Box::new([40, 2]);
    let f: Sum = second_plus;
    let spec = specializer_with(&[(f as usize, "second_plus", SECOND_PLUS)]);
    let ptr = Aligned::natural(data.as_ptr()).expect("aligned");
    let plus = specialize(&spec, f, (ptr, Free)).expect("specialize");
    assert_eq!(plus.call(0), 2);
    assert_eq!(plus.call(40), 42);

    let entry = plus
        .module()
        .function("second_plus.specialized")
        .expect("entry");
    let load_align = entry.blocks[0].instrs.iter().find_map(|i| match i {
        Instr::Load { align, .. } => Some(*align),
        _ => None,
    });
    assert_eq!(load_align, Some(8));
}

#[test]
fn unregistered_function_is_reported() {
    let f: Add3 = add3;
    let spec = specializer_with(&[]);
    let err = specialize(&spec, f, (1_i64, Free, Free)).unwrap_err();
    match err {
        Error::UnregisteredFunction { id } => assert_eq!(id, FunctionId::of(f)),
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn repeated_specialization_is_deterministic() {
    let f: Mix = mix;
    let spec = specializer_with(&[(f as usize, "mix", MIX)]);
    let first = extract_optimized_module(&spec, f, (2_i64, Free, Free)).expect("first");
    let second = extract_optimized_module(&spec, f, (2_i64, Free, Free)).expect("second");
    assert_eq!(first.to_string(), second.to_string());

    let a = specialize(&spec, f, (2_i64, Free, Free)).expect("a");
    let b = specialize(&spec, f, (2_i64, Free, Free)).expect("b");
    assert_ne!(a.compiled().code_ptr(), b.compiled().code_ptr());
    assert_eq!(a.call(6, 3), b.call(6, 3));
    drop(a);
    assert_eq!(b.call(6, 3), 5);
}

#[test]
fn extracted_module_is_inlinable() {
    let f: Add3 = add3;
    let spec = specializer_with(&[(f as usize, "add3", ADD3)]);
    let module = extract_optimized_module(&spec, f, (Free, 1_i64, Free)).expect("extract");
    assert!(module.functions.values().all(|f| f.attrs.always_inline && !f.attrs.opt_none));
    rejit_ir::verify_module(&module).expect("valid");
}

#[test]
fn get_module_returns_the_registered_module() {
    let f: Add3 = add3;
    let spec = specializer_with(&[(f as usize, "add3", ADD3)]);
    let module = get_module(spec.registry(), f).expect("module");
    assert_eq!(module, parse_module(ADD3).expect("parse"));

    let other: Mix = mix;
    assert!(matches!(
        get_module(spec.registry(), other),
        Err(Error::UnregisteredFunction { .. })
    ));
}

#[test]
fn dynamic_context_matches_typed_path() {
    let f: Add3 = add3;
    let spec = specializer_with(&[(f as usize, "add3", ADD3)]);
    let ctx = Context::builder(&[Type::I64, Type::I64, Type::I64])
        .fix(1, ArgValue::Int(100))
        .options(options())
        .build()
        .expect("context");
    let compiled = spec.compile(FunctionId::of(f), &ctx).expect("compile");
    let wrong = Specialized::<extern "C" fn(i64) -> i64>::new(compiled);
    assert!(matches!(wrong, Err(Error::SignatureMismatch { .. })));

    let compiled = spec.compile(FunctionId::of(f), &ctx).expect("compile");
    let plus100 = Specialized::<extern "C" fn(i64, i64) -> i64>::new(compiled).expect("wrap");
    assert_eq!(plus100.call(1, 2), 103);
}

#[test]
fn dynamic_binding_checks_types() {
    let f: Add3 = add3;
    let spec = specializer_with(&[(f as usize, "add3", ADD3)]);
    let ctx = Context::new(
        vec![
            rejit::ParamDescriptor::Fixed(rejit::FixedArg {
                value: ArgValue::Float(1.0),
                source: Type::F64,
            }),
            rejit::ParamDescriptor::Free,
            rejit::ParamDescriptor::Free,
        ],
        options(),
    );
    let err = spec.compile(FunctionId::of(f), &ctx).unwrap_err();
    assert!(matches!(err, Error::TypeBinding { index: 0, .. }));

    let short = Context::new(vec![rejit::ParamDescriptor::Free], options());
    assert!(matches!(
        spec.compile(FunctionId::of(f), &short),
        Err(Error::ArityMismatch { expected: 3, found: 1 })
    ));
}

#[test]
fn concurrent_specialization() {
    let f: Add3 = add3;
    let spec = specializer_with(&[(f as usize, "add3", ADD3)]);
    std::thread::scope(|scope| {
        let handles: Vec<_> = (0..8_i64)
            .map(|k| {
                let spec = &spec;
                scope.spawn(move || {
                    let g = specialize(spec, f, (k, Free, Free)).expect("specialize");
                    (k, g.call(1, 1))
                })
            })
            .collect();
        for handle in handles {
            let (k, result) = handle.join().expect("thread");
            assert_eq!(result, k + 2);
        }
    });
}

#[test]
fn specialized_callables_move_across_threads() {
    let f: Add3 = add3;
    let spec = specializer_with(&[(f as usize, "add3", ADD3)]);
    let add5 = specialize(&spec, f, (5_i64, Free, Free)).expect("specialize");
    let result = std::thread::spawn(move || add5.call(1, 1))
        .join()
        .expect("thread");
    assert_eq!(result, 7);
}

#[test]
fn every_level_produces_working_code() {
    let f: Mix = mix;
    let spec = specializer_with(&[(f as usize, "mix", MIX)]);
    for level in [OptLevel::None, OptLevel::Less, OptLevel::Default, OptLevel::Aggressive] {
        let opts = options().with_opt_level(level);
        let g = specialize_with(&spec, f, (0_i64, Free, Free), opts).expect("specialize");
        assert_eq!(g.call(20, 22), 42, "level {level}");
    }
}

#[test]
fn dump_dir_receives_the_optimized_module() {
    let dir = tempfile::tempdir().expect("tempdir");
    let f: Add3 = add3;
    let spec = specializer_with(&[(f as usize, "add3", ADD3)]);
    let opts = options().with_dump_dir(dir.path().join("dumps"));
    let g = specialize_with(&spec, f, (1_i64, Free, Free), opts).expect("specialize");

    let dumps: Vec<_> = std::fs::read_dir(dir.path().join("dumps"))
        .expect("dump dir")
        .map(|e| e.expect("entry").path())
        .collect();
    assert_eq!(dumps.len(), 1);
    let text = std::fs::read_to_string(&dumps[0]).expect("read dump");
    assert_eq!(&parse_module(&text).expect("parse dump"), g.module());
}

#[test]
fn foreign_target_can_be_optimized_but_not_run() {
    let f: Add3 = add3;
    let spec = specializer_with(&[(f as usize, "add3", ADD3)]);
    let foreign = "s390x-unknown-linux-gnu".parse::<Target>().expect("target");
    let opts = options().with_target(foreign);
    let err = specialize_with(&spec, f, (1_i64, Free, Free), opts).unwrap_err();
    assert!(matches!(err, Error::Codegen(_)), "{err}");
}

extern "C" fn host_triple(x: i64) -> i64 {
    x.wrapping_mul(3)
}

const SCALED: &str = r#"module "scaled"

extern @host_triple(i64) -> i64

fn @scaled(i64, i64) -> i64 export optnone {
bb0(%0: i64, %1: i64):
  %2 = call @host_triple(%0) -> i64
  %3 = add i64 %2, %1
  return %3
}
"#;

#[test]
fn undominated_uses_are_refused_at_registration() {
    let source = r#"module "split"

fn @split(bool, i64) -> i64 export {
bb0(%0: bool, %1: i64):
  br %0, bb1, bb2
bb1:
  %3 = add i64 %2, %1
  jump bb3(%3)
bb2:
  %2 = add i64 %1, %1
  jump bb3(%2)
bb3(%4: i64):
  return %4
}
"#;
    let registry = Registry::new();
    let id = FunctionId::from_addr(0x5150);
    let err = unsafe { registry.register(id, "split", parse_module(source).expect("parse")) }
        .unwrap_err();
    assert!(err.to_string().contains("not dominated"), "{err}");

    let spec = Specializer::with_options(Arc::new(registry), options().with_verify(false));
    let ctx = Context::builder(&[Type::Bool, Type::I64]).build().expect("context");
    assert!(matches!(
        spec.compile(id, &ctx),
        Err(Error::UnregisteredFunction { .. })
    ));
}

#[test]
fn raw_host_symbols_are_trusted_but_typed_ones_are_checked() {
    let registry = Registry::new();
    let scaled: extern "C" fn(i64, i64) -> i64 = {
        extern "C" fn scaled(x: i64, y: i64) -> i64 {
            host_triple(x).wrapping_add(y)
        }
        scaled
    };
    // SAFETY: SCALED mirrors `scaled`, and `host_triple` has the declared
    // signature.
    unsafe {
        registry
            .register_fn(scaled, "scaled", parse_module(SCALED).expect("parse"))
            .expect("register");
        registry
            .register_symbol("host_triple", host_triple as extern "C" fn(i64) -> i64 as usize)
            .expect("symbol");
    }
    let spec = Specializer::with_options(Arc::new(registry), options());
    let g = specialize(&spec, scaled, (Free, 5_i64)).expect("specialize");
    assert_eq!(g.call(4), 17);

    let typed = Registry::new();
    unsafe { typed.register_fn(scaled, "scaled", parse_module(SCALED).expect("parse")) }
        .expect("register");
    typed
        .register_symbol_fn("host_triple", add3 as Add3)
        .expect("symbol");
    let spec = Specializer::with_options(Arc::new(typed), options());
    let err = specialize(&spec, scaled, (Free, 5_i64)).unwrap_err();
    assert!(matches!(err, Error::Codegen(_)), "{err}");
}

#[test]
fn host_symbols_are_linked_by_name() {
    let registry = Registry::new();
    let scaled: extern "C" fn(i64, i64) -> i64 = {
        extern "C" fn scaled(x: i64, y: i64) -> i64 {
            host_triple(x).wrapping_add(y)
        }
        scaled
    };
    // SAFETY: SCALED mirrors `scaled`.
    unsafe { registry.register_fn(scaled, "scaled", parse_module(SCALED).expect("parse")) }
        .expect("register");
    let spec = Specializer::with_options(Arc::new(registry), options());

    let err = specialize(&spec, scaled, (Free, 1_i64)).unwrap_err();
    assert!(matches!(err, Error::Codegen(_)), "{err}");

    spec.registry()
        .register_symbol_fn("host_triple", host_triple as extern "C" fn(i64) -> i64)
        .expect("symbol");
    let g = specialize(&spec, scaled, (Free, 1_i64)).expect("specialize");
    assert_eq!(g.call(2), 7);
    assert_eq!(g.call(2), scaled(2, 1));
}
