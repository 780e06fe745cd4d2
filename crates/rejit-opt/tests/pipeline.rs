use rejit_ir::{Instr, Terminator, parse_module, verify_module};
use rejit_opt::{OptLevel, PassManager, PipelineConfig, SimplifyCfg, optimize};

/// `select_op(op, a, b)` picks an operation by code; `entry` has `op` fixed
/// to 1 the way a specialized clone would.
const DISPATCH: &str = r#"module "dispatch"

fn @select_op(i64, i64, i64) -> i64 internal {
bb0(%0: i64, %1: i64, %2: i64):
  %3 = const i64 0
  %4 = cmp eq i64 %0, %3
  br %4, bb1, bb2
bb1:
  %5 = add i64 %1, %2
  return %5
bb2:
  %6 = mul i64 %1, %2
  return %6
}

fn @entry(i64, i64) -> i64 export {
bb0(%0: i64, %1: i64):
  %2 = const i64 1
  %3 = call @select_op(%2, %0, %1) -> i64
  return %3
}
"#;

#[test]
fn default_level_reduces_dispatch_to_straight_line_code() {
    let mut module = parse_module(DISPATCH).expect("parse");
    let stats = optimize(
        &mut module,
        &PipelineConfig {
            level: OptLevel::Default,
            inline_threshold: None,
            verify: true,
        },
    )
    .expect("optimize");
    verify_module(&module).expect("valid");

    assert!(stats.instrs_after < stats.instrs_before);
    assert!(module.function("select_op").is_none(), "helper should be removed");
    let entry = module.function("entry").expect("entry");
    assert_eq!(entry.blocks.len(), 1);
    let instrs = &entry.blocks[0].instrs;
    assert_eq!(instrs.len(), 1, "{module}");
    assert!(matches!(instrs[0], Instr::Binary { op: rejit_ir::BinOp::Mul, .. }));
    assert!(matches!(entry.blocks[0].terminator, Terminator::Return { value: Some(_) }));
}

#[test]
fn level_none_keeps_non_mandatory_calls() {
    let mut module = parse_module(DISPATCH).expect("parse");
    optimize(
        &mut module,
        &PipelineConfig {
            level: OptLevel::None,
            ..PipelineConfig::default()
        },
    )
    .expect("optimize");
    assert!(module.function("select_op").is_some());
}

#[test]
fn explicit_threshold_overrides_level() {
    let mut module = parse_module(DISPATCH).expect("parse");
    optimize(
        &mut module,
        &PipelineConfig {
            level: OptLevel::Default,
            inline_threshold: Some(1),
            verify: true,
        },
    )
    .expect("optimize");
    assert!(module.function("select_op").is_some());
}

#[test]
fn optimization_is_deterministic() {
    let run = || {
        let mut module = parse_module(DISPATCH).expect("parse");
        optimize(&mut module, &PipelineConfig::default()).expect("optimize");
        module.to_string()
    };
    assert_eq!(run(), run());
}

#[test]
fn pass_manager_reports_fixpoint_rounds() {
    let mut module = parse_module(DISPATCH).expect("parse");
    let mut pm = PassManager::new();
    pm.add_pass(SimplifyCfg);
    assert_eq!(pm.pass_names(), vec!["simplify-cfg"]);
    // Nothing to simplify without constants: the first round is already stable.
    assert_eq!(pm.run_to_fixpoint(&mut module, 5).expect("run"), 1);
}
