use std::path::Path;
use std::process::{Command, Output};

const POLY: &str = r#"module "poly"

fn @poly(i64, i64, bool) -> i64 export optnone {
bb0(%0: i64, %1: i64, %2: bool):
  br %2, bb1, bb2
bb1:
  %3 = mul i64 %0, %0
  %4 = add i64 %3, %1
  return %4
bb2:
  %5 = sub i64 %0, %1
  return %5
}
"#;

fn rejit(args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_rejit"))
        .args(args)
        .env_remove("REJIT_OPT_LEVEL")
        .env_remove("REJIT_TARGET")
        .env_remove("REJIT_DUMP_DIR")
        .env("REJIT_VERIFY", "1")
        .output()
        .expect("spawn rejit")
}

fn stdout(output: &Output) -> String {
    assert!(
        output.status.success(),
        "rejit failed: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    String::from_utf8(output.stdout.clone()).expect("utf-8 stdout")
}

fn write_poly(dir: &Path) -> String {
    let path = dir.join("poly.rjir");
    std::fs::write(&path, POLY).expect("write module");
    path.to_string_lossy().into_owned()
}

#[test]
fn print_and_verify_text_module() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = write_poly(dir.path());
    let printed = stdout(&rejit(&["print", &path]));
    assert_eq!(
        rejit_ir::parse_module(&printed).expect("parse output"),
        rejit_ir::parse_module(POLY).expect("parse input")
    );
    assert!(stdout(&rejit(&["verify", &path])).contains("ok (1 functions, 0 externs)"));
}

#[test]
fn convert_round_trips_through_binary() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = write_poly(dir.path());
    let binary = dir.path().join("poly.rjb").to_string_lossy().into_owned();
    let text = dir.path().join("back.rjir").to_string_lossy().into_owned();

    stdout(&rejit(&["convert", &path, &binary]));
    assert!(std::fs::read(&binary).expect("binary").starts_with(b"RJIT"));
    stdout(&rejit(&["convert", &binary, &text]));
    let back = std::fs::read_to_string(&text).expect("text");
    assert_eq!(
        rejit_ir::parse_module(&back).expect("parse back"),
        rejit_ir::parse_module(POLY).expect("parse input")
    );

    let bad = rejit(&["convert", &path, "out.txt"]);
    assert_eq!(bad.status.code(), Some(2));
}

#[test]
fn specialize_prints_the_folded_module() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = write_poly(dir.path());
    let printed = stdout(&rejit(&["specialize", &path, "poly", "_", "_", "true", "-O2"]));
    let module = rejit_ir::parse_module(&printed).expect("parse output");
    let entry = module.function("poly.specialized").expect("entry");
    assert_eq!(entry.signature.params.len(), 2);
    assert_eq!(entry.blocks.len(), 1, "{printed}");
    assert!(module.function("poly").is_none());
}

#[test]
fn run_evaluates_fully_fixed_calls() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = write_poly(dir.path());
    assert_eq!(stdout(&rejit(&["run", &path, "poly", "7", "1", "true"])).trim(), "50");
    assert_eq!(stdout(&rejit(&["run", &path, "poly", "7", "10", "false", "-O0"])).trim(), "-3");
}

#[test]
fn usage_errors_exit_with_two() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = write_poly(dir.path());
    assert_eq!(rejit(&["run", &path, "poly", "7", "_", "true"]).status.code(), Some(2));
    assert_eq!(rejit(&["run", &path, "missing"]).status.code(), Some(2));
    assert_eq!(rejit(&["frobnicate"]).status.code(), Some(2));
    let missing = rejit(&["print", "/definitely/not/here.rjir"]);
    assert_eq!(missing.status.code(), Some(1));
}
