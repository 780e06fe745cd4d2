use rejit_ir::{Linkage, Module};
use rustc_hash::FxHashSet;

use crate::{OptError, Pass};

/// Drops internal functions and extern declarations that no exported
/// function can reach through calls or `funcaddr`.
#[derive(Debug, Default)]
pub struct GlobalDeadCode;

impl Pass for GlobalDeadCode {
    fn name(&self) -> &'static str {
        "global-dce"
    }

    fn run(&mut self, module: &mut Module) -> Result<bool, OptError> {
        let mut live: FxHashSet<String> = FxHashSet::default();
        let mut work: Vec<String> = module
            .functions
            .values()
            .filter(|f| f.linkage == Linkage::Export)
            .map(|f| f.name.clone())
            .collect();
        while let Some(name) = work.pop() {
            if !live.insert(name.clone()) {
                continue;
            }
            if let Some(func) = module.function(&name) {
                work.extend(
                    func.referenced_symbols()
                        .into_iter()
                        .filter(|s| !live.contains(*s))
                        .map(str::to_owned),
                );
            }
        }

        let before = (module.functions.len(), module.externs.len());
        module.functions.retain(|name, _| live.contains(name));
        module.externs.retain(|e| live.contains(&e.name));
        let changed = before != (module.functions.len(), module.externs.len());
        if changed {
            tracing::debug!(
                functions = module.functions.len(),
                externs = module.externs.len(),
                "removed unreachable symbols"
            );
        }
        Ok(changed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rejit_ir::parse_module;

    #[test]
    fn keeps_only_what_exports_reach() {
        let mut m = parse_module(
            "module \"m\"\n\
extern @used() -> i64\n\
extern @unused() -> i64\n\
fn @dead() -> i64 internal {\nbb0:\n  %0 = call @unused() -> i64\n  return %0\n}\n\
fn @helper() -> i64 internal {\nbb0:\n  %0 = call @used() -> i64\n  return %0\n}\n\
fn @by_address() -> ptr internal {\nbb0:\n  %0 = funcaddr @helper\n  return %0\n}\n\
fn @root() -> ptr export {\nbb0:\n  %0 = call @by_address() -> ptr\n  return %0\n}\n",
        )
        .expect("parse");
        assert!(GlobalDeadCode.run(&mut m).expect("run"));
        let names: Vec<&str> = m.functions.keys().map(String::as_str).collect();
        assert_eq!(names, vec!["helper", "by_address", "root"]);
        assert_eq!(m.externs.len(), 1);
        assert_eq!(m.externs[0].name, "used");
        assert!(!GlobalDeadCode.run(&mut m).expect("idempotent"));
    }
}
