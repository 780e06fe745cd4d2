use rejit_ir::{BlockId, Function, Module, ValueId};

use crate::{OptError, Pass, for_each_optimizable};

/// Removes side-effect-free instructions whose results are never used, and
/// parameters of non-entry blocks that nothing reads.
#[derive(Debug, Default)]
pub struct DeadCode;

impl Pass for DeadCode {
    fn name(&self) -> &'static str {
        "dce"
    }

    fn run(&mut self, module: &mut Module) -> Result<bool, OptError> {
        Ok(for_each_optimizable(module, eliminate))
    }
}

fn eliminate(func: &mut Function) -> bool {
    let mut changed = false;
    loop {
        let uses = func.use_counts();
        let used = |v: ValueId| uses.get(&v).copied().unwrap_or(0) > 0;
        let mut round = false;

        for block in &mut func.blocks {
            let before = block.instrs.len();
            block.instrs.retain(|instr| {
                instr.has_side_effects() || instr.result().is_none_or(used)
            });
            round |= block.instrs.len() != before;
        }

        for index in 1..func.blocks.len() {
            let dead: Vec<bool> = func.blocks[index]
                .params
                .iter()
                .map(|p| !used(p.value))
                .collect();
            if !dead.contains(&true) {
                continue;
            }
            let target = BlockId(index as u32);
            let mut keep = dead.iter().map(|d| !d);
            func.blocks[index].params.retain(|_| keep.next().unwrap_or(true));
            for block in &mut func.blocks {
                for (dest, args) in block.terminator.edges_mut() {
                    if dest == target {
                        let mut keep = dead.iter().map(|d| !d);
                        args.retain(|_| keep.next().unwrap_or(true));
                    }
                }
            }
            round = true;
        }

        if !round {
            return changed;
        }
        changed = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rejit_ir::{BinOp, FunctionBuilder, Signature, Type, parse_module, verify_module};

    #[test]
    fn removes_unused_arithmetic_but_keeps_stores() {
        let mut m = Module::new("m");
        let mut b = FunctionBuilder::new("f", Signature::new(vec![Type::Ptr, Type::I64], None));
        let p = b.param(0);
        let x = b.param(1);
        let dead = b.binary(BinOp::Mul, Type::I64, x, x);
        let _dead2 = b.binary(BinOp::Add, Type::I64, dead, x);
        b.store(Type::I64, x, p, 0, 8);
        b.ret(None);
        m.add_function(b.finish().expect("f")).expect("add");

        assert!(DeadCode.run(&mut m).expect("run"));
        let f = m.function("f").expect("f");
        assert_eq!(f.blocks[0].instrs.len(), 1);
        assert!(!DeadCode.run(&mut m).expect("second run"));
    }

    #[test]
    fn drops_unread_block_params_and_edge_args() {
        let mut m = parse_module(
            "module \"m\"\n\
             fn @f(i64) -> i64 export {\n\
             bb0(%0: i64):\n  %1 = const i64 7\n  jump bb1(%0, %1)\n\
             bb1(%2: i64, %3: i64):\n  return %2\n}\n",
        )
        .expect("parse");
        assert!(DeadCode.run(&mut m).expect("run"));
        verify_module(&m).expect("valid");
        let f = m.function("f").expect("f");
        assert_eq!(f.blocks[1].params.len(), 1);
        assert!(f.blocks[0].instrs.is_empty());
    }
}
