use crate::error::IrError;
use crate::function::{Block, BlockParam, FnAttrs, Function, Linkage};
use crate::instr::{BinOp, CastOp, CmpOp, Constant, Instr, Terminator, UnOp};
use crate::types::{Signature, Type};
use crate::value::{BlockId, ValueId};

/// Incremental construction of a [`Function`].
///
/// Call order:
/// 1. `new()` creates the entry block with one parameter per signature type
/// 2. `create_block()` / `append_block_param()` for the remaining blocks
/// 3. `switch_to_block()` then emit instructions and one terminator per block
/// 4. `finish()` checks that every block was terminated
pub struct FunctionBuilder {
    func: Function,
    current: BlockId,
    terminated: Vec<bool>,
}

impl FunctionBuilder {
    pub fn new(name: impl Into<String>, signature: Signature) -> Self {
        let mut func = Function {
            name: name.into(),
            signature,
            linkage: Linkage::Export,
            attrs: FnAttrs::default(),
            blocks: vec![Block::new(BlockId(0))],
            next_value: 0,
        };
        let params = func.signature.params.clone();
        for ty in params {
            let value = func.fresh_value();
            func.blocks[0].params.push(BlockParam { value, ty });
        }
        Self {
            func,
            current: BlockId(0),
            terminated: vec![false],
        }
    }

    pub fn linkage(&mut self, linkage: Linkage) -> &mut Self {
        self.func.linkage = linkage;
        self
    }

    pub fn attrs(&mut self, attrs: FnAttrs) -> &mut Self {
        self.func.attrs = attrs;
        self
    }

    /// The `index`-th function parameter.
    pub fn param(&self, index: usize) -> ValueId {
        self.func.blocks[0].params[index].value
    }

    pub fn create_block(&mut self) -> BlockId {
        self.terminated.push(false);
        self.func.push_block()
    }

    pub fn append_block_param(&mut self, block: BlockId, ty: Type) -> ValueId {
        let value = self.func.fresh_value();
        self.func.blocks[block.index()]
            .params
            .push(BlockParam { value, ty });
        value
    }

    pub fn switch_to_block(&mut self, block: BlockId) {
        self.current = block;
    }

    pub fn current_block(&self) -> BlockId {
        self.current
    }

    pub fn is_terminated(&self) -> bool {
        self.terminated[self.current.index()]
    }

    fn push(&mut self, instr: Instr) {
        debug_assert!(
            !self.is_terminated(),
            "instruction emitted into terminated block {}",
            self.current
        );
        self.func.blocks[self.current.index()].instrs.push(instr);
    }

    fn terminate(&mut self, terminator: Terminator) {
        debug_assert!(
            !self.is_terminated(),
            "block {} terminated twice",
            self.current
        );
        self.func.blocks[self.current.index()].terminator = terminator;
        self.terminated[self.current.index()] = true;
    }

    pub fn constant(&mut self, value: Constant) -> ValueId {
        let result = self.func.fresh_value();
        self.push(Instr::Const { result, value });
        result
    }

    pub fn iconst(&mut self, ty: Type, value: i64) -> ValueId {
        self.constant(Constant::int(ty, value))
    }

    pub fn fconst(&mut self, ty: Type, value: f64) -> ValueId {
        self.constant(Constant::float(ty, value))
    }

    pub fn bconst(&mut self, value: bool) -> ValueId {
        self.constant(Constant::Bool(value))
    }

    pub fn binary(&mut self, op: BinOp, ty: Type, lhs: ValueId, rhs: ValueId) -> ValueId {
        let result = self.func.fresh_value();
        self.push(Instr::Binary {
            result,
            op,
            ty,
            lhs,
            rhs,
        });
        result
    }

    pub fn unary(&mut self, op: UnOp, ty: Type, operand: ValueId) -> ValueId {
        let result = self.func.fresh_value();
        self.push(Instr::Unary {
            result,
            op,
            ty,
            operand,
        });
        result
    }

    pub fn cmp(&mut self, op: CmpOp, ty: Type, lhs: ValueId, rhs: ValueId) -> ValueId {
        let result = self.func.fresh_value();
        self.push(Instr::Cmp {
            result,
            op,
            ty,
            lhs,
            rhs,
        });
        result
    }

    pub fn cast(&mut self, op: CastOp, from: Type, to: Type, operand: ValueId) -> ValueId {
        let result = self.func.fresh_value();
        self.push(Instr::Cast {
            result,
            op,
            from,
            to,
            operand,
        });
        result
    }

    pub fn select(
        &mut self,
        ty: Type,
        cond: ValueId,
        then_value: ValueId,
        else_value: ValueId,
    ) -> ValueId {
        let result = self.func.fresh_value();
        self.push(Instr::Select {
            result,
            ty,
            cond,
            then_value,
            else_value,
        });
        result
    }

    pub fn load(&mut self, ty: Type, addr: ValueId, offset: i32, align: u32) -> ValueId {
        let result = self.func.fresh_value();
        self.push(Instr::Load {
            result,
            ty,
            addr,
            offset,
            align,
        });
        result
    }

    pub fn store(&mut self, ty: Type, value: ValueId, addr: ValueId, offset: i32, align: u32) {
        self.push(Instr::Store {
            ty,
            value,
            addr,
            offset,
            align,
        });
    }

    pub fn ptradd(&mut self, base: ValueId, offset: ValueId) -> ValueId {
        let result = self.func.fresh_value();
        self.push(Instr::PtrAdd {
            result,
            base,
            offset,
        });
        result
    }

    pub fn func_addr(&mut self, name: impl Into<String>) -> ValueId {
        let result = self.func.fresh_value();
        self.push(Instr::FuncAddr {
            result,
            name: name.into(),
        });
        result
    }

    /// Direct call; returns the result value when `ret` is `Some`.
    pub fn call(
        &mut self,
        callee: impl Into<String>,
        ret: Option<Type>,
        args: &[ValueId],
    ) -> Option<ValueId> {
        let result = ret.map(|_| self.func.fresh_value());
        self.push(Instr::Call {
            result,
            ret,
            callee: callee.into(),
            args: args.to_vec(),
        });
        result
    }

    pub fn call_indirect(
        &mut self,
        signature: Signature,
        callee: ValueId,
        args: &[ValueId],
    ) -> Option<ValueId> {
        let result = signature.ret.map(|_| self.func.fresh_value());
        self.push(Instr::CallIndirect {
            result,
            signature,
            callee,
            args: args.to_vec(),
        });
        result
    }

    pub fn jump(&mut self, dest: BlockId, args: &[ValueId]) {
        self.terminate(Terminator::Jump {
            dest,
            args: args.to_vec(),
        });
    }

    pub fn branch(
        &mut self,
        cond: ValueId,
        then_dest: BlockId,
        then_args: &[ValueId],
        else_dest: BlockId,
        else_args: &[ValueId],
    ) {
        self.terminate(Terminator::Branch {
            cond,
            then_dest,
            then_args: then_args.to_vec(),
            else_dest,
            else_args: else_args.to_vec(),
        });
    }

    pub fn ret(&mut self, value: Option<ValueId>) {
        self.terminate(Terminator::Return { value });
    }

    pub fn unreachable(&mut self) {
        self.terminate(Terminator::Unreachable);
    }

    /// Consumes the builder. Fails if any block was left without a terminator.
    pub fn finish(self) -> Result<Function, IrError> {
        if let Some(index) = self.terminated.iter().position(|done| !done) {
            return Err(IrError::Unterminated {
                function: self.func.name,
                block: BlockId(index as u32),
            });
        }
        Ok(self.func)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entry_params_follow_signature() {
        let b = FunctionBuilder::new("f", Signature::new(vec![Type::I32, Type::F64], None));
        assert_eq!(b.param(0), ValueId(0));
        assert_eq!(b.param(1), ValueId(1));
    }

    #[test]
    fn unterminated_block_is_an_error() {
        let mut b = FunctionBuilder::new("f", Signature::default());
        let dangling = b.create_block();
        b.ret(None);
        let err = b.finish().unwrap_err();
        assert!(matches!(err, IrError::Unterminated { block, .. } if block == dangling));
    }
}
