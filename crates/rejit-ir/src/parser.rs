//! Reader for the textual IR produced by the `Display` impls in `printer`.

use crate::error::IrError;
use crate::function::{Block, BlockParam, FnAttrs, Function, Linkage};
use crate::instr::{BinOp, CastOp, CmpOp, Constant, Instr, Terminator, UnOp};
use crate::module::Module;
use crate::types::{Signature, Type};
use crate::value::{BlockId, ValueId};

pub fn parse_module(source: &str) -> Result<Module, IrError> {
    let tokens = Lexer::new(source).tokenize()?;
    Parser { tokens, pos: 0 }.module()
}

#[derive(Debug, Clone, PartialEq)]
enum Tok {
    Ident(String),
    Global(String),
    Value(u32),
    Number(String),
    Str(String),
    LParen,
    RParen,
    LBrace,
    RBrace,
    Comma,
    Colon,
    Equals,
    Arrow,
    Eof,
}

impl Tok {
    fn describe(&self) -> String {
        match self {
            Tok::Ident(s) => format!("`{s}`"),
            Tok::Global(s) => format!("`@{s}`"),
            Tok::Value(n) => format!("`%{n}`"),
            Tok::Number(s) => format!("number `{s}`"),
            Tok::Str(s) => format!("string {s:?}"),
            Tok::LParen => "`(`".into(),
            Tok::RParen => "`)`".into(),
            Tok::LBrace => "`{`".into(),
            Tok::RBrace => "`}`".into(),
            Tok::Comma => "`,`".into(),
            Tok::Colon => "`:`".into(),
            Tok::Equals => "`=`".into(),
            Tok::Arrow => "`->`".into(),
            Tok::Eof => "end of input".into(),
        }
    }
}

#[derive(Debug, Clone)]
struct Token {
    tok: Tok,
    line: usize,
    column: usize,
}

fn is_symbol_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '$')
}

struct Lexer<'a> {
    chars: std::iter::Peekable<std::str::Chars<'a>>,
    line: usize,
    column: usize,
}

impl<'a> Lexer<'a> {
    fn new(source: &'a str) -> Self {
        Self {
            chars: source.chars().peekable(),
            line: 1,
            column: 1,
        }
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.chars.next()?;
        if c == '\n' {
            self.line += 1;
            self.column = 1;
        } else {
            self.column += 1;
        }
        Some(c)
    }

    fn error(&self, line: usize, column: usize, message: impl Into<String>) -> IrError {
        IrError::Parse {
            line,
            column,
            message: message.into(),
        }
    }

    fn take_while(&mut self, mut pred: impl FnMut(char) -> bool) -> String {
        let mut out = String::new();
        while let Some(&c) = self.chars.peek() {
            if !pred(c) {
                break;
            }
            out.push(c);
            self.bump();
        }
        out
    }

    fn number(&mut self, first: char) -> String {
        let mut out = String::from(first);
        while let Some(&c) = self.chars.peek() {
            let exponent_sign = matches!(c, '+' | '-') && out.ends_with(['e', 'E']);
            if !(c.is_ascii_alphanumeric() || matches!(c, '.' | '_') || exponent_sign) {
                break;
            }
            out.push(c);
            self.bump();
        }
        out
    }

    fn string(&mut self, line: usize, column: usize) -> Result<String, IrError> {
        let mut out = String::new();
        loop {
            match self.bump() {
                None => return Err(self.error(line, column, "unterminated string")),
                Some('"') => return Ok(out),
                Some('\\') => match self.bump() {
                    Some('n') => out.push('\n'),
                    Some('t') => out.push('\t'),
                    Some('r') => out.push('\r'),
                    Some('0') => out.push('\0'),
                    Some(c @ ('\\' | '"' | '\'')) => out.push(c),
                    Some('u') => {
                        if self.bump() != Some('{') {
                            return Err(self.error(self.line, self.column, "expected `{` after `\\u`"));
                        }
                        let hex = self.take_while(|c| c != '}');
                        self.bump();
                        let ch = u32::from_str_radix(&hex, 16)
                            .ok()
                            .and_then(char::from_u32)
                            .ok_or_else(|| {
                                self.error(self.line, self.column, format!("bad escape `\\u{{{hex}}}`"))
                            })?;
                        out.push(ch);
                    }
                    other => {
                        return Err(self.error(
                            self.line,
                            self.column,
                            format!("unknown escape {other:?}"),
                        ));
                    }
                },
                Some(c) => out.push(c),
            }
        }
    }

    fn tokenize(mut self) -> Result<Vec<Token>, IrError> {
        let mut tokens = Vec::new();
        loop {
            let (line, column) = (self.line, self.column);
            let Some(c) = self.bump() else {
                tokens.push(Token {
                    tok: Tok::Eof,
                    line,
                    column,
                });
                return Ok(tokens);
            };
            let tok = match c {
                c if c.is_whitespace() => continue,
                ';' => {
                    self.take_while(|c| c != '\n');
                    continue;
                }
                '(' => Tok::LParen,
                ')' => Tok::RParen,
                '{' => Tok::LBrace,
                '}' => Tok::RBrace,
                ',' => Tok::Comma,
                ':' => Tok::Colon,
                '=' => Tok::Equals,
                '"' => Tok::Str(self.string(line, column)?),
                '-' if self.chars.peek() == Some(&'>') => {
                    self.bump();
                    Tok::Arrow
                }
                '-' => Tok::Number(self.number('-')),
                c if c.is_ascii_digit() => Tok::Number(self.number(c)),
                '%' => {
                    let digits = self.take_while(|c| c.is_ascii_digit());
                    let n = digits
                        .parse()
                        .map_err(|_| self.error(line, column, "expected value number after `%`"))?;
                    Tok::Value(n)
                }
                '@' => {
                    let name = self.take_while(is_symbol_char);
                    if name.is_empty() {
                        return Err(self.error(line, column, "expected symbol name after `@`"));
                    }
                    Tok::Global(name)
                }
                c if c.is_ascii_alphabetic() || c == '_' => {
                    let mut ident = String::from(c);
                    ident.push_str(&self.take_while(is_symbol_char));
                    Tok::Ident(ident)
                }
                other => return Err(self.error(line, column, format!("unexpected character {other:?}"))),
            };
            tokens.push(Token { tok, line, column });
        }
    }
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> &Tok {
        &self.tokens[self.pos.min(self.tokens.len() - 1)].tok
    }

    fn next(&mut self) -> Tok {
        let tok = self.peek().clone();
        if self.pos < self.tokens.len() - 1 {
            self.pos += 1;
        }
        tok
    }

    fn error(&self, message: impl Into<String>) -> IrError {
        let token = &self.tokens[self.pos.min(self.tokens.len() - 1)];
        IrError::Parse {
            line: token.line,
            column: token.column,
            message: message.into(),
        }
    }

    fn unexpected(&self, wanted: &str) -> IrError {
        self.error(format!("expected {wanted}, found {}", self.peek().describe()))
    }

    fn eat(&mut self, tok: &Tok) -> bool {
        if self.peek() == tok {
            self.next();
            true
        } else {
            false
        }
    }

    fn expect(&mut self, tok: Tok) -> Result<(), IrError> {
        if self.eat(&tok) {
            Ok(())
        } else {
            Err(self.unexpected(&tok.describe()))
        }
    }

    fn eat_keyword(&mut self, keyword: &str) -> bool {
        if matches!(self.peek(), Tok::Ident(s) if s == keyword) {
            self.next();
            true
        } else {
            false
        }
    }

    fn keyword(&mut self, keyword: &str) -> Result<(), IrError> {
        if self.eat_keyword(keyword) {
            Ok(())
        } else {
            Err(self.unexpected(&format!("`{keyword}`")))
        }
    }

    fn ident(&mut self) -> Result<String, IrError> {
        match self.peek() {
            Tok::Ident(s) => {
                let s = s.clone();
                self.next();
                Ok(s)
            }
            _ => Err(self.unexpected("identifier")),
        }
    }

    fn global(&mut self) -> Result<String, IrError> {
        match self.peek() {
            Tok::Global(s) => {
                let s = s.clone();
                self.next();
                Ok(s)
            }
            _ => Err(self.unexpected("`@symbol`")),
        }
    }

    fn value(&mut self) -> Result<ValueId, IrError> {
        match self.peek() {
            Tok::Value(n) => {
                let n = *n;
                self.next();
                Ok(ValueId(n))
            }
            _ => Err(self.unexpected("value")),
        }
    }

    fn ty(&mut self) -> Result<Type, IrError> {
        match self.peek() {
            Tok::Ident(s) => match Type::from_name(s) {
                Some(ty) => {
                    self.next();
                    Ok(ty)
                }
                None => Err(self.error(format!("unknown type `{s}`"))),
            },
            _ => Err(self.unexpected("type")),
        }
    }

    fn integer<T: std::str::FromStr>(&mut self) -> Result<T, IrError> {
        match self.peek() {
            Tok::Number(s) => match s.parse() {
                Ok(n) => {
                    self.next();
                    Ok(n)
                }
                Err(_) => Err(self.error(format!("invalid integer `{s}`"))),
            },
            _ => Err(self.unexpected("integer")),
        }
    }

    fn block_id(&mut self) -> Result<BlockId, IrError> {
        match self.peek() {
            Tok::Ident(s) => match s.strip_prefix("bb").and_then(|n| n.parse().ok()) {
                Some(n) => {
                    self.next();
                    Ok(BlockId(n))
                }
                None => Err(self.unexpected("block label")),
            },
            _ => Err(self.unexpected("block label")),
        }
    }

    fn comma_list<T>(
        &mut self,
        close: Tok,
        mut item: impl FnMut(&mut Self) -> Result<T, IrError>,
    ) -> Result<Vec<T>, IrError> {
        let mut out = Vec::new();
        if self.eat(&close) {
            return Ok(out);
        }
        loop {
            out.push(item(self)?);
            if self.eat(&close) {
                return Ok(out);
            }
            self.expect(Tok::Comma)?;
        }
    }

    fn signature(&mut self) -> Result<Signature, IrError> {
        self.expect(Tok::LParen)?;
        let params = self.comma_list(Tok::RParen, Self::ty)?;
        let ret = if self.eat(&Tok::Arrow) {
            Some(self.ty()?)
        } else {
            None
        };
        Ok(Signature::new(params, ret))
    }

    fn module(mut self) -> Result<Module, IrError> {
        self.keyword("module")?;
        let name = match self.next() {
            Tok::Str(s) => s,
            _ => {
                self.pos = self.pos.saturating_sub(1);
                return Err(self.unexpected("module name string"));
            }
        };
        let mut module = Module::new(name);
        loop {
            if self.eat(&Tok::Eof) || *self.peek() == Tok::Eof {
                return Ok(module);
            }
            if self.eat_keyword("extern") {
                let name = self.global()?;
                let signature = self.signature()?;
                module.declare_extern(name, signature)?;
            } else if self.eat_keyword("fn") {
                let func = self.function()?;
                module.add_function(func)?;
            } else {
                return Err(self.unexpected("`fn` or `extern`"));
            }
        }
    }

    fn function(&mut self) -> Result<Function, IrError> {
        let name = self.global()?;
        let signature = self.signature()?;
        let linkage = if self.eat_keyword("export") {
            Linkage::Export
        } else if self.eat_keyword("internal") {
            Linkage::Internal
        } else {
            return Err(self.unexpected("`export` or `internal`"));
        };
        let mut attrs = FnAttrs::default();
        loop {
            if self.eat_keyword("alwaysinline") {
                attrs.always_inline = true;
            } else if self.eat_keyword("noinline") {
                attrs.no_inline = true;
            } else if self.eat_keyword("optnone") {
                attrs.opt_none = true;
            } else {
                break;
            }
        }
        self.expect(Tok::LBrace)?;
        let mut blocks = Vec::new();
        while !self.eat(&Tok::RBrace) {
            let expected = BlockId(blocks.len() as u32);
            let id = self.block_id()?;
            if id != expected {
                return Err(self.error(format!("expected label {expected}, found {id}")));
            }
            blocks.push(self.block(id)?);
        }
        if blocks.is_empty() {
            return Err(self.error(format!("function @{name} has no blocks")));
        }
        let next_value = blocks
            .iter()
            .flat_map(|b: &Block| b.defs())
            .map(|v| v.0 + 1)
            .max()
            .unwrap_or(0);
        Ok(Function {
            name,
            signature,
            linkage,
            attrs,
            blocks,
            next_value,
        })
    }

    fn block(&mut self, id: BlockId) -> Result<Block, IrError> {
        let mut block = Block::new(id);
        if self.eat(&Tok::LParen) {
            block.params = self.comma_list(Tok::RParen, |p| {
                let value = p.value()?;
                p.expect(Tok::Colon)?;
                let ty = p.ty()?;
                Ok(BlockParam { value, ty })
            })?;
        }
        self.expect(Tok::Colon)?;
        loop {
            if let Some(terminator) = self.terminator()? {
                block.terminator = terminator;
                return Ok(block);
            }
            block.instrs.push(self.instr()?);
        }
    }

    fn target(&mut self) -> Result<(BlockId, Vec<ValueId>), IrError> {
        let dest = self.block_id()?;
        let args = if self.eat(&Tok::LParen) {
            self.comma_list(Tok::RParen, Self::value)?
        } else {
            Vec::new()
        };
        Ok((dest, args))
    }

    fn terminator(&mut self) -> Result<Option<Terminator>, IrError> {
        if self.eat_keyword("jump") {
            let (dest, args) = self.target()?;
            return Ok(Some(Terminator::Jump { dest, args }));
        }
        if self.eat_keyword("br") {
            let cond = self.value()?;
            self.expect(Tok::Comma)?;
            let (then_dest, then_args) = self.target()?;
            self.expect(Tok::Comma)?;
            let (else_dest, else_args) = self.target()?;
            return Ok(Some(Terminator::Branch {
                cond,
                then_dest,
                then_args,
                else_dest,
                else_args,
            }));
        }
        if self.eat_keyword("return") {
            let value = if matches!(self.peek(), Tok::Value(_)) {
                Some(self.value()?)
            } else {
                None
            };
            return Ok(Some(Terminator::Return { value }));
        }
        if self.eat_keyword("unreachable") {
            return Ok(Some(Terminator::Unreachable));
        }
        Ok(None)
    }

    fn constant(&mut self, ty: Type) -> Result<Constant, IrError> {
        match ty {
            Type::Bool => {
                if self.eat_keyword("true") {
                    Ok(Constant::Bool(true))
                } else if self.eat_keyword("false") {
                    Ok(Constant::Bool(false))
                } else {
                    Err(self.unexpected("`true` or `false`"))
                }
            }
            Type::F32 | Type::F64 => {
                let text = match self.peek() {
                    Tok::Number(s) | Tok::Ident(s) => s.clone(),
                    _ => return Err(self.unexpected("float literal")),
                };
                let value: f64 = text
                    .parse()
                    .map_err(|_| self.error(format!("invalid float `{text}`")))?;
                self.next();
                Ok(Constant::float(ty, value))
            }
            _ => {
                let text = match self.peek() {
                    Tok::Number(s) => s.clone(),
                    _ => return Err(self.unexpected("integer literal")),
                };
                let value = text
                    .parse::<i64>()
                    .or_else(|_| text.parse::<u64>().map(|u| u as i64))
                    .map_err(|_| self.error(format!("invalid integer `{text}`")))?;
                self.next();
                Ok(Constant::int(ty, value))
            }
        }
    }

    fn mem_operands(&mut self) -> Result<(i32, u32), IrError> {
        self.expect(Tok::Comma)?;
        self.keyword("offset")?;
        let offset = self.integer()?;
        self.expect(Tok::Comma)?;
        self.keyword("align")?;
        let align = self.integer()?;
        Ok((offset, align))
    }

    fn defined(&self, result: Option<ValueId>, op: &str) -> Result<ValueId, IrError> {
        result.ok_or_else(|| self.error(format!("`{op}` must define a value")))
    }

    fn instr(&mut self) -> Result<Instr, IrError> {
        let result = if matches!(self.peek(), Tok::Value(_)) {
            let v = self.value()?;
            self.expect(Tok::Equals)?;
            Some(v)
        } else {
            None
        };
        let op = self.ident()?;
        let instr = match op.as_str() {
            "store" => {
                let ty = self.ty()?;
                let value = self.value()?;
                self.expect(Tok::Comma)?;
                let addr = self.value()?;
                let (offset, align) = self.mem_operands()?;
                Instr::Store {
                    ty,
                    value,
                    addr,
                    offset,
                    align,
                }
            }
            "call" => {
                let callee = self.global()?;
                self.expect(Tok::LParen)?;
                let args = self.comma_list(Tok::RParen, Self::value)?;
                let ret = if self.eat(&Tok::Arrow) {
                    Some(self.ty()?)
                } else {
                    None
                };
                if result.is_some() && ret.is_none() {
                    return Err(self.error(format!("call to @{callee} returns nothing")));
                }
                Instr::Call {
                    result,
                    ret,
                    callee,
                    args,
                }
            }
            "call_indirect" => {
                let callee = self.value()?;
                self.expect(Tok::LParen)?;
                let args = self.comma_list(Tok::RParen, Self::value)?;
                self.expect(Tok::Colon)?;
                let signature = self.signature()?;
                if result.is_some() && signature.ret.is_none() {
                    return Err(self.error("indirect call returns nothing"));
                }
                Instr::CallIndirect {
                    result,
                    signature,
                    callee,
                    args,
                }
            }
            "const" => {
                let result = self.defined(result, &op)?;
                let ty = self.ty()?;
                let value = self.constant(ty)?;
                Instr::Const { result, value }
            }
            "cmp" => {
                let result = self.defined(result, &op)?;
                let name = self.ident()?;
                let op = CmpOp::from_mnemonic(&name)
                    .ok_or_else(|| self.error(format!("unknown comparison `{name}`")))?;
                let ty = self.ty()?;
                let lhs = self.value()?;
                self.expect(Tok::Comma)?;
                let rhs = self.value()?;
                Instr::Cmp {
                    result,
                    op,
                    ty,
                    lhs,
                    rhs,
                }
            }
            "neg" | "not" => {
                let result = self.defined(result, &op)?;
                let op = if op == "neg" { UnOp::Neg } else { UnOp::Not };
                let ty = self.ty()?;
                let operand = self.value()?;
                Instr::Unary {
                    result,
                    op,
                    ty,
                    operand,
                }
            }
            "select" => {
                let result = self.defined(result, &op)?;
                let ty = self.ty()?;
                let cond = self.value()?;
                self.expect(Tok::Comma)?;
                let then_value = self.value()?;
                self.expect(Tok::Comma)?;
                let else_value = self.value()?;
                Instr::Select {
                    result,
                    ty,
                    cond,
                    then_value,
                    else_value,
                }
            }
            "load" => {
                let result = self.defined(result, &op)?;
                let ty = self.ty()?;
                let addr = self.value()?;
                let (offset, align) = self.mem_operands()?;
                Instr::Load {
                    result,
                    ty,
                    addr,
                    offset,
                    align,
                }
            }
            "ptradd" => {
                let result = self.defined(result, &op)?;
                let base = self.value()?;
                self.expect(Tok::Comma)?;
                let offset = self.value()?;
                Instr::PtrAdd {
                    result,
                    base,
                    offset,
                }
            }
            "funcaddr" => {
                let result = self.defined(result, &op)?;
                let name = self.global()?;
                Instr::FuncAddr { result, name }
            }
            other => {
                if let Some(op) = BinOp::from_mnemonic(other) {
                    let result = self.defined(result, other)?;
                    let ty = self.ty()?;
                    let lhs = self.value()?;
                    self.expect(Tok::Comma)?;
                    let rhs = self.value()?;
                    Instr::Binary {
                        result,
                        op,
                        ty,
                        lhs,
                        rhs,
                    }
                } else if let Some(op) = CastOp::from_mnemonic(other) {
                    let result = self.defined(result, other)?;
                    let from = self.ty()?;
                    let operand = self.value()?;
                    self.keyword("to")?;
                    let to = self.ty()?;
                    Instr::Cast {
                        result,
                        op,
                        from,
                        to,
                        operand,
                    }
                } else {
                    return Err(self.error(format!("unknown instruction `{other}`")));
                }
            }
        };
        if result.is_some() && instr.result().is_none() {
            return Err(self.error(format!("`{op}` does not define a value")));
        }
        Ok(instr)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_minimal_function() {
        let m = parse_module(
            "module \"m\"\n\
             fn @id(i64) -> i64 export {\n\
             bb0(%0: i64):\n  return %0\n}\n",
        )
        .expect("parse");
        let f = m.function("id").expect("function");
        assert_eq!(f.signature.to_string(), "(i64) -> i64");
        assert_eq!(f.next_value, 1);
    }

    #[test]
    fn lexes_float_exponents_and_arrows() {
        let tokens = Lexer::new("1e-7 -> -2.5 -inf").tokenize().expect("lex");
        let kinds: Vec<Tok> = tokens.into_iter().map(|t| t.tok).collect();
        assert_eq!(
            kinds,
            vec![
                Tok::Number("1e-7".into()),
                Tok::Arrow,
                Tok::Number("-2.5".into()),
                Tok::Number("-inf".into()),
                Tok::Eof,
            ]
        );
    }

    #[test]
    fn reports_position_of_bad_token() {
        let err = parse_module("module \"m\"\nfn @f() export {\nbb0:\n  %0 = frob i64\n}")
            .unwrap_err();
        match err {
            IrError::Parse { line, message, .. } => {
                assert_eq!(line, 4);
                assert!(message.contains("frob"), "{message}");
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn rejects_out_of_order_labels() {
        let err = parse_module("module \"m\"\nfn @f() export {\nbb1:\n  return\n}").unwrap_err();
        assert!(err.to_string().contains("expected label bb0"), "{err}");
    }
}
