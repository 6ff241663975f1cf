use crate::ast::{BinOp, Expr, LocalIdx, Place, Span, UnaryOp};
use crate::lexer::Token;
use crate::symbols::{SymbolTables, MAX_MEMBERS};

#[derive(Debug, thiserror::Error)]
#[error("parse error: {message}")]
pub struct ParseError {
    pub code: &'static str,
    pub span: Span,
    pub message: String,
    pub hint: Option<String>,
}

type Result<T> = std::result::Result<T, ParseError>;

struct LocalDecl {
    name: String,
    index: LocalIdx,
    scope: u32,
}

/// Recursive descent with precedence climbing. Parsing has side
/// effects: identifiers, literals and procedure names are interned
/// into the symbol tables as they are seen, and `$name` references
/// are resolved to frame-relative indices on the spot.
pub struct Parser<'a> {
    tokens: Vec<(Token, Span)>,
    pos: usize,
    syms: &'a mut SymbolTables,
    scope: u32,
    locals: Vec<LocalDecl>,
    num_locals: usize,
}

fn token_prec(token: &Token) -> Option<u8> {
    match token {
        Token::Star | Token::Slash | Token::Percent | Token::Amp | Token::Pipe => Some(5),
        Token::Plus | Token::Minus => Some(4),
        Token::Less
        | Token::Greater
        | Token::LessEq
        | Token::GreaterEq
        | Token::EqEq
        | Token::NotEq => Some(3),
        Token::Eq => Some(1),
        _ => None,
    }
}

fn token_binop(token: &Token) -> Option<BinOp> {
    match token {
        Token::Eq => Some(BinOp::Assign),
        Token::Plus => Some(BinOp::Add),
        Token::Minus => Some(BinOp::Sub),
        Token::Star => Some(BinOp::Mul),
        Token::Slash => Some(BinOp::Div),
        Token::Percent => Some(BinOp::Mod),
        Token::Pipe => Some(BinOp::Or),
        Token::Amp => Some(BinOp::And),
        Token::Less => Some(BinOp::Lt),
        Token::LessEq => Some(BinOp::Lte),
        Token::Greater => Some(BinOp::Gt),
        Token::GreaterEq => Some(BinOp::Gte),
        Token::EqEq => Some(BinOp::Eq),
        Token::NotEq => Some(BinOp::Ne),
        _ => None,
    }
}

impl<'a> Parser<'a> {
    pub fn new(tokens: Vec<(Token, Span)>, syms: &'a mut SymbolTables) -> Self {
        Parser {
            tokens,
            pos: 0,
            syms,
            scope: 0,
            locals: Vec::new(),
            num_locals: 0,
        }
    }

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos).map(|(t, _)| t)
    }

    fn advance(&mut self) -> Option<Token> {
        let tok = self.tokens.get(self.pos).map(|(t, _)| t.clone());
        if tok.is_some() {
            self.pos += 1;
        }
        tok
    }

    /// Span of the current token, or of the last one at end of input.
    fn here(&self) -> Span {
        self.tokens
            .get(self.pos)
            .or_else(|| self.tokens.last())
            .map(|&(_, s)| s)
            .unwrap_or_default()
    }

    fn error(&self, code: &'static str, message: impl Into<String>) -> ParseError {
        ParseError {
            code,
            span: self.here(),
            message: message.into(),
            hint: None,
        }
    }

    fn expect(&mut self, expected: &Token, what: &str) -> Result<()> {
        match self.peek() {
            Some(tok) if tok == expected => {
                self.advance();
                Ok(())
            }
            Some(tok) => Err(self.error("TINY-P001", format!("expected {what}, got {tok:?}"))),
            None => Err(self.error("TINY-P002", format!("expected {what}, got end of input"))),
        }
    }

    fn expect_ident(&mut self, what: &str) -> Result<String> {
        match self.peek().cloned() {
            Some(Token::Ident(name)) => {
                self.advance();
                Ok(name)
            }
            Some(tok) => Err(self.error("TINY-P001", format!("expected {what}, got {tok:?}"))),
            None => Err(self.error("TINY-P002", format!("expected {what}, got end of input"))),
        }
    }

    // ---- Local declarations ----

    fn declare_local(&mut self, name: String) -> LocalIdx {
        let index = self.num_locals as LocalIdx;
        self.locals.push(LocalDecl {
            name,
            index,
            scope: self.scope,
        });
        self.num_locals += 1;
        index
    }

    fn declare_arguments(&mut self, names: Vec<String>) {
        let nargs = names.len() as LocalIdx;
        for (i, name) in names.into_iter().enumerate() {
            self.locals.push(LocalDecl {
                name,
                index: -nargs + i as LocalIdx,
                scope: self.scope,
            });
        }
    }

    /// Innermost declaration of `name` whose scope is not deeper than
    /// the current one.
    fn reference_local(&self, name: &str) -> Result<LocalIdx> {
        self.locals
            .iter()
            .rev()
            .find(|d| d.name == name && d.scope <= self.scope)
            .map(|d| d.index)
            .ok_or_else(|| self.error("TINY-P005", format!("no local named '${name}' in scope")))
    }

    fn clear_locals(&mut self) {
        self.locals.clear();
        self.num_locals = 0;
    }

    // ---- Grammar ----

    pub fn parse_program(&mut self) -> Result<Vec<Expr>> {
        let mut exprs = Vec::new();
        while self.peek().is_some() {
            exprs.push(self.parse_expr()?);
        }
        Ok(exprs)
    }

    fn parse_expr(&mut self) -> Result<Expr> {
        let lhs = self.parse_factor()?;
        self.parse_binary_rhs(0, lhs)
    }

    fn parse_binary_rhs(&mut self, min_prec: u8, mut lhs: Expr) -> Result<Expr> {
        loop {
            let Some(prec) = self.peek().and_then(token_prec) else {
                return Ok(lhs);
            };
            if prec < min_prec {
                return Ok(lhs);
            }
            let op = self.peek().and_then(token_binop).unwrap();
            self.advance();

            let mut rhs = self.parse_factor()?;
            if let Some(next_prec) = self.peek().and_then(token_prec) {
                if prec < next_prec {
                    rhs = self.parse_binary_rhs(prec + 1, rhs)?;
                }
            }

            lhs = Expr::Binary {
                op,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
            };
        }
    }

    fn parse_factor(&mut self) -> Result<Expr> {
        match self.peek().cloned() {
            Some(Token::Ident(name)) => {
                self.advance();
                match self.peek() {
                    Some(Token::LParen) => self.parse_call(&name),
                    Some(Token::LBracket) => {
                        self.advance();
                        let var = self.syms.globals.intern(&name);
                        let index = self.parse_expr()?;
                        self.expect(&Token::RBracket, "']' after array index")?;
                        Ok(Expr::Index {
                            array: Place::Global(var),
                            index: Box::new(index),
                        })
                    }
                    Some(Token::Dot) => {
                        self.advance();
                        let var = self.syms.globals.intern(&name);
                        let member = self.expect_ident("member name after '.'")?;
                        Ok(Expr::Member {
                            target: Place::Global(var),
                            member,
                        })
                    }
                    _ => Ok(Expr::Global(self.syms.globals.intern(&name))),
                }
            }

            Some(Token::LocalRef(name)) => {
                let index = self.reference_local(&name)?;
                self.advance();
                match self.peek() {
                    Some(Token::LBracket) => {
                        self.advance();
                        let idx_expr = self.parse_expr()?;
                        self.expect(&Token::RBracket, "']' after array index")?;
                        Ok(Expr::Index {
                            array: Place::Local(index),
                            index: Box::new(idx_expr),
                        })
                    }
                    Some(Token::Dot) => {
                        self.advance();
                        let member = self.expect_ident("member name after '.'")?;
                        Ok(Expr::Member {
                            target: Place::Local(index),
                            member,
                        })
                    }
                    _ => Ok(Expr::LocalRef(index)),
                }
            }

            Some(Token::Number(n)) => {
                self.advance();
                Ok(Expr::Num(self.syms.consts.add_number(n)))
            }

            Some(Token::Text(s)) => {
                self.advance();
                Ok(Expr::Str(self.syms.consts.add_string(&s)))
            }

            Some(Token::LBrace) => self.parse_member_list(),

            Some(Token::LBracket) => {
                self.advance();
                let len = self.parse_expr()?;
                self.expect(&Token::RBracket, "']' after array length")?;
                Ok(Expr::MakeArray(Box::new(len)))
            }

            Some(tok @ (Token::Plus | Token::Minus)) => {
                self.advance();
                let op = if tok == Token::Minus {
                    UnaryOp::Neg
                } else {
                    UnaryOp::Plus
                };
                let operand = self.parse_factor()?;
                Ok(Expr::Unary {
                    op,
                    operand: Box::new(operand),
                })
            }

            Some(Token::LParen) => {
                self.advance();
                let inner = self.parse_expr()?;
                self.expect(&Token::RParen, "matching ')'")?;
                Ok(Expr::Paren(Box::new(inner)))
            }

            Some(Token::Local) => {
                if self.scope == 0 {
                    return Err(self.error(
                        "TINY-P004",
                        "cannot declare locals in the global scope",
                    ));
                }
                self.advance();
                let name = self.expect_ident("local name")?;
                let index = self.declare_local(name);
                Ok(Expr::LocalDecl(index))
            }

            Some(Token::Proc) => self.parse_proc(),
            Some(Token::If) => self.parse_if(),
            Some(Token::While) => self.parse_while(),
            Some(Token::Return) => self.parse_return(),
            Some(Token::Read) => self.parse_read(),
            Some(Token::Write) => self.parse_write(),

            Some(tok) => {
                let mut err = self.error("TINY-P001", format!("unexpected token {tok:?}"));
                if tok == Token::Begin {
                    err.hint =
                        Some("'begin' is reserved; programs start directly with statements".into());
                }
                Err(err)
            }
            None => Err(self.error("TINY-P002", "unexpected end of input")),
        }
    }

    fn parse_call(&mut self, name: &str) -> Result<Expr> {
        self.advance(); // '('
        let mut args = Vec::new();
        while self.peek() != Some(&Token::RParen) {
            args.push(self.parse_expr()?);
            if self.peek() == Some(&Token::Comma) {
                self.advance();
            } else if self.peek() != Some(&Token::RParen) {
                return Err(self.error(
                    "TINY-P003",
                    format!("expected ')' after arguments to '{name}'"),
                ));
            }
        }
        self.advance(); // ')'
        let callee = self.syms.resolve_callable(name);
        Ok(Expr::Call { callee, args })
    }

    fn parse_member_list(&mut self) -> Result<Expr> {
        self.advance(); // '{'
        let mut members = Vec::new();
        while self.peek() != Some(&Token::RBrace) {
            members.push(self.expect_ident("member name")?);
            if members.len() > MAX_MEMBERS {
                return Err(self.error(
                    "TINY-P007",
                    format!("too many member names (max {MAX_MEMBERS})"),
                ));
            }
            if self.peek() == Some(&Token::Comma) {
                self.advance();
            } else if self.peek() != Some(&Token::RBrace) {
                return Err(self.error("TINY-P003", "expected '}' after member names"));
            }
        }
        self.advance(); // '}'
        Ok(Expr::MemberList(members))
    }

    fn parse_proc(&mut self) -> Result<Expr> {
        if self.scope != 0 {
            return Err(self.error(
                "TINY-P006",
                "procedures may only be defined at the top level",
            ));
        }
        self.advance(); // 'proc'
        let name = self.expect_ident("procedure name")?;
        if self.syms.foreign_names.iter().any(|n| n == &name) {
            return Err(self.error(
                "TINY-P008",
                format!("procedure '{name}' collides with a foreign procedure"),
            ));
        }
        let id = self.syms.procs.intern(&name);

        self.scope += 1;
        self.expect(&Token::LParen, "'(' after procedure name")?;
        let mut params = Vec::new();
        while self.peek() != Some(&Token::RParen) {
            params.push(self.expect_ident("parameter name")?);
            if self.peek() == Some(&Token::Comma) {
                self.advance();
            } else if self.peek() != Some(&Token::RParen) {
                return Err(self.error("TINY-P003", "expected ')' after parameters"));
            }
        }
        self.advance(); // ')'
        self.declare_arguments(params);

        let body = self.parse_body()?;
        let num_locals = self.num_locals;
        self.scope -= 1;
        self.clear_locals();

        Ok(Expr::Proc {
            id,
            num_locals,
            body,
        })
    }

    fn parse_if(&mut self) -> Result<Expr> {
        self.advance(); // 'if'
        let cond = self.parse_expr()?;
        self.expect(&Token::Then, "'then' after if condition")?;
        self.scope += 1;
        let body = self.parse_body()?;
        self.scope -= 1;
        Ok(Expr::If {
            cond: Box::new(cond),
            body,
        })
    }

    fn parse_while(&mut self) -> Result<Expr> {
        self.advance(); // 'while'
        let cond = self.parse_expr()?;
        self.scope += 1;
        let body = self.parse_body()?;
        self.scope -= 1;
        Ok(Expr::While {
            cond: Box::new(cond),
            body,
        })
    }

    fn parse_return(&mut self) -> Result<Expr> {
        self.advance(); // 'return'
        if self.peek() == Some(&Token::Semi) {
            self.advance();
            return Ok(Expr::Return(None));
        }
        let value = self.parse_expr()?;
        Ok(Expr::Return(Some(Box::new(value))))
    }

    fn parse_read(&mut self) -> Result<Expr> {
        self.advance(); // 'read'
        let mut targets = Vec::new();
        loop {
            match self.peek().cloned() {
                Some(Token::End) => break,
                Some(Token::Ident(name)) => {
                    self.advance();
                    targets.push(Place::Global(self.syms.globals.intern(&name)));
                }
                Some(Token::LocalRef(name)) => {
                    let index = self.reference_local(&name)?;
                    self.advance();
                    targets.push(Place::Local(index));
                }
                Some(tok) => {
                    return Err(self.error(
                        "TINY-P009",
                        format!("read expects variable names, got {tok:?}"),
                    ))
                }
                None => {
                    return Err(self.error("TINY-P002", "expected 'end', got end of input"))
                }
            }
        }
        self.advance(); // 'end'
        Ok(Expr::Read(targets))
    }

    fn parse_write(&mut self) -> Result<Expr> {
        self.advance(); // 'write'
        let mut exprs = Vec::new();
        while self.peek() != Some(&Token::End) {
            if self.peek().is_none() {
                return Err(self.error("TINY-P002", "expected 'end', got end of input"));
            }
            exprs.push(self.parse_expr()?);
        }
        self.advance(); // 'end'
        Ok(Expr::Write(exprs))
    }

    /// Statement sequence terminated by `end` (consumed).
    fn parse_body(&mut self) -> Result<Vec<Expr>> {
        let mut body = Vec::new();
        while self.peek() != Some(&Token::End) {
            if self.peek().is_none() {
                return Err(self.error("TINY-P002", "expected 'end', got end of input"));
            }
            body.push(self.parse_expr()?);
        }
        self.advance(); // 'end'
        Ok(body)
    }
}

/// Parse a token stream, interning names into `syms` as a side effect.
pub fn parse(tokens: Vec<(Token, Span)>, syms: &mut SymbolTables) -> Result<Vec<Expr>> {
    Parser::new(tokens, syms).parse_program()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lexer;

    fn parse_str(source: &str) -> (Vec<Expr>, SymbolTables) {
        let mut syms = SymbolTables::default();
        let tokens = lexer::lex(source).unwrap();
        let program = parse(tokens, &mut syms).unwrap();
        (program, syms)
    }

    fn parse_err(source: &str) -> ParseError {
        let mut syms = SymbolTables::default();
        let tokens = lexer::lex(source).unwrap();
        parse(tokens, &mut syms).unwrap_err()
    }

    #[test]
    fn parse_assignment_registers_global() {
        let (program, syms) = parse_str("x = 10");
        assert_eq!(program.len(), 1);
        match &program[0] {
            Expr::Binary { op: BinOp::Assign, lhs, .. } => {
                assert_eq!(**lhs, Expr::Global(0));
            }
            other => panic!("expected assignment, got {other:?}"),
        }
        assert_eq!(syms.globals.get(0).name, "x");
    }

    #[test]
    fn parse_precedence_mul_binds_tighter() {
        let (program, _) = parse_str("write 1 + 2 * 3 end");
        let Expr::Write(exprs) = &program[0] else {
            panic!("expected write");
        };
        match &exprs[0] {
            Expr::Binary { op: BinOp::Add, rhs, .. } => {
                assert!(matches!(**rhs, Expr::Binary { op: BinOp::Mul, .. }));
            }
            other => panic!("expected add at the top, got {other:?}"),
        }
    }

    #[test]
    fn parse_proc_argument_indices_are_negative() {
        let (program, _) = parse_str("proc f(a, b) return $a + $b end");
        let Expr::Proc { body, num_locals, .. } = &program[0] else {
            panic!("expected proc");
        };
        assert_eq!(*num_locals, 0);
        let Expr::Return(Some(sum)) = &body[0] else {
            panic!("expected return");
        };
        let Expr::Binary { lhs, rhs, .. } = &**sum else {
            panic!("expected binary");
        };
        // Two arguments: indices -2 and -1.
        assert_eq!(**lhs, Expr::LocalRef(-2));
        assert_eq!(**rhs, Expr::LocalRef(-1));
    }

    #[test]
    fn parse_local_declarations_count_from_zero() {
        let (program, _) = parse_str("proc f() local a local b $b = 1 end");
        let Expr::Proc { body, num_locals, .. } = &program[0] else {
            panic!("expected proc");
        };
        assert_eq!(*num_locals, 2);
        assert_eq!(body[0], Expr::LocalDecl(0));
        assert_eq!(body[1], Expr::LocalDecl(1));
    }

    #[test]
    fn parse_inner_scope_local_shadows() {
        let (program, _) = parse_str("proc f(x) if 1 then local x $x = 2 end end");
        let Expr::Proc { body, .. } = &program[0] else {
            panic!("expected proc");
        };
        let Expr::If { body: inner, .. } = &body[0] else {
            panic!("expected if");
        };
        // `$x` inside the if resolves to the freshly declared local 0,
        // not the argument at -1.
        match &inner[1] {
            Expr::Binary { lhs, .. } => assert_eq!(**lhs, Expr::LocalRef(0)),
            other => panic!("expected assignment, got {other:?}"),
        }
    }

    #[test]
    fn parse_local_ref_outside_proc_fails() {
        let err = parse_err("write $x end");
        assert_eq!(err.code, "TINY-P005");
    }

    #[test]
    fn parse_local_decl_at_top_level_fails() {
        let err = parse_err("local x");
        assert_eq!(err.code, "TINY-P004");
    }

    #[test]
    fn parse_nested_proc_fails() {
        let err = parse_err("proc f() proc g() end end");
        assert_eq!(err.code, "TINY-P006");
    }

    #[test]
    fn parse_locals_do_not_leak_between_procs() {
        let err = parse_err("proc f(n) return $n end proc g() return $n end");
        assert_eq!(err.code, "TINY-P005");
    }

    #[test]
    fn parse_call_resolves_foreign_first() {
        let mut syms = SymbolTables::default();
        syms.foreign_names.push("clock".to_string());
        let tokens = lexer::lex("x = clock()").unwrap();
        let program = parse(tokens, &mut syms).unwrap();
        match &program[0] {
            Expr::Binary { rhs, .. } => {
                assert_eq!(**rhs, Expr::Call { callee: -1, args: vec![] });
            }
            other => panic!("expected assignment, got {other:?}"),
        }
    }

    #[test]
    fn parse_call_before_definition_shares_id() {
        let (program, syms) = parse_str("x = f(1) proc f(n) return $n end");
        let Expr::Binary { rhs, .. } = &program[0] else {
            panic!("expected assignment");
        };
        let Expr::Call { callee, .. } = &**rhs else {
            panic!("expected call");
        };
        let Expr::Proc { id, .. } = &program[1] else {
            panic!("expected proc");
        };
        assert_eq!(*callee, *id as i32);
        assert_eq!(syms.procs.len(), 1);
    }

    #[test]
    fn parse_member_list_and_access() {
        let (program, _) = parse_str("pt = { x, y } v = pt.y");
        match &program[0] {
            Expr::Binary { rhs, .. } => {
                assert_eq!(
                    **rhs,
                    Expr::MemberList(vec!["x".to_string(), "y".to_string()])
                );
            }
            other => panic!("expected assignment, got {other:?}"),
        }
        match &program[1] {
            Expr::Binary { rhs, .. } => {
                assert_eq!(
                    **rhs,
                    Expr::Member {
                        target: Place::Global(0),
                        member: "y".to_string()
                    }
                );
            }
            other => panic!("expected assignment, got {other:?}"),
        }
    }

    #[test]
    fn parse_member_access_on_local() {
        // Parses to a Member with a local target; whether that target
        // is legal is the compiler's call.
        let (program, _) = parse_str("proc f(p) return $p.x end");
        let Expr::Proc { body, .. } = &program[0] else {
            panic!("expected proc");
        };
        let Expr::Return(Some(value)) = &body[0] else {
            panic!("expected return");
        };
        assert_eq!(
            **value,
            Expr::Member {
                target: Place::Local(-1),
                member: "x".to_string()
            }
        );
    }

    #[test]
    fn parse_proc_colliding_with_foreign_fails() {
        let mut syms = SymbolTables::default();
        syms.foreign_names.push("clock".to_string());
        let tokens = lexer::lex("proc clock() end").unwrap();
        let err = parse(tokens, &mut syms).unwrap_err();
        assert_eq!(err.code, "TINY-P008");
    }

    #[test]
    fn parse_array_literal_and_index() {
        let (program, _) = parse_str("a = [3] a[0] = 1");
        match &program[0] {
            Expr::Binary { rhs, .. } => {
                assert!(matches!(**rhs, Expr::MakeArray(_)));
            }
            other => panic!("expected assignment, got {other:?}"),
        }
        match &program[1] {
            Expr::Binary { lhs, .. } => {
                assert!(matches!(
                    **lhs,
                    Expr::Index { array: Place::Global(0), .. }
                ));
            }
            other => panic!("expected assignment, got {other:?}"),
        }
    }

    #[test]
    fn parse_read_targets() {
        let (program, syms) = parse_str("proc f() local line read line $line end end");
        let Expr::Proc { body, .. } = &program[0] else {
            panic!("expected proc");
        };
        assert_eq!(
            body[1],
            Expr::Read(vec![Place::Global(0), Place::Local(0)])
        );
        assert_eq!(syms.globals.get(0).name, "line");
    }

    #[test]
    fn parse_return_semicolon_is_bare() {
        let (program, _) = parse_str("proc f() return ; end");
        let Expr::Proc { body, .. } = &program[0] else {
            panic!("expected proc");
        };
        assert_eq!(body[0], Expr::Return(None));
    }

    #[test]
    fn parse_begin_is_rejected_with_hint() {
        let err = parse_err("begin x = 1 end");
        assert_eq!(err.code, "TINY-P001");
        assert!(err.hint.is_some());
    }

    #[test]
    fn parse_missing_end_reports_eof() {
        let err = parse_err("while 1 write 1 end");
        assert_eq!(err.code, "TINY-P002");
    }

    #[test]
    fn parse_unary_minus() {
        let (program, _) = parse_str("x = -5");
        match &program[0] {
            Expr::Binary { rhs, .. } => {
                assert!(matches!(**rhs, Expr::Unary { op: UnaryOp::Neg, .. }));
            }
            other => panic!("expected assignment, got {other:?}"),
        }
    }
}
