use crate::ast::{BinOp, Expr, Place, UnaryOp, VarId};
use crate::symbols::SymbolTables;

// One-byte opcodes; immediates are 4-byte little-endian i32.
pub(crate) const OP_PUSH: u8 = 0;
pub(crate) const OP_POP: u8 = 1;
pub(crate) const OP_ADD: u8 = 2;
pub(crate) const OP_SUB: u8 = 3;
pub(crate) const OP_MUL: u8 = 4;
pub(crate) const OP_DIV: u8 = 5;
pub(crate) const OP_MOD: u8 = 6;
pub(crate) const OP_OR: u8 = 7;
pub(crate) const OP_AND: u8 = 8;
pub(crate) const OP_LT: u8 = 9;
pub(crate) const OP_LTE: u8 = 10;
pub(crate) const OP_GT: u8 = 11;
pub(crate) const OP_GTE: u8 = 12;
pub(crate) const OP_EQU: u8 = 13;
pub(crate) const OP_NEQU: u8 = 14;
pub(crate) const OP_PRINT: u8 = 15;
pub(crate) const OP_SET: u8 = 16;
pub(crate) const OP_GET: u8 = 17;
pub(crate) const OP_READ: u8 = 18;
pub(crate) const OP_GOTO: u8 = 19;
pub(crate) const OP_GOTOZ: u8 = 20;
pub(crate) const OP_GOTONZ: u8 = 21;
pub(crate) const OP_CALL: u8 = 22;
pub(crate) const OP_RETURN: u8 = 23;
pub(crate) const OP_RETURN_VALUE: u8 = 24;
pub(crate) const OP_CALLF: u8 = 25;
pub(crate) const OP_GETLOCAL: u8 = 26;
pub(crate) const OP_SETLOCAL: u8 = 27;
pub(crate) const OP_MAKE_ARRAY: u8 = 28;
pub(crate) const OP_SETINDEX: u8 = 29;
pub(crate) const OP_GETINDEX: u8 = 30;
pub(crate) const OP_HALT: u8 = 31;

#[derive(Debug, thiserror::Error)]
#[error("compile error: {message}")]
pub struct CompileError {
    pub code: &'static str,
    pub message: String,
}

type Result<T> = std::result::Result<T, CompileError>;

fn err(code: &'static str, message: impl Into<String>) -> CompileError {
    CompileError {
        code,
        message: message.into(),
    }
}

/// Post-order walk over the parsed program, emitting bytecode into a
/// flat buffer. Forward jumps are back-patched in place; procedure
/// entry pcs are bound late, when the body is emitted.
struct Compiler<'a> {
    code: Vec<u8>,
    syms: &'a mut SymbolTables,
}

/// Lower a program to bytecode, terminated by `HALT`.
pub fn compile(program: &[Expr], syms: &mut SymbolTables) -> Result<Vec<u8>> {
    let mut c = Compiler {
        code: Vec::new(),
        syms,
    };
    for expr in program {
        c.compile_expr(expr)?;
    }
    c.emit(OP_HALT);

    // Late binding means call sites compile before bodies; anything
    // still unbound now was called but never defined.
    if let Some(p) = c.syms.procs.iter().find(|p| p.pc.is_none()) {
        return Err(err(
            "TINY-C006",
            format!("procedure '{}' is called but never defined", p.name),
        ));
    }
    Ok(c.code)
}

fn binop_opcode(op: BinOp) -> u8 {
    match op {
        BinOp::Add => OP_ADD,
        BinOp::Sub => OP_SUB,
        BinOp::Mul => OP_MUL,
        BinOp::Div => OP_DIV,
        BinOp::Mod => OP_MOD,
        BinOp::Or => OP_OR,
        BinOp::And => OP_AND,
        BinOp::Lt => OP_LT,
        BinOp::Lte => OP_LTE,
        BinOp::Gt => OP_GT,
        BinOp::Gte => OP_GTE,
        BinOp::Eq => OP_EQU,
        BinOp::Ne => OP_NEQU,
        BinOp::Assign => unreachable!("assignment is lowered by LHS shape"),
    }
}

impl Compiler<'_> {
    fn emit(&mut self, op: u8) {
        self.code.push(op);
    }

    fn emit_i32(&mut self, value: i32) {
        self.code.extend_from_slice(&value.to_le_bytes());
    }

    fn patch_i32(&mut self, at: usize, value: i32) {
        self.code[at..at + 4].copy_from_slice(&value.to_le_bytes());
    }

    fn here(&self) -> usize {
        self.code.len()
    }

    fn check_initialized(&self, var: VarId) -> Result<()> {
        let slot = self.syms.globals.get(var);
        if !slot.initialized {
            return Err(err(
                "TINY-C001",
                format!("use of uninitialized variable '{}'", slot.name),
            ));
        }
        Ok(())
    }

    /// Pushes the array held by a place. Reading a global this way is
    /// still a read and gets the use-before-set check.
    fn compile_place_load(&mut self, place: Place) -> Result<()> {
        match place {
            Place::Global(var) => {
                self.check_initialized(var)?;
                self.emit(OP_GET);
                self.emit_i32(var as i32);
            }
            Place::Local(idx) => {
                self.emit(OP_GETLOCAL);
                self.emit_i32(idx);
            }
        }
        Ok(())
    }

    fn member_index(&self, target: Place, member: &str) -> Result<usize> {
        let Place::Global(var) = target else {
            return Err(err(
                "TINY-C005",
                format!("member '{member}' access is only legal on a global with declared members"),
            ));
        };
        let slot = self.syms.globals.get(var);
        slot.members
            .iter()
            .position(|m| m == member)
            .ok_or_else(|| {
                err(
                    "TINY-C005",
                    format!("no member '{}' declared on '{}'", member, slot.name),
                )
            })
    }

    fn compile_body(&mut self, body: &[Expr]) -> Result<()> {
        for expr in body {
            self.compile_expr(expr)?;
        }
        Ok(())
    }

    fn compile_expr(&mut self, expr: &Expr) -> Result<()> {
        match expr {
            Expr::Num(id) | Expr::Str(id) => {
                self.emit(OP_PUSH);
                self.emit_i32(*id as i32);
            }

            Expr::Global(var) => {
                self.check_initialized(*var)?;
                self.emit(OP_GET);
                self.emit_i32(*var as i32);
            }

            Expr::LocalRef(idx) => {
                self.emit(OP_GETLOCAL);
                self.emit_i32(*idx);
            }

            // Slot reservation only; zero-init happens at proc entry.
            Expr::LocalDecl(_) => {}

            Expr::Call { callee, args } => {
                for arg in args {
                    self.compile_expr(arg)?;
                }
                if *callee < 0 {
                    self.emit(OP_CALLF);
                    self.emit_i32(-(callee + 1));
                } else {
                    self.emit(OP_CALL);
                    self.emit_i32(args.len() as i32);
                    self.emit_i32(*callee);
                }
            }

            Expr::Binary { op: BinOp::Assign, lhs, rhs } => {
                self.compile_assign(lhs, rhs)?;
            }

            Expr::Binary { op, lhs, rhs } => {
                self.compile_expr(lhs)?;
                self.compile_expr(rhs)?;
                self.emit(binop_opcode(*op));
            }

            Expr::Unary { op, operand } => {
                self.compile_expr(operand)?;
                if *op == UnaryOp::Neg {
                    let minus_one = self.syms.consts.add_number(-1.0);
                    self.emit(OP_PUSH);
                    self.emit_i32(minus_one as i32);
                    self.emit(OP_MUL);
                }
            }

            Expr::Paren(inner) => self.compile_expr(inner)?,

            Expr::Proc { id, num_locals, body } => {
                self.emit(OP_GOTO);
                let skip_at = self.here();
                self.emit_i32(0);

                self.syms.procs.set_pc(*id, self.here());
                let zero = self.syms.consts.add_number(0.0);
                for _ in 0..*num_locals {
                    self.emit(OP_PUSH);
                    self.emit_i32(zero as i32);
                }
                self.compile_body(body)?;
                self.emit(OP_RETURN);

                let after = self.here() as i32;
                self.patch_i32(skip_at, after);
            }

            Expr::If { cond, body } => {
                self.compile_expr(cond)?;
                self.emit(OP_GOTOZ);
                let skip_at = self.here();
                self.emit_i32(0);
                self.compile_body(body)?;
                let after = self.here() as i32;
                self.patch_i32(skip_at, after);
            }

            Expr::While { cond, body } => {
                let top = self.here() as i32;
                self.compile_expr(cond)?;
                self.emit(OP_GOTOZ);
                let skip_at = self.here();
                self.emit_i32(0);
                self.compile_body(body)?;
                self.emit(OP_GOTO);
                self.emit_i32(top);
                let after = self.here() as i32;
                self.patch_i32(skip_at, after);
            }

            Expr::Return(value) => match value {
                Some(v) => {
                    self.compile_expr(v)?;
                    self.emit(OP_RETURN_VALUE);
                }
                None => self.emit(OP_RETURN),
            },

            Expr::Read(targets) => {
                for target in targets {
                    self.emit(OP_READ);
                    match target {
                        Place::Global(var) => {
                            self.emit(OP_SET);
                            self.emit_i32(*var as i32);
                            self.syms.globals.get_mut(*var).initialized = true;
                        }
                        Place::Local(idx) => {
                            self.emit(OP_SETLOCAL);
                            self.emit_i32(*idx);
                        }
                    }
                }
            }

            Expr::Write(exprs) => {
                for e in exprs {
                    self.compile_expr(e)?;
                    self.emit(OP_PRINT);
                }
            }

            Expr::MakeArray(len) => {
                self.compile_expr(len)?;
                self.emit(OP_MAKE_ARRAY);
            }

            Expr::Index { array, index } => {
                self.compile_place_load(*array)?;
                self.compile_expr(index)?;
                self.emit(OP_GETINDEX);
            }

            Expr::Member { target, member } => {
                let k = self.member_index(*target, member)?;
                self.compile_place_load(*target)?;
                let idx = self.syms.consts.add_number(k as f64);
                self.emit(OP_PUSH);
                self.emit_i32(idx as i32);
                self.emit(OP_GETINDEX);
            }

            Expr::MemberList(_) => {
                return Err(err(
                    "TINY-C004",
                    "member list is only legal as the right-hand side of a global assignment",
                ));
            }
        }
        Ok(())
    }

    fn compile_assign(&mut self, lhs: &Expr, rhs: &Expr) -> Result<()> {
        match lhs {
            Expr::Global(var) => {
                if let Expr::MemberList(members) = rhs {
                    // Defines the member map; no code.
                    self.syms.globals.get_mut(*var).members = members.clone();
                } else {
                    self.compile_expr(rhs)?;
                    self.emit(OP_SET);
                    self.emit_i32(*var as i32);
                    self.syms.globals.get_mut(*var).initialized = true;
                }
            }

            Expr::LocalDecl(idx) | Expr::LocalRef(idx) => {
                self.compile_expr(rhs)?;
                self.emit(OP_SETLOCAL);
                self.emit_i32(*idx);
            }

            Expr::Index { array, index } => {
                self.compile_place_load(*array)?;
                self.compile_expr(index)?;
                self.compile_expr(rhs)?;
                self.emit(OP_SETINDEX);
            }

            Expr::Member { target, member } => {
                let k = self.member_index(*target, member)?;
                self.compile_place_load(*target)?;
                let idx = self.syms.consts.add_number(k as f64);
                self.emit(OP_PUSH);
                self.emit_i32(idx as i32);
                self.compile_expr(rhs)?;
                self.emit(OP_SETINDEX);
            }

            _ => {
                return Err(err(
                    "TINY-C002",
                    "left-hand side of assignment must be a variable, local, or index expression",
                ));
            }
        }
        Ok(())
    }
}
