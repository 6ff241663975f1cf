//! The stack machine. One `Machine` owns the whole pipeline's output:
//! compiled bytecode, the symbol tables, the operand stack, the call
//! frames, and the value heap. Hosts embed it through the binding API
//! (`register_foreign`, `call_proc`, `push_value`/`pop_value` and the
//! allocation constructors).

use std::io::{self, BufRead, Write};

use crate::ast::Expr;
use crate::compiler::{self, *};
use crate::heap::{Handle, Heap, Native, Obj};
use crate::lexer;
use crate::parser;
use crate::symbols::{Constant, SymbolTables};

#[derive(Debug, thiserror::Error)]
#[error("runtime error at pc {pc}: {message}")]
pub struct RuntimeError {
    pub code: &'static str,
    pub message: String,
    pub pc: isize,
}

type Result<T> = std::result::Result<T, RuntimeError>;

/// Foreign procedures run synchronously on the interpreter and talk
/// to it through the operand stack. A callback must not hold handles
/// across an allocation unless it roots them (a global, the stack, or
/// a `Native` trace hook).
pub type ForeignFn = fn(&mut Machine) -> Result<()>;

/// Hard caps on the operand stack and call depth. Everything else
/// grows on demand.
#[derive(Debug, Clone)]
pub struct Limits {
    pub max_stack: usize,
    pub max_frames: usize,
}

impl Default for Limits {
    fn default() -> Self {
        Limits {
            max_stack: 1024,
            max_frames: 1024,
        }
    }
}

/// Saved call state: ⟨nargs, frame pointer, return pc⟩. Holds no
/// handles, so it is not a GC root.
struct Frame {
    nargs: usize,
    fp: usize,
    ret_pc: isize,
}

pub struct Machine {
    syms: SymbolTables,
    code: Vec<u8>,
    /// -1 means halted.
    pc: isize,
    stack: Vec<Handle>,
    frames: Vec<Frame>,
    fp: usize,
    /// Runtime values of the global slots, parallel to the table in
    /// `syms`. Only the first `rt_globals` are GC roots.
    globals: Vec<Option<Handle>>,
    rt_globals: usize,
    foreign_fns: Vec<ForeignFn>,
    heap: Heap,
    limits: Limits,
    input: Box<dyn BufRead>,
    output: Box<dyn Write>,
}

impl Default for Machine {
    fn default() -> Self {
        Machine::new()
    }
}

impl Machine {
    pub fn new() -> Self {
        Machine::with_limits(Limits::default())
    }

    pub fn with_limits(limits: Limits) -> Self {
        Machine {
            syms: SymbolTables::default(),
            code: Vec::new(),
            pc: -1,
            stack: Vec::new(),
            frames: Vec::new(),
            fp: 0,
            globals: Vec::new(),
            rt_globals: 0,
            foreign_fns: Vec::new(),
            heap: Heap::new(),
            limits,
            input: Box::new(io::BufReader::new(io::stdin())),
            output: Box::new(io::stdout()),
        }
    }

    /// Replaces the streams `READ` and `PRINT` talk to.
    pub fn with_io(mut self, input: Box<dyn BufRead>, output: Box<dyn Write>) -> Self {
        self.input = input;
        self.output = output;
        self
    }

    /// Binds a host callback. Must happen before `compile`; name
    /// resolution at parse time prefers foreign procedures.
    pub fn register_foreign(&mut self, name: &str, f: ForeignFn) {
        self.syms.foreign_names.push(name.to_string());
        self.foreign_fns.push(f);
    }

    /// Parses and lowers `source`, leaving a `HALT`-terminated program
    /// ready to `run`.
    pub fn compile(&mut self, source: &str) -> std::result::Result<(), crate::Error> {
        let tokens = lexer::lex(source)?;
        let program = parser::parse(tokens, &mut self.syms)?;
        self.code = compiler::compile(&program, &mut self.syms)?;
        self.globals.resize(self.syms.globals.len(), None);
        self.pc = -1;
        Ok(())
    }

    /// Parses `source` without emitting code. The AST still carries
    /// the interned table indices.
    pub fn parse_only(&mut self, source: &str) -> std::result::Result<Vec<Expr>, crate::Error> {
        let tokens = lexer::lex(source)?;
        Ok(parser::parse(tokens, &mut self.syms)?)
    }

    /// Executes from pc 0 until `HALT` or the end of the program.
    pub fn run(&mut self) -> Result<()> {
        self.pc = 0;
        while self.pc >= 0 && (self.pc as usize) < self.code.len() {
            self.step()?;
        }
        let _ = self.output.flush();
        Ok(())
    }

    /// Invokes a compiled procedure by name. Arguments must already be
    /// on the operand stack; a `return <expr>` leaves the result there.
    pub fn call_proc(&mut self, name: &str, nargs: usize) -> Result<()> {
        let id = self
            .syms
            .procs
            .lookup(name)
            .ok_or_else(|| self.error("TINY-R008", format!("no procedure named '{name}'")))?;
        let entry = self
            .syms
            .procs
            .get(id)
            .pc
            .ok_or_else(|| self.error("TINY-R008", format!("procedure '{name}' has no body")))?;
        self.push_frame(nargs)?;
        self.pc = entry as isize;
        while self.pc >= 0 && (self.pc as usize) < self.code.len() {
            self.step()?;
        }
        let _ = self.output.flush();
        Ok(())
    }

    // ---- Host value API ----

    pub fn push_value(&mut self, value: Handle) -> Result<()> {
        self.push(value)
    }

    pub fn pop_value(&mut self) -> Result<Handle> {
        self.pop()
    }

    pub fn new_number(&mut self, value: f64) -> Handle {
        self.alloc(Obj::Num(value))
    }

    pub fn new_string(&mut self, value: impl Into<String>) -> Handle {
        let s = value.into();
        self.alloc(Obj::Str(s))
    }

    pub fn new_array(&mut self, len: usize) -> Handle {
        self.alloc(Obj::Array(vec![None; len]))
    }

    pub fn new_native(&mut self, value: Box<dyn Native>) -> Handle {
        self.alloc(Obj::Native(value))
    }

    pub fn obj(&self, handle: Handle) -> Option<&Obj> {
        self.heap.get(handle)
    }

    pub fn number(&self, handle: Handle) -> Option<f64> {
        match self.heap.get(handle) {
            Some(Obj::Num(n)) => Some(*n),
            _ => None,
        }
    }

    pub fn string(&self, handle: Handle) -> Option<&str> {
        match self.heap.get(handle) {
            Some(Obj::Str(s)) => Some(s),
            _ => None,
        }
    }

    pub fn stack_len(&self) -> usize {
        self.stack.len()
    }

    pub fn heap(&self) -> &Heap {
        &self.heap
    }

    /// Collects now, regardless of the allocation trigger.
    pub fn collect_garbage(&mut self) {
        let roots: Vec<Handle> = self
            .stack
            .iter()
            .copied()
            .chain(self.globals[..self.rt_globals].iter().flatten().copied())
            .collect();
        self.heap.collect(roots);
    }

    // ---- Execution ----

    fn error(&self, code: &'static str, message: impl Into<String>) -> RuntimeError {
        RuntimeError {
            code,
            message: message.into(),
            pc: self.pc,
        }
    }

    /// Allocation is the only GC safe point: every intermediate value
    /// must be back under a root before this is called.
    fn alloc(&mut self, obj: Obj) -> Handle {
        if self.heap.wants_collect() {
            self.collect_garbage();
        }
        self.heap.alloc(obj)
    }

    fn fetch(&mut self) -> Result<u8> {
        let at = self.pc as usize;
        let byte = *self
            .code
            .get(at)
            .ok_or_else(|| self.error("TINY-R001", "program counter out of range"))?;
        self.pc += 1;
        Ok(byte)
    }

    fn fetch_i32(&mut self) -> Result<i32> {
        let at = self.pc as usize;
        let bytes = self
            .code
            .get(at..at + 4)
            .ok_or_else(|| self.error("TINY-R001", "truncated instruction"))?;
        let mut imm = [0u8; 4];
        imm.copy_from_slice(bytes);
        self.pc += 4;
        Ok(i32::from_le_bytes(imm))
    }

    fn push(&mut self, value: Handle) -> Result<()> {
        if self.stack.len() >= self.limits.max_stack {
            return Err(self.error(
                "TINY-R002",
                format!("stack overflow (limit {})", self.limits.max_stack),
            ));
        }
        self.stack.push(value);
        Ok(())
    }

    fn pop(&mut self) -> Result<Handle> {
        self.stack
            .pop()
            .ok_or_else(|| self.error("TINY-R003", "stack underflow"))
    }

    fn pop_number(&mut self) -> Result<f64> {
        let handle = self.pop()?;
        match self.heap.get(handle) {
            Some(Obj::Num(n)) => Ok(*n),
            _ => Err(self.error("TINY-R004", "expected a number")),
        }
    }

    fn push_frame(&mut self, nargs: usize) -> Result<()> {
        if self.frames.len() >= self.limits.max_frames {
            return Err(self.error(
                "TINY-R011",
                format!("call depth limit ({}) exceeded", self.limits.max_frames),
            ));
        }
        self.frames.push(Frame {
            nargs,
            fp: self.fp,
            ret_pc: self.pc,
        });
        self.fp = self.stack.len();
        Ok(())
    }

    /// Drops the frame's locals and arguments, restoring the caller's
    /// pc and frame pointer.
    fn pop_frame(&mut self) -> Result<()> {
        let frame = self
            .frames
            .pop()
            .ok_or_else(|| self.error("TINY-R012", "return outside of a procedure"))?;
        self.stack.truncate(self.fp);
        if self.stack.len() < frame.nargs {
            return Err(self.error("TINY-R003", "stack underflow"));
        }
        let depth = self.stack.len() - frame.nargs;
        self.stack.truncate(depth);
        self.fp = frame.fp;
        self.pc = frame.ret_pc;
        Ok(())
    }

    fn local_slot(&self, offset: i32) -> Result<usize> {
        let at = self.fp as isize + offset as isize;
        if at < 0 || at as usize >= self.stack.len() {
            return Err(self.error("TINY-R013", format!("local slot {offset} out of range")));
        }
        Ok(at as usize)
    }

    fn array_len(&self, handle: Handle) -> Result<usize> {
        match self.heap.get(handle) {
            Some(Obj::Array(elems)) => Ok(elems.len()),
            _ => Err(self.error("TINY-R004", "expected an array")),
        }
    }

    fn read_line(&mut self) -> Result<String> {
        let mut line = String::new();
        self.input
            .read_line(&mut line)
            .map_err(|e| self.error("TINY-R014", format!("read failed: {e}")))?;
        while line.ends_with('\n') || line.ends_with('\r') {
            line.pop();
        }
        Ok(line)
    }

    fn write_top(&mut self) -> Result<()> {
        let handle = self.pop()?;
        let text = match self.heap.get(handle) {
            Some(Obj::Num(n)) => Some(format_number(*n)),
            Some(Obj::Str(s)) => Some(s.clone()),
            // Arrays and natives have no printable form.
            _ => None,
        };
        if let Some(text) = text {
            writeln!(self.output, "{text}")
                .map_err(|e| self.error("TINY-R006", format!("write failed: {e}")))?;
        }
        Ok(())
    }

    fn step(&mut self) -> Result<()> {
        let op = self.fetch()?;
        match op {
            OP_PUSH => {
                let id = self.fetch_i32()? as usize;
                let obj = match self.syms.consts.get(id) {
                    Some(Constant::Num(n)) => Obj::Num(*n),
                    Some(Constant::Str(s)) => Obj::Str(s.clone()),
                    None => {
                        return Err(self.error("TINY-R001", format!("bad constant index {id}")))
                    }
                };
                let value = self.alloc(obj);
                self.push(value)?;
            }

            OP_POP => {
                self.pop()?;
            }

            OP_ADD | OP_SUB | OP_MUL | OP_DIV | OP_MOD | OP_OR | OP_AND | OP_LT | OP_LTE
            | OP_GT | OP_GTE | OP_EQU | OP_NEQU => {
                // Read both operands before allocating the result; the
                // popped handles are no longer rooted.
                let b = self.pop_number()?;
                let a = self.pop_number()?;
                let value = match op {
                    OP_ADD => a + b,
                    OP_SUB => a - b,
                    OP_MUL => a * b,
                    OP_DIV => a / b,
                    OP_MOD => {
                        if b as i64 == 0 {
                            return Err(self.error("TINY-R005", "modulo by zero"));
                        }
                        ((a as i64) % (b as i64)) as f64
                    }
                    OP_OR => ((a as i64) | (b as i64)) as f64,
                    OP_AND => ((a as i64) & (b as i64)) as f64,
                    OP_LT => (a < b) as i64 as f64,
                    OP_LTE => (a <= b) as i64 as f64,
                    OP_GT => (a > b) as i64 as f64,
                    OP_GTE => (a >= b) as i64 as f64,
                    OP_EQU => (a == b) as i64 as f64,
                    _ => (a != b) as i64 as f64,
                };
                let result = self.alloc(Obj::Num(value));
                self.push(result)?;
            }

            OP_PRINT => self.write_top()?,

            OP_SET => {
                let idx = self.fetch_i32()? as usize;
                let value = self.pop()?;
                if idx >= self.globals.len() {
                    self.globals.resize(idx + 1, None);
                }
                if self.rt_globals < idx + 1 {
                    self.rt_globals = idx + 1;
                }
                self.globals[idx] = Some(value);
            }

            OP_GET => {
                let idx = self.fetch_i32()? as usize;
                match self.globals.get(idx).copied().flatten() {
                    Some(value) => self.push(value)?,
                    None => {
                        let name = if idx < self.syms.globals.len() {
                            self.syms.globals.get(idx).name.clone()
                        } else {
                            format!("#{idx}")
                        };
                        return Err(self.error(
                            "TINY-R007",
                            format!("global '{name}' read before it was set"),
                        ));
                    }
                }
            }

            OP_READ => {
                let line = self.read_line()?;
                let value = self.alloc(Obj::Str(line));
                self.push(value)?;
            }

            OP_GOTO => {
                let target = self.fetch_i32()?;
                self.pc = target as isize;
            }

            OP_GOTOZ => {
                let target = self.fetch_i32()?;
                if self.pop_number()? == 0.0 {
                    self.pc = target as isize;
                }
            }

            OP_GOTONZ => {
                let target = self.fetch_i32()?;
                if self.pop_number()? != 0.0 {
                    self.pc = target as isize;
                }
            }

            OP_CALL => {
                let nargs = self.fetch_i32()? as usize;
                let id = self.fetch_i32()? as usize;
                let entry = if id < self.syms.procs.len() {
                    self.syms.procs.get(id).pc
                } else {
                    None
                };
                let entry = entry
                    .ok_or_else(|| self.error("TINY-R008", format!("bad procedure id {id}")))?;
                self.push_frame(nargs)?;
                self.pc = entry as isize;
            }

            OP_RETURN => self.pop_frame()?,

            OP_RETURN_VALUE => {
                let ret = self.pop()?;
                self.pop_frame()?;
                self.push(ret)?;
            }

            OP_CALLF => {
                let slot = self.fetch_i32()? as usize;
                let f = *self
                    .foreign_fns
                    .get(slot)
                    .ok_or_else(|| self.error("TINY-R001", format!("bad foreign slot {slot}")))?;
                f(self)?;
            }

            OP_GETLOCAL => {
                let offset = self.fetch_i32()?;
                let at = self.local_slot(offset)?;
                let value = self.stack[at];
                self.push(value)?;
            }

            OP_SETLOCAL => {
                let offset = self.fetch_i32()?;
                let value = self.pop()?;
                let at = self.local_slot(offset)?;
                self.stack[at] = value;
            }

            OP_MAKE_ARRAY => {
                let len = self.pop_number()?;
                if len < 0.0 {
                    return Err(self.error("TINY-R009", format!("negative array length ({len})")));
                }
                let array = self.alloc(Obj::Array(vec![None; len as usize]));
                self.push(array)?;
            }

            OP_SETINDEX => {
                let value = self.pop()?;
                let index = self.pop_number()? as i64;
                let array = self.pop()?;
                let len = self.array_len(array)?;
                if index < 0 || index as usize >= len {
                    return Err(
                        self.error("TINY-R010", format!("array index out of bounds ({index})"))
                    );
                }
                if let Some(Obj::Array(elems)) = self.heap.get_mut(array) {
                    elems[index as usize] = Some(value);
                }
            }

            OP_GETINDEX => {
                let index = self.pop_number()? as i64;
                let array = self.pop()?;
                let len = self.array_len(array)?;
                if index < 0 || index as usize >= len {
                    return Err(
                        self.error("TINY-R010", format!("array index out of bounds ({index})"))
                    );
                }
                let slot = match self.heap.get(array) {
                    Some(Obj::Array(elems)) => elems[index as usize],
                    _ => None,
                };
                match slot {
                    Some(value) => self.push(value)?,
                    None => {
                        // Never-written element reads as a fresh 0.
                        let zero = self.alloc(Obj::Num(0.0));
                        self.push(zero)?;
                    }
                }
            }

            OP_HALT => self.pc = -1,

            other => return Err(self.error("TINY-R001", format!("unknown opcode {other}"))),
        }
        Ok(())
    }
}

/// Integral values print without a fractional part, everything else
/// the shortest round-trip way — close to C's `%g` for the values the
/// language produces.
fn format_number(n: f64) -> String {
    if n == (n as i64) as f64 {
        format!("{}", n as i64)
    } else {
        format!("{n}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;

    #[derive(Clone, Default)]
    struct SharedBuf(Rc<RefCell<Vec<u8>>>);

    impl Write for SharedBuf {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.borrow_mut().extend_from_slice(buf);
            Ok(buf.len())
        }
        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl SharedBuf {
        fn text(&self) -> String {
            String::from_utf8(self.0.borrow().clone()).unwrap()
        }
    }

    fn machine_with_output() -> (Machine, SharedBuf) {
        let buf = SharedBuf::default();
        let m = Machine::new().with_io(Box::new(io::empty()), Box::new(buf.clone()));
        (m, buf)
    }

    fn run_program(source: &str) -> (String, Machine) {
        let (mut m, buf) = machine_with_output();
        m.compile(source).unwrap();
        m.run().unwrap();
        (buf.text(), m)
    }

    fn run_with_input(source: &str, input: &str) -> String {
        let buf = SharedBuf::default();
        let mut m = Machine::new().with_io(
            Box::new(io::Cursor::new(input.to_string().into_bytes())),
            Box::new(buf.clone()),
        );
        m.compile(source).unwrap();
        m.run().unwrap();
        buf.text()
    }

    #[test]
    fn arithmetic_precedence() {
        let (out, _) = run_program("write 1 + 2 * 3 end");
        assert_eq!(out, "7\n");
    }

    #[test]
    fn while_counts_down() {
        let (out, _) = run_program("x = 3 while x > 0 write x end x = x - 1 end");
        assert_eq!(out, "3\n2\n1\n");
    }

    #[test]
    fn proc_squares_its_argument() {
        let (out, _) = run_program("proc f(n) return $n * $n end write f(6) end");
        assert_eq!(out, "36\n");
    }

    #[test]
    fn array_elements_add_up() {
        let (out, _) =
            run_program("a = [3] a[0] = 1 a[1] = 2 a[2] = a[0] + a[1] write a[2] end");
        assert_eq!(out, "3\n");
    }

    #[test]
    fn recursive_factorial() {
        let (out, _) = run_program(
            "proc fact(n) if $n <= 1 then return 1 end return $n * fact($n - 1) end write fact(6) end",
        );
        assert_eq!(out, "720\n");
    }

    #[test]
    fn strings_print_verbatim() {
        let (out, _) = run_program("write \"hi\" end");
        assert_eq!(out, "hi\n");
    }

    #[test]
    fn fractional_numbers_keep_their_point() {
        let (out, _) = run_program("write 7 / 2 end");
        assert_eq!(out, "3.5\n");
    }

    #[test]
    fn empty_program_runs_clean() {
        let (out, m) = run_program("");
        assert_eq!(out, "");
        assert_eq!(m.stack_len(), 0);
    }

    #[test]
    fn plain_return_balances_stack() {
        let (_, m) = run_program("proc f(a, b) return ; end f(1, 2)");
        assert_eq!(m.stack_len(), 0);
    }

    #[test]
    fn value_return_leaves_exactly_one() {
        let (_, m) = run_program("proc f(a) return $a end f(5)");
        assert_eq!(m.stack_len(), 1);
    }

    #[test]
    fn loop_body_preserves_stack_depth() {
        let (_, m) = run_program("i = 0 while i < 10 i = i + 1 end");
        assert_eq!(m.stack_len(), 0);
    }

    #[test]
    fn locals_and_arguments_coexist() {
        let (out, _) = run_program(
            "proc f(a, b) local s s = $a + $b return $s * 2 end write f(3, 4) end",
        );
        assert_eq!(out, "14\n");
    }

    #[test]
    fn member_sugar_reads_and_writes() {
        let (out, _) = run_program(
            "pt = { x, y } pt = [2] pt.x = 3 pt.y = 4 write pt.x * pt.x + pt.y * pt.y end",
        );
        assert_eq!(out, "25\n");
    }

    #[test]
    fn unwritten_array_slot_reads_zero() {
        let (out, _) = run_program("a = [4] write a[3] end");
        assert_eq!(out, "0\n");
    }

    #[test]
    fn integer_ops_truncate() {
        let (out, _) = run_program("write 7 % 3 6 | 1 6 & 3 end");
        assert_eq!(out, "1\n7\n2\n");
    }

    #[test]
    fn true_false_are_one_and_zero() {
        let (out, _) = run_program("write true false end");
        assert_eq!(out, "1\n0\n");
    }

    #[test]
    fn read_strips_newline() {
        let out = run_with_input("read x end write x end", "hello\nrest\n");
        assert_eq!(out, "hello\n");
    }

    #[test]
    fn read_at_eof_yields_empty_string() {
        let out = run_with_input("read x end write x \"done\" end", "");
        assert_eq!(out, "\ndone\n");
    }

    #[test]
    fn read_into_local() {
        let out = run_with_input(
            "proc greet() local name read $name end write $name end end greet()",
            "tiny\n",
        );
        assert_eq!(out, "tiny\n");
    }

    #[test]
    fn array_index_at_length_is_fatal() {
        let (mut m, _) = machine_with_output();
        m.compile("a = [3] write a[3] end").unwrap();
        let err = m.run().unwrap_err();
        assert_eq!(err.code, "TINY-R010");
    }

    #[test]
    fn array_index_minus_one_is_fatal() {
        let (mut m, _) = machine_with_output();
        m.compile("a = [3] x = 0 - 1 write a[x] end").unwrap();
        let err = m.run().unwrap_err();
        assert_eq!(err.code, "TINY-R010");
    }

    #[test]
    fn negative_array_length_is_fatal() {
        let (mut m, _) = machine_with_output();
        m.compile("a = [-2]").unwrap();
        let err = m.run().unwrap_err();
        assert_eq!(err.code, "TINY-R009");
    }

    #[test]
    fn modulo_by_zero_is_fatal() {
        let (mut m, _) = machine_with_output();
        m.compile("write 1 % 0 end").unwrap();
        let err = m.run().unwrap_err();
        assert_eq!(err.code, "TINY-R005");
    }

    #[test]
    fn skipped_initialization_fails_at_runtime() {
        // The assignment compiles (satisfying the static check) but
        // never executes, so the read finds an empty slot.
        let (mut m, _) = machine_with_output();
        m.compile("if 0 then x = 1 end write x end").unwrap();
        let err = m.run().unwrap_err();
        assert_eq!(err.code, "TINY-R007");
    }

    #[test]
    fn call_depth_limit_is_enforced() {
        let buf = SharedBuf::default();
        let mut m = Machine::with_limits(Limits {
            max_stack: 1024,
            max_frames: 16,
        })
        .with_io(Box::new(io::empty()), Box::new(buf));
        m.compile("proc f() return f() end x = f()").unwrap();
        let err = m.run().unwrap_err();
        assert_eq!(err.code, "TINY-R011");
    }

    #[test]
    fn nested_calls_up_to_the_limit_succeed() {
        let buf = SharedBuf::default();
        let mut m = Machine::with_limits(Limits {
            max_stack: 1024,
            max_frames: 16,
        })
        .with_io(Box::new(io::empty()), Box::new(buf.clone()));
        // 16 frames deep exactly.
        m.compile(
            "proc f(n) if $n > 1 then return f($n - 1) + 1 end return 1 end write f(16) end",
        )
        .unwrap();
        m.run().unwrap();
        assert_eq!(buf.text(), "16\n");
    }

    #[test]
    fn gc_keeps_loop_allocation_bounded() {
        let (_, m) = run_program("i = 0 s = \"\" while i < 200 s = \"x\" i = i + 1 end");
        // Two live globals plus whatever headroom the 2× policy left.
        assert!(m.heap().live() < 50, "live = {}", m.heap().live());
    }

    #[test]
    fn call_proc_from_the_host() {
        let (mut m, _) = machine_with_output();
        m.compile("proc add(a, b) return $a + $b end").unwrap();
        m.run().unwrap();
        let x = m.new_number(2.0);
        m.push_value(x).unwrap();
        let y = m.new_number(40.0);
        m.push_value(y).unwrap();
        m.call_proc("add", 2).unwrap();
        let result = m.pop_value().unwrap();
        assert_eq!(m.number(result), Some(42.0));
        assert_eq!(m.stack_len(), 0);
    }

    #[test]
    fn call_proc_unknown_name_errors() {
        let (mut m, _) = machine_with_output();
        m.compile("x = 1").unwrap();
        let err = m.call_proc("nope", 0).unwrap_err();
        assert_eq!(err.code, "TINY-R008");
    }

    fn double_top(m: &mut Machine) -> Result<()> {
        let h = m.pop_value()?;
        let n = m.number(h).unwrap_or(0.0);
        let doubled = m.new_number(n * 2.0);
        m.push_value(doubled)
    }

    #[test]
    fn foreign_procedure_round_trip() {
        let buf = SharedBuf::default();
        let mut m = Machine::new().with_io(Box::new(io::empty()), Box::new(buf.clone()));
        m.register_foreign("dbl", double_top);
        m.compile("x = dbl(21) write x end").unwrap();
        m.run().unwrap();
        assert_eq!(buf.text(), "42\n");
    }

    #[test]
    fn push_pop_round_trip_restores_stack() {
        let mut m = Machine::new();
        let before = m.stack_len();
        let a = m.new_number(1.0);
        m.push_value(a).unwrap();
        let b = m.new_string("two");
        m.push_value(b).unwrap();
        m.pop_value().unwrap();
        m.pop_value().unwrap();
        assert_eq!(m.stack_len(), before);
    }

    #[test]
    fn format_number_matches_printf_g_for_common_values() {
        assert_eq!(format_number(7.0), "7");
        assert_eq!(format_number(0.0), "0");
        assert_eq!(format_number(-3.0), "-3");
        assert_eq!(format_number(3.5), "3.5");
    }
}
