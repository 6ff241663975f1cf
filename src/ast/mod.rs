use serde::Serialize;

mod source_map;
pub use source_map::SourceMap;

/// Byte range in the source text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct Span {
    pub start: usize,
    pub end: usize,
}

/// Index into the constant pool.
pub type ConstId = usize;
/// Index into the global variable table.
pub type VarId = usize;

/// Callable id as resolved at parse time: non-negative ids name user
/// procedures, negative ids name foreign procedures (`-(slot + 1)`).
pub type CalleeId = i32;

/// Frame-relative slot: arguments sit below the frame pointer at
/// `-nargs + i`, declared locals at `0, 1, …`.
pub type LocalIdx = i32;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum BinOp {
    Assign,
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Or,
    And,
    Lt,
    Lte,
    Gt,
    Gte,
    Eq,
    Ne,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum UnaryOp {
    Neg,
    /// `+x` parses but lowers to nothing.
    Plus,
}

/// An array-shaped place: a global slot or a frame-relative local.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Place {
    Global(VarId),
    Local(LocalIdx),
}

/// Everything is an expression; statement sequences are `Vec<Expr>`.
/// Names are resolved to table indices while parsing, so the compiler
/// never sees an identifier string except for member names (those are
/// resolved against the member map late, when the assignment that
/// defines the map has been seen).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum Expr {
    Num(ConstId),
    Str(ConstId),
    Global(VarId),
    LocalRef(LocalIdx),
    /// `local x` — reserves a slot, produces no code by itself.
    LocalDecl(LocalIdx),
    Call {
        callee: CalleeId,
        args: Vec<Expr>,
    },
    Binary {
        op: BinOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
    Unary {
        op: UnaryOp,
        operand: Box<Expr>,
    },
    Paren(Box<Expr>),
    Proc {
        id: usize,
        num_locals: usize,
        body: Vec<Expr>,
    },
    If {
        cond: Box<Expr>,
        body: Vec<Expr>,
    },
    While {
        cond: Box<Expr>,
        body: Vec<Expr>,
    },
    Return(Option<Box<Expr>>),
    Read(Vec<Place>),
    Write(Vec<Expr>),
    /// `[len]` — a fresh array of `len` empty slots.
    MakeArray(Box<Expr>),
    Index {
        array: Place,
        index: Box<Expr>,
    },
    /// `var.member` — the compiler accepts only a global with a
    /// named-member map as the target.
    Member {
        target: Place,
        member: String,
    },
    /// `{ a, b, c }` — only legal as the RHS of a global assignment,
    /// where it defines that global's member map.
    MemberList(Vec<String>),
}
