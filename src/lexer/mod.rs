use logos::Logos;

use crate::ast::Span;

#[derive(Logos, Debug, PartialEq, Clone)]
#[logos(skip r"[ \t\r\n]+")]
#[logos(skip r"#[^\n]*")]
pub enum Token {
    // Keywords
    #[token("begin")]
    Begin,
    #[token("end")]
    End,
    #[token("read")]
    Read,
    #[token("write")]
    Write,
    #[token("proc")]
    Proc,
    #[token("if")]
    If,
    #[token("then")]
    Then,
    #[token("while")]
    While,
    #[token("return")]
    Return,
    #[token("local")]
    Local,

    // Multi-char operators (longest match wins over the single-char forms)
    #[token("==")]
    EqEq,
    #[token("!=")]
    NotEq,
    #[token("<=")]
    LessEq,
    #[token(">=")]
    GreaterEq,

    // Single-char operators
    #[token("+")]
    Plus,
    #[token("-")]
    Minus,
    #[token("*")]
    Star,
    #[token("/")]
    Slash,
    #[token("%")]
    Percent,
    #[token("&")]
    Amp,
    #[token("|")]
    Pipe,
    #[token("<")]
    Less,
    #[token(">")]
    Greater,
    #[token("=")]
    Eq,

    // Punctuation
    #[token("(")]
    LParen,
    #[token(")")]
    RParen,
    #[token("[")]
    LBracket,
    #[token("]")]
    RBracket,
    #[token("{")]
    LBrace,
    #[token("}")]
    RBrace,
    #[token(",")]
    Comma,
    #[token(";")]
    Semi,
    #[token(".")]
    Dot,

    // Literals. `true`/`false` are numbers 1 and 0 — the language has
    // no boolean type.
    #[regex(r"[0-9][0-9.]*", |lex| lex.slice().parse::<f64>().ok())]
    #[token("true", |_| 1.0)]
    #[token("false", |_| 0.0)]
    Number(f64),

    // Raw bytes between double quotes, no escapes, newlines allowed.
    #[regex(r#""[^"]*""#, |lex| {
        let s = lex.slice();
        s[1..s.len() - 1].to_string()
    })]
    Text(String),

    #[regex(r"[A-Za-z][A-Za-z0-9_]*", |lex| lex.slice().to_string(), priority = 1)]
    Ident(String),

    // `$name` — reference to a local of the enclosing procedure.
    #[regex(r"\$[A-Za-z0-9_]+", |lex| lex.slice()[1..].to_string())]
    LocalRef(String),
}

#[derive(Debug, thiserror::Error)]
#[error("lex error at byte {}: '{snippet}'. {detail}", span.start)]
pub struct LexError {
    pub code: &'static str,
    pub span: Span,
    pub snippet: String,
    pub detail: String,
}

/// Lex source text into tokens with byte spans.
pub fn lex(source: &str) -> Result<Vec<(Token, Span)>, LexError> {
    let mut lexer = Token::lexer(source);
    let mut tokens = Vec::new();

    while let Some(result) = lexer.next() {
        let span = Span {
            start: lexer.span().start,
            end: lexer.span().end,
        };
        match result {
            Ok(token) => tokens.push((token, span)),
            Err(()) => {
                let bad = &source[lexer.span()];
                return Err(LexError {
                    code: lex_error_code(bad),
                    span,
                    snippet: bad.to_string(),
                    detail: lex_error_detail(bad),
                });
            }
        }
    }

    Ok(tokens)
}

fn lex_error_code(bad: &str) -> &'static str {
    if bad.starts_with('"') {
        "TINY-L002"
    } else if bad.starts_with(|c: char| c.is_ascii_digit()) {
        "TINY-L003"
    } else {
        "TINY-L001"
    }
}

fn lex_error_detail(bad: &str) -> String {
    if bad.starts_with('"') {
        "unterminated string".to_string()
    } else if bad.starts_with(|c: char| c.is_ascii_digit()) {
        format!("'{bad}' is not a valid number")
    } else {
        format!("unexpected character(s) '{bad}'")
    }
}
