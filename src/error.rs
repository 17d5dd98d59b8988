use std::fmt;

use ariadne::{Label, Report, ReportKind, Source};

use crate::token::{token_name, Span, Token};

/// Lexical errors, produced by [`crate::lexer::Lexer`].
#[derive(Debug)]
pub enum LexError {
    UnexpectedChar { ch: char, pos: usize },
    InvalidNumber { text: String, pos: usize },
}

impl fmt::Display for LexError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LexError::UnexpectedChar { ch, pos } => write!(f, "unexpected character '{ch}' at byte {pos}"),
            LexError::InvalidNumber { text, pos } => write!(f, "invalid number literal '{text}' at byte {pos}"),
        }
    }
}

impl std::error::Error for LexError {}

impl LexError {
    fn span(&self) -> Span {
        match *self {
            LexError::UnexpectedChar { pos, .. } | LexError::InvalidNumber { pos, .. } => Span { start: pos, end: pos + 1 },
        }
    }
}

/// Grammar errors, produced by [`crate::parser::Parser`].
#[derive(Debug)]
pub enum ParseError {
    UnexpectedToken { expected: String, found: Token, span: Span },
    UnexpectedEOF { expected: String },
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParseError::UnexpectedToken { expected, found, .. } => {
                write!(f, "expected {expected}, found {}", token_name(found))
            }
            ParseError::UnexpectedEOF { expected } => write!(f, "expected {expected}, found end of input"),
        }
    }
}

impl std::error::Error for ParseError {}

impl ParseError {
    fn span(&self) -> Span {
        match self {
            ParseError::UnexpectedToken { span, .. } => *span,
            ParseError::UnexpectedEOF { .. } => Span::DUMMY,
        }
    }
}

/// Every phase past lexing/parsing raises one of these, tagged with the
/// source span where it was detected.
#[derive(Debug)]
pub enum DslError {
    /// Grammar violation (includes lex errors, which are grammar violations
    /// at the token level).
    Syntax { message: String, span: Span },
    /// Unbound name, assignment to a non-location, redeclared parameter.
    Semantic { message: String, span: Span },
    /// Operator type mismatch, wrong arity, non-boolean guard.
    Type { message: String, span: Span },
    /// MIDI pitch outside `[0, 127]`.
    Range { message: String, span: Span },
    /// Division or modulo by zero.
    Arith { message: String, span: Span },
}

impl DslError {
    pub fn syntax(message: impl Into<String>, span: Span) -> Self {
        DslError::Syntax { message: message.into(), span }
    }

    pub fn semantic(message: impl Into<String>, span: Span) -> Self {
        DslError::Semantic { message: message.into(), span }
    }

    pub fn type_error(message: impl Into<String>, span: Span) -> Self {
        DslError::Type { message: message.into(), span }
    }

    pub fn range(message: impl Into<String>, span: Span) -> Self {
        DslError::Range { message: message.into(), span }
    }

    pub fn arith(message: impl Into<String>, span: Span) -> Self {
        DslError::Arith { message: message.into(), span }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            DslError::Syntax { .. } => "SyntaxError",
            DslError::Semantic { .. } => "SemanticError",
            DslError::Type { .. } => "TypeError",
            DslError::Range { .. } => "RangeError",
            DslError::Arith { .. } => "ArithError",
        }
    }

    pub fn message(&self) -> &str {
        match self {
            DslError::Syntax { message, .. }
            | DslError::Semantic { message, .. }
            | DslError::Type { message, .. }
            | DslError::Range { message, .. }
            | DslError::Arith { message, .. } => message,
        }
    }

    pub fn span(&self) -> Span {
        match self {
            DslError::Syntax { span, .. }
            | DslError::Semantic { span, .. }
            | DslError::Type { span, .. }
            | DslError::Range { span, .. }
            | DslError::Arith { span, .. } => *span,
        }
    }

    /// `1` for a syntax error, `2` for semantic/type/range, `3` for arithmetic.
    pub fn exit_status(&self) -> i32 {
        match self {
            DslError::Syntax { .. } => 1,
            DslError::Semantic { .. } | DslError::Type { .. } | DslError::Range { .. } => 2,
            DslError::Arith { .. } => 3,
        }
    }

    /// The one-line diagnostic format: `<kind>: <message> at line L col C`.
    pub fn diagnostic_line(&self, source: &str) -> String {
        let (line, col) = line_col(source, self.span().start);
        format!("{}: {} at line {line} col {col}", self.kind(), self.message())
    }

    /// A span-aware, source-annotated report for developer-facing output, in
    /// addition to the plain one-liner `diagnostic_line` produces.
    pub fn format_diagnostic(&self, source: &str, file_name: &str) -> String {
        let span = self.span();
        let start = span.start.min(source.len());
        let end = span.end.max(start + 1).min(source.len().max(start + 1));
        let mut buf = Vec::new();
        let report = Report::build(ReportKind::Error, (file_name, start..end))
            .with_message(format!("{}: {}", self.kind(), self.message()))
            .with_label(Label::new((file_name, start..end)).with_message(self.message()))
            .finish();
        if report.write((file_name, Source::from(source)), &mut buf).is_err() {
            return self.diagnostic_line(source);
        }
        String::from_utf8_lossy(&buf).into_owned()
    }
}

impl fmt::Display for DslError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind(), self.message())
    }
}

impl std::error::Error for DslError {}

impl From<LexError> for DslError {
    fn from(e: LexError) -> Self {
        let span = e.span();
        DslError::Syntax { message: e.to_string(), span }
    }
}

impl From<ParseError> for DslError {
    fn from(e: ParseError) -> Self {
        let span = e.span();
        DslError::Syntax { message: e.to_string(), span }
    }
}

/// 1-indexed `(line, col)` for a byte offset into `source`.
pub fn line_col(source: &str, byte_pos: usize) -> (usize, usize) {
    let mut line = 1;
    let mut col = 1;
    for (idx, ch) in source.char_indices() {
        if idx >= byte_pos {
            break;
        }
        if ch == '\n' {
            line += 1;
            col = 1;
        } else {
            col += 1;
        }
    }
    (line, col)
}
