//! MusicDSL: a small language for algorithmic composition.
//!
//! A program is text; its output is a time-ordered sequence of polyphonic
//! musical events (a [`value::MusicResult`]). This crate is the language
//! core only — lexer, parser, AST builder, environment/store semantics, and
//! evaluator. Rendering that result to audio or a piano-roll view is a
//! downstream concern that consumes the JSON export (`value::MusicResult::
//! to_json`) and lives outside this crate.

pub mod ast;
pub mod cst;
pub mod env;
pub mod error;
pub mod evaluator;
pub mod lexer;
pub mod parser;
pub mod store;
pub mod token;
pub mod value;

use crate::env::Environment;
use crate::error::DslError;
use crate::evaluator::Interpreter;
use crate::lexer::Lexer;
use crate::parser::Parser;
use crate::value::MusicResult;

/// The crate version, read from Cargo.toml at compile time.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// The process exit-status contract: success, syntax error, semantic or
/// range or type error, or arithmetic error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitStatus {
    Success,
    SyntaxError,
    SemanticError,
    ArithError,
}

impl ExitStatus {
    pub fn code(self) -> i32 {
        match self {
            ExitStatus::Success => 0,
            ExitStatus::SyntaxError => 1,
            ExitStatus::SemanticError => 2,
            ExitStatus::ArithError => 3,
        }
    }
}

/// What running a whole program produces: the last `print`ed `MusicResult`
/// (if any), every diagnostic line emitted along the way (non-music
/// `print`s, plus the one-line error report on failure), and the exit
/// status.
#[derive(Debug)]
pub struct ProgramOutput {
    pub last_music: Option<MusicResult>,
    pub diagnostics: Vec<String>,
    pub status: ExitStatus,
}

/// Parses a `.mdsl` source string into a typed AST, without evaluating it.
pub fn parse(source: &str) -> Result<ast::Program, DslError> {
    let tokens = Lexer::new(source).tokenize()?;
    let cst = Parser::new(tokens).parse_program()?;
    ast::build(cst)
}

/// Parses, builds the AST, and evaluates `source` end to end. Never panics
/// on malformed input — every error is caught and reported through
/// [`ProgramOutput`].
pub fn execute_program(source: &str) -> ProgramOutput {
    match run(source) {
        Ok((last_music, diagnostics)) => ProgramOutput { last_music, diagnostics, status: ExitStatus::Success },
        Err(err) => {
            let mut diagnostics = Vec::new();
            diagnostics.push(err.diagnostic_line(source));
            let status = match err {
                DslError::Syntax { .. } => ExitStatus::SyntaxError,
                DslError::Arith { .. } => ExitStatus::ArithError,
                DslError::Semantic { .. } | DslError::Type { .. } | DslError::Range { .. } => ExitStatus::SemanticError,
            };
            ProgramOutput { last_music: None, diagnostics, status }
        }
    }
}

fn run(source: &str) -> Result<(Option<MusicResult>, Vec<String>), DslError> {
    let program = parse(source)?;
    let mut interp = Interpreter::new();
    interp.run(&program, &Environment::empty())?;
    Ok((interp.printed_music.last().cloned(), interp.diagnostics))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_execute_program_s1_single_note() {
        let out = execute_program("print Cn4/1");
        assert_eq!(out.status, ExitStatus::Success);
        assert_eq!(
            out.last_music.unwrap().to_json_string(),
            r#"{"events":[{"start":0,"notes":[{"midi":60,"dur":1}]}]}"#
        );
    }

    #[test]
    fn test_execute_program_syntax_error_exit_status_1() {
        let out = execute_program("var x = ");
        assert_eq!(out.status, ExitStatus::SyntaxError);
        assert_eq!(out.status.code(), 1);
        assert!(out.diagnostics[0].starts_with("SyntaxError:"));
    }

    #[test]
    fn test_execute_program_semantic_error_exit_status_2() {
        let out = execute_program("print undeclared_name");
        assert_eq!(out.status, ExitStatus::SemanticError);
        assert_eq!(out.status.code(), 2);
    }

    #[test]
    fn test_execute_program_range_error_exit_status_2() {
        let out = execute_program("print Cdd0/1");
        assert_eq!(out.status, ExitStatus::SemanticError);
        assert_eq!(out.status.code(), 2);
    }

    #[test]
    fn test_execute_program_arith_error_exit_status_3() {
        let out = execute_program("print 1 / 0");
        assert_eq!(out.status, ExitStatus::ArithError);
        assert_eq!(out.status.code(), 3);
    }

    #[test]
    fn test_execute_program_is_deterministic() {
        let src = "var x = 1; var y = 2; print x + y";
        let a = execute_program(src);
        let b = execute_program(src);
        assert_eq!(a.diagnostics, b.diagnostics);
        assert_eq!(a.status, b.status);
    }

    #[test]
    fn test_bom_is_stripped_before_parsing() {
        let out = execute_program("\u{feff}print 1");
        assert_eq!(out.status, ExitStatus::Success);
        assert_eq!(out.diagnostics, vec!["1".to_string()]);
    }
}
