//! Typed AST: the fold of [`crate::cst`] into two disjoint node families,
//! expression nodes and command nodes, plus the two
//! semantic folds the parse tree still owes: pitch-to-MIDI encoding (with
//! range validation) and `FunApp`/`ProcApp` resolution.

use std::collections::{HashMap, HashSet};

use num_rational::Rational64;

pub use crate::cst::{BinOp, UnOp};
use crate::cst::{self, RawNote};
use crate::error::DslError;
use crate::token::Span;

#[derive(Debug, Clone)]
pub enum Expr {
    Number(i64),
    Bool(bool),
    Note { midi: i64, dur: Rational64 },
    Rest { dur: Rational64 },
    Var(String),
    Apply { op: BinOp, lhs: Box<Expr>, rhs: Box<Expr>, span: Span },
    Unary { op: UnOp, arg: Box<Expr>, span: Span },
    Let { name: String, bound: Box<Expr>, body: Box<Expr> },
    FunApp { name: String, args: Vec<Expr>, span: Span },
    ProcApp { name: String, args: Vec<Expr>, span: Span },
}

#[derive(Debug, Clone)]
pub enum Command {
    VarDecl { name: String, value: Expr },
    Assign { name: String, value: Expr, span: Span },
    Print { value: Expr },
    If { cond: Expr, then_seq: CommandSeq, else_seq: CommandSeq },
    While { cond: Expr, body: CommandSeq },
    FunDecl { name: String, params: Vec<String>, body: Expr },
    /// `None` when the procedure's body is empty (`{ return e }`) — a
    /// `command_seq` can't represent zero commands, unlike `If`/`While`
    /// bodies, which the grammar requires to be non-empty.
    ProcDecl { name: String, params: Vec<String>, body: Option<CommandSeq>, return_expr: Expr },
}

/// A command-sequence cons cell. Spec §4.2: "every command, even a single
/// one, becomes a `CommandSeq` with a possibly null tail."
#[derive(Debug, Clone)]
pub struct CommandSeq {
    pub head: Box<Command>,
    pub tail: Option<Box<CommandSeq>>,
}

impl CommandSeq {
    pub fn iter(&self) -> CommandSeqIter<'_> {
        CommandSeqIter { next: Some(self) }
    }
}

pub struct CommandSeqIter<'a> {
    next: Option<&'a CommandSeq>,
}

impl<'a> Iterator for CommandSeqIter<'a> {
    type Item = &'a Command;

    fn next(&mut self) -> Option<&'a Command> {
        let seq = self.next?;
        self.next = seq.tail.as_deref();
        Some(&seq.head)
    }
}

#[derive(Debug, Clone)]
pub struct Program {
    pub body: CommandSeq,
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum DeclKind {
    Function,
    Procedure,
}

/// Folds a concrete parse tree into the typed AST.
pub fn build(program: cst::Program) -> Result<Program, DslError> {
    let mut decls = HashMap::new();
    collect_decls(&program.commands, &mut decls);
    let body = build_command_seq(program.commands, &decls)?;
    Ok(Program { body })
}

/// First pass: walk the whole parse tree (including nested `if`/`while`/
/// `procedure` bodies) recording every `FunDecl`/`ProcDecl` name and kind,
/// so a call site can be resolved to `FunApp`/`ProcApp` independent of
/// declaration order.
fn collect_decls(commands: &[cst::Command], decls: &mut HashMap<String, DeclKind>) {
    for cmd in commands {
        match cmd {
            cst::Command::FunDecl { name, .. } => {
                decls.insert(name.clone(), DeclKind::Function);
            }
            cst::Command::ProcDecl { name, body, .. } => {
                decls.insert(name.clone(), DeclKind::Procedure);
                collect_decls(body, decls);
            }
            cst::Command::If { then_seq, else_seq, .. } => {
                collect_decls(then_seq, decls);
                collect_decls(else_seq, decls);
            }
            cst::Command::While { body, .. } => collect_decls(body, decls),
            cst::Command::VarDecl { .. } | cst::Command::Assign { .. } | cst::Command::Print { .. } => {}
        }
    }
}

/// Second pass: fold each command/expr, now that `decls` can tell a call
/// site whether it names a function or a procedure.
fn build_command_seq(commands: Vec<cst::Command>, decls: &HashMap<String, DeclKind>) -> Result<CommandSeq, DslError> {
    let mut iter = commands.into_iter();
    let first = iter.next().expect("a command_seq is never empty");
    let head = Box::new(build_command(first, decls)?);
    let rest: Vec<cst::Command> = iter.collect();
    let tail = if rest.is_empty() { None } else { Some(Box::new(build_command_seq(rest, decls)?)) };
    Ok(CommandSeq { head, tail })
}

fn build_command(cmd: cst::Command, decls: &HashMap<String, DeclKind>) -> Result<Command, DslError> {
    match cmd {
        cst::Command::VarDecl { name, value, .. } => {
            Ok(Command::VarDecl { name, value: build_expr(value, decls)? })
        }
        cst::Command::Assign { name, value, span } => {
            Ok(Command::Assign { name, value: build_expr(value, decls)?, span })
        }
        cst::Command::Print { value, .. } => Ok(Command::Print { value: build_expr(value, decls)? }),
        cst::Command::If { cond, then_seq, else_seq, .. } => Ok(Command::If {
            cond: build_expr(cond, decls)?,
            then_seq: build_command_seq(then_seq, decls)?,
            else_seq: build_command_seq(else_seq, decls)?,
        }),
        cst::Command::While { cond, body, .. } => Ok(Command::While {
            cond: build_expr(cond, decls)?,
            body: build_command_seq(body, decls)?,
        }),
        cst::Command::FunDecl { name, params, body, span } => {
            check_no_duplicate_params(&params, span)?;
            Ok(Command::FunDecl { name, params, body: build_expr(body, decls)? })
        }
        cst::Command::ProcDecl { name, params, body, return_expr, span } => {
            check_no_duplicate_params(&params, span)?;
            let body = if body.is_empty() { None } else { Some(build_command_seq(body, decls)?) };
            Ok(Command::ProcDecl { name, params, body, return_expr: build_expr(return_expr, decls)? })
        }
    }
}

fn check_no_duplicate_params(params: &[String], span: Span) -> Result<(), DslError> {
    let mut seen = HashSet::new();
    for p in params {
        if !seen.insert(p.as_str()) {
            return Err(DslError::semantic(format!("redeclared parameter '{p}'"), span));
        }
    }
    Ok(())
}

fn build_expr(expr: cst::Expr, decls: &HashMap<String, DeclKind>) -> Result<Expr, DslError> {
    match expr {
        cst::Expr::Number(n) => {
            if !n.is_integer() {
                return Err(DslError::type_error(
                    format!("expected an integer, found decimal literal '{n}'"),
                    Span::DUMMY,
                ));
            }
            Ok(Expr::Number(*n.numer()))
        }
        cst::Expr::Bool(b) => Ok(Expr::Bool(b)),
        cst::Expr::Note { note, span } => {
            let midi = encode_pitch(&note, span)?;
            let dur = note.dur.unwrap_or_else(|| Rational64::from_integer(1));
            Ok(Expr::Note { midi, dur })
        }
        cst::Expr::Rest { dur } => Ok(Expr::Rest { dur: dur.unwrap_or_else(|| Rational64::from_integer(1)) }),
        cst::Expr::Var(name) => Ok(Expr::Var(name)),
        cst::Expr::Bin { op, lhs, rhs, span } => Ok(Expr::Apply {
            op,
            lhs: Box::new(build_expr(*lhs, decls)?),
            rhs: Box::new(build_expr(*rhs, decls)?),
            span,
        }),
        cst::Expr::Unary { op, arg, span } => {
            Ok(Expr::Unary { op, arg: Box::new(build_expr(*arg, decls)?), span })
        }
        cst::Expr::Let { name, bound, body, .. } => Ok(Expr::Let {
            name,
            bound: Box::new(build_expr(*bound, decls)?),
            body: Box::new(build_expr(*body, decls)?),
        }),
        cst::Expr::Call { name, args, span } => {
            let args = args.into_iter().map(|a| build_expr(a, decls)).collect::<Result<Vec<_>, _>>()?;
            match decls.get(&name) {
                Some(DeclKind::Procedure) => Ok(Expr::ProcApp { name, args, span }),
                // Calls to a declared function, or to a name that's never
                // declared anywhere in the source, are both tagged FunApp;
                // the latter case fails as an unbound name when the
                // evaluator consults the environment for the call's name,
                // the same place it would fail if tagged ProcApp instead.
                _ => Ok(Expr::FunApp { name, args, span }),
            }
        }
    }
}

/// `midi = 12 * (octave + 1) + pitch_class(PITCH) + accidental_shift(ACCIDENTAL)`.
fn encode_pitch(raw: &RawNote, span: Span) -> Result<i64, DslError> {
    let pitch_class = match raw.pitch {
        'C' => 0,
        'D' => 2,
        'E' => 4,
        'F' => 5,
        'G' => 7,
        'A' => 9,
        'B' => 11,
        other => return Err(DslError::syntax(format!("'{other}' is not a valid pitch letter"), span)),
    };
    let accidental_shift = match raw.accidental.as_str() {
        "bb" => -2,
        "b" => -1,
        "n" => 0,
        "d" => 1,
        "dd" => 2,
        other => return Err(DslError::syntax(format!("'{other}' is not a valid accidental"), span)),
    };
    let midi = 12 * (raw.octave as i64 + 1) + pitch_class + accidental_shift;
    if !(0..=127).contains(&midi) {
        return Err(DslError::range(format!("MIDI pitch {midi} is outside [0, 127]"), span));
    }
    Ok(midi)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lexer::Lexer;
    use crate::parser::Parser;

    fn build_program(input: &str) -> Program {
        let tokens = Lexer::new(input).tokenize().unwrap();
        let cst = Parser::new(tokens).parse_program().unwrap();
        build(cst).unwrap()
    }

    #[test]
    fn test_middle_c_encodes_to_60() {
        let program = build_program("print Cn4/1");
        let Command::Print { value } = program.body.head.as_ref() else { panic!() };
        assert!(matches!(value, Expr::Note { midi: 60, .. }));
    }

    #[test]
    fn test_sharp_and_flat_shift() {
        let program = build_program("print Cd4/1");
        let Command::Print { value } = program.body.head.as_ref() else { panic!() };
        assert!(matches!(value, Expr::Note { midi: 61, .. }));
    }

    #[test]
    fn test_out_of_range_pitch_is_range_error() {
        let tokens = Lexer::new("print Cdd0/1").tokenize().unwrap();
        let cst = Parser::new(tokens).parse_program().unwrap();
        let err = build(cst).unwrap_err();
        assert_eq!(err.kind(), "RangeError");
    }

    #[test]
    fn test_decimal_literal_outside_duration_is_type_error() {
        let tokens = Lexer::new("print 0.5").tokenize().unwrap();
        let cst = Parser::new(tokens).parse_program().unwrap();
        let err = build(cst).unwrap_err();
        assert_eq!(err.kind(), "TypeError");
    }

    #[test]
    fn test_command_seq_is_cons_list() {
        let program = build_program("var x = 1; var y = 2; print x");
        let items: Vec<&Command> = program.body.iter().collect();
        assert_eq!(items.len(), 3);
        assert!(program.body.tail.is_some());
    }

    #[test]
    fn test_funapp_vs_procapp_resolution() {
        let program = build_program(
            "function f(x) = x + 1; procedure p(x) = { return x }; var a = f(1); var b = p(2)",
        );
        let items: Vec<&Command> = program.body.iter().collect();
        let Command::VarDecl { value: a_value, .. } = &items[2] else { panic!() };
        assert!(matches!(a_value, Expr::FunApp { .. }));
        let Command::VarDecl { value: b_value, .. } = &items[3] else { panic!() };
        assert!(matches!(b_value, Expr::ProcApp { .. }));
    }

    #[test]
    fn test_undeclared_call_defaults_to_funapp() {
        let program = build_program("print g(1)");
        let Command::Print { value } = program.body.head.as_ref() else { panic!() };
        assert!(matches!(value, Expr::FunApp { .. }));
    }

    #[test]
    fn test_duplicate_param_is_semantic_error() {
        let tokens = Lexer::new("function f(x, x) = x").tokenize().unwrap();
        let cst = Parser::new(tokens).parse_program().unwrap();
        let err = build(cst).unwrap_err();
        assert_eq!(err.kind(), "SemanticError");
    }
}
