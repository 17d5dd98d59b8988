//! `evaluate_expr` / `execute_command` walk the typed AST, threading an
//! [`Interpreter`] (store + print side-channel) through the recursion the
//! same way a compile context gets threaded through a tree walk. Hosts the
//! operator table and dispatches the temporal algebra (`value.rs`).

use std::rc::Rc;

use crate::ast::{Command, CommandSeq, Expr, Program};
use crate::cst::{BinOp, UnOp};
use crate::env::{DVal, Environment};
use crate::error::DslError;
use crate::store::{Closure, ClosureBody, ClosureKind, Location, Store};
use crate::token::Span;
use crate::value::{EVal, MusicResult};

/// Threads the store through evaluation and collects the print side-channel:
/// a printed `MusicResult` goes to `printed_music`, anything else gets a
/// textual diagnostic line.
pub struct Interpreter {
    pub store: Store,
    /// Every `MusicResult` printed, in program order.
    pub printed_music: Vec<MusicResult>,
    /// Textual representation of every non-music `print`.
    pub diagnostics: Vec<String>,
}

impl Default for Interpreter {
    fn default() -> Self {
        Self::new()
    }
}

impl Interpreter {
    pub fn new() -> Self {
        Interpreter { store: Store::new(), printed_music: Vec::new(), diagnostics: Vec::new() }
    }

    pub fn last_printed_music(&self) -> Option<&MusicResult> {
        self.printed_music.last()
    }

    /// Runs a whole program against a starting environment, returning the
    /// environment in effect after the last command.
    pub fn run(&mut self, program: &Program, env: &Environment) -> Result<Environment, DslError> {
        self.execute_seq(&program.body, env)
    }

    pub fn execute_seq(&mut self, seq: &CommandSeq, env: &Environment) -> Result<Environment, DslError> {
        let mut current = env.clone();
        for cmd in seq.iter() {
            current = self.execute_command(cmd, &current)?;
        }
        Ok(current)
    }

    pub fn execute_command(&mut self, cmd: &Command, env: &Environment) -> Result<Environment, DslError> {
        match cmd {
            Command::VarDecl { name, value } => {
                let v = self.evaluate_expr(value, env)?;
                let loc = self.store.allocate_value(v);
                Ok(env.bind(name.clone(), DVal::Location(loc)))
            }
            Command::Assign { name, value, span } => {
                let loc = match env.lookup(name) {
                    Some(DVal::Location(loc)) => loc,
                    Some(DVal::Val(_)) => {
                        return Err(DslError::semantic(
                            format!("'{name}' is not assignable (bound by 'let', not 'var')"),
                            *span,
                        ))
                    }
                    None => return Err(DslError::semantic(format!("unbound name '{name}'"), *span)),
                };
                let v = self.evaluate_expr(value, env)?;
                self.store.update(loc, v, *span)?;
                Ok(env.clone())
            }
            Command::Print { value } => {
                let v = self.evaluate_expr(value, env)?;
                match v {
                    EVal::Music(m) => self.printed_music.push(m),
                    other => self.diagnostics.push(other.to_string()),
                }
                Ok(env.clone())
            }
            Command::If { cond, then_seq, else_seq } => {
                if self.evaluate_expr(cond, env)?.as_bool(Span::DUMMY)? {
                    self.execute_seq(then_seq, env)
                } else {
                    self.execute_seq(else_seq, env)
                }
            }
            Command::While { cond, body } => self.execute_while(cond, body, env),
            Command::FunDecl { name, params, body } => {
                self.bind_closure(name, params, ClosureKind::Function, ClosureBody::Function(Rc::new(body.clone())), env)
            }
            Command::ProcDecl { name, params, body, return_expr } => self.bind_closure(
                name,
                params,
                ClosureKind::Procedure,
                ClosureBody::Procedure {
                    body: body.clone().map(Rc::new),
                    return_expr: Rc::new(return_expr.clone()),
                },
                env,
            ),
        }
    }

    /// Loop-scope reclamation: the condition
    /// and body of every iteration re-run against the env the loop was
    /// *entered* with, not the env the previous iteration returned — so a
    /// `var`/`function`/`procedure` declared inside the body is scoped to
    /// that one iteration and never threads into the next. State that must
    /// survive iterations (spec's `S5` scenario) is carried by `Assign` to a
    /// location declared before the loop, which mutates the store in place
    /// and needs no env growth at all.
    ///
    /// The one exception: if the iteration constructs a closure (a nested
    /// `function`/`procedure`), its binding is kept live into the next
    /// iteration and the loop's final env, since the closure's
    /// `captured_env` may be reachable beyond this iteration and its
    /// backing locations must not be reclaimed under it.
    fn execute_while(&mut self, cond: &Expr, body: &CommandSeq, env: &Environment) -> Result<Environment, DslError> {
        let mut current = env.clone();
        while self.evaluate_expr(cond, &current)?.as_bool(Span::DUMMY)? {
            let mark = self.store.next_loc();
            let result_env = self.execute_seq(body, &current)?;
            if self.store.has_closure_since(mark) {
                current = result_env;
            } else {
                self.store.truncate_to(mark);
            }
        }
        Ok(current)
    }

    /// Allocates the closure's location before building the closure itself,
    /// so its own `captured_env` already resolves `name` — how recursion
    /// works without mutating any environment in place (see `store.rs`).
    fn bind_closure(
        &mut self,
        name: &str,
        params: &[String],
        kind: ClosureKind,
        body: ClosureBody,
        env: &Environment,
    ) -> Result<Environment, DslError> {
        let loc = self.store.next_loc();
        let new_env = env.bind(name.to_string(), DVal::Location(loc));
        let closure =
            Closure { kind, params: Rc::new(params.to_vec()), body, captured_env: new_env.clone() };
        self.store.allocate_closure(closure);
        Ok(new_env)
    }

    pub fn evaluate_expr(&mut self, expr: &Expr, env: &Environment) -> Result<EVal, DslError> {
        match expr {
            Expr::Number(n) => Ok(EVal::Int(*n)),
            Expr::Bool(b) => Ok(EVal::Bool(*b)),
            Expr::Note { midi, dur } => Ok(EVal::Music(MusicResult::single_note(*midi, *dur))),
            Expr::Rest { dur } => Ok(EVal::Music(MusicResult::single_note(-1, *dur))),
            Expr::Var(name) => self.lookup_value(name, env, Span::DUMMY),
            Expr::Apply { op, lhs, rhs, span } => {
                let lv = self.evaluate_expr(lhs, env)?;
                let rv = self.evaluate_expr(rhs, env)?;
                apply_binop(*op, lv, rv, *span)
            }
            Expr::Unary { op, arg, span } => {
                let v = self.evaluate_expr(arg, env)?;
                apply_unop(*op, v, *span)
            }
            Expr::Let { name, bound, body } => {
                let v = self.evaluate_expr(bound, env)?;
                let inner = env.bind(name.clone(), DVal::Val(v));
                self.evaluate_expr(body, &inner)
            }
            Expr::FunApp { name, args, span } => self.eval_funapp(name, args, env, *span),
            Expr::ProcApp { name, args, span } => self.eval_procapp(name, args, env, *span),
        }
    }

    fn lookup_value(&self, name: &str, env: &Environment, span: Span) -> Result<EVal, DslError> {
        match env.lookup(name) {
            Some(DVal::Val(v)) => Ok(v),
            Some(DVal::Location(loc)) => self.store.access_value(loc, span),
            None => Err(DslError::semantic(format!("unbound name '{name}'"), span)),
        }
    }

    fn lookup_location(&self, name: &str, env: &Environment, span: Span) -> Result<Location, DslError> {
        match env.lookup(name) {
            Some(DVal::Location(loc)) => Ok(loc),
            Some(DVal::Val(_)) => Err(DslError::type_error(format!("'{name}' is not callable"), span)),
            None => Err(DslError::semantic(format!("unbound name '{name}'"), span)),
        }
    }

    fn eval_args(&mut self, args: &[Expr], env: &Environment) -> Result<Vec<EVal>, DslError> {
        args.iter().map(|a| self.evaluate_expr(a, env)).collect()
    }

    fn check_arity(name: &str, expected: usize, found: usize, span: Span) -> Result<(), DslError> {
        if expected != found {
            return Err(DslError::type_error(
                format!("'{name}' expects {expected} argument(s), found {found}"),
                span,
            ));
        }
        Ok(())
    }

    /// Extends the closure's *captured* environment with
    /// parameter bindings (by value) and evaluates the body expression
    /// against an isolated store derivative — no mutation inside a
    /// function body is observable to the caller (the grammar already
    /// forbids `Assign` in an expression body, so nothing would escape the
    /// clone anyway; the clone exists to make that guarantee structural
    /// rather than grammar-only).
    fn eval_funapp(&mut self, name: &str, args: &[Expr], env: &Environment, span: Span) -> Result<EVal, DslError> {
        let loc = self.lookup_location(name, env, span)?;
        let closure = self.store.access_closure(loc, span)?;
        if closure.kind != ClosureKind::Function {
            return Err(DslError::type_error(format!("'{name}' is a procedure, not a function"), span));
        }
        Self::check_arity(name, closure.params.len(), args.len(), span)?;
        let arg_vals = self.eval_args(args, env)?;
        let mut call_env = closure.captured_env.clone();
        for (param, val) in closure.params.iter().zip(arg_vals) {
            call_env = call_env.bind(param.clone(), DVal::Val(val));
        }
        let ClosureBody::Function(body) = &closure.body else {
            return Err(DslError::type_error(format!("'{name}' has no function body"), span));
        };
        let mut call_interp = Interpreter { store: self.store.clone(), printed_music: Vec::new(), diagnostics: Vec::new() };
        call_interp.evaluate_expr(body, &call_env)
    }

    /// Binds parameters in the captured environment, executes
    /// the body, then evaluates `return`. Both store and control effects
    /// are threaded through `self` — visible to the caller, unlike a
    /// function call.
    fn eval_procapp(&mut self, name: &str, args: &[Expr], env: &Environment, span: Span) -> Result<EVal, DslError> {
        let loc = self.lookup_location(name, env, span)?;
        let closure = self.store.access_closure(loc, span)?;
        if closure.kind != ClosureKind::Procedure {
            return Err(DslError::type_error(format!("'{name}' is a function, not a procedure"), span));
        }
        Self::check_arity(name, closure.params.len(), args.len(), span)?;
        let arg_vals = self.eval_args(args, env)?;
        let mut call_env = closure.captured_env.clone();
        for (param, val) in closure.params.iter().zip(arg_vals) {
            call_env = call_env.bind(param.clone(), DVal::Val(val));
        }
        let ClosureBody::Procedure { body, return_expr } = &closure.body else {
            return Err(DslError::type_error(format!("'{name}' has no procedure body"), span));
        };
        let body = body.clone();
        let return_expr = Rc::clone(return_expr);
        let call_env_after = match &body {
            Some(seq) => self.execute_seq(seq, &call_env)?,
            None => call_env,
        };
        self.evaluate_expr(&return_expr, &call_env_after)
    }
}

/// Structural equality for `==`/`!=`: `(int,int)` or `(bool,bool)` only.
fn structural_eq(lv: &EVal, rv: &EVal, span: Span) -> Result<bool, DslError> {
    match (lv, rv) {
        (EVal::Int(a), EVal::Int(b)) => Ok(a == b),
        (EVal::Bool(a), EVal::Bool(b)) => Ok(a == b),
        (l, r) => Err(DslError::type_error(format!("cannot compare {} and {}", l.type_name(), r.type_name()), span)),
    }
}

/// Dispatch table for the binary operators. Both operands are
/// already evaluated left-to-right by the caller; `and`/`or` are therefore
/// non-short-circuiting by construction.
fn apply_binop(op: BinOp, lv: EVal, rv: EVal, span: Span) -> Result<EVal, DslError> {
    match op {
        BinOp::Add => Ok(EVal::Int(lv.as_int(span)?.wrapping_add(rv.as_int(span)?))),
        BinOp::Sub => Ok(EVal::Int(lv.as_int(span)?.wrapping_sub(rv.as_int(span)?))),
        BinOp::Mul => Ok(EVal::Int(lv.as_int(span)?.wrapping_mul(rv.as_int(span)?))),
        BinOp::Div => {
            let (a, b) = (lv.as_int(span)?, rv.as_int(span)?);
            if b == 0 {
                return Err(DslError::arith("division by zero", span));
            }
            Ok(EVal::Int(a / b)) // Rust's `/` on signed ints already truncates toward zero.
        }
        BinOp::Mod => {
            let (a, b) = (lv.as_int(span)?, rv.as_int(span)?);
            if b == 0 {
                return Err(DslError::arith("modulo by zero", span));
            }
            Ok(EVal::Int(a % b))
        }
        BinOp::EqEq => structural_eq(&lv, &rv, span).map(EVal::Bool),
        BinOp::NotEq => structural_eq(&lv, &rv, span).map(|eq| EVal::Bool(!eq)),
        BinOp::Lt => Ok(EVal::Bool(lv.as_int(span)? < rv.as_int(span)?)),
        BinOp::Gt => Ok(EVal::Bool(lv.as_int(span)? > rv.as_int(span)?)),
        BinOp::And => Ok(EVal::Bool(lv.as_bool(span)? && rv.as_bool(span)?)),
        BinOp::Or => Ok(EVal::Bool(lv.as_bool(span)? || rv.as_bool(span)?)),
        BinOp::Concat => Ok(EVal::Music(lv.as_music(span)?.concat(rv.as_music(span)?))),
        BinOp::Union => Ok(EVal::Music(lv.as_music(span)?.union(rv.as_music(span)?))),
        BinOp::Transpose => {
            let m = lv.as_music(span)?;
            let k = rv.as_int(span)?;
            Ok(EVal::Music(m.transpose(k, span)?))
        }
    }
}

/// Dispatch table for the unary operators.
fn apply_unop(op: UnOp, v: EVal, span: Span) -> Result<EVal, DslError> {
    match op {
        UnOp::Not => Ok(EVal::Bool(!v.as_bool(span)?)),
        UnOp::Head => Ok(EVal::Music(v.as_music(span)?.head(span)?)),
        UnOp::Tail => Ok(EVal::Music(v.as_music(span)?.tail())),
        UnOp::IsEmpty => Ok(EVal::Bool(v.as_music(span)?.is_empty_sequence())),
        UnOp::Pitch => Ok(EVal::Int(v.as_music(span)?.pitch(span)?)),
        UnOp::Initialize => Ok(EVal::Music(v.as_music(span)?.initialize())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast;
    use crate::lexer::Lexer;
    use crate::parser::Parser;

    fn run(src: &str) -> (Interpreter, Environment) {
        let tokens = Lexer::new(src).tokenize().unwrap();
        let cst = Parser::new(tokens).parse_program().unwrap();
        let program = ast::build(cst).unwrap();
        let mut interp = Interpreter::new();
        let env = interp.run(&program, &Environment::empty()).unwrap();
        (interp, env)
    }

    fn run_err(src: &str) -> DslError {
        let tokens = Lexer::new(src).tokenize().unwrap();
        let cst = Parser::new(tokens).parse_program().unwrap();
        let program = ast::build(cst).unwrap();
        let mut interp = Interpreter::new();
        interp.run(&program, &Environment::empty()).unwrap_err()
    }

    #[test]
    fn test_s1_single_note() {
        let (interp, _) = run("print Cn4/1");
        assert_eq!(interp.last_printed_music().unwrap().to_json_string(), r#"{"events":[{"start":0,"notes":[{"midi":60,"dur":1}]}]}"#);
    }

    #[test]
    fn test_s2_concat_with_rest() {
        let (interp, _) = run("print Cn4/1 ++ R/0.5 ++ En4/0.5");
        let json = interp.last_printed_music().unwrap().to_json_string();
        assert_eq!(
            json,
            r#"{"events":[{"start":0,"notes":[{"midi":60,"dur":1}]},{"start":1,"notes":[{"midi":-1,"dur":0.5}]},{"start":1.5,"notes":[{"midi":64,"dur":0.5}]}]}"#
        );
    }

    #[test]
    fn test_s3_chord_via_union() {
        let (interp, _) = run("print Cn4/1 | En4/1 | Gn4/1");
        let result = interp.last_printed_music().unwrap();
        assert_eq!(result.events.len(), 1);
        assert_eq!(result.events[0].notes.len(), 3);
        let pitches: Vec<i32> = result.events[0].notes.iter().map(|n| n.midi_pitch).collect();
        assert_eq!(pitches, vec![60, 64, 67]);
    }

    #[test]
    fn test_s4_transposition() {
        let (interp, _) = run("print (Cn4/1 ++ Dn4/1) ! 12");
        let result = interp.last_printed_music().unwrap();
        assert_eq!(result.events.len(), 2);
        assert_eq!(result.events[0].notes.iter().next().unwrap().midi_pitch, 72);
        assert_eq!(result.events[1].notes.iter().next().unwrap().midi_pitch, 74);
    }

    #[test]
    fn test_s5_while_generated_major_scale() {
        // `major_step` only differs from the whole-tone default at the two
        // half-step degrees (the 3rd->4th and 7th->8th), so it's written as
        // a var-then-return procedure: the `if`/`else` chain only assigns
        // `r`, and `return` sits after it rather than inside a branch.
        // `note_at` is a pure transposition, so it's a plain expression-
        // bodied function.
        let src = "
            procedure major_step(steps) = {
                var r = 2;
                if steps == 2 then { r <- 1 } else {
                if steps == 6 then { r <- 1 } else {
                r <- 2 } };
                return r
            };
            function note_at(p) = Cn4/1 ! (p - 60);
            var s = Cn4/1; var p = 60; var steps = 0;
            while steps < 7 do {
                p <- p + major_step(steps);
                s <- s ++ note_at(p);
                steps <- steps + 1
            };
            print s
        ";
        let (interp, _) = run(src);
        let result = interp.last_printed_music().unwrap();
        let pitches: Vec<i32> = result.events.iter().map(|e| e.notes.iter().next().unwrap().midi_pitch).collect();
        assert_eq!(pitches, vec![60, 62, 64, 65, 67, 69, 71, 72]);
    }

    #[test]
    fn test_s6_let_scoping() {
        let (interp, env) = run("var x = 1; print (let x = 41 in x + 1) + x");
        assert_eq!(interp.diagnostics, vec!["43".to_string()]);
        match env.lookup("x") {
            Some(DVal::Location(loc)) => {
                assert_eq!(interp.store.access_value(loc, Span::DUMMY).unwrap().as_int(Span::DUMMY).unwrap(), 1);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_assign_to_let_bound_name_is_semantic_error() {
        let err = run_err("let x = 1 in (x <- 2; print x)");
        // `let`'s body is an expression, not a command; this is actually a
        // syntax error (a command where an expression is expected). The
        // grammar itself enforces that a let-bound name is not storable.
        assert_eq!(err.kind(), "SyntaxError");
    }

    #[test]
    fn test_assign_to_unbound_name_is_semantic_error() {
        let err = run_err("y <- 1");
        assert_eq!(err.kind(), "SemanticError");
    }

    #[test]
    fn test_division_by_zero_is_arith_error() {
        let err = run_err("print 1 / 0");
        assert_eq!(err.kind(), "ArithError");
    }

    #[test]
    fn test_modulo_by_zero_is_arith_error() {
        let err = run_err("print 1 % 0");
        assert_eq!(err.kind(), "ArithError");
    }

    #[test]
    fn test_division_truncates_toward_zero() {
        let (interp, _) = run("print -7 / 2");
        assert_eq!(interp.diagnostics, vec!["-3".to_string()]);
    }

    #[test]
    fn test_guard_not_boolean_is_type_error() {
        let err = run_err("if 1 then { print 1 } else { print 0 }");
        assert_eq!(err.kind(), "TypeError");
    }

    #[test]
    fn test_and_or_are_not_short_circuit_but_both_sides_still_typecheck() {
        let (interp, _) = run("print true or false; print false and true");
        assert_eq!(interp.diagnostics, vec!["true".to_string(), "false".to_string()]);
    }

    #[test]
    fn test_function_calling_another_function() {
        let src = "
            function always_one(n) = 1;
            function fact(n) = always_one(n) + (n * 0);
            print fact(3)
        ";
        // MusicDSL functions can't branch (bodies are plain expressions, no
        // conditional in `expr`), so true recursion needs a procedure; this
        // instead checks a function calling a function declared earlier.
        // `always_one` must come first: `FunApp`/`ProcApp` tagging is a
        // whole-program first pass (order-independent), but a closure's
        // `captured_env` is a lexical snapshot at declaration time, so the
        // callee still has to exist in scope when the caller is declared.
        let (interp, _) = run(src);
        assert_eq!(interp.diagnostics, vec!["1".to_string()]);
    }

    #[test]
    fn test_recursive_procedure() {
        let src = "
            procedure sum_to(n) = {
                if n == 0 then { var r = 0 } else { var r = n + sum_to(n - 1) };
                return r
            };
            print sum_to(5)
        ";
        let (interp, _) = run(src);
        assert_eq!(interp.diagnostics, vec!["15".to_string()]);
    }

    #[test]
    fn test_loop_scratch_var_does_not_leak_store() {
        let src = "
            var total = 0; var i = 0;
            while i < 1000 do {
                var scratch = i * 2;
                total <- total + scratch;
                i <- i + 1
            };
            print total
        ";
        let (interp, _) = run(src);
        assert_eq!(interp.diagnostics, vec!["999000".to_string()]);
        // two pre-loop locations (total, i) plus whatever each iteration's
        // `var scratch` needed before truncation collapses it back down.
        assert!(interp.store.next_loc() <= 3);
    }

    #[test]
    fn test_closure_built_in_loop_body_survives_truncation() {
        let src = "
            var i = 0; var last = 0;
            while i < 3 do {
                function bump(x) = x + i;
                last <- bump(10);
                i <- i + 1
            };
            print last
        ";
        let (interp, _) = run(src);
        assert_eq!(interp.diagnostics, vec!["12".to_string()]);
    }

    #[test]
    fn test_is_empty_and_not() {
        let (interp, _) = run("print is_empty(R/1); print not true");
        assert_eq!(interp.diagnostics, vec!["false".to_string(), "false".to_string()]);
    }
}
