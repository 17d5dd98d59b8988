use crate::cst::{BinOp, Command, Expr, Program, RawNote, UnOp};
use crate::error::ParseError;
use crate::token::{Span, Spanned, Token};

pub struct Parser {
    tokens: Vec<Spanned>,
    pos: usize,
}

impl Parser {
    pub fn new(tokens: Vec<Spanned>) -> Self {
        Parser { tokens, pos: 0 }
    }

    pub fn parse_program(&mut self) -> Result<Program, ParseError> {
        let commands = self.parse_command_seq()?;
        self.expect(&Token::EOF, "end of input")?;
        Ok(Program { commands })
    }

    // ── token-stream helpers ────────────────────────────────────

    fn peek(&self) -> &Token {
        &self.tokens[self.pos].token
    }

    fn peek_span(&self) -> Span {
        self.tokens[self.pos].span
    }

    fn advance(&mut self) -> Spanned {
        let spanned = self.tokens[self.pos].clone();
        if self.pos + 1 < self.tokens.len() {
            self.pos += 1;
        }
        spanned
    }

    fn check(&self, token: &Token) -> bool {
        self.peek() == token
    }

    fn eat(&mut self, token: &Token) -> bool {
        if self.check(token) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn expect(&mut self, token: &Token, expected: &str) -> Result<Span, ParseError> {
        if self.check(token) {
            Ok(self.advance().span)
        } else if self.check(&Token::EOF) {
            Err(ParseError::UnexpectedEOF { expected: expected.into() })
        } else {
            let found = self.peek().clone();
            let span = self.peek_span();
            Err(ParseError::UnexpectedToken { expected: expected.into(), found, span })
        }
    }

    fn expect_ident(&mut self) -> Result<(String, Span), ParseError> {
        match self.peek().clone() {
            Token::Ident(name) => {
                let span = self.advance().span;
                Ok((name, span))
            }
            Token::EOF => Err(ParseError::UnexpectedEOF { expected: "identifier".into() }),
            found => {
                let span = self.peek_span();
                Err(ParseError::UnexpectedToken { expected: "identifier".into(), found, span })
            }
        }
    }

    fn unexpected(&self, expected: &str) -> ParseError {
        if self.check(&Token::EOF) {
            ParseError::UnexpectedEOF { expected: expected.into() }
        } else {
            ParseError::UnexpectedToken {
                expected: expected.into(),
                found: self.peek().clone(),
                span: self.peek_span(),
            }
        }
    }

    // ── command_seq / command ───────────────────────────────────

    fn parse_command_seq(&mut self) -> Result<Vec<Command>, ParseError> {
        let mut commands = vec![self.parse_command()?];
        while self.eat(&Token::Semicolon) {
            commands.push(self.parse_command()?);
        }
        Ok(commands)
    }

    fn parse_command(&mut self) -> Result<Command, ParseError> {
        match self.peek().clone() {
            Token::Var => self.parse_vardecl(),
            Token::Ident(_) => self.parse_assign(),
            Token::Print => self.parse_print(),
            Token::While => self.parse_while(),
            Token::If => self.parse_if(),
            Token::Function => self.parse_fundecl(),
            Token::Procedure => self.parse_procdecl(),
            _ => Err(self.unexpected("a command (var, assignment, print, if, while, function, or procedure)")),
        }
    }

    fn parse_vardecl(&mut self) -> Result<Command, ParseError> {
        let start = self.expect(&Token::Var, "'var'")?;
        let (name, _) = self.expect_ident()?;
        self.expect(&Token::Eq, "'='")?;
        let value = self.parse_expr()?;
        let span = start.join(self.prev_span());
        Ok(Command::VarDecl { name, value, span })
    }

    fn parse_assign(&mut self) -> Result<Command, ParseError> {
        let (name, name_span) = self.expect_ident()?;
        self.expect(&Token::Arrow, "'<-'")?;
        let value = self.parse_expr()?;
        let span = name_span.join(self.prev_span());
        Ok(Command::Assign { name, value, span })
    }

    fn parse_print(&mut self) -> Result<Command, ParseError> {
        let start = self.expect(&Token::Print, "'print'")?;
        let value = self.parse_expr()?;
        let span = start.join(self.prev_span());
        Ok(Command::Print { value, span })
    }

    fn parse_while(&mut self) -> Result<Command, ParseError> {
        let start = self.expect(&Token::While, "'while'")?;
        let cond = self.parse_expr()?;
        self.expect(&Token::Do, "'do'")?;
        self.expect(&Token::LBrace, "'{'")?;
        let body = self.parse_command_seq()?;
        let end = self.expect(&Token::RBrace, "'}'")?;
        Ok(Command::While { cond, body, span: start.join(end) })
    }

    fn parse_if(&mut self) -> Result<Command, ParseError> {
        let start = self.expect(&Token::If, "'if'")?;
        let cond = self.parse_expr()?;
        self.expect(&Token::Then, "'then'")?;
        self.expect(&Token::LBrace, "'{'")?;
        let then_seq = self.parse_command_seq()?;
        self.expect(&Token::RBrace, "'}'")?;
        self.expect(&Token::Else, "'else'")?;
        self.expect(&Token::LBrace, "'{'")?;
        let else_seq = self.parse_command_seq()?;
        let end = self.expect(&Token::RBrace, "'}'")?;
        Ok(Command::If { cond, then_seq, else_seq, span: start.join(end) })
    }

    fn parse_fundecl(&mut self) -> Result<Command, ParseError> {
        let start = self.expect(&Token::Function, "'function'")?;
        let (name, _) = self.expect_ident()?;
        self.expect(&Token::LParen, "'('")?;
        let params = self.parse_params()?;
        self.expect(&Token::RParen, "')'")?;
        self.expect(&Token::Eq, "'='")?;
        let body = self.parse_expr()?;
        let span = start.join(self.prev_span());
        Ok(Command::FunDecl { name, params, body, span })
    }

    fn parse_procdecl(&mut self) -> Result<Command, ParseError> {
        let start = self.expect(&Token::Procedure, "'procedure'")?;
        let (name, _) = self.expect_ident()?;
        self.expect(&Token::LParen, "'('")?;
        let params = self.parse_params()?;
        self.expect(&Token::RParen, "')'")?;
        self.expect(&Token::Eq, "'='")?;
        self.expect(&Token::LBrace, "'{'")?;
        let body = self.parse_proc_body()?;
        self.expect(&Token::Return, "'return'")?;
        let return_expr = self.parse_expr()?;
        let end = self.expect(&Token::RBrace, "'}'")?;
        Ok(Command::ProcDecl { name, params, body, return_expr, span: start.join(end) })
    }

    /// The command sequence leading up to a procedure's terminal `return` —
    /// unlike `parse_command_seq`, this may be empty (`{ return e }`) and
    /// tolerates a trailing `;` right before `return`, since `return` itself
    /// is not a command and can't otherwise terminate a `;`-separated list.
    fn parse_proc_body(&mut self) -> Result<Vec<Command>, ParseError> {
        let mut commands = Vec::new();
        if self.check(&Token::Return) {
            return Ok(commands);
        }
        commands.push(self.parse_command()?);
        while self.eat(&Token::Semicolon) {
            if self.check(&Token::Return) {
                break;
            }
            commands.push(self.parse_command()?);
        }
        Ok(commands)
    }

    fn parse_params(&mut self) -> Result<Vec<String>, ParseError> {
        let mut params = Vec::new();
        if self.check(&Token::RParen) {
            return Ok(params);
        }
        let (first, _) = self.expect_ident()?;
        params.push(first);
        while self.eat(&Token::Comma) {
            let (name, _) = self.expect_ident()?;
            params.push(name);
        }
        Ok(params)
    }

    fn prev_span(&self) -> Span {
        let idx = self.pos.saturating_sub(1);
        self.tokens[idx].span
    }

    // ── expr, with precedence climbing over the flat grammar ───

    pub fn parse_expr(&mut self) -> Result<Expr, ParseError> {
        if self.check(&Token::Let) {
            self.parse_let()
        } else {
            self.parse_binary(0)
        }
    }

    fn parse_let(&mut self) -> Result<Expr, ParseError> {
        let start = self.expect(&Token::Let, "'let'")?;
        let (name, _) = self.expect_ident()?;
        self.expect(&Token::Eq, "'='")?;
        let bound = self.parse_expr()?;
        self.expect(&Token::In, "'in'")?;
        let body = self.parse_expr()?;
        let span = start.join(self.prev_span());
        Ok(Expr::Let { name, bound: Box::new(bound), body: Box::new(body), span })
    }

    /// Maps the token at the cursor to its binary operator and precedence
    /// tier (0 = loosest: `and or` < `== < > !=` <
    /// `! ++ \|` < `+ -` < `* / %`).
    fn peek_bin_op(&self) -> Option<(BinOp, u8)> {
        match self.peek() {
            Token::And => Some((BinOp::And, 0)),
            Token::Or => Some((BinOp::Or, 0)),
            Token::EqEq => Some((BinOp::EqEq, 1)),
            Token::NotEq => Some((BinOp::NotEq, 1)),
            Token::Lt => Some((BinOp::Lt, 1)),
            Token::Gt => Some((BinOp::Gt, 1)),
            Token::Bang => Some((BinOp::Transpose, 2)),
            Token::PlusPlus => Some((BinOp::Concat, 2)),
            Token::Pipe => Some((BinOp::Union, 2)),
            Token::Plus => Some((BinOp::Add, 3)),
            Token::Minus => Some((BinOp::Sub, 3)),
            Token::Star => Some((BinOp::Mul, 4)),
            Token::Slash => Some((BinOp::Div, 4)),
            Token::Percent => Some((BinOp::Mod, 4)),
            _ => None,
        }
    }

    fn parse_binary(&mut self, min_tier: u8) -> Result<Expr, ParseError> {
        let lhs_start = self.peek_span();
        let mut lhs = self.parse_mono()?;
        loop {
            let Some((op, tier)) = self.peek_bin_op() else { break };
            if tier < min_tier {
                break;
            }
            self.advance();
            let rhs = self.parse_binary(tier + 1)?;
            let span = lhs_start.join(self.prev_span());
            lhs = Expr::Bin { op, lhs: Box::new(lhs), rhs: Box::new(rhs), span };
        }
        Ok(lhs)
    }

    /// `mono := ground | "(" expr ")" | IDENT | UNOP mono`, with `IDENT "(" args? ")"`
    /// (a `funapp`/`procapp`, undifferentiated) folded in here too — both productions
    /// start with `IDENT` and are only distinguished by one token of lookahead.
    fn parse_mono(&mut self) -> Result<Expr, ParseError> {
        match self.peek().clone() {
            Token::Number(n) => {
                self.advance();
                Ok(Expr::Number(n))
            }
            Token::Bool(b) => {
                self.advance();
                Ok(Expr::Bool(b))
            }
            Token::NoteLit(_) => self.parse_note(),
            Token::Rest => self.parse_rest(),
            Token::LParen => {
                self.advance();
                let inner = self.parse_expr()?;
                self.expect(&Token::RParen, "')'")?;
                Ok(inner)
            }
            Token::Ident(name) => {
                let span = self.advance().span;
                if self.check(&Token::LParen) {
                    self.advance();
                    let args = self.parse_args()?;
                    let end = self.expect(&Token::RParen, "')'")?;
                    Ok(Expr::Call { name, args, span: span.join(end) })
                } else {
                    Ok(Expr::Var(name))
                }
            }
            Token::Not => self.parse_unary(UnOp::Not),
            Token::Head => self.parse_unary(UnOp::Head),
            Token::Tail => self.parse_unary(UnOp::Tail),
            Token::IsEmpty => self.parse_unary(UnOp::IsEmpty),
            Token::Pitch => self.parse_unary(UnOp::Pitch),
            Token::Initialize => self.parse_unary(UnOp::Initialize),
            _ => Err(self.unexpected("an expression")),
        }
    }

    fn parse_unary(&mut self, op: UnOp) -> Result<Expr, ParseError> {
        let start = self.advance().span;
        let arg = self.parse_mono()?;
        let span = start.join(self.prev_span());
        Ok(Expr::Unary { op, arg: Box::new(arg), span })
    }

    fn parse_args(&mut self) -> Result<Vec<Expr>, ParseError> {
        let mut args = Vec::new();
        if self.check(&Token::RParen) {
            return Ok(args);
        }
        args.push(self.parse_expr()?);
        while self.eat(&Token::Comma) {
            args.push(self.parse_expr()?);
        }
        Ok(args)
    }

    /// A `NoteLit` token holds raw `PITCH ACCIDENTAL OCTAVE` text (e.g. `"Cbb4"`);
    /// this splits it into its three grammar pieces without validating pitch
    /// class or accidental spelling — that's `ast::build`'s job.
    fn parse_note(&mut self) -> Result<Expr, ParseError> {
        let start_span = self.peek_span();
        let text = match self.peek().clone() {
            Token::NoteLit(s) => s,
            _ => unreachable!(),
        };
        self.advance();
        let chars: Vec<char> = text.chars().collect();
        if chars.len() < 2 {
            return Err(ParseError::UnexpectedToken {
                expected: "note literal (PITCH ACCIDENTAL OCTAVE)".into(),
                found: Token::NoteLit(text),
                span: start_span,
            });
        }
        let pitch = chars[0];
        let octave_char = chars[chars.len() - 1];
        let accidental: String = chars[1..chars.len() - 1].iter().collect();
        if !octave_char.is_ascii_digit() {
            return Err(ParseError::UnexpectedToken {
                expected: "note literal ending in an octave digit".into(),
                found: Token::NoteLit(text),
                span: start_span,
            });
        }
        let octave = octave_char.to_digit(10).unwrap() as u8;
        let dur = self.parse_optional_dur()?;
        let end_span = self.prev_span();
        Ok(Expr::Note { note: RawNote { pitch, accidental, octave, dur }, span: start_span.join(end_span) })
    }

    fn parse_rest(&mut self) -> Result<Expr, ParseError> {
        self.expect(&Token::Rest, "'R'")?;
        let dur = self.parse_optional_dur()?;
        Ok(Expr::Rest { dur })
    }

    fn parse_optional_dur(&mut self) -> Result<Option<num_rational::Rational64>, ParseError> {
        if self.eat(&Token::Slash) {
            match self.peek().clone() {
                Token::Number(n) => {
                    self.advance();
                    Ok(Some(n))
                }
                found => Err(ParseError::UnexpectedToken {
                    expected: "a duration number after '/'".into(),
                    found,
                    span: self.peek_span(),
                }),
            }
        } else {
            Ok(None)
        }
    }
}
