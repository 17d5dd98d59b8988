use num_rational::Rational64;

use crate::error::LexError;
use crate::token::{Span, Spanned, Token};

pub struct Lexer {
    chars: Vec<char>,
    /// Precomputed byte offset for each char index.
    /// `byte_offsets[i]` = byte offset of `chars[i]` in the original `&str`.
    /// `byte_offsets[chars.len()]` = total byte length (sentinel for EOF).
    byte_offsets: Vec<usize>,
    pos: usize,
}

impl Lexer {
    pub fn new(input: &str) -> Self {
        // Tolerate and strip a UTF-8 BOM, per the source-file contract.
        let input = input.strip_prefix('\u{feff}').unwrap_or(input);
        let chars: Vec<char> = input.chars().collect();
        let mut byte_offsets = Vec::with_capacity(chars.len() + 1);
        let mut offset = 0;
        for ch in &chars {
            byte_offsets.push(offset);
            offset += ch.len_utf8();
        }
        byte_offsets.push(offset);
        Lexer { chars, byte_offsets, pos: 0 }
    }

    pub fn tokenize(&mut self) -> Result<Vec<Spanned>, LexError> {
        let mut tokens = Vec::new();
        loop {
            let spanned = self.next_token()?;
            let is_eof = spanned.token == Token::EOF;
            tokens.push(spanned);
            if is_eof {
                break;
            }
        }
        Ok(tokens)
    }

    fn peek_at(&self, offset: usize) -> Option<char> {
        self.chars.get(self.pos + offset).copied()
    }

    fn advance(&mut self) -> Option<char> {
        let ch = self.chars.get(self.pos).copied();
        if ch.is_some() {
            self.pos += 1;
        }
        ch
    }

    fn skip_whitespace(&mut self) {
        while self.pos < self.chars.len() && self.chars[self.pos].is_whitespace() {
            self.pos += 1;
        }
    }

    fn byte_pos_of(&self, char_idx: usize) -> usize {
        self.byte_offsets[char_idx.min(self.chars.len())]
    }

    fn spanned(&self, token: Token, start: usize) -> Spanned {
        Spanned {
            token,
            span: Span {
                start: self.byte_pos_of(start),
                end: self.byte_pos_of(self.pos),
            },
        }
    }

    fn next_token(&mut self) -> Result<Spanned, LexError> {
        self.skip_whitespace();

        if self.pos >= self.chars.len() {
            let p = self.byte_pos_of(self.pos);
            return Ok(Spanned { token: Token::EOF, span: Span { start: p, end: p } });
        }

        let start = self.pos;
        let ch = self.chars[self.pos];

        match ch {
            ';' => { self.advance(); Ok(self.spanned(Token::Semicolon, start)) }
            ',' => { self.advance(); Ok(self.spanned(Token::Comma, start)) }
            '(' => { self.advance(); Ok(self.spanned(Token::LParen, start)) }
            ')' => { self.advance(); Ok(self.spanned(Token::RParen, start)) }
            '{' => { self.advance(); Ok(self.spanned(Token::LBrace, start)) }
            '}' => { self.advance(); Ok(self.spanned(Token::RBrace, start)) }
            '*' => { self.advance(); Ok(self.spanned(Token::Star, start)) }
            '/' => { self.advance(); Ok(self.spanned(Token::Slash, start)) }
            '%' => { self.advance(); Ok(self.spanned(Token::Percent, start)) }
            '|' => { self.advance(); Ok(self.spanned(Token::Pipe, start)) }
            '=' if self.peek_at(1) == Some('=') => {
                self.pos += 2;
                Ok(self.spanned(Token::EqEq, start))
            }
            '=' => { self.advance(); Ok(self.spanned(Token::Eq, start)) }
            '!' if self.peek_at(1) == Some('=') => {
                self.pos += 2;
                Ok(self.spanned(Token::NotEq, start))
            }
            '!' => { self.advance(); Ok(self.spanned(Token::Bang, start)) }
            '+' if self.peek_at(1) == Some('+') => {
                self.pos += 2;
                Ok(self.spanned(Token::PlusPlus, start))
            }
            '+' => { self.advance(); Ok(self.spanned(Token::Plus, start)) }
            '<' if self.peek_at(1) == Some('-') => {
                self.pos += 2;
                Ok(self.spanned(Token::Arrow, start))
            }
            '<' => { self.advance(); Ok(self.spanned(Token::Lt, start)) }
            '>' => { self.advance(); Ok(self.spanned(Token::Gt, start)) }
            '-' => { self.advance(); Ok(self.spanned(Token::Minus, start)) }
            c if c.is_ascii_digit() => self.lex_number(start),
            c if c.is_ascii_lowercase() => self.lex_ident(start),
            c if c.is_ascii_uppercase() => self.lex_note_or_rest(start),
            _ => Err(LexError::UnexpectedChar { ch, pos: self.byte_pos_of(start) }),
        }
    }

    fn lex_number(&mut self, start: usize) -> Result<Spanned, LexError> {
        while self.pos < self.chars.len() {
            let ch = self.chars[self.pos];
            if ch.is_ascii_digit() {
                self.pos += 1;
            } else if ch == '.' && self.peek_at(1).map_or(false, |c| c.is_ascii_digit()) {
                self.pos += 1;
            } else {
                break;
            }
        }
        let text: String = self.chars[start..self.pos].iter().collect();
        let value = parse_decimal(&text).ok_or_else(|| LexError::InvalidNumber {
            text: text.clone(),
            pos: self.byte_pos_of(start),
        })?;
        Ok(self.spanned(Token::Number(value), start))
    }

    fn lex_ident(&mut self, start: usize) -> Result<Spanned, LexError> {
        while self.pos < self.chars.len() {
            let ch = self.chars[self.pos];
            if ch.is_ascii_alphanumeric() || ch == '_' {
                self.pos += 1;
            } else {
                break;
            }
        }
        let text: String = self.chars[start..self.pos].iter().collect();
        let token = match text.as_str() {
            "var" => Token::Var,
            "let" => Token::Let,
            "in" => Token::In,
            "print" => Token::Print,
            "if" => Token::If,
            "then" => Token::Then,
            "else" => Token::Else,
            "while" => Token::While,
            "do" => Token::Do,
            "function" => Token::Function,
            "procedure" => Token::Procedure,
            "return" => Token::Return,
            "and" => Token::And,
            "or" => Token::Or,
            "not" => Token::Not,
            "head" => Token::Head,
            "tail" => Token::Tail,
            "is_empty" => Token::IsEmpty,
            "pitch" => Token::Pitch,
            "initialize" => Token::Initialize,
            "true" => Token::Bool(true),
            "false" => Token::Bool(false),
            _ => Token::Ident(text),
        };
        Ok(self.spanned(token, start))
    }

    /// Lex an uppercase-leading run: either the bare rest literal `R`, or a
    /// note literal's raw pitch/accidental/octave text. Neither is validated
    /// here — the AST builder encodes pitch to MIDI and range-checks it.
    fn lex_note_or_rest(&mut self, start: usize) -> Result<Spanned, LexError> {
        while self.pos < self.chars.len() {
            let ch = self.chars[self.pos];
            if ch.is_ascii_alphanumeric() {
                self.pos += 1;
            } else {
                break;
            }
        }
        let text: String = self.chars[start..self.pos].iter().collect();
        if text == "R" {
            Ok(self.spanned(Token::Rest, start))
        } else {
            Ok(self.spanned(Token::NoteLit(text), start))
        }
    }
}

/// Parse a `[0-9]+(\.[0-9]+)?` literal into an exact rational, so that
/// decimal durations round-trip without binary floating-point error.
pub fn parse_decimal(text: &str) -> Option<Rational64> {
    match text.split_once('.') {
        None => text.parse::<i64>().ok().map(Rational64::from_integer),
        Some((int_part, frac_part)) => {
            let int_part = if int_part.is_empty() { 0 } else { int_part.parse::<i64>().ok()? };
            if frac_part.is_empty() {
                return None;
            }
            let frac_digits = frac_part.parse::<i64>().ok()?;
            let denom = 10i64.checked_pow(frac_part.len() as u32)?;
            let whole = int_part.checked_mul(denom)?.checked_add(frac_digits)?;
            Some(Rational64::new(whole, denom))
        }
    }
}
