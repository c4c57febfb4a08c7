#![forbid(unsafe_code)]

//! The arithmetic/string mini-language behind the `eval` function.
//!
//! A deliberately small, JavaScript-flavored expression grammar: numbers,
//! strings, booleans, variables, `+ - * / %`, comparisons, `&& || !`, and
//! parentheses. `+` concatenates when either operand is a string.
//! Failure messages mimic the JS engine the original rode on
//! (`ReferenceError: Can't find variable: X`, `SyntaxError: …`) and are
//! passed through verbatim as [`ComputeError::Eval`].
//!
//! Grammar (precedence low → high):
//!
//! ```text
//! or    := and ( "||" and )*
//! and   := cmp ( "&&" cmp )*
//! cmp   := add ( ("==" | "!=" | "<" | "<=" | ">" | ">=") add )?
//! add   := mul ( ("+" | "-") mul )*
//! mul   := unary ( ("*" | "/" | "%") unary )*
//! unary := ("-" | "!") unary | primary
//! primary := number | string | "true" | "false" | "null" | ident | "(" or ")"
//! ```

use std::collections::BTreeMap;

use serde_json::Value;

use crate::error::ComputeError;

// ---------------------------------------------------------------------------
// Tokens
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Num(f64),
    Str(String),
    Ident(String),
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    LParen,
    RParen,
    Lt,
    Le,
    Gt,
    Ge,
    EqEq,
    NotEq,
    AndAnd,
    OrOr,
    Bang,
}

impl std::fmt::Display for Token {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Token::Num(n) => write!(f, "{n}"),
            Token::Str(s) => write!(f, "'{s}'"),
            Token::Ident(s) => write!(f, "{s}"),
            Token::Plus => write!(f, "+"),
            Token::Minus => write!(f, "-"),
            Token::Star => write!(f, "*"),
            Token::Slash => write!(f, "/"),
            Token::Percent => write!(f, "%"),
            Token::LParen => write!(f, "("),
            Token::RParen => write!(f, ")"),
            Token::Lt => write!(f, "<"),
            Token::Le => write!(f, "<="),
            Token::Gt => write!(f, ">"),
            Token::Ge => write!(f, ">="),
            Token::EqEq => write!(f, "=="),
            Token::NotEq => write!(f, "!="),
            Token::AndAnd => write!(f, "&&"),
            Token::OrOr => write!(f, "||"),
            Token::Bang => write!(f, "!"),
        }
    }
}

fn syntax_error(message: impl Into<String>) -> ComputeError {
    ComputeError::Eval(format!("SyntaxError: {}", message.into()))
}

fn lex(source: &str) -> Result<Vec<Token>, ComputeError> {
    let mut tokens = Vec::new();
    let mut chars = source.chars().peekable();
    while let Some(&c) = chars.peek() {
        match c {
            ' ' | '\t' | '\n' | '\r' => {
                chars.next();
            }
            '0'..='9' | '.' => {
                let mut literal = String::new();
                while let Some(&d) = chars.peek() {
                    if d.is_ascii_digit() || d == '.' {
                        literal.push(d);
                        chars.next();
                    } else {
                        break;
                    }
                }
                let n = literal
                    .parse::<f64>()
                    .map_err(|_| syntax_error(format!("Invalid number '{literal}'")))?;
                tokens.push(Token::Num(n));
            }
            '\'' | '"' => {
                let quote = c;
                chars.next();
                let mut literal = String::new();
                loop {
                    match chars.next() {
                        None => return Err(syntax_error("Unterminated string literal")),
                        Some(d) if d == quote => break,
                        Some('\\') => match chars.next() {
                            Some('n') => literal.push('\n'),
                            Some('t') => literal.push('\t'),
                            Some(other) => literal.push(other),
                            None => return Err(syntax_error("Unterminated string literal")),
                        },
                        Some(d) => literal.push(d),
                    }
                }
                tokens.push(Token::Str(literal));
            }
            c if c.is_alphabetic() || c == '_' || c == '$' => {
                let mut ident = String::new();
                while let Some(&d) = chars.peek() {
                    if d.is_alphanumeric() || d == '_' || d == '$' {
                        ident.push(d);
                        chars.next();
                    } else {
                        break;
                    }
                }
                tokens.push(Token::Ident(ident));
            }
            '+' => {
                chars.next();
                tokens.push(Token::Plus);
            }
            '-' => {
                chars.next();
                tokens.push(Token::Minus);
            }
            '*' => {
                chars.next();
                tokens.push(Token::Star);
            }
            '/' => {
                chars.next();
                tokens.push(Token::Slash);
            }
            '%' => {
                chars.next();
                tokens.push(Token::Percent);
            }
            '(' => {
                chars.next();
                tokens.push(Token::LParen);
            }
            ')' => {
                chars.next();
                tokens.push(Token::RParen);
            }
            '<' => {
                chars.next();
                if chars.peek() == Some(&'=') {
                    chars.next();
                    tokens.push(Token::Le);
                } else {
                    tokens.push(Token::Lt);
                }
            }
            '>' => {
                chars.next();
                if chars.peek() == Some(&'=') {
                    chars.next();
                    tokens.push(Token::Ge);
                } else {
                    tokens.push(Token::Gt);
                }
            }
            '=' => {
                chars.next();
                if chars.peek() == Some(&'=') {
                    chars.next();
                    // Tolerate === as ==.
                    if chars.peek() == Some(&'=') {
                        chars.next();
                    }
                    tokens.push(Token::EqEq);
                } else {
                    return Err(syntax_error("Unexpected token '='"));
                }
            }
            '!' => {
                chars.next();
                if chars.peek() == Some(&'=') {
                    chars.next();
                    if chars.peek() == Some(&'=') {
                        chars.next();
                    }
                    tokens.push(Token::NotEq);
                } else {
                    tokens.push(Token::Bang);
                }
            }
            '&' => {
                chars.next();
                if chars.peek() == Some(&'&') {
                    chars.next();
                    tokens.push(Token::AndAnd);
                } else {
                    return Err(syntax_error("Unexpected token '&'"));
                }
            }
            '|' => {
                chars.next();
                if chars.peek() == Some(&'|') {
                    chars.next();
                    tokens.push(Token::OrOr);
                } else {
                    return Err(syntax_error("Unexpected token '|'"));
                }
            }
            other => return Err(syntax_error(format!("Unexpected token '{other}'"))),
        }
    }
    Ok(tokens)
}

// ---------------------------------------------------------------------------
// Values
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
enum Val {
    Num(f64),
    Str(String),
    Bool(bool),
    Null,
}

impl Val {
    fn truthy(&self) -> bool {
        match self {
            Val::Bool(b) => *b,
            Val::Num(n) => *n != 0.0,
            Val::Str(s) => !s.is_empty(),
            Val::Null => false,
        }
    }

    fn display(&self) -> String {
        match self {
            Val::Num(n) => num_to_string(*n),
            Val::Str(s) => s.clone(),
            Val::Bool(b) => b.to_string(),
            Val::Null => "null".to_string(),
        }
    }

    fn numeric(&self) -> Result<f64, ComputeError> {
        match self {
            Val::Num(n) => Ok(*n),
            Val::Str(s) => s.parse().map_err(|_| {
                ComputeError::Eval(format!("TypeError: '{s}' is not a number"))
            }),
            Val::Bool(b) => Ok(f64::from(*b)),
            Val::Null => Ok(0.0),
        }
    }

    fn loose_eq(&self, other: &Val) -> bool {
        match (self, other) {
            (Val::Num(_), Val::Str(_)) | (Val::Str(_), Val::Num(_)) => {
                match (self.numeric(), other.numeric()) {
                    (Ok(a), Ok(b)) => a == b,
                    _ => false,
                }
            }
            _ => self == other,
        }
    }
}

fn num_to_string(n: f64) -> String {
    if n.fract() == 0.0 && n.abs() < 1e15 {
        format!("{}", n as i64)
    } else {
        format!("{n}")
    }
}

fn from_json(name: &str, value: &Value) -> Result<Val, ComputeError> {
    match value {
        Value::Number(n) => n.as_f64().map(Val::Num).ok_or_else(|| {
            ComputeError::Eval(format!("TypeError: {name} is not a finite number"))
        }),
        Value::String(s) => Ok(Val::Str(s.clone())),
        Value::Bool(b) => Ok(Val::Bool(*b)),
        Value::Null => Ok(Val::Null),
        _ => Err(ComputeError::Eval(format!(
            "TypeError: {name} is not a scalar"
        ))),
    }
}

fn to_json(value: Val) -> Value {
    match value {
        Val::Num(n) => {
            if n.fract() == 0.0 && n.is_finite() && n.abs() < i64::MAX as f64 {
                Value::from(n as i64)
            } else {
                Value::from(n)
            }
        }
        Val::Str(s) => Value::String(s),
        Val::Bool(b) => Value::Bool(b),
        Val::Null => Value::Null,
    }
}

// ---------------------------------------------------------------------------
// Parser / evaluator
// ---------------------------------------------------------------------------

struct Parser<'a> {
    tokens: Vec<Token>,
    pos: usize,
    variables: &'a BTreeMap<String, Value>,
}

impl Parser<'_> {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    fn eat(&mut self, token: &Token) -> bool {
        if self.peek() == Some(token) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn or(&mut self) -> Result<Val, ComputeError> {
        let mut lhs = self.and()?;
        while self.eat(&Token::OrOr) {
            let rhs = self.and()?;
            lhs = Val::Bool(lhs.truthy() || rhs.truthy());
        }
        Ok(lhs)
    }

    fn and(&mut self) -> Result<Val, ComputeError> {
        let mut lhs = self.cmp()?;
        while self.eat(&Token::AndAnd) {
            let rhs = self.cmp()?;
            lhs = Val::Bool(lhs.truthy() && rhs.truthy());
        }
        Ok(lhs)
    }

    fn cmp(&mut self) -> Result<Val, ComputeError> {
        let lhs = self.add()?;
        let operator = match self.peek() {
            Some(
                t @ (Token::EqEq | Token::NotEq | Token::Lt | Token::Le | Token::Gt | Token::Ge),
            ) => t.clone(),
            _ => return Ok(lhs),
        };
        self.pos += 1;
        let rhs = self.add()?;
        let out = match operator {
            Token::EqEq => lhs.loose_eq(&rhs),
            Token::NotEq => !lhs.loose_eq(&rhs),
            Token::Lt => lhs.numeric()? < rhs.numeric()?,
            Token::Le => lhs.numeric()? <= rhs.numeric()?,
            Token::Gt => lhs.numeric()? > rhs.numeric()?,
            Token::Ge => lhs.numeric()? >= rhs.numeric()?,
            _ => false,
        };
        Ok(Val::Bool(out))
    }

    fn add(&mut self) -> Result<Val, ComputeError> {
        let mut lhs = self.mul()?;
        loop {
            if self.eat(&Token::Plus) {
                let rhs = self.mul()?;
                // JS-style: string on either side makes + concatenation.
                lhs = match (&lhs, &rhs) {
                    (Val::Str(_), _) | (_, Val::Str(_)) => {
                        Val::Str(format!("{}{}", lhs.display(), rhs.display()))
                    }
                    _ => Val::Num(lhs.numeric()? + rhs.numeric()?),
                };
            } else if self.eat(&Token::Minus) {
                let rhs = self.mul()?;
                lhs = Val::Num(lhs.numeric()? - rhs.numeric()?);
            } else {
                return Ok(lhs);
            }
        }
    }

    fn mul(&mut self) -> Result<Val, ComputeError> {
        let mut lhs = self.unary()?;
        loop {
            if self.eat(&Token::Star) {
                lhs = Val::Num(lhs.numeric()? * self.unary()?.numeric()?);
            } else if self.eat(&Token::Slash) {
                lhs = Val::Num(lhs.numeric()? / self.unary()?.numeric()?);
            } else if self.eat(&Token::Percent) {
                lhs = Val::Num(lhs.numeric()? % self.unary()?.numeric()?);
            } else {
                return Ok(lhs);
            }
        }
    }

    fn unary(&mut self) -> Result<Val, ComputeError> {
        if self.eat(&Token::Minus) {
            return Ok(Val::Num(-self.unary()?.numeric()?));
        }
        if self.eat(&Token::Bang) {
            return Ok(Val::Bool(!self.unary()?.truthy()));
        }
        self.primary()
    }

    fn primary(&mut self) -> Result<Val, ComputeError> {
        match self.next() {
            None => Err(syntax_error("Unexpected end of script")),
            Some(Token::Num(n)) => Ok(Val::Num(n)),
            Some(Token::Str(s)) => Ok(Val::Str(s)),
            Some(Token::Ident(name)) => match name.as_str() {
                "true" => Ok(Val::Bool(true)),
                "false" => Ok(Val::Bool(false)),
                "null" | "undefined" => Ok(Val::Null),
                _ => match self.variables.get(&name) {
                    Some(value) => from_json(&name, value),
                    None => Err(ComputeError::Eval(format!(
                        "ReferenceError: Can't find variable: {name}"
                    ))),
                },
            },
            Some(Token::LParen) => {
                let inner = self.or()?;
                if self.eat(&Token::RParen) {
                    Ok(inner)
                } else {
                    Err(syntax_error("Expected ')'"))
                }
            }
            Some(other) => Err(syntax_error(format!("Unexpected token '{other}'"))),
        }
    }
}

/// Evaluate `source` against flat `variables`.
///
/// # Errors
///
/// [`ComputeError::Eval`] carrying the evaluator's message verbatim.
pub(crate) fn evaluate(
    source: &str,
    variables: &BTreeMap<String, Value>,
) -> Result<Value, ComputeError> {
    let tokens = lex(source)?;
    if tokens.is_empty() {
        return Err(syntax_error("Unexpected end of script"));
    }
    let mut parser = Parser {
        tokens,
        pos: 0,
        variables,
    };
    let out = parser.or()?;
    if let Some(extra) = parser.peek() {
        return Err(syntax_error(format!("Unexpected token '{extra}'")));
    }
    Ok(to_json(out))
}
