//! `$filter` grammar
//!
//! ```text
//! or      := and ("or" and)*
//! and     := unary ("and" unary)*
//! unary   := "not" unary | primary
//! primary := "(" or ")"
//!          | function "(" args ")" [cmp boolean]
//!          | operand cmp operand
//! ```
//!
//! Member paths use `/` on the wire and `.` in the tree.

use serde_json::{Number, Value};

use crate::errors::{ODataError, ODataResult};

use super::filter::{FilterExpr, FilterOperator, StringFunction};

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Ident(String),
    Str(String),
    Number(Number),
    LParen,
    RParen,
    Comma,
}

/// Parse a `$filter` expression
pub fn parse_filter(input: &str) -> ODataResult<FilterExpr> {
    let tokens = tokenize(input)?;
    if tokens.is_empty() {
        return Ok(FilterExpr::All);
    }

    let mut parser = Parser { tokens, pos: 0 };
    let expr = parser.parse_or()?;
    if let Some(token) = parser.peek() {
        return Err(invalid(format!("unexpected token {:?}", token)));
    }
    Ok(expr)
}

fn invalid(msg: impl Into<String>) -> ODataError {
    ODataError::InvalidQuery(format!("$filter: {}", msg.into()))
}

fn tokenize(input: &str) -> ODataResult<Vec<Token>> {
    let chars: Vec<char> = input.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        match c {
            c if c.is_whitespace() => i += 1,
            '(' => {
                tokens.push(Token::LParen);
                i += 1;
            }
            ')' => {
                tokens.push(Token::RParen);
                i += 1;
            }
            ',' => {
                tokens.push(Token::Comma);
                i += 1;
            }
            '\'' => {
                let (s, next) = read_string(&chars, i)?;
                tokens.push(Token::Str(s));
                i = next;
            }
            c if c.is_ascii_digit() || (c == '-' && next_is_digit(&chars, i)) => {
                let start = i;
                i += 1;
                while i < chars.len()
                    && (chars[i].is_ascii_digit()
                        || chars[i] == '.'
                        || ((chars[i] == 'e' || chars[i] == 'E')
                            && next_is_digit_or_sign(&chars, i)))
                {
                    if (chars[i] == 'e' || chars[i] == 'E') && matches!(chars.get(i + 1), Some('+' | '-')) {
                        i += 1;
                    }
                    i += 1;
                }
                let text: String = chars[start..i].iter().collect();
                // v2 type suffixes: 10L, 1.5M, 2.0d
                if i < chars.len() && matches!(chars[i], 'L' | 'l' | 'M' | 'm' | 'D' | 'd' | 'F' | 'f') {
                    i += 1;
                }
                tokens.push(Token::Number(parse_number(&text)?));
            }
            c if c.is_alphabetic() || c == '_' || c == '$' || c == '@' => {
                let start = i;
                while i < chars.len()
                    && (chars[i].is_alphanumeric() || matches!(chars[i], '_' | '/' | '.' | '$' | '@'))
                {
                    i += 1;
                }
                // Typed literal such as datetime'2020-01-01' or guid'...'
                if i < chars.len() && chars[i] == '\'' {
                    let (s, next) = read_string(&chars, i)?;
                    tokens.push(Token::Str(s));
                    i = next;
                } else {
                    tokens.push(Token::Ident(chars[start..i].iter().collect()));
                }
            }
            other => return Err(invalid(format!("unexpected character '{}'", other))),
        }
    }

    Ok(tokens)
}

fn next_is_digit(chars: &[char], i: usize) -> bool {
    chars.get(i + 1).map(|c| c.is_ascii_digit()).unwrap_or(false)
}

fn next_is_digit_or_sign(chars: &[char], i: usize) -> bool {
    chars
        .get(i + 1)
        .map(|c| c.is_ascii_digit() || *c == '+' || *c == '-')
        .unwrap_or(false)
}

/// Read a single-quoted string starting at `start`; `''` is an escaped quote
fn read_string(chars: &[char], start: usize) -> ODataResult<(String, usize)> {
    let mut out = String::new();
    let mut i = start + 1;
    loop {
        match chars.get(i) {
            None => return Err(invalid("unterminated string literal")),
            Some('\'') if chars.get(i + 1) == Some(&'\'') => {
                out.push('\'');
                i += 2;
            }
            Some('\'') => return Ok((out, i + 1)),
            Some(c) => {
                out.push(*c);
                i += 1;
            }
        }
    }
}

fn parse_number(text: &str) -> ODataResult<Number> {
    if let Ok(n) = text.parse::<i64>() {
        return Ok(n.into());
    }
    text.parse::<f64>()
        .ok()
        .and_then(Number::from_f64)
        .ok_or_else(|| invalid(format!("invalid number '{}'", text)))
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
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

    fn peek_keyword(&self, keyword: &str) -> bool {
        matches!(self.peek(), Some(Token::Ident(s)) if s == keyword)
    }

    fn expect(&mut self, expected: Token) -> ODataResult<()> {
        match self.next() {
            Some(token) if token == expected => Ok(()),
            Some(token) => Err(invalid(format!("expected {:?}, found {:?}", expected, token))),
            None => Err(invalid(format!("expected {:?}, found end of input", expected))),
        }
    }

    fn parse_or(&mut self) -> ODataResult<FilterExpr> {
        let mut left = self.parse_and()?;
        while self.peek_keyword("or") {
            self.pos += 1;
            let right = self.parse_and()?;
            left = left.or(right);
        }
        Ok(left)
    }

    fn parse_and(&mut self) -> ODataResult<FilterExpr> {
        let mut left = self.parse_unary()?;
        while self.peek_keyword("and") {
            self.pos += 1;
            let right = self.parse_unary()?;
            left = left.and(right);
        }
        Ok(left)
    }

    fn parse_unary(&mut self) -> ODataResult<FilterExpr> {
        if self.peek_keyword("not") {
            self.pos += 1;
            return Ok(self.parse_unary()?.negate());
        }
        self.parse_primary()
    }

    fn parse_primary(&mut self) -> ODataResult<FilterExpr> {
        if self.peek() == Some(&Token::LParen) {
            self.pos += 1;
            let expr = self.parse_or()?;
            self.expect(Token::RParen)?;
            return Ok(expr);
        }

        if let Some(Token::Ident(name)) = self.peek().cloned() {
            if self.tokens.get(self.pos + 1) == Some(&Token::LParen) {
                self.pos += 2;
                return self.parse_function(&name);
            }
        }

        self.parse_comparison()
    }

    fn parse_function(&mut self, name: &str) -> ODataResult<FilterExpr> {
        let first = self.parse_operand()?;
        self.expect(Token::Comma)?;
        let second = self.parse_operand()?;
        self.expect(Token::RParen)?;

        let (function, field, argument) = match name.to_ascii_lowercase().as_str() {
            "contains" => (StringFunction::Contains, first, second),
            "startswith" => (StringFunction::StartsWith, first, second),
            "endswith" => (StringFunction::EndsWith, first, second),
            "substringof" => (StringFunction::Contains, second, first),
            other => return Err(invalid(format!("unsupported function '{}'", other))),
        };

        let field = match field {
            Operand::Member(path) => path,
            Operand::Literal(v) => {
                return Err(invalid(format!("{} expects a property, found {}", name, v)))
            }
        };
        let argument = match argument {
            Operand::Literal(Value::String(s)) => s,
            other => {
                return Err(invalid(format!(
                    "{} expects a string literal, found {:?}",
                    name, other
                )))
            }
        };

        let mut expected = true;
        if let Some(Token::Ident(keyword)) = self.peek().cloned() {
            if let Some(op @ (FilterOperator::Eq | FilterOperator::Ne)) =
                FilterOperator::from_keyword(&keyword)
            {
                self.pos += 1;
                let flag = match self.parse_operand()? {
                    Operand::Literal(Value::Bool(b)) => b,
                    other => {
                        return Err(invalid(format!("expected boolean, found {:?}", other)))
                    }
                };
                expected = if op == FilterOperator::Eq { flag } else { !flag };
            }
        }

        Ok(FilterExpr::Function {
            function,
            field,
            argument,
            expected,
        })
    }

    fn parse_comparison(&mut self) -> ODataResult<FilterExpr> {
        let left = self.parse_operand()?;
        let operator = match self.next() {
            Some(Token::Ident(keyword)) => FilterOperator::from_keyword(&keyword)
                .ok_or_else(|| invalid(format!("unknown operator '{}'", keyword)))?,
            Some(token) => return Err(invalid(format!("expected operator, found {:?}", token))),
            None => return Err(invalid("expected operator, found end of input")),
        };
        let right = self.parse_operand()?;

        match (left, right) {
            (Operand::Member(field), Operand::Literal(value)) => {
                Ok(FilterExpr::compare(field, operator, value))
            }
            (Operand::Literal(value), Operand::Member(field)) => {
                Ok(FilterExpr::compare(field, operator.flipped(), value))
            }
            (l, r) => Err(invalid(format!(
                "comparison needs one property and one literal, found {:?} {} {:?}",
                l,
                operator.as_str(),
                r
            ))),
        }
    }

    fn parse_operand(&mut self) -> ODataResult<Operand> {
        match self.next() {
            Some(Token::Str(s)) => Ok(Operand::Literal(Value::String(s))),
            Some(Token::Number(n)) => Ok(Operand::Literal(Value::Number(n))),
            Some(Token::Ident(s)) => Ok(match s.as_str() {
                "true" => Operand::Literal(Value::Bool(true)),
                "false" => Operand::Literal(Value::Bool(false)),
                "null" => Operand::Literal(Value::Null),
                _ => Operand::Member(s.replace('/', ".")),
            }),
            Some(token) => Err(invalid(format!("expected operand, found {:?}", token))),
            None => Err(invalid("expected operand, found end of input")),
        }
    }
}

#[derive(Debug)]
enum Operand {
    Member(String),
    Literal(Value),
}
