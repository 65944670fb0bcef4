//! Numeric identity descriptors such as `net = gross - loss`
//!
//! Descriptors come from static configuration and are parsed once when the
//! profile registry loads. A descriptor that fails to parse is a configuration
//! defect, never a request-time condition.
use rust_decimal::Decimal;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

use super::error::EquationError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op {
    Add,
    Sub,
    Mul,
    Div,
}

impl Op {
    fn precedence(self) -> u8 {
        match self {
            Op::Add | Op::Sub => 1,
            Op::Mul | Op::Div => 2,
        }
    }
    fn symbol(self) -> &'static str {
        match self {
            Op::Add => "+",
            Op::Sub => "-",
            Op::Mul => "*",
            Op::Div => "/",
        }
    }
    fn apply(self, a: Decimal, b: Decimal) -> Option<Decimal> {
        match self {
            Op::Add => a.checked_add(b),
            Op::Sub => a.checked_sub(b),
            Op::Mul => a.checked_mul(b),
            Op::Div => a.checked_div(b),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Expr {
    Number(Decimal),
    Field(String),
    Neg(Box<Expr>),
    Binary(Box<Expr>, Op, Box<Expr>),
}

impl Expr {
    fn collect_fields<'a>(&'a self, out: &mut BTreeSet<&'a str>) {
        match self {
            Expr::Number(_) => {}
            Expr::Field(name) => {
                out.insert(name.as_str());
            }
            Expr::Neg(inner) => inner.collect_fields(out),
            Expr::Binary(a, _, b) => {
                a.collect_fields(out);
                b.collect_fields(out);
            }
        }
    }

    // None when an operand is missing or the arithmetic is undefined
    fn eval(&self, operands: &BTreeMap<String, Decimal>) -> Option<Decimal> {
        match self {
            Expr::Number(n) => Some(*n),
            Expr::Field(name) => operands.get(name).copied(),
            Expr::Neg(inner) => inner.eval(operands).map(|v| -v),
            Expr::Binary(a, op, b) => op.apply(a.eval(operands)?, b.eval(operands)?),
        }
    }

    fn precedence(&self) -> u8 {
        match self {
            Expr::Binary(_, op, _) => op.precedence(),
            _ => 3,
        }
    }

    fn fmt_child(&self, f: &mut fmt::Formatter<'_>, parens: bool) -> fmt::Result {
        if parens {
            write!(f, "({self})")
        } else {
            write!(f, "{self}")
        }
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::Number(n) => write!(f, "{n}"),
            Expr::Field(name) => f.write_str(name),
            Expr::Neg(inner) => {
                f.write_str("-")?;
                inner.fmt_child(f, inner.precedence() < 3)
            }
            Expr::Binary(a, op, b) => {
                let p = op.precedence();
                a.fmt_child(f, a.precedence() < p)?;
                write!(f, " {} ", op.symbol())?;
                // a - (b - c) and a / (b * c) keep their parentheses
                let right_parens = b.precedence() < p
                    || (b.precedence() == p && matches!(op, Op::Sub | Op::Div));
                b.fmt_child(f, right_parens)
            }
        }
    }
}

/// Outcome of evaluating both sides of an equation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Evaluation {
    /// At least one referenced field is absent.
    Skipped,
    Evaluated { lhs: Decimal, rhs: Decimal },
    /// Every operand is present but the arithmetic has no value (division by zero, overflow).
    Undefined,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Equation {
    lhs: Expr,
    rhs: Expr,
    derived: String,
}

impl Equation {
    /// Parses `field = expr`; the left-hand field is the derived one.
    pub fn parse(source: &str) -> Result<Self, EquationError> {
        let (lhs, rhs) = Parser::new(source)?.equation()?;
        match &lhs {
            Expr::Field(name) => {
                let derived = name.clone();
                Self::assemble(source, lhs, rhs, derived)
            }
            _ => Err(EquationError::NoDerivedField(source.to_owned())),
        }
    }

    /// Parses any `expr = expr` and reports violations against `derived`.
    pub fn parse_with_derived(source: &str, derived: &str) -> Result<Self, EquationError> {
        let (lhs, rhs) = Parser::new(source)?.equation()?;
        Self::assemble(source, lhs, rhs, derived.to_owned())
    }

    fn assemble(source: &str, lhs: Expr, rhs: Expr, derived: String) -> Result<Self, EquationError> {
        let equation = Self { lhs, rhs, derived };
        let fields = equation.fields();
        if fields.is_empty() {
            return Err(EquationError::NoFields(source.to_owned()));
        }
        if !fields.contains(equation.derived.as_str()) {
            return Err(EquationError::UnknownDerivedField {
                field: equation.derived.clone(),
                equation: source.to_owned(),
            });
        }
        Ok(equation)
    }

    pub fn derived(&self) -> &str {
        &self.derived
    }

    pub fn fields(&self) -> BTreeSet<&str> {
        let mut out = BTreeSet::new();
        self.lhs.collect_fields(&mut out);
        self.rhs.collect_fields(&mut out);
        out
    }

    pub fn evaluate(&self, operands: &BTreeMap<String, Decimal>) -> Evaluation {
        if self.fields().iter().any(|f| !operands.contains_key(*f)) {
            return Evaluation::Skipped;
        }
        match (self.lhs.eval(operands), self.rhs.eval(operands)) {
            (Some(lhs), Some(rhs)) => Evaluation::Evaluated { lhs, rhs },
            _ => Evaluation::Undefined,
        }
    }
}

impl FromStr for Equation {
    type Err = EquationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Equation::parse(s)
    }
}

impl fmt::Display for Equation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} = {}", self.lhs, self.rhs)
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Number(Decimal),
    Ident(String),
    Op(Op),
    Open,
    Close,
    Equals,
}

fn tokenize(source: &str) -> Result<Vec<(usize, Token)>, EquationError> {
    let mut tokens = Vec::new();
    let mut chars = source.char_indices().peekable();

    while let Some(&(offset, c)) = chars.peek() {
        let token = match c {
            c if c.is_whitespace() => {
                chars.next();
                continue;
            }
            '+' => Token::Op(Op::Add),
            '-' => Token::Op(Op::Sub),
            '*' => Token::Op(Op::Mul),
            '/' => Token::Op(Op::Div),
            '(' => Token::Open,
            ')' => Token::Close,
            '=' => Token::Equals,
            c if c.is_ascii_digit() || c == '.' => {
                let mut literal = String::new();
                while let Some(&(_, d)) = chars.peek() {
                    if !(d.is_ascii_digit() || d == '.') {
                        break;
                    }
                    literal.push(d);
                    chars.next();
                }
                let n = Decimal::from_str(&literal)
                    .map_err(|_| EquationError::InvalidNumber(literal.clone()))?;
                tokens.push((offset, Token::Number(n)));
                continue;
            }
            c if c.is_ascii_alphabetic() || c == '_' => {
                let mut ident = String::new();
                while let Some(&(_, d)) = chars.peek() {
                    if !(d.is_ascii_alphanumeric() || d == '_') {
                        break;
                    }
                    ident.push(d);
                    chars.next();
                }
                tokens.push((offset, Token::Ident(ident)));
                continue;
            }
            found => return Err(EquationError::UnexpectedChar { found, offset }),
        };
        chars.next();
        tokens.push((offset, token));
    }

    Ok(tokens)
}

struct Parser<'s> {
    source: &'s str,
    tokens: Vec<(usize, Token)>,
    pos: usize,
}

impl<'s> Parser<'s> {
    fn new(source: &'s str) -> Result<Self, EquationError> {
        Ok(Self {
            source,
            tokens: tokenize(source)?,
            pos: 0,
        })
    }

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos).map(|(_, t)| t)
    }

    fn offset(&self) -> usize {
        self.tokens
            .get(self.pos)
            .map(|(o, _)| *o)
            .unwrap_or(self.source.len())
    }

    fn equation(mut self) -> Result<(Expr, Expr), EquationError> {
        if !self.tokens.iter().any(|(_, t)| *t == Token::Equals) {
            return Err(EquationError::MissingEquals(self.source.to_owned()));
        }
        let lhs = self.expr()?;
        match self.peek() {
            Some(Token::Equals) => self.pos += 1,
            Some(Token::Close) => return Err(EquationError::Unbalanced(self.offset())),
            _ => return Err(EquationError::TrailingInput(self.offset())),
        }
        let rhs = self.expr()?;
        match self.peek() {
            None => Ok((lhs, rhs)),
            Some(Token::Close) => Err(EquationError::Unbalanced(self.offset())),
            Some(Token::Equals) => Err(EquationError::MissingEquals(self.source.to_owned())),
            Some(_) => Err(EquationError::TrailingInput(self.offset())),
        }
    }

    fn expr(&mut self) -> Result<Expr, EquationError> {
        let mut lhs = self.term()?;
        while let Some(Token::Op(op @ (Op::Add | Op::Sub))) = self.peek() {
            let op = *op;
            self.pos += 1;
            let rhs = self.term()?;
            lhs = Expr::Binary(Box::new(lhs), op, Box::new(rhs));
        }
        Ok(lhs)
    }

    fn term(&mut self) -> Result<Expr, EquationError> {
        let mut lhs = self.unary()?;
        while let Some(Token::Op(op @ (Op::Mul | Op::Div))) = self.peek() {
            let op = *op;
            self.pos += 1;
            let rhs = self.unary()?;
            lhs = Expr::Binary(Box::new(lhs), op, Box::new(rhs));
        }
        Ok(lhs)
    }

    fn unary(&mut self) -> Result<Expr, EquationError> {
        if let Some(Token::Op(Op::Sub)) = self.peek() {
            self.pos += 1;
            return Ok(Expr::Neg(Box::new(self.unary()?)));
        }
        self.primary()
    }

    fn primary(&mut self) -> Result<Expr, EquationError> {
        let offset = self.offset();
        let token = self.peek().cloned();
        match token {
            Some(Token::Number(n)) => {
                self.pos += 1;
                Ok(Expr::Number(n))
            }
            Some(Token::Ident(name)) => {
                self.pos += 1;
                Ok(Expr::Field(name))
            }
            Some(Token::Open) => {
                self.pos += 1;
                let inner = self.expr()?;
                if self.peek() != Some(&Token::Close) {
                    return Err(EquationError::Unbalanced(offset));
                }
                self.pos += 1;
                Ok(inner)
            }
            _ => Err(EquationError::ExpectedOperand(offset)),
        }
    }
}
