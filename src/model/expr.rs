//! Expression compiler (component F): parses an arithmetic expression
//! string into a flat postfix op list bound against a [`Binding`], so
//! evaluation at integration time is a straight stack walk with no name
//! lookup (spec.md 3's "SSA-form operator list plus a shared scalar
//! workspace" design note).

use crate::model::binding::Binding;
use serde::{Deserialize, Serialize};

#[derive(Debug)]
pub enum ExprError {
    Syntax(String),
    UnknownIdent(String),
}

impl std::fmt::Display for ExprError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExprError::Syntax(msg) => write!(f, "{msg}"),
            ExprError::UnknownIdent(name) => write!(f, "unknown identifier `{name}`"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Func1 {
    Sin,
    Cos,
    Tan,
    Asin,
    Acos,
    Atan,
    Exp,
    Log,
    Log10,
    Sqrt,
    Abs,
    Floor,
    Ceil,
    Round,
    Sign,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Func2 {
    Atan2,
    Pow,
    Min,
    Max,
}

fn func1_of(name: &str) -> Option<Func1> {
    Some(match name {
        "sin" => Func1::Sin,
        "cos" => Func1::Cos,
        "tan" => Func1::Tan,
        "asin" => Func1::Asin,
        "acos" => Func1::Acos,
        "atan" => Func1::Atan,
        "exp" => Func1::Exp,
        "log" => Func1::Log,
        "log10" => Func1::Log10,
        "sqrt" => Func1::Sqrt,
        "abs" => Func1::Abs,
        "floor" => Func1::Floor,
        "ceil" => Func1::Ceil,
        "round" => Func1::Round,
        "sign" => Func1::Sign,
        _ => return None,
    })
}

fn func2_of(name: &str) -> Option<Func2> {
    Some(match name {
        "atan2" => Func2::Atan2,
        "pow" => Func2::Pow,
        "min" => Func2::Min,
        "max" => Func2::Max,
        _ => return None,
    })
}

fn apply1(f: Func1, a: f64) -> f64 {
    match f {
        Func1::Sin => a.sin(),
        Func1::Cos => a.cos(),
        Func1::Tan => a.tan(),
        Func1::Asin => a.asin(),
        Func1::Acos => a.acos(),
        Func1::Atan => a.atan(),
        Func1::Exp => a.exp(),
        Func1::Log => a.ln(),
        Func1::Log10 => a.log10(),
        Func1::Sqrt => a.sqrt(),
        Func1::Abs => a.abs(),
        Func1::Floor => a.floor(),
        Func1::Ceil => a.ceil(),
        Func1::Round => a.round(),
        Func1::Sign => {
            if a > 0.0 {
                1.0
            } else if a < 0.0 {
                -1.0
            } else {
                0.0
            }
        }
    }
}

fn apply2(f: Func2, a: f64, b: f64) -> f64 {
    match f {
        Func2::Atan2 => a.atan2(b),
        Func2::Pow => a.powf(b),
        Func2::Min => a.min(b),
        Func2::Max => a.max(b),
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Op {
    Const(f64),
    Load(usize),
    Add,
    Sub,
    Mul,
    Div,
    Pow,
    Neg,
    Call1(Func1),
    Call2(Func2),
}

/// A compiled expression: a postfix program over a shared scalar
/// workspace. Cheap to clone, holds no reference to the source text.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Expr {
    ops: Vec<Op>,
}

impl Expr {
    /// Evaluates against `workspace`, reusing `stack` as scratch space
    /// (cleared on entry) so the hot loop never allocates.
    pub fn eval(&self, workspace: &[f64], stack: &mut Vec<f64>) -> f64 {
        stack.clear();
        for op in &self.ops {
            match *op {
                Op::Const(v) => stack.push(v),
                Op::Load(i) => stack.push(workspace[i]),
                Op::Add => {
                    let b = stack.pop().expect("well-formed program");
                    let a = stack.pop().expect("well-formed program");
                    stack.push(a + b);
                }
                Op::Sub => {
                    let b = stack.pop().expect("well-formed program");
                    let a = stack.pop().expect("well-formed program");
                    stack.push(a - b);
                }
                Op::Mul => {
                    let b = stack.pop().expect("well-formed program");
                    let a = stack.pop().expect("well-formed program");
                    stack.push(a * b);
                }
                Op::Div => {
                    let b = stack.pop().expect("well-formed program");
                    let a = stack.pop().expect("well-formed program");
                    stack.push(a / b);
                }
                Op::Pow => {
                    let b = stack.pop().expect("well-formed program");
                    let a = stack.pop().expect("well-formed program");
                    stack.push(a.powf(b));
                }
                Op::Neg => {
                    let a = stack.pop().expect("well-formed program");
                    stack.push(-a);
                }
                Op::Call1(f) => {
                    let a = stack.pop().expect("well-formed program");
                    stack.push(apply1(f, a));
                }
                Op::Call2(f) => {
                    let b = stack.pop().expect("well-formed program");
                    let a = stack.pop().expect("well-formed program");
                    stack.push(apply2(f, a, b));
                }
            }
        }
        stack.pop().unwrap_or(0.0)
    }

    /// Convenience for call sites that don't keep a reusable stack
    /// (parameter/constant folding at build time, tests).
    pub fn eval_once(&self, workspace: &[f64]) -> f64 {
        let mut stack = Vec::with_capacity(self.ops.len());
        self.eval(workspace, &mut stack)
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Tok {
    Num(f64),
    Ident(String),
    Plus,
    Minus,
    Star,
    Slash,
    Caret,
    Comma,
    LParen,
    RParen,
    End,
}

fn tokenize(src: &str) -> Result<Vec<Tok>, ExprError> {
    let chars: Vec<char> = src.chars().collect();
    let mut i = 0;
    let mut toks = Vec::new();
    while i < chars.len() {
        let c = chars[i];
        if c.is_whitespace() {
            i += 1;
            continue;
        }
        match c {
            '+' => {
                toks.push(Tok::Plus);
                i += 1;
            }
            '-' => {
                toks.push(Tok::Minus);
                i += 1;
            }
            '*' => {
                toks.push(Tok::Star);
                i += 1;
            }
            '/' => {
                toks.push(Tok::Slash);
                i += 1;
            }
            '^' => {
                toks.push(Tok::Caret);
                i += 1;
            }
            ',' => {
                toks.push(Tok::Comma);
                i += 1;
            }
            '(' => {
                toks.push(Tok::LParen);
                i += 1;
            }
            ')' => {
                toks.push(Tok::RParen);
                i += 1;
            }
            _ if c.is_ascii_digit() || c == '.' => {
                let start = i;
                while i < chars.len() && (chars[i].is_ascii_digit() || chars[i] == '.') {
                    i += 1;
                }
                if i < chars.len() && (chars[i] == 'e' || chars[i] == 'E') {
                    i += 1;
                    if i < chars.len() && (chars[i] == '+' || chars[i] == '-') {
                        i += 1;
                    }
                    while i < chars.len() && chars[i].is_ascii_digit() {
                        i += 1;
                    }
                }
                let text: String = chars[start..i].iter().collect();
                let v = text
                    .parse::<f64>()
                    .map_err(|_| ExprError::Syntax(format!("malformed number literal `{text}`")))?;
                toks.push(Tok::Num(v));
            }
            _ if c.is_alphabetic() || c == '_' => {
                let start = i;
                while i < chars.len() && (chars[i].is_alphanumeric() || chars[i] == '_') {
                    i += 1;
                }
                let text: String = chars[start..i].iter().collect();
                toks.push(Tok::Ident(text));
            }
            _ => {
                return Err(ExprError::Syntax(format!("unexpected character `{c}`")));
            }
        }
    }
    toks.push(Tok::End);
    Ok(toks)
}

struct Parser<'a> {
    toks: Vec<Tok>,
    pos: usize,
    binding: &'a Binding,
    ops: Vec<Op>,
}

impl<'a> Parser<'a> {
    fn peek(&self) -> &Tok {
        &self.toks[self.pos]
    }

    fn bump(&mut self) -> Tok {
        let t = self.toks[self.pos].clone();
        if self.pos + 1 < self.toks.len() {
            self.pos += 1;
        }
        t
    }

    fn expect(&mut self, tok: &Tok) -> Result<(), ExprError> {
        if self.peek() == tok {
            self.bump();
            Ok(())
        } else {
            Err(ExprError::Syntax(format!("expected {tok:?}, found {:?}", self.peek())))
        }
    }

    // expr := term (('+' | '-') term)*
    fn parse_expr(&mut self) -> Result<(), ExprError> {
        self.parse_term()?;
        loop {
            match self.peek() {
                Tok::Plus => {
                    self.bump();
                    self.parse_term()?;
                    self.ops.push(Op::Add);
                }
                Tok::Minus => {
                    self.bump();
                    self.parse_term()?;
                    self.ops.push(Op::Sub);
                }
                _ => break,
            }
        }
        Ok(())
    }

    // term := unary (('*' | '/') unary)*
    fn parse_term(&mut self) -> Result<(), ExprError> {
        self.parse_unary()?;
        loop {
            match self.peek() {
                Tok::Star => {
                    self.bump();
                    self.parse_unary()?;
                    self.ops.push(Op::Mul);
                }
                Tok::Slash => {
                    self.bump();
                    self.parse_unary()?;
                    self.ops.push(Op::Div);
                }
                _ => break,
            }
        }
        Ok(())
    }

    // unary := '-' unary | power  -- binds looser than '^', so `-2^2`
    // parses as `-(2^2)`, the conventional reading (Python/JS/bc/Excel).
    fn parse_unary(&mut self) -> Result<(), ExprError> {
        if *self.peek() == Tok::Minus {
            self.bump();
            self.parse_unary()?;
            self.ops.push(Op::Neg);
            Ok(())
        } else {
            self.parse_power()
        }
    }

    // power := primary ('^' unary)?   -- right-associative; the exponent
    // may itself be unary so `2^-2` still parses.
    fn parse_power(&mut self) -> Result<(), ExprError> {
        self.parse_primary()?;
        if *self.peek() == Tok::Caret {
            self.bump();
            self.parse_unary()?;
            self.ops.push(Op::Pow);
        }
        Ok(())
    }

    // primary := number | '(' expr ')' | ident | ident '(' args ')'
    fn parse_primary(&mut self) -> Result<(), ExprError> {
        match self.bump() {
            Tok::Num(v) => {
                self.ops.push(Op::Const(v));
                Ok(())
            }
            Tok::LParen => {
                self.parse_expr()?;
                self.expect(&Tok::RParen)?;
                Ok(())
            }
            Tok::Ident(name) => self.parse_ident(&name),
            other => Err(ExprError::Syntax(format!("unexpected token {other:?}"))),
        }
    }

    fn parse_ident(&mut self, name: &str) -> Result<(), ExprError> {
        if *self.peek() == Tok::LParen {
            self.bump();
            if let Some(f1) = func1_of(name) {
                self.parse_expr()?;
                self.expect(&Tok::RParen)?;
                self.ops.push(Op::Call1(f1));
                return Ok(());
            }
            if let Some(f2) = func2_of(name) {
                self.parse_expr()?;
                self.expect(&Tok::Comma)?;
                self.parse_expr()?;
                self.expect(&Tok::RParen)?;
                self.ops.push(Op::Call2(f2));
                return Ok(());
            }
            return Err(ExprError::Syntax(format!("unknown function `{name}`")));
        }
        match name {
            "pi" => {
                self.ops.push(Op::Const(std::f64::consts::PI));
                Ok(())
            }
            "e" => {
                self.ops.push(Op::Const(std::f64::consts::E));
                Ok(())
            }
            _ => match self.binding.get(name) {
                Some(idx) => {
                    self.ops.push(Op::Load(idx));
                    Ok(())
                }
                None => Err(ExprError::UnknownIdent(name.to_string())),
            },
        }
    }
}

/// Compiles `src` into an [`Expr`], resolving every free identifier
/// against `binding`. Identifiers not already bound produce
/// [`ExprError::UnknownIdent`] rather than being auto-bound -- by the
/// time expressions are compiled, every legal name (states, the
/// argument, expressions, parameters, constants, reserved names) has
/// already been registered by the model parser's first pass.
pub fn compile(src: &str, binding: &Binding) -> Result<Expr, ExprError> {
    let toks = tokenize(src)?;
    let mut parser = Parser {
        toks,
        pos: 0,
        binding,
        ops: Vec::new(),
    };
    parser.parse_expr()?;
    if *parser.peek() != Tok::End {
        return Err(ExprError::Syntax(format!("unexpected trailing token {:?}", parser.peek())));
    }
    Ok(Expr { ops: parser.ops })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bound(names: &[&str]) -> Binding {
        let mut b = Binding::new();
        for n in names {
            b.bind(n);
        }
        b
    }

    #[test]
    fn evaluates_arithmetic_with_precedence() {
        let b = bound(&[]);
        let e = compile("2 + 3 * 4 - 1", &b).unwrap();
        assert_eq!(e.eval_once(&[]), 13.0);
    }

    #[test]
    fn power_is_right_associative() {
        let b = bound(&[]);
        let e = compile("2 ^ 3 ^ 2", &b).unwrap();
        assert_eq!(e.eval_once(&[]), 512.0);
    }

    #[test]
    fn resolves_bound_identifiers() {
        let b = bound(&["x", "y"]);
        let e = compile("x * x + y", &b).unwrap();
        assert_eq!(e.eval_once(&[3.0, 1.0]), 10.0);
    }

    #[test]
    fn unknown_identifier_is_a_name_error() {
        let b = bound(&[]);
        let err = compile("z + 1", &b).unwrap_err();
        assert!(matches!(err, ExprError::UnknownIdent(n) if n == "z"));
    }

    #[test]
    fn functions_and_constants() {
        let b = bound(&[]);
        let e = compile("sin(0) + cos(0) + pow(2, 3) + atan2(0, 1)", &b).unwrap();
        assert!((e.eval_once(&[]) - 9.0).abs() < 1e-12);
    }

    #[test]
    fn unary_minus_binds_looser_than_power() {
        let b = bound(&[]);
        let e = compile("-2^2", &b).unwrap();
        // '^' binds tighter than unary '-', so this is -(2^2) = -4.
        assert_eq!(e.eval_once(&[]), -4.0);
    }

    #[test]
    fn negative_exponent_still_parses() {
        let b = bound(&[]);
        let e = compile("2^-2", &b).unwrap();
        assert!((e.eval_once(&[]) - 0.25).abs() < 1e-12);
    }

    #[test]
    fn scientific_notation_literal() {
        let b = bound(&[]);
        let e = compile("1.5e2 + 1E-1", &b).unwrap();
        assert!((e.eval_once(&[]) - 150.1).abs() < 1e-12);
    }

    #[test]
    fn rejects_malformed_source() {
        let b = bound(&[]);
        assert!(compile("1 + ", &b).is_err());
        assert!(compile("(1 + 2", &b).is_err());
    }
}
