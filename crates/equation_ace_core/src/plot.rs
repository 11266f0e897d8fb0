//! crates/equation_ace_core/src/plot.rs
//!
//! Parses single-variable function expressions (the notation the solving model
//! emits, e.g. `x^2 + 3*x - 4` or `2sin(x)`) and samples them over a fixed domain.

use std::fmt;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum PlotError {
    #[error("syntax error at position {position}: {message}")]
    Syntax { position: usize, message: String },
    #[error("unknown variable '{0}'")]
    UnknownVariable(String),
    #[error("unknown function '{0}'")]
    UnknownFunction(String),
    #[error("function '{name}' does not take {given} argument(s)")]
    Arity { name: String, given: usize },
    #[error("the expression has no finite values on the plotted domain")]
    NoFiniteValues,
}

impl PlotError {
    /// The message shown in place of the graph.
    pub fn user_message(&self) -> &'static str {
        "Could not plot the function. Invalid expression provided by AI."
    }
}

//=========================================================================================
// Tokenizer
//=========================================================================================

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Number(f64),
    Ident(String),
    Op(char),
    LParen,
    RParen,
    Comma,
}

fn tokenize(source: &str) -> Result<Vec<(usize, Token)>, PlotError> {
    let chars: Vec<char> = source.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        let start = i;
        match c {
            c if c.is_whitespace() => {
                i += 1;
                continue;
            }
            '0'..='9' | '.' => {
                while i < chars.len() && (chars[i].is_ascii_digit() || chars[i] == '.') {
                    i += 1;
                }
                // Scientific notation only when the exponent has digits, so `2e` stays `2*e`.
                if i < chars.len() && (chars[i] == 'e' || chars[i] == 'E') {
                    let mut j = i + 1;
                    if j < chars.len() && (chars[j] == '+' || chars[j] == '-') {
                        j += 1;
                    }
                    if j < chars.len() && chars[j].is_ascii_digit() {
                        while j < chars.len() && chars[j].is_ascii_digit() {
                            j += 1;
                        }
                        i = j;
                    }
                }
                let text: String = chars[start..i].iter().collect();
                let value = text.parse::<f64>().map_err(|_| PlotError::Syntax {
                    position: start,
                    message: format!("invalid number '{}'", text),
                })?;
                tokens.push((start, Token::Number(value)));
                continue;
            }
            c if c.is_alphabetic() || c == '_' => {
                while i < chars.len() && (chars[i].is_alphanumeric() || chars[i] == '_') {
                    i += 1;
                }
                tokens.push((start, Token::Ident(chars[start..i].iter().collect())));
                continue;
            }
            '+' | '-' | '*' | '/' | '%' | '^' | '!' => tokens.push((start, Token::Op(c))),
            '(' => tokens.push((start, Token::LParen)),
            ')' => tokens.push((start, Token::RParen)),
            ',' => tokens.push((start, Token::Comma)),
            other => {
                return Err(PlotError::Syntax {
                    position: start,
                    message: format!("unexpected character '{}'", other),
                })
            }
        }
        i += 1;
    }
    Ok(tokens)
}

//=========================================================================================
// Syntax Tree
//=========================================================================================

#[derive(Debug, Clone, Copy, PartialEq)]
enum Func {
    Sin,
    Cos,
    Tan,
    Asin,
    Acos,
    Atan,
    Sinh,
    Cosh,
    Tanh,
    Sqrt,
    Cbrt,
    Abs,
    Exp,
    Ln,
    Log,
    Log10,
    Log2,
    Floor,
    Ceil,
    Round,
    Sign,
    Min,
    Max,
    Pow,
}

impl Func {
    fn lookup(name: &str) -> Option<Self> {
        Some(match name {
            "sin" => Func::Sin,
            "cos" => Func::Cos,
            "tan" => Func::Tan,
            "asin" | "arcsin" => Func::Asin,
            "acos" | "arccos" => Func::Acos,
            "atan" | "arctan" => Func::Atan,
            "sinh" => Func::Sinh,
            "cosh" => Func::Cosh,
            "tanh" => Func::Tanh,
            "sqrt" => Func::Sqrt,
            "cbrt" => Func::Cbrt,
            "abs" => Func::Abs,
            "exp" => Func::Exp,
            "ln" => Func::Ln,
            "log" => Func::Log,
            "log10" => Func::Log10,
            "log2" => Func::Log2,
            "floor" => Func::Floor,
            "ceil" => Func::Ceil,
            "round" => Func::Round,
            "sign" => Func::Sign,
            "min" => Func::Min,
            "max" => Func::Max,
            "pow" => Func::Pow,
            _ => return None,
        })
    }

    fn accepts(self, count: usize) -> bool {
        match self {
            Func::Log => count == 1 || count == 2,
            Func::Pow => count == 2,
            Func::Min | Func::Max => count >= 1,
            _ => count == 1,
        }
    }

    fn apply(self, args: &[f64]) -> f64 {
        let a = args[0];
        match self {
            Func::Sin => a.sin(),
            Func::Cos => a.cos(),
            Func::Tan => a.tan(),
            Func::Asin => a.asin(),
            Func::Acos => a.acos(),
            Func::Atan => a.atan(),
            Func::Sinh => a.sinh(),
            Func::Cosh => a.cosh(),
            Func::Tanh => a.tanh(),
            Func::Sqrt => a.sqrt(),
            Func::Cbrt => a.cbrt(),
            Func::Abs => a.abs(),
            Func::Exp => a.exp(),
            Func::Ln => a.ln(),
            // log(x) is the natural logarithm, log(x, base) uses the given base.
            Func::Log => match args.get(1) {
                Some(base) => a.ln() / base.ln(),
                None => a.ln(),
            },
            Func::Log10 => a.log10(),
            Func::Log2 => a.log2(),
            Func::Floor => a.floor(),
            Func::Ceil => a.ceil(),
            Func::Round => a.round(),
            Func::Sign => {
                if a == 0.0 {
                    0.0
                } else {
                    a.signum()
                }
            }
            Func::Min => args.iter().copied().fold(f64::INFINITY, f64::min),
            Func::Max => args.iter().copied().fold(f64::NEG_INFINITY, f64::max),
            Func::Pow => a.powf(args[1]),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Node {
    Number(f64),
    Variable,
    Negate(Box<Node>),
    Factorial(Box<Node>),
    Binary(char, Box<Node>, Box<Node>),
    Call(Func, Vec<Node>),
}

impl Node {
    fn eval(&self, x: f64) -> f64 {
        match self {
            Node::Number(value) => *value,
            Node::Variable => x,
            Node::Negate(inner) => -inner.eval(x),
            Node::Factorial(inner) => factorial(inner.eval(x)),
            Node::Binary(op, lhs, rhs) => {
                let (a, b) = (lhs.eval(x), rhs.eval(x));
                match op {
                    '+' => a + b,
                    '-' => a - b,
                    '*' => a * b,
                    '/' => a / b,
                    '%' => a % b,
                    _ => a.powf(b),
                }
            }
            Node::Call(func, args) => {
                let values: Vec<f64> = args.iter().map(|arg| arg.eval(x)).collect();
                func.apply(&values)
            }
        }
    }
}

/// Factorial of a non-negative integer; NaN otherwise.
fn factorial(n: f64) -> f64 {
    if n < 0.0 || n.fract() != 0.0 {
        return f64::NAN;
    }
    if n > 170.0 {
        return f64::INFINITY;
    }
    (1..=n as u32).fold(1.0, |acc, k| acc * f64::from(k))
}

//=========================================================================================
// Parser
//=========================================================================================

/// Longest accepted expression, in characters. Keeps the parse tree shallow
/// enough for recursive evaluation.
pub const MAX_EXPRESSION_LEN: usize = 512;

/// Deepest accepted nesting of parentheses, signs and exponents.
const MAX_NESTING: usize = 64;

struct Parser {
    tokens: Vec<(usize, Token)>,
    pos: usize,
    end: usize,
    depth: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos).map(|(_, t)| t)
    }

    fn position(&self) -> usize {
        self.tokens.get(self.pos).map(|(p, _)| *p).unwrap_or(self.end)
    }

    fn error<T>(&self, message: impl Into<String>) -> Result<T, PlotError> {
        Err(PlotError::Syntax {
            position: self.position(),
            message: message.into(),
        })
    }

    fn advance(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).map(|(_, t)| t.clone());
        self.pos += 1;
        token
    }

    /// Runs `parse` one nesting level deeper.
    fn nested<T>(
        &mut self,
        parse: impl FnOnce(&mut Self) -> Result<T, PlotError>,
    ) -> Result<T, PlotError> {
        if self.depth >= MAX_NESTING {
            return self.error("expression is nested too deeply");
        }
        self.depth += 1;
        let result = parse(self);
        self.depth -= 1;
        result
    }

    fn eat_op(&mut self, ops: &[char]) -> Option<char> {
        match self.peek() {
            Some(Token::Op(op)) if ops.contains(op) => {
                let op = *op;
                self.pos += 1;
                Some(op)
            }
            _ => None,
        }
    }

    fn expression(&mut self) -> Result<Node, PlotError> {
        let mut node = self.term()?;
        while let Some(op) = self.eat_op(&['+', '-']) {
            let rhs = self.term()?;
            node = Node::Binary(op, Box::new(node), Box::new(rhs));
        }
        Ok(node)
    }

    fn term(&mut self) -> Result<Node, PlotError> {
        let mut node = self.unary()?;
        loop {
            if let Some(op) = self.eat_op(&['*', '/', '%']) {
                let rhs = self.unary()?;
                node = Node::Binary(op, Box::new(node), Box::new(rhs));
            } else if matches!(
                self.peek(),
                Some(Token::Number(_)) | Some(Token::Ident(_)) | Some(Token::LParen)
            ) {
                // Implicit multiplication: `3x`, `2(x + 1)`, `x sin(x)`.
                let rhs = self.power()?;
                node = Node::Binary('*', Box::new(node), Box::new(rhs));
            } else {
                return Ok(node);
            }
        }
    }

    fn unary(&mut self) -> Result<Node, PlotError> {
        match self.eat_op(&['-', '+']) {
            Some('-') => Ok(Node::Negate(Box::new(self.nested(Self::unary)?))),
            Some(_) => self.nested(Self::unary),
            None => self.power(),
        }
    }

    fn power(&mut self) -> Result<Node, PlotError> {
        let base = self.postfix()?;
        if self.eat_op(&['^']).is_some() {
            // Right associative, and the exponent may carry a sign: `x^-2`.
            let exponent = self.nested(Self::unary)?;
            return Ok(Node::Binary('^', Box::new(base), Box::new(exponent)));
        }
        Ok(base)
    }

    fn postfix(&mut self) -> Result<Node, PlotError> {
        let mut node = self.primary()?;
        while self.eat_op(&['!']).is_some() {
            node = Node::Factorial(Box::new(node));
        }
        Ok(node)
    }

    fn primary(&mut self) -> Result<Node, PlotError> {
        match self.peek().cloned() {
            Some(Token::Number(value)) => {
                self.pos += 1;
                Ok(Node::Number(value))
            }
            Some(Token::LParen) => {
                self.pos += 1;
                self.nested(|p| {
                    let inner = p.expression()?;
                    p.expect_rparen()?;
                    Ok(inner)
                })
            }
            Some(Token::Ident(name)) => {
                self.pos += 1;
                self.identifier(name)
            }
            Some(Token::Op(op)) => self.error(format!("unexpected operator '{}'", op)),
            Some(Token::RParen) => self.error("unexpected ')'"),
            Some(Token::Comma) => self.error("unexpected ','"),
            None => self.error("unexpected end of expression"),
        }
    }

    fn identifier(&mut self, name: String) -> Result<Node, PlotError> {
        match name.as_str() {
            "x" => return Ok(Node::Variable),
            "pi" | "PI" => return Ok(Node::Number(std::f64::consts::PI)),
            "e" | "E" => return Ok(Node::Number(std::f64::consts::E)),
            _ => {}
        }
        let Some(func) = Func::lookup(&name) else {
            return Err(if self.peek() == Some(&Token::LParen) {
                PlotError::UnknownFunction(name)
            } else {
                PlotError::UnknownVariable(name)
            });
        };
        if self.peek() != Some(&Token::LParen) {
            return self.error(format!("expected '(' after '{}'", name));
        }
        self.pos += 1;
        let args = self.nested(|p| {
            let mut args = vec![p.expression()?];
            while p.peek() == Some(&Token::Comma) {
                p.pos += 1;
                args.push(p.expression()?);
            }
            p.expect_rparen()?;
            Ok(args)
        })?;
        if !func.accepts(args.len()) {
            return Err(PlotError::Arity {
                name,
                given: args.len(),
            });
        }
        Ok(Node::Call(func, args))
    }

    fn expect_rparen(&mut self) -> Result<(), PlotError> {
        match self.advance() {
            Some(Token::RParen) => Ok(()),
            _ => {
                self.pos -= 1;
                self.error("expected ')'")
            }
        }
    }
}

//=========================================================================================
// Public API
//=========================================================================================

/// A parsed function of `x`.
#[derive(Debug, Clone, PartialEq)]
pub struct Expression {
    source: String,
    root: Node,
}

impl Expression {
    pub fn parse(source: &str) -> Result<Self, PlotError> {
        let end = source.chars().count();
        if end > MAX_EXPRESSION_LEN {
            return Err(PlotError::Syntax {
                position: MAX_EXPRESSION_LEN,
                message: format!("expression is longer than {} characters", MAX_EXPRESSION_LEN),
            });
        }
        let tokens = tokenize(source)?;
        let mut parser = Parser {
            tokens,
            pos: 0,
            end,
            depth: 0,
        };
        let root = parser.expression()?;
        if parser.pos < parser.tokens.len() {
            return parser.error("unexpected trailing input");
        }
        Ok(Self {
            source: source.to_string(),
            root,
        })
    }

    pub fn eval(&self, x: f64) -> f64 {
        self.root.eval(x)
    }
}

impl fmt::Display for Expression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

/// The sampled x range.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PlotDomain {
    pub start: f64,
    pub end: f64,
    pub step: f64,
}

impl Default for PlotDomain {
    fn default() -> Self {
        Self {
            start: -10.0,
            end: 10.0,
            step: 0.05,
        }
    }
}

impl PlotDomain {
    /// Sample positions, computed by index so the end point is not lost to drift.
    pub fn xs(&self) -> impl Iterator<Item = f64> + '_ {
        let count = ((self.end - self.start) / self.step + 1e-9).floor() as usize + 1;
        (0..count).map(move |i| self.start + i as f64 * self.step)
    }
}

/// One sample; `y` is `None` where the function is undefined or infinite.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PlotPoint {
    pub x: f64,
    pub y: Option<f64>,
}

/// Parses `expression` and evaluates it across `domain`.
pub fn sample(expression: &str, domain: PlotDomain) -> Result<Vec<PlotPoint>, PlotError> {
    let parsed = Expression::parse(expression)?;
    let points: Vec<PlotPoint> = domain
        .xs()
        .map(|x| {
            let y = parsed.eval(x);
            PlotPoint {
                x,
                y: y.is_finite().then_some(y),
            }
        })
        .collect();
    if points.iter().all(|p| p.y.is_none()) {
        return Err(PlotError::NoFiniteValues);
    }
    Ok(points)
}
