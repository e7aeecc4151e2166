//! Parsed expressions for compound parameters and termination conditions.
//!
//! The accepted syntax is a small subset of Julia: numbers, identifiers
//! (including Unicode letters such as `Ω` or `δ`), `+ - * / ^` (with `**` as a
//! synonym for `^`), comparisons, `&&`, `||`, `!`, function calls, and implicit
//! multiplication of a number literal with an immediately following
//! identifier (`2π`, `1im`). `pi`, `π`, and `im` are constants.

use std::{ fmt, sync::OnceLock };
use indexmap::IndexSet;
use num_complex::Complex64 as C64;
use regex::Regex;
use crate::error::{ ObeError, ObeResult };

/// Binary operators, by increasing precedence group.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum BinOp {
    Or,
    And,
    Lt,
    Le,
    Gt,
    Ge,
    Eq,
    Ne,
    Add,
    Sub,
    Mul,
    Div,
    Pow,
}

impl BinOp {
    fn precedence(self) -> u8 {
        match self {
            Self::Or => 1,
            Self::And => 2,
            Self::Lt | Self::Le | Self::Gt | Self::Ge | Self::Eq | Self::Ne => 3,
            Self::Add | Self::Sub => 4,
            Self::Mul | Self::Div => 5,
            Self::Pow => 7,
        }
    }

    fn from_token(tok: &str) -> Option<Self> {
        match tok {
            "||" => Some(Self::Or),
            "&&" => Some(Self::And),
            "<" => Some(Self::Lt),
            "<=" => Some(Self::Le),
            ">" => Some(Self::Gt),
            ">=" => Some(Self::Ge),
            "==" => Some(Self::Eq),
            "!=" => Some(Self::Ne),
            "+" => Some(Self::Add),
            "-" => Some(Self::Sub),
            "*" => Some(Self::Mul),
            "/" => Some(Self::Div),
            "^" | "**" => Some(Self::Pow),
            _ => None,
        }
    }

    fn as_str(self) -> &'static str {
        match self {
            Self::Or => "||",
            Self::And => "&&",
            Self::Lt => "<",
            Self::Le => "<=",
            Self::Gt => ">",
            Self::Ge => ">=",
            Self::Eq => "==",
            Self::Ne => "!=",
            Self::Add => "+",
            Self::Sub => "-",
            Self::Mul => "*",
            Self::Div => "/",
            Self::Pow => "^",
        }
    }
}

/// Precedence of unary `-` and `!`.
const UNARY_PREC: u8 = 6;

/// An expression tree.
#[derive(Clone, Debug, PartialEq)]
pub enum Expr {
    Number(f64),
    /// The imaginary unit `im`.
    Imag,
    Pi,
    Symbol(String),
    /// Element `k` (one-based) of a named array, e.g. `integrator.p[3]`.
    Index(String, usize),
    Neg(Box<Expr>),
    Not(Box<Expr>),
    Binary(BinOp, Box<Expr>, Box<Expr>),
    Call(String, Vec<Expr>),
}

/* Tokenizer ******************************************************************/

#[derive(Clone, Debug, PartialEq)]
enum Tok {
    Number(f64),
    Ident(String),
    Op(String),
    LParen,
    RParen,
    Comma,
}

#[derive(Clone, Debug)]
struct Token {
    tok: Tok,
    start: usize,
    end: usize,
}

fn token_regex() -> &'static Regex {
    static TOKEN: OnceLock<Regex> = OnceLock::new();
    TOKEN.get_or_init(|| {
        Regex::new(concat!(
            r"^(?:",
            r"(?P<num>(?:[0-9]+\.?[0-9]*|\.[0-9]+)(?:[eE][+-]?[0-9]+)?)",
            r"|(?P<ident>[\p{L}_][\p{L}\p{N}_ᶜ′]*)",
            r"|(?P<op>\*\*|<=|>=|==|!=|&&|\|\||[-+*/^<>!])",
            r"|(?P<lparen>\()",
            r"|(?P<rparen>\))",
            r"|(?P<comma>,)",
            r")",
        ))
        .expect("invalid token regex")
    })
}

fn parse_error(input: &str, position: usize, message: impl Into<String>) -> ObeError {
    ObeError::Parse {
        input: input.to_string(),
        position,
        message: message.into(),
    }
}

fn tokenize(input: &str) -> ObeResult<Vec<Token>> {
    let re = token_regex();
    let mut tokens: Vec<Token> = Vec::new();
    let mut pos = 0;
    while pos < input.len() {
        let rest = &input[pos..];
        let trimmed = rest.trim_start();
        if trimmed.len() != rest.len() {
            pos += rest.len() - trimmed.len();
            continue;
        }
        let caps = re.captures(rest)
            .ok_or_else(|| parse_error(input, pos, "unexpected character"))?;
        let len = caps.get(0).map(|m| m.end()).unwrap_or(0);
        if len == 0 { return Err(parse_error(input, pos, "unexpected character")); }
        let tok
            = if let Some(m) = caps.name("num") {
                let x: f64 = m.as_str().parse()
                    .map_err(|_| parse_error(input, pos, "invalid number"))?;
                Tok::Number(x)
            } else if let Some(m) = caps.name("ident") {
                Tok::Ident(m.as_str().to_string())
            } else if let Some(m) = caps.name("op") {
                Tok::Op(m.as_str().to_string())
            } else if caps.name("lparen").is_some() {
                Tok::LParen
            } else if caps.name("rparen").is_some() {
                Tok::RParen
            } else {
                Tok::Comma
            };
        tokens.push(Token { tok, start: pos, end: pos + len });
        pos += len;
    }
    Ok(tokens)
}

/* Parser *********************************************************************/

struct Parser<'a> {
    input: &'a str,
    tokens: Vec<Token>,
    pos: usize,
}

impl<'a> Parser<'a> {
    fn peek(&self) -> Option<&Token> { self.tokens.get(self.pos) }

    fn offset(&self) -> usize {
        self.peek().map(|t| t.start).unwrap_or(self.input.len())
    }

    fn error(&self, message: impl Into<String>) -> ObeError {
        parse_error(self.input, self.offset(), message)
    }

    fn next(&mut self) -> Option<Token> {
        let t = self.tokens.get(self.pos).cloned();
        if t.is_some() { self.pos += 1; }
        t
    }

    fn peek_binop(&self) -> Option<BinOp> {
        match self.peek() {
            Some(Token { tok: Tok::Op(op), .. }) => BinOp::from_token(op),
            _ => None,
        }
    }

    fn parse_binary(&mut self, min_prec: u8) -> ObeResult<Expr> {
        let mut lhs = self.parse_unary()?;
        while let Some(op) = self.peek_binop() {
            let prec = op.precedence();
            if prec < min_prec || op == BinOp::Pow { break; }
            self.next();
            let rhs = self.parse_binary(prec + 1)?;
            lhs = Expr::Binary(op, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_unary(&mut self) -> ObeResult<Expr> {
        let op: Option<String>
            = match self.peek() {
                Some(Token { tok: Tok::Op(op), .. }) => Some(op.clone()),
                _ => None,
            };
        match op.as_deref() {
            Some("-") => {
                self.next();
                Ok(Expr::Neg(Box::new(self.parse_unary()?)))
            },
            Some("+") => {
                self.next();
                self.parse_unary()
            },
            Some("!") => {
                self.next();
                Ok(Expr::Not(Box::new(self.parse_unary()?)))
            },
            _ => self.parse_power(),
        }
    }

    /// Exponentiation, and implicit multiplication of a number literal by an
    /// immediately following identifier (`2x^2` is `2*(x^2)`).
    fn parse_power(&mut self) -> ObeResult<Expr> {
        let start = self.pos;
        let base = self.parse_primary()?;
        if let Expr::Number(_) = base {
            let end = self.tokens[start].end;
            let adjacent = matches!(
                self.peek(),
                Some(Token { tok: Tok::Ident(_), start: s, .. }) if *s == end
            );
            if adjacent {
                let rhs = self.parse_power()?;
                return Ok(Expr::Binary(BinOp::Mul, Box::new(base), Box::new(rhs)));
            }
        }
        if self.peek_binop() == Some(BinOp::Pow) {
            self.next();
            // right-associative; the exponent may carry a unary sign
            let exp = self.parse_unary()?;
            return Ok(Expr::Binary(BinOp::Pow, Box::new(base), Box::new(exp)));
        }
        Ok(base)
    }

    fn parse_primary(&mut self) -> ObeResult<Expr> {
        let Some(token) = self.next() else {
            return Err(self.error("unexpected end of input"));
        };
        match token.tok {
            Tok::Number(x) => Ok(Expr::Number(x)),
            Tok::Ident(name) => {
                if matches!(self.peek(), Some(Token { tok: Tok::LParen, .. })) {
                    self.next();
                    let mut args: Vec<Expr> = Vec::new();
                    if !matches!(self.peek(), Some(Token { tok: Tok::RParen, .. })) {
                        loop {
                            args.push(self.parse_binary(1)?);
                            match self.next() {
                                Some(Token { tok: Tok::Comma, .. }) => { continue; },
                                Some(Token { tok: Tok::RParen, .. }) => { break; },
                                _ => {
                                    return Err(parse_error(
                                        self.input, token.start,
                                        format!("unclosed call to `{name}`"),
                                    ));
                                },
                            }
                        }
                    } else {
                        self.next();
                    }
                    return Ok(Expr::Call(name, args));
                }
                Ok(match name.as_str() {
                    "pi" | "π" => Expr::Pi,
                    "im" => Expr::Imag,
                    _ => Expr::Symbol(name),
                })
            },
            Tok::LParen => {
                let inner = self.parse_binary(1)?;
                match self.next() {
                    Some(Token { tok: Tok::RParen, .. }) => Ok(inner),
                    _ => Err(parse_error(self.input, token.start, "unbalanced parenthesis")),
                }
            },
            Tok::RParen | Tok::Comma | Tok::Op(_) => {
                Err(parse_error(self.input, token.start, "expected an operand"))
            },
        }
    }
}

/* Evaluation *****************************************************************/

fn truth(b: bool) -> C64 { C64::from(if b { 1.0 } else { 0.0 }) }

fn call_function(name: &str, args: &[C64]) -> ObeResult<C64> {
    let unary = |f: fn(C64) -> C64| -> ObeResult<C64> {
        match args {
            [x] => Ok(f(*x)),
            _ => Err(ObeError::Evaluation(
                format!("`{name}` takes 1 argument, got {}", args.len()))),
        }
    };
    match name {
        "sin" => unary(|x| x.sin()),
        "cos" => unary(|x| x.cos()),
        "tan" => unary(|x| x.tan()),
        "sinh" => unary(|x| x.sinh()),
        "cosh" => unary(|x| x.cosh()),
        "tanh" => unary(|x| x.tanh()),
        "exp" => unary(|x| x.exp()),
        "log" => unary(|x| x.ln()),
        "sqrt" => unary(|x| x.sqrt()),
        "abs" => unary(|x| C64::from(x.norm())),
        "real" => unary(|x| C64::from(x.re)),
        "imag" => unary(|x| C64::from(x.im)),
        "conj" => unary(|x| x.conj()),
        "atan" => unary(|x| x.atan()),
        "min" | "max" => match args {
            [a, b] => {
                let pick_a = if name == "min" { a.re <= b.re } else { a.re >= b.re };
                Ok(if pick_a { *a } else { *b })
            },
            _ => Err(ObeError::Evaluation(
                format!("`{name}` takes 2 arguments, got {}", args.len()))),
        },
        _ => Err(ObeError::Evaluation(format!("unknown function `{name}`"))),
    }
}

impl Expr {
    /// Parse an expression.
    pub fn parse(input: &str) -> ObeResult<Self> {
        let tokens = tokenize(input)?;
        if tokens.is_empty() { return Err(parse_error(input, 0, "empty expression")); }
        let mut parser = Parser { input, tokens, pos: 0 };
        let expr = parser.parse_binary(1)?;
        if parser.pos < parser.tokens.len() {
            return Err(parser.error("unexpected trailing input"));
        }
        Ok(expr)
    }

    pub fn symbol<T>(name: T) -> Self
    where T: Into<String>
    {
        Self::Symbol(name.into())
    }

    /// All free symbols, in order of first appearance. Function names,
    /// constants, and array indexing are not free symbols.
    pub fn free_symbols(&self) -> IndexSet<String> {
        let mut acc: IndexSet<String> = IndexSet::new();
        self.collect_symbols(&mut acc);
        acc
    }

    fn collect_symbols(&self, acc: &mut IndexSet<String>) {
        match self {
            Self::Symbol(name) => { acc.insert(name.clone()); },
            Self::Neg(e) | Self::Not(e) => e.collect_symbols(acc),
            Self::Binary(_, a, b) => {
                a.collect_symbols(acc);
                b.collect_symbols(acc);
            },
            Self::Call(_, args) => {
                args.iter().for_each(|a| a.collect_symbols(acc));
            },
            Self::Number(_) | Self::Imag | Self::Pi | Self::Index(..) => { },
        }
    }

    /// Replace symbols for which `f` returns a value.
    pub fn substitute<F>(&self, f: &F) -> Self
    where F: Fn(&str) -> Option<Expr>
    {
        match self {
            Self::Symbol(name) => f(name).unwrap_or_else(|| self.clone()),
            Self::Neg(e) => Self::Neg(Box::new(e.substitute(f))),
            Self::Not(e) => Self::Not(Box::new(e.substitute(f))),
            Self::Binary(op, a, b)
                => Self::Binary(*op, Box::new(a.substitute(f)), Box::new(b.substitute(f))),
            Self::Call(name, args)
                => Self::Call(name.clone(), args.iter().map(|a| a.substitute(f)).collect()),
            Self::Number(_) | Self::Imag | Self::Pi | Self::Index(..) => self.clone(),
        }
    }

    /// Evaluate numerically, resolving free symbols through `env`.
    ///
    /// Comparisons act on real parts and, like logical operators, produce `1`
    /// or `0`.
    pub fn eval<F>(&self, env: &F) -> ObeResult<C64>
    where F: Fn(&str) -> Option<C64>
    {
        match self {
            Self::Number(x) => Ok(C64::from(*x)),
            Self::Imag => Ok(C64::i()),
            Self::Pi => Ok(C64::from(std::f64::consts::PI)),
            Self::Symbol(name) => env(name)
                .ok_or_else(|| ObeError::Evaluation(format!("no value for `{name}`"))),
            Self::Index(name, k) => Err(ObeError::Evaluation(
                format!("cannot evaluate array element {name}[{k}]"))),
            Self::Neg(e) => Ok(-e.eval(env)?),
            Self::Not(e) => Ok(truth(e.eval(env)?.re == 0.0)),
            Self::Binary(op, a, b) => {
                let x = a.eval(env)?;
                match op {
                    BinOp::And if x.re == 0.0 => return Ok(truth(false)),
                    BinOp::Or if x.re != 0.0 => return Ok(truth(true)),
                    _ => { },
                }
                let y = b.eval(env)?;
                Ok(match op {
                    BinOp::Add => x + y,
                    BinOp::Sub => x - y,
                    BinOp::Mul => x * y,
                    BinOp::Div => x / y,
                    BinOp::Pow => {
                        if y.im == 0.0 && y.re.fract() == 0.0 && x.im == 0.0 {
                            C64::from(x.re.powf(y.re))
                        } else {
                            x.powc(y)
                        }
                    },
                    BinOp::Lt => truth(x.re < y.re),
                    BinOp::Le => truth(x.re <= y.re),
                    BinOp::Gt => truth(x.re > y.re),
                    BinOp::Ge => truth(x.re >= y.re),
                    BinOp::Eq => truth(x == y),
                    BinOp::Ne => truth(x != y),
                    BinOp::And | BinOp::Or => truth(y.re != 0.0),
                })
            },
            Self::Call(name, args) => {
                let vals: Vec<C64>
                    = args.iter().map(|a| a.eval(env)).collect::<ObeResult<_>>()?;
                call_function(name, &vals)
            },
        }
    }

    fn precedence(&self) -> u8 {
        match self {
            Self::Binary(op, ..) => op.precedence(),
            Self::Neg(_) | Self::Not(_) => UNARY_PREC,
            Self::Number(x) if *x < 0.0 => UNARY_PREC,
            _ => u8::MAX,
        }
    }
}

fn fmt_number(x: f64) -> String {
    if x.is_finite() { format!("{x:?}") } else if x.is_nan() { "NaN".into() }
    else if x > 0.0 { "Inf".into() } else { "-Inf".into() }
}

fn paren(e: &Expr, f: &mut fmt::Formatter<'_>, wrap: bool) -> fmt::Result {
    if wrap { write!(f, "({e})") } else { write!(f, "{e}") }
}

/// Renders valid Julia source.
impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Number(x) => write!(f, "{}", fmt_number(*x)),
            Self::Imag => write!(f, "im"),
            Self::Pi => write!(f, "π"),
            Self::Symbol(name) => write!(f, "{name}"),
            Self::Index(name, k) => write!(f, "{name}[{k}]"),
            Self::Neg(e) => {
                write!(f, "-")?;
                paren(e, f, e.precedence() <= UNARY_PREC)
            },
            Self::Not(e) => {
                write!(f, "!")?;
                paren(e, f, e.precedence() <= UNARY_PREC)
            },
            Self::Binary(op, a, b) => {
                let p = op.precedence();
                let (wrap_a, wrap_b)
                    = if *op == BinOp::Pow {
                        (a.precedence() <= p, b.precedence() < p)
                    } else {
                        let right_strict = matches!(op, BinOp::Sub | BinOp::Div)
                            || p == 3;
                        (
                            a.precedence() < p,
                            if right_strict { b.precedence() <= p } else { b.precedence() < p },
                        )
                    };
                paren(a, f, wrap_a)?;
                match op {
                    BinOp::Mul | BinOp::Div | BinOp::Pow => write!(f, "{}", op.as_str())?,
                    _ => write!(f, " {} ", op.as_str())?,
                }
                paren(b, f, wrap_b)
            },
            Self::Call(name, args) => {
                write!(f, "{name}(")?;
                for (k, a) in args.iter().enumerate() {
                    if k > 0 { write!(f, ", ")?; }
                    write!(f, "{a}")?;
                }
                write!(f, ")")
            },
        }
    }
}
