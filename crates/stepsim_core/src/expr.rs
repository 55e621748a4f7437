//! Expression engine: tokenizer, recursive-descent parser, bytecode compiler
//! and a stack VM that evaluates compiled expressions against an explicit
//! [`Environment`].
//!
//! The grammar is deliberately closed. Anything outside the operators, names
//! and functions listed here is rejected, so model text can never reach the
//! host beyond numeric evaluation.

use crate::traits::Scalar;
use std::collections::HashMap;
use thiserror::Error;

/// Names bound per step by the simulator.
pub const BINDING_NAMES: [&str; 5] = ["i", "t", "dt", "n_eps", "u_eps"];

/// Named numeric constants available in every environment.
pub const CONSTANT_NAMES: [&str; 4] = ["pi", "e", "inf", "nan"];

/// Every function name the compiler accepts (aliases included).
pub const FUNCTION_NAMES: [&str; 38] = [
    "sin", "cos", "tan", "arcsin", "asin", "arccos", "acos", "arctan", "atan", "sinh", "cosh",
    "tanh", "exp", "log", "ln", "log10", "log2", "sqrt", "abs", "absolute", "fabs", "floor",
    "ceil", "round", "sign", "arctan2", "atan2", "pow", "power", "minimum", "maximum", "hypot",
    "min", "max", "where", "clip", "square", "trunc",
];

/// Returns true for names a model may not assign to.
pub fn is_reserved(name: &str) -> bool {
    BINDING_NAMES.contains(&name) || CONSTANT_NAMES.contains(&name)
}

/// Values injected by the simulator for the duration of one step.
#[derive(Debug, Clone, Copy)]
pub enum Binding {
    /// `i`: step index.
    Index,
    /// `t`: time value of the step.
    Time,
    /// `dt`: step size.
    StepSize,
    /// `n_eps`: standard normal draw.
    Normal,
    /// `u_eps`: uniform [0, 1) draw.
    Uniform,
}

impl Binding {
    fn lookup(name: &str) -> Option<Self> {
        match name {
            "i" => Some(Binding::Index),
            "t" => Some(Binding::Time),
            "dt" => Some(Binding::StepSize),
            "n_eps" => Some(Binding::Normal),
            "u_eps" => Some(Binding::Uniform),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Binding::Index => "i",
            Binding::Time => "t",
            Binding::StepSize => "dt",
            Binding::Normal => "n_eps",
            Binding::Uniform => "u_eps",
        }
    }
}

fn constant(name: &str) -> Option<f64> {
    match name {
        "pi" => Some(std::f64::consts::PI),
        "e" => Some(std::f64::consts::E),
        "inf" => Some(f64::INFINITY),
        "nan" => Some(f64::NAN),
        _ => None,
    }
}

/// Built-in functions of the expression grammar.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Func {
    Sin,
    Cos,
    Tan,
    Asin,
    Acos,
    Atan,
    Sinh,
    Cosh,
    Tanh,
    Exp,
    Ln,
    Log10,
    Log2,
    Sqrt,
    Abs,
    Floor,
    Ceil,
    Round,
    Sign,
    Square,
    Trunc,
    Atan2,
    Pow,
    Minimum,
    Maximum,
    Hypot,
    Min,
    Max,
    Where,
    Clip,
}

#[derive(Debug, Clone, Copy)]
enum Arity {
    Exactly(usize),
    AtLeast(usize),
}

impl Func {
    fn lookup(name: &str) -> Option<Self> {
        let func = match name {
            "sin" => Func::Sin,
            "cos" => Func::Cos,
            "tan" => Func::Tan,
            "arcsin" | "asin" => Func::Asin,
            "arccos" | "acos" => Func::Acos,
            "arctan" | "atan" => Func::Atan,
            "sinh" => Func::Sinh,
            "cosh" => Func::Cosh,
            "tanh" => Func::Tanh,
            "exp" => Func::Exp,
            "log" | "ln" => Func::Ln,
            "log10" => Func::Log10,
            "log2" => Func::Log2,
            "sqrt" => Func::Sqrt,
            "abs" | "absolute" | "fabs" => Func::Abs,
            "floor" => Func::Floor,
            "ceil" => Func::Ceil,
            "round" => Func::Round,
            "sign" => Func::Sign,
            "square" => Func::Square,
            "trunc" => Func::Trunc,
            "arctan2" | "atan2" => Func::Atan2,
            "pow" | "power" => Func::Pow,
            "minimum" => Func::Minimum,
            "maximum" => Func::Maximum,
            "hypot" => Func::Hypot,
            "min" => Func::Min,
            "max" => Func::Max,
            "where" => Func::Where,
            "clip" => Func::Clip,
            _ => return None,
        };
        Some(func)
    }

    fn arity(self) -> Arity {
        match self {
            Func::Atan2 | Func::Pow | Func::Minimum | Func::Maximum | Func::Hypot => {
                Arity::Exactly(2)
            }
            Func::Min | Func::Max => Arity::AtLeast(1),
            Func::Where | Func::Clip => Arity::Exactly(3),
            _ => Arity::Exactly(1),
        }
    }

    fn apply<T: Scalar>(self, args: &[T]) -> T {
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
            Func::Exp => a.exp(),
            Func::Ln => a.ln(),
            Func::Log10 => a.log10(),
            Func::Log2 => a.log2(),
            Func::Sqrt => a.sqrt(),
            Func::Abs => a.abs(),
            Func::Floor => a.floor(),
            Func::Ceil => a.ceil(),
            Func::Round => round_half_even(a),
            Func::Sign => sign(a),
            Func::Square => a * a,
            Func::Trunc => a.trunc(),
            Func::Atan2 => a.atan2(args[1]),
            Func::Pow => a.powf(args[1]),
            Func::Minimum => nan_min(a, args[1]),
            Func::Maximum => nan_max(a, args[1]),
            Func::Hypot => a.hypot(args[1]),
            Func::Min => args[1..].iter().fold(a, |acc, &v| nan_min(acc, v)),
            Func::Max => args[1..].iter().fold(a, |acc, &v| nan_max(acc, v)),
            Func::Where => {
                if truthy(a) {
                    args[1]
                } else {
                    args[2]
                }
            }
            Func::Clip => nan_min(nan_max(a, args[1]), args[2]),
        }
    }
}

fn truthy<T: Scalar>(value: T) -> bool {
    value != T::zero()
}

fn from_bool<T: Scalar>(value: bool) -> T {
    if value {
        T::one()
    } else {
        T::zero()
    }
}

fn constant_of<T: Scalar>(value: f64) -> T {
    T::from_f64(value).unwrap_or_else(T::nan)
}

// Ties go to the even neighbour.
fn round_half_even<T: Scalar>(value: T) -> T {
    let rounded = value.round();
    let half = constant_of::<T>(0.5);
    if (value - value.trunc()).abs() == half {
        let two = constant_of::<T>(2.0);
        (value / two).round() * two
    } else {
        rounded
    }
}

fn sign<T: Scalar>(value: T) -> T {
    if value.is_nan() || value == T::zero() {
        value
    } else {
        value.signum()
    }
}

fn nan_min<T: Scalar>(a: T, b: T) -> T {
    if a.is_nan() || b.is_nan() {
        T::nan()
    } else {
        a.min(b)
    }
}

fn nan_max<T: Scalar>(a: T, b: T) -> T {
    if a.is_nan() || b.is_nan() {
        T::nan()
    } else {
        a.max(b)
    }
}

/// OpCodes for the Stack-based Virtual Machine.
#[derive(Debug, Clone, Copy)]
pub enum OpCode {
    /// Pushes a constant value onto the stack.
    LoadConst(f64),
    /// Pushes the current value of a state variable (by index).
    /// Indices follow the variable order handed to the [`Compiler`].
    LoadVar(usize),
    /// Pushes a per-step binding.
    LoadBinding(Binding),
    /// Pops a step index, pushes the recorded history value of a variable.
    LoadHistory(usize),
    /// Fails evaluation: the name (by index into `Bytecode::names`) is not
    /// defined in any environment.
    Unresolved(usize),
    Add,
    Sub,
    Mul,
    Div,
    FloorDiv,
    Rem,
    Pow,
    Neg,
    Lt,
    Le,
    Gt,
    Ge,
    Eq,
    Ne,
    /// Pops `argc` arguments, pushes the function result.
    Call(Func, usize),
}

/// A compiled expression.
#[derive(Debug, Clone, Default)]
pub struct Bytecode {
    pub ops: Vec<OpCode>,
    /// Names that did not resolve at compile time.
    pub names: Vec<String>,
}

impl Bytecode {
    pub fn new() -> Self {
        Self::default()
    }

    /// Names referenced by the expression that no environment can provide.
    pub fn unresolved_names(&self) -> &[String] {
        &self.names
    }
}

/// Failure raised by the VM while evaluating one expression.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum EvalError {
    #[error("name '{0}' is not defined")]
    UnknownName(String),
    #[error("variable '{0}' has no value yet")]
    Unassigned(String),
    #[error("'{0}' is only bound while stepping")]
    Unbound(&'static str),
    #[error("'{name}[{index}]' does not refer to a computed step")]
    HistoryIndex { name: String, index: f64 },
    #[error("expression stack underflow")]
    StackUnderflow,
}

/// Values bound to `i`, `t`, `dt`, `n_eps` and `u_eps` for one evaluation.
#[derive(Debug, Clone, Copy)]
pub struct StepBindings<T> {
    pub index: usize,
    pub time: T,
    pub dt: T,
    pub normal: T,
    pub uniform: T,
}

/// Read access to the history written so far in a run.
///
/// A slot `(var, k)` is readable when `k < step`, or when `k == step` and
/// `var` has already been computed in the current step (`var < computed`).
/// Any other slot, including future steps, is an error rather than the
/// zero a preallocated buffer would hold.
#[derive(Debug, Clone, Copy)]
pub struct HistoryView<'a, T> {
    pub columns: &'a [Vec<T>],
    pub step: usize,
    pub computed: usize,
}

impl<T: Scalar> HistoryView<'_, T> {
    fn read(&self, var: usize, index: T) -> Option<T> {
        let rounded = index.round();
        if rounded < T::zero() {
            return None;
        }
        let k = rounded.to_usize()?;
        if k < self.step || (k == self.step && var < self.computed) {
            self.columns.get(var)?.get(k).copied()
        } else {
            None
        }
    }
}

/// Evaluation environment for one expression.
///
/// `values[v]` is the current value of variable `v`, `None` while the
/// variable is undefined. Step bindings and history are only present while a
/// run is stepping.
#[derive(Debug, Clone, Copy)]
pub struct Environment<'a, T> {
    names: &'a [String],
    values: &'a [Option<T>],
    bindings: Option<StepBindings<T>>,
    history: Option<HistoryView<'a, T>>,
}

impl<'a, T: Scalar> Environment<'a, T> {
    pub fn new(names: &'a [String], values: &'a [Option<T>]) -> Self {
        Self {
            names,
            values,
            bindings: None,
            history: None,
        }
    }

    pub fn with_bindings(mut self, bindings: StepBindings<T>) -> Self {
        self.bindings = Some(bindings);
        self
    }

    pub fn with_history(mut self, history: HistoryView<'a, T>) -> Self {
        self.history = Some(history);
        self
    }

    fn name(&self, idx: usize) -> String {
        self.names
            .get(idx)
            .cloned()
            .unwrap_or_else(|| format!("#{idx}"))
    }

    fn var(&self, idx: usize) -> Result<T, EvalError> {
        self.values
            .get(idx)
            .copied()
            .flatten()
            .ok_or_else(|| EvalError::Unassigned(self.name(idx)))
    }

    fn binding(&self, binding: Binding) -> Result<T, EvalError> {
        let bindings = self.bindings.ok_or(EvalError::Unbound(binding.name()))?;
        Ok(match binding {
            Binding::Index => T::from_usize(bindings.index).unwrap_or_else(T::nan),
            Binding::Time => bindings.time,
            Binding::StepSize => bindings.dt,
            Binding::Normal => bindings.normal,
            Binding::Uniform => bindings.uniform,
        })
    }

    fn history(&self, var: usize, index: T) -> Result<T, EvalError> {
        let out_of_range = || EvalError::HistoryIndex {
            name: self.name(var),
            index: index.to_f64().unwrap_or(f64::NAN),
        };
        let history = self.history.ok_or_else(out_of_range)?;
        history.read(var, index).ok_or_else(out_of_range)
    }
}

/// Stack-based Virtual Machine for evaluating compiled expressions.
///
/// The VM is stateless; `execute` takes all necessary context:
/// - `bytecode`: Instructions to run.
/// - `env`: Variables, step bindings and history visible to the expression.
/// - `stack`: A mutable buffer for intermediate computations.
pub struct VM;

impl VM {
    pub fn execute<T: Scalar>(
        bytecode: &Bytecode,
        env: &Environment<'_, T>,
        stack: &mut Vec<T>,
    ) -> Result<T, EvalError> {
        stack.clear();

        for op in &bytecode.ops {
            match *op {
                OpCode::LoadConst(val) => stack.push(constant_of(val)),
                OpCode::LoadVar(idx) => stack.push(env.var(idx)?),
                OpCode::LoadBinding(binding) => stack.push(env.binding(binding)?),
                OpCode::LoadHistory(idx) => {
                    let index = pop(stack)?;
                    stack.push(env.history(idx, index)?);
                }
                OpCode::Unresolved(idx) => {
                    let name = bytecode.names.get(idx).cloned().unwrap_or_default();
                    return Err(EvalError::UnknownName(name));
                }
                OpCode::Neg => {
                    let a = pop(stack)?;
                    stack.push(-a);
                }
                OpCode::Call(func, argc) => {
                    if argc == 0 || stack.len() < argc {
                        return Err(EvalError::StackUnderflow);
                    }
                    let base = stack.len() - argc;
                    let result = func.apply(&stack[base..]);
                    stack.truncate(base);
                    stack.push(result);
                }
                binary => {
                    let b = pop(stack)?;
                    let a = pop(stack)?;
                    stack.push(apply_binary(binary, a, b));
                }
            }
        }

        pop(stack)
    }
}

fn pop<T>(stack: &mut Vec<T>) -> Result<T, EvalError> {
    stack.pop().ok_or(EvalError::StackUnderflow)
}

fn apply_binary<T: Scalar>(op: OpCode, a: T, b: T) -> T {
    match op {
        OpCode::Add => a + b,
        OpCode::Sub => a - b,
        OpCode::Mul => a * b,
        OpCode::Div => a / b,
        OpCode::FloorDiv => (a / b).floor(),
        // Floored modulo: the result takes the sign of the divisor.
        OpCode::Rem => a - b * (a / b).floor(),
        OpCode::Pow => a.powf(b),
        OpCode::Lt => from_bool(a < b),
        OpCode::Le => from_bool(a <= b),
        OpCode::Gt => from_bool(a > b),
        OpCode::Ge => from_bool(a >= b),
        OpCode::Eq => from_bool(a == b),
        OpCode::Ne => from_bool(a != b),
        _ => T::nan(),
    }
}

// --- AST & Parser ---

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    FloorDiv,
    Rem,
    Pow,
    Lt,
    Le,
    Gt,
    Ge,
    Eq,
    Ne,
}

impl BinaryOp {
    fn opcode(self) -> OpCode {
        match self {
            BinaryOp::Add => OpCode::Add,
            BinaryOp::Sub => OpCode::Sub,
            BinaryOp::Mul => OpCode::Mul,
            BinaryOp::Div => OpCode::Div,
            BinaryOp::FloorDiv => OpCode::FloorDiv,
            BinaryOp::Rem => OpCode::Rem,
            BinaryOp::Pow => OpCode::Pow,
            BinaryOp::Lt => OpCode::Lt,
            BinaryOp::Le => OpCode::Le,
            BinaryOp::Gt => OpCode::Gt,
            BinaryOp::Ge => OpCode::Ge,
            BinaryOp::Eq => OpCode::Eq,
            BinaryOp::Ne => OpCode::Ne,
        }
    }
}

/// Abstract Syntax Tree nodes for expressions.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Number(f64),
    Variable(String),
    /// `name[index]`: history lookup.
    Index(String, Box<Expr>),
    Binary(Box<Expr>, BinaryOp, Box<Expr>),
    Neg(Box<Expr>),
    Call(String, Vec<Expr>),
}

/// Compiles an AST (`Expr`) into `Bytecode`.
/// Resolves variable names to indices, binding names to [`Binding`]s and
/// constants to literals. Anything else becomes an [`OpCode::Unresolved`].
pub struct Compiler {
    pub var_map: HashMap<String, usize>,
}

impl Compiler {
    pub fn new(var_names: &[String]) -> Self {
        let var_map = var_names
            .iter()
            .enumerate()
            .map(|(i, name)| (name.clone(), i))
            .collect();
        Self { var_map }
    }

    pub fn compile(&self, expr: &Expr) -> Result<Bytecode, String> {
        let mut code = Bytecode::new();
        self.compile_recursive(expr, &mut code)?;
        Ok(code)
    }

    fn compile_recursive(&self, expr: &Expr, code: &mut Bytecode) -> Result<(), String> {
        match expr {
            Expr::Number(n) => code.ops.push(OpCode::LoadConst(*n)),
            Expr::Variable(name) => {
                let op = if let Some(&idx) = self.var_map.get(name) {
                    OpCode::LoadVar(idx)
                } else if let Some(binding) = Binding::lookup(name) {
                    OpCode::LoadBinding(binding)
                } else if let Some(value) = constant(name) {
                    OpCode::LoadConst(value)
                } else {
                    unresolved(name, code)
                };
                code.ops.push(op);
            }
            Expr::Index(name, index) => {
                self.compile_recursive(index, code)?;
                let op = match self.var_map.get(name) {
                    Some(&idx) => OpCode::LoadHistory(idx),
                    None => unresolved(name, code),
                };
                code.ops.push(op);
            }
            Expr::Binary(left, op, right) => {
                self.compile_recursive(left, code)?;
                self.compile_recursive(right, code)?;
                code.ops.push(op.opcode());
            }
            Expr::Neg(operand) => {
                self.compile_recursive(operand, code)?;
                code.ops.push(OpCode::Neg);
            }
            Expr::Call(name, args) => {
                let func = Func::lookup(name).ok_or_else(|| format!("Unknown function: {name}"))?;
                let argc = args.len();
                let accepted = match func.arity() {
                    Arity::Exactly(n) => argc == n,
                    Arity::AtLeast(n) => argc >= n,
                };
                if !accepted {
                    return Err(format!("Function {name} does not take {argc} argument(s)"));
                }
                for arg in args {
                    self.compile_recursive(arg, code)?;
                }
                code.ops.push(OpCode::Call(func, argc));
            }
        }
        Ok(())
    }
}

fn unresolved(name: &str, code: &mut Bytecode) -> OpCode {
    let idx = match code.names.iter().position(|n| n == name) {
        Some(idx) => idx,
        None => {
            code.names.push(name.to_string());
            code.names.len() - 1
        }
    };
    OpCode::Unresolved(idx)
}

// --- Parser ---

/// Parses a string expression into an AST.
pub fn parse(input: &str) -> Result<Expr, String> {
    let tokens = tokenize(input)?;
    let mut parser = Parser { tokens, pos: 0 };
    let expr = parser.parse_expression()?;
    match parser.peek() {
        None => Ok(expr),
        Some(token) => Err(format!("Unexpected token {token:?}")),
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Number(f64),
    Identifier(String),
    Plus,
    Minus,
    Star,
    StarStar,
    Slash,
    SlashSlash,
    Percent,
    Caret,
    LParen,
    RParen,
    LBracket,
    RBracket,
    Comma,
    Lt,
    Le,
    Gt,
    Ge,
    EqEq,
    Ne,
}

fn tokenize(input: &str) -> Result<Vec<Token>, String> {
    let mut tokens = Vec::new();
    let mut chars = input.chars().peekable();

    while let Some(&c) = chars.peek() {
        if c.is_whitespace() {
            chars.next();
        } else if c.is_ascii_digit() || c == '.' {
            let mut num_str = String::new();
            while let Some(&d) = chars.peek() {
                if d.is_ascii_digit() || d == '.' {
                    num_str.push(d);
                    chars.next();
                } else if (d == 'e' || d == 'E') && !num_str.contains(['e', 'E']) {
                    // Only an exponent if digits (optionally signed) follow.
                    let mut lookahead = chars.clone();
                    lookahead.next();
                    let mut exponent = String::from(d);
                    if let Some(&sign) = lookahead.peek() {
                        if sign == '+' || sign == '-' {
                            exponent.push(sign);
                            lookahead.next();
                        }
                    }
                    if !lookahead.peek().is_some_and(|c| c.is_ascii_digit()) {
                        break;
                    }
                    num_str.push_str(&exponent);
                    chars = lookahead;
                } else {
                    break;
                }
            }
            let value = num_str
                .parse()
                .map_err(|_| format!("Invalid number literal '{num_str}'"))?;
            tokens.push(Token::Number(value));
        } else if c.is_alphabetic() || c == '_' {
            let mut ident = String::new();
            while let Some(&d) = chars.peek() {
                if d.is_alphanumeric() || d == '_' {
                    ident.push(d);
                    chars.next();
                } else {
                    break;
                }
            }
            tokens.push(Token::Identifier(ident));
        } else {
            chars.next();
            let token = match c {
                '+' => Token::Plus,
                '-' => Token::Minus,
                '*' if chars.next_if_eq(&'*').is_some() => Token::StarStar,
                '*' => Token::Star,
                '/' if chars.next_if_eq(&'/').is_some() => Token::SlashSlash,
                '/' => Token::Slash,
                '%' => Token::Percent,
                '^' => Token::Caret,
                '(' => Token::LParen,
                ')' => Token::RParen,
                '[' => Token::LBracket,
                ']' => Token::RBracket,
                ',' => Token::Comma,
                '<' if chars.next_if_eq(&'=').is_some() => Token::Le,
                '<' => Token::Lt,
                '>' if chars.next_if_eq(&'=').is_some() => Token::Ge,
                '>' => Token::Gt,
                '=' if chars.next_if_eq(&'=').is_some() => Token::EqEq,
                '!' if chars.next_if_eq(&'=').is_some() => Token::Ne,
                other => return Err(format!("Unexpected character '{other}'")),
            };
            tokens.push(token);
        }
    }
    Ok(tokens)
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> Option<Token> {
        self.tokens.get(self.pos).cloned()
    }

    fn consume(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    fn expect(&mut self, expected: Token) -> Result<(), String> {
        match self.consume() {
            Some(token) if token == expected => Ok(()),
            Some(token) => Err(format!("Expected {expected:?}, found {token:?}")),
            None => Err(format!("Expected {expected:?}, found end of input")),
        }
    }

    fn parse_expression(&mut self) -> Result<Expr, String> {
        self.parse_comparison()
    }

    fn parse_comparison(&mut self) -> Result<Expr, String> {
        let left = self.parse_term()?;
        let Some(op) = self.peek().and_then(|t| comparison_op(&t)) else {
            return Ok(left);
        };
        self.consume();
        let right = self.parse_term()?;
        if self.peek().and_then(|t| comparison_op(&t)).is_some() {
            return Err("Chained comparisons are not supported".to_string());
        }
        Ok(Expr::Binary(Box::new(left), op, Box::new(right)))
    }

    fn parse_term(&mut self) -> Result<Expr, String> {
        let mut left = self.parse_factor()?;

        while let Some(token) = self.peek() {
            let op = match token {
                Token::Plus => BinaryOp::Add,
                Token::Minus => BinaryOp::Sub,
                _ => break,
            };
            self.consume();
            let right = self.parse_factor()?;
            left = Expr::Binary(Box::new(left), op, Box::new(right));
        }
        Ok(left)
    }

    fn parse_factor(&mut self) -> Result<Expr, String> {
        let mut left = self.parse_unary()?;

        while let Some(token) = self.peek() {
            let op = match token {
                Token::Star => BinaryOp::Mul,
                Token::Slash => BinaryOp::Div,
                Token::SlashSlash => BinaryOp::FloorDiv,
                Token::Percent => BinaryOp::Rem,
                _ => break,
            };
            self.consume();
            let right = self.parse_unary()?;
            left = Expr::Binary(Box::new(left), op, Box::new(right));
        }
        Ok(left)
    }

    fn parse_unary(&mut self) -> Result<Expr, String> {
        match self.peek() {
            Some(Token::Minus) => {
                self.consume();
                let expr = self.parse_unary()?;
                Ok(Expr::Neg(Box::new(expr)))
            }
            Some(Token::Plus) => {
                self.consume();
                self.parse_unary()
            }
            _ => self.parse_power(),
        }
    }

    // Right associative; the exponent may carry its own sign (2**-1).
    fn parse_power(&mut self) -> Result<Expr, String> {
        let base = self.parse_primary()?;
        match self.peek() {
            Some(Token::StarStar) | Some(Token::Caret) => {
                self.consume();
                let exponent = self.parse_unary()?;
                Ok(Expr::Binary(Box::new(base), BinaryOp::Pow, Box::new(exponent)))
            }
            _ => Ok(base),
        }
    }

    fn parse_primary(&mut self) -> Result<Expr, String> {
        match self.consume() {
            Some(Token::Number(n)) => Ok(Expr::Number(n)),
            Some(Token::Identifier(name)) => match self.peek() {
                Some(Token::LParen) => {
                    self.consume();
                    let args = self.parse_arguments()?;
                    Ok(Expr::Call(name, args))
                }
                Some(Token::LBracket) => {
                    self.consume();
                    let index = self.parse_expression()?;
                    self.expect(Token::RBracket)?;
                    Ok(Expr::Index(name, Box::new(index)))
                }
                _ => Ok(Expr::Variable(name)),
            },
            Some(Token::LParen) => {
                let expr = self.parse_expression()?;
                self.expect(Token::RParen)?;
                Ok(expr)
            }
            Some(token) => Err(format!("Unexpected token {token:?}")),
            None => Err("Unexpected end of expression".to_string()),
        }
    }

    fn parse_arguments(&mut self) -> Result<Vec<Expr>, String> {
        let mut args = Vec::new();
        if let Some(Token::RParen) = self.peek() {
            self.consume();
            return Ok(args);
        }
        loop {
            args.push(self.parse_expression()?);
            match self.consume() {
                Some(Token::Comma) => continue,
                Some(Token::RParen) => return Ok(args),
                Some(token) => return Err(format!("Expected ',' or ')', found {token:?}")),
                None => return Err("Expected ')'".to_string()),
            }
        }
    }
}

fn comparison_op(token: &Token) -> Option<BinaryOp> {
    match token {
        Token::Lt => Some(BinaryOp::Lt),
        Token::Le => Some(BinaryOp::Le),
        Token::Gt => Some(BinaryOp::Gt),
        Token::Ge => Some(BinaryOp::Ge),
        Token::EqEq => Some(BinaryOp::Eq),
        Token::Ne => Some(BinaryOp::Ne),
        _ => None,
    }
}
