// SPDX-License-Identifier: MIT

//! Abstract Syntax Tree for workflow expressions

use serde_json::Value;
use std::fmt;

/// A parsed expression
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    /// String, number, boolean or null literal
    Literal(Value),
    /// `[a, b, c]`
    Array(Vec<Expr>),
    /// One of the read-only `$` roots
    Variable(Variable),
    /// `object.property`
    Member {
        object: Box<Expr>,
        property: String,
    },
    /// `object[index]`
    Index {
        object: Box<Expr>,
        index: Box<Expr>,
    },
    /// A call to an allow-listed function or method
    Call { callee: Callee, args: Vec<Expr> },
    Unary {
        op: UnaryOp,
        operand: Box<Expr>,
    },
    Binary {
        op: BinaryOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    /// Short-circuiting operators
    Logical {
        op: LogicalOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    /// `test ? consequent : alternate`
    Conditional {
        test: Box<Expr>,
        consequent: Box<Expr>,
        alternate: Box<Expr>,
    },
}

/// Read-only roots of the expression namespace
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Variable {
    /// `$input` / `$json`: the run's input payload
    Input,
    /// `$context`: the run context
    Context,
    /// `$node` / `$steps`: step results by node id
    Steps,
    /// `$now`: evaluation time as RFC 3339
    Now,
    /// `$today`: evaluation date as YYYY-MM-DD
    Today,
    /// `$timestamp`: evaluation time as epoch seconds
    Timestamp,
}

impl Variable {
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "$input" | "$json" => Some(Variable::Input),
            "$context" => Some(Variable::Context),
            "$node" | "$steps" => Some(Variable::Steps),
            "$now" => Some(Variable::Now),
            "$today" => Some(Variable::Today),
            "$timestamp" => Some(Variable::Timestamp),
            _ => None,
        }
    }
}

/// Pure utility namespaces
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Namespace {
    Math,
    Date,
    String,
    Json,
}

impl Namespace {
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "Math" => Some(Namespace::Math),
            "Date" => Some(Namespace::Date),
            "String" => Some(Namespace::String),
            "JSON" => Some(Namespace::Json),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Namespace::Math => "Math",
            Namespace::Date => "Date",
            Namespace::String => "String",
            Namespace::Json => "JSON",
        }
    }
}

/// What a call expression invokes
#[derive(Debug, Clone, PartialEq)]
pub enum Callee {
    /// Global helper such as `len(x)`
    Builtin(String),
    /// `Math.max(a, b)`
    Namespace(Namespace, String),
    /// `value.toUpperCase()`
    Method { receiver: Box<Expr>, name: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    /// `!` / `not`
    Not,
    /// `-`
    Neg,
    /// `+`
    Plus,
    /// `typeof`
    TypeOf,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    /// `==` / `===`
    Eq,
    /// `!=` / `!==`
    NotEq,
    Lt,
    Lte,
    Gt,
    Gte,
    /// substring, array element or object key
    Contains,
    /// `key in collection`
    In,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogicalOp {
    /// `&&` / `and`
    And,
    /// `||` / `or`
    Or,
    /// `??`
    Coalesce,
}

impl fmt::Display for UnaryOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UnaryOp::Not => write!(f, "!"),
            UnaryOp::Neg => write!(f, "-"),
            UnaryOp::Plus => write!(f, "+"),
            UnaryOp::TypeOf => write!(f, "typeof"),
        }
    }
}

impl fmt::Display for BinaryOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BinaryOp::Add => write!(f, "+"),
            BinaryOp::Sub => write!(f, "-"),
            BinaryOp::Mul => write!(f, "*"),
            BinaryOp::Div => write!(f, "/"),
            BinaryOp::Rem => write!(f, "%"),
            BinaryOp::Eq => write!(f, "=="),
            BinaryOp::NotEq => write!(f, "!="),
            BinaryOp::Lt => write!(f, "<"),
            BinaryOp::Lte => write!(f, "<="),
            BinaryOp::Gt => write!(f, ">"),
            BinaryOp::Gte => write!(f, ">="),
            BinaryOp::Contains => write!(f, "contains"),
            BinaryOp::In => write!(f, "in"),
        }
    }
}

impl fmt::Display for LogicalOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LogicalOp::And => write!(f, "&&"),
            LogicalOp::Or => write!(f, "||"),
            LogicalOp::Coalesce => write!(f, "??"),
        }
    }
}
