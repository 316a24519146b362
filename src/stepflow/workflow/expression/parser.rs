// SPDX-License-Identifier: MIT

//! Expression parser
//!
//! Recursive descent over the token stream, lowest precedence first:
//!
//! ```text
//! ternary      a ? b : c            (right associative)
//! coalesce     a ?? b
//! or           a || b, a or b
//! and          a && b, a and b
//! equality     == != === !==
//! relational   < <= > >= contains in
//! additive     + -
//! multiplicative * / %
//! unary        ! not - + typeof
//! postfix      a.b  a[b]  a.method(..)
//! ```
//!
//! Identifiers are resolved here, not at evaluation time: anything outside the
//! allow-lists is rejected before the expression can run.

use serde_json::Value;

use super::ast::{BinaryOp, Callee, Expr, LogicalOp, Namespace, UnaryOp, Variable};
use super::functions;
use super::lexer::{tokenize, Spanned, Token};
use super::value::json_number;
use crate::adk::error::EvaluationError;

/// Longest accepted expression source
pub const MAX_SOURCE_LENGTH: usize = 4096;
/// Deepest accepted nesting, both while parsing and of the resulting tree
pub const MAX_DEPTH: usize = 64;

/// Parse an expression (the text inside `{{ }}`) into an AST
pub fn parse(input: &str) -> Result<Expr, EvaluationError> {
    if input.len() > MAX_SOURCE_LENGTH {
        return Err(EvaluationError::Limit(format!(
            "source is {} bytes, limit is {}",
            input.len(),
            MAX_SOURCE_LENGTH
        )));
    }
    let tokens = tokenize(input)?;
    if tokens.len() == 1 {
        return Err(EvaluationError::syntax(0, "empty expression"));
    }
    let mut parser = Parser {
        tokens,
        pos: 0,
        depth: 0,
    };
    let expr = parser.parse_expression()?;
    if !matches!(parser.peek(), Token::Eof) {
        return Err(EvaluationError::syntax(
            parser.position(),
            format!("unexpected {}", describe(parser.peek())),
        ));
    }
    // Operator chains fold iteratively, so only the finished tree shows their depth
    let depth = tree_depth(&expr);
    if depth > MAX_DEPTH {
        return Err(EvaluationError::Limit(format!(
            "expression is {} levels deep, limit is {}",
            depth, MAX_DEPTH
        )));
    }
    Ok(expr)
}

/// Height of the tree, walked without recursion
fn tree_depth(root: &Expr) -> usize {
    let mut deepest = 0;
    let mut stack = vec![(root, 1)];
    while let Some((expr, depth)) = stack.pop() {
        deepest = deepest.max(depth);
        let below = depth + 1;
        match expr {
            Expr::Literal(_) | Expr::Variable(_) => {}
            Expr::Array(items) => stack.extend(items.iter().map(|item| (item, below))),
            Expr::Member { object, .. } => stack.push((object, below)),
            Expr::Index { object, index } => {
                stack.push((object, below));
                stack.push((index, below));
            }
            Expr::Call { callee, args } => {
                if let Callee::Method { receiver, .. } = callee {
                    stack.push((receiver, below));
                }
                stack.extend(args.iter().map(|arg| (arg, below)));
            }
            Expr::Unary { operand, .. } => stack.push((operand, below)),
            Expr::Binary { left, right, .. } | Expr::Logical { left, right, .. } => {
                stack.push((left, below));
                stack.push((right, below));
            }
            Expr::Conditional {
                test,
                consequent,
                alternate,
            } => {
                stack.push((test, below));
                stack.push((consequent, below));
                stack.push((alternate, below));
            }
        }
    }
    deepest
}

struct Parser {
    tokens: Vec<Spanned>,
    pos: usize,
    depth: usize,
}

impl Parser {
    fn peek(&self) -> &Token {
        &self.tokens[self.pos.min(self.tokens.len() - 1)].token
    }

    fn position(&self) -> usize {
        self.tokens[self.pos.min(self.tokens.len() - 1)].position
    }

    fn advance(&mut self) -> Token {
        let token = self.peek().clone();
        if self.pos < self.tokens.len() - 1 {
            self.pos += 1;
        }
        token
    }

    fn eat(&mut self, expected: &Token) -> bool {
        if self.peek() == expected {
            self.advance();
            true
        } else {
            false
        }
    }

    fn eat_word(&mut self, word: &str) -> bool {
        if matches!(self.peek(), Token::Ident(name) if name == word) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn expect(&mut self, expected: &Token) -> Result<(), EvaluationError> {
        if self.eat(expected) {
            Ok(())
        } else {
            Err(EvaluationError::syntax(
                self.position(),
                format!("expected {}, found {}", describe(expected), describe(self.peek())),
            ))
        }
    }

    fn nested<T>(
        &mut self,
        f: impl FnOnce(&mut Self) -> Result<T, EvaluationError>,
    ) -> Result<T, EvaluationError> {
        self.depth += 1;
        if self.depth > MAX_DEPTH {
            return Err(EvaluationError::Limit(format!(
                "nesting deeper than {}",
                MAX_DEPTH
            )));
        }
        let result = f(self);
        self.depth -= 1;
        result
    }

    fn parse_expression(&mut self) -> Result<Expr, EvaluationError> {
        self.nested(|p| p.parse_ternary())
    }

    fn parse_ternary(&mut self) -> Result<Expr, EvaluationError> {
        let test = self.parse_coalesce()?;
        if !self.eat(&Token::Question) {
            return Ok(test);
        }
        let consequent = self.parse_expression()?;
        self.expect(&Token::Colon)?;
        let alternate = self.parse_expression()?;
        Ok(Expr::Conditional {
            test: Box::new(test),
            consequent: Box::new(consequent),
            alternate: Box::new(alternate),
        })
    }

    fn parse_coalesce(&mut self) -> Result<Expr, EvaluationError> {
        let mut left = self.parse_or()?;
        while self.eat(&Token::QuestionQuestion) {
            let right = self.parse_or()?;
            left = logical(LogicalOp::Coalesce, left, right);
        }
        Ok(left)
    }

    fn parse_or(&mut self) -> Result<Expr, EvaluationError> {
        let mut left = self.parse_and()?;
        while self.eat(&Token::OrOr) || self.eat_word("or") {
            let right = self.parse_and()?;
            left = logical(LogicalOp::Or, left, right);
        }
        Ok(left)
    }

    fn parse_and(&mut self) -> Result<Expr, EvaluationError> {
        let mut left = self.parse_equality()?;
        while self.eat(&Token::AndAnd) || self.eat_word("and") {
            let right = self.parse_equality()?;
            left = logical(LogicalOp::And, left, right);
        }
        Ok(left)
    }

    fn parse_equality(&mut self) -> Result<Expr, EvaluationError> {
        let mut left = self.parse_relational()?;
        loop {
            let op = match self.peek() {
                Token::EqEq => BinaryOp::Eq,
                Token::NotEq => BinaryOp::NotEq,
                _ => return Ok(left),
            };
            self.advance();
            let right = self.parse_relational()?;
            left = binary(op, left, right);
        }
    }

    fn parse_relational(&mut self) -> Result<Expr, EvaluationError> {
        let mut left = self.parse_additive()?;
        loop {
            let op = match self.peek() {
                Token::Lt => BinaryOp::Lt,
                Token::Lte => BinaryOp::Lte,
                Token::Gt => BinaryOp::Gt,
                Token::Gte => BinaryOp::Gte,
                Token::Ident(word) if word == "contains" => BinaryOp::Contains,
                Token::Ident(word) if word == "in" => BinaryOp::In,
                _ => return Ok(left),
            };
            self.advance();
            let right = self.parse_additive()?;
            left = binary(op, left, right);
        }
    }

    fn parse_additive(&mut self) -> Result<Expr, EvaluationError> {
        let mut left = self.parse_multiplicative()?;
        loop {
            let op = match self.peek() {
                Token::Plus => BinaryOp::Add,
                Token::Minus => BinaryOp::Sub,
                _ => return Ok(left),
            };
            self.advance();
            let right = self.parse_multiplicative()?;
            left = binary(op, left, right);
        }
    }

    fn parse_multiplicative(&mut self) -> Result<Expr, EvaluationError> {
        let mut left = self.parse_unary()?;
        loop {
            let op = match self.peek() {
                Token::Star => BinaryOp::Mul,
                Token::Slash => BinaryOp::Div,
                Token::Percent => BinaryOp::Rem,
                _ => return Ok(left),
            };
            self.advance();
            let right = self.parse_unary()?;
            left = binary(op, left, right);
        }
    }

    fn parse_unary(&mut self) -> Result<Expr, EvaluationError> {
        let op = match self.peek() {
            Token::Bang => Some(UnaryOp::Not),
            Token::Minus => Some(UnaryOp::Neg),
            Token::Plus => Some(UnaryOp::Plus),
            Token::Ident(word) if word == "not" => Some(UnaryOp::Not),
            Token::Ident(word) if word == "typeof" => Some(UnaryOp::TypeOf),
            _ => None,
        };
        match op {
            Some(op) => {
                self.advance();
                let operand = self.nested(|p| p.parse_unary())?;
                Ok(Expr::Unary {
                    op,
                    operand: Box::new(operand),
                })
            }
            None => self.parse_postfix(),
        }
    }

    fn parse_postfix(&mut self) -> Result<Expr, EvaluationError> {
        let mut expr = self.parse_primary()?;
        loop {
            match self.peek() {
                Token::Dot => {
                    self.advance();
                    let name = self.member_name()?;
                    if self.peek() == &Token::LParen {
                        if !functions::is_method(&name) {
                            return Err(EvaluationError::Sandbox(format!("method {}", name)));
                        }
                        let args = self.parse_arguments()?;
                        expr = Expr::Call {
                            callee: Callee::Method {
                                receiver: Box::new(expr),
                                name,
                            },
                            args,
                        };
                    } else {
                        expr = Expr::Member {
                            object: Box::new(expr),
                            property: name,
                        };
                    }
                }
                Token::LBracket => {
                    self.advance();
                    let index = self.parse_expression()?;
                    self.expect(&Token::RBracket)?;
                    expr = Expr::Index {
                        object: Box::new(expr),
                        index: Box::new(index),
                    };
                }
                Token::LParen => {
                    return Err(EvaluationError::syntax(
                        self.position(),
                        "only allow-listed functions can be called",
                    ))
                }
                _ => return Ok(expr),
            }
        }
    }

    fn member_name(&mut self) -> Result<String, EvaluationError> {
        let position = self.position();
        match self.advance() {
            Token::Ident(name) => {
                if is_forbidden_member(&name) {
                    return Err(EvaluationError::Sandbox(name));
                }
                Ok(name)
            }
            other => Err(EvaluationError::syntax(
                position,
                format!("expected property name, found {}", describe(&other)),
            )),
        }
    }

    fn parse_arguments(&mut self) -> Result<Vec<Expr>, EvaluationError> {
        self.expect(&Token::LParen)?;
        let mut args = Vec::new();
        if self.eat(&Token::RParen) {
            return Ok(args);
        }
        loop {
            args.push(self.parse_expression()?);
            if self.eat(&Token::RParen) {
                return Ok(args);
            }
            self.expect(&Token::Comma)?;
        }
    }

    fn parse_primary(&mut self) -> Result<Expr, EvaluationError> {
        let position = self.position();
        match self.advance() {
            Token::Number(n) => Ok(Expr::Literal(json_number(n))),
            Token::Str(s) => Ok(Expr::Literal(Value::String(s))),
            Token::LParen => {
                let inner = self.parse_expression()?;
                self.expect(&Token::RParen)?;
                Ok(inner)
            }
            Token::LBracket => {
                let mut items = Vec::new();
                if !self.eat(&Token::RBracket) {
                    loop {
                        items.push(self.parse_expression()?);
                        if self.eat(&Token::RBracket) {
                            break;
                        }
                        self.expect(&Token::Comma)?;
                    }
                }
                Ok(Expr::Array(items))
            }
            Token::Ident(name) => self.parse_identifier(name, position),
            other => Err(EvaluationError::syntax(
                position,
                format!("unexpected {}", describe(&other)),
            )),
        }
    }

    fn parse_identifier(&mut self, name: String, position: usize) -> Result<Expr, EvaluationError> {
        match name.as_str() {
            "true" => return Ok(Expr::Literal(Value::Bool(true))),
            "false" => return Ok(Expr::Literal(Value::Bool(false))),
            "null" | "undefined" => return Ok(Expr::Literal(Value::Null)),
            "and" | "or" | "not" | "contains" | "in" | "typeof" => {
                return Err(EvaluationError::syntax(
                    position,
                    format!("unexpected operator '{}'", name),
                ))
            }
            _ => {}
        }

        if name.starts_with('$') {
            return Variable::from_name(&name)
                .map(Expr::Variable)
                .ok_or(EvaluationError::UnknownIdentifier(name));
        }

        if functions::is_forbidden(&name) {
            return Err(EvaluationError::Sandbox(name));
        }

        if let Some(namespace) = Namespace::from_name(&name) {
            return self.parse_namespace_access(namespace);
        }

        if functions::is_builtin(&name) {
            if self.peek() != &Token::LParen {
                return Err(EvaluationError::syntax(
                    self.position(),
                    format!("'{}' must be called", name),
                ));
            }
            let args = self.parse_arguments()?;
            return Ok(Expr::Call {
                callee: Callee::Builtin(name),
                args,
            });
        }

        Err(EvaluationError::UnknownIdentifier(name))
    }

    fn parse_namespace_access(&mut self, namespace: Namespace) -> Result<Expr, EvaluationError> {
        self.expect(&Token::Dot)?;
        let member = self.member_name()?;
        let qualified = format!("{}.{}", namespace.as_str(), member);

        if self.peek() != &Token::LParen {
            return functions::namespace_constant(namespace, &member)
                .map(Expr::Literal)
                .ok_or(EvaluationError::UnknownIdentifier(qualified));
        }
        if !functions::namespace_has(namespace, &member) {
            return Err(EvaluationError::UnknownIdentifier(qualified));
        }
        let args = self.parse_arguments()?;
        Ok(Expr::Call {
            callee: Callee::Namespace(namespace, member),
            args,
        })
    }
}

/// Property names that reach into object internals
pub fn is_forbidden_member(name: &str) -> bool {
    matches!(name, "constructor" | "__proto__" | "prototype")
}

fn logical(op: LogicalOp, left: Expr, right: Expr) -> Expr {
    Expr::Logical {
        op,
        left: Box::new(left),
        right: Box::new(right),
    }
}

fn binary(op: BinaryOp, left: Expr, right: Expr) -> Expr {
    Expr::Binary {
        op,
        left: Box::new(left),
        right: Box::new(right),
    }
}

fn describe(token: &Token) -> String {
    match token {
        Token::Number(n) => format!("number {}", n),
        Token::Str(s) => format!("string '{}'", s),
        Token::Ident(name) => format!("'{}'", name),
        Token::LParen => "'('".to_string(),
        Token::RParen => "')'".to_string(),
        Token::LBracket => "'['".to_string(),
        Token::RBracket => "']'".to_string(),
        Token::Comma => "','".to_string(),
        Token::Dot => "'.'".to_string(),
        Token::Question => "'?'".to_string(),
        Token::Colon => "':'".to_string(),
        Token::Bang => "'!'".to_string(),
        Token::Plus => "'+'".to_string(),
        Token::Minus => "'-'".to_string(),
        Token::Star => "'*'".to_string(),
        Token::Slash => "'/'".to_string(),
        Token::Percent => "'%'".to_string(),
        Token::EqEq => "'=='".to_string(),
        Token::NotEq => "'!='".to_string(),
        Token::Lt => "'<'".to_string(),
        Token::Lte => "'<='".to_string(),
        Token::Gt => "'>'".to_string(),
        Token::Gte => "'>='".to_string(),
        Token::AndAnd => "'&&'".to_string(),
        Token::OrOr => "'||'".to_string(),
        Token::QuestionQuestion => "'??'".to_string(),
        Token::Eof => "end of expression".to_string(),
    }
}
