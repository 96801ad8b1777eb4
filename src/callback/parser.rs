//! Restricted statement/expression tree for callback bodies
//!
//! Name resolution happens here: every identifier must be a parameter or a
//! binding declared earlier in an enclosing block, so a callback that refers
//! to anything from its defining environment is rejected before it can run.

use super::lexer::Token;

#[derive(Debug, Clone, PartialEq)]
pub enum Stmt {
    Return(Option<Expr>),
    If {
        cond: Expr,
        then: Box<Stmt>,
        otherwise: Option<Box<Stmt>>,
    },
    Let {
        name: String,
        value: Expr,
    },
    Block(Vec<Stmt>),
    Expr(Expr),
    Empty,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Str(String),
    Num(f64),
    Bool(bool),
    Null,
    Undefined,
    Var(String),
    Object(Vec<(String, Expr)>),
    Not(Box<Expr>),
    Neg(Box<Expr>),
    Binary {
        op: BinOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
    Conditional {
        cond: Box<Expr>,
        then: Box<Expr>,
        otherwise: Box<Expr>,
    },
    Member {
        target: Box<Expr>,
        property: String,
    },
    Index {
        target: Box<Expr>,
        index: Box<Expr>,
    },
    Call {
        target: Box<Expr>,
        method: String,
        args: Vec<Expr>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    StrictEq,
    StrictNe,
    LooseEq,
    LooseNe,
    And,
    Or,
    Add,
}

const FORBIDDEN: &[&str] = &[
    "function", "async", "await", "new", "this", "while", "for", "do", "class", "yield",
    "import", "export", "delete", "try", "throw", "switch", "with", "eval",
];

/// Deepest statement/expression nesting a callback may use
pub const MAX_NESTING: usize = 256;
/// Longest callback body, in tokens
pub const MAX_TOKENS: usize = 4096;

const TOO_DEEP: &str = "callback nesting too deep";

pub fn parse_body(tokens: Vec<Token>, params: &[String]) -> Result<Vec<Stmt>, String> {
    if tokens.len() > MAX_TOKENS {
        return Err(format!(
            "callback body too long ({} tokens, at most {})",
            tokens.len(),
            MAX_TOKENS
        ));
    }
    let mut parser = Parser {
        tokens,
        pos: 0,
        scopes: vec![params.to_vec(), Vec::new()],
        depth: 0,
    };
    let mut body = Vec::new();
    while !parser.at_end() {
        body.push(parser.statement()?);
    }
    // operator chains are parsed iteratively, so the tree can still be deep
    if body.iter().any(|stmt| stmt_exceeds(stmt, MAX_NESTING)) {
        return Err(TOO_DEEP.to_string());
    }
    Ok(body)
}

/// True when `stmt` is more than `budget` levels deep. Stops descending once
/// the budget is spent.
fn stmt_exceeds(stmt: &Stmt, budget: usize) -> bool {
    let Some(budget) = budget.checked_sub(1) else {
        return true;
    };
    match stmt {
        Stmt::Return(None) | Stmt::Empty => false,
        Stmt::Return(Some(expr)) | Stmt::Expr(expr) => expr_exceeds(expr, budget),
        Stmt::Let { value, .. } => expr_exceeds(value, budget),
        Stmt::If {
            cond,
            then,
            otherwise,
        } => {
            expr_exceeds(cond, budget)
                || stmt_exceeds(then, budget)
                || otherwise.as_ref().is_some_and(|s| stmt_exceeds(s, budget))
        }
        Stmt::Block(stmts) => stmts.iter().any(|s| stmt_exceeds(s, budget)),
    }
}

fn expr_exceeds(expr: &Expr, budget: usize) -> bool {
    let Some(budget) = budget.checked_sub(1) else {
        return true;
    };
    match expr {
        Expr::Str(_) | Expr::Num(_) | Expr::Bool(_) | Expr::Null | Expr::Undefined | Expr::Var(_) => {
            false
        }
        Expr::Object(fields) => fields.iter().any(|(_, value)| expr_exceeds(value, budget)),
        Expr::Not(inner) | Expr::Neg(inner) => expr_exceeds(inner, budget),
        Expr::Member { target, .. } => expr_exceeds(target, budget),
        Expr::Binary { lhs, rhs, .. } => expr_exceeds(lhs, budget) || expr_exceeds(rhs, budget),
        Expr::Index { target, index } => {
            expr_exceeds(target, budget) || expr_exceeds(index, budget)
        }
        Expr::Conditional {
            cond,
            then,
            otherwise,
        } => {
            expr_exceeds(cond, budget)
                || expr_exceeds(then, budget)
                || expr_exceeds(otherwise, budget)
        }
        Expr::Call { target, args, .. } => {
            expr_exceeds(target, budget) || args.iter().any(|a| expr_exceeds(a, budget))
        }
    }
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    scopes: Vec<Vec<String>>,
    depth: usize,
}

impl Parser {
    /// Run `parse` one nesting level deeper
    fn nested<T>(&mut self, parse: fn(&mut Self) -> Result<T, String>) -> Result<T, String> {
        if self.depth >= MAX_NESTING {
            return Err(TOO_DEEP.to_string());
        }
        self.depth += 1;
        let result = parse(self);
        self.depth -= 1;
        result
    }

    fn at_end(&self) -> bool {
        self.pos >= self.tokens.len()
    }

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        self.pos += 1;
        token
    }

    fn peek_punct(&self, punct: &str) -> bool {
        matches!(self.peek(), Some(Token::Punct(p)) if *p == punct)
    }

    fn peek_keyword(&self, keyword: &str) -> bool {
        matches!(self.peek(), Some(Token::Ident(name)) if name == keyword)
    }

    fn eat_punct(&mut self, punct: &str) -> bool {
        if self.peek_punct(punct) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect_punct(&mut self, punct: &str) -> Result<(), String> {
        if self.eat_punct(punct) {
            Ok(())
        } else {
            Err(format!("expected `{}`, found {}", punct, describe(self.peek())))
        }
    }

    fn ident(&mut self) -> Result<String, String> {
        match self.next() {
            Some(Token::Ident(name)) => Ok(name),
            other => Err(format!("expected identifier, found {}", describe(other.as_ref()))),
        }
    }

    fn declare(&mut self, name: &str) {
        if let Some(scope) = self.scopes.last_mut() {
            scope.push(name.to_string());
        }
    }

    fn is_bound(&self, name: &str) -> bool {
        self.scopes.iter().any(|scope| scope.iter().any(|n| n == name))
    }

    fn statement(&mut self) -> Result<Stmt, String> {
        self.nested(Self::statement_inner)
    }

    fn statement_inner(&mut self) -> Result<Stmt, String> {
        if self.eat_punct(";") {
            return Ok(Stmt::Empty);
        }
        if self.eat_punct("{") {
            self.scopes.push(Vec::new());
            let mut stmts = Vec::new();
            while !self.eat_punct("}") {
                if self.at_end() {
                    return Err("unterminated block".to_string());
                }
                stmts.push(self.statement()?);
            }
            self.scopes.pop();
            return Ok(Stmt::Block(stmts));
        }

        if let Some(Token::Ident(word)) = self.peek() {
            if FORBIDDEN.contains(&word.as_str()) {
                return Err(format!("`{}` is not supported in import callbacks", word));
            }
        }

        if self.peek_keyword("return") {
            self.pos += 1;
            if self.eat_punct(";") || self.peek_punct("}") || self.at_end() {
                return Ok(Stmt::Return(None));
            }
            let value = self.expression()?;
            self.eat_punct(";");
            return Ok(Stmt::Return(Some(value)));
        }

        if self.peek_keyword("if") {
            self.pos += 1;
            self.expect_punct("(")?;
            let cond = self.expression()?;
            self.expect_punct(")")?;
            let then = Box::new(self.scoped_statement()?);
            let otherwise = if self.peek_keyword("else") {
                self.pos += 1;
                Some(Box::new(self.scoped_statement()?))
            } else {
                None
            };
            return Ok(Stmt::If {
                cond,
                then,
                otherwise,
            });
        }

        if self.peek_keyword("const") || self.peek_keyword("let") || self.peek_keyword("var") {
            self.pos += 1;
            let name = self.ident()?;
            self.expect_punct("=")?;
            let value = self.expression()?;
            self.eat_punct(";");
            self.declare(&name);
            return Ok(Stmt::Let { name, value });
        }

        let expr = self.expression()?;
        if self.peek_punct("=") {
            return Err("assignment is not supported in import callbacks".to_string());
        }
        self.eat_punct(";");
        Ok(Stmt::Expr(expr))
    }

    /// Branch bodies get their own scope even without braces
    fn scoped_statement(&mut self) -> Result<Stmt, String> {
        self.scopes.push(Vec::new());
        let stmt = self.statement();
        self.scopes.pop();
        stmt
    }

    fn expression(&mut self) -> Result<Expr, String> {
        self.nested(Self::expression_inner)
    }

    fn expression_inner(&mut self) -> Result<Expr, String> {
        let cond = self.or()?;
        if self.peek_punct("=>") {
            return Err("arrow functions are not supported".to_string());
        }
        if self.eat_punct("?") {
            let then = self.expression()?;
            self.expect_punct(":")?;
            let otherwise = self.expression()?;
            return Ok(Expr::Conditional {
                cond: Box::new(cond),
                then: Box::new(then),
                otherwise: Box::new(otherwise),
            });
        }
        Ok(cond)
    }

    fn or(&mut self) -> Result<Expr, String> {
        let mut lhs = self.and()?;
        while self.eat_punct("||") {
            let rhs = self.and()?;
            lhs = binary(BinOp::Or, lhs, rhs);
        }
        Ok(lhs)
    }

    fn and(&mut self) -> Result<Expr, String> {
        let mut lhs = self.equality()?;
        while self.eat_punct("&&") {
            let rhs = self.equality()?;
            lhs = binary(BinOp::And, lhs, rhs);
        }
        Ok(lhs)
    }

    fn equality(&mut self) -> Result<Expr, String> {
        let mut lhs = self.additive()?;
        loop {
            let op = if self.eat_punct("===") {
                BinOp::StrictEq
            } else if self.eat_punct("!==") {
                BinOp::StrictNe
            } else if self.eat_punct("==") {
                BinOp::LooseEq
            } else if self.eat_punct("!=") {
                BinOp::LooseNe
            } else {
                return Ok(lhs);
            };
            let rhs = self.additive()?;
            lhs = binary(op, lhs, rhs);
        }
    }

    fn additive(&mut self) -> Result<Expr, String> {
        let mut lhs = self.unary()?;
        while self.eat_punct("+") {
            let rhs = self.unary()?;
            lhs = binary(BinOp::Add, lhs, rhs);
        }
        if self.peek_punct("-") {
            return Err("subtraction is not supported in import callbacks".to_string());
        }
        Ok(lhs)
    }

    fn unary(&mut self) -> Result<Expr, String> {
        self.nested(Self::unary_inner)
    }

    fn unary_inner(&mut self) -> Result<Expr, String> {
        if self.eat_punct("!") {
            return Ok(Expr::Not(Box::new(self.unary()?)));
        }
        if self.eat_punct("-") {
            return Ok(Expr::Neg(Box::new(self.unary()?)));
        }
        self.postfix()
    }

    fn postfix(&mut self) -> Result<Expr, String> {
        let mut expr = self.primary()?;
        loop {
            if self.eat_punct(".") {
                let property = self.ident()?;
                if self.eat_punct("(") {
                    let args = self.arguments()?;
                    expr = Expr::Call {
                        target: Box::new(expr),
                        method: property,
                        args,
                    };
                } else {
                    expr = Expr::Member {
                        target: Box::new(expr),
                        property,
                    };
                }
            } else if self.eat_punct("[") {
                let index = self.expression()?;
                self.expect_punct("]")?;
                expr = Expr::Index {
                    target: Box::new(expr),
                    index: Box::new(index),
                };
            } else if self.peek_punct("(") {
                return Err("only string methods may be called in import callbacks".to_string());
            } else {
                return Ok(expr);
            }
        }
    }

    fn arguments(&mut self) -> Result<Vec<Expr>, String> {
        let mut args = Vec::new();
        if self.eat_punct(")") {
            return Ok(args);
        }
        loop {
            args.push(self.expression()?);
            if self.eat_punct(")") {
                return Ok(args);
            }
            self.expect_punct(",")?;
        }
    }

    fn primary(&mut self) -> Result<Expr, String> {
        match self.next() {
            Some(Token::Str(s)) => Ok(Expr::Str(s)),
            Some(Token::Num(n)) => Ok(Expr::Num(n)),
            Some(Token::Punct("(")) => {
                let expr = self.expression()?;
                self.expect_punct(")")?;
                Ok(expr)
            }
            Some(Token::Punct("{")) => self.object(),
            Some(Token::Ident(name)) => self.name(name),
            other => Err(format!("unexpected {}", describe(other.as_ref()))),
        }
    }

    fn name(&mut self, name: String) -> Result<Expr, String> {
        match name.as_str() {
            "true" => return Ok(Expr::Bool(true)),
            "false" => return Ok(Expr::Bool(false)),
            "null" => return Ok(Expr::Null),
            "undefined" => return Ok(Expr::Undefined),
            _ => {}
        }
        if FORBIDDEN.contains(&name.as_str()) {
            return Err(format!("`{}` is not supported in import callbacks", name));
        }
        if !self.is_bound(&name) {
            return Err(format!(
                "`{}` is not a parameter or local binding; import callbacks cannot capture variables",
                name
            ));
        }
        Ok(Expr::Var(name))
    }

    fn object(&mut self) -> Result<Expr, String> {
        let mut fields = Vec::new();
        loop {
            if self.eat_punct("}") {
                return Ok(Expr::Object(fields));
            }
            let key = match self.next() {
                Some(Token::Ident(name)) => name,
                Some(Token::Str(s)) => s,
                Some(Token::Num(n)) => format_number(n),
                other => return Err(format!("invalid object key {}", describe(other.as_ref()))),
            };
            let value = if self.eat_punct(":") {
                self.expression()?
            } else {
                // shorthand `{contents}`
                self.name(key.clone())?
            };
            fields.push((key, value));
            if !self.eat_punct(",") {
                self.expect_punct("}")?;
                return Ok(Expr::Object(fields));
            }
        }
    }
}

fn binary(op: BinOp, lhs: Expr, rhs: Expr) -> Expr {
    Expr::Binary {
        op,
        lhs: Box::new(lhs),
        rhs: Box::new(rhs),
    }
}

pub(super) fn format_number(n: f64) -> String {
    if n.fract() == 0.0 && n.is_finite() && n.abs() < 1e15 {
        format!("{}", n as i64)
    } else {
        format!("{}", n)
    }
}

fn describe(token: Option<&Token>) -> String {
    match token {
        None => "end of input".to_string(),
        Some(Token::Ident(name)) => format!("`{}`", name),
        Some(Token::Str(s)) => format!("string \"{}\"", s),
        Some(Token::Num(n)) => format!("number {}", n),
        Some(Token::Punct(p)) => format!("`{}`", p),
    }
}
