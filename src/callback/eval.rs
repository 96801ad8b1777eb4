//! Evaluator for reconstructed callback bodies

use super::parser::{format_number, BinOp, Expr, Stmt};
use super::ImportResult;
use std::collections::BTreeMap;

/// Runtime value inside a callback
#[derive(Debug, Clone, PartialEq)]
pub enum Val {
    Undefined,
    Null,
    Bool(bool),
    Num(f64),
    Str(String),
    Object(BTreeMap<String, Val>),
}

impl Val {
    fn truthy(&self) -> bool {
        match self {
            Val::Undefined | Val::Null => false,
            Val::Bool(b) => *b,
            Val::Num(n) => *n != 0.0 && !n.is_nan(),
            Val::Str(s) => !s.is_empty(),
            Val::Object(_) => true,
        }
    }

    fn type_name(&self) -> &'static str {
        match self {
            Val::Undefined => "undefined",
            Val::Null => "null",
            Val::Bool(_) => "boolean",
            Val::Num(_) => "number",
            Val::Str(_) => "string",
            Val::Object(_) => "object",
        }
    }

    fn to_display(&self) -> String {
        match self {
            Val::Undefined => "undefined".to_string(),
            Val::Null => "null".to_string(),
            Val::Bool(b) => b.to_string(),
            Val::Num(n) => format_number(*n),
            Val::Str(s) => s.clone(),
            Val::Object(_) => "[object Object]".to_string(),
        }
    }
}

enum Flow {
    Next,
    Return(Val),
}

struct Env {
    scopes: Vec<BTreeMap<String, Val>>,
}

impl Env {
    fn lookup(&self, name: &str) -> Result<Val, String> {
        self.scopes
            .iter()
            .rev()
            .find_map(|scope| scope.get(name).cloned())
            .ok_or_else(|| format!("`{}` is not defined", name))
    }

    fn bind(&mut self, name: &str, value: Val) {
        if let Some(scope) = self.scopes.last_mut() {
            scope.insert(name.to_string(), value);
        }
    }
}

/// Run a callback body with `path` bound to the first parameter
pub fn run(params: &[String], body: &[Stmt], path: &str) -> Result<Val, String> {
    let mut args = BTreeMap::new();
    for (i, param) in params.iter().enumerate() {
        let value = if i == 0 {
            Val::Str(path.to_string())
        } else {
            Val::Undefined
        };
        args.insert(param.clone(), value);
    }
    let mut env = Env { scopes: vec![args] };
    match block(&mut env, body)? {
        Flow::Return(value) => Ok(value),
        Flow::Next => Ok(Val::Undefined),
    }
}

/// Interpret a callback's return value as an import result
pub fn to_import_result(value: Val) -> ImportResult {
    if let Val::Object(fields) = &value {
        if let Some(Val::Str(contents)) = fields.get("contents") {
            return ImportResult::Contents(contents.clone());
        }
        if let Some(error) = fields.get("error") {
            if !matches!(error, Val::Undefined) {
                return ImportResult::Error(error.to_display());
            }
        }
    }
    ImportResult::Error(format!(
        "import callback returned neither `contents` nor `error` (got {})",
        value.type_name()
    ))
}

fn block(env: &mut Env, stmts: &[Stmt]) -> Result<Flow, String> {
    env.scopes.push(BTreeMap::new());
    let mut flow = Flow::Next;
    for stmt in stmts {
        match statement(env, stmt) {
            Ok(Flow::Next) => {}
            Ok(ret) => {
                flow = ret;
                break;
            }
            Err(e) => {
                env.scopes.pop();
                return Err(e);
            }
        }
    }
    env.scopes.pop();
    Ok(flow)
}

fn statement(env: &mut Env, stmt: &Stmt) -> Result<Flow, String> {
    match stmt {
        Stmt::Return(None) => Ok(Flow::Return(Val::Undefined)),
        Stmt::Return(Some(expr)) => Ok(Flow::Return(eval(env, expr)?)),
        Stmt::If {
            cond,
            then,
            otherwise,
        } => {
            if eval(env, cond)?.truthy() {
                block(env, std::slice::from_ref(then.as_ref()))
            } else if let Some(otherwise) = otherwise {
                block(env, std::slice::from_ref(otherwise.as_ref()))
            } else {
                Ok(Flow::Next)
            }
        }
        Stmt::Let { name, value } => {
            let value = eval(env, value)?;
            env.bind(name, value);
            Ok(Flow::Next)
        }
        Stmt::Block(stmts) => block(env, stmts),
        Stmt::Expr(expr) => {
            eval(env, expr)?;
            Ok(Flow::Next)
        }
        Stmt::Empty => Ok(Flow::Next),
    }
}

fn eval(env: &Env, expr: &Expr) -> Result<Val, String> {
    Ok(match expr {
        Expr::Str(s) => Val::Str(s.clone()),
        Expr::Num(n) => Val::Num(*n),
        Expr::Bool(b) => Val::Bool(*b),
        Expr::Null => Val::Null,
        Expr::Undefined => Val::Undefined,
        Expr::Var(name) => env.lookup(name)?,
        Expr::Object(fields) => {
            let mut map = BTreeMap::new();
            for (key, value) in fields {
                map.insert(key.clone(), eval(env, value)?);
            }
            Val::Object(map)
        }
        Expr::Not(inner) => Val::Bool(!eval(env, inner)?.truthy()),
        Expr::Neg(inner) => match eval(env, inner)? {
            Val::Num(n) => Val::Num(-n),
            other => return Err(format!("cannot negate a {}", other.type_name())),
        },
        Expr::Binary { op, lhs, rhs } => binary(env, *op, lhs, rhs)?,
        Expr::Conditional {
            cond,
            then,
            otherwise,
        } => {
            if eval(env, cond)?.truthy() {
                eval(env, then)?
            } else {
                eval(env, otherwise)?
            }
        }
        Expr::Member { target, property } => member(eval(env, target)?, property)?,
        Expr::Index { target, index } => {
            let target = eval(env, target)?;
            let index = eval(env, index)?;
            match (target, index) {
                (Val::Str(s), Val::Num(n)) => s
                    .chars()
                    .nth(n as usize)
                    .filter(|_| n >= 0.0 && n.fract() == 0.0)
                    .map(|c| Val::Str(c.to_string()))
                    .unwrap_or(Val::Undefined),
                (target, index) => member(target, &index.to_display())?,
            }
        }
        Expr::Call {
            target,
            method,
            args,
        } => {
            let target = eval(env, target)?;
            let mut values = Vec::with_capacity(args.len());
            for arg in args {
                values.push(eval(env, arg)?);
            }
            call_method(target, method, &values)?
        }
    })
}

fn binary(env: &Env, op: BinOp, lhs: &Expr, rhs: &Expr) -> Result<Val, String> {
    // short-circuit before evaluating the right side
    match op {
        BinOp::And => {
            let left = eval(env, lhs)?;
            return if left.truthy() { eval(env, rhs) } else { Ok(left) };
        }
        BinOp::Or => {
            let left = eval(env, lhs)?;
            return if left.truthy() { Ok(left) } else { eval(env, rhs) };
        }
        _ => {}
    }

    let left = eval(env, lhs)?;
    let right = eval(env, rhs)?;
    Ok(match op {
        BinOp::StrictEq => Val::Bool(strict_eq(&left, &right)),
        BinOp::StrictNe => Val::Bool(!strict_eq(&left, &right)),
        BinOp::LooseEq => Val::Bool(loose_eq(&left, &right)),
        BinOp::LooseNe => Val::Bool(!loose_eq(&left, &right)),
        BinOp::Add => match (&left, &right) {
            (Val::Num(a), Val::Num(b)) => Val::Num(a + b),
            _ => Val::Str(format!("{}{}", left.to_display(), right.to_display())),
        },
        BinOp::And | BinOp::Or => right,
    })
}

fn strict_eq(a: &Val, b: &Val) -> bool {
    match (a, b) {
        // objects never compare equal by identity here
        (Val::Object(_), Val::Object(_)) => false,
        _ => a == b,
    }
}

fn loose_eq(a: &Val, b: &Val) -> bool {
    match (a, b) {
        (Val::Null | Val::Undefined, Val::Null | Val::Undefined) => true,
        _ => strict_eq(a, b),
    }
}

fn member(target: Val, property: &str) -> Result<Val, String> {
    match target {
        Val::Object(mut fields) => Ok(fields.remove(property).unwrap_or(Val::Undefined)),
        Val::Str(s) if property == "length" => Ok(Val::Num(s.chars().count() as f64)),
        Val::Str(_) => Ok(Val::Undefined),
        Val::Undefined | Val::Null => Err(format!(
            "cannot read property `{}` of {}",
            property,
            target.type_name()
        )),
        _ => Ok(Val::Undefined),
    }
}

fn call_method(target: Val, method: &str, args: &[Val]) -> Result<Val, String> {
    let s = match target {
        Val::Str(s) => s,
        other => return Err(format!("`{}` is not a function on {}", method, other.type_name())),
    };
    let arg_str = |i: usize| -> String { args.get(i).map(Val::to_display).unwrap_or_default() };

    Ok(match method {
        "startsWith" => Val::Bool(s.starts_with(&arg_str(0))),
        "endsWith" => Val::Bool(s.ends_with(&arg_str(0))),
        "includes" => Val::Bool(s.contains(&arg_str(0))),
        "trim" => Val::Str(s.trim().to_string()),
        "toLowerCase" => Val::Str(s.to_lowercase()),
        "toUpperCase" => Val::Str(s.to_uppercase()),
        "replace" => Val::Str(s.replacen(&arg_str(0), &arg_str(1), 1)),
        "slice" => {
            let chars: Vec<char> = s.chars().collect();
            let len = chars.len() as i64;
            let clamp = |v: Option<&Val>, default: i64| -> i64 {
                match v {
                    Some(Val::Num(n)) => {
                        let n = *n as i64;
                        if n < 0 {
                            (len + n).max(0)
                        } else {
                            n.min(len)
                        }
                    }
                    _ => default,
                }
            };
            let start = clamp(args.first(), 0);
            let end = clamp(args.get(1), len);
            if start >= end {
                Val::Str(String::new())
            } else {
                Val::Str(chars[start as usize..end as usize].iter().collect())
            }
        }
        other => return Err(format!("unsupported string method `{}`", other)),
    })
}
