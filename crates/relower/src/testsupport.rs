//! A deliberately small reference evaluator used by pass tests to check
//! that a rewrite preserved the program's value. It implements just the
//! slice of target semantics the fixtures exercise, including the two
//! scoping rules the repairs hinge on: `=` rebinds within the current
//! block, and bindings made inside a conditional branch do not escape it.

use std::collections::HashMap;

use crate::ast::{Clause, Expr, Literal, Pattern};

#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Int(i64),
    Bool(bool),
    Atom(String),
    Str(String),
    Nil,
    Tuple(Vec<Value>),
    List(Vec<Value>),
    Closure(Vec<Clause>, Env),
}

pub type Env = HashMap<String, Value>;

pub fn eval_expr(expr: &Expr) -> Result<Value, String> {
    let mut env = Env::new();
    eval(expr, &mut env)
}

fn eval(expr: &Expr, env: &mut Env) -> Result<Value, String> {
    match expr {
        Expr::Var { name, .. } => env
            .get(name)
            .cloned()
            .ok_or_else(|| format!("unbound variable {name}")),
        Expr::Lit { value, .. } => Ok(eval_literal(value)),
        Expr::Tuple { items, .. } => Ok(Value::Tuple(eval_all(items, env)?)),
        Expr::List { items, .. } => Ok(Value::List(eval_all(items, env)?)),
        Expr::Block { items, .. } => {
            let mut result = Value::Nil;
            for item in items {
                result = eval(item, env)?;
            }
            Ok(result)
        }
        Expr::BinOp {
            op, left, right, ..
        } if op == "=" => {
            let value = eval(right, env)?;
            bind_pattern_expr(left, &value, env)?;
            Ok(value)
        }
        Expr::BinOp {
            op, left, right, ..
        } => {
            let left = eval(left, env)?;
            let right = eval(right, env)?;
            eval_binop(op, left, right)
        }
        Expr::If {
            negated,
            cond,
            then_branch,
            else_branch,
            ..
        } => {
            let mut taken = truthy(&eval(cond, env)?);
            if *negated {
                taken = !taken;
            }
            // Branch bindings stay in the branch.
            let mut branch_env = env.clone();
            if taken {
                eval(then_branch, &mut branch_env)
            } else {
                match else_branch {
                    Some(else_branch) => eval(else_branch, &mut branch_env),
                    None => Ok(Value::Nil),
                }
            }
        }
        Expr::Case {
            scrutinee, clauses, ..
        } => {
            let value = eval(scrutinee, env)?;
            for clause in clauses {
                let mut branch_env = env.clone();
                let [pattern] = &clause.patterns[..] else {
                    return Err("case clause must have one pattern".to_string());
                };
                if !match_pattern(pattern, &value, &mut branch_env) {
                    continue;
                }
                if let Some(guard) = &clause.guard {
                    if !truthy(&eval(guard, &mut branch_env)?) {
                        continue;
                    }
                }
                return eval(&clause.body, &mut branch_env);
            }
            Err("no case clause matched".to_string())
        }
        Expr::Fun { clauses, .. } => Ok(Value::Closure(clauses.clone(), env.clone())),
        Expr::RemoteCall {
            module, name, args, ..
        } => {
            let values = eval_all(args, env)?;
            eval_remote(module, name, values)
        }
        other => Err(format!("unsupported expression in test eval: {other:?}")),
    }
}

fn eval_all(items: &[Expr], env: &mut Env) -> Result<Vec<Value>, String> {
    items.iter().map(|item| eval(item, env)).collect()
}

fn eval_literal(value: &Literal) -> Value {
    match value {
        Literal::Atom(name) => Value::Atom(name.clone()),
        Literal::Str(text) => Value::Str(text.clone()),
        Literal::Int(n) => Value::Int(*n),
        Literal::Float(_) => Value::Nil,
        Literal::Bool(b) => Value::Bool(*b),
        Literal::Nil => Value::Nil,
    }
}

fn eval_binop(op: &str, left: Value, right: Value) -> Result<Value, String> {
    match (op, &left, &right) {
        ("==", _, _) => Ok(Value::Bool(left == right)),
        ("!=", _, _) => Ok(Value::Bool(left != right)),
        ("+", Value::Int(a), Value::Int(b)) => Ok(Value::Int(a + b)),
        ("-", Value::Int(a), Value::Int(b)) => Ok(Value::Int(a - b)),
        ("*", Value::Int(a), Value::Int(b)) => Ok(Value::Int(a * b)),
        (">", Value::Int(a), Value::Int(b)) => Ok(Value::Bool(a > b)),
        ("<", Value::Int(a), Value::Int(b)) => Ok(Value::Bool(a < b)),
        _ => Err(format!("unsupported operator {op} on {left:?} / {right:?}")),
    }
}

fn truthy(value: &Value) -> bool {
    !matches!(value, Value::Bool(false) | Value::Nil)
}

fn bind_pattern_expr(target: &Expr, value: &Value, env: &mut Env) -> Result<(), String> {
    match (target, value) {
        (Expr::Var { name, .. }, _) => {
            env.insert(name.clone(), value.clone());
            Ok(())
        }
        (Expr::Tuple { items, .. }, Value::Tuple(values)) if items.len() == values.len() => {
            for (item, value) in items.iter().zip(values) {
                bind_pattern_expr(item, value, env)?;
            }
            Ok(())
        }
        _ => Err("unsupported match target in test eval".to_string()),
    }
}

fn match_pattern(pattern: &Pattern, value: &Value, env: &mut Env) -> bool {
    match (pattern, value) {
        (Pattern::Wildcard { .. }, _) => true,
        (Pattern::Var { name, .. }, _) => {
            env.insert(name.clone(), value.clone());
            true
        }
        (Pattern::Lit { value: lit, .. }, _) => eval_literal(lit) == *value,
        (Pattern::Tuple { items, .. }, Value::Tuple(values)) => {
            items.len() == values.len()
                && items
                    .iter()
                    .zip(values)
                    .all(|(item, value)| match_pattern(item, value, env))
        }
        _ => false,
    }
}

fn eval_remote(module: &str, name: &str, mut args: Vec<Value>) -> Result<Value, String> {
    match (module, name, args.len()) {
        ("Enum", "each", 2) => {
            let fun = args.pop().expect("arity checked");
            let Value::List(items) = args.pop().expect("arity checked") else {
                return Err("Enum.each expects a list".to_string());
            };
            for item in items {
                apply(&fun, vec![item])?;
            }
            Ok(Value::Atom("ok".to_string()))
        }
        ("Enum", "reduce_while", 3) => {
            let fun = args.pop().expect("arity checked");
            let mut acc = args.pop().expect("arity checked");
            let Value::List(items) = args.pop().expect("arity checked") else {
                return Err("Enum.reduce_while expects a list".to_string());
            };
            for item in items {
                let step = apply(&fun, vec![item, acc.clone()])?;
                let Value::Tuple(pair) = step else {
                    return Err("reduce_while step must be a pair".to_string());
                };
                let [tag, next] = &pair[..] else {
                    return Err("reduce_while step must be a pair".to_string());
                };
                match tag {
                    Value::Atom(tag) if tag == "cont" => acc = next.clone(),
                    Value::Atom(tag) if tag == "halt" => return Ok(next.clone()),
                    _ => return Err("reduce_while step must be cont or halt".to_string()),
                }
            }
            Ok(acc)
        }
        _ => Err(format!("unsupported remote call {module}.{name}")),
    }
}

fn apply(fun: &Value, args: Vec<Value>) -> Result<Value, String> {
    let Value::Closure(clauses, captured) = fun else {
        return Err("not a function".to_string());
    };
    for clause in clauses {
        if clause.patterns.len() != args.len() {
            continue;
        }
        let mut env = captured.clone();
        if !clause
            .patterns
            .iter()
            .zip(&args)
            .all(|(pattern, arg)| match_pattern(pattern, arg, &mut env))
        {
            continue;
        }
        if let Some(guard) = &clause.guard {
            if !truthy(&eval(guard, &mut env)?) {
                continue;
            }
        }
        return eval(&clause.body, &mut env);
    }
    Err("no function clause matched".to_string())
}
