//! Early-return normalization. Lowering a loop that returns from the
//! enclosing function produces `Enum.each(coll, fn x -> if cond do value
//! end end)`: the "return" only ends the current element, and the
//! statements after the loop still run. The repair turns the iteration
//! into an `Enum.reduce_while` carrying a no-return sentinel, and
//! dispatches on its result: a `{:__return__, value}` pair short-circuits
//! the function, anything else falls through to the original remainder.

use crate::ast::{Clause, Expr, FunDef, Literal, Meta, Pattern};
use crate::visit::{for_each_child, map_children};

const NO_RETURN_SENTINEL: &str = "__no_return__";
const RETURN_MARK: &str = "__return__";
const ACC_VAR: &str = "__acc__";
const VALUE_VAR: &str = "__value__";

pub fn normalize_fun(fun: &FunDef) -> Option<FunDef> {
    let rewritten: Vec<Option<Clause>> = fun
        .clauses
        .iter()
        .map(|clause| {
            let flags_present = has_provenance_flags(&clause.body);
            normalize_expr(&clause.body, flags_present).map(|body| Clause {
                patterns: clause.patterns.clone(),
                guard: clause.guard.clone(),
                body,
            })
        })
        .collect();
    if rewritten.iter().all(Option::is_none) {
        return None;
    }
    Some(FunDef {
        name: fun.name.clone(),
        clauses: fun
            .clauses
            .iter()
            .zip(rewritten)
            .map(|(clause, new)| new.unwrap_or_else(|| clause.clone()))
            .collect(),
    })
}

/// Top-down descent. The iteration match must run at the statement level
/// of the sequence that owns the remainder, before any descent: rewriting
/// an inner wrapper block first would cut the remainder off from its loop
/// and leave the fallthrough arm empty.
fn normalize_expr(expr: &Expr, flags_present: bool) -> Option<Expr> {
    match expr {
        Expr::Block { meta, items } => match rewrite_sequence(items, flags_present) {
            Some(items) => Some(Expr::Block {
                meta: meta.clone(),
                items,
            }),
            None => map_children(expr, &mut |child| normalize_expr(child, flags_present)),
        },
        // A clause body may be the bare iteration statement, with no block
        // around it.
        _ => match match_early_return_loop(expr, flags_present) {
            Some(lp) => Some(build_dispatch(&lp, &[], flags_present)),
            None => map_children(expr, &mut |child| normalize_expr(child, flags_present)),
        },
    }
}

/// Rewrite the first early-return iteration found in a statement
/// sequence; the remainder of the sequence moves into the dispatch's
/// fallthrough arm and is re-normalized on the way.
fn rewrite_sequence(items: &[Expr], flags_present: bool) -> Option<Vec<Expr>> {
    for (index, item) in items.iter().enumerate() {
        if let Some((leading, lp)) = split_iteration(item, flags_present) {
            let tail = &items[index + 1..];
            let dispatch = build_dispatch(&lp, tail, flags_present);
            let mut out: Vec<Expr> = Vec::with_capacity(index + leading.len() + 1);
            for kept in items[..index].iter().chain(&leading) {
                out.push(normalize_expr(kept, flags_present).unwrap_or_else(|| kept.clone()));
            }
            out.push(dispatch);
            return Some(out);
        }
    }
    None
}

struct EarlyReturnLoop<'a> {
    meta: &'a Meta,
    collection: &'a Expr,
    param: &'a Pattern,
    negated: bool,
    cond: &'a Expr,
    value: &'a Expr,
}

/// An early-return iteration either stands alone or is the last statement
/// of a wrapper block whose leading bookkeeping statements must be kept.
fn split_iteration<'a>(
    item: &'a Expr,
    flags_present: bool,
) -> Option<(Vec<Expr>, EarlyReturnLoop<'a>)> {
    if let Some(lp) = match_early_return_loop(item, flags_present) {
        return Some((Vec::new(), lp));
    }
    if let Expr::Block { items, .. } = item {
        if let Some((last, leading)) = items.split_last() {
            if let Some(lp) = match_early_return_loop(last, flags_present) {
                return Some((leading.to_vec(), lp));
            }
        }
    }
    None
}

fn match_early_return_loop(expr: &Expr, flags_present: bool) -> Option<EarlyReturnLoop> {
    let Expr::RemoteCall {
        meta,
        module,
        name,
        args,
    } = expr
    else {
        return None;
    };
    if module != "Enum" || name != "each" || args.len() != 2 {
        return None;
    }
    let Expr::Fun { clauses, .. } = &args[1] else {
        return None;
    };
    let [clause] = &clauses[..] else {
        return None;
    };
    if clause.patterns.len() != 1 || clause.guard.is_some() {
        return None;
    }
    let body = unwrap_singleton_block(&clause.body);
    let Expr::If {
        negated,
        cond,
        then_branch,
        else_branch,
        ..
    } = body
    else {
        return None;
    };
    if !alternate_is_empty(else_branch.as_deref()) {
        return None;
    }
    // Provenance is authoritative when present anywhere in the function:
    // only flagged sites rewrite then. The structural shape alone decides
    // only for trees the lowering left entirely unflagged.
    let marked = meta.loop_has_return || has_early_return_flag(then_branch);
    if flags_present && !marked {
        return None;
    }
    Some(EarlyReturnLoop {
        meta,
        collection: &args[0],
        param: &clause.patterns[0],
        negated: *negated,
        cond,
        value: then_branch,
    })
}

fn unwrap_singleton_block(expr: &Expr) -> &Expr {
    let mut current = expr;
    while let Expr::Block { items, .. } = current {
        let [only] = &items[..] else {
            break;
        };
        current = only;
    }
    current
}

fn alternate_is_empty(alternate: Option<&Expr>) -> bool {
    match alternate {
        None => true,
        Some(Expr::Lit {
            value: Literal::Nil,
            ..
        }) => true,
        Some(Expr::Block { items, .. }) => items.is_empty(),
        Some(_) => false,
    }
}

fn has_early_return_flag(expr: &Expr) -> bool {
    if expr.meta().early_return {
        return true;
    }
    let mut found = false;
    for_each_child(expr, &mut |child| {
        if !found {
            found = has_early_return_flag(child);
        }
    });
    found
}

fn has_provenance_flags(expr: &Expr) -> bool {
    if expr.meta().early_return || expr.meta().loop_has_return {
        return true;
    }
    let mut found = false;
    for_each_child(expr, &mut |child| {
        if !found {
            found = has_provenance_flags(child);
        }
    });
    found
}

fn build_dispatch(lp: &EarlyReturnLoop, tail: &[Expr], flags_present: bool) -> Expr {
    let step_body = Expr::If {
        meta: Meta::default(),
        negated: lp.negated,
        cond: Box::new(lp.cond.clone()),
        then_branch: Box::new(Expr::tuple(vec![
            Expr::atom("halt"),
            Expr::tuple(vec![Expr::atom(RETURN_MARK), lp.value.clone()]),
        ])),
        else_branch: Some(Box::new(Expr::tuple(vec![
            Expr::atom("cont"),
            Expr::var(ACC_VAR),
        ]))),
    };
    let fold = Expr::RemoteCall {
        meta: Meta::at_line(lp.meta.line),
        module: "Enum".to_string(),
        name: "reduce_while".to_string(),
        args: vec![
            lp.collection.clone(),
            Expr::atom(NO_RETURN_SENTINEL),
            Expr::Fun {
                meta: Meta::default(),
                clauses: vec![Clause {
                    patterns: vec![lp.param.clone(), Pattern::var(ACC_VAR)],
                    guard: None,
                    body: step_body,
                }],
            },
        ],
    };
    Expr::Case {
        meta: Meta::at_line(lp.meta.line),
        scrutinee: Box::new(fold),
        clauses: vec![
            Clause {
                patterns: vec![Pattern::Tuple {
                    meta: Meta::default(),
                    items: vec![Pattern::atom(RETURN_MARK), Pattern::var(VALUE_VAR)],
                }],
                guard: None,
                body: Expr::var(VALUE_VAR),
            },
            Clause {
                patterns: vec![Pattern::wildcard()],
                guard: None,
                body: remainder_body(tail, flags_present),
            },
        ],
    }
}

fn remainder_body(tail: &[Expr], flags_present: bool) -> Expr {
    match tail {
        // The value `Enum.each` itself would have produced.
        [] => Expr::atom("ok"),
        [only] => normalize_expr(only, flags_present).unwrap_or_else(|| only.clone()),
        _ => {
            let block = Expr::Block {
                meta: Meta::at_line(tail[0].meta().line),
                items: tail.to_vec(),
            };
            normalize_expr(&block, flags_present).unwrap_or(block)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testsupport::{eval_expr, Value};

    fn flagged_loop(list: Vec<i64>, compare_to: i64, returned: Expr) -> Expr {
        let mut meta = Meta::default();
        meta.loop_has_return = true;
        let mut value_meta = Meta::default();
        value_meta.early_return = true;
        let value = match returned {
            Expr::Var { name, .. } => Expr::Var {
                meta: value_meta,
                name,
            },
            other => other,
        };
        Expr::RemoteCall {
            meta,
            module: "Enum".to_string(),
            name: "each".to_string(),
            args: vec![
                Expr::List {
                    meta: Meta::default(),
                    items: list
                        .into_iter()
                        .map(|n| Expr::Lit {
                            meta: Meta::default(),
                            value: Literal::Int(n),
                        })
                        .collect(),
                },
                Expr::Fun {
                    meta: Meta::default(),
                    clauses: vec![Clause {
                        patterns: vec![Pattern::var("element")],
                        guard: None,
                        body: Expr::If {
                            meta: Meta::default(),
                            negated: false,
                            cond: Box::new(Expr::BinOp {
                                meta: Meta::default(),
                                op: "==".to_string(),
                                left: Box::new(Expr::var("element")),
                                right: Box::new(Expr::Lit {
                                    meta: Meta::default(),
                                    value: Literal::Int(compare_to),
                                }),
                            }),
                            then_branch: Box::new(value),
                            else_branch: None,
                        },
                    }],
                },
            ],
        }
    }

    fn fun_with_body(body: Expr) -> FunDef {
        FunDef {
            name: "find".to_string(),
            clauses: vec![Clause {
                patterns: vec![],
                guard: None,
                body,
            }],
        }
    }

    #[test]
    fn loop_becomes_reduce_while_dispatch() {
        let body = Expr::Block {
            meta: Meta::default(),
            items: vec![
                Expr::assign("seen", Expr::atom("start")),
                flagged_loop(vec![1, 2, 3, 4], 3, Expr::var("element")),
                Expr::atom("after"),
            ],
        };
        let fun = fun_with_body(body);
        let normalized = normalize_fun(&fun).expect("loop is rewritten");
        let Expr::Block { items, .. } = &normalized.clauses[0].body else {
            panic!("body stays a block");
        };
        assert_eq!(items.len(), 2);
        assert_eq!(items[0], Expr::assign("seen", Expr::atom("start")));
        let Expr::Case {
            scrutinee, clauses, ..
        } = &items[1]
        else {
            panic!("loop replaced by dispatch");
        };
        assert!(matches!(
            &**scrutinee,
            Expr::RemoteCall { module, name, args, .. }
                if module == "Enum" && name == "reduce_while" && args.len() == 3
        ));
        assert_eq!(clauses.len(), 2);
        assert_eq!(clauses[1].body, Expr::atom("after"));
    }

    #[test]
    fn returned_value_wins_and_remainder_never_runs() {
        // The trailing Raw statement cannot be evaluated: reaching it
        // would fail the test, which is exactly the property we want.
        let body = Expr::Block {
            meta: Meta::default(),
            items: vec![
                flagged_loop(vec![1, 2, 3, 4], 3, Expr::var("element")),
                Expr::Raw {
                    meta: Meta::default(),
                    text: "unreachable()".to_string(),
                },
            ],
        };
        let fun = fun_with_body(body);
        let normalized = normalize_fun(&fun).expect("loop is rewritten");
        let result = eval_expr(&normalized.clauses[0].body).expect("evaluates");
        assert_eq!(result, Value::Int(3));
    }

    #[test]
    fn no_match_falls_through_to_remainder() {
        let body = Expr::Block {
            meta: Meta::default(),
            items: vec![
                flagged_loop(vec![1, 2, 3, 4], 9, Expr::var("element")),
                Expr::atom("fell_through"),
            ],
        };
        let fun = fun_with_body(body);
        let normalized = normalize_fun(&fun).expect("loop is rewritten");
        let result = eval_expr(&normalized.clauses[0].body).expect("evaluates");
        assert_eq!(result, Value::Atom("fell_through".to_string()));
    }

    #[test]
    fn wrapper_block_bookkeeping_is_spliced() {
        let wrapper = Expr::Block {
            meta: Meta::default(),
            items: vec![
                Expr::assign("book", Expr::atom("keeping")),
                flagged_loop(vec![1], 1, Expr::var("element")),
            ],
        };
        let body = Expr::Block {
            meta: Meta::default(),
            items: vec![wrapper, Expr::atom("after")],
        };
        let fun = fun_with_body(body);
        let normalized = normalize_fun(&fun).expect("loop is rewritten");
        let Expr::Block { items, .. } = &normalized.clauses[0].body else {
            panic!("body stays a block");
        };
        assert_eq!(items.len(), 2);
        assert_eq!(items[0], Expr::assign("book", Expr::atom("keeping")));
        assert!(matches!(&items[1], Expr::Case { .. }));
    }

    #[test]
    fn second_early_return_in_remainder_is_also_fixed() {
        let body = Expr::Block {
            meta: Meta::default(),
            items: vec![
                flagged_loop(vec![1, 2], 9, Expr::var("element")),
                flagged_loop(vec![3, 4], 4, Expr::var("element")),
            ],
        };
        let fun = fun_with_body(body);
        let normalized = normalize_fun(&fun).expect("loops are rewritten");
        let result = eval_expr(&normalized.clauses[0].body).expect("evaluates");
        assert_eq!(result, Value::Int(4));
    }

    #[test]
    fn unflagged_loop_is_kept_when_flags_exist_elsewhere() {
        let mut unflagged = flagged_loop(vec![1], 1, Expr::var("element"));
        if let Expr::RemoteCall { meta, args, .. } = &mut unflagged {
            meta.loop_has_return = false;
            if let Expr::Fun { clauses, .. } = &mut args[1] {
                if let Expr::If { then_branch, .. } = &mut clauses[0].body {
                    if let Expr::Var { meta, .. } = &mut **then_branch {
                        meta.early_return = false;
                    }
                }
            }
        }
        let body = Expr::Block {
            meta: Meta::default(),
            items: vec![
                unflagged,
                flagged_loop(vec![2], 2, Expr::var("element")),
            ],
        };
        let fun = fun_with_body(body);
        let normalized = normalize_fun(&fun).expect("flagged loop is rewritten");
        let Expr::Block { items, .. } = &normalized.clauses[0].body else {
            panic!("body stays a block");
        };
        // First statement is still the untouched Enum.each.
        assert!(matches!(
            &items[0],
            Expr::RemoteCall { name, .. } if name == "each"
        ));
        assert!(matches!(&items[1], Expr::Case { .. }));
    }

    #[test]
    fn structural_heuristic_applies_only_without_any_flags() {
        let mut unflagged = flagged_loop(vec![1, 2], 2, Expr::var("element"));
        if let Expr::RemoteCall { meta, args, .. } = &mut unflagged {
            meta.loop_has_return = false;
            if let Expr::Fun { clauses, .. } = &mut args[1] {
                if let Expr::If { then_branch, .. } = &mut clauses[0].body {
                    if let Expr::Var { meta, .. } = &mut **then_branch {
                        meta.early_return = false;
                    }
                }
            }
        }
        let fun = fun_with_body(Expr::Block {
            meta: Meta::default(),
            items: vec![unflagged],
        });
        let normalized = normalize_fun(&fun).expect("heuristic fires on flagless trees");
        let result = eval_expr(&normalized.clauses[0].body).expect("evaluates");
        assert_eq!(result, Value::Int(2));
    }

    #[test]
    fn normalization_is_idempotent() {
        let body = Expr::Block {
            meta: Meta::default(),
            items: vec![
                flagged_loop(vec![1, 2, 3, 4], 3, Expr::var("element")),
                Expr::atom("after"),
            ],
        };
        let fun = fun_with_body(body);
        let once = normalize_fun(&fun).expect("first run rewrites");
        assert!(normalize_fun(&once).is_none());
    }

    #[test]
    fn unrelated_functions_are_shared() {
        let fun = fun_with_body(Expr::Block {
            meta: Meta::default(),
            items: vec![Expr::assign("x", Expr::nil()), Expr::var("x")],
        });
        assert!(normalize_fun(&fun).is_none());
    }
}
