//! Accumulator threading repair. A lowered `Enum.reduce_while` fold
//! sometimes reassigns the accumulator's names inside a conditional
//! branch instead of threading the update through the returned
//! `{:cont, acc}` pair; in the target runtime such a rebinding never
//! escapes the branch, so the update is silently lost. The repair erases
//! those assignments and splices their right-hand sides into the step
//! tuple. Assignments inside a branch that already constructs its own
//! `{:cont, _}`/`{:halt, _}` pair are part of the explicit result path
//! and stay untouched, otherwise the same update would apply twice.

use std::collections::{BTreeMap, BTreeSet};

use crate::analysis::{contains_step_literal, is_step_atom};
use crate::ast::{Clause, Expr, FunDef, Literal, Pattern};
use crate::visit::{map_children, rewrite_expr};

pub fn rethread_fun(fun: &FunDef) -> Option<FunDef> {
    let rewritten: Vec<Option<Clause>> = fun
        .clauses
        .iter()
        .map(|clause| {
            rewrite_expr(&clause.body, &mut rethread_node).map(|body| Clause {
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

fn rethread_node(node: &Expr) -> Option<Expr> {
    let Expr::RemoteCall {
        meta,
        module,
        name,
        args,
    } = node
    else {
        return None;
    };
    if module != "Enum" || name != "reduce_while" || args.len() != 3 {
        return None;
    }
    let Expr::Fun {
        meta: fun_meta,
        clauses,
    } = &args[2]
    else {
        return None;
    };
    let rewritten: Vec<Option<Clause>> = clauses.iter().map(repair_fold_clause).collect();
    if rewritten.iter().all(Option::is_none) {
        return None;
    }
    Some(Expr::RemoteCall {
        meta: meta.clone(),
        module: module.clone(),
        name: name.clone(),
        args: vec![
            args[0].clone(),
            args[1].clone(),
            Expr::Fun {
                meta: fun_meta.clone(),
                clauses: clauses
                    .iter()
                    .zip(rewritten)
                    .map(|(clause, new)| new.unwrap_or_else(|| clause.clone()))
                    .collect(),
            },
        ],
    })
}

struct Accumulator {
    names: Vec<String>,
    single: bool,
}

/// Accumulator names come from the fold function's second parameter: a
/// plain variable, or a tuple of variables. Anything else is not a shape
/// this repair understands.
fn accumulator_of(pattern: &Pattern) -> Option<Accumulator> {
    match pattern {
        Pattern::Var { name, .. } => Some(Accumulator {
            names: vec![name.clone()],
            single: true,
        }),
        Pattern::Tuple { items, .. } => {
            let mut names = Vec::with_capacity(items.len());
            for item in items {
                let Pattern::Var { name, .. } = item else {
                    return None;
                };
                names.push(name.clone());
            }
            Some(Accumulator {
                names,
                single: false,
            })
        }
        _ => None,
    }
}

struct ThreadState {
    pending: BTreeMap<String, Expr>,
    spliced: BTreeSet<String>,
    conflicted: bool,
}

fn repair_fold_clause(clause: &Clause) -> Option<Clause> {
    let [_, acc_pattern] = &clause.patterns[..] else {
        return None;
    };
    let acc = accumulator_of(acc_pattern)?;
    let mut state = ThreadState {
        pending: BTreeMap::new(),
        spliced: BTreeSet::new(),
        conflicted: false,
    };
    let in_step_branch = contains_step_literal(&clause.body);
    let body = thread_expr(&clause.body, &acc, in_step_branch, &mut state)?;
    // Total-pass guarantee: if an erased update never reached a step
    // tuple, or two sibling branches pended different updates for the
    // same name, the rewrite would corrupt a path; leave the clause alone.
    if state.conflicted {
        return None;
    }
    if state
        .pending
        .keys()
        .any(|name| !state.spliced.contains(name))
    {
        return None;
    }
    Some(Clause {
        patterns: clause.patterns.clone(),
        guard: clause.guard.clone(),
        body,
    })
}

fn thread_expr(
    expr: &Expr,
    acc: &Accumulator,
    in_step_branch: bool,
    state: &mut ThreadState,
) -> Option<Expr> {
    match expr {
        Expr::Tuple { meta, items } if is_step_pair(items) => {
            if state.pending.is_empty() {
                return None;
            }
            let spliced = splice_acc_expr(&items[1], acc, state)?;
            Some(Expr::Tuple {
                meta: meta.clone(),
                items: vec![items[0].clone(), spliced],
            })
        }
        Expr::Block { meta, items } => {
            let mut changed = false;
            let mut out = Vec::with_capacity(items.len());
            for item in items {
                if !in_step_branch {
                    if let Some((name, update)) = acc_assignment(item, acc) {
                        state.pending.insert(name.to_string(), update.clone());
                        changed = true;
                        continue;
                    }
                }
                match thread_expr(item, acc, in_step_branch, state) {
                    Some(new) => {
                        changed = true;
                        out.push(new);
                    }
                    None => out.push(item.clone()),
                }
            }
            if !changed {
                return None;
            }
            Some(Expr::Block {
                meta: meta.clone(),
                items: out,
            })
        }
        Expr::If {
            meta,
            negated,
            cond,
            then_branch,
            else_branch,
        } => {
            // Each branch starts from the updates pending before the
            // conditional; an update pended in one branch must not splice
            // into a sibling branch it never runs together with.
            let snapshot = state.pending.clone();
            let new_then = thread_branch(then_branch, acc, snapshot.clone(), state);
            let new_else = else_branch
                .as_deref()
                .map(|else_branch| thread_branch(else_branch, acc, snapshot.clone(), state));
            if new_then.is_none() && !matches!(new_else, Some(Some(_))) {
                return None;
            }
            Some(Expr::If {
                meta: meta.clone(),
                negated: *negated,
                cond: cond.clone(),
                then_branch: Box::new(new_then.unwrap_or_else(|| (**then_branch).clone())),
                else_branch: match (else_branch, new_else) {
                    (_, Some(Some(new))) => Some(Box::new(new)),
                    (Some(orig), _) => Some(orig.clone()),
                    (None, _) => None,
                },
            })
        }
        Expr::Case {
            meta,
            scrutinee,
            clauses,
        } => {
            let snapshot = state.pending.clone();
            let rewritten: Vec<Option<Clause>> = clauses
                .iter()
                .map(|clause| {
                    thread_branch(&clause.body, acc, snapshot.clone(), state).map(|body| Clause {
                        patterns: clause.patterns.clone(),
                        guard: clause.guard.clone(),
                        body,
                    })
                })
                .collect();
            if rewritten.iter().all(Option::is_none) {
                return None;
            }
            Some(Expr::Case {
                meta: meta.clone(),
                scrutinee: scrutinee.clone(),
                clauses: clauses
                    .iter()
                    .zip(rewritten)
                    .map(|(clause, new)| new.unwrap_or_else(|| clause.clone()))
                    .collect(),
            })
        }
        Expr::Cond { meta, arms } => {
            let snapshot = state.pending.clone();
            let rewritten: Vec<Option<Expr>> = arms
                .iter()
                .map(|arm| thread_branch(&arm.body, acc, snapshot.clone(), state))
                .collect();
            if rewritten.iter().all(Option::is_none) {
                return None;
            }
            Some(Expr::Cond {
                meta: meta.clone(),
                arms: arms
                    .iter()
                    .zip(rewritten)
                    .map(|(arm, body)| crate::ast::CondArm {
                        condition: arm.condition.clone(),
                        body: body.unwrap_or_else(|| arm.body.clone()),
                    })
                    .collect(),
            })
        }
        // Pending updates must not leak across a nested function's scope
        // boundary; nested folds are visited as their own rewrite sites.
        Expr::Fun { .. } => None,
        other => {
            if let Some((name, update)) = acc_assignment(other, acc) {
                // A branch made of just the assignment: erase it whole.
                if in_step_branch {
                    return None;
                }
                state.pending.insert(name.to_string(), update.clone());
                return Some(Expr::nil());
            }
            map_children(other, &mut |child| {
                thread_expr(child, acc, in_step_branch, state)
            })
        }
    }
}

fn acc_assignment<'a>(expr: &'a Expr, acc: &Accumulator) -> Option<(&'a str, &'a Expr)> {
    let Expr::BinOp {
        op, left, right, ..
    } = expr
    else {
        return None;
    };
    if op != "=" {
        return None;
    }
    let Expr::Var { name, .. } = &**left else {
        return None;
    };
    if !acc.names.contains(name) {
        return None;
    }
    Some((name, right))
}

/// Rewrite one conditional branch with its own pending set, then fold the
/// branch's pendings and splices back into the parent so they apply to
/// whatever follows the conditional. Two sibling branches pending
/// different updates for the same name cannot both be honored by one
/// splice; that marks the clause as conflicted and no repair is made.
fn thread_branch(
    branch: &Expr,
    acc: &Accumulator,
    pending: BTreeMap<String, Expr>,
    parent: &mut ThreadState,
) -> Option<Expr> {
    let mut local = ThreadState {
        pending,
        spliced: BTreeSet::new(),
        conflicted: false,
    };
    let result = thread_expr(branch, acc, contains_step_literal(branch), &mut local);
    for (name, update) in local.pending {
        match parent.pending.get(&name) {
            Some(previous) if *previous != update => parent.conflicted = true,
            _ => {
                parent.pending.insert(name, update);
            }
        }
    }
    parent.spliced.extend(local.spliced);
    parent.conflicted |= local.conflicted;
    result
}

fn is_step_pair(items: &[Expr]) -> bool {
    matches!(
        items,
        [Expr::Lit { value: Literal::Atom(tag), .. }, _] if is_step_atom(tag)
    )
}

/// Replace the stale accumulator expression with the pending updates:
/// positionally for a tuple-shaped accumulator, wholesale for a
/// single-variable one.
fn splice_acc_expr(acc_expr: &Expr, acc: &Accumulator, state: &mut ThreadState) -> Option<Expr> {
    if acc.single {
        let name = &acc.names[0];
        let update = state.pending.get(name)?.clone();
        state.spliced.insert(name.clone());
        return Some(update);
    }
    let Expr::Tuple { meta, items } = acc_expr else {
        return None;
    };
    if items.len() != acc.names.len() {
        return None;
    }
    let mut changed = false;
    let out: Vec<Expr> = acc
        .names
        .iter()
        .zip(items)
        .map(|(name, item)| match state.pending.get(name) {
            Some(update) => {
                state.spliced.insert(name.clone());
                changed = true;
                update.clone()
            }
            None => item.clone(),
        })
        .collect();
    if !changed {
        return None;
    }
    Some(Expr::Tuple {
        meta: meta.clone(),
        items: out,
    })
}
