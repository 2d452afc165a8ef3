use crate::ast::{Clause, CondArm, Expr, Generator, MapEntry};

/// A pass is a partial function over node shapes: `Some(new)` rewrites the
/// node, `None` leaves it untouched. The substrate supplies the recursive
/// descent for every shape a pass does not care about.
pub type Pass<'p> = dyn FnMut(&Expr) -> Option<Expr> + 'p;

/// Visit every immediate child expression of `expr`, including clause
/// guards and bodies. Every `Expr` variant must be listed here: a kind
/// missing from this match would make its children invisible to every
/// pass, so no wildcard arm.
pub fn for_each_child<'a>(expr: &'a Expr, f: &mut dyn FnMut(&'a Expr)) {
    match expr {
        Expr::Var { .. } | Expr::Lit { .. } | Expr::Pin { .. } | Expr::Raw { .. } => {}
        Expr::Tuple { items, .. } | Expr::List { items, .. } | Expr::Block { items, .. } => {
            for item in items {
                f(item);
            }
        }
        Expr::MapLit { entries, .. } => {
            for entry in entries {
                f(&entry.key);
                f(&entry.value);
            }
        }
        Expr::StructLit { entries, .. } => {
            for entry in entries {
                f(&entry.key);
                f(&entry.value);
            }
        }
        Expr::Call { args, .. } | Expr::RemoteCall { args, .. } => {
            for arg in args {
                f(arg);
            }
        }
        Expr::BinOp { left, right, .. } => {
            f(left);
            f(right);
        }
        Expr::UnOp { operand, .. } => f(operand),
        Expr::If {
            cond,
            then_branch,
            else_branch,
            ..
        } => {
            f(cond);
            f(then_branch);
            if let Some(else_branch) = else_branch {
                f(else_branch);
            }
        }
        Expr::Case {
            scrutinee, clauses, ..
        } => {
            f(scrutinee);
            for clause in clauses {
                if let Some(guard) = &clause.guard {
                    f(guard);
                }
                f(&clause.body);
            }
        }
        Expr::Cond { arms, .. } => {
            for arm in arms {
                f(&arm.condition);
                f(&arm.body);
            }
        }
        Expr::Fun { clauses, .. } => {
            for clause in clauses {
                if let Some(guard) = &clause.guard {
                    f(guard);
                }
                f(&clause.body);
            }
        }
        Expr::For {
            generators,
            filters,
            body,
            ..
        } => {
            for generator in generators {
                f(&generator.source);
            }
            for filter in filters {
                f(filter);
            }
            f(body);
        }
        Expr::Try {
            body,
            rescue_clauses,
            catch_clauses,
            else_clauses,
            after,
            ..
        } => {
            f(body);
            for clause in rescue_clauses
                .iter()
                .chain(catch_clauses)
                .chain(else_clauses)
            {
                if let Some(guard) = &clause.guard {
                    f(guard);
                }
                f(&clause.body);
            }
            if let Some(after) = after {
                f(after);
            }
        }
        Expr::FieldAccess { base, .. } => f(base),
    }
}

/// Apply `pass` bottom-up over every reachable node, rebuilding only the
/// parents whose children actually changed. Returns `None` iff nothing in
/// the whole subtree changed, so callers keep the original tree shared.
pub fn rewrite_expr(expr: &Expr, pass: &mut Pass) -> Option<Expr> {
    let rebuilt = map_children(expr, &mut |child| rewrite_expr(child, pass));
    match pass(rebuilt.as_ref().unwrap_or(expr)) {
        Some(new) => Some(new),
        None => rebuilt,
    }
}

/// Apply `f` once to each immediate child of `expr` (one level, not
/// recursive), rebuilding the parent only when some child changed. Passes
/// that thread their own environment recurse through this instead of
/// `rewrite_expr`.
pub fn map_children(expr: &Expr, f: &mut Pass) -> Option<Expr> {
    match expr {
        Expr::Var { .. } | Expr::Lit { .. } | Expr::Pin { .. } | Expr::Raw { .. } => None,
        Expr::Tuple { meta, items } => rewrite_items(items, f).map(|items| Expr::Tuple {
            meta: meta.clone(),
            items,
        }),
        Expr::List { meta, items } => rewrite_items(items, f).map(|items| Expr::List {
            meta: meta.clone(),
            items,
        }),
        Expr::Block { meta, items } => rewrite_items(items, f).map(|items| Expr::Block {
            meta: meta.clone(),
            items,
        }),
        Expr::MapLit { meta, entries } => {
            rewrite_entries(entries, f).map(|entries| Expr::MapLit {
                meta: meta.clone(),
                entries,
            })
        }
        Expr::StructLit {
            meta,
            name,
            entries,
        } => rewrite_entries(entries, f).map(|entries| Expr::StructLit {
            meta: meta.clone(),
            name: name.clone(),
            entries,
        }),
        Expr::Call { meta, name, args } => rewrite_items(args, f).map(|args| Expr::Call {
            meta: meta.clone(),
            name: name.clone(),
            args,
        }),
        Expr::RemoteCall {
            meta,
            module,
            name,
            args,
        } => rewrite_items(args, f).map(|args| Expr::RemoteCall {
            meta: meta.clone(),
            module: module.clone(),
            name: name.clone(),
            args,
        }),
        Expr::BinOp {
            meta,
            op,
            left,
            right,
        } => {
            let new_left = f(left);
            let new_right = f(right);
            if new_left.is_none() && new_right.is_none() {
                return None;
            }
            Some(Expr::BinOp {
                meta: meta.clone(),
                op: op.clone(),
                left: Box::new(new_left.unwrap_or_else(|| (**left).clone())),
                right: Box::new(new_right.unwrap_or_else(|| (**right).clone())),
            })
        }
        Expr::UnOp { meta, op, operand } => f(operand).map(|operand| Expr::UnOp {
            meta: meta.clone(),
            op: op.clone(),
            operand: Box::new(operand),
        }),
        Expr::If {
            meta,
            negated,
            cond,
            then_branch,
            else_branch,
        } => {
            let new_cond = f(cond);
            let new_then = f(then_branch);
            let new_else = else_branch
                .as_deref()
                .map(|else_branch| f(else_branch));
            if new_cond.is_none() && new_then.is_none() && !matches!(new_else, Some(Some(_))) {
                return None;
            }
            Some(Expr::If {
                meta: meta.clone(),
                negated: *negated,
                cond: Box::new(new_cond.unwrap_or_else(|| (**cond).clone())),
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
            let new_scrutinee = f(scrutinee);
            let new_clauses = rewrite_clauses(clauses, f);
            if new_scrutinee.is_none() && new_clauses.is_none() {
                return None;
            }
            Some(Expr::Case {
                meta: meta.clone(),
                scrutinee: Box::new(new_scrutinee.unwrap_or_else(|| (**scrutinee).clone())),
                clauses: new_clauses.unwrap_or_else(|| clauses.clone()),
            })
        }
        Expr::Cond { meta, arms } => {
            let rewritten: Vec<(Option<Expr>, Option<Expr>)> = arms
                .iter()
                .map(|arm| (f(&arm.condition), f(&arm.body)))
                .collect();
            if rewritten
                .iter()
                .all(|(condition, body)| condition.is_none() && body.is_none())
            {
                return None;
            }
            Some(Expr::Cond {
                meta: meta.clone(),
                arms: arms
                    .iter()
                    .zip(rewritten)
                    .map(|(arm, (condition, body))| CondArm {
                        condition: condition.unwrap_or_else(|| arm.condition.clone()),
                        body: body.unwrap_or_else(|| arm.body.clone()),
                    })
                    .collect(),
            })
        }
        Expr::Fun { meta, clauses } => rewrite_clauses(clauses, f).map(|clauses| Expr::Fun {
            meta: meta.clone(),
            clauses,
        }),
        Expr::For {
            meta,
            generators,
            filters,
            body,
        } => {
            let new_sources: Vec<Option<Expr>> = generators
                .iter()
                .map(|generator| f(&generator.source))
                .collect();
            let new_filters = rewrite_items(filters, f);
            let new_body = f(body);
            if new_sources.iter().all(Option::is_none)
                && new_filters.is_none()
                && new_body.is_none()
            {
                return None;
            }
            Some(Expr::For {
                meta: meta.clone(),
                generators: generators
                    .iter()
                    .zip(new_sources)
                    .map(|(generator, source)| Generator {
                        pattern: generator.pattern.clone(),
                        source: source.unwrap_or_else(|| generator.source.clone()),
                    })
                    .collect(),
                filters: new_filters.unwrap_or_else(|| filters.clone()),
                body: Box::new(new_body.unwrap_or_else(|| (**body).clone())),
            })
        }
        Expr::Try {
            meta,
            body,
            rescue_clauses,
            catch_clauses,
            else_clauses,
            after,
        } => {
            let new_body = f(body);
            let new_rescue = rewrite_clauses(rescue_clauses, f);
            let new_catch = rewrite_clauses(catch_clauses, f);
            let new_else = rewrite_clauses(else_clauses, f);
            let new_after = after.as_deref().map(|after| f(after));
            if new_body.is_none()
                && new_rescue.is_none()
                && new_catch.is_none()
                && new_else.is_none()
                && !matches!(new_after, Some(Some(_)))
            {
                return None;
            }
            Some(Expr::Try {
                meta: meta.clone(),
                body: Box::new(new_body.unwrap_or_else(|| (**body).clone())),
                rescue_clauses: new_rescue.unwrap_or_else(|| rescue_clauses.clone()),
                catch_clauses: new_catch.unwrap_or_else(|| catch_clauses.clone()),
                else_clauses: new_else.unwrap_or_else(|| else_clauses.clone()),
                after: match (after, new_after) {
                    (_, Some(Some(new))) => Some(Box::new(new)),
                    (Some(orig), _) => Some(orig.clone()),
                    (None, _) => None,
                },
            })
        }
        Expr::FieldAccess { meta, base, field } => {
            f(base).map(|base| Expr::FieldAccess {
                meta: meta.clone(),
                base: Box::new(base),
                field: field.clone(),
            })
        }
    }
}

fn rewrite_items(items: &[Expr], f: &mut Pass) -> Option<Vec<Expr>> {
    let rewritten: Vec<Option<Expr>> = items
        .iter()
        .map(|item| f(item))
        .collect();
    if rewritten.iter().all(Option::is_none) {
        return None;
    }
    Some(
        items
            .iter()
            .zip(rewritten)
            .map(|(item, new)| new.unwrap_or_else(|| item.clone()))
            .collect(),
    )
}

fn rewrite_entries(entries: &[MapEntry], f: &mut Pass) -> Option<Vec<MapEntry>> {
    let rewritten: Vec<(Option<Expr>, Option<Expr>)> = entries
        .iter()
        .map(|entry| (f(&entry.key), f(&entry.value)))
        .collect();
    if rewritten
        .iter()
        .all(|(key, value)| key.is_none() && value.is_none())
    {
        return None;
    }
    Some(
        entries
            .iter()
            .zip(rewritten)
            .map(|(entry, (key, value))| MapEntry {
                key: key.unwrap_or_else(|| entry.key.clone()),
                value: value.unwrap_or_else(|| entry.value.clone()),
            })
            .collect(),
    )
}

fn rewrite_clause(clause: &Clause, f: &mut Pass) -> Option<Clause> {
    let new_guard = clause.guard.as_ref().map(|guard| f(guard));
    let new_body = f(&clause.body);
    if !matches!(new_guard, Some(Some(_))) && new_body.is_none() {
        return None;
    }
    Some(Clause {
        patterns: clause.patterns.clone(),
        guard: match (&clause.guard, new_guard) {
            (_, Some(Some(new))) => Some(new),
            (Some(orig), _) => Some(orig.clone()),
            (None, _) => None,
        },
        body: new_body.unwrap_or_else(|| clause.body.clone()),
    })
}

fn rewrite_clauses(clauses: &[Clause], f: &mut Pass) -> Option<Vec<Clause>> {
    let rewritten: Vec<Option<Clause>> = clauses
        .iter()
        .map(|clause| rewrite_clause(clause, f))
        .collect();
    if rewritten.iter().all(Option::is_none) {
        return None;
    }
    Some(
        clauses
            .iter()
            .zip(rewritten)
            .map(|(clause, new)| new.unwrap_or_else(|| clause.clone()))
            .collect(),
    )
}
