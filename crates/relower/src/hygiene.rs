//! Binder hygiene repair: a lowered clause sometimes binds one name in its
//! pattern while the body references another. When exactly one referenced
//! identifier is missing a binder and exactly one binder is unused, the
//! clause is repaired by renaming the binder or aliasing it in the body.
//! Under any ambiguity the clause is returned byte-for-byte unchanged.

use std::collections::BTreeSet;

use crate::analysis::{
    accessor_only_idents, assigned_names, collect_assign_targets, scan_uses, scan_uses_into,
};
use crate::ast::{
    clause_binders, collect_pattern_binders, is_simple_ident, Clause, Expr, FunDef, Generator,
    Meta, Pattern,
};
use crate::visit::map_children;

pub fn repair_fun(fun: &FunDef) -> Option<FunDef> {
    let rewritten: Vec<Option<Clause>> = fun
        .clauses
        .iter()
        .map(|clause| {
            let mut scope = clause_binders(clause);
            walk(&clause.body, &mut scope).map(|body| Clause {
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

/// Scope-aware descent. `scope` holds every name visible at the current
/// point: enclosing parameters, outer clause binders, and earlier `=`
/// bindings in the surrounding blocks.
fn walk(expr: &Expr, scope: &mut Vec<String>) -> Option<Expr> {
    match expr {
        Expr::Block { meta, items } => {
            let before = scope.len();
            let rewritten: Vec<Option<Expr>> = items
                .iter()
                .map(|item| {
                    let new = walk(item, scope);
                    let current = new.as_ref().unwrap_or(item);
                    if let Expr::BinOp { op, left, .. } = current {
                        if op == "=" {
                            let mut targets = BTreeSet::new();
                            collect_assign_targets(left, &mut targets);
                            scope.extend(targets);
                        }
                    }
                    new
                })
                .collect();
            scope.truncate(before);
            if rewritten.iter().all(Option::is_none) {
                return None;
            }
            Some(Expr::Block {
                meta: meta.clone(),
                items: items
                    .iter()
                    .zip(rewritten)
                    .map(|(item, new)| new.unwrap_or_else(|| item.clone()))
                    .collect(),
            })
        }
        Expr::Case {
            meta,
            scrutinee,
            clauses,
        } => {
            let new_scrutinee = walk(scrutinee, scope);
            let new_clauses = walk_clauses(clauses, scope, true);
            if new_scrutinee.is_none() && new_clauses.is_none() {
                return None;
            }
            Some(Expr::Case {
                meta: meta.clone(),
                scrutinee: Box::new(new_scrutinee.unwrap_or_else(|| (**scrutinee).clone())),
                clauses: new_clauses.unwrap_or_else(|| clauses.clone()),
            })
        }
        Expr::Fun { meta, clauses } => {
            walk_clauses(clauses, scope, true).map(|clauses| Expr::Fun {
                meta: meta.clone(),
                clauses,
            })
        }
        Expr::For {
            meta,
            generators,
            filters,
            body,
        } => {
            // Generator binders are visible to later generators, the
            // filters, and the body.
            let before = scope.len();
            let mut sources_changed = false;
            let mut new_generators = Vec::with_capacity(generators.len());
            for generator in generators {
                let new_source = walk(&generator.source, scope);
                sources_changed |= new_source.is_some();
                new_generators.push(Generator {
                    pattern: generator.pattern.clone(),
                    source: new_source.unwrap_or_else(|| generator.source.clone()),
                });
                collect_pattern_binders(&generator.pattern, scope);
            }
            let new_filters: Vec<Option<Expr>> =
                filters.iter().map(|filter| walk(filter, scope)).collect();
            let new_body = walk(body, scope);
            scope.truncate(before);
            if !sources_changed && new_filters.iter().all(Option::is_none) && new_body.is_none() {
                return None;
            }
            Some(Expr::For {
                meta: meta.clone(),
                generators: new_generators,
                filters: filters
                    .iter()
                    .zip(new_filters)
                    .map(|(filter, new)| new.unwrap_or_else(|| filter.clone()))
                    .collect(),
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
            // Rescue/catch binders are kept in scope but their clauses are
            // not repair targets; the lowering only mis-binds case/fn heads.
            let new_body = walk(body, scope);
            let new_rescue = walk_clauses(rescue_clauses, scope, false);
            let new_catch = walk_clauses(catch_clauses, scope, false);
            let new_else = walk_clauses(else_clauses, scope, false);
            let new_after = after.as_deref().map(|after| walk(after, scope));
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
        _ => map_children(expr, &mut |child| walk(child, scope)),
    }
}

fn walk_clauses(clauses: &[Clause], scope: &mut Vec<String>, repair: bool) -> Option<Vec<Clause>> {
    let rewritten: Vec<Option<Clause>> = clauses
        .iter()
        .map(|clause| {
            let repaired = if repair {
                repair_clause(clause, scope)
            } else {
                None
            };
            let current = repaired.clone().unwrap_or_else(|| clause.clone());
            let before = scope.len();
            scope.extend(clause_binders(&current));
            let new_guard = current.guard.as_ref().map(|guard| walk(guard, scope));
            let new_body = walk(&current.body, scope);
            scope.truncate(before);
            if repaired.is_none() && !matches!(new_guard, Some(Some(_))) && new_body.is_none() {
                return None;
            }
            Some(Clause {
                patterns: current.patterns.clone(),
                guard: match (current.guard.clone(), new_guard) {
                    (_, Some(Some(new))) => Some(new),
                    (orig, _) => orig,
                },
                body: new_body.unwrap_or(current.body),
            })
        })
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

/// The shared decision core. Computes the sets from the clause body and
/// guard, applies the uniqueness gate, and picks rename vs. alias.
fn repair_clause(clause: &Clause, scope: &[String]) -> Option<Clause> {
    let binders = clause_binders(clause);
    let binder_set: BTreeSet<&String> = binders.iter().collect();

    let mut uses = scan_uses(&clause.body);
    if let Some(guard) = &clause.guard {
        scan_uses_into(guard, &mut uses);
    }
    let accessor_only = accessor_only_idents(&uses);
    let assigned = assigned_names(&clause.body);

    let candidates: Vec<&String> = uses
        .keys()
        .filter(|name| {
            is_simple_ident(name)
                && !binder_set.contains(name)
                && !accessor_only.contains(*name)
                && !assigned.contains(*name)
        })
        .collect();
    // The load-bearing safety gate: with zero candidates there is nothing
    // to fix, with two or more there is no principled way to choose.
    let [candidate] = candidates[..] else {
        return None;
    };

    let unused: Vec<&String> = dedup(&binders)
        .into_iter()
        .filter(|name| is_simple_ident(name) && !uses.contains_key(*name))
        .collect();
    let target = match unused[..] {
        [sole] => sole,
        // Several unused binders: the tagged-pair payload slot is the one
        // the lowering gets wrong, so prefer it if it is unambiguous.
        _ => tagged_pair_target(&clause.patterns, &unused)?,
    };

    if scope.contains(candidate) {
        return None;
    }

    let occurrences = binders.iter().filter(|name| *name == target).count();
    if occurrences == 1 {
        let patterns: Vec<Pattern> = clause
            .patterns
            .iter()
            .map(|pattern| rename_binder(pattern, target, candidate))
            .collect();
        let mut renamed = Vec::new();
        for pattern in &patterns {
            collect_pattern_binders(pattern, &mut renamed);
        }
        // Rename safety: the fix must not have produced a duplicate binder.
        if renamed.iter().filter(|name| *name == candidate).count() != 1 {
            return None;
        }
        Some(Clause {
            patterns,
            guard: clause.guard.clone(),
            body: clause.body.clone(),
        })
    } else {
        Some(Clause {
            patterns: clause.patterns.clone(),
            guard: clause.guard.clone(),
            body: prepend_alias(&clause.body, candidate, target),
        })
    }
}

fn dedup(names: &[String]) -> Vec<&String> {
    let mut seen = BTreeSet::new();
    names.iter().filter(|name| seen.insert(*name)).collect()
}

/// Among `unused`, the binder sitting in the value slot of a `{tag, x}`
/// pattern (top-level or nested one tuple down). `None` when no such slot
/// singles one out.
fn tagged_pair_target<'a>(patterns: &[Pattern], unused: &[&'a String]) -> Option<&'a String> {
    let mut found: Option<&'a String> = None;
    for pattern in patterns {
        for name in tagged_pair_slots(pattern) {
            if let Some(&matched) = unused.iter().find(|unused| unused.as_str() == name) {
                if found.is_some_and(|prev| prev != matched) {
                    return None;
                }
                found = Some(matched);
            }
        }
    }
    found
}

fn tagged_pair_slots(pattern: &Pattern) -> Vec<&str> {
    let mut out = Vec::new();
    if let Pattern::Tuple { items, .. } = pattern {
        if let [Pattern::Lit { .. }, Pattern::Var { name, .. }] = &items[..] {
            out.push(name.as_str());
        }
        for item in items {
            if let Pattern::Tuple { items: inner, .. } = item {
                if let [Pattern::Lit { .. }, Pattern::Var { name, .. }] = &inner[..] {
                    out.push(name.as_str());
                }
            }
        }
    }
    out
}

fn rename_binder(pattern: &Pattern, from: &str, to: &str) -> Pattern {
    match pattern {
        Pattern::Var { meta, name } if name == from => Pattern::Var {
            meta: meta.clone(),
            name: to.to_string(),
        },
        Pattern::Var { .. }
        | Pattern::Wildcard { .. }
        | Pattern::Lit { .. }
        | Pattern::Pin { .. } => pattern.clone(),
        Pattern::Tuple { meta, items } => Pattern::Tuple {
            meta: meta.clone(),
            items: items
                .iter()
                .map(|item| rename_binder(item, from, to))
                .collect(),
        },
        Pattern::List { meta, items } => Pattern::List {
            meta: meta.clone(),
            items: items
                .iter()
                .map(|item| rename_binder(item, from, to))
                .collect(),
        },
        Pattern::Cons { meta, head, tail } => Pattern::Cons {
            meta: meta.clone(),
            head: Box::new(rename_binder(head, from, to)),
            tail: Box::new(rename_binder(tail, from, to)),
        },
        Pattern::MapPat { meta, entries } => Pattern::MapPat {
            meta: meta.clone(),
            entries: entries
                .iter()
                .map(|entry| crate::ast::MapPatternEntry {
                    key: entry.key.clone(),
                    pattern: rename_binder(&entry.pattern, from, to),
                })
                .collect(),
        },
        Pattern::StructPat {
            meta,
            name,
            entries,
        } => Pattern::StructPat {
            meta: meta.clone(),
            name: name.clone(),
            entries: entries
                .iter()
                .map(|entry| crate::ast::MapPatternEntry {
                    key: entry.key.clone(),
                    pattern: rename_binder(&entry.pattern, from, to),
                })
                .collect(),
        },
        Pattern::Alias {
            meta,
            name,
            pattern: inner,
        } => Pattern::Alias {
            meta: meta.clone(),
            name: if name == from {
                to.to_string()
            } else {
                name.clone()
            },
            pattern: Box::new(rename_binder(inner, from, to)),
        },
        Pattern::Bits { meta, segments } => Pattern::Bits {
            meta: meta.clone(),
            segments: segments
                .iter()
                .map(|segment| crate::ast::BitSegment {
                    pattern: rename_binder(&segment.pattern, from, to),
                    size: segment.size,
                    spec: segment.spec.clone(),
                })
                .collect(),
        },
    }
}

/// The alias strategy: leave the pattern alone and bind the missing name
/// at the top of the body instead.
fn prepend_alias(body: &Expr, candidate: &str, binder: &str) -> Expr {
    let alias = Expr::assign(candidate, Expr::var(binder));
    match body {
        Expr::Block { meta, items } => {
            let mut new_items = Vec::with_capacity(items.len() + 1);
            new_items.push(alias);
            new_items.extend(items.iter().cloned());
            Expr::Block {
                meta: meta.clone(),
                items: new_items,
            }
        }
        other => Expr::Block {
            meta: Meta::at_line(other.meta().line),
            items: vec![alias, other.clone()],
        },
    }
}
