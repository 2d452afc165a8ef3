use std::collections::{BTreeMap, BTreeSet};

use crate::ast::{is_simple_ident, Expr, Literal};
use crate::visit::for_each_child;

/// Occurrence counts for one identifier inside a subtree. `accessor_base`
/// counts the occurrences where the identifier is only the target of a
/// field-style accessor (`x.field`, `Map.get(x, ..)`): those denote a use
/// of some other clause's variable, not a binder the clause is missing.
#[derive(Debug, Default, Clone, Copy)]
pub struct NameUse {
    pub total: usize,
    pub accessor_base: usize,
}

pub fn scan_uses(expr: &Expr) -> BTreeMap<String, NameUse> {
    let mut uses = BTreeMap::new();
    scan_uses_into(expr, &mut uses);
    uses
}

pub fn scan_uses_into(expr: &Expr, uses: &mut BTreeMap<String, NameUse>) {
    match expr {
        Expr::Var { name, .. } => {
            if is_simple_ident(name) {
                uses.entry(name.clone()).or_default().total += 1;
            }
        }
        Expr::FieldAccess { base, .. } => {
            if let Expr::Var { name, .. } = &**base {
                bump_accessor(name, uses);
            } else {
                scan_uses_into(base, uses);
            }
        }
        Expr::RemoteCall {
            module, name, args, ..
        } if is_accessor_call(module, name) => {
            let mut args = args.iter();
            match args.next() {
                Some(Expr::Var { name, .. }) => bump_accessor(name, uses),
                Some(other) => scan_uses_into(other, uses),
                None => {}
            }
            for arg in args {
                scan_uses_into(arg, uses);
            }
        }
        _ => for_each_child(expr, &mut |child| scan_uses_into(child, uses)),
    }
}

fn bump_accessor(name: &str, uses: &mut BTreeMap<String, NameUse>) {
    if is_simple_ident(name) {
        let entry = uses.entry(name.to_string()).or_default();
        entry.total += 1;
        entry.accessor_base += 1;
    }
}

fn is_accessor_call(module: &str, name: &str) -> bool {
    matches!(module, "Map" | "Keyword" | "Access")
        && matches!(name, "get" | "fetch" | "fetch!" | "get_lazy")
}

/// Identifiers whose every occurrence in `expr` is an accessor target.
pub fn accessor_only_idents(uses: &BTreeMap<String, NameUse>) -> BTreeSet<String> {
    uses.iter()
        .filter(|(_, counts)| counts.total > 0 && counts.total == counts.accessor_base)
        .map(|(name, _)| name.clone())
        .collect()
}

/// Names bound by a match-operator assignment inside `expr`, excluding
/// anything bound inside a nested anonymous function (those bindings do
/// not escape their own scope).
pub fn assigned_names(expr: &Expr) -> BTreeSet<String> {
    let mut out = BTreeSet::new();
    collect_assigned(expr, &mut out);
    out
}

fn collect_assigned(expr: &Expr, out: &mut BTreeSet<String>) {
    match expr {
        Expr::BinOp {
            op, left, right, ..
        } if op == "=" => {
            collect_assign_targets(left, out);
            collect_assigned(right, out);
        }
        Expr::Fun { .. } => {}
        _ => for_each_child(expr, &mut |child| collect_assigned(child, out)),
    }
}

pub(crate) fn collect_assign_targets(expr: &Expr, out: &mut BTreeSet<String>) {
    match expr {
        Expr::Var { name, .. } => {
            if is_simple_ident(name) {
                out.insert(name.clone());
            }
        }
        Expr::Tuple { items, .. } | Expr::List { items, .. } => {
            for item in items {
                collect_assign_targets(item, out);
            }
        }
        _ => {}
    }
}

/// Whether `name` is referenced anywhere in `expr`. This is the boolean
/// usage query peripheral passes build on.
pub fn name_used(expr: &Expr, name: &str) -> bool {
    if let Expr::Var { name: var, .. } = expr {
        if var == name {
            return true;
        }
    }
    let mut found = false;
    for_each_child(expr, &mut |child| {
        if !found {
            found = name_used(child, name);
        }
    });
    found
}

pub fn is_step_atom(name: &str) -> bool {
    name == "cont" || name == "halt"
}

/// Does this subtree construct a literal `{:cont, _}` / `{:halt, _}` pair
/// anywhere beneath it? Evaluated before any rewriting: its answer decides
/// whether a branch is already part of the explicit control-flow result
/// path.
pub fn contains_step_literal(expr: &Expr) -> bool {
    if let Expr::Tuple { items, .. } = expr {
        if items.len() == 2 {
            if let Expr::Lit {
                value: Literal::Atom(tag),
                ..
            } = &items[0]
            {
                if is_step_atom(tag) {
                    return true;
                }
            }
        }
    }
    let mut found = false;
    for_each_child(expr, &mut |child| {
        if !found {
            found = contains_step_literal(child);
        }
    });
    found
}
