//! Pass pipeline. Each repair runs once per function definition, in a
//! fixed order: iteration loops are normalized first so the accumulator
//! repair sees the folds it introduces, and binder hygiene runs after
//! both so it works on the final clause shapes. The underscore pass is
//! purely cosmetic and goes last.

use crate::analysis::name_used;
use crate::ast::{is_simple_ident, Clause, FunDef, Module, Pattern, Program};
use crate::{accumulator, control_flow, hygiene};

pub fn normalize_program(program: &Program) -> Program {
    Program {
        modules: program.modules.iter().map(normalize_module).collect(),
    }
}

pub fn normalize_module(module: &Module) -> Module {
    Module {
        name: module.name.clone(),
        funs: module.funs.iter().map(normalize_fun).collect(),
    }
}

pub fn normalize_fun(fun: &FunDef) -> FunDef {
    let fun = apply(fun, control_flow::normalize_fun);
    let fun = apply(&fun, accumulator::rethread_fun);
    let fun = apply(&fun, hygiene::repair_fun);
    apply(&fun, underscore_unused_params)
}

fn apply(fun: &FunDef, pass: fn(&FunDef) -> Option<FunDef>) -> FunDef {
    pass(fun).unwrap_or_else(|| fun.clone())
}

/// Prefix definition parameters that are never read with an underscore,
/// so the emitted module compiles without unused-variable warnings.
fn underscore_unused_params(fun: &FunDef) -> Option<FunDef> {
    let rewritten: Vec<Option<Clause>> = fun.clauses.iter().map(underscore_clause).collect();
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

fn underscore_clause(clause: &Clause) -> Option<Clause> {
    let mut changed = false;
    let patterns: Vec<Pattern> = clause
        .patterns
        .iter()
        .map(|pattern| match pattern {
            Pattern::Var { meta, name }
                if is_simple_ident(name)
                    && !name.starts_with('_')
                    && !name_used(&clause.body, name)
                    && !clause
                        .guard
                        .as_ref()
                        .is_some_and(|guard| name_used(guard, name)) =>
            {
                changed = true;
                Pattern::Var {
                    meta: meta.clone(),
                    name: format!("_{name}"),
                }
            }
            other => other.clone(),
        })
        .collect();
    if !changed {
        return None;
    }
    Some(Clause {
        patterns,
        guard: clause.guard.clone(),
        body: clause.body.clone(),
    })
}
