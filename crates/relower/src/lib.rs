pub mod analysis;
pub mod ast;
pub mod control_flow;
pub mod diagnostics;
pub mod hygiene;
pub mod pipeline;
pub mod visit;

pub mod accumulator;

#[cfg(test)]
mod testsupport;

pub use ast::{Clause, Expr, FunDef, Literal, Meta, Module, Pattern, Program};
pub use pipeline::{normalize_fun, normalize_module, normalize_program};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum RelowerError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid program JSON: {0}")]
    Json(#[from] serde_json::Error),
}

/// Parse a lowered program from its JSON interchange form, run the full
/// repair pipeline, and serialize the result back out.
pub fn normalize_json(input: &str) -> Result<String, RelowerError> {
    let program: Program = serde_json::from_str(input)?;
    let normalized = normalize_program(&program);
    Ok(serde_json::to_string_pretty(&normalized)?)
}
