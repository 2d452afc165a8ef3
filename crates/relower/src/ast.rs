use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Program {
    pub modules: Vec<Module>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Module {
    pub name: String,
    pub funs: Vec<FunDef>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct FunDef {
    pub name: String,
    pub clauses: Vec<Clause>,
}

/// Provenance attached by the lowering stage. Read-only to passes except
/// where a pass explicitly tags a node it constructs itself.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Default)]
pub struct Meta {
    #[serde(default)]
    pub line: Option<u32>,
    #[serde(default)]
    pub early_return: bool,
    #[serde(default)]
    pub loop_has_return: bool,
}

impl Meta {
    pub fn at_line(line: Option<u32>) -> Self {
        Meta {
            line,
            ..Meta::default()
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub enum Literal {
    Atom(String),
    Str(String),
    Int(i64),
    Float(f64),
    Bool(bool),
    Nil,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(tag = "kind")]
pub enum Expr {
    Var {
        #[serde(default)]
        meta: Meta,
        name: String,
    },
    Lit {
        #[serde(default)]
        meta: Meta,
        value: Literal,
    },
    Tuple {
        #[serde(default)]
        meta: Meta,
        items: Vec<Expr>,
    },
    List {
        #[serde(default)]
        meta: Meta,
        items: Vec<Expr>,
    },
    MapLit {
        #[serde(default)]
        meta: Meta,
        entries: Vec<MapEntry>,
    },
    StructLit {
        #[serde(default)]
        meta: Meta,
        name: String,
        entries: Vec<MapEntry>,
    },
    Call {
        #[serde(default)]
        meta: Meta,
        name: String,
        args: Vec<Expr>,
    },
    RemoteCall {
        #[serde(default)]
        meta: Meta,
        module: String,
        name: String,
        args: Vec<Expr>,
    },
    BinOp {
        #[serde(default)]
        meta: Meta,
        op: String,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    UnOp {
        #[serde(default)]
        meta: Meta,
        op: String,
        operand: Box<Expr>,
    },
    If {
        #[serde(default)]
        meta: Meta,
        #[serde(default)]
        negated: bool,
        cond: Box<Expr>,
        then_branch: Box<Expr>,
        else_branch: Option<Box<Expr>>,
    },
    Case {
        #[serde(default)]
        meta: Meta,
        scrutinee: Box<Expr>,
        clauses: Vec<Clause>,
    },
    Cond {
        #[serde(default)]
        meta: Meta,
        arms: Vec<CondArm>,
    },
    Block {
        #[serde(default)]
        meta: Meta,
        items: Vec<Expr>,
    },
    Fun {
        #[serde(default)]
        meta: Meta,
        clauses: Vec<Clause>,
    },
    For {
        #[serde(default)]
        meta: Meta,
        generators: Vec<Generator>,
        filters: Vec<Expr>,
        body: Box<Expr>,
    },
    Try {
        #[serde(default)]
        meta: Meta,
        body: Box<Expr>,
        rescue_clauses: Vec<Clause>,
        catch_clauses: Vec<Clause>,
        else_clauses: Vec<Clause>,
        after: Option<Box<Expr>>,
    },
    FieldAccess {
        #[serde(default)]
        meta: Meta,
        base: Box<Expr>,
        field: String,
    },
    Pin {
        #[serde(default)]
        meta: Meta,
        name: String,
    },
    Raw {
        #[serde(default)]
        meta: Meta,
        text: String,
    },
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct MapEntry {
    pub key: Expr,
    pub value: Expr,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct CondArm {
    pub condition: Expr,
    pub body: Expr,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Generator {
    pub pattern: Pattern,
    pub source: Expr,
}

/// The unit of scope for `case`/fn dispatch: binders introduced by
/// `patterns` are visible throughout `guard` and `body`. `case` clauses
/// carry exactly one pattern, fn/def clauses one per parameter.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Clause {
    pub patterns: Vec<Pattern>,
    pub guard: Option<Expr>,
    pub body: Expr,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(tag = "kind")]
pub enum Pattern {
    Var {
        #[serde(default)]
        meta: Meta,
        name: String,
    },
    Wildcard {
        #[serde(default)]
        meta: Meta,
    },
    Lit {
        #[serde(default)]
        meta: Meta,
        value: Literal,
    },
    Tuple {
        #[serde(default)]
        meta: Meta,
        items: Vec<Pattern>,
    },
    List {
        #[serde(default)]
        meta: Meta,
        items: Vec<Pattern>,
    },
    Cons {
        #[serde(default)]
        meta: Meta,
        head: Box<Pattern>,
        tail: Box<Pattern>,
    },
    MapPat {
        #[serde(default)]
        meta: Meta,
        entries: Vec<MapPatternEntry>,
    },
    StructPat {
        #[serde(default)]
        meta: Meta,
        name: String,
        entries: Vec<MapPatternEntry>,
    },
    Alias {
        #[serde(default)]
        meta: Meta,
        name: String,
        pattern: Box<Pattern>,
    },
    Pin {
        #[serde(default)]
        meta: Meta,
        name: String,
    },
    Bits {
        #[serde(default)]
        meta: Meta,
        segments: Vec<BitSegment>,
    },
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct MapPatternEntry {
    pub key: Literal,
    pub pattern: Pattern,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct BitSegment {
    pub pattern: Pattern,
    pub size: Option<u64>,
    pub spec: Option<String>,
}

impl Expr {
    pub fn var(name: &str) -> Expr {
        Expr::Var {
            meta: Meta::default(),
            name: name.to_string(),
        }
    }

    pub fn atom(name: &str) -> Expr {
        Expr::Lit {
            meta: Meta::default(),
            value: Literal::Atom(name.to_string()),
        }
    }

    pub fn nil() -> Expr {
        Expr::Lit {
            meta: Meta::default(),
            value: Literal::Nil,
        }
    }

    pub fn tuple(items: Vec<Expr>) -> Expr {
        Expr::Tuple {
            meta: Meta::default(),
            items,
        }
    }

    /// A match-operator binding `name = value`.
    pub fn assign(name: &str, value: Expr) -> Expr {
        Expr::BinOp {
            meta: Meta::default(),
            op: "=".to_string(),
            left: Box::new(Expr::var(name)),
            right: Box::new(value),
        }
    }

    pub fn meta(&self) -> &Meta {
        match self {
            Expr::Var { meta, .. }
            | Expr::Lit { meta, .. }
            | Expr::Tuple { meta, .. }
            | Expr::List { meta, .. }
            | Expr::MapLit { meta, .. }
            | Expr::StructLit { meta, .. }
            | Expr::Call { meta, .. }
            | Expr::RemoteCall { meta, .. }
            | Expr::BinOp { meta, .. }
            | Expr::UnOp { meta, .. }
            | Expr::If { meta, .. }
            | Expr::Case { meta, .. }
            | Expr::Cond { meta, .. }
            | Expr::Block { meta, .. }
            | Expr::Fun { meta, .. }
            | Expr::For { meta, .. }
            | Expr::Try { meta, .. }
            | Expr::FieldAccess { meta, .. }
            | Expr::Pin { meta, .. }
            | Expr::Raw { meta, .. } => meta,
        }
    }
}

impl Pattern {
    pub fn var(name: &str) -> Pattern {
        Pattern::Var {
            meta: Meta::default(),
            name: name.to_string(),
        }
    }

    pub fn atom(name: &str) -> Pattern {
        Pattern::Lit {
            meta: Meta::default(),
            value: Literal::Atom(name.to_string()),
        }
    }

    pub fn wildcard() -> Pattern {
        Pattern::Wildcard {
            meta: Meta::default(),
        }
    }
}

/// The only identifier shape eligible for hygiene rewriting. Qualified and
/// capitalized names are never rewrite targets.
pub fn is_simple_ident(name: &str) -> bool {
    let mut chars = name.chars();
    let Some(first) = chars.next() else {
        return false;
    };
    if !(first.is_ascii_lowercase() || first == '_') {
        return false;
    }
    chars.all(|ch| ch.is_ascii_lowercase() || ch.is_ascii_digit() || ch == '_')
}

pub fn collect_pattern_binders(pattern: &Pattern, out: &mut Vec<String>) {
    match pattern {
        Pattern::Wildcard { .. } | Pattern::Lit { .. } | Pattern::Pin { .. } => {}
        Pattern::Var { name, .. } => out.push(name.clone()),
        Pattern::Tuple { items, .. } | Pattern::List { items, .. } => {
            for item in items {
                collect_pattern_binders(item, out);
            }
        }
        Pattern::Cons { head, tail, .. } => {
            collect_pattern_binders(head, out);
            collect_pattern_binders(tail, out);
        }
        Pattern::MapPat { entries, .. } | Pattern::StructPat { entries, .. } => {
            for entry in entries {
                collect_pattern_binders(&entry.pattern, out);
            }
        }
        Pattern::Alias { name, pattern, .. } => {
            out.push(name.clone());
            collect_pattern_binders(pattern, out);
        }
        Pattern::Bits { segments, .. } => {
            for segment in segments {
                collect_pattern_binders(&segment.pattern, out);
            }
        }
    }
}

/// All binders introduced by a clause head, in pattern order.
pub fn clause_binders(clause: &Clause) -> Vec<String> {
    let mut out = Vec::new();
    for pattern in &clause.patterns {
        collect_pattern_binders(pattern, &mut out);
    }
    out
}
