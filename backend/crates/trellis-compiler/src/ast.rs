//! The typed AST exposed by the external compiler front-end.
//!
//! The front-end itself is a collaborator outside this crate; what it hands
//! over (via [`crate::frontend::Frontend`]) is this serde data model: one
//! `Unit` per source file with its imports, exports, bindings and the
//! expressions reachable from top-level statements. Expressions carry their
//! canonical source text, which the compiler uses to synthesize parameter
//! names deterministically.

use serde::{Deserialize, Serialize};

/// A whole parsed source tree.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Program {
    pub units: Vec<Unit>,
}

impl Program {
    pub fn unit(&self, path: &str) -> Option<&Unit> {
        self.units.iter().find(|u| u.path == path)
    }
}

/// One source file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Unit {
    /// Path relative to the compiled root.
    pub path: String,
    /// Declaration-only units (type stubs) are skipped by the walker.
    #[serde(default)]
    pub declaration: bool,
    #[serde(default)]
    pub items: Vec<Item>,
}

/// A top-level item of a unit.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum Item {
    /// `import { a as b, c } from "./m"`
    ImportNamed { imports: Vec<ImportSpec>, from: String },
    /// `import * as ns from "./m"`
    ImportNamespace { local: String, from: String },
    /// `export { name as alias }`, optionally re-exported `from` another unit.
    Export {
        name: String,
        #[serde(default)]
        alias: Option<String>,
        #[serde(default)]
        from: Option<String>,
    },
    /// A variable binding with an initializer.
    Var {
        name: String,
        init: Expr,
        #[serde(default)]
        exported: bool,
    },
    /// A function declaration or an arrow-function binding.
    Func {
        name: String,
        #[serde(default)]
        exported: bool,
        #[serde(default)]
        arrow: bool,
        /// False for functions nested inside other functions (closures).
        #[serde(default = "default_true")]
        file_scope: bool,
    },
    /// A top-level statement; its expression tree is walked for call sites.
    Stmt { expr: Expr },
}

fn default_true() -> bool {
    true
}

/// One `imported as local` pair of a named import.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImportSpec {
    pub imported: String,
    pub local: String,
}

/// Position of a node inside its unit.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceLoc {
    pub line: u32,
    pub column: u32,
}

/// An expression node.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Expr {
    #[serde(flatten)]
    pub kind: ExprKind,
    #[serde(default)]
    pub loc: SourceLoc,
    /// Canonical source text of the expression as rendered by the front-end.
    #[serde(default)]
    pub text: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "expr", rename_all = "camelCase")]
pub enum ExprKind {
    Ident {
        name: String,
    },
    Member {
        object: Box<Expr>,
        property: String,
        #[serde(default)]
        computed: bool,
    },
    Call {
        callee: Box<Expr>,
        args: Vec<Expr>,
    },
    /// `` tag`quasi0 ${expr0} quasi1 …` `` — always one more quasi than exprs.
    TaggedTemplate {
        tag: Box<Expr>,
        quasis: Vec<String>,
        exprs: Vec<Expr>,
    },
    Str {
        value: String,
    },
    /// Chain breakers: the resolver refuses to look through these.
    Conditional,
    Function,
    Other {
        #[serde(default)]
        detail: String,
    },
}

impl Expr {
    pub fn ident(name: &str) -> Expr {
        Expr {
            kind: ExprKind::Ident {
                name: name.to_string(),
            },
            loc: SourceLoc::default(),
            text: name.to_string(),
        }
    }

    pub fn is_ident(&self, name: &str) -> bool {
        matches!(&self.kind, ExprKind::Ident { name: n } if n == name)
    }

    /// Visit this expression and every nested expression, parents first.
    pub fn walk<'a>(&'a self, visit: &mut dyn FnMut(&'a Expr)) {
        visit(self);
        match &self.kind {
            ExprKind::Member { object, .. } => object.walk(visit),
            ExprKind::Call { callee, args } => {
                callee.walk(visit);
                for arg in args {
                    arg.walk(visit);
                }
            }
            ExprKind::TaggedTemplate { tag, exprs, .. } => {
                tag.walk(visit);
                for expr in exprs {
                    expr.walk(visit);
                }
            }
            ExprKind::Ident { .. }
            | ExprKind::Str { .. }
            | ExprKind::Conditional
            | ExprKind::Function
            | ExprKind::Other { .. } => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unit_deserializes_from_frontend_dump() {
        let raw = r#"{
            "path": "app/main.ts",
            "items": [
                { "kind": "importNamed",
                  "imports": [{ "imported": "userQuery", "local": "q" }],
                  "from": "app/queries.ts" },
                { "kind": "stmt",
                  "expr": { "expr": "call",
                            "callee": { "expr": "member",
                                        "object": { "expr": "ident", "name": "db", "text": "db" },
                                        "property": "executeQuery",
                                        "text": "db.executeQuery" },
                            "args": [ { "expr": "ident", "name": "q", "text": "q" } ],
                            "loc": { "line": 3, "column": 1 },
                            "text": "db.executeQuery(q)" } }
            ]
        }"#;
        let unit: Unit = serde_json::from_str(raw).unwrap();
        assert_eq!(unit.path, "app/main.ts");
        assert!(!unit.declaration);
        assert_eq!(unit.items.len(), 2);
    }

    #[test]
    fn test_walk_reaches_nested_args() {
        let expr = Expr {
            kind: ExprKind::Call {
                callee: Box::new(Expr::ident("f")),
                args: vec![Expr::ident("a"), Expr::ident("b")],
            },
            loc: SourceLoc::default(),
            text: "f(a, b)".to_string(),
        };
        let mut seen = Vec::new();
        expr.walk(&mut |e| seen.push(e.text.clone()));
        assert_eq!(seen, vec!["f(a, b)", "f", "a", "b"]);
    }
}
