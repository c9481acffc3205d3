//! Call-site discovery.
//!
//! Two trigger predicates identify sites: a method call whose property name is
//! `executeQuery` or `paginateQuery`, and a zero-argument `beginTx` method
//! call appearing as the first argument of another call (a server-call site).

use crate::ast::{Expr, ExprKind, Item, Program, Unit};

/// Method names that identify a query-execute site.
const QUERY_METHODS: [&str; 2] = ["executeQuery", "paginateQuery"];
/// Method name that, called with zero args in first-argument position,
/// identifies a server-call site.
const BEGIN_TX: &str = "beginTx";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SiteKind {
    /// `db.executeQuery(query, params?, ...validators)`
    Query,
    /// `call(db.beginTx(), query, params?, ...validators)`
    ServerCall,
}

/// One harvested call site.
pub struct CallSite<'p> {
    pub unit: &'p Unit,
    pub call: &'p Expr,
    pub kind: SiteKind,
}

impl<'p> CallSite<'p> {
    /// The argument holding the query expression.
    pub fn query_arg(&self) -> Option<&'p Expr> {
        let ExprKind::Call { args, .. } = &self.call.kind else {
            return None;
        };
        match self.kind {
            SiteKind::Query => args.first(),
            SiteKind::ServerCall => args.get(1),
        }
    }

    /// The validator arguments (positions after the optional bound-params
    /// argument, which is runtime-only and never analyzed).
    pub fn validator_args(&self) -> &'p [Expr] {
        let ExprKind::Call { args, .. } = &self.call.kind else {
            return &[];
        };
        let start = match self.kind {
            SiteKind::Query => 2,
            SiteKind::ServerCall => 3,
        };
        args.get(start..).unwrap_or(&[])
    }

    /// `unit:line:column` of the call, for diagnostics and whitelist refs.
    pub fn location(&self) -> String {
        format!(
            "{}:{}:{}",
            self.unit.path, self.call.loc.line, self.call.loc.column
        )
    }
}

/// Harvest every call site in every non-declaration unit, in unit order.
pub fn find_call_sites(program: &Program) -> Vec<CallSite<'_>> {
    let mut sites = Vec::new();
    for unit in &program.units {
        if unit.declaration {
            continue;
        }
        for item in &unit.items {
            let expr = match item {
                Item::Stmt { expr } => expr,
                Item::Var { init, .. } => init,
                _ => continue,
            };
            expr.walk(&mut |node| {
                if let Some(kind) = site_kind(node) {
                    sites.push(CallSite {
                        unit,
                        call: node,
                        kind,
                    });
                }
            });
        }
    }
    sites
}

fn site_kind(expr: &Expr) -> Option<SiteKind> {
    let ExprKind::Call { callee, args } = &expr.kind else {
        return None;
    };

    if let ExprKind::Member { property, .. } = &callee.kind {
        if QUERY_METHODS.contains(&property.as_str()) {
            return Some(SiteKind::Query);
        }
    }

    if let Some(first) = args.first() {
        if let ExprKind::Call {
            callee: inner,
            args: inner_args,
        } = &first.kind
        {
            if inner_args.is_empty() {
                if let ExprKind::Member { property, .. } = &inner.kind {
                    if property == BEGIN_TX {
                        return Some(SiteKind::ServerCall);
                    }
                }
            }
        }
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::SourceLoc;

    fn call(callee: Expr, args: Vec<Expr>) -> Expr {
        Expr {
            kind: ExprKind::Call {
                callee: Box::new(callee),
                args,
            },
            loc: SourceLoc { line: 1, column: 1 },
            text: String::new(),
        }
    }

    fn member(object: Expr, property: &str) -> Expr {
        Expr {
            kind: ExprKind::Member {
                object: Box::new(object),
                property: property.to_string(),
                computed: false,
            },
            loc: SourceLoc::default(),
            text: String::new(),
        }
    }

    #[test]
    fn test_query_site_predicate() {
        let expr = call(
            member(Expr::ident("db"), "executeQuery"),
            vec![Expr::ident("q")],
        );
        assert_eq!(site_kind(&expr), Some(SiteKind::Query));

        let expr = call(
            member(Expr::ident("db"), "paginateQuery"),
            vec![Expr::ident("q")],
        );
        assert_eq!(site_kind(&expr), Some(SiteKind::Query));

        let expr = call(member(Expr::ident("db"), "close"), vec![]);
        assert_eq!(site_kind(&expr), None);
    }

    #[test]
    fn test_server_call_site_predicate() {
        let begin_tx = call(member(Expr::ident("db"), "beginTx"), vec![]);
        let expr = call(
            Expr::ident("serverCall"),
            vec![begin_tx, Expr::ident("q")],
        );
        assert_eq!(site_kind(&expr), Some(SiteKind::ServerCall));

        // beginTx with arguments does not trigger.
        let begin_tx_args = call(member(Expr::ident("db"), "beginTx"), vec![Expr::ident("x")]);
        let expr = call(Expr::ident("serverCall"), vec![begin_tx_args]);
        assert_eq!(site_kind(&expr), None);
    }

    #[test]
    fn test_argument_positions() {
        let begin_tx = call(member(Expr::ident("db"), "beginTx"), vec![]);
        let site_call = call(
            Expr::ident("serverCall"),
            vec![
                begin_tx,
                Expr::ident("q"),
                Expr::ident("params"),
                Expr::ident("checkA"),
            ],
        );
        let unit = Unit {
            path: "u.ts".to_string(),
            declaration: false,
            items: vec![],
        };
        let site = CallSite {
            unit: &unit,
            call: &site_call,
            kind: SiteKind::ServerCall,
        };
        assert!(site.query_arg().unwrap().is_ident("q"));
        assert_eq!(site.validator_args().len(), 1);
        assert!(site.validator_args()[0].is_ident("checkA"));
    }
}
