//! Symbol-chain resolution.
//!
//! Query expressions must resolve, through an unbroken chain of same-unit
//! aliasing, import/export specifiers, and property accesses on namespace
//! imports, to an inline `sql` tagged template. Validator expressions must
//! resolve to exported file-scope function declarations or arrow bindings.
//! The chain never passes through function boundaries, conditionals, calls,
//! or dynamic property access.
//!
//! Every step appends to an indented trace. On failure the whole trace is
//! flushed through `log::warn!`; on success it is demoted to debug.

use crate::ast::{Expr, ExprKind, Item, Program, Unit};
use std::cell::RefCell;
use std::fmt;

/// Why a chain could not be resolved.
#[derive(Debug, Clone)]
pub struct ResolveFailure {
    pub reason: String,
}

impl fmt::Display for ResolveFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.reason)
    }
}

fn fail<T>(reason: impl Into<String>) -> Result<T, ResolveFailure> {
    Err(ResolveFailure {
        reason: reason.into(),
    })
}

#[derive(Default)]
struct Trace {
    lines: Vec<String>,
    depth: usize,
}

/// Resolves symbol chains across a whole program.
pub struct Resolver<'p> {
    program: &'p Program,
    trace: RefCell<Trace>,
}

impl<'p> Resolver<'p> {
    pub fn new(program: &'p Program) -> Self {
        Resolver {
            program,
            trace: RefCell::new(Trace::default()),
        }
    }

    fn note(&self, msg: impl Into<String>) {
        let mut trace = self.trace.borrow_mut();
        let indent = "  ".repeat(trace.depth);
        let line = format!("{}{}", indent, msg.into());
        trace.lines.push(line);
    }

    fn enter(&self) {
        self.trace.borrow_mut().depth += 1;
    }

    fn leave(&self) {
        let mut trace = self.trace.borrow_mut();
        trace.depth = trace.depth.saturating_sub(1);
    }

    /// Flush the accumulated trace as warnings (used when resolution failed).
    pub fn flush_trace(&self) {
        let mut trace = self.trace.borrow_mut();
        for line in trace.lines.drain(..) {
            log::warn!("{}", line);
        }
        trace.depth = 0;
    }

    /// Demote the accumulated trace to debug output (used on success).
    pub fn drop_trace(&self) {
        let mut trace = self.trace.borrow_mut();
        for line in trace.lines.drain(..) {
            log::debug!("{}", line);
        }
        trace.depth = 0;
    }

    fn unit(&self, path: &str) -> Result<&'p Unit, ResolveFailure> {
        match self.program.unit(path) {
            Some(unit) => Ok(unit),
            None => fail(format!("unit {:?} is not part of the program", path)),
        }
    }

    /// Try to resolve an expression to a `sql` template without polluting the
    /// trace: a failed probe (a template slot that is just a value expression)
    /// is expected and rolls its trace lines back.
    pub fn probe_template(&self, unit: &'p Unit, expr: &'p Expr) -> Option<(&'p Unit, &'p Expr)> {
        let (mark, depth) = {
            let trace = self.trace.borrow();
            (trace.lines.len(), trace.depth)
        };
        match self.resolve_template(unit, expr) {
            Ok(resolved) => Some(resolved),
            Err(_) => {
                let mut trace = self.trace.borrow_mut();
                trace.lines.truncate(mark);
                trace.depth = depth;
                None
            }
        }
    }

    /// Resolve an expression to an inline `sql` tagged template.
    pub fn resolve_template(
        &self,
        unit: &'p Unit,
        expr: &'p Expr,
    ) -> Result<(&'p Unit, &'p Expr), ResolveFailure> {
        match &expr.kind {
            ExprKind::TaggedTemplate { tag, .. } => {
                if tag.is_ident("sql") {
                    self.note(format!("inline sql template in {}", unit.path));
                    Ok((unit, expr))
                } else {
                    fail(format!(
                        "tagged template with tag {:?}; only `sql` is recognized",
                        tag.text
                    ))
                }
            }
            ExprKind::Ident { name } => {
                self.note(format!("identifier `{}` in {}", name, unit.path));
                self.enter();
                let result = self.resolve_local(unit, name);
                self.leave();
                result
            }
            ExprKind::Member {
                object,
                property,
                computed,
            } => {
                if *computed {
                    return fail("dynamic property access breaks the resolution chain");
                }
                let ExprKind::Ident { name: ns } = &object.kind else {
                    return fail(format!(
                        "property access on {:?} which is not a namespace import",
                        object.text
                    ));
                };
                let Some(from) = namespace_import(unit, ns) else {
                    return fail(format!(
                        "`{}` is not a namespace import in {}",
                        ns, unit.path
                    ));
                };
                self.note(format!(
                    "`{}.{}` through namespace import of {}",
                    ns, property, from
                ));
                self.enter();
                let result = self.resolve_export(self.unit(from)?, property);
                self.leave();
                result
            }
            ExprKind::Call { .. } => fail("call expression breaks the resolution chain"),
            ExprKind::Conditional => fail("conditional expression breaks the resolution chain"),
            ExprKind::Function => fail("function boundary breaks the resolution chain"),
            ExprKind::Str { .. } | ExprKind::Other { .. } => {
                fail(format!("{:?} is not a sql template", expr.text))
            }
        }
    }

    fn resolve_local(
        &self,
        unit: &'p Unit,
        name: &str,
    ) -> Result<(&'p Unit, &'p Expr), ResolveFailure> {
        for item in &unit.items {
            match item {
                Item::Var { name: n, init, .. } if n == name => {
                    self.note(format!("variable `{}` initializer", n));
                    self.enter();
                    let result = self.resolve_template(unit, init);
                    self.leave();
                    return result;
                }
                Item::ImportNamed { imports, from } => {
                    if let Some(spec) = imports.iter().find(|s| s.local == name) {
                        self.note(format!(
                            "imported as `{}` from {} (original `{}`)",
                            spec.local, from, spec.imported
                        ));
                        self.enter();
                        let result = self.resolve_export(self.unit(from)?, &spec.imported);
                        self.leave();
                        return result;
                    }
                }
                Item::Func { name: n, .. } if n == name => {
                    return fail(format!(
                        "`{}` is a function; function boundaries break the chain",
                        n
                    ));
                }
                _ => {}
            }
        }
        fail(format!("identifier `{}` not found in {}", name, unit.path))
    }

    fn resolve_export(
        &self,
        unit: &'p Unit,
        symbol: &str,
    ) -> Result<(&'p Unit, &'p Expr), ResolveFailure> {
        for item in &unit.items {
            if let Item::Export { name, alias, from } = item {
                let exported_as = alias.as_deref().unwrap_or(name);
                if exported_as != symbol {
                    continue;
                }
                return match from {
                    Some(source) => {
                        self.note(format!("re-export `{}` from {}", name, source));
                        self.enter();
                        let result = self.resolve_export(self.unit(source)?, name);
                        self.leave();
                        result
                    }
                    None => {
                        self.note(format!("export `{}` of {}", name, unit.path));
                        self.enter();
                        let result = self.resolve_local(unit, name);
                        self.leave();
                        result
                    }
                };
            }
        }
        for item in &unit.items {
            if let Item::Var {
                name,
                init,
                exported: true,
            } = item
            {
                if name == symbol {
                    self.note(format!("exported variable `{}` of {}", name, unit.path));
                    self.enter();
                    let result = self.resolve_template(unit, init);
                    self.leave();
                    return result;
                }
            }
        }
        fail(format!("{} does not export `{}`", unit.path, symbol))
    }

    /// Resolve an expression to the stable symbol name of an exported
    /// file-scope validator function.
    pub fn resolve_validator(
        &self,
        unit: &'p Unit,
        expr: &'p Expr,
    ) -> Result<String, ResolveFailure> {
        match &expr.kind {
            ExprKind::Ident { name } => {
                self.note(format!("validator `{}` in {}", name, unit.path));
                self.enter();
                let result = self.resolve_validator_local(unit, name);
                self.leave();
                result
            }
            ExprKind::Member {
                object,
                property,
                computed: false,
            } => {
                let ExprKind::Ident { name: ns } = &object.kind else {
                    return fail("validator property access on a non-namespace object");
                };
                let Some(from) = namespace_import(unit, ns) else {
                    return fail(format!("`{}` is not a namespace import", ns));
                };
                self.enter();
                let result = self.resolve_validator_export(self.unit(from)?, property);
                self.leave();
                result
            }
            ExprKind::Function => fail("closures are not allowed as validators"),
            other => fail(format!("{:?} cannot be a validator reference", other)),
        }
    }

    fn resolve_validator_local(
        &self,
        unit: &'p Unit,
        name: &str,
    ) -> Result<String, ResolveFailure> {
        for item in &unit.items {
            match item {
                Item::Func {
                    name: n,
                    exported,
                    file_scope,
                    ..
                } if n == name => {
                    if !*file_scope {
                        return fail(format!("validator `{}` is a closure", n));
                    }
                    if !*exported {
                        return fail(format!("validator `{}` must be exported", n));
                    }
                    self.note(format!("resolved validator `{}` in {}", n, unit.path));
                    return Ok(n.clone());
                }
                Item::Var { name: n, init, .. } if n == name => {
                    if matches!(init.kind, ExprKind::Function) {
                        return fail(format!(
                            "validator `{}` is a local function value, not an exported declaration",
                            n
                        ));
                    }
                    return fail(format!("validator `{}` is not a function", n));
                }
                Item::ImportNamed { imports, from } => {
                    if let Some(spec) = imports.iter().find(|s| s.local == name) {
                        return self.resolve_validator_export(self.unit(from)?, &spec.imported);
                    }
                }
                _ => {}
            }
        }
        fail(format!("validator `{}` not found in {}", name, unit.path))
    }

    fn resolve_validator_export(
        &self,
        unit: &'p Unit,
        symbol: &str,
    ) -> Result<String, ResolveFailure> {
        for item in &unit.items {
            if let Item::Export { name, alias, from } = item {
                let exported_as = alias.as_deref().unwrap_or(name);
                if exported_as != symbol {
                    continue;
                }
                return match from {
                    Some(source) => self.resolve_validator_export(self.unit(source)?, name),
                    None => self.resolve_validator_local(unit, name),
                };
            }
        }
        for item in &unit.items {
            if let Item::Func {
                name,
                exported: true,
                file_scope,
                ..
            } = item
            {
                if name == symbol {
                    if !*file_scope {
                        return fail(format!("validator `{}` is a closure", name));
                    }
                    self.note(format!("resolved validator `{}` in {}", name, unit.path));
                    return Ok(name.clone());
                }
            }
        }
        fail(format!("{} does not export validator `{}`", unit.path, symbol))
    }
}

fn namespace_import<'p>(unit: &'p Unit, local: &str) -> Option<&'p str> {
    unit.items.iter().find_map(|item| match item {
        Item::ImportNamespace { local: l, from } if l == local => Some(from.as_str()),
        _ => None,
    })
}
