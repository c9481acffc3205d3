//! The Trellis whitelist compiler.
//!
//! Walks every non-declaration unit of a parsed source tree, harvests query
//! and server-call sites, resolves each site's query expression to an inline
//! `sql` template and its validator references to exported function symbols,
//! canonicalizes the templates, merges equivalent queries by fingerprint, and
//! writes the whitelist file the server loads at startup.
//!
//! Unresolved sites are warnings — the build completes, with the whitelist
//! explicitly noted as incomplete — while parameter type conflicts and
//! validator-set mismatches are hard errors.

pub mod ast;
pub mod error;
pub mod extract;
pub mod frontend;
pub mod output;
pub mod resolve;
pub mod sites;
pub mod template;

pub use error::{CompilerError, Result};
pub use frontend::{Frontend, JsonFrontend};

use ast::Program;
use extract::{find_call_sites, CallSite};
use resolve::Resolver;
use sites::SiteSet;
use std::path::{Path, PathBuf};
use trellis_commons::{Query, SourceRef, Whitelist};

/// Options for one build.
#[derive(Debug, Default)]
pub struct BuildOptions {
    /// Whitelist output path; defaults beside the source root.
    pub out: Option<PathBuf>,
}

/// Summary of one build.
#[derive(Debug)]
pub struct BuildReport {
    pub whitelist: Whitelist,
    pub resolved_sites: usize,
    pub unresolved_sites: usize,
    pub warnings: Vec<String>,
    pub output_path: PathBuf,
}

impl BuildReport {
    /// The build succeeded with a complete whitelist.
    pub fn is_complete(&self) -> bool {
        self.unresolved_sites == 0
    }
}

/// The whitelist compiler, generic over the front-end seam.
pub struct Compiler<F: Frontend> {
    frontend: F,
}

impl Compiler<JsonFrontend> {
    /// A compiler over the front-end's JSON dump format.
    pub fn new() -> Self {
        Compiler {
            frontend: JsonFrontend::new(),
        }
    }
}

impl Default for Compiler<JsonFrontend> {
    fn default() -> Self {
        Self::new()
    }
}

impl<F: Frontend> Compiler<F> {
    pub fn with_frontend(frontend: F) -> Self {
        Compiler { frontend }
    }

    /// Build the whitelist for one source root and write it out.
    pub fn build(&self, root: &Path, options: &BuildOptions) -> Result<BuildReport> {
        let program = self.frontend.load(root)?;
        let mut report = self.compile(&program)?;

        let out = options
            .out
            .clone()
            .unwrap_or_else(|| output::default_output_path(root));
        output::write_whitelist(&report.whitelist, &out)?;
        report.output_path = out;

        if !report.is_complete() {
            log::warn!(
                "Whitelist is incomplete: {} call site(s) could not be resolved",
                report.unresolved_sites
            );
        }
        Ok(report)
    }

    /// Compile a loaded program without touching the filesystem.
    pub fn compile(&self, program: &Program) -> Result<BuildReport> {
        let resolver = Resolver::new(program);
        let mut sites = SiteSet::new();
        let mut warnings = Vec::new();
        let mut resolved = 0usize;
        let mut unresolved = 0usize;

        for site in find_call_sites(program) {
            match process_site(&resolver, &site) {
                Ok((query, fragments)) => {
                    resolver.drop_trace();
                    sites.add(query)?;
                    for fragment in fragments {
                        sites.add(fragment)?;
                    }
                    resolved += 1;
                }
                Err(SiteIssue::Unresolved(reason)) => {
                    resolver.flush_trace();
                    let warning = format!("{}: {}", site.location(), reason);
                    log::warn!("{}", warning);
                    warnings.push(warning);
                    unresolved += 1;
                }
                Err(SiteIssue::Hard(error)) => return Err(error),
            }
        }

        log::info!(
            "Compiled {} call site(s) into {} unique quer{}",
            resolved,
            sites.len(),
            if sites.len() == 1 { "y" } else { "ies" }
        );

        Ok(BuildReport {
            whitelist: output::build_whitelist(&sites),
            resolved_sites: resolved,
            unresolved_sites: unresolved,
            warnings,
            output_path: PathBuf::new(),
        })
    }
}

enum SiteIssue {
    /// The site could not be resolved; recorded as a warning.
    Unresolved(String),
    /// A hard compiler error that aborts the build.
    Hard(CompilerError),
}

fn process_site<'p>(
    resolver: &Resolver<'p>,
    site: &CallSite<'p>,
) -> std::result::Result<(Query, Vec<Query>), SiteIssue> {
    let location = site.location();

    let Some(query_expr) = site.query_arg() else {
        return Err(SiteIssue::Unresolved(
            "call site has no query argument".to_string(),
        ));
    };

    let (mut query, fragments) = query_from_expr(resolver, site.unit, query_expr, &location)?;

    for validator_expr in site.validator_args() {
        let symbol = resolver
            .resolve_validator(site.unit, validator_expr)
            .map_err(|failure| SiteIssue::Unresolved(failure.reason))?;
        if !query.validators.contains(&symbol) {
            query.validators.push(symbol);
        }
    }

    query.add_reference(SourceRef {
        unit: site.unit.path.clone(),
        line: site.call.loc.line,
        column: site.call.loc.column,
    });

    Ok((query, fragments))
}

/// Canonicalize a query argument. A direct expression resolves to one `sql`
/// template; a `sql.merge(parent, ...fragments)` call additionally records
/// each fragment's fingerprint in the parent's allowed-fragment set and
/// whitelists the fragments themselves so the server can splice their text.
fn query_from_expr<'p>(
    resolver: &Resolver<'p>,
    unit: &'p ast::Unit,
    expr: &'p ast::Expr,
    location: &str,
) -> std::result::Result<(Query, Vec<Query>), SiteIssue> {
    if let ast::ExprKind::Call { callee, args } = &expr.kind {
        if let ast::ExprKind::Member { object, property, .. } = &callee.kind {
            if object.is_ident("sql") && property == "merge" {
                let Some((parent_expr, fragment_exprs)) = args.split_first() else {
                    return Err(SiteIssue::Unresolved(
                        "sql.merge call has no parent query".to_string(),
                    ));
                };
                let (mut parent, _) = query_from_expr(resolver, unit, parent_expr, location)?;
                let mut fragments = Vec::new();
                for fragment_expr in fragment_exprs {
                    let (fragment, _) =
                        query_from_expr(resolver, unit, fragment_expr, location)?;
                    if !parent.fragments.contains(&fragment.fingerprint) {
                        parent.fragments.push(fragment.fingerprint.clone());
                    }
                    fragments.push(fragment);
                }
                return Ok((parent, fragments));
            }
        }
    }

    let (template_unit, template) = resolver
        .resolve_template(unit, expr)
        .map_err(|failure| SiteIssue::Unresolved(failure.reason))?;
    let query = template::build_query(resolver, template_unit, template, location)
        .map_err(SiteIssue::Hard)?;
    Ok((query, Vec::new()))
}
