//! Template-to-canonical-query construction.
//!
//! A resolved `sql` tagged template becomes a canonical query in two passes.
//! The first pass walks quasis and substitution slots: nested `sql` templates
//! are inlined with their placeholders renumbered, typed late-bound markers
//! (`%{name:` + type-literal slot + `}`) become placeholders immediately, and
//! every other slot becomes a fresh positional placeholder whose name is
//! synthesized from the slot's source text. The second pass rewrites the
//! remaining literal `%{name}` / `%{name:tag}` markers. `SESSION.` and `ENV.`
//! prefixes reclassify a marker's type tag.

use crate::ast::{Expr, ExprKind, Unit};
use crate::error::{CompilerError, Result};
use crate::resolve::Resolver;
use trellis_commons::{ParamSchema, ParamType, Query};

/// Binding-source prefix for session parameters.
const SESSION_PREFIX: &str = "SESSION.";
/// Binding-source prefix for environment parameters.
const ENV_PREFIX: &str = "ENV.";

/// Build the canonical query of a resolved `sql` template.
pub fn build_query<'p>(
    resolver: &Resolver<'p>,
    unit: &'p Unit,
    template: &'p Expr,
    site: &str,
) -> Result<Query> {
    let mut builder = Builder {
        resolver,
        site,
        text: String::new(),
        params: ParamSchema::new(),
        placeholders: 0,
    };
    builder.append_template(unit, template)?;
    builder.rewrite_markers()?;
    Ok(Query::new(builder.text, builder.params))
}

struct Builder<'r, 'p> {
    resolver: &'r Resolver<'p>,
    site: &'r str,
    text: String,
    params: ParamSchema,
    placeholders: u32,
}

impl<'p> Builder<'_, 'p> {
    fn error(&self, message: impl Into<String>) -> CompilerError {
        CompilerError::Template {
            site: self.site.to_string(),
            message: message.into(),
        }
    }

    fn push_placeholder(&mut self, name: &str, ty: ParamType) -> Result<()> {
        self.placeholders += 1;
        self.text.push('$');
        self.text.push_str(&self.placeholders.to_string());
        self.params
            .insert(name, ty)
            .map_err(|e| self.error(e.to_string()))
    }

    fn append_template(&mut self, unit: &'p Unit, template: &'p Expr) -> Result<()> {
        let ExprKind::TaggedTemplate { quasis, exprs, .. } = &template.kind else {
            return Err(self.error("expected a tagged template expression"));
        };
        if quasis.len() != exprs.len() + 1 {
            return Err(self.error("malformed template: quasi/slot arity mismatch"));
        }

        let mut pending_close = false;
        for (i, quasi) in quasis.iter().enumerate() {
            let mut piece = quasi.as_str();
            if pending_close {
                piece = piece
                    .strip_prefix('}')
                    .ok_or_else(|| self.error("typed marker is missing its closing `}`"))?;
                pending_close = false;
            }
            self.text.push_str(piece);

            let Some(slot) = exprs.get(i) else {
                continue;
            };

            // `%{name:` followed by a type-literal slot and a closing `}`.
            if let Some(marker) = trailing_marker_prefix(&self.text) {
                if let ExprKind::Str { value } = &slot.kind {
                    self.text.truncate(self.text.len() - marker.len() - 3);
                    let ty = classify_marker(&marker, Some(value))
                        .map_err(|e| self.error(e.to_string()))?;
                    self.push_placeholder(&marker_param_name(&marker), ty)?;
                    pending_close = true;
                    continue;
                }
            }

            // A slot that is itself a sql template is inlined; renumbering is
            // implicit because nested placeholders continue our counter.
            if let Some((frag_unit, frag_expr)) = self.resolver.probe_template(unit, slot) {
                self.append_template(frag_unit, frag_expr)?;
                continue;
            }

            // Plain value slot: a new positional placeholder with a name
            // synthesized from the slot's canonical source text.
            let name = synthesize_name(&slot.text);
            self.push_placeholder(&name, ParamType::String)?;
        }

        if pending_close {
            return Err(self.error("typed marker is missing its closing `}`"));
        }
        Ok(())
    }

    /// Rewrite literal `%{name}` / `%{name:tag}` markers into placeholders.
    fn rewrite_markers(&mut self) -> Result<()> {
        if !self.text.contains("%{") {
            return Ok(());
        }

        let source = std::mem::take(&mut self.text);
        let mut rest = source.as_str();
        let mut out = String::with_capacity(source.len());

        while let Some(start) = rest.find("%{") {
            out.push_str(&rest[..start]);
            let Some(close) = rest[start..].find('}') else {
                return Err(self.error("unterminated `%{` marker"));
            };
            let inner = &rest[start + 2..start + close];
            // An empty `%{}` is a fragment splice slot, not a parameter.
            if inner.is_empty() {
                out.push_str("%{}");
                rest = &rest[start + close + 1..];
                continue;
            }
            let (name, tag) = match inner.split_once(':') {
                Some((name, tag)) => (name, Some(tag)),
                None => (inner, None),
            };
            let ty = classify_marker(name, tag).map_err(|e| self.error(e.to_string()))?;

            self.placeholders += 1;
            out.push('$');
            out.push_str(&self.placeholders.to_string());
            self.params
                .insert(&marker_param_name(name), ty)
                .map_err(|e| self.error(e.to_string()))?;

            rest = &rest[start + close + 1..];
        }
        out.push_str(rest);
        self.text = out;
        Ok(())
    }
}

/// Type of a late-bound marker. The `SESSION.`/`ENV.` prefixes reclassify the
/// tag regardless of an explicit annotation; otherwise an explicit tag is
/// parsed and the default is `string`.
fn classify_marker(name: &str, tag: Option<&str>) -> trellis_commons::Result<ParamType> {
    if name.starts_with(SESSION_PREFIX) {
        return Ok(ParamType::Session);
    }
    if name.starts_with(ENV_PREFIX) {
        return Ok(ParamType::Env);
    }
    match tag {
        Some(tag) => ParamType::from_tag(tag),
        None => Ok(ParamType::String),
    }
}

/// Parameter name of a marker: dots become underscores.
fn marker_param_name(name: &str) -> String {
    name.replace('.', "_")
}

/// Synthesize a parameter name from a slot's canonical source text: strip all
/// whitespace, then replace dots with underscores. Deterministic under
/// formatting variation because whitespace never survives.
fn synthesize_name(text: &str) -> String {
    text.chars()
        .filter(|c| !c.is_whitespace())
        .map(|c| if c == '.' { '_' } else { c })
        .collect()
}

/// When `text` ends with `%{name:`, return `name`.
fn trailing_marker_prefix(text: &str) -> Option<String> {
    let stripped = text.strip_suffix(':')?;
    let name_start = stripped
        .char_indices()
        .rev()
        .take_while(|(_, c)| c.is_ascii_alphanumeric() || *c == '_' || *c == '.')
        .last()
        .map(|(i, _)| i)?;
    let name = &stripped[name_start..];
    if name.is_empty() {
        return None;
    }
    stripped[..name_start]
        .ends_with("%{")
        .then(|| name.to_string())
}
