//! Dynamic SQL, the server-only escape hatch.
//!
//! Two behaviors the client library refuses: `sql(text)` builds an unescaped
//! fragment whose fingerprint is empty, and a merge with any dynamic
//! participant flattens fragment texts into the parent and strips the
//! fingerprint. Fingerprint-preserving merges delegate to the compile-time
//! merge in `trellis-commons`.

use trellis_commons::errors::Result;
use trellis_commons::{merge as static_merge, Fingerprint, ParamSchema, Query};

/// Marker in compiled parent text where fragment text is spliced.
const FRAGMENT_SLOT: &str = "%{}";

/// Build an unescaped dynamic fragment from a literal string.
///
/// The fragment's fingerprint is empty, which makes it illegal on the client
/// and forces any merge it participates in onto the flattening path.
pub fn sql(text: impl Into<String>) -> Query {
    Query {
        fingerprint: Fingerprint::dynamic(),
        text: text.into(),
        params: ParamSchema::new(),
        validators: Vec::new(),
        referenced: Vec::new(),
        fragments: Vec::new(),
    }
}

/// Merge fragments into a parent query.
///
/// When every participant is compiled this is the fingerprint-preserving
/// merge. When any participant is dynamic, fragment texts are flattened into
/// the parent's `%{}` slots (appended when no slot remains), placeholders are
/// renumbered across the combined text, and the fingerprint is stripped.
pub fn merge(parent: &Query, fragments: &[&Query]) -> Result<Query> {
    let outcome = static_merge(parent, fragments)?;

    let any_dynamic = parent.fingerprint.is_dynamic()
        || fragments.iter().any(|f| f.fingerprint.is_dynamic());
    if !any_dynamic {
        return Ok(outcome.query);
    }

    let mut text = parent.text.clone();
    let mut offset = max_placeholder(&text);

    for fragment in fragments {
        let (renumbered, count) = renumber_placeholders(&fragment.text, offset);
        offset += count;
        if let Some(pos) = text.find(FRAGMENT_SLOT) {
            text.replace_range(pos..pos + FRAGMENT_SLOT.len(), &renumbered);
        } else {
            text.push(' ');
            text.push_str(&renumbered);
        }
    }

    let mut merged = outcome.query;
    merged.fingerprint = Fingerprint::dynamic();
    merged.text = text;
    merged.fragments.clear();
    Ok(merged)
}

/// Highest `$k` placeholder number in `text`.
fn max_placeholder(text: &str) -> u32 {
    let mut max = 0;
    for (num, _) in placeholders(text) {
        max = max.max(num);
    }
    max
}

/// Rewrite every `$k` in `text` to `$(k + offset)`; returns the rewritten
/// text and the number of distinct placeholders seen.
fn renumber_placeholders(text: &str, offset: u32) -> (String, u32) {
    let mut out = String::with_capacity(text.len());
    let mut last = 0;
    let mut distinct = 0;
    for (num, range) in placeholders(text) {
        out.push_str(&text[last..range.0]);
        out.push('$');
        out.push_str(&(num + offset).to_string());
        last = range.1;
        distinct = distinct.max(num);
    }
    out.push_str(&text[last..]);
    (out, distinct)
}

/// Yield `(number, (start, end))` for each `$k` occurrence.
fn placeholders(text: &str) -> Vec<(u32, (usize, usize))> {
    let bytes = text.as_bytes();
    let mut found = Vec::new();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'$' {
            let start = i;
            let mut j = i + 1;
            while j < bytes.len() && bytes[j].is_ascii_digit() {
                j += 1;
            }
            if j > i + 1 {
                if let Ok(num) = text[i + 1..j].parse::<u32>() {
                    found.push((num, (start, j)));
                }
                i = j;
                continue;
            }
        }
        i += 1;
    }
    found
}
