//! Best-effort literal anchor extraction from a regex.
//!
//! Walks the parsed HIR left to right: leading anchors and look-arounds are
//! skipped, literal bytes accumulate, and the walk stops at the first node
//! that is not a plain literal (class, repetition, alternation, ...). The
//! result is only used when it is long enough to be discriminative.

use regex_syntax::hir::{Hir, HirKind};

use crate::{MAX_LITERAL_LEN, MIN_EXTRACTED_LITERAL_LEN};

/// Extracts a literal prefix from `pattern`, or `None` when the prefix is
/// shorter than [`MIN_EXTRACTED_LITERAL_LEN`] bytes or the pattern does not
/// parse.
pub(crate) fn extract_literal(pattern: &str) -> Option<Vec<u8>> {
    let hir = regex_syntax::ParserBuilder::new()
        .utf8(false)
        .unicode(false)
        .build()
        .parse(pattern)
        .ok()?;
    let mut prefix = Vec::new();
    walk(&hir, &mut prefix);
    prefix.truncate(MAX_LITERAL_LEN);
    (prefix.len() >= MIN_EXTRACTED_LITERAL_LEN).then_some(prefix)
}

/// Returns `false` once the literal prefix has ended.
fn walk(hir: &Hir, prefix: &mut Vec<u8>) -> bool {
    match hir.kind() {
        HirKind::Literal(lit) => {
            prefix.extend_from_slice(&lit.0);
            true
        }
        // Anchors and other look-arounds consume no bytes.
        HirKind::Look(_) => true,
        HirKind::Capture(cap) => walk(&cap.sub, prefix),
        HirKind::Concat(parts) => {
            for part in parts {
                if !walk(part, prefix) {
                    return false;
                }
            }
            true
        }
        // First metacharacter ends the prefix.
        HirKind::Empty
        | HirKind::Class(_)
        | HirKind::Repetition(_)
        | HirKind::Alternation(_) => false,
    }
}
