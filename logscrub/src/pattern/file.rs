//! Pattern-file loading.
//!
//! One pattern per line, `name|literal|regex|replacement`. Empty lines and
//! lines starting with `#` are comments. The `literal` field may be empty
//! (an anchor is then extracted from the regex); the `replacement` field may
//! be empty or omitted, in which case `[REDACTED:<name>]` is synthesised at
//! build time. A top-level `|` inside the regex field is indistinguishable
//! from the field separator, so alternations must be wrapped in a group that
//! keeps the separator count at three.
//!
//! Malformed lines are logged (basename only) and skipped; they never abort
//! the load. Paths containing `..` are rejected outright, absolute paths are
//! rejected unless `LOGSCRUB_ALLOW_ABSOLUTE=1` is set.

use std::{
    fs,
    path::{Component, Path},
};

use tracing::{debug, warn};

use crate::{
    pattern::{BuildError, PatternSpec},
    MAX_LITERAL_LEN, MAX_NAME_LEN, MAX_REPLACEMENT_LEN,
};

/// Environment flag that permits absolute pattern paths.
pub const ALLOW_ABSOLUTE_ENV: &str = "LOGSCRUB_ALLOW_ABSOLUTE";

/// Loads every pattern from one file.
pub(crate) fn load_file(path: &Path) -> Result<Vec<PatternSpec>, BuildError> {
    check_path(path)?;
    let name = basename(path);
    let text = fs::read_to_string(path).map_err(|source| BuildError::Io {
        file: name.clone(),
        source,
    })?;
    Ok(parse_lines(&text, &name))
}

/// Loads `.txt` files from a directory in iteration order. A failing file is
/// logged and skipped; the others still load.
pub(crate) fn load_dir(dir: &Path) -> Result<Vec<PatternSpec>, BuildError> {
    check_path(dir)?;
    let entries = fs::read_dir(dir).map_err(|source| BuildError::Io {
        file: basename(dir),
        source,
    })?;
    let mut specs = Vec::new();
    for entry in entries {
        let entry = match entry {
            Ok(e) => e,
            Err(e) => {
                warn!(dir = %basename(dir), error = %e, "skipping unreadable directory entry");
                continue;
            }
        };
        let path = entry.path();
        let file = basename(&path);
        if file.starts_with('.') || !file.ends_with(".txt") || !path.is_file() {
            continue;
        }
        match load_file(&path) {
            Ok(mut s) => specs.append(&mut s),
            Err(e) => warn!(file = %file, error = %e, "skipping pattern file"),
        }
    }
    Ok(specs)
}

fn parse_lines(text: &str, file: &str) -> Vec<PatternSpec> {
    let mut specs = Vec::new();
    for (lineno, raw) in text.lines().enumerate() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        match parse_line(line) {
            Ok(spec) => specs.push(spec),
            Err(reason) => {
                warn!(file = %file, line = lineno + 1, %reason, "skipping malformed pattern line");
            }
        }
    }
    debug!(file = %file, count = specs.len(), "loaded pattern file");
    specs
}

fn parse_line(line: &str) -> Result<PatternSpec, String> {
    let mut fields = line.splitn(4, '|');
    let name = fields.next().unwrap_or("").trim();
    let literal = fields.next().ok_or("missing literal field")?;
    let regex = fields.next().ok_or("missing regex field")?;
    let replacement = fields.next().unwrap_or("");

    if name.is_empty() {
        return Err("empty pattern name".into());
    }
    if name.len() > MAX_NAME_LEN {
        return Err(format!("name exceeds {MAX_NAME_LEN} bytes"));
    }
    if literal.len() > MAX_LITERAL_LEN {
        return Err(format!("literal exceeds {MAX_LITERAL_LEN} bytes"));
    }
    if regex.is_empty() {
        return Err("empty regex field".into());
    }
    if replacement.len() > MAX_REPLACEMENT_LEN {
        return Err(format!("replacement exceeds {MAX_REPLACEMENT_LEN} bytes"));
    }

    Ok(PatternSpec::builder(name, regex)
        .maybe_literal((!literal.is_empty()).then(|| literal.as_bytes().to_vec()))
        .maybe_replacement((!replacement.is_empty()).then(|| replacement.as_bytes().to_vec()))
        .build())
}

/// Rejects traversal and (by default) absolute paths. Diagnostics carry only
/// the basename.
fn check_path(path: &Path) -> Result<(), BuildError> {
    if path
        .components()
        .any(|c| matches!(c, Component::ParentDir))
    {
        return Err(BuildError::UnsafePath(basename(path)));
    }
    if path.is_absolute() && !absolute_allowed() {
        return Err(BuildError::UnsafePath(basename(path)));
    }
    Ok(())
}

fn absolute_allowed() -> bool {
    std::env::var_os(ALLOW_ABSOLUTE_ENV).is_some_and(|v| v == "1")
}

pub(crate) fn basename(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "<path>".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_full_and_partial_lines() {
        let text = "\
# comment
aws_key|AKIA|AKIA[0-9A-Z]{16}|<AWS-KEY>

password||password\\s*=\\s*\\S+
";
        let specs = parse_lines(text, "test.txt");
        assert_eq!(specs.len(), 2);
        assert_eq!(specs[0].name, "aws_key");
        assert_eq!(specs[0].literal.as_deref(), Some(b"AKIA".as_slice()));
        assert_eq!(specs[0].replacement.as_deref(), Some(b"<AWS-KEY>".as_slice()));
        assert_eq!(specs[1].name, "password");
        assert_eq!(specs[1].literal, None);
        assert_eq!(specs[1].replacement, None);
    }

    #[test]
    fn malformed_lines_are_skipped_not_fatal() {
        let text = "\
just-a-name
|empty|name|
ok|lit|li[t]eral|
";
        let specs = parse_lines(text, "test.txt");
        assert_eq!(specs.len(), 1);
        assert_eq!(specs[0].name, "ok");
    }

    #[test]
    fn oversized_fields_are_rejected_per_line() {
        let long_name = "n".repeat(MAX_NAME_LEN + 1);
        let text = format!("{long_name}|x|y|z\nfine|abc|abc.*|");
        let specs = parse_lines(&text, "test.txt");
        assert_eq!(specs.len(), 1);
        assert_eq!(specs[0].name, "fine");
    }

    #[test]
    fn parent_components_are_unsafe() {
        let err = check_path(Path::new("patterns/../secrets.txt")).unwrap_err();
        assert!(matches!(err, BuildError::UnsafePath(_)));
        // The diagnostic reveals only the basename.
        assert_eq!(err.to_string().contains("patterns/"), false);
    }

    #[test]
    fn relative_paths_pass_policy() {
        assert!(check_path(Path::new("patterns/default.txt")).is_ok());
    }
}
