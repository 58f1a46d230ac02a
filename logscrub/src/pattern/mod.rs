//! Patterns and the frozen pattern set.
//!
//! A [`PatternSet`] owns the compiled regexes, literal anchors and
//! replacement strings for every configured pattern, plus the automata the
//! scan cascade runs: the **full** automaton over every literal, an optional
//! tiny **sentinel** automaton over broadly discriminative strings, and an
//! optional **hot** automaton (always flat, for L1 residency) over the
//! literals of a few high-frequency patterns. The set is immutable once
//! built and is shared read-only across workers.

use std::{io, path::Path, sync::Arc};

use bon::{bon, Builder};
use regex_automata::{meta, util::syntax};
use thiserror::Error;
use tracing::{debug, warn};

use crate::{
    automaton::{Automaton, AutomatonBuilder, Layout, TooManyStates},
    prefilter::TriggerSet,
    tuning::Tuning,
    DEFAULT_STATE_LIMIT, MAX_LITERAL_LEN, MAX_NAME_LEN, MAX_PATTERNS, MAX_REPLACEMENT_LEN,
};

pub(crate) mod file;
mod literal;

pub use file::ALLOW_ABSOLUTE_ENV;

/// Broadly discriminative strings almost always present in records that any
/// of the usual secret shapes can match. Compile-time policy, not
/// configuration.
const SENTINEL_LITERALS: &[&[u8]] = &[
    b"password",
    b"passwd",
    b"secret",
    b"token",
    b"key",
    b"AKIA",
    b"-----BEGIN",
    b"@",
    b"Bearer ",
    b"ssh-rsa",
    b"ghp_",
    b"xox",
];

/// Patterns that dominate real-world hit rates; their literals form the hot
/// automaton when present in the set.
const HOT_PATTERN_NAMES: &[&str] = &[
    "password",
    "aws_key",
    "email",
    "bearer_token",
    "private_key",
];

/// Dense pattern id: the pattern's position in its owning set.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct PatternId(pub(crate) u16);

impl PatternId {
    #[inline]
    pub fn as_usize(self) -> usize {
        self.0 as usize
    }
}

/// Pattern set build failures. Build-time faults reject the whole set; the
/// caller's previous set (if any) stays usable.
#[derive(Debug, Error)]
pub enum BuildError {
    #[error("pattern set has {0} patterns, limit is {limit}", limit = MAX_PATTERNS)]
    TooManyPatterns(usize),
    #[error(transparent)]
    TooManyStates(#[from] TooManyStates),
    #[error("pattern `{name}`: {source}")]
    Regex {
        name: String,
        #[source]
        source: Box<meta::BuildError>,
    },
    #[error("pattern `{0}`: name exceeds {limit} bytes", limit = MAX_NAME_LEN)]
    NameTooLong(String),
    #[error("pattern `{0}`: literal exceeds {limit} bytes", limit = MAX_LITERAL_LEN)]
    LiteralTooLong(String),
    #[error("pattern `{0}`: empty literal")]
    EmptyLiteral(String),
    #[error("pattern `{0}`: replacement exceeds {limit} bytes", limit = MAX_REPLACEMENT_LEN)]
    ReplacementTooLong(String),
    #[error("unsafe pattern path `{0}`")]
    UnsafePath(String),
    #[error("pattern file `{file}`: {source}")]
    Io {
        file: String,
        #[source]
        source: io::Error,
    },
}

/// One pattern as supplied by a caller or a pattern file, before compilation.
#[derive(Builder, Clone, Debug)]
pub struct PatternSpec {
    #[builder(start_fn, into)]
    pub name: String,
    #[builder(start_fn, into)]
    pub regex: String,
    /// Literal anchor; extracted from the regex when absent.
    pub literal: Option<Vec<u8>>,
    /// Replacement text; `[REDACTED:<name>]` when absent.
    pub replacement: Option<Vec<u8>>,
}

/// A named, compiled redaction unit. Immutable after the owning set is
/// built.
#[derive(Debug)]
pub struct Pattern {
    name: String,
    literal: Option<Vec<u8>>,
    regex: meta::Regex,
    replacement: Vec<u8>,
    id: PatternId,
}

impl Pattern {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn literal(&self) -> Option<&[u8]> {
        self.literal.as_deref()
    }

    pub fn replacement(&self) -> &[u8] {
        &self.replacement
    }

    pub fn id(&self) -> PatternId {
        self.id
    }

    pub(crate) fn regex(&self) -> &meta::Regex {
        &self.regex
    }
}

/// The frozen pattern set and its derived automata.
#[derive(Debug)]
pub struct PatternSet {
    patterns: Vec<Pattern>,
    full: Automaton,
    sentinel: Option<Automaton>,
    hot: Option<Automaton>,
    triggers: TriggerSet,
    tuning: Tuning,
}

#[bon]
impl PatternSet {
    /// Compiles `specs` into a frozen set.
    ///
    /// The sentinel and hot automata are best-effort: when their build fails
    /// the cascade degrades to the remaining tiers and the set still works.
    #[builder]
    pub fn new(
        #[builder(start_fn)] specs: Vec<PatternSpec>,
        /// Build the sentinel automaton (tier-2 negative gate).
        #[builder(default = true)]
        sentinel: bool,
        /// Build the hot automaton (fast positive gate over high-frequency
        /// patterns).
        #[builder(default = true)]
        hot: bool,
        #[builder(default)] tuning: Tuning,
        /// Force a transition-table layout for the full automaton instead of
        /// letting the state count and [`Tuning::flat_state_budget`] decide.
        layout: Option<Layout>,
        #[builder(default = DEFAULT_STATE_LIMIT)] state_limit: usize,
    ) -> Result<PatternSet, BuildError> {
        if specs.len() > MAX_PATTERNS {
            return Err(BuildError::TooManyPatterns(specs.len()));
        }

        let mut patterns = Vec::with_capacity(specs.len());
        for (i, spec) in specs.into_iter().enumerate() {
            patterns.push(compile(spec, PatternId(i as u16))?);
        }

        let mut full_builder = AutomatonBuilder::new(state_limit);
        for p in &patterns {
            match &p.literal {
                Some(lit) => full_builder.add_literal(lit, p.id.0)?,
                None => {
                    // No anchor means the scanner can never surface this
                    // pattern as a candidate.
                    warn!(pattern = %p.name, "no literal anchor; pattern is unreachable");
                }
            }
        }
        let states = full_builder.state_count();
        let chosen = layout.unwrap_or(if states <= tuning.flat_state_budget {
            Layout::Flat
        } else {
            Layout::RowCompressed
        });
        let full = full_builder.build(chosen, &tuning);
        let triggers = TriggerSet::from_automaton(&full, &tuning);

        let sentinel = if sentinel {
            build_sentinel(&tuning)
        } else {
            None
        };
        let hot = if hot { build_hot(&patterns, &tuning) } else { None };

        debug!(
            patterns = patterns.len(),
            states,
            layout = ?chosen,
            triggers = triggers.len(),
            triggers_complete = triggers.is_complete(),
            sentinel = sentinel.is_some(),
            hot = hot.is_some(),
            "pattern set built"
        );

        Ok(PatternSet {
            patterns,
            full,
            sentinel,
            hot,
            triggers,
            tuning,
        })
    }
}

impl PatternSet {
    /// Loads one pattern file with the default build options.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Arc<PatternSet>, BuildError> {
        let specs = file::load_file(path.as_ref())?;
        Ok(Arc::new(PatternSet::builder(specs).build()?))
    }

    /// Loads every `.txt` pattern file in a directory with the default build
    /// options.
    pub fn from_dir(path: impl AsRef<Path>) -> Result<Arc<PatternSet>, BuildError> {
        let specs = file::load_dir(path.as_ref())?;
        Ok(Arc::new(PatternSet::builder(specs).build()?))
    }

    /// The built-in catalogue: AWS access keys, password assignments, email
    /// addresses, bearer tokens and PEM private-key headers.
    pub fn builtin_specs() -> Vec<PatternSpec> {
        vec![
            PatternSpec::builder("aws_key", "AKIA[0-9A-Z]{16}").build(),
            PatternSpec::builder("password", r"password\s*[:=]\s*\S+")
                .literal(b"password".to_vec())
                .build(),
            PatternSpec::builder("email", r"[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}")
                .literal(b"@".to_vec())
                .build(),
            PatternSpec::builder("bearer_token", r"Bearer [A-Za-z0-9\-._~+/]+=*")
                .literal(b"Bearer ".to_vec())
                .build(),
            PatternSpec::builder("private_key", r"-----BEGIN [A-Z ]*PRIVATE KEY-----")
                .literal(b"-----BEGIN".to_vec())
                .build(),
        ]
    }

    pub fn patterns(&self) -> &[Pattern] {
        &self.patterns
    }

    pub fn len(&self) -> usize {
        self.patterns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }

    pub fn get(&self, id: PatternId) -> Option<&Pattern> {
        self.patterns.get(id.as_usize())
    }

    pub(crate) fn full(&self) -> &Automaton {
        &self.full
    }

    pub(crate) fn sentinel(&self) -> Option<&Automaton> {
        self.sentinel.as_ref()
    }

    pub(crate) fn hot(&self) -> Option<&Automaton> {
        self.hot.as_ref()
    }

    pub(crate) fn triggers(&self) -> &TriggerSet {
        &self.triggers
    }

    #[allow(dead_code)]
    pub(crate) fn tuning(&self) -> &Tuning {
        &self.tuning
    }
}

fn compile(spec: PatternSpec, id: PatternId) -> Result<Pattern, BuildError> {
    if spec.name.is_empty() || spec.name.len() > MAX_NAME_LEN {
        return Err(BuildError::NameTooLong(truncate(&spec.name)));
    }

    let regex = meta::Regex::builder()
        .syntax(syntax::Config::new().utf8(false).unicode(false))
        .configure(meta::Config::new().utf8_empty(false))
        .build(&spec.regex)
        .map_err(|source| BuildError::Regex {
            name: spec.name.clone(),
            source: Box::new(source),
        })?;

    let literal = match spec.literal {
        Some(lit) if lit.is_empty() => return Err(BuildError::EmptyLiteral(spec.name)),
        Some(lit) if lit.len() > MAX_LITERAL_LEN => {
            return Err(BuildError::LiteralTooLong(spec.name))
        }
        Some(lit) => Some(lit),
        None => literal::extract_literal(&spec.regex),
    };

    let replacement = match spec.replacement {
        Some(r) if r.len() > MAX_REPLACEMENT_LEN => {
            return Err(BuildError::ReplacementTooLong(spec.name))
        }
        Some(r) if !r.is_empty() => r,
        _ => format!("[REDACTED:{}]", spec.name).into_bytes(),
    };

    Ok(Pattern {
        name: spec.name,
        literal,
        regex,
        replacement,
        id,
    })
}

fn build_sentinel(tuning: &Tuning) -> Option<Automaton> {
    let mut b = AutomatonBuilder::new(DEFAULT_STATE_LIMIT);
    for (i, lit) in SENTINEL_LITERALS.iter().enumerate() {
        if let Err(e) = b.add_literal(lit, i as u16) {
            debug!(error = %e, "sentinel automaton degraded away");
            return None;
        }
    }
    Some(b.build(Layout::Flat, tuning))
}

fn build_hot(patterns: &[Pattern], tuning: &Tuning) -> Option<Automaton> {
    let mut b = AutomatonBuilder::new(DEFAULT_STATE_LIMIT);
    let mut any = false;
    for p in patterns {
        if !HOT_PATTERN_NAMES.contains(&p.name()) {
            continue;
        }
        let Some(lit) = p.literal() else { continue };
        if let Err(e) = b.add_literal(lit, p.id.0) {
            debug!(error = %e, "hot automaton degraded away");
            return None;
        }
        any = true;
    }
    // Always flat: the hot table must stay L1-resident.
    any.then(|| b.build(Layout::Flat, tuning))
}

fn truncate(name: &str) -> String {
    name.chars().take(32).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_the_builtin_catalogue() {
        let set = PatternSet::builder(PatternSet::builtin_specs())
            .build()
            .unwrap();
        assert_eq!(set.len(), 5);
        assert!(!set.full().is_empty());
        assert!(set.sentinel().is_some());
        assert!(set.hot().is_some());
        assert!(set.triggers().is_complete());
        let aws = &set.patterns()[0];
        assert_eq!(aws.name(), "aws_key");
        // Extracted from the regex, not supplied.
        assert_eq!(aws.literal(), Some(b"AKIA".as_slice()));
        assert_eq!(aws.replacement(), b"[REDACTED:aws_key]");
    }

    #[test]
    fn hot_automaton_stays_flat() {
        let set = PatternSet::builder(PatternSet::builtin_specs())
            .layout(Layout::RowCompressed)
            .build()
            .unwrap();
        assert_eq!(set.full().layout(), Layout::RowCompressed);
        assert_eq!(set.hot().unwrap().layout(), Layout::Flat);
    }

    #[test]
    fn optional_tiers_can_be_disabled() {
        let set = PatternSet::builder(PatternSet::builtin_specs())
            .sentinel(false)
            .hot(false)
            .build()
            .unwrap();
        assert!(set.sentinel().is_none());
        assert!(set.hot().is_none());
    }

    #[test]
    fn rejects_too_many_patterns() {
        let specs: Vec<PatternSpec> = (0..=MAX_PATTERNS)
            .map(|i| PatternSpec::builder(format!("p{i}"), "abc").build())
            .collect();
        assert!(matches!(
            PatternSet::builder(specs).build(),
            Err(BuildError::TooManyPatterns(_))
        ));
    }

    #[test]
    fn rejects_bad_regex_with_pattern_name() {
        let specs = vec![PatternSpec::builder("broken", "(").build()];
        let err = PatternSet::builder(specs).build().unwrap_err();
        assert!(err.to_string().contains("broken"));
    }

    #[test]
    fn rejects_oversized_fields() {
        let specs = vec![PatternSpec::builder("x".repeat(MAX_NAME_LEN + 1), "abc").build()];
        assert!(matches!(
            PatternSet::builder(specs).build(),
            Err(BuildError::NameTooLong(_))
        ));

        let specs = vec![PatternSpec::builder("p", "abc")
            .literal(vec![b'a'; MAX_LITERAL_LEN + 1])
            .build()];
        assert!(matches!(
            PatternSet::builder(specs).build(),
            Err(BuildError::LiteralTooLong(_))
        ));

        let specs = vec![PatternSpec::builder("p", "abc")
            .replacement(vec![b'r'; MAX_REPLACEMENT_LEN + 1])
            .build()];
        assert!(matches!(
            PatternSet::builder(specs).build(),
            Err(BuildError::ReplacementTooLong(_))
        ));
    }

    #[test]
    fn empty_set_builds() {
        let set = PatternSet::builder(Vec::new()).build().unwrap();
        assert!(set.is_empty());
        assert!(set.full().is_empty());
        assert!(set.triggers().is_empty());
    }

    #[test]
    fn state_limit_is_enforced() {
        let specs = vec![
            PatternSpec::builder("a", "abcdefgh").build(),
            PatternSpec::builder("b", "ijklmnop").build(),
        ];
        let err = PatternSet::builder(specs).state_limit(6).build().unwrap_err();
        assert!(matches!(err, BuildError::TooManyStates(_)));
    }
}
