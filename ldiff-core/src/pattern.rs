//! Filename selection from a list of `*` wildcard patterns.
//!
//! `*` matches any run of characters, `/` included. Every other character is
//! literal, and a pattern must match the whole file name.

use crate::error::PatternError;
use globset::{GlobBuilder, GlobSet, GlobSetBuilder};
use std::path::Path;

#[derive(Clone, Debug)]
pub struct PatternFilter {
    patterns: Vec<String>,
    set: GlobSet,
}

impl PatternFilter {
    pub fn new<I, S>(patterns: I) -> Result<Self, PatternError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let patterns: Vec<String> = patterns.into_iter().map(Into::into).collect();
        let mut builder = GlobSetBuilder::new();
        for p in &patterns {
            let glob = GlobBuilder::new(&literal_glob(p))
                .literal_separator(false)
                .backslash_escape(true)
                .build()
                .map_err(|source| PatternError::Compile { pattern: p.clone(), source })?;
            builder.add(glob);
        }
        let set = builder
            .build()
            .map_err(|source| PatternError::Compile { pattern: patterns.join(", "), source })?;
        Ok(Self { patterns, set })
    }

    /// One pattern per line; lines are trimmed and blank lines dropped.
    pub fn parse_list(text: &str) -> Result<Self, PatternError> {
        Self::new(text.lines().map(str::trim).filter(|l| !l.is_empty()))
    }

    pub fn load(path: &Path) -> Result<Self, PatternError> {
        let text = std::fs::read_to_string(path)
            .map_err(|source| PatternError::Read { path: path.into(), source })?;
        let filter = Self::parse_list(&text)?;
        for (i, p) in filter.patterns.iter().enumerate() {
            log::info!("pattern {}: {}", i + 1, p);
        }
        Ok(filter)
    }

    /// True iff `file_name` matches at least one pattern. An empty list matches nothing.
    pub fn matches(&self, file_name: &str) -> bool {
        self.set.is_match(file_name)
    }

    pub fn patterns(&self) -> &[String] {
        &self.patterns
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }
}

/// Rewrite a pattern so only `*` is special. Runs of `*` collapse to one so
/// globset never sees a recursive `**`.
fn literal_glob(pattern: &str) -> String {
    let mut out = String::with_capacity(pattern.len() + 8);
    let mut prev_star = false;
    for c in pattern.chars() {
        match c {
            '*' if prev_star => continue,
            '*' => out.push('*'),
            '?' | '[' | ']' | '{' | '}' | ',' | '\\' | '!' => {
                out.push('\\');
                out.push(c);
            }
            _ => out.push(c),
        }
        prev_star = c == '*';
    }
    out
}
