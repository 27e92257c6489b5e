//! Include/exclude disposition of project paths.
//!
//! Patterns are compiled once into two [`GlobSet`]s. Paths are always
//! slash-separated and relative to the project root, so the same matcher is
//! consulted at every depth of the walk.
//!
//! Whether a pattern "references something beneath" a directory is decided by
//! literal prefix checks, not by intersecting globs. The approximation can only
//! produce extra `Partial` results, never a wrong `Included` or `Excluded`.

use std::collections::BTreeSet;

use globset::{Glob, GlobBuilder, GlobSet, GlobSetBuilder};

use crate::{FarmError, Result};

/// What to do with one candidate path
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Disposition {
    /// Leave the path out of the farm
    Excluded,
    /// Link the path as a whole
    Included,
    /// A directory that must be expanded entry by entry, because a pattern
    /// names something inside it.
    Partial { inner_patterns: Vec<String> },
}

/// One include or exclude pattern after normalisation
#[derive(Debug, Clone)]
struct Pattern {
    text: String,
    segments: Vec<String>,
}

impl Pattern {
    fn parse(raw: &str) -> Option<Self> {
        let mut text = raw.trim();
        while let Some(rest) = text.strip_prefix("./") {
            text = rest;
        }
        let text = text.trim_start_matches('/').trim_end_matches('/');
        if text.is_empty() {
            return None;
        }
        Some(Self {
            text: text.to_string(),
            segments: text.split('/').map(str::to_string).collect(),
        })
    }

    /// Whether the pattern can match anything strictly below `dir`.
    fn references_beneath(&self, dir: &str) -> bool {
        if self.text.starts_with("**") {
            return true;
        }
        if self
            .text
            .strip_prefix(dir)
            .is_some_and(|rest| rest.starts_with('/'))
        {
            return true;
        }

        // Mid-path wildcards (`a/*/c/**`): any directory under the literal
        // prefix may lead to a match, as long as it is shallower than the
        // pattern or the wildcard tail can absorb extra depth. A trailing `**`
        // only reaches inside a directory the stem already matched.
        let body = match self.segments.split_last() {
            Some((last, rest)) if last == "**" => rest,
            _ => &self.segments[..],
        };
        let Some(first_wild) = body.iter().position(|s| has_wildcard(s)) else {
            return false;
        };
        if first_wild + 1 >= body.len() {
            return false;
        }
        let dir_segments: Vec<&str> = dir.split('/').collect();
        let prefix = &body[..first_wild];
        if dir_segments.len() < prefix.len()
            || prefix.iter().zip(&dir_segments).any(|(p, d)| p.as_str() != *d)
        {
            return false;
        }
        dir_segments.len() < body.len() || body[first_wild..].iter().any(|s| s.contains("**"))
    }

    /// Top-level directory this include pattern confines, `None` for the whole tree
    fn scope(&self) -> Option<&str> {
        match self.segments.as_slice() {
            [first, _, ..] if !has_wildcard(first) => Some(first.as_str()),
            _ => None,
        }
    }
}

fn has_wildcard(segment: &str) -> bool {
    segment.contains(['*', '?', '[', '{'])
}

fn compile(patterns: &[Pattern]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(glob(&pattern.text)?);
        // `dir/**` covers `dir` itself as well as everything in it
        if let Some(stem) = pattern.text.strip_suffix("/**") {
            builder.add(glob(stem)?);
        }
    }
    builder.build().map_err(|source| FarmError::InvalidPattern {
        pattern: patterns
            .iter()
            .map(|p| p.text.as_str())
            .collect::<Vec<_>>()
            .join(", "),
        source,
    })
}

fn glob(text: &str) -> Result<Glob> {
    GlobBuilder::new(text)
        .literal_separator(true)
        .build()
        .map_err(|source| FarmError::InvalidPattern {
            pattern: text.to_string(),
            source,
        })
}

/// Compiled include and exclude lists
#[derive(Debug, Clone)]
pub struct PatternMatcher {
    include: Vec<Pattern>,
    exclude: Vec<Pattern>,
    include_set: GlobSet,
    exclude_set: GlobSet,
    /// Exact paths kept free for overlay files, whatever the patterns say
    reserved: BTreeSet<String>,
}

impl PatternMatcher {
    pub fn new<S: AsRef<str>>(include: &[S], exclude: &[S]) -> Result<Self> {
        let include: Vec<Pattern> = include
            .iter()
            .filter_map(|p| Pattern::parse(p.as_ref()))
            .collect();
        let exclude: Vec<Pattern> = exclude
            .iter()
            .filter_map(|p| Pattern::parse(p.as_ref()))
            .collect();
        Ok(Self {
            include_set: compile(&include)?,
            exclude_set: compile(&exclude)?,
            include,
            exclude,
            reserved: BTreeSet::new(),
        })
    }

    /// Reserve exact relative paths: each is excluded and its parent
    /// directories are expanded, leaving real directories to place it in.
    pub fn with_reserved<I, S>(mut self, paths: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.reserved.extend(
            paths
                .into_iter()
                .map(|p| p.as_ref().trim_matches('/').to_string())
                .filter(|p| !p.is_empty()),
        );
        self
    }

    /// A matcher with no patterns; everything is included
    pub fn empty() -> Self {
        Self {
            include: Vec::new(),
            exclude: Vec::new(),
            include_set: GlobSet::empty(),
            exclude_set: GlobSet::empty(),
            reserved: BTreeSet::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.include.is_empty() && self.exclude.is_empty() && self.reserved.is_empty()
    }

    /// Disposition of `rel`, treating it as a possible directory.
    pub fn disposition(&self, rel: &str) -> Disposition {
        self.disposition_for(rel, true)
    }

    /// Disposition of `rel`. Files never come back `Partial`.
    pub fn disposition_for(&self, rel: &str, is_dir: bool) -> Disposition {
        let rel = rel.trim_matches('/');
        if rel.is_empty() {
            return Disposition::Included;
        }
        if self.reserved.contains(rel) {
            return Disposition::Excluded;
        }
        if is_dir && self.reserves_beneath(rel) {
            return Disposition::Partial {
                inner_patterns: Vec::new(),
            };
        }

        match (self.include.is_empty(), self.exclude.is_empty()) {
            (true, true) => Disposition::Included,

            // Exclude-only: default open
            (true, false) => {
                if self.exclude_set.is_match(rel) {
                    Disposition::Excluded
                } else if is_dir && referenced(&self.exclude, rel).next().is_some() {
                    Disposition::Partial {
                        inner_patterns: Vec::new(),
                    }
                } else {
                    Disposition::Included
                }
            }

            // Include-only: default closed inside the scopes the includes name
            (false, true) => {
                if self.include_set.is_match(rel) {
                    return Disposition::Included;
                }
                if is_dir {
                    let inner = collect(referenced(&self.include, rel));
                    if !inner.is_empty() {
                        return Disposition::Partial {
                            inner_patterns: inner,
                        };
                    }
                }
                if self.in_include_scope(rel) {
                    Disposition::Excluded
                } else {
                    Disposition::Included
                }
            }

            // Both: includes carve exceptions out of the excluded tree
            (false, false) => {
                if self.include_set.is_match(rel) {
                    return Disposition::Included;
                }
                let excluded = self.exclude_set.is_match(rel);
                if is_dir {
                    let mut inner = collect(referenced(&self.include, rel));
                    // An excluded directory is only opened up for an include
                    if !excluded {
                        inner.extend(referenced(&self.exclude, rel).map(|p| p.text.clone()));
                    }
                    if !inner.is_empty() {
                        return Disposition::Partial {
                            inner_patterns: inner,
                        };
                    }
                }
                if excluded {
                    Disposition::Excluded
                } else {
                    Disposition::Included
                }
            }
        }
    }

    fn reserves_beneath(&self, dir: &str) -> bool {
        // Reserved paths sort right after their directory's "dir/" prefix
        let prefix = format!("{dir}/");
        self.reserved
            .range(prefix.clone()..)
            .next()
            .is_some_and(|p| p.starts_with(&prefix))
    }

    fn in_include_scope(&self, rel: &str) -> bool {
        let top = rel.split('/').next().unwrap_or(rel);
        self.include.iter().any(|p| match p.scope() {
            None => true,
            Some(scope) => scope == top,
        })
    }
}

fn referenced<'a>(patterns: &'a [Pattern], dir: &'a str) -> impl Iterator<Item = &'a Pattern> {
    patterns.iter().filter(move |p| p.references_beneath(dir))
}

fn collect<'a>(patterns: impl Iterator<Item = &'a Pattern>) -> Vec<String> {
    patterns.map(|p| p.text.clone()).collect()
}
