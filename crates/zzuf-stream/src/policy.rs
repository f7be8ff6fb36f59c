//! Descriptor selection policy, evaluated once when a stream is opened.

use regex::Regex;
use std::ffi::CStr;

pub trait WatchPolicy: Send + Sync {
    fn should_watch(&self, path: &CStr) -> bool;
}

#[derive(Debug, thiserror::Error)]
pub enum PolicyError {
    #[error("invalid watch pattern {pattern:?}: {source}")]
    Pattern {
        pattern: String,
        #[source]
        source: regex::Error,
    },
}

/// Include/exclude regular expressions matched against the opened path.
///
/// An empty include list watches everything; an exclude match always wins.
#[derive(Debug, Default)]
pub struct PatternPolicy {
    include: Vec<Regex>,
    exclude: Vec<Regex>,
}

impl PatternPolicy {
    pub fn new<S: AsRef<str>>(include: &[S], exclude: &[S]) -> Result<Self, PolicyError> {
        Ok(Self {
            include: compile(include)?,
            exclude: compile(exclude)?,
        })
    }

    pub fn watch_all() -> Self {
        Self::default()
    }
}

fn compile<S: AsRef<str>>(patterns: &[S]) -> Result<Vec<Regex>, PolicyError> {
    patterns
        .iter()
        .map(|p| {
            Regex::new(p.as_ref()).map_err(|source| PolicyError::Pattern {
                pattern: p.as_ref().to_string(),
                source,
            })
        })
        .collect()
}

impl WatchPolicy for PatternPolicy {
    fn should_watch(&self, path: &CStr) -> bool {
        let path = path.to_string_lossy();
        if self.exclude.iter().any(|re| re.is_match(&path)) {
            return false;
        }
        self.include.is_empty() || self.include.iter().any(|re| re.is_match(&path))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_policy_watches_everything() {
        let p = PatternPolicy::watch_all();
        assert!(p.should_watch(c"/etc/passwd"));
    }

    #[test]
    fn include_and_exclude() {
        let p = PatternPolicy::new(&[r"\.png$", r"^/data/"], &[r"/data/keep"]).unwrap();
        assert!(p.should_watch(c"/tmp/a.png"));
        assert!(p.should_watch(c"/data/input.bin"));
        assert!(!p.should_watch(c"/data/keep.png"));
        assert!(!p.should_watch(c"/tmp/a.jpg"));
    }

    #[test]
    fn bad_pattern_is_reported() {
        let err = PatternPolicy::new(&["("], &[] as &[&str]).unwrap_err();
        assert!(err.to_string().contains("invalid watch pattern"));
    }
}
