//! Ignore-by-agent filter

use dashmap::DashMap;
use regex::Regex;

use crate::error::Result;

/// Compiled crawler patterns, keyed by their source text.
///
/// Patterns are compiled on first use and kept for the life of the cache.
#[derive(Debug, Default)]
pub struct PatternCache {
    compiled: DashMap<String, Regex>,
}

impl PatternCache {
    /// Empty cache
    pub fn new() -> Self {
        Self::default()
    }

    /// Compile `pattern`, reusing an earlier compilation
    pub fn compile(&self, pattern: &str) -> Result<Regex> {
        if let Some(regex) = self.compiled.get(pattern) {
            return Ok(regex.clone());
        }

        let regex = Regex::new(pattern)?;
        self.compiled.insert(pattern.to_owned(), regex.clone());
        Ok(regex)
    }

    /// Compile every pattern, failing on the first malformed one
    pub fn validate(&self, patterns: &[String]) -> Result<()> {
        for pattern in patterns {
            self.compile(pattern)?;
        }
        Ok(())
    }

    /// Whether `agent` matches any of `patterns`, tried in order.
    ///
    /// An absent agent never matches. A malformed pattern is a configuration
    /// error.
    pub fn is_crawler(&self, patterns: &[String], agent: Option<&str>) -> Result<bool> {
        let Some(agent) = agent else {
            return Ok(false);
        };

        for pattern in patterns {
            if self.compile(pattern)?.is_match(agent) {
                return Ok(true);
            }
        }

        Ok(false)
    }

    /// Number of compiled patterns held
    pub fn len(&self) -> usize {
        self.compiled.len()
    }

    /// Whether nothing has been compiled yet
    pub fn is_empty(&self) -> bool {
        self.compiled.is_empty()
    }
}
