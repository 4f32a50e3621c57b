use std::sync::{
    Arc,
    atomic::{AtomicUsize, Ordering},
};

use regex::Regex;
use scc::hash_map::Entry;

/// Compiled path patterns, memoized by source string.
///
/// An entry is written once and never replaced. Concurrent first lookups of the
/// same pattern serialize on the map entry, so exactly one compilation happens.
#[derive(Debug, Default)]
pub struct PatternCache {
    compiled: scc::HashMap<String, Arc<Regex>>,
    compilations: AtomicUsize,
}

impl PatternCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn get_or_compile(&self, pattern: &str) -> Result<Arc<Regex>, regex::Error> {
        if let Some(regex) = self
            .compiled
            .read_async(pattern, |_, regex| Arc::clone(regex))
            .await
        {
            return Ok(regex);
        }

        match self.compiled.entry_async(pattern.to_string()).await {
            Entry::Occupied(entry) => Ok(Arc::clone(entry.get())),
            Entry::Vacant(entry) => {
                let regex = Arc::new(Regex::new(pattern)?);
                self.compilations.fetch_add(1, Ordering::Relaxed);
                entry.insert_entry(Arc::clone(&regex));
                Ok(regex)
            }
        }
    }

    /// Convenience wrapper: does `pattern` match `path`? Invalid patterns never match.
    pub async fn is_match(&self, pattern: &str, path: &str) -> bool {
        match self.get_or_compile(pattern).await {
            Ok(regex) => regex.is_match(path),
            Err(e) => {
                tracing::error!(pattern, error = %e, "failed to compile location pattern");
                false
            }
        }
    }

    /// Number of compilations performed so far
    pub fn compilations(&self) -> usize {
        self.compilations.load(Ordering::Relaxed)
    }

    pub fn len(&self) -> usize {
        self.compiled.len()
    }

    pub fn is_empty(&self) -> bool {
        self.compiled.is_empty()
    }
}
