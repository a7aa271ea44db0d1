//! Ordered replacement map.

use crate::{Error, Result};
use std::collections::HashMap;

/// Ordered mapping from sensitive term to replacement term.
///
/// Insertion order is kept because it decides which term wins when two
/// terms match at the same position.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReplacementMap {
    entries: Vec<(String, String)>,
    index: HashMap<String, usize>,
}

impl ReplacementMap {
    /// Creates an empty map.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a map from `(sensitive, replacement)` pairs in order.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Configuration`] on the first empty or duplicate term.
    pub fn from_pairs<I, K, V>(pairs: I) -> Result<Self>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let mut map = Self::new();
        for (sensitive, replacement) in pairs {
            map.insert(sensitive, replacement)?;
        }
        Ok(map)
    }

    /// Appends a term.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Configuration`] if either side is empty or the
    /// sensitive term is already present.
    pub fn insert(
        &mut self,
        sensitive: impl Into<String>,
        replacement: impl Into<String>,
    ) -> Result<()> {
        let sensitive = sensitive.into();
        let replacement = replacement.into();

        if sensitive.trim().is_empty() {
            return Err(Error::Configuration(
                "sensitive term must not be empty".to_string(),
            ));
        }
        if replacement.trim().is_empty() {
            return Err(Error::Configuration(format!(
                "replacement for term #{} must not be empty",
                self.entries.len() + 1
            )));
        }
        if self.index.contains_key(&sensitive) {
            return Err(Error::Configuration(format!(
                "sensitive term #{} is a duplicate",
                self.entries.len() + 1
            )));
        }

        self.index.insert(sensitive.clone(), self.entries.len());
        self.entries.push((sensitive, replacement));
        Ok(())
    }

    /// Returns the replacement for an exact sensitive term.
    #[must_use]
    pub fn get(&self, sensitive: &str) -> Option<&str> {
        self.index
            .get(sensitive)
            .map(|&i| self.entries[i].1.as_str())
    }

    /// Number of terms.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if no terms are configured.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterates `(sensitive, replacement)` pairs in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Inverts the map in insertion order.
    ///
    /// When several sensitive terms share a replacement the last inserted one
    /// is kept. The position of each replacement is that of its first
    /// occurrence, so the result is deterministic.
    #[must_use]
    pub fn inverted(&self) -> Vec<(String, String)> {
        let mut order: Vec<(String, String)> = Vec::with_capacity(self.entries.len());
        let mut position: HashMap<&str, usize> = HashMap::with_capacity(self.entries.len());

        for (sensitive, replacement) in &self.entries {
            if let Some(&i) = position.get(replacement.as_str()) {
                order[i].1.clone_from(sensitive);
            } else {
                position.insert(replacement.as_str(), order.len());
                order.push((replacement.clone(), sensitive.clone()));
            }
        }

        order
    }
}
