//! Feature blocklist
//!
//! File format: one feature name per line. An optional first line reading
//! `blocklist` is a header; blank lines and `#` comments are skipped.

use crate::Result;
use indexmap::IndexSet;
use std::path::Path;

const DEFAULT_BLOCKLIST: &str = include_str!("../../resources/blocklist.txt");

/// Set of feature names to exclude
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Blocklist {
    names: IndexSet<String>,
}

impl Default for Blocklist {
    /// Known-noisy CellProfiler features (Manders/RWC correlations, coarse granularity)
    fn default() -> Self {
        Self::parse(DEFAULT_BLOCKLIST)
    }
}

impl Blocklist {
    /// Parse blocklist text
    #[must_use]
    pub fn parse(text: &str) -> Self {
        let names = text
            .lines()
            .map(str::trim)
            .enumerate()
            .filter(|(i, line)| !(*i == 0 && *line == "blocklist"))
            .map(|(_, line)| line)
            .filter(|line| !line.is_empty() && !line.starts_with('#'))
            .map(str::to_string)
            .collect();
        Self { names }
    }

    /// Read a blocklist file
    ///
    /// # Errors
    /// Returns [`crate::Error::Io`] if the file cannot be read
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        Ok(Self::parse(&std::fs::read_to_string(path)?))
    }

    /// Blocklist from explicit names
    pub fn from_names<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            names: names.into_iter().map(Into::into).collect(),
        }
    }

    /// Whether `name` is blocklisted
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.names.contains(name)
    }

    /// Number of blocklisted names
    #[must_use]
    pub fn len(&self) -> usize {
        self.names.len()
    }

    /// Whether the blocklist is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}
