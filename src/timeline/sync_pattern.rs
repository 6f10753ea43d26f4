use regex::{Regex, RegexBuilder};
use std::collections::BTreeMap;
use std::fmt;

const PATTERN_SIZE_LIMIT: usize = 1 << 20;

/// Source text of a synchronization pattern plus its compiled form.
///
/// Matching is case-insensitive and only named groups are reported as captures.
/// A pattern that fails to compile keeps its text (so it still persists) but never matches.
#[derive(Clone)]
pub struct SyncPattern {
    source: String,
    compiled: Option<Regex>,
    compile_error: Option<String>,
}

impl SyncPattern {
    pub fn compile(source: impl Into<String>) -> Self {
        let source = source.into();
        match RegexBuilder::new(&source)
            .case_insensitive(true)
            .size_limit(PATTERN_SIZE_LIMIT)
            .build()
        {
            Ok(compiled) => Self {
                source,
                compiled: Some(compiled),
                compile_error: None,
            },
            Err(error) => {
                tracing::warn!(
                    pattern = %source,
                    error = %error,
                    "Sync pattern failed to compile; element will never resync"
                );
                Self {
                    source,
                    compiled: None,
                    compile_error: Some(error.to_string()),
                }
            }
        }
    }

    /// `None` for an empty pattern: an empty `sync` attribute means no pattern at all.
    pub fn from_attribute(source: Option<&str>) -> Option<Self> {
        source
            .filter(|value| !value.is_empty())
            .map(Self::compile)
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn is_usable(&self) -> bool {
        self.compiled.is_some()
    }

    pub fn compile_error(&self) -> Option<&str> {
        self.compile_error.as_deref()
    }

    pub fn is_match(&self, line: &str) -> bool {
        self.compiled
            .as_ref()
            .map(|compiled| compiled.is_match(line))
            .unwrap_or(false)
    }

    pub fn captures(&self, line: &str) -> Option<BTreeMap<String, String>> {
        let compiled = self.compiled.as_ref()?;
        let captures = compiled.captures(line)?;

        Some(
            compiled
                .capture_names()
                .flatten()
                .filter_map(|name| {
                    captures
                        .name(name)
                        .map(|value| (name.to_string(), value.as_str().to_string()))
                })
                .collect(),
        )
    }
}

impl PartialEq for SyncPattern {
    fn eq(&self, other: &Self) -> bool {
        self.source == other.source
    }
}

impl fmt::Debug for SyncPattern {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("SyncPattern")
            .field("source", &self.source)
            .field("usable", &self.is_usable())
            .finish()
    }
}
