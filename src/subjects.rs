//! Subject catalog and title-case normalization.
//!
//! Every place that needs to compare or display a subject name goes through
//! [`SubjectCatalog::resolve`], so `"physics"`, `"PHYSICS"` and `"Physics"`
//! are the same subject everywhere.

use std::fmt;

use serde::Serialize;

/// Subjects offered when configuration does not override the catalog.
pub const DEFAULT_SUBJECTS: [&str; 5] = [
    "Mathematics",
    "Physics",
    "Software Engineering",
    "Music",
    "English",
];

/// A validated subject name, always in title case.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct Subject(String);

impl Subject {
    /// The normalized display name.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Subject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for Subject {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Fixed, ordered set of valid study subjects.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubjectCatalog {
    subjects: Vec<String>,
}

impl Default for SubjectCatalog {
    fn default() -> Self {
        Self::new(DEFAULT_SUBJECTS)
    }
}

impl SubjectCatalog {
    /// Build a catalog from display names.
    ///
    /// Names are normalized to title case. Blank names are skipped and
    /// duplicates keep their first position.
    pub fn new<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut subjects: Vec<String> = Vec::new();
        for name in names {
            let normalized = title_case(name.as_ref());
            if !normalized.is_empty() && !subjects.contains(&normalized) {
                subjects.push(normalized);
            }
        }
        Self { subjects }
    }

    /// Subjects in presentation order.
    #[must_use]
    pub fn list(&self) -> &[String] {
        &self.subjects
    }

    /// Whether `name` names a catalog subject, ignoring case.
    #[must_use]
    pub fn is_valid(&self, name: &str) -> bool {
        self.resolve(name).is_some()
    }

    /// Resolve a raw name to its catalog subject.
    #[must_use]
    pub fn resolve(&self, name: &str) -> Option<Subject> {
        let normalized = title_case(name);
        self.subjects
            .iter()
            .any(|s| *s == normalized)
            .then_some(Subject(normalized))
    }
}

/// Title-case a name: split on whitespace, uppercase the first character of
/// each word, lowercase the rest and rejoin with single spaces.
#[must_use]
pub fn title_case(name: &str) -> String {
    name.split_whitespace()
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first
                    .to_uppercase()
                    .chain(chars.flat_map(char::to_lowercase))
                    .collect::<String>(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}
