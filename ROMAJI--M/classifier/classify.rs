use std::sync::Arc;

use indexmap::IndexSet;
use serde::{Deserialize, Serialize};

use crate::{catalog::CatalogSnapshot, comparator::RankComparator};

/// Candidate pool handed to the autocomplete widget.
pub type CandidateList = Arc<[String]>;

/// Separators that mark a native title as "localized title + subtitle".
const SUBTITLE_SEPARATORS: [char; 2] = [':', ' '];

/// Language slots the classifier sorts titles into.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LanguageTags {
    /// Tag of native-script (romaji) titles.
    pub native: String,
    /// Tag of localized (English) titles.
    pub localized: String,
}

impl Default for LanguageTags {
    fn default() -> Self {
        Self {
            native: "JA".into(),
            localized: "EN".into(),
        }
    }
}

/// Counts describing one classification pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassificationStats {
    /// Native-script titles, promoted ones included.
    pub native: usize,
    /// Localized titles left after promotion.
    pub localized: usize,
    /// Localized titles moved into the native group.
    pub promoted: usize,
    /// Size of the candidate pool.
    pub combined: usize,
}

/// Result of classifying one catalog snapshot.
///
/// `native` and `localized` are disjoint and `combined` holds each string once.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TitleClassification {
    /// Titles ranked first in the dropdown.
    pub native: Arc<IndexSet<String>>,
    /// Remaining localized titles.
    pub localized: IndexSet<String>,
    /// Union of both groups, native first.
    pub combined: CandidateList,
    /// How many localized titles were promoted.
    pub promoted: usize,
}

impl TitleClassification {
    /// Classification of an empty catalog.
    #[must_use]
    pub fn empty() -> Self {
        Self {
            native: Arc::new(IndexSet::new()),
            localized: IndexSet::new(),
            combined: Arc::from(Vec::new()),
            promoted: 0,
        }
    }

    /// Whether there is nothing to offer the widget.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.combined.is_empty()
    }

    /// Comparator bound to this pass's native set.
    #[must_use]
    pub fn comparator(&self) -> RankComparator {
        RankComparator::new(Arc::clone(&self.native))
    }

    /// Counts for diagnostics.
    #[must_use]
    pub fn stats(&self) -> ClassificationStats {
        ClassificationStats {
            native: self.native.len(),
            localized: self.localized.len(),
            promoted: self.promoted,
            combined: self.combined.len(),
        }
    }
}

/// Splits catalog titles into native-script and localized groups.
#[derive(Debug, Clone, Default)]
pub struct TitleClassifier {
    tags: LanguageTags,
}

impl TitleClassifier {
    /// Creates a classifier for the given language slots.
    #[must_use]
    pub const fn new(tags: LanguageTags) -> Self {
        Self { tags }
    }

    /// Language slots in use.
    #[must_use]
    pub const fn tags(&self) -> &LanguageTags {
        &self.tags
    }

    /// Classifies a snapshot. Pure: the same snapshot yields the same result.
    #[must_use]
    pub fn classify(&self, snapshot: &CatalogSnapshot) -> TitleClassification {
        let (mut native, mut localized) = self.collect(snapshot);

        let promoted = promoted_titles(&native, &localized);
        for title in &promoted {
            localized.shift_remove(title);
            native.insert(title.clone());
        }
        // Upstream data may carry the same string under both tags.
        localized.retain(|title| !native.contains(title));

        let combined: IndexSet<&String> = native.iter().chain(localized.iter()).collect();
        let combined: CandidateList = combined.into_iter().cloned().collect();

        TitleClassification {
            native: Arc::new(native),
            localized,
            combined,
            promoted: promoted.len(),
        }
    }

    fn collect(&self, snapshot: &CatalogSnapshot) -> (IndexSet<String>, IndexSet<String>) {
        let mut native = IndexSet::new();
        let mut localized = IndexSet::new();
        let names = snapshot
            .entries()
            .flat_map(|(_, entry)| entry.names.iter())
            .filter(|name| !name.text.is_empty());
        for name in names {
            if name.language == self.tags.native {
                native.insert(name.text.clone());
            } else if name.language == self.tags.localized {
                localized.insert(name.text.clone());
            }
        }
        (native, localized)
    }
}

/// Localized titles that prefix some native title followed by a separator.
fn promoted_titles(native: &IndexSet<String>, localized: &IndexSet<String>) -> Vec<String> {
    let mut sorted: Vec<&str> = native.iter().map(String::as_str).collect();
    sorted.sort_unstable();
    localized
        .iter()
        .filter(|title| has_subtitled_native(&sorted, title))
        .cloned()
        .collect()
}

fn has_subtitled_native(sorted_native: &[&str], title: &str) -> bool {
    let start = sorted_native.partition_point(|candidate| *candidate < title);
    sorted_native[start..]
        .iter()
        .take_while(|candidate| candidate.starts_with(title))
        .any(|candidate| candidate[title.len()..].starts_with(SUBTITLE_SEPARATORS))
}

/// Classifies with the default `JA`/`EN` slots.
#[must_use]
pub fn classify(snapshot: &CatalogSnapshot) -> TitleClassification {
    TitleClassifier::default().classify(snapshot)
}
