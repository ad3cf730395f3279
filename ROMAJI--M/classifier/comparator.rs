use std::{cmp::Ordering, sync::Arc};

use indexmap::IndexSet;

/// Orders two titles for the dropdown.
///
/// Members of `native` come before non-members; within a group shorter titles
/// come first and equal lengths fall back to code point order. Length is
/// counted in Unicode scalar values. Works for any pair of strings, including
/// strings the set has never seen.
#[must_use]
pub fn compare_titles(a: &str, b: &str, native: &IndexSet<String>) -> Ordering {
    let a_native = native.contains(a);
    let b_native = native.contains(b);
    b_native
        .cmp(&a_native)
        .then_with(|| a.chars().count().cmp(&b.chars().count()))
        .then_with(|| a.cmp(b))
}

/// Ranking function installed into the widget, bound to one native set.
#[derive(Debug, Clone, Default)]
pub struct RankComparator {
    native: Arc<IndexSet<String>>,
}

impl RankComparator {
    /// Binds a comparator to a native set.
    #[must_use]
    pub const fn new(native: Arc<IndexSet<String>>) -> Self {
        Self { native }
    }

    /// Swaps the bound native set.
    pub fn rebind(&mut self, native: Arc<IndexSet<String>>) {
        self.native = native;
    }

    /// Currently bound native set.
    #[must_use]
    pub fn native_set(&self) -> &IndexSet<String> {
        &self.native
    }

    /// Orders two titles.
    #[must_use]
    pub fn compare(&self, a: &str, b: &str) -> Ordering {
        compare_titles(a, b, &self.native)
    }

    /// Sorts a slice of titles in dropdown order.
    pub fn sort<S: AsRef<str>>(&self, titles: &mut [S]) {
        titles.sort_by(|a, b| self.compare(a.as_ref(), b.as_ref()));
    }
}
