#![deny(
    clippy::all,
    clippy::pedantic,
    clippy::nursery,
    missing_docs,
    rust_2018_idioms
)]

//! Turns a multilingual title catalog into the dropdown candidate pool and
//! the comparator that ranks native-script titles first.

/// Catalog snapshot model.
#[path = "../catalog.rs"]
pub mod catalog;

/// Native/localized classification pass.
#[path = "../classify.rs"]
pub mod classify;

/// Dropdown ranking comparator.
#[path = "../comparator.rs"]
pub mod comparator;

pub use catalog::{CatalogEntry, CatalogSnapshot, NameEntry};
pub use classify::{
    classify, CandidateList, ClassificationStats, LanguageTags, TitleClassification,
    TitleClassifier,
};
pub use comparator::{compare_titles, RankComparator};
