//! Seams to the host page. Every dependency may appear late, so lookups
//! return `Option` and are polled through the dependency gate.

/// In-memory host used by tests and local wiring.
pub mod memory;

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use romaji_classifier::{CandidateList, CatalogSnapshot, RankComparator};
use shared_event_bus::{CommandTransport, NotificationSubscriber};

pub use memory::{
    CountingRefresher, InMemoryCatalog, InMemoryHost, RecordingRanking, RecordingWidget,
};

/// The host's title cache.
#[async_trait]
pub trait CatalogProvider: Send + Sync {
    /// Fetches the current snapshot; may be empty while the host is still loading.
    ///
    /// # Errors
    /// Returns an error when the host cannot produce its cache.
    async fn get_cache(&self) -> Result<CatalogSnapshot>;
}

/// Ranking sub-object of the autocomplete widget.
pub trait RankingInstance: Send + Sync {
    /// Replaces the ranking function.
    fn set_sort(&self, comparator: RankComparator);
    /// Replaces the list the ranking runs over (and its backing copy).
    fn set_list(&self, list: CandidateList);
    /// Recomputes the visible suggestions.
    fn evaluate(&self);
}

/// Autocomplete widget the candidate list is installed into.
pub trait AutocompleteWidget: Send + Sync {
    /// Replaces the widget's candidate list.
    fn set_list(&self, list: CandidateList);
    /// Rebuilds the widget's internal index from its list.
    fn new_list(&self);
    /// Ranking sub-object, absent until the widget has rendered once.
    fn ranking_instance(&self) -> Option<Arc<dyn RankingInstance>>;
}

/// The host's catalog-refresh entry point.
#[async_trait]
pub trait ListRefresher: Send + Sync {
    /// Called by the host whenever it decides the list may be stale.
    ///
    /// # Errors
    /// Returns an error when the catalog request fails.
    async fn update_list(&self) -> Result<()>;
}

/// Lookup of the host page's late-loading objects.
#[async_trait]
pub trait HostPage: Send + Sync {
    /// Resolves once the page has finished loading.
    async fn dom_ready(&self);
    /// Title cache handler.
    fn catalog_provider(&self) -> Option<Arc<dyn CatalogProvider>>;
    /// Current refresh entry point of the autocomplete controller.
    fn list_refresher(&self) -> Option<Arc<dyn ListRefresher>>;
    /// Installs a new refresh entry point.
    fn replace_list_refresher(&self, refresher: Arc<dyn ListRefresher>);
    /// Notification listener registry.
    fn notifications(&self) -> Option<Arc<dyn NotificationSubscriber>>;
    /// Command socket.
    fn transport(&self) -> Option<Arc<dyn CommandTransport>>;
    /// Answer input's autocomplete widget, present only while a quiz is open.
    fn widget(&self) -> Option<Arc<dyn AutocompleteWidget>>;
}
