use std::sync::{
    atomic::{AtomicBool, AtomicUsize, Ordering},
    Arc,
};

use anyhow::{bail, Result};
use async_trait::async_trait;
use parking_lot::RwLock;
use romaji_classifier::{CandidateList, CatalogSnapshot, RankComparator};
use shared_event_bus::{CommandTransport, MemoryEventBus, NotificationSubscriber};
use tokio::sync::watch;

use super::{AutocompleteWidget, CatalogProvider, HostPage, ListRefresher, RankingInstance};

/// Catalog provider backed by a replaceable snapshot.
#[derive(Debug, Default)]
pub struct InMemoryCatalog {
    snapshot: RwLock<CatalogSnapshot>,
    fetches: AtomicUsize,
    failing: AtomicBool,
}

impl InMemoryCatalog {
    /// Creates a provider serving `snapshot`.
    #[must_use]
    pub fn new(snapshot: CatalogSnapshot) -> Self {
        Self {
            snapshot: RwLock::new(snapshot),
            fetches: AtomicUsize::new(0),
            failing: AtomicBool::new(false),
        }
    }

    /// Swaps the served snapshot.
    pub fn replace(&self, snapshot: CatalogSnapshot) {
        *self.snapshot.write() = snapshot;
    }

    /// Makes subsequent `get_cache` calls fail until switched back.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Number of `get_cache` calls so far.
    #[must_use]
    pub fn fetches(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CatalogProvider for InMemoryCatalog {
    async fn get_cache(&self) -> Result<CatalogSnapshot> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        if self.failing.load(Ordering::SeqCst) {
            bail!("title cache unavailable");
        }
        Ok(self.snapshot.read().clone())
    }
}

/// Ranking sub-object that records what was installed.
#[derive(Debug, Default)]
pub struct RecordingRanking {
    sort: RwLock<Option<RankComparator>>,
    list: RwLock<Option<CandidateList>>,
    sort_installs: AtomicUsize,
    evaluations: AtomicUsize,
}

impl RecordingRanking {
    /// Installed comparator, if any.
    #[must_use]
    pub fn sort(&self) -> Option<RankComparator> {
        self.sort.read().clone()
    }

    /// Installed list, if any.
    #[must_use]
    pub fn list(&self) -> Option<CandidateList> {
        self.list.read().clone()
    }

    /// Number of comparator installs.
    #[must_use]
    pub fn sort_installs(&self) -> usize {
        self.sort_installs.load(Ordering::SeqCst)
    }

    /// Number of `evaluate` calls.
    #[must_use]
    pub fn evaluations(&self) -> usize {
        self.evaluations.load(Ordering::SeqCst)
    }
}

impl RankingInstance for RecordingRanking {
    fn set_sort(&self, comparator: RankComparator) {
        *self.sort.write() = Some(comparator);
        self.sort_installs.fetch_add(1, Ordering::SeqCst);
    }

    fn set_list(&self, list: CandidateList) {
        *self.list.write() = Some(list);
    }

    fn evaluate(&self) {
        self.evaluations.fetch_add(1, Ordering::SeqCst);
    }
}

/// Widget that records installs and can answer queries like the real dropdown.
#[derive(Debug)]
pub struct RecordingWidget {
    list: RwLock<Option<CandidateList>>,
    new_list_calls: AtomicUsize,
    ranking: Option<Arc<RecordingRanking>>,
}

impl RecordingWidget {
    /// Widget with a ranking sub-object.
    #[must_use]
    pub fn new() -> Self {
        Self {
            list: RwLock::new(None),
            new_list_calls: AtomicUsize::new(0),
            ranking: Some(Arc::new(RecordingRanking::default())),
        }
    }

    /// Widget that has not created its ranking sub-object yet.
    #[must_use]
    pub fn without_ranking() -> Self {
        Self {
            ranking: None,
            ..Self::new()
        }
    }

    /// Installed list, if any.
    #[must_use]
    pub fn list(&self) -> Option<CandidateList> {
        self.list.read().clone()
    }

    /// Number of `new_list` calls.
    #[must_use]
    pub fn new_list_calls(&self) -> usize {
        self.new_list_calls.load(Ordering::SeqCst)
    }

    /// Ranking sub-object, if present.
    #[must_use]
    pub fn ranking(&self) -> Option<Arc<RecordingRanking>> {
        self.ranking.clone()
    }

    /// Titles containing `query` (case-insensitive), in ranked order.
    #[must_use]
    pub fn suggestions(&self, query: &str, limit: usize) -> Vec<String> {
        let Some(list) = self.list() else {
            return Vec::new();
        };
        let query = query.to_lowercase();
        let mut matches: Vec<String> = list
            .iter()
            .filter(|title| title.to_lowercase().contains(&query))
            .cloned()
            .collect();
        if let Some(sort) = self.ranking.as_ref().and_then(|ranking| ranking.sort()) {
            sort.sort(&mut matches);
        }
        matches.truncate(limit);
        matches
    }
}

impl Default for RecordingWidget {
    fn default() -> Self {
        Self::new()
    }
}

impl AutocompleteWidget for RecordingWidget {
    fn set_list(&self, list: CandidateList) {
        *self.list.write() = Some(list);
    }

    fn new_list(&self) {
        self.new_list_calls.fetch_add(1, Ordering::SeqCst);
    }

    fn ranking_instance(&self) -> Option<Arc<dyn RankingInstance>> {
        self.ranking
            .clone()
            .map(|ranking| ranking as Arc<dyn RankingInstance>)
    }
}

/// The host's own refresh behaviour, reduced to a call counter.
#[derive(Debug, Default)]
pub struct CountingRefresher {
    calls: AtomicUsize,
}

impl CountingRefresher {
    /// Number of `update_list` calls.
    #[must_use]
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ListRefresher for CountingRefresher {
    async fn update_list(&self) -> Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Host page whose dependencies are set (or withheld) by the caller.
pub struct InMemoryHost {
    loaded: watch::Sender<bool>,
    catalog: RwLock<Option<Arc<dyn CatalogProvider>>>,
    refresher: RwLock<Option<Arc<dyn ListRefresher>>>,
    notifications: RwLock<Option<Arc<dyn NotificationSubscriber>>>,
    transport: RwLock<Option<Arc<dyn CommandTransport>>>,
    widget: RwLock<Option<Arc<dyn AutocompleteWidget>>>,
}

impl InMemoryHost {
    /// A fully loaded page with no dependencies yet.
    #[must_use]
    pub fn new() -> Self {
        let (loaded, _) = watch::channel(true);
        Self {
            loaded,
            catalog: RwLock::new(None),
            refresher: RwLock::new(None),
            notifications: RwLock::new(None),
            transport: RwLock::new(None),
            widget: RwLock::new(None),
        }
    }

    /// A page that is still loading until [`InMemoryHost::finish_loading`].
    #[must_use]
    pub fn loading() -> Self {
        let host = Self::new();
        host.loaded.send_replace(false);
        host
    }

    /// Signals that the page finished loading.
    pub fn finish_loading(&self) {
        self.loaded.send_replace(true);
    }

    /// Makes the catalog provider available.
    pub fn set_catalog_provider(&self, provider: Arc<dyn CatalogProvider>) {
        *self.catalog.write() = Some(provider);
    }

    /// Makes the notification registry and command socket available.
    pub fn set_bus(&self, bus: Arc<MemoryEventBus>) {
        *self.notifications.write() = Some(bus.clone());
        *self.transport.write() = Some(bus);
    }

    /// Withdraws the command socket.
    pub fn clear_transport(&self) {
        *self.transport.write() = None;
    }

    /// Makes the autocomplete widget available.
    pub fn set_widget(&self, widget: Arc<dyn AutocompleteWidget>) {
        *self.widget.write() = Some(widget);
    }
}

impl Default for InMemoryHost {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl HostPage for InMemoryHost {
    async fn dom_ready(&self) {
        let mut loaded = self.loaded.subscribe();
        // The sender lives as long as `self`, so this only returns once loaded.
        let _ = loaded.wait_for(|loaded| *loaded).await;
    }

    fn catalog_provider(&self) -> Option<Arc<dyn CatalogProvider>> {
        self.catalog.read().clone()
    }

    fn list_refresher(&self) -> Option<Arc<dyn ListRefresher>> {
        self.refresher.read().clone()
    }

    fn replace_list_refresher(&self, refresher: Arc<dyn ListRefresher>) {
        *self.refresher.write() = Some(refresher);
    }

    fn notifications(&self) -> Option<Arc<dyn NotificationSubscriber>> {
        self.notifications.read().clone()
    }

    fn transport(&self) -> Option<Arc<dyn CommandTransport>> {
        self.transport.read().clone()
    }

    fn widget(&self) -> Option<Arc<dyn AutocompleteWidget>> {
        self.widget.read().clone()
    }
}
