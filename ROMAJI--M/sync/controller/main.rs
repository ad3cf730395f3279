//! Sync controller: waits for the host page, installs the classified
//! candidate list, and keeps it current through the refresh hook.

mod install;
mod refresh;

use std::{
    fmt,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
};

use anyhow::Result;
use parking_lot::RwLock;
use romaji_classifier::{CatalogSnapshot, TitleClassification, TitleClassifier};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use shared_event_bus::{CommandTransport, NotificationSubscriber};
use shared_logging::LogLevel;
use thiserror::Error;
use tokio::{sync::watch, task::JoinHandle, time::sleep};
use tracing::instrument;

use install::{InstallMode, WidgetInstaller};
pub use refresh::SyncRefreshHook;

use crate::{
    config::SyncConfig,
    gate::{await_condition, TimeoutError},
    host::{CatalogProvider, HostPage, ListRefresher},
    songnames::{BusSongNameSource, CatalogVersion},
    telemetry::SyncTelemetry,
};

/// Lifecycle of a controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SyncPhase {
    /// Constructed; waiting for the page to finish loading.
    Idle,
    /// Polling for the host's dependencies.
    WaitingForDependencies,
    /// Fetching and classifying the first catalog snapshot.
    Bootstrapping,
    /// Installed; refreshes go through the hook.
    Active,
    /// Backing off after a failed attempt.
    Retrying,
}

/// Observable synchronisation state.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncState {
    /// Set once, by the first successful classification.
    pub initialized: bool,
    /// Catalog version recorded by the refresh hook.
    pub catalog_version: Option<CatalogVersion>,
}

/// Failures of a single bootstrap attempt. Each one leads to a retry.
#[derive(Debug, Error)]
pub enum SyncError {
    /// A dependency gate ran out of polls.
    #[error(transparent)]
    Timeout(#[from] TimeoutError),
    /// A dependency vanished between its gate and its use.
    #[error("{0} disappeared after its gate resolved")]
    DependencyLost(&'static str),
    /// The catalog provider failed.
    #[error("catalog provider failed: {0:#}")]
    Catalog(anyhow::Error),
}

/// State owned by one controller and shared with its hook and installer.
pub(crate) struct SyncShared {
    state: RwLock<SyncState>,
    classification: RwLock<Option<Arc<TitleClassification>>>,
    phase: watch::Sender<SyncPhase>,
    hooked: AtomicBool,
}

impl SyncShared {
    fn new() -> Self {
        let (phase, _) = watch::channel(SyncPhase::Idle);
        Self {
            state: RwLock::new(SyncState::default()),
            classification: RwLock::new(None),
            phase,
            hooked: AtomicBool::new(false),
        }
    }

    pub(crate) fn state(&self) -> SyncState {
        self.state.read().clone()
    }

    pub(crate) fn classification(&self) -> Option<Arc<TitleClassification>> {
        self.classification.read().clone()
    }

    pub(crate) fn replace_classification(&self, classification: Arc<TitleClassification>) {
        *self.classification.write() = Some(classification);
    }

    pub(crate) fn record_version(&self, version: CatalogVersion) {
        self.state.write().catalog_version = Some(version);
    }

    fn mark_initialized(&self) {
        self.state.write().initialized = true;
    }

    fn set_phase(&self, phase: SyncPhase) {
        self.phase.send_replace(phase);
    }
}

/// Writes a log record if telemetry is attached; failures are ignored.
pub(crate) fn note(
    telemetry: Option<&SyncTelemetry>,
    level: LogLevel,
    message: &str,
    metadata: Value,
) {
    if let Some(tel) = telemetry {
        let _ = tel.log(level, message, metadata);
    }
}

struct Dependencies {
    provider: Arc<dyn CatalogProvider>,
    refresher: Arc<dyn ListRefresher>,
    notifications: Arc<dyn NotificationSubscriber>,
    transport: Arc<dyn CommandTransport>,
}

/// Drives the host integration from page load to an installed dropdown.
#[derive(Clone)]
pub struct SyncController {
    host: Arc<dyn HostPage>,
    config: Arc<SyncConfig>,
    classifier: TitleClassifier,
    shared: Arc<SyncShared>,
    installer: WidgetInstaller,
    telemetry: Option<SyncTelemetry>,
}

impl fmt::Debug for SyncController {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SyncController")
            .field("phase", &self.phase())
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl SyncController {
    /// Returns a builder for the controller.
    #[must_use]
    pub fn builder(host: Arc<dyn HostPage>) -> SyncControllerBuilder {
        SyncControllerBuilder::new(host)
    }

    /// Current phase.
    #[must_use]
    pub fn phase(&self) -> SyncPhase {
        *self.shared.phase.borrow()
    }

    /// Receiver observing phase transitions.
    #[must_use]
    pub fn watch_phase(&self) -> watch::Receiver<SyncPhase> {
        self.shared.phase.subscribe()
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> SyncState {
        self.shared.state()
    }

    /// Classification currently installed (or waiting for the widget).
    #[must_use]
    pub fn classification(&self) -> Option<Arc<TitleClassification>> {
        self.shared.classification()
    }

    /// Runs the controller on the current tokio runtime.
    #[must_use]
    pub fn spawn(&self) -> JoinHandle<SyncState> {
        let controller = self.clone();
        tokio::spawn(async move { controller.run().await })
    }

    /// Runs until the dropdown is installed, retrying failed attempts forever.
    ///
    /// Returns immediately once the controller has initialized.
    pub async fn run(&self) -> SyncState {
        if self.shared.state().initialized {
            return self.shared.state();
        }
        self.host.dom_ready().await;
        loop {
            self.shared.set_phase(SyncPhase::WaitingForDependencies);
            self.log(
                LogLevel::Debug,
                "romaji.sync.waiting",
                json!({ "gate": self.config.gate }),
            );
            match self.attempt().await {
                Ok(()) => break,
                Err(err) => {
                    self.shared.set_phase(SyncPhase::Retrying);
                    self.log(
                        LogLevel::Warn,
                        "romaji.sync.retrying",
                        json!({
                            "error": err.to_string(),
                            "backoff_ms": self.config.failure_backoff_ms,
                        }),
                    );
                    sleep(self.config.failure_backoff()).await;
                }
            }
        }
        self.shared.state()
    }

    #[instrument(skip(self))]
    async fn attempt(&self) -> Result<(), SyncError> {
        let deps = self.await_dependencies().await?;
        self.shared.set_phase(SyncPhase::Bootstrapping);
        let snapshot = self.load_catalog(deps.provider.as_ref()).await?;
        let classification = Arc::new(self.classifier.classify(&snapshot));
        if !self
            .installer
            .apply(Arc::clone(&classification), InstallMode::Bootstrap)
        {
            self.installer.defer_until_ready().await;
        }
        self.shared.mark_initialized();
        self.hook_refresh(deps);
        self.shared.set_phase(SyncPhase::Active);
        self.log(
            LogLevel::Info,
            "romaji.sync.active",
            json!({ "stats": classification.stats() }),
        );
        self.event(
            "romaji.sync.active",
            json!({ "titles": classification.combined.len() }),
        );
        Ok(())
    }

    async fn await_dependencies(&self) -> Result<Dependencies, SyncError> {
        let host = self.host.as_ref();
        self.gate("catalog provider", || host.catalog_provider().is_some())
            .await?;
        self.gate("autocomplete controller", || host.list_refresher().is_some())
            .await?;
        self.gate("listener registry", || host.notifications().is_some())
            .await?;
        self.gate("socket", || host.transport().is_some()).await?;
        Ok(Dependencies {
            provider: host
                .catalog_provider()
                .ok_or(SyncError::DependencyLost("catalog provider"))?,
            refresher: host
                .list_refresher()
                .ok_or(SyncError::DependencyLost("autocomplete controller"))?,
            notifications: host
                .notifications()
                .ok_or(SyncError::DependencyLost("listener registry"))?,
            transport: host
                .transport()
                .ok_or(SyncError::DependencyLost("socket"))?,
        })
    }

    async fn gate<F>(&self, label: &str, predicate: F) -> Result<(), TimeoutError>
    where
        F: FnMut() -> bool + Send,
    {
        await_condition(predicate, self.config.gate, label).await?;
        self.log(
            LogLevel::Debug,
            "romaji.sync.gate_resolved",
            json!({ "dependency": label }),
        );
        Ok(())
    }

    /// Requests the cache until it is non-empty.
    async fn load_catalog(
        &self,
        provider: &dyn CatalogProvider,
    ) -> Result<CatalogSnapshot, SyncError> {
        loop {
            let snapshot = provider.get_cache().await.map_err(SyncError::Catalog)?;
            if !snapshot.is_empty() {
                return Ok(snapshot);
            }
            self.log(
                LogLevel::Info,
                "romaji.sync.catalog_empty",
                json!({ "retry_ms": self.config.empty_catalog_retry_ms }),
            );
            sleep(self.config.empty_catalog_retry()).await;
        }
    }

    fn hook_refresh(&self, deps: Dependencies) {
        if self.shared.hooked.swap(true, Ordering::SeqCst) {
            return;
        }
        let source = BusSongNameSource::new(
            deps.notifications,
            deps.transport,
            self.config.commands.clone(),
        );
        let hook = SyncRefreshHook::new(
            deps.refresher,
            Arc::new(source),
            deps.provider,
            self.classifier.clone(),
            Arc::clone(&self.shared),
            self.installer.clone(),
            self.telemetry.clone(),
        );
        self.host.replace_list_refresher(Arc::new(hook));
    }

    fn log(&self, level: LogLevel, message: &str, metadata: Value) {
        note(self.telemetry.as_ref(), level, message, metadata);
    }

    fn event(&self, name: &str, payload: Value) {
        if let Some(tel) = &self.telemetry {
            let _ = tel.event(name, payload);
        }
    }
}

/// Builder used to configure a [`SyncController`].
pub struct SyncControllerBuilder {
    host: Arc<dyn HostPage>,
    config: SyncConfig,
    telemetry: Option<SyncTelemetry>,
}

impl SyncControllerBuilder {
    /// Creates a builder with default configuration.
    #[must_use]
    pub fn new(host: Arc<dyn HostPage>) -> Self {
        Self {
            host,
            config: SyncConfig::default(),
            telemetry: None,
        }
    }

    /// Overrides the configuration.
    #[must_use]
    pub fn config(mut self, config: SyncConfig) -> Self {
        self.config = config;
        self
    }

    /// Attaches telemetry.
    #[must_use]
    pub fn telemetry(mut self, telemetry: SyncTelemetry) -> Self {
        self.telemetry = Some(telemetry);
        self
    }

    /// Validates the configuration and builds the controller.
    ///
    /// # Errors
    /// Returns an error when the configuration is invalid.
    pub fn build(self) -> Result<SyncController> {
        self.config.validate()?;
        let shared = Arc::new(SyncShared::new());
        let installer = WidgetInstaller::new(
            Arc::clone(&self.host),
            Arc::clone(&shared),
            self.config.commands.quiz_ready.clone(),
            self.config.quiz_ready_delay(),
            self.telemetry.clone(),
        );
        Ok(SyncController {
            host: self.host,
            classifier: TitleClassifier::new(self.config.languages.clone()),
            config: Arc::new(self.config),
            shared,
            installer,
            telemetry: self.telemetry,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::{
        gate::GatePolicy,
        host::{CountingRefresher, InMemoryCatalog, InMemoryHost, RecordingWidget},
    };
    use romaji_classifier::{CatalogEntry, NameEntry};
    use shared_event_bus::{MemoryEventBus, Notification, NotificationPublisher};
    use shared_logging::MemoryLogger;

    fn entry(names: &[(&str, &str)]) -> CatalogEntry {
        CatalogEntry::new(
            names
                .iter()
                .map(|(language, text)| NameEntry::new(*text, *language)),
        )
    }

    fn catalog() -> CatalogSnapshot {
        CatalogSnapshot::new()
            .with_entry(
                "1",
                entry(&[("JA", "Shingeki no Kyojin"), ("EN", "Attack on Titan")]),
            )
            .with_entry(
                "2",
                entry(&[("JA", "Show Title: Subtitle"), ("EN", "Show Title")]),
            )
    }

    struct Fixture {
        host: Arc<InMemoryHost>,
        bus: Arc<MemoryEventBus>,
        catalog: Arc<InMemoryCatalog>,
        widget: Arc<RecordingWidget>,
        original: Arc<CountingRefresher>,
        logs: Arc<MemoryLogger>,
    }

    impl Fixture {
        fn new(snapshot: CatalogSnapshot) -> Self {
            let host = Arc::new(InMemoryHost::new());
            let bus = Arc::new(MemoryEventBus::new(64));
            let catalog = Arc::new(InMemoryCatalog::new(snapshot));
            let widget = Arc::new(RecordingWidget::new());
            let original = Arc::new(CountingRefresher::default());
            host.set_catalog_provider(catalog.clone());
            host.replace_list_refresher(original.clone());
            host.set_bus(bus.clone());
            host.set_widget(widget.clone());
            Self {
                host,
                bus,
                catalog,
                widget,
                original,
                logs: Arc::new(MemoryLogger::new(256)),
            }
        }

        fn controller(&self) -> SyncController {
            let config = SyncConfig {
                gate: GatePolicy::new(3, 10),
                ..SyncConfig::default()
            };
            let telemetry = SyncTelemetry::builder("romaji.sync")
                .log_sink(self.logs.clone())
                .build()
                .unwrap();
            SyncController::builder(self.host.clone())
                .config(config)
                .telemetry(telemetry)
                .build()
                .unwrap()
        }

        async fn refresh(&self) {
            self.host
                .list_refresher()
                .unwrap()
                .update_list()
                .await
                .unwrap();
        }

        /// Answers the next commands, in order, with the given payloads.
        fn respond(&self, payloads: Vec<Value>) {
            let mut commands = self.bus.subscribe_commands();
            let bus = Arc::clone(&self.bus);
            tokio::spawn(async move {
                for payload in payloads {
                    let Ok(command) = commands.recv().await else {
                        return;
                    };
                    bus.publish(Notification::new(command.command, payload))
                        .await
                        .unwrap();
                }
            });
        }
    }

    #[tokio::test(start_paused = true)]
    async fn boots_installs_and_becomes_active() {
        let fx = Fixture::new(catalog());
        let controller = fx.controller();
        let state = controller.run().await;

        assert!(state.initialized);
        assert_eq!(state.catalog_version, None);
        assert_eq!(controller.phase(), SyncPhase::Active);
        let classification = controller.classification().unwrap();
        assert_eq!(fx.widget.list().unwrap(), classification.combined);
        assert_eq!(fx.widget.new_list_calls(), 1);
        let ranking = fx.widget.ranking().unwrap();
        assert_eq!(ranking.sort_installs(), 1);
        assert_eq!(ranking.evaluations(), 1);
        assert_eq!(
            fx.widget.suggestions("title", 10),
            vec!["Show Title", "Show Title: Subtitle"]
        );
        assert!(fx.logs.messages().contains(&"romaji.sync.active".to_string()));
        assert_eq!(fx.original.calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn waits_for_page_load() {
        let fx = Fixture::new(catalog());
        let host = Arc::new(InMemoryHost::loading());
        host.set_catalog_provider(fx.catalog.clone());
        host.replace_list_refresher(fx.original.clone());
        host.set_bus(fx.bus.clone());
        host.set_widget(fx.widget.clone());
        let controller = SyncController::builder(host.clone()).build().unwrap();
        let handle = controller.spawn();

        sleep(Duration::from_secs(30)).await;
        assert_eq!(controller.phase(), SyncPhase::Idle);
        assert_eq!(fx.catalog.fetches(), 0);

        host.finish_loading();
        assert!(handle.await.unwrap().initialized);
    }

    #[tokio::test(start_paused = true)]
    async fn empty_catalog_is_requested_again() {
        let fx = Fixture::new(CatalogSnapshot::new());
        let controller = fx.controller();
        let handle = controller.spawn();

        sleep(Duration::from_millis(4_500)).await;
        assert_eq!(controller.phase(), SyncPhase::Bootstrapping);
        assert!(fx.catalog.fetches() >= 3);
        assert!(!controller.state().initialized);

        fx.catalog.replace(catalog());
        assert!(handle.await.unwrap().initialized);
        assert!(fx.widget.list().is_some());
        assert!(fx.logs.messages().contains(&"romaji.sync.catalog_empty".to_string()));
    }

    #[tokio::test(start_paused = true)]
    async fn gate_timeout_retries_until_dependency_appears() {
        let fx = Fixture::new(catalog());
        fx.host.clear_transport();
        let controller = fx.controller();
        let mut phases = controller.watch_phase();
        let handle = controller.spawn();

        phases
            .wait_for(|phase| *phase == SyncPhase::Retrying)
            .await
            .unwrap();
        assert_eq!(fx.catalog.fetches(), 0);
        fx.host.set_bus(fx.bus.clone());

        let state = handle.await.unwrap();
        assert!(state.initialized);
        assert!(fx.logs.messages().contains(&"romaji.sync.retrying".to_string()));
    }

    #[tokio::test(start_paused = true)]
    async fn refresh_defers_to_host_without_candidates() {
        let fx = Fixture::new(
            CatalogSnapshot::new().with_entry("1", entry(&[("KO", "진격의 거인")])),
        );
        let controller = fx.controller();
        assert!(controller.run().await.initialized);
        assert!(controller.classification().unwrap().is_empty());

        fx.refresh().await;
        assert_eq!(fx.original.calls(), 1);
        assert!(fx.bus.sent_commands().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn refresh_requests_full_then_incremental() {
        let fx = Fixture::new(catalog());
        let controller = fx.controller();
        controller.run().await;
        let ranking = fx.widget.ranking().unwrap();
        fx.respond(vec![
            json!({ "version": 1 }),
            json!({ "version": 2, "new": [], "deleted": [] }),
            json!({ "version": 3, "new": [{ "annId": 3 }], "deleted": [] }),
        ]);

        fx.refresh().await;
        assert_eq!(
            controller.state().catalog_version,
            Some(CatalogVersion(json!(1)))
        );
        assert_eq!(ranking.sort_installs(), 2);
        assert_eq!(ranking.evaluations(), 1);

        fx.catalog.replace(
            catalog().with_entry("3", entry(&[("JA", "Mushishi"), ("EN", "Mushi-Shi")])),
        );
        fx.refresh().await;
        assert_eq!(
            controller.state().catalog_version,
            Some(CatalogVersion(json!(2)))
        );
        assert_eq!(ranking.sort_installs(), 2);
        assert!(!fx.widget.list().unwrap().contains(&"Mushishi".to_string()));

        fx.refresh().await;
        assert_eq!(
            controller.state().catalog_version,
            Some(CatalogVersion(json!(3)))
        );
        assert_eq!(ranking.sort_installs(), 3);
        assert!(fx.widget.list().unwrap().contains(&"Mushishi".to_string()));
        assert!(ranking.sort().unwrap().native_set().contains("Mushishi"));

        let sent = fx.bus.sent_commands();
        assert_eq!(sent[0].command, "get all song names");
        assert_eq!(sent[1].command, "update all song names");
        assert_eq!(sent[2].data, Some(json!({ "currentVersion": 2 })));
        assert_eq!(fx.original.calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn quiz_ready_installs_once_widget_exists() {
        let fx = Fixture::new(catalog());
        let host = Arc::new(InMemoryHost::new());
        host.set_catalog_provider(fx.catalog.clone());
        host.replace_list_refresher(fx.original.clone());
        host.set_bus(fx.bus.clone());
        let controller = SyncController::builder(host.clone()).build().unwrap();

        assert!(controller.run().await.initialized);
        assert!(fx.widget.list().is_none());
        assert_eq!(fx.bus.listener_count(), 1);

        host.set_widget(fx.widget.clone());
        fx.bus
            .publish(Notification::new("quiz ready", json!({})))
            .await
            .unwrap();
        sleep(Duration::from_millis(150)).await;

        assert_eq!(
            fx.widget.list().unwrap(),
            controller.classification().unwrap().combined
        );
        assert_eq!(fx.widget.ranking().unwrap().evaluations(), 1);
        assert_eq!(fx.bus.listener_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn quiz_ready_before_widget_keeps_listening() {
        let fx = Fixture::new(catalog());
        let host = Arc::new(InMemoryHost::new());
        host.set_catalog_provider(fx.catalog.clone());
        host.replace_list_refresher(fx.original.clone());
        host.set_bus(fx.bus.clone());
        let controller = SyncController::builder(host.clone()).build().unwrap();
        controller.run().await;

        fx.bus
            .publish(Notification::new("quiz ready", json!({})))
            .await
            .unwrap();
        sleep(Duration::from_millis(150)).await;
        assert!(fx.widget.list().is_none());
        assert_eq!(fx.bus.listener_count(), 1);

        host.set_widget(fx.widget.clone());
        fx.bus
            .publish(Notification::new("quiz ready", json!({})))
            .await
            .unwrap();
        sleep(Duration::from_millis(150)).await;
        assert_eq!(
            fx.widget.list().unwrap(),
            controller.classification().unwrap().combined
        );
        assert_eq!(fx.bus.listener_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn refresh_reinstalls_previous_list_when_cache_empties() {
        let fx = Fixture::new(catalog());
        let controller = fx.controller();
        controller.run().await;
        let ranking = fx.widget.ranking().unwrap();
        let previous = controller.classification().unwrap().combined.clone();
        fx.respond(vec![
            json!({ "version": 1 }),
            json!({ "version": 2, "new": [{ "annId": 9 }], "deleted": [] }),
        ]);
        fx.refresh().await;
        assert_eq!(ranking.sort_installs(), 2);

        fx.catalog.replace(CatalogSnapshot::new());
        fx.refresh().await;
        assert_eq!(ranking.sort_installs(), 3);
        assert_eq!(fx.widget.list().unwrap(), previous);
        assert_eq!(controller.classification().unwrap().combined, previous);
        assert_eq!(
            controller.state().catalog_version,
            Some(CatalogVersion(json!(2)))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn refresh_reinstalls_previous_list_when_cache_fails() {
        let fx = Fixture::new(catalog());
        let controller = fx.controller();
        controller.run().await;
        let ranking = fx.widget.ranking().unwrap();
        let previous = controller.classification().unwrap().combined.clone();
        fx.respond(vec![
            json!({ "version": 1 }),
            json!({ "version": 2, "new": [], "deleted": [{ "annId": 1 }] }),
        ]);
        fx.refresh().await;

        fx.catalog.set_failing(true);
        fx.refresh().await;
        assert_eq!(ranking.sort_installs(), 3);
        assert_eq!(fx.widget.list().unwrap(), previous);
        assert!(fx
            .logs
            .messages()
            .contains(&"romaji.sync.refresh.catalog_failed".to_string()));
    }

    #[tokio::test(start_paused = true)]
    async fn run_after_initialization_is_a_no_op() {
        let fx = Fixture::new(catalog());
        let controller = fx.controller();
        controller.run().await;
        let fetches = fx.catalog.fetches();

        let state = controller.run().await;
        assert!(state.initialized);
        assert_eq!(fx.catalog.fetches(), fetches);
        assert_eq!(fx.widget.new_list_calls(), 1);
    }

    #[test]
    fn build_rejects_invalid_config() {
        let host: Arc<dyn HostPage> = Arc::new(InMemoryHost::new());
        let mut config = SyncConfig::default();
        config.languages.localized = config.languages.native.clone();
        assert!(SyncController::builder(host).config(config).build().is_err());
    }
}
