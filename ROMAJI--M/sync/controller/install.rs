use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};

use romaji_classifier::TitleClassification;
use serde_json::json;
use shared_logging::LogLevel;
use tokio::{sync::broadcast::error::RecvError, time::sleep};

use super::{note, SyncShared};
use crate::{
    host::{AutocompleteWidget, HostPage},
    telemetry::SyncTelemetry,
};

/// Which flow an install belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum InstallMode {
    /// First install; forces the widget to re-evaluate its suggestions.
    Bootstrap,
    /// Reinstall from the refresh hook; the widget re-evaluates on its next keystroke.
    Refresh,
}

/// Writes candidate lists and comparators into the widget.
#[derive(Clone)]
pub(crate) struct WidgetInstaller {
    host: Arc<dyn HostPage>,
    shared: Arc<SyncShared>,
    quiz_ready: String,
    quiz_ready_delay: Duration,
    ready_listener_bound: Arc<AtomicBool>,
    telemetry: Option<SyncTelemetry>,
}

impl WidgetInstaller {
    pub(crate) fn new(
        host: Arc<dyn HostPage>,
        shared: Arc<SyncShared>,
        quiz_ready: String,
        quiz_ready_delay: Duration,
        telemetry: Option<SyncTelemetry>,
    ) -> Self {
        Self {
            host,
            shared,
            quiz_ready,
            quiz_ready_delay,
            ready_listener_bound: Arc::new(AtomicBool::new(false)),
            telemetry,
        }
    }

    /// Makes `classification` current and installs it. Returns false when the
    /// widget does not exist yet.
    ///
    /// Never suspends, so the list and comparator change in the same turn.
    pub(crate) fn apply(
        &self,
        classification: Arc<TitleClassification>,
        mode: InstallMode,
    ) -> bool {
        self.shared.replace_classification(Arc::clone(&classification));
        let Some(widget) = self.host.widget() else {
            note(
                self.telemetry.as_ref(),
                LogLevel::Debug,
                "romaji.sync.widget_missing",
                json!({ "mode": format!("{mode:?}") }),
            );
            return false;
        };
        install_into(widget.as_ref(), &classification, mode);
        note(
            self.telemetry.as_ref(),
            LogLevel::Info,
            "romaji.sync.installed",
            json!({ "mode": format!("{mode:?}"), "stats": classification.stats() }),
        );
        true
    }

    /// Binds a single readiness listener for the controller's lifetime.
    ///
    /// Every readiness notification retries the install of the then-current
    /// classification after a short delay; the listener unbinds once an
    /// install lands.
    pub(crate) async fn defer_until_ready(&self) {
        if self.ready_listener_bound.load(Ordering::SeqCst) {
            return;
        }
        let Some(notifications) = self.host.notifications() else {
            return;
        };
        let mut receiver = match notifications.subscribe().await {
            Ok(receiver) => receiver,
            Err(err) => {
                note(
                    self.telemetry.as_ref(),
                    LogLevel::Warn,
                    "romaji.sync.install_deferred",
                    json!({ "error": format!("{err:#}") }),
                );
                return;
            }
        };
        if self.ready_listener_bound.swap(true, Ordering::SeqCst) {
            return;
        }
        note(
            self.telemetry.as_ref(),
            LogLevel::Info,
            "romaji.sync.install_deferred",
            json!({ "until": self.quiz_ready }),
        );
        let installer = self.clone();
        tokio::spawn(async move {
            loop {
                match receiver.recv().await {
                    Ok(notification) if notification.name == installer.quiz_ready => {
                        sleep(installer.quiz_ready_delay).await;
                        let installed = installer
                            .shared
                            .classification()
                            .is_some_and(|classification| {
                                installer.apply(classification, InstallMode::Bootstrap)
                            });
                        if installed {
                            return;
                        }
                    }
                    Ok(_) | Err(RecvError::Lagged(_)) => {}
                    Err(RecvError::Closed) => return,
                }
            }
        });
    }
}

/// Overwrites the widget's list, rebuilds its index and rebinds its ranking.
pub(crate) fn install_into(
    widget: &dyn AutocompleteWidget,
    classification: &TitleClassification,
    mode: InstallMode,
) {
    widget.set_list(Arc::clone(&classification.combined));
    widget.new_list();
    if let Some(ranking) = widget.ranking_instance() {
        ranking.set_sort(classification.comparator());
        ranking.set_list(Arc::clone(&classification.combined));
        if mode == InstallMode::Bootstrap {
            ranking.evaluate();
        }
    }
}
