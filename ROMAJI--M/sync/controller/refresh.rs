use std::{fmt, sync::Arc};

use anyhow::Result;
use async_trait::async_trait;
use romaji_classifier::{TitleClassification, TitleClassifier};
use serde_json::json;
use shared_logging::LogLevel;

use super::{
    install::{InstallMode, WidgetInstaller},
    note, SyncShared,
};
use crate::{
    host::{CatalogProvider, ListRefresher},
    songnames::SongNameSource,
    telemetry::SyncTelemetry,
};

/// Decorator around the host's refresh entry point.
///
/// Without candidate data it defers to the host's own behaviour. Otherwise
/// the first refresh requests the full catalog and later ones request a diff
/// against the recorded version; a full response or a non-empty diff
/// re-classifies the catalog and reinstalls the list and comparator.
pub struct SyncRefreshHook {
    original: Arc<dyn ListRefresher>,
    source: Arc<dyn SongNameSource>,
    provider: Arc<dyn CatalogProvider>,
    classifier: TitleClassifier,
    shared: Arc<SyncShared>,
    installer: WidgetInstaller,
    telemetry: Option<SyncTelemetry>,
}

impl fmt::Debug for SyncRefreshHook {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SyncRefreshHook")
            .field("version", &self.shared.state().catalog_version)
            .finish_non_exhaustive()
    }
}

impl SyncRefreshHook {
    pub(crate) fn new(
        original: Arc<dyn ListRefresher>,
        source: Arc<dyn SongNameSource>,
        provider: Arc<dyn CatalogProvider>,
        classifier: TitleClassifier,
        shared: Arc<SyncShared>,
        installer: WidgetInstaller,
        telemetry: Option<SyncTelemetry>,
    ) -> Self {
        Self {
            original,
            source,
            provider,
            classifier,
            shared,
            installer,
            telemetry,
        }
    }

    async fn reinstall(&self, previous: Arc<TitleClassification>) {
        let classification = match self.provider.get_cache().await {
            Ok(snapshot) if !snapshot.is_empty() => {
                Arc::new(self.classifier.classify(&snapshot))
            }
            Ok(_) => previous,
            Err(err) => {
                note(
                    self.telemetry.as_ref(),
                    LogLevel::Warn,
                    "romaji.sync.refresh.catalog_failed",
                    json!({ "error": format!("{err:#}") }),
                );
                previous
            }
        };
        self.installer.apply(classification, InstallMode::Refresh);
    }
}

#[async_trait]
impl ListRefresher for SyncRefreshHook {
    async fn update_list(&self) -> Result<()> {
        let Some(current) = self
            .shared
            .classification()
            .filter(|classification| !classification.is_empty())
        else {
            return self.original.update_list().await;
        };

        let Some(version) = self.shared.state().catalog_version else {
            let response = self.source.request_full().await?;
            note(
                self.telemetry.as_ref(),
                LogLevel::Info,
                "romaji.sync.refresh.full",
                json!({ "version": response.version }),
            );
            self.shared.record_version(response.version);
            self.reinstall(current).await;
            return Ok(());
        };

        let diff = self.source.request_incremental(&version).await?;
        let changed = diff.has_changes();
        note(
            self.telemetry.as_ref(),
            LogLevel::Info,
            "romaji.sync.refresh.incremental",
            json!({
                "from": version,
                "to": diff.version,
                "new": diff.new.len(),
                "deleted": diff.deleted.len(),
            }),
        );
        self.shared.record_version(diff.version);
        if changed {
            self.reinstall(current).await;
        }
        Ok(())
    }
}
