use std::{fmt, sync::Arc};

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::{json, Value};
use shared_event_bus::{Command, CommandTransport, NotificationSubscriber, OneShotListener};

use crate::config::CommandNames;

/// Opaque catalog version issued and compared by the host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CatalogVersion(pub Value);

impl fmt::Display for CatalogVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Response to a full song-name request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FullCatalogResponse {
    /// Version of the catalog the host now holds.
    pub version: CatalogVersion,
}

/// Response to an incremental request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IncrementalCatalogResponse {
    /// Version after applying the diff.
    pub version: CatalogVersion,
    /// Added entries.
    #[serde(default)]
    pub new: Vec<Value>,
    /// Removed entries.
    #[serde(default)]
    pub deleted: Vec<Value>,
}

impl IncrementalCatalogResponse {
    /// Whether anything was added or removed.
    #[must_use]
    pub fn has_changes(&self) -> bool {
        !self.new.is_empty() || !self.deleted.is_empty()
    }
}

/// Full and incremental catalog change requests.
#[async_trait]
pub trait SongNameSource: Send + Sync {
    /// Requests the full catalog version.
    ///
    /// # Errors
    /// Returns an error when the request cannot be sent or the response cannot be decoded.
    async fn request_full(&self) -> Result<FullCatalogResponse>;
    /// Requests the changes since `current`.
    ///
    /// # Errors
    /// Returns an error when the request cannot be sent or the response cannot be decoded.
    async fn request_incremental(
        &self,
        current: &CatalogVersion,
    ) -> Result<IncrementalCatalogResponse>;
}

/// [`SongNameSource`] speaking the host's request/notification protocol.
///
/// Each request binds a one-shot listener named after the command before
/// sending it, so a fast response cannot slip past.
#[derive(Clone)]
pub struct BusSongNameSource {
    notifications: Arc<dyn NotificationSubscriber>,
    transport: Arc<dyn CommandTransport>,
    names: CommandNames,
}

impl fmt::Debug for BusSongNameSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BusSongNameSource")
            .field("names", &self.names)
            .finish_non_exhaustive()
    }
}

impl BusSongNameSource {
    /// Creates a source over the host's listener registry and socket.
    #[must_use]
    pub fn new(
        notifications: Arc<dyn NotificationSubscriber>,
        transport: Arc<dyn CommandTransport>,
        names: CommandNames,
    ) -> Self {
        Self {
            notifications,
            transport,
            names,
        }
    }

    async fn request<T: DeserializeOwned>(&self, name: &str, data: Option<Value>) -> Result<T> {
        let listener = OneShotListener::bind(self.notifications.as_ref(), name)
            .await
            .with_context(|| format!("binding `{name}` listener"))?;
        let mut command = Command::new(&self.names.command_type, name);
        if let Some(data) = data {
            command = command.with_data(data);
        }
        self.transport
            .send_command(command)
            .await
            .with_context(|| format!("sending `{name}`"))?;
        let notification = listener.recv().await?;
        serde_json::from_value(notification.payload)
            .with_context(|| format!("decoding `{name}` payload"))
    }
}

#[async_trait]
impl SongNameSource for BusSongNameSource {
    async fn request_full(&self) -> Result<FullCatalogResponse> {
        self.request(&self.names.full, None).await
    }

    async fn request_incremental(
        &self,
        current: &CatalogVersion,
    ) -> Result<IncrementalCatalogResponse> {
        self.request(
            &self.names.incremental,
            Some(json!({ "currentVersion": current })),
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared_event_bus::{MemoryEventBus, Notification, NotificationPublisher};

    fn source(bus: &Arc<MemoryEventBus>) -> BusSongNameSource {
        BusSongNameSource::new(bus.clone(), bus.clone(), CommandNames::default())
    }

    fn respond_once(bus: &Arc<MemoryEventBus>, payload: Value) {
        let mut commands = bus.subscribe_commands();
        let bus = Arc::clone(bus);
        tokio::spawn(async move {
            let command = commands.recv().await.unwrap();
            bus.publish(Notification::new(command.command, payload))
                .await
                .unwrap();
        });
    }

    #[tokio::test]
    async fn full_request_round_trips_over_bus() {
        let bus = Arc::new(MemoryEventBus::new(16));
        respond_once(&bus, json!({ "version": 12 }));
        let response = source(&bus).request_full().await.unwrap();
        assert_eq!(response.version, CatalogVersion(json!(12)));
        let sent = bus.sent_commands();
        assert_eq!(sent[0], Command::new("quiz", "get all song names"));
        assert_eq!(bus.listener_count(), 0);
    }

    #[tokio::test]
    async fn incremental_request_carries_current_version() {
        let bus = Arc::new(MemoryEventBus::new(16));
        respond_once(&bus, json!({ "version": 13, "new": [], "deleted": [41] }));
        let response = source(&bus)
            .request_incremental(&CatalogVersion(json!(12)))
            .await
            .unwrap();
        assert!(response.has_changes());
        assert_eq!(
            bus.sent_commands()[0].data,
            Some(json!({ "currentVersion": 12 }))
        );
    }

    #[tokio::test]
    async fn malformed_payload_is_an_error() {
        let bus = Arc::new(MemoryEventBus::new(16));
        respond_once(&bus, json!({ "unexpected": true }));
        let err = source(&bus).request_full().await.unwrap_err();
        assert!(err.to_string().contains("decoding `get all song names` payload"));
    }

    #[test]
    fn missing_diff_lists_mean_no_changes() {
        let response: IncrementalCatalogResponse =
            serde_json::from_value(json!({ "version": "v2" })).unwrap();
        assert!(!response.has_changes());
        assert_eq!(response.version.to_string(), "\"v2\"");
    }
}
