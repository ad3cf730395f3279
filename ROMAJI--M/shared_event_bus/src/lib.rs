#![deny(
    clippy::all,
    clippy::pedantic,
    clippy::nursery,
    missing_docs,
    rust_2018_idioms
)]

//! Event bus abstractions for talking to the host page: named notifications
//! flowing in, commands flowing out.

use std::collections::VecDeque;
use std::sync::Arc;

use anyhow::{bail, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast::{self, error::RecvError};
use uuid::Uuid;

/// Named notification delivered by the host, e.g. `get all song names`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Notification {
    /// Unique identifier (uuid).
    pub id: String,
    /// Notification name listeners bind to.
    pub name: String,
    /// ISO timestamp.
    pub timestamp: String,
    /// Arbitrary JSON payload.
    #[serde(default)]
    pub payload: serde_json::Value,
}

impl Notification {
    /// Creates a notification stamped with a fresh id and the current time.
    #[must_use]
    pub fn new(name: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            id: format!("ntf-{}", Uuid::new_v4()),
            name: name.into(),
            timestamp: chrono::Utc::now().to_rfc3339(),
            payload,
        }
    }
}

/// Command sent to the host transport.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Command {
    /// Command family, e.g. `quiz`.
    #[serde(rename = "type")]
    pub kind: String,
    /// Command name; responses arrive as notifications with the same name.
    pub command: String,
    /// Optional command arguments.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

impl Command {
    /// Creates a command without arguments.
    #[must_use]
    pub fn new(kind: impl Into<String>, command: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            command: command.into(),
            data: None,
        }
    }

    /// Attaches arguments.
    #[must_use]
    pub fn with_data(mut self, data: serde_json::Value) -> Self {
        self.data = Some(data);
        self
    }
}

/// Notification publisher interface.
#[async_trait]
pub trait NotificationPublisher: Send + Sync {
    /// Publishes a notification to every bound listener.
    ///
    /// # Errors
    /// Returns an error when the bus cannot accept the notification.
    async fn publish(&self, notification: Notification) -> Result<()>;
}

/// Notification subscriber interface.
#[async_trait]
pub trait NotificationSubscriber: Send + Sync {
    /// Returns a receiver observing every notification published from now on.
    ///
    /// # Errors
    /// Returns an error when the registry cannot bind a listener.
    async fn subscribe(&self) -> Result<broadcast::Receiver<Notification>>;
}

/// Outbound command channel.
#[async_trait]
pub trait CommandTransport: Send + Sync {
    /// Sends a command. Delivery of any response is asynchronous and uncorrelated.
    ///
    /// # Errors
    /// Returns an error when the transport cannot send.
    async fn send_command(&self, command: Command) -> Result<()>;
}

/// Listener bound to a single notification name that fires at most once.
///
/// Binding happens in [`OneShotListener::bind`]; dropping the listener
/// (including after [`OneShotListener::recv`] consumes it) unbinds it.
#[derive(Debug)]
pub struct OneShotListener {
    name: String,
    receiver: broadcast::Receiver<Notification>,
}

impl OneShotListener {
    /// Binds a listener for `name`.
    ///
    /// # Errors
    /// Returns an error when the subscriber cannot bind.
    pub async fn bind(
        subscriber: &dyn NotificationSubscriber,
        name: impl Into<String>,
    ) -> Result<Self> {
        Ok(Self {
            name: name.into(),
            receiver: subscriber.subscribe().await?,
        })
    }

    /// Name this listener is bound to.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Waits for the next matching notification and unbinds.
    ///
    /// # Errors
    /// Returns an error when the bus closes first.
    pub async fn recv(mut self) -> Result<Notification> {
        loop {
            match self.receiver.recv().await {
                Ok(notification) if notification.name == self.name => return Ok(notification),
                Ok(_) | Err(RecvError::Lagged(_)) => {}
                Err(RecvError::Closed) => {
                    bail!("event bus closed while waiting for `{}`", self.name)
                }
            }
        }
    }
}

/// In-memory broadcast bus doubling as a command transport.
#[derive(Debug, Clone)]
pub struct MemoryEventBus {
    capacity: usize,
    sender: broadcast::Sender<Notification>,
    commands: broadcast::Sender<Command>,
    backlog: Arc<Mutex<VecDeque<Notification>>>,
    sent: Arc<Mutex<Vec<Command>>>,
}

impl MemoryEventBus {
    /// Creates a new bus with the given capacity.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let (sender, _) = broadcast::channel(capacity);
        let (commands, _) = broadcast::channel(capacity);
        Self {
            capacity,
            sender,
            commands,
            backlog: Arc::new(Mutex::new(VecDeque::with_capacity(capacity))),
            sent: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Snapshot of recent notifications retained in memory.
    #[must_use]
    pub fn snapshot(&self) -> Vec<Notification> {
        self.backlog.lock().iter().cloned().collect()
    }

    /// Every command sent through this bus, in send order.
    #[must_use]
    pub fn sent_commands(&self) -> Vec<Command> {
        self.sent.lock().clone()
    }

    /// Observes commands sent from now on, for in-process responders.
    #[must_use]
    pub fn subscribe_commands(&self) -> broadcast::Receiver<Command> {
        self.commands.subscribe()
    }

    /// Number of listeners currently bound.
    #[must_use]
    pub fn listener_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

#[async_trait]
impl NotificationPublisher for MemoryEventBus {
    async fn publish(&self, notification: Notification) -> Result<()> {
        {
            let mut backlog = self.backlog.lock();
            if backlog.len() == self.capacity {
                backlog.pop_front();
            }
            backlog.push_back(notification.clone());
        }
        // No bound listeners is not an error.
        let _ = self.sender.send(notification);
        Ok(())
    }
}

#[async_trait]
impl NotificationSubscriber for MemoryEventBus {
    async fn subscribe(&self) -> Result<broadcast::Receiver<Notification>> {
        Ok(self.sender.subscribe())
    }
}

#[async_trait]
impl CommandTransport for MemoryEventBus {
    async fn send_command(&self, command: Command) -> Result<()> {
        self.sent.lock().push(command.clone());
        let _ = self.commands.send(command);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn one_shot_listener_skips_other_names() {
        let bus = MemoryEventBus::new(16);
        let listener = OneShotListener::bind(&bus, "get all song names")
            .await
            .unwrap();
        assert_eq!(bus.listener_count(), 1);
        bus.publish(Notification::new("quiz ready", json!({})))
            .await
            .unwrap();
        bus.publish(Notification::new("get all song names", json!({ "version": 4 })))
            .await
            .unwrap();
        let received = listener.recv().await.unwrap();
        assert_eq!(received.payload["version"], 4);
        assert_eq!(bus.listener_count(), 0);
        assert_eq!(bus.snapshot().len(), 2);
    }

    #[tokio::test]
    async fn commands_are_recorded_and_observable() {
        let bus = MemoryEventBus::new(4);
        let mut commands = bus.subscribe_commands();
        bus.send_command(
            Command::new("quiz", "update all song names")
                .with_data(json!({ "currentVersion": 7 })),
        )
        .await
        .unwrap();
        let seen = commands.recv().await.unwrap();
        assert_eq!(seen.command, "update all song names");
        assert_eq!(bus.sent_commands(), vec![seen]);
    }

    #[test]
    fn command_serializes_type_field() {
        let value = serde_json::to_value(Command::new("quiz", "get all song names"))
            .unwrap();
        assert_eq!(value, json!({ "type": "quiz", "command": "get all song names" }));
    }

    #[tokio::test]
    async fn backlog_is_bounded() {
        let bus = MemoryEventBus::new(2);
        for name in ["a", "b", "c"] {
            bus.publish(Notification::new(name, json!(null)))
                .await
                .unwrap();
        }
        let names: Vec<_> = bus.snapshot().into_iter().map(|n| n.name).collect();
        assert_eq!(names, vec!["b", "c"]);
    }
}
