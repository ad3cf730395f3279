use std::time::Duration;

use anyhow::{bail, Context, Result};
use romaji_classifier::LanguageTags;
use serde::{Deserialize, Serialize};

use crate::gate::GatePolicy;

/// Names used on the host's event bus.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CommandNames {
    /// Command family sent with every request.
    pub command_type: String,
    /// Full song-name catalog request and response name.
    pub full: String,
    /// Incremental diff request and response name.
    pub incremental: String,
    /// Host readiness notification.
    pub quiz_ready: String,
}

impl Default for CommandNames {
    fn default() -> Self {
        Self {
            command_type: "quiz".into(),
            full: "get all song names".into(),
            incremental: "update all song names".into(),
            quiz_ready: "quiz ready".into(),
        }
    }
}

/// Timing and naming knobs of the sync controller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Budget applied to each dependency gate.
    pub gate: GatePolicy,
    /// Delay before re-requesting an empty catalog.
    pub empty_catalog_retry_ms: u64,
    /// Backoff before restarting after a failed attempt.
    pub failure_backoff_ms: u64,
    /// Delay between the readiness notification and the deferred install.
    pub quiz_ready_delay_ms: u64,
    /// Language slots used for classification.
    pub languages: LanguageTags,
    /// Event bus names.
    pub commands: CommandNames,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            gate: GatePolicy::default(),
            empty_catalog_retry_ms: 2_000,
            failure_backoff_ms: 5_000,
            quiz_ready_delay_ms: 100,
            languages: LanguageTags::default(),
            commands: CommandNames::default(),
        }
    }
}

impl SyncConfig {
    /// Parses and validates a TOML document; missing keys take defaults.
    ///
    /// # Errors
    /// Returns an error when the document does not parse or fails validation.
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let config: Self = toml::from_str(raw).context("parsing sync config")?;
        config.validate()?;
        Ok(config)
    }

    /// Rejects settings the controller cannot run with.
    ///
    /// # Errors
    /// Returns an error naming the first invalid setting.
    pub fn validate(&self) -> Result<()> {
        if self.gate.max_attempts == 0 {
            bail!("gate.max_attempts must be at least 1");
        }
        if self.gate.poll_interval_ms == 0 {
            bail!("gate.poll_interval_ms must be positive");
        }
        if self.languages.native.is_empty() || self.languages.localized.is_empty() {
            bail!("language tags must not be empty");
        }
        if self.languages.native == self.languages.localized {
            bail!(
                "native and localized tags are both `{}`",
                self.languages.native
            );
        }
        let commands = &self.commands;
        for (key, value) in [
            ("command_type", &commands.command_type),
            ("full", &commands.full),
            ("incremental", &commands.incremental),
            ("quiz_ready", &commands.quiz_ready),
        ] {
            if value.is_empty() {
                bail!("commands.{key} must not be empty");
            }
        }
        Ok(())
    }

    /// Delay before re-requesting an empty catalog.
    #[must_use]
    pub const fn empty_catalog_retry(&self) -> Duration {
        Duration::from_millis(self.empty_catalog_retry_ms)
    }

    /// Backoff before restarting after a failure.
    #[must_use]
    pub const fn failure_backoff(&self) -> Duration {
        Duration::from_millis(self.failure_backoff_ms)
    }

    /// Delay applied after the readiness notification.
    #[must_use]
    pub const fn quiz_ready_delay(&self) -> Duration {
        Duration::from_millis(self.quiz_ready_delay_ms)
    }
}
