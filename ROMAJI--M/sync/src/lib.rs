#![deny(
    clippy::all,
    clippy::pedantic,
    clippy::nursery,
    missing_docs,
    rust_2018_idioms
)]

//! Bootstrap and synchronisation of the romaji-first dropdown: waits for the
//! host page's late-loading dependencies, installs the classified candidate
//! list and comparator, and re-applies them whenever the catalog changes.

/// Runtime configuration.
#[path = "../config.rs"]
pub mod config;

/// Polling dependency gate.
#[path = "../gate.rs"]
pub mod gate;

/// Host page seams and in-memory stand-ins.
#[path = "../host/main.rs"]
pub mod host;

/// Full/incremental song-name requests over the event bus.
#[path = "../songnames.rs"]
pub mod songnames;

/// Telemetry helpers.
#[path = "../telemetry.rs"]
pub mod telemetry;

/// Sync controller state machine.
#[path = "../controller/main.rs"]
pub mod controller;

pub use config::{CommandNames, SyncConfig};
pub use controller::{
    SyncController, SyncControllerBuilder, SyncError, SyncPhase, SyncRefreshHook, SyncState,
};
pub use gate::{await_condition, GatePolicy, TimeoutError};
pub use host::{
    AutocompleteWidget, CatalogProvider, HostPage, ListRefresher, RankingInstance,
};
pub use songnames::{
    BusSongNameSource, CatalogVersion, FullCatalogResponse, IncrementalCatalogResponse,
    SongNameSource,
};
pub use telemetry::{SyncTelemetry, SyncTelemetryBuilder};
