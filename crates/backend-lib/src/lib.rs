//! Core of the meeting watch service: routes meeting-platform events to the
//! chat channels watching them.

pub mod commands;
pub mod config;
pub mod error;
pub mod fanout;
pub mod index;
pub mod messages;
pub mod orchestrator;
pub mod peer;
pub mod presence;
pub mod resume;
pub mod retention;
pub mod router;
pub mod sink;
pub mod storage;
pub mod watch;

use std::sync::Arc;

use crate::commands::Commands;
use crate::config::Settings;
use crate::error::AppError;
use crate::orchestrator::Orchestrator;
use crate::peer::{HttpPeer, NoPeer, PeerLink};
use crate::sink::StatusSink;
use crate::storage::{DisabledWatchStore, FlatFileWatchStore, WatchStore};

/// Application state shared across all handlers
#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<Orchestrator>,
    pub commands: Arc<Commands>,
    pub settings: Arc<Settings>,
}

impl AppState {
    /// Wire the given collaborators together
    pub fn new(
        settings: Settings,
        store: Arc<dyn WatchStore>,
        peer: Arc<dyn PeerLink>,
        sink: Arc<dyn StatusSink>,
    ) -> Self {
        let orchestrator = Arc::new(Orchestrator::new(store, peer));
        let commands = Arc::new(Commands::new(orchestrator.clone(), sink));
        Self {
            orchestrator,
            commands,
            settings: Arc::new(settings),
        }
    }

    /// Build the store and peer link described by `settings`
    pub fn from_settings(settings: Settings, sink: Arc<dyn StatusSink>) -> Result<Self, AppError> {
        let store: Arc<dyn WatchStore> = if settings.persistence.enabled {
            Arc::new(FlatFileWatchStore::new(&settings.persistence.data_dir)?)
        } else {
            Arc::new(DisabledWatchStore)
        };

        let peer: Arc<dyn PeerLink> = match &settings.peer_address {
            Some(address) => Arc::new(HttpPeer::new(
                address,
                &settings.base_url,
                settings.peer_health_timeout(),
                settings.peer_forward_timeout(),
            )),
            None => Arc::new(NoPeer),
        };

        Ok(Self::new(settings, store, peer, sink))
    }
}
