//! Recording implementations of the arbitrator's outward traits.
//!
//! Each double is a cheap `Clone` over shared state, so a test can hand one
//! copy to the [`ConnectionArbitrator`](super::arbitrator::ConnectionArbitrator)
//! and keep another to inspect afterwards.

use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use grabd_core::protocol::messages::{
    FrontmostApplication, InputSourceProperties, SimpleModification, SystemPreferences,
};
use grabd_ipc::ChannelId;

use super::arbitrator::{HostEnvironment, PeerConnector, PeerWatch, SessionLink};
use super::remapping::RemappingEngine;

// ── Peer connector ────────────────────────────────────────────────────────────

#[derive(Default)]
struct ConnectorLog {
    live_links: usize,
    live_monitors: usize,
    link_endpoints: Vec<PathBuf>,
    link_generations: Vec<ChannelId>,
    watched_pids: Vec<i32>,
    sent: Vec<Vec<u8>>,
}

/// Hands out links and watches that only count themselves.
#[derive(Clone, Default)]
pub struct RecordingConnector {
    log: Arc<Mutex<ConnectorLog>>,
}

impl RecordingConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Links opened and not yet stopped.
    pub fn live_links(&self) -> usize {
        self.read(|log| log.live_links)
    }

    /// Process watches started and not yet stopped.
    pub fn live_monitors(&self) -> usize {
        self.read(|log| log.live_monitors)
    }

    pub fn link_endpoints(&self) -> Vec<PathBuf> {
        self.read(|log| log.link_endpoints.clone())
    }

    pub fn link_generations(&self) -> Vec<ChannelId> {
        self.read(|log| log.link_generations.clone())
    }

    pub fn watched_pids(&self) -> Vec<i32> {
        self.read(|log| log.watched_pids.clone())
    }

    /// Every payload sent on any link, in order.
    pub fn sent(&self) -> Vec<Vec<u8>> {
        self.read(|log| log.sent.clone())
    }

    fn read<R: Default>(&self, f: impl FnOnce(&ConnectorLog) -> R) -> R {
        self.log.lock().map(|log| f(&log)).unwrap_or_default()
    }
}

struct RecordingLink {
    log: Arc<Mutex<ConnectorLog>>,
    stopped: bool,
}

impl SessionLink for RecordingLink {
    fn send(&self, payload: Vec<u8>) {
        if self.stopped {
            return;
        }
        if let Ok(mut log) = self.log.lock() {
            log.sent.push(payload);
        }
    }

    fn stop(&mut self) {
        if self.stopped {
            return;
        }
        self.stopped = true;
        if let Ok(mut log) = self.log.lock() {
            log.live_links -= 1;
        }
    }
}

struct RecordingWatch {
    log: Arc<Mutex<ConnectorLog>>,
    stopped: bool,
}

impl PeerWatch for RecordingWatch {
    fn stop(&mut self) {
        if self.stopped {
            return;
        }
        self.stopped = true;
        if let Ok(mut log) = self.log.lock() {
            log.live_monitors -= 1;
        }
    }
}

impl PeerConnector for RecordingConnector {
    fn open_session_link(&mut self, generation: ChannelId, endpoint: &Path) -> Box<dyn SessionLink> {
        if let Ok(mut log) = self.log.lock() {
            log.live_links += 1;
            log.link_endpoints.push(endpoint.to_path_buf());
            log.link_generations.push(generation);
        }
        Box::new(RecordingLink {
            log: Arc::clone(&self.log),
            stopped: false,
        })
    }

    fn watch_process(&mut self, _generation: ChannelId, pid: i32) -> Box<dyn PeerWatch> {
        if let Ok(mut log) = self.log.lock() {
            log.live_monitors += 1;
            log.watched_pids.push(pid);
        }
        Box::new(RecordingWatch {
            log: Arc::clone(&self.log),
            stopped: false,
        })
    }
}

// ── Host environment ──────────────────────────────────────────────────────────

/// Host whose system configuration is fixed at construction.
#[derive(Clone, Default)]
pub struct RecordingHost {
    fallback: Option<PathBuf>,
    secure_calls: Arc<Mutex<usize>>,
}

impl RecordingHost {
    pub fn new(fallback: Option<PathBuf>) -> Self {
        Self {
            fallback,
            secure_calls: Arc::default(),
        }
    }

    pub fn secure_calls(&self) -> usize {
        self.secure_calls.lock().map(|n| *n).unwrap_or_default()
    }
}

impl HostEnvironment for RecordingHost {
    fn secure_server_socket(&self) -> io::Result<()> {
        if let Ok(mut n) = self.secure_calls.lock() {
            *n += 1;
        }
        Ok(())
    }

    fn fallback_configuration(&self) -> Option<PathBuf> {
        self.fallback.clone()
    }
}

// ── Remapping engine ──────────────────────────────────────────────────────────

/// One entry per engine call.
#[derive(Debug, Clone, PartialEq)]
pub enum EngineCall {
    SetConfiguration(PathBuf),
    ClearConfiguration,
    CapsLock(bool),
    SystemPreferences(SystemPreferences),
    FrontmostApplication(FrontmostApplication),
    InputSource(InputSourceProperties),
    ClearSimpleModifications,
    AddSimpleModification(SimpleModification),
}

/// Engine that records calls instead of remapping.
#[derive(Clone, Default)]
pub struct RecordingEngine {
    calls: Arc<Mutex<Vec<EngineCall>>>,
}

impl RecordingEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> Vec<EngineCall> {
        self.calls.lock().map(|v| v.clone()).unwrap_or_default()
    }

    fn record(&self, call: EngineCall) {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(call);
        }
    }
}

impl RemappingEngine for RecordingEngine {
    fn set_configuration(&mut self, path: &Path) {
        self.record(EngineCall::SetConfiguration(path.to_path_buf()));
    }

    fn clear_configuration(&mut self) {
        self.record(EngineCall::ClearConfiguration);
    }

    fn set_caps_lock_state(&mut self, on: bool) {
        self.record(EngineCall::CapsLock(on));
    }

    fn set_system_preferences(&mut self, preferences: &SystemPreferences) {
        self.record(EngineCall::SystemPreferences(*preferences));
    }

    fn set_frontmost_application(&mut self, application: &FrontmostApplication) {
        self.record(EngineCall::FrontmostApplication(application.clone()));
    }

    fn set_input_source(&mut self, properties: &InputSourceProperties) {
        self.record(EngineCall::InputSource(properties.clone()));
    }

    fn clear_simple_modifications(&mut self) {
        self.record(EngineCall::ClearSimpleModifications);
    }

    fn add_simple_modification(&mut self, modification: SimpleModification) {
        self.record(EngineCall::AddSimpleModification(modification));
    }
}
