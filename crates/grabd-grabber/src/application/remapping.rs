//! The seam to the remapping engine.
//!
//! The engine maps input from grabbed devices to output events; how it does
//! that is outside the grabber's arbitration.  The arbitrator only tells it
//! which configuration is active and hands it the latest session state.
//! [`SimpleRemappingEngine`] is the built-in engine: it applies one-to-one
//! key substitutions and remembers the session state it was given.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use grabd_core::protocol::messages::{
    FrontmostApplication, InputSourceProperties, SimpleModification, SystemPreferences,
};
use grabd_core::KeyCode;
use tracing::{debug, info};

/// Receives configuration and session state from the arbitrator.
#[cfg_attr(test, mockall::automock)]
pub trait RemappingEngine: Send {
    /// Loads the configuration at `path` as the active profile.
    fn set_configuration(&mut self, path: &Path);

    /// Drops the active profile; input passes through unchanged.
    fn clear_configuration(&mut self);

    fn set_caps_lock_state(&mut self, on: bool);

    fn set_system_preferences(&mut self, preferences: &SystemPreferences);

    fn set_frontmost_application(&mut self, application: &FrontmostApplication);

    fn set_input_source(&mut self, properties: &InputSourceProperties);

    fn clear_simple_modifications(&mut self);

    fn add_simple_modification(&mut self, modification: SimpleModification);
}

/// One-to-one key substitution engine.
#[derive(Debug, Default)]
pub struct SimpleRemappingEngine {
    configuration: Option<PathBuf>,
    modifications: HashMap<KeyCode, KeyCode>,
    caps_lock: bool,
    system_preferences: SystemPreferences,
    frontmost_application: Option<FrontmostApplication>,
    input_source: Option<InputSourceProperties>,
}

impl SimpleRemappingEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Output key for `key` under the active profile.  Without a profile every
    /// key maps to itself.
    pub fn remap(&self, key: KeyCode) -> KeyCode {
        if self.configuration.is_none() {
            return key;
        }
        self.modifications.get(&key).copied().unwrap_or(key)
    }

    pub fn configuration(&self) -> Option<&Path> {
        self.configuration.as_deref()
    }

    pub fn caps_lock(&self) -> bool {
        self.caps_lock
    }

    pub fn system_preferences(&self) -> &SystemPreferences {
        &self.system_preferences
    }

    pub fn frontmost_application(&self) -> Option<&FrontmostApplication> {
        self.frontmost_application.as_ref()
    }

    pub fn input_source(&self) -> Option<&InputSourceProperties> {
        self.input_source.as_ref()
    }
}

impl RemappingEngine for SimpleRemappingEngine {
    fn set_configuration(&mut self, path: &Path) {
        info!(path = %path.display(), "remapping configuration loaded");
        self.configuration = Some(path.to_path_buf());
    }

    fn clear_configuration(&mut self) {
        if self.configuration.take().is_some() {
            info!("remapping configuration cleared");
        }
    }

    fn set_caps_lock_state(&mut self, on: bool) {
        self.caps_lock = on;
    }

    fn set_system_preferences(&mut self, preferences: &SystemPreferences) {
        self.system_preferences = *preferences;
    }

    fn set_frontmost_application(&mut self, application: &FrontmostApplication) {
        debug!(bundle_identifier = %application.bundle_identifier, "frontmost application");
        self.frontmost_application = Some(application.clone());
    }

    fn set_input_source(&mut self, properties: &InputSourceProperties) {
        self.input_source = Some(properties.clone());
    }

    fn clear_simple_modifications(&mut self) {
        self.modifications.clear();
    }

    fn add_simple_modification(&mut self, modification: SimpleModification) {
        self.modifications
            .insert(modification.from_key, modification.to_key);
    }
}
