//! evdev adapters: exclusive device access and device enumeration.
//!
//! Device ids map to evdev nodes: `DeviceId(3)` is `/dev/input/event3`.
//! Seizing a device opens its node and grabs it; the kernel then delivers
//! its events to this process only.  Releasing ungrabs and closes the node.
//!
//! [`DeviceScanner`] enumerates evdev devices periodically and reports
//! attach/detach into the arbitrator's mailbox.

use std::collections::{BTreeSet, HashMap};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;

use evdev::{Device, EventType, InputEvent, LedType};
use grabd_core::{DeviceId, DeviceSeizer, LedState, SeizeError};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time;
use tracing::{debug, warn};

use crate::application::arbitrator::GrabberEvent;

/// Directory holding the evdev nodes.
pub const INPUT_DIR: &str = "/dev/input";

const NODE_PREFIX: &str = "event";

/// Path of the evdev node for `device_id` inside `input_dir`.
pub fn device_node(input_dir: &Path, device_id: DeviceId) -> PathBuf {
    input_dir.join(format!("{NODE_PREFIX}{}", device_id.0))
}

/// Id of an `eventN` node, or `None` for any other path.
pub fn device_id_of(node: &Path) -> Option<DeviceId> {
    node.file_name()?
        .to_str()?
        .strip_prefix(NODE_PREFIX)?
        .parse::<u64>()
        .ok()
        .map(DeviceId)
}

/// Ids of every evdev device this process can open.
pub fn scan_devices() -> BTreeSet<DeviceId> {
    evdev::enumerate()
        .filter_map(|(path, _device)| device_id_of(&path))
        .collect()
}

// ── Seizure ───────────────────────────────────────────────────────────────────

pub struct EvdevSeizer {
    input_dir: PathBuf,
    grabbed: Mutex<HashMap<DeviceId, Device>>,
}

impl EvdevSeizer {
    pub fn new(input_dir: impl Into<PathBuf>) -> Self {
        Self {
            input_dir: input_dir.into(),
            grabbed: Mutex::new(HashMap::new()),
        }
    }

    fn refused(device_id: DeviceId, e: io::Error) -> SeizeError {
        if e.kind() == io::ErrorKind::NotFound {
            SeizeError::DeviceGone(device_id)
        } else {
            SeizeError::Refused {
                device_id,
                reason: e.to_string(),
            }
        }
    }
}

impl Default for EvdevSeizer {
    fn default() -> Self {
        Self::new(INPUT_DIR)
    }
}

impl DeviceSeizer for EvdevSeizer {
    fn seize(&self, device_id: DeviceId) -> Result<(), SeizeError> {
        let node = device_node(&self.input_dir, device_id);
        let mut device = Device::open(&node).map_err(|e| Self::refused(device_id, e))?;
        device.grab().map_err(|e| Self::refused(device_id, e))?;
        let mut grabbed = self.grabbed.lock().map_err(|_| SeizeError::Refused {
            device_id,
            reason: "seizer state poisoned".to_string(),
        })?;
        grabbed.insert(device_id, device);
        Ok(())
    }

    fn release(&self, device_id: DeviceId) {
        let device = match self.grabbed.lock() {
            Ok(mut grabbed) => grabbed.remove(&device_id),
            Err(_) => None,
        };
        if let Some(mut device) = device {
            // Closing the node below drops the grab as well.
            if let Err(e) = device.ungrab() {
                debug!(%device_id, error = %e, "ungrab failed; closing");
            }
        }
    }

    fn set_caps_lock_led(&self, device_id: DeviceId, state: LedState) {
        let Ok(mut grabbed) = self.grabbed.lock() else {
            return;
        };
        let Some(device) = grabbed.get_mut(&device_id) else {
            return;
        };
        let events = [
            InputEvent::new(EventType::LED, LedType::LED_CAPSL.0, state as i32),
            InputEvent::new(EventType::SYNCHRONIZATION, 0, 0),
        ];
        if let Err(e) = device.send_events(&events) {
            warn!(%device_id, error = %e, "failed to write caps lock LED");
        }
    }
}

// ── Enumeration ───────────────────────────────────────────────────────────────

/// Periodic evdev enumeration that reports attach/detach.
pub struct DeviceScanner {
    task: JoinHandle<()>,
}

impl DeviceScanner {
    /// Scans immediately, then every `interval`.  Must be called from within
    /// a Tokio runtime.
    pub fn start(interval: Duration, events: mpsc::Sender<GrabberEvent>) -> Self {
        let task = tokio::spawn(async move {
            let mut known = BTreeSet::new();
            let mut ticker = time::interval(interval);
            loop {
                ticker.tick().await;
                // Enumeration opens every node; keep it off the runtime threads.
                let current = match tokio::task::spawn_blocking(scan_devices).await {
                    Ok(current) => current,
                    Err(e) => {
                        debug!(error = %e, "device scan failed");
                        continue;
                    }
                };
                for event in diff(&known, &current) {
                    if events.send(event).await.is_err() {
                        return;
                    }
                }
                known = current;
            }
        });
        Self { task }
    }
}

impl Drop for DeviceScanner {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Detaches first, then attaches, each in id order.
fn diff(known: &BTreeSet<DeviceId>, current: &BTreeSet<DeviceId>) -> Vec<GrabberEvent> {
    known
        .difference(current)
        .map(|id| GrabberEvent::DeviceDetached(*id))
        .chain(
            current
                .difference(known)
                .map(|id| GrabberEvent::DeviceAttached(*id)),
        )
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("grabd-input-{name}-{}", std::process::id()));
        std::fs::create_dir_all(&dir).expect("mkdir");
        dir
    }

    #[test]
    fn test_device_id_of_accepts_event_nodes_only() {
        let ids: Vec<_> = ["event3", "event10", "mouse0", "eventX", "by-id"]
            .iter()
            .map(|name| device_id_of(&Path::new(INPUT_DIR).join(name)))
            .collect();

        assert_eq!(
            ids,
            vec![Some(DeviceId(3)), Some(DeviceId(10)), None, None, None]
        );
    }

    #[test]
    fn test_diff_reports_detach_before_attach() {
        let known: BTreeSet<_> = [DeviceId(1), DeviceId(2)].into();
        let current: BTreeSet<_> = [DeviceId(2), DeviceId(5)].into();

        let events = diff(&known, &current);

        assert!(matches!(
            events.as_slice(),
            [
                GrabberEvent::DeviceDetached(DeviceId(1)),
                GrabberEvent::DeviceAttached(DeviceId(5))
            ]
        ));
    }

    #[test]
    fn test_seize_missing_node_is_device_gone() {
        let seizer = EvdevSeizer::new(temp_dir("empty"));

        let result = seizer.seize(DeviceId(99));

        assert_eq!(result, Err(SeizeError::DeviceGone(DeviceId(99))));
    }

    #[test]
    fn test_seize_of_non_evdev_node_is_refused_and_not_held() {
        // Arrange
        let dir = temp_dir("plain");
        std::fs::write(device_node(&dir, DeviceId(4)), b"").expect("touch");
        let seizer = EvdevSeizer::new(&dir);

        // Act
        let result = seizer.seize(DeviceId(4));
        let _ = std::fs::remove_dir_all(&dir);

        // Assert
        assert!(matches!(
            result,
            Err(SeizeError::Refused {
                device_id: DeviceId(4),
                ..
            })
        ));
        assert!(seizer.grabbed.lock().expect("lock").is_empty());
    }

    #[test]
    fn test_release_of_unseized_device_is_noop() {
        let seizer = EvdevSeizer::new(temp_dir("noop"));

        seizer.release(DeviceId(1));
        seizer.set_caps_lock_led(DeviceId(1), LedState::On);
    }

    #[test]
    fn test_device_node_path() {
        assert_eq!(
            device_node(Path::new(INPUT_DIR), DeviceId(7)),
            PathBuf::from("/dev/input/event7")
        );
    }
}
