use atmo_core::{DeviceId, HealthState};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};

use crate::template::TemplateKind;

/// Last state a device was *notified* at — deliberately distinct from the
/// last observed health, so a still-offline device re-checked every sweep
/// does not re-fire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConnectionState {
    Unknown,
    Connected,
    Disconnected,
}

/// A boundary crossing that warrants a notification or bookkeeping.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionTransition {
    pub kind: TemplateKind,
    pub device_id: DeviceId,
    pub at: jiff::Timestamp,
    /// When the device was last heard from before the transition.
    pub previous_last_message: Option<jiff::Timestamp>,
}

#[derive(Debug, Clone, Copy)]
struct WatchEntry {
    notified: ConnectionState,
    warning_since: Option<jiff::Timestamp>,
    connected_since: Option<jiff::Timestamp>,
    last_message: Option<jiff::Timestamp>,
}

impl Default for WatchEntry {
    fn default() -> Self {
        Self {
            notified: ConnectionState::Unknown,
            warning_since: None,
            connected_since: None,
            last_message: None,
        }
    }
}

/// Per-device connection state machine.
///
/// Entries live in a DashMap so each observation is an atomic per-device
/// read-modify-write; any number of concurrent readers and one sweep can
/// share the watch without extra locking.
#[derive(Default)]
pub struct ConnectionWatch {
    entries: DashMap<DeviceId, WatchEntry>,
}

impl ConnectionWatch {
    pub fn new() -> Self {
        Self::default()
    }

    /// When the device first entered `Warning`, if it has not recovered
    /// since. Feeds the evaluator's offline-confirmation debounce.
    pub fn warning_since(&self, device_id: DeviceId) -> Option<jiff::Timestamp> {
        self.entries.get(&device_id).and_then(|e| e.warning_since)
    }

    pub fn connected_since(&self, device_id: DeviceId) -> Option<jiff::Timestamp> {
        self.entries.get(&device_id).and_then(|e| e.connected_since)
    }

    pub fn notified_state(&self, device_id: DeviceId) -> ConnectionState {
        self.entries
            .get(&device_id)
            .map(|e| e.notified)
            .unwrap_or(ConnectionState::Unknown)
    }

    /// Ingestion hook: a fresh message invalidates any pending offline
    /// confirmation immediately, without waiting for the next sweep.
    pub fn record_message(&self, device_id: DeviceId, timestamp: jiff::Timestamp) {
        let mut entry = self.entries.entry(device_id).or_default();
        entry.warning_since = None;
        if entry.last_message.is_none_or(|last| last < timestamp) {
            entry.last_message = Some(timestamp);
        }
    }

    /// Feed one health observation through the state machine.
    ///
    /// `Connected -> Disconnected` yields exactly one ConnectionLost,
    /// `Disconnected -> Connected` exactly one ConnectionOk. Everything
    /// else — including repeated observations of the same state and a
    /// device that was never seen connected going offline — yields nothing.
    pub fn observe(
        &self,
        device_id: DeviceId,
        health: HealthState,
        last_message: Option<jiff::Timestamp>,
        now: jiff::Timestamp,
    ) -> Option<ConnectionTransition> {
        let mut entry = self.entries.entry(device_id).or_default();
        let previous_last_message = entry.last_message;

        let transition = match health {
            HealthState::Online => {
                entry.warning_since = None;
                if entry.connected_since.is_none() {
                    entry.connected_since = Some(now);
                }

                let recovered = entry.notified == ConnectionState::Disconnected;
                entry.notified = ConnectionState::Connected;

                recovered.then(|| ConnectionTransition {
                    kind: TemplateKind::ConnectionOk,
                    device_id,
                    at: now,
                    previous_last_message,
                })
            }
            HealthState::Warning => {
                entry.warning_since.get_or_insert(now);
                None
            }
            HealthState::Offline => {
                entry.warning_since.get_or_insert(now);
                entry.connected_since = None;

                let lost = entry.notified == ConnectionState::Connected;
                entry.notified = ConnectionState::Disconnected;

                lost.then(|| ConnectionTransition {
                    kind: TemplateKind::ConnectionLost,
                    device_id,
                    at: now,
                    previous_last_message,
                })
            }
        };

        if let Some(timestamp) = last_message
            && entry.last_message.is_none_or(|last| last < timestamp)
        {
            entry.last_message = Some(timestamp);
        }

        transition
    }
}
