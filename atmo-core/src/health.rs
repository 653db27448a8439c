use jiff::{SignedDuration, Timestamp};
use serde::{Deserialize, Serialize};

use crate::DeviceKind;

/// Escalating confidence that a device has stopped communicating.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum HealthState {
    Online,
    Warning,
    Offline,
}

impl HealthState {
    pub fn show_warning(self) -> bool {
        !matches!(self, HealthState::Online)
    }
}

/// Silence thresholds for the health evaluation.
///
/// Virtual devices receive derived data on a slower cadence, so they get a
/// longer threshold than physical ones. `offline_confirmation` is the
/// debounce window: a warning must persist at least this long before it is
/// confirmed as `Offline`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthPolicy {
    pub physical_silence: SignedDuration,
    pub virtual_silence: SignedDuration,
    pub offline_confirmation: SignedDuration,
}

impl Default for HealthPolicy {
    fn default() -> Self {
        Self {
            physical_silence: SignedDuration::from_mins(10),
            virtual_silence: SignedDuration::from_mins(60),
            offline_confirmation: SignedDuration::from_mins(5),
        }
    }
}

impl HealthPolicy {
    pub fn silence_threshold(&self, kind: DeviceKind) -> SignedDuration {
        match kind {
            DeviceKind::Physical => self.physical_silence,
            DeviceKind::Virtual => self.virtual_silence,
        }
    }

    /// Pure health evaluation.
    ///
    /// `warning_since` is when the caller first observed this device in
    /// `Warning`; it drives the offline confirmation and is the only state
    /// the caller has to remember. A device with no message history is
    /// always `Warning` ("never seen"), never `Online` and never escalated
    /// to `Offline`.
    pub fn evaluate(
        &self,
        now: Timestamp,
        last_message: Option<Timestamp>,
        kind: DeviceKind,
        warning_since: Option<Timestamp>,
    ) -> HealthState {
        let Some(last) = last_message else {
            return HealthState::Warning;
        };

        if now.duration_since(last) <= self.silence_threshold(kind) {
            return HealthState::Online;
        }

        match warning_since {
            Some(since) if now.duration_since(since) >= self.offline_confirmation => {
                HealthState::Offline
            }
            _ => HealthState::Warning,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ts(second: i64) -> Timestamp {
        Timestamp::from_second(second).unwrap()
    }

    #[test]
    fn never_seen_is_warning() {
        let policy = HealthPolicy::default();
        let now = ts(1_000_000);

        assert_eq!(
            policy.evaluate(now, None, DeviceKind::Physical, None),
            HealthState::Warning
        );
        // Not even a long-standing warning turns "never seen" into offline.
        assert_eq!(
            policy.evaluate(now, None, DeviceKind::Physical, Some(ts(0))),
            HealthState::Warning
        );
    }

    #[test]
    fn recent_message_is_online() {
        let policy = HealthPolicy::default();
        let now = ts(10_000);

        let last = now - SignedDuration::from_mins(9);
        assert_eq!(
            policy.evaluate(now, Some(last), DeviceKind::Physical, None),
            HealthState::Online
        );
    }

    #[test]
    fn physical_threshold_exceeded_is_warning() {
        let policy = HealthPolicy::default();
        let now = ts(10_000);

        let last = now - SignedDuration::from_mins(11);
        assert_eq!(
            policy.evaluate(now, Some(last), DeviceKind::Physical, None),
            HealthState::Warning
        );
    }

    #[test]
    fn virtual_device_tolerates_longer_silence() {
        let policy = HealthPolicy::default();
        let now = ts(10_000);

        // Same 11 minute gap that warns a physical device.
        let last = now - SignedDuration::from_mins(11);
        assert_eq!(
            policy.evaluate(now, Some(last), DeviceKind::Virtual, None),
            HealthState::Online
        );

        let last = now - SignedDuration::from_mins(61);
        assert_eq!(
            policy.evaluate(now, Some(last), DeviceKind::Virtual, None),
            HealthState::Warning
        );
    }

    #[test]
    fn offline_requires_persisted_warning() {
        let policy = HealthPolicy::default();
        let now = ts(100_000);
        let last = now - SignedDuration::from_mins(30);

        // First observation: warning, not offline.
        assert_eq!(
            policy.evaluate(now, Some(last), DeviceKind::Physical, None),
            HealthState::Warning
        );

        // Warning seen only recently: still warning.
        let warned = now - SignedDuration::from_mins(2);
        assert_eq!(
            policy.evaluate(now, Some(last), DeviceKind::Physical, Some(warned)),
            HealthState::Warning
        );

        // Warning persisted across the confirmation window: offline.
        let warned = now - SignedDuration::from_mins(5);
        assert_eq!(
            policy.evaluate(now, Some(last), DeviceKind::Physical, Some(warned)),
            HealthState::Offline
        );
    }

    #[test]
    fn fresh_message_clears_stale_warning() {
        let policy = HealthPolicy::default();
        let now = ts(100_000);

        // A device that recovered while a warning was pending reads online
        // regardless of the recorded warning start.
        let last = now - SignedDuration::from_mins(1);
        let warned = now - SignedDuration::from_mins(30);
        assert_eq!(
            policy.evaluate(now, Some(last), DeviceKind::Physical, Some(warned)),
            HealthState::Online
        );
    }
}
