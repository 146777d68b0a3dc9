//! Self-caused vs external change classification.
//!
//! Pure decision logic: given one decoded change and a snapshot of the running scene,
//! decide whether a person overrode the animation.

use crate::model::{ClassifierView, DeviceChange, OverrideSignal, OverrideVerdict};
use std::time::Duration;

/// Debounce for power-off events.
pub const SHORT_WINDOW_MS: u64 = 2_000;
/// Debounce for colour/brightness events. Animations change these constantly.
pub const LONG_WINDOW_MS: u64 = SHORT_WINDOW_MS * 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DebounceWindows {
    pub power_off_ms: u64,
    pub attribute_ms: u64,
}

impl Default for DebounceWindows {
    fn default() -> Self {
        Self {
            power_off_ms: SHORT_WINDOW_MS,
            attribute_ms: LONG_WINDOW_MS,
        }
    }
}

impl DebounceWindows {
    /// Power-off uses `short`, attribute changes use twice that.
    pub fn from_short(short: Duration) -> Self {
        let short_ms = u64::try_from(short.as_millis()).unwrap_or(u64::MAX);
        Self {
            power_off_ms: short_ms,
            attribute_ms: short_ms.saturating_mul(2),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Classification {
    /// No scene, not a device update, untracked device, or nothing override-worthy.
    Ignored,
    /// Inside the debounce window of our own last command.
    SelfCaused,
    External(OverrideVerdict),
}

pub fn classify(
    change: &DeviceChange,
    view: &ClassifierView,
    now_ms: u64,
    windows: DebounceWindows,
) -> Classification {
    if !view.running
        || !change.is_device_update()
        || !view.target_device_ids.contains(&change.device_id)
    {
        return Classification::Ignored;
    }

    let powered_off = change.power == Some(false);
    if !powered_off && !change.attributes_changed {
        return Classification::Ignored;
    }

    let elapsed_ms = now_ms.saturating_sub(view.last_command_at);
    let signal = if powered_off && elapsed_ms > windows.power_off_ms {
        Some(OverrideSignal::PowerOff)
    } else if change.attributes_changed && elapsed_ms > windows.attribute_ms {
        Some(OverrideSignal::AttributeChange)
    } else {
        None
    };

    match signal {
        Some(signal) => Classification::External(OverrideVerdict {
            device_id: change.device_id.clone(),
            signal,
            elapsed_ms,
            generation: view.generation,
        }),
        None => Classification::SelfCaused,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;
    use std::sync::Arc;

    const T0: u64 = 1_700_000_000_000;

    fn view() -> ClassifierView {
        ClassifierView {
            running: true,
            target_device_ids: Arc::new(BTreeSet::from(["k1".to_string(), "k2".to_string()])),
            last_command_at: T0,
            generation: 3,
        }
    }

    fn change(device: &str, power: Option<bool>, attributes_changed: bool) -> DeviceChange {
        DeviceChange {
            event_type: "update".into(),
            resource_type: "light".into(),
            device_id: device.into(),
            power,
            attributes_changed,
        }
    }

    fn classify_at(change: &DeviceChange, elapsed: u64) -> Classification {
        classify(change, &view(), T0 + elapsed, DebounceWindows::default())
    }

    #[test]
    fn attribute_change_at_short_window_is_self_caused() {
        let c = change("k1", None, true);
        assert_eq!(classify_at(&c, SHORT_WINDOW_MS), Classification::SelfCaused);
    }

    #[test]
    fn windows_differ_per_signal_just_past_short_window() {
        let attr = change("k1", None, true);
        assert_eq!(classify_at(&attr, SHORT_WINDOW_MS + 1), Classification::SelfCaused);

        let off = change("k1", Some(false), false);
        match classify_at(&off, SHORT_WINDOW_MS + 1) {
            Classification::External(v) => {
                assert_eq!(v.signal, OverrideSignal::PowerOff);
                assert_eq!(v.elapsed_ms, SHORT_WINDOW_MS + 1);
                assert_eq!(v.generation, 3);
            }
            other => panic!("expected external verdict, got {other:?}"),
        }
    }

    #[test]
    fn power_off_at_short_window_is_self_caused() {
        let off = change("k2", Some(false), false);
        assert_eq!(classify_at(&off, SHORT_WINDOW_MS), Classification::SelfCaused);
    }

    #[test]
    fn attribute_change_past_long_window_is_external() {
        let attr = change("k2", None, true);
        assert_eq!(classify_at(&attr, LONG_WINDOW_MS), Classification::SelfCaused);
        assert!(matches!(
            classify_at(&attr, LONG_WINDOW_MS + 1),
            Classification::External(OverrideVerdict {
                signal: OverrideSignal::AttributeChange,
                ..
            })
        ));
    }

    #[test]
    fn combined_record_yields_one_power_off_verdict() {
        let both = change("k1", Some(false), true);
        match classify_at(&both, 2_500) {
            Classification::External(v) => assert_eq!(v.signal, OverrideSignal::PowerOff),
            other => panic!("expected external verdict, got {other:?}"),
        }
    }

    #[test]
    fn irrelevant_changes_are_ignored() {
        let untracked = change("x9", Some(false), false);
        assert_eq!(classify_at(&untracked, 60_000), Classification::Ignored);

        let power_on = change("k1", Some(true), false);
        assert_eq!(classify_at(&power_on, 60_000), Classification::Ignored);

        let mut added = change("k1", Some(false), false);
        added.event_type = "add".into();
        assert_eq!(classify_at(&added, 60_000), Classification::Ignored);

        let mut sensor = change("k1", Some(false), false);
        sensor.resource_type = "motion".into();
        assert_eq!(classify_at(&sensor, 60_000), Classification::Ignored);
    }

    #[test]
    fn nothing_is_classified_without_a_running_scene() {
        let mut idle = view();
        idle.running = false;
        let off = change("k1", Some(false), false);
        assert_eq!(
            classify(&off, &idle, T0 + 60_000, DebounceWindows::default()),
            Classification::Ignored
        );
    }

    #[test]
    fn recovered_scene_treats_first_event_as_external() {
        let mut recovered = view();
        recovered.last_command_at = 0;
        let attr = change("k1", None, true);
        assert!(matches!(
            classify(&attr, &recovered, T0, DebounceWindows::default()),
            Classification::External(_)
        ));
    }

    #[test]
    fn windows_scale_from_short_duration() {
        let w = DebounceWindows::from_short(Duration::from_millis(1500));
        assert_eq!(w.power_off_ms, 1500);
        assert_eq!(w.attribute_ms, 3000);
    }
}
