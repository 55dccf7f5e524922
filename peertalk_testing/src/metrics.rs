//! Metric capture through `metrics_util`'s debugging recorder.

use metrics_util::{
    CompositeKey,
    debugging::{DebugValue, DebuggingRecorder},
};

/// Counter values taken from a single snapshot of a debugging recorder.
///
/// Snapshotting resets the recorder's counters, so the values are read once
/// and every lookup goes through this copy.
#[derive(Debug, Default)]
pub struct Recorded {
    entries: Vec<(CompositeKey, DebugValue)>,
}

impl Recorded {
    /// Sum of the counter `name` across label sets matching `label`, if
    /// given.
    #[must_use]
    pub fn counter(&self, name: &str, label: Option<(&str, &str)>) -> u64 {
        self.entries
            .iter()
            .filter(|(key, _)| key.key().name() == name)
            .filter(|(key, _)| {
                label.is_none_or(|(k, v)| {
                    key.key()
                        .labels()
                        .any(|l| l.key() == k && l.value() == v)
                })
            })
            .map(|(_, value)| match value {
                DebugValue::Counter(count) => *count,
                _ => 0,
            })
            .sum()
    }
}

/// Run `f` with a thread-local debugging recorder and return everything it
/// recorded.
pub fn capture(f: impl FnOnce()) -> Recorded {
    let recorder = DebuggingRecorder::new();
    let snapshotter = recorder.snapshotter();
    ::metrics::with_local_recorder(&recorder, f);
    Recorded {
        entries: snapshotter
            .snapshot()
            .into_vec()
            .into_iter()
            .map(|(key, _, _, value)| (key, value))
            .collect(),
    }
}

/// Sum of the counter `name` in `recorded`; see [`Recorded::counter`].
#[must_use]
pub fn counter(recorded: &Recorded, name: &str, label: Option<(&str, &str)>) -> u64 {
    recorded.counter(name, label)
}
