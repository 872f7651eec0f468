//! Helpers shared by unit tests.

use metrics_util::{
    MetricKind,
    debugging::{DebugValue, Snapshot},
};

/// Value of the counter `name` carrying exactly `labels`, if it was recorded.
pub(crate) fn counter(snapshot: Snapshot, name: &str, labels: &[(&str, &str)]) -> Option<u64> {
    snapshot
        .into_vec()
        .into_iter()
        .find_map(|(key, _, _, value)| {
            let found = key.kind() == MetricKind::Counter
                && key.key().name() == name
                && key
                    .key()
                    .labels()
                    .map(|label| (label.key(), label.value()))
                    .eq(labels.iter().copied());
            match value {
                DebugValue::Counter(count) if found => Some(count),
                _ => None,
            }
        })
}
