//! Fixed-capacity time-series storage.
//!
//! Every field of every graph owns one series: a ring of exactly `steps`
//! slots holding the most recent samples. A slot holds `None`, a gap,
//! until it is first written, when a sample could not be taken, or when a
//! counter rate cannot be derived. Gaps are drawn as breaks in the plot, never
//! as zero.
//!
//! ## Counters
//!
//! A counter's raw value only ever increases. The store keeps the last raw
//! value and when it was observed, and records the rate of change per second
//! between consecutive observations:
//!
//! ```text
//! (100 @ 0s), (110 @ 10s), (90 @ 11s), (95 @ 12s)
//!  -> [∅, 1.0, ∅, 5.0]
//! ```
//!
//! The first observation has no baseline and records a gap. A decrease is
//! taken to be a reset of the observed counter and also records a gap. Every
//! observation of a value becomes the baseline for the next, including the
//! first and any that reset. A missing observation records a gap but leaves
//! the baseline in place, so the following rate averages over the missed
//! interval.
//!
//! ## Concurrency
//!
//! Each series sits behind its own lock. [`Store::append`] holds one lock for
//! one slot write and [`Store::snapshot`] holds each lock only while copying
//! that series out, so writer and reader never wait on each other longer than
//! one buffer copy.

use std::{
    num::NonZeroUsize,
    sync::{Mutex, MutexGuard, PoisonError},
    time::Instant,
};

use crate::spec::{GraphSpec, Kind};

/// One slot of a series. `None` is a gap.
pub type Sample = Option<f64>;

/// Errors produced by [`Store`].
#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// The field is not known to this store.
    #[error("no series for graph {graph} field {field}")]
    UnknownField {
        /// Graph index of the missing field.
        graph: usize,
        /// Field index within its graph.
        field: usize,
    },
}

/// Identifies one field: its graph's position and its position in the graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FieldId {
    /// Index of the graph.
    pub graph: usize,
    /// Index of the field within the graph.
    pub field: usize,
}

#[derive(Debug)]
struct Series {
    kind: Kind,
    slots: Box<[Sample]>,
    /// Index of the slot the next write lands in, which is also the oldest.
    cursor: usize,
    /// Last raw counter observation and when it was taken.
    baseline: Option<(f64, Instant)>,
}

impl Series {
    fn new(kind: Kind, steps: NonZeroUsize) -> Self {
        Self {
            kind,
            slots: vec![None; steps.get()].into_boxed_slice(),
            cursor: 0,
            baseline: None,
        }
    }

    fn record(&mut self, raw: Sample, at: Instant) {
        let raw = raw.filter(|v| v.is_finite());
        let sample = match self.kind {
            Kind::Gauge => raw,
            Kind::Counter => raw.and_then(|raw| self.rate(raw, at)),
        };
        self.slots[self.cursor] = sample;
        self.cursor = (self.cursor + 1) % self.slots.len();
    }

    fn rate(&mut self, raw: f64, at: Instant) -> Sample {
        let (previous, since) = self.baseline.replace((raw, at))?;
        let elapsed = at.checked_duration_since(since)?.as_secs_f64();
        let delta = raw - previous;
        if elapsed <= 0.0 || delta < 0.0 {
            return None;
        }
        Some(delta / elapsed)
    }

    fn chronological(&self) -> Vec<Sample> {
        let (newer, older) = self.slots.split_at(self.cursor);
        let mut out = Vec::with_capacity(self.slots.len());
        out.extend_from_slice(older);
        out.extend_from_slice(newer);
        out
    }
}

/// Ring buffers for every field of every graph.
#[derive(Debug)]
pub struct Store {
    steps: NonZeroUsize,
    /// `offsets[g]..offsets[g + 1]` are the series of graph `g`.
    offsets: Vec<usize>,
    series: Vec<Mutex<Series>>,
}

impl Store {
    /// Create a store with one series per field of `graphs`, each holding
    /// `steps` samples.
    #[must_use]
    pub fn new(graphs: &[GraphSpec], steps: NonZeroUsize) -> Self {
        let mut offsets = Vec::with_capacity(graphs.len() + 1);
        let mut series = Vec::new();
        offsets.push(0);
        for graph in graphs {
            for field in &graph.fields {
                series.push(Mutex::new(Series::new(field.kind, steps)));
            }
            offsets.push(series.len());
        }

        Self {
            steps,
            offsets,
            series,
        }
    }

    /// Number of samples retained per field.
    #[must_use]
    pub fn steps(&self) -> usize {
        self.steps.get()
    }

    /// Every field known to this store, in graph then field order.
    pub fn fields(&self) -> impl Iterator<Item = FieldId> + '_ {
        self.offsets
            .windows(2)
            .enumerate()
            .flat_map(|(graph, bounds)| {
                (0..bounds[1] - bounds[0]).map(move |field| FieldId { graph, field })
            })
    }

    fn index(&self, id: FieldId) -> Option<usize> {
        let start = *self.offsets.get(id.graph)?;
        let end = *self.offsets.get(id.graph + 1)?;
        let index = start + id.field;
        (index < end).then_some(index)
    }

    fn lock(slot: &Mutex<Series>) -> MutexGuard<'_, Series> {
        // A series is never left half-updated, recover from a poisoned lock.
        slot.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Record one observation of a field. `None` records a gap.
    ///
    /// Gauges store the raw value. Counters store the per-second rate since
    /// the previous observation, see the module documentation.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnknownField`] if `id` does not name a field of this
    /// store.
    pub fn append(&self, id: FieldId, raw: Sample, at: Instant) -> Result<(), Error> {
        let index = self.index(id).ok_or(Error::UnknownField {
            graph: id.graph,
            field: id.field,
        })?;
        Self::lock(&self.series[index]).record(raw, at);
        Ok(())
    }

    /// Copy out every series, oldest sample first.
    #[must_use]
    pub fn snapshot(&self) -> Snapshot {
        Snapshot {
            steps: self.steps(),
            offsets: self.offsets.clone(),
            series: self
                .series
                .iter()
                .map(|slot| Self::lock(slot).chronological())
                .collect(),
        }
    }
}

/// An owned, point-in-time copy of a [`Store`].
#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot {
    steps: usize,
    offsets: Vec<usize>,
    series: Vec<Vec<Sample>>,
}

impl Snapshot {
    /// Number of samples in every series.
    #[must_use]
    pub fn steps(&self) -> usize {
        self.steps
    }

    /// Number of graphs covered.
    #[must_use]
    pub fn graphs(&self) -> usize {
        self.offsets.len().saturating_sub(1)
    }

    /// Samples of one field, oldest first.
    #[must_use]
    pub fn get(&self, id: FieldId) -> Option<&[Sample]> {
        let start = *self.offsets.get(id.graph)?;
        let end = *self.offsets.get(id.graph + 1)?;
        let index = start + id.field;
        if index >= end {
            return None;
        }
        self.series.get(index).map(Vec::as_slice)
    }

    /// Samples of every field of one graph, in field order.
    #[must_use]
    pub fn graph(&self, graph: usize) -> Option<&[Vec<Sample>]> {
        let start = *self.offsets.get(graph)?;
        let end = *self.offsets.get(graph + 1)?;
        self.series.get(start..end)
    }
}

#[cfg(test)]
mod tests {
    use std::{sync::Arc, thread, time::Duration};

    use proptest::prelude::*;

    use super::*;
    use crate::spec::compile;

    const GAUGE: FieldId = FieldId { graph: 0, field: 0 };
    const COUNTER: FieldId = FieldId { graph: 0, field: 1 };

    fn steps(n: usize) -> NonZeroUsize {
        NonZeroUsize::new(n).expect("non-zero steps")
    }

    fn store(n: usize) -> Store {
        let graphs = compile(&["G g=value,c=total:rate", "H h=other"]).expect("spec");
        Store::new(&graphs, steps(n))
    }

    fn at(base: Instant, secs: u64) -> Instant {
        base + Duration::from_secs(secs)
    }

    #[test]
    fn counter_first_sample_is_gap_then_rate() {
        let store = store(4);
        let t0 = Instant::now();

        store.append(COUNTER, Some(100.0), at(t0, 0)).expect("append");
        store.append(COUNTER, Some(110.0), at(t0, 10)).expect("append");

        let snapshot = store.snapshot();
        assert_eq!(
            snapshot.get(COUNTER).expect("field"),
            &[None, None, None, Some(1.0)]
        );
    }

    #[test]
    fn counter_reset_is_gap_and_rebases() {
        let store = store(4);
        let t0 = Instant::now();

        store.append(COUNTER, Some(100.0), at(t0, 0)).expect("append");
        store.append(COUNTER, Some(110.0), at(t0, 10)).expect("append");
        store.append(COUNTER, Some(90.0), at(t0, 11)).expect("append");
        store.append(COUNTER, Some(95.0), at(t0, 12)).expect("append");

        assert_eq!(
            store.snapshot().get(COUNTER).expect("field"),
            &[None, Some(1.0), None, Some(5.0)]
        );
    }

    #[test]
    fn counter_missing_sample_keeps_baseline() {
        let store = store(3);
        let t0 = Instant::now();

        store.append(COUNTER, Some(0.0), at(t0, 0)).expect("append");
        store.append(COUNTER, None, at(t0, 1)).expect("append");
        store.append(COUNTER, Some(20.0), at(t0, 2)).expect("append");

        assert_eq!(
            store.snapshot().get(COUNTER).expect("field"),
            &[None, None, Some(10.0)]
        );
    }

    #[test]
    fn counter_without_elapsed_time_is_gap() {
        let store = store(2);
        let t0 = Instant::now();

        store.append(COUNTER, Some(1.0), t0).expect("append");
        store.append(COUNTER, Some(2.0), t0).expect("append");

        assert_eq!(store.snapshot().get(COUNTER).expect("field"), &[None, None]);
    }

    #[test]
    fn non_finite_gauge_is_gap() {
        let store = store(2);
        let t0 = Instant::now();

        store.append(GAUGE, Some(f64::NAN), t0).expect("append");
        store.append(GAUGE, Some(f64::INFINITY), t0).expect("append");

        assert_eq!(store.snapshot().get(GAUGE).expect("field"), &[None, None]);
    }

    #[test]
    fn unknown_field_is_rejected() {
        let store = store(2);
        let t0 = Instant::now();

        assert_eq!(
            store.append(FieldId { graph: 1, field: 1 }, Some(1.0), t0),
            Err(Error::UnknownField { graph: 1, field: 1 })
        );
        assert_eq!(
            store.append(FieldId { graph: 7, field: 0 }, Some(1.0), t0),
            Err(Error::UnknownField { graph: 7, field: 0 })
        );
    }

    #[test]
    fn fields_cover_every_graph() {
        let store = store(1);
        let ids: Vec<_> = store.fields().collect();
        assert_eq!(
            ids,
            vec![
                FieldId { graph: 0, field: 0 },
                FieldId { graph: 0, field: 1 },
                FieldId { graph: 1, field: 0 },
            ]
        );

        let snapshot = store.snapshot();
        assert_eq!(snapshot.graphs(), 2);
        assert_eq!(snapshot.graph(0).map(<[_]>::len), Some(2));
        assert_eq!(snapshot.graph(1).map(<[_]>::len), Some(1));
        assert!(snapshot.graph(2).is_none());
    }

    proptest! {
        #[test]
        fn gauge_keeps_last_n_in_order(
            n in 1usize..12,
            samples in prop::collection::vec(prop::option::of(-1e6f64..1e6f64), 0..40),
        ) {
            let store = store(n);
            let t0 = Instant::now();
            for sample in &samples {
                store.append(GAUGE, *sample, t0).expect("append");
            }

            let kept = samples.len().min(n);
            let mut expected = vec![None; n - kept];
            expected.extend_from_slice(&samples[samples.len() - kept..]);

            let snapshot = store.snapshot();
            prop_assert_eq!(snapshot.steps(), n);
            prop_assert_eq!(snapshot.get(GAUGE).expect("field"), expected.as_slice());
            // Untouched fields stay gaps.
            prop_assert!(snapshot.get(COUNTER).expect("field").iter().all(Option::is_none));
        }

        #[test]
        fn counter_rates_are_never_negative(
            values in prop::collection::vec(0.0f64..1e6f64, 1..30),
        ) {
            let store = store(32);
            let t0 = Instant::now();
            for (secs, value) in values.iter().enumerate() {
                store.append(COUNTER, Some(*value), at(t0, secs as u64)).expect("append");
            }

            let snapshot = store.snapshot();
            let rates = snapshot.get(COUNTER).expect("field");
            prop_assert_eq!(rates.len(), 32);
            prop_assert!(rates.iter().flatten().all(|r| *r >= 0.0));

            // Consecutive samples one second apart: rate equals the delta.
            let recorded = &rates[32 - values.len()..];
            prop_assert!(recorded[0].is_none());
            for (pair, rate) in values.windows(2).zip(&recorded[1..]) {
                let delta = pair[1] - pair[0];
                if delta < 0.0 {
                    prop_assert!(rate.is_none());
                } else {
                    prop_assert_eq!(*rate, Some(delta));
                }
            }
        }
    }

    #[test]
    fn concurrent_append_and_snapshot_never_tear() {
        const N: usize = 16;
        const WRITES: u32 = 20_000;

        let store = Arc::new(store(N));
        let t0 = Instant::now();

        let writer = {
            let store = Arc::clone(&store);
            thread::spawn(move || {
                for i in 0..WRITES {
                    store
                        .append(GAUGE, Some(f64::from(i)), t0)
                        .expect("append");
                }
            })
        };

        let readers: Vec<_> = (0..4)
            .map(|_| {
                let store = Arc::clone(&store);
                thread::spawn(move || {
                    for _ in 0..2_000 {
                        let snapshot = store.snapshot();
                        let samples = snapshot.get(GAUGE).expect("field");
                        assert_eq!(samples.len(), N);

                        // One writer writing increasing integers: any
                        // consistent copy is a gap prefix followed by a run of
                        // consecutive integers.
                        let values: Vec<f64> = samples.iter().flatten().copied().collect();
                        assert_eq!(values.len() + samples.iter().filter(|s| s.is_none()).count(), N);
                        assert!(samples.iter().skip_while(|s| s.is_none()).all(Option::is_some));
                        for pair in values.windows(2) {
                            assert!((pair[1] - pair[0] - 1.0).abs() < f64::EPSILON);
                        }
                    }
                })
            })
            .collect();

        writer.join().expect("writer panicked");
        for reader in readers {
            reader.join().expect("reader panicked");
        }

        let last = store.snapshot();
        let expected: Vec<Sample> = (WRITES - N as u32..WRITES)
            .map(|i| Some(f64::from(i)))
            .collect();
        assert_eq!(last.get(GAUGE).expect("field"), expected.as_slice());
    }
}
