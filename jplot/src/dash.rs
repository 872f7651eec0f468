//! The dashboard: compiled graphs plus the store that feeds them.
//!
//! A [`Dash`] is cheap to clone and is shared between the sampler, which
//! writes into it, and the render scheduler, which reads snapshots out of it.

use std::{num::NonZeroUsize, sync::Arc, time::Instant};

use metrics::counter;
use serde_json::Value;
use tracing::{trace, warn};

use crate::{
    render::{self, Size},
    series::{FieldId, Snapshot, Store},
    spec::GraphSpec,
};

/// Compiled graphs and their series store.
#[derive(Debug, Clone)]
pub struct Dash {
    graphs: Arc<[GraphSpec]>,
    store: Arc<Store>,
}

impl Dash {
    /// Create a dashboard retaining `steps` samples for each field of
    /// `graphs`.
    #[must_use]
    pub fn new(graphs: Vec<GraphSpec>, steps: NonZeroUsize) -> Self {
        let store = Arc::new(Store::new(&graphs, steps));
        Self {
            graphs: graphs.into(),
            store,
        }
    }

    /// The compiled graphs, in display order.
    #[must_use]
    pub fn graphs(&self) -> &[GraphSpec] {
        &self.graphs
    }

    /// The series store backing this dashboard.
    #[must_use]
    pub fn store(&self) -> &Store {
        &self.store
    }

    /// Take a point-in-time copy of every series.
    #[must_use]
    pub fn snapshot(&self) -> Snapshot {
        self.store.snapshot()
    }

    /// Evaluate every field of every graph against `document` and record the
    /// results as observed at `at`.
    ///
    /// `None` means no document could be obtained for this sample. Every
    /// field then records a gap. A field whose path does not resolve to a
    /// number also records a gap without affecting the other fields.
    pub fn ingest(&self, document: Option<&Value>, at: Instant) {
        for (graph_idx, graph) in self.graphs.iter().enumerate() {
            for (field_idx, field) in graph.fields.iter().enumerate() {
                let value = document.and_then(|doc| field.path.extract(doc));
                if document.is_some() && value.is_none() {
                    trace!(path = %field.path, "path did not resolve to a number");
                    counter!("sampler.failures", "reason" => "path").increment(1);
                }

                let id = FieldId {
                    graph: graph_idx,
                    field: field_idx,
                };
                if let Err(err) = self.store.append(id, value, at) {
                    warn!("dropping sample: {err}");
                }
            }
        }
    }

    /// Render the current state of the dashboard.
    ///
    /// # Errors
    ///
    /// See [`render::render`].
    pub fn render(&self, size: Size) -> Result<Vec<u8>, render::Error> {
        render::render(&self.graphs, &self.snapshot(), size)
    }
}
