//! Summary statistics over a corpus.

use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;

use crate::properties::AnomalyMarker;
use crate::{Event, EventKind};

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CorpusStats {
    pub total: usize,
    pub by_kind: BTreeMap<EventKind, usize>,
    pub by_marker: BTreeMap<AnomalyMarker, usize>,
    pub anomalies: usize,
}

impl CorpusStats {
    pub fn from_events(events: &[Event]) -> Self {
        let mut stats = CorpusStats {
            total: events.len(),
            ..Default::default()
        };
        for event in events {
            *stats.by_kind.entry(event.kind()).or_default() += 1;
            if let Some(marker) = event.anomaly_marker() {
                *stats.by_marker.entry(marker).or_default() += 1;
                stats.anomalies += 1;
            }
        }
        stats
    }

    /// Percentage of anomaly-marked events.
    pub fn anomaly_percent(&self) -> f64 {
        if self.total == 0 {
            return 0.0;
        }
        self.anomalies as f64 / self.total as f64 * 100.0
    }

    /// Kinds ordered by count (descending), ties by name.
    pub fn kinds_by_count(&self) -> Vec<(EventKind, usize)> {
        let mut kinds: Vec<_> = self.by_kind.iter().map(|(k, n)| (*k, *n)).collect();
        kinds.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.as_str().cmp(b.0.as_str())));
        kinds
    }
}

impl fmt::Display for CorpusStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Total events: {}", self.total)?;
        writeln!(f)?;
        writeln!(f, "Events by type:")?;
        for (kind, count) in self.kinds_by_count() {
            writeln!(f, "  {kind}: {count}")?;
        }
        writeln!(f)?;
        writeln!(f, "Detectable anomaly events: {}", self.anomalies)?;
        for (marker, count) in &self.by_marker {
            writeln!(f, "  {marker}: {count}")?;
        }
        write!(f, "Anomaly ratio: {:.2}%", self.anomaly_percent())
    }
}
