//! Structured event records and sinks.
//!
//! Every observable state transition in a run is reported as an
//! [`EventRecord`] pushed into an [`EventSink`]. The record layout is flat and
//! stringly-keyed on purpose: downstream consumers are log writers and
//! process-mining tools, not the engine itself.

use serde::{Deserialize, Serialize};

use crate::time::Minutes;

// ---- record vocabulary ----

/// What kind of object a record is about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ObjectKind {
    Product,
    Component,
}

impl ObjectKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ObjectKind::Product => "product",
            ObjectKind::Component => "component",
        }
    }
}

/// The activity a record belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Activity {
    /// Object lifecycle: creation.
    Object,
    /// System entry/exit and end-of-run bookkeeping.
    System,
    /// Buffer-zone entry/exit.
    Buffer,
    /// Handling an item into or out of a zone.
    Handling,
    /// Component inspection at a station.
    Inspection,
    /// A disassembly step.
    Disassembly,
    /// Vehicle movement and load/unload.
    Transport,
    /// Equipment failure and repair.
    Breakdown,
    /// Daily shift open/close.
    Shift,
    /// Periodic occupancy snapshot.
    Monitor,
}

impl Activity {
    pub fn as_str(self) -> &'static str {
        match self {
            Activity::Object => "object",
            Activity::System => "system",
            Activity::Buffer => "buffer",
            Activity::Handling => "handling",
            Activity::Inspection => "inspection",
            Activity::Disassembly => "disassembly",
            Activity::Transport => "transport",
            Activity::Breakdown => "breakdown",
            Activity::Shift => "shift",
            Activity::Monitor => "monitor",
        }
    }
}

/// Phase of the activity the record marks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivityState {
    Created,
    Entry,
    Exit,
    Start,
    End,
    Complete,
    Incomplete,
    Skipped,
    Missing,
    Load,
    Unload,
    Failed,
    Repaired,
    Open,
    Close,
    Level,
}

impl ActivityState {
    pub fn as_str(self) -> &'static str {
        match self {
            ActivityState::Created => "created",
            ActivityState::Entry => "entry",
            ActivityState::Exit => "exit",
            ActivityState::Start => "start",
            ActivityState::End => "end",
            ActivityState::Complete => "complete",
            ActivityState::Incomplete => "incomplete",
            ActivityState::Skipped => "skipped",
            ActivityState::Missing => "missing",
            ActivityState::Load => "load",
            ActivityState::Unload => "unload",
            ActivityState::Failed => "failed",
            ActivityState::Repaired => "repaired",
            ActivityState::Open => "open",
            ActivityState::Close => "close",
            ActivityState::Level => "level",
        }
    }
}

// ---- the record ----

/// One observable state transition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventRecord {
    pub timestamp: Minutes,
    /// Product case number the record belongs to; 0 for records not tied to a
    /// product (shift changes, monitor ticks, breakdowns).
    pub case_id: u64,
    /// Stable display name of the object ("p17", "p17/housing").
    pub object_id: String,
    pub object_kind: ObjectKind,
    pub activity: Activity,
    pub state: ActivityState,
    /// Element the record happened at ("station_2", "agv_0", "incoming").
    pub resource: String,
    /// Zone or lane within the element ("entry", "exit_next", "bench").
    pub location: String,
    /// Free-form detail: counts, census, durations.
    pub detail: String,
}

impl EventRecord {
    /// Canonical single-line rendering. Two runs are considered identical
    /// when their rendered logs are byte-identical.
    pub fn to_line(&self) -> String {
        format!(
            "{:.4};{};{};{};{};{};{};{};{}",
            self.timestamp,
            self.case_id,
            self.object_id,
            self.object_kind.as_str(),
            self.activity.as_str(),
            self.state.as_str(),
            self.resource,
            self.location,
            self.detail,
        )
    }
}

// ---- sinks ----

/// Receives every record the engine emits, in order.
pub trait EventSink {
    fn record(&mut self, rec: EventRecord);
}

/// Discards everything. For runs where only the end-state queries matter.
#[derive(Debug, Default)]
pub struct NullSink;

impl EventSink for NullSink {
    fn record(&mut self, _rec: EventRecord) {}
}

/// Keeps every record in memory. The default sink for tests and analysis.
#[derive(Debug, Default)]
pub struct MemorySink {
    pub records: Vec<EventRecord>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// The whole log as canonical lines, for determinism comparison.
    pub fn to_lines(&self) -> String {
        let mut out = String::new();
        for rec in &self.records {
            out.push_str(&rec.to_line());
            out.push('\n');
        }
        out
    }

    /// Records matching an activity/state pair.
    pub fn matching(&self, activity: Activity, state: ActivityState) -> Vec<&EventRecord> {
        self.records
            .iter()
            .filter(|r| r.activity == activity && r.state == state)
            .collect()
    }
}

impl EventSink for MemorySink {
    fn record(&mut self, rec: EventRecord) {
        self.records.push(rec);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> EventRecord {
        EventRecord {
            timestamp: 12.5,
            case_id: 3,
            object_id: "p3".into(),
            object_kind: ObjectKind::Product,
            activity: Activity::Buffer,
            state: ActivityState::Entry,
            resource: "station_1".into(),
            location: "entry".into(),
            detail: String::new(),
        }
    }

    #[test]
    fn line_rendering_is_stable() {
        assert_eq!(
            sample().to_line(),
            "12.5000;3;p3;product;buffer;entry;station_1;entry;"
        );
    }

    #[test]
    fn memory_sink_preserves_order() {
        let mut sink = MemorySink::new();
        let mut a = sample();
        a.timestamp = 1.0;
        let mut b = sample();
        b.timestamp = 2.0;
        sink.record(a);
        sink.record(b);
        assert_eq!(sink.len(), 2);
        assert!(sink.records[0].timestamp < sink.records[1].timestamp);
    }

    #[test]
    fn matching_filters_by_activity_and_state() {
        let mut sink = MemorySink::new();
        sink.record(sample());
        let mut other = sample();
        other.state = ActivityState::Exit;
        sink.record(other);
        assert_eq!(sink.matching(Activity::Buffer, ActivityState::Entry).len(), 1);
        assert_eq!(sink.matching(Activity::Buffer, ActivityState::Exit).len(), 1);
        assert!(sink.matching(Activity::Shift, ActivityState::Open).is_empty());
    }
}
