use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use tether_common::{EventFamily, EventKind};

use crate::domain::{ExportError, UnitId};
use crate::events::{EventRecord, Payload};
use crate::profiling::StackRecord;
use crate::symbolization::SymbolResolver;

/// Track that carries reclaimer and diagnostic events
const HOST_TID: u64 = 0;

/// Chrome Trace Event format
/// Spec: https://docs.google.com/document/d/1CvAClvFfyA5R-PhYUmn5OOQtYMH4h6I0nSsKchNAySU/preview
#[derive(Debug, Clone, Serialize, Deserialize)]
struct ChromeTraceEvent {
    name: String,
    /// Category for filtering/coloring
    cat: String,
    /// Phase: "B" = begin, "E" = end, "i" = instant, "C" = counter, "M" = metadata
    ph: String,
    /// Timestamp in microseconds
    ts: f64,
    pid: u32,
    /// Unit id, or 0 for host-wide events
    tid: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    args: Option<HashMap<String, JsonValue>>,
}

#[derive(Debug, Serialize)]
struct ChromeTrace {
    #[serde(rename = "traceEvents")]
    trace_events: Vec<ChromeTraceEvent>,
    #[serde(rename = "displayTimeUnit")]
    display_time_unit: String,
}

/// Builds a Chrome trace from recorded events and CPU samples
///
/// Every unit gets its own track: a slice runs from each start event to the
/// event that ends the poll (park, yield or completion). Reclaimer cycles are
/// slices on the host track; everything else becomes an instant event.
pub struct ChromeTraceExporter {
    pid: u32,
    events: Vec<ChromeTraceEvent>,
    /// Units with an open slice
    running: HashSet<UnitId>,
    labels: BTreeMap<u64, String>,
}

impl ChromeTraceExporter {
    #[must_use]
    pub fn new(pid: u32) -> Self {
        Self { pid, events: Vec::new(), running: HashSet::new(), labels: BTreeMap::new() }
    }

    fn push(
        &mut self,
        name: String,
        cat: &str,
        ph: &str,
        record: &EventRecord,
        tid: u64,
        args: Option<HashMap<String, JsonValue>>,
    ) {
        self.events.push(ChromeTraceEvent {
            name,
            cat: cat.to_string(),
            ph: ph.to_string(),
            ts: record.ts.as_micros_f64(),
            pid: self.pid,
            tid,
            args,
        });
    }

    /// Add one event record
    pub fn add_event(&mut self, record: &EventRecord) {
        let cat = match record.kind.family() {
            EventFamily::Scheduler => "scheduler",
            EventFamily::Reclaimer => "reclaimer",
            EventFamily::Diagnostic => "diagnostic",
        };

        match (record.kind, &record.payload) {
            (
                EventKind::TaskStart | EventKind::TaskStartLocal | EventKind::TaskStartLabel,
                payload,
            ) => {
                let Some(unit) = payload.unit() else { return };
                if let Payload::LabeledUnit { label, .. } = payload {
                    self.labels.insert(unit.as_u64(), label.to_string());
                }
                if self.running.insert(unit) {
                    let name = self
                        .labels
                        .get(&unit.as_u64())
                        .cloned()
                        .unwrap_or_else(|| "poll".to_string());
                    self.push(name, cat, "B", record, unit.as_u64(), None);
                }
            }
            (kind, Payload::Unit(unit)) if ends_poll(kind) => {
                if self.running.remove(unit) {
                    let args =
                        HashMap::from([("reason".to_string(), serde_json::json!(kind.name()))]);
                    self.push(String::new(), cat, "E", record, unit.as_u64(), Some(args));
                }
            }
            (EventKind::ReclaimStart, _) => {
                self.push("reclaim".to_string(), cat, "B", record, HOST_TID, None);
            }
            (EventKind::ReclaimDone, _) => {
                self.push("reclaim".to_string(), cat, "E", record, HOST_TID, None);
            }
            (kind, Payload::Counter(value)) => {
                let args = HashMap::from([("bytes".to_string(), serde_json::json!(value))]);
                self.push(kind.name().to_string(), cat, "C", record, HOST_TID, Some(args));
            }
            (kind, payload) => {
                let tid = payload.unit().map_or(HOST_TID, UnitId::as_u64);
                let args = payload_args(payload);
                self.push(kind.name().to_string(), cat, "i", record, tid, args);
            }
        }
    }

    /// Add CPU samples as instant events named after their leaf function
    pub fn add_cpu_samples(&mut self, samples: &[StackRecord], resolver: &SymbolResolver) {
        for sample in samples {
            let name = sample
                .leaf()
                .map_or_else(|| "unknown".to_string(), |addr| resolver.frame_name(addr));
            let mut args = HashMap::new();
            args.insert("depth".to_string(), serde_json::json!(sample.stack.len()));
            if let Some(worker) = sample.worker {
                args.insert("worker_id".to_string(), serde_json::json!(worker.0));
            }
            self.events.push(ChromeTraceEvent {
                name,
                cat: "cpu".to_string(),
                ph: "i".to_string(),
                ts: sample.ts.as_micros_f64(),
                pid: self.pid,
                tid: sample.unit.map_or(HOST_TID, UnitId::as_u64),
                args: Some(args),
            });
        }
    }

    /// Write the trace as JSON to any writer
    ///
    /// # Errors
    /// Returns an error if serialization or the writer fails
    pub fn export<W: Write>(&self, writer: W) -> Result<(), ExportError> {
        let mut all_events = self.events.clone();

        let mut tids: Vec<u64> = self.events.iter().map(|e| e.tid).collect();
        tids.sort_unstable();
        tids.dedup();
        for tid in tids {
            let name = match (tid, self.labels.get(&tid)) {
                (HOST_TID, _) => "host".to_string(),
                (_, Some(label)) => format!("Unit#{tid} ({label})"),
                (_, None) => format!("Unit#{tid}"),
            };
            all_events.push(ChromeTraceEvent {
                name: "thread_name".to_string(),
                cat: String::new(),
                ph: "M".to_string(),
                ts: 0.0,
                pid: self.pid,
                tid,
                args: Some(HashMap::from([("name".to_string(), serde_json::json!(name))])),
            });
        }

        let trace = ChromeTrace { trace_events: all_events, display_time_unit: "ms".to_string() };
        serde_json::to_writer_pretty(writer, &trace)?;
        Ok(())
    }

    /// Write the trace to `path`
    ///
    /// # Errors
    /// Returns an error if the file cannot be created or written
    pub fn write_to_file(&self, path: &Path) -> Result<(), ExportError> {
        let mut writer = BufWriter::new(File::create(path)?);
        self.export(&mut writer)?;
        writer.flush()?;
        Ok(())
    }

    /// Number of trace events collected, metadata excluded
    #[must_use]
    pub fn event_count(&self) -> usize {
        self.events.len()
    }
}

fn ends_poll(kind: EventKind) -> bool {
    matches!(
        kind,
        EventKind::TaskEnd
            | EventKind::TaskStop
            | EventKind::TaskSched
            | EventKind::TaskPreempt
            | EventKind::TaskSleep
            | EventKind::TaskSyscallBlock
    ) || kind.block_reason().is_some()
}

fn payload_args(payload: &Payload) -> Option<HashMap<String, JsonValue>> {
    let args: Vec<(&str, JsonValue)> = match payload {
        Payload::Bare | Payload::Unit(_) => return None,
        Payload::Worker(worker) => vec![("worker_id", serde_json::json!(worker.0))],
        Payload::LabeledUnit { label, .. } => vec![("label", serde_json::json!(label.as_ref()))],
        Payload::StwStart(kind) => vec![("kind", serde_json::json!(format!("{kind:?}")))],
        Payload::Sweep { swept, reclaimed } => {
            vec![("swept", serde_json::json!(swept)), ("reclaimed", serde_json::json!(reclaimed))]
        }
        Payload::Counter(value) => vec![("value", serde_json::json!(value))],
        Payload::Text(text) => vec![("text", serde_json::json!(text.as_ref()))],
        Payload::UserTaskCreate { task, parent, name } => vec![
            ("task", serde_json::json!(task.0)),
            ("parent", serde_json::json!(parent.0)),
            ("name", serde_json::json!(name.as_ref())),
        ],
        Payload::UserTaskEnd(task) => vec![("task", serde_json::json!(task.0))],
        Payload::UserRegion { task, mode, name } => vec![
            ("task", serde_json::json!(task.0)),
            ("mode", serde_json::json!(format!("{mode:?}"))),
            ("name", serde_json::json!(name.as_ref())),
        ],
        Payload::UserLog { task, key, value } => vec![
            ("task", serde_json::json!(task.0)),
            ("key", serde_json::json!(key.as_ref())),
            ("value", serde_json::json!(value.as_ref())),
        ],
    };
    Some(args.into_iter().map(|(k, v)| (k.to_string(), v)).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Timestamp;
    use tether_common::StwKind;

    fn unit(raw: u64) -> UnitId {
        UnitId::from_raw(raw).unwrap()
    }

    fn at(kind: EventKind, ts: u64, payload: Payload) -> EventRecord {
        EventRecord::new(kind, Timestamp(ts), payload)
    }

    fn export_json(exporter: &ChromeTraceExporter) -> serde_json::Value {
        let mut buffer = Vec::new();
        exporter.export(&mut buffer).unwrap();
        serde_json::from_slice(&buffer).unwrap()
    }

    #[test]
    fn test_poll_becomes_balanced_slice() {
        let mut exporter = ChromeTraceExporter::new(7);
        exporter.add_event(&at(EventKind::TaskStart, 1_000, Payload::Unit(unit(3))));
        // A second start without a park does not open another slice
        exporter.add_event(&at(EventKind::TaskStartLocal, 1_500, Payload::Unit(unit(3))));
        exporter.add_event(&at(EventKind::TaskBlockRecv, 2_000, Payload::Unit(unit(3))));
        exporter.add_event(&at(EventKind::TaskEnd, 3_000, Payload::Unit(unit(3))));
        assert_eq!(exporter.event_count(), 2);

        let json = export_json(&exporter);
        let events = json["traceEvents"].as_array().unwrap();
        let phases: Vec<&str> = events.iter().map(|e| e["ph"].as_str().unwrap()).collect();
        assert_eq!(phases, vec!["B", "E", "M"]);
        assert_eq!(events[1]["args"]["reason"], "task_block_recv");
        assert_eq!(events[2]["args"]["name"], "Unit#3");
    }

    #[test]
    fn test_reclaimer_events_on_host_track() {
        let mut exporter = ChromeTraceExporter::new(1);
        exporter.add_event(&EventRecord::new(EventKind::ReclaimStart, Timestamp(0), Payload::Bare));
        exporter.add_event(&EventRecord::new(
            EventKind::StwStart,
            Timestamp(10),
            Payload::StwStart(StwKind::MarkTermination),
        ));
        exporter.add_event(&EventRecord::new(EventKind::ReclaimDone, Timestamp(20), Payload::Bare));
        exporter.add_event(&at(EventKind::HeapSize, 30, Payload::Counter(4096)));

        let json = export_json(&exporter);
        let events = json["traceEvents"].as_array().unwrap();
        assert!(events.iter().all(|e| e["tid"] == 0));
        assert_eq!(events[1]["args"]["kind"], "MarkTermination");
        assert_eq!(events[3]["ph"], "C");
        assert_eq!(events[3]["args"]["bytes"], 4096);
        assert_eq!(json["displayTimeUnit"], "ms");
    }
}
