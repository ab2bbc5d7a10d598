//! Progress reporting module for scan operations
//!
//! `ProgressReporter` is a `ScanSink` that writes one JSON object per line
//! for each start, batch and finish event of the current scan.

use serde::Serialize;
use std::io::Write;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use crate::coordinator::ScanSink;
use crate::models::{ImageRecord, ScanRequest};

/// Start message sent when a scan begins
#[derive(Debug, Clone, Serialize)]
pub struct StartMessage {
    /// Message type identifier
    #[serde(rename = "_t")]
    pub msg_type: &'static str,
    /// Sequence number
    pub seq: u64,
    /// Timestamp in milliseconds since reporter creation
    pub ts: u64,
    /// Scan identifier
    pub scan_id: u64,
    /// Scanned directory
    pub dir: String,
    /// Whether recursive scanning is enabled
    pub recursive: bool,
}

impl StartMessage {
    pub fn new(seq: u64, ts: u64, request: &ScanRequest) -> Self {
        Self {
            msg_type: "start",
            seq,
            ts,
            scan_id: request.scan_id,
            dir: request.directory.to_string_lossy().to_string(),
            recursive: request.recursive,
        }
    }
}

/// Batch message sent for every forwarded batch
#[derive(Debug, Clone, Serialize)]
pub struct BatchMessage<'a> {
    /// Message type identifier ("b" for batch)
    #[serde(rename = "_t")]
    pub msg_type: &'static str,
    pub seq: u64,
    pub ts: u64,
    pub scan_id: u64,
    /// Records in this batch
    #[serde(rename = "n")]
    pub count: usize,
    /// Records received so far in this scan
    #[serde(rename = "total")]
    pub total: u64,
    /// The records themselves, when enabled
    #[serde(skip_serializing_if = "Option::is_none")]
    pub items: Option<&'a [ImageRecord]>,
}

/// Done message sent when a scan finishes
#[derive(Debug, Clone, Serialize)]
pub struct DoneMessage {
    /// Message type identifier ("done" for completion)
    #[serde(rename = "_t")]
    pub msg_type: &'static str,
    pub seq: u64,
    pub ts: u64,
    pub scan_id: u64,
    /// Total number of images in the scan
    #[serde(rename = "tf")]
    pub total_files: usize,
    /// Milliseconds since the scan started
    pub ms: u64,
}

/// Progress reporter writing JSON lines to stderr or any writer
pub struct ProgressReporter<W: Write = std::io::Stderr> {
    /// Whether progress reporting is enabled
    enabled: bool,
    /// Include full records in batch messages
    include_items: bool,
    /// Sequence number for messages
    seq: AtomicU64,
    /// Start time of the reporter
    start_time: Instant,
    /// Start time of the current scan
    scan_start: Instant,
    /// Records received in the current scan
    received: u64,
    out: W,
}

impl ProgressReporter<std::io::Stderr> {
    /// Create a reporter writing to stderr
    pub fn new(enabled: bool, include_items: bool) -> Self {
        Self::with_writer(std::io::stderr(), enabled, include_items)
    }
}

impl<W: Write> ProgressReporter<W> {
    pub fn with_writer(out: W, enabled: bool, include_items: bool) -> Self {
        let now = Instant::now();
        Self {
            enabled,
            include_items,
            seq: AtomicU64::new(0),
            start_time: now,
            scan_start: now,
            received: 0,
            out,
        }
    }

    /// Get the next sequence number (monotonically increasing)
    pub fn next_seq(&self) -> u64 {
        self.seq.fetch_add(1, Ordering::SeqCst)
    }

    /// Get the current timestamp in milliseconds since reporter creation
    pub fn current_timestamp(&self) -> u64 {
        self.start_time.elapsed().as_millis() as u64
    }

    /// Write a serializable message as one JSON line
    pub fn output<T: Serialize>(&mut self, msg: &T) {
        if let Ok(json) = serde_json::to_string(msg) {
            writeln!(self.out, "{}", json).ok();
            self.out.flush().ok();
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Records received in the current scan
    pub fn received(&self) -> u64 {
        self.received
    }

    pub fn into_inner(self) -> W {
        self.out
    }
}

impl<W: Write> ScanSink for ProgressReporter<W> {
    fn on_started(&mut self, request: &ScanRequest) {
        self.scan_start = Instant::now();
        self.received = 0;
        if !self.enabled {
            return;
        }
        let msg = StartMessage::new(self.next_seq(), self.current_timestamp(), request);
        self.output(&msg);
    }

    fn on_batch(&mut self, records: &[ImageRecord], scan_id: u64) {
        self.received += records.len() as u64;
        if !self.enabled {
            return;
        }
        let msg = BatchMessage {
            msg_type: "b",
            seq: self.next_seq(),
            ts: self.current_timestamp(),
            scan_id,
            count: records.len(),
            total: self.received,
            items: self.include_items.then_some(records),
        };
        self.output(&msg);
    }

    fn on_finished(&mut self, records: &[ImageRecord], scan_id: u64) {
        if !self.enabled {
            return;
        }
        let msg = DoneMessage {
            msg_type: "done",
            seq: self.next_seq(),
            ts: self.current_timestamp(),
            scan_id,
            total_files: records.len(),
            ms: self.scan_start.elapsed().as_millis() as u64,
        };
        self.output(&msg);
    }
}
