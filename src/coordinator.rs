//! Scan coordinator - owns the single current scan and routes its events
//!
//! The coordinator lives on the control thread. Tasks run on a small worker
//! pool and report back over a channel; events whose scan id is not the
//! latest one are dropped, which makes rapid re-triggering safe without
//! trying to guarantee silence from aborted tasks.

use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError, Sender};
use log::{debug, info, trace};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::config::ScanConfig;
use crate::db::MetadataStore;
use crate::error::{ScanError, ScanErrorKind};
use crate::history::ScanHistory;
use crate::models::{normalize_path, ImageRecord, ScanEvent, ScanRequest, ScanStats, TaskState};
use crate::probe::{DimensionProbe, ImageProbe};
use crate::scanner::{ScanTask, TaskControl};

/// Consumer of the current scan's results
pub trait ScanSink {
    /// A new scan was launched; previous results are obsolete
    fn on_started(&mut self, _request: &ScanRequest) {}

    /// Records resolved since the previous batch of the same scan
    fn on_batch(&mut self, records: &[ImageRecord], scan_id: u64);

    /// Every record of the scan, once it has finished or been aborted
    fn on_finished(&mut self, records: &[ImageRecord], scan_id: u64);
}

struct ActiveScan {
    scan_id: u64,
    control: Arc<TaskControl>,
}

pub struct ScanCoordinator<S: ScanSink> {
    config: Arc<ScanConfig>,
    store: Arc<MetadataStore>,
    probe: Arc<dyn DimensionProbe>,
    pool: rayon::ThreadPool,
    events_tx: Sender<ScanEvent>,
    events_rx: Receiver<ScanEvent>,
    sink: S,
    scan_id: u64,
    active: Option<ActiveScan>,
    last_request: Option<ScanRequest>,
    records: Vec<ImageRecord>,
    last_stats: Option<ScanStats>,
    last_state: Option<TaskState>,
    history: ScanHistory,
}

impl<S: ScanSink> ScanCoordinator<S> {
    pub fn new(config: ScanConfig, store: Arc<MetadataStore>, sink: S) -> Result<Self, ScanError> {
        Self::with_probe(config, store, Arc::new(ImageProbe), sink)
    }

    /// Create a coordinator with a custom dimension probe
    pub fn with_probe(
        config: ScanConfig,
        store: Arc<MetadataStore>,
        probe: Arc<dyn DimensionProbe>,
        sink: S,
    ) -> Result<Self, ScanError> {
        config.validate()?;
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(config.num_threads)
            .thread_name(|i| format!("scan-worker-{}", i))
            .build()
            .map_err(|e| ScanError::new(ScanErrorKind::Unknown, None, e.to_string()))?;
        let (events_tx, events_rx) = unbounded();
        let history = ScanHistory::new(config.history_limit);

        Ok(Self {
            config: Arc::new(config),
            store,
            probe,
            pool,
            events_tx,
            events_rx,
            sink,
            scan_id: 0,
            active: None,
            last_request: None,
            records: Vec::new(),
            last_stats: None,
            last_state: None,
            history,
        })
    }

    /// Launch a scan of `directory`, superseding any running scan
    ///
    /// Returns the new scan id immediately.
    pub fn start_scan(&mut self, directory: impl AsRef<Path>, recursive: bool) -> u64 {
        self.supersede_active();

        self.scan_id += 1;
        let request = ScanRequest::new(self.scan_id, directory.as_ref(), recursive);
        let task = ScanTask::new(
            request.clone(),
            Arc::clone(&self.config),
            Arc::clone(&self.store),
            Arc::clone(&self.probe),
            self.events_tx.clone(),
        );

        self.active = Some(ActiveScan {
            scan_id: self.scan_id,
            control: task.control(),
        });
        self.records.clear();
        self.last_stats = None;
        self.last_state = None;

        info!(
            "Starting scan {} of {}{}",
            self.scan_id,
            request.directory.display(),
            if recursive { " (recursive)" } else { "" }
        );
        self.sink.on_started(&request);
        self.last_request = Some(request);

        self.pool.spawn(move || {
            task.run();
        });
        self.scan_id
    }

    /// Rescan the last requested directory with the same recursion flag
    pub fn refresh(&mut self) -> Option<u64> {
        let request = self.last_request.clone()?;
        Some(self.start_scan(&request.directory, request.recursive))
    }

    /// Ask the running task to stop
    ///
    /// Waits at most the configured grace period; the task's finished event
    /// still arrives through the queue and clears the running state.
    pub fn abort_current(&mut self) {
        if let Some(active) = &self.active {
            active.control.abort();
            if !active.control.wait_until_finished(self.abort_grace()) {
                debug!("Scan {} still unwinding after abort", active.scan_id);
            }
        }
    }

    fn supersede_active(&mut self) {
        if let Some(active) = self.active.take() {
            active.control.abort();
            if !active.control.wait_until_finished(self.abort_grace()) {
                debug!("Superseded scan {} still unwinding", active.scan_id);
            }
        }
    }

    fn abort_grace(&self) -> Duration {
        Duration::from_millis(self.config.abort_grace_ms)
    }

    /// Handle every queued event without blocking
    ///
    /// Returns the number of events forwarded to the sink.
    pub fn process_pending(&mut self) -> usize {
        let mut forwarded = 0;
        while let Ok(event) = self.events_rx.try_recv() {
            if self.dispatch(event) {
                forwarded += 1;
            }
        }
        forwarded
    }

    /// Block until the current scan's finished event has been handled
    ///
    /// Returns false if `timeout` elapsed first.
    pub fn wait_for_current(&mut self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        while self.is_scanning() {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match self.events_rx.recv_timeout(remaining) {
                Ok(event) => {
                    self.dispatch(event);
                }
                Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => {
                    return false;
                }
            }
        }
        true
    }

    fn dispatch(&mut self, event: ScanEvent) -> bool {
        let scan_id = event.scan_id();
        if scan_id != self.scan_id {
            trace!("Discarding event from stale scan {} (current {})", scan_id, self.scan_id);
            return false;
        }

        match event {
            ScanEvent::Batch { records, .. } => {
                self.records.extend(records.iter().cloned());
                self.sink.on_batch(&records, scan_id);
            }
            ScanEvent::Finished {
                records,
                state,
                stats,
                ..
            } => {
                if self.active.as_ref().map(|a| a.scan_id) == Some(scan_id) {
                    self.active = None;
                }
                if state == TaskState::Completed && !records.is_empty() {
                    if let Some(request) = &self.last_request {
                        self.history
                            .record(&PathBuf::from(normalize_path(&request.directory)));
                    }
                }
                self.sink.on_finished(&records, scan_id);
                self.records = records;
                self.last_stats = Some(stats);
                self.last_state = Some(state);
            }
        }
        true
    }

    /// Id of the most recently started scan, 0 before the first scan
    pub fn current_scan_id(&self) -> u64 {
        self.scan_id
    }

    pub fn is_scanning(&self) -> bool {
        self.active.is_some()
    }

    /// Records of the current scan received so far
    pub fn records(&self) -> &[ImageRecord] {
        &self.records
    }

    pub fn image_count(&self) -> usize {
        self.records.len()
    }

    pub fn current_request(&self) -> Option<&ScanRequest> {
        self.last_request.as_ref()
    }

    pub fn current_directory(&self) -> Option<&Path> {
        self.last_request.as_ref().map(|r| r.directory.as_path())
    }

    /// Statistics of the current scan once it has finished
    pub fn last_stats(&self) -> Option<&ScanStats> {
        self.last_stats.as_ref()
    }

    /// Terminal state of the current scan once it has finished
    pub fn last_state(&self) -> Option<TaskState> {
        self.last_state
    }

    pub fn history(&self) -> &ScanHistory {
        &self.history
    }

    pub fn history_mut(&mut self) -> &mut ScanHistory {
        &mut self.history
    }

    pub fn store(&self) -> &Arc<MetadataStore> {
        &self.store
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    pub fn sink_mut(&mut self) -> &mut S {
        &mut self.sink
    }
}

impl<S: ScanSink> Drop for ScanCoordinator<S> {
    fn drop(&mut self) {
        if let Some(active) = &self.active {
            active.control.abort();
        }
    }
}
