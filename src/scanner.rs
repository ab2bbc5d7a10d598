//! Scan task - walks one directory and streams resolved image records

use crossbeam_channel::Sender;
use log::{debug, error, info, trace};
use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};
use walkdir::WalkDir;

use crate::config::ScanConfig;
use crate::db::MetadataStore;
use crate::error::ScanError;
use crate::models::{
    mtime_secs, normalize_path, CachedMetadata, ImageRecord, ScanEvent, ScanRequest, ScanStats,
    TaskState,
};
use crate::probe::DimensionProbe;

/// Batch size ramp: small first batches for latency, larger ones for throughput
#[derive(Debug, Clone)]
pub struct BatchSizer {
    current: usize,
    max: usize,
    step: usize,
}

impl BatchSizer {
    pub fn new(initial: usize, max: usize, step: usize) -> Self {
        let max = max.max(1);
        Self {
            current: initial.clamp(1, max),
            max,
            step,
        }
    }

    pub fn from_config(config: &ScanConfig) -> Self {
        Self::new(
            config.initial_batch_size,
            config.max_batch_size,
            config.batch_size_step,
        )
    }

    /// Threshold for the batch being filled
    pub fn current(&self) -> usize {
        self.current
    }

    /// Advance the ramp after a batch was emitted
    pub fn grow(&mut self) {
        self.current = self.current.saturating_add(self.step).min(self.max);
    }
}

/// Abort flag and lifecycle state shared between a task and its owner
#[derive(Debug, Default)]
pub struct TaskControl {
    abort: AtomicBool,
    state: Mutex<TaskState>,
    changed: Condvar,
}

impl TaskControl {
    pub fn new() -> Self {
        Self::default()
    }

    /// Ask the task to stop at its next check
    pub fn abort(&self) {
        self.abort.store(true, Ordering::Relaxed);
    }

    pub fn is_aborted(&self) -> bool {
        self.abort.load(Ordering::Relaxed)
    }

    pub fn state(&self) -> TaskState {
        self.state.lock().map(|s| *s).unwrap_or(TaskState::Completed)
    }

    fn set_state(&self, state: TaskState) {
        if let Ok(mut guard) = self.state.lock() {
            *guard = state;
        }
        self.changed.notify_all();
    }

    /// Block until the task reaches a terminal state or `timeout` elapses
    ///
    /// Returns true if the task finished in time.
    pub fn wait_until_finished(&self, timeout: Duration) -> bool {
        let Ok(guard) = self.state.lock() else {
            return false;
        };
        match self
            .changed
            .wait_timeout_while(guard, timeout, |state| !state.is_terminal())
        {
            Ok((state, _)) => state.is_terminal(),
            Err(_) => false,
        }
    }
}

/// One unit of scan work
pub struct ScanTask {
    request: ScanRequest,
    config: Arc<ScanConfig>,
    store: Arc<MetadataStore>,
    probe: Arc<dyn DimensionProbe>,
    events: Sender<ScanEvent>,
    control: Arc<TaskControl>,
}

impl ScanTask {
    pub fn new(
        request: ScanRequest,
        config: Arc<ScanConfig>,
        store: Arc<MetadataStore>,
        probe: Arc<dyn DimensionProbe>,
        events: Sender<ScanEvent>,
    ) -> Self {
        Self {
            request,
            config,
            store,
            probe,
            events,
            control: Arc::new(TaskControl::new()),
        }
    }

    pub fn request(&self) -> &ScanRequest {
        &self.request
    }

    /// Handle used to abort and observe the task
    pub fn control(&self) -> Arc<TaskControl> {
        Arc::clone(&self.control)
    }

    /// Run the scan to completion or abort
    ///
    /// Always emits exactly one finished event, even when the walk fails.
    pub fn run(self) -> TaskState {
        let scan_id = self.request.scan_id;
        self.control.set_state(TaskState::Running);
        let start = Instant::now();

        let outcome = panic::catch_unwind(AssertUnwindSafe(|| self.scan()));
        let (records, state, mut stats) = match outcome {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => {
                error!("Scan {} of {:?} failed: {}", scan_id, self.request.directory, e);
                (Vec::new(), TaskState::Completed, ScanStats::default())
            }
            Err(_) => {
                error!("Scan {} of {:?} panicked", scan_id, self.request.directory);
                (Vec::new(), TaskState::Completed, ScanStats::default())
            }
        };
        stats.duration_ms = start.elapsed().as_millis() as u64;

        info!(
            "Scan {} {}: {} images ({} cached, {} decoded, {} skipped) in {}ms",
            scan_id,
            state.as_str(),
            records.len(),
            stats.cache_hits,
            stats.cache_misses,
            stats.skipped,
            stats.duration_ms
        );

        if self
            .events
            .send(ScanEvent::Finished {
                scan_id,
                records,
                state,
                stats,
            })
            .is_err()
        {
            debug!("Scan {} finished after its receiver was dropped", scan_id);
        }
        self.control.set_state(state);
        state
    }

    fn scan(&self) -> Result<(Vec<ImageRecord>, TaskState, ScanStats), ScanError> {
        let root = PathBuf::from(normalize_path(&self.request.directory));
        if !root.is_dir() {
            debug!("Scan root {:?} is not a directory", root);
            return Ok((Vec::new(), TaskState::Completed, ScanStats::default()));
        }
        std::fs::read_dir(&root).map_err(|e| ScanError::from(e).with_path(&root))?;

        let mut walk = Walk::new(self);
        let mut pending: Option<(PathBuf, Vec<PathBuf>)> = None;
        for entry in self.entries(&root) {
            if self.control.is_aborted() {
                break;
            }
            match entry {
                WalkItem::Directory(dir) => {
                    if let Some((done, files)) = pending.replace((dir, Vec::new())) {
                        walk.process_directory(&done, files);
                    }
                }
                WalkItem::File(path) => {
                    if let Some((_, files)) = pending.as_mut() {
                        files.push(path);
                    }
                }
            }
        }
        if let Some((dir, files)) = pending {
            if !self.control.is_aborted() {
                walk.process_directory(&dir, files);
            }
        }
        Ok(walk.finish())
    }

    /// Single pre-order walk yielding each directory followed by its image files
    ///
    /// Siblings are sorted files first, so a directory's files are contiguous
    /// and come before any of its subdirectories.
    fn entries<'a>(&'a self, root: &Path) -> impl Iterator<Item = WalkItem> + 'a {
        let config = &self.config;
        let dir_depth = config.effective_max_depth(self.request.recursive);
        WalkDir::new(root)
            .max_depth(dir_depth.saturating_add(1))
            .follow_links(config.follow_links)
            .sort_by(|a, b| {
                a.file_type()
                    .is_dir()
                    .cmp(&b.file_type().is_dir())
                    .then_with(|| a.file_name().cmp(b.file_name()))
            })
            .into_iter()
            .filter_entry(move |entry| {
                entry.depth() == 0
                    || !entry.file_type().is_dir()
                    || entry
                        .file_name()
                        .to_str()
                        .map(|name| !config.should_ignore_dir(name))
                        .unwrap_or(true)
            })
            .filter_map(move |entry| match entry {
                Ok(entry) if entry.depth() == 0 || entry.file_type().is_dir() => {
                    (entry.depth() <= dir_depth).then(|| WalkItem::Directory(entry.into_path()))
                }
                Ok(entry) if entry.depth() > 0 && config.is_image_path(entry.path()) => {
                    Some(WalkItem::File(entry.into_path()))
                }
                Ok(_) => None,
                Err(e) => {
                    debug!("Skipping unreadable entry: {}", e);
                    None
                }
            })
    }

    fn emit(&self, records: Vec<ImageRecord>) {
        let scan_id = self.request.scan_id;
        if self.events.send(ScanEvent::Batch { scan_id, records }).is_err() {
            trace!("Scan {} batch dropped, receiver gone", scan_id);
        }
    }
}

/// Entry produced by the directory walk
enum WalkItem {
    Directory(PathBuf),
    File(PathBuf),
}

/// A candidate file after stat
struct Candidate {
    fs_path: PathBuf,
    key: String,
    size: u64,
    mtime: f64,
}

/// Mutable walk state owned by one running task
struct Walk<'a> {
    task: &'a ScanTask,
    accumulated: Vec<ImageRecord>,
    batch: Vec<ImageRecord>,
    unsaved: Vec<ImageRecord>,
    sizer: BatchSizer,
    stats: ScanStats,
}

impl<'a> Walk<'a> {
    fn new(task: &'a ScanTask) -> Self {
        Self {
            task,
            accumulated: Vec::new(),
            batch: Vec::new(),
            unsaved: Vec::new(),
            sizer: BatchSizer::from_config(&task.config),
            stats: ScanStats::default(),
        }
    }

    fn aborted(&self) -> bool {
        self.task.control.is_aborted()
    }

    fn process_directory(&mut self, dir: &Path, files: Vec<PathBuf>) {
        trace!("Processing {} image files in {:?}", files.len(), dir);
        if files.is_empty() {
            return;
        }
        self.stats.dirs += 1;

        let mut candidates = Vec::with_capacity(files.len());
        for path in files {
            if self.aborted() {
                return;
            }
            self.stats.files += 1;
            match std::fs::metadata(&path) {
                Ok(metadata) if metadata.is_file() => candidates.push(Candidate {
                    key: normalize_path(&path),
                    size: metadata.len(),
                    mtime: mtime_secs(&metadata),
                    fs_path: path,
                }),
                Ok(_) => self.stats.skipped += 1,
                Err(e) => {
                    trace!("Cannot stat {:?}: {}", path, e);
                    self.stats.skipped += 1;
                }
            }
        }

        let keys: Vec<String> = candidates.iter().map(|c| c.key.clone()).collect();
        let cached = self.task.store.get_batch(&keys);

        for candidate in candidates {
            if self.aborted() {
                return;
            }
            self.resolve(candidate, &cached);
        }
    }

    fn resolve(&mut self, candidate: Candidate, cached: &HashMap<String, CachedMetadata>) {
        let epsilon = self.task.config.mtime_epsilon;
        if let Some(entry) = cached.get(&candidate.key) {
            if entry.is_fresh(candidate.size, candidate.mtime, epsilon) {
                self.stats.cache_hits += 1;
                self.push(ImageRecord::new(
                    candidate.key,
                    entry.width,
                    entry.height,
                    candidate.size,
                    candidate.mtime,
                ));
                return;
            }
        }

        match self.task.probe.dimensions(&candidate.fs_path) {
            Ok((width, height)) => {
                self.stats.cache_misses += 1;
                let record = ImageRecord::new(
                    candidate.key,
                    width,
                    height,
                    candidate.size,
                    candidate.mtime,
                );
                self.unsaved.push(record.clone());
                if self.unsaved.len() >= self.task.config.flush_interval {
                    self.flush();
                }
                self.push(record);
            }
            Err(e) => {
                debug!("Skipping {:?}: {}", candidate.fs_path, e);
                self.stats.skipped += 1;
            }
        }
    }

    fn push(&mut self, record: ImageRecord) {
        self.accumulated.push(record.clone());
        self.batch.push(record);
        if self.batch.len() >= self.sizer.current() {
            self.task.emit(std::mem::take(&mut self.batch));
            self.sizer.grow();
        }
    }

    fn flush(&mut self) {
        if !self.unsaved.is_empty() {
            self.task.store.put_batch(&self.unsaved);
            self.unsaved.clear();
        }
    }

    fn finish(mut self) -> (Vec<ImageRecord>, TaskState, ScanStats) {
        if !self.batch.is_empty() {
            self.task.emit(std::mem::take(&mut self.batch));
        }
        self.flush();

        let state = if self.aborted() {
            TaskState::Aborted
        } else {
            TaskState::Completed
        };
        (self.accumulated, state, self.stats)
    }
}
