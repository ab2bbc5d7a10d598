//! Incremental image directory scanner with a persistent dimension cache
//!
//! A `ScanCoordinator` launches cancelable `ScanTask`s on a small worker
//! pool. Each task walks a directory, resolves image dimensions from the
//! `MetadataStore` or by decoding the file, and streams growing batches
//! back to the coordinator, which forwards only the latest scan's events.

pub mod config;
pub mod coordinator;
pub mod db;
pub mod error;
pub mod history;
pub mod models;
pub mod probe;
pub mod progress;
pub mod scanner;

pub use config::ScanConfig;
pub use coordinator::{ScanCoordinator, ScanSink};
pub use db::MetadataStore;
pub use error::{ScanError, ScanErrorKind};
pub use history::ScanHistory;
pub use models::{
    CachedMetadata, ImageRecord, RecordFilter, ScanEvent, ScanReport, ScanRequest, ScanStats,
    SizeClass, SortMode, TaskState,
};
pub use probe::{DimensionProbe, ImageProbe};
pub use progress::{BatchMessage, DoneMessage, ProgressReporter, StartMessage};
pub use scanner::{BatchSizer, ScanTask, TaskControl};
