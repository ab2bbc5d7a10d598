//! Core data models for the gallery scanner

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::UNIX_EPOCH;

/// Dimension metadata for one image file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageRecord {
    /// Absolute, normalized file path
    pub path: String,
    /// Width after orientation correction
    #[serde(rename = "w")]
    pub width: u32,
    /// Height after orientation correction
    #[serde(rename = "h")]
    pub height: u32,
    /// File size in bytes when the record was created
    pub size: u64,
    /// Modification time in seconds since the Unix epoch
    pub mtime: f64,
}

impl ImageRecord {
    /// Create a new record
    pub fn new(path: impl Into<String>, width: u32, height: u32, size: u64, mtime: f64) -> Self {
        Self {
            path: path.into(),
            width,
            height,
            size,
            mtime,
        }
    }

    /// Check whether the record is fit to be stored
    pub fn is_valid(&self) -> bool {
        !self.path.is_empty()
            && self.width > 0
            && self.height > 0
            && self.mtime.is_finite()
            && self.mtime >= 0.0
    }

    /// File name component of the path
    pub fn file_name(&self) -> &str {
        self.path.rsplit('/').next().unwrap_or(&self.path)
    }

    /// Extension of the file name, without the dot
    pub fn extension(&self) -> Option<&str> {
        self.file_name()
            .rsplit_once('.')
            .map(|(_, ext)| ext)
            .filter(|ext| !ext.is_empty())
    }
}

/// Cached dimensions and the file identity they were computed for
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CachedMetadata {
    pub width: u32,
    pub height: u32,
    pub size: u64,
    pub mtime: f64,
}

impl CachedMetadata {
    /// Whether the cached entry still describes a file with the given size and mtime
    pub fn is_fresh(&self, size: u64, mtime: f64, epsilon: f64) -> bool {
        self.size == size && (self.mtime - mtime).abs() < epsilon
    }
}

/// A request to scan one directory
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanRequest {
    /// Monotonically increasing scan identifier
    pub scan_id: u64,
    /// Directory to scan
    pub directory: PathBuf,
    /// Walk subdirectories as well
    pub recursive: bool,
}

impl ScanRequest {
    /// Create a new scan request
    pub fn new(scan_id: u64, directory: impl Into<PathBuf>, recursive: bool) -> Self {
        Self {
            scan_id,
            directory: directory.into(),
            recursive,
        }
    }
}

/// Lifecycle of a scan task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum TaskState {
    /// Constructed, not yet picked up by a worker
    #[default]
    Created,
    /// Walking the directory
    Running,
    /// Walked to the end
    Completed,
    /// Stopped early by an abort request
    Aborted,
}

impl TaskState {
    /// Whether the task has emitted its finished event
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskState::Completed | TaskState::Aborted)
    }

    /// Get string representation
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskState::Created => "created",
            TaskState::Running => "running",
            TaskState::Completed => "completed",
            TaskState::Aborted => "aborted",
        }
    }
}

/// Counters collected by a scan task
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanStats {
    /// Directories whose files were examined
    pub dirs: u64,
    /// Candidate image files seen
    pub files: u64,
    /// Records resolved from the metadata store
    pub cache_hits: u64,
    /// Records resolved by decoding the file
    pub cache_misses: u64,
    /// Files skipped because stat or decode failed
    pub skipped: u64,
    /// Wall time of the scan in milliseconds
    pub duration_ms: u64,
}

/// Event sent from a scan task to the coordinator
#[derive(Debug, Clone)]
pub enum ScanEvent {
    /// Records resolved since the previous batch
    Batch {
        scan_id: u64,
        records: Vec<ImageRecord>,
    },
    /// Final event of a task, carrying every record it resolved
    Finished {
        scan_id: u64,
        records: Vec<ImageRecord>,
        state: TaskState,
        stats: ScanStats,
    },
}

impl ScanEvent {
    /// Scan identifier the event belongs to
    pub fn scan_id(&self) -> u64 {
        match self {
            ScanEvent::Batch { scan_id, .. } | ScanEvent::Finished { scan_id, .. } => *scan_id,
        }
    }
}

/// Ordering applied to a finished record list
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SortMode {
    /// Path, case-insensitive, ascending
    #[default]
    Name,
    /// Path, case-insensitive, descending
    NameDesc,
    /// Oldest first
    Date,
    /// Newest first
    DateDesc,
    /// Smallest first
    Size,
    /// Largest first
    SizeDesc,
}

impl SortMode {
    /// Get string representation
    pub fn as_str(&self) -> &'static str {
        match self {
            SortMode::Name => "name",
            SortMode::NameDesc => "name-desc",
            SortMode::Date => "date",
            SortMode::DateDesc => "date-desc",
            SortMode::Size => "size",
            SortMode::SizeDesc => "size-desc",
        }
    }

    /// Sort records in place
    pub fn sort(&self, records: &mut [ImageRecord]) {
        match self {
            SortMode::Name => records.sort_by_cached_key(|r| r.path.to_lowercase()),
            SortMode::NameDesc => {
                records.sort_by_cached_key(|r| std::cmp::Reverse(r.path.to_lowercase()))
            }
            SortMode::Date => records.sort_by(|a, b| a.mtime.total_cmp(&b.mtime)),
            SortMode::DateDesc => records.sort_by(|a, b| b.mtime.total_cmp(&a.mtime)),
            SortMode::Size => records.sort_by_key(|r| r.size),
            SortMode::SizeDesc => records.sort_by_key(|r| std::cmp::Reverse(r.size)),
        }
    }
}

impl std::fmt::Display for SortMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for SortMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "name" | "name-asc" => Ok(SortMode::Name),
            "name-desc" => Ok(SortMode::NameDesc),
            "date" | "date-asc" => Ok(SortMode::Date),
            "date-desc" => Ok(SortMode::DateDesc),
            "size" | "size-asc" => Ok(SortMode::Size),
            "size-desc" => Ok(SortMode::SizeDesc),
            other => Err(format!("unknown sort mode: {}", other)),
        }
    }
}

/// Files below this size are small
pub const SMALL_SIZE_LIMIT: u64 = 100 * 1024;

/// Files above this size are large
pub const LARGE_SIZE_THRESHOLD: u64 = 1024 * 1024;

/// Coarse file size bucket used for filtering
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SizeClass {
    /// Under 100 KiB
    Small,
    /// 100 KiB up to and including 1 MiB
    Medium,
    /// Over 1 MiB
    Large,
}

impl SizeClass {
    pub fn of(bytes: u64) -> Self {
        if bytes < SMALL_SIZE_LIMIT {
            SizeClass::Small
        } else if bytes <= LARGE_SIZE_THRESHOLD {
            SizeClass::Medium
        } else {
            SizeClass::Large
        }
    }

    /// Get string representation
    pub fn as_str(&self) -> &'static str {
        match self {
            SizeClass::Small => "small",
            SizeClass::Medium => "medium",
            SizeClass::Large => "large",
        }
    }
}

impl std::fmt::Display for SizeClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for SizeClass {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "small" => Ok(SizeClass::Small),
            "medium" => Ok(SizeClass::Medium),
            "large" => Ok(SizeClass::Large),
            other => Err(format!("unknown size class: {}", other)),
        }
    }
}

/// Narrows a record list by file name, format and size
///
/// Empty criteria match everything. Apply before sorting.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordFilter {
    /// Lowercased substring the file name must contain
    pub search: Option<String>,
    /// Lowercased extension, without the dot
    pub format: Option<String>,
    pub size: Option<SizeClass>,
}

impl RecordFilter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Case-insensitive file name search; blank text clears it
    pub fn with_search(mut self, text: &str) -> Self {
        let text = text.trim().to_lowercase();
        self.search = (!text.is_empty()).then_some(text);
        self
    }

    /// Keep only files with this extension (`"PNG"`, `".png"` and `"png"` are equal)
    pub fn with_format(mut self, ext: &str) -> Self {
        let ext = ext.trim().trim_start_matches('.').to_lowercase();
        self.format = (!ext.is_empty()).then_some(ext);
        self
    }

    pub fn with_size(mut self, class: SizeClass) -> Self {
        self.size = Some(class);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.search.is_none() && self.format.is_none() && self.size.is_none()
    }

    pub fn matches(&self, record: &ImageRecord) -> bool {
        if let Some(search) = &self.search {
            if !record.file_name().to_lowercase().contains(search.as_str()) {
                return false;
            }
        }
        if let Some(format) = &self.format {
            match record.extension() {
                Some(ext) if ext.eq_ignore_ascii_case(format) => {}
                _ => return false,
            }
        }
        if let Some(size) = self.size {
            if SizeClass::of(record.size) != size {
                return false;
            }
        }
        true
    }

    /// Drop records that do not match, keeping the original order
    pub fn apply(&self, mut records: Vec<ImageRecord>) -> Vec<ImageRecord> {
        if !self.is_empty() {
            records.retain(|r| self.matches(r));
        }
        records
    }
}

/// Summary of a finished scan (CLI output)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanReport {
    pub scan_id: u64,
    pub directory: String,
    pub recursive: bool,
    pub state: TaskState,
    pub total_images: usize,
    /// Images left after filtering
    pub matched_images: usize,
    pub stats: ScanStats,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub images: Vec<ImageRecord>,
}

/// Make a path absolute and render it as the store key
///
/// Separators are normalized to `/` for cross-platform consistency.
pub fn normalize_path(path: &Path) -> String {
    let absolute = std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf());
    absolute.to_string_lossy().replace('\\', "/")
}

/// Modification time as fractional seconds since the Unix epoch
pub fn mtime_secs(metadata: &std::fs::Metadata) -> f64 {
    metadata
        .modified()
        .ok()
        .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(path: &str, size: u64, mtime: f64) -> ImageRecord {
        ImageRecord::new(path, 10, 20, size, mtime)
    }

    #[test]
    fn test_freshness_within_epsilon() {
        let cached = CachedMetadata {
            width: 400,
            height: 300,
            size: 100,
            mtime: 1000.0,
        };

        assert!(cached.is_fresh(100, 1000.0, 0.01));
        assert!(cached.is_fresh(100, 1000.005, 0.01));
        assert!(cached.is_fresh(100, 999.995, 0.01));
        assert!(!cached.is_fresh(100, 1000.5, 0.01));
        assert!(!cached.is_fresh(101, 1000.0, 0.01));
    }

    #[test]
    fn test_default_epsilon_tolerates_small_mtime_drift() {
        let eps = crate::config::ScanConfig::default().mtime_epsilon;
        let cached = CachedMetadata {
            width: 400,
            height: 300,
            size: 100,
            mtime: 1000.0,
        };

        assert!(cached.is_fresh(100, 1000.02, eps));
        assert!(cached.is_fresh(100, 999.98, eps));
        assert!(!cached.is_fresh(100, 1000.5, eps));
        assert!(!cached.is_fresh(101, 1000.0, eps));
    }

    #[test]
    fn test_record_validation() {
        assert!(record("/a.jpg", 1, 1.0).is_valid());
        assert!(!record("", 1, 1.0).is_valid());
        assert!(!ImageRecord::new("/a.jpg", 0, 10, 1, 1.0).is_valid());
        assert!(!record("/a.jpg", 1, f64::NAN).is_valid());
        assert!(!record("/a.jpg", 1, -5.0).is_valid());
    }

    #[test]
    fn test_record_file_name() {
        assert_eq!(record("/photos/2024/a.jpg", 1, 1.0).file_name(), "a.jpg");
        assert_eq!(record("a.jpg", 1, 1.0).file_name(), "a.jpg");
    }

    #[test]
    fn test_record_serializes_short_dimension_keys() {
        let json = serde_json::to_value(record("/a.jpg", 5, 2.5)).unwrap();
        assert_eq!(json["w"], 10);
        assert_eq!(json["h"], 20);
        assert_eq!(json["size"], 5);
        assert_eq!(json["mtime"], 2.5);
    }

    #[test]
    fn test_task_state_terminal() {
        assert!(!TaskState::Created.is_terminal());
        assert!(!TaskState::Running.is_terminal());
        assert!(TaskState::Completed.is_terminal());
        assert!(TaskState::Aborted.is_terminal());
    }

    #[test]
    fn test_sort_modes() {
        let mut records = vec![
            record("/b.jpg", 300, 2.0),
            record("/A.jpg", 100, 3.0),
            record("/c.jpg", 200, 1.0),
        ];

        SortMode::Name.sort(&mut records);
        assert_eq!(records[0].path, "/A.jpg");
        assert_eq!(records[2].path, "/c.jpg");

        SortMode::NameDesc.sort(&mut records);
        assert_eq!(records[0].path, "/c.jpg");

        SortMode::Date.sort(&mut records);
        assert_eq!(records[0].path, "/c.jpg");

        SortMode::DateDesc.sort(&mut records);
        assert_eq!(records[0].path, "/A.jpg");

        SortMode::Size.sort(&mut records);
        assert_eq!(records[0].size, 100);

        SortMode::SizeDesc.sort(&mut records);
        assert_eq!(records[0].size, 300);
    }

    #[test]
    fn test_record_extension() {
        assert_eq!(record("/p/a.JPG", 1, 1.0).extension(), Some("JPG"));
        assert_eq!(record("/p/archive.tar.png", 1, 1.0).extension(), Some("png"));
        assert_eq!(record("/p.d/noext", 1, 1.0).extension(), None);
        assert_eq!(record("/p/trailing.", 1, 1.0).extension(), None);
    }

    #[test]
    fn test_size_class_boundaries() {
        assert_eq!(SizeClass::of(0), SizeClass::Small);
        assert_eq!(SizeClass::of(SMALL_SIZE_LIMIT - 1), SizeClass::Small);
        assert_eq!(SizeClass::of(SMALL_SIZE_LIMIT), SizeClass::Medium);
        assert_eq!(SizeClass::of(LARGE_SIZE_THRESHOLD), SizeClass::Medium);
        assert_eq!(SizeClass::of(LARGE_SIZE_THRESHOLD + 1), SizeClass::Large);
        assert_eq!("LARGE".parse::<SizeClass>(), Ok(SizeClass::Large));
        assert!("huge".parse::<SizeClass>().is_err());
    }

    fn gallery() -> Vec<ImageRecord> {
        vec![
            record("/p/Beach_Sunset.jpg", 50 * 1024, 1.0),
            record("/p/beach_day.PNG", 500 * 1024, 2.0),
            record("/p/mountain.jpg", 2 * 1024 * 1024, 3.0),
            record("/p/sunset-city.png", 2 * 1024 * 1024, 4.0),
        ]
    }

    fn file_names(records: &[ImageRecord]) -> Vec<&str> {
        records.iter().map(|r| r.file_name()).collect()
    }

    #[test]
    fn test_filter_empty_keeps_everything() {
        let filter = RecordFilter::new().with_search("   ").with_format(".");
        assert!(filter.is_empty());
        assert_eq!(filter.apply(gallery()).len(), 4);
    }

    #[test]
    fn test_filter_by_search_text() {
        let filtered = RecordFilter::new().with_search(" SUNSET ").apply(gallery());
        assert_eq!(file_names(&filtered), vec!["Beach_Sunset.jpg", "sunset-city.png"]);

        // Only the file name is searched, not the directory.
        assert!(RecordFilter::new().with_search("p/").apply(gallery()).is_empty());
    }

    #[test]
    fn test_filter_by_format() {
        let filtered = RecordFilter::new().with_format("png").apply(gallery());
        assert_eq!(file_names(&filtered), vec!["beach_day.PNG", "sunset-city.png"]);

        let filtered = RecordFilter::new().with_format(".JPG").apply(gallery());
        assert_eq!(file_names(&filtered), vec!["Beach_Sunset.jpg", "mountain.jpg"]);
    }

    #[test]
    fn test_filter_by_size_class() {
        let small = RecordFilter::new().with_size(SizeClass::Small).apply(gallery());
        assert_eq!(file_names(&small), vec!["Beach_Sunset.jpg"]);

        let medium = RecordFilter::new().with_size(SizeClass::Medium).apply(gallery());
        assert_eq!(file_names(&medium), vec!["beach_day.PNG"]);

        let large = RecordFilter::new().with_size(SizeClass::Large).apply(gallery());
        assert_eq!(file_names(&large), vec!["mountain.jpg", "sunset-city.png"]);
    }

    #[test]
    fn test_filter_criteria_combine_then_sort() {
        let filter = RecordFilter::new()
            .with_search("sunset")
            .with_format("png")
            .with_size(SizeClass::Large);
        let filtered = filter.apply(gallery());
        assert_eq!(file_names(&filtered), vec!["sunset-city.png"]);

        let mut beaches = RecordFilter::new().with_search("beach").apply(gallery());
        SortMode::SizeDesc.sort(&mut beaches);
        assert_eq!(file_names(&beaches), vec!["beach_day.PNG", "Beach_Sunset.jpg"]);

        let none = RecordFilter::new()
            .with_search("beach")
            .with_size(SizeClass::Large)
            .apply(gallery());
        assert!(none.is_empty());
    }

    #[test]
    fn test_sort_mode_parse() {
        assert_eq!("name".parse::<SortMode>(), Ok(SortMode::Name));
        assert_eq!("DATE-DESC".parse::<SortMode>(), Ok(SortMode::DateDesc));
        assert_eq!("size-asc".parse::<SortMode>(), Ok(SortMode::Size));
        assert!("random".parse::<SortMode>().is_err());
    }

    #[test]
    fn test_normalize_path_is_absolute() {
        let normalized = normalize_path(Path::new("some/relative.jpg"));
        assert!(Path::new(&normalized).is_absolute() || normalized.contains(":/"));
        assert!(normalized.ends_with("some/relative.jpg"));
        assert!(!normalized.contains('\\'));
    }

    #[test]
    fn test_event_scan_id() {
        let batch = ScanEvent::Batch {
            scan_id: 7,
            records: Vec::new(),
        };
        let finished = ScanEvent::Finished {
            scan_id: 9,
            records: Vec::new(),
            state: TaskState::Completed,
            stats: ScanStats::default(),
        };
        assert_eq!(batch.scan_id(), 7);
        assert_eq!(finished.scan_id(), 9);
    }
}
