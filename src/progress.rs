use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use serde::Serialize;

/// Above this many files, finished rows are dropped from the visible manifest.
pub const MAX_DISPLAY_ROWS: usize = 40;
pub const FINISHED_GRACE: Duration = Duration::from_secs(2);
pub const DETAIL_MAX: usize = 120;

#[derive(Debug, Clone)]
pub struct ProgressEvent {
    pub message: String,
    pub elapsed: Option<Duration>,
}

impl ProgressEvent {
    pub fn phase(phase: &str, detail: impl AsRef<str>) -> Self {
        Self {
            message: format!("phase={phase}; {}", detail.as_ref()),
            elapsed: None,
        }
    }

    pub fn message(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            elapsed: None,
        }
    }
}

pub trait ProgressSink: Sync {
    fn event(&self, event: ProgressEvent);

    /// Called once per download run, before any file is dispatched.
    fn manifest(&self, _manifest: Arc<Manifest>) {}
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileState {
    Pending,
    Transferring,
    Complete,
    Skipped,
    Failed(String),
    Cancelled,
}

impl FileState {
    pub fn is_finished(&self) -> bool {
        !matches!(self, FileState::Pending | FileState::Transferring)
    }

    pub fn label(&self) -> &'static str {
        match self {
            FileState::Pending => "pending",
            FileState::Transferring => "transferring",
            FileState::Complete => "complete",
            FileState::Skipped => "skipped",
            FileState::Failed(_) => "failed",
            FileState::Cancelled => "cancelled",
        }
    }
}

#[derive(Debug, Clone)]
pub struct FileEntry {
    pub filename: String,
    pub total: Option<u64>,
    pub transferred: u64,
    pub state: FileState,
    finished_at: Option<Instant>,
}

impl FileEntry {
    pub fn percent(&self) -> Option<u8> {
        let total = self.total.filter(|total| *total > 0)?;
        Some(((self.transferred.min(total) * 100) / total) as u8)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ManifestSummary {
    pub complete: usize,
    pub skipped: usize,
    pub failed: usize,
    pub cancelled: usize,
    pub pending: usize,
}

/// Per-file progress rows for one dataset, in chronological file order.
#[derive(Debug)]
pub struct Manifest {
    dataset_id: String,
    entries: Mutex<Vec<FileEntry>>,
}

impl Manifest {
    pub fn new<'a>(
        dataset_id: &str,
        files: impl IntoIterator<Item = (&'a str, Option<u64>)>,
    ) -> Self {
        let entries = files
            .into_iter()
            .map(|(filename, total)| FileEntry {
                filename: filename.to_string(),
                total,
                transferred: 0,
                state: FileState::Pending,
                finished_at: None,
            })
            .collect();
        Self {
            dataset_id: dataset_id.to_string(),
            entries: Mutex::new(entries),
        }
    }

    pub fn dataset_id(&self) -> &str {
        &self.dataset_id
    }

    pub fn len(&self) -> usize {
        self.entries.lock().map(|entries| entries.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn start(&self, index: usize, total: Option<u64>) {
        self.update(index, |entry| {
            entry.state = FileState::Transferring;
            if total.is_some() {
                entry.total = total;
            }
        });
    }

    pub fn advance(&self, index: usize, bytes: u64) {
        self.update(index, |entry| {
            entry.transferred = entry.transferred.saturating_add(bytes);
        });
    }

    pub fn finish(&self, index: usize, state: FileState) {
        self.update(index, |entry| {
            entry.state = state;
            entry.finished_at = Some(Instant::now());
        });
    }

    /// Marks every row that never started as cancelled.
    pub fn cancel_pending(&self) {
        if let Ok(mut entries) = self.entries.lock() {
            for entry in entries.iter_mut() {
                if entry.state == FileState::Pending {
                    entry.state = FileState::Cancelled;
                    entry.finished_at = Some(Instant::now());
                }
            }
        }
    }

    pub fn snapshot(&self) -> Vec<FileEntry> {
        self.entries
            .lock()
            .map(|entries| entries.clone())
            .unwrap_or_default()
    }

    /// Rows to display at `now`. Large manifests hide rows that completed or
    /// were skipped more than [`FINISHED_GRACE`] ago.
    pub fn visible(&self, now: Instant) -> Vec<FileEntry> {
        let entries = self.snapshot();
        if entries.len() <= MAX_DISPLAY_ROWS {
            return entries;
        }
        entries
            .into_iter()
            .filter(|entry| {
                let done = matches!(entry.state, FileState::Complete | FileState::Skipped);
                let expired = entry
                    .finished_at
                    .is_some_and(|at| now.saturating_duration_since(at) >= FINISHED_GRACE);
                !(done && expired)
            })
            .collect()
    }

    pub fn summary(&self) -> ManifestSummary {
        let mut summary = ManifestSummary::default();
        for entry in self.snapshot() {
            match entry.state {
                FileState::Complete => summary.complete += 1,
                FileState::Skipped => summary.skipped += 1,
                FileState::Failed(_) => summary.failed += 1,
                FileState::Cancelled => summary.cancelled += 1,
                FileState::Pending | FileState::Transferring => summary.pending += 1,
            }
        }
        summary
    }

    fn update(&self, index: usize, apply: impl FnOnce(&mut FileEntry)) {
        if let Ok(mut entries) = self.entries.lock() {
            if let Some(entry) = entries.get_mut(index) {
                apply(entry);
            }
        }
    }
}

/// Shortens an error detail for single-line display.
pub fn truncate_detail(detail: &str) -> String {
    let detail = detail.lines().next().unwrap_or_default().trim();
    if detail.chars().count() <= DETAIL_MAX {
        return detail.to_string();
    }
    let mut short: String = detail.chars().take(DETAIL_MAX.saturating_sub(3)).collect();
    short.push_str("...");
    short
}

/// Sink that discards everything.
pub struct NullSink;

impl ProgressSink for NullSink {
    fn event(&self, _event: ProgressEvent) {}
}
