//! Multipart upload state tracking.
//!
//! The transfer engine registers a [`MultipartUploadState`] per upload id,
//! feeds part results into it as they land, and drives it to a terminal
//! status. Terminal states are monotonic: a completed upload never flips to
//! failed, and vice versa. One lock covers the map and per-state mutation.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, SystemTime};

/// Lifecycle status of one multipart upload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MultipartStatus {
    Initiated,
    InProgress,
    Completed,
    Failed,
    Aborted,
}

impl MultipartStatus {
    /// Whether this status is terminal.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            MultipartStatus::Completed | MultipartStatus::Failed | MultipartStatus::Aborted
        )
    }
}

/// Bookkeeping for one part.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PartState {
    pub size: u64,
    pub etag: Option<String>,
    pub completed: bool,
    pub retry_count: u32,
    pub last_error: Option<String>,
}

/// State of one multipart upload.
#[derive(Debug, Clone)]
pub struct MultipartUploadState {
    pub upload_id: String,
    pub bucket: String,
    pub key: String,
    pub total_size: u64,
    pub chunk_size: u64,
    pub total_parts: u32,
    pub status: MultipartStatus,
    pub parts: HashMap<u32, PartState>,
    pub started_at: SystemTime,
    pub updated_at: SystemTime,
    pub completed_parts: u32,
    pub bytes_uploaded: u64,
}

impl MultipartUploadState {
    pub fn new(
        upload_id: impl Into<String>,
        bucket: impl Into<String>,
        key: impl Into<String>,
        total_size: u64,
        chunk_size: u64,
        total_parts: u32,
    ) -> Self {
        let now = SystemTime::now();
        Self {
            upload_id: upload_id.into(),
            bucket: bucket.into(),
            key: key.into(),
            total_size,
            chunk_size,
            total_parts,
            status: MultipartStatus::Initiated,
            parts: HashMap::new(),
            started_at: now,
            updated_at: now,
            completed_parts: 0,
            bytes_uploaded: 0,
        }
    }

    /// Completion percentage in `[0, 100]`.
    pub fn progress(&self) -> f64 {
        if self.total_parts == 0 {
            return 0.0;
        }
        self.completed_parts as f64 / self.total_parts as f64 * 100.0
    }

    /// Part numbers whose completion flag is unset (or absent), ascending.
    pub fn remaining_parts(&self) -> Vec<u32> {
        (1..=self.total_parts)
            .filter(|n| !self.parts.get(n).map(|p| p.completed).unwrap_or(false))
            .collect()
    }
}

/// Thread-safe registry of multipart uploads, keyed by upload id.
pub struct MultipartManager {
    uploads: Mutex<HashMap<String, MultipartUploadState>>,
}

impl Default for MultipartManager {
    fn default() -> Self {
        Self::new()
    }
}

impl MultipartManager {
    pub fn new() -> Self {
        Self {
            uploads: Mutex::new(HashMap::new()),
        }
    }

    /// Inserts a state, replacing any prior entry for the same upload id.
    pub fn track(&self, state: MultipartUploadState) {
        self.uploads
            .lock()
            .unwrap()
            .insert(state.upload_id.clone(), state);
    }

    /// A copy of one upload's state.
    pub fn get(&self, upload_id: &str) -> Option<MultipartUploadState> {
        self.uploads.lock().unwrap().get(upload_id).cloned()
    }

    /// Records one part result. A success marks the part completed and
    /// moves the upload into `InProgress`; a failure increments the part's
    /// retry count without touching the upload status.
    pub fn update_part(
        &self,
        upload_id: &str,
        part_number: u32,
        size: u64,
        etag: Option<String>,
        error: Option<&str>,
    ) {
        let mut uploads = self.uploads.lock().unwrap();
        let Some(state) = uploads.get_mut(upload_id) else {
            return;
        };
        let part = state.parts.entry(part_number).or_default();
        match error {
            None => {
                if !part.completed {
                    state.completed_parts += 1;
                    state.bytes_uploaded += size;
                }
                part.size = size;
                part.etag = etag;
                part.completed = true;
                part.last_error = None;
                if state.status == MultipartStatus::Initiated {
                    state.status = MultipartStatus::InProgress;
                }
            }
            Some(message) => {
                part.retry_count += 1;
                part.last_error = Some(message.to_string());
            }
        }
        state.updated_at = SystemTime::now();
    }

    fn terminal_transition(&self, upload_id: &str, to: MultipartStatus) {
        let mut uploads = self.uploads.lock().unwrap();
        let Some(state) = uploads.get_mut(upload_id) else {
            return;
        };
        // Terminal states are monotonic; only the first one sticks.
        if state.status.is_terminal() {
            return;
        }
        state.status = to;
        state.updated_at = SystemTime::now();
    }

    /// Marks the upload completed. Idempotent; never unflips another
    /// terminal state.
    pub fn mark_completed(&self, upload_id: &str) {
        self.terminal_transition(upload_id, MultipartStatus::Completed);
    }

    /// Marks the upload failed. Idempotent; never unflips a completed
    /// upload.
    pub fn mark_failed(&self, upload_id: &str) {
        self.terminal_transition(upload_id, MultipartStatus::Failed);
    }

    /// Marks the upload aborted.
    pub fn mark_aborted(&self, upload_id: &str) {
        self.terminal_transition(upload_id, MultipartStatus::Aborted);
    }

    /// Frees the state.
    pub fn remove(&self, upload_id: &str) {
        self.uploads.lock().unwrap().remove(upload_id);
    }

    /// Drops terminal states older than `max_age`; returns how many were
    /// removed.
    pub fn cleanup(&self, max_age: Duration) -> usize {
        let now = SystemTime::now();
        let mut uploads = self.uploads.lock().unwrap();
        let before = uploads.len();
        uploads.retain(|_, state| {
            let expired = state.status.is_terminal()
                && now
                    .duration_since(state.updated_at)
                    .map(|age| age > max_age)
                    .unwrap_or(false);
            !expired
        });
        let removed = before - uploads.len();
        if removed > 0 {
            tracing::debug!(removed, "cleaned up terminal multipart uploads");
        }
        removed
    }

    /// Snapshot of all uploads still initiated or in progress.
    pub fn in_progress(&self) -> Vec<MultipartUploadState> {
        self.uploads
            .lock()
            .unwrap()
            .values()
            .filter(|s| {
                matches!(
                    s.status,
                    MultipartStatus::Initiated | MultipartStatus::InProgress
                )
            })
            .cloned()
            .collect()
    }

    /// Snapshot of every tracked upload, any status.
    pub fn snapshot(&self) -> Vec<MultipartUploadState> {
        self.uploads.lock().unwrap().values().cloned().collect()
    }

    /// Number of tracked uploads, any status.
    pub fn len(&self) -> usize {
        self.uploads.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.uploads.lock().unwrap().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state(upload_id: &str, parts: u32) -> MultipartUploadState {
        MultipartUploadState::new(upload_id, "data", "big.bin", parts as u64 * 100, 100, parts)
    }

    #[test]
    fn part_success_advances_progress() {
        let manager = MultipartManager::new();
        manager.track(state("u1", 4));

        manager.update_part("u1", 1, 100, Some("e1".into()), None);
        manager.update_part("u1", 3, 100, Some("e3".into()), None);

        let s = manager.get("u1").unwrap();
        assert_eq!(s.status, MultipartStatus::InProgress);
        assert_eq!(s.completed_parts, 2);
        assert_eq!(s.bytes_uploaded, 200);
        assert_eq!(s.progress(), 50.0);
        assert_eq!(s.remaining_parts(), vec![2, 4]);
    }

    #[test]
    fn duplicate_part_success_counts_once() {
        let manager = MultipartManager::new();
        manager.track(state("u1", 2));

        manager.update_part("u1", 1, 100, Some("e1".into()), None);
        manager.update_part("u1", 1, 100, Some("e1".into()), None);

        let s = manager.get("u1").unwrap();
        assert_eq!(s.completed_parts, 1);
        assert_eq!(s.bytes_uploaded, 100);
    }

    #[test]
    fn part_failure_keeps_upload_status() {
        let manager = MultipartManager::new();
        manager.track(state("u1", 2));

        manager.update_part("u1", 1, 0, None, Some("connection reset"));
        manager.update_part("u1", 1, 0, None, Some("connection reset"));

        let s = manager.get("u1").unwrap();
        assert_eq!(s.status, MultipartStatus::Initiated);
        assert_eq!(s.completed_parts, 0);
        let part = &s.parts[&1];
        assert_eq!(part.retry_count, 2);
        assert!(!part.completed);
        assert_eq!(part.last_error.as_deref(), Some("connection reset"));
    }

    #[test]
    fn completed_upload_never_unflips() {
        let manager = MultipartManager::new();
        manager.track(state("u1", 1));
        manager.update_part("u1", 1, 100, Some("e1".into()), None);

        manager.mark_completed("u1");
        manager.mark_failed("u1");
        assert_eq!(manager.get("u1").unwrap().status, MultipartStatus::Completed);

        // And the other direction.
        manager.track(state("u2", 1));
        manager.mark_failed("u2");
        manager.mark_completed("u2");
        assert_eq!(manager.get("u2").unwrap().status, MultipartStatus::Failed);
    }

    #[test]
    fn in_progress_excludes_terminal_states() {
        let manager = MultipartManager::new();
        manager.track(state("u1", 1));
        manager.track(state("u2", 1));
        manager.track(state("u3", 1));
        manager.update_part("u2", 1, 100, Some("e".into()), None);
        manager.mark_failed("u3");

        let open: Vec<String> = manager
            .in_progress()
            .into_iter()
            .map(|s| s.upload_id)
            .collect();
        assert_eq!(open.len(), 2);
        assert!(open.contains(&"u1".to_string()));
        assert!(open.contains(&"u2".to_string()));
    }

    #[test]
    fn cleanup_drops_only_aged_terminal_states() {
        let manager = MultipartManager::new();
        manager.track(state("live", 1));
        manager.track(state("done", 1));
        manager.mark_completed("done");

        // Nothing is older than an hour.
        assert_eq!(manager.cleanup(Duration::from_secs(3600)), 0);
        // Everything terminal is older than zero.
        assert_eq!(manager.cleanup(Duration::ZERO), 1);
        assert!(manager.get("done").is_none());
        assert!(manager.get("live").is_some());
    }

    #[test]
    fn progress_is_monotonic_through_lifecycle() {
        let manager = MultipartManager::new();
        manager.track(state("u1", 3));

        let mut last = manager.get("u1").unwrap().progress();
        for part in 1..=3 {
            manager.update_part("u1", part, 100, Some(format!("e{part}")), None);
            let now = manager.get("u1").unwrap().progress();
            assert!(now >= last);
            last = now;
        }
        assert_eq!(last, 100.0);
        assert!(manager.get("u1").unwrap().remaining_parts().is_empty());
    }

    #[test]
    fn track_overwrites_prior_entry() {
        let manager = MultipartManager::new();
        manager.track(state("u1", 2));
        manager.update_part("u1", 1, 100, Some("e".into()), None);

        manager.track(state("u1", 5));
        let s = manager.get("u1").unwrap();
        assert_eq!(s.total_parts, 5);
        assert_eq!(s.completed_parts, 0);
    }
}
