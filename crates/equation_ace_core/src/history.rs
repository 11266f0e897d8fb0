//! crates/equation_ace_core/src/history.rs
//!
//! The history store adapter: saves completed solves for signed-in users and
//! serves their history, both as a one-off listing and as a live watch.

use crate::domain::{HistoryRecord, ImageBlob, NewHistoryRecord, SolveOutcome};
use crate::ports::{HistoryRepository, ObjectStorageService, PortError, PortResult};
use chrono::Utc;
use std::sync::Arc;
use tokio::sync::broadcast::{self, error::RecvError};
use tracing::{info, warn};
use uuid::Uuid;

const FEED_CAPACITY: usize = 64;

/// Saving a solve failed. Callers log it; it never reaches the solve result.
#[derive(Debug, thiserror::Error)]
pub enum PersistenceError {
    #[error("Uploading the problem image failed: {0}")]
    Upload(#[source] PortError),
    /// `orphaned_key` names an image that was uploaded for the record and is
    /// now referenced by nothing.
    #[error("Saving the history record failed: {source}{}", orphan_note(.orphaned_key))]
    Insert {
        source: PortError,
        orphaned_key: Option<String>,
    },
}

fn orphan_note(orphaned_key: &Option<String>) -> String {
    orphaned_key
        .as_ref()
        .map(|key| format!(" (orphaned upload '{}')", key))
        .unwrap_or_default()
}

/// Orders records newest first. Records with the same timestamp are ordered by
/// ascending id so listings are deterministic.
pub fn sort_newest_first(records: &mut [HistoryRecord]) {
    records.sort_by(|a, b| {
        b.created_at
            .cmp(&a.created_at)
            .then_with(|| a.id.cmp(&b.id))
    });
}

/// Object storage key for a record's image, namespaced per user.
pub fn image_key(owner_id: Uuid, record_id: Uuid, image: &ImageBlob) -> String {
    format!(
        "equations/{}/{}-{}.{}",
        owner_id,
        Utc::now().timestamp_millis(),
        record_id,
        image.format.extension()
    )
}

pub struct HistoryRecorder {
    repository: Arc<dyn HistoryRepository>,
    storage: Arc<dyn ObjectStorageService>,
    feed: broadcast::Sender<HistoryRecord>,
}

impl HistoryRecorder {
    pub fn new(repository: Arc<dyn HistoryRepository>, storage: Arc<dyn ObjectStorageService>) -> Self {
        let (feed, _) = broadcast::channel(FEED_CAPACITY);
        Self {
            repository,
            storage,
            feed,
        }
    }

    /// Saves a completed solve. Without a signed-in owner nothing is written.
    pub async fn record(
        &self,
        owner_id: Option<Uuid>,
        outcome: &SolveOutcome,
        image: Option<&ImageBlob>,
    ) -> Result<Option<HistoryRecord>, PersistenceError> {
        let Some(owner_id) = owner_id else {
            return Ok(None);
        };

        let mut new_record = NewHistoryRecord::from_outcome(owner_id, outcome, None);
        let mut uploaded_key = None;
        if let Some(image) = image {
            let key = image_key(owner_id, new_record.id, image);
            let url = self
                .storage
                .upload_image(&key, image)
                .await
                .map_err(PersistenceError::Upload)?;
            new_record.image_url = Some(url);
            uploaded_key = Some(key);
        }

        let record = self
            .repository
            .insert_history_record(new_record)
            .await
            .map_err(|source| PersistenceError::Insert {
                source,
                orphaned_key: uploaded_key,
            })?;
        info!("Saved history record {} for user {}", record.id, owner_id);

        // No receivers just means nobody is watching.
        let _ = self.feed.send(record.clone());
        Ok(Some(record))
    }

    pub async fn list(&self, owner_id: Uuid) -> PortResult<Vec<HistoryRecord>> {
        let mut records = self.repository.get_history_for_owner(owner_id).await?;
        sort_newest_first(&mut records);
        Ok(records)
    }

    /// Fetches one record, hiding records of other users.
    pub async fn find(&self, owner_id: Uuid, record_id: Uuid) -> PortResult<HistoryRecord> {
        let record = self.repository.get_history_record(record_id).await?;
        if record.owner_id != owner_id {
            return Err(PortError::NotFound(format!("History record {} not found", record_id)));
        }
        Ok(record)
    }

    /// Starts a live subscription to the owner's history.
    pub async fn watch(&self, owner_id: Uuid) -> PortResult<HistoryWatch> {
        // Subscribe before listing so no record slips between the two.
        let receiver = self.feed.subscribe();
        let records = self.list(owner_id).await?;
        Ok(HistoryWatch {
            owner_id,
            repository: self.repository.clone(),
            receiver,
            records,
            initial_sent: false,
        })
    }
}

/// A live view of one user's history. Dropping it ends the subscription.
pub struct HistoryWatch {
    owner_id: Uuid,
    repository: Arc<dyn HistoryRepository>,
    receiver: broadcast::Receiver<HistoryRecord>,
    records: Vec<HistoryRecord>,
    initial_sent: bool,
}

impl HistoryWatch {
    /// Waits for the next sorted snapshot. The first call returns the current
    /// history immediately. Returns `None` once the feed is gone.
    pub async fn next_snapshot(&mut self) -> Option<Vec<HistoryRecord>> {
        if !self.initial_sent {
            self.initial_sent = true;
            return Some(self.records.clone());
        }
        loop {
            match self.receiver.recv().await {
                Ok(record) if record.owner_id == self.owner_id => {
                    if self.records.iter().any(|r| r.id == record.id) {
                        continue;
                    }
                    self.records.push(record);
                    sort_newest_first(&mut self.records);
                    return Some(self.records.clone());
                }
                Ok(_) => continue,
                Err(RecvError::Lagged(skipped)) => {
                    warn!("History watch lagged by {} records; reloading.", skipped);
                    match self.repository.get_history_for_owner(self.owner_id).await {
                        Ok(mut records) => {
                            sort_newest_first(&mut records);
                            self.records = records;
                            return Some(self.records.clone());
                        }
                        Err(e) => {
                            warn!("Reloading history failed: {}", e);
                            return None;
                        }
                    }
                }
                Err(RecvError::Closed) => return None,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{
        CorrectedProblem, ExtractionResult, ImageFormat, PipelineShape, Solution,
    };
    use async_trait::async_trait;
    use chrono::{DateTime, Duration, TimeZone};
    use std::sync::Mutex;

    #[derive(Default)]
    struct InMemoryHistory {
        records: Mutex<Vec<HistoryRecord>>,
        fixed_time: Option<DateTime<Utc>>,
        fail_insert: bool,
    }

    #[async_trait]
    impl HistoryRepository for InMemoryHistory {
        async fn insert_history_record(&self, record: NewHistoryRecord) -> PortResult<HistoryRecord> {
            if self.fail_insert {
                return Err(PortError::Unexpected("database unavailable".to_string()));
            }
            let mut records = self.records.lock().unwrap();
            let created_at = self.fixed_time.unwrap_or_else(|| {
                Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
                    + Duration::seconds(records.len() as i64)
            });
            let stored = HistoryRecord {
                id: record.id,
                owner_id: record.owner_id,
                raw_text: record.raw_text,
                corrected_text: record.corrected_text,
                result_lines: record.result_lines,
                explanation_steps: record.explanation_steps,
                graph: record.graph,
                image_url: record.image_url,
                schema: record.schema,
                created_at,
            };
            records.push(stored.clone());
            Ok(stored)
        }

        async fn get_history_for_owner(&self, owner_id: Uuid) -> PortResult<Vec<HistoryRecord>> {
            Ok(self
                .records
                .lock()
                .unwrap()
                .iter()
                .filter(|r| r.owner_id == owner_id)
                .cloned()
                .collect())
        }

        async fn get_history_record(&self, record_id: Uuid) -> PortResult<HistoryRecord> {
            self.records
                .lock()
                .unwrap()
                .iter()
                .find(|r| r.id == record_id)
                .cloned()
                .ok_or_else(|| PortError::NotFound(record_id.to_string()))
        }
    }

    #[derive(Default)]
    struct FakeStorage {
        keys: Mutex<Vec<String>>,
        fail: bool,
    }

    #[async_trait]
    impl ObjectStorageService for FakeStorage {
        async fn upload_image(&self, key: &str, _image: &ImageBlob) -> PortResult<String> {
            if self.fail {
                return Err(PortError::Unexpected("bucket unavailable".to_string()));
            }
            self.keys.lock().unwrap().push(key.to_string());
            Ok(format!("http://files.test/{}", key))
        }
    }

    fn outcome(raw_text: Option<&str>) -> SolveOutcome {
        SolveOutcome {
            extraction: raw_text.map(|t| ExtractionResult {
                raw_text: t.to_string(),
            }),
            corrected: CorrectedProblem {
                corrected_text: "3x + 2 = 11".to_string(),
            },
            solution: Solution {
                result_lines: vec!["x = 3".to_string()],
                explanation_steps: vec!["Subtract 2, divide by 3.".to_string()],
                graph: None,
            },
            shape: PipelineShape::Consolidated,
        }
    }

    fn png() -> ImageBlob {
        ImageBlob {
            format: ImageFormat::Png,
            bytes: vec![1, 2, 3],
        }
    }

    fn recorder(
        repository: Arc<InMemoryHistory>,
        storage: Arc<FakeStorage>,
    ) -> HistoryRecorder {
        HistoryRecorder::new(repository, storage)
    }

    #[tokio::test]
    async fn anonymous_solve_writes_nothing() {
        let repository = Arc::new(InMemoryHistory::default());
        let storage = Arc::new(FakeStorage::default());
        let saved = recorder(repository.clone(), storage.clone())
            .record(None, &outcome(Some("3x+2=11")), Some(&png()))
            .await
            .unwrap();
        assert!(saved.is_none());
        assert!(repository.records.lock().unwrap().is_empty());
        assert!(storage.keys.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn image_solve_stores_url_under_user_prefix() {
        let repository = Arc::new(InMemoryHistory::default());
        let storage = Arc::new(FakeStorage::default());
        let owner = Uuid::new_v4();
        let saved = recorder(repository, storage.clone())
            .record(Some(owner), &outcome(Some("3x+2=11")), Some(&png()))
            .await
            .unwrap()
            .unwrap();

        let key = storage.keys.lock().unwrap()[0].clone();
        assert!(key.starts_with(&format!("equations/{}/", owner)));
        assert!(key.ends_with(".png"));
        assert_eq!(saved.image_url, Some(format!("http://files.test/{}", key)));
        assert_eq!(saved.raw_text.as_deref(), Some("3x+2=11"));
    }

    #[tokio::test]
    async fn text_solve_has_no_image_url() {
        let repository = Arc::new(InMemoryHistory::default());
        let saved = recorder(repository, Arc::new(FakeStorage::default()))
            .record(Some(Uuid::new_v4()), &outcome(None), None)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(saved.image_url, None);
        assert_eq!(saved.raw_text, None);
    }

    #[tokio::test]
    async fn failed_upload_is_a_persistence_error() {
        let repository = Arc::new(InMemoryHistory::default());
        let storage = Arc::new(FakeStorage {
            fail: true,
            ..FakeStorage::default()
        });
        let err = recorder(repository.clone(), storage)
            .record(Some(Uuid::new_v4()), &outcome(Some("x")), Some(&png()))
            .await
            .unwrap_err();
        assert!(matches!(err, PersistenceError::Upload(_)));
        assert!(repository.records.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn failed_insert_reports_the_orphaned_upload() {
        let repository = Arc::new(InMemoryHistory {
            fail_insert: true,
            ..InMemoryHistory::default()
        });
        let storage = Arc::new(FakeStorage::default());
        let err = recorder(repository, storage.clone())
            .record(Some(Uuid::new_v4()), &outcome(Some("x")), Some(&png()))
            .await
            .unwrap_err();

        let stored_key = storage.keys.lock().unwrap()[0].clone();
        match &err {
            PersistenceError::Insert { orphaned_key, .. } => {
                assert_eq!(orphaned_key.as_deref(), Some(stored_key.as_str()));
            }
            other => panic!("expected an insert error, got {:?}", other),
        }
        assert!(err.to_string().contains(&stored_key));
    }

    #[tokio::test]
    async fn failed_text_insert_has_no_orphan() {
        let repository = Arc::new(InMemoryHistory {
            fail_insert: true,
            ..InMemoryHistory::default()
        });
        let err = recorder(repository, Arc::new(FakeStorage::default()))
            .record(Some(Uuid::new_v4()), &outcome(None), None)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            PersistenceError::Insert {
                orphaned_key: None,
                ..
            }
        ));
        assert!(!err.to_string().contains("orphaned"));
    }

    #[tokio::test]
    async fn listing_is_newest_first_with_id_tie_break() {
        let fixed = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        let repository = Arc::new(InMemoryHistory {
            fixed_time: Some(fixed),
            ..InMemoryHistory::default()
        });
        let recorder = recorder(repository, Arc::new(FakeStorage::default()));
        let owner = Uuid::new_v4();
        for _ in 0..4 {
            recorder.record(Some(owner), &outcome(None), None).await.unwrap();
        }

        let listed = recorder.list(owner).await.unwrap();
        let ids: Vec<Uuid> = listed.iter().map(|r| r.id).collect();
        let mut sorted = ids.clone();
        sorted.sort();
        assert_eq!(ids, sorted);
    }

    #[tokio::test]
    async fn listing_only_returns_own_records() {
        let repository = Arc::new(InMemoryHistory::default());
        let recorder = recorder(repository, Arc::new(FakeStorage::default()));
        let (alice, bob) = (Uuid::new_v4(), Uuid::new_v4());
        let first = recorder.record(Some(alice), &outcome(None), None).await.unwrap().unwrap();
        let second = recorder.record(Some(alice), &outcome(None), None).await.unwrap().unwrap();
        recorder.record(Some(bob), &outcome(None), None).await.unwrap();

        let listed = recorder.list(alice).await.unwrap();
        assert_eq!(listed.iter().map(|r| r.id).collect::<Vec<_>>(), vec![second.id, first.id]);
        assert!(recorder.find(bob, first.id).await.is_err());
        assert_eq!(recorder.find(alice, first.id).await.unwrap().id, first.id);
    }

    #[tokio::test]
    async fn watch_pushes_new_records_for_owner_only() {
        let repository = Arc::new(InMemoryHistory::default());
        let recorder = recorder(repository, Arc::new(FakeStorage::default()));
        let (alice, bob) = (Uuid::new_v4(), Uuid::new_v4());
        let existing = recorder.record(Some(alice), &outcome(None), None).await.unwrap().unwrap();

        let mut watch = recorder.watch(alice).await.unwrap();
        let initial = watch.next_snapshot().await.unwrap();
        assert_eq!(initial.len(), 1);

        recorder.record(Some(bob), &outcome(None), None).await.unwrap();
        let newest = recorder.record(Some(alice), &outcome(None), None).await.unwrap().unwrap();

        let snapshot = watch.next_snapshot().await.unwrap();
        assert_eq!(snapshot.iter().map(|r| r.id).collect::<Vec<_>>(), vec![newest.id, existing.id]);
    }

    #[tokio::test]
    async fn watch_ends_when_recorder_is_dropped() {
        let repository = Arc::new(InMemoryHistory::default());
        let recorder = recorder(repository, Arc::new(FakeStorage::default()));
        let mut watch = recorder.watch(Uuid::new_v4()).await.unwrap();
        assert_eq!(watch.next_snapshot().await, Some(vec![]));
        drop(recorder);
        assert_eq!(watch.next_snapshot().await, None);
    }
}
