//! Repository boundary for countdown records.

use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use uuid::Uuid;

use crate::countdown::{CountdownRecord, NewCountdown, dday_label};

/// Which uniqueness constraint a create collided with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UniqueKey {
    Name,
    Source,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    #[error("a record with the same {0:?} already exists")]
    Duplicate(UniqueKey),
    #[error("record store unavailable: {0}")]
    Unavailable(String),
}

#[async_trait]
pub trait CountdownStore: Send + Sync {
    async fn get_by_name(&self, name: &str) -> Result<Option<CountdownRecord>, StoreError>;

    async fn get_by_source(
        &self,
        source: &str,
        source_id: &str,
    ) -> Result<Option<CountdownRecord>, StoreError>;

    /// Atomic insert. Fails with [`StoreError::Duplicate`] when `name` or
    /// `(source, source_id)` is already taken.
    async fn create(&self, new: NewCountdown) -> Result<CountdownRecord, StoreError>;

    /// Records with `release_date >= as_of`, ascending by release date.
    async fn list_upcoming(&self, as_of: NaiveDate) -> Result<Vec<CountdownRecord>, StoreError>;

    /// Recompute every cached label for `as_of`. Returns the number of rows changed.
    async fn refresh_labels(&self, as_of: NaiveDate) -> Result<u64, StoreError>;

    /// Liveness check used by the health route.
    async fn ping(&self) -> Result<(), StoreError> {
        Ok(())
    }
}

/// Process-local store used when no database is configured, and in tests.
#[derive(Debug, Default)]
pub struct MemoryStore {
    records: Mutex<Vec<CountdownRecord>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.lock().map(|r| r.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn with_records<T>(
        &self,
        f: impl FnOnce(&mut Vec<CountdownRecord>) -> Result<T, StoreError>,
    ) -> Result<T, StoreError> {
        let mut guard = self
            .records
            .lock()
            .map_err(|_| StoreError::Unavailable("memory store lock poisoned".to_string()))?;
        f(&mut guard)
    }
}

#[async_trait]
impl CountdownStore for MemoryStore {
    async fn get_by_name(&self, name: &str) -> Result<Option<CountdownRecord>, StoreError> {
        self.with_records(|records| Ok(records.iter().find(|r| r.name == name).cloned()))
    }

    async fn get_by_source(
        &self,
        source: &str,
        source_id: &str,
    ) -> Result<Option<CountdownRecord>, StoreError> {
        self.with_records(|records| {
            Ok(records
                .iter()
                .find(|r| r.source == source && r.source_id == source_id)
                .cloned())
        })
    }

    async fn create(&self, new: NewCountdown) -> Result<CountdownRecord, StoreError> {
        self.with_records(|records| {
            let draft = new.draft;
            if records.iter().any(|r| r.name == draft.name) {
                return Err(StoreError::Duplicate(UniqueKey::Name));
            }
            if records
                .iter()
                .any(|r| r.source == draft.source && r.source_id == draft.source_id)
            {
                return Err(StoreError::Duplicate(UniqueKey::Source));
            }
            let record = CountdownRecord {
                id: Uuid::now_v7(),
                name: draft.name,
                canonical_title: draft.canonical_title,
                release_date: draft.release_date,
                content_type: draft.content_type,
                source: draft.source,
                source_id: draft.source_id,
                is_re_release: draft.is_re_release,
                dday_label: new.dday_label,
                overview: draft.overview,
                country: draft.country,
                poster_url: draft.poster_url,
                distributor: draft.distributor,
                director: draft.director,
                cast: draft.cast,
                genre: draft.genre,
                last_updated: Utc::now(),
            };
            records.push(record.clone());
            Ok(record)
        })
    }

    async fn list_upcoming(&self, as_of: NaiveDate) -> Result<Vec<CountdownRecord>, StoreError> {
        self.with_records(|records| {
            let mut upcoming: Vec<CountdownRecord> = records
                .iter()
                .filter(|r| r.release_date >= as_of)
                .cloned()
                .collect();
            upcoming.sort_by(|a, b| a.release_date.cmp(&b.release_date).then(a.id.cmp(&b.id)));
            Ok(upcoming)
        })
    }

    async fn refresh_labels(&self, as_of: NaiveDate) -> Result<u64, StoreError> {
        self.with_records(|records| {
            let mut changed = 0;
            for record in records.iter_mut() {
                let label = dday_label(record.release_date, as_of);
                if record.dday_label != label {
                    record.dday_label = label;
                    record.last_updated = Utc::now();
                    changed += 1;
                }
            }
            Ok(changed)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::countdown::{ContentType, CountdownDraft};

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).expect("valid date")
    }

    fn draft(name: &str, source_id: &str, release: NaiveDate) -> CountdownDraft {
        CountdownDraft {
            name: name.to_string(),
            canonical_title: name.to_string(),
            release_date: release,
            content_type: ContentType::Movie,
            source: "tmdb".to_string(),
            source_id: source_id.to_string(),
            is_re_release: false,
            overview: None,
            country: None,
            poster_url: None,
            distributor: None,
            director: None,
            cast: Vec::new(),
            genre: Vec::new(),
        }
    }

    #[tokio::test]
    async fn create_enforces_both_unique_keys() {
        let store = MemoryStore::new();
        let today = date(2026, 2, 18);
        store
            .create(draft("a", "1", date(2026, 3, 20)).into_new(today))
            .await
            .expect("first insert succeeds");

        let same_name = store
            .create(draft("a", "2", date(2026, 3, 20)).into_new(today))
            .await;
        assert_eq!(same_name, Err(StoreError::Duplicate(UniqueKey::Name)));

        let same_source = store
            .create(draft("b", "1", date(2026, 3, 20)).into_new(today))
            .await;
        assert_eq!(same_source, Err(StoreError::Duplicate(UniqueKey::Source)));
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn list_upcoming_filters_and_sorts() {
        let store = MemoryStore::new();
        let today = date(2026, 2, 18);
        for (name, id, release) in [
            ("late", "1", date(2026, 9, 1)),
            ("past", "2", date(2026, 1, 1)),
            ("soon", "3", date(2026, 2, 18)),
        ] {
            store
                .create(draft(name, id, release).into_new(today))
                .await
                .expect("insert");
        }

        let upcoming = store.list_upcoming(today).await.expect("list");
        let names: Vec<&str> = upcoming.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(names, vec!["soon", "late"]);
    }

    #[tokio::test]
    async fn refresh_labels_recomputes_for_new_day() {
        let store = MemoryStore::new();
        let created_on = date(2026, 2, 18);
        store
            .create(draft("a", "1", date(2026, 3, 20)).into_new(created_on))
            .await
            .expect("insert");

        assert_eq!(store.refresh_labels(created_on).await, Ok(0));
        assert_eq!(store.refresh_labels(date(2026, 2, 19)).await, Ok(1));
        let record = store.get_by_name("a").await.expect("get").expect("exists");
        assert_eq!(record.dday_label, "D-29");
    }
}
