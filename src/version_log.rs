//! Version log (component F, §4.F): the append-only history of snapshots
//! and changes for a document, backed by an abstract [`Store`].

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::diff::Op;
use crate::error::CoreError;
use crate::snapshot::DocumentSnapshot;
use crate::version::Version;

/// Identifies a document across the store and every coordinator.
pub type DocumentId = String;

/// A persisted record of one applied operation, per §3 "Change".
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Change {
    pub document_id: DocumentId,
    pub timestamp: DateTime<Utc>,
    pub source_version: Version,
    pub op: Op,
}

/// The persistence facade the core consumes (§6 "Persistence contract").
/// A real deployment backs this with a SQL or key-value store; tests and
/// the demo binary use [`InMemoryStore`].
#[async_trait]
pub trait Store: Send + Sync {
    async fn get_document(&self, id: &DocumentId) -> Result<Option<DocumentSnapshot>, CoreError>;
    async fn put_document(&self, id: &DocumentId, snapshot: DocumentSnapshot) -> Result<(), CoreError>;
    async fn append_version(&self, id: &DocumentId, snapshot: DocumentSnapshot) -> Result<(), CoreError>;
    async fn get_version(&self, id: &DocumentId, version: Version) -> Result<Option<DocumentSnapshot>, CoreError>;
    async fn list_versions(&self, id: &DocumentId) -> Result<Vec<Version>, CoreError>;
    async fn record_change(&self, change: Change) -> Result<(), CoreError>;
    /// Changes with `source_version` in the half-open interval
    /// `[from_version, to_version)`.
    async fn changes_between(&self, id: &DocumentId, from_version: Version, to_version: Version) -> Result<Vec<Change>, CoreError>;
}

#[derive(Default)]
struct DocumentRecord {
    current: Option<DocumentSnapshot>,
    versions: Vec<DocumentSnapshot>,
    changes: Vec<Change>,
}

/// A `Store` backed by process memory. Suitable for tests and the demo
/// binary; a production deployment would implement `Store` against
/// Postgres, SQLite, or a KV store instead.
#[derive(Default)]
pub struct InMemoryStore {
    documents: Mutex<HashMap<DocumentId, DocumentRecord>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        InMemoryStore::default()
    }
}

#[async_trait]
impl Store for InMemoryStore {
    async fn get_document(&self, id: &DocumentId) -> Result<Option<DocumentSnapshot>, CoreError> {
        let documents = self.documents.lock().expect("store mutex poisoned");
        Ok(documents.get(id).and_then(|r| r.current.clone()))
    }

    async fn put_document(&self, id: &DocumentId, snapshot: DocumentSnapshot) -> Result<(), CoreError> {
        let mut documents = self.documents.lock().expect("store mutex poisoned");
        documents.entry(id.clone()).or_default().current = Some(snapshot);
        Ok(())
    }

    async fn append_version(&self, id: &DocumentId, snapshot: DocumentSnapshot) -> Result<(), CoreError> {
        let mut documents = self.documents.lock().expect("store mutex poisoned");
        let record = documents.entry(id.clone()).or_default();
        if record.versions.iter().any(|v| v.version() == snapshot.version()) {
            return Err(CoreError::StorageUnavailable {
                reason: format!("version {} already recorded for document {id}", snapshot.version()),
            });
        }
        record.versions.push(snapshot.clone());
        record.current = Some(snapshot);
        Ok(())
    }

    async fn get_version(&self, id: &DocumentId, version: Version) -> Result<Option<DocumentSnapshot>, CoreError> {
        let documents = self.documents.lock().expect("store mutex poisoned");
        Ok(documents
            .get(id)
            .and_then(|r| r.versions.iter().find(|v| v.version() == version).cloned()))
    }

    async fn list_versions(&self, id: &DocumentId) -> Result<Vec<Version>, CoreError> {
        let documents = self.documents.lock().expect("store mutex poisoned");
        let mut versions: Vec<Version> = documents
            .get(id)
            .map(|r| r.versions.iter().map(|v| v.version()).collect())
            .unwrap_or_default();
        versions.sort_by(|a, b| b.cmp(a));
        Ok(versions)
    }

    async fn record_change(&self, change: Change) -> Result<(), CoreError> {
        let mut documents = self.documents.lock().expect("store mutex poisoned");
        documents.entry(change.document_id.clone()).or_default().changes.push(change);
        Ok(())
    }

    async fn changes_between(&self, id: &DocumentId, from_version: Version, to_version: Version) -> Result<Vec<Change>, CoreError> {
        let documents = self.documents.lock().expect("store mutex poisoned");
        Ok(documents
            .get(id)
            .map(|r| {
                r.changes
                    .iter()
                    .filter(|c| c.source_version >= from_version && c.source_version < to_version)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }
}

/// Thin, store-backed API over a document's version history (§4.F).
pub struct VersionLog<'s, S: Store> {
    document_id: DocumentId,
    store: &'s S,
}

impl<'s, S: Store> VersionLog<'s, S> {
    pub fn new(document_id: DocumentId, store: &'s S) -> Self {
        VersionLog { document_id, store }
    }

    /// Appends `snapshot` as a new version and records the change that
    /// produced it.
    pub async fn append(&self, snapshot: DocumentSnapshot, op: Op, source_version: Version) -> Result<(), CoreError> {
        self.store.append_version(&self.document_id, snapshot).await?;
        self.store
            .record_change(Change {
                document_id: self.document_id.clone(),
                timestamp: Utc::now(),
                source_version,
                op,
            })
            .await
    }

    /// Looks up a historical snapshot. `None` means the version is unknown
    /// to this log (never existed, or retention-expired); callers translate
    /// that into [`CoreError::UnknownBaseVersion`].
    pub async fn get(&self, version: Version) -> Result<Option<DocumentSnapshot>, CoreError> {
        self.store.get_version(&self.document_id, version).await
    }

    /// All recorded versions, newest first.
    pub async fn list(&self) -> Result<Vec<Version>, CoreError> {
        self.store.list_versions(&self.document_id).await
    }

    /// Changes recorded with `source_version` in `[from_version, to_version)`.
    pub async fn changes_between(&self, from_version: Version, to_version: Version) -> Result<Vec<Change>, CoreError> {
        self.store.changes_between(&self.document_id, from_version, to_version).await
    }

    /// Restores the document to the content at `target`, appending a new
    /// version that *copies* `target`'s content forward rather than
    /// rewriting history (§3 "Lifecycle").
    pub async fn restore_to(&self, target: Version) -> Result<DocumentSnapshot, CoreError> {
        let historical = self
            .get(target)
            .await?
            .ok_or(CoreError::UnknownBaseVersion { version: target.tenths() })?;
        let current = self
            .store
            .get_document(&self.document_id)
            .await?
            .ok_or(CoreError::UnknownBaseVersion { version: target.tenths() })?;

        let restored = DocumentSnapshot::new(current.version().next(), historical.table().clone(), historical.overlay().clone());
        self.store.append_version(&self.document_id, restored.clone()).await?;
        Ok(restored)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diff::DiffEngine;

    fn text_snapshot(text: &str, version: Version) -> DocumentSnapshot {
        let mut snap = DocumentSnapshot::empty();
        {
            let (table, overlay) = snap.split_mut();
            table.insert(0, text, overlay).unwrap();
        }
        DocumentSnapshot::new(version, snap.table().clone(), snap.overlay().clone())
    }

    #[tokio::test]
    async fn append_and_get_round_trip() {
        let store = InMemoryStore::new();
        let log = VersionLog::new("doc-1".to_string(), &store);
        let snap = text_snapshot("hello", Version::INITIAL.next());
        store.put_document(&"doc-1".to_string(), text_snapshot("hello", Version::INITIAL)).await.unwrap();

        log.append(
            snap.clone(),
            Op::Insert { position: 0, content: "hello".into() },
            Version::INITIAL,
        )
        .await
        .unwrap();

        let fetched = log.get(Version::INITIAL.next()).await.unwrap();
        assert_eq!(fetched, Some(snap));
        assert_eq!(log.get(Version::from_tenths(999)).await.unwrap(), None);
    }

    #[tokio::test]
    async fn restore_appends_rather_than_rewrites() {
        let store = InMemoryStore::new();
        let doc_id = "doc-1".to_string();
        let log = VersionLog::new(doc_id.clone(), &store);

        let v1 = text_snapshot("hello", Version::INITIAL);
        store.put_document(&doc_id, v1.clone()).await.unwrap();
        store.append_version(&doc_id, v1.clone()).await.unwrap();

        let v2 = text_snapshot("hello world", Version::INITIAL.next());
        log.append(v2.clone(), Op::Insert { position: 5, content: " world".into() }, Version::INITIAL)
            .await
            .unwrap();

        let restored = log.restore_to(Version::INITIAL).await.unwrap();
        assert_eq!(restored.text(), "hello");
        assert_eq!(restored.version(), v2.version().next());

        // the original v1.0 snapshot is untouched
        assert_eq!(log.get(Version::INITIAL).await.unwrap().unwrap().text(), "hello");
        let _ = DiffEngine::diff(&v1, &v2);
    }

    #[tokio::test]
    async fn duplicate_version_append_is_rejected() {
        let store = InMemoryStore::new();
        let doc_id = "doc-1".to_string();
        let snap = text_snapshot("x", Version::INITIAL);
        store.append_version(&doc_id, snap.clone()).await.unwrap();
        let err = store.append_version(&doc_id, snap).await.unwrap_err();
        assert!(matches!(err, CoreError::StorageUnavailable { .. }));
    }

    #[tokio::test]
    async fn changes_between_respects_half_open_interval() {
        let store = InMemoryStore::new();
        let doc_id = "doc-1".to_string();
        let log = VersionLog::new(doc_id.clone(), &store);

        for (text, version) in [("a", Version::INITIAL), ("ab", Version::INITIAL.next()), ("abc", Version::INITIAL.next().next())] {
            log.append(text_snapshot(text, version), Op::Insert { position: 0, content: text.into() }, version)
                .await
                .unwrap();
        }

        // [1.0, 1.2) includes the change recorded at 1.0 and 1.1, not 1.2.
        let changes = log.changes_between(Version::INITIAL, Version::INITIAL.next().next()).await.unwrap();
        let versions: Vec<Version> = changes.iter().map(|c| c.source_version).collect();
        assert_eq!(versions, vec![Version::INITIAL, Version::INITIAL.next()]);
    }
}
