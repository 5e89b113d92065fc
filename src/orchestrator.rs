#![allow(dead_code)]

//! C8: the sync orchestrator. Takes one [`Change`] set from C7 and drives it to completion
//! against the local vault and the remote document service, maintaining C2 and C4 as it goes.
//!
//! The parser/transformer/remote-writer boundary is deliberately abstract: SPEC_FULL.md keeps
//! the markdown parser and the remote API client out of scope, so this module only declares the
//! capability sets it consumes, the same way the teacher crate's `sync.rs` consumes
//! `ClientManager` without owning the HTTP layer.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::Semaphore;

use crate::cancellation::CancellationToken;
use crate::detector::{Change, ChangeType, Direction};
use crate::fingerprint;
use crate::link_registry::LinkRegistry;
use crate::remote::{RemoteDoc, RemoteWriter};
use crate::state_store::StateStore;
use crate::types::{FrontMatterValue, NoteRecord, OutcomeResult, SyncError, SyncOutcome, SyncStatus};

/// A note's content split into the shape the remote transformer and link registry need.
/// Parsing markdown itself is out of scope; this is the consumed interface.
pub struct ParsedNote {
    pub front_matter: BTreeMap<String, FrontMatterValue>,
    pub body: String,
    pub references: Vec<String>,
}

pub trait NoteParser: Send + Sync {
    fn parse(&self, raw: &[u8]) -> Result<ParsedNote, SyncError>;
}

pub trait NoteTransformer: Send + Sync {
    fn to_remote(&self, parsed: &ParsedNote) -> RemoteDoc;
    fn from_remote(&self, doc: &RemoteDoc) -> Vec<u8>;
}

pub struct Orchestrator<P, T, W> {
    vault_root: PathBuf,
    store: Arc<StateStore>,
    links: Arc<LinkRegistry>,
    parser: Arc<P>,
    transformer: Arc<T>,
    writer: Arc<W>,
    worker_count: usize,
}

/// Order is load-bearing: renames must land before the delete/create pair they would otherwise
/// decompose into is processed independently, and conflicts are deferred past every
/// unambiguous change so a clean sync pass never blocks on one that needs a human.
const PROCESSING_ORDER: [ChangeType; 5] = [
    ChangeType::Renamed,
    ChangeType::Deleted,
    ChangeType::Modified,
    ChangeType::Created,
    ChangeType::Conflict,
];

impl<P, T, W> Orchestrator<P, T, W>
where
    P: NoteParser + 'static,
    T: NoteTransformer + 'static,
    W: RemoteWriter + 'static,
{
    pub fn new(
        vault_root: impl Into<PathBuf>,
        store: Arc<StateStore>,
        links: Arc<LinkRegistry>,
        parser: P,
        transformer: T,
        writer: W,
        worker_count: usize,
    ) -> Self {
        Self {
            vault_root: vault_root.into(),
            store,
            links,
            parser: Arc::new(parser),
            transformer: Arc::new(transformer),
            writer: Arc::new(writer),
            worker_count: worker_count.max(1),
        }
    }

    /// Runs every change to completion, bucketed by [`PROCESSING_ORDER`] with up to
    /// `worker_count` changes in flight per bucket.
    #[tracing::instrument(skip_all, fields(changes = changes.len(), worker_count = self.worker_count))]
    pub async fn run(&self, changes: Vec<Change>, remote_parent_id: &str, token: &CancellationToken) -> Result<Vec<SyncOutcome>, SyncError> {
        let mut buckets: BTreeMap<usize, Vec<Change>> = BTreeMap::new();
        for change in changes {
            let order = PROCESSING_ORDER.iter().position(|t| *t == change.change_type).unwrap_or(PROCESSING_ORDER.len());
            buckets.entry(order).or_default().push(change);
        }

        let mut outcomes = Vec::new();
        for idx in 0..PROCESSING_ORDER.len() {
            let Some(bucket) = buckets.remove(&idx) else { continue };
            if token.is_cancelled() {
                for change in bucket {
                    outcomes.push(SyncOutcome {
                        path: change.path.clone(),
                        change_type: format!("{:?}", change.change_type),
                        direction: format!("{:?}", change.direction),
                        result: OutcomeResult::Skipped("cancelled".into()),
                    });
                }
                continue;
            }
            outcomes.extend(self.run_bucket(bucket, remote_parent_id, token).await);
        }

        Ok(outcomes)
    }

    #[tracing::instrument(skip_all, fields(bucket_size = bucket.len()))]
    async fn run_bucket(&self, bucket: Vec<Change>, remote_parent_id: &str, token: &CancellationToken) -> Vec<SyncOutcome> {
        let semaphore = Arc::new(Semaphore::new(self.worker_count));
        let mut tasks = tokio::task::JoinSet::new();

        for change in bucket {
            let permit = semaphore.clone();
            let vault_root = self.vault_root.clone();
            let store = self.store.clone();
            let links = self.links.clone();
            let parser = self.parser.clone();
            let transformer = self.transformer.clone();
            let writer = self.writer.clone();
            let token = token.clone();
            let parent_id = remote_parent_id.to_string();

            tasks.spawn(async move {
                let _permit = permit.acquire_owned().await.expect("semaphore closed");
                process_change(&vault_root, &store, &links, &*parser, &*transformer, &*writer, &parent_id, change, &token).await
            });
        }

        let mut outcomes = Vec::new();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(outcome) => outcomes.push(outcome),
                Err(_) => outcomes.push(SyncOutcome {
                    path: "<unknown>".into(),
                    change_type: "unknown".into(),
                    direction: "unknown".into(),
                    result: OutcomeResult::Failed("worker task panicked".into()),
                }),
            }
        }
        outcomes
    }
}

#[tracing::instrument(skip(vault_root, store, links, parser, transformer, writer, token, change, remote_parent_id), fields(path = %change.path, change_type = ?change.change_type, direction = ?change.direction))]
async fn process_change<P: NoteParser, T: NoteTransformer, W: RemoteWriter>(
    vault_root: &PathBuf,
    store: &StateStore,
    links: &LinkRegistry,
    parser: &P,
    transformer: &T,
    writer: &W,
    remote_parent_id: &str,
    change: Change,
    token: &CancellationToken,
) -> SyncOutcome {
    let change_type = format!("{:?}", change.change_type);
    let direction = format!("{:?}", change.direction);
    let path = change.path.clone();

    let result = if token.check().is_err() {
        Err(SyncError::Cancelled)
    } else {
        match change.change_type {
            ChangeType::Conflict => handle_conflict(store, &change).await,
            ChangeType::Deleted => handle_deleted(vault_root, store, links, writer, &change).await,
            ChangeType::Renamed => handle_renamed(vault_root, store, links, parser, transformer, writer, remote_parent_id, &change).await,
            ChangeType::Created | ChangeType::Modified => match change.direction {
                Direction::Pull => handle_pull(vault_root, store, links, parser, transformer, writer, &change).await,
                _ => handle_push(vault_root, store, links, parser, transformer, writer, remote_parent_id, &change).await,
            },
        }
    };

    let outcome_result = match result {
        Ok(()) => OutcomeResult::Ok,
        Err(SyncError::Cancelled) => OutcomeResult::Skipped("cancelled".into()),
        Err(e) => {
            tracing::error!(path = %path, change_type = %change_type, error = %e, "orchestrator action failed");
            OutcomeResult::Failed(e.to_string())
        }
    };

    SyncOutcome {
        path,
        change_type,
        direction,
        result: outcome_result,
    }
}

async fn handle_push<P: NoteParser, T: NoteTransformer, W: RemoteWriter>(
    vault_root: &PathBuf,
    store: &StateStore,
    links: &LinkRegistry,
    parser: &P,
    transformer: &T,
    writer: &W,
    remote_parent_id: &str,
    change: &Change,
) -> Result<(), SyncError> {
    let absolute = vault_root.join(&change.path);
    let raw = std::fs::read(&absolute)?;
    let hashes = fingerprint::hash_bytes(&raw);
    let parsed = parser.parse(&raw)?;
    for value in parsed.front_matter.values() {
        value.validate_depth()?;
    }
    let existing_remote_id = change.state.as_ref().and_then(|s| s.remote_id.clone());
    let (remote_id, remote_mtime) = match existing_remote_id {
        Some(id) if change.frontmatter_only => {
            match writer.update_metadata(&id, parsed.front_matter.clone()).await {
                Ok(mtime) => (id, mtime),
                Err(_) => {
                    let mtime = writer.update(&id, transformer.to_remote(&parsed)).await?;
                    (id, mtime)
                }
            }
        }
        Some(id) => {
            let mtime = writer.update(&id, transformer.to_remote(&parsed)).await?;
            (id, mtime)
        }
        None => writer.create(remote_parent_id, transformer.to_remote(&parsed)).await?,
    };

    let record = NoteRecord {
        local_path: change.path.clone(),
        remote_id: Some(remote_id),
        full_hash: hashes.full_hash,
        body_hash: hashes.body_hash,
        frontmatter_hash: hashes.frontmatter_hash,
        status: SyncStatus::Synced,
        last_sync: Some(crate::types::truncate_to_secs(Utc::now())),
        remote_mtime: Some(crate::types::truncate_to_secs(remote_mtime)),
    };
    store.put(&record)?;

    links.clear_from(&change.path)?;
    links.register(&change.path, &parsed.references)?;

    Ok(())
}

async fn handle_pull<P: NoteParser, T: NoteTransformer, W: RemoteWriter>(
    vault_root: &PathBuf,
    store: &StateStore,
    links: &LinkRegistry,
    parser: &P,
    transformer: &T,
    writer: &W,
    change: &Change,
) -> Result<(), SyncError> {
    let remote_id = change
        .state
        .as_ref()
        .and_then(|s| s.remote_id.clone())
        .ok_or_else(|| SyncError::InvalidReference(change.path.clone()))?;

    let doc = writer.fetch(&remote_id).await?;
    let raw = transformer.from_remote(&doc);

    let absolute = vault_root.join(&change.path);
    if let Some(parent) = absolute.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(&absolute, &raw)?;

    let hashes = fingerprint::hash_bytes(&raw);
    let parsed = parser.parse(&raw)?;

    let record = NoteRecord {
        local_path: change.path.clone(),
        remote_id: Some(remote_id),
        full_hash: hashes.full_hash,
        body_hash: hashes.body_hash,
        frontmatter_hash: hashes.frontmatter_hash,
        status: SyncStatus::Synced,
        last_sync: Some(crate::types::truncate_to_secs(Utc::now())),
        remote_mtime: change.remote_mtime.map(crate::types::truncate_to_secs),
    };
    store.put(&record)?;

    links.clear_from(&change.path)?;
    links.register(&change.path, &parsed.references)?;

    Ok(())
}

async fn handle_deleted<W: RemoteWriter>(
    vault_root: &PathBuf,
    store: &StateStore,
    links: &LinkRegistry,
    writer: &W,
    change: &Change,
) -> Result<(), SyncError> {
    match change.direction {
        Direction::Push => {
            if let Some(record) = &change.state {
                if let Some(remote_id) = &record.remote_id {
                    writer.archive(remote_id).await?;
                }
            }
        }
        _ => {
            let absolute = vault_root.join(&change.path);
            if absolute.exists() {
                std::fs::remove_file(&absolute)?;
            }
        }
    }

    store.delete(&change.path)?;
    links.clear_from(&change.path)?;
    Ok(())
}

async fn handle_renamed<P: NoteParser, T: NoteTransformer, W: RemoteWriter>(
    vault_root: &PathBuf,
    store: &StateStore,
    links: &LinkRegistry,
    parser: &P,
    transformer: &T,
    writer: &W,
    remote_parent_id: &str,
    change: &Change,
) -> Result<(), SyncError> {
    let old_path = change.old_path.clone().ok_or_else(|| SyncError::InvalidReference(change.path.clone()))?;

    let absolute = vault_root.join(&change.path);
    let raw = std::fs::read(&absolute)?;
    let hashes = fingerprint::hash_bytes(&raw);
    let parsed = parser.parse(&raw)?;
    for value in parsed.front_matter.values() {
        value.validate_depth()?;
    }
    let doc = transformer.to_remote(&parsed);

    let remote_id = change.state.as_ref().and_then(|s| s.remote_id.clone());
    let (remote_id, remote_mtime) = match remote_id {
        Some(id) => {
            let mtime = writer.update(&id, doc).await?;
            (id, mtime)
        }
        None => writer.create(remote_parent_id, doc).await?,
    };

    store.delete(&old_path)?;
    let record = NoteRecord {
        local_path: change.path.clone(),
        remote_id: Some(remote_id),
        full_hash: hashes.full_hash,
        body_hash: hashes.body_hash,
        frontmatter_hash: hashes.frontmatter_hash,
        status: SyncStatus::Synced,
        last_sync: Some(crate::types::truncate_to_secs(Utc::now())),
        remote_mtime: Some(crate::types::truncate_to_secs(remote_mtime)),
    };
    store.put(&record)?;

    links.update_source(&old_path, &change.path)?;
    links.clear_from(&change.path)?;
    links.register(&change.path, &parsed.references)?;

    Ok(())
}

async fn handle_conflict(store: &StateStore, change: &Change) -> Result<(), SyncError> {
    // Conflicts are surfaced, never auto-resolved: the orchestrator marks the record so the
    // next detection pass keeps reporting it until a human edits one side to match.
    if let Some(mut record) = change.state.clone() {
        record.status = SyncStatus::Conflict;
        if let Some(h) = &change.local_hash {
            record.full_hash = h.clone();
        }
        if let Some(t) = change.remote_mtime {
            record.remote_mtime = Some(crate::types::truncate_to_secs(t));
        }
        store.put(&record)?;
    }
    Err(SyncError::Conflict(change.path.clone()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detector::{self, Direction as Dir};
    use crate::link_registry::LinkRegistry;
    use crate::remote::fixtures::FakeRemote;
    use crate::scanner::VaultScanner;
    use crate::state_store::StateStore;
    use tempfile::TempDir;

    struct EchoParser;
    impl NoteParser for EchoParser {
        fn parse(&self, raw: &[u8]) -> Result<ParsedNote, SyncError> {
            Ok(ParsedNote {
                front_matter: BTreeMap::new(),
                body: String::from_utf8_lossy(raw).into_owned(),
                references: Vec::new(),
            })
        }
    }

    struct PlainTransformer;
    impl NoteTransformer for PlainTransformer {
        fn to_remote(&self, parsed: &ParsedNote) -> RemoteDoc {
            RemoteDoc {
                blocks: vec![crate::remote::RemoteBlock {
                    kind: "paragraph".into(),
                    text: parsed.body.clone(),
                }],
                front_matter: parsed.front_matter.clone(),
            }
        }

        fn from_remote(&self, doc: &RemoteDoc) -> Vec<u8> {
            doc.blocks.iter().map(|b| b.text.clone()).collect::<Vec<_>>().join("\n").into_bytes()
        }
    }

    /// Wraps a [`FakeRemote`] but actually implements `update_metadata`, so tests can tell a
    /// metadata-only push apart from a full body update.
    struct MetadataTrackingRemote {
        inner: FakeRemote,
        metadata_calls: std::sync::atomic::AtomicUsize,
        full_update_calls: std::sync::atomic::AtomicUsize,
    }

    impl MetadataTrackingRemote {
        fn new() -> Self {
            Self {
                inner: FakeRemote::new(),
                metadata_calls: std::sync::atomic::AtomicUsize::new(0),
                full_update_calls: std::sync::atomic::AtomicUsize::new(0),
            }
        }
    }

    #[async_trait::async_trait]
    impl crate::remote::RemoteWriter for MetadataTrackingRemote {
        async fn create(&self, parent_id: &str, doc: RemoteDoc) -> Result<(crate::types::RemoteId, chrono::DateTime<Utc>), SyncError> {
            self.inner.create(parent_id, doc).await
        }

        async fn update(&self, remote_id: &crate::types::RemoteId, doc: RemoteDoc) -> Result<chrono::DateTime<Utc>, SyncError> {
            self.full_update_calls.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            self.inner.update(remote_id, doc).await
        }

        async fn update_metadata(
            &self,
            remote_id: &crate::types::RemoteId,
            front_matter: BTreeMap<String, FrontMatterValue>,
        ) -> Result<chrono::DateTime<Utc>, SyncError> {
            self.metadata_calls.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            let mut doc = self.inner.docs.lock().unwrap().get(remote_id).cloned().unwrap_or_default();
            doc.front_matter = front_matter;
            self.inner.update(remote_id, doc).await
        }

        async fn archive(&self, remote_id: &crate::types::RemoteId) -> Result<(), SyncError> {
            self.inner.archive(remote_id).await
        }

        async fn fetch(&self, remote_id: &crate::types::RemoteId) -> Result<RemoteDoc, SyncError> {
            self.inner.fetch(remote_id).await
        }
    }

    fn write(dir: &TempDir, rel: &str, content: &str) {
        let path = dir.path().join(rel);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).unwrap();
        }
        std::fs::write(path, content).unwrap();
    }

    #[tokio::test]
    async fn frontmatter_only_push_uses_metadata_endpoint() {
        let dir = TempDir::new().unwrap();
        write(&dir, "c.md", "body\n");
        let store = StateStore::open_in_memory().unwrap();
        let links = LinkRegistry::new(Arc::new(StateStore::open_in_memory().unwrap()));
        let writer = MetadataTrackingRemote::new();
        let (remote_id, _) = writer.create("parent", RemoteDoc::default()).await.unwrap();

        let change = Change {
            path: "c.md".to_string(),
            old_path: None,
            change_type: crate::detector::ChangeType::Modified,
            direction: Dir::Push,
            local_hash: None,
            remote_hash: None,
            local_mtime: None,
            remote_mtime: None,
            frontmatter_only: true,
            state: Some(NoteRecord {
                local_path: "c.md".into(),
                remote_id: Some(remote_id.clone()),
                full_hash: "h".into(),
                body_hash: "h".into(),
                frontmatter_hash: "h".into(),
                status: SyncStatus::Synced,
                last_sync: Some(Utc::now()),
                remote_mtime: Some(Utc::now()),
            }),
        };

        let vault_root = dir.path().to_path_buf();
        handle_push(&vault_root, &store, &links, &EchoParser, &PlainTransformer, &writer, "parent", &change)
            .await
            .unwrap();

        assert_eq!(writer.metadata_calls.load(std::sync::atomic::Ordering::SeqCst), 1);
        assert_eq!(writer.full_update_calls.load(std::sync::atomic::Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn created_file_is_pushed_and_recorded() {
        let dir = TempDir::new().unwrap();
        write(&dir, "a.md", "hello\n");
        let store = Arc::new(StateStore::open_in_memory().unwrap());
        let links = Arc::new(LinkRegistry::new(store.clone()));
        let writer = FakeRemote::new();
        let orchestrator = Orchestrator::new(dir.path(), store.clone(), links, EchoParser, PlainTransformer, writer, 2);

        let scanner = VaultScanner::new(dir.path(), &[]).unwrap();
        let token = CancellationToken::new();
        let changes = detector::detect(&scanner, &store, None, &token).await.unwrap();
        let outcomes = orchestrator.run(changes, "root-page", &token).await.unwrap();

        assert_eq!(outcomes.len(), 1);
        assert!(matches!(outcomes[0].result, OutcomeResult::Ok));
        let record = store.get("a.md").unwrap().unwrap();
        assert_eq!(record.status, SyncStatus::Synced);
        assert!(record.remote_id.is_some());
    }

    #[tokio::test]
    async fn deleted_local_file_archives_remote() {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(StateStore::open_in_memory().unwrap());
        let links = Arc::new(LinkRegistry::new(store.clone()));
        let writer = FakeRemote::new();
        writer.seed(crate::types::RemotePageInfo {
            id: "R1".into(),
            last_edited_time: Utc::now(),
            archived: false,
            error: None,
        });

        let hashes = fingerprint::hash_bytes(b"gone\n");
        store
            .put(&NoteRecord {
                local_path: "gone.md".into(),
                remote_id: Some("R1".into()),
                full_hash: hashes.full_hash,
                body_hash: hashes.body_hash,
                frontmatter_hash: hashes.frontmatter_hash,
                status: SyncStatus::Synced,
                last_sync: Some(Utc::now()),
                remote_mtime: Some(Utc::now()),
            })
            .unwrap();

        let orchestrator = Orchestrator::new(dir.path(), store.clone(), links, EchoParser, PlainTransformer, writer, 1);
        let scanner = VaultScanner::new(dir.path(), &[]).unwrap();
        let token = CancellationToken::new();
        let changes = detector::detect(&scanner, &store, None, &token).await.unwrap();
        let outcomes = orchestrator.run(changes, "root-page", &token).await.unwrap();

        assert_eq!(outcomes.len(), 1);
        assert!(matches!(outcomes[0].result, OutcomeResult::Ok));
        assert!(store.get("gone.md").unwrap().is_none());
    }

    #[tokio::test]
    async fn conflict_is_reported_as_failed_and_not_overwritten() {
        let dir = TempDir::new().unwrap();
        write(&dir, "c.md", "local edit\n");
        let store = Arc::new(StateStore::open_in_memory().unwrap());
        let links = Arc::new(LinkRegistry::new(store.clone()));

        let prior = fingerprint::hash_bytes(b"original\n");
        let t0 = Utc::now();
        store
            .put(&NoteRecord {
                local_path: "c.md".into(),
                remote_id: Some("R5".into()),
                full_hash: prior.full_hash,
                body_hash: prior.body_hash,
                frontmatter_hash: prior.frontmatter_hash,
                status: SyncStatus::Synced,
                last_sync: Some(t0),
                remote_mtime: Some(crate::types::truncate_to_secs(t0)),
            })
            .unwrap();

        let fake = FakeRemote::new();
        fake.seed(crate::types::RemotePageInfo {
            id: "R5".into(),
            last_edited_time: t0 + chrono::Duration::seconds(60),
            archived: false,
            error: None,
        });

        let scanner = VaultScanner::new(dir.path(), &[]).unwrap();
        let token = CancellationToken::new();
        let changes = detector::detect(&scanner, &store, Some(&fake), &token).await.unwrap();
        assert_eq!(changes[0].direction, Dir::Both);

        // handle_conflict never calls the writer, so an unseeded instance is fine here.
        let writer = FakeRemote::new();
        let orchestrator = Orchestrator::new(dir.path(), store.clone(), links, EchoParser, PlainTransformer, writer, 1);
        let outcomes = orchestrator.run(changes, "root-page", &token).await.unwrap();

        assert_eq!(outcomes.len(), 1);
        assert!(matches!(outcomes[0].result, OutcomeResult::Failed(_)));
        let record = store.get("c.md").unwrap().unwrap();
        assert_eq!(record.status, SyncStatus::Conflict);
    }
}
