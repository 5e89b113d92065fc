#![allow(dead_code)]

//! C5: the capability interface over the remote document service's metadata surface, plus the
//! wider remote reader/writer interfaces C8 consumes (SPEC_FULL.md §6). The remote API client
//! itself — HTTP, rate limiting, pagination — is out of scope; this module only declares the
//! capability sets the engine depends on, per the teacher's `#[async_trait]` pattern (see
//! `ClientManager`/`NetworkManager` in the teacher's `network.rs`).

use std::collections::HashMap;

use async_trait::async_trait;

use crate::types::{FrontMatterValue, RemoteId, RemotePageInfo, SyncError};

/// A remote document's block-model representation, produced by the transformer.
#[derive(Debug, Clone, Default)]
pub struct RemoteDoc {
    pub blocks: Vec<RemoteBlock>,
    pub front_matter: std::collections::BTreeMap<String, FrontMatterValue>,
}

#[derive(Debug, Clone)]
pub struct RemoteBlock {
    pub kind: String,
    pub text: String,
}

/// C5: per-document and batch metadata lookup over the remote.
#[async_trait]
pub trait RemoteMetadataProvider: Send + Sync {
    async fn get_info(&self, remote_id: &RemoteId) -> Result<RemotePageInfo, SyncError>;

    /// Callers may receive fewer entries than `len(ids)` from the backend; implementations
    /// must fill in a `NotFound` entry for every id absent from the backend's response so the
    /// caller can always iterate the full input list.
    async fn get_info_batch(&self, ids: &[RemoteId]) -> Result<HashMap<RemoteId, RemotePageInfo>, SyncError>;
}

/// The remote writer interface C8 invokes for push/pull actions (SPEC_FULL.md §6).
#[async_trait]
pub trait RemoteWriter: Send + Sync {
    async fn create(&self, parent_id: &str, doc: RemoteDoc) -> Result<(RemoteId, chrono::DateTime<chrono::Utc>), SyncError>;

    async fn update(&self, remote_id: &RemoteId, doc: RemoteDoc) -> Result<chrono::DateTime<chrono::Utc>, SyncError>;

    /// Optional fast path for front-matter-only pushes. The default errors so that callers
    /// (see `orchestrator::handle_push`) fall back to a full [`update`](Self::update).
    async fn update_metadata(
        &self,
        remote_id: &RemoteId,
        front_matter: std::collections::BTreeMap<String, FrontMatterValue>,
    ) -> Result<chrono::DateTime<chrono::Utc>, SyncError> {
        let _ = front_matter;
        Err(SyncError::RemoteUnavailable(format!(
            "update_metadata not supported for {remote_id}"
        )))
    }

    async fn archive(&self, remote_id: &RemoteId) -> Result<(), SyncError>;

    async fn fetch(&self, remote_id: &RemoteId) -> Result<RemoteDoc, SyncError>;
}

#[async_trait]
impl<T: RemoteMetadataProvider + ?Sized> RemoteMetadataProvider for std::sync::Arc<T> {
    async fn get_info(&self, remote_id: &RemoteId) -> Result<RemotePageInfo, SyncError> {
        (**self).get_info(remote_id).await
    }

    async fn get_info_batch(&self, ids: &[RemoteId]) -> Result<HashMap<RemoteId, RemotePageInfo>, SyncError> {
        (**self).get_info_batch(ids).await
    }
}

#[async_trait]
impl<T: RemoteWriter + ?Sized> RemoteWriter for std::sync::Arc<T> {
    async fn create(&self, parent_id: &str, doc: RemoteDoc) -> Result<(RemoteId, chrono::DateTime<chrono::Utc>), SyncError> {
        (**self).create(parent_id, doc).await
    }

    async fn update(&self, remote_id: &RemoteId, doc: RemoteDoc) -> Result<chrono::DateTime<chrono::Utc>, SyncError> {
        (**self).update(remote_id, doc).await
    }

    async fn archive(&self, remote_id: &RemoteId) -> Result<(), SyncError> {
        (**self).archive(remote_id).await
    }

    async fn fetch(&self, remote_id: &RemoteId) -> Result<RemoteDoc, SyncError> {
        (**self).fetch(remote_id).await
    }
}
