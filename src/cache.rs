#![allow(dead_code)]

//! C6: a TTL cache in front of C5 to coalesce repeated metadata lookups during a sync pass.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::remote::RemoteMetadataProvider;
use crate::types::{RemoteId, RemotePageInfo, SyncError};

/// Injected clock source, so tests can control TTL expiry deterministically (SPEC_FULL.md §4.5).
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A clock the test suite can advance deterministically.
pub struct FakeClock(Mutex<DateTime<Utc>>);

impl FakeClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self(Mutex::new(start))
    }

    pub fn advance(&self, d: Duration) {
        let mut t = self.0.lock().unwrap();
        *t += chrono::Duration::from_std(d).unwrap();
    }
}

impl Clock for FakeClock {
    fn now(&self) -> DateTime<Utc> {
        *self.0.lock().unwrap()
    }
}

struct CacheEntry {
    info: RemotePageInfo,
    fetched_at: DateTime<Utc>,
}

/// Wraps a [`RemoteMetadataProvider`] with a shared, single-writer-per-pass TTL cache.
pub struct CachingMetadataProvider<P: RemoteMetadataProvider> {
    inner: P,
    clock: Box<dyn Clock>,
    ttl: Duration,
    entries: Mutex<HashMap<RemoteId, CacheEntry>>,
}

impl<P: RemoteMetadataProvider> CachingMetadataProvider<P> {
    pub fn new(inner: P, ttl: Duration) -> Self {
        Self::with_clock(inner, ttl, Box::new(SystemClock))
    }

    pub fn with_clock(inner: P, ttl: Duration, clock: Box<dyn Clock>) -> Self {
        Self {
            inner,
            clock,
            ttl,
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub fn clear(&self) {
        self.entries.lock().unwrap().clear();
    }

    pub fn clear_one(&self, id: &RemoteId) {
        self.entries.lock().unwrap().remove(id);
    }

    fn fresh(&self, entry: &CacheEntry) -> bool {
        let age = self.clock.now() - entry.fetched_at;
        age < chrono::Duration::from_std(self.ttl).unwrap_or(chrono::Duration::zero())
    }
}

#[async_trait]
impl<P: RemoteMetadataProvider> RemoteMetadataProvider for CachingMetadataProvider<P> {
    async fn get_info(&self, remote_id: &RemoteId) -> Result<RemotePageInfo, SyncError> {
        {
            let entries = self.entries.lock().unwrap();
            if let Some(entry) = entries.get(remote_id) {
                if self.fresh(entry) {
                    return Ok(entry.info.clone());
                }
            }
        }

        let info = self.inner.get_info(remote_id).await?;
        self.entries.lock().unwrap().insert(
            remote_id.clone(),
            CacheEntry {
                info: info.clone(),
                fetched_at: self.clock.now(),
            },
        );
        Ok(info)
    }

    async fn get_info_batch(&self, ids: &[RemoteId]) -> Result<HashMap<RemoteId, RemotePageInfo>, SyncError> {
        let mut out = HashMap::new();
        let mut uncached = Vec::new();

        {
            let entries = self.entries.lock().unwrap();
            for id in ids {
                match entries.get(id) {
                    Some(entry) if self.fresh(entry) => {
                        out.insert(id.clone(), entry.info.clone());
                    }
                    _ => uncached.push(id.clone()),
                }
            }
        }

        if !uncached.is_empty() {
            let fetched = self.inner.get_info_batch(&uncached).await?;
            let mut entries = self.entries.lock().unwrap();
            let now = self.clock.now();
            for (id, info) in fetched {
                entries.insert(
                    id.clone(),
                    CacheEntry {
                        info: info.clone(),
                        fetched_at: now,
                    },
                );
                out.insert(id, info);
            }
        }

        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::fixtures::FakeRemote;
    use crate::types::RemoteInfoError;

    fn page(id: &str) -> RemotePageInfo {
        RemotePageInfo {
            id: id.to_string(),
            last_edited_time: Utc::now(),
            archived: false,
            error: None,
        }
    }

    #[tokio::test]
    async fn repeat_lookup_within_ttl_hits_cache_once() {
        let fake = FakeRemote::new();
        fake.seed(page("R1"));
        let clock = FakeClock::new(Utc::now());
        let cache = CachingMetadataProvider::with_clock(fake, Duration::from_secs(300), Box::new(clock));

        cache.get_info(&"R1".to_string()).await.unwrap();
        cache.get_info(&"R1".to_string()).await.unwrap();

        assert_eq!(cache.inner.call_count(), 1);
    }

    #[tokio::test]
    async fn clear_forces_refetch() {
        let fake = FakeRemote::new();
        fake.seed(page("R1"));
        let clock = FakeClock::new(Utc::now());
        let cache = CachingMetadataProvider::with_clock(fake, Duration::from_secs(300), Box::new(clock));

        cache.get_info(&"R1".to_string()).await.unwrap();
        cache.clear_one(&"R1".to_string());
        cache.get_info(&"R1".to_string()).await.unwrap();

        assert_eq!(cache.inner.call_count(), 2);
    }

    #[test_log::test(tokio::test)]
    async fn expiry_forces_refetch() {
        let fake = FakeRemote::new();
        fake.seed(page("R1"));
        let clock = std::sync::Arc::new(FakeClock::new(Utc::now()));

        struct ArcClock(std::sync::Arc<FakeClock>);
        impl Clock for ArcClock {
            fn now(&self) -> DateTime<Utc> {
                self.0.now()
            }
        }

        let cache = CachingMetadataProvider::with_clock(fake, Duration::from_secs(5), Box::new(ArcClock(clock.clone())));
        cache.get_info(&"R1".to_string()).await.unwrap();
        clock.advance(Duration::from_secs(10));
        cache.get_info(&"R1".to_string()).await.unwrap();

        assert_eq!(cache.inner.call_count(), 2);
    }

    #[tokio::test]
    async fn batch_splits_cached_and_uncached() {
        let fake = FakeRemote::new();
        fake.seed(page("R1"));
        fake.seed(page("R2"));
        let clock = FakeClock::new(Utc::now());
        let cache = CachingMetadataProvider::with_clock(fake, Duration::from_secs(300), Box::new(clock));

        cache.get_info(&"R1".to_string()).await.unwrap();
        let batch = cache
            .get_info_batch(&["R1".to_string(), "R2".to_string()])
            .await
            .unwrap();

        assert_eq!(batch.len(), 2);
        // one call for the initial get_info, one batch call for just R2
        assert_eq!(cache.inner.call_count(), 2);
    }

    #[tokio::test]
    async fn missing_id_surfaces_not_found_entry() {
        let fake = FakeRemote::new();
        let clock = FakeClock::new(Utc::now());
        let cache = CachingMetadataProvider::with_clock(fake, Duration::from_secs(300), Box::new(clock));

        let batch = cache.get_info_batch(&["ghost".to_string()]).await.unwrap();
        assert_eq!(batch.get("ghost").unwrap().error, Some(RemoteInfoError::NotFound));
    }
}
