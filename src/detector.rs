#![allow(dead_code)]

//! C7: the change detector. The heart of the engine — combines the vault scanner (C3), the
//! state store (C2), the content fingerprinter (C1), and optionally a remote metadata
//! provider (C5/C6) into one classified [`Change`] set.

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};

use crate::cancellation::CancellationToken;
use crate::fingerprint::{self, ContentHashes};
use crate::remote::RemoteMetadataProvider;
use crate::scanner::VaultScanner;
use crate::state_store::StateStore;
use crate::types::{NoteRecord, RemoteId, SyncError, SyncStatus};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeType {
    Created,
    Modified,
    Deleted,
    Renamed,
    Conflict,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Push,
    Pull,
    Both,
}

#[derive(Debug, Clone)]
pub struct Change {
    pub path: String,
    pub old_path: Option<String>,
    pub change_type: ChangeType,
    pub direction: Direction,
    pub local_hash: Option<String>,
    pub remote_hash: Option<String>,
    pub local_mtime: Option<DateTime<Utc>>,
    pub remote_mtime: Option<DateTime<Utc>>,
    pub frontmatter_only: bool,
    pub state: Option<NoteRecord>,
}

impl Change {
    fn new(path: impl Into<String>, change_type: ChangeType, direction: Direction) -> Self {
        Self {
            path: path.into(),
            old_path: None,
            change_type,
            direction,
            local_hash: None,
            remote_hash: None,
            local_mtime: None,
            remote_mtime: None,
            frontmatter_only: false,
            state: None,
        }
    }
}

/// Runs one full detection pass. `remote` is consulted only if present; absence degrades the
/// detector to local-only, matching SPEC_FULL.md §4.6's "only if C6 is present" rule.
#[tracing::instrument(skip(scanner, store, remote, token))]
pub async fn detect(
    scanner: &VaultScanner,
    store: &StateStore,
    remote: Option<&dyn RemoteMetadataProvider>,
    token: &CancellationToken,
) -> Result<Vec<Change>, SyncError> {
    let entries = {
        let _span = tracing::info_span!("local_pass").entered();
        scanner.scan(token)?
    };
    let local = local_pass_inner(&entries, store, token)?;
    let mut changes = local.changes;

    if let Some(remote) = remote {
        use tracing::Instrument;
        remote_pass(&entries, store, remote, &mut changes, &local.renamed_away, token)
            .instrument(tracing::info_span!("remote_pass"))
            .await?;
    }

    Ok(changes)
}

struct LocalPassResult {
    changes: Vec<Change>,
    renamed_away: HashSet<String>,
}

/// Exposed separately so the remote pass can know which paths a rename consumed (SPEC_FULL.md
/// §4.6: "Remote pass never overrides a Renamed change ... a rename removed the record from S").
fn local_pass_inner(
    entries: &[crate::types::VaultEntry],
    store: &StateStore,
    token: &CancellationToken,
) -> Result<LocalPassResult, SyncError> {
    let all_records: HashMap<String, NoteRecord> = store.list("")?.into_iter().map(|r| (r.local_path.clone(), r)).collect();

    let mut working = all_records.clone();
    let mut new_files: HashMap<String, (ContentHashes, DateTime<Utc>)> = HashMap::new();
    let mut changes = Vec::new();

    for entry in entries {
        token.check()?;
        let Ok(bytes) = std::fs::read(&entry.absolute_path) else {
            // Unreadable: drop it from further local-pass consideration without emitting a
            // change, but surface it so a human notices a file that disappeared mid-scan or
            // has gone unreadable (permissions, I/O error).
            tracing::warn!(path = %entry.relative_path, "skipping unreadable file during local pass");
            working.remove(&entry.relative_path);
            continue;
        };
        let cur_hashes = fingerprint::hash_bytes(&bytes);

        match working.remove(&entry.relative_path) {
            None => {
                new_files.insert(entry.relative_path.clone(), (cur_hashes, entry.modified));
            }
            Some(prior) => {
                if fingerprint::content_changed(&cur_hashes, &prior_hashes(&prior)) {
                    let mut change = Change::new(entry.relative_path.clone(), ChangeType::Modified, Direction::Push);
                    change.local_hash = Some(cur_hashes.full_hash.clone());
                    change.local_mtime = Some(entry.modified);
                    change.frontmatter_only = fingerprint::frontmatter_only_changed(&cur_hashes, &prior_hashes(&prior));

                    if prior.status == SyncStatus::Conflict {
                        change.change_type = ChangeType::Conflict;
                        change.direction = Direction::Both;
                    }
                    change.state = Some(prior);
                    changes.push(change);
                }
            }
        }
    }

    // Remaining `working` entries are paths no longer present locally.
    let mut deletion_candidates: HashMap<String, NoteRecord> = working
        .into_iter()
        .filter(|(_, r)| r.remote_id.is_some() && r.status == SyncStatus::Synced)
        .collect();

    let mut renamed_away = HashSet::new();

    // Rename detection: first match wins, one deletion pairs with at most one new file.
    let deletion_paths: Vec<String> = deletion_candidates.keys().cloned().collect();
    for d in deletion_paths {
        let Some(record) = deletion_candidates.get(&d) else { continue };
        let target_hash = record.full_hash.clone();

        let matched_new = new_files
            .iter()
            .find(|(_, (hashes, _))| hashes.full_hash == target_hash)
            .map(|(path, _)| path.clone());

        if let Some(n) = matched_new {
            let record = deletion_candidates.remove(&d).unwrap();
            let (hashes, mtime) = new_files.remove(&n).unwrap();
            let mut change = Change::new(n, ChangeType::Renamed, Direction::Push);
            change.old_path = Some(d.clone());
            change.local_hash = Some(hashes.full_hash);
            change.local_mtime = Some(mtime);
            change.state = Some(record);
            changes.push(change);
            renamed_away.insert(d);
        }
    }

    // Remaining new files: Created/Push.
    for (path, (hashes, mtime)) in new_files {
        let mut change = Change::new(path, ChangeType::Created, Direction::Push);
        change.local_hash = Some(hashes.full_hash);
        change.local_mtime = Some(mtime);
        changes.push(change);
    }

    // Remaining deletion candidates: Deleted/Push.
    for (path, record) in deletion_candidates {
        let mut change = Change::new(path, ChangeType::Deleted, Direction::Push);
        change.local_hash = Some(record.full_hash.clone());
        change.state = Some(record);
        changes.push(change);
    }

    Ok(LocalPassResult { changes, renamed_away })
}

fn prior_hashes(record: &NoteRecord) -> ContentHashes {
    ContentHashes {
        full_hash: record.full_hash.clone(),
        body_hash: record.body_hash.clone(),
        frontmatter_hash: record.frontmatter_hash.clone(),
    }
}

async fn remote_pass(
    entries: &[crate::types::VaultEntry],
    store: &StateStore,
    remote: &dyn RemoteMetadataProvider,
    changes: &mut Vec<Change>,
    renamed_away: &HashSet<String>,
    token: &CancellationToken,
) -> Result<(), SyncError> {
    let all_records: HashMap<String, NoteRecord> = store.list("")?.into_iter().map(|r| (r.local_path.clone(), r)).collect();

    let remote_id_to_path: HashMap<RemoteId, String> = all_records
        .iter()
        .filter(|(path, r)| r.status == SyncStatus::Synced && r.remote_id.is_some() && !renamed_away.contains(*path))
        .map(|(path, r)| (r.remote_id.clone().unwrap(), path.clone()))
        .collect();

    if remote_id_to_path.is_empty() {
        return Ok(());
    }

    let ids: Vec<RemoteId> = remote_id_to_path.keys().cloned().collect();
    let batch = match remote.get_info_batch(&ids).await {
        Ok(b) => b,
        Err(e) => {
            // Graceful degradation to local-only, per §4.6 step 6.
            tracing::warn!(error = %e, ids = ids.len(), "remote metadata batch failed; degrading to local-only pass");
            return Ok(());
        }
    };

    for (rid, info) in batch {
        token.check()?;
        if info.error.is_some() {
            continue;
        }
        let Some(path) = remote_id_to_path.get(&rid) else { continue };
        let Some(record) = all_records.get(path) else { continue };

        if info.archived {
            if let Some(existing) = find_change_mut(changes, path) {
                upgrade_to_conflict(existing, info.last_edited_time);
            } else {
                let mut change = Change::new(path.clone(), ChangeType::Deleted, Direction::Pull);
                change.remote_mtime = Some(info.last_edited_time);
                change.state = Some(record.clone());
                changes.push(change);
            }
            continue;
        }

        let remote_modified = crate::types::truncate_to_secs(info.last_edited_time)
            > crate::types::truncate_to_secs(record.remote_mtime.unwrap_or_else(|| DateTime::<Utc>::from_timestamp(0, 0).unwrap()));

        if !remote_modified {
            continue;
        }

        if let Some(existing) = find_change_mut(changes, path) {
            upgrade_to_conflict(existing, info.last_edited_time);
            continue;
        }

        let local_entry = entries.iter().find(|e| &e.relative_path == path);

        match local_entry {
            None => {
                let mut change = Change::new(path.clone(), ChangeType::Modified, Direction::Pull);
                change.remote_mtime = Some(info.last_edited_time);
                change.state = Some(record.clone());
                changes.push(change);
            }
            Some(entry) => {
                let Ok(bytes) = std::fs::read(&entry.absolute_path) else {
                    continue;
                };
                let cur_hashes = fingerprint::hash_bytes(&bytes);
                if cur_hashes.full_hash != record.full_hash {
                    let mut change = Change::new(path.clone(), ChangeType::Conflict, Direction::Both);
                    change.local_hash = Some(cur_hashes.full_hash);
                    change.local_mtime = Some(entry.modified);
                    change.remote_mtime = Some(info.last_edited_time);
                    change.state = Some(record.clone());
                    changes.push(change);
                } else {
                    let mut change = Change::new(path.clone(), ChangeType::Modified, Direction::Pull);
                    change.remote_mtime = Some(info.last_edited_time);
                    change.state = Some(record.clone());
                    changes.push(change);
                }
            }
        }
    }

    Ok(())
}

fn find_change_mut<'a>(changes: &'a mut [Change], path: &str) -> Option<&'a mut Change> {
    changes.iter_mut().find(|c| c.path == path)
}

fn upgrade_to_conflict(change: &mut Change, remote_mtime: DateTime<Utc>) {
    change.change_type = ChangeType::Conflict;
    change.direction = Direction::Both;
    change.remote_mtime = Some(remote_mtime);
}
