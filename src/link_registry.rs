#![allow(dead_code)]

//! C4: the link registry. Decouples symbolic cross-note references from remote IDs.
//!
//! Persistence is delegated to [`StateStore`]'s `links`/`aliases` tables; this module owns
//! reference parsing, resolution order, fuzzy repair, backlinks, and statistics.

use std::collections::HashMap;
use std::sync::Arc;

use crate::state_store::StateStore;
use crate::types::{AliasKind, LinkRecord, RemoteId, SyncError};

pub struct LinkRegistry {
    store: Arc<StateStore>,
}

/// A reference as written in a note, split into its symbolic components.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedReference {
    pub target: String,
    pub heading: Option<String>,
    pub block_id: Option<String>,
}

/// The outcome of resolving a single reference.
#[derive(Debug, Clone)]
pub struct ResolvedReference {
    pub remote_id: Option<RemoteId>,
    pub target_path: Option<String>,
    pub heading: Option<String>,
    pub block_id: Option<String>,
    pub fuzzy: bool,
}

#[derive(Debug, Clone, Default)]
pub struct LinkStats {
    pub total: usize,
    pub resolved: usize,
    pub unresolved: usize,
    pub by_source: HashMap<String, usize>,
}

/// One row of a `repair_links` report.
#[derive(Debug, Clone)]
pub struct RepairCandidate {
    pub link_id: i64,
    pub source_path: String,
    pub target_name: String,
    pub suggested_path: String,
    pub suggested_remote_id: Option<RemoteId>,
}

/// Maximum Levenshtein distance for a fuzzy match, per SPEC_FULL.md §4.4 / §9's fixed answer
/// to the open question about the fuzzy threshold.
const FUZZY_MAX_DISTANCE: usize = 2;

impl LinkRegistry {
    pub fn new(store: Arc<StateStore>) -> Self {
        Self { store }
    }

    pub fn register(&self, source: &str, targets: &[String]) -> Result<(), SyncError> {
        self.store.register_links(source, targets)
    }

    pub fn clear_from(&self, source: &str) -> Result<(), SyncError> {
        self.store.clear_links_from(source)
    }

    pub fn update_source(&self, old: &str, new: &str) -> Result<(), SyncError> {
        self.store.update_link_source(old, new)
    }

    pub fn register_alias(&self, path: &str, alias: &str, kind: AliasKind) -> Result<(), SyncError> {
        self.store.register_alias(path, alias, kind)
    }

    /// Strips a trailing `.md`, `#heading`, and `^block-id` suffix, per SPEC_FULL.md §4.4.
    pub fn parse_reference(raw: &str) -> ParsedReference {
        let mut rest = raw.trim();

        let mut block_id = None;
        if let Some(idx) = rest.rfind('^') {
            block_id = Some(rest[idx + 1..].to_string());
            rest = &rest[..idx];
        }

        let mut heading = None;
        if let Some(idx) = rest.find('#') {
            heading = Some(rest[idx + 1..].to_string());
            rest = &rest[..idx];
        }

        let target = rest.strip_suffix(".md").unwrap_or(rest).to_string();

        ParsedReference {
            target,
            heading,
            block_id,
        }
    }

    /// Resolves a raw reference to a remote id, following the order in SPEC_FULL.md §4.4.
    pub fn resolve(&self, raw: &str, fuzzy: bool) -> Result<ResolvedReference, SyncError> {
        let parsed = self.resolve_extended(raw, fuzzy)?;
        Ok(parsed)
    }

    pub fn resolve_extended(&self, raw: &str, fuzzy: bool) -> Result<ResolvedReference, SyncError> {
        let parsed = Self::parse_reference(raw);
        let target = &parsed.target;

        // 1: path reference, exact.
        if target.contains('/') {
            let candidate = format!("{target}.md");
            if let Some(record) = self.store.get(&candidate)? {
                return Ok(self.hit(record.local_path, record.remote_id, &parsed, false));
            }
        }

        // 2: name-only, exact (root or any directory).
        let suffix_candidate = format!("{target}.md");
        let suffix_with_slash = format!("/{target}.md");
        for path in self.store.all_local_paths()? {
            if path == suffix_candidate || path.ends_with(&suffix_with_slash) {
                let record = self.store.get(&path)?;
                if let Some(record) = record {
                    return Ok(self.hit(record.local_path, record.remote_id, &parsed, false));
                }
            }
        }

        // 3: alias table.
        if let Some(alias) = self.store.find_alias(target)? {
            if let Some(record) = self.store.get(&alias.local_path)? {
                return Ok(self.hit(record.local_path, record.remote_id, &parsed, false));
            }
        }

        // 4: fuzzy, opt-in.
        if fuzzy {
            if let Some(path) = self.fuzzy_match(target)? {
                if let Some(record) = self.store.get(&path)? {
                    return Ok(self.hit(record.local_path, record.remote_id, &parsed, true));
                }
            }
        }

        Ok(ResolvedReference {
            remote_id: None,
            target_path: None,
            heading: parsed.heading,
            block_id: parsed.block_id,
            fuzzy: false,
        })
    }

    fn hit(
        &self,
        local_path: String,
        remote_id: Option<RemoteId>,
        parsed: &ParsedReference,
        fuzzy: bool,
    ) -> ResolvedReference {
        ResolvedReference {
            remote_id,
            target_path: Some(local_path),
            heading: parsed.heading.clone(),
            block_id: parsed.block_id.clone(),
            fuzzy,
        }
    }

    /// Nearest local-path basename by Levenshtein distance, within [`FUZZY_MAX_DISTANCE`],
    /// with ties yielding unresolved (SPEC_FULL.md §9's fixed answer to the tie-break question).
    fn fuzzy_match(&self, target: &str) -> Result<Option<String>, SyncError> {
        let target_lower = target.to_ascii_lowercase();
        let mut best: Option<(usize, String)> = None;
        let mut tied = false;

        for path in self.store.all_local_paths()? {
            let stem = basename_stem(&path);
            let distance = strsim::levenshtein(&stem.to_ascii_lowercase(), &target_lower);
            if distance > FUZZY_MAX_DISTANCE {
                continue;
            }
            match &best {
                None => best = Some((distance, path)),
                Some((best_dist, _)) if distance < *best_dist => {
                    best = Some((distance, path));
                    tied = false;
                }
                Some((best_dist, _)) if distance == *best_dist => {
                    tied = true;
                }
                _ => {}
            }
        }

        if tied {
            return Ok(None);
        }
        Ok(best.map(|(_, path)| path))
    }

    /// Iterates unresolved links and either reports (dry run) or rewrites them.
    pub fn repair_links(&self, dry_run: bool) -> Result<Vec<RepairCandidate>, SyncError> {
        let mut candidates = Vec::new();
        for link in self.store.unresolved_links()? {
            let Some(path) = self.fuzzy_match(&link.target_name)? else {
                continue;
            };
            let record = self.store.get(&path)?;
            let remote_id = record.and_then(|r| r.remote_id);

            candidates.push(RepairCandidate {
                link_id: link.id,
                source_path: link.source_path.clone(),
                target_name: link.target_name.clone(),
                suggested_path: path.clone(),
                suggested_remote_id: remote_id.clone(),
            });

            if !dry_run {
                self.store
                    .resolve_link(link.id, Some(&path), remote_id.as_deref(), remote_id.is_some())?;
            }
        }
        Ok(candidates)
    }

    /// Links whose `target_path` matches `target_path`, or whose raw `target_name` equals
    /// the basename stem of `target_path`.
    pub fn backlinks(&self, target_path: &str) -> Result<Vec<LinkRecord>, SyncError> {
        let basename = basename_stem(target_path);
        self.store.links_targeting(target_path, &basename)
    }

    pub fn stats(&self) -> Result<LinkStats, SyncError> {
        let links = self.store.all_links()?;
        let mut stats = LinkStats::default();
        for link in &links {
            stats.total += 1;
            if link.resolved {
                stats.resolved += 1;
            } else {
                stats.unresolved += 1;
            }
            *stats.by_source.entry(link.source_path.clone()).or_insert(0) += 1;
        }
        Ok(stats)
    }
}

fn basename_stem(path: &str) -> String {
    let base = path.rsplit('/').next().unwrap_or(path);
    base.strip_suffix(".md").unwrap_or(base).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{NoteRecord, SyncStatus};

    fn registry_with(paths: &[(&str, &str)]) -> LinkRegistry {
        let store = Arc::new(StateStore::open_in_memory().unwrap());
        for (path, remote_id) in paths {
            let mut rec = NoteRecord::new_pending(*path);
            rec.status = SyncStatus::Synced;
            rec.remote_id = Some(remote_id.to_string());
            rec.full_hash = "h".into();
            rec.body_hash = "h".into();
            rec.frontmatter_hash = "h".into();
            store.put(&rec).unwrap();
        }
        LinkRegistry::new(store)
    }

    #[test]
    fn parse_reference_strips_all_suffixes() {
        let parsed = LinkRegistry::parse_reference("folder/Note.md#Heading^block1");
        assert_eq!(parsed.target, "folder/Note");
        assert_eq!(parsed.heading.as_deref(), Some("Heading"));
        assert_eq!(parsed.block_id.as_deref(), Some("block1"));
    }

    #[test]
    fn parse_reference_without_suffixes() {
        let parsed = LinkRegistry::parse_reference("Plain Name");
        assert_eq!(parsed.target, "Plain Name");
        assert!(parsed.heading.is_none());
        assert!(parsed.block_id.is_none());
    }

    #[test]
    fn resolves_by_exact_name() {
        let reg = registry_with(&[("target-note.md", "R1")]);
        let resolved = reg.resolve("target-note", false).unwrap();
        assert_eq!(resolved.remote_id.as_deref(), Some("R1"));
    }

    #[test]
    fn resolves_by_path_reference() {
        let reg = registry_with(&[("folder/sub/Note.md", "R1")]);
        let resolved = reg.resolve("folder/sub/Note", false).unwrap();
        assert_eq!(resolved.remote_id.as_deref(), Some("R1"));
    }

    #[test]
    fn resolves_by_alias() {
        let reg = registry_with(&[("target-note.md", "R1")]);
        reg.register_alias("target-note.md", "Target Note", AliasKind::Title).unwrap();
        let resolved = reg.resolve("Target Note", false).unwrap();
        assert_eq!(resolved.remote_id.as_deref(), Some("R1"));
    }

    #[test]
    fn fuzzy_off_leaves_unresolved() {
        let reg = registry_with(&[("target-note.md", "R1")]);
        let resolved = reg.resolve("Targett Note", false).unwrap();
        assert!(resolved.remote_id.is_none());
    }

    #[test]
    fn fuzzy_on_resolves_within_distance() {
        let reg = registry_with(&[("target-note.md", "R1")]);
        let resolved = reg.resolve("target-notee", true).unwrap();
        assert_eq!(resolved.remote_id.as_deref(), Some("R1"));
        assert!(resolved.fuzzy);
    }

    #[test]
    fn fuzzy_ties_yield_unresolved() {
        let reg = registry_with(&[("aaa.md", "R1"), ("aab.md", "R2")]);
        // distance 1 from both "aaa" and "aab"
        let resolved = reg.resolve("aaX", true).unwrap();
        assert!(resolved.remote_id.is_none());
    }

    #[test]
    fn repair_dry_run_does_not_mutate() {
        let reg = registry_with(&[("target-note.md", "R1")]);
        reg.register("source.md", &["Targett Note".to_string()]).unwrap();
        let candidates = reg.repair_links(true).unwrap();
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].suggested_path, "target-note.md");

        let stats = reg.stats().unwrap();
        assert_eq!(stats.unresolved, 1);
    }

    #[test]
    fn repair_apply_rewrites_link() {
        let reg = registry_with(&[("target-note.md", "R1")]);
        reg.register("source.md", &["Targett Note".to_string()]).unwrap();
        reg.repair_links(false).unwrap();
        let stats = reg.stats().unwrap();
        assert_eq!(stats.resolved, 1);
        assert_eq!(stats.unresolved, 0);
    }

    #[test]
    fn backlinks_match_path_and_basename() {
        let reg = registry_with(&[("target.md", "R1")]);
        reg.register("a.md", &["target".to_string()]).unwrap();
        reg.register("b.md", &["target".to_string()]).unwrap();
        let backlinks = reg.backlinks("target.md").unwrap();
        assert_eq!(backlinks.len(), 2);
    }

    #[test]
    fn stats_group_by_source() {
        let reg = registry_with(&[("target.md", "R1")]);
        reg.register("a.md", &["target".to_string(), "other".to_string()]).unwrap();
        let stats = reg.stats().unwrap();
        assert_eq!(stats.total, 2);
        assert_eq!(*stats.by_source.get("a.md").unwrap(), 2);
    }
}
