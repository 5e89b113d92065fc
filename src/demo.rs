#![allow(dead_code)]

//! A4: demo external adapters. The markdown parser, the block transformer, and the remote API
//! client are deliberately out of scope for the engine itself, but `vaultsync sync` still needs
//! something runnable without a live network dependency. These are intentionally plain — a real
//! deployment swaps them for a proper parser and an HTTP-backed remote client.

use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::Utc;

use crate::orchestrator::{NoteParser, NoteTransformer, ParsedNote};
use crate::remote::{RemoteBlock, RemoteDoc, RemoteMetadataProvider, RemoteWriter};
use crate::types::{FrontMatterValue, RemoteId, RemoteInfoError, RemotePageInfo, SyncError};

/// Splits `---`-delimited YAML-ish front-matter (`key: value` per line, no nesting) from the
/// body, and collects `[[wiki-link]]` references from the body text.
pub struct PlainNoteParser;

impl NoteParser for PlainNoteParser {
    fn parse(&self, raw: &[u8]) -> Result<ParsedNote, SyncError> {
        let text = String::from_utf8_lossy(raw);
        let (front_matter_text, body) = split_front_matter(&text);
        let front_matter = parse_front_matter(front_matter_text);
        let references = extract_references(body);

        Ok(ParsedNote {
            front_matter,
            body: body.to_string(),
            references,
        })
    }
}

fn split_front_matter(text: &str) -> (&str, &str) {
    let Some(rest) = text.strip_prefix("---\n") else {
        return ("", text);
    };
    let Some(end) = rest.find("\n---\n") else {
        return ("", text);
    };
    (&rest[..end], &rest[end + 5..])
}

fn parse_front_matter(text: &str) -> BTreeMap<String, FrontMatterValue> {
    let mut out = BTreeMap::new();
    for line in text.lines() {
        let Some((key, value)) = line.split_once(':') else { continue };
        let key = key.trim().to_string();
        let value = value.trim();
        if key.is_empty() {
            continue;
        }
        out.insert(key, parse_scalar(value));
    }
    out
}

fn parse_scalar(value: &str) -> FrontMatterValue {
    if value.is_empty() {
        return FrontMatterValue::Null;
    }
    if let Ok(i) = value.parse::<i64>() {
        return FrontMatterValue::Int(i);
    }
    if let Ok(f) = value.parse::<f64>() {
        return FrontMatterValue::Float(f);
    }
    if value == "true" || value == "false" {
        return FrontMatterValue::Bool(value == "true");
    }
    FrontMatterValue::String(value.trim_matches('"').to_string())
}

/// Finds `[[target]]` occurrences; nested brackets and escaped pipes are not handled (a real
/// parser is out of scope).
fn extract_references(body: &str) -> Vec<String> {
    let mut out = Vec::new();
    let mut rest = body;
    while let Some(start) = rest.find("[[") {
        let after = &rest[start + 2..];
        let Some(end) = after.find("]]") else { break };
        let inner = &after[..end];
        let target = inner.split('|').next().unwrap_or(inner).trim();
        if !target.is_empty() {
            out.push(target.to_string());
        }
        rest = &after[end + 2..];
    }
    out
}

/// Renders a `ParsedNote` to one paragraph block per front-matter emission plus one block per
/// body line, and reverses that for `from_remote`.
pub struct PassthroughTransformer;

impl NoteTransformer for PassthroughTransformer {
    fn to_remote(&self, parsed: &ParsedNote) -> RemoteDoc {
        let blocks = parsed
            .body
            .lines()
            .map(|line| RemoteBlock {
                kind: "paragraph".to_string(),
                text: line.to_string(),
            })
            .collect();

        RemoteDoc {
            blocks,
            front_matter: parsed.front_matter.clone(),
        }
    }

    fn from_remote(&self, doc: &RemoteDoc) -> Vec<u8> {
        let mut out = String::new();
        if !doc.front_matter.is_empty() {
            out.push_str("---\n");
            for (key, value) in &doc.front_matter {
                out.push_str(&format!("{key}: {}\n", render_scalar(value)));
            }
            out.push_str("---\n");
        }
        for block in &doc.blocks {
            out.push_str(&block.text);
            out.push('\n');
        }
        out.into_bytes()
    }
}

fn render_scalar(value: &FrontMatterValue) -> String {
    match value {
        FrontMatterValue::Null => String::new(),
        FrontMatterValue::Bool(b) => b.to_string(),
        FrontMatterValue::Int(i) => i.to_string(),
        FrontMatterValue::Float(f) => f.to_string(),
        FrontMatterValue::String(s) => s.clone(),
        FrontMatterValue::Seq(_) | FrontMatterValue::Map(_) => String::new(),
    }
}

/// A fully in-process stand-in for the remote document service: an id-keyed page store with
/// monotonic edit timestamps, enough to exercise every orchestrator code path end-to-end.
pub struct InMemoryRemote {
    pages: Mutex<HashMap<RemoteId, RemotePageInfo>>,
    docs: Mutex<HashMap<RemoteId, RemoteDoc>>,
}

impl Default for InMemoryRemote {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryRemote {
    pub fn new() -> Self {
        Self {
            pages: Mutex::new(HashMap::new()),
            docs: Mutex::new(HashMap::new()),
        }
    }
}

#[async_trait]
impl RemoteMetadataProvider for InMemoryRemote {
    async fn get_info(&self, remote_id: &RemoteId) -> Result<RemotePageInfo, SyncError> {
        self.pages
            .lock()
            .unwrap()
            .get(remote_id)
            .cloned()
            .ok_or_else(|| SyncError::NotFound(remote_id.clone()))
    }

    async fn get_info_batch(&self, ids: &[RemoteId]) -> Result<HashMap<RemoteId, RemotePageInfo>, SyncError> {
        let pages = self.pages.lock().unwrap();
        let mut out = HashMap::new();
        for id in ids {
            match pages.get(id) {
                Some(info) => {
                    out.insert(id.clone(), info.clone());
                }
                None => {
                    out.insert(
                        id.clone(),
                        RemotePageInfo {
                            id: id.clone(),
                            last_edited_time: Utc::now(),
                            archived: false,
                            error: Some(RemoteInfoError::NotFound),
                        },
                    );
                }
            }
        }
        Ok(out)
    }
}

#[async_trait]
impl RemoteWriter for InMemoryRemote {
    async fn create(&self, _parent_id: &str, doc: RemoteDoc) -> Result<(RemoteId, chrono::DateTime<Utc>), SyncError> {
        let id = uuid::Uuid::new_v4().to_string();
        let now = Utc::now();
        self.docs.lock().unwrap().insert(id.clone(), doc);
        self.pages.lock().unwrap().insert(
            id.clone(),
            RemotePageInfo {
                id: id.clone(),
                last_edited_time: now,
                archived: false,
                error: None,
            },
        );
        Ok((id, now))
    }

    async fn update(&self, remote_id: &RemoteId, doc: RemoteDoc) -> Result<chrono::DateTime<Utc>, SyncError> {
        let now = Utc::now();
        self.docs.lock().unwrap().insert(remote_id.clone(), doc);
        let mut pages = self.pages.lock().unwrap();
        let info = pages
            .get_mut(remote_id)
            .ok_or_else(|| SyncError::NotFound(remote_id.clone()))?;
        info.last_edited_time = now;
        Ok(now)
    }

    async fn archive(&self, remote_id: &RemoteId) -> Result<(), SyncError> {
        let mut pages = self.pages.lock().unwrap();
        let info = pages
            .get_mut(remote_id)
            .ok_or_else(|| SyncError::NotFound(remote_id.clone()))?;
        info.archived = true;
        Ok(())
    }

    async fn fetch(&self, remote_id: &RemoteId) -> Result<RemoteDoc, SyncError> {
        self.docs
            .lock()
            .unwrap()
            .get(remote_id)
            .cloned()
            .ok_or_else(|| SyncError::NotFound(remote_id.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_front_matter_and_body() {
        let parsed = PlainNoteParser.parse(b"---\ntitle: Hello\ncount: 3\n---\nSee [[Other Note]].\n").unwrap();
        assert_eq!(parsed.front_matter.get("title"), Some(&FrontMatterValue::String("Hello".to_string())));
        assert_eq!(parsed.front_matter.get("count"), Some(&FrontMatterValue::Int(3)));
        assert_eq!(parsed.references, vec!["Other Note".to_string()]);
    }

    #[test]
    fn no_front_matter_is_all_body() {
        let parsed = PlainNoteParser.parse(b"just text\n").unwrap();
        assert!(parsed.front_matter.is_empty());
        assert_eq!(parsed.body, "just text\n");
    }

    #[test]
    fn alias_pipe_syntax_keeps_target_only() {
        let parsed = PlainNoteParser.parse(b"[[Real Target|displayed text]]\n").unwrap();
        assert_eq!(parsed.references, vec!["Real Target".to_string()]);
    }

    #[test]
    fn transformer_round_trips_front_matter_and_body() {
        let parsed = PlainNoteParser.parse(b"---\ntitle: Hello\n---\nline one\nline two\n").unwrap();
        let doc = PassthroughTransformer.to_remote(&parsed);
        let rendered = PassthroughTransformer.from_remote(&doc);
        let reparsed = PlainNoteParser.parse(&rendered).unwrap();
        assert_eq!(reparsed.front_matter.get("title"), parsed.front_matter.get("title"));
        assert_eq!(reparsed.body.trim(), parsed.body.trim());
    }

    #[tokio::test]
    async fn in_memory_remote_create_then_fetch_round_trips() {
        let remote = InMemoryRemote::new();
        let doc = RemoteDoc {
            blocks: vec![RemoteBlock {
                kind: "paragraph".into(),
                text: "hello".into(),
            }],
            front_matter: BTreeMap::new(),
        };
        let (id, _) = remote.create("parent", doc).await.unwrap();
        let fetched = remote.fetch(&id).await.unwrap();
        assert_eq!(fetched.blocks[0].text, "hello");
    }

    #[tokio::test]
    async fn in_memory_remote_archive_then_get_info_reflects_it() {
        let remote = InMemoryRemote::new();
        let (id, _) = remote.create("parent", RemoteDoc::default()).await.unwrap();
        remote.archive(&id).await.unwrap();
        let info = remote.get_info(&id).await.unwrap();
        assert!(info.archived);
    }

    #[tokio::test]
    async fn in_memory_remote_batch_fills_not_found_for_missing_ids() {
        let remote = InMemoryRemote::new();
        let batch = remote.get_info_batch(&["ghost".to_string()]).await.unwrap();
        assert_eq!(batch.get("ghost").unwrap().error, Some(RemoteInfoError::NotFound));
    }
}
