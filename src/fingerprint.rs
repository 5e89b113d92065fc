#![allow(dead_code)]

//! C1: deterministic content fingerprints of a note's body, front-matter, and combined content.
//!
//! Hashing substrate is `blake3`, same as the teacher crate's `FileIndexer::get_file_metadata`.

use blake3::Hasher;

const DELIMITER: &str = "---";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContentHashes {
    pub full_hash: String,
    pub body_hash: String,
    pub frontmatter_hash: String,
}

/// Normalizes CRLF to LF, splits front-matter from body, and hashes both plus their composition.
pub fn hash_bytes(raw: &[u8]) -> ContentHashes {
    let normalized = normalize_crlf(raw);
    let (fm_bytes, body_bytes) = split_frontmatter(&normalized);

    let frontmatter_hash = hash_hex(fm_bytes);
    let body_hash = hash_hex(body_bytes);

    let mut composer = Hasher::new();
    composer.update(b"fm:");
    composer.update(frontmatter_hash.as_bytes());
    composer.update(b"body:");
    composer.update(body_hash.as_bytes());
    let full_hash = composer.finalize().to_hex().to_string();

    ContentHashes {
        full_hash,
        body_hash,
        frontmatter_hash,
    }
}

fn hash_hex(bytes: &[u8]) -> String {
    blake3::hash(bytes).to_hex().to_string()
}

fn normalize_crlf(raw: &[u8]) -> Vec<u8> {
    if !raw.contains(&b'\r') {
        return raw.to_vec();
    }
    let mut out = Vec::with_capacity(raw.len());
    let mut i = 0;
    while i < raw.len() {
        if raw[i] == b'\r' && i + 1 < raw.len() && raw[i + 1] == b'\n' {
            out.push(b'\n');
            i += 2;
        } else {
            out.push(raw[i]);
            i += 1;
        }
    }
    out
}

/// Splits `---`-delimited front-matter from the body. Front-matter is empty unless the first
/// line is exactly `---` and a matching closing `---` line follows.
fn split_frontmatter(normalized: &[u8]) -> (&[u8], &[u8]) {
    let text_start = &normalized[..];
    let Some(first_line_end) = memchr_newline(text_start) else {
        return (&[], normalized);
    };
    let first_line = &text_start[..first_line_end];
    if first_line != DELIMITER.as_bytes() {
        return (&[], normalized);
    }

    let after_first = &text_start[first_line_end + 1..];
    let mut offset = 0usize;
    loop {
        let Some(line_end) = memchr_newline(&after_first[offset..]) else {
            // no closing delimiter on a later, newline-terminated line: treat whole thing as body
            return (&[], normalized);
        };
        let line = &after_first[offset..offset + line_end];
        if line == DELIMITER.as_bytes() {
            let fm = &after_first[..offset];
            let body_start = offset + line_end + 1;
            let body = if body_start <= after_first.len() {
                &after_first[body_start..]
            } else {
                &[]
            };
            return (fm, body);
        }
        offset += line_end + 1;
        if offset >= after_first.len() {
            return (&[], normalized);
        }
    }
}

fn memchr_newline(haystack: &[u8]) -> Option<usize> {
    haystack.iter().position(|&b| b == b'\n')
}

/// True iff `cur` differs from `prior` in full_hash (content changed in any way).
pub fn content_changed(cur: &ContentHashes, prior: &ContentHashes) -> bool {
    cur.full_hash != prior.full_hash
}

/// True iff only the front-matter changed (body hash held steady).
pub fn frontmatter_only_changed(cur: &ContentHashes, prior: &ContentHashes) -> bool {
    cur.frontmatter_hash != prior.frontmatter_hash && cur.body_hash == prior.body_hash
}

/// True iff the body changed (regardless of front-matter).
pub fn body_changed(cur: &ContentHashes, prior: &ContentHashes) -> bool {
    cur.body_hash != prior.body_hash
}
