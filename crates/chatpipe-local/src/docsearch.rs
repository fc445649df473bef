//! Relevance search over local document trees.
//!
//! Filesystem-bound and blocking; async callers should run it on a blocking thread.

use chatpipe_core::{DocSearchHit, DocSearchRequest, DocSearchResponse, MatchType};
use std::path::Path;

const SKIPPED_DIRS: &[&str] = &["node_modules"];

// Files above this size are matched by name only.
const MAX_CONTENT_BYTES: u64 = 16 * 1024 * 1024;

const SNIPPET_BEFORE: usize = 100;
const SNIPPET_AFTER: usize = 200;

/// True iff `p` exists and is a directory.
pub fn validate_path(p: &str) -> bool {
    let ok = Path::new(p).is_dir();
    tracing::debug!(path = p, valid = ok, "validate path");
    ok
}

/// Lowercased space-separated terms, single characters dropped.
pub fn search_terms(query: &str) -> Vec<String> {
    query
        .to_lowercase()
        .split(' ')
        .filter(|t| t.chars().count() > 1)
        .map(str::to_string)
        .collect()
}

fn is_hidden(name: &str) -> bool {
    name.starts_with('.')
}

/// Lowercased extension with its dot, or "" for none.
fn file_type(path: &Path) -> String {
    path.extension()
        .map(|e| format!(".{}", e.to_string_lossy().to_lowercase()))
        .unwrap_or_default()
}

fn type_allowed(ext: &str, file_types: &[String]) -> bool {
    file_types.iter().any(|t| t.is_empty() || t == ext)
}

fn clamp_to_boundary(s: &str, mut idx: usize, forward: bool) -> usize {
    idx = idx.min(s.len());
    while !s.is_char_boundary(idx) {
        if forward {
            idx += 1;
        } else {
            idx -= 1;
        }
    }
    idx
}

/// ~300 chars of `content_lc` around the earliest term hit, newlines flattened.
pub fn snippet_around(content_lc: &str, terms: &[String]) -> Option<String> {
    let first = terms.iter().filter_map(|t| content_lc.find(t.as_str())).min()?;
    let start = clamp_to_boundary(content_lc, first.saturating_sub(SNIPPET_BEFORE), false);
    let end = clamp_to_boundary(content_lc, first + SNIPPET_AFTER, true);
    let s = content_lc[start..end].replace(['\r', '\n'], " ");
    Some(s.trim().to_string())
}

/// Content score: each term's occurrence count weighted by its share of the query length.
pub fn content_score(content_lc: &str, terms: &[String], query: &str) -> (f64, bool) {
    let query_len = query.chars().count().max(1) as f64;
    let mut score = 0.0;
    let mut matched = false;
    for t in terms {
        let n = content_lc.matches(t.as_str()).count();
        if n > 0 {
            matched = true;
            score += n as f64 * (t.chars().count() as f64 / query_len);
        }
    }
    (score, matched)
}

fn read_content_lc(path: &Path) -> Option<String> {
    let meta = std::fs::metadata(path).ok()?;
    if meta.len() > MAX_CONTENT_BYTES {
        return None;
    }
    // Binary or non-UTF-8 files are matched by name only.
    std::fs::read_to_string(path).ok().map(|s| s.to_lowercase())
}

fn last_modified(path: &Path) -> String {
    std::fs::metadata(path)
        .and_then(|m| m.modified())
        .map(|t| {
            chrono::DateTime::<chrono::Utc>::from(t)
                .to_rfc3339_opts(chrono::SecondsFormat::Millis, true)
        })
        .unwrap_or_default()
}

fn score_file(path: &Path, terms: &[String], query: &str) -> Option<DocSearchHit> {
    let file_name = path.file_name()?.to_string_lossy().to_string();
    let name_lc = file_name.to_lowercase();
    let name_match = terms.iter().any(|t| name_lc.contains(t.as_str()));

    let content = read_content_lc(path);
    let (mut score, content_match) = content
        .as_deref()
        .map(|c| content_score(c, terms, query))
        .unwrap_or((0.0, false));
    if name_match {
        score += 1.0;
    }

    let match_type = MatchType::from_flags(name_match, content_match)?;
    let snippet = content
        .as_deref()
        .filter(|_| content_match)
        .and_then(|c| snippet_around(c, terms))
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| format!("File name match: {file_name}"));

    Some(DocSearchHit {
        file_path: path.to_string_lossy().to_string(),
        file_name,
        file_type: file_type(path),
        snippet,
        last_modified: last_modified(path),
        relevance_score: score,
        match_type,
    })
}

fn search_root(root: &str, terms: &[String], req: &DocSearchRequest, out: &mut Vec<DocSearchHit>) {
    let walker = walkdir::WalkDir::new(root)
        .follow_links(false)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|e| {
            // The root itself may live under a dot directory; only prune below it.
            if e.depth() == 0 {
                return true;
            }
            let name = e.file_name().to_string_lossy();
            !is_hidden(&name) && !(e.file_type().is_dir() && SKIPPED_DIRS.contains(&&*name))
        });

    for entry in walker {
        let entry = match entry {
            Ok(e) => e,
            Err(e) => {
                tracing::debug!(error = %e, "skipping unreadable entry");
                continue;
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }
        if !type_allowed(&file_type(entry.path()), &req.file_types) {
            continue;
        }
        if let Some(hit) = score_file(entry.path(), terms, &req.query) {
            out.push(hit);
        }
    }
}

/// Run a search over every valid root. Invalid roots are skipped and left out of
/// `search_paths` in the response.
pub fn search(req: &DocSearchRequest) -> DocSearchResponse {
    let terms = search_terms(&req.query);
    let valid: Vec<String> = req
        .search_paths
        .iter()
        .filter(|p| validate_path(p))
        .cloned()
        .collect();

    let mut results = Vec::new();
    if !terms.is_empty() {
        for root in &valid {
            search_root(root, &terms, req, &mut results);
        }
    }
    results.sort_by(|a, b| b.relevance_score.total_cmp(&a.relevance_score));
    tracing::debug!(query = %req.query, roots = valid.len(), hits = results.len(), "doc search done");

    DocSearchResponse {
        results,
        search_paths: valid,
    }
}
