use std::convert::Infallible;
use std::path::Path;
use std::sync::{Arc, RwLock};
use std::time::{SystemTime, UNIX_EPOCH};

use axum::body::{Body, Bytes};
use axum::extract::Request;
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use tower::service_fn;
use tower::ServiceExt;
use tower_http::compression::Compression;
use tower_http::services::ServeFile;
use tracing::{debug, info, warn};

use crate::builder::{BuildError, Builder};

pub const WASM_CONTENT_TYPE: &str = "application/wasm";

/// Where compiled output goes and how it is served.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageKind {
    InMemory,
    OnDisk,
}

/// What a request to the wasm route should see right now.
#[derive(Debug, Clone)]
pub enum Snapshot {
    Memory { content: Bytes, modified: SystemTime },
    /// Nothing compiled yet.
    Unavailable,
    /// Serve the artifact from the final output path.
    File,
}

/// Compilation target and serving source.
pub trait StorageStrategy: Send + Sync {
    fn name(&self) -> &'static str;

    fn kind(&self) -> StorageKind;

    /// Compiles with `builder`. On failure, whatever was served before stays
    /// in place.
    fn compile(&self, builder: &dyn Builder) -> Result<(), BuildError>;

    fn snapshot(&self) -> Snapshot;
}

pub fn strategy_for(kind: StorageKind) -> Arc<dyn StorageStrategy> {
    match kind {
        StorageKind::InMemory => Arc::new(InMemoryStorage::default()),
        StorageKind::OnDisk => Arc::new(DiskStorage),
    }
}

#[derive(Debug, Default)]
struct Compiled {
    content: Bytes,
    modified: Option<SystemTime>,
}

/// Keeps the last successful build in memory.
#[derive(Debug, Default)]
pub struct InMemoryStorage {
    compiled: RwLock<Compiled>,
}

impl StorageStrategy for InMemoryStorage {
    fn name(&self) -> &'static str {
        "In-Memory"
    }

    fn kind(&self) -> StorageKind {
        StorageKind::InMemory
    }

    fn compile(&self, builder: &dyn Builder) -> Result<(), BuildError> {
        debug!("compiling wasm client in memory");
        let content = builder.compile_to_memory()?;

        let size = content.len();
        match self.compiled.write() {
            Ok(mut compiled) => {
                compiled.content = Bytes::from(content);
                compiled.modified = Some(SystemTime::now());
            }
            Err(_) => warn!("in-memory buffer lock poisoned, dropping build"),
        }
        info!(size, "in-memory build ready");
        Ok(())
    }

    fn snapshot(&self) -> Snapshot {
        let Ok(compiled) = self.compiled.read() else {
            return Snapshot::Unavailable;
        };
        match compiled.modified {
            Some(modified) if !compiled.content.is_empty() => Snapshot::Memory {
                content: compiled.content.clone(),
                modified,
            },
            _ => Snapshot::Unavailable,
        }
    }
}

/// Writes the artifact to its final output path and serves that file.
#[derive(Debug, Default, Clone, Copy)]
pub struct DiskStorage;

impl StorageStrategy for DiskStorage {
    fn name(&self) -> &'static str {
        "External"
    }

    fn kind(&self) -> StorageKind {
        StorageKind::OnDisk
    }

    fn compile(&self, builder: &dyn Builder) -> Result<(), BuildError> {
        let output = builder.final_output_path();
        debug!(output = %output.display(), "compiling wasm client to disk");
        if let Some(dir) = output.parent() {
            std::fs::create_dir_all(dir).map_err(|source| BuildError::Io {
                path: dir.to_path_buf(),
                source,
            })?;
        }
        builder.compile_program()
    }

    fn snapshot(&self) -> Snapshot {
        Snapshot::File
    }
}

/// Resolves a request against a snapshot.
pub async fn serve(snapshot: Snapshot, file: &Path, request: Request) -> Response {
    match snapshot {
        Snapshot::Unavailable => unavailable(),
        Snapshot::Memory { content, modified } => serve_memory(content, modified, request).await,
        Snapshot::File => serve_file(file, request).await,
    }
}

fn unavailable() -> Response {
    (StatusCode::SERVICE_UNAVAILABLE, "WASM compiling...").into_response()
}

async fn serve_file(path: &Path, request: Request) -> Response {
    let wasm = WASM_CONTENT_TYPE
        .parse::<mime::Mime>()
        .unwrap_or(mime::APPLICATION_OCTET_STREAM);
    match ServeFile::new_with_mime(path, &wasm).oneshot(request).await {
        Ok(response) => response.map(Body::new),
        Err(never) => match never {},
    }
}

async fn serve_memory(content: Bytes, modified: SystemTime, request: Request) -> Response {
    let etag = entity_tag(content.len(), modified);
    let last_modified = httpdate::fmt_http_date(modified);
    let headers = request.headers();

    if not_modified(headers, &etag, modified) {
        return Response::builder()
            .status(StatusCode::NOT_MODIFIED)
            .header(header::ETAG, etag)
            .header(header::LAST_MODIFIED, last_modified)
            .body(Body::empty())
            .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response());
    }

    let range = headers
        .get(header::RANGE)
        .and_then(|value| value.to_str().ok())
        .filter(|_| if_range_matches(headers, &etag, modified));
    if let Some(range) = range {
        match byte_range(range, content.len() as u64) {
            ByteRange::Whole => {}
            ByteRange::Partial { start, end } => {
                return partial(content, start, end, &etag, &last_modified);
            }
            ByteRange::Unsatisfiable => {
                return Response::builder()
                    .status(StatusCode::RANGE_NOT_SATISFIABLE)
                    .header(header::CONTENT_RANGE, format!("bytes */{}", content.len()))
                    .body(Body::empty())
                    .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response());
            }
        }
    }

    let full = service_fn(move |_: Request| {
        let response = Response::builder()
            .header(header::CONTENT_TYPE, WASM_CONTENT_TYPE)
            .header(header::ETAG, etag.clone())
            .header(header::LAST_MODIFIED, last_modified.clone())
            .header(header::ACCEPT_RANGES, "bytes")
            .body(Body::from(content.clone()))
            .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response());
        async move { Ok::<_, Infallible>(response) }
    });

    match Compression::new(full).oneshot(request).await {
        Ok(response) => response.map(Body::new),
        Err(never) => match never {},
    }
}

fn partial(content: Bytes, start: u64, end: u64, etag: &str, last_modified: &str) -> Response {
    let total = content.len();
    let slice = content.slice(start as usize..=end as usize);
    Response::builder()
        .status(StatusCode::PARTIAL_CONTENT)
        .header(header::CONTENT_TYPE, WASM_CONTENT_TYPE)
        .header(header::ETAG, etag)
        .header(header::LAST_MODIFIED, last_modified)
        .header(header::ACCEPT_RANGES, "bytes")
        .header(header::CONTENT_RANGE, format!("bytes {start}-{end}/{total}"))
        .body(Body::from(slice))
        .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response())
}

fn entity_tag(len: usize, modified: SystemTime) -> String {
    let nanos = modified
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or_default();
    format!("\"{len:x}-{nanos:x}\"")
}

/// HTTP dates carry whole seconds only.
fn unix_secs(time: SystemTime) -> u64 {
    time.duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default()
}

fn header_date(headers: &HeaderMap, name: header::HeaderName) -> Option<u64> {
    let value = headers.get(name)?.to_str().ok()?;
    httpdate::parse_http_date(value).ok().map(unix_secs)
}

/// If-None-Match wins over If-Modified-Since when both are sent.
fn not_modified(headers: &HeaderMap, etag: &str, modified: SystemTime) -> bool {
    if headers.contains_key(header::IF_NONE_MATCH) {
        return if_none_match(headers, etag);
    }
    header_date(headers, header::IF_MODIFIED_SINCE)
        .is_some_and(|since| unix_secs(modified) <= since)
}

fn if_none_match(headers: &HeaderMap, etag: &str) -> bool {
    headers
        .get_all(header::IF_NONE_MATCH)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(','))
        .map(str::trim)
        .any(|candidate| {
            candidate == "*" || candidate.trim_start_matches("W/") == etag
        })
}

/// A stale If-Range validator turns a range request into a full one.
fn if_range_matches(headers: &HeaderMap, etag: &str, modified: SystemTime) -> bool {
    let Some(value) = headers.get(header::IF_RANGE) else {
        return true;
    };
    let Ok(value) = value.to_str() else {
        return false;
    };
    let value = value.trim();
    if value.starts_with('"') {
        return value == etag;
    }
    if value.starts_with("W/") {
        return false;
    }
    header_date(headers, header::IF_RANGE).is_some_and(|date| date == unix_secs(modified))
}

#[derive(Debug, PartialEq, Eq)]
enum ByteRange {
    /// Header malformed or multi-range: send everything.
    Whole,
    Partial { start: u64, end: u64 },
    Unsatisfiable,
}

fn byte_range(value: &str, len: u64) -> ByteRange {
    let Ok(parsed) = http_range_header::parse_range_header(value.trim()) else {
        return ByteRange::Whole;
    };
    if parsed.ranges.len() != 1 {
        return ByteRange::Whole;
    }
    match parsed.validate(len) {
        Ok(ranges) => match ranges.first() {
            Some(range) if len > 0 => ByteRange::Partial {
                start: *range.start(),
                end: *range.end(),
            },
            _ => ByteRange::Unsatisfiable,
        },
        Err(err) => {
            debug!(%err, "range not satisfiable");
            ByteRange::Unsatisfiable
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn range_forms() {
        assert_eq!(byte_range("bytes=0-3", 10), ByteRange::Partial { start: 0, end: 3 });
        assert_eq!(byte_range("bytes=4-", 10), ByteRange::Partial { start: 4, end: 9 });
        assert_eq!(byte_range("bytes=-2", 10), ByteRange::Partial { start: 8, end: 9 });
        assert_eq!(byte_range("bytes=5-99", 10), ByteRange::Partial { start: 5, end: 9 });
        assert_eq!(byte_range("bytes=10-", 10), ByteRange::Unsatisfiable);
        assert_eq!(byte_range("bytes=0-1,4-5", 10), ByteRange::Whole);
        assert_eq!(byte_range("items=0-1", 10), ByteRange::Whole);
    }

    #[test]
    fn if_modified_since_compares_whole_seconds() {
        let modified = UNIX_EPOCH + std::time::Duration::from_millis(1_700_000_000_750);
        let mut headers = HeaderMap::new();
        headers.insert(
            header::IF_MODIFIED_SINCE,
            HeaderValue::from_str(&httpdate::fmt_http_date(modified)).unwrap(),
        );
        assert!(not_modified(&headers, "\"x\"", modified));

        let later = modified + std::time::Duration::from_secs(2);
        assert!(!not_modified(&headers, "\"x\"", later));

        headers.insert(header::IF_NONE_MATCH, HeaderValue::from_static("\"y\""));
        assert!(!not_modified(&headers, "\"x\"", modified));
    }

    #[test]
    fn if_range_needs_a_current_validator() {
        let modified = UNIX_EPOCH + std::time::Duration::from_secs(1_700_000_000);
        let mut headers = HeaderMap::new();
        assert!(if_range_matches(&headers, "\"a\"", modified));

        headers.insert(header::IF_RANGE, HeaderValue::from_static("\"a\""));
        assert!(if_range_matches(&headers, "\"a\"", modified));
        assert!(!if_range_matches(&headers, "\"b\"", modified));

        headers.insert(header::IF_RANGE, HeaderValue::from_static("W/\"a\""));
        assert!(!if_range_matches(&headers, "\"a\"", modified));

        headers.insert(
            header::IF_RANGE,
            HeaderValue::from_str(&httpdate::fmt_http_date(modified)).unwrap(),
        );
        assert!(if_range_matches(&headers, "\"a\"", modified));
        let rebuilt = modified + std::time::Duration::from_secs(5);
        assert!(!if_range_matches(&headers, "\"a\"", rebuilt));
    }

    #[test]
    fn etag_matching_accepts_lists_and_weak_tags() {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::IF_NONE_MATCH,
            HeaderValue::from_static("\"a\", W/\"b\""),
        );
        assert!(if_none_match(&headers, "\"b\""));
        assert!(!if_none_match(&headers, "\"c\""));
    }

    #[test]
    fn empty_memory_storage_is_unavailable() {
        let storage = InMemoryStorage::default();
        assert!(matches!(storage.snapshot(), Snapshot::Unavailable));
        assert_eq!(storage.name(), "In-Memory");
        assert_eq!(DiskStorage.name(), "External");
    }
}
