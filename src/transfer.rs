//! Transfer state machine.
//!
//! Drives a single [`Request`] to a terminal [`Response`] state.
//! Implemented as one async function mutating private local state
//! through the named sub-states as plain control flow rather than
//! through a boxed trait-object state machine. Every sub-state
//! transition logs at `debug!`.

use bytes::Bytes;
use futures::StreamExt;
use reqwest::{Client as HttpClient, StatusCode};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

use crate::destination::{resolve_filename, ByteSink, Destination};
use crate::error::{DownloadError, IoResultExt, Result};
use crate::hash::{digests_equal, Hasher};
use crate::limit::RateLimiter;
use crate::request::Request;
use crate::response::{HttpResponseInfo, Response};

/// Target the copy loop writes accepted bytes into.
enum WriteTarget {
    File(tokio::fs::File, PathBuf),
    Sink(Arc<dyn crate::destination::ByteSink>),
    /// `no_store`: bytes are hashed (if a hasher is present) but
    /// never actually persisted.
    Discard,
}

impl WriteTarget {
    async fn write(&mut self, data: &[u8]) -> Result<()> {
        match self {
            WriteTarget::File(file, path) => file
                .write_all(data)
                .await
                .with_path(path.clone()),
            WriteTarget::Sink(sink) => {
                let n = sink
                    .write(data)
                    .await
                    .map_err(|e| DownloadError::fs("<sink>", e))?;
                if n != data.len() {
                    return Err(DownloadError::ShortWrite {
                        offered: data.len(),
                        wrote: n,
                    });
                }
                Ok(())
            }
            WriteTarget::Discard => Ok(()),
        }
    }
}

/// Drive `request` to completion, recording all state on `response`
/// and closing its `done` signal exactly once before returning.
pub(crate) async fn run(http: &HttpClient, request: Arc<Request>, response: Arc<Response>) {
    response.mark_started();
    let result = run_inner(http, &request, &response).await;

    let result = if let Some(hook) = &request.after_copy {
        match hook(&response) {
            Ok(()) => result,
            Err(e) => result.or(Err(DownloadError::HookError(e))),
        }
    } else {
        result
    };

    if let Err(ref e) = result {
        if request.delete_on_error && e.triggers_delete_on_error() {
            if let Some(path) = resolved_file_path(&request, &response) {
                debug!(?path, "deleting file after validation error");
                let _ = tokio::fs::remove_file(&path).await;
            }
        }
    }

    response.finish(result);
}

fn resolved_file_path(request: &Request, response: &Response) -> Option<PathBuf> {
    let dir_or_file = request.destination_path()?;
    match response.filename() {
        Some(name) if dir_or_file.is_dir() => Some(dir_or_file.join(name)),
        _ => Some(dir_or_file.to_path_buf()),
    }
}

async fn run_inner(http: &HttpClient, request: &Request, response: &Response) -> Result<()> {
    // --- Init -----------------------------------------------------
    // Destination is an enum, so path/sink mutual exclusivity is
    // enforced by construction; a sink with a filename requirement
    // has no representable form in this API and needs no runtime check.
    let cancel = response.cancellation_token();
    if cancel.is_cancelled() {
        return Err(DownloadError::Canceled);
    }

    // --- Statted ----------------------------------------------------
    let (known_path, target_dir) = match &request.destination {
        Destination::Sink(_) => (None, None),
        Destination::Path(p) => {
            if p.is_dir() {
                (None, Some(p.clone()))
            } else {
                (Some(p.clone()), None)
            }
        }
    };

    let existing_len = match &known_path {
        Some(p) if !request.no_store => stat_len(p).await,
        _ => None,
    };

    if let (Some(p), Some(existing), Some(declared)) = (&known_path, existing_len, request.size) {
        if existing == declared && !request.no_resume {
            debug!(path = ?p, "existing file matches declared size, short-circuiting resume");
            response.set_bytes_resumed(existing);
            response.set_did_resume(true);
            response.set_size_total(declared);
            if let Some(name) = p.file_name() {
                response.set_filename(name.to_string_lossy().into_owned());
            }
            return validate(request, response, known_path.as_deref(), None).await;
        }
    }

    let resume_from = existing_len.filter(|_| !request.no_resume).unwrap_or(0);
    if resume_from > 0 {
        response.set_bytes_resumed(resume_from);
    }

    // --- Opened + Connected ------------------------------------------
    debug!(url = %request.url, resume_from, "connecting");
    let mut builder = http.request(request.method.clone(), request.url.clone());
    for (k, v) in &request.headers {
        builder = builder.header(k, v);
    }
    if resume_from > 0 {
        builder = builder.header("Range", format!("bytes={}-", resume_from));
    }

    let send_fut = builder.send();
    let http_response = tokio::select! {
        res = send_fut => res?,
        _ = cancel.cancelled() => return Err(DownloadError::Canceled),
    };

    let status = http_response.status();
    let headers = http_response.headers().clone();
    let content_length = headers
        .get(reqwest::header::CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.parse::<u64>().ok());
    let content_disposition = headers
        .get(reqwest::header::CONTENT_DISPOSITION)
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string());
    let last_modified = headers
        .get(reqwest::header::LAST_MODIFIED)
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string());

    response.set_http_response(HttpResponseInfo {
        status: status.as_u16(),
        content_length,
        content_disposition: content_disposition.clone(),
        last_modified: last_modified.clone(),
    });

    // Resolve the final path: either already known, or derived from
    // the directory plus Content-Disposition/URL now that headers
    // have arrived.
    let final_path = match (&known_path, &target_dir) {
        (Some(p), _) => Some(p.clone()),
        (None, Some(dir)) => {
            let name = resolve_filename(content_disposition.as_deref(), &request.url)?;
            response.set_filename(name.clone());
            Some(dir.join(name))
        }
        (None, None) => None,
    };
    if let (Some(p), None) = (&final_path, &response.filename()) {
        if let Some(name) = p.file_name() {
            response.set_filename(name.to_string_lossy().into_owned());
        }
    }

    let mut did_resume = resume_from > 0;

    match status {
        StatusCode::PARTIAL_CONTENT => {
            let range_start = headers
                .get(reqwest::header::CONTENT_RANGE)
                .and_then(|v| v.to_str().ok())
                .and_then(parse_content_range_start);
            if range_start != Some(resume_from) {
                return Err(DownloadError::BadLength {
                    expected: resume_from,
                    actual: range_start.unwrap_or(0),
                });
            }
            let total = headers
                .get(reqwest::header::CONTENT_RANGE)
                .and_then(|v| v.to_str().ok())
                .and_then(parse_content_range_total);
            let size_total = total.unwrap_or(resume_from + content_length.unwrap_or(0));
            response.set_size_total(size_total);
        }
        StatusCode::OK => {
            if resume_from > 0 {
                warn!("server ignored Range header, restarting transfer");
                did_resume = false;
                response.set_bytes_resumed(0);
            }
            if let Some(len) = content_length {
                response.set_size_total(len);
            }
        }
        StatusCode::RANGE_NOT_SATISFIABLE => {
            let total = headers
                .get(reqwest::header::CONTENT_RANGE)
                .and_then(|v| v.to_str().ok())
                .and_then(parse_content_range_total);
            match (total, known_path.as_ref().or(final_path.as_ref())) {
                (Some(total), Some(_)) if total == resume_from => {
                    response.set_size_total(total);
                    response.set_did_resume(true);
                    return validate(request, response, final_path.as_deref(), None).await;
                }
                (Some(total), _) => {
                    return Err(DownloadError::BadLength {
                        expected: total,
                        actual: resume_from,
                    });
                }
                (None, _) => {
                    return Err(DownloadError::BadStatusCode {
                        status: status.as_u16(),
                    });
                }
            }
        }
        other if !other.is_success() => {
            return Err(DownloadError::BadStatusCode {
                status: other.as_u16(),
            });
        }
        _ => {
            if let Some(len) = content_length {
                response.set_size_total(len);
            }
        }
    }
    response.set_did_resume(did_resume);

    if let Some(hook) = &request.before_copy {
        hook(response).map_err(DownloadError::HookError)?;
    }

    // --- Opened: acquire write target ---------------------------------
    let mut target = match (&request.destination, &final_path) {
        (Destination::Sink(sink), _) => WriteTarget::Sink(Arc::clone(sink)),
        (Destination::Path(_), Some(path)) if request.no_store => {
            let _ = path;
            WriteTarget::Discard
        }
        (Destination::Path(_), Some(path)) => {
            if let Some(parent) = path.parent() {
                if !request.no_create_directories && !parent.as_os_str().is_empty() {
                    tokio::fs::create_dir_all(parent)
                        .await
                        .with_path(parent.to_path_buf())?;
                }
            }
            let file = if did_resume {
                tokio::fs::OpenOptions::new()
                    .append(true)
                    .open(path)
                    .await
                    .with_path(path.clone())?
            } else {
                tokio::fs::OpenOptions::new()
                    .create(true)
                    .write(true)
                    .truncate(true)
                    .open(path)
                    .await
                    .with_path(path.clone())?
            };
            WriteTarget::File(file, path.clone())
        }
        (Destination::Path(_), None) => {
            return Err(DownloadError::BadDestination(
                "path destination resolved to no filename".to_string(),
            ))
        }
    };

    let mut hasher: Option<Box<dyn Hasher>> = request.hash.map(|a| a.hasher());

    // --- Transferring ---------------------------------------------
    let mut stream = http_response.bytes_stream();
    let mut last_tick = Instant::now();
    let mut bytes_since_tick: u64 = 0;

    loop {
        if cancel.is_cancelled() {
            return Err(DownloadError::Canceled);
        }

        let next = tokio::select! {
            chunk = stream.next() => chunk,
            _ = cancel.cancelled() => return Err(DownloadError::Canceled),
        };
        let chunk = match next {
            Some(c) => c?,
            None => break,
        };

        for piece in split_chunk(&chunk, request.buffer_size) {
            if let Some(limiter) = &request.rate_limiter {
                limiter.wait_n(&cancel, piece.len()).await?;
            }
            target.write(piece).await?;
            if let Some(h) = hasher.as_mut() {
                h.update(piece);
            }
            response.add_bytes_written(piece.len() as u64);
            bytes_since_tick += piece.len() as u64;
        }

        let elapsed = last_tick.elapsed();
        if elapsed >= Duration::from_millis(100) {
            response.observe_rate(bytes_since_tick, elapsed);
            bytes_since_tick = 0;
            last_tick = Instant::now();
        }
    }
    if bytes_since_tick > 0 {
        response.observe_rate(bytes_since_tick, last_tick.elapsed());
    }

    if let WriteTarget::File(file, path) = &mut target {
        file.flush().await.with_path(path.clone())?;
        file.sync_all().await.with_path(path.clone())?;
    }
    drop(target);

    if let (Some(path), Some(lm)) = (&final_path, &last_modified) {
        if !request.no_store {
            if let Ok(parsed) = httpdate::parse_http_date(lm) {
                let ft = filetime::FileTime::from_system_time(parsed);
                let _ = filetime::set_file_mtime(path, ft);
            }
        }
    }

    validate(
        request,
        response,
        final_path.as_deref(),
        hasher.map(|h| h.finalize()),
    )
    .await?;

    Ok(())
}

/// Validate total length and checksum, optionally re-reading the
/// local file from disk when the transfer was a resume-short-circuit
/// (no bytes were streamed this invocation, so no digest was
/// accumulated).
async fn validate(
    request: &Request,
    response: &Response,
    final_path: Option<&Path>,
    digest: Option<Vec<u8>>,
) -> Result<()> {
    let size_total = response.size_total();
    if size_total > 0 && response.bytes_transferred() != size_total {
        return Err(DownloadError::BadLength {
            expected: size_total,
            actual: response.bytes_transferred(),
        });
    }

    if let Some(algorithm) = request.hash {
        let digest = match digest {
            Some(d) => d,
            None => match final_path {
                Some(path) => hash_file(path, algorithm).await?,
                None => Vec::new(),
            },
        };
        if let Some(expected) = &request.checksum {
            if !digests_equal(&digest, expected) {
                return Err(DownloadError::ChecksumMismatch {
                    expected: hex::encode(expected),
                    actual: hex::encode(&digest),
                });
            }
        }
    }

    Ok(())
}

async fn hash_file(path: &Path, algorithm: crate::hash::HashAlgorithm) -> Result<Vec<u8>> {
    use tokio::io::AsyncReadExt;
    let mut file = tokio::fs::File::open(path).await.with_path(path.to_path_buf())?;
    let mut hasher = algorithm.hasher();
    let mut buf = vec![0u8; 64 * 1024];
    loop {
        let n = file.read(&mut buf).await.with_path(path.to_path_buf())?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hasher.finalize())
}

async fn stat_len(path: &Path) -> Option<u64> {
    tokio::fs::metadata(path).await.ok().map(|m| m.len())
}

fn split_chunk(chunk: &Bytes, buffer_size: usize) -> impl Iterator<Item = &[u8]> {
    chunk.chunks(buffer_size.max(1))
}

fn parse_content_range_start(header: &str) -> Option<u64> {
    // "bytes 6-10/11"
    let rest = header.strip_prefix("bytes ")?;
    let (range, _total) = rest.split_once('/')?;
    let (start, _end) = range.split_once('-')?;
    start.parse().ok()
}

fn parse_content_range_total(header: &str) -> Option<u64> {
    let rest = header.strip_prefix("bytes ")?;
    let (_range, total) = rest.split_once('/')?;
    total.parse().ok()
}
