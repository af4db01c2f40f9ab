//! HTTP endpoint for pairwise comparison
//!
//! `soundalike serve --port 3001` → accepts two recordings per request and
//! answers with a [`ScoreRecord`].
//!
//! Routes:
//!
//! - `GET /` health check
//! - `POST /analyze` JSON body with base64 `file1` / `file2` uploads
//! - `GET|POST /api/compare?file1=<path>&file2=<path>` server-local files
//!
//! Uploads are decoded straight from memory; nothing touches the disk.
//! The server binds to localhost unless a host is given explicitly, since
//! `/api/compare` reads server-side paths chosen by the caller.

use crate::analyzer::fusion::{FusionWeights, ScorePolicy};
use crate::analyzer::ScoreRecord;
use crate::config::{DEFAULT_N_MFCC, MAX_SOURCE_BYTES};
use crate::error::{Result, SimilarityError};
use crate::Analyzer;
use base64::Engine;
use serde::{Deserialize, Serialize};
use std::io::{Cursor, Read};
use std::path::Path;
use std::sync::mpsc::{self, RecvTimeoutError};
use std::thread;
use std::time::Duration;
use tiny_http::{Header, Method, Request, Response, Server, StatusCode};
use tracing::{error, info, warn};

pub const DEFAULT_HOST: &str = "127.0.0.1";
pub const DEFAULT_PORT: u16 = 3001;
pub const DEFAULT_TIMEOUT_SECS: u64 = 120;

/// Two base64 uploads at the source limit plus room for the JSON around them.
const MAX_REQUEST_BYTES: u64 = 2 * (MAX_SOURCE_BYTES / 3 + 1) * 4 + 64 * 1024;

#[derive(Serialize)]
struct Health {
    message: &'static str,
}

#[derive(Serialize)]
struct ErrorDetail {
    detail: String,
}

/// One comparison request.
///
/// `file1` / `file2` are base64 payloads for `/analyze` and filesystem
/// paths for `/api/compare`.
#[derive(Deserialize, Debug)]
pub struct CompareRequest {
    pub file1: String,
    pub file2: String,
    #[serde(default = "default_n_mfcc")]
    pub n_mfcc: usize,
    #[serde(default)]
    pub chroma_only: bool,
    #[serde(default)]
    pub raw_score: bool,
    #[serde(default)]
    pub dtw_window: Option<usize>,
    #[serde(default)]
    pub waveform: bool,
}

fn default_n_mfcc() -> usize {
    DEFAULT_N_MFCC
}

impl CompareRequest {
    pub fn analyzer(&self) -> Analyzer {
        let weights = if self.chroma_only {
            FusionWeights::chroma_only()
        } else {
            FusionWeights::default()
        };
        let policy = if self.raw_score {
            ScorePolicy::Raw
        } else {
            ScorePolicy::Clamped
        };

        Analyzer::new()
            .with_n_mfcc(self.n_mfcc)
            .with_weights(weights)
            .with_score_policy(policy)
            .with_dtw_window(self.dtw_window)
            .with_waveform(self.waveform)
    }
}

/// Start the server and block serving requests.
pub fn start(host: &str, port: u16, timeout_secs: u64) -> std::io::Result<()> {
    let addr = format!("{}:{}", host, port);
    let server = Server::http(&addr).map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e.to_string()))?;

    info!("soundalike listening on http://{} (timeout {}s)", addr, timeout_secs);

    for request in server.incoming_requests() {
        // One thread per request; the pipeline keeps no shared state
        thread::spawn(move || {
            if let Err(e) = handle_request(request, timeout_secs) {
                error!("Failed to send response: {}", e);
            }
        });
    }

    Ok(())
}

fn handle_request(mut request: Request, timeout_secs: u64) -> std::io::Result<()> {
    let url = request.url().to_string();
    let path = url.split('?').next().unwrap_or("/").to_string();
    let method = request.method().clone();
    info!("{} {}", method, path);

    match (&method, path.as_str()) {
        (&Method::Get, "/") => {
            let body = serde_json::to_string(&Health {
                message: "soundalike is running",
            })?;
            request.respond(json_response(200, body))
        }

        (&Method::Post, "/analyze") => {
            let outcome = read_body(&mut request)
                .and_then(|body| parse_json::<CompareRequest>(&body))
                .and_then(|params| {
                    let first = decode_upload(&params.file1, "file1")?;
                    let second = decode_upload(&params.file2, "file2")?;
                    let analyzer = params.analyzer();
                    run_with_timeout(timeout_secs, move || analyzer.compare_bytes(&first, &second))
                });
            respond_with(request, outcome)
        }

        (&Method::Get, "/api/compare") | (&Method::Post, "/api/compare") => {
            let outcome = parse_compare_params(&mut request).and_then(|params| {
                ensure_regular_file(&params.file1, "file1")?;
                ensure_regular_file(&params.file2, "file2")?;
                let analyzer = params.analyzer();
                let (first, second) = (params.file1, params.file2);
                run_with_timeout(timeout_secs, move || analyzer.compare_files(&first, &second))
            });
            respond_with(request, outcome)
        }

        _ => {
            let body = serde_json::to_string(&ErrorDetail {
                detail: "Not Found".to_string(),
            })?;
            request.respond(json_response(404, body))
        }
    }
}

fn respond_with(request: Request, outcome: Result<ScoreRecord>) -> std::io::Result<()> {
    match outcome {
        Ok(record) => {
            let body = serde_json::to_string(&record)?;
            request.respond(json_response(200, body))
        }
        Err(e) => {
            warn!("Analysis failed: {}", e);
            let body = serde_json::to_string(&ErrorDetail {
                detail: format!("Analysis error: {}", e),
            })?;
            request.respond(json_response(500, body))
        }
    }
}

fn json_response(status: u16, body: String) -> Response<Cursor<Vec<u8>>> {
    let response = Response::from_string(body).with_status_code(StatusCode(status));
    match Header::from_bytes(&b"Content-Type"[..], &b"application/json"[..]) {
        Ok(header) => response.with_header(header),
        Err(()) => response,
    }
}

fn read_body(request: &mut Request) -> Result<String> {
    if let Some(len) = request.body_length() {
        if len as u64 > MAX_REQUEST_BYTES {
            return Err(request_too_large());
        }
    }
    read_capped(request.as_reader(), MAX_REQUEST_BYTES)
}

/// Read at most `limit` bytes; anything longer is rejected, not truncated.
fn read_capped<R: Read>(reader: R, limit: u64) -> Result<String> {
    let mut body = String::new();
    reader.take(limit + 1).read_to_string(&mut body)?;
    if body.len() as u64 > limit {
        return Err(request_too_large());
    }
    Ok(body)
}

fn request_too_large() -> SimilarityError {
    SimilarityError::InvalidConfig(format!("request body exceeds {} bytes", MAX_REQUEST_BYTES))
}

/// Only regular files are compared; devices, directories and missing paths
/// are refused before any work starts.
fn ensure_regular_file(path: &str, label: &str) -> Result<()> {
    match std::fs::metadata(Path::new(path)) {
        Ok(meta) if meta.is_file() => Ok(()),
        _ => Err(SimilarityError::InvalidConfig(format!(
            "{} is not a readable regular file",
            label
        ))),
    }
}

fn parse_json<T: for<'de> Deserialize<'de>>(body: &str) -> Result<T> {
    serde_json::from_str(body).map_err(|e| SimilarityError::InvalidConfig(format!("invalid request body: {}", e)))
}

/// Query string first, then a JSON body.
fn parse_compare_params(request: &mut Request) -> Result<CompareRequest> {
    let url = request.url().to_string();
    if let Some(query) = url.split('?').nth(1) {
        if let Ok(params) = serde_urlencoded::from_str::<CompareRequest>(query) {
            return Ok(params);
        }
    }

    let body = read_body(request)?;
    if body.trim().is_empty() {
        return Err(SimilarityError::InvalidConfig(
            "file1 and file2 are required".to_string(),
        ));
    }
    parse_json(&body)
}

/// Decode a base64 upload, tolerating a `data:...;base64,` prefix.
pub fn decode_upload(payload: &str, label: &str) -> Result<Vec<u8>> {
    let encoded = match payload.split_once(";base64,") {
        Some((prefix, rest)) if prefix.starts_with("data:") => rest,
        _ => payload,
    };
    decode_within(encoded.trim(), label, MAX_SOURCE_BYTES)
}

fn decode_within(encoded: &str, label: &str, limit: u64) -> Result<Vec<u8>> {
    // Refuse before allocating; base64 decodes to three bytes per four chars
    let estimate = encoded.len() as u64 / 4 * 3;
    if estimate > limit {
        return Err(SimilarityError::Decode(format!(
            "{} decodes to about {} bytes, limit is {}",
            label, estimate, limit
        )));
    }
    base64::engine::general_purpose::STANDARD
        .decode(encoded)
        .map_err(|e| SimilarityError::Decode(format!("{} is not valid base64: {}", label, e)))
}

/// Run `job` on a worker thread and give up after `timeout_secs`.
///
/// An expired worker is left to finish on its own; its result is dropped.
pub fn run_with_timeout<F>(timeout_secs: u64, job: F) -> Result<ScoreRecord>
where
    F: FnOnce() -> Result<ScoreRecord> + Send + 'static,
{
    let (tx, rx) = mpsc::channel();
    thread::spawn(move || {
        let _ = tx.send(job());
    });

    match rx.recv_timeout(Duration::from_secs(timeout_secs)) {
        Ok(result) => result,
        Err(RecvTimeoutError::Timeout) => Err(SimilarityError::Timeout(timeout_secs)),
        Err(RecvTimeoutError::Disconnected) => Err(SimilarityError::Computation(
            "analysis worker exited without a result".to_string(),
        )),
    }
}
