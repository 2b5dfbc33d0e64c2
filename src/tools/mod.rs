//! ToolEnvelope: the uniform request→response wrapper every tool runs
//! through — argument validation, cancellation, progress notification, and
//! oversized-output materialization into the `ResourceStore`.

pub mod diff;
pub mod enums;
pub mod grep;
pub mod hash;
pub mod listing;
pub mod read;
pub mod search_replace;
pub mod write;

use std::ffi::OsString;
use std::path::Path;
use std::time::Instant;

use rmcp::model::{CallToolResult, Content, ProgressNotificationParam};
use rmcp::service::{Peer, RoleServer};
use serde::Serialize;

use crate::error::{classify, FsError};
use crate::resources::{PutTextInput, ResourceStore};

/// Default threshold (characters) above which human-readable tool output is
/// materialized into the `ResourceStore` and replaced with a truncated
/// preview plus a `resource_link`.
pub const MATERIALIZE_THRESHOLD: usize = 25_000;

/// Emit at most once per this interval, and at most once per this many
/// entries — the cadence the design notes settle on for progress
/// notifications (start, every Nth entry, terminal).
pub const PROGRESS_ENTRY_STRIDE: u64 = 256;
pub const PROGRESS_MIN_INTERVAL_MS: u128 = 50;

pub struct ProgressReporter {
    peer: Option<Peer<RoleServer>>,
    token: Option<rmcp::model::ProgressToken>,
    total: Option<u32>,
    last_sent: Instant,
    last_value: u64,
}

impl ProgressReporter {
    pub fn new(
        peer: Option<Peer<RoleServer>>,
        token: Option<rmcp::model::ProgressToken>,
        total: Option<u32>,
    ) -> Self {
        Self {
            peer,
            token,
            total,
            last_sent: Instant::now() - std::time::Duration::from_secs(3600),
            last_value: 0,
        }
    }

    pub async fn start(&mut self) {
        self.send(0).await;
    }

    /// Called per-entry; internally rate-limits to the stride/interval
    /// policy so callers don't need to track cadence themselves.
    pub async fn tick(&mut self, current: u64) {
        let stride_elapsed = current.saturating_sub(self.last_value) >= PROGRESS_ENTRY_STRIDE;
        let time_elapsed = self.last_sent.elapsed().as_millis() >= PROGRESS_MIN_INTERVAL_MS;
        if stride_elapsed && time_elapsed {
            self.send(current).await;
        }
    }

    pub async fn finish(&mut self, total: u64) {
        self.send(total).await;
    }

    async fn send(&mut self, value: u64) {
        self.last_value = value;
        self.last_sent = Instant::now();
        if let (Some(peer), Some(token)) = (&self.peer, &self.token) {
            let _ = peer
                .notify_progress(ProgressNotificationParam {
                    progress_token: token.clone(),
                    progress: value as f64,
                    total: self.total.map(|t| t as f64),
                    message: None,
                })
                .await;
        }
    }
}

/// The wire-level response envelope: `{ok, structuredContent, content}` on
/// success, `{ok:false, structuredContent:{ok:false,error}, isError:true}`
/// on failure. Callers build this from a `Result<T, FsError>` and then
/// convert to `CallToolResult` at the rmcp boundary in `server.rs`.
#[derive(Debug, Serialize)]
#[serde(untagged)]
pub enum Envelope<T: Serialize> {
    Ok {
        ok: bool,
        #[serde(rename = "structuredContent")]
        structured_content: T,
    },
    Err {
        ok: bool,
        #[serde(rename = "structuredContent")]
        structured_content: ErrEnvelopeBody,
        #[serde(rename = "isError")]
        is_error: bool,
    },
}

#[derive(Debug, Serialize)]
pub struct ErrEnvelopeBody {
    pub ok: bool,
    pub error: crate::error::ErrorResponse,
}

impl<T: Serialize> Envelope<T> {
    pub fn success(structured_content: T) -> Self {
        Self::Ok {
            ok: true,
            structured_content,
        }
    }

    pub fn failure(err: &FsError) -> Self {
        Self::Err {
            ok: false,
            structured_content: ErrEnvelopeBody {
                ok: false,
                error: err.to_response(),
            },
            is_error: true,
        }
    }
}

/// Render a tool result to the wire-level `CallToolResult`: `content` carries
/// the human-readable preview text, `structured_content` carries the typed
/// payload (or the error envelope), and `is_error` is set on failure so
/// transports that branch on it don't have to inspect the JSON body.
pub fn into_call_tool_result<T: Serialize>(
    result: Result<T, FsError>,
    human_text: String,
) -> CallToolResult {
    match result {
        Ok(value) => {
            let structured = serde_json::to_value(Envelope::success(value))
                .unwrap_or_else(|e| serde_json::json!({"ok": false, "error": e.to_string()}));
            let mut out = CallToolResult::success(vec![Content::text(human_text)]);
            out.structured_content = Some(structured);
            out
        }
        Err(err) => {
            let structured = serde_json::to_value(Envelope::<()>::failure(&err))
                .unwrap_or_else(|e| serde_json::json!({"ok": false, "error": e.to_string()}));
            let mut out = CallToolResult::error(vec![Content::text(human_text)]);
            out.structured_content = Some(structured);
            out
        }
    }
}

/// If `human_text` exceeds `MATERIALIZE_THRESHOLD`, store it in the
/// resource store and return `(preview, Some(uri))`; otherwise return the
/// text unchanged with no resource URI.
pub async fn materialize_if_oversized(
    resources: &ResourceStore,
    name: &str,
    human_text: String,
) -> Result<(String, Option<String>), FsError> {
    if human_text.len() <= MATERIALIZE_THRESHOLD {
        return Ok((human_text, None));
    }
    let entry = resources
        .put_text(PutTextInput {
            name: name.to_string(),
            mime_type: Some("text/plain".to_string()),
            text: human_text.clone(),
        })
        .await?;
    let preview_end = floor_char_boundary(&human_text, MATERIALIZE_THRESHOLD);
    let preview = format!(
        "{}\n... [truncated, full content at {}]",
        &human_text[..preview_end],
        entry.uri
    );
    Ok((preview, Some(entry.uri)))
}

/// Writes `contents` to a `.tmp`-suffixed sibling of `path` and renames it
/// into place, cleaning up the temp file if either step fails. The suffix is
/// appended to the whole filename rather than replacing the extension, so
/// `a.txt` and `a.md` don't collide on the same temp path.
pub async fn atomic_write(path: &Path, contents: &[u8]) -> Result<(), FsError> {
    let mut tmp_name = OsString::from(path.file_name().unwrap_or_default());
    tmp_name.push(".tmp");
    let tmp_path = path.with_file_name(tmp_name);

    if let Err(e) = tokio::fs::write(&tmp_path, contents).await {
        let _ = tokio::fs::remove_file(&tmp_path).await;
        return Err(classify(e, Some(&tmp_path)));
    }
    if let Err(e) = tokio::fs::rename(&tmp_path, path).await {
        let _ = tokio::fs::remove_file(&tmp_path).await;
        return Err(classify(e, Some(path)));
    }
    Ok(())
}

/// Equivalent to the nightly-only `str::floor_char_boundary`: the largest
/// byte index `<= index` that doesn't split a UTF-8 code point.
pub fn floor_char_boundary(s: &str, index: usize) -> usize {
    if index >= s.len() {
        return s.len();
    }
    let mut i = index;
    while i > 0 && !s.is_char_boundary(i) {
        i -= 1;
    }
    i
}
