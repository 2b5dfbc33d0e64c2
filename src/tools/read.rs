//! `read`, `read_many`, `stat`, `stat_many`.

use std::path::PathBuf;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::concurrency::{process_in_parallel, PARALLEL_CONCURRENCY};
use crate::error::{classify, ErrorCode, FsError};
use crate::resources::{PutTextInput, ResourceStore};
use crate::sandbox::PathSandbox;
use crate::tools::floor_char_boundary;

#[derive(Debug, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "camelCase")]
pub struct ReadArgs {
    pub path: String,
    pub head: Option<usize>,
    pub tail: Option<usize>,
    pub line_start: Option<usize>,
    pub line_end: Option<usize>,
    #[serde(default = "default_true")]
    pub skip_binary: bool,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReadResponse {
    pub path: String,
    pub content: String,
    pub truncated: bool,
    pub has_more_lines: bool,
    pub resource_uri: Option<String>,
}

/// `head`/`tail`/`line_start`+`line_end` are mutually exclusive; `line_start`
/// and `line_end` are both required together. Lines are 1-based inclusive.
fn check_mutually_exclusive(args: &ReadArgs) -> Result<(), FsError> {
    let modes = [
        args.head.is_some(),
        args.tail.is_some(),
        args.line_start.is_some() || args.line_end.is_some(),
    ];
    if modes.iter().filter(|m| **m).count() > 1 {
        return Err(FsError::invalid_input(
            "head, tail, and lineStart/lineEnd are mutually exclusive",
        ));
    }
    if args.line_start.is_some() != args.line_end.is_some() {
        return Err(FsError::invalid_input(
            "lineStart and lineEnd must be supplied together",
        ));
    }
    Ok(())
}

pub async fn read(
    sandbox: &PathSandbox,
    resources: &ResourceStore,
    args: ReadArgs,
) -> Result<ReadResponse, FsError> {
    check_mutually_exclusive(&args)?;
    let validated = sandbox.validate_existing(&args.path).await?;
    let meta = tokio::fs::metadata(&validated.resolved_real)
        .await
        .map_err(|e| classify(e, Some(&validated.resolved_real)))?;
    if !meta.is_file() {
        return Err(FsError::new(ErrorCode::ENotFile, "not a file").with_path(&validated.resolved_real));
    }

    let bytes = tokio::fs::read(&validated.resolved_real)
        .await
        .map_err(|e| classify(e, Some(&validated.resolved_real)))?;

    if args.skip_binary && looks_binary(&bytes) {
        return Err(FsError::new(ErrorCode::EBinaryFile, "file appears to be binary")
            .with_path(&validated.resolved_real));
    }

    let text = String::from_utf8_lossy(&bytes).replace("\r\n", "\n");
    let lines: Vec<&str> = text.lines().collect();
    let total_lines = lines.len();

    let (content, has_more_lines) = if let Some(head) = args.head {
        let take = head.min(total_lines);
        (lines[..take].join("\n"), take < total_lines)
    } else if let Some(tail) = args.tail {
        let take = tail.min(total_lines);
        (lines[total_lines - take..].join("\n"), take < total_lines)
    } else if let (Some(start), Some(end)) = (args.line_start, args.line_end) {
        if start == 0 || end < start {
            return Err(FsError::invalid_input(
                "lineStart must be >= 1 and lineEnd must be >= lineStart",
            ));
        }
        let start_idx = (start - 1).min(total_lines);
        let end_idx = end.min(total_lines);
        (lines[start_idx..end_idx].join("\n"), end_idx < total_lines)
    } else {
        (text.clone(), false)
    };

    let (final_content, resource_uri, truncated) = if content.len() > crate::tools::MATERIALIZE_THRESHOLD
    {
        let entry = resources
            .put_text(PutTextInput {
                name: validated.resolved_real.display().to_string(),
                mime_type: Some("text/plain".to_string()),
                text: content.clone(),
            })
            .await?;
        let boundary = floor_char_boundary(&content, crate::tools::MATERIALIZE_THRESHOLD);
        (content[..boundary].to_string(), Some(entry.uri), true)
    } else {
        (content, None, false)
    };

    Ok(ReadResponse {
        path: validated.resolved_real.display().to_string(),
        content: final_content,
        truncated,
        has_more_lines,
        resource_uri,
    })
}

fn looks_binary(bytes: &[u8]) -> bool {
    let probe_len = bytes.len().min(8192);
    let probe = &bytes[..probe_len];
    if probe.contains(&0u8) {
        return true;
    }
    std::str::from_utf8(probe).is_err()
}

#[derive(Debug, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ReadManyArgs {
    pub paths: Vec<String>,
    pub head: Option<usize>,
    pub max_total_size: Option<u64>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReadManyEntry {
    pub path: String,
    pub ok: bool,
    pub content: Option<String>,
    pub error: Option<crate::error::ErrorResponse>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReadManyResponse {
    pub entries: Vec<ReadManyEntry>,
}

/// `process_in_parallel` needs `'static` closures, so callers share the
/// sandbox and resource store via the same `Arc`s the server holds rather
/// than a borrow scoped to this call.
pub async fn read_many(
    sandbox: std::sync::Arc<PathSandbox>,
    resources: std::sync::Arc<ResourceStore>,
    args: ReadManyArgs,
    cancel: tokio_util::sync::CancellationToken,
) -> ReadManyResponse {
    let max_total_size = args.max_total_size.unwrap_or(u64::MAX);
    let head = args.head;

    let out = process_in_parallel(
        args.paths,
        move |path: String, sig| {
            let sandbox = sandbox.clone();
            let resources = resources.clone();
            async move {
                if sig.is_cancelled() {
                    return Ok::<ReadManyEntry, String>(ReadManyEntry {
                        path,
                        ok: false,
                        content: None,
                        error: Some(FsError::new(ErrorCode::ETimeout, "read_many aborted by cancellation signal").to_response()),
                    });
                }
                let read_args = ReadArgs {
                    path: path.clone(),
                    head,
                    tail: None,
                    line_start: None,
                    line_end: None,
                    skip_binary: true,
                };
                let entry = match read(&sandbox, &resources, read_args).await {
                    Ok(resp) if (resp.content.len() as u64) > max_total_size => ReadManyEntry {
                        path,
                        ok: false,
                        content: None,
                        error: Some(FsError::too_large("entry exceeds maxTotalSize").to_response()),
                    },
                    Ok(resp) => ReadManyEntry {
                        path,
                        ok: true,
                        content: Some(resp.content),
                        error: None,
                    },
                    Err(e) => ReadManyEntry {
                        path,
                        ok: false,
                        content: None,
                        error: Some(e.to_response()),
                    },
                };
                Ok::<ReadManyEntry, String>(entry)
            }
        },
        PARALLEL_CONCURRENCY,
        cancel,
    )
    .await;

    let mut entries: Vec<ReadManyEntry> = out.results.into_iter().map(|(_, v)| v).collect();
    entries.sort_by(|a, b| a.path.cmp(&b.path));
    ReadManyResponse { entries }
}

#[derive(Debug, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct StatArgs {
    pub path: String,
}

#[derive(Debug, Serialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct StatResponse {
    pub path: String,
    pub is_file: bool,
    pub is_directory: bool,
    pub is_symlink: bool,
    pub size: u64,
    pub mtime: Option<u64>,
}

pub async fn stat(sandbox: &PathSandbox, args: StatArgs) -> Result<StatResponse, FsError> {
    let validated = sandbox.validate_existing(&args.path).await?;
    let meta = tokio::fs::metadata(&validated.resolved_real)
        .await
        .map_err(|e| classify(e, Some(&validated.resolved_real)))?;
    Ok(StatResponse {
        path: validated.resolved_real.display().to_string(),
        is_file: meta.is_file(),
        is_directory: meta.is_dir(),
        is_symlink: validated.is_symlink,
        size: meta.len(),
        mtime: meta
            .modified()
            .ok()
            .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
            .map(|d| d.as_secs()),
    })
}

#[derive(Debug, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct StatManyArgs {
    pub paths: Vec<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatManyEntry {
    pub path: String,
    pub ok: bool,
    pub stat: Option<StatResponse>,
    pub error: Option<crate::error::ErrorResponse>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatManyResponse {
    pub entries: Vec<StatManyEntry>,
}

pub async fn stat_many(sandbox: &PathSandbox, args: StatManyArgs) -> StatManyResponse {
    let mut entries = Vec::with_capacity(args.paths.len());
    for path in args.paths {
        let result = stat(sandbox, StatArgs { path: path.clone() }).await;
        entries.push(match result {
            Ok(s) => StatManyEntry {
                path,
                ok: true,
                stat: Some(s),
                error: None,
            },
            Err(e) => StatManyEntry {
                path,
                ok: false,
                stat: None,
                error: Some(e.to_response()),
            },
        });
    }
    StatManyResponse { entries }
}
