//! `diff_files` and `apply_patch`: unified-diff generation via `similar`,
//! and a hand-written unified-diff parser/applier (no `diffy`-equivalent
//! crate appears anywhere in the retrieved corpus, so patch application is
//! implemented directly against the hunk format `diff_files` emits).

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use similar::TextDiff;

use crate::error::{classify, ErrorCode, FsError};
use crate::sandbox::PathSandbox;
use crate::tools::atomic_write;

#[derive(Debug, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct DiffFilesArgs {
    pub original: String,
    pub modified: String,
    pub context: Option<usize>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DiffFilesResponse {
    pub original: String,
    pub modified: String,
    pub unified_diff: String,
    pub is_identical: bool,
}

pub async fn diff_files(
    sandbox: &PathSandbox,
    args: DiffFilesArgs,
) -> Result<DiffFilesResponse, FsError> {
    let original_v = sandbox.validate_existing(&args.original).await?;
    let modified_v = sandbox.validate_existing(&args.modified).await?;

    let original_text = tokio::fs::read_to_string(&original_v.resolved_real)
        .await
        .map_err(|e| classify(e, Some(&original_v.resolved_real)))?;
    let modified_text = tokio::fs::read_to_string(&modified_v.resolved_real)
        .await
        .map_err(|e| classify(e, Some(&modified_v.resolved_real)))?;

    let is_identical = original_text == modified_text;
    let unified_diff = TextDiff::from_lines(&original_text, &modified_text)
        .unified_diff()
        .context_radius(args.context.unwrap_or(3))
        .header(
            &original_v.resolved_real.display().to_string(),
            &modified_v.resolved_real.display().to_string(),
        )
        .to_string();

    Ok(DiffFilesResponse {
        original: original_v.resolved_real.display().to_string(),
        modified: modified_v.resolved_real.display().to_string(),
        unified_diff,
        is_identical,
    })
}

#[derive(Debug, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ApplyPatchArgs {
    pub path: String,
    pub patch: String,
    #[serde(default)]
    pub dry_run: bool,
    pub fuzz_factor: Option<usize>,
    pub max_file_size: Option<u64>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ApplyPatchResponse {
    pub path: String,
    pub dry_run: bool,
    pub hunks_applied: usize,
    pub hunks_total: usize,
    pub preview: Option<String>,
}

pub async fn apply_patch(
    sandbox: &PathSandbox,
    args: ApplyPatchArgs,
) -> Result<ApplyPatchResponse, FsError> {
    let validated = sandbox.validate_existing(&args.path).await?;
    let max_file_size = args.max_file_size.unwrap_or(10 * 1024 * 1024);

    let meta = tokio::fs::metadata(&validated.resolved_real)
        .await
        .map_err(|e| classify(e, Some(&validated.resolved_real)))?;
    if meta.len() > max_file_size {
        return Err(FsError::too_large(format!(
            "file of {} bytes exceeds maxFileSize ({max_file_size})",
            meta.len()
        ))
        .with_path(&validated.resolved_real));
    }

    let original = tokio::fs::read_to_string(&validated.resolved_real)
        .await
        .map_err(|e| classify(e, Some(&validated.resolved_real)))?;

    if original.len() as u64 > max_file_size {
        return Err(FsError::too_large("patch target exceeds maxFileSize").with_path(&validated.resolved_real));
    }

    let hunks = parse_unified_diff(&args.patch)?;
    let fuzz_factor = args.fuzz_factor.unwrap_or(2);
    let (patched, applied) = apply_hunks(&original, &hunks, fuzz_factor)?;

    if args.dry_run {
        let preview = TextDiff::from_lines(&original, &patched)
            .unified_diff()
            .context_radius(3)
            .header("before", "after")
            .to_string();
        return Ok(ApplyPatchResponse {
            path: validated.resolved_real.display().to_string(),
            dry_run: true,
            hunks_applied: applied,
            hunks_total: hunks.len(),
            preview: Some(preview),
        });
    }

    atomic_write(&validated.resolved_real, patched.as_bytes()).await?;

    Ok(ApplyPatchResponse {
        path: validated.resolved_real.display().to_string(),
        dry_run: false,
        hunks_applied: applied,
        hunks_total: hunks.len(),
        preview: None,
    })
}

#[derive(Debug, Clone)]
struct HunkLine {
    kind: LineKind,
    text: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LineKind {
    Context,
    Remove,
    Add,
}

#[derive(Debug, Clone)]
struct Hunk {
    old_start: usize,
    lines: Vec<HunkLine>,
}

/// Parse a unified diff's hunks, ignoring the `---`/`+++` file headers — the
/// target file is already fixed by `path`, so only `@@ ... @@` hunk bodies
/// matter.
fn parse_unified_diff(patch: &str) -> Result<Vec<Hunk>, FsError> {
    let mut hunks = Vec::new();
    let mut lines = patch.lines().peekable();

    while let Some(line) = lines.next() {
        if line.starts_with("--- ") || line.starts_with("+++ ") {
            continue;
        }
        if let Some(rest) = line.strip_prefix("@@ ") {
            let header = rest.split(" @@").next().unwrap_or(rest);
            let old_start = parse_hunk_old_start(header)?;
            let mut hunk_lines = Vec::new();
            while let Some(&next) = lines.peek() {
                if next.starts_with("@@ ") || next.starts_with("--- ") {
                    break;
                }
                let next = lines.next().unwrap();
                if let Some(text) = next.strip_prefix('+') {
                    hunk_lines.push(HunkLine {
                        kind: LineKind::Add,
                        text: text.to_string(),
                    });
                } else if let Some(text) = next.strip_prefix('-') {
                    hunk_lines.push(HunkLine {
                        kind: LineKind::Remove,
                        text: text.to_string(),
                    });
                } else if let Some(text) = next.strip_prefix(' ') {
                    hunk_lines.push(HunkLine {
                        kind: LineKind::Context,
                        text: text.to_string(),
                    });
                } else if next.is_empty() {
                    hunk_lines.push(HunkLine {
                        kind: LineKind::Context,
                        text: String::new(),
                    });
                }
            }
            hunks.push(Hunk {
                old_start,
                lines: hunk_lines,
            });
        }
    }

    if hunks.is_empty() {
        return Err(FsError::new(
            ErrorCode::EInvalidInput,
            "patch contains no recognizable @@ hunks",
        ));
    }
    Ok(hunks)
}

fn parse_hunk_old_start(header: &str) -> Result<usize, FsError> {
    // header looks like "-12,5 +12,6"
    let old_part = header
        .split_whitespace()
        .next()
        .ok_or_else(|| FsError::new(ErrorCode::EInvalidInput, "malformed hunk header"))?;
    let old_part = old_part.trim_start_matches('-');
    let start = old_part.split(',').next().unwrap_or(old_part);
    start
        .parse::<usize>()
        .map_err(|_| FsError::new(ErrorCode::EInvalidInput, "malformed hunk header line number"))
}

/// Apply hunks against `original`'s lines, searching within a `fuzz_factor`
/// line window around the declared `old_start` for the hunk's context+remove
/// lines before splicing in the add lines. Each hunk that fails to locate a
/// match is skipped rather than aborting the whole patch.
fn apply_hunks(original: &str, hunks: &[Hunk], fuzz_factor: usize) -> Result<(String, usize), FsError> {
    let original_lines: Vec<&str> = original.split('\n').collect();
    let mut output: Vec<String> = original_lines.iter().map(|s| s.to_string()).collect();
    let mut applied = 0usize;
    // Apply from bottom to top so earlier offsets aren't invalidated by
    // length changes from later hunks.
    let mut ordered: Vec<&Hunk> = hunks.iter().collect();
    ordered.sort_by_key(|h| std::cmp::Reverse(h.old_start));

    for hunk in ordered {
        let needle: Vec<&str> = hunk
            .lines
            .iter()
            .filter(|l| l.kind != LineKind::Add)
            .map(|l| l.text.as_str())
            .collect();
        if needle.is_empty() {
            continue;
        }

        let anchor = hunk.old_start.saturating_sub(1);
        let mut found = None;
        'search: for offset in 0..=fuzz_factor {
            for candidate in [anchor.saturating_sub(offset), anchor + offset] {
                if candidate + needle.len() > output.len() {
                    continue;
                }
                if output[candidate..candidate + needle.len()]
                    .iter()
                    .map(|s| s.as_str())
                    .eq(needle.iter().copied())
                {
                    found = Some(candidate);
                    break 'search;
                }
            }
        }

        let Some(start) = found else { continue };
        let mut replacement = Vec::new();
        for line in &hunk.lines {
            match line.kind {
                LineKind::Context | LineKind::Add => replacement.push(line.text.clone()),
                LineKind::Remove => {}
            }
        }
        output.splice(start..start + needle.len(), replacement);
        applied += 1;
    }

    Ok((output.join("\n"), applied))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sandbox::roots::RootSupervisor;
    use std::path::PathBuf;
    use std::sync::Arc;
    use tempfile::tempdir;
    use tokio::sync::RwLock;

    async fn sandbox_with_root(root: PathBuf) -> PathSandbox {
        let supervisor = RootSupervisor::new_for_test(Arc::new(RwLock::new(vec![root])));
        PathSandbox::new(supervisor, false, &[])
    }

    #[tokio::test]
    async fn diff_then_patch_roundtrips() {
        let dir = tempdir().unwrap();
        let a = dir.path().join("a.txt");
        let b = dir.path().join("b.txt");
        tokio::fs::write(&a, "one\ntwo\nthree\n").await.unwrap();
        tokio::fs::write(&b, "one\nTWO\nthree\n").await.unwrap();
        let sb = sandbox_with_root(dir.path().canonicalize().unwrap()).await;

        let diff = diff_files(
            &sb,
            DiffFilesArgs {
                original: a.to_str().unwrap().to_string(),
                modified: b.to_str().unwrap().to_string(),
                context: Some(3),
            },
        )
        .await
        .unwrap();
        assert!(!diff.is_identical);

        let patched = apply_patch(
            &sb,
            ApplyPatchArgs {
                path: a.to_str().unwrap().to_string(),
                patch: diff.unified_diff,
                dry_run: false,
                fuzz_factor: None,
                max_file_size: None,
            },
        )
        .await
        .unwrap();
        assert_eq!(patched.hunks_applied, 1);

        let final_content = tokio::fs::read_to_string(&a).await.unwrap();
        let expected = tokio::fs::read_to_string(&b).await.unwrap();
        assert_eq!(final_content, expected);
    }

    #[tokio::test]
    async fn identical_files_report_is_identical() {
        let dir = tempdir().unwrap();
        let a = dir.path().join("a.txt");
        tokio::fs::write(&a, "same\n").await.unwrap();
        let sb = sandbox_with_root(dir.path().canonicalize().unwrap()).await;
        let diff = diff_files(
            &sb,
            DiffFilesArgs {
                original: a.to_str().unwrap().to_string(),
                modified: a.to_str().unwrap().to_string(),
                context: None,
            },
        )
        .await
        .unwrap();
        assert!(diff.is_identical);
    }

    #[tokio::test]
    async fn dry_run_does_not_write() {
        let dir = tempdir().unwrap();
        let a = dir.path().join("a.txt");
        tokio::fs::write(&a, "one\ntwo\nthree\n").await.unwrap();
        let sb = sandbox_with_root(dir.path().canonicalize().unwrap()).await;
        let patch = "@@ -2,1 +2,1 @@\n-two\n+TWO\n";
        let resp = apply_patch(
            &sb,
            ApplyPatchArgs {
                path: a.to_str().unwrap().to_string(),
                patch: patch.to_string(),
                dry_run: true,
                fuzz_factor: None,
                max_file_size: None,
            },
        )
        .await
        .unwrap();
        assert!(resp.preview.is_some());
        let content = tokio::fs::read_to_string(&a).await.unwrap();
        assert_eq!(content, "one\ntwo\nthree\n");
    }
}
