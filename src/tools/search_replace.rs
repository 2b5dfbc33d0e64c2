//! `search_and_replace`: resolves candidates via `GlobEngine`, builds a
//! `GrepEngine`-style matcher, and rewrites matching files in place (unless
//! `dry_run`). Each file's failure is counted in the response, not raised —
//! matching the "per-file failure does not abort the batch" contract.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::error::{classify, ErrorCode, FsError};
use crate::glob::{self, GlobOptions};
use crate::grep::{Matcher, MatcherOptions};
use crate::sandbox::PathSandbox;

#[derive(Debug, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct SearchAndReplaceArgs {
    pub path: String,
    pub file_pattern: String,
    pub search_pattern: String,
    pub replacement: String,
    #[serde(default)]
    pub dry_run: bool,
    #[serde(default)]
    pub is_regex: bool,
    #[serde(default = "default_true")]
    pub case_sensitive: bool,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FileReplaceResult {
    pub path: String,
    pub replacements: usize,
    pub changed: bool,
    pub error: Option<crate::error::ErrorResponse>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchAndReplaceResponse {
    pub files_scanned: usize,
    pub files_changed: usize,
    pub total_replacements: usize,
    pub dry_run: bool,
    pub results: Vec<FileReplaceResult>,
}

pub async fn search_and_replace(
    sandbox: &PathSandbox,
    args: SearchAndReplaceArgs,
    cancel: CancellationToken,
) -> Result<SearchAndReplaceResponse, FsError> {
    let validated = sandbox.validate_existing_directory(&args.path).await?;

    let matcher = Matcher::build(&MatcherOptions {
        pattern: args.search_pattern.clone(),
        is_literal: !args.is_regex,
        whole_word: false,
        case_sensitive: args.case_sensitive,
    })?;

    let opts = GlobOptions {
        exclude_patterns: vec![],
        include_hidden: false,
        include_ignored: false,
        max_depth: None,
        only_files: true,
        produce_stats: false,
    };
    let mut rx = glob::walk(validated.resolved_real.clone(), opts);
    let mut candidates = Vec::new();
    while let Some(item) = rx.recv().await {
        let Ok(entry) = item else { continue };
        if glob::pattern_matches(&args.file_pattern, &entry.relative_path) {
            candidates.push(entry.absolute_path);
        }
    }
    candidates.sort();

    let mut results = Vec::with_capacity(candidates.len());
    let mut files_changed = 0usize;
    let mut total_replacements = 0usize;

    for path in candidates {
        if cancel.is_cancelled() {
            results.push(FileReplaceResult {
                path: path.display().to_string(),
                replacements: 0,
                changed: false,
                error: Some(
                    FsError::new(ErrorCode::ETimeout, "search_and_replace aborted by cancellation signal")
                        .to_response(),
                ),
            });
            continue;
        }
        let outcome = replace_in_file(&path, &matcher, &args.replacement, args.dry_run).await;
        match outcome {
            Ok((replacements, changed)) => {
                if changed {
                    files_changed += 1;
                }
                total_replacements += replacements;
                results.push(FileReplaceResult {
                    path: path.display().to_string(),
                    replacements,
                    changed,
                    error: None,
                });
            }
            Err(e) => {
                results.push(FileReplaceResult {
                    path: path.display().to_string(),
                    replacements: 0,
                    changed: false,
                    error: Some(e.to_response()),
                });
            }
        }
    }

    Ok(SearchAndReplaceResponse {
        files_scanned: results.len(),
        files_changed,
        total_replacements,
        dry_run: args.dry_run,
        results,
    })
}

async fn replace_in_file(
    path: &std::path::Path,
    matcher: &Matcher,
    replacement: &str,
    dry_run: bool,
) -> Result<(usize, bool), FsError> {
    let bytes = tokio::fs::read(path).await.map_err(|e| classify(e, Some(path)))?;
    if bytes.contains(&0u8) || std::str::from_utf8(&bytes).is_err() {
        return Ok((0, false)); // binary file, skip silently like grep's binary detection
    }
    let original = String::from_utf8_lossy(&bytes).into_owned();
    let (replaced, count) = matcher.replace_all(&original, replacement);
    if count == 0 {
        return Ok((0, false));
    }
    if !dry_run {
        tokio::fs::write(path, &replaced)
            .await
            .map_err(|e| classify(e, Some(path)))?;
    }
    Ok((count, true))
}
