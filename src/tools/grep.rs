//! `grep` tool: resolves candidate files via `GlobEngine`, then runs
//! `GrepEngine::scan_file` over them under a shared match budget.

use std::path::PathBuf;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::error::FsError;
use crate::glob::{self, GlobOptions};
use crate::grep::{
    scan_file, FileScanOptions, Matcher, MatcherOptions, SearchLimits, SearchState, StoppedReason,
};
use crate::sandbox::PathSandbox;

#[derive(Debug, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct GrepArgs {
    pub path: String,
    pub pattern: String,
    #[serde(default)]
    pub is_regex: bool,
    pub file_pattern: Option<String>,
    pub context_lines: Option<usize>,
    #[serde(default = "default_true")]
    pub case_sensitive: bool,
    #[serde(default)]
    pub whole_word: bool,
    #[serde(default)]
    pub is_literal: bool,
    pub max_results: Option<usize>,
    pub timeout_ms: Option<u64>,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MatchRecordWire {
    pub file: String,
    pub line_number: usize,
    pub content: String,
    pub match_count: usize,
    pub context_before: Vec<String>,
    pub context_after: Vec<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GrepResponse {
    pub total_matches: usize,
    pub matches: Vec<MatchRecordWire>,
    pub files_scanned: usize,
    pub files_matched: usize,
    pub truncated: bool,
    pub stopped_reason: Option<&'static str>,
}

pub async fn grep(
    sandbox: &PathSandbox,
    args: GrepArgs,
    cancel: CancellationToken,
) -> Result<GrepResponse, FsError> {
    let validated = sandbox.validate_existing(&args.path).await?;
    let meta = tokio::fs::metadata(&validated.resolved_real)
        .await
        .map_err(|e| crate::error::classify(e, Some(&validated.resolved_real)))?;

    let is_literal = args.is_literal && !args.is_regex;
    let matcher = Matcher::build(&MatcherOptions {
        pattern: args.pattern,
        is_literal,
        whole_word: args.whole_word,
        case_sensitive: args.case_sensitive,
    })?;

    let mut limits = SearchLimits::default();
    if let Some(max_results) = args.max_results {
        limits.max_results = max_results;
    }
    if let Some(timeout_ms) = args.timeout_ms {
        limits.deadline_ms = timeout_ms;
    }
    let scan_opts = FileScanOptions {
        skip_binary: true,
        context_lines: args.context_lines.unwrap_or(0),
        max_line_len: 10_000,
    };

    let mut state = SearchState::default();
    let deadline = std::time::Instant::now() + std::time::Duration::from_millis(limits.deadline_ms);

    let files: Vec<PathBuf> = if meta.is_file() {
        vec![validated.resolved_real.clone()]
    } else {
        let opts = GlobOptions {
            exclude_patterns: vec![],
            include_hidden: false,
            include_ignored: false,
            max_depth: None,
            only_files: true,
            produce_stats: false,
        };
        let mut rx = glob::walk(validated.resolved_real.clone(), opts);
        let mut collected = Vec::new();
        while let Some(item) = rx.recv().await {
            let Ok(entry) = item else { continue };
            if let Some(pattern) = &args.file_pattern {
                if !glob::pattern_matches(pattern, &entry.relative_path) {
                    continue;
                }
            }
            collected.push(entry.absolute_path);
            if collected.len() >= limits.max_files_scanned {
                break;
            }
        }
        collected
    };

    for file in files {
        if cancel.is_cancelled() {
            state.truncated = true;
            state.stopped_reason = Some(StoppedReason::Aborted);
            break;
        }
        if std::time::Instant::now() >= deadline {
            state.truncated = true;
            state.stopped_reason = Some(StoppedReason::Timeout);
            break;
        }
        if state.files_scanned >= limits.max_files_scanned {
            state.truncated = true;
            state.stopped_reason = Some(StoppedReason::MaxFiles);
            break;
        }
        scan_file(&file, &matcher, &limits, &scan_opts, &mut state, |s| {
            s.matches.len() < limits.max_results
        })
        .await?;
        if state.truncated {
            break;
        }
    }

    let matches = state
        .matches
        .into_iter()
        .map(|m| MatchRecordWire {
            file: m.file.display().to_string(),
            line_number: m.line_number,
            content: m.content,
            match_count: m.match_count,
            context_before: m.context_before,
            context_after: m.context_after,
        })
        .collect::<Vec<_>>();

    Ok(GrepResponse {
        total_matches: matches.len(),
        matches,
        files_scanned: state.files_scanned,
        files_matched: state.files_matched,
        truncated: state.truncated,
        stopped_reason: state.stopped_reason.map(stopped_reason_label),
    })
}

fn stopped_reason_label(reason: StoppedReason) -> &'static str {
    match reason {
        StoppedReason::None => "none",
        StoppedReason::MaxResults => "max_results",
        StoppedReason::MaxFiles => "max_files",
        StoppedReason::Timeout => "timeout",
        StoppedReason::Aborted => "aborted",
    }
}
