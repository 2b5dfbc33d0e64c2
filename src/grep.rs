//! GrepEngine: matcher construction and line-oriented file scanning.
//!
//! Rust's `regex` crate compiles to a Thompson NFA with no backtracking, so
//! it is inherently immune to catastrophic ReDoS — unlike engines built on
//! backtracking (PCRE, most scripting-language regex). The syntactic safety
//! check below still runs to reject absurdly expensive-to-*compile* patterns
//! (deeply nested counted repetition) and to cap pattern length, but it never
//! needs to reject a compiled pattern for runtime blowup the way a
//! backtracking engine would.

use std::time::{Duration, Instant};

use regex::RegexBuilder;

use crate::error::{ErrorCode, FsError};
use crate::tools::floor_char_boundary;

#[derive(Debug, Clone)]
pub struct MatchRecord {
    pub file: std::path::PathBuf,
    pub line_number: usize,
    pub content: String,
    pub match_count: usize,
    pub context_before: Vec<String>,
    pub context_after: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct SearchLimits {
    pub max_results: usize,
    pub max_files_scanned: usize,
    pub max_file_size: u64,
    pub deadline_ms: u64,
    pub per_line_regex_timeout_ms: u64,
}

impl Default for SearchLimits {
    fn default() -> Self {
        Self {
            max_results: 1000,
            max_files_scanned: 10_000,
            max_file_size: 10 * 1024 * 1024,
            deadline_ms: 30_000,
            per_line_regex_timeout_ms: 50,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoppedReason {
    None,
    MaxResults,
    MaxFiles,
    Timeout,
    Aborted,
}

#[derive(Debug, Default)]
pub struct SearchState {
    pub files_scanned: usize,
    pub files_matched: usize,
    pub matches: Vec<MatchRecord>,
    pub skipped_too_large: usize,
    pub skipped_binary: usize,
    pub skipped_inaccessible: usize,
    pub lines_skipped_regex_timeout: usize,
    pub truncated: bool,
    pub stopped_reason: Option<StoppedReason>,
}

impl SearchState {
    /// Once `truncated` is set the reason is final and never downgraded.
    fn set_stopped(&mut self, reason: StoppedReason) {
        if !self.truncated {
            self.truncated = true;
            self.stopped_reason = Some(reason);
        }
    }
}

/// A compiled matcher: either a case-folded literal substring scan (avoids
/// regex entirely) or a linear-time regex.
pub enum Matcher {
    Literal { needle: String, case_sensitive: bool },
    Regex(regex::Regex),
}

#[derive(Debug, Clone)]
pub struct MatcherOptions {
    pub pattern: String,
    pub is_literal: bool,
    pub whole_word: bool,
    pub case_sensitive: bool,
}

impl Matcher {
    pub fn build(opts: &MatcherOptions) -> Result<Self, FsError> {
        if opts.is_literal && !opts.whole_word {
            return Ok(Matcher::Literal {
                needle: if opts.case_sensitive {
                    opts.pattern.clone()
                } else {
                    opts.pattern.to_lowercase()
                },
                case_sensitive: opts.case_sensitive,
            });
        }

        let mut pattern = if opts.is_literal {
            regex::escape(&opts.pattern)
        } else {
            opts.pattern.clone()
        };
        if opts.whole_word {
            pattern = format!(r"\b(?:{pattern})\b");
        }

        check_redos_safety(&pattern)?;

        let compiled = RegexBuilder::new(&pattern)
            .case_insensitive(!opts.case_sensitive)
            .size_limit(10 * 1024 * 1024)
            .build()
            .map_err(|e| FsError::invalid_pattern(e.to_string()))?;
        Ok(Matcher::Regex(compiled))
    }

    /// Count occurrences of the pattern in `line`, subject to a per-line
    /// iteration/time budget for regex matchers (defense in depth beyond the
    /// engine's inherent linear-time guarantee).
    fn count_in_line(&self, line: &str, budget: &LineBudget) -> LineResult {
        match self {
            Matcher::Literal { needle, case_sensitive } => {
                let hay = if *case_sensitive {
                    std::borrow::Cow::Borrowed(line)
                } else {
                    std::borrow::Cow::Owned(line.to_lowercase())
                };
                LineResult::Count(hay.matches(needle.as_str()).count())
            }
            Matcher::Regex(re) => {
                let start = Instant::now();
                let mut count = 0usize;
                let max_iters = budget.max_iterations(line.len());
                for (i, _) in re.find_iter(line).enumerate() {
                    if i >= max_iters || start.elapsed() > budget.deadline {
                        return LineResult::TimedOut;
                    }
                    count += 1;
                }
                LineResult::Count(count)
            }
        }
    }

    /// Replace every match of the pattern in `text` with `replacement`,
    /// returning the rewritten text and the number of replacements made.
    /// Used by `search_and_replace`, which has no per-line context/timeout
    /// needs of its own and so skips the line-budget machinery `scan_file`
    /// applies for `grep`.
    pub fn replace_all(&self, text: &str, replacement: &str) -> (String, usize) {
        match self {
            Matcher::Literal { needle, case_sensitive } => {
                if *case_sensitive {
                    let count = text.matches(needle.as_str()).count();
                    (text.replace(needle.as_str(), replacement), count)
                } else {
                    replace_case_insensitive(text, needle, replacement)
                }
            }
            Matcher::Regex(re) => {
                let count = re.find_iter(text).count();
                (re.replace_all(text, replacement).into_owned(), count)
            }
        }
    }
}

/// Case-insensitive literal replace: `str::replace` has no case-insensitive
/// form, so matches are located against a lowercased copy and spliced out of
/// the original to preserve the replacement's own casing.
fn replace_case_insensitive(text: &str, needle: &str, replacement: &str) -> (String, usize) {
    if needle.is_empty() {
        return (text.to_string(), 0);
    }
    let lower_text = text.to_lowercase();
    let lower_needle = needle.to_lowercase();
    let mut out = String::with_capacity(text.len());
    let mut count = 0usize;
    let mut pos = 0usize;
    while let Some(found) = lower_text[pos..].find(&lower_needle) {
        let start = pos + found;
        let end = start + needle.len();
        out.push_str(&text[pos..start]);
        out.push_str(replacement);
        pos = end;
        count += 1;
    }
    out.push_str(&text[pos..]);
    (out, count)
}

enum LineResult {
    Count(usize),
    TimedOut,
}

struct LineBudget {
    deadline: Duration,
}

impl LineBudget {
    fn max_iterations(&self, line_len: usize) -> usize {
        (line_len.saturating_mul(2)).min(10_000)
    }
}

/// Reject patterns with nested-quantifier shapes that are expensive to even
/// compile (e.g. `(a+)+`), and cap overall pattern length. The `regex` crate
/// still can't exhibit catastrophic *runtime* blowup, but absurd patterns can
/// make compilation itself slow.
fn check_redos_safety(pattern: &str) -> Result<(), FsError> {
    if pattern.len() > 2000 {
        return Err(FsError::invalid_pattern("ReDoS risk detected: pattern too long"));
    }
    let mut depth = 0i32;
    let mut max_depth = 0i32;
    let mut prev_was_quantifier = false;
    for ch in pattern.chars() {
        match ch {
            '(' => {
                depth += 1;
                max_depth = max_depth.max(depth);
            }
            ')' => depth -= 1,
            '+' | '*' => {
                if prev_was_quantifier {
                    return Err(FsError::invalid_pattern(
                        "ReDoS risk detected: nested quantifiers",
                    ));
                }
                prev_was_quantifier = true;
                continue;
            }
            _ => {}
        }
        prev_was_quantifier = false;
    }
    if max_depth > 32 {
        return Err(FsError::invalid_pattern("ReDoS risk detected: excessive nesting"));
    }
    Ok(())
}

pub struct FileScanOptions {
    pub skip_binary: bool,
    pub context_lines: usize,
    pub max_line_len: usize,
}

impl Default for FileScanOptions {
    fn default() -> Self {
        Self {
            skip_binary: true,
            context_lines: 0,
            max_line_len: 10_000,
        }
    }
}

/// Scan a single file for matches, mutating `state` with per-file
/// accounting. Returns early (without error) on skip conditions — those are
/// recoverable and recorded in `state`, not surfaced as a tool-level error.
pub async fn scan_file(
    path: &std::path::Path,
    matcher: &Matcher,
    limits: &SearchLimits,
    scan_opts: &FileScanOptions,
    state: &mut SearchState,
    mut reserve_match_slot: impl FnMut(&SearchState) -> bool,
) -> Result<(), FsError> {
    let meta = match tokio::fs::metadata(path).await {
        Ok(m) => m,
        Err(_) => {
            state.skipped_inaccessible += 1;
            return Ok(());
        }
    };
    if meta.len() > limits.max_file_size {
        state.skipped_too_large += 1;
        return Ok(());
    }

    let bytes = match tokio::fs::read(path).await {
        Ok(b) => b,
        Err(_) => {
            state.skipped_inaccessible += 1;
            return Ok(());
        }
    };

    if scan_opts.skip_binary && looks_binary(&bytes) {
        state.skipped_binary += 1;
        return Ok(());
    }

    let text = String::from_utf8_lossy(&bytes);
    let budget = LineBudget {
        deadline: Duration::from_millis(limits.per_line_regex_timeout_ms),
    };

    let mut history: Vec<String> = Vec::with_capacity(scan_opts.context_lines);
    let mut pending_after: Vec<(usize, usize)> = Vec::new(); // (match index, lines remaining)

    state.files_scanned += 1;
    let mut matched_this_file = false;

    for (idx, raw_line) in text.lines().enumerate() {
        let line_number = idx + 1;
        let line = if raw_line.len() > scan_opts.max_line_len {
            &raw_line[..floor_char_boundary(raw_line, scan_opts.max_line_len)]
        } else {
            raw_line
        };

        // Feed completed context_after windows before processing the new line.
        let mut i = 0;
        while i < pending_after.len() {
            let (match_idx, remaining) = pending_after[i];
            if remaining == 0 {
                i += 1;
                continue;
            }
            state.matches[match_idx].context_after.push(line.to_string());
            pending_after[i].1 -= 1;
            i += 1;
        }
        pending_after.retain(|(_, remaining)| *remaining > 0);

        match matcher.count_in_line(line, &budget) {
            LineResult::TimedOut => {
                state.lines_skipped_regex_timeout += 1;
            }
            LineResult::Count(0) => {}
            LineResult::Count(count) => {
                if !reserve_match_slot(state) {
                    state.set_stopped(StoppedReason::MaxResults);
                    return Ok(());
                }
                matched_this_file = true;
                let record = MatchRecord {
                    file: path.to_path_buf(),
                    line_number,
                    content: line.to_string(),
                    match_count: count,
                    context_before: history.clone(),
                    context_after: Vec::new(),
                };
                let record_idx = state.matches.len();
                state.matches.push(record);
                if scan_opts.context_lines > 0 {
                    pending_after.push((record_idx, scan_opts.context_lines));
                }
                if state.matches.len() >= limits.max_results {
                    state.set_stopped(StoppedReason::MaxResults);
                    break;
                }
            }
        }

        if scan_opts.context_lines > 0 {
            history.push(line.to_string());
            if history.len() > scan_opts.context_lines {
                history.remove(0);
            }
        }
    }

    if matched_this_file {
        state.files_matched += 1;
    }
    Ok(())
}

/// A file is binary iff it contains a NUL byte or fails UTF-8 validation,
/// probed over a leading prefix. Empty files and UTF-8 BOM are text.
fn looks_binary(bytes: &[u8]) -> bool {
    let probe_len = bytes.len().min(8192);
    let probe = &bytes[..probe_len];
    if probe.contains(&0u8) {
        return true;
    }
    std::str::from_utf8(probe).is_err()
}

pub fn stopped_reason_code(reason: StoppedReason) -> ErrorCode {
    match reason {
        StoppedReason::Timeout => ErrorCode::ETimeout,
        _ => ErrorCode::EUnknown,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn always_reserve(_: &SearchState) -> bool {
        true
    }

    #[tokio::test]
    async fn literal_match_counts_occurrences() {
        let dir = tempdir().unwrap();
        let file = dir.path().join("notes.md");
        tokio::fs::write(&file, "TODO: task\nsomething else\nTODO: another\n")
            .await
            .unwrap();

        let matcher = Matcher::build(&MatcherOptions {
            pattern: "TODO".to_string(),
            is_literal: true,
            whole_word: false,
            case_sensitive: true,
        })
        .unwrap();

        let mut state = SearchState::default();
        scan_file(
            &file,
            &matcher,
            &SearchLimits::default(),
            &FileScanOptions::default(),
            &mut state,
            always_reserve,
        )
        .await
        .unwrap();

        assert_eq!(state.matches.len(), 2);
        assert_eq!(state.matches[0].line_number, 1);
    }

    #[tokio::test]
    async fn regex_match_with_context() {
        let dir = tempdir().unwrap();
        let file = dir.path().join("notes.md");
        tokio::fs::write(&file, "before\nTODO: task\nafter\n")
            .await
            .unwrap();

        let matcher = Matcher::build(&MatcherOptions {
            pattern: r"TODO:\s+\w+".to_string(),
            is_literal: false,
            whole_word: false,
            case_sensitive: true,
        })
        .unwrap();

        let mut state = SearchState::default();
        let mut opts = FileScanOptions::default();
        opts.context_lines = 1;
        scan_file(
            &file,
            &matcher,
            &SearchLimits::default(),
            &opts,
            &mut state,
            always_reserve,
        )
        .await
        .unwrap();

        assert_eq!(state.matches.len(), 1);
        assert_eq!(state.matches[0].context_before, vec!["before".to_string()]);
        assert_eq!(state.matches[0].context_after, vec!["after".to_string()]);
    }

    #[tokio::test]
    async fn binary_file_is_skipped() {
        let dir = tempdir().unwrap();
        let file = dir.path().join("blob.bin");
        tokio::fs::write(&file, [0u8, 1, 2, 3]).await.unwrap();

        let matcher = Matcher::build(&MatcherOptions {
            pattern: "x".to_string(),
            is_literal: true,
            whole_word: false,
            case_sensitive: true,
        })
        .unwrap();

        let mut state = SearchState::default();
        scan_file(
            &file,
            &matcher,
            &SearchLimits::default(),
            &FileScanOptions::default(),
            &mut state,
            always_reserve,
        )
        .await
        .unwrap();

        assert_eq!(state.skipped_binary, 1);
        assert!(state.matches.is_empty());
    }

    #[tokio::test]
    async fn oversized_file_is_skipped() {
        let dir = tempdir().unwrap();
        let file = dir.path().join("big.txt");
        tokio::fs::write(&file, "x".repeat(100)).await.unwrap();

        let matcher = Matcher::build(&MatcherOptions {
            pattern: "x".to_string(),
            is_literal: true,
            whole_word: false,
            case_sensitive: true,
        })
        .unwrap();

        let mut limits = SearchLimits::default();
        limits.max_file_size = 10;
        let mut state = SearchState::default();
        scan_file(
            &file,
            &matcher,
            &limits,
            &FileScanOptions::default(),
            &mut state,
            always_reserve,
        )
        .await
        .unwrap();

        assert_eq!(state.skipped_too_large, 1);
    }

    #[test]
    fn redos_nested_quantifier_rejected() {
        let err = Matcher::build(&MatcherOptions {
            pattern: "(a+)+".to_string(),
            is_literal: false,
            whole_word: false,
            case_sensitive: true,
        })
        .unwrap_err();
        assert_eq!(err.code, ErrorCode::EInvalidPattern);
    }

    #[test]
    fn invalid_regex_syntax_rejected() {
        let err = Matcher::build(&MatcherOptions {
            pattern: "(unclosed".to_string(),
            is_literal: false,
            whole_word: false,
            case_sensitive: true,
        })
        .unwrap_err();
        assert_eq!(err.code, ErrorCode::EInvalidPattern);
    }
}
