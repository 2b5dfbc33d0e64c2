//! Diagnostics channel: optional start/end events per tool call, published as
//! `tracing` events rather than a bespoke pub/sub bus — subscribers (or their
//! absence) are indistinguishable to the caller either way, since nothing in
//! the tool's return value depends on whether anyone is listening.

use std::time::Instant;

use sha2::{Digest, Sha256};

use crate::config::Config;

pub struct ToolSpan {
    tool: &'static str,
    started_at: Instant,
    diagnostics: bool,
    detail: u8,
}

/// Start a diagnostics span for a tool call. Emits a `start` event
/// immediately if diagnostics are enabled; always returns a handle so the
/// caller can unconditionally call `finish` without branching on config.
pub fn start(config: &Config, tool: &'static str, path: Option<&str>) -> ToolSpan {
    let span = ToolSpan {
        tool,
        started_at: Instant::now(),
        diagnostics: config.diagnostics,
        detail: config.diagnostics_detail,
    };
    if span.diagnostics {
        tracing::info!(
            event = "start",
            tool = span.tool,
            path = redact(path, span.detail).as_deref().unwrap_or("-"),
            "tool call started"
        );
    }
    span
}

impl ToolSpan {
    pub fn finish(self, ok: bool, error: Option<&str>, path: Option<&str>) {
        let duration_ms = self.started_at.elapsed().as_millis();
        if self.diagnostics {
            tracing::info!(
                event = "end",
                tool = self.tool,
                duration_ms,
                ok,
                error = error.unwrap_or("-"),
                path = redact(path, self.detail).as_deref().unwrap_or("-"),
                "tool call finished"
            );
        }
    }
}

/// Apply the `FS_CONTEXT_DIAGNOSTICS_DETAIL` policy to a path before it is
/// published: 0 = omit entirely, 1 = sha256-truncated, 2 = full path.
fn redact(path: Option<&str>, detail: u8) -> Option<String> {
    let path = path?;
    match detail {
        0 => None,
        1 => {
            let digest = Sha256::digest(path.as_bytes());
            Some(hex::encode(&digest[..8]))
        }
        _ => Some(path.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detail_zero_omits_path() {
        assert_eq!(redact(Some("/tmp/x"), 0), None);
    }

    #[test]
    fn detail_one_truncates_hash() {
        let hash = redact(Some("/tmp/x"), 1).unwrap();
        assert_eq!(hash.len(), 16);
    }

    #[test]
    fn detail_two_keeps_full_path() {
        assert_eq!(redact(Some("/tmp/x"), 2).as_deref(), Some("/tmp/x"));
    }
}
