//! Process configuration: CLI arguments plus environment variables, read once
//! at startup. Modeled on the teacher's `Config::from_env()` idiom — env
//! values are read with documented defaults and a `tracing::warn!` on
//! malformed input, never a panic.

use std::path::PathBuf;

use clap::Parser;

/// A sandboxed filesystem MCP server.
#[derive(Debug, Parser)]
#[command(name = "fs-context-mcp", version, about)]
pub struct Cli {
    /// Allowed root directories. At least one, unless --allow-cwd is set.
    pub roots: Vec<PathBuf>,

    /// Grant the current working directory as an allowed root.
    #[arg(long = "allow-cwd", alias = "allow_cwd")]
    pub allow_cwd: bool,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub baseline_roots: Vec<PathBuf>,
    pub allow_cwd: bool,
    pub diagnostics: bool,
    pub diagnostics_detail: u8,
    pub log_tool_errors: bool,
    pub allow_sensitive: bool,
    pub sensitive_allowlist: Vec<String>,
}

impl Config {
    pub fn from_cli(cli: Cli) -> Self {
        let diagnostics = env_flag("FS_CONTEXT_DIAGNOSTICS");
        let diagnostics_detail = env_detail_level();
        let log_tool_errors = env_flag("FS_CONTEXT_TOOL_LOG_ERRORS");
        let allow_sensitive = env_flag("FS_CONTEXT_ALLOW_SENSITIVE");
        let sensitive_allowlist = std::env::var("FS_CONTEXT_ALLOWLIST")
            .ok()
            .map(|raw| {
                raw.split(',')
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())
                    .collect()
            })
            .unwrap_or_default();

        Self {
            baseline_roots: cli.roots,
            allow_cwd: cli.allow_cwd,
            diagnostics,
            diagnostics_detail,
            log_tool_errors,
            allow_sensitive,
            sensitive_allowlist,
        }
    }
}

fn env_flag(name: &str) -> bool {
    match std::env::var(name) {
        Ok(v) => v == "1" || v.eq_ignore_ascii_case("true"),
        Err(_) => false,
    }
}

fn env_detail_level() -> u8 {
    match std::env::var("FS_CONTEXT_DIAGNOSTICS_DETAIL") {
        Ok(v) => match v.parse::<u8>() {
            Ok(n) if n <= 2 => n,
            _ => {
                tracing::warn!(value = %v, "invalid FS_CONTEXT_DIAGNOSTICS_DETAIL, defaulting to 0");
                0
            }
        },
        Err(_) => 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_roots_become_baseline() {
        let cli = Cli {
            roots: vec![PathBuf::from("/tmp")],
            allow_cwd: true,
        };
        let config = Config::from_cli(cli);
        assert_eq!(config.baseline_roots, vec![PathBuf::from("/tmp")]);
        assert!(config.allow_cwd);
    }
}
