//! `FsContextServer`: the thin MCP transport adapter. Every tool method
//! validates that the client has completed its "initialized" handshake, then
//! delegates to the corresponding function in `crate::tools::*`, wrapping the
//! `Result<T, FsError>` into a `CallToolResult` via `into_call_tool_result`
//! and publishing a diagnostics span around the call.

use std::path::PathBuf;
use std::sync::Arc;

use rmcp::handler::server::router::tool::ToolRouter;
use rmcp::handler::server::wrapper::Parameters;
use rmcp::model::{
    AnnotateAble, CallToolResult, Implementation, ListResourcesResult, PaginatedRequestParam,
    RawResource, ReadResourceRequestParam, ReadResourceResult, ResourceContents,
    ServerCapabilities, ServerInfo,
};
use rmcp::service::{NotificationContext, RequestContext, RoleServer};
use rmcp::{tool, tool_handler, tool_router, ErrorData as McpError, ServerHandler};

use crate::concurrency::with_abort;
use crate::config::Config;
use crate::diagnostics;
use crate::error::{ErrorCode, FsError};
use crate::resources::{ResourceStore, ResourceStoreConfig};
use crate::sandbox::roots::RootSupervisor;
use crate::sandbox::PathSandbox;
use crate::tools::diff::{self, ApplyPatchArgs, DiffFilesArgs};
use crate::tools::grep as grep_tool;
use crate::tools::grep::GrepArgs;
use crate::tools::hash::{self, CalculateHashArgs};
use crate::tools::listing::{self, FindArgs, LsArgs, TreeArgs};
use crate::tools::read::{self, ReadArgs, ReadManyArgs, StatArgs, StatManyArgs};
use crate::tools::search_replace::{self, SearchAndReplaceArgs};
use crate::tools::write::{self, EditArgs, MkdirArgs, MvArgs, RmArgs, WriteArgs};
use crate::tools::{into_call_tool_result, materialize_if_oversized, ProgressReporter};

const INSTRUCTIONS: &str = "\
fs-context-mcp: a sandboxed filesystem server.\n\n\
Every path argument is validated against the allowed roots (see `roots`) before it is\n\
touched; requests that resolve outside those roots — directly, via `..`, or via a\n\
symlink — fail with E_ACCESS_DENIED.\n\n\
Tools:\n\
- `roots`: list the directories this server is allowed to touch.\n\
- `ls`, `find`, `tree`: directory listing and search by glob pattern.\n\
- `read`, `read_many`, `stat`, `stat_many`: file content and metadata.\n\
- `grep`: content search with literal or regex matching and context lines.\n\
- `mkdir`, `write`, `edit`, `mv`, `rm`: filesystem mutation.\n\
- `calculate_hash`: SHA-256 of a file or a deterministic composite hash of a directory.\n\
- `diff_files`, `apply_patch`: unified diff generation and application.\n\
- `search_and_replace`: batch literal/regex replacement across a file tree.\n\n\
Large outputs (reads, diffs, search results) over ~25000 characters are materialized into\n\
an in-memory resource store and returned as a truncated preview plus a `resourceUri` of the\n\
form `filesystem-mcp://result/{uuid}`; fetch the full content with a resource read.";

#[derive(Clone)]
pub struct FsContextServer {
    sandbox: Arc<PathSandbox>,
    resources: Arc<ResourceStore>,
    config: Arc<Config>,
    tool_router: ToolRouter<Self>,
}

#[tool_router]
impl FsContextServer {
    pub async fn new(config: Config) -> std::io::Result<Self> {
        let roots = RootSupervisor::new(config.baseline_roots.clone(), config.allow_cwd).await?;
        let sandbox = PathSandbox::new(roots, config.allow_sensitive, &config.sensitive_allowlist);
        Ok(Self {
            sandbox: Arc::new(sandbox),
            resources: Arc::new(ResourceStore::new(ResourceStoreConfig::default())),
            config: Arc::new(config),
            tool_router: Self::tool_router(),
        })
    }

    /// Every tool goes through this before touching the engine; the
    /// `RootSupervisor` transitions to `Initialized` on the client's first
    /// "initialized" notification, not merely on having a non-empty root
    /// list (the CLI baseline is never empty — see `RootSupervisor::new`).
    async fn check_initialized(&self) -> Result<(), FsError> {
        if self.sandbox.roots().is_initialized().await {
            Ok(())
        } else {
            Err(FsError::new(
                ErrorCode::EInvalidInput,
                "Client not initialized",
            ))
        }
    }

    /// Runs `fut` under the caller's cancellation signal, wrapping the result
    /// in a diagnostics span and rendering it to the wire envelope. `human`
    /// formats the success case into the human-readable preview text;
    /// failures render their message directly. Emits a start/terminal
    /// progress pair when the caller's request carries a progress token, and
    /// materializes oversized human output into the resource store before it
    /// reaches the envelope.
    async fn run<T: serde::Serialize>(
        &self,
        name: &'static str,
        path_hint: Option<&str>,
        context: &RequestContext<RoleServer>,
        fut: impl std::future::Future<Output = Result<T, FsError>>,
        human: impl FnOnce(&T) -> String,
    ) -> CallToolResult {
        let span = diagnostics::start(&self.config, name, path_hint);
        let progress_token = context.meta.get_progress_token();
        let mut progress = ProgressReporter::new(Some(context.peer.clone()), progress_token, Some(1));
        progress.start().await;

        let result = with_abort(fut, context.ct.clone()).await;

        match &result {
            Ok(_) => span.finish(true, None, path_hint),
            Err(e) => {
                if self.config.log_tool_errors {
                    tracing::error!(tool = name, code = e.code.as_str(), message = %e.message, "tool call failed");
                }
                span.finish(false, Some(e.code.as_str()), path_hint);
            }
        }
        progress.finish(1).await;

        let human_text = match &result {
            Ok(v) => human(v),
            Err(e) => e.message.clone(),
        };
        let human_text = match materialize_if_oversized(&self.resources, name, human_text.clone()).await {
            Ok((text, _uri)) => text,
            Err(_) => human_text,
        };
        into_call_tool_result(result, human_text)
    }

    fn init_rejection<T: serde::Serialize>(&self, e: FsError) -> CallToolResult {
        into_call_tool_result(Err::<T, _>(e), String::new())
    }

    #[tool(description = "List the directories this server is allowed to touch.", annotations(read_only_hint = true))]
    async fn roots(&self, context: RequestContext<RoleServer>) -> Result<CallToolResult, McpError> {
        if let Err(e) = self.check_initialized().await {
            return Ok(self.init_rejection::<()>(e));
        }
        let resp = listing::roots(&self.sandbox).await;
        Ok(self
            .run("roots", None, &context, async move { Ok::<_, FsError>(resp) }, |r| {
                format!("{} allowed root(s)", r.roots.len())
            })
            .await)
    }

    #[tool(description = "List directory entries. Non-recursive; pass includeHidden/includeIgnored to widen the view.", annotations(read_only_hint = true))]
    async fn ls(&self, Parameters(args): Parameters<LsArgs>, context: RequestContext<RoleServer>) -> Result<CallToolResult, McpError> {
        if let Err(e) = self.check_initialized().await {
            return Ok(self.init_rejection::<()>(e));
        }
        let path = args.path.clone();
        Ok(self
            .run("ls", path.as_deref(), &context, listing::ls(&self.sandbox, args), |r| {
                format!("{} entries in {}", r.entries.len(), r.path)
            })
            .await)
    }

    #[tool(description = "Find files/directories under a path matching a glob pattern.", annotations(read_only_hint = true))]
    async fn find(&self, Parameters(args): Parameters<FindArgs>, context: RequestContext<RoleServer>) -> Result<CallToolResult, McpError> {
        if let Err(e) = self.check_initialized().await {
            return Ok(self.init_rejection::<()>(e));
        }
        let path = args.path.clone();
        Ok(self
            .run("find", Some(&path), &context, listing::find(&self.sandbox, args), |r| {
                format!("{} match(es){}", r.matches.len(), if r.truncated { " (truncated)" } else { "" })
            })
            .await)
    }

    #[tool(description = "Render a directory as an ASCII tree plus structured nodes.", annotations(read_only_hint = true))]
    async fn tree(&self, Parameters(args): Parameters<TreeArgs>, context: RequestContext<RoleServer>) -> Result<CallToolResult, McpError> {
        if let Err(e) = self.check_initialized().await {
            return Ok(self.init_rejection::<()>(e));
        }
        let path = args.path.clone();
        Ok(self
            .run("tree", Some(&path), &context, listing::tree(&self.sandbox, args), |r| r.ascii.clone())
            .await)
    }

    #[tool(description = "Read a file's content, optionally sliced by head/tail/lineStart+lineEnd. Oversized content is materialized into a resourceUri.", annotations(read_only_hint = true))]
    async fn read(&self, Parameters(args): Parameters<ReadArgs>, context: RequestContext<RoleServer>) -> Result<CallToolResult, McpError> {
        if let Err(e) = self.check_initialized().await {
            return Ok(self.init_rejection::<()>(e));
        }
        let path = args.path.clone();
        let resources = self.resources.clone();
        Ok(self
            .run("read", Some(&path), &context, read::read(&self.sandbox, &resources, args), |r| r.content.clone())
            .await)
    }

    #[tool(description = "Read several files in parallel with per-entry error capture.", annotations(read_only_hint = true))]
    async fn read_many(&self, Parameters(args): Parameters<ReadManyArgs>, context: RequestContext<RoleServer>) -> Result<CallToolResult, McpError> {
        if let Err(e) = self.check_initialized().await {
            return Ok(self.init_rejection::<()>(e));
        }
        let sandbox = self.sandbox.clone();
        let resources = self.resources.clone();
        let cancel = context.ct.clone();
        Ok(self
            .run(
                "read_many",
                None,
                &context,
                async move { Ok::<_, FsError>(read::read_many(sandbox, resources, args, cancel).await) },
                |r| {
                    format!(
                        "{}/{} reads succeeded",
                        r.entries.iter().filter(|e| e.ok).count(),
                        r.entries.len()
                    )
                },
            )
            .await)
    }

    #[tool(description = "Stat a path: file/directory/symlink, size, mtime.", annotations(read_only_hint = true))]
    async fn stat(&self, Parameters(args): Parameters<StatArgs>, context: RequestContext<RoleServer>) -> Result<CallToolResult, McpError> {
        if let Err(e) = self.check_initialized().await {
            return Ok(self.init_rejection::<()>(e));
        }
        let path = args.path.clone();
        Ok(self
            .run("stat", Some(&path), &context, read::stat(&self.sandbox, args), |r| {
                format!("{}: {} bytes", r.path, r.size)
            })
            .await)
    }

    #[tool(description = "Stat several paths, with per-entry error capture.", annotations(read_only_hint = true))]
    async fn stat_many(&self, Parameters(args): Parameters<StatManyArgs>, context: RequestContext<RoleServer>) -> Result<CallToolResult, McpError> {
        if let Err(e) = self.check_initialized().await {
            return Ok(self.init_rejection::<()>(e));
        }
        Ok(self
            .run(
                "stat_many",
                None,
                &context,
                async { Ok::<_, FsError>(read::stat_many(&self.sandbox, args).await) },
                |r| {
                    format!(
                        "{}/{} stats succeeded",
                        r.entries.iter().filter(|e| e.ok).count(),
                        r.entries.len()
                    )
                },
            )
            .await)
    }

    #[tool(description = "Search file content with a literal or regex pattern; supports context lines and a file glob filter.", annotations(read_only_hint = true))]
    async fn grep(&self, Parameters(args): Parameters<GrepArgs>, context: RequestContext<RoleServer>) -> Result<CallToolResult, McpError> {
        if let Err(e) = self.check_initialized().await {
            return Ok(self.init_rejection::<()>(e));
        }
        let path = args.path.clone();
        let cancel = context.ct.clone();
        Ok(self
            .run("grep", Some(&path), &context, grep_tool::grep(&self.sandbox, args, cancel), |r| {
                format!(
                    "{} match(es) across {} file(s) scanned{}",
                    r.total_matches,
                    r.files_scanned,
                    if r.truncated { " (truncated)" } else { "" }
                )
            })
            .await)
    }

    #[tool(description = "Create a directory, including parents.")]
    async fn mkdir(&self, Parameters(args): Parameters<MkdirArgs>, context: RequestContext<RoleServer>) -> Result<CallToolResult, McpError> {
        if let Err(e) = self.check_initialized().await {
            return Ok(self.init_rejection::<()>(e));
        }
        let path = args.path.clone();
        Ok(self
            .run("mkdir", Some(&path), &context, write::mkdir(&self.sandbox, args), |r| r.path.clone())
            .await)
    }

    #[tool(description = "Write content to a file, creating parent directories as needed.")]
    async fn write(&self, Parameters(args): Parameters<WriteArgs>, context: RequestContext<RoleServer>) -> Result<CallToolResult, McpError> {
        if let Err(e) = self.check_initialized().await {
            return Ok(self.init_rejection::<()>(e));
        }
        let path = args.path.clone();
        Ok(self
            .run("write", Some(&path), &context, write::write(&self.sandbox, args), |r| {
                format!("wrote {} bytes to {}", r.bytes_written, r.path)
            })
            .await)
    }

    #[tool(description = "Apply a sequence of oldText/newText replacements to a file. dryRun returns a preview diff without writing.")]
    async fn edit(&self, Parameters(args): Parameters<EditArgs>, context: RequestContext<RoleServer>) -> Result<CallToolResult, McpError> {
        if let Err(e) = self.check_initialized().await {
            return Ok(self.init_rejection::<()>(e));
        }
        let path = args.path.clone();
        Ok(self
            .run("edit", Some(&path), &context, write::edit(&self.sandbox, args), |r| {
                format!("{} edit(s) applied, {} unmatched", r.applied, r.unmatched_edits.len())
            })
            .await)
    }

    #[tool(description = "Move or rename a file or directory, falling back to copy+delete across devices.")]
    async fn mv(&self, Parameters(args): Parameters<MvArgs>, context: RequestContext<RoleServer>) -> Result<CallToolResult, McpError> {
        if let Err(e) = self.check_initialized().await {
            return Ok(self.init_rejection::<()>(e));
        }
        let source = args.source.clone();
        Ok(self
            .run("mv", Some(&source), &context, write::mv(&self.sandbox, args), |r| {
                format!("{} -> {}", r.source, r.destination)
            })
            .await)
    }

    #[tool(description = "Remove a file or directory. Refuses a non-empty directory unless recursive is set.")]
    async fn rm(&self, Parameters(args): Parameters<RmArgs>, context: RequestContext<RoleServer>) -> Result<CallToolResult, McpError> {
        if let Err(e) = self.check_initialized().await {
            return Ok(self.init_rejection::<()>(e));
        }
        let path = args.path.clone();
        Ok(self
            .run("rm", Some(&path), &context, write::rm(&self.sandbox, args), |r| {
                format!("removed={} path={}", r.removed, r.path)
            })
            .await)
    }

    #[tool(description = "SHA-256 of a file, or a deterministic composite hash of a directory's contents.", annotations(read_only_hint = true))]
    async fn calculate_hash(&self, Parameters(args): Parameters<CalculateHashArgs>, context: RequestContext<RoleServer>) -> Result<CallToolResult, McpError> {
        if let Err(e) = self.check_initialized().await {
            return Ok(self.init_rejection::<()>(e));
        }
        let path = args.path.clone();
        Ok(self
            .run("calculate_hash", Some(&path), &context, hash::calculate_hash(&self.sandbox, args), |r| r.sha256_hex.clone())
            .await)
    }

    #[tool(description = "Produce a unified diff between two files.", annotations(read_only_hint = true))]
    async fn diff_files(&self, Parameters(args): Parameters<DiffFilesArgs>, context: RequestContext<RoleServer>) -> Result<CallToolResult, McpError> {
        if let Err(e) = self.check_initialized().await {
            return Ok(self.init_rejection::<()>(e));
        }
        let original = args.original.clone();
        Ok(self
            .run("diff_files", Some(&original), &context, diff::diff_files(&self.sandbox, args), |r| r.unified_diff.clone())
            .await)
    }

    #[tool(description = "Apply a unified diff to a file, with fuzzy line-window matching. dryRun returns a preview without writing.")]
    async fn apply_patch(&self, Parameters(args): Parameters<ApplyPatchArgs>, context: RequestContext<RoleServer>) -> Result<CallToolResult, McpError> {
        if let Err(e) = self.check_initialized().await {
            return Ok(self.init_rejection::<()>(e));
        }
        let path = args.path.clone();
        Ok(self
            .run("apply_patch", Some(&path), &context, diff::apply_patch(&self.sandbox, args), |r| {
                format!("{}/{} hunk(s) applied", r.hunks_applied, r.hunks_total)
            })
            .await)
    }

    #[tool(description = "Batch literal/regex search-and-replace across files matching a glob pattern. dryRun reports without writing.")]
    async fn search_and_replace(&self, Parameters(args): Parameters<SearchAndReplaceArgs>, context: RequestContext<RoleServer>) -> Result<CallToolResult, McpError> {
        if let Err(e) = self.check_initialized().await {
            return Ok(self.init_rejection::<()>(e));
        }
        let path = args.path.clone();
        let cancel = context.ct.clone();
        Ok(self
            .run(
                "search_and_replace",
                Some(&path),
                &context,
                search_replace::search_and_replace(&self.sandbox, args, cancel),
                |r| format!("{} replacement(s) across {} file(s)", r.total_replacements, r.files_changed),
            )
            .await)
    }
}

#[tool_handler]
impl ServerHandler for FsContextServer {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            server_info: Implementation {
                name: "fs-context-mcp".to_string(),
                version: env!("CARGO_PKG_VERSION").to_string(),
                ..Default::default()
            },
            instructions: Some(INSTRUCTIONS.to_string()),
            capabilities: ServerCapabilities::builder()
                .enable_tools()
                .enable_resources()
                .build(),
            ..Default::default()
        }
    }

    async fn list_resources(
        &self,
        _request: Option<PaginatedRequestParam>,
        _context: RequestContext<RoleServer>,
    ) -> Result<ListResourcesResult, McpError> {
        let instructions = RawResource {
            uri: "internal://instructions".to_string(),
            name: "instructions".to_string(),
            description: Some("Server usage guide".to_string()),
            mime_type: Some("text/markdown".to_string()),
            size: None,
        }
        .no_annotation();
        Ok(ListResourcesResult {
            resources: vec![instructions],
            next_cursor: None,
        })
    }

    async fn read_resource(
        &self,
        request: ReadResourceRequestParam,
        _context: RequestContext<RoleServer>,
    ) -> Result<ReadResourceResult, McpError> {
        if request.uri == "internal://instructions" {
            return Ok(ReadResourceResult {
                contents: vec![ResourceContents::text(INSTRUCTIONS, request.uri.clone())],
            });
        }
        let entry = self
            .resources
            .get_text(&request.uri)
            .await
            .map_err(|e| McpError::invalid_params(e.message, None))?;
        Ok(ReadResourceResult {
            contents: vec![ResourceContents::text(entry.text, entry.uri)],
        })
    }

    /// Fires on the client's "initialized" notification: the point at which
    /// `RootSupervisor` transitions out of `Uninitialized` and tools stop
    /// rejecting with `E_INVALID_INPUT "Client not initialized"`.
    async fn on_initialized(&self, _context: NotificationContext<RoleServer>) {
        self.sandbox.roots().mark_initialized().await;
    }

    /// Fires on a "roots list changed" notification: re-fetches the client's
    /// advertised roots and recomputes the allow-list snapshot, dropping any
    /// candidate that escapes the CLI baseline.
    async fn on_roots_list_changed(&self, context: NotificationContext<RoleServer>) {
        let Ok(result) = context.peer.list_roots().await else {
            tracing::warn!("failed to fetch client roots after list_changed notification");
            return;
        };
        let roots: Vec<PathBuf> = result
            .roots
            .into_iter()
            .filter_map(|r| r.uri.strip_prefix("file://").map(PathBuf::from))
            .collect();
        self.sandbox.roots().update_client_roots(roots).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn uninitialized_server_rejects_tool_calls() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config {
            baseline_roots: vec![dir.path().to_path_buf()],
            allow_cwd: false,
            diagnostics: false,
            diagnostics_detail: 0,
            log_tool_errors: false,
            allow_sensitive: false,
            sensitive_allowlist: vec![],
        };
        let server = FsContextServer::new(config).await.unwrap();
        let err = server.check_initialized().await.unwrap_err();
        assert_eq!(err.code, ErrorCode::EInvalidInput);

        server.sandbox.roots().mark_initialized().await;
        assert!(server.check_initialized().await.is_ok());
    }
}
