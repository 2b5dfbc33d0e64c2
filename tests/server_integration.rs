//! End-to-end coverage driving `FsContextServer`'s constituent engine
//! directly, the way a client would exercise it tool-by-tool after the
//! "initialized" handshake. Each test constructs its own `PathSandbox` plus a
//! dedicated `TempDir` root rather than going through stdio transport.

use std::fs;
use std::os::unix::fs::symlink;

use fs_context_mcp::config::Config;
use fs_context_mcp::error::ErrorCode;
use fs_context_mcp::resources::{PutTextInput, ResourceStore, ResourceStoreConfig};
use fs_context_mcp::sandbox::roots::RootSupervisor;
use fs_context_mcp::sandbox::PathSandbox;
use fs_context_mcp::tools::diff::{self, ApplyPatchArgs, DiffFilesArgs};
use fs_context_mcp::tools::grep::{self, GrepArgs};
use fs_context_mcp::tools::listing::{self, FindArgs, LsArgs, TreeArgs};
use fs_context_mcp::tools::read::{self, ReadArgs};
use fs_context_mcp::tools::write::{self, RmArgs, WriteArgs};

async fn sandbox_over(root: &std::path::Path) -> PathSandbox {
    let roots = RootSupervisor::new(vec![root.to_path_buf()], false)
        .await
        .unwrap();
    roots.mark_initialized().await;
    PathSandbox::new(roots, false, &[])
}

fn args_path(path: impl Into<String>) -> String {
    path.into()
}

#[tokio::test]
async fn config_from_cli_uses_given_roots_as_baseline() {
    let dir = tempfile::tempdir().unwrap();
    let cli = fs_context_mcp::config::Cli {
        roots: vec![dir.path().to_path_buf()],
        allow_cwd: false,
    };
    let config = Config::from_cli(cli);
    assert_eq!(config.baseline_roots, vec![dir.path().to_path_buf()]);
    assert!(!config.allow_cwd);
}

// S1: a symlink inside the sandbox pointing outside it must not grant access.
#[tokio::test]
async fn symlink_escaping_root_is_rejected() {
    let root = tempfile::tempdir().unwrap();
    let outside = tempfile::tempdir().unwrap();
    fs::write(outside.path().join("secret.txt"), b"top secret").unwrap();

    let link = root.path().join("escape");
    symlink(outside.path(), &link).unwrap();

    let sandbox = sandbox_over(root.path()).await;
    let resources = ResourceStore::new(ResourceStoreConfig::default());

    let err = read::read(
        &sandbox,
        &resources,
        ReadArgs {
            path: args_path(link.join("secret.txt").to_string_lossy().to_string()),
            head: None,
            tail: None,
            line_start: None,
            line_end: None,
            skip_binary: true,
        },
    )
    .await
    .unwrap_err();

    assert_eq!(err.code, ErrorCode::EAccessDenied);
}

// S2: head on a file shorter than the requested head count returns the
// whole file rather than erroring, with has_more_lines = false.
#[tokio::test]
async fn head_on_short_file_returns_everything() {
    let root = tempfile::tempdir().unwrap();
    fs::write(root.path().join("short.txt"), "one\ntwo\nthree\n").unwrap();
    let sandbox = sandbox_over(root.path()).await;
    let resources = ResourceStore::new(ResourceStoreConfig::default());

    let resp = read::read(
        &sandbox,
        &resources,
        ReadArgs {
            path: args_path("short.txt"),
            head: Some(100),
            tail: None,
            line_start: None,
            line_end: None,
            skip_binary: true,
        },
    )
    .await
    .unwrap();

    assert_eq!(resp.content, "one\ntwo\nthree\n");
    assert!(!resp.has_more_lines);
    assert!(!resp.truncated);
}

// S3: grep with a regex pattern across a small tree.
#[tokio::test]
async fn grep_matches_with_regex_pattern() {
    let root = tempfile::tempdir().unwrap();
    fs::write(root.path().join("a.txt"), "alpha\nbeta123\ngamma\n").unwrap();
    fs::write(root.path().join("b.txt"), "no digits here\n").unwrap();
    let sandbox = sandbox_over(root.path()).await;

    let resp = grep::grep(
        &sandbox,
        GrepArgs {
            path: args_path("."),
            pattern: r"\w+\d+".to_string(),
            is_regex: true,
            file_pattern: None,
            context_lines: None,
            case_sensitive: true,
            whole_word: false,
            is_literal: false,
            max_results: None,
            timeout_ms: None,
        },
        tokio_util::sync::CancellationToken::new(),
    )
    .await
    .unwrap();

    assert_eq!(resp.total_matches, 1);
    assert_eq!(resp.files_matched, 1);
    assert!(!resp.truncated);
}

// S4: a read whose content exceeds the materialize threshold gets a
// resource_uri rather than inlining the full content.
#[tokio::test]
async fn oversized_read_materializes_into_resource_store() {
    let root = tempfile::tempdir().unwrap();
    let big = "x".repeat(30_000);
    fs::write(root.path().join("big.txt"), &big).unwrap();
    let sandbox = sandbox_over(root.path()).await;
    let resources = ResourceStore::new(ResourceStoreConfig::default());

    let resp = read::read(
        &sandbox,
        &resources,
        ReadArgs {
            path: args_path("big.txt"),
            head: None,
            tail: None,
            line_start: None,
            line_end: None,
            skip_binary: true,
        },
    )
    .await
    .unwrap();

    assert!(resp.truncated);
    let uri = resp.resource_uri.expect("expected a resource_uri");
    assert!(uri.starts_with("filesystem-mcp://result/"));

    let fetched = resources.get_text(&uri).await.unwrap();
    assert_eq!(fetched.text, big);
}

// S5: rm without recursive on a non-empty directory is refused.
#[tokio::test]
async fn rm_refuses_nonempty_directory_without_recursive() {
    let root = tempfile::tempdir().unwrap();
    fs::create_dir(root.path().join("sub")).unwrap();
    fs::write(root.path().join("sub/file.txt"), b"data").unwrap();
    let sandbox = sandbox_over(root.path()).await;

    let err = write::rm(
        &sandbox,
        RmArgs {
            path: args_path("sub"),
            recursive: false,
            ignore_if_not_exists: false,
        },
    )
    .await
    .unwrap_err();
    assert_eq!(err.code, ErrorCode::EInvalidInput);

    let resp = write::rm(
        &sandbox,
        RmArgs {
            path: args_path("sub"),
            recursive: true,
            ignore_if_not_exists: false,
        },
    )
    .await
    .unwrap();
    assert!(resp.removed);
    assert!(!root.path().join("sub").exists());
}

// S6: the resource store evicts the oldest entry once max_entries is hit.
#[tokio::test]
async fn resource_store_evicts_oldest_past_capacity() {
    let store = ResourceStore::new(ResourceStoreConfig {
        max_entries: 2,
        max_total_bytes: 1024,
        max_entry_bytes: 1024,
    });

    let first = store
        .put_text(PutTextInput {
            name: "first".to_string(),
            mime_type: None,
            text: "one".to_string(),
        })
        .await
        .unwrap();
    store
        .put_text(PutTextInput {
            name: "second".to_string(),
            mime_type: None,
            text: "two".to_string(),
        })
        .await
        .unwrap();
    store
        .put_text(PutTextInput {
            name: "third".to_string(),
            mime_type: None,
            text: "three".to_string(),
        })
        .await
        .unwrap();

    assert!(store.get_text(&first.uri).await.is_err());
}

#[tokio::test]
async fn ls_find_tree_report_consistent_directory_shape() {
    let root = tempfile::tempdir().unwrap();
    fs::create_dir(root.path().join("nested")).unwrap();
    fs::write(root.path().join("nested/deep.rs"), "fn main() {}").unwrap();
    fs::write(root.path().join("top.rs"), "fn main() {}").unwrap();
    let sandbox = sandbox_over(root.path()).await;

    let ls = listing::ls(
        &sandbox,
        LsArgs {
            path: None,
            include_ignored: false,
            include_hidden: false,
            sort_by: None,
        },
    )
    .await
    .unwrap();
    assert_eq!(ls.entries.len(), 2);

    let find = listing::find(
        &sandbox,
        FindArgs {
            path: args_path("."),
            pattern: "*.rs".to_string(),
            exclude_patterns: vec![],
            max_results: None,
            max_depth: None,
        },
    )
    .await
    .unwrap();
    assert_eq!(find.matches.len(), 2);

    let tree = listing::tree(
        &sandbox,
        TreeArgs {
            path: args_path("."),
            max_depth: None,
            max_entries: None,
            include_hidden: false,
            include_ignored: false,
        },
    )
    .await
    .unwrap();
    assert!(tree.ascii.contains("nested"));
}

#[tokio::test]
async fn write_then_diff_then_apply_patch_round_trip() {
    let root = tempfile::tempdir().unwrap();
    let sandbox = sandbox_over(root.path()).await;

    write::write(
        &sandbox,
        WriteArgs {
            path: args_path("a.txt"),
            content: "line one\nline two\n".to_string(),
        },
    )
    .await
    .unwrap();
    write::write(
        &sandbox,
        WriteArgs {
            path: args_path("b.txt"),
            content: "line one\nline TWO\n".to_string(),
        },
    )
    .await
    .unwrap();

    let diff_resp = diff::diff_files(
        &sandbox,
        DiffFilesArgs {
            original: args_path("a.txt"),
            modified: args_path("b.txt"),
            context: None,
        },
    )
    .await
    .unwrap();
    assert!(diff_resp.unified_diff.contains("line TWO"));

    let applied = diff::apply_patch(
        &sandbox,
        ApplyPatchArgs {
            path: args_path("a.txt"),
            patch: diff_resp.unified_diff,
            dry_run: false,
            fuzz_factor: None,
            max_file_size: None,
        },
    )
    .await
    .unwrap();
    assert_eq!(applied.hunks_applied, applied.hunks_total);

    let final_content = fs::read_to_string(root.path().join("a.txt")).unwrap();
    assert_eq!(final_content, "line one\nline TWO\n");
}
