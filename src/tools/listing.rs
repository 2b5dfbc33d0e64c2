//! Directory listing tools: `roots`, `ls`, `tree`, `find`.

use std::path::PathBuf;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::error::FsError;
use crate::glob::{self, DirectoryEntry, EntryKind, GlobOptions};
use crate::sandbox::PathSandbox;
use crate::tools::enums::{EntryKindWire, SortBy};

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RootsResponse {
    pub roots: Vec<String>,
}

pub async fn roots(sandbox: &PathSandbox) -> RootsResponse {
    let snapshot = sandbox.roots().snapshot().await;
    RootsResponse {
        roots: snapshot.into_iter().map(|p| p.display().to_string()).collect(),
    }
}

#[derive(Debug, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct LsArgs {
    pub path: Option<String>,
    #[serde(default)]
    pub include_ignored: bool,
    #[serde(default)]
    pub include_hidden: bool,
    pub sort_by: Option<SortBy>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EntryWire {
    pub name: String,
    pub relative_path: String,
    pub absolute_path: String,
    pub kind: EntryKindWire,
    pub size: Option<u64>,
    pub mtime: Option<String>,
    pub symlink_target: Option<String>,
}

impl From<DirectoryEntry> for EntryWire {
    fn from(e: DirectoryEntry) -> Self {
        Self {
            name: e.name,
            relative_path: e.relative_path.display().to_string(),
            absolute_path: e.absolute_path.display().to_string(),
            kind: e.kind.into(),
            size: e.size,
            mtime: e.mtime.map(|t| humantime_rfc3339(t)),
            symlink_target: e.symlink_target.map(|p| p.display().to_string()),
        }
    }
}

fn humantime_rfc3339(t: std::time::SystemTime) -> String {
    match t.duration_since(std::time::UNIX_EPOCH) {
        Ok(d) => d.as_secs().to_string(),
        Err(_) => "0".to_string(),
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LsResponse {
    pub path: String,
    pub entries: Vec<EntryWire>,
}

pub async fn ls(sandbox: &PathSandbox, args: LsArgs) -> Result<LsResponse, FsError> {
    let requested = args.path.as_deref().unwrap_or(".");
    let validated = sandbox.validate_existing_directory(requested).await?;

    let opts = GlobOptions {
        exclude_patterns: vec![],
        include_hidden: args.include_hidden,
        include_ignored: args.include_ignored,
        max_depth: Some(1),
        only_files: false,
        produce_stats: true,
    };
    let mut rx = glob::walk(validated.resolved_real.clone(), opts);
    let mut entries = Vec::new();
    while let Some(item) = rx.recv().await {
        match item {
            Ok(e) => entries.push(e),
            Err(_) => continue,
        }
    }

    match args.sort_by.unwrap_or_default() {
        SortBy::Name => entries.sort_by(|a, b| a.name.cmp(&b.name)),
        SortBy::Size => entries.sort_by_key(|e| e.size.unwrap_or(0)),
        SortBy::Mtime => entries.sort_by_key(|e| e.mtime),
    }

    Ok(LsResponse {
        path: validated.resolved_real.display().to_string(),
        entries: entries.into_iter().map(EntryWire::from).collect(),
    })
}

#[derive(Debug, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct FindArgs {
    pub path: String,
    pub pattern: String,
    #[serde(default)]
    pub exclude_patterns: Vec<String>,
    pub max_results: Option<usize>,
    pub max_depth: Option<usize>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FindResponse {
    pub matches: Vec<String>,
    pub truncated: bool,
}

pub async fn find(sandbox: &PathSandbox, args: FindArgs) -> Result<FindResponse, FsError> {
    let validated = sandbox.validate_existing_directory(&args.path).await?;
    let max_results = args.max_results.unwrap_or(1000);

    let opts = GlobOptions {
        exclude_patterns: args.exclude_patterns,
        include_hidden: false,
        include_ignored: false,
        max_depth: args.max_depth,
        only_files: false,
        produce_stats: false,
    };
    let mut rx = glob::walk(validated.resolved_real.clone(), opts);
    let mut matches = Vec::new();
    let mut truncated = false;
    while let Some(item) = rx.recv().await {
        let Ok(entry) = item else { continue };
        if glob::pattern_matches(&args.pattern, &entry.relative_path) {
            if matches.len() >= max_results {
                truncated = true;
                break;
            }
            matches.push(entry.absolute_path.display().to_string());
        }
    }
    matches.sort();
    Ok(FindResponse { matches, truncated })
}

#[derive(Debug, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct TreeArgs {
    pub path: String,
    pub max_depth: Option<usize>,
    pub max_entries: Option<usize>,
    #[serde(default)]
    pub include_hidden: bool,
    #[serde(default)]
    pub include_ignored: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TreeNode {
    pub name: String,
    pub kind: EntryKindWire,
    pub children: Vec<TreeNode>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TreeResponse {
    pub path: String,
    pub ascii: String,
    pub root: TreeNode,
    pub truncated: bool,
}

pub async fn tree(sandbox: &PathSandbox, args: TreeArgs) -> Result<TreeResponse, FsError> {
    let validated = sandbox.validate_existing_directory(&args.path).await?;
    let max_entries = args.max_entries.unwrap_or(2000);

    let opts = GlobOptions {
        exclude_patterns: vec![],
        include_hidden: args.include_hidden,
        include_ignored: args.include_ignored,
        max_depth: args.max_depth,
        only_files: false,
        produce_stats: false,
    };
    let mut rx = glob::walk(validated.resolved_real.clone(), opts);
    let mut entries: Vec<DirectoryEntry> = Vec::new();
    let mut truncated = false;
    while let Some(item) = rx.recv().await {
        let Ok(entry) = item else { continue };
        if entries.len() >= max_entries {
            truncated = true;
            break;
        }
        entries.push(entry);
    }
    entries.sort_by(|a, b| a.relative_path.cmp(&b.relative_path));

    let root_name = validated
        .resolved_real
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| validated.resolved_real.display().to_string());
    let mut root = TreeNode {
        name: root_name,
        kind: EntryKindWire::Directory,
        children: Vec::new(),
    };
    for entry in &entries {
        insert_into_tree(&mut root, &entry.relative_path, entry.kind);
    }

    let ascii = render_ascii(&root, 0);

    Ok(TreeResponse {
        path: validated.resolved_real.display().to_string(),
        ascii,
        root,
        truncated,
    })
}

fn insert_into_tree(root: &mut TreeNode, relative: &std::path::Path, kind: EntryKind) {
    let mut current = root;
    let components: Vec<_> = relative.components().collect();
    for (i, component) in components.iter().enumerate() {
        let name = component.as_os_str().to_string_lossy().into_owned();
        let is_last = i == components.len() - 1;
        let pos = current.children.iter().position(|c| c.name == name);
        let idx = match pos {
            Some(idx) => idx,
            None => {
                current.children.push(TreeNode {
                    name,
                    kind: if is_last { kind.into() } else { EntryKindWire::Directory },
                    children: Vec::new(),
                });
                current.children.len() - 1
            }
        };
        current = &mut current.children[idx];
    }
}

fn render_ascii(node: &TreeNode, depth: usize) -> String {
    let mut out = String::new();
    if depth == 0 {
        out.push_str(&node.name);
        out.push('\n');
    }
    for (i, child) in node.children.iter().enumerate() {
        let is_last = i == node.children.len() - 1;
        let prefix = "  ".repeat(depth) + if is_last { "└── " } else { "├── " };
        out.push_str(&prefix);
        out.push_str(&child.name);
        out.push('\n');
        out.push_str(&render_ascii(child, depth + 1));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sandbox::roots::RootSupervisor;
    use std::sync::Arc;
    use tempfile::tempdir;
    use tokio::sync::RwLock;

    async fn sandbox_with_root(root: PathBuf) -> PathSandbox {
        let supervisor = RootSupervisor::new_for_test(Arc::new(RwLock::new(vec![root])));
        PathSandbox::new(supervisor, false, &[])
    }

    #[tokio::test]
    async fn ls_lists_visible_entries() {
        let dir = tempdir().unwrap();
        tokio::fs::write(dir.path().join("a.txt"), "x").await.unwrap();
        let sb = sandbox_with_root(dir.path().canonicalize().unwrap()).await;
        let resp = ls(
            &sb,
            LsArgs {
                path: None,
                include_ignored: false,
                include_hidden: false,
                sort_by: None,
            },
        )
        .await
        .unwrap();
        assert_eq!(resp.entries.len(), 1);
        assert_eq!(resp.entries[0].name, "a.txt");
    }

    #[tokio::test]
    async fn find_matches_glob_pattern() {
        let dir = tempdir().unwrap();
        tokio::fs::create_dir(dir.path().join("sub")).await.unwrap();
        tokio::fs::write(dir.path().join("sub/notes.md"), "x").await.unwrap();
        tokio::fs::write(dir.path().join("sub/code.rs"), "x").await.unwrap();
        let sb = sandbox_with_root(dir.path().canonicalize().unwrap()).await;
        let resp = find(
            &sb,
            FindArgs {
                path: dir.path().to_str().unwrap().to_string(),
                pattern: "**/*.md".to_string(),
                exclude_patterns: vec![],
                max_results: None,
                max_depth: None,
            },
        )
        .await
        .unwrap();
        assert_eq!(resp.matches.len(), 1);
        assert!(resp.matches[0].ends_with("notes.md"));
    }

    #[tokio::test]
    async fn tree_builds_nested_structure() {
        let dir = tempdir().unwrap();
        tokio::fs::create_dir(dir.path().join("sub")).await.unwrap();
        tokio::fs::write(dir.path().join("sub/a.txt"), "x").await.unwrap();
        let sb = sandbox_with_root(dir.path().canonicalize().unwrap()).await;
        let resp = tree(
            &sb,
            TreeArgs {
                path: dir.path().to_str().unwrap().to_string(),
                max_depth: None,
                max_entries: None,
                include_hidden: false,
                include_ignored: false,
            },
        )
        .await
        .unwrap();
        let sub = resp.root.children.iter().find(|c| c.name == "sub").unwrap();
        assert_eq!(sub.children.len(), 1);
        assert_eq!(sub.children[0].name, "a.txt");
    }
}
