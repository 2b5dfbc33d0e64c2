//! `mkdir`, `write`, `edit`, `mv`, `rm`.

use std::path::PathBuf;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::error::{classify, ErrorCode, FsError};
use crate::sandbox::PathSandbox;
use crate::tools::atomic_write;

#[derive(Debug, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct MkdirArgs {
    pub path: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MkdirResponse {
    pub path: String,
    pub created: bool,
}

pub async fn mkdir(sandbox: &PathSandbox, args: MkdirArgs) -> Result<MkdirResponse, FsError> {
    let validated = sandbox.validate_for_write(&args.path).await?;
    let already_existed = tokio::fs::metadata(&validated.resolved_real).await.is_ok();
    tokio::fs::create_dir_all(&validated.resolved_real)
        .await
        .map_err(|e| classify(e, Some(&validated.resolved_real)))?;
    Ok(MkdirResponse {
        path: validated.resolved_real.display().to_string(),
        created: !already_existed,
    })
}

#[derive(Debug, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct WriteArgs {
    pub path: String,
    pub content: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WriteResponse {
    pub path: String,
    pub bytes_written: usize,
}

/// Creates parent directories with `mkdir -p` before writing, matching the
/// "write tools create parent directories before renaming in" contract.
pub async fn write(sandbox: &PathSandbox, args: WriteArgs) -> Result<WriteResponse, FsError> {
    let validated = sandbox.validate_for_write(&args.path).await?;
    if let Some(parent) = validated.resolved_real.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| classify(e, Some(parent)))?;
    }
    atomic_write(&validated.resolved_real, args.content.as_bytes()).await?;
    Ok(WriteResponse {
        path: validated.resolved_real.display().to_string(),
        bytes_written: args.content.len(),
    })
}

#[derive(Debug, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct EditEntry {
    pub old_text: String,
    pub new_text: String,
}

#[derive(Debug, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct EditArgs {
    pub path: String,
    pub edits: Vec<EditEntry>,
    #[serde(default)]
    pub dry_run: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EditResponse {
    pub path: String,
    pub applied: usize,
    pub unmatched_edits: Vec<String>,
    pub dry_run: bool,
    pub preview: Option<String>,
}

/// Replacements are applied sequentially against the accumulating buffer,
/// each `oldText` matched at most once; entries whose `oldText` is absent
/// are reported in `unmatched_edits` rather than aborting the whole edit.
pub async fn edit(sandbox: &PathSandbox, args: EditArgs) -> Result<EditResponse, FsError> {
    let validated = sandbox.validate_existing(&args.path).await?;
    let original = tokio::fs::read_to_string(&validated.resolved_real)
        .await
        .map_err(|e| classify(e, Some(&validated.resolved_real)))?;

    let mut buffer = original.clone();
    let mut applied = 0usize;
    let mut unmatched = Vec::new();
    for entry in &args.edits {
        if let Some(pos) = buffer.find(entry.old_text.as_str()) {
            buffer.replace_range(pos..pos + entry.old_text.len(), &entry.new_text);
            applied += 1;
        } else {
            unmatched.push(entry.old_text.clone());
        }
    }

    if args.dry_run {
        let preview = similar::TextDiff::from_lines(&original, &buffer)
            .unified_diff()
            .context_radius(3)
            .header("original", "modified")
            .to_string();
        return Ok(EditResponse {
            path: validated.resolved_real.display().to_string(),
            applied,
            unmatched_edits: unmatched,
            dry_run: true,
            preview: Some(preview),
        });
    }

    atomic_write(&validated.resolved_real, buffer.as_bytes()).await?;

    Ok(EditResponse {
        path: validated.resolved_real.display().to_string(),
        applied,
        unmatched_edits: unmatched,
        dry_run: false,
        preview: None,
    })
}

#[derive(Debug, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct MvArgs {
    pub source: String,
    pub destination: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MvResponse {
    pub source: String,
    pub destination: String,
}

pub async fn mv(sandbox: &PathSandbox, args: MvArgs) -> Result<MvResponse, FsError> {
    let source = sandbox.validate_existing(&args.source).await?;
    let destination = sandbox.validate_for_write(&args.destination).await?;

    match tokio::fs::rename(&source.resolved_real, &destination.resolved_real).await {
        Ok(()) => {}
        Err(e) if e.raw_os_error() == Some(libc::EXDEV) => {
            copy_then_delete(&source.resolved_real, &destination.resolved_real).await?;
        }
        Err(e) => return Err(classify(e, Some(&source.resolved_real))),
    }

    Ok(MvResponse {
        source: source.resolved_real.display().to_string(),
        destination: destination.resolved_real.display().to_string(),
    })
}

async fn copy_then_delete(source: &std::path::Path, destination: &std::path::Path) -> Result<(), FsError> {
    let meta = tokio::fs::metadata(source).await.map_err(|e| classify(e, Some(source)))?;
    if meta.is_dir() {
        copy_dir_recursive(source, destination).await?;
        tokio::fs::remove_dir_all(source)
            .await
            .map_err(|e| classify(e, Some(source)))?;
    } else {
        tokio::fs::copy(source, destination)
            .await
            .map_err(|e| classify(e, Some(source)))?;
        tokio::fs::remove_file(source)
            .await
            .map_err(|e| classify(e, Some(source)))?;
    }
    Ok(())
}

fn copy_dir_recursive<'a>(
    source: &'a std::path::Path,
    destination: &'a std::path::Path,
) -> std::pin::Pin<Box<dyn std::future::Future<Output = Result<(), FsError>> + Send + 'a>> {
    Box::pin(async move {
        tokio::fs::create_dir_all(destination)
            .await
            .map_err(|e| classify(e, Some(destination)))?;
        let mut read_dir = tokio::fs::read_dir(source)
            .await
            .map_err(|e| classify(e, Some(source)))?;
        while let Some(entry) = read_dir.next_entry().await.map_err(|e| classify(e, Some(source)))? {
            let file_type = entry.file_type().await.map_err(|e| classify(e, Some(source)))?;
            let dest_child = destination.join(entry.file_name());
            if file_type.is_dir() {
                copy_dir_recursive(&entry.path(), &dest_child).await?;
            } else {
                tokio::fs::copy(entry.path(), &dest_child)
                    .await
                    .map_err(|e| classify(e, Some(&entry.path())))?;
            }
        }
        Ok(())
    })
}

#[derive(Debug, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct RmArgs {
    pub path: String,
    #[serde(default)]
    pub recursive: bool,
    #[serde(default)]
    pub ignore_if_not_exists: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RmResponse {
    pub path: String,
    pub removed: bool,
}

pub async fn rm(sandbox: &PathSandbox, args: RmArgs) -> Result<RmResponse, FsError> {
    let validated = match sandbox.validate_existing(&args.path).await {
        Ok(v) => v,
        Err(e) if e.code == ErrorCode::ENotFound && args.ignore_if_not_exists => {
            return Ok(RmResponse {
                path: args.path,
                removed: false,
            });
        }
        Err(e) => return Err(e),
    };

    let meta = tokio::fs::metadata(&validated.resolved_real)
        .await
        .map_err(|e| classify(e, Some(&validated.resolved_real)))?;

    if meta.is_dir() {
        let mut read_dir = tokio::fs::read_dir(&validated.resolved_real)
            .await
            .map_err(|e| classify(e, Some(&validated.resolved_real)))?;
        let has_children = read_dir
            .next_entry()
            .await
            .map_err(|e| classify(e, Some(&validated.resolved_real)))?
            .is_some();
        if has_children && !args.recursive {
            return Err(FsError::invalid_input(
                "directory is not empty; pass recursive: true to remove it",
            )
            .with_path(&validated.resolved_real));
        }
        if args.recursive {
            tokio::fs::remove_dir_all(&validated.resolved_real)
                .await
                .map_err(|e| classify(e, Some(&validated.resolved_real)))?;
        } else {
            tokio::fs::remove_dir(&validated.resolved_real)
                .await
                .map_err(|e| classify(e, Some(&validated.resolved_real)))?;
        }
    } else {
        tokio::fs::remove_file(&validated.resolved_real)
            .await
            .map_err(|e| classify(e, Some(&validated.resolved_real)))?;
    }

    Ok(RmResponse {
        path: validated.resolved_real.display().to_string(),
        removed: true,
    })
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
    async fn write_then_read_back_matches() {
        let dir = tempdir().unwrap();
        let sb = sandbox_with_root(dir.path().canonicalize().unwrap()).await;
        let target = dir.path().join("a.txt");
        write(
            &sb,
            WriteArgs {
                path: target.to_str().unwrap().to_string(),
                content: "hello world".to_string(),
            },
        )
        .await
        .unwrap();
        let content = tokio::fs::read_to_string(&target).await.unwrap();
        assert_eq!(content, "hello world");
    }

    #[tokio::test]
    async fn edit_reports_unmatched_replacements() {
        let dir = tempdir().unwrap();
        let file = dir.path().join("a.txt");
        tokio::fs::write(&file, "foo bar").await.unwrap();
        let sb = sandbox_with_root(dir.path().canonicalize().unwrap()).await;
        let resp = edit(
            &sb,
            EditArgs {
                path: file.to_str().unwrap().to_string(),
                edits: vec![
                    EditEntry {
                        old_text: "foo".to_string(),
                        new_text: "baz".to_string(),
                    },
                    EditEntry {
                        old_text: "missing".to_string(),
                        new_text: "x".to_string(),
                    },
                ],
                dry_run: false,
            },
        )
        .await
        .unwrap();
        assert_eq!(resp.applied, 1);
        assert_eq!(resp.unmatched_edits, vec!["missing".to_string()]);
        let content = tokio::fs::read_to_string(&file).await.unwrap();
        assert_eq!(content, "baz bar");
    }

    #[tokio::test]
    async fn rm_refuses_nonempty_directory_without_recursive() {
        let dir = tempdir().unwrap();
        tokio::fs::create_dir_all(dir.path().join("newdir/sub")).await.unwrap();
        tokio::fs::write(dir.path().join("newdir/sub/f.txt"), "x").await.unwrap();
        let sb = sandbox_with_root(dir.path().canonicalize().unwrap()).await;
        let err = rm(
            &sb,
            RmArgs {
                path: dir.path().join("newdir").to_str().unwrap().to_string(),
                recursive: false,
                ignore_if_not_exists: false,
            },
        )
        .await
        .unwrap_err();
        assert_eq!(err.code, ErrorCode::EInvalidInput);
    }

    #[tokio::test]
    async fn rm_ignore_if_not_exists_suppresses_not_found() {
        let dir = tempdir().unwrap();
        let sb = sandbox_with_root(dir.path().canonicalize().unwrap()).await;
        let resp = rm(
            &sb,
            RmArgs {
                path: dir.path().join("missing.txt").to_str().unwrap().to_string(),
                recursive: false,
                ignore_if_not_exists: true,
            },
        )
        .await
        .unwrap();
        assert!(!resp.removed);
    }

    #[tokio::test]
    async fn mkdir_creates_nested_directories() {
        let dir = tempdir().unwrap();
        let sb = sandbox_with_root(dir.path().canonicalize().unwrap()).await;
        let target = dir.path().join("a/b/c");
        let resp = mkdir(
            &sb,
            MkdirArgs {
                path: target.to_str().unwrap().to_string(),
            },
        )
        .await
        .unwrap();
        assert!(resp.created);
        assert!(tokio::fs::metadata(&target).await.unwrap().is_dir());
    }
}
