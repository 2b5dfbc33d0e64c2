//! RootSupervisor: owns the `AllowedRoots` snapshot and merges baseline,
//! CWD-if-opted-in, and client-advertised roots.
//!
//! Modeled on the teacher's `GitContextCache` (a mutex-guarded map behind an
//! async getter), narrowed to a single atomically-replaced snapshot instead of
//! a TTL cache — the RootSupervisor's freshness window is "until the next
//! explicit update", not time-based.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::RwLock;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Uninitialized,
    Initialized,
}

pub struct RootSupervisor {
    baseline: Vec<PathBuf>,
    snapshot: Arc<RwLock<Vec<PathBuf>>>,
    state: Arc<RwLock<State>>,
    debounce: Duration,
}

impl RootSupervisor {
    /// Build the initial snapshot from the CLI baseline plus CWD if opted in.
    /// Does not transition to `Initialized` — that happens on the first
    /// client "initialized" notification (`mark_initialized`).
    pub async fn new(baseline: Vec<PathBuf>, allow_cwd: bool) -> std::io::Result<Self> {
        let mut roots = normalize_dedup(baseline.clone());
        if allow_cwd {
            let cwd = std::env::current_dir()?.canonicalize()?;
            if !roots.iter().any(|r| r == &cwd) {
                roots.push(cwd);
            }
        }
        if roots.is_empty() {
            let cwd = std::env::current_dir()?.canonicalize()?;
            tracing::warn!("no allowed roots configured; defaulting to current working directory");
            roots.push(cwd);
        }
        Ok(Self {
            baseline: roots.clone(),
            snapshot: Arc::new(RwLock::new(roots)),
            state: Arc::new(RwLock::new(State::Uninitialized)),
            debounce: Duration::from_millis(100),
        })
    }

    #[cfg(test)]
    pub fn new_for_test(snapshot: Arc<RwLock<Vec<PathBuf>>>) -> Self {
        Self {
            baseline: vec![],
            snapshot,
            state: Arc::new(RwLock::new(State::Initialized)),
            debounce: Duration::from_millis(0),
        }
    }

    pub async fn mark_initialized(&self) {
        let mut state = self.state.write().await;
        *state = State::Initialized;
    }

    pub async fn is_initialized(&self) -> bool {
        *self.state.read().await == State::Initialized
    }

    /// Current allow-list snapshot, taken atomically: readers always see
    /// either the pre- or post-update list, never a half-merged one.
    pub async fn snapshot(&self) -> Vec<PathBuf> {
        self.snapshot.read().await.clone()
    }

    /// Recompute the snapshot from a freshly client-advertised root list.
    /// Each candidate must lie inside the baseline both before and after
    /// canonicalization; candidates that don't are dropped, never silently
    /// widening the sandbox. Debounces by sleeping `debounce` before publish
    /// so a burst of "roots changed" notifications collapses to one
    /// recomputation.
    pub async fn update_client_roots(&self, advertised: Vec<PathBuf>) {
        if !self.debounce.is_zero() {
            tokio::time::sleep(self.debounce).await;
        }

        let mut merged = self.baseline.clone();
        for candidate in advertised {
            let lexically_inside = self
                .baseline
                .iter()
                .any(|b| candidate == *b || candidate.starts_with(b));
            if !lexically_inside {
                tracing::warn!(path = %candidate.display(), "dropping client root outside baseline");
                continue;
            }
            let canonical = match tokio::fs::canonicalize(&candidate).await {
                Ok(c) => c,
                Err(e) => {
                    tracing::warn!(path = %candidate.display(), error = %e, "dropping unresolvable client root");
                    continue;
                }
            };
            let canonically_inside = self.baseline.iter().any(|b| canonical.starts_with(b));
            if !canonically_inside {
                tracing::warn!(path = %candidate.display(), "dropping client root that escapes baseline after canonicalization");
                continue;
            }
            if !merged.contains(&canonical) {
                merged.push(canonical);
            }
        }

        let mut guard = self.snapshot.write().await;
        *guard = merged;
    }
}

fn normalize_dedup(paths: Vec<PathBuf>) -> Vec<PathBuf> {
    let mut out: Vec<PathBuf> = Vec::with_capacity(paths.len());
    for p in paths {
        let normed = if p.is_absolute() {
            p
        } else {
            std::env::current_dir().map(|cwd| cwd.join(&p)).unwrap_or(p)
        };
        #[cfg(windows)]
        let normed = PathBuf::from(normed.to_string_lossy().to_lowercase());
        if !out.contains(&normed) {
            out.push(normed);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn empty_baseline_defaults_to_cwd() {
        let sup = RootSupervisor::new(vec![], false).await.unwrap();
        let snap = sup.snapshot().await;
        assert_eq!(snap.len(), 1);
    }

    #[tokio::test]
    async fn initialized_state_transitions_once() {
        let sup = RootSupervisor::new(vec![std::env::temp_dir()], false)
            .await
            .unwrap();
        assert!(!sup.is_initialized().await);
        sup.mark_initialized().await;
        assert!(sup.is_initialized().await);
    }

    #[tokio::test]
    async fn client_root_outside_baseline_is_dropped() {
        let baseline = std::env::temp_dir().join("root-supervisor-test-baseline");
        tokio::fs::create_dir_all(&baseline).await.unwrap();
        let baseline_canon = baseline.canonicalize().unwrap();
        let sup = RootSupervisor::new(vec![baseline_canon.clone()], false)
            .await
            .unwrap();
        sup.update_client_roots(vec![PathBuf::from("/etc")]).await;
        let snap = sup.snapshot().await;
        assert!(snap.contains(&baseline_canon));
        assert!(!snap.iter().any(|p| p == std::path::Path::new("/etc")));
        let _ = tokio::fs::remove_dir_all(&baseline).await;
    }
}
