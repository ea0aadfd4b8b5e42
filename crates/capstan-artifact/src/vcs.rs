//! Version-control state of the local working copy.

use std::path::{Path, PathBuf};

use capstan_common::{CapstanError, CapstanResult};

/// Snapshot of a working copy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionState {
    /// Active branch; `None` when HEAD is detached.
    pub branch: Option<String>,
    /// Full commit hash of HEAD.
    pub commit: String,
    /// Whether the working tree has uncommitted changes.
    pub dirty: bool,
}

impl VersionState {
    /// State of a working copy on a branch.
    pub fn on_branch(branch: impl Into<String>, commit: impl Into<String>, dirty: bool) -> Self {
        Self {
            branch: Some(branch.into()),
            commit: commit.into(),
            dirty,
        }
    }

    /// State of a working copy with a detached HEAD.
    pub fn detached(commit: impl Into<String>, dirty: bool) -> Self {
        Self {
            branch: None,
            commit: commit.into(),
            dirty,
        }
    }

    /// Whether HEAD is detached.
    #[must_use]
    pub const fn is_detached(&self) -> bool {
        self.branch.is_none()
    }
}

/// Source of [`VersionState`].
pub trait VersionSource: Send + Sync {
    /// Read the current state.
    ///
    /// # Errors
    ///
    /// Fails if the working copy cannot be read.
    fn state(&self) -> CapstanResult<VersionState>;
}

impl VersionSource for VersionState {
    fn state(&self) -> CapstanResult<VersionState> {
        Ok(self.clone())
    }
}

/// A git working copy.
#[derive(Debug, Clone)]
pub struct GitRepository {
    path: PathBuf,
}

impl GitRepository {
    /// Point at the working copy rooted at `path`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Working copy root.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl VersionSource for GitRepository {
    fn state(&self) -> CapstanResult<VersionState> {
        let repo = gix::open(&self.path).map_err(|e| {
            CapstanError::vcs(format!(
                "Failed to open repository at {}: {e}",
                self.path.display()
            ))
        })?;

        let head = repo
            .head()
            .map_err(|e| CapstanError::vcs(format!("Failed to read HEAD: {e}")))?;
        let branch = if head.is_detached() {
            None
        } else {
            head.referent_name().map(|name| name.shorten().to_string())
        };

        let commit = repo
            .head_id()
            .map_err(|e| CapstanError::vcs(format!("Failed to resolve HEAD commit: {e}")))?
            .detach()
            .to_string();

        let dirty = repo
            .is_dirty()
            .map_err(|e| CapstanError::vcs(format!("Failed to read working tree status: {e}")))?;

        tracing::debug!(
            path = %self.path.display(),
            branch = ?branch,
            commit = %commit,
            dirty,
            "Read repository state"
        );

        Ok(VersionState {
            branch,
            commit,
            dirty,
        })
    }
}
