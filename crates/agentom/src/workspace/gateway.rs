//! The sandboxed filesystem gateway.

use std::collections::BTreeMap;
use std::fmt;
use std::io;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use thiserror::Error;
use tokio::sync::Mutex;

use super::exec::{self, ExecutionFailure, ExecutionResult};
use super::policy::{Operation, PolicyDecision, PolicyHandler};
use crate::limits::ExecLimits;

/// Directory for user-provided inputs.
pub const INPUTS_DIR: &str = "inputs";
/// Directory where tools write derived structures.
pub const OUTPUTS_DIR: &str = "outputs";
/// Scratch directory, cleared at the end of a session.
pub const TEMP_DIR: &str = "tmp";
/// Directory reserved for logs; tools cannot see it.
pub const LOGS_DIR: &str = "logs";

const STANDARD_DIRS: [&str; 4] = [INPUTS_DIR, OUTPUTS_DIR, TEMP_DIR, LOGS_DIR];

/// Errors raised by the workspace gateway.
#[derive(Debug, Error)]
pub enum WorkspaceError {
    /// The path resolves outside the workspace root.
    #[error("path escapes the workspace: {0}")]
    PathEscape(String),
    /// The path is inside the workspace but the policy forbids the operation.
    #[error("access denied: {0}")]
    AccessDenied(String),
    /// File or directory not found
    #[error("file not found: {0}")]
    NotFound(String),
    /// Path is not a directory
    #[error("not a directory: {0}")]
    NotADirectory(String),
    /// Path is not a regular file
    #[error("not a file: {0}")]
    NotAFile(String),
    /// IO error
    #[error("IO error at {path}: {source}")]
    Io {
        /// Workspace-relative path involved
        path: String,
        /// Underlying error
        #[source]
        source: io::Error,
    },
    /// Code execution failed
    #[error(transparent)]
    Execution(#[from] ExecutionFailure),
}

impl WorkspaceError {
    fn io(path: &str, source: io::Error) -> Self {
        if source.kind() == io::ErrorKind::NotFound {
            return Self::NotFound(path.to_string());
        }
        Self::Io {
            path: path.to_string(),
            source,
        }
    }
}

/// Single choke point for every file access and process spawned on behalf
/// of a tool.
///
/// All paths are interpreted relative to a root fixed at construction.
/// Containment is checked lexically and again after symlink resolution,
/// before any I/O happens; the access policy is consulted afterwards.
pub struct Workspace {
    root: PathBuf,
    policy: Arc<dyn PolicyHandler>,
    write_lock: Mutex<()>,
}

impl fmt::Debug for Workspace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Workspace")
            .field("root", &self.root)
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}

impl Workspace {
    /// Open (creating if needed) a workspace rooted at `root`, with the
    /// standard `inputs/`, `outputs/`, `tmp/` and `logs/` directories.
    pub fn open(
        root: impl AsRef<Path>,
        policy: impl PolicyHandler + 'static,
    ) -> Result<Self, WorkspaceError> {
        Self::open_arc(root, Arc::new(policy))
    }

    /// Like [`Workspace::open`] with a shared policy.
    pub fn open_arc(
        root: impl AsRef<Path>,
        policy: Arc<dyn PolicyHandler>,
    ) -> Result<Self, WorkspaceError> {
        let root = root.as_ref();
        let display = root.display().to_string();
        std::fs::create_dir_all(root).map_err(|e| WorkspaceError::io(&display, e))?;
        let root = root
            .canonicalize()
            .map_err(|e| WorkspaceError::io(&display, e))?;
        for dir in STANDARD_DIRS {
            std::fs::create_dir_all(root.join(dir)).map_err(|e| WorkspaceError::io(dir, e))?;
        }
        tracing::debug!(root = %root.display(), "workspace opened");

        Ok(Self {
            root,
            policy,
            write_lock: Mutex::new(()),
        })
    }

    /// The canonical workspace root.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolve `path` to an absolute location inside the workspace.
    ///
    /// Relative paths are taken relative to the root; absolute paths are
    /// accepted only if they land inside it. `..` components and symlinks
    /// are resolved before the containment check.
    pub fn resolve(&self, path: &str) -> Result<PathBuf, WorkspaceError> {
        let escape = || {
            tracing::warn!(path, "rejected path outside workspace");
            WorkspaceError::PathEscape(path.to_string())
        };

        if path.contains('\0') {
            return Err(escape());
        }

        let requested = Path::new(path);
        let joined = if requested.is_absolute() {
            requested.to_path_buf()
        } else {
            self.root.join(requested)
        };

        let normalized = normalize(&joined);
        if !normalized.starts_with(&self.root) {
            return Err(escape());
        }

        let resolved = resolve_existing_prefix(&normalized).map_err(|_| escape())?;
        if !resolved.starts_with(&self.root) {
            return Err(escape());
        }

        Ok(resolved)
    }

    /// Workspace-relative form of an absolute path inside the root, using
    /// forward slashes. The root itself is the empty string.
    pub fn relative(&self, absolute: &Path) -> String {
        absolute
            .strip_prefix(&self.root)
            .map(|rel| {
                rel.components()
                    .map(|c| c.as_os_str().to_string_lossy().into_owned())
                    .collect::<Vec<_>>()
                    .join("/")
            })
            .unwrap_or_default()
    }

    /// Resolve `path` and check `operation` against the policy.
    ///
    /// Returns the absolute path and its workspace-relative form.
    pub fn authorize(
        &self,
        path: &str,
        operation: Operation,
    ) -> Result<(PathBuf, String), WorkspaceError> {
        let absolute = self.resolve(path)?;
        let relative = self.relative(&absolute);
        match self.policy.check_access(&relative, operation) {
            PolicyDecision::Allow => Ok((absolute, relative)),
            PolicyDecision::Deny(reason) => {
                tracing::warn!(path, %operation, %reason, "workspace policy denied access");
                Err(WorkspaceError::AccessDenied(reason))
            }
        }
    }

    /// Read a file.
    pub async fn read(&self, path: &str) -> Result<Vec<u8>, WorkspaceError> {
        let (absolute, relative) = self.authorize(path, Operation::Read)?;
        let metadata = tokio::fs::metadata(&absolute)
            .await
            .map_err(|e| WorkspaceError::io(&relative, e))?;
        if !metadata.is_file() {
            return Err(WorkspaceError::NotAFile(relative));
        }
        tokio::fs::read(&absolute)
            .await
            .map_err(|e| WorkspaceError::io(&relative, e))
    }

    /// Read a file as UTF-8 (lossy).
    pub async fn read_to_string(&self, path: &str) -> Result<String, WorkspaceError> {
        let bytes = self.read(path).await?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }

    /// Atomically replace (or create) a file, creating parent directories.
    ///
    /// Returns the workspace-relative path written. Writers are serialized;
    /// readers never observe a partially written file.
    pub async fn write(&self, path: &str, data: &[u8]) -> Result<String, WorkspaceError> {
        let (absolute, relative) = self.authorize(path, Operation::Write)?;
        let (Some(parent), Some(name)) = (absolute.parent(), absolute.file_name()) else {
            return Err(WorkspaceError::NotAFile(relative));
        };
        if relative.is_empty() {
            return Err(WorkspaceError::NotAFile(relative));
        }

        let _guard = self.write_lock.lock().await;

        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| WorkspaceError::io(&relative, e))?;

        let staging = parent.join(format!(
            ".{}.{}.partial",
            name.to_string_lossy(),
            uuid::Uuid::new_v4().simple()
        ));

        let written = async {
            tokio::fs::write(&staging, data).await?;
            tokio::fs::rename(&staging, &absolute).await
        }
        .await;

        if let Err(e) = written {
            let _ = tokio::fs::remove_file(&staging).await;
            return Err(WorkspaceError::io(&relative, e));
        }

        tracing::debug!(path = %relative, bytes = data.len(), "workspace write");
        Ok(relative)
    }

    /// Whether a readable file or directory exists at `path`.
    pub async fn exists(&self, path: &str) -> Result<bool, WorkspaceError> {
        let (absolute, _) = self.authorize(path, Operation::Read)?;
        Ok(tokio::fs::try_exists(&absolute).await.unwrap_or(false))
    }

    /// Names of the regular files directly inside `directory`, sorted.
    pub async fn list(&self, directory: &str) -> Result<Vec<String>, WorkspaceError> {
        let (absolute, relative) = self.authorize(directory, Operation::List)?;
        let metadata = tokio::fs::metadata(&absolute)
            .await
            .map_err(|e| WorkspaceError::io(&relative, e))?;
        if !metadata.is_dir() {
            return Err(WorkspaceError::NotADirectory(relative));
        }

        let mut files = Vec::new();
        for (name, is_dir) in self.visible_entries(&absolute).await? {
            if !is_dir {
                files.push(name);
            }
        }
        files.sort();
        Ok(files)
    }

    /// Every visible file in the workspace, grouped by workspace-relative
    /// folder (`"."` for the root).
    pub async fn list_all(&self) -> Result<BTreeMap<String, Vec<String>>, WorkspaceError> {
        let mut grouped: BTreeMap<String, Vec<String>> = BTreeMap::new();
        let mut pending = vec![self.root.clone()];

        while let Some(dir) = pending.pop() {
            let folder = match self.relative(&dir) {
                rel if rel.is_empty() => ".".to_string(),
                rel => rel,
            };
            for (name, is_dir) in self.visible_entries(&dir).await? {
                if is_dir {
                    pending.push(dir.join(&name));
                } else {
                    grouped.entry(folder.clone()).or_default().push(name);
                }
            }
        }

        for files in grouped.values_mut() {
            files.sort();
        }
        Ok(grouped)
    }

    /// Remove everything inside `directory`, keeping the directory itself.
    /// Returns the number of entries removed.
    pub async fn clear_dir(&self, directory: &str) -> Result<usize, WorkspaceError> {
        let (absolute, relative) = self.authorize(directory, Operation::Delete)?;
        if relative.is_empty() {
            return Err(WorkspaceError::AccessDenied(
                "refusing to clear the workspace root".to_string(),
            ));
        }

        let _guard = self.write_lock.lock().await;
        let mut entries = match tokio::fs::read_dir(&absolute).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(WorkspaceError::io(&relative, e)),
        };

        let mut removed = 0;
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| WorkspaceError::io(&relative, e))?
        {
            let path = entry.path();
            let file_type = entry
                .file_type()
                .await
                .map_err(|e| WorkspaceError::io(&relative, e))?;
            let result = if file_type.is_dir() {
                tokio::fs::remove_dir_all(&path).await
            } else {
                tokio::fs::remove_file(&path).await
            };
            match result {
                Ok(()) => removed += 1,
                Err(e) => tracing::warn!(path = %path.display(), error = %e, "failed to remove"),
            }
        }

        tracing::info!(directory = %relative, removed, "cleared workspace directory");
        Ok(removed)
    }

    /// Delete a single file.
    pub async fn remove_file(&self, path: &str) -> Result<(), WorkspaceError> {
        let (absolute, relative) = self.authorize(path, Operation::Delete)?;
        let _guard = self.write_lock.lock().await;
        let metadata = tokio::fs::symlink_metadata(&absolute)
            .await
            .map_err(|e| WorkspaceError::io(&relative, e))?;
        if metadata.is_dir() {
            return Err(WorkspaceError::NotAFile(relative));
        }
        tokio::fs::remove_file(&absolute)
            .await
            .map_err(|e| WorkspaceError::io(&relative, e))?;
        tracing::debug!(path = %relative, "removed file");
        Ok(())
    }

    /// Run `program` with the workspace root as working directory.
    ///
    /// A non-zero exit is not an error at this level; the caller decides
    /// what it means. Exceeding `limits.timeout` is.
    pub async fn execute(
        &self,
        program: &str,
        args: &[String],
        limits: &ExecLimits,
    ) -> Result<ExecutionResult, WorkspaceError> {
        tracing::info!(program, ?args, "workspace execute");
        Ok(exec::run(&self.root, program, args, limits).await?)
    }

    /// Run a script file from the workspace with `interpreter`.
    pub async fn run_script(
        &self,
        interpreter: &str,
        script: &str,
        limits: &ExecLimits,
    ) -> Result<ExecutionResult, WorkspaceError> {
        let (absolute, relative) = self.authorize(script, Operation::Execute)?;
        let metadata = tokio::fs::metadata(&absolute)
            .await
            .map_err(|e| WorkspaceError::io(&relative, e))?;
        if !metadata.is_file() {
            return Err(WorkspaceError::NotAFile(relative));
        }
        self.execute(interpreter, &[relative], limits).await
    }

    /// Directory entries the policy lets tools see, as `(name, is_dir)`.
    /// Staging files and symlinks leading outside the root are skipped.
    async fn visible_entries(&self, dir: &Path) -> Result<Vec<(String, bool)>, WorkspaceError> {
        let dir_relative = self.relative(dir);
        let mut entries = tokio::fs::read_dir(dir)
            .await
            .map_err(|e| WorkspaceError::io(&dir_relative, e))?;

        let mut visible = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| WorkspaceError::io(&dir_relative, e))?
        {
            let name = entry.file_name().to_string_lossy().into_owned();
            if name.starts_with('.') && name.ends_with(".partial") {
                continue;
            }
            let path = entry.path();
            let Ok(resolved) = resolve_existing_prefix(&path) else {
                continue;
            };
            if !resolved.starts_with(&self.root) {
                continue;
            }
            let relative = self.relative(&path);
            if !self.policy.check_access(&relative, Operation::List).is_allowed() {
                continue;
            }
            let is_dir = entry
                .file_type()
                .await
                .map(|t| t.is_dir())
                .unwrap_or(false);
            visible.push((name, is_dir));
        }
        Ok(visible)
    }
}

/// Lexically normalize a path: drop `.`, apply `..`.
fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::Prefix(prefix) => out.push(prefix.as_os_str()),
            Component::RootDir => out.push(Component::RootDir.as_os_str()),
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            Component::Normal(part) => out.push(part),
        }
    }
    out
}

/// Canonicalize the longest existing ancestor of `path` (following
/// symlinks) and re-append the components that do not exist yet.
fn resolve_existing_prefix(path: &Path) -> io::Result<PathBuf> {
    let mut existing = path.to_path_buf();
    let mut missing = Vec::new();
    while std::fs::symlink_metadata(&existing).is_err() {
        match existing.file_name() {
            Some(name) => {
                missing.push(name.to_os_string());
                existing.pop();
            }
            None => break,
        }
    }

    let mut resolved = existing.canonicalize()?;
    for name in missing.iter().rev() {
        resolved.push(name);
    }
    Ok(resolved)
}
