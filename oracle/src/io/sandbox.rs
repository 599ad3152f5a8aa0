//! Workspace sandbox for generated code.
//!
//! All file writes and git operations of the autonomous flow go through
//! [`Sandbox`]. The workspace must be disjoint from the tool's own directory,
//! every write is checked for containment before the filesystem is touched,
//! and push credentials are only ever held in the remote URL for the duration
//! of one push.

use std::fs;
use std::path::{Component, Path, PathBuf};
use std::time::Duration;

use thiserror::Error;
use tracing::{debug, info, instrument, warn};

use crate::io::config::OracleConfig;
use crate::io::git::{Git, GitError, redact_credentials};

const ORIGIN: &str = "origin";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SecurityViolation {
    #[error("workspace path is empty")]
    EmptyPath,
    #[error(
        "workspace {} overlaps the tool directory {}; choose a separate directory",
        .workspace.display(),
        .tool_root.display()
    )]
    OverlapsToolRoot {
        workspace: PathBuf,
        tool_root: PathBuf,
    },
    #[error("no workspace has been set")]
    NotInitialized,
    #[error("workspace {} is not empty; clone needs an empty directory", .0.display())]
    WorkspaceNotEmpty(PathBuf),
    #[error("path '{0}' escapes the workspace")]
    PathEscapesWorkspace(String),
    #[error("remote '{0}' is not an https URL; refusing to push with a credential")]
    NonHttpsRemote(String),
    #[error("{action} failed: {reason}")]
    Io { action: String, reason: String },
    #[error("git: {0}")]
    Git(#[from] GitError),
}

impl SecurityViolation {
    fn io(action: impl Into<String>, err: &std::io::Error) -> Self {
        SecurityViolation::Io {
            action: action.into(),
            reason: err.to_string(),
        }
    }
}

/// Bounds applied to every git subprocess.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SandboxLimits {
    pub git_timeout: Duration,
    pub git_output_limit_bytes: usize,
}

impl SandboxLimits {
    pub fn from_config(cfg: &OracleConfig) -> Self {
        Self {
            git_timeout: Duration::from_secs(cfg.git_timeout_secs),
            git_output_limit_bytes: cfg.git_output_limit_bytes,
        }
    }
}

impl Default for SandboxLimits {
    fn default() -> Self {
        Self::from_config(&OracleConfig::default())
    }
}

#[derive(Debug)]
pub struct Sandbox {
    tool_root: PathBuf,
    workspace: Option<PathBuf>,
    limits: SandboxLimits,
}

impl Sandbox {
    /// `tool_root` is the directory the tool runs from; it is canonicalized.
    pub fn new(
        tool_root: impl AsRef<Path>,
        limits: SandboxLimits,
    ) -> Result<Self, SecurityViolation> {
        let tool_root = tool_root.as_ref();
        let tool_root = fs::canonicalize(tool_root).map_err(|err| {
            SecurityViolation::io(format!("resolve {}", tool_root.display()), &err)
        })?;
        Ok(Self {
            tool_root,
            workspace: None,
            limits,
        })
    }

    pub fn tool_root(&self) -> &Path {
        &self.tool_root
    }

    /// Resolve, validate and create the workspace directory.
    #[instrument(skip_all)]
    pub fn set_workspace(&mut self, raw: &str) -> Result<&Path, SecurityViolation> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Err(SecurityViolation::EmptyPath);
        }
        let expanded = expand_home(raw);
        let absolute = if expanded.is_absolute() {
            expanded
        } else {
            self.tool_root.join(expanded)
        };
        let resolved = resolve_existing_prefix(&normalize_lexically(&absolute))?;

        if resolved == self.tool_root
            || resolved.starts_with(&self.tool_root)
            || self.tool_root.starts_with(&resolved)
        {
            warn!(workspace = %resolved.display(), "workspace overlaps tool root");
            return Err(SecurityViolation::OverlapsToolRoot {
                workspace: resolved,
                tool_root: self.tool_root.clone(),
            });
        }

        fs::create_dir_all(&resolved)
            .map_err(|err| SecurityViolation::io(format!("create {}", resolved.display()), &err))?;
        let resolved = fs::canonicalize(&resolved)
            .map_err(|err| SecurityViolation::io(format!("resolve {}", resolved.display()), &err))?;
        info!(workspace = %resolved.display(), "workspace set");
        Ok(self.workspace.insert(resolved).as_path())
    }

    pub fn workspace(&self) -> Result<&Path, SecurityViolation> {
        self.workspace
            .as_deref()
            .ok_or(SecurityViolation::NotInitialized)
    }

    /// Clone `url` into the (empty) workspace.
    pub fn clone_repo(&self, url: &str) -> Result<(), SecurityViolation> {
        let workspace = self.workspace()?;
        let mut entries = fs::read_dir(workspace)
            .map_err(|err| SecurityViolation::io(format!("list {}", workspace.display()), &err))?;
        if entries.next().is_some() {
            return Err(SecurityViolation::WorkspaceNotEmpty(workspace.to_path_buf()));
        }
        self.git()?.clone_here(url)?;
        info!(url = %redact_credentials(url), "repository cloned");
        Ok(())
    }

    pub fn create_branch(&self, name: &str) -> Result<(), SecurityViolation> {
        self.git()?.checkout_new_branch(name)?;
        Ok(())
    }

    pub fn current_branch(&self) -> Result<String, SecurityViolation> {
        Ok(self.git()?.current_branch()?)
    }

    /// Configure a repository-local commit identity. Global config is never touched.
    pub fn set_commit_identity(&self, username: &str) -> Result<(), SecurityViolation> {
        let git = self.git()?;
        git.config_local("user.name", username)?;
        git.config_local("user.email", &noreply_email(username))?;
        let email = git.config_get("user.email")?;
        debug!(%email, "repository commit identity set");
        Ok(())
    }

    /// Write `content` to `relative` inside the workspace, creating parents.
    #[instrument(skip_all, fields(path = relative))]
    pub fn write_file(&self, relative: &str, content: &str) -> Result<PathBuf, SecurityViolation> {
        let workspace = self.workspace()?;
        let target = contained_path(workspace, relative)?;

        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent).map_err(|err| {
                SecurityViolation::io(format!("create {}", parent.display()), &err)
            })?;
        }
        fs::write(&target, content)
            .map_err(|err| SecurityViolation::io(format!("write {}", target.display()), &err))?;
        debug!(bytes = content.len(), "file written");
        Ok(target)
    }

    pub fn stage_all(&self) -> Result<(), SecurityViolation> {
        Ok(self.git()?.add_all()?)
    }

    /// Diff of the staged changes.
    pub fn get_diff(&self) -> Result<String, SecurityViolation> {
        Ok(self.git()?.diff_cached()?)
    }

    /// Commit staged changes. Returns `false` when nothing was staged.
    pub fn commit(&self, message: &str) -> Result<bool, SecurityViolation> {
        Ok(self.git()?.commit_staged(message)?)
    }

    /// Push `branch` to origin using a temporary credential-bearing URL.
    ///
    /// The original remote URL is restored on every exit path. Error text is
    /// scrubbed of the credential.
    #[instrument(skip_all, fields(branch))]
    pub fn push_with_credential(
        &self,
        username: &str,
        secret: &str,
        branch: &str,
    ) -> Result<(), SecurityViolation> {
        let git = self.git()?;
        let original = git.remote_url(ORIGIN)?;
        let Some(authed) = credential_url(&original, username, secret) else {
            warn!(remote = %redact_credentials(&original), "refusing non-https push");
            return Err(SecurityViolation::NonHttpsRemote(redact_credentials(&original)));
        };

        git.set_remote_url(ORIGIN, &authed)
            .map_err(|err| scrub(err, secret))?;
        let restore = RemoteRestore {
            git: &git,
            original: &original,
        };
        let pushed = git.push(ORIGIN, branch).map_err(|err| scrub(err, secret));
        drop(restore);

        pushed?;
        info!(branch, "pushed");
        Ok(())
    }

    /// Remove the workspace directory and forget it.
    pub fn delete_workspace(&mut self) -> Result<(), SecurityViolation> {
        let workspace = self.workspace()?.to_path_buf();
        fs::remove_dir_all(&workspace)
            .map_err(|err| SecurityViolation::io(format!("remove {}", workspace.display()), &err))?;
        self.workspace = None;
        info!(workspace = %workspace.display(), "workspace deleted");
        Ok(())
    }

    fn git(&self) -> Result<Git, SecurityViolation> {
        Ok(Git::new(
            self.workspace()?,
            self.limits.git_timeout,
            self.limits.git_output_limit_bytes,
        ))
    }
}

/// Puts the original origin URL back when dropped.
struct RemoteRestore<'a> {
    git: &'a Git,
    original: &'a str,
}

impl Drop for RemoteRestore<'_> {
    fn drop(&mut self) {
        match self.git.set_remote_url(ORIGIN, self.original) {
            Ok(()) => debug!("remote url restored"),
            Err(err) => warn!(error = %err, "failed to restore remote url"),
        }
    }
}

pub fn noreply_email(username: &str) -> String {
    format!("{username}@users.noreply.github.com")
}

/// Join `relative` onto `workspace` and prove the result stays inside it.
fn contained_path(workspace: &Path, relative: &str) -> Result<PathBuf, SecurityViolation> {
    let escape = || SecurityViolation::PathEscapesWorkspace(relative.to_string());
    let trimmed = relative.trim();
    if trimmed.is_empty() {
        return Err(escape());
    }
    let rel = Path::new(trimmed);
    if rel.has_root() || rel.is_absolute() {
        return Err(escape());
    }
    let target = normalize_lexically(&workspace.join(rel));
    if target == workspace || !target.starts_with(workspace) {
        return Err(escape());
    }
    let resolved = resolve_existing_prefix(&target).map_err(|_| escape())?;
    if !resolved.starts_with(workspace) {
        warn!(path = relative, "symlinked path resolves outside the workspace");
        return Err(escape());
    }
    Ok(target)
}

fn expand_home(raw: &str) -> PathBuf {
    let home = std::env::var_os("HOME").map(PathBuf::from);
    match (raw, home) {
        ("~", Some(home)) => home,
        (_, Some(home)) if raw.starts_with("~/") => home.join(&raw[2..]),
        _ => PathBuf::from(raw),
    }
}

/// Resolve `.` and `..` without touching the filesystem.
fn normalize_lexically(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::Prefix(_) | Component::RootDir | Component::Normal(_) => {
                out.push(component.as_os_str());
            }
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
        }
    }
    out
}

/// Canonicalize the deepest existing ancestor of `path` and re-append the
/// missing tail, so symlinks in the existing part are resolved.
fn resolve_existing_prefix(path: &Path) -> Result<PathBuf, SecurityViolation> {
    let mut tail = Vec::new();
    let mut current = path;
    loop {
        if fs::symlink_metadata(current).is_ok() {
            let mut resolved = fs::canonicalize(current).map_err(|err| {
                SecurityViolation::io(format!("resolve {}", current.display()), &err)
            })?;
            for part in tail.iter().rev() {
                resolved.push(part);
            }
            return Ok(resolved);
        }
        match (current.parent(), current.file_name()) {
            (Some(parent), Some(name)) => {
                tail.push(name.to_os_string());
                current = parent;
            }
            _ => return Ok(path.to_path_buf()),
        }
    }
}

/// `url` with its userinfo replaced by `username:secret`, or `None` unless it
/// is an https URL with a host.
///
/// Only the authority (up to the first `/`, `?` or `#`) is searched for an
/// existing userinfo, so an `@` in the path never moves the host.
fn credential_url(url: &str, username: &str, secret: &str) -> Option<String> {
    let rest = url.strip_prefix("https://")?;
    let end = rest
        .find(|c: char| matches!(c, '/' | '?' | '#'))
        .unwrap_or(rest.len());
    let (authority, tail) = rest.split_at(end);
    let host = authority.rsplit_once('@').map_or(authority, |(_, host)| host);
    if host.is_empty() {
        return None;
    }
    Some(format!(
        "https://{}:{}@{host}{tail}",
        encode_userinfo(username),
        encode_userinfo(secret)
    ))
}

/// Percent-encode everything outside the RFC 3986 unreserved set.
fn encode_userinfo(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for byte in raw.bytes() {
        if byte.is_ascii_alphanumeric() || matches!(byte, b'-' | b'.' | b'_' | b'~') {
            out.push(byte as char);
        } else {
            out.push_str(&format!("%{byte:02X}"));
        }
    }
    out
}

fn scrub(err: GitError, secret: &str) -> GitError {
    let clean = |text: String| {
        let text = redact_credentials(&text);
        if secret.is_empty() {
            text
        } else {
            text.replace(secret, "***").replace(&encode_userinfo(secret), "***")
        }
    };
    match err {
        GitError::Spawn { command, reason } => GitError::Spawn {
            command: clean(command),
            reason: clean(reason),
        },
        GitError::TimedOut { command, secs } => GitError::TimedOut {
            command: clean(command),
            secs,
        },
        GitError::Failed { command, output } => GitError::Failed {
            command: clean(command),
            output: clean(output),
        },
    }
}
