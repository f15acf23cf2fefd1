//! Clone / branch / commit / push against per-conversation working copies.

use codemend_common::{
    ChangeType, ChangedFile, CoreError, GitConfig, IndexingConfig, Patch, Result,
};
use git2::build::{CheckoutBuilder, RepoBuilder};
use git2::{
    Cred, Delta, DiffFindOptions, FetchOptions, IndexAddOption, Oid, PushOptions,
    RemoteCallbacks, Repository, Signature,
};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::remote_url::parse_remote_url;

pub struct WorkingCopyManager {
    config: GitConfig,
}

impl WorkingCopyManager {
    pub fn new(config: GitConfig) -> Self {
        Self { config }
    }

    /// Per-conversation directory under the configured root
    pub fn workdir_for(&self, conversation_id: &str) -> PathBuf {
        self.config.workdir_root.join(conversation_id)
    }

    fn callbacks(&self) -> RemoteCallbacks<'_> {
        let mut callbacks = RemoteCallbacks::new();
        let username = self.config.username.clone();
        let token = self.config.token.clone();
        callbacks.credentials(move |_url, username_from_url, _allowed| {
            let user = username_from_url.unwrap_or(&username);
            Cred::userpass_plaintext(user, &token)
        });
        callbacks
    }

    /// Clone `repo_url` (which may embed a branch reference) into the
    /// conversation's directory. The directory is removed synchronously when
    /// the clone fails.
    pub fn clone_for_conversation(
        &self,
        repo_url: &str,
        conversation_id: &str,
    ) -> Result<(Repository, String, Option<String>)> {
        let (clean_url, branch) = parse_remote_url(repo_url)?;
        let target = self.workdir_for(conversation_id);
        if target.exists() {
            std::fs::remove_dir_all(&target)?;
        }
        std::fs::create_dir_all(&target)?;

        let mut fetch = FetchOptions::new();
        fetch.remote_callbacks(self.callbacks());
        let mut builder = RepoBuilder::new();
        builder.fetch_options(fetch);
        if let Some(branch) = &branch {
            builder.branch(branch);
        }

        info!(url = %clean_url, branch = ?branch, path = %target.display(), "cloning working copy");
        match builder.clone(&clean_url, &target) {
            Ok(repo) => Ok((repo, clean_url, branch)),
            Err(e) => {
                // failed clones must not leave a half-populated directory behind
                let _ = std::fs::remove_dir_all(&target);
                Err(CoreError::WorkingCopy(format!("clone {clean_url}: {e}")))
            }
        }
    }

    pub fn open(&self, path: &Path) -> Result<Repository> {
        Repository::open(path)
            .map_err(|e| CoreError::WorkingCopy(format!("open {}: {e}", path.display())))
    }

    pub fn head_commit(&self, repo: &Repository) -> Result<String> {
        let head = repo
            .head()
            .map_err(|e| CoreError::WorkingCopy(format!("resolve HEAD: {e}")))?;
        let commit = head
            .peel_to_commit()
            .map_err(|e| CoreError::WorkingCopy(format!("peel HEAD: {e}")))?;
        Ok(commit.id().to_string())
    }

    /// Create (or reset) `branch` off the current HEAD and check it out
    pub fn create_branch(&self, repo: &Repository, branch: &str) -> Result<()> {
        let head = repo
            .head()
            .and_then(|h| h.peel_to_commit())
            .map_err(|e| CoreError::WorkingCopy(format!("branch base: {e}")))?;
        repo.branch(branch, &head, true)
            .map_err(|e| CoreError::WorkingCopy(format!("create branch {branch}: {e}")))?;
        repo.set_head(&format!("refs/heads/{branch}"))
            .map_err(|e| CoreError::WorkingCopy(format!("checkout {branch}: {e}")))?;
        repo.checkout_head(Some(CheckoutBuilder::new().force()))
            .map_err(|e| CoreError::WorkingCopy(format!("checkout {branch}: {e}")))?;
        Ok(())
    }

    /// Stage everything (including deletions) and commit
    pub fn commit_all(&self, repo: &Repository, message: &str) -> Result<String> {
        let mut index = repo
            .index()
            .map_err(|e| CoreError::WorkingCopy(format!("index: {e}")))?;
        index
            .add_all(["*"].iter(), IndexAddOption::DEFAULT, None)
            .map_err(|e| CoreError::WorkingCopy(format!("stage: {e}")))?;
        index
            .update_all(["*"].iter(), None)
            .map_err(|e| CoreError::WorkingCopy(format!("stage deletions: {e}")))?;
        index
            .write()
            .map_err(|e| CoreError::WorkingCopy(format!("write index: {e}")))?;
        let tree_id = index
            .write_tree()
            .map_err(|e| CoreError::WorkingCopy(format!("write tree: {e}")))?;
        let tree = repo
            .find_tree(tree_id)
            .map_err(|e| CoreError::WorkingCopy(format!("find tree: {e}")))?;

        let signature = Signature::now(&self.config.author_name, &self.config.author_email)
            .map_err(|e| CoreError::WorkingCopy(format!("signature: {e}")))?;

        // first commit of a scaffolded repository has no parent
        let parent = repo.head().ok().and_then(|h| h.peel_to_commit().ok());
        let parents: Vec<&git2::Commit> = parent.iter().collect();

        let oid = repo
            .commit(Some("HEAD"), &signature, &signature, message, &tree, &parents)
            .map_err(|e| CoreError::WorkingCopy(format!("commit: {e}")))?;
        Ok(oid.to_string())
    }

    /// Push `branch` to origin with upstream tracking
    pub fn push(&self, repo: &Repository, branch: &str) -> Result<()> {
        let mut remote = repo
            .find_remote("origin")
            .map_err(|e| CoreError::WorkingCopy(format!("origin: {e}")))?;
        let mut options = PushOptions::new();
        options.remote_callbacks(self.callbacks());
        let refspec = format!("refs/heads/{branch}:refs/heads/{branch}");
        remote
            .push(&[refspec.as_str()], Some(&mut options))
            .map_err(|e| CoreError::WorkingCopy(format!("push {branch}: {e}")))?;

        if let Ok(mut local) = repo.find_branch(branch, git2::BranchType::Local) {
            let _ = local.set_upstream(Some(&format!("origin/{branch}")));
        }
        info!(branch, "pushed branch");
        Ok(())
    }

    /// File-level changes between two commits; renames surface as
    /// DELETE(old) + ADD(new).
    pub fn diff_commits(
        &self,
        repo: &Repository,
        from_commit: &str,
        to_commit: &str,
    ) -> Result<Vec<ChangedFile>> {
        let from_tree = repo
            .find_commit(Oid::from_str(from_commit).map_err(git_err("bad commit id"))?)
            .and_then(|c| c.tree())
            .map_err(git_err("from tree"))?;
        let to_tree = repo
            .find_commit(Oid::from_str(to_commit).map_err(git_err("bad commit id"))?)
            .and_then(|c| c.tree())
            .map_err(git_err("to tree"))?;

        let mut diff = repo
            .diff_tree_to_tree(Some(&from_tree), Some(&to_tree), None)
            .map_err(git_err("diff"))?;
        let mut find = DiffFindOptions::new();
        find.renames(true);
        diff.find_similar(Some(&mut find)).map_err(git_err("diff renames"))?;

        let mut changes = Vec::new();
        for delta in diff.deltas() {
            let old_path = delta.old_file().path().map(path_string);
            let new_path = delta.new_file().path().map(path_string);
            match delta.status() {
                Delta::Added => {
                    if let Some(path) = new_path {
                        changes.push(ChangedFile {
                            relative_path: path,
                            change_type: ChangeType::Add,
                        });
                    }
                }
                Delta::Deleted => {
                    if let Some(path) = old_path {
                        changes.push(ChangedFile {
                            relative_path: path,
                            change_type: ChangeType::Delete,
                        });
                    }
                }
                Delta::Modified => {
                    if let Some(path) = new_path {
                        changes.push(ChangedFile {
                            relative_path: path,
                            change_type: ChangeType::Modify,
                        });
                    }
                }
                Delta::Renamed => {
                    if let Some(path) = old_path {
                        changes.push(ChangedFile {
                            relative_path: path,
                            change_type: ChangeType::Delete,
                        });
                    }
                    if let Some(path) = new_path {
                        changes.push(ChangedFile {
                            relative_path: path,
                            change_type: ChangeType::Add,
                        });
                    }
                }
                other => {
                    warn!(status = ?other, "unhandled diff status");
                }
            }
        }
        Ok(changes)
    }

    /// Write a patch into the working tree, returning the touched paths.
    /// Re-applying an identical patch leaves file contents untouched.
    pub fn apply_patch(&self, workdir: &Path, patch: &Patch) -> Result<Vec<String>> {
        let mut applied = Vec::new();
        for edit in patch.edits.iter().chain(patch.tests_added.iter()) {
            validate_edit_path(&edit.path)?;
            let target = workdir.join(&edit.path);
            match edit.op {
                codemend_common::EditOp::Delete => {
                    if target.exists() {
                        std::fs::remove_file(&target)?;
                        applied.push(edit.path.clone());
                    }
                }
                codemend_common::EditOp::Create | codemend_common::EditOp::Modify => {
                    let content = edit.content.as_deref().ok_or_else(|| {
                        CoreError::InvalidPatch(format!("{}: missing content", edit.path))
                    })?;
                    if let Ok(existing) = std::fs::read_to_string(&target) {
                        if existing == content {
                            continue;
                        }
                    }
                    if let Some(parent) = target.parent() {
                        std::fs::create_dir_all(parent)?;
                    }
                    std::fs::write(&target, content)?;
                    applied.push(edit.path.clone());
                }
            }
        }
        Ok(applied)
    }
}

fn git_err(context: &'static str) -> impl Fn(git2::Error) -> CoreError {
    move |e| CoreError::WorkingCopy(format!("{context}: {e}"))
}

fn path_string(path: &Path) -> String {
    path.to_string_lossy().replace('\\', "/")
}

fn validate_edit_path(path: &str) -> Result<()> {
    let p = Path::new(path);
    if p.is_absolute() || path.split(['/', '\\']).any(|seg| seg == "..") {
        return Err(CoreError::InvalidPatch(format!("unsafe path: {path}")));
    }
    Ok(())
}

/// True for main-source files the indexer and diff pipeline care about
pub fn is_source_file(path: &str, config: &IndexingConfig) -> bool {
    if !path.ends_with(".java") {
        return false;
    }
    if !path.starts_with(&config.source_root) {
        return false;
    }
    !config.test_roots.iter().any(|root| path.starts_with(root.as_str()))
}
