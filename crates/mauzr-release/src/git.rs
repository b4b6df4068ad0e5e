//! Repository state as seen by the version resolver.
//!
//! Git is only touched while loading: `GitRepo::load_state` snapshots HEAD,
//! the ancestry of HEAD and all tag refs into a `RepositoryState`. Everything
//! downstream works on that value.

use mauzr_types::error::{ReleaseError, ReleaseResult};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::process::Command;
use tracing::debug;

/// Full commit hash.
pub type CommitId = String;

/// A tag ref, peeled to the commit it points at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TagRef {
    pub name: String,
    pub commit: CommitId,
}

/// Snapshot of the commit graph reachable from HEAD plus tag refs.
#[derive(Debug, Clone, Default)]
pub struct RepositoryState {
    /// Current commit.
    pub head: CommitId,
    /// Parent lists of every known commit.
    pub parents: HashMap<CommitId, Vec<CommitId>>,
    /// All tag refs of the repository, matching or not.
    pub tags: Vec<TagRef>,
    /// Checked out branch, `None` when HEAD is detached.
    pub branch: Option<String>,
    /// Whether the working tree has uncommitted changes.
    pub dirty: bool,
}

impl RepositoryState {
    /// Empty state positioned at `head`.
    pub fn new(head: impl Into<CommitId>) -> Self {
        Self {
            head: head.into(),
            ..Default::default()
        }
    }

    /// Record a commit and its parents.
    pub fn add_commit(&mut self, id: impl Into<CommitId>, parents: &[&str]) {
        self.parents.insert(
            id.into(),
            parents.iter().map(|p| (*p).to_string()).collect(),
        );
    }

    /// Record a tag pointing at `commit`.
    pub fn add_tag(&mut self, name: impl Into<String>, commit: impl Into<CommitId>) {
        self.tags.push(TagRef {
            name: name.into(),
            commit: commit.into(),
        });
    }

    /// All commits reachable from `from`, including itself.
    ///
    /// Parents missing from the snapshot (shallow clones) end the walk.
    pub fn ancestors<'a>(&'a self, from: &'a str) -> HashSet<&'a str> {
        let mut seen = HashSet::new();
        let mut stack = vec![from];
        while let Some(commit) = stack.pop() {
            if !seen.insert(commit) {
                continue;
            }
            if let Some(parents) = self.parents.get(commit) {
                stack.extend(parents.iter().map(String::as_str));
            }
        }
        seen
    }
}

/// A git working copy accessed through the `git` CLI.
pub struct GitRepo {
    root: PathBuf,
}

impl GitRepo {
    /// Open the repository at `root`, verifying it is a git working copy.
    pub fn open(root: impl AsRef<Path>) -> ReleaseResult<Self> {
        let repo = Self {
            root: root.as_ref().to_path_buf(),
        };
        repo.git(&["rev-parse", "--git-dir"]).map_err(|_| {
            ReleaseError::Git(format!("Not a git repository: {}", repo.root.display()))
        })?;
        Ok(repo)
    }

    /// Root of the working copy.
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn git(&self, args: &[&str]) -> ReleaseResult<String> {
        debug!(args = ?args, "Running git");
        let output = Command::new("git")
            .args(args)
            .current_dir(&self.root)
            .output()
            .map_err(|e| ReleaseError::Git(format!("Failed to run git: {e}")))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(ReleaseError::Git(format!(
                "git {} failed: {}",
                args.join(" "),
                stderr.trim()
            )));
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    /// Hash of the current commit.
    pub fn head(&self) -> ReleaseResult<CommitId> {
        Ok(self.git(&["rev-parse", "HEAD"])?.trim().to_string())
    }

    /// Checked out branch name, `None` on a detached HEAD.
    pub fn branch(&self) -> ReleaseResult<Option<String>> {
        let name = self.git(&["rev-parse", "--abbrev-ref", "HEAD"])?;
        let name = name.trim();
        Ok((name != "HEAD").then(|| name.to_string()))
    }

    /// Whether tracked or untracked files differ from HEAD.
    pub fn is_dirty(&self) -> ReleaseResult<bool> {
        Ok(!self.git(&["status", "--porcelain"])?.trim().is_empty())
    }

    /// Snapshot everything the resolver and publisher need.
    pub fn load_state(&self) -> ReleaseResult<RepositoryState> {
        let head = self.head()?;
        let parents = parse_rev_list(&self.git(&["rev-list", "--parents", "HEAD"])?);
        let tags = parse_tag_refs(&self.git(&[
            "for-each-ref",
            "--format=%(refname:strip=2) %(objectname) %(*objectname)",
            "refs/tags",
        ])?);
        let branch = self.branch()?;
        let dirty = self.is_dirty()?;

        debug!(
            head = %head,
            commits = parents.len(),
            tags = tags.len(),
            dirty,
            "Loaded repository state"
        );

        Ok(RepositoryState {
            head,
            parents,
            tags,
            branch,
            dirty,
        })
    }
}

/// Parse `git rev-list --parents` output: one `<commit> <parent>...` per line.
pub fn parse_rev_list(output: &str) -> HashMap<CommitId, Vec<CommitId>> {
    output
        .lines()
        .filter_map(|line| {
            let mut ids = line.split_whitespace().map(String::from);
            let commit = ids.next()?;
            Some((commit, ids.collect()))
        })
        .collect()
}

/// Parse `for-each-ref` output of `<name> <object> [<peeled object>]`.
///
/// Annotated tags carry the peeled commit in the third column; lightweight
/// tags point at the commit directly.
pub fn parse_tag_refs(output: &str) -> Vec<TagRef> {
    output
        .lines()
        .filter_map(|line| {
            let mut fields = line.split_whitespace();
            let name = fields.next()?;
            let object = fields.next()?;
            let commit = fields.next().unwrap_or(object);
            Some(TagRef {
                name: name.to_string(),
                commit: commit.to_string(),
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_rev_list() {
        let parents = parse_rev_list("d c\nc b a2\nb a\na\n\n");
        assert_eq!(parents.len(), 4);
        assert_eq!(parents["c"], vec!["b", "a2"]);
        assert!(parents["a"].is_empty());
    }

    #[test]
    fn test_parse_tag_refs_lightweight_and_annotated() {
        let tags = parse_tag_refs("v240115.1 aaa\nv240115.2 tagobj ccc\n");
        assert_eq!(
            tags,
            vec![
                TagRef {
                    name: "v240115.1".into(),
                    commit: "aaa".into()
                },
                TagRef {
                    name: "v240115.2".into(),
                    commit: "ccc".into()
                },
            ]
        );
    }

    #[test]
    fn test_ancestors_follow_merges() {
        let mut state = RepositoryState::new("m");
        state.add_commit("a", &[]);
        state.add_commit("b", &["a"]);
        state.add_commit("x", &["a"]);
        state.add_commit("m", &["b", "x"]);
        let ancestors = state.ancestors("m");
        assert_eq!(ancestors.len(), 4);
        assert!(state.ancestors("b").contains("a"));
        assert!(!state.ancestors("b").contains("x"));
    }

    #[test]
    fn test_ancestors_of_shallow_boundary() {
        let mut state = RepositoryState::new("b");
        state.add_commit("b", &["missing"]);
        let ancestors = state.ancestors("b");
        assert!(ancestors.contains("b"));
        assert!(ancestors.contains("missing"));
    }

    /// Run git in `dir` with a throwaway identity and no signing.
    fn git_in(dir: &Path, args: &[&str]) -> String {
        let output = Command::new("git")
            .args([
                "-c",
                "user.name=mauzr",
                "-c",
                "user.email=mauzr@example.com",
                "-c",
                "commit.gpgsign=false",
                "-c",
                "tag.gpgsign=false",
            ])
            .args(args)
            .current_dir(dir)
            .output()
            .unwrap();
        assert!(output.status.success(), "git {args:?}: {output:?}");
        String::from_utf8(output.stdout).unwrap().trim().to_string()
    }

    #[test]
    fn test_load_state_from_real_repository() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        git_in(root, &["init", "-q"]);
        git_in(root, &["symbolic-ref", "HEAD", "refs/heads/master"]);
        git_in(root, &["commit", "-q", "--allow-empty", "-m", "A"]);
        let tagged = git_in(root, &["rev-parse", "HEAD"]);
        git_in(root, &["tag", "-a", "v240115.1", "-m", "release"]);
        for msg in ["B", "C", "D"] {
            git_in(root, &["commit", "-q", "--allow-empty", "-m", msg]);
        }
        // Lightweight tags have an empty peeled column.
        git_in(root, &["tag", "nightly", "HEAD~1"]);
        let nightly = git_in(root, &["rev-parse", "HEAD~1"]);

        let repo = GitRepo::open(root).unwrap();
        let state = repo.load_state().unwrap();
        assert_eq!(state.head, git_in(root, &["rev-parse", "HEAD"]));
        assert_eq!(state.parents.len(), 4);
        assert_eq!(state.branch.as_deref(), Some("master"));
        assert!(!state.dirty);
        assert!(state.tags.contains(&TagRef {
            name: "v240115.1".into(),
            commit: tagged,
        }));
        assert!(state.tags.contains(&TagRef {
            name: "nightly".into(),
            commit: nightly,
        }));

        let resolution = crate::resolver::resolve(&state).unwrap();
        assert_eq!(resolution.version.to_string(), "240115.1-post3");

        std::fs::write(root.join("untracked.txt"), "x").unwrap();
        assert!(repo.load_state().unwrap().dirty);

        git_in(root, &["checkout", "-q", "--detach"]);
        assert_eq!(repo.branch().unwrap(), None);
    }

    #[test]
    fn test_open_non_repository() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            GitRepo::open(dir.path()),
            Err(ReleaseError::Git(_))
        ));
    }
}
