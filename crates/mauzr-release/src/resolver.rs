//! Version resolution from tag history.
//!
//! The resolved version comes from the closest `vYYMMDD.N` tag in commit
//! ancestry, never from string order of tag names. Distance is the number of
//! commits reachable from HEAD but not from the tagged commit, which is what
//! `git describe` reports.

use crate::git::{CommitId, RepositoryState};
use mauzr_types::error::{ReleaseError, ReleaseResult};
use mauzr_types::version::{ResolvedVersion, VersionTag};
use serde::Serialize;
use std::collections::HashMap;
use tracing::{debug, info};

/// Outcome of version resolution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Resolution {
    /// The resolved version.
    pub version: ResolvedVersion,
    /// The tag the version descends from.
    pub tag: VersionTag,
    /// Commit the tag points at.
    pub tag_commit: CommitId,
    /// The commit that was resolved.
    pub head: CommitId,
    /// Commits after the tag.
    pub distance: u32,
}

/// Resolve the version of `state.head`.
///
/// Fails with `NoTagFound` when no matching tag is reachable; there is no
/// fallback version.
pub fn resolve(state: &RepositoryState) -> ReleaseResult<Resolution> {
    let reachable = state.ancestors(&state.head);
    let mut distances: HashMap<&str, u32> = HashMap::new();
    let mut best: Option<(u32, VersionTag, &str)> = None;

    for tag_ref in &state.tags {
        let tag = match tag_ref.name.parse::<VersionTag>() {
            Ok(tag) => tag,
            Err(_) => {
                debug!(tag = %tag_ref.name, "Ignoring non-version tag");
                continue;
            }
        };
        if !reachable.contains(tag_ref.commit.as_str()) {
            debug!(tag = %tag_ref.name, "Tag not reachable from HEAD");
            continue;
        }

        let distance = *distances
            .entry(tag_ref.commit.as_str())
            .or_insert_with(|| {
                let behind = state.ancestors(&tag_ref.commit);
                let ahead = reachable.iter().filter(|c| !behind.contains(*c)).count();
                u32::try_from(ahead).unwrap_or(u32::MAX)
            });

        let closer = match &best {
            None => true,
            Some((best_distance, best_tag, _)) => {
                distance < *best_distance || (distance == *best_distance && tag > *best_tag)
            }
        };
        if closer {
            best = Some((distance, tag, tag_ref.commit.as_str()));
        }
    }

    let (distance, tag, tag_commit) = best.ok_or_else(|| ReleaseError::NoTagFound {
        head: state.head.clone(),
    })?;
    let version = ResolvedVersion::new(tag, distance);

    info!(
        version = %version,
        tag = %tag,
        distance,
        head = %state.head,
        "Resolved version"
    );

    Ok(Resolution {
        version,
        tag,
        tag_commit: tag_commit.to_string(),
        head: state.head.clone(),
        distance,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Linear history `c0 <- c1 <- ... <- c{n-1}` with HEAD at the tip.
    fn linear(n: usize) -> RepositoryState {
        let mut state = RepositoryState::new(format!("c{}", n - 1));
        state.add_commit("c0", &[]);
        for i in 1..n {
            let parent = format!("c{}", i - 1);
            state.add_commit(format!("c{i}"), &[parent.as_str()]);
        }
        state
    }

    #[test]
    fn test_exactly_on_tag() {
        let mut state = linear(3);
        state.add_tag("v240115.1", "c2");
        let res = resolve(&state).unwrap();
        assert_eq!(res.version.to_string(), "240115.1");
        assert_eq!(res.distance, 0);
        assert_eq!(res.tag_commit, "c2");
    }

    #[test]
    fn test_three_commits_after_tag() {
        // Tag at A, three further commits to D.
        let mut state = RepositoryState::new("D");
        state.add_commit("A", &[]);
        state.add_commit("B", &["A"]);
        state.add_commit("C", &["B"]);
        state.add_commit("D", &["C"]);
        state.add_tag("v240115.1", "A");
        let res = resolve(&state).unwrap();
        assert_eq!(res.version.to_string(), "240115.1-post3");
        assert_eq!(res.distance, 3);
    }

    #[test]
    fn test_second_release_same_day() {
        let mut state = linear(4);
        state.add_tag("v240115.1", "c1");
        state.add_tag("v240115.2", "c3");
        assert_eq!(resolve(&state).unwrap().version.to_string(), "240115.2");
    }

    #[test]
    fn test_two_tags_on_same_commit_prefers_latest() {
        let mut state = linear(2);
        state.add_tag("v240115.2", "c1");
        state.add_tag("v240115.1", "c1");
        assert_eq!(resolve(&state).unwrap().version.to_string(), "240115.2");
    }

    #[test]
    fn test_no_tags() {
        let state = linear(3);
        assert!(matches!(
            resolve(&state),
            Err(ReleaseError::NoTagFound { head }) if head == "c2"
        ));
    }

    #[test]
    fn test_only_foreign_tags() {
        let mut state = linear(3);
        state.add_tag("v1.0.0", "c2");
        state.add_tag("nightly", "c1");
        state.add_tag("v240115.01", "c0");
        assert!(matches!(resolve(&state), Err(ReleaseError::NoTagFound { .. })));
    }

    #[test]
    fn test_unreachable_tag_is_ignored() {
        // A tag on a sibling branch must not be picked up.
        let mut state = RepositoryState::new("main2");
        state.add_commit("root", &[]);
        state.add_commit("main1", &["root"]);
        state.add_commit("main2", &["main1"]);
        state.add_commit("side", &["root"]);
        state.add_tag("v240301.1", "side");
        state.add_tag("v240101.1", "root");
        let res = resolve(&state).unwrap();
        assert_eq!(res.version.to_string(), "240101.1-post2");
    }

    #[test]
    fn test_graph_order_not_lexical_order() {
        // The newer tag by name sits further back in history than an older
        // hotfix tag that HEAD descends from more closely.
        let mut state = linear(5);
        state.add_tag("v240301.1", "c1");
        state.add_tag("v240215.3", "c3");
        let res = resolve(&state).unwrap();
        assert_eq!(res.version.to_string(), "240215.3-post1");
    }

    #[test]
    fn test_year_boundary() {
        let mut state = linear(3);
        state.add_tag("v231231.4", "c0");
        state.add_tag("v240101.0", "c1");
        assert_eq!(resolve(&state).unwrap().version.to_string(), "240101.0-post1");
    }

    #[test]
    fn test_merge_counts_commits_from_both_parents() {
        //      root(tag) -- a1 -- a2 --\
        //           \                  merge (HEAD)
        //            b1 --------------/
        let mut state = RepositoryState::new("merge");
        state.add_commit("root", &[]);
        state.add_commit("a1", &["root"]);
        state.add_commit("a2", &["a1"]);
        state.add_commit("b1", &["root"]);
        state.add_commit("merge", &["a2", "b1"]);
        state.add_tag("v240115.1", "root");
        let res = resolve(&state).unwrap();
        assert_eq!(res.distance, 4);
        assert_eq!(res.version.to_string(), "240115.1-post4");
    }

    #[test]
    fn test_tag_on_merged_branch_is_reachable() {
        let mut state = RepositoryState::new("merge");
        state.add_commit("root", &[]);
        state.add_commit("a1", &["root"]);
        state.add_commit("b1", &["root"]);
        state.add_commit("merge", &["a1", "b1"]);
        state.add_tag("v240101.1", "root");
        state.add_tag("v240102.1", "b1");
        let res = resolve(&state).unwrap();
        // From b1: merge and a1 are not its ancestors.
        assert_eq!(res.tag.to_string(), "v240102.1");
        assert_eq!(res.distance, 2);
    }
}
