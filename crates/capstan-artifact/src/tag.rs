//! Tags derived from version-control state.

use capstan_common::Tag;

use crate::vcs::VersionState;

/// Prefix of the tag naming the active branch.
pub const BRANCH_PREFIX: &str = "branch_";
/// Prefix of the tag of a build matching a commit exactly.
pub const REF_PREFIX: &str = "ref_";
/// Prefix of the tag of a build with uncommitted changes on top of a commit.
pub const LAST_REF_PREFIX: &str = "last_ref_";

/// Tags to apply to an image built from a working copy in `state`.
///
/// A branch tag comes first when HEAD is on a branch. It is followed by
/// `ref_<commit>` for a clean tree or `last_ref_<commit>` for a dirty one.
#[must_use]
pub fn derive_tags(state: &VersionState) -> Vec<Tag> {
    let mut tags = Vec::with_capacity(2);

    if let Some(branch) = &state.branch {
        tags.push(Tag::sanitize(&format!(
            "{BRANCH_PREFIX}{}",
            branch.replace('/', "_")
        )));
    }

    let prefix = if state.dirty { LAST_REF_PREFIX } else { REF_PREFIX };
    tags.push(Tag::sanitize(&format!("{prefix}{}", state.commit)));

    tags
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    const COMMIT: &str = "abcdef1234567890abcdef1234567890abcdef12";

    fn names(state: &VersionState) -> Vec<String> {
        derive_tags(state).into_iter().map(Tag::into_inner).collect()
    }

    #[test]
    fn clean_branch() {
        let state = VersionState::on_branch("feature/foo", COMMIT, false);
        assert_eq!(
            names(&state),
            ["branch_feature_foo".to_string(), format!("ref_{COMMIT}")]
        );
    }

    #[test]
    fn dirty_branch() {
        let state = VersionState::on_branch("main", COMMIT, true);
        assert_eq!(
            names(&state),
            ["branch_main".to_string(), format!("last_ref_{COMMIT}")]
        );
    }

    #[test]
    fn detached_head_uses_commit_only() {
        assert_eq!(
            names(&VersionState::detached(COMMIT, false)),
            [format!("ref_{COMMIT}")]
        );
        assert_eq!(
            names(&VersionState::detached(COMMIT, true)),
            [format!("last_ref_{COMMIT}")]
        );
    }

    #[test]
    fn branch_names_are_sanitized() {
        let state = VersionState::on_branch("user/fix#12 ✓", COMMIT, false);
        assert_eq!(names(&state)[0], "branch_user_fix_12__");
    }

    proptest! {
        #[test]
        fn derivation_is_deterministic(
            branch in proptest::option::of("\\PC{0,40}"),
            commit in "[0-9a-f]{40}",
            dirty in any::<bool>(),
        ) {
            let state = VersionState { branch, commit, dirty };
            prop_assert_eq!(derive_tags(&state), derive_tags(&state.clone()));
            prop_assert_eq!(derive_tags(&state).len(), if state.is_detached() { 1 } else { 2 });
        }
    }
}
