// src/watch/snapshot.rs

//! Directory listings and the difference between two of them.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

/// The set of matching files seen in one listing.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DirSnapshot {
    paths: BTreeSet<PathBuf>,
}

impl DirSnapshot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, path: PathBuf) {
        self.paths.insert(path);
    }

    pub fn contains(&self, path: &Path) -> bool {
        self.paths.contains(path)
    }

    pub fn len(&self) -> usize {
        self.paths.len()
    }

    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &PathBuf> {
        self.paths.iter()
    }
}

impl FromIterator<PathBuf> for DirSnapshot {
    fn from_iter<I: IntoIterator<Item = PathBuf>>(iter: I) -> Self {
        Self {
            paths: iter.into_iter().collect(),
        }
    }
}

/// Files that appeared and disappeared between two listings, both sorted.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChangeSet {
    pub added: Vec<PathBuf>,
    pub removed: Vec<PathBuf>,
}

impl ChangeSet {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty()
    }
}

/// `added = after - before`, `removed = before - after`.
pub fn diff(before: &DirSnapshot, after: &DirSnapshot) -> ChangeSet {
    ChangeSet {
        added: after.paths.difference(&before.paths).cloned().collect(),
        removed: before.paths.difference(&after.paths).cloned().collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn snap(names: &[&str]) -> DirSnapshot {
        names.iter().map(|n| PathBuf::from(format!("/push/{n}"))).collect()
    }

    #[test]
    fn reports_new_and_vanished_files() {
        let before = snap(&["a.tar", "b.tar"]);
        let after = snap(&["b.tar", "c.tar", "d.tar"]);
        let change = diff(&before, &after);
        assert_eq!(
            change.added,
            vec![PathBuf::from("/push/c.tar"), PathBuf::from("/push/d.tar")]
        );
        assert_eq!(change.removed, vec![PathBuf::from("/push/a.tar")]);
    }

    proptest! {
        #[test]
        fn diff_is_exact_set_difference(
            before in proptest::collection::btree_set("[a-e]{1,3}", 0..12),
            after in proptest::collection::btree_set("[a-e]{1,3}", 0..12),
        ) {
            let b: DirSnapshot = before.iter().map(PathBuf::from).collect();
            let a: DirSnapshot = after.iter().map(PathBuf::from).collect();
            let change = diff(&b, &a);

            for p in &change.added {
                prop_assert!(a.contains(p) && !b.contains(p));
            }
            for p in &change.removed {
                prop_assert!(b.contains(p) && !a.contains(p));
            }
            let expected_added = after.difference(&before).count();
            let expected_removed = before.difference(&after).count();
            prop_assert_eq!(change.added.len(), expected_added);
            prop_assert_eq!(change.removed.len(), expected_removed);
            prop_assert!(change.added.windows(2).all(|w| w[0] < w[1]));

            prop_assert!(diff(&a, &a).is_empty());
        }
    }
}
